// FTP Session Management
// Per-connection login state; the working directory never leaves the virtual root

use super::data_channel::DataChannelManager;
use crate::events::Fields;
use crate::honeypot::traits::{Connection, Protocol};
use std::net::SocketAddr;

/// FTP Connection States
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpState {
    /// TCP connection established, waiting for USER
    Connected,
    /// USER command received, waiting for PASS
    UserProvided,
    /// PASS command received, user logged in (to the trap root)
    LoggedIn,
    /// QUIT received or connection dropped
    Disconnected,
}

/// Transfer representation negotiated with TYPE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Ascii,
    Binary,
}

/// FTP Session
pub struct FtpSession {
    /// Current connection state
    pub state: FtpState,

    pub conn: Connection,

    /// Local end of the control connection; PASV listeners bind here
    pub local_addr: SocketAddr,

    // Authentication
    pub username: Option<String>,

    // Transfer settings
    pub transfer_type: TransferType,
    pub data_channel: DataChannelManager,

    pub command_count: u32,
}

impl FtpSession {
    /// Create a new FTP session
    pub fn new(peer: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            state: FtpState::Connected,
            conn: Connection::new(peer, Protocol::Ftp),
            local_addr,
            username: None,
            transfer_type: TransferType::Binary,
            data_channel: DataChannelManager::new(),
            command_count: 0,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == FtpState::LoggedIn
    }

    /// USER: remember the name, a new login always starts over
    pub fn provide_user(&mut self, username: &str) {
        self.username = Some(username.to_string());
        self.state = FtpState::UserProvided;
    }

    /// PASS: any password is accepted once a USER was given
    pub fn login(&mut self) -> bool {
        match self.state {
            FtpState::UserProvided | FtpState::LoggedIn if self.username.is_some() => {
                self.conn.auth_attempts += 1;
                self.state = FtpState::LoggedIn;
                true
            }
            _ => false,
        }
    }

    pub fn quit(&mut self) {
        self.data_channel.reset();
        self.state = FtpState::Disconnected;
    }

    /// Working directory reported to the client
    pub fn current_dir(&self) -> &'static str {
        "/"
    }

    /// Fields identifying the client
    pub fn fields(&self) -> Fields {
        self.conn.fields()
    }
}
