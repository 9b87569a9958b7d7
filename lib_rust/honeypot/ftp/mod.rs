// FTP Honeypot Implementation
// RFC 959 control channel that accepts any login into a trap root and denies every transfer

use super::traits::{BindAddr, HoneypotService, Protocol};
use crate::error::ServiceError;
use crate::events::{EventLogger, Fields, Level};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub mod commands;
pub mod data_channel;
pub mod session;
pub mod trap;

use commands::{split_line, FtpCommand};
use data_channel::{format_pasv_response, parse_port_address, PassivePorts};
use session::{FtpSession, FtpState, TransferType};
use trap::TrapRoot;

/// Greeting sent on connect
pub const FTP_BANNER: &str = "220 ProFTPD 1.3.5 Server (Debian) [::ffff:127.0.0.1]";

/// Denial returned by every listing and transfer command
pub const FILE_UNAVAILABLE: &str = "550 Requested action not taken. File unavailable.";

const NOT_ENOUGH_PRIVILEGES: &str = "550 Not enough privileges.";

/// Longest accepted control line, terminator included
const MAX_LINE: u64 = 4096;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// FTP Honeypot Service
pub struct FtpHoneypot {
    bind: BindAddr,
    trap_root: PathBuf,
    passive_ports: PassivePorts,
    idle_timeout: Duration,
    logger: Arc<EventLogger>,
}

impl FtpHoneypot {
    pub fn new(
        bind: BindAddr,
        trap_root: impl Into<PathBuf>,
        passive_ports: PassivePorts,
        logger: Arc<EventLogger>,
    ) -> Self {
        Self {
            bind,
            trap_root: trap_root.into(),
            passive_ports,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            logger,
        }
    }
}

#[async_trait]
impl HoneypotService for FtpHoneypot {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn bind_addr(&self) -> &BindAddr {
        &self.bind
    }

    async fn serve(&mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let trap = TrapRoot::ensure(&self.trap_root)
            .with_context(|| format!("failed to create trap root {}", self.trap_root.display()))?;

        let addr = self.bind.to_string();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServiceError::Bind { addr: addr.clone(), source })?;

        info!(addr = %addr, root = %trap.path().display(), "FTP honeypot listening");
        self.logger.info(
            format!("FTP honeypot started on {}", addr),
            Fields::new()
                .with("bind", addr.clone())
                .with("root", trap.path().display().to_string()),
        );

        let state = Arc::new(FtpHoneypotState {
            trap,
            passive_ports: self.passive_ports.clone(),
            idle_timeout: self.idle_timeout,
            logger: Arc::clone(&self.logger),
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Accepted FTP connection");
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                handle_ftp_connection(stream, peer, state).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "FTP accept error");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("FTP honeypot received shutdown signal");
                    break;
                }
            }
        }

        self.logger.info("FTP honeypot stopped", Fields::new());
        Ok(())
    }
}

/// Shared state for FTP connections
struct FtpHoneypotState {
    trap: TrapRoot,
    passive_ports: PassivePorts,
    idle_timeout: Duration,
    logger: Arc<EventLogger>,
}

async fn handle_ftp_connection(stream: TcpStream, peer: SocketAddr, state: Arc<FtpHoneypotState>) {
    let local = match stream.local_addr() {
        Ok(local) => local,
        Err(e) => {
            debug!(peer = %peer, error = %e, "FTP connection dropped before setup");
            return;
        }
    };

    if let Err(e) = serve_connection(stream, peer, local, &state).await {
        debug!(peer = %peer, error = %e, "FTP connection error");
    }
}

/// Run one control connection to completion
async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    local: SocketAddr,
    state: &FtpHoneypotState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = FtpSession::new(peer, local);
    state.logger.info(
        format!("FTP connection from {}", session.conn.ip()),
        session.conn.lifecycle_fields(),
    );

    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let result = command_loop(&mut reader, &mut writer, &mut session, state).await;

    session.quit();
    state.logger.info(
        format!("FTP disconnection from {}", session.conn.ip()),
        session
            .conn
            .lifecycle_fields()
            .with("commands", session.command_count)
            .with("auth_attempts", session.conn.auth_attempts),
    );
    result
}

async fn command_loop<R, W>(
    reader: &mut R,
    writer: &mut W,
    session: &mut FtpSession,
    state: &FtpHoneypotState,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    reply(writer, FTP_BANNER).await?;

    let mut line = Vec::new();
    loop {
        line.clear();
        let read = tokio::time::timeout(
            state.idle_timeout,
            (&mut *reader).take(MAX_LINE).read_until(b'\n', &mut line),
        )
        .await;

        let n = match read {
            Ok(result) => result?,
            Err(_) => {
                reply(writer, "421 Control connection timed out.").await?;
                return Ok(());
            }
        };
        if n == 0 {
            return Ok(());
        }
        if line.last() != Some(&b'\n') && n as u64 >= MAX_LINE {
            reply(writer, "500 Command too long.").await?;
            return Ok(());
        }

        let text = String::from_utf8_lossy(&line);
        if let Some(response) = handle_line(&text, session, state).await {
            reply(writer, &response).await?;
        }

        if session.state == FtpState::Disconnected {
            return Ok(());
        }
    }
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Log one received line, then answer it
async fn handle_line(text: &str, session: &mut FtpSession, state: &FtpHoneypotState) -> Option<String> {
    let (verb, arg) = split_line(text);
    if verb.is_empty() {
        return None;
    }
    session.command_count += 1;

    let parsed = FtpCommand::parse(text);
    let level = match &parsed {
        Ok(cmd) if cmd.touches_files() => Level::Warning,
        _ => Level::Info,
    };
    log_command(&verb, arg.as_deref(), level, session, state);

    Some(match parsed {
        Ok(cmd) => handle_ftp_command(cmd, session, state).await,
        Err(e) => e.reply(),
    })
}

fn log_command(
    verb: &str,
    arg: Option<&str>,
    level: Level,
    session: &FtpSession,
    state: &FtpHoneypotState,
) {
    let fields = session.fields().with("command", verb);
    if verb == "PASS" {
        // Raw value goes only into the login event
        state
            .logger
            .emit(level, "FTP command received: PASS *****", fields);
        return;
    }

    let arg = arg.unwrap_or_default();
    state.logger.emit(
        level,
        format!("FTP command received: {} {}", verb, arg).trim_end().to_string(),
        fields.with("arg", arg),
    );
}

/// Handle one parsed FTP command
async fn handle_ftp_command(
    command: FtpCommand,
    session: &mut FtpSession,
    state: &FtpHoneypotState,
) -> String {
    use FtpCommand::*;

    if !session.is_logged_in() && !command.allowed_before_login() {
        return "530 Log in with USER and PASS first.".to_string();
    }

    match command {
        User(username) => {
            session.provide_user(&username);
            "331 Username ok, send password.".to_string()
        }
        Pass(password) => {
            if session.login() {
                let user = session.username.clone().unwrap_or_default();
                state.logger.warning(
                    "FTP login attempt",
                    session.fields().with("user", user).with("pass", password),
                );
                "230 Login successful.".to_string()
            } else {
                "503 Login with USER first.".to_string()
            }
        }
        Quit => {
            session.quit();
            "221 Goodbye.".to_string()
        }
        Syst => "215 UNIX Type: L8".to_string(),
        Noop => "200 NOOP command successful.".to_string(),
        Help(_) => "214-The following commands are recognized:\r\n \
            USER PASS QUIT PWD CWD CDUP LIST NLST STAT RETR STOR TYPE\r\n \
            MODE STRU PASV PORT SYST NOOP FEAT OPTS SIZE MDTM REST ABOR\r\n\
            214 Help OK."
            .to_string(),
        Feat => "211-Features supported:\r\n MDTM\r\n REST STREAM\r\n SIZE\r\n UTF8\r\n211 End FEAT."
            .to_string(),

        // The client is pinned to the virtual root whatever it asks for
        Pwd => format!("257 \"{}\" is the current directory.", session.current_dir()),
        Cwd(_) | Cdup => "250 Directory successfully changed.".to_string(),

        List(_) | Nlst(_) | Retr(_) | Stor(_) => {
            session.data_channel.reset();
            FILE_UNAVAILABLE.to_string()
        }
        Stat(Some(_)) => FILE_UNAVAILABLE.to_string(),
        Stat(None) => format!(
            "211-FTP server status:\r\n Logged in as {}\r\n TYPE: {}\r\n211 End of status.",
            session.username.as_deref().unwrap_or_default(),
            match session.transfer_type {
                TransferType::Ascii => "ASCII",
                TransferType::Binary => "BINARY",
            }
        ),
        Appe(_) | Stou | Dele(_) | Rnfr(_) | Rnto(_) | Mkd(_) | Rmd(_) => {
            NOT_ENOUGH_PRIVILEGES.to_string()
        }

        Pasv => {
            let ip = session.local_addr.ip();
            match session.data_channel.enter_passive_mode(ip, &state.passive_ports).await {
                Ok(addr) => {
                    debug!(peer = %session.conn.peer, port = addr.port(), "FTP client entered passive mode");
                    format!("227 Entering passive mode ({}).", format_pasv_response(addr))
                }
                Err(e) => {
                    warn!(error = %e, "Failed to enter passive mode");
                    "425 Can't open data connection.".to_string()
                }
            }
        }
        Port(addr_str) => match parse_port_address(&addr_str) {
            Ok(addr) => {
                session.data_channel.reset();
                debug!(peer = %session.conn.peer, target = %addr, "FTP client requested active mode");
                "200 Active data connection established.".to_string()
            }
            Err(_) => "501 Invalid PORT format.".to_string(),
        },
        Type(type_code) => match type_code.to_uppercase().as_str() {
            "A" | "A N" => {
                session.transfer_type = TransferType::Ascii;
                "200 Type set to: ASCII.".to_string()
            }
            "I" | "L8" | "L 8" => {
                session.transfer_type = TransferType::Binary;
                "200 Type set to: Binary.".to_string()
            }
            _ => "504 Unsupported type.".to_string(),
        },
        Mode(mode) => match mode.to_uppercase().as_str() {
            "S" => "200 Transfer mode set to: S".to_string(),
            _ => "504 Unimplemented MODE type.".to_string(),
        },
        Stru(structure) => match structure.to_uppercase().as_str() {
            "F" => "200 File transfer structure set to: F.".to_string(),
            _ => "504 Unimplemented STRU type.".to_string(),
        },
        Opts(option, value) => match (option.as_str(), value.to_uppercase().as_str()) {
            ("UTF8", "ON") | ("UTF8", "") => "200 UTF8 set to on".to_string(),
            _ => "501 Invalid OPTS argument.".to_string(),
        },

        Size(path) => match state.trap.entry(&path) {
            Some(entry) if !entry.is_directory => format!("213 {}", entry.size),
            Some(_) => format!("550 {} is not retrievable.", path),
            None => "550 No such file or directory.".to_string(),
        },
        Mdtm(path) => match state.trap.entry(&path) {
            Some(entry) if !entry.is_directory => {
                format!("213 {}", entry.modified.format("%Y%m%d%H%M%S"))
            }
            Some(_) => format!("550 {} is not retrievable.", path),
            None => "550 No such file or directory.".to_string(),
        },

        Rest(offset) => format!("350 Restarting at position {}.", offset),
        Abor => "225 No transfer to abort.".to_string(),
        Allo => "202 No storage allocation necessary.".to_string(),
        Clnt(_) => "200 Noted.".to_string(),
    }
}
