// Trait definitions for honeypot services

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::events::Fields;

/// Protocols the lab can impersonate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Ftp,
    Http,
}

impl Protocol {
    /// Module name used in event records and segment file names
    pub fn module(&self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Ftp => "ftp",
            Protocol::Http => "http",
        }
    }

    /// Display label used by the status table
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Ssh => "SSH",
            Protocol::Ftp => "FTP",
            Protocol::Http => "HTTP",
        }
    }

    /// Whether a handler for this protocol is compiled in
    pub fn handler_available(&self) -> bool {
        match self {
            Protocol::Ssh => cfg!(feature = "ssh"),
            Protocol::Ftp => cfg!(feature = "ftp"),
            Protocol::Http => cfg!(feature = "http"),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Listener address as configured (host may be a name or an IP literal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddr {
    pub host: String,
    pub port: u16,
}

impl BindAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BindAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Core trait that all honeypot services implement
///
/// A service binds its listener, accepts clients until the shutdown channel
/// fires, then returns. An error means the service could not run at all.
#[async_trait]
pub trait HoneypotService: Send {
    /// Protocol this honeypot impersonates
    fn protocol(&self) -> Protocol;

    /// Address the listener binds to
    fn bind_addr(&self) -> &BindAddr;

    /// Bind and serve until `shutdown` resolves
    async fn serve(&mut self, shutdown: oneshot::Receiver<()>) -> Result<()>;
}

/// Per-client context, alive from accept to close
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub protocol: Protocol,
    pub auth_attempts: u32,
}

impl Connection {
    pub fn new(peer: SocketAddr, protocol: Protocol) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            protocol,
            auth_attempts: 0,
        }
    }

    pub fn ip(&self) -> String {
        self.peer.ip().to_string()
    }

    /// Fields identifying the client in every event
    pub fn fields(&self) -> Fields {
        Fields::new().with("ip", self.ip())
    }

    /// Fields for connect and disconnect events
    pub fn lifecycle_fields(&self) -> Fields {
        self.fields()
            .with("port", self.peer.port())
            .with("session", self.id.to_string())
    }
}

/// Authentication method offered by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    PublicKey,
    None,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::PublicKey => "publickey",
            AuthMethod::None => "none",
        }
    }
}

/// Result of an authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Denied,
}

/// Secret material presented with an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PublicKey { key_type: String, fingerprint: String },
    None,
}

/// A single authentication attempt; there is no way to build a successful one
#[derive(Debug, Clone)]
pub struct AuthAttempt {
    pub username: String,
    pub credential: Credential,
    pub timestamp: DateTime<Utc>,
}

impl AuthAttempt {
    pub fn new(username: &str, credential: Credential) -> Self {
        Self {
            username: username.to_string(),
            credential,
            timestamp: Utc::now(),
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self.credential {
            Credential::Password(_) => AuthMethod::Password,
            Credential::PublicKey { .. } => AuthMethod::PublicKey,
            Credential::None => AuthMethod::None,
        }
    }

    pub fn outcome(&self) -> AuthOutcome {
        AuthOutcome::Denied
    }

    /// Credential material as event fields
    pub fn fields(&self) -> Fields {
        let mut fields = Fields::new()
            .with("user", self.username.clone())
            .with("method", self.method().as_str());

        match &self.credential {
            Credential::Password(password) => fields.insert("pass", password.clone()),
            Credential::PublicKey {
                key_type,
                fingerprint,
            } => {
                fields.insert("key_type", key_type.clone());
                fields.insert("key_fingerprint", fingerprint.clone());
            }
            Credential::None => {}
        }
        fields
    }
}
