// SSH Honeypot Implementation
// Speaks real SSH up to authentication, records every credential, denies all of them

use super::traits::{
    AuthAttempt, BindAddr, Connection, Credential, HoneypotService, Protocol,
};
use crate::error::ServiceError;
use crate::events::{EventLogger, Fields};
use anyhow::Result;
use async_trait::async_trait;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, Disconnect, MethodSet, Pty, SshId};
use russh_keys::key::{KeyPair, PublicKey};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Version string sent to clients
pub const SSH_BANNER: &str = "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.1";

/// Where the server identity key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeySource {
    /// Persistent key; failing to load it is fatal
    File(PathBuf),
    /// Persistent key if loadable, otherwise a per-process key
    FileOrEphemeral(PathBuf),
    /// Per-process key; host identity changes on every restart
    Ephemeral,
}

impl HostKeySource {
    pub fn from_settings(path: Option<PathBuf>, allow_ephemeral: bool) -> Self {
        match (path, allow_ephemeral) {
            (Some(path), true) => HostKeySource::FileOrEphemeral(path),
            (Some(path), false) => HostKeySource::File(path),
            (None, _) => HostKeySource::Ephemeral,
        }
    }
}

/// Bounded waits applied to every connection
#[derive(Debug, Clone, Copy)]
pub struct SshTimeouts {
    /// Window for version exchange and a channel-open attempt
    pub channel_open: Duration,
    /// Further window for an authentication attempt
    pub auth_attempt: Duration,
}

impl Default for SshTimeouts {
    fn default() -> Self {
        Self {
            channel_open: Duration::from_secs(20),
            auth_attempt: Duration::from_secs(10),
        }
    }
}

/// SSH Honeypot Service
pub struct SshHoneypot {
    bind: BindAddr,
    host_key: HostKeySource,
    timeouts: SshTimeouts,
    logger: Arc<EventLogger>,
}

impl SshHoneypot {
    pub fn new(bind: BindAddr, host_key: HostKeySource, logger: Arc<EventLogger>) -> Self {
        Self {
            bind,
            host_key,
            timeouts: SshTimeouts::default(),
            logger,
        }
    }

    pub fn with_timeouts(mut self, timeouts: SshTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Resolve the configured host key policy into a key
    fn load_host_key(&self) -> Result<KeyPair, ServiceError> {
        match &self.host_key {
            HostKeySource::File(path) => russh_keys::load_secret_key(path, None).map_err(|e| {
                ServiceError::HostKey(format!("{}: {}", path.display(), e))
            }),
            HostKeySource::FileOrEphemeral(path) => {
                match russh_keys::load_secret_key(path, None) {
                    Ok(key) => Ok(key),
                    Err(e) => {
                        self.logger.warning(
                            "SSH host key unavailable, using an ephemeral key",
                            Fields::new()
                                .with("path", path.display().to_string())
                                .with("error", e.to_string()),
                        );
                        generate_ephemeral_key()
                    }
                }
            }
            HostKeySource::Ephemeral => {
                info!("No SSH host key configured, host identity changes on restart");
                generate_ephemeral_key()
            }
        }
    }

    fn server_config(&self, key: KeyPair) -> server::Config {
        server::Config {
            server_id: SshId::Standard(SSH_BANNER.to_string()),
            methods: advertised_methods(),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            inactivity_timeout: Some(self.timeouts.channel_open + self.timeouts.auth_attempt),
            keys: vec![key],
            ..Default::default()
        }
    }
}

fn generate_ephemeral_key() -> Result<KeyPair, ServiceError> {
    KeyPair::generate_ed25519()
        .ok_or_else(|| ServiceError::HostKey("failed to generate ed25519 key".to_string()))
}

/// Methods announced to clients, whatever they try
fn advertised_methods() -> MethodSet {
    MethodSet::PASSWORD | MethodSet::PUBLICKEY
}

#[async_trait]
impl HoneypotService for SshHoneypot {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    fn bind_addr(&self) -> &BindAddr {
        &self.bind
    }

    async fn serve(&mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let key = self.load_host_key()?;
        let config = Arc::new(self.server_config(key));

        let addr = self.bind.to_string();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServiceError::Bind { addr: addr.clone(), source })?;

        info!(addr = %addr, "SSH honeypot listening");
        self.logger.info(
            format!("SSH honeypot started on {}", addr),
            Fields::new().with("bind", addr.clone()),
        );

        let state = Arc::new(SshHoneypotState {
            config,
            timeouts: self.timeouts,
            logger: Arc::clone(&self.logger),
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Accepted SSH connection");
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                handle_ssh_connection(stream, peer, state).await;
                            });
                        }
                        Err(e) => {
                            // Per-accept failures (EMFILE, aborted handshakes) are transient
                            warn!(error = %e, "SSH accept error");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("SSH honeypot received shutdown signal");
                    break;
                }
            }
        }

        self.logger.info("SSH honeypot stopped", Fields::new());
        Ok(())
    }
}

/// Shared state for SSH connections
struct SshHoneypotState {
    config: Arc<server::Config>,
    timeouts: SshTimeouts,
    logger: Arc<EventLogger>,
}

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientClosed,
    TimedOut,
}

impl SessionEnd {
    fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::ClientClosed => "client",
            SessionEnd::TimedOut => "timeout",
        }
    }
}

/// Drive one SSH connection from accept to close
async fn handle_ssh_connection(stream: TcpStream, peer: SocketAddr, state: Arc<SshHoneypotState>) {
    let conn = Connection::new(peer, Protocol::Ssh);
    state
        .logger
        .info(format!("SSH connection from {}", conn.ip()), conn.lifecycle_fields());

    let tracker = Arc::new(AuthTracker::default());
    let handler = DecoyHandler::new(conn.clone(), Arc::clone(&state.logger), Arc::clone(&tracker));
    let timeouts = state.timeouts;
    // Both windows are measured from accept, version exchange included
    let channel_deadline = Instant::now() + timeouts.channel_open;

    let end = match tokio::time::timeout_at(
        channel_deadline,
        server::run_stream(Arc::clone(&state.config), stream, handler),
    )
    .await
    {
        Ok(Ok(session)) => {
            let handle = session.handle();
            tokio::pin!(session);

            let outcome = tokio::select! {
                result = &mut session => Some(result),
                _ = tokio::time::sleep_until(channel_deadline) => {
                    tokio::select! {
                        result = &mut session => Some(result),
                        _ = tokio::time::timeout(timeouts.auth_attempt, tracker.wait()) => None,
                    }
                }
            };

            match outcome {
                Some(Ok(())) => SessionEnd::ClientClosed,
                Some(Err(e)) => {
                    log_session_error(&state.logger, &conn, &e);
                    SessionEnd::ClientClosed
                }
                None => {
                    // The protocol task outlives the future; end it explicitly
                    let _ = handle
                        .disconnect(
                            Disconnect::ByApplication,
                            "session timeout".to_string(),
                            "en".to_string(),
                        )
                        .await;
                    SessionEnd::TimedOut
                }
            }
        }
        Ok(Err(e)) => {
            log_session_error(&state.logger, &conn, &e);
            SessionEnd::ClientClosed
        }
        Err(_) => SessionEnd::TimedOut,
    };

    state.logger.info(
        format!("SSH disconnection from {}", conn.ip()),
        conn.lifecycle_fields()
            .with("reason", end.as_str())
            .with("auth_attempts", tracker.attempts()),
    );
}

fn log_session_error(logger: &EventLogger, conn: &Connection, error: &russh::Error) {
    match error {
        russh::Error::Disconnect | russh::Error::HUP | russh::Error::IO(_) => {
            debug!(peer = %conn.peer, error = %error, "SSH client dropped");
        }
        _ => logger.error(
            format!("Error while handling SSH connection from {}", conn.ip()),
            conn.fields().with("error", error.to_string()),
        ),
    }
}

/// Authentication activity shared between a handler and its connection task
#[derive(Default)]
pub struct AuthTracker {
    signal: Notify,
    attempts: AtomicU32,
}

impl AuthTracker {
    fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.signal.notify_one();
    }

    fn record_activity(&self) {
        self.signal.notify_one();
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Resolves once activity was seen (immediately if it already happened)
    pub async fn wait(&self) {
        self.signal.notified().await
    }
}

/// Per-connection callback handler; every decision is a refusal
pub struct DecoyHandler {
    conn: Connection,
    logger: Arc<EventLogger>,
    tracker: Arc<AuthTracker>,
}

impl DecoyHandler {
    pub fn new(conn: Connection, logger: Arc<EventLogger>, tracker: Arc<AuthTracker>) -> Self {
        Self {
            conn,
            logger,
            tracker,
        }
    }

    /// Log the attempt and deny it
    fn deny(&mut self, message: &str, attempt: AuthAttempt) -> Auth {

        let mut fields = self.conn.fields();
        fields.extend(attempt.fields());
        self.logger.info(message, fields);

        self.tracker.record_attempt();
        Auth::Reject {
            proceed_with_methods: Some(advertised_methods()),
        }
    }

    /// Record a channel-level request that will never be honoured
    fn refuse_channel_request(&self, message: &str, fields: Fields) {
        let mut all = self.conn.fields();
        all.extend(fields);
        self.logger.warning(message, all);
        self.tracker.record_activity();
    }
}

#[async_trait]
impl server::Handler for DecoyHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.deny(
            "SSH 'none' authentication attempt",
            AuthAttempt::new(user, Credential::None),
        ))
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        Ok(self.deny(
            "SSH authentication attempt",
            AuthAttempt::new(user, Credential::Password(password.to_string())),
        ))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(self.deny(
            "SSH public key authentication attempt",
            AuthAttempt::new(
                user,
                Credential::PublicKey {
                    key_type: public_key.name().to_string(),
                    fingerprint: public_key.fingerprint(),
                },
            ),
        ))
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.refuse_channel_request(
            &format!("Unexpected channel opened by {}", self.conn.ip()),
            Fields::new().with("channel_type", "session"),
        );
        Ok(false)
    }

    async fn pty_request(
        &mut self,
        _channel: ChannelId,
        term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_channel_request("SSH PTY request refused", Fields::new().with("term", term));
        Ok(())
    }

    async fn shell_request(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_channel_request("SSH shell request refused", Fields::new());
        Ok(())
    }

    async fn exec_request(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.refuse_channel_request(
            "SSH exec request refused",
            Fields::new().with("command", String::from_utf8_lossy(data).to_string()),
        );
        Ok(())
    }
}
