// Service descriptors
// One entry per protocol, built from the settings and owned by the supervisor

use std::path::Path;

use super::process::{WorkerExit, WorkerProcess};
use crate::config::Settings;
use crate::honeypot::traits::{BindAddr, Protocol};

/// Lifecycle of a supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    NotStarted,
    Running,
    /// Exited after a shutdown request
    Stopped,
    /// Still alive after the grace period and force-killed
    Killed,
    /// Exited without being asked to
    Crashed,
}

impl Liveness {
    pub fn label(&self) -> &'static str {
        match self {
            Liveness::NotStarted => "Not started",
            Liveness::Running => "Running",
            Liveness::Stopped => "Stopped",
            Liveness::Killed => "Killed",
            Liveness::Crashed => "Crashed",
        }
    }
}

/// A protocol service as the supervisor sees it
pub struct ServiceDescriptor {
    pub protocol: Protocol,
    pub enabled: bool,
    pub bind: BindAddr,
    /// Worker command line; `None` when no handler is compiled in
    pub command: Option<Vec<String>>,
    pub liveness: Liveness,
    pub last_exit: Option<WorkerExit>,
    pub(super) process: Option<WorkerProcess>,
}

impl ServiceDescriptor {
    pub fn new(protocol: Protocol, enabled: bool, bind: BindAddr) -> Self {
        Self {
            protocol,
            enabled,
            bind,
            command: None,
            liveness: Liveness::NotStarted,
            last_exit: None,
            process: None,
        }
    }

    pub fn with_command(mut self, argv: Vec<String>) -> Self {
        self.command = Some(argv);
        self
    }

    /// Descriptors for SSH, HTTP and FTP, in that order
    ///
    /// Each worker is `exe` re-invoked with the hidden `worker` subcommand;
    /// protocols whose handler is compiled out get no command.
    pub fn from_settings(settings: &Settings, exe: &Path, config_path: &Path) -> Vec<Self> {
        let base = |protocol: Protocol, bind: &BindAddr| -> Vec<String> {
            vec![
                exe.display().to_string(),
                "--config".to_string(),
                config_path.display().to_string(),
                "worker".to_string(),
                protocol.module().to_string(),
                "--host".to_string(),
                bind.host.clone(),
                "--port".to_string(),
                bind.port.to_string(),
            ]
        };

        let ssh_bind = BindAddr::new(settings.ssh_host.clone(), settings.ssh_port);
        let mut ssh_args = base(Protocol::Ssh, &ssh_bind);
        if let Some(key) = &settings.ssh_host_key {
            ssh_args.push("--host-key".to_string());
            ssh_args.push(key.display().to_string());
        }
        ssh_args.push("--ephemeral-host-key".to_string());
        ssh_args.push(settings.ssh_ephemeral_host_key.to_string());

        let http_bind = BindAddr::new(settings.http_host.clone(), settings.http_port);
        let http_args = base(Protocol::Http, &http_bind);

        let ftp_bind = BindAddr::new(settings.ftp_host.clone(), settings.ftp_port);
        let mut ftp_args = base(Protocol::Ftp, &ftp_bind);
        let (first, last) = settings.ftp_passive_ports;
        ftp_args.extend([
            "--ftp-root".to_string(),
            settings.ftp_root.display().to_string(),
            "--passive-first".to_string(),
            first.to_string(),
            "--passive-last".to_string(),
            last.to_string(),
        ]);

        [
            (Protocol::Ssh, settings.enable_ssh, ssh_bind, ssh_args),
            (Protocol::Http, settings.enable_http, http_bind, http_args),
            (Protocol::Ftp, settings.enable_ftp, ftp_bind, ftp_args),
        ]
        .into_iter()
        .map(|(protocol, enabled, bind, argv)| {
            let descriptor = Self::new(protocol, enabled, bind);
            if protocol.handler_available() {
                descriptor.with_command(argv)
            } else {
                descriptor
            }
        })
        .collect()
    }

    /// PID while the worker is alive
    pub fn pid(&self) -> Option<u32> {
        match (self.liveness, &self.process) {
            (Liveness::Running, Some(process)) => Some(process.pid),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.liveness == Liveness::Running
    }
}
