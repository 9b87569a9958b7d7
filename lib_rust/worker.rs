// Worker process
// Hosts exactly one decoy service and ties its lifetime to SIGTERM/SIGINT

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::error::ServiceError;
use crate::events::{EventLogger, Fields};
use crate::honeypot::traits::{BindAddr, HoneypotService, Protocol};

/// Everything a worker needs to build its service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub protocol: Protocol,
    pub bind: BindAddr,
    /// FTP trap root
    pub ftp_root: PathBuf,
    /// FTP passive range, inclusive
    pub passive_ports: (u16, u16),
    pub host_key: Option<PathBuf>,
    pub ephemeral_host_key: bool,
}

impl WorkerSpec {
    pub fn new(protocol: Protocol, bind: BindAddr) -> Self {
        Self {
            protocol,
            bind,
            ftp_root: PathBuf::from("ftp_trap_dir"),
            passive_ports: (60000, 60009),
            host_key: None,
            ephemeral_host_key: true,
        }
    }
}

/// Instantiate the decoy a worker runs; fails when its handler was compiled out
pub fn build_service(
    spec: &WorkerSpec,
    logger: Arc<EventLogger>,
) -> Result<Box<dyn HoneypotService>, ServiceError> {
    match spec.protocol {
        #[cfg(feature = "ssh")]
        Protocol::Ssh => {
            use crate::honeypot::ssh::{HostKeySource, SshHoneypot};
            let host_key = HostKeySource::from_settings(spec.host_key.clone(), spec.ephemeral_host_key);
            Ok(Box::new(SshHoneypot::new(spec.bind.clone(), host_key, logger)))
        }
        #[cfg(feature = "ftp")]
        Protocol::Ftp => {
            use crate::honeypot::ftp::{data_channel::PassivePorts, FtpHoneypot};
            let (first, last) = spec.passive_ports;
            Ok(Box::new(FtpHoneypot::new(
                spec.bind.clone(),
                spec.ftp_root.clone(),
                PassivePorts::new(first, last),
                logger,
            )))
        }
        #[cfg(feature = "http")]
        Protocol::Http => {
            use crate::honeypot::http::HttpHoneypot;
            Ok(Box::new(HttpHoneypot::new(spec.bind.clone(), logger)))
        }
        #[allow(unreachable_patterns)]
        other => Err(ServiceError::HandlerUnavailable(other)),
    }
}

/// Serve until a termination signal arrives or the service gives up
///
/// An error or panic escaping the service is logged at critical level and
/// returned; the caller turns it into a non-zero exit status.
pub async fn run_worker(service: Box<dyn HoneypotService>, logger: Arc<EventLogger>) -> Result<()> {
    let protocol = service.protocol();
    let bind = service.bind_addr().to_string();
    info!(protocol = %protocol, bind = %bind, pid = std::process::id(), "Worker starting");

    // Installed before serving so an early SIGTERM still stops cleanly
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    run_until(service, logger, shutdown_rx, async move {
        tokio::select! {
            _ = sigterm.recv() => info!(signal = "SIGTERM", "Received termination signal"),
            _ = sigint.recv() => info!(signal = "SIGINT", "Received termination signal"),
        }
        let _ = shutdown_tx.send(());
    })
    .await
}

/// Drive `service` until it ends, sending on its shutdown channel once `stop` resolves
async fn run_until<F>(
    mut service: Box<dyn HoneypotService>,
    logger: Arc<EventLogger>,
    shutdown_rx: oneshot::Receiver<()>,
    stop: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let protocol = service.protocol();
    let mut task = tokio::spawn(async move { service.serve(shutdown_rx).await });
    let stopper = tokio::spawn(stop);

    let joined = (&mut task).await;
    stopper.abort();

    let failure = match joined {
        Ok(Ok(())) => {
            info!(protocol = %protocol, "Worker stopped");
            return Ok(());
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            panic
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "unknown panic".to_string())
        }
        Err(e) => e.to_string(),
    };

    logger.critical(
        format!("Critical error in {} honeypot: {}", protocol, failure),
        Fields::new().with("error", failure.clone()),
    );
    error!(protocol = %protocol, error = %failure, "Worker failed");
    Err(anyhow!(failure))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogSettings;
    use crate::events::read_events;
    use async_trait::async_trait;
    use std::time::Duration;

    enum Behaviour {
        WaitForShutdown,
        Fail,
        Panic,
    }

    struct FakeService {
        bind: BindAddr,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl HoneypotService for FakeService {
        fn protocol(&self) -> Protocol {
            Protocol::Http
        }

        fn bind_addr(&self) -> &BindAddr {
            &self.bind
        }

        async fn serve(&mut self, shutdown: oneshot::Receiver<()>) -> Result<()> {
            match self.behaviour {
                Behaviour::WaitForShutdown => {
                    shutdown.await.ok();
                    Ok(())
                }
                Behaviour::Fail => Err(ServiceError::Bind {
                    addr: self.bind.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
                }
                .into()),
                Behaviour::Panic => panic!("handler blew up"),
            }
        }
    }

    fn fixture(behaviour: Behaviour) -> (Box<dyn HoneypotService>, Arc<EventLogger>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(EventLogger::new(
            "http",
            &LogSettings {
                log_directory: dir.path().to_path_buf(),
                log_file_prefix: "test".to_string(),
                log_retention: 30,
            },
        ));
        let service = Box::new(FakeService {
            bind: BindAddr::new("127.0.0.1", 8080),
            behaviour,
        });
        (service, logger, dir)
    }

    #[tokio::test]
    async fn stop_request_ends_cleanly() {
        let (service, logger, _dir) = fixture(Behaviour::WaitForShutdown);
        let (tx, rx) = oneshot::channel();

        let result = run_until(service, Arc::clone(&logger), rx, async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(());
        })
        .await;

        assert!(result.is_ok());
        assert!(read_events(&logger.active_path()).is_empty());
    }

    #[tokio::test]
    async fn service_error_is_critical() {
        let (service, logger, _dir) = fixture(Behaviour::Fail);
        let (_tx, rx) = oneshot::channel();

        let result = run_until(service, Arc::clone(&logger), rx, std::future::pending()).await;
        assert!(result.is_err());

        let events = read_events(&logger.active_path());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["level"], "CRITICAL");
        assert!(events[0]["error"].as_str().unwrap().contains("failed to bind 127.0.0.1:8080"));
    }

    #[tokio::test]
    async fn service_panic_is_critical() {
        let (service, logger, _dir) = fixture(Behaviour::Panic);
        let (_tx, rx) = oneshot::channel();

        let result = run_until(service, Arc::clone(&logger), rx, std::future::pending()).await;
        assert!(result.is_err());

        let events = read_events(&logger.active_path());
        assert_eq!(events[0]["level"], "CRITICAL");
        assert_eq!(events[0]["error"], "handler blew up");
    }

    #[test]
    fn builds_each_compiled_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(EventLogger::new(
            "build",
            &LogSettings {
                log_directory: dir.path().to_path_buf(),
                ..LogSettings::default()
            },
        ));

        for protocol in [Protocol::Ssh, Protocol::Ftp, Protocol::Http] {
            let spec = WorkerSpec::new(protocol, BindAddr::new("127.0.0.1", 0));
            match build_service(&spec, Arc::clone(&logger)) {
                Ok(service) => {
                    assert!(protocol.handler_available());
                    assert_eq!(service.protocol(), protocol);
                }
                Err(ServiceError::HandlerUnavailable(p)) => {
                    assert!(!protocol.handler_available());
                    assert_eq!(p, protocol);
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    }
}
