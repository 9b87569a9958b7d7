// Service supervisor
// Spawns one worker process per enabled protocol, watches liveness, and
// drives the two-phase shutdown

pub mod process;
pub mod service;
pub mod status;

pub use process::{WorkerExit, WorkerProcess};
pub use service::{Liveness, ServiceDescriptor};
pub use status::{render_table, StatusDisplay};

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Timing knobs
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Delay after each spawn
    pub stagger: Duration,
    /// Wait between SIGTERM and SIGKILL
    pub grace: Duration,
    /// Status table refresh period
    pub interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            stagger: Duration::from_millis(500),
            grace: Duration::from_secs(2),
            interval: Duration::from_secs(1),
        }
    }
}

/// Owns every service descriptor; nothing else touches them
pub struct Supervisor {
    services: Vec<ServiceDescriptor>,
    options: SupervisorOptions,
    shutting_down: bool,
}

impl Supervisor {
    pub fn new(services: Vec<ServiceDescriptor>, options: SupervisorOptions) -> Self {
        Self {
            services,
            options,
            shutting_down: false,
        }
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Spawn every enabled service that has a worker command
    ///
    /// Returns how many workers were started.
    pub async fn start(&mut self) -> usize {
        let mut started = 0;

        for service in &mut self.services {
            let label = service.protocol.label();
            if !service.enabled {
                info!(service = label, "Honeypot disabled in configuration");
                continue;
            }

            let Some(argv) = service.command.as_ref() else {
                warn!(service = label, "Honeypot enabled but no handler is available in this build");
                continue;
            };

            info!(service = label, bind = %service.bind, "Starting honeypot");
            match WorkerProcess::spawn(argv) {
                Ok(process) => {
                    info!(service = label, pid = process.pid, "Honeypot worker started");
                    service.process = Some(process);
                    service.liveness = Liveness::Running;
                    started += 1;
                    sleep(self.options.stagger).await;
                }
                Err(e) => {
                    error!(service = label, error = %e, "Failed to start honeypot worker");
                }
            }
        }

        started
    }

    /// Recompute liveness from process state
    pub fn refresh(&mut self) {
        let shutting_down = self.shutting_down;

        for service in &mut self.services {
            if service.liveness != Liveness::Running {
                continue;
            }
            let Some(process) = service.process.as_mut() else {
                continue;
            };

            match process.try_wait() {
                Ok(Some(exit)) => {
                    service.last_exit = Some(exit);
                    if shutting_down {
                        service.liveness = Liveness::Stopped;
                    } else {
                        service.liveness = Liveness::Crashed;
                        warn!(
                            service = service.protocol.label(),
                            pid = process.pid,
                            exit = %exit,
                            "Honeypot worker exited unexpectedly"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(service = service.protocol.label(), error = %e, "Liveness check failed"),
            }
        }
    }

    fn any_running(&self) -> bool {
        self.services.iter().any(ServiceDescriptor::is_running)
    }

    /// SIGTERM every live worker, wait out the grace period, SIGKILL the rest
    pub async fn shutdown(&mut self) {
        self.refresh();
        self.shutting_down = true;
        info!("Stopping honeypots");

        for service in &self.services {
            if let (true, Some(process)) = (service.is_running(), service.process.as_ref()) {
                info!(service = service.protocol.label(), pid = process.pid, "Stopping honeypot");
                if let Err(e) = process.terminate() {
                    warn!(service = service.protocol.label(), error = %e, "Graceful stop failed");
                }
            }
        }

        let deadline = Instant::now() + self.options.grace;
        loop {
            self.refresh();
            if !self.any_running() || Instant::now() >= deadline {
                break;
            }
            sleep(Duration::from_millis(50).min(self.options.grace)).await;
        }

        for service in &mut self.services {
            if !service.is_running() {
                continue;
            }
            let Some(process) = service.process.as_mut() else {
                continue;
            };

            info!(service = service.protocol.label(), pid = process.pid, "Forcing honeypot stop");
            if let Err(e) = process.kill() {
                warn!(service = service.protocol.label(), error = %e, "Forced stop failed");
            }
            match process.wait() {
                Ok(exit) => service.last_exit = Some(exit),
                Err(e) => warn!(service = service.protocol.label(), error = %e, "Failed to reap worker"),
            }
            service.liveness = Liveness::Killed;
        }

        info!("All honeypots stopped");
    }

    /// Start, report status until SIGTERM/SIGINT, then shut down
    pub async fn run(self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        self.run_until(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        })
        .await
    }

    /// Control loop; `stop` resolving triggers the shutdown
    pub async fn run_until<F>(mut self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Starting configured honeypots");
        if self.start().await == 0 {
            warn!("No honeypot was started, check the configuration");
            return Ok(());
        }
        info!("All active honeypots started");

        let display = StatusDisplay::new();
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    self.refresh();
                    if let Err(e) = display.draw(&self.services) {
                        warn!(error = %e, "Failed to render status table");
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }
}
