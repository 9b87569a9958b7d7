// Honeypot Lab
// Decoy SSH, FTP and HTTP services, each in its own worker process under a supervisor

pub mod config;
pub mod error;
pub mod events;
pub mod honeypot;
pub mod supervisor;
pub mod worker;

pub use config::{LogSettings, Settings, DEFAULT_CONFIG_PATH};
pub use error::{ConfigError, ProcessError, ServiceError};
pub use events::{get_logger, EventLogger, Fields, Level};
pub use honeypot::traits::{BindAddr, HoneypotService, Protocol};
pub use supervisor::{ServiceDescriptor, Supervisor, SupervisorOptions};
pub use worker::{build_service, run_worker, WorkerSpec};
