// Configuration
// Flat JSON settings shared by the supervisor, the workers and the dashboard

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::ConfigError;

/// Default location of the settings file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/honeypot_config.json";

/// Complete settings object consumed by the supervisor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enable_ssh: bool,
    pub ssh_host: String,
    pub ssh_port: u16,
    /// Persistent host key (OpenSSH private key format)
    pub ssh_host_key: Option<PathBuf>,
    /// Generate a per-process key when no usable host key is configured
    pub ssh_ephemeral_host_key: bool,

    pub enable_ftp: bool,
    pub ftp_host: String,
    pub ftp_port: u16,
    /// Trap directory exposed to FTP clients
    pub ftp_root: PathBuf,
    /// Inclusive passive-mode port range
    pub ftp_passive_ports: (u16, u16),

    pub enable_http: bool,
    pub http_host: String,
    pub http_port: u16,

    #[serde(flatten)]
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_ssh: false,
            ssh_host: "0.0.0.0".to_string(),
            ssh_port: 2222,
            ssh_host_key: None,
            ssh_ephemeral_host_key: true,
            enable_ftp: false,
            ftp_host: "0.0.0.0".to_string(),
            ftp_port: 2121,
            ftp_root: PathBuf::from("ftp_trap_dir"),
            ftp_passive_ports: (60000, 60009),
            enable_http: false,
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings strictly: any problem is reported to the caller
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let settings: Settings =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (start, end) = self.ftp_passive_ports;
        if start > end {
            return Err(ConfigError::invalid(format!(
                "ftp_passive_ports range is inverted: {}-{}",
                start, end
            )));
        }
        if self.log.log_retention == 0 {
            return Err(ConfigError::invalid("log_retention must be at least 1"));
        }
        Ok(())
    }
}

/// The part of the settings the event logger needs
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    pub log_directory: PathBuf,
    pub log_file_prefix: String,
    /// Number of rotated segments kept per module
    pub log_retention: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_directory: PathBuf::from("logs"),
            log_file_prefix: "honeypot".to_string(),
            log_retention: 30,
        }
    }
}

impl LogSettings {
    /// Load log settings, falling back to defaults when the file is unusable
    pub fn load_or_default(path: &Path) -> Self {
        match Settings::load(path) {
            Ok(settings) => settings.log,
            Err(e) => {
                warn!(error = %e, "Using default log settings");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_flat_settings() {
        let file = write_config(
            r#"{
                "enable_ssh": true,
                "ssh_port": 2200,
                "enable_ftp": true,
                "ftp_root": "/srv/trap",
                "log_directory": "/var/log/hp",
                "log_file_prefix": "lab",
                "dashboard_port": 8501
            }"#,
        );

        let settings = Settings::load(file.path()).unwrap();
        assert!(settings.enable_ssh);
        assert_eq!(settings.ssh_port, 2200);
        assert_eq!(settings.ssh_host, "0.0.0.0");
        assert!(settings.enable_ftp);
        assert_eq!(settings.ftp_root, PathBuf::from("/srv/trap"));
        assert!(!settings.enable_http);
        assert_eq!(settings.http_port, 8080);
        assert_eq!(settings.log.log_directory, PathBuf::from("/var/log/hp"));
        assert_eq!(settings.log.log_file_prefix, "lab");
        assert_eq!(settings.log.log_retention, 30);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Settings::load(Path::new("/nonexistent/honeypot_config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config("{ enable_ssh: yes");
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn inverted_passive_range_is_invalid() {
        let file = write_config(r#"{ "ftp_passive_ports": [60010, 60000] }"#);
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn log_settings_fall_back_to_defaults() {
        let file = write_config("not json at all");
        assert_eq!(LogSettings::load_or_default(file.path()), LogSettings::default());
        assert_eq!(
            LogSettings::load_or_default(Path::new("/nonexistent.json")),
            LogSettings::default()
        );
    }
}
