// Honeypot service implementations
// Each protocol (SSH, FTP, HTTP) implements the HoneypotService trait

pub mod traits;

#[cfg(feature = "ssh")]
pub mod ssh;

#[cfg(feature = "ftp")]
pub mod ftp;

#[cfg(feature = "http")]
pub mod http;
