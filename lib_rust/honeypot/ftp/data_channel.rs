// FTP Data Channel Management
// PASV listeners restricted to a fixed port range; PORT targets are never dialled

use anyhow::{anyhow, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use tokio::net::TcpListener;

/// Inclusive range of ports PASV may bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassivePorts(RangeInclusive<u16>);

impl PassivePorts {
    pub fn new(first: u16, last: u16) -> Self {
        Self(first..=last)
    }

    fn iter(&self) -> impl Iterator<Item = u16> {
        self.0.clone()
    }
}

impl Default for PassivePorts {
    fn default() -> Self {
        Self::new(60000, 60009)
    }
}

/// Data channel manager
///
/// Holds the PASV listener so the advertised port stays reserved. It is
/// dropped on the next reset without ever accepting.
pub struct DataChannelManager {
    passive_listener: Option<TcpListener>,
}

impl DataChannelManager {
    /// Create a new data channel manager
    pub fn new() -> Self {
        Self {
            passive_listener: None,
        }
    }

    /// Enter passive mode (PASV command)
    ///
    /// Binds the first free port of `ports` on `ip`. Fails when the whole
    /// range is taken.
    pub async fn enter_passive_mode(&mut self, ip: IpAddr, ports: &PassivePorts) -> Result<SocketAddr> {
        self.reset();

        for port in ports.iter() {
            if let Ok(listener) = TcpListener::bind(SocketAddr::new(ip, port)).await {
                let addr = listener.local_addr()?;
                self.passive_listener = Some(listener);
                return Ok(addr);
            }
        }

        Err(anyhow!("No free passive port available"))
    }

    /// Reset the data channel
    pub fn reset(&mut self) {
        self.passive_listener = None;
    }
}

impl Default for DataChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse PORT command argument
/// Format: h1,h2,h3,h4,p1,p2 where IP = h1.h2.h3.h4 and port = p1*256+p2
pub fn parse_port_address(arg: &str) -> Result<SocketAddr> {
    let parts: Vec<&str> = arg.split(',').map(str::trim).collect();
    if parts.len() != 6 {
        return Err(anyhow!("Invalid PORT format"));
    }

    let octets = parts[0..4]
        .iter()
        .map(|s| s.parse::<u8>().map_err(|_| anyhow!("Invalid IP octet")))
        .collect::<Result<Vec<u8>>>()?;

    let p1 = parts[4].parse::<u8>().map_err(|_| anyhow!("Invalid port"))?;
    let p2 = parts[5].parse::<u8>().map_err(|_| anyhow!("Invalid port"))?;
    let port = u16::from(p1) * 256 + u16::from(p2);

    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    Ok(SocketAddr::from((ip, port)))
}

/// Format address for PASV response
/// Returns: h1,h2,h3,h4,p1,p2
pub fn format_pasv_response(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(|v4| v4.octets())
            .unwrap_or([127, 0, 0, 1]),
    };

    let port = addr.port();
    let p1 = port / 256;
    let p2 = port % 256;

    format!("{},{},{},{},{},{}", ip[0], ip[1], ip[2], ip[3], p1, p2)
}
