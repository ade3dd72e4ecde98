//! Connection-string parsing into a [`DeviceTarget`] (spec §6).
//!
//! A serial device is any connection string that does not match the TCP
//! `IPv4:port` form; a TCP string must match `^([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+):([0-9]+)$`
//! with the port in `[1, 65535]`. Parsed once at construction, mirroring the
//! teacher's `BusAddr::from_byte` — callers hold a typed target, not a string
//! they re-parse at dial time.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::DeviceError;

fn tcp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+):([0-9]+)$").unwrap())
}

/// Where to dial: a serial port path/baud, or a TCP address/port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    Serial { path: String },
    Tcp { addr: Ipv4Addr, port: u16 },
}

/// Serial baud rate is fixed per spec §4.3.
pub const SERIAL_BAUD: u32 = 115_200;

impl DeviceTarget {
    /// Parse a connection string. Empty strings are rejected immediately
    /// (spec §6); everything else is TCP if it matches the `IPv4:port`
    /// regex with a port in `[1, 65535]`, serial otherwise.
    pub fn parse(conn: &str) -> Result<Self, DeviceError> {
        if conn.is_empty() {
            return Err(DeviceError::InvalidAddress(conn.to_string()));
        }
        if let Some(caps) = tcp_regex().captures(conn) {
            let ip_str = &caps[1];
            let port_str = &caps[2];
            let addr: Ipv4Addr = ip_str
                .parse()
                .map_err(|_| DeviceError::InvalidAddress(conn.to_string()))?;
            let port: u32 = port_str
                .parse()
                .map_err(|_| DeviceError::InvalidAddress(conn.to_string()))?;
            if port == 0 || port > 65535 {
                return Err(DeviceError::InvalidAddress(conn.to_string()));
            }
            return Ok(DeviceTarget::Tcp { addr, port: port as u16 });
        }
        Ok(DeviceTarget::Serial { path: conn.to_string() })
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, DeviceTarget::Serial { .. })
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Serial { path } => write!(f, "serial:{path}"),
            DeviceTarget::Tcp { addr, port } => write!(f, "tcp:{addr}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_form() {
        let t = DeviceTarget::parse("192.168.1.50:4242").unwrap();
        assert_eq!(
            t,
            DeviceTarget::Tcp { addr: "192.168.1.50".parse().unwrap(), port: 4242 }
        );
    }

    #[test]
    fn parses_serial_form() {
        let t = DeviceTarget::parse("/dev/ttyUSB0").unwrap();
        assert_eq!(t, DeviceTarget::Serial { path: "/dev/ttyUSB0".to_string() });
        assert!(t.is_serial());
    }

    #[test]
    fn com_port_is_serial() {
        let t = DeviceTarget::parse("COM3").unwrap();
        assert!(t.is_serial());
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            DeviceTarget::parse(""),
            Err(DeviceError::InvalidAddress(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(matches!(
            DeviceTarget::parse("10.0.0.1:0"),
            Err(DeviceError::InvalidAddress(_))
        ));
        assert!(matches!(
            DeviceTarget::parse("10.0.0.1:70000"),
            Err(DeviceError::InvalidAddress(_))
        ));
    }

    #[test]
    fn out_of_range_octets_are_an_address_error() {
        // Matches the dotted-quad:port shape but octets exceed 255 — spec §7
        // treats this as an address-format error, not a fallback to serial.
        assert!(matches!(
            DeviceTarget::parse("999.999.999.999:80"),
            Err(DeviceError::InvalidAddress(_))
        ));
    }
}
