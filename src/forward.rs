//! Forward requests, validated specs, and tracked forward records

use crate::error::{Endpoint, ForwardError};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::IpAddr;
use tokio::process::Child;

/// Raw, unvalidated form input for a new forward
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ForwardRequest {
    pub base_ip: String,
    pub base_port: String,
    pub remote_ip: String,
    pub remote_port: String,
}

impl ForwardRequest {
    pub fn new(
        base_ip: impl Into<String>,
        base_port: impl Into<String>,
        remote_ip: impl Into<String>,
        remote_port: impl Into<String>,
    ) -> Self {
        Self {
            base_ip: base_ip.into(),
            base_port: base_port.into(),
            remote_ip: remote_ip.into(),
            remote_port: remote_port.into(),
        }
    }

    /// Validate in order base IP, base port, remote IP, remote port.
    /// The first failure is returned.
    pub fn validate(&self) -> Result<ForwardSpec, ForwardError> {
        let base_ip = parse_ip(Endpoint::Base, &self.base_ip)?;
        let base_port = parse_port(Endpoint::Base, &self.base_port)?;
        let remote_ip = parse_ip(Endpoint::Remote, &self.remote_ip)?;
        let remote_port = parse_port(Endpoint::Remote, &self.remote_port)?;

        Ok(ForwardSpec {
            base_ip,
            base_port,
            remote_ip,
            remote_port,
        })
    }
}

fn parse_ip(endpoint: Endpoint, value: &str) -> Result<IpAddr, ForwardError> {
    value.parse().map_err(|_| ForwardError::InvalidIp {
        endpoint,
        value: value.to_string(),
    })
}

fn parse_port(endpoint: Endpoint, value: &str) -> Result<u16, ForwardError> {
    let port: i64 = value.parse().map_err(|_| ForwardError::PortNotNumber {
        endpoint,
        value: value.to_string(),
    })?;

    match u16::try_from(port) {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ForwardError::PortOutOfRange {
            endpoint,
            value: port,
        }),
    }
}

/// Validated endpoints of a forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForwardSpec {
    pub base_ip: IpAddr,
    pub base_port: u16,
    pub remote_ip: IpAddr,
    pub remote_port: u16,
}

impl ForwardSpec {
    /// Listen address for the forwarder: bind the base endpoint, reuse the
    /// address, fork a child per connection.
    pub fn listen_spec(&self) -> String {
        match self.base_ip {
            IpAddr::V4(ip) => format!("tcp4-listen:{},reuseaddr,bind={},fork", self.base_port, ip),
            IpAddr::V6(ip) => format!("tcp6-listen:{},reuseaddr,bind=[{}],fork", self.base_port, ip),
        }
    }

    /// Connect address for the forwarder
    pub fn target_spec(&self) -> String {
        match self.remote_ip {
            IpAddr::V4(ip) => format!("tcp4:{}:{}", ip, self.remote_port),
            IpAddr::V6(ip) => format!("tcp6:[{}]:{}", ip, self.remote_port),
        }
    }

    /// Event log details for a forward running as `pid`
    pub fn describe(&self, pid: u32) -> String {
        format!(
            "PID {} (Base: {}:{}, Remote: {}:{})",
            pid, self.base_ip, self.base_port, self.remote_ip, self.remote_port
        )
    }
}

/// A tracked forwarder process, owned exclusively by the supervisor.
///
/// The child sits behind its own mutex so the sweep can poll it for exit
/// while holding only the registry read lock.
pub struct ForwardRecord {
    pub(crate) id: String,
    pub(crate) spec: ForwardSpec,
    pub(crate) pid: u32,
    pub(crate) started_at: DateTime<Local>,
    pub(crate) child: Mutex<Child>,
}

impl ForwardRecord {
    pub fn describe(&self) -> String {
        self.spec.describe(self.pid)
    }

    pub fn info(&self) -> ForwardInfo {
        ForwardInfo {
            id: self.id.clone(),
            pid: self.pid,
            base_ip: self.spec.base_ip.to_string(),
            base_port: self.spec.base_port,
            remote_ip: self.spec.remote_ip.to_string(),
            remote_port: self.spec.remote_port,
            started_at: self.started_at,
        }
    }
}

/// Read-only view of a forward for rendering and the JSON API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardInfo {
    pub id: String,
    pub pid: u32,
    pub base_ip: String,
    pub base_port: u16,
    pub remote_ip: String,
    pub remote_port: u16,
    pub started_at: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(base_ip: &str, base_port: &str, remote_ip: &str, remote_port: &str) -> ForwardRequest {
        ForwardRequest::new(base_ip, base_port, remote_ip, remote_port)
    }

    #[test]
    fn test_valid_request() {
        let spec = request("127.0.0.1", "9000", "10.0.0.5", "22").validate().unwrap();
        assert_eq!(spec.base_ip.to_string(), "127.0.0.1");
        assert_eq!(spec.base_port, 9000);
        assert_eq!(spec.remote_ip.to_string(), "10.0.0.5");
        assert_eq!(spec.remote_port, 22);
    }

    #[test]
    fn test_invalid_ips_rejected() {
        for bad in ["", "localhost", "256.1.1.1", "1.2.3", "10.0.0.1; rm -rf /", " 10.0.0.1"] {
            let err = request(bad, "80", "10.0.0.1", "80").validate().unwrap_err();
            assert!(
                matches!(err, ForwardError::InvalidIp { endpoint: Endpoint::Base, .. }),
                "expected invalid base ip for {:?}",
                bad
            );

            let err = request("10.0.0.1", "80", bad, "80").validate().unwrap_err();
            assert!(matches!(err, ForwardError::InvalidIp { endpoint: Endpoint::Remote, .. }));
        }
    }

    #[test]
    fn test_port_boundaries() {
        assert!(request("127.0.0.1", "1", "127.0.0.1", "65535").validate().is_ok());

        let err = request("127.0.0.1", "0", "127.0.0.1", "80").validate().unwrap_err();
        assert!(matches!(err, ForwardError::PortOutOfRange { endpoint: Endpoint::Base, value: 0 }));

        let err = request("127.0.0.1", "80", "127.0.0.1", "65536").validate().unwrap_err();
        assert!(matches!(
            err,
            ForwardError::PortOutOfRange { endpoint: Endpoint::Remote, value: 65536 }
        ));

        let err = request("127.0.0.1", "-1", "127.0.0.1", "80").validate().unwrap_err();
        assert!(matches!(err, ForwardError::PortOutOfRange { value: -1, .. }));
    }

    #[test]
    fn test_non_numeric_ports_rejected() {
        for bad in ["", "http", "80a", "8.0", " 80"] {
            let err = request("127.0.0.1", bad, "127.0.0.1", "80").validate().unwrap_err();
            assert!(
                matches!(err, ForwardError::PortNotNumber { endpoint: Endpoint::Base, .. }),
                "expected non-numeric base port for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_first_failure_wins() {
        let err = request("bad", "bad", "bad", "bad").validate().unwrap_err();
        assert!(matches!(err, ForwardError::InvalidIp { endpoint: Endpoint::Base, .. }));

        let err = request("127.0.0.1", "0", "bad", "bad").validate().unwrap_err();
        assert!(matches!(err, ForwardError::PortOutOfRange { endpoint: Endpoint::Base, .. }));

        let err = request("127.0.0.1", "80", "bad", "0").validate().unwrap_err();
        assert!(matches!(err, ForwardError::InvalidIp { endpoint: Endpoint::Remote, .. }));
    }

    #[test]
    fn test_ports_are_canonicalized() {
        let spec = request("127.0.0.1", "0080", "127.0.0.1", "+22").validate().unwrap();
        assert_eq!(spec.base_port, 80);
        assert_eq!(spec.remote_port, 22);
        assert_eq!(spec.listen_spec(), "tcp4-listen:80,reuseaddr,bind=127.0.0.1,fork");
    }

    #[test]
    fn test_ipv4_specs() {
        let spec = request("127.0.0.1", "9000", "10.0.0.5", "22").validate().unwrap();
        assert_eq!(spec.listen_spec(), "tcp4-listen:9000,reuseaddr,bind=127.0.0.1,fork");
        assert_eq!(spec.target_spec(), "tcp4:10.0.0.5:22");
    }

    #[test]
    fn test_ipv6_specs() {
        let spec = request("::1", "9000", "fe80:0:0:0:0:0:0:1", "22").validate().unwrap();
        assert_eq!(spec.listen_spec(), "tcp6-listen:9000,reuseaddr,bind=[::1],fork");
        assert_eq!(spec.target_spec(), "tcp6:[fe80::1]:22");
    }

    #[test]
    fn test_describe() {
        let spec = request("127.0.0.1", "9000", "10.0.0.5", "22").validate().unwrap();
        assert_eq!(
            spec.describe(1234),
            "PID 1234 (Base: 127.0.0.1:9000, Remote: 10.0.0.5:22)"
        );
    }
}
