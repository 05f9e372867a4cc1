use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

use peacefair_protocol::{InvalidArgument, SlaveAddress};

/// Fixed per-exchange timeout of the meter link.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
/// Longest per-exchange timeout accepted; larger values are clamped.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// How RTU frames are tunnelled to the meter's network adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Protocol {
    /// RTU framing over a TCP byte stream
    #[serde(rename = "rtuovertcp", alias = "tcp")]
    #[strum(to_string = "rtuovertcp", serialize = "tcp")]
    RtuOverTcp,
    /// RTU framing over UDP datagrams, one frame per datagram
    #[serde(rename = "rtuoverudp", alias = "udp")]
    #[strum(to_string = "rtuoverudp", serialize = "udp")]
    RtuOverUdp,
}

impl Protocol {
    /// Extra attempts made when the device answers with nothing at all.
    ///
    /// TCP adapters are known to swallow bytes on idle links, so the request
    /// is re-sent once. UDP is never retried: a duplicated datagram could be
    /// executed twice by the meter.
    pub fn retries_on_empty(self) -> u32 {
        match self {
            Protocol::RtuOverTcp => 1,
            Protocol::RtuOverUdp => 0,
        }
    }

    pub fn attempts(self) -> u32 {
        1 + self.retries_on_empty()
    }
}

/// Where and how to reach the meter. Immutable once a session owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    #[serde(rename = "timeout_secs", with = "timeout_secs", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl TransportConfig {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-exchange timeout, clamped to [`MAX_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(MAX_TIMEOUT);
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Longest a caller should wait for one call: a connect plus every
    /// attempt the retry policy allows.
    pub fn call_budget(&self) -> Duration {
        self.timeout
            .checked_mul(self.protocol.attempts() + 1)
            .unwrap_or(Duration::MAX)
    }
}

/// Everything needed to construct a meter, as stored by the host.
///
/// ```toml
/// protocol = "rtuovertcp"
/// host = "192.168.1.20"
/// port = 8899
/// slave = 1
/// timeout_secs = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,
    pub slave: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse meter configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
}

impl MeterConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.slave_address()?;
        Ok(config)
    }

    pub fn slave_address(&self) -> Result<SlaveAddress, InvalidArgument> {
        SlaveAddress::new(self.slave)
    }
}

mod timeout_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(timeout: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(timeout.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        let timeout = Duration::try_from_secs_f64(secs).map_err(D::Error::custom)?;
        if timeout.is_zero() {
            return Err(D::Error::custom("timeout must be greater than zero"));
        }
        if timeout > super::MAX_TIMEOUT {
            return Err(D::Error::custom(format!(
                "timeout must not exceed {} seconds",
                super::MAX_TIMEOUT.as_secs()
            )));
        }
        Ok(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_protocol_names() {
        assert_eq!(Protocol::RtuOverTcp.to_string(), "rtuovertcp");
        assert_eq!(Protocol::from_str("udp").unwrap(), Protocol::RtuOverUdp);
        assert_eq!(Protocol::from_str("rtuovertcp").unwrap(), Protocol::RtuOverTcp);
        assert!(Protocol::from_str("rtu").is_err());
    }

    #[test]
    fn test_retry_policy_is_asymmetric() {
        assert_eq!(Protocol::RtuOverTcp.attempts(), 2);
        assert_eq!(Protocol::RtuOverUdp.attempts(), 1);
    }

    #[test]
    fn test_meter_config_from_toml() {
        let config = MeterConfig::from_toml_str(
            r#"
            protocol = "rtuoverudp"
            host = "10.0.0.7"
            port = 502
            slave = 3
            timeout_secs = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.protocol, Protocol::RtuOverUdp);
        assert_eq!(config.transport.address(), "10.0.0.7:502");
        assert_eq!(config.transport.timeout, Duration::from_millis(500));
        assert_eq!(config.slave_address().unwrap().get(), 3);
    }

    #[test]
    fn test_meter_config_defaults_and_validation() {
        let config =
            MeterConfig::from_toml_str("protocol = \"tcp\"\nhost = \"meter\"\nport = 8899\nslave = 1")
                .unwrap();
        assert_eq!(config.transport.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.transport.protocol, Protocol::RtuOverTcp);

        let err = MeterConfig::from_toml_str(
            "protocol = \"tcp\"\nhost = \"meter\"\nport = 8899\nslave = 250",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidArgument(InvalidArgument::SlaveAddress(250))
        ));

        assert!(MeterConfig::from_toml_str(
            "protocol = \"serial\"\nhost = \"meter\"\nport = 8899\nslave = 1"
        )
        .is_err());
    }

    #[test]
    fn test_address_and_budget() {
        let config = TransportConfig::new(Protocol::RtuOverTcp, "::1", 8899);
        assert_eq!(config.address(), "[::1]:8899");
        assert_eq!(config.call_budget(), Duration::from_secs(6));

        let udp = TransportConfig::new(Protocol::RtuOverUdp, "meter", 1)
            .with_timeout(Duration::from_millis(100));
        assert_eq!(udp.call_budget(), Duration::from_millis(200));
    }

    #[test]
    fn test_huge_timeouts_are_bounded() {
        let clamped = TransportConfig::new(Protocol::RtuOverTcp, "meter", 1)
            .with_timeout(Duration::from_secs(u64::MAX / 2));
        assert_eq!(clamped.timeout, MAX_TIMEOUT);
        assert_eq!(clamped.call_budget(), MAX_TIMEOUT * 3);

        // the field is public, so the budget must not overflow either
        let mut raw = TransportConfig::new(Protocol::RtuOverUdp, "meter", 1);
        raw.timeout = Duration::MAX;
        assert_eq!(raw.call_budget(), Duration::MAX);

        let err = MeterConfig::from_toml_str(
            "protocol = \"udp\"\nhost = \"meter\"\nport = 1\nslave = 1\ntimeout_secs = 1e19",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        assert!(MeterConfig::from_toml_str(
            "protocol = \"udp\"\nhost = \"meter\"\nport = 1\nslave = 1\ntimeout_secs = 3600"
        )
        .is_ok());
    }
}
