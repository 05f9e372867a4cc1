pub mod config;
pub mod error;
pub mod link;
pub mod meter;
pub mod reading;
pub mod session;
pub mod traits;

use std::{sync::Arc, time::Duration};

use peacefair_protocol::{InvalidArgument, SlaveAddress};

pub use config::{
    ConfigError, MeterConfig, Protocol, TransportConfig, DEFAULT_TIMEOUT, MAX_TIMEOUT,
};
pub use error::TransportError;
pub use link::{open_link, Link, LinkOpener, TcpLink, UdpLink};
pub use meter::PowerMeter;
pub use reading::{MeasurementKind, Reading, METERING_REGISTERS, METERING_START};
pub use session::{Session, SessionGuard};
pub use traits::{LoggingHook, MeterHook, NoOpHook};

/// Builder for a [`PowerMeter`].
///
/// # Middleware Pattern
///
/// Hooks added with `.add_hook()` are all called, in the order they were
/// added. Without any hook the meter reports through [`LoggingHook`].
///
/// # Example
///
/// ```no_run
/// use peacefair::{MeterBuilder, Protocol, MeasurementKind};
///
/// let meter = MeterBuilder::new(Protocol::RtuOverTcp, "192.168.1.20", 8899)
///     .with_slave(1)
///     .build()?;
/// meter.connect()?;
/// let reading = meter.gather_reading();
/// println!("{:?}", reading.get(MeasurementKind::Voltage));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct MeterBuilder {
    config: TransportConfig,
    slave: u8,
    hooks: Vec<Arc<dyn MeterHook>>,
    opener: Option<Arc<LinkOpener>>,
}

impl MeterBuilder {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            config: TransportConfig::new(protocol, host, port),
            slave: 1,
            hooks: Vec::new(),
            opener: None,
        }
    }

    pub fn from_config(config: &MeterConfig) -> Self {
        Self {
            config: config.transport.clone(),
            slave: config.slave,
            hooks: Vec::new(),
            opener: None,
        }
    }

    /// Set the RTU station address (default 1).
    pub fn with_slave(mut self, slave: u8) -> Self {
        self.slave = slave;
        self
    }

    /// Set the per-exchange timeout (default 2 s, at most one hour).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_timeout(timeout);
        self
    }

    /// Add a hook to the chain (can be called multiple times)
    pub fn add_hook(mut self, hook: Arc<dyn MeterHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Replace the socket factory, e.g. with an in-memory link.
    pub fn with_opener(mut self, opener: Arc<LinkOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn build(self) -> Result<PowerMeter, InvalidArgument> {
        let slave = SlaveAddress::new(self.slave)?;
        let session = match self.opener {
            Some(opener) => Session::with_opener(self.config, slave, opener),
            None => Session::new(self.config, slave),
        };

        let hooks = if self.hooks.is_empty() {
            vec![Arc::new(LoggingHook) as Arc<dyn MeterHook>]
        } else {
            self.hooks
        };

        Ok(PowerMeter::new(session, hooks))
    }
}
