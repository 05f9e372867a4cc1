//! Observer hooks for meter activity
//!
//! The meter never logs through process-wide state of its own; everything it
//! has to report goes through the hooks injected at construction. With no
//! hook configured, [`LoggingHook`] forwards to the `log` facade.

use anyhow::Result;
use log::Level;

use peacefair_protocol::{Ack, DecodeError, ExceptionCode, RequestKind, SlaveAddress};

use super::{error::TransportError, reading::Reading};

pub trait MeterHook: Send + Sync {
    /// Called right before a request is handed to the session.
    ///
    /// An error is logged and otherwise ignored; it never cancels the request.
    fn on_before_request(&self, _slave: SlaveAddress, _request: RequestKind) -> Result<()> {
        Ok(())
    }

    fn on_reading(&self, _slave: SlaveAddress, _reading: &Reading) {}

    /// A gather produced nothing usable. The caller still gets an empty
    /// reading; this is the only place the failure is visible.
    fn on_gather_failed(&self, _slave: SlaveAddress, _error: &TransportError) {}

    fn on_reset_energy(&self, _ack: &Ack) {}

    /// A failure that is also returned to the caller (connect, close, reset).
    fn on_error(&self, _slave: SlaveAddress, _error: &TransportError) {}
}

/// Hook that does nothing (useful for testing)
pub struct NoOpHook;

impl MeterHook for NoOpHook {}

/// Hook that reports through the `log` facade
pub struct LoggingHook;

impl LoggingHook {
    /// Level a failed gather is logged at: `Warn` when the device was
    /// silent or answered with something unusable, `Error` when the link
    /// itself failed.
    pub fn gather_failure_level(error: &TransportError) -> Level {
        if error.is_timeout() || error.is_decode() {
            Level::Warn
        } else {
            Level::Error
        }
    }
}

impl MeterHook for LoggingHook {
    fn on_reading(&self, slave: SlaveAddress, reading: &Reading) {
        log::debug!("Slave {slave} reading: {reading}");
    }

    fn on_gather_failed(&self, slave: SlaveAddress, error: &TransportError) {
        let level = Self::gather_failure_level(error);
        match error {
            TransportError::Decode(DecodeError::ExceptionResponse { code, .. }) => {
                log::log!(
                    level,
                    "Error in gathering from slave {slave}, device answered {}",
                    ExceptionCode::describe(*code)
                );
            }
            err if level == Level::Warn => {
                log::log!(level, "Error in gathering from slave {slave}, no usable data: {err}");
            }
            err => log::log!(level, "Error in gathering from slave {slave}: {err}"),
        }
    }

    fn on_reset_energy(&self, ack: &Ack) {
        log::info!("Energy counter of slave {} reset", ack.slave);
    }

    fn on_error(&self, slave: SlaveAddress, error: &TransportError) {
        log::error!("Slave {slave}: {error}");
    }
}
