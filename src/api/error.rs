use std::{io, time::Duration};

use peacefair_protocol::{DecodeError, InvalidArgument, SlaveAddress};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not resolve {addr}")]
    Resolve { addr: String },

    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error during exchange: {0}")]
    Io(#[from] io::Error),

    #[error("no response from slave {slave} after {attempts} attempt(s)")]
    NoResponse { slave: SlaveAddress, attempts: u32 },

    #[error("call did not complete within {0:?}")]
    CallTimeout(Duration),

    #[error("blocking worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
}

impl TransportError {
    /// Nothing (or nothing in time) came back from the device.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::NoResponse { .. }
            | TransportError::CallTimeout(_)
            | TransportError::ConnectTimeout { .. } => true,
            TransportError::Io(err) => is_timeout_kind(err),
            _ => false,
        }
    }

    /// The device answered, but not with something usable.
    pub fn is_decode(&self) -> bool {
        matches!(self, TransportError::Decode(_))
    }
}

pub(crate) fn is_timeout_kind(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
