use parking_lot::{Mutex, MutexGuard};
use std::{fmt, sync::Arc};

use peacefair_protocol::{
    Ack, DecodeError, EncodedFrame, InvalidArgument, RegisterBlock, RequestKind, SlaveAddress,
};

use super::{
    config::TransportConfig,
    error::TransportError,
    link::{open_link, Link, LinkOpener},
};

/// The one connection to one meter.
///
/// Every exchange (request write plus response read) happens while holding
/// the session's gate, so callers sharing a session, or any of its clones,
/// never interleave bytes on the wire. The gate is a scoped guard and is
/// released on every exit path.
#[derive(Clone)]
pub struct Session {
    config: Arc<TransportConfig>,
    slave: SlaveAddress,
    port: Arc<Mutex<Option<Box<dyn Link>>>>,
    opener: Arc<LinkOpener>,
}

impl Session {
    pub fn new(config: TransportConfig, slave: SlaveAddress) -> Self {
        Self::with_opener(config, slave, Arc::new(open_link))
    }

    /// Like [`Session::new`], with a custom link factory.
    pub fn with_opener(
        config: TransportConfig,
        slave: SlaveAddress,
        opener: Arc<LinkOpener>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            slave,
            port: Arc::new(Mutex::new(None)),
            opener,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn slave(&self) -> SlaveAddress {
        self.slave
    }

    pub fn is_connected(&self) -> bool {
        self.port.lock().is_some()
    }

    /// Take the gate. Everything done through the returned guard is one
    /// uninterrupted sequence on the wire; other callers wait until it drops.
    pub fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self,
            port: self.port.lock(),
        }
    }

    /// Open the socket. Does nothing if already connected.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.lock().connect()
    }

    /// Release the socket. Safe to call when never connected.
    pub fn close(&self) -> Result<(), TransportError> {
        self.lock().close()
    }

    /// Read registers with a frame built by `encode_read_input_registers`.
    pub fn query(&self, request: &EncodedFrame) -> Result<RegisterBlock, TransportError> {
        self.lock().query(request)
    }

    /// Run a command that is answered with a bare acknowledgment.
    pub fn execute(&self, request: &EncodedFrame) -> Result<Ack, TransportError> {
        self.lock().execute(request)
    }

    fn open(&self) -> Result<Box<dyn Link>, TransportError> {
        log::info!(
            "Connecting to {} over {}",
            self.config.address(),
            self.config.protocol
        );
        (self.opener)(self.config())
    }

    fn exchange<T>(
        &self,
        port: &mut Option<Box<dyn Link>>,
        request: &EncodedFrame,
        decode: impl FnOnce(&[u8]) -> Result<T, DecodeError>,
    ) -> Result<T, TransportError> {
        let link = match &mut *port {
            Some(link) => link,
            empty => empty.insert(self.open()?),
        };

        let response = match self.round_trip(&mut **link, request) {
            Ok(response) => response,
            Err(err) => {
                if let TransportError::Io(io_err) = &err {
                    log::warn!(
                        "Dropping link to {} after I/O error: {io_err}",
                        self.config.address()
                    );
                    *port = None;
                }
                return Err(err);
            }
        };

        decode(&response).map_err(|err| {
            log::debug!("Rejected response {response:02x?}: {err}");
            TransportError::from(err)
        })
    }

    fn round_trip(
        &self,
        link: &mut dyn Link,
        request: &EncodedFrame,
    ) -> Result<Vec<u8>, TransportError> {
        let attempts = self.config.protocol.attempts();
        for attempt in 1..=attempts {
            log::trace!("-> slave {} {}: {:02x?}", self.slave, request.kind(), request.as_bytes());
            link.send(request.as_bytes())?;

            let response = link.recv_frame(request.kind())?;
            if !response.is_empty() {
                log::trace!("<- slave {}: {response:02x?}", self.slave);
                return Ok(response);
            }
            log::debug!(
                "Empty response from slave {} to {} (attempt {attempt}/{attempts})",
                self.slave,
                request.kind()
            );
        }

        Err(TransportError::NoResponse {
            slave: self.slave,
            attempts,
        })
    }
}

/// Held gate of a [`Session`], see [`Session::lock`].
pub struct SessionGuard<'a> {
    session: &'a Session,
    port: MutexGuard<'a, Option<Box<dyn Link>>>,
}

impl SessionGuard<'_> {
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.port.is_none() {
            *self.port = Some(self.session.open()?);
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut link) = self.port.take() {
            log::info!("Closing link to {}", self.session.config.address());
            link.shutdown()?;
        }
        Ok(())
    }

    pub fn query(&mut self, request: &EncodedFrame) -> Result<RegisterBlock, TransportError> {
        match request.kind() {
            RequestKind::ReadInputRegisters { .. } => self
                .session
                .exchange(&mut self.port, request, |response| {
                    request.decode_registers(response)
                }),
            other => Err(InvalidArgument::RequestKind {
                operation: "query",
                kind: other.name(),
            }
            .into()),
        }
    }

    pub fn execute(&mut self, request: &EncodedFrame) -> Result<Ack, TransportError> {
        match request.kind() {
            RequestKind::ResetEnergy => self
                .session
                .exchange(&mut self.port, request, |response| request.decode_ack(response)),
            other => Err(InvalidArgument::RequestKind {
                operation: "execute",
                kind: other.name(),
            }
            .into()),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("slave", &self.slave)
            .field("connected", &self.port.try_lock().map(|port| port.is_some()))
            .finish()
    }
}
