use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;

use peacefair_protocol::{
    encode_read_input_registers, encode_reset_energy, Ack, DecodeError, EncodedFrame,
    RegisterBlock, SlaveAddress,
};

use super::{
    error::TransportError,
    reading::{Reading, METERING_REGISTERS, METERING_START},
    session::Session,
    traits::MeterHook,
};

/// Application view of a Peacefair energy meter on top of a [`Session`].
///
/// Cloning is cheap; all clones share the session and therefore its gate.
#[derive(Clone)]
pub struct PowerMeter {
    session: Session,
    hooks: Arc<[Arc<dyn MeterHook>]>,
}

impl PowerMeter {
    pub fn new(session: Session, hooks: Vec<Arc<dyn MeterHook>>) -> Self {
        Self {
            session,
            hooks: hooks.into(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn slave(&self) -> SlaveAddress {
        self.session.slave()
    }

    pub fn connect(&self) -> Result<(), TransportError> {
        self.connect_gated(|| {})
    }

    pub fn close(&self) -> Result<(), TransportError> {
        self.close_gated(|| {})
    }

    /// Read and scale the metering block.
    ///
    /// Never fails: any problem is reported to the hooks and an empty
    /// reading is returned, so a polling loop survives bus noise.
    pub fn gather_reading(&self) -> Reading {
        self.gather_gated(|| {})
    }

    /// Clear the accumulated energy counter. Failures are returned.
    pub fn reset_energy(&self) -> Result<Ack, TransportError> {
        self.reset_energy_gated(|| {})
    }

    /// [`PowerMeter::gather_reading`] on the blocking pool.
    ///
    /// The call budget starts once the session gate is held, so time spent
    /// queued behind other callers is not charged. If the exchange outlives
    /// its budget the caller gets an empty reading; the exchange itself
    /// finishes in the background and releases the gate.
    pub async fn gather_reading_async(&self) -> Reading {
        let meter = self.clone();
        let job = move |gate: GateSignal| meter.gather_gated(gate.into_callback());
        match run_gated(self.call_budget(), job).await {
            Ok(reading) => reading,
            Err(err) => {
                self.report_gather_failed(&err);
                Reading::default()
            }
        }
    }

    pub async fn reset_energy_async(&self) -> Result<Ack, TransportError> {
        let meter = self.clone();
        let job = move |gate: GateSignal| meter.reset_energy_gated(gate.into_callback());
        run_gated(self.call_budget(), job)
            .await
            .inspect_err(|err| self.report_error(err))?
    }

    pub async fn connect_async(&self) -> Result<(), TransportError> {
        let meter = self.clone();
        let job = move |gate: GateSignal| meter.connect_gated(gate.into_callback());
        run_gated(self.call_budget(), job)
            .await
            .inspect_err(|err| self.report_error(err))?
    }

    pub async fn close_async(&self) -> Result<(), TransportError> {
        let meter = self.clone();
        let job = move |gate: GateSignal| meter.close_gated(gate.into_callback());
        run_gated(self.call_budget(), job)
            .await
            .inspect_err(|err| self.report_error(err))?
    }

    fn call_budget(&self) -> Duration {
        self.session.config().call_budget()
    }

    // `on_gate` runs right after the session gate is taken.

    fn connect_gated(&self, on_gate: impl FnOnce()) -> Result<(), TransportError> {
        let result = {
            let mut gate = self.session.lock();
            on_gate();
            gate.connect()
        };
        result.inspect_err(|err| self.report_error(err))
    }

    fn close_gated(&self, on_gate: impl FnOnce()) -> Result<(), TransportError> {
        let result = {
            let mut gate = self.session.lock();
            on_gate();
            gate.close()
        };
        result.inspect_err(|err| self.report_error(err))
    }

    fn gather_gated(&self, on_gate: impl FnOnce()) -> Reading {
        let outcome = self.read_metering_block(on_gate).and_then(|block| {
            Reading::from_registers(block.as_slice()).ok_or_else(|| {
                TransportError::Decode(DecodeError::RegisterCountMismatch {
                    expected: METERING_REGISTERS,
                    actual: block.len() as u16,
                })
            })
        });

        match outcome {
            Ok(reading) => {
                for hook in self.hooks.iter() {
                    hook.on_reading(self.slave(), &reading);
                }
                reading
            }
            Err(err) => {
                self.report_gather_failed(&err);
                Reading::default()
            }
        }
    }

    fn reset_energy_gated(&self, on_gate: impl FnOnce()) -> Result<Ack, TransportError> {
        let request = encode_reset_energy(self.slave());
        self.before_request(&request);

        let result = {
            let mut gate = self.session.lock();
            on_gate();
            gate.execute(&request)
        };
        match result {
            Ok(ack) => {
                for hook in self.hooks.iter() {
                    hook.on_reset_energy(&ack);
                }
                Ok(ack)
            }
            Err(err) => {
                self.report_error(&err);
                Err(err)
            }
        }
    }

    fn read_metering_block(
        &self,
        on_gate: impl FnOnce(),
    ) -> Result<RegisterBlock, TransportError> {
        let request =
            encode_read_input_registers(self.slave(), METERING_START, METERING_REGISTERS)?;
        self.before_request(&request);

        let mut gate = self.session.lock();
        on_gate();
        gate.query(&request)
    }

    fn before_request(&self, request: &EncodedFrame) {
        for hook in self.hooks.iter() {
            if let Err(err) = hook.on_before_request(self.slave(), request.kind()) {
                log::warn!("Hook on_before_request failed: {err}");
            }
        }
    }

    fn report_gather_failed(&self, err: &TransportError) {
        for hook in self.hooks.iter() {
            hook.on_gather_failed(self.slave(), err);
        }
    }

    fn report_error(&self, err: &TransportError) {
        for hook in self.hooks.iter() {
            hook.on_error(self.slave(), err);
        }
    }
}

impl std::fmt::Debug for PowerMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerMeter")
            .field("session", &self.session)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Sent by a blocking job once it holds the session gate.
struct GateSignal(oneshot::Sender<()>);

impl GateSignal {
    fn into_callback(self) -> impl FnOnce() {
        move || {
            let _ = self.0.send(());
        }
    }
}

/// Run `job` on tokio's blocking pool. The wait is unbounded until the job
/// reports that it holds the gate, then bounded by `budget`.
async fn run_gated<T, F>(budget: Duration, job: F) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce(GateSignal) -> T + Send + 'static,
{
    let (acquired_tx, acquired_rx) = oneshot::channel();
    let mut handle = tokio::task::spawn_blocking(move || job(GateSignal(acquired_tx)));

    // A dropped sender means the job ended before reaching the gate; its
    // result is collected below.
    let _ = acquired_rx.await;

    match tokio::time::timeout(budget, &mut handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => Err(TransportError::Worker(join_err.to_string())),
        Err(_) => Err(TransportError::CallTimeout(budget)),
    }
}
