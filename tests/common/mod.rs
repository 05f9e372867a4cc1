//! Shared fixtures for integration tests: scripted in-memory meters, real
//! loopback meters and a hook that records what it was told.
#![allow(dead_code)]

use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{TcpListener, UdpSocket},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use peacefair::{
    protocol::{crc16, Ack, RequestKind, SlaveAddress},
    Link, LinkOpener, MeterHook, Reading, TransportConfig, TransportError,
};

/// Registers of a meter on a household load: 230.0 V, 1.000 A, 150.0 W,
/// 5.000 kWh, 50.0 Hz, power factor 0.95.
pub const SCENARIO: [u16; 9] = [2300, 1000, 0, 1500, 0, 5000, 0, 500, 95];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

pub fn read_response(slave: u8, registers: &[u16]) -> Vec<u8> {
    let mut frame = vec![slave, 0x04, (registers.len() * 2) as u8];
    for value in registers {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    with_crc(frame)
}

pub fn exception_response(slave: u8, function: u8, code: u8) -> Vec<u8> {
    with_crc(vec![slave, function | 0x80, code])
}

/// What a healthy meter answers to `request`.
pub fn answer(request: &[u8], registers: &[u16]) -> Vec<u8> {
    match request {
        [slave, 0x04, ..] => read_response(*slave, registers),
        [_, 0x42, ..] => request.to_vec(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sent(Vec<u8>),
    Received(Vec<u8>),
    Failed,
}

/// One scripted answer. Once the script runs dry the device answers
/// like a healthy meter.
#[derive(Debug, Clone)]
pub enum Reply {
    Frame(Vec<u8>),
    Silent,
    Fail(io::ErrorKind),
}

/// In-memory meter shared by every link opened against it.
pub struct MockDevice {
    registers: Vec<u16>,
    delay: Duration,
    script: Mutex<VecDeque<Reply>>,
    events: Mutex<Vec<Event>>,
    opened: AtomicUsize,
}

impl MockDevice {
    pub fn new(registers: &[u16]) -> Arc<Self> {
        Self::slow(registers, Duration::ZERO)
    }

    /// A device that takes `delay` to answer each request.
    pub fn slow(registers: &[u16], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            registers: registers.to_vec(),
            delay,
            script: Mutex::new(VecDeque::new()),
            events: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Sent(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn opener(self: &Arc<Self>) -> Arc<LinkOpener> {
        let device = Arc::clone(self);
        Arc::new(
            move |_config: &TransportConfig| -> Result<Box<dyn Link>, TransportError> {
                device.opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockLink {
                    device: Arc::clone(&device),
                    pending: None,
                }))
            },
        )
    }
}

struct MockLink {
    device: Arc<MockDevice>,
    pending: Option<Vec<u8>>,
}

impl Link for MockLink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.device.events.lock().push(Event::Sent(frame.to_vec()));
        self.pending = Some(frame.to_vec());
        Ok(())
    }

    fn recv_frame(&mut self, _kind: RequestKind) -> io::Result<Vec<u8>> {
        if !self.device.delay.is_zero() {
            thread::sleep(self.device.delay);
        }
        let request = self.pending.take().unwrap_or_default();
        let reply = self.device.script.lock().pop_front();

        let result = match reply {
            Some(Reply::Frame(frame)) => Ok(frame),
            Some(Reply::Silent) => Ok(Vec::new()),
            Some(Reply::Fail(kind)) => Err(io::Error::from(kind)),
            None => Ok(answer(&request, &self.device.registers)),
        };

        let event = match &result {
            Ok(frame) => Event::Received(frame.clone()),
            Err(_) => Event::Failed,
        };
        self.device.events.lock().push(event);
        result
    }
}

/// Every request was answered before the next one went out.
pub fn assert_alternating(events: &[Event]) {
    assert_eq!(events.len() % 2, 0, "unpaired events: {events:?}");
    for pair in events.chunks(2) {
        assert!(
            matches!(pair, [Event::Sent(_), Event::Received(_) | Event::Failed]),
            "interleaved exchange: {pair:?}"
        );
    }
}

/// A meter on a loopback TCP port. It accepts one connection, ignores the
/// first `ignore_first` requests and answers the rest. The handle yields
/// the number of requests seen once the client hangs up.
pub fn spawn_tcp_meter(
    registers: &[u16],
    ignore_first: usize,
) -> anyhow::Result<(u16, thread::JoinHandle<usize>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let registers = registers.to_vec();

    let handle = thread::spawn(move || {
        let mut served = 0;
        let Ok((mut stream, _)) = listener.accept() else {
            return served;
        };
        while let Some(request) = read_request(&mut stream) {
            served += 1;
            if served <= ignore_first {
                continue;
            }
            if stream.write_all(&answer(&request, &registers)).is_err() {
                break;
            }
        }
        served
    });

    Ok((port, handle))
}

fn read_request(stream: &mut impl Read) -> Option<Vec<u8>> {
    let mut frame = vec![0u8; 2];
    stream.read_exact(&mut frame).ok()?;
    let remaining = if frame[1] == 0x04 { 6 } else { 2 };
    frame.resize(2 + remaining, 0);
    stream.read_exact(&mut frame[2..]).ok()?;
    Some(frame)
}

/// Same as [`spawn_tcp_meter`] over UDP. The meter exits after two
/// seconds without traffic.
pub fn spawn_udp_meter(
    registers: &[u16],
    ignore_first: usize,
) -> anyhow::Result<(u16, thread::JoinHandle<usize>)> {
    let socket = UdpSocket::bind("127.0.0.1:0")?;
    socket.set_read_timeout(Some(Duration::from_secs(2)))?;
    let port = socket.local_addr()?.port();
    let registers = registers.to_vec();

    let handle = thread::spawn(move || {
        let mut served = 0;
        let mut buffer = [0u8; 256];
        while let Ok((len, from)) = socket.recv_from(&mut buffer) {
            served += 1;
            if served <= ignore_first {
                continue;
            }
            if socket
                .send_to(&answer(&buffer[..len], &registers), from)
                .is_err()
            {
                break;
            }
        }
        served
    });

    Ok((port, handle))
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    BeforeRequest(RequestKind),
    Reading(Reading),
    GatherFailed {
        message: String,
        timeout: bool,
        decode: bool,
    },
    Reset(u8),
    Error {
        message: String,
        timeout: bool,
    },
}

#[derive(Default)]
pub struct RecordingHook {
    events: Mutex<Vec<HookEvent>>,
    fail_before_request: bool,
}

impl RecordingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A hook whose `on_before_request` always errors.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_before_request: true,
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }
}

impl MeterHook for RecordingHook {
    fn on_before_request(&self, _slave: SlaveAddress, request: RequestKind) -> anyhow::Result<()> {
        self.events.lock().push(HookEvent::BeforeRequest(request));
        if self.fail_before_request {
            anyhow::bail!("hook refused {request}");
        }
        Ok(())
    }

    fn on_reading(&self, _slave: SlaveAddress, reading: &Reading) {
        self.events.lock().push(HookEvent::Reading(reading.clone()));
    }

    fn on_gather_failed(&self, _slave: SlaveAddress, error: &TransportError) {
        self.events.lock().push(HookEvent::GatherFailed {
            message: error.to_string(),
            timeout: error.is_timeout(),
            decode: error.is_decode(),
        });
    }

    fn on_reset_energy(&self, ack: &Ack) {
        self.events.lock().push(HookEvent::Reset(ack.slave.get()));
    }

    fn on_error(&self, _slave: SlaveAddress, error: &TransportError) {
        self.events.lock().push(HookEvent::Error {
            message: error.to_string(),
            timeout: error.is_timeout(),
        });
    }
}
