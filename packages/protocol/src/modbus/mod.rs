mod crc;
mod error;
mod pull_get_inputs;
mod reset_energy;

use bytes::Bytes;
use std::fmt;

pub use crc::crc16;
pub use error::{DecodeError, ExceptionCode, InvalidArgument, MalformedReason};
pub use pull_get_inputs::{decode_registers, encode_read_input_registers};
pub use reset_energy::{decode_ack, encode_reset_energy};

pub const FUNCTION_READ_INPUT_REGISTERS: u8 = 0x04;
pub const FUNCTION_RESET_ENERGY: u8 = 0x42;

/// Largest register count a single 0x04 request may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Upper bound of any RTU frame.
pub const MAX_FRAME_LEN: usize = 256;

const EXCEPTION_FRAME_LEN: usize = 5;
const RESET_ENERGY_FRAME_LEN: usize = 4;
const MIN_FRAME_LEN: usize = 4;

/// Station address on the RTU bus, 0 (broadcast) through 247.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlaveAddress(u8);

impl SlaveAddress {
    pub const MAX: u8 = 247;

    pub fn new(id: u8) -> Result<Self, InvalidArgument> {
        if id > Self::MAX {
            return Err(InvalidArgument::SlaveAddress(id));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SlaveAddress {
    type Error = InvalidArgument;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl fmt::Display for SlaveAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two exchanges the meter understands. Each variant owns its own
/// framing rules instead of sharing a generic function-code type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    ReadInputRegisters { start: u16, count: u16 },
    ResetEnergy,
}

impl RequestKind {
    pub fn function_code(&self) -> u8 {
        match self {
            RequestKind::ReadInputRegisters { .. } => FUNCTION_READ_INPUT_REGISTERS,
            RequestKind::ResetEnergy => FUNCTION_RESET_ENERGY,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::ReadInputRegisters { .. } => "read-input-registers",
            RequestKind::ResetEnergy => "reset-energy",
        }
    }

    /// Total length of the response frame, once enough of its head has
    /// arrived to tell. `None` means more bytes are needed first.
    pub fn frame_len(&self, head: &[u8]) -> Option<usize> {
        if head.len() < 2 {
            return None;
        }
        if head[1] & 0x80 != 0 {
            return Some(EXCEPTION_FRAME_LEN);
        }
        match self {
            RequestKind::ResetEnergy => Some(RESET_ENERGY_FRAME_LEN),
            RequestKind::ReadInputRegisters { .. } => {
                head.get(2).map(|&byte_count| 5 + byte_count as usize)
            }
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::ReadInputRegisters { start, count } => {
                write!(f, "{} @{start}x{count}", self.name())
            }
            RequestKind::ResetEnergy => f.write_str(self.name()),
        }
    }
}

/// A request ready for the wire, remembering what it asked for so the
/// response can be checked against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    slave: SlaveAddress,
    kind: RequestKind,
    bytes: Bytes,
}

impl EncodedFrame {
    fn new(slave: SlaveAddress, kind: RequestKind, bytes: Bytes) -> Self {
        Self { slave, kind, bytes }
    }

    pub fn slave(&self) -> SlaveAddress {
        self.slave
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn decode_registers(&self, response: &[u8]) -> Result<RegisterBlock, DecodeError> {
        let expected = match self.kind {
            RequestKind::ReadInputRegisters { count, .. } => count,
            RequestKind::ResetEnergy => 0,
        };
        decode_registers(self.slave, response, expected)
    }

    pub fn decode_ack(&self, response: &[u8]) -> Result<Ack, DecodeError> {
        decode_ack(self.slave, response)
    }
}

/// Register values returned by one read, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock(Vec<u16>);

impl RegisterBlock {
    pub fn new(values: Vec<u16>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u16> {
        self.0
    }
}

impl AsRef<[u16]> for RegisterBlock {
    fn as_ref(&self) -> &[u16] {
        &self.0
    }
}

/// Positive acknowledgment of a reset-energy command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub slave: SlaveAddress,
}

/// Common envelope checks. Returns the bytes after the function code with
/// the CRC stripped.
fn open_frame(slave: SlaveAddress, function: u8, frame: &[u8]) -> Result<&[u8], DecodeError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(MalformedReason::TooShort { len: frame.len() }.into());
    }

    let body = crc::check_crc(frame)
        .map_err(|(expected, received)| MalformedReason::Crc { expected, received })?;

    if body[0] != slave.get() {
        return Err(MalformedReason::SlaveMismatch {
            expected: slave.get(),
            received: body[0],
        }
        .into());
    }

    let actual = body[1];
    if actual & 0x80 != 0 && actual & 0x7F == function {
        if frame.len() != EXCEPTION_FRAME_LEN {
            return Err(MalformedReason::Length {
                expected: EXCEPTION_FRAME_LEN,
                actual: frame.len(),
            }
            .into());
        }
        return Err(DecodeError::ExceptionResponse {
            function,
            code: body[2],
        });
    }
    if actual != function {
        return Err(DecodeError::UnexpectedFunctionCode {
            expected: function,
            actual,
        });
    }

    Ok(&body[2..])
}
