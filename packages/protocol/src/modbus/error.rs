use strum::FromRepr;

/// Misuse of the encoding API. These are caller bugs, never bus noise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidArgument {
    #[error("slave address {0} is outside 0..=247")]
    SlaveAddress(u8),

    #[error("register count {0} is outside 1..=125")]
    RegisterCount(u16),

    #[error("register range {start}+{count} exceeds the 16-bit address space")]
    RegisterRange { start: u16, count: u16 },

    #[error("{operation} cannot carry a {kind} frame")]
    RequestKind {
        operation: &'static str,
        kind: &'static str,
    },

    #[error("request rejected by encoder: {0}")]
    Rejected(String),
}

/// Why a response frame could not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedReason {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("frame length {actual} does not match expected {expected}")]
    Length { expected: usize, actual: usize },

    #[error("CRC mismatch: expected {expected:#06x}, received {received:#06x}")]
    Crc { expected: u16, received: u16 },

    #[error("slave address mismatch: expected {expected}, received {received}")]
    SlaveMismatch { expected: u8, received: u8 },

    #[error("byte count {declared} does not match payload of {actual} bytes")]
    ByteCount { declared: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    MalformedFrame(MalformedReason),

    #[error("unexpected function code: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedFunctionCode { expected: u8, actual: u8 },

    #[error("register count mismatch: expected {expected}, got {actual}")]
    RegisterCountMismatch { expected: u16, actual: u16 },

    #[error("exception response to function {function:#04x}: code {code:#04x}")]
    ExceptionResponse { function: u8, code: u8 },
}

impl From<MalformedReason> for DecodeError {
    fn from(reason: MalformedReason) -> Self {
        DecodeError::MalformedFrame(reason)
    }
}

/// Standard Modbus exception codes, used to name what a device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, strum::Display)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailed = 0x0B,
}

impl ExceptionCode {
    pub fn describe(code: u8) -> String {
        match Self::from_repr(code) {
            Some(known) => format!("{known} ({code:#04x})"),
            None => format!("unknown exception {code:#04x}"),
        }
    }
}
