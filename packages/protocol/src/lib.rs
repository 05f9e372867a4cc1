//! RTU frame codec for Peacefair energy meters
//!
//! Builds and parses the RTU-framed PDUs (address, function, payload, CRC)
//! the meter speaks when tunnelled over TCP or UDP. The codec performs no
//! I/O; moving bytes is the caller's job.

pub mod modbus;

pub use modbus::{
    crc16, decode_ack, decode_registers, encode_read_input_registers, encode_reset_energy, Ack,
    DecodeError, EncodedFrame, ExceptionCode, InvalidArgument, MalformedReason, RegisterBlock,
    RequestKind, SlaveAddress,
};
