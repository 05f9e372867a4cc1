use bytes::Bytes;
use rmodbus::{client::ModbusRequest, ModbusProto};

use super::{
    open_frame, DecodeError, EncodedFrame, InvalidArgument, MalformedReason, RegisterBlock,
    RequestKind, SlaveAddress, FUNCTION_READ_INPUT_REGISTERS, MAX_READ_REGISTERS,
};

/// Generate an RTU request to read input registers (function 0x04)
pub fn encode_read_input_registers(
    slave: SlaveAddress,
    start_address: u16,
    count: u16,
) -> Result<EncodedFrame, InvalidArgument> {
    if count == 0 || count > MAX_READ_REGISTERS {
        return Err(InvalidArgument::RegisterCount(count));
    }
    if start_address.checked_add(count - 1).is_none() {
        return Err(InvalidArgument::RegisterRange {
            start: start_address,
            count,
        });
    }

    let mut request = ModbusRequest::new(slave.get(), ModbusProto::Rtu);
    let mut raw = Vec::with_capacity(8);
    request
        .generate_get_inputs(start_address, count, &mut raw)
        .map_err(|err| InvalidArgument::Rejected(err.to_string()))?;

    Ok(EncodedFrame::new(
        slave,
        RequestKind::ReadInputRegisters {
            start: start_address,
            count,
        },
        Bytes::from(raw),
    ))
}

/// Parse an RTU response for input registers (function 0x04) into u16 values.
pub fn decode_registers(
    slave: SlaveAddress,
    frame: &[u8],
    expected_count: u16,
) -> Result<RegisterBlock, DecodeError> {
    let payload = open_frame(slave, FUNCTION_READ_INPUT_REGISTERS, frame)?;

    let (&declared, data) = payload
        .split_first()
        .ok_or(MalformedReason::TooShort { len: frame.len() })?;
    let declared = declared as usize;
    if declared != data.len() || declared % 2 != 0 {
        return Err(MalformedReason::ByteCount {
            declared,
            actual: data.len(),
        }
        .into());
    }

    let actual = (declared / 2) as u16;
    if actual != expected_count {
        return Err(DecodeError::RegisterCountMismatch {
            expected: expected_count,
            actual,
        });
    }

    let values = data
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect::<Vec<_>>();
    log::trace!("Received input registers: {values:?}");

    Ok(RegisterBlock::new(values))
}
