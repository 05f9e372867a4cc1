use bytes::Bytes;

use super::{
    crc::push_crc, open_frame, Ack, DecodeError, EncodedFrame, MalformedReason, RequestKind,
    SlaveAddress, FUNCTION_RESET_ENERGY, RESET_ENERGY_FRAME_LEN,
};

/// Vendor command 0x42: clears the meter's accumulated energy counter.
///
/// Neither the request nor the acknowledgment carries a payload, both
/// frames are `[slave, 0x42, crc_lo, crc_hi]`.
pub fn encode_reset_energy(slave: SlaveAddress) -> EncodedFrame {
    let mut raw = Vec::with_capacity(RESET_ENERGY_FRAME_LEN);
    raw.push(slave.get());
    raw.push(FUNCTION_RESET_ENERGY);
    push_crc(&mut raw);
    EncodedFrame::new(slave, RequestKind::ResetEnergy, Bytes::from(raw))
}

pub fn decode_ack(slave: SlaveAddress, frame: &[u8]) -> Result<Ack, DecodeError> {
    let payload = open_frame(slave, FUNCTION_RESET_ENERGY, frame)?;
    if !payload.is_empty() {
        return Err(MalformedReason::Length {
            expected: RESET_ENERGY_FRAME_LEN,
            actual: frame.len(),
        }
        .into());
    }
    Ok(Ack { slave })
}
