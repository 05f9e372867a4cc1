/// CRC-16/MODBUS over `data`. Transmitted low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of everything already in `frame`.
pub(crate) fn push_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Split the trailing CRC off and check it. Caller guarantees `frame.len() >= 2`.
pub(crate) fn check_crc(frame: &[u8]) -> Result<&[u8], (u16, u16)> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let expected = crc16(body);
    if received == expected {
        Ok(body)
    } else {
        Err((expected, received))
    }
}
