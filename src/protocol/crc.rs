//! CRC16-CCITT (poly 0x1021, init 0xFFFF, MSB first, no final xor).

const POLY: u16 = 0x1021;

/// Initial register value.
pub const CRC16_INIT: u16 = 0xFFFF;

/// Checksum of `data` from the initial value.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16_ccitt_update(CRC16_INIT, data)
}

/// Continue a running checksum over more bytes.
pub fn crc16_ccitt_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}
