//! CRC used by the bus for command bodies.
//!
//! CRC-16/CCITT-FALSE computed over the hex-decoded body, appended to the
//! body as four uppercase hex characters.

use crc::{Crc, CRC_16_IBM_3740};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection or final xor.
const NIKOBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the CRC of a hex-encoded body.
///
/// Returns `None` if `body` is not valid hex (odd length or a non-hex digit).
pub fn crc16(body: &str) -> Option<u16> {
    let bytes = hex::decode(body).ok()?;

    Some(NIKOBUS_CRC.checksum(&bytes))
}

/// Append the CRC to a hex-encoded body, upper-casing the result.
pub fn append_crc(body: &str) -> Option<String> {
    let crc = crc16(body)?;

    Some(format!("{}{crc:04X}", body.to_ascii_uppercase()))
}
