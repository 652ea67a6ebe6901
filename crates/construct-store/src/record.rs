//! On-disk framing for the append-only event log (§4.6).
//!
//! ```text
//! [START:u32][idx:u64][len:u32][payload:bytes][crc32:u32][END:u32]
//!     4B         8B       4B      variable        4B        4B
//! ```
//!
//! `idx` is the event's [`EventIdx`]; `payload` is the event's canonical
//! JSON. The sentinels let recovery tell a torn tail write (process killed
//! mid-`write`) from real corruption: a missing `END` truncates the replay
//! instead of erroring.

use bytes::BytesMut;
use construct_types::EventIdx;

use crate::error::StoreError;

const START: u32 = 0xC0E7_0001;
const END: u32 = 0xC0E7_FFFF;
const HEADER_LEN: usize = 4 + 8 + 4;
const OVERHEAD: usize = HEADER_LEN + 4 + 4;

fn crc32(bytes: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc = 0xFFFF_FFFFu32;
    for &b in bytes {
        crc ^= u32::from(b);
        for _ in 0..8 {
            let mask = 0u32.wrapping_sub(crc & 1);
            crc = (crc >> 1) ^ (POLY & mask);
        }
    }
    !crc
}

/// Encodes one `(idx, canonical_json)` pair as a framed record.
pub fn encode(idx: EventIdx, payload: &str) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(OVERHEAD + payload.len());
    encode_into(&mut buf, idx, payload);
    buf.to_vec()
}

/// Encodes one `(idx, canonical_json)` pair into `buf`, appending after
/// whatever `buf` already held. `buf` is typically a recycled
/// [`construct_runtime::BytesMutPool`] buffer rather than a fresh
/// allocation, since [`crate::store::EventStore::write`] runs this on every
/// commit.
pub fn encode_into(buf: &mut BytesMut, idx: EventIdx, payload: &str) {
    let payload = payload.as_bytes();
    let start = buf.len();
    buf.extend_from_slice(&START.to_le_bytes());
    buf.extend_from_slice(&idx.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc32(&buf[start + 4..]);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&END.to_le_bytes());
}

/// Decodes one record starting at `data[0]`, returning `(idx, payload,
/// bytes_consumed)`. `Ok(None)` means `data` holds an incomplete tail
/// record (truncated by a crash mid-write) and replay should stop here
/// without treating it as corruption.
pub fn decode(data: &[u8]) -> Result<Option<(EventIdx, String, usize)>, StoreError> {
    if data.len() < HEADER_LEN {
        return Ok(None);
    }
    let start = u32::from_le_bytes(data[0..4].try_into().unwrap());
    if start != START {
        return Err(StoreError::CorruptRecord);
    }
    let idx = EventIdx::from_be_bytes(data[4..12].try_into().unwrap());
    let len = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
    let total = OVERHEAD + len;
    if data.len() < total {
        return Ok(None);
    }
    let payload = &data[HEADER_LEN..HEADER_LEN + len];
    let crc_offset = HEADER_LEN + len;
    let stored_crc = u32::from_le_bytes(data[crc_offset..crc_offset + 4].try_into().unwrap());
    let end = u32::from_le_bytes(data[crc_offset + 4..crc_offset + 8].try_into().unwrap());
    if end != END {
        return Ok(None);
    }
    if crc32(&data[4..crc_offset]) != stored_crc {
        return Err(StoreError::CorruptRecord);
    }
    let payload = String::from_utf8(payload.to_vec()).map_err(|_| StoreError::CorruptRecord)?;
    Ok(Some((idx, payload, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let encoded = encode(EventIdx::new(7), r#"{"type":"m.room.create"}"#);
        let (idx, payload, consumed) = decode(&encoded).unwrap().unwrap();
        assert_eq!(idx, EventIdx::new(7));
        assert_eq!(payload, r#"{"type":"m.room.create"}"#);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn truncated_tail_is_not_corruption() {
        let encoded = encode(EventIdx::new(1), "{}");
        let torn = &encoded[..encoded.len() - 3];
        assert!(decode(torn).unwrap().is_none());
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let mut encoded = encode(EventIdx::new(1), r#"{"a":1}"#);
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xFF;
        assert!(matches!(decode(&encoded), Err(StoreError::CorruptRecord) | Ok(None)));
    }

    #[test]
    fn two_records_decode_in_sequence() {
        let mut buf = encode(EventIdx::new(1), "{}");
        buf.extend(encode(EventIdx::new(2), "{}"));
        let (idx1, _, n1) = decode(&buf).unwrap().unwrap();
        let (idx2, _, _) = decode(&buf[n1..]).unwrap().unwrap();
        assert_eq!(idx1, EventIdx::new(1));
        assert_eq!(idx2, EventIdx::new(2));
    }
}
