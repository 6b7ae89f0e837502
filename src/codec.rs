//! Wire codec: length-delimited envelope framing.
//!
//! There is no equivalent file in the teacher; the framing shape here
//! (start/end marker bytes, network-order length-prefixed fields,
//! scan-and-resync on a false-positive start byte) follows
//! `rocket/net/tcp/tcp_connection.h`'s framing description, adapted to
//! Rust slices instead of a C++ `Buffer` class.

use crate::buffer::ByteBuffer;

const START_BYTE: u8 = 0x02;
const END_BYTE: u8 = 0x03;

/// Six 4-byte fields (pk_len, req_id_len, method_name_len, err_code,
/// err_info_len, checksum) plus the start and end marker bytes.
const FIXED_OVERHEAD: usize = 2 + 6 * 4;

/// A decoded or to-be-encoded RPC message frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub req_id: String,
    pub method_name: String,
    pub err_code: i32,
    pub err_info: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(req_id: impl Into<String>) -> Envelope {
        Envelope {
            req_id: req_id.into(),
            method_name: String::new(),
            err_code: 0,
            err_info: String::new(),
            payload: Vec::new(),
        }
    }
}

/// Serializes `envelope` into its wire form. The checksum field is
/// reserved and always written as `1` (spec.md §4.4); nothing in this
/// crate verifies it on decode.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let req_id = envelope.req_id.as_bytes();
    let method_name = envelope.method_name.as_bytes();
    let err_info = envelope.err_info.as_bytes();
    let payload = &envelope.payload;

    let pk_len = FIXED_OVERHEAD + req_id.len() + method_name.len() + err_info.len() + payload.len();

    let mut buf = Vec::with_capacity(pk_len);
    buf.push(START_BYTE);
    buf.extend_from_slice(&(pk_len as u32).to_be_bytes());
    buf.extend_from_slice(&(req_id.len() as u32).to_be_bytes());
    buf.extend_from_slice(req_id);
    buf.extend_from_slice(&(method_name.len() as u32).to_be_bytes());
    buf.extend_from_slice(method_name);
    buf.extend_from_slice(&envelope.err_code.to_be_bytes());
    buf.extend_from_slice(&(err_info.len() as u32).to_be_bytes());
    buf.extend_from_slice(err_info);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&1u32.to_be_bytes());
    buf.push(END_BYTE);
    buf
}

fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    data.get(pos..pos + 4).map(|s| u32::from_be_bytes(s.try_into().unwrap()))
}

fn read_i32(data: &[u8], pos: usize) -> Option<i32> {
    data.get(pos..pos + 4).map(|s| i32::from_be_bytes(s.try_into().unwrap()))
}

fn read_bytes(data: &[u8], pos: usize, len: usize) -> Option<Vec<u8>> {
    data.get(pos..pos.checked_add(len)?).map(|s| s.to_vec())
}

/// Parses one complete frame (`data` spans exactly `start..=end` byte
/// inclusive, already bounds-checked by the caller) into an `Envelope`.
/// Returns `None` on any length-field bounds violation — "parse_success
/// = false" in spec terms.
fn parse_frame(data: &[u8]) -> Option<Envelope> {
    let pk_len = data.len();
    let mut pos = 5usize;

    let req_id_len = read_u32(data, pos)? as usize;
    pos += 4;
    let req_id = read_bytes(data, pos, req_id_len)?;
    pos += req_id_len;

    let method_name_len = read_u32(data, pos)? as usize;
    pos += 4;
    let method_name = read_bytes(data, pos, method_name_len)?;
    pos += method_name_len;

    let err_code = read_i32(data, pos)?;
    pos += 4;

    let err_info_len = read_u32(data, pos)? as usize;
    pos += 4;
    let err_info = read_bytes(data, pos, err_info_len)?;
    pos += err_info_len;

    let payload_len = pk_len.checked_sub(pos)?.checked_sub(4)?.checked_sub(1)?;
    let payload = read_bytes(data, pos, payload_len)?;
    pos += payload_len;

    let _checksum = read_u32(data, pos)?;
    pos += 4;

    if pos != pk_len - 1 {
        return None;
    }

    Some(Envelope {
        req_id: String::from_utf8(req_id).ok()?,
        method_name: String::from_utf8(method_name).ok()?,
        err_code,
        err_info: String::from_utf8(err_info).ok()?,
        payload,
    })
}

/// Pulls the next complete frame out of `buf`, if any, advancing its read
/// index past whatever was consumed (a full frame, or garbage skipped
/// while resynchronizing on a false-positive start byte). Returns `None`
/// when no complete frame is available yet; callers should retry after
/// more bytes arrive.
pub fn decode(buf: &mut ByteBuffer) -> Option<Envelope> {
    loop {
        let data = buf.peek();
        let start_offset = match data.iter().position(|&b| b == START_BYTE) {
            Some(off) => off,
            None => {
                buf.move_read_index(data.len());
                return None;
            }
        };
        if start_offset > 0 {
            buf.move_read_index(start_offset);
            continue;
        }

        let data = buf.peek();
        if data.len() < 5 {
            return None;
        }
        let pk_len = u32::from_be_bytes(data[1..5].try_into().unwrap()) as usize;
        if pk_len < FIXED_OVERHEAD {
            buf.move_read_index(1);
            continue;
        }
        if data.len() < pk_len {
            return None;
        }
        if data[pk_len - 1] != END_BYTE {
            buf.move_read_index(1);
            continue;
        }

        let frame = &data[..pk_len];
        match parse_frame(frame) {
            Some(envelope) => {
                buf.move_read_index(pk_len);
                return Some(envelope);
            }
            None => {
                log::error!("dropping frame with inconsistent length fields ({pk_len} bytes)");
                buf.move_read_index(pk_len);
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            req_id: "00000000000000000001".to_string(),
            method_name: "Echo.echo".to_string(),
            err_code: 0,
            err_info: String::new(),
            payload: b"hello world".to_vec(),
        }
    }

    #[test]
    fn round_trips_through_buffer() {
        let env = sample();
        let wire = encode(&env);
        let mut buf = ByteBuffer::new(16);
        buf.write(&wire);
        let decoded = decode(&mut buf).unwrap();
        assert_eq!(decoded, env);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frame_yields_none_and_does_not_consume() {
        let wire = encode(&sample());
        let mut buf = ByteBuffer::new(16);
        buf.write(&wire[..wire.len() - 3]);
        assert!(decode(&mut buf).is_none());
        assert_eq!(buf.readable(), wire.len() - 3);
    }

    #[test]
    fn resyncs_past_a_false_positive_start_byte() {
        let env = sample();
        let wire = encode(&env);

        // A frame whose length field is plausible (>= FIXED_OVERHEAD, <=
        // bytes actually available) but whose claimed end byte is wrong,
        // so `decode` must reject it at the `data[pk_len - 1] != END_BYTE`
        // check and resync one byte at a time rather than returning `None`
        // for an incomplete frame.
        let pk_len: u32 = FIXED_OVERHEAD as u32 + 4;
        let mut garbage = vec![0u8; pk_len as usize];
        garbage[0] = START_BYTE;
        garbage[1..5].copy_from_slice(&pk_len.to_be_bytes());
        garbage[pk_len as usize - 1] = 0x00;

        let mut buf = ByteBuffer::new(16);
        buf.write(&garbage);
        buf.write(&wire);
        let decoded = decode(&mut buf).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn huge_claimed_length_is_treated_as_incomplete() {
        let mut buf = ByteBuffer::new(16);
        buf.write(&[START_BYTE, 0xff, 0xff, 0xff, 0xff, 0x00]);
        assert!(decode(&mut buf).is_none());
    }

    #[test]
    fn decodes_two_frames_back_to_back() {
        let a = sample();
        let mut b = sample();
        b.req_id = "00000000000000000002".to_string();
        let mut buf = ByteBuffer::new(16);
        buf.write(&encode(&a));
        buf.write(&encode(&b));
        assert_eq!(decode(&mut buf).unwrap(), a);
        assert_eq!(decode(&mut buf).unwrap(), b);
    }

    #[test]
    fn garbage_with_no_start_byte_is_dropped() {
        let mut buf = ByteBuffer::new(16);
        buf.write(&[0xaa, 0xbb, 0xcc]);
        assert!(decode(&mut buf).is_none());
        assert!(buf.is_empty());
    }
}
