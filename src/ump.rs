//! UMP ("Universal Media Protocol") part framing: the outer container that
//! carries one HTTP response body as a sequence of `(type, payload)` parts.
//!
//! Modeled as a pull-based reader over incoming byte chunks rather than a
//! one-shot "parse the whole body" function — the response body is read
//! off the wire incrementally and parts should be dispatched as soon as
//! they're complete, not after the whole (potentially large) body has
//! buffered.

use crate::error::SabrError;
use crate::varint::decode_ump_varint;

/// One fully-framed UMP part.
pub struct UmpPart {
    pub part_type: u32,
    pub payload: Vec<u8>,
}

/// Accumulates incoming byte chunks and yields complete parts as soon as
/// they're available. Bytes belonging to an incomplete trailing part are
/// retained across calls to [`UmpPartReader::push`].
#[derive(Default)]
pub struct UmpPartReader {
    buffer: Vec<u8>,
}

impl UmpPartReader {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed a newly-received chunk and drain every complete part it makes
    /// available. Parts are only buffered as long as decoding them is
    /// impossible — this is a true lazy pull, not a buffer-everything-then-parse.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<UmpPart>, SabrError> {
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();

        loop {
            match self.try_take_one()? {
                Some(part) => parts.push(part),
                None => break,
            }
        }

        Ok(parts)
    }

    /// Called once the HTTP body is exhausted: any bytes still buffered
    /// mean the stream ended mid-part, which is a protocol error.
    pub fn finish(self) -> Result<(), SabrError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(SabrError::protocol(
                "response body ended with an incomplete UMP part",
            ))
        }
    }

    fn try_take_one(&mut self) -> Result<Option<UmpPart>, SabrError> {
        let Some((part_type, n1)) = decode_ump_varint(&self.buffer, 0)? else {
            return Ok(None);
        };
        let Some((payload_size, n2)) = decode_ump_varint(&self.buffer, n1)? else {
            // Not enough bytes yet for the length varint. Not an error —
            // more chunks may still be coming.
            return Ok(None);
        };
        let header_len = n1 + n2;
        let total_len = header_len + payload_size as usize;
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let payload = self.buffer[header_len..total_len].to_vec();
        self.buffer.drain(..total_len);
        Ok(Some(UmpPart { part_type, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::encode_ump_varint;

    fn encode_part(part_type: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = encode_ump_varint(part_type);
        out.extend(encode_ump_varint(payload.len() as u32));
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn single_part_in_one_chunk() {
        let mut r = UmpPartReader::new();
        let bytes = encode_part(20, b"hello");
        let parts = r.push(&bytes).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].part_type, 20);
        assert_eq!(parts[0].payload, b"hello");
        r.finish().unwrap();
    }

    #[test]
    fn part_split_across_many_small_chunks() {
        let mut r = UmpPartReader::new();
        let bytes = encode_part(21, b"ABCDEFGH");
        let mut parts = Vec::new();
        for byte in &bytes {
            parts.extend(r.push(&[*byte]).unwrap());
        }
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].payload, b"ABCDEFGH");
    }

    #[test]
    fn multiple_parts_back_to_back() {
        let mut r = UmpPartReader::new();
        let mut bytes = encode_part(20, b"one");
        bytes.extend(encode_part(21, b"two"));
        bytes.extend(encode_part(22, b""));
        let parts = r.push(&bytes).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].payload, Vec::<u8>::new());
    }

    #[test]
    fn incomplete_trailing_part_is_an_error_at_finish() {
        let mut r = UmpPartReader::new();
        let bytes = encode_part(20, b"hello");
        r.push(&bytes[..bytes.len() - 2]).unwrap();
        assert!(r.finish().is_err());
    }

    #[test]
    fn clean_eof_between_parts_is_not_an_error() {
        let r = UmpPartReader::new();
        assert!(r.finish().is_ok());
    }

    #[test]
    fn short_payload_waits_for_more_bytes_rather_than_erroring() {
        let mut r = UmpPartReader::new();
        // Announce a 100-byte payload but only supply 3 bytes.
        let mut header = encode_ump_varint(20);
        header.extend(encode_ump_varint(100));
        header.extend_from_slice(&[1, 2, 3]);
        let parts = r.push(&header).unwrap();
        assert!(parts.is_empty());
    }
}
