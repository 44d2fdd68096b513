//! Length prefixed octet strings: `[H | len(7+)] payload`. The top bit of
//! the length prefix selects huffman coding for the payload.

use crate::huffman::{self, HuffmanDecoder};
use crate::{integer, HpackError, HpackResult};

/// Huffman标志位
const HUFFMAN_FLAG: u8 = 0x80;

/// Decodes a string representation starting at `buf[0]`.
///
/// Returns the payload (already huffman decoded when the flag was set),
/// whether the wire form was huffman coded, and the octets consumed.
pub fn decode_string(buf: &[u8]) -> HpackResult<(Vec<u8>, bool, usize)> {
    if buf.is_empty() {
        return Err(HpackError::NeedMoreData);
    }

    let huffman = buf[0] & HUFFMAN_FLAG == HUFFMAN_FLAG;
    let (len, consumed) = integer::decode(7, buf)?;
    let len = len as usize;

    if buf.len() < consumed + len {
        return Err(HpackError::NeedMoreData);
    }
    let raw = &buf[consumed..consumed + len];

    let payload = if huffman {
        HuffmanDecoder::new().decode(raw)?
    } else {
        let mut payload = Vec::new();
        payload.try_reserve(len)?;
        payload.extend_from_slice(raw);
        payload
    };

    Ok((payload, huffman, consumed + len))
}

/// Encodes `src` as a string representation into `out`. With
/// `allow_huffman` the huffman form is used whenever it is strictly
/// shorter than the plain form.
pub fn encode_string(src: &[u8], allow_huffman: bool, out: &mut Vec<u8>) {
    if allow_huffman {
        let mut encoded = Vec::with_capacity(src.len());
        huffman::encode(src, &mut encoded);
        if encoded.len() < src.len() {
            integer::encode(7, HUFFMAN_FLAG, encoded.len() as u32, out);
            out.extend_from_slice(&encoded);
            return;
        }
    }

    integer::encode(7, 0, src.len() as u32, out);
    out.extend_from_slice(src);
}
