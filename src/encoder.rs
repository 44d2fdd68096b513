// Copyright 2022 - 2023 Wenmeng See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// Author: tickbh
// -----
// Created Date: 2023/09/07 10:08:45

//! Encodes header lists into hpack blocks. The encoder drives the same
//! table and reference set rules as the decoder so both sides of the
//! connection stay in lockstep; a conforming decoder sharing the initial
//! state reproduces exactly the encoded sequence.

use crate::field::{FieldSource, HeaderField, Representation};
use crate::index_set::IndexSet;
use crate::strings::encode_string;
use crate::table::HeaderTable;
use crate::{integer, HpackResult};

pub struct Encoder {
    table: HeaderTable,
    reference_set: IndexSet,
    /// 是否使用huffman编码
    huffman: bool,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder {
            table: HeaderTable::new(),
            reference_set: IndexSet::new(false),
            huffman: true,
        }
    }

    /// Strings are huffman coded whenever that is shorter; turning this
    /// off always sends them plain.
    pub fn set_huffman(&mut self, huffman: bool) {
        self.huffman = huffman;
    }

    pub fn table(&self) -> &HeaderTable {
        &self.table
    }

    /// The current reference set in stable indexes, for inspection.
    pub fn reference_set(&self) -> &IndexSet {
        &self.reference_set
    }

    /// Emits a maximum table size update and applies it locally, evicting
    /// exactly what the peer decoder will evict.
    pub fn set_max_table_size(&mut self, new_max_size: u32, out: &mut Vec<u8>) -> HpackResult<()> {
        let evicted = self.table.set_max(new_max_size)?;
        self.reference_set.relative_comp(&evicted);
        integer::encode(4, 0x20, new_max_size, out);
        Ok(())
    }

    /// Encodes one header block into a fresh buffer.
    pub fn encode<'b, I>(&mut self, headers: I) -> HpackResult<Vec<u8>>
    where
        I: IntoIterator<Item = &'b (Vec<u8>, Vec<u8>)>,
    {
        let mut encoded = Vec::new();
        self.encode_into(headers, &mut encoded)?;
        Ok(encoded)
    }

    /// Encodes one header block into `out`.
    ///
    /// References left over from the previous block would be re-emitted by
    /// the peer in table order rather than list order, so a block that
    /// starts with live references first empties the reference set.
    pub fn encode_into<'b, I>(&mut self, headers: I, out: &mut Vec<u8>) -> HpackResult<()>
    where
        I: IntoIterator<Item = &'b (Vec<u8>, Vec<u8>)>,
    {
        if !self.reference_set.is_empty() {
            out.push(0x30);
            self.reference_set.clear();
        }

        for header in headers {
            self.encode_header_into(&header.0, &header.1, out)?;
        }
        Ok(())
    }

    /// Encodes a single header, choosing the cheapest representation that
    /// keeps the decoder contract.
    pub fn encode_header_into(
        &mut self,
        name: &[u8],
        value: &[u8],
        out: &mut Vec<u8>,
    ) -> HpackResult<()> {
        match self.table.find(name, value) {
            Some((index, true)) => {
                let is_dynamic = index <= self.table.len();
                if is_dynamic && self.table.set_exists(&self.reference_set, index) {
                    // Already referenced in this block: an indexed
                    // representation would toggle the reference off and
                    // emit nothing, so the duplicate goes out as a
                    // non-indexed literal.
                    log::trace!("hpack: 重复头部使用不索引的字面量; index={}", index);
                    integer::encode(4, 0x00, index as u32, out);
                    encode_string(value, self.huffman, out);
                } else {
                    log::trace!("hpack: 使用索引表示; index={}", index);
                    integer::encode(7, 0x80, index as u32, out);

                    if is_dynamic {
                        self.table.set_add(&mut self.reference_set, index);
                    } else {
                        // The decoder copies the static entry into its
                        // dynamic table, do the same.
                        let (entry, _) = self.table.get(index, false)?;
                        let evicted = self.table.add(&entry);
                        self.reference_set.relative_comp(&evicted);
                        self.table.set_add(&mut self.reference_set, 1);
                    }
                }
            }
            Some((index, false)) => {
                log::trace!("hpack: 名字索引加字面量; index={}", index);
                integer::encode(6, 0x40, index as u32, out);
                encode_string(value, self.huffman, out);
                self.index_new_entry(name, value);
            }
            None => {
                log::trace!("hpack: 完整字面量");
                integer::encode(6, 0x40, 0, out);
                encode_string(name, self.huffman, out);
                encode_string(value, self.huffman, out);
                self.index_new_entry(name, value);
            }
        }
        Ok(())
    }

    /// Re-encodes a decoded field, keeping the never-indexed form intact
    /// for downstream hops.
    pub fn encode_field_into(&mut self, field: &HeaderField, out: &mut Vec<u8>) -> HpackResult<()> {
        if field.flags.rep != Representation::NeverIndexed {
            return self.encode_header_into(&field.name, &field.value, out);
        }

        match self.table.find(&field.name, &field.value) {
            Some((index, _)) => {
                integer::encode(4, 0x10, index as u32, out);
            }
            None => {
                integer::encode(4, 0x10, 0, out);
                encode_string(&field.name, self.huffman, out);
            }
        }
        encode_string(&field.value, self.huffman, out);
        Ok(())
    }

    /// The incremental-indexing tail shared by both literal forms.
    fn index_new_entry(&mut self, name: &[u8], value: &[u8]) {
        let mut field = HeaderField::with_parts(name, value);
        field.flags.rep = Representation::IncIndexed;
        field.flags.name = FieldSource::Literal;
        field.flags.value = FieldSource::Literal;

        let evicted = self.table.add(&field);
        self.reference_set.relative_comp(&evicted);
        if !evicted.is_full() {
            self.table.set_add(&mut self.reference_set, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_static_match() {
        let mut encoder = Encoder::new();
        let headers = vec![(b":method".to_vec(), b"GET".to_vec())];
        let encoded = encoder.encode(headers.iter()).unwrap();
        assert_eq!(encoded, vec![0x82]);
        // The encoder's own table tracked the decoder-side insertion.
        assert_eq!(encoder.table().len(), 1);
        assert!(!encoder.reference_set().is_empty());
    }

    #[test]
    fn full_literal_matches_fixture() {
        let mut encoder = Encoder::new();
        encoder.set_huffman(false);
        let headers = vec![(b"custom-key".to_vec(), b"custom-header".to_vec())];
        let encoded = encoder.encode(headers.iter()).unwrap();
        assert_eq!(
            encoded,
            b"\x40\x0a\x63\x75\x73\x74\x6f\x6d\x2d\x6b\x65\x79\x0d\x63\x75\x73\x74\x6f\x6d\x2d\x68\x65\x61\x64\x65\x72"
        );
        assert_eq!(encoder.table().get_size(), 55);
    }

    #[test]
    fn indexed_name_literal_value() {
        let mut encoder = Encoder::new();
        encoder.set_huffman(false);
        let headers = vec![(b":authority".to_vec(), b"www.example.com".to_vec())];
        let encoded = encoder.encode(headers.iter()).unwrap();
        assert_eq!(encoded[0], 0x41);
        assert_eq!(&encoded[2..], b"www.example.com");
    }

    #[test]
    fn second_block_reuses_the_table() {
        let mut encoder = Encoder::new();
        let headers = vec![(b"x-trace".to_vec(), b"abc".to_vec())];
        let first = encoder.encode(headers.iter()).unwrap();
        assert_eq!(first[0], 0x40);

        // Same list again: the block empties the reference set, then a one
        // octet indexed reference covers the whole header.
        let second = encoder.encode(headers.iter()).unwrap();
        assert_eq!(second, vec![0x30, 0x81]);
    }

    #[test]
    fn duplicate_header_in_one_block() {
        let mut encoder = Encoder::new();
        encoder.set_huffman(false);
        let headers = vec![
            (b"x-dup".to_vec(), b"1".to_vec()),
            (b"x-dup".to_vec(), b"1".to_vec()),
        ];
        let encoded = encoder.encode(headers.iter()).unwrap();
        // First copy is indexed into the table, the duplicate rides as a
        // literal without indexing on the new index.
        assert_eq!(encoded[0], 0x40);
        let tail = &encoded[encoded.len() - 3..];
        assert_eq!(tail, &[0x01, 0x01, b'1'][..]);
        assert_eq!(encoder.table().len(), 1);
    }

    #[test]
    fn max_size_update_bytes() {
        let mut encoder = Encoder::new();
        let mut out = Vec::new();
        encoder.set_max_table_size(20, &mut out).unwrap();
        assert_eq!(out, vec![0x2F, 0x05]);
        assert_eq!(encoder.table().get_max_size(), 20);

        let mut out = Vec::new();
        encoder.set_max_table_size(4, &mut out).unwrap();
        assert_eq!(out, vec![0x24]);

        let mut out = Vec::new();
        assert!(encoder.set_max_table_size(8192, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn never_indexed_field_keeps_its_form() {
        let mut encoder = Encoder::new();
        encoder.set_huffman(false);
        let mut field = HeaderField::with_parts(b"authorization", b"secret");
        field.flags.rep = Representation::NeverIndexed;

        let mut out = Vec::new();
        encoder.encode_field_into(&field, &mut out).unwrap();
        // authorization is static index 23 with an empty dynamic table,
        // which overflows the 4 bit prefix into a continuation octet.
        assert_eq!(&out[..2], &[0x1F, 0x08]);
        assert_eq!(out[2], 6);
        assert_eq!(&out[3..], b"secret");
        // Never indexed leaves the table alone.
        assert_eq!(encoder.table().len(), 0);
    }
}
