//! Exposes the struct `Decoder` that allows for HPACK-encoded header blocks to
//! be decoded into a header list.
//!
//! The decoder only follows HPACK rules, without performing any additional
//! (semantic) checks on the header name/value pairs, i.e. it considers the
//! headers as opaque octets. It keeps the whole decoding context of one
//! connection: the dynamic table, the reference set and the set of
//! references not yet emitted in the current block.
//!
//! # Example
//!
//! ```rust
//! use hpackparse::{Decoder, HeaderStore};
//!
//! let mut decoder = Decoder::new();
//! let mut store = HeaderStore::new();
//!
//! decoder.decode(&[0x82, 0x87], &mut store).unwrap();
//!
//! assert_eq!(store.get_n(1).unwrap().name, b":method");
//! assert_eq!(store.get_n(1).unwrap().value, b"GET");
//! assert_eq!(store.get_n(2).unwrap().name, b":scheme");
//! assert_eq!(store.get_n(2).unwrap().value, b"http");
//! ```

use crate::field::{FieldSource, HeaderField, Representation};
use crate::index_set::{IndexSet, SetCursor};
use crate::strings::decode_string;
use crate::table::{HeaderTable, STATIC_ENTRIES};
use crate::{integer, HeaderStore, HpackError, HpackResult};

/// Decodes header blocks one representation at a time, maintaining the
/// state a peer encoder relies on across blocks.
pub struct Decoder {
    table: HeaderTable,
    /// Dynamic entries the current header list implicitly contains.
    reference_set: IndexSet,
    /// References that still await emission in this block.
    ref_not_emitted: IndexSet,
    iter_not_emitted: SetCursor,
    finished: bool,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            table: HeaderTable::new(),
            reference_set: IndexSet::new(false),
            ref_not_emitted: IndexSet::new(false),
            iter_not_emitted: SetCursor::new(),
            finished: false,
        }
    }

    /// The decoding side of a max size change that arrived out of band
    /// (HTTP/2 SETTINGS). Evicted entries leave both sets.
    pub fn set_max_table_size(&mut self, new_max_size: u32) -> HpackResult<()> {
        let evicted = self.table.set_max(new_max_size)?;
        self.reference_set.relative_comp(&evicted);
        self.ref_not_emitted.relative_comp(&evicted);
        Ok(())
    }

    /// The connection's decoding context, for inspection.
    pub fn table(&self) -> &HeaderTable {
        &self.table
    }

    /// The current reference set in stable indexes, for inspection.
    pub fn reference_set(&self) -> &IndexSet {
        &self.reference_set
    }

    /// Processes the next representation of the block found at `offset`.
    ///
    /// Returns `Ok(Some(consumed))` after each representation; `field` is
    /// left empty when nothing was emitted (context updates, reference set
    /// removals). Once `offset` reaches the end of `buf` the call switches
    /// to the final reference set emission, returning pending fields with
    /// `Ok(Some(0))` until `Ok(None)` reports the end of the block.
    ///
    /// `Err(NeedMoreData)` means the representation is cut short: nothing
    /// was consumed and no state changed, retry with a longer buffer.
    pub fn decode_field(
        &mut self,
        buf: &[u8],
        offset: usize,
        field: &mut HeaderField,
    ) -> HpackResult<Option<usize>> {
        field.clean();

        if offset >= buf.len() {
            return self.final_reference_set(field);
        }
        self.finished = false;

        let buf = &buf[offset..];
        let c = buf[0];

        if c & 0xE0 == 0x20 {
            self.decode_context_update(buf).map(Some)
        } else if c & 0x80 == 0x80 {
            self.decode_indexed(buf, field).map(Some)
        } else {
            self.decode_literal(buf, field).map(Some)
        }
    }

    /// Decodes a whole header block, pushing every emitted field into
    /// `store`. Returns the number of octets consumed.
    pub fn decode(&mut self, buf: &[u8], store: &mut HeaderStore) -> HpackResult<usize> {
        let mut field = HeaderField::new();
        let mut offset = 0;

        loop {
            match self.decode_field(buf, offset, &mut field)? {
                None => return Ok(offset),
                Some(consumed) => {
                    offset += consumed;
                    if !field.is_empty() {
                        store.emit(&field);
                    }
                }
            }
        }
    }

    /// Indexed header field: `1xxxxxxx`.
    ///
    /// An index already present in the reference set toggles the reference
    /// off and emits nothing. Otherwise the entry is emitted; a static
    /// entry is copied into the dynamic table first and the new entry
    /// (index 1) becomes the reference.
    fn decode_indexed(&mut self, buf: &[u8], field: &mut HeaderField) -> HpackResult<usize> {
        let (num, consumed) = integer::decode(7, buf)?;
        let num = num as usize;

        if num == 0 {
            return Err(HpackError::InvalidRepresentation);
        }
        if num > STATIC_ENTRIES + self.table.len() {
            return Err(HpackError::IndexOutOfRange);
        }

        let is_dynamic = num <= self.table.len();
        if is_dynamic && self.table.set_exists(&self.reference_set, num) {
            self.table.set_remove(&mut self.reference_set, num);
            self.table.set_remove(&mut self.ref_not_emitted, num);
            return Ok(consumed);
        }

        let (entry, is_static) = self.table.get(num, false)?;
        *field = entry;

        let num = if is_static {
            // Static entries always fit, the add cannot end up rejected.
            self.add_field_process_evictions(field)?;
            1
        } else {
            num
        };

        self.table.set_add(&mut self.reference_set, num);
        self.table.set_remove(&mut self.ref_not_emitted, num);

        Ok(consumed)
    }

    /// Literal header field: `01xxxxxx` with incremental indexing,
    /// `0000xxxx` without indexing, `0001xxxx` never indexed.
    fn decode_literal(&mut self, buf: &[u8], field: &mut HeaderField) -> HpackResult<usize> {
        let c = buf[0];
        let do_indexing = c & 0xC0 == 0x40;
        let prefix = if do_indexing { 6 } else { 4 };

        let (name_index, mut consumed) = integer::decode(prefix, buf)?;

        if name_index == 0 {
            let (name, huffman, used) = decode_string(&buf[consumed..])?;
            field.name = name;
            field.flags.name = if huffman {
                FieldSource::LiteralHuffman
            } else {
                FieldSource::Literal
            };
            consumed += used;
        } else {
            let (entry, is_static) = self.table.get(name_index as usize, true)?;
            field.name = entry.name;
            field.flags.name = if is_static {
                FieldSource::IndexedStatic
            } else {
                FieldSource::IndexedTable
            };
        }

        let (value, huffman, used) = decode_string(&buf[consumed..])?;
        field.value = value;
        field.flags.value = if huffman {
            FieldSource::LiteralHuffman
        } else {
            FieldSource::Literal
        };
        consumed += used;

        if do_indexing {
            field.flags.rep = Representation::IncIndexed;
            let added = self.add_field_process_evictions(field)?;

            // A field that was too big for the table emits but leaves no
            // reference behind.
            if added {
                self.table.set_add(&mut self.reference_set, 1);
                self.table.set_remove(&mut self.ref_not_emitted, 1);
            }
        } else {
            field.flags.rep = if c & 0x10 == 0x10 {
                Representation::NeverIndexed
            } else {
                Representation::WithoutIndexing
            };
        }

        Ok(consumed)
    }

    /// Encoding context update: `00110000` exactly empties the reference
    /// set, everything else in `001xxxxx` carries a new maximum table size
    /// in a 4 bit prefix.
    fn decode_context_update(&mut self, buf: &[u8]) -> HpackResult<usize> {
        if buf[0] == 0x30 {
            log::trace!("hpack: 清空引用集合");
            self.reference_set.clear();
            self.ref_not_emitted.clear();
            return Ok(1);
        }

        let (num, consumed) = integer::decode(4, buf)?;
        let evicted = self.table.set_max(num)?;
        self.reference_set.relative_comp(&evicted);
        self.ref_not_emitted.relative_comp(&evicted);

        Ok(consumed)
    }

    /// Adds a field to the table and drops any evicted entries from both
    /// sets. Returns whether the field actually made it into the table.
    fn add_field_process_evictions(&mut self, field: &HeaderField) -> HpackResult<bool> {
        let evicted = self.table.add(field);
        self.reference_set.relative_comp(&evicted);
        self.ref_not_emitted.relative_comp(&evicted);
        Ok(!evicted.is_full())
    }

    /// Once the block's octets are exhausted, the references that were not
    /// emitted during processing are emitted one per call, in stable
    /// order. Afterwards the not-emitted set rolls over to the full
    /// reference set, ready for the next block.
    fn final_reference_set(&mut self, field: &mut HeaderField) -> HpackResult<Option<usize>> {
        if self.finished {
            return Ok(None);
        }

        match self
            .table
            .iter_next(&self.ref_not_emitted, &mut self.iter_not_emitted)
        {
            None => {
                self.finished = true;
                self.ref_not_emitted = self.reference_set;
                self.iter_not_emitted.reset();
                Ok(None)
            }
            Some(idx) => {
                let (entry, _) = self.table.get(idx, false)?;
                *field = entry;
                // The iterator already passed it, removed for consistency
                // of the set contents.
                self.table.set_remove(&mut self.ref_not_emitted, idx);
                Ok(Some(0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_emits(
        decoder: &mut Decoder,
        buf: &[u8],
        offset: usize,
        name: &[u8],
        value: &[u8],
    ) -> usize {
        let mut field = HeaderField::new();
        let consumed = decoder
            .decode_field(buf, offset, &mut field)
            .unwrap()
            .unwrap();
        assert_eq!(field.name, name);
        assert_eq!(field.value, value);
        consumed
    }

    fn assert_block_done(decoder: &mut Decoder, buf: &[u8]) {
        let mut field = HeaderField::new();
        assert_eq!(decoder.decode_field(buf, buf.len(), &mut field), Ok(None));
        assert!(field.is_empty());
    }

    #[test]
    fn literal_with_indexing() {
        let raw = b"\x40\x0a\x63\x75\x73\x74\x6f\x6d\x2d\x6b\x65\x79\x0d\x63\x75\x73\x74\x6f\x6d\x2d\x68\x65\x61\x64\x65\x72";
        let mut decoder = Decoder::new();

        let consumed = assert_emits(&mut decoder, raw, 0, b"custom-key", b"custom-header");
        assert_eq!(consumed, raw.len());
        assert_block_done(&mut decoder, raw);

        assert_eq!(decoder.table().len(), 1);
        assert_eq!(decoder.table().get_size(), 55);
    }

    #[test]
    fn literal_with_false_length() {
        // A string length crafted to wrap a signed accumulator into a
        // negative number; must die in the integer decoder instead.
        let raw = b"\x40\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF\x63\x75\x73\x74\x6f\x6d\x2d\x6b\x65\x79\x0d\x63\x75\x73\x74\x6f\x6d\x2d\x68\x65\x61\x64\x65\x72";
        let mut decoder = Decoder::new();
        let mut field = HeaderField::new();

        let ret = decoder.decode_field(raw, 0, &mut field);
        assert_eq!(ret, Err(HpackError::IntegerOverflow));
        assert!(field.is_empty());
        assert_eq!(decoder.table().len(), 0);
    }

    #[test]
    fn literal_without_indexing() {
        let raw = b"\x04\x0c\x2f\x73\x61\x6d\x70\x6c\x65\x2f\x70\x61\x74\x68";
        let mut decoder = Decoder::new();

        let consumed = assert_emits(&mut decoder, raw, 0, b":path", b"/sample/path");
        assert_eq!(consumed, raw.len());
        assert_block_done(&mut decoder, raw);

        assert!(decoder.table().is_empty());
    }

    #[test]
    fn never_indexed_keeps_its_tag() {
        let raw = b"\x14\x0c\x2f\x73\x61\x6d\x70\x6c\x65\x2f\x70\x61\x74\x68";
        let mut decoder = Decoder::new();
        let mut field = HeaderField::new();

        decoder.decode_field(raw, 0, &mut field).unwrap();
        assert_eq!(field.flags.rep, Representation::NeverIndexed);
        assert!(decoder.table().is_empty());
    }

    #[test]
    fn indexed_static_entry() {
        let raw = b"\x82";
        let mut decoder = Decoder::new();

        let consumed = assert_emits(&mut decoder, raw, 0, b":method", b"GET");
        assert_eq!(consumed, 1);
        assert_block_done(&mut decoder, raw);

        // The static entry was copied into the dynamic table and entered
        // the reference set.
        assert_eq!(decoder.table().len(), 1);
        assert_eq!(decoder.table().get_size(), 42);
        assert!(!decoder.reference_set().is_empty());
    }

    #[test]
    fn indexed_zero_is_invalid() {
        let mut decoder = Decoder::new();
        let mut field = HeaderField::new();
        assert_eq!(
            decoder.decode_field(b"\x80", 0, &mut field),
            Err(HpackError::InvalidRepresentation)
        );
    }

    #[test]
    fn indexed_out_of_range() {
        let mut decoder = Decoder::new();
        let mut field = HeaderField::new();
        // 62 with an empty dynamic table is one past the static table.
        assert_eq!(
            decoder.decode_field(b"\xBE", 0, &mut field),
            Err(HpackError::IndexOutOfRange)
        );
    }

    #[test]
    fn indexed_big_value() {
        let raw = [0xFFu8; 10];
        let mut decoder = Decoder::new();
        let mut field = HeaderField::new();
        assert_eq!(
            decoder.decode_field(&raw, 0, &mut field),
            Err(HpackError::IntegerOverflow)
        );
    }

    #[test]
    fn indexed_many_zeroes() {
        let mut raw = [0x80u8; 256];
        raw[0] = 0xFF;
        raw[255] |= 1;
        let mut decoder = Decoder::new();
        let mut field = HeaderField::new();
        assert_eq!(
            decoder.decode_field(&raw, 0, &mut field),
            Err(HpackError::IntegerOverflow)
        );
    }

    #[test]
    fn request1_field_by_field() {
        let raw = b"\x82\x87\x86\x44\x0f\x77\x77\x77\x2e\x65\x78\x61\x6d\x70\x6c\x65\x2e\x63\x6f\x6d";
        let mut decoder = Decoder::new();
        let mut offset = 0;

        offset += assert_emits(&mut decoder, raw, offset, b":method", b"GET");
        assert_eq!(offset, 1);
        offset += assert_emits(&mut decoder, raw, offset, b":scheme", b"http");
        assert_eq!(offset, 2);
        offset += assert_emits(&mut decoder, raw, offset, b":path", b"/");
        assert_eq!(offset, 3);
        offset += assert_emits(&mut decoder, raw, offset, b":authority", b"www.example.com");
        assert_eq!(offset, raw.len());

        assert_block_done(&mut decoder, raw);
        assert_eq!(decoder.table().get_size(), 180);
        assert_eq!(decoder.table().len(), 4);
    }

    #[test]
    fn reference_set_toggle_removes() {
        let mut decoder = Decoder::new();
        let mut store = HeaderStore::new();
        decoder.decode(b"\x82", &mut store).unwrap();
        assert_eq!(store.len(), 1);

        // The same entry, now dynamic index 1 and inside the reference
        // set: the indexed representation toggles it off, and with an
        // empty reference set the block emits nothing at all.
        let mut store = HeaderStore::new();
        decoder.decode(b"\x81", &mut store).unwrap();
        assert_eq!(store.len(), 0);
        assert!(decoder.reference_set().is_empty());
    }

    #[test]
    fn max_size_update() {
        let mut decoder = Decoder::new();
        let mut store = HeaderStore::new();
        decoder.decode(b"\x82\x87", &mut store).unwrap();
        assert_eq!(decoder.table().len(), 2);

        // Shrink to 20 octets (prefix 15 + 5): everything is evicted and
        // the reference set is purged with it.
        let mut store = HeaderStore::new();
        decoder.decode(b"\x2F\x05", &mut store).unwrap();
        assert_eq!(decoder.table().len(), 0);
        assert_eq!(decoder.table().get_max_size(), 20);
        assert!(decoder.reference_set().is_empty());
    }

    #[test]
    fn max_size_above_limit_is_an_error() {
        let mut decoder = Decoder::new();
        let mut store = HeaderStore::new();
        // 0x2F + continuation: 15 + 8177 = 8192.
        let err = decoder.decode(b"\x2F\xF1\x3F", &mut store);
        assert_eq!(err, Err(HpackError::TableSizeExceedsLimit));
    }

    #[test]
    fn need_more_data_consumes_nothing() {
        let mut decoder = Decoder::new();
        let mut field = HeaderField::new();

        // Literal with indexing, value truncated mid-string.
        let partial = b"\x40\x0a\x63\x75\x73\x74\x6f\x6d\x2d\x6b\x65\x79\x0d\x63\x75";
        assert_eq!(
            decoder.decode_field(partial, 0, &mut field),
            Err(HpackError::NeedMoreData)
        );
        assert_eq!(decoder.table().len(), 0);
        assert!(decoder.reference_set().is_empty());

        // The retry with the full buffer succeeds from scratch.
        let raw = b"\x40\x0a\x63\x75\x73\x74\x6f\x6d\x2d\x6b\x65\x79\x0d\x63\x75\x73\x74\x6f\x6d\x2d\x68\x65\x61\x64\x65\x72";
        let consumed = assert_emits(&mut decoder, raw, 0, b"custom-key", b"custom-header");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn emitted_flags_follow_the_wire() {
        let mut decoder = Decoder::new();
        let mut field = HeaderField::new();

        let raw = b"\x04\x0c\x2f\x73\x61\x6d\x70\x6c\x65\x2f\x70\x61\x74\x68";
        decoder.decode_field(raw, 0, &mut field).unwrap();
        assert_eq!(field.flags.rep, Representation::WithoutIndexing);
        assert_eq!(field.flags.name, FieldSource::IndexedStatic);
        assert_eq!(field.flags.value, FieldSource::Literal);

        let raw = b"\x44\x8c\xf1\xe3\xc2\xe5\xf2\x3a\x6b\xa0\xab\x90\xf4\xff";
        decoder.decode_field(raw, 0, &mut field).unwrap();
        assert_eq!(field.flags.rep, Representation::IncIndexed);
        assert_eq!(field.flags.value, FieldSource::LiteralHuffman);
    }
}
