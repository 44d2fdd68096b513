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
// Created Date: 2023/09/06 09:15:52

//! The header table behind every decoder and encoder: the fixed static
//! table plus the per-connection dynamic table.
//!
//! The dynamic table lives in two circular buffers. One holds the raw
//! field data, each entry prefixed by a small info header (name length,
//! value length, flags); the other holds the offset of each entry inside
//! the data buffer. Both are powers of two so `(p + k) & mask` walks them.
//!
//! hpack indexes renumber on every insertion (the newest entry is always
//! 1), which is useless for set bookkeeping. Internally entries keep the
//! stable index of their offset slot, assigned at insertion; the
//! translation between the two spaces is `(tail - i) & mask` and works in
//! both directions. Every public operation speaks hpack indexes and
//! translates at the boundary, sets always store stable indexes.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::field::{FieldFlags, FieldSource, HeaderField, Representation, HEADER_ENTRY_OVERHEAD};
use crate::index_set::{IndexSet, SetCursor};
use crate::{HpackError, HpackResult};

/// 默认的header最大长度值, 动态表不可超过此值
pub const SETTINGS_HEADER_TABLE_SIZE: usize = 4_096;

/// 动态表的最大条目数
pub const MAX_HEADER_TABLE_ENTRIES: usize = 128;

/// The number of entries in the static table.
pub const STATIC_ENTRIES: usize = 61;

const HEADER_DATA_SIZE: usize = SETTINGS_HEADER_TABLE_SIZE;
const HEADER_DATA_MASK: usize = HEADER_DATA_SIZE - 1;
const HEADER_OFFSETS_MASK: usize = MAX_HEADER_TABLE_ENTRIES - 1;

/// Serialized in front of each entry in the data ring.
const FIELD_INFO_SIZE: usize = 5;

struct FieldInfo {
    name_len: u16,
    value_len: u16,
    flags: u8,
}

impl FieldInfo {
    fn footprint(&self) -> usize {
        FIELD_INFO_SIZE + self.name_len as usize + self.value_len as usize
    }

    fn entry_size(&self) -> usize {
        self.name_len as usize + self.value_len as usize + HEADER_ENTRY_OVERHEAD
    }
}

/// Static Table (B Appendix). The first dynamic entry is index 1, the
/// static table follows at `num_dynamic + 1 .. num_dynamic + 61`.
static STATIC_TABLE_RAW: &'static [(&'static str, &'static str); STATIC_ENTRIES] = &[
    /* 01 */ (":authority", ""),
    /* 02 */ (":method", "GET"),
    /* 03 */ (":method", "POST"),
    /* 04 */ (":path", "/"),
    /* 05 */ (":path", "/index.html"),
    /* 06 */ (":scheme", "http"),
    /* 07 */ (":scheme", "https"),
    /* 08 */ (":status", "200"),
    /* 09 */ (":status", "204"),
    /* 0A */ (":status", "206"),
    /* 0B */ (":status", "304"),
    /* 0C */ (":status", "400"),
    /* 0D */ (":status", "404"),
    /* 0E */ (":status", "500"),
    /* 0F */ ("accept-charset", ""),
    /* 10 */ ("accept-encoding", ""),
    /* 11 */ ("accept-language", ""),
    /* 12 */ ("accept-ranges", ""),
    /* 13 */ ("accept", ""),
    /* 14 */ ("access-control-allow-origin", ""),
    /* 15 */ ("age", ""),
    /* 16 */ ("allow", ""),
    /* 17 */ ("authorization", ""),
    /* 18 */ ("cache-control", ""),
    /* 19 */ ("content-disposition", ""),
    /* 1A */ ("content-encoding", ""),
    /* 1B */ ("content-language", ""),
    /* 1C */ ("content-length", ""),
    /* 1D */ ("content-location", ""),
    /* 1E */ ("content-range", ""),
    /* 1F */ ("content-type", ""),
    /* 20 */ ("cookie", ""),
    /* 21 */ ("date", ""),
    /* 22 */ ("etag", ""),
    /* 23 */ ("expect", ""),
    /* 24 */ ("expires", ""),
    /* 25 */ ("from", ""),
    /* 26 */ ("host", ""),
    /* 27 */ ("if-match", ""),
    /* 28 */ ("if-modified-since", ""),
    /* 29 */ ("if-none-match", ""),
    /* 2A */ ("if-range", ""),
    /* 2B */ ("if-unmodified-since", ""),
    /* 2C */ ("last-modified", ""),
    /* 2D */ ("link", ""),
    /* 2E */ ("location", ""),
    /* 2F */ ("max-forwards", ""),
    /* 30 */ ("proxy-authenticate", ""),
    /* 31 */ ("proxy-authorization", ""),
    /* 32 */ ("range", ""),
    /* 33 */ ("referer", ""),
    /* 34 */ ("refresh", ""),
    /* 35 */ ("retry-after", ""),
    /* 36 */ ("server", ""),
    /* 37 */ ("set-cookie", ""),
    /* 38 */ ("strict-transport-security", ""),
    /* 39 */ ("transfer-encoding", ""),
    /* 3A */ ("user-agent", ""),
    /* 3B */ ("vary", ""),
    /* 3C */ ("via", ""),
    /* 3D */ ("www-authenticate", ""),
];

lazy_static! {
    /// name -> [(static position 1..=61, value)], for the encoder's lookups.
    static ref STATIC_NAME_MAP: HashMap<&'static [u8], Vec<(usize, &'static [u8])>> = {
        let mut m: HashMap<&'static [u8], Vec<(usize, &'static [u8])>> = HashMap::new();
        for (pos, &(name, value)) in STATIC_TABLE_RAW.iter().enumerate() {
            m.entry(name.as_bytes())
                .or_insert_with(Vec::new)
                .push((pos + 1, value.as_bytes()));
        }
        m
    };
}

#[derive(Clone)]
pub struct HeaderTable {
    /// Offset of each entry inside the data ring, indexed by stable index.
    offsets: [u16; MAX_HEADER_TABLE_ENTRIES],
    offs_head: u16,
    offs_tail: u16,
    /// Raw field data: info header, name octets, value octets per entry.
    data: [u8; HEADER_DATA_SIZE],
    data_head: u16,
    data_tail: u16,
    num_headers: u16,
    /// Size per hpack accounting (name + value + 32 per entry), not the
    /// octets of the ring actually occupied.
    used_data: u16,
    max_data: u16,
}

impl HeaderTable {
    pub fn new() -> HeaderTable {
        HeaderTable {
            offsets: [0; MAX_HEADER_TABLE_ENTRIES],
            offs_head: 0,
            offs_tail: 0,
            data: [0; HEADER_DATA_SIZE],
            data_head: 0,
            data_tail: 0,
            num_headers: 0,
            used_data: 0,
            max_data: SETTINGS_HEADER_TABLE_SIZE as u16,
        }
    }

    /// Drops every entry. The maximum size setting survives.
    pub fn clear(&mut self) {
        self.offs_head = 0;
        self.offs_tail = 0;
        self.data_head = 0;
        self.data_tail = 0;
        self.num_headers = 0;
        self.used_data = 0;
    }

    pub fn len(&self) -> usize {
        self.num_headers as usize
    }

    pub fn is_empty(&self) -> bool {
        self.used_data == 0
    }

    /// Current size per hpack accounting.
    pub fn get_size(&self) -> usize {
        self.used_data as usize
    }

    pub fn get_max_size(&self) -> usize {
        self.max_data as usize
    }

    /// Converts an hpack index to a stable index or back, they are the two
    /// halves of the same involution around the offsets tail.
    #[inline]
    pub fn hpack_to_stable(&self, idx: usize) -> usize {
        (self.offs_tail as usize + MAX_HEADER_TABLE_ENTRIES - idx) & HEADER_OFFSETS_MASK
    }

    #[inline]
    pub fn stable_to_hpack(&self, idx: usize) -> usize {
        (self.offs_tail as usize + MAX_HEADER_TABLE_ENTRIES - idx) & HEADER_OFFSETS_MASK
    }

    /// Adds a field, evicting from the head until it fits. The returned
    /// set holds the stable indexes of the evicted entries; a full set
    /// means the field was larger than the whole table, which empties the
    /// table and is not an error.
    pub fn add(&mut self, field: &HeaderField) -> IndexSet {
        let mut evicted_set = IndexSet::new(false);
        let field_size = field.table_size();

        if field_size > self.max_data as usize {
            log::trace!("hpack: 添加的头部超过动态表上限, 清空整个表; size={}", field_size);
            self.clear();
            evicted_set.fill();
            return evicted_set;
        }

        while field_size > (self.max_data - self.used_data) as usize {
            // There must be entries left, otherwise the field would fit.
            evicted_set.add(self.evict());
        }

        debug_assert!(self.num_headers < (MAX_HEADER_TABLE_ENTRIES - 1) as u16);

        self.offsets[self.offs_tail as usize] = self.data_tail;
        self.offs_tail = ((self.offs_tail as usize + 1) & HEADER_OFFSETS_MASK) as u16;

        let name_len = (field.name.len() as u16).to_le_bytes();
        let value_len = (field.value.len() as u16).to_le_bytes();
        let info = [
            name_len[0],
            name_len[1],
            value_len[0],
            value_len[1],
            field.flags.to_bits(),
        ];
        self.data_add(&info);
        self.data_add(&field.name);
        if !field.value.is_empty() {
            self.data_add(&field.value);
        }

        self.used_data += field_size as u16;
        self.num_headers += 1;

        evicted_set
    }

    /// Applies a new maximum size. Zero empties the table; anything above
    /// `SETTINGS_HEADER_TABLE_SIZE` is refused. Evicted stable indexes are
    /// returned like in `add`.
    pub fn set_max(&mut self, max: u32) -> HpackResult<IndexSet> {
        let mut evicted_set = IndexSet::new(false);

        if max > SETTINGS_HEADER_TABLE_SIZE as u32 {
            return Err(HpackError::TableSizeExceedsLimit);
        }

        if max == 0 {
            for k in 0..self.num_headers as usize {
                evicted_set.add((self.offs_head as usize + k) & HEADER_OFFSETS_MASK);
            }
            self.clear();
        } else {
            while (max as u16) < self.used_data {
                evicted_set.add(self.evict());
            }
        }

        log::trace!("hpack: 动态表的最大长度修改为{}", max);
        self.max_data = max as u16;
        Ok(evicted_set)
    }

    /// Looks an entry up in the combined index address space. Static
    /// entries come back flagged `is_static` true.
    pub fn get(&self, idx: usize, only_name: bool) -> HpackResult<(HeaderField, bool)> {
        if idx == 0 || idx > self.num_headers as usize + STATIC_ENTRIES {
            return Err(HpackError::NotFound);
        }

        if idx > self.num_headers as usize {
            let (name, value) = STATIC_TABLE_RAW[idx - self.num_headers as usize - 1];
            let field = HeaderField {
                flags: FieldFlags {
                    rep: Representation::Indexed,
                    name: FieldSource::IndexedStatic,
                    value: FieldSource::IndexedStatic,
                },
                name: name.as_bytes().to_vec(),
                value: if only_name {
                    Vec::new()
                } else {
                    value.as_bytes().to_vec()
                },
            };
            return Ok((field, true));
        }

        let stable = self.hpack_to_stable(idx);
        Ok((self.get_stable(stable, only_name)?, false))
    }

    /// Looks a dynamic entry up by its stable index.
    pub fn get_stable(&self, stable: usize, only_name: bool) -> HpackResult<HeaderField> {
        if stable >= MAX_HEADER_TABLE_ENTRIES {
            return Err(HpackError::NotFound);
        }
        let hpack = self.stable_to_hpack(stable);
        if hpack == 0 || hpack > self.num_headers as usize {
            return Err(HpackError::NotFound);
        }

        let mut offset = self.offsets[stable];
        let info = self.info_at(offset);
        offset = ((offset as usize + FIELD_INFO_SIZE) & HEADER_DATA_MASK) as u16;

        let mut field = HeaderField::new();
        field.flags = FieldFlags::from_bits(info.flags);
        self.data_get(offset, info.name_len as usize, &mut field.name);

        if !only_name && info.value_len > 0 {
            offset = ((offset as usize + info.name_len as usize) & HEADER_DATA_MASK) as u16;
            self.data_get(offset, info.value_len as usize, &mut field.value);
        }

        Ok(field)
    }

    /// Adds an hpack index to a set.
    pub fn set_add(&self, set: &mut IndexSet, idx: usize) {
        set.add(self.hpack_to_stable(idx));
    }

    /// Removes an hpack index from a set.
    pub fn set_remove(&self, set: &mut IndexSet, idx: usize) {
        set.remove(self.hpack_to_stable(idx));
    }

    /// Checks an hpack index against a set.
    pub fn set_exists(&self, set: &IndexSet, idx: usize) -> bool {
        set.contains(self.hpack_to_stable(idx))
    }

    /// Yields the set's next member in stable order, translated to its
    /// current hpack index.
    pub fn iter_next(&self, set: &IndexSet, cursor: &mut SetCursor) -> Option<usize> {
        set.next_index(cursor).map(|stable| self.stable_to_hpack(stable))
    }

    /// Finds the lowest hpack index carrying this header. Returns the
    /// index and whether the value matched too (`false` = name only).
    pub fn find(&self, name: &[u8], value: &[u8]) -> Option<(usize, bool)> {
        let mut name_match = None;

        for idx in 1..=self.num_headers as usize {
            match self.get(idx, false) {
                Ok((entry, _)) => {
                    if entry.name == name {
                        if entry.value == value {
                            return Some((idx, true));
                        }
                        if name_match.is_none() {
                            name_match = Some(idx);
                        }
                    }
                }
                Err(_) => break,
            }
        }

        if let Some(entries) = STATIC_NAME_MAP.get(name) {
            for &(pos, entry_value) in entries.iter() {
                if entry_value == value {
                    return Some((self.num_headers as usize + pos, true));
                }
            }
            if name_match.is_none() {
                name_match = Some(self.num_headers as usize + entries[0].0);
            }
        }

        name_match.map(|idx| (idx, false))
    }

    /// A human readable listing of the dynamic table, newest first.
    pub fn repr(&self) -> String {
        let mut output = String::from("hpack_header_table\n");
        for idx in 1..=self.num_headers as usize {
            if let Ok((field, _)) = self.get(idx, false) {
                output.push_str(&format!("  [{:03}] {}\r\n", idx, field));
            }
        }
        output
    }

    /// Removes the oldest entry, advancing both ring heads in lockstep.
    fn evict(&mut self) -> usize {
        debug_assert!(self.num_headers > 0);

        let evicted = self.offs_head as usize;
        debug_assert_eq!(self.data_head, self.offsets[evicted]);

        self.offs_head = ((self.offs_head as usize + 1) & HEADER_OFFSETS_MASK) as u16;

        let info = self.info_at(self.offsets[evicted]);
        self.data_head = ((self.data_head as usize + info.footprint()) & HEADER_DATA_MASK) as u16;

        self.num_headers -= 1;
        self.used_data -= info.entry_size() as u16;

        log::trace!("hpack: 动态表淘汰数据; stable={}", evicted);
        evicted
    }

    fn info_at(&self, offset: u16) -> FieldInfo {
        let mut raw = [0u8; FIELD_INFO_SIZE];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = self.data[(offset as usize + i) & HEADER_DATA_MASK];
        }
        FieldInfo {
            name_len: u16::from_le_bytes([raw[0], raw[1]]),
            value_len: u16::from_le_bytes([raw[2], raw[3]]),
            flags: raw[4],
        }
    }

    fn data_add(&mut self, bytes: &[u8]) {
        let tail = self.data_tail as usize;
        let to_end = HEADER_DATA_SIZE - tail;
        let n = bytes.len().min(to_end);
        self.data[tail..tail + n].copy_from_slice(&bytes[..n]);
        if n < bytes.len() {
            self.data[..bytes.len() - n].copy_from_slice(&bytes[n..]);
        }
        self.data_tail = ((tail + bytes.len()) & HEADER_DATA_MASK) as u16;
    }

    fn data_get(&self, offset: u16, len: usize, dst: &mut Vec<u8>) {
        let offset = offset as usize;
        let to_end = HEADER_DATA_SIZE - offset;
        let n = len.min(to_end);
        dst.extend_from_slice(&self.data[offset..offset + n]);
        if n < len {
            dst.extend_from_slice(&self.data[..len - n]);
        }
    }
}
