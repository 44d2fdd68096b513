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
// Created Date: 2023/09/04 10:21:44

use std::{collections::TryReserveError, fmt, result};

/// 解析hpack头部块时可能出现的所有错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpackError {
    /// The buffer ended in the middle of a representation, retry with more
    /// input. Not fatal to the connection.
    NeedMoreData,
    /// A prefix integer used too many continuation octets or exceeded the
    /// 32-bit value range.
    IntegerOverflow,
    /// A huffman string contained the EOS symbol or an impossible code path.
    HuffmanInvalid,
    /// A huffman string ended on a partial symbol with padding that is not a
    /// prefix of EOS.
    HuffmanTruncated,
    /// An indexed representation referenced past the end of the combined
    /// index address space.
    IndexOutOfRange,
    /// A representation used a reserved pattern, such as an indexed field
    /// with index 0.
    InvalidRepresentation,
    /// The peer requested a table size above SETTINGS_HEADER_TABLE_SIZE.
    TableSizeExceedsLimit,
    /// Memory for a decoded string or stored field could not be reserved.
    OutOfMemory,
    /// A table lookup addressed an entry that does not exist.
    NotFound,
}

impl HpackError {
    #[inline]
    pub fn description_str(&self) -> &'static str {
        match self {
            HpackError::NeedMoreData => "need more data",
            HpackError::IntegerOverflow => "integer overflow",
            HpackError::HuffmanInvalid => "invalid huffman data",
            HpackError::HuffmanTruncated => "truncated huffman data",
            HpackError::IndexOutOfRange => "index out of range",
            HpackError::InvalidRepresentation => "invalid representation",
            HpackError::TableSizeExceedsLimit => "table size exceeds limit",
            HpackError::OutOfMemory => "out of memory",
            HpackError::NotFound => "not found",
        }
    }

    /// 是否只是数据不全,可重试
    pub fn is_partial(&self) -> bool {
        match self {
            HpackError::NeedMoreData => true,
            _ => false,
        }
    }
}

impl fmt::Display for HpackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description_str())
    }
}

impl From<TryReserveError> for HpackError {
    fn from(_: TryReserveError) -> Self {
        HpackError::OutOfMemory
    }
}

pub type HpackResult<T> = result::Result<T, HpackError>;
