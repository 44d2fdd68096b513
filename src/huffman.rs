//! The canonical hpack Huffman code over the byte alphabet plus an
//! end-of-string symbol. Encoding packs codewords most significant bit
//! first and pads the final octet with the high bits of EOS. Decoding runs
//! a table driven automaton over 4-bit nibbles, two transitions per input
//! octet; the transition table is derived once from the code table.

use lazy_static::lazy_static;

use crate::{HpackError, HpackResult};

/// EOS终止符, 30个全1比特
pub const EOS_VALUE: u32 = 0x3fffffff;
pub const EOS_LEN: u8 = 30;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct HuffmanFlag: u8 {
        /// The transition completes one symbol.
        const SYMBOL = 0x1;
        /// The destination state may legally end the input.
        const ACCEPTED = 0x2;
    }
}

/// One cell of the `state x nibble` transition table. A negative state is
/// the error sentinel: the walked bits passed through the EOS codeword.
#[derive(Copy, Clone, Debug)]
struct DecodeEntry {
    state: i16,
    flags: HuffmanFlag,
    sym: u8,
}

/// Encodes `src` into `out`, padding the last partial octet with the most
/// significant bits of the EOS codeword.
pub fn encode(src: &[u8], out: &mut Vec<u8>) {
    let mut current: u64 = 0;
    let mut bits: u32 = 0;

    for &b in src {
        let (code, len) = HUFFMAN_CODE_TABLE[b as usize];
        current = (current << len) | code as u64;
        bits += len as u32;
        while bits >= 8 {
            bits -= 8;
            out.push((current >> bits) as u8);
        }
    }

    if bits > 0 {
        let pad = 8 - bits;
        current = (current << pad) | (EOS_VALUE >> (EOS_LEN as u32 - pad)) as u64;
        out.push(current as u8);
    }
}

/// Decodes huffman data in full buffers; padding rules are applied at the
/// end of each `decode` call.
pub struct HuffmanDecoder;

impl HuffmanDecoder {
    pub fn new() -> HuffmanDecoder {
        HuffmanDecoder
    }

    /// Decodes the buffer `buf` into a newly allocated `Vec`.
    ///
    /// Fails with `HuffmanInvalid` when the bit stream walks into the EOS
    /// codeword, and with `HuffmanTruncated` when the input ends on a state
    /// whose pending bits are not a prefix of EOS (or are 8 or more bits of
    /// padding).
    pub fn decode(&mut self, buf: &[u8]) -> HpackResult<Vec<u8>> {
        let table = &*DECODE_TABLE;
        let mut state: i16 = 0;
        let mut accept = true;
        let mut out: Vec<u8> = Vec::new();
        // Worst case expansion is 8/5, one reserve up front avoids most of
        // the growth steps below.
        out.try_reserve(buf.len() * 2)?;

        for &b in buf {
            let mut nibble = b >> 4;
            for _ in 0..2 {
                let entry = &table[state as usize][nibble as usize];
                if entry.state < 0 {
                    return Err(HpackError::HuffmanInvalid);
                }
                if entry.flags.contains(HuffmanFlag::SYMBOL) {
                    if out.len() == out.capacity() {
                        out.try_reserve((out.len()).max(64))?;
                    }
                    out.push(entry.sym);
                }
                state = entry.state;
                accept = entry.flags.contains(HuffmanFlag::ACCEPTED);
                nibble = b & 0x0F;
            }
        }

        if !accept {
            return Err(HpackError::HuffmanTruncated);
        }
        Ok(out)
    }
}

/// Binary trie over the 257 codewords; leaves carry the symbol, 256 = EOS.
struct TrieNode {
    children: [i32; 2],
    symbol: i32,
}

fn build_trie() -> Vec<TrieNode> {
    fn blank() -> TrieNode {
        TrieNode {
            children: [-1, -1],
            symbol: -1,
        }
    }

    let mut nodes = vec![blank()];
    let insert = |nodes: &mut Vec<TrieNode>, code: u32, len: u8, symbol: i32| {
        let mut cur = 0usize;
        for k in (0..len).rev() {
            let bit = ((code >> k) & 1) as usize;
            if nodes[cur].children[bit] < 0 {
                nodes.push(blank());
                let id = (nodes.len() - 1) as i32;
                nodes[cur].children[bit] = id;
            }
            cur = nodes[cur].children[bit] as usize;
        }
        nodes[cur].symbol = symbol;
    };

    // The table carries EOS as its 257th entry, so the loop plants it too.
    for (symbol, &(code, len)) in HUFFMAN_CODE_TABLE.iter().enumerate() {
        insert(&mut nodes, code, len, symbol as i32);
    }
    nodes
}

/// Marks every node whose path from the root is up to 7 one-bits: ending
/// there means the remaining bits are valid EOS padding.
fn mark_accepted(trie: &[TrieNode]) -> Vec<bool> {
    let mut accepted = vec![false; trie.len()];
    let mut cur = 0usize;
    accepted[cur] = true;
    for _ in 0..7 {
        let next = trie[cur].children[1];
        if next < 0 {
            break;
        }
        cur = next as usize;
        if trie[cur].symbol >= 0 {
            break;
        }
        accepted[cur] = true;
    }
    accepted
}

fn build_decode_table() -> Vec<[DecodeEntry; 16]> {
    let trie = build_trie();
    let accepted = mark_accepted(&trie);

    // States are the trie nodes reachable on nibble boundaries, numbered in
    // discovery order with the root as state 0.
    let mut state_of_node = vec![-1i16; trie.len()];
    let mut states = vec![0usize];
    state_of_node[0] = 0;

    let sentinel = DecodeEntry {
        state: -1,
        flags: HuffmanFlag::empty(),
        sym: 0,
    };

    let mut table: Vec<[DecodeEntry; 16]> = Vec::new();
    let mut i = 0;
    while i < states.len() {
        let node = states[i];
        let mut row = [sentinel; 16];

        'nibble: for nibble in 0..16u8 {
            let mut cur = node;
            let mut sym = -1i32;
            for k in (0..4).rev() {
                let bit = ((nibble >> k) & 1) as usize;
                let next = trie[cur].children[bit];
                if next < 0 {
                    continue 'nibble;
                }
                let next = next as usize;
                if trie[next].symbol >= 0 {
                    if trie[next].symbol == 256 {
                        // EOS encoded inside the stream.
                        continue 'nibble;
                    }
                    sym = trie[next].symbol;
                    cur = 0;
                } else {
                    cur = next;
                }
            }

            if state_of_node[cur] < 0 {
                state_of_node[cur] = states.len() as i16;
                states.push(cur);
            }

            let mut flags = HuffmanFlag::empty();
            if sym >= 0 {
                flags |= HuffmanFlag::SYMBOL;
            }
            if accepted[cur] {
                flags |= HuffmanFlag::ACCEPTED;
            }
            row[nibble as usize] = DecodeEntry {
                state: state_of_node[cur],
                flags,
                sym: if sym >= 0 { sym as u8 } else { 0 },
            };
        }

        table.push(row);
        i += 1;
    }

    table
}

lazy_static! {
    static ref DECODE_TABLE: Vec<[DecodeEntry; 16]> = build_decode_table();
}

/// hpack static Huffman code, indexed by symbol.
static HUFFMAN_CODE_TABLE: &'static [(u32, u8)] = &[
    (0x1ff8, 13),
    (0x7fffd8, 23),
    (0xfffffe2, 28),
    (0xfffffe3, 28),
    (0xfffffe4, 28),
    (0xfffffe5, 28),
    (0xfffffe6, 28),
    (0xfffffe7, 28),
    (0xfffffe8, 28),
    (0xffffea, 24),
    (0x3ffffffc, 30),
    (0xfffffe9, 28),
    (0xfffffea, 28),
    (0x3ffffffd, 30),
    (0xfffffeb, 28),
    (0xfffffec, 28),
    (0xfffffed, 28),
    (0xfffffee, 28),
    (0xfffffef, 28),
    (0xffffff0, 28),
    (0xffffff1, 28),
    (0xffffff2, 28),
    (0x3ffffffe, 30),
    (0xffffff3, 28),
    (0xffffff4, 28),
    (0xffffff5, 28),
    (0xffffff6, 28),
    (0xffffff7, 28),
    (0xffffff8, 28),
    (0xffffff9, 28),
    (0xffffffa, 28),
    (0xffffffb, 28),
    (0x14, 6), // ' '
    (0x3f8, 10),
    (0x3f9, 10),
    (0xffa, 12),
    (0x1ff9, 13),
    (0x15, 6),
    (0xf8, 8),
    (0x7fa, 11),
    (0x3fa, 10),
    (0x3fb, 10),
    (0xf9, 8),
    (0x7fb, 11),
    (0xfa, 8),
    (0x16, 6), // '-'
    (0x17, 6), // '.'
    (0x18, 6), // '/'
    (0x0, 5), // '0'
    (0x1, 5),
    (0x2, 5),
    (0x19, 6),
    (0x1a, 6),
    (0x1b, 6),
    (0x1c, 6),
    (0x1d, 6),
    (0x1e, 6),
    (0x1f, 6), // '9'
    (0x5c, 7), // ':'
    (0xfb, 8),
    (0x7ffc, 15),
    (0x20, 6), // '='
    (0xffb, 12),
    (0x3fc, 10),
    (0x1ffa, 13),
    (0x21, 6), // 'A'
    (0x5d, 7),
    (0x5e, 7),
    (0x5f, 7),
    (0x60, 7),
    (0x61, 7),
    (0x62, 7),
    (0x63, 7),
    (0x64, 7),
    (0x65, 7),
    (0x66, 7),
    (0x67, 7),
    (0x68, 7), // 'M'
    (0x69, 7),
    (0x6a, 7),
    (0x6b, 7),
    (0x6c, 7),
    (0x6d, 7),
    (0x6e, 7),
    (0x6f, 7),
    (0x70, 7),
    (0x71, 7),
    (0x72, 7),
    (0xfc, 8),
    (0x73, 7),
    (0xfd, 8), // 'Z'
    (0x1ffb, 13),
    (0x7fff0, 19),
    (0x1ffc, 13),
    (0x3ffc, 14),
    (0x22, 6), // '_'
    (0x7ffd, 15),
    (0x3, 5), // 'a'
    (0x23, 6),
    (0x4, 5),
    (0x24, 6),
    (0x5, 5),
    (0x25, 6),
    (0x26, 6),
    (0x27, 6),
    (0x6, 5), // 'i'
    (0x74, 7),
    (0x75, 7),
    (0x28, 6),
    (0x29, 6),
    (0x2a, 6),
    (0x7, 5), // 'o'
    (0x2b, 6),
    (0x76, 7),
    (0x2c, 6),
    (0x8, 5), // 's'
    (0x9, 5), // 't'
    (0x2d, 6),
    (0x77, 7),
    (0x78, 7),
    (0x79, 7),
    (0x7a, 7),
    (0x7b, 7), // 'z'
    (0x7ffe, 15),
    (0x7fc, 11),
    (0x3ffd, 14),
    (0x1ffd, 13),
    (0xffffffc, 28),
    (0xfffe6, 20),
    (0x3fffd2, 22),
    (0xfffe7, 20),
    (0xfffe8, 20),
    (0x3fffd3, 22),
    (0x3fffd4, 22),
    (0x3fffd5, 22),
    (0x7fffd9, 23),
    (0x3fffd6, 22),
    (0x7fffda, 23),
    (0x7fffdb, 23),
    (0x7fffdc, 23),
    (0x7fffdd, 23),
    (0x7fffde, 23),
    (0xffffeb, 24),
    (0x7fffdf, 23),
    (0xffffec, 24),
    (0xffffed, 24),
    (0x3fffd7, 22),
    (0x7fffe0, 23),
    (0xffffee, 24),
    (0x7fffe1, 23),
    (0x7fffe2, 23),
    (0x7fffe3, 23),
    (0x7fffe4, 23),
    (0x1fffdc, 21),
    (0x3fffd8, 22),
    (0x7fffe5, 23),
    (0x3fffd9, 22),
    (0x7fffe6, 23),
    (0x7fffe7, 23),
    (0xffffef, 24),
    (0x3fffda, 22),
    (0x1fffdd, 21),
    (0xfffe9, 20),
    (0x3fffdb, 22),
    (0x3fffdc, 22),
    (0x7fffe8, 23),
    (0x7fffe9, 23),
    (0x1fffde, 21),
    (0x7fffea, 23),
    (0x3fffdd, 22),
    (0x3fffde, 22),
    (0xfffff0, 24),
    (0x1fffdf, 21),
    (0x3fffdf, 22),
    (0x7fffeb, 23),
    (0x7fffec, 23),
    (0x1fffe0, 21),
    (0x1fffe1, 21),
    (0x3fffe0, 22),
    (0x1fffe2, 21),
    (0x7fffed, 23),
    (0x3fffe1, 22),
    (0x7fffee, 23),
    (0x7fffef, 23),
    (0xfffea, 20),
    (0x3fffe2, 22),
    (0x3fffe3, 22),
    (0x3fffe4, 22),
    (0x7ffff0, 23),
    (0x3fffe5, 22),
    (0x3fffe6, 22),
    (0x7ffff1, 23),
    (0x3ffffe0, 26),
    (0x3ffffe1, 26),
    (0xfffeb, 20),
    (0x7fff1, 19),
    (0x3fffe7, 22),
    (0x7ffff2, 23),
    (0x3fffe8, 22),
    (0x1ffffec, 25),
    (0x3ffffe2, 26),
    (0x3ffffe3, 26),
    (0x3ffffe4, 26),
    (0x7ffffde, 27),
    (0x7ffffdf, 27),
    (0x3ffffe5, 26),
    (0xfffff1, 24),
    (0x1ffffed, 25),
    (0x7fff2, 19),
    (0x1fffe3, 21),
    (0x3ffffe6, 26),
    (0x7ffffe0, 27),
    (0x7ffffe1, 27),
    (0x3ffffe7, 26),
    (0x7ffffe2, 27),
    (0xfffff2, 24),
    (0x1fffe4, 21),
    (0x1fffe5, 21),
    (0x3ffffe8, 26),
    (0x3ffffe9, 26),
    (0xffffffd, 28),
    (0x7ffffe3, 27),
    (0x7ffffe4, 27),
    (0x7ffffe5, 27),
    (0xfffec, 20),
    (0xfffff3, 24),
    (0xfffed, 20),
    (0x1fffe6, 21),
    (0x3fffe9, 22),
    (0x1fffe7, 21),
    (0x1fffe8, 21),
    (0x7ffff3, 23),
    (0x3fffea, 22),
    (0x3fffeb, 22),
    (0x1ffffee, 25),
    (0x1ffffef, 25),
    (0xfffff4, 24),
    (0xfffff5, 24),
    (0x3ffffea, 26),
    (0x7ffff4, 23),
    (0x3ffffeb, 26),
    (0x7ffffe6, 27),
    (0x3ffffec, 26),
    (0x3ffffed, 26),
    (0x7ffffe7, 27),
    (0x7ffffe8, 27),
    (0x7ffffe9, 27),
    (0x7ffffea, 27),
    (0x7ffffeb, 27),
    (0xffffffe, 28),
    (0x7ffffec, 27),
    (0x7ffffed, 27),
    (0x7ffffee, 27),
    (0x7ffffef, 27),
    (0x7fffff0, 27),
    (0x3ffffee, 26),
    (0x3fffffff, 30), // EOS
];
