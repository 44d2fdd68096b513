
#[macro_use] extern crate bitflags;

pub mod integer;
pub mod huffman;
mod strings;
mod error;
mod field;
mod index_set;
mod table;
mod store;
mod decoder;
mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;

pub use error::{HpackError, HpackResult};
pub use field::{FieldFlags, FieldSource, HeaderField, Representation, HEADER_ENTRY_OVERHEAD};
pub use index_set::{IndexSet, SetCursor};
pub use store::HeaderStore;
pub use strings::{decode_string, encode_string};
pub use table::{HeaderTable, MAX_HEADER_TABLE_ENTRIES, SETTINGS_HEADER_TABLE_SIZE, STATIC_ENTRIES};
