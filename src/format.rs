//! Dex container format.
//!
//! Byte-level codecs and record types for Dalvik executables. The merge engine sits
//! on top of these and never touches raw bytes itself.
//! - `leb128`, `mutf8`: variable-length integer and string encodings.
//! - `section`: cursor-based readers and bounded, named output sections.
//! - `toc`: the header and map list (table of contents).
//! - `items`: fixed and variable records (ids, class defs, class data, code, ...).
//! - `encoded_value`: the `encoded_value` / `encoded_array` grammar.
//! - `image`: a parsed, fully resident dex image.

pub mod encoded_value;
pub mod image;
pub mod items;
pub mod leb128;
pub mod mutf8;
pub mod section;
pub mod toc;

/// Marker for an absent index (e.g. `java.lang.Object`'s supertype).
pub const NO_INDEX: u32 = 0xffff_ffff;

/// Byte sizes of the fixed-width records.
pub mod size_of {
    pub const UINT: u32 = 4;
    pub const HEADER_ITEM: u32 = 0x70;
    pub const STRING_ID_ITEM: u32 = UINT;
    pub const TYPE_ID_ITEM: u32 = UINT;
    pub const PROTO_ID_ITEM: u32 = UINT + UINT + UINT;
    pub const MEMBER_ID_ITEM: u32 = 2 + 2 + UINT;
    pub const CLASS_DEF_ITEM: u32 = 8 * UINT;
    pub const MAP_ITEM: u32 = 2 + 2 + UINT + UINT;
}
