//! Dex records.
//!
//! Plain values decoded from (and encoded to) sections. The derived orderings on the
//! id records are the orderings the format requires of their tables, so two sorted
//! inputs can be merged by comparing records directly.

use std::fmt;

use crate::format::encoded_value::EncodedValue;

/// A string, as UTF-16 code units. Ordered by code unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DexString {
    pub units: Vec<u16>,
}

impl DexString {
    pub fn new(text: &str) -> Self {
        Self {
            units: text.encode_utf16().collect(),
        }
    }
}

impl fmt::Display for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf16_lossy(&self.units))
    }
}

/// A `type_list`: parameter types of a proto or the interfaces of a class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TypeList {
    pub types: Vec<u16>,
}

impl TypeList {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A `proto_id_item`. Ordered by return type, then parameter list. Parameter lists
/// are compared by offset: the merged type list section is written in sorted order,
/// so offsets there order the same way contents do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtoId {
    pub return_type_index: u32,
    pub parameters_off: u32,
    pub shorty_index: u32,
}

/// A `field_id_item`. Ordered by declaring class, name, then type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldId {
    pub declaring_class_index: u16,
    pub name_index: u32,
    pub type_index: u16,
}

/// A `method_id_item`. Ordered by declaring class, name, then proto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodId {
    pub declaring_class_index: u16,
    pub name_index: u32,
    pub proto_index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDef {
    pub type_index: u32,
    pub access_flags: u32,
    pub supertype_index: u32,
    pub interfaces_off: u32,
    pub source_file_index: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotationElement {
    pub name_index: u32,
    pub value: EncodedValue,
}

/// An `annotation_item`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Annotation {
    pub type_index: u32,
    pub visibility: u8,
    pub elements: Vec<AnnotationElement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedField {
    pub field_index: u32,
    pub access_flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedMethod {
    pub method_index: u32,
    pub access_flags: u32,
    pub code_off: u32,
}

/// A `class_data_item`, with the delta-encoded member indices already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassData {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Try {
    pub start_address: u32,
    pub instruction_count: u16,
    /// Byte offset of the handler from the start of the handler list.
    pub handler_off: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchHandler {
    /// Byte offset of this handler from the start of the handler list.
    pub offset: u32,
    pub type_indexes: Vec<u32>,
    pub addresses: Vec<u32>,
    pub catch_all_address: Option<u32>,
}

/// A `code_item`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub debug_info_off: u32,
    pub instructions: Vec<u16>,
    pub tries: Vec<Try>,
    pub catch_handlers: Vec<CatchHandler>,
}
