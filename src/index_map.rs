//! Old-to-new index and offset translation.
//!
//! One [`IndexMap`] exists per input image. Index tables (strings, types, protos,
//! fields, methods) are dense arrays filled in by the section merger as it consumes
//! each record. Offset-addressed blobs (type lists, annotations, annotation sets, ref
//! lists, directories) are keyed by their old file offset and only gain an entry when
//! the blob is actually written to the output.

use std::collections::HashMap;
use std::fmt;

use crate::error::{malformed, Error, Result};
use crate::format::encoded_value::{self, EncodedValue};
use crate::format::items::{
    Annotation, AnnotationElement, ClassDef, FieldId, MethodId, ProtoId, TypeList,
};
use crate::format::section::SectionReader;
use crate::format::toc::{SectionKind, TableOfContents};
use crate::format::NO_INDEX;

/// Tables addressed by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    String,
    Type,
    Proto,
    Field,
    Method,
}

impl IndexKind {
    pub fn name(self) -> &'static str {
        match self {
            IndexKind::String => "string",
            IndexKind::Type => "type",
            IndexKind::Proto => "proto",
            IndexKind::Field => "field",
            IndexKind::Method => "method",
        }
    }

    /// Largest index the format can address for this kind.
    pub fn max_index(self) -> u32 {
        match self {
            IndexKind::String => u32::MAX - 1,
            IndexKind::Type | IndexKind::Proto | IndexKind::Field | IndexKind::Method => 0xffff,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Blobs addressed by file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetKind {
    TypeList,
    Annotation,
    AnnotationSet,
    AnnotationSetRefList,
    AnnotationsDirectory,
}

impl OffsetKind {
    pub fn name(self) -> &'static str {
        match self {
            OffsetKind::TypeList => "type list",
            OffsetKind::Annotation => "annotation",
            OffsetKind::AnnotationSet => "annotation set",
            OffsetKind::AnnotationSetRefList => "annotation set ref list",
            OffsetKind::AnnotationsDirectory => "annotations directory",
        }
    }
}

/// Which input a record came from. A wins collisions under keep-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    A,
    B,
}

impl Source {
    pub const BOTH: [Source; 2] = [Source::A, Source::B];

    /// Position of this input in `[a, b]` pairs.
    pub fn index(self) -> usize {
        match self {
            Source::A => 0,
            Source::B => 1,
        }
    }
}

#[derive(Debug)]
pub struct IndexMap {
    string_ids: Vec<u32>,
    type_ids: Vec<u32>,
    proto_ids: Vec<u32>,
    field_ids: Vec<u32>,
    method_ids: Vec<u32>,
    type_list_offsets: HashMap<u32, u32>,
    annotation_offsets: HashMap<u32, u32>,
    annotation_set_offsets: HashMap<u32, u32>,
    annotation_set_ref_list_offsets: HashMap<u32, u32>,
    annotation_directory_offsets: HashMap<u32, u32>,
}

impl IndexMap {
    pub fn new(toc: &TableOfContents) -> Self {
        let table = |kind| vec![0u32; toc.section(kind).size as usize];
        // Offset 0 always means "none" and maps to itself.
        let none = || HashMap::from([(0, 0)]);
        Self {
            string_ids: table(SectionKind::StringIds),
            type_ids: table(SectionKind::TypeIds),
            proto_ids: table(SectionKind::ProtoIds),
            field_ids: table(SectionKind::FieldIds),
            method_ids: table(SectionKind::MethodIds),
            type_list_offsets: none(),
            annotation_offsets: HashMap::new(),
            annotation_set_offsets: none(),
            annotation_set_ref_list_offsets: none(),
            annotation_directory_offsets: none(),
        }
    }

    fn table(&self, kind: IndexKind) -> &Vec<u32> {
        match kind {
            IndexKind::String => &self.string_ids,
            IndexKind::Type => &self.type_ids,
            IndexKind::Proto => &self.proto_ids,
            IndexKind::Field => &self.field_ids,
            IndexKind::Method => &self.method_ids,
        }
    }

    fn offsets(&self, kind: OffsetKind) -> &HashMap<u32, u32> {
        match kind {
            OffsetKind::TypeList => &self.type_list_offsets,
            OffsetKind::Annotation => &self.annotation_offsets,
            OffsetKind::AnnotationSet => &self.annotation_set_offsets,
            OffsetKind::AnnotationSetRefList => &self.annotation_set_ref_list_offsets,
            OffsetKind::AnnotationsDirectory => &self.annotation_directory_offsets,
        }
    }

    /// Records that `old_index` of this input lands at `new_index` in the output.
    pub fn put_index(&mut self, kind: IndexKind, old_index: u32, new_index: u32) -> Result<()> {
        if new_index > kind.max_index() {
            return Err(Error::IndexOverflow {
                kind: kind.name(),
                index: new_index,
            });
        }
        let table = match kind {
            IndexKind::String => &mut self.string_ids,
            IndexKind::Type => &mut self.type_ids,
            IndexKind::Proto => &mut self.proto_ids,
            IndexKind::Field => &mut self.field_ids,
            IndexKind::Method => &mut self.method_ids,
        };
        let slot = table
            .get_mut(old_index as usize)
            .ok_or_else(|| malformed!("{} index {} out of range", kind, old_index))?;
        *slot = new_index;
        Ok(())
    }

    /// Records that the blob at `old_offset` of this input was written at `new_offset`.
    pub fn put_offset(&mut self, kind: OffsetKind, old_offset: u32, new_offset: u32) {
        debug_assert!(old_offset > 0 && new_offset > 0, "{} offsets must be positive", kind.name());
        let offsets = match kind {
            OffsetKind::TypeList => &mut self.type_list_offsets,
            OffsetKind::Annotation => &mut self.annotation_offsets,
            OffsetKind::AnnotationSet => &mut self.annotation_set_offsets,
            OffsetKind::AnnotationSetRefList => &mut self.annotation_set_ref_list_offsets,
            OffsetKind::AnnotationsDirectory => &mut self.annotation_directory_offsets,
        };
        offsets.insert(old_offset, new_offset);
    }

    pub fn translate_index(&self, kind: IndexKind, old_index: u32) -> Result<u32> {
        if old_index == NO_INDEX && matches!(kind, IndexKind::String | IndexKind::Type) {
            return Ok(NO_INDEX);
        }
        self.table(kind)
            .get(old_index as usize)
            .copied()
            .ok_or_else(|| malformed!("{} index {} out of range", kind, old_index))
    }

    /// Only valid once the merge phase for `kind` has run; before that every
    /// non-zero offset is unmapped.
    pub fn translate_offset(&self, kind: OffsetKind, old_offset: u32) -> Result<u32> {
        self.offsets(kind)
            .get(&old_offset)
            .copied()
            .ok_or_else(|| malformed!("no {} at offset 0x{:x}", kind.name(), old_offset))
    }

    pub fn has_offset(&self, kind: OffsetKind, old_offset: u32) -> bool {
        self.offsets(kind).contains_key(&old_offset)
    }

    fn translate_narrow(&self, kind: IndexKind, old_index: u16) -> Result<u16> {
        // put_index guarantees these tables only hold 16-bit values
        Ok(self.translate_index(kind, old_index as u32)? as u16)
    }

    pub fn remap_type_list(&self, type_list: &TypeList) -> Result<TypeList> {
        let types = type_list
            .types
            .iter()
            .map(|&t| self.translate_narrow(IndexKind::Type, t))
            .collect::<Result<_>>()?;
        Ok(TypeList { types })
    }

    pub fn remap_proto_id(&self, proto_id: &ProtoId) -> Result<ProtoId> {
        Ok(ProtoId {
            return_type_index: self.translate_index(IndexKind::Type, proto_id.return_type_index)?,
            parameters_off: self.translate_offset(OffsetKind::TypeList, proto_id.parameters_off)?,
            shorty_index: self.translate_index(IndexKind::String, proto_id.shorty_index)?,
        })
    }

    pub fn remap_field_id(&self, field_id: &FieldId) -> Result<FieldId> {
        Ok(FieldId {
            declaring_class_index: self.translate_narrow(IndexKind::Type, field_id.declaring_class_index)?,
            name_index: self.translate_index(IndexKind::String, field_id.name_index)?,
            type_index: self.translate_narrow(IndexKind::Type, field_id.type_index)?,
        })
    }

    pub fn remap_method_id(&self, method_id: &MethodId) -> Result<MethodId> {
        Ok(MethodId {
            declaring_class_index: self.translate_narrow(IndexKind::Type, method_id.declaring_class_index)?,
            name_index: self.translate_index(IndexKind::String, method_id.name_index)?,
            proto_index: self.translate_narrow(IndexKind::Proto, method_id.proto_index)?,
        })
    }

    /// Renumbers the fields a class def holds that are known before class defs are
    /// written: its type, supertype and interfaces.
    pub fn remap_class_def(&self, class_def: &ClassDef) -> Result<ClassDef> {
        Ok(ClassDef {
            type_index: self.translate_index(IndexKind::Type, class_def.type_index)?,
            supertype_index: self.translate_index(IndexKind::Type, class_def.supertype_index)?,
            interfaces_off: self.translate_offset(OffsetKind::TypeList, class_def.interfaces_off)?,
            ..*class_def
        })
    }

    pub fn remap_annotation(&self, annotation: &Annotation) -> Result<Annotation> {
        let elements = annotation
            .elements
            .iter()
            .map(|element| {
                Ok(AnnotationElement {
                    name_index: self.translate_index(IndexKind::String, element.name_index)?,
                    value: self.remap_encoded_value(&element.value)?,
                })
            })
            .collect::<Result<_>>()?;
        Ok(Annotation {
            type_index: self.translate_index(IndexKind::Type, annotation.type_index)?,
            visibility: annotation.visibility,
            elements,
        })
    }

    pub fn remap_encoded_value(&self, value: &EncodedValue) -> Result<EncodedValue> {
        let mut input = SectionReader::new(value.as_bytes(), 0);
        let mut out = Vec::with_capacity(value.as_bytes().len() + 4);
        encoded_value::transcode_value(&mut input, &mut out, &mut |kind, index| {
            self.translate_index(kind, index)
        })?;
        Ok(EncodedValue(out))
    }

    pub fn remap_encoded_array(&self, array: &EncodedValue) -> Result<EncodedValue> {
        let mut input = SectionReader::new(array.as_bytes(), 0);
        let mut out = Vec::with_capacity(array.as_bytes().len() + 4);
        encoded_value::transcode_array(&mut input, &mut out, &mut |kind, index| {
            self.translate_index(kind, index)
        })?;
        Ok(EncodedValue(out))
    }
}
