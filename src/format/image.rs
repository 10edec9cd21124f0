//! A resident dex image.
//!
//! Inputs borrow the caller's bytes (typically a memory map); the merge result owns its
//! buffer. Either way the table of contents is parsed once up front, and record access
//! goes through bounds-checked [`SectionReader`]s.

use std::borrow::Cow;

use crate::error::{malformed, Result};
use crate::format::encoded_value::EncodedValue;
use crate::format::items::{
    ClassData, ClassDef, Code, DexString, EncodedMethod, FieldId, MethodId, ProtoId, TypeList,
};
use crate::format::section::SectionReader;
use crate::format::size_of;
use crate::format::toc::{SectionKind, TableOfContents};
use crate::hasher;

pub struct DexImage<'a> {
    data: Cow<'a, [u8]>,
    toc: TableOfContents,
}

impl<'a> DexImage<'a> {
    /// Parses the header and map list of `data`.
    pub fn parse(data: impl Into<Cow<'a, [u8]>>) -> Result<Self> {
        let data = data.into();
        let toc = TableOfContents::read_from(&data)?;
        Ok(Self { data, toc })
    }

    /// An image defining nothing. Merging with it is the identity (modulo layout).
    pub fn empty() -> DexImage<'static> {
        DexImage {
            data: Cow::Owned(Vec::new()),
            toc: TableOfContents::default(),
        }
    }

    pub fn toc(&self) -> &TableOfContents {
        &self.toc
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_owned()
    }

    /// Number of classes defined.
    pub fn class_def_count(&self) -> u32 {
        self.toc.section(SectionKind::ClassDefs).size
    }

    /// True when the stored Adler-32 checksum matches the contents.
    pub fn verify_checksum(&self) -> bool {
        self.data.len() >= 12 && hasher::checksum(&self.data) == self.toc.checksum
    }

    pub fn open(&self, offset: u32) -> Result<SectionReader<'_>> {
        if offset as usize > self.data.len() {
            return Err(malformed!("offset 0x{:x} past end of file (0x{:x})", offset, self.data.len()));
        }
        Ok(SectionReader::new(&self.data, offset))
    }

    fn open_entry(&self, kind: SectionKind, index: u32, width: u32) -> Result<SectionReader<'_>> {
        let section = self.toc.section(kind);
        if index >= section.size {
            return Err(malformed!("{} index {} out of range (size {})", kind, index, section.size));
        }
        let offset = index
            .checked_mul(width)
            .and_then(|rel| rel.checked_add(section.off))
            .ok_or_else(|| malformed!("{} entry {} overflows", kind, index))?;
        self.open(offset)
    }

    pub fn string(&self, index: u32) -> Result<DexString> {
        self.open_entry(SectionKind::StringIds, index, size_of::STRING_ID_ITEM)?
            .read_string()
    }

    pub fn strings(&self) -> Result<Vec<DexString>> {
        (0..self.toc.section(SectionKind::StringIds).size)
            .map(|i| self.string(i))
            .collect()
    }

    /// The string index backing a type id.
    pub fn type_descriptor_index(&self, type_index: u32) -> Result<u32> {
        self.open_entry(SectionKind::TypeIds, type_index, size_of::TYPE_ID_ITEM)?
            .read_u32()
    }

    /// The descriptor of a type, such as `Ljava/lang/Object;`.
    pub fn type_name(&self, type_index: u32) -> Result<DexString> {
        self.string(self.type_descriptor_index(type_index)?)
    }

    pub fn type_names(&self) -> Result<Vec<DexString>> {
        (0..self.toc.section(SectionKind::TypeIds).size)
            .map(|i| self.type_name(i))
            .collect()
    }

    pub fn proto_ids(&self) -> Result<Vec<ProtoId>> {
        self.read_all(SectionKind::ProtoIds, |r| r.read_proto_id())
    }

    pub fn field_ids(&self) -> Result<Vec<FieldId>> {
        self.read_all(SectionKind::FieldIds, |r| r.read_field_id())
    }

    pub fn method_ids(&self) -> Result<Vec<MethodId>> {
        self.read_all(SectionKind::MethodIds, |r| r.read_method_id())
    }

    pub fn class_defs(&self) -> Result<Vec<ClassDef>> {
        self.read_all(SectionKind::ClassDefs, |r| r.read_class_def())
    }

    fn read_all<T>(
        &self,
        kind: SectionKind,
        mut read: impl FnMut(&mut SectionReader<'_>) -> Result<T>,
    ) -> Result<Vec<T>> {
        let section = self.toc.section(kind);
        if !section.exists() {
            return Ok(Vec::new());
        }
        let mut reader = self.open(section.off)?;
        (0..section.size).map(|_| read(&mut reader)).collect()
    }

    pub fn read_type_list(&self, offset: u32) -> Result<TypeList> {
        if offset == 0 {
            return Ok(TypeList::default());
        }
        self.open(offset)?.read_type_list()
    }

    pub fn read_class_data(&self, class_def: &ClassDef) -> Result<ClassData> {
        if class_def.class_data_off == 0 {
            return Ok(ClassData::default());
        }
        self.open(class_def.class_data_off)?.read_class_data()
    }

    pub fn read_code(&self, method: &EncodedMethod) -> Result<Option<Code>> {
        if method.code_off == 0 {
            return Ok(None);
        }
        self.open(method.code_off)?.read_code().map(Some)
    }

    pub fn read_static_values(&self, class_def: &ClassDef) -> Result<Option<EncodedValue>> {
        if class_def.static_values_off == 0 {
            return Ok(None);
        }
        self.open(class_def.static_values_off)?
            .read_encoded_array()
            .map(Some)
    }
}
