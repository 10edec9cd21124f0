//! Merging one table of records from both inputs.
//!
//! Id tables (strings, types, protos, fields, methods) are sorted within each input
//! and are merged with two cursors, one record from each side in memory at a time.
//! Type lists and annotations carry no ordering guarantee and are merged by reading
//! everything, sorting, and collapsing equal runs.
//!
//! Records are renumbered into output indices as they are read, so two records
//! compare equal exactly when they would be written identically.

use crate::error::Result;
use crate::format::image::DexImage;
use crate::format::items::{Annotation, DexString, FieldId, MethodId, ProtoId, TypeList};
use crate::format::section::SectionReader;
use crate::format::toc::{SectionKind, TableOfContents};
use crate::index_map::{IndexKind, IndexMap, OffsetKind, Source};
use crate::layout::OutputLayout;

/// The tables merged record by record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Strings,
    Types,
    TypeLists,
    Protos,
    Fields,
    Methods,
    Annotations,
}

/// One decoded record, already renumbered into output indices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Record {
    String(DexString),
    /// A type id: the output index of its descriptor string.
    Type(u32),
    TypeList(TypeList),
    Proto(ProtoId),
    Field(FieldId),
    Method(MethodId),
    Annotation(Annotation),
}

impl IdKind {
    pub fn section(self) -> SectionKind {
        match self {
            IdKind::Strings => SectionKind::StringIds,
            IdKind::Types => SectionKind::TypeIds,
            IdKind::TypeLists => SectionKind::TypeLists,
            IdKind::Protos => SectionKind::ProtoIds,
            IdKind::Fields => SectionKind::FieldIds,
            IdKind::Methods => SectionKind::MethodIds,
            IdKind::Annotations => SectionKind::Annotations,
        }
    }

    /// Absolute offset the next record of this kind will be written at.
    fn out_position(self, out: &OutputLayout) -> u32 {
        match self {
            IdKind::TypeLists => out.type_list.position(),
            IdKind::Annotations => out.annotation.position(),
            IdKind::Strings | IdKind::Types | IdKind::Protos | IdKind::Fields | IdKind::Methods => {
                out.ids_defs.position()
            }
        }
    }

    fn read(self, input: &mut SectionReader<'_>, index_map: &IndexMap) -> Result<Record> {
        Ok(match self {
            IdKind::Strings => Record::String(input.read_string()?),
            IdKind::Types => {
                let descriptor_index = input.read_u32()?;
                Record::Type(index_map.translate_index(IndexKind::String, descriptor_index)?)
            }
            IdKind::TypeLists => Record::TypeList(index_map.remap_type_list(&input.read_type_list()?)?),
            IdKind::Protos => Record::Proto(index_map.remap_proto_id(&input.read_proto_id()?)?),
            IdKind::Fields => Record::Field(index_map.remap_field_id(&input.read_field_id()?)?),
            IdKind::Methods => Record::Method(index_map.remap_method_id(&input.read_method_id()?)?),
            IdKind::Annotations => {
                Record::Annotation(index_map.remap_annotation(&input.read_annotation()?)?)
            }
        })
    }

    /// Records that the input record at `old_index` (found at `old_offset`) now
    /// lives at `new_index` (written at `new_offset`).
    fn update_index(
        self,
        index_map: &mut IndexMap,
        old_index: u32,
        old_offset: u32,
        new_index: u32,
        new_offset: u32,
    ) -> Result<()> {
        match self {
            IdKind::Strings => index_map.put_index(IndexKind::String, old_index, new_index),
            IdKind::Types => index_map.put_index(IndexKind::Type, old_index, new_index),
            IdKind::Protos => index_map.put_index(IndexKind::Proto, old_index, new_index),
            IdKind::Fields => index_map.put_index(IndexKind::Field, old_index, new_index),
            IdKind::Methods => index_map.put_index(IndexKind::Method, old_index, new_index),
            IdKind::TypeLists => {
                index_map.put_offset(OffsetKind::TypeList, old_offset, new_offset);
                Ok(())
            }
            IdKind::Annotations => {
                index_map.put_offset(OffsetKind::Annotation, old_offset, new_offset);
                Ok(())
            }
        }
    }
}

impl Record {
    fn write(&self, out: &mut OutputLayout) -> Result<()> {
        match self {
            Record::String(value) => {
                let data_off = out.string_data.position();
                out.ids_defs.write_u32(data_off)?;
                out.string_data.write_string_data(value)
            }
            Record::Type(descriptor_index) => out.ids_defs.write_u32(*descriptor_index),
            Record::TypeList(value) => out.type_list.write_type_list(value),
            Record::Proto(value) => out.ids_defs.write_proto_id(value),
            Record::Field(value) => out.ids_defs.write_field_id(value),
            Record::Method(value) => out.ids_defs.write_method_id(value),
            Record::Annotation(value) => out.annotation.write_annotation(value),
        }
    }
}

/// A cursor over one input's table of `kind`.
struct SortedInput<'s> {
    reader: Option<SectionReader<'s>>,
    size: u32,
    index: u32,
    offset: u32,
    head: Option<Record>,
}

impl<'s> SortedInput<'s> {
    fn open(image: &'s DexImage<'_>, kind: IdKind) -> Result<Self> {
        let section = *image.toc().section(kind.section());
        let reader = if section.exists() {
            Some(image.open(section.off)?)
        } else {
            None
        };
        Ok(Self {
            reader,
            size: section.size,
            index: 0,
            offset: 0,
            head: None,
        })
    }

    /// Loads the next record unless one is already waiting.
    fn fill(&mut self, kind: IdKind, index_map: &IndexMap) -> Result<()> {
        if self.head.is_some() || self.index >= self.size {
            return Ok(());
        }
        if let Some(reader) = self.reader.as_mut() {
            self.offset = reader.position();
            self.head = Some(kind.read(reader, index_map)?);
        }
        Ok(())
    }
}

/// Merges an id table that both inputs store in ascending order, reading only
/// two records into memory at a time. Equal records are written once.
pub fn merge_sorted(
    kind: IdKind,
    inputs: [&DexImage<'_>; 2],
    index_maps: &mut [IndexMap; 2],
    out: &mut OutputLayout,
    contents: &mut TableOfContents,
) -> Result<u32> {
    contents.section_mut(kind.section()).off = kind.out_position(out);

    let mut a = SortedInput::open(inputs[Source::A.index()], kind)?;
    let mut b = SortedInput::open(inputs[Source::B.index()], kind)?;
    let [a_index_map, b_index_map] = index_maps;
    let mut out_count = 0u32;

    loop {
        a.fill(kind, a_index_map)?;
        b.fill(kind, b_index_map)?;

        // Write the smaller of a and b. If they're equal, write only once
        let (advance_a, advance_b) = match (&a.head, &b.head) {
            (Some(x), Some(y)) => (x <= y, x >= y),
            (x, y) => (x.is_some(), y.is_some()),
        };

        let mut to_write = None;
        if advance_a {
            let new_offset = kind.out_position(out);
            kind.update_index(a_index_map, a.index, a.offset, out_count, new_offset)?;
            a.index += 1;
            to_write = a.head.take();
        }
        if advance_b {
            let new_offset = kind.out_position(out);
            kind.update_index(b_index_map, b.index, b.offset, out_count, new_offset)?;
            b.index += 1;
            to_write = b.head.take();
        }
        let Some(record) = to_write else {
            break;
        };
        record.write(out)?;
        out_count += 1;
    }

    contents.section_mut(kind.section()).size = out_count;
    Ok(out_count)
}

/// A record of an unsorted section together with where it came from.
struct UnsortedValue {
    source: Source,
    index: u32,
    offset: u32,
    record: Record,
}

fn read_unsorted_values(
    kind: IdKind,
    source: Source,
    image: &DexImage<'_>,
    index_map: &IndexMap,
) -> Result<Vec<UnsortedValue>> {
    let section = *image.toc().section(kind.section());
    if !section.exists() {
        return Ok(Vec::new());
    }
    let mut reader = image.open(section.off)?;
    let mut values = Vec::with_capacity(section.size as usize);
    for index in 0..section.size {
        let offset = reader.position();
        let record = kind.read(&mut reader, index_map)?;
        values.push(UnsortedValue {
            source,
            index,
            offset,
            record,
        });
    }
    Ok(values)
}

/// Merges a table with no ordering guarantee by reading both inputs completely,
/// sorting, and writing each distinct record once. Every input record maps to the
/// single copy of its value.
pub fn merge_unsorted(
    kind: IdKind,
    inputs: [&DexImage<'_>; 2],
    index_maps: &mut [IndexMap; 2],
    out: &mut OutputLayout,
    contents: &mut TableOfContents,
) -> Result<u32> {
    contents.section_mut(kind.section()).off = kind.out_position(out);

    let mut all = Vec::new();
    for source in Source::BOTH {
        let i = source.index();
        all.extend(read_unsorted_values(kind, source, inputs[i], &index_maps[i])?);
    }
    all.sort_by(|x, y| x.record.cmp(&y.record));

    let mut out_count = 0u32;
    let mut values = all.into_iter().peekable();
    while let Some(first) = values.next() {
        let new_offset = kind.out_position(out);
        kind.update_index(&mut index_maps[first.source.index()], first.index, first.offset, out_count, new_offset)?;
        while let Some(duplicate) = values.next_if(|next| next.record == first.record) {
            let index_map = &mut index_maps[duplicate.source.index()];
            kind.update_index(index_map, duplicate.index, duplicate.offset, out_count, new_offset)?;
        }
        first.record.write(out)?;
        out_count += 1;
    }

    contents.section_mut(kind.section()).size = out_count;
    Ok(out_count)
}
