//! Capacity planning.
//!
//! Every output section is allocated before anything is written, so each needs a
//! byte budget up front. There are two ways to get one:
//! - [`WriterSizes::plan`] guesses pessimistically from the two inputs. Duplication
//!   between the inputs can't be predicted, and neither can the length of
//!   re-encoded ULEB128 indices and offsets.
//! - [`WriterSizes::measure`] takes exactly what a finished merge used. Compaction
//!   re-merges with these.

use crate::format::section::SectionWriter;
use crate::format::size_of;
use crate::format::toc::{SectionKind, TableOfContents, SECTION_COUNT};
use crate::layout::OutputLayout;

/// Byte budget per output section. Debug info is never written and has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSizes {
    pub header: u64,
    pub ids_defs: u64,
    pub map_list: u64,
    pub type_list: u64,
    pub annotation_set_ref_list: u64,
    pub annotation_set: u64,
    pub class_data: u64,
    pub code: u64,
    pub string_data: u64,
    pub annotation: u64,
    pub encoded_array: u64,
    pub annotations_directory: u64,
}

impl WriterSizes {
    /// Budgets for merging images with tables of contents `a` and `b`.
    pub fn plan(a: &TableOfContents, b: &TableOfContents) -> Self {
        let mut sizes = WriterSizes {
            header: size_of::HEADER_ITEM as u64,
            ids_defs: 0,
            map_list: (size_of::UINT + SECTION_COUNT as u32 * size_of::MAP_ITEM) as u64,
            type_list: 0,
            annotation_set_ref_list: 0,
            annotation_set: 0,
            class_data: 0,
            code: 0,
            string_data: 0,
            annotation: 0,
            encoded_array: 0,
            annotations_directory: 0,
        };
        sizes.add(a);
        sizes.add(b);
        sizes
    }

    fn add(&mut self, toc: &TableOfContents) {
        let count = |kind| toc.section(kind).size as u64;
        let bytes = |kind| toc.section(kind).byte_count as u64;

        self.ids_defs += count(SectionKind::StringIds) * size_of::STRING_ID_ITEM as u64
            + count(SectionKind::TypeIds) * size_of::TYPE_ID_ITEM as u64
            + count(SectionKind::ProtoIds) * size_of::PROTO_ID_ITEM as u64
            + count(SectionKind::FieldIds) * size_of::MEMBER_ID_ITEM as u64
            + count(SectionKind::MethodIds) * size_of::MEMBER_ID_ITEM as u64
            + count(SectionKind::ClassDefs) * size_of::CLASS_DEF_ITEM as u64;

        self.type_list += bytes(SectionKind::TypeLists);
        self.string_data += bytes(SectionKind::StringData);
        self.annotation_set += bytes(SectionKind::AnnotationSets);
        self.annotation_set_ref_list += bytes(SectionKind::AnnotationSetRefLists);
        self.annotations_directory += bytes(SectionKind::AnnotationsDirectories);

        // at most 1/4 of the bytes in a code section are uleb/sleb
        self.code += (bytes(SectionKind::Code) * 5).div_ceil(4);
        // at most 1/3 of the bytes in a class data section are uleb/sleb
        self.class_data += (bytes(SectionKind::ClassData) * 134).div_ceil(100);
        // all of the bytes in an encoded arrays section may be uleb/sleb
        self.encoded_array += bytes(SectionKind::EncodedArrays) * 2;
        // at most 1/3 of the bytes in an annotations section are uleb/sleb
        self.annotation += (bytes(SectionKind::Annotations) * 134).div_ceil(100);
    }

    /// The bytes a finished merge actually wrote to each section.
    pub fn measure(layout: &OutputLayout) -> Self {
        let used = |section: &SectionWriter| section.data().len() as u64;
        WriterSizes {
            header: used(&layout.header),
            ids_defs: used(&layout.ids_defs),
            map_list: used(&layout.map_list),
            type_list: used(&layout.type_list),
            annotation_set_ref_list: used(&layout.annotation_set_ref_list),
            annotation_set: used(&layout.annotation_set),
            class_data: used(&layout.class_data),
            code: used(&layout.code),
            string_data: used(&layout.string_data),
            annotation: used(&layout.annotation),
            encoded_array: used(&layout.encoded_array),
            annotations_directory: used(&layout.annotations_directory),
        }
    }

    pub fn total(&self) -> u64 {
        self.header
            + self.ids_defs
            + self.map_list
            + self.type_list
            + self.annotation_set_ref_list
            + self.annotation_set
            + self.class_data
            + self.code
            + self.string_data
            + self.annotation
            + self.encoded_array
            + self.annotations_directory
    }
}
