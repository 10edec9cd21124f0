//! Output layout.
//!
//! The merged image is a fixed sequence of sections placed back to back, each
//! allocated its planned budget before any writing starts. Budget a section did not
//! use stays in the file as zero padding; compaction is what reclaims it.

use crate::error::{Error, Result};
use crate::format::section::SectionWriter;
use crate::sizes::WriterSizes;

/// The output sections, in file order.
pub struct OutputLayout {
    pub header: SectionWriter,
    /// String, type, proto, field and method ids, then class defs.
    pub ids_defs: SectionWriter,
    pub map_list: SectionWriter,
    pub type_list: SectionWriter,
    pub annotation_set_ref_list: SectionWriter,
    pub annotation_set: SectionWriter,
    pub class_data: SectionWriter,
    pub code: SectionWriter,
    pub string_data: SectionWriter,
    pub annotation: SectionWriter,
    pub encoded_array: SectionWriter,
    pub annotations_directory: SectionWriter,
}

impl OutputLayout {
    /// Places every section at the end of the previous one. Each section's limit is
    /// rounded up to four bytes, so every section starts aligned.
    pub fn new(sizes: &WriterSizes) -> Result<Self> {
        let mut next = 0u32;
        let mut allocate = |name: &'static str, budget: u64| -> Result<SectionWriter> {
            let fits = u32::try_from(budget)
                .ok()
                .and_then(|budget| next.checked_add(budget)?.checked_add(3).map(|_| budget));
            let Some(budget) = fits else {
                return Err(Error::CapacityOverrun {
                    section: name,
                    limit: u32::MAX,
                    requested: budget as usize,
                });
            };
            let section = SectionWriter::new(name, next, budget);
            next = section.limit();
            Ok(section)
        };

        Ok(Self {
            header: allocate("header", sizes.header)?,
            ids_defs: allocate("ids defs", sizes.ids_defs)?,
            map_list: allocate("map list", sizes.map_list)?,
            type_list: allocate("type list", sizes.type_list)?,
            annotation_set_ref_list: allocate("annotation set ref list", sizes.annotation_set_ref_list)?,
            annotation_set: allocate("annotation sets", sizes.annotation_set)?,
            class_data: allocate("class data", sizes.class_data)?,
            code: allocate("code", sizes.code)?,
            string_data: allocate("string data", sizes.string_data)?,
            annotation: allocate("annotation", sizes.annotation)?,
            encoded_array: allocate("encoded array", sizes.encoded_array)?,
            annotations_directory: allocate("annotations directory", sizes.annotations_directory)?,
        })
    }

    fn sections(&self) -> [&SectionWriter; 12] {
        [
            &self.header,
            &self.ids_defs,
            &self.map_list,
            &self.type_list,
            &self.annotation_set_ref_list,
            &self.annotation_set,
            &self.class_data,
            &self.code,
            &self.string_data,
            &self.annotation,
            &self.encoded_array,
            &self.annotations_directory,
        ]
    }

    /// Length of the assembled image: every section up to its limit.
    pub fn file_size(&self) -> u32 {
        self.annotations_directory.limit()
    }

    /// Copies every section into one buffer at its absolute offset.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut buffer = vec![0u8; self.file_size() as usize];
        for section in self.sections() {
            let start = section.base() as usize;
            buffer[start..start + section.data().len()].copy_from_slice(section.data());
            tracing::trace!(
                "{}: 0x{:x}..0x{:x} ({} of {} bytes used)",
                section.name(),
                section.base(),
                section.limit(),
                section.data().len(),
                section.limit() - section.base()
            );
        }
        buffer
    }
}
