//! Core merge logic.
//!
//! This module contains the `DexMerger` struct which orchestrates the entire merge:
//! 1. Planning: size every output section from the two inputs' tables of contents.
//! 2. Ids: merge strings, types, type lists, protos, fields and methods, filling in
//!    each input's index map as records are consumed.
//! 3. Annotations: merge annotations, then copy annotation sets and directories.
//! 4. Classes: order class defs by inheritance depth and write each with its class
//!    data, code and static values renumbered.
//! 5. Output: write the header and map list, then the signature and checksum.
//!
//! Phases run in exactly this order; each one relies on the index map entries the
//! earlier ones recorded.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::class_order::{self, SortableClass};
use crate::config::{CollisionPolicy, MergeOptions};
use crate::error::{malformed, Error, Result};
use crate::format::image::DexImage;
use crate::format::items::{CatchHandler, ClassData, ClassDef, Code, EncodedField, EncodedMethod};
use crate::format::leb128;
use crate::format::section::SectionReader;
use crate::format::toc::{magic_for_version, SectionKind, TableOfContents, TocSection};
use crate::hasher;
use crate::id_merger::{self, IdKind};
use crate::index_map::{IndexKind, IndexMap, OffsetKind, Source};
use crate::instructions;
use crate::layout::OutputLayout;
use crate::sizes::WriterSizes;

/// Merges two dex images into one.
pub struct DexMerger<'a> {
    inputs: [&'a DexImage<'a>; 2],
    options: MergeOptions,
    sizes: WriterSizes,
    layout: OutputLayout,
    contents: TableOfContents,
    index_maps: [IndexMap; 2],
}

impl<'a> DexMerger<'a> {
    pub fn new(dex_a: &'a DexImage<'a>, dex_b: &'a DexImage<'a>, options: MergeOptions) -> Result<Self> {
        let sizes = WriterSizes::plan(dex_a.toc(), dex_b.toc());
        Self::with_sizes(dex_a, dex_b, options, sizes)
    }

    fn with_sizes(
        dex_a: &'a DexImage<'a>,
        dex_b: &'a DexImage<'a>,
        options: MergeOptions,
        sizes: WriterSizes,
    ) -> Result<Self> {
        let layout = OutputLayout::new(&sizes)?;

        let mut contents = TableOfContents::default();
        contents.magic = magic_for_version(dex_a.toc().version().max(dex_b.toc().version()));
        contents.data_off = layout.map_list.base();
        *contents.section_mut(SectionKind::Header) = TocSection {
            off: 0,
            size: 1,
            byte_count: 0,
        };
        *contents.section_mut(SectionKind::MapList) = TocSection {
            off: layout.map_list.base(),
            size: 1,
            byte_count: 0,
        };
        // Sections written outside the id mergers start at their base; their
        // counts grow as records are written.
        for (kind, base) in [
            (SectionKind::AnnotationSetRefLists, layout.annotation_set_ref_list.base()),
            (SectionKind::AnnotationSets, layout.annotation_set.base()),
            (SectionKind::ClassData, layout.class_data.base()),
            (SectionKind::Code, layout.code.base()),
            (SectionKind::StringData, layout.string_data.base()),
            (SectionKind::EncodedArrays, layout.encoded_array.base()),
            (SectionKind::AnnotationsDirectories, layout.annotations_directory.base()),
        ] {
            contents.section_mut(kind).off = base;
        }

        Ok(Self {
            inputs: [dex_a, dex_b],
            options,
            sizes,
            layout,
            index_maps: [IndexMap::new(dex_a.toc()), IndexMap::new(dex_b.toc())],
            contents,
        })
    }

    /// Runs the merge. If the pessimistic first pass wasted more than the
    /// configured threshold, the result is merged again with exact budgets.
    pub fn merge(self) -> Result<DexImage<'static>> {
        let options = self.options;
        let planned = self.sizes;
        let (result, used) = self.merge_dex_images()?;

        let wasted = planned.total().saturating_sub(used.total());
        if wasted <= options.compact_waste_threshold as u64 {
            debug!("Wasted {} bytes; not compacting", wasted);
            return Ok(result);
        }

        let empty = DexImage::empty();
        let compact_options = MergeOptions {
            collision_policy: CollisionPolicy::Fail,
            ..options
        };
        let compacter = DexMerger::with_sizes(&result, &empty, compact_options, used)?;
        let (compacted, _) = compacter.merge_dex_images()?;
        info!(
            "Result compacted from {:.1}KiB to {:.1}KiB to save {:.1}KiB",
            result.len() as f64 / 1024.0,
            compacted.len() as f64 / 1024.0,
            wasted as f64 / 1024.0
        );
        Ok(compacted)
    }

    /// One full pass. Returns the image and the bytes each section really used.
    fn merge_dex_images(mut self) -> Result<(DexImage<'static>, WriterSizes)> {
        self.merge_string_ids()?;
        self.merge_id_table(IdKind::Types)?;
        self.merge_id_table(IdKind::TypeLists)?;
        self.merge_id_table(IdKind::Protos)?;
        self.merge_id_table(IdKind::Fields)?;
        self.merge_id_table(IdKind::Methods)?;
        self.merge_id_table(IdKind::Annotations)?;
        self.union_annotation_sets_and_directories()?;
        self.merge_class_defs()?;
        self.write_header_and_map()?;

        let used = WriterSizes::measure(&self.layout);
        let mut bytes = self.layout.into_bytes();
        hasher::write_hashes(&mut bytes);
        Ok((DexImage::parse(bytes)?, used))
    }

    fn merge_string_ids(&mut self) -> Result<()> {
        let count = self.merge_id_table(IdKind::Strings)?;
        self.contents.section_mut(SectionKind::StringData).size = count;
        Ok(())
    }

    fn merge_id_table(&mut self, kind: IdKind) -> Result<u32> {
        let count = match kind {
            IdKind::TypeLists | IdKind::Annotations => id_merger::merge_unsorted(
                kind,
                self.inputs,
                &mut self.index_maps,
                &mut self.layout,
                &mut self.contents,
            )?,
            _ => id_merger::merge_sorted(
                kind,
                self.inputs,
                &mut self.index_maps,
                &mut self.layout,
                &mut self.contents,
            )?,
        };
        debug!("Merged {}: {} entries", kind.section(), count);
        Ok(count)
    }

    /// Copies annotation sets from each input to the output, then directories.
    /// Sets are not deduplicated across inputs.
    fn union_annotation_sets_and_directories(&mut self) -> Result<()> {
        for source in Source::BOTH {
            self.transform_annotation_sets(source)?;
        }
        for source in Source::BOTH {
            self.transform_annotation_directories(source)?;
        }
        debug!(
            "Merged annotation sets: {}, directories: {}, ref lists: {}",
            self.contents.section(SectionKind::AnnotationSets).size,
            self.contents.section(SectionKind::AnnotationsDirectories).size,
            self.contents.section(SectionKind::AnnotationSetRefLists).size
        );
        Ok(())
    }

    fn transform_annotation_sets(&mut self, source: Source) -> Result<()> {
        let image = self.inputs[source.index()];
        let section = *image.toc().section(SectionKind::AnnotationSets);
        if !section.exists() {
            return Ok(());
        }
        let mut set_in = image.open(section.off)?;
        for _ in 0..section.size {
            self.transform_annotation_set(source, &mut set_in)?;
        }
        Ok(())
    }

    /// Transforms all annotations on a single type, member or parameter.
    fn transform_annotation_set(&mut self, source: Source, set_in: &mut SectionReader<'_>) -> Result<()> {
        let index_map = &mut self.index_maps[source.index()];
        let out = &mut self.layout.annotation_set;
        out.assert_four_byte_aligned()?;
        set_in.align_to_four_bytes();
        index_map.put_offset(OffsetKind::AnnotationSet, set_in.position(), out.position());

        let size = set_in.read_u32()?;
        out.write_u32(size)?;
        for _ in 0..size {
            let annotation_off = set_in.read_u32()?;
            out.write_u32(index_map.translate_offset(OffsetKind::Annotation, annotation_off)?)?;
        }
        self.contents.section_mut(SectionKind::AnnotationSets).size += 1;
        Ok(())
    }

    fn transform_annotation_directories(&mut self, source: Source) -> Result<()> {
        let image = self.inputs[source.index()];
        let section = *image.toc().section(SectionKind::AnnotationsDirectories);
        if !section.exists() {
            return Ok(());
        }
        let mut directory_in = image.open(section.off)?;
        for _ in 0..section.size {
            self.transform_annotation_directory(source, &mut directory_in)?;
        }
        Ok(())
    }

    /// Transforms all annotations on a class.
    fn transform_annotation_directory(
        &mut self,
        source: Source,
        directory_in: &mut SectionReader<'_>,
    ) -> Result<()> {
        directory_in.align_to_four_bytes();
        let old_offset = directory_in.position();
        let class_annotations_off = directory_in.read_u32()?;
        let fields_size = directory_in.read_u32()?;
        let methods_size = directory_in.read_u32()?;
        let parameters_size = directory_in.read_u32()?;
        let mut read_pairs = |count: u32| -> Result<Vec<(u32, u32)>> {
            (0..count)
                .map(|_| Ok((directory_in.read_u32()?, directory_in.read_u32()?)))
                .collect()
        };
        let fields = read_pairs(fields_size)?;
        let methods = read_pairs(methods_size)?;
        let parameters = read_pairs(parameters_size)?;

        // Parameter ref lists live in their own section and are written first.
        let mut parameter_ref_lists = Vec::with_capacity(parameters.len());
        for &(method_index, ref_list_off) in &parameters {
            parameter_ref_lists.push((method_index, self.transform_ref_list(source, ref_list_off)?));
        }

        let index_map = &mut self.index_maps[source.index()];
        let out = &mut self.layout.annotations_directory;
        out.assert_four_byte_aligned()?;
        index_map.put_offset(OffsetKind::AnnotationsDirectory, old_offset, out.position());

        out.write_u32(index_map.translate_offset(OffsetKind::AnnotationSet, class_annotations_off)?)?;
        out.write_u32(fields_size)?;
        out.write_u32(methods_size)?;
        out.write_u32(parameters_size)?;
        for (field_index, set_off) in fields {
            out.write_u32(index_map.translate_index(IndexKind::Field, field_index)?)?;
            out.write_u32(index_map.translate_offset(OffsetKind::AnnotationSet, set_off)?)?;
        }
        for (method_index, set_off) in methods {
            out.write_u32(index_map.translate_index(IndexKind::Method, method_index)?)?;
            out.write_u32(index_map.translate_offset(OffsetKind::AnnotationSet, set_off)?)?;
        }
        for (method_index, ref_list_off) in parameter_ref_lists {
            out.write_u32(index_map.translate_index(IndexKind::Method, method_index)?)?;
            out.write_u32(ref_list_off)?;
        }
        self.contents.section_mut(SectionKind::AnnotationsDirectories).size += 1;
        Ok(())
    }

    /// Writes the parameter annotation list at `old_offset` unless this input's copy
    /// was already written for another directory, and returns its new offset.
    fn transform_ref_list(&mut self, source: Source, old_offset: u32) -> Result<u32> {
        let index_map = &mut self.index_maps[source.index()];
        if index_map.has_offset(OffsetKind::AnnotationSetRefList, old_offset) {
            return index_map.translate_offset(OffsetKind::AnnotationSetRefList, old_offset);
        }

        let mut ref_list_in = self.inputs[source.index()].open(old_offset)?;
        let out = &mut self.layout.annotation_set_ref_list;
        out.assert_four_byte_aligned()?;
        let new_offset = out.position();

        let size = ref_list_in.read_u32()?;
        out.write_u32(size)?;
        for _ in 0..size {
            let set_off = ref_list_in.read_u32()?;
            out.write_u32(index_map.translate_offset(OffsetKind::AnnotationSet, set_off)?)?;
        }
        index_map.put_offset(OffsetKind::AnnotationSetRefList, old_offset, new_offset);
        self.contents.section_mut(SectionKind::AnnotationSetRefLists).size += 1;
        Ok(new_offset)
    }

    fn merge_class_defs(&mut self) -> Result<()> {
        let types = class_order::sorted_classes(
            self.inputs,
            &self.index_maps,
            self.contents.section(SectionKind::TypeIds).size,
            self.options.collision_policy,
        )?;
        *self.contents.section_mut(SectionKind::ClassDefs) = TocSection {
            off: self.layout.ids_defs.position(),
            size: types.len() as u32,
            byte_count: 0,
        };

        for class in &types {
            self.transform_class_def(class)?;
        }
        debug!(
            "Merged class defs: {} ({} with class data, {} code items)",
            types.len(),
            self.contents.section(SectionKind::ClassData).size,
            self.contents.section(SectionKind::Code).size
        );
        Ok(())
    }

    /// Writes a class def along with its class data and static values.
    fn transform_class_def(&mut self, class: &SortableClass) -> Result<()> {
        let source = class.source;
        let image = self.inputs[source.index()];
        let class_def = &class.class_def;

        let index_map = &self.index_maps[source.index()];
        let remapped = ClassDef {
            source_file_index: index_map.translate_index(IndexKind::String, class_def.source_file_index)?,
            annotations_off: index_map
                .translate_offset(OffsetKind::AnnotationsDirectory, class_def.annotations_off)?,
            ..index_map.remap_class_def(class_def)?
        };

        let class_data_off = if class_def.class_data_off == 0 {
            0
        } else {
            let offset = self.layout.class_data.position();
            let class_data = image.read_class_data(class_def)?;
            self.transform_class_data(source, image, &class_data)?;
            offset
        };

        let static_values_off = match image.read_static_values(class_def)? {
            None => 0,
            Some(values) => {
                let offset = self.layout.encoded_array.position();
                let values = self.index_maps[source.index()].remap_encoded_array(&values)?;
                self.layout.encoded_array.write_bytes(values.as_bytes())?;
                self.contents.section_mut(SectionKind::EncodedArrays).size += 1;
                offset
            }
        };

        self.layout.ids_defs.write_class_def(&ClassDef {
            class_data_off,
            static_values_off,
            ..remapped
        })
    }

    fn transform_class_data(&mut self, source: Source, image: &DexImage<'_>, class_data: &ClassData) -> Result<()> {
        let out = &mut self.layout.class_data;
        out.write_uleb128(class_data.static_fields.len() as u32)?;
        out.write_uleb128(class_data.instance_fields.len() as u32)?;
        out.write_uleb128(class_data.direct_methods.len() as u32)?;
        out.write_uleb128(class_data.virtual_methods.len() as u32)?;

        self.transform_fields(source, &class_data.static_fields)?;
        self.transform_fields(source, &class_data.instance_fields)?;
        self.transform_methods(source, image, &class_data.direct_methods)?;
        self.transform_methods(source, image, &class_data.virtual_methods)?;
        self.contents.section_mut(SectionKind::ClassData).size += 1;
        Ok(())
    }

    fn transform_fields(&mut self, source: Source, fields: &[EncodedField]) -> Result<()> {
        let index_map = &self.index_maps[source.index()];
        let out = &mut self.layout.class_data;
        let mut last_out_field_index = 0;
        for field in fields {
            let out_field_index = index_map.translate_index(IndexKind::Field, field.field_index)?;
            out.write_uleb128(member_index_diff(out_field_index, last_out_field_index)?)?;
            last_out_field_index = out_field_index;
            out.write_uleb128(field.access_flags)?;
        }
        Ok(())
    }

    fn transform_methods(&mut self, source: Source, image: &DexImage<'_>, methods: &[EncodedMethod]) -> Result<()> {
        let mut last_out_method_index = 0;
        for method in methods {
            let out_method_index = self.index_maps[source.index()].translate_index(IndexKind::Method, method.method_index)?;
            let out = &mut self.layout.class_data;
            out.write_uleb128(member_index_diff(out_method_index, last_out_method_index)?)?;
            last_out_method_index = out_method_index;
            out.write_uleb128(method.access_flags)?;

            match image.read_code(method)? {
                None => out.write_uleb128(0)?,
                Some(code) => {
                    self.layout.code.align_to_four_bytes()?;
                    let code_off = self.layout.code.position();
                    self.layout.class_data.write_uleb128(code_off)?;
                    self.transform_code(source, &code)?;
                }
            }
        }
        Ok(())
    }

    fn transform_code(&mut self, source: Source, code: &Code) -> Result<()> {
        let index_map = &self.index_maps[source.index()];
        let out = &mut self.layout.code;
        out.assert_four_byte_aligned()?;

        out.write_u16(code.registers_size)?;
        out.write_u16(code.ins_size)?;
        out.write_u16(code.outs_size)?;
        let tries_size = u16::try_from(code.tries.len())
            .map_err(|_| malformed!("{} try items in one method", code.tries.len()))?;
        out.write_u16(tries_size)?;
        // Debug info is not carried over.
        out.write_u32(0)?;

        let instructions = instructions::transform(index_map, &code.instructions)?;
        out.write_u32(instructions.len() as u32)?;
        out.write_u16_array(&instructions)?;

        if !code.tries.is_empty() {
            if instructions.len() % 2 == 1 {
                out.write_u16(0)?; // padding
            }
            let (handlers, handler_offsets) = encode_catch_handlers(index_map, &code.catch_handlers)?;
            for try_item in &code.tries {
                let handler_off = handler_offsets
                    .get(&(try_item.handler_off as u32))
                    .copied()
                    .ok_or_else(|| malformed!("try at {} has no handler at {}", try_item.start_address, try_item.handler_off))?;
                out.write_u32(try_item.start_address)?;
                out.write_u16(try_item.instruction_count)?;
                out.write_u16(handler_off)?;
            }
            out.write_bytes(&handlers)?;
        }
        self.contents.section_mut(SectionKind::Code).size += 1;
        Ok(())
    }

    fn write_header_and_map(&mut self) -> Result<()> {
        self.contents.file_size = self.layout.file_size();
        self.contents.data_size = self.contents.file_size - self.contents.data_off;
        self.contents.compute_sizes_from_offsets();
        self.contents.write_header(&mut self.layout.header)?;
        self.contents.write_map(&mut self.layout.map_list)
    }
}

fn member_index_diff(index: u32, last: u32) -> Result<u32> {
    index
        .checked_sub(last)
        .ok_or_else(|| malformed!("class data members out of order: {} after {}", index, last))
}

/// Re-encodes a handler list with renumbered catch types. Type indices are ULEB128,
/// so handlers can move; the returned map takes each handler's old offset (relative
/// to the start of the list) to its new one.
fn encode_catch_handlers(
    index_map: &IndexMap,
    catch_handlers: &[CatchHandler],
) -> Result<(Vec<u8>, HashMap<u32, u16>)> {
    let mut bytes = Vec::new();
    let mut offsets = HashMap::with_capacity(catch_handlers.len());
    leb128::write_unsigned(&mut bytes, catch_handlers.len() as u32);
    for handler in catch_handlers {
        let new_offset = u16::try_from(bytes.len()).map_err(|_| Error::IndexOverflow {
            kind: "catch handler offset",
            index: bytes.len() as u32,
        })?;
        offsets.insert(handler.offset, new_offset);

        let count = handler.type_indexes.len() as i32;
        leb128::write_signed(&mut bytes, if handler.catch_all_address.is_some() { -count } else { count });
        for (&type_index, &address) in handler.type_indexes.iter().zip(&handler.addresses) {
            leb128::write_unsigned(&mut bytes, index_map.translate_index(IndexKind::Type, type_index)?);
            leb128::write_unsigned(&mut bytes, address);
        }
        if let Some(address) = handler.catch_all_address {
            leb128::write_unsigned(&mut bytes, address);
        }
    }
    Ok((bytes, offsets))
}
