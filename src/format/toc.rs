//! Table of contents.
//!
//! The header and the map list together say where every section lives. Inputs are
//! read through [`TableOfContents::read_from`]; the merger fills in a fresh one for
//! the output and writes it back out with [`TableOfContents::write_header`] and
//! [`TableOfContents::write_map`].

use object::endian::{LittleEndian as LE, U16, U32};
use object::pod::{self, Pod};
use std::fmt;

use crate::error::{malformed, Error, Result};
use crate::format::section::SectionWriter;
use crate::format::size_of;

pub const ENDIAN_CONSTANT: u32 = 0x1234_5678;

/// Magic for version 035, the oldest version this merger reads and its default output.
pub const MAGIC_035: [u8; 8] = *b"dex\n035\0";

const MIN_VERSION: u32 = 35;
const MAX_VERSION: u32 = 39;

/// The `header_item`, as laid out on disk.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct HeaderItem {
    pub magic: [u8; 8],
    pub checksum: U32<LE>,
    pub signature: [u8; 20],
    pub file_size: U32<LE>,
    pub header_size: U32<LE>,
    pub endian_tag: U32<LE>,
    pub link_size: U32<LE>,
    pub link_off: U32<LE>,
    pub map_off: U32<LE>,
    pub string_ids_size: U32<LE>,
    pub string_ids_off: U32<LE>,
    pub type_ids_size: U32<LE>,
    pub type_ids_off: U32<LE>,
    pub proto_ids_size: U32<LE>,
    pub proto_ids_off: U32<LE>,
    pub field_ids_size: U32<LE>,
    pub field_ids_off: U32<LE>,
    pub method_ids_size: U32<LE>,
    pub method_ids_off: U32<LE>,
    pub class_defs_size: U32<LE>,
    pub class_defs_off: U32<LE>,
    pub data_size: U32<LE>,
    pub data_off: U32<LE>,
}

// SAFETY: `repr(C)`, every field is a byte array or an unaligned integer.
unsafe impl Pod for HeaderItem {}

/// A `map_item`.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MapItem {
    pub item_type: U16<LE>,
    pub unused: U16<LE>,
    pub size: U32<LE>,
    pub offset: U32<LE>,
}

// SAFETY: `repr(C)`, every field is an unaligned integer.
unsafe impl Pod for MapItem {}

/// Every kind of section the merger reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind {
    Header,
    StringIds,
    TypeIds,
    ProtoIds,
    FieldIds,
    MethodIds,
    ClassDefs,
    MapList,
    TypeLists,
    AnnotationSetRefLists,
    AnnotationSets,
    ClassData,
    Code,
    StringData,
    DebugInfo,
    Annotations,
    EncodedArrays,
    AnnotationsDirectories,
}

pub const SECTION_COUNT: usize = 18;

impl SectionKind {
    pub const ALL: [SectionKind; SECTION_COUNT] = [
        SectionKind::Header,
        SectionKind::StringIds,
        SectionKind::TypeIds,
        SectionKind::ProtoIds,
        SectionKind::FieldIds,
        SectionKind::MethodIds,
        SectionKind::ClassDefs,
        SectionKind::MapList,
        SectionKind::TypeLists,
        SectionKind::AnnotationSetRefLists,
        SectionKind::AnnotationSets,
        SectionKind::ClassData,
        SectionKind::Code,
        SectionKind::StringData,
        SectionKind::DebugInfo,
        SectionKind::Annotations,
        SectionKind::EncodedArrays,
        SectionKind::AnnotationsDirectories,
    ];

    /// The `type` code of this kind in the map list.
    pub fn type_code(self) -> u16 {
        match self {
            SectionKind::Header => 0x0000,
            SectionKind::StringIds => 0x0001,
            SectionKind::TypeIds => 0x0002,
            SectionKind::ProtoIds => 0x0003,
            SectionKind::FieldIds => 0x0004,
            SectionKind::MethodIds => 0x0005,
            SectionKind::ClassDefs => 0x0006,
            SectionKind::MapList => 0x1000,
            SectionKind::TypeLists => 0x1001,
            SectionKind::AnnotationSetRefLists => 0x1002,
            SectionKind::AnnotationSets => 0x1003,
            SectionKind::ClassData => 0x2000,
            SectionKind::Code => 0x2001,
            SectionKind::StringData => 0x2002,
            SectionKind::DebugInfo => 0x2003,
            SectionKind::Annotations => 0x2004,
            SectionKind::EncodedArrays => 0x2005,
            SectionKind::AnnotationsDirectories => 0x2006,
        }
    }

    pub fn from_type_code(code: u16) -> Option<SectionKind> {
        SectionKind::ALL.into_iter().find(|kind| kind.type_code() == code)
    }

    /// Fewest bytes one item of this kind can occupy.
    fn min_item_size(self) -> u32 {
        match self {
            SectionKind::Header => size_of::HEADER_ITEM,
            SectionKind::StringIds | SectionKind::TypeIds => size_of::UINT,
            SectionKind::ProtoIds => size_of::PROTO_ID_ITEM,
            SectionKind::FieldIds | SectionKind::MethodIds => size_of::MEMBER_ID_ITEM,
            SectionKind::ClassDefs => size_of::CLASS_DEF_ITEM,
            // a list or set of zero entries is just its size word
            SectionKind::MapList | SectionKind::TypeLists | SectionKind::AnnotationSetRefLists
            | SectionKind::AnnotationSets => size_of::UINT,
            // four ULEB128 member counts
            SectionKind::ClassData => 4,
            // registers, ins, outs, tries, debug info offset, instruction count
            SectionKind::Code => 16,
            // length and terminating NUL
            SectionKind::StringData => 2,
            SectionKind::DebugInfo | SectionKind::EncodedArrays => 1,
            // visibility, type and element count
            SectionKind::Annotations => 3,
            SectionKind::AnnotationsDirectories => 4 * size_of::UINT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SectionKind::Header => "header",
            SectionKind::StringIds => "string ids",
            SectionKind::TypeIds => "type ids",
            SectionKind::ProtoIds => "proto ids",
            SectionKind::FieldIds => "field ids",
            SectionKind::MethodIds => "method ids",
            SectionKind::ClassDefs => "class defs",
            SectionKind::MapList => "map list",
            SectionKind::TypeLists => "type lists",
            SectionKind::AnnotationSetRefLists => "annotation set ref lists",
            SectionKind::AnnotationSets => "annotation sets",
            SectionKind::ClassData => "class data",
            SectionKind::Code => "code",
            SectionKind::StringData => "string data",
            SectionKind::DebugInfo => "debug info",
            SectionKind::Annotations => "annotations",
            SectionKind::EncodedArrays => "encoded arrays",
            SectionKind::AnnotationsDirectories => "annotations directories",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Map item types that exist in newer versions but that the merger has no way to renumber.
const TYPE_CALL_SITE_ID: u16 = 0x0007;
const TYPE_METHOD_HANDLE: u16 = 0x0008;
const TYPE_HIDDENAPI_CLASS_DATA: u16 = 0xf000;

/// Location of one section: offset, item count, and (for inputs) byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TocSection {
    pub off: u32,
    pub size: u32,
    pub byte_count: u32,
}

impl TocSection {
    pub fn exists(&self) -> bool {
        self.size > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOfContents {
    sections: [TocSection; SECTION_COUNT],
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Default for TableOfContents {
    fn default() -> Self {
        Self {
            sections: [TocSection::default(); SECTION_COUNT],
            magic: MAGIC_035,
            checksum: 0,
            signature: [0; 20],
            file_size: 0,
            data_size: 0,
            data_off: 0,
        }
    }
}

impl TableOfContents {
    pub fn section(&self, kind: SectionKind) -> &TocSection {
        &self.sections[kind as usize]
    }

    pub fn section_mut(&mut self, kind: SectionKind) -> &mut TocSection {
        &mut self.sections[kind as usize]
    }

    /// Existing sections, in file order.
    pub fn sections(&self) -> Vec<(SectionKind, TocSection)> {
        let mut sections: Vec<_> = SectionKind::ALL
            .into_iter()
            .map(|kind| (kind, *self.section(kind)))
            .filter(|(_, section)| section.exists())
            .collect();
        sections.sort_by_key(|(_, section)| section.off);
        sections
    }

    /// The dex version number encoded in the magic (35 for `dex\n035\0`).
    pub fn version(&self) -> u32 {
        parse_version(&self.magic).unwrap_or(MIN_VERSION)
    }

    pub fn read_from(data: &[u8]) -> Result<Self> {
        let (header, _) = pod::from_bytes::<HeaderItem>(data)
            .map_err(|()| malformed!("file of {} bytes is too short for a header", data.len()))?;
        if parse_version(&header.magic).is_none() {
            return Err(malformed!("bad magic {:?}", header.magic));
        }
        if header.endian_tag.get(LE) != ENDIAN_CONSTANT {
            return Err(malformed!("unexpected endian tag 0x{:08x}", header.endian_tag.get(LE)));
        }
        let file_size = header.file_size.get(LE);
        if file_size as usize > data.len() || file_size < size_of::HEADER_ITEM {
            return Err(malformed!("file size {} but {} bytes present", file_size, data.len()));
        }

        let mut toc = TableOfContents {
            magic: header.magic,
            checksum: header.checksum.get(LE),
            signature: header.signature,
            file_size,
            data_size: header.data_size.get(LE),
            data_off: header.data_off.get(LE),
            ..TableOfContents::default()
        };
        toc.read_map(data, header.map_off.get(LE))?;
        toc.compute_sizes_from_offsets();
        Ok(toc)
    }

    fn read_map(&mut self, data: &[u8], map_off: u32) -> Result<()> {
        let body = data
            .get(map_off as usize..self.file_size as usize)
            .ok_or_else(|| malformed!("map offset 0x{:x} out of range", map_off))?;
        let (count, rest) = pod::from_bytes::<U32<LE>>(body)
            .map_err(|()| malformed!("truncated map list"))?;
        let (items, _) = pod::slice_from_bytes::<MapItem>(rest, count.get(LE) as usize)
            .map_err(|()| malformed!("map list of {} items is truncated", count.get(LE)))?;

        let mut previous_off = 0;
        for item in items {
            let code = item.item_type.get(LE);
            let size = item.size.get(LE);
            let off = item.offset.get(LE);
            let kind = match code {
                TYPE_CALL_SITE_ID | TYPE_METHOD_HANDLE if size > 0 => {
                    return Err(Error::Unsupported {
                        what: format!("map item type 0x{:04x}", code),
                    })
                }
                TYPE_CALL_SITE_ID | TYPE_METHOD_HANDLE | TYPE_HIDDENAPI_CLASS_DATA => continue,
                code => SectionKind::from_type_code(code)
                    .ok_or_else(|| malformed!("unknown map item type 0x{:04x}", code))?,
            };
            if off < previous_off || off > self.file_size {
                return Err(malformed!("map is unsorted or out of range at {} 0x{:x}", kind, off));
            }
            let available = (self.file_size - off) as u64;
            if size as u64 * kind.min_item_size() as u64 > available {
                return Err(malformed!(
                    "{} claims {} items but only {} bytes follow 0x{:x}",
                    kind,
                    size,
                    available,
                    off
                ));
            }
            previous_off = off;
            *self.section_mut(kind) = TocSection {
                off,
                size,
                byte_count: 0,
            };
        }

        if !self.section(SectionKind::MapList).exists() {
            *self.section_mut(SectionKind::MapList) = TocSection {
                off: map_off,
                size: 1,
                byte_count: 0,
            };
        }
        Ok(())
    }

    /// Derives each section's byte count from where the next section starts; the
    /// last section runs to the end of the file.
    pub fn compute_sizes_from_offsets(&mut self) {
        let sections = self.sections();
        let mut end = self.file_size;
        for (kind, section) in sections.into_iter().rev() {
            self.section_mut(kind).byte_count = end.saturating_sub(section.off);
            end = section.off;
        }
    }

    pub fn write_header(&self, out: &mut SectionWriter) -> Result<()> {
        let u32 = |v: u32| U32::new(LE, v);
        let id = |kind: SectionKind| {
            let section = self.section(kind);
            if section.exists() {
                (u32(section.size), u32(section.off))
            } else {
                (u32(0), u32(0))
            }
        };
        let (string_ids_size, string_ids_off) = id(SectionKind::StringIds);
        let (type_ids_size, type_ids_off) = id(SectionKind::TypeIds);
        let (proto_ids_size, proto_ids_off) = id(SectionKind::ProtoIds);
        let (field_ids_size, field_ids_off) = id(SectionKind::FieldIds);
        let (method_ids_size, method_ids_off) = id(SectionKind::MethodIds);
        let (class_defs_size, class_defs_off) = id(SectionKind::ClassDefs);
        let header = HeaderItem {
            magic: self.magic,
            checksum: u32(self.checksum),
            signature: self.signature,
            file_size: u32(self.file_size),
            header_size: u32(size_of::HEADER_ITEM),
            endian_tag: u32(ENDIAN_CONSTANT),
            link_size: u32(0),
            link_off: u32(0),
            map_off: u32(self.section(SectionKind::MapList).off),
            string_ids_size,
            string_ids_off,
            type_ids_size,
            type_ids_off,
            proto_ids_size,
            proto_ids_off,
            field_ids_size,
            field_ids_off,
            method_ids_size,
            method_ids_off,
            class_defs_size,
            class_defs_off,
            data_size: u32(self.data_size),
            data_off: u32(self.data_off),
        };
        out.write_bytes(pod::bytes_of(&header))
    }

    pub fn write_map(&self, out: &mut SectionWriter) -> Result<()> {
        out.assert_four_byte_aligned()?;
        let sections = self.sections();
        out.write_u32(sections.len() as u32)?;
        for (kind, section) in sections {
            let item = MapItem {
                item_type: U16::new(LE, kind.type_code()),
                unused: U16::new(LE, 0),
                size: U32::new(LE, section.size),
                offset: U32::new(LE, section.off),
            };
            out.write_bytes(pod::bytes_of(&item))?;
        }
        Ok(())
    }
}

fn parse_version(magic: &[u8; 8]) -> Option<u32> {
    if &magic[..4] != b"dex\n" || magic[7] != 0 {
        return None;
    }
    let digits = std::str::from_utf8(&magic[4..7]).ok()?;
    let version = digits.parse::<u32>().ok()?;
    (MIN_VERSION..=MAX_VERSION).contains(&version).then_some(version)
}

/// Magic for the given dex version.
pub fn magic_for_version(version: u32) -> [u8; 8] {
    let mut magic = MAGIC_035;
    let digits = format!("{:03}", version.clamp(MIN_VERSION, MAX_VERSION));
    magic[4..7].copy_from_slice(digits.as_bytes());
    magic
}
