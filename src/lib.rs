//! Dex merging library.
//!
//! This library provides the core components for the `dexmerge` tool.
//! It is organized into several modules:
//! - `config`: CLI configuration and merge options.
//! - `error`: The error type shared by every module.
//! - `format`: Dex container codecs: header, map, sections and records.
//! - `index_map`: Old-to-new index and offset translation, one per input.
//! - `id_merger`: Sorted and unsorted merging of one table from both inputs.
//! - `class_order`: Inheritance-depth ordering of class definitions.
//! - `sizes`: Capacity planning for output sections.
//! - `layout`: Placement and assembly of output sections.
//! - `instructions`: Index operand rewriting in method bodies.
//! - `hasher`: Signature and checksum.
//! - `merger`: The main merge orchestration.

pub mod class_order;
pub mod config;
pub mod error;
pub mod format;
pub mod hasher;
pub mod id_merger;
pub mod index_map;
pub mod instructions;
pub mod layout;
pub mod merger;
pub mod sizes;
pub mod utils;

pub use config::{CollisionPolicy, MergeOptions};
pub use error::{Error, Result};
pub use format::image::DexImage;
pub use merger::DexMerger;

/// Merges `dex_a` and `dex_b`. Under [`CollisionPolicy::KeepFirst`], `dex_a`'s
/// definition of a class shared by both wins.
pub fn merge(dex_a: &DexImage<'_>, dex_b: &DexImage<'_>, options: MergeOptions) -> Result<DexImage<'static>> {
    DexMerger::new(dex_a, dex_b, options)?.merge()
}
