//! Class definition ordering.
//!
//! The format requires a class's supertype and interfaces to be defined before the
//! class itself whenever they are defined in the same file. Each class gets a depth:
//! one more than the deepest of its supertype and interfaces, where a type defined
//! in neither input counts as depth zero. Classes are then emitted shallowest first.

use tracing::trace;

use crate::config::CollisionPolicy;
use crate::error::{malformed, Error, Result};
use crate::format::image::DexImage;
use crate::format::items::ClassDef;
use crate::index_map::{IndexKind, IndexMap, Source};

/// A class definition plus what's needed to place it in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortableClass {
    pub source: Source,
    /// As read from `source`, not yet renumbered.
    pub class_def: ClassDef,
    /// Output type index of the class.
    pub type_index: u32,
    supertype_index: u32,
    interfaces: Vec<u32>,
    depth: Option<u32>,
}

impl SortableClass {
    fn read(source: Source, image: &DexImage<'_>, index_map: &IndexMap, class_def: ClassDef) -> Result<Self> {
        let interfaces = image
            .read_type_list(class_def.interfaces_off)?
            .types
            .iter()
            .map(|&t| index_map.translate_index(IndexKind::Type, t as u32))
            .collect::<Result<_>>()?;
        Ok(Self {
            source,
            type_index: index_map.translate_index(IndexKind::Type, class_def.type_index)?,
            supertype_index: index_map.translate_index(IndexKind::Type, class_def.supertype_index)?,
            interfaces,
            class_def,
            depth: None,
        })
    }

    pub fn depth(&self) -> Option<u32> {
        self.depth
    }
}

/// Returns the union of classes from both inputs, ordered so that a class is always
/// preceded by its supertype and implemented interfaces.
///
/// `type_count` is the size of the merged type table.
pub fn sorted_classes(
    inputs: [&DexImage<'_>; 2],
    index_maps: &[IndexMap; 2],
    type_count: u32,
    policy: CollisionPolicy,
) -> Result<Vec<SortableClass>> {
    let mut slots: Vec<Option<SortableClass>> = vec![None; type_count as usize];
    for source in Source::BOTH {
        let i = source.index();
        read_sortable_classes(&mut slots, source, inputs[i], &index_maps[i], policy)?;
    }

    let unresolved = resolve_depths(&mut slots);
    if let Some(&first) = unresolved.first() {
        let class = slots[first]
            .as_ref()
            .ok_or_else(|| malformed!("unresolved class slot {} is empty", first))?;
        let image = inputs[class.source.index()];
        return Err(Error::InheritanceCycle {
            type_name: image.type_name(class.class_def.type_index)?.to_string(),
            unresolved: unresolved.len(),
        });
    }

    let mut classes: Vec<SortableClass> = slots.into_iter().flatten().collect();
    classes.sort_by_key(|class| class.depth);
    Ok(classes)
}

fn read_sortable_classes(
    slots: &mut [Option<SortableClass>],
    source: Source,
    image: &DexImage<'_>,
    index_map: &IndexMap,
    policy: CollisionPolicy,
) -> Result<()> {
    for class_def in image.class_defs()? {
        let class = SortableClass::read(source, image, index_map, class_def)?;
        let slot = slots
            .get_mut(class.type_index as usize)
            .ok_or_else(|| malformed!("class type index {} out of range", class.type_index))?;
        if slot.is_none() {
            *slot = Some(class);
            continue;
        }
        match policy {
            CollisionPolicy::KeepFirst => {
                trace!(
                    "Dropping {} from dex {:?}: already defined",
                    image.type_name(class_def.type_index)?,
                    source
                );
            }
            CollisionPolicy::Fail => {
                return Err(Error::StructuralCollision {
                    type_name: image.type_name(class_def.type_index)?.to_string(),
                    policy,
                });
            }
        }
    }
    Ok(())
}

/// Depth of the class defining `type_index`, or 0 for types neither input defines.
fn dependency_depth(slots: &[Option<SortableClass>], type_index: u32) -> Option<u32> {
    match slots.get(type_index as usize) {
        Some(Some(class)) => class.depth,
        _ => Some(0),
    }
}

fn try_assign_depth(slots: &[Option<SortableClass>], class: &SortableClass) -> Option<u32> {
    let mut max = dependency_depth(slots, class.supertype_index)?;
    for &interface in &class.interfaces {
        max = max.max(dependency_depth(slots, interface)?);
    }
    Some(max + 1)
}

/// Assigns depths in rounds until a round makes no progress. Each round resolves at
/// least one class, so the number of rounds is bounded by the class count. Returns
/// the slots that are still unresolved, which can only be classes on (or below) an
/// inheritance cycle.
fn resolve_depths(slots: &mut [Option<SortableClass>]) -> Vec<usize> {
    let class_count = slots.iter().flatten().count();
    for _ in 0..=class_count {
        let mut progress = false;
        for i in 0..slots.len() {
            let depth = match &slots[i] {
                Some(class) if class.depth.is_none() => try_assign_depth(slots, class),
                _ => continue,
            };
            if let (Some(depth), Some(class)) = (depth, slots[i].as_mut()) {
                class.depth = Some(depth);
                progress = true;
            }
        }
        if !progress {
            break;
        }
    }
    slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| matches!(slot, Some(class) if class.depth.is_none()))
        .map(|(i, _)| i)
        .collect()
}
