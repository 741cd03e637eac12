//! Queue family selection by capability category.

use crate::{MatchSmallVec, QueueFamilyInfo};
use ash::vk;

/// A capability category a queue family can satisfy: one or more
/// [`vk::QueueFlags`] bits that must all be present.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct QueueCategory(vk::QueueFlags);

impl QueueCategory {
    /// Graphics-capable queue family.
    pub const GRAPHICS: QueueCategory = QueueCategory(vk::QueueFlags::GRAPHICS);
    /// Compute-capable queue family.
    pub const COMPUTE: QueueCategory = QueueCategory(vk::QueueFlags::COMPUTE);
    /// Transfer-capable queue family.
    pub const TRANSFER: QueueCategory = QueueCategory(vk::QueueFlags::TRANSFER);

    /// Category requiring all bits of `flags`.
    #[inline]
    pub fn new(flags: vk::QueueFlags) -> QueueCategory {
        QueueCategory(flags)
    }

    /// The flags a family must contain to satisfy this category.
    #[inline]
    pub fn flags(&self) -> vk::QueueFlags {
        self.0
    }

    /// True if a family with `flags` satisfies this category.
    #[inline]
    pub fn accepts(&self, flags: vk::QueueFlags) -> bool {
        flags.contains(self.0)
    }
}

/// Per-category queue family indices produced by [`assign_queue_families`].
///
/// An unfilled slot is a normal result; [`is_complete`](Self::is_complete)
/// tells the device-selection layer whether this candidate is usable.
#[derive(Debug, Clone)]
pub struct QueueFamilyAssignment {
    slots: MatchSmallVec<(QueueCategory, Option<u32>)>,
}

impl QueueFamilyAssignment {
    /// True iff every category has a family index.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|(_, index)| index.is_some())
    }

    /// Family index assigned to `category`, if any.
    pub fn index_of(&self, category: QueueCategory) -> Option<u32> {
        self.slots
            .iter()
            .find(|(slot_category, _)| *slot_category == category)
            .and_then(|(_, index)| *index)
    }

    /// All `(category, index)` pairs, in the order the categories were given.
    pub fn iter(&self) -> impl Iterator<Item = (QueueCategory, Option<u32>)> + '_ {
        self.slots.iter().copied()
    }

    /// Categories that found no family, in input order.
    pub fn missing(&self) -> impl Iterator<Item = QueueCategory> + '_ {
        self.slots
            .iter()
            .filter(|(_, index)| index.is_none())
            .map(|(category, _)| *category)
    }

    /// Distinct assigned family indices, in first-assignment order. One
    /// family may serve several categories, so this can be shorter than the
    /// category list.
    pub fn family_indices(&self) -> MatchSmallVec<u32> {
        let mut indices = MatchSmallVec::new();
        for (_, index) in &self.slots {
            if let Some(index) = index {
                if !indices.contains(index) {
                    indices.push(*index);
                }
            }
        }
        indices
    }
}

/// Find, per category, the first queue family that satisfies it.
///
/// Families are scanned in catalog order. A family with no queue slots is
/// never selected. Once a category has an index it keeps it, and the scan
/// stops as soon as every category is satisfied, so a lazy provider iterator
/// is only pulled as far as needed. An empty category list is vacuously
/// complete and inspects no families at all.
pub fn assign_queue_families<F>(families: F, categories: &[QueueCategory]) -> QueueFamilyAssignment
where
    F: IntoIterator<Item = QueueFamilyInfo>,
{
    let mut assignment = QueueFamilyAssignment {
        slots: categories.iter().map(|&category| (category, None)).collect(),
    };
    if assignment.slots.is_empty() {
        return assignment;
    }

    for (index, family) in families.into_iter().enumerate() {
        if family.queue_count > 0 {
            for (category, slot) in assignment.slots.iter_mut() {
                if slot.is_none() && category.accepts(family.flags) {
                    *slot = Some(index as u32);
                }
            }
        }

        if assignment.is_complete() {
            break;
        }
    }

    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> QueueFamilyInfo {
        QueueFamilyInfo::new(flags, queue_count)
    }

    #[test]
    fn first_matching_family_wins() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];

        let assignment = assign_queue_families(families, &[QueueCategory::GRAPHICS]);
        assert_eq!(assignment.index_of(QueueCategory::GRAPHICS), Some(1));
        assert!(assignment.is_complete());
    }

    #[test]
    fn zero_slot_families_are_never_selected() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 2),
        ];

        let assignment = assign_queue_families(families, &[QueueCategory::GRAPHICS]);
        assert_eq!(assignment.index_of(QueueCategory::GRAPHICS), Some(1));
    }

    #[test]
    fn scan_stops_once_complete() {
        let inspected = Cell::new(0usize);
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let instrumented = families.into_iter().inspect(|_| inspected.set(inspected.get() + 1));

        let assignment =
            assign_queue_families(instrumented, &[QueueCategory::GRAPHICS, QueueCategory::COMPUTE]);
        assert!(assignment.is_complete());
        assert_eq!(inspected.get(), 2);
    }

    #[test]
    fn one_family_may_satisfy_several_categories() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            4,
        )];

        let categories = [
            QueueCategory::GRAPHICS,
            QueueCategory::COMPUTE,
            QueueCategory::TRANSFER,
        ];
        let assignment = assign_queue_families(families, &categories);
        assert!(assignment.is_complete());
        for category in categories {
            assert_eq!(assignment.index_of(category), Some(0));
        }
        assert_eq!(assignment.family_indices().as_slice(), &[0]);
    }

    #[test]
    fn incomplete_when_no_family_matches() {
        let families = [family(vk::QueueFlags::TRANSFER, 1)];

        let assignment = assign_queue_families(families, &[QueueCategory::GRAPHICS]);
        assert!(!assignment.is_complete());
        assert_eq!(assignment.index_of(QueueCategory::GRAPHICS), None);
        assert_eq!(assignment.missing().collect::<Vec<_>>(), vec![QueueCategory::GRAPHICS]);
    }

    #[test]
    fn empty_catalog_is_incomplete() {
        let assignment = assign_queue_families([], &[QueueCategory::GRAPHICS]);
        assert!(!assignment.is_complete());
    }

    #[test]
    fn no_categories_is_vacuously_complete_without_inspection() {
        let inspected = Cell::new(0usize);
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let instrumented = families.into_iter().inspect(|_| inspected.set(inspected.get() + 1));

        let assignment = assign_queue_families(instrumented, &[]);
        assert!(assignment.is_complete());
        assert_eq!(inspected.get(), 0);
    }

    #[test]
    fn multi_bit_category_requires_all_bits() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];

        let both = QueueCategory::new(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);
        let assignment = assign_queue_families(families, &[both]);
        assert_eq!(assignment.index_of(both), Some(1));
    }
}
