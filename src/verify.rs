//! Subset verification of required capabilities against a catalog.
//!
//! One function covers every "is everything I need present?" question in the
//! crate: instance layers, instance extensions and device extensions all go
//! through [`verify_subset`], with [`resolve_names`] layered on top for the
//! required/requested split the builders use.

use crate::MatchSmallVec;
use std::ffi::CString;
use tracing::warn;

/// How catalog entries may be reused across requirements within one pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsumePolicy {
    /// Each catalog entry satisfies at most one requirement. Two identical
    /// requirements need two identical catalog entries.
    Exclusive,
    /// A catalog entry may satisfy any number of requirements (plain
    /// containment).
    Shared,
}

/// Outcome of one [`verify_subset`] pass.
///
/// A miss is a normal, reportable outcome. The report never aborts anything;
/// the caller decides whether unmatched requirements are fatal.
#[derive(Debug, Clone)]
pub struct SubsetReport<I> {
    matches: MatchSmallVec<Option<usize>>,
    unmatched: MatchSmallVec<I>,
}

impl<I> SubsetReport<I> {
    /// True iff every requirement found a catalog entry.
    #[inline]
    pub fn all_present(&self) -> bool {
        self.unmatched.is_empty()
    }

    /// The requirements that found no catalog entry, in requirement order.
    #[inline]
    pub fn unmatched(&self) -> &[I] {
        &self.unmatched
    }

    /// Catalog index matched by the `requirement`-th input requirement, if
    /// any.
    #[inline]
    pub fn match_for(&self, requirement: usize) -> Option<usize> {
        self.matches.get(requirement).copied().flatten()
    }
}

/// Decide whether `requirements ⊆ catalog` and report every miss.
///
/// Requirements are matched in input order against the first equal catalog
/// entry; under [`ConsumePolicy::Exclusive`] a matched entry is consumed and
/// cannot satisfy a later requirement. Unmatched requirements are collected
/// rather than short-circuiting, so the report always names every missing
/// capability.
///
/// The scan is the naive O(requirements × catalog) comparison loop; catalogs
/// in this domain are tens of entries.
pub fn verify_subset<I>(requirements: &[I], catalog: &[I], policy: ConsumePolicy) -> SubsetReport<I>
where
    I: PartialEq + Clone,
{
    let mut consumed = vec![false; catalog.len()];
    let mut matches = MatchSmallVec::with_capacity(requirements.len());
    let mut unmatched = MatchSmallVec::new();

    for requirement in requirements {
        let found = catalog
            .iter()
            .enumerate()
            .position(|(index, entry)| !consumed[index] && entry == requirement);

        match found {
            Some(index) => {
                if policy == ConsumePolicy::Exclusive {
                    consumed[index] = true;
                }
                matches.push(Some(index));
            }
            None => {
                matches.push(None);
                unmatched.push(requirement.clone());
            }
        }
    }

    SubsetReport { matches, unmatched }
}

/// Result of resolving a required/requested name list against a catalog.
#[derive(Debug, Clone, Default)]
pub struct ResolvedNames {
    /// Names that are present and should be enabled, in requirement order.
    pub enabled: MatchSmallVec<CString>,
    /// Required names with no catalog entry. Non-empty means the caller
    /// should fail the operation these names gate.
    pub missing_required: MatchSmallVec<CString>,
    /// Requested (optional) names with no catalog entry. Advisory only.
    pub missing_requested: MatchSmallVec<CString>,
}

/// Resolve a list of `(name, required)` capability requirements against a
/// catalog of available names.
///
/// Repeated names are merged into a single requirement before matching
/// (required wins over requested), so a helper and the caller both asking for
/// the same extension does not double-consume the catalog. Present names land
/// in `enabled`; misses are split by the `required` flag, and requested
/// misses are logged here since every caller treats them the same way: as a
/// warning.
pub fn resolve_names(requirements: &[(CString, bool)], catalog: &[CString]) -> ResolvedNames {
    let mut merged: MatchSmallVec<(CString, bool)> = MatchSmallVec::new();
    for (name, required) in requirements {
        match merged.iter_mut().find(|(seen, _)| *seen == *name) {
            Some((_, seen_required)) => *seen_required |= *required,
            None => merged.push((name.clone(), *required)),
        }
    }

    let names: MatchSmallVec<CString> = merged.iter().map(|(name, _)| name.clone()).collect();
    let report = verify_subset(&names, catalog, ConsumePolicy::Exclusive);

    let mut resolved = ResolvedNames::default();
    for (index, (name, required)) in merged.into_iter().enumerate() {
        if report.match_for(index).is_some() {
            resolved.enabled.push(name);
        } else if required {
            resolved.missing_required.push(name);
        } else {
            warn!(name = ?name, "requested capability not available, skipping");
            resolved.missing_requested.push(name);
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cstrings(names: &[&str]) -> Vec<CString> {
        names
            .iter()
            .map(|name| CString::new(*name).unwrap())
            .collect()
    }

    #[test]
    fn disjoint_inputs_report_every_requirement() {
        let report = verify_subset(&["a", "b"], &["c", "d"], ConsumePolicy::Exclusive);
        assert!(!report.all_present());
        assert_eq!(report.unmatched(), &["a", "b"]);
    }

    #[test]
    fn permutation_of_catalog_subset_is_present() {
        let catalog = ["w", "x", "y", "z"];
        for requirements in [["z", "x"], ["x", "z"]] {
            let report = verify_subset(&requirements, &catalog, ConsumePolicy::Exclusive);
            assert!(report.all_present());
            assert!(report.unmatched().is_empty());
        }
    }

    #[test]
    fn duplicate_entries_satisfy_duplicate_requirements() {
        let report = verify_subset(&["A", "A"], &["A", "A"], ConsumePolicy::Exclusive);
        assert!(report.all_present());
        assert_eq!(report.match_for(0), Some(0));
        assert_eq!(report.match_for(1), Some(1));
    }

    #[test]
    fn single_entry_cannot_satisfy_two_requirements() {
        let report = verify_subset(&["A", "A"], &["A"], ConsumePolicy::Exclusive);
        assert!(!report.all_present());
        assert_eq!(report.unmatched(), &["A"]);
    }

    #[test]
    fn shared_policy_reuses_entries() {
        let report = verify_subset(&["A", "A"], &["A"], ConsumePolicy::Shared);
        assert!(report.all_present());
        assert_eq!(report.match_for(0), Some(0));
        assert_eq!(report.match_for(1), Some(0));
    }

    #[test]
    fn empty_catalog_leaves_everything_unmatched() {
        let report = verify_subset(&["a", "b", "c"], &[], ConsumePolicy::Exclusive);
        assert!(!report.all_present());
        assert_eq!(report.unmatched(), &["a", "b", "c"]);
    }

    #[test]
    fn empty_requirements_are_trivially_present() {
        let report = verify_subset::<&str>(&[], &["a"], ConsumePolicy::Exclusive);
        assert!(report.all_present());
    }

    #[test]
    fn misses_are_collected_in_requirement_order() {
        let report = verify_subset(&["p", "a", "q", "b"], &["a", "b"], ConsumePolicy::Exclusive);
        assert_eq!(report.unmatched(), &["p", "q"]);
    }

    #[test]
    fn comparison_is_byte_exact() {
        let report = verify_subset(&["VK_KHR_surface"], &["vk_khr_surface"], ConsumePolicy::Exclusive);
        assert!(!report.all_present());
    }

    #[test]
    fn resolve_splits_missing_by_required_flag() {
        let requirements = [
            (CString::new("present").unwrap(), true),
            (CString::new("gone_required").unwrap(), true),
            (CString::new("gone_requested").unwrap(), false),
        ];
        let catalog = cstrings(&["present"]);

        let resolved = resolve_names(&requirements, &catalog);
        assert_eq!(resolved.enabled.as_slice(), cstrings(&["present"]).as_slice());
        assert_eq!(
            resolved.missing_required.as_slice(),
            cstrings(&["gone_required"]).as_slice()
        );
        assert_eq!(
            resolved.missing_requested.as_slice(),
            cstrings(&["gone_requested"]).as_slice()
        );
    }

    #[test]
    fn resolve_merges_repeated_names() {
        // A helper requesting and the caller requiring the same name must not
        // consume two catalog entries or report a phantom miss.
        let requirements = [
            (CString::new("ext").unwrap(), false),
            (CString::new("ext").unwrap(), true),
        ];
        let catalog = cstrings(&["ext"]);

        let resolved = resolve_names(&requirements, &catalog);
        assert_eq!(resolved.enabled.len(), 1);
        assert!(resolved.missing_required.is_empty());
        assert!(resolved.missing_requested.is_empty());

        let resolved = resolve_names(&requirements, &[]);
        // Merged requirement is required, so the miss is a hard one.
        assert_eq!(resolved.missing_required.len(), 1);
        assert!(resolved.missing_requested.is_empty());
    }
}
