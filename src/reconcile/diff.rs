use super::{AssociationKey, AssociationSet};

/// The changes needed to turn an observed set into a desired set.
///
/// Both sequences follow the iteration order of the source set. That order
/// has no meaning: callers must not rely on the order remote calls are made in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Keys wanted but not present remotely.
    pub to_add: Vec<AssociationKey>,
    /// Keys present remotely but not wanted.
    pub to_remove: Vec<AssociationKey>,
}

impl Reconciliation {
    /// True when observed already equals desired.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of remote calls this reconciliation needs.
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    /// The set that results from applying this reconciliation to `observed`.
    pub fn apply(&self, observed: &AssociationSet) -> AssociationSet {
        let mut result = observed.clone();
        for key in &self.to_remove {
            result.remove(key);
        }
        result.extend(self.to_add.iter().cloned());
        result
    }
}

/// Compute the keys to add and remove so that `observed` becomes `desired`.
///
/// An empty `desired` set removes everything that is observed.
pub fn diff(observed: &AssociationSet, desired: &AssociationSet) -> Reconciliation {
    Reconciliation {
        to_add: desired.difference(observed).cloned().collect(),
        to_remove: observed.difference(desired).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::association_set;

    #[test]
    fn test_diff_adds_to_empty_observed() {
        let plan = diff(&AssociationSet::new(), &association_set(["provisioning"]));
        assert_eq!(plan.to_add, vec!["provisioning".to_string()]);
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_diff_removes_unwanted() {
        let plan = diff(
            &association_set(["provisioning", "scan"]),
            &association_set(["scan"]),
        );
        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove, vec!["provisioning".to_string()]);
    }

    #[test]
    fn test_diff_empty_desired_removes_everything() {
        let observed = association_set(["admin", "scan", "user"]);
        let plan = diff(&observed, &AssociationSet::new());
        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove.len(), 3);
        assert!(plan.apply(&observed).is_empty());
    }

    #[test]
    fn test_diff_equal_sets_is_empty() {
        let set = association_set(["admin", "scan"]);
        let plan = diff(&set, &set);
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn test_diff_is_case_sensitive() {
        let plan = diff(&association_set(["Scan"]), &association_set(["scan"]));
        assert_eq!(plan.to_add, vec!["scan".to_string()]);
        assert_eq!(plan.to_remove, vec!["Scan".to_string()]);
    }

    #[test]
    fn test_diff_properties_hold_for_all_subsets() {
        let universe = ["admin", "codeviewer", "scan", "user"];
        let subsets: Vec<AssociationSet> = (0u32..16)
            .map(|mask| {
                universe
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, k)| k.to_string())
                    .collect()
            })
            .collect();

        for observed in &subsets {
            for desired in &subsets {
                let plan = diff(observed, desired);

                assert!(plan.to_add.iter().all(|k| !observed.contains(k)));
                assert!(plan.to_remove.iter().all(|k| observed.contains(k)));
                assert!(plan.to_add.iter().all(|k| !plan.to_remove.contains(k)));
                assert_eq!(&plan.apply(observed), desired);

                // A second pass against the converged set is a no-op.
                assert!(diff(&plan.apply(observed), desired).is_empty());
            }
        }
    }
}
