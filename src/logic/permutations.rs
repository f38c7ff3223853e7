use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::model::{Factor, FactorAssignment, FactorList, Sample};

/// Parent-derived prefix of a permutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentKey {
    pub code: String,
    /// `(<short code>) <secondary name>`
    pub label: String,
}

impl ParentKey {
    pub fn of(sample: &Sample) -> Self {
        Self {
            code: sample.code.clone(),
            label: format!("({}) {}", sample.short_code(), sample.secondary_name),
        }
    }
}

/// One concrete combination of factor values, optionally anchored to a parent sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permutation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentKey>,
    pub assignments: Vec<FactorAssignment>,
}

impl Permutation {
    /// Ordered strings: parent key first (if any), then `value` / `value unit` per factor
    pub fn values(&self) -> Vec<String> {
        self.parent
            .iter()
            .map(|p| p.label.clone())
            .chain(self.assignments.iter().map(FactorAssignment::display))
            .collect()
    }

    /// Factor values only, used as the child's secondary name
    pub fn condition_label(&self) -> String {
        self.assignments.iter().map(FactorAssignment::display).join("; ")
    }

    pub fn label(&self) -> String {
        self.values().join("; ")
    }

    pub fn factor_list(&self) -> Result<FactorList, GenerationError> {
        FactorList::new(self.assignments.clone())
    }
}

/// Expands declared factors into their full cross-product
pub struct FactorPermuter;

impl FactorPermuter {
    /// Cross-product in nested-loop order, first-declared factor varying slowest.
    ///
    /// No factors yield no permutations; a factor without values empties the result.
    pub fn permute(factors: &[Factor]) -> Vec<Permutation> {
        if factors.is_empty() {
            return Vec::new();
        }
        Self::cross_product(factors)
            .into_iter()
            .map(|assignments| Permutation {
                parent: None,
                assignments,
            })
            .collect()
    }

    /// The full cross-product repeated once per parent, parents in input order.
    ///
    /// Without factors every parent yields exactly one permutation holding only its key.
    pub fn permute_with_parents(factors: &[Factor], parents: &[Sample]) -> Vec<Permutation> {
        let combinations = if factors.is_empty() {
            vec![Vec::new()]
        } else {
            Self::cross_product(factors)
        };
        parents
            .iter()
            .flat_map(|parent| {
                let key = ParentKey::of(parent);
                combinations.iter().map(move |assignments| Permutation {
                    parent: Some(key.clone()),
                    assignments: assignments.clone(),
                })
            })
            .collect()
    }

    /// String-only view used by condition previews
    pub fn preview(factors: &[Factor], parents: &[Sample]) -> Vec<String> {
        let permutations = if parents.is_empty() {
            Self::permute(factors)
        } else {
            Self::permute_with_parents(factors, parents)
        };
        permutations.iter().map(Permutation::label).collect()
    }

    fn cross_product(factors: &[Factor]) -> Vec<Vec<FactorAssignment>> {
        if factors.iter().any(|f| f.values.is_empty()) {
            return Vec::new();
        }
        factors
            .iter()
            .map(|factor| {
                factor
                    .values
                    .iter()
                    .map(|value| FactorAssignment::new(factor.label.clone(), value))
                    .collect::<Vec<_>>()
            })
            .multi_cartesian_product()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FactorValue, SampleType};
    use std::collections::HashSet;

    fn factor(label: &str, values: &[&str]) -> Factor {
        Factor::new(label, values.iter().map(|v| FactorValue::new(*v)).collect())
    }

    fn entity(code: &str, name: &str) -> Sample {
        Sample::new(
            code.to_string(),
            "QABCDE1".to_string(),
            "QABCD",
            "SPACE",
            SampleType::BiologicalEntity,
            name,
        )
    }

    #[test]
    fn test_cross_product_size_and_order() {
        let factors = vec![
            factor("genotype", &["wt", "ko"]),
            factor("treatment", &["a", "b", "c"]),
        ];
        let perms = FactorPermuter::permute(&factors);
        assert_eq!(perms.len(), 6);
        let labels: Vec<String> = perms.iter().map(Permutation::label).collect();
        assert_eq!(
            labels,
            vec!["wt; a", "wt; b", "wt; c", "ko; a", "ko; b", "ko; c"]
        );
        let distinct: HashSet<Vec<String>> = perms.iter().map(Permutation::values).collect();
        assert_eq!(distinct.len(), 6);
    }

    #[test]
    fn test_units_are_appended() {
        let factors = vec![Factor::new(
            "timepoint",
            vec![FactorValue::with_unit("12", "h"), FactorValue::new("baseline")],
        )];
        let perms = FactorPermuter::permute(&factors);
        assert_eq!(perms[0].values(), vec!["12 h"]);
        assert_eq!(perms[1].values(), vec!["baseline"]);
    }

    #[test]
    fn test_product_sizes() {
        for sizes in [vec![1], vec![2, 2], vec![3, 1, 4], vec![2, 3, 2, 2]] {
            let factors: Vec<Factor> = sizes
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    Factor::new(
                        format!("f{}", i),
                        (0..*n).map(|v| FactorValue::new(format!("v{}", v))).collect(),
                    )
                })
                .collect();
            let expected: usize = sizes.iter().product();
            assert_eq!(FactorPermuter::permute(&factors).len(), expected);
        }
    }

    #[test]
    fn test_parents_grouped_contiguously() {
        let parents = vec![
            entity("QABCDENTITY-1", "mouse 1"),
            entity("QABCDENTITY-2", "mouse 2"),
            entity("QABCDENTITY-3", "mouse 3"),
        ];
        let factors = vec![factor("tissue", &["liver", "kidney"])];
        let perms = FactorPermuter::permute_with_parents(&factors, &parents);
        assert_eq!(perms.len(), 6);
        let parent_codes: Vec<&str> = perms
            .iter()
            .map(|p| p.parent.as_ref().unwrap().code.as_str())
            .collect();
        assert_eq!(
            parent_codes,
            vec![
                "QABCDENTITY-1",
                "QABCDENTITY-1",
                "QABCDENTITY-2",
                "QABCDENTITY-2",
                "QABCDENTITY-3",
                "QABCDENTITY-3"
            ]
        );
        assert_eq!(perms[0].values(), vec!["(1) mouse 1", "liver"]);
    }

    #[test]
    fn test_empty_factor_lists() {
        assert!(FactorPermuter::permute(&[]).is_empty());

        let parents = vec![entity("QABCDENTITY-1", "mouse 1"), entity("QABCDENTITY-2", "")];
        let perms = FactorPermuter::permute_with_parents(&[], &parents);
        assert_eq!(perms.len(), 2);
        assert_eq!(perms[0].values(), vec!["(1) mouse 1"]);
    }

    #[test]
    fn test_factor_without_values_empties_the_grouping() {
        let factors = vec![factor("genotype", &["wt", "ko"]), factor("treatment", &[])];
        assert!(FactorPermuter::permute(&factors).is_empty());
        let parents = vec![entity("QABCDENTITY-1", "mouse 1")];
        assert!(FactorPermuter::permute_with_parents(&factors, &parents).is_empty());
    }
}
