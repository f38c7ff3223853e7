use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::GenerationError;

/// One possible value of a factor, optionally carrying a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactorValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl FactorValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            unit: None,
        }
    }

    pub fn with_unit(value: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            unit: Some(unit.into()),
        }
    }

    /// `value` or `value unit`
    pub fn label(&self) -> String {
        match &self.unit {
            Some(unit) if !unit.is_empty() => format!("{} {}", self.value, unit),
            _ => self.value.clone(),
        }
    }
}

/// A named axis of variation (condition) with its ordered value instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub label: String,
    pub values: Vec<FactorValue>,
}

impl Factor {
    pub fn new(label: impl Into<String>, values: Vec<FactorValue>) -> Self {
        Self {
            label: label.into(),
            values,
        }
    }
}

/// A concrete factor value assigned to one sample
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactorAssignment {
    pub label: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl FactorAssignment {
    pub fn new(label: impl Into<String>, value: &FactorValue) -> Self {
        Self {
            label: label.into(),
            value: value.value.clone(),
            unit: value.unit.clone(),
        }
    }

    pub fn display(&self) -> String {
        match &self.unit {
            Some(unit) if !unit.is_empty() => format!("{} {}", self.value, unit),
            _ => self.value.clone(),
        }
    }
}

/// Validated list of factor assignments, stored on samples as XML.
///
/// Labels are unique and non-empty, values are non-empty. The checks run on
/// construction (including deserialization), so a `FactorList` always renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FactorAssignment>", into = "Vec<FactorAssignment>")]
pub struct FactorList(Vec<FactorAssignment>);

impl FactorList {
    pub fn new(assignments: Vec<FactorAssignment>) -> Result<Self, GenerationError> {
        let mut seen = HashSet::new();
        for assignment in &assignments {
            if assignment.label.trim().is_empty() {
                return Err(GenerationError::InvalidFactorXml(
                    "factor without label".to_string(),
                ));
            }
            if assignment.value.trim().is_empty() {
                return Err(GenerationError::InvalidFactorXml(format!(
                    "factor '{}' has no value",
                    assignment.label
                )));
            }
            if !seen.insert(assignment.label.as_str()) {
                return Err(GenerationError::InvalidFactorXml(format!(
                    "factor '{}' assigned twice",
                    assignment.label
                )));
            }
        }
        Ok(Self(assignments))
    }

    pub fn assignments(&self) -> &[FactorAssignment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&FactorAssignment> {
        self.0.iter().find(|a| a.label == label)
    }

    /// Parent assignments followed by own ones; own values win on equal labels
    pub fn merged(&self, own: &FactorList) -> FactorList {
        let mut res: Vec<FactorAssignment> = self
            .0
            .iter()
            .filter(|a| own.get(&a.label).is_none())
            .cloned()
            .collect();
        res.extend(own.0.iter().cloned());
        FactorList(res)
    }

    /// Assignments shared by every list, in the order of the first list
    pub fn common<'a>(lists: impl IntoIterator<Item = &'a FactorList>) -> FactorList {
        let mut iter = lists.into_iter();
        let Some(first) = iter.next() else {
            return FactorList::default();
        };
        let rest: Vec<&FactorList> = iter.collect();
        FactorList(
            first
                .0
                .iter()
                .filter(|a| rest.iter().all(|l| l.0.contains(a)))
                .cloned()
                .collect(),
        )
    }

    pub fn to_xml(&self) -> Result<String, GenerationError> {
        let doc = QPropertiesXml {
            qfactors: QFactorsXml {
                factors: self
                    .0
                    .iter()
                    .map(|a| QFactorXml {
                        label: a.label.clone(),
                        value: a.value.clone(),
                        unit: a.unit.clone(),
                    })
                    .collect(),
            },
        };
        quick_xml::se::to_string(&doc).map_err(|e| GenerationError::InvalidFactorXml(e.to_string()))
    }

    pub fn from_xml(xml: &str) -> Result<Self, GenerationError> {
        let doc: QPropertiesXml = quick_xml::de::from_str(xml)
            .map_err(|e| GenerationError::InvalidFactorXml(format!("malformed XML: {e}")))?;
        Self::new(
            doc.qfactors
                .factors
                .into_iter()
                .map(|f| FactorAssignment {
                    label: f.label,
                    value: f.value,
                    unit: f.unit.filter(|u| !u.is_empty()),
                })
                .collect(),
        )
    }
}

impl TryFrom<Vec<FactorAssignment>> for FactorList {
    type Error = GenerationError;

    fn try_from(value: Vec<FactorAssignment>) -> Result<Self, Self::Error> {
        FactorList::new(value)
    }
}

impl From<FactorList> for Vec<FactorAssignment> {
    fn from(value: FactorList) -> Self {
        value.0
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "qproperties")]
struct QPropertiesXml {
    #[serde(default)]
    qfactors: QFactorsXml,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QFactorsXml {
    #[serde(rename = "qfactor", default)]
    factors: Vec<QFactorXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct QFactorXml {
    #[serde(rename = "@label")]
    label: String,
    #[serde(rename = "@value")]
    value: String,
    #[serde(rename = "@unit", default, skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(label: &str, value: &str, unit: Option<&str>) -> FactorAssignment {
        FactorAssignment {
            label: label.to_string(),
            value: value.to_string(),
            unit: unit.map(str::to_string),
        }
    }

    #[test]
    fn test_factor_value_label() {
        assert_eq!(FactorValue::new("control").label(), "control");
        assert_eq!(FactorValue::with_unit("12", "h").label(), "12 h");
    }

    #[test]
    fn test_factor_xml_is_read_back() {
        let list = FactorList::new(vec![
            assignment("treatment", "Blood & Co", None),
            assignment("timepoint", "12", Some("h")),
        ])
        .unwrap();
        let xml = list.to_xml().unwrap();
        assert!(xml.starts_with("<qproperties>"));
        assert!(xml.contains("&amp;"));
        assert_eq!(FactorList::from_xml(&xml).unwrap(), list);
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(matches!(
            FactorList::from_xml("<qproperties><qfactors><qfactor label="),
            Err(GenerationError::InvalidFactorXml(_))
        ));
        let missing_value =
            r#"<qproperties><qfactors><qfactor label="treatment" value=""/></qfactors></qproperties>"#;
        assert!(FactorList::from_xml(missing_value).is_err());
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let res = FactorList::new(vec![
            assignment("treatment", "a", None),
            assignment("treatment", "b", None),
        ]);
        assert!(res.is_err());
        let json = r#"[{"label":"x","value":"1"},{"label":"x","value":"2"}]"#;
        assert!(serde_json::from_str::<FactorList>(json).is_err());
    }

    #[test]
    fn test_merged_and_common() {
        let parent = FactorList::new(vec![
            assignment("genotype", "wt", None),
            assignment("treatment", "a", None),
        ])
        .unwrap();
        let own = FactorList::new(vec![assignment("treatment", "b", None)]).unwrap();
        let merged = parent.merged(&own);
        assert_eq!(merged.assignments().len(), 2);
        assert_eq!(merged.get("treatment").unwrap().value, "b");

        let common = FactorList::common([&parent, &merged]);
        assert_eq!(common.assignments(), &[assignment("genotype", "wt", None)]);
    }
}
