use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::GenerationError;
use crate::model::{keys, ExternalId, FactorList, SampleType};

/// Typed sample/experiment property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// Free text
    Text(String),
    /// Controlled vocabulary code (tissue, organism, sample type, ...)
    Term(String),
    /// Structured factor list, rendered as XML
    Factors(FactorList),
    /// Ordered list of values (enzymes, pool sources)
    List(Vec<String>),
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Text(value.into())
    }

    pub fn term(value: impl Into<String>) -> Self {
        PropertyValue::Term(value.into())
    }

    /// Flat representation used by the registry and the TSV export
    pub fn render(&self) -> Result<String, GenerationError> {
        match self {
            PropertyValue::Text(v) | PropertyValue::Term(v) => Ok(v.clone()),
            PropertyValue::Factors(list) => list.to_xml(),
            PropertyValue::List(values) => Ok(values.join(", ")),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) | PropertyValue::Term(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Type a raw registry value by its key; factor XML is validated here
    pub fn from_raw(key: &str, raw: &str) -> Result<Self, GenerationError> {
        match key {
            keys::FACTORS => Ok(PropertyValue::Factors(FactorList::from_xml(raw)?)),
            keys::ORGANISM | keys::PRIMARY_TISSUE | keys::SAMPLE_TYPE => {
                Ok(PropertyValue::term(raw))
            }
            keys::POOL_SOURCES | keys::ENZYMES => Ok(PropertyValue::List(
                raw.split(", ")
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            _ => Ok(PropertyValue::text(raw)),
        }
    }
}

/// One physical or logical specimen in the registry hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub code: String,
    pub experiment_code: String,
    pub project_code: String,
    pub space_code: String,
    pub sample_type: SampleType,
    /// Owning sample(s) one tier up; pools reference all their members
    #[serde(default)]
    pub parent_codes: Vec<String>,
    pub secondary_name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Sample {
    pub fn new(
        code: String,
        experiment_code: String,
        project_code: &str,
        space_code: &str,
        sample_type: SampleType,
        secondary_name: impl Into<String>,
    ) -> Self {
        Self {
            code,
            experiment_code,
            project_code: project_code.to_string(),
            space_code: space_code.to_string(),
            sample_type,
            parent_codes: Vec::new(),
            secondary_name: secondary_name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent_codes = vec![parent.to_string()];
        self
    }

    pub fn with_property(mut self, key: &str, value: PropertyValue) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn parent_code(&self) -> Option<&str> {
        self.parent_codes.first().map(String::as_str)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyValue::as_str)
    }

    pub fn external_id(&self) -> Option<&str> {
        self.property_str(keys::EXTERNAL_ID)
    }

    /// Parsed external identifier; `Ok(None)` when the sample carries none
    pub fn parsed_external_id(&self) -> Result<Option<ExternalId>, GenerationError> {
        match self.external_id() {
            None => Ok(None),
            Some(raw) => raw.parse::<ExternalId>().map(Some).map_err(|detail| {
                GenerationError::FormatMismatch {
                    project: self.project_code.clone(),
                    detail: format!("sample {}: {}", self.code, detail),
                }
            }),
        }
    }

    pub fn factors(&self) -> FactorList {
        match self.properties.get(keys::FACTORS) {
            Some(PropertyValue::Factors(list)) => list.clone(),
            _ => FactorList::default(),
        }
    }

    /// Short code fragment used as the parent key in permutation previews
    pub fn short_code(&self) -> &str {
        match self.code.rsplit_once('-') {
            Some((_, tail)) => tail,
            None => self
                .code
                .strip_prefix(self.project_code.as_str())
                .filter(|rest| !rest.is_empty())
                .unwrap_or(&self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_code() {
        let entity = Sample::new(
            "QABCDENTITY-4".to_string(),
            "QABCDE1".to_string(),
            "QABCD",
            "SPACE",
            SampleType::BiologicalEntity,
            "patient #4",
        );
        assert_eq!(entity.short_code(), "4");

        let extract = Sample::new(
            "QABCD012".to_string(),
            "QABCDE2".to_string(),
            "QABCD",
            "SPACE",
            SampleType::BiologicalSample,
            "liver",
        );
        assert_eq!(extract.short_code(), "012");
    }

    #[test]
    fn test_raw_properties_are_typed() {
        assert_eq!(
            PropertyValue::from_raw(keys::PRIMARY_TISSUE, "LIVER").unwrap(),
            PropertyValue::term("LIVER")
        );
        assert_eq!(
            PropertyValue::from_raw(keys::POOL_SOURCES, "QA001, QA002").unwrap(),
            PropertyValue::List(vec!["QA001".to_string(), "QA002".to_string()])
        );
        assert!(PropertyValue::from_raw(keys::FACTORS, "<broken").is_err());
    }

    #[test]
    fn test_unparsable_external_id_is_format_mismatch() {
        let sample = Sample::new(
            "QABCD001".to_string(),
            "QABCDE2".to_string(),
            "QABCD",
            "SPACE",
            SampleType::BiologicalSample,
            "x",
        )
        .with_property(keys::EXTERNAL_ID, PropertyValue::text("no-format"));
        assert!(matches!(
            sample.parsed_external_id(),
            Err(GenerationError::FormatMismatch { .. })
        ));
    }
}
