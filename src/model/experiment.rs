use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{keys, PropertyValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentType {
    QExperimentalDesign,
    QSampleExtraction,
    QSamplePreparation,
    QMsMeasurement,
    QNgsMeasurement,
    QMhcLigandExtraction,
    QProjectDetails,
}

impl ExperimentType {
    pub fn code(&self) -> &'static str {
        match self {
            ExperimentType::QExperimentalDesign => "Q_EXPERIMENTAL_DESIGN",
            ExperimentType::QSampleExtraction => "Q_SAMPLE_EXTRACTION",
            ExperimentType::QSamplePreparation => "Q_SAMPLE_PREPARATION",
            ExperimentType::QMsMeasurement => "Q_MS_MEASUREMENT",
            ExperimentType::QNgsMeasurement => "Q_NGS_MEASUREMENT",
            ExperimentType::QMhcLigandExtraction => "Q_MHC_LIGAND_EXTRACTION",
            ExperimentType::QProjectDetails => "Q_PROJECT_DETAILS",
        }
    }
}

/// Named grouping owning one or more samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub code: String,
    pub experiment_type: ExperimentType,
    pub project_code: String,
    pub space_code: String,
    #[serde(default)]
    pub pilot: bool,
    /// Person-store id of the responsible contact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_id: Option<i32>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Experiment {
    pub fn new(
        code: String,
        experiment_type: ExperimentType,
        project_code: &str,
        space_code: &str,
    ) -> Self {
        Self {
            code,
            experiment_type,
            project_code: project_code.to_string(),
            space_code: space_code.to_string(),
            pilot: false,
            person_id: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_pilot(mut self, pilot: bool) -> Self {
        self.pilot = pilot;
        if pilot {
            self.properties
                .insert(keys::IS_PILOT.to_string(), PropertyValue::text("true"));
        } else {
            self.properties.remove(keys::IS_PILOT);
        }
        self
    }

    pub fn with_person(mut self, person_id: Option<i32>) -> Self {
        self.person_id = person_id;
        self
    }
}
