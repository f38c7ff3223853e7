use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

/// Property keys understood by the registry
pub mod keys {
    pub const EXTERNAL_ID: &str = "Q_EXTERNALDB_ID";
    pub const FACTORS: &str = "Q_PROPERTIES";
    pub const ORGANISM: &str = "Q_NCBI_ORGANISM";
    pub const PRIMARY_TISSUE: &str = "Q_PRIMARY_TISSUE";
    pub const TISSUE_DETAILED: &str = "Q_TISSUE_DETAILED";
    pub const SAMPLE_TYPE: &str = "Q_SAMPLE_TYPE";
    pub const POOL_SOURCES: &str = "Q_POOL_SOURCES";
    pub const FRACTION_INDEX: &str = "Q_FRACTION_INDEX";
    pub const ENZYMES: &str = "Q_DIGESTION_ENZYMES";
    pub const IS_PILOT: &str = "Q_IS_PILOT";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SampleType {
    #[serde(rename = "Q_BIOLOGICAL_ENTITY")]
    BiologicalEntity,
    #[serde(rename = "Q_BIOLOGICAL_SAMPLE")]
    BiologicalSample,
    #[serde(rename = "Q_TEST_SAMPLE")]
    TestSample,
    #[serde(rename = "Q_MHC_LIGAND_EXTRACT")]
    MhcLigandExtract,
    #[serde(rename = "Q_ATTACHMENT_SAMPLE")]
    AttachmentSample,
}

impl SampleType {
    pub fn code(&self) -> &'static str {
        match self {
            SampleType::BiologicalEntity => "Q_BIOLOGICAL_ENTITY",
            SampleType::BiologicalSample => "Q_BIOLOGICAL_SAMPLE",
            SampleType::TestSample => "Q_TEST_SAMPLE",
            SampleType::MhcLigandExtract => "Q_MHC_LIGAND_EXTRACT",
            SampleType::AttachmentSample => "Q_ATTACHMENT_SAMPLE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "Q_BIOLOGICAL_ENTITY" => Some(SampleType::BiologicalEntity),
            "Q_BIOLOGICAL_SAMPLE" => Some(SampleType::BiologicalSample),
            "Q_TEST_SAMPLE" => Some(SampleType::TestSample),
            "Q_MHC_LIGAND_EXTRACT" => Some(SampleType::MhcLigandExtract),
            "Q_ATTACHMENT_SAMPLE" => Some(SampleType::AttachmentSample),
            _ => None,
        }
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Registry identifier of a project, e.g. `/SPACE/QABCD`
pub fn project_identifier(space: &str, project: &str) -> String {
    format!("/{}/{}", space, project)
}

/// Registry identifier of an experiment, e.g. `/SPACE/QABCD/QABCDE1`
pub fn experiment_identifier(space: &str, project: &str, experiment: &str) -> String {
    format!("/{}/{}/{}", space, project, experiment)
}
