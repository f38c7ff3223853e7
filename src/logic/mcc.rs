//! Fixed sampling scheme for clinical cohort patients.
//!
//! Every new case (`<treatment>:0<patient>:<timepoint>`) receives the same set of
//! urine, plasma and biopsy samples in the project's six standard experiments.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::GenerationError;
use crate::logic::counter::SampleCounter;
use crate::model::{
    keys, Experiment, ExperimentType, ExternalId, FactorAssignment, FactorList, FactorValue,
    PropertyValue, Sample, SampleType,
};

const HUMAN: &str = "9606";
const URINE_ALIQUOTS: u32 = 5;
const PLASMA_SAMPLES: u32 = 3;
const PLASMA_ALIQUOTS: u32 = 2;
const CRYOVIALS: u32 = 4;
const TUMOR_BIOPSIES: u32 = 8;
const LIVER_BIOPSIES: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MccPatientRequest {
    pub project: String,
    pub treatment: String,
    pub patient: String,
    pub timepoint: String,
}

/// Row of the existing-patients overview
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MccPatient {
    pub id: String,
    pub timepoint: u8,
    pub treatment: String,
}

/// What a cohort project already holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MccProjectScan {
    pub project: String,
    /// Patient keys (`B:03`) of registered entities
    pub patients: BTreeSet<String>,
    /// Case keys (`B:03:2`) of registered samples
    pub cases: BTreeSet<String>,
    /// Treatment read from the factors of the first sample that has one
    pub treatment: Option<String>,
    pub experiments: BTreeSet<String>,
}

impl MccProjectScan {
    /// Scan a project; any sample without a well-formed external id fails the whole scan
    pub fn scan(project: &str, samples: &[Sample], experiments: &[Experiment]) -> Result<Self, GenerationError> {
        let mismatch = |detail: String| GenerationError::FormatMismatch {
            project: project.to_string(),
            detail,
        };
        let mut scan = MccProjectScan {
            project: project.to_string(),
            experiments: experiments.iter().map(|e| e.code.clone()).collect(),
            ..Default::default()
        };

        for sample in samples {
            let Some(id) = sample.parsed_external_id()? else {
                return Err(mismatch(format!("sample {} has no external id", sample.code)));
            };
            if sample.sample_type == SampleType::BiologicalEntity {
                scan.patients.insert(id.patient_key());
                continue;
            }
            if scan.treatment.is_none() {
                scan.treatment = sample.factors().get("treatment").map(|f| f.value.clone());
            }
            let case = id
                .case_key()
                .ok_or_else(|| mismatch(format!("sample {} has no timepoint in {}", sample.code, id)))?;
            scan.cases.insert(case);
        }

        info!(
            "Scanned cohort project {}: {} patients, {} cases",
            project,
            scan.patients.len(),
            scan.cases.len()
        );
        Ok(scan)
    }

    pub fn existing_patients(&self) -> Vec<MccPatient> {
        let treatment = self.treatment.clone().unwrap_or_default();
        let mut rows: Vec<MccPatient> = self
            .cases
            .iter()
            .filter_map(|case| case.parse::<ExternalId>().ok())
            .filter_map(|id| {
                id.timepoint.map(|timepoint| MccPatient {
                    id: id.patient_key(),
                    timepoint,
                    treatment: treatment.clone(),
                })
            })
            .collect();
        rows.sort();
        rows
    }
}

/// Experiments and tiers of one new case, ready for batch registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MccBatch {
    pub case: String,
    pub experiments: Vec<Experiment>,
    pub tiers: Vec<Vec<Sample>>,
}

pub struct MccPlanner;

impl MccPlanner {
    /// Case identifier of the request; fails if the input is malformed or the case exists
    pub fn validate(request: &MccPatientRequest, scan: &MccProjectScan) -> Result<ExternalId, GenerationError> {
        if request.project.trim().is_empty() {
            return Err(GenerationError::InvalidInput("no project selected".to_string()));
        }
        let treatment = scan.treatment.as_deref().unwrap_or(&request.treatment);
        if treatment.trim().is_empty() {
            return Err(GenerationError::InvalidInput("treatment is required".to_string()));
        }
        let case = ExternalId::case(treatment, &request.patient, &request.timepoint)
            .map_err(GenerationError::InvalidInput)?;
        if let Some(key) = case.case_key() {
            if scan.cases.contains(&key) {
                return Err(GenerationError::InvalidInput(format!(
                    "case {} already exists in {}",
                    key, request.project
                )));
            }
        }
        Ok(case)
    }

    pub fn generate(
        request: &MccPatientRequest,
        scan: &MccProjectScan,
        space: &str,
        counter: &mut SampleCounter,
    ) -> Result<MccBatch, GenerationError> {
        let case = Self::validate(request, scan)?;
        let project = request.project.as_str();
        let treatment = scan.treatment.clone().unwrap_or_else(|| request.treatment.clone());
        let timepoint = case.timepoint.unwrap_or_default();
        let experiment_code = |n: u32| format!("{}E{}", project, n);
        let tier_id = |letter: char, index: u32| {
            case.tier(letter, index).map_err(GenerationError::InvalidInput)
        };
        let aliquot_id = |parent: &ExternalId, i: u32| parent.aliquot(i).map_err(GenerationError::InvalidInput);

        let factors = FactorList::new(vec![
            FactorAssignment::new("treatment", &FactorValue::new(treatment.clone())),
            FactorAssignment::new("timepoint", &FactorValue::new(format!("evaluation #{}", timepoint))),
        ])?;
        let derived = |code: String, experiment: u32, sample_type: SampleType, name: String, parent: &str, id: &ExternalId| {
            Sample::new(code, experiment_code(experiment), project, space, sample_type, name)
                .with_parent(parent)
                .with_property(keys::EXTERNAL_ID, PropertyValue::text(id.to_string()))
                .with_property(keys::FACTORS, PropertyValue::Factors(factors.clone()))
        };

        let mut experiments = Vec::new();
        for (n, experiment_type) in [
            (1, ExperimentType::QExperimentalDesign),
            (2, ExperimentType::QSampleExtraction),
            (3, ExperimentType::QSampleExtraction),
            (4, ExperimentType::QSampleExtraction),
            (5, ExperimentType::QSamplePreparation),
            (6, ExperimentType::QSampleExtraction),
        ] {
            let code = experiment_code(n);
            counter.observe_code(&code);
            if !scan.experiments.contains(&code) {
                experiments.push(Experiment::new(code, experiment_type, project, space));
            }
        }

        let patient_id = ExternalId {
            timepoint: None,
            tier: None,
            ..case
        };
        let entity_code = format!("{}ENTITY-{}", project, case.patient);
        let mut patients = Vec::new();
        if !scan.patients.contains(&patient_id.patient_key()) {
            if !counter.claim(&entity_code) {
                return Err(GenerationError::InvalidInput(format!(
                    "{} is taken by a sample without matching external id",
                    entity_code
                )));
            }
            patients.push(
                Sample::new(
                    entity_code.clone(),
                    experiment_code(1),
                    project,
                    space,
                    SampleType::BiologicalEntity,
                    format!("patient #{}", case.patient),
                )
                .with_property(keys::EXTERNAL_ID, PropertyValue::text(patient_id.to_string()))
                .with_property(keys::ORGANISM, PropertyValue::term(HUMAN)),
            );
        }

        let urine_id = tier_id('U', 1)?;
        let urine_code = counter.next_barcode();
        let urine = vec![derived(
            urine_code.clone(),
            2,
            SampleType::BiologicalSample,
            "urine sample".to_string(),
            &entity_code,
            &urine_id,
        )
        .with_property(keys::PRIMARY_TISSUE, PropertyValue::term("URINE"))];

        let mut urine_aliquots = Vec::new();
        for i in 1..=URINE_ALIQUOTS {
            urine_aliquots.push(
                derived(
                    counter.next_barcode(),
                    3,
                    SampleType::BiologicalSample,
                    format!("aliquot #{}", i),
                    &urine_code,
                    &aliquot_id(&urine_id, i)?,
                )
                .with_property(keys::PRIMARY_TISSUE, PropertyValue::term("URINE")),
            );
        }

        let mut plasma = Vec::new();
        let mut plasma_aliquots = Vec::new();
        let mut cryovials = Vec::new();
        for i in 1..=PLASMA_SAMPLES {
            let plasma_id = tier_id('B', i)?;
            let plasma_code = counter.next_barcode();
            plasma.push(
                derived(
                    plasma_code.clone(),
                    4,
                    SampleType::BiologicalSample,
                    format!("EDTA plasma #{}", i),
                    &entity_code,
                    &plasma_id,
                )
                .with_property(keys::PRIMARY_TISSUE, PropertyValue::term("BLOOD_PLASMA")),
            );
            if i == 1 {
                for j in 1..=PLASMA_ALIQUOTS {
                    plasma_aliquots.push(
                        derived(
                            counter.next_barcode(),
                            4,
                            SampleType::BiologicalSample,
                            format!("plasma aliquot #{}", j),
                            &plasma_code,
                            &aliquot_id(&plasma_id, j)?,
                        )
                        .with_property(keys::PRIMARY_TISSUE, PropertyValue::term("BLOOD_PLASMA")),
                    );
                }
            }
            if i == PLASMA_SAMPLES {
                for j in 1..=CRYOVIALS {
                    cryovials.push(
                        derived(
                            counter.next_barcode(),
                            5,
                            SampleType::TestSample,
                            format!("cryovial #{}", j),
                            &plasma_code,
                            &aliquot_id(&plasma_id, j)?,
                        )
                        .with_property(keys::SAMPLE_TYPE, PropertyValue::term("SMALLMOLECULES")),
                    );
                }
            }
        }

        let mut biopsies = Vec::new();
        for (letter, count, tissue, label) in [
            ('T', TUMOR_BIOPSIES, "HEPATOCELLULAR_CARCINOMA", "tumor biopsy"),
            ('L', LIVER_BIOPSIES, "LIVER", "liver biopsy"),
        ] {
            for i in 1..=count {
                biopsies.push(
                    derived(
                        counter.next_barcode(),
                        6,
                        SampleType::BiologicalSample,
                        format!("{} #{}", label, i),
                        &entity_code,
                        &case.biopsy(letter, i).map_err(GenerationError::InvalidInput)?,
                    )
                    .with_property(keys::PRIMARY_TISSUE, PropertyValue::term(tissue)),
                );
            }
        }

        let tiers: Vec<Vec<Sample>> = [
            patients,
            urine,
            urine_aliquots,
            plasma,
            plasma_aliquots,
            cryovials,
            biopsies,
        ]
        .into_iter()
        .filter(|tier| !tier.is_empty())
        .collect();

        let case_key = case.case_key().unwrap_or_default();
        info!(
            "Prepared case {} in {} with {} samples",
            case_key,
            project,
            tiers.iter().map(Vec::len).sum::<usize>()
        );
        Ok(MccBatch {
            case: case_key,
            experiments,
            tiers,
        })
    }
}
