use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::GenerationError;
use crate::logic::counter::SampleCounter;
use crate::logic::permutations::{FactorPermuter, Permutation};
use crate::model::{
    keys, Experiment, ExperimentType, Factor, FactorList, Pool, PropertyValue, Sample, SampleType,
    Vocabularies,
};

const MS_DEVICE: &str = "Q_MS_DEVICE";
const MS_LCMS_METHOD: &str = "Q_MS_LCMS_METHOD";
const CHROMATOGRAPHY_TYPE: &str = "Q_CHROMATOGRAPHY_TYPE";
const CHROMATOGRAPHY_COLUMN: &str = "Q_CHROMATOGRAPHY_COLUMN_NAME";
const MS_LCMS_METHOD_INFO: &str = "Q_MS_LCMS_METHOD_INFO";
const ADDITIONAL_INFO: &str = "Q_ADDITIONAL_INFO";
const FRACTIONATION_METHOD: &str = "Q_MS_FRACTIONATION_METHOD";

/// Properties copied onto a pool when all members agree
const SHARED_POOL_PROPERTIES: [&str; 5] = [
    keys::ORGANISM,
    keys::PRIMARY_TISSUE,
    keys::TISSUE_DETAILED,
    keys::SAMPLE_TYPE,
    keys::ENZYMES,
];

fn default_ready() -> bool {
    true
}

fn default_replicates() -> usize {
    1
}

/// Condition declarations of one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub factors: Vec<Factor>,
    /// False while the condition step still reports invalid input
    #[serde(default = "default_ready")]
    pub ready: bool,
}

impl Default for Conditions {
    fn default() -> Self {
        Self {
            factors: Vec::new(),
            ready: true,
        }
    }
}

impl Conditions {
    pub fn new(factors: Vec<Factor>) -> Self {
        Self {
            factors,
            ready: true,
        }
    }

    /// Incomplete declarations never reach the permutation engine
    pub fn check(&self, tier: &str) -> Result<(), GenerationError> {
        if !self.ready {
            return Err(GenerationError::incomplete(tier));
        }
        let mut labels = HashSet::new();
        for factor in &self.factors {
            if factor.label.trim().is_empty() || !labels.insert(factor.label.as_str()) {
                return Err(GenerationError::incomplete(tier));
            }
            if factor.values.iter().any(|v| v.value.trim().is_empty()) {
                return Err(GenerationError::incomplete(tier));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignContext {
    pub space: String,
    pub project: String,
    #[serde(default)]
    pub pilot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRequest {
    /// Organism label or NCBI taxonomy id; a `species` factor overrides it per permutation
    pub species: String,
    /// Entities per permutation (or in total without conditions)
    #[serde(default = "default_replicates")]
    pub replicates: usize,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub person_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequest {
    /// Tissue label or code; a `tissue` factor overrides it per permutation
    pub tissue: String,
    #[serde(default)]
    pub tissue_detailed: Option<String>,
    #[serde(default)]
    pub cell_line: Option<String>,
    #[serde(default = "default_replicates")]
    pub replicates: usize,
    #[serde(default)]
    pub conditions: Conditions,
    /// Tier letter of derived external ids; defaults to the tissue's initial
    #[serde(default)]
    pub tier_letter: Option<char>,
    #[serde(default)]
    pub person_id: Option<i32>,
}

/// Negative selection between tiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tailoring {
    #[serde(default)]
    pub removed: BTreeSet<String>,
    #[serde(default)]
    pub renamed: BTreeMap<String, String>,
}

/// MS measurement settings; empty values are dropped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub lcms_method: Option<String>,
    #[serde(default)]
    pub chromatography_type: Option<String>,
    #[serde(default)]
    pub column_name: Option<String>,
    #[serde(default)]
    pub lcms_method_info: Option<String>,
    #[serde(default)]
    pub additional_info: Option<String>,
    #[serde(default)]
    pub enzymes: Vec<String>,
}

impl MeasurementConfig {
    pub fn experiment_properties(&self, vocabularies: &Vocabularies) -> BTreeMap<String, PropertyValue> {
        let device = self.device.as_deref().map(|d| vocabularies.device_code(d));
        [
            (MS_DEVICE, device.as_deref()),
            (MS_LCMS_METHOD, self.lcms_method.as_deref()),
            (CHROMATOGRAPHY_TYPE, self.chromatography_type.as_deref()),
            (CHROMATOGRAPHY_COLUMN, self.column_name.as_deref()),
            (MS_LCMS_METHOD_INFO, self.lcms_method_info.as_deref()),
            (ADDITIONAL_INFO, self.additional_info.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key.to_string(), PropertyValue::text(v)))
        })
        .collect()
    }

    pub fn enzymes(&self) -> Vec<String> {
        self.enzymes
            .iter()
            .filter(|e| !e.trim().is_empty())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyteRequest {
    /// PROTEINS, PEPTIDES, RNA, DNA, SMALLMOLECULES, ...
    pub technology: String,
    #[serde(default = "default_replicates")]
    pub replicates: usize,
    #[serde(default)]
    pub measurement: Option<MeasurementConfig>,
    #[serde(default)]
    pub person_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractionationRequest {
    pub technology: String,
    pub fractions: u32,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub additional_info: Option<String>,
}

/// Samples and experiments produced by one tier expansion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierOutput {
    pub samples: Vec<Sample>,
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolOutput {
    pub pooled: Vec<Sample>,
    /// Unpooled samples followed by the pools; input of the next tier
    pub next_input: Vec<Sample>,
}

/// Generates one tier at a time from the previous tier's finalized samples.
///
/// All codes come from the session's single [`SampleCounter`].
pub struct HierarchyBuilder<'a> {
    context: &'a DesignContext,
    vocabularies: &'a Vocabularies,
    counter: &'a mut SampleCounter,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(
        context: &'a DesignContext,
        vocabularies: &'a Vocabularies,
        counter: &'a mut SampleCounter,
    ) -> Self {
        Self {
            context,
            vocabularies,
            counter,
        }
    }

    fn experiment(&mut self, experiment_type: ExperimentType) -> Experiment {
        Experiment::new(
            self.counter.next_experiment_code(),
            experiment_type,
            &self.context.project,
            &self.context.space,
        )
        .with_pilot(self.context.pilot)
    }

    fn sample(&self, code: String, experiment: &str, sample_type: SampleType, name: String) -> Sample {
        Sample::new(
            code,
            experiment.to_string(),
            &self.context.project,
            &self.context.space,
            sample_type,
            name,
        )
    }

    pub fn entities(&mut self, request: &EntityRequest) -> Result<TierOutput, GenerationError> {
        const TIER: &str = "entities";
        request.conditions.check(TIER)?;
        if request.replicates == 0 {
            return Err(GenerationError::no_samples(TIER));
        }
        let permutations = FactorPermuter::permute(&request.conditions.factors);
        if !request.conditions.factors.is_empty() && permutations.is_empty() {
            return Err(GenerationError::no_samples(TIER));
        }

        let experiment = self
            .experiment(ExperimentType::QExperimentalDesign)
            .with_person(request.person_id);
        let label = request.label.as_deref().unwrap_or("entity");
        let mut samples = Vec::new();

        if permutations.is_empty() {
            for i in 1..=request.replicates {
                let name = format!("{} #{}", label, i);
                samples.push(self.entity(&experiment, name, &request.species, FactorList::default()));
            }
        } else {
            for permutation in &permutations {
                let factors = permutation.factor_list()?;
                let species = factors
                    .get("species")
                    .map(|f| f.value.clone())
                    .unwrap_or_else(|| request.species.clone());
                for r in 1..=request.replicates {
                    let name = replicate_name(permutation.condition_label(), r, request.replicates);
                    samples.push(self.entity(&experiment, name, &species, factors.clone()));
                }
            }
        }

        info!(
            "Prepared {} entities for project {}",
            samples.len(),
            self.context.project
        );
        Ok(TierOutput {
            samples,
            experiments: vec![experiment],
        })
    }

    fn entity(&mut self, experiment: &Experiment, name: String, species: &str, factors: FactorList) -> Sample {
        let code = self.counter.next_entity_code();
        let organism = self.vocabularies.organism_code(species);
        let mut sample = self
            .sample(code, &experiment.code, SampleType::BiologicalEntity, name)
            .with_property(keys::ORGANISM, PropertyValue::term(organism));
        if !factors.is_empty() {
            sample = sample.with_property(keys::FACTORS, PropertyValue::Factors(factors));
        }
        sample
    }

    pub fn extracts(
        &mut self,
        entities: &[Sample],
        request: &ExtractRequest,
    ) -> Result<TierOutput, GenerationError> {
        const TIER: &str = "extracts";
        request.conditions.check(TIER)?;
        if entities.is_empty() {
            return Err(GenerationError::incomplete(TIER));
        }
        if request.replicates == 0 {
            return Err(GenerationError::no_samples(TIER));
        }
        let permutations = FactorPermuter::permute_with_parents(&request.conditions.factors, entities);
        if permutations.is_empty() {
            return Err(GenerationError::no_samples(TIER));
        }

        let by_code: HashMap<&str, &Sample> = entities.iter().map(|e| (e.code.as_str(), e)).collect();
        let experiment = self
            .experiment(ExperimentType::QSampleExtraction)
            .with_person(request.person_id);
        let mut per_parent: HashMap<&str, u32> = HashMap::new();
        let mut samples = Vec::new();

        for permutation in &permutations {
            let parent = permutation
                .parent
                .as_ref()
                .and_then(|key| by_code.get(key.code.as_str()))
                .copied()
                .ok_or_else(|| GenerationError::incomplete(TIER))?;
            let own = permutation.factor_list()?;
            let tissue_label = own
                .get("tissue")
                .map(|f| f.value.clone())
                .unwrap_or_else(|| request.tissue.clone());
            let (tissue, detailed) = match &request.cell_line {
                Some(cell_line) => (
                    "CELL_LINE".to_string(),
                    Some(
                        self.vocabularies
                            .cell_lines
                            .get(cell_line)
                            .cloned()
                            .unwrap_or_else(|| cell_line.clone()),
                    ),
                ),
                None => (
                    self.vocabularies.tissue_code(&tissue_label),
                    request.tissue_detailed.clone(),
                ),
            };
            let letter = request
                .tier_letter
                .or_else(|| tissue.chars().next())
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or('X');
            let factors = parent.factors().merged(&own);
            let base_name = if own.is_empty() {
                format!("{} {}", parent.secondary_name, tissue_label)
            } else {
                format!("{} {}", parent.secondary_name, permutation.condition_label())
            };

            for r in 1..=request.replicates {
                let n = per_parent.entry(parent.code.as_str()).or_insert(0);
                *n += 1;
                let external_id = derive_external_id(parent, Some(letter), *n)?;
                let code = self.counter.next_barcode();
                let name = replicate_name(base_name.trim().to_string(), r, request.replicates);
                let mut sample = self
                    .sample(code, &experiment.code, SampleType::BiologicalSample, name)
                    .with_parent(&parent.code)
                    .with_property(keys::PRIMARY_TISSUE, PropertyValue::term(tissue.clone()));
                if let Some(detailed) = &detailed {
                    sample = sample.with_property(keys::TISSUE_DETAILED, PropertyValue::text(detailed.clone()));
                }
                if !factors.is_empty() {
                    sample = sample.with_property(keys::FACTORS, PropertyValue::Factors(factors.clone()));
                }
                if let Some(external_id) = external_id {
                    sample = sample.with_property(keys::EXTERNAL_ID, PropertyValue::text(external_id));
                }
                samples.push(sample);
            }
        }

        info!(
            "Prepared {} extracts from {} entities for project {}",
            samples.len(),
            entities.len(),
            self.context.project
        );
        Ok(TierOutput {
            samples,
            experiments: vec![experiment],
        })
    }

    /// Remove and rename samples of a finished tier; the result feeds the next tier
    pub fn tailor(samples: &[Sample], tailoring: &Tailoring) -> Result<Vec<Sample>, GenerationError> {
        let known: HashSet<&str> = samples.iter().map(|s| s.code.as_str()).collect();
        if let Some(code) = tailoring
            .removed
            .iter()
            .chain(tailoring.renamed.keys())
            .find(|code| !known.contains(code.as_str()))
        {
            return Err(GenerationError::UnknownSample { code: code.clone() });
        }

        let retained: Vec<Sample> = samples
            .iter()
            .filter(|s| !tailoring.removed.contains(&s.code))
            .map(|s| {
                let mut sample = s.clone();
                if let Some(name) = tailoring.renamed.get(&s.code) {
                    sample.secondary_name = name.clone();
                }
                sample
            })
            .collect();
        debug!(
            "Tailoring kept {} of {} samples",
            retained.len(),
            samples.len()
        );
        Ok(retained)
    }

    pub fn pool(&mut self, samples: &[Sample], pools: &[Pool]) -> Result<PoolOutput, GenerationError> {
        let by_code: HashMap<&str, &Sample> = samples.iter().map(|s| (s.code.as_str(), s)).collect();
        let mut assigned: HashSet<&str> = HashSet::new();
        let mut names: HashSet<&str> = HashSet::new();

        for pool in pools {
            let invalid = |reason: String| GenerationError::InvalidPool {
                pool: pool.name.clone(),
                reason,
            };
            if pool.name.trim().is_empty() {
                return Err(invalid("pool has no name".to_string()));
            }
            if !names.insert(pool.name.as_str()) {
                return Err(invalid("duplicate pool name".to_string()));
            }
            if pool.members.len() < 2 {
                return Err(invalid("a pool needs at least two members".to_string()));
            }
            for member in &pool.members {
                if !by_code.contains_key(member.as_str()) {
                    return Err(invalid(format!("unknown member {}", member)));
                }
                if !assigned.insert(member.as_str()) {
                    return Err(invalid(format!("{} is already pooled", member)));
                }
            }
        }

        let mut pooled = Vec::new();
        for pool in pools {
            let members: Vec<&Sample> = pool.members.iter().map(|m| by_code[m.as_str()]).collect();
            let first = members[0];
            if members.iter().any(|m| m.sample_type != first.sample_type) {
                return Err(GenerationError::InvalidPool {
                    pool: pool.name.clone(),
                    reason: "members differ in sample type".to_string(),
                });
            }
            let code = self.counter.next_barcode();
            let mut sample = self.sample(code, &first.experiment_code, first.sample_type, pool.name.clone());
            sample.parent_codes = pool.members.clone();
            sample
                .properties
                .insert(keys::POOL_SOURCES.to_string(), PropertyValue::List(pool.members.clone()));

            for key in SHARED_POOL_PROPERTIES {
                if let Some(value) = first.properties.get(key) {
                    if members.iter().all(|m| m.properties.get(key) == Some(value)) {
                        sample.properties.insert(key.to_string(), value.clone());
                    }
                }
            }
            let member_factors: Vec<FactorList> = members.iter().map(|m| m.factors()).collect();
            let shared = FactorList::common(&member_factors);
            if !shared.is_empty() {
                sample
                    .properties
                    .insert(keys::FACTORS.to_string(), PropertyValue::Factors(shared));
            }
            let external_ids: Option<Vec<&str>> = members.iter().map(|m| m.external_id()).collect();
            if let Some(ids) = external_ids {
                sample
                    .properties
                    .insert(keys::EXTERNAL_ID.to_string(), PropertyValue::text(ids.join("+")));
            }
            pooled.push(sample);
        }

        let mut next_input: Vec<Sample> = samples
            .iter()
            .filter(|s| !assigned.contains(s.code.as_str()))
            .cloned()
            .collect();
        next_input.extend(pooled.iter().cloned());
        info!(
            "Pooled {} samples into {} pools",
            assigned.len(),
            pooled.len()
        );
        Ok(PoolOutput { pooled, next_input })
    }

    pub fn test_samples(
        &mut self,
        inputs: &[Sample],
        analytes: &[AnalyteRequest],
    ) -> Result<TierOutput, GenerationError> {
        const TIER: &str = "test samples";
        if inputs.is_empty() || analytes.is_empty() {
            return Err(GenerationError::incomplete(TIER));
        }
        if analytes.iter().any(|a| a.technology.trim().is_empty()) {
            return Err(GenerationError::incomplete(TIER));
        }
        if analytes.iter().all(|a| a.replicates == 0) {
            return Err(GenerationError::no_samples(TIER));
        }

        let mut experiments = Vec::new();
        for analyte in analytes {
            let mut experiment = self
                .experiment(ExperimentType::QSamplePreparation)
                .with_person(analyte.person_id);
            if let Some(measurement) = &analyte.measurement {
                experiment
                    .properties
                    .extend(measurement.experiment_properties(self.vocabularies));
            }
            experiments.push(experiment);
        }

        let mut samples = Vec::new();
        for input in inputs {
            let mut index = 0;
            for (analyte, experiment) in analytes.iter().zip(&experiments) {
                let enzymes = analyte
                    .measurement
                    .as_ref()
                    .map(MeasurementConfig::enzymes)
                    .unwrap_or_default();
                for r in 1..=analyte.replicates {
                    index += 1;
                    let external_id = derive_external_id(input, None, index)?;
                    let code = self.counter.next_barcode();
                    let name = replicate_name(
                        format!("{} {}", input.secondary_name, analyte.technology),
                        r,
                        analyte.replicates,
                    );
                    let mut sample = self
                        .sample(code, &experiment.code, SampleType::TestSample, name)
                        .with_parent(&input.code)
                        .with_property(keys::SAMPLE_TYPE, PropertyValue::term(analyte.technology.clone()));
                    if !enzymes.is_empty() {
                        sample = sample.with_property(keys::ENZYMES, PropertyValue::List(enzymes.clone()));
                    }
                    if let Some(external_id) = external_id {
                        sample = sample.with_property(keys::EXTERNAL_ID, PropertyValue::text(external_id));
                    }
                    samples.push(sample);
                }
            }
        }

        info!(
            "Prepared {} test samples for {} analytes",
            samples.len(),
            analytes.len()
        );
        Ok(TierOutput {
            samples,
            experiments,
        })
    }

    /// One sample per fraction for every test sample of the requested technology
    pub fn fractionate(
        &mut self,
        tests: &[Sample],
        request: &FractionationRequest,
    ) -> Result<TierOutput, GenerationError> {
        const TIER: &str = "fractions";
        if request.fractions == 0 || request.technology.trim().is_empty() {
            return Err(GenerationError::incomplete(TIER));
        }
        let sources: Vec<&Sample> = tests
            .iter()
            .filter(|t| t.property_str(keys::SAMPLE_TYPE) == Some(request.technology.as_str()))
            .collect();
        if sources.is_empty() {
            return Err(GenerationError::no_samples(TIER));
        }

        let mut experiment = self.experiment(ExperimentType::QSamplePreparation);
        for (key, value) in [
            (FRACTIONATION_METHOD, &request.method),
            (ADDITIONAL_INFO, &request.additional_info),
        ] {
            if let Some(value) = value.as_ref().filter(|v| !v.trim().is_empty()) {
                experiment
                    .properties
                    .insert(key.to_string(), PropertyValue::text(value.clone()));
            }
        }

        let mut samples = Vec::new();
        for source in sources {
            // fractions keep the source's identifier, distinguished by their index;
            // a pool's joined member ids are copied as they are
            let external_id = if source.properties.contains_key(keys::POOL_SOURCES) {
                source.external_id().map(str::to_string)
            } else {
                source.parsed_external_id()?.map(|id| id.to_string())
            };
            for i in 1..=request.fractions {
                let code = self.counter.next_barcode();
                let name = format!("{} fraction #{}", source.secondary_name, i);
                let mut sample = self
                    .sample(code, &experiment.code, SampleType::TestSample, name)
                    .with_parent(&source.code)
                    .with_property(keys::SAMPLE_TYPE, PropertyValue::term(request.technology.clone()))
                    .with_property(keys::FRACTION_INDEX, PropertyValue::text(i.to_string()));
                if let Some(enzymes) = source.properties.get(keys::ENZYMES) {
                    sample = sample.with_property(keys::ENZYMES, enzymes.clone());
                }
                if let Some(external_id) = &external_id {
                    sample = sample.with_property(keys::EXTERNAL_ID, PropertyValue::text(external_id.clone()));
                }
                samples.push(sample);
            }
        }

        info!(
            "Prepared {} {} fractions",
            samples.len(),
            request.technology
        );
        Ok(TierOutput {
            samples,
            experiments: vec![experiment],
        })
    }

    /// `<project>000` attachment sample in `<project>_INFO`; None if the project already has it
    pub fn info_attachment(&mut self) -> Option<(Experiment, Sample)> {
        let project = self.context.project.clone();
        let code = format!("{}000", project);
        if !self.counter.claim(&code) {
            return None;
        }
        let experiment = Experiment::new(
            format!("{}_INFO", project),
            ExperimentType::QProjectDetails,
            &project,
            &self.context.space,
        );
        let sample = self.sample(code, &experiment.code, SampleType::AttachmentSample, String::new());
        Some((experiment, sample))
    }
}

fn replicate_name(base: String, replicate: usize, replicates: usize) -> String {
    if replicates > 1 {
        format!("{} #{}", base, replicate)
    } else {
        base
    }
}

/// External id of the `index`-th child of `parent`.
///
/// Case ids get a tier segment, tier ids an aliquot letter; other parsable ids
/// yield none. Unparsable parent ids are a format mismatch.
fn derive_external_id(
    parent: &Sample,
    letter: Option<char>,
    index: u32,
) -> Result<Option<String>, GenerationError> {
    if parent.properties.contains_key(keys::POOL_SOURCES) {
        return Ok(None);
    }
    let Some(id) = parent.parsed_external_id()? else {
        return Ok(None);
    };
    let derived = match (id.timepoint, id.tier, letter) {
        (Some(_), None, Some(letter)) => id.tier(letter, index),
        (_, Some(tier), _) if tier.sub.is_none() => id.aliquot(index),
        _ => {
            debug!("No child identifier derivable from {}", id);
            return Ok(None);
        }
    };
    derived
        .map(|d| Some(d.to_string()))
        .map_err(GenerationError::InvalidInput)
}

/// Previews of a tier's permutations before generation
pub fn preview(conditions: &Conditions, parents: &[Sample], tier: &str) -> Result<Vec<Permutation>, GenerationError> {
    conditions.check(tier)?;
    let permutations = if parents.is_empty() {
        FactorPermuter::permute(&conditions.factors)
    } else {
        FactorPermuter::permute_with_parents(&conditions.factors, parents)
    };
    if permutations.is_empty() {
        return Err(GenerationError::no_samples(tier));
    }
    Ok(permutations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FactorValue;

    fn context() -> DesignContext {
        DesignContext {
            space: "SPACE".to_string(),
            project: "QABCD".to_string(),
            pilot: false,
        }
    }

    fn factor(label: &str, values: &[&str]) -> Factor {
        Factor::new(label, values.iter().map(|v| FactorValue::new(*v)).collect())
    }

    fn entity_request(replicates: usize, factors: Vec<Factor>) -> EntityRequest {
        EntityRequest {
            species: "9606".to_string(),
            replicates,
            conditions: Conditions::new(factors),
            label: Some("patient".to_string()),
            person_id: None,
        }
    }

    fn extract_request(tissue: &str, factors: Vec<Factor>) -> ExtractRequest {
        ExtractRequest {
            tissue: tissue.to_string(),
            tissue_detailed: None,
            cell_line: None,
            replicates: 1,
            conditions: Conditions::new(factors),
            tier_letter: None,
            person_id: None,
        }
    }

    #[test]
    fn test_entities_from_replicates_and_conditions() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);

        let plain = builder.entities(&entity_request(3, vec![])).unwrap();
        assert_eq!(plain.samples.len(), 3);
        assert_eq!(plain.samples[0].secondary_name, "patient #1");
        assert!(plain.samples.iter().all(|s| s.parent_codes.is_empty()));
        assert_eq!(plain.experiments[0].experiment_type, ExperimentType::QExperimentalDesign);

        let conditioned = builder
            .entities(&entity_request(2, vec![factor("genotype", &["wt", "ko"])]))
            .unwrap();
        assert_eq!(conditioned.samples.len(), 4);
        assert_eq!(conditioned.samples[0].secondary_name, "wt #1");
        assert_eq!(conditioned.samples[0].code, "QABCDENTITY-4");
        assert_eq!(
            conditioned.samples[3].factors().get("genotype").unwrap().value,
            "ko"
        );
    }

    #[test]
    fn test_not_ready_conditions_build_no_table() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let mut request = entity_request(1, vec![factor("genotype", &["wt"])]);
        request.conditions.ready = false;
        assert_eq!(
            builder.entities(&request),
            Err(GenerationError::incomplete("entities"))
        );

        let empty = entity_request(1, vec![factor("genotype", &[])]);
        assert_eq!(
            builder.entities(&empty),
            Err(GenerationError::no_samples("entities"))
        );
        // nothing was allocated by the failed attempts
        assert_eq!(counter.next_entity_code(), "QABCDENTITY-1");
    }

    #[test]
    fn test_extracts_are_parented_and_derive_external_ids() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let mut entities = builder.entities(&entity_request(2, vec![])).unwrap().samples;
        entities[0]
            .properties
            .insert(keys::EXTERNAL_ID.to_string(), PropertyValue::text("B:03:2"));

        let extracts = builder
            .extracts(&entities, &extract_request("URINE", vec![factor("treatment", &["a", "b"])]))
            .unwrap();
        assert_eq!(extracts.samples.len(), 4);
        assert_eq!(extracts.samples[0].parent_code(), Some("QABCDENTITY-1"));
        assert_eq!(extracts.samples[2].parent_code(), Some("QABCDENTITY-2"));
        assert_eq!(extracts.samples[0].external_id(), Some("B:03:2:U:1"));
        assert_eq!(extracts.samples[1].external_id(), Some("B:03:2:U:2"));
        assert_eq!(extracts.samples[2].external_id(), None);
        assert_eq!(extracts.samples[0].secondary_name, "patient #1 a");
        assert_eq!(
            extracts.samples[0].property_str(keys::PRIMARY_TISSUE),
            Some("URINE")
        );
    }

    #[test]
    fn test_malformed_parent_external_id_is_rejected() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let mut entities = builder.entities(&entity_request(1, vec![])).unwrap().samples;
        entities[0]
            .properties
            .insert(keys::EXTERNAL_ID.to_string(), PropertyValue::text("patient seven"));
        let res = builder.extracts(&entities, &extract_request("LIVER", vec![]));
        assert!(matches!(res, Err(GenerationError::FormatMismatch { .. })));
    }

    #[test]
    fn test_tailoring_removes_and_renames() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let entities = builder.entities(&entity_request(3, vec![])).unwrap().samples;

        let tailoring = Tailoring {
            removed: BTreeSet::from(["QABCDENTITY-2".to_string()]),
            renamed: BTreeMap::from([("QABCDENTITY-3".to_string(), "mouse C".to_string())]),
        };
        let retained = HierarchyBuilder::tailor(&entities, &tailoring).unwrap();
        assert_eq!(retained.len(), 2);
        assert_eq!(retained[1].secondary_name, "mouse C");

        let extracts = builder
            .extracts(&retained, &extract_request("LIVER", vec![]))
            .unwrap();
        assert!(extracts
            .samples
            .iter()
            .all(|s| s.parent_code() != Some("QABCDENTITY-2")));
        // the source tier is untouched
        assert_eq!(entities[2].secondary_name, "patient #3");

        let unknown = Tailoring {
            removed: BTreeSet::from(["QXXXX001".to_string()]),
            ..Default::default()
        };
        assert!(HierarchyBuilder::tailor(&entities, &unknown).is_err());
    }

    #[test]
    fn test_pooling() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let entities = builder.entities(&entity_request(3, vec![])).unwrap().samples;
        let extracts = builder
            .extracts(&entities, &extract_request("LIVER", vec![]))
            .unwrap()
            .samples;
        let a = extracts[2].code.clone();
        let b = extracts[0].code.clone();

        let out = builder
            .pool(&extracts, &[Pool::new("liver pool", vec![a.clone(), b.clone()])])
            .unwrap();
        assert_eq!(out.pooled.len(), 1);
        let pool = &out.pooled[0];
        assert_eq!(pool.parent_codes, vec![a.clone(), b.clone()]);
        assert_eq!(
            pool.properties.get(keys::POOL_SOURCES),
            Some(&PropertyValue::List(vec![a.clone(), b.clone()]))
        );
        assert_eq!(pool.property_str(keys::PRIMARY_TISSUE), Some("LIVER"));
        let next: Vec<&str> = out.next_input.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(next, vec![extracts[1].code.as_str(), pool.code.as_str()]);

        let tests = builder
            .test_samples(
                &out.next_input,
                &[AnalyteRequest {
                    technology: "PROTEINS".to_string(),
                    replicates: 1,
                    measurement: None,
                    person_id: None,
                }],
            )
            .unwrap();
        assert!(tests
            .samples
            .iter()
            .all(|t| t.parent_code() != Some(a.as_str()) && t.parent_code() != Some(b.as_str())));
    }

    #[test]
    fn test_invalid_pools() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let entities = builder.entities(&entity_request(3, vec![])).unwrap().samples;
        let codes: Vec<String> = entities.iter().map(|e| e.code.clone()).collect();

        let overlapping = [
            Pool::new("p1", vec![codes[0].clone(), codes[1].clone()]),
            Pool::new("p2", vec![codes[1].clone(), codes[2].clone()]),
        ];
        assert!(matches!(
            builder.pool(&entities, &overlapping),
            Err(GenerationError::InvalidPool { .. })
        ));
        let single = [Pool::new("p1", vec![codes[0].clone()])];
        assert!(builder.pool(&entities, &single).is_err());
        let unknown = [Pool::new("p1", vec![codes[0].clone(), "QABCD999".to_string()])];
        assert!(builder.pool(&entities, &unknown).is_err());
    }

    #[test]
    fn test_ms_test_samples_and_fractionation() {
        let ctx = context();
        let mut vocab = Vocabularies::default();
        vocab
            .ms_devices
            .insert("Orbitrap Fusion".to_string(), "THERMO_ORBITRAP_FUSION".to_string());
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let entities = builder.entities(&entity_request(2, vec![])).unwrap().samples;
        let extracts = builder
            .extracts(&entities, &extract_request("LIVER", vec![]))
            .unwrap()
            .samples;

        let analytes = vec![
            AnalyteRequest {
                technology: "PROTEINS".to_string(),
                replicates: 1,
                measurement: Some(MeasurementConfig {
                    device: Some("Orbitrap Fusion".to_string()),
                    lcms_method: Some(String::new()),
                    enzymes: vec!["TRYPSIN".to_string(), String::new()],
                    ..Default::default()
                }),
                person_id: None,
            },
            AnalyteRequest {
                technology: "RNA".to_string(),
                replicates: 2,
                measurement: None,
                person_id: None,
            },
        ];
        let tests = builder.test_samples(&extracts, &analytes).unwrap();
        assert_eq!(tests.samples.len(), 6);
        assert_eq!(tests.experiments.len(), 2);
        let ms = &tests.experiments[0];
        assert_eq!(
            ms.properties.get(MS_DEVICE),
            Some(&PropertyValue::text("THERMO_ORBITRAP_FUSION"))
        );
        assert!(!ms.properties.contains_key(MS_LCMS_METHOD));
        assert_eq!(
            tests.samples[0].properties.get(keys::ENZYMES),
            Some(&PropertyValue::List(vec!["TRYPSIN".to_string()]))
        );

        let fractions = builder
            .fractionate(
                &tests.samples,
                &FractionationRequest {
                    technology: "PROTEINS".to_string(),
                    fractions: 3,
                    method: Some("SEC".to_string()),
                    additional_info: None,
                },
            )
            .unwrap();
        assert_eq!(fractions.samples.len(), 6);
        assert_eq!(fractions.samples[0].parent_code(), Some(tests.samples[0].code.as_str()));
        assert_eq!(fractions.samples[2].property_str(keys::FRACTION_INDEX), Some("3"));
    }

    #[test]
    fn test_fractionating_a_pool_keeps_joined_ids() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let entities = builder.entities(&entity_request(2, vec![])).unwrap().samples;
        let extracts = builder
            .extracts(&entities, &extract_request("URINE", vec![]))
            .unwrap()
            .samples;
        let proteins = AnalyteRequest {
            technology: "PROTEINS".to_string(),
            replicates: 1,
            measurement: None,
            person_id: None,
        };
        let mut tests = builder.test_samples(&extracts, &[proteins]).unwrap().samples;
        for (test, id) in tests.iter_mut().zip(["B:03:2:U:1a", "B:03:2:U:2a"]) {
            test.properties
                .insert(keys::EXTERNAL_ID.to_string(), PropertyValue::text(id));
        }
        let members: Vec<String> = tests.iter().map(|t| t.code.clone()).collect();
        let pooled = builder
            .pool(&tests, &[Pool::new("protein pool", members)])
            .unwrap();
        let pool = &pooled.pooled[0];
        assert_eq!(pool.external_id(), Some("B:03:2:U:1a+B:03:2:U:2a"));

        let fractions = builder
            .fractionate(
                &pooled.next_input,
                &FractionationRequest {
                    technology: "PROTEINS".to_string(),
                    fractions: 2,
                    method: None,
                    additional_info: None,
                },
            )
            .unwrap();
        assert_eq!(fractions.samples.len(), 2);
        for fraction in &fractions.samples {
            assert_eq!(fraction.parent_code(), Some(pool.code.as_str()));
            assert_eq!(fraction.external_id(), Some("B:03:2:U:1a+B:03:2:U:2a"));
        }
    }

    #[test]
    fn test_info_attachment_only_once() {
        let ctx = context();
        let vocab = Vocabularies::default();
        let mut counter = SampleCounter::new("QABCD");
        let mut builder = HierarchyBuilder::new(&ctx, &vocab, &mut counter);
        let (experiment, sample) = builder.info_attachment().unwrap();
        assert_eq!(experiment.code, "QABCD_INFO");
        assert_eq!(sample.code, "QABCD000");
        assert!(builder.info_attachment().is_none());
    }
}
