use anyhow::{bail, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::GenerationError;
use crate::logic::counter::SampleCounter;
use crate::model::{project_identifier, Experiment, ExperimentType, Sample};
use crate::store::{PersonStore, RegistryStore};

pub const INQUIRY_SERVICE: &str = "mail-project-inquiry";

const CODE_ALPHABET: &[u8; 24] = b"ABCDEFGHIJKLMNOPQRSTUVWX";
const MAX_CODE_ATTEMPTS: usize = 100;
const MAX_NAME_LENGTH: usize = 80;

/// Everything the registry holds for one project, used to seed a design session
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectContext {
    pub space: String,
    pub project: String,
    pub exists: bool,
    pub samples: Vec<Sample>,
    pub experiments: Vec<Experiment>,
}

impl ProjectContext {
    pub async fn load(registry: &dyn RegistryStore, space: &str, project: &str) -> Result<Self> {
        let exists = registry.project_exists(space, project).await?;
        let (samples, experiments) = if exists {
            let identifier = project_identifier(space, project);
            (
                registry.list_samples_of_project(&identifier).await?,
                registry.list_experiments_of_project(&identifier).await?,
            )
        } else {
            (Vec::new(), Vec::new())
        };
        info!(
            "Loaded context of {}/{}: {} samples, {} experiments",
            space,
            project,
            samples.len(),
            experiments.len()
        );
        Ok(Self {
            space: space.to_string(),
            project: project.to_string(),
            exists,
            samples,
            experiments,
        })
    }

    /// Fresh counter seeded from the registry's current state
    pub fn counter(&self) -> SampleCounter {
        SampleCounter::initialize(&self.project, &self.samples, &self.experiments)
    }

    fn has_populated(&self, experiment_type: ExperimentType) -> bool {
        self.experiments
            .iter()
            .filter(|e| e.experiment_type == experiment_type)
            .any(|e| self.samples.iter().any(|s| s.experiment_code == e.code))
    }

    /// True if a design experiment with samples exists
    pub fn has_bio_entities(&self) -> bool {
        self.has_populated(ExperimentType::QExperimentalDesign)
    }

    pub fn has_extracts(&self) -> bool {
        self.has_populated(ExperimentType::QSampleExtraction)
    }
}

pub async fn project_has_bio_entities(registry: &dyn RegistryStore, space: &str, project: &str) -> Result<bool> {
    Ok(ProjectContext::load(registry, space, project).await?.has_bio_entities())
}

pub async fn project_has_extracts(registry: &dyn RegistryStore, space: &str, project: &str) -> Result<bool> {
    Ok(ProjectContext::load(registry, space, project).await?.has_extracts())
}

/// Project selectable in a space, labelled `CODE (name)` when a name is known
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectOption {
    pub code: String,
    pub label: String,
}

pub async fn context_options(
    registry: &dyn RegistryStore,
    people: Option<&dyn PersonStore>,
    space: &str,
) -> Result<Vec<ProjectOption>> {
    let mut options = Vec::new();
    for code in registry.list_projects_in_space(space).await? {
        let name = match people {
            Some(people) => match people.project_name(&project_identifier(space, &code)).await {
                Ok(name) => name,
                Err(e) => {
                    warn!("No project names available: {:#}", e);
                    None
                }
            },
            None => None,
        };
        let label = match name {
            Some(name) if name.chars().count() > MAX_NAME_LENGTH => {
                let short: String = name.chars().take(MAX_NAME_LENGTH).collect();
                format!("{} ({}...)", code, short)
            }
            Some(name) => format!("{} ({})", code, name),
            None => code.clone(),
        };
        options.push(ProjectOption { code, label });
    }
    Ok(options)
}

/// `Q` followed by four alphanumerics, letters limited to A..X
pub fn validate_project_code(code: &str) -> Result<(), GenerationError> {
    let mut chars = code.chars();
    let valid = code.chars().count() == 5
        && chars.next() == Some('Q')
        && chars.all(|c| c.is_ascii_digit() || matches!(c.to_ascii_uppercase(), 'A'..='X'));
    if valid {
        Ok(())
    } else {
        Err(GenerationError::InvalidInput(format!(
            "project code {} must be Q followed by 4 letters (A-X) or digits",
            code
        )))
    }
}

fn random_project_code() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let mut code = String::from("Q");
    for b in &bytes[..4] {
        code.push(CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char);
    }
    code
}

/// Random project code not yet used in the space
pub async fn generate_project_code(registry: &dyn RegistryStore, space: &str) -> Result<String> {
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = random_project_code();
        if !registry.project_exists(space, &code).await? {
            return Ok(code);
        }
    }
    bail!("no free project code found in {} attempts", MAX_CODE_ATTEMPTS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inquiry {
    pub space: String,
    pub project: String,
    pub user: String,
    pub tsv: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Fire-and-forget request for the project to be set up by staff
pub async fn send_inquiry(registry: &dyn RegistryStore, inquiry: &Inquiry) {
    let parameters = BTreeMap::from([
        ("project".to_string(), inquiry.project.clone()),
        ("space".to_string(), inquiry.space.clone()),
        ("user".to_string(), inquiry.user.clone()),
        ("project-tsv".to_string(), inquiry.tsv.clone()),
        ("notes".to_string(), inquiry.notes.join("\n")),
    ]);
    match registry.trigger_side_effect(INQUIRY_SERVICE, parameters).await {
        Ok(()) => info!("Sent inquiry for {} on behalf of {}", inquiry.project, inquiry.user),
        Err(e) => warn!("Inquiry for {} failed: {:#}", inquiry.project, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleType;
    use crate::store::{MemoryPersonStore, MemoryRegistry};

    #[test]
    fn test_project_code_validation() {
        assert!(validate_project_code("QABCD").is_ok());
        assert!(validate_project_code("Qx1b2").is_ok());
        assert!(validate_project_code("QABCY").is_err());
        assert!(validate_project_code("XABCD").is_err());
        assert!(validate_project_code("QABC").is_err());
        for _ in 0..50 {
            assert!(validate_project_code(&random_project_code()).is_ok());
        }
    }

    #[tokio::test]
    async fn test_context_detects_populated_experiments() {
        let registry = MemoryRegistry::new();
        registry.insert_project("SPACE", "QABCD").await;
        registry
            .insert_experiments(vec![
                Experiment::new("QABCDE1".to_string(), ExperimentType::QExperimentalDesign, "QABCD", "SPACE"),
                Experiment::new("QABCDE2".to_string(), ExperimentType::QSampleExtraction, "QABCD", "SPACE"),
            ])
            .await;
        registry
            .insert_samples(vec![Sample::new(
                "QABCDENTITY-1".to_string(),
                "QABCDE1".to_string(),
                "QABCD",
                "SPACE",
                SampleType::BiologicalEntity,
                "",
            )])
            .await;

        assert!(project_has_bio_entities(&registry, "SPACE", "QABCD").await.unwrap());
        assert!(!project_has_extracts(&registry, "SPACE", "QABCD").await.unwrap());
        let context = ProjectContext::load(&registry, "SPACE", "QABCD").await.unwrap();
        assert_eq!(context.counter().next_entity_code(), "QABCDENTITY-2");
        assert_eq!(context.counter().next_experiment_code(), "QABCDE3");
    }

    #[tokio::test]
    async fn test_options_and_inquiry() {
        let registry = MemoryRegistry::new();
        registry.insert_project("SPACE", "QABCD").await;
        registry.insert_project("SPACE", "QWXYZ").await;
        let people = MemoryPersonStore::new(Vec::new());
        people.register_project("/SPACE/QABCD", &"x".repeat(90)).await.unwrap();

        let options = context_options(&registry, Some(&people as &dyn PersonStore), "SPACE").await.unwrap();
        assert_eq!(options[0].label, format!("QABCD ({}...)", "x".repeat(80)));
        assert_eq!(options[1].label, "QWXYZ");

        let code = generate_project_code(&registry, "SPACE").await.unwrap();
        assert!(validate_project_code(&code).is_ok());

        send_inquiry(
            &registry,
            &Inquiry {
                space: "SPACE".to_string(),
                project: "QNEWP".to_string(),
                user: "dev-user".to_string(),
                tsv: "SAMPLE_CODE".to_string(),
                notes: vec![],
            },
        )
        .await;
        assert_eq!(registry.side_effects().await[0].service, INQUIRY_SERVICE);
    }
}
