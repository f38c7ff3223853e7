use anyhow::{bail, Result};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::{Experiment, ItemOutcome, Person, PersonRole, Sample};
use crate::store::traits::{PersonStore, RegistryStore};

/// Recorded `trigger_side_effect` call
#[derive(Debug, Clone, PartialEq)]
pub struct SideEffect {
    pub service: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct RegistryData {
    /// space -> project codes
    projects: BTreeMap<String, BTreeSet<String>>,
    descriptions: BTreeMap<String, String>,
    experiments: Vec<Experiment>,
    samples: Vec<Sample>,
    side_effects: Vec<SideEffect>,
}

/// In-process registry used for development and tests.
///
/// Supports failure injection: rejected codes, an unreachable registry and
/// delayed project visibility.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    data: Arc<RwLock<RegistryData>>,
    rejected: Arc<RwLock<HashSet<String>>>,
    unavailable: AtomicBool,
    visibility_lag: AtomicU32,
    batch_calls: AtomicUsize,
}

fn split_identifier(identifier: &str) -> Vec<&str> {
    identifier.trim_start_matches('/').split('/').collect()
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_project(&self, space: &str, code: &str) {
        let mut data = self.data.write().await;
        data.projects
            .entry(space.to_string())
            .or_default()
            .insert(code.to_string());
    }

    pub async fn insert_experiments(&self, experiments: impl IntoIterator<Item = Experiment>) {
        self.data.write().await.experiments.extend(experiments);
    }

    pub async fn insert_samples(&self, samples: impl IntoIterator<Item = Sample>) {
        self.data.write().await.samples.extend(samples);
    }

    /// Reject any experiment or sample with this code
    pub async fn reject(&self, code: &str) {
        self.rejected.write().await.insert(code.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Report existing projects as missing for the next `checks` lookups
    pub fn delay_visibility(&self, checks: u32) {
        self.visibility_lag.store(checks, Ordering::SeqCst);
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub async fn samples(&self) -> Vec<Sample> {
        self.data.read().await.samples.clone()
    }

    pub async fn experiments(&self) -> Vec<Experiment> {
        self.data.read().await.experiments.clone()
    }

    pub async fn side_effects(&self) -> Vec<SideEffect> {
        self.data.read().await.side_effects.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("registry unreachable");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RegistryStore for MemoryRegistry {
    async fn list_projects_in_space(&self, space: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let data = self.data.read().await;
        Ok(data
            .projects
            .get(space)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn project_exists(&self, space: &str, code: &str) -> Result<bool> {
        self.check_available()?;
        let exists = self
            .data
            .read()
            .await
            .projects
            .get(space)
            .is_some_and(|p| p.contains(code));
        if exists
            && self
                .visibility_lag
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Ok(false);
        }
        Ok(exists)
    }

    async fn list_samples_of_project(&self, identifier: &str) -> Result<Vec<Sample>> {
        self.check_available()?;
        let parts = split_identifier(identifier);
        let [space, project] = parts.as_slice() else {
            bail!("invalid project identifier {}", identifier);
        };
        let data = self.data.read().await;
        Ok(data
            .samples
            .iter()
            .filter(|s| s.space_code == *space && s.project_code == *project)
            .cloned()
            .collect())
    }

    async fn list_experiments_of_project(&self, identifier: &str) -> Result<Vec<Experiment>> {
        self.check_available()?;
        let parts = split_identifier(identifier);
        let [space, project] = parts.as_slice() else {
            bail!("invalid project identifier {}", identifier);
        };
        let data = self.data.read().await;
        Ok(data
            .experiments
            .iter()
            .filter(|e| e.space_code == *space && e.project_code == *project)
            .cloned()
            .collect())
    }

    async fn list_samples_of_experiment(&self, identifier: &str) -> Result<Vec<Sample>> {
        self.check_available()?;
        let parts = split_identifier(identifier);
        let [space, project, experiment] = parts.as_slice() else {
            bail!("invalid experiment identifier {}", identifier);
        };
        let data = self.data.read().await;
        Ok(data
            .samples
            .iter()
            .filter(|s| {
                s.space_code == *space && s.project_code == *project && s.experiment_code == *experiment
            })
            .cloned()
            .collect())
    }

    async fn create_project(&self, space: &str, code: &str, description: &str, owner: &str) -> Result<ItemOutcome> {
        self.check_available()?;
        if self.rejected.read().await.contains(code) {
            return Ok(ItemOutcome::failed(code, "project rejected by registry"));
        }
        let mut data = self.data.write().await;
        let projects = data.projects.entry(space.to_string()).or_default();
        if !projects.insert(code.to_string()) {
            return Ok(ItemOutcome::failed(code, format!("project {} already exists", code)));
        }
        data.descriptions.insert(code.to_string(), description.to_string());
        debug!("Created project /{}/{} for {}", space, code, owner);
        Ok(ItemOutcome::ok(code))
    }

    async fn create_experiments_and_samples_batch(
        &self,
        project: &str,
        experiments: &[Experiment],
        sample_tiers: &[Vec<Sample>],
    ) -> Result<Vec<ItemOutcome>> {
        self.check_available()?;
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let rejected = self.rejected.read().await.clone();
        let mut data = self.data.write().await;
        let mut outcomes = Vec::new();

        for experiment in experiments {
            let duplicate = data
                .experiments
                .iter()
                .any(|e| e.code == experiment.code && e.project_code == project);
            outcomes.push(if rejected.contains(&experiment.code) {
                ItemOutcome::failed(&experiment.code, "experiment rejected by registry")
            } else if duplicate {
                ItemOutcome::failed(&experiment.code, "experiment already exists")
            } else {
                data.experiments.push(experiment.clone());
                ItemOutcome::ok(&experiment.code)
            });
        }

        for sample in sample_tiers.iter().flatten() {
            let known: HashSet<&str> = data.samples.iter().map(|s| s.code.as_str()).collect();
            let missing_parent = sample
                .parent_codes
                .iter()
                .find(|p| !known.contains(p.as_str()))
                .cloned();
            let duplicate = known.contains(sample.code.as_str());
            outcomes.push(if rejected.contains(&sample.code) {
                ItemOutcome::failed(&sample.code, "sample rejected by registry")
            } else if duplicate {
                ItemOutcome::failed(&sample.code, "sample code already in use")
            } else if let Some(parent) = missing_parent {
                ItemOutcome::failed(&sample.code, format!("parent {} not found", parent))
            } else {
                data.samples.push(sample.clone());
                ItemOutcome::ok(&sample.code)
            });
        }
        Ok(outcomes)
    }

    async fn trigger_side_effect(&self, service: &str, parameters: BTreeMap<String, String>) -> Result<()> {
        self.check_available()?;
        self.data.write().await.side_effects.push(SideEffect {
            service: service.to_string(),
            parameters,
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PeopleData {
    people: Vec<Person>,
    /// (id, identifier, name)
    projects: Vec<(i32, String, String)>,
    project_people: Vec<(i32, i32, PersonRole)>,
    experiments: Vec<(i32, String)>,
    experiment_people: Vec<(i32, i32)>,
}

/// Person store fallback when no database is configured
#[derive(Debug, Default)]
pub struct MemoryPersonStore {
    data: Arc<RwLock<PeopleData>>,
    unavailable: AtomicBool,
}

impl MemoryPersonStore {
    pub fn new(people: Vec<Person>) -> Self {
        Self {
            data: Arc::new(RwLock::new(PeopleData {
                people,
                ..Default::default()
            })),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn project_people(&self, identifier: &str) -> Vec<(i32, PersonRole)> {
        let data = self.data.read().await;
        let Some((id, _, _)) = data.projects.iter().find(|(_, i, _)| i == identifier) else {
            return Vec::new();
        };
        data.project_people
            .iter()
            .filter(|(p, _, _)| p == id)
            .map(|(_, person, role)| (*person, *role))
            .collect()
    }

    pub async fn experiment_identifiers(&self) -> Vec<String> {
        self.data
            .read()
            .await
            .experiments
            .iter()
            .map(|(_, identifier)| identifier.clone())
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("person store unreachable");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PersonStore for MemoryPersonStore {
    async fn list_people(&self) -> Result<Vec<Person>> {
        self.check_available()?;
        Ok(self.data.read().await.people.clone())
    }

    async fn register_project(&self, identifier: &str, name: &str) -> Result<i32> {
        self.check_available()?;
        let mut data = self.data.write().await;
        if let Some((id, _, _)) = data.projects.iter().find(|(_, i, _)| i == identifier) {
            return Ok(*id);
        }
        let id = data.projects.len() as i32 + 1;
        data.projects.push((id, identifier.to_string(), name.to_string()));
        Ok(id)
    }

    async fn project_name(&self, identifier: &str) -> Result<Option<String>> {
        self.check_available()?;
        let data = self.data.read().await;
        Ok(data
            .projects
            .iter()
            .find(|(_, i, _)| i == identifier)
            .map(|(_, _, name)| name.clone())
            .filter(|name| !name.is_empty()))
    }

    async fn add_person_to_project(&self, project_id: i32, person_id: i32, role: PersonRole) -> Result<()> {
        self.check_available()?;
        self.data
            .write()
            .await
            .project_people
            .push((project_id, person_id, role));
        Ok(())
    }

    async fn register_experiment(&self, identifier: &str) -> Result<i32> {
        self.check_available()?;
        let mut data = self.data.write().await;
        let id = data.experiments.len() as i32 + 1;
        data.experiments.push((id, identifier.to_string()));
        Ok(id)
    }

    async fn add_person_to_experiment(&self, experiment_id: i32, person_id: i32) -> Result<()> {
        self.check_available()?;
        self.data
            .write()
            .await
            .experiment_people
            .push((experiment_id, person_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExperimentType, SampleType};

    fn sample(code: &str, parent: Option<&str>) -> Sample {
        let sample = Sample::new(
            code.to_string(),
            "QABCDE1".to_string(),
            "QABCD",
            "SPACE",
            SampleType::BiologicalSample,
            "",
        );
        match parent {
            Some(p) => sample.with_parent(p),
            None => sample,
        }
    }

    #[tokio::test]
    async fn test_batch_outcomes() {
        let registry = MemoryRegistry::new();
        registry.reject("QABCD002").await;
        let experiments = vec![Experiment::new(
            "QABCDE1".to_string(),
            ExperimentType::QExperimentalDesign,
            "QABCD",
            "SPACE",
        )];
        let tiers = vec![vec![
            sample("QABCD001", None),
            sample("QABCD002", None),
            sample("QABCD003", Some("QABCD999")),
        ]];
        let outcomes = registry
            .create_experiments_and_samples_batch("QABCD", &experiments, &tiers)
            .await
            .unwrap();
        let ok: Vec<bool> = outcomes.iter().map(ItemOutcome::is_ok).collect();
        assert_eq!(ok, vec![true, true, false, false]);
        assert_eq!(registry.samples().await.len(), 1);
        assert_eq!(
            registry.list_samples_of_project("/SPACE/QABCD").await.unwrap().len(),
            1
        );
        assert_eq!(
            registry
                .list_samples_of_experiment("/SPACE/QABCD/QABCDE1")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_visibility_lag_and_outage() {
        let registry = MemoryRegistry::new();
        registry.create_project("SPACE", "QABCD", "", "dev").await.unwrap();
        registry.delay_visibility(2);
        assert!(!registry.project_exists("SPACE", "QABCD").await.unwrap());
        assert!(!registry.project_exists("SPACE", "QABCD").await.unwrap());
        assert!(registry.project_exists("SPACE", "QABCD").await.unwrap());

        registry.set_unavailable(true);
        assert!(registry.list_projects_in_space("SPACE").await.is_err());
    }

    #[tokio::test]
    async fn test_person_store() {
        let store = MemoryPersonStore::new(vec![Person {
            id: 7,
            name: "Ada".to_string(),
            email: None,
        }]);
        let project = store.register_project("/SPACE/QABCD", "Liver study").await.unwrap();
        assert_eq!(store.register_project("/SPACE/QABCD", "").await.unwrap(), project);
        store
            .add_person_to_project(project, 7, PersonRole::Investigator)
            .await
            .unwrap();
        assert_eq!(
            store.project_people("/SPACE/QABCD").await,
            vec![(7, PersonRole::Investigator)]
        );
        assert_eq!(
            store.project_name("/SPACE/QABCD").await.unwrap().as_deref(),
            Some("Liver study")
        );
    }
}
