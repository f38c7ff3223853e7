use std::collections::BTreeMap;

use crate::model::{Experiment, ItemOutcome, Person, PersonRole, Sample};
use anyhow::Result;

/// Remote sample registry.
///
/// `Err` means the registry could not be reached; rejected items come back as
/// failed [`ItemOutcome`]s.
#[async_trait::async_trait]
pub trait RegistryStore: Send + Sync {
    async fn list_projects_in_space(&self, space: &str) -> Result<Vec<String>>;
    async fn project_exists(&self, space: &str, code: &str) -> Result<bool>;
    /// Samples of a project, by identifier `/<space>/<project>`
    async fn list_samples_of_project(&self, identifier: &str) -> Result<Vec<Sample>>;
    async fn list_experiments_of_project(&self, identifier: &str) -> Result<Vec<Experiment>>;
    /// Samples of an experiment, by identifier `/<space>/<project>/<experiment>`
    async fn list_samples_of_experiment(&self, identifier: &str) -> Result<Vec<Sample>>;
    async fn create_project(
        &self,
        space: &str,
        code: &str,
        description: &str,
        owner: &str,
    ) -> Result<ItemOutcome>;
    /// One outcome per submitted experiment and sample, in submission order
    async fn create_experiments_and_samples_batch(
        &self,
        project: &str,
        experiments: &[Experiment],
        sample_tiers: &[Vec<Sample>],
    ) -> Result<Vec<ItemOutcome>>;
    /// Fire-and-forget service call (notes, notification mails)
    async fn trigger_side_effect(&self, service: &str, parameters: BTreeMap<String, String>) -> Result<()>;
}

/// Local bookkeeping of projects, experiments and the people attached to them
#[async_trait::async_trait]
pub trait PersonStore: Send + Sync {
    async fn list_people(&self) -> Result<Vec<Person>>;
    /// Returns the store's id of the project
    async fn register_project(&self, identifier: &str, name: &str) -> Result<i32>;
    /// Alternative title of a project, if one was recorded
    async fn project_name(&self, identifier: &str) -> Result<Option<String>>;
    async fn add_person_to_project(&self, project_id: i32, person_id: i32, role: PersonRole) -> Result<()>;
    /// Returns the store's id of the experiment
    async fn register_experiment(&self, identifier: &str) -> Result<i32>;
    async fn add_person_to_experiment(&self, experiment_id: i32, person_id: i32) -> Result<()>;
}
