use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::error::RegistrationError;
use crate::logic::retry::{retry, RetryPolicy};
use crate::model::{
    experiment_identifier, generate_id, project_identifier, ExperimentType, ItemFailure, ItemKind,
    ItemOutcome, JobState, PersonRole, RegistrationBatch, RegistrationJob, RegistrationReport,
};
use crate::store::{PersonStore, RegistryStore};

pub const NOTE_SERVICE: &str = "add-to-xml-note";

/// Receives progress of a running registration
pub trait ProgressSink: Send + Sync {
    /// `done` never decreases within one registration
    fn progress(&self, done: usize, total: usize);
    fn summary(&self, message: &str);
}

/// Sink that drops everything
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&self, _done: usize, _total: usize) {}
    fn summary(&self, _message: &str) {}
}

/// Marks a project as having a registration in flight until dropped
pub struct InFlightGuard {
    projects: Arc<Mutex<HashSet<String>>>,
    project: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.projects.lock().remove(&self.project);
    }
}

/// Commits designs to the registry: project, experiments, then sample tiers
/// parent-before-child. At most one registration per project runs at a time.
pub struct BatchRegistrar {
    registry: Arc<dyn RegistryStore>,
    people: Option<Arc<dyn PersonStore>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    retry: RetryPolicy,
}

impl BatchRegistrar {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        people: Option<Arc<dyn PersonStore>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            people,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            retry,
        }
    }

    pub fn is_running(&self, project: &str) -> bool {
        self.in_flight.lock().contains(project)
    }

    pub fn acquire(&self, project: &str) -> Result<InFlightGuard, RegistrationError> {
        let mut projects = self.in_flight.lock();
        if !projects.insert(project.to_string()) {
            return Err(RegistrationError::AlreadyRunning {
                project: project.to_string(),
            });
        }
        Ok(InFlightGuard {
            projects: self.in_flight.clone(),
            project: project.to_string(),
        })
    }

    /// Register in the current task
    pub async fn register(
        &self,
        batch: &RegistrationBatch,
        sink: &dyn ProgressSink,
        cancel: &AtomicBool,
    ) -> Result<RegistrationReport, RegistrationError> {
        let _guard = self.acquire(&batch.project)?;
        Ok(self.run(batch, sink, cancel).await)
    }

    /// Register on a background task; `on_complete` runs exactly once with the report,
    /// also when the registration itself panics.
    ///
    /// A concurrent registration of the same project is rejected before anything is spawned.
    pub fn spawn<F>(
        self: &Arc<Self>,
        batch: RegistrationBatch,
        sink: Arc<dyn ProgressSink>,
        cancel: Arc<AtomicBool>,
        on_complete: F,
    ) -> Result<JoinHandle<()>, RegistrationError>
    where
        F: FnOnce(RegistrationReport) + Send + 'static,
    {
        let guard = self.acquire(&batch.project)?;
        let registrar = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let project = batch.project.clone();
            let total_samples = batch.total_samples();
            let worker = tokio::spawn(async move { registrar.run(&batch, sink.as_ref(), &cancel).await });
            let report = match worker.await {
                Ok(report) => report,
                Err(e) => {
                    error!("Registration of {} aborted: {}", project, e);
                    RegistrationReport {
                        errors: vec![ItemFailure {
                            kind: ItemKind::Project,
                            code: project.clone(),
                            tier: None,
                            message: format!("registration aborted: {}", e),
                        }],
                        summary: format!("Registration of {} aborted", project),
                        project,
                        total_samples,
                        ..Default::default()
                    }
                }
            };
            drop(guard);
            on_complete(report);
        }))
    }

    async fn run(&self, batch: &RegistrationBatch, sink: &dyn ProgressSink, cancel: &AtomicBool) -> RegistrationReport {
        let mut report = RegistrationReport {
            project: batch.project.clone(),
            total_samples: batch.total_samples(),
            ..Default::default()
        };
        info!(
            "Registering {} experiments and {} samples in {} tiers for {}",
            batch.experiments.len(),
            report.total_samples,
            batch.tiers.len(),
            batch.project
        );

        if self.submit(batch, sink, cancel, &mut report).await && report.is_success() {
            self.post_registration(batch, &mut report).await;
        }

        report.summary = summarize(&report);
        sink.summary(&report.summary);
        if report.is_success() {
            info!("{}", report.summary);
        } else {
            warn!("{}", report.summary);
        }
        report
    }

    /// Returns false if submission stopped early
    async fn submit(
        &self,
        batch: &RegistrationBatch,
        sink: &dyn ProgressSink,
        cancel: &AtomicBool,
        report: &mut RegistrationReport,
    ) -> bool {
        let project = batch.project.as_str();
        let fail = |report: &mut RegistrationReport, kind: ItemKind, code: &str, tier: Option<usize>, message: String| {
            report.errors.push(ItemFailure {
                kind,
                code: code.to_string(),
                tier,
                message,
            });
        };

        let exists = match self.registry.project_exists(&batch.space, project).await {
            Ok(exists) => exists,
            Err(e) => {
                fail(report, ItemKind::Project, project, None, format!("registry unreachable: {}", e));
                return false;
            }
        };
        if !exists {
            let description = batch.description.clone().unwrap_or_default();
            match self
                .registry
                .create_project(&batch.space, project, &description, &batch.user)
                .await
            {
                Ok(outcome) if outcome.is_ok() => {}
                Ok(outcome) => {
                    fail(report, ItemKind::Project, project, None, outcome.error.unwrap_or_default());
                    return false;
                }
                Err(e) => {
                    fail(report, ItemKind::Project, project, None, e.to_string());
                    return false;
                }
            }
            if let Err(e) = self.await_visibility(&batch.space, project, cancel).await {
                fail(report, ItemKind::Visibility, project, None, e);
                return false;
            }
        }

        if !batch.experiments.is_empty() {
            let outcomes = match self
                .registry
                .create_experiments_and_samples_batch(project, &batch.experiments, &[])
                .await
            {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    fail(report, ItemKind::Experiment, project, None, e.to_string());
                    return false;
                }
            };
            let failed: Vec<&ItemOutcome> = outcomes.iter().filter(|o| !o.is_ok()).collect();
            for outcome in &failed {
                fail(
                    report,
                    ItemKind::Experiment,
                    &outcome.code,
                    None,
                    outcome.error.clone().unwrap_or_default(),
                );
            }
            if !failed.is_empty() {
                return false;
            }
        }

        for (index, tier) in batch.tiers.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!("Registration of {} cancelled before tier {}", project, index);
                report.cancelled = true;
                return false;
            }
            report.attempted_tiers.push(index);
            let outcomes = match self
                .registry
                .create_experiments_and_samples_batch(project, &[], std::slice::from_ref(tier))
                .await
            {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    let code = tier.first().map(|s| s.code.as_str()).unwrap_or(project);
                    fail(report, ItemKind::Sample, code, Some(index), format!("registry unreachable: {}", e));
                    return false;
                }
            };

            let mut rejected = false;
            for outcome in &outcomes {
                if outcome.is_ok() {
                    report.registered_samples += 1;
                } else {
                    rejected = true;
                    fail(
                        report,
                        ItemKind::Sample,
                        &outcome.code,
                        Some(index),
                        outcome.error.clone().unwrap_or_default(),
                    );
                }
            }
            sink.progress(report.registered_samples, report.total_samples);
            if rejected {
                error!(
                    "Tier {} of {} was rejected, {} later tiers not submitted",
                    index,
                    project,
                    batch.tiers.len() - index - 1
                );
                return false;
            }
            report.committed_tiers.push(index);
        }
        true
    }

    async fn await_visibility(&self, space: &str, project: &str, cancel: &AtomicBool) -> Result<(), String> {
        let registry = self.registry.clone();
        retry(self.retry, cancel, "project visibility check", |_| {
            let registry = registry.clone();
            async move {
                match registry.project_exists(space, project).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(format!("project {} not visible yet", project)),
                    Err(e) => Err(e.to_string()),
                }
            }
        })
        .await
        .map_err(|e| e.to_string())
    }

    /// Notes and person-store bookkeeping; never changes registry state
    async fn post_registration(&self, batch: &RegistrationBatch, report: &mut RegistrationReport) {
        let project_id = project_identifier(&batch.space, &batch.project);

        for experiment in batch
            .experiments
            .iter()
            .filter(|e| e.experiment_type == ExperimentType::QExperimentalDesign)
        {
            let id = experiment_identifier(&batch.space, &batch.project, &experiment.code);
            for note in &batch.notes {
                let parameters = BTreeMap::from([
                    ("id".to_string(), id.clone()),
                    ("user".to_string(), note.username.clone()),
                    ("comment".to_string(), note.comment.clone()),
                    ("time".to_string(), note.time.clone()),
                ]);
                if let Err(e) = self.registry.trigger_side_effect(NOTE_SERVICE, parameters).await {
                    warn!("Could not attach note to {}: {}", id, e);
                }
            }
        }

        let Some(people) = &self.people else {
            return;
        };
        let name = batch.secondary_name.clone().unwrap_or_default();
        let res: anyhow::Result<()> = async {
            let project = people.register_project(&project_id, &name).await?;
            for (person, role) in [
                (batch.people.investigator, PersonRole::Investigator),
                (batch.people.contact, PersonRole::Contact),
                (batch.people.manager, PersonRole::Manager),
            ] {
                if let Some(person) = person {
                    people.add_person_to_project(project, person, role).await?;
                }
            }
            for experiment in &batch.experiments {
                let id = people
                    .register_experiment(&experiment_identifier(&batch.space, &batch.project, &experiment.code))
                    .await?;
                if let Some(person) = experiment.person_id {
                    people.add_person_to_experiment(id, person).await?;
                }
            }
            Ok(())
        }
        .await;
        if let Err(e) = res {
            warn!("Person store unavailable for {}: {:#}", project_id, e);
            report.person_store_unavailable = true;
        }
    }
}

fn summarize(report: &RegistrationReport) -> String {
    if report.is_success() {
        return format!(
            "Registered {} samples of project {}",
            report.registered_samples, report.project
        );
    }
    let mut summary = format!(
        "Registered {} of {} samples of project {}",
        report.registered_samples, report.total_samples, report.project
    );
    if report.cancelled {
        summary.push_str("; cancelled");
    }
    if !report.errors.is_empty() {
        summary.push_str(&format!("; {} items failed", report.errors.len()));
    }
    summary
}

/// Progress sink backing one pollable background job
pub struct JobTracker {
    job: Mutex<RegistrationJob>,
    cancel: Arc<AtomicBool>,
    completions: AtomicUsize,
    finished_at: Mutex<Option<Instant>>,
}

impl JobTracker {
    pub fn new(project: &str, total: usize) -> Self {
        Self {
            job: Mutex::new(RegistrationJob {
                id: generate_id(),
                project: project.to_string(),
                state: JobState::Running,
                done: 0,
                total,
                message: None,
                report: None,
                started_at: chrono::Utc::now().to_rfc3339(),
            }),
            cancel: Arc::new(AtomicBool::new(false)),
            completions: AtomicUsize::new(0),
            finished_at: Mutex::new(None),
        }
    }

    pub fn id(&self) -> String {
        self.job.lock().id.clone()
    }

    pub fn snapshot(&self) -> RegistrationJob {
        self.job.lock().clone()
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Stops scheduling further tiers; in-flight submissions finish
    pub fn cancel(&self) -> bool {
        let job = self.job.lock();
        if job.state != JobState::Running {
            return false;
        }
        self.cancel.store(true, Ordering::SeqCst);
        true
    }

    /// Finished longer than `ttl` ago; running jobs never expire
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.finished_at
            .lock()
            .is_some_and(|finished| finished.elapsed() >= ttl)
    }

    pub fn complete(&self, report: RegistrationReport) {
        if self.completions.fetch_add(1, Ordering::SeqCst) > 0 {
            warn!("Registration job {} completed twice", self.id());
            return;
        }
        *self.finished_at.lock() = Some(Instant::now());
        let mut job = self.job.lock();
        job.state = if report.cancelled {
            JobState::Cancelled
        } else if report.is_success() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };
        job.done = report.registered_samples;
        job.message = Some(report.summary.clone());
        job.report = Some(report);
    }
}

impl ProgressSink for JobTracker {
    fn progress(&self, done: usize, total: usize) {
        let mut job = self.job.lock();
        job.done = job.done.max(done);
        job.total = total;
    }

    fn summary(&self, message: &str) {
        self.job.lock().message = Some(message.to_string());
    }
}
