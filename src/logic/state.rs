//! Design sessions as explicit state transitions.
//!
//! [`apply`] never mutates its input: a rejected event leaves the previous
//! state untouched, an accepted one yields a new state. Regenerating a tier
//! drops every tier after it and restarts code allocation from the counter the
//! tier started with, so codes stay gap-free.
//!
//! A design can also continue below samples the project already registered:
//! inherited tiers feed the next tier but are never submitted again.

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::GenerationError;
use crate::logic::counter::SampleCounter;
use crate::logic::hierarchy::{
    self, AnalyteRequest, Conditions, DesignContext, EntityRequest, ExtractRequest,
    FractionationRequest, HierarchyBuilder, Tailoring, TierOutput,
};
use crate::model::{
    Experiment, Note, Pool, ProjectPeople, RegistrationBatch, Sample, SampleType, Vocabularies,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Entities,
    Extracts,
    TestSamples,
    Fractions,
}

impl TierKind {
    fn position(self) -> usize {
        match self {
            TierKind::Entities => 0,
            TierKind::Extracts => 1,
            TierKind::TestSamples => 2,
            TierKind::Fractions => 3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            TierKind::Entities => "entities",
            TierKind::Extracts => "extracts",
            TierKind::TestSamples => "test samples",
            TierKind::Fractions => "fractions",
        }
    }

    /// Registered samples that can stand in for this tier
    fn accepts(self, sample: &Sample) -> bool {
        match self {
            TierKind::Entities => sample.sample_type == SampleType::BiologicalEntity,
            TierKind::Extracts => sample.sample_type == SampleType::BiologicalSample,
            TierKind::TestSamples | TierKind::Fractions => false,
        }
    }
}

/// One generated tier with its tailoring and pools
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub kind: TierKind,
    pub experiments: Vec<Experiment>,
    pub generated: Vec<Sample>,
    /// Generated samples after tailoring
    pub retained: Vec<Sample>,
    pub pools: Vec<Sample>,
    /// Input of the next tier
    pub next_input: Vec<Sample>,
    /// Taken from the registry; only its pools are registered
    pub inherited: bool,
    counter_before: SampleCounter,
    counter_generated: SampleCounter,
    counter_after: SampleCounter,
}

impl Stage {
    fn new(kind: TierKind, output: TierOutput, before: SampleCounter, after: SampleCounter) -> Self {
        Self {
            kind,
            experiments: output.experiments,
            retained: output.samples.clone(),
            next_input: output.samples.clone(),
            generated: output.samples,
            pools: Vec::new(),
            inherited: false,
            counter_before: before,
            counter_generated: after.clone(),
            counter_after: after,
        }
    }

    fn inherited(kind: TierKind, samples: Vec<Sample>, counter: SampleCounter) -> Self {
        Self {
            kind,
            experiments: Vec::new(),
            retained: samples.clone(),
            next_input: samples.clone(),
            generated: samples,
            pools: Vec::new(),
            inherited: true,
            counter_before: counter.clone(),
            counter_generated: counter.clone(),
            counter_after: counter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DesignEvent {
    Entities(EntityRequest),
    Extracts(ExtractRequest),
    TestSamples { analytes: Vec<AnalyteRequest> },
    Fractionate(FractionationRequest),
    Tailor { tier: TierKind, tailoring: Tailoring },
    Pool { tier: TierKind, pools: Vec<Pool> },
    /// Continue below registered entities or extracts, optionally those of one experiment
    Inherit {
        tier: TierKind,
        #[serde(default)]
        experiment: Option<String>,
    },
    Describe {
        description: Option<String>,
        secondary_name: Option<String>,
    },
    AssignPeople(ProjectPeople),
    AddNote { comment: String, username: String },
}

#[derive(Debug, Clone)]
pub struct DesignState {
    pub context: DesignContext,
    pub vocabularies: Arc<Vocabularies>,
    pub stages: Vec<Stage>,
    pub description: Option<String>,
    pub secondary_name: Option<String>,
    pub people: ProjectPeople,
    pub notes: Vec<Note>,
    seed: SampleCounter,
    registered: Arc<Vec<Sample>>,
}

impl DesignState {
    /// Fresh state for a project, `seed` holding everything the registry already has
    pub fn new(context: DesignContext, vocabularies: Arc<Vocabularies>, seed: SampleCounter) -> Self {
        Self {
            context,
            vocabularies,
            stages: Vec::new(),
            description: None,
            secondary_name: None,
            people: ProjectPeople::default(),
            notes: Vec::new(),
            seed,
            registered: Arc::new(Vec::new()),
        }
    }

    /// Samples the project already has, available to [`DesignEvent::Inherit`]
    pub fn with_registered(mut self, samples: Vec<Sample>) -> Self {
        self.registered = Arc::new(samples);
        self
    }

    pub fn stage(&self, kind: TierKind) -> Option<&Stage> {
        self.stages.get(kind.position()).filter(|s| s.kind == kind)
    }

    /// Counter after the last allocation of the current design
    pub fn counter(&self) -> &SampleCounter {
        self.stages
            .last()
            .map(|s| &s.counter_after)
            .unwrap_or(&self.seed)
    }

    fn input_of(&self, kind: TierKind) -> Result<&[Sample], GenerationError> {
        let position = kind.position();
        if position == 0 {
            return Ok(&[]);
        }
        self.stages
            .get(position - 1)
            .map(|s| s.next_input.as_slice())
            .ok_or_else(|| GenerationError::incomplete(kind.name()))
    }

    /// Cross-product preview of a tier's conditions over its current input
    pub fn preview(&self, kind: TierKind, conditions: &Conditions) -> Result<Vec<String>, GenerationError> {
        let parents = self.input_of(kind)?;
        Ok(hierarchy::preview(conditions, parents, kind.name())?
            .iter()
            .map(|p| p.label())
            .collect())
    }

    pub fn experiments(&self) -> Vec<Experiment> {
        self.stages
            .iter()
            .flat_map(|s| s.experiments.iter().cloned())
            .collect()
    }

    /// Sample tiers in registration order, pools right after their source tier
    pub fn tiers(&self) -> Vec<Vec<Sample>> {
        self.stages
            .iter()
            .flat_map(|s| {
                let retained = if s.inherited { Vec::new() } else { s.retained.clone() };
                [retained, s.pools.clone()]
            })
            .filter(|tier| !tier.is_empty())
            .collect()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.tiers().into_iter().flatten().collect()
    }

    /// Batch for the registrar, with the project's info attachment appended when it is still missing
    pub fn registration_batch(&self, user: &str) -> RegistrationBatch {
        let mut experiments = self.experiments();
        let mut tiers = self.tiers();
        let mut counter = self.counter().clone();
        let mut builder = HierarchyBuilder::new(&self.context, &self.vocabularies, &mut counter);
        if let Some((experiment, sample)) = builder.info_attachment() {
            experiments.push(experiment);
            tiers.push(vec![sample]);
        }
        RegistrationBatch {
            space: self.context.space.clone(),
            project: self.context.project.clone(),
            description: self.description.clone(),
            secondary_name: self.secondary_name.clone(),
            user: user.to_string(),
            experiments,
            tiers,
            notes: self.notes.clone(),
            people: self.people.clone(),
        }
    }

    pub fn snapshot(&self) -> DesignSnapshot {
        DesignSnapshot {
            context: self.context.clone(),
            tiers: self
                .stages
                .iter()
                .map(|s| TierSnapshot {
                    kind: s.kind,
                    experiments: s.experiments.iter().map(|e| e.code.clone()).collect(),
                    generated: s.generated.len(),
                    inherited: s.inherited,
                    samples: s.retained.clone(),
                    pools: s.pools.clone(),
                })
                .collect(),
            description: self.description.clone(),
            secondary_name: self.secondary_name.clone(),
            people: self.people.clone(),
            notes: self.notes.clone(),
            total_samples: self.tiers().iter().map(Vec::len).sum(),
        }
    }

    fn generate(
        &self,
        kind: TierKind,
        expand: impl FnOnce(&mut HierarchyBuilder<'_>, &[Sample]) -> Result<TierOutput, GenerationError>,
    ) -> Result<DesignState, GenerationError> {
        let input = self.input_of(kind)?;
        let position = kind.position();
        let before = match position {
            0 => self.seed.clone(),
            _ => self.stages[position - 1].counter_after.clone(),
        };
        let mut counter = before.clone();
        let output = {
            let mut builder = HierarchyBuilder::new(&self.context, &self.vocabularies, &mut counter);
            expand(&mut builder, input)?
        };
        let mut next = self.clone();
        next.stages.truncate(position);
        next.stages.push(Stage::new(kind, output, before, counter));
        Ok(next)
    }

    /// Replace the design with registered samples up to `kind`; extracts bring their entities along
    fn inherit(&self, kind: TierKind, experiment: Option<&str>) -> Result<DesignState, GenerationError> {
        let parents = match kind {
            TierKind::Entities => None,
            TierKind::Extracts => Some(TierKind::Entities),
            TierKind::TestSamples | TierKind::Fractions => {
                return Err(GenerationError::InvalidInput(format!(
                    "{} cannot be inherited",
                    kind.name()
                )))
            }
        };
        let samples: Vec<Sample> = self
            .registered
            .iter()
            .filter(|s| kind.accepts(s))
            .filter(|s| experiment.map_or(true, |code| s.experiment_code == code))
            .cloned()
            .collect();
        if samples.is_empty() {
            return Err(GenerationError::no_samples(kind.name()));
        }

        let mut next = self.clone();
        next.stages.clear();
        if let Some(parents) = parents {
            let entities: Vec<Sample> = self
                .registered
                .iter()
                .filter(|s| parents.accepts(s))
                .cloned()
                .collect();
            next.stages
                .push(Stage::inherited(parents, entities, self.seed.clone()));
        }
        debug!(
            "Inherited {} registered {} of {}",
            samples.len(),
            kind.name(),
            self.context.project
        );
        next.stages.push(Stage::inherited(kind, samples, self.seed.clone()));
        Ok(next)
    }
}

/// Serializable view of a design for clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSnapshot {
    pub context: DesignContext,
    pub tiers: Vec<TierSnapshot>,
    pub description: Option<String>,
    pub secondary_name: Option<String>,
    pub people: ProjectPeople,
    pub notes: Vec<Note>,
    pub total_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub kind: TierKind,
    pub experiments: Vec<String>,
    /// Samples generated before tailoring
    pub generated: usize,
    pub inherited: bool,
    pub samples: Vec<Sample>,
    pub pools: Vec<Sample>,
}

/// Apply one event; the input state is never modified
pub fn apply(state: &DesignState, event: DesignEvent) -> Result<DesignState, GenerationError> {
    debug!("Applying {:?} to design of {}", event, state.context.project);
    match event {
        DesignEvent::Entities(request) => {
            state.generate(TierKind::Entities, |builder, _| builder.entities(&request))
        }
        DesignEvent::Extracts(request) => state.generate(TierKind::Extracts, |builder, input| {
            builder.extracts(input, &request)
        }),
        DesignEvent::TestSamples { analytes } => {
            state.generate(TierKind::TestSamples, |builder, input| {
                builder.test_samples(input, &analytes)
            })
        }
        DesignEvent::Fractionate(request) => state.generate(TierKind::Fractions, |builder, input| {
            builder.fractionate(input, &request)
        }),
        DesignEvent::Tailor { tier, tailoring } => {
            let stage = state
                .stage(tier)
                .ok_or_else(|| GenerationError::incomplete(tier.name()))?;
            let retained = HierarchyBuilder::tailor(&stage.generated, &tailoring)?;
            let mut next = state.clone();
            next.stages.truncate(tier.position() + 1);
            let stage = &mut next.stages[tier.position()];
            stage.next_input = retained.clone();
            stage.retained = retained;
            stage.pools.clear();
            stage.counter_after = stage.counter_generated.clone();
            Ok(next)
        }
        DesignEvent::Pool { tier, pools } => {
            let stage = state
                .stage(tier)
                .ok_or_else(|| GenerationError::incomplete(tier.name()))?;
            let mut counter = stage.counter_generated.clone();
            let output = {
                let mut builder = HierarchyBuilder::new(&state.context, &state.vocabularies, &mut counter);
                builder.pool(&stage.retained, &pools)?
            };
            let mut next = state.clone();
            next.stages.truncate(tier.position() + 1);
            let stage = &mut next.stages[tier.position()];
            stage.pools = output.pooled;
            stage.next_input = output.next_input;
            stage.counter_after = counter;
            Ok(next)
        }
        DesignEvent::Inherit { tier, experiment } => state.inherit(tier, experiment.as_deref()),
        DesignEvent::Describe {
            description,
            secondary_name,
        } => {
            let mut next = state.clone();
            next.description = description.filter(|d| !d.trim().is_empty());
            next.secondary_name = secondary_name.filter(|d| !d.trim().is_empty());
            Ok(next)
        }
        DesignEvent::AssignPeople(people) => {
            let mut next = state.clone();
            next.people = people;
            Ok(next)
        }
        DesignEvent::AddNote { comment, username } => {
            if comment.trim().is_empty() {
                return Err(GenerationError::InvalidInput("empty note".to_string()));
            }
            let mut next = state.clone();
            next.notes.push(Note::new(comment, username));
            Ok(next)
        }
    }
}
