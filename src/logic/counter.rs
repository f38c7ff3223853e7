use log::debug;
use std::collections::{HashMap, HashSet};

use crate::model::{Experiment, Sample};

/// Width of the numeric part of sample barcodes
pub const BARCODE_WIDTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeBucket {
    /// `<project><NNN>`
    Barcode,
    /// `<project>ENTITY-<n>`
    Entity,
    /// `<project>E<n>`
    Experiment,
}

/// Project-scoped code allocator.
///
/// Seeded from everything already registered for the project; every code it
/// hands out is strictly greater than anything seen in its bucket and is never
/// handed out twice. One instance belongs to one design session.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleCounter {
    project: String,
    last: HashMap<CodeBucket, u32>,
    seen: HashSet<String>,
}

impl SampleCounter {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            last: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Counter seeded from the samples and experiments already in the registry
    pub fn initialize<'a>(
        project: &str,
        samples: impl IntoIterator<Item = &'a Sample>,
        experiments: impl IntoIterator<Item = &'a Experiment>,
    ) -> Self {
        let mut counter = Self::new(project);
        for sample in samples {
            counter.increment(sample);
        }
        for experiment in experiments {
            counter.observe_code(&experiment.code);
        }
        debug!(
            "Seeded counter for {}: {} known codes, last barcode {}",
            project,
            counter.seen.len(),
            counter.last(CodeBucket::Barcode)
        );
        counter
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn increment(&mut self, sample: &Sample) {
        self.observe_code(&sample.code);
    }

    /// Record a code as used; codes of other projects are ignored
    pub fn observe_code(&mut self, code: &str) {
        let Some(suffix) = code.strip_prefix(self.project.as_str()) else {
            return;
        };
        self.seen.insert(code.to_string());
        if let Some((bucket, n)) = classify(suffix) {
            let last = self.last.entry(bucket).or_insert(0);
            *last = (*last).max(n);
        }
    }

    /// Claim a code chosen by the caller; false if it is already taken
    pub fn claim(&mut self, code: &str) -> bool {
        if self.seen.contains(code) {
            return false;
        }
        self.observe_code(code);
        self.seen.insert(code.to_string());
        true
    }

    pub fn is_used(&self, code: &str) -> bool {
        self.seen.contains(code)
    }

    pub fn last(&self, bucket: CodeBucket) -> u32 {
        self.last.get(&bucket).copied().unwrap_or(0)
    }

    pub fn next_barcode(&mut self) -> String {
        self.next(CodeBucket::Barcode)
    }

    pub fn next_entity_code(&mut self) -> String {
        self.next(CodeBucket::Entity)
    }

    pub fn next_experiment_code(&mut self) -> String {
        self.next(CodeBucket::Experiment)
    }

    fn next(&mut self, bucket: CodeBucket) -> String {
        let mut n = self.last(bucket);
        loop {
            n += 1;
            let code = self.format(bucket, n);
            if self.seen.insert(code.clone()) {
                self.last.insert(bucket, n);
                return code;
            }
        }
    }

    fn format(&self, bucket: CodeBucket, n: u32) -> String {
        match bucket {
            CodeBucket::Barcode => format!("{}{:0width$}", self.project, n, width = BARCODE_WIDTH),
            CodeBucket::Entity => format!("{}ENTITY-{}", self.project, n),
            CodeBucket::Experiment => format!("{}E{}", self.project, n),
        }
    }
}

fn classify(suffix: &str) -> Option<(CodeBucket, u32)> {
    fn number(digits: &str) -> Option<u32> {
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    if let Some(n) = number(suffix) {
        return Some((CodeBucket::Barcode, n));
    }
    if let Some(n) = suffix.strip_prefix("ENTITY-").and_then(number) {
        return Some((CodeBucket::Entity, n));
    }
    if let Some(n) = suffix.strip_prefix('E').and_then(number) {
        return Some((CodeBucket::Experiment, n));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleType;

    fn sample(code: &str) -> Sample {
        Sample::new(
            code.to_string(),
            "QABCDE1".to_string(),
            "QABCD",
            "SPACE",
            SampleType::BiologicalSample,
            "",
        )
    }

    #[test]
    fn test_fresh_project_starts_at_one() {
        let mut counter = SampleCounter::new("QABCD");
        assert_eq!(counter.next_barcode(), "QABCD001");
        assert_eq!(counter.next_barcode(), "QABCD002");
        assert_eq!(counter.next_entity_code(), "QABCDENTITY-1");
        assert_eq!(counter.next_experiment_code(), "QABCDE1");
    }

    #[test]
    fn test_seeded_counter_continues_after_highest_code() {
        let existing = vec![
            sample("QABCD000"),
            sample("QABCD007"),
            sample("QABCD003"),
            sample("QABCDENTITY-12"),
            sample("QXYZW999"),
        ];
        let experiments = vec![Experiment::new(
            "QABCDE4".to_string(),
            crate::model::ExperimentType::QExperimentalDesign,
            "QABCD",
            "SPACE",
        )];
        let mut counter = SampleCounter::initialize("QABCD", &existing, &experiments);
        assert_eq!(counter.next_barcode(), "QABCD008");
        assert_eq!(counter.next_entity_code(), "QABCDENTITY-13");
        assert_eq!(counter.next_experiment_code(), "QABCDE5");
    }

    #[test]
    fn test_issued_codes_are_disjoint_from_seed_and_each_other() {
        let seed: Vec<Sample> = (1..=40)
            .filter(|n| n % 3 != 0)
            .map(|n| sample(&format!("QABCD{:03}", n)))
            .collect();
        let mut counter = SampleCounter::initialize("QABCD", &seed, []);
        let mut issued = HashSet::new();
        for _ in 0..1200 {
            let code = counter.next_barcode();
            assert!(!seed.iter().any(|s| s.code == code));
            assert!(issued.insert(code));
        }
        // width grows past 999 instead of wrapping
        assert!(issued.contains("QABCD1000"));
    }

    #[test]
    fn test_claim() {
        let mut counter = SampleCounter::new("QABCD");
        assert!(counter.claim("QABCDENTITY-3"));
        assert!(!counter.claim("QABCDENTITY-3"));
        assert_eq!(counter.next_entity_code(), "QABCDENTITY-4");
    }
}
