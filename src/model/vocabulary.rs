use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Controlled vocabularies, label -> registry code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocabularies {
    #[serde(default)]
    pub taxonomy: BTreeMap<String, String>,
    #[serde(default)]
    pub tissues: BTreeMap<String, String>,
    #[serde(default)]
    pub cell_lines: BTreeMap<String, String>,
    #[serde(default)]
    pub ms_devices: BTreeMap<String, String>,
    #[serde(default)]
    pub enzymes: Vec<String>,
}

impl Vocabularies {
    /// Registry code for a device label; unknown labels are assumed to be codes already
    pub fn device_code(&self, label: &str) -> String {
        self.ms_devices
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.to_string())
    }

    pub fn organism_code(&self, label: &str) -> String {
        self.taxonomy
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.to_string())
    }

    pub fn tissue_code(&self, label: &str) -> String {
        self.tissues
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.to_string())
    }

    /// Organism label for a taxonomy id, used in summaries
    pub fn organism_label(&self, code: &str) -> Option<&str> {
        self.taxonomy
            .iter()
            .find(|(_, v)| v.as_str() == code)
            .map(|(k, _)| k.as_str())
    }
}
