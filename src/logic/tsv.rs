use log::info;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, GenerationError};
use crate::model::Sample;

/// Fixed leading columns of every export
pub const CORE_COLUMNS: [&str; 7] = [
    "SAMPLE_CODE",
    "PARENT",
    "EXPERIMENT",
    "PROJECT",
    "SPACE",
    "SAMPLE_TYPE",
    "SECONDARY_NAME",
];

/// Tab-separated export of a sample set.
///
/// Rows follow input order, property columns are sorted, so equal input
/// always renders to identical bytes.
pub struct TsvSerializer;

impl TsvSerializer {
    pub fn property_keys<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> BTreeSet<String> {
        samples
            .into_iter()
            .flat_map(|s| s.properties.keys().cloned())
            .collect()
    }

    pub fn render<'a>(samples: impl IntoIterator<Item = &'a Sample> + Clone) -> Result<String, GenerationError> {
        let keys = Self::property_keys(samples.clone());
        let mut out = String::new();

        let header: Vec<&str> = CORE_COLUMNS
            .iter()
            .copied()
            .chain(keys.iter().map(String::as_str))
            .collect();
        out.push_str(&header.join("\t"));
        out.push('\n');

        for sample in samples {
            let mut row = vec![
                sample.code.clone(),
                sample.parent_codes.join(" "),
                sample.experiment_code.clone(),
                sample.project_code.clone(),
                sample.space_code.clone(),
                sample.sample_type.code().to_string(),
                sample.secondary_name.clone(),
            ];
            for key in &keys {
                row.push(match sample.properties.get(key) {
                    Some(value) => value.render()?,
                    None => String::new(),
                });
            }
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        Ok(out)
    }

    /// Property keys named by an export's header row
    pub fn parse_header(tsv: &str) -> Result<BTreeSet<String>, GenerationError> {
        let header = tsv
            .lines()
            .next()
            .ok_or_else(|| GenerationError::InvalidInput("empty export".to_string()))?;
        let columns: Vec<&str> = header.split('\t').collect();
        if columns.len() < CORE_COLUMNS.len() || columns[..CORE_COLUMNS.len()] != CORE_COLUMNS {
            return Err(GenerationError::InvalidInput(
                "export header lacks the core columns".to_string(),
            ));
        }
        Ok(columns[CORE_COLUMNS.len()..]
            .iter()
            .map(|c| c.to_string())
            .collect())
    }

    /// Hex sha256 of the rendered export, used as its ETag
    pub fn fingerprint(tsv: &str) -> String {
        hex::encode(Sha256::digest(tsv.as_bytes()))
    }

    /// Write `<directory>/<project>.tsv`, creating the directory if needed
    pub fn write_file<'a>(
        directory: &Path,
        project: &str,
        samples: impl IntoIterator<Item = &'a Sample> + Clone,
    ) -> Result<PathBuf, ExportError> {
        let tsv = Self::render(samples)?;
        let path = directory.join(format!("{}.tsv", project));
        std::fs::create_dir_all(directory).map_err(|source| ExportError::Write {
            path: directory.to_path_buf(),
            source,
        })?;
        std::fs::write(&path, tsv.as_bytes()).map_err(|source| ExportError::Write {
            path: path.clone(),
            source,
        })?;
        info!("Wrote export for {} to {}", project, path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{keys, FactorAssignment, FactorList, FactorValue, PropertyValue, SampleType};

    fn samples() -> Vec<Sample> {
        let factors = FactorList::new(vec![FactorAssignment::new(
            "genotype",
            &FactorValue::new("wt"),
        )])
        .unwrap();
        vec![
            Sample::new(
                "QABCDENTITY-1".to_string(),
                "QABCDE1".to_string(),
                "QABCD",
                "SPACE",
                SampleType::BiologicalEntity,
                "mouse 1",
            )
            .with_property(keys::ORGANISM, PropertyValue::term("10090"))
            .with_property(keys::FACTORS, PropertyValue::Factors(factors)),
            Sample::new(
                "QABCD001".to_string(),
                "QABCDE2".to_string(),
                "QABCD",
                "SPACE",
                SampleType::BiologicalSample,
                "mouse 1 liver",
            )
            .with_parent("QABCDENTITY-1")
            .with_property(keys::PRIMARY_TISSUE, PropertyValue::term("LIVER")),
        ]
    }

    #[test]
    fn test_render_layout() {
        let samples = samples();
        let tsv = TsvSerializer::render(&samples).unwrap();
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "SAMPLE_CODE\tPARENT\tEXPERIMENT\tPROJECT\tSPACE\tSAMPLE_TYPE\tSECONDARY_NAME\tQ_NCBI_ORGANISM\tQ_PRIMARY_TISSUE\tQ_PROPERTIES"
        );
        let row: Vec<&str> = lines[2].split('\t').collect();
        assert_eq!(row[0], "QABCD001");
        assert_eq!(row[1], "QABCDENTITY-1");
        assert_eq!(row[5], "Q_BIOLOGICAL_SAMPLE");
        assert_eq!(row[7], "");
        assert_eq!(row[8], "LIVER");
        assert!(lines[1].contains("<qproperties>"));
    }

    #[test]
    fn test_render_is_deterministic_and_header_recovers_keys() {
        let samples = samples();
        let first = TsvSerializer::render(&samples).unwrap();
        let second = TsvSerializer::render(&samples).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            TsvSerializer::fingerprint(&first),
            TsvSerializer::fingerprint(&second)
        );
        assert_eq!(
            TsvSerializer::parse_header(&first).unwrap(),
            TsvSerializer::property_keys(&samples)
        );
        assert!(TsvSerializer::parse_header("CODE\tX").is_err());
    }

    #[test]
    fn test_write_file() {
        let dir = std::env::temp_dir().join(format!("wizard-export-{}", uuid::Uuid::new_v4()));
        let samples = samples();
        let path = TsvSerializer::write_file(&dir, "QABCD", &samples).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, TsvSerializer::render(&samples).unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
