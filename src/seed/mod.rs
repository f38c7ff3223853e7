//! Demo content for the in-memory registry and the default vocabularies.

use anyhow::Result;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::logic::{
    apply, Conditions, DesignContext, DesignEvent, DesignState, EntityRequest, ExtractRequest,
    MccPatientRequest, MccPlanner, MccProjectScan, SampleCounter,
};
use crate::model::{Factor, FactorValue, Person, Vocabularies};
use crate::store::MemoryRegistry;

pub const DEMO_PROJECT: &str = "QDEMO";
pub const DEMO_MCC_PROJECT: &str = "QMCCA";

fn table(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(label, code)| (label.to_string(), code.to_string()))
        .collect()
}

pub fn default_vocabularies() -> Vocabularies {
    Vocabularies {
        taxonomy: table(&[
            ("Homo sapiens", "9606"),
            ("Mus musculus", "10090"),
            ("Saccharomyces cerevisiae", "4932"),
            ("Arabidopsis thaliana", "3702"),
        ]),
        tissues: table(&[
            ("Blood plasma", "BLOOD_PLASMA"),
            ("Urine", "URINE"),
            ("Liver", "LIVER"),
            ("Tumor tissue", "TUMOR_TISSUE"),
            ("Cell line", "CELL_LINE"),
        ]),
        cell_lines: table(&[("HeLa", "HELA"), ("HEK 293", "HEK293")]),
        ms_devices: table(&[
            ("Thermo Orbitrap Fusion", "THERMO_ORBITRAP_FUSION"),
            ("Thermo Q Exactive", "THERMO_QEXACTIVE"),
        ]),
        enzymes: vec![
            "Trypsin".to_string(),
            "LysC".to_string(),
            "Chymotrypsin".to_string(),
        ],
    }
}

pub fn default_people() -> Vec<Person> {
    vec![
        Person {
            id: 1,
            name: "Ada Investigator".to_string(),
            email: Some("pi@example.org".to_string()),
        },
        Person {
            id: 2,
            name: "Lin Contact".to_string(),
            email: Some("contact@example.org".to_string()),
        },
        Person {
            id: 3,
            name: "Sam Manager".to_string(),
            email: None,
        },
    ]
}

/// Populate the registry with a small designed project and one cohort case
pub async fn load_seed_data(registry: &MemoryRegistry, space: &str, mcc_space: &str) -> Result<()> {
    load_demo_project(registry, space).await?;
    load_mcc_project(registry, mcc_space).await?;
    Ok(())
}

async fn load_demo_project(registry: &MemoryRegistry, space: &str) -> Result<()> {
    let context = DesignContext {
        space: space.to_string(),
        project: DEMO_PROJECT.to_string(),
        pilot: false,
    };
    let state = DesignState::new(
        context,
        Arc::new(default_vocabularies()),
        SampleCounter::new(DEMO_PROJECT),
    );
    let genotype = Factor::new(
        "genotype",
        vec![FactorValue::new("wildtype"), FactorValue::new("knockout")],
    );
    let state = apply(
        &state,
        DesignEvent::Entities(EntityRequest {
            species: "Mus musculus".to_string(),
            replicates: 2,
            conditions: Conditions::new(vec![genotype]),
            label: None,
            person_id: None,
        }),
    )?;
    let state = apply(
        &state,
        DesignEvent::Extracts(ExtractRequest {
            tissue: "Liver".to_string(),
            tissue_detailed: None,
            cell_line: None,
            replicates: 1,
            conditions: Conditions::default(),
            tier_letter: None,
            person_id: None,
        }),
    )?;

    registry.insert_project(space, DEMO_PROJECT).await;
    registry.insert_experiments(state.experiments()).await;
    registry.insert_samples(state.samples()).await;
    info!(
        "Seeded {}/{} with {} samples",
        space,
        DEMO_PROJECT,
        state.samples().len()
    );
    Ok(())
}

async fn load_mcc_project(registry: &MemoryRegistry, space: &str) -> Result<()> {
    let request = MccPatientRequest {
        project: DEMO_MCC_PROJECT.to_string(),
        treatment: "B".to_string(),
        patient: "1".to_string(),
        timepoint: "1".to_string(),
    };
    let scan = MccProjectScan {
        project: DEMO_MCC_PROJECT.to_string(),
        ..Default::default()
    };
    let mut counter = SampleCounter::new(DEMO_MCC_PROJECT);
    let batch = MccPlanner::generate(&request, &scan, space, &mut counter)?;

    registry.insert_project(space, DEMO_MCC_PROJECT).await;
    registry.insert_experiments(batch.experiments).await;
    registry
        .insert_samples(batch.tiers.into_iter().flatten())
        .await;
    info!("Seeded {}/{} with case {}", space, DEMO_MCC_PROJECT, batch.case);
    Ok(())
}
