use design_wizard_rust::logic::{
    apply, AnalyteRequest, BatchRegistrar, Conditions, DesignContext, DesignEvent, DesignState,
    EntityRequest, ExtractRequest, NoProgress, RetryPolicy, SampleCounter, Tailoring, TierKind,
};
use design_wizard_rust::model::{keys, Factor, FactorValue, ItemKind, Pool, PropertyValue};
use design_wizard_rust::seed;
use design_wizard_rust::store::MemoryRegistry;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

fn fresh_design(project: &str) -> DesignState {
    DesignState::new(
        DesignContext {
            space: "TEST".to_string(),
            project: project.to_string(),
            pilot: false,
        },
        Arc::new(seed::default_vocabularies()),
        SampleCounter::new(project),
    )
}

fn entities(replicates: usize) -> DesignEvent {
    DesignEvent::Entities(EntityRequest {
        species: "Mus musculus".to_string(),
        replicates,
        conditions: Conditions::new(vec![Factor::new(
            "diet",
            vec![FactorValue::new("chow"), FactorValue::new("high fat")],
        )]),
        label: None,
        person_id: None,
    })
}

fn extracts() -> DesignEvent {
    DesignEvent::Extracts(ExtractRequest {
        tissue: "Liver".to_string(),
        tissue_detailed: None,
        cell_line: None,
        replicates: 1,
        conditions: Conditions::default(),
        tier_letter: None,
        person_id: None,
    })
}

fn proteins() -> DesignEvent {
    DesignEvent::TestSamples {
        analytes: vec![AnalyteRequest {
            technology: "PROTEINS".to_string(),
            replicates: 1,
            measurement: None,
            person_id: None,
        }],
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_rejection_in_second_tier_stops_before_third() {
    let mut state = fresh_design("QFLOW");
    for event in [entities(1), extracts(), proteins()] {
        state = apply(&state, event).unwrap();
    }
    let tiers = state.tiers();
    assert_eq!(tiers.len(), 3);
    let rejected = tiers[1][1].code.clone();

    let registry = Arc::new(MemoryRegistry::new());
    registry.reject(&rejected).await;
    let registrar = BatchRegistrar::new(registry.clone(), None, fast_retry());
    let batch = state.registration_batch("jdoe");
    let report = registrar
        .register(&batch, &NoProgress, &AtomicBool::new(false))
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.committed_tiers, vec![0]);
    assert_eq!(report.attempted_tiers, vec![0, 1]);
    let failure = report
        .errors
        .iter()
        .find(|f| f.kind == ItemKind::Sample)
        .unwrap();
    assert_eq!(failure.code, rejected);
    assert_eq!(failure.tier, Some(1));

    // Tier 1 stays registered apart from the rejected sample, tier 2 never arrives
    let registered: BTreeSet<String> = registry.samples().await.into_iter().map(|s| s.code).collect();
    assert!(tiers[0].iter().all(|s| registered.contains(&s.code)));
    assert!(!registered.contains(&rejected));
    assert!(tiers[2].iter().all(|s| !registered.contains(&s.code)));
}

#[tokio::test]
async fn test_pool_replaces_members_in_next_tier() {
    let mut state = fresh_design("QPOOL");
    state = apply(&state, entities(2)).unwrap();
    state = apply(&state, extracts()).unwrap();
    let extracts = state.stage(TierKind::Extracts).unwrap().retained.clone();
    let (a, b) = (extracts[0].code.clone(), extracts[1].code.clone());

    state = apply(
        &state,
        DesignEvent::Pool {
            tier: TierKind::Extracts,
            pools: vec![Pool::new("liver pool", vec![a.clone(), b.clone()])],
        },
    )
    .unwrap();
    let pools = state.stage(TierKind::Extracts).unwrap().pools.clone();
    assert_eq!(pools.len(), 1);
    assert_eq!(
        pools[0].properties.get(keys::POOL_SOURCES),
        Some(&PropertyValue::List(vec![a.clone(), b.clone()]))
    );

    state = apply(&state, proteins()).unwrap();
    let tests = &state.stage(TierKind::TestSamples).unwrap().retained;
    // two unpooled extracts plus the pool
    assert_eq!(tests.len(), 3);
    for sample in tests {
        assert!(!sample.parent_codes.contains(&a));
        assert!(!sample.parent_codes.contains(&b));
    }
    assert!(tests.iter().any(|s| s.parent_codes == vec![pools[0].code.clone()]));

    let registry = Arc::new(MemoryRegistry::new());
    let registrar = BatchRegistrar::new(registry.clone(), None, fast_retry());
    let report = registrar
        .register(&state.registration_batch("jdoe"), &NoProgress, &AtomicBool::new(false))
        .await
        .unwrap();
    assert!(report.is_success(), "{:?}", report.errors);
}

#[tokio::test]
async fn test_tailored_samples_never_become_parents() {
    let mut state = fresh_design("QTAIL");
    state = apply(&state, entities(2)).unwrap();
    let generated = state.stage(TierKind::Entities).unwrap().generated.clone();
    let removed: BTreeSet<String> = [generated[0].code.clone(), generated[3].code.clone()].into();

    state = apply(
        &state,
        DesignEvent::Tailor {
            tier: TierKind::Entities,
            tailoring: Tailoring {
                removed: removed.clone(),
                renamed: [(generated[1].code.clone(), "mouse A".to_string())].into(),
            },
        },
    )
    .unwrap();
    state = apply(&state, extracts()).unwrap();
    state = apply(&state, proteins()).unwrap();

    let samples = state.samples();
    assert_eq!(samples.len(), 2 + 2 + 2);
    for sample in &samples {
        assert!(!removed.contains(&sample.code));
        assert!(sample.parent_codes.iter().all(|p| !removed.contains(p)));
    }
    assert!(samples.iter().any(|s| s.secondary_name == "mouse A"));

    // Regenerating the entity tier drops the tailoring and everything after it
    let regenerated = apply(&state, entities(1)).unwrap();
    assert_eq!(regenerated.stages.len(), 1);
    assert_eq!(regenerated.samples().len(), 2);
    assert_eq!(regenerated.samples()[0].code, generated[0].code);
}
