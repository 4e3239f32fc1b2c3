use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use stepflow::admin;
use stepflow::config::WorkflowFile;
use stepflow::store::{StepRecord, StepStore};
use stepflow::types::StepState;
use stepflow_test_utils::Harness;
use stepflow_test_utils::builders::{StepConfigBuilder, WorkflowBuilder};

/// Something that can happen between or during controller passes.
#[derive(Debug, Clone)]
enum Event {
    Snapshot,
    /// Worker process of step `i` disappears without reporting.
    Crash(usize),
    /// Worker of step `i` reports success or failure.
    Report(usize, bool),
    /// Operator toggles the offline flag of step `i`.
    Offline(usize, bool),
}

fn event_strategy(max_steps: usize) -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => Just(Event::Snapshot),
        1 => (0..max_steps).prop_map(Event::Crash),
        2 => (0..max_steps, any::<bool>()).prop_map(|(i, ok)| Event::Report(i, ok)),
        1 => (0..max_steps, any::<bool>()).prop_map(|(i, off)| Event::Offline(i, off)),
    ]
}

// Acyclic by construction: step N may only depend on steps 0..N-1.
fn workflow_strategy(max_steps: usize) -> impl Strategy<Value = WorkflowFile> {
    (1..=max_steps).prop_flat_map(|num_steps| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), num_steps),
            proptest::collection::vec(any::<bool>(), num_steps),
        )
            .prop_map(move |(raw_deps, runnable)| {
                let mut builder = WorkflowBuilder::new("prop");
                for (i, potential) in raw_deps.into_iter().enumerate() {
                    let name = format!("s{i}");
                    let mut step = if runnable[i] {
                        StepConfigBuilder::runnable(&format!("bin/{name}.sh"))
                    } else {
                        StepConfigBuilder::synthetic()
                    };
                    let deps: BTreeSet<usize> = potential
                        .into_iter()
                        .filter(|_| i > 0)
                        .map(|d| d % i)
                        .collect();
                    for d in deps {
                        step = step.after(&format!("s{d}"));
                    }
                    builder = builder.with_step(&name, step.build());
                }
                builder.build()
            })
    })
}

/// `to` can be reached from `from` by following lifecycle edges. One pass may
/// take several edges (READY -> ON_DECK -> RUNNING).
fn reachable(from: StepState, to: StepState) -> bool {
    from == to
        || StepState::ALL
            .iter()
            .any(|&mid| from.can_advance_to(mid) && reachable(mid, to))
}

fn snapshot_rows(h: &Harness) -> BTreeMap<String, StepRecord> {
    h.store
        .load_steps(h.run_id())
        .unwrap()
        .into_iter()
        .map(|r| (r.name.clone(), r))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_random_histories_only_follow_lifecycle_edges(
        file in workflow_strategy(6),
        events in proptest::collection::vec(event_strategy(6), 1..40),
    ) {
        let h = Harness::new(file);
        let mut controller = h.controller().unwrap();
        let names: Vec<String> = h.file.step_names().iter().map(|s| s.to_string()).collect();
        let mut before = snapshot_rows(&h);

        for event in events {
            match event {
                Event::Snapshot => {
                    controller.snapshot().unwrap();
                }
                Event::Crash(i) => {
                    if let Some(pid) = names.get(i).and_then(|n| h.launcher.pid_of(n)) {
                        h.probe.kill(pid);
                    }
                }
                Event::Report(i, ok) => {
                    if let Some(name) = names.get(i) {
                        let outcome = if ok { StepState::Done } else { StepState::Failed };
                        admin::report_outcome(&h.store, h.step_id(name), outcome).unwrap();
                    }
                }
                Event::Offline(i, offline) => {
                    if let Some(name) = names.get(i) {
                        admin::set_offline(&h.store, h.run_id(), name, offline).unwrap();
                    }
                }
            }

            let after = snapshot_rows(&h);
            for (name, now) in after.iter() {
                let was = &before[name];
                prop_assert!(
                    reachable(was.state, now.state),
                    "{name}: {} -> {}", was.state, now.state
                );
                // Offline steps are never promoted.
                if was.offline && was.state == StepState::Ready {
                    prop_assert_eq!(now.state, StepState::Ready);
                }
                // A pid only ever belongs to a RUNNING step.
                if now.process_id.is_some() {
                    prop_assert_eq!(now.state, StepState::Running);
                }
            }
            before = after;
        }
    }
}
