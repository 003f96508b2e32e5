//! Property-based invariant tests for the dependency graph.
//!
//! These verify structural invariants that must hold for **any** sequence of
//! reads and writes:
//!
//! 1. After a render, the edge set matches exactly the set of states read —
//!    no missing edges, no stale edges.
//! 2. Re-rendering with a different read set replaces the edge set wholesale.
//! 3. A write dirties a consumer iff the consumer read that state, and only
//!    when the value actually changed.
//! 4. A node's version counter equals the number of value-changing writes.
//! 5. The deferred queue preserves enqueue order for any batch size.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use lattice_state::{Engine, LocalState, RenderConsumer, Value};
use proptest::prelude::*;

const STATES: usize = 8;

fn make_states(engine: &Engine) -> Vec<LocalState> {
    (0..STATES)
        .map(|i| LocalState::new(engine, engine.root_scope(), format!("s{i}"), Value::from(0)))
        .collect()
}

/// Strategy: a subset of state indices, possibly with duplicates.
fn read_set() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..STATES, 0..20)
}

proptest! {
    #[test]
    fn edges_match_the_read_set_exactly(reads in read_set()) {
        let engine = Engine::new();
        let states = make_states(&engine);
        let consumer = RenderConsumer::new(&engine, "view");

        consumer.render(|| {
            for &i in &reads {
                let _ = states[i].get();
            }
        });

        let distinct: BTreeSet<usize> = reads.iter().copied().collect();
        prop_assert_eq!(consumer.dependency_count(), distinct.len());
        for (i, state) in states.iter().enumerate() {
            let expected = usize::from(distinct.contains(&i));
            prop_assert_eq!(state.node().subscriber_count(), expected);
        }
    }

    #[test]
    fn rerender_replaces_the_edge_set(first in read_set(), second in read_set()) {
        let engine = Engine::new();
        let states = make_states(&engine);
        let consumer = RenderConsumer::new(&engine, "view");

        consumer.render(|| {
            for &i in &first {
                let _ = states[i].get();
            }
        });
        consumer.render(|| {
            for &i in &second {
                let _ = states[i].get();
            }
        });

        // Only the second read set survives.
        let distinct: BTreeSet<usize> = second.iter().copied().collect();
        prop_assert_eq!(consumer.dependency_count(), distinct.len());
        for (i, state) in states.iter().enumerate() {
            let expected = usize::from(distinct.contains(&i));
            prop_assert_eq!(state.node().subscriber_count(), expected);
        }
    }

    #[test]
    fn writes_dirty_exactly_the_readers(
        reads in read_set(),
        target in 0..STATES,
        new_value in 0i64..3,
    ) {
        let engine = Engine::new();
        let states = make_states(&engine);
        let consumer = RenderConsumer::new(&engine, "view");

        consumer.render(|| {
            for &i in &reads {
                let _ = states[i].get();
            }
        });

        let was_read = reads.contains(&target);
        let changed = states[target].set(Value::from(new_value)).unwrap();
        // All states start at 0, so only a nonzero write is a change.
        prop_assert_eq!(changed, new_value != 0);
        prop_assert_eq!(consumer.is_dirty(), was_read && changed);
    }

    #[test]
    fn version_counts_value_changing_writes(writes in proptest::collection::vec(0i64..4, 0..30)) {
        let engine = Engine::new();
        let state = LocalState::new(&engine, engine.root_scope(), "s", Value::from(0));

        let mut current = 0i64;
        let mut expected_version = 0u64;
        for w in writes {
            let changed = state.set(Value::from(w)).unwrap();
            if w != current {
                prop_assert!(changed);
                expected_version += 1;
                current = w;
            } else {
                prop_assert!(!changed);
            }
        }
        prop_assert_eq!(state.node().version(), expected_version);
    }

    #[test]
    fn deferred_queue_preserves_order(count in 0usize..50) {
        let engine = Engine::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..count {
            let o = Rc::clone(&order);
            engine.defer(move || o.borrow_mut().push(i));
        }
        engine.flush_deferred();
        let expected: Vec<usize> = (0..count).collect();
        prop_assert_eq!(&*order.borrow(), &expected);
        prop_assert_eq!(engine.deferred_len(), 0);
    }
}
