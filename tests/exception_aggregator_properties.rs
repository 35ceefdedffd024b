//! Property-based tests for failure aggregation
//!
//! **Property 5: First Failure Wins**
//! For any sequence of reported failures, the first becomes the root and the
//! rest are kept as suppressed failures in arrival order

use std::sync::Arc;
use std::thread;

use cmdpipe::ExceptionAggregator;
use proptest::prelude::*;

/// Property 5: First Failure Wins
#[test]
fn prop_first_failure_is_root() {
    proptest!(ProptestConfig::with_cases(100), |(
        failures in prop::collection::vec(any::<u32>(), 1..50),
    )| {
        let aggregator = ExceptionAggregator::new();
        let became_root: Vec<bool> = failures.iter().map(|f| aggregator.add(*f)).collect();

        prop_assert!(became_root[0]);
        prop_assert!(became_root[1..].iter().all(|won| !won));

        let chain = aggregator.snapshot().unwrap();
        prop_assert_eq!(chain.root, failures[0]);
        prop_assert_eq!(chain.suppressed, failures[1..].to_vec());
    });
}

/// Concurrent reporters: exactly one root, nothing lost
#[test]
fn prop_concurrent_failures_are_all_kept() {
    proptest!(ProptestConfig::with_cases(20), |(
        threads in 2usize..16,
    )| {
        let aggregator = Arc::new(ExceptionAggregator::new());
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let aggregator = Arc::clone(&aggregator);
                thread::spawn(move || aggregator.add(i))
            })
            .collect();
        let roots = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        prop_assert_eq!(roots, 1);
        let chain = aggregator.snapshot().unwrap();
        let mut all: Vec<usize> = chain.suppressed.clone();
        all.push(chain.root);
        all.sort_unstable();
        prop_assert_eq!(all, (0..threads).collect::<Vec<_>>());
    });
}
