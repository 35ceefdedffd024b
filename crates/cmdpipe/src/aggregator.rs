//! First-failure-wins error aggregation

use std::sync::OnceLock;

use parking_lot::Mutex;

/// Root failure plus everything reported after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureChain<E> {
    pub root: E,
    pub suppressed: Vec<E>,
}

/// Single-assignment box for concurrent failures
///
/// The first reported failure becomes the root and never changes. Later
/// failures are kept as suppressed causes of the root. Reading the root is a
/// plain atomic load; the lock is only taken once something has failed.
#[derive(Debug)]
pub struct ExceptionAggregator<E> {
    root: OnceLock<E>,
    suppressed: Mutex<Vec<E>>,
}

impl<E> Default for ExceptionAggregator<E> {
    fn default() -> Self {
        Self {
            root: OnceLock::new(),
            suppressed: Mutex::new(Vec::new()),
        }
    }
}

impl<E> ExceptionAggregator<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a failure, returns `true` if it became the root
    pub fn add(&self, err: E) -> bool {
        match self.root.set(err) {
            Ok(()) => true,
            Err(err) => {
                self.suppressed.lock().push(err);
                false
            }
        }
    }

    /// First failure reported, if any
    pub fn root(&self) -> Option<&E> {
        self.root.get()
    }

    pub fn has_failed(&self) -> bool {
        self.root.get().is_some()
    }
}

impl<E: Clone> ExceptionAggregator<E> {
    /// Failures reported after the root, in arrival order
    pub fn suppressed(&self) -> Vec<E> {
        self.suppressed.lock().clone()
    }

    /// Root and suppressed failures, `None` if nothing failed
    pub fn snapshot(&self) -> Option<FailureChain<E>> {
        self.root().map(|root| FailureChain {
            root: root.clone(),
            suppressed: self.suppressed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_empty() {
        let agg: ExceptionAggregator<String> = ExceptionAggregator::new();
        assert!(!agg.has_failed());
        assert!(agg.root().is_none());
        assert!(agg.snapshot().is_none());
    }

    #[test]
    fn test_first_wins() {
        let agg = ExceptionAggregator::new();
        assert!(agg.add("first"));
        assert!(!agg.add("second"));
        assert!(!agg.add("third"));

        assert_eq!(agg.root(), Some(&"first"));
        assert_eq!(
            agg.snapshot(),
            Some(FailureChain {
                root: "first",
                suppressed: vec!["second", "third"],
            })
        );
    }

    #[test]
    fn test_concurrent_adds_keep_every_failure() {
        let agg = Arc::new(ExceptionAggregator::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || agg.add(i))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        let chain = agg.snapshot().unwrap();
        assert_eq!(chain.suppressed.len(), 15);
        assert!(!chain.suppressed.contains(&chain.root));
    }
}
