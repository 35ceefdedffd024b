//! Diagnostic context propagation onto worker tasks
//!
//! Stream tasks run on pool threads, away from the task that called
//! `execute`. A [`ContextProvider`] captures whatever diagnostic context the
//! caller has when the execution starts and re-attaches it to every stream
//! task, so their log events stay correlated with the caller's.

use std::fmt;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{Instrument, Span};

/// Captures the caller's diagnostic context
pub trait ContextProvider: Send + Sync {
    /// Snapshot the context of the current task
    fn capture(&self) -> Box<dyn CapturedContext>;
}

/// Context snapshot that can be attached to other tasks
pub trait CapturedContext: Send + Sync {
    /// Run `task` inside the captured context
    fn attach(&self, task: BoxFuture<'static, ()>) -> BoxFuture<'static, ()>;
}

/// Propagates the current `tracing` span (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanContext;

impl ContextProvider for SpanContext {
    fn capture(&self) -> Box<dyn CapturedContext> {
        Box::new(CapturedSpan(Span::current()))
    }
}

struct CapturedSpan(Span);

impl CapturedContext for CapturedSpan {
    fn attach(&self, task: BoxFuture<'static, ()>) -> BoxFuture<'static, ()> {
        task.instrument(self.0.clone()).boxed()
    }
}

/// Propagates nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn capture(&self) -> Box<dyn CapturedContext> {
        Box::new(NoContext)
    }
}

impl CapturedContext for NoContext {
    fn attach(&self, task: BoxFuture<'static, ()>) -> BoxFuture<'static, ()> {
        task
    }
}

impl fmt::Debug for dyn ContextProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextProvider")
    }
}
