//! Function registry
//!
//! Immutable name → callable table injected into the compiler. Names can
//! refer to processors (run by `function` steps) or predicates (consulted by
//! `whileTrue` loops). Lookups never fail; a missing name is simply `None`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::Result;

use super::context::ExecutionContext;
use super::events::EventSink;

/// Custom logic invoked by a `function` step
///
/// The returned result is not inspected by the pipeline. A processor that
/// wants its failure reported must emit an event itself.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn call(&self, context: &mut ExecutionContext, events: &EventSink) -> Result<()>;
}

#[async_trait]
impl<F> Processor for F
where
    F: Fn(&mut ExecutionContext, &EventSink) -> Result<()> + Send + Sync,
{
    async fn call(&self, context: &mut ExecutionContext, events: &EventSink) -> Result<()> {
        (self)(context, events)
    }
}

/// Loop condition referenced by `whileTrue`
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn test(&self, context: &ExecutionContext) -> bool;
}

#[async_trait]
impl<F> Predicate for F
where
    F: Fn(&ExecutionContext) -> bool + Send + Sync,
{
    async fn test(&self, context: &ExecutionContext) -> bool {
        (self)(context)
    }
}

#[derive(Clone)]
enum Entry {
    Processor(Arc<dyn Processor>),
    Predicate(Arc<dyn Predicate>),
}

/// Name → callable lookup table
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, Entry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under `name`, replacing any previous entry
    pub fn register_processor<P>(&mut self, name: impl Into<String>, processor: P) -> &mut Self
    where
        P: Processor + 'static,
    {
        self.entries
            .insert(name.into(), Entry::Processor(Arc::new(processor)));
        self
    }

    /// Register a plain function as a processor
    pub fn register_fn<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&mut ExecutionContext, &EventSink) -> Result<()> + Send + Sync + 'static,
    {
        self.register_processor(name, function)
    }

    /// Register a plain function as a predicate
    pub fn register_predicate_fn<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.register_predicate(name, function)
    }

    /// Register a predicate under `name`, replacing any previous entry
    pub fn register_predicate<P>(&mut self, name: impl Into<String>, predicate: P) -> &mut Self
    where
        P: Predicate + 'static,
    {
        self.entries
            .insert(name.into(), Entry::Predicate(Arc::new(predicate)));
        self
    }

    /// Resolve a processor; predicates under the same name don't count
    pub fn processor(&self, name: &str) -> Option<Arc<dyn Processor>> {
        match self.entries.get(name) {
            Some(Entry::Processor(p)) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    /// Resolve a predicate; processors under the same name don't count
    pub fn predicate(&self, name: &str) -> Option<Arc<dyn Predicate>> {
        match self.entries.get(name) {
            Some(Entry::Predicate(p)) => Some(Arc::clone(p)),
            _ => None,
        }
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("names", &self.names())
            .finish()
    }
}
