//! Execution handler trait and registry.
//!
//! Handlers are the collaborators that give an execution kind its meaning:
//! the queue knows how to schedule, claim, and retry work, while a handler
//! knows what one unit of that work actually does.

pub mod journal;
pub mod notify;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ExecError;

/// Context passed to a handler alongside the payload.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub execution_id: Uuid,
    pub run_id: Uuid,
    pub owner: String,
    pub trace_id: Uuid,
    pub attempt: u32,
}

/// A kind-specific execution handler.
#[async_trait]
pub trait ExecutionHandler: Send + Sync {
    /// The execution kind this handler serves.
    fn kind(&self) -> &str;

    /// Perform one unit of work. The returned value becomes the run output.
    ///
    /// Errors are retried by the worker until the execution's retry budget
    /// is exhausted.
    async fn execute(
        &self,
        ctx: &HandlerContext,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecError>;
}

/// Registry dispatching execution kinds to their handler implementation.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ExecutionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its declared kind. Last registration wins.
    pub fn register(&mut self, handler: Arc<dyn ExecutionHandler>) {
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    /// Register the built-in reference handlers.
    pub fn register_defaults(&mut self) {
        self.register(Arc::new(notify::NotifyHandler));
        self.register(Arc::new(journal::JournalHandler));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ExecutionHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Registered kinds, sorted for stable output.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
