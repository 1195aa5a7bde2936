//! Registry of named components.
//!
//! Logic, db logic, messages and prepared processors are registered here
//! by name before definitions that refer to them are prepared. Processors
//! must be registered before the processors that call them.

use crate::builder::Preparer;
use crate::logic::{DbLogic, Logic};
use crate::processor::TransactionProcessor;
use conductor_core::{EngineError, EngineResult, MessageDef, Resources};
use conductor_plan::{ComponentLookup, DefinitionSet, EngineConfig, ProcessorSpec};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Components available to definitions
#[derive(Default)]
pub struct ComponentCatalog {
    config: EngineConfig,
    logics: IndexMap<String, Arc<dyn Logic>>,
    db_logics: IndexMap<String, Arc<dyn DbLogic>>,
    processors: IndexMap<String, Arc<TransactionProcessor>>,
    messages: IndexMap<String, MessageDef>,
}

impl ComponentCatalog {
    /// Create an empty catalog with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` for everything prepared from now on
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register logic under `name`, replacing any previous one
    pub fn register_logic(&mut self, name: &str, logic: impl Logic + 'static) {
        self.logics.insert(name.to_string(), Arc::new(logic));
    }

    /// Register db logic under `name`, replacing any previous one
    pub fn register_db_logic(&mut self, name: &str, logic: impl DbLogic + 'static) {
        self.db_logics.insert(name.to_string(), Arc::new(logic));
    }

    /// Add a message definition
    pub fn add_message(&mut self, message: MessageDef) {
        self.messages.insert(message.id.clone(), message);
    }

    /// Register a prepared processor under its own name
    pub fn register_processor(&mut self, processor: Arc<TransactionProcessor>) {
        self.processors.insert(processor.name().to_string(), processor);
    }

    /// Registered logic
    #[must_use]
    pub fn logic(&self, name: &str) -> Option<Arc<dyn Logic>> {
        self.logics.get(name).cloned()
    }

    /// Registered db logic
    #[must_use]
    pub fn db_logic(&self, name: &str) -> Option<Arc<dyn DbLogic>> {
        self.db_logics.get(name).cloned()
    }

    /// Registered processor
    #[must_use]
    pub fn processor(&self, name: &str) -> Option<Arc<TransactionProcessor>> {
        self.processors.get(name).cloned()
    }

    /// Registered processor, or an error naming it
    ///
    /// # Errors
    ///
    /// Returns error if no processor is registered under `name`
    pub fn require_processor(&self, name: &str) -> EngineResult<Arc<TransactionProcessor>> {
        self.processor(name).ok_or_else(|| EngineError::UnknownComponent {
            kind: "processor".to_string(),
            name: name.to_string(),
        })
    }

    /// Message definition
    #[must_use]
    pub fn message(&self, id: &str) -> Option<&MessageDef> {
        self.messages.get(id)
    }

    /// Names of registered processors in registration order
    #[must_use]
    pub fn processor_names(&self) -> Vec<String> {
        self.processors.keys().cloned().collect()
    }

    /// Prepare `spec` and register the result
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found in `spec`
    pub fn prepare(&mut self, spec: &ProcessorSpec, resources: &Resources) -> EngineResult<Arc<TransactionProcessor>> {
        let processor = Arc::new(Preparer::new(self, resources).prepare(spec)?);
        self.register_processor(processor.clone());
        Ok(processor)
    }

    /// Take over configuration and messages of `set`, then prepare its processors in order
    ///
    /// # Errors
    ///
    /// Returns the first configuration error; processors prepared before it stay registered
    pub fn load_definitions(&mut self, set: &DefinitionSet, resources: &Resources) -> EngineResult<Vec<String>> {
        self.config = set.config.clone();
        for message in &set.messages {
            self.add_message(message.clone());
        }
        let mut names = Vec::with_capacity(set.processors.len());
        for spec in &set.processors {
            self.prepare(spec, resources)?;
            names.push(spec.name.clone());
        }
        tracing::info!(processors = names.len(), messages = set.messages.len(), "definitions loaded");
        Ok(names)
    }
}

impl ComponentLookup for ComponentCatalog {
    fn has_logic(&self, name: &str) -> bool {
        self.logics.contains_key(name)
    }

    fn has_db_logic(&self, name: &str) -> bool {
        self.db_logics.contains_key(name)
    }

    fn has_processor(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    fn has_message(&self, id: &str) -> bool {
        self.messages.contains_key(id)
    }
}

impl fmt::Debug for ComponentCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCatalog")
            .field("config", &self.config)
            .field("logics", &self.logics.keys().collect::<Vec<_>>())
            .field("db_logics", &self.db_logics.keys().collect::<Vec<_>>())
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .field("messages", &self.messages.len())
            .finish()
    }
}
