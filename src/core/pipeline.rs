//! Pipeline domain model

use crate::core::{
    config::PipelineConfig,
    step::Step,
    trigger::{DispatchTrigger, TriggerConfig, TriggerEvent},
};
use std::collections::HashMap;
use std::path::PathBuf;

/// A pipeline definition: an ordered, immutable list of steps
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Events that start the pipeline
    pub triggers: TriggerConfig,

    /// Global variables available to all steps
    pub variables: HashMap<String, String>,

    /// Environment applied to every command
    pub env: HashMap<String, String>,

    /// Dependency environment directory, relative to the working directory
    pub dependency_env: Option<PathBuf>,

    /// Steps in declaration order
    pub steps: Vec<Step>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut triggers = config.triggers.clone();
        // A pipeline without an `on:` section can still be started by hand
        if triggers.is_empty() {
            triggers.workflow_dispatch = Some(DispatchTrigger::default());
        }

        Pipeline {
            name: config.name.clone(),
            triggers,
            variables: config.variables_as_string_map(),
            env: config.env.clone(),
            dependency_env: config.dependency_env.as_ref().map(|e| PathBuf::from(&e.path)),
            steps: config.steps.iter().map(Step::from_config).collect(),
        }
    }

    /// Build a manually-dispatched pipeline from steps
    pub fn new<N: Into<String>>(name: N, steps: Vec<Step>) -> Self {
        Pipeline {
            name: name.into(),
            triggers: TriggerConfig {
                push: None,
                workflow_dispatch: Some(DispatchTrigger::default()),
            },
            variables: HashMap::new(),
            env: HashMap::new(),
            dependency_env: None,
            steps,
        }
    }

    pub fn with_dependency_env<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.dependency_env = Some(path.into());
        self
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Step IDs in execution order
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    /// Whether this event starts the pipeline
    pub fn is_triggered_by(&self, event: &TriggerEvent) -> bool {
        self.triggers.matches(event)
    }
}
