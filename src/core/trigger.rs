//! Trigger events and filtering

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// The event that asks for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Commits pushed to a branch
    Push { branch: String },
    /// Manual invocation, no parameters
    WorkflowDispatch,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Push { branch } => write!(f, "push ({})", branch),
            TriggerEvent::WorkflowDispatch => write!(f, "workflow_dispatch"),
        }
    }
}

/// Trigger section of a pipeline file (`on:`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Run on pushes to the listed branches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<PushTrigger>,

    /// Run on manual dispatch; a bare `workflow_dispatch:` key enables it
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub workflow_dispatch: Option<DispatchTrigger>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushTrigger {
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchTrigger {}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<DispatchTrigger>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DispatchTrigger>::deserialize(deserializer)?;
    Ok(Some(value.unwrap_or_default()))
}

impl TriggerConfig {
    /// Check whether an event should start the pipeline
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Push { branch } => self
                .push
                .as_ref()
                .is_some_and(|push| push.branches.iter().any(|b| b == branch)),
            TriggerEvent::WorkflowDispatch => self.workflow_dispatch.is_some(),
        }
    }

    /// No trigger declared at all
    pub fn is_empty(&self) -> bool {
        self.push.is_none() && self.workflow_dispatch.is_none()
    }
}
