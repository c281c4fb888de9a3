//! Pipeline configuration from YAML

use crate::core::{trigger::TriggerConfig, Pipeline};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Events that start the pipeline
    #[serde(default, rename = "on")]
    pub triggers: TriggerConfig,

    /// Variables available to `{{ name }}` placeholders
    #[serde(default)]
    variables: HashMap<String, Value>,

    /// Environment variables set for every command
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Isolated dependency environment (a Python venv)
    #[serde(default)]
    pub dependency_env: Option<DependencyEnvConfig>,

    /// Pipeline steps, run in declaration order
    pub steps: Vec<StepConfig>,
}

/// Location of the isolated dependency environment, relative to the working directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEnvConfig {
    pub path: String,
}

/// Step configuration as defined in YAML
///
/// Exactly one of `checkout`, `setup_runtime`, `run`, `smoke_test` and
/// `message` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name, defaults to the ID
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_runtime: Option<SetupRuntimeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Vec<CommandConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoke_test: Option<SmokeTestConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Keep going when this step fails
    #[serde(default)]
    pub continue_on_error: bool,

    /// Activate the dependency environment for this step's commands
    #[serde(default)]
    pub activate_env: bool,

    /// Extra environment variables for this step
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Upper bound for the whole step, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Checkout configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Clone this repository into the working directory; verify the existing work tree when absent
    #[serde(default)]
    pub repository: Option<String>,

    /// Branch, tag or commit to check out
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

/// Runtime setup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupRuntimeConfig {
    /// Variable that will hold the interpreter program for later steps
    pub name: String,

    /// Interpreter program to probe
    pub program: String,

    /// Required version prefix, e.g. "3.11"
    #[serde(deserialize_with = "deserialize_version")]
    pub version: String,
}

/// A structured command invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Relative to the pipeline working directory
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// Smoke test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeTestConfig {
    /// The long-running service to launch
    pub service: CommandConfig,

    /// Endpoint that must answer 2xx once the service is up
    pub url: String,

    #[serde(default)]
    pub readiness: ReadinessConfig,
}

/// How to wait for the service before declaring the smoke test failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReadinessConfig {
    /// Probe repeatedly until success or timeout
    Poll {
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        #[serde(default = "default_readiness_timeout_secs")]
        timeout_secs: u64,
    },
    /// Sleep once, then probe once
    FixedDelay {
        #[serde(default = "default_fixed_delay_secs")]
        delay_secs: u64,
    },
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        ReadinessConfig::Poll {
            interval_ms: default_interval_ms(),
            timeout_secs: default_readiness_timeout_secs(),
        }
    }
}

fn default_interval_ms() -> u64 {
    500
}

fn default_readiness_timeout_secs() -> u64 {
    30
}

fn default_fixed_delay_secs() -> u64 {
    10
}

/// Accept `"3.11"` and whole numbers like `3`
///
/// An unquoted `3.10` is a float to YAML and would silently turn into `3.1`.
fn deserialize_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) if n.is_f64() => Err(serde::de::Error::custom(format!(
            "version must be quoted: an unquoted {} is read as a number",
            n
        ))),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("version must be a string")),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl StepConfig {
    fn action_count(&self) -> usize {
        [
            self.checkout.is_some(),
            self.setup_runtime.is_some(),
            self.run.is_some(),
            self.smoke_test.is_some(),
            self.message.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(yaml).context("Invalid pipeline YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            anyhow::bail!("Pipeline '{}' has no steps", self.name);
        }

        if let Some(push) = &self.triggers.push {
            if push.branches.is_empty() {
                anyhow::bail!("Push trigger must list at least one branch");
            }
        }

        if let Some(env) = &self.dependency_env {
            if env.path.trim().is_empty() {
                anyhow::bail!("dependency_env.path must not be empty");
            }
        }

        for (name, value) in &self.variables {
            if scalar_to_string(value).is_none() {
                anyhow::bail!("Variable '{}' must be a string, number or boolean", name);
            }
        }

        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            if !seen_ids.insert(&step.id) {
                anyhow::bail!("Duplicate step ID: {}", step.id);
            }
            self.validate_step(step)?;
        }

        Ok(())
    }

    fn validate_step(&self, step: &StepConfig) -> Result<()> {
        match step.action_count() {
            1 => {}
            0 => anyhow::bail!(
                "Step '{}' must define one of checkout, setup_runtime, run, smoke_test, message",
                step.id
            ),
            _ => anyhow::bail!("Step '{}' defines more than one action", step.id),
        }

        if step.activate_env && self.dependency_env.is_none() {
            anyhow::bail!(
                "Step '{}' sets activate_env but the pipeline has no dependency_env",
                step.id
            );
        }

        if step.timeout_secs == Some(0) {
            anyhow::bail!("Step '{}' has a zero timeout", step.id);
        }

        if let Some(commands) = &step.run {
            if commands.is_empty() {
                anyhow::bail!("Step '{}' has an empty run list", step.id);
            }
            for command in commands {
                validate_command(&step.id, command)?;
            }
        }

        if let Some(setup) = &step.setup_runtime {
            if setup.name.trim().is_empty() || setup.program.trim().is_empty() {
                anyhow::bail!("Step '{}' setup_runtime needs a name and a program", step.id);
            }
            let version_format = Regex::new(r"^\d+(\.\d+){0,2}$")?;
            if !version_format.is_match(&setup.version) {
                anyhow::bail!(
                    "Step '{}' has an invalid runtime version '{}'",
                    step.id,
                    setup.version
                );
            }
        }

        if let Some(smoke) = &step.smoke_test {
            validate_command(&step.id, &smoke.service)?;

            // Placeholders are resolved at run time
            if !smoke.url.contains("{{") {
                let url = reqwest::Url::parse(&smoke.url).with_context(|| {
                    format!("Step '{}' has an invalid smoke test url '{}'", step.id, smoke.url)
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    anyhow::bail!("Step '{}' smoke test url must be http(s)", step.id);
                }
            }

            match smoke.readiness {
                ReadinessConfig::Poll { interval_ms, timeout_secs } => {
                    if interval_ms == 0 || timeout_secs == 0 {
                        anyhow::bail!(
                            "Step '{}' readiness interval and timeout must be positive",
                            step.id
                        );
                    }
                }
                ReadinessConfig::FixedDelay { .. } => {}
            }
        }

        Ok(())
    }

    /// Variables rendered as strings
    pub fn variables_as_string_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .filter_map(|(k, v)| scalar_to_string(v).map(|s| (k.clone(), s)))
            .collect()
    }

    /// Number of declared variables
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}

fn validate_command(step_id: &str, command: &CommandConfig) -> Result<()> {
    if command.program.trim().is_empty() {
        anyhow::bail!("Step '{}' has a command with an empty program", step_id);
    }
    Ok(())
}
