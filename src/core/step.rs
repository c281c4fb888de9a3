//! Step domain model

use crate::core::config::{CommandConfig, ReadinessConfig, StepConfig};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Human-readable name shown in output
    pub name: String,

    /// What the step does
    pub action: StepAction,

    /// A failure of this step does not halt the run
    pub continue_on_error: bool,

    /// Activate the dependency environment for this step's commands
    pub activate_env: bool,

    /// Step-level environment overrides
    pub env: HashMap<String, String>,

    /// Upper bound for the step
    pub timeout: Option<Duration>,
}

/// The work a step performs
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Materialize or verify the repository in the working directory
    Checkout {
        repository: Option<String>,
        reference: Option<String>,
    },
    /// Verify an interpreter of the requested version and publish it as a variable
    SetupRuntime {
        name: String,
        program: String,
        version: String,
    },
    /// Run commands in order, stopping at the first failure
    Run { commands: Vec<CommandSpec> },
    /// Launch a service, wait until it answers, then stop it
    SmokeTest {
        service: CommandSpec,
        url: String,
        readiness: ReadinessPolicy,
    },
    /// Print a message; never fails
    Message { text: String },
}

impl StepAction {
    /// Short label for the action kind
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Checkout { .. } => "checkout",
            StepAction::SetupRuntime { .. } => "setup_runtime",
            StepAction::Run { .. } => "run",
            StepAction::SmokeTest { .. } => "smoke_test",
            StepAction::Message { .. } => "message",
        }
    }
}

/// A program invocation: no shell involved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Relative paths resolve against the pipeline working directory
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<P: Into<String>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn from_config(config: &CommandConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_directory.as_ref().map(PathBuf::from),
        }
    }

    /// Substitute `{{ variable }}` placeholders in the program and arguments
    pub fn render(&self, variables: &HashMap<String, String>) -> CommandSpec {
        CommandSpec {
            program: render_template(&self.program, variables),
            args: self
                .args
                .iter()
                .map(|arg| render_template(arg, variables))
                .collect(),
            working_dir: self.working_dir.clone(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_command_line(f, &self.program, &self.args)
    }
}

/// Write `program args...` on one line, quoting empty or spaced arguments
pub fn write_command_line(f: &mut fmt::Formatter<'_>, program: &str, args: &[String]) -> fmt::Result {
    write!(f, "{}", program)?;
    for arg in args {
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            write!(f, " \"{}\"", arg)?;
        } else {
            write!(f, " {}", arg)?;
        }
    }
    Ok(())
}

/// Readiness wait for the smoke test service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Probe every `interval` until success or `timeout`
    Poll { interval: Duration, timeout: Duration },
    /// Sleep `delay`, then probe exactly once
    FixedDelay { delay: Duration },
}

impl From<ReadinessConfig> for ReadinessPolicy {
    fn from(config: ReadinessConfig) -> Self {
        match config {
            ReadinessConfig::Poll { interval_ms, timeout_secs } => ReadinessPolicy::Poll {
                interval: Duration::from_millis(interval_ms),
                timeout: Duration::from_secs(timeout_secs),
            },
            ReadinessConfig::FixedDelay { delay_secs } => ReadinessPolicy::FixedDelay {
                delay: Duration::from_secs(delay_secs),
            },
        }
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Replace `{{ name }}` placeholders; unknown names are left untouched
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &regex::Captures| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

impl Step {
    /// Create a step from a step config
    ///
    /// The config must have passed validation (exactly one action set).
    pub fn from_config(config: &StepConfig) -> Self {
        let action = if let Some(checkout) = &config.checkout {
            StepAction::Checkout {
                repository: checkout.repository.clone(),
                reference: checkout.reference.clone(),
            }
        } else if let Some(setup) = &config.setup_runtime {
            StepAction::SetupRuntime {
                name: setup.name.clone(),
                program: setup.program.clone(),
                version: setup.version.clone(),
            }
        } else if let Some(commands) = &config.run {
            StepAction::Run {
                commands: commands.iter().map(CommandSpec::from_config).collect(),
            }
        } else if let Some(smoke) = &config.smoke_test {
            StepAction::SmokeTest {
                service: CommandSpec::from_config(&smoke.service),
                url: smoke.url.clone(),
                readiness: smoke.readiness.into(),
            }
        } else {
            StepAction::Message {
                text: config.message.clone().unwrap_or_default(),
            }
        };

        let name = if config.name.trim().is_empty() {
            config.id.clone()
        } else {
            config.name.clone()
        };

        Step {
            id: config.id.clone(),
            name,
            action,
            continue_on_error: config.continue_on_error,
            activate_env: config.activate_env,
            env: config.env.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Build a step directly (used by tests and embedders)
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N, action: StepAction) -> Self {
        Step {
            id: id.into(),
            name: name.into(),
            action,
            continue_on_error: false,
            activate_env: false,
            env: HashMap::new(),
            timeout: None,
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn with_activated_env(mut self) -> Self {
        self.activate_env = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
