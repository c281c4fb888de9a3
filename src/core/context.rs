//! Execution context - working directory, environment and variables for one run

use crate::core::{pipeline::Pipeline, step::Step};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Process-wide state for a single pipeline run
///
/// Created at run start and left on disk afterwards so the working
/// directory and dependency environment can be inspected.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Identifier of the run this context belongs to
    pub execution_id: Uuid,

    /// Absolute working directory; commands run here unless they say otherwise
    pub working_dir: PathBuf,

    /// Environment overrides applied to every command
    pub env: HashMap<String, String>,

    /// Variables for `{{ name }}` placeholders; steps may add to them
    pub variables: HashMap<String, String>,

    /// The isolated dependency environment, if the pipeline declares one
    pub dependency_env: Option<DependencyEnv>,
}

/// An isolated dependency environment (Python venv layout)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEnv {
    root: PathBuf,
}

impl DependencyEnv {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the environment's executables
    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts")
        } else {
            self.root.join("bin")
        }
    }

    /// Variables that activate the environment on top of `base_path`
    pub fn activation_vars(&self, base_path: Option<OsString>) -> HashMap<String, String> {
        let mut paths = vec![self.bin_dir()];
        if let Some(base) = base_path {
            paths.extend(std::env::split_paths(&base));
        }

        let path = std::env::join_paths(paths)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| self.bin_dir().to_string_lossy().into_owned());

        let mut vars = HashMap::new();
        vars.insert("VIRTUAL_ENV".to_string(), self.root.to_string_lossy().into_owned());
        vars.insert("PATH".to_string(), path);
        vars
    }
}

impl ExecutionContext {
    /// Create a context rooted at `working_dir`, creating the directory if needed
    pub fn prepare<P: AsRef<Path>>(working_dir: P, pipeline: &Pipeline) -> Result<Self> {
        let working_dir = working_dir.as_ref();
        std::fs::create_dir_all(working_dir).with_context(|| {
            format!("Failed to create working directory {}", working_dir.display())
        })?;
        let working_dir = working_dir.canonicalize().with_context(|| {
            format!("Failed to resolve working directory {}", working_dir.display())
        })?;

        Ok(Self::new(working_dir, pipeline))
    }

    /// Create a context without touching the filesystem
    pub fn new<P: Into<PathBuf>>(working_dir: P, pipeline: &Pipeline) -> Self {
        let working_dir = working_dir.into();
        let dependency_env = pipeline
            .dependency_env
            .as_ref()
            .map(|path| DependencyEnv::new(working_dir.join(path)));

        Self {
            execution_id: Uuid::new_v4(),
            working_dir,
            env: pipeline.env.clone(),
            variables: pipeline.variables.clone(),
            dependency_env,
        }
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: String, value: String) {
        self.variables.insert(key, value);
    }

    /// All variables available for rendering, including built-ins
    pub fn rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();
        vars.insert(
            "workdir".to_string(),
            self.working_dir.to_string_lossy().into_owned(),
        );
        vars.insert("execution_id".to_string(), self.execution_id.to_string());
        vars
    }

    /// Resolve an optional step-relative directory against the working directory
    pub fn resolve_dir(&self, dir: Option<&Path>) -> PathBuf {
        match dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.working_dir.join(dir),
            None => self.working_dir.clone(),
        }
    }

    /// Environment overrides for a command of `step`
    pub fn command_env(&self, step: &Step) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.extend(step.env.clone());

        if step.activate_env {
            if let Some(dependency_env) = &self.dependency_env {
                let base_path = env
                    .get("PATH")
                    .map(OsString::from)
                    .or_else(|| std::env::var_os("PATH"));
                env.extend(dependency_env.activation_vars(base_path));
            }
        }

        env
    }
}
