//! Core domain models for the deployment pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, triggers, run state and results.

pub mod config;
pub mod context;
pub mod pipeline;
pub mod result;
pub mod state;
pub mod step;
pub mod trigger;

pub use context::*;
pub use pipeline::*;
pub use result::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
