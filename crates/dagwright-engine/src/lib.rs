//! dagwright engine
//!
//! This crate turns a resolved project into relations:
//! - Compilation of models and assertions to SQL
//! - The DAG scheduler (sequential or bounded-concurrent)
//! - The assertion runner
//! - The [`Pipeline`] facade used by the CLI

pub mod cancel;
pub mod error;
pub mod compile;
pub mod scheduler;
pub mod assertions;
pub mod pipeline;

pub use cancel::CancellationToken;
pub use error::EngineError;
pub use compile::{compile, CompiledAssertion, CompiledModel, CompiledProject};
pub use scheduler::{build_model, BuildOptions, Builder};
pub use assertions::{AssertionRunner, DEFAULT_SAMPLE_LIMIT};
pub use pipeline::{Pipeline, RunOptions, RUN_RESULTS_FILE};
