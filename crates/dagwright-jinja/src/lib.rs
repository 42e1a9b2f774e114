//! Jinja rendering for dagwright models
//!
//! This crate handles:
//! - The per-invocation run context (invocation id, start time, target, vars)
//! - Dialect-aware template functions (dates, surrogate keys, regex, seasons)
//! - Rendering model and assertion bodies to SQL
//! - The calendar tables behind the date dimension

pub mod renderer;
pub mod context;
pub mod functions;
pub mod calendar;

pub use renderer::{SqlRenderer, RenderError};
pub use context::{RunContext, RunContextBuilder, TargetContext, TIMESTAMP_FORMAT};
pub use calendar::{date_spine, CalendarDay, Season, DAY_NAMES, SEASONS};
