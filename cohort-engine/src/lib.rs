//! Engine components for Cohort
//!
//! This crate defines the [`EngineCore`] capability set, the per-engine
//! [`PropertiesStore`], and [`LocalEngine`], an in-process engine that runs
//! source fragments through a pluggable [`Interpreter`].

pub mod engine;
pub mod interpreter;
pub mod local;
pub mod properties;

// Re-export commonly used types
pub use engine::{Bindings, EngineCore, Functions, ID_BINDING};
pub use interpreter::{Interpreter, ScriptInterpreter};
pub use local::LocalEngine;
pub use properties::PropertiesStore;
