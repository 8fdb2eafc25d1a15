//! Core types for Cohort
//!
//! This crate holds the vocabulary shared by every other Cohort crate:
//! engine identities, execution records, native callables and the
//! namespace they run against, the error taxonomy, the write-once
//! [`Deferred`] result cell and the value [`codec`].

pub mod code;
pub mod codec;
pub mod deferred;
pub mod error;
pub mod types;

// Re-export commonly used types at the crate root
pub use code::{Binding, Callable, Code, Namespace, Scope};
pub use codec::{Codec, JsonCodec, Serialized, TypeTag};
pub use deferred::Deferred;
pub use error::{CompositeError, EngineError, FailureEntry, RemoteFailure, Result};
pub use types::{EngineId, ExecuteResult, ResultIndex};
