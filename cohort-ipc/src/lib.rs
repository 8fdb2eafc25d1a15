//! Inter-process communication for Cohort
//!
//! This crate provides the wire protocol and transports that connect a
//! controller to engines in other processes, an [`EngineServer`] that exposes
//! any engine over a transport, and [`RemoteEngine`], the client side that
//! implements the engine capability set by forwarding calls.

pub mod error;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    EngineReply, EngineRequest, MessageEnvelope, Outcome, ReplyPayload, RequestMessage,
    SerializedBindings, IPC_PROTOCOL_VERSION,
};
pub use remote::RemoteEngine;
pub use server::{serve_stdio, EngineServer};
pub use transport::{
    FrameReader, FrameWriter, IpcTransport, StdioTransport, StreamTransport, TransportOptions,
};
