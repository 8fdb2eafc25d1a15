//! Engine adapter that forwards every call to an engine server
//!
//! Requests from any number of tasks share one connection. Each request is
//! tagged with a fresh correlation id; a background task reads replies and
//! hands each one to the caller waiting on that id. When the connection
//! drops, every waiting caller fails with [`EngineError::ConnectionLost`]
//! and [`RemoteEngine::closed`] resolves.

use async_trait::async_trait;
use cohort_config::IpcConfig;
use cohort_core::{
    Callable, Code, Codec, Deferred, EngineError, EngineId, ExecuteResult, JsonCodec, Result,
    ResultIndex,
};
use cohort_engine::{Bindings, EngineCore, Functions};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::IpcError;
use crate::protocol::{
    decode_bindings, decode_values, encode_bindings, EngineReply, EngineRequest, MessageEnvelope,
    Outcome, ReplyPayload, RequestMessage,
};
use crate::transport::{FrameReader, FrameWriter, TransportOptions};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct Waiters {
    pending: HashMap<Uuid, oneshot::Sender<Outcome>>,
    /// Set once the connection is gone
    closed: Option<String>,
}

fn connection_lost(reason: impl Into<String>) -> EngineError {
    EngineError::ConnectionLost {
        reason: reason.into(),
    }
}

fn unexpected(method: &str, payload: &ReplyPayload) -> EngineError {
    EngineError::serialization(format!(
        "unexpected '{}' reply to {}",
        payload.kind(),
        method
    ))
}

fn no_callables(method: &str) -> EngineError {
    EngineError::serialization(format!(
        "{method}: native callables cannot be sent to a remote engine"
    ))
}

/// An engine living on the far side of a connection
pub struct RemoteEngine {
    id: AtomicUsize,
    pid: u32,
    writer: tokio::sync::Mutex<FrameWriter<BoxedWriter>>,
    waiters: Arc<Mutex<Waiters>>,
    closed: Deferred<String>,
    codec: Arc<dyn Codec>,
    reader_task: JoinHandle<()>,
}

impl RemoteEngine {
    /// Wait for the server's `ready` message, then start routing replies.
    pub async fn connect<R, W>(
        reader: R,
        writer: W,
        config: &IpcConfig,
    ) -> std::result::Result<Self, IpcError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let options = TransportOptions::from(config);
        let mut reader = FrameReader::new(reader, options);

        let ready = tokio::time::timeout(config.handshake_timeout, reader.receive::<EngineReply>())
            .await
            .map_err(|_| IpcError::HandshakeTimeout)??;
        let (engine_id, pid) = match ready.message {
            EngineReply::Ready { engine_id, pid } => (engine_id, pid),
            other => {
                return Err(IpcError::UnexpectedMessage(format!(
                    "expected a ready message, got {other:?}"
                )))
            }
        };
        info!(engine_id, pid, "Connected to remote engine");

        let waiters = Arc::new(Mutex::new(Waiters::default()));
        let closed = Deferred::new();
        let reader_task = tokio::spawn(route_replies(
            reader,
            Arc::clone(&waiters),
            closed.clone(),
            engine_id,
        ));

        Ok(Self {
            id: AtomicUsize::new(engine_id),
            pid,
            writer: tokio::sync::Mutex::new(FrameWriter::new(Box::new(writer), options)),
            waiters,
            closed,
            codec: Arc::new(JsonCodec::new()),
            reader_task,
        })
    }

    /// Process id the server reported at handshake
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Resolves with the reason once the connection is gone
    pub fn closed(&self) -> Deferred<String> {
        self.closed.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.waiters.lock().closed.is_none()
    }

    /// Round trip with no side effects
    pub async fn ping(&self) -> Result<EngineId> {
        match self.call(EngineRequest::Ping).await? {
            ReplyPayload::Pong { engine_id } => Ok(engine_id),
            other => Err(unexpected("ping", &other)),
        }
    }

    /// Ask the server to stop after replying
    pub async fn shutdown(&self) -> Result<()> {
        self.call(EngineRequest::Shutdown).await.and_then(expect_done("shutdown"))
    }

    async fn call(&self, request: EngineRequest) -> Result<ReplyPayload> {
        let method = request.method();
        let message = RequestMessage::new(request);
        let correlation_id = message.correlation_id;

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock();
            if let Some(reason) = &waiters.closed {
                return Err(connection_lost(reason.clone()));
            }
            waiters.pending.insert(correlation_id, tx);
        }

        debug!(%correlation_id, method, "Sending request");
        let sent = self
            .writer
            .lock()
            .await
            .send(&MessageEnvelope::new(message))
            .await;
        if let Err(err) = sent {
            self.waiters.lock().pending.remove(&correlation_id);
            return Err(err.into());
        }

        match rx.await {
            Ok(outcome) => outcome.into(),
            Err(_) => Err(connection_lost("reply channel dropped")),
        }
    }
}

impl Drop for RemoteEngine {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.closed.resolve(Ok("engine handle dropped".to_string()));
    }
}

fn expect_done(method: &'static str) -> impl FnOnce(ReplyPayload) -> Result<()> {
    move |payload| match payload {
        ReplyPayload::Done => Ok(()),
        other => Err(unexpected(method, &other)),
    }
}

async fn route_replies<R>(
    mut reader: FrameReader<R>,
    waiters: Arc<Mutex<Waiters>>,
    closed: Deferred<String>,
    engine_id: EngineId,
) where
    R: AsyncRead + Unpin + Send,
{
    let reason = loop {
        match reader.receive::<EngineReply>().await {
            Ok(envelope) => match envelope.message {
                EngineReply::Response {
                    correlation_id,
                    outcome,
                } => {
                    let waiter = waiters.lock().pending.remove(&correlation_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(outcome);
                        }
                        None => warn!(%correlation_id, "Dropping reply nobody is waiting for"),
                    }
                }
                EngineReply::Ready { .. } => warn!(engine_id, "Ignoring repeated ready message"),
            },
            Err(err) => break err.to_string(),
        }
    };

    warn!(engine_id, %reason, "Connection to remote engine lost");
    let orphaned = {
        let mut waiters = waiters.lock();
        waiters.closed = Some(reason.clone());
        std::mem::take(&mut waiters.pending)
    };
    for (_, tx) in orphaned {
        let _ = tx.send(Outcome::Err(connection_lost(reason.clone())));
    }
    closed.resolve(Ok(reason));
}

#[async_trait]
impl EngineCore for RemoteEngine {
    fn id(&self) -> EngineId {
        self.id.load(Ordering::SeqCst)
    }

    async fn set_id(&self, id: EngineId) -> Result<()> {
        self.call(EngineRequest::SetId { id })
            .await
            .and_then(expect_done("set_id"))?;
        self.id.store(id, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, code: Code) -> Result<ExecuteResult> {
        let source = match code {
            Code::Source(source) => source,
            Code::Call { .. } => return Err(no_callables("execute")),
        };
        match self.call(EngineRequest::Execute { source }).await? {
            ReplyPayload::Executed(result) => Ok(result),
            other => Err(unexpected("execute", &other)),
        }
    }

    async fn push(&self, bindings: Bindings) -> Result<()> {
        let bindings = encode_bindings(self.codec.as_ref(), &bindings)?;
        self.call(EngineRequest::Push { bindings })
            .await
            .and_then(expect_done("push"))
    }

    async fn pull(&self, names: Vec<String>) -> Result<Vec<JsonValue>> {
        match self.call(EngineRequest::Pull { names }).await? {
            ReplyPayload::Values(values) => decode_values(self.codec.as_ref(), &values),
            other => Err(unexpected("pull", &other)),
        }
    }

    async fn push_function(&self, _functions: Functions) -> Result<()> {
        Err(no_callables("push_function"))
    }

    async fn pull_function(&self, _names: Vec<String>) -> Result<Vec<Callable>> {
        Err(no_callables("pull_function"))
    }

    async fn get_result(&self, index: ResultIndex) -> Result<ExecuteResult> {
        match self.call(EngineRequest::GetResult { index }).await? {
            ReplyPayload::Executed(result) => Ok(result),
            other => Err(unexpected("get_result", &other)),
        }
    }

    async fn reset(&self) -> Result<()> {
        self.call(EngineRequest::Reset)
            .await
            .and_then(expect_done("reset"))
    }

    async fn kill(&self) -> Result<()> {
        self.call(EngineRequest::Kill)
            .await
            .and_then(expect_done("kill"))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        match self.call(EngineRequest::Keys).await? {
            ReplyPayload::Keys(keys) => Ok(keys),
            other => Err(unexpected("keys", &other)),
        }
    }

    async fn get_properties(&self, names: Option<Vec<String>>) -> Result<Bindings> {
        match self.call(EngineRequest::GetProperties { names }).await? {
            ReplyPayload::Properties(properties) => {
                decode_bindings(self.codec.as_ref(), &properties)
            }
            other => Err(unexpected("get_properties", &other)),
        }
    }

    async fn set_properties(&self, properties: Bindings) -> Result<()> {
        let properties = encode_bindings(self.codec.as_ref(), &properties)?;
        self.call(EngineRequest::SetProperties { properties })
            .await
            .and_then(expect_done("set_properties"))
    }

    async fn has_properties(&self, names: Vec<String>) -> Result<Vec<bool>> {
        match self.call(EngineRequest::HasProperties { names }).await? {
            ReplyPayload::Flags(flags) => Ok(flags),
            other => Err(unexpected("has_properties", &other)),
        }
    }

    async fn del_properties(&self, names: Vec<String>) -> Result<()> {
        self.call(EngineRequest::DelProperties { names })
            .await
            .and_then(expect_done("del_properties"))
    }

    async fn clear_properties(&self) -> Result<()> {
        self.call(EngineRequest::ClearProperties)
            .await
            .and_then(expect_done("clear_properties"))
    }
}
