//! Engine server: exposes one engine over a transport
//!
//! The server announces itself with a `ready` message, then answers requests
//! one at a time until the peer disconnects or asks it to shut down.

use cohort_core::{Code, Codec, JsonCodec};
use cohort_engine::EngineCore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::IpcError;
use crate::protocol::{
    decode_bindings, encode_bindings, encode_values, EngineReply, EngineRequest, MessageEnvelope,
    Outcome, ReplyPayload, RequestMessage,
};
use crate::transport::{IpcTransport, StdioTransport, TransportOptions};

/// Serve an engine over this process's stdin and stdout
pub async fn serve_stdio(
    engine: Arc<dyn EngineCore>,
    options: TransportOptions,
) -> Result<(), IpcError> {
    info!(engine_id = engine.id(), "Starting engine server on stdio");
    let mut transport = StdioTransport::stdio(options);
    EngineServer::new(engine).serve(&mut transport).await?;
    info!("Engine server shutting down");
    Ok(())
}

pub struct EngineServer {
    engine: Arc<dyn EngineCore>,
    codec: Arc<dyn Codec>,
}

impl EngineServer {
    pub fn new(engine: Arc<dyn EngineCore>) -> Self {
        Self::with_codec(engine, Arc::new(JsonCodec::new()))
    }

    pub fn with_codec(engine: Arc<dyn EngineCore>, codec: Arc<dyn Codec>) -> Self {
        Self { engine, codec }
    }

    pub fn engine(&self) -> &Arc<dyn EngineCore> {
        &self.engine
    }

    /// Main server loop.
    ///
    /// Returns `Ok` when the peer closes the connection or sends `shutdown`.
    pub async fn serve<T: IpcTransport>(&self, transport: &mut T) -> Result<(), IpcError> {
        let ready = EngineReply::Ready {
            engine_id: self.engine.id(),
            pid: std::process::id(),
        };
        transport.send(&MessageEnvelope::new(ready)).await?;

        loop {
            let envelope = match transport.receive::<RequestMessage>().await {
                Ok(envelope) => envelope,
                Err(IpcError::Disconnected) => {
                    info!(engine_id = self.engine.id(), "Controller disconnected");
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    // No correlation id to answer with
                    warn!(error = %e, "Skipping malformed request");
                    continue;
                }
                Err(e) => {
                    error!("Failed to receive message: {}", e);
                    return Err(e);
                }
            };

            let RequestMessage {
                correlation_id,
                request,
            } = envelope.message;
            let stop = matches!(request, EngineRequest::Shutdown);
            debug!(%correlation_id, method = request.method(), "Handling request");

            let outcome = Outcome::from(self.handle(request).await);
            let reply = EngineReply::Response {
                correlation_id,
                outcome,
            };
            if let Err(e) = transport.send(&MessageEnvelope::new(reply)).await {
                error!("Failed to send response: {}", e);
                return Err(e);
            }

            if stop {
                info!(engine_id = self.engine.id(), "Shutdown requested");
                transport.close().await?;
                return Ok(());
            }
        }
    }

    async fn handle(&self, request: EngineRequest) -> cohort_core::Result<ReplyPayload> {
        let engine = &self.engine;
        let codec = self.codec.as_ref();

        match request {
            EngineRequest::SetId { id } => engine.set_id(id).await.map(|_| ReplyPayload::Done),
            EngineRequest::Execute { source } => engine
                .execute(Code::Source(source))
                .await
                .map(ReplyPayload::Executed),
            EngineRequest::Push { bindings } => {
                engine.push(decode_bindings(codec, &bindings)?).await?;
                Ok(ReplyPayload::Done)
            }
            EngineRequest::Pull { names } => {
                let values = engine.pull(names).await?;
                Ok(ReplyPayload::Values(encode_values(codec, &values)?))
            }
            EngineRequest::GetResult { index } => {
                engine.get_result(index).await.map(ReplyPayload::Executed)
            }
            EngineRequest::Reset => engine.reset().await.map(|_| ReplyPayload::Done),
            EngineRequest::Kill => engine.kill().await.map(|_| ReplyPayload::Done),
            EngineRequest::Keys => engine.keys().await.map(ReplyPayload::Keys),
            EngineRequest::GetProperties { names } => {
                let properties = engine.get_properties(names).await?;
                Ok(ReplyPayload::Properties(encode_bindings(codec, &properties)?))
            }
            EngineRequest::SetProperties { properties } => {
                engine
                    .set_properties(decode_bindings(codec, &properties)?)
                    .await?;
                Ok(ReplyPayload::Done)
            }
            EngineRequest::HasProperties { names } => {
                engine.has_properties(names).await.map(ReplyPayload::Flags)
            }
            EngineRequest::DelProperties { names } => {
                engine.del_properties(names).await.map(|_| ReplyPayload::Done)
            }
            EngineRequest::ClearProperties => {
                engine.clear_properties().await.map(|_| ReplyPayload::Done)
            }
            EngineRequest::Ping => Ok(ReplyPayload::Pong {
                engine_id: engine.id(),
            }),
            EngineRequest::Shutdown => Ok(ReplyPayload::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use cohort_core::EngineError;
    use cohort_engine::LocalEngine;
    use tokio::io::duplex;

    async fn call(
        client: &mut StreamTransport<
            tokio::io::ReadHalf<tokio::io::DuplexStream>,
            tokio::io::WriteHalf<tokio::io::DuplexStream>,
        >,
        request: EngineRequest,
    ) -> Outcome {
        let message = RequestMessage::new(request);
        let id = message.correlation_id;
        client.send(&MessageEnvelope::new(message)).await.unwrap();
        match client.receive::<EngineReply>().await.unwrap().message {
            EngineReply::Response {
                correlation_id,
                outcome,
            } => {
                assert_eq!(correlation_id, id);
                outcome
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let (near, far) = duplex(64 * 1024);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);
        let mut client = StreamTransport::new(near_read, near_write);
        let mut server_side = StreamTransport::new(far_read, far_write);

        let server = EngineServer::new(Arc::new(LocalEngine::new(4)));
        let handle = tokio::spawn(async move { server.serve(&mut server_side).await });

        let ready: MessageEnvelope<EngineReply> = client.receive().await.unwrap();
        assert!(matches!(ready.message, EngineReply::Ready { engine_id: 4, .. }));

        let outcome = call(
            &mut client,
            EngineRequest::Execute {
                source: "x = 6 * 7".into(),
            },
        )
        .await;
        assert!(matches!(outcome, Outcome::Ok(ReplyPayload::Executed(_))));

        let request = EngineRequest::Pull {
            names: vec!["missing".into()],
        };
        let outcome = call(&mut client, request).await;
        assert_eq!(outcome, Outcome::Err(EngineError::name_error("missing")));

        let outcome = call(&mut client, EngineRequest::Ping).await;
        assert_eq!(outcome, Outcome::Ok(ReplyPayload::Pong { engine_id: 4 }));

        let outcome = call(&mut client, EngineRequest::Shutdown).await;
        assert_eq!(outcome, Outcome::Ok(ReplyPayload::Done));
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_ends_serving() {
        let (near, far) = duplex(4096);
        let (far_read, far_write) = tokio::io::split(far);
        let mut server_side = StreamTransport::new(far_read, far_write);
        let server = EngineServer::new(Arc::new(LocalEngine::new(0)));
        let handle = tokio::spawn(async move { server.serve(&mut server_side).await });

        drop(near);
        // Ready may fail to send if the peer is already gone; either way serving ends
        let _ = handle.await.unwrap();
    }
}
