//! IPC transport implementations
//!
//! Messages are newline-delimited JSON envelopes. A [`StreamTransport`] owns
//! both directions of a byte stream; [`StreamTransport::into_split`] hands
//! the two halves to separate tasks so reads and writes can overlap.

use async_trait::async_trait;
use cohort_config::IpcConfig;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Framing limits shared by both halves of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    pub max_frame_bytes: usize,
    pub protocol_version_check: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&IpcConfig::default())
    }
}

impl From<&IpcConfig> for TransportOptions {
    fn from(config: &IpcConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            protocol_version_check: config.protocol_version_check,
        }
    }
}

/// Reading half of a stream transport.
///
/// Keeps one buffered reader for its whole life so bytes read past the end of
/// a frame are never lost.
pub struct FrameReader<R> {
    reader: Option<BufReader<R>>,
    options: TransportOptions,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, options: TransportOptions) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            options,
        }
    }

    pub async fn receive<T: for<'de> Deserialize<'de>>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        let max = self.options.max_frame_bytes;
        let reader = self.reader.as_mut().ok_or(IpcError::Disconnected)?;

        let mut line = String::new();
        let read = reader
            .take(max as u64 + 1)
            .read_line(&mut line)
            .await?;

        if read == 0 {
            return Err(IpcError::Disconnected);
        }
        let frame_len = line.strip_suffix('\n').map_or(line.len(), str::len);
        if frame_len > max {
            return Err(IpcError::FrameTooLarge {
                size: frame_len,
                max,
            });
        }

        // Remove newline
        line.truncate(line.trim_end().len());

        let envelope: MessageEnvelope<T> = serde_json::from_str(&line)
            .map_err(|e| IpcError::Decode(e.to_string()))?;

        if self.options.protocol_version_check && !envelope.is_compatible() {
            return Err(IpcError::VersionMismatch {
                ours: IPC_PROTOCOL_VERSION,
                theirs: envelope.protocol_version,
            });
        }

        Ok(envelope)
    }

    pub fn close(&mut self) {
        self.reader.take();
    }
}

/// Writing half of a stream transport
pub struct FrameWriter<W> {
    writer: Option<W>,
    options: TransportOptions,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, options: TransportOptions) -> Self {
        Self {
            writer: Some(writer),
            options,
        }
    }

    pub async fn send<T: Serialize>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let writer = self.writer.as_mut().ok_or(IpcError::Disconnected)?;

        let mut json = serde_json::to_string(message)
            .map_err(|e| IpcError::Encode(e.to_string()))?;
        if json.len() > self.options.max_frame_bytes {
            return Err(IpcError::FrameTooLarge {
                size: json.len(),
                max: self.options.max_frame_bytes,
            });
        }

        // Send with newline delimiter
        json.push('\n');
        writer
            .write_all(json.as_bytes())
            .await?;

        writer
            .flush()
            .await?;

        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), IpcError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .shutdown()
                .await?;
        }
        Ok(())
    }
}

/// Newline-delimited JSON transport over any byte stream pair
pub struct StreamTransport<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_options(reader, writer, TransportOptions::default())
    }

    pub fn with_options(reader: R, writer: W, options: TransportOptions) -> Self {
        Self {
            reader: FrameReader::new(reader, options),
            writer: FrameWriter::new(writer, options),
        }
    }

    pub fn into_split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }
}

/// Stdin/Stdout IPC transport for process communication
pub type StdioTransport = StreamTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioTransport {
    /// Create a transport over this process's stdin and stdout
    pub fn stdio(options: TransportOptions) -> Self {
        Self::with_options(tokio::io::stdin(), tokio::io::stdout(), options)
    }
}

#[async_trait]
impl<R, W> IpcTransport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        self.writer.send(message).await
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        self.reader.receive().await
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        self.reader.close();
        self.writer.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EngineRequest, RequestMessage};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_messages_survive_shared_buffering() {
        let (near, far) = duplex(4096);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);
        let mut sender = StreamTransport::new(near_read, near_write);
        let mut receiver = StreamTransport::new(far_read, far_write);

        // Two frames written back to back land in one read on the other side
        for request in [EngineRequest::Keys, EngineRequest::Reset] {
            sender
                .send(&MessageEnvelope::new(RequestMessage::new(request)))
                .await
                .unwrap();
        }

        let first: MessageEnvelope<RequestMessage> = receiver.receive().await.unwrap();
        let second: MessageEnvelope<RequestMessage> = receiver.receive().await.unwrap();
        assert_eq!(first.message.request, EngineRequest::Keys);
        assert_eq!(second.message.request, EngineRequest::Reset);
    }

    #[tokio::test]
    async fn test_closed_stream_reports_connection_closed() {
        let (near, far) = duplex(64);
        drop(near);
        let (read, write) = tokio::io::split(far);
        let mut transport = StreamTransport::new(read, write);

        let result: Result<MessageEnvelope<RequestMessage>, _> = transport.receive().await;
        assert!(matches!(result, Err(IpcError::Disconnected)));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let options = TransportOptions {
            max_frame_bytes: 32,
            protocol_version_check: true,
        };
        let (near, far) = duplex(4096);
        let (near_read, near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);
        let mut sender = StreamTransport::new(near_read, near_write);
        let mut receiver = StreamTransport::with_options(far_read, far_write, options);

        sender
            .send(&MessageEnvelope::new(RequestMessage::new(EngineRequest::Ping)))
            .await
            .unwrap();

        let result: Result<MessageEnvelope<RequestMessage>, _> = receiver.receive().await;
        assert!(matches!(result, Err(IpcError::FrameTooLarge { max: 32, .. })));
    }

    #[tokio::test]
    async fn test_stdio_transport_builds_inside_runtime() {
        let transport = StdioTransport::stdio(TransportOptions::default());
        let (_reader, _writer) = transport.into_split();
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (near, far) = duplex(4096);
        let (_near_read, mut near_write) = tokio::io::split(near);
        let (far_read, far_write) = tokio::io::split(far);
        let mut receiver = StreamTransport::new(far_read, far_write);

        let mut envelope = MessageEnvelope::new(RequestMessage::new(EngineRequest::Ping));
        envelope.protocol_version = 99;
        let line = format!("{}\n", serde_json::to_string(&envelope).unwrap());
        near_write.write_all(line.as_bytes()).await.unwrap();

        let result: Result<MessageEnvelope<RequestMessage>, _> = receiver.receive().await;
        assert!(matches!(
            result,
            Err(IpcError::VersionMismatch { theirs: 99, .. })
        ));
    }
}
