//! Framed message channel over a worker's standard streams.
//!
//! A [`MessageChannel`] owns two background tasks: a writer that drains an
//! unbounded queue of outgoing messages in order, and a reader that decodes
//! frames and forwards them as [`ChannelEvent`]s. Every event carries the
//! generation the channel was created for so the owner can drop events from
//! a channel it has already replaced.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Error;

use super::protocol::{CompilerMessage, read_message, write_message};

/// Something observed on the channel.
#[derive(Debug)]
pub enum ChannelEventKind {
    /// A complete frame was decoded.
    Message(CompilerMessage),
    /// A transport fault. Frames decoded before it were already delivered.
    Error(Error),
    /// No further frames can be decoded. Sent exactly once per channel.
    Disconnected,
}

/// A channel event tagged with the generation of the channel that produced it.
#[derive(Debug)]
pub struct ChannelEvent {
    pub generation: u64,
    pub kind: ChannelEventKind,
}

/// Commands sent to the writer task
enum WriterCommand {
    Write(CompilerMessage),
    Shutdown,
}

/// Typed, framed, bidirectional message stream.
pub struct MessageChannel {
    generation: u64,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl MessageChannel {
    /// Start the reader and writer tasks.
    ///
    /// Events are converted into `E` and pushed to `events`. The reader stops
    /// when the stream ends, a frame cannot be decoded, or `events` is closed.
    pub fn start<R, W, E>(
        reader: R,
        writer: W,
        generation: u64,
        events: mpsc::UnboundedSender<E>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        E: From<ChannelEvent> + Send + 'static,
    {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(Self::writer_loop(
            writer,
            writer_rx,
            generation,
            events.clone(),
        ));
        let reader_handle = tokio::spawn(Self::reader_loop(reader, generation, events));

        Self {
            generation,
            writer_tx,
            reader_handle,
            writer_handle,
        }
    }

    /// Generation this channel belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a message for sending. Never blocks.
    ///
    /// Returns false if the writer has already gone away.
    pub fn send(&self, message: CompilerMessage) -> bool {
        self.writer_tx.send(WriterCommand::Write(message)).is_ok()
    }

    /// Stop the channel.
    ///
    /// Messages queued before this call are still written, then the write
    /// side is closed. The reader is cancelled without emitting further events.
    pub fn stop(self) {
        let _ = self.writer_tx.send(WriterCommand::Shutdown);
        self.reader_handle.abort();
        drop(self.writer_handle);
    }

    async fn writer_loop<W, E>(
        mut writer: W,
        mut rx: mpsc::UnboundedReceiver<WriterCommand>,
        generation: u64,
        events: mpsc::UnboundedSender<E>,
    ) where
        W: AsyncWrite + Unpin,
        E: From<ChannelEvent>,
    {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WriterCommand::Write(message) => {
                    tracing::debug!(
                        "-> worker gen {}: {:?} #{}",
                        generation,
                        message.kind(),
                        message.id
                    );
                    if let Err(e) = write_message(&mut writer, &message).await {
                        let _ = events.send(E::from(ChannelEvent {
                            generation,
                            kind: ChannelEventKind::Error(e),
                        }));
                        break;
                    }
                }
                WriterCommand::Shutdown => break,
            }
        }

        let _ = writer.shutdown().await;
    }

    async fn reader_loop<R, E>(mut reader: R, generation: u64, events: mpsc::UnboundedSender<E>)
    where
        R: AsyncRead + Unpin,
        E: From<ChannelEvent>,
    {
        loop {
            let kind = match read_message(&mut reader).await {
                Ok(Some(message)) => {
                    tracing::debug!(
                        "<- worker gen {}: {:?} #{}",
                        generation,
                        message.kind(),
                        message.id
                    );
                    ChannelEventKind::Message(message)
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = events.send(E::from(ChannelEvent {
                        generation,
                        kind: ChannelEventKind::Error(e),
                    }));
                    break;
                }
            };

            if events.send(E::from(ChannelEvent { generation, kind })).is_err() {
                return;
            }
        }

        let _ = events.send(E::from(ChannelEvent {
            generation,
            kind: ChannelEventKind::Disconnected,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{MessageBody, write_null};
    use tokio::io::AsyncWriteExt;

    async fn collect(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Vec<ChannelEventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.generation, 9);
            let done = matches!(event.kind, ChannelEventKind::Disconnected);
            kinds.push(event.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[tokio::test]
    async fn test_messages_in_order_then_disconnect_once() {
        let (host_side, mut worker_side) = tokio::io::duplex(4096);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let channel = MessageChannel::start(host_read, host_write, 9, tx);

        for id in 1..=3 {
            let msg = CompilerMessage {
                id,
                body: MessageBody::Error(format!("e{}", id)),
            };
            write_message(&mut worker_side, &msg).await.unwrap();
        }
        drop(worker_side);

        let kinds = collect(&mut rx).await;
        assert_eq!(kinds.len(), 4);
        for (i, kind) in kinds.iter().take(3).enumerate() {
            match kind {
                ChannelEventKind::Message(m) => assert_eq!(m.id, i as u64 + 1),
                other => panic!("Expected message, got {:?}", other),
            }
        }
        assert!(matches!(kinds[3], ChannelEventKind::Disconnected));
        assert_eq!(channel.generation(), 9);
    }

    #[tokio::test]
    async fn test_corrupt_frame_reports_error_after_buffered_frames() {
        let (host_side, mut worker_side) = tokio::io::duplex(4096);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let _channel = MessageChannel::start(host_read, host_write, 9, tx);

        write_message(&mut worker_side, &CompilerMessage::ready()).await.unwrap();
        worker_side.write_all(&6u32.to_le_bytes()).await.unwrap();
        worker_side.write_all(b"{bad!}").await.unwrap();

        let kinds = collect(&mut rx).await;
        assert!(matches!(kinds[0], ChannelEventKind::Message(_)));
        assert!(matches!(kinds[1], ChannelEventKind::Error(_)));
        assert!(matches!(kinds[2], ChannelEventKind::Disconnected));
        assert_eq!(kinds.len(), 3);
    }

    #[tokio::test]
    async fn test_null_sentinel_disconnects() {
        let (host_side, mut worker_side) = tokio::io::duplex(4096);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let _channel = MessageChannel::start(host_read, host_write, 9, tx);

        write_null(&mut worker_side).await.unwrap();

        let kinds = collect(&mut rx).await;
        assert_eq!(kinds.len(), 1);
        assert!(matches!(kinds[0], ChannelEventKind::Disconnected));
    }

    #[tokio::test]
    async fn test_send_preserves_order_and_stop_flushes() {
        let (host_side, worker_side) = tokio::io::duplex(4096);
        let (host_read, host_write) = tokio::io::split(host_side);
        let (mut worker_read, _worker_write) = tokio::io::split(worker_side);
        let (tx, _rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let channel = MessageChannel::start(host_read, host_write, 9, tx);

        assert!(channel.send(CompilerMessage::ready()));
        assert!(channel.send(CompilerMessage::exit()));
        channel.stop();

        let first = read_message(&mut worker_read).await.unwrap().unwrap();
        let second = read_message(&mut worker_read).await.unwrap().unwrap();
        assert_eq!(first.body, MessageBody::Ready);
        assert_eq!(second.body, MessageBody::Exit);
    }
}
