//! WebSocket implementation of the core transport seam.
//!
//! A text message carries exactly one frame. Binary messages are treated as
//! chunks of a streamed batch: they are reassembled with a
//! [`FrameSplitter`] and each `EOT`-terminated frame is yielded on its own.
//! Binary chunks must hold whole UTF-8 sequences.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use meridian_core::codec::FrameSplitter;
use meridian_core::{CoreError, FrameSink, FrameSource, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

/// Write half of a WebSocket link.
pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
    closed: bool,
}

/// Read half of a WebSocket link.
pub struct WsSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
    splitter: FrameSplitter,
    pending: VecDeque<String>,
}

/// Splits an upgraded socket into transport halves for
/// [`drive_connection`](meridian_core::drive_connection).
pub fn split_socket<S>(socket: WebSocketStream<S>) -> (WsSink<S>, WsSource<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = socket.split();
    (
        WsSink {
            inner: sink,
            closed: false,
        },
        WsSource {
            inner: stream,
            splitter: FrameSplitter::new(),
            pending: VecDeque::new(),
        },
    )
}

#[async_trait::async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_frame(&mut self, frame: String) -> Result<()> {
        if self.closed {
            return Err(CoreError::Transport("websocket already closed".to_string()));
        }
        self.inner
            .send(Message::text(frame))
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(CoreError::Transport(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl<S> FrameSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }

            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(chunk)) => match std::str::from_utf8(&chunk) {
                    Ok(chunk) => {
                        let frames = self.splitter.push(chunk);
                        trace!(
                            "📦 Batch chunk yielded {} frames ({} bytes pending)",
                            frames.len(),
                            self.splitter.pending()
                        );
                        self.pending.extend(frames);
                    }
                    Err(e) => {
                        return Some(Err(CoreError::MalformedFrame(format!(
                            "batch chunk is not UTF-8: {e}"
                        ))))
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(CoreError::Transport(e.to_string()))),
            }
        }
    }
}
