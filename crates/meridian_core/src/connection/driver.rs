//! Per-link task: handshake, then frame pumping until the link ends.

use super::handle::{ConnectionHandle, LinkCommand};
use super::handshake::{
    is_close_notification, CloseReason, ControlMessage, Handshake, HandshakeSide,
};
use super::transport::{FrameSink, FrameSource};
use crate::error::{CoreError, Result};
use crate::host::HostSender;
use crate::types::{PeerId, Role};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Parameters for one link.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub local_id: PeerId,
    pub role: Role,
    pub side: HandshakeSide,
    pub handshake_timeout: Duration,
}

impl LinkOptions {
    pub fn initiator(local_id: PeerId, role: Role, handshake_timeout: Duration) -> Self {
        Self {
            local_id,
            role,
            side: HandshakeSide::Initiator,
            handshake_timeout,
        }
    }

    pub fn acceptor(local_id: PeerId, role: Role, handshake_timeout: Duration) -> Self {
        Self {
            local_id,
            role,
            side: HandshakeSide::Acceptor,
            handshake_timeout,
        }
    }
}

/// Drives one link from handshake to close.
///
/// The handshake must finish within `options.handshake_timeout`. Once open,
/// the link is announced to the host, inbound frames are forwarded to the
/// host's queue and frames queued on the [`ConnectionHandle`] are written to
/// the transport in order. The host is told when the link ends.
///
/// # Returns
///
/// The reason the link ended.
pub async fn drive_connection<K, S>(
    mut sink: K,
    mut source: S,
    options: LinkOptions,
    host: HostSender,
) -> CloseReason
where
    K: FrameSink,
    S: FrameSource,
{
    let mut handshake = Handshake::new(options.side, options.local_id, options.role);
    debug!("🤝 Starting {:?} handshake as {}", options.side, options.role);

    let handshake_result = tokio::time::timeout(
        options.handshake_timeout,
        run_handshake(&mut handshake, &mut sink, &mut source),
    )
    .await;

    let remote_id = match handshake_result {
        Ok(Ok(remote_id)) => remote_id,
        Ok(Err(e)) => {
            warn!("❌ Handshake failed: {}", e);
            let _ = sink.close().await;
            return CloseReason::HandshakeFailed;
        }
        Err(_) => {
            handshake.expire();
            warn!(
                "⏰ Handshake did not complete within {:?}",
                options.handshake_timeout
            );
            let _ = sink.close().await;
            return CloseReason::HandshakeTimeout;
        }
    };

    let (tx, mut commands) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::remote(remote_id, options.role, tx);
    let link = handle.link_id();
    if host.link_opened(handle).is_err() {
        let _ = sink.close().await;
        return CloseReason::HostStopped;
    }
    info!("🔗 Link to {} open as {} ({})", remote_id, options.role, link);

    let reason = loop {
        tokio::select! {
            incoming = source.next_frame() => match incoming {
                Some(Ok(frame)) => {
                    if is_close_notification(&frame) {
                        break CloseReason::ClosedByPeer;
                    }
                    trace!("📨 {} bytes from {}", frame.len(), remote_id);
                    if host.deliver_frame(link, remote_id, frame).is_err() {
                        break CloseReason::HostStopped;
                    }
                }
                Some(Err(e)) => {
                    warn!("⚠️ Transport error on link to {}: {}", remote_id, e);
                    break CloseReason::TransportLost;
                }
                None => break CloseReason::TransportLost,
            },
            command = commands.recv() => match command {
                Some(LinkCommand::Frame(frame)) => {
                    if let Err(e) = sink.send_frame(frame).await {
                        warn!("⚠️ Failed to write to {}: {}", remote_id, e);
                        break CloseReason::TransportLost;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    if let Ok(notice) = ControlMessage::Closed.encode() {
                        let _ = sink.send_frame(notice).await;
                    }
                    break CloseReason::ClosedLocally;
                }
            },
        }
    };

    let _ = sink.close().await;
    let _ = host.link_closed(link, remote_id, reason);
    debug!("🔌 Link to {} ended: {:?}", remote_id, reason);
    reason
}

async fn run_handshake<K, S>(
    handshake: &mut Handshake,
    sink: &mut K,
    source: &mut S,
) -> Result<PeerId>
where
    K: FrameSink,
    S: FrameSource,
{
    if let Some(syn) = handshake.begin() {
        sink.send_frame(syn.encode()?).await?;
    }

    loop {
        let frame = match source.next_frame().await {
            Some(frame) => frame?,
            None => {
                return Err(CoreError::HandshakeFailed(
                    "transport closed during handshake".to_string(),
                ))
            }
        };

        let outcome = handshake.receive(&frame)?;
        if let Some(reply) = outcome.reply {
            sink.send_frame(reply.encode()?).await?;
        }
        if outcome.opened {
            return handshake.remote_id().ok_or_else(|| {
                CoreError::HandshakeFailed("link opened without a remote id".to_string())
            });
        }
    }
}
