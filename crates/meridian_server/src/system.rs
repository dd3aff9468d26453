//! Built-in `System` service: link liveness checks.
//!
//! Either side of a link can send `System.Ping <nonce>`; the other side
//! answers `System.Pong <nonce>` and the originator publishes a
//! [`PongReceivedEvent`] with the measured round trip.

use dashmap::DashMap;
use meridian_core::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

pub const SYSTEM_SERVICE: &str = "System";
pub const PING: RpcTarget = RpcTarget::new(SYSTEM_SERVICE, "Ping");

/// Published when a peer answers one of our pings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongReceivedEvent {
    pub peer_id: PeerId,
    pub nonce: u64,
    /// `None` when the nonce was not one we sent, or its peer has since left.
    pub round_trip_ms: Option<u64>,
}

/// Answers pings and tracks the ones it sent.
#[derive(Debug, Default)]
pub struct SystemService {
    next_nonce: AtomicU64,
    outstanding: DashMap<u64, (PeerId, u64)>,
}

impl SystemService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends a ping to `peer`.
    ///
    /// # Returns
    ///
    /// The nonce the matching [`PongReceivedEvent`] will carry.
    pub fn ping(&self, ctx: &HostContext<'_>, peer: PeerId) -> Result<u64> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed) + 1;
        self.outstanding
            .insert(nonce, (peer, current_timestamp_millis()));
        if let Err(e) = ctx.call_peer(peer, &PING, args![nonce]) {
            self.outstanding.remove(&nonce);
            return Err(e);
        }
        trace!("🏓 Ping {} sent to {}", nonce, peer);
        Ok(nonce)
    }

    /// Pings that have not been answered yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    fn on_ping(&self, rpc: &Rpc<'_>) -> Result<()> {
        let nonce: u64 = rpc.message().arg(0)?;
        debug!("🏓 Ping {} from {}", nonce, rpc.sender_id());
        rpc.reply("Pong", args![nonce])
    }

    fn on_pong(&self, rpc: &Rpc<'_>) -> Result<()> {
        let nonce: u64 = rpc.message().arg(0)?;
        let round_trip_ms = self
            .outstanding
            .remove(&nonce)
            .map(|(_, (_, sent_at))| current_timestamp_millis().saturating_sub(sent_at));

        rpc.ctx().publish(&PongReceivedEvent {
            peer_id: rpc.sender_id(),
            nonce,
            round_trip_ms,
        })?;
        Ok(())
    }
}

impl Service for SystemService {
    fn name(&self) -> &str {
        SYSTEM_SERVICE
    }

    fn register(registrar: &mut Registrar<'_, Self>) -> Result<()> {
        registrar.rpc("Ping", Self::on_ping)?;
        registrar.rpc("Pong", Self::on_pong)?;
        Ok(())
    }

    fn on_disconnected(&self, _ctx: &HostContext<'_>, peer: PeerId, _reason: CloseReason) -> Result<()> {
        self.outstanding.retain(|_, (target, _)| *target != peer);
        Ok(())
    }
}
