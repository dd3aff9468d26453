//! # Sync Contexts
//!
//! Coarse replication of named JSON documents. A producer replaces a whole
//! context with [`SyncService::set_data`]; each changed top-level key is
//! pushed whole to the connections subscribed to it. By default only
//! object-valued keys replicate; scalars and arrays stay local unless the host
//! enables `replicate_non_objects`.
//!
//! Updates travel as `SyncService.Update(context, key, json)`. A key that is
//! removed, or that stops being eligible, is sent as `null`.


use crate::config::HostConfig;
use crate::connection::{CloseReason, ConnectionHandle};
use crate::error::{CoreError, Result};
use crate::events::SyncUpdatedEvent;
use crate::message::RpcTarget;
use crate::service::{call, HostContext, Registrar, Rpc, Service};
use crate::types::PeerId;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace, warn};

pub const SYNC_SERVICE: &str = "SyncService";
pub const SYNC_UPDATE: RpcTarget = RpcTarget::new(SYNC_SERVICE, "Update");

#[derive(Debug, Default)]
struct SyncContext {
    data: Map<String, Value>,
    default_keys: BTreeSet<String>,
    subscriptions: HashMap<PeerId, BTreeSet<String>>,
}

/// Sync context producer (authoritative side) and mirror (subordinate side).
pub struct SyncService {
    replicate_non_objects: bool,
    contexts: DashMap<String, SyncContext>,
    peers: DashMap<PeerId, ConnectionHandle>,
    mirror: DashMap<(String, String), Value>,
}

impl SyncService {
    pub fn new() -> Self {
        Self::with_options(false)
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::with_options(config.replicate_non_objects)
    }

    pub fn with_options(replicate_non_objects: bool) -> Self {
        Self {
            replicate_non_objects,
            contexts: DashMap::new(),
            peers: DashMap::new(),
            mirror: DashMap::new(),
        }
    }

    fn replicates(&self, value: &Value) -> bool {
        value.is_object() || self.replicate_non_objects
    }

    /// Replaces the data of `context` with `value`, which must be a JSON
    /// object, and pushes every changed eligible key to its subscribers.
    ///
    /// # Returns
    ///
    /// Number of updates queued.
    pub fn set_data(&self, context: &str, value: Value) -> Result<usize> {
        let Value::Object(data) = value else {
            return Err(CoreError::InvalidData(format!(
                "sync context '{}' must be a JSON object",
                context
            )));
        };

        let mut entry = self.contexts.entry(context.to_string()).or_default();
        let mut changed: Vec<(String, Value)> = data
            .iter()
            .filter(|(key, value)| entry.data.get(key.as_str()) != Some(*value))
            .filter(|(_, value)| self.replicates(value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        // Keys that stop replicating, by removal or by losing eligibility.
        changed.extend(
            entry
                .data
                .iter()
                .filter(|(_, old)| self.replicates(old))
                .filter(|(key, _)| !data.get(key.as_str()).is_some_and(|new| self.replicates(new)))
                .map(|(key, _)| (key.clone(), Value::Null)),
        );
        entry.data = data;

        let mut queued = 0;
        for (key, value) in &changed {
            for (peer, keys) in &entry.subscriptions {
                if !keys.contains(key) {
                    continue;
                }
                if let Some(link) = self.peers.get(peer) {
                    if push(&link, context, key, value) {
                        queued += 1;
                    }
                }
            }
        }
        trace!(
            "🔄 Context '{}' updated: {} keys changed, {} pushes",
            context,
            changed.len(),
            queued
        );
        Ok(queued)
    }

    /// Current authoritative data of a context.
    pub fn data(&self, context: &str) -> Option<Value> {
        self.contexts
            .get(context)
            .map(|entry| Value::Object(entry.data.clone()))
    }

    /// Marks keys every new connection is subscribed to on connect.
    pub fn default_subs<I, K>(&self, context: &str, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut entry = self.contexts.entry(context.to_string()).or_default();
        entry.default_keys.extend(keys.into_iter().map(Into::into));
    }

    /// Subscribes one connected peer to a key and pushes its current value
    /// if it is eligible.
    ///
    /// # Returns
    ///
    /// `false` if the peer is not connected or was already subscribed.
    pub fn subscribe_to(&self, peer: PeerId, context: &str, key: &str) -> bool {
        let Some(link) = self.peers.get(&peer) else {
            warn!("⚠️ Cannot subscribe unknown peer {} to {}/{}", peer, context, key);
            return false;
        };
        let mut entry = self.contexts.entry(context.to_string()).or_default();
        let added = entry
            .subscriptions
            .entry(peer)
            .or_default()
            .insert(key.to_string());
        if added {
            if let Some(value) = entry.data.get(key).filter(|v| self.replicates(v)) {
                push(&link, context, key, value);
            }
        }
        added
    }

    /// Keys `peer` is subscribed to in `context`.
    pub fn subscriptions(&self, peer: PeerId, context: &str) -> Vec<String> {
        self.contexts
            .get(context)
            .and_then(|entry| entry.subscriptions.get(&peer).map(|keys| keys.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Last value received for `context`/`key` on the subordinate side.
    pub fn value(&self, context: &str, key: &str) -> Option<Value> {
        self.mirror
            .get(&(context.to_string(), key.to_string()))
            .map(|value| value.clone())
    }

    fn on_update(&self, rpc: &Rpc<'_>) -> Result<()> {
        if rpc.link().is_authoritative() {
            warn!("⚠️ Ignoring sync update from subordinate {}", rpc.sender_id());
            return Ok(());
        }
        let message = rpc.message();
        let context = message.arg_str(0)?.to_string();
        let key = message.arg_str(1)?.to_string();
        let value: Value = message.arg_json(2)?;

        let mirrored = match value {
            Value::Null => {
                self.mirror.remove(&(context.clone(), key.clone()));
                None
            }
            value => {
                self.mirror.insert((context.clone(), key.clone()), value.clone());
                Some(value)
            }
        };
        rpc.ctx().publish(&SyncUpdatedEvent {
            context,
            key,
            value: mirrored,
        })?;
        Ok(())
    }
}

impl Default for SyncService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for SyncService {
    fn name(&self) -> &str {
        SYNC_SERVICE
    }

    fn register(registrar: &mut Registrar<'_, Self>) -> Result<()> {
        registrar.rpc("Update", Self::on_update)
    }

    fn on_connected(&self, _ctx: &HostContext<'_>, link: &ConnectionHandle) -> Result<()> {
        if !link.is_authoritative() {
            return Ok(());
        }
        let peer = link.remote_id();
        self.peers.insert(peer, link.clone());

        let mut pushed = 0;
        for mut entry in self.contexts.iter_mut() {
            if entry.default_keys.is_empty() {
                continue;
            }
            let keys = entry.default_keys.clone();
            for key in &keys {
                if let Some(value) = entry.data.get(key).filter(|v| self.replicates(v)) {
                    if push(link, entry.key(), key, value) {
                        pushed += 1;
                    }
                }
            }
            entry.subscriptions.insert(peer, keys);
        }
        debug!("📡 Pushed {} default sync keys to {}", pushed, peer);
        Ok(())
    }

    fn on_disconnected(&self, _ctx: &HostContext<'_>, peer: PeerId, _reason: CloseReason) -> Result<()> {
        if self.peers.remove(&peer).is_some() {
            for mut entry in self.contexts.iter_mut() {
                entry.subscriptions.remove(&peer);
            }
        } else {
            self.mirror.clear();
        }
        Ok(())
    }
}

fn push(link: &ConnectionHandle, context: &str, key: &str, value: &Value) -> bool {
    match call(link, &SYNC_UPDATE, crate::args![context, key, value]) {
        Ok(()) => true,
        Err(e) => {
            debug!("Dropped sync update {}/{} to {}: {}", context, key, link.remote_id(), e);
            false
        }
    }
}
