//! Real-time transport: subscriber groups over a broadcast hub.

use crate::context::Principal;
use crate::plugin::Plugin;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

pub const GLOBAL_GROUP: &str = "$global";

pub fn user_group(user_id: &str) -> String {
    format!("$user-{}", user_id)
}

/// One message addressed to a group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    pub group: String,
    pub event: String,
    pub payload: Value,
}

/// Emits to groups. The default transport is an in-process [`BroadcastHub`].
pub trait RealtimeTransport: Send + Sync {
    fn emit(&self, envelope: Envelope);
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

pub struct BroadcastHub {
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        BroadcastHub { tx }
    }
}

impl RealtimeTransport for BroadcastHub {
    fn emit(&self, envelope: Envelope) {
        // No receivers is not an error: nobody is listening yet.
        let _ = self.tx.send(envelope);
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

/// A connected listener: receives envelopes for the groups it joined.
pub struct Subscription {
    groups: HashSet<String>,
    rx: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub fn groups(&self) -> &HashSet<String> {
        &self.groups
    }

    /// Next envelope for one of this subscription's groups. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(env) if self.groups.contains(&env.group) => return Some(env),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "realtime subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Subscription::recv).
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(env) if self.groups.contains(&env.group) => return Some(env),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// The `io` plugin's methods, reachable from other plugins by name.
pub struct RealtimeHandle {
    transport: Arc<dyn RealtimeTransport>,
    known_groups: RwLock<BTreeSet<String>>,
    group_field: String,
}

impl RealtimeHandle {
    pub fn new(transport: Arc<dyn RealtimeTransport>, group_field: impl Into<String>) -> Self {
        let mut known = BTreeSet::new();
        known.insert(GLOBAL_GROUP.to_string());
        RealtimeHandle {
            transport,
            known_groups: RwLock::new(known),
            group_field: group_field.into(),
        }
    }

    /// Every delivery group a subscriber has joined so far, `$global` included.
    pub fn user_groups(&self) -> Vec<String> {
        self.known_groups
            .read()
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_else(|_| vec![GLOBAL_GROUP.to_string()])
    }

    /// Join `$global`, the caller's private group and its delivery group.
    pub fn connect(&self, principal: Option<&Principal>) -> Subscription {
        let mut groups = HashSet::new();
        groups.insert(GLOBAL_GROUP.to_string());
        if let Some(p) = principal {
            groups.insert(user_group(&p.id));
            for g in self.delivery_groups(p) {
                if let Ok(mut known) = self.known_groups.write() {
                    known.insert(g.clone());
                }
                groups.insert(g);
            }
        }
        Subscription {
            groups,
            rx: self.transport.subscribe(),
        }
    }

    fn delivery_groups(&self, p: &Principal) -> Vec<String> {
        let value = if self.group_field == "level" {
            p.level.clone().map(Value::String)
        } else {
            p.claims.get(&self.group_field).cloned()
        };
        match value {
            Some(Value::String(s)) => vec![s],
            Some(Value::Array(items)) => items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        }
    }

    pub fn emit(&self, group: &str, event: &str, payload: Value) {
        self.transport.emit(Envelope {
            group: group.to_string(),
            event: event.to_string(),
            payload,
        });
    }

    /// Emit to one user's private group.
    pub fn notify(&self, user_id: &str, event: &str, payload: Value) {
        self.emit(&user_group(user_id), event, payload);
    }
}

pub struct IoPlugin {
    handle: Arc<RealtimeHandle>,
}

impl IoPlugin {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self::with_group_field(transport, "level")
    }

    /// `group_field` names the principal attribute holding its delivery group(s).
    pub fn with_group_field(transport: Arc<dyn RealtimeTransport>, group_field: &str) -> Self {
        IoPlugin {
            handle: Arc::new(RealtimeHandle::new(transport, group_field)),
        }
    }

    pub fn handle(&self) -> Arc<RealtimeHandle> {
        self.handle.clone()
    }
}

impl Default for IoPlugin {
    fn default() -> Self {
        Self::new(Arc::new(BroadcastHub::new(256)))
    }
}

#[async_trait]
impl Plugin for IoPlugin {
    fn name(&self) -> &'static str {
        "io"
    }

    fn default_config(&self) -> Value {
        json!({ "groupField": self.handle.group_field })
    }

    fn methods(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(self.handle.clone())
    }
}
