use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::executor::ResourceReleaser;
use super::identity::EffectiveIdentity;
use crate::error::GatewayResult;

/// Backend handles (filesystem clients, metastore connections) cached per effective identity.
/// A handle opened under one identity is never visible to another, and releasing an identity
/// drops every handle it opened.
pub struct HandleCache<H> {
    name: &'static str,
    handles: Mutex<HashMap<Uuid, HashMap<String, Arc<H>>>>,
}

impl<H> HandleCache<H> {
    pub fn new(name: &'static str) -> Self { Self { name, handles: Mutex::new(HashMap::new()) } }

    pub fn get_or_connect<F>(&self, identity: &EffectiveIdentity, key: &str, connect: F) -> GatewayResult<Arc<H>>
    where
        F: FnOnce(&EffectiveIdentity) -> GatewayResult<H>,
    {
        if let Some(h) = self.handles.lock().get(&identity.id()).and_then(|m| m.get(key)) {
            return Ok(h.clone());
        }
        // connect outside the lock; a racing connect for the same key keeps the first handle
        let handle = Arc::new(connect(identity)?);
        let mut map = self.handles.lock();
        let entry = map.entry(identity.id()).or_default().entry(key.to_string()).or_insert(handle);
        Ok(entry.clone())
    }

    pub fn len_for(&self, identity: &EffectiveIdentity) -> usize {
        self.handles.lock().get(&identity.id()).map(|m| m.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize { self.handles.lock().values().map(|m| m.len()).sum() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Drop every handle opened under `identity`; returns how many were closed.
    /// Unknown identities are a no-op.
    pub fn release_identity(&self, identity: &EffectiveIdentity) -> usize {
        let removed = self.handles.lock().remove(&identity.id());
        removed.map(|m| m.len()).unwrap_or(0)
    }
}

impl<H: Send + Sync> ResourceReleaser for HandleCache<H> {
    fn release(&self, identity: &EffectiveIdentity) -> GatewayResult<()> {
        let closed = self.release_identity(identity);
        if closed > 0 {
            debug!(
                target: "dlagent::doas",
                "closed {} {} handle(s) for user '{}'",
                closed, self.name, identity.user_name()
            );
        }
        Ok(())
    }
}
