use crate::producer::ProducerHandle;
use dataflow_log::ActorId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A lookup from [`ActorId`] to that actor's [`ProducerHandle`], used
/// in place of an external actor-placement/RPC layer -- a narrow
/// in-process stand-in that lets a recovering consumer reach
/// `ask_upstream_for_help` on its parents, and a consumer reach
/// `truncate_logged_outputs` on them after a checkpoint.
///
/// Registration happens once per actor incarnation: a restarted actor
/// re-registers under the same [`ActorId`], replacing the stale handle
/// from its pre-crash incarnation.
#[derive(Clone, Default)]
pub struct ActorRegistry {
    producers: Arc<Mutex<HashMap<ActorId, ProducerHandle>>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ActorId, handle: ProducerHandle) {
        self.producers.lock().unwrap().insert(id, handle);
    }

    pub fn get(&self, id: ActorId) -> Option<ProducerHandle> {
        self.producers.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: ActorId) {
        self.producers.lock().unwrap().remove(&id);
    }
}
