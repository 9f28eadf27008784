use std::collections::{HashMap, HashSet};

/// Per-downstream-target set of channels believed alive, mutated only by
/// the owning actor in response to `node-done` events it polls itself.
#[derive(Debug, Default, Clone)]
pub struct AlivenessSet {
    alive: HashMap<u32, HashSet<u32>>,
}

impl AlivenessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly-learned target's channels (`append_to_targets`).
    pub fn register_target(&mut self, node: u32, channels: impl IntoIterator<Item = u32>) {
        self.alive.entry(node).or_default().extend(channels);
    }

    /// Record that `node`'s `channel` has announced `done`. Returns
    /// `true` if the whole target node has no more alive channels and
    /// was therefore removed (the caller should also drop it from
    /// `TargetOutputState`).
    pub fn mark_channel_done(&mut self, node: u32, channel: u32) -> bool {
        let Some(channels) = self.alive.get_mut(&node) else {
            return false;
        };
        channels.remove(&channel);
        if channels.is_empty() {
            self.alive.remove(&node);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    pub fn alive_channels(&self, node: u32) -> Option<&HashSet<u32>> {
        self.alive.get(&node)
    }

    pub fn targets(&self) -> impl Iterator<Item = (u32, &HashSet<u32>)> {
        self.alive.iter().map(|(n, c)| (*n, c))
    }
}
