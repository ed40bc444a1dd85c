//! Name registry mapping strings to actor addresses.
//!
//! Sharded to keep registration traffic from serializing on one lock;
//! shard selection hashes the name with FNV-1a. Entries are weak: a
//! looked-up name whose actor has died is pruned on access, and actors
//! drop their names at finalization.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::addr::ActorAddr;

const SHARDS: usize = 16;

/// FNV-1a, used only for shard selection.
fn fnv1a(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 14_695_981_039_346_656_037;
    const PRIME: u64 = 1_099_511_628_211;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Per-runtime name registry.
pub(crate) struct NameRegistry {
    shards: [RwLock<HashMap<String, ActorAddr>>; SHARDS],
}

impl NameRegistry {
    pub(crate) fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| RwLock::new(HashMap::new())),
        }
    }

    fn shard(&self, name: &str) -> &RwLock<HashMap<String, ActorAddr>> {
        &self.shards[(fnv1a(name.as_bytes()) % SHARDS as u64) as usize]
    }

    /// Claim `name` for `addr`. Returns `false` when the name is held by
    /// a still-live actor.
    pub(crate) fn register(&self, name: &str, addr: ActorAddr) -> bool {
        let mut shard = self
            .shard(name)
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = shard.get(name) {
            if existing.is_alive() {
                return false;
            }
        }
        shard.insert(name.to_string(), addr);
        true
    }

    /// Look up a name, pruning it if the actor has died.
    pub(crate) fn whereis(&self, name: &str) -> Option<ActorAddr> {
        let mut shard = self
            .shard(name)
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match shard.get(name) {
            Some(addr) if addr.is_alive() => Some(addr.clone()),
            Some(_) => {
                shard.remove(name);
                None
            }
            None => None,
        }
    }

    pub(crate) fn unregister(&self, name: &str) {
        let mut shard = self
            .shard(name)
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        shard.remove(name);
    }
}
