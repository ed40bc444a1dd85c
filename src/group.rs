//! Group membership: named multicast sets of actors.
//!
//! An actor joins a group to receive everything published to it. Exiting
//! actors are unsubscribed during finalization, and dead addresses are
//! pruned on publish.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::addr::ActorAddr;
use crate::mailbox::Envelope;
use crate::message::Message;
use crate::message_id::{MessageId, MessagePriority};

/// Per-runtime group registry.
pub(crate) struct GroupRegistry {
    groups: RwLock<HashMap<String, Vec<ActorAddr>>>,
}

impl GroupRegistry {
    pub(crate) fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Add `member` to `group`. Returns `false` when already subscribed.
    pub(crate) fn subscribe(&self, group: &str, member: ActorAddr) -> bool {
        let mut groups = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let members = groups.entry(group.to_string()).or_default();
        if members.contains(&member) {
            return false;
        }
        members.push(member);
        true
    }

    /// Remove `member` from `group`.
    pub(crate) fn unsubscribe(&self, group: &str, member: &ActorAddr) {
        let mut groups = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(members) = groups.get_mut(group) {
            members.retain(|m| m != member);
            if members.is_empty() {
                groups.remove(group);
            }
        }
    }

    /// Send `msg` to every live member, pruning dead addresses.
    pub(crate) fn publish(&self, group: &str, sender: Option<ActorAddr>, msg: &Message) {
        let mut groups = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(members) = groups.get_mut(group) else {
            return;
        };
        members.retain(ActorAddr::is_alive);
        for member in members.iter() {
            member.deliver(Envelope::user(
                sender.clone(),
                MessageId::make(MessagePriority::Normal),
                msg.clone(),
            ));
        }
    }
}
