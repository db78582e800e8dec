// Connection registry: the relay's only cross-thread shared mutable state.
//
// Maps user ids to reliable-channel handles and to learned unreliable-channel
// addresses, each behind its own mutex. Every receive loop goes through the
// operations below; nothing else mutates these maps. Reads take snapshots so
// callers never hold a lock while writing to sockets.
//
// The handle type is generic: the server instantiates `H` with a shared
// stream writer, unit tests with in-memory buffers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use copresence_protocol::UserId;

use crate::error::RelayError;

pub struct ConnectionRegistry<H> {
    reliable: Mutex<HashMap<UserId, H>>,
    unreliable: Mutex<HashMap<UserId, SocketAddr>>,
}

/// Recover the guard from a poisoned lock. Neither the registry maps nor the
/// per-connection writers hold invariants a panicking holder could
/// half-apply, so the contents remain usable.
pub(crate) fn relock<'a, T: ?Sized>(
    result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl<H: Clone> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self {
            reliable: Mutex::new(HashMap::new()),
            unreliable: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a new connection record. Fails when the user id is already
    /// present — live identities must stay unique.
    pub fn register(&self, user: UserId, handle: H) -> Result<(), RelayError> {
        let mut reliable = relock(self.reliable.lock());
        if reliable.contains_key(&user) {
            return Err(RelayError::DuplicateUser(user));
        }
        reliable.insert(user, handle);
        Ok(())
    }

    /// Record the unreliable-channel address observed for a user. Upsert;
    /// re-observation (NAT rebind, roaming) silently takes the new address.
    /// Unknown users are ignored — the address is simply not retained. An
    /// address maps to at most one user, so any other user previously seen
    /// at `addr` is evicted (last writer wins).
    pub fn learn_unreliable_addr(&self, user: &UserId, addr: SocketAddr) {
        if !relock(self.reliable.lock()).contains_key(user) {
            debug!("ignoring unreliable address for unknown user {user}");
            return;
        }
        let mut unreliable = relock(self.unreliable.lock());
        unreliable.retain(|other, &mut a| a != addr || other == user);
        unreliable.insert(user.clone(), addr);
    }

    /// Remove both channel entries for a user. Tolerant of already-removed.
    pub fn unregister(&self, user: &UserId) {
        relock(self.reliable.lock()).remove(user);
        relock(self.unreliable.lock()).remove(user);
    }

    /// Reliable handle for one user, if live.
    pub fn reliable_handle(&self, user: &UserId) -> Option<H> {
        relock(self.reliable.lock()).get(user).cloned()
    }

    /// Snapshot of all reliable connections except `excluding`.
    pub fn reliable_targets(&self, excluding: Option<&UserId>) -> Vec<(UserId, H)> {
        relock(self.reliable.lock())
            .iter()
            .filter(|(user, _)| Some(*user) != excluding)
            .map(|(user, handle)| (user.clone(), handle.clone()))
            .collect()
    }

    /// Snapshot of all learned unreliable addresses except `excluding`.
    pub fn unreliable_targets(&self, excluding: Option<&UserId>) -> Vec<(UserId, SocketAddr)> {
        relock(self.unreliable.lock())
            .iter()
            .filter(|(user, _)| Some(*user) != excluding)
            .map(|(user, addr)| (user.clone(), *addr))
            .collect()
    }

    /// Number of live reliable connections.
    pub fn len(&self) -> usize {
        relock(self.reliable.lock()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: Clone> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
