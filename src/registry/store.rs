//! Session registry implementation

use std::collections::BTreeMap;

use serde_json::Value;

use super::entry::SessionEntry;
use super::error::RegistryError;
use crate::protocol::{ConnectionId, SessionId, SessionInfo};

/// Map of live sessions keyed by id
///
/// Ordered by id so that consecutive snapshots only differ by the entries
/// that were actually added or removed.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a session
    ///
    /// A second `register` for a live id silently supersedes the previous
    /// owner. The superseded entry is returned so the caller can log it.
    pub fn register(
        &mut self,
        id: SessionId,
        owner: ConnectionId,
        metadata: Value,
    ) -> Option<SessionEntry> {
        let entry = SessionEntry::new(id.clone(), owner.clone(), metadata);
        let previous = self.sessions.insert(id.clone(), entry);

        match &previous {
            Some(prev) if prev.owner != owner => {
                tracing::warn!(
                    session = %id,
                    previous_owner = %prev.owner,
                    owner = %owner,
                    "Session ownership superseded"
                );
            }
            Some(_) => {
                tracing::debug!(session = %id, owner = %owner, "Session metadata replaced");
            }
            None => {
                tracing::info!(session = %id, owner = %owner, "Session registered");
            }
        }

        previous
    }

    /// Remove a session if present
    pub fn unregister(&mut self, id: &SessionId) -> Option<SessionEntry> {
        let removed = self.sessions.remove(id);
        if let Some(ref entry) = removed {
            tracing::info!(
                session = %id,
                owner = %entry.owner,
                uptime_secs = entry.uptime().as_secs(),
                "Session unregistered"
            );
        }
        removed
    }

    /// Remove a session on behalf of `requester`, who must be its owner
    pub fn unregister_as(
        &mut self,
        id: &SessionId,
        requester: &ConnectionId,
    ) -> Result<SessionEntry, RegistryError> {
        let entry = self
            .sessions
            .get(id)
            .ok_or_else(|| RegistryError::SessionNotFound(id.clone()))?;

        if !entry.is_owned_by(requester) {
            return Err(RegistryError::NotOwner {
                session: id.clone(),
                owner: entry.owner.clone(),
            });
        }

        self.unregister(id)
            .ok_or_else(|| RegistryError::SessionNotFound(id.clone()))
    }

    /// Remove every session owned by `owner`
    ///
    /// Normally at most one; a connection that started several ids loses
    /// all of them.
    pub fn unregister_owned_by(&mut self, owner: &ConnectionId) -> Vec<SessionEntry> {
        let owned: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|entry| entry.is_owned_by(owner))
            .map(|entry| entry.id.clone())
            .collect();

        owned
            .iter()
            .filter_map(|id| self.unregister(id))
            .collect()
    }

    pub fn lookup(&self, id: &SessionId) -> Option<&SessionEntry> {
        self.sessions.get(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Full list of live sessions for `sessions-updated`
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(SessionEntry::info).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
