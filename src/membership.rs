//! Membership tracker
//!
//! Records which session each viewer connection is watching. A viewer
//! watches at most one session; a session has any number of viewers.
//! Existence of the session is checked by the caller against the registry.

use std::collections::{BTreeSet, HashMap};

use crate::protocol::{ConnectionId, SessionId};

/// Result of [`MembershipTracker::join`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// New membership recorded; `previous` is the session the viewer was
    /// implicitly moved away from, if any
    Joined { previous: Option<SessionId> },
    /// Viewer was already watching this session
    AlreadyMember,
}

/// Viewer → session map with a reverse index per session
#[derive(Debug, Default)]
pub struct MembershipTracker {
    viewers: HashMap<ConnectionId, SessionId>,
    audiences: HashMap<SessionId, BTreeSet<ConnectionId>>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `viewer` watches `session`
    pub fn join(&mut self, viewer: ConnectionId, session: SessionId) -> JoinOutcome {
        if self.viewers.get(&viewer) == Some(&session) {
            return JoinOutcome::AlreadyMember;
        }

        let previous = self.leave(&viewer);

        self.audiences
            .entry(session.clone())
            .or_default()
            .insert(viewer.clone());
        self.viewers.insert(viewer, session);

        JoinOutcome::Joined { previous }
    }

    /// Drop the viewer's membership, returning the session it was watching
    pub fn leave(&mut self, viewer: &ConnectionId) -> Option<SessionId> {
        let session = self.viewers.remove(viewer)?;

        if let Some(audience) = self.audiences.get_mut(&session) {
            audience.remove(viewer);
            if audience.is_empty() {
                self.audiences.remove(&session);
            }
        }

        Some(session)
    }

    /// Drop every membership of a session that ended, returning its members
    pub fn remove_session(&mut self, session: &SessionId) -> Vec<ConnectionId> {
        let members: Vec<ConnectionId> = self
            .audiences
            .remove(session)
            .map(|audience| audience.into_iter().collect())
            .unwrap_or_default();

        for member in &members {
            self.viewers.remove(member);
        }

        members
    }

    /// Session the viewer is currently watching
    pub fn session_of(&self, viewer: &ConnectionId) -> Option<&SessionId> {
        self.viewers.get(viewer)
    }

    /// Live viewer count of a session
    pub fn viewer_count(&self, session: &SessionId) -> usize {
        self.audiences.get(session).map_or(0, BTreeSet::len)
    }

    /// Total number of viewers across all sessions
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    #[test]
    fn test_join_and_leave() {
        let mut tracker = MembershipTracker::new();
        let s1 = SessionId::from("s1");

        assert_eq!(
            tracker.join(conn("b"), s1.clone()),
            JoinOutcome::Joined { previous: None }
        );
        assert_eq!(tracker.join(conn("c"), s1.clone()), JoinOutcome::Joined { previous: None });
        assert_eq!(tracker.viewer_count(&s1), 2);
        assert_eq!(tracker.session_of(&conn("b")), Some(&s1));

        assert_eq!(tracker.leave(&conn("b")), Some(s1.clone()));
        assert_eq!(tracker.viewer_count(&s1), 1);
        assert_eq!(tracker.leave(&conn("b")), None);
    }

    #[test]
    fn test_rejoin_same_session_is_noop() {
        let mut tracker = MembershipTracker::new();
        let s1 = SessionId::from("s1");

        tracker.join(conn("b"), s1.clone());
        assert_eq!(tracker.join(conn("b"), s1.clone()), JoinOutcome::AlreadyMember);
        assert_eq!(tracker.viewer_count(&s1), 1);
    }

    #[test]
    fn test_join_moves_viewer_between_sessions() {
        let mut tracker = MembershipTracker::new();
        let s1 = SessionId::from("s1");
        let s2 = SessionId::from("s2");

        tracker.join(conn("b"), s1.clone());
        assert_eq!(
            tracker.join(conn("b"), s2.clone()),
            JoinOutcome::Joined {
                previous: Some(s1.clone())
            }
        );

        assert_eq!(tracker.viewer_count(&s1), 0);
        assert_eq!(tracker.viewer_count(&s2), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_remove_session_clears_members() {
        let mut tracker = MembershipTracker::new();
        let s1 = SessionId::from("s1");
        let s2 = SessionId::from("s2");

        tracker.join(conn("c"), s1.clone());
        tracker.join(conn("b"), s1.clone());
        tracker.join(conn("d"), s2.clone());

        let members = tracker.remove_session(&s1);
        assert_eq!(members, vec![conn("b"), conn("c")]);
        assert!(tracker.session_of(&conn("b")).is_none());
        assert_eq!(tracker.viewer_count(&s2), 1);
        assert!(tracker.remove_session(&s1).is_empty());
    }
}
