//! Peer link bookkeeping
//!
//! [`PeerManager`] owns every [`PeerLink`] of one client, keyed by the
//! remote connection id. Each link gets a driver task that feeds it relayed
//! payloads and transport events one at a time; a link that fails or closes
//! removes itself.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::link::{OutboundSignal, PeerLink};
use super::media::{MediaTransportFactory, TransportEvent, TransportHandle};
use super::state::{NegotiationState, Role, TimingMode};
use super::LinkError;
use crate::protocol::{ConnectionId, NegotiationPayload, ServerMessage, SessionId, SessionInfo};

/// Link lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A link reached a new state
    StateChanged {
        remote: ConnectionId,
        state: NegotiationState,
    },
    /// A link failed and has been closed
    Failed { remote: ConnectionId, reason: String },
}

enum Command {
    Start,
    Remote(NegotiationPayload),
}

struct LinkHandle {
    link: Arc<PeerLink>,
    inbox: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

type LinkMap = Arc<Mutex<HashMap<ConnectionId, LinkHandle>>>;

/// The session this client broadcasts, if any
#[derive(Debug)]
struct Hosting {
    session: SessionId,
    local: ConnectionId,
    /// A snapshot has listed the session under `local`
    confirmed: bool,
}

/// Manages the peer links of one signaling client
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use livesignal::peer::{MediaTransportFactory, PeerManager, TimingMode};
/// use tokio::sync::mpsc;
///
/// # async fn example(factory: Arc<dyn MediaTransportFactory>) {
/// let (outbound_tx, _outbound_rx) = mpsc::channel(64);
/// let (peers, mut events) = PeerManager::new(factory, TimingMode::Trickled, outbound_tx);
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Peer event: {:?}", event);
///     }
/// });
/// # }
/// ```
pub struct PeerManager {
    factory: Arc<dyn MediaTransportFactory>,
    mode: TimingMode,
    outbound: mpsc::Sender<OutboundSignal>,
    events: mpsc::Sender<PeerEvent>,
    links: LinkMap,
    hosting: Mutex<Option<Hosting>>,
}

impl PeerManager {
    /// Create a manager.
    ///
    /// Payloads the links want relayed arrive on `outbound`'s receiver.
    /// Returns the manager and a receiver for link events.
    pub fn new(
        factory: Arc<dyn MediaTransportFactory>,
        mode: TimingMode,
        outbound: mpsc::Sender<OutboundSignal>,
    ) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (events, events_rx) = mpsc::channel(256);

        let manager = Self {
            factory,
            mode,
            outbound,
            events,
            links: Arc::new(Mutex::new(HashMap::new())),
            hosting: Mutex::new(None),
        };

        (manager, events_rx)
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    /// Open an offering link towards `remote` and start negotiating
    ///
    /// A live offering link to the same remote is returned as is.
    pub async fn add_offerer(&self, remote: ConnectionId) -> Result<Arc<PeerLink>, LinkError> {
        let mut links = self.links.lock().await;

        if let Some(existing) = links.get(&remote) {
            if existing.link.role() == Role::Offerer && !existing.link.is_closed() {
                tracing::debug!(remote = %remote, "Peer link already negotiating");
                return Ok(Arc::clone(&existing.link));
            }
        }

        tracing::info!(remote = %remote, mode = ?self.mode, "Opening peer link as offerer");
        self.spawn_link(&mut links, remote, Role::Offerer, Command::Start)
            .await
    }

    /// Mark `session` as broadcast by this client under `local`
    ///
    /// Once a snapshot has listed it, the first snapshot that no longer
    /// lists it under `local` (ended or taken over) closes every link.
    pub async fn host(&self, session: SessionId, local: ConnectionId) {
        *self.hosting.lock().await = Some(Hosting {
            session,
            local,
            confirmed: false,
        });
    }

    /// Route a relayed `signal` body to the link for `from`
    ///
    /// An offer from an unknown remote opens an answering link. Anything
    /// else without a live link, or anything that does not decode, is
    /// dropped.
    pub async fn handle_signal(&self, from: &ConnectionId, signal: &Value) -> Result<(), LinkError> {
        let payload = match NegotiationPayload::from_value(signal) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(from = %from, error = %e, "Undecodable negotiation payload");
                return Ok(());
            }
        };

        let mut links = self.links.lock().await;

        if let Some(handle) = links.get(from).filter(|h| !h.link.is_closed()) {
            if handle.inbox.send(Command::Remote(payload)).is_err() {
                tracing::debug!(from = %from, "Peer link driver already stopped");
            }
            return Ok(());
        }

        if matches!(payload, NegotiationPayload::Offer(_)) {
            tracing::info!(remote = %from, mode = ?self.mode, "Opening peer link as answerer");
            self.spawn_link(&mut links, from.clone(), Role::Answerer, Command::Remote(payload))
                .await?;
        } else {
            tracing::debug!(from = %from, payload = payload.kind(), "No peer link for payload");
        }

        Ok(())
    }

    /// React to a server notification
    pub async fn on_server_message(&self, msg: &ServerMessage) -> Result<(), LinkError> {
        match msg {
            ServerMessage::ViewerJoined { viewer_id, .. } => {
                self.add_offerer(viewer_id.clone()).await?;
            }
            ServerMessage::ViewerLeft { viewer_id, .. } => {
                self.remove(viewer_id).await;
            }
            ServerMessage::Signal { from, signal } => {
                self.handle_signal(from, signal).await?;
            }
            ServerMessage::SessionsUpdated { sessions } => {
                self.on_snapshot(sessions).await;
            }
            ServerMessage::SessionEnded { session_id } => {
                tracing::info!(session = %session_id, "Session ended, closing peer links");
                self.close_all().await;
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_snapshot(&self, sessions: &[SessionInfo]) {
        let mut hosting = self.hosting.lock().await;
        let Some(host) = hosting.as_mut() else {
            return;
        };

        let listed = sessions
            .iter()
            .any(|info| info.id == host.session && info.owner_id == host.local);

        if listed {
            host.confirmed = true;
            return;
        }
        if !host.confirmed {
            // Snapshot predates our start-session
            return;
        }

        tracing::info!(session = %host.session, "No longer hosting session, closing peer links");
        *hosting = None;
        drop(hosting);
        self.close_all().await;
    }

    /// Close and forget the link to `remote`
    pub async fn remove(&self, remote: &ConnectionId) -> bool {
        let handle = self.links.lock().await.remove(remote);

        match handle {
            Some(handle) => {
                shutdown(handle).await;
                true
            }
            None => false,
        }
    }

    /// Close every link
    pub async fn close_all(&self) {
        let handles: Vec<LinkHandle> = {
            let mut links = self.links.lock().await;
            links.drain().map(|(_, handle)| handle).collect()
        };

        for handle in handles {
            shutdown(handle).await;
        }
    }

    pub async fn link(&self, remote: &ConnectionId) -> Option<Arc<PeerLink>> {
        self.links
            .lock()
            .await
            .get(remote)
            .map(|handle| Arc::clone(&handle.link))
    }

    pub async fn len(&self) -> usize {
        self.links.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.links.lock().await.is_empty()
    }

    async fn spawn_link(
        &self,
        links: &mut HashMap<ConnectionId, LinkHandle>,
        remote: ConnectionId,
        role: Role,
        first: Command,
    ) -> Result<Arc<PeerLink>, LinkError> {
        let TransportHandle {
            transport,
            events: transport_events,
        } = self.factory.create(&remote, role).await?;

        let link = Arc::new(PeerLink::new(
            remote.clone(),
            role,
            self.mode,
            transport,
            self.outbound.clone(),
        ));

        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let _ = inbox.send(first);

        let task = tokio::spawn(drive(
            Arc::clone(&link),
            inbox_rx,
            transport_events,
            self.events.clone(),
            Arc::clone(&self.links),
        ));

        let handle = LinkHandle {
            link: Arc::clone(&link),
            inbox,
            task,
        };

        if let Some(replaced) = links.insert(remote, handle) {
            // Its driver exits on its own once the link is closed
            replaced.link.close().await;
        }

        Ok(link)
    }
}

async fn shutdown(handle: LinkHandle) {
    let LinkHandle { link, inbox, task } = handle;

    link.close().await;
    drop(inbox);

    if let Err(e) = task.await {
        tracing::warn!(remote = %link.remote(), error = %e, "Peer link driver panicked");
    }
}

/// Feed one link its inputs in arrival order until it closes
async fn drive(
    link: Arc<PeerLink>,
    mut inbox: mpsc::UnboundedReceiver<Command>,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    events: mpsc::Sender<PeerEvent>,
    links: LinkMap,
) {
    let mut states = link.subscribe();
    let mut transport_open = true;

    loop {
        let result = tokio::select! {
            biased;

            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                let _ = events.try_send(PeerEvent::StateChanged {
                    remote: link.remote().clone(),
                    state,
                });
                if state.is_closed() {
                    break;
                }
                continue;
            }

            command = inbox.recv() => match command {
                Some(Command::Start) => link.start().await,
                Some(Command::Remote(payload)) => link.handle_remote(payload).await,
                None => {
                    link.close().await;
                    continue;
                }
            },

            event = transport_events.recv(), if transport_open => match event {
                Some(TransportEvent::LocalCandidate(candidate)) => {
                    link.on_local_candidate(candidate).await
                }
                Some(TransportEvent::Connected) => link.on_transport_connected().await,
                Some(TransportEvent::Failed(reason)) => Err(link.on_transport_failed(reason).await),
                None => {
                    transport_open = false;
                    Err(link.on_transport_failed("event stream ended").await)
                }
            },
        };

        match result {
            Ok(()) => {}
            Err(LinkError::NegotiationFailed(reason)) => {
                let _ = events.try_send(PeerEvent::Failed {
                    remote: link.remote().clone(),
                    reason,
                });
            }
            Err(e) => {
                tracing::debug!(remote = %link.remote(), error = %e, "Peer link step rejected");
            }
        }
    }

    let mut links = links.lock().await;
    let owned = links
        .get(link.remote())
        .map_or(false, |handle| Arc::ptr_eq(&handle.link, &link));
    if owned {
        links.remove(link.remote());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::peer::media::{MediaTransport, TransportError};
    use crate::protocol::{IceCandidate, SessionDescription, SessionId};

    struct StubTransport {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MediaTransport for StubTransport {
        async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
            Ok(SessionDescription::new("offer"))
        }

        async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
            Ok(SessionDescription::new("answer"))
        }

        async fn set_local_description(&self, _: &SessionDescription) -> Result<(), TransportError> {
            Ok(())
        }

        async fn set_remote_description(&self, _: &SessionDescription) -> Result<(), TransportError> {
            Ok(())
        }

        async fn add_remote_candidate(&self, _: &IceCandidate) -> Result<(), TransportError> {
            Ok(())
        }

        async fn gathering_complete(&self) -> Result<SessionDescription, TransportError> {
            Ok(SessionDescription::new("bundled"))
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct StubFactory {
        created: AtomicUsize,
        closes: Arc<AtomicUsize>,
        event_senders: StdMutex<HashMap<ConnectionId, mpsc::Sender<TransportEvent>>>,
    }

    impl StubFactory {
        fn events_for(&self, remote: &str) -> mpsc::Sender<TransportEvent> {
            self.event_senders
                .lock()
                .unwrap()
                .get(&ConnectionId::from(remote))
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl MediaTransportFactory for StubFactory {
        async fn create(&self, remote: &ConnectionId, _role: Role) -> Result<TransportHandle, TransportError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            self.event_senders.lock().unwrap().insert(remote.clone(), tx);

            Ok(TransportHandle {
                transport: Arc::new(StubTransport {
                    closes: Arc::clone(&self.closes),
                }),
                events: rx,
            })
        }
    }

    struct Harness {
        factory: Arc<StubFactory>,
        manager: PeerManager,
        outbound: mpsc::Receiver<OutboundSignal>,
        events: mpsc::Receiver<PeerEvent>,
    }

    fn harness() -> Harness {
        let factory = Arc::new(StubFactory::default());
        let (tx, outbound) = mpsc::channel(16);
        let (manager, events) = PeerManager::new(factory.clone(), TimingMode::Trickled, tx);

        Harness {
            factory,
            manager,
            outbound,
            events,
        }
    }

    async fn next_outbound(rx: &mut mpsc::Receiver<OutboundSignal>) -> OutboundSignal {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for outbound signal")
            .expect("outbound channel closed")
    }

    async fn wait_for_event(rx: &mut mpsc::Receiver<PeerEvent>, wanted: &PeerEvent) {
        timeout(Duration::from_secs(1), async {
            while let Some(event) = rx.recv().await {
                if &event == wanted {
                    return;
                }
            }
            panic!("event channel closed");
        })
        .await
        .expect("timed out waiting for peer event");
    }

    async fn wait_until_empty(manager: &PeerManager) {
        timeout(Duration::from_secs(1), async {
            while !manager.is_empty().await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("links were not removed");
    }

    fn viewer_joined(viewer: &str) -> ServerMessage {
        ServerMessage::ViewerJoined {
            viewer_id: ConnectionId::from(viewer),
            session_id: SessionId::from("live"),
            viewer_count: 1,
        }
    }

    fn signal(from: &str, payload: NegotiationPayload) -> ServerMessage {
        ServerMessage::Signal {
            from: ConnectionId::from(from),
            signal: payload.to_value().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_viewer_joined_opens_offering_link() {
        let mut h = harness();

        h.manager.on_server_message(&viewer_joined("v1")).await.unwrap();

        let sent = next_outbound(&mut h.outbound).await;
        assert_eq!(sent.to, ConnectionId::from("v1"));
        assert_eq!(sent.payload.kind(), "offer");

        let link = h.manager.link(&ConnectionId::from("v1")).await.unwrap();
        assert_eq!(link.role(), Role::Offerer);

        h.manager
            .on_server_message(&signal("v1", NegotiationPayload::Answer(SessionDescription::new("a"))))
            .await
            .unwrap();
        h.factory
            .events_for("v1")
            .send(TransportEvent::Connected)
            .await
            .unwrap();

        wait_for_event(
            &mut h.events,
            &PeerEvent::StateChanged {
                remote: ConnectionId::from("v1"),
                state: NegotiationState::Connected,
            },
        )
        .await;
        assert_eq!(link.state(), NegotiationState::Connected);
    }

    #[tokio::test]
    async fn test_duplicate_viewer_joined_keeps_one_link() {
        let mut h = harness();

        h.manager.on_server_message(&viewer_joined("v1")).await.unwrap();
        next_outbound(&mut h.outbound).await;
        h.manager.on_server_message(&viewer_joined("v1")).await.unwrap();

        assert_eq!(h.manager.len().await, 1);
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offer_from_unknown_remote_opens_answering_link() {
        let mut h = harness();

        h.manager
            .on_server_message(&signal("b1", NegotiationPayload::Offer(SessionDescription::new("o"))))
            .await
            .unwrap();

        let sent = next_outbound(&mut h.outbound).await;
        assert_eq!(sent.to, ConnectionId::from("b1"));
        assert_eq!(sent.payload, NegotiationPayload::Answer(SessionDescription::new("answer")));

        let link = h.manager.link(&ConnectionId::from("b1")).await.unwrap();
        assert_eq!(link.role(), Role::Answerer);
    }

    #[tokio::test]
    async fn test_local_candidates_are_trickled() {
        let mut h = harness();

        h.manager.on_server_message(&viewer_joined("v1")).await.unwrap();
        next_outbound(&mut h.outbound).await;

        h.factory
            .events_for("v1")
            .send(TransportEvent::LocalCandidate(IceCandidate::new("host")))
            .await
            .unwrap();

        let sent = next_outbound(&mut h.outbound).await;
        assert_eq!(sent.payload, NegotiationPayload::Candidate(IceCandidate::new("host")));
    }

    #[tokio::test]
    async fn test_stray_payloads_are_dropped() {
        let h = harness();

        h.manager
            .on_server_message(&signal("x", NegotiationPayload::Candidate(IceCandidate::new("c"))))
            .await
            .unwrap();
        h.manager
            .handle_signal(&ConnectionId::from("x"), &json!({"type": "bogus"}))
            .await
            .unwrap();

        assert!(h.manager.is_empty().await);
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_viewer_left_closes_link() {
        let mut h = harness();

        h.manager.on_server_message(&viewer_joined("v1")).await.unwrap();
        next_outbound(&mut h.outbound).await;

        h.manager
            .on_server_message(&ServerMessage::ViewerLeft {
                viewer_id: ConnectionId::from("v1"),
                session_id: SessionId::from("live"),
                viewer_count: 0,
            })
            .await
            .unwrap();

        assert!(h.manager.is_empty().await);
        assert_eq!(h.factory.closes.load(Ordering::SeqCst), 1);
        assert!(!h.manager.remove(&ConnectionId::from("v1")).await);
    }

    #[tokio::test]
    async fn test_session_ended_closes_every_link() {
        let mut h = harness();

        for viewer in ["v1", "v2", "v3"] {
            h.manager.on_server_message(&viewer_joined(viewer)).await.unwrap();
            next_outbound(&mut h.outbound).await;
        }
        assert_eq!(h.manager.len().await, 3);

        h.manager
            .on_server_message(&ServerMessage::SessionEnded {
                session_id: SessionId::from("live"),
            })
            .await
            .unwrap();

        assert!(h.manager.is_empty().await);
        assert_eq!(h.factory.closes.load(Ordering::SeqCst), 3);
    }

    fn snapshot(owner: Option<&str>) -> ServerMessage {
        ServerMessage::SessionsUpdated {
            sessions: owner
                .map(|owner| SessionInfo {
                    id: SessionId::from("live"),
                    owner_id: ConnectionId::from(owner),
                    metadata: Value::Null,
                })
                .into_iter()
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_losing_hosted_session_closes_links() {
        let mut h = harness();
        h.manager
            .host(SessionId::from("live"), ConnectionId::from("me"))
            .await;

        // Snapshot queued before our start-session
        h.manager.on_server_message(&snapshot(None)).await.unwrap();
        h.manager.on_server_message(&snapshot(Some("me"))).await.unwrap();

        for viewer in ["v1", "v2"] {
            h.manager.on_server_message(&viewer_joined(viewer)).await.unwrap();
            next_outbound(&mut h.outbound).await;
        }

        // Taken over by another connection
        h.manager
            .on_server_message(&snapshot(Some("other")))
            .await
            .unwrap();

        assert!(h.manager.is_empty().await);
        assert_eq!(h.factory.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unconfirmed_hosting_ignores_snapshots() {
        let mut h = harness();
        h.manager
            .host(SessionId::from("live"), ConnectionId::from("me"))
            .await;

        h.manager.on_server_message(&viewer_joined("v1")).await.unwrap();
        next_outbound(&mut h.outbound).await;
        h.manager.on_server_message(&snapshot(None)).await.unwrap();

        assert_eq!(h.manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_removes_link() {
        let mut h = harness();

        h.manager.on_server_message(&viewer_joined("v1")).await.unwrap();
        next_outbound(&mut h.outbound).await;

        h.factory
            .events_for("v1")
            .send(TransportEvent::Failed("ice".into()))
            .await
            .unwrap();

        wait_for_event(
            &mut h.events,
            &PeerEvent::Failed {
                remote: ConnectionId::from("v1"),
                reason: "transport failed: ice".into(),
            },
        )
        .await;
        wait_until_empty(&h.manager).await;
        assert_eq!(h.factory.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_desync_removes_link() {
        let mut h = harness();

        h.manager
            .on_server_message(&signal("b1", NegotiationPayload::Offer(SessionDescription::new("o"))))
            .await
            .unwrap();
        next_outbound(&mut h.outbound).await;

        // An answerer never receives an answer
        h.manager
            .on_server_message(&signal("b1", NegotiationPayload::Answer(SessionDescription::new("a"))))
            .await
            .unwrap();

        wait_until_empty(&h.manager).await;
        assert_eq!(h.factory.closes.load(Ordering::SeqCst), 1);
    }
}
