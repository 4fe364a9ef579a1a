//! Peer link negotiation state machine
//!
//! One [`PeerLink`] per remote counterpart. Role and timing mode are fixed at
//! construction and never inferred from message order.
//!
//! Every negotiation step runs while holding the link's negotiation lock,
//! so steps on one link never overlap and messages that arrive meanwhile
//! wait their turn in arrival order. The observable state lives in a
//! `watch` channel outside that lock: [`PeerLink::close`] flips it to
//! `Closed` immediately, which cancels whatever transport call is in
//! flight, and no later completion can move the link out of `Closed`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};

use super::media::{MediaTransport, TransportError};
use super::state::{NegotiationState, Role, TimingMode};
use super::LinkError;
use crate::protocol::{ConnectionId, IceCandidate, NegotiationPayload, SessionDescription};

/// A payload the link wants relayed to its counterpart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSignal {
    pub to: ConnectionId,
    pub payload: NegotiationPayload,
}

/// Bookkeeping touched only under the negotiation lock
#[derive(Debug, Default)]
struct Negotiation {
    /// Remote description has been applied
    remote_applied: bool,
    /// Remote candidates received before the remote description, in order
    queued_remote: Vec<IceCandidate>,
    /// Local description has been sent
    local_sent: bool,
    /// Local candidates discovered before the local description went out
    pending_local: Vec<IceCandidate>,
    /// Connectivity was confirmed before the exchange finished
    transport_connected: bool,
}

/// Negotiation with a single remote counterpart
pub struct PeerLink {
    remote: ConnectionId,
    role: Role,
    mode: TimingMode,
    transport: Arc<dyn MediaTransport>,
    outbound: mpsc::Sender<OutboundSignal>,
    state: watch::Sender<NegotiationState>,
    negotiation: Mutex<Negotiation>,
    released: AtomicBool,
}

impl PeerLink {
    /// Create an idle link that owns `transport` until it is closed
    pub fn new(
        remote: ConnectionId,
        role: Role,
        mode: TimingMode,
        transport: Arc<dyn MediaTransport>,
        outbound: mpsc::Sender<OutboundSignal>,
    ) -> Self {
        let (state, _) = watch::channel(NegotiationState::Idle);

        Self {
            remote,
            role,
            mode,
            transport,
            outbound,
            state,
            negotiation: Mutex::new(Negotiation::default()),
            released: AtomicBool::new(false),
        }
    }

    pub fn remote(&self) -> &ConnectionId {
        &self.remote
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    /// Remote candidates waiting for the remote description
    pub async fn queued_candidates(&self) -> usize {
        self.negotiation.lock().await.queued_remote.len()
    }

    /// Offerer only: create, apply and send the offer
    pub async fn start(&self) -> Result<(), LinkError> {
        if self.role != Role::Offerer {
            return Err(LinkError::WrongRole(self.role));
        }

        let mut neg = self.negotiation.lock().await;
        match self.state() {
            NegotiationState::Idle => {}
            NegotiationState::Closed => return Err(LinkError::Closed),
            other => return Err(LinkError::InvalidState(other)),
        }

        let result = self.offer(&mut neg).await;
        self.settle(result).await
    }

    /// Feed one payload received from the counterpart
    ///
    /// Payloads the current state does not expect close the link with
    /// [`LinkError::NegotiationFailed`]. A closed link ignores everything.
    pub async fn handle_remote(&self, payload: NegotiationPayload) -> Result<(), LinkError> {
        let mut neg = self.negotiation.lock().await;
        let state = self.state();

        if state.is_closed() {
            tracing::debug!(remote = %self.remote, payload = payload.kind(), "Ignoring payload on closed link");
            return Ok(());
        }

        let result = match payload {
            NegotiationPayload::Offer(offer)
                if self.role == Role::Answerer && state == NegotiationState::Idle =>
            {
                self.answer(&mut neg, offer).await
            }
            NegotiationPayload::Answer(answer)
                if self.role == Role::Offerer
                    && state == NegotiationState::OfferSent
                    && !neg.remote_applied =>
            {
                self.accept_answer(&mut neg, answer).await
            }
            NegotiationPayload::Candidate(candidate) if self.mode == TimingMode::Trickled => {
                self.add_remote_candidate(&mut neg, candidate).await
            }
            other => Err(LinkError::NegotiationFailed(format!(
                "unexpected {} while {}",
                other.kind(),
                state
            ))),
        };

        self.settle(result).await
    }

    /// A local candidate was discovered by the media stack
    pub async fn on_local_candidate(&self, candidate: IceCandidate) -> Result<(), LinkError> {
        let mut neg = self.negotiation.lock().await;

        if self.is_closed() || self.mode == TimingMode::Bundled {
            // Bundled candidates travel inside the description
            return Ok(());
        }

        if !neg.local_sent {
            neg.pending_local.push(candidate);
            return Ok(());
        }

        let result = self.send(NegotiationPayload::Candidate(candidate)).await;
        self.settle(result).await
    }

    /// Connectivity checks succeeded
    pub async fn on_transport_connected(&self) -> Result<(), LinkError> {
        let mut neg = self.negotiation.lock().await;

        match self.state() {
            NegotiationState::Closed | NegotiationState::Connected => Ok(()),
            NegotiationState::AnswerSent => self.transition(NegotiationState::Connected),
            NegotiationState::OfferSent if neg.remote_applied => {
                self.transition(NegotiationState::Connected)
            }
            _ => {
                neg.transport_connected = true;
                Ok(())
            }
        }
    }

    /// Connectivity checks failed; closes the link
    pub async fn on_transport_failed(&self, reason: impl Into<String>) -> LinkError {
        self.fail(format!("transport failed: {}", reason.into())).await
    }

    /// Release the transport and move to `Closed`
    ///
    /// Safe to call at any time, including while a step is in flight, and
    /// any number of times.
    pub async fn close(&self) {
        if self.enter_closed() {
            tracing::debug!(remote = %self.remote, "Peer link closed");
            self.release().await;
        }
    }

    async fn offer(&self, neg: &mut Negotiation) -> Result<(), LinkError> {
        self.transition(NegotiationState::CreatingOffer)?;

        let offer = self.guarded(self.transport.create_offer()).await?;
        self.guarded(self.transport.set_local_description(&offer)).await?;
        let offer = self.finalize_local(offer).await?;

        self.transition(NegotiationState::OfferSent)?;
        self.send(NegotiationPayload::Offer(offer)).await?;
        self.local_description_sent(neg).await
    }

    async fn answer(&self, neg: &mut Negotiation, offer: SessionDescription) -> Result<(), LinkError> {
        self.transition(NegotiationState::OfferReceived)?;
        self.apply_remote(neg, offer).await?;

        self.transition(NegotiationState::CreatingAnswer)?;
        let answer = self.guarded(self.transport.create_answer()).await?;
        self.guarded(self.transport.set_local_description(&answer)).await?;
        let answer = self.finalize_local(answer).await?;

        self.transition(NegotiationState::AnswerSent)?;
        self.send(NegotiationPayload::Answer(answer)).await?;
        self.local_description_sent(neg).await?;

        if neg.transport_connected {
            self.transition(NegotiationState::Connected)?;
        }
        Ok(())
    }

    async fn accept_answer(
        &self,
        neg: &mut Negotiation,
        answer: SessionDescription,
    ) -> Result<(), LinkError> {
        self.apply_remote(neg, answer).await?;

        if neg.transport_connected {
            self.transition(NegotiationState::Connected)?;
        }
        Ok(())
    }

    /// Apply the remote description, then its bundled candidates, then
    /// everything queued, all in receipt order
    async fn apply_remote(
        &self,
        neg: &mut Negotiation,
        desc: SessionDescription,
    ) -> Result<(), LinkError> {
        self.guarded(self.transport.set_remote_description(&desc)).await?;
        neg.remote_applied = true;

        for candidate in &desc.candidates {
            self.guarded(self.transport.add_remote_candidate(candidate)).await?;
        }

        let queued = std::mem::take(&mut neg.queued_remote);
        if !queued.is_empty() {
            tracing::debug!(remote = %self.remote, count = queued.len(), "Flushing queued candidates");
        }
        for candidate in &queued {
            self.guarded(self.transport.add_remote_candidate(candidate)).await?;
        }

        Ok(())
    }

    async fn add_remote_candidate(
        &self,
        neg: &mut Negotiation,
        candidate: IceCandidate,
    ) -> Result<(), LinkError> {
        if neg.remote_applied {
            self.guarded(self.transport.add_remote_candidate(&candidate)).await
        } else {
            neg.queued_remote.push(candidate);
            Ok(())
        }
    }

    async fn finalize_local(&self, desc: SessionDescription) -> Result<SessionDescription, LinkError> {
        match self.mode {
            TimingMode::Trickled => Ok(desc),
            TimingMode::Bundled => self.guarded(self.transport.gathering_complete()).await,
        }
    }

    async fn local_description_sent(&self, neg: &mut Negotiation) -> Result<(), LinkError> {
        neg.local_sent = true;
        for candidate in std::mem::take(&mut neg.pending_local) {
            self.send(NegotiationPayload::Candidate(candidate)).await?;
        }
        Ok(())
    }

    async fn send(&self, payload: NegotiationPayload) -> Result<(), LinkError> {
        tracing::debug!(remote = %self.remote, payload = payload.kind(), "Sending negotiation payload");

        let signal = OutboundSignal {
            to: self.remote.clone(),
            payload,
        };
        let mut state = self.state.subscribe();

        tokio::select! {
            biased;
            _ = state.wait_for(|s| s.is_closed()) => Err(LinkError::Closed),
            sent = self.outbound.send(signal) => {
                sent.map_err(|_| LinkError::NegotiationFailed("signaling channel closed".into()))
            }
        }
    }

    /// Run a transport call unless the link closes first
    async fn guarded<T, F>(&self, op: F) -> Result<T, LinkError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        let mut state = self.state.subscribe();

        tokio::select! {
            biased;
            _ = state.wait_for(|s| s.is_closed()) => Err(LinkError::Closed),
            result = op => result.map_err(LinkError::Transport),
        }
    }

    /// Move to `next` unless the link is already closed
    fn transition(&self, next: NegotiationState) -> Result<(), LinkError> {
        let mut from = None;
        let moved = self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            from = Some(*state);
            *state = next;
            true
        });

        if moved {
            if let Some(from) = from {
                tracing::debug!(remote = %self.remote, from = %from, to = %next, "Negotiation state");
            }
            Ok(())
        } else {
            Err(LinkError::Closed)
        }
    }

    fn enter_closed(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_closed() {
                false
            } else {
                *state = NegotiationState::Closed;
                true
            }
        })
    }

    /// Turn a step error into the caller-facing error, closing on failure
    async fn settle(&self, result: Result<(), LinkError>) -> Result<(), LinkError> {
        match result {
            Ok(()) => Ok(()),
            Err(LinkError::Closed) => Err(LinkError::Closed),
            Err(LinkError::Transport(e)) => Err(self.fail(e.to_string()).await),
            Err(LinkError::NegotiationFailed(reason)) => Err(self.fail(reason).await),
            Err(other) => Err(other),
        }
    }

    async fn fail(&self, reason: String) -> LinkError {
        if !self.enter_closed() {
            return LinkError::Closed;
        }

        tracing::warn!(remote = %self.remote, reason = %reason, "Negotiation failed");
        self.release().await;
        LinkError::NegotiationFailed(reason)
    }

    async fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.transport.close().await;
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("remote", &self.remote)
            .field("role", &self.role)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}
