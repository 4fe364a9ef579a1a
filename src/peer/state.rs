//! Negotiation states, roles and timing modes

/// Which side of the exchange a link plays, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Creates and sends the offer
    Offerer,
    /// Waits for an offer and answers it
    Answerer,
}

/// When local candidates are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimingMode {
    /// Each local candidate is sent as soon as it is discovered
    #[default]
    Trickled,
    /// Gathering completes first; candidates ride inside the description
    Bundled,
}

/// Negotiation state of a single peer link
///
/// Offerer: `Idle → CreatingOffer → OfferSent → Connected`.
/// Answerer: `Idle → OfferReceived → CreatingAnswer → AnswerSent → Connected`.
/// `Closed` is reachable from anywhere and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Idle,
    CreatingOffer,
    OfferSent,
    OfferReceived,
    CreatingAnswer,
    AnswerSent,
    Connected,
    Closed,
}

impl NegotiationState {
    pub fn is_closed(self) -> bool {
        self == NegotiationState::Closed
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::CreatingOffer => "creating-offer",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::OfferReceived => "offer-received",
            NegotiationState::CreatingAnswer => "creating-answer",
            NegotiationState::AnswerSent => "answer-sent",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}
