//! Request exchange state types.
//!
//! Every call to [`crate::exchange::Exchanger::send`] walks one exchange
//! through these states.  Transitions live in [`crate::exchange`]; this module
//! only names them.
//!
//! ```text
//!  IDLE ──send──▶ AWAITING_RESPONSE ──matching reply──▶ ANSWERED
//!                    │      ▲
//!       timeout:     └──────┘            subscribe only:
//!       retransmit                       ANSWERED ──window over──▶ EXPIRED
//! ```

/// Lifecycle of one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// Request sent at least once; retransmitted on every timeout.
    AwaitingResponse,
    /// A reply with the awaited id arrived.  Terminal for every verb but
    /// `subscribe`.
    Answered,
    /// Subscription window elapsed after the initial reply.  Terminal.
    Expired,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExchangeState::Answered | ExchangeState::Expired)
    }
}

impl std::fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
