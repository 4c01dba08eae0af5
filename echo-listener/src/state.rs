//! Listener connection finite-state machine (FSM) types.
//!
//! ```text
//!  ACCEPTED ──registered──▶ ACTIVE ──peer close / fault──▶ CLOSED
//! ```
//!
//! `Closed` is terminal; a closed connection has already left the watch set.
//! Transitions are driven by [`crate::connection::Connection`].

/// All possible states of a listener-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Returned by `accept`, not yet in the watch set.
    #[default]
    Accepted,
    /// Registered for readable readiness; messages are being served.
    Active,
    /// Removed from the watch set and shut down.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
