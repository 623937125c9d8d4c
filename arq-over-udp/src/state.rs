//! Sender connection finite-state machine.
//!
//! The sender walks a linear lifecycle.  Connecting and disconnecting can
//! each fail straight to `Closed`.
//!
//! ```text
//!  IDLE ──SYN sent──▶ CONNECTING ──SYN-ACK──▶ TRANSFERRING
//!                         │                        │
//!                         │ timeout / corrupt      │ window drained, FIN sent
//!                         ▼                        ▼
//!                      CLOSED ◀──FIN-ACK / timeout── DISCONNECTING
//! ```

/// All states a [`crate::sender::Connection`] can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created, nothing sent yet.
    #[default]
    Idle,
    /// SYN sent; waiting for SYN-ACK.
    Connecting,
    /// Handshake complete; data phase in progress.
    Transferring,
    /// FIN sent; waiting for FIN-ACK.
    Disconnecting,
    /// Terminal.  Reached on success and on every failure path.
    Closed,
}

impl ConnectionState {
    /// `true` if the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Transferring)
                | (Connecting, Closed)
                | (Transferring, Disconnecting)
                | (Transferring, Closed)
                | (Disconnecting, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Transferring => "TRANSFERRING",
            ConnectionState::Disconnecting => "DISCONNECTING",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
