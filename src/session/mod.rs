//! Handshake state machines and server-side session bookkeeping.
//!
//! The datagram layer is pure; this module is the session manager sitting on
//! top of it. It owns the phase machine from the registration handshake,
//! stamps sequence and acknowledgement numbers into outgoing headers, and
//! applies the error disposition table: signature failures are swallowed,
//! session-fatal errors move the machine to [`Phase::Rejected`], and
//! wrong-phase datagrams are answered with `ConnectionRejected`.

mod agent;
mod server;

pub use agent::AgentSession;
pub use server::{ServerSession, ServerSessionRegistry};

use crate::datagram::SessionId;
use crate::spack::TaskMetric;

/// Handshake phase of one peer's session.
///
/// The machine never returns to a prior phase; `Rejected` is terminal, and
/// re-registration means a new session with a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing sent or received yet: the agent has not issued
    /// `RequestRegister`, the server has not seen one.
    AwaitRegister,
    /// Agent only: `RequestRegister` sent, waiting for the challenge.
    AwaitChallenge,
    /// Server only: challenge sent, waiting for the proof.
    AwaitChallenge2,
    /// Handshake complete; encrypted datagrams flow.
    Established,
    /// Terminal: the session was rejected by either peer.
    Rejected,
}

/// What a server made of one incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Nothing to do (frame absorbed, or not ours).
    None,
    /// A datagram to send back to the peer.
    Reply {
        /// Session the reply belongs to.
        session_id: SessionId,
        /// Serialized datagram.
        bytes: Vec<u8>,
    },
    /// A schema push updated the session's task configuration.
    SchemasUpdated {
        /// Session that pushed.
        session_id: SessionId,
        /// Names of the tasks added or replaced.
        tasks: Vec<String>,
    },
    /// A decoded metric report.
    Metric {
        /// Session that reported.
        session_id: SessionId,
        /// Task the metric belongs to.
        task_id: String,
        /// The metric values.
        metric: TaskMetric,
    },
}
