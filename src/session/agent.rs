//! Agent-side registration and reporting session.

use std::collections::BTreeMap;

use crate::core::{
    DatagramError, TYPE_CONNECTION_REJECTED, TYPE_PUSH_SCHEMAS, TYPE_REGISTER_CHALLENGE,
    TYPE_REGISTER_CHALLENGE2, TYPE_REQUEST_REGISTER,
};
use crate::crypto::EcdheSession;
use crate::datagram::{
    ConnectionRejected, Datagram, PushSchemas, RegisterChallenge2, RequestRegister, SendMetrics,
    SessionId,
};
use crate::spack::{TaskMetric, TaskRegistry, TaskSchema};

use super::Phase;

/// The agent (initiator) side of a NetTask session.
///
/// Drives the handshake from `RequestRegister` to `Established`, then
/// serializes schema pushes and metric reports through the derived keys.
/// Incoming bytes go through [`AgentSession::handle`]; its return value is
/// the datagram to send back, if any.
pub struct AgentSession {
    ecdhe: EcdheSession,
    phase: Phase,
    session_id: SessionId,
    tasks: TaskRegistry,
    next_sequence: u32,
    last_peer_sequence: u32,
}

impl AgentSession {
    /// Create a session around a fresh ephemeral keypair.
    pub fn new(pre_shared_secret: &[u8]) -> Self {
        Self {
            ecdhe: EcdheSession::new(pre_shared_secret),
            phase: Phase::AwaitRegister,
            session_id: SessionId::zeroed(),
            tasks: TaskRegistry::new(),
            next_sequence: 0,
            last_peer_sequence: 0,
        }
    }

    /// Current handshake phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Check whether the handshake has completed.
    pub fn is_established(&self) -> bool {
        self.phase == Phase::Established
    }

    /// The session id: the zero placeholder until the server's challenge
    /// fixes the canonical value.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The task configuration this agent serializes metrics against.
    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// The bound key-agreement session.
    pub fn ecdhe(&self) -> &EcdheSession {
        &self.ecdhe
    }

    /// Highest sequence number seen from the peer.
    pub fn last_peer_sequence(&self) -> u32 {
        self.last_peer_sequence
    }

    /// Begin registration: produce the `RequestRegister` datagram.
    ///
    /// Legal exactly once, from the initial phase. The placeholder session id
    /// is all zeros; the server's reply carries the canonical id.
    pub fn start(&mut self) -> Result<Vec<u8>, DatagramError> {
        if self.phase != Phase::AwaitRegister {
            return Err(DatagramError::WrongType {
                expected: awaited_type(self.phase),
                actual: TYPE_REQUEST_REGISTER,
            });
        }

        let mut request =
            RequestRegister::new(SessionId::zeroed(), self.ecdhe.public_key().to_vec());
        request.header.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.phase = Phase::AwaitChallenge;
        Ok(request.serialize())
    }

    /// Process one incoming frame.
    ///
    /// Returns the datagram to send back, if the state machine calls for
    /// one. Frames that are not ours are swallowed; session-fatal parse
    /// errors move the machine to `Rejected` and propagate. A datagram that
    /// is valid but wrong for the current phase is answered with
    /// `ConnectionRejected`.
    pub fn handle(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>, DatagramError> {
        let datagram = match Datagram::deserialize(bytes, Some(&self.ecdhe), Some(&self.tasks)) {
            Ok(datagram) => datagram,
            Err(err) if err.is_silent_drop() => return Ok(None),
            Err(err) => {
                if err.rejects_session() {
                    self.phase = Phase::Rejected;
                }
                return Err(err);
            }
        };

        self.last_peer_sequence = datagram.header().sequence;

        match (self.phase, datagram) {
            (Phase::Rejected, _) => Ok(None),

            (_, Datagram::ConnectionRejected(_)) => {
                self.phase = Phase::Rejected;
                Ok(None)
            }

            (Phase::AwaitChallenge, Datagram::RegisterChallenge(challenge)) => {
                let proof = match self.ecdhe.derive_shared_secret(
                    &challenge.public_key,
                    &challenge.salt,
                    &challenge.challenge,
                ) {
                    Ok(proof) => proof,
                    Err(err) => {
                        self.phase = Phase::Rejected;
                        return Err(err.into());
                    }
                };

                self.session_id = challenge.header.session_id;

                let mut reply = RegisterChallenge2::new(self.session_id, proof.to_vec());
                reply.header.sequence = self.next_sequence;
                reply.header.acknowledgement = challenge.header.sequence;
                self.next_sequence += 1;

                // The shared secret is derived; from the agent's point of
                // view the session is established once the proof is out.
                self.phase = Phase::Established;
                Ok(Some(reply.serialize()))
            }

            (Phase::Established, Datagram::PushSchemas(push)) => {
                self.tasks.extend(push.schemas);
                Ok(None)
            }

            (_, datagram) => {
                let session_id = datagram.header().session_id;
                Ok(Some(self.reject(session_id)))
            }
        }
    }

    /// Serialize a schema push and remember the schemas for metric encoding.
    ///
    /// Requires an established session.
    pub fn push_schemas(
        &mut self,
        schemas: BTreeMap<String, TaskSchema>,
    ) -> Result<Vec<u8>, DatagramError> {
        let mut push = PushSchemas::new(self.session_id, schemas);
        push.header.sequence = self.next_sequence;
        push.header.acknowledgement = self.last_peer_sequence;

        let bytes = push.serialize(&self.ecdhe)?;
        self.next_sequence += 1;
        self.tasks.extend(push.schemas);
        Ok(bytes)
    }

    /// Serialize a metric report for one task.
    ///
    /// The task must be known to this session, either pushed by
    /// [`AgentSession::push_schemas`] or received from the peer.
    pub fn send_metric(
        &mut self,
        task_id: &str,
        metric: TaskMetric,
    ) -> Result<Vec<u8>, DatagramError> {
        let mut report = SendMetrics::new(self.session_id, task_id, metric);
        report.header.sequence = self.next_sequence;
        report.header.acknowledgement = self.last_peer_sequence;

        let bytes = report.serialize(&self.ecdhe, &self.tasks)?;
        self.next_sequence += 1;
        Ok(bytes)
    }

    fn reject(&mut self, session_id: SessionId) -> Vec<u8> {
        self.phase = Phase::Rejected;
        let mut reply = ConnectionRejected::new(session_id);
        reply.header.sequence = self.next_sequence;
        reply.header.acknowledgement = self.last_peer_sequence;
        self.next_sequence += 1;
        reply.serialize()
    }
}

/// The wire type the machine is prepared to process in a phase; used to
/// report misuse of the sending side.
fn awaited_type(phase: Phase) -> u32 {
    match phase {
        Phase::AwaitRegister => TYPE_REQUEST_REGISTER,
        Phase::AwaitChallenge => TYPE_REGISTER_CHALLENGE,
        Phase::AwaitChallenge2 => TYPE_REGISTER_CHALLENGE2,
        Phase::Established => TYPE_PUSH_SCHEMAS,
        Phase::Rejected => TYPE_CONNECTION_REJECTED,
    }
}
