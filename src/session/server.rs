//! Server-side sessions and the registry that routes frames to them.

use std::collections::BTreeMap;

use rand::{RngCore, rngs::OsRng};
use zeroize::Zeroize;

use crate::codec::ByteReader;
use crate::core::{CHALLENGE_SIZE, DatagramError, SALT_SIZE};
use crate::crypto::EcdheSession;
use crate::datagram::{
    ConnectionRejected, CryptoMark, Datagram, DatagramType, PrivateHeader, PublicHeader,
    PushSchemas, RegisterChallenge, RequestRegister, SessionId, verify_signature,
};
use crate::spack::{TaskRegistry, TaskSchema};

use super::{Phase, ServerEvent};

/// The server (responder) side of one NetTask session.
///
/// Created by [`ServerSession::accept`] on a valid `RequestRegister`; the
/// server derives its side of the shared secret immediately and verifies the
/// agent's proof when `RegisterChallenge2` arrives.
pub struct ServerSession {
    ecdhe: EcdheSession,
    phase: Phase,
    session_id: SessionId,
    agent_public: Vec<u8>,
    expected_proof: [u8; CHALLENGE_SIZE],
    tasks: TaskRegistry,
    next_sequence: u32,
    last_peer_sequence: u32,
}

impl ServerSession {
    /// Accept a registration request: create the session and the
    /// `RegisterChallenge` reply.
    ///
    /// The server chooses the canonical session id by hashing both ephemeral
    /// public keys with the pre-shared secret, and generates a fresh
    /// challenge and salt for the key derivation.
    pub fn accept(
        request: &RequestRegister,
        pre_shared_secret: &[u8],
    ) -> Result<(Self, Vec<u8>), DatagramError> {
        let mut ecdhe = EcdheSession::new(pre_shared_secret);

        let mut challenge = [0u8; CHALLENGE_SIZE];
        OsRng.fill_bytes(&mut challenge);
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let session_id =
            SessionId::derive(&request.public_key, ecdhe.public_key(), pre_shared_secret);
        let expected_proof =
            ecdhe.derive_shared_secret(&request.public_key, &salt, &challenge)?;

        let mut reply = RegisterChallenge::new(
            session_id,
            ecdhe.public_key().to_vec(),
            challenge.to_vec(),
            salt.to_vec(),
        );
        reply.header.sequence = 0;
        reply.header.acknowledgement = request.header.sequence;

        let session = Self {
            ecdhe,
            phase: Phase::AwaitChallenge2,
            session_id,
            agent_public: request.public_key.clone(),
            expected_proof,
            tasks: TaskRegistry::new(),
            next_sequence: 1,
            last_peer_sequence: request.header.sequence,
        };
        Ok((session, reply.serialize()))
    }

    /// Current handshake phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Check whether the handshake has completed.
    pub fn is_established(&self) -> bool {
        self.phase == Phase::Established
    }

    /// The canonical session id this server chose.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The agent's ephemeral public key from registration.
    pub fn agent_public_key(&self) -> &[u8] {
        &self.agent_public
    }

    /// The task configuration pushed by this session's agent.
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

    /// Process one incoming frame for this session.
    ///
    /// Applies the same disposition rules as the agent side: foreign frames
    /// are swallowed, session-fatal errors move to `Rejected` and propagate,
    /// wrong-phase datagrams and failed proofs are answered with
    /// `ConnectionRejected`.
    pub fn handle(&mut self, bytes: &[u8]) -> Result<ServerEvent, DatagramError> {
        let datagram = match Datagram::deserialize(bytes, Some(&self.ecdhe), Some(&self.tasks)) {
            Ok(datagram) => datagram,
            Err(err) if err.is_silent_drop() => return Ok(ServerEvent::None),
            Err(err) => {
                if err.rejects_session() {
                    self.phase = Phase::Rejected;
                }
                return Err(err);
            }
        };

        // The id the server chose is echoed in every later datagram; the
        // public header is cleartext, so check the echo explicitly.
        if datagram.header().session_id != self.session_id {
            return Ok(self.reject());
        }

        self.last_peer_sequence = datagram.header().sequence;

        match (self.phase, datagram) {
            (Phase::Rejected, _) => Ok(ServerEvent::None),

            (_, Datagram::ConnectionRejected(_)) => {
                self.phase = Phase::Rejected;
                Ok(ServerEvent::None)
            }

            (Phase::AwaitChallenge2, Datagram::RegisterChallenge2(response)) => {
                if response.challenge_response == self.expected_proof {
                    self.phase = Phase::Established;
                    Ok(ServerEvent::None)
                } else {
                    Ok(self.reject())
                }
            }

            (Phase::Established, Datagram::PushSchemas(push)) => {
                let names = push.schemas.keys().cloned().collect();
                self.tasks.extend(push.schemas);
                Ok(ServerEvent::SchemasUpdated {
                    session_id: self.session_id,
                    tasks: names,
                })
            }

            (Phase::Established, Datagram::SendMetrics(report)) => Ok(ServerEvent::Metric {
                session_id: self.session_id,
                task_id: report.task_id,
                metric: report.metric,
            }),

            (_, _) => Ok(self.reject()),
        }
    }

    /// Serialize a schema push towards the agent and remember the schemas.
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

    fn reject(&mut self) -> ServerEvent {
        self.phase = Phase::Rejected;
        let mut reply = ConnectionRejected::new(self.session_id);
        reply.header.sequence = self.next_sequence;
        reply.header.acknowledgement = self.last_peer_sequence;
        self.next_sequence += 1;
        ServerEvent::Reply {
            session_id: self.session_id,
            bytes: reply.serialize(),
        }
    }
}

/// All live server sessions, keyed by session id.
///
/// Routes incoming frames: fresh `RequestRegister` datagrams open sessions,
/// everything else is dispatched by the session id in the public header.
/// Rejected sessions are dropped on the spot.
pub struct ServerSessionRegistry {
    pre_shared: Vec<u8>,
    sessions: BTreeMap<SessionId, ServerSession>,
    agents: BTreeMap<Vec<u8>, SessionId>,
}

impl ServerSessionRegistry {
    /// Create a registry for one pre-shared secret.
    pub fn new(pre_shared_secret: &[u8]) -> Self {
        Self {
            pre_shared: pre_shared_secret.to_vec(),
            sessions: BTreeMap::new(),
            agents: BTreeMap::new(),
        }
    }

    /// Process one incoming frame, routing it to its session.
    pub fn handle(&mut self, bytes: &[u8]) -> Result<ServerEvent, DatagramError> {
        let mut reader = ByteReader::new(bytes);
        if !verify_signature(&mut reader) {
            return Ok(ServerEvent::None);
        }
        let public = PublicHeader::deserialize(&mut reader)?;

        if public.crypto_mark == CryptoMark::Cleartext && is_register_request(reader.clone()) {
            let Datagram::RequestRegister(request) = Datagram::deserialize(bytes, None, None)?
            else {
                return Err(DatagramError::MalformedPayload(
                    "register request changed type under parse".into(),
                ));
            };
            return self.register(&request);
        }

        let Some(session) = self.sessions.get_mut(&public.session_id) else {
            // Unknown session id: answer with a rejection for that id.
            return Ok(ServerEvent::Reply {
                session_id: public.session_id,
                bytes: ConnectionRejected::new(public.session_id).serialize(),
            });
        };

        let result = session.handle(bytes);
        if session.phase() == Phase::Rejected {
            self.drop_session(public.session_id);
        }
        result
    }

    /// Open a session for a registration request.
    fn register(&mut self, request: &RequestRegister) -> Result<ServerEvent, DatagramError> {
        // A known agent key registering again is a duplicate registration.
        if self.agents.contains_key(&request.public_key) {
            return Ok(ServerEvent::Reply {
                session_id: request.header.session_id,
                bytes: ConnectionRejected::new(request.header.session_id).serialize(),
            });
        }

        let (session, reply) = ServerSession::accept(request, &self.pre_shared)?;
        let session_id = session.session_id();
        self.agents.insert(request.public_key.clone(), session_id);
        self.sessions.insert(session_id, session);
        Ok(ServerEvent::Reply {
            session_id,
            bytes: reply,
        })
    }

    /// Look up a session.
    pub fn get(&self, session_id: &SessionId) -> Option<&ServerSession> {
        self.sessions.get(session_id)
    }

    /// Mutably look up a session.
    pub fn get_mut(&mut self, session_id: &SessionId) -> Option<&mut ServerSession> {
        self.sessions.get_mut(session_id)
    }

    /// Remove a session and forget its agent key.
    pub fn remove(&mut self, session_id: &SessionId) -> Option<ServerSession> {
        self.drop_session(*session_id)
    }

    /// Iterate live session ids.
    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.keys()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn drop_session(&mut self, session_id: SessionId) -> Option<ServerSession> {
        let session = self.sessions.remove(&session_id)?;
        self.agents.remove(&session.agent_public);
        Some(session)
    }
}

impl Drop for ServerSessionRegistry {
    fn drop(&mut self) {
        self.pre_shared.zeroize();
    }
}

/// Peek whether the cleartext body ahead is a `RequestRegister` header.
fn is_register_request(mut reader: ByteReader<'_>) -> bool {
    matches!(
        PrivateHeader::deserialize(&mut reader),
        Ok(header) if header.datagram_type == DatagramType::RequestRegister
    )
}
