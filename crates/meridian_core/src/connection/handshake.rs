//! Three-way link handshake.
//!
//! The initiator sends `Syn`, the acceptor answers `SynAck`, the initiator
//! finishes with `Ack`. Control frames travel through the normal codec under
//! the reserved [`CONTROL_SERVICE`] name, so no RPC service can collide with
//! them.
//!
//! [`Handshake`] is a pure state machine: it never touches a transport, which
//! keeps every transition testable without I/O.

use crate::codec::{self, Frame};
use crate::error::{CoreError, Result};
use crate::types::{PeerId, Role};
use crate::utils::current_timestamp_millis;
use serde::{Deserialize, Serialize};

/// Service name reserved for link control frames.
pub const CONTROL_SERVICE: &str = "$link";

const SYN: &str = "syn";
const SYN_ACK: &str = "synack";
const ACK: &str = "ack";
const CLOSED: &str = "closed";

/// Lifecycle of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Open,
    Closing,
    Closed,
}

/// Why a link ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    HandshakeFailed,
    HandshakeTimeout,
    ClosedByPeer,
    ClosedLocally,
    TransportLost,
    HostStopped,
}

/// Which end of the handshake this side plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeSide {
    Initiator,
    Acceptor,
}

/// Link control messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Opens a handshake. `role` is the initiator's own role, checked by the
    /// acceptor so that exactly one side of a link is authoritative.
    Syn { initiator: PeerId, role: Role },
    SynAck { initiator: PeerId, acceptor: PeerId },
    Ack { initiator: PeerId },
    /// Application-level close notification sent before the transport closes.
    Closed,
}

impl ControlMessage {
    pub fn to_frame(&self) -> Frame {
        let (method, args) = match self {
            ControlMessage::Syn { initiator, role } => {
                (SYN, crate::args![initiator, role])
            }
            ControlMessage::SynAck {
                initiator,
                acceptor,
            } => (SYN_ACK, crate::args![initiator, acceptor]),
            ControlMessage::Ack { initiator } => (ACK, crate::args![initiator]),
            ControlMessage::Closed => (CLOSED, crate::args![]),
        };
        Frame::new(CONTROL_SERVICE, method, current_timestamp_millis(), args)
    }

    pub fn encode(&self) -> Result<String> {
        self.to_frame().encode()
    }

    /// Interprets a decoded frame as a control message.
    ///
    /// Returns `Ok(None)` for ordinary RPC frames and an error for a control
    /// frame with an unknown method or bad arguments.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>> {
        if frame.service != CONTROL_SERVICE {
            return Ok(None);
        }
        let peer = |index: usize| -> Result<PeerId> {
            frame
                .args
                .get(index)
                .and_then(|token| token.parse().ok())
                .ok_or_else(|| {
                    CoreError::HandshakeFailed(format!(
                        "'{}' frame has no valid peer id at argument {}",
                        frame.method, index
                    ))
                })
        };
        let message = match frame.method.as_str() {
            SYN => {
                let role = frame
                    .args
                    .get(1)
                    .and_then(|token| token.parse::<Role>().ok())
                    .ok_or_else(|| {
                        CoreError::HandshakeFailed("'syn' frame has no valid role".to_string())
                    })?;
                ControlMessage::Syn {
                    initiator: peer(0)?,
                    role,
                }
            }
            SYN_ACK => ControlMessage::SynAck {
                initiator: peer(0)?,
                acceptor: peer(1)?,
            },
            ACK => ControlMessage::Ack {
                initiator: peer(0)?,
            },
            CLOSED => ControlMessage::Closed,
            other => {
                return Err(CoreError::HandshakeFailed(format!(
                    "unknown control method '{}'",
                    other
                )))
            }
        };
        Ok(Some(message))
    }
}

/// Returns true when `frame` is an encoded `closed` notification.
pub fn is_close_notification(frame: &str) -> bool {
    matches!(
        codec::decode(frame).map(|f| ControlMessage::from_frame(&f)),
        Ok(Ok(Some(ControlMessage::Closed)))
    )
}

/// What the caller must do after feeding a frame to the handshake.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Control message to send back, if any.
    pub reply: Option<ControlMessage>,
    /// The link just reached [`ConnectionState::Open`].
    pub opened: bool,
}

/// Handshake state machine for one side of one link.
#[derive(Debug)]
pub struct Handshake {
    side: HandshakeSide,
    local_id: PeerId,
    role: Role,
    state: ConnectionState,
    remote_id: Option<PeerId>,
    close_reason: Option<CloseReason>,
}

impl Handshake {
    pub fn new(side: HandshakeSide, local_id: PeerId, role: Role) -> Self {
        Self {
            side,
            local_id,
            role,
            state: ConnectionState::Connecting,
            remote_id: None,
            close_reason: None,
        }
    }

    pub fn initiator(local_id: PeerId, role: Role) -> Self {
        Self::new(HandshakeSide::Initiator, local_id, role)
    }

    pub fn acceptor(local_id: PeerId, role: Role) -> Self {
        Self::new(HandshakeSide::Acceptor, local_id, role)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn side(&self) -> HandshakeSide {
        self.side
    }

    /// The remote peer id, known once the first control frame is accepted.
    pub fn remote_id(&self) -> Option<PeerId> {
        self.remote_id
    }

    /// Local role on this link, available once the link is open.
    pub fn role(&self) -> Option<Role> {
        (self.state == ConnectionState::Open).then_some(self.role)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Moves to `Handshaking`. The initiator gets its `Syn` to send.
    pub fn begin(&mut self) -> Option<ControlMessage> {
        if self.state != ConnectionState::Connecting {
            return None;
        }
        self.state = ConnectionState::Handshaking;
        match self.side {
            HandshakeSide::Initiator => Some(ControlMessage::Syn {
                initiator: self.local_id,
                role: self.role,
            }),
            HandshakeSide::Acceptor => None,
        }
    }

    /// Feeds one raw frame received during the handshake.
    ///
    /// Any malformed, unexpected or inconsistent frame closes the handshake
    /// with [`CloseReason::HandshakeFailed`] and returns the cause.
    pub fn receive(&mut self, raw: &str) -> Result<HandshakeOutcome> {
        let parsed = codec::decode(raw).and_then(|frame| ControlMessage::from_frame(&frame));
        let message = match parsed {
            Ok(Some(message)) => message,
            Ok(None) => return Err(self.fail("received an RPC frame before the link opened")),
            Err(e) => return Err(self.fail(&e.to_string())),
        };

        if self.state != ConnectionState::Handshaking {
            return Err(self.fail(&format!("control frame in state {:?}", self.state)));
        }

        match (self.side, self.remote_id, message) {
            (HandshakeSide::Acceptor, None, ControlMessage::Syn { initiator, role }) => {
                if role == self.role {
                    return Err(self.fail(&format!("both sides claim the {} role", role)));
                }
                if initiator == self.local_id {
                    return Err(self.fail("initiator claims this host's own id"));
                }
                self.remote_id = Some(initiator);
                Ok(HandshakeOutcome {
                    reply: Some(ControlMessage::SynAck {
                        initiator,
                        acceptor: self.local_id,
                    }),
                    opened: false,
                })
            }
            (HandshakeSide::Acceptor, Some(expected), ControlMessage::Ack { initiator })
                if initiator == expected =>
            {
                self.state = ConnectionState::Open;
                Ok(HandshakeOutcome {
                    reply: None,
                    opened: true,
                })
            }
            (
                HandshakeSide::Initiator,
                None,
                ControlMessage::SynAck {
                    initiator,
                    acceptor,
                },
            ) if initiator == self.local_id => {
                if acceptor == self.local_id {
                    return Err(self.fail("acceptor claims this host's own id"));
                }
                self.remote_id = Some(acceptor);
                self.state = ConnectionState::Open;
                Ok(HandshakeOutcome {
                    reply: Some(ControlMessage::Ack {
                        initiator: self.local_id,
                    }),
                    opened: true,
                })
            }
            (_, _, message) => Err(self.fail(&format!("unexpected {:?}", message))),
        }
    }

    /// Gives up on a handshake that did not finish in time.
    pub fn expire(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Handshaking
        ) {
            self.state = ConnectionState::Closed;
            self.close_reason = Some(CloseReason::HandshakeTimeout);
        }
    }

    fn fail(&mut self, cause: &str) -> CoreError {
        self.state = ConnectionState::Closed;
        self.close_reason = Some(CloseReason::HandshakeFailed);
        CoreError::HandshakeFailed(cause.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(message: &ControlMessage) -> String {
        message.encode().unwrap()
    }

    #[test]
    fn three_way_handshake_opens_both_sides_with_complementary_roles() {
        let client_id = PeerId::new();
        let server_id = PeerId::new();
        let mut client = Handshake::initiator(client_id, Role::Slave);
        let mut server = Handshake::acceptor(server_id, Role::Master);

        let syn = client.begin().unwrap();
        assert!(server.begin().is_none());
        assert_eq!(client.state(), ConnectionState::Handshaking);

        let synack = server.receive(&wire(&syn)).unwrap();
        assert!(!synack.opened);
        let ack = client.receive(&wire(&synack.reply.unwrap())).unwrap();
        assert!(ack.opened);
        let done = server.receive(&wire(&ack.reply.unwrap())).unwrap();
        assert!(done.opened && done.reply.is_none());

        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(server.state(), ConnectionState::Open);
        assert_eq!(client.remote_id(), Some(server_id));
        assert_eq!(server.remote_id(), Some(client_id));

        let roles = [client.role().unwrap(), server.role().unwrap()];
        assert_eq!(roles.iter().filter(|r| r.is_authoritative()).count(), 1);
    }

    #[test]
    fn out_of_order_frame_fails_the_handshake() {
        let mut server = Handshake::acceptor(PeerId::new(), Role::Master);
        server.begin();
        let ack = ControlMessage::Ack {
            initiator: PeerId::new(),
        };
        assert!(server.receive(&wire(&ack)).is_err());
        assert_eq!(server.state(), ConnectionState::Closed);
        assert_eq!(server.close_reason(), Some(CloseReason::HandshakeFailed));
    }

    #[test]
    fn mismatched_initiator_id_fails_the_handshake() {
        let mut client = Handshake::initiator(PeerId::new(), Role::Slave);
        client.begin();
        let synack = ControlMessage::SynAck {
            initiator: PeerId::new(),
            acceptor: PeerId::new(),
        };
        assert!(client.receive(&wire(&synack)).is_err());
        assert_eq!(client.close_reason(), Some(CloseReason::HandshakeFailed));
    }

    #[test]
    fn garbage_and_same_role_fail_the_handshake() {
        let mut server = Handshake::acceptor(PeerId::new(), Role::Master);
        server.begin();
        assert!(server.receive("definitely not a frame").is_err());

        let mut server = Handshake::acceptor(PeerId::new(), Role::Master);
        server.begin();
        let syn = ControlMessage::Syn {
            initiator: PeerId::new(),
            role: Role::Master,
        };
        assert!(server.receive(&wire(&syn)).is_err());
        assert_eq!(server.role(), None);
    }

    #[test]
    fn initiator_claiming_the_acceptor_id_fails_the_handshake() {
        let server_id = PeerId::new();
        let mut server = Handshake::acceptor(server_id, Role::Master);
        server.begin();
        let syn = ControlMessage::Syn {
            initiator: server_id,
            role: Role::Slave,
        };
        assert!(server.receive(&wire(&syn)).is_err());
        assert_eq!(server.remote_id(), None);
        assert_eq!(server.close_reason(), Some(CloseReason::HandshakeFailed));

        let client_id = PeerId::new();
        let mut client = Handshake::initiator(client_id, Role::Slave);
        client.begin();
        let synack = ControlMessage::SynAck {
            initiator: client_id,
            acceptor: client_id,
        };
        assert!(client.receive(&wire(&synack)).is_err());
        assert_eq!(client.close_reason(), Some(CloseReason::HandshakeFailed));
    }

    #[test]
    fn expiry_closes_with_timeout() {
        let mut client = Handshake::initiator(PeerId::new(), Role::Slave);
        client.begin();
        client.expire();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.close_reason(), Some(CloseReason::HandshakeTimeout));
    }

    #[test]
    fn close_notification_is_recognised() {
        assert!(is_close_notification(&wire(&ControlMessage::Closed)));
        let rpc = codec::encode::<&str>("Chat", "Say", 1, &[]).unwrap();
        assert!(!is_close_notification(&rpc));
    }
}
