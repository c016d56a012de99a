//! The identifier quadruple: `ConnectionId` is the root,
//! `SessionId`/`ProducerId`/`ConsumerId` nest under it, and `MessageId`
//! nests under a `ProducerId`. Removing a parent id implies removal of
//! every child; `belongs_to`/`belongs_to_session` give the failover
//! state-replay path a cheap way to test that.

use std::fmt;

/// Opaque connection identifier, assigned by the broker side of the
/// handshake and echoed back on every subsequent command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub connection_id: ConnectionId,
    pub value: u64,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection_id, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId {
    pub connection_id: ConnectionId,
    pub session_value: u64,
    pub value: u64,
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.connection_id, self.session_value, self.value
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId {
    pub connection_id: ConnectionId,
    pub session_value: u64,
    pub value: u64,
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.connection_id, self.session_value, self.value
        )
    }
}

/// `(ProducerId, producer_sequence)`; the unit the duplicate audit and
/// redelivery bookkeeping operate on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub producer_id: ProducerId,
    pub producer_sequence: u64,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.producer_id, self.producer_sequence)
    }
}

impl SessionId {
    pub fn belongs_to(&self, connection_id: &ConnectionId) -> bool {
        &self.connection_id == connection_id
    }
}

impl ProducerId {
    pub fn belongs_to_session(&self, session_id: &SessionId) -> bool {
        self.connection_id == session_id.connection_id && self.session_value == session_id.value
    }
}

impl ConsumerId {
    pub fn belongs_to_session(&self, session_id: &SessionId) -> bool {
        self.connection_id == session_id.connection_id && self.session_value == session_id.value
    }
}
