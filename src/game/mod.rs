//! Game simulation modules

pub mod bots;
pub mod combat;
pub mod gateway;
pub mod leveling;
pub mod r#match;
pub mod physics;
pub mod player;
pub mod presence;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod upgrades;
pub mod zones;

pub use r#match::{GameMatch, MatchHandle};

use std::fmt;

use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Transport-level identity of a controller connection.
///
/// Every transport gets a fresh session id, so two overlapping sockets from
/// the same phone never share an entry. Device sockets also carry the
/// device id, which is only used to find the player on rejoin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionHandle {
    Socket(Uuid),
    Device { device_id: String, session: Uuid },
}

impl ConnectionHandle {
    pub fn new_socket() -> Self {
        Self::Socket(Uuid::new_v4())
    }

    pub fn new_device(device_id: impl Into<String>) -> Self {
        Self::Device {
            device_id: device_id.into(),
            session: Uuid::new_v4(),
        }
    }

    /// Device id reported by the transport, if any
    pub fn device_id(&self) -> Option<&str> {
        match self {
            ConnectionHandle::Socket(_) => None,
            ConnectionHandle::Device { device_id, .. } => Some(device_id.as_str()),
        }
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionHandle::Socket(id) => write!(f, "socket:{}", id),
            ConnectionHandle::Device { device_id, session } => {
                write!(f, "device:{}/{}", device_id, session)
            }
        }
    }
}

/// Something that happened on a connection, queued for the match loop
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub connection: ConnectionHandle,
    pub kind: InputKind,
}

#[derive(Debug, Clone)]
pub enum InputKind {
    /// Transport opened
    Connected,
    /// Controller message
    Message(ClientMsg),
    /// Transport closed or errored
    Closed,
}

/// Who an outbound message is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Connection(ConnectionHandle),
}

/// Message leaving the match loop
#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Target,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn broadcast(msg: ServerMsg) -> Self {
        Self {
            target: Target::All,
            msg,
        }
    }

    pub fn to(connection: ConnectionHandle, msg: ServerMsg) -> Self {
        Self {
            target: Target::Connection(connection),
            msg,
        }
    }

    /// Whether the given connection should receive this message
    pub fn is_for(&self, connection: &ConnectionHandle) -> bool {
        match &self.target {
            Target::All => true,
            Target::Connection(target) => target == connection,
        }
    }
}
