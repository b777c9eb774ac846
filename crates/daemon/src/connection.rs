//! Per-client connection state.
//!
//! Exactly one [`ClientConnection`] exists per accepted command-channel
//! socket. The connection owns an ordered set of disposables (bundles it
//! was issued, plus anything else registered against it) that is released
//! exactly once when the socket closes.

use std::net::SocketAddr;
use std::sync::Mutex;

use uuid::Uuid;

use crate::dispose::DisposableSet;

/// Lifecycle of a connection.
///
/// `Connecting → Active → Disposing → Closed`; transitions never go
/// backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted at the transport level, not yet activated. The address
    /// policy runs before the connection is constructed, so in the live
    /// path this state is only held briefly; it exists so a socket that
    /// dies before activation still tears down through `begin_dispose`.
    Connecting,
    /// Commands are being routed.
    Active,
    /// Disconnect observed, owned disposables being released.
    Disposing,
    /// Fully torn down and removed from the live-connection list.
    Closed,
}

/// One live client connection on the command channel.
pub struct ClientConnection {
    id: Uuid,
    addr: SocketAddr,
    state: Mutex<ConnectionState>,
    disposables: DisposableSet,
}

impl ClientConnection {
    /// Create a connection for an accepted socket.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            state: Mutex::new(ConnectionState::Connecting),
            disposables: DisposableSet::new(),
        }
    }

    /// Connection identity, unique per accepted socket.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Originating address of the peer.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state poisoned")
    }

    /// The connection's owned disposables.
    pub fn disposables(&self) -> &DisposableSet {
        &self.disposables
    }

    /// Mark the connection active once the address policy passed.
    pub fn activate(&self) {
        let mut state = self.state.lock().expect("connection state poisoned");
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Active;
        }
    }

    /// Begin teardown. Returns true exactly once; later calls see the
    /// connection already disposing or closed and do nothing.
    pub fn begin_dispose(&self) -> bool {
        let mut state = self.state.lock().expect("connection state poisoned");
        match *state {
            ConnectionState::Connecting | ConnectionState::Active => {
                *state = ConnectionState::Disposing;
                true
            }
            ConnectionState::Disposing | ConnectionState::Closed => false,
        }
    }

    /// Mark teardown complete.
    pub fn mark_closed(&self) {
        let mut state = self.state.lock().expect("connection state poisoned");
        *state = ConnectionState::Closed;
    }
}
