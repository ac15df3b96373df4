//! Session state for one invocation
//!
//! A [`Session`] records the ephemeral resources an invocation created. It is
//! owned by the invocation and passed by reference into each phase; only the
//! container manager's start routines record handles and only cleanup takes
//! them out again.

use std::fmt;

use tracing::warn;
use uuid::Uuid;

/// Role of a container within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRole {
    Main,
    Sidecar,
}

impl ContainerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerRole::Main => "main",
            ContainerRole::Sidecar => "sidecar",
        }
    }
}

impl fmt::Display for ContainerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A started container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub role: ContainerRole,
}

/// A created private network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub id: String,
}

/// Resources owned by the current invocation
#[derive(Debug)]
pub struct Session {
    /// Unique session ID
    pub session_id: Uuid,

    main: Option<ContainerHandle>,
    sidecar: Option<ContainerHandle>,
    network: Option<NetworkHandle>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            main: None,
            sidecar: None,
            network: None,
        }
    }

    pub fn main(&self) -> Option<&ContainerHandle> {
        self.main.as_ref()
    }

    pub fn sidecar(&self) -> Option<&ContainerHandle> {
        self.sidecar.as_ref()
    }

    pub fn network(&self) -> Option<&NetworkHandle> {
        self.network.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_none() && self.sidecar.is_none() && self.network.is_none()
    }

    pub(crate) fn record_container(&mut self, handle: ContainerHandle) {
        match handle.role {
            ContainerRole::Main => self.main = Some(handle),
            ContainerRole::Sidecar => self.sidecar = Some(handle),
        }
    }

    pub(crate) fn record_network(&mut self, handle: NetworkHandle) {
        self.network = Some(handle);
    }

    pub(crate) fn take_main(&mut self) -> Option<ContainerHandle> {
        self.main.take()
    }

    pub(crate) fn take_sidecar(&mut self) -> Option<ContainerHandle> {
        self.sidecar.take()
    }

    pub(crate) fn take_network(&mut self) -> Option<NetworkHandle> {
        self.network.take()
    }

    pub(crate) fn clear(&mut self) {
        self.main = None;
        self.sidecar = None;
        self.network = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.is_empty() {
            warn!(
                session_id = %self.session_id,
                main = ?self.main.as_ref().map(|h| &h.id),
                sidecar = ?self.sidecar.as_ref().map(|h| &h.id),
                network = ?self.network.as_ref().map(|h| &h.id),
                "Session dropped before cleanup; resources may be orphaned"
            );
        }
    }
}
