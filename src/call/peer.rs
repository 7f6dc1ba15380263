//! Peer-connection seam
//!
//! A [`PeerConnector`] acquires local media and builds one peer connection per
//! generation. The session bumps the generation on every full reconnect, so
//! late events from a discarded connection are recognisable.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AvatarError;
use crate::signaling::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    IceConnectionState(IceConnectionState),
}

pub trait PeerObserver: Send + Sync {
    fn on_peer_event(&self, generation: u64, event: PeerEvent);
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Acquire media and create a connection with local tracks attached.
    ///
    /// Fails with `PermissionDenied` or `DeviceUnavailable` when media cannot
    /// be acquired.
    async fn connect(
        &self,
        generation: u64,
        observer: Arc<dyn PeerObserver>,
    ) -> Result<Box<dyn PeerLink>, AvatarError>;
}

#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer and set it as the local description
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, AvatarError>;

    /// Discard an unanswered local offer, returning to a stable signaling
    /// state. A no-op when no local offer is outstanding.
    async fn rollback_offer(&self) -> Result<(), AvatarError>;

    /// Apply a remote offer and return the local answer.
    ///
    /// Fails while a local offer is outstanding; call `rollback_offer` first.
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, AvatarError>;

    async fn set_remote_answer(&self, answer: SessionDescription) -> Result<(), AvatarError>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), AvatarError>;

    /// Stop local tracks and close the connection
    async fn close(&self);
}
