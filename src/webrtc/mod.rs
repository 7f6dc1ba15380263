/// Peer connections over the `webrtc` crate
///
/// Implements the call layer's peer seam with real ICE/DTLS/SRTP
/// connections carrying one local audio and one local video track.
pub mod peer;

pub use peer::{IceServer, RtcPeer, RtcPeerConnector};
