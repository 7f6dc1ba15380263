//! Peer call orchestration over the signaling channel

pub mod event;
pub mod peer;
pub mod session;
pub mod state;

pub use event::{CallCommand, CallEvent, CallHandle, EventSink};
pub use peer::{IceConnectionState, PeerConnector, PeerEvent, PeerLink, PeerObserver};
pub use session::CallSession;
pub use state::CallState;
