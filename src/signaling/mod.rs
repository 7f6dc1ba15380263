//! Signaling exchange with the room relay
//!
//! Submodules:
//! - `message`: JSON wire format
//! - `policy`: reconnect backoff
//! - `transport`: connector seam and link handles
//! - `ws`: WebSocket connector
//! - `channel`: the room channel driven by a call session

pub mod channel;
pub mod message;
pub mod policy;
pub mod transport;
pub mod ws;

pub use channel::{ChannelEvent, SignalingChannel};
pub use message::{IceCandidate, SdpKind, SessionDescription, SignalingMessage};
pub use policy::ReconnectPolicy;
pub use transport::{
    ChannelObserver, LinkHandle, LinkId, Outbound, SignalingConnector, TransportEvent,
};
pub use ws::WsConnector;

use crate::errors::AvatarError;

pub const DEFAULT_ROOM: &str = "default";

const MAX_ROOM_LEN: usize = 50;

/// Room ids are 1 to 50 characters of `[A-Za-z0-9_-]`
pub fn is_valid_room_id(room: &str) -> bool {
    !room.is_empty()
        && room.len() <= MAX_ROOM_LEN
        && room
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Endpoint of `room` on the relay at `server_url`
pub fn room_url(server_url: &str, room: &str) -> Result<String, AvatarError> {
    if !is_valid_room_id(room) {
        return Err(AvatarError::Config(format!("invalid room id {:?}", room)));
    }
    Ok(format!("{}/ws/{}", server_url.trim_end_matches('/'), room))
}
