//! JSON wire format of the signaling relay

use serde::{Deserialize, Serialize};

use crate::errors::AvatarError;

/// A connectivity candidate as exchanged over the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index: index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A local or remote session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn into_message(self) -> SignalingMessage {
        match self.kind {
            SdpKind::Offer => SignalingMessage::Offer { sdp: self.sdp },
            SdpKind::Answer => SignalingMessage::Answer { sdp: self.sdp },
        }
    }
}

/// Messages relayed between the two room participants
///
/// Unknown fields (such as the relay's `sender`) are ignored on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    #[serde(alias = "ice_candidate")]
    Candidate {
        candidate: IceCandidate,
    },
    Ping,
    Pong,
    UserDisconnected {
        user_id: String,
    },
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
            SignalingMessage::Ping => "ping",
            SignalingMessage::Pong => "pong",
            SignalingMessage::UserDisconnected { .. } => "user_disconnected",
        }
    }

    pub fn encode(&self) -> Result<String, AvatarError> {
        serde_json::to_string(self)
            .map_err(|e| AvatarError::MalformedMessage(format!("encode {}: {}", self.kind(), e)))
    }

    pub fn decode(text: &str) -> Result<Self, AvatarError> {
        serde_json::from_str(text).map_err(|e| AvatarError::MalformedMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_shape() {
        let json = SignalingMessage::Offer {
            sdp: "v=0".to_string(),
        }
        .encode()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "offer");
        assert_eq!(value["sdp"], "v=0");
    }

    #[test]
    fn test_candidate_wire_shape() {
        let msg = SignalingMessage::Candidate {
            candidate: IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host", Some("0".into()), Some(0)),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_relay_candidate_alias_and_sender_field() {
        let text = r#"{"type":"ice_candidate","candidate":{"candidate":"c","sdpMid":"a","sdpMLineIndex":1},"sender":"bob"}"#;
        let msg = SignalingMessage::decode(text).unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Candidate {
                candidate: IceCandidate::new("c", Some("a".into()), Some(1))
            }
        );
    }

    #[test]
    fn test_keepalive_and_disconnect() {
        assert_eq!(
            SignalingMessage::decode(r#"{"type":"ping"}"#).unwrap(),
            SignalingMessage::Ping
        );
        assert_eq!(SignalingMessage::Pong.encode().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            SignalingMessage::decode(r#"{"type":"user_disconnected","user_id":"u1"}"#).unwrap(),
            SignalingMessage::UserDisconnected {
                user_id: "u1".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_payloads() {
        for text in [
            "not json",
            r#"{"sdp":"x"}"#,
            r#"{"type":"bye"}"#,
            r#"{"type":"offer"}"#,
            r#"{"type":"candidate","candidate":"flat"}"#,
        ] {
            assert!(
                matches!(SignalingMessage::decode(text), Err(AvatarError::MalformedMessage(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn test_description_into_message() {
        assert_eq!(
            SessionDescription::answer("a").into_message(),
            SignalingMessage::Answer { sdp: "a".into() }
        );
    }
}
