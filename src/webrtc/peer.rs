use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::call::{IceConnectionState, PeerConnector, PeerEvent, PeerLink, PeerObserver};
use crate::config::RtcConfig;
use crate::errors::AvatarError;
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl From<IceServer> for RTCIceServer {
    fn from(server: IceServer) -> Self {
        RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => IceConnectionState::New,
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        }
    }
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = AvatarError;

    fn try_from(desc: SessionDescription) -> Result<Self, Self::Error> {
        let parsed = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        parsed.map_err(|e| AvatarError::Negotiation(format!("Invalid SDP: {}", e)))
    }
}

fn negotiation(context: &str, e: impl std::fmt::Display) -> AvatarError {
    AvatarError::Negotiation(format!("{}: {}", context, e))
}

/// Builds peer connections with one local audio and one local video track
pub struct RtcPeerConnector {
    ice_servers: Vec<IceServer>,
}

impl RtcPeerConnector {
    pub fn new(config: &RtcConfig) -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: config.ice_servers.clone(),
                username: None,
                credential: None,
            }],
        }
    }

    pub fn with_ice_servers(ice_servers: Vec<IceServer>) -> Self {
        Self { ice_servers }
    }

    async fn build(&self) -> Result<Arc<RTCPeerConnection>, AvatarError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| negotiation("Failed to register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| negotiation("Failed to register interceptors", e))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = webrtc::peer_connection::configuration::RTCConfiguration {
            ice_servers: self.ice_servers.iter().cloned().map(Into::into).collect(),
            bundle_policy: RTCBundlePolicy::MaxBundle,
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| negotiation("Failed to create peer connection", e))?;
        Ok(Arc::new(pc))
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn connect(
        &self,
        generation: u64,
        observer: Arc<dyn PeerObserver>,
    ) -> Result<Box<dyn PeerLink>, AvatarError> {
        let pc = self.build().await?;

        let candidate_observer = observer.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        log::debug!("ICE candidate gathered for generation {}", generation);
                        candidate_observer
                            .on_peer_event(generation, PeerEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => log::warn!("Unserializable ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let state_observer = observer;
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            state_observer.on_peer_event(generation, PeerEvent::IceConnectionState(state.into()));
            Box::pin(async {})
        }));

        let mut senders = Vec::new();
        for (mime, kind) in [(MIME_TYPE_OPUS, "audio"), (MIME_TYPE_VP8, "video")] {
            let track: Arc<dyn TrackLocal + Send + Sync> = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime.to_owned(),
                    ..Default::default()
                },
                kind.to_owned(),
                "crabavatar".to_owned(),
            ));
            let sender = pc
                .add_track(track)
                .await
                .map_err(|e| AvatarError::DeviceUnavailable(format!("{} track: {}", kind, e)))?;
            senders.push(sender);
        }

        log::info!("Created peer connection generation {}", generation);
        Ok(Box::new(RtcPeer {
            generation,
            pc,
            senders: Mutex::new(senders),
        }))
    }
}

/// One peer connection and its outgoing tracks
pub struct RtcPeer {
    generation: u64,
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

#[async_trait]
impl PeerLink for RtcPeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, AvatarError> {
        log::info!(
            "Creating SDP offer for generation {} (ice restart: {})",
            self.generation,
            ice_restart
        );
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| negotiation("Failed to create offer", e))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| negotiation("Failed to set local description", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn rollback_offer(&self) -> Result<(), AvatarError> {
        if self.pc.signaling_state() != RTCSignalingState::HaveLocalOffer {
            return Ok(());
        }
        // An empty rollback SDP is rejected, so echo the pending offer back.
        let Some(pending) = self.pc.pending_local_description().await else {
            return Ok(());
        };
        log::info!("Rolling back local offer for generation {}", self.generation);
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        rollback.sdp = pending.sdp;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|e| negotiation("Failed to roll back local offer", e))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, AvatarError> {
        let remote: RTCSessionDescription = offer.try_into()?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| negotiation("Failed to set remote description", e))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| negotiation("Failed to create answer", e))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| negotiation("Failed to set local description", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_answer(&self, answer: SessionDescription) -> Result<(), AvatarError> {
        let remote: RTCSessionDescription = answer.try_into()?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| negotiation("Failed to set remote description", e))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), AvatarError> {
        log::debug!("Adding remote ICE candidate: {}", candidate.candidate);
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| negotiation("Failed to add ICE candidate", e))
    }

    async fn close(&self) {
        for sender in self.senders.lock().await.drain(..) {
            if let Err(e) = sender.stop().await {
                log::debug!("Stopping sender failed: {}", e);
            }
        }
        if let Err(e) = self.pc.close().await {
            log::warn!("Closing peer connection {} failed: {}", self.generation, e);
        }
        log::info!("Closed peer connection generation {}", self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AvatarConfig;

    struct Ignore;

    impl PeerObserver for Ignore {
        fn on_peer_event(&self, _generation: u64, _event: PeerEvent) {}
    }

    async fn peer() -> Box<dyn PeerLink> {
        let connector = RtcPeerConnector::new(&AvatarConfig::default().rtc);
        connector.connect(1, Arc::new(Ignore)).await.unwrap()
    }

    #[tokio::test]
    async fn test_offer_contains_audio_and_video() {
        let peer = peer().await;
        let offer = peer.create_offer(false).await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.starts_with("v=0"));
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        peer.close().await;
    }

    #[tokio::test]
    async fn test_two_peers_negotiate() {
        let caller = peer().await;
        let callee = peer().await;

        let offer = caller.create_offer(false).await.unwrap();
        let answer = callee.accept_offer(offer).await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        caller.set_remote_answer(answer).await.unwrap();

        caller.close().await;
        callee.close().await;
    }

    #[tokio::test]
    async fn test_remote_offer_accepted_after_rollback() {
        let us = peer().await;
        let them = peer().await;

        us.create_offer(false).await.unwrap();
        let glare = them.create_offer(false).await.unwrap();
        assert!(matches!(
            us.accept_offer(glare.clone()).await,
            Err(AvatarError::Negotiation(_))
        ));

        us.rollback_offer().await.unwrap();
        let answer = us.accept_offer(glare).await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        them.set_remote_answer(answer).await.unwrap();

        // Nothing left to roll back.
        us.rollback_offer().await.unwrap();

        us.close().await;
        them.close().await;
    }

    #[tokio::test]
    async fn test_garbage_answer_is_negotiation_error() {
        let peer = peer().await;
        peer.create_offer(false).await.unwrap();
        let result = peer
            .set_remote_answer(SessionDescription::answer("not sdp"))
            .await;
        assert!(matches!(result, Err(AvatarError::Negotiation(_))));
        peer.close().await;
    }

    #[test]
    fn test_ice_state_mapping() {
        assert_eq!(
            IceConnectionState::from(RTCIceConnectionState::Failed),
            IceConnectionState::Failed
        );
        assert_eq!(
            IceConnectionState::from(RTCIceConnectionState::Unspecified),
            IceConnectionState::New
        );
    }
}
