//! Call session state machine
//!
//! The session is the only consumer of its event queue. Transport, peer and
//! timer callbacks never touch session state directly; they post a tagged
//! [`CallEvent`] and the session applies it in order, so negotiation steps
//! never overlap.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::event::{CallCommand, CallEvent, CallHandle, EventSink};
use super::peer::{IceConnectionState, PeerConnector, PeerEvent, PeerLink, PeerObserver};
use super::state::CallState;
use crate::assert_invariant;
use crate::config::SignalingConfig;
use crate::errors::AvatarError;
use crate::invariant_ppt::{CALL_TRANSITION_ALLOWED, OFFER_FLUSHED_ONCE};
use crate::signaling::{
    self, ChannelEvent, ChannelObserver, IceCandidate, LinkId, ReconnectPolicy,
    SessionDescription, SignalingChannel, SignalingConnector, SignalingMessage,
};

struct PendingOffer {
    id: u64,
    description: SessionDescription,
}

pub struct CallSession {
    id: Uuid,
    url: String,
    policy: ReconnectPolicy,
    connector: Arc<dyn SignalingConnector>,
    peers: Arc<dyn PeerConnector>,
    sink: EventSink,
    events: mpsc::UnboundedReceiver<CallEvent>,
    state: CallState,
    state_tx: watch::Sender<CallState>,
    channel: Option<SignalingChannel>,
    last_link: LinkId,
    peer: Option<Box<dyn PeerLink>>,
    generation: u64,
    pending_offer: Option<PendingOffer>,
    pending_candidates: Vec<IceCandidate>,
    awaiting_answer: bool,
    ice_restarted: bool,
    offers_created: u64,
    last_flushed: Option<u64>,
    last_error: Option<AvatarError>,
}

impl CallSession {
    pub fn new(
        config: &SignalingConfig,
        connector: Arc<dyn SignalingConnector>,
        peers: Arc<dyn PeerConnector>,
    ) -> Result<Self, AvatarError> {
        let url = signaling::room_url(&config.server_url, &config.room)?;
        let (tx, events) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(CallState::Idle);

        Ok(Self {
            id: Uuid::new_v4(),
            url,
            policy: ReconnectPolicy::from_config(config),
            connector,
            peers,
            sink: EventSink::new(tx),
            events,
            state: CallState::Idle,
            state_tx,
            channel: None,
            last_link: 0,
            peer: None,
            generation: 0,
            pending_offer: None,
            pending_candidates: Vec::new(),
            awaiting_answer: false,
            ice_restarted: false,
            offers_created: 0,
            last_flushed: None,
            last_error: None,
        })
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    /// Cause of the most recent `Failed` transition
    pub fn last_error(&self) -> Option<&AvatarError> {
        self.last_error.as_ref()
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle::new(self.sink.clone())
    }

    /// Random id tagging this session's log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn is_channel_open(&self) -> bool {
        self.channel.as_ref().is_some_and(SignalingChannel::is_open)
    }

    pub fn has_pending_offer(&self) -> bool {
        self.pending_offer.is_some()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Current peer generation; bumped by every new peer connection
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reconnect_attempt(&self) -> Option<u32> {
        self.channel.as_ref().map(|c| c.policy().attempt())
    }

    /// Begin a call. A no-op while a call is active; restarts cleanly after `Closed` or `Failed`.
    pub async fn start(&mut self) -> Result<(), AvatarError> {
        if self.state.is_active() {
            log::debug!("start() ignored in {}", self.state);
            return Ok(());
        }
        if self.state.is_terminal() {
            self.transition(CallState::Idle);
        }
        self.last_error = None;
        self.transition(CallState::Connecting);

        if let Err(e) = self.connect_peer().await {
            self.fail(e.clone()).await;
            return Err(e);
        }

        let observer: Arc<dyn ChannelObserver> = Arc::new(self.sink.clone());
        let mut channel = SignalingChannel::new(
            self.url.clone(),
            self.connector.clone(),
            observer,
            self.policy.clone(),
        )
        .continue_from(self.last_link);
        let opened = channel.open();
        self.last_link = channel.last_link();
        self.channel = Some(channel);
        if let Err(e) = opened {
            self.fail(e.clone()).await;
            return Err(e);
        }
        self.transition(CallState::AwaitingChannel);

        // The link opens asynchronously, so this offer is normally buffered.
        if let Err(e) = self.offer(false).await {
            self.fail(e.clone()).await;
            return Err(e);
        }
        Ok(())
    }

    /// Hang up. A no-op when idle or already terminal.
    pub async fn stop(&mut self) {
        if !self.state.is_active() {
            log::debug!("stop() ignored in {}", self.state);
            return;
        }
        self.teardown().await;
        self.transition(CallState::Closed);
    }

    /// Wait for the next queued event
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        self.events.recv().await
    }

    /// Apply every event already queued; returns how many were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Drive the session until a stop command or a terminal failure.
    pub async fn run(&mut self) -> Result<(), AvatarError> {
        while let Some(event) = self.events.recv().await {
            let stop = matches!(event, CallEvent::Command(CallCommand::Stop));
            self.handle_event(event).await;
            if stop {
                return Ok(());
            }
            if self.state == CallState::Failed {
                return Err(self
                    .last_error
                    .clone()
                    .unwrap_or_else(|| AvatarError::InvalidState("call failed".to_string())));
            }
        }
        Ok(())
    }

    pub async fn handle_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Command(CallCommand::Start) => {
                if let Err(e) = self.start().await {
                    log::error!("Call start failed: {}", e);
                }
            }
            CallEvent::Command(CallCommand::Stop) => self.stop().await,
            CallEvent::Transport { link, event } => {
                let Some(channel) = self.channel.as_mut() else {
                    log::debug!("Dropping {:?} from link {} with no channel", event, link);
                    return;
                };
                match channel.on_transport(link, event) {
                    Some(ChannelEvent::Opened) => self.on_channel_open().await,
                    Some(ChannelEvent::Message(message)) => self.on_signal(message).await,
                    Some(ChannelEvent::Closed { .. }) => self.on_channel_closed().await,
                    Some(ChannelEvent::PeerLeft(_)) | None => {}
                }
            }
            CallEvent::Peer { generation, event } => {
                if generation != self.generation || self.peer.is_none() {
                    log::debug!("Dropping {:?} from peer generation {}", event, generation);
                    return;
                }
                match event {
                    PeerEvent::LocalCandidate(candidate) => self.on_local_candidate(candidate),
                    PeerEvent::IceConnectionState(ice) => self.on_ice_state(ice).await,
                }
            }
            CallEvent::ReconnectDue { ticket } => {
                let Some(channel) = self.channel.as_mut() else {
                    return;
                };
                let reopened = channel.on_reconnect_due(ticket);
                self.last_link = channel.last_link();
                if let Err(e) = reopened {
                    self.fail(e).await;
                }
            }
        }
    }

    async fn connect_peer(&mut self) -> Result<(), AvatarError> {
        self.generation += 1;
        let observer: Arc<dyn PeerObserver> = Arc::new(self.sink.clone());
        let peer = self.peers.connect(self.generation, observer).await?;
        log::info!("Peer connection generation {} ready", self.generation);
        self.peer = Some(peer);
        Ok(())
    }

    async fn release_peer(&mut self) {
        if let Some(peer) = self.peer.take() {
            log::debug!("Closing peer generation {}", self.generation);
            peer.close().await;
        }
    }

    /// Create a local offer; it is sent now if the channel is open, buffered otherwise.
    async fn offer(&mut self, ice_restart: bool) -> Result<(), AvatarError> {
        if self.pending_offer.is_some() {
            log::debug!("Offer already pending, not creating another");
            return Ok(());
        }
        let Some(peer) = self.peer.as_ref() else {
            return Err(AvatarError::InvalidState("no peer connection".to_string()));
        };
        let description = peer.create_offer(ice_restart).await?;

        self.offers_created += 1;
        self.pending_offer = Some(PendingOffer {
            id: self.offers_created,
            description,
        });
        self.awaiting_answer = true;

        if self.is_channel_open() {
            self.flush_offer();
        } else {
            log::debug!("Buffered offer {} until the channel opens", self.offers_created);
        }
        Ok(())
    }

    fn flush_offer(&mut self) {
        let Some(pending) = self.pending_offer.take() else {
            return;
        };
        assert_invariant!(
            self.last_flushed != Some(pending.id),
            OFFER_FLUSHED_ONCE,
            "CallSession::flush_offer"
        );

        let message = pending.description.clone().into_message();
        let sent = match self.channel.as_ref() {
            Some(channel) => channel.send(&message),
            None => Err(AvatarError::InvalidState("no signaling channel".to_string())),
        };
        match sent {
            Ok(()) => {
                log::info!("Sent offer {}", pending.id);
                self.last_flushed = Some(pending.id);
            }
            Err(e) => {
                log::warn!("Offer {} not sent, keeping it buffered: {}", pending.id, e);
                self.pending_offer = Some(pending);
            }
        }
    }

    /// Candidates always follow the offer on the wire.
    fn flush_candidates(&mut self) {
        if self.pending_offer.is_some() || self.pending_candidates.is_empty() {
            return;
        }
        let Some(channel) = self.channel.as_ref() else {
            return;
        };

        let queued = std::mem::take(&mut self.pending_candidates);
        let total = queued.len();
        let mut rest = queued.into_iter();
        while let Some(candidate) = rest.next() {
            let message = SignalingMessage::Candidate { candidate };
            if let Err(e) = channel.send(&message) {
                log::warn!("Candidate flush interrupted: {}", e);
                if let SignalingMessage::Candidate { candidate } = message {
                    self.pending_candidates.push(candidate);
                }
                self.pending_candidates.extend(rest);
                return;
            }
        }
        log::debug!("Flushed {} buffered candidates", total);
    }

    async fn on_channel_open(&mut self) {
        if !matches!(
            self.state,
            CallState::AwaitingChannel | CallState::Reconnecting
        ) {
            return;
        }

        let result = if self.pending_offer.is_some() {
            self.flush_offer();
            Ok(())
        } else {
            // The previous link went down with no buffered offer: renegotiate.
            self.awaiting_answer = false;
            self.offer(false).await
        };
        if let Err(e) = result {
            self.fail(e).await;
            return;
        }
        self.flush_candidates();

        if self.state == CallState::AwaitingChannel {
            self.transition(CallState::Negotiating);
        }
    }

    async fn on_channel_closed(&mut self) {
        match self.state {
            CallState::AwaitingChannel | CallState::Reconnecting => {}
            CallState::Negotiating | CallState::Connected => {
                // Any offer already on the wire is lost with the link.
                self.awaiting_answer = false;
                self.transition(CallState::Reconnecting);
            }
            _ => return,
        }
        self.schedule_reopen().await;
    }

    async fn schedule_reopen(&mut self) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        if let Err(e) = channel.schedule_reconnect() {
            self.fail(e).await;
        }
    }

    async fn on_signal(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Answer { sdp } => self.on_remote_answer(sdp).await,
            SignalingMessage::Offer { sdp } => self.on_remote_offer(sdp).await,
            SignalingMessage::Candidate { candidate } => {
                let Some(peer) = self.peer.as_ref() else {
                    return;
                };
                if let Err(e) = peer.add_remote_candidate(candidate).await {
                    log::warn!("Dropping remote candidate: {}", e);
                }
            }
            other => log::debug!("Ignoring {} message", other.kind()),
        }
    }

    async fn on_remote_answer(&mut self, sdp: String) {
        if !self.awaiting_answer
            || !matches!(self.state, CallState::Negotiating | CallState::Reconnecting)
        {
            log::warn!("Dropping unexpected answer in {}", self.state);
            return;
        }
        let Some(peer) = self.peer.as_ref() else {
            return;
        };

        let applied = peer.set_remote_answer(SessionDescription::answer(sdp)).await;
        match applied {
            Ok(()) => {
                self.awaiting_answer = false;
                self.transition(CallState::Connected);
            }
            Err(e) => {
                log::warn!("Remote answer rejected: {}", e);
                self.reconnect_full(e).await;
            }
        }
    }

    async fn on_remote_offer(&mut self, sdp: String) {
        if !matches!(
            self.state,
            CallState::Negotiating | CallState::Connected | CallState::Reconnecting
        ) {
            log::warn!("Dropping unexpected offer in {}", self.state);
            return;
        }
        let Some(peer) = self.peer.as_ref() else {
            return;
        };

        if let Err(e) = peer.rollback_offer().await {
            log::warn!("Remote offer rejected, local offer kept: {}", e);
            return;
        }
        let answer = match peer.accept_offer(SessionDescription::offer(sdp)).await {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!("Remote offer rejected: {}", e);
                return;
            }
        };
        let sent = match self.channel.as_ref() {
            Some(channel) => channel.send(&answer.into_message()),
            None => return,
        };
        if let Err(e) = sent {
            log::warn!("Answer not sent: {}", e);
            return;
        }

        // The remote offer supersedes our own.
        self.pending_offer = None;
        self.awaiting_answer = false;
        self.flush_candidates();
        self.transition(CallState::Connected);
    }

    fn on_local_candidate(&mut self, candidate: IceCandidate) {
        if !self.is_channel_open() || self.pending_offer.is_some() {
            log::debug!("Buffering local candidate until the offer is out");
            self.pending_candidates.push(candidate);
            return;
        }
        let message = SignalingMessage::Candidate { candidate };
        let sent = match self.channel.as_ref() {
            Some(channel) => channel.send(&message),
            None => return,
        };
        if let Err(e) = sent {
            log::debug!("Buffering local candidate: {}", e);
            if let SignalingMessage::Candidate { candidate } = message {
                self.pending_candidates.push(candidate);
            }
        }
    }

    async fn on_ice_state(&mut self, ice: IceConnectionState) {
        match ice {
            IceConnectionState::Failed => self.on_ice_failed().await,
            IceConnectionState::Connected | IceConnectionState::Completed => {
                log::info!("ICE {:?}", ice);
                self.ice_restarted = false;
            }
            IceConnectionState::Disconnected => log::warn!("ICE disconnected"),
            _ => log::debug!("ICE {:?}", ice),
        }
    }

    async fn on_ice_failed(&mut self) {
        if !matches!(
            self.state,
            CallState::Negotiating | CallState::Connected | CallState::Reconnecting
        ) {
            return;
        }

        if self.ice_restarted {
            let cause = AvatarError::Negotiation("ICE failed again after restart".to_string());
            self.reconnect_full(cause).await;
            return;
        }

        log::warn!("ICE failed, attempting an ICE restart");
        self.ice_restarted = true;
        self.transition(CallState::Reconnecting);
        self.pending_offer = None;
        if let Err(e) = self.offer(true).await {
            self.reconnect_full(e).await;
        }
    }

    /// Replace the peer connection and reopen the channel through the backoff policy.
    async fn reconnect_full(&mut self, cause: AvatarError) {
        log::warn!("Full reconnect after: {}", cause);
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        self.release_peer().await;
        self.reset_negotiation();
        self.transition(CallState::Reconnecting);

        if let Err(e) = self.connect_peer().await {
            self.fail(e).await;
            return;
        }
        if let Err(e) = self.offer(false).await {
            self.fail(e).await;
            return;
        }
        self.schedule_reopen().await;
    }

    fn reset_negotiation(&mut self) {
        self.pending_offer = None;
        self.pending_candidates.clear();
        self.awaiting_answer = false;
        self.ice_restarted = false;
    }

    async fn fail(&mut self, error: AvatarError) {
        log::error!("Call {} failed in {}: {}", self.id, self.state, error);
        self.teardown().await;
        self.last_error = Some(error);
        self.transition(CallState::Failed);
    }

    /// Release the peer, the channel and every timer
    async fn teardown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
            self.last_link = channel.last_link();
        }
        self.release_peer().await;
        self.reset_negotiation();
    }

    fn transition(&mut self, to: CallState) {
        let from = self.state;
        assert_invariant!(
            from.can_transition(to),
            CALL_TRANSITION_ALLOWED,
            "CallSession::transition"
        );
        if from == to {
            return;
        }

        log::info!("Call {}: {} -> {}", self.id, from, to);
        self.state = to;
        if to == CallState::Connected {
            if let Some(channel) = self.channel.as_mut() {
                channel.policy_mut().reset();
            }
        }
        self.state_tx.send_replace(to);
    }
}

/// Dropping without `stop()` still closes the channel. The peer connection is
/// closed on the current tokio runtime; outside one it is only dropped, so
/// prefer `stop()` to stop local tracks deterministically.
impl Drop for CallSession {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        if let Some(peer) = self.peer.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { peer.close().await });
                }
                Err(_) => log::warn!(
                    "Call {} dropped outside a runtime; peer connection not closed",
                    self.id
                ),
            }
        }
    }
}
