//! Scripted peer and signaling doubles
//!
//! Both doubles are cheap clones over shared state: hand one clone to the
//! session and keep another to script events and inspect what was sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::call::{PeerConnector, PeerEvent, PeerLink, PeerObserver};
use crate::errors::AvatarError;
use crate::signaling::{
    ChannelObserver, IceCandidate, LinkHandle, LinkId, Outbound, SessionDescription,
    SignalingConnector, SignalingMessage, TransportEvent,
};

#[derive(Default)]
struct PeerScript {
    connects: u64,
    closed: u64,
    offers: Vec<(u64, bool)>,
    answers_applied: Vec<String>,
    offers_accepted: Vec<String>,
    rollbacks: u64,
    remote_candidates: Vec<IceCandidate>,
    observer: Option<(u64, Arc<dyn PeerObserver>)>,
    fail_connect: Option<AvatarError>,
    reject_answers: bool,
}

/// Peer connector producing deterministic descriptions
#[derive(Clone, Default)]
pub struct ScriptedPeerConnector {
    script: Arc<Mutex<PeerScript>>,
}

impl ScriptedPeerConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, PeerScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `connect` fail with `error`
    pub fn fail_next_connect(&self, error: AvatarError) {
        self.script().fail_connect = Some(error);
    }

    pub fn reject_answers(&self, reject: bool) {
        self.script().reject_answers = reject;
    }

    pub fn connects(&self) -> u64 {
        self.script().connects
    }

    pub fn closed(&self) -> u64 {
        self.script().closed
    }

    /// Connections created and not yet closed
    pub fn live(&self) -> u64 {
        let script = self.script();
        script.connects - script.closed
    }

    /// `(generation, ice_restart)` of every offer created
    pub fn offers(&self) -> Vec<(u64, bool)> {
        self.script().offers.clone()
    }

    pub fn answers_applied(&self) -> Vec<String> {
        self.script().answers_applied.clone()
    }

    pub fn offers_accepted(&self) -> Vec<String> {
        self.script().offers_accepted.clone()
    }

    /// Local offers discarded to accept a remote one
    pub fn rollbacks(&self) -> u64 {
        self.script().rollbacks
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.script().remote_candidates.clone()
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.script().observer.as_ref().map(|(generation, _)| *generation)
    }

    /// Report `event` from the most recent connection
    pub fn emit(&self, event: PeerEvent) -> bool {
        let target = self.script().observer.clone();
        match target {
            Some((generation, observer)) => {
                observer.on_peer_event(generation, event);
                true
            }
            None => false,
        }
    }

    /// Report `event` as if from connection `generation`
    pub fn emit_for(&self, generation: u64, event: PeerEvent) -> bool {
        let observer = self.script().observer.clone();
        match observer {
            Some((_, observer)) => {
                observer.on_peer_event(generation, event);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PeerConnector for ScriptedPeerConnector {
    async fn connect(
        &self,
        generation: u64,
        observer: Arc<dyn PeerObserver>,
    ) -> Result<Box<dyn PeerLink>, AvatarError> {
        let mut script = self.script();
        if let Some(error) = script.fail_connect.take() {
            return Err(error);
        }
        script.connects += 1;
        script.observer = Some((generation, observer));
        Ok(Box::new(ScriptedPeer {
            generation,
            script: self.script.clone(),
            closed: AtomicBool::new(false),
            local_offer: AtomicBool::new(false),
        }))
    }
}

struct ScriptedPeer {
    generation: u64,
    script: Arc<Mutex<PeerScript>>,
    closed: AtomicBool,
    /// Set while a local offer awaits its answer, as in `have-local-offer`
    local_offer: AtomicBool,
}

impl ScriptedPeer {
    fn script(&self) -> MutexGuard<'_, PeerScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), AvatarError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AvatarError::Negotiation("peer connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for ScriptedPeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, AvatarError> {
        self.ensure_open()?;
        let mut script = self.script();
        script.offers.push((self.generation, ice_restart));
        self.local_offer.store(true, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!(
            "offer-{}-{}",
            self.generation,
            script.offers.len()
        )))
    }

    async fn rollback_offer(&self) -> Result<(), AvatarError> {
        self.ensure_open()?;
        if self.local_offer.swap(false, Ordering::SeqCst) {
            self.script().rollbacks += 1;
        }
        Ok(())
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, AvatarError> {
        self.ensure_open()?;
        if self.local_offer.load(Ordering::SeqCst) {
            return Err(AvatarError::Negotiation(
                "remote offer while a local offer is pending".to_string(),
            ));
        }
        self.script().offers_accepted.push(offer.sdp);
        Ok(SessionDescription::answer(format!("answer-{}", self.generation)))
    }

    async fn set_remote_answer(&self, answer: SessionDescription) -> Result<(), AvatarError> {
        self.ensure_open()?;
        let mut script = self.script();
        if script.reject_answers {
            return Err(AvatarError::Negotiation(format!("rejected {}", answer.sdp)));
        }
        script.answers_applied.push(answer.sdp);
        self.local_offer.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), AvatarError> {
        self.ensure_open()?;
        self.script().remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.script().closed += 1;
        }
    }
}

struct LinkRecord {
    id: LinkId,
    url: String,
    observer: Arc<dyn ChannelObserver>,
    rx: mpsc::UnboundedReceiver<Outbound>,
    outbound: Vec<Outbound>,
}

impl LinkRecord {
    fn drain(&mut self) {
        while let Ok(frame) = self.rx.try_recv() {
            self.outbound.push(frame);
        }
    }
}

#[derive(Default)]
struct SignalingScript {
    links: Vec<LinkRecord>,
    fail_open: Option<AvatarError>,
}

/// Signaling connector whose links only move when the test says so
#[derive(Clone, Default)]
pub struct ScriptedSignaling {
    script: Arc<Mutex<SignalingScript>>,
}

impl ScriptedSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, SignalingScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_next_open(&self, error: AvatarError) {
        self.script().fail_open = Some(error);
    }

    pub fn open_count(&self) -> usize {
        self.script().links.len()
    }

    pub fn last_link(&self) -> Option<LinkId> {
        self.script().links.last().map(|l| l.id)
    }

    pub fn urls(&self) -> Vec<String> {
        self.script().links.iter().map(|l| l.url.clone()).collect()
    }

    /// Deliver `event` as if link `link` produced it
    pub fn emit(&self, link: LinkId, event: TransportEvent) -> bool {
        let observer = self
            .script()
            .links
            .iter()
            .find(|l| l.id == link)
            .map(|l| l.observer.clone());
        match observer {
            Some(observer) => {
                observer.on_transport(link, event);
                true
            }
            None => false,
        }
    }

    pub fn accept(&self, link: LinkId) -> bool {
        self.emit(link, TransportEvent::Opened)
    }

    pub fn drop_link(&self, link: LinkId) -> bool {
        self.emit(
            link,
            TransportEvent::Closed {
                reason: Some("dropped".to_string()),
            },
        )
    }

    pub fn deliver(&self, link: LinkId, message: &SignalingMessage) -> bool {
        match message.encode() {
            Ok(text) => self.emit(link, TransportEvent::Message(text)),
            Err(_) => false,
        }
    }

    pub fn deliver_raw(&self, link: LinkId, text: &str) -> bool {
        self.emit(link, TransportEvent::Message(text.to_string()))
    }

    /// Every frame written to `link` so far
    pub fn outbound(&self, link: LinkId) -> Vec<Outbound> {
        let mut script = self.script();
        match script.links.iter_mut().find(|l| l.id == link) {
            Some(record) => {
                record.drain();
                record.outbound.clone()
            }
            None => Vec::new(),
        }
    }

    /// Messages written to `link`, decoded
    pub fn sent(&self, link: LinkId) -> Vec<SignalingMessage> {
        decode_texts(self.outbound(link))
    }

    /// Messages written to any link, in link order
    pub fn sent_all(&self) -> Vec<SignalingMessage> {
        let mut script = self.script();
        let mut frames = Vec::new();
        for record in script.links.iter_mut() {
            record.drain();
            frames.extend(record.outbound.iter().cloned());
        }
        decode_texts(frames)
    }
}

fn decode_texts(frames: Vec<Outbound>) -> Vec<SignalingMessage> {
    frames
        .into_iter()
        .filter_map(|frame| match frame {
            Outbound::Text(text) => SignalingMessage::decode(&text).ok(),
            Outbound::Close => None,
        })
        .collect()
}

impl SignalingConnector for ScriptedSignaling {
    fn open(
        &self,
        link: LinkId,
        url: &str,
        observer: Arc<dyn ChannelObserver>,
    ) -> Result<LinkHandle, AvatarError> {
        let mut script = self.script();
        if let Some(error) = script.fail_open.take() {
            return Err(error);
        }
        let (handle, rx) = LinkHandle::pair(link);
        script.links.push(LinkRecord {
            id: link,
            url: url.to_string(),
            observer,
            rx,
            outbound: Vec::new(),
        });
        Ok(handle)
    }
}
