//! Room-scoped signaling channel with reconnect scheduling
//!
//! The channel does not decide whether to reconnect; its owner calls
//! [`SignalingChannel::schedule_reconnect`] after a close while the call is
//! still active. The backoff timer is a spawned task that reports through the
//! observer with a ticket, so a timer cancelled after it fired is still ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::message::SignalingMessage;
use super::policy::ReconnectPolicy;
use super::transport::{ChannelObserver, LinkHandle, LinkId, SignalingConnector, TransportEvent};
use crate::errors::AvatarError;

/// What a transport event meant for the channel's owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(SignalingMessage),
    PeerLeft(String),
    Closed { reason: Option<String> },
}

pub struct SignalingChannel {
    url: String,
    connector: Arc<dyn SignalingConnector>,
    observer: Arc<dyn ChannelObserver>,
    policy: ReconnectPolicy,
    link: Option<LinkHandle>,
    last_link: LinkId,
    open: bool,
    reconnect: Option<JoinHandle<()>>,
    ticket: u64,
}

impl SignalingChannel {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn SignalingConnector>,
        observer: Arc<dyn ChannelObserver>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            url: url.into(),
            connector,
            observer,
            policy,
            link: None,
            last_link: 0,
            open: false,
            reconnect: None,
            ticket: 0,
        }
    }

    /// Continue link numbering after `last_link` so ids never repeat across channels
    pub fn continue_from(mut self, last_link: LinkId) -> Self {
        self.last_link = last_link;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Highest link id handed out so far
    pub fn last_link(&self) -> LinkId {
        self.last_link
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Id of the link currently being opened or open
    pub fn current_link(&self) -> Option<LinkId> {
        self.link.as_ref().map(LinkHandle::id)
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut ReconnectPolicy {
        &mut self.policy
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    /// Start a new link, superseding any previous one
    pub fn open(&mut self) -> Result<LinkId, AvatarError> {
        if let Some(old) = self.link.take() {
            old.close();
        }
        self.open = false;
        self.last_link += 1;
        let id = self.last_link;

        log::info!("Opening signaling link {} to {}", id, self.url);
        let handle = self.connector.open(id, &self.url, self.observer.clone())?;
        self.link = Some(handle);
        Ok(id)
    }

    pub fn send(&self, message: &SignalingMessage) -> Result<(), AvatarError> {
        let link = match (&self.link, self.open) {
            (Some(link), true) => link,
            _ => {
                return Err(AvatarError::SignalingTransport(format!(
                    "cannot send {}: channel not open",
                    message.kind()
                )))
            }
        };
        log::debug!("-> {} on link {}", message.kind(), link.id());
        link.send_text(message.encode()?)
    }

    /// Interpret a raw transport event; stale links and housekeeping frames yield `None`.
    pub fn on_transport(&mut self, link: LinkId, event: TransportEvent) -> Option<ChannelEvent> {
        if self.current_link() != Some(link) {
            log::debug!("Dropping {:?} from stale link {}", event, link);
            return None;
        }

        match event {
            TransportEvent::Opened => {
                self.open = true;
                self.policy.reset();
                log::info!("Signaling link {} open", link);
                Some(ChannelEvent::Opened)
            }
            TransportEvent::Message(text) => self.on_text(&text),
            TransportEvent::Closed { reason } => {
                self.open = false;
                self.link = None;
                log::warn!("Signaling link {} closed: {:?}", link, reason);
                Some(ChannelEvent::Closed { reason })
            }
        }
    }

    fn on_text(&mut self, text: &str) -> Option<ChannelEvent> {
        let message = match SignalingMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping malformed signaling payload: {}", e);
                return None;
            }
        };
        log::debug!("<- {}", message.kind());

        match message {
            SignalingMessage::Ping => {
                if let Err(e) = self.send(&SignalingMessage::Pong) {
                    log::warn!("Failed to answer ping: {}", e);
                }
                None
            }
            SignalingMessage::Pong => None,
            SignalingMessage::UserDisconnected { user_id } => {
                log::info!("Peer {} left the room", user_id);
                Some(ChannelEvent::PeerLeft(user_id))
            }
            other => Some(ChannelEvent::Message(other)),
        }
    }

    /// Arm the backoff timer for the next reopen.
    ///
    /// Fails with a transport error once the policy is exhausted.
    pub fn schedule_reconnect(&mut self) -> Result<Duration, AvatarError> {
        self.cancel_reconnect();
        let attempt = self.policy.attempt() + 1;
        let Some(delay) = self.policy.next_delay() else {
            return Err(AvatarError::SignalingTransport(format!(
                "gave up after {} reconnect attempts",
                self.policy.max_attempts()
            )));
        };

        let ticket = self.ticket;
        let observer = self.observer.clone();
        self.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            observer.on_reconnect_due(ticket);
        }));
        log::warn!(
            "Reconnect attempt {}/{} in {:?}",
            attempt,
            self.policy.max_attempts(),
            delay
        );
        Ok(delay)
    }

    /// Reopen if `ticket` belongs to the pending timer; returns whether it did.
    pub fn on_reconnect_due(&mut self, ticket: u64) -> Result<bool, AvatarError> {
        if self.reconnect.is_none() || ticket != self.ticket {
            log::debug!("Ignoring stale reconnect ticket {}", ticket);
            return Ok(false);
        }
        self.reconnect = None;
        self.ticket += 1;
        self.open()?;
        Ok(true)
    }

    pub fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
        self.ticket += 1;
    }

    /// Close the link and clear the pending timer
    pub fn close(&mut self) {
        self.cancel_reconnect();
        if let Some(link) = self.link.take() {
            log::info!("Closing signaling link {}", link.id());
            link.close();
        }
        self.open = false;
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::transport::Outbound;
    use crate::testing::ScriptedSignaling;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Tickets(Mutex<Vec<u64>>);

    impl ChannelObserver for Tickets {
        fn on_transport(&self, _link: LinkId, _event: TransportEvent) {}

        fn on_reconnect_due(&self, ticket: u64) {
            self.0.lock().unwrap().push(ticket);
        }
    }

    fn channel(signaling: &ScriptedSignaling) -> (SignalingChannel, Arc<Tickets>) {
        let tickets = Arc::new(Tickets::default());
        let observer: Arc<dyn ChannelObserver> = tickets.clone();
        let channel = SignalingChannel::new(
            "ws://relay/ws/default",
            Arc::new(signaling.clone()),
            observer,
            ReconnectPolicy::new(5, 1000, 30_000),
        );
        (channel, tickets)
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let signaling = ScriptedSignaling::new();
        let (mut channel, _) = channel(&signaling);
        let link = channel.open().unwrap();
        assert!(channel.send(&SignalingMessage::Ping).is_err());

        assert_eq!(
            channel.on_transport(link, TransportEvent::Opened),
            Some(ChannelEvent::Opened)
        );
        channel.send(&SignalingMessage::Ping).unwrap();
        assert_eq!(signaling.sent(link), vec![SignalingMessage::Ping]);
    }

    #[tokio::test]
    async fn test_ping_answered_and_malformed_dropped() {
        let signaling = ScriptedSignaling::new();
        let (mut channel, _) = channel(&signaling);
        let link = channel.open().unwrap();
        channel.on_transport(link, TransportEvent::Opened);

        let ping = TransportEvent::Message(r#"{"type":"ping"}"#.into());
        assert_eq!(channel.on_transport(link, ping), None);
        assert_eq!(signaling.sent(link), vec![SignalingMessage::Pong]);

        let junk = TransportEvent::Message("{{{".into());
        assert_eq!(channel.on_transport(link, junk), None);
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_stale_link_events_dropped() {
        let signaling = ScriptedSignaling::new();
        let (mut channel, _) = channel(&signaling);
        let first = channel.open().unwrap();
        let second = channel.open().unwrap();
        assert_ne!(first, second);
        assert_eq!(signaling.outbound(first).last(), Some(&Outbound::Close));

        assert_eq!(channel.on_transport(first, TransportEvent::Opened), None);
        assert!(!channel.is_open());
        let closed = TransportEvent::Closed { reason: None };
        assert_eq!(channel.on_transport(first, closed), None);
        assert_eq!(channel.current_link(), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_timer_fires_with_ticket() {
        let signaling = ScriptedSignaling::new();
        let (mut channel, tickets) = channel(&signaling);
        channel.open().unwrap();

        let delay = channel.schedule_reconnect().unwrap();
        assert_eq!(delay, Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(1001)).await;

        let fired = tickets.0.lock().unwrap().clone();
        assert_eq!(fired.len(), 1);
        assert!(channel.on_reconnect_due(fired[0]).unwrap());
        assert_eq!(signaling.open_count(), 2);

        // A duplicate delivery of the same ticket is ignored.
        assert!(!channel.on_reconnect_due(fired[0]).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_reopens() {
        let signaling = ScriptedSignaling::new();
        let (mut channel, tickets) = channel(&signaling);
        channel.open().unwrap();
        channel.schedule_reconnect().unwrap();
        channel.close();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(tickets.0.lock().unwrap().is_empty());
        assert!(!channel.on_reconnect_due(0).unwrap());
        assert_eq!(signaling.open_count(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_transport_error() {
        let signaling = ScriptedSignaling::new();
        let (mut channel, _) = channel(&signaling);
        for _ in 0..5 {
            channel.schedule_reconnect().unwrap();
        }
        assert!(matches!(
            channel.schedule_reconnect(),
            Err(AvatarError::SignalingTransport(_))
        ));
    }
}
