//! The single event queue consumed by a call session

use tokio::sync::mpsc;

use super::peer::{PeerEvent, PeerObserver};
use crate::signaling::{ChannelObserver, LinkId, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    Start,
    Stop,
}

/// Everything that can move a call session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Transport { link: LinkId, event: TransportEvent },
    Peer { generation: u64, event: PeerEvent },
    ReconnectDue { ticket: u64 },
    Command(CallCommand),
}

/// Cloneable producer side of the queue
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<CallEvent>) -> Self {
        Self { tx }
    }

    /// Queue `event`; returns false once the session is gone.
    pub fn post(&self, event: CallEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl ChannelObserver for EventSink {
    fn on_transport(&self, link: LinkId, event: TransportEvent) {
        self.post(CallEvent::Transport { link, event });
    }

    fn on_reconnect_due(&self, ticket: u64) {
        self.post(CallEvent::ReconnectDue { ticket });
    }
}

impl PeerObserver for EventSink {
    fn on_peer_event(&self, generation: u64, event: PeerEvent) {
        self.post(CallEvent::Peer { generation, event });
    }
}

/// Control handle for a session running on another task
#[derive(Debug, Clone)]
pub struct CallHandle {
    sink: EventSink,
}

impl CallHandle {
    pub(crate) fn new(sink: EventSink) -> Self {
        Self { sink }
    }

    pub fn start(&self) -> bool {
        self.sink.post(CallEvent::Command(CallCommand::Start))
    }

    pub fn stop(&self) -> bool {
        self.sink.post(CallEvent::Command(CallCommand::Stop))
    }
}
