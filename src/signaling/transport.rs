//! Seam between the signaling channel and a concrete connection
//!
//! A connector opens a link without blocking and reports its lifecycle through
//! a [`ChannelObserver`]; the channel writes to the link through a
//! [`LinkHandle`]. Every opened link carries an id so events from a superseded
//! link can be told apart from the current one.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::AvatarError;

pub type LinkId = u64;

/// Lifecycle of one link as seen by its reader task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { reason: Option<String> },
}

/// Frames written to a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Receiver of link events and reconnect timer expiries
pub trait ChannelObserver: Send + Sync {
    fn on_transport(&self, link: LinkId, event: TransportEvent);

    fn on_reconnect_due(&self, ticket: u64);
}

/// Write half of an opened link
#[derive(Clone)]
pub struct LinkHandle {
    id: LinkId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl LinkHandle {
    /// Handle plus the receiver the connector's writer drains
    pub fn pair(id: LinkId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn send_text(&self, text: String) -> Result<(), AvatarError> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| AvatarError::SignalingTransport(format!("link {} writer gone", self.id)))
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("id", &self.id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Opens links to a signaling endpoint
///
/// `open` must not block: it returns the write handle immediately and reports
/// `Opened`, each `Message`, and a final `Closed` through `observer` later.
/// A connection that never comes up reports only `Closed`.
pub trait SignalingConnector: Send + Sync {
    fn open(
        &self,
        link: LinkId,
        url: &str,
        observer: Arc<dyn ChannelObserver>,
    ) -> Result<LinkHandle, AvatarError>;
}
