//! WebSocket connector over tokio-tungstenite
//!
//! Each link runs a reader task that reports frames to the observer and a
//! writer task that drains the link's outbound queue. Dropping every
//! [`LinkHandle`] or sending [`Outbound::Close`] ends the link.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::transport::{ChannelObserver, LinkHandle, LinkId, Outbound, SignalingConnector, TransportEvent};
use crate::errors::AvatarError;

#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl SignalingConnector for WsConnector {
    fn open(
        &self,
        link: LinkId,
        url: &str,
        observer: Arc<dyn ChannelObserver>,
    ) -> Result<LinkHandle, AvatarError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AvatarError::SignalingTransport(format!("no async runtime for {}: {}", url, e))
        })?;

        let (handle, outbound) = LinkHandle::pair(link);
        let url = url.to_string();
        runtime.spawn(run_link(link, url, outbound, observer));
        Ok(handle)
    }
}

async fn run_link(
    link: LinkId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    observer: Arc<dyn ChannelObserver>,
) {
    log::debug!("Link {} connecting to {}", link, url);
    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            log::warn!("Link {} failed to connect to {}: {}", link, url, e);
            observer.on_transport(
                link,
                TransportEvent::Closed {
                    reason: Some(e.to_string()),
                },
            );
            return;
        }
    };

    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    observer.on_transport(link, TransportEvent::Opened);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if ws_writer.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = ws_writer.send(Message::Close(None)).await;
    });

    let mut reason = None;
    while let Some(frame) = ws_reader.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                observer.on_transport(link, TransportEvent::Message(text.as_str().to_owned()));
            }
            Ok(Message::Close(frame)) => {
                reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                reason = Some(e.to_string());
                break;
            }
        }
    }

    writer.abort();
    log::debug!("Link {} closed: {:?}", link, reason);
    observer.on_transport(link, TransportEvent::Closed { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(LinkId, TransportEvent)>>);

    impl ChannelObserver for Collect {
        fn on_transport(&self, link: LinkId, event: TransportEvent) {
            self.0.lock().unwrap().push((link, event));
        }

        fn on_reconnect_due(&self, _ticket: u64) {}
    }

    #[test]
    fn test_open_outside_runtime_is_transport_error() {
        let observer: Arc<dyn ChannelObserver> = Arc::new(Collect::default());
        let result = WsConnector::new().open(1, "ws://127.0.0.1:9/ws/default", observer);
        assert!(matches!(result, Err(AvatarError::SignalingTransport(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_reports_closed() {
        let collect = Arc::new(Collect::default());
        let observer: Arc<dyn ChannelObserver> = collect.clone();
        let _handle = WsConnector::new()
            .open(7, "ws://127.0.0.1:9/ws/default", observer)
            .unwrap();

        for _ in 0..200 {
            if !collect.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let events = collect.0.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some((7, TransportEvent::Closed { reason: Some(_) }))
        ));
    }
}
