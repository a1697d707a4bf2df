//! Tokio driver: owns one WebSocket and feeds its events into a [`NotificationChannel`].
//!
//! All handler callbacks for a connection run on the one spawned task, so they are never
//! concurrent. Outbound frames are queued on an unbounded channel and written by the same task.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;

use super::handler::{
    ChannelError, ChannelState, CounterStore, NotificationChannel, NotificationSink, Transport,
    TransportError,
};
use super::protocol::Credential;
use crate::config::MassPredicate;

enum Command {
    RequestMassNotification,
    Close,
}

/// Transport backed by the driver's outbound queue. Never blocks; no backpressure.
struct QueueTransport(mpsc::UnboundedSender<String>);

impl Transport for QueueTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.0.send(text).map_err(|_| TransportError::Closed)
    }
}

/// Caller-side handle to a running channel. Cheap to clone; when every handle is
/// dropped the driver closes the socket.
#[derive(Clone)]
pub struct ChannelHandle {
    endpoint: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
}

impl ChannelHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Queue one action request. Fails without sending when the channel is not open.
    pub fn request_mass_notification(&self) -> Result<(), ChannelError> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(ChannelError::NotOpen(state));
        }
        self.commands
            .send(Command::RequestMassNotification)
            .map_err(|_| ChannelError::NotOpen(ChannelState::Closed))
    }

    /// Ask the driver to close the socket. No-op once closed.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Wait until the connect attempt resolves. True if the channel opened.
    pub async fn opened(&self) -> bool {
        let mut rx = self.state.clone();
        let opened = match rx.wait_for(|s| *s != ChannelState::Connecting).await {
            Ok(s) => *s == ChannelState::Open,
            Err(_) => false,
        };
        opened
    }

    /// Wait until the channel is closed.
    pub async fn closed(&self) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|s| *s == ChannelState::Closed).await;
    }
}

/// Validate `endpoint` and start connecting in the background. Returns immediately.
///
/// A malformed endpoint fails here and is not retried. Connection failures later on
/// show up as the channel moving to Closed. Must be called inside a tokio runtime.
pub fn open(
    endpoint: &str,
    credential: Credential,
    predicate: MassPredicate,
    sink: Arc<dyn NotificationSink>,
    counter: Arc<dyn CounterStore>,
) -> Result<ChannelHandle, ChannelError> {
    let request = client_request(endpoint)?;
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
    let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

    let channel = NotificationChannel::new(
        credential,
        predicate,
        Box::new(QueueTransport(outbound_tx)),
        sink,
        counter,
    );
    let endpoint: Arc<str> = Arc::from(endpoint);
    log::info!("opening notification channel to {}", endpoint);
    tokio::spawn(run_channel(
        endpoint.clone(),
        request,
        channel,
        outbound_rx,
        command_rx,
        state_tx,
    ));

    Ok(ChannelHandle {
        endpoint,
        commands: command_tx,
        state: state_rx,
    })
}

fn client_request(endpoint: &str) -> Result<Request, ChannelError> {
    let invalid = |reason: String| ChannelError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let request = endpoint
        .trim()
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;
    match request.uri().scheme_str() {
        Some("ws") | Some("wss") => {}
        other => {
            return Err(invalid(format!(
                "unsupported scheme {:?} (expected ws or wss)",
                other.unwrap_or("")
            )))
        }
    }
    if request.uri().host().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(request)
}

fn finish(channel: &mut NotificationChannel, state_tx: &watch::Sender<ChannelState>) {
    channel.on_close();
    state_tx.send_replace(ChannelState::Closed);
}

async fn run_channel(
    endpoint: Arc<str>,
    request: Request,
    mut channel: NotificationChannel,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ChannelState>,
) {
    let connect = tokio_tungstenite::connect_async(request);
    tokio::pin!(connect);

    let ws = loop {
        tokio::select! {
            res = &mut connect => match res {
                Ok((ws, _)) => break ws,
                Err(e) => {
                    log::warn!("connecting to {} failed: {}", endpoint, e);
                    finish(&mut channel, &state_tx);
                    return;
                }
            },
            cmd = command_rx.recv() => match cmd {
                Some(Command::RequestMassNotification) => {
                    if let Err(e) = channel.request_mass_notification() {
                        log::debug!("action request dropped: {}", e);
                    }
                }
                Some(Command::Close) | None => {
                    log::debug!("channel to {} closed before connecting", endpoint);
                    finish(&mut channel, &state_tx);
                    return;
                }
            },
        }
    };

    channel.on_open();
    state_tx.send_replace(channel.state());
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            biased;

            Some(text) = outbound_rx.recv() => {
                log::debug!("ws send: {}", text);
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    log::warn!("notification channel write failed: {}", e);
                }
            }
            cmd = command_rx.recv() => match cmd {
                Some(Command::RequestMassNotification) => {
                    if let Err(e) = channel.request_mass_notification() {
                        log::debug!("action request dropped: {}", e);
                    }
                }
                Some(Command::Close) | None => {
                    while let Ok(text) = outbound_rx.try_recv() {
                        let _ = ws_tx.send(Message::Text(text)).await;
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => match channel.on_message(&text) {
                    Ok(Some(notification)) => log::debug!("notification: {:?}", notification),
                    Ok(None) => {}
                    Err(e) => log::warn!("skipping inbound frame: {}", e),
                },
                Some(Ok(Message::Binary(data))) => {
                    log::debug!("ignoring {} byte binary frame", data.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    log::info!("peer closed notification channel: {:?}", frame);
                    // flushes the close reply tungstenite queued
                    if let Err(e) = ws_tx.close().await {
                        log::debug!("completing close handshake failed: {}", e);
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("notification channel read failed: {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    finish(&mut channel, &state_tx);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ws_and_wss() {
        assert!(client_request("ws://127.0.0.1:8765/notifications").is_ok());
        assert!(client_request("wss://ws.example.com/notifications").is_ok());
    }

    #[test]
    fn rejects_malformed_endpoints() {
        for bad in ["", "not a uri", "http://example.com/ws", "ws:///nohost"] {
            assert!(
                matches!(client_request(bad), Err(ChannelError::InvalidEndpoint { .. })),
                "expected {:?} to be rejected",
                bad
            );
        }
    }
}
