// Websocket IO for one connect attempt. Everything observed is posted back to
// the actor tagged with the attempt's generation.

use anyhow::Context;
use flume::Sender;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::updates::{CoreMsg, InternalEvent};

pub(super) struct SocketHandle {
    outbound: mpsc::UnboundedSender<String>,
    shutdown: Option<oneshot::Sender<()>>,
    // Only set for handles created with the network disabled.
    #[cfg_attr(not(test), allow(dead_code))]
    offline_rx: Option<mpsc::UnboundedReceiver<String>>,
}

impl SocketHandle {
    /// A handle with no IO behind it; frames queue locally until drained.
    pub(super) fn detached() -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        Self {
            outbound,
            shutdown: None,
            offline_rx: Some(rx),
        }
    }

    pub(super) fn send(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }

    pub(super) fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    #[cfg(test)]
    pub(super) fn drain_outbound(&mut self) -> Vec<String> {
        let mut out = vec![];
        if let Some(rx) = self.offline_rx.as_mut() {
            while let Ok(text) = rx.try_recv() {
                out.push(text);
            }
        }
        out
    }
}

pub(super) fn spawn_socket(
    runtime: &tokio::runtime::Runtime,
    url: String,
    bearer: String,
    generation: u64,
    core_tx: Sender<CoreMsg>,
) -> SocketHandle {
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    runtime.spawn(run_socket(
        url,
        bearer,
        generation,
        outbound_rx,
        shutdown_rx,
        core_tx,
    ));
    SocketHandle {
        outbound,
        shutdown: Some(shutdown_tx),
        offline_rx: None,
    }
}

fn post(core_tx: &Sender<CoreMsg>, event: InternalEvent) {
    let _ = core_tx.send(CoreMsg::Internal(Box::new(event)));
}

fn closed(core_tx: &Sender<CoreMsg>, generation: u64, reason: String, auth_rejected: bool) {
    post(
        core_tx,
        InternalEvent::SocketClosed {
            generation,
            reason,
            auth_rejected,
        },
    );
}

fn build_request(
    url: &str,
    bearer: &str,
) -> anyhow::Result<tungstenite::handshake::client::Request> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid websocket url {url}"))?;
    let header = HeaderValue::from_str(&format!("Bearer {bearer}"))
        .context("token is not a valid header value")?;
    request.headers_mut().insert(AUTHORIZATION, header);
    Ok(request)
}

fn is_auth_rejection(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Http(resp) if resp.status() == StatusCode::UNAUTHORIZED)
}

async fn run_socket(
    url: String,
    bearer: String,
    generation: u64,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
    core_tx: Sender<CoreMsg>,
) {
    let request = match build_request(&url, &bearer) {
        Ok(r) => r,
        Err(e) => {
            closed(&core_tx, generation, format!("{e:#}"), false);
            return;
        }
    };

    let connected = tokio::select! {
        _ = &mut shutdown_rx => return,
        res = tokio_tungstenite::connect_async(request) => res,
    };
    let ws = match connected {
        Ok((ws, _resp)) => ws,
        Err(e) => {
            let auth_rejected = is_auth_rejection(&e);
            tracing::warn!(generation, %e, auth_rejected, "ws connect failed");
            closed(&core_tx, generation, e.to_string(), auth_rejected);
            return;
        }
    };
    tracing::info!(generation, "ws connected");
    post(&core_tx, InternalEvent::SocketOpened { generation });

    let (mut sink, mut stream) = ws.split();
    let reason = loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                // Local close: the actor already moved on, nothing to report.
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            out = outbound_rx.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        break format!("send failed: {e}");
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => post(
                    &core_tx,
                    InternalEvent::FrameReceived {
                        generation,
                        text: text.as_str().to_string(),
                    },
                ),
                Some(Ok(Message::Close(_))) => break "closed by server".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },
        }
    };
    tracing::info!(generation, reason = %reason, "ws closed");
    closed(&core_tx, generation, reason, false);
}
