use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chatsite_core::{
    AppAction, AuthFailureHook, ChatApp, ConnectionStatus, PaymentStatus, SettlementClient,
    SettlementError,
};
use futures_util::{SinkExt, StreamExt};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

fn write_config(data_dir: &str, ws_url: &str) {
    let path = std::path::Path::new(data_dir).join(chatsite_core::config_file_name());
    let v = serde_json::json!({
        "disable_network": false,
        "ws_base_url": ws_url,
        "reconnect_base_ms": 50,
        "reconnect_cap_ms": 200,
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

#[derive(Default)]
struct RelayState {
    conns: HashMap<u64, ConnEntry>,
    // Bearer tokens seen on every upgrade attempt, accepted or not.
    handshakes: Vec<String>,
    // Frames whose id was not an int64.
    rejected_frames: Vec<String>,
    next_message_id: u64,
}

struct ConnEntry {
    user: String,
    tx: mpsc::UnboundedSender<Message>,
}

struct LocalRelayHandle {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    state: Arc<Mutex<RelayState>>,
}

impl LocalRelayHandle {
    fn handshakes(&self) -> usize {
        self.state.lock().unwrap().handshakes.len()
    }

    /// Server-side close of every live connection.
    fn drop_all(&self) {
        let st = self.state.lock().unwrap();
        for conn in st.conns.values() {
            let _ = conn.tx.send(Message::Close(None));
        }
    }
}

impl Drop for LocalRelayHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Tokens look like `tok-<username>`; anything else gets a 401 on upgrade.
fn user_for_token(header: Option<&str>) -> Option<String> {
    let token = header?.strip_prefix("Bearer ")?;
    token
        .strip_prefix("tok-")
        .filter(|u| !u.is_empty())
        .map(str::to_owned)
}

fn send_to(state: &Arc<Mutex<RelayState>>, filter: impl Fn(u64, &str) -> bool, v: serde_json::Value) {
    let text = v.to_string();
    let st = state.lock().unwrap();
    for (id, conn) in &st.conns {
        if filter(*id, &conn.user) {
            let _ = conn.tx.send(Message::Text(text.clone().into()));
        }
    }
}

/// Returns false when the frame would fail the relay's int64 envelope decode,
/// in which case the connection is dropped.
fn handle_client_msg(state: &Arc<Mutex<RelayState>>, conn_id: u64, user: &str, text: &str) -> bool {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(text) else {
        return false;
    };
    let client_id = match &v["id"] {
        serde_json::Value::Null => 0,
        id => match id.as_i64() {
            Some(id) => id,
            None => {
                state.lock().unwrap().rejected_frames.push(text.to_string());
                return false;
            }
        },
    };
    if v["type"] != "direct_message" {
        return true;
    }
    let to = v["to"].as_str().unwrap_or_default().to_string();
    let relay_id = {
        let mut st = state.lock().unwrap();
        st.next_message_id += 1;
        st.next_message_id
    };
    send_to(
        state,
        |id, _| id == conn_id,
        serde_json::json!({"type": "message_ack", "id": client_id}),
    );
    send_to(
        state,
        |_, u| u == to,
        serde_json::json!({
            "type": "direct_message",
            "from": user,
            "body": v["body"],
            "createdAt": v["createdAt"],
            "id": relay_id,
        }),
    );
    true
}

fn start_local_relay() -> (LocalRelayHandle, JoinHandle<()>) {
    let (url_tx, url_rx) = std::sync::mpsc::channel::<(String, oneshot::Sender<()>)>();
    let state = Arc::new(Mutex::new(RelayState::default()));

    let state_for_thread = state.clone();
    let thread = std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("tokio runtime");

        rt.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
            let addr: SocketAddr = listener.local_addr().expect("local addr");
            let url = format!("ws://{}", addr);
            let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
            url_tx.send((url, shutdown_tx)).unwrap();

            let next_conn_id = Arc::new(AtomicU64::new(1));
            let state = state_for_thread;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accept = listener.accept() => {
                        let (stream, _) = match accept {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        let state = state.clone();
                        let next_conn_id = next_conn_id.clone();
                        tokio::spawn(async move {
                            let user_slot = Arc::new(Mutex::new(None::<String>));
                            let slot = user_slot.clone();
                            let state_for_hs = state.clone();
                            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                                let header = req
                                    .headers()
                                    .get("authorization")
                                    .and_then(|h| h.to_str().ok());
                                state_for_hs
                                    .lock()
                                    .unwrap()
                                    .handshakes
                                    .push(header.unwrap_or_default().to_string());
                                match user_for_token(header) {
                                    Some(user) => {
                                        *slot.lock().unwrap() = Some(user);
                                        Ok(resp)
                                    }
                                    None => {
                                        let mut err = ErrorResponse::new(Some("unauthorized".into()));
                                        *err.status_mut() = StatusCode::UNAUTHORIZED;
                                        Err(err)
                                    }
                                }
                            };
                            let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
                                Ok(ws) => ws,
                                Err(_) => return,
                            };
                            let Some(user) = user_slot.lock().unwrap().clone() else {
                                return;
                            };
                            let (mut ws_tx, mut ws_rx) = ws.split();
                            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
                            let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);

                            let already_online: Vec<String> = {
                                let mut st = state.lock().unwrap();
                                let online = st.conns.values().map(|c| c.user.clone()).collect();
                                st.conns.insert(conn_id, ConnEntry {
                                    user: user.clone(),
                                    tx: out_tx.clone(),
                                });
                                online
                            };
                            for other in already_online {
                                let frame = serde_json::json!({"type": "user_online", "from": other});
                                let _ = out_tx.send(Message::Text(frame.to_string().into()));
                            }
                            send_to(
                                &state,
                                |id, _| id != conn_id,
                                serde_json::json!({"type": "user_online", "from": user}),
                            );

                            let writer = tokio::spawn(async move {
                                while let Some(msg) = out_rx.recv().await {
                                    let closing = matches!(msg, Message::Close(_));
                                    if ws_tx.send(msg).await.is_err() || closing {
                                        break;
                                    }
                                }
                            });

                            while let Some(Ok(msg)) = ws_rx.next().await {
                                match msg {
                                    Message::Text(text) => {
                                        if !handle_client_msg(&state, conn_id, &user, text.as_str()) {
                                            break;
                                        }
                                    }
                                    Message::Ping(p) => {
                                        let _ = out_tx.send(Message::Pong(p));
                                    }
                                    Message::Close(_) => break,
                                    _ => {}
                                }
                            }

                            let still_online = {
                                let mut st = state.lock().unwrap();
                                st.conns.remove(&conn_id);
                                st.conns.values().any(|c| c.user == user)
                            };
                            if !still_online {
                                send_to(
                                    &state,
                                    |_, _| true,
                                    serde_json::json!({"type": "user_offline", "from": user}),
                                );
                            }
                            writer.abort();
                        });
                    }
                }
            }
        });
    });

    let (url, shutdown_tx) = url_rx.recv().unwrap();
    let handle = LocalRelayHandle {
        url,
        shutdown: Some(shutdown_tx),
        state,
    };
    (handle, thread)
}

fn new_app(relay: &LocalRelayHandle) -> (Arc<ChatApp>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap().to_string();
    write_config(&data_dir, &relay.url);
    (ChatApp::new(data_dir), dir)
}

fn connect(app: &ChatApp, token: &str) {
    app.dispatch(AppAction::Connect {
        token: token.into(),
    });
    wait_until("online", Duration::from_secs(10), || {
        app.state().connection.status == ConnectionStatus::Online
    });
}

struct CountingHook(Arc<Mutex<Vec<String>>>);

impl AuthFailureHook for CountingHook {
    fn on_auth_failure(&self, reason: String) {
        self.0.lock().unwrap().push(reason);
    }
}

struct AlwaysSettles {
    calls: Arc<Mutex<Vec<(String, String, i64)>>>,
}

impl SettlementClient for AlwaysSettles {
    fn submit(
        &self,
        _runtime: &tokio::runtime::Handle,
        bearer: &str,
        peer: &str,
        amount_cents: i64,
    ) -> Result<(), SettlementError> {
        self.calls
            .lock()
            .unwrap()
            .push((bearer.to_string(), peer.to_string(), amount_cents));
        Ok(())
    }
}

#[test]
fn message_is_acked_and_delivered_to_peer() {
    let (relay, _thread) = start_local_relay();
    let (alice, _a) = new_app(&relay);
    let (bob, _b) = new_app(&relay);
    connect(&alice, "tok-alice");
    connect(&bob, "tok-bob");

    wait_until("alice sees bob online", Duration::from_secs(5), || {
        alice.state().presence.contains(&"bob".to_string())
    });

    alice.dispatch(AppAction::SendMessage {
        peer: "bob".into(),
        body: "hi bob".into(),
    });
    wait_until("alice's message acked", Duration::from_secs(5), || {
        alice
            .state()
            .thread("bob")
            .is_some_and(|t| t.messages.iter().any(|m| m.delivered && m.is_sent()))
    });
    wait_until("bob receives", Duration::from_secs(5), || {
        bob.state()
            .thread("alice")
            .is_some_and(|t| t.messages.iter().any(|m| m.body == "hi bob"))
    });
    assert_eq!(bob.state().unread.get("alice"), Some(&1));
    assert!(relay.state.lock().unwrap().rejected_frames.is_empty());
    assert_eq!(relay.handshakes(), 2);

    let bob_contacts = bob.state().contacts;
    assert_eq!(bob_contacts[0].peer, "alice");
    assert_eq!(bob_contacts[0].unread_count, 1);
}

#[test]
fn dropped_connection_reconnects_with_new_generation() {
    let (relay, _thread) = start_local_relay();
    let (alice, _a) = new_app(&relay);
    connect(&alice, "tok-alice");
    let first = alice.state().connection.generation;
    assert_eq!(relay.handshakes(), 1);

    relay.drop_all();
    wait_until("reconnected", Duration::from_secs(10), || {
        let conn = alice.state().connection;
        conn.status == ConnectionStatus::Online && conn.generation > first
    });
    assert_eq!(relay.handshakes(), 2);
    assert_eq!(alice.state().connection.attempt, 0);
}

#[test]
fn rejected_token_fires_auth_hook_without_retrying() {
    let (relay, _thread) = start_local_relay();
    let (app, _dir) = new_app(&relay);
    let failures = Arc::new(Mutex::new(vec![]));
    app.set_auth_failure_hook(Box::new(CountingHook(failures.clone())));

    app.dispatch(AppAction::Connect {
        token: "expired".into(),
    });
    wait_until("auth failure reported", Duration::from_secs(5), || {
        !failures.lock().unwrap().is_empty()
    });
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(relay.handshakes(), 1);
    assert_eq!(app.state().connection.status, ConnectionStatus::Offline);
    assert_eq!(relay.state.lock().unwrap().handshakes[0], "Bearer expired");
}

#[test]
fn settled_request_turns_paid_on_both_sides() {
    let (relay, _thread) = start_local_relay();
    let (alice, _a) = new_app(&relay);
    let (bob, _b) = new_app(&relay);
    let calls = Arc::new(Mutex::new(vec![]));
    bob.set_settlement_client(Arc::new(AlwaysSettles {
        calls: calls.clone(),
    }));
    connect(&alice, "tok-alice");
    connect(&bob, "tok-bob");

    alice.dispatch(AppAction::SendPaymentRequest {
        peer: "bob".into(),
        amount: 10.0,
    });
    let mut request_id = String::new();
    wait_until("bob sees request", Duration::from_secs(5), || {
        let found = bob.state().thread("alice").and_then(|t| {
            t.messages
                .iter()
                .find_map(|m| m.payment.as_ref().map(|p| p.request_id.clone()))
        });
        match found {
            Some(id) => {
                request_id = id;
                true
            }
            None => false,
        }
    });

    let payment = |app: &ChatApp, peer: &str| {
        app.state().thread(peer).and_then(|t| {
            t.messages
                .iter()
                .find_map(|m| m.payment.clone())
        })
    };
    let bob_view = payment(&bob, "alice").unwrap();
    assert_eq!(bob_view.amount_display, "$10.00");
    assert!(bob_view.can_settle);

    bob.dispatch(AppAction::SettlePaymentRequest {
        peer: "alice".into(),
        request_id: request_id.clone(),
    });
    wait_until("bob marks paid", Duration::from_secs(5), || {
        payment(&bob, "alice").is_some_and(|p| p.status == PaymentStatus::Paid)
    });
    wait_until("alice learns paid", Duration::from_secs(5), || {
        payment(&alice, "bob").is_some_and(|p| p.status == PaymentStatus::Paid)
    });
    assert_eq!(
        calls.lock().unwrap().as_slice(),
        [("tok-bob".to_string(), "alice".to_string(), 1000)]
    );
    // The paid update is a control frame and never shows up as a message.
    assert_eq!(alice.state().thread("bob").unwrap().messages.len(), 1);
    assert!(relay.state.lock().unwrap().rejected_frames.is_empty());
    assert_eq!(relay.handshakes(), 2);
}
