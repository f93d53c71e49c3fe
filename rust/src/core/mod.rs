mod config;
mod session;
mod settle;
mod socket;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use flume::Sender;

use crate::actions::AppAction;
use crate::credential::{SessionCredential, SharedAuthFailureHook};
use crate::microapp::{self, amount_to_cents, MicroAppPayload, RemotePaymentStatus};
use crate::presence::PresenceTracker;
use crate::ranking::rank_contacts;
use crate::settlement::{SettlementError, SharedSettlementClient};
use crate::state::{
    now_millis, AppState, ChatMessage, ConnectionState, ConnectionStatus, Contact, PeerThread,
};
use crate::threads::{Direction, Payload, ThreadStore};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent, SessionEvent, SessionObserver};
use crate::wire::{parse_inbound, random_wire_id, InboundFrame, OutboundDirectMessage};

pub(crate) use config::{load_app_config, AppConfig, CONFIG_FILE_NAME};
use session::SessionManager;

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: AppConfig,
    runtime: tokio::runtime::Runtime,

    session: SessionManager,
    threads: ThreadStore,
    presence: PresenceTracker,
    // Caller-supplied contact list, in the order it was given.
    contacts: Vec<Contact>,
    // (peer, request_id) of paid updates that were settled while offline.
    unsent_paid_updates: Vec<(String, String)>,

    settlement_client: SharedSettlementClient,
    auth_failure_hook: SharedAuthFailureHook,
}

impl AppCore {
    pub(crate) fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        config: AppConfig,
        shared_state: Arc<RwLock<AppState>>,
        settlement_client: SharedSettlementClient,
        auth_failure_hook: SharedAuthFailureHook,
    ) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let session = SessionManager::new(
            SessionCredential::new(),
            config.reconnect_base(),
            config.reconnect_cap(),
        );

        Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            session,
            threads: ThreadStore::new(),
            presence: PresenceTracker::new(),
            contacts: vec![],
            unsent_paid_updates: vec![],
            settlement_client,
            auth_failure_hook,
        }
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    /// Rebuild the derived parts of `AppState` from the owned stores.
    fn project_state(&mut self) {
        self.state.connection = self.session.connection_state();
        self.state.active_peer = self.threads.active_peer().map(str::to_owned);
        self.state.threads = self
            .threads
            .peers()
            .iter()
            .map(|peer| PeerThread {
                peer: peer.clone(),
                messages: self
                    .threads
                    .thread(peer)
                    .iter()
                    .map(ChatMessage::from)
                    .collect(),
            })
            .collect();
        self.state.presence = self.presence.online();
        self.state.unread = self.threads.unread_map().clone();
        self.state.contacts = rank_contacts(&self.ranking_input(), &self.presence, self.threads.unread_map());
    }

    /// The contact list plus any peer we have a thread with but who is not listed.
    fn ranking_input(&self) -> Vec<Contact> {
        let mut seen: HashSet<&str> = self.contacts.iter().map(|c| c.username.as_str()).collect();
        let mut all = self.contacts.clone();
        for peer in self.threads.peers() {
            if seen.insert(peer.as_str()) {
                all.push(Contact {
                    username: peer.clone(),
                    display_name: None,
                });
            }
        }
        all
    }

    fn emit_state(&mut self) {
        self.project_state();
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Keep toast in state until the UI explicitly clears it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: `Connect` carries the token.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
            CoreMsg::AddSessionObserver(observer) => self.session.add_observer(observer),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::SocketOpened { generation } => self.on_socket_opened(generation),
            InternalEvent::FrameReceived { generation, text } => {
                self.handle_frame(generation, &text)
            }
            InternalEvent::SocketClosed {
                generation,
                reason,
                auth_rejected,
            } => self.on_socket_closed(generation, &reason, auth_rejected),
            InternalEvent::ReconnectTimerFired { token } => self.on_reconnect_timer(token),
            InternalEvent::SettlementFinished {
                peer,
                request_id,
                result,
            } => self.on_settlement_finished(&peer, &request_id, result),
            InternalEvent::AuthFailureReported { reason } => self.fire_auth_failure(&reason),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::Connect { token } => self.connect_session(&token),
            AppAction::Disconnect => self.disconnect_session(),
            AppAction::OpenChat { peer } => {
                let peer = peer.trim();
                if peer.is_empty() {
                    return;
                }
                self.threads.activate(peer);
                self.emit_state();
            }
            AppAction::CloseChat => {
                self.threads.deactivate();
                self.emit_state();
            }
            AppAction::SendMessage { peer, body } => self.send_message(peer.trim(), &body),
            AppAction::SendPaymentRequest { peer, amount } => {
                self.send_payment_request(peer.trim(), amount)
            }
            AppAction::SettlePaymentRequest { peer, request_id } => {
                self.settle_payment_request(peer.trim(), &request_id)
            }
            AppAction::SetContacts { contacts } => {
                self.contacts = contacts
                    .into_iter()
                    .filter(|c| !c.username.trim().is_empty())
                    .collect();
                self.emit_state();
            }
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_state();
                }
            }
        }
    }

    /// Appends to the peer's thread and sends. Only valid while online.
    fn send_message(&mut self, peer: &str, body: &str) {
        if peer.is_empty() || body.trim().is_empty() {
            return;
        }
        if !self.session.is_online() {
            self.toast("Not connected");
            return;
        }
        let created_at_ms = now_millis();
        let id = self.threads.append_sent(peer, body, created_at_ms);
        match OutboundDirectMessage::new(id, peer, body, created_at_ms).to_json() {
            Ok(frame) => {
                if !self.send_frame(frame) {
                    tracing::warn!(peer, id, "message queued but socket refused it");
                }
            }
            Err(e) => tracing::error!(%e, "encode outbound frame"),
        }
        self.emit_state();
    }

    /// Sends a frame that is not recorded in any thread.
    fn send_control(&mut self, peer: &str, body: &str) -> bool {
        match OutboundDirectMessage::new(random_wire_id(), peer, body, now_millis()).to_json() {
            Ok(frame) => self.send_frame(frame),
            Err(e) => {
                tracing::error!(%e, "encode control frame");
                false
            }
        }
    }
}

impl Drop for AppCore {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}
