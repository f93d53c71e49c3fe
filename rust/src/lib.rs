mod actions;
mod core;
mod credential;
mod logging;
mod microapp;
mod payment;
mod presence;
mod ranking;
mod settlement;
mod state;
mod threads;
mod updates;
mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use credential::{AuthFailureHook, SessionCredential};
pub use microapp::{
    amount_to_cents, decode as decode_microapp, encode as encode_microapp, format_cents,
    MicroAppPayload, RemotePaymentStatus, MICROAPP_PREFIX,
};
pub use settlement::{
    HttpSettlementClient, SettlementClient, SettlementError, SettlementErrorKind,
};
pub use state::*;
pub use updates::{AppUpdate, SessionEvent, SessionObserver};
pub use wire::{parse_inbound, InboundFrame, OutboundDirectMessage, WireError};

use crate::credential::SharedAuthFailureHook;
use crate::settlement::SharedSettlementClient;
use crate::updates::{CoreMsg, InternalEvent};

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct ChatApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    settlement_client: SharedSettlementClient,
    auth_failure_hook: SharedAuthFailureHook,
}

#[uniffi::export]
impl ChatApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "ChatApp::new() starting");

        let config = core::load_app_config(&data_dir);
        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let default_client: Arc<dyn SettlementClient> = Arc::new(HttpSettlementClient::new(
            config.api_base_url().as_deref().unwrap_or_default(),
        ));
        let settlement_client: SharedSettlementClient = Arc::new(RwLock::new(default_client));
        let auth_failure_hook: SharedAuthFailureHook = Arc::new(RwLock::new(None));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let settlement_for_core = settlement_client.clone();
        let hook_for_core = auth_failure_hook.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                config,
                shared_for_core,
                settlement_for_core,
                hook_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            settlement_client,
            auth_failure_hook,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Observers are called on the actor thread, in the order they were added.
    pub fn add_session_observer(&self, observer: Box<dyn SessionObserver>) {
        let _ = self
            .core_tx
            .send(CoreMsg::AddSessionObserver(Arc::from(observer)));
    }

    pub fn set_auth_failure_hook(&self, hook: Box<dyn AuthFailureHook>) {
        let hook: Arc<dyn AuthFailureHook> = Arc::from(hook);
        match self.auth_failure_hook.write() {
            Ok(mut slot) => *slot = Some(hook),
            Err(poison) => *poison.into_inner() = Some(hook),
        }
    }

    /// For request layers outside the core (login, contact list) that see a 401.
    pub fn report_auth_failure(&self, reason: String) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::AuthFailureReported { reason },
        )));
    }
}

impl ChatApp {
    /// Swap the settlement backend. Not exposed over UniFFI.
    pub fn set_settlement_client(&self, client: Arc<dyn SettlementClient>) {
        match self.settlement_client.write() {
            Ok(mut slot) => *slot = client,
            Err(poison) => *poison.into_inner() = client,
        }
    }
}

/// Return the default `chatsite_config.json` payload used when no config file exists.
pub fn default_config_json() -> String {
    serde_json::json!({
        "api_base_url": null,
        "ws_base_url": null,
        "reconnect_base_ms": 1000,
        "reconnect_cap_ms": 15000,
        "disable_network": false,
    })
    .to_string()
}

pub fn config_file_name() -> &'static str {
    core::CONFIG_FILE_NAME
}
