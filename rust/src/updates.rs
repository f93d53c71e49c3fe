use std::fmt;
use std::sync::Arc;

use crate::settlement::SettlementError;
use crate::state::{AppState, ConnectionStatus, PaymentStatus};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

/// Delivered to every registered [`SessionObserver`], in registration order.
#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StatusChanged {
        status: ConnectionStatus,
        attempt: u32,
        generation: u64,
    },
    MessageReceived {
        peer: String,
        message_id: String,
    },
    MessageDelivered {
        peer: String,
        message_id: String,
    },
    PresenceChanged {
        peer: String,
        online: bool,
    },
    PaymentUpdated {
        peer: String,
        request_id: String,
        status: PaymentStatus,
    },
    RelayError {
        body: String,
    },
}

#[uniffi::export(callback_interface)]
pub trait SessionObserver: Send + Sync + 'static {
    fn on_session_event(&self, event: SessionEvent);
}

pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
    AddSessionObserver(Arc<dyn SessionObserver>),
}

impl fmt::Debug for CoreMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreMsg::Action(action) => f.debug_tuple("Action").field(&action.tag()).finish(),
            CoreMsg::Internal(event) => f.debug_tuple("Internal").field(event).finish(),
            CoreMsg::AddSessionObserver(_) => f.write_str("AddSessionObserver"),
        }
    }
}

#[derive(Debug)]
pub enum InternalEvent {
    // Websocket IO, tagged with the connect attempt that produced it.
    SocketOpened {
        generation: u64,
    },
    FrameReceived {
        generation: u64,
        text: String,
    },
    SocketClosed {
        generation: u64,
        reason: String,
        auth_rejected: bool,
    },
    ReconnectTimerFired {
        token: u64,
    },

    // Async results
    SettlementFinished {
        peer: String,
        request_id: String,
        result: Result<(), SettlementError>,
    },
    AuthFailureReported {
        reason: String,
    },
}
