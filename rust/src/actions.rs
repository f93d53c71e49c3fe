use crate::state::Contact;

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Session
    Connect {
        token: String,
    },
    Disconnect,

    // Threads
    OpenChat {
        peer: String,
    },
    CloseChat,
    SendMessage {
        peer: String,
        body: String,
    },

    // Payments
    SendPaymentRequest {
        peer: String,
        amount: f64,
    },
    SettlePaymentRequest {
        peer: String,
        request_id: String,
    },

    // Contacts
    SetContacts {
        contacts: Vec<Contact>,
    },

    // UI
    ClearToast,
}

impl AppAction {
    /// Log-safe action tag (never includes the session token).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::Connect { .. } => "Connect",
            AppAction::Disconnect => "Disconnect",
            AppAction::OpenChat { .. } => "OpenChat",
            AppAction::CloseChat => "CloseChat",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::SendPaymentRequest { .. } => "SendPaymentRequest",
            AppAction::SettlePaymentRequest { .. } => "SettlePaymentRequest",
            AppAction::SetContacts { .. } => "SetContacts",
            AppAction::ClearToast => "ClearToast",
        }
    }
}
