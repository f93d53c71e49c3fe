use std::collections::HashMap;

use crate::microapp::format_cents;
use crate::payment::PaymentRequest;
use crate::threads::{Direction, Payload, StoredMessage};

#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub connection: ConnectionState,
    pub active_peer: Option<String>,
    pub threads: Vec<PeerThread>,
    pub presence: Vec<String>,
    pub unread: HashMap<String, u32>,
    pub contacts: Vec<ContactSummary>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            connection: ConnectionState::offline(),
            active_peer: None,
            threads: vec![],
            presence: vec![],
            unread: HashMap::new(),
            contacts: vec![],
            toast: None,
        }
    }

    pub fn thread(&self, peer: &str) -> Option<&PeerThread> {
        self.threads.iter().find(|t| t.peer == peer)
    }
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Offline,
    Connecting,
    Online,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub attempt: u32,
    pub generation: u64,
}

impl ConnectionState {
    pub fn offline() -> Self {
        Self {
            status: ConnectionStatus::Offline,
            attempt: 0,
            generation: 0,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct PeerThread {
    pub peer: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageDirection {
    Sent,
    Received,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Processing,
    Paid,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequestView {
    pub request_id: String,
    pub amount_cents: i64,
    pub amount_display: String,
    pub status: PaymentStatus,
    pub error: Option<String>,
    /// Only the receiving side may pay, and only while pending.
    pub can_settle: bool,
}

#[derive(uniffi::Record, Clone, Debug)]
pub struct ChatMessage {
    pub id: String,
    pub peer: String,
    pub direction: MessageDirection,
    pub body: String,
    pub display_content: String,
    pub created_at_ms: i64,
    pub delivered: bool,
    pub payment: Option<PaymentRequestView>,
}

impl ChatMessage {
    pub fn is_sent(&self) -> bool {
        self.direction == MessageDirection::Sent
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub username: String,
    pub display_name: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ContactSummary {
    pub peer: String,
    pub display_name: String,
    pub unread_count: u32,
    pub online: bool,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn payment_view(payment: &PaymentRequest, direction: Direction) -> PaymentRequestView {
    PaymentRequestView {
        request_id: payment.request_id.clone(),
        amount_cents: payment.amount_cents,
        amount_display: format_cents(payment.amount_cents),
        status: payment.status,
        error: payment.error.clone(),
        can_settle: direction == Direction::Received && payment.status == PaymentStatus::Pending,
    }
}

impl From<&StoredMessage> for ChatMessage {
    fn from(msg: &StoredMessage) -> Self {
        let (display_content, payment) = match &msg.payload {
            Payload::Text => (msg.body.clone(), None),
            Payload::PaymentRequest(p) => (
                format!("Payment request: {}", format_cents(p.amount_cents)),
                Some(payment_view(p, msg.direction)),
            ),
            Payload::MicroApp { kind } => (format!("[{kind}]"), None),
        };
        ChatMessage {
            id: msg.id.clone(),
            peer: msg.peer.clone(),
            direction: match msg.direction {
                Direction::Sent => MessageDirection::Sent,
                Direction::Received => MessageDirection::Received,
            },
            body: msg.body.clone(),
            display_content,
            created_at_ms: msg.created_at_ms,
            delivered: msg.delivered,
            payment,
        }
    }
}
