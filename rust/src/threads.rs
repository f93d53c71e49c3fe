//! Per-peer message threads plus delivery-ack correlation.
//!
//! Threads are created lazily on the first message and live only in memory.
//! Each message's micro-app payload is decoded once when it enters the store.

use std::collections::HashMap;

use crate::microapp::{self, MicroAppPayload};
use crate::payment::PaymentRequest;
use crate::wire::random_wire_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text,
    PaymentRequest(PaymentRequest),
    /// Micro-app kinds this client ignores.
    MicroApp { kind: String },
}

impl Payload {
    pub fn from_decoded(decoded: Option<MicroAppPayload>) -> Self {
        match decoded {
            None => Payload::Text,
            Some(MicroAppPayload::PaymentRequest {
                request_id,
                amount_cents,
            }) => Payload::PaymentRequest(PaymentRequest::new(request_id, amount_cents)),
            Some(other) => Payload::MicroApp {
                kind: other.kind().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub direction: Direction,
    pub peer: String,
    pub body: String,
    pub created_at_ms: i64,
    pub delivered: bool,
    pub payload: Payload,
}

impl StoredMessage {
    pub fn payment(&self) -> Option<&PaymentRequest> {
        match &self.payload {
            Payload::PaymentRequest(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ThreadStore {
    threads: HashMap<String, Vec<StoredMessage>>,
    // Peers in the order their threads were created.
    order: Vec<String>,
    unread: HashMap<String, u32>,
    active_peer: Option<String>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn thread_mut(&mut self, peer: &str) -> &mut Vec<StoredMessage> {
        if !self.threads.contains_key(peer) {
            self.order.push(peer.to_string());
        }
        self.threads.entry(peer.to_string()).or_default()
    }

    fn contains_id(&self, peer: &str, id: &str) -> bool {
        self.threads
            .get(peer)
            .map(|t| t.iter().any(|m| m.id == id))
            .unwrap_or(false)
    }

    fn fresh_id(&self, peer: &str) -> i64 {
        loop {
            let id = random_wire_id();
            if !self.contains_id(peer, &id.to_string()) {
                return id;
            }
        }
    }

    /// Append an outgoing message and return its wire id for ack correlation.
    pub fn append_sent(&mut self, peer: &str, body: &str, created_at_ms: i64) -> i64 {
        let id = self.fresh_id(peer);
        let payload = Payload::from_decoded(microapp::decode(body));
        self.thread_mut(peer).push(StoredMessage {
            id: id.to_string(),
            direction: Direction::Sent,
            peer: peer.to_string(),
            body: body.to_string(),
            created_at_ms,
            delivered: false,
            payload,
        });
        id
    }

    /// Marks the first undelivered sent message with `id` as delivered.
    /// Returns the peer whose thread changed; duplicate and unknown acks return `None`.
    pub fn apply_ack(&mut self, id: &str) -> Option<String> {
        for peer in &self.order {
            let Some(thread) = self.threads.get_mut(peer) else {
                continue;
            };
            if let Some(msg) = thread
                .iter_mut()
                .find(|m| m.direction == Direction::Sent && !m.delivered && m.id == id)
            {
                msg.delivered = true;
                return Some(peer.clone());
            }
        }
        None
    }

    /// Append a received message. Returns the stored id, or `None` when the
    /// id is already present in the thread (relay redelivery).
    pub fn apply_inbound(
        &mut self,
        peer: &str,
        id: Option<String>,
        body: &str,
        payload: Payload,
        created_at_ms: i64,
    ) -> Option<String> {
        let id = match id {
            Some(id) if self.contains_id(peer, &id) => return None,
            Some(id) => id,
            None => self.fresh_id(peer).to_string(),
        };
        self.thread_mut(peer).push(StoredMessage {
            id: id.clone(),
            direction: Direction::Received,
            peer: peer.to_string(),
            body: body.to_string(),
            created_at_ms,
            delivered: true,
            payload,
        });
        if self.active_peer.as_deref() != Some(peer) {
            *self.unread.entry(peer.to_string()).or_insert(0) += 1;
        }
        Some(id)
    }

    pub fn activate(&mut self, peer: &str) {
        self.active_peer = Some(peer.to_string());
        self.unread.insert(peer.to_string(), 0);
    }

    pub fn deactivate(&mut self) {
        self.active_peer = None;
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.active_peer.as_deref()
    }

    pub fn unread(&self, peer: &str) -> u32 {
        self.unread.get(peer).copied().unwrap_or(0)
    }

    pub fn unread_map(&self) -> &HashMap<String, u32> {
        &self.unread
    }

    pub fn peers(&self) -> &[String] {
        &self.order
    }

    pub fn thread(&self, peer: &str) -> &[StoredMessage] {
        self.threads.get(peer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn payment_mut(&mut self, peer: &str, request_id: &str) -> Option<&mut PaymentRequest> {
        self.threads
            .get_mut(peer)?
            .iter_mut()
            .find_map(|m| match &mut m.payload {
                Payload::PaymentRequest(p) if p.request_id == request_id => Some(p),
                _ => None,
            })
    }

    pub fn has_request(&self, peer: &str, request_id: &str) -> bool {
        self.thread(peer)
            .iter()
            .any(|m| m.payment().is_some_and(|p| p.request_id == request_id))
    }
}
