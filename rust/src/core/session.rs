// Session lifecycle: connect attempts, reconnect backoff and inbound frame dispatch.

use super::socket::{spawn_socket, SocketHandle};
use super::*;

/// `min(base * 2^attempt, cap)`.
pub(super) fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

struct ReconnectTimer {
    token: u64,
    delay: Duration,
    task: tokio::task::JoinHandle<()>,
}

pub(super) struct SessionManager {
    pub(super) status: ConnectionStatus,
    pub(super) attempt: u32,
    pub(super) generation: u64,
    pub(super) logged_in: bool,
    pub(super) credential: SessionCredential,
    socket: Option<SocketHandle>,
    timer: Option<ReconnectTimer>,
    timer_seq: u64,
    observers: Vec<Arc<dyn SessionObserver>>,
    base: Duration,
    cap: Duration,
}

impl SessionManager {
    pub(super) fn new(credential: SessionCredential, base: Duration, cap: Duration) -> Self {
        Self {
            status: ConnectionStatus::Offline,
            attempt: 0,
            generation: 0,
            logged_in: false,
            credential,
            socket: None,
            timer: None,
            timer_seq: 0,
            observers: vec![],
            base,
            cap,
        }
    }

    pub(super) fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            status: self.status,
            attempt: self.attempt,
            generation: self.generation,
        }
    }

    pub(super) fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub(super) fn is_online(&self) -> bool {
        self.status == ConnectionStatus::Online && self.socket.is_some()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.task.abort();
        }
    }

    fn close_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
    }

    /// Tears down any live socket or pending timer and starts a new generation.
    fn begin_attempt(&mut self) -> u64 {
        self.cancel_timer();
        self.close_socket();
        self.generation += 1;
        self.status = ConnectionStatus::Connecting;
        self.generation
    }

    fn attach_socket(&mut self, socket: SocketHandle) {
        self.close_socket();
        self.socket = Some(socket);
    }

    fn next_backoff(&mut self) -> Duration {
        let delay = backoff_delay(self.base, self.cap, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn next_timer_token(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }

    /// Consumes the pending timer if `token` is still the armed one.
    fn take_timer(&mut self, token: u64) -> bool {
        match &self.timer {
            Some(timer) if timer.token == token => {
                self.cancel_timer();
                true
            }
            _ => false,
        }
    }

    pub(super) fn pending_reconnect(&self) -> Option<(u64, Duration)> {
        self.timer.as_ref().map(|t| (t.token, t.delay))
    }

    fn reset(&mut self) {
        self.cancel_timer();
        self.close_socket();
        self.generation += 1;
        self.attempt = 0;
        self.logged_in = false;
        self.credential.clear();
        self.status = ConnectionStatus::Offline;
    }

    pub(super) fn send(&self, text: String) -> bool {
        match &self.socket {
            Some(socket) if self.status == ConnectionStatus::Online => socket.send(text),
            _ => false,
        }
    }

    pub(super) fn add_observer(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub(super) fn notify(&self, event: SessionEvent) {
        for observer in &self.observers {
            observer.on_session_event(event.clone());
        }
    }

    pub(super) fn shutdown(&mut self) {
        self.cancel_timer();
        self.close_socket();
    }

    #[cfg(test)]
    pub(super) fn drain_outbound(&mut self) -> Vec<String> {
        self.socket
            .as_mut()
            .map(SocketHandle::drain_outbound)
            .unwrap_or_default()
    }
}

impl AppCore {
    pub(super) fn connect_session(&mut self, token: &str) {
        self.session.credential.initialize(token);
        if !self.session.credential.is_set() {
            self.toast("Missing session token");
            return;
        }
        self.session.logged_in = true;
        self.session.attempt = 0;
        self.open_socket();
    }

    fn open_socket(&mut self) {
        let generation = self.session.begin_attempt();
        tracing::info!(generation, attempt = self.session.attempt, "session connecting");

        if self.network_enabled() {
            let url = self.config.websocket_url();
            let bearer = self.session.credential.bearer();
            let (Some(url), Some(bearer)) = (url, bearer) else {
                tracing::warn!(generation, "no websocket url or token; staying offline");
                self.session.status = ConnectionStatus::Offline;
                self.session.logged_in = false;
                self.notify_status();
                self.toast("No server configured");
                return;
            };
            let socket = spawn_socket(
                &self.runtime,
                url,
                bearer,
                generation,
                self.core_sender.clone(),
            );
            self.session.attach_socket(socket);
        } else {
            self.session.attach_socket(SocketHandle::detached());
        }

        self.notify_status();
        self.emit_state();
    }

    pub(super) fn disconnect_session(&mut self) {
        tracing::info!(generation = self.session.generation, "session disconnect");
        self.session.reset();
        // Presence and held updates belong to the session being torn down.
        self.presence.clear();
        self.unsent_paid_updates.clear();
        self.notify_status();
        self.emit_state();
    }

    pub(super) fn on_socket_opened(&mut self, generation: u64) {
        if !self.session.is_current(generation) || !self.session.logged_in {
            tracing::debug!(generation, "stale socket open ignored");
            return;
        }
        self.session.status = ConnectionStatus::Online;
        self.session.attempt = 0;
        tracing::info!(generation, "session online");
        self.flush_paid_updates();
        self.notify_status();
        self.emit_state();
    }

    pub(super) fn on_socket_closed(&mut self, generation: u64, reason: &str, auth_rejected: bool) {
        if !self.session.is_current(generation) {
            tracing::debug!(generation, reason, "stale socket close ignored");
            return;
        }
        if self.session.status == ConnectionStatus::Offline {
            return;
        }
        self.session.close_socket();
        self.session.status = ConnectionStatus::Offline;
        tracing::info!(generation, reason, auth_rejected, "session offline");

        if auth_rejected {
            self.fire_auth_failure("websocket handshake rejected");
        } else if self.session.logged_in {
            self.schedule_reconnect();
        }
        self.notify_status();
        self.emit_state();
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.session.next_backoff();
        let token = self.session.next_timer_token();
        let tx = self.core_sender.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ReconnectTimerFired { token },
            )));
        });
        tracing::info!(delay_ms = delay.as_millis() as u64, token, "reconnect scheduled");
        self.session.cancel_timer();
        self.session.timer = Some(ReconnectTimer { token, delay, task });
    }

    pub(super) fn on_reconnect_timer(&mut self, token: u64) {
        if !self.session.take_timer(token) {
            return;
        }
        if !self.session.logged_in || self.session.status != ConnectionStatus::Offline {
            return;
        }
        self.open_socket();
    }

    /// Sends a raw frame on the live socket. Returns false when offline.
    pub(super) fn send_frame(&mut self, text: String) -> bool {
        if !self.session.is_online() {
            tracing::warn!(status = ?self.session.status, "send while not online dropped");
            return false;
        }
        self.session.send(text)
    }

    fn notify_status(&self) {
        let state = self.session.connection_state();
        self.session.notify(SessionEvent::StatusChanged {
            status: state.status,
            attempt: state.attempt,
            generation: state.generation,
        });
    }

    pub(super) fn handle_frame(&mut self, generation: u64, text: &str) {
        if !self.session.is_current(generation) {
            tracing::debug!(generation, "stale frame ignored");
            return;
        }
        let frame = match parse_inbound(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%e, "dropping malformed frame");
                return;
            }
        };
        tracing::debug!(frame = frame.tag(), "frame");

        match frame {
            InboundFrame::DirectMessage {
                from,
                body,
                created_at_ms,
                id,
            } => self.apply_direct_message(from.trim(), &body, created_at_ms, id),
            InboundFrame::MessageAck { id } => {
                let Some(peer) = self.threads.apply_ack(&id) else {
                    tracing::debug!(id = %id, "ack for unknown or delivered message");
                    return;
                };
                self.session.notify(SessionEvent::MessageDelivered {
                    peer,
                    message_id: id,
                });
                self.emit_state();
            }
            InboundFrame::UserOnline { from } => {
                if self.presence.set_online(&from) {
                    self.session.notify(SessionEvent::PresenceChanged {
                        peer: from,
                        online: true,
                    });
                    self.emit_state();
                }
            }
            InboundFrame::UserOffline { from } => {
                if self.presence.set_offline(&from) {
                    self.session.notify(SessionEvent::PresenceChanged {
                        peer: from,
                        online: false,
                    });
                    self.emit_state();
                }
            }
            InboundFrame::Error { body } => {
                tracing::warn!(body = %body, "relay error");
                self.session
                    .notify(SessionEvent::RelayError { body: body.clone() });
                self.toast(body);
            }
            InboundFrame::Unknown { type_tag } => {
                tracing::debug!(?type_tag, "ignoring unknown frame");
            }
        }
    }

    fn apply_direct_message(
        &mut self,
        from: &str,
        body: &str,
        created_at_ms: Option<i64>,
        id: Option<String>,
    ) {
        if from.is_empty() {
            tracing::warn!("direct message without sender dropped");
            return;
        }

        let decoded = microapp::decode(body);
        if let Some(MicroAppPayload::PaymentRequestUpdate { request_id, status }) = decoded {
            self.apply_remote_payment_update(from, &request_id, status);
            return;
        }
        let payload = Payload::from_decoded(decoded);
        if let Payload::PaymentRequest(req) = &payload {
            if self.threads.has_request(from, &req.request_id) {
                tracing::warn!(peer = from, request_id = %req.request_id, "duplicate payment request dropped");
                return;
            }
        }

        let created_at_ms = created_at_ms.unwrap_or_else(now_millis);
        match self
            .threads
            .apply_inbound(from, id, body, payload, created_at_ms)
        {
            Some(message_id) => {
                self.session.notify(SessionEvent::MessageReceived {
                    peer: from.to_string(),
                    message_id,
                });
                self.emit_state();
            }
            None => tracing::debug!(peer = from, "redelivered message dropped"),
        }
    }
}
