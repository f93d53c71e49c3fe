// Payment request side effects: creating requests, paying them and applying
// status updates from the other side.

use super::*;

impl AppCore {
    pub(super) fn send_payment_request(&mut self, peer: &str, amount: f64) {
        let Some(amount_cents) = amount_to_cents(amount) else {
            self.toast("Enter an amount greater than zero");
            return;
        };
        let body = microapp::encode(&MicroAppPayload::PaymentRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            amount_cents,
        });
        self.send_message(peer, &body);
    }

    pub(super) fn settle_payment_request(&mut self, peer: &str, request_id: &str) {
        let authored_locally = self
            .threads
            .thread(peer)
            .iter()
            .find(|m| m.payment().is_some_and(|p| p.request_id == request_id))
            .map(|m| m.direction == Direction::Sent);
        let Some(authored_locally) = authored_locally else {
            tracing::debug!(peer, request_id, "settle for unknown request ignored");
            return;
        };
        let Some(bearer) = self.session.credential.bearer() else {
            self.toast("Sign in to pay requests");
            return;
        };
        let Some(payment) = self.threads.payment_mut(peer, request_id) else {
            return;
        };
        if let Err(rejection) = payment.begin_settle(authored_locally) {
            tracing::info!(peer, request_id, ?rejection, "settle rejected");
            self.toast(rejection.user_visible_message());
            return;
        }
        let amount_cents = payment.amount_cents;
        tracing::info!(peer, request_id, amount_cents, "settling payment request");
        self.notify_payment(peer, request_id);
        self.emit_state();

        let client = match self.settlement_client.read() {
            Ok(slot) => slot.clone(),
            Err(poison) => poison.into_inner().clone(),
        };
        let handle = self.runtime.handle().clone();
        let tx = self.core_sender.clone();
        let peer = peer.to_string();
        let request_id = request_id.to_string();
        self.runtime.spawn_blocking(move || {
            let result = client.submit(&handle, &bearer, &peer, amount_cents);
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::SettlementFinished {
                    peer,
                    request_id,
                    result,
                },
            )));
        });
    }

    pub(super) fn on_settlement_finished(
        &mut self,
        peer: &str,
        request_id: &str,
        result: Result<(), SettlementError>,
    ) {
        let Some(payment) = self.threads.payment_mut(peer, request_id) else {
            tracing::warn!(peer, request_id, "settlement result for unknown request");
            return;
        };
        match result {
            Ok(()) => {
                if !payment.settle_succeeded() {
                    return;
                }
                tracing::info!(peer, request_id, "payment settled");
                if !self.send_paid_update(peer, request_id) {
                    tracing::info!(peer, request_id, "offline; paid update held until reconnect");
                    self.hold_paid_update(peer, request_id);
                }
                self.notify_payment(peer, request_id);
                self.emit_state();
            }
            Err(e) => {
                let changed = payment.settle_failed(e.message.clone());
                tracing::warn!(peer, request_id, kind = ?e.kind, %e, "settlement failed");
                if e.is_unauthorized() {
                    self.fire_auth_failure(&e.message);
                }
                if changed {
                    self.notify_payment(peer, request_id);
                    self.toast(format!("Payment failed: {e}"));
                }
            }
        }
    }

    fn send_paid_update(&mut self, peer: &str, request_id: &str) -> bool {
        let update = microapp::encode(&MicroAppPayload::PaymentRequestUpdate {
            request_id: request_id.to_string(),
            status: RemotePaymentStatus::Paid,
        });
        self.send_control(peer, &update)
    }

    fn hold_paid_update(&mut self, peer: &str, request_id: &str) {
        let key = (peer.to_string(), request_id.to_string());
        if !self.unsent_paid_updates.contains(&key) {
            self.unsent_paid_updates.push(key);
        }
    }

    /// Re-sends paid updates held while the socket was down, oldest first.
    pub(super) fn flush_paid_updates(&mut self) {
        let held = std::mem::take(&mut self.unsent_paid_updates);
        for (peer, request_id) in held {
            if self.send_paid_update(&peer, &request_id) {
                tracing::info!(peer = %peer, request_id = %request_id, "held paid update sent");
            } else {
                self.hold_paid_update(&peer, &request_id);
            }
        }
    }

    pub(super) fn apply_remote_payment_update(
        &mut self,
        peer: &str,
        request_id: &str,
        status: RemotePaymentStatus,
    ) {
        let Some(payment) = self.threads.payment_mut(peer, request_id) else {
            tracing::debug!(peer, request_id, "update for unknown request ignored");
            return;
        };
        if payment.apply_remote(status) {
            tracing::info!(peer, request_id, ?status, "payment request updated by peer");
            self.notify_payment(peer, request_id);
            self.emit_state();
        }
    }

    fn notify_payment(&self, peer: &str, request_id: &str) {
        let Some(status) = self
            .threads
            .thread(peer)
            .iter()
            .filter_map(|m| m.payment())
            .find(|p| p.request_id == request_id)
            .map(|p| p.status)
        else {
            return;
        };
        self.session.notify(SessionEvent::PaymentUpdated {
            peer: peer.to_string(),
            request_id: request_id.to_string(),
            status,
        });
    }

    pub(super) fn fire_auth_failure(&self, reason: &str) {
        tracing::warn!(reason, "auth failure");
        let hook = match self.auth_failure_hook.read() {
            Ok(slot) => slot.clone(),
            Err(poison) => poison.into_inner().clone(),
        };
        if let Some(hook) = hook {
            hook.on_auth_failure(reason.to_string());
        }
    }
}
