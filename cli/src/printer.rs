// Turns the stream of full-state snapshots into terminal lines.

use std::collections::HashSet;

use chatsite_core::{AppState, ChatMessage, ConnectionStatus, PaymentStatus};

#[derive(Default)]
pub struct Printer {
    last_rev: u64,
    status: Option<ConnectionStatus>,
    seen: HashSet<String>,
    delivered: HashSet<String>,
    // (request_id, status) pairs already reported.
    payments: HashSet<(String, String)>,
    toast: Option<String>,
}

fn status_label(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Processing => "processing",
        PaymentStatus::Paid => "paid",
    }
}

fn describe(msg: &ChatMessage) -> String {
    match &msg.payment {
        Some(p) => {
            let mut line = format!("{} [{}] id={}", msg.display_content, status_label(p.status), p.request_id);
            if let Some(err) = &p.error {
                line.push_str(&format!(" error={err}"));
            }
            line
        }
        None => msg.display_content.clone(),
    }
}

impl Printer {
    /// Lines to print for `state`. Snapshots older than the last one seen yield nothing.
    pub fn render(&mut self, state: &AppState) -> Vec<String> {
        if state.rev <= self.last_rev {
            return vec![];
        }
        self.last_rev = state.rev;
        let mut out = vec![];

        if self.status != Some(state.connection.status) {
            self.status = Some(state.connection.status);
            out.push(format!(
                "* {:?} (attempt {}, generation {})",
                state.connection.status, state.connection.attempt, state.connection.generation
            ));
        }

        for thread in &state.threads {
            for msg in &thread.messages {
                if self.seen.insert(msg.id.clone()) {
                    let arrow = if msg.is_sent() { "->" } else { "<-" };
                    out.push(format!("{arrow} {}: {}", thread.peer, describe(msg)));
                }
                if msg.is_sent() && msg.delivered && self.delivered.insert(msg.id.clone()) {
                    out.push(format!("   delivered to {}", thread.peer));
                }
                if let Some(p) = &msg.payment {
                    let key = (p.request_id.clone(), status_label(p.status).to_string());
                    if p.status != PaymentStatus::Pending && self.payments.insert(key) {
                        out.push(format!("   request {} is {}", p.request_id, status_label(p.status)));
                    }
                }
            }
        }

        if state.toast != self.toast {
            self.toast = state.toast.clone();
            if let Some(toast) = &state.toast {
                out.push(format!("! {toast}"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsite_core::{MessageDirection, PeerThread};

    fn message(id: &str, direction: MessageDirection, delivered: bool) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            peer: "bob".into(),
            direction,
            body: "hi".into(),
            display_content: "hi".into(),
            created_at_ms: 0,
            delivered,
            payment: None,
        }
    }

    fn state(rev: u64, messages: Vec<ChatMessage>) -> AppState {
        let mut state = AppState::empty();
        state.rev = rev;
        state.threads = vec![PeerThread {
            peer: "bob".into(),
            messages,
        }];
        state
    }

    #[test]
    fn prints_each_message_once_and_then_delivery() {
        let mut printer = Printer::default();
        let lines = printer.render(&state(1, vec![message("m1", MessageDirection::Sent, false)]));
        assert_eq!(lines, vec!["* Offline (attempt 0, generation 0)", "-> bob: hi"]);

        let lines = printer.render(&state(2, vec![message("m1", MessageDirection::Sent, true)]));
        assert_eq!(lines, vec!["   delivered to bob"]);

        let lines = printer.render(&state(3, vec![message("m1", MessageDirection::Sent, true)]));
        assert!(lines.is_empty());
    }

    #[test]
    fn stale_snapshots_are_skipped() {
        let mut printer = Printer::default();
        printer.render(&state(5, vec![]));
        assert!(printer
            .render(&state(4, vec![message("m1", MessageDirection::Received, true)]))
            .is_empty());
    }
}
