// Payment request lifecycle: pending -> processing -> paid, with an error side channel.

use crate::microapp::RemotePaymentStatus;
use crate::state::PaymentStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub request_id: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleRejection {
    /// The local user created the request; only the recipient may pay it.
    OwnRequest,
    InFlight,
    AlreadyPaid,
}

impl SettleRejection {
    pub fn user_visible_message(&self) -> &'static str {
        match self {
            SettleRejection::OwnRequest => "You can't pay your own request",
            SettleRejection::InFlight => "Payment already in progress",
            SettleRejection::AlreadyPaid => "Request already paid",
        }
    }
}

fn rank(status: &PaymentStatus) -> u8 {
    match status {
        PaymentStatus::Pending => 0,
        PaymentStatus::Processing => 1,
        PaymentStatus::Paid => 2,
    }
}

impl PaymentRequest {
    pub fn new(request_id: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            request_id: request_id.into(),
            amount_cents,
            status: PaymentStatus::Pending,
            error: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    pub fn begin_settle(&mut self, authored_locally: bool) -> Result<(), SettleRejection> {
        if authored_locally {
            return Err(SettleRejection::OwnRequest);
        }
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Processing;
                self.error = None;
                Ok(())
            }
            PaymentStatus::Processing => Err(SettleRejection::InFlight),
            PaymentStatus::Paid => Err(SettleRejection::AlreadyPaid),
        }
    }

    /// Returns true if the request changed.
    pub fn settle_succeeded(&mut self) -> bool {
        if self.is_paid() {
            return false;
        }
        self.status = PaymentStatus::Paid;
        self.error = None;
        true
    }

    pub fn settle_failed(&mut self, reason: impl Into<String>) -> bool {
        match self.status {
            PaymentStatus::Paid => false,
            PaymentStatus::Processing | PaymentStatus::Pending => {
                self.status = PaymentStatus::Pending;
                self.error = Some(reason.into());
                true
            }
        }
    }

    /// Remote updates only move forward; `paid` is terminal.
    pub fn apply_remote(&mut self, status: RemotePaymentStatus) -> bool {
        let next = match status {
            RemotePaymentStatus::Pending => PaymentStatus::Pending,
            RemotePaymentStatus::Processing => PaymentStatus::Processing,
            RemotePaymentStatus::Paid => PaymentStatus::Paid,
        };
        if rank(&next) <= rank(&self.status) {
            return false;
        }
        self.status = next;
        self.error = None;
        true
    }
}
