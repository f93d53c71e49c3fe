//! Micro-app payloads carried inside the free-text `body` of a direct message.
//!
//! A payload is the reserved [`MICROAPP_PREFIX`] followed by a JSON object whose
//! `kind` field selects the variant. Bodies without the prefix are plain text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MICROAPP_PREFIX: &str = "::microapp::";

const KIND_PAYMENT_REQUEST: &str = "payment_request";
const KIND_PAYMENT_REQUEST_UPDATE: &str = "payment_request_update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePaymentStatus {
    Pending,
    Processing,
    Paid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MicroAppPayload {
    PaymentRequest {
        request_id: String,
        amount_cents: i64,
    },
    PaymentRequestUpdate {
        request_id: String,
        status: RemotePaymentStatus,
    },
    /// A kind this client does not understand. Kept verbatim so it round-trips.
    Unknown { kind: String, value: Value },
}

impl MicroAppPayload {
    pub fn kind(&self) -> &str {
        match self {
            MicroAppPayload::PaymentRequest { .. } => KIND_PAYMENT_REQUEST,
            MicroAppPayload::PaymentRequestUpdate { .. } => KIND_PAYMENT_REQUEST_UPDATE,
            MicroAppPayload::Unknown { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequestBody {
    request_id: String,
    amount: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequestUpdateBody {
    request_id: String,
    status: RemotePaymentStatus,
}

/// Convert a decimal dollar amount to integer cents.
///
/// Rejects non-finite, non-positive and sub-cent amounts.
pub fn amount_to_cents(amount: f64) -> Option<i64> {
    if !amount.is_finite() || amount <= 0.0 {
        return None;
    }
    let cents = (amount * 100.0).round();
    if cents < 1.0 || cents > i64::MAX as f64 {
        return None;
    }
    Some(cents as i64)
}

pub fn cents_to_amount(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// `$10.00` style rendering used for display text and toasts.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

pub fn encode(payload: &MicroAppPayload) -> String {
    let value = match payload {
        MicroAppPayload::PaymentRequest {
            request_id,
            amount_cents,
        } => tagged(
            KIND_PAYMENT_REQUEST,
            serde_json::to_value(PaymentRequestBody {
                request_id: request_id.clone(),
                amount: cents_to_amount(*amount_cents),
            }),
        ),
        MicroAppPayload::PaymentRequestUpdate { request_id, status } => tagged(
            KIND_PAYMENT_REQUEST_UPDATE,
            serde_json::to_value(PaymentRequestUpdateBody {
                request_id: request_id.clone(),
                status: *status,
            }),
        ),
        MicroAppPayload::Unknown { value, .. } => value.clone(),
    };
    format!("{MICROAPP_PREFIX}{value}")
}

fn tagged(kind: &str, body: Result<Value, serde_json::Error>) -> Value {
    // Serializing these plain structs cannot fail; fall back to an empty object anyway.
    let mut value = body.unwrap_or_else(|_| Value::Object(Default::default()));
    if let Value::Object(map) = &mut value {
        map.insert("kind".to_string(), Value::String(kind.to_string()));
    }
    value
}

/// Returns `None` when `body` is plain text or the payload is malformed.
pub fn decode(body: &str) -> Option<MicroAppPayload> {
    let raw = body.strip_prefix(MICROAPP_PREFIX)?;
    let value: Value = serde_json::from_str(raw).ok()?;
    let kind = value.as_object()?.get("kind")?.as_str()?.to_string();

    match kind.as_str() {
        KIND_PAYMENT_REQUEST => {
            let body: PaymentRequestBody = serde_json::from_value(value).ok()?;
            if body.request_id.trim().is_empty() {
                return None;
            }
            Some(MicroAppPayload::PaymentRequest {
                request_id: body.request_id,
                amount_cents: amount_to_cents(body.amount)?,
            })
        }
        KIND_PAYMENT_REQUEST_UPDATE => {
            let body: PaymentRequestUpdateBody = serde_json::from_value(value).ok()?;
            if body.request_id.trim().is_empty() {
                return None;
            }
            Some(MicroAppPayload::PaymentRequestUpdate {
                request_id: body.request_id,
                status: body.status,
            })
        }
        _ => Some(MicroAppPayload::Unknown { kind, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_request_round_trips() {
        for cents in [1, 99, 1000, 1050, 123_456_789] {
            let p = MicroAppPayload::PaymentRequest {
                request_id: "req-1".into(),
                amount_cents: cents,
            };
            assert_eq!(decode(&encode(&p)), Some(p));
        }
    }

    #[test]
    fn payment_update_round_trips() {
        for status in [
            RemotePaymentStatus::Pending,
            RemotePaymentStatus::Processing,
            RemotePaymentStatus::Paid,
        ] {
            let p = MicroAppPayload::PaymentRequestUpdate {
                request_id: "req-9".into(),
                status,
            };
            assert_eq!(decode(&encode(&p)), Some(p));
        }
    }

    #[test]
    fn wire_shape_uses_camel_case_and_dollars() {
        let body = encode(&MicroAppPayload::PaymentRequest {
            request_id: "abc".into(),
            amount_cents: 1000,
        });
        let json: Value = serde_json::from_str(body.strip_prefix(MICROAPP_PREFIX).unwrap()).unwrap();
        assert_eq!(json["kind"], "payment_request");
        assert_eq!(json["requestId"], "abc");
        assert_eq!(json["amount"].as_f64(), Some(10.0));
    }

    #[test]
    fn plain_text_is_not_a_payload() {
        assert_eq!(decode("hi"), None);
        assert_eq!(decode(""), None);
        assert_eq!(decode(r#"{"kind":"payment_request","requestId":"a","amount":1}"#), None);
        assert_eq!(decode(" ::microapp::{}"), None);
    }

    #[test]
    fn malformed_payloads_decode_to_none() {
        assert_eq!(decode("::microapp::not json"), None);
        assert_eq!(decode("::microapp::[1,2]"), None);
        assert_eq!(decode(r#"::microapp::{"requestId":"a"}"#), None);
        assert_eq!(decode(r#"::microapp::{"kind":"payment_request","requestId":"a"}"#), None);
        assert_eq!(
            decode(r#"::microapp::{"kind":"payment_request","requestId":"a","amount":-5}"#),
            None
        );
        assert_eq!(
            decode(r#"::microapp::{"kind":"payment_request","requestId":"a","amount":0.001}"#),
            None
        );
        assert_eq!(
            decode(r#"::microapp::{"kind":"payment_request_update","requestId":"a","status":"lost"}"#),
            None
        );
    }

    #[test]
    fn unknown_kinds_are_opaque_and_round_trip() {
        let body = r#"::microapp::{"kind":"poll","question":"lunch?"}"#;
        let decoded = decode(body).expect("opaque payload");
        assert_eq!(decoded.kind(), "poll");
        assert_eq!(decode(&encode(&decoded)), Some(decoded));
    }

    #[test]
    fn cents_conversion_matches_wallet_rules() {
        assert_eq!(amount_to_cents(10.0), Some(1000));
        assert_eq!(amount_to_cents(0.01), Some(1));
        assert_eq!(amount_to_cents(19.999), Some(2000));
        assert_eq!(amount_to_cents(0.0), None);
        assert_eq!(amount_to_cents(f64::NAN), None);
        assert_eq!(format_cents(1000), "$10.00");
        assert_eq!(format_cents(5), "$0.05");
    }
}
