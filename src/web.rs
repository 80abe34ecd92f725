use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeEvent, DonationEvent};
use crate::config::Config;

static EVENT_SINK: OnceCell<mpsc::Sender<BridgeEvent>> = OnceCell::new();

fn event_sink() -> &'static mpsc::Sender<BridgeEvent> {
    EVENT_SINK
        .get()
        .expect("event sink is not initialized before handler execution")
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub fn new(config: Arc<Config>, events: mpsc::Sender<BridgeEvent>) -> Self {
        let _ = EVENT_SINK.set(events);
        Self { config }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.web.bind_address, self.config.web.port);
        info!("Starting webhook listener on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}

pub fn create_router() -> Router {
    Router::with_path("webhooks/kofi").post(receive_kofi)
}

#[handler]
pub async fn receive_kofi(req: &mut Request, res: &mut Response) {
    // Ko-fi posts a urlencoded form whose `data` field is a JSON string; test
    // tools tend to post the JSON document directly instead.
    let raw = match req.form::<String>("data").await {
        Some(data) => data,
        None => match req.payload().await {
            Ok(bytes) => String::from_utf8_lossy(bytes).to_string(),
            Err(err) => {
                warn!("unreadable webhook body: {err}");
                res.status_code(StatusCode::BAD_REQUEST);
                res.render(Json(json!({ "error": "unreadable body" })));
                return;
            }
        },
    };

    match parse_donation(&raw) {
        Ok(event) => {
            debug!("received donation webhook: {:?}", event);
            if let Err(err) = event_sink().send(BridgeEvent::Donation(event)).await {
                error!("failed to enqueue donation event: {err}");
            }
            // Ko-fi only cares about the 200.
            res.render(Json(json!({ "status": "OK" })));
        }
        Err(err) => {
            warn!("rejected kofi payload: {err}");
            res.status_code(StatusCode::BAD_REQUEST);
            res.render(Json(json!({ "error": err.to_string() })));
        }
    }
}

fn parse_donation(raw: &str) -> Result<DonationEvent> {
    let value: Value = serde_json::from_str(raw.trim())?;

    // Unwrap a {"data": ...} envelope, then a double-encoded payload.
    let data = value.get("data").cloned().unwrap_or(value);
    let data = match data {
        Value::String(inner) => serde_json::from_str(&inner)?,
        other => other,
    };

    let amount = data
        .get("amount")
        .and_then(parse_amount)
        .ok_or_else(|| anyhow!("payload has no usable amount"))?;

    let timestamp = data
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| {
            warn!("payload has no parseable timestamp, falling back to now");
            Utc::now()
        });

    let text = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(DonationEvent {
        payment_source: "Ko-fi".to_string(),
        payment_id: text("message_id"),
        timestamp,
        amount,
        sender_name: text("from_name"),
        raw_message: text("message"),
    })
}

/// Ko-fi serializes the amount as a string ("3.00"); hand-crafted payloads
/// often carry a bare number.
fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KOFI_DATA: &str = r#"{
        "message_id": "3a1fac0c",
        "timestamp": "2024-03-15T12:00:00Z",
        "type": "Donation",
        "from_name": "Jo",
        "message": "good luck — alice#1234",
        "amount": "10.00"
    }"#;

    #[test]
    fn parses_a_plain_kofi_data_object() {
        let event = parse_donation(KOFI_DATA).expect("should parse");
        assert_eq!(event.payment_source, "Ko-fi");
        assert_eq!(event.payment_id, "3a1fac0c");
        assert_eq!(event.amount, 10.0);
        assert_eq!(event.sender_name, "Jo");
        assert_eq!(event.raw_message, "good luck — alice#1234");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-03-15T12:00:00+00:00");
    }

    #[test]
    fn unwraps_a_double_encoded_data_envelope() {
        let wrapped = json!({ "data": KOFI_DATA }).to_string();
        let event = parse_donation(&wrapped).expect("should parse");
        assert_eq!(event.amount, 10.0);
        assert_eq!(event.payment_id, "3a1fac0c");
    }

    #[test]
    fn unwraps_an_object_data_envelope() {
        let wrapped = json!({
            "data": { "amount": 2.5, "from_name": "Pat", "message": "hi" }
        })
        .to_string();
        let event = parse_donation(&wrapped).expect("should parse");
        assert_eq!(event.amount, 2.5);
        assert_eq!(event.sender_name, "Pat");
    }

    #[test]
    fn numeric_amounts_are_accepted() {
        assert_eq!(parse_amount(&json!("3.00")), Some(3.0));
        assert_eq!(parse_amount(&json!(3)), Some(3.0));
        assert_eq!(parse_amount(&json!(3.5)), Some(3.5));
        assert_eq!(parse_amount(&json!(null)), None);
        assert_eq!(parse_amount(&json!("not a number")), None);
    }

    #[test]
    fn payload_without_amount_is_rejected() {
        assert!(parse_donation(r#"{"from_name": "Jo"}"#).is_err());
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(parse_donation("definitely not json").is_err());
    }

    #[test]
    fn missing_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let event = parse_donation(r#"{"amount": "1.00"}"#).expect("should parse");
        assert!(event.timestamp >= before);
    }
}
