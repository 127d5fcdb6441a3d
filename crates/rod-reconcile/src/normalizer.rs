//! Event normalizer: push payloads and REST bodies to canonical types.
//!
//! # Purpose
//! The backend speaks several dialects: legacy channel names (`new-order`),
//! renamed fields (`_id`, `orderNumber`, `isRead`), amounts as strings or
//! numbers, timestamps as RFC 3339 or epoch values. This module is the only
//! place that knows about any of that. Everything it returns is canonical:
//! [`ChangeEvent`], [`Order`], [`Notification`].
//!
//! # Design constraints
//! - Pure, deterministic. No IO, no clock; the caller passes `received_at_ms`
//!   or `fetched_at_ms`.
//! - Failures are [`MalformedEvent`] values. Callers log and drop them; one
//!   bad payload never stops the pipeline.
//! - A payload without an id gets a UUID v5 over its canonical JSON, and a
//!   payload without a sequence number gets one derived from the same digest.
//!   Redelivering the same malformed payload therefore yields the same id and
//!   sequence and is deduped downstream. Status changes carrying neither a
//!   sequence nor `updatedAt` also fold the receive time into that digest.

use std::fmt;

use chrono::DateTime;
use rod_schemas::{
    NotificationsPage, OrdersPage, RawNotification, RawNotificationRead, RawOrder,
    RawOrderStatusChange, RawUnreadCount,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::event::ChangeEvent;
use crate::snapshot::NotificationsSnapshot;
use crate::status::OrderStatus;
use crate::types::{Notification, Order, OrderItem, Origin, Priority, CENTS_SCALE};

/// Namespace for synthesised ids (UUID v5).
const FALLBACK_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_4a8e_2d3b_4c5a_9e7f_0b1d_2c3e_4f5a);

/// Epoch values below this are seconds rather than milliseconds.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Push channel names the normalizer understands. Aliases collapse here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushChannel {
    OrderNew,
    OrderStatus,
    NotificationNew,
    NotificationRead,
    UnreadCount,
}

impl PushChannel {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "order:new" | "new-order" => Some(Self::OrderNew),
            "order:status" | "order-status-updated" => Some(Self::OrderStatus),
            "notifications.new" => Some(Self::NotificationNew),
            "notifications.read" => Some(Self::NotificationRead),
            "notifications.unread_count.updated" => Some(Self::UnreadCount),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedEvent {
    UnknownChannel { channel: String },
    /// Payload did not match the channel's shape at all.
    Decode { channel: String, detail: String },
    MissingField {
        channel: String,
        field: &'static str,
    },
    UnknownStatus { entity_id: String, raw: String },
    InvalidAmount { entity_id: String, raw: String },
    NegativeCount { count: i64 },
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownChannel { channel } => write!(f, "unknown push channel '{channel}'"),
            Self::Decode { channel, detail } => {
                write!(f, "'{channel}' payload could not be decoded: {detail}")
            }
            Self::MissingField { channel, field } => {
                write!(f, "'{channel}' payload is missing required field '{field}'")
            }
            Self::UnknownStatus { entity_id, raw } => {
                write!(f, "order '{entity_id}' has unrecognised status '{raw}'")
            }
            Self::InvalidAmount { entity_id, raw } => {
                write!(f, "order '{entity_id}' has unparseable amount '{raw}'")
            }
            Self::NegativeCount { count } => write!(f, "unread count must be >= 0, got {count}"),
        }
    }
}

impl std::error::Error for MalformedEvent {}

// ---------------------------------------------------------------------------
// Push entry point
// ---------------------------------------------------------------------------

/// Normalize one push frame. Returns zero or more events (currently at most
/// one per frame).
pub fn normalize_push(
    channel: &str,
    data: &Value,
    received_at_ms: i64,
) -> Result<Vec<ChangeEvent>, MalformedEvent> {
    let Some(kind) = PushChannel::parse(channel) else {
        return Err(MalformedEvent::UnknownChannel {
            channel: channel.to_string(),
        });
    };

    let event = match kind {
        PushChannel::OrderNew => {
            let body = unwrap_wrapper(data, "order");
            let raw: RawOrder = decode(channel, body)?;
            let seq = raw.seq.unwrap_or_else(|| fallback_seq(body));
            let order = normalize_order(raw, body, received_at_ms)?;
            ChangeEvent::order(order, Some(seq), Origin::Push)
        }
        PushChannel::OrderStatus => {
            let raw: RawOrderStatusChange = decode(channel, data)?;
            let order_id = required(channel, raw.order_id, "orderId")?;
            let raw_status = required(channel, raw.status, "status")?;
            let status = OrderStatus::parse(&raw_status).map_err(|e| {
                MalformedEvent::UnknownStatus {
                    entity_id: order_id.clone(),
                    raw: e.raw,
                }
            })?;
            let updated_at = raw.updated_at.as_ref().and_then(parse_timestamp_ms);
            let ts = updated_at.unwrap_or(received_at_ms);
            // Without a sequence or timestamp a later repeat of the same status
            // is a new transition, not a redelivery.
            let seq = raw.seq.unwrap_or_else(|| match updated_at {
                Some(_) => fallback_seq(data),
                None => fallback_seq(&serde_json::json!({
                    "frame": data,
                    "receivedAt": received_at_ms,
                })),
            });
            ChangeEvent::order_status(order_id, status, Some(seq), ts, Origin::Push)
        }
        PushChannel::NotificationNew => {
            let body = unwrap_wrapper(data, "notification");
            let raw: RawNotification = decode(channel, body)?;
            let seq = raw.seq.unwrap_or_else(|| fallback_seq(body));
            let n = normalize_notification(raw, body, received_at_ms);
            ChangeEvent::notification(n, Some(seq), Origin::Push)
        }
        PushChannel::NotificationRead => {
            let raw: RawNotificationRead = decode(channel, data)?;
            let id = required(channel, raw.id, "id")?;
            let ts = raw
                .timestamp
                .as_ref()
                .and_then(parse_timestamp_ms)
                .unwrap_or(received_at_ms);
            let seq = raw.seq.unwrap_or_else(|| fallback_seq(data));
            ChangeEvent::notification_read(id, Some(seq), ts, Origin::Push)
        }
        PushChannel::UnreadCount => {
            // Some backends send the bare number.
            let (count, ts, seq) = match data {
                Value::Number(n) => (n.as_i64(), None, None),
                _ => {
                    let raw: RawUnreadCount = decode(channel, data)?;
                    (raw.unread_count, raw.timestamp, raw.seq)
                }
            };
            let count = count.ok_or(MalformedEvent::MissingField {
                channel: channel.to_string(),
                field: "unreadCount",
            })?;
            let count = u64::try_from(count).map_err(|_| MalformedEvent::NegativeCount { count })?;
            let ts = ts
                .as_ref()
                .and_then(parse_timestamp_ms)
                .unwrap_or(received_at_ms);
            let seq = seq.unwrap_or_else(|| fallback_seq(data));
            ChangeEvent::unread_count(count, Some(seq), ts, Origin::Push)
        }
    };

    Ok(vec![event])
}

// ---------------------------------------------------------------------------
// REST adapters
// ---------------------------------------------------------------------------

/// Normalize every page of `GET /orders`. Bad entries are returned separately
/// so one corrupt row does not discard the whole poll.
pub fn orders_from_pages(
    pages: &[OrdersPage],
    fetched_at_ms: i64,
) -> (Vec<Order>, Vec<MalformedEvent>) {
    let mut orders = Vec::new();
    let mut errors = Vec::new();
    for value in pages.iter().flat_map(|p| p.items.iter()) {
        match order_from_value(value, fetched_at_ms) {
            Ok(o) => orders.push(o),
            Err(e) => errors.push(e),
        }
    }
    (orders, errors)
}

/// Normalize one order body (`GET /orders/{id}`, status POST response).
pub fn order_from_value(value: &Value, fallback_ts_ms: i64) -> Result<Order, MalformedEvent> {
    let body = unwrap_wrapper(value, "order");
    let raw: RawOrder = decode("GET /orders", body)?;
    normalize_order(raw, body, fallback_ts_ms)
}

pub fn notifications_from_page(
    page: &NotificationsPage,
    fetched_at_ms: i64,
) -> (NotificationsSnapshot, Vec<MalformedEvent>) {
    let mut items = Vec::new();
    let mut errors = Vec::new();
    for value in &page.items {
        match decode::<RawNotification>("GET /notifications", value) {
            Ok(raw) => items.push(normalize_notification(raw, value, fetched_at_ms)),
            Err(e) => errors.push(e),
        }
    }
    let unread_count = page.unread_count.and_then(|c| u64::try_from(c).ok());
    (
        NotificationsSnapshot {
            items,
            unread_count,
        },
        errors,
    )
}

// ---------------------------------------------------------------------------
// Entity normalization
// ---------------------------------------------------------------------------

fn normalize_order(raw: RawOrder, basis: &Value, fallback_ts_ms: i64) -> Result<Order, MalformedEvent> {
    let id = non_empty(raw.id).unwrap_or_else(|| fallback_id("order", basis));

    let status = match non_empty(raw.status) {
        Some(s) => OrderStatus::parse(&s).map_err(|e| MalformedEvent::UnknownStatus {
            entity_id: id.clone(),
            raw: e.raw,
        })?,
        // An order the backend has not classified yet is a new order.
        None => OrderStatus::Received,
    };

    let total_amount_cents = match &raw.total_amount {
        Some(v) => amount_to_cents(v).ok_or_else(|| MalformedEvent::InvalidAmount {
            entity_id: id.clone(),
            raw: v.to_string(),
        })?,
        None => 0,
    };

    let mut items = Vec::with_capacity(raw.items.len());
    for item in raw.items {
        let unit_price_cents = match &item.unit_price {
            Some(v) => amount_to_cents(v).ok_or_else(|| MalformedEvent::InvalidAmount {
                entity_id: id.clone(),
                raw: v.to_string(),
            })?,
            None => 0,
        };
        items.push(OrderItem {
            name: item.name.unwrap_or_default(),
            quantity: item.quantity.unwrap_or(1),
            unit_price_cents,
        });
    }

    let created_at_ms = raw
        .created_at
        .as_ref()
        .and_then(parse_timestamp_ms)
        .unwrap_or(fallback_ts_ms);
    let updated_at_ms = raw
        .updated_at
        .as_ref()
        .and_then(parse_timestamp_ms)
        .unwrap_or(created_at_ms)
        .max(created_at_ms);

    Ok(Order {
        external_id: non_empty(raw.external_id).unwrap_or_else(|| id.clone()),
        id,
        status,
        total_amount_cents,
        items,
        customer_name: raw.customer_name.unwrap_or_default(),
        channel: raw.channel.unwrap_or_default(),
        created_at_ms,
        updated_at_ms,
        version: 0,
    })
}

fn normalize_notification(raw: RawNotification, basis: &Value, fallback_ts_ms: i64) -> Notification {
    Notification {
        id: non_empty(raw.id).unwrap_or_else(|| fallback_id("notification", basis)),
        kind: raw.kind.unwrap_or_else(|| "general".to_string()),
        priority: Priority::parse_lenient(raw.priority.as_deref()),
        title: raw.title.unwrap_or_default(),
        message: raw.message.unwrap_or_default(),
        timestamp_ms: raw
            .timestamp
            .as_ref()
            .and_then(parse_timestamp_ms)
            .unwrap_or(fallback_ts_ms),
        read: raw.read.unwrap_or(false),
        data: raw.data.unwrap_or(Value::Null),
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn decode<T: DeserializeOwned>(channel: &str, v: &Value) -> Result<T, MalformedEvent> {
    serde_json::from_value(v.clone()).map_err(|e| MalformedEvent::Decode {
        channel: channel.to_string(),
        detail: e.to_string(),
    })
}

fn required(
    channel: &str,
    v: Option<String>,
    field: &'static str,
) -> Result<String, MalformedEvent> {
    non_empty(v).ok_or(MalformedEvent::MissingField {
        channel: channel.to_string(),
        field,
    })
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// `{"order": {...}}` and `{...}` are both accepted.
fn unwrap_wrapper<'a>(v: &'a Value, key: &str) -> &'a Value {
    match v.get(key) {
        Some(inner) if inner.is_object() => inner,
        _ => v,
    }
}

fn digest(basis: &Value) -> Uuid {
    // serde_json object keys serialize in a fixed order, so identical payloads
    // produce identical bytes.
    let bytes = serde_json::to_vec(basis).unwrap_or_default();
    Uuid::new_v5(&FALLBACK_NAMESPACE, &bytes)
}

/// Deterministic id for a payload that arrived without one.
pub fn fallback_id(kind: &str, basis: &Value) -> String {
    format!("{kind}-{}", digest(basis).simple())
}

/// Deterministic sequence number for a payload that arrived without one.
pub fn fallback_seq(basis: &Value) -> u64 {
    let b = digest(basis).into_bytes();
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Epoch seconds, epoch milliseconds, numeric strings, and RFC 3339.
pub fn parse_timestamp_ms(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().map(epoch_to_ms),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                return Some(epoch_to_ms(n));
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        _ => None,
    }
}

fn epoch_to_ms(n: i64) -> i64 {
    if n.abs() < SECONDS_CUTOFF {
        n.saturating_mul(1_000)
    } else {
        n
    }
}

/// Decimal amount to integer cents without floating point. More than two
/// decimal places is rejected rather than rounded.
pub fn amount_to_cents(v: &Value) -> Option<i64> {
    let s = match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(&s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) || frac_part.len() > 2 {
        return None;
    }

    let whole: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let mut frac: i64 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().ok()?
    };
    if frac_part.len() == 1 {
        frac *= 10;
    }

    let cents = whole.checked_mul(CENTS_SCALE)?.checked_add(frac)?;
    Some(if negative { -cents } else { cents })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
