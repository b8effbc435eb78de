//! # Event Model and Wire Envelopes
//!
//! An `Event` is an opaque, source-defined record: a ledger transaction, a
//! telemetry snapshot or a free-form agent thought. The relay only ever looks at
//! its `id` (for novelty) and its `kind` (for routing on the subscriber side);
//! the `payload` is delivered verbatim.
//!
//! Server -> client frames are JSON objects of the form
//!
//! ```json
//! {"type": "ledger_tx", "transactions": [...], "sequence_id": 7, "ts": "2026-..."}
//! ```
//!
//! where the payload field name depends on the kind (see [`EventKind::payload_field`]).

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag distinguishing the event streams that share one hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Microgrid telemetry snapshot.
    Telemetry,
    /// Ledger (token transfer) transaction.
    LedgerTx,
    /// Free-form informational message, e.g. an agent decision.
    Info,
}

impl EventKind {
    /// The discriminator value written to the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Telemetry => "telemetry",
            EventKind::LedgerTx => "ledger_tx",
            EventKind::Info => "info",
        }
    }

    /// Name of the envelope field that carries the payload list.
    pub fn payload_field(&self) -> &'static str {
        match self {
            EventKind::Telemetry => "events",
            EventKind::LedgerTx => "transactions",
            EventKind::Info => "thoughts",
        }
    }

    /// Inverse of [`EventKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telemetry" => Some(EventKind::Telemetry),
            "ledger_tx" => Some(EventKind::LedgerTx),
            "info" => Some(EventKind::Info),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Event
///
/// One observed unit of data to relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable identifier within the source's event space (e.g. a tx hash).
    /// `None`, empty or blank ids cannot be deduplicated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Stream tag.
    pub kind: EventKind,
    /// Event body, delivered to subscribers unmodified.
    pub payload: Value,
}

impl Event {
    /// Creates an event with a source-provided id.
    pub fn new(id: impl Into<String>, kind: EventKind, payload: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind,
            payload,
        }
    }

    /// Creates an event that has no id and is therefore always novel.
    pub fn anonymous(kind: EventKind, payload: Value) -> Self {
        Self {
            id: None,
            kind,
            payload,
        }
    }

    /// The id usable for deduplication, if any.
    pub fn dedup_key(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// Builds the JSON text of one server -> client frame.
pub fn encode_envelope<'a, I>(kind: EventKind, sequence_id: u64, payloads: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut map = Map::new();
    map.insert("type".to_string(), Value::from(kind.as_str()));
    map.insert(
        kind.payload_field().to_string(),
        Value::Array(payloads.into_iter().cloned().collect()),
    );
    map.insert("sequence_id".to_string(), Value::from(sequence_id));
    map.insert("ts".to_string(), Value::from(Utc::now().to_rfc3339()));
    Value::Object(map).to_string()
}

/// Greeting sent to a freshly accepted connection. `last_sequence_id` is the
/// id of the last publish (0 when there was none), so the next broadcast frame
/// carries `last_sequence_id + 1`.
pub fn welcome_frame(last_sequence_id: u64) -> String {
    let greeting = Value::from("connected");
    encode_envelope(EventKind::Info, last_sequence_id, [&greeting])
}

/// Reply to a client `ping` intent.
pub fn pong_frame() -> String {
    serde_json::json!({ "type": "pong", "ts": Utc::now().to_rfc3339() }).to_string()
}

/// # Wire Envelope
///
/// Subscriber-side view of a server frame. Unknown `type` values (e.g. `pong`)
/// are kept as strings so that newer servers do not break older clients.
///
/// The discriminator is read from `type`, falling back to `kind`; a frame may
/// carry both, in which case `type` wins.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct WireEnvelope {
    /// Stream discriminator.
    pub kind: String,
    /// Payload list, whatever its field name.
    pub items: Vec<Value>,
    /// Per-hub publish counter, absent on control frames.
    pub sequence_id: Option<u64>,
    /// Server timestamp (RFC 3339).
    pub ts: Option<String>,
}

/// Frame as it appears on the wire, before the discriminator is resolved.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default, rename = "type")]
    type_tag: Option<String>,
    #[serde(default, rename = "kind")]
    kind_tag: Option<String>,
    #[serde(default, rename = "events", alias = "transactions", alias = "thoughts")]
    items: Vec<Value>,
    #[serde(default)]
    sequence_id: Option<u64>,
    #[serde(default)]
    ts: Option<String>,
}

impl TryFrom<RawEnvelope> for WireEnvelope {
    type Error = String;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let kind = raw
            .type_tag
            .or(raw.kind_tag)
            .ok_or_else(|| "frame has neither `type` nor `kind`".to_string())?;
        Ok(Self {
            kind,
            items: raw.items,
            sequence_id: raw.sequence_id,
            ts: raw.ts,
        })
    }
}

impl WireEnvelope {
    /// Parses one text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The known event kind of this frame, if it is one.
    pub fn event_kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.kind)
    }
}

/// # Client Intent
///
/// Optional client -> server messages. The hub does not filter per subscriber;
/// a `subscribe` intent is accepted and logged only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientIntent {
    /// Declares interest in some kinds (informational).
    Subscribe {
        #[serde(default)]
        kinds: Vec<EventKind>,
    },
    /// Application-level heartbeat.
    Ping,
}
