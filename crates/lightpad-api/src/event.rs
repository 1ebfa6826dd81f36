//! Typed Lightpad push events.
//!
//! Event bodies are JSON objects tagged by `type`. Three tags are
//! understood; everything else, and any payload that does not fit the
//! shape its tag promises, becomes [`LightpadEvent::Unknown`] carrying
//! the raw text. Classification never fails, so one odd message can't
//! end a subscription.

use serde::{Deserialize, Serialize};

/// A decoded push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LightpadEvent {
    /// The dimmer moved to `level` (0 = off, 255 = full).
    DimmerChange { level: u8 },
    /// Instantaneous load power draw.
    Power { watts: i64 },
    /// Motion sensor reading.
    PirSignal { signal: i64 },
    /// Anything not recognised above, verbatim.
    Unknown { raw_message: String },
}

impl LightpadEvent {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DimmerChange { .. } => "dimmerchange",
            Self::Power { .. } => "power",
            Self::PirSignal { .. } => "pirSignal",
            Self::Unknown { .. } => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

/// Wire shapes of the recognised tags. Extra fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "dimmerchange")]
    DimmerChange { level: u8 },
    #[serde(rename = "power")]
    Power { watts: i64 },
    #[serde(rename = "pirSignal", alias = "pirsignal")]
    PirSignal { signal: i64 },
}

impl From<WireEvent> for LightpadEvent {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::DimmerChange { level } => Self::DimmerChange { level },
            WireEvent::Power { watts } => Self::Power { watts },
            WireEvent::PirSignal { signal } => Self::PirSignal { signal },
        }
    }
}

/// Classify one event body.
pub fn classify(raw: &str) -> LightpadEvent {
    match serde_json::from_str::<WireEvent>(raw) {
        Ok(wire) => wire.into(),
        Err(e) => {
            tracing::debug!(error = %e, "passing through unrecognised event");
            LightpadEvent::Unknown {
                raw_message: raw.to_owned(),
            }
        }
    }
}
