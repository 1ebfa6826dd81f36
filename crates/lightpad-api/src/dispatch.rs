// Command dispatch
//
// Validates a `Command`, renders it as a JSON request body and performs
// one request/reply exchange over a `CommandChannel`. Validation always
// runs before the channel is touched.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::codec::{Frame, FrameKind};
use crate::connection::Connection;
use crate::error::CommandError;

// ── Command types ────────────────────────────────────────────────────

/// Manual glow-ring override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceGlow {
    pub intensity: i32,
    /// Milliseconds the override lasts.
    pub timeout: i32,
    pub red: i32,
    pub green: i32,
    pub blue: i32,
    pub white: i32,
}

impl ForceGlow {
    fn validate(&self) -> Result<(), CommandError> {
        for (field, value) in [
            ("intensity", self.intensity),
            ("red", self.red),
            ("green", self.green),
            ("blue", self.blue),
            ("white", self.white),
        ] {
            check_byte(field, value)?;
        }
        if self.timeout < 0 {
            return Err(CommandError::invalid(
                "timeout",
                format!("{} must not be negative", self.timeout),
            ));
        }
        Ok(())
    }
}

/// Imperative requests a Lightpad understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Dim the logical load to `level` (0 = off, 255 = full).
    SetLevel { level: i32 },
    /// Replace settings of the pad itself (glow colour, sensitivity, ...).
    SetLightpadConfig { config: Value },
    /// Replace settings of the logical load.
    SetLoadConfig { config: Value },
    SetGlow(ForceGlow),
    GetLoadMetrics,
}

impl Command {
    /// Operation name sent in the `op` field.
    pub fn op(&self) -> &'static str {
        match self {
            Self::SetLevel { .. } => "setLogicalLoadLevel",
            Self::SetLightpadConfig { .. } => "setLightpadConfig",
            Self::SetLoadConfig { .. } => "setLogicalLoadConfig",
            Self::SetGlow(_) => "setLogicalLoadGlow",
            Self::GetLoadMetrics => "getLogicalLoadMetrics",
        }
    }

    /// Reject arguments the device would misinterpret.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            Self::SetLevel { level } => check_byte("level", *level),
            Self::SetLightpadConfig { config } | Self::SetLoadConfig { config } => {
                if config.is_object() {
                    Ok(())
                } else {
                    Err(CommandError::invalid("config", "must be a JSON object"))
                }
            }
            Self::SetGlow(glow) => glow.validate(),
            Self::GetLoadMetrics => Ok(()),
        }
    }

    /// Request body addressed to logical load `llid`.
    pub fn body(&self, llid: &str) -> Value {
        let mut body = Map::new();
        body.insert("op".into(), Value::from(self.op()));
        body.insert("llid".into(), Value::from(llid));
        match self {
            Self::SetLevel { level } => {
                body.insert("level".into(), Value::from(*level));
            }
            Self::SetLightpadConfig { config } | Self::SetLoadConfig { config } => {
                body.insert("config".into(), config.clone());
            }
            Self::SetGlow(glow) => {
                body.insert("glow".into(), json!(glow));
            }
            Self::GetLoadMetrics => {}
        }
        Value::Object(body)
    }
}

fn check_byte(field: &'static str, value: i32) -> Result<(), CommandError> {
    if (0..=255).contains(&value) {
        Ok(())
    } else {
        Err(CommandError::invalid(
            field,
            format!("{value} is outside 0..=255"),
        ))
    }
}

// ── Replies ──────────────────────────────────────────────────────────

/// Parsed reply frame: `{"status": 200, "message": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandReply {
    pub status: u16,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl CommandReply {
    pub fn parse(frame: &Frame) -> Result<Self, CommandError> {
        serde_json::from_slice(&frame.body).map_err(|e| CommandError::Deserialization {
            message: e.to_string(),
            body: frame.body_text().into_owned(),
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize `data` into a typed payload.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        T::deserialize(&self.data).map_err(|e| CommandError::Deserialization {
            message: e.to_string(),
            body: self.data.to_string(),
        })
    }

    fn into_result(self) -> Result<Self, CommandError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CommandError::Rejected {
                status: self.status,
                message: self.message.unwrap_or_default(),
            })
        }
    }
}

/// Power and level snapshot of a logical load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadMetrics {
    pub llid: String,
    pub level: u8,
    /// Watts.
    pub power: i64,
    #[serde(default)]
    pub lightpad_metrics: Vec<PadMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadMetrics {
    pub lpid: String,
    pub level: u8,
    pub power: i64,
}

// ── Channel seam ─────────────────────────────────────────────────────

/// One request/reply exchange with a device.
///
/// Implemented by [`Connection`]; tests implement it to observe whether
/// any I/O was attempted.
pub trait CommandChannel: Send + Sync {
    /// Logical load id requests are addressed to.
    fn load_id(&self) -> &str;

    fn request(
        &self,
        body: Value,
    ) -> impl Future<Output = Result<CommandReply, CommandError>> + Send;
}

impl CommandChannel for Connection {
    fn load_id(&self) -> &str {
        &self.endpoint().id
    }

    async fn request(&self, body: Value) -> Result<CommandReply, CommandError> {
        let frame = self
            .round_trip(FrameKind::Command, &body, self.command_timeout())
            .await?;
        let reply = CommandReply::parse(&frame)?;
        if reply.status == 401 {
            self.session().expire();
            self.close();
        }
        reply.into_result()
    }
}

/// Validate `command` and run it on `channel`.
pub async fn send<C>(channel: &C, command: &Command) -> Result<CommandReply, CommandError>
where
    C: CommandChannel + ?Sized,
{
    command.validate()?;
    debug!(op = command.op(), llid = channel.load_id(), "sending command");
    channel.request(command.body(channel.load_id())).await
}

/// Fetch and decode the load's power/level snapshot.
pub async fn load_metrics<C>(channel: &C) -> Result<LoadMetrics, CommandError>
where
    C: CommandChannel + ?Sized,
{
    send(channel, &Command::GetLoadMetrics).await?.data_as()
}
