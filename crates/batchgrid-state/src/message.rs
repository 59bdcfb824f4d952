//! Typed message envelope carried over the port.
//!
//! Messages travel as UTF-8 strings and are decoded exactly once, at the
//! port boundary:
//!
//! | Message     | Wire form                                   |
//! |-------------|---------------------------------------------|
//! | `Init`      | `init:<target>`                             |
//! | `Recompute` | `recompute:<target>`                        |
//! | `Running`   | `running:<target>;<stage>`                  |
//! | `JobReport` | JSON object (see [`StageReport`])           |

use serde::{Deserialize, Serialize};

use batch_core::{Millis, StageKind, TargetId};

use crate::error::MessageError;

/// Completion report posted by a worker after its stage finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    #[serde(rename = "server")]
    pub target: TargetId,
    #[serde(rename = "action")]
    pub stage: StageKind,
    pub threads: u32,
    pub delay: Millis,
    pub expected_amount: f64,
    pub amount: f64,
    pub expected_duration: Millis,
    pub duration: Millis,
}

/// A decoded port message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// First observation of a target; create its record.
    Init { target: TargetId },
    /// Discard in-flight bookkeeping and re-measure the target.
    Recompute { target: TargetId },
    /// A stage job was launched against the target.
    Running { target: TargetId, stage: StageKind },
    /// A stage job finished.
    JobReport(StageReport),
}

impl Message {
    pub fn target(&self) -> &str {
        match self {
            Message::Init { target }
            | Message::Recompute { target }
            | Message::Running { target, .. } => target,
            Message::JobReport(report) => &report.target,
        }
    }

    /// Encode into the wire form.
    pub fn encode(&self) -> String {
        match self {
            Message::Init { target } => format!("init:{target}"),
            Message::Recompute { target } => format!("recompute:{target}"),
            Message::Running { target, stage } => format!("running:{target};{stage}"),
            // A plain struct of strings and numbers always serializes.
            Message::JobReport(report) => serde_json::to_string(report).unwrap_or_default(),
        }
    }

    /// Decode a wire string.
    pub fn decode(raw: &str) -> Result<Self, MessageError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MessageError::Empty);
        }

        if raw.starts_with('{') {
            let report: StageReport = serde_json::from_str(raw)
                .map_err(|e| MessageError::InvalidReport(e.to_string()))?;
            if report.target.is_empty() {
                return Err(MessageError::MissingTarget(raw.to_string()));
            }
            return Ok(Message::JobReport(report));
        }

        let (kind, rest) = raw
            .split_once(':')
            .ok_or_else(|| MessageError::UnknownShape(raw.to_string()))?;

        let message = match kind {
            "init" => Message::Init {
                target: rest.to_string(),
            },
            "recompute" => Message::Recompute {
                target: rest.to_string(),
            },
            "running" => {
                // The stage is always the last field; target names may hold ';'.
                let (target, stage) = rest
                    .rsplit_once(';')
                    .ok_or_else(|| MessageError::InvalidStage(raw.to_string()))?;
                let stage = stage
                    .parse::<StageKind>()
                    .map_err(|_| MessageError::InvalidStage(stage.to_string()))?;
                Message::Running {
                    target: target.to_string(),
                    stage,
                }
            }
            _ => return Err(MessageError::UnknownShape(raw.to_string())),
        };

        if message.target().is_empty() {
            return Err(MessageError::MissingTarget(raw.to_string()));
        }
        Ok(message)
    }
}
