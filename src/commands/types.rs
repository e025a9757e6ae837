//! Operation table
//!
//! Every runnable operation is one variant of [`Operation`], keyed by a
//! [`Protocol`] and a [`Mode`]:
//!
//! | protocol     | modes                                              |
//! |--------------|----------------------------------------------------|
//! | `plain-link` | every mode                                         |
//! | `flood-mesh` | `transmit-message`, `receive-continuous`           |

use core::fmt;
use core::str::FromStr;
use core::time::Duration;

/// Link protocol selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Raw message + NUL (+ counter) frames
    PlainLink,
    /// JSON envelopes with flood relaying
    FloodMesh,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Protocol::PlainLink => "plain-link",
            Protocol::FloodMesh => "flood-mesh",
        }
    }
}

impl FromStr for Protocol {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain-link" | "lora" => Ok(Protocol::PlainLink),
            "flood-mesh" | "meshtastic" => Ok(Protocol::FloodMesh),
            other => Err(UsageError::UnknownProtocol(other.to_owned())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operating mode selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Single-shot receive, re-armed after every packet
    Receive,
    /// Duty-cycled receive
    ReceiveListen,
    ReceiveContinuous,
    /// Send one message
    TransmitMessage,
    /// Send a message with a counter at a fixed interval
    TransmitBroadcast,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Receive => "receive",
            Mode::ReceiveListen => "receive-listen",
            Mode::ReceiveContinuous => "receive-continuous",
            Mode::TransmitMessage => "transmit-message",
            Mode::TransmitBroadcast => "transmit-broadcast",
        }
    }
}

impl FromStr for Mode {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('_', "-").as_str() {
            "receive" => Ok(Mode::Receive),
            "receive-listen" => Ok(Mode::ReceiveListen),
            "receive-continuous" => Ok(Mode::ReceiveContinuous),
            "transmit-message" => Ok(Mode::TransmitMessage),
            "transmit-broadcast" => Ok(Mode::TransmitBroadcast),
            _ => Err(UsageError::UnknownMode(s.to_owned())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated operation with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    PlainReceive,
    PlainReceiveListen,
    PlainReceiveContinuous,
    PlainTransmitMessage {
        message: String,
    },
    PlainTransmitBroadcast {
        message: String,
        interval: Duration,
    },
    MeshTransmitMessage {
        payload: String,
        destination: String,
        ttl: u8,
    },
    MeshReceiveContinuous,
}

impl Operation {
    pub fn protocol(&self) -> Protocol {
        match self {
            Operation::PlainReceive
            | Operation::PlainReceiveListen
            | Operation::PlainReceiveContinuous
            | Operation::PlainTransmitMessage { .. }
            | Operation::PlainTransmitBroadcast { .. } => Protocol::PlainLink,
            Operation::MeshTransmitMessage { .. } | Operation::MeshReceiveContinuous => Protocol::FloodMesh,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Operation::PlainReceive => Mode::Receive,
            Operation::PlainReceiveListen => Mode::ReceiveListen,
            Operation::PlainReceiveContinuous | Operation::MeshReceiveContinuous => Mode::ReceiveContinuous,
            Operation::PlainTransmitMessage { .. } | Operation::MeshTransmitMessage { .. } => {
                Mode::TransmitMessage
            }
            Operation::PlainTransmitBroadcast { .. } => Mode::TransmitBroadcast,
        }
    }

    /// Receive operations drain stale bytes before their loop starts
    pub fn is_receiver(&self) -> bool {
        matches!(
            self.mode(),
            Mode::Receive | Mode::ReceiveListen | Mode::ReceiveContinuous
        )
    }
}

/// Invalid command line selection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("unknown protocol '{0}' (expected plain-link or flood-mesh)")]
    UnknownProtocol(String),
    #[error("unknown mode '{0}'")]
    UnknownMode(String),
    #[error("{protocol} does not support {mode}")]
    Unsupported { protocol: Protocol, mode: Mode },
    #[error("{0} needs a message (-t)")]
    MissingMessage(Mode),
}
