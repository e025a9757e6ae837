//! Resolve command line selections into an [`Operation`]

use core::time::Duration;

use crate::commands::types::{Mode, Operation, Protocol, UsageError};
use crate::config::protocol::{BROADCAST_ID, DEFAULT_TTL};
use crate::config::timing::BROADCAST_INTERVAL_S;

/// Raw selection as given on the command line
#[derive(Debug, Clone, Default)]
pub struct Request<'a> {
    pub protocol: &'a str,
    pub mode: &'a str,
    pub message: Option<&'a str>,
    /// Broadcast interval in seconds
    pub interval: Option<u64>,
    /// Flood-mesh destination, `*` when absent
    pub destination: Option<&'a str>,
    /// Flood-mesh hop budget
    pub ttl: Option<u8>,
}

impl<'a> Request<'a> {
    pub fn new(protocol: &'a str, mode: &'a str) -> Self {
        Self {
            protocol,
            mode,
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: &'a str) -> Self {
        self.message = Some(message);
        self
    }

    /// Look the selection up in the operation table
    pub fn resolve(&self) -> Result<Operation, UsageError> {
        let protocol: Protocol = self.protocol.parse()?;
        let mode: Mode = self.mode.parse()?;

        let operation = match (protocol, mode) {
            (Protocol::PlainLink, Mode::Receive) => Operation::PlainReceive,
            (Protocol::PlainLink, Mode::ReceiveListen) => Operation::PlainReceiveListen,
            (Protocol::PlainLink, Mode::ReceiveContinuous) => Operation::PlainReceiveContinuous,
            (Protocol::PlainLink, Mode::TransmitMessage) => Operation::PlainTransmitMessage {
                message: self.require_message(mode)?,
            },
            (Protocol::PlainLink, Mode::TransmitBroadcast) => Operation::PlainTransmitBroadcast {
                message: self.require_message(mode)?,
                interval: Duration::from_secs(self.interval.unwrap_or(BROADCAST_INTERVAL_S)),
            },
            (Protocol::FloodMesh, Mode::TransmitMessage) => Operation::MeshTransmitMessage {
                payload: self.require_message(mode)?,
                destination: self.destination.unwrap_or(BROADCAST_ID).to_owned(),
                ttl: self.ttl.unwrap_or(DEFAULT_TTL),
            },
            (Protocol::FloodMesh, Mode::ReceiveContinuous) => Operation::MeshReceiveContinuous,
            (protocol, mode) => return Err(UsageError::Unsupported { protocol, mode }),
        };

        Ok(operation)
    }

    fn require_message(&self, mode: Mode) -> Result<String, UsageError> {
        self.message
            .map(str::to_owned)
            .ok_or(UsageError::MissingMessage(mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_receive_modes() {
        assert_eq!(Request::new("plain-link", "receive").resolve().unwrap(), Operation::PlainReceive);
        assert_eq!(
            Request::new("lora", "receive_listen").resolve().unwrap(),
            Operation::PlainReceiveListen
        );
        assert_eq!(
            Request::new("lora", "receive_continuous").resolve().unwrap(),
            Operation::PlainReceiveContinuous
        );
    }

    #[test]
    fn test_broadcast_default_interval() {
        let op = Request::new("plain-link", "transmit-broadcast")
            .with_message("ping")
            .resolve()
            .unwrap();
        assert_eq!(
            op,
            Operation::PlainTransmitBroadcast {
                message: "ping".into(),
                interval: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn test_broadcast_interval_override() {
        let request = Request {
            interval: Some(2),
            ..Request::new("lora", "transmit_broadcast").with_message("ping")
        };
        assert!(matches!(
            request.resolve().unwrap(),
            Operation::PlainTransmitBroadcast { interval, .. } if interval == Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_mesh_transmit_defaults() {
        let op = Request::new("flood-mesh", "transmit-message")
            .with_message("hi")
            .resolve()
            .unwrap();
        assert_eq!(
            op,
            Operation::MeshTransmitMessage {
                payload: "hi".into(),
                destination: "*".into(),
                ttl: 10,
            }
        );
    }

    #[test]
    fn test_mesh_transmit_addressed() {
        let request = Request {
            destination: Some("node7"),
            ttl: Some(3),
            ..Request::new("meshtastic", "transmit_message").with_message("hi")
        };
        assert_eq!(
            request.resolve().unwrap(),
            Operation::MeshTransmitMessage {
                payload: "hi".into(),
                destination: "node7".into(),
                ttl: 3,
            }
        );
    }

    #[test]
    fn test_unsupported_combination() {
        assert_eq!(
            Request::new("flood-mesh", "receive").resolve(),
            Err(UsageError::Unsupported {
                protocol: Protocol::FloodMesh,
                mode: Mode::Receive,
            })
        );
        assert!(Request::new("flood-mesh", "transmit-broadcast")
            .with_message("x")
            .resolve()
            .is_err());
    }

    #[test]
    fn test_transmit_needs_message() {
        assert_eq!(
            Request::new("plain-link", "transmit-message").resolve(),
            Err(UsageError::MissingMessage(Mode::TransmitMessage))
        );
    }

    #[test]
    fn test_unknown_selectors() {
        assert!(matches!(
            Request::new("zigbee", "receive").resolve(),
            Err(UsageError::UnknownProtocol(_))
        ));
        assert!(matches!(
            Request::new("lora", "scan").resolve(),
            Err(UsageError::UnknownMode(_))
        ));
    }
}
