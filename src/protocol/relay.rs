//! Flood relay decision
//!
//! Envelopes addressed to this node or to every node are delivered and go
//! no further. Anything else is forwarded with one hop less until its ttl
//! runs out. No duplicate suppression is done, so overlapping relays can
//! repeat an envelope.

use crate::config::protocol::BROADCAST_ID;
use crate::protocol::envelope::Envelope;

/// What to do with a received envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Hand the payload to the local user
    Deliver(String),
    /// Re-transmit this envelope (ttl already decremented)
    Forward(Envelope),
    Drop,
}

/// Decide the fate of an envelope received at `local_id`
pub fn on_receive(envelope: &Envelope, local_id: &str) -> Action {
    if envelope.destination == local_id || envelope.destination == BROADCAST_ID {
        return Action::Deliver(envelope.payload.clone());
    }
    if envelope.ttl == 0 {
        return Action::Drop;
    }
    Action::Forward(Envelope {
        ttl: envelope.ttl - 1,
        ..envelope.clone()
    })
}
