pub mod envelope;
pub mod framing;
pub mod relay;

pub use envelope::{build_envelope, parse, serialize, Envelope, EnvelopeError};
pub use framing::PlainFrame;
pub use relay::{on_receive, Action};
