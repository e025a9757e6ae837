pub mod parser;
pub mod types;

pub use parser::Request;
pub use types::{Mode, Operation, Protocol, UsageError};
