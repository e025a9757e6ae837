pub mod handler;

pub use handler::{DispatchError, Dispatcher, Event, PlainReception, RunOptions};
