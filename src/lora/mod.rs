pub mod command;
pub mod driver;
pub mod setup;
pub mod traits;

#[cfg(test)]
pub mod sim;

pub use command::{CommandChannel, ControlPins};
pub use driver::Sx126x;
pub use traits::{
    HeaderMode, LoraConfig, LoraError, LoraRadio, PowerProfile, RadioState, RxGain, RxMode,
    RxStatus, SignalMetrics, TcxoConfig, TxReport,
};
