//! Hardware configuration constants for a Linux host with an SX126x HAT

/// SPI bus for the LoRa module
pub mod spi {
    /// spidev node (bus 1, chip select 0)
    pub const DEVICE: &str = "/dev/spidev1.0";
    pub const SPEED_HZ: u32 = 8_000_000;
}

/// LoRa control lines
pub mod lora_pins {
    pub const GPIO_CHIP: &str = "/dev/gpiochip0";
    pub const NRST: u32 = 14;
    pub const BUSY: u32 = 15;
}

/// TCXO configuration
pub mod tcxo {
    /// TCXO voltage code for SetDIO3AsTcxoCtrl
    /// 0x02 = 1.8V
    pub const VOLTAGE_CODE: u8 = 0x02;

    /// TCXO startup delay in milliseconds
    pub const STARTUP_DELAY_MS: u64 = 10;
}

/// Default LoRa configuration
pub mod lora_defaults {
    /// AS923 band frequency
    pub const FREQUENCY_HZ: u32 = 921_625_000;
    pub const SPREADING_FACTOR: u8 = 11;
    pub const BANDWIDTH_HZ: u32 = 250_000;
    /// Coding rate 4/5
    pub const CODING_RATE: u8 = 5;
    pub const TX_POWER_DBM: i8 = 22;
    pub const PREAMBLE_LENGTH: u16 = 12;
    pub const PAYLOAD_LENGTH: u8 = 255;
    pub const CRC_ENABLED: bool = true;
    pub const SYNC_WORD: u16 = 0x3444;
    /// DIO2 drives the antenna switch on most SX1262 HATs
    pub const DIO2_RF_SWITCH: bool = true;
}

/// Command and polling timing
pub mod timing {
    /// Interval between busy line samples
    pub const BUSY_POLL_INTERVAL_US: u32 = 1_000;

    /// Deadline for the busy line to clear around a command
    pub const BUSY_TIMEOUT_MS: u64 = 2_000;

    /// Interval between IRQ register polls while waiting on TX/RX
    pub const IRQ_POLL_INTERVAL_MS: u32 = 1;

    /// Reset pulse width and settle time
    pub const RESET_PULSE_MS: u32 = 100;

    /// Deadline for a transmission to report TX done
    pub const TX_DONE_TIMEOUT_MS: u64 = 10_000;

    /// Host-side bound on a single-shot receive window
    pub const RX_WAIT_TIMEOUT_MS: u64 = 10_000;

    /// Duty-cycled listen windows
    pub const LISTEN_RX_WINDOW_MS: u32 = 10;
    pub const LISTEN_SLEEP_WINDOW_MS: u32 = 10;

    /// Time spent draining stale bytes before a receive loop starts
    pub const RX_FLUSH_MS: u64 = 500;

    /// Pause between flush polls and continuous-mode polls
    pub const RX_IDLE_POLL_MS: u64 = 10;

    /// Default interval between broadcast transmissions
    pub const BROADCAST_INTERVAL_S: u64 = 5;
}

/// Protocol constants
pub mod protocol {
    /// Maximum payload size for LoRa
    pub const MAX_LORA_PAYLOAD: usize = 255;

    /// Plain-link message terminator
    pub const MESSAGE_TERMINATOR: u8 = 0x00;

    /// Node id used by the flood relay when none is given
    pub const NODE_ID: &str = "paragonnov";

    /// Destination id addressing every node
    pub const BROADCAST_ID: &str = "*";

    /// Hop budget for newly originated envelopes
    pub const DEFAULT_TTL: u8 = 10;
}
