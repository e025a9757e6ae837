//! LoRa radio trait for abstraction and testability
//!
//! This trait defines the packet-level interface of the radio,
//! allowing the SX126x driver to be swapped with a mock for testing.

use core::time::Duration;

use crate::config::{lora_defaults, protocol::MAX_LORA_PAYLOAD, tcxo};

/// Errors that can occur during LoRa operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LoraError {
    /// Busy line or completion flag did not clear within the deadline
    #[error("timed out waiting for the radio")]
    Timeout,
    /// Read attempted with no received bytes left
    #[error("no received bytes available")]
    Underrun,
    /// Packet engine used before every configuration step was applied
    #[error("radio configuration incomplete")]
    ConfigurationIncomplete,
    /// Radio used before `begin()`
    #[error("radio not initialised")]
    NotInitialised,
    /// Radio did not report standby after reset
    #[error("radio not detected")]
    NotDetected,
    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Outgoing payload larger than the configured maximum
    #[error("payload exceeds the configured maximum length")]
    PayloadTooLong,
    /// Transmission ended with nothing written
    #[error("payload is empty")]
    EmptyPayload,
    /// Payload write or TX wait without an open transmission
    #[error("no transmission in progress")]
    NotTransmitting,
    /// Chip raised its TX timeout flag
    #[error("transmission failed")]
    TransmitFailed,
    /// SPI communication error
    #[error("SPI transfer failed")]
    SpiError,
    /// Control line error
    #[error("GPIO access failed")]
    GpioError,
}

/// LoRa header mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    /// Length, coding rate and CRC flag carried in the header
    Explicit,
    /// Fixed length, no header
    Implicit,
}

/// Receiver gain setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxGain {
    PowerSaving,
    Boosted,
}

/// Chip variant selecting the supported TX power range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerProfile {
    Sx1261,
    Sx1262,
    Sx1268,
}

impl PowerProfile {
    /// Supported output power range in dBm
    pub fn power_range(self) -> (i8, i8) {
        match self {
            PowerProfile::Sx1261 => (-17, 15),
            PowerProfile::Sx1262 | PowerProfile::Sx1268 => (-9, 22),
        }
    }
}

/// External TCXO driven from DIO3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcxoConfig {
    /// SetDIO3AsTcxoCtrl voltage code (0x00 = 1.6V .. 0x07 = 3.3V)
    pub voltage_code: u8,
    /// Time the chip waits for the TCXO to settle
    pub startup_delay: Duration,
}

/// Radio configuration record
///
/// Applied as a whole by [`Sx126x::configure`](crate::lora::Sx126x::configure)
/// or field by field through the individual setters.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraConfig {
    /// Centre frequency in Hz
    pub frequency_hz: u32,
    /// Spreading factor (5-12)
    pub spreading_factor: u8,
    /// Bandwidth in Hz (7800, 10400, 15600, 20800, 31250, 41700, 62500, 125000, 250000, 500000)
    pub bandwidth_hz: u32,
    /// Coding rate denominator (5-8 for 4/5 to 4/8)
    pub coding_rate: u8,
    /// Transmit power in dBm
    pub tx_power_dbm: i8,
    /// Chip variant for power clipping
    pub power_profile: PowerProfile,
    pub rx_gain: RxGain,
    pub sync_word: u16,
    pub header_mode: HeaderMode,
    /// Preamble length in symbols
    pub preamble_length: u16,
    /// Maximum payload length in bytes
    pub max_payload: u8,
    pub crc_enabled: bool,
    /// `None` when the board runs from a crystal
    pub tcxo: Option<TcxoConfig>,
    /// Let DIO2 drive the RF switch
    pub dio2_rf_switch: bool,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            frequency_hz: lora_defaults::FREQUENCY_HZ,
            spreading_factor: lora_defaults::SPREADING_FACTOR,
            bandwidth_hz: lora_defaults::BANDWIDTH_HZ,
            coding_rate: lora_defaults::CODING_RATE,
            tx_power_dbm: lora_defaults::TX_POWER_DBM,
            power_profile: PowerProfile::Sx1262,
            rx_gain: RxGain::PowerSaving,
            sync_word: lora_defaults::SYNC_WORD,
            header_mode: HeaderMode::Explicit,
            preamble_length: lora_defaults::PREAMBLE_LENGTH,
            max_payload: lora_defaults::PAYLOAD_LENGTH,
            crc_enabled: lora_defaults::CRC_ENABLED,
            tcxo: Some(TcxoConfig {
                voltage_code: tcxo::VOLTAGE_CODE,
                startup_delay: Duration::from_millis(tcxo::STARTUP_DELAY_MS),
            }),
            dio2_rf_switch: lora_defaults::DIO2_RF_SWITCH,
        }
    }
}

/// Receive request variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxMode {
    /// Receive one packet, then return to standby
    SingleShot,
    /// Stay in receive mode until told otherwise
    Continuous,
}

/// Outcome flags of the last completed reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    Ok,
    CrcError,
    HeaderError,
}

/// Operating state of the transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// Constructed, `begin()` not yet run
    Idle,
    Standby,
    /// Initialised, configuration steps still outstanding
    Configuring,
    Transmitting,
    Receiving,
    ReceivingContinuous,
    ReceivingListen,
    /// The last operation timed out
    Fault,
}

/// Received packet quality
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalMetrics {
    /// Packet RSSI in dBm
    pub rssi_dbm: f32,
    /// Packet SNR in dB
    pub snr_db: f32,
    /// LoRa signal RSSI after despreading in dBm
    pub signal_rssi_dbm: f32,
}

/// Completed transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxReport {
    /// Bytes sent
    pub bytes: usize,
    /// Time from TX trigger to TX done
    pub elapsed: Duration,
}

impl TxReport {
    /// Transmit time in milliseconds
    pub fn transmit_time_ms(&self) -> f32 {
        self.elapsed.as_secs_f32() * 1000.0
    }

    /// Achieved data rate in bytes per second
    ///
    /// Zero when no time was measured.
    pub fn data_rate(&self) -> f32 {
        let secs = self.elapsed.as_secs_f32();
        if secs > 0.0 {
            self.bytes as f32 / secs
        } else {
            0.0
        }
    }
}

/// Abstract LoRa radio interface for testability
///
/// This trait allows the dispatcher to work with either the real SX126x
/// driver or a mock implementation for testing. It mirrors the packet
/// engine: buffered transmission, receive requests, byte read-out and
/// status decoding.
pub trait LoraRadio {
    /// Open a transmission and clear the outgoing buffer
    fn begin_transmission(&mut self) -> Result<(), LoraError>;

    /// Append bytes to the outgoing buffer
    fn write(&mut self, data: &[u8]) -> Result<(), LoraError>;

    /// Hand the buffer to the chip and start transmitting
    fn end_transmission(&mut self) -> Result<(), LoraError>;

    /// Block until the chip reports TX done
    fn wait_for_transmission_done(&mut self, timeout: Duration) -> Result<TxReport, LoraError>;

    /// Start receiving
    fn request_reception(&mut self, mode: RxMode) -> Result<(), LoraError>;

    /// Start a duty-cycled receive (windows in milliseconds)
    fn listen(&mut self, rx_window_ms: u32, sleep_window_ms: u32) -> Result<(), LoraError>;

    /// Block until the armed reception completes or `timeout` passes
    ///
    /// Returns `true` when a payload arrived.
    fn wait_for_reception(&mut self, timeout: Duration) -> Result<bool, LoraError>;

    /// Unread bytes of the last completed reception
    fn available(&mut self) -> Result<usize, LoraError>;

    /// Consume one received byte
    fn read(&mut self) -> Result<u8, LoraError>;

    /// Decode the status of the last operation
    fn status(&mut self) -> Result<RxStatus, LoraError>;

    /// RSSI and SNR of the last received packet
    fn signal_metrics(&mut self) -> Result<SignalMetrics, LoraError>;

    /// Set the radio to standby mode
    fn standby(&mut self) -> Result<(), LoraError>;

    /// Send `data` as one packet and wait for it to leave
    fn transmit(&mut self, data: &[u8], timeout: Duration) -> Result<TxReport, LoraError> {
        if data.len() > MAX_LORA_PAYLOAD {
            return Err(LoraError::PayloadTooLong);
        }
        self.begin_transmission()?;
        self.write(data)?;
        self.end_transmission()?;
        self.wait_for_transmission_done(timeout)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_rate() {
        let report = TxReport {
            bytes: 6,
            elapsed: Duration::from_millis(250),
        };
        assert!((report.data_rate() - 24.0).abs() < 0.01);
        assert!((report.transmit_time_ms() - 250.0).abs() < 0.01);
    }

    #[test]
    fn test_data_rate_without_elapsed_time() {
        let report = TxReport {
            bytes: 6,
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.data_rate(), 0.0);
    }

    #[test]
    fn test_default_config() {
        let config = LoraConfig::default();
        assert_eq!(config.frequency_hz, 921_625_000);
        assert_eq!(config.spreading_factor, 11);
        assert_eq!(config.bandwidth_hz, 250_000);
        assert_eq!(config.coding_rate, 5);
        assert_eq!(config.sync_word, 0x3444);
        assert_eq!(config.max_payload, 255);
        assert!(config.tcxo.is_some());
    }

    #[test]
    fn test_power_range() {
        assert_eq!(PowerProfile::Sx1261.power_range(), (-17, 15));
        assert_eq!(PowerProfile::Sx1262.power_range(), (-9, 22));
    }
}
