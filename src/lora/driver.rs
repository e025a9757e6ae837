//! SX126x LoRa driver
//!
//! `Sx126x` is the radio session: it owns the command channel, the applied
//! configuration and the transceiver state machine, and implements the
//! blocking packet engine behind the [`LoraRadio`] trait.

use core::time::Duration;
use std::time::Instant;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use heapless::Vec;

use crate::config::{protocol::MAX_LORA_PAYLOAD, timing};
use crate::lora::command::{opcode, CommandChannel, ControlPins, Deadline, MAX_TRANSFER};
use crate::lora::setup::{pa_config_params, packet_params, register};
use crate::lora::traits::{
    LoraConfig, LoraError, LoraRadio, PowerProfile, RadioState, RxMode, RxStatus, SignalMetrics, TxReport,
};

/// Standby modes
mod standby {
    pub const STDBY_RC: u8 = 0x00;
}

/// Packet types
mod packet_type {
    pub const LORA: u8 = 0x01;
}

/// IRQ masks
mod irq {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const HEADER_ERR: u16 = 0x0020;
    pub const CRC_ERR: u16 = 0x0040;
    pub const TIMEOUT: u16 = 0x0200;
    pub const ALL: u16 = 0xFFFF;

    pub const TX: u16 = TX_DONE | TIMEOUT;
    pub const RX: u16 = RX_DONE | TIMEOUT | HEADER_ERR | CRC_ERR;
}

/// SetTx / SetRx timeout parameters
mod rx_timeout {
    /// Single reception, back to standby once a packet arrives
    pub const SINGLE: [u8; 3] = [0x00, 0x00, 0x00];
    /// Stay in receive mode
    pub const CONTINUOUS: [u8; 3] = [0xFF, 0xFF, 0xFF];
}

const TX_SINGLE: [u8; 3] = [0x00, 0x00, 0x00];

/// Over-current limit written during `begin()`
const OCP_LIMIT_MA: u16 = 140;

/// Receive window currently armed on the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxWindow {
    SingleShot,
    Continuous,
    Listen,
}

/// Encode a duty-cycle window in ms as 24-bit 15.625 us steps
pub fn listen_period(ms: u32) -> [u8; 3] {
    let steps = (u64::from(ms) << 6).min(0x00FF_FFFF) as u32;
    let [_, hi, mid, lo] = steps.to_be_bytes();
    [hi, mid, lo]
}

/// Decode the GetPacketStatus bytes
pub fn decode_packet_status(bytes: [u8; 3]) -> SignalMetrics {
    SignalMetrics {
        rssi_dbm: -f32::from(bytes[0]) / 2.0,
        snr_db: f32::from(bytes[1] as i8) / 4.0,
        signal_rssi_dbm: -f32::from(bytes[2]) / 2.0,
    }
}

fn irq_poll_interval() -> Duration {
    Duration::from_millis(u64::from(timing::IRQ_POLL_INTERVAL_MS))
}

/// SX126x LoRa session
///
/// Uses dependency injection for the SPI device, control lines and delay.
/// Initialise with [`begin`](Self::begin), apply a configuration with
/// [`configure`](Self::configure), then drive it through [`LoraRadio`].
pub struct Sx126x<Spi, Nrst, Busy, Delay> {
    channel: CommandChannel<Spi, Nrst, Busy, Delay>,
    pub(crate) config: LoraConfig,
    pub(crate) applied: u8,
    pub(crate) state: RadioState,
    pa_profile: PowerProfile,
    dio2_rf_switch: bool,
    tx_buffer: Vec<u8, MAX_LORA_PAYLOAD>,
    tx_open: bool,
    tx_started: Option<Instant>,
    tx_len: usize,
    rx_frame: Vec<u8, MAX_TRANSFER>,
    rx_cursor: usize,
    /// IRQ flags latched from the last completed operation
    last_irq: u16,
    armed: Option<RxWindow>,
}

impl<Spi, Nrst, Busy, Delay> Sx126x<Spi, Nrst, Busy, Delay>
where
    Spi: SpiDevice,
    Nrst: OutputPin,
    Busy: InputPin,
    Delay: DelayNs,
{
    /// Create a new session over a command channel
    pub fn new(channel: CommandChannel<Spi, Nrst, Busy, Delay>) -> Self {
        let config = LoraConfig::default();
        Self {
            channel,
            pa_profile: config.power_profile,
            dio2_rf_switch: config.dio2_rf_switch,
            config,
            applied: 0,
            state: RadioState::Idle,
            tx_buffer: Vec::new(),
            tx_open: false,
            tx_started: None,
            tx_len: 0,
            rx_frame: Vec::new(),
            rx_cursor: 0,
            last_irq: 0,
            armed: None,
        }
    }

    /// Build a session straight from the SPI device, control lines and delay
    pub fn from_parts(spi: Spi, pins: ControlPins<Nrst, Busy>, delay: Delay) -> Self {
        Self::new(CommandChannel::new(spi, pins, delay))
    }

    /// Select the power amplifier configured by `begin()`
    pub fn with_power_profile(mut self, profile: PowerProfile) -> Self {
        self.pa_profile = profile;
        self
    }

    /// Whether `begin()` hands the antenna switch to DIO2
    pub fn with_dio2_rf_switch(mut self, enabled: bool) -> Self {
        self.dio2_rf_switch = enabled;
        self
    }

    /// Reset and initialise the chip
    ///
    /// Leaves the session in `Configuring`: every configuration step must
    /// be applied again before the packet engine can run.
    pub fn begin(&mut self) -> Result<(), LoraError> {
        let reset = self.channel.reset();
        self.guard(reset)?;

        self.command(opcode::SET_STANDBY, &[standby::STDBY_RC])?;

        let status = self.channel.get_status();
        let status = self.guard(status)?;
        if !status.is_standby() {
            log::error!("SX126x not detected (mode {:?})", status.mode);
            return Err(LoraError::NotDetected);
        }

        self.command(opcode::SET_PACKET_TYPE, &[packet_type::LORA])?;
        self.command(opcode::SET_PA_CONFIG, &pa_config_params(self.pa_profile))?;

        // OCP register value = current_ma / 2.5
        let ocp = ((u32::from(OCP_LIMIT_MA) * 10) / 25).min(63) as u8;
        self.write_register(register::OCP_CONFIGURATION, &[ocp])?;

        if self.dio2_rf_switch {
            self.command(opcode::SET_DIO2_AS_RF_SWITCH_CTRL, &[0x01])?;
        }
        self.command(opcode::SET_BUFFER_BASE_ADDRESS, &[0x00, 0x00])?;

        self.applied = 0;
        self.armed = None;
        self.tx_open = false;
        self.clear_rx_frame();
        self.set_state(RadioState::Configuring);
        log::info!("SX126x initialised");
        Ok(())
    }

    pub fn state(&self) -> RadioState {
        self.state
    }

    /// Configuration as last applied to the chip
    pub fn config(&self) -> &LoraConfig {
        &self.config
    }

    /// Put the chip in standby and hand back the SPI device and lines
    pub fn shutdown(mut self) -> (Spi, ControlPins<Nrst, Busy>, Delay) {
        if self.state != RadioState::Idle {
            if let Err(e) = LoraRadio::standby(&mut self) {
                log::warn!("standby on shutdown failed: {}", e);
            }
        }
        log::debug!("SX126x released");
        self.channel.release()
    }

    pub(crate) fn set_state(&mut self, state: RadioState) {
        if self.state != state {
            log::debug!("radio state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// A busy-line timeout faults the current operation
    fn guard<T>(&mut self, result: Result<T, LoraError>) -> Result<T, LoraError> {
        if let Err(LoraError::Timeout) = result {
            self.set_state(RadioState::Fault);
        }
        result
    }

    pub(crate) fn command(&mut self, opcode: u8, params: &[u8]) -> Result<(), LoraError> {
        let result = self.channel.send_command(opcode, params);
        self.guard(result)
    }

    pub(crate) fn write_register(&mut self, address: u16, data: &[u8]) -> Result<(), LoraError> {
        let result = self.channel.write_register_at(address, data);
        self.guard(result)
    }

    fn query(&mut self, opcode: u8, len: usize) -> Result<Vec<u8, MAX_TRANSFER>, LoraError> {
        let result = self.channel.read_register(opcode, &[], len);
        self.guard(result)
    }

    fn irq_status(&mut self) -> Result<u16, LoraError> {
        let bytes = self.query(opcode::GET_IRQ_STATUS, 2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn arm_irq(&mut self, mask: u16) -> Result<(), LoraError> {
        let [hi, lo] = mask.to_be_bytes();
        // IRQ mask, DIO1 mask, DIO2 mask, DIO3 mask
        self.command(opcode::SET_DIO_IRQ_PARAMS, &[hi, lo, hi, lo, 0x00, 0x00, 0x00, 0x00])
    }

    fn clear_irq(&mut self) -> Result<(), LoraError> {
        self.command(opcode::CLEAR_IRQ_STATUS, &irq::ALL.to_be_bytes())
    }

    fn unread(&self) -> usize {
        self.rx_frame.len() - self.rx_cursor
    }

    fn clear_rx_frame(&mut self) {
        self.rx_frame.clear();
        self.rx_cursor = 0;
    }

    /// Packet params for the maximum length, then receive IRQs armed and cleared
    fn prepare_receiver(&mut self) -> Result<(), LoraError> {
        let params = packet_params(
            self.config.header_mode,
            self.config.preamble_length,
            self.config.max_payload,
            self.config.crc_enabled,
        );
        self.command(opcode::SET_PACKET_PARAMS, &params)?;
        self.arm_irq(irq::RX)?;
        self.clear_irq()?;
        self.clear_rx_frame();
        self.last_irq = 0;
        Ok(())
    }

    /// Check the armed receive window once
    ///
    /// On completion the payload is copied out of the chip buffer. Returns
    /// `true` when a payload arrived.
    fn poll_reception(&mut self) -> Result<bool, LoraError> {
        let Some(window) = self.armed else {
            return Ok(false);
        };

        let flags = self.irq_status()?;
        if flags & irq::RX == 0 {
            return Ok(false);
        }
        self.clear_irq()?;
        self.last_irq = flags;

        let mut delivered = false;
        if flags & irq::RX_DONE != 0 {
            let status = self.query(opcode::GET_RX_BUFFER_STATUS, 2)?;
            let (len, offset) = (status[0], status[1]);
            let frame = self.channel.read_buffer(offset, usize::from(len));
            self.rx_frame = self.guard(frame)?;
            self.rx_cursor = 0;
            delivered = len > 0;
            log::debug!("received {} bytes (irq 0x{:04X})", len, flags);
        } else {
            log::debug!("reception ended without payload (irq 0x{:04X})", flags);
        }

        if window != RxWindow::Continuous {
            self.armed = None;
            self.set_state(RadioState::Standby);
        }
        Ok(delivered)
    }
}

impl<Spi, Nrst, Busy, Delay> LoraRadio for Sx126x<Spi, Nrst, Busy, Delay>
where
    Spi: SpiDevice,
    Nrst: OutputPin,
    Busy: InputPin,
    Delay: DelayNs,
{
    fn begin_transmission(&mut self) -> Result<(), LoraError> {
        self.ensure_configured()?;
        self.tx_buffer.clear();
        self.tx_open = true;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), LoraError> {
        self.ensure_configured()?;
        if !self.tx_open {
            return Err(LoraError::NotTransmitting);
        }
        if self.tx_buffer.len() + data.len() > usize::from(self.config.max_payload) {
            return Err(LoraError::PayloadTooLong);
        }
        self.tx_buffer
            .extend_from_slice(data)
            .map_err(|_| LoraError::PayloadTooLong)
    }

    fn end_transmission(&mut self) -> Result<(), LoraError> {
        self.ensure_configured()?;
        if !self.tx_open {
            return Err(LoraError::NotTransmitting);
        }
        self.tx_open = false;
        if self.tx_buffer.is_empty() {
            return Err(LoraError::EmptyPayload);
        }

        if self.armed.take().is_some() {
            self.command(opcode::SET_STANDBY, &[standby::STDBY_RC])?;
        }

        let len = self.tx_buffer.len();
        let length = u8::try_from(len).map_err(|_| LoraError::PayloadTooLong)?;

        let written = self.channel.write_buffer(0x00, &self.tx_buffer);
        self.guard(written)?;

        let params = packet_params(
            self.config.header_mode,
            self.config.preamble_length,
            length,
            self.config.crc_enabled,
        );
        self.command(opcode::SET_PACKET_PARAMS, &params)?;
        self.arm_irq(irq::TX)?;
        self.clear_irq()?;
        self.command(opcode::SET_TX, &TX_SINGLE)?;

        self.tx_len = len;
        self.tx_started = Some(Instant::now());
        self.last_irq = 0;
        self.set_state(RadioState::Transmitting);
        log::debug!("transmitting {} bytes", len);
        Ok(())
    }

    fn wait_for_transmission_done(&mut self, timeout: Duration) -> Result<TxReport, LoraError> {
        self.ensure_configured()?;
        if self.state != RadioState::Transmitting {
            return Err(LoraError::NotTransmitting);
        }

        let mut deadline = Deadline::new(timeout);
        loop {
            let flags = self.irq_status()?;
            if flags & irq::TX_DONE != 0 {
                let elapsed = self.tx_started.take().map_or(Duration::ZERO, |t| t.elapsed());
                self.clear_irq()?;
                self.last_irq = flags;
                self.set_state(RadioState::Standby);
                return Ok(TxReport {
                    bytes: self.tx_len,
                    elapsed,
                });
            }
            if flags & irq::TIMEOUT != 0 {
                self.clear_irq()?;
                self.last_irq = flags;
                self.tx_started = None;
                self.set_state(RadioState::Standby);
                log::warn!("chip reported TX timeout");
                return Err(LoraError::TransmitFailed);
            }
            let Some(pause) = deadline.next_pause(irq_poll_interval()) else {
                self.set_state(RadioState::Fault);
                return Err(LoraError::Timeout);
            };
            self.channel.pause(pause);
            deadline.record(pause);
        }
    }

    fn request_reception(&mut self, mode: RxMode) -> Result<(), LoraError> {
        self.ensure_configured()?;
        self.prepare_receiver()?;

        let (timeout, window, state) = match mode {
            RxMode::SingleShot => (rx_timeout::SINGLE, RxWindow::SingleShot, RadioState::Receiving),
            RxMode::Continuous => (
                rx_timeout::CONTINUOUS,
                RxWindow::Continuous,
                RadioState::ReceivingContinuous,
            ),
        };
        self.command(opcode::SET_RX, &timeout)?;

        self.armed = Some(window);
        self.set_state(state);
        Ok(())
    }

    fn listen(&mut self, rx_window_ms: u32, sleep_window_ms: u32) -> Result<(), LoraError> {
        self.ensure_configured()?;
        self.prepare_receiver()?;

        let [r0, r1, r2] = listen_period(rx_window_ms);
        let [s0, s1, s2] = listen_period(sleep_window_ms);
        self.command(opcode::SET_RX_DUTY_CYCLE, &[r0, r1, r2, s0, s1, s2])?;

        self.armed = Some(RxWindow::Listen);
        self.set_state(RadioState::ReceivingListen);
        Ok(())
    }

    fn wait_for_reception(&mut self, timeout: Duration) -> Result<bool, LoraError> {
        self.ensure_configured()?;

        let mut deadline = Deadline::new(timeout);
        loop {
            if self.armed.is_none() {
                return Ok(self.unread() > 0);
            }
            if self.poll_reception()? {
                return Ok(true);
            }
            let Some(pause) = deadline.next_pause(irq_poll_interval()) else {
                return Ok(false);
            };
            self.channel.pause(pause);
            deadline.record(pause);
        }
    }

    fn available(&mut self) -> Result<usize, LoraError> {
        self.ensure_configured()?;
        if self.unread() == 0 && self.armed.is_some() {
            self.poll_reception()?;
        }
        Ok(self.unread())
    }

    fn read(&mut self) -> Result<u8, LoraError> {
        self.ensure_configured()?;
        let byte = self
            .rx_frame
            .get(self.rx_cursor)
            .copied()
            .ok_or(LoraError::Underrun)?;
        self.rx_cursor += 1;
        Ok(byte)
    }

    fn status(&mut self) -> Result<RxStatus, LoraError> {
        self.ensure_configured()?;
        let flags = self.last_irq | self.irq_status()?;
        if flags & irq::HEADER_ERR != 0 {
            Ok(RxStatus::HeaderError)
        } else if flags & irq::CRC_ERR != 0 {
            Ok(RxStatus::CrcError)
        } else {
            Ok(RxStatus::Ok)
        }
    }

    fn signal_metrics(&mut self) -> Result<SignalMetrics, LoraError> {
        self.ensure_configured()?;
        let bytes = self.query(opcode::GET_PACKET_STATUS, 3)?;
        Ok(decode_packet_status([bytes[0], bytes[1], bytes[2]]))
    }

    fn standby(&mut self) -> Result<(), LoraError> {
        self.command(opcode::SET_STANDBY, &[standby::STDBY_RC])?;
        self.armed = None;
        self.tx_open = false;
        self.tx_started = None;
        let state = if self.is_configured() {
            RadioState::Standby
        } else if self.state == RadioState::Idle {
            RadioState::Idle
        } else {
            RadioState::Configuring
        };
        self.set_state(state);
        Ok(())
    }
}
