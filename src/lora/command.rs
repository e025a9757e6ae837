//! SX126x command channel
//!
//! Every command is a single SPI transaction: the opcode, then either its
//! parameter bytes or its address bytes followed by dummy bytes whose echo
//! carries the response. The chip holds BUSY high while it processes a
//! command, so the line is polled before and after every transaction.

use core::time::Duration;
use std::time::Instant;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use heapless::Vec;

use crate::config::{protocol::MAX_LORA_PAYLOAD, timing};
use crate::lora::traits::LoraError;

/// SX126x command opcodes
pub mod opcode {
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_DIO3_AS_TCXO_CTRL: u8 = 0x97;
    pub const SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
    pub const SET_PACKET_TYPE: u8 = 0x8A;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PACKET_PARAMS: u8 = 0x8C;
    pub const SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
    pub const WRITE_BUFFER: u8 = 0x0E;
    pub const READ_BUFFER: u8 = 0x1E;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const SET_PA_CONFIG: u8 = 0x95;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RX: u8 = 0x82;
    pub const SET_RX_DUTY_CYCLE: u8 = 0x94;
    pub const GET_STATUS: u8 = 0xC0;
    pub const WRITE_REGISTER: u8 = 0x0D;
    pub const READ_REGISTER: u8 = 0x1D;
    pub const GET_PACKET_STATUS: u8 = 0x14;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x13;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x08;
    pub const GET_IRQ_STATUS: u8 = 0x12;
    pub const CLEAR_IRQ_STATUS: u8 = 0x02;
}

/// Largest transaction: opcode, 16-bit address, status slot and a full buffer
pub const MAX_TRANSFER: usize = 4 + MAX_LORA_PAYLOAD;

const NOP: u8 = 0x00;

/// Control lines for the SX126x
pub struct ControlPins<Nrst, Busy> {
    pub nrst: Nrst,
    pub busy: Busy,
}

/// Chip mode field of the GetStatus byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipMode {
    StandbyRc,
    StandbyXosc,
    FrequencySynthesis,
    Receive,
    Transmit,
    Unknown(u8),
}

/// Decoded GetStatus byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipStatus {
    pub mode: ChipMode,
    /// Command status field (bits 3:1)
    pub command_status: u8,
}

impl ChipStatus {
    pub fn from_byte(byte: u8) -> Self {
        let mode = match (byte >> 4) & 0x07 {
            0x2 => ChipMode::StandbyRc,
            0x3 => ChipMode::StandbyXosc,
            0x4 => ChipMode::FrequencySynthesis,
            0x5 => ChipMode::Receive,
            0x6 => ChipMode::Transmit,
            other => ChipMode::Unknown(other),
        };
        Self {
            mode,
            command_status: (byte >> 1) & 0x07,
        }
    }

    pub fn is_standby(&self) -> bool {
        matches!(self.mode, ChipMode::StandbyRc | ChipMode::StandbyXosc)
    }
}

/// Time budget for a polling loop
///
/// Time spent is the larger of the pauses requested and the wall clock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    limit: Duration,
    slept: Duration,
}

impl Deadline {
    pub(crate) fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            slept: Duration::ZERO,
        }
    }

    pub(crate) fn waited(&self) -> Duration {
        self.slept.max(self.started.elapsed())
    }

    /// Next pause, at most `interval` and never past the limit
    ///
    /// `None` once the limit is reached.
    pub(crate) fn next_pause(&self, interval: Duration) -> Option<Duration> {
        let remaining = self.limit.checked_sub(self.waited())?;
        if remaining.is_zero() {
            return None;
        }
        Some(remaining.min(interval))
    }

    pub(crate) fn record(&mut self, pause: Duration) {
        self.slept += pause;
    }
}

/// Opcode-level access to an SX126x
///
/// Owns the SPI device and both control lines for its whole lifetime.
/// Commands are strictly sequential; each call returns only once the busy
/// line has cleared again or the deadline has passed.
pub struct CommandChannel<Spi, Nrst, Busy, Delay> {
    spi: Spi,
    nrst: Nrst,
    busy: Busy,
    delay: Delay,
    busy_timeout: Duration,
    poll_interval_us: u32,
}

impl<Spi, Nrst, Busy, Delay> CommandChannel<Spi, Nrst, Busy, Delay>
where
    Spi: SpiDevice,
    Nrst: OutputPin,
    Busy: InputPin,
    Delay: DelayNs,
{
    /// Create a new command channel
    pub fn new(spi: Spi, pins: ControlPins<Nrst, Busy>, delay: Delay) -> Self {
        Self {
            spi,
            nrst: pins.nrst,
            busy: pins.busy,
            delay,
            busy_timeout: Duration::from_millis(timing::BUSY_TIMEOUT_MS),
            poll_interval_us: timing::BUSY_POLL_INTERVAL_US,
        }
    }

    /// Override the busy-line deadline used around every command
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Hardware reset: NRST low, then high, then wait for the chip to come up
    pub fn reset(&mut self) -> Result<(), LoraError> {
        self.nrst.set_low().map_err(|_| LoraError::GpioError)?;
        self.delay.delay_ms(timing::RESET_PULSE_MS);
        self.nrst.set_high().map_err(|_| LoraError::GpioError)?;
        self.delay.delay_ms(timing::RESET_PULSE_MS);
        self.wait_ready(self.busy_timeout)
    }

    /// Sample the busy line once
    pub fn is_busy(&mut self) -> Result<bool, LoraError> {
        self.busy.is_high().map_err(|_| LoraError::GpioError)
    }

    /// Wait for the BUSY pin to go low
    ///
    /// Polls at a fixed interval; never sleeps past `timeout`.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<(), LoraError> {
        let interval = Duration::from_micros(u64::from(self.poll_interval_us));
        let mut deadline = Deadline::new(timeout);

        loop {
            if !self.is_busy()? {
                return Ok(());
            }
            let Some(pause) = deadline.next_pause(interval) else {
                log::warn!("busy line stuck high after {:?}", deadline.waited());
                return Err(LoraError::Timeout);
            };
            self.pause(pause);
            deadline.record(pause);
        }
    }

    /// Write a command with its parameter bytes
    pub fn send_command(&mut self, opcode: u8, params: &[u8]) -> Result<(), LoraError> {
        let mut buf: Vec<u8, MAX_TRANSFER> = Vec::new();
        buf.push(opcode).map_err(|_| LoraError::PayloadTooLong)?;
        buf.extend_from_slice(params)
            .map_err(|_| LoraError::PayloadTooLong)?;

        log::trace!("cmd 0x{:02X} {:02X?}", opcode, params);
        self.transfer(&mut buf)
    }

    /// Read `len` bytes answered to `opcode` and its address bytes
    ///
    /// The chip clocks out a status byte after the address; the payload
    /// follows it.
    pub fn read_register(
        &mut self,
        opcode: u8,
        address: &[u8],
        len: usize,
    ) -> Result<Vec<u8, MAX_TRANSFER>, LoraError> {
        let header = 1 + address.len() + 1;
        let mut buf: Vec<u8, MAX_TRANSFER> = Vec::new();
        buf.push(opcode).map_err(|_| LoraError::PayloadTooLong)?;
        buf.extend_from_slice(address)
            .map_err(|_| LoraError::PayloadTooLong)?;
        buf.resize(header + len, NOP)
            .map_err(|_| LoraError::PayloadTooLong)?;

        log::trace!("read 0x{:02X} {:02X?} ({} bytes)", opcode, address, len);
        self.transfer(&mut buf)?;

        Vec::from_slice(&buf[header..]).map_err(|_| LoraError::PayloadTooLong)
    }

    /// GetStatus: the status slot of a two-byte exchange
    pub fn get_status(&mut self) -> Result<ChipStatus, LoraError> {
        let mut buf = [opcode::GET_STATUS, NOP];
        self.transfer(&mut buf)?;
        Ok(ChipStatus::from_byte(buf[1]))
    }

    /// Write data into the chip's data buffer
    pub fn write_buffer(&mut self, offset: u8, data: &[u8]) -> Result<(), LoraError> {
        let mut buf: Vec<u8, MAX_TRANSFER> = Vec::new();
        buf.push(opcode::WRITE_BUFFER)
            .map_err(|_| LoraError::PayloadTooLong)?;
        buf.push(offset).map_err(|_| LoraError::PayloadTooLong)?;
        buf.extend_from_slice(data)
            .map_err(|_| LoraError::PayloadTooLong)?;

        log::trace!("write buffer @0x{:02X} ({} bytes)", offset, data.len());
        self.transfer(&mut buf)
    }

    /// Read data from the chip's data buffer
    pub fn read_buffer(&mut self, offset: u8, len: usize) -> Result<Vec<u8, MAX_TRANSFER>, LoraError> {
        self.read_register(opcode::READ_BUFFER, &[offset], len)
    }

    /// Write to a 16-bit addressed register
    pub fn write_register_at(&mut self, address: u16, data: &[u8]) -> Result<(), LoraError> {
        let mut params: Vec<u8, MAX_TRANSFER> = Vec::new();
        params
            .extend_from_slice(&address.to_be_bytes())
            .map_err(|_| LoraError::PayloadTooLong)?;
        params
            .extend_from_slice(data)
            .map_err(|_| LoraError::PayloadTooLong)?;
        self.send_command(opcode::WRITE_REGISTER, &params)
    }

    /// Read from a 16-bit addressed register
    pub fn read_register_at(&mut self, address: u16, len: usize) -> Result<Vec<u8, MAX_TRANSFER>, LoraError> {
        self.read_register(opcode::READ_REGISTER, &address.to_be_bytes(), len)
    }

    /// Sleep on the channel's delay provider
    pub fn pause(&mut self, duration: Duration) {
        self.delay
            .delay_ns(u32::try_from(duration.as_nanos()).unwrap_or(u32::MAX));
    }

    /// Give back the SPI device, control lines and delay provider
    pub fn release(self) -> (Spi, ControlPins<Nrst, Busy>, Delay) {
        (
            self.spi,
            ControlPins {
                nrst: self.nrst,
                busy: self.busy,
            },
            self.delay,
        )
    }

    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), LoraError> {
        self.wait_ready(self.busy_timeout)?;
        self.spi
            .transfer_in_place(buf)
            .map_err(|_| LoraError::SpiError)?;
        self.wait_ready(self.busy_timeout)
    }
}
