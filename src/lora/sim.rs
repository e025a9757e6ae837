//! Simulated SX126x for driver tests
//!
//! Implements the SPI device, both control lines and the delay provider
//! over one shared chip model. Every SPI transaction is recorded, simulated
//! time only advances through the delay provider.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::rc::Rc;

use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, InputPin, OutputPin};
use embedded_hal::spi::{self, Operation, SpiDevice};

use crate::lora::command::{opcode, CommandChannel, ControlPins};
use crate::lora::driver::Sx126x;
use crate::lora::traits::LoraConfig;

/// IRQ flags raised by the model
pub mod irq_bits {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const HEADER_ERR: u16 = 0x0020;
    pub const CRC_ERR: u16 = 0x0040;
    pub const TIMEOUT: u16 = 0x0200;

    pub const RX_ANY: u16 = RX_DONE | HEADER_ERR | CRC_ERR | TIMEOUT;
}

/// Packet waiting to be "received"
#[derive(Debug, Clone)]
pub struct Incoming {
    pub data: Vec<u8>,
    pub irq: u16,
    pub packet_status: [u8; 3],
}

/// Model of the chip's command-visible state
pub struct ChipState {
    /// Every SPI transaction as sent by the host
    pub frames: Vec<Vec<u8>>,
    /// Busy line reads high after every command for this many samples
    pub busy_after_command: usize,
    pending_busy: usize,
    pub stuck_busy: bool,
    pub irq: u16,
    pub buffer: Vec<u8>,
    pub rx_len: u8,
    pub rx_offset: u8,
    pub packet_status: [u8; 3],
    pub registers: HashMap<u16, u8>,
    /// GetStatus reply, STDBY_RC by default
    pub status_byte: u8,
    /// Raise TX done as soon as SetTx arrives
    pub auto_tx_done: bool,
    pub incoming: VecDeque<Incoming>,
    rx_armed: bool,
    rx_continuous: bool,
    nrst_low: bool,
    pub reset_pulses: usize,
    /// Simulated time slept through the delay provider
    pub elapsed_ns: u64,
    /// Also sleep for real, this many times the requested delay
    pub real_sleep_factor: u32,
}

impl ChipState {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            busy_after_command: 0,
            pending_busy: 0,
            stuck_busy: false,
            irq: 0,
            buffer: vec![0; 256],
            rx_len: 0,
            rx_offset: 0,
            packet_status: [0; 3],
            registers: HashMap::new(),
            status_byte: 0x20,
            auto_tx_done: true,
            incoming: VecDeque::new(),
            rx_armed: false,
            rx_continuous: false,
            nrst_low: false,
            reset_pulses: 0,
            elapsed_ns: 0,
            real_sleep_factor: 0,
        }
    }

    /// Queue a packet for the next armed receive window
    pub fn queue_packet(&mut self, data: &[u8], irq: u16, packet_status: [u8; 3]) {
        self.incoming.push_back(Incoming {
            data: data.to_vec(),
            irq,
            packet_status,
        });
    }

    /// Opcode of every recorded transaction
    pub fn opcodes(&self) -> Vec<u8> {
        self.frames.iter().filter_map(|f| f.first().copied()).collect()
    }

    fn busy_sample(&mut self) -> bool {
        if self.stuck_busy {
            return true;
        }
        if self.pending_busy > 0 {
            self.pending_busy -= 1;
            return true;
        }
        false
    }

    fn deliver(&mut self) {
        if !self.rx_armed || self.irq & irq_bits::RX_ANY != 0 {
            return;
        }
        let Some(packet) = self.incoming.pop_front() else {
            return;
        };
        for (i, byte) in packet.data.iter().enumerate() {
            self.buffer[i % 256] = *byte;
        }
        self.rx_len = packet.data.len() as u8;
        self.rx_offset = 0;
        self.packet_status = packet.packet_status;
        self.irq |= packet.irq;
        if !self.rx_continuous {
            self.rx_armed = false;
        }
    }

    fn exchange(&mut self, buf: &mut [u8]) {
        let sent = buf.to_vec();
        self.frames.push(sent.clone());

        let Some(&op) = sent.first() else {
            return;
        };
        match op {
            opcode::GET_STATUS => put(buf, 1, &[self.status_byte]),
            opcode::GET_IRQ_STATUS => {
                self.deliver();
                put(buf, 2, &self.irq.to_be_bytes());
            }
            opcode::GET_RX_BUFFER_STATUS => put(buf, 2, &[self.rx_len, self.rx_offset]),
            opcode::GET_PACKET_STATUS => put(buf, 2, &self.packet_status),
            opcode::READ_REGISTER if sent.len() >= 4 => {
                let address = u16::from_be_bytes([sent[1], sent[2]]);
                let values: Vec<u8> = (0..sent.len() - 4)
                    .map(|i| *self.registers.get(&(address + i as u16)).unwrap_or(&0))
                    .collect();
                put(buf, 4, &values);
            }
            opcode::READ_BUFFER if sent.len() >= 3 => {
                let offset = usize::from(sent[1]);
                let values: Vec<u8> = (0..sent.len() - 3)
                    .map(|i| self.buffer[(offset + i) % 256])
                    .collect();
                put(buf, 3, &values);
            }
            opcode::WRITE_BUFFER if sent.len() >= 2 => {
                let offset = usize::from(sent[1]);
                for (i, byte) in sent[2..].iter().enumerate() {
                    self.buffer[(offset + i) % 256] = *byte;
                }
            }
            opcode::WRITE_REGISTER if sent.len() >= 3 => {
                let address = u16::from_be_bytes([sent[1], sent[2]]);
                for (i, byte) in sent[3..].iter().enumerate() {
                    self.registers.insert(address + i as u16, *byte);
                }
            }
            opcode::CLEAR_IRQ_STATUS if sent.len() >= 3 => {
                self.irq &= !u16::from_be_bytes([sent[1], sent[2]]);
            }
            opcode::SET_STANDBY => self.rx_armed = false,
            opcode::SET_TX => {
                self.rx_armed = false;
                if self.auto_tx_done {
                    self.irq |= irq_bits::TX_DONE;
                }
            }
            opcode::SET_RX => {
                self.rx_armed = true;
                self.rx_continuous = sent.get(1..4) == Some(&[0xFF, 0xFF, 0xFF][..]);
            }
            opcode::SET_RX_DUTY_CYCLE => {
                self.rx_armed = true;
                self.rx_continuous = false;
            }
            _ => {}
        }

        self.pending_busy = self.busy_after_command;
    }
}

impl Default for ChipState {
    fn default() -> Self {
        Self::new()
    }
}

fn put(buf: &mut [u8], at: usize, values: &[u8]) {
    for (i, value) in values.iter().enumerate() {
        if let Some(slot) = buf.get_mut(at + i) {
            *slot = *value;
        }
    }
}

pub type Chip = Rc<RefCell<ChipState>>;

pub struct SimSpi(Chip);
pub struct SimReset(Chip);
pub struct SimBusy(Chip);
pub struct SimDelay(Chip);

impl spi::ErrorType for SimSpi {
    type Error = Infallible;
}

impl SpiDevice for SimSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        for operation in operations {
            match operation {
                Operation::TransferInPlace(buf) => self.0.borrow_mut().exchange(buf),
                Operation::Write(data) => {
                    let mut copy = data.to_vec();
                    self.0.borrow_mut().exchange(&mut copy);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl digital::ErrorType for SimReset {
    type Error = Infallible;
}

impl OutputPin for SimReset {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().nrst_low = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut chip = self.0.borrow_mut();
        if chip.nrst_low {
            chip.reset_pulses += 1;
            chip.irq = 0;
            chip.rx_armed = false;
        }
        chip.nrst_low = false;
        Ok(())
    }
}

impl digital::ErrorType for SimBusy {
    type Error = Infallible;
}

impl InputPin for SimBusy {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.borrow_mut().busy_sample())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.borrow_mut().busy_sample())
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        let factor = {
            let mut chip = self.0.borrow_mut();
            chip.elapsed_ns += u64::from(ns);
            chip.real_sleep_factor
        };
        if factor > 0 {
            std::thread::sleep(Duration::from_nanos(u64::from(ns) * u64::from(factor)));
        }
    }
}

pub type SimRadio = Sx126x<SimSpi, SimReset, SimBusy, SimDelay>;

/// Command channel over a fresh chip model
pub fn channel() -> (Chip, CommandChannel<SimSpi, SimReset, SimBusy, SimDelay>) {
    let chip: Chip = Rc::new(RefCell::new(ChipState::new()));
    let channel = CommandChannel::new(
        SimSpi(chip.clone()),
        ControlPins {
            nrst: SimReset(chip.clone()),
            busy: SimBusy(chip.clone()),
        },
        SimDelay(chip.clone()),
    );
    (chip, channel)
}

/// Session that has not run `begin()` yet
pub fn radio() -> (Chip, SimRadio) {
    let (chip, channel) = channel();
    (chip, Sx126x::new(channel))
}

pub fn radio_with_busy_timeout(timeout: Duration) -> (Chip, SimRadio) {
    let (chip, channel) = channel();
    (chip, Sx126x::new(channel.with_busy_timeout(timeout)))
}

/// Initialised session with the default configuration, transaction log cleared
pub fn configured_radio() -> (Chip, SimRadio) {
    let (chip, mut radio) = radio();
    if let Err(e) = radio.begin().and_then(|_| radio.configure(&LoraConfig::default())) {
        panic!("simulated radio failed to start: {}", e);
    }
    chip.borrow_mut().frames.clear();
    (chip, radio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_after_command_is_waited_out() {
        let (chip, mut channel) = channel();
        chip.borrow_mut().busy_after_command = 3;

        channel.send_command(opcode::SET_STANDBY, &[0x00]).unwrap();

        // three 1 ms polls after the transaction
        assert_eq!(chip.borrow().elapsed_ns, 3_000_000);
        assert_eq!(chip.borrow().frames, vec![vec![0x80, 0x00]]);
    }

    #[test]
    fn test_register_round_trip_through_model() {
        let (_chip, mut channel) = channel();

        channel.write_register_at(0x0740, &[0x12, 0x34]).unwrap();
        let value = channel.read_register_at(0x0740, 2).unwrap();

        assert_eq!(value.as_slice(), &[0x12, 0x34]);
    }
}
