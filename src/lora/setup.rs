//! Radio configuration setters
//!
//! Each setter validates its input, translates it into the chip's encoded
//! parameters and issues exactly one command. The applied steps are tracked
//! so the packet engine can refuse to run on a half-configured chip.

use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

use crate::lora::command::opcode;
use crate::lora::driver::Sx126x;
use crate::lora::traits::{HeaderMode, LoraConfig, LoraError, PowerProfile, RadioState, RxGain, TcxoConfig};

/// SX126x register addresses
pub(crate) mod register {
    pub const SYNC_WORD: u16 = 0x0740;
    pub const RX_GAIN: u16 = 0x08AC;
    /// Over-current protection register
    pub const OCP_CONFIGURATION: u16 = 0x08E7;
}

/// Configuration steps, one bit each
pub(crate) mod step {
    pub const CLOCK: u8 = 1 << 0;
    pub const FREQUENCY: u8 = 1 << 1;
    pub const POWER: u8 = 1 << 2;
    pub const RX_GAIN: u8 = 1 << 3;
    pub const MODULATION: u8 = 1 << 4;
    pub const PACKET: u8 = 1 << 5;
    pub const SYNC_WORD: u8 = 1 << 6;
    pub const ALL: u8 = 0x7F;
}

/// Crystal reference of the frequency synthesiser
const XTAL_HZ: u64 = 32_000_000;
const FREQUENCY_RANGE_HZ: (u32, u32) = (150_000_000, 960_000_000);

/// SetTxParams ramp time code for 200 us
const RAMP_200U: u8 = 0x04;

const RX_GAIN_POWER_SAVING: u8 = 0x94;
const RX_GAIN_BOOSTED: u8 = 0x96;

/// Encode a carrier frequency as synthesiser steps (hz * 2^25 / 32 MHz)
pub fn frequency_params(hz: u32) -> Result<[u8; 4], LoraError> {
    if hz < FREQUENCY_RANGE_HZ.0 || hz > FREQUENCY_RANGE_HZ.1 {
        return Err(LoraError::InvalidConfig("frequency out of range"));
    }
    let steps = ((u64::from(hz) << 25) / XTAL_HZ) as u32;
    Ok(steps.to_be_bytes())
}

/// Map a bandwidth in Hz to its chip code
pub fn bandwidth_code(hz: u32) -> Result<u8, LoraError> {
    let code = match hz {
        7_800 => 0x00,
        10_400 => 0x08,
        15_600 => 0x01,
        20_800 => 0x09,
        31_250 => 0x02,
        41_700 => 0x0A,
        62_500 => 0x03,
        125_000 => 0x04,
        250_000 => 0x05,
        500_000 => 0x06,
        _ => return Err(LoraError::InvalidConfig("unsupported bandwidth")),
    };
    Ok(code)
}

/// Map a coding rate denominator (4/5 .. 4/8) to its chip code
pub fn coding_rate_code(coding_rate: u8) -> Result<u8, LoraError> {
    match coding_rate {
        5..=8 => Ok(coding_rate - 4),
        _ => Err(LoraError::InvalidConfig("coding rate must be 5-8")),
    }
}

/// Low data rate optimisation is required once a symbol lasts over 16 ms
pub fn low_data_rate_optimize(spreading_factor: u8, bandwidth_hz: u32) -> bool {
    // 2^sf / bw > 16 ms, kept in integers
    (1u64 << spreading_factor) * 1_000 > 16 * u64::from(bandwidth_hz)
}

/// SetModulationParams payload: [sf, bw, cr, ldro]
pub fn modulation_params(spreading_factor: u8, bandwidth_hz: u32, coding_rate: u8) -> Result<[u8; 4], LoraError> {
    if !(5..=12).contains(&spreading_factor) {
        return Err(LoraError::InvalidConfig("spreading factor must be 5-12"));
    }
    let bw = bandwidth_code(bandwidth_hz)?;
    let cr = coding_rate_code(coding_rate)?;
    let ldro = u8::from(low_data_rate_optimize(spreading_factor, bandwidth_hz));
    Ok([spreading_factor, bw, cr, ldro])
}

/// SetPacketParams payload: [preamble_hi, preamble_lo, header, length, crc, iq]
pub fn packet_params(header: HeaderMode, preamble_length: u16, payload_length: u8, crc_enabled: bool) -> [u8; 6] {
    let [pre_hi, pre_lo] = preamble_length.to_be_bytes();
    let header = match header {
        HeaderMode::Explicit => 0x00,
        HeaderMode::Implicit => 0x01,
    };
    [pre_hi, pre_lo, header, payload_length, u8::from(crc_enabled), 0x00]
}

/// SetTxParams payload: power clipped to the profile's range, 200 us ramp
pub fn tx_params(power_dbm: i8, profile: PowerProfile) -> [u8; 2] {
    let (min, max) = profile.power_range();
    let power = power_dbm.clamp(min, max);
    [power as u8, RAMP_200U]
}

/// SetPaConfig payload for the profile's power amplifier
pub fn pa_config_params(profile: PowerProfile) -> [u8; 4] {
    match profile {
        // paDutyCycle, hpMax, deviceSel, paLut
        PowerProfile::Sx1261 => [0x04, 0x00, 0x01, 0x01],
        PowerProfile::Sx1262 | PowerProfile::Sx1268 => [0x04, 0x07, 0x00, 0x01],
    }
}

pub fn rx_gain_value(gain: RxGain) -> u8 {
    match gain {
        RxGain::PowerSaving => RX_GAIN_POWER_SAVING,
        RxGain::Boosted => RX_GAIN_BOOSTED,
    }
}

/// Sync word register bytes
///
/// A one-byte sync word is spread over both registers with the 0x4
/// control nibble appended to each half.
pub fn sync_word_bytes(sync_word: u16) -> [u8; 2] {
    if sync_word <= 0xFF {
        let sw = sync_word as u8;
        [(sw & 0xF0) | 0x04, ((sw & 0x0F) << 4) | 0x04]
    } else {
        sync_word.to_be_bytes()
    }
}

/// SetDIO3AsTcxoCtrl payload: voltage code and a 24-bit delay in 15.625 us steps
pub fn tcxo_params(voltage_code: u8, startup_delay: Duration) -> Result<[u8; 4], LoraError> {
    if voltage_code > 0x07 {
        return Err(LoraError::InvalidConfig("TCXO voltage code must be 0-7"));
    }
    let steps = (startup_delay.as_micros() * 64 / 1_000).min(0x00FF_FFFF) as u32;
    let [_, hi, mid, lo] = steps.to_be_bytes();
    Ok([voltage_code, hi, mid, lo])
}

impl<Spi, Nrst, Busy, Delay> Sx126x<Spi, Nrst, Busy, Delay>
where
    Spi: SpiDevice,
    Nrst: OutputPin,
    Busy: InputPin,
    Delay: DelayNs,
{
    /// Apply a whole configuration record in the required order
    ///
    /// clock reference, frequency, power, rx gain, modulation, packet
    /// framing, sync word. Without a TCXO the crystal satisfies the clock
    /// step and no command is sent for it.
    pub fn configure(&mut self, config: &LoraConfig) -> Result<(), LoraError> {
        self.ensure_initialised()?;

        match config.tcxo {
            Some(TcxoConfig {
                voltage_code,
                startup_delay,
            }) => self.enable_external_clock_reference(voltage_code, startup_delay)?,
            None => {
                self.config.tcxo = None;
                self.mark_step(step::CLOCK);
            }
        }
        self.set_frequency(config.frequency_hz)?;
        self.set_tx_power(config.tx_power_dbm, config.power_profile)?;
        self.set_rx_gain(config.rx_gain)?;
        self.apply_modulation(config.spreading_factor, config.bandwidth_hz, config.coding_rate)?;
        self.apply_packet_framing(
            config.header_mode,
            config.preamble_length,
            config.max_payload,
            config.crc_enabled,
        )?;
        self.set_sync_word(config.sync_word)?;

        log::info!(
            "LoRa configured: {} Hz, SF{}, BW {} Hz, CR 4/{}",
            config.frequency_hz,
            config.spreading_factor,
            config.bandwidth_hz,
            config.coding_rate
        );
        Ok(())
    }

    /// Drive a TCXO from DIO3
    pub fn enable_external_clock_reference(&mut self, voltage_code: u8, startup_delay: Duration) -> Result<(), LoraError> {
        self.ensure_initialised()?;
        let params = tcxo_params(voltage_code, startup_delay)?;
        self.command(opcode::SET_DIO3_AS_TCXO_CTRL, &params)?;

        self.config.tcxo = Some(TcxoConfig {
            voltage_code,
            startup_delay,
        });
        self.mark_step(step::CLOCK);
        Ok(())
    }

    pub fn set_frequency(&mut self, hz: u32) -> Result<(), LoraError> {
        self.ensure_initialised()?;
        let params = frequency_params(hz)?;
        self.command(opcode::SET_RF_FREQUENCY, &params)?;

        self.config.frequency_hz = hz;
        self.mark_step(step::FREQUENCY);
        Ok(())
    }

    /// Set output power, clipped to what `profile` supports
    pub fn set_tx_power(&mut self, power_dbm: i8, profile: PowerProfile) -> Result<(), LoraError> {
        self.ensure_initialised()?;
        let params = tx_params(power_dbm, profile);
        self.command(opcode::SET_TX_PARAMS, &params)?;

        let applied = params[0] as i8;
        if applied != power_dbm {
            log::warn!("TX power {} dBm clipped to {} dBm", power_dbm, applied);
        }
        self.config.tx_power_dbm = applied;
        self.config.power_profile = profile;
        self.mark_step(step::POWER);
        Ok(())
    }

    pub fn set_rx_gain(&mut self, gain: RxGain) -> Result<(), LoraError> {
        self.ensure_initialised()?;
        self.write_register(register::RX_GAIN, &[rx_gain_value(gain)])?;

        self.config.rx_gain = gain;
        self.mark_step(step::RX_GAIN);
        Ok(())
    }

    /// Set spreading factor, bandwidth and coding rate
    pub fn apply_modulation(&mut self, spreading_factor: u8, bandwidth_hz: u32, coding_rate: u8) -> Result<(), LoraError> {
        self.ensure_initialised()?;
        let params = modulation_params(spreading_factor, bandwidth_hz, coding_rate)?;
        self.command(opcode::SET_MODULATION_PARAMS, &params)?;

        self.config.spreading_factor = spreading_factor;
        self.config.bandwidth_hz = bandwidth_hz;
        self.config.coding_rate = coding_rate;
        self.mark_step(step::MODULATION);
        Ok(())
    }

    /// Set header mode, preamble, maximum payload length and CRC
    pub fn apply_packet_framing(
        &mut self,
        header: HeaderMode,
        preamble_length: u16,
        max_payload: u8,
        crc_enabled: bool,
    ) -> Result<(), LoraError> {
        self.ensure_initialised()?;
        let params = packet_params(header, preamble_length, max_payload, crc_enabled);
        self.command(opcode::SET_PACKET_PARAMS, &params)?;

        self.config.header_mode = header;
        self.config.preamble_length = preamble_length;
        self.config.max_payload = max_payload;
        self.config.crc_enabled = crc_enabled;
        self.mark_step(step::PACKET);
        Ok(())
    }

    pub fn set_sync_word(&mut self, sync_word: u16) -> Result<(), LoraError> {
        self.ensure_initialised()?;
        self.write_register(register::SYNC_WORD, &sync_word_bytes(sync_word))?;

        self.config.sync_word = sync_word;
        self.mark_step(step::SYNC_WORD);
        Ok(())
    }

    /// Let DIO2 drive the antenna switch (not a tracked step)
    pub fn set_dio2_as_rf_switch(&mut self, enabled: bool) -> Result<(), LoraError> {
        self.ensure_initialised()?;
        self.command(opcode::SET_DIO2_AS_RF_SWITCH_CTRL, &[u8::from(enabled)])?;
        self.config.dio2_rf_switch = enabled;
        Ok(())
    }

    /// True once every configuration step has been applied
    pub fn is_configured(&self) -> bool {
        self.applied == step::ALL
    }

    pub(crate) fn ensure_initialised(&self) -> Result<(), LoraError> {
        if self.state == RadioState::Idle {
            return Err(LoraError::NotInitialised);
        }
        Ok(())
    }

    pub(crate) fn ensure_configured(&self) -> Result<(), LoraError> {
        if !self.is_configured() {
            return Err(LoraError::ConfigurationIncomplete);
        }
        Ok(())
    }

    fn mark_step(&mut self, step: u8) {
        let was_configured = self.is_configured();
        self.applied |= step;
        if !was_configured && self.is_configured() && self.state == RadioState::Configuring {
            self.set_state(RadioState::Standby);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_steps() {
        assert_eq!(frequency_params(921_625_000).unwrap(), [0x39, 0x9A, 0x00, 0x00]);
        assert_eq!(frequency_params(915_000_000).unwrap(), [0x39, 0x30, 0x00, 0x00]);
        assert!(frequency_params(100_000_000).is_err());
        assert!(frequency_params(2_400_000_000).is_err());
    }

    #[test]
    fn test_bandwidth_codes() {
        assert_eq!(bandwidth_code(7_800).unwrap(), 0x00);
        assert_eq!(bandwidth_code(41_700).unwrap(), 0x0A);
        assert_eq!(bandwidth_code(125_000).unwrap(), 0x04);
        assert_eq!(bandwidth_code(250_000).unwrap(), 0x05);
        assert_eq!(bandwidth_code(500_000).unwrap(), 0x06);
        assert_eq!(
            bandwidth_code(200_000),
            Err(LoraError::InvalidConfig("unsupported bandwidth"))
        );
    }

    #[test]
    fn test_modulation_params() {
        assert_eq!(modulation_params(11, 250_000, 5).unwrap(), [11, 0x05, 0x01, 0x00]);
        // 16.384 ms symbols need LDRO
        assert_eq!(modulation_params(12, 250_000, 8).unwrap(), [12, 0x05, 0x04, 0x01]);
        assert_eq!(modulation_params(11, 125_000, 5).unwrap(), [11, 0x04, 0x01, 0x01]);
        assert!(modulation_params(4, 125_000, 5).is_err());
        assert!(modulation_params(7, 125_000, 9).is_err());
    }

    #[test]
    fn test_packet_params() {
        assert_eq!(
            packet_params(HeaderMode::Explicit, 12, 255, true),
            [0x00, 0x0C, 0x00, 0xFF, 0x01, 0x00]
        );
        assert_eq!(
            packet_params(HeaderMode::Implicit, 0x0108, 6, false),
            [0x01, 0x08, 0x01, 0x06, 0x00, 0x00]
        );
    }

    #[test]
    fn test_tx_power_clipping() {
        assert_eq!(tx_params(22, PowerProfile::Sx1262), [22, 0x04]);
        assert_eq!(tx_params(30, PowerProfile::Sx1262), [22, 0x04]);
        assert_eq!(tx_params(-20, PowerProfile::Sx1268), [0xF7, 0x04]);
        assert_eq!(tx_params(20, PowerProfile::Sx1261), [15, 0x04]);
        assert_eq!(tx_params(-17, PowerProfile::Sx1261), [0xEF, 0x04]);
    }

    #[test]
    fn test_sync_word_bytes() {
        assert_eq!(sync_word_bytes(0x3444), [0x34, 0x44]);
        assert_eq!(sync_word_bytes(0x12), [0x14, 0x24]);
        assert_eq!(sync_word_bytes(0x34), [0x34, 0x44]);
    }

    #[test]
    fn test_tcxo_params() {
        assert_eq!(
            tcxo_params(0x02, Duration::from_millis(10)).unwrap(),
            [0x02, 0x00, 0x02, 0x80]
        );
        assert_eq!(
            tcxo_params(0x07, Duration::from_secs(1_000)).unwrap(),
            [0x07, 0xFF, 0xFF, 0xFF]
        );
        assert!(tcxo_params(0x08, Duration::from_millis(5)).is_err());
    }

    #[test]
    fn test_rx_gain_values() {
        assert_eq!(rx_gain_value(RxGain::PowerSaving), 0x94);
        assert_eq!(rx_gain_value(RxGain::Boosted), 0x96);
    }
}
