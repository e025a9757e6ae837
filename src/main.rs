//! lora-relay: SX126x LoRa link and flood relay for Linux hosts
//!
//! Drives an SX126x over spidev and two gpiochip lines (reset and busy),
//! then runs the selected plain-link or flood-mesh operation until it
//! finishes or Ctrl-C is pressed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::Colorize;
use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{CdevPin, Delay, SpidevDevice};
use tracing_subscriber::filter::LevelFilter;

use lora_relay::commands::Request;
use lora_relay::config::{lora_pins, protocol, spi};
use lora_relay::dispatcher::{Dispatcher, Event, RunOptions};
use lora_relay::lora::{ControlPins, HeaderMode, LoraConfig, RxGain, RxStatus, Sx126x};
use lora_relay::protocol::Action;

type Radio = Sx126x<SpidevDevice, CdevPin, CdevPin, Delay>;

const CONSUMER: &str = "lora-relay";

#[derive(Parser)]
#[command(name = "lora-relay")]
#[command(about = "SX126x LoRa link and flood relay")]
struct Args {
    /// Protocol: plain-link (lora) or flood-mesh (meshtastic)
    #[arg(short, long)]
    protocol: String,

    /// Mode: receive, receive-listen, receive-continuous, transmit-message, transmit-broadcast
    #[arg(short, long)]
    mode: String,

    /// Message to transmit
    #[arg(short = 't', long)]
    message: Option<String>,

    /// Broadcast interval in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Node id used by the flood relay
    #[arg(long, default_value = protocol::NODE_ID)]
    node_id: String,

    /// Flood-mesh destination node ("*" for everyone)
    #[arg(long)]
    to: Option<String>,

    /// Flood-mesh hop budget
    #[arg(long)]
    ttl: Option<u8>,

    /// spidev device
    #[arg(long, default_value = spi::DEVICE)]
    spi: String,

    /// gpiochip holding the reset and busy lines
    #[arg(long, default_value = lora_pins::GPIO_CHIP)]
    gpio_chip: String,

    #[arg(long, default_value_t = lora_pins::NRST)]
    reset_line: u32,

    #[arg(long, default_value_t = lora_pins::BUSY)]
    busy_line: u32,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    // Reject bad selections before touching the hardware
    let request = Request {
        protocol: &args.protocol,
        mode: &args.mode,
        message: args.message.as_deref(),
        interval: args.interval,
        destination: args.to.as_deref(),
        ttl: args.ttl,
    };
    let operation = request.resolve().context("Invalid argument")?;

    let config = LoraConfig::default();
    let mut radio = open_radio(&args, &config)?;

    println!("Begin LoRa radio");
    radio.begin().context("Something wrong, can't begin LoRa radio")?;
    print_configuration(&config);
    radio.configure(&config).context("Failed to configure LoRa radio")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let dispatcher = Dispatcher::new(RunOptions {
        node_id: args.node_id.clone(),
        ..RunOptions::default()
    });
    let result = dispatcher.dispatch(&mut radio, &operation, &running, print_event);

    let _parts = radio.shutdown();
    result.context("Operation failed")?;
    Ok(())
}

/// Open spidev and the control lines and wrap them in a radio session
fn open_radio(args: &Args, config: &LoraConfig) -> Result<Radio> {
    let mut bus = SpidevDevice::open(&args.spi).map_err(|e| anyhow!("Failed to open {}: {:?}", args.spi, e))?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(spi::SPEED_HZ)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    bus.configure(&options)
        .with_context(|| format!("Failed to configure {}", args.spi))?;

    let mut chip = Chip::new(&args.gpio_chip).with_context(|| format!("Failed to open {}", args.gpio_chip))?;
    let nrst = chip
        .get_line(args.reset_line)
        .and_then(|line| line.request(LineRequestFlags::OUTPUT, 1, CONSUMER))
        .and_then(CdevPin::new)
        .with_context(|| format!("Failed to request reset line {}", args.reset_line))?;
    let busy = chip
        .get_line(args.busy_line)
        .and_then(|line| line.request(LineRequestFlags::INPUT, 0, CONSUMER))
        .and_then(CdevPin::new)
        .with_context(|| format!("Failed to request busy line {}", args.busy_line))?;

    Ok(Sx126x::from_parts(bus, ControlPins { nrst, busy }, Delay)
        .with_power_profile(config.power_profile)
        .with_dio2_rf_switch(config.dio2_rf_switch))
}

fn print_configuration(config: &LoraConfig) {
    if config.tcxo.is_some() {
        println!("Set RF module to use TCXO as clock reference");
    }
    println!("Set frequency to {} Mhz", f64::from(config.frequency_hz) / 1_000_000.0);
    println!("Set TX power to {:+} dBm", config.tx_power_dbm);
    let gain = match config.rx_gain {
        RxGain::PowerSaving => "power saving",
        RxGain::Boosted => "boosted",
    };
    println!("Set RX gain to {} gain", gain);
    println!(
        "Set modulation parameters:\n\tSpreading factor = {}\n\tBandwidth = {} kHz\n\tCoding rate = 4/{}",
        config.spreading_factor,
        f64::from(config.bandwidth_hz) / 1_000.0,
        config.coding_rate
    );
    let header = match config.header_mode {
        HeaderMode::Explicit => "Explicit",
        HeaderMode::Implicit => "Implicit",
    };
    println!(
        "Set packet parameters:\n\t{} header type\n\tPreamble length = {}\n\tPayload Length = {}\n\tCRC {}",
        header, config.preamble_length, config.max_payload, config.crc_enabled
    );
    println!("Set syncronize word to 0x{:04X}", config.sync_word);
}

fn print_event(event: Event) {
    match event {
        Event::Started(title) => println!("\n-- {} --\n", title.bold()),
        Event::PlainReceived(reception) => {
            println!("{}  {}", reception.frame.message, reception.frame.counter);
            println!(
                "Packet status: RSSI = {:.2} dBm | SNR = {:.2} dB",
                reception.metrics.rssi_dbm, reception.metrics.snr_db
            );
            match reception.status {
                RxStatus::CrcError => println!("{}", "CRC error".red()),
                RxStatus::HeaderError => println!("{}", "Packet header error".red()),
                RxStatus::Ok => {}
            }
        }
        Event::PlainSent {
            message,
            counter,
            report,
        } => {
            match counter {
                Some(counter) => println!("{}  {}", message, counter),
                None => println!("{}", message),
            }
            println!(
                "Transmit time: {:.2} ms | Data rate: {:.2} byte/s",
                report.transmit_time_ms(),
                report.data_rate()
            );
        }
        Event::MeshSent { json, .. } => println!("{} {}", "Sent:".green(), json),
        Event::MeshReceived { envelope, action } => {
            println!(
                "Received from {} -> to {}: {} (TTL: {}, seq: {}, time: {})",
                envelope.sender, envelope.destination, envelope.payload, envelope.ttl, envelope.seq, envelope.timestamp
            );
            if action == Action::Drop {
                println!("{}", "Dropped: no hops left".yellow());
            }
        }
        Event::MeshForwarded { json, .. } => println!("{} {}", "Forwarding message:".cyan(), json),
        Event::NonProtocol(text) => println!("{} {}", "Received non-envelope message:".yellow(), text),
    }
}
