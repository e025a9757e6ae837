//! SX126x LoRa driver with a plain-link protocol and a flood relay overlay
//!
//! The driver talks to the chip through `embedded-hal` 1.0 traits, so it runs
//! on any host that provides a blocking SPI device, a reset line, a busy line
//! and a delay.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod lora;
pub mod protocol;
