//! Operation dispatcher
//!
//! Runs the loop behind each [`Operation`] against any [`LoraRadio`] and
//! reports what happened as [`Event`]s, leaving presentation to the caller.
//! Every loop checks the shared `running` flag between iterations.

use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::commands::types::Operation;
use crate::config::{protocol, timing};
use crate::lora::traits::{LoraError, LoraRadio, RxMode, RxStatus, SignalMetrics, TxReport};
use crate::protocol::envelope::{self, Envelope, EnvelopeError};
use crate::protocol::framing::{self, PlainFrame};
use crate::protocol::relay::{self, Action};

/// Longest single sleep while waiting out an interval
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Errors that end an operation
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("radio error: {0}")]
    Radio(#[from] LoraError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Timing and identity used by the operation loops
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Local node id for the flood relay
    pub node_id: String,
    /// Deadline for TX done
    pub tx_timeout: Duration,
    /// Host-side bound on one receive or listen window
    pub rx_timeout: Duration,
    pub listen_rx_ms: u32,
    pub listen_sleep_ms: u32,
    /// Stale bytes are drained for this long before receiving
    pub flush: Duration,
    /// Pause between polls while idle
    pub idle_poll: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            node_id: protocol::NODE_ID.to_owned(),
            tx_timeout: Duration::from_millis(timing::TX_DONE_TIMEOUT_MS),
            rx_timeout: Duration::from_millis(timing::RX_WAIT_TIMEOUT_MS),
            listen_rx_ms: timing::LISTEN_RX_WINDOW_MS,
            listen_sleep_ms: timing::LISTEN_SLEEP_WINDOW_MS,
            flush: Duration::from_millis(timing::RX_FLUSH_MS),
            idle_poll: Duration::from_millis(timing::RX_IDLE_POLL_MS),
        }
    }
}

/// Plain-link frame with its reception quality
#[derive(Debug, Clone, PartialEq)]
pub struct PlainReception {
    pub frame: PlainFrame,
    pub metrics: SignalMetrics,
    pub status: RxStatus,
}

/// Something the operator should see
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A loop is starting
    Started(&'static str),
    PlainReceived(PlainReception),
    PlainSent {
        message: String,
        counter: Option<u8>,
        report: TxReport,
    },
    MeshSent {
        json: String,
        report: TxReport,
    },
    MeshReceived {
        envelope: Envelope,
        action: Action,
    },
    MeshForwarded {
        json: String,
        report: TxReport,
    },
    /// Bytes that did not parse as an envelope
    NonProtocol(String),
}

/// Runs operations against a radio
pub struct Dispatcher {
    options: RunOptions,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Run `operation` until it finishes or `running` is cleared
    pub fn dispatch<R, F>(
        &self,
        radio: &mut R,
        operation: &Operation,
        running: &AtomicBool,
        mut emit: F,
    ) -> Result<(), DispatchError>
    where
        R: LoraRadio,
        F: FnMut(Event),
    {
        log::debug!("dispatching {} {}", operation.protocol(), operation.mode());

        if operation.is_receiver() {
            let drained = self.flush_rx(radio, running)?;
            if drained > 0 {
                log::debug!("flushed {} stale bytes", drained);
            }
        }

        match operation {
            Operation::PlainReceive => {
                emit(Event::Started("LoRa Receiver"));
                while running.load(Ordering::Relaxed) {
                    if let Some(reception) = self.receive_plain_once(radio)? {
                        emit(Event::PlainReceived(reception));
                    }
                }
            }
            Operation::PlainReceiveListen => {
                emit(Event::Started("LoRa Receiver Listen"));
                while running.load(Ordering::Relaxed) {
                    if let Some(reception) = self.listen_plain_once(radio)? {
                        emit(Event::PlainReceived(reception));
                    }
                }
            }
            Operation::PlainReceiveContinuous => {
                emit(Event::Started("LoRa Receiver Continuous"));
                radio.request_reception(RxMode::Continuous)?;
                while running.load(Ordering::Relaxed) {
                    match self.poll_plain(radio)? {
                        Some(reception) => emit(Event::PlainReceived(reception)),
                        None => std::thread::sleep(self.options.idle_poll),
                    }
                }
            }
            Operation::PlainTransmitMessage { message } => {
                emit(Event::Started("LoRa Transmitter"));
                let report = self.transmit_plain(radio, message, None)?;
                emit(Event::PlainSent {
                    message: message.clone(),
                    counter: None,
                    report,
                });
            }
            Operation::PlainTransmitBroadcast { message, interval } => {
                emit(Event::Started("LoRa Transmitter Broadcast"));
                let mut counter: u8 = 0;
                while running.load(Ordering::Relaxed) {
                    let report = self.transmit_plain(radio, message, Some(counter))?;
                    emit(Event::PlainSent {
                        message: message.clone(),
                        counter: Some(counter),
                        report,
                    });
                    self.pause(*interval, running);
                    counter = framing::next_counter(counter);
                }
            }
            Operation::MeshTransmitMessage {
                payload,
                destination,
                ttl,
            } => {
                let envelope = envelope::build_envelope(&self.options.node_id, destination, payload, *ttl, None);
                let (json, report) = self.transmit_json(radio, &envelope::serialize(&envelope)?)?;
                emit(Event::MeshSent { json, report });
            }
            Operation::MeshReceiveContinuous => {
                emit(Event::Started("Mesh Node Receiver Continuous"));
                radio.request_reception(RxMode::Continuous)?;
                while running.load(Ordering::Relaxed) {
                    if !self.poll_mesh(radio, &mut emit)? {
                        std::thread::sleep(self.options.idle_poll);
                    }
                }
            }
        }

        Ok(())
    }

    /// Drain unread bytes for the configured flush time
    ///
    /// Returns the number of bytes discarded.
    pub fn flush_rx<R: LoraRadio>(&self, radio: &mut R, running: &AtomicBool) -> Result<usize, LoraError> {
        let started = Instant::now();
        let mut drained = 0;
        loop {
            while radio.available()? > 0 {
                radio.read()?;
                drained += 1;
            }
            if started.elapsed() >= self.options.flush || !running.load(Ordering::Relaxed) {
                return Ok(drained);
            }
            std::thread::sleep(self.options.idle_poll);
        }
    }

    /// Send one plain-link frame and wait for it to leave
    pub fn transmit_plain<R: LoraRadio>(
        &self,
        radio: &mut R,
        message: &str,
        counter: Option<u8>,
    ) -> Result<TxReport, LoraError> {
        let frame = framing::encode(message, counter)?;
        radio.transmit(&frame, self.options.tx_timeout)
    }

    /// One single-shot receive window
    pub fn receive_plain_once<R: LoraRadio>(&self, radio: &mut R) -> Result<Option<PlainReception>, LoraError> {
        radio.request_reception(RxMode::SingleShot)?;
        radio.wait_for_reception(self.options.rx_timeout)?;
        self.poll_plain(radio)
    }

    /// One duty-cycled listen window
    pub fn listen_plain_once<R: LoraRadio>(&self, radio: &mut R) -> Result<Option<PlainReception>, LoraError> {
        radio.listen(self.options.listen_rx_ms, self.options.listen_sleep_ms)?;
        radio.wait_for_reception(self.options.rx_timeout)?;
        self.poll_plain(radio)
    }

    /// Read out a completed plain-link reception, if any
    pub fn poll_plain<R: LoraRadio>(&self, radio: &mut R) -> Result<Option<PlainReception>, LoraError> {
        let count = radio.available()?;
        if count == 0 {
            return Ok(None);
        }
        let bytes = read_bytes(radio, count)?;

        let Some(frame) = framing::decode(&bytes) else {
            return Ok(None);
        };
        let metrics = radio.signal_metrics()?;
        let status = radio.status()?;
        match status {
            RxStatus::CrcError => log::warn!("CRC error on received frame"),
            RxStatus::HeaderError => log::warn!("header error on received frame"),
            RxStatus::Ok => {}
        }

        Ok(Some(PlainReception { frame, metrics, status }))
    }

    /// Read out and act on a completed flood-mesh reception, if any
    ///
    /// Returns `true` when something was received.
    pub fn poll_mesh<R, F>(&self, radio: &mut R, emit: &mut F) -> Result<bool, DispatchError>
    where
        R: LoraRadio,
        F: FnMut(Event),
    {
        let count = radio.available()?;
        if count == 0 {
            return Ok(false);
        }
        let bytes = read_bytes(radio, count)?;

        let envelope = match envelope::parse(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("{}", e);
                emit(Event::NonProtocol(String::from_utf8_lossy(&bytes).into_owned()));
                return Ok(true);
            }
        };

        let action = relay::on_receive(&envelope, &self.options.node_id);
        emit(Event::MeshReceived {
            envelope,
            action: action.clone(),
        });

        match action {
            Action::Forward(forward) => {
                let bytes = envelope::restamp(&bytes, forward.ttl)?;
                let (json, report) = self.transmit_json(radio, &bytes)?;
                emit(Event::MeshForwarded { json, report });
                // The transmission ended the receive window
                radio.request_reception(RxMode::Continuous)?;
            }
            Action::Drop => log::debug!("dropped envelope with no hops left"),
            Action::Deliver(_) => {}
        }
        Ok(true)
    }

    fn transmit_json<R: LoraRadio>(&self, radio: &mut R, bytes: &[u8]) -> Result<(String, TxReport), DispatchError> {
        let report = radio.transmit(bytes, self.options.tx_timeout)?;
        Ok((String::from_utf8_lossy(bytes).into_owned(), report))
    }

    /// Sleep for `duration` in slices, returning early once stopped
    fn pause(&self, duration: Duration, running: &AtomicBool) {
        let deadline = Instant::now() + duration;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Consume exactly `count` received bytes
///
/// Stops at the count taken up front so a packet completing mid-read is
/// left for the next poll.
fn read_bytes<R: LoraRadio>(radio: &mut R, count: usize) -> Result<Vec<u8>, LoraError> {
    (0..count).map(|_| radio.read()).collect()
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(RunOptions::default())
    }
}
