//! Telemetry sinks.
//!
//! `FmtSink` writes lines straight to a serial writer. `ChannelSink` publishes
//! events on `TELEMETRY_CHANNEL` so another task can forward them.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use super::Telemetry;

/// Channel carrying telemetry events to whoever forwards them.
pub static TELEMETRY_CHANNEL: embassy_sync::channel::Channel<CriticalSectionRawMutex, Telemetry, 16> =
    embassy_sync::channel::Channel::new();

/// Destination for telemetry events.
pub trait TelemetrySink {
    fn emit(
        &mut self,
        event: &Telemetry,
    );
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for &mut S {
    fn emit(
        &mut self,
        event: &Telemetry,
    ) {
        (**self).emit(event)
    }
}

/// Writes each event's serial line to a `core::fmt::Write`.
pub struct FmtSink<W> {
    writer: W,
}

impl<W: Write> FmtSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TelemetrySink for FmtSink<W> {
    fn emit(
        &mut self,
        event: &Telemetry,
    ) {
        if write!(self.writer, "{event}").is_err() {
            tracing::warn!(?event, "telemetry write failed");
        }
    }
}

/// Publishes events on `TELEMETRY_CHANNEL` without blocking.
///
/// The channel holds 16 events. Something else has to drain it while the
/// controller runs (another task, or the caller between `step()`s); events
/// are dropped, with a warning, while it is full.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelSink;

impl TelemetrySink for ChannelSink {
    fn emit(
        &mut self,
        event: &Telemetry,
    ) {
        if TELEMETRY_CHANNEL.try_send(*event).is_err() {
            tracing::warn!(?event, "telemetry channel full, event dropped");
        }
    }
}
