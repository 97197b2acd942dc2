//! Sample-clock looping transport

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tonegrid_core::LoopTiming;
use tracing::{debug, error, info};

use crate::context::{ScheduleHandle, Transport, TransportCallback};

struct Event {
    /// Offset into the loop, in frames
    offset: u64,
    callback: TransportCallback,
}

#[derive(Default)]
struct Clock {
    events: BTreeMap<ScheduleHandle, Event>,
    next_handle: u64,
    /// Frames played since start
    position: u64,
    /// Frames up to which callbacks have already fired
    fired_until: u64,
}

/// A loop of fixed length driven by [`advance`](LoopTransport::advance).
///
/// Every scheduled callback fires once per loop pass. With a non-zero
/// lookahead, callbacks fire that much ahead of their due time and are
/// given the exact due time so playback can be queued sample-accurately.
pub struct LoopTransport {
    clock: Mutex<Clock>,
    playing: AtomicBool,
    sample_rate: u32,
    loop_frames: u64,
    lookahead_frames: u64,
}

impl LoopTransport {
    pub fn new(timing: &LoopTiming, sample_rate: u32, lookahead_secs: f64) -> Self {
        let rate = sample_rate.max(1) as f64;
        let loop_frames = ((timing.loop_secs() * rate).round() as u64).max(1);
        let lookahead_frames = (lookahead_secs.max(0.0) * rate).round() as u64;
        Self {
            clock: Mutex::new(Clock::default()),
            playing: AtomicBool::new(false),
            sample_rate: sample_rate.max(1),
            loop_frames,
            lookahead_frames,
        }
    }

    fn clock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(|poisoned| {
            error!("Transport clock lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn loop_frames(&self) -> u64 {
        self.loop_frames
    }

    /// Frames played since the transport last started
    pub fn position(&self) -> u64 {
        self.clock().position
    }

    pub fn scheduled_count(&self) -> usize {
        self.clock().events.len()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        self.playing.store(true, Ordering::SeqCst);
        info!(loop_frames = self.loop_frames, "Transport started");
    }

    /// Stop and rewind. Scheduled callbacks are kept.
    pub fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
        let mut clock = self.clock();
        clock.position = 0;
        clock.fired_until = 0;
        info!("Transport stopped");
    }

    /// Move the clock forward by `frames`, firing every callback that falls
    /// due (plus lookahead) inside the window, in time order. Callbacks run
    /// after the clock lock is released. Does nothing while stopped.
    pub fn advance(&self, frames: u64) {
        if !self.is_playing() || frames == 0 {
            return;
        }

        let due = {
            let mut clock = self.clock();
            clock.position += frames;
            let start = clock.fired_until;
            let end = clock.position + self.lookahead_frames;
            clock.fired_until = end;

            let mut due: Vec<(u64, ScheduleHandle, TransportCallback)> = Vec::new();
            for (&handle, event) in &clock.events {
                let mut at = first_at_or_after(event.offset, start, self.loop_frames);
                while at < end {
                    due.push((at, handle, event.callback.clone()));
                    at += self.loop_frames;
                }
            }
            due.sort_by_key(|(at, handle, _)| (*at, *handle));
            due
        };

        for (at, handle, callback) in due {
            callback(handle, at as f64 / self.sample_rate as f64);
        }
    }
}

/// First frame `>= start` that lands on `offset` within a loop of `len`
fn first_at_or_after(offset: u64, start: u64, len: u64) -> u64 {
    if start <= offset {
        return offset;
    }
    let passes = (start - offset).div_ceil(len);
    offset + passes * len
}

impl Transport for LoopTransport {
    fn schedule(&self, callback: TransportCallback, time: f64) -> ScheduleHandle {
        let frame = (time.max(0.0) * self.sample_rate as f64).round() as u64;
        let offset = frame % self.loop_frames;

        let mut clock = self.clock();
        let handle = ScheduleHandle(clock.next_handle);
        clock.next_handle += 1;
        clock.events.insert(handle, Event { offset, callback });
        debug!(%handle, offset, "Callback scheduled");
        handle
    }

    fn clear(&self, handle: ScheduleHandle) {
        if self.clock().events.remove(&handle).is_some() {
            debug!(%handle, "Callback cleared");
        }
    }

    fn cancel_all(&self) {
        let mut clock = self.clock();
        let cancelled = clock.events.len();
        clock.events.clear();
        info!(cancelled, "All callbacks cancelled");
    }

    fn elapsed_seconds(&self) -> f64 {
        self.position() as f64 / self.sample_rate as f64
    }

    fn loop_length(&self) -> f64 {
        self.loop_frames as f64 / self.sample_rate as f64
    }
}
