//! Sample Bank: one pre-rendered slice per scale pitch
//!
//! Rendering runs on worker threads and reports back over a channel. A
//! [`PendingBank`] collects the results and only yields a [`SampleBank`]
//! once every pitch has settled, successfully or not.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tonegrid_core::{BankLayout, InstrumentConfig, LoopTiming, Pitch, Scale, SequencerConfig};
use tracing::{debug, info, warn};

use crate::context::{NoteTrigger, RenderError, RenderedBuffer, Renderer};

/// Playable region of a rendered buffer, in seconds
#[derive(Debug, Clone)]
pub struct SampleSlice {
    buffer: Arc<RenderedBuffer>,
    offset: f64,
    duration: f64,
}

impl SampleSlice {
    pub fn new(buffer: Arc<RenderedBuffer>, offset: f64, duration: f64) -> Self {
        Self {
            buffer,
            offset,
            duration,
        }
    }

    pub fn buffer(&self) -> &Arc<RenderedBuffer> {
        &self.buffer
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }
}

/// Settled render results, indexed like the scale (row 0 = highest pitch)
#[derive(Debug, Clone, Default)]
pub struct SampleBank {
    slices: Vec<Result<SampleSlice, RenderError>>,
}

impl SampleBank {
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// None when the row failed to render or is out of range
    pub fn slice(&self, row: usize) -> Option<&SampleSlice> {
        self.slices.get(row).and_then(|s| s.as_ref().ok())
    }

    pub fn error(&self, row: usize) -> Option<&RenderError> {
        self.slices.get(row).and_then(|s| s.as_ref().err())
    }

    pub fn playable_count(&self) -> usize {
        self.slices.iter().filter(|s| s.is_ok()).count()
    }

    pub(crate) fn into_slices(self) -> Vec<Result<SampleSlice, RenderError>> {
        self.slices
    }
}

type RenderOutcome = (usize, Result<SampleSlice, RenderError>);

/// Renders a [`Scale`] into a [`SampleBank`]
#[derive(Clone)]
pub struct SampleBankBuilder {
    renderer: Arc<dyn Renderer>,
    instrument: InstrumentConfig,
    layout: BankLayout,
    step_secs: f64,
    slot_secs: f64,
}

impl SampleBankBuilder {
    pub fn new(renderer: Arc<dyn Renderer>, config: &SequencerConfig, timing: &LoopTiming) -> Self {
        let step_secs = timing.step_secs();
        Self {
            renderer,
            instrument: config.instrument.clone(),
            layout: config.layout,
            step_secs,
            slot_secs: step_secs * config.slot_steps.max(1) as f64,
        }
    }

    /// Length each note is held inside the render
    pub fn step_secs(&self) -> f64 {
        self.step_secs
    }

    /// Length of each rendered slice, including any release tail
    pub fn slot_secs(&self) -> f64 {
        self.slot_secs
    }

    pub fn layout(&self) -> BankLayout {
        self.layout
    }

    /// Start rendering every pitch of `scale` in the background
    pub fn build(&self, scale: &Scale) -> PendingBank {
        let (tx, rx) = unbounded();
        let pitches = scale.pitches().to_vec();

        info!(
            pitches = pitches.len(),
            layout = ?self.layout,
            slot_secs = self.slot_secs,
            "Building sample bank"
        );

        match self.layout {
            BankLayout::PerPitch => {
                for (row, &pitch) in pitches.iter().enumerate() {
                    self.spawn_single(row, pitch, tx.clone());
                }
            }
            BankLayout::Packed => self.spawn_packed(pitches.clone(), tx),
        }

        PendingBank::new(rx, pitches.len())
    }

    fn spawn_single(&self, row: usize, pitch: Pitch, tx: Sender<RenderOutcome>) {
        let renderer = self.renderer.clone();
        let instrument = self.instrument.clone();
        let (step, slot) = (self.step_secs, self.slot_secs);

        thread::spawn(move || {
            let triggers = [NoteTrigger {
                pitch,
                time: 0.0,
                duration: step,
            }];
            let result = renderer
                .render_offline(&instrument, &triggers, slot)
                .and_then(|buffer| check_length(buffer, slot))
                .map(|buffer| SampleSlice::new(Arc::new(buffer), 0.0, slot));
            debug!(row, %pitch, ok = result.is_ok(), "Pitch rendered");
            let _ = tx.send((row, result));
        });
    }

    fn spawn_packed(&self, pitches: Vec<Pitch>, tx: Sender<RenderOutcome>) {
        let renderer = self.renderer.clone();
        let instrument = self.instrument.clone();
        let (step, slot) = (self.step_secs, self.slot_secs);

        thread::spawn(move || {
            let triggers: Vec<NoteTrigger> = pitches
                .iter()
                .enumerate()
                .map(|(i, &pitch)| NoteTrigger {
                    pitch,
                    time: i as f64 * slot,
                    duration: step,
                })
                .collect();
            let total = slot * pitches.len() as f64;

            match renderer
                .render_offline(&instrument, &triggers, total)
                .and_then(|buffer| check_length(buffer, total))
            {
                Ok(buffer) => {
                    let buffer = Arc::new(buffer);
                    for row in 0..pitches.len() {
                        let slice = SampleSlice::new(buffer.clone(), row as f64 * slot, slot);
                        let _ = tx.send((row, Ok(slice)));
                    }
                }
                Err(e) => {
                    for row in 0..pitches.len() {
                        let _ = tx.send((row, Err(e.clone())));
                    }
                }
            }
        });
    }
}

/// Reject buffers that stop short of the requested length. One frame of
/// rounding slack is allowed.
fn check_length(buffer: RenderedBuffer, total_secs: f64) -> Result<RenderedBuffer, RenderError> {
    if buffer.sample_rate == 0 {
        return Err(RenderError::Collaborator("zero sample rate".into()));
    }
    let expected = buffer.secs_to_frames(total_secs);
    if buffer.frames() + 1 < expected {
        return Err(RenderError::TooShort {
            expected,
            actual: buffer.frames(),
        });
    }
    Ok(buffer)
}

/// A sample bank still being rendered
pub struct PendingBank {
    rx: Receiver<RenderOutcome>,
    slots: Vec<Option<Result<SampleSlice, RenderError>>>,
    outstanding: usize,
}

impl PendingBank {
    fn new(rx: Receiver<RenderOutcome>, len: usize) -> Self {
        Self {
            rx,
            slots: vec![None; len],
            outstanding: len,
        }
    }

    /// Pitches still waiting on a render
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_settled(&self) -> bool {
        self.outstanding == 0
    }

    /// Collect finished renders without blocking. Yields the bank once
    /// every pitch has settled.
    pub fn poll(&mut self) -> Option<SampleBank> {
        while !self.is_settled() {
            match self.rx.try_recv() {
                Ok(outcome) => self.record(outcome),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.abandon(),
            }
        }
        self.is_settled().then(|| self.take_bank())
    }

    /// Block until every pitch has settled
    pub fn wait(&mut self) -> SampleBank {
        while !self.is_settled() {
            match self.rx.recv() {
                Ok(outcome) => self.record(outcome),
                Err(_) => self.abandon(),
            }
        }
        self.take_bank()
    }

    fn record(&mut self, (row, result): RenderOutcome) {
        let Some(slot) = self.slots.get_mut(row) else {
            return;
        };
        if slot.is_none() {
            self.outstanding -= 1;
        }
        if let Err(e) = &result {
            warn!(row, error = %e, "Render failed, row will stay silent");
        }
        *slot = Some(result);
    }

    /// Every worker is gone; whatever has not reported never will
    fn abandon(&mut self) {
        let mut lost = 0;
        for slot in self.slots.iter_mut().filter(|s| s.is_none()) {
            *slot = Some(Err(RenderError::WorkerLost));
            lost += 1;
        }
        if lost > 0 {
            warn!(lost, "Render workers exited without reporting");
        }
        self.outstanding = 0;
    }

    fn take_bank(&mut self) -> SampleBank {
        let slices = self
            .slots
            .iter_mut()
            .map(|s| s.take().unwrap_or(Err(RenderError::WorkerLost)))
            .collect();
        SampleBank { slices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRenderer;
    use tonegrid_core::ScaleMode;

    const RATE: u32 = 8000;

    fn scale(height: usize) -> Scale {
        Scale::resolve(0, ScaleMode::SuspendedPentatonic.intervals(), height, 3).unwrap()
    }

    fn builder(renderer: Arc<FakeRenderer>, layout: BankLayout, slot_steps: usize) -> SampleBankBuilder {
        let config = SequencerConfig {
            layout,
            slot_steps,
            ..Default::default()
        };
        let timing = config.loop_timing().unwrap();
        SampleBankBuilder::new(renderer, &config, &timing)
    }

    #[test]
    fn test_per_pitch_slices_are_one_step_long() {
        let renderer = Arc::new(FakeRenderer::new(RATE));
        let bank = builder(renderer.clone(), BankLayout::PerPitch, 1)
            .build(&scale(6))
            .wait();

        assert_eq!(bank.len(), 6);
        assert_eq!(bank.playable_count(), 6);
        for row in 0..6 {
            let slice = bank.slice(row).unwrap();
            assert_eq!(slice.offset(), 0.0);
            assert_eq!(slice.duration(), 0.125);
            assert_eq!(slice.buffer().frames(), 1000);
        }
        assert_eq!(renderer.render_count(), 6);
    }

    #[test]
    fn test_slice_matches_scale_pitch() {
        let renderer = Arc::new(FakeRenderer::new(RATE));
        let scale = scale(6);
        let bank = builder(renderer, BankLayout::PerPitch, 1).build(&scale).wait();

        for (row, pitch) in scale.pitches().iter().enumerate() {
            let slice = bank.slice(row).unwrap();
            assert_eq!(slice.buffer().samples[0], FakeRenderer::level(pitch));
        }
    }

    #[test]
    fn test_packed_layout_offsets() {
        let renderer = Arc::new(FakeRenderer::new(RATE));
        let scale = scale(5);
        let bank = builder(renderer.clone(), BankLayout::Packed, 2).build(&scale).wait();

        assert_eq!(renderer.render_count(), 1);
        assert_eq!(bank.playable_count(), 5);
        let first = bank.slice(0).unwrap();
        for row in 0..5 {
            let slice = bank.slice(row).unwrap();
            assert!(Arc::ptr_eq(slice.buffer(), first.buffer()));
            assert_eq!(slice.duration(), 0.25);
            assert_eq!(slice.offset(), row as f64 * 0.25);

            // Note held for one step, silent for the rest of the slot
            let start = slice.buffer().secs_to_frames(slice.offset());
            let pitch = scale.get(row).unwrap();
            assert_eq!(slice.buffer().samples[start], FakeRenderer::level(&pitch));
            assert_eq!(slice.buffer().samples[start + 1500], 0.0);
        }
    }

    #[test]
    fn test_failed_pitch_is_silent_not_fatal() {
        let scale = scale(6);
        let failing = scale.get(2).unwrap();
        let renderer = Arc::new(FakeRenderer::new(RATE).failing(failing));
        let bank = builder(renderer, BankLayout::PerPitch, 1).build(&scale).wait();

        assert_eq!(bank.playable_count(), 5);
        assert!(bank.slice(2).is_none());
        assert!(matches!(bank.error(2), Some(RenderError::Collaborator(_))));
    }

    #[test]
    fn test_packed_failure_fails_every_row() {
        let scale = scale(4);
        let renderer = Arc::new(FakeRenderer::new(RATE).failing(scale.get(0).unwrap()));
        let bank = builder(renderer, BankLayout::Packed, 1).build(&scale).wait();
        assert_eq!(bank.playable_count(), 0);
        assert_eq!(bank.len(), 4);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let renderer = Arc::new(FakeRenderer::new(RATE).truncating(100));
        let bank = builder(renderer, BankLayout::PerPitch, 1).build(&scale(2)).wait();
        assert_eq!(
            bank.error(0),
            Some(&RenderError::TooShort {
                expected: 1000,
                actual: 900
            })
        );
    }

    #[test]
    fn test_poll_waits_for_every_pitch() {
        let (renderer, gate) = FakeRenderer::gated(RATE);
        let mut pending = builder(Arc::new(renderer), BankLayout::PerPitch, 1).build(&scale(4));

        assert!(pending.poll().is_none());
        assert_eq!(pending.outstanding(), 4);

        drop(gate);
        let bank = pending.wait();
        assert_eq!(bank.playable_count(), 4);
        assert!(pending.is_settled());
    }
}
