//! Step sequencer: binds grid cells to looping transport callbacks
//!
//! Each lit cell owns one scheduled callback at `column * step` into the
//! loop. When it fires, the note's gain is derived from how many cells are
//! lit in its column, and the pitch's voice pool plays the rendered slice.
//!
//! All grid, schedule and polyphony state sits behind one lock. API calls
//! and transport callbacks both take it, so a cell transition is never
//! observed half-done. Callbacks check that their handle is still live
//! before acting, which makes `clear` and `clear_all` final once they
//! return.
//!
//! Every bank build gets a watcher thread that waits for the renders
//! outside the lock and then swaps the new voice pool in. Builds are
//! numbered; a watcher whose build was superseded drops its bank.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use thiserror::Error;
use tonegrid_core::{
    codec, Cell, ConfigError, DecodeError, Grid, LoopTiming, Pitch, Scale, ScaleSpec,
    SequencerConfig, VolumeRange,
};
use tracing::{debug, error, info, warn};

use crate::context::{AudioContext, Playback, ScheduleHandle, Transport, TransportCallback};
use crate::sample_bank::{PendingBank, SampleBank, SampleBankBuilder};
use crate::voice_pool::{Trigger, VoicePool};

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Sample bank lifecycle as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankStatus {
    /// Renders outstanding. New notes are queued, due notes are skipped.
    Building,
    Ready,
}

enum BankState {
    Building,
    Ready(VoicePool),
}

struct State {
    grid: Grid,
    tonic: u8,
    scale_spec: ScaleSpec,
    scale: Scale,
    /// Live schedules, keyed by the transport's handle
    notes: HashMap<ScheduleHandle, Cell>,
    handles: HashMap<Cell, ScheduleHandle>,
    /// Scheduled notes per column
    polyphony: Vec<usize>,
    /// Cells turned on while the bank was building
    queued: Vec<Cell>,
    bank: BankState,
    /// Number of the newest bank build
    generation: u64,
    /// Set once the owning sequencer is dropped
    closed: bool,
}

impl State {
    fn status(&self) -> BankStatus {
        match self.bank {
            BankState::Building => BankStatus::Building,
            BankState::Ready(_) => BankStatus::Ready,
        }
    }
}

/// Everything transport callbacks and bank watchers need, shared with the
/// owning [`Sequencer`]
struct Shared {
    state: Mutex<State>,
    /// Signalled whenever a bank is adopted
    ready: Condvar,
    transport: Arc<dyn Transport>,
    playback: Arc<dyn Playback>,
    timing: LoopTiming,
    volume: VolumeRange,
    height: usize,
    num_voices: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            error!("Sequencer state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

pub struct Sequencer {
    shared: Arc<Shared>,
    context: AudioContext,
    builder: SampleBankBuilder,
    width: usize,
    height: usize,
    base_octave: i8,
    latency_secs: f64,
}

impl Sequencer {
    /// Validate `config`, resolve the scale and start building the sample
    /// bank in the background.
    pub fn new(config: &SequencerConfig, context: AudioContext) -> Result<Self, SequencerError> {
        config.validate()?;
        let timing = config.loop_timing()?;
        let volume = config.volume_range()?;
        let scale = config.resolve_scale()?;
        let grid = Grid::new(config.width, config.height)?;

        let transport_loop = context.transport.loop_length();
        if (transport_loop - timing.loop_secs()).abs() > 1e-3 {
            warn!(
                transport_loop,
                measure = timing.loop_secs(),
                "Transport loop differs from one measure at the configured tempo"
            );
        }

        let builder = SampleBankBuilder::new(context.renderer.clone(), config, &timing);
        let pending = builder.build(&scale);

        info!(
            width = config.width,
            height = config.height,
            tonic = config.tonic,
            scale = ?config.scale,
            "Sequencer created"
        );

        let state = State {
            grid,
            tonic: config.tonic,
            scale_spec: config.scale.clone(),
            scale,
            notes: HashMap::new(),
            handles: HashMap::new(),
            polyphony: vec![0; config.width],
            queued: Vec::new(),
            bank: BankState::Building,
            generation: 0,
            closed: false,
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            ready: Condvar::new(),
            transport: context.transport.clone(),
            playback: context.playback.clone(),
            timing,
            volume,
            height: config.height,
            num_voices: config.num_voices,
        });
        watch_build(&shared, pending, 0);

        Ok(Self {
            shared,
            context,
            builder,
            width: config.width,
            height: config.height,
            base_octave: config.base_octave,
            latency_secs: config.latency_secs,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.lock()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    // ------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------

    /// Turn a cell on or off. Repeating the current state is a no-op, as is
    /// any position outside the grid.
    pub fn set_cell(&self, column: usize, row: usize, on: bool) {
        let mut state = self.lock();
        set_cell_locked(&self.shared, &mut state, Cell::new(column, row), on);
    }

    /// Flip a cell, returning its new state
    pub fn toggle_cell(&self, column: usize, row: usize) -> bool {
        let mut state = self.lock();
        if !state.grid.contains(column, row) {
            return false;
        }
        let on = !state.grid.get(column, row);
        set_cell_locked(&self.shared, &mut state, Cell::new(column, row), on);
        on
    }

    pub fn cell_is_on(&self, column: usize, row: usize) -> bool {
        self.lock().grid.get(column, row)
    }

    /// Snapshot of the grid
    pub fn grid(&self) -> Grid {
        self.lock().grid.clone()
    }

    /// Cancel every schedule this sequencer owns and turn every cell off
    pub fn clear_all(&self) {
        let mut state = self.lock();
        clear_locked(&self.shared, &mut state);
    }

    // ------------------------------------------------------------------
    // Sample bank
    // ------------------------------------------------------------------

    /// Never blocks. The bank switches to ready on its own once every
    /// render has settled.
    pub fn bank_status(&self) -> BankStatus {
        self.lock().status()
    }

    /// Block until the newest sample bank is ready. The state lock is
    /// released while waiting, so cells and callbacks keep working.
    pub fn wait_until_ready(&self) {
        let mut state = self.lock();
        while state.status() == BankStatus::Building {
            state = self.shared.ready.wait(state).unwrap_or_else(|poisoned| {
                error!("Sequencer state lock poisoned, recovering");
                poisoned.into_inner()
            });
        }
    }

    // ------------------------------------------------------------------
    // Scale
    // ------------------------------------------------------------------

    pub fn tonic(&self) -> u8 {
        self.lock().tonic
    }

    pub fn scale_spec(&self) -> ScaleSpec {
        self.lock().scale_spec.clone()
    }

    pub fn scale(&self) -> Scale {
        self.lock().scale.clone()
    }

    pub fn pitch(&self, row: usize) -> Option<Pitch> {
        self.lock().scale.get(row)
    }

    /// Change the tonic and rebuild the sample bank. Cells stay scheduled.
    pub fn set_tonic(&self, tonic: u8) -> Result<(), SequencerError> {
        let spec = self.scale_spec();
        self.rescale(tonic, spec)
    }

    /// Change the scale and rebuild the sample bank. Cells stay scheduled.
    pub fn set_scale(&self, spec: ScaleSpec) -> Result<(), SequencerError> {
        let tonic = self.tonic();
        self.rescale(tonic, spec)
    }

    fn rescale(&self, tonic: u8, spec: ScaleSpec) -> Result<(), SequencerError> {
        let scale = Scale::from_spec(tonic, &spec, self.height, self.base_octave)?;
        let pending = self.builder.build(&scale);

        let generation = {
            let mut state = self.lock();
            state.tonic = tonic;
            state.scale_spec = spec;
            state.scale = scale;
            state.generation += 1;
            // Dropping the old pool releases its voices
            state.bank = BankState::Building;
            info!(tonic, scale = ?state.scale_spec, "Scale changed, rebuilding sample bank");
            state.generation
        };
        watch_build(&self.shared, pending, generation);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Playhead and counters
    // ------------------------------------------------------------------

    /// Column currently audible, for the display
    pub fn current_playhead_column(&self) -> usize {
        let transport = &self.context.transport;
        LoopTiming::new(self.width, transport.loop_length())
            .map(|t| t.playhead_column(transport.elapsed_seconds(), self.latency_secs))
            .unwrap_or(0)
    }

    /// Scheduled notes in a column
    pub fn polyphony(&self, column: usize) -> usize {
        self.lock().polyphony.get(column).copied().unwrap_or(0)
    }

    /// Live schedules owned by this sequencer
    pub fn scheduled_count(&self) -> usize {
        self.lock().notes.len()
    }

    /// Cells waiting for the sample bank
    pub fn queued_count(&self) -> usize {
        self.lock().queued.len()
    }

    // ------------------------------------------------------------------
    // Sharing
    // ------------------------------------------------------------------

    pub fn share_token(&self) -> String {
        codec::encode(&self.lock().grid)
    }

    pub fn share_url(&self, base: &str) -> String {
        codec::share_url(base, &self.share_token())
    }

    /// Replace the grid with a decoded token. A malformed token leaves the
    /// grid untouched.
    pub fn load_token(&self, token: &str) -> Result<(), SequencerError> {
        let mut state = self.lock();
        let decoded = codec::decode(token, &state.grid).inspect_err(|e| {
            warn!(error = %e, "Ignoring malformed grid token");
        })?;

        clear_locked(&self.shared, &mut state);
        let mut loaded = 0;
        for cell in decoded.active_cells() {
            set_cell_locked(&self.shared, &mut state, cell, true);
            loaded += 1;
        }
        info!(cells = loaded, "Grid loaded from token");
        Ok(())
    }

    /// Load the `d` parameter of a query string. No parameter means an
    /// empty grid.
    pub fn load_query(&self, query: &str) -> Result<(), SequencerError> {
        self.load_token(codec::token_from_query(query).unwrap_or(""))
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.closed = true;
        for handle in state.notes.keys() {
            self.shared.transport.clear(*handle);
        }
        state.bank = BankState::Building;
    }
}

fn set_cell_locked(shared: &Arc<Shared>, state: &mut State, cell: Cell, on: bool) {
    if !state.grid.contains(cell.column, cell.row) {
        debug!(column = cell.column, row = cell.row, "Ignoring out-of-range cell");
        return;
    }

    if on {
        if state.grid.set(cell.column, cell.row, true) == Some(true) {
            return;
        }
        if state.status() == BankStatus::Building {
            state.queued.push(cell);
            debug!(column = cell.column, row = cell.row, "Cell queued until sample bank is ready");
        } else {
            schedule(shared, state, cell);
        }
    } else {
        if state.grid.set(cell.column, cell.row, false) != Some(true) {
            return;
        }
        if let Some(i) = state.queued.iter().position(|&q| q == cell) {
            state.queued.swap_remove(i);
            return;
        }
        unschedule(shared, state, cell);
    }
}

fn schedule(shared: &Arc<Shared>, state: &mut State, cell: Cell) {
    let already = state.handles.contains_key(&cell);
    debug_assert!(!already, "cell {cell:?} scheduled twice");
    if already {
        error!(column = cell.column, row = cell.row, "Cell already scheduled, ignoring");
        return;
    }

    let time = shared.timing.column_start(cell.column);
    let handle = shared.transport.schedule(fire_callback(shared), time);
    state.notes.insert(handle, cell);
    state.handles.insert(cell, handle);
    state.polyphony[cell.column] += 1;

    debug!(
        column = cell.column,
        row = cell.row,
        %handle,
        polyphony = state.polyphony[cell.column],
        "Note scheduled"
    );
}

fn unschedule(shared: &Shared, state: &mut State, cell: Cell) {
    let Some(handle) = state.handles.remove(&cell) else {
        return;
    };
    shared.transport.clear(handle);
    state.notes.remove(&handle);

    let count = &mut state.polyphony[cell.column];
    debug_assert!(*count > 0, "polyphony underflow in column {}", cell.column);
    if *count == 0 {
        error!(column = cell.column, "Polyphony underflow, clamping at zero");
    } else {
        *count -= 1;
    }

    debug!(column = cell.column, row = cell.row, %handle, "Note unscheduled");
}

fn clear_locked(shared: &Shared, state: &mut State) {
    let cancelled = state.notes.len();
    for (handle, _) in state.notes.drain() {
        shared.transport.clear(handle);
    }
    state.handles.clear();
    state.polyphony.fill(0);
    state.queued.clear();
    state.grid.clear();
    info!(cancelled, "Grid cleared");
}

fn fire_callback(shared: &Arc<Shared>) -> TransportCallback {
    let shared = Arc::downgrade(shared);
    Arc::new(move |handle: ScheduleHandle, time: f64| {
        if let Some(shared) = shared.upgrade() {
            fire(&shared, handle, time);
        }
    })
}

/// Transport callback body. Skips handles cleared since they were collected.
fn fire(shared: &Shared, handle: ScheduleHandle, time: f64) {
    let mut guard = shared.lock();
    let state = &mut *guard;

    let Some(&cell) = state.notes.get(&handle) else {
        debug!(%handle, "Skipping callback for cleared note");
        return;
    };
    let polyphony = state.polyphony.get(cell.column).copied().unwrap_or(0);
    let gain_db = shared.volume.gain_db(polyphony, shared.height);

    match &mut state.bank {
        BankState::Ready(pool) => {
            if let Err(e) = pool.trigger(cell.row, Trigger::at(time, gain_db)) {
                warn!(column = cell.column, row = cell.row, error = %e, "Playback failed, skipping note");
            }
        }
        BankState::Building => {
            debug!(column = cell.column, row = cell.row, "Sample bank rebuilding, skipping note");
        }
    }
}

/// Wait for `pending` on its own thread, then adopt it unless a newer
/// build has started or the sequencer is gone
fn watch_build(shared: &Arc<Shared>, mut pending: PendingBank, generation: u64) {
    let shared = Arc::downgrade(shared);
    thread::spawn(move || {
        let bank = pending.wait();
        if let Some(shared) = shared.upgrade() {
            adopt(&shared, bank, generation);
        }
    });
}

fn adopt(shared: &Arc<Shared>, bank: SampleBank, generation: u64) {
    let mut guard = shared.lock();
    let state = &mut *guard;
    if state.closed {
        return;
    }
    if state.generation != generation {
        debug!(generation, newest = state.generation, "Dropping superseded sample bank");
        return;
    }

    let playable = bank.playable_count();
    let total = bank.len();
    let pool = VoicePool::new(bank, shared.playback.clone(), shared.num_voices);
    state.bank = BankState::Ready(pool);
    info!(playable, total, queued = state.queued.len(), "Sample bank ready");

    for cell in mem::take(&mut state.queued) {
        if state.grid.get(cell.column, cell.row) && !state.handles.contains_key(&cell) {
            schedule(shared, state, cell);
        }
    }
    shared.ready.notify_all();
}
