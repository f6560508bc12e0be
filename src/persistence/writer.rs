//! Retained writer
//!
//! Owns the in-memory retained set and is the only path that mutates it or
//! calls [`RetainedStore::save_all`]. Concurrency and durability notes:
//! - Every mutation happens under one lock, and the save it triggers is
//!   issued before that lock is released, so saves are ordered exactly like
//!   the mutations that caused them.
//! - `Sync` mode saves inline: when `merge` returns, the new state is on
//!   disk (or the failure has been recorded). Retries and backoff run while
//!   the lock is held, so other retained publishes wait behind a slow disk.
//! - `Deferred` mode hands a generation-numbered snapshot to one background
//!   writer thread, which only ever saves the newest snapshot it has. The
//!   in-memory set is authoritative until the next successful flush; a crash
//!   in between loses the mutations made since that flush.
//! - A save that still fails after the configured attempts keeps the state in
//!   memory and marks durability as degraded until a later save succeeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

use crate::broker::message::Message;
use crate::persistence::retained::{RetainedSet, RetainedStore};
use crate::utils::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    #[default]
    Sync,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavePolicy {
    /// Total tries per save, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
}

impl Default for SavePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterOptions {
    pub mode: SaveMode,
    pub policy: SavePolicy,
    /// Start with an empty set instead of failing when the record is corrupt.
    pub start_empty_on_corrupt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurabilityStatus {
    /// The last save attempt failed; memory holds state the store does not.
    pub degraded: bool,
    /// Saves that failed after all retries, since startup.
    pub failed_saves: u64,
    pub last_error: Option<String>,
}

/// What happened to a retained mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainUpdate {
    /// The set already looked like this; nothing was saved.
    Unchanged,
    Saved,
    /// Handed to the background writer.
    Queued,
    /// Kept in memory only; the save failed.
    Degraded,
}

#[derive(Default)]
struct Health {
    degraded: AtomicBool,
    failed_saves: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Health {
    fn record_success(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("Retained state is durable again");
        }
    }

    fn record_failure(&self, err: &Error) {
        self.degraded.store(true, Ordering::SeqCst);
        self.failed_saves.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock() = Some(err.to_string());
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn status(&self) -> DurabilityStatus {
        DurabilityStatus {
            degraded: self.degraded.load(Ordering::SeqCst),
            failed_saves: self.failed_saves.load(Ordering::SeqCst),
            last_error: self.last_error.lock().clone(),
        }
    }
}

fn save_with_retry(
    store: &dyn RetainedStore,
    set: &RetainedSet,
    policy: SavePolicy,
    health: &Health,
) -> bool {
    let attempts = policy.attempts.max(1);
    let mut delay = policy.backoff;

    for attempt in 1..=attempts {
        match store.save_all(set) {
            Ok(()) => {
                health.record_success();
                return true;
            }
            Err(err) if attempt < attempts => {
                warn!(
                    store = %store.describe(),
                    attempt,
                    error = %err,
                    "Retained save failed, retrying"
                );
                thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
            Err(err) => {
                error!(
                    store = %store.describe(),
                    attempts,
                    count = set.len(),
                    error = %err,
                    "Retained save failed, state kept in memory only"
                );
                health.record_failure(&err);
            }
        }
    }
    false
}

type Snapshot = (u64, RetainedSet);

struct Progress {
    flushed: Mutex<u64>,
    cond: Condvar,
}

struct Flusher {
    tx: Mutex<Option<UnboundedSender<Snapshot>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    progress: Arc<Progress>,
}

impl Flusher {
    fn spawn(store: Arc<dyn RetainedStore>, policy: SavePolicy, health: Arc<Health>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let progress = Arc::new(Progress {
            flushed: Mutex::new(0),
            cond: Condvar::new(),
        });

        let worker_progress = progress.clone();
        let spawned = thread::Builder::new()
            .name("retained-writer".to_string())
            .spawn(move || run_writer(rx, store, policy, health, worker_progress));

        match spawned {
            Ok(handle) => Self {
                tx: Mutex::new(Some(tx)),
                handle: Mutex::new(Some(handle)),
                progress,
            },
            Err(e) => {
                error!(error = %e, "Could not start retained writer thread, saving inline");
                Self {
                    tx: Mutex::new(None),
                    handle: Mutex::new(None),
                    progress,
                }
            }
        }
    }

    /// False when the writer is gone and the caller must save itself.
    fn submit(&self, generation: u64, set: RetainedSet) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send((generation, set)).is_ok(),
            None => false,
        }
    }

    fn is_stopped(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_none_or(|handle| handle.is_finished())
    }

    fn wait_for(&self, generation: u64) {
        let mut flushed = self.progress.flushed.lock();
        while *flushed < generation {
            let timed_out = self
                .progress
                .cond
                .wait_for(&mut flushed, Duration::from_millis(100))
                .timed_out();
            if timed_out && self.is_stopped() {
                break;
            }
        }
    }

    fn stop(&self) {
        // Dropping the sender lets the worker drain what is queued and exit.
        drop(self.tx.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Retained writer thread panicked");
            }
        }
    }
}

fn run_writer(
    mut rx: UnboundedReceiver<Snapshot>,
    store: Arc<dyn RetainedStore>,
    policy: SavePolicy,
    health: Arc<Health>,
    progress: Arc<Progress>,
) {
    while let Some((mut generation, mut set)) = rx.blocking_recv() {
        // Only the newest queued state is worth writing.
        while let Ok((newer_generation, newer_set)) = rx.try_recv() {
            generation = newer_generation;
            set = newer_set;
        }
        save_with_retry(store.as_ref(), &set, policy, &health);

        let mut flushed = progress.flushed.lock();
        *flushed = generation;
        progress.cond.notify_all();
    }
}

struct State {
    set: RetainedSet,
    generation: u64,
}

pub struct RetainedWriter {
    state: Mutex<State>,
    store: Arc<dyn RetainedStore>,
    mode: SaveMode,
    policy: SavePolicy,
    health: Arc<Health>,
    flusher: Option<Flusher>,
}

impl RetainedWriter {
    /// Loads the store and takes ownership of the retained set.
    ///
    /// A corrupt record is fatal unless `start_empty_on_corrupt` is set.
    pub fn open(store: Arc<dyn RetainedStore>, options: WriterOptions) -> Result<Self> {
        let set = match store.load() {
            Ok(set) => {
                info!(store = %store.describe(), count = set.len(), "Retained messages loaded");
                set
            }
            Err(err) if err.is_corrupt_state() && options.start_empty_on_corrupt => {
                warn!(
                    store = %store.describe(),
                    error = %err,
                    "Retained record is corrupt, starting empty as configured; it will be overwritten on the next save"
                );
                RetainedSet::new()
            }
            Err(err) => return Err(err),
        };
        Ok(Self::with_set(store, set, options))
    }

    /// Uses `set` as the starting state without reading the store.
    pub fn with_set(store: Arc<dyn RetainedStore>, set: RetainedSet, options: WriterOptions) -> Self {
        let health = Arc::new(Health::default());
        let flusher = match options.mode {
            SaveMode::Sync => None,
            SaveMode::Deferred => Some(Flusher::spawn(store.clone(), options.policy, health.clone())),
        };
        Self {
            state: Mutex::new(State { set, generation: 0 }),
            store,
            mode: options.mode,
            policy: options.policy,
            health,
            flusher,
        }
    }

    /// Applies a retained publish. An unchanged set is still saved while
    /// durability is degraded, so repeating a publish retries the save.
    pub fn merge(&self, message: Message) -> RetainUpdate {
        let mut state = self.state.lock();
        let changed = state.set.merge(message);
        if !changed && !self.health.is_degraded() {
            return RetainUpdate::Unchanged;
        }
        self.commit(&mut state)
    }

    pub fn remove(&self, topic: &str) -> RetainUpdate {
        let mut state = self.state.lock();
        let changed = state.set.remove(topic).is_some();
        if !changed && !self.health.is_degraded() {
            return RetainUpdate::Unchanged;
        }
        self.commit(&mut state)
    }

    // Runs with the state lock held.
    fn commit(&self, state: &mut State) -> RetainUpdate {
        state.generation += 1;
        if let Some(flusher) = &self.flusher {
            if flusher.submit(state.generation, state.set.clone()) {
                return RetainUpdate::Queued;
            }
        }
        if save_with_retry(self.store.as_ref(), &state.set, self.policy, &self.health) {
            RetainUpdate::Saved
        } else {
            RetainUpdate::Degraded
        }
    }

    pub fn get(&self, topic: &str) -> Option<Message> {
        self.state.lock().set.get(topic).cloned()
    }

    pub fn snapshot(&self) -> RetainedSet {
        self.state.lock().set.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().set.is_empty()
    }

    pub fn mode(&self) -> SaveMode {
        self.mode
    }

    pub fn status(&self) -> DurabilityStatus {
        self.health.status()
    }

    /// Blocks until every mutation made so far has gone through a save
    /// attempt. Returns immediately in `Sync` mode.
    pub fn flush(&self) {
        if let Some(flusher) = &self.flusher {
            let target = self.state.lock().generation;
            flusher.wait_for(target);
        }
    }

    /// Drains pending saves and stops the background writer. Later mutations
    /// are saved inline.
    pub fn close(&self) {
        if let Some(flusher) = &self.flusher {
            // Mutations wait here until the worker is gone, so an inline save
            // never overlaps the last background one.
            let _state = self.state.lock();
            flusher.stop();
        }
    }
}

impl Drop for RetainedWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RetainedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetainedWriter")
            .field("store", &self.store.describe())
            .field("mode", &self.mode)
            .field("count", &self.len())
            .field("status", &self.status())
            .finish()
    }
}
