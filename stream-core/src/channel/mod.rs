//! Channel lifecycle: maps external stream ids onto internal slots, each driven by a
//! supervised worker.

pub mod request;
pub mod slot;
mod task;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{
    decoder::DecoderFactory,
    error::{Error, Result},
    frame::StreamId,
    worker::{WorkerControl, WorkerState, spawn_worker},
};

pub use request::{ChannelRequest, LoopCount, SampleStrategy, SourceType};
pub use slot::SlotAllocator;
pub use task::ChannelOutput;

use task::ChannelWorker;

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartStatus {
    Started { stream_id: StreamId, slot: usize },
    /// The stream was already active; nothing was changed.
    AlreadyRunning { stream_id: StreamId, slot: usize },
}

impl StartStatus {
    pub fn slot(&self) -> usize {
        match self {
            StartStatus::Started { slot, .. } | StartStatus::AlreadyRunning { slot, .. } => *slot,
        }
    }

    /// For callers that want a second start to be an error.
    pub fn into_result(self) -> Result<usize> {
        match self {
            StartStatus::Started { slot, .. } => Ok(slot),
            StartStatus::AlreadyRunning { stream_id, .. } => Err(Error::AlreadyRunning(stream_id)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelStatus {
    pub stream_id: StreamId,
    pub slot: usize,
    pub state: WorkerState,
}

struct ChannelEntry {
    slot: usize,
    generation: u64,
    control: Arc<WorkerControl>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SlotTable {
    channels: HashMap<StreamId, ChannelEntry>,
    slots: SlotAllocator,
}

pub(crate) struct ManagerInner {
    table: Mutex<SlotTable>,
    decoders: Arc<dyn DecoderFactory>,
    output: ChannelOutput,
    start_timeout: Duration,
    next_generation: AtomicU64,
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Removes the entry of `stream_id` only if it still belongs to `generation`.
    pub(crate) fn release_entry(&self, stream_id: StreamId, generation: u64) -> bool {
        let mut table = self.lock();
        match table.channels.get(&stream_id) {
            Some(entry) if entry.generation == generation => {}
            _ => return false,
        }
        if let Some(entry) = table.channels.remove(&stream_id) {
            table.slots.release(entry.slot);
            log::info!("channel {} released slot {}", stream_id, entry.slot);
            return true;
        }
        false
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let table = self.lock();
        for entry in table.channels.values() {
            entry.control.begin_stopping();
        }
    }
}

/// Cheap to clone; all clones share one slot table.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ManagerInner>,
}

impl ChannelManager {
    pub fn new(decoders: Arc<dyn DecoderFactory>, output: ChannelOutput) -> Self {
        Self::with_start_timeout(decoders, output, DEFAULT_START_TIMEOUT)
    }

    pub fn with_start_timeout(
        decoders: Arc<dyn DecoderFactory>,
        output: ChannelOutput,
        start_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                table: Mutex::new(SlotTable::default()),
                decoders,
                output,
                start_timeout,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Allocates a slot and spawns the worker, then waits for the decoder to open.
    pub async fn start(&self, request: ChannelRequest) -> Result<StartStatus> {
        let stream_id = request.channel_id;
        let decoder = self.inner.decoders.create(&request);

        let (slot, init_rx) = {
            let mut table = self.inner.lock();
            if let Some(entry) = table.channels.get(&stream_id) {
                log::warn!(
                    "channel {} already started on slot {} ({})",
                    stream_id,
                    entry.slot,
                    entry.control.state()
                );
                return Ok(StartStatus::AlreadyRunning {
                    stream_id,
                    slot: entry.slot,
                });
            }

            let slot = table.slots.allocate();
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let control = Arc::new(WorkerControl::new());
            control.begin_starting();

            let worker = ChannelWorker::new(
                request,
                slot,
                generation,
                decoder,
                self.inner.output.clone(),
                Arc::downgrade(&self.inner),
            );
            let (init_tx, init_rx) = oneshot::channel();
            let handle = spawn_worker(
                format!("channel-{}", stream_id),
                worker,
                Arc::clone(&control),
                init_tx,
            );
            table.channels.insert(
                stream_id,
                ChannelEntry {
                    slot,
                    generation,
                    control,
                    handle: Some(handle),
                },
            );
            (slot, init_rx)
        };

        match tokio::time::timeout(self.inner.start_timeout, init_rx).await {
            Ok(Ok(Ok(()))) => {
                log::info!("channel {} started on slot {}", stream_id, slot);
                Ok(StartStatus::Started { stream_id, slot })
            }
            Ok(Ok(Err(e))) => Err(Error::InitFailed {
                stream_id,
                reason: format!("{:#}", e),
            }),
            Ok(Err(_)) => Err(Error::InitFailed {
                stream_id,
                reason: "worker exited during init".to_string(),
            }),
            Err(_) => {
                log::warn!(
                    "channel {} init did not finish within {:?}",
                    stream_id,
                    self.inner.start_timeout
                );
                Err(Error::Timeout(stream_id))
            }
        }
    }

    /// Releases the slot, then stops and joins the worker. The join is bounded by the
    /// start timeout.
    pub async fn stop(&self, stream_id: StreamId) -> Result<()> {
        let mut entry = {
            let mut table = self.inner.lock();
            let entry = table
                .channels
                .remove(&stream_id)
                .ok_or(Error::ChannelNotFound(stream_id))?;
            table.slots.release(entry.slot);
            entry
        };

        let previous = entry.control.begin_stopping();
        log::debug!("channel {} stopping from {:?}", stream_id, previous);

        if let Some(handle) = entry.handle.take() {
            match tokio::time::timeout(self.inner.start_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("channel {} worker join error: {:#?}", stream_id, e),
                Err(_) => {
                    log::warn!("channel {} worker did not exit in time", stream_id);
                    return Err(Error::Timeout(stream_id));
                }
            }
        }
        log::info!("channel {} stopped, slot {} released", stream_id, entry.slot);
        Ok(())
    }

    /// Suspends the pull loop. Slot and decoder stay allocated.
    pub fn pause(&self, stream_id: StreamId) -> Result<()> {
        let table = self.inner.lock();
        let entry = table
            .channels
            .get(&stream_id)
            .ok_or(Error::ChannelNotFound(stream_id))?;
        if entry.control.pause() {
            log::info!("channel {} paused", stream_id);
            return Ok(());
        }
        match entry.control.state() {
            WorkerState::Pausing => {
                log::warn!("channel {} already paused", stream_id);
                Ok(())
            }
            state => Err(Error::InvalidState {
                stream_id,
                state: state.to_string(),
                operation: "pause",
            }),
        }
    }

    pub fn resume(&self, stream_id: StreamId) -> Result<()> {
        let table = self.inner.lock();
        let entry = table
            .channels
            .get(&stream_id)
            .ok_or(Error::ChannelNotFound(stream_id))?;
        if entry.control.resume() {
            log::info!("channel {} resumed", stream_id);
            return Ok(());
        }
        match entry.control.state() {
            WorkerState::Running => {
                log::warn!("channel {} is not paused", stream_id);
                Ok(())
            }
            state => Err(Error::InvalidState {
                stream_id,
                state: state.to_string(),
                operation: "resume",
            }),
        }
    }

    pub fn status(&self, stream_id: StreamId) -> Option<ChannelStatus> {
        let table = self.inner.lock();
        table.channels.get(&stream_id).map(|entry| ChannelStatus {
            stream_id,
            slot: entry.slot,
            state: entry.control.state(),
        })
    }

    /// Snapshot of every active channel, ordered by stream id.
    pub fn channels(&self) -> Vec<ChannelStatus> {
        let table = self.inner.lock();
        let mut channels: Vec<ChannelStatus> = table
            .channels
            .iter()
            .map(|(stream_id, entry)| ChannelStatus {
                stream_id: *stream_id,
                slot: entry.slot,
                state: entry.control.state(),
            })
            .collect();
        channels.sort_by_key(|c| c.stream_id);
        channels
    }

    pub fn active_slots(&self) -> Vec<usize> {
        self.inner.lock().slots.in_use().collect()
    }

    pub fn output(&self) -> &ChannelOutput {
        &self.inner.output
    }

    /// Stops every active channel.
    pub async fn shutdown(&self) {
        let ids: Vec<StreamId> = self.inner.lock().channels.keys().copied().collect();
        for stream_id in ids {
            match self.stop(stream_id).await {
                Ok(()) | Err(Error::ChannelNotFound(_)) => {}
                Err(e) => log::warn!("channel {} shutdown: {}", stream_id, e),
            }
        }
    }
}
