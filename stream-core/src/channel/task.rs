use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::{
    connector::{OverflowPolicy, PushError},
    decoder::{DecodeError, DecodedFrame, MediaDecoder},
    element::FrameConnector,
    frame::{ElementId, Frame},
    worker::{Step, WorkerHooks},
};

use super::{
    ManagerInner,
    request::{ChannelRequest, SampleStrategy},
};

/// Bound for handing the terminal frame downstream when the connector is full.
const END_OF_STREAM_PUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Where channel workers push their frames.
#[derive(Clone)]
pub struct ChannelOutput {
    connector: Arc<FrameConnector>,
    terminal: bool,
}

impl ChannelOutput {
    pub fn new(connector: Arc<FrameConnector>) -> Self {
        Self {
            connector,
            terminal: false,
        }
    }

    /// A terminal destination takes every stream on lane 0.
    pub fn terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn connector(&self) -> &Arc<FrameConnector> {
        &self.connector
    }

    pub fn lane_for(&self, slot: usize) -> usize {
        if self.terminal {
            0
        } else {
            self.connector.lane_for(slot)
        }
    }
}

/// Worker hooks for one stream: pulls from the decoder, stamps and forwards frames.
pub(crate) struct ChannelWorker {
    request: ChannelRequest,
    slot: usize,
    generation: u64,
    decoder: Option<Box<dyn MediaDecoder>>,
    output: ChannelOutput,
    manager: Weak<ManagerInner>,
    skip: BTreeSet<ElementId>,
    sequence: u64,
}

impl ChannelWorker {
    pub(crate) fn new(
        request: ChannelRequest,
        slot: usize,
        generation: u64,
        decoder: Box<dyn MediaDecoder>,
        output: ChannelOutput,
        manager: Weak<ManagerInner>,
    ) -> Self {
        let skip = request.skip_elements.iter().copied().collect();
        Self {
            request,
            slot,
            generation,
            decoder: Some(decoder),
            output,
            manager,
            skip,
            sequence: 0,
        }
    }

    /// Removes this worker's own table entry. False when a `stop` already did it.
    fn release_self(&self) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager.release_entry(self.request.channel_id, self.generation),
            None => false,
        }
    }

    fn close_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
    }

    fn stamp(&mut self, decoded: DecodedFrame) -> Frame {
        let mut frame = Frame::new(self.request.channel_id, self.slot, self.sequence);
        frame.skip = self.skip.clone();
        frame.payload = decoded.payload;
        frame.filtered = decoded.filtered;
        frame.detections = decoded.detections;
        frame.faces = decoded.faces;
        frame
    }

    fn forward(&self, frame: Frame) {
        let lane = self.output.lane_for(self.slot);
        let frame = Arc::new(frame);
        let result = if frame.end_of_stream {
            let timeout = match self.output.connector().policy() {
                OverflowPolicy::Block { timeout } => timeout.max(END_OF_STREAM_PUSH_TIMEOUT),
                OverflowPolicy::Drop => END_OF_STREAM_PUSH_TIMEOUT,
            };
            self.output.connector().push_timeout(lane, frame, timeout)
        } else {
            self.output.connector().push_with_policy(lane, frame)
        };
        if let Err(PushError::Full(frame)) = result {
            log::warn!("channel {} lane {} full, dropped {}", self.request.channel_id, lane, frame);
        }
    }

    fn end_of_stream(&mut self) -> Step {
        let owned = self.release_self();
        self.close_decoder();
        if owned {
            let frame = Frame::end_of_stream(self.request.channel_id, self.slot, self.sequence);
            log::info!("channel {} end of stream after {} frames", self.request.channel_id, self.sequence);
            self.forward(frame);
        } else {
            log::debug!("channel {} end of stream raced a stop", self.request.channel_id);
        }
        Step::Finished
    }
}

impl WorkerHooks for ChannelWorker {
    fn on_init(&mut self) -> anyhow::Result<()> {
        let started = Instant::now();
        let result = match self.decoder.as_mut() {
            Some(decoder) => decoder.init(&self.request),
            None => Err(anyhow::anyhow!("decoder already closed")),
        };
        if let Err(e) = result {
            self.release_self();
            self.close_decoder();
            return Err(e);
        }
        log::debug!(
            "channel {} decoder ready in {:?}",
            self.request.channel_id,
            started.elapsed()
        );
        Ok(())
    }

    fn on_step(&mut self) -> Step {
        let Some(decoder) = self.decoder.as_mut() else {
            return Step::Finished;
        };
        match decoder.next() {
            Ok(decoded) => {
                let frame = self.stamp(decoded);
                self.sequence += 1;
                if frame.filtered && self.request.sample_strategy == SampleStrategy::Drop {
                    log::trace!("channel {} sampled out {}", self.request.channel_id, frame.sequence);
                    return Step::Continue;
                }
                self.forward(frame);
                Step::Continue
            }
            Err(DecodeError::EndOfStream) => self.end_of_stream(),
            Err(DecodeError::Failed(reason)) => {
                log::warn!("channel {} decode error: {}", self.request.channel_id, reason);
                Step::Idle
            }
        }
    }

    fn on_teardown(&mut self) {
        self.release_self();
        self.close_decoder();
        log::debug!("channel {} worker torn down", self.request.channel_id);
    }
}
