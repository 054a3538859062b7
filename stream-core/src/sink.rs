//! Terminal element: hands records to async consumers as a `Stream`.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    element::{Element, ElementContext, WorkStatus},
    frame::Frame,
};

pub const DEFAULT_SINK_CAPACITY: usize = 256;

const INPUT_WAIT: Duration = Duration::from_millis(10);
const SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// Sender half feeds the channel from blocking lanes; the receiver is polled as a `Stream`.
pub struct FrameSinkSource {
    writer: mpsc::Sender<Arc<Frame>>,
    inner: Mutex<mpsc::Receiver<Arc<Frame>>>,
}

impl FrameSinkSource {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SINK_CAPACITY)
    }

    pub fn with_capacity(buffer_size: usize) -> Self {
        let (writer, receiver) = mpsc::channel(buffer_size.max(1));
        Self {
            writer,
            inner: Mutex::new(receiver),
        }
    }

    fn poll_frame(&self, cx: &mut Context<'_>) -> Poll<Option<Arc<Frame>>> {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.poll_recv(cx)
    }

    /// Non-blocking receive, for draining in tests and shutdown paths.
    pub fn try_recv(&self) -> Option<Arc<Frame>> {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.try_recv().ok()
    }
}

impl Default for FrameSinkSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned stream over a sink's records.
#[derive(Clone)]
pub struct FrameStream(pub Arc<FrameSinkSource>);

impl Stream for FrameStream {
    type Item = Arc<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_frame(cx)
    }
}

pub struct SinkElement {
    source: Arc<FrameSinkSource>,
}

impl SinkElement {
    pub fn new(capacity: usize) -> Self {
        Self {
            source: Arc::new(FrameSinkSource::with_capacity(capacity)),
        }
    }

    pub fn stream(&self) -> FrameStream {
        FrameStream(Arc::clone(&self.source))
    }

    fn send(&self, ctx: &ElementContext, frame: Arc<Frame>) {
        let deadline = Instant::now() + SEND_TIMEOUT;
        let mut frame = frame;
        loop {
            match self.source.writer.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Closed(frame)) => {
                    log::warn!("sink {}: consumer gone, dropped {}", ctx.id(), frame);
                    return;
                }
                Err(TrySendError::Full(rejected)) => {
                    if Instant::now() >= deadline || ctx.cancel_token().is_cancelled() {
                        log::warn!("sink {}: consumer lagging, dropped {}", ctx.id(), rejected);
                        return;
                    }
                    frame = rejected;
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

impl Default for SinkElement {
    fn default() -> Self {
        Self::new(DEFAULT_SINK_CAPACITY)
    }
}

impl Element for SinkElement {
    fn name(&self) -> &'static str {
        "sink"
    }

    fn do_work(&self, ctx: &ElementContext, lane: usize) -> anyhow::Result<WorkStatus> {
        let mut status = WorkStatus::Idle;
        for port in ctx.input_ports() {
            let Some(frame) = ctx.pop_input(port, lane, INPUT_WAIT) else {
                continue;
            };
            if frame.end_of_stream && frame.is_original() {
                log::debug!("sink {}: stream {} ended", ctx.id(), frame.stream_id);
            }
            self.send(ctx, frame);
            status = WorkStatus::Progress;
        }
        Ok(status)
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
