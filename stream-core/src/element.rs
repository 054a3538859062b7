use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    connector::{Connector, PushError},
    frame::{ElementId, Frame, PortId},
};

pub type FrameConnector = Connector<Arc<Frame>>;

/// Outcome of one `do_work` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkStatus {
    /// A record was handled.
    Progress,
    /// Nothing to do; the runner backs off briefly.
    Idle,
}

/// A pipeline stage. `do_work` is called repeatedly from each worker lane.
pub trait Element: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn on_start(&self, _ctx: &ElementContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_stop(&self, _ctx: &ElementContext) {}

    fn do_work(&self, ctx: &ElementContext, lane: usize) -> anyhow::Result<WorkStatus>;
}

/// Wiring of one element: its ports and worker lanes.
pub struct ElementContext {
    id: ElementId,
    lanes: usize,
    inputs: BTreeMap<PortId, Arc<FrameConnector>>,
    outputs: BTreeMap<PortId, Arc<FrameConnector>>,
    sink: bool,
    cancel: CancellationToken,
}

impl ElementContext {
    pub fn new(id: ElementId, lanes: usize) -> Self {
        Self {
            id,
            lanes: lanes.max(1),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            sink: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_input(mut self, port: PortId, connector: Arc<FrameConnector>) -> Self {
        self.inputs.insert(port, connector);
        self
    }

    pub fn with_output(mut self, port: PortId, connector: Arc<FrameConnector>) -> Self {
        self.outputs.insert(port, connector);
        self
    }

    /// A sink pushes everything to lane 0 of its outputs.
    pub fn with_sink(mut self, sink: bool) -> Self {
        self.sink = sink;
        self
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn is_sink(&self) -> bool {
        self.sink
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn input_ports(&self) -> Vec<PortId> {
        self.inputs.keys().copied().collect()
    }

    pub fn output_ports(&self) -> Vec<PortId> {
        self.outputs.keys().copied().collect()
    }

    pub fn input(&self, port: PortId) -> Option<&Arc<FrameConnector>> {
        self.inputs.get(&port)
    }

    pub fn output(&self, port: PortId) -> Option<&Arc<FrameConnector>> {
        self.outputs.get(&port)
    }

    /// Waits up to `wait` for a record on `lane` of input `port`.
    pub fn pop_input(&self, port: PortId, lane: usize, wait: Duration) -> Option<Arc<Frame>> {
        self.inputs.get(&port)?.pop_timeout(lane, wait)
    }

    /// Destination lane for a record of `slot` on output `port`.
    pub fn output_lane(&self, port: PortId, slot: usize) -> usize {
        if self.sink {
            return 0;
        }
        self.outputs
            .get(&port)
            .map(|c| c.lane_for(slot))
            .unwrap_or(0)
    }

    /// Pushes to `port` following the connector's policy. A failed push is logged and
    /// the record is dropped for this port only.
    pub fn push_output(&self, port: PortId, frame: Arc<Frame>) -> bool {
        let Some(connector) = self.outputs.get(&port) else {
            log::warn!("element {}: no output port {}", self.id, port);
            return false;
        };
        let lane = self.output_lane(port, frame.internal_slot);
        match connector.push_with_policy(lane, frame) {
            Ok(()) => true,
            Err(PushError::Full(frame)) => {
                log::warn!(
                    "element {}: output port {} lane {} full, dropped {}",
                    self.id,
                    port,
                    lane,
                    frame
                );
                false
            }
        }
    }
}

/// Runs an element's worker lanes on blocking threads.
pub struct ElementRunner {
    element: Arc<dyn Element>,
    ctx: Arc<ElementContext>,
    handles: Vec<JoinHandle<()>>,
}

impl ElementRunner {
    pub fn new(element: Arc<dyn Element>, ctx: ElementContext) -> Self {
        Self {
            element,
            ctx: Arc::new(ctx),
            handles: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<ElementContext> {
        &self.ctx
    }

    pub fn element(&self) -> &Arc<dyn Element> {
        &self.element
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Calls `on_start`, then spawns one loop per lane.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.is_running() {
            log::warn!("element {} already started", self.ctx.id());
            return Ok(());
        }
        self.element.on_start(&self.ctx)?;

        for lane in 0..self.ctx.lanes() {
            let element = Arc::clone(&self.element);
            let ctx = Arc::clone(&self.ctx);
            let handle = tokio::task::spawn_blocking(move || Self::lane_loop(element, ctx, lane));
            self.handles.push(handle);
        }
        log::info!(
            "element {} ({}) started with {} lanes",
            self.ctx.id(),
            self.element.name(),
            self.ctx.lanes()
        );
        Ok(())
    }

    fn lane_loop(element: Arc<dyn Element>, ctx: Arc<ElementContext>, lane: usize) {
        let cancel = ctx.cancel_token().clone();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match element.do_work(&ctx, lane) {
                Ok(WorkStatus::Progress) => {}
                Ok(WorkStatus::Idle) => std::thread::sleep(Duration::from_millis(10)),
                Err(e) => {
                    log::warn!("element {} lane {} do_work error: {:#}", ctx.id(), lane, e);
                }
            }
        }
        log::debug!("element {} lane {} exited", ctx.id(), lane);
    }

    /// Cancels every lane, waits for them and calls `on_stop`.
    pub async fn stop(&mut self) {
        self.ctx.cancel_token().cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                log::error!("element {} lane join error: {:#?}", self.ctx.id(), e);
            }
        }
        self.element.on_stop(&self.ctx);
        log::info!("element {} ({}) stopped", self.ctx.id(), self.element.name());
    }
}

impl Drop for ElementRunner {
    fn drop(&mut self) {
        self.ctx.cancel_token().cancel();
    }
}

#[cfg(test)]
#[path = "element_test.rs"]
mod element_test;
