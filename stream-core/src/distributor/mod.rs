//! Rule-based fan-out of one record to several branches.
//!
//! For every record the distributor evaluates its interval rules against the stream's
//! state, builds sub-frames for the matching annotations, pushes them to their
//! branches and finally forwards the original record to the default port.

pub mod config;
pub mod rules;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    element::{Element, ElementContext, WorkStatus},
    error::{Error, Result},
    frame::{Frame, FrameOrigin, MediaBuffer, Point, PortId, StreamId},
    transform::FrameTransform,
};

pub use config::{DistributorConfig, RouteConfig, RuleConfig};
pub use rules::{Evaluation, RouteKey, RouteTable, RuleSet, StreamState};

/// Label whose detections are quadrilaterals to be rectified rather than cropped.
const QUAD_CLASS: &str = "ppocr";

const INPUT_WAIT: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubKind {
    Terminal,
    Face(usize),
    Detection(usize),
    FullFrame,
}

/// A sub-frame decided under the state lock, built after it is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PlannedSub {
    port: PortId,
    index: u64,
    kind: SubKind,
}

/// Rule state of the stream currently occupying an internal slot.
struct SlotState {
    stream_id: StreamId,
    rules: StreamState,
}

impl SlotState {
    fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            rules: StreamState::new(),
        }
    }
}

pub struct Distributor {
    default_port: PortId,
    class_names: Vec<String>,
    is_affine: bool,
    rules: RuleSet,
    transform: Arc<dyn FrameTransform>,
    slots: Mutex<HashMap<usize, SlotState>>,
}

impl Distributor {
    pub fn new(config: &DistributorConfig, transform: Arc<dyn FrameTransform>) -> Result<Self> {
        let class_names = config.load_class_names()?;
        let rules = config.build_rules()?;
        for label in rules.class_labels() {
            if !class_names.iter().any(|name| name == label) {
                log::warn!("distributor rule class {:?} is not in the label list", label);
            }
        }
        Ok(Self {
            default_port: config.default_port,
            class_names,
            is_affine: config.is_affine,
            rules,
            transform,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_value(value: serde_json::Value, transform: Arc<dyn FrameTransform>) -> Result<Self> {
        Self::new(&DistributorConfig::from_value(value)?, transform)
    }

    pub fn default_port(&self) -> PortId {
        self.default_port
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Internal slots with live rule state. Bounded by the number of slots in use.
    pub fn tracked_slots(&self) -> usize {
        self.lock_slots().len()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<usize, SlotState>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evaluates and commits the rules for `frame`, assigning one sub-frame index per
    /// planned sub-frame. State is keyed by internal slot and starts over when a new
    /// stream takes the slot; a finished stream's state is dropped here.
    fn plan(&self, frame: &Frame, outputs: &[PortId]) -> Vec<PlannedSub> {
        let mut slots = self.lock_slots();
        let slot = slots
            .entry(frame.internal_slot)
            .or_insert_with(|| SlotState::new(frame.stream_id));
        if slot.stream_id != frame.stream_id || (frame.sequence == 0 && frame.is_original()) {
            *slot = SlotState::new(frame.stream_id);
        }
        let state = &mut slot.rules;
        let evaluation = self.rules.evaluate(state, frame);
        state.commit(&evaluation, frame.timestamp);

        let mut planned = Vec::new();
        if !evaluation.is_empty() {
            if frame.end_of_stream {
                for port in outputs.iter().filter(|p| **p != self.default_port) {
                    planned.push(PlannedSub {
                        port: *port,
                        index: state.next_sub_index(),
                        kind: SubKind::Terminal,
                    });
                }
            }

            if let Some(ports) = self
                .class_names
                .first()
                .and_then(|label| evaluation.ports_for(&RouteKey::class(label.as_str())))
            {
                for face in 0..frame.faces.len() {
                    for port in ports {
                        planned.push(PlannedSub {
                            port: *port,
                            index: state.next_sub_index(),
                            kind: SubKind::Face(face),
                        });
                    }
                }
            }

            for (i, detection) in frame.detections.iter().enumerate() {
                let Some(label) = self.class_names.get(detection.class_id) else {
                    log::debug!(
                        "stream {} detection class {} has no label",
                        frame.stream_id,
                        detection.class_id
                    );
                    continue;
                };
                let Some(ports) = evaluation.ports_for(&RouteKey::class(label.as_str())) else {
                    continue;
                };
                for port in ports {
                    planned.push(PlannedSub {
                        port: *port,
                        index: state.next_sub_index(),
                        kind: SubKind::Detection(i),
                    });
                }
            }

            if let Some(ports) = evaluation.ports_for(&RouteKey::FullFrame) {
                for port in ports {
                    planned.push(PlannedSub {
                        port: *port,
                        index: state.next_sub_index(),
                        kind: SubKind::FullFrame,
                    });
                }
            }
        }

        if frame.end_of_stream {
            slots.remove(&frame.internal_slot);
        }
        planned
    }

    fn build(&self, frame: &Frame, sub: PlannedSub) -> anyhow::Result<Frame> {
        let shared = || frame.payload.as_ref().map(MediaBuffer::share);
        match sub.kind {
            SubKind::Terminal => Ok(frame.derive(sub.index, shared(), FrameOrigin::Terminal)),
            SubKind::FullFrame => Ok(frame.derive(sub.index, shared(), FrameOrigin::FullFrame)),
            SubKind::Face(i) => {
                let face = &frame.faces[i];
                let source = shared().ok_or_else(|| anyhow::anyhow!("frame has no payload"))?;
                let buffer = if self.is_affine {
                    self.transform.align_face(source, face)?
                } else {
                    self.transform.crop(source, face.rect())?
                };
                Ok(frame.derive(sub.index, Some(buffer), FrameOrigin::Face(i)))
            }
            SubKind::Detection(i) => {
                let detection = &frame.detections[i];
                let source = shared().ok_or_else(|| anyhow::anyhow!("frame has no payload"))?;
                let is_quad = self
                    .class_names
                    .get(detection.class_id)
                    .is_some_and(|label| label == QUAD_CLASS);
                let buffer = if is_quad {
                    let quad: [Point; 4] = detection
                        .keypoints
                        .get(..4)
                        .and_then(|points| points.try_into().ok())
                        .ok_or_else(|| anyhow::anyhow!("{} detection needs 4 keypoints", QUAD_CLASS))?;
                    self.transform.warp_quad(source, quad)?
                } else {
                    self.transform.crop(source, detection.rect)?
                };
                Ok(frame.derive(sub.index, Some(buffer), FrameOrigin::Detection(i)))
            }
        }
    }

    /// Routes one record. Returns `(port, record)` pairs in push order; the original
    /// record is always last, addressed to the default port. `outputs` are the ports
    /// that receive a terminal sub-frame at end of stream.
    pub fn distribute(&self, frame: Arc<Frame>, outputs: &[PortId]) -> Vec<(PortId, Arc<Frame>)> {
        let planned = self.plan(&frame, outputs);
        let mut routed = Vec::with_capacity(planned.len() + 1);
        for sub in planned {
            match self.build(&frame, sub) {
                Ok(derived) => {
                    log::trace!("stream {} sub-frame {} -> port {}", frame.stream_id, sub.index, sub.port);
                    routed.push((sub.port, Arc::new(derived)));
                }
                Err(e) => log::warn!(
                    "stream {} frame {} sub-frame {:?} dropped: {:#}",
                    frame.stream_id,
                    frame.sequence,
                    sub.kind,
                    e
                ),
            }
        }
        log::debug!(
            "stream {} frame {} fanned out to {} branches",
            frame.stream_id,
            frame.sequence,
            routed.len()
        );
        routed.push((self.default_port, frame));
        routed
    }
}

impl Element for Distributor {
    fn name(&self) -> &'static str {
        "distributor"
    }

    fn on_start(&self, ctx: &ElementContext) -> anyhow::Result<()> {
        if ctx.input_ports().len() != 1 {
            return Err(Error::config(format!(
                "distributor {} needs exactly one input, has {}",
                ctx.id(),
                ctx.input_ports().len()
            ))
            .into());
        }
        let outputs = ctx.output_ports();
        for port in std::iter::once(self.default_port).chain(self.rules.ports()) {
            if !outputs.contains(&port) {
                return Err(Error::config(format!(
                    "distributor {} routes to unconnected port {}",
                    ctx.id(),
                    port
                ))
                .into());
            }
        }
        Ok(())
    }

    fn on_stop(&self, _ctx: &ElementContext) {
        self.lock_slots().clear();
    }

    fn do_work(&self, ctx: &ElementContext, lane: usize) -> anyhow::Result<WorkStatus> {
        let Some(&input) = ctx.input_ports().first() else {
            return Ok(WorkStatus::Idle);
        };
        let Some(frame) = ctx.pop_input(input, lane, INPUT_WAIT) else {
            return Ok(WorkStatus::Idle);
        };

        if frame.should_skip(ctx.id()) {
            ctx.push_output(self.default_port, frame);
            return Ok(WorkStatus::Progress);
        }
        for (port, record) in self.distribute(frame, &ctx.output_ports()) {
            ctx.push_output(port, record);
        }
        Ok(WorkStatus::Progress)
    }
}

#[cfg(test)]
#[path = "distributor_test.rs"]
mod distributor_test;
