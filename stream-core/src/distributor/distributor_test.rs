use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::Distributor;
use crate::connector::OverflowPolicy;
use crate::element::{Element, ElementContext, FrameConnector, WorkStatus};
use crate::frame::{
    Detection, FaceAnnotation, Frame, FrameOrigin, MediaBuffer, PixelFormat, Point, Rect,
};
use crate::transform::FrameTransform;

#[derive(Clone, Debug, PartialEq)]
enum Call {
    Crop(Rect),
    Align(i32),
    Warp,
}

#[derive(Default)]
struct RecordingTransform {
    calls: Mutex<Vec<Call>>,
    fail_crop: bool,
}

impl RecordingTransform {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn output(source: MediaBuffer) -> MediaBuffer {
        source.release();
        MediaBuffer::new(vec![1u8; 4], 2, 2, PixelFormat::Gray8)
    }
}

impl FrameTransform for RecordingTransform {
    fn crop(&self, source: MediaBuffer, rect: Rect) -> anyhow::Result<MediaBuffer> {
        self.calls.lock().unwrap().push(Call::Crop(rect));
        if self.fail_crop {
            anyhow::bail!("crop failed");
        }
        Ok(Self::output(source))
    }

    fn align_face(&self, source: MediaBuffer, face: &FaceAnnotation) -> anyhow::Result<MediaBuffer> {
        self.calls.lock().unwrap().push(Call::Align(face.left));
        Ok(Self::output(source))
    }

    fn warp_quad(&self, source: MediaBuffer, _quad: [Point; 4]) -> anyhow::Result<MediaBuffer> {
        self.calls.lock().unwrap().push(Call::Warp);
        Ok(Self::output(source))
    }
}

const DEFAULT: u32 = 0;
const BRANCH_A: u32 = 1;
const BRANCH_B: u32 = 2;
const OUTPUTS: [u32; 4] = [DEFAULT, BRANCH_A, BRANCH_B, 3];

fn distributor(config: serde_json::Value, transform: &Arc<RecordingTransform>) -> Distributor {
    Distributor::from_value(config, transform.clone()).unwrap()
}

/// Persons to branch A every 5th frame, the full frame to branch B every 2 s.
fn example_config() -> serde_json::Value {
    serde_json::json!({
        "default_port": DEFAULT,
        "class_names": ["person", "car"],
        "rules": [
            {"frame_interval": 5, "routes": [{"port_id": BRANCH_A, "classes": ["person"]}]},
            {"time_interval": 2, "routes": [{"port_id": BRANCH_B}]},
            {"frame_interval": 1, "routes": [{"port_id": 3, "classes": ["bicycle"]}]}
        ]
    })
}

fn detection(class_id: usize, rect: Rect) -> Detection {
    Detection {
        class_id,
        score: 0.9,
        rect,
        keypoints: Vec::new(),
    }
}

fn frame(sequence: u64, timestamp: Instant) -> Frame {
    Frame::new(7, 3, sequence)
        .with_timestamp(timestamp)
        .with_payload(MediaBuffer::new(vec![0u8; 64], 8, 8, PixelFormat::Gray8))
}

fn ports(routed: &[(u32, Arc<Frame>)]) -> Vec<u32> {
    routed.iter().map(|(port, _)| *port).collect()
}

#[test]
fn test_frame_and_time_rules_fan_out() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(example_config(), &transform);
    let start = Instant::now();

    let first = distributor.distribute(Arc::new(frame(0, start)), &OUTPUTS);
    assert_eq!(ports(&first), vec![BRANCH_B, DEFAULT]);

    let mut record = frame(10, start + Duration::from_secs(3));
    record.detections = vec![
        detection(0, Rect::new(1, 1, 4, 4)),
        detection(1, Rect::new(2, 2, 2, 2)),
    ];
    let record = Arc::new(record);
    let routed = distributor.distribute(Arc::clone(&record), &OUTPUTS);

    assert_eq!(ports(&routed), vec![BRANCH_A, BRANCH_B, DEFAULT]);
    assert_eq!(transform.calls(), vec![Call::Crop(Rect::new(1, 1, 4, 4))]);

    let (_, person) = &routed[0];
    assert_eq!(person.origin, FrameOrigin::Detection(0));
    assert_eq!(person.lineage, vec![1]);
    assert_eq!((person.stream_id, person.internal_slot, person.sequence), (7, 3, 10));

    let (_, full) = &routed[1];
    assert_eq!(full.origin, FrameOrigin::FullFrame);
    assert_eq!(full.lineage, vec![2]);
    assert!(
        full.payload
            .as_ref()
            .unwrap()
            .same_buffer(record.payload.as_ref().unwrap())
    );

    let (_, original) = &routed[2];
    assert!(Arc::ptr_eq(original, &record));
    assert!(original.is_original());
}

#[test]
fn test_quiet_frame_goes_to_default_only() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(example_config(), &transform);
    let start = Instant::now();
    distributor.distribute(Arc::new(frame(0, start)), &OUTPUTS);

    let mut record = frame(3, start + Duration::from_secs(1));
    record.detections = vec![detection(0, Rect::new(0, 0, 2, 2))];
    let routed = distributor.distribute(Arc::new(record), &OUTPUTS);
    assert_eq!(ports(&routed), vec![DEFAULT]);
    assert!(transform.calls().is_empty());
}

#[test]
fn test_end_of_stream_reaches_every_branch() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(example_config(), &transform);
    let start = Instant::now();
    distributor.distribute(Arc::new(frame(0, start)), &OUTPUTS);
    assert_eq!(distributor.tracked_slots(), 1);

    let eos = Arc::new(Frame::end_of_stream(7, 3, 1).with_timestamp(start));
    let routed = distributor.distribute(Arc::clone(&eos), &OUTPUTS);

    assert_eq!(ports(&routed), vec![BRANCH_A, BRANCH_B, 3, BRANCH_B, DEFAULT]);
    let terminals: Vec<&Arc<Frame>> = routed
        .iter()
        .filter(|(_, f)| f.origin == FrameOrigin::Terminal)
        .map(|(_, f)| f)
        .collect();
    assert_eq!(terminals.len(), 3);
    assert!(routed.iter().all(|(_, f)| f.end_of_stream));
    assert!(Arc::ptr_eq(&routed[4].1, &eos));
    assert_eq!(distributor.tracked_slots(), 0);
}

#[test]
fn test_state_is_bounded_by_slots_without_end_of_stream() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(example_config(), &transform);
    let start = Instant::now();

    for stream_id in 0..500 {
        let record = Frame::new(stream_id, (stream_id % 4) as usize, 3).with_timestamp(start);
        distributor.distribute(Arc::new(record), &OUTPUTS);
    }
    assert_eq!(distributor.tracked_slots(), 4);
}

#[test]
fn test_new_stream_on_slot_starts_fresh() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(example_config(), &transform);
    let start = Instant::now();

    let first = distributor.distribute(Arc::new(frame(0, start)), &OUTPUTS);
    assert_eq!(ports(&first), vec![BRANCH_B, DEFAULT]);
    let quiet = frame(1, start + Duration::from_secs(1));
    let quiet = distributor.distribute(Arc::new(quiet), &OUTPUTS);
    assert_eq!(ports(&quiet), vec![DEFAULT]);

    // Stream 7 was stopped without end of stream; stream 8 reuses slot 3.
    let next = Frame::new(8, 3, 4).with_timestamp(start + Duration::from_secs(1));
    let routed = distributor.distribute(Arc::new(next), &OUTPUTS);
    assert_eq!(ports(&routed), vec![BRANCH_B, DEFAULT]);
    assert_eq!(routed[0].1.lineage, vec![0]);

    let again = Frame::new(8, 3, 0).with_timestamp(start + Duration::from_secs(1));
    let restarted = distributor.distribute(Arc::new(again), &OUTPUTS);
    assert_eq!(ports(&restarted), vec![BRANCH_B, DEFAULT]);
    assert_eq!(restarted[0].1.lineage, vec![0]);
    assert_eq!(distributor.tracked_slots(), 1);
}

#[test]
fn test_sub_indices_are_unique_and_increasing() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(
        serde_json::json!({
            "default_port": DEFAULT,
            "class_names": ["person"],
            "rules": [{"routes": [{"port_id": BRANCH_A, "classes": ["person"]},
                                   {"port_id": BRANCH_B, "classes": ["person"]}]}]
        }),
        &transform,
    );
    let start = Instant::now();

    let mut indices = Vec::new();
    for seq in 0..3 {
        let mut record = frame(seq, start);
        record.detections = vec![
            detection(0, Rect::new(0, 0, 2, 2)),
            detection(0, Rect::new(2, 2, 2, 2)),
        ];
        for (port, sub) in distributor.distribute(Arc::new(record), &OUTPUTS) {
            if port == DEFAULT {
                continue;
            }
            assert_eq!(sub.lineage.len(), 1);
            indices.push(sub.lineage[0]);
        }
    }
    assert_eq!(indices, (0..12).collect::<Vec<u64>>());
}

#[test]
fn test_faces_use_first_label() {
    let config = |affine: bool| {
        serde_json::json!({
            "default_port": DEFAULT,
            "class_names": ["face"],
            "is_affine": affine,
            "rules": [{"routes": [{"port_id": BRANCH_A, "classes": ["face"]}]}]
        })
    };
    let face = FaceAnnotation {
        left: 2,
        top: 2,
        right: 5,
        bottom: 5,
        ..Default::default()
    };

    for affine in [true, false] {
        let transform = Arc::new(RecordingTransform::default());
        let distributor = distributor(config(affine), &transform);
        let mut record = frame(0, Instant::now());
        record.faces = vec![face.clone()];
        let routed = distributor.distribute(Arc::new(record), &OUTPUTS);

        assert_eq!(ports(&routed), vec![BRANCH_A, DEFAULT]);
        assert_eq!(routed[0].1.origin, FrameOrigin::Face(0));
        let expected = if affine {
            Call::Align(2)
        } else {
            Call::Crop(Rect::new(2, 2, 4, 4))
        };
        assert_eq!(transform.calls(), vec![expected]);
    }
}

#[test]
fn test_quad_labels_are_rectified() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(
        serde_json::json!({
            "default_port": DEFAULT,
            "class_names": ["face", "ppocr"],
            "rules": [{"routes": [{"port_id": BRANCH_A, "classes": ["ppocr"]}]}]
        }),
        &transform,
    );
    let mut text = detection(1, Rect::new(0, 0, 4, 2));
    text.keypoints = vec![
        Point::new(0.0, 0.0),
        Point::new(4.0, 0.0),
        Point::new(4.0, 2.0),
        Point::new(0.0, 2.0),
    ];
    let mut no_points = detection(1, Rect::new(0, 0, 4, 2));
    no_points.keypoints.clear();
    let unknown = detection(9, Rect::new(0, 0, 1, 1));

    let mut record = frame(0, Instant::now());
    record.detections = vec![text, no_points, unknown];
    let routed = distributor.distribute(Arc::new(record), &OUTPUTS);

    assert_eq!(ports(&routed), vec![BRANCH_A, DEFAULT]);
    assert_eq!(transform.calls(), vec![Call::Warp]);
}

#[test]
fn test_transform_failure_drops_only_that_branch() {
    let transform = Arc::new(RecordingTransform {
        fail_crop: true,
        ..Default::default()
    });
    let distributor = distributor(example_config(), &transform);
    let mut record = frame(0, Instant::now());
    record.detections = vec![detection(0, Rect::new(0, 0, 2, 2))];

    let routed = distributor.distribute(Arc::new(record), &OUTPUTS);
    assert_eq!(ports(&routed), vec![BRANCH_B, DEFAULT]);
    assert_eq!(routed[0].1.lineage, vec![1]);
}

fn wired(distributor_id: u32) -> (ElementContext, Arc<FrameConnector>, Vec<Arc<FrameConnector>>) {
    let input = Arc::new(FrameConnector::new(1, 8, OverflowPolicy::Drop));
    let outputs: Vec<Arc<FrameConnector>> = OUTPUTS
        .iter()
        .map(|_| Arc::new(FrameConnector::new(2, 8, OverflowPolicy::Drop)))
        .collect();
    let mut ctx = ElementContext::new(distributor_id, 1).with_input(0, Arc::clone(&input));
    for (port, connector) in OUTPUTS.iter().zip(&outputs) {
        ctx = ctx.with_output(*port, Arc::clone(connector));
    }
    (ctx, input, outputs)
}

#[test]
fn test_do_work_honours_skip() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(example_config(), &transform);
    let (ctx, input, outputs) = wired(5001);
    distributor.on_start(&ctx).unwrap();

    let mut skipped = frame(0, Instant::now());
    skipped.skip.insert(5001);
    input.push(0, Arc::new(skipped)).unwrap();
    assert_eq!(distributor.do_work(&ctx, 0).unwrap(), WorkStatus::Progress);
    assert_eq!(distributor.do_work(&ctx, 0).unwrap(), WorkStatus::Idle);

    assert_eq!(outputs[0].len(1), 1, "slot 3 lands on lane 1 of 2");
    assert!(outputs[1..].iter().all(|c| c.is_empty()));

    input.push(0, Arc::new(frame(5, Instant::now()))).unwrap();
    distributor.do_work(&ctx, 0).unwrap();
    assert_eq!(outputs[2].len(1), 1);
}

#[test]
fn test_on_start_rejects_unconnected_route() {
    let transform = Arc::new(RecordingTransform::default());
    let distributor = distributor(example_config(), &transform);
    let input = Arc::new(FrameConnector::new(1, 8, OverflowPolicy::Drop));
    let ctx = ElementContext::new(1, 1)
        .with_input(0, input)
        .with_output(DEFAULT, Arc::new(FrameConnector::new(1, 8, OverflowPolicy::Drop)));
    assert!(distributor.on_start(&ctx).is_err());
}
