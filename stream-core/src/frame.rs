use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;

/// External stream identifier, assigned by the caller of `Start`.
pub type StreamId = u32;
pub type ElementId = u32;
pub type PortId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Bgr24,
    /// Compressed bytes (jpeg, png, ...). Not addressable by pixel.
    Encoded,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Encoded => None,
        }
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

struct BufferInner {
    data: Bytes,
    width: u32,
    height: u32,
    format: PixelFormat,
    release: Mutex<Option<ReleaseFn>>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        let release = match self.release.get_mut() {
            Ok(release) => release.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
    }
}

/// Reference-counted media payload.
///
/// There is no `Clone`: a second reference is taken with [`MediaBuffer::share`] and
/// given back with [`MediaBuffer::release`] (or by dropping). The release callback
/// runs once, when the last reference goes away.
pub struct MediaBuffer {
    inner: Arc<BufferInner>,
}

impl MediaBuffer {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                data: data.into(),
                width,
                height,
                format,
                release: Mutex::new(None),
            }),
        }
    }

    /// Wraps a buffer owned by an external allocator; `release` frees it.
    pub fn with_release(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        let buffer = Self::new(data, width, height, format);
        if let Ok(mut slot) = buffer.inner.release.lock() {
            *slot = Some(Box::new(release));
        }
        buffer
    }

    pub fn share(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn release(self) {
        drop(self);
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn same_buffer(&self, other: &MediaBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn data(&self) -> &Bytes {
        &self.inner.data
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }
}

impl std::fmt::Debug for MediaBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBuffer")
            .field("len", &self.inner.data.len())
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("format", &self.inner.format)
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamps the rect to a `frame_width` x `frame_height` image. Returns None when nothing is left.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<Rect> {
        let fw = i32::try_from(frame_width).unwrap_or(i32::MAX);
        let fh = i32::try_from(frame_height).unwrap_or(i32::MAX);
        let x0 = self.x.clamp(0, fw);
        let y0 = self.y.clamp(0, fh);
        let x1 = self.x.saturating_add(self.width).clamp(0, fw);
        let y1 = self.y.saturating_add(self.height).clamp(0, fh);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Object detection result attached to a frame by an upstream stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub score: f32,
    pub rect: Rect,
    /// Corner points for quad-shaped objects (text lines), clockwise from top-left.
    pub keypoints: Vec<Point>,
}

/// Face detection result: inclusive box plus five landmarks
/// (left eye, right eye, nose, left mouth corner, right mouth corner).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceAnnotation {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub landmarks: [Point; 5],
}

impl FaceAnnotation {
    pub fn rect(&self) -> Rect {
        Rect::new(
            self.left.max(0),
            self.top.max(0),
            self.right.saturating_sub(self.left).saturating_add(1).max(0),
            self.bottom.saturating_sub(self.top).saturating_add(1).max(0),
        )
    }

    /// Face box grown by half its size on every side so alignment never samples
    /// outside the crop, clamped to the frame with a minimum side of `min_side`.
    pub fn expanded_rect(&self, frame_width: u32, frame_height: u32, min_side: i32) -> Rect {
        let fw = i32::try_from(frame_width).unwrap_or(i32::MAX);
        let fh = i32::try_from(frame_height).unwrap_or(i32::MAX);
        let (x1, y1, x2, y2) = (
            self.left as f32,
            self.top as f32,
            self.right as f32,
            self.bottom as f32,
        );
        let nx1 = ((1.5 * x1 - 0.5 * x2) as i32).max(0);
        let nx2 = ((1.5 * x2 - 0.5 * x1) as i32).min(fw - 1);
        let ny1 = ((1.5 * y1 - 0.5 * y2) as i32).max(0);
        let ny2 = ((1.5 * y2 - 0.5 * y1) as i32).min(fh - 1);

        let mut rect = Rect::new(
            nx1,
            ny1,
            nx2.saturating_sub(nx1).max(min_side),
            ny2.saturating_sub(ny1).max(min_side),
        );
        if rect.x.saturating_add(rect.width) >= fw {
            rect.x = fw.saturating_sub(rect.width).max(0);
        }
        if rect.y.saturating_add(rect.height) >= fh {
            rect.y = fh.saturating_sub(rect.height).max(0);
        }
        rect
    }
}

/// How a frame came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Produced by a source worker.
    Source,
    /// Derived from the detection at this index of the parent.
    Detection(usize),
    /// Derived from the face at this index of the parent.
    Face(usize),
    /// Uncropped copy routed by a full-frame rule.
    FullFrame,
    /// Terminal marker synthesized for a branch at end of stream.
    Terminal,
}

/// Unit of work flowing through the graph. Shared between stages as `Arc<Frame>`
/// and never mutated after it has been pushed.
#[derive(Debug)]
pub struct Frame {
    pub stream_id: StreamId,
    pub internal_slot: usize,
    pub sequence: u64,
    pub timestamp: Instant,
    pub end_of_stream: bool,
    /// Sub-frame ids from the original frame down to this one. Empty for originals.
    pub lineage: Vec<u64>,
    pub payload: Option<MediaBuffer>,
    pub skip: BTreeSet<ElementId>,
    /// Set by the decoder when sampling says this frame may be dropped.
    pub filtered: bool,
    pub detections: Vec<Detection>,
    pub faces: Vec<FaceAnnotation>,
    pub origin: FrameOrigin,
}

impl Frame {
    pub fn new(stream_id: StreamId, internal_slot: usize, sequence: u64) -> Self {
        Self {
            stream_id,
            internal_slot,
            sequence,
            timestamp: Instant::now(),
            end_of_stream: false,
            lineage: Vec::new(),
            payload: None,
            skip: BTreeSet::new(),
            filtered: false,
            detections: Vec::new(),
            faces: Vec::new(),
            origin: FrameOrigin::Source,
        }
    }

    pub fn end_of_stream(stream_id: StreamId, internal_slot: usize, sequence: u64) -> Self {
        Self {
            end_of_stream: true,
            ..Self::new(stream_id, internal_slot, sequence)
        }
    }

    pub fn with_payload(mut self, payload: MediaBuffer) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn should_skip(&self, element: ElementId) -> bool {
        self.skip.contains(&element)
    }

    pub fn is_original(&self) -> bool {
        self.lineage.is_empty()
    }

    /// Builds a sub-frame of `self`: same stream identity, lineage extended by `sub_index`.
    /// Annotations are not inherited.
    pub fn derive(&self, sub_index: u64, payload: Option<MediaBuffer>, origin: FrameOrigin) -> Frame {
        let mut lineage = Vec::with_capacity(self.lineage.len() + 1);
        lineage.extend_from_slice(&self.lineage);
        lineage.push(sub_index);
        Frame {
            stream_id: self.stream_id,
            internal_slot: self.internal_slot,
            sequence: self.sequence,
            timestamp: self.timestamp,
            end_of_stream: self.end_of_stream,
            lineage,
            payload,
            skip: self.skip.clone(),
            filtered: false,
            detections: Vec::new(),
            faces: Vec::new(),
            origin,
        }
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "Frame {{ stream: {}, slot: {}, seq: {}, eos: {}, lineage: {:?} }}",
            self.stream_id, self.internal_slot, self.sequence, self.end_of_stream, self.lineage
        )
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
