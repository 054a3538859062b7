//! Region extraction applied by the distributor to build sub-frames.

use bytes::BytesMut;

use crate::frame::{FaceAnnotation, MediaBuffer, Point, Rect};

/// Minimum side of an aligned face crop.
pub const MIN_FACE_SIDE: i32 = 16;

/// Each method consumes the source handle; the result is a new buffer.
pub trait FrameTransform: Send + Sync {
    fn crop(&self, source: MediaBuffer, rect: Rect) -> anyhow::Result<MediaBuffer>;

    fn align_face(&self, source: MediaBuffer, face: &FaceAnnotation) -> anyhow::Result<MediaBuffer>;

    /// Rectifies a quadrilateral given clockwise from the top-left corner.
    fn warp_quad(&self, source: MediaBuffer, quad: [Point; 4]) -> anyhow::Result<MediaBuffer>;
}

/// Copies pixel regions out of raw buffers. No resampling.
#[derive(Debug, Default)]
pub struct RegionTransform;

impl RegionTransform {
    fn copy_region(source: &MediaBuffer, rect: Rect) -> anyhow::Result<MediaBuffer> {
        let Some(bpp) = source.format().bytes_per_pixel() else {
            anyhow::bail!("cannot crop {:?} buffer", source.format());
        };
        let Some(rect) = rect.clamp_to(source.width(), source.height()) else {
            anyhow::bail!(
                "region {:?} outside {}x{} frame",
                rect,
                source.width(),
                source.height()
            );
        };
        let stride = source.width() as usize * bpp;
        let data = source.data();
        if data.len() < stride * source.height() as usize {
            anyhow::bail!(
                "buffer holds {} bytes, {}x{} needs {}",
                data.len(),
                source.width(),
                source.height(),
                stride * source.height() as usize
            );
        }

        let row_len = rect.width as usize * bpp;
        let mut out = BytesMut::with_capacity(row_len * rect.height as usize);
        for row in rect.y as usize..(rect.y + rect.height) as usize {
            let start = row * stride + rect.x as usize * bpp;
            out.extend_from_slice(&data[start..start + row_len]);
        }
        Ok(MediaBuffer::new(
            out.freeze(),
            rect.width as u32,
            rect.height as u32,
            source.format(),
        ))
    }
}

impl FrameTransform for RegionTransform {
    fn crop(&self, source: MediaBuffer, rect: Rect) -> anyhow::Result<MediaBuffer> {
        let result = Self::copy_region(&source, rect);
        source.release();
        result
    }

    fn align_face(&self, source: MediaBuffer, face: &FaceAnnotation) -> anyhow::Result<MediaBuffer> {
        let rect = face.expanded_rect(source.width(), source.height(), MIN_FACE_SIDE);
        self.crop(source, rect)
    }

    fn warp_quad(&self, source: MediaBuffer, quad: [Point; 4]) -> anyhow::Result<MediaBuffer> {
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for p in &quad {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let x = min_x.floor() as i32;
        let y = min_y.floor() as i32;
        let rect = Rect::new(x, y, max_x.ceil() as i32 - x, max_y.ceil() as i32 - y);
        self.crop(source, rect)
    }
}

#[cfg(test)]
#[path = "transform_test.rs"]
mod transform_test;
