use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{FrameTransform, RegionTransform};
use crate::frame::{FaceAnnotation, MediaBuffer, PixelFormat, Point, Rect};

/// 4x3 gray image whose pixel value is `y * 10 + x`.
fn gray() -> MediaBuffer {
    let data: Vec<u8> = (0..3u8).flat_map(|y| (0..4u8).map(move |x| y * 10 + x)).collect();
    MediaBuffer::new(data, 4, 3, PixelFormat::Gray8)
}

#[test]
fn test_crop_copies_rows() {
    let out = RegionTransform.crop(gray(), Rect::new(1, 1, 2, 2)).unwrap();
    assert_eq!((out.width(), out.height()), (2, 2));
    assert_eq!(out.data().as_ref(), &[11, 12, 21, 22]);
}

#[test]
fn test_crop_clamps_and_handles_color() {
    let rgb: Vec<u8> = (0..2 * 2 * 3).map(|v| v as u8).collect();
    let source = MediaBuffer::new(rgb, 2, 2, PixelFormat::Rgb24);
    let out = RegionTransform.crop(source, Rect::new(1, -3, 5, 4)).unwrap();
    assert_eq!((out.width(), out.height()), (1, 1));
    assert_eq!(out.data().as_ref(), &[3, 4, 5]);
    assert_eq!(out.format(), PixelFormat::Rgb24);
}

#[test]
fn test_crop_releases_source() {
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let source = MediaBuffer::with_release(vec![0u8; 4], 2, 2, PixelFormat::Gray8, move || {
        flag.store(true, Ordering::SeqCst)
    });

    assert!(RegionTransform.crop(source, Rect::new(5, 5, 1, 1)).is_err());
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn test_rejects_encoded_and_short_buffers() {
    let encoded = MediaBuffer::new(vec![0xff, 0xd8], 0, 0, PixelFormat::Encoded);
    assert!(RegionTransform.crop(encoded, Rect::new(0, 0, 1, 1)).is_err());

    let short = MediaBuffer::new(vec![0u8; 3], 2, 2, PixelFormat::Gray8);
    assert!(RegionTransform.crop(short, Rect::new(0, 0, 1, 1)).is_err());
}

#[test]
fn test_warp_quad_uses_bounding_box() {
    let quad = [
        Point::new(1.2, 0.0),
        Point::new(2.9, 0.4),
        Point::new(2.5, 1.6),
        Point::new(1.0, 1.0),
    ];
    let out = RegionTransform.warp_quad(gray(), quad).unwrap();
    assert_eq!((out.width(), out.height()), (2, 2));
    assert_eq!(out.data().as_ref(), &[1, 2, 11, 12]);
}

#[test]
fn test_align_face_expands_box() {
    let source = MediaBuffer::new(vec![0u8; 64 * 64], 64, 64, PixelFormat::Gray8);
    let face = FaceAnnotation {
        left: 20,
        top: 20,
        right: 40,
        bottom: 40,
        ..Default::default()
    };
    let out = RegionTransform.align_face(source, &face).unwrap();
    assert_eq!((out.width(), out.height()), (40, 40));
}
