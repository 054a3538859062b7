use std::path::Path;

use super::{DecodeError, DecoderFactory, DefaultDecoderFactory, ImageDirDecoder, MediaDecoder};
use crate::channel::request::{ChannelRequest, LoopCount, SourceType};

fn image_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
    }
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    dir
}

fn request(dir: &Path, loop_count: LoopCount) -> ChannelRequest {
    let mut request = ChannelRequest::new(1, SourceType::ImgDir, dir.to_string_lossy())
        .with_loop_count(loop_count);
    request.fps = 0.0;
    request
}

fn drain(decoder: &mut ImageDirDecoder) -> Vec<(String, bool)> {
    let mut out = Vec::new();
    loop {
        match decoder.next() {
            Ok(frame) => {
                let payload = frame.payload.unwrap();
                out.push((String::from_utf8(payload.data().to_vec()).unwrap(), frame.filtered));
            }
            Err(DecodeError::EndOfStream) => return out,
            Err(e) => panic!("unexpected {}", e),
        }
        assert!(out.len() < 100, "decoder never ended");
    }
}

#[test]
fn test_plays_files_in_name_order() {
    let dir = image_dir(&["b.jpg", "a.jpg", "c.jpg"]);
    let mut decoder = ImageDirDecoder::new();
    decoder.init(&request(dir.path(), LoopCount::Finite(1))).unwrap();

    let names: Vec<String> = drain(&mut decoder).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
    assert!(matches!(decoder.next(), Err(DecodeError::EndOfStream)));
}

#[test]
fn test_loops_and_samples() {
    let dir = image_dir(&["1.png", "2.png"]);
    let mut decoder = ImageDirDecoder::new();
    let request = request(dir.path(), LoopCount::Finite(2)).with_sample_interval(3);
    decoder.init(&request).unwrap();

    let frames = drain(&mut decoder);
    assert_eq!(frames.len(), 4);
    let filtered: Vec<bool> = frames.iter().map(|(_, f)| *f).collect();
    assert_eq!(filtered, vec![false, true, true, false]);
}

#[test]
fn test_fps_paces_output() {
    let dir = image_dir(&["1.png", "2.png", "3.png"]);
    let mut decoder = ImageDirDecoder::new();
    let mut request = request(dir.path(), LoopCount::Finite(1));
    request.fps = 50.0;
    decoder.init(&request).unwrap();

    let started = std::time::Instant::now();
    assert_eq!(drain(&mut decoder).len(), 3);
    assert!(started.elapsed() >= std::time::Duration::from_millis(35));
}

#[test]
fn test_roi_leaves_payload_whole() {
    let dir = image_dir(&["1.png", "2.png"]);
    let mut decoder = ImageDirDecoder::new();
    let mut request = request(dir.path(), LoopCount::Finite(1));
    request.roi = Some(crate::frame::Rect::new(0, 0, 1, 1));
    decoder.init(&request).unwrap();
    assert_eq!(
        drain(&mut decoder),
        vec![("1.png".to_string(), false), ("2.png".to_string(), false)]
    );
}

#[test]
fn test_tiny_fps_fails_init() {
    let dir = image_dir(&["1.png"]);
    let mut decoder = ImageDirDecoder::new();
    let mut request = request(dir.path(), LoopCount::Finite(1));
    request.fps = 1e-300;
    assert!(decoder.init(&request).is_err());
}

#[test]
fn test_empty_or_missing_dir_fails_init() {
    let dir = tempfile::tempdir().unwrap();
    let mut decoder = ImageDirDecoder::new();
    assert!(decoder.init(&request(dir.path(), LoopCount::Infinite)).is_err());
    assert!(
        decoder
            .init(&request(&dir.path().join("missing"), LoopCount::Infinite))
            .is_err()
    );
}

#[test]
fn test_default_factory() {
    let dir = image_dir(&["x.jpg"]);
    let factory = DefaultDecoderFactory;

    let mut images = factory.create(&request(dir.path(), LoopCount::Finite(1)));
    assert!(images.init(&request(dir.path(), LoopCount::Finite(1))).is_ok());
    images.close();

    let rtsp = ChannelRequest::new(2, SourceType::Rtsp, "rtsp://cam/1");
    let mut camera = factory.create(&rtsp);
    let err = camera.init(&rtsp).unwrap_err();
    assert!(err.to_string().contains("Rtsp"));
}
