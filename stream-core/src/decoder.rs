//! Decoder contracts used by channel workers, plus the built-in image directory decoder.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::{
    channel::request::{ChannelRequest, LoopCount, SourceType},
    frame::{Detection, FaceAnnotation, MediaBuffer, PixelFormat},
};

/// One unit produced by a decoder, before the worker stamps stream identity on it.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    pub payload: Option<MediaBuffer>,
    /// Sampling says this frame may be dropped.
    pub filtered: bool,
    pub detections: Vec<Detection>,
    pub faces: Vec<FaceAnnotation>,
}

impl DecodedFrame {
    pub fn new(payload: MediaBuffer) -> Self {
        Self {
            payload: Some(payload),
            ..Default::default()
        }
    }

    pub fn filtered(mut self, filtered: bool) -> Self {
        self.filtered = filtered;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The source is exhausted. The worker emits the terminal frame and exits.
    #[error("end of stream")]
    EndOfStream,
    /// A single unit could not be decoded. The worker backs off and keeps pulling.
    #[error("decode failed: {0}")]
    Failed(String),
}

pub trait MediaDecoder: Send {
    fn init(&mut self, request: &ChannelRequest) -> anyhow::Result<()>;

    fn next(&mut self) -> Result<DecodedFrame, DecodeError>;

    fn close(&mut self);
}

pub trait DecoderFactory: Send + Sync {
    fn create(&self, request: &ChannelRequest) -> Box<dyn MediaDecoder>;
}

/// Plays the regular files of a directory in name order, one file per frame.
pub struct ImageDirDecoder {
    files: Vec<PathBuf>,
    index: usize,
    passes: u32,
    loop_count: LoopCount,
    frame_interval: Option<Duration>,
    next_due: Option<Instant>,
    sample_interval: u64,
    produced: u64,
}

impl ImageDirDecoder {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            index: 0,
            passes: 0,
            loop_count: LoopCount::Finite(1),
            frame_interval: None,
            next_due: None,
            sample_interval: 1,
            produced: 0,
        }
    }

    fn pace(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + interval);
    }
}

impl Default for ImageDirDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDecoder for ImageDirDecoder {
    fn init(&mut self, request: &ChannelRequest) -> anyhow::Result<()> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&request.url)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        if files.is_empty() {
            anyhow::bail!("no image in {}", request.url);
        }
        files.sort();

        log::debug!("image dir {}: {} files", request.url, files.len());
        if let Some(roi) = request.roi {
            log::debug!("image dir {}: roi {:?} is not applied", request.url, roi);
        }
        self.files = files;
        self.index = 0;
        self.passes = 0;
        self.loop_count = request.loop_count;
        self.frame_interval = if request.fps > 0.0 {
            Some(Duration::try_from_secs_f64(1.0 / request.fps).map_err(|e| {
                anyhow::anyhow!("fps {} has no usable frame interval: {}", request.fps, e)
            })?)
        } else {
            None
        };
        self.next_due = None;
        self.sample_interval = request.sample_interval.max(1) as u64;
        self.produced = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<DecodedFrame, DecodeError> {
        if self.files.is_empty() {
            return Err(DecodeError::EndOfStream);
        }
        if self.index >= self.files.len() {
            self.passes += 1;
            if !self.loop_count.allows(self.passes) {
                return Err(DecodeError::EndOfStream);
            }
            self.index = 0;
        }
        self.pace();

        let path = &self.files[self.index];
        self.index += 1;
        let data = std::fs::read(path)
            .map_err(|e| DecodeError::Failed(format!("{}: {}", path.display(), e)))?;

        let filtered = self.produced % self.sample_interval != 0;
        self.produced += 1;
        Ok(DecodedFrame::new(MediaBuffer::new(data, 0, 0, PixelFormat::Encoded)).filtered(filtered))
    }

    fn close(&mut self) {
        self.files.clear();
        self.index = 0;
    }
}

struct UnsupportedDecoder {
    source_type: SourceType,
}

impl MediaDecoder for UnsupportedDecoder {
    fn init(&mut self, request: &ChannelRequest) -> anyhow::Result<()> {
        anyhow::bail!(
            "no decoder available for {:?} source {}",
            self.source_type,
            request.url
        )
    }

    fn next(&mut self) -> Result<DecodedFrame, DecodeError> {
        Err(DecodeError::EndOfStream)
    }

    fn close(&mut self) {}
}

/// Image directories are decoded in-process; codec-backed sources need an external factory.
#[derive(Default)]
pub struct DefaultDecoderFactory;

impl DecoderFactory for DefaultDecoderFactory {
    fn create(&self, request: &ChannelRequest) -> Box<dyn MediaDecoder> {
        match request.source_type {
            SourceType::ImgDir => Box::new(ImageDirDecoder::new()),
            source_type => Box::new(UnsupportedDecoder { source_type }),
        }
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
