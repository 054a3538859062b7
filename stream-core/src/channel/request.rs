use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    frame::{ElementId, Rect, StreamId},
};

pub const DEFAULT_FPS: f64 = 30.0;
pub const DEFAULT_BASE64_PORT: u16 = 12348;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Rtsp,
    Rtmp,
    Video,
    ImgDir,
    Base64,
    Gb28181,
    Camera,
}

impl SourceType {
    fn required_scheme(&self) -> Option<&'static str> {
        match self {
            SourceType::Rtsp => Some("rtsp://"),
            SourceType::Rtmp => Some("rtmp://"),
            SourceType::Gb28181 => Some("gb28181://"),
            _ => None,
        }
    }

    fn is_finite(&self) -> bool {
        matches!(self, SourceType::Video | SourceType::ImgDir)
    }
}

/// What the worker does with frames the decoder flagged as filtered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleStrategy {
    /// Suppress filtered frames (end-of-stream is always forwarded).
    #[default]
    Drop,
    Keep,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopCount {
    Finite(u32),
    Infinite,
}

impl LoopCount {
    pub fn from_loop_num(loop_num: u32) -> Self {
        if loop_num == 0 {
            LoopCount::Infinite
        } else {
            LoopCount::Finite(loop_num)
        }
    }

    /// True when another pass is allowed after `completed` passes.
    pub fn allows(&self, completed: u32) -> bool {
        match self {
            LoopCount::Finite(n) => completed < *n,
            LoopCount::Infinite => true,
        }
    }
}

/// Start request for one stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelRequest {
    pub channel_id: StreamId,
    pub url: String,
    pub source_type: SourceType,
    pub loop_count: LoopCount,
    pub fps: f64,
    pub sample_interval: u32,
    pub sample_strategy: SampleStrategy,
    /// Region of interest applied by decoders that crop at the source. The
    /// built-in image directory decoder passes frames through whole.
    pub roi: Option<Rect>,
    pub skip_elements: Vec<ElementId>,
    pub base64_port: u16,
}

#[derive(Deserialize)]
struct RawRoi {
    left: Option<i32>,
    top: Option<i32>,
    width: Option<i32>,
    height: Option<i32>,
}

#[derive(Deserialize)]
struct RawChannelRequest {
    channel_id: Option<StreamId>,
    url: Option<String>,
    source_type: Option<String>,
    loop_num: Option<u32>,
    fps: Option<f64>,
    sample_interval: Option<u32>,
    sample_strategy: Option<String>,
    roi: Option<RawRoi>,
    skip_element: Option<Vec<ElementId>>,
    base64_port: Option<u16>,
}

impl ChannelRequest {
    pub fn new(channel_id: StreamId, source_type: SourceType, url: impl Into<String>) -> Self {
        Self {
            channel_id,
            url: url.into(),
            source_type,
            loop_count: LoopCount::Finite(1),
            fps: DEFAULT_FPS,
            sample_interval: 1,
            sample_strategy: SampleStrategy::Drop,
            roi: None,
            skip_elements: Vec::new(),
            base64_port: DEFAULT_BASE64_PORT,
        }
    }

    pub fn with_loop_count(mut self, loop_count: LoopCount) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn with_sample_strategy(mut self, strategy: SampleStrategy) -> Self {
        self.sample_strategy = strategy;
        self
    }

    pub fn with_sample_interval(mut self, interval: u32) -> Self {
        self.sample_interval = interval.max(1);
        self
    }

    pub fn with_skip_elements(mut self, skip: Vec<ElementId>) -> Self {
        self.skip_elements = skip;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("channel request is not JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::config("channel request must be a JSON object"));
        }
        let raw: RawChannelRequest = serde_json::from_value(value)
            .map_err(|e| Error::config(format!("channel request: {}", e)))?;

        let channel_id = raw
            .channel_id
            .ok_or_else(|| Error::config("missing channel_id"))?;
        let url = raw.url.ok_or_else(|| Error::config("missing url"))?;
        let source_type = raw
            .source_type
            .ok_or_else(|| Error::config("missing source_type"))?;
        let source_type: SourceType =
            serde_json::from_value(serde_json::Value::String(source_type.clone())).map_err(|_| {
                Error::config(format!(
                    "source_type {:?} error, expected RTSP, RTMP, VIDEO, IMG_DIR, BASE64, GB28181 or CAMERA",
                    source_type
                ))
            })?;

        if let Some(scheme) = source_type.required_scheme() {
            if !url.starts_with(scheme) {
                return Err(Error::config(format!(
                    "{:?} url must start with {}: {}",
                    source_type, scheme, url
                )));
            }
        }

        let base64_port = match (source_type, raw.base64_port) {
            (SourceType::Base64, None) => {
                return Err(Error::config("BASE64 source requires base64_port"));
            }
            (_, Some(port)) => port,
            (_, None) => DEFAULT_BASE64_PORT,
        };

        let loop_count = if source_type.is_finite() {
            let loop_num = raw
                .loop_num
                .ok_or_else(|| Error::config(format!("{:?} source requires loop_num", source_type)))?;
            LoopCount::from_loop_num(loop_num)
        } else {
            LoopCount::Finite(1)
        };

        let fps = raw.fps.unwrap_or(DEFAULT_FPS);
        if !fps.is_finite() || fps < 0.0 {
            return Err(Error::config(format!("invalid fps {}", fps)));
        }
        if fps > 0.0 && Duration::try_from_secs_f64(1.0 / fps).is_err() {
            return Err(Error::config(format!("fps {} is too small", fps)));
        }

        let sample_interval = raw.sample_interval.unwrap_or(1);
        if sample_interval == 0 {
            return Err(Error::config("sample_interval must be at least 1"));
        }

        let sample_strategy = match raw.sample_strategy.as_deref() {
            Some("KEEP") => SampleStrategy::Keep,
            Some("DROP") | None => SampleStrategy::Drop,
            Some(other) => {
                log::warn!("unknown sample_strategy {:?}, using DROP", other);
                SampleStrategy::Drop
            }
        };

        let roi = match raw.roi {
            None => None,
            Some(roi) => {
                let field = |v: Option<i32>, name: &str| {
                    v.ok_or_else(|| Error::config(format!("roi missing {}", name)))
                };
                let rect = Rect::new(
                    field(roi.left, "left")?,
                    field(roi.top, "top")?,
                    field(roi.width, "width")?,
                    field(roi.height, "height")?,
                );
                if rect.width <= 0 || rect.height <= 0 {
                    return Err(Error::config(format!("roi has empty size: {:?}", rect)));
                }
                Some(rect)
            }
        };

        Ok(Self {
            channel_id,
            url,
            source_type,
            loop_count,
            fps,
            sample_interval,
            sample_strategy,
            roi,
            skip_elements: raw.skip_element.unwrap_or_default(),
            base64_port,
        })
    }
}

#[cfg(test)]
#[path = "request_test.rs"]
mod request_test;
