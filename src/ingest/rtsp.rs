//! Network camera source.
//!
//! `RtspSource` decodes camera streams with GStreamer (`uridecodebin`, so
//! RTSP, HTTP and file URIs all work) into RGB frames. URLs starting with
//! `stub://` use a synthetic scene generator instead, which needs no camera
//! and no GStreamer installation.
//!
//! Every blocking read is bounded by `RtspConfig::read_timeout`; a stalled
//! stream surfaces as a read error so the worker can reconnect.

use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use anyhow::{anyhow, Context};
#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;
use rand::Rng;
use std::time::Duration;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Instant;

use crate::config::{redact_url, CameraConfig, PipelineSettings};
use crate::error::SentinelError;
use crate::frame::Frame;

use super::{FrameSource, SourceConnector, SourceStats};

const STUB_SCHEME: &str = "stub://";

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    pub url: String,
    /// Synthetic frame width (GStreamer streams report their own size).
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
    /// Longest wait for one decoded frame before the read fails.
    pub read_timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "stub://default".to_string(),
            width: 640,
            height: 480,
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl RtspConfig {
    pub fn is_synthetic(&self) -> bool {
        self.url.starts_with(STUB_SCHEME)
    }
}

/// Camera stream source.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.is_synthetic() {
            return Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticSource::new(config)),
            });
        }
        #[cfg(feature = "rtsp-gstreamer")]
        {
            Ok(Self {
                backend: RtspBackend::Gstreamer(GstreamerSource::new(config)?),
            })
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            anyhow::bail!(
                "{} requires the rtsp-gstreamer feature",
                redact_url(&config.url)
            )
        }
    }

    /// True when this build can open `url`.
    pub fn supports(url: &str) -> bool {
        url.starts_with(STUB_SCHEME) || cfg!(feature = "rtsp-gstreamer")
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn disconnect(&mut self) {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.disconnect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.disconnect(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(),
        }
    }
}

/// Opens an `RtspSource` per camera using the pipeline frame settings.
#[derive(Clone, Debug)]
pub struct RtspConnector {
    width: u32,
    height: u32,
    read_timeout: Duration,
}

impl RtspConnector {
    pub fn new(settings: &PipelineSettings) -> Self {
        Self {
            width: settings.frame_width,
            height: settings.frame_height,
            read_timeout: settings.read_timeout,
        }
    }

    pub fn source_config(&self, url: &str) -> RtspConfig {
        RtspConfig {
            url: url.to_string(),
            width: self.width,
            height: self.height,
            read_timeout: self.read_timeout,
        }
    }
}

impl SourceConnector for RtspConnector {
    fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SentinelError> {
        if !RtspSource::supports(&camera.url) {
            return Err(SentinelError::UnsupportedSource {
                camera: camera.name.clone(),
                reason: format!(
                    "{} requires the rtsp-gstreamer feature",
                    camera.redacted_url()
                ),
            });
        }
        let source = RtspSource::new(self.source_config(&camera.url)).map_err(|e| {
            SentinelError::UnsupportedSource {
                camera: camera.name.clone(),
                reason: format!("{:#}", e),
            }
        })?;
        Ok(Box::new(source))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticSource {
    config: RtspConfig,
    connected: bool,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    fn new(config: RtspConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("RtspSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            anyhow::bail!("synthetic source {} is not connected", self.config.url);
        }
        self.frame_count += 1;
        let pixels = self.render_scene();
        Frame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Gradient background that shifts every 50 frames, with light noise.
    fn render_scene(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let shift = self.scene_state as usize * 17;
        let mut rng = rand::thread_rng();
        let mut pixels = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let noise: u8 = rng.gen_range(0..8);
                let base = ((x + y + shift) % 224) as u8;
                pixels.extend_from_slice(&[
                    base.wrapping_add(noise),
                    base / 2 + noise,
                    (255 - base).wrapping_sub(noise),
                ]);
            }
        }
        pixels
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer source
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerSource {
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "uridecodebin uri=\"{}\" ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url.replace('"', "%22")
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .with_context(|| format!("build pipeline for {}", redact_url(&config.url)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("camera pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            connected_at: None,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        self.last_error = None;
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start stream {}", redact_url(&self.config.url)))?;
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connected to {}", redact_url(&self.config.url));
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.poll_bus();
        if let Some(err) = self.last_error.take() {
            return Err(anyhow!(err));
        }

        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                self.config.read_timeout.as_millis() as u64,
            ))
            .ok_or_else(|| {
                anyhow!(
                    "no frame within {:?} (stream stalled or ended)",
                    self.config.read_timeout
                )
            })?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height, self.frame_count)
    }

    fn disconnect(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!(
                "RtspSource: failed to stop pipeline for {}: {}",
                redact_url(&self.config.url),
                err
            );
        }
        if let Some(since) = self.connected_at.take() {
            log::info!(
                "RtspSource: disconnected from {} after {:?} ({} frames)",
                redact_url(&self.config.url),
                since.elapsed(),
                self.frame_count
            );
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: redact_url(&self.config.url),
        }
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("stream reached end of stream".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map frame buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("frame buffer is shorter than its caps")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).context("frame row is out of bounds")?);
    }

    Ok((pixels, width, height))
}
