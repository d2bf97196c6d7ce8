//! H.264 decode and display through GStreamer.
//!
//! # Decoder priority
//! 1. `v4l2h264dec`   V4L2 stateful decoder (Raspberry Pi 4 and most SBCs)
//! 2. `omxh264dec`    OpenMAX IL (older Broadcom firmware)
//! 3. `vaapih264dec`  Intel/AMD VA-API
//! 4. `nvh264dec`     NVIDIA NVDEC
//! 5. `avdec_h264`    software libavcodec, last resort
//!
//! # Pipeline
//! ```text
//! appsrc → h264parse → queue → [decoder] → videoconvert → autovideosink
//! ```

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use pistream_core::{DecodeUnit, SinkError, StreamConfiguration};
use tracing::{debug, info, warn};

use crate::{flags, VideoRenderer};

static DECODER_PRIORITY: &[(&str, &str)] = &[
    ("v4l2h264dec",  "V4L2 hardware H.264"),
    ("omxh264dec",   "OpenMAX H.264"),
    ("vaapih264dec", "VA-API H.264"),
    ("nvh264dec",    "NVIDIA NVDEC H.264"),
    ("avdec_h264",   "Software libavcodec (last resort)"),
];

const SOFTWARE_DECODER: &str = "avdec_h264";

/// Highest-priority H.264 decoder element installed on this machine.
pub fn probe_best_decoder() -> Option<&'static str> {
    if gst::init().is_err() {
        return None;
    }
    for (element, label) in DECODER_PRIORITY {
        if gst::ElementFactory::find(element).is_some() {
            info!("Selected decoder: {} ({})", element, label);
            return Some(element);
        }
        debug!("Decoder '{}' not found, trying next", element);
    }
    None
}

pub(crate) fn pipeline_description(decoder: &str, flags: u32) -> String {
    let queue = if flags & flags::PREFER_QUALITY != 0 {
        "queue"
    } else {
        // keep only the newest frame when the decoder falls behind
        "queue leaky=downstream max-size-buffers=1 max-size-bytes=0 max-size-time=0"
    };
    format!(
        "appsrc name=src format=time is-live=true do-timestamp=false \
         ! h264parse \
         ! {queue} \
         ! {decoder} \
         ! videoconvert \
         ! autovideosink sync=false"
    )
}

struct Pipeline {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    frame_interval_us: u64,
}

pub struct GstVideoRenderer {
    inner: Option<Pipeline>,
    element: Option<&'static str>,
}

impl GstVideoRenderer {
    pub fn new() -> Self {
        Self { inner: None, element: None }
    }

    pub fn element_name(&self) -> Option<&str> {
        self.element
    }

    pub fn is_hardware_accelerated(&self) -> bool {
        self.element.map_or(false, |e| e != SOFTWARE_DECODER)
    }
}

impl Default for GstVideoRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoRenderer for GstVideoRenderer {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn setup(&mut self, config: &StreamConfiguration, flags: u32) -> Result<(), SinkError> {
        gst::init().map_err(|e| SinkError::Pipeline(e.to_string()))?;
        let element = probe_best_decoder()
            .ok_or_else(|| SinkError::Unavailable("no H.264 decoder element installed".into()))?;

        let description = pipeline_description(element, flags);
        let pipeline = gst::parse::launch(&description)
            .map_err(|e| SinkError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| SinkError::Pipeline("Not a pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<AppSrc>().ok())
            .ok_or_else(|| SinkError::Pipeline("No appsrc".into()))?;

        // Annex-B access units, one per buffer
        let caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .field("width", config.width() as i32)
            .field("height", config.height() as i32)
            .field("framerate", gst::Fraction::new(config.refresh_hz() as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));

        info!("GStreamer video sink ready: {} {}", element, config);
        self.element = Some(element);
        self.inner = Some(Pipeline { pipeline, appsrc, frame_interval_us: config.frame_interval_us() });
        Ok(())
    }

    fn start(&mut self) -> Result<(), SinkError> {
        let inner = self.inner.as_ref().ok_or(SinkError::NotInitialized)?;
        inner
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| SinkError::Pipeline("Failed to start pipeline".into()))?;
        Ok(())
    }

    fn submit_decode_unit(&mut self, unit: DecodeUnit) -> Result<(), SinkError> {
        let inner = self.inner.as_ref().ok_or(SinkError::NotInitialized)?;
        let pts = unit.frame_index as u64 * inner.frame_interval_us;

        let mut buffer = gst::Buffer::from_slice(unit.data);
        buffer.make_mut().set_pts(gst::ClockTime::from_useconds(pts));

        inner
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| SinkError::Pipeline(format!("appsrc push failed: {e:?}")))?;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(inner) = self.inner.as_ref() {
            let _ = inner.appsrc.end_of_stream();
            if inner.pipeline.set_state(gst::State::Null).is_err() {
                warn!("Video pipeline did not reach NULL cleanly");
            }
        }
    }

    fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.pipeline.set_state(gst::State::Null);
            debug!("Video pipeline released");
        }
    }
}

impl Drop for GstVideoRenderer {
    fn drop(&mut self) {
        self.release();
    }
}
