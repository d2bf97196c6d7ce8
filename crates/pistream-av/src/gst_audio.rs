//! Opus decode and ALSA playback through GStreamer.
//!
//! ```text
//! appsrc (audio/x-opus) → opusdec → audioconvert → audioresample → alsasink
//! ```

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use pistream_core::{AudioUnit, SinkError};
use tracing::{debug, info, warn};

use crate::AudioRenderer;

pub const SAMPLE_RATE: i32 = 48_000;
pub const CHANNELS: i32 = 2;
/// The host sends 5 ms Opus frames.
const PACKET_DURATION_US: u64 = 5_000;

pub(crate) fn pipeline_description(device: &str) -> String {
    format!(
        "appsrc name=src format=time is-live=true \
         ! opusdec \
         ! audioconvert \
         ! audioresample \
         ! alsasink device=\"{device}\" sync=false"
    )
}

struct Pipeline {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
}

pub struct GstAudioRenderer {
    device: String,
    inner: Option<Pipeline>,
    first_sequence: Option<u16>,
}

impl GstAudioRenderer {
    pub fn new(device: String) -> Self {
        Self { device, inner: None, first_sequence: None }
    }
}

impl AudioRenderer for GstAudioRenderer {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn setup(&mut self) -> Result<(), SinkError> {
        gst::init().map_err(|e| SinkError::Pipeline(e.to_string()))?;
        for element in ["opusdec", "alsasink"] {
            if gst::ElementFactory::find(element).is_none() {
                return Err(SinkError::Unavailable(format!("GStreamer element '{element}' missing")));
            }
        }

        let pipeline = gst::parse::launch(&pipeline_description(&self.device))
            .map_err(|e| SinkError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| SinkError::Pipeline("Not a pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<AppSrc>().ok())
            .ok_or_else(|| SinkError::Pipeline("No appsrc".into()))?;

        let caps = gst::Caps::builder("audio/x-opus")
            .field("rate", SAMPLE_RATE)
            .field("channels", CHANNELS)
            .field("channel-mapping-family", 0i32)
            .build();
        appsrc.set_caps(Some(&caps));

        info!("GStreamer audio sink ready on ALSA device '{}'", self.device);
        self.inner = Some(Pipeline { pipeline, appsrc });
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

    fn play_decoded_samples(&mut self, unit: AudioUnit) -> Result<(), SinkError> {
        let inner = self.inner.as_ref().ok_or(SinkError::NotInitialized)?;
        let first = *self.first_sequence.get_or_insert(unit.sequence);
        let index = unit.sequence.wrapping_sub(first) as u64;

        let mut buffer = gst::Buffer::from_slice(unit.data);
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(gst::ClockTime::from_useconds(index * PACKET_DURATION_US));
            buffer.set_duration(gst::ClockTime::from_useconds(PACKET_DURATION_US));
        }

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
                warn!("Audio pipeline did not reach NULL cleanly");
            }
        }
    }

    fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.pipeline.set_state(gst::State::Null);
            debug!("Audio pipeline released");
        }
        self.first_sequence = None;
    }
}

impl Drop for GstAudioRenderer {
    fn drop(&mut self) {
        self.release();
    }
}
