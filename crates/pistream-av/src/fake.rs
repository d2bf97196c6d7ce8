//! Debug sinks: video is appended to a file as a raw H.264 elementary
//! stream, audio is counted and discarded.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use pistream_core::{AudioUnit, DecodeUnit, SinkError, StreamConfiguration};
use tracing::{debug, info};

use crate::{AudioRenderer, VideoRenderer};

pub struct FakeVideoRenderer {
    path: PathBuf,
    file: Option<File>,
    units: u64,
    bytes: u64,
}

impl FakeVideoRenderer {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None, units: 0, bytes: 0 }
    }

    pub fn units_written(&self) -> u64 {
        self.units
    }
}

impl VideoRenderer for FakeVideoRenderer {
    fn name(&self) -> &str {
        "fake"
    }

    fn setup(&mut self, config: &StreamConfiguration, _flags: u32) -> Result<(), SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        info!("Fake video sink writing {} to {}", config, self.path.display());
        self.file = Some(file);
        Ok(())
    }

    fn start(&mut self) -> Result<(), SinkError> {
        if self.file.is_none() {
            return Err(SinkError::NotInitialized);
        }
        Ok(())
    }

    fn submit_decode_unit(&mut self, unit: DecodeUnit) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or(SinkError::NotInitialized)?;
        file.write_all(&unit.data)?;
        self.units += 1;
        self.bytes += unit.data.len() as u64;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }

    fn release(&mut self) {
        if self.file.take().is_some() {
            debug!("Fake video sink closed after {} units ({} bytes)", self.units, self.bytes);
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeAudioRenderer {
    started: bool,
    units: u64,
}

impl FakeAudioRenderer {
    pub fn units_played(&self) -> u64 {
        self.units
    }
}

impl AudioRenderer for FakeAudioRenderer {
    fn name(&self) -> &str {
        "fake"
    }

    fn setup(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), SinkError> {
        self.started = true;
        Ok(())
    }

    fn play_decoded_samples(&mut self, _unit: AudioUnit) -> Result<(), SinkError> {
        if self.started {
            self.units += 1;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn unit(index: u32, data: &'static [u8]) -> DecodeUnit {
        DecodeUnit { frame_index: index, data: Bytes::from_static(data) }
    }

    #[test]
    fn video_is_appended_to_the_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.h264");
        std::fs::write(&path, b"old").unwrap();

        let mut sink = FakeVideoRenderer::new(path.clone());
        sink.setup(&StreamConfiguration::default(), 0).unwrap();
        sink.start().unwrap();
        sink.submit_decode_unit(unit(0, b"\x00\x00\x00\x01\x67")).unwrap();
        sink.submit_decode_unit(unit(1, b"\x00\x00\x00\x01\x65")).unwrap();
        sink.stop();
        sink.release();

        assert_eq!(sink.units_written(), 2);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"old\x00\x00\x00\x01\x67\x00\x00\x00\x01\x65".to_vec()
        );
    }

    #[test]
    fn output_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.h264");
        let mut sink = FakeVideoRenderer::new(path.clone());
        sink.setup(&StreamConfiguration::default(), 0).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn submit_before_setup_fails() {
        let mut sink = FakeVideoRenderer::new(PathBuf::from("/nonexistent/x.h264"));
        assert!(matches!(sink.start(), Err(SinkError::NotInitialized)));
        assert!(matches!(sink.submit_decode_unit(unit(0, b"x")), Err(SinkError::NotInitialized)));
        // stop/release on an unset sink are no-ops
        sink.stop();
        sink.release();
    }

    #[test]
    fn audio_counts_only_while_started() {
        let mut sink = FakeAudioRenderer::default();
        let au = AudioUnit { sequence: 1, timestamp: 0, data: Bytes::from_static(b"opus") };
        sink.setup().unwrap();
        sink.play_decoded_samples(au.clone()).unwrap();
        sink.start().unwrap();
        sink.play_decoded_samples(au.clone()).unwrap();
        sink.stop();
        sink.play_decoded_samples(au).unwrap();
        assert_eq!(sink.units_played(), 1);
    }
}
