//! pistream-input: local input capture.
//!
//! Keyboards, mice and gamepads are read from evdev, translated into host
//! input events and pushed into the shared [`InputQueue`] that the
//! connection's input stream drains.
//!
//! ## Lifecycle
//! [`InputPipeline::open`] opens and grabs every device up front so a bad
//! device fails the session before any network traffic. [`start`] spawns
//! one reader task per device; [`shutdown`] stops them and waits until every
//! device is released.
//!
//! [`start`]: InputPipeline::start
//! [`shutdown`]: InputPipeline::shutdown

pub mod device;
pub mod keymap;
pub mod mapping;
pub mod translate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pistream_core::{InputError, InputQueue};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use device::{OpenedDevice, DEV_INPUT};
pub use mapping::{GamepadMapping, LogicalAxis, LogicalButton};
pub use translate::{AxisRange, Capabilities, RawEvent, RawKind, Translator};

pub struct InputPipeline {
    pending: Vec<OpenedDevice>,
    names: Vec<String>,
    mapping: GamepadMapping,
    queue: Arc<InputQueue>,
    shutdown: watch::Sender<bool>,
    readers: Vec<JoinHandle<()>>,
}

impl InputPipeline {
    /// Opens `paths`, or every `/dev/input/event*` when `paths` is empty.
    pub fn open(
        paths: &[PathBuf],
        mapping: GamepadMapping,
        queue: Arc<InputQueue>,
    ) -> Result<Self, InputError> {
        Self::open_in(Path::new(DEV_INPUT), paths, mapping, queue)
    }

    /// [`open`](Self::open) with enumeration rooted at `dev_dir`.
    pub fn open_in(
        dev_dir: &Path,
        paths: &[PathBuf],
        mapping: GamepadMapping,
        queue: Arc<InputQueue>,
    ) -> Result<Self, InputError> {
        let devices = if paths.is_empty() {
            Self::open_all(dev_dir)?
        } else {
            // explicit devices must all work
            paths.iter().map(|p| device::open(p)).collect::<Result<Vec<_>, _>>()?
        };

        let names = devices.iter().map(|d| d.name.clone()).collect();
        let (shutdown, _) = watch::channel(false);
        Ok(Self { pending: devices, names, mapping, queue, shutdown, readers: Vec::new() })
    }

    fn open_all(dev_dir: &Path) -> Result<Vec<OpenedDevice>, InputError> {
        let mut opened = Vec::new();
        let mut denied = 0usize;
        let mut failed = 0usize;

        for path in device::enumerate(dev_dir) {
            match device::open(&path) {
                Ok(dev) => opened.push(dev),
                Err(InputError::Unsupported { .. }) => {}
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    failed += 1;
                    if matches!(e, InputError::Denied { .. }) {
                        denied += 1;
                    }
                }
            }
        }

        if opened.is_empty() {
            if failed > 0 && denied == failed {
                return Err(InputError::Denied { path: dev_dir.to_path_buf() });
            }
            return Err(InputError::NoDevices);
        }
        Ok(opened)
    }

    pub fn device_names(&self) -> &[String] {
        &self.names
    }

    pub fn queue(&self) -> &Arc<InputQueue> {
        &self.queue
    }

    /// Spawns one reader per opened device. Must run inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), InputError> {
        for dev in self.pending.drain(..) {
            let translator = Translator::new(dev.caps, &self.mapping, dev.ranges);
            let stream = dev
                .device
                .into_event_stream()
                .map_err(|e| device::map_io_error(&dev.path, e))?;
            let queue = self.queue.clone();
            let shutdown = self.shutdown.subscribe();
            let name = dev.name;
            self.readers.push(tokio::spawn(read_device(stream, translator, queue, shutdown, name)));
        }
        info!("Input capture started on {} device(s)", self.readers.len());
        Ok(())
    }

    /// Stops every reader and waits for them, so all devices are ungrabbed
    /// and closed on return. Closes the queue.
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        for reader in self.readers.drain(..) {
            if let Err(e) = reader.await {
                warn!("Input reader ended abnormally: {}", e);
            }
        }
        // never-started devices are released here
        self.pending.clear();
        self.queue.close();
        debug!("Input capture stopped");
    }
}

async fn read_device(
    mut stream: evdev::EventStream,
    mut translator: Translator,
    queue: Arc<InputQueue>,
    mut shutdown: watch::Receiver<bool>,
    name: String,
) {
    let mut out = Vec::with_capacity(4);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            ev = stream.next_event() => match ev {
                Ok(ev) => {
                    translator.translate(RawEvent::from(&ev), &mut out);
                    for event in out.drain(..) {
                        queue.push(event);
                    }
                }
                Err(e) => {
                    warn!("{}: read failed, device dropped: {}", name, e);
                    break;
                }
            },
        }
    }
    // closing the fd releases the grab
    drop(stream);
    debug!("{}: reader stopped", name);
}
