//! Opening, classifying and grabbing `/dev/input/event*` devices.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use evdev::{AbsoluteAxisType, Device, Key, RelativeAxisType};
use pistream_core::InputError;
use tracing::{debug, info};

use crate::translate::{AxisRange, Capabilities};

pub const DEV_INPUT: &str = "/dev/input";

/// `event*` nodes under `dir`, in event-number order.
pub fn enumerate(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        debug!("Cannot list {}", dir.display());
        return Vec::new();
    };
    let mut nodes: Vec<(u32, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            let number = name.strip_prefix("event")?.parse().ok()?;
            Some((number, e.path()))
        })
        .collect();
    nodes.sort();
    nodes.into_iter().map(|(_, path)| path).collect()
}

pub(crate) fn map_io_error(path: &Path, e: io::Error) -> InputError {
    let path = path.to_path_buf();
    match e.kind() {
        io::ErrorKind::NotFound => InputError::NotFound { path },
        io::ErrorKind::PermissionDenied => InputError::Denied { path },
        _ if e.raw_os_error() == Some(libc::EBUSY) => InputError::Busy { path },
        _ => InputError::Io(e),
    }
}

pub fn capabilities(device: &Device) -> Capabilities {
    let keys = device.supported_keys();
    let has_key = |k: Key| keys.map_or(false, |set| set.contains(k));
    let has_rel = |a: RelativeAxisType| {
        device.supported_relative_axes().map_or(false, |set| set.contains(a))
    };
    let has_abs = |a: AbsoluteAxisType| {
        device.supported_absolute_axes().map_or(false, |set| set.contains(a))
    };

    Capabilities {
        keyboard: has_key(Key::KEY_A) && has_key(Key::KEY_Z),
        mouse: has_rel(RelativeAxisType::REL_X) && has_key(Key::BTN_LEFT),
        gamepad: has_key(Key::BTN_SOUTH)
            || (has_abs(AbsoluteAxisType::ABS_X) && has_key(Key::BTN_TRIGGER)),
    }
}

fn axis_ranges(device: &Device) -> HashMap<u16, AxisRange> {
    let mut ranges = HashMap::new();
    let (Some(axes), Ok(state)) = (device.supported_absolute_axes(), device.get_abs_state()) else {
        return ranges;
    };
    for axis in axes.iter() {
        if let Some(info) = state.get(axis.0 as usize) {
            ranges.insert(axis.0, AxisRange::new(info.minimum, info.maximum, info.flat));
        }
    }
    ranges
}

/// A grabbed device ready to be read.
pub struct OpenedDevice {
    pub path: PathBuf,
    pub name: String,
    pub caps: Capabilities,
    pub ranges: HashMap<u16, AxisRange>,
    pub(crate) device: Device,
}

impl std::fmt::Debug for OpenedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedDevice")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("caps", &self.caps)
            .finish()
    }
}

/// Opens `path`, rejects devices that are none of keyboard, mouse or
/// gamepad, and grabs it exclusively.
pub fn open(path: &Path) -> Result<OpenedDevice, InputError> {
    let mut device = Device::open(path).map_err(|e| map_io_error(path, e))?;
    let name = device.name().unwrap_or("unnamed").to_owned();

    let caps = capabilities(&device);
    if !caps.is_usable() {
        debug!("{} ({}) is not an input we forward", path.display(), name);
        return Err(InputError::Unsupported { path: path.to_path_buf() });
    }

    device.grab().map_err(|e| map_io_error(path, e))?;
    let ranges = axis_ranges(&device);
    info!("Opened {} ({}) as {:?}", path.display(), name, caps);

    Ok(OpenedDevice { path: path.to_path_buf(), name, caps, ranges, device })
}
