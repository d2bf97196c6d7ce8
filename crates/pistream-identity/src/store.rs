//! Per-user identity store: `identity.json`, `client.pem`, `client.key`.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use pistream_core::IdentityError;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const RECORD_FILE: &str = "identity.json";
pub const CERT_FILE: &str = "client.pem";
pub const KEY_FILE: &str = "client.key";

/// What is remembered between runs besides the PEM files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub unique_id: String,
    pub device_name: String,
}

/// `PISTREAM_CONFIG_DIR` when set, otherwise the platform config directory
/// (`$XDG_CONFIG_HOME/pistream` on Linux).
pub fn default_store_dir() -> Option<PathBuf> {
    store_dir_from(std::env::var_os("PISTREAM_CONFIG_DIR"), project_config_dir)
}

fn project_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "pistream").map(|dirs| dirs.config_dir().to_path_buf())
}

pub(crate) fn store_dir_from(
    override_dir: Option<OsString>,
    platform_dir: impl FnOnce() -> Option<PathBuf>,
) -> Option<PathBuf> {
    match override_dir.filter(|v| !v.is_empty()) {
        Some(dir) => Some(PathBuf::from(dir)),
        None => platform_dir(),
    }
}

pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_record(&self) -> Option<IdentityRecord> {
        let path = self.dir.join(RECORD_FILE);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Ignoring unreadable {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save_record(&self, record: &IdentityRecord) -> Result<(), IdentityError> {
        let path = self.dir.join(RECORD_FILE);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| IdentityError::Crypto(e.to_string()))?;
        self.write_private(&path, json.as_bytes())
    }

    /// `(cert_pem, key_pem)` when both files are present.
    pub fn load_pem(&self) -> Option<(String, String)> {
        let cert = fs::read_to_string(self.dir.join(CERT_FILE)).ok()?;
        let key = fs::read_to_string(self.dir.join(KEY_FILE)).ok()?;
        Some((cert, key))
    }

    pub fn save_pem(&self, cert_pem: &str, key_pem: &str) -> Result<(), IdentityError> {
        self.write_private(&self.dir.join(CERT_FILE), cert_pem.as_bytes())?;
        self.write_private(&self.dir.join(KEY_FILE), key_pem.as_bytes())
    }

    fn write_private(&self, path: &Path, contents: &[u8]) -> Result<(), IdentityError> {
        let store_err = |source| IdentityError::Store { path: path.to_path_buf(), source };

        fs::create_dir_all(&self.dir).map_err(store_err)?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(store_err)?;
        file.write_all(contents).map_err(store_err)?;

        // mode() only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(store_err)?;
        }
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_dir_wins() {
        let dir = store_dir_from(Some(OsString::from("/custom")), || {
            Some(PathBuf::from("/home/pi/.config/pistream"))
        });
        assert_eq!(dir, Some(PathBuf::from("/custom")));
    }

    #[test]
    fn empty_override_falls_back_to_platform_dir() {
        let platform = || Some(PathBuf::from("/home/pi/.config/pistream"));
        assert_eq!(
            store_dir_from(Some(OsString::new()), platform),
            Some(PathBuf::from("/home/pi/.config/pistream"))
        );
        assert_eq!(store_dir_from(None, || None), None);
    }

    #[test]
    fn platform_dir_is_named_after_the_client() {
        if let Some(dir) = project_config_dir() {
            assert!(dir.ends_with("pistream"), "{}", dir.display());
        }
    }

    #[test]
    fn record_round_trip_and_permissions() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(tmp.path().join("nested"));
        let record = IdentityRecord {
            unique_id: "b827eb000001".into(),
            device_name: "raspberrypi".into(),
        };
        store.save_record(&record).unwrap();
        assert_eq!(store.load_record(), Some(record));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.dir().join(RECORD_FILE)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn missing_pem_pair_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(tmp.path());
        fs::write(tmp.path().join(CERT_FILE), "cert").unwrap();
        assert!(store.load_pem().is_none());
    }
}
