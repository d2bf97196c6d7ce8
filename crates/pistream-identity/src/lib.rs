//! pistream-identity: who this client is to the host.
//!
//! The host keys its pairing records on the unique id and the client
//! certificate, so both are created once and persisted in the per-user store.

pub mod der;
pub mod mac;
pub mod material;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use pistream_core::IdentityError;
use tracing::{info, warn};

pub use material::IdentityMaterial;
pub use store::{default_store_dir, IdentityRecord, IdentityStore};

pub const DEFAULT_DEVICE_NAME: &str = "pistream";
pub const MAX_DEVICE_NAME_BYTES: usize = 32;

/// Identity as seen by the control plane and the pairing manager.
pub trait IdentityProvider: Send + Sync {
    fn device_name(&self) -> &str;

    /// Fails with `NoNetworkInterface` when no hardware address is usable.
    fn unique_id(&self) -> Result<String, IdentityError>;

    fn credentials(&self) -> &IdentityMaterial;
}

/// Identity backed by sysfs and the on-disk store.
pub struct LocalIdentity {
    device_name: String,
    unique_id: Option<String>,
    material: IdentityMaterial,
}

impl LocalIdentity {
    /// Loads the stored identity, creating and persisting whatever is missing.
    ///
    /// `store_dir = None` keeps everything in memory.
    pub fn load_or_create(store_dir: Option<&Path>, net_root: &Path) -> Result<Self, IdentityError> {
        let store = store_dir.map(IdentityStore::new);
        let record = store.as_ref().and_then(IdentityStore::load_record);

        let device_name = record
            .as_ref()
            .map(|r| r.device_name.clone())
            .unwrap_or_else(local_device_name);

        let unique_id = match record.as_ref() {
            Some(r) if !r.unique_id.is_empty() => Some(r.unique_id.clone()),
            _ => match mac::unique_id_from(net_root) {
                Ok(id) => {
                    if let Some(store) = &store {
                        store.save_record(&IdentityRecord {
                            unique_id: id.clone(),
                            device_name: device_name.clone(),
                        })?;
                    }
                    Some(id)
                }
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            },
        };

        let material = match store.as_ref().and_then(IdentityStore::load_pem) {
            Some((cert, key)) => IdentityMaterial::from_pem(&cert, &key)?,
            None => {
                let material = IdentityMaterial::generate()?;
                if let Some(store) = &store {
                    store.save_pem(material.cert_pem(), material.key_pem())?;
                    info!("Client identity stored in {}", store.dir().display());
                }
                material
            }
        };

        Ok(Self { device_name, unique_id, material })
    }

    /// Identity from explicit parts; used by tests and embedders.
    pub fn from_parts(
        device_name: impl Into<String>,
        unique_id: Option<String>,
        material: IdentityMaterial,
    ) -> Self {
        Self { device_name: device_name.into(), unique_id, material }
    }
}

impl IdentityProvider for LocalIdentity {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn unique_id(&self) -> Result<String, IdentityError> {
        self.unique_id.clone().ok_or(IdentityError::NoNetworkInterface)
    }

    fn credentials(&self) -> &IdentityMaterial {
        &self.material
    }
}

static GLOBAL: OnceLock<Arc<LocalIdentity>> = OnceLock::new();

/// Process-wide identity from the default store and `/sys/class/net`.
pub fn global() -> Result<Arc<LocalIdentity>, IdentityError> {
    if let Some(identity) = GLOBAL.get() {
        return Ok(identity.clone());
    }
    let store_dir: Option<PathBuf> = default_store_dir();
    let identity = Arc::new(LocalIdentity::load_or_create(
        store_dir.as_deref(),
        Path::new(mac::SYSFS_NET),
    )?);
    // a concurrent initialiser may have won; theirs is kept
    Ok(GLOBAL.get_or_init(|| identity).clone())
}

/// Hostname clipped to 32 bytes on a char boundary, or `pistream`.
pub fn local_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| clip_device_name(h.trim()))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_owned())
}

fn clip_device_name(name: &str) -> String {
    let mut end = name.len().min(MAX_DEVICE_NAME_BYTES);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_owned()
}
