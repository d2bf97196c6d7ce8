//! pistream-control: the host's HTTP(S) control plane.
//!
//! [`HostClient`] issues the control requests (server info, app list,
//! launch, resume, quit, unpair). [`PairingManager`] runs the PIN exchange
//! over anything implementing [`PairingChannel`].

pub mod client;
pub mod crypto;
pub mod hex;
pub mod pairing;
pub mod tls;
pub mod xml;

pub use client::{AppEntry, HostClient, ServerInfo, HTTPS_PORT, HTTP_PORT, REQUEST_TIMEOUT};
pub use pairing::{generate_pin, PairingChannel, PairingManager, PIN_ENTRY_TIMEOUT};
pub use xml::XmlResponse;
