//! pistream-session: one streaming session from preflight to teardown.
//!
//! [`Supervisor`] composes the input pipeline, the A/V sinks and a
//! [`Connection`](pistream_transport::Connection), and reports progress to
//! a [`ConnectionListener`]. [`pair_with_host`] is the pairing entry point.

pub mod listener;
pub mod pair;
pub mod preflight;
pub mod supervisor;

pub use listener::{ConnectionListener, ListenerEvent, RecordingListener};
pub use pair::{pair_with_host, pin_prompt};
pub use preflight::{Check, Preflight};
pub use supervisor::{InputSource, SessionSpec, Supervisor};
