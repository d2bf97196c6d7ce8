pub mod config;
pub mod errors;
pub mod input;
pub mod types;

pub use config::StreamConfiguration;
pub use errors::*;
pub use input::{ControllerState, InputEvent, InputQueue, MouseButton};
pub use types::*;
