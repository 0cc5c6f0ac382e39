pub mod constants;
pub mod error;
pub mod frame;
pub mod handshake;

pub use constants::*;
pub use error::ProtocolError;
pub use frame::{Command, Frame, FrameHeader};
