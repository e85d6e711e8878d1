mod channel;
mod error;
mod message;
mod traits;

pub use self::channel::*;
pub use self::error::{Error, Result};
pub use self::message::{RequestFrame, ResponseDescriptor, SendMode};
pub use self::traits::ByteChannel;
