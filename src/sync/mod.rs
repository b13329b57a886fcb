//! Session plumbing: the socket abstraction and the async driver that runs
//! a pairing session over it.

mod driver;
mod transport;

pub use driver::{DriverContext, DriverHandle, SessionDriver};
pub use transport::{ChannelTransport, FrameTransport};
