//! Direct TCP transport for peers that can reach each other's addresses.

pub mod candidate;
pub mod codec;
mod transport;

pub use codec::{Frame, MAX_FRAME_SIZE};
pub use transport::DirectTransport;
