//! Single-socket venue stream manager (component C7): dial, reconnect with backoff, rate
//! limited control frames, and a concrete Binance Spot wire adapter.

pub mod binance;
mod error;
mod frames;
mod manager;
mod ratelimit;

pub use error::StreamError;
pub use frames::{
    chunk_control_frames, parse_control_response, ControlFrame, ControlMethod, ControlResponse, ControlResponseError,
    MAX_STREAMS_PER_FRAME,
};
pub use manager::{MessageHandler, VenueStreamManager};
pub use ratelimit::ControlRateLimiter;
