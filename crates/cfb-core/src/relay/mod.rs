//! Bridge between conversation transcripts and a channel-based chat network.

pub mod bridge;
pub mod port;
pub mod types;
