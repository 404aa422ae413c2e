//! WebSocket delivery of live job progress.
//!
//! Provides the per-job upgrade handler and the heartbeat task that pings
//! every open subscriber.

mod handler;
mod heartbeat;

pub use handler::{job_ws_handler, to_ws_message};
pub use heartbeat::{start_heartbeat, start_heartbeat_every, HEARTBEAT_INTERVAL};
