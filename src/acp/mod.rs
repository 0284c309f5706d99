//! Agent Client Protocol: NDJSON wire codec, transport client, and process
//! spawning for the long-lived agent subprocess.

pub mod client;
pub mod codec;
pub mod spawner;

pub use client::{AcpClient, PermissionDecision, PermissionRequest, Subscription};
pub use codec::{AcpCodec, ResponseError, WireMessage};
pub use spawner::{spawn_agent, AcpConnection, SpawnConfig};
