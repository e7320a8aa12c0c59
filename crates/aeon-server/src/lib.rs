//! Authoritative multiplayer game server core — §4.3-§4.5, §4.12-§4.14.
//! Binds the player registry, wire dispatcher, tick loop, ban list,
//! scheduler, and public-list heartbeat into one [`server::ServerContext`].

pub mod ban_manager;
pub mod combat;
pub mod dispatch;
pub mod heartbeat;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod tick;

pub use ban_manager::BanManager;
pub use dispatch::{handle_inbound_event, DispatchContext};
pub use heartbeat::HeartbeatWorker;
pub use registry::PlayerRegistry;
pub use scheduler::TaskScheduler;
pub use server::ServerContext;
pub use tick::TickEngine;
