//! Sandboxed scripting host — §4.9. Two VM flavors share the same security,
//! event, timer, and binding machinery: [`resource::ResourceHost`] (server,
//! trusted, single VM hosting many resources) and
//! [`client_resource::ClientResourceRuntime`] (client, sandboxed, no
//! cross-resource exports proxy).

pub mod bindings;
pub mod client_resource;
pub mod event_bus;
pub mod packet_builder;
pub mod resource;
pub mod security;
pub mod timer;

pub use bindings::{install_common_bindings, install_server_bindings, install_vec3_bindings, CurrentResourceFn, DiscordActivityArgs};
pub use client_resource::{ClientResourceRuntime, ResourcePayload};
pub use event_bus::{EventManager, SubscriptionId};
pub use packet_builder::{Packet, PacketDestination};
pub use resource::{ResourceHost, ResourceMeta};
pub use security::SecurityPolicy;
pub use timer::{TimerId, TimerManager};
