//! Server wiring — owns every long-lived piece (registry, scripting host,
//! ban list, heartbeat, tick engine) and drives the poll/dispatch/tick loop
//! that `GameServer::Run()` and its surrounding `main()` play in the
//! original (`gmp-server/lib/game_server.cpp`, `gmp-server/src/main.cpp`).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use aeon_common::config::ServerConfig;
use aeon_common::error::{CoreError, CoreResult};
use aeon_common::ids::PlayerId;
use aeon_protocol::opcode::GameInfoFlags;
use aeon_protocol::packets::{frame, DiscordActivityPacket, ServerMessagePacket};
use aeon_protocol::{Opcode, Priority, Reliability, TransportAdapter};
use aeon_script::bindings::DiscordActivityArgs;
use aeon_script::packet_builder::PacketDestination;
use aeon_script::ResourceHost;

use crate::ban_manager::BanManager;
use crate::dispatch::{self, DispatchContext};
use crate::heartbeat::HeartbeatWorker;
use crate::registry::PlayerRegistry;
use crate::scheduler::TaskScheduler;
use crate::tick::TickEngine;

/// `TransportAdapter::poll_events` takes `&mut self` while every other
/// method takes `&self`, so the callbacks handed to scripts (which need a
/// `'static + Send + Sync` handle) and the single polling owner share one
/// boxed transport behind a mutex rather than needing two separate
/// references to the same socket.
type SharedTransport = Arc<Mutex<Box<dyn TransportAdapter>>>;

/// Routes script-built [`aeon_script::packet_builder::Packet`] sends back
/// onto the real transport, resolving the script-facing `u32` player id
/// through the registry the way the original resolves a player id to a
/// `RakNet::SystemAddress` before sending.
struct RegistryPacketDestination {
    registry: Arc<PlayerRegistry>,
    transport: SharedTransport,
}

impl PacketDestination for RegistryPacketDestination {
    fn send_to_player(&self, player_id: u32, bytes: &[u8], reliability: Reliability) {
        let Some(player) = self.registry.get(PlayerId(player_id)) else {
            return;
        };
        self.transport
            .lock()
            .unwrap()
            .send(player.connection, bytes, Priority::Medium, reliability);
    }

    fn send_to_all(&self, bytes: &[u8], reliability: Reliability) {
        self.transport
            .lock()
            .unwrap()
            .broadcast(bytes, Priority::Medium, reliability);
    }
}

pub struct ServerContext {
    config: Arc<ServerConfig>,
    registry: Arc<PlayerRegistry>,
    transport: SharedTransport,
    host: ResourceHost,
    bans: BanManager,
    scheduler: TaskScheduler,
    heartbeat: Option<HeartbeatWorker>,
    tick_engine: TickEngine,
    clock: aeon_common::clock::GameClock,
    discord_activity: Arc<Mutex<Option<DiscordActivityPacket>>>,
    resources_root: PathBuf,
    last_tick: Instant,
}

impl ServerContext {
    pub fn new(
        config: ServerConfig,
        transport: Box<dyn TransportAdapter>,
        bans_path: PathBuf,
        resources_root: PathBuf,
    ) -> CoreResult<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(PlayerRegistry::new());
        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        let bans = BanManager::load(&bans_path)?;
        let host = ResourceHost::new().map_err(CoreError::from)?;
        let discord_activity: Arc<Mutex<Option<DiscordActivityPacket>>> = Arc::new(Mutex::new(None));

        let send_server_message: Arc<dyn Fn(&str) + Send + Sync> = {
            let transport = transport.clone();
            Arc::new(move |text: &str| {
                let packet = ServerMessagePacket { text: text.to_string() };
                let bytes = frame(Opcode::ServerMessage, &packet);
                transport
                    .lock()
                    .unwrap()
                    .broadcast(&bytes, Priority::Medium, Reliability::ReliableOrdered);
            })
        };

        let update_discord_activity: Arc<dyn Fn(DiscordActivityArgs) + Send + Sync> = {
            let transport = transport.clone();
            let registry = registry.clone();
            let discord_activity = discord_activity.clone();
            Arc::new(move |args: DiscordActivityArgs| {
                let packet = DiscordActivityPacket {
                    details: args.details,
                    state: args.state,
                    large_image: args.large_image,
                    large_text: args.large_text,
                    small_image: args.small_image,
                    small_text: args.small_text,
                };
                let bytes = frame(Opcode::DiscordActivity, &packet);
                let guard = transport.lock().unwrap();
                registry.for_each_ingame(|player| {
                    guard.send(player.connection, &bytes, Priority::Medium, Reliability::ReliableOrdered);
                });
                drop(guard);
                *discord_activity.lock().unwrap() = Some(packet);
            })
        };

        let packet_dest = Arc::new(RegistryPacketDestination {
            registry: registry.clone(),
            transport: transport.clone(),
        });

        host.install_bindings(send_server_message, update_discord_activity, packet_dest)
            .map_err(CoreError::from)?;

        for name in &config.scripts {
            host.load_resource(&resources_root, name).map_err(CoreError::from)?;
        }

        let heartbeat = Some(HeartbeatWorker::spawn(config.clone(), registry.clone()));
        let tick_engine = TickEngine::new(config.tick_rate_ms);
        let clock = aeon_common::clock::GameClock::new(60.0);

        Ok(Self {
            config,
            registry,
            transport,
            host,
            bans,
            scheduler: TaskScheduler::new(),
            heartbeat,
            tick_engine,
            clock,
            discord_activity,
            resources_root,
            last_tick: Instant::now(),
        })
    }

    /// §8 property 13: every persisted ban must be installed on the
    /// transport before the first inbound packet is processed.
    pub fn sync_bans(&self) {
        self.bans.sync_into_transport(self.transport.lock().unwrap().as_ref());
    }

    fn game_info_flags(&self) -> GameInfoFlags {
        let mut flags = GameInfoFlags::empty();
        if self.config.hide_map {
            flags |= GameInfoFlags::HIDE_MAP;
        }
        // `allow_dropitems` in the original gates HandleTakeItem via this
        // same bit (game_server.cpp:806,876); this server always allows it
        // since there is no separate config key carrying the distinction.
        flags |= GameInfoFlags::DROP_ITEMS;
        flags
    }

    /// Polls the transport, dispatches every event, drains scheduled tasks,
    /// and runs one tick of the game loop. `now_ms` is caller-supplied so
    /// tests can drive the clock deterministically.
    pub fn step(&mut self, now_ms: u64) {
        let events = self.transport.lock().unwrap().poll_events();
        self.handle_events(now_ms, events);

        self.scheduler.process_tasks();

        let guard = self.transport.lock().unwrap();
        let dt = self.last_tick.elapsed();
        self.last_tick = Instant::now();
        self.tick_engine.run_once(
            &self.registry,
            guard.as_ref(),
            &self.host,
            &mut self.clock,
            &self.config.class_table,
            self.config.respawn_time_seconds,
            now_ms,
            dt,
        );
    }

    /// Dispatches a batch of already-polled inbound events. Exposed
    /// separately from [`Self::step`] so an owner polling the transport on
    /// a different cadence can still drive dispatch.
    pub fn handle_events(&self, now_ms: u64, events: Vec<aeon_protocol::InboundEvent>) {
        if events.is_empty() {
            return;
        }
        let discord_snapshot = self.discord_activity.lock().unwrap().clone();
        let guard = self.transport.lock().unwrap();
        let ctx = DispatchContext {
            registry: &self.registry,
            transport: guard.as_ref(),
            host: &self.host,
            bans: &self.bans,
            class_table: &self.config.class_table,
            map_name: &self.config.map,
            allow_modification: self.config.allow_modification,
            be_unconscious_before_dead: self.config.be_unconscious_before_dead,
            now_ms,
            raw_game_time: self.clock.get_time_packed(),
            game_mode: 0,
            game_info_flags: self.game_info_flags(),
            discord_activity: discord_snapshot.as_ref(),
        };
        for event in events {
            dispatch::handle_inbound_event(&ctx, event);
        }
    }

    pub fn process_scheduled_tasks(&self) {
        self.scheduler.process_tasks();
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn host(&self) -> &ResourceHost {
        &self.host
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn resources_root(&self) -> &PathBuf {
        &self.resources_root
    }

    pub fn shutdown(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            hb.stop();
        }
    }
}

impl Drop for ServerContext {
    fn drop(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            hb.stop();
        }
    }
}
