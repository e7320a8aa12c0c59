//! Standard script bindings — §4.9.6. Both security policies get the event
//! subscription function, the timer functions, a logger, and hex
//! encode/decode. The server host additionally installs `SendServerMessage`,
//! `UpdateDiscordActivity`, the hashing functions, and the [`Packet`]
//! constructor (§4.9.7).
//!
//! A `vec3` table is installed for sandboxed (client) hosts as an additive
//! convenience on top of raw Lua `math` (not cataloged by name in the
//! distilled standard-bindings list but named as supplemental in the
//! repo-level spec, since script authors manipulate player positions
//! directly and Lua has no vector type of its own).

use std::sync::Arc;

use aeon_common::error::ScriptError;
use digest::Digest;
use mlua::{Lua, Value};

use crate::event_bus::EventManager;
use crate::packet_builder::{Packet, PacketDestination};
use crate::timer::TimerManager;

fn rt_err(e: impl std::fmt::Display) -> ScriptError {
    ScriptError::Runtime(e.to_string())
}

fn lua_err(e: impl std::fmt::Display) -> mlua::Error {
    mlua::Error::RuntimeError(e.to_string())
}

/// Resolves "who is calling right now" so subscriptions/timers created from
/// Lua are tagged with the resource that owns them (§4.9.4's ownership
/// sweep on unload). `None` on hosts with no resource-context concept.
pub type CurrentResourceFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(text: &str) -> Result<Vec<u8>, mlua::Error> {
    if text.len() % 2 != 0 {
        return Err(mlua::Error::RuntimeError("odd-length hex string".into()));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(|e| lua_err(e)))
        .collect()
}

fn parse_reliability(name: &str) -> Result<aeon_protocol::Reliability, mlua::Error> {
    use aeon_protocol::Reliability::*;
    Ok(match name {
        "unreliable" => Unreliable,
        "unreliable_sequenced" => UnreliableSequenced,
        "reliable" => Reliable,
        "reliable_ordered" => ReliableOrdered,
        "reliable_sequenced" => ReliableSequenced,
        // Matches the original's ToReliabilitySafe default-to-RELIABLE branch.
        _ => Reliable,
    })
}

/// Installs `addEventHandler`, the timer functions, `log`, and `hex` — the
/// bindings present on every script host regardless of security policy.
pub fn install_common_bindings(
    lua: &Lua,
    events: Arc<EventManager>,
    timers: Arc<TimerManager>,
    current_resource: CurrentResourceFn,
) -> Result<(), ScriptError> {
    let globals = lua.globals();

    let sub_events = events.clone();
    let sub_owner = current_resource.clone();
    let add_event_handler = lua
        .create_function(move |lua, (name, callback): (String, mlua::Function)| {
            let key = lua.create_registry_value(callback)?;
            sub_events
                .subscribe(&name, key, sub_owner())
                .map_err(lua_err)
        })
        .map_err(rt_err)?;
    globals.set("addEventHandler", add_event_handler).map_err(rt_err)?;

    let timer_owner = current_resource;
    let set_timer = timers.clone();
    let set_timer_fn = lua
        .create_function(move |lua, (callback, interval_ms, execute_times): (mlua::Function, u64, u32)| {
            let key = lua.create_registry_value(callback)?;
            Ok(set_timer.create_timer(key, interval_ms, execute_times, timer_owner()))
        })
        .map_err(rt_err)?;
    globals.set("setTimer", set_timer_fn).map_err(rt_err)?;

    let kill_timer_mgr = timers.clone();
    let kill_timer_fn = lua
        .create_function(move |_, id: u32| {
            kill_timer_mgr.kill_timer(id);
            Ok(())
        })
        .map_err(rt_err)?;
    globals.set("killTimer", kill_timer_fn).map_err(rt_err)?;

    let get_interval_mgr = timers.clone();
    let get_interval_fn = lua
        .create_function(move |_, id: u32| Ok(get_interval_mgr.get_interval(id).map(|d| d.as_millis() as u64)))
        .map_err(rt_err)?;
    globals.set("getTimerInterval", get_interval_fn).map_err(rt_err)?;

    let set_interval_mgr = timers.clone();
    let set_interval_fn = lua
        .create_function(move |_, (id, ms): (u32, u64)| {
            set_interval_mgr.set_interval(id, ms);
            Ok(())
        })
        .map_err(rt_err)?;
    globals.set("setTimerInterval", set_interval_fn).map_err(rt_err)?;

    let get_times_mgr = timers.clone();
    let get_times_fn = lua
        .create_function(move |_, id: u32| Ok(get_times_mgr.get_execute_times(id)))
        .map_err(rt_err)?;
    globals.set("getTimerExecuteTimes", get_times_fn).map_err(rt_err)?;

    let set_times_mgr = timers;
    let set_times_fn = lua
        .create_function(move |_, (id, times): (u32, u32)| {
            set_times_mgr.set_execute_times(id, times);
            Ok(())
        })
        .map_err(rt_err)?;
    globals.set("setTimerExecuteTimes", set_times_fn).map_err(rt_err)?;

    install_logger(lua)?;
    install_hex(lua)?;
    Ok(())
}

fn install_logger(lua: &Lua) -> Result<(), ScriptError> {
    let log_table = lua.create_table().map_err(rt_err)?;

    macro_rules! level_fn {
        ($name:literal, $macro_ident:ident) => {
            log_table
                .set(
                    $name,
                    lua.create_function(|_, message: String| {
                        tracing::$macro_ident!(target: "script", "{message}");
                        Ok(())
                    })
                    .map_err(rt_err)?,
                )
                .map_err(rt_err)?;
        };
    }
    level_fn!("debug", debug);
    level_fn!("info", info);
    level_fn!("warn", warn);
    level_fn!("error", error);

    lua.globals().set("log", log_table).map_err(rt_err)?;
    Ok(())
}

fn install_hex(lua: &Lua) -> Result<(), ScriptError> {
    let hex_table = lua.create_table().map_err(rt_err)?;

    let encode_fn = lua
        .create_function(|_, data: mlua::String| Ok(hex_encode(data.as_bytes())))
        .map_err(rt_err)?;
    hex_table.set("encode", encode_fn).map_err(rt_err)?;

    let decode_fn = lua
        .create_function(|lua, text: String| {
            let bytes = hex_decode(&text)?;
            lua.create_string(&bytes)
        })
        .map_err(rt_err)?;
    hex_table.set("decode", decode_fn).map_err(rt_err)?;

    lua.globals().set("hex", hex_table).map_err(rt_err)?;
    Ok(())
}

/// The six Discord Rich Presence fields carried by `UpdateDiscordActivity`
/// (§6.1 opcode 157).
#[derive(Debug, Clone, Default)]
pub struct DiscordActivityArgs {
    pub details: String,
    pub state: String,
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
    pub small_text: String,
}

struct LuaPacket {
    packet: Packet,
    dest: Arc<dyn PacketDestination>,
}

impl mlua::UserData for LuaPacket {
    fn add_methods<'lua, M: mlua::UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method_mut("reset", |_, this, ()| {
            this.packet.reset();
            Ok(())
        });

        methods.add_method_mut("writeBool", |_, this, v: bool| Ok(this.packet.write_bool(v)));
        methods.add_method_mut("writeInt8", |_, this, v: i8| Ok(this.packet.write_i8(v)));
        methods.add_method_mut("writeUInt8", |_, this, v: u8| Ok(this.packet.write_u8(v)));
        methods.add_method_mut("writeInt16", |_, this, v: i16| Ok(this.packet.write_i16(v)));
        methods.add_method_mut("writeUInt16", |_, this, v: u16| Ok(this.packet.write_u16(v)));
        methods.add_method_mut("writeInt32", |_, this, v: i32| Ok(this.packet.write_i32(v)));
        methods.add_method_mut("writeUInt32", |_, this, v: u32| Ok(this.packet.write_u32(v)));
        methods.add_method_mut("writeFloat", |_, this, v: f32| Ok(this.packet.write_f32(v)));
        methods.add_method_mut("writeString", |_, this, v: String| Ok(this.packet.write_string(&v)));
        methods.add_method_mut("writeBlob", |_, this, v: mlua::String| Ok(this.packet.write_blob(v.as_bytes())));

        methods.add_method_mut("readBool", |_, this, ()| this.packet.read_bool().map_err(lua_err));
        methods.add_method_mut("readInt8", |_, this, ()| this.packet.read_i8().map_err(lua_err));
        methods.add_method_mut("readUInt8", |_, this, ()| this.packet.read_u8().map_err(lua_err));
        methods.add_method_mut("readInt16", |_, this, ()| this.packet.read_i16().map_err(lua_err));
        methods.add_method_mut("readUInt16", |_, this, ()| this.packet.read_u16().map_err(lua_err));
        methods.add_method_mut("readInt32", |_, this, ()| this.packet.read_i32().map_err(lua_err));
        methods.add_method_mut("readUInt32", |_, this, ()| this.packet.read_u32().map_err(lua_err));
        methods.add_method_mut("readFloat", |_, this, ()| this.packet.read_f32().map_err(lua_err));
        methods.add_method_mut("readString", |_, this, ()| this.packet.read_string().map_err(lua_err));
        methods.add_method_mut("readBlob", |lua, this, ()| {
            let bytes = this.packet.read_blob().map_err(lua_err)?;
            lua.create_string(&bytes)
        });

        methods.add_method_mut("send", |_, this, (player_id, reliability): (u32, String)| {
            let reliability = parse_reliability(&reliability)?;
            this.packet.send(this.dest.as_ref(), player_id, reliability);
            Ok(())
        });
        methods.add_method_mut("sendToAll", |_, this, reliability: String| {
            let reliability = parse_reliability(&reliability)?;
            this.packet.send_to_all(this.dest.as_ref(), reliability);
            Ok(())
        });
    }
}

/// Installs the server-only bindings: `SendServerMessage`,
/// `UpdateDiscordActivity`, the hashing functions, and the global `Packet`
/// constructor.
pub fn install_server_bindings(
    lua: &Lua,
    send_server_message: Arc<dyn Fn(&str) + Send + Sync>,
    update_discord_activity: Arc<dyn Fn(DiscordActivityArgs) + Send + Sync>,
    packet_dest: Arc<dyn PacketDestination>,
) -> Result<(), ScriptError> {
    let globals = lua.globals();

    let send_msg_fn = lua
        .create_function(move |_, text: String| {
            send_server_message(&text);
            Ok(())
        })
        .map_err(rt_err)?;
    globals.set("SendServerMessage", send_msg_fn).map_err(rt_err)?;

    let update_activity_fn = lua
        .create_function(
            move |_,
                  (details, state, large_image, large_text, small_image, small_text): (
                String,
                String,
                String,
                String,
                String,
                String,
            )| {
                update_discord_activity(DiscordActivityArgs {
                    details,
                    state,
                    large_image,
                    large_text,
                    small_image,
                    small_text,
                });
                Ok(())
            },
        )
        .map_err(rt_err)?;
    globals.set("UpdateDiscordActivity", update_activity_fn).map_err(rt_err)?;

    install_hash_functions(lua)?;

    let packet_table = lua.create_table().map_err(rt_err)?;
    let new_fn = lua
        .create_function(move |_, ()| {
            Ok(LuaPacket {
                packet: Packet::new(),
                dest: packet_dest.clone(),
            })
        })
        .map_err(rt_err)?;
    packet_table.set("new", new_fn).map_err(rt_err)?;
    globals.set("Packet", packet_table).map_err(rt_err)?;

    Ok(())
}

fn install_hash_functions(lua: &Lua) -> Result<(), ScriptError> {
    let globals = lua.globals();

    let md5_fn = lua
        .create_function(|_, data: mlua::String| Ok(hex_encode(&md5::Md5::digest(data.as_bytes()))))
        .map_err(rt_err)?;
    globals.set("md5", md5_fn).map_err(rt_err)?;

    let sha1_fn = lua
        .create_function(|_, data: mlua::String| Ok(hex_encode(&sha1::Sha1::digest(data.as_bytes()))))
        .map_err(rt_err)?;
    globals.set("sha1", sha1_fn).map_err(rt_err)?;

    let sha256_fn = lua
        .create_function(|_, data: mlua::String| Ok(hex_encode(&sha2::Sha256::digest(data.as_bytes()))))
        .map_err(rt_err)?;
    globals.set("sha256", sha256_fn).map_err(rt_err)?;

    let sha384_fn = lua
        .create_function(|_, data: mlua::String| Ok(hex_encode(&sha2::Sha384::digest(data.as_bytes()))))
        .map_err(rt_err)?;
    globals.set("sha384", sha384_fn).map_err(rt_err)?;

    let sha512_fn = lua
        .create_function(|_, data: mlua::String| Ok(hex_encode(&sha2::Sha512::digest(data.as_bytes()))))
        .map_err(rt_err)?;
    globals.set("sha512", sha512_fn).map_err(rt_err)?;

    Ok(())
}

/// Additive client-side convenience: a `vec3` table of plain Rust-backed
/// helpers operating on `{x, y, z}` Lua tables.
pub fn install_vec3_bindings(lua: &Lua) -> Result<(), ScriptError> {
    fn components(v: &mlua::Table) -> mlua::Result<(f64, f64, f64)> {
        Ok((v.get("x")?, v.get("y")?, v.get("z")?))
    }

    let vec3_table = lua.create_table().map_err(rt_err)?;

    let new_fn = lua
        .create_function(|lua, (x, y, z): (f64, f64, f64)| {
            let t = lua.create_table()?;
            t.set("x", x)?;
            t.set("y", y)?;
            t.set("z", z)?;
            Ok(t)
        })
        .map_err(rt_err)?;
    vec3_table.set("new", new_fn).map_err(rt_err)?;

    let length_fn = lua
        .create_function(|_, v: mlua::Table| {
            let (x, y, z) = components(&v)?;
            Ok((x * x + y * y + z * z).sqrt())
        })
        .map_err(rt_err)?;
    vec3_table.set("length", length_fn).map_err(rt_err)?;

    let distance_fn = lua
        .create_function(|_, (a, b): (mlua::Table, mlua::Table)| {
            let (ax, ay, az) = components(&a)?;
            let (bx, by, bz) = components(&b)?;
            let (dx, dy, dz) = (ax - bx, ay - by, az - bz);
            Ok((dx * dx + dy * dy + dz * dz).sqrt())
        })
        .map_err(rt_err)?;
    vec3_table.set("distance", distance_fn).map_err(rt_err)?;

    let normalize_fn = lua
        .create_function(|lua, v: mlua::Table| {
            let (x, y, z) = components(&v)?;
            let len = (x * x + y * y + z * z).sqrt();
            let t = lua.create_table()?;
            if len > 0.0 {
                t.set("x", x / len)?;
                t.set("y", y / len)?;
                t.set("z", z / len)?;
            } else {
                t.set("x", 0.0)?;
                t.set("y", 0.0)?;
                t.set("z", 0.0)?;
            }
            Ok(t)
        })
        .map_err(rt_err)?;
    vec3_table.set("normalize", normalize_fn).map_err(rt_err)?;

    lua.globals().set("vec3", vec3_table).map_err(rt_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SecurityPolicy;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn noop_resource() -> CurrentResourceFn {
        Arc::new(|| None)
    }

    #[test]
    fn event_handler_and_timer_functions_are_callable() {
        let lua = SecurityPolicy::Trusted.new_lua().unwrap();
        let events = Arc::new(EventManager::new());
        events.register_event("onTick");
        let timers = Arc::new(TimerManager::new());
        install_common_bindings(&lua, events, timers, noop_resource()).unwrap();

        let ok: bool = lua
            .load("local id = addEventHandler('onTick', function() end); return id ~= nil")
            .eval()
            .unwrap();
        assert!(ok);

        let timer_id: u32 = lua
            .load("return setTimer(function() end, 10, 1)")
            .eval()
            .unwrap();
        let interval: u64 = lua
            .load(format!("return getTimerInterval({timer_id})"))
            .eval()
            .unwrap();
        assert_eq!(interval, 50);
    }

    #[test]
    fn hex_roundtrips_through_lua() {
        let lua = SecurityPolicy::Trusted.new_lua().unwrap();
        let events = Arc::new(EventManager::new());
        let timers = Arc::new(TimerManager::new());
        install_common_bindings(&lua, events, timers, noop_resource()).unwrap();

        let ok: bool = lua
            .load("return hex.decode(hex.encode('abc')) == 'abc'")
            .eval()
            .unwrap();
        assert!(ok);
    }

    struct NullDestination;
    impl PacketDestination for NullDestination {
        fn send_to_player(&self, _player_id: u32, _bytes: &[u8], _reliability: aeon_protocol::Reliability) {}
        fn send_to_all(&self, _bytes: &[u8], _reliability: aeon_protocol::Reliability) {}
    }

    #[test]
    fn packet_userdata_supports_write_and_send() {
        let lua = SecurityPolicy::Trusted.new_lua().unwrap();
        let called = Arc::new(AtomicBool::new(false));
        let server_called = called.clone();
        install_server_bindings(
            &lua,
            Arc::new(move |_text: &str| {
                server_called.store(true, Ordering::SeqCst);
            }),
            Arc::new(|_args: DiscordActivityArgs| {}),
            Arc::new(NullDestination),
        )
        .unwrap();

        lua.load("local p = Packet.new(); p:writeUInt8(7); p:send(1, 'reliable')")
            .exec()
            .unwrap();

        lua.load("SendServerMessage('hi')").exec().unwrap();
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn hash_functions_match_known_vectors() {
        let lua = SecurityPolicy::Trusted.new_lua().unwrap();
        install_server_bindings(
            &lua,
            Arc::new(|_: &str| {}),
            Arc::new(|_: DiscordActivityArgs| {}),
            Arc::new(NullDestination),
        )
        .unwrap();

        let digest: String = lua.load("return sha256('')").eval().unwrap();
        assert_eq!(digest, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn vec3_length_and_distance() {
        let lua = SecurityPolicy::Sandboxed.new_lua().unwrap();
        install_vec3_bindings(&lua).unwrap();

        let len: f64 = lua.load("return vec3.length(vec3.new(3, 4, 0))").eval().unwrap();
        assert!((len - 5.0).abs() < 1e-9);

        let dist: f64 = lua
            .load("return vec3.distance(vec3.new(0,0,0), vec3.new(3,4,0))")
            .eval()
            .unwrap();
        assert!((dist - 5.0).abs() < 1e-9);
    }
}
