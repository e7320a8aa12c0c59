//! Server-side resource lifecycle — §4.9.4, grounded in
//! `gmp-server/lib/game_server.cpp`'s resource manager and its accompanying
//! `resource_manager_test.cpp`.
//!
//! Lua values that must outlive a single call (an environment table, a
//! captured `exports` table) are kept as [`mlua::RegistryKey`]s rather than
//! borrowed `Table`s, since [`ResourceHost`] owns the [`mlua::Lua`] instance
//! itself and a `Table<'lua>` cannot be stored alongside the value it
//! borrows from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aeon_common::error::ScriptError;
use mlua::{Lua, RegistryKey, Table, Value};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::bindings::{self, CurrentResourceFn, DiscordActivityArgs};
use crate::event_bus::EventManager;
use crate::packet_builder::PacketDestination;
use crate::security::SecurityPolicy;
use crate::timer::TimerManager;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceMeta {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
}

struct ResourceEntry {
    env: RegistryKey,
    exports: Option<RegistryKey>,
    loaded: bool,
    generation: u32,
    meta: ResourceMeta,
}

/// Shared between the host and every exports-proxy/timer closure so Lua
/// callbacks can look resources up by name without borrowing the host.
type SharedResources = Arc<Mutex<HashMap<String, ResourceEntry>>>;
type SharedStack = Arc<Mutex<Vec<String>>>;

/// Owns one Lua VM and every server-side resource loaded into it. Mirrors
/// `game_server.cpp`'s single-VM-many-resources design rather than one VM
/// per resource, so `exports` can be a plain shared Lua table.
pub struct ResourceHost {
    lua: Lua,
    resources: SharedResources,
    current_stack: SharedStack,
    pub events: Arc<EventManager>,
    pub timers: Arc<TimerManager>,
}

impl ResourceHost {
    pub fn new() -> Result<Self, ScriptError> {
        let lua = SecurityPolicy::Trusted.new_lua()?;
        let resources: SharedResources = Arc::new(Mutex::new(HashMap::new()));
        let current_stack: SharedStack = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(EventManager::new());
        let timers = Arc::new(TimerManager::new());

        install_exports_proxy(&lua, resources.clone(), current_stack.clone())?;
        install_owner_context_executor(&timers, current_stack.clone());

        Ok(Self {
            lua,
            resources,
            current_stack,
            events,
            timers,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Installs `addEventHandler`/timer/`log`/`hex`, `SendServerMessage`,
    /// `UpdateDiscordActivity`, the hashing functions, and the global
    /// `Packet` constructor. Deferred until after construction since the
    /// server message/Discord/packet-destination callbacks come from the
    /// surrounding server context, not the script host itself.
    pub fn install_bindings(
        &self,
        send_server_message: Arc<dyn Fn(&str) + Send + Sync>,
        update_discord_activity: Arc<dyn Fn(DiscordActivityArgs) + Send + Sync>,
        packet_dest: Arc<dyn PacketDestination>,
    ) -> Result<(), ScriptError> {
        let stack = self.current_stack.clone();
        let current_resource: CurrentResourceFn = Arc::new(move || stack.lock().last().cloned());
        bindings::install_common_bindings(&self.lua, self.events.clone(), self.timers.clone(), current_resource)?;
        bindings::install_server_bindings(&self.lua, send_server_message, update_discord_activity, packet_dest)?;
        Ok(())
    }

    /// The resource currently executing, per the LIFO stack pushed by
    /// [`Self::with_resource_context`] and the owner-context executor.
    pub fn current_resource(&self) -> Option<String> {
        self.current_stack.lock().last().cloned()
    }

    fn with_resource_context<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        self.current_stack.lock().push(name.to_string());
        let result = f();
        self.current_stack.lock().pop();
        result
    }

    /// Enumerates immediate subdirectories of `resources_root`, each
    /// treated as one resource. Reads `resource.toml` when present.
    pub fn discover_resources(resources_root: &Path) -> Vec<(String, ResourceMeta)> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(resources_root) else {
            return out;
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let meta = read_resource_meta(&dir);
            out.push((name.to_string(), meta));
        }
        out
    }

    /// Loads (or reloads, if already present) one resource from
    /// `resources_root/<name>`: runs every `.lua` under `shared/` then
    /// `server/` (sorted) inside an isolated, globals-fallback environment,
    /// then captures `exports` and calls `onResourceStart`.
    pub fn load_resource(&self, resources_root: &Path, name: &str) -> Result<(), ScriptError> {
        let resource_dir = resources_root.join(name);
        let meta = read_resource_meta(&resource_dir);

        let env = self
            .lua
            .create_table()
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        let meta_table = self
            .lua
            .create_table()
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        meta_table
            .set("__index", self.lua.globals())
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        env.set_metatable(Some(meta_table));

        for subdir in ["shared", "server"] {
            let dir = resource_dir.join(subdir);
            if !dir.is_dir() {
                continue;
            }
            let mut scripts: Vec<PathBuf> = std::fs::read_dir(&dir)
                .map_err(|e| ScriptError::Runtime(e.to_string()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("lua"))
                .collect();
            scripts.sort();

            for script_path in scripts {
                let source = std::fs::read_to_string(&script_path)
                    .map_err(|e| ScriptError::Runtime(e.to_string()))?;
                self.with_resource_context(name, || {
                    self.lua
                        .load(&source)
                        .set_name(script_path.to_string_lossy())
                        .set_environment(env.clone())
                        .exec()
                })
                .map_err(|e| ScriptError::Runtime(format!("{}: {e}", script_path.display())))?;
            }
        }

        let exports: Option<Table> = match env.get::<_, Value>("exports") {
            Ok(Value::Table(t)) => Some(t),
            _ => None,
        };

        let generation = {
            let resources = self.resources.lock();
            resources.get(name).map(|r| r.generation + 1).unwrap_or(0)
        };

        let env_key = self
            .lua
            .create_registry_value(env.clone())
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        let exports_key = match exports {
            Some(t) => Some(
                self.lua
                    .create_registry_value(t)
                    .map_err(|e| ScriptError::Runtime(e.to_string()))?,
            ),
            None => None,
        };

        self.resources.lock().insert(
            name.to_string(),
            ResourceEntry {
                env: env_key,
                exports: exports_key,
                loaded: true,
                generation,
                meta,
            },
        );

        if let Ok(Value::Function(on_start)) = env.get::<_, Value>("onResourceStart") {
            self.with_resource_context(name, || on_start.call::<_, ()>(()))
                .map_err(|e| ScriptError::Runtime(format!("onResourceStart: {e}")))?;
        }

        Ok(())
    }

    pub fn unload_resource(&self, name: &str) -> Result<(), ScriptError> {
        let env_key = {
            let resources = self.resources.lock();
            resources.get(name).map(|_| ())
        };
        if env_key.is_none() {
            return Ok(());
        }

        let env: Option<Table> = {
            let resources = self.resources.lock();
            resources
                .get(name)
                .and_then(|r| self.lua.registry_value::<Table>(&r.env).ok())
        };

        if let Some(env) = env {
            if let Ok(Value::Function(on_stop)) = env.get::<_, Value>("onResourceStop") {
                self.with_resource_context(name, || on_stop.call::<_, ()>(()))
                    .map_err(|e| ScriptError::Runtime(format!("onResourceStop: {e}")))?;
            }
        }

        self.timers.kill_timers_for_resource(name);
        self.events.remove_subscribers_for_resource(name);

        if let Some(entry) = self.resources.lock().get_mut(name) {
            entry.loaded = false;
            entry.exports = None;
        }
        Ok(())
    }

    pub fn reload_resource(&self, resources_root: &Path, name: &str) -> Result<(), ScriptError> {
        self.unload_resource(name)?;
        self.load_resource(resources_root, name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.resources.lock().get(name).map(|r| r.loaded).unwrap_or(false)
    }

    pub fn generation(&self, name: &str) -> Option<u32> {
        self.resources.lock().get(name).map(|r| r.generation)
    }

    pub fn exports(&self, name: &str) -> Option<Table> {
        let resources = self.resources.lock();
        let entry = resources.get(name)?;
        let key = entry.exports.as_ref()?;
        self.lua.registry_value::<Table>(key).ok()
    }
}

fn read_resource_meta(resource_dir: &Path) -> ResourceMeta {
    std::fs::read_to_string(resource_dir.join("resource.toml"))
        .ok()
        .and_then(|text| toml::from_str::<ResourceMeta>(&text).ok())
        .unwrap_or_default()
}

/// Installs the global `exports` table: `exports[name]` returns a proxy
/// whose `__index`/`__newindex` forward into the target resource's own
/// exports table, wrapping calls so they execute under the target's
/// resource context (§4.9.4).
fn install_exports_proxy(lua: &Lua, resources: SharedResources, stack: SharedStack) -> Result<(), ScriptError> {
    let exports_meta = lua.create_table().map_err(|e| ScriptError::Runtime(e.to_string()))?;

    let index_fn = lua
        .create_function(move |lua, (_outer, target_name): (Table, String)| {
            make_resource_proxy(lua, resources.clone(), stack.clone(), target_name)
        })
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;
    exports_meta
        .set("__index", index_fn)
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;

    let exports_table = lua.create_table().map_err(|e| ScriptError::Runtime(e.to_string()))?;
    exports_table.set_metatable(Some(exports_meta));
    lua.globals()
        .set("exports", exports_table)
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;

    Ok(())
}

fn lookup_exports<'lua>(resources: &SharedResources, lua: &'lua Lua, name: &str) -> Option<Table<'lua>> {
    let resources = resources.lock();
    let entry = resources.get(name)?;
    if !entry.loaded {
        return None;
    }
    let key = entry.exports.as_ref()?;
    lua.registry_value::<Table>(key).ok()
}

fn make_resource_proxy<'lua>(
    lua: &'lua Lua,
    resources: SharedResources,
    stack: SharedStack,
    target_name: String,
) -> mlua::Result<Value<'lua>> {
    if !resources.lock().contains_key(&target_name) {
        return Ok(Value::Nil);
    }

    let proxy = lua.create_table()?;
    let proxy_meta = lua.create_table()?;

    let idx_resources = resources.clone();
    let idx_stack = stack.clone();
    let idx_name = target_name.clone();
    let index_fn = lua.create_function(move |lua, (_proxy, key): (Table, String)| {
        let Some(target_exports) = lookup_exports(&idx_resources, lua, &idx_name) else {
            return Ok(Value::Nil);
        };
        let value: Value = target_exports.get(key)?;
        let Value::Function(func) = value else {
            return Ok(value);
        };

        let call_stack = idx_stack.clone();
        let call_name = idx_name.clone();
        let func_key = lua.create_registry_value(func)?;
        let wrapped = lua.create_function(move |lua, args: mlua::MultiValue| {
            let func: mlua::Function = lua.registry_value(&func_key)?;
            call_stack.lock().push(call_name.clone());
            let result = func.call::<_, mlua::MultiValue>(args);
            call_stack.lock().pop();
            result
        })?;
        Ok(Value::Function(wrapped))
    })?;
    proxy_meta.set("__index", index_fn)?;

    let newidx_resources = resources;
    let newidx_name = target_name;
    let newindex_fn = lua.create_function(move |lua, (_proxy, key, value): (Table, String, Value)| {
        if let Some(target_exports) = lookup_exports(&newidx_resources, lua, &newidx_name) {
            target_exports.set(key, value)?;
        }
        Ok(())
    })?;
    proxy_meta.set("__newindex", newindex_fn)?;

    proxy.set_metatable(Some(proxy_meta));
    Ok(Value::Table(proxy))
}

/// Wires the timer manager's owner-context hook so a timer's callback runs
/// with its owning resource pushed onto the current-resource stack.
fn install_owner_context_executor(timers: &Arc<TimerManager>, stack: SharedStack) {
    timers.set_owner_context_executor(Box::new(move |owner, call| {
        if let Some(owner) = owner {
            stack.lock().push(owner.to_string());
            call();
            stack.lock().pop();
        } else {
            call();
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_script(dir: &Path, name: &str, source: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), source).unwrap();
    }

    struct NullDestination;
    impl PacketDestination for NullDestination {
        fn send_to_player(&self, _player_id: u32, _bytes: &[u8], _reliability: aeon_protocol::Reliability) {}
        fn send_to_all(&self, _bytes: &[u8], _reliability: aeon_protocol::Reliability) {}
    }

    #[test]
    fn install_bindings_exposes_server_and_common_functions() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_script(
            &root.join("chat/server"),
            "a.lua",
            "SendServerMessage('hi')\nlocal id = setTimer(function() end, 10, 1)\nexports = { timerId = id }",
        );

        let host = ResourceHost::new().unwrap();
        let sent = Arc::new(AtomicBool::new(false));
        let sent_flag = sent.clone();
        host.install_bindings(
            Arc::new(move |_text: &str| sent_flag.store(true, Ordering::SeqCst)),
            Arc::new(|_args: DiscordActivityArgs| {}),
            Arc::new(NullDestination),
        )
        .unwrap();

        host.load_resource(root, "chat").unwrap();
        assert!(sent.load(Ordering::SeqCst));
        let exports = host.exports("chat").unwrap();
        let timer_id: u32 = exports.get("timerId").unwrap();
        assert_eq!(host.timers.get_interval(timer_id).unwrap().as_millis(), 50);
    }

    #[test]
    fn load_resource_runs_shared_then_server_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_script(&root.join("hud/shared"), "a.lua", "SHARED_RAN = true");
        write_script(
            &root.join("hud/server"),
            "b.lua",
            "exports = {}\nexports.sharedRan = SHARED_RAN",
        );

        let host = ResourceHost::new().unwrap();
        host.load_resource(root, "hud").unwrap();
        assert!(host.is_loaded("hud"));
        let exports = host.exports("hud").unwrap();
        let shared_ran: bool = exports.get("sharedRan").unwrap();
        assert!(shared_ran);
    }

    #[test]
    fn unload_clears_exports_and_marks_unloaded() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_script(&root.join("hud/server"), "a.lua", "exports = {}");

        let host = ResourceHost::new().unwrap();
        host.load_resource(root, "hud").unwrap();
        host.unload_resource("hud").unwrap();
        assert!(!host.is_loaded("hud"));
        assert!(host.exports("hud").is_none());
    }

    #[test]
    fn reload_increments_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_script(&root.join("hud/server"), "a.lua", "x = 1");

        let host = ResourceHost::new().unwrap();
        host.load_resource(root, "hud").unwrap();
        let gen0 = host.generation("hud").unwrap();
        host.reload_resource(root, "hud").unwrap();
        assert_eq!(host.generation("hud").unwrap(), gen0 + 1);
    }

    #[test]
    fn exports_proxy_returns_nil_for_unloaded_resource() {
        let host = ResourceHost::new().unwrap();
        let nil_check: bool = host
            .lua()
            .load("return exports.nonexistent == nil")
            .eval()
            .unwrap();
        assert!(nil_check);
    }

    #[test]
    fn exports_proxy_calls_target_function() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_script(
            &root.join("math_lib/server"),
            "a.lua",
            "exports = {}\nexports.double = function(n) return n * 2 end",
        );

        let host = ResourceHost::new().unwrap();
        host.load_resource(root, "math_lib").unwrap();

        let result: i64 = host
            .lua()
            .load("return exports.math_lib.double(21)")
            .eval()
            .unwrap();
        assert_eq!(result, 42);
    }
}
