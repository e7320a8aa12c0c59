//! Client-side resource lifecycle — §4.9.5, grounded in
//! `client_resource_runtime.cpp`'s `LoadResources`/`SetupRequire`/
//! `ExecuteEntryPoints`.
//!
//! `mlua::Chunk::set_environment` does the `_ENV` upvalue rebinding that the
//! original does by hand with `lua_setupvalue`, including the no-op case
//! where a chunk never touches a global and has no such upvalue to set.

use std::sync::Arc;

use aeon_common::error::ScriptError;
use aeon_resources::{ResourcePack, ResourcePackLoader};
use mlua::{Lua, RegistryKey, Table, Value};
use parking_lot::Mutex;

use crate::bindings::{self, CurrentResourceFn};
use crate::event_bus::EventManager;
use crate::security::SecurityPolicy;
use crate::timer::TimerManager;

fn rt_err(e: impl std::fmt::Display) -> ScriptError {
    ScriptError::Runtime(e.to_string())
}

/// One resource payload handed down by the downloader: the manifest JSON and
/// archive bytes already fully received (§4.8).
#[derive(Debug, Clone)]
pub struct ResourcePayload {
    pub name: String,
    pub manifest_json: String,
    pub archive_bytes: Vec<u8>,
}

struct ClientResourceInstance {
    name: String,
    env: RegistryKey,
    exports: Option<RegistryKey>,
    started: bool,
}

/// Owns the sandboxed Lua VM backing every client resource currently
/// mounted. Unlike [`crate::resource::ResourceHost`] there is no
/// cross-resource `exports` proxy on the client — only [`Self::exports`]
/// for the host engine to query directly.
pub struct ClientResourceRuntime {
    lua: Lua,
    resources: Mutex<Vec<ClientResourceInstance>>,
    current: Arc<Mutex<Option<String>>>,
    pub events: Arc<EventManager>,
    pub timers: Arc<TimerManager>,
}

impl ClientResourceRuntime {
    pub fn new() -> Result<Self, ScriptError> {
        let lua = SecurityPolicy::Sandboxed.new_lua()?;
        Ok(Self {
            lua,
            resources: Mutex::new(Vec::new()),
            current: Arc::new(Mutex::new(None)),
            events: Arc::new(EventManager::new()),
            timers: Arc::new(TimerManager::new()),
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Installs `addEventHandler`/timer/`log`/`hex` and `vec3` on this
    /// runtime's Lua state. Subscriptions and timers created while a
    /// resource's entrypoints or lifecycle hooks are executing are tagged
    /// with that resource's name via [`Self::current`].
    pub fn install_bindings(&self) -> Result<(), ScriptError> {
        let current = self.current.clone();
        let current_resource: CurrentResourceFn = Arc::new(move || current.lock().clone());
        bindings::install_common_bindings(&self.lua, self.events.clone(), self.timers.clone(), current_resource)?;
        bindings::install_vec3_bindings(&self.lua)?;
        Ok(())
    }

    fn with_resource_context<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        *self.current.lock() = Some(name.to_string());
        let result = f();
        *self.current.lock() = None;
        result
    }

    /// Replaces every mounted resource. A failure partway through leaves no
    /// resource mounted, matching the original's `UnloadResources` calls on
    /// every error path.
    pub fn load_resources(&self, payloads: Vec<ResourcePayload>) -> Result<(), ScriptError> {
        self.unload_resources();

        for payload in &payloads {
            if let Err(e) = self.load_one(payload) {
                self.unload_resources();
                return Err(e);
            }
        }
        Ok(())
    }

    fn load_one(&self, payload: &ResourcePayload) -> Result<(), ScriptError> {
        let pack = ResourcePackLoader::load_from_memory(&payload.manifest_json, payload.archive_bytes.clone(), true)
            .map_err(|e| ScriptError::Runtime(format!("resource '{}': {e}", payload.name)))?;
        let pack = Arc::new(pack);

        let env = self.lua.create_table().map_err(rt_err)?;
        let meta = self.lua.create_table().map_err(rt_err)?;
        meta.set("__index", self.lua.globals()).map_err(rt_err)?;
        env.set_metatable(Some(meta));

        install_require(&self.lua, &env, payload.name.clone(), pack.clone())?;

        for entrypoint in &pack.manifest().entrypoints {
            let file = pack
                .load_file(entrypoint, true)
                .map_err(|e| ScriptError::Runtime(format!("resource '{}': {e}", payload.name)))?;
            self.with_resource_context(&payload.name, || {
                self.lua
                    .load(&file.data)
                    .set_name(entrypoint.as_str())
                    .set_environment(env.clone())
                    .exec()
            })
            .map_err(|e| ScriptError::Runtime(format!("resource '{}': {entrypoint}: {e}", payload.name)))?;
        }

        let exports: Option<Table> = match env.get::<_, Value>("exports") {
            Ok(Value::Table(t)) => Some(t),
            _ => None,
        };

        let env_key = self.lua.create_registry_value(env.clone()).map_err(rt_err)?;
        let exports_key = match exports {
            Some(t) => Some(self.lua.create_registry_value(t).map_err(rt_err)?),
            None => None,
        };

        self.resources.lock().push(ClientResourceInstance {
            name: payload.name.clone(),
            env: env_key,
            exports: exports_key,
            started: false,
        });

        if let Ok(Value::Function(on_start)) = env.get::<_, Value>("onResourceStart") {
            self.with_resource_context(&payload.name, || on_start.call::<_, ()>(()))
                .map_err(|e| ScriptError::Runtime(format!("resource '{}': onResourceStart: {e}", payload.name)))?;
        }

        if let Some(instance) = self
            .resources
            .lock()
            .iter_mut()
            .find(|i| i.name == payload.name)
        {
            instance.started = true;
        }

        Ok(())
    }

    /// Unloads every mounted resource in reverse load order, invoking
    /// `onResourceStop` on each started instance, then clears every timer.
    pub fn unload_resources(&self) {
        let instances: Vec<(String, RegistryKey)> = {
            let mut resources = self.resources.lock();
            let drained: Vec<ClientResourceInstance> = resources.drain(..).collect();
            drained
                .into_iter()
                .rev()
                .filter(|i| i.started)
                .map(|i| (i.name, i.env))
                .collect()
        };

        for (name, env_key) in instances {
            let env: Option<Table> = self.lua.registry_value(&env_key).ok();
            if let Some(env) = env {
                if let Ok(Value::Function(on_stop)) = env.get::<_, Value>("onResourceStop") {
                    let result = self.with_resource_context(&name, || on_stop.call::<_, ()>(()));
                    if let Err(e) = result {
                        tracing::warn!(resource = %name, error = %e, "onResourceStop failed");
                    }
                }
            }
        }

        self.timers.clear();
    }

    pub fn process_timers(&self) {
        self.timers.process_timers(&self.lua);
    }

    pub fn is_mounted(&self, name: &str) -> bool {
        self.resources.lock().iter().any(|i| i.name == name)
    }

    pub fn exports(&self, name: &str) -> Option<Table> {
        let resources = self.resources.lock();
        let instance = resources.iter().find(|i| i.name == name)?;
        let key = instance.exports.as_ref()?;
        self.lua.registry_value::<Table>(key).ok()
    }
}

/// Installs `require` and `package.loaded` on `env`, searching
/// `client/<mod>.luac|.lua`, `shared/<mod>.luac|.lua`, then
/// `<mod>.luac|.lua` inside `pack` (dots in the module name become `/`).
fn install_require(lua: &Lua, env: &Table, resource_name: String, pack: Arc<ResourcePack>) -> Result<(), ScriptError> {
    let module_cache = lua.create_table().map_err(rt_err)?;
    let package = lua.create_table().map_err(rt_err)?;
    package.set("loaded", module_cache.clone()).map_err(rt_err)?;
    env.set("package", package).map_err(rt_err)?;

    let cache_key = lua.create_registry_value(module_cache).map_err(rt_err)?;
    let env_key = lua.create_registry_value(env.clone()).map_err(rt_err)?;

    let require_fn = lua
        .create_function(move |lua, module_name: String| {
            let module_cache: Table = lua.registry_value(&cache_key)?;
            let cached: Value = module_cache.get(module_name.clone())?;
            if !matches!(cached, Value::Nil) {
                return Ok(cached);
            }

            let normalized = module_name.replace('.', "/");
            let candidates = [
                format!("client/{normalized}.luac"),
                format!("client/{normalized}.lua"),
                format!("shared/{normalized}.luac"),
                format!("shared/{normalized}.lua"),
                format!("{normalized}.luac"),
                format!("{normalized}.lua"),
            ];

            let mut found = None;
            for candidate in &candidates {
                if let Ok(file) = pack.load_file(candidate, true) {
                    found = Some((candidate.clone(), file));
                    break;
                }
            }
            let Some((used_path, file)) = found else {
                return Err(mlua::Error::RuntimeError(format!(
                    "module '{module_name}' not found in resource '{resource_name}'"
                )));
            };

            let module_env: Table = lua.registry_value(&env_key)?;
            let exported: Value = lua
                .load(&file.data)
                .set_name(used_path.as_str())
                .set_environment(module_env)
                .eval()?;
            let exported = if matches!(exported, Value::Nil) {
                Value::Boolean(true)
            } else {
                exported
            };

            module_cache.set(module_name, exported.clone())?;
            Ok(exported)
        })
        .map_err(rt_err)?;

    env.set("require", require_fn).map_err(rt_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeon_resources::{pack_resource, PackOptions};

    fn payload_from_dir(src: &std::path::Path, name: &str) -> ResourcePayload {
        let out = src.parent().unwrap().join("out");
        let opts = PackOptions::new(src, &out, name, "1.0.0");
        let result = pack_resource(&opts).unwrap();
        let manifest_json = std::fs::read_to_string(&result.manifest_path).unwrap();
        let archive_bytes = std::fs::read(&result.pak_path).unwrap();
        ResourcePayload {
            name: name.to_string(),
            manifest_json,
            archive_bytes,
        }
    }

    fn write_file(path: &std::path::Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn loads_entrypoint_and_captures_exports() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_file(&src.join("client/main.lua"), "exports = { value = 42 }");

        let payload = payload_from_dir(&src, "hud");
        let runtime = ClientResourceRuntime::new().unwrap();
        runtime.load_resources(vec![payload]).unwrap();

        assert!(runtime.is_mounted("hud"));
        let exports = runtime.exports("hud").unwrap();
        let value: i64 = exports.get("value").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn require_finds_shared_module_and_caches_result() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_file(&src.join("shared/util.lua"), "return { double = function(n) return n * 2 end }");
        write_file(
            &src.join("client/main.lua"),
            "local util = require('util')\nexports = { doubled = util.double(21) }",
        );

        let payload = payload_from_dir(&src, "hud");
        let runtime = ClientResourceRuntime::new().unwrap();
        runtime.load_resources(vec![payload]).unwrap();

        let exports = runtime.exports("hud").unwrap();
        let doubled: i64 = exports.get("doubled").unwrap();
        assert_eq!(doubled, 42);
    }

    #[test]
    fn install_bindings_tags_timer_owner_with_current_resource() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_file(
            &src.join("client/main.lua"),
            "TIMER_ID = setTimer(function() end, 10, 1)",
        );

        let runtime = ClientResourceRuntime::new().unwrap();
        runtime.install_bindings().unwrap();

        let payload = payload_from_dir(&src, "hud");
        runtime.load_resources(vec![payload]).unwrap();

        let timer_id: u32 = runtime.lua().globals().get("TIMER_ID").unwrap();
        assert_eq!(runtime.timers.get_interval(timer_id).unwrap().as_millis(), 50);

        runtime.unload_resources();
        assert!(runtime.timers.get_interval(timer_id).is_none());
    }

    #[test]
    fn require_missing_module_fails_the_load() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_file(&src.join("client/main.lua"), "require('nonexistent')");

        let payload = payload_from_dir(&src, "hud");
        let runtime = ClientResourceRuntime::new().unwrap();
        assert!(runtime.load_resources(vec![payload]).is_err());
        assert!(!runtime.is_mounted("hud"));
    }

    #[test]
    fn unload_calls_on_resource_stop_in_reverse_order() {
        let tmp = tempfile::tempdir().unwrap();
        let first_src = tmp.path().join("first_src");
        write_file(
            &first_src.join("client/main.lua"),
            "STOP_ORDER = STOP_ORDER or {}\nonResourceStop = function() table.insert(_G.STOP_ORDER, 'first') end",
        );
        let second_src = tmp.path().join("second_src");
        write_file(
            &second_src.join("client/main.lua"),
            "onResourceStop = function() table.insert(_G.STOP_ORDER, 'second') end",
        );

        let runtime = ClientResourceRuntime::new().unwrap();
        runtime.lua().globals().set("STOP_ORDER", runtime.lua().create_table().unwrap()).unwrap();

        let first = payload_from_dir(&first_src, "first");
        let second = payload_from_dir(&second_src, "second");
        runtime.load_resources(vec![first, second]).unwrap();
        runtime.unload_resources();

        let order: Table = runtime.lua().globals().get("STOP_ORDER").unwrap();
        let first_entry: String = order.get(1).unwrap();
        let second_entry: String = order.get(2).unwrap();
        assert_eq!(first_entry, "second");
        assert_eq!(second_entry, "first");
        assert!(!runtime.is_mounted("first"));
        assert!(!runtime.is_mounted("second"));
    }
}
