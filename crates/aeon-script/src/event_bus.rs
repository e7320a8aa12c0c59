//! Process-wide event bus — §4.9.2, grounded in the original `EventManager`
//! singleton plus the Lua proxy layer in `event_bind.cpp`. Here the bus is
//! not a global singleton but an explicit value owned by the script host,
//! since a global `static` would make the client and server hosts share
//! state inside one test process.

use std::collections::HashMap;

use aeon_common::error::ScriptError;
use mlua::{RegistryKey, Value};
use parking_lot::Mutex;

pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    owner_resource: Option<String>,
    callback: RegistryKey,
}

/// `eventName -> listener[]`, mirroring the original design. `RegisterEvent`
/// must be called before any `SubscribeToEvent` for that name succeeds.
pub struct EventManager {
    registered: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: Mutex<SubscriptionId>,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    pub fn new() -> Self {
        Self {
            registered: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }

    /// Idempotent: declares `name` as a valid subscription target.
    pub fn register_event(&self, name: &str) {
        self.registered.lock().entry(name.to_string()).or_default();
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.lock().contains_key(name)
    }

    pub fn subscribe(
        &self,
        name: &str,
        callback: RegistryKey,
        owner_resource: Option<String>,
    ) -> Result<SubscriptionId, ScriptError> {
        let mut registered = self.registered.lock();
        let listeners = registered
            .get_mut(name)
            .ok_or_else(|| ScriptError::UnknownEvent(name.to_string()))?;

        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;

        listeners.push(Subscriber {
            id,
            owner_resource,
            callback,
        });
        Ok(id)
    }

    /// Removes every subscriber owned by `resource_name`, across every
    /// registered event — mirrors `KillTimersForResource`'s sweep shape but
    /// for listeners instead of timers, used when a resource unloads.
    pub fn remove_subscribers_for_resource(&self, resource_name: &str) {
        let mut registered = self.registered.lock();
        for listeners in registered.values_mut() {
            listeners.retain(|s| s.owner_resource.as_deref() != Some(resource_name));
        }
    }

    /// Dispatch `name` synchronously to every subscriber in registration
    /// order. A subscriber whose Lua callback errors is logged and does not
    /// stop later subscribers from running (§4.9.2).
    ///
    /// `args_builder` converts the bus-level payload into Lua arguments once
    /// per listener, since `mlua::Value`s are not generally `Clone`-cheap
    /// across calls with side effects; callers typically pass a closure that
    /// rebuilds primitive values from a Rust struct.
    pub fn trigger<'lua>(
        &self,
        lua: &'lua mlua::Lua,
        name: &str,
        mut args_builder: impl FnMut(&'lua mlua::Lua) -> mlua::MultiValue<'lua>,
    ) {
        let snapshot: Vec<(SubscriptionId, Option<String>)> = {
            let registered = self.registered.lock();
            match registered.get(name) {
                Some(listeners) => listeners.iter().map(|s| (s.id, s.owner_resource.clone())).collect(),
                None => return,
            }
        };

        for (id, _owner) in snapshot {
            let callback_value: Option<Value> = {
                let registered = self.registered.lock();
                registered.get(name).and_then(|listeners| {
                    listeners
                        .iter()
                        .find(|s| s.id == id)
                        .and_then(|s| lua.registry_value(&s.callback).ok())
                })
            };

            let Some(Value::Function(func)) = callback_value else {
                continue;
            };

            let args = args_builder(lua);
            if let Err(e) = func.call::<_, ()>(args) {
                tracing::error!(event = name, subscriber = id, error = %e, "event listener failed");
            }
        }
    }
}
