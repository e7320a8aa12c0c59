//! Timer manager — §4.9.3, grounded directly in `timer_manager.cpp`'s
//! interval clamp, `remaining_executions` countdown, and `next_call`
//! re-basing on `SetInterval`.

use std::time::{Duration, Instant};

use mlua::RegistryKey;
use parking_lot::Mutex;

pub type TimerId = u32;

const MINIMUM_INTERVAL: Duration = Duration::from_millis(50);

struct Timer {
    id: TimerId,
    callback: RegistryKey,
    interval: Duration,
    remaining_executions: u32,
    infinite: bool,
    next_call: Instant,
    owner_resource: Option<String>,
}

/// Invoked around every timer callback so a resource manager can push its
/// "current resource" context before the call and restore it afterwards
/// (§4.9.3's `OwnerContextExecutor` hook).
pub type OwnerContextExecutor = Box<dyn Fn(Option<&str>, &mut dyn FnMut()) + Send>;

pub struct TimerManager {
    next_id: Mutex<TimerId>,
    timers: Mutex<Vec<Timer>>,
    executor: Mutex<Option<OwnerContextExecutor>>,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            timers: Mutex::new(Vec::new()),
            executor: Mutex::new(None),
        }
    }

    pub fn set_owner_context_executor(&self, executor: OwnerContextExecutor) {
        *self.executor.lock() = Some(executor);
    }

    pub fn create_timer(
        &self,
        callback: RegistryKey,
        interval_ms: u64,
        execute_times: u32,
        owner_resource: Option<String>,
    ) -> TimerId {
        let interval = Duration::from_millis(interval_ms).max(MINIMUM_INTERVAL);

        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;

        self.timers.lock().push(Timer {
            id,
            callback,
            interval,
            remaining_executions: execute_times,
            infinite: execute_times == 0,
            next_call: Instant::now() + interval,
            owner_resource,
        });
        id
    }

    pub fn kill_timer(&self, id: TimerId) {
        self.timers.lock().retain(|t| t.id != id);
    }

    pub fn kill_timers_for_resource(&self, resource_name: &str) {
        self.timers
            .lock()
            .retain(|t| t.owner_resource.as_deref() != Some(resource_name));
    }

    pub fn get_interval(&self, id: TimerId) -> Option<Duration> {
        self.timers.lock().iter().find(|t| t.id == id).map(|t| t.interval)
    }

    pub fn set_interval(&self, id: TimerId, interval_ms: u64) {
        let interval = Duration::from_millis(interval_ms).max(MINIMUM_INTERVAL);
        if let Some(t) = self.timers.lock().iter_mut().find(|t| t.id == id) {
            t.interval = interval;
            t.next_call = Instant::now() + interval;
        }
    }

    /// `0` means infinite, matching the original's `GetExecuteTimes`
    /// convention of reporting `0` for timers created with `execute_times == 0`.
    pub fn get_execute_times(&self, id: TimerId) -> Option<u32> {
        self.timers.lock().iter().find(|t| t.id == id).map(|t| {
            if t.infinite {
                0
            } else {
                t.remaining_executions
            }
        })
    }

    pub fn set_execute_times(&self, id: TimerId, execute_times: u32) {
        if let Some(t) = self.timers.lock().iter_mut().find(|t| t.id == id) {
            t.remaining_executions = execute_times;
            t.infinite = execute_times == 0;
        }
    }

    pub fn clear(&self) {
        self.timers.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every timer whose `next_call` has arrived. `lua` resolves the
    /// registry key back into a callable; failures are logged by the caller
    /// (the Lua call itself is made through `lua`'s protected-call path via
    /// `Function::call`, whose `Err` the caller is expected to log).
    pub fn process_timers(&self, lua: &mlua::Lua) {
        if self.is_empty() {
            return;
        }

        let due_ids: Vec<TimerId> = {
            let now = Instant::now();
            self.timers
                .lock()
                .iter()
                .filter(|t| now >= t.next_call)
                .map(|t| t.id)
                .collect()
        };

        let mut to_remove = Vec::new();

        for id in due_ids {
            let (owner, func) = {
                let timers = self.timers.lock();
                let Some(t) = timers.iter().find(|t| t.id == id) else {
                    continue;
                };
                let func = match lua.registry_value::<mlua::Function>(&t.callback) {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                (t.owner_resource.clone(), func)
            };

            let executor_guard = self.executor.lock();
            let mut call = || {
                if let Err(e) = func.call::<_, ()>(()) {
                    tracing::error!(timer = id, error = %e, "timer callback failed");
                }
            };
            match executor_guard.as_ref() {
                Some(executor) => executor(owner.as_deref(), &mut call),
                None => call(),
            }
            drop(executor_guard);

            let mut timers = self.timers.lock();
            if let Some(t) = timers.iter_mut().find(|t| t.id == id) {
                if !t.infinite {
                    if t.remaining_executions == 0 {
                        to_remove.push(id);
                        continue;
                    }
                    t.remaining_executions -= 1;
                    if t.remaining_executions == 0 {
                        to_remove.push(id);
                        continue;
                    }
                }
                t.next_call = Instant::now() + t.interval;
            }
        }

        if !to_remove.is_empty() {
            self.timers.lock().retain(|t| !to_remove.contains(&t.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callback(lua: &mlua::Lua) -> RegistryKey {
        let f = lua.create_function(|_, ()| Ok(())).unwrap();
        lua.create_registry_value(f).unwrap()
    }

    #[test]
    fn interval_below_minimum_is_clamped() {
        let lua = mlua::Lua::new();
        let mgr = TimerManager::new();
        let id = mgr.create_timer(noop_callback(&lua), 1, 0, None);
        assert_eq!(mgr.get_interval(id).unwrap(), MINIMUM_INTERVAL);
    }

    #[test]
    fn zero_execute_times_means_infinite() {
        let lua = mlua::Lua::new();
        let mgr = TimerManager::new();
        let id = mgr.create_timer(noop_callback(&lua), 100, 0, None);
        assert_eq!(mgr.get_execute_times(id), Some(0));
    }

    #[test]
    fn kill_timer_removes_it() {
        let lua = mlua::Lua::new();
        let mgr = TimerManager::new();
        let id = mgr.create_timer(noop_callback(&lua), 100, 0, None);
        mgr.kill_timer(id);
        assert!(mgr.get_interval(id).is_none());
    }

    #[test]
    fn kill_timers_for_resource_only_affects_owned_timers() {
        let lua = mlua::Lua::new();
        let mgr = TimerManager::new();
        let a = mgr.create_timer(noop_callback(&lua), 100, 0, Some("hud".into()));
        let b = mgr.create_timer(noop_callback(&lua), 100, 0, Some("chat".into()));
        mgr.kill_timers_for_resource("hud");
        assert!(mgr.get_interval(a).is_none());
        assert!(mgr.get_interval(b).is_some());
    }

    #[test]
    fn finite_timer_is_removed_once_a_past_due_call_runs() {
        let lua = mlua::Lua::new();
        let mgr = TimerManager::new();
        let id = mgr.create_timer(noop_callback(&lua), 50, 1, None);
        mgr.set_interval(id, 0); // re-bases next_call to "now" (clamped to 50ms) so it's not due yet
        std::thread::sleep(Duration::from_millis(60));
        mgr.process_timers(&lua);
        assert!(mgr.get_interval(id).is_none());
    }

    #[test]
    fn set_execute_times_updates_infinite_flag() {
        let lua = mlua::Lua::new();
        let mgr = TimerManager::new();
        let id = mgr.create_timer(noop_callback(&lua), 100, 5, None);
        mgr.set_execute_times(id, 0);
        assert_eq!(mgr.get_execute_times(id), Some(0));
    }
}
