//! Compile-time security policies for a hosted VM — §4.9.1.

use aeon_common::error::ScriptError;
use mlua::Lua;

/// Which standard libraries a freshly created [`mlua::Lua`] instance opens.
/// `Sandboxed` backs client-side resources; `Trusted` backs server-side
/// resources. Neither ever opens the `io`, `os` (beyond a whitelist),
/// `package`, or `debug` libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityPolicy {
    Sandboxed,
    Trusted,
}

impl SecurityPolicy {
    /// Build a new Lua state with only this policy's libraries installed,
    /// and with `dofile`/`loadfile`/`load` removed from the base library.
    pub fn new_lua(self) -> Result<Lua, ScriptError> {
        // Both policies open the same base set (§4.9.1); `Trusted` layers a
        // whitelisted `os` table on top afterwards.
        let stdlib = mlua::StdLib::STRING
            | mlua::StdLib::TABLE
            | mlua::StdLib::COROUTINE
            | mlua::StdLib::MATH;

        let lua = Lua::new_with(stdlib, mlua::LuaOptions::new())
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        disable_unsafe_loaders(&lua)?;

        if self == SecurityPolicy::Trusted {
            install_time_whitelist(&lua)?;
        }

        Ok(lua)
    }
}

fn disable_unsafe_loaders(lua: &Lua) -> Result<(), ScriptError> {
    let globals = lua.globals();
    for name in ["dofile", "loadfile", "load"] {
        globals
            .set(name, mlua::Value::Nil)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
    }
    Ok(())
}

/// Installs `os.time`, `os.date`, `os.clock`, `os.difftime` only — every
/// other member of the `os` table (file/env/process control) is absent
/// because the base library set never included `os` to begin with, so this
/// builds a fresh minimal table rather than filtering an existing one.
fn install_time_whitelist(lua: &Lua) -> Result<(), ScriptError> {
    let os_table = lua.create_table().map_err(|e| ScriptError::Runtime(e.to_string()))?;

    let time_fn = lua
        .create_function(|_, ()| {
            Ok(std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs())
        })
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;
    os_table.set("time", time_fn).map_err(|e| ScriptError::Runtime(e.to_string()))?;

    let clock_fn = lua
        .create_function(|_, ()| {
            Ok(std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64())
        })
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;
    os_table.set("clock", clock_fn).map_err(|e| ScriptError::Runtime(e.to_string()))?;

    let date_fn = lua
        .create_function(|_, fmt: Option<String>| {
            let now = chrono::Utc::now();
            Ok(match fmt.as_deref() {
                Some("*t") | Some("!*t") => now.format("%Y-%m-%d %H:%M:%S").to_string(),
                Some(f) => now.format(f).to_string(),
                None => now.format("%c").to_string(),
            })
        })
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;
    os_table.set("date", date_fn).map_err(|e| ScriptError::Runtime(e.to_string()))?;

    let difftime_fn = lua
        .create_function(|_, (t2, t1): (f64, f64)| Ok(t2 - t1))
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;
    os_table
        .set("difftime", difftime_fn)
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;

    lua.globals()
        .set("os", os_table)
        .map_err(|e| ScriptError::Runtime(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandboxed_lua_cannot_load_arbitrary_code() {
        let lua = SecurityPolicy::Sandboxed.new_lua().unwrap();
        let load_is_nil: bool = lua
            .load("return load == nil")
            .eval()
            .unwrap();
        assert!(load_is_nil);
    }

    #[test]
    fn trusted_lua_exposes_whitelisted_os_functions() {
        let lua = SecurityPolicy::Trusted.new_lua().unwrap();
        let has_time: bool = lua.load("return type(os.time) == 'function'").eval().unwrap();
        let has_execute: bool = lua
            .load("return os.execute == nil")
            .eval()
            .unwrap();
        assert!(has_time);
        assert!(has_execute);
    }

    #[test]
    fn sandboxed_lua_has_no_os_table() {
        let lua = SecurityPolicy::Sandboxed.new_lua().unwrap();
        let has_os: bool = lua.load("return os == nil").eval().unwrap();
        assert!(has_os);
    }

    #[test]
    fn both_policies_expose_math_and_table() {
        for policy in [SecurityPolicy::Sandboxed, SecurityPolicy::Trusted] {
            let lua = policy.new_lua().unwrap();
            let ok: bool = lua
                .load("return type(math.floor) == 'function' and type(table.insert) == 'function'")
                .eval()
                .unwrap();
            assert!(ok);
        }
    }
}
