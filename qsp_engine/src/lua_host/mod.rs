//! Lua-backed interpreter.
//!
//! A world is a Lua chunk that fills the global `locations` table with one
//! function per location and keeps game variables in `vars`. Restarting
//! re-runs the chunk and enters `locations.start`. The chunk talks to the
//! player through the `qsp` table; its host half is only installed while
//! the engine is executing on behalf of a caller.

mod bindings;
mod world;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use mlua::{Error as LuaError, Lua, Result as LuaResult};
use regex::Regex;

use crate::handle::{EngineHandle, EngineHost, EngineView, ErrorRecord, ItemData};
use bindings::HostCell;
use world::{refresh_host, WorldState, WorldView};

pub const START_LOCATION: &str = "start";

/// Error numbers reported in `ErrorRecord::code`.
pub mod error_code {
    pub const SYNTAX: i64 = 1;
    pub const RUNTIME: i64 = 2;
    pub const MEMORY: i64 = 3;
    pub const BAD_INDEX: i64 = 4;
    pub const NO_WORLD: i64 = 5;
    pub const BAD_SAVE: i64 = 6;
    pub const HOST_FAULT: i64 = 7;
}

pub struct LuaEngine {
    lua: Lua,
    world: Rc<RefCell<WorldState>>,
    source: Option<(Vec<u8>, String)>,
    last_error: ErrorRecord,
}

impl LuaEngine {
    pub fn new() -> Result<Self> {
        let world = Rc::new(RefCell::new(WorldState::default()));
        let lua = bindings::new_lua(&world).context("initialising Lua runtime")?;
        Ok(Self {
            lua,
            world,
            source: None,
            last_error: ErrorRecord::default(),
        })
    }

    /// Boxed for `EngineThread::start`.
    pub fn boxed() -> Result<Box<dyn EngineHandle>> {
        Ok(Box::new(Self::new()?))
    }

    fn reset_state(&mut self) -> LuaResult<()> {
        let world = Rc::new(RefCell::new(WorldState::default()));
        self.lua = bindings::new_lua(&world)?;
        self.world = world;
        Ok(())
    }

    /// Runs `body` with the host callbacks installed, refreshing the host
    /// afterwards when asked to. Failures land in `last_error`.
    fn enter<R>(
        &mut self,
        host: &mut dyn EngineHost,
        refresh: bool,
        body: impl FnOnce(&Lua, &Rc<RefCell<WorldState>>) -> LuaResult<R>,
    ) -> Option<R> {
        let cell: HostCell<'_> = RefCell::new(host);
        let lua = &self.lua;
        let world = &self.world;
        let outcome = lua.scope(|scope| {
            bindings::install_host_callbacks(lua, scope, &cell, world)?;
            body(lua, world)
        });
        let host = cell.into_inner();
        match outcome {
            Ok(value) => {
                if refresh {
                    refresh_host(&self.lua, &self.world, host);
                }
                Some(value)
            }
            Err(err) => {
                self.last_error = self.record_lua_error(&err);
                None
            }
        }
    }

    fn record(&self, code: i64, line: i64, description: impl Into<String>) -> ErrorRecord {
        let world = self.world.borrow();
        ErrorRecord {
            location: world.location.clone(),
            action_index: world.selected_action_index(),
            line,
            code,
            description: description.into(),
        }
    }

    fn fail(&mut self, code: i64, description: impl Into<String>) -> bool {
        self.last_error = self.record(code, 0, description);
        false
    }

    fn record_lua_error(&self, err: &LuaError) -> ErrorRecord {
        let root = root_cause(err);
        let code = match root {
            LuaError::SyntaxError { .. } => error_code::SYNTAX,
            LuaError::MemoryError(_) => error_code::MEMORY,
            _ => error_code::RUNTIME,
        };
        let message = match root {
            LuaError::SyntaxError { message, .. } => message.clone(),
            LuaError::RuntimeError(message) => message.clone(),
            other => other.to_string(),
        };
        let (line, description) = split_line(&message);
        log::debug!("[qsp_engine::lua_host] script error: {err}");
        self.record(code, line, description)
    }

    fn view<T>(&self, read: impl FnOnce(&WorldView<'_>) -> T) -> T {
        let world = self.world.borrow();
        read(&WorldView {
            world: &world,
            lua: &self.lua,
        })
    }
}

fn root_cause(err: &LuaError) -> &LuaError {
    match err {
        LuaError::CallbackError { cause, .. } => root_cause(cause),
        other => other,
    }
}

fn line_pattern() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| Regex::new(r":(\d+): (.*)$").expect("static line pattern is valid"))
}

/// Splits `chunk:12: message` into the line number and the message.
fn split_line(message: &str) -> (i64, String) {
    let first = message.lines().next().unwrap_or_default();
    match line_pattern().captures(first) {
        Some(captures) => (
            captures[1].parse().unwrap_or(0),
            captures[2].to_string(),
        ),
        None => (0, first.to_string()),
    }
}

impl EngineHandle for LuaEngine {
    fn deinit(&mut self) {
        self.source = None;
        if let Err(err) = self.reset_state() {
            log::warn!("[qsp_engine::lua_host] failed to release world: {err}");
        }
    }

    fn load_world(&mut self, data: &[u8], source: &str, host: &mut dyn EngineHost) -> bool {
        self.source = None;
        if let Err(err) = self.reset_state() {
            self.last_error = self.record_lua_error(&err);
            return false;
        }
        let loaded = self.enter(host, false, |lua, _| lua.load(data).set_name(source).exec());
        if loaded.is_some() {
            self.source = Some((data.to_vec(), source.to_string()));
        }
        loaded.is_some()
    }

    fn restart(&mut self, refresh: bool, host: &mut dyn EngineHost) -> bool {
        let Some((data, source)) = self.source.clone() else {
            return self.fail(error_code::NO_WORLD, "no world loaded");
        };
        if let Err(err) = self.reset_state() {
            self.last_error = self.record_lua_error(&err);
            return false;
        }
        host.delete_menu();
        self.enter(host, refresh, |lua, world| {
            lua.load(&data).set_name(source.as_str()).exec()?;
            bindings::enter_location(lua, world, START_LOCATION, Vec::new())
        })
        .is_some()
    }

    fn open_saved_state(&mut self, data: &[u8], refresh: bool, host: &mut dyn EngineHost) -> bool {
        if self.source.is_none() {
            return self.fail(error_code::NO_WORLD, "no world loaded");
        }
        let blob = match bindings::decode_blob(data) {
            Ok(blob) => blob,
            Err(err) => return self.fail(error_code::BAD_SAVE, format!("bad save data: {err}")),
        };
        self.enter(host, refresh, |lua, world| bindings::restore_blob(lua, world, blob))
            .is_some()
    }

    fn save_state(&mut self, refresh: bool, host: &mut dyn EngineHost) -> Option<Vec<u8>> {
        let blob = self.enter(host, refresh, bindings::save_blob)?;
        match serde_json::to_vec_pretty(&blob) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                self.fail(error_code::BAD_SAVE, format!("encoding save data: {err}"));
                None
            }
        }
    }

    fn exec_string(&mut self, code: &str, refresh: bool, host: &mut dyn EngineHost) -> bool {
        self.enter(host, refresh, |lua, _| lua.load(code).set_name("exec").exec())
            .is_some()
    }

    fn run_counter(&mut self, refresh: bool, host: &mut dyn EngineHost) -> bool {
        self.enter(host, refresh, |lua, _| bindings::call_hook(lua, "on_counter", ()))
            .is_some()
    }

    fn set_selected_action(&mut self, index: usize, refresh: bool, host: &mut dyn EngineHost) -> bool {
        let count = self.world.borrow().actions.len();
        if index >= count {
            return self.fail(
                error_code::BAD_INDEX,
                format!("bad action index {index} (of {count})"),
            );
        }
        self.world.borrow_mut().selected_action = Some(index);
        if refresh {
            refresh_host(&self.lua, &self.world, host);
        }
        true
    }

    fn set_selected_object(&mut self, index: usize, refresh: bool, host: &mut dyn EngineHost) -> bool {
        let count = self.world.borrow().objects.len();
        if index >= count {
            return self.fail(
                error_code::BAD_INDEX,
                format!("bad object index {index} (of {count})"),
            );
        }
        self.world.borrow_mut().selected_object = Some(index);
        self.enter(host, refresh, |lua, _| {
            bindings::call_hook(lua, "on_object_select", index)
        })
        .is_some()
    }

    fn execute_selected_action(&mut self, refresh: bool, host: &mut dyn EngineHost) -> bool {
        let Some(index) = self.world.borrow().selected_action else {
            return true;
        };
        self.enter(host, refresh, |lua, world| bindings::run_action(lua, world, index))
            .is_some()
    }

    fn set_input_text(&mut self, text: &str) {
        self.world.borrow_mut().input_text = text.to_string();
    }

    fn exec_user_input(&mut self, refresh: bool, host: &mut dyn EngineHost) -> bool {
        let text = self.world.borrow().input_text.clone();
        self.enter(host, refresh, |lua, _| bindings::call_hook(lua, "on_input", text))
            .is_some()
    }

    fn select_menu_item(&mut self, index: usize, refresh: bool, host: &mut dyn EngineHost) -> bool {
        let count = self.world.borrow().menu.len();
        if index >= count {
            return self.fail(
                error_code::BAD_INDEX,
                format!("bad menu index {index} (of {count})"),
            );
        }
        self.enter(host, refresh, |lua, world| bindings::run_menu_item(lua, world, index))
            .is_some()
    }

    fn last_error(&self) -> ErrorRecord {
        self.last_error.clone()
    }

    fn record_fault(&mut self, description: &str) {
        self.last_error = self.record(error_code::HOST_FAULT, 0, description);
    }
}

impl EngineView for LuaEngine {
    fn main_desc_changed(&self) -> bool {
        self.view(|view| view.main_desc_changed())
    }

    fn main_desc(&self) -> String {
        self.view(|view| view.main_desc())
    }

    fn vars_desc_changed(&self) -> bool {
        self.view(|view| view.vars_desc_changed())
    }

    fn vars_desc(&self) -> String {
        self.view(|view| view.vars_desc())
    }

    fn actions_changed(&self) -> bool {
        self.view(|view| view.actions_changed())
    }

    fn action_count(&self) -> usize {
        self.view(|view| view.action_count())
    }

    fn action(&self, index: usize) -> Option<ItemData> {
        self.view(|view| view.action(index))
    }

    fn objects_changed(&self) -> bool {
        self.view(|view| view.objects_changed())
    }

    fn object_count(&self) -> usize {
        self.view(|view| view.object_count())
    }

    fn object(&self, index: usize) -> Option<ItemData> {
        self.view(|view| view.object(index))
    }

    fn int_var(&self, name: &str) -> Option<i64> {
        self.view(|view| view.int_var(name))
    }
}

#[cfg(test)]
mod tests;
