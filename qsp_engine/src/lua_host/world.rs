use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::{Lua, RegistryKey, Value};
use serde::{Deserialize, Serialize};

use crate::handle::{EngineHost, EngineView, ItemData};

/// An action on the current location, with the Lua function it runs.
pub(crate) struct ActionEntry {
    pub item: ItemData,
    pub handler: RegistryKey,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Changes {
    pub main_desc: bool,
    pub vars_desc: bool,
    pub actions: bool,
    pub objects: bool,
}

impl Changes {
    fn all() -> Self {
        Self {
            main_desc: true,
            vars_desc: true,
            actions: true,
            objects: true,
        }
    }
}

/// Host-visible world state. Lua-side data (locations, `vars`) lives in the
/// interpreter itself.
pub(crate) struct WorldState {
    pub location: String,
    pub main_desc: String,
    pub vars_desc: String,
    pub actions: Vec<ActionEntry>,
    pub objects: Vec<ItemData>,
    pub menu: Vec<Option<RegistryKey>>,
    pub selected_action: Option<usize>,
    pub selected_object: Option<usize>,
    pub input_text: String,
    pub changes: Changes,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            location: String::new(),
            main_desc: String::new(),
            vars_desc: String::new(),
            actions: Vec::new(),
            objects: Vec::new(),
            menu: Vec::new(),
            selected_action: None,
            selected_object: None,
            input_text: String::new(),
            changes: Changes::all(),
        }
    }
}

impl WorldState {
    pub fn append_main(&mut self, text: &str) {
        self.main_desc.push_str(text);
        self.changes.main_desc = true;
    }

    pub fn clear_main(&mut self) {
        if !self.main_desc.is_empty() {
            self.main_desc.clear();
            self.changes.main_desc = true;
        }
    }

    pub fn append_vars(&mut self, text: &str) {
        self.vars_desc.push_str(text);
        self.changes.vars_desc = true;
    }

    pub fn clear_vars(&mut self) {
        if !self.vars_desc.is_empty() {
            self.vars_desc.clear();
            self.changes.vars_desc = true;
        }
    }

    /// Adds an action unless one with the same name already exists.
    pub fn add_action(&mut self, item: ItemData, handler: RegistryKey) -> bool {
        if self.actions.iter().any(|entry| entry.item.name == item.name) {
            return false;
        }
        self.actions.push(ActionEntry { item, handler });
        self.changes.actions = true;
        true
    }

    pub fn clear_actions(&mut self) {
        self.actions.clear();
        self.selected_action = None;
        self.changes.actions = true;
    }

    pub fn add_object(&mut self, item: ItemData) {
        self.objects.push(item);
        self.changes.objects = true;
    }

    pub fn remove_object(&mut self, name: &str) -> bool {
        let before = self.objects.len();
        self.objects.retain(|item| item.name != name);
        let removed = self.objects.len() != before;
        if removed {
            self.selected_object = None;
            self.changes.objects = true;
        }
        removed
    }

    pub fn selected_action_index(&self) -> i64 {
        self.selected_action
            .and_then(|index| i64::try_from(index).ok())
            .unwrap_or(-1)
    }
}

/// `EngineView` over a borrowed world plus the interpreter holding `vars`.
pub(crate) struct WorldView<'a> {
    pub world: &'a WorldState,
    pub lua: &'a Lua,
}

impl EngineView for WorldView<'_> {
    fn main_desc_changed(&self) -> bool {
        self.world.changes.main_desc
    }

    fn main_desc(&self) -> String {
        self.world.main_desc.clone()
    }

    fn vars_desc_changed(&self) -> bool {
        self.world.changes.vars_desc
    }

    fn vars_desc(&self) -> String {
        self.world.vars_desc.clone()
    }

    fn actions_changed(&self) -> bool {
        self.world.changes.actions
    }

    fn action_count(&self) -> usize {
        self.world.actions.len()
    }

    fn action(&self, index: usize) -> Option<ItemData> {
        self.world.actions.get(index).map(|entry| entry.item.clone())
    }

    fn objects_changed(&self) -> bool {
        self.world.changes.objects
    }

    fn object_count(&self) -> usize {
        self.world.objects.len()
    }

    fn object(&self, index: usize) -> Option<ItemData> {
        self.world.objects.get(index).cloned()
    }

    fn int_var(&self, name: &str) -> Option<i64> {
        let Ok(Value::Table(vars)) = self.lua.globals().get::<_, Value>("vars") else {
            return None;
        };
        match vars.get::<_, Value>(name).ok()? {
            Value::Integer(value) => Some(value as i64),
            Value::Number(value) => Some(value as i64),
            Value::Boolean(flag) => Some(i64::from(flag)),
            Value::String(text) => text.to_str().ok()?.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Hands the current world to the host and clears the change flags.
pub(crate) fn refresh_host(lua: &Lua, world: &Rc<RefCell<WorldState>>, host: &mut dyn EngineHost) {
    {
        let state = world.borrow();
        host.refresh(&WorldView {
            world: &state,
            lua,
        });
    }
    world.borrow_mut().changes = Changes::default();
}

/// Scalar variable as stored in a save blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum SavedVar {
    Flag(bool),
    Int(i64),
    Num(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SavedObject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Save blob layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SaveBlob {
    pub location: String,
    #[serde(default)]
    pub vars: BTreeMap<String, SavedVar>,
    #[serde(default)]
    pub objects: Vec<SavedObject>,
}
