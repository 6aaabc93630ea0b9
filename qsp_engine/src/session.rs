use std::path::PathBuf;

use serde::Serialize;

use crate::handle::EngineView;
use crate::images::ImageRef;

/// Display settings the game controls through engine variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceConfig {
    pub use_html: bool,
    pub font_size: i64,
    pub back_color: i64,
    pub font_color: i64,
    pub link_color: i64,
}

impl InterfaceConfig {
    /// Pulls every field from the engine, leaving fields the engine does not
    /// report untouched. Returns whether any field changed.
    pub fn update_from(&mut self, view: &dyn EngineView) -> bool {
        let mut changed = false;
        if let Some(value) = view.int_var("USEHTML") {
            changed |= replace(&mut self.use_html, value != 0);
        }
        if let Some(value) = view.int_var("FSIZE") {
            changed |= replace(&mut self.font_size, value);
        }
        if let Some(value) = view.int_var("BCOLOR") {
            changed |= replace(&mut self.back_color, value);
        }
        if let Some(value) = view.int_var("FCOLOR") {
            changed |= replace(&mut self.font_color, value);
        }
        if let Some(value) = view.int_var("LCOLOR") {
            changed |= replace(&mut self.link_color, value);
        }
        changed
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListItem {
    pub icon: ImageRef,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuItem {
    pub name: String,
    pub image_path: Option<String>,
}

/// Which parts of the session a refresh replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub config_changed: bool,
    pub main_desc_changed: bool,
    pub actions_changed: bool,
    pub objects_changed: bool,
    pub vars_desc_changed: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        !(self.config_changed
            || self.main_desc_changed
            || self.actions_changed
            || self.objects_changed
            || self.vars_desc_changed)
    }
}

/// The "current game". Mutated only by the engine thread; the UI receives
/// clones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub running: bool,
    pub id: Option<String>,
    pub title: Option<String>,
    pub directory: Option<PathBuf>,
    pub file: Option<PathBuf>,
    pub interface: InterfaceConfig,
    pub main_desc: String,
    pub vars_desc: String,
    pub actions: Vec<ListItem>,
    pub objects: Vec<ListItem>,
    pub menu_items: Vec<MenuItem>,
}

impl SessionState {
    pub fn reset(&mut self) {
        *self = SessionState::default();
    }
}

pub type SessionSnapshot = SessionState;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ItemData;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Vars(HashMap<&'static str, i64>);

    impl EngineView for Vars {
        fn main_desc_changed(&self) -> bool {
            false
        }
        fn main_desc(&self) -> String {
            String::new()
        }
        fn vars_desc_changed(&self) -> bool {
            false
        }
        fn vars_desc(&self) -> String {
            String::new()
        }
        fn actions_changed(&self) -> bool {
            false
        }
        fn action_count(&self) -> usize {
            0
        }
        fn action(&self, _index: usize) -> Option<ItemData> {
            None
        }
        fn objects_changed(&self) -> bool {
            false
        }
        fn object_count(&self) -> usize {
            0
        }
        fn object(&self, _index: usize) -> Option<ItemData> {
            None
        }
        fn int_var(&self, name: &str) -> Option<i64> {
            self.0.get(name).copied()
        }
    }

    #[test]
    fn config_tracks_each_field() {
        let mut config = InterfaceConfig::default();
        let mut vars = Vars::default();
        assert!(!config.update_from(&vars));

        vars.0.insert("FSIZE", 18);
        assert!(config.update_from(&vars));
        assert_eq!(config.font_size, 18);
        assert!(!config.update_from(&vars));

        vars.0.insert("USEHTML", 1);
        assert!(config.update_from(&vars));
        assert!(config.use_html);
        assert_eq!(config.back_color, 0);
    }

    #[test]
    fn reset_clears_identity_and_lists() {
        let mut state = SessionState {
            running: true,
            id: Some("g1".into()),
            main_desc: "hello".into(),
            menu_items: vec![MenuItem {
                name: "Take".into(),
                image_path: None,
            }],
            ..SessionState::default()
        };
        state.reset();
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn empty_change_set() {
        assert!(ChangeSet::default().is_empty());
        let changes = ChangeSet {
            objects_changed: true,
            ..ChangeSet::default()
        };
        assert!(!changes.is_empty());
    }
}
