//! Call surface of the embedded interpreter and the hooks it calls back
//! into while executing.

use std::fmt;

use serde::Serialize;

/// Kinds of panes a game may show or hide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Actions,
    Objects,
    Vars,
    Input,
}

impl WindowKind {
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(WindowKind::Actions),
            1 => Some(WindowKind::Objects),
            2 => Some(WindowKind::Vars),
            3 => Some(WindowKind::Input),
            _ => None,
        }
    }
}

/// Engine-side description of one action or object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemData {
    pub name: String,
    pub image: Option<String>,
}

/// Last failure recorded by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub location: String,
    pub action_index: i64,
    pub line: i64,
    pub code: i64,
    pub description: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Location: {}\nAction: {}\nLine: {}\nError number: {}\nDescription: {}",
            self.location, self.action_index, self.line, self.code, self.description
        )
    }
}

/// Read-only accessors used while building a state snapshot.
pub trait EngineView {
    fn main_desc_changed(&self) -> bool;
    fn main_desc(&self) -> String;
    fn vars_desc_changed(&self) -> bool;
    fn vars_desc(&self) -> String;
    fn actions_changed(&self) -> bool;
    fn action_count(&self) -> usize;
    fn action(&self, index: usize) -> Option<ItemData>;
    fn objects_changed(&self) -> bool;
    fn object_count(&self) -> usize;
    fn object(&self, index: usize) -> Option<ItemData>;
    /// Integer value of a configuration variable such as `USEHTML`.
    fn int_var(&self, name: &str) -> Option<i64>;
}

/// Hooks the engine invokes, on the engine thread, while it executes.
pub trait EngineHost {
    /// The engine finished a step that may have changed what is displayed.
    fn refresh(&mut self, view: &dyn EngineView);
    fn show_picture(&mut self, path: &str);
    fn set_timer(&mut self, msecs: u32);
    /// Blocks until the message was acknowledged.
    fn show_message(&mut self, text: &str);
    fn play_file(&mut self, path: &str, volume: u8);
    fn is_playing_file(&mut self, path: &str) -> bool;
    /// `None` closes every playing file.
    fn close_file(&mut self, path: Option<&str>);
    /// Returns the saved-state bytes to open, if any were found. The host
    /// keeps the periodic counter disabled until the current task ends.
    fn open_game(&mut self, name: Option<&str>) -> Option<Vec<u8>>;
    fn save_game(&mut self, name: Option<&str>);
    /// Blocks until the user entered text; empty when nobody can answer.
    fn input_box(&mut self, prompt: &str) -> String;
    /// Milliseconds elapsed since the previous call (or the session start).
    fn ms_count(&mut self) -> u32;
    fn add_menu_item(&mut self, name: &str, image: Option<&str>);
    /// Blocks until the user picked an item; `None` when cancelled.
    fn show_menu(&mut self) -> Option<usize>;
    fn delete_menu(&mut self);
    fn wait(&mut self, msecs: u32);
    fn show_window(&mut self, kind: WindowKind, visible: bool);
    fn file_contents(&mut self, path: &str) -> Option<Vec<u8>>;
    fn change_game_dir(&mut self, path: &str);
}

/// The embedded interpreter. Every `bool` return reports success; on
/// failure the details are available from `last_error`.
pub trait EngineHandle {
    fn init(&mut self) {}
    fn deinit(&mut self) {}

    fn load_world(&mut self, data: &[u8], source: &str, host: &mut dyn EngineHost) -> bool;
    fn restart(&mut self, refresh: bool, host: &mut dyn EngineHost) -> bool;
    fn open_saved_state(&mut self, data: &[u8], refresh: bool, host: &mut dyn EngineHost)
        -> bool;
    fn save_state(&mut self, refresh: bool, host: &mut dyn EngineHost) -> Option<Vec<u8>>;
    fn exec_string(&mut self, code: &str, refresh: bool, host: &mut dyn EngineHost) -> bool;
    fn run_counter(&mut self, refresh: bool, host: &mut dyn EngineHost) -> bool;
    fn set_selected_action(&mut self, index: usize, refresh: bool, host: &mut dyn EngineHost)
        -> bool;
    fn set_selected_object(&mut self, index: usize, refresh: bool, host: &mut dyn EngineHost)
        -> bool;
    fn execute_selected_action(&mut self, refresh: bool, host: &mut dyn EngineHost) -> bool;
    fn set_input_text(&mut self, text: &str);
    fn exec_user_input(&mut self, refresh: bool, host: &mut dyn EngineHost) -> bool;
    fn select_menu_item(&mut self, index: usize, refresh: bool, host: &mut dyn EngineHost) -> bool;

    fn last_error(&self) -> ErrorRecord;
    /// Records a failure raised outside the engine's own error reporting,
    /// such as a panic at the task boundary.
    fn record_fault(&mut self, description: &str);
}
