//! The engine's view of the outside world: every `EngineHost` hook the
//! interpreter calls while executing on the engine thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::AudioHandle;
use crate::content::{find_file_recursively, ContentResolver};
use crate::counter::{CounterGate, CounterGuard, MsClock};
use crate::handle::{EngineHost, EngineView, ErrorRecord, ItemData, WindowKind};
use crate::html::strip_tags;
use crate::images::ImageProvider;
use crate::lock::ReentrantLock;
use crate::rendezvous::Reply;
use crate::session::{ChangeSet, ListItem, MenuItem, SessionSnapshot, SessionState};
use crate::ui::{BridgeError, MenuChoice, UiHandle, UiSurface};

/// State shared between the engine thread and its UI-facing handle.
pub struct EngineShared {
    lock: Arc<ReentrantLock>,
    session: Mutex<SessionState>,
    gate: Arc<CounterGate>,
}

impl EngineShared {
    pub fn new(lock: Arc<ReentrantLock>) -> Self {
        Self {
            lock,
            session: Mutex::new(SessionState::default()),
            gate: Arc::new(CounterGate::new()),
        }
    }

    pub fn lock(&self) -> &Arc<ReentrantLock> {
        &self.lock
    }

    pub fn gate(&self) -> &Arc<CounterGate> {
        &self.gate
    }

    /// Copy of the session for rendering. Never waits for a running task.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.data().clone()
    }

    /// Mutates the session under the engine lock. Re-enters when called from
    /// inside a task.
    pub fn with_session<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let _held = self.lock.lock();
        let mut session = self.data();
        f(&mut session)
    }

    fn data(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub saves_dir: String,
    pub strip_html_in_lists: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            saves_dir: "saves".to_string(),
            strip_html_in_lists: true,
        }
    }
}

pub struct CallbackBridge {
    shared: Arc<EngineShared>,
    ui: UiHandle,
    audio: Option<AudioHandle>,
    content: Arc<ContentResolver>,
    images: Arc<dyn ImageProvider>,
    options: BridgeOptions,
    clock: MsClock,
    held_guards: Vec<CounterGuard>,
}

impl CallbackBridge {
    pub fn new(
        shared: Arc<EngineShared>,
        ui: UiHandle,
        audio: Option<AudioHandle>,
        content: Arc<ContentResolver>,
        images: Arc<dyn ImageProvider>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            shared,
            ui,
            audio,
            content,
            images,
            options,
            clock: MsClock::new(),
            held_guards: Vec::new(),
        }
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub fn disable_counter(&self) -> CounterGuard {
        self.shared.gate().disable()
    }

    /// Releases counter guards taken by hooks during the finished task.
    pub fn end_task(&mut self) {
        self.held_guards.clear();
    }

    pub fn restart_clock(&mut self) {
        self.clock.restart(Instant::now());
    }

    pub fn stop_all_audio(&self) {
        if let Some(audio) = self.audio.as_ref() {
            audio.stop_all();
        }
    }

    /// Points content lookups at `dir`, returning the directory used before.
    pub fn switch_game_dir(&self, dir: &Path) -> Option<PathBuf> {
        let previous = self.content.game_dir();
        self.content.set_game_dir(dir);
        self.images.invalidate_cache();
        previous
    }

    /// Resets the session and records the game whose load just succeeded.
    pub fn begin_session(&mut self, id: &str, title: &str, dir: &Path, file: &Path) {
        self.shared.with_session(|session| {
            session.reset();
            session.running = true;
            session.id = Some(id.to_string());
            session.title = Some(title.to_string());
            session.directory = Some(dir.to_path_buf());
            session.file = Some(file.to_path_buf());
        });
        if self.content.game_dir().as_deref() != Some(dir) {
            self.switch_game_dir(dir);
        }
    }

    pub fn report_error(&self, record: &ErrorRecord) {
        let message = record.to_string();
        log::error!("[qsp_engine::bridge] engine error\n{message}");
        self.ui.post(move |surface| surface.on_error(&message));
    }

    pub fn report_message(&self, message: String) {
        log::error!("[qsp_engine::bridge] {message}");
        self.ui.post(move |surface| surface.on_error(&message));
    }

    fn use_html(&self) -> bool {
        self.shared.with_session(|session| session.interface.use_html)
    }

    fn display_text(&self, text: &str) -> String {
        if self.use_html() {
            strip_tags(text)
        } else {
            text.to_string()
        }
    }

    fn list_items(
        &self,
        count: usize,
        use_html: bool,
        item: impl Fn(usize) -> Option<ItemData>,
    ) -> Vec<ListItem> {
        (0..count)
            .filter_map(item)
            .map(|data| ListItem {
                icon: self.images.get(data.image.as_deref().unwrap_or_default()),
                text: if use_html && self.options.strip_html_in_lists {
                    strip_tags(&data.name)
                } else {
                    data.name
                },
            })
            .collect()
    }

    /// Runs a blocking prompt, mapping "nobody can answer" to `default`.
    fn prompt<T, F>(&self, what: &str, default: T, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn UiSurface, Reply<T>) + Send + 'static,
    {
        match self.ui.request(f) {
            Ok(answer) => answer,
            Err(BridgeError::CalledFromUiThread) => {
                panic!("{what}: {}", BridgeError::CalledFromUiThread)
            }
            Err(BridgeError::NoAnswer) => {
                log::debug!("[qsp_engine::bridge] {what}: no answer, using default");
                default
            }
        }
    }

    fn saves_dir(&self) -> Option<PathBuf> {
        self.shared
            .with_session(|session| session.directory.clone())
            .map(|dir| dir.join(&self.options.saves_dir))
    }
}

impl EngineHost for CallbackBridge {
    fn refresh(&mut self, view: &dyn EngineView) {
        let mut changes = ChangeSet::default();
        let use_html = self.shared.with_session(|session| {
            changes.config_changed = session.interface.update_from(view);
            session.interface.use_html
        });

        // Image lookups scan the game directory; keep them off the session mutex.
        let main_desc = view.main_desc_changed().then(|| view.main_desc());
        let actions = view
            .actions_changed()
            .then(|| self.list_items(view.action_count(), use_html, |i| view.action(i)));
        let objects = view
            .objects_changed()
            .then(|| self.list_items(view.object_count(), use_html, |i| view.object(i)));
        let vars_desc = view.vars_desc_changed().then(|| view.vars_desc());

        let snapshot = self.shared.with_session(|session| {
            if let Some(main_desc) = main_desc {
                session.main_desc = main_desc;
                changes.main_desc_changed = true;
            }
            if let Some(actions) = actions {
                session.actions = actions;
                changes.actions_changed = true;
            }
            if let Some(objects) = objects {
                session.objects = objects;
                changes.objects_changed = true;
            }
            if let Some(vars_desc) = vars_desc {
                session.vars_desc = vars_desc;
                changes.vars_desc_changed = true;
            }
            session.clone()
        });
        self.ui
            .post(move |surface| surface.on_state_changed(&snapshot, changes));
    }

    fn show_picture(&mut self, path: &str) {
        if path.is_empty() {
            return;
        }
        let path = path.to_string();
        self.ui.post(move |surface| surface.on_show_picture(&path));
    }

    fn set_timer(&mut self, msecs: u32) {
        self.ui.post(move |surface| surface.set_tick_interval(msecs));
    }

    fn show_message(&mut self, text: &str) {
        let text = self.display_text(text);
        self.prompt("show message", (), move |surface, reply| {
            surface.show_message(&text, reply)
        });
    }

    fn play_file(&mut self, path: &str, volume: u8) {
        if path.is_empty() {
            return;
        }
        if let Some(audio) = self.audio.as_ref() {
            audio.play(path, volume);
        }
    }

    fn is_playing_file(&mut self, path: &str) -> bool {
        !path.is_empty()
            && self
                .audio
                .as_ref()
                .map(|audio| audio.is_playing(path))
                .unwrap_or(false)
    }

    fn close_file(&mut self, path: Option<&str>) {
        let Some(audio) = self.audio.as_ref() else {
            return;
        };
        match path.filter(|path| !path.is_empty()) {
            Some(path) => audio.stop(path),
            None => audio.stop_all(),
        }
    }

    fn open_game(&mut self, name: Option<&str>) -> Option<Vec<u8>> {
        let Some(name) = name.filter(|name| !name.is_empty()) else {
            log::error!("[qsp_engine::bridge] open game requested without a file name");
            return None;
        };
        let Some(saves) = self.saves_dir() else {
            log::error!("[qsp_engine::bridge] open game {name}: no game directory");
            return None;
        };
        let Some(file) = find_file_recursively(&saves, name) else {
            log::error!("[qsp_engine::bridge] save file not found: {name}");
            return None;
        };
        match fs::read(&file) {
            Ok(bytes) => {
                self.held_guards.push(self.disable_counter());
                Some(bytes)
            }
            Err(err) => {
                log::error!(
                    "[qsp_engine::bridge] failed to read save {}: {err}",
                    file.display()
                );
                None
            }
        }
    }

    fn save_game(&mut self, name: Option<&str>) {
        let suggested = name.map(str::to_string);
        self.ui
            .post(move |surface| surface.request_save_slot(suggested.as_deref()));
    }

    fn input_box(&mut self, prompt: &str) -> String {
        let prompt = self.display_text(prompt);
        self.prompt("input box", String::new(), move |surface, reply| {
            surface.request_input(&prompt, reply)
        })
    }

    fn ms_count(&mut self) -> u32 {
        self.clock.elapsed_ms(Instant::now())
    }

    fn add_menu_item(&mut self, name: &str, image: Option<&str>) {
        let item = MenuItem {
            name: name.to_string(),
            image_path: image.filter(|path| !path.is_empty()).map(str::to_string),
        };
        self.shared.with_session(|session| session.menu_items.push(item));
    }

    fn show_menu(&mut self) -> Option<usize> {
        let items = self.shared.with_session(|session| session.menu_items.clone());
        let count = items.len();
        let choice = self.prompt("show menu", MenuChoice::Cancelled, move |surface, reply| {
            surface.request_menu_choice(&items, reply)
        });
        match choice {
            MenuChoice::Selected(index) if index < count => Some(index),
            MenuChoice::Selected(index) => {
                log::warn!("[qsp_engine::bridge] menu answered with stale index {index}");
                None
            }
            MenuChoice::Cancelled => None,
        }
    }

    fn delete_menu(&mut self) {
        self.shared.with_session(|session| session.menu_items.clear());
    }

    fn wait(&mut self, msecs: u32) {
        thread::sleep(Duration::from_millis(u64::from(msecs)));
    }

    fn show_window(&mut self, kind: WindowKind, visible: bool) {
        self.ui
            .post(move |surface| surface.on_window_visibility_changed(kind, visible));
    }

    fn file_contents(&mut self, path: &str) -> Option<Vec<u8>> {
        let file = self.content.find(path)?;
        match fs::read(&file) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                log::error!(
                    "[qsp_engine::bridge] failed to read {}: {err}",
                    file.display()
                );
                None
            }
        }
    }

    fn change_game_dir(&mut self, path: &str) {
        let dir = PathBuf::from(path);
        if !dir.is_dir() {
            log::error!("[qsp_engine::bridge] game directory not found: {path}");
            return;
        }
        let changed = self.shared.with_session(|session| {
            if session.directory.as_deref() == Some(dir.as_path()) {
                return false;
            }
            session.directory = Some(dir.clone());
            true
        });
        if changed {
            self.switch_game_dir(&dir);
        }
    }
}
