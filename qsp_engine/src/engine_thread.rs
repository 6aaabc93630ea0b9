//! The engine thread: sole owner of the interpreter.
//!
//! Commands arrive from the UI thread and run as tasks on a
//! `Worker<EngineCore>`, one at a time and in the order they were issued.
//! Callbacks the interpreter makes while a task runs go through the
//! `CallbackBridge` owned next to it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;

use crate::audio::AudioHandle;
use crate::bridge::{BridgeOptions, CallbackBridge, EngineShared};
use crate::content::ContentResolver;
use crate::handle::{EngineHandle, EngineHost};
use crate::images::ImageProvider;
use crate::lock::ReentrantLock;
use crate::session::SessionSnapshot;
use crate::ui::UiHandle;
use crate::worker::{Owned, Worker, WorkerError, WorkerState};

const USER_INPUT_PROMPT: &str = "User input:";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineThreadError {
    #[error("engine commands must be issued from the UI thread")]
    NotUiThread,
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// What `execute_counter` did with a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Submitted,
    /// A task was running; the tick was dropped.
    SkippedBusy,
    /// Ticks are disabled; one tick will run when they are re-enabled.
    Deferred,
}

/// Everything the engine thread needs from the rest of the player.
pub struct EngineDeps {
    pub ui: UiHandle,
    pub audio: Option<AudioHandle>,
    pub content: Arc<ContentResolver>,
    pub images: Arc<dyn ImageProvider>,
    pub options: BridgeOptions,
}

/// Interpreter plus its callback bridge, living on the engine thread.
pub struct EngineCore {
    handle: Box<dyn EngineHandle>,
    bridge: CallbackBridge,
}

impl EngineCore {
    fn check(&mut self, ok: bool) -> bool {
        if !ok {
            let record = self.handle.last_error();
            self.bridge.report_error(&record);
        }
        ok
    }

    /// The session keeps the previous game until the new one has loaded.
    fn run_game(&mut self, id: &str, title: &str, directory: &Path, file: &Path) {
        let _window = self.bridge.disable_counter();
        let data = match fs::read(file)
            .with_context(|| format!("reading game file {}", file.display()))
        {
            Ok(data) => data,
            Err(err) => {
                self.bridge.report_message(format!("{err:#}"));
                return;
            }
        };

        self.bridge.stop_all_audio();
        let previous_dir = self.bridge.switch_game_dir(directory);
        let source = file.display().to_string();
        let ok = self.handle.load_world(&data, &source, &mut self.bridge);
        if !self.check(ok) {
            if let Some(previous_dir) = previous_dir {
                self.bridge.switch_game_dir(&previous_dir);
            }
            return;
        }
        log::info!("[qsp_engine::engine_thread] loaded {source}");
        self.bridge.begin_session(id, title, directory, file);

        self.bridge.restart_clock();
        let ok = self.handle.restart(true, &mut self.bridge);
        self.check(ok);
    }

    fn restart_game(&mut self) {
        let identity = self.bridge.shared().with_session(|session| {
            Some((
                session.id.clone()?,
                session.title.clone().unwrap_or_default(),
                session.directory.clone()?,
                session.file.clone()?,
            ))
        });
        match identity {
            Some((id, title, directory, file)) => self.run_game(&id, &title, &directory, &file),
            None => log::warn!("[qsp_engine::engine_thread] restart requested with no game loaded"),
        }
    }

    fn load_game_state(&mut self, path: &Path) {
        let _window = self.bridge.disable_counter();
        let data = match fs::read(path)
            .with_context(|| format!("reading saved state {}", path.display()))
        {
            Ok(data) => data,
            Err(err) => {
                self.bridge.report_message(format!("{err:#}"));
                return;
            }
        };
        let ok = self.handle.open_saved_state(&data, true, &mut self.bridge);
        self.check(ok);
    }

    fn save_game_state(&mut self, path: &Path) {
        let Some(blob) = self.handle.save_state(false, &mut self.bridge) else {
            log::debug!("[qsp_engine::engine_thread] engine produced no state to save");
            return;
        };
        if let Err(err) =
            fs::write(path, blob).with_context(|| format!("writing saved state {}", path.display()))
        {
            self.bridge.report_message(format!("{err:#}"));
        }
    }

    fn action_clicked(&mut self, index: usize) {
        let ok = self
            .handle
            .set_selected_action(index, false, &mut self.bridge);
        self.check(ok);
        let ok = self.handle.execute_selected_action(true, &mut self.bridge);
        self.check(ok);
    }

    fn input_area_clicked(&mut self) {
        let text = self.bridge.input_box(USER_INPUT_PROMPT);
        self.handle.set_input_text(&text);
        let ok = self.handle.exec_user_input(true, &mut self.bridge);
        self.check(ok);
    }

    fn tick(&mut self) {
        let ok = self.handle.run_counter(true, &mut self.bridge);
        self.check(ok);
    }
}

impl Owned for EngineCore {
    fn on_fault(&mut self, message: &str) {
        self.handle.record_fault(message);
        let record = self.handle.last_error();
        self.bridge.report_error(&record);
        self.bridge.end_task();
    }

    fn teardown(&mut self) {
        self.bridge.end_task();
        self.handle.deinit();
    }
}

pub struct EngineThread {
    worker: Worker<EngineCore>,
    shared: Arc<EngineShared>,
    ui: UiHandle,
    deps: Option<EngineDeps>,
}

impl EngineThread {
    /// Binds the command surface to the UI thread behind `deps.ui`.
    pub fn new(deps: EngineDeps) -> Self {
        let lock = Arc::new(ReentrantLock::new());
        Self {
            worker: Worker::with_lock("qsp_engine", lock.clone()),
            shared: Arc::new(EngineShared::new(lock)),
            ui: deps.ui.clone(),
            deps: Some(deps),
        }
    }

    /// Spawns the engine thread; `factory` builds the interpreter on it.
    pub fn start<F>(&mut self, factory: F) -> Result<(), EngineThreadError>
    where
        F: FnOnce() -> anyhow::Result<Box<dyn EngineHandle>> + Send + 'static,
    {
        self.ensure_ui_thread("start")?;
        let Some(deps) = self.deps.take() else {
            log::warn!("[qsp_engine::engine_thread] already started; ignoring start");
            return Ok(());
        };
        let bridge = CallbackBridge::new(
            self.shared.clone(),
            deps.ui,
            deps.audio,
            deps.content,
            deps.images,
            deps.options,
        );
        self.worker.start(move || {
            let mut handle = factory()?;
            handle.init();
            Ok(EngineCore { handle, bridge })
        })?;

        if let Some(queue) = self.worker.queue() {
            self.shared.gate().set_resume(move || {
                log::debug!("[qsp_engine::engine_thread] running deferred tick");
                let tick = |core: &mut EngineCore| {
                    core.tick();
                    core.bridge.end_task();
                };
                if let Err(err) = queue.submit(tick) {
                    log::debug!("[qsp_engine::engine_thread] deferred tick dropped: {err}");
                }
            });
        }
        Ok(())
    }

    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.worker.wait_until_ready(timeout)
    }

    /// Finishes the running task, discards queued ones, releases the
    /// interpreter and joins the thread. Safe to call more than once.
    pub fn stop(&mut self) -> Result<(), EngineThreadError> {
        self.ensure_ui_thread("stop")?;
        self.worker.stop();
        Ok(())
    }

    pub fn run_game(
        &self,
        id: &str,
        title: &str,
        directory: impl Into<PathBuf>,
        file: impl Into<PathBuf>,
    ) -> Result<(), EngineThreadError> {
        let (id, title) = (id.to_string(), title.to_string());
        let (directory, file) = (directory.into(), file.into());
        self.dispatch("run game", move |core| {
            core.run_game(&id, &title, &directory, &file)
        })
    }

    pub fn restart_game(&self) -> Result<(), EngineThreadError> {
        self.dispatch("restart game", EngineCore::restart_game)
    }

    pub fn load_game_state(&self, path: impl Into<PathBuf>) -> Result<(), EngineThreadError> {
        let path = path.into();
        self.dispatch("load state", move |core| core.load_game_state(&path))
    }

    pub fn save_game_state(&self, path: impl Into<PathBuf>) -> Result<(), EngineThreadError> {
        let path = path.into();
        self.dispatch("save state", move |core| core.save_game_state(&path))
    }

    pub fn on_action_selected(&self, index: usize) -> Result<(), EngineThreadError> {
        self.dispatch("select action", move |core| {
            let ok = core.handle.set_selected_action(index, true, &mut core.bridge);
            core.check(ok);
        })
    }

    pub fn on_action_clicked(&self, index: usize) -> Result<(), EngineThreadError> {
        self.dispatch("click action", move |core| core.action_clicked(index))
    }

    pub fn on_object_selected(&self, index: usize) -> Result<(), EngineThreadError> {
        self.dispatch("select object", move |core| {
            let ok = core.handle.set_selected_object(index, true, &mut core.bridge);
            core.check(ok);
        })
    }

    /// Runs a menu item picked outside a blocking menu prompt.
    pub fn on_menu_item_selected(&self, index: usize) -> Result<(), EngineThreadError> {
        self.dispatch("select menu item", move |core| {
            let ok = core.handle.select_menu_item(index, true, &mut core.bridge);
            core.check(ok);
        })
    }

    /// Ignored while no surface is attached to answer the prompt.
    pub fn on_input_area_clicked(&self) -> Result<(), EngineThreadError> {
        if !self.ui.is_attached() {
            return Ok(());
        }
        self.dispatch("input area", EngineCore::input_area_clicked)
    }

    pub fn execute(&self, code: &str) -> Result<(), EngineThreadError> {
        let code = code.to_string();
        self.dispatch("execute", move |core| {
            let ok = core.handle.exec_string(&code, true, &mut core.bridge);
            core.check(ok);
        })
    }

    /// Periodic tick. Never queues behind a running task.
    pub fn execute_counter(&self) -> Result<TickOutcome, EngineThreadError> {
        self.ensure_ui_thread("tick")?;
        if self.shared.gate().defer_if_disabled() {
            log::debug!("[qsp_engine::engine_thread] tick deferred: counter disabled");
            return Ok(TickOutcome::Deferred);
        }
        if self.worker.is_busy() {
            log::debug!("[qsp_engine::engine_thread] tick skipped: engine busy");
            return Ok(TickOutcome::SkippedBusy);
        }
        self.dispatch("tick", EngineCore::tick)?;
        Ok(TickOutcome::Submitted)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.worker.is_busy()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    fn ensure_ui_thread(&self, what: &str) -> Result<(), EngineThreadError> {
        if self.ui.is_ui_thread() {
            return Ok(());
        }
        log::error!("[qsp_engine::engine_thread] {what} called off the UI thread");
        Err(EngineThreadError::NotUiThread)
    }

    fn dispatch<F>(&self, what: &str, task: F) -> Result<(), EngineThreadError>
    where
        F: FnOnce(&mut EngineCore) + Send + 'static,
    {
        self.ensure_ui_thread(what)?;
        self.worker
            .submit(move |core: &mut EngineCore| {
                task(core);
                core.bridge.end_task();
            })
            .map_err(|err| {
                log::warn!("[qsp_engine::engine_thread] {what} not queued: {err}");
                EngineThreadError::from(err)
            })
    }
}

impl Drop for EngineThread {
    fn drop(&mut self) {
        self.worker.stop();
    }
}
