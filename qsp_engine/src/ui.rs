//! Marshaling between worker threads and the UI thread.
//!
//! The UI thread owns a `UiLoop` and the attached `UiSurface`; other threads
//! hold a `UiHandle` and either post fire-and-forget closures or make a
//! blocking request that the surface answers through a `Reply`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::handle::WindowKind;
use crate::rendezvous::{rendezvous, Reply};
use crate::session::{ChangeSet, MenuItem, SessionSnapshot};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("blocking prompt requested on the UI thread")]
    CalledFromUiThread,
    #[error("no answer from the UI surface")]
    NoAnswer,
}

/// Reply to a menu prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Selected(usize),
    Cancelled,
}

impl MenuChoice {
    pub const CANCELLED_INDEX: i32 = -1;

    pub fn as_index(self) -> i32 {
        match self {
            MenuChoice::Selected(index) => i32::try_from(index).unwrap_or(i32::MAX),
            MenuChoice::Cancelled => Self::CANCELLED_INDEX,
        }
    }
}

/// Front end capability. Runs on the UI thread only. Prompt methods must
/// answer their `Reply` exactly once, now or later; they must not block.
pub trait UiSurface {
    fn on_state_changed(&mut self, snapshot: &SessionSnapshot, changes: ChangeSet);
    fn on_error(&mut self, message: &str);
    fn on_show_picture(&mut self, path: &str);
    fn show_message(&mut self, text: &str, reply: Reply<()>);
    fn request_input(&mut self, prompt: &str, reply: Reply<String>);
    fn request_menu_choice(&mut self, items: &[MenuItem], reply: Reply<MenuChoice>);
    fn request_save_slot(&mut self, suggested: Option<&str>);
    fn set_tick_interval(&mut self, msecs: u32);
    fn on_window_visibility_changed(&mut self, kind: WindowKind, visible: bool);
}

/// How often a blocked request re-checks that a surface is still attached.
const DETACH_POLL: Duration = Duration::from_millis(50);

type UiTask = Box<dyn FnOnce(&mut dyn UiSurface) + Send + 'static>;

#[derive(Clone)]
pub struct UiHandle {
    sender: Sender<UiTask>,
    ui_thread: ThreadId,
    attached: Arc<AtomicBool>,
    prompt_timeout: Option<Duration>,
}

impl UiHandle {
    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.ui_thread
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Queues `f` for the UI thread without waiting. Dropped when no surface
    /// is attached.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut dyn UiSurface) + Send + 'static,
    {
        if !self.is_attached() {
            log::debug!("[qsp_engine::ui] no surface attached; dropping UI update");
            return false;
        }
        self.sender.send(Box::new(f)).is_ok()
    }

    /// Queues `f` for the UI thread and blocks until the surface answers the
    /// reply handed to it.
    pub fn request<T, F>(&self, f: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn UiSurface, Reply<T>) + Send + 'static,
    {
        if self.is_ui_thread() {
            return Err(BridgeError::CalledFromUiThread);
        }
        if !self.is_attached() {
            return Err(BridgeError::NoAnswer);
        }
        let (reply, pending) = rendezvous();
        self.sender
            .send(Box::new(move |surface| f(surface, reply)))
            .map_err(|_| BridgeError::NoAnswer)?;
        let deadline = self.prompt_timeout.map(|timeout| Instant::now() + timeout);
        let attached = self.attached.clone();
        let still_wanted = move || {
            attached.load(Ordering::SeqCst)
                && deadline.map_or(true, |deadline| Instant::now() < deadline)
        };
        pending.wait_while(still_wanted, DETACH_POLL).ok_or_else(|| {
            log::warn!("[qsp_engine::ui] prompt interrupted before the surface answered");
            BridgeError::NoAnswer
        })
    }
}

pub struct UiLoop {
    receiver: Receiver<UiTask>,
    handle: UiHandle,
    surface: Option<Box<dyn UiSurface>>,
}

impl UiLoop {
    /// Binds the loop to the calling thread, which becomes the UI thread.
    pub fn new() -> Self {
        Self::with_prompt_timeout(None)
    }

    pub fn with_prompt_timeout(prompt_timeout: Option<Duration>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            receiver,
            handle: UiHandle {
                sender,
                ui_thread: thread::current().id(),
                attached: Arc::new(AtomicBool::new(false)),
                prompt_timeout,
            },
            surface: None,
        }
    }

    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    pub fn attach(&mut self, surface: Box<dyn UiSurface>) {
        self.surface = Some(surface);
        self.handle.attached.store(true, Ordering::SeqCst);
    }

    /// Detaches the surface. Threads blocked in `request` give up with "no
    /// answer" shortly after.
    pub fn detach(&mut self) -> Option<Box<dyn UiSurface>> {
        self.handle.attached.store(false, Ordering::SeqCst);
        self.surface.take()
    }

    pub fn surface_mut(&mut self) -> Option<&mut (dyn UiSurface + 'static)> {
        self.surface.as_deref_mut()
    }

    /// Runs every queued closure, returning how many ran.
    pub fn pump(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            self.run(task);
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for the first closure, then drains the queue.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(task) => {
                self.run(task);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn run(&mut self, task: UiTask) {
        match self.surface.as_deref_mut() {
            Some(surface) => task(surface),
            None => log::debug!("[qsp_engine::ui] surface detached; discarding queued UI task"),
        }
    }
}

impl Default for UiLoop {
    fn default() -> Self {
        Self::new()
    }
}
