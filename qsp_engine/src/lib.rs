//! Threading core of a text-adventure player.
//!
//! The interpreter lives on a dedicated engine thread and is driven through
//! `EngineThread`; its callbacks reach the front end through the
//! `CallbackBridge`, which marshals them onto the UI thread with `UiHandle`.
//! Sound runs on a second worker of the same kind (`AudioWorker`).

pub mod audio;
pub mod bridge;
pub mod config;
pub mod content;
pub mod counter;
pub mod engine_thread;
pub mod handle;
pub mod html;
pub mod images;
pub mod lock;
pub mod lua_host;
pub mod rendezvous;
pub mod session;
pub mod ui;
pub mod worker;

pub use audio::{AudioBackend, AudioHandle, AudioWorker, Playback, SilentBackend};
pub use bridge::{BridgeOptions, CallbackBridge, EngineShared};
pub use config::PlayerConfig;
pub use content::ContentResolver;
pub use engine_thread::{EngineDeps, EngineThread, EngineThreadError, TickOutcome};
pub use handle::{EngineHandle, EngineHost, EngineView, ErrorRecord, ItemData, WindowKind};
pub use images::{CachedImageProvider, ImageProvider, ImageRef};
pub use lua_host::LuaEngine;
pub use rendezvous::{rendezvous, Pending, Reply};
pub use session::{ChangeSet, SessionSnapshot, SessionState};
pub use ui::{BridgeError, MenuChoice, UiHandle, UiLoop, UiSurface};
pub use worker::{Owned, TaskQueue, Worker, WorkerError, WorkerState};
