//! Background audio playback. One worker thread owns every playback
//! resource; callers block until their operation has been applied.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::content::ContentResolver;
use crate::worker::{Owned, TaskQueue, Worker, WorkerError};

/// One opened sound.
pub trait Playback {
    fn set_volume(&mut self, volume: f32);
    fn start(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
    /// True once the sound played to its end.
    fn is_finished(&self) -> bool;
}

pub trait AudioBackend {
    fn open(&mut self, file: &Path) -> Result<Box<dyn Playback>>;
}

/// Backend that tracks playback state without producing sound.
#[derive(Debug, Default)]
pub struct SilentBackend;

#[derive(Debug, Default)]
struct SilentPlayback {
    playing: bool,
}

impl Playback for SilentPlayback {
    fn set_volume(&mut self, _volume: f32) {}
    fn start(&mut self) {
        self.playing = true;
    }
    fn pause(&mut self) {
        self.playing = false;
    }
    fn stop(&mut self) {
        self.playing = false;
    }
    fn is_playing(&self) -> bool {
        self.playing
    }
    fn is_finished(&self) -> bool {
        false
    }
}

impl AudioBackend for SilentBackend {
    fn open(&mut self, file: &Path) -> Result<Box<dyn Playback>> {
        log::debug!("[qsp_engine::audio] silent playback for {}", file.display());
        Ok(Box::new(SilentPlayback::default()))
    }
}

fn system_volume(volume: u8) -> f32 {
    f32::from(volume.min(100)) / 100.0
}

struct Sound {
    volume: u8,
    playback: Box<dyn Playback>,
}

/// Resource owned by the audio thread: path → playing sound.
pub struct AudioPlayer {
    backend: Box<dyn AudioBackend>,
    resolver: Arc<ContentResolver>,
    sounds: HashMap<String, Sound>,
}

impl AudioPlayer {
    pub fn new(backend: Box<dyn AudioBackend>, resolver: Arc<ContentResolver>) -> Self {
        Self {
            backend,
            resolver,
            sounds: HashMap::new(),
        }
    }

    fn sweep_finished(&mut self) {
        self.sounds.retain(|path, sound| {
            let finished = sound.playback.is_finished();
            if finished {
                log::debug!("[qsp_engine::audio] {path} finished");
            }
            !finished
        });
    }

    fn play(&mut self, path: &str, volume: u8) {
        self.sweep_finished();
        if let Some(sound) = self.sounds.get_mut(path) {
            sound.volume = volume;
            sound.playback.set_volume(system_volume(volume));
            if !sound.playback.is_playing() {
                sound.playback.start();
            }
            return;
        }

        let Some(file) = self.resolver.find(path) else {
            log::error!("[qsp_engine::audio] sound file not found: {path}");
            return;
        };
        let mut playback = match self.backend.open(&file) {
            Ok(playback) => playback,
            Err(err) => {
                log::error!(
                    "[qsp_engine::audio] failed to open {}: {err:#}",
                    file.display()
                );
                return;
            }
        };
        playback.set_volume(system_volume(volume));
        playback.start();
        self.sounds
            .insert(path.to_string(), Sound { volume, playback });
    }

    fn stop(&mut self, path: &str) {
        if let Some(mut sound) = self.sounds.remove(path) {
            if sound.playback.is_playing() {
                sound.playback.stop();
            }
        }
    }

    fn stop_all(&mut self) {
        for (_, mut sound) in self.sounds.drain() {
            if sound.playback.is_playing() {
                sound.playback.stop();
            }
        }
    }

    fn pause_all(&mut self) {
        for sound in self.sounds.values_mut() {
            if sound.playback.is_playing() {
                sound.playback.pause();
            }
        }
    }

    fn resume_all(&mut self) {
        self.sweep_finished();
        for sound in self.sounds.values_mut() {
            if !sound.playback.is_playing() {
                sound.playback.set_volume(system_volume(sound.volume));
                sound.playback.start();
            }
        }
    }

    fn is_playing(&mut self, path: &str) -> bool {
        self.sweep_finished();
        self.sounds.contains_key(path)
    }

    fn volume_of(&self, path: &str) -> Option<u8> {
        self.sounds.get(path).map(|sound| sound.volume)
    }
}

impl Owned for AudioPlayer {
    fn teardown(&mut self) {
        self.stop_all();
    }
}

/// Cloneable handle for issuing audio operations from any thread except the
/// audio thread itself.
#[derive(Clone)]
pub struct AudioHandle {
    queue: TaskQueue<AudioPlayer>,
    sound_enabled: Arc<AtomicBool>,
}

impl AudioHandle {
    fn call<T, F>(&self, what: &str, task: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut AudioPlayer) -> T + Send + 'static,
    {
        match self.queue.call(task) {
            Ok(value) => Some(value),
            Err(err) => {
                log::error!("[qsp_engine::audio] {what} failed: {err}");
                None
            }
        }
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        self.sound_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled.load(Ordering::SeqCst)
    }

    /// Starts `path` at `volume` (0–100), or updates the volume and resumes
    /// it if it is already open.
    pub fn play(&self, path: &str, volume: u8) {
        if !self.sound_enabled() {
            return;
        }
        let path = path.to_string();
        self.call("play", move |player| player.play(&path, volume));
    }

    pub fn stop(&self, path: &str) {
        let path = path.to_string();
        self.call("stop", move |player| player.stop(&path));
    }

    pub fn stop_all(&self) {
        self.call("stop all", AudioPlayer::stop_all);
    }

    pub fn pause_all(&self) {
        self.call("pause all", AudioPlayer::pause_all);
    }

    pub fn resume_all(&self) {
        if !self.sound_enabled() {
            return;
        }
        self.call("resume all", AudioPlayer::resume_all);
    }

    pub fn is_playing(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        let path = path.to_string();
        self.call("is playing", move |player| player.is_playing(&path))
            .unwrap_or(false)
    }

    pub fn volume_of(&self, path: &str) -> Option<u8> {
        let path = path.to_string();
        self.call("volume query", move |player| player.volume_of(&path))
            .flatten()
    }

    pub fn open_count(&self) -> usize {
        self.call("count", |player| player.sounds.len()).unwrap_or(0)
    }
}

/// The audio thread.
pub struct AudioWorker {
    worker: Worker<AudioPlayer>,
    sound_enabled: Arc<AtomicBool>,
}

impl AudioWorker {
    /// Spawns the audio thread. The backend is built on that thread.
    pub fn start<F>(resolver: Arc<ContentResolver>, backend: F) -> Result<Self, WorkerError>
    where
        F: FnOnce() -> Result<Box<dyn AudioBackend>> + Send + 'static,
    {
        let mut worker = Worker::new("qsp_audio");
        worker.start(move || Ok(AudioPlayer::new(backend()?, resolver)))?;
        Ok(Self {
            worker,
            sound_enabled: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn handle(&self) -> Option<AudioHandle> {
        let queue = self.worker.queue()?;
        Some(AudioHandle {
            queue,
            sound_enabled: self.sound_enabled.clone(),
        })
    }

    pub fn wait_until_ready(&self, timeout: std::time::Duration) -> bool {
        self.worker.wait_until_ready(timeout)
    }

    /// Releases every sound and joins the audio thread.
    pub fn close(&mut self) {
        self.worker.stop();
    }
}
