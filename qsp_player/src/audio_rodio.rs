//! Sound output through the default rodio device.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use qsp_engine::{AudioBackend, Playback};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};

/// Keeps the output stream alive for as long as the audio thread runs.
pub struct RodioBackend {
    _stream: OutputStream,
    handle: OutputStreamHandle,
}

impl RodioBackend {
    pub fn open_default() -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .context("initializing default audio output device via rodio")?;
        Ok(Self {
            _stream: stream,
            handle,
        })
    }
}

impl AudioBackend for RodioBackend {
    fn open(&mut self, file: &Path) -> Result<Box<dyn Playback>> {
        let reader = File::open(file)
            .with_context(|| format!("opening sound {}", file.display()))?;
        let source = Decoder::new(BufReader::new(reader))
            .with_context(|| format!("decoding sound {}", file.display()))?;
        let sink = Sink::try_new(&self.handle).context("creating rodio sink")?;
        sink.pause();
        sink.append(source);
        Ok(Box::new(RodioPlayback { sink }))
    }
}

struct RodioPlayback {
    sink: Sink,
}

impl Playback for RodioPlayback {
    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }

    fn start(&mut self) {
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn stop(&mut self) {
        self.sink.stop();
    }

    fn is_playing(&self) -> bool {
        !self.sink.is_paused() && !self.sink.empty()
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }
}
