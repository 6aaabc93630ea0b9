use std::cell::RefCell;
use std::fs;
use std::io::{self, BufRead};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, TryRecvError};
use qsp_engine::{
    AudioBackend, AudioWorker, BridgeOptions, CachedImageProvider, ContentResolver, EngineDeps,
    EngineThread, ImageProvider, LuaEngine, PlayerConfig, UiLoop,
};

#[cfg(feature = "audio")]
mod audio_rodio;
mod cli;
mod console;

use cli::{Args, GameLaunch};
use console::{ConsoleCommand, ConsoleState, ConsoleSurface, PromptAnswer};

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const PUMP_SLICE: Duration = Duration::from_millis(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.player_config().context("loading player config")?;
    let launch = args.launch()?;

    let mut ui = UiLoop::with_prompt_timeout(config.prompt_timeout());
    let state = Rc::new(RefCell::new(ConsoleState::default()));
    ui.attach(Box::new(ConsoleSurface::new(io::stdout(), state.clone())));

    let content = Arc::new(ContentResolver::new());
    let images: Arc<dyn ImageProvider> = Arc::new(CachedImageProvider::new(content.clone()));
    let mut audio = AudioWorker::start(content.clone(), audio_backend)
        .context("starting audio thread")?;
    if !audio.wait_until_ready(READY_TIMEOUT) {
        log::warn!("[qsp_player] audio thread not ready; continuing without sound");
    }
    let audio_handle = audio.handle();
    if let Some(handle) = &audio_handle {
        handle.set_sound_enabled(config.sound_enabled);
    }

    let mut engine = EngineThread::new(EngineDeps {
        ui: ui.handle(),
        audio: audio_handle,
        content,
        images,
        options: BridgeOptions {
            saves_dir: config.saves_dir.clone(),
            strip_html_in_lists: config.strip_html_in_lists,
        },
    });
    engine.start(LuaEngine::boxed).context("starting engine thread")?;
    if !engine.wait_until_ready(READY_TIMEOUT) {
        anyhow::bail!("engine thread did not become ready");
    }

    let GameLaunch {
        id,
        title,
        directory,
        file,
    } = launch;
    log::info!("[qsp_player] running {} from {}", title, file.display());
    engine.run_game(&id, &title, directory, file)?;

    let outcome = run_loop(&mut ui, &engine, &state, &config, spawn_stdin_reader());

    ui.detach();
    engine.stop()?;
    audio.close();

    if let Some(path) = &args.dump_state {
        let json = serde_json::to_string_pretty(&engine.snapshot())
            .context("serializing session snapshot")?;
        fs::write(path, json)
            .with_context(|| format!("writing session snapshot to {}", path.display()))?;
        println!("Session snapshot written to {}", path.display());
    }
    outcome
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

#[cfg(feature = "audio")]
fn audio_backend() -> Result<Box<dyn AudioBackend>> {
    match audio_rodio::RodioBackend::open_default() {
        Ok(backend) => Ok(Box::new(backend)),
        Err(err) => {
            log::warn!("[qsp_player] {err:#}; falling back to silent audio");
            Ok(Box::new(qsp_engine::SilentBackend))
        }
    }
}

#[cfg(not(feature = "audio"))]
fn audio_backend() -> Result<Box<dyn AudioBackend>> {
    Ok(Box::new(qsp_engine::SilentBackend))
}

/// Stdin is read on its own thread so the UI loop keeps pumping while the
/// user types.
fn spawn_stdin_reader() -> Receiver<String> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let spawned = thread::Builder::new()
        .name("qsp_stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if sender.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        log::error!("[qsp_player] failed to spawn stdin reader: {err}");
    }
    receiver
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn run_loop(
    ui: &mut UiLoop,
    engine: &EngineThread,
    state: &Rc<RefCell<ConsoleState>>,
    config: &PlayerConfig,
    lines: Receiver<String>,
) -> Result<()> {
    let mut interval = Duration::from_millis(u64::from(config.default_tick_ms.max(1)));
    let mut next_tick = Instant::now() + interval;

    loop {
        ui.pump_timeout(PUMP_SLICE);

        if let Some(msecs) = state.borrow_mut().take_tick_interval() {
            log::debug!("[qsp_player] tick interval set to {msecs} ms");
            interval = Duration::from_millis(u64::from(msecs.max(1)));
            next_tick = Instant::now() + interval;
        }
        if Instant::now() >= next_tick {
            let outcome = engine.execute_counter()?;
            log::trace!("[qsp_player] tick: {outcome:?}");
            next_tick = Instant::now() + interval;
        }

        match lines.try_recv() {
            Ok(line) => {
                if handle_line(&line, engine, state)? == Flow::Quit {
                    return Ok(());
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                drain(ui, engine, state);
                return Ok(());
            }
        }
    }
}

/// Lets queued work finish once input is exhausted.
fn drain(ui: &mut UiLoop, engine: &EngineThread, state: &Rc<RefCell<ConsoleState>>) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while Instant::now() < deadline {
        ui.pump_timeout(PUMP_SLICE);
        if state.borrow().has_prompt() {
            break;
        }
        if !engine.is_busy() && ui.pump() == 0 {
            break;
        }
    }
}

fn handle_line(line: &str, engine: &EngineThread, state: &Rc<RefCell<ConsoleState>>) -> Result<Flow> {
    let answer = state.borrow_mut().answer_prompt(line);
    match answer {
        PromptAnswer::Answered => return Ok(Flow::Continue),
        PromptAnswer::Invalid(hint) => {
            println!("{hint}");
            return Ok(Flow::Continue);
        }
        PromptAnswer::NoPrompt => {}
    }
    if line.trim().is_empty() {
        return Ok(Flow::Continue);
    }

    let command = match ConsoleCommand::parse(line) {
        Ok(command) => command,
        Err(hint) => {
            println!("{hint}");
            return Ok(Flow::Continue);
        }
    };
    match command {
        ConsoleCommand::Click(index) => engine.on_action_clicked(index)?,
        ConsoleCommand::SelectAction(index) => engine.on_action_selected(index)?,
        ConsoleCommand::SelectObject(index) => engine.on_object_selected(index)?,
        ConsoleCommand::MenuItem(index) => engine.on_menu_item_selected(index)?,
        ConsoleCommand::Input => engine.on_input_area_clicked()?,
        ConsoleCommand::Execute(code) => engine.execute(&code)?,
        ConsoleCommand::Save(path) => engine.save_game_state(path)?,
        ConsoleCommand::Load(path) => engine.load_game_state(path)?,
        ConsoleCommand::Restart => engine.restart_game()?,
        ConsoleCommand::State => {
            let json = serde_json::to_string_pretty(&engine.snapshot())
                .context("serializing session snapshot")?;
            println!("{json}");
        }
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}
