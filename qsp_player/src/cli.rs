use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use qsp_engine::PlayerConfig;

#[derive(Parser, Debug)]
#[command(about = "Console player for Lua text adventures", version)]
pub struct Args {
    /// Path to the game script
    #[arg(long)]
    pub game: PathBuf,

    /// Directory holding the game's pictures, sounds and saves (default: the game file's directory)
    #[arg(long)]
    pub game_dir: Option<PathBuf>,

    /// Identifier recorded in the session (default: the game file's stem)
    #[arg(long)]
    pub id: Option<String>,

    /// Title recorded in the session (default: the identifier)
    #[arg(long)]
    pub title: Option<String>,

    /// Optional JSON player configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Start with sound disabled
    #[arg(long)]
    pub no_sound: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    pub verbose: bool,

    /// Path to write the final session snapshot as JSON
    #[arg(long)]
    pub dump_state: Option<PathBuf>,
}

/// Which game to run and under which identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLaunch {
    pub id: String,
    pub title: String,
    pub directory: PathBuf,
    pub file: PathBuf,
}

impl Args {
    /// File configuration with command-line overrides applied.
    pub fn player_config(&self) -> Result<PlayerConfig> {
        let mut config = PlayerConfig::from_json_file(self.config.as_deref())?;
        if self.no_sound {
            config.sound_enabled = false;
        }
        Ok(config)
    }

    pub fn launch(&self) -> Result<GameLaunch> {
        if !self.game.is_file() {
            bail!("game file {} does not exist", self.game.display());
        }
        let directory = match &self.game_dir {
            Some(dir) if !dir.is_dir() => bail!("game directory {} does not exist", dir.display()),
            Some(dir) => dir.clone(),
            None => match self.game.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };
        let id = match &self.id {
            Some(id) => id.clone(),
            None => self
                .game
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "game".to_string()),
        };
        let title = self.title.clone().unwrap_or_else(|| id.clone());
        Ok(GameLaunch {
            id,
            title,
            directory,
            file: self.game.clone(),
        })
    }
}
