//! Line-oriented front end: renders session updates to a writer and turns
//! input lines into prompt answers or engine commands.

use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use qsp_engine::session::{ListItem, MenuItem};
use qsp_engine::{ChangeSet, MenuChoice, Reply, SessionSnapshot, UiSurface, WindowKind};

/// A prompt waiting for the next input line.
enum PendingPrompt {
    Message(Reply<()>),
    Input(Reply<String>),
    Menu { reply: Reply<MenuChoice>, count: usize },
}

#[derive(Debug, PartialEq, Eq)]
pub enum PromptAnswer {
    NoPrompt,
    Answered,
    Invalid(String),
}

/// State the main loop shares with the surface living inside the UI loop.
#[derive(Default)]
pub struct ConsoleState {
    pending: Option<PendingPrompt>,
    tick_ms: Option<u32>,
}

impl ConsoleState {
    pub fn has_prompt(&self) -> bool {
        self.pending.is_some()
    }

    /// Tick interval the game asked for since the last call.
    pub fn take_tick_interval(&mut self) -> Option<u32> {
        self.tick_ms.take()
    }

    pub fn answer_prompt(&mut self, line: &str) -> PromptAnswer {
        let Some(pending) = self.pending.take() else {
            return PromptAnswer::NoPrompt;
        };
        match pending {
            PendingPrompt::Message(reply) => reply.send(()),
            PendingPrompt::Input(reply) => reply.send(line.to_string()),
            PendingPrompt::Menu { reply, count } => {
                let line = line.trim();
                if line.is_empty() {
                    reply.send(MenuChoice::Cancelled);
                    return PromptAnswer::Answered;
                }
                match line.parse::<usize>() {
                    Ok(index) if index < count => reply.send(MenuChoice::Selected(index)),
                    _ => {
                        self.pending = Some(PendingPrompt::Menu { reply, count });
                        return PromptAnswer::Invalid(format!(
                            "pick 0..{} or an empty line to cancel",
                            count.saturating_sub(1)
                        ));
                    }
                }
            }
        }
        PromptAnswer::Answered
    }
}

pub struct ConsoleSurface<W> {
    out: W,
    state: Rc<RefCell<ConsoleState>>,
}

impl<W: Write> ConsoleSurface<W> {
    pub fn new(out: W, state: Rc<RefCell<ConsoleState>>) -> Self {
        Self { out, state }
    }

    fn line(&mut self, text: impl AsRef<str>) {
        if let Err(err) = writeln!(self.out, "{}", text.as_ref()) {
            log::warn!("[qsp_player::console] failed to write output: {err}");
        }
    }

    fn list(&mut self, heading: &str, items: &[ListItem]) {
        self.line(format!("-- {heading} --"));
        for (index, item) in items.iter().enumerate() {
            self.line(format!("{index}. {}", item.text));
        }
    }

    fn wait_for(&mut self, prompt: PendingPrompt) {
        let mut state = self.state.borrow_mut();
        if state.pending.is_some() {
            log::warn!("[qsp_player::console] replacing an unanswered prompt");
        }
        state.pending = Some(prompt);
    }
}

impl<W: Write> UiSurface for ConsoleSurface<W> {
    fn on_state_changed(&mut self, snapshot: &SessionSnapshot, changes: ChangeSet) {
        if changes.main_desc_changed {
            self.line(snapshot.main_desc.trim_end());
        }
        if changes.vars_desc_changed && !snapshot.vars_desc.is_empty() {
            self.line(format!("[{}]", snapshot.vars_desc.trim_end()));
        }
        if changes.objects_changed && !snapshot.objects.is_empty() {
            self.list("objects", &snapshot.objects);
        }
        if changes.actions_changed {
            self.list("actions", &snapshot.actions);
        }
    }

    fn on_error(&mut self, message: &str) {
        self.line("!! error");
        self.line(message);
    }

    fn on_show_picture(&mut self, path: &str) {
        self.line(format!("(picture: {path})"));
    }

    fn show_message(&mut self, text: &str, reply: Reply<()>) {
        self.line(text);
        self.line("(press enter)");
        self.wait_for(PendingPrompt::Message(reply));
    }

    fn request_input(&mut self, prompt: &str, reply: Reply<String>) {
        self.line(prompt);
        self.wait_for(PendingPrompt::Input(reply));
    }

    fn request_menu_choice(&mut self, items: &[MenuItem], reply: Reply<MenuChoice>) {
        self.line("-- menu --");
        for (index, item) in items.iter().enumerate() {
            self.line(format!("{index}. {}", item.name));
        }
        self.wait_for(PendingPrompt::Menu {
            reply,
            count: items.len(),
        });
    }

    fn request_save_slot(&mut self, suggested: Option<&str>) {
        match suggested {
            Some(name) => self.line(format!("(the game asks to save as {name}; use `save <path>`)")),
            None => self.line("(the game asks to save; use `save <path>`)"),
        }
    }

    fn set_tick_interval(&mut self, msecs: u32) {
        self.state.borrow_mut().tick_ms = Some(msecs);
    }

    fn on_window_visibility_changed(&mut self, kind: WindowKind, visible: bool) {
        log::debug!("[qsp_player::console] {kind:?} pane visible={visible}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Click(usize),
    SelectAction(usize),
    SelectObject(usize),
    MenuItem(usize),
    Input,
    Execute(String),
    Save(PathBuf),
    Load(PathBuf),
    Restart,
    State,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let index = |what: &str| {
            rest.parse::<usize>()
                .map_err(|_| format!("`{word}` needs {what} number"))
        };
        match word {
            "q" | "quit" => Ok(Self::Quit),
            "i" => Ok(Self::Input),
            "restart" => Ok(Self::Restart),
            "state" => Ok(Self::State),
            "a" => Ok(Self::SelectAction(index("an action")?)),
            "o" => Ok(Self::SelectObject(index("an object")?)),
            "m" => Ok(Self::MenuItem(index("a menu item")?)),
            "x" if !rest.is_empty() => Ok(Self::Execute(rest.to_string())),
            "save" if !rest.is_empty() => Ok(Self::Save(PathBuf::from(rest))),
            "load" if !rest.is_empty() => Ok(Self::Load(PathBuf::from(rest))),
            "x" | "save" | "load" => Err(format!("`{word}` needs an argument")),
            _ => word
                .parse::<usize>()
                .map(Self::Click)
                .map_err(|_| format!("unknown command `{line}`")),
        }
    }
}
