use std::collections::VecDeque;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use qsp_engine::session::MenuItem;
use qsp_engine::{
    BridgeOptions, CachedImageProvider, ChangeSet, ContentResolver, EngineDeps, EngineThread,
    ImageProvider, LuaEngine, MenuChoice, Reply, SessionSnapshot, TickOutcome, UiLoop, UiSurface,
    WindowKind,
};
use tempfile::tempdir;

const GAME: &str = r#"
vars.USEHTML = 1

locations.start = function()
    qsp.pl("<b>Cellar</b>")
    qsp.act("Climb", function()
        qsp.msg("You climb the ladder.")
        qsp.goto("attic")
    end)
end

locations.attic = function()
    qsp.pl("Dusty attic.")
    qsp.showobjs(false)
    qsp.act("Search", function()
        qsp.menu_clear()
        qsp.menu_add("Chest", function() qsp.addobj("Key") end)
        qsp.menu_add("Boxes", function() end)
        qsp.menu_show()
    end)
end

function on_counter()
    vars.ticks = (vars.ticks or 0) + 1
    qsp.stat("ticks: " .. vars.ticks)
end
"#;

#[derive(Default)]
struct Seen {
    states: Vec<(SessionSnapshot, ChangeSet)>,
    messages: Vec<String>,
    menus: Vec<Vec<String>>,
    windows: Vec<(WindowKind, bool)>,
    errors: Vec<String>,
}

struct Player {
    seen: Arc<Mutex<Seen>>,
    menu: VecDeque<MenuChoice>,
}

impl UiSurface for Player {
    fn on_state_changed(&mut self, snapshot: &SessionSnapshot, changes: ChangeSet) {
        self.seen
            .lock()
            .expect("seen")
            .states
            .push((snapshot.clone(), changes));
    }
    fn on_error(&mut self, message: &str) {
        self.seen.lock().expect("seen").errors.push(message.to_string());
    }
    fn on_show_picture(&mut self, _path: &str) {}
    fn show_message(&mut self, text: &str, reply: Reply<()>) {
        self.seen.lock().expect("seen").messages.push(text.to_string());
        reply.send(());
    }
    fn request_input(&mut self, _prompt: &str, reply: Reply<String>) {
        reply.send(String::new());
    }
    fn request_menu_choice(&mut self, items: &[MenuItem], reply: Reply<MenuChoice>) {
        let names = items.iter().map(|item| item.name.clone()).collect();
        self.seen.lock().expect("seen").menus.push(names);
        reply.send(self.menu.pop_front().unwrap_or(MenuChoice::Cancelled));
    }
    fn request_save_slot(&mut self, _suggested: Option<&str>) {}
    fn set_tick_interval(&mut self, _msecs: u32) {}
    fn on_window_visibility_changed(&mut self, kind: WindowKind, visible: bool) {
        self.seen.lock().expect("seen").windows.push((kind, visible));
    }
}

fn pump_until(ui: &mut UiLoop, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        ui.pump_timeout(Duration::from_millis(5));
        if done() {
            return;
        }
    }
    panic!("timed out waiting for the engine");
}

#[test]
fn lua_game_plays_through_the_engine_thread() {
    let dir = tempdir().expect("tempdir");
    let game = dir.path().join("cellar.lua");
    fs::write(&game, GAME).expect("write game");

    let seen = Arc::new(Mutex::new(Seen::default()));
    let mut ui = UiLoop::new();
    ui.attach(Box::new(Player {
        seen: seen.clone(),
        menu: VecDeque::from(vec![MenuChoice::Selected(0)]),
    }));

    let content = Arc::new(ContentResolver::new());
    let images: Arc<dyn ImageProvider> = Arc::new(CachedImageProvider::new(content.clone()));
    let mut engine = EngineThread::new(EngineDeps {
        ui: ui.handle(),
        audio: None,
        content,
        images,
        options: BridgeOptions::default(),
    });
    engine.start(LuaEngine::boxed).expect("engine starts");
    assert!(engine.wait_until_ready(Duration::from_secs(5)));

    engine
        .run_game("cellar", "Cellar", dir.path(), &game)
        .expect("queued");
    pump_until(&mut ui, || !seen.lock().expect("seen").states.is_empty());

    let snapshot = engine.snapshot();
    assert!(snapshot.running);
    assert!(snapshot.interface.use_html);
    assert_eq!(snapshot.main_desc, "<b>Cellar</b>\n");
    let actions: Vec<&str> = snapshot.actions.iter().map(|item| item.text.as_str()).collect();
    assert_eq!(actions, vec!["Climb"]);

    engine.on_action_clicked(0).expect("queued");
    pump_until(&mut ui, || engine.snapshot().main_desc == "Dusty attic.\n");
    assert_eq!(seen.lock().expect("seen").messages, vec!["You climb the ladder."]);

    engine.on_action_clicked(0).expect("queued");
    pump_until(&mut ui, || engine.snapshot().objects.len() == 1);
    {
        let seen = seen.lock().expect("seen");
        assert_eq!(seen.menus, vec![vec!["Chest".to_string(), "Boxes".to_string()]]);
        assert_eq!(seen.windows, vec![(WindowKind::Objects, false)]);
    }
    assert_eq!(engine.snapshot().objects[0].text, "Key");

    pump_until(&mut ui, || !engine.is_busy());
    assert_eq!(engine.execute_counter(), Ok(TickOutcome::Submitted));
    pump_until(&mut ui, || engine.snapshot().vars_desc.contains("ticks: 1"));

    engine.execute("error('trap')").expect("queued");
    pump_until(&mut ui, || !seen.lock().expect("seen").errors.is_empty());
    assert!(seen.lock().expect("seen").errors[0].contains("trap"));

    ui.detach();
    engine.stop().expect("stopped on the UI thread");
}
