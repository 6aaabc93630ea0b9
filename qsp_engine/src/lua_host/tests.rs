use std::collections::VecDeque;

use super::*;
use crate::handle::WindowKind;

#[derive(Default)]
struct RecordingHost {
    messages: Vec<String>,
    inputs: VecDeque<String>,
    menu: Vec<String>,
    menu_answer: Option<usize>,
    played: Vec<(String, u8)>,
    windows: Vec<(WindowKind, bool)>,
    refreshes: Vec<(String, Vec<String>, bool)>,
    save_data: Option<Vec<u8>>,
    saved_names: Vec<Option<String>>,
    timer: Option<u32>,
}

impl EngineHost for RecordingHost {
    fn refresh(&mut self, view: &dyn EngineView) {
        let actions = (0..view.action_count())
            .filter_map(|index| view.action(index))
            .map(|item| item.name)
            .collect();
        self.refreshes
            .push((view.main_desc(), actions, view.main_desc_changed()));
    }
    fn show_picture(&mut self, _path: &str) {}
    fn set_timer(&mut self, msecs: u32) {
        self.timer = Some(msecs);
    }
    fn show_message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }
    fn play_file(&mut self, path: &str, volume: u8) {
        self.played.push((path.to_string(), volume));
    }
    fn is_playing_file(&mut self, path: &str) -> bool {
        self.played.iter().any(|(played, _)| played == path)
    }
    fn close_file(&mut self, path: Option<&str>) {
        match path {
            Some(path) => self.played.retain(|(played, _)| played != path),
            None => self.played.clear(),
        }
    }
    fn open_game(&mut self, _name: Option<&str>) -> Option<Vec<u8>> {
        self.save_data.clone()
    }
    fn save_game(&mut self, name: Option<&str>) {
        self.saved_names.push(name.map(str::to_string));
    }
    fn input_box(&mut self, _prompt: &str) -> String {
        self.inputs.pop_front().unwrap_or_default()
    }
    fn ms_count(&mut self) -> u32 {
        40
    }
    fn add_menu_item(&mut self, name: &str, _image: Option<&str>) {
        self.menu.push(name.to_string());
    }
    fn show_menu(&mut self) -> Option<usize> {
        self.menu_answer
    }
    fn delete_menu(&mut self) {
        self.menu.clear();
    }
    fn wait(&mut self, _msecs: u32) {}
    fn show_window(&mut self, kind: WindowKind, visible: bool) {
        self.windows.push((kind, visible));
    }
    fn file_contents(&mut self, _path: &str) -> Option<Vec<u8>> {
        None
    }
    fn change_game_dir(&mut self, _path: &str) {}
}

const WORLD: &str = r#"
vars.USEHTML = 0
vars.visits = 0

locations.start = function()
    vars.visits = vars.visits + 1
    qsp.pl("You are in the hall.")
    qsp.act("Open door", function()
        qsp.msg("The door creaks.")
        qsp.goto("garden")
    end)
    qsp.act("Shout", function()
        local name = qsp.input("Your name?")
        qsp.pl("You shout: " .. name)
    end)
end

locations.garden = function()
    qsp.pl("A quiet garden.")
    if not vars.has_flower then
        vars.has_flower = true
        qsp.addobj("Flower")
    end
    qsp.act("Pick", function()
        qsp.menu_clear()
        qsp.menu_add("Red", function() vars.picked = "red" end)
        qsp.menu_add("Blue", function() vars.picked = "blue" end)
        vars.choice = qsp.menu_show()
    end)
end

function on_counter()
    vars.ticks = (vars.ticks or 0) + qsp.msecs()
end

function on_input(text)
    qsp.pl("typed " .. text)
end

function on_object_select(index)
    vars.selected = index
end
"#;

fn started(host: &mut RecordingHost) -> LuaEngine {
    let mut engine = LuaEngine::new().expect("engine");
    assert!(engine.load_world(WORLD.as_bytes(), "world.lua", host));
    assert!(engine.restart(true, host));
    engine
}

#[test]
fn restart_enters_start_and_refreshes() {
    let mut host = RecordingHost::default();
    let engine = started(&mut host);

    let (desc, actions, changed) = host.refreshes.last().expect("refreshed");
    assert_eq!(desc, "You are in the hall.\n");
    assert_eq!(actions, &vec!["Open door".to_string(), "Shout".to_string()]);
    assert!(changed);
    assert_eq!(engine.int_var("visits"), Some(1));
    assert!(!engine.main_desc_changed());
}

#[test]
fn clicking_an_action_runs_its_handler() {
    let mut host = RecordingHost::default();
    let mut engine = started(&mut host);

    assert!(engine.set_selected_action(0, false, &mut host));
    assert!(engine.execute_selected_action(true, &mut host));

    assert_eq!(host.messages, vec!["The door creaks."]);
    assert_eq!(engine.main_desc(), "A quiet garden.\n");
    assert_eq!(engine.object_count(), 1);
}

#[test]
fn blocking_input_reaches_the_script() {
    let mut host = RecordingHost {
        inputs: VecDeque::from(vec!["Ann".to_string()]),
        ..RecordingHost::default()
    };
    let mut engine = started(&mut host);

    assert!(engine.set_selected_action(1, false, &mut host));
    assert!(engine.execute_selected_action(true, &mut host));
    assert!(engine.main_desc().ends_with("You shout: Ann\n"));

    engine.set_input_text("look");
    assert!(engine.exec_user_input(false, &mut host));
    assert!(engine.main_desc().ends_with("typed look\n"));
}

#[test]
fn menu_choice_runs_the_item_and_cancel_returns_minus_one() {
    let mut host = RecordingHost {
        menu_answer: Some(1),
        ..RecordingHost::default()
    };
    let mut engine = started(&mut host);
    assert!(engine.exec_string("qsp.goto('garden')", false, &mut host));
    assert!(engine.set_selected_action(0, false, &mut host));
    assert!(engine.execute_selected_action(false, &mut host));

    assert_eq!(host.menu, vec!["Red", "Blue"]);
    assert!(engine.exec_string("assert(vars.picked == 'blue' and vars.choice == 1)", false, &mut host));

    host.menu_answer = None;
    assert!(engine.execute_selected_action(false, &mut host));
    assert!(engine.exec_string("assert(vars.choice == -1)", false, &mut host));

    assert!(engine.select_menu_item(0, false, &mut host));
    assert!(engine.exec_string("assert(vars.picked == 'red')", false, &mut host));
}

#[test]
fn bad_indices_are_rejected_with_an_error() {
    let mut host = RecordingHost::default();
    let mut engine = started(&mut host);

    assert!(!engine.set_selected_action(9, true, &mut host));
    assert_eq!(engine.last_error().code, error_code::BAD_INDEX);
    assert!(!engine.set_selected_object(0, true, &mut host));
    assert!(!engine.select_menu_item(3, false, &mut host));
    assert_eq!(engine.last_error().location, "start");
}

#[test]
fn script_errors_carry_location_and_line() {
    let mut host = RecordingHost::default();
    let mut engine = started(&mut host);

    assert!(!engine.exec_string("local x = 1\nerror('boom')", true, &mut host));
    let record = engine.last_error();
    assert_eq!(record.location, "start");
    assert_eq!(record.line, 2);
    assert_eq!(record.code, error_code::RUNTIME);
    assert!(record.description.contains("boom"));

    assert!(!engine.exec_string("if then", false, &mut host));
    assert_eq!(engine.last_error().code, error_code::SYNTAX);
}

#[test]
fn counter_hook_sees_the_host_clock() {
    let mut host = RecordingHost::default();
    let mut engine = started(&mut host);
    assert!(engine.run_counter(false, &mut host));
    assert!(engine.run_counter(false, &mut host));
    assert_eq!(engine.int_var("ticks"), Some(80));
}

#[test]
fn object_selection_calls_the_hook() {
    let mut host = RecordingHost::default();
    let mut engine = started(&mut host);
    assert!(engine.exec_string("qsp.goto('garden')", false, &mut host));
    assert!(engine.set_selected_object(0, true, &mut host));
    assert_eq!(engine.int_var("selected"), Some(0));
}

#[test]
fn saved_state_round_trips_through_the_host() {
    let mut host = RecordingHost::default();
    let mut engine = started(&mut host);
    assert!(engine.exec_string("vars.gold = 7; qsp.goto('garden')", false, &mut host));

    let blob = engine.save_state(false, &mut host).expect("save blob");
    assert!(engine.restart(false, &mut host));
    assert_eq!(engine.int_var("gold"), None);

    assert!(engine.open_saved_state(&blob, true, &mut host));
    assert_eq!(engine.int_var("gold"), Some(7));
    assert_eq!(engine.main_desc(), "A quiet garden.\n");
    assert_eq!(engine.object_count(), 1);

    host.save_data = Some(blob);
    assert!(engine.exec_string("vars.gold = 0; assert(qsp.opengame('slot1'))", false, &mut host));
    assert_eq!(engine.int_var("gold"), Some(7));

    assert!(!engine.open_saved_state(b"not json", false, &mut host));
    assert_eq!(engine.last_error().code, error_code::BAD_SAVE);
}

#[test]
fn host_callbacks_are_forwarded() {
    let mut host = RecordingHost::default();
    let mut engine = started(&mut host);
    let script = r#"
        qsp.play("music/theme.ogg", 40)
        assert(qsp.isplay("music/theme.ogg"))
        qsp.close()
        assert(not qsp.isplay("music/theme.ogg"))
        qsp.showacts(false)
        qsp.showinput(1)
        qsp.settimer(250)
        qsp.savegame("slot2")
    "#;
    assert!(engine.exec_string(script, false, &mut host));
    assert!(host.played.is_empty());
    assert_eq!(
        host.windows,
        vec![(WindowKind::Actions, false), (WindowKind::Input, true)]
    );
    assert_eq!(host.timer, Some(250));
    assert_eq!(host.saved_names, vec![Some("slot2".to_string())]);
}

#[test]
fn restart_without_a_world_fails() {
    let mut host = RecordingHost::default();
    let mut engine = LuaEngine::new().expect("engine");
    assert!(!engine.restart(true, &mut host));
    assert_eq!(engine.last_error().code, error_code::NO_WORLD);
}

#[test]
fn host_callbacks_are_gone_outside_a_call() {
    let mut host = RecordingHost::default();
    let engine = started(&mut host);
    let outcome = engine.lua.load("qsp.msg('late')").exec();
    assert!(outcome.is_err());
}

#[test]
fn line_is_parsed_from_chunk_messages() {
    assert_eq!(
        split_line("[string \"world.lua\"]:12: attempt to call a nil value"),
        (12, "attempt to call a nil value".to_string())
    );
    assert_eq!(split_line("location not found: x"), (0, "location not found: x".to_string()));
}
