use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::{
    Error as LuaError, Function, IntoLuaMulti, Lua, LuaOptions, MultiValue, Result as LuaResult,
    Scope, StdLib, Table, Value, Variadic,
};

use super::world::{refresh_host, SaveBlob, SavedObject, SavedVar, WorldState};
use crate::handle::{EngineHost, ItemData, WindowKind};

pub(crate) type HostCell<'h> = RefCell<&'h mut dyn EngineHost>;

/// Fresh interpreter with `vars`, `locations` and the state half of `qsp`.
pub(super) fn new_lua(world: &Rc<RefCell<WorldState>>) -> LuaResult<Lua> {
    let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())?;
    {
        let globals = lua.globals();
        globals.set("vars", lua.create_table()?)?;
        globals.set("locations", lua.create_table()?)?;
        let qsp = lua.create_table()?;
        install_state_api(&lua, &qsp, world)?;
        globals.set("qsp", qsp)?;
    }
    Ok(lua)
}

fn install_state_api(lua: &Lua, qsp: &Table, world: &Rc<RefCell<WorldState>>) -> LuaResult<()> {
    let goto_world = world.clone();
    qsp.set(
        "goto",
        lua.create_function(move |lua_ctx, args: Variadic<Value>| {
            let mut values = args.into_iter();
            let name = values
                .next()
                .as_ref()
                .and_then(value_to_string)
                .ok_or_else(|| bad_argument("goto", "location name"))?;
            enter_location(lua_ctx, &goto_world, &name, values.collect())
        })?,
    )?;

    let pl_world = world.clone();
    qsp.set(
        "pl",
        lua.create_function(move |_, args: Variadic<Value>| {
            let mut text = join_text(&args);
            text.push('\n');
            pl_world.borrow_mut().append_main(&text);
            Ok(())
        })?,
    )?;

    let p_world = world.clone();
    qsp.set(
        "p",
        lua.create_function(move |_, args: Variadic<Value>| {
            p_world.borrow_mut().append_main(&join_text(&args));
            Ok(())
        })?,
    )?;

    let cls_world = world.clone();
    qsp.set(
        "cls",
        lua.create_function(move |_, _: Variadic<Value>| {
            cls_world.borrow_mut().clear_main();
            Ok(())
        })?,
    )?;

    let stat_world = world.clone();
    qsp.set(
        "stat",
        lua.create_function(move |_, args: Variadic<Value>| {
            let mut text = join_text(&args);
            text.push('\n');
            stat_world.borrow_mut().append_vars(&text);
            Ok(())
        })?,
    )?;

    let cls_stat_world = world.clone();
    qsp.set(
        "cls_stat",
        lua.create_function(move |_, _: Variadic<Value>| {
            cls_stat_world.borrow_mut().clear_vars();
            Ok(())
        })?,
    )?;

    let act_world = world.clone();
    qsp.set(
        "act",
        lua.create_function(move |lua_ctx, args: Variadic<Value>| {
            let (name, image, handler) = split_entry(&args);
            let name = name.ok_or_else(|| bad_argument("act", "action name"))?;
            let handler = handler.ok_or_else(|| bad_argument("act", "handler function"))?;
            let key = lua_ctx.create_registry_value(handler)?;
            Ok(act_world
                .borrow_mut()
                .add_action(ItemData { name, image }, key))
        })?,
    )?;

    let cla_world = world.clone();
    qsp.set(
        "cla",
        lua.create_function(move |_, _: Variadic<Value>| {
            cla_world.borrow_mut().clear_actions();
            Ok(())
        })?,
    )?;

    let addobj_world = world.clone();
    qsp.set(
        "addobj",
        lua.create_function(move |_, args: Variadic<Value>| {
            let (name, image, _) = split_entry(&args);
            let name = name.ok_or_else(|| bad_argument("addobj", "object name"))?;
            addobj_world
                .borrow_mut()
                .add_object(ItemData { name, image });
            Ok(())
        })?,
    )?;

    let delobj_world = world.clone();
    qsp.set(
        "delobj",
        lua.create_function(move |_, name: String| Ok(delobj_world.borrow_mut().remove_object(&name)))?,
    )?;

    qsp.set(
        "set",
        lua.create_function(|lua_ctx, (name, value): (String, Value)| {
            vars_table(lua_ctx)?.set(name, value)
        })?,
    )?;
    qsp.set(
        "get",
        lua.create_function(|lua_ctx, name: String| vars_table(lua_ctx)?.get::<_, Value>(name))?,
    )?;

    Ok(())
}

/// Installs the host half of `qsp` for the lifetime of `scope`.
pub(super) fn install_host_callbacks<'lua, 'scope, 'host>(
    lua: &'lua Lua,
    scope: &Scope<'lua, 'scope>,
    host: &'scope HostCell<'host>,
    world: &'scope Rc<RefCell<WorldState>>,
) -> LuaResult<()>
where
    'lua: 'scope,
    'host: 'scope,
{
    let qsp: Table = lua.globals().get("qsp")?;

    qsp.set(
        "msg",
        scope.create_function(move |_, args: Variadic<Value>| {
            host.borrow_mut().show_message(&join_text(&args));
            Ok(())
        })?,
    )?;

    qsp.set(
        "input",
        scope.create_function(move |_, args: Variadic<Value>| {
            Ok(host.borrow_mut().input_box(&join_text(&args)))
        })?,
    )?;

    qsp.set(
        "menu_add",
        scope.create_function(move |lua_ctx, args: Variadic<Value>| {
            let (name, image, handler) = split_entry(&args);
            let name = name.ok_or_else(|| bad_argument("menu_add", "item name"))?;
            let key = handler
                .map(|handler| lua_ctx.create_registry_value(handler))
                .transpose()?;
            host.borrow_mut().add_menu_item(&name, image.as_deref());
            world.borrow_mut().menu.push(key);
            Ok(())
        })?,
    )?;

    qsp.set(
        "menu_show",
        scope.create_function(move |lua_ctx, _: Variadic<Value>| {
            let choice = host.borrow_mut().show_menu();
            match choice {
                Some(index) => {
                    run_menu_item(lua_ctx, world, index)?;
                    Ok(i64::try_from(index).unwrap_or(i64::MAX))
                }
                None => Ok(-1),
            }
        })?,
    )?;

    qsp.set(
        "menu_clear",
        scope.create_function(move |_, _: Variadic<Value>| {
            host.borrow_mut().delete_menu();
            world.borrow_mut().menu.clear();
            Ok(())
        })?,
    )?;

    qsp.set(
        "play",
        scope.create_function(move |_, args: Variadic<Value>| {
            let path = args
                .first()
                .and_then(value_to_string)
                .ok_or_else(|| bad_argument("play", "file path"))?;
            let volume = args.get(1).and_then(value_to_i64).unwrap_or(100).clamp(0, 100);
            host.borrow_mut()
                .play_file(&path, u8::try_from(volume).unwrap_or(100));
            Ok(())
        })?,
    )?;

    qsp.set(
        "isplay",
        scope.create_function(move |_, path: String| Ok(host.borrow_mut().is_playing_file(&path)))?,
    )?;

    qsp.set(
        "close",
        scope.create_function(move |_, args: Variadic<Value>| {
            let path = args.first().and_then(value_to_string);
            host.borrow_mut().close_file(path.as_deref());
            Ok(())
        })?,
    )?;

    qsp.set(
        "settimer",
        scope.create_function(move |_, args: Variadic<Value>| {
            let msecs = args.first().and_then(value_to_u32).unwrap_or(0);
            host.borrow_mut().set_timer(msecs);
            Ok(())
        })?,
    )?;

    qsp.set(
        "wait",
        scope.create_function(move |_, args: Variadic<Value>| {
            let msecs = args.first().and_then(value_to_u32).unwrap_or(0);
            host.borrow_mut().wait(msecs);
            Ok(())
        })?,
    )?;

    qsp.set(
        "view",
        scope.create_function(move |_, args: Variadic<Value>| {
            let path = args.first().and_then(value_to_string).unwrap_or_default();
            host.borrow_mut().show_picture(&path);
            Ok(())
        })?,
    )?;

    qsp.set(
        "opengame",
        scope.create_function(move |lua_ctx, args: Variadic<Value>| {
            let name = args.first().and_then(value_to_string);
            let bytes = host.borrow_mut().open_game(name.as_deref());
            let Some(bytes) = bytes else {
                return Ok(false);
            };
            let blob = decode_blob(&bytes)
                .map_err(|err| LuaError::RuntimeError(format!("bad save data: {err}")))?;
            restore_blob(lua_ctx, world, blob)?;
            Ok(true)
        })?,
    )?;

    qsp.set(
        "savegame",
        scope.create_function(move |_, args: Variadic<Value>| {
            let name = args.first().and_then(value_to_string);
            host.borrow_mut().save_game(name.as_deref());
            Ok(())
        })?,
    )?;

    qsp.set(
        "msecs",
        scope.create_function(move |_, _: Variadic<Value>| Ok(host.borrow_mut().ms_count()))?,
    )?;

    for (name, kind) in [
        ("showacts", WindowKind::Actions),
        ("showobjs", WindowKind::Objects),
        ("showstat", WindowKind::Vars),
        ("showinput", WindowKind::Input),
    ] {
        qsp.set(
            name,
            scope.create_function(move |_, args: Variadic<Value>| {
                let visible = args.first().map(value_to_bool).unwrap_or(true);
                host.borrow_mut().show_window(kind, visible);
                Ok(())
            })?,
        )?;
    }

    qsp.set(
        "setdir",
        scope.create_function(move |_, path: String| {
            host.borrow_mut().change_game_dir(&path);
            Ok(())
        })?,
    )?;

    qsp.set(
        "refresh",
        scope.create_function(move |lua_ctx, _: Variadic<Value>| {
            let mut guard = host.borrow_mut();
            refresh_host(lua_ctx, world, &mut **guard);
            Ok(())
        })?,
    )?;

    qsp.set(
        "file",
        scope.create_function(move |lua_ctx, path: String| {
            let contents = host.borrow_mut().file_contents(&path);
            match contents {
                Some(bytes) => Ok(Value::String(lua_ctx.create_string(&bytes)?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    Ok(())
}

/// Makes `name` the current location and runs its handler.
pub(super) fn enter_location<'lua>(
    lua: &'lua Lua,
    world: &Rc<RefCell<WorldState>>,
    name: &str,
    args: Vec<Value<'lua>>,
) -> LuaResult<()> {
    let handler = match lua.globals().get::<_, Value>("locations")? {
        Value::Table(locations) => locations.get::<_, Value>(name)?,
        _ => Value::Nil,
    };
    let Value::Function(handler) = handler else {
        return Err(LuaError::RuntimeError(format!("location not found: {name}")));
    };
    {
        let mut state = world.borrow_mut();
        state.location = name.to_string();
        state.clear_main();
        state.clear_actions();
    }
    handler.call::<_, ()>(MultiValue::from_vec(args))
}

pub(super) fn run_action(lua: &Lua, world: &Rc<RefCell<WorldState>>, index: usize) -> LuaResult<()> {
    let handler: Function = {
        let state = world.borrow();
        let entry = state
            .actions
            .get(index)
            .ok_or_else(|| LuaError::RuntimeError(format!("bad action index {index}")))?;
        lua.registry_value(&entry.handler)?
    };
    handler.call::<_, ()>(())
}

pub(super) fn run_menu_item(
    lua: &Lua,
    world: &Rc<RefCell<WorldState>>,
    index: usize,
) -> LuaResult<()> {
    let handler: Option<Function> = {
        let state = world.borrow();
        match state.menu.get(index) {
            None => return Err(LuaError::RuntimeError(format!("bad menu index {index}"))),
            Some(None) => None,
            Some(Some(key)) => Some(lua.registry_value(key)?),
        }
    };
    match handler {
        Some(handler) => handler.call::<_, ()>(()),
        None => Ok(()),
    }
}

/// Calls the global function `name` if the world defines one.
pub(super) fn call_hook<'lua, A>(lua: &'lua Lua, name: &str, args: A) -> LuaResult<()>
where
    A: IntoLuaMulti<'lua>,
{
    match lua.globals().get::<_, Value>(name)? {
        Value::Function(hook) => hook.call::<_, ()>(args),
        _ => Ok(()),
    }
}

pub(super) fn decode_blob(bytes: &[u8]) -> Result<SaveBlob, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Scalar `vars`, the current location and the inventory.
pub(super) fn save_blob(lua: &Lua, world: &Rc<RefCell<WorldState>>) -> LuaResult<SaveBlob> {
    let mut vars = BTreeMap::new();
    if let Value::Table(table) = lua.globals().get::<_, Value>("vars")? {
        for pair in table.pairs::<Value, Value>() {
            let (key, value) = pair?;
            let Value::String(key) = key else {
                continue;
            };
            let saved = match value {
                Value::Boolean(flag) => SavedVar::Flag(flag),
                Value::Integer(number) => SavedVar::Int(number as i64),
                Value::Number(number) => SavedVar::Num(number),
                Value::String(text) => SavedVar::Text(text.to_str()?.to_string()),
                _ => continue,
            };
            vars.insert(key.to_str()?.to_string(), saved);
        }
    }
    let state = world.borrow();
    Ok(SaveBlob {
        location: state.location.clone(),
        vars,
        objects: state
            .objects
            .iter()
            .map(|item| SavedObject {
                name: item.name.clone(),
                image: item.image.clone(),
            })
            .collect(),
    })
}

/// Replaces `vars` and the inventory, then re-enters the saved location.
pub(super) fn restore_blob(
    lua: &Lua,
    world: &Rc<RefCell<WorldState>>,
    blob: SaveBlob,
) -> LuaResult<()> {
    let vars = lua.create_table()?;
    for (name, value) in blob.vars {
        match value {
            SavedVar::Flag(flag) => vars.set(name, flag)?,
            SavedVar::Int(number) => vars.set(name, number)?,
            SavedVar::Num(number) => vars.set(name, number)?,
            SavedVar::Text(text) => vars.set(name, text)?,
        }
    }
    lua.globals().set("vars", vars)?;
    {
        let mut state = world.borrow_mut();
        state.objects = blob
            .objects
            .into_iter()
            .map(|object| ItemData {
                name: object.name,
                image: object.image,
            })
            .collect();
        state.selected_object = None;
        state.changes.objects = true;
        state.clear_vars();
    }
    enter_location(lua, world, &blob.location, Vec::new())
}

fn vars_table(lua: &Lua) -> LuaResult<Table> {
    match lua.globals().get::<_, Value>("vars")? {
        Value::Table(vars) => Ok(vars),
        _ => {
            let vars = lua.create_table()?;
            lua.globals().set("vars", vars.clone())?;
            Ok(vars)
        }
    }
}

/// `(name, image, handler)` from `name [, image] [, function]`.
fn split_entry<'lua>(values: &[Value<'lua>]) -> (Option<String>, Option<String>, Option<Function<'lua>>) {
    let name = values.first().and_then(value_to_string);
    let image = match values.get(1) {
        Some(Value::String(text)) => text
            .to_str()
            .ok()
            .filter(|path| !path.is_empty())
            .map(str::to_string),
        _ => None,
    };
    let handler = values.iter().skip(1).find_map(|value| match value {
        Value::Function(handler) => Some(handler.clone()),
        _ => None,
    });
    (name, image, handler)
}

fn bad_argument(function: &str, expected: &str) -> LuaError {
    LuaError::RuntimeError(format!("qsp.{function}: {expected} expected"))
}

fn join_text(values: &[Value]) -> String {
    values
        .iter()
        .filter_map(value_to_string)
        .collect::<Vec<_>>()
        .join("")
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => text.to_str().ok().map(|s| s.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Boolean(flag) => *flag,
        Value::Integer(i) => *i != 0,
        Value::Number(n) => *n != 0.0,
        Value::String(s) => s
            .to_str()
            .map(|text| text != "0" && text != "false")
            .unwrap_or(false),
        _ => false,
    }
}

fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i as i64),
        Value::Number(n) => Some(*n as i64),
        Value::String(s) => s.to_str().ok()?.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_u32(value: &Value) -> Option<u32> {
    value_to_i64(value).map(|number| u32::try_from(number.max(0)).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_lua() -> (Rc<RefCell<WorldState>>, Lua) {
        let world = Rc::new(RefCell::new(WorldState::default()));
        let lua = new_lua(&world).expect("lua state");
        (world, lua)
    }

    #[test]
    fn goto_runs_the_location_and_resets_the_screen() {
        let (world, lua) = world_lua();
        lua.load(
            r#"
            locations.hall = function(greeting)
                qsp.pl(greeting or "Hall")
                qsp.act("Leave", function() qsp.goto("yard") end)
            end
            locations.yard = function() qsp.p("Yard") end
            qsp.p("old text")
            qsp.goto("hall", "Welcome")
            "#,
        )
        .exec()
        .expect("world chunk");

        let state = world.borrow();
        assert_eq!(state.location, "hall");
        assert_eq!(state.main_desc, "Welcome\n");
        assert_eq!(state.actions.len(), 1);
        drop(state);

        run_action(&lua, &world, 0).expect("leave runs");
        let state = world.borrow();
        assert_eq!(state.location, "yard");
        assert_eq!(state.main_desc, "Yard");
        assert!(state.actions.is_empty());
    }

    #[test]
    fn unknown_location_is_a_lua_error() {
        let (_world, lua) = world_lua();
        let err = lua
            .load(r#"qsp.goto("nowhere")"#)
            .exec()
            .expect_err("missing location");
        assert!(err.to_string().contains("location not found: nowhere"));
    }

    #[test]
    fn objects_and_vars_survive_a_save_round() {
        let (world, lua) = world_lua();
        lua.load(
            r#"
            locations.cellar = function() qsp.pl("Dark") end
            qsp.addobj("Lamp", "img/lamp.png")
            qsp.set("gold", 12)
            vars.name = "Ann"
            qsp.goto("cellar")
            "#,
        )
        .exec()
        .expect("world chunk");

        let blob = save_blob(&lua, &world).expect("save");
        assert_eq!(blob.location, "cellar");
        assert_eq!(blob.vars["gold"], SavedVar::Int(12));
        assert_eq!(blob.objects.len(), 1);

        lua.load(r#"qsp.delobj("Lamp"); vars.gold = 0"#)
            .exec()
            .expect("mutate");
        restore_blob(&lua, &world, blob).expect("restore");

        let gold: i64 = lua.load("return qsp.get('gold')").eval().expect("gold");
        assert_eq!(gold, 12);
        let state = world.borrow();
        assert_eq!(state.objects[0].image.as_deref(), Some("img/lamp.png"));
        assert_eq!(state.main_desc, "Dark\n");
    }

    #[test]
    fn missing_hook_is_not_an_error() {
        let (_world, lua) = world_lua();
        call_hook(&lua, "on_counter", ()).expect("absent hook");
        lua.load("ticks = 0; function on_counter() ticks = ticks + 1 end")
            .exec()
            .expect("hook chunk");
        call_hook(&lua, "on_counter", ()).expect("hook runs");
        let ticks: i64 = lua.globals().get("ticks").expect("ticks");
        assert_eq!(ticks, 1);
    }
}
