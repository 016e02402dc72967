use tp_tools_lib::actor::{ParamState, ParamValue};
use tp_tools_lib::chunk::ChunkKind;
use tp_tools_lib::math::TpMatrix44;
use tp_tools_lib::{AssetContext, Level, LevelSaveOptions};

#[path = "common/mod.rs"]
mod common;

fn door_context() -> AssetContext {
    AssetContext::new(common::door_adef()).unwrap()
}

#[test]
fn scanner_sees_the_level_layout() {
    let bytes = common::door_level();
    let map = Level::scan(&bytes).unwrap();
    let layout: String = map
        .entries
        .iter()
        .map(|e| {
            let kind = if e.kind == ChunkKind::Container { "container" } else { "leaf" };
            format!("{}{} {}\n", "  ".repeat(e.depth), e.tag, kind)
        })
        .collect();
    insta::assert_snapshot!(layout, @r###"
    LEVL container
      INFO leaf
      GMSH container
      SPLN leaf
      LITE leaf
      ACTR container
        ASTR leaf
        PSTR leaf
        AINF leaf
    "###);
}

#[test]
fn loaded_door_carries_overrides_and_defaults() {
    let mut context = door_context();
    let level = Level::load(&common::door_level(), "dock", &mut context).unwrap();
    assert_eq!(level.version, 4);
    assert!(context.diagnostics.is_empty());

    let actors = level.actors.as_ref().unwrap();
    assert_eq!(actors.len(), 1);
    let door = actors.get(0).unwrap();
    assert_eq!(door.name, "Door");
    assert_eq!(door.transform.translation(), [1.0, 2.0, 3.0]);

    let speed = door.param(&["Speed"]).unwrap();
    assert_eq!(speed.value, ParamValue::Float(common::DOOR_SPEED));
    assert_eq!(speed.state, ParamState::Overwritten);
    let flags = door.param(&["Flags"]).unwrap();
    assert_eq!(flags.state, ParamState::Default);
    assert_eq!(
        door.param(&["Spawn"]).unwrap().value,
        ParamValue::Enum(Some("SPAWN_LATER".to_string()))
    );

    // values seen in the level join the dictionary once the load succeeds
    assert_eq!(
        context.enum_values("Spawn"),
        &["SPAWN_NEVER", "SPAWN_ALWAYS", "SPAWN_LATER"]
    );
}

#[test]
fn unchanged_level_saves_byte_identical() {
    let original = common::door_level();
    let mut context = door_context();
    let mut level = Level::load(&original, "dock", &mut context).unwrap();
    assert_eq!(level.save(&LevelSaveOptions::default()).unwrap(), original);
    assert_eq!(level.save(&LevelSaveOptions::all()).unwrap(), original);
}

#[test]
fn actor_edits_follow_the_actor_toggle() {
    let original = common::door_level();
    let mut context = door_context();
    let mut level = Level::load(&original, "dock", &mut context).unwrap();
    level
        .actors
        .as_mut()
        .unwrap()
        .set_param(0, &["Speed"], ParamValue::Float(1.0))
        .unwrap();

    let untouched = LevelSaveOptions {
        save_actor_changes: false,
        ..LevelSaveOptions::default()
    };
    assert_eq!(level.save(&untouched).unwrap(), original);

    let saved = level.save(&LevelSaveOptions::default()).unwrap();
    assert_ne!(saved, original);
    let reloaded = Level::load(&saved, "dock", &mut door_context()).unwrap();
    let door = reloaded.actors.as_ref().unwrap().get(0).unwrap();
    assert_eq!(door.param(&["Speed"]).unwrap().value, ParamValue::Float(1.0));
}

#[test]
fn created_actors_reload_with_class_defaults() {
    let mut context = door_context();
    let mut level = Level::load(&common::door_level(), "dock", &mut context).unwrap();
    let actors = level.actors.as_mut().unwrap();
    let index = actors
        .create_actor(
            "Door",
            TpMatrix44::from_translation([0.0, 0.0, 8.0]),
            context.schema(),
            &context.adef().strings,
        )
        .unwrap();
    assert_eq!(index, 1);

    let saved = level.save(&LevelSaveOptions::default()).unwrap();
    let reloaded = Level::load(&saved, "dock", &mut door_context()).unwrap();
    let actors = reloaded.actors.as_ref().unwrap();
    assert_eq!(actors.len(), 2);
    let door = actors.get(1).unwrap();
    assert_eq!(door.saved_param_count(), 0);
    assert_eq!(door.param(&["Speed"]).unwrap().value, ParamValue::Float(3.0));
    assert_eq!(
        door.param(&["Spawn"]).unwrap().value,
        ParamValue::Enum(Some("SPAWN_NEVER".to_string()))
    );
}

#[test]
fn atomic_save_writes_a_loadable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dock.lp2");
    let mut context = door_context();
    let mut level = Level::load(&common::door_level(), "dock", &mut context).unwrap();
    level.save_to_path(&path, &LevelSaveOptions::default()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let reloaded = Level::load(&bytes, "dock", &mut door_context()).unwrap();
    assert_eq!(reloaded.summary().actors, 1);
    assert_eq!(reloaded.summary().splines, 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
