// Synthetic fixtures; no game data ships with the repository.
#![allow(dead_code)]

use tp_tools_lib::actor::adef::{ActorClass, AdefEnum, ClassProperty};
use tp_tools_lib::actor::{Adef, ParamType};
use tp_tools_lib::chunk::ChunkWriter;
use tp_tools_lib::io::ByteWriter;
use tp_tools_lib::level::light::LightList;
use tp_tools_lib::level::spline::SplineList;
use tp_tools_lib::math::TpMatrix44;
use tp_tools_lib::strings::StringTable;

pub const DOOR_SPEED: f32 = 7.5;

fn property(name: u16, kind: ParamType, value: u32) -> ClassProperty {
    ClassProperty {
        name,
        kind,
        class_ref: 0,
        value,
    }
}

/// `Actor { Flags }` and `Door : Actor { Speed = 3.0 | Spawn = SPAWN_NEVER }`.
pub fn door_adef() -> Adef {
    let mut strings = StringTable::new();
    for s in ["Actor", "Door", "Flags", "Speed", "Spawn", "SPAWN_NEVER", "SPAWN_ALWAYS"] {
        strings.intern(s);
    }
    Adef {
        version: 1,
        strings,
        enums: vec![AdefEnum {
            name: 4,
            values: vec![5, 6],
        }],
        classes: vec![
            ActorClass {
                name: 0,
                parent: None,
                own: vec![property(2, ParamType::Float, 0)],
                exposed: vec![],
            },
            ActorClass {
                name: 1,
                parent: Some(0),
                own: vec![property(3, ParamType::Float, 3.0f32.to_bits())],
                exposed: vec![property(4, ParamType::Enum, 5)],
            },
        ],
    }
}

fn param(w: &mut ByteWriter, name: u16, kind: u8, value: u32) {
    w.u16(name);
    w.u8(kind);
    w.u8(0);
    w.u32(value);
}

/// One door with `Speed` overridden and `Spawn` set to a value the ADEF
/// does not list.
pub fn door_actor_blocks() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let mut astr = StringTable::new();
    for s in ["Door", "Speed", "Spawn", "SPAWN_LATER"] {
        astr.intern(s);
    }
    let mut ainf = ByteWriter::new();
    ainf.u32(1);
    ainf.u16(0);
    ainf.mat4(&TpMatrix44::from_translation([1.0, 2.0, 3.0]).to_slice());
    ainf.u16(2);
    param(&mut ainf, 1, 0, DOOR_SPEED.to_bits());
    param(&mut ainf, 2, 4, 3);
    (astr.encode(), StringTable::new().encode(), ainf.into_inner())
}

/// A small but complete level: empty mesh container, one spline, no
/// lights, one door.
pub fn door_level() -> Vec<u8> {
    let mut splines = SplineList::default();
    splines.add_spline(&[[0.0, 0.0, 0.0], [4.0, 0.0, 0.0]], false);
    let (astr, pstr, ainf) = door_actor_blocks();

    let mut w = ChunkWriter::new();
    w.begin(b"LEVL");
    w.leaf_with(b"INFO", |w| w.u32(4));
    w.begin(b"GMSH");
    w.end();
    w.leaf(b"SPLN", &splines.encode());
    w.leaf(b"LITE", &LightList::default().encode());
    w.begin(b"ACTR");
    w.leaf(b"ASTR", &astr);
    w.leaf(b"PSTR", &pstr);
    w.leaf(b"AINF", &ainf);
    w.end();
    w.end();
    w.finish()
}
