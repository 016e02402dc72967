//! Which P2M files the game loads for an actor.
//!
//! Most classes map to a fixed list of models under `<root>/MODELS`. Some
//! pick one entry of their list from an enum parameter (`Spawn`,
//! `Ability`), and any string parameter named like `MeshFilename` names a
//! model directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::actor::params::{Actor, ParamValue};

pub const MODELS_DIR: &str = "MODELS";
const MESH_FILENAME: &str = "MeshFilename";

struct ModelEntry {
    dir: &'static str,
    name: &'static str,
    /// Enum parameter selecting this entry
    branch: Option<&'static str>,
}

const fn m(dir: &'static str, name: &'static str) -> ModelEntry {
    ModelEntry { dir, name, branch: None }
}

const fn on(dir: &'static str, name: &'static str, param: &'static str) -> ModelEntry {
    ModelEntry {
        dir,
        name,
        branch: Some(param),
    }
}

static MODEL_TABLE: &[(&str, &[ModelEntry])] = &[
    ("MeshActor", &[]),
    ("LevelExit", &[m("PICKUPS", "EXIT")]),
    ("LevelExitPorts", &[m("SKYS", "THRUPORT"), m("SKYS", "ENDPORT")]),
    ("Health", &[m("PICKUPS", "HEALTH")]),
    ("Treasure_A", &[m("PICKUPS", "TREASH_A")]),
    (
        "BeaconEnergy",
        &[m("PICKUPS", "BENERGY"), m("PICKUPS", "BENERGY2"), m("PICKUPS", "BENERGY3")],
    ),
    ("Barrel", &[on("CRATES", "T_BARREL", "Spawn"), on("CRATES", "BARREL", "Spawn")]),
    (
        "BarrelDebris",
        &[
            m("CRATES", "BARRELB1"),
            m("CRATES", "BARRELB2"),
            m("CRATES", "BARRELB3"),
            m("CRATES", "BARRELID"),
        ],
    ),
    ("SteelBarrel", &[on("CRATES", "STEEL_T", "Spawn"), on("CRATES", "BARSTEEL", "Spawn")]),
    (
        "SteelBarrelDebris",
        &[
            m("CRATES", "STEEL_B1"),
            m("CRATES", "STEEL_B2"),
            m("CRATES", "STEEL_B3"),
            m("CRATES", "STEEL_LD"),
        ],
    ),
    ("TntBarrel", &[m("CRATES", "TNT_NEW")]),
    (
        "TntBarrelDebris",
        &[
            m("CRATES", "TNTNEWB1"),
            m("CRATES", "TNTNEWB2"),
            m("CRATES", "TNTNEWB3"),
            m("CRATES", "TNTNEWLD"),
        ],
    ),
    ("CrateSmash", &[m("CRATES", "SMASH")]),
    (
        "CrateSmashDebris",
        &[
            m("CRATES", "SMABIT1"),
            m("CRATES", "SMABIT2"),
            m("CRATES", "SMABIT3"),
            m("CRATES", "SMABIT4"),
        ],
    ),
    ("MorphButton", &[m("MORPH", "SWITCHBS"), m("MORPH", "SWITCHHN")]),
    ("JumpPad", &[m("MORPH", "MORPHPAD")]),
    (
        "MorphTriggerPad",
        &[
            m("MORPH", "MORPHPAD"),
            on("MORPH", "POWRGLVL", "Ability"),
            on("MORPH", "SHOE_L", "Ability"),
            on("MORPH", "JETPACK", "Ability"),
            on("MORPH", "HAND", "Ability"),
            on("MORPH", "GLIDER", "Ability"),
        ],
    ),
    ("MorphCapstainSwitch", &[m("MORPH", "CAP_BS"), m("MORPH", "CAP_TOP")]),
    ("PoundButton", &[m("MORPH", "HBUTBASE"), m("MORPH", "HBUT_TOP")]),
    ("SplineFlintsShip", &[m("EFFECTS", "FLINTHUL")]),
    ("SplineLongBoat", &[m("EFFECTS", "LONGBOAT")]),
    (
        "SplineLongBoatDebris",
        &[
            m("EFFECTS", "LONGBIT1"),
            m("EFFECTS", "LONGBIT2"),
            m("EFFECTS", "LONGBIT3"),
            m("EFFECTS", "LONGBIT4"),
        ],
    ),
    ("CollectPuzzle", &[m("CRATES", "LANTERN")]),
    ("TrickCounter", &[m("PICKUPS", "STUNKPIK")]),
    ("FlyingRingShort", &[m("EFFECTS", "RING_1")]),
    (
        "SolarSurferDebris",
        &[
            m("SURFER", "SURFMID"),
            m("SURFER", "SURFNOSE"),
            m("SURFER", "SURFSBOT"),
            m("SURFER", "SURFSTOP"),
            m("SURFER", "SURFTAIL"),
        ],
    ),
    ("SurferLantern", &[m("CRATES", "LAMPON"), m("CRATES", "LAMP")]),
    ("SurferZipper", &[m("SURFER", "ZIPPER")]),
    ("StaticSporePod", &[m("EFFECTS", "SPOR_CLS"), m("EFFECTS", "SPOR_OPN")]),
    (
        "RoamingElectroBotDebris",
        &[
            m("EFFECTS", "BOT_BOD"),
            m("EFFECTS", "BOT_HEAD"),
            m("EFFECTS", "BOT_LEG"),
            m("EFFECTS", "BOT_LEG"),
            m("EFFECTS", "COG1"),
            m("EFFECTS", "COG2"),
            m("EFFECTS", "SPRING1"),
            m("EFFECTS", "SPRING2"),
        ],
    ),
    ("RoamingLongSword", &[m("BADGUY", "LSWORD")]),
    // not the model the game uses, but close enough to place the camera
    ("CutsceneShot", &[m("PICKUPS", "CHECKCAM")]),
];

/// `Ability` value → entry of `MorphTriggerPad`.
const ABILITY_PADS: &[(&str, usize)] = &[
    ("PowerGauntlets", 1),
    ("Hyper", 2),
    ("HighJump", 3),
    ("Switch", 4),
    ("Glider", 5),
];

fn entries(class: &str) -> Option<&'static [ModelEntry]> {
    MODEL_TABLE
        .iter()
        .find(|(name, _)| *name == class)
        .map(|(_, entries)| *entries)
}

#[derive(Debug, Clone)]
pub struct ModelDirectory {
    models: PathBuf,
}

impl ModelDirectory {
    pub fn new(asset_root: impl AsRef<Path>) -> Self {
        ModelDirectory {
            models: asset_root.as_ref().join(MODELS_DIR),
        }
    }

    pub fn models_root(&self) -> &Path {
        &self.models
    }

    pub fn knows(&self, actor_name: &str) -> bool {
        entries(actor_name).is_some()
    }

    /// Every path the actor would load, whether or not it exists.
    /// `enums` orders the values of each enum parameter.
    pub fn candidates(&self, actor: &Actor, enums: &BTreeMap<String, Vec<String>>) -> Vec<PathBuf> {
        let Some(table) = entries(&actor.name) else {
            return Vec::new();
        };
        let mut out = Vec::new();

        for param in &actor.params {
            if !param.name.contains(MESH_FILENAME) {
                continue;
            }
            if let ParamValue::String(file) = &param.value {
                let file = file.to_uppercase();
                let parts: Vec<&str> = file.split(['\\', '/']).filter(|p| !p.is_empty()).collect();
                if !parts.is_empty() {
                    out.push(parts.iter().fold(self.models.clone(), |path, part| path.join(part)));
                }
            }
        }

        if table.len() == 1 {
            out.push(self.model_path(&table[0]));
            return out;
        }
        for (i, entry) in table.iter().enumerate() {
            if self.branch_choice(actor, entry, enums).unwrap_or(i) == i {
                out.push(self.model_path(entry));
            }
        }
        out
    }

    /// Candidates that exist on disk.
    pub fn models_for(&self, actor: &Actor, enums: &BTreeMap<String, Vec<String>>) -> Vec<PathBuf> {
        if !self.models.is_dir() {
            return Vec::new();
        }
        self.candidates(actor, enums)
            .into_iter()
            .filter(|path| path.is_file())
            .collect()
    }

    fn model_path(&self, entry: &ModelEntry) -> PathBuf {
        self.models.join(entry.dir).join(format!("{}.P2M", entry.name))
    }

    /// Entry index the branch parameter selects, if it selects one.
    fn branch_choice(
        &self,
        actor: &Actor,
        entry: &ModelEntry,
        enums: &BTreeMap<String, Vec<String>>,
    ) -> Option<usize> {
        let param_name = entry.branch?;
        let param = actor.params.iter().find(|p| p.name == param_name)?;
        let ParamValue::Enum(Some(value)) = &param.value else {
            return None;
        };
        match param_name {
            // spawn types past the first four are the "always spawned" ones
            "Spawn" => {
                let position = enums.get(param_name)?.iter().position(|v| v == value)?;
                Some(if position < 4 { 0 } else { 1 })
            }
            "Ability" => ABILITY_PADS
                .iter()
                .find(|(name, _)| name == value)
                .map(|(_, pad)| *pad),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::actors::ActorStrings;
    use crate::math::TpMatrix44;

    fn actor(name: &str, params: &[(&str, ParamValue)]) -> Actor {
        let mut actor = Actor {
            name: name.to_string(),
            name_index: 0,
            class: None,
            transform: TpMatrix44::default(),
            params: Vec::new(),
        };
        let mut strings = ActorStrings::default();
        for (path, value) in params {
            actor.set_param(&[*path], value.clone(), &mut strings).unwrap();
        }
        actor
    }

    fn spawn_enum() -> BTreeMap<String, Vec<String>> {
        let values = ["S0", "S1", "S2", "S3", "S4", "S5"];
        BTreeMap::from([("Spawn".to_string(), values.iter().map(|s| s.to_string()).collect())])
    }

    #[test]
    fn spawn_enum_picks_one_barrel() {
        let dir = ModelDirectory::new("/assets");
        let early = actor("Barrel", &[("Spawn", ParamValue::Enum(Some("S1".into())))]);
        assert_eq!(
            dir.candidates(&early, &spawn_enum()),
            vec![PathBuf::from("/assets/MODELS/CRATES/T_BARREL.P2M")]
        );
        let late = actor("Barrel", &[("Spawn", ParamValue::Enum(Some("S5".into())))]);
        assert_eq!(
            dir.candidates(&late, &spawn_enum()),
            vec![PathBuf::from("/assets/MODELS/CRATES/BARREL.P2M")]
        );
    }

    #[test]
    fn ability_pads_add_their_pickup() {
        let dir = ModelDirectory::new("/assets");
        let pad = actor("MorphTriggerPad", &[("Ability", ParamValue::Enum(Some("Glider".into())))]);
        let names: Vec<String> = dir
            .candidates(&pad, &BTreeMap::new())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["MORPHPAD.P2M", "GLIDER.P2M"]);

        // an ability without a pickup keeps every model
        let other = actor("MorphTriggerPad", &[("Ability", ParamValue::Enum(Some("Dash".into())))]);
        assert_eq!(dir.candidates(&other, &BTreeMap::new()).len(), 6);
    }

    #[test]
    fn mesh_filename_and_missing_files() {
        let root = tempfile::tempdir().unwrap();
        let skys = root.path().join(MODELS_DIR).join("SKYS");
        std::fs::create_dir_all(&skys).unwrap();
        std::fs::write(skys.join("ROCK.P2M"), b"P2M ").unwrap();

        let dir = ModelDirectory::new(root.path());
        let mesh = actor(
            "MeshActor",
            &[("MeshFilename", ParamValue::String("skys\\rock.p2m".into()))],
        );
        assert_eq!(dir.models_for(&mesh, &BTreeMap::new()), vec![skys.join("ROCK.P2M")]);

        let exit = actor("LevelExit", &[]);
        assert_eq!(dir.candidates(&exit, &BTreeMap::new()).len(), 1);
        assert!(dir.models_for(&exit, &BTreeMap::new()).is_empty());
        assert!(dir.candidates(&actor("Unknown", &[]), &BTreeMap::new()).is_empty());
    }
}
