//! LP2 levels.
//!
//! ```text
//! LEVL {
//!   INFO  u32 version
//!   GMSH { TEX, ANIM, MAT, SECT, NODE, PVS, AIMP, GRID, END }
//!   SPLN
//!   LITE
//!   ACTR { ASTR, PSTR, AINF, END }
//!   END
//! }
//! ```
//!
//! Blocks decode in dependency order: geometry needs materials, the node
//! tree and PVS need geometry, actors need splines and AI maps. Blocks the
//! scanner does not know are kept as stored and written back in the same
//! container, right after the known block they followed.

pub mod actors;
pub mod aimap;
pub mod bsp;
pub mod collision;
pub mod geometry;
pub mod grid;
pub mod light;
pub mod materials;
pub mod models;
pub mod node_tree;
pub mod pvs;
pub mod render;
pub mod spline;
pub mod textures;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::chunk::{scan, ChunkKind, ChunkMap, ChunkWriter, Tag, LEVEL_FAMILY};
use crate::compression::unwrap_pk2;
use crate::context::AssetContext;
use crate::error::{AssetError, Diagnostics, Result, Warning};
use crate::io::ByteReader;

use actors::{ActorList, ReferenceBounds};
use aimap::AiMapList;
use geometry::GeometrySection;
use grid::Grid;
use light::LightList;
use materials::MaterialList;
use node_tree::NodeTree;
use pvs::Pvs;
use spline::SplineList;
use textures::{AnimatedTextures, TextureList};

pub const DEFAULT_VERSION: u32 = 4;

/// Which edited parts a save re-encodes. Parts left off are written back
/// exactly as loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelSaveOptions {
    /// Textures, materials, render and collision geometry, node tree, PVS
    /// and grid
    pub save_mesh_changes: bool,
    pub save_actor_changes: bool,
    pub save_dynamic_instance_changes: bool,
    pub save_spline_changes: bool,
    pub save_aimap_changes: bool,
}

impl Default for LevelSaveOptions {
    fn default() -> Self {
        LevelSaveOptions {
            save_mesh_changes: false,
            save_actor_changes: true,
            save_dynamic_instance_changes: true,
            save_spline_changes: true,
            save_aimap_changes: false,
        }
    }
}

impl LevelSaveOptions {
    /// Re-encode everything.
    pub fn all() -> Self {
        LevelSaveOptions {
            save_mesh_changes: true,
            save_actor_changes: true,
            save_dynamic_instance_changes: true,
            save_spline_changes: true,
            save_aimap_changes: true,
        }
    }
}

/// A block the scanner did not recognise, kept as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownBlock {
    /// Enclosing container, `None` outside `LEVL`
    pub parent: Option<Tag>,
    /// Last known sibling stored before it, `None` when it opened its
    /// container
    pub after: Option<Tag>,
    /// Header and payload
    pub raw: Vec<u8>,
}

/// Puts unknown blocks back behind the sibling they followed on load.
struct UnknownPlacer<'a> {
    blocks: &'a [UnknownBlock],
    placed: Vec<bool>,
}

impl<'a> UnknownPlacer<'a> {
    fn new(blocks: &'a [UnknownBlock]) -> Self {
        UnknownPlacer {
            blocks,
            placed: vec![false; blocks.len()],
        }
    }

    fn write_where(&mut self, writer: &mut ChunkWriter, wanted: impl Fn(&UnknownBlock) -> bool) {
        for (block, placed) in self.blocks.iter().zip(self.placed.iter_mut()) {
            if !*placed && wanted(block) {
                writer.raw(&block.raw);
                *placed = true;
            }
        }
    }

    /// Blocks of `parent` stored right after `after` (or first, for `None`).
    fn place(&mut self, writer: &mut ChunkWriter, parent: Option<&[u8; 4]>, after: Option<&[u8; 4]>) {
        self.write_where(writer, |b| {
            b.parent.map(|t| t.0).as_ref() == parent && b.after.map(|t| t.0).as_ref() == after
        });
    }

    /// Remaining blocks of `parent`, whose anchor was not written this time.
    fn rest(&mut self, writer: &mut ChunkWriter, parent: Option<&[u8; 4]>) {
        self.write_where(writer, |b| b.parent.map(|t| t.0).as_ref() == parent);
    }

    fn has(&self, parent: &[u8; 4]) -> bool {
        self.blocks.iter().any(|b| b.parent.map(|t| t.0) == Some(*parent))
    }

    /// A leaf followed by the unknown blocks that trailed it.
    fn leaf(&mut self, writer: &mut ChunkWriter, parent: &[u8; 4], tag: &[u8; 4], payload: &[u8]) {
        writer.leaf(tag, payload);
        self.place(writer, Some(parent), Some(tag));
    }
}

#[derive(Debug, Clone, Default)]
pub struct Level {
    pub name: String,
    pub version: u32,
    pub textures: Option<TextureList>,
    pub animated_textures: Option<AnimatedTextures>,
    pub materials: Option<MaterialList>,
    pub geometry: Option<GeometrySection>,
    pub node_tree: Option<NodeTree>,
    pub pvs: Option<Pvs>,
    pub ai_maps: Option<AiMapList>,
    pub grid: Option<Grid>,
    pub splines: Option<SplineList>,
    pub lights: Option<LightList>,
    pub actors: Option<ActorList>,
    pub unknown: Vec<UnknownBlock>,
    /// Payloads as loaded, for parts a save leaves untouched
    original: BTreeMap<[u8; 4], Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelSummary {
    pub name: String,
    pub version: u32,
    pub textures: usize,
    pub materials: usize,
    pub render_sections: usize,
    pub collision_sections: usize,
    pub static_instances: usize,
    pub dynamic_instances: usize,
    pub tree_nodes: usize,
    pub portal_cells: usize,
    pub ai_maps: usize,
    pub splines: usize,
    pub lights: usize,
    pub actors: usize,
    pub unknown_blocks: Vec<String>,
}

const KNOWN_TAGS: [&[u8; 4]; 14] = [
    b"INFO", b"TEX ", b"ANIM", b"MAT ", b"SECT", b"NODE", b"PVS ", b"AIMP", b"GRID", b"SPLN",
    b"LITE", b"ASTR", b"PSTR", b"AINF",
];

impl Level {
    /// Block layout of an uncompressed level, using the LP2 tag whitelist.
    pub fn scan(data: &[u8]) -> Result<ChunkMap> {
        scan(data, &LEVEL_FAMILY)
    }

    /// `name` prefixes the names of textures stored without one.
    pub fn load(bytes: &[u8], name: &str, context: &mut AssetContext) -> Result<Self> {
        Self::probe(bytes, name, context)?.ok_or_else(|| AssetError::NotThisFormat {
            expected: "LEVL",
            found: String::from_utf8_lossy(&bytes[..bytes.len().min(4)]).into_owned(),
        })
    }

    /// `Ok(None)` when `bytes` (after PK2 unwrapping) is not a level.
    /// The context's enum dictionary and warnings only change once the whole
    /// level has decoded.
    pub fn probe(bytes: &[u8], name: &str, context: &mut AssetContext) -> Result<Option<Self>> {
        let mut diagnostics = Diagnostics::new();
        let data = unwrap_pk2(bytes, &mut diagnostics)?;
        let data = data.as_ref();
        if data.len() < 4 || &data[..4] != b"LEVL" {
            return Ok(None);
        }
        let map = Self::scan(data)?;
        let level = Self::decode(data, &map, name, context, &mut diagnostics)?;

        if let Some(actors) = &level.actors {
            context.merge_enums(actors.discovered_enums());
        }
        context.diagnostics.extend(diagnostics);
        Ok(Some(level))
    }

    fn decode(
        data: &[u8],
        map: &ChunkMap,
        name: &str,
        context: &AssetContext,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let mut level = Level {
            name: name.to_string(),
            version: DEFAULT_VERSION,
            ..Default::default()
        };
        for tag in KNOWN_TAGS {
            if let Some(payload) = map.payload(data, tag) {
                level.original.insert(*tag, payload.to_vec());
            }
        }
        let payload = |tag: &[u8; 4]| map.payload(data, tag);

        if let Some(info) = payload(b"INFO") {
            level.version = ByteReader::new(info).u32()?;
        }
        let version = level.version;
        log::info!("LP2 '{}' version {}", name, version);

        level.textures = payload(b"TEX ").map(|p| TextureList::decode(p, name)).transpose()?;
        level.animated_textures = payload(b"ANIM").map(AnimatedTextures::decode).transpose()?;
        level.materials = payload(b"MAT ")
            .map(|p| MaterialList::decode(p, diagnostics))
            .transpose()?;

        let no_materials = MaterialList::default();
        let materials = level.materials.as_ref().unwrap_or(&no_materials);
        level.geometry = payload(b"SECT")
            .map(|p| GeometrySection::decode(p, version, materials))
            .transpose()?;

        let no_geometry = GeometrySection::default();
        let geometry = level.geometry.as_ref().unwrap_or(&no_geometry);
        level.node_tree = payload(b"NODE")
            .map(|p| NodeTree::decode(p, version, geometry))
            .transpose()?;
        let no_tree = NodeTree::default();
        let tree = level.node_tree.as_ref().unwrap_or(&no_tree);
        level.pvs = payload(b"PVS ")
            .map(|p| Pvs::decode(p, version, geometry, tree, diagnostics))
            .transpose()?;

        level.ai_maps = payload(b"AIMP").map(AiMapList::decode).transpose()?;
        level.grid = payload(b"GRID").map(Grid::decode).transpose()?;
        level.splines = payload(b"SPLN").map(SplineList::decode).transpose()?;
        level.lights = payload(b"LITE").map(LightList::decode).transpose()?;

        if let Some(ainf) = payload(b"AINF") {
            let bounds = ReferenceBounds {
                splines: level.splines.as_ref().map_or(0, SplineList::len),
                ai_maps: level.ai_maps.as_ref().map_or(0, AiMapList::len),
            };
            level.actors = Some(ActorList::decode(
                payload(b"ASTR"),
                payload(b"PSTR"),
                ainf,
                context.schema(),
                &context.adef().strings,
                bounds,
                diagnostics,
            )?);
        }

        for entry in map.unknown() {
            let before: Vec<_> = map.entries.iter().take_while(|e| e.offset < entry.offset).collect();
            let parent = before
                .iter()
                .rposition(|e| e.kind == ChunkKind::Container && e.depth + 1 == entry.depth);
            let after = before[parent.map_or(0, |p| p + 1)..]
                .iter()
                .filter(|e| e.depth == entry.depth && e.kind != ChunkKind::Unknown)
                .last()
                .map(|e| e.tag);
            diagnostics.warn(Warning::UnknownBlock {
                tag: entry.tag.as_str(),
            });
            level.unknown.push(UnknownBlock {
                parent: parent.map(|p| before[p].tag),
                after,
                raw: data[entry.raw_range()].to_vec(),
            });
        }
        Ok(level)
    }

    /// Stored payload when `changed` is off, otherwise (or when the block
    /// was never loaded) a fresh encoding.
    fn block(
        &self,
        tag: &[u8; 4],
        changed: bool,
        fresh: impl FnOnce() -> Result<Option<Vec<u8>>>,
    ) -> Result<Option<Vec<u8>>> {
        match self.original.get(tag) {
            Some(stored) if !changed => Ok(Some(stored.clone())),
            _ => fresh(),
        }
    }

    /// Encode the level. The PVS node lists are rebuilt from the node tree
    /// when mesh changes are saved; the level itself only takes the rebuilt
    /// lists once the whole save has succeeded.
    pub fn save(&mut self, options: &LevelSaveOptions) -> Result<Vec<u8>> {
        let version = self.version;
        let mesh = options.save_mesh_changes;
        let rebuilt_pvs = match (&self.pvs, &self.node_tree) {
            (Some(pvs), Some(tree)) if mesh => {
                let mut pvs = pvs.clone();
                pvs.rebuild_node_lists(tree);
                Some(pvs)
            }
            _ => None,
        };
        let pvs = rebuilt_pvs.as_ref().or(self.pvs.as_ref());

        let gmsh: [(&[u8; 4], Option<Vec<u8>>); 8] = [
            (b"TEX ", self.block(b"TEX ", mesh, || Ok(self.textures.as_ref().map(TextureList::encode)))?),
            (
                b"ANIM",
                self.block(b"ANIM", mesh, || Ok(self.animated_textures.as_ref().map(AnimatedTextures::encode)))?,
            ),
            (
                b"MAT ",
                self.block(b"MAT ", mesh, || self.materials.as_ref().map(MaterialList::encode).transpose())?,
            ),
            (
                b"SECT",
                self.block(b"SECT", mesh || options.save_dynamic_instance_changes, || {
                    self.geometry.as_ref().map(|g| g.encode(version)).transpose()
                })?,
            ),
            (b"NODE", self.block(b"NODE", mesh, || Ok(self.node_tree.as_ref().map(|t| t.encode(version))))?),
            (b"PVS ", self.block(b"PVS ", mesh, || Ok(pvs.map(|p| p.encode(version))))?),
            (
                b"AIMP",
                self.block(b"AIMP", options.save_aimap_changes, || Ok(self.ai_maps.as_ref().map(AiMapList::encode)))?,
            ),
            (b"GRID", self.block(b"GRID", mesh, || Ok(self.grid.as_ref().map(Grid::encode)))?),
        ];
        let splines = self.block(b"SPLN", options.save_spline_changes, || {
            Ok(self.splines.as_ref().map(SplineList::encode))
        })?;

        let actor_blocks = match (&mut self.actors, options.save_actor_changes) {
            (Some(actors), true) => {
                let blocks = actors.encode()?;
                Some([blocks.astr, blocks.pstr, blocks.ainf])
            }
            _ => match (self.original.get(b"ASTR"), self.original.get(b"PSTR"), self.original.get(b"AINF")) {
                (Some(astr), Some(pstr), Some(ainf)) => Some([astr.clone(), pstr.clone(), ainf.clone()]),
                _ => None,
            },
        };

        let mut writer = ChunkWriter::new();
        let mut unknown = UnknownPlacer::new(&self.unknown);
        writer.begin(b"LEVL");
        unknown.place(&mut writer, Some(b"LEVL"), None);
        unknown.leaf(&mut writer, b"LEVL", b"INFO", &version.to_le_bytes());

        writer.begin(b"GMSH");
        unknown.place(&mut writer, Some(b"GMSH"), None);
        for (tag, payload) in gmsh {
            if let Some(payload) = payload {
                unknown.leaf(&mut writer, b"GMSH", tag, &payload);
            }
        }
        unknown.rest(&mut writer, Some(b"GMSH"));
        writer.end();
        unknown.place(&mut writer, Some(b"LEVL"), Some(b"GMSH"));

        if let Some(payload) = splines {
            unknown.leaf(&mut writer, b"LEVL", b"SPLN", &payload);
        }
        if let Some(lights) = &self.lights {
            unknown.leaf(&mut writer, b"LEVL", b"LITE", &lights.encode());
        }

        if actor_blocks.is_some() || unknown.has(b"ACTR") {
            writer.begin(b"ACTR");
            unknown.place(&mut writer, Some(b"ACTR"), None);
            if let Some([astr, pstr, ainf]) = &actor_blocks {
                unknown.leaf(&mut writer, b"ACTR", b"ASTR", astr);
                unknown.leaf(&mut writer, b"ACTR", b"PSTR", pstr);
                unknown.leaf(&mut writer, b"ACTR", b"AINF", ainf);
            }
            unknown.rest(&mut writer, Some(b"ACTR"));
            writer.end();
            unknown.place(&mut writer, Some(b"LEVL"), Some(b"ACTR"));
        }

        unknown.rest(&mut writer, Some(b"LEVL"));
        writer.end();
        unknown.rest(&mut writer, None);
        let out = writer.finish();

        if rebuilt_pvs.is_some() {
            self.pvs = rebuilt_pvs;
        }
        log::info!("saved LP2 '{}': {} bytes", self.name, out.len());
        Ok(out)
    }

    /// Save, then replace `path` in one step; nothing is written on error.
    pub fn save_to_path(&mut self, path: impl AsRef<Path>, options: &LevelSaveOptions) -> Result<()> {
        let bytes = self.save(options)?;
        write_atomically(path.as_ref(), &bytes)
    }

    pub fn summary(&self) -> LevelSummary {
        let geometry = self.geometry.as_ref();
        LevelSummary {
            name: self.name.clone(),
            version: self.version,
            textures: self.textures.as_ref().map_or(0, TextureList::len),
            materials: self.materials.as_ref().map_or(0, MaterialList::len),
            render_sections: geometry.map_or(0, |g| g.render_sections.len()),
            collision_sections: geometry.map_or(0, |g| g.collision_sections.len()),
            static_instances: geometry.map_or(0, |g| g.static_instances.len()),
            dynamic_instances: geometry.map_or(0, |g| g.dynamic_instances.len()),
            tree_nodes: self.node_tree.as_ref().map_or(0, |t| t.nodes.len()),
            portal_cells: self.pvs.as_ref().map_or(0, |p| p.cells.len()),
            ai_maps: self.ai_maps.as_ref().map_or(0, AiMapList::len),
            splines: self.splines.as_ref().map_or(0, SplineList::len),
            lights: self.lights.as_ref().map_or(0, |l| l.lights.len()),
            actors: self.actors.as_ref().map_or(0, ActorList::len),
            unknown_blocks: self
                .unknown
                .iter()
                .map(|b| String::from_utf8_lossy(&b.raw[..4.min(b.raw.len())]).into_owned())
                .collect(),
        }
    }
}

/// Write through a temporary file in the target directory, then rename it
/// over `path`.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| AssetError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkWriter;

    fn level_bytes() -> Vec<u8> {
        let mut splines = SplineList::default();
        splines.add_spline(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]], false);
        let mut w = ChunkWriter::new();
        w.begin(b"LEVL");
        w.leaf_with(b"INFO", |w| w.u32(4));
        w.begin(b"GMSH");
        w.leaf(b"XTRA", &[1, 2, 3, 4]);
        w.end();
        w.leaf(b"SPLN", &splines.encode());
        w.end();
        w.finish()
    }

    #[test]
    fn unknown_blocks_survive_a_save() {
        let mut context = AssetContext::without_classes();
        let mut level = Level::load(&level_bytes(), "test", &mut context).unwrap();
        assert_eq!(level.version, 4);
        assert_eq!(level.splines.as_ref().unwrap().len(), 1);
        assert_eq!(level.unknown.len(), 1);
        assert_eq!(level.unknown[0].parent, Some(Tag(*b"GMSH")));
        assert!(matches!(
            context.diagnostics.warnings(),
            [Warning::UnknownBlock { tag }] if tag == "XTRA"
        ));

        let saved = level.save(&LevelSaveOptions::default()).unwrap();
        assert_eq!(saved, level_bytes());
    }

    #[test]
    fn unknown_blocks_keep_their_place_among_siblings() {
        let mut w = ChunkWriter::new();
        w.begin(b"LEVL");
        w.leaf_with(b"INFO", |w| w.u32(4));
        w.leaf(b"XONE", &[1]);
        w.begin(b"GMSH");
        w.leaf(b"XTWO", &[2, 2]);
        w.leaf(b"MAT ", &MaterialList::default().encode().unwrap());
        w.leaf(b"XTRA", &[3, 3, 3]);
        w.leaf(b"NODE", &NodeTree::default().encode(4));
        w.end();
        w.leaf(b"SPLN", &SplineList::default().encode());
        w.end();
        let original = w.finish();

        let mut context = AssetContext::without_classes();
        let mut level = Level::load(&original, "test", &mut context).unwrap();
        let anchors: Vec<_> = level
            .unknown
            .iter()
            .map(|b| (b.parent.map(|t| t.as_str()), b.after.map(|t| t.as_str())))
            .collect();
        assert_eq!(
            anchors,
            vec![
                (Some("LEVL".to_string()), Some("INFO".to_string())),
                (Some("GMSH".to_string()), None),
                (Some("GMSH".to_string()), Some("MAT ".to_string())),
            ]
        );
        assert_eq!(level.save(&LevelSaveOptions::default()).unwrap(), original);
        assert_eq!(level.save(&LevelSaveOptions::all()).unwrap(), original);
    }

    #[test]
    fn failed_save_keeps_the_loaded_node_lists() {
        use crate::level::materials::{Material, MaterialProperty};
        use crate::level::node_tree::tests::sample_tree;
        use crate::level::pvs::{CellSection, PortalCell};

        let cell = PortalCell {
            sections: vec![CellSection {
                model: 0,
                instance: 1,
                global_instance: 1,
            }],
            node_ids: vec![9],
            ..Default::default()
        };
        let mut crowded = Material::new(0, 1, false);
        crowded.properties = vec![MaterialProperty::default(); 0x1_0000];
        let mut level = Level {
            version: 4,
            node_tree: Some(sample_tree()),
            pvs: Some(Pvs {
                vertices: Vec::new(),
                cells: vec![cell],
            }),
            materials: Some(MaterialList {
                materials: vec![crowded],
            }),
            ..Default::default()
        };

        assert!(level.save(&LevelSaveOptions::all()).is_err());
        assert_eq!(level.pvs.as_ref().unwrap().cells[0].node_ids, vec![9]);

        level.materials = Some(MaterialList::default());
        level.save(&LevelSaveOptions::all()).unwrap();
        assert_eq!(level.pvs.as_ref().unwrap().cells[0].node_ids, vec![3, 0]);
    }

    #[test]
    fn other_files_are_not_levels() {
        let mut context = AssetContext::without_classes();
        assert!(Level::probe(b"P2M \0\0\0\0", "x", &mut context).unwrap().is_none());
        assert!(matches!(
            Level::load(b"ADEF", "x", &mut context),
            Err(AssetError::NotThisFormat { .. })
        ));
    }

    #[test]
    fn failed_loads_leave_the_context_alone() {
        let mut bytes = level_bytes();
        // truncate inside the spline payload
        let cut = bytes.len() - 20;
        bytes.truncate(cut);
        let mut context = AssetContext::without_classes();
        assert!(Level::load(&bytes, "broken", &mut context).is_err());
        assert!(context.diagnostics.is_empty());
    }

    #[test]
    fn atomic_save_replaces_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.lp2");
        std::fs::write(&path, b"old").unwrap();
        let mut context = AssetContext::without_classes();
        let mut level = Level::load(&level_bytes(), "test", &mut context).unwrap();
        level.save_to_path(&path, &LevelSaveOptions::all()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), level_bytes());
    }
}
