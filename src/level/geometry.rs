//! `SECT` block: shared render/collision sections and the model instances
//! that place them in the level.
//!
//! ```text
//! u32 render_count,    render_count × RenderSection
//! u32 collision_count, collision_count × CollisionSection
//! [u32 render_instance_total]              version > 3
//! u32 n, n × LevelModelInstance            static
//! u32 n, n × LevelModelInstance            dynamic
//!
//! LevelModelInstance
//!   16 × f32 transform, u32 vertex_color_index, [u32 effects]  version >= 3
//!   u32 n, n × { [u32 index] version >= 4, u32 section, 3 f32 a, 3 f32 b }
//!   u32 n, n × { u32 section, 3 f32 a, 3 f32 b }
//! ```
//!
//! Bounds are world space and stored as two corners in no particular order;
//! decode normalises them to min/max.

use crate::error::{AssetError, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::level::collision::CollisionSection;
use crate::level::materials::MaterialList;
use crate::level::render::RenderSection;
use crate::math::{Aabb, TpMatrix44};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryInstance {
    /// Global render-instance id. Collision instances number themselves
    /// sequentially per instance list.
    pub index: u32,
    pub section: u32,
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl GeometryInstance {
    fn decode(reader: &mut ByteReader, index: u32) -> Result<Self> {
        let section = reader.u32()?;
        let a = reader.vec3()?;
        let b = reader.vec3()?;
        let bounds = Aabb::from_corners(a, b);
        Ok(GeometryInstance {
            index,
            section,
            min: bounds.min,
            max: bounds.max,
        })
    }

    fn encode_bounds(&self, w: &mut ByteWriter) {
        w.u32(self.section);
        w.vec3(self.min);
        w.vec3(self.max);
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LevelModelInstance {
    pub transform: TpMatrix44,
    pub vertex_color_index: u32,
    /// Always zero in shipped levels
    pub effects: u32,
    pub render_instances: Vec<GeometryInstance>,
    pub collision_instances: Vec<GeometryInstance>,
}

impl LevelModelInstance {
    /// `first_render`/`first_collision` are the running instance counts of
    /// the list this instance belongs to.
    pub fn decode(
        reader: &mut ByteReader,
        version: u32,
        first_render: u32,
        first_collision: u32,
    ) -> Result<Self> {
        let transform = reader.record::<TpMatrix44>()?;
        let vertex_color_index = reader.u32()?;
        let effects = if version >= 3 { reader.u32()? } else { 0 };

        let count = reader.u32()?;
        let mut render_instances = Vec::with_capacity(count.min(1024) as usize);
        for i in 0..count {
            let index = if version >= 4 {
                reader.u32()?
            } else {
                first_render + i
            };
            render_instances.push(GeometryInstance::decode(reader, index)?);
        }

        let count = reader.u32()?;
        let collision_instances = (0..count)
            .map(|i| GeometryInstance::decode(reader, first_collision + i))
            .collect::<Result<Vec<_>>>()?;

        Ok(LevelModelInstance {
            transform,
            vertex_color_index,
            effects,
            render_instances,
            collision_instances,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter, version: u32) {
        w.mat4(&self.transform.to_slice());
        w.u32(self.vertex_color_index);
        if version >= 3 {
            w.u32(self.effects);
        }
        w.u32(self.render_instances.len() as u32);
        for instance in &self.render_instances {
            if version >= 4 {
                w.u32(instance.index);
            }
            instance.encode_bounds(w);
        }
        w.u32(self.collision_instances.len() as u32);
        self.collision_instances.iter().for_each(|i| i.encode_bounds(w));
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeometrySection {
    pub render_sections: Vec<RenderSection>,
    pub collision_sections: Vec<CollisionSection>,
    /// Sum of static render instances; only stored for version > 3
    pub render_instance_total: u32,
    pub static_instances: Vec<LevelModelInstance>,
    pub dynamic_instances: Vec<LevelModelInstance>,
}

impl GeometrySection {
    pub fn decode(payload: &[u8], version: u32, materials: &MaterialList) -> Result<Self> {
        let mut reader = ByteReader::new(payload);

        let count = reader.u32()? as usize;
        let render_sections = (0..count)
            .map(|_| RenderSection::decode(&mut reader, materials))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("SECT: {} render sections", render_sections.len());

        let count = reader.u32()? as usize;
        let collision_sections = (0..count)
            .map(|_| CollisionSection::decode(&mut reader))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("SECT: {} collision sections", collision_sections.len());

        let stored_total = if version > 3 { Some(reader.u32()?) } else { None };
        let static_instances = Self::decode_instances(&mut reader, version)?;
        let dynamic_instances = Self::decode_instances(&mut reader, version)?;

        let mut section = GeometrySection {
            render_sections,
            collision_sections,
            render_instance_total: 0,
            static_instances,
            dynamic_instances,
        };
        section.render_instance_total = section.static_render_instance_count();
        if let Some(stored) = stored_total.filter(|&s| s != section.render_instance_total) {
            log::debug!(
                "SECT: stored render instance total {} replaced by {}",
                stored,
                section.render_instance_total
            );
        }
        section.check_references(reader.position())?;
        Ok(section)
    }

    fn decode_instances(reader: &mut ByteReader, version: u32) -> Result<Vec<LevelModelInstance>> {
        let count = reader.u32()?;
        let mut instances = Vec::with_capacity(count.min(4096) as usize);
        let (mut render, mut collision) = (0u32, 0u32);
        for _ in 0..count {
            let instance = LevelModelInstance::decode(reader, version, render, collision)?;
            render += instance.render_instances.len() as u32;
            collision += instance.collision_instances.len() as u32;
            instances.push(instance);
        }
        Ok(instances)
    }

    fn check_references(&self, at: usize) -> Result<()> {
        for instance in self.static_instances.iter().chain(&self.dynamic_instances) {
            if let Some(bad) = instance
                .render_instances
                .iter()
                .find(|i| i.section as usize >= self.render_sections.len())
            {
                return Err(AssetError::corrupt(
                    at,
                    format!(
                        "render instance points at section {} of {}",
                        bad.section,
                        self.render_sections.len()
                    ),
                ));
            }
            if let Some(bad) = instance
                .collision_instances
                .iter()
                .find(|i| i.section as usize >= self.collision_sections.len())
            {
                return Err(AssetError::corrupt(
                    at,
                    format!(
                        "collision instance points at section {} of {}",
                        bad.section,
                        self.collision_sections.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn encode(&self, version: u32) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.u32(self.render_sections.len() as u32);
        self.render_sections.iter().for_each(|s| s.encode(&mut w));
        w.u32(self.collision_sections.len() as u32);
        for section in &self.collision_sections {
            section.encode(&mut w)?;
        }
        if version > 3 {
            w.u32(self.static_render_instance_count());
        }
        for list in [&self.static_instances, &self.dynamic_instances] {
            w.u32(list.len() as u32);
            list.iter().for_each(|i| i.encode(&mut w, version));
        }
        Ok(w.into_inner())
    }

    pub fn static_render_instance_count(&self) -> u32 {
        self.static_instances
            .iter()
            .map(|i| i.render_instances.len() as u32)
            .sum()
    }

    /// Global render-instance id of `(model, instance)` in the static list,
    /// the pair portal cells and the node tree refer to sections by.
    pub fn global_render_index(&self, model: u32, instance: u32) -> Option<u32> {
        self.static_instances
            .get(model as usize)?
            .render_instances
            .get(instance as usize)
            .map(|i| i.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(sections: &[u32]) -> LevelModelInstance {
        LevelModelInstance {
            transform: TpMatrix44::from_translation([1.0, 2.0, 3.0]),
            vertex_color_index: 0,
            effects: 0,
            render_instances: sections
                .iter()
                .map(|&section| GeometryInstance {
                    index: 0,
                    section,
                    min: [0.0; 3],
                    max: [1.0; 3],
                })
                .collect(),
            collision_instances: Vec::new(),
        }
    }

    fn section(render_sections: usize) -> GeometrySection {
        GeometrySection {
            render_sections: vec![RenderSection::default(); render_sections],
            ..Default::default()
        }
    }

    #[test]
    fn old_versions_number_render_instances_sequentially() {
        let mut geometry = section(1);
        geometry.static_instances = vec![instance(&[0, 0]), instance(&[0])];
        let bytes = geometry.encode(3).unwrap();
        let decoded = GeometrySection::decode(&bytes, 3, &MaterialList::default()).unwrap();
        let ids: Vec<u32> = decoded
            .static_instances
            .iter()
            .flat_map(|m| m.render_instances.iter().map(|i| i.index))
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(decoded.global_render_index(1, 0), Some(2));
        assert_eq!(decoded.static_instances[0].transform.translation(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn instance_total_is_recomputed() {
        let mut geometry = section(1);
        geometry.static_instances = vec![instance(&[0, 0, 0])];
        geometry.dynamic_instances = vec![instance(&[0])];
        geometry.render_instance_total = 99;
        let bytes = geometry.encode(4).unwrap();
        let decoded = GeometrySection::decode(&bytes, 4, &MaterialList::default()).unwrap();
        assert_eq!(decoded.render_instance_total, 3);
        assert_eq!(decoded.dynamic_instances.len(), 1);
    }

    #[test]
    fn bounds_are_normalised() {
        let mut w = ByteWriter::new();
        w.u32(0);
        w.vec3([1.0, -1.0, 5.0]);
        w.vec3([-1.0, 1.0, 2.0]);
        let bytes = w.into_inner();
        let instance = GeometryInstance::decode(&mut ByteReader::new(&bytes), 0).unwrap();
        assert_eq!(instance.min, [-1.0, -1.0, 2.0]);
        assert_eq!(instance.max, [1.0, 1.0, 5.0]);
    }

    #[test]
    fn dangling_section_reference_is_corrupt() {
        let mut geometry = section(1);
        geometry.static_instances = vec![instance(&[4])];
        let bytes = geometry.encode(4).unwrap();
        let err = GeometrySection::decode(&bytes, 4, &MaterialList::default()).unwrap_err();
        assert!(matches!(err, AssetError::Corrupt { .. }));
    }
}
