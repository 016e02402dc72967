//! `LITE` block. Each light stores only the fields its flag word names:
//!
//! | bit | field |
//! |-----|-------|
//! | 1   | u32 type (0 ambient, 1 point, 2 spot, 4 sun) |
//! | 2   | 4 × f32 colour, stored B, G, R, pad |
//! | 4   | 16 × f32 transform |
//! | 8   | f32 radius, f32 falloff |
//! | 16  | f32 spot inner, f32 spot outer |

use crate::error::{AssetError, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::math::TpMatrix44;

pub const HAS_KIND: u32 = 0x1;
pub const HAS_COLOR: u32 = 0x2;
pub const HAS_TRANSFORM: u32 = 0x4;
pub const HAS_RADIUS: u32 = 0x8;
pub const HAS_SPOT: u32 = 0x10;
pub const ALL_FIELDS: u32 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightKind {
    Ambient,
    #[default]
    Point,
    Spot,
    Sun,
}

impl LightKind {
    fn from_raw(raw: u32, at: usize) -> Result<Self> {
        match raw {
            0 => Ok(LightKind::Ambient),
            1 => Ok(LightKind::Point),
            2 => Ok(LightKind::Spot),
            // 3 is never written by the game but shows up in re-saved levels
            3 | 4 => Ok(LightKind::Sun),
            other => Err(AssetError::corrupt(at, format!("unknown light type {}", other))),
        }
    }

    fn raw(self) -> u32 {
        match self {
            LightKind::Ambient => 0,
            LightKind::Point => 1,
            LightKind::Spot => 2,
            LightKind::Sun => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub flags: u32,
    pub kind: LightKind,
    /// RGB
    pub color: [f32; 3],
    pub color_pad: f32,
    pub transform: TpMatrix44,
    pub radius: f32,
    pub falloff: f32,
    pub spot_inner: f32,
    pub spot_outer: f32,
}

impl Default for Light {
    fn default() -> Self {
        Light {
            flags: ALL_FIELDS,
            kind: LightKind::Point,
            color: [0.0; 3],
            color_pad: 1.0,
            transform: TpMatrix44::default(),
            radius: 0.0,
            falloff: 0.0,
            spot_inner: 0.0,
            spot_outer: 0.0,
        }
    }
}

impl Light {
    fn decode(reader: &mut ByteReader) -> Result<Self> {
        let mut light = Light {
            flags: reader.u32()?,
            ..Default::default()
        };
        if light.flags & HAS_KIND != 0 {
            let at = reader.position();
            light.kind = LightKind::from_raw(reader.u32()?, at)?;
        }
        if light.flags & HAS_COLOR != 0 {
            let [b, g, r, pad] = reader.vec4()?;
            light.color = [r, g, b];
            light.color_pad = pad;
        }
        if light.flags & HAS_TRANSFORM != 0 {
            light.transform = reader.record::<TpMatrix44>()?;
        }
        if light.flags & HAS_RADIUS != 0 {
            light.radius = reader.f32()?;
            light.falloff = reader.f32()?;
        }
        if light.flags & HAS_SPOT != 0 {
            light.spot_inner = reader.f32()?;
            light.spot_outer = reader.f32()?;
        }
        Ok(light)
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.u32(self.flags);
        if self.flags & HAS_KIND != 0 {
            w.u32(self.kind.raw());
        }
        if self.flags & HAS_COLOR != 0 {
            let [r, g, b] = self.color;
            w.vec4([b, g, r, self.color_pad]);
        }
        if self.flags & HAS_TRANSFORM != 0 {
            w.mat4(&self.transform.to_slice());
        }
        if self.flags & HAS_RADIUS != 0 {
            w.f32(self.radius);
            w.f32(self.falloff);
        }
        if self.flags & HAS_SPOT != 0 {
            w.f32(self.spot_inner);
            w.f32(self.spot_outer);
        }
    }

    /// Derive the stored radius/falloff/spot values from editor-style light
    /// settings. All fields become present.
    pub fn from_editor(
        kind: LightKind,
        color: [f32; 3],
        transform: TpMatrix44,
        energy: f32,
        soft_radius: f32,
        spot_size: f32,
        spot_blend: f32,
    ) -> Self {
        let mut light = Light {
            flags: ALL_FIELDS,
            kind,
            color,
            transform,
            radius: soft_radius,
            falloff: energy * 2.0 - soft_radius,
            ..Default::default()
        };
        let reach = light.radius + light.falloff;
        if reach == 0.0 || spot_size == 0.0 {
            return light;
        }
        let spot = (spot_size * spot_size - energy * energy).max(0.0).sqrt() / reach * 0.5;
        light.spot_inner = spot - spot * spot_blend;
        light.spot_outer = spot + spot * spot_blend;
        light
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LightList {
    pub lights: Vec<Light>,
}

impl LightList {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let count = reader.u32()? as usize;
        let lights = (0..count)
            .map(|_| Light::decode(&mut reader))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("LITE: {} lights", lights.len());
        Ok(LightList { lights })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(self.lights.len() as u32);
        self.lights.iter().for_each(|l| l.encode(&mut w));
        w.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_flagged_fields_are_stored() {
        let mut w = ByteWriter::new();
        w.u32(2);
        // sun with colour only
        w.u32(HAS_KIND | HAS_COLOR);
        w.u32(4);
        w.vec4([0.25, 0.5, 0.75, 1.0]);
        // bare light
        w.u32(0);
        let bytes = w.into_inner();

        let list = LightList::decode(&bytes).unwrap();
        assert_eq!(list.lights[0].kind, LightKind::Sun);
        assert_eq!(list.lights[0].color, [0.75, 0.5, 0.25]);
        assert_eq!(list.lights[1].kind, LightKind::Point);
        assert_eq!(list.encode(), bytes);
    }

    #[test]
    fn unknown_type_is_corrupt() {
        let mut w = ByteWriter::new();
        w.u32(1);
        w.u32(HAS_KIND);
        w.u32(9);
        let err = LightList::decode(&w.into_inner()).unwrap_err();
        assert!(matches!(err, AssetError::Corrupt { .. }));
    }

    #[test]
    fn editor_settings_derive_spot_cone() {
        let light = Light::from_editor(
            LightKind::Spot,
            [1.0, 1.0, 1.0],
            TpMatrix44::default(),
            5.0,
            2.0,
            13.0,
            0.5,
        );
        assert_eq!(light.radius, 2.0);
        assert_eq!(light.falloff, 8.0);
        // sqrt(169 - 25) / 10 * 0.5 = 0.6
        assert!((light.spot_inner - 0.3).abs() < 1e-6);
        assert!((light.spot_outer - 0.9).abs() < 1e-6);
    }
}
