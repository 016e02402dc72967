use image::{Rgba, RgbaImage};
use tp_tools_lib::level::textures::{LevelTexture, TextureList};
use tp_tools_lib::model::p2m::{LodMesh, MeshFace, ModelLod};
use tp_tools_lib::model::{ModelMaterial, ModelMaterialProperty};
use tp_tools_lib::stripper::StripifierConfig;
use tp_tools_lib::{Diagnostics, P2mModel, Tp2Texture};

/// `n` × `n` grid of quads in the XZ plane, two triangles each.
fn grid(n: u32) -> LodMesh {
    let side = n + 1;
    let mut mesh = LodMesh {
        radius: 25.0,
        ..Default::default()
    };
    for z in 0..side {
        for x in 0..side {
            mesh.positions.push([x as f32, 0.0, z as f32]);
            mesh.uvs.push([x as f32 / n as f32, z as f32 / n as f32]);
        }
    }
    for z in 0..n {
        for x in 0..n {
            let a = z * side + x;
            let (b, c, d) = (a + 1, a + side + 1, a + side);
            let material = if x < n / 2 { 0 } else { 1 };
            mesh.faces.push(MeshFace {
                indices: [a, b, c],
                material,
            });
            mesh.faces.push(MeshFace {
                indices: [a, c, d],
                material,
            });
        }
    }
    mesh
}

fn checker() -> RgbaImage {
    RgbaImage::from_fn(8, 8, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 128])
        }
    })
}

#[test]
fn png_pixels_survive_tp2_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let png = dir.path().join("checker.png");
    checker().save(&png).unwrap();

    let image = image::open(&png).unwrap().to_rgba8();
    let bytes = Tp2Texture::encode_rgba(&image, Some("CHECKER"), 256).unwrap();
    let texture = Tp2Texture::decode(&bytes).unwrap();
    assert_eq!(texture.name.as_deref(), Some("CHECKER"));
    assert_eq!((texture.width, texture.height), (8, 8));
    assert_eq!(texture.to_rgba_image().unwrap(), checker());
}

#[test]
fn restripped_model_keeps_every_triangle() {
    let texture = Tp2Texture::from_rgba(&checker(), Some("CHECKER"), 16);
    let textures = TextureList {
        textures: vec![LevelTexture::from_texture(&texture, "crate_0").unwrap()],
    };
    let materials = vec![
        ModelMaterial {
            kind: 0,
            properties: vec![ModelMaterialProperty::textured(0)],
        },
        ModelMaterial::default(),
    ];
    let source = grid(6);
    let config = StripifierConfig::default();
    let model = P2mModel::from_mesh("crate", &[vec![source.clone()]], materials, textures, &config).unwrap();

    let bytes = model.encode();
    let decoded = P2mModel::decode(&bytes, "crate", &mut Diagnostics::new()).unwrap();
    assert_eq!(decoded, model);
    assert_eq!(decoded.textures.as_ref().unwrap().textures[0].name, "CHECKER");

    let lod = &decoded.meshes[0].lods[0];
    assert_eq!(lod.radius, 25.0);
    assert_eq!(lod.submeshes.len(), 2);
    assert_eq!(lod.triangle_count(), source.faces.len());

    // a second pass over the decoded geometry finds the same triangles
    let again = ModelLod::from_mesh(&lod.mesh(), &config).unwrap();
    assert_eq!(again.triangle_count(), source.faces.len());
    let summary = decoded.summary();
    assert_eq!(summary.triangles, 72);
    assert!(summary.strips <= summary.geometries);
}
