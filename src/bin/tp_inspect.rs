use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use tp_tools_lib::actor::Adef;
use tp_tools_lib::chunk::{scan, ChunkFamily, ADEF_FAMILY, LEVEL_FAMILY, P2M_FAMILY, P2S_FAMILY};
use tp_tools_lib::compression::{decompress, is_pk2, unwrap_pk2};
use tp_tools_lib::model::p2m::ModelLod;
use tp_tools_lib::stripper::StripifierConfig;
use tp_tools_lib::{AssetContext, Diagnostics, Level, P2mModel, Tp2Texture};

const DEFAULT_COLOURS: usize = 256;

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  tp_inspect scan <file>");
    eprintln!("  tp_inspect decompress <in> <out>");
    eprintln!("  tp_inspect level <file.lp2> [--adef <adef.sama>] [--enums <enums.json>] [--root <asset dir>]");
    eprintln!("  tp_inspect tp2-to-png <in.tp2> <out.png>");
    eprintln!("  tp_inspect png-to-tp2 <in.png> <out.tp2> [--name N] [--colours N]");
    eprintln!("  tp_inspect p2m <file.p2m>");
    eprintln!("  tp_inspect stripify-check <file.p2m>");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  tp_inspect scan ./DATA/LEVELS/MONTESSA.LP2");
    eprintln!("  tp_inspect level ./DATA/LEVELS/MONTESSA.LP2 --adef ./DATA/ADEF.SAMA");
    std::process::exit(1);
}

/// Value following `flag` anywhere after the positional arguments.
fn option<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn print_warnings(diagnostics: &Diagnostics) {
    for warning in diagnostics.warnings() {
        println!("warning: {}", warning);
    }
}

fn scan_file(path: &Path) -> Result<()> {
    let bytes = read(path)?;
    let mut diagnostics = Diagnostics::new();
    let data = unwrap_pk2(&bytes, &mut diagnostics)?;
    let family: &ChunkFamily = match data.get(..3) {
        Some(b"LEV") => &LEVEL_FAMILY,
        Some(b"P2M") => &P2M_FAMILY,
        Some(b"P2S") => &P2S_FAMILY,
        Some(b"ADE") => &ADEF_FAMILY,
        _ => bail!("{} is not a chunked asset", path.display()),
    };
    let map = scan(&data, family)?;
    let label = format!("{} ({}, {:#x} bytes)", path.display(), family.name, data.len());
    ptree::print_tree(&map.to_tree(&label))?;
    print_warnings(&diagnostics);
    Ok(())
}

fn decompress_file(input: &Path, output: &Path) -> Result<()> {
    let bytes = read(input)?;
    if !is_pk2(&bytes) {
        bail!("{} is not PK2-compressed", input.display());
    }
    let mut diagnostics = Diagnostics::new();
    let data = decompress(&bytes, &mut diagnostics)?;
    std::fs::write(output, &data).with_context(|| format!("writing {}", output.display()))?;
    eprintln!("{} -> {} ({:#x} bytes)", input.display(), output.display(), data.len());
    print_warnings(&diagnostics);
    Ok(())
}

fn inspect_level(path: &Path, args: &[String]) -> Result<()> {
    let mut context = match option(args, "--adef") {
        Some(adef_path) => {
            let mut diagnostics = Diagnostics::new();
            let adef = Adef::decode(&read(Path::new(adef_path))?, &mut diagnostics)
                .with_context(|| format!("decoding {}", adef_path))?;
            let mut context = AssetContext::new(adef)?;
            context.diagnostics.extend(diagnostics);
            context
        }
        None => AssetContext::without_classes(),
    };
    if let Some(enums) = option(args, "--enums") {
        context = context.with_enum_overrides(enums)?;
    }
    if let Some(root) = option(args, "--root") {
        context = context.with_asset_root(root);
    }

    let level = Level::load(&read(path)?, &stem(path), &mut context)
        .with_context(|| format!("decoding {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&level.summary())?);

    if let (Some(models), Some(actors)) = (context.models(), &level.actors) {
        for actor in &actors.actors {
            for model in models.models_for(actor, context.enums()) {
                println!("{}: {}", actor.name, model.display());
            }
        }
    }
    print_warnings(&context.diagnostics);
    Ok(())
}

fn tp2_to_png(input: &Path, output: &Path) -> Result<()> {
    let bytes = read(input)?;
    let mut diagnostics = Diagnostics::new();
    let texture = Tp2Texture::decode(&unwrap_pk2(&bytes, &mut diagnostics)?)?;
    texture
        .to_rgba_image()?
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    eprintln!(
        "{}: {}x{} {:?}",
        texture.name.as_deref().unwrap_or("(unnamed)"),
        texture.width,
        texture.height,
        texture.format
    );
    Ok(())
}

fn png_to_tp2(input: &Path, output: &Path, args: &[String]) -> Result<()> {
    let image = image::open(input)
        .with_context(|| format!("reading {}", input.display()))?
        .to_rgba8();
    let colours = match option(args, "--colours") {
        Some(n) => n.parse().with_context(|| format!("bad colour count '{}'", n))?,
        None => DEFAULT_COLOURS,
    };
    let bytes = Tp2Texture::encode_rgba(&image, option(args, "--name"), colours)?;
    std::fs::write(output, bytes).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

fn load_p2m(path: &Path) -> Result<(P2mModel, Diagnostics)> {
    let mut diagnostics = Diagnostics::new();
    let model = P2mModel::decode(&read(path)?, &stem(path), &mut diagnostics)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok((model, diagnostics))
}

fn inspect_p2m(path: &Path) -> Result<()> {
    let (model, diagnostics) = load_p2m(path)?;
    println!("{}", serde_json::to_string_pretty(&model.summary())?);
    print_warnings(&diagnostics);
    Ok(())
}

/// Re-strip every LOD and compare against the stored strips.
fn stripify_check(path: &Path) -> Result<()> {
    let (model, _) = load_p2m(path)?;
    let config = StripifierConfig::default();
    let mut mismatches = 0;
    for (i, lod) in model.lods().enumerate() {
        let restripped = ModelLod::from_mesh(&lod.mesh(), &config)?;
        let (before, after) = (lod.triangle_count(), restripped.triangle_count());
        let geometries = |l: &ModelLod| l.submeshes.iter().map(|s| s.geometries.len()).sum::<usize>();
        println!(
            "lod {}: {} triangles in {} geometries -> {} triangles in {} geometries",
            i,
            before,
            geometries(lod),
            after,
            geometries(&restripped)
        );
        if before != after {
            mismatches += 1;
        }
    }
    if mismatches > 0 {
        bail!("{} LODs changed triangle count", mismatches);
    }
    Ok(())
}

fn run(args: &[String]) -> Result<()> {
    let path = |i: usize| args.get(i).map(PathBuf::from).unwrap_or_else(|| usage());
    match args.get(1).map(String::as_str) {
        Some("scan") => scan_file(&path(2)),
        Some("decompress") => decompress_file(&path(2), &path(3)),
        Some("level") => inspect_level(&path(2), &args[3..]),
        Some("tp2-to-png") => tp2_to_png(&path(2), &path(3)),
        Some("png-to-tp2") => png_to_tp2(&path(2), &path(3), &args[4..]),
        Some("p2m") => inspect_p2m(&path(2)),
        Some("stripify-check") => stripify_check(&path(2)),
        _ => usage(),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
}
