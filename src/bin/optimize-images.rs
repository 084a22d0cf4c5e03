//! Convert site photos to WebP plus a resized JPEG fallback and record them
//! in a manifest the front end reads.
//!
//! Usage: optimize-images --src public/images --out public/optimized [--manifest PATH]
//!   --manifest PATH : defaults to OUT/manifest.json
//!
//! Re-runs skip originals whose outputs are newer than the source.
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use clap::Parser;
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};

/// Longest edge of the JPEG fallback.
const MAX_JPEG_EDGE: u32 = 1600;
const SOURCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Parser)]
#[command(name = "optimize-images", about = "Build WebP/JPEG variants and manifest.json for site images")]
struct Args {
    /// Directory holding the original images
    #[arg(long)]
    src: PathBuf,
    /// Output directory for generated files
    #[arg(long)]
    out: PathBuf,
    /// Manifest path (defaults to OUT/manifest.json)
    #[arg(long)]
    manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ManifestEntry {
    webp: String,
    jpeg: String,
    width: u32,
    height: u32,
}

type Manifest = BTreeMap<String, ManifestEntry>;

#[derive(Debug, Default, PartialEq)]
struct RunSummary {
    converted: usize,
    skipped: usize,
    failed: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let manifest_path = args
        .manifest
        .clone()
        .unwrap_or_else(|| args.out.join("manifest.json"));

    let summary = run(&args.src, &args.out, &manifest_path)?;
    tracing::info!(
        converted = summary.converted,
        skipped = summary.skipped,
        failed = summary.failed,
        "Manifest written to {}",
        manifest_path.display()
    );
    if summary.failed > 0 {
        anyhow::bail!("{} image(s) failed to convert", summary.failed);
    }
    Ok(())
}

fn run(src: &Path, out: &Path, manifest_path: &Path) -> anyhow::Result<RunSummary> {
    fs::create_dir_all(out).with_context(|| format!("Cannot create {}", out.display()))?;
    let src_root = src
        .canonicalize()
        .with_context(|| format!("Cannot read {}", src.display()))?;
    if out.canonicalize()? == src_root {
        anyhow::bail!(
            "--out must differ from --src ({}); outputs would land next to the originals",
            src.display()
        );
    }
    let mut manifest = load_manifest(manifest_path)?;
    let mut summary = RunSummary::default();

    let mut sources = Vec::new();
    collect_sources(src, out, &mut sources)?;
    sources.sort();

    for path in sources {
        let key = manifest_key(src, &path);
        if let Some(entry) = manifest.get(&key) {
            if is_fresh(&path, out, &key, entry) {
                summary.skipped += 1;
                continue;
            }
        }
        match convert(&path, out, &key) {
            Ok(entry) => {
                tracing::info!("Optimized {key} ({}x{})", entry.width, entry.height);
                manifest.insert(key, entry);
                summary.converted += 1;
            }
            Err(e) => {
                tracing::error!("Failed to optimize {key}: {e:#}");
                summary.failed += 1;
            }
        }
    }

    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(manifest_path, json + "\n")
        .with_context(|| format!("Cannot write {}", manifest_path.display()))?;
    Ok(summary)
}

fn load_manifest(path: &Path) -> anyhow::Result<Manifest> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .with_context(|| format!("Corrupt manifest at {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::new()),
        Err(e) => Err(e.into()),
    }
}

/// Walks `dir` recursively, skipping the output directory if it is nested inside.
fn collect_sources(dir: &Path, out: &Path, found: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            if path != out {
                collect_sources(&path, out, found)?;
            }
        } else if is_source_image(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn is_source_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Path relative to the source root with forward slashes, e.g. `team/anna.jpg`.
fn manifest_key(src: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(src).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// `team/anna.png` -> (`team/anna.png.webp`, `team/anna.png.jpg`)
///
/// The source extension stays in the name so `hero.jpg` and `hero.png` in the
/// same folder never write to the same output.
fn output_names(key: &str) -> (String, String) {
    (format!("{key}.webp"), format!("{key}.jpg"))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn is_fresh(source: &Path, out: &Path, key: &str, entry: &ManifestEntry) -> bool {
    let Some(source_time) = modified(source) else {
        return false;
    };
    // Entries written under an older naming scheme are rebuilt.
    if output_names(key) != (entry.webp.clone(), entry.jpeg.clone()) {
        return false;
    }
    [&entry.webp, &entry.jpeg].iter().all(|name| {
        modified(&out.join(name.as_str()))
            .map(|t| t >= source_time)
            .unwrap_or(false)
    })
}

fn convert(source: &Path, out: &Path, key: &str) -> anyhow::Result<ManifestEntry> {
    let img = image::open(source)?;
    let (width, height) = img.dimensions();
    let (webp_name, jpeg_name) = output_names(key);

    let webp_path = out.join(&webp_name);
    let jpeg_path = out.join(&jpeg_name);
    if let Some(parent) = webp_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // The WebP encoder only takes 8-bit RGB(A).
    DynamicImage::ImageRgba8(img.to_rgba8()).save_with_format(&webp_path, ImageFormat::WebP)?;

    let fallback = if width.max(height) > MAX_JPEG_EDGE {
        img.resize(MAX_JPEG_EDGE, MAX_JPEG_EDGE, FilterType::Lanczos3)
    } else {
        img
    };
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(fallback.to_rgb8())
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;
    fs::write(&jpeg_path, jpeg)?;

    Ok(ManifestEntry {
        webp: webp_name,
        jpeg: jpeg_name,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_photo(path: &Path, width: u32, height: u32) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        RgbImage::from_pixel(width, height, Rgb([180, 90, 40]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn output_names_keep_subdirectories() {
        assert_eq!(
            output_names("team/anna.photo.JPEG"),
            (
                "team/anna.photo.JPEG.webp".to_string(),
                "team/anna.photo.JPEG.jpg".to_string()
            )
        );
    }

    #[test]
    fn same_stem_with_different_extensions_keeps_both() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_photo(&src.path().join("hero.jpg"), 40, 20);
        write_photo(&src.path().join("hero.png"), 30, 90);
        let manifest_path = out.path().join("manifest.json");

        let summary = run(src.path(), out.path(), &manifest_path).unwrap();
        assert_eq!(summary, RunSummary { converted: 2, skipped: 0, failed: 0 });

        let manifest = load_manifest(&manifest_path).unwrap();
        let jpg = &manifest["hero.jpg"];
        let png = &manifest["hero.png"];
        assert_ne!(jpg.webp, png.webp);
        assert_ne!(jpg.jpeg, png.jpeg);
        assert_eq!(image::open(out.path().join(&jpg.jpeg)).unwrap().dimensions(), (40, 20));
        assert_eq!(image::open(out.path().join(&png.jpeg)).unwrap().dimensions(), (30, 90));
        assert_eq!(image::open(out.path().join(&png.webp)).unwrap().dimensions(), (30, 90));
    }

    #[test]
    fn refuses_to_write_into_the_source_directory() {
        let src = tempfile::tempdir().unwrap();
        write_photo(&src.path().join("hero.jpg"), 16, 16);
        let before = fs::read(src.path().join("hero.jpg")).unwrap();

        let err = run(src.path(), src.path(), &src.path().join("manifest.json")).unwrap_err();
        assert!(err.to_string().contains("--out must differ"));
        assert_eq!(fs::read(src.path().join("hero.jpg")).unwrap(), before);
        assert!(!src.path().join("manifest.json").exists());

        // A different spelling of the same directory is caught too.
        let dotted = src.path().join(".");
        assert!(run(src.path(), &dotted, &src.path().join("manifest.json")).is_err());
    }

    #[test]
    fn converts_and_caps_jpeg_size() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_photo(&src.path().join("hero.png"), 2000, 1000);
        write_photo(&src.path().join("crew/anna.jpg"), 300, 200);
        fs::write(src.path().join("notes.txt"), "not an image").unwrap();
        let manifest_path = out.path().join("manifest.json");

        let summary = run(src.path(), out.path(), &manifest_path).unwrap();
        assert_eq!(summary, RunSummary { converted: 2, skipped: 0, failed: 0 });

        let manifest = load_manifest(&manifest_path).unwrap();
        let hero = &manifest["hero.png"];
        assert_eq!((hero.width, hero.height), (2000, 1000));
        let jpeg = image::open(out.path().join(&hero.jpeg)).unwrap();
        assert_eq!(jpeg.dimensions(), (1600, 800));
        assert!(out.path().join(&hero.webp).exists());
        assert!(out.path().join("crew/anna.jpg.webp").exists());
        assert!(!manifest.contains_key("notes.txt"));
    }

    #[test]
    fn rerun_skips_up_to_date_images() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_photo(&src.path().join("sauna.jpg"), 64, 64);
        let manifest_path = out.path().join("manifest.json");

        run(src.path(), out.path(), &manifest_path).unwrap();
        let second = run(src.path(), out.path(), &manifest_path).unwrap();
        assert_eq!(second, RunSummary { converted: 0, skipped: 1, failed: 0 });

        fs::remove_file(out.path().join("sauna.jpg.webp")).unwrap();
        let third = run(src.path(), out.path(), &manifest_path).unwrap();
        assert_eq!(third.converted, 1);
    }

    #[test]
    fn broken_source_is_counted_not_fatal() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(src.path().join("broken.jpg"), b"garbage").unwrap();
        write_photo(&src.path().join("ok.png"), 10, 10);

        let summary = run(src.path(), out.path(), &out.path().join("manifest.json")).unwrap();
        assert_eq!(summary, RunSummary { converted: 1, skipped: 0, failed: 1 });
    }
}
