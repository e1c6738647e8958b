//! Resolve a configuration against a source and print the plan.

use std::path::{Path, PathBuf};

use recompose_common::AppConfig;
use recompose_engine::pixel::load_still_image;
use recompose_engine::probe::FfprobeProbe;
use recompose_engine::MetadataProbe;
use recompose_media_model::{MediaSource, SourceFacts, StillImage};

use crate::options::CompositionArgs;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn run(source: PathBuf, composition: &CompositionArgs, app: &AppConfig) -> anyhow::Result<()> {
    let (media_source, facts) = if is_image(&source) {
        let image = StillImage::File(source.clone());
        let pixels = load_still_image(&image)
            .map_err(|e| anyhow::anyhow!("Failed to load image: {e}"))?;
        (MediaSource::StillImage(image), SourceFacts::StillImage(pixels.resolution()))
    } else {
        let metadata = FfprobeProbe::new(&source)
            .probe()
            .map_err(|e| anyhow::anyhow!("Failed to probe {}: {e}", source.display()))?;
        (MediaSource::Video(source.clone()), SourceFacts::Video(metadata))
    };

    let config = composition.to_configuration(
        media_source,
        source.with_extension("recomposed.mp4"),
        &app.composition,
    )?;
    let plan = config
        .resolve(&facts)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
