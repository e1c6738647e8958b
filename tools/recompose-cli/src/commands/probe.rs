//! Show metadata of a video source.

use std::path::PathBuf;

use recompose_engine::probe::FfprobeProbe;
use recompose_engine::MetadataProbe;

pub fn run(source: PathBuf, json: bool) -> anyhow::Result<()> {
    let mut probe = FfprobeProbe::new(&source);
    let metadata = probe
        .probe()
        .map_err(|e| anyhow::anyhow!("Failed to probe {}: {e}", source.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!("Source: {}", source.display());
    println!("  Coded size: {}", metadata.resolution);
    println!("  Rotation: {} deg", metadata.rotation.degrees());
    println!("  Display size: {}", metadata.display_resolution());
    match metadata.known_duration_us() {
        Some(us) => println!("  Duration: {:.3}s", recompose_common::us_to_secs(us)),
        None => println!("  Duration: unknown"),
    }
    println!(
        "  Video codec: {}",
        metadata.video_codec.as_deref().unwrap_or("unknown")
    );
    if metadata.has_audio {
        println!(
            "  Audio codec: {}",
            metadata.audio_codec.as_deref().unwrap_or("unknown")
        );
    } else {
        println!("  Audio: none");
    }

    Ok(())
}
