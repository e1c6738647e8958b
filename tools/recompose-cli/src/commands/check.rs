//! Check external tool availability.

use recompose_engine::probe::ffprobe_available;

pub fn run() -> anyhow::Result<()> {
    println!("Recompose System Check");
    println!("{}", "=".repeat(50));

    let ffprobe = ffprobe_available();
    if ffprobe {
        println!("[OK] ffprobe found on PATH");
    } else {
        println!("[WARN] ffprobe not found: `probe` and `plan` on video files are unavailable");
    }
    println!("[OK] Synthetic backend: always available");

    println!();
    if ffprobe {
        println!("All tools are available. Recompose is ready.");
    } else {
        println!("Install ffmpeg to probe real media files.");
    }

    Ok(())
}
