use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../vdkflow.template.toml");

    let template = r#"# vdkflow engine configuration template
# Copy this file to 'vdkflow.toml' and adjust the values

# Sleep between scheduler sweeps that moved nothing (milliseconds)
idle_backoff_ms = 1

# Frames kept by the audio effector
audio_frame_pool = 3

# Minimum progress delta between progress notifications
progress_step = 0.01
"#;

    if !template_path.exists() {
        let _ = fs::write(template_path, template);
    }
    println!("cargo:rerun-if-changed=build.rs");
}
