use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../config.template.toml");

    let template = r#"# SDIKIT Configuration Template
# Copy this file to 'config.toml' and fill in your actual values

# SCTE-35 section re-emission interval, in 27 MHz ticks (27000000 = 1 second)
scte35_interval = 27000000

# Frames buffered per stage before the oldest is dropped
queue_limit = 64
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
