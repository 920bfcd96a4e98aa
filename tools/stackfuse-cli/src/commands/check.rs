//! Check that the external tools are installed.

use std::path::Path;

use stackfuse_common::config::AppConfig;
use stackfuse_fusion_engine::tools::command_exists;
use stackfuse_processing_core::alignment::default_pool_size;

pub fn run(config: &AppConfig, config_path: &Path) -> anyhow::Result<()> {
    println!("Stackfuse System Check");
    println!("{}", "=".repeat(50));

    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[OK] Config: defaults ({} not found)", config_path.display());
    }
    if let Err(e) = config.validate() {
        println!("[WARN] {e}");
    }

    let fusion = &config.fusion.binary;
    let fusion_ok = command_exists(fusion);
    if fusion_ok {
        println!("[OK] Fusion tool: {fusion}");
    } else {
        println!("[MISSING] Fusion tool: {fusion} (install enblend-enfuse)");
    }

    let aligner = &config.external_align.binary;
    if command_exists(aligner) {
        println!("[OK] External aligner: {aligner}");
    } else if config.external_align.enabled {
        println!("[MISSING] External aligner: {aligner} (install hugin-tools)");
    } else {
        println!("[INFO] External aligner: {aligner} not found (built-in aligner is used)");
    }

    let workers = config.alignment.pool_size.unwrap_or_else(default_pool_size);
    println!("[OK] Alignment workers: {workers}");

    println!();
    if fusion_ok {
        println!("All required tools are available. Stackfuse is ready.");
    } else {
        println!("The fusion tool is missing. Alignment and masking still work.");
    }

    Ok(())
}
