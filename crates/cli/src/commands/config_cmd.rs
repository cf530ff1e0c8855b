//! `ctxloom config`: configuration commands.

use std::path::{Path, PathBuf};

use ctxloom_config::EngineConfig;

use super::load_config;

fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| EngineConfig::config_dir().join("config.toml"))
}

pub fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn default() {
    println!("{}", EngineConfig::default_toml());
}

pub fn path(path: Option<&Path>) {
    println!("{}", config_file(path).display());
}

pub fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let file = config_file(path);
    match load_config(path) {
        Ok(config) => {
            println!("{}: ok", file.display());
            println!("  model:          {}", config.default_model);
            println!("  max iterations: {}", config.function_call_max_iterations);
            println!("  known models:   {}", config.models.len());
            if !config.models.contains_key(&config.default_model) {
                println!(
                    "  warning: default model {} has no limits configured",
                    config.default_model
                );
            }
            Ok(())
        }
        Err(e) => {
            println!("{}: {e}", file.display());
            Err(e.into())
        }
    }
}
