//! Config command - configuration management

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use x0t_core::config::{Config, Profile};

const CONFIG_FILE_NAMES: [&str; 2] = ["x0t.toml", "config.toml"];

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Config file to show (default: the loaded one)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Show a preset instead
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Generate a configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "x0t.toml")]
        output: PathBuf,

        /// Profile to use as base
        #[arg(short, long, default_value = "balanced")]
        profile: String,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate
        file: PathBuf,
    },

    /// List profiles
    Profiles,

    /// Show config file locations
    Paths,
}

/// Execute config command
pub fn execute(args: ConfigArgs, loaded: &Config) -> Result<()> {
    match args.action {
        ConfigAction::Show { file, profile } => show_config(loaded, file, profile),
        ConfigAction::Generate { output, profile } => generate_config(&output, &profile),
        ConfigAction::Validate { file } => validate_config(&file),
        ConfigAction::Profiles => {
            for profile in Profile::all() {
                println!("{:<10} {}", profile.name(), profile.description());
            }
            Ok(())
        }
        ConfigAction::Paths => {
            show_paths();
            Ok(())
        }
    }
}

/// Explicit path, else the first file found on the search path, else defaults
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match find_config_file() {
            Some(path) => path,
            None => return Ok(Config::from_profile(Profile::Balanced)),
        },
    };
    debug!(path = %path.display(), "Loading configuration");
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn show_config(loaded: &Config, file: Option<PathBuf>, profile: Option<String>) -> Result<()> {
    let config = if let Some(path) = file {
        Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else if let Some(profile_name) = profile {
        let profile = Profile::from_name(&profile_name)
            .with_context(|| format!("Unknown profile: {profile_name}"))?;
        Config::from_profile(profile)
    } else {
        loaded.clone()
    };

    let toml_str = config.to_toml().context("Failed to serialize config")?;
    println!("{toml_str}");
    Ok(())
}

fn generate_config(output: &Path, profile_name: &str) -> Result<()> {
    let profile = Profile::from_name(profile_name)
        .with_context(|| format!("Unknown profile: {profile_name}"))?;

    let config = Config::from_profile(profile);
    let toml_str = config.to_toml().context("Failed to serialize config")?;

    let content = format!(
        "# x0t configuration\n\
         # Generated from profile: {profile_name}\n\
         # The master key is read from the variable named in codec.master_key_env\n\n\
         {toml_str}"
    );

    std::fs::write(output, content)
        .with_context(|| format!("Failed to write config to {}", output.display()))?;

    info!("Generated config file: {}", output.display());
    println!("Configuration file generated: {}", output.display());
    Ok(())
}

fn validate_config(file: &Path) -> Result<()> {
    let config = Config::load(file)
        .with_context(|| format!("Failed to load config from {}", file.display()))?;

    config.validate().context("Configuration validation failed")?;

    println!("✓ Configuration is valid");
    match config.profile {
        Some(profile) => println!("  Profile: {profile}"),
        None => println!("  Profile: none"),
    }
    println!("  Layers: {:?}", config.obfuscation.enabled_layers);
    println!("  Transport: {}", config.transport.kind);
    println!(
        "  Evolution: population {}, {} generations",
        config.evolution.population_size, config.evolution.generations
    );
    Ok(())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "x0t")
}

fn show_paths() {
    println!("Configuration file search paths:");
    println!();
    for (i, name) in CONFIG_FILE_NAMES.iter().enumerate() {
        println!("  {}. ./{name}", i + 1);
    }
    if let Some(dirs) = project_dirs() {
        println!(
            "  {}. {}",
            CONFIG_FILE_NAMES.len() + 1,
            dirs.config_dir().join("config.toml").display()
        );
    }
    println!();
    println!("Override with -c/--config or X0T_CONFIG.");
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .or_else(|| {
            project_dirs()
                .map(|dirs| dirs.config_dir().join("config.toml"))
                .filter(|path| path.exists())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x0t.toml");

        generate_config(&path, "paranoid").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.profile, Some(Profile::Paranoid));
        assert_eq!(config.obfuscation.enabled_layers.len(), 6);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[evolution]\npopulation_size = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_generate_unknown_profile() {
        let dir = tempfile::tempdir().unwrap();
        assert!(generate_config(&dir.path().join("x.toml"), "turbo").is_err());
    }
}
