//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::Result;

/// Run the config command.
pub fn run_config(action: &ConfigAction, settings: Settings) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Path => {
            println!("{}", Settings::default_config_path().display());
        }

        ConfigAction::Init => {
            let path = Settings::default_config_path();
            if path.exists() {
                Output::warning(&format!("Config already exists at {}", path.display()));
                Output::info("Edit it directly, or delete it first to start over.");
            } else {
                settings.save()?;
                Output::success(&format!("Wrote default config to {}", path.display()));
            }
        }
    }

    Ok(())
}
