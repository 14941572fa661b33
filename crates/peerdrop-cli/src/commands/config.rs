//! Config command implementation.

use anyhow::{bail, Context, Result};

use peerdrop_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load().context("Failed to load configuration")?;
            let content =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", content);
        }
        ConfigAction::Path => println!("{}", Config::config_path().display()),
        ConfigAction::Init { force } => {
            let path = Config::config_path();
            if path.exists() && !force {
                bail!(
                    "{} already exists, use --force to overwrite it",
                    path.display()
                );
            }
            Config::default()
                .save_to(&path)
                .context("Failed to write configuration")?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
