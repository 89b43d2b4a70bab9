//! Config subcommand handlers.

use jararaca_config::{Config, ConfigError, save_config};

use super::{config_file, effective_config};
use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(
    args: ConfigArgs,
    loaded: Result<Config, ConfigError>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let config = effective_config(loaded?, global)?;
            let rendered = toml::to_string_pretty(&config).map_err(ConfigError::from)?;
            output::print_output(rendered.trim_end())?;
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config_file(global).display().to_string())?;
            Ok(())
        }

        ConfigCommand::Init {
            base_url,
            websocket_url,
            force,
        } => {
            let path = config_file(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let mut config = Config::default();
            config.api.base_url = base_url.or_else(|| global.base_url.clone());
            config.websocket.url = websocket_url;
            config.validate()?;

            save_config(&config, &path)?;
            eprintln!("Wrote {}", path.display());
            Ok(())
        }
    }
}
