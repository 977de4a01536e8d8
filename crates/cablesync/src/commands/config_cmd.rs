//! Config subcommand handlers.

use tabled::Tabled;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::active_profile_name;
use crate::error::CliError;
use crate::output;

#[derive(Clone, Tabled, serde::Serialize)]
struct ProfileRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Server")]
    server: String,
    #[tabled(rename = "API URL")]
    api_url: String,
    #[tabled(rename = "Default")]
    #[serde(rename = "default")]
    is_default: String,
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(
                &cablesync_config::config_path().display().to_string(),
                global.quiet,
            );
            Ok(())
        }

        // Renders defaults when no config file exists.
        ConfigCommand::Show => {
            let cfg = cablesync_config::load_config_or_default();
            output::print_output(&cfg.to_redacted_toml()?, global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = cablesync_config::load_config_or_default();
            let active = active_profile_name(global, &cfg);
            let mut rows: Vec<ProfileRow> = cfg
                .profiles
                .iter()
                .map(|(name, p)| ProfileRow {
                    name: name.clone(),
                    server: p.server.clone(),
                    api_url: p.api_url.clone().unwrap_or_else(|| "-".into()),
                    is_default: if *name == active { "*".into() } else { String::new() },
                })
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));

            let rendered = output::render_list(
                &global.output,
                &rows,
                ProfileRow::clone,
                |r| r.name.clone(),
            )?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}
