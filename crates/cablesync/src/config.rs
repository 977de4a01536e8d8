//! Flag overrides on top of `cablesync-config` profiles.
//!
//! Precedence: flag / `CABLESYNC_*` env var > profile > defaults.

use secrecy::SecretString;

use cablesync_config::{Config, Profile};
use cablesync_core::EngineConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The engine config to run with, plus the profile name it came from.
pub struct Resolved {
    pub profile: String,
    pub engine: EngineConfig,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build an `EngineConfig` from the config file, profile, and CLI overrides.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = cablesync_config::load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        // An explicitly named profile must exist.
        None if global.profile.is_some() => {
            let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            names.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if names.is_empty() {
                    "(none)".into()
                } else {
                    names.join(", ")
                },
            });
        }
        // No profile -- build from CLI flags / env vars alone
        None => {
            if global.server.is_none() {
                return Err(CliError::NoConfig {
                    path: cablesync_config::config_path().display().to_string(),
                });
            }
            Profile::default()
        }
    };

    apply_overrides(&mut profile, global);

    let mut engine =
        cablesync_config::profile_to_engine_config(&profile, &profile_name, &cfg.defaults)?;
    if let Some(ref token) = global.token {
        engine.token = Some(SecretString::from(token.clone()));
    }

    Ok(Resolved {
        profile: profile_name,
        engine,
    })
}

fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(ref server) = global.server {
        profile.server.clone_from(server);
    }
    if global.api_url.is_some() {
        profile.api_url.clone_from(&global.api_url);
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if global.timeout.is_some() {
        profile.timeout = global.timeout;
    }
}
