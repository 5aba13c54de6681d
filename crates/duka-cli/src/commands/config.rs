use crate::cli::ConfigCommands;
use crate::commands::common::{resolve_client_config, GlobalArgs};
use crate::config_profiles::{normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, globals: &GlobalArgs) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            api_base_url,
            sync_interval_secs,
            request_timeout_secs,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(globals.profile.as_deref()),
            api_base_url,
            sync_interval_secs,
            request_timeout_secs,
            no_activate,
        ),
        ConfigCommands::Show { profile } => {
            let globals = GlobalArgs {
                profile: profile.or_else(|| globals.profile.clone()),
                ..globals.clone()
            };
            let config = resolve_client_config(&globals)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if config.api_token.is_some() {
                println!("(API token configured)");
            }
            Ok(())
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn run_config_init(
    profile_name: Option<&str>,
    api_base_url: Option<String>,
    sync_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let api_base_url = normalize_api_base_url(api_base_url)?;
    for (field, value) in [
        ("sync interval", sync_interval_secs),
        ("request timeout", request_timeout_secs),
    ] {
        if value == Some(0) {
            return Err(CliError::Config(format!("{field} must be greater than zero")));
        }
    }

    let profile = config.profile_mut_or_default(&profile_name);
    if api_base_url.is_some() {
        profile.api_base_url = api_base_url;
    }
    if sync_interval_secs.is_some() {
        profile.sync_interval_secs = sync_interval_secs;
    }
    if request_timeout_secs.is_some() {
        profile.request_timeout_secs = request_timeout_secs;
    }
    if profile.api_base_url.is_none() {
        println!("Profile '{profile_name}' has no API base URL; writes will only be queued locally.");
    }

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }
    let path = config.save().map_err(CliError::Config)?;
    println!("Saved profile '{profile_name}' to {}", path.display());
    Ok(())
}

pub fn normalize_api_base_url(value: Option<String>) -> Result<Option<String>, CliError> {
    let Some(url) = normalize_text_option(value) else {
        return Ok(None);
    };
    if !duka_core::util::is_http_url(&url) {
        return Err(CliError::Config(
            "API base URL must start with http:// or https://".to_string(),
        ));
    }
    Ok(Some(url.trim_end_matches('/').to_string()))
}
