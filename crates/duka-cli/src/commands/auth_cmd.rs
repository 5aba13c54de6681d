use crate::auth::{mask_token, TokenStore};
use crate::cli::AuthCommands;
use crate::commands::common::read_piped_stdin;
use crate::config_profiles::{normalize_text_option, CliProfilesConfig};
use crate::error::CliError;

pub fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    match command {
        AuthCommands::Login { profile, token } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            if config.profile(&profile_name).is_none() {
                return Err(CliError::Config(format!(
                    "Profile '{profile_name}' is not configured. Run `duka config init --profile {profile_name}` first."
                )));
            }
            let token = match normalize_text_option(token) {
                Some(token) => token,
                None => read_piped_stdin()?
                    .ok_or_else(|| CliError::Auth("no token provided".to_string()))?,
            };
            TokenStore::new(&profile_name)
                .save(&token)
                .map_err(CliError::Auth)?;
            println!("Stored API token for profile '{profile_name}'");
            Ok(())
        }
        AuthCommands::Status { profile } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            match TokenStore::new(&profile_name).load().map_err(CliError::Auth)? {
                Some(token) => println!(
                    "Profile '{profile_name}' has an API token ({})",
                    mask_token(&token)
                ),
                None => println!("Profile '{profile_name}' has no stored API token."),
            }
            Ok(())
        }
        AuthCommands::Logout { profile } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            TokenStore::new(&profile_name)
                .clear()
                .map_err(CliError::Auth)?;
            println!("Removed API token for profile '{profile_name}'");
            Ok(())
        }
    }
}
