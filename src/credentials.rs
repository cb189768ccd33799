use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{DispatchError, Result};

/// Credentials file structure
///
/// Format:
/// ```toml
/// [sftp.profile_name]
/// password = "your_sftp_password_here"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Credentials {
    #[serde(default)]
    pub sftp: HashMap<String, CredentialProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialProfile {
    pub password: String,
}

/// Default credentials file path: ~/.config/transcribe_dispatch/credentials.toml
pub fn get_credentials_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| DispatchError::Config {
        message: "HOME environment variable not set".to_string(),
    })?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("transcribe_dispatch")
        .join("credentials.toml"))
}

/// Load credentials from the default location
/// Returns None if the file doesn't exist
pub fn load_credentials() -> Result<Option<Credentials>> {
    let creds_path = get_credentials_path()?;

    if !creds_path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&creds_path)?;
    let credentials: Credentials = toml::from_str(&content)?;

    Ok(Some(credentials))
}

/// Get the SFTP password for a profile
pub fn get_sftp_password(credentials: &Option<Credentials>, profile: &str) -> Result<String> {
    match credentials {
        Some(creds) => creds
            .sftp
            .get(profile)
            .map(|p| p.password.clone())
            .ok_or_else(|| DispatchError::Config {
                message: format!(
                    "Credential profile '[sftp.{}]' not found in credentials file",
                    profile
                ),
            }),
        None => Err(DispatchError::Config {
            message: match get_credentials_path() {
                Ok(path) => format!("Credentials file not found. Expected at: {}", path.display()),
                Err(_) => "Credentials file not found".to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_lookup() {
        let creds: Credentials = toml::from_str("[sftp.archive]\npassword = \"hunter2\"\n").unwrap();
        let creds = Some(creds);
        assert_eq!(get_sftp_password(&creds, "archive").unwrap(), "hunter2");

        let err = get_sftp_password(&creds, "other").unwrap_err();
        assert!(err.to_string().contains("[sftp.other]"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = get_sftp_password(&None, "archive").unwrap_err();
        assert!(matches!(err, DispatchError::Config { .. }));
    }
}
