//! Runtime configuration
//!
//! Settings load from `Settings.toml` (or an explicit path), then
//! environment variables override individual fields. Every section has
//! working defaults so a bare `StepupSettings::default()` is usable in
//! tests.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepupSettings {
    #[serde(default)]
    pub password: PasswordSettings,
    #[serde(default)]
    pub totp: TotpSettings,
    #[serde(default)]
    pub backup_codes: BackupCodeSettings,
    #[serde(default)]
    pub webauthn: WebAuthnSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordSettings {
    /// PBKDF2 iteration count for newly hashed passwords
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotpSettings {
    /// Issuer shown in authenticator apps
    pub issuer: String,
    /// Accepted clock drift, in 30-second steps either side of now
    pub drift_steps: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCodeSettings {
    pub count: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAuthnSettings {
    pub rp_id: String,     // Domain name (e.g., "example.com")
    pub rp_name: String,   // Display name shown by the client
    pub rp_origin: String, // Full origin, https:// except localhost
    /// Ceremony validity window in seconds
    pub timeout_seconds: u64,
    pub user_verification: String, // "required", "preferred", "discouraged"
    pub authenticator_attachment: Option<String>, // "platform", "cross-platform"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            iterations: 600_000,
        }
    }
}

impl Default for TotpSettings {
    fn default() -> Self {
        Self {
            issuer: "Stepup".to_string(),
            drift_steps: 1,
        }
    }
}

impl Default for BackupCodeSettings {
    fn default() -> Self {
        Self {
            count: 10,
            length: 10,
        }
    }
}

impl Default for WebAuthnSettings {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "Stepup".to_string(),
            rp_origin: "http://localhost:8080".to_string(),
            timeout_seconds: 120,
            user_verification: "preferred".to_string(),
            authenticator_attachment: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl StepupSettings {
    /// Load settings from `Settings.toml` in the current directory (if
    /// present) and apply environment variable overrides.
    ///
    /// # Errors
    /// Returns an error if the settings file cannot be read or parsed.
    pub fn load() -> Result<Self, AuthError> {
        let mut settings = if Path::new("Settings.toml").exists() {
            Self::from_file("Settings.toml")?
        } else {
            Self::default()
        };
        Self::apply_env_overrides(&mut settings);
        Ok(settings)
    }

    /// Load settings from an explicit TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            AuthError::Configuration(format!(
                "cannot read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        basic_toml::from_str(&content)
            .map_err(|e| AuthError::Configuration(format!("invalid settings: {e}")))
    }

    /// Initialize logging from the configured level. Safe to call more
    /// than once; later calls are no-ops.
    pub fn initialize_logging(&self) {
        let _ = env_logger::Builder::new()
            .parse_filters(&self.logging.level)
            .try_init();
    }

    fn apply_env_overrides(settings: &mut Self) {
        Self::apply_numeric_env_override(
            "STEPUP_PASSWORD_ITERATIONS",
            &mut settings.password.iterations,
        );
        if let Ok(issuer) = std::env::var("STEPUP_TOTP_ISSUER") {
            settings.totp.issuer = issuer;
        }
        Self::apply_numeric_env_override("STEPUP_TOTP_DRIFT_STEPS", &mut settings.totp.drift_steps);
        Self::apply_numeric_env_override("STEPUP_BACKUP_CODE_COUNT", &mut settings.backup_codes.count);
        Self::apply_numeric_env_override(
            "STEPUP_BACKUP_CODE_LENGTH",
            &mut settings.backup_codes.length,
        );
        if let Ok(rp_id) = std::env::var("STEPUP_WEBAUTHN_RP_ID") {
            settings.webauthn.rp_id = rp_id;
        }
        if let Ok(rp_name) = std::env::var("STEPUP_WEBAUTHN_RP_NAME") {
            settings.webauthn.rp_name = rp_name;
        }
        if let Ok(rp_origin) = std::env::var("STEPUP_WEBAUTHN_RP_ORIGIN") {
            settings.webauthn.rp_origin = rp_origin;
        }
        Self::apply_numeric_env_override(
            "STEPUP_WEBAUTHN_TIMEOUT_SECONDS",
            &mut settings.webauthn.timeout_seconds,
        );
        if let Ok(user_verification) = std::env::var("STEPUP_WEBAUTHN_USER_VERIFICATION") {
            settings.webauthn.user_verification = user_verification;
        }
        if let Ok(attachment) = std::env::var("STEPUP_WEBAUTHN_AUTHENTICATOR_ATTACHMENT") {
            settings.webauthn.authenticator_attachment = if attachment.is_empty() {
                None
            } else {
                Some(attachment)
            };
        }
        if let Ok(level) = std::env::var("STEPUP_LOG_LEVEL") {
            settings.logging.level = level;
        }
    }

    fn apply_numeric_env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
        if let Ok(raw) = std::env::var(var) {
            if let Ok(parsed) = raw.parse::<T>() {
                *target = parsed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = StepupSettings::default();
        assert_eq!(settings.password.iterations, 600_000);
        assert_eq!(settings.totp.drift_steps, 1);
        assert_eq!(settings.backup_codes.count, 10);
        assert_eq!(settings.backup_codes.length, 10);
        assert_eq!(settings.webauthn.timeout_seconds, 120);
        assert_eq!(settings.webauthn.user_verification, "preferred");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[totp]
issuer = "Acme"
drift_steps = 2

[webauthn]
rp_id = "acme.example"
rp_name = "Acme"
rp_origin = "https://acme.example"
timeout_seconds = 60
user_verification = "required"
"#
        )
        .unwrap();

        let settings = StepupSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.totp.issuer, "Acme");
        assert_eq!(settings.totp.drift_steps, 2);
        assert_eq!(settings.webauthn.rp_id, "acme.example");
        assert_eq!(settings.webauthn.timeout_seconds, 60);
        // Untouched sections keep defaults.
        assert_eq!(settings.password.iterations, 600_000);
        assert_eq!(settings.backup_codes.count, 10);
    }

    #[test]
    fn test_from_file_errors() {
        assert!(StepupSettings::from_file("/nonexistent/Settings.toml").is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not [valid toml").unwrap();
        assert!(StepupSettings::from_file(file.path()).is_err());
    }
}
