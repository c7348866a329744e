//! Device configuration loaded from TOML
//!
//! ```toml
//! org = "a1b2c3"
//! type = "gateway"
//! id = "dev-01"
//! auth-method = "token"
//! auth-token = "secret"
//! request-timeout-secs = 120
//!
//! [actions]
//! accept = ["reboot", "firmware_download"]
//! ```

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = "managed-device";
const CONFIG_FILE: &str = "device.toml";
const QUICKSTART_ORG_ID: &str = "quickstart";
const TOKEN_AUTH: &str = "token";
// rumqttc refuses shorter keep-alive intervals
const MIN_KEEP_ALIVE_SECS: u64 = 5;
pub const TOKEN_AUTH_USERNAME: &str = "use-token-auth";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceConfig {
    pub org: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(rename = "id")]
    pub device_id: String,
    pub auth_method: String,
    pub auth_token: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Overrides `<org>.messaging.<domain>`
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_tls")]
    pub tls: bool,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Drop pending requests that see no response within this many seconds
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub actions: ActionPolicy,
}

/// Which controller-initiated actions the device agrees to perform
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ActionPolicy {
    #[serde(default)]
    pub accept: Vec<String>,
}

impl ActionPolicy {
    pub fn accepts(&self, action: &str) -> bool {
        self.accept.iter().any(|a| a == action)
    }
}

fn default_domain() -> String {
    "internetofthings.ibmcloud.com".to_string()
}

fn default_tls() -> bool {
    true
}

fn default_keep_alive() -> u64 {
    60
}

fn default_capacity() -> usize {
    100
}

impl DeviceConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        info!("Loading device configuration from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DeviceConfig =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse device config: {}", e))?;
        config.validate()?;
        debug!("Parsed configuration for {}", config.client_id());
        Ok(config)
    }

    /// `<config dir>/managed-device/device.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn validate(&self) -> Result<()> {
        if self.org == QUICKSTART_ORG_ID {
            return Err(eyre!("cannot use quickstart for a managed device"));
        }
        for (name, value) in [
            ("org", &self.org),
            ("type", &self.device_type),
            ("id", &self.device_id),
            ("auth-token", &self.auth_token),
        ] {
            if value.trim().is_empty() {
                return Err(eyre!("config must contain {}", name));
            }
        }
        if self.auth_method != TOKEN_AUTH {
            return Err(eyre!("unsupported authentication method {}", self.auth_method));
        }
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(eyre!(
                "keep-alive-secs must be at least {}",
                MIN_KEEP_ALIVE_SECS
            ));
        }
        if self.channel_capacity == 0 {
            return Err(eyre!("channel-capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn client_id(&self) -> String {
        format!("d:{}:{}:{}", self.org, self.device_type, self.device_id)
    }

    pub fn host(&self) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| format!("{}.messaging.{}", self.org, self.domain))
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.tls { 8883 } else { 1883 })
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        org = "a1b2c3"
        type = "gateway"
        id = "dev-01"
        auth-method = "token"
        auth-token = "secret"
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = DeviceConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.client_id(), "d:a1b2c3:gateway:dev-01");
        assert_eq!(config.host(), "a1b2c3.messaging.internetofthings.ibmcloud.com");
        assert_eq!(config.port(), 8883);
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.request_timeout(), None);
        assert!(!config.actions.accepts("reboot"));
    }

    #[test]
    fn test_overrides_and_actions() {
        let content = format!(
            "{}\nhost = \"localhost\"\ntls = false\nrequest-timeout-secs = 30\n[actions]\naccept = [\"reboot\"]\n",
            MINIMAL
        );
        let config = DeviceConfig::from_toml_str(&content).unwrap();

        assert_eq!(config.host(), "localhost");
        assert_eq!(config.port(), 1883);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert!(config.actions.accepts("reboot"));
        assert!(!config.actions.accepts("factory_reset"));
    }

    #[test]
    fn test_quickstart_is_rejected() {
        let content = MINIMAL.replace("a1b2c3", "quickstart");
        assert!(DeviceConfig::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_unsupported_auth_method_is_rejected() {
        let content = MINIMAL.replace("\"token\"", "\"certificate\"");
        assert!(DeviceConfig::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_short_keep_alive_is_rejected() {
        let content = format!("{}keep-alive-secs = 2\n", MINIMAL);
        assert!(DeviceConfig::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let content = MINIMAL.replace("id = \"dev-01\"", "");
        assert!(DeviceConfig::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_default_path_ends_with_file() {
        assert!(DeviceConfig::default_path().ends_with("managed-device/device.toml"));
    }
}
