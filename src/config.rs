// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CallError, Result};
use crate::media::Facing;
use crate::peer::negotiation::GlarePolicy;
use crate::peer::state::DEFAULT_STUN_URLS;
use crate::peer::types::ServerConfig;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_STUN_URLS
        .iter()
        .enumerate()
        .map(|(i, url)| ServerConfig::stun(format!("default-stun-{}", i), *url))
        .collect()
}

fn default_audio() -> bool {
    true
}

/// Настройки одного клиента звонка
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub default_facing: Facing,
    #[serde(default = "default_audio")]
    pub audio: bool,
    /// Ends an unanswered call after this many seconds; `None` waits forever
    pub calling_timeout_secs: Option<u64>,
    pub signaling_url: Option<String>,
    pub glare_policy: GlarePolicy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            default_facing: Facing::default(),
            audio: default_audio(),
            calling_timeout_secs: None,
            signaling_url: None,
            glare_policy: GlarePolicy::default(),
        }
    }
}

impl CallConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(CallError::Config(format!(
                    "ICE server '{}' has an empty URL",
                    server.id
                )));
            }
            if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
                return Err(CallError::Config(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        if let Some(url) = &self.signaling_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(CallError::Config(format!(
                    "Signaling URL must be ws:// or wss://, got '{}'",
                    url
                )));
            }
        }
        if self.calling_timeout_secs == Some(0) {
            return Err(CallError::Config("Calling timeout must be positive".into()));
        }
        Ok(())
    }
}
