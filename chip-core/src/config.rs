use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{ChipError, CoreResult};

pub const ENV_ENDPOINT_URL: &str = "CHIP_ENDPOINT_URL";
pub const ENV_AUTH_TOKEN: &str = "CHIP_AUTH_TOKEN";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointCfg {
    /// Full URL of the chat proxy function.
    pub url: String,
    /// Name of the environment variable that contains the bearer token.
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
}

fn default_auth_token_env() -> String {
    ENV_AUTH_TOKEN.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds, covering the whole stream (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ChatCfg {
    /// Overrides the built-in greeting that seeds each transcript.
    #[serde(default)]
    pub welcome_text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub endpoint: EndpointCfg,
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub chat: ChatCfg,
}

/// Resolved endpoint settings handed to the transport. Built once per
/// session and never mutated.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub endpoint_url: String,
    pub auth_token: SecretString,
}

impl EndpointConfig {
    pub fn new(endpoint_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        let token: String = auth_token.into();
        Self {
            endpoint_url: endpoint_url.into(),
            auth_token: SecretString::from(token),
        }
    }
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(ChipError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| ChipError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| ChipError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| ChipError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| ChipError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| ChipError::Other(e.into())))?,
        };
        Ok(cfg)
    }

    /// Build a Config from `CHIP_ENDPOINT_URL`; the token is read from
    /// `CHIP_AUTH_TOKEN` when `endpoint()` resolves it.
    pub fn from_env() -> CoreResult<Self> {
        let url = std::env::var(ENV_ENDPOINT_URL)
            .map_err(|_| ChipError::Validation(format!("{ENV_ENDPOINT_URL} is not set")))?;
        Ok(Self {
            endpoint: EndpointCfg {
                url,
                auth_token_env: default_auth_token_env(),
            },
            http: HttpCfg::default(),
            chat: ChatCfg::default(),
        })
    }

    /// Resolve the bearer token from the configured environment variable.
    pub fn endpoint(&self) -> CoreResult<EndpointConfig> {
        if self.endpoint.url.trim().is_empty() {
            return Err(ChipError::Validation("endpoint url is empty".into()));
        }
        let token = std::env::var(&self.endpoint.auth_token_env).map_err(|_| {
            ChipError::Validation(format!(
                "auth token variable {} is not set",
                self.endpoint.auth_token_env
            ))
        })?;
        Ok(EndpointConfig::new(self.endpoint.url.clone(), token))
    }

    pub fn welcome_text(&self) -> &str {
        self.chat
            .welcome_text
            .as_deref()
            .unwrap_or(crate::model::WELCOME_TEXT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("chip.json");
        let json = r#"{
          "endpoint": {"url":"https://proj.example.co/functions/v1/chip-assistant","auth_token_env":"CHIP_TEST_TOKEN"},
          "chat": {"welcome_text": "Hello"}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.endpoint.auth_token_env, "CHIP_TEST_TOKEN");
        assert_eq!(cfg.welcome_text(), "Hello");
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, 60_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, None);
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("chip.toml");
        let toml = r#"
[endpoint]
url = "http://localhost:54321/functions/v1/chip-assistant"

[http]
request_timeout_ms = 15000
pool_max_idle_per_host = 2
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.endpoint.auth_token_env, ENV_AUTH_TOKEN);
        assert_eq!(cfg.http.request_timeout_ms, 15_000);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, Some(2));
        assert_eq!(cfg.welcome_text(), crate::model::WELCOME_TEXT);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/chip-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            ChipError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        assert!(matches!(err, ChipError::Other(_)));
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(&file, r#"{ "endpoint": { "url": 123 }"#).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        assert!(matches!(err, ChipError::Other(_)));
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("chip.conf");
        fs::write(&json_path, r#"{"endpoint":{"url":"http://a"}}"#).unwrap();
        assert_eq!(Config::from_path(&json_path).unwrap().endpoint.url, "http://a");

        let toml_path = dir.path().join("chip2.conf");
        fs::write(&toml_path, "[endpoint]\nurl = \"http://b\"\n").unwrap();
        assert_eq!(Config::from_path(&toml_path).unwrap().endpoint.url, "http://b");
    }

    #[test]
    fn endpoint_resolves_token_from_env() {
        let cfg = Config {
            endpoint: EndpointCfg {
                url: "http://localhost/chat".into(),
                auth_token_env: "CHIP_CONFIG_TEST_TOKEN_PRESENT".into(),
            },
            http: HttpCfg::default(),
            chat: ChatCfg::default(),
        };
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("CHIP_CONFIG_TEST_TOKEN_PRESENT", "anon-key") };
        let ep = cfg.endpoint().unwrap();
        assert_eq!(ep.endpoint_url, "http://localhost/chat");
        assert_eq!(ep.auth_token.expose_secret(), "anon-key");
    }

    #[test]
    fn endpoint_without_token_is_validation_error() {
        let cfg = Config {
            endpoint: EndpointCfg {
                url: "http://localhost/chat".into(),
                auth_token_env: "CHIP_CONFIG_TEST_TOKEN_ABSENT".into(),
            },
            http: HttpCfg::default(),
            chat: ChatCfg::default(),
        };
        assert!(matches!(cfg.endpoint(), Err(ChipError::Validation(_))));
    }
}
