use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use pepper_core::settings::{DEFAULT_INSTRUCTIONS, SessionSettings, VadSettings};
use pepper_realtime::{Endpoint, Provider};
use secrecy::SecretString;
use tracing::{Level, warn};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub api_key: SecretString,
    pub model: String,
    pub voice: String,
    pub temperature: f32,
    pub speech_speed: f32,
    pub prompts_path: PathBuf,
    /// `None` enables every registered tool.
    pub enabled_tools: Option<Vec<String>>,
    pub vad: VadSettings,
    pub transcription_model: String,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn require(name: &str, context: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(format!("{} must be set {}", name, context))),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let provider_str = var_or("REALTIME_PROVIDER", "openai");
        let (provider, api_key) = match provider_str.to_lowercase().as_str() {
            "openai" => (
                Provider::OpenAi,
                require("OPENAI_API_KEY", "for the 'openai' provider")?,
            ),
            "azure" => (
                Provider::Azure {
                    endpoint: require("AZURE_OPENAI_ENDPOINT", "for the 'azure' provider")?,
                },
                require("AZURE_OPENAI_KEY", "for the 'azure' provider")?,
            ),
            "custom" => (
                Provider::Custom {
                    url: require("REALTIME_URL", "for the 'custom' provider")?,
                },
                std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            ),
            other => {
                return Err(ConfigError::InvalidValue(
                    "REALTIME_PROVIDER".to_string(),
                    format!("'{}' is not one of openai, azure, custom", other),
                ));
            }
        };

        let model = var_or("REALTIME_MODEL", "gpt-4o-realtime-preview");
        let voice = var_or("VOICE", "alloy");

        let temperature = parse_var("TEMPERATURE", 0.8_f32)?;
        if !(0.6..=1.2).contains(&temperature) {
            return Err(ConfigError::InvalidValue(
                "TEMPERATURE".to_string(),
                format!("{} is outside 0.6..=1.2", temperature),
            ));
        }
        let speech_speed = parse_var("SPEECH_SPEED", 1.0_f32)?;
        if !(0.25..=1.5).contains(&speech_speed) {
            return Err(ConfigError::InvalidValue(
                "SPEECH_SPEED".to_string(),
                format!("{} is outside 0.25..=1.5", speech_speed),
            ));
        }

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let enabled_tools = std::env::var("ENABLED_TOOLS").ok().and_then(|raw| {
            let names: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
            (!names.is_empty()).then_some(names)
        });

        let defaults = VadSettings::default();
        let vad = VadSettings {
            threshold: parse_var("VAD_THRESHOLD", defaults.threshold)?,
            prefix_padding_ms: parse_var("VAD_PREFIX_PADDING_MS", defaults.prefix_padding_ms)?,
            silence_duration_ms: parse_var(
                "VAD_SILENCE_DURATION_MS",
                defaults.silence_duration_ms,
            )?,
        };
        let transcription_model = var_or("TRANSCRIPTION_MODEL", "whisper-1");

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            provider,
            api_key: SecretString::from(api_key),
            model,
            voice,
            temperature,
            speech_speed,
            prompts_path,
            enabled_tools,
            vad,
            transcription_model,
            log_level,
        })
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.provider.clone(), self.model.clone(), self.api_key.clone())
    }

    /// The negotiated session configuration for every new session.
    pub fn session_settings(&self, instructions: String) -> SessionSettings {
        SessionSettings {
            voice: self.voice.clone(),
            temperature: self.temperature,
            speed: self.speech_speed,
            instructions,
            enabled_tools: self.enabled_tools.clone(),
            vad: self.vad.clone(),
            transcription_model: self.transcription_model.clone(),
            transcription_language: None,
        }
    }
}

/// Loads every `*.md` file in `prompts_path`, keyed by file stem.
pub fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = std::fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

/// `system_prompt.md` from the prompts directory, or the built-in prompt.
pub fn load_instructions(prompts_path: &Path) -> String {
    match load_prompts(prompts_path) {
        Ok(mut prompts) => prompts
            .remove("system_prompt")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
        Err(e) => {
            warn!(path = %prompts_path.display(), error = %e, "Prompts not readable, using built-in prompt");
            DEFAULT_INSTRUCTIONS.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "BIND_ADDRESS",
        "REALTIME_PROVIDER",
        "OPENAI_API_KEY",
        "AZURE_OPENAI_KEY",
        "AZURE_OPENAI_ENDPOINT",
        "REALTIME_URL",
        "REALTIME_MODEL",
        "VOICE",
        "TEMPERATURE",
        "SPEECH_SPEED",
        "PROMPTS_PATH",
        "ENABLED_TOOLS",
        "VAD_THRESHOLD",
        "VAD_PREFIX_PADDING_MS",
        "VAD_SILENCE_DURATION_MS",
        "TRANSCRIPTION_MODEL",
        "RUST_LOG",
    ];

    fn clear_env_vars() {
        unsafe {
            for var in VARS {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env_openai() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env_vars();
        set_minimal_env_openai();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.api_key.expose_secret(), "test-openai-key");
        assert_eq!(config.model, "gpt-4o-realtime-preview");
        assert_eq!(config.voice, "alloy");
        assert_eq!(config.temperature, 0.8);
        assert_eq!(config.speech_speed, 1.0);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
        assert_eq!(config.enabled_tools, None);
        assert_eq!(config.vad, VadSettings::default());
        assert_eq!(config.transcription_model, "whisper-1");
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("OPENAI_API_KEY", "custom-openai-key");
            env::set_var("REALTIME_MODEL", "gpt-realtime");
            env::set_var("VOICE", "verse");
            env::set_var("TEMPERATURE", "1.1");
            env::set_var("ENABLED_TOOLS", "move_pepper, get_current_datetime,");
            env::set_var("VAD_SILENCE_DURATION_MS", "800");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.model, "gpt-realtime");
        assert_eq!(config.voice, "verse");
        assert_eq!(config.temperature, 1.1);
        assert_eq!(
            config.enabled_tools,
            Some(vec!["move_pepper".to_string(), "get_current_datetime".to_string()])
        );
        assert_eq!(config.vad.silence_duration_ms, 800);
        assert_eq!(config.log_level, Level::DEBUG);

        let settings = config.session_settings("Be brief.".into());
        assert_eq!(settings.voice, "verse");
        assert_eq!(settings.instructions, "Be brief.");
        assert_eq!(settings.vad.silence_duration_ms, 800);
    }

    #[test]
    #[serial]
    fn test_config_azure_provider() {
        clear_env_vars();
        unsafe {
            env::set_var("REALTIME_PROVIDER", "azure");
            env::set_var("AZURE_OPENAI_ENDPOINT", "my-resource.openai.azure.com");
            env::set_var("AZURE_OPENAI_KEY", "azure-key");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert_eq!(
            config.provider,
            Provider::Azure {
                endpoint: "my-resource.openai.azure.com".into()
            }
        );
        assert!(
            config
                .endpoint()
                .url()
                .starts_with("wss://my-resource.openai.azure.com/openai/realtime?")
        );
    }

    #[test]
    #[serial]
    fn test_config_missing_keys() {
        clear_env_vars();
        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }

        unsafe {
            env::set_var("REALTIME_PROVIDER", "azure");
            env::set_var("AZURE_OPENAI_ENDPOINT", "my-resource.openai.azure.com");
        }
        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("AZURE_OPENAI_KEY")),
            _ => panic!("Expected MissingVar for AZURE_OPENAI_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("TEMPERATURE", "hot");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "TEMPERATURE"),
            _ => panic!("Expected InvalidValue for TEMPERATURE"),
        }

        unsafe {
            env::set_var("TEMPERATURE", "2.0");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "TEMPERATURE"),
            _ => panic!("Expected InvalidValue for TEMPERATURE"),
        }

        unsafe {
            env::remove_var("TEMPERATURE");
            env::set_var("VAD_PREFIX_PADDING_MS", "-5");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "VAD_PREFIX_PADDING_MS"),
            _ => panic!("Expected InvalidValue for VAD_PREFIX_PADDING_MS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_provider_and_log_level() {
        clear_env_vars();
        set_minimal_env_openai();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }

        unsafe {
            env::remove_var("RUST_LOG");
            env::set_var("REALTIME_PROVIDER", "gemini");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "REALTIME_PROVIDER"),
            _ => panic!("Expected InvalidValue for REALTIME_PROVIDER"),
        }
    }

    #[test]
    fn test_load_instructions() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_instructions(dir.path()), DEFAULT_INSTRUCTIONS);

        std::fs::write(dir.path().join("system_prompt.md"), "You are a test robot.\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        assert_eq!(load_instructions(dir.path()), "You are a test robot.");

        assert_eq!(
            load_instructions(&dir.path().join("missing")),
            DEFAULT_INSTRUCTIONS
        );
    }
}
