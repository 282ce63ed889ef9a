use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LANGUAGE: &str = "python";

/// Interpreter used to define and run functions of the default language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            // Isolated mode: ignore PYTHON* env vars and the user site directory
            args: vec!["-I".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub use_mock: bool,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            model: default_model(),
            api_base_url: default_api_base_url(),
            use_mock: false,
            database_path: None,
            default_language: default_language(),
            interpreter: InterpreterConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment variables, or create default
    pub fn load() -> Result<Self> {
        let config = Self::load_from_file().unwrap_or_else(|_| {
            info!("No config file found, using defaults");
            Self::default()
        });

        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Applies environment overrides on top of a loaded config.
    ///
    /// `lookup` stands in for `std::env::var` so overrides can be resolved
    /// without touching the process environment.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup("OPENAI_API_KEY") {
            self.openai_api_key = Some(api_key);
        }

        if lookup("METAPROGRAMMER_USE_MOCK").is_some() {
            self.use_mock = true;
        }

        if let Some(path) = lookup("METAPROGRAMMER_DATABASE") {
            self.database_path = Some(PathBuf::from(path));
        }

        self
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            info!("Loaded config from: {}", config_path.display());
            Ok(config)
        } else {
            Err(anyhow!("Config file not found"))
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        info!("Saved config to: {}", config_path.display());
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::get_config_dir()?.join("config.toml"))
    }

    pub fn get_config_dir() -> Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".metaprogrammer"))
    }

    /// Set API key and save config
    pub fn set_api_key(&mut self, api_key: String) -> Result<()> {
        self.openai_api_key = Some(api_key);
        self.save()?;
        info!("API key saved to config file");
        Ok(())
    }

    pub fn get_api_key(&self) -> Option<&String> {
        self.openai_api_key.as_ref()
    }

    pub fn is_mock_mode(&self) -> bool {
        self.use_mock
    }

    /// Path of the SQLite catalog, falling back to the config directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::get_config_dir()?.join("functions.db")),
        }
    }

    pub fn show_config_info() -> Result<()> {
        let config_path = Self::get_config_path()?;
        println!("Configuration file: {}", config_path.display());

        if config_path.exists() {
            println!("Status: Found");
            let config = Self::load_from_file()?;
            println!("API Key: {}", if config.openai_api_key.is_some() { "Set" } else { "Not set" });
            println!("Model: {}", config.model);
            println!("Mock mode: {}", config.use_mock);
            println!("Database: {}", config.database_path()?.display());
            println!(
                "Interpreter: {} {}",
                config.interpreter.program,
                config.interpreter.args.join(" ")
            );
        } else {
            println!("Status: Not found (using defaults)");
        }

        println!("\nTo set API key:");
        println!("  metaprog --set-api-key <your-key>");
        println!("\nOr set environment variable:");
        println!("  export OPENAI_API_KEY=<your-key>");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_target_python() {
        let config = Config::default();
        assert_eq!(config.default_language, "python");
        assert_eq!(config.interpreter.program, "python3");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(!config.is_mock_mode());
    }

    #[test]
    fn test_env_overrides_api_key_mock_and_database() {
        let config = Config::default().with_env_overrides(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("METAPROGRAMMER_USE_MOCK", "1"),
            ("METAPROGRAMMER_DATABASE", "/tmp/catalog.db"),
        ]));

        assert_eq!(config.get_api_key().map(String::as_str), Some("sk-test"));
        assert!(config.is_mock_mode());
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/catalog.db"));
    }

    #[test]
    fn test_no_env_leaves_config_untouched() {
        let config = Config::default().with_env_overrides(env(&[]));
        assert!(config.get_api_key().is_none());
        assert!(!config.use_mock);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str("use_mock = true\n").unwrap();
        assert!(config.use_mock);
        assert_eq!(config.default_language, DEFAULT_LANGUAGE);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.interpreter, InterpreterConfig::default());
    }

    #[test]
    fn test_toml_interpreter_section() {
        let config: Config = toml::from_str(
            "model = \"gpt-4-0613\"\n[interpreter]\nprogram = \"python3.12\"\nargs = []\n",
        )
        .unwrap();
        assert_eq!(config.model, "gpt-4-0613");
        assert_eq!(config.interpreter.program, "python3.12");
        assert!(config.interpreter.args.is_empty());
    }
}
