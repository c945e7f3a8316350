use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

pub const KEYRING_SERVICE: &str = "oncosweep-api-key";
pub const KEYRING_USER: &str = "Oncosweep";
pub const DEFAULT_CONTACT: &str = "Please contact the system administrator.";

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub base_url: Option<Url>,
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Only written when the OS keyring cannot hold the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    base_url: Option<Url>,
    email: Option<String>,
    contact: Option<String>,
    api_key: Option<String>,
}

pub struct Config {
    pub base_url: Url,
    pub email: String,
    pub contact: String,
    pub api_key: String,
}

fn merge_config<K>(base: ConfigFile, override_config: ConfigEnv, keyring_api_key: K) -> Result<Config>
where
    K: FnOnce() -> Result<String>,
{
    let base_url = override_config
        .base_url
        .or(base.base_url)
        .ok_or(anyhow!("No platform URL configured, run `oncosweep init` first"))?;

    let email = override_config
        .email
        .or(base.email)
        .ok_or(anyhow!("No notification email configured, run `oncosweep init` first"))?;

    let contact = override_config
        .contact
        .or(base.contact)
        .unwrap_or_else(|| DEFAULT_CONTACT.to_string());

    let api_key = match override_config.api_key.or(base.api_key) {
        Some(api_key) => api_key,
        None => keyring_api_key()?,
    };

    Ok(Config {
        base_url,
        email,
        contact,
        api_key,
    })
}

pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let project_dirs = directories::ProjectDirs::from("com", "pharusdx", "oncosweep")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

fn parse_config_file(contents: &str) -> Result<ConfigFile> {
    toml::from_str(contents).context("Failed to parse configuration file")
}

pub fn read_config(explicit: Option<&Path>) -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::prefixed("ONCOSWEEP_")
        .from_env::<ConfigEnv>()
        .unwrap_or_default();

    let config_file = config_path(explicit)?;
    let file_config = if let Ok(config) = fs::read_to_string(&config_file) {
        parse_config_file(&config)?
    } else {
        ConfigFile::default()
    };

    merge_config(file_config, env_config, get_api_key_keyring)
}

pub fn write_config(explicit: Option<&Path>, config: &ConfigFile) -> Result<PathBuf> {
    let config_file = config_path(explicit)?;
    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let contents = toml::to_string_pretty(config)?;
    fs::write(&config_file, contents)
        .with_context(|| format!("Failed to write {}", config_file.display()))?;
    Ok(config_file)
}

fn get_api_key_keyring() -> Result<String> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    let api_key = entry
        .get_secret()
        .context("API key not found in the environment, the configuration file or the OS keyring")?;
    Ok(String::from_utf8(api_key)?)
}

pub fn set_api_key_keyring(api_key: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    entry.set_secret(api_key.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn no_keyring() -> Result<String> {
        Err(anyhow!("keyring unavailable"))
    }

    fn file_config() -> ConfigFile {
        ConfigFile {
            base_url: Some(Url::parse("https://file.example.org").unwrap()),
            email: Some("file@example.org".to_string()),
            contact: None,
            api_key: None,
        }
    }

    #[test]
    fn test_env_overrides_file() {
        let env = ConfigEnv {
            base_url: Some(Url::parse("https://env.example.org").unwrap()),
            email: None,
            contact: Some("Call the lab".to_string()),
            api_key: Some("env-key".to_string()),
        };

        let config = merge_config(file_config(), env, no_keyring).unwrap();
        assert_eq!(config.base_url.as_str(), "https://env.example.org/");
        assert_eq!(config.email, "file@example.org");
        assert_eq!(config.contact, "Call the lab");
        assert_eq!(config.api_key, "env-key");
    }

    #[test]
    fn test_keyring_used_without_env_key() {
        let config = merge_config(file_config(), ConfigEnv::default(), || {
            Ok("stored-key".to_string())
        })
        .unwrap();
        assert_eq!(config.api_key, "stored-key");
        assert_eq!(config.contact, DEFAULT_CONTACT);
    }

    #[test]
    fn test_missing_base_url_is_an_error() {
        let base = ConfigFile {
            base_url: None,
            ..file_config()
        };
        let err = merge_config(base, ConfigEnv::default(), no_keyring)
            .err()
            .unwrap();
        assert!(err.to_string().contains("oncosweep init"));
    }

    #[test]
    fn test_api_key_from_file_skips_keyring() {
        let base = ConfigFile {
            api_key: Some("file-key".to_string()),
            ..file_config()
        };
        let config = merge_config(base, ConfigEnv::default(), || {
            panic!("keyring must not be queried")
        })
        .unwrap();
        assert_eq!(config.api_key, "file-key");
    }

    #[test]
    fn test_env_api_key_beats_file() {
        let base = ConfigFile {
            api_key: Some("file-key".to_string()),
            ..file_config()
        };
        let env = ConfigEnv {
            api_key: Some("env-key".to_string()),
            ..ConfigEnv::default()
        };
        let config = merge_config(base, env, no_keyring).unwrap();
        assert_eq!(config.api_key, "env-key");
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        assert!(merge_config(file_config(), ConfigEnv::default(), no_keyring).is_err());
    }

    #[test]
    fn test_write_then_parse_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let written = write_config(Some(&path), &file_config()).unwrap();
        assert_eq!(written, path);

        let contents = fs::read_to_string(&path).unwrap();
        let parsed = parse_config_file(&contents).unwrap();
        assert_eq!(parsed.base_url, file_config().base_url);
        assert_eq!(parsed.email.as_deref(), Some("file@example.org"));
        assert!(parsed.contact.is_none());
        assert!(parsed.api_key.is_none());
        assert!(!contents.contains("api_key"));
    }

    #[test]
    fn test_api_key_written_to_file_is_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = ConfigFile {
            api_key: Some("file-key".to_string()),
            ..file_config()
        };
        write_config(Some(&path), &config).unwrap();

        let parsed = parse_config_file(&fs::read_to_string(&path).unwrap()).unwrap();
        let merged = merge_config(parsed, ConfigEnv::default(), no_keyring).unwrap();
        assert_eq!(merged.api_key, "file-key");
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let path = Path::new("/tmp/oncosweep.toml");
        assert_eq!(config_path(Some(path)).unwrap(), path);
    }
}
