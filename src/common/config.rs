use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CHUNKDROP_";

/// Limits and timers for chunked uploads
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Largest declared `total_size` accepted at init, unlimited when unset
    pub max_file_size: Option<u64>,
    /// HTTP body limit, must fit one chunk plus multipart overhead
    pub max_request_bytes: usize,
    /// Transfers idle this long get evicted; 0 disables the sweep
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_file_size: None,
            max_request_bytes: 25 * 1024 * 1024, // 25 MB
            idle_timeout_secs: 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl TransferSettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Server configuration: defaults <- TOML file <- CHUNKDROP_* env
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Where reassembled files land
    pub storage_dir: PathBuf,
    /// Scratch root, one subdirectory per in-flight transfer
    pub temp_dir: PathBuf,
    pub transfer: TransferSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3001,
            storage_dir: PathBuf::from("./shared"),
            temp_dir: std::env::temp_dir().join("chunkdrop"),
            transfer: TransferSettings::default(),
        }
    }
}

impl Config {
    /// Platform config location, e.g. ~/.config/chunkdrop/config.toml
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "chunkdrop").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            // Missing files are skipped by the provider
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::figment(path)
            .extract()
            .context("Failed to load configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_apply_without_sources() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("absent.toml");
            let config: Config = Config::figment(Some(&path)).extract()?;

            assert_eq!(config.port, 3001);
            assert_eq!(config.storage_dir, PathBuf::from("./shared"));
            assert_eq!(config.transfer.max_file_size, None);
            assert_eq!(
                config.transfer.idle_timeout(),
                Some(Duration::from_secs(3600))
            );
            Ok(())
        });
    }

    #[test]
    fn file_then_env_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chunkdrop.toml",
                r#"
                    port = 8080
                    storage_dir = "/srv/drop"

                    [transfer]
                    max_file_size = 1048576
                    idle_timeout_secs = 120
                "#,
            )?;
            jail.set_env("CHUNKDROP_PORT", "9090");
            jail.set_env("CHUNKDROP_TRANSFER__IDLE_TIMEOUT_SECS", "0");

            let path = jail.directory().join("chunkdrop.toml");
            let config: Config = Config::figment(Some(&path)).extract()?;

            assert_eq!(config.port, 9090);
            assert_eq!(config.storage_dir, PathBuf::from("/srv/drop"));
            assert_eq!(config.transfer.max_file_size, Some(1_048_576));
            assert_eq!(config.transfer.idle_timeout(), None);
            // untouched nested key keeps its default
            assert_eq!(config.transfer.sweep_interval_secs, 60);
            Ok(())
        });
    }

    #[test]
    fn sweep_interval_never_zero() {
        let settings = TransferSettings {
            sweep_interval_secs: 0,
            ..TransferSettings::default()
        };
        assert_eq!(settings.sweep_interval(), Duration::from_secs(1));
    }
}
