use crate::global;
use crate::platform::{ChannelId, RoleId, UserId};
use crate::session::{GameMode, PartySize};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discord: DiscordConfig,
    pub recruitment: RecruitmentConfig,
    pub watcher: WatcherConfig,
    pub housekeeping: HousekeepingConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token. `RALLYCALL_DISCORD_TOKEN` takes precedence when set.
    pub token: String,
    pub application_id: u64,
    pub guild_id: u64,
    /// The only user allowed to force-stop sessions or shut the bot down.
    pub owner_id: UserId,
    /// Category the temporary voice channels are created under.
    pub voice_category_id: ChannelId,
    /// Channel recruitment announcements are posted to.
    pub announcement_channel_id: ChannelId,
    /// Channel hosting the persistent "start recruiting" button.
    pub button_channel_id: ChannelId,
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            application_id: 0,
            guild_id: 0,
            owner_id: UserId(0),
            voice_category_id: ChannelId(0),
            announcement_channel_id: ChannelId(0),
            button_channel_id: ChannelId(0),
            api_base: "https://discord.com/api/v10".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySizeOption {
    pub recruit: u8,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTag {
    pub role_id: RoleId,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecruitmentConfig {
    pub modes: Vec<GameMode>,
    pub party_sizes: Vec<PartySizeOption>,
    pub target_tags: Vec<TargetTag>,
    pub title_max_len: usize,
}

impl Default for RecruitmentConfig {
    fn default() -> Self {
        Self {
            modes: vec![GameMode::Competitive, GameMode::Casual],
            party_sizes: vec![
                PartySizeOption {
                    recruit: 1,
                    label: "Duo (1 more)".to_string(),
                },
                PartySizeOption {
                    recruit: 2,
                    label: "Trio (2 more)".to_string(),
                },
                PartySizeOption {
                    recruit: 4,
                    label: "Full party (4 more)".to_string(),
                },
            ],
            target_tags: Vec::new(),
            title_max_len: 100,
        }
    }
}

impl RecruitmentConfig {
    pub fn tag(&self, role: RoleId) -> Option<&TargetTag> {
        self.target_tags.iter().find(|t| t.role_id == role)
    }

    pub fn offers_party_size(&self, size: PartySize) -> bool {
        self.party_sizes.iter().any(|p| p.recruit == size.get())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_seconds: u64,
    pub empty_grace_seconds: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            empty_grace_seconds: 300,
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn empty_grace(&self) -> Duration {
        Duration::from_secs(self.empty_grace_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    pub refresh_interval_seconds: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 300,
        }
    }
}

impl HousekeepingConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3838".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        Self::load_with_token(config_path, std::env::var("RALLYCALL_DISCORD_TOKEN").ok())
    }

    fn load_with_token(config_path: &Path, token: Option<String>) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
            info!("Loaded config from {:?}", config_path);
            config
        } else {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            config
        };

        // Applied after saving; the env token is never written to disk.
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            config.discord.token = token;
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("RALLYCALL_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        global::config_file()
    }

    /// Checks the option sets and intervals the service relies on.
    pub fn validate(&self) -> Result<()> {
        let recruitment = &self.recruitment;
        if recruitment.modes.is_empty() {
            bail!("recruitment.modes must offer at least one mode");
        }
        if recruitment.party_sizes.is_empty() {
            bail!("recruitment.party_sizes must offer at least one size");
        }
        for option in &recruitment.party_sizes {
            if PartySize::try_from(option.recruit).is_err() {
                bail!(
                    "recruitment.party_sizes: {} is not one of {:?}",
                    option.recruit,
                    PartySize::ALLOWED
                );
            }
        }
        if recruitment.target_tags.is_empty() {
            bail!("recruitment.target_tags must list at least one role");
        }
        if recruitment.target_tags.len() > 25 {
            bail!("recruitment.target_tags supports at most 25 roles");
        }
        if !(1..=100).contains(&recruitment.title_max_len) {
            bail!("recruitment.title_max_len must be between 1 and 100");
        }
        if self.watcher.poll_interval_seconds == 0 || self.watcher.empty_grace_seconds == 0 {
            bail!("watcher intervals must be greater than zero");
        }
        if self.housekeeping.refresh_interval_seconds == 0 {
            bail!("housekeeping.refresh_interval_seconds must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.recruitment.target_tags = vec![TargetTag {
            role_id: RoleId(10),
            label: "Anyone".to_string(),
        }];
        config
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.watcher.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.watcher.empty_grace(), Duration::from_secs(300));
        assert_eq!(config.housekeeping.refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.recruitment.title_max_len, 100);
        let sizes: Vec<u8> = config
            .recruitment
            .party_sizes
            .iter()
            .map(|p| p.recruit)
            .collect();
        assert_eq!(sizes, vec![1, 2, 4]);
    }

    #[test]
    fn test_validate_rejects_bad_party_size() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());
        config.recruitment.party_sizes.push(PartySizeOption {
            recruit: 3,
            label: "nope".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_tags_and_intervals() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config = valid_config();
        config.watcher.empty_grace_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_creates_default_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.api.bind, "127.0.0.1:3838");

        let mut edited = valid_config();
        edited.discord.voice_category_id = ChannelId(123);
        edited.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.discord.voice_category_id, ChannelId(123));
        assert_eq!(loaded.recruitment.target_tags.len(), 1);
    }

    #[test]
    fn test_token_override_applies_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let created = Config::load_with_token(&path, Some("secret".to_string())).unwrap();
        assert_eq!(created.discord.token, "secret");
        assert!(!std::fs::read_to_string(&path).unwrap().contains("secret"));

        let loaded = Config::load_with_token(&path, Some("again".to_string())).unwrap();
        assert_eq!(loaded.discord.token, "again");

        let blank = Config::load_with_token(&path, Some(String::new())).unwrap();
        assert_eq!(blank.discord.token, Config::default().discord.token);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watcher]\npoll_interval_seconds = 5\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.watcher.poll_interval_seconds, 5);
        assert_eq!(loaded.watcher.empty_grace_seconds, 300);
        assert_eq!(loaded.recruitment.modes.len(), 2);
    }
}
