use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use crate::cases::{
    Case, CaseError, CaseResult, CaseService, CaseSettings, CaseStore, ExpiryCheckRequest,
    RestrictionRoles, SettingsLookup,
};
use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serenity::prelude::TypeMapKey;
use tokio::sync::Mutex;
use tokio::sync::mpsc::Sender;

const DATA_DIR: &str = "data";
const CONFIG_FILE: &str = "data/guild_configs.yaml";
const CASES_FILE: &str = "data/cases.yaml";

/// Guild configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildConfig {
    // The ID of the guild
    pub guild_id: u64,
    // Channel that mirrors the case ledger
    pub mod_log_channel_id: Option<u64>,
    // Role given to muted members
    pub mute_role_id: Option<u64>,
    // Roles for the narrower restrictions
    #[serde(default)]
    pub restriction_roles: RestrictionRoles,
}

impl GuildConfig {
    #[must_use]
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn case_settings(&self) -> CaseSettings {
        CaseSettings {
            mod_log_channel_id: self.mod_log_channel_id,
            mute_role_id: self.mute_role_id,
            restriction_roles: self.restriction_roles,
        }
    }
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild_configs", &self.guild_configs)
            .field("cases", &self.cases)
            .field("expiry_tx", &self.expiry_tx)
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        Arc::make_mut(&mut self.0)
    }
}

impl Data {
    /// Create a new Data instance
    #[must_use]
    pub fn new() -> Self {
        Self(DataInner::new().into())
    }

    /// Get the guild configuration for a specific guild
    #[must_use]
    pub fn get_guild_config(&self, guild_id: serenity::GuildId) -> Option<GuildConfig> {
        self.0
            .guild_configs
            .get(&guild_id)
            .map(|entry| entry.value().clone())
    }

    /// Apply `change` to the guild's configuration, creating it if needed
    pub fn update_guild_config(
        &self,
        guild_id: serenity::GuildId,
        change: impl FnOnce(&mut GuildConfig),
    ) -> GuildConfig {
        let mut entry = self
            .0
            .guild_configs
            .entry(guild_id)
            .or_insert_with(|| GuildConfig::new(guild_id.get()));
        change(entry.value_mut());
        entry.value().clone()
    }

    /// Set the expiry task sender
    pub fn set_expiry_tx(&mut self, tx: Sender<ExpiryCheckRequest>) {
        Arc::make_mut(&mut self.0).expiry_tx = Arc::new(Some(tx));
    }

    /// Ask the expiry task for an immediate sweep; false if it is not running
    pub async fn request_expiry_check(&self) -> bool {
        match self.expiry_tx.as_ref() {
            Some(tx) => tx.send(ExpiryCheckRequest::CheckAll).await.is_ok(),
            None => false,
        }
    }

    /// Load data from YAML files
    ///
    /// # Errors
    /// Returns a store error if a data file exists but cannot be read or parsed.
    pub async fn load() -> CaseResult<Self> {
        Ok(Self(Arc::new(DataInner::load().await?)))
    }

    /// Save data to YAML files
    /// # Errors
    /// This function will return an error if:
    /// - The data directory cannot be created
    /// - The configurations or cases cannot be serialized to YAML
    /// - The YAML data cannot be written
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.save().await
    }
}

impl SettingsLookup for Data {
    fn case_settings(&self, guild_id: u64) -> CaseSettings {
        self.get_guild_config(serenity::GuildId::new(guild_id))
            .map(|config| config.case_settings())
            .unwrap_or_default()
    }
}

/// Main centralized data structure for the bot
#[derive(Clone)]
pub struct DataInner {
    // Map of guild_id -> guild configuration
    pub guild_configs: DashMap<serenity::GuildId, GuildConfig>,
    // The case ledger
    pub cases: CaseService,
    // Channel to send expiry check requests
    pub expiry_tx: Arc<Option<Sender<ExpiryCheckRequest>>>,
    // Held for the whole of a save
    save_lock: Arc<Mutex<()>>,
}

impl Default for DataInner {
    fn default() -> Self {
        Self::new()
    }
}

impl DataInner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            guild_configs: DashMap::new(),
            cases: CaseService::new(),
            expiry_tx: Arc::new(None),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load data from YAML files
    ///
    /// Missing files load as empty. A file that is present but unreadable is
    /// an error, so a later save never replaces it.
    ///
    /// # Errors
    /// Returns a store error naming the file that could not be loaded.
    pub async fn load() -> CaseResult<Self> {
        Self::load_from(CONFIG_FILE, CASES_FILE).await
    }

    async fn load_from(config_file: &str, cases_file: &str) -> CaseResult<Self> {
        let mut data = Self::new();

        if let Some(configs) = read_yaml::<Vec<GuildConfig>>(config_file).await? {
            for config in configs {
                let guild_id = serenity::GuildId::new(config.guild_id);
                data.guild_configs.insert(guild_id, config);
            }
        }

        if let Some(cases) = read_yaml::<Vec<Case>>(cases_file).await? {
            let store = CaseStore::from_cases(cases)
                .map_err(|e| CaseError::Store(format!("{cases_file}: {e}")))?;
            data.cases = CaseService::with_store(store);
        }

        Ok(data)
    }

    /// Save data to YAML files
    ///
    /// Saves run one at a time and each file is replaced whole.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created, or a file
    /// cannot be serialized or written.
    pub async fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.save_to(DATA_DIR, CONFIG_FILE, CASES_FILE).await
    }

    async fn save_to(
        &self,
        dir: &str,
        config_file: &str,
        cases_file: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let _guard = self.save_lock.lock().await;

        if !std::path::Path::new(dir).exists() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut configs: Vec<GuildConfig> = self
            .guild_configs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        configs.sort_by_key(|config| config.guild_id);
        write_replacing(config_file, &serde_yaml::to_string(&configs)?).await?;

        let cases = self.cases.snapshot().await;
        write_replacing(cases_file, &serde_yaml::to_string(&cases)?).await?;

        Ok(())
    }
}

/// Parse a YAML file; `None` if it does not exist
async fn read_yaml<T: DeserializeOwned>(path: &str) -> CaseResult<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CaseError::Store(format!("{path}: {e}"))),
    };
    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|e| CaseError::Store(format!("{path}: {e}")))
}

/// Write through a temporary file so `path` is never left half written
async fn write_replacing(path: &str, contents: &str) -> std::io::Result<()> {
    let temp = format!("{path}.tmp");
    tokio::fs::write(&temp, contents).await?;
    tokio::fs::rename(&temp, path).await
}
