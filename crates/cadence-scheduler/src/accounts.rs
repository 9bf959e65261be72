//! Account directory: which automation profile and login each account uses.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use cadence_publisher::{Credentials, Disposition};
use serde::Deserialize;

use crate::SchedulerError;

/// Settings for one publishing account.
#[derive(Clone, Deserialize)]
pub struct AccountConfig {
    /// Automation profile the account lives in.
    pub resource_id: String,
    pub username: String,
    pub password: String,
    /// Stop the profile after each job instead of leaving it running.
    #[serde(default)]
    pub close_after_use: bool,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("resource_id", &self.resource_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("close_after_use", &self.close_after_use)
            .finish()
    }
}

impl AccountConfig {
    pub fn new(resource_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            username: username.into(),
            password: String::new(),
            close_after_use: false,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn disposition(&self) -> Disposition {
        Disposition::for_policy(self.close_after_use)
    }
}

/// All configured accounts, keyed by the name records refer to.
///
/// Loaded from TOML:
///
/// ```toml
/// [accounts.acctA]
/// resource_id = "k1abc"
/// username = "poster_a"
/// password = "..."
/// close_after_use = false
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountDirectory {
    #[serde(default)]
    accounts: BTreeMap<String, AccountConfig>,
}

impl AccountDirectory {
    /// Parse and validate an account file's contents.
    pub fn from_toml_str(contents: &str) -> Result<Self, SchedulerError> {
        let directory: Self = toml::from_str(contents)
            .map_err(|e| SchedulerError::InvalidAccounts(e.to_string()))?;
        directory.validate()?;
        Ok(directory)
    }

    /// Load the account file at `path`.
    pub fn load(path: &Path) -> Result<Self, SchedulerError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::InvalidAccounts(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Add or replace an account.
    pub fn with_account(mut self, name: impl Into<String>, config: AccountConfig) -> Self {
        self.accounts.insert(name.into(), config);
        self
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        for (name, account) in &self.accounts {
            if account.resource_id.trim().is_empty() {
                return Err(SchedulerError::InvalidAccounts(format!(
                    "account '{}' has an empty resource_id",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.accounts.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.accounts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
