//! Team application keys and the request that loads them.

use serde::{Deserialize, Serialize};

use crate::team::{TeamId, TeamName};

/// Application a key set is derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamApplication {
    Kbfs,
    Chat,
    Saltpack,
    GitMetadata,
    SeitanInviteToken,
    Stellar,
}

/// Hints asking the engine to refresh before answering.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamRefreshers {
    /// Refresh until at least this key generation is present.
    pub need_key_generation: Option<u32>,
    /// Refresh until these users are members.
    pub need_members: Vec<String>,
}

impl TeamRefreshers {
    /// Returns true when no refresh is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.need_key_generation.is_none() && self.need_members.is_empty()
    }
}

/// Whether a read may be served from the offline cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineAvailability {
    /// Always load fresh; never read or write the cache.
    None,
    /// Serve from the cache when an entry exists.
    #[default]
    BestEffort,
}

/// Arguments of `LoadTeamPlusApplicationKeys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationKeysRequest {
    pub team_id: TeamId,
    pub application: TeamApplication,
    pub refreshers: TeamRefreshers,
    /// Also return legacy per-generation keys.
    pub include_legacy_keys: bool,
    pub session_id: u64,
    pub availability: OfflineAvailability,
}

impl ApplicationKeysRequest {
    /// Creates a best-effort request with no refresh hints.
    #[must_use]
    pub fn new(team_id: TeamId, application: TeamApplication) -> Self {
        Self {
            team_id,
            application,
            refreshers: TeamRefreshers::default(),
            include_legacy_keys: false,
            session_id: 0,
            availability: OfflineAvailability::BestEffort,
        }
    }
}

/// One derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationKey {
    pub generation: u32,
    /// Hex-encoded key material.
    pub key: String,
}

/// Team identity plus the application keys for every generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamApplicationKeys {
    pub team_id: TeamId,
    pub name: TeamName,
    pub application: TeamApplication,
    pub writers: Vec<String>,
    pub readers: Vec<String>,
    pub keys: Vec<ApplicationKey>,
}

impl TeamApplicationKeys {
    /// Highest key generation present.
    #[must_use]
    pub fn latest_generation(&self) -> Option<u32> {
        self.keys.iter().map(|k| k.generation).max()
    }
}

/// Kind of key rotation requested by `TeamRotateKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationType {
    #[default]
    Visible,
    Hidden,
}
