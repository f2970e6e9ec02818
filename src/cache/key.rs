//! Cache key normalization.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CacheStoreError;
use crate::keys::{ApplicationKeysRequest, TeamApplication};
use crate::team::TeamId;

/// Digest of the substantive part of a read request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Hashes the canonical JSON form of a normalized projection.
    pub fn from_projection<T: Serialize + ?Sized>(projection: &T) -> Result<Self, CacheStoreError> {
        let bytes = serde_json::to_vec(projection).map_err(|e| CacheStoreError::SerializationError(e.to_string()))?;
        Ok(Self(*blake3::hash(&bytes).as_bytes()))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&blake3::Hash::from(self.0).to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to tell keys apart in logs.
        let hex = blake3::Hash::from(self.0).to_hex();
        write!(f, "CacheKey({})", &hex[..12])
    }
}

/// A read request that can be served from the offline cache.
pub trait CacheKeyed {
    /// Key built from the fields that change the payload.
    fn cache_key(&self) -> Result<CacheKey, CacheStoreError>;
}

#[derive(Serialize)]
struct ApplicationKeysProjection {
    team_id: TeamId,
    application: TeamApplication,
}

impl CacheKeyed for ApplicationKeysRequest {
    /// Session id, refresh hints, legacy-key flag and availability are left out.
    fn cache_key(&self) -> Result<CacheKey, CacheStoreError> {
        CacheKey::from_projection(&ApplicationKeysProjection {
            team_id: self.team_id,
            application: self.application,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{OfflineAvailability, TeamRefreshers};

    #[test]
    fn test_session_scoped_fields_do_not_change_key() {
        let team_id = TeamId::new();
        let a = ApplicationKeysRequest::new(team_id, TeamApplication::Chat);
        let b = ApplicationKeysRequest {
            session_id: 42,
            refreshers: TeamRefreshers {
                need_key_generation: Some(3),
                need_members: vec!["alice".to_string()],
            },
            include_legacy_keys: true,
            availability: OfflineAvailability::None,
            ..a.clone()
        };
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
    }

    #[test]
    fn test_substantive_fields_change_key() {
        let team_id = TeamId::new();
        let chat = ApplicationKeysRequest::new(team_id, TeamApplication::Chat);
        let kbfs = ApplicationKeysRequest::new(team_id, TeamApplication::Kbfs);
        let other = ApplicationKeysRequest::new(TeamId::new(), TeamApplication::Chat);
        assert_ne!(chat.cache_key().unwrap(), kbfs.cache_key().unwrap());
        assert_ne!(chat.cache_key().unwrap(), other.cache_key().unwrap());
    }

    #[test]
    fn test_debug_is_short() {
        let key = CacheKey::from_projection(&"x").unwrap();
        assert_eq!(format!("{key:?}").len(), "CacheKey()".len() + 12);
        assert_eq!(key.to_string().len(), 64);
    }
}
