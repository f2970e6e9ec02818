//! Team command gateway.
//!
//! `TeamsGateway` is the outward entry point. Each operation runs inside a
//! `teams` tracing span, checks the session where the operation needs one,
//! applies validation, then calls the engine, the bulk controller, the offline
//! cache or the poller and returns the result synchronously.

mod invites;
mod lifecycle;
mod membership;
mod queries;
/// Argument summaries for span fields.
pub mod summary;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span};

use crate::bulk::BulkMutationController;
use crate::cache::{CacheStore, OfflineCache};
use crate::context::RequestContext;
use crate::engine::TeamEngine;
use crate::error::{ConfigError, GatewayResult, ValidationError};
use crate::notify::{ChatNotifier, NotificationConfig, NotificationSystem};
use crate::poll::RetryPolicy;
use crate::team::TeamName;

pub use lifecycle::TeamCreateResult;
pub use membership::TeamAddMemberArgs;

/// Cache operation name for `LoadTeamPlusApplicationKeys`.
pub const APPLICATION_KEYS_CACHE_OP: &str = "teams.loadTeamPlusApplicationKeys";

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Welcome notification worker pool.
    pub notifications: NotificationConfig,
    /// Retry policy of `CanUserPerform`.
    pub can_perform_retry: RetryPolicy,
    /// Payload version of cached application keys.
    pub application_keys_cache_version: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            notifications: NotificationConfig::default(),
            can_perform_retry: RetryPolicy::default(),
            application_keys_cache_version: 1,
        }
    }
}

impl GatewayConfig {
    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

/// Request-facing layer over a [`TeamEngine`].
pub struct TeamsGateway {
    cfg: GatewayConfig,
    engine: Arc<dyn TeamEngine>,
    notifier: Arc<dyn ChatNotifier>,
    notifications: Arc<NotificationSystem>,
    bulk: BulkMutationController,
    cache: OfflineCache,
}

impl TeamsGateway {
    /// Builds a gateway and starts its notification workers.
    pub fn new(
        cfg: GatewayConfig,
        engine: Arc<dyn TeamEngine>,
        notifier: Arc<dyn ChatNotifier>,
        cache_store: Arc<dyn CacheStore>,
    ) -> GatewayResult<Self> {
        let notifications = Arc::new(NotificationSystem::new(&cfg.notifications, Arc::clone(&notifier))?);
        let bulk = BulkMutationController::new(Arc::clone(&engine), Arc::clone(&notifications));
        Ok(Self {
            cfg,
            engine,
            notifier,
            notifications,
            bulk,
            cache: OfflineCache::new(cache_store),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.cfg
    }

    /// Background notification pool and its counters.
    #[must_use]
    pub fn notifications(&self) -> &NotificationSystem {
        &self.notifications
    }

    /// Offline cache and its counters.
    #[must_use]
    pub const fn cache(&self) -> &OfflineCache {
        &self.cache
    }

    /// Runs one operation inside a `teams` span and logs how it ended.
    fn traced<T>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        args: &str,
        f: impl FnOnce() -> GatewayResult<T>,
    ) -> GatewayResult<T> {
        let span = info_span!(
            "teams",
            tag = "TM",
            op,
            request_id = %ctx.request_id(),
            tags = %ctx.tag_list(),
            args
        );
        let _entered = span.enter();
        let started = Instant::now();
        let result = f();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(_) => debug!(elapsed_ms, "ok"),
            Err(e) => debug!(elapsed_ms, error = %e, "failed"),
        }
        result
    }
}

impl std::fmt::Debug for TeamsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamsGateway")
            .field("cfg", &self.cfg)
            .field("notifications", &self.notifications)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Parses a team name and rejects the empty name.
pub(crate) fn parse_team_name(name: &str) -> GatewayResult<TeamName> {
    let parsed = TeamName::parse(name)?;
    if parsed.depth() == 0 {
        return Err(ValidationError::InvalidTeamName {
            name: name.to_string(),
            reason: "empty team name".to_string(),
        }
        .into());
    }
    Ok(parsed)
}
