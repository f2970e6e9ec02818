//! # teamgate - Team Command Gateway
//!
//! teamgate sits between clients and a team engine. It turns team membership
//! commands into engine calls and owns the policy around them: who must be
//! logged in, how batches are validated and accounted, which reads are served
//! from an offline cache, and which follow-up chat messages run in the
//! background.
//!
//! ## Core Concepts
//!
//! - **TeamsGateway**: The entry point; one method per command
//! - **TeamEngine**: The seam to whatever actually stores teams
//! - **RequestContext**: Session, log tags and cancellation for one request
//! - **NotificationSystem**: Bounded worker pool for welcome messages
//! - **OfflineCache**: Versioned read-through cache for application keys
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use teamgate::{
//!     ChatNotifier, GatewayConfig, InMemoryCacheStore, InMemoryTeamEngine, NotificationTask, NotifyError,
//!     RequestContext, Session, TeamName, TeamRole, TeamsGateway,
//! };
//!
//! struct Silent;
//!
//! impl ChatNotifier for Silent {
//!     fn send_welcome(&self, _task: &NotificationTask) -> Result<(), NotifyError> {
//!         Ok(())
//!     }
//!     fn announce_team_created(&self, _team: &TeamName, _creator: &str) -> Result<(), NotifyError> {
//!         Ok(())
//!     }
//! }
//!
//! let engine = Arc::new(InMemoryTeamEngine::new());
//! engine.register_users(["alice", "bob"])?;
//! let gateway = TeamsGateway::new(
//!     GatewayConfig::default(),
//!     engine,
//!     Arc::new(Silent),
//!     Arc::new(InMemoryCacheStore::new()),
//! )?;
//!
//! let ctx = RequestContext::authenticated(Session::new("alice", 1));
//! let created = gateway.team_create(&ctx, "acme", false)?;
//! gateway.team_add_members(&ctx, created.team_id, &["bob".to_string()], TeamRole::Writer, None, false)?;
//! assert_eq!(gateway.team_get(&ctx, "acme")?.members.writers.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Domain values
pub mod error;
pub mod invite;
pub mod keys;
pub mod membership;
pub mod team;

// Request plumbing
pub mod context;
pub mod poll;
pub mod validation;

// Engine seam and gateway components
pub mod bulk;
pub mod cache;
pub mod engine;
pub mod gateway;
pub mod notify;

pub use bulk::BulkMutationController;
pub use cache::{CacheKey, CacheKeyed, CacheStore, InMemoryCacheStore, OfflineCache};
pub use context::{CancelToken, RequestContext, Session};
pub use engine::memory::UserRecord;
pub use engine::{InMemoryTeamEngine, TeamEngine, TeamListQuery};
pub use error::{
    CacheStoreError, ConfigError, EngineError, EngineErrorKind, EngineResult, GatewayError, GatewayResult,
    IdentifyProblem, NotifyError, ValidationError,
};
pub use gateway::{GatewayConfig, TeamAddMemberArgs, TeamCreateResult, TeamsGateway, APPLICATION_KEYS_CACHE_OP};
pub use invite::{parse_long_duration, Invitelink, ParsedInvite, SeitanToken};
pub use keys::{ApplicationKeysRequest, OfflineAvailability, TeamApplication, TeamApplicationKeys};
pub use membership::{
    AddMemberResult, BotSettings, BulkAddResult, BulkEmailsResult, MemberEdit, MemberRemoval, MembershipRequest,
    RemovalSelector,
};
pub use notify::{ChatNotifier, NotificationConfig, NotificationSystem, NotificationTask};
pub use poll::{poll_until_success, RetryPolicy};
pub use team::{TeamDetails, TeamId, TeamName, TeamRole, TeamSettings};
