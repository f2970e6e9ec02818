//! Membership mutation requests and outcomes.

use serde::{Deserialize, Serialize};

use crate::team::TeamRole;

/// Restrictions attached to a bot member's role.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BotSettings {
    /// Bot may read every message, not only commands and mentions.
    pub read_all: bool,
    /// Conversations the bot is limited to; empty means all.
    pub conversations: Vec<String>,
    /// Trigger patterns the bot reacts to.
    pub triggers: Vec<String>,
}

/// One entry of a bulk add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRequest {
    /// Username, `email:<addr>`, `phone:<digits>` or a social assertion.
    pub assertion: String,
    pub role: TeamRole,
    pub bot_settings: Option<BotSettings>,
}

impl MembershipRequest {
    /// Creates a request without bot settings.
    #[must_use]
    pub fn new(assertion: impl Into<String>, role: TeamRole) -> Self {
        Self {
            assertion: assertion.into(),
            role,
            bot_settings: None,
        }
    }

    /// Attaches bot settings.
    #[must_use]
    pub fn with_bot_settings(mut self, settings: BotSettings) -> Self {
        self.bot_settings = Some(settings);
        self
    }
}

/// A request that the engine accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedMember {
    /// The assertion from the originating request.
    pub assertion: String,
    /// Resolved username; `None` for invites to an address with no account.
    pub username: Option<String>,
    /// Admitted through a pending invite rather than as an active member.
    pub was_invited: bool,
}

impl AddedMember {
    /// Returns the username of an immediately active member.
    #[must_use]
    pub fn active_username(&self) -> Option<&str> {
        if self.was_invited {
            return None;
        }
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Result of a bulk add as computed by the engine.
///
/// Every input request appears in exactly one of the two lists, each list
/// in input order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkMutationOutcome {
    pub added: Vec<AddedMember>,
    /// Assertions the engine declined (contact restrictions).
    pub not_added: Vec<String>,
}

impl BulkMutationOutcome {
    /// Number of requests the outcome accounts for.
    #[must_use]
    pub fn accounted(&self) -> usize {
        self.added.len() + self.not_added.len()
    }
}

/// Gateway result of `TeamAddMembers`/`TeamAddMembersMultiRole`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkAddResult {
    pub not_added: Vec<String>,
    /// Welcome notifications were scheduled; says nothing about delivery.
    pub notifications_scheduled: bool,
}

impl BulkAddResult {
    /// Returns true when contact restrictions kept some users out.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.not_added.is_empty()
    }
}

/// Result of `TeamAddEmailsBulk`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkEmailsResult {
    /// Addresses that got a new invite.
    pub invited: Vec<String>,
    /// Addresses that already had a pending invite.
    pub already_invited: Vec<String>,
    /// Entries that did not parse as an email address.
    pub malformed: Vec<String>,
}

/// Engine result of a single-member add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMemberResult {
    pub username: Option<String>,
    pub invited: bool,
    /// A welcome notification was scheduled.
    pub chat_sending: bool,
}

/// Identifies what `TeamRemoveMember` should remove.
///
/// At most one field may be populated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemovalSelector {
    pub username: Option<String>,
    pub email: Option<String>,
    pub invite_id: Option<String>,
}

impl RemovalSelector {
    /// Selects a member by username.
    #[must_use]
    pub fn username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    /// Selects a pending invite by email address.
    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Selects a pending invite by id.
    #[must_use]
    pub fn invite_id(invite_id: impl Into<String>) -> Self {
        Self {
            invite_id: Some(invite_id.into()),
            ..Self::default()
        }
    }
}

/// One entry of `TeamEditMembers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEdit {
    pub username: String,
    pub role: TeamRole,
    pub bot_settings: Option<BotSettings>,
}

impl MemberEdit {
    /// Creates an edit without bot settings.
    #[must_use]
    pub fn new(username: impl Into<String>, role: TeamRole) -> Self {
        Self {
            username: username.into(),
            role,
            bot_settings: None,
        }
    }
}

/// One entry of `TeamRemoveMembers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRemoval {
    Member { username: String },
    Invite { invite_id: String },
}

impl MemberRemoval {
    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Member { username } => username,
            Self::Invite { invite_id } => invite_id,
        }
    }
}

/// Per-user failure inside a batch edit or removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub target: String,
    pub error: String,
}

/// Result of `TeamEditMembers`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EditMembersResult {
    pub failures: Vec<MemberFailure>,
}

/// Result of `TeamRemoveMembers`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoveMembersResult {
    pub failures: Vec<MemberFailure>,
}
