//! The team engine seam.
//!
//! The engine owns team semantics: membership, roles, invites, key material.
//! The gateway only shapes and sequences calls into it. Implementations must be
//! safe for concurrent use; the gateway adds no locking of its own.

/// In-memory reference engine.
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::invite::{AcceptOrRequestResult, AccessRequestResult, Invitelink, JoinRequest, SeitanToken};
use crate::keys::{ApplicationKeysRequest, RotationType, TeamApplicationKeys};
use crate::membership::{
    AddedMember, BotSettings, BulkEmailsResult, BulkMutationOutcome, EditMembersResult, MemberEdit, MemberRemoval,
    MembershipRequest, RemoveMembersResult,
};
use crate::team::{
    AnnotatedMembership, TeamAndMemberShowcase, TeamDetails, TeamId, TeamIdAndName, TeamMemberDetails,
    TeamName, TeamOperation, TeamRole, TeamSettings, TeamShowcase,
};

pub use memory::InMemoryTeamEngine;

/// Which teams `TeamList*` should report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TeamListQuery {
    /// Memberships of a user, taken from the server without verification.
    Unverified {
        user_assertion: String,
        include_implicit_teams: bool,
    },
    /// Memberships of a user, each team fully loaded and verified.
    Verified {
        user_assertion: String,
        include_implicit_teams: bool,
    },
    /// Every member of every team the caller belongs to.
    Teammates { include_implicit_teams: bool },
}

/// Team operations the gateway forwards to.
///
/// `actor` is always the username of the authenticated caller.
///
/// # Errors
/// Every method reports engine-defined failures as [`EngineError`](crate::EngineError).
/// `add_members` wraps its failures in `EngineError::AddMembers`.
pub trait TeamEngine: Send + Sync {
    /// Creates a root team with `actor` as owner.
    fn create_root_team(&self, actor: &str, name: &TeamName, settings: &TeamSettings) -> EngineResult<TeamId>;

    /// Creates a subteam and adds `actor` to it with `add_self_as`.
    fn create_subteam(&self, actor: &str, name: &TeamName, add_self_as: TeamRole) -> EngineResult<TeamId>;

    /// Removes `actor` from a team.
    fn leave(&self, actor: &str, name: &TeamName, permanent: bool) -> EngineResult<()>;

    /// Renames a subteam within the same parent.
    fn rename_subteam(&self, actor: &str, prev: &TeamName, new: &TeamName) -> EngineResult<()>;

    /// Deletes a team.
    fn delete(&self, actor: &str, team_id: TeamId) -> EngineResult<()>;

    /// Replaces team settings.
    fn set_settings(&self, actor: &str, team_id: TeamId, settings: &TeamSettings) -> EngineResult<()>;

    /// Rotates the team key, creating a new generation.
    fn rotate_key(&self, actor: &str, team_id: TeamId, rotation: RotationType) -> EngineResult<()>;

    /// Loads a team snapshot by name.
    fn details(&self, name: &TeamName) -> EngineResult<TeamDetails>;

    /// Loads a team snapshot by id.
    fn details_by_id(&self, team_id: TeamId) -> EngineResult<TeamDetails>;

    /// Lists the members of a team.
    fn members(&self, team_id: TeamId) -> EngineResult<Vec<TeamMemberDetails>>;

    /// Resolves a team name to its id.
    fn resolve_name(&self, name: &TeamName) -> EngineResult<TeamId>;

    /// Resolves a team id to its name.
    fn resolve_id(&self, team_id: TeamId) -> EngineResult<TeamName>;

    /// Admins of ancestor teams, who administer this team implicitly.
    fn implicit_admins(&self, team_id: TeamId) -> EngineResult<Vec<TeamMemberDetails>>;

    /// Lists memberships.
    fn list_teams(&self, actor: &str, query: &TeamListQuery) -> EngineResult<Vec<AnnotatedMembership>>;

    /// Lists direct subteams of `parent`.
    fn list_subteams(&self, parent: &TeamName) -> EngineResult<Vec<TeamIdAndName>>;

    /// Computes what `actor` may do in a team.
    fn can_user_perform(&self, actor: &str, name: &TeamName) -> EngineResult<TeamOperation>;

    /// Loads team identity plus application keys.
    fn load_application_keys(&self, request: &ApplicationKeysRequest) -> EngineResult<TeamApplicationKeys>;

    /// Adds one member.
    fn add_member(
        &self,
        actor: &str,
        team_id: TeamId,
        request: &MembershipRequest,
        invite_message: Option<&str>,
    ) -> EngineResult<AddedMember>;

    /// Adds a batch of members as one all-or-nothing change.
    ///
    /// Recipients whose contact settings block the actor are reported in
    /// `not_added` while the rest are added; the call still succeeds.
    fn add_members(
        &self,
        actor: &str,
        team_id: TeamId,
        requests: &[MembershipRequest],
        invite_message: Option<&str>,
    ) -> EngineResult<BulkMutationOutcome>;

    /// Invites a list of email addresses in one change.
    ///
    /// Addresses with a pending invite are reported in `already_invited`.
    /// `malformed` is left for the caller to fill.
    fn add_emails(&self, actor: &str, team_id: TeamId, emails: &[String], role: TeamRole)
        -> EngineResult<BulkEmailsResult>;

    /// Removes a member by username.
    fn remove_member(&self, actor: &str, team_id: TeamId, username: &str) -> EngineResult<()>;

    /// Cancels a pending invite sent to an email address.
    fn cancel_email_invite(&self, actor: &str, team_id: TeamId, email: &str, allow_inaction: bool)
        -> EngineResult<()>;

    /// Cancels a pending invite by id.
    fn cancel_invite_by_id(
        &self,
        actor: &str,
        team_id: TeamId,
        invite_id: &str,
        allow_inaction: bool,
    ) -> EngineResult<()>;

    /// Removes several members or invites.
    fn remove_members(&self, actor: &str, team_id: TeamId, removals: &[MemberRemoval])
        -> EngineResult<RemoveMembersResult>;

    /// Changes one member's role.
    fn edit_member(&self, actor: &str, name: &TeamName, edit: &MemberEdit) -> EngineResult<()>;

    /// Changes several members' roles.
    fn edit_members(&self, actor: &str, team_id: TeamId, edits: &[MemberEdit]) -> EngineResult<EditMembersResult>;

    /// Re-adds a member whose account was reset.
    fn re_add_member_after_reset(&self, actor: &str, team_id: TeamId, username: &str) -> EngineResult<()>;

    /// Replaces a bot member's settings.
    fn set_bot_settings(&self, actor: &str, name: &TeamName, username: &str, settings: &BotSettings)
        -> EngineResult<()>;

    /// Reads a bot member's settings.
    fn bot_settings(&self, actor: &str, name: &TeamName, username: &str) -> EngineResult<BotSettings>;

    /// Accepts a seitan invite key.
    fn accept_seitan_token(&self, actor: &str, token: &SeitanToken) -> EngineResult<()>;

    /// Accepts a legacy server-trust invite token.
    fn accept_server_trust_invite(&self, actor: &str, token: &str) -> EngineResult<()>;

    /// Asks to join a team.
    fn request_access(&self, actor: &str, name: &TeamName) -> EngineResult<AccessRequestResult>;

    /// Treats the input as an invite token if it looks like one, otherwise as a team name.
    fn accept_invite_or_request_access(&self, actor: &str, token_or_name: &str) -> EngineResult<AcceptOrRequestResult>;

    /// Lists join requests for teams `actor` administers.
    fn list_requests(&self, actor: &str, name: Option<&TeamName>) -> EngineResult<Vec<JoinRequest>>;

    /// Lists teams `actor` asked to join.
    fn list_my_access_requests(&self, actor: &str, name: Option<&TeamName>) -> EngineResult<Vec<TeamName>>;

    /// Dismisses a join request.
    fn ignore_request(&self, actor: &str, name: &TeamName, username: &str) -> EngineResult<()>;

    /// Creates a shareable invite link.
    fn create_invitelink(
        &self,
        actor: &str,
        name: &TeamName,
        role: TeamRole,
        max_uses: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Invitelink>;

    /// Reads team showcase metadata.
    fn team_showcase(&self, team_id: TeamId) -> EngineResult<TeamShowcase>;

    /// Reads team showcase metadata plus `actor`'s own flag.
    fn team_and_member_showcase(&self, actor: &str, team_id: TeamId) -> EngineResult<TeamAndMemberShowcase>;

    /// Replaces team showcase metadata.
    fn set_team_showcase(&self, actor: &str, team_id: TeamId, showcase: &TeamShowcase) -> EngineResult<()>;

    /// Sets whether `actor` shows the team on their profile.
    fn set_member_showcase(&self, actor: &str, team_id: TeamId, is_showcased: bool) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_team_engine_object_safe(_: &dyn TeamEngine) {}

    #[test]
    fn test_list_query_serde_tag() {
        let q = TeamListQuery::Teammates {
            include_implicit_teams: true,
        };
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["kind"], "teammates");
    }
}
