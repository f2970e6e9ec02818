//! Read-side commands, showcase and application keys.

use tracing::debug;

use super::{parse_team_name, TeamsGateway, APPLICATION_KEYS_CACHE_OP};
use crate::cache::CacheKeyed;
use crate::context::RequestContext;
use crate::engine::TeamListQuery;
use crate::error::{GatewayError, GatewayResult};
use crate::keys::{ApplicationKeysRequest, TeamApplicationKeys};
use crate::poll::poll_until_success;
use crate::team::{
    AnnotatedMembership, TeamAndMemberShowcase, TeamDetails, TeamId, TeamIdAndName, TeamMemberDetails, TeamName,
    TeamOperation, TeamShowcase,
};

impl TeamsGateway {
    /// `TeamGet`. Open teams come back without reset or deleted writers and readers.
    pub fn team_get(&self, ctx: &RequestContext, name: &str) -> GatewayResult<TeamDetails> {
        self.traced(ctx, "TeamGet", name, || {
            let team_name = parse_team_name(name)?;
            Ok(filter_open(self.engine.details(&team_name)?))
        })
    }

    /// `TeamGetByID`.
    pub fn team_get_by_id(&self, ctx: &RequestContext, team_id: TeamId) -> GatewayResult<TeamDetails> {
        self.traced(ctx, "TeamGetByID", &team_id.to_string(), || {
            Ok(filter_open(self.engine.details_by_id(team_id)?))
        })
    }

    /// `TeamGetMembers`.
    pub fn team_get_members(&self, ctx: &RequestContext, name: &str) -> GatewayResult<Vec<TeamMemberDetails>> {
        self.traced(ctx, "TeamGetMembers", name, || {
            let team_name = parse_team_name(name)?;
            let team_id = self.engine.resolve_name(&team_name)?;
            Ok(self.engine.members(team_id)?)
        })
    }

    /// `TeamGetMembersByID`.
    pub fn team_get_members_by_id(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
    ) -> GatewayResult<Vec<TeamMemberDetails>> {
        self.traced(ctx, "TeamGetMembersByID", &team_id.to_string(), || {
            Ok(self.engine.members(team_id)?)
        })
    }

    /// `TeamImplicitAdmins`: admins of ancestor teams.
    pub fn team_implicit_admins(&self, ctx: &RequestContext, name: &str) -> GatewayResult<Vec<TeamMemberDetails>> {
        self.traced(ctx, "TeamImplicitAdmins", name, || {
            let team_name = parse_team_name(name)?;
            let team_id = self.engine.resolve_name(&team_name)?;
            Ok(self.engine.implicit_admins(team_id)?)
        })
    }

    /// `TeamListUnverified`. An empty assertion means the caller.
    pub fn team_list_unverified(
        &self,
        ctx: &RequestContext,
        user_assertion: &str,
        include_implicit_teams: bool,
    ) -> GatewayResult<Vec<AnnotatedMembership>> {
        self.traced(ctx, "TeamListUnverified", user_assertion, || {
            let actor = actor_or_assertion(ctx, user_assertion)?;
            let query = TeamListQuery::Unverified {
                user_assertion: user_assertion.to_string(),
                include_implicit_teams,
            };
            Ok(self.engine.list_teams(actor, &query)?)
        })
    }

    /// `TeamListVerified`. An empty assertion means the caller.
    pub fn team_list_verified(
        &self,
        ctx: &RequestContext,
        user_assertion: &str,
        include_implicit_teams: bool,
    ) -> GatewayResult<Vec<AnnotatedMembership>> {
        self.traced(ctx, "TeamListVerified", user_assertion, || {
            let actor = actor_or_assertion(ctx, user_assertion)?;
            let query = TeamListQuery::Verified {
                user_assertion: user_assertion.to_string(),
                include_implicit_teams,
            };
            Ok(self.engine.list_teams(actor, &query)?)
        })
    }

    /// `TeamListTeammates`.
    pub fn team_list_teammates(
        &self,
        ctx: &RequestContext,
        include_implicit_teams: bool,
    ) -> GatewayResult<Vec<AnnotatedMembership>> {
        self.traced(ctx, "TeamListTeammates", "", || {
            let actor = &ctx.require_session()?.username;
            let query = TeamListQuery::Teammates { include_implicit_teams };
            Ok(self.engine.list_teams(actor, &query)?)
        })
    }

    /// `TeamGetSubteams`.
    pub fn team_get_subteams(&self, ctx: &RequestContext, name: &str) -> GatewayResult<Vec<TeamIdAndName>> {
        self.traced(ctx, "TeamGetSubteams", name, || {
            let team_name = parse_team_name(name)?;
            Ok(self.engine.list_subteams(&team_name)?)
        })
    }

    /// `GetTeamID`.
    pub fn get_team_id(&self, ctx: &RequestContext, name: &str) -> GatewayResult<TeamId> {
        self.traced(ctx, "GetTeamID", name, || {
            let team_name = parse_team_name(name)?;
            Ok(self.engine.resolve_name(&team_name)?)
        })
    }

    /// `GetTeamName`.
    pub fn get_team_name(&self, ctx: &RequestContext, team_id: TeamId) -> GatewayResult<TeamName> {
        self.traced(ctx, "GetTeamName", &team_id.to_string(), || {
            Ok(self.engine.resolve_id(team_id)?)
        })
    }

    /// `GetTeamRootID`: id of the root team above `team_id`, or `team_id` itself.
    pub fn get_team_root_id(&self, ctx: &RequestContext, team_id: TeamId) -> GatewayResult<TeamId> {
        self.traced(ctx, "GetTeamRootID", &team_id.to_string(), || {
            let name = self.engine.resolve_id(team_id)?;
            match name.root() {
                Some(root) if root != name => Ok(self.engine.resolve_name(&root)?),
                _ => Ok(team_id),
            }
        })
    }

    /// `CanUserPerform`.
    ///
    /// Failed permission checks are retried with the configured delay until
    /// one succeeds or the request is cancelled.
    pub fn can_user_perform(&self, ctx: &RequestContext, name: &str) -> GatewayResult<TeamOperation> {
        self.traced(ctx, "CanUserPerform", name, || {
            let actor = &ctx.require_session()?.username;
            let team_name = parse_team_name(name)?;
            poll_until_success(&self.cfg.can_perform_retry, ctx.cancel_token(), || {
                self.engine.can_user_perform(actor, &team_name)
            })
        })
    }

    /// `GetTeamShowcase`.
    pub fn get_team_showcase(&self, ctx: &RequestContext, team_id: TeamId) -> GatewayResult<TeamShowcase> {
        self.traced(ctx, "GetTeamShowcase", &team_id.to_string(), || {
            Ok(self.engine.team_showcase(team_id)?)
        })
    }

    /// `GetTeamAndMemberShowcase`.
    pub fn get_team_and_member_showcase(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
    ) -> GatewayResult<TeamAndMemberShowcase> {
        self.traced(ctx, "GetTeamAndMemberShowcase", &team_id.to_string(), || {
            let actor = &ctx.require_session()?.username;
            Ok(self.engine.team_and_member_showcase(actor, team_id)?)
        })
    }

    /// `SetTeamShowcase`.
    pub fn set_team_showcase(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        showcase: &TeamShowcase,
    ) -> GatewayResult<()> {
        self.traced(ctx, "SetTeamShowcase", &team_id.to_string(), || {
            let actor = &ctx.require_session()?.username;
            Ok(self.engine.set_team_showcase(actor, team_id, showcase)?)
        })
    }

    /// `SetTeamMemberShowcase`.
    pub fn set_team_member_showcase(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        is_showcased: bool,
    ) -> GatewayResult<()> {
        self.traced(ctx, "SetTeamMemberShowcase", &team_id.to_string(), || {
            let actor = &ctx.require_session()?.username;
            Ok(self.engine.set_member_showcase(actor, team_id, is_showcased)?)
        })
    }

    /// `LoadTeamPlusApplicationKeys`, served through the offline cache.
    ///
    /// Requests that differ only in session id, refresh hints or the legacy
    /// key flag share one cache entry.
    pub fn load_team_plus_application_keys(
        &self,
        ctx: &RequestContext,
        request: &ApplicationKeysRequest,
    ) -> GatewayResult<TeamApplicationKeys> {
        let ctx = ctx.clone().with_tag("LTPAK");
        let summary = format!("{},{:?}", request.team_id, request.application);
        self.traced(&ctx, "LoadTeamPlusApplicationKeys", &summary, || {
            let key = request
                .cache_key()
                .map_err(|e| GatewayError::internal(format!("cache key: {e}")))?;
            debug!(key = ?key, availability = ?request.availability, "loading application keys");
            self.cache.serve(
                APPLICATION_KEYS_CACHE_OP,
                self.cfg.application_keys_cache_version,
                key,
                request.availability,
                |_| self.engine.load_application_keys(request),
            )
        })
    }
}

fn filter_open(mut details: TeamDetails) -> TeamDetails {
    if details.settings.open {
        details.filter_inactive_writers_and_readers();
    }
    details
}

fn actor_or_assertion<'a>(ctx: &'a RequestContext, user_assertion: &'a str) -> GatewayResult<&'a str> {
    if user_assertion.is_empty() {
        return Ok(ctx.require_session()?.username.as_str());
    }
    Ok(ctx.session().map_or(user_assertion, |s| s.username.as_str()))
}
