//! Invite acceptance, invite links and access requests.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{parse_team_name, TeamsGateway};
use crate::context::RequestContext;
use crate::error::{GatewayResult, ValidationError};
use crate::invite::{
    parse_long_duration, AcceptOrRequestResult, AccessRequestResult, Invitelink, JoinRequest, ParsedInvite,
};
use crate::team::{TeamName, TeamRole};
use crate::validation::check_non_empty;

impl TeamsGateway {
    /// `TeamAcceptInvite`.
    ///
    /// Seitan keys and invite links take the seitan path, anything else is a
    /// legacy server-trust token. The token never reaches a log line.
    pub fn team_accept_invite(&self, ctx: &RequestContext, token: &str) -> GatewayResult<()> {
        self.traced(ctx, "TeamAcceptInvite", "", || {
            let actor = &ctx.require_session()?.username;
            check_non_empty("token", token)?;
            match ParsedInvite::from_paste(token) {
                ParsedInvite::Seitan(key) => {
                    debug!("accepting seitan invite");
                    Ok(self.engine.accept_seitan_token(actor, &key)?)
                }
                ParsedInvite::Legacy => {
                    debug!("accepting server-trust invite");
                    Ok(self.engine.accept_server_trust_invite(actor, token.trim())?)
                }
            }
        })
    }

    /// `TeamRequestAccess`.
    pub fn team_request_access(&self, ctx: &RequestContext, name: &str) -> GatewayResult<AccessRequestResult> {
        self.traced(ctx, "TeamRequestAccess", name, || {
            let actor = &ctx.require_session()?.username;
            let team_name = parse_team_name(name)?;
            Ok(self.engine.request_access(actor, &team_name)?)
        })
    }

    /// `TeamAcceptInviteOrRequestAccess`. The input may be a token, so it is not logged.
    pub fn team_accept_invite_or_request_access(
        &self,
        ctx: &RequestContext,
        token_or_name: &str,
    ) -> GatewayResult<AcceptOrRequestResult> {
        self.traced(ctx, "TeamAcceptInviteOrRequestAccess", "", || {
            let actor = &ctx.require_session()?.username;
            check_non_empty("token_or_name", token_or_name)?;
            Ok(self.engine.accept_invite_or_request_access(actor, token_or_name.trim())?)
        })
    }

    /// `TeamListRequests`: join requests for one team, or for every team the caller administers.
    pub fn team_list_requests(&self, ctx: &RequestContext, name: Option<&str>) -> GatewayResult<Vec<JoinRequest>> {
        self.traced(ctx, "TeamListRequests", name.unwrap_or(""), || {
            let actor = &ctx.require_session()?.username;
            let team_name = optional_team_name(name)?;
            Ok(self.engine.list_requests(actor, team_name.as_ref())?)
        })
    }

    /// `TeamListMyAccessRequests`.
    pub fn team_list_my_access_requests(
        &self,
        ctx: &RequestContext,
        name: Option<&str>,
    ) -> GatewayResult<Vec<TeamName>> {
        self.traced(ctx, "TeamListMyAccessRequests", name.unwrap_or(""), || {
            let actor = &ctx.require_session()?.username;
            let team_name = optional_team_name(name)?;
            Ok(self.engine.list_my_access_requests(actor, team_name.as_ref())?)
        })
    }

    /// `TeamIgnoreRequest`.
    pub fn team_ignore_request(&self, ctx: &RequestContext, name: &str, username: &str) -> GatewayResult<()> {
        self.traced(ctx, "TeamIgnoreRequest", &format!("{name},{username}"), || {
            let actor = &ctx.require_session()?.username;
            let team_name = parse_team_name(name)?;
            check_non_empty("username", username)?;
            Ok(self.engine.ignore_request(actor, &team_name, username)?)
        })
    }

    /// `TeamCreateSeitanInvitelink` with an absolute expiry.
    pub fn team_create_seitan_invitelink(
        &self,
        ctx: &RequestContext,
        name: &str,
        role: TeamRole,
        max_uses: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> GatewayResult<Invitelink> {
        self.traced(ctx, "TeamCreateSeitanInvitelink", name, || {
            self.create_invitelink(ctx, name, role, max_uses, expires_at)
        })
    }

    /// `TeamCreateSeitanInvitelinkWithDuration`: `expire_after` such as `"30 D"`
    /// is added to the current time.
    pub fn team_create_seitan_invitelink_with_duration(
        &self,
        ctx: &RequestContext,
        name: &str,
        role: TeamRole,
        max_uses: Option<u32>,
        expire_after: Option<&str>,
    ) -> GatewayResult<Invitelink> {
        let summary = format!("{name},{}", expire_after.unwrap_or(""));
        self.traced(ctx, "TeamCreateSeitanInvitelinkWithDuration", &summary, || {
            ctx.require_session()?;
            let expires_at = match expire_after {
                None => None,
                Some(raw) => {
                    let after = parse_long_duration(raw)?;
                    let at = Utc::now()
                        .checked_add_signed(after)
                        .ok_or_else(|| ValidationError::InvalidDuration {
                            value: raw.to_string(),
                            reason: "expiry out of range".to_string(),
                        })?;
                    Some(at)
                }
            };
            self.create_invitelink(ctx, name, role, max_uses, expires_at)
        })
    }

    fn create_invitelink(
        &self,
        ctx: &RequestContext,
        name: &str,
        role: TeamRole,
        max_uses: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> GatewayResult<Invitelink> {
        let actor = &ctx.require_session()?.username;
        let team_name = parse_team_name(name)?;
        if max_uses == Some(0) {
            return Err(ValidationError::InvalidField {
                field: "max_uses".to_string(),
                reason: "must allow at least one use".to_string(),
            }
            .into());
        }
        Ok(self
            .engine
            .create_invitelink(actor, &team_name, role, max_uses, expires_at)?)
    }
}

fn optional_team_name(name: Option<&str>) -> GatewayResult<Option<TeamName>> {
    match name {
        Some(n) if !n.is_empty() => Ok(Some(parse_team_name(n)?)),
        _ => Ok(None),
    }
}
