//! Team creation and team-scoped mutations.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{parse_team_name, TeamsGateway};
use crate::context::RequestContext;
use crate::error::GatewayResult;
use crate::keys::RotationType;
use crate::team::{TeamId, TeamName, TeamRole, TeamSettings};

/// Result of `TeamCreate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCreateResult {
    pub team_id: TeamId,
    /// The "team created" message was posted.
    pub chat_sent: bool,
    /// The creator is still a member.
    pub creator_added: bool,
}

impl TeamsGateway {
    /// `TeamCreate`: creates a team with default settings.
    pub fn team_create(&self, ctx: &RequestContext, name: &str, join_subteam: bool) -> GatewayResult<TeamCreateResult> {
        self.team_create_with_settings(ctx, name, join_subteam, &TeamSettings::default())
    }

    /// `TeamCreateWithSettings`.
    ///
    /// A subteam creator joins as writer to post the announcement, or as admin
    /// with `join_subteam`, and without it leaves again right after.
    pub fn team_create_with_settings(
        &self,
        ctx: &RequestContext,
        name: &str,
        join_subteam: bool,
        settings: &TeamSettings,
    ) -> GatewayResult<TeamCreateResult> {
        self.traced(ctx, "TeamCreate", name, || {
            let actor = &ctx.require_session()?.username;
            let team_name = parse_team_name(name)?;

            if team_name.is_root_team() {
                let team_id = self.engine.create_root_team(actor, &team_name, settings)?;
                let chat_sent = self.announce(&team_name, actor);
                return Ok(TeamCreateResult {
                    team_id,
                    chat_sent,
                    creator_added: true,
                });
            }

            let add_self_as = if join_subteam { TeamRole::Admin } else { TeamRole::Writer };
            debug!(team = %team_name, role = ?add_self_as, "creating subteam");
            let team_id = self.engine.create_subteam(actor, &team_name, add_self_as)?;
            let chat_sent = self.announce(&team_name, actor);

            let mut res = TeamCreateResult {
                team_id,
                chat_sent,
                creator_added: true,
            };
            if !join_subteam {
                debug!(team = %team_name, "leaving just-created subteam");
                self.engine.leave(actor, &team_name, false)?;
                res.creator_added = false;
            }
            Ok(res)
        })
    }

    fn announce(&self, team: &TeamName, creator: &str) -> bool {
        match self.notifier.announce_team_created(team, creator) {
            Ok(()) => true,
            Err(e) => {
                warn!(team = %team, error = %e, "failed to send team created message");
                false
            }
        }
    }

    /// `TeamLeave`.
    pub fn team_leave(&self, ctx: &RequestContext, name: &str, permanent: bool) -> GatewayResult<()> {
        self.traced(ctx, "TeamLeave", name, || {
            let actor = &ctx.require_session()?.username;
            let team_name = parse_team_name(name)?;
            Ok(self.engine.leave(actor, &team_name, permanent)?)
        })
    }

    /// `TeamRename`: renames a subteam within its parent.
    pub fn team_rename(&self, ctx: &RequestContext, prev_name: &str, new_name: &str) -> GatewayResult<()> {
        self.traced(ctx, "TeamRename", prev_name, || {
            let actor = &ctx.require_session()?.username;
            let prev = parse_team_name(prev_name)?;
            let new = parse_team_name(new_name)?;
            Ok(self.engine.rename_subteam(actor, &prev, &new)?)
        })
    }

    /// `TeamDelete`.
    pub fn team_delete(&self, ctx: &RequestContext, team_id: TeamId) -> GatewayResult<()> {
        self.traced(ctx, "TeamDelete", &team_id.to_string(), || {
            let actor = &ctx.require_session()?.username;
            Ok(self.engine.delete(actor, team_id)?)
        })
    }

    /// `TeamSetSettings`.
    pub fn team_set_settings(&self, ctx: &RequestContext, team_id: TeamId, settings: &TeamSettings) -> GatewayResult<()> {
        self.traced(ctx, "TeamSetSettings", &team_id.to_string(), || {
            let actor = &ctx.require_session()?.username;
            Ok(self.engine.set_settings(actor, team_id, settings)?)
        })
    }

    /// `TeamRotateKey`.
    pub fn team_rotate_key(&self, ctx: &RequestContext, team_id: TeamId, rotation: RotationType) -> GatewayResult<()> {
        self.traced(ctx, "TeamRotateKey", &team_id.to_string(), || {
            let actor = &ctx.require_session()?.username;
            Ok(self.engine.rotate_key(actor, team_id, rotation)?)
        })
    }
}
