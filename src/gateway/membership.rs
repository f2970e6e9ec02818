//! Membership commands.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::summary::{batch, opt};
use super::{parse_team_name, TeamsGateway};
use crate::context::RequestContext;
use crate::error::GatewayResult;
use crate::membership::{
    AddMemberResult, BotSettings, BulkAddResult, BulkEmailsResult, EditMembersResult, MemberEdit, MemberRemoval, MembershipRequest,
    RemovalSelector, RemoveMembersResult,
};
use crate::notify::{ConversationKind, NotificationTask};
use crate::team::{TeamId, TeamRole};
use crate::validation::{check_optional_text, check_removal_selector, single_add_assertion, RemovalPath};

/// Arguments of `TeamAddMember`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAddMemberArgs {
    pub team_id: TeamId,
    pub username: String,
    /// Invite by email instead of username. Wins over `phone`.
    pub email: Option<String>,
    /// Invite by phone number instead of username.
    pub phone: Option<String>,
    pub role: TeamRole,
    pub bot_settings: Option<BotSettings>,
    pub invite_message: Option<String>,
    pub send_chat_notification: bool,
}

impl TeamAddMemberArgs {
    /// Adds `username` with `role`, no invite message, no notification.
    #[must_use]
    pub fn new(team_id: TeamId, username: impl Into<String>, role: TeamRole) -> Self {
        Self {
            team_id,
            username: username.into(),
            email: None,
            phone: None,
            role,
            bot_settings: None,
            invite_message: None,
            send_chat_notification: false,
        }
    }
}

impl TeamsGateway {
    /// `TeamAddMember`: adds one member by username, email or phone.
    ///
    /// With `send_chat_notification`, a non-invited result schedules one
    /// welcome message and sets `chat_sending`.
    pub fn team_add_member(&self, ctx: &RequestContext, args: &TeamAddMemberArgs) -> GatewayResult<AddMemberResult> {
        let summary = format!(
            "{},username={:?},email={:?},phone={:?}",
            args.team_id,
            args.username,
            opt(args.email.as_deref()),
            opt(args.phone.as_deref())
        );
        self.traced(ctx, "TeamAddMember", &summary, || {
            let actor = &ctx.require_session()?.username;
            let assertion = single_add_assertion(&args.username, args.email.as_deref(), args.phone.as_deref())?;
            check_optional_text("invite_message", args.invite_message.as_deref())?;

            let mut request = MembershipRequest::new(assertion, args.role);
            request.bot_settings.clone_from(&args.bot_settings);
            let added = self
                .engine
                .add_member(actor, args.team_id, &request, args.invite_message.as_deref())?;

            let mut result = AddMemberResult {
                username: added.username.clone(),
                invited: added.was_invited,
                chat_sending: false,
            };
            if !args.send_chat_notification || added.was_invited {
                return Ok(result);
            }
            if let Some(username) = added.active_username() {
                result.chat_sending = self.notifications.schedule(NotificationTask {
                    team_id: args.team_id,
                    recipient_username: username.to_string(),
                    role: args.role,
                    conversation_kind: ConversationKind::Team,
                });
            }
            Ok(result)
        })
    }

    /// `TeamAddMembers`: adds every assertion with the same role.
    pub fn team_add_members(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        assertions: &[String],
        role: TeamRole,
        invite_message: Option<&str>,
        send_chat_notification: bool,
    ) -> GatewayResult<BulkAddResult> {
        let requests: Vec<MembershipRequest> = assertions
            .iter()
            .map(|a| MembershipRequest::new(a.clone(), role))
            .collect();
        self.team_add_members_multi_role(ctx, team_id, &requests, invite_message, send_chat_notification)
    }

    /// `TeamAddMembersMultiRole`: adds a batch where each entry has its own role.
    pub fn team_add_members_multi_role(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        requests: &[MembershipRequest],
        invite_message: Option<&str>,
        send_chat_notification: bool,
    ) -> GatewayResult<BulkAddResult> {
        let summary = format!("{team_id}, {}", batch(requests, |r| r.assertion.clone()));
        self.traced(ctx, "TeamAddMembers", &summary, || {
            self.bulk
                .add_members(ctx, team_id, requests, invite_message, send_chat_notification)
        })
    }

    /// `TeamAddEmailsBulk`: invites a pasted list of addresses. No welcome
    /// messages go out since nobody joins right away.
    pub fn team_add_emails_bulk(
        &self,
        ctx: &RequestContext,
        name: &str,
        emails: &str,
        role: TeamRole,
    ) -> GatewayResult<BulkEmailsResult> {
        self.traced(ctx, "TeamAddEmailsBulk", &format!("{name}, {role}"), || {
            let team_name = parse_team_name(name)?;
            self.bulk.add_emails(ctx, &team_name, emails, role)
        })
    }

    /// `TeamRemoveMember`: removes a member, or cancels an invite by email or id.
    ///
    /// `allow_inaction` only applies to the invite paths.
    pub fn team_remove_member(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        selector: &RemovalSelector,
        allow_inaction: bool,
    ) -> GatewayResult<()> {
        let summary = format!(
            "{team_id}, u:{:?}, e:{:?}, i:{:?}, a:{allow_inaction}",
            opt(selector.username.as_deref()),
            opt(selector.email.as_deref()),
            opt(selector.invite_id.as_deref()),
        );
        self.traced(ctx, "TeamRemoveMember", &summary, || {
            let actor = &ctx.require_session()?.username;
            match check_removal_selector(selector)? {
                RemovalPath::Email(email) => {
                    debug!(team_id = %team_id, "cancelling email invite");
                    Ok(self.engine.cancel_email_invite(actor, team_id, email, allow_inaction)?)
                }
                RemovalPath::InviteId(invite_id) => {
                    debug!(team_id = %team_id, invite_id, "cancelling invite by id");
                    Ok(self.engine.cancel_invite_by_id(actor, team_id, invite_id, allow_inaction)?)
                }
                RemovalPath::Username(username) => {
                    debug!(team_id = %team_id, username, "removing member");
                    Ok(self.engine.remove_member(actor, team_id, username)?)
                }
            }
        })
    }

    /// `TeamRemoveMembers`. An empty list succeeds without touching the engine.
    pub fn team_remove_members(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        removals: &[MemberRemoval],
    ) -> GatewayResult<RemoveMembersResult> {
        let summary = format!("{team_id}, {}", batch(removals, |r| r.label().to_string()));
        self.traced(ctx, "TeamRemoveMembers", &summary, || {
            self.bulk.remove_members(ctx, team_id, removals)
        })
    }

    /// `TeamEditMember`.
    pub fn team_edit_member(&self, ctx: &RequestContext, name: &str, edit: &MemberEdit) -> GatewayResult<()> {
        let summary = format!("{name},{},{:?}", edit.username, edit.role);
        self.traced(ctx, "TeamEditMember", &summary, || {
            let actor = &ctx.require_session()?.username;
            let team_name = parse_team_name(name)?;
            Ok(self.engine.edit_member(actor, &team_name, edit)?)
        })
    }

    /// `TeamEditMembers`. An empty list succeeds without touching the engine.
    pub fn team_edit_members(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        edits: &[MemberEdit],
    ) -> GatewayResult<EditMembersResult> {
        let summary = format!("{team_id}, {}", batch(edits, |e| format!("{}, {:?}", e.username, e.role)));
        self.traced(ctx, "TeamEditMembers", &summary, || self.bulk.edit_members(ctx, team_id, edits))
    }

    /// `TeamSetBotSettings`.
    pub fn team_set_bot_settings(
        &self,
        ctx: &RequestContext,
        name: &str,
        username: &str,
        settings: &BotSettings,
    ) -> GatewayResult<()> {
        self.traced(ctx, "TeamSetBotSettings", &format!("{name},{username}"), || {
            let actor = &ctx.require_session()?.username;
            let team_name = parse_team_name(name)?;
            Ok(self.engine.set_bot_settings(actor, &team_name, username, settings)?)
        })
    }

    /// `TeamGetBotSettings`.
    pub fn team_get_bot_settings(&self, ctx: &RequestContext, name: &str, username: &str) -> GatewayResult<BotSettings> {
        self.traced(ctx, "TeamGetBotSettings", &format!("{name},{username}"), || {
            let actor = &ctx.require_session()?.username;
            let team_name = parse_team_name(name)?;
            Ok(self.engine.bot_settings(actor, &team_name, username)?)
        })
    }

    /// `TeamReAddMemberAfterReset`.
    pub fn team_re_add_member_after_reset(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        username: &str,
    ) -> GatewayResult<()> {
        self.traced(ctx, "TeamReAddMemberAfterReset", &team_id.to_string(), || {
            let actor = &ctx.require_session()?.username;
            Ok(self.engine.re_add_member_after_reset(actor, team_id, username)?)
        })
    }
}
