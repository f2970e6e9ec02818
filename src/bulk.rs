//! Bulk membership mutations.
//!
//! Adds are all-or-nothing on the engine side; the one tolerated partial
//! outcome is recipients blocked by their contact settings, which the engine
//! reports in `not_added` while the call still succeeds. Adds reject an empty
//! batch. Edits and removals treat an empty batch as a no-op and never call
//! the engine for it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::engine::TeamEngine;
use crate::error::{GatewayError, GatewayResult, ValidationError};
use crate::membership::{
    BulkAddResult, BulkEmailsResult, EditMembersResult, MemberEdit, MemberRemoval, MembershipRequest, RemoveMembersResult,
};
use crate::notify::{welcome_tasks, NotificationSystem};
use crate::team::{TeamId, TeamName, TeamRole};
use crate::validation::{check_non_empty, check_non_empty_batch, check_optional_text, split_email_list};

/// Runs batch adds, edits and removals against the engine.
#[derive(Clone)]
pub struct BulkMutationController {
    engine: Arc<dyn TeamEngine>,
    notifications: Arc<NotificationSystem>,
}

impl BulkMutationController {
    #[must_use]
    pub fn new(engine: Arc<dyn TeamEngine>, notifications: Arc<NotificationSystem>) -> Self {
        Self { engine, notifications }
    }

    /// Adds a batch of members.
    ///
    /// The batch is validated before the session check. On success, welcome
    /// notifications for immediately active members are queued when `notify`
    /// is set; the result only says they were scheduled.
    pub fn add_members(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        requests: &[MembershipRequest],
        invite_message: Option<&str>,
        notify: bool,
    ) -> GatewayResult<BulkAddResult> {
        check_non_empty_batch(requests)?;
        for request in requests {
            check_non_empty("assertion", &request.assertion)?;
        }
        check_optional_text("invite_message", invite_message)?;
        let actor = &ctx.require_session()?.username;

        let outcome = self
            .engine
            .add_members(actor, team_id, requests, invite_message)
            .map_err(|e| GatewayError::Engine(e.into_exportable()))?;

        if outcome.accounted() != requests.len() {
            warn!(
                team_id = %team_id,
                requested = requests.len(),
                accounted = outcome.accounted(),
                "engine outcome does not account for every request"
            );
        }
        if !outcome.not_added.is_empty() {
            debug!(team_id = %team_id, not_added = outcome.not_added.len(), "some recipients restrict contact");
        }

        let notifications_scheduled = notify && {
            let tasks = welcome_tasks(team_id, requests, &outcome.added);
            let count = tasks.len();
            debug!(team_id = %team_id, count, "scheduling team welcome messages");
            self.notifications.schedule_all(tasks) == count
        };

        Ok(BulkAddResult {
            not_added: outcome.not_added,
            notifications_scheduled,
        })
    }

    /// Invites every address in a pasted list.
    ///
    /// Entries that are not email addresses come back in `malformed`; if none
    /// parse, the engine is not called. A list with no entries at all is
    /// rejected like an empty add batch.
    pub fn add_emails(
        &self,
        ctx: &RequestContext,
        team: &TeamName,
        raw: &str,
        role: TeamRole,
    ) -> GatewayResult<BulkEmailsResult> {
        let (emails, malformed) = split_email_list(raw);
        if emails.is_empty() && malformed.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        let actor = &ctx.require_session()?.username;
        if emails.is_empty() {
            return Ok(BulkEmailsResult {
                malformed,
                ..BulkEmailsResult::default()
            });
        }

        let team_id = self.engine.resolve_name(team)?;
        let mut result = self.engine.add_emails(actor, team_id, &emails, role)?;
        if !malformed.is_empty() {
            debug!(team = %team, malformed = malformed.len(), "skipping malformed addresses");
        }
        result.malformed = malformed;
        Ok(result)
    }

    /// Edits several members' roles. An empty batch is a no-op, even without a session.
    pub fn edit_members(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        edits: &[MemberEdit],
    ) -> GatewayResult<EditMembersResult> {
        if edits.is_empty() {
            return Ok(EditMembersResult::default());
        }
        let actor = &ctx.require_session()?.username;
        Ok(self.engine.edit_members(actor, team_id, edits)?)
    }

    /// Removes several members or invites. An empty batch is a no-op, even without a session.
    pub fn remove_members(
        &self,
        ctx: &RequestContext,
        team_id: TeamId,
        removals: &[MemberRemoval],
    ) -> GatewayResult<RemoveMembersResult> {
        if removals.is_empty() {
            return Ok(RemoveMembersResult::default());
        }
        let actor = &ctx.require_session()?.username;
        Ok(self.engine.remove_members(actor, team_id, removals)?)
    }
}

impl std::fmt::Debug for BulkMutationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkMutationController")
            .field("notifications", &self.notifications)
            .finish_non_exhaustive()
    }
}
