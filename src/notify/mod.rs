//! Welcome notifications sent after members are added.
//!
//! Delivery is fire-and-forget: the gateway hands tasks to a worker pool and
//! returns to its caller without waiting. A failed delivery is logged and
//! never retried.

/// Worker pool that delivers notification tasks.
pub mod dispatcher;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;
use crate::membership::{AddedMember, MembershipRequest};
use crate::team::{TeamId, TeamName, TeamRole};

pub use dispatcher::{NotificationConfig, NotificationSystem};

/// Kind of conversation a welcome message is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    #[default]
    Team,
    ImplicitTeam,
}

/// One welcome message to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTask {
    pub team_id: TeamId,
    pub recipient_username: String,
    pub role: TeamRole,
    pub conversation_kind: ConversationKind,
}

/// Chat side of the system.
///
/// Implementations are called from worker threads and must be thread-safe.
pub trait ChatNotifier: Send + Sync {
    /// Posts a welcome message for a newly added member.
    fn send_welcome(&self, task: &NotificationTask) -> Result<(), NotifyError>;

    /// Posts the "team created" system message.
    fn announce_team_created(&self, team: &TeamName, creator: &str) -> Result<(), NotifyError>;
}

/// Builds one task per added member that is active right away.
///
/// Invited entries and entries without a username are skipped. Roles are
/// looked up by assertion; an entry that matches no request is skipped too.
#[must_use]
pub fn welcome_tasks(team_id: TeamId, requests: &[MembershipRequest], added: &[AddedMember]) -> Vec<NotificationTask> {
    added
        .iter()
        .filter_map(|entry| {
            let username = entry.active_username()?;
            let request = requests.iter().find(|r| r.assertion == entry.assertion)?;
            Some(NotificationTask {
                team_id,
                recipient_username: username.to_string(),
                role: request.role,
                conversation_kind: ConversationKind::Team,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(assertion: &str, username: Option<&str>, was_invited: bool) -> AddedMember {
        AddedMember {
            assertion: assertion.to_string(),
            username: username.map(str::to_string),
            was_invited,
        }
    }

    #[test]
    fn test_welcome_tasks_skip_invites() {
        let team_id = TeamId::new();
        let requests = vec![
            MembershipRequest::new("alice", TeamRole::Writer),
            MembershipRequest::new("email:c@example.com", TeamRole::Reader),
            MembershipRequest::new("dave", TeamRole::Admin),
        ];
        let outcome = vec![
            added("alice", Some("alice"), false),
            added("email:c@example.com", None, true),
            added("dave", Some("dave"), true),
        ];
        let tasks = welcome_tasks(team_id, &requests, &outcome);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].recipient_username, "alice");
        assert_eq!(tasks[0].role, TeamRole::Writer);
    }

    #[test]
    fn test_roles_follow_assertion_not_position() {
        let team_id = TeamId::new();
        let requests = vec![
            MembershipRequest::new("bob", TeamRole::Reader),
            MembershipRequest::new("alice", TeamRole::Admin),
        ];
        let outcome = vec![added("alice", Some("alice"), false)];
        let tasks = welcome_tasks(team_id, &requests, &outcome);
        assert_eq!(tasks[0].role, TeamRole::Admin);
    }
}
