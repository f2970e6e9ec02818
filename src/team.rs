//! Team identity, naming, roles and detail snapshots.
//!
//! These are the values the gateway passes to and receives from the team
//! engine. The engine owns their meaning; the gateway only needs enough
//! structure to shape requests (parse names, filter inactive members, log).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Maximum length of a full dotted team name.
pub const MAX_TEAM_NAME_LEN: usize = 255;

/// Maximum length of a single team name component.
pub const MAX_TEAM_NAME_PART_LEN: usize = 16;

/// Globally unique, stable team identifier.
///
/// # Examples
///
/// ```
/// use teamgate::TeamId;
///
/// let id = TeamId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(Uuid);

impl TeamId {
    /// Creates a new random team ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a team ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for TeamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl From<Uuid> for TeamId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A parsed, dotted team name such as `acme.eng.infra`.
///
/// Names are case-insensitive and stored lowercased. The first component
/// names the root team; every further component names a subteam.
///
/// # Examples
///
/// ```
/// use teamgate::TeamName;
///
/// let name: TeamName = "Acme.Eng".parse().unwrap();
/// assert_eq!(name.to_string(), "acme.eng");
/// assert_eq!(name.depth(), 2);
/// assert!(!name.is_root_team());
/// assert_eq!(name.parent().unwrap().to_string(), "acme");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TeamName {
    parts: Vec<String>,
}

impl TeamName {
    /// Parses a dotted team name.
    ///
    /// An empty string parses to the zero-depth name; callers that need a
    /// real team reject it via [`TeamName::depth`].
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self { parts: Vec::new() });
        }
        if trimmed.len() > MAX_TEAM_NAME_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "team name".to_string(),
                max_length: MAX_TEAM_NAME_LEN,
            });
        }

        let mut parts = Vec::new();
        for part in trimmed.split('.') {
            let part = part.to_ascii_lowercase();
            if let Err(reason) = check_part(&part) {
                return Err(ValidationError::InvalidTeamName {
                    name: s.to_string(),
                    reason,
                });
            }
            parts.push(part);
        }
        Ok(Self { parts })
    }

    /// Number of components; zero for the empty name.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    /// Returns true for a single-component name.
    #[must_use]
    pub fn is_root_team(&self) -> bool {
        self.parts.len() == 1
    }

    /// Returns the root team name.
    #[must_use]
    pub fn root(&self) -> Option<Self> {
        self.parts.first().map(|p| Self { parts: vec![p.clone()] })
    }

    /// Returns the parent name, or `None` for root and empty names.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.parts.len() < 2 {
            return None;
        }
        Some(Self {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
        })
    }

    /// Returns the last component.
    #[must_use]
    pub fn last_part(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// Returns true if `self` is nested somewhere below `other`.
    #[must_use]
    pub fn is_descendant_of(&self, other: &Self) -> bool {
        self.parts.len() > other.parts.len() && self.parts.starts_with(&other.parts)
    }

    /// Appends a component, producing a subteam name.
    pub fn child(&self, part: &str) -> Result<Self, ValidationError> {
        let part = part.to_ascii_lowercase();
        check_part(&part).map_err(|reason| ValidationError::InvalidTeamName {
            name: format!("{self}.{part}"),
            reason,
        })?;
        let mut parts = self.parts.clone();
        parts.push(part);
        Ok(Self { parts })
    }
}

fn check_part(part: &str) -> Result<(), String> {
    if part.is_empty() {
        return Err("empty name component".to_string());
    }
    if part.len() > MAX_TEAM_NAME_PART_LEN {
        return Err(format!("component '{part}' longer than {MAX_TEAM_NAME_PART_LEN} characters"));
    }
    if part.starts_with('_') {
        return Err(format!("component '{part}' cannot start with an underscore"));
    }
    if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("component '{part}' has invalid characters"));
    }
    Ok(())
}

impl fmt::Display for TeamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

impl FromStr for TeamName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TeamName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TeamName> for String {
    fn from(name: TeamName) -> Self {
        name.to_string()
    }
}

/// Role of a member within a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    #[default]
    None,
    RestrictedBot,
    Bot,
    Reader,
    Writer,
    Admin,
    Owner,
}

impl TeamRole {
    /// Returns true for the two bot roles.
    #[must_use]
    pub const fn is_bot(self) -> bool {
        matches!(self, Self::Bot | Self::RestrictedBot)
    }

    /// Returns true for roles allowed to change membership.
    #[must_use]
    pub const fn is_admin_or_above(self) -> bool {
        matches!(self, Self::Admin | Self::Owner)
    }
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::RestrictedBot => "restrictedbot",
            Self::Bot => "bot",
            Self::Reader => "reader",
            Self::Writer => "writer",
            Self::Admin => "admin",
            Self::Owner => "owner",
        };
        f.write_str(s)
    }
}

/// Team-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamSettings {
    /// Anyone may join without an invite.
    pub open: bool,
    /// Role granted to users joining an open team.
    pub join_as: TeamRole,
}

/// Activity status of a team member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Active,
    /// The account was reset and has not been re-added.
    Reset,
    Deleted,
}

/// One member as reported in a team snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMemberDetails {
    pub username: String,
    pub full_name: Option<String>,
    pub role: TeamRole,
    pub status: MemberStatus,
}

impl TeamMemberDetails {
    /// Returns true unless the member was reset or deleted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

/// Members grouped by role.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamMembersByRole {
    pub owners: Vec<TeamMemberDetails>,
    pub admins: Vec<TeamMemberDetails>,
    pub writers: Vec<TeamMemberDetails>,
    pub readers: Vec<TeamMemberDetails>,
    pub bots: Vec<TeamMemberDetails>,
    pub restricted_bots: Vec<TeamMemberDetails>,
}

impl TeamMembersByRole {
    /// Total number of members across all roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
            + self.admins.len()
            + self.writers.len()
            + self.readers.len()
            + self.bots.len()
            + self.restricted_bots.len()
    }

    /// Returns true when no role has members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An invite that has not been accepted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvite {
    pub id: String,
    pub role: TeamRole,
    /// Email address, phone number or other assertion the invite was sent to.
    pub target: String,
}

/// Snapshot of a team returned by `TeamGet`/`TeamGetByID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDetails {
    pub id: TeamId,
    pub name: TeamName,
    pub settings: TeamSettings,
    pub members: TeamMembersByRole,
    pub pending_invites: Vec<PendingInvite>,
}

impl TeamDetails {
    /// Drops reset and deleted users from the writer and reader lists.
    pub fn filter_inactive_writers_and_readers(&mut self) {
        self.members.writers.retain(TeamMemberDetails::is_active);
        self.members.readers.retain(TeamMemberDetails::is_active);
    }
}

/// A team the caller belongs to, with the caller's role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedMembership {
    pub team_id: TeamId,
    pub team_name: TeamName,
    pub username: String,
    pub role: TeamRole,
    pub member_count: usize,
    pub is_open: bool,
    pub is_implicit: bool,
}

/// Team id paired with its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamIdAndName {
    pub id: TeamId,
    pub name: TeamName,
}

/// What the caller may do in a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamOperation {
    pub manage_members: bool,
    pub manage_subteams: bool,
    pub create_channel: bool,
    pub chat: bool,
    pub delete_team: bool,
    pub rename_team: bool,
    pub leave_team: bool,
    pub change_open_team: bool,
    pub set_team_showcase: bool,
    pub set_member_showcase: bool,
    pub manage_bots: bool,
}

impl TeamOperation {
    /// Permission snapshot implied by a role.
    #[must_use]
    pub fn for_role(role: TeamRole, is_root: bool) -> Self {
        let admin = role.is_admin_or_above();
        let writer = role >= TeamRole::Writer;
        let member = role >= TeamRole::Reader;
        Self {
            manage_members: admin,
            manage_subteams: admin,
            create_channel: writer,
            chat: member || role.is_bot(),
            delete_team: role == TeamRole::Owner || (admin && !is_root),
            rename_team: admin && !is_root,
            leave_team: member,
            change_open_team: admin,
            set_team_showcase: admin,
            set_member_showcase: member,
            manage_bots: admin,
        }
    }
}

/// Public-facing display metadata for a team.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamShowcase {
    pub is_showcased: bool,
    pub description: Option<String>,
    pub any_member_showcase: bool,
}

/// Team showcase plus the caller's own showcase flag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamAndMemberShowcase {
    pub team: TeamShowcase,
    pub is_member_showcased: bool,
}
