//! In-memory team engine.
//!
//! A thread-safe reference implementation of [`TeamEngine`] intended for
//! embedded usage and tests. It keeps a small user directory and a team table
//! behind one `RwLock`, counts calls per operation, and supports failure
//! injection for restricted contacts, identify failures and flaky permission
//! checks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::engine::{TeamEngine, TeamListQuery};
use crate::error::{EngineError, EngineResult, IdentifyProblem};
use crate::invite::{
    AcceptOrRequestResult, AccessRequestResult, Invitelink, JoinRequest, ParsedInvite, SeitanToken,
};
use crate::keys::{ApplicationKey, ApplicationKeysRequest, RotationType, TeamApplicationKeys};
use crate::membership::{
    AddedMember, BotSettings, BulkEmailsResult, BulkMutationOutcome, EditMembersResult, MemberEdit, MemberFailure, MemberRemoval,
    MembershipRequest, RemoveMembersResult,
};
use crate::team::{
    AnnotatedMembership, MemberStatus, PendingInvite, TeamAndMemberShowcase, TeamDetails, TeamId, TeamIdAndName,
    TeamMemberDetails, TeamMembersByRole, TeamName, TeamOperation, TeamRole, TeamSettings, TeamShowcase,
};

/// Base URL of invite links minted by this engine.
pub const INVITELINK_BASE: &str = "https://teams.invalid/team-invite-link";

/// A user known to the in-memory directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub full_name: Option<String>,
    pub status: MemberStatus,
    /// Only existing teammates may add this user to a team.
    pub restricts_contact: bool,
}

impl UserRecord {
    /// An active user with no restrictions.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            full_name: None,
            status: MemberStatus::Active,
            restricts_contact: false,
        }
    }
}

#[derive(Debug, Clone)]
struct MemberRecord {
    role: TeamRole,
    bot_settings: Option<BotSettings>,
    showcased: bool,
}

#[derive(Debug, Clone)]
struct InviteRecord {
    id: String,
    role: TeamRole,
    target: String,
}

#[derive(Debug, Clone)]
struct LinkRecord {
    team_id: TeamId,
    role: TeamRole,
    uses_left: Option<u32>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct TeamRecord {
    id: TeamId,
    name: TeamName,
    settings: TeamSettings,
    members: BTreeMap<String, MemberRecord>,
    invites: Vec<InviteRecord>,
    requests: Vec<JoinRequest>,
    showcase: TeamShowcase,
    key_generation: u32,
    implicit: bool,
}

impl TeamRecord {
    fn new(name: TeamName, settings: TeamSettings) -> Self {
        Self {
            id: TeamId::new(),
            name,
            settings,
            members: BTreeMap::new(),
            invites: Vec::new(),
            requests: Vec::new(),
            showcase: TeamShowcase::default(),
            key_generation: 1,
            implicit: false,
        }
    }

    fn role_of(&self, username: &str) -> TeamRole {
        self.members.get(username).map_or(TeamRole::None, |m| m.role)
    }

    fn insert_member(&mut self, username: &str, role: TeamRole, bot_settings: Option<BotSettings>) {
        self.members.insert(
            username.to_string(),
            MemberRecord {
                role,
                bot_settings,
                showcased: false,
            },
        );
    }
}

#[derive(Debug, Default)]
struct EngineState {
    users: HashMap<String, UserRecord>,
    teams: HashMap<TeamId, TeamRecord>,
    by_name: HashMap<TeamName, TeamId>,
    identify_failures: HashMap<String, String>,
    links: HashMap<String, LinkRecord>,
    legacy_tokens: HashMap<String, (TeamId, TeamRole)>,
}

impl EngineState {
    fn team(&self, team_id: TeamId) -> EngineResult<&TeamRecord> {
        self.teams.get(&team_id).ok_or_else(|| team_not_found(team_id))
    }

    fn team_mut(&mut self, team_id: TeamId) -> EngineResult<&mut TeamRecord> {
        self.teams.get_mut(&team_id).ok_or_else(|| team_not_found(team_id))
    }

    fn team_id(&self, name: &TeamName) -> EngineResult<TeamId> {
        self.by_name.get(name).copied().ok_or_else(|| EngineError::NotFound {
            what: format!("team {name}"),
        })
    }

    fn user(&self, username: &str) -> EngineResult<&UserRecord> {
        self.users.get(username).ok_or_else(|| EngineError::UnknownIdentity {
            assertion: username.to_string(),
        })
    }

    /// Explicit role, or `Admin` if the actor administers an ancestor.
    fn effective_role(&self, team: &TeamRecord, actor: &str) -> TeamRole {
        let explicit = team.role_of(actor);
        if explicit.is_admin_or_above() {
            return explicit;
        }
        let mut parent = team.name.parent();
        while let Some(p) = parent {
            if let Some(ancestor) = self.by_name.get(&p).and_then(|id| self.teams.get(id)) {
                if ancestor.role_of(actor).is_admin_or_above() {
                    return TeamRole::Admin;
                }
            }
            parent = p.parent();
        }
        explicit
    }

    fn require_admin(&self, team: &TeamRecord, actor: &str) -> EngineResult<()> {
        if self.effective_role(team, actor).is_admin_or_above() {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied {
                message: format!("{actor} is not an admin of {}", team.name),
            })
        }
    }

    fn member_details(&self, username: &str, role: TeamRole) -> TeamMemberDetails {
        let user = self.users.get(username);
        TeamMemberDetails {
            username: username.to_string(),
            full_name: user.and_then(|u| u.full_name.clone()),
            role,
            status: user.map_or(MemberStatus::Deleted, |u| u.status),
        }
    }

    fn details(&self, team: &TeamRecord) -> TeamDetails {
        let mut members = TeamMembersByRole::default();
        for (username, record) in &team.members {
            let details = self.member_details(username, record.role);
            match record.role {
                TeamRole::Owner => members.owners.push(details),
                TeamRole::Admin => members.admins.push(details),
                TeamRole::Writer => members.writers.push(details),
                TeamRole::Reader => members.readers.push(details),
                TeamRole::Bot => members.bots.push(details),
                TeamRole::RestrictedBot => members.restricted_bots.push(details),
                TeamRole::None => {}
            }
        }
        TeamDetails {
            id: team.id,
            name: team.name.clone(),
            settings: team.settings.clone(),
            members,
            pending_invites: team
                .invites
                .iter()
                .map(|i| PendingInvite {
                    id: i.id.clone(),
                    role: i.role,
                    target: i.target.clone(),
                })
                .collect(),
        }
    }

    fn memberships_of(&self, username: &str, include_implicit: bool) -> Vec<AnnotatedMembership> {
        let mut out: Vec<AnnotatedMembership> = self
            .teams
            .values()
            .filter(|t| include_implicit || !t.implicit)
            .filter_map(|t| {
                let role = t.role_of(username);
                (role != TeamRole::None).then(|| AnnotatedMembership {
                    team_id: t.id,
                    team_name: t.name.clone(),
                    username: username.to_string(),
                    role,
                    member_count: t.members.len(),
                    is_open: t.settings.open,
                    is_implicit: t.implicit,
                })
            })
            .collect();
        out.sort_by(|a, b| a.team_name.cmp(&b.team_name));
        out
    }
}

fn team_not_found(team_id: TeamId) -> EngineError {
    EngineError::NotFound {
        what: format!("team {team_id}"),
    }
}

fn poisoned(context: &'static str) -> EngineError {
    EngineError::Other {
        message: format!("poisoned lock: {context}"),
    }
}

/// How an assertion resolves when adding it to a team.
enum Resolution {
    Member(String),
    /// Invite for a reset account, keyed by username.
    ResetInvite(String),
    /// Invite for an address with no account.
    AddressInvite,
}

/// Thread-safe in-memory team engine.
#[derive(Debug, Default)]
pub struct InMemoryTeamEngine {
    state: RwLock<EngineState>,
    calls: Mutex<HashMap<&'static str, u64>>,
    total_calls: AtomicU64,
    failing_permission_checks: AtomicU32,
    next_invite: AtomicU64,
}

impl InMemoryTeamEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, EngineState>> {
        self.state.read().map_err(|_| poisoned("engine state"))
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, EngineState>> {
        self.state.write().map_err(|_| poisoned("engine state"))
    }

    fn record(&self, op: &'static str) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_default() += 1;
        }
    }

    fn next_invite_id(&self, prefix: &str) -> String {
        let n = self.next_invite.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{n}")
    }

    /// Number of engine calls made through the [`TeamEngine`] trait.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Number of calls to one trait method, by method name.
    #[must_use]
    pub fn calls_to(&self, op: &str) -> u64 {
        self.calls
            .lock()
            .map(|calls| calls.get(op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Adds or replaces a user in the directory.
    pub fn register(&self, user: UserRecord) -> EngineResult<()> {
        let mut state = self.write()?;
        state.users.insert(user.username.clone(), user);
        Ok(())
    }

    /// Adds active, unrestricted users.
    pub fn register_users<'a>(&self, usernames: impl IntoIterator<Item = &'a str>) -> EngineResult<()> {
        let mut state = self.write()?;
        for username in usernames {
            state.users.insert(username.to_string(), UserRecord::new(username));
        }
        Ok(())
    }

    /// Changes a user's account status.
    pub fn set_user_status(&self, username: &str, status: MemberStatus) -> EngineResult<()> {
        let mut state = self.write()?;
        let user = state.users.get_mut(username).ok_or_else(|| EngineError::UnknownIdentity {
            assertion: username.to_string(),
        })?;
        user.status = status;
        Ok(())
    }

    /// Makes identify fail for an assertion with the given remediation detail.
    pub fn fail_identify(&self, assertion: &str, detail: &str) -> EngineResult<()> {
        let mut state = self.write()?;
        state.identify_failures.insert(assertion.to_string(), detail.to_string());
        Ok(())
    }

    /// Makes the next `n` permission checks fail as unavailable.
    pub fn fail_next_permission_checks(&self, n: u32) {
        self.failing_permission_checks.store(n, Ordering::SeqCst);
    }

    /// Registers a legacy email invite token for a team.
    pub fn issue_legacy_token(&self, team_id: TeamId, token: &str, role: TeamRole) -> EngineResult<()> {
        let mut state = self.write()?;
        state.team(team_id)?;
        state.legacy_tokens.insert(token.to_string(), (team_id, role));
        Ok(())
    }

    /// Inserts a team directly, bypassing permission checks.
    pub fn seed_team(&self, name: &str, owner: &str, settings: TeamSettings) -> EngineResult<TeamId> {
        let name = TeamName::parse(name).map_err(|e| EngineError::Other { message: e.to_string() })?;
        let mut state = self.write()?;
        state.user(owner)?;
        if state.by_name.contains_key(&name) {
            return Err(EngineError::AlreadyExists {
                what: format!("team {name}"),
            });
        }
        let mut team = TeamRecord::new(name.clone(), settings);
        team.insert_member(owner, TeamRole::Owner, None);
        let id = team.id;
        state.by_name.insert(name, id);
        state.teams.insert(id, team);
        Ok(id)
    }

    /// Inserts a membership directly, bypassing permission checks.
    pub fn seed_member(&self, team_id: TeamId, username: &str, role: TeamRole) -> EngineResult<()> {
        let mut state = self.write()?;
        state.user(username)?;
        state.team_mut(team_id)?.insert_member(username, role, None);
        Ok(())
    }

    fn resolve_assertion(state: &EngineState, assertion: &str) -> EngineResult<Resolution> {
        if assertion.starts_with("email:") || assertion.starts_with("phone:") || assertion.contains('@') {
            return Ok(Resolution::AddressInvite);
        }
        let user = state.user(assertion)?;
        match user.status {
            MemberStatus::Active => Ok(Resolution::Member(user.username.clone())),
            MemberStatus::Reset => Ok(Resolution::ResetInvite(user.username.clone())),
            MemberStatus::Deleted => Err(EngineError::UnknownIdentity {
                assertion: assertion.to_string(),
            }),
        }
    }

    /// Validates a batch and computes the outcome without mutating anything.
    fn plan_additions(
        state: &EngineState,
        team: &TeamRecord,
        actor: &str,
        requests: &[MembershipRequest],
    ) -> EngineResult<(Vec<(MembershipRequest, Resolution)>, Vec<String>)> {
        state.require_admin(team, actor)?;

        let problems: Vec<IdentifyProblem> = requests
            .iter()
            .filter_map(|r| {
                state.identify_failures.get(&r.assertion).map(|detail| IdentifyProblem {
                    assertion: r.assertion.clone(),
                    detail: detail.clone(),
                })
            })
            .collect();
        if !problems.is_empty() {
            return Err(EngineError::IdentifySummary { problems });
        }

        let actor_role = state.effective_role(team, actor);
        let mut accepted = Vec::new();
        let mut restricted = Vec::new();
        let mut seen_assertions = HashSet::new();
        let mut seen_users = HashSet::new();
        for request in requests {
            if !seen_assertions.insert(request.assertion.as_str()) {
                return Err(EngineError::AlreadyExists {
                    what: format!("{} listed twice in batch", request.assertion),
                });
            }
            if request.role == TeamRole::None {
                return Err(EngineError::Other {
                    message: format!("cannot add {} with role none", request.assertion),
                });
            }
            if request.role == TeamRole::Owner && actor_role != TeamRole::Owner {
                return Err(EngineError::PermissionDenied {
                    message: "only owners can add owners".to_string(),
                });
            }
            if request.role == TeamRole::RestrictedBot && request.bot_settings.is_none() {
                return Err(EngineError::Other {
                    message: format!("restricted bot {} needs bot settings", request.assertion),
                });
            }
            let resolution = Self::resolve_assertion(state, &request.assertion)?;
            if let Resolution::Member(username) | Resolution::ResetInvite(username) = &resolution {
                if !seen_users.insert(username.clone()) {
                    return Err(EngineError::AlreadyExists {
                        what: format!("{username} listed twice in batch"),
                    });
                }
            }
            if let Resolution::Member(username) = &resolution {
                if team.members.contains_key(username) {
                    return Err(EngineError::AlreadyExists {
                        what: format!("{username} in {}", team.name),
                    });
                }
                let blocked = state.users.get(username).is_some_and(|u| u.restricts_contact)
                    && !state.memberships_of(username, true).iter().any(|m| {
                        state.teams.get(&m.team_id).is_some_and(|t| t.members.contains_key(actor))
                    });
                if blocked {
                    restricted.push(request.assertion.clone());
                    continue;
                }
            }
            accepted.push((request.clone(), resolution));
        }

        if accepted.is_empty() && !restricted.is_empty() {
            return Err(EngineError::ContactRestricted { assertions: restricted });
        }
        Ok((accepted, restricted))
    }

    fn apply_addition(&self, team: &mut TeamRecord, request: MembershipRequest, resolution: Resolution) -> AddedMember {
        match resolution {
            Resolution::Member(username) => {
                team.insert_member(&username, request.role, request.bot_settings);
                AddedMember {
                    assertion: request.assertion,
                    username: Some(username),
                    was_invited: false,
                }
            }
            Resolution::ResetInvite(username) => {
                team.invites.push(InviteRecord {
                    id: self.next_invite_id("invite"),
                    role: request.role,
                    target: username.clone(),
                });
                AddedMember {
                    assertion: request.assertion,
                    username: Some(username),
                    was_invited: true,
                }
            }
            Resolution::AddressInvite => {
                team.invites.push(InviteRecord {
                    id: self.next_invite_id("invite"),
                    role: request.role,
                    target: request.assertion.clone(),
                });
                AddedMember {
                    assertion: request.assertion,
                    username: None,
                    was_invited: true,
                }
            }
        }
    }

    fn join_via_invite(state: &mut EngineState, actor: &str, team_id: TeamId, role: TeamRole) -> EngineResult<()> {
        state.user(actor)?;
        let team = state.team_mut(team_id)?;
        if team.members.contains_key(actor) {
            return Err(EngineError::AlreadyExists {
                what: format!("{actor} in {}", team.name),
            });
        }
        team.insert_member(actor, role, None);
        team.requests.retain(|r| r.username != actor);
        Ok(())
    }

    fn accept_link(&self, actor: &str, key: &str) -> EngineResult<()> {
        let mut state = self.write()?;
        let link = state.links.get(key).cloned().ok_or_else(|| EngineError::NotFound {
            what: "invite".to_string(),
        })?;
        if link.expires_at.is_some_and(|e| e <= Utc::now()) || link.uses_left == Some(0) {
            return Err(EngineError::PermissionDenied {
                message: "invite is no longer valid".to_string(),
            });
        }
        Self::join_via_invite(&mut state, actor, link.team_id, link.role)?;
        if let Some(entry) = state.links.get_mut(key) {
            entry.uses_left = entry.uses_left.map(|n| n.saturating_sub(1));
        }
        Ok(())
    }

    fn redeem_legacy_token(&self, actor: &str, token: &str) -> EngineResult<()> {
        let mut state = self.write()?;
        let (team_id, role) = state.legacy_tokens.remove(token).ok_or_else(|| EngineError::NotFound {
            what: "invite".to_string(),
        })?;
        Self::join_via_invite(&mut state, actor, team_id, role)
    }

    fn file_access_request(&self, actor: &str, name: &TeamName) -> EngineResult<AccessRequestResult> {
        let mut state = self.write()?;
        state.user(actor)?;
        let id = state.team_id(name)?;
        let team = state.team_mut(id)?;
        if team.members.contains_key(actor) {
            return Err(EngineError::AlreadyExists {
                what: format!("{actor} in {name}"),
            });
        }
        if team.settings.open {
            let role = team.settings.join_as;
            team.insert_member(actor, role, None);
            return Ok(AccessRequestResult { open: true });
        }
        if !team.requests.iter().any(|r| r.username == actor) {
            team.requests.push(JoinRequest {
                team_id: id,
                team_name: name.clone(),
                username: actor.to_string(),
                requested_at: Utc::now(),
            });
        }
        Ok(AccessRequestResult { open: false })
    }

    fn derive_key(team_id: TeamId, request: &ApplicationKeysRequest, generation: u32) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(team_id.as_uuid().as_bytes());
        hasher.update(format!("{:?}", request.application).as_bytes());
        hasher.update(&generation.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

impl TeamEngine for InMemoryTeamEngine {
    fn create_root_team(&self, actor: &str, name: &TeamName, settings: &TeamSettings) -> EngineResult<TeamId> {
        self.record("create_root_team");
        let mut state = self.write()?;
        state.user(actor)?;
        if state.by_name.contains_key(name) {
            return Err(EngineError::AlreadyExists {
                what: format!("team {name}"),
            });
        }
        let mut team = TeamRecord::new(name.clone(), settings.clone());
        team.insert_member(actor, TeamRole::Owner, None);
        let id = team.id;
        state.by_name.insert(name.clone(), id);
        state.teams.insert(id, team);
        Ok(id)
    }

    fn create_subteam(&self, actor: &str, name: &TeamName, add_self_as: TeamRole) -> EngineResult<TeamId> {
        self.record("create_subteam");
        let mut state = self.write()?;
        let parent_name = name.parent().ok_or_else(|| EngineError::Other {
            message: format!("{name} is not a subteam name"),
        })?;
        let parent_id = state.team_id(&parent_name)?;
        state.require_admin(state.team(parent_id)?, actor)?;
        if state.by_name.contains_key(name) {
            return Err(EngineError::AlreadyExists {
                what: format!("team {name}"),
            });
        }
        let mut team = TeamRecord::new(name.clone(), TeamSettings::default());
        team.insert_member(actor, add_self_as, None);
        let id = team.id;
        state.by_name.insert(name.clone(), id);
        state.teams.insert(id, team);
        Ok(id)
    }

    fn leave(&self, actor: &str, name: &TeamName, _permanent: bool) -> EngineResult<()> {
        self.record("leave");
        let mut state = self.write()?;
        let id = state.team_id(name)?;
        let team = state.team_mut(id)?;
        let Some(record) = team.members.get(actor) else {
            return Err(EngineError::NotFound {
                what: format!("{actor} in {name}"),
            });
        };
        if record.role == TeamRole::Owner && team.members.values().filter(|m| m.role == TeamRole::Owner).count() == 1
        {
            return Err(EngineError::PermissionDenied {
                message: "the last owner cannot leave".to_string(),
            });
        }
        team.members.remove(actor);
        Ok(())
    }

    fn rename_subteam(&self, actor: &str, prev: &TeamName, new: &TeamName) -> EngineResult<()> {
        self.record("rename_subteam");
        let mut state = self.write()?;
        if prev.is_root_team() || prev.parent() != new.parent() {
            return Err(EngineError::Other {
                message: "only subteams can be renamed, within the same parent".to_string(),
            });
        }
        let id = state.team_id(prev)?;
        state.require_admin(state.team(id)?, actor)?;
        if state.by_name.contains_key(new) {
            return Err(EngineError::AlreadyExists {
                what: format!("team {new}"),
            });
        }
        state.by_name.remove(prev);
        state.by_name.insert(new.clone(), id);
        state.team_mut(id)?.name = new.clone();
        Ok(())
    }

    fn delete(&self, actor: &str, team_id: TeamId) -> EngineResult<()> {
        self.record("delete");
        let mut state = self.write()?;
        let team = state.team(team_id)?;
        let role = state.effective_role(team, actor);
        let allowed = if team.name.is_root_team() {
            role == TeamRole::Owner
        } else {
            role.is_admin_or_above()
        };
        if !allowed {
            return Err(EngineError::PermissionDenied {
                message: format!("{actor} cannot delete {}", team.name),
            });
        }
        let name = team.name.clone();
        if state.by_name.keys().any(|n| n.is_descendant_of(&name)) {
            return Err(EngineError::Other {
                message: format!("{name} still has subteams"),
            });
        }
        state.by_name.remove(&name);
        state.teams.remove(&team_id);
        Ok(())
    }

    fn set_settings(&self, actor: &str, team_id: TeamId, settings: &TeamSettings) -> EngineResult<()> {
        self.record("set_settings");
        let mut state = self.write()?;
        state.require_admin(state.team(team_id)?, actor)?;
        state.team_mut(team_id)?.settings = settings.clone();
        Ok(())
    }

    fn rotate_key(&self, actor: &str, team_id: TeamId, _rotation: RotationType) -> EngineResult<()> {
        self.record("rotate_key");
        let mut state = self.write()?;
        let team = state.team(team_id)?;
        if state.effective_role(team, actor) < TeamRole::Reader {
            return Err(EngineError::PermissionDenied {
                message: format!("{actor} is not a member of {}", team.name),
            });
        }
        state.team_mut(team_id)?.key_generation += 1;
        Ok(())
    }

    fn details(&self, name: &TeamName) -> EngineResult<TeamDetails> {
        self.record("details");
        let state = self.read()?;
        let id = state.team_id(name)?;
        Ok(state.details(state.team(id)?))
    }

    fn details_by_id(&self, team_id: TeamId) -> EngineResult<TeamDetails> {
        self.record("details_by_id");
        let state = self.read()?;
        Ok(state.details(state.team(team_id)?))
    }

    fn members(&self, team_id: TeamId) -> EngineResult<Vec<TeamMemberDetails>> {
        self.record("members");
        let state = self.read()?;
        let team = state.team(team_id)?;
        Ok(team
            .members
            .iter()
            .map(|(username, record)| state.member_details(username, record.role))
            .collect())
    }

    fn resolve_name(&self, name: &TeamName) -> EngineResult<TeamId> {
        self.record("resolve_name");
        self.read()?.team_id(name)
    }

    fn resolve_id(&self, team_id: TeamId) -> EngineResult<TeamName> {
        self.record("resolve_id");
        Ok(self.read()?.team(team_id)?.name.clone())
    }

    fn implicit_admins(&self, team_id: TeamId) -> EngineResult<Vec<TeamMemberDetails>> {
        self.record("implicit_admins");
        let state = self.read()?;
        let team = state.team(team_id)?;
        let mut out = Vec::new();
        let mut parent = team.name.parent();
        while let Some(p) = parent {
            if let Some(ancestor) = state.by_name.get(&p).and_then(|id| state.teams.get(id)) {
                for (username, record) in &ancestor.members {
                    if record.role.is_admin_or_above() && !out.iter().any(|m: &TeamMemberDetails| &m.username == username)
                    {
                        out.push(state.member_details(username, record.role));
                    }
                }
            }
            parent = p.parent();
        }
        Ok(out)
    }

    fn list_teams(&self, actor: &str, query: &TeamListQuery) -> EngineResult<Vec<AnnotatedMembership>> {
        self.record("list_teams");
        let state = self.read()?;
        match query {
            TeamListQuery::Unverified {
                user_assertion,
                include_implicit_teams,
            }
            | TeamListQuery::Verified {
                user_assertion,
                include_implicit_teams,
            } => {
                let who = if user_assertion.is_empty() { actor } else { user_assertion.as_str() };
                state.user(who)?;
                Ok(state.memberships_of(who, *include_implicit_teams))
            }
            TeamListQuery::Teammates { include_implicit_teams } => {
                let mut out = Vec::new();
                for mine in state.memberships_of(actor, *include_implicit_teams) {
                    let team = state.team(mine.team_id)?;
                    for (username, record) in &team.members {
                        out.push(AnnotatedMembership {
                            username: username.clone(),
                            role: record.role,
                            ..mine.clone()
                        });
                    }
                }
                Ok(out)
            }
        }
    }

    fn list_subteams(&self, parent: &TeamName) -> EngineResult<Vec<TeamIdAndName>> {
        self.record("list_subteams");
        let state = self.read()?;
        state.team_id(parent)?;
        let mut out: Vec<TeamIdAndName> = state
            .by_name
            .iter()
            .filter(|(name, _)| name.parent().as_ref() == Some(parent))
            .map(|(name, id)| TeamIdAndName {
                id: *id,
                name: name.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn can_user_perform(&self, actor: &str, name: &TeamName) -> EngineResult<TeamOperation> {
        self.record("can_user_perform");
        let flaky = self
            .failing_permission_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(EngineError::Unavailable {
                message: "permission check failed".to_string(),
            });
        }
        let state = self.read()?;
        let team = state.team(state.team_id(name)?)?;
        Ok(TeamOperation::for_role(
            state.effective_role(team, actor),
            team.name.is_root_team(),
        ))
    }

    fn load_application_keys(&self, request: &ApplicationKeysRequest) -> EngineResult<TeamApplicationKeys> {
        self.record("load_application_keys");
        let state = self.read()?;
        let team = state.team(request.team_id)?;
        if let Some(needed) = request.refreshers.need_key_generation {
            if needed > team.key_generation {
                return Err(EngineError::NotFound {
                    what: format!("key generation {needed} of {}", team.name),
                });
            }
        }
        let first = if request.include_legacy_keys { 1 } else { team.key_generation };
        let keys = (first..=team.key_generation)
            .map(|generation| ApplicationKey {
                generation,
                key: Self::derive_key(team.id, request, generation),
            })
            .collect();
        let by_role = |pred: fn(TeamRole) -> bool| -> Vec<String> {
            team.members
                .iter()
                .filter(|(_, m)| pred(m.role))
                .map(|(u, _)| u.clone())
                .collect()
        };
        Ok(TeamApplicationKeys {
            team_id: team.id,
            name: team.name.clone(),
            application: request.application,
            writers: by_role(|r| r >= TeamRole::Writer),
            readers: by_role(|r| r == TeamRole::Reader),
            keys,
        })
    }

    fn add_member(
        &self,
        actor: &str,
        team_id: TeamId,
        request: &MembershipRequest,
        _invite_message: Option<&str>,
    ) -> EngineResult<AddedMember> {
        self.record("add_member");
        let mut state = self.write()?;
        let (mut accepted, _) = Self::plan_additions(&state, state.team(team_id)?, actor, std::slice::from_ref(request))?;
        let (request, resolution) = accepted.pop().ok_or_else(|| EngineError::Other {
            message: "nothing to add".to_string(),
        })?;
        let team = state.team_mut(team_id)?;
        Ok(self.apply_addition(team, request, resolution))
    }

    fn add_members(
        &self,
        actor: &str,
        team_id: TeamId,
        requests: &[MembershipRequest],
        _invite_message: Option<&str>,
    ) -> EngineResult<BulkMutationOutcome> {
        self.record("add_members");
        let mut state = self.write()?;
        let team = state.team(team_id).map_err(EngineError::add_members)?;
        let (accepted, not_added) =
            Self::plan_additions(&state, team, actor, requests).map_err(EngineError::add_members)?;
        let team = state.team_mut(team_id)?;
        let added = accepted
            .into_iter()
            .map(|(request, resolution)| self.apply_addition(team, request, resolution))
            .collect();
        Ok(BulkMutationOutcome { added, not_added })
    }

    fn add_emails(
        &self,
        actor: &str,
        team_id: TeamId,
        emails: &[String],
        role: TeamRole,
    ) -> EngineResult<BulkEmailsResult> {
        self.record("add_emails");
        let mut state = self.write()?;
        let team = state.team(team_id)?;
        state.require_admin(team, actor)?;
        if matches!(role, TeamRole::None | TeamRole::Owner | TeamRole::RestrictedBot | TeamRole::Bot) {
            return Err(EngineError::Other {
                message: format!("cannot invite by email as {role}"),
            });
        }

        let team = state.team_mut(team_id)?;
        let mut result = BulkEmailsResult::default();
        for email in emails {
            let target = format!("email:{email}");
            if team.invites.iter().any(|i| i.target == target) {
                result.already_invited.push(email.clone());
                continue;
            }
            team.invites.push(InviteRecord {
                id: self.next_invite_id("invite"),
                role,
                target,
            });
            result.invited.push(email.clone());
        }
        Ok(result)
    }

    fn remove_member(&self, actor: &str, team_id: TeamId, username: &str) -> EngineResult<()> {
        self.record("remove_member");
        let mut state = self.write()?;
        let team = state.team(team_id)?;
        if actor != username {
            state.require_admin(team, actor)?;
        }
        let team = state.team_mut(team_id)?;
        if team.members.remove(username).is_none() {
            return Err(EngineError::NotFound {
                what: format!("member '{username}' in {}", team.name),
            });
        }
        Ok(())
    }

    fn cancel_email_invite(&self, actor: &str, team_id: TeamId, email: &str, allow_inaction: bool) -> EngineResult<()> {
        self.record("cancel_email_invite");
        let mut state = self.write()?;
        state.require_admin(state.team(team_id)?, actor)?;
        let target = format!("email:{email}");
        let team = state.team_mut(team_id)?;
        let before = team.invites.len();
        team.invites.retain(|i| i.target != target);
        if team.invites.len() == before && !allow_inaction {
            return Err(EngineError::NotFound {
                what: format!("invite for {email}"),
            });
        }
        Ok(())
    }

    fn cancel_invite_by_id(
        &self,
        actor: &str,
        team_id: TeamId,
        invite_id: &str,
        allow_inaction: bool,
    ) -> EngineResult<()> {
        self.record("cancel_invite_by_id");
        let mut state = self.write()?;
        state.require_admin(state.team(team_id)?, actor)?;
        let team = state.team_mut(team_id)?;
        let before = team.invites.len();
        team.invites.retain(|i| i.id != invite_id);
        if team.invites.len() == before && !allow_inaction {
            return Err(EngineError::NotFound {
                what: format!("invite {invite_id}"),
            });
        }
        Ok(())
    }

    fn remove_members(&self, actor: &str, team_id: TeamId, removals: &[MemberRemoval]) -> EngineResult<RemoveMembersResult> {
        self.record("remove_members");
        let mut state = self.write()?;
        state.require_admin(state.team(team_id)?, actor)?;
        let team = state.team_mut(team_id)?;
        let mut result = RemoveMembersResult::default();
        for removal in removals {
            let removed = match removal {
                MemberRemoval::Member { username } => team.members.remove(username).is_some(),
                MemberRemoval::Invite { invite_id } => {
                    let before = team.invites.len();
                    team.invites.retain(|i| &i.id != invite_id);
                    team.invites.len() != before
                }
            };
            if !removed {
                result.failures.push(MemberFailure {
                    target: removal.label().to_string(),
                    error: "not found".to_string(),
                });
            }
        }
        Ok(result)
    }

    fn edit_member(&self, actor: &str, name: &TeamName, edit: &MemberEdit) -> EngineResult<()> {
        self.record("edit_member");
        let mut state = self.write()?;
        let id = state.team_id(name)?;
        state.require_admin(state.team(id)?, actor)?;
        let team = state.team_mut(id)?;
        let member = team.members.get_mut(&edit.username).ok_or_else(|| EngineError::NotFound {
            what: format!("member '{}' in {name}", edit.username),
        })?;
        member.role = edit.role;
        if edit.bot_settings.is_some() {
            member.bot_settings.clone_from(&edit.bot_settings);
        }
        Ok(())
    }

    fn edit_members(&self, actor: &str, team_id: TeamId, edits: &[MemberEdit]) -> EngineResult<EditMembersResult> {
        self.record("edit_members");
        let mut state = self.write()?;
        state.require_admin(state.team(team_id)?, actor)?;
        let team = state.team_mut(team_id)?;
        let mut result = EditMembersResult::default();
        for edit in edits {
            match team.members.get_mut(&edit.username) {
                Some(member) => {
                    member.role = edit.role;
                    if edit.bot_settings.is_some() {
                        member.bot_settings.clone_from(&edit.bot_settings);
                    }
                }
                None => result.failures.push(MemberFailure {
                    target: edit.username.clone(),
                    error: "not a member".to_string(),
                }),
            }
        }
        Ok(result)
    }

    fn re_add_member_after_reset(&self, actor: &str, team_id: TeamId, username: &str) -> EngineResult<()> {
        self.record("re_add_member_after_reset");
        let mut state = self.write()?;
        state.require_admin(state.team(team_id)?, actor)?;
        if state.user(username)?.status != MemberStatus::Active {
            return Err(EngineError::Other {
                message: format!("{username} has not reprovisioned yet"),
            });
        }
        let team = state.team_mut(team_id)?;
        if let Some(pos) = team.invites.iter().position(|i| i.target == username) {
            let invite = team.invites.remove(pos);
            team.insert_member(username, invite.role, None);
            return Ok(());
        }
        if team.members.contains_key(username) {
            return Ok(());
        }
        Err(EngineError::NotFound {
            what: format!("reset member '{username}'"),
        })
    }

    fn set_bot_settings(&self, actor: &str, name: &TeamName, username: &str, settings: &BotSettings) -> EngineResult<()> {
        self.record("set_bot_settings");
        let mut state = self.write()?;
        let id = state.team_id(name)?;
        state.require_admin(state.team(id)?, actor)?;
        let member = state
            .team_mut(id)?
            .members
            .get_mut(username)
            .filter(|m| m.role == TeamRole::RestrictedBot)
            .ok_or_else(|| EngineError::NotFound {
                what: format!("restricted bot '{username}' in {name}"),
            })?;
        member.bot_settings = Some(settings.clone());
        Ok(())
    }

    fn bot_settings(&self, _actor: &str, name: &TeamName, username: &str) -> EngineResult<BotSettings> {
        self.record("bot_settings");
        let state = self.read()?;
        let team = state.team(state.team_id(name)?)?;
        team.members
            .get(username)
            .and_then(|m| m.bot_settings.clone())
            .ok_or_else(|| EngineError::NotFound {
                what: format!("bot settings for '{username}' in {name}"),
            })
    }

    fn accept_seitan_token(&self, actor: &str, token: &SeitanToken) -> EngineResult<()> {
        self.record("accept_seitan_token");
        self.accept_link(actor, token.expose())
    }

    fn accept_server_trust_invite(&self, actor: &str, token: &str) -> EngineResult<()> {
        self.record("accept_server_trust_invite");
        self.redeem_legacy_token(actor, token)
    }

    fn request_access(&self, actor: &str, name: &TeamName) -> EngineResult<AccessRequestResult> {
        self.record("request_access");
        self.file_access_request(actor, name)
    }

    fn accept_invite_or_request_access(&self, actor: &str, token_or_name: &str) -> EngineResult<AcceptOrRequestResult> {
        self.record("accept_invite_or_request_access");
        if let Ok(name) = TeamName::parse(token_or_name) {
            let known = name.depth() > 0 && self.read()?.by_name.contains_key(&name);
            if known {
                let res = self.file_access_request(actor, &name)?;
                return Ok(AcceptOrRequestResult {
                    was_team_name: true,
                    was_open_team: res.open,
                    ..AcceptOrRequestResult::default()
                });
            }
        }
        match ParsedInvite::from_paste(token_or_name) {
            ParsedInvite::Seitan(token) => {
                self.accept_link(actor, token.expose())?;
                Ok(AcceptOrRequestResult {
                    was_token: true,
                    was_seitan: true,
                    ..AcceptOrRequestResult::default()
                })
            }
            ParsedInvite::Legacy => {
                self.redeem_legacy_token(actor, token_or_name.trim())?;
                Ok(AcceptOrRequestResult {
                    was_token: true,
                    ..AcceptOrRequestResult::default()
                })
            }
        }
    }

    fn list_requests(&self, actor: &str, name: Option<&TeamName>) -> EngineResult<Vec<JoinRequest>> {
        self.record("list_requests");
        let state = self.read()?;
        let mut out: Vec<JoinRequest> = state
            .teams
            .values()
            .filter(|t| name.map_or(true, |n| &t.name == n))
            .filter(|t| state.effective_role(t, actor).is_admin_or_above())
            .flat_map(|t| t.requests.iter().cloned())
            .collect();
        out.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(out)
    }

    fn list_my_access_requests(&self, actor: &str, name: Option<&TeamName>) -> EngineResult<Vec<TeamName>> {
        self.record("list_my_access_requests");
        let state = self.read()?;
        let mut out: Vec<TeamName> = state
            .teams
            .values()
            .filter(|t| name.map_or(true, |n| &t.name == n))
            .filter(|t| t.requests.iter().any(|r| r.username == actor))
            .map(|t| t.name.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    fn ignore_request(&self, actor: &str, name: &TeamName, username: &str) -> EngineResult<()> {
        self.record("ignore_request");
        let mut state = self.write()?;
        let id = state.team_id(name)?;
        state.require_admin(state.team(id)?, actor)?;
        let team = state.team_mut(id)?;
        let before = team.requests.len();
        team.requests.retain(|r| r.username != username);
        if team.requests.len() == before {
            return Err(EngineError::NotFound {
                what: format!("access request from '{username}'"),
            });
        }
        Ok(())
    }

    fn create_invitelink(
        &self,
        actor: &str,
        name: &TeamName,
        role: TeamRole,
        max_uses: Option<u32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Invitelink> {
        self.record("create_invitelink");
        if role.is_admin_or_above() {
            return Err(EngineError::PermissionDenied {
                message: "invite links cannot grant admin roles".to_string(),
            });
        }
        let mut state = self.write()?;
        let id = state.team_id(name)?;
        state.require_admin(state.team(id)?, actor)?;

        let raw = uuid::Uuid::new_v4().simple().to_string();
        let key = format!("{}+{}", &raw[..5], &raw[5..16]);
        let invite_id = self.next_invite_id("link");
        state.links.insert(
            key.clone(),
            LinkRecord {
                team_id: id,
                role,
                uses_left: max_uses,
                expires_at,
            },
        );
        Ok(Invitelink {
            invite_id,
            url: format!("{INVITELINK_BASE}/{key}"),
            role,
            max_uses,
            expires_at,
        })
    }

    fn team_showcase(&self, team_id: TeamId) -> EngineResult<TeamShowcase> {
        self.record("team_showcase");
        Ok(self.read()?.team(team_id)?.showcase.clone())
    }

    fn team_and_member_showcase(&self, actor: &str, team_id: TeamId) -> EngineResult<TeamAndMemberShowcase> {
        self.record("team_and_member_showcase");
        let state = self.read()?;
        let team = state.team(team_id)?;
        Ok(TeamAndMemberShowcase {
            team: team.showcase.clone(),
            is_member_showcased: team.members.get(actor).is_some_and(|m| m.showcased),
        })
    }

    fn set_team_showcase(&self, actor: &str, team_id: TeamId, showcase: &TeamShowcase) -> EngineResult<()> {
        self.record("set_team_showcase");
        let mut state = self.write()?;
        state.require_admin(state.team(team_id)?, actor)?;
        state.team_mut(team_id)?.showcase = showcase.clone();
        Ok(())
    }

    fn set_member_showcase(&self, actor: &str, team_id: TeamId, is_showcased: bool) -> EngineResult<()> {
        self.record("set_member_showcase");
        let mut state = self.write()?;
        let team = state.team_mut(team_id)?;
        let name = team.name.clone();
        let member = team.members.get_mut(actor).ok_or_else(|| EngineError::NotFound {
            what: format!("{actor} in {name}"),
        })?;
        member.showcased = is_showcased;
        Ok(())
    }
}
