use std::sync::Arc;

use teamgate::membership::{MemberEdit, MemberRemoval, RemovalSelector};
use teamgate::team::MemberStatus;
use teamgate::{
    ChatNotifier, EngineError, GatewayConfig, GatewayError, InMemoryCacheStore, InMemoryTeamEngine, MembershipRequest,
    NotificationTask, NotifyError, RequestContext, Session, TeamAddMemberArgs, TeamId, TeamName, TeamRole,
    TeamSettings, TeamsGateway, UserRecord, ValidationError,
};

struct Silent;

impl ChatNotifier for Silent {
    fn send_welcome(&self, _task: &NotificationTask) -> Result<(), NotifyError> {
        Ok(())
    }

    fn announce_team_created(&self, _team: &TeamName, _creator: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn gateway_with(engine: &Arc<InMemoryTeamEngine>) -> TeamsGateway {
    init_tracing();
    TeamsGateway::new(
        GatewayConfig::default(),
        engine.clone(),
        Arc::new(Silent),
        Arc::new(InMemoryCacheStore::new()),
    )
    .unwrap()
}

fn as_user(username: &str) -> RequestContext {
    RequestContext::authenticated(Session::new(username, 7))
}

/// Engine with users owner, alice, bob, carol and a closed team `acme` owned by `owner`.
fn seeded() -> (Arc<InMemoryTeamEngine>, TeamsGateway, TeamId) {
    let engine = Arc::new(InMemoryTeamEngine::new());
    engine.register_users(["owner", "alice", "bob", "carol"]).unwrap();
    let team_id = engine.seed_team("acme", "owner", TeamSettings::default()).unwrap();
    let gateway = gateway_with(&engine);
    (engine, gateway, team_id)
}

fn is_auth_required<T: std::fmt::Debug>(res: Result<T, GatewayError>) -> bool {
    matches!(res, Err(GatewayError::AuthenticationRequired))
}

#[test]
fn mutations_without_session_never_reach_engine() {
    let (engine, gateway, team_id) = seeded();
    let anon = RequestContext::anonymous();

    assert!(is_auth_required(gateway.team_create(&anon, "newteam", false)));
    assert!(is_auth_required(gateway.team_leave(&anon, "acme", false)));
    assert!(is_auth_required(gateway.team_delete(&anon, team_id)));
    assert!(is_auth_required(gateway.team_add_member(
        &anon,
        &TeamAddMemberArgs::new(team_id, "alice", TeamRole::Writer)
    )));
    assert!(is_auth_required(gateway.team_remove_member(
        &anon,
        team_id,
        &RemovalSelector::username("alice"),
        false
    )));
    assert!(is_auth_required(gateway.team_edit_member(
        &anon,
        "acme",
        &MemberEdit::new("alice", TeamRole::Admin)
    )));
    assert!(is_auth_required(gateway.team_accept_invite(&anon, "abcde+fghjkmnpqrs")));
    assert!(is_auth_required(gateway.team_request_access(&anon, "acme")));
    assert!(is_auth_required(gateway.team_create_seitan_invitelink_with_duration(
        &anon,
        "acme",
        TeamRole::Reader,
        None,
        Some("not a duration")
    )));
    assert!(is_auth_required(gateway.can_user_perform(&anon, "acme")));

    assert_eq!(engine.total_calls(), 0);
}

#[test]
fn remove_member_rejects_multiple_selectors_without_engine_call() {
    let (engine, gateway, team_id) = seeded();
    engine.seed_member(team_id, "alice", TeamRole::Writer).unwrap();

    let selector = RemovalSelector {
        username: Some("alice".to_string()),
        email: Some("alice@example.com".to_string()),
        invite_id: None,
    };
    let err = gateway
        .team_remove_member(&as_user("owner"), team_id, &selector, false)
        .unwrap_err();
    let GatewayError::Validation(ValidationError::MutuallyExclusiveFields { fields }) = err else {
        panic!("expected exclusivity error, got {err:?}");
    };
    assert_eq!(fields, vec!["username", "email"]);
    assert_eq!(engine.total_calls(), 0);

    gateway
        .team_remove_member(&as_user("owner"), team_id, &RemovalSelector::username("alice"), false)
        .unwrap();
    assert_eq!(engine.calls_to("remove_member"), 1);
    assert!(gateway.team_get(&as_user("owner"), "acme").unwrap().members.writers.is_empty());
}

#[test]
fn email_invite_can_be_cancelled_by_address() {
    let (engine, gateway, team_id) = seeded();
    let owner = as_user("owner");

    let mut args = TeamAddMemberArgs::new(team_id, "", TeamRole::Reader);
    args.email = Some("dana@example.com".to_string());
    let added = gateway.team_add_member(&owner, &args).unwrap();
    assert!(added.invited);
    assert_eq!(added.username, None);

    let details = gateway.team_get(&owner, "acme").unwrap();
    assert_eq!(details.pending_invites.len(), 1);
    assert_eq!(details.pending_invites[0].target, "email:dana@example.com");

    let by_email = RemovalSelector::email("dana@example.com");
    gateway.team_remove_member(&owner, team_id, &by_email, false).unwrap();
    assert_eq!(engine.calls_to("cancel_email_invite"), 1);
    assert!(gateway.team_get(&owner, "acme").unwrap().pending_invites.is_empty());

    gateway.team_remove_member(&owner, team_id, &by_email, true).unwrap();
    let err = gateway.team_remove_member(&owner, team_id, &by_email, false).unwrap_err();
    assert!(matches!(err, GatewayError::Engine(EngineError::NotFound { .. })));
}

#[test]
fn single_add_prefers_email_over_phone() {
    let (_, gateway, team_id) = seeded();
    let mut args = TeamAddMemberArgs::new(team_id, "ignored", TeamRole::Writer);
    args.email = Some("erin@example.com".to_string());
    args.phone = Some("+1 (555) 010-9999".to_string());
    gateway.team_add_member(&as_user("owner"), &args).unwrap();

    let details = gateway.team_get(&as_user("owner"), "acme").unwrap();
    assert_eq!(details.pending_invites[0].target, "email:erin@example.com");
}

#[test]
fn subteam_creator_leaves_unless_joining() {
    let (engine, gateway, _) = seeded();
    let owner = as_user("owner");

    let left = gateway.team_create(&owner, "acme.eng", false).unwrap();
    assert!(!left.creator_added);
    assert!(left.chat_sent);
    assert!(gateway.team_get_members(&owner, "acme.eng").unwrap().is_empty());
    assert_eq!(engine.calls_to("leave"), 1);

    let joined = gateway.team_create(&owner, "acme.ops", true).unwrap();
    assert!(joined.creator_added);
    let members = gateway.team_get_members(&owner, "acme.ops").unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, TeamRole::Admin);

    let admins = gateway.team_implicit_admins(&owner, "acme.eng").unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].username, "owner");

    let root = gateway.get_team_root_id(&owner, joined.team_id).unwrap();
    assert_eq!(root, gateway.get_team_id(&owner, "acme").unwrap());
    assert_eq!(gateway.get_team_root_id(&owner, root).unwrap(), root);

    let subteams = gateway.team_get_subteams(&owner, "acme").unwrap();
    assert_eq!(subteams.len(), 2);
}

#[test]
fn root_team_creator_stays_owner() {
    let (_, gateway, _) = seeded();
    let created = gateway.team_create(&as_user("alice"), "Widgets", false).unwrap();
    assert!(created.creator_added);

    let name = gateway.get_team_name(&as_user("alice"), created.team_id).unwrap();
    assert_eq!(name.to_string(), "widgets");
    let details = gateway.team_get_by_id(&as_user("alice"), created.team_id).unwrap();
    assert_eq!(details.members.owners[0].username, "alice");
}

#[test]
fn empty_team_name_is_rejected_before_engine() {
    let (engine, gateway, _) = seeded();
    let err = gateway.team_create(&as_user("owner"), "   ", false).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(engine.total_calls(), 0);
}

#[test]
fn open_team_hides_inactive_writers_and_readers() {
    let engine = Arc::new(InMemoryTeamEngine::new());
    engine.register_users(["owner", "alice", "bob"]).unwrap();
    let open = TeamSettings {
        open: true,
        join_as: TeamRole::Reader,
    };
    let open_id = engine.seed_team("opensrc", "owner", open).unwrap();
    let closed_id = engine.seed_team("private", "owner", TeamSettings::default()).unwrap();
    for team_id in [open_id, closed_id] {
        engine.seed_member(team_id, "alice", TeamRole::Writer).unwrap();
        engine.seed_member(team_id, "bob", TeamRole::Reader).unwrap();
    }
    engine.set_user_status("bob", MemberStatus::Reset).unwrap();
    let gateway = gateway_with(&engine);
    let ctx = as_user("owner");

    let open_details = gateway.team_get(&ctx, "opensrc").unwrap();
    assert_eq!(open_details.members.writers.len(), 1);
    assert!(open_details.members.readers.is_empty());

    let closed_details = gateway.team_get_by_id(&ctx, closed_id).unwrap();
    assert_eq!(closed_details.members.readers.len(), 1);
    assert_eq!(closed_details.members.readers[0].status, MemberStatus::Reset);
}

#[test]
fn bulk_add_reports_contact_restricted_users() {
    let (engine, gateway, team_id) = seeded();
    engine
        .register(UserRecord {
            restricts_contact: true,
            ..UserRecord::new("private_pat")
        })
        .unwrap();

    let requests = vec![
        MembershipRequest::new("alice", TeamRole::Writer),
        MembershipRequest::new("private_pat", TeamRole::Reader),
    ];
    let res = gateway
        .team_add_members_multi_role(&as_user("owner"), team_id, &requests, None, false)
        .unwrap();
    assert!(res.is_partial());
    assert_eq!(res.not_added, vec!["private_pat".to_string()]);

    let members = gateway.team_get_members_by_id(&as_user("owner"), team_id).unwrap();
    assert!(members.iter().any(|m| m.username == "alice"));
    assert!(!members.iter().any(|m| m.username == "private_pat"));
}

#[test]
fn bulk_add_is_all_or_nothing() {
    let (_, gateway, team_id) = seeded();
    let err = gateway
        .team_add_members(
            &as_user("owner"),
            team_id,
            &["alice".to_string(), "nobody".to_string()],
            TeamRole::Writer,
            None,
            false,
        )
        .unwrap_err();
    assert!(matches!(err, GatewayError::Engine(EngineError::AddMembers { .. })));
    assert_eq!(gateway.team_get_members_by_id(&as_user("owner"), team_id).unwrap().len(), 1);
}

#[test]
fn bulk_add_surfaces_identify_summary_directly() {
    let (engine, gateway, team_id) = seeded();
    engine.fail_identify("carol", "proof revoked").unwrap();
    let err = gateway
        .team_add_members(&as_user("owner"), team_id, &["carol".to_string()], TeamRole::Reader, None, false)
        .unwrap_err();
    let GatewayError::Engine(EngineError::IdentifySummary { problems }) = err else {
        panic!("expected identify summary, got {err:?}");
    };
    assert_eq!(problems[0].assertion, "carol");
}

#[test]
fn empty_batches() {
    let (engine, gateway, team_id) = seeded();
    let err = gateway
        .team_add_members_multi_role(&as_user("owner"), team_id, &[], None, true)
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(ValidationError::EmptyBatch)));

    let anon = RequestContext::anonymous();
    assert!(gateway.team_edit_members(&anon, team_id, &[]).unwrap().failures.is_empty());
    assert!(gateway.team_remove_members(&anon, team_id, &[]).unwrap().failures.is_empty());
    assert_eq!(engine.total_calls(), 0);
}

#[test]
fn batch_edit_and_remove_report_per_member_failures() {
    let (engine, gateway, team_id) = seeded();
    engine.seed_member(team_id, "alice", TeamRole::Reader).unwrap();
    let owner = as_user("owner");

    let edits = [MemberEdit::new("alice", TeamRole::Writer), MemberEdit::new("ghost", TeamRole::Writer)];
    let edited = gateway.team_edit_members(&owner, team_id, &edits).unwrap();
    assert_eq!(edited.failures.len(), 1);
    assert_eq!(edited.failures[0].target, "ghost");
    assert_eq!(gateway.team_get(&owner, "acme").unwrap().members.writers.len(), 1);

    let removals = [
        MemberRemoval::Member {
            username: "alice".to_string(),
        },
        MemberRemoval::Invite {
            invite_id: "invite-404".to_string(),
        },
    ];
    let removed = gateway.team_remove_members(&owner, team_id, &removals).unwrap();
    assert_eq!(removed.failures.len(), 1);
    assert_eq!(removed.failures[0].target, "invite-404");
}

#[test]
fn reset_member_is_invited_then_readded() {
    let (engine, gateway, team_id) = seeded();
    engine.set_user_status("bob", MemberStatus::Reset).unwrap();
    let owner = as_user("owner");

    let added = gateway
        .team_add_member(&owner, &TeamAddMemberArgs::new(team_id, "bob", TeamRole::Writer))
        .unwrap();
    assert!(added.invited);
    assert_eq!(added.username.as_deref(), Some("bob"));

    assert!(gateway.team_re_add_member_after_reset(&owner, team_id, "bob").is_err());
    engine.set_user_status("bob", MemberStatus::Active).unwrap();
    gateway.team_re_add_member_after_reset(&owner, team_id, "bob").unwrap();

    let details = gateway.team_get(&owner, "acme").unwrap();
    assert_eq!(details.members.writers[0].username, "bob");
    assert!(details.pending_invites.is_empty());
}

#[test]
fn invitelink_with_duration_can_be_accepted() {
    let (_, gateway, _) = seeded();
    let owner = as_user("owner");

    let link = gateway
        .team_create_seitan_invitelink_with_duration(&owner, "acme", TeamRole::Reader, Some(1), Some("7 D"))
        .unwrap();
    let expires_at = link.expires_at.unwrap();
    assert!(expires_at > chrono::Utc::now() + chrono::Duration::days(6));
    assert!(expires_at <= chrono::Utc::now() + chrono::Duration::days(7));

    let paste = format!("join us: {}", link.url);
    gateway.team_accept_invite(&as_user("alice"), &paste).unwrap();
    assert_eq!(gateway.team_get(&owner, "acme").unwrap().members.readers[0].username, "alice");

    // single use
    let err = gateway.team_accept_invite(&as_user("bob"), &link.url).unwrap_err();
    assert!(matches!(err, GatewayError::Engine(EngineError::PermissionDenied { .. })));
}

#[test]
fn invitelink_rejects_bad_duration_and_zero_uses() {
    let (engine, gateway, _) = seeded();
    let owner = as_user("owner");
    let err = gateway
        .team_create_seitan_invitelink_with_duration(&owner, "acme", TeamRole::Reader, None, Some("soonish"))
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(ValidationError::InvalidDuration { .. })));

    let err = gateway
        .team_create_seitan_invitelink(&owner, "acme", TeamRole::Reader, Some(0), None)
        .unwrap_err();
    let GatewayError::Validation(ValidationError::InvalidField { field, .. }) = err else {
        panic!("expected invalid max_uses, got {err:?}");
    };
    assert_eq!(field, "max_uses");
    assert_eq!(engine.total_calls(), 0);
}

#[test]
fn legacy_invite_token_is_trimmed() {
    let (engine, gateway, team_id) = seeded();
    engine.issue_legacy_token(team_id, "4f1c0b2e9d", TeamRole::Writer).unwrap();

    gateway.team_accept_invite(&as_user("carol"), "  4f1c0b2e9d\n").unwrap();
    assert_eq!(engine.calls_to("accept_server_trust_invite"), 1);
    assert_eq!(engine.calls_to("accept_seitan_token"), 0);
    assert_eq!(gateway.team_get(&as_user("owner"), "acme").unwrap().members.writers.len(), 1);
}

#[test]
fn access_requests_round_trip() {
    let (_, gateway, _) = seeded();
    let owner = as_user("owner");

    let res = gateway.team_request_access(&as_user("alice"), "acme").unwrap();
    assert!(!res.open);
    assert_eq!(
        gateway.team_list_my_access_requests(&as_user("alice"), None).unwrap(),
        vec![TeamName::parse("acme").unwrap()]
    );

    let pending = gateway.team_list_requests(&owner, Some("acme")).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].username, "alice");

    gateway.team_ignore_request(&owner, "acme", "alice").unwrap();
    assert!(gateway.team_list_requests(&owner, None).unwrap().is_empty());
}

#[test]
fn accept_or_request_joins_open_team_by_name() {
    let engine = Arc::new(InMemoryTeamEngine::new());
    engine.register_users(["owner", "alice"]).unwrap();
    let settings = TeamSettings {
        open: true,
        join_as: TeamRole::Writer,
    };
    engine.seed_team("commons", "owner", settings).unwrap();
    let gateway = gateway_with(&engine);

    let res = gateway
        .team_accept_invite_or_request_access(&as_user("alice"), "commons")
        .unwrap();
    assert!(res.was_team_name);
    assert!(res.was_open_team);
    assert!(!res.was_token);
    assert_eq!(engine.calls_to("accept_invite_or_request_access"), 1);
    assert_eq!(engine.calls_to("request_access"), 0);

    let teams = gateway.team_list_unverified(&as_user("alice"), "", false).unwrap();
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].role, TeamRole::Writer);

    let other = gateway
        .team_list_verified(&RequestContext::anonymous(), "alice", false)
        .unwrap();
    assert_eq!(other.len(), 1);
    assert!(is_auth_required(gateway.team_list_unverified(&RequestContext::anonymous(), "", false)));
}

#[test]
fn teammates_span_every_team() {
    let (engine, gateway, team_id) = seeded();
    engine.seed_member(team_id, "alice", TeamRole::Writer).unwrap();
    let other = engine.seed_team("side", "bob", TeamSettings::default()).unwrap();
    engine.seed_member(other, "alice", TeamRole::Reader).unwrap();

    let mates = gateway.team_list_teammates(&as_user("alice"), false).unwrap();
    let mut names: Vec<&str> = mates.iter().map(|m| m.username.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names, vec!["alice", "bob", "owner"]);
}

#[test]
fn showcase_settings() {
    let (engine, gateway, team_id) = seeded();
    engine.seed_member(team_id, "alice", TeamRole::Writer).unwrap();

    let showcase = teamgate::team::TeamShowcase {
        is_showcased: true,
        description: Some("we build things".to_string()),
        any_member_showcase: true,
    };
    let denied = gateway.set_team_showcase(&as_user("alice"), team_id, &showcase).unwrap_err();
    assert!(matches!(denied, GatewayError::Engine(EngineError::PermissionDenied { .. })));
    gateway.set_team_showcase(&as_user("owner"), team_id, &showcase).unwrap();
    gateway.set_team_member_showcase(&as_user("alice"), team_id, true).unwrap();

    assert_eq!(gateway.get_team_showcase(&RequestContext::anonymous(), team_id).unwrap(), showcase);
    let mine = gateway.get_team_and_member_showcase(&as_user("alice"), team_id).unwrap();
    assert!(mine.is_member_showcased);
    assert_eq!(mine.team, showcase);
}

#[test]
fn settings_rename_and_delete() {
    let (_, gateway, team_id) = seeded();
    let owner = as_user("owner");
    gateway.team_create(&owner, "acme.eng", true).unwrap();

    gateway.team_rename(&owner, "acme.eng", "acme.engineering").unwrap();
    let renamed = gateway.get_team_id(&owner, "acme.engineering").unwrap();
    assert!(gateway.get_team_id(&owner, "acme.eng").is_err());

    let err = gateway.team_delete(&owner, team_id).unwrap_err();
    assert!(err.is_engine());
    gateway.team_delete(&owner, renamed).unwrap();
    gateway.team_delete(&owner, team_id).unwrap();

    let settings = TeamSettings {
        open: true,
        join_as: TeamRole::Reader,
    };
    let created = gateway.team_create(&owner, "fresh", false).unwrap();
    gateway.team_set_settings(&owner, created.team_id, &settings).unwrap();
    assert!(gateway.team_get(&owner, "fresh").unwrap().settings.open);
}

#[test]
fn bot_settings_round_trip() {
    let (engine, gateway, team_id) = seeded();
    engine.register_users(["helperbot"]).unwrap();
    let owner = as_user("owner");
    let settings = teamgate::BotSettings {
        read_all: false,
        conversations: vec!["general".to_string()],
        triggers: vec!["!deploy".to_string()],
    };
    let mut args = TeamAddMemberArgs::new(team_id, "helperbot", TeamRole::RestrictedBot);
    args.bot_settings = Some(settings.clone());
    gateway.team_add_member(&owner, &args).unwrap();
    assert_eq!(gateway.team_get_bot_settings(&owner, "acme", "helperbot").unwrap(), settings);

    let updated = teamgate::BotSettings {
        read_all: true,
        ..settings
    };
    gateway.team_set_bot_settings(&owner, "acme", "helperbot", &updated).unwrap();
    assert_eq!(gateway.team_get_bot_settings(&owner, "acme", "helperbot").unwrap(), updated);
}

#[test]
fn permissions_follow_role() {
    let (engine, gateway, team_id) = seeded();
    engine.seed_member(team_id, "alice", TeamRole::Reader).unwrap();

    let reader = gateway.can_user_perform(&as_user("alice"), "acme").unwrap();
    assert!(!reader.manage_members);
    assert!(reader.leave_team);

    let owner = gateway.can_user_perform(&as_user("owner"), "acme").unwrap();
    assert!(owner.manage_members);
    assert!(owner.delete_team);

    gateway.team_rotate_key(&as_user("alice"), team_id, teamgate::keys::RotationType::Visible).unwrap();
}

#[test]
fn bulk_email_invites_report_each_address() {
    let (engine, gateway, team_id) = seeded();
    let owner = as_user("owner");

    let first = gateway
        .team_add_emails_bulk(&owner, "acme", "dana@example.com, Eli <eli@example.com>", TeamRole::Reader)
        .unwrap();
    assert_eq!(first.invited, vec!["dana@example.com", "eli@example.com"]);
    assert!(first.already_invited.is_empty() && first.malformed.is_empty());

    let second = gateway
        .team_add_emails_bulk(&owner, "acme", "eli@example.com\nfay@example.com\nnope", TeamRole::Reader)
        .unwrap();
    assert_eq!(second.invited, vec!["fay@example.com"]);
    assert_eq!(second.already_invited, vec!["eli@example.com"]);
    assert_eq!(second.malformed, vec!["nope"]);
    assert_eq!(gateway.notifications().scheduled(), 0);

    gateway
        .team_remove_member(&owner, team_id, &RemovalSelector::email("dana@example.com"), false)
        .unwrap();

    let calls = engine.calls_to("add_emails");
    let only_junk = gateway
        .team_add_emails_bulk(&owner, "acme", "junk, more junk", TeamRole::Reader)
        .unwrap();
    assert_eq!(only_junk.malformed.len(), 2);
    assert_eq!(engine.calls_to("add_emails"), calls);

    let err = gateway.team_add_emails_bulk(&owner, "acme", " , ", TeamRole::Reader).unwrap_err();
    assert!(matches!(err, GatewayError::Validation(ValidationError::EmptyBatch)));
    assert!(is_auth_required(gateway.team_add_emails_bulk(
        &RequestContext::anonymous(),
        "acme",
        "gus@example.com",
        TeamRole::Reader
    )));
    assert_eq!(engine.calls_to("add_emails"), calls);
}
