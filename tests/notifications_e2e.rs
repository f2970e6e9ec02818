use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use teamgate::notify::ConversationKind;
use teamgate::{
    ChatNotifier, GatewayConfig, InMemoryCacheStore, InMemoryTeamEngine, MembershipRequest, NotificationConfig,
    NotificationTask, NotifyError, RequestContext, Session, TeamAddMemberArgs, TeamId, TeamName, TeamRole,
    TeamSettings, TeamsGateway, UserRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Welcome(NotificationTask),
    Created { team: String, creator: String },
}

/// Records every delivery; fails welcomes addressed to `reject`.
struct Recorder {
    tx: Sender<Sent>,
    reject: Option<&'static str>,
}

impl ChatNotifier for Recorder {
    fn send_welcome(&self, task: &NotificationTask) -> Result<(), NotifyError> {
        if self.reject == Some(task.recipient_username.as_str()) {
            return Err(NotifyError::Delivery {
                recipient: task.recipient_username.clone(),
                reason: "conversation unavailable".to_string(),
            });
        }
        let _ = self.tx.send(Sent::Welcome(task.clone()));
        Ok(())
    }

    fn announce_team_created(&self, team: &TeamName, creator: &str) -> Result<(), NotifyError> {
        let _ = self.tx.send(Sent::Created {
            team: team.to_string(),
            creator: creator.to_string(),
        });
        Ok(())
    }
}

struct Harness {
    engine: Arc<InMemoryTeamEngine>,
    gateway: TeamsGateway,
    sent: Receiver<Sent>,
    team_id: TeamId,
}

fn harness(reject: Option<&'static str>) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let engine = Arc::new(InMemoryTeamEngine::new());
    engine.register_users(["owner", "alice", "bob", "carol"]).unwrap();
    let team_id = engine.seed_team("acme", "owner", TeamSettings::default()).unwrap();

    let (tx, sent) = unbounded();
    let cfg = GatewayConfig {
        notifications: NotificationConfig {
            workers: 2,
            queue_capacity: 64,
        },
        ..GatewayConfig::default()
    };
    let gateway = TeamsGateway::new(
        cfg,
        engine.clone(),
        Arc::new(Recorder { tx, reject }),
        Arc::new(InMemoryCacheStore::new()),
    )
    .unwrap();
    Harness {
        engine,
        gateway,
        sent,
        team_id,
    }
}

fn owner() -> RequestContext {
    RequestContext::authenticated(Session::new("owner", 3))
}

fn collect_welcomes(rx: &Receiver<Sent>, n: usize) -> Vec<NotificationTask> {
    let mut out = Vec::new();
    while out.len() < n {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Sent::Welcome(task)) => out.push(task),
            Ok(Sent::Created { .. }) => {}
            Err(e) => panic!("expected {n} welcomes, got {}: {e}", out.len()),
        }
    }
    out.sort_by(|a, b| a.recipient_username.cmp(&b.recipient_username));
    out
}

fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn bulk_add_welcomes_active_members_with_their_roles() {
    let h = harness(None);
    let requests = vec![
        MembershipRequest::new("alice", TeamRole::Writer),
        MembershipRequest::new("email:dana@example.com", TeamRole::Reader),
        MembershipRequest::new("bob", TeamRole::Admin),
    ];
    let res = h
        .gateway
        .team_add_members_multi_role(&owner(), h.team_id, &requests, Some("welcome aboard"), true)
        .unwrap();
    assert!(res.notifications_scheduled);
    assert!(res.not_added.is_empty());

    let welcomes = collect_welcomes(&h.sent, 2);
    assert_eq!(welcomes[0].recipient_username, "alice");
    assert_eq!(welcomes[0].role, TeamRole::Writer);
    assert_eq!(welcomes[1].recipient_username, "bob");
    assert_eq!(welcomes[1].role, TeamRole::Admin);
    assert!(welcomes.iter().all(|w| w.team_id == h.team_id));
    assert!(welcomes.iter().all(|w| w.conversation_kind == ConversationKind::Team));

    wait_for(|| h.gateway.notifications().delivered() == 2);
    assert!(h.sent.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn restricted_contact_gets_no_welcome() {
    let h = harness(None);
    h.engine
        .register(UserRecord {
            restricts_contact: true,
            ..UserRecord::new("bob")
        })
        .unwrap();

    let res = h
        .gateway
        .team_add_members(
            &owner(),
            h.team_id,
            &["alice".to_string(), "bob".to_string()],
            TeamRole::Writer,
            None,
            true,
        )
        .unwrap();
    assert_eq!(res.not_added, vec!["bob".to_string()]);
    assert_eq!(h.gateway.notifications().scheduled(), 1);

    let welcomes = collect_welcomes(&h.sent, 1);
    assert_eq!(welcomes[0].recipient_username, "alice");
}

#[test]
fn overflowing_queue_still_welcomes_everyone() {
    struct Gated {
        tx: Sender<String>,
        gate: Receiver<()>,
    }

    impl ChatNotifier for Gated {
        fn send_welcome(&self, task: &NotificationTask) -> Result<(), NotifyError> {
            let _ = self.gate.recv();
            let _ = self.tx.send(task.recipient_username.clone());
            Ok(())
        }

        fn announce_team_created(&self, _team: &TeamName, _creator: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    let engine = Arc::new(InMemoryTeamEngine::new());
    engine.register_users(["owner", "alice", "bob", "carol", "dave"]).unwrap();
    let team_id = engine.seed_team("acme", "owner", TeamSettings::default()).unwrap();
    let (tx, rx) = unbounded();
    let (gate_tx, gate) = crossbeam_channel::bounded::<()>(0);
    let cfg = GatewayConfig {
        notifications: NotificationConfig {
            workers: 1,
            queue_capacity: 1,
        },
        ..GatewayConfig::default()
    };
    let gateway = TeamsGateway::new(
        cfg,
        engine,
        Arc::new(Gated { tx, gate }),
        Arc::new(InMemoryCacheStore::new()),
    )
    .unwrap();

    let names: Vec<String> = ["alice", "bob", "carol", "dave"].iter().map(ToString::to_string).collect();
    let res = gateway
        .team_add_members(&owner(), team_id, &names, TeamRole::Writer, None, true)
        .unwrap();
    assert!(res.notifications_scheduled);
    assert_eq!(gateway.notifications().scheduled(), 4);
    assert_eq!(gateway.notifications().dropped(), 0);

    drop(gate_tx);
    let mut delivered: Vec<String> = (0..4).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
    delivered.sort();
    assert_eq!(delivered, names);
    wait_for(|| gateway.notifications().delivered() == 4);
}

#[test]
fn bulk_add_without_notify_sends_nothing() {
    let h = harness(None);
    let res = h
        .gateway
        .team_add_members(&owner(), h.team_id, &["alice".to_string()], TeamRole::Reader, None, false)
        .unwrap();
    assert!(!res.notifications_scheduled);
    assert_eq!(h.gateway.notifications().scheduled(), 0);
    assert!(h.sent.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn failed_delivery_does_not_affect_result() {
    let h = harness(Some("alice"));
    let res = h
        .gateway
        .team_add_members(
            &owner(),
            h.team_id,
            &["alice".to_string(), "carol".to_string()],
            TeamRole::Writer,
            None,
            true,
        )
        .unwrap();
    assert!(res.notifications_scheduled);

    let welcomes = collect_welcomes(&h.sent, 1);
    assert_eq!(welcomes[0].recipient_username, "carol");
    wait_for(|| h.gateway.notifications().failed() == 1 && h.gateway.notifications().delivered() == 1);

    let members = h.gateway.team_get_members_by_id(&owner(), h.team_id).unwrap();
    assert_eq!(members.len(), 3);
}

#[test]
fn single_add_sets_chat_sending_only_for_active_members() {
    let h = harness(None);

    let mut args = TeamAddMemberArgs::new(h.team_id, "alice", TeamRole::Reader);
    args.send_chat_notification = true;
    let res = h.gateway.team_add_member(&owner(), &args).unwrap();
    assert!(res.chat_sending);
    assert!(!res.invited);
    let welcomes = collect_welcomes(&h.sent, 1);
    assert_eq!(welcomes[0].recipient_username, "alice");
    assert_eq!(welcomes[0].role, TeamRole::Reader);

    let mut invite = TeamAddMemberArgs::new(h.team_id, "", TeamRole::Reader);
    invite.phone = Some("+1 555-010-7788".to_string());
    invite.send_chat_notification = true;
    let res = h.gateway.team_add_member(&owner(), &invite).unwrap();
    assert!(res.invited);
    assert!(!res.chat_sending);

    let quiet = TeamAddMemberArgs::new(h.team_id, "bob", TeamRole::Reader);
    assert!(!h.gateway.team_add_member(&owner(), &quiet).unwrap().chat_sending);

    assert_eq!(h.gateway.notifications().scheduled(), 1);
    assert_eq!(h.engine.calls_to("add_member"), 3);
}

#[test]
fn team_create_announces_synchronously() {
    let h = harness(None);
    let created = h.gateway.team_create(&owner(), "acme.design", false).unwrap();
    assert!(created.chat_sent);

    let first = h.sent.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(
        first,
        Sent::Created {
            team: "acme.design".to_string(),
            creator: "owner".to_string(),
        }
    );
}

#[test]
fn welcomes_run_in_background() {
    struct Slow {
        tx: Sender<String>,
    }

    impl ChatNotifier for Slow {
        fn send_welcome(&self, task: &NotificationTask) -> Result<(), NotifyError> {
            std::thread::sleep(Duration::from_millis(200));
            let _ = self.tx.send(task.recipient_username.clone());
            Ok(())
        }

        fn announce_team_created(&self, _team: &TeamName, _creator: &str) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    let engine = Arc::new(InMemoryTeamEngine::new());
    engine.register_users(["owner", "alice"]).unwrap();
    let team_id = engine.seed_team("acme", "owner", TeamSettings::default()).unwrap();
    let (tx, rx) = unbounded();
    let gateway = TeamsGateway::new(
        GatewayConfig::default(),
        engine,
        Arc::new(Slow { tx }),
        Arc::new(InMemoryCacheStore::new()),
    )
    .unwrap();

    let started = Instant::now();
    gateway
        .team_add_members(&owner(), team_id, &["alice".to_string()], TeamRole::Writer, None, true)
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "alice");
}
