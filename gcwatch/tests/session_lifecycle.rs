//! Lifecycle manager against the scripted coordinator: login, launch,
//! machine auth, hello timeouts, drops and shutdown.

use std::sync::Arc;
use std::time::Duration;

use gcwatch::config::Credentials;
use gcwatch::credentials::{CredentialStore, sentry_digest};
use gcwatch::session::{ConnectionState, SessionManager, SessionOptions};
use gcwatch_sdk::client::{self, Command, SessionConfig, TransportError};
use gcwatch_sdk::event::Event;
use gcwatch_sdk::testing::{FakeCoordinator, Script};
use gcwatch_sdk::types::{EResult, ServerEndpoint};
use tempfile::TempDir;

struct Rig {
    manager: Arc<SessionManager>,
    fake: FakeCoordinator,
    store: CredentialStore,
    _dir: TempDir,
}

async fn start(script: Script, reconnect: bool, seed: impl FnOnce(&CredentialStore)) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("volumes"));
    seed(&store);

    let (handle, events, link) = client::attach(SessionConfig::default());
    let fake = FakeCoordinator::spawn(link, script);
    let manager = SessionManager::new(
        handle,
        store.clone(),
        Credentials {
            account_name: "bot".into(),
            password: "secret".into(),
        },
        SessionOptions {
            reconnect,
            relaunch_delay: Duration::from_secs(30),
        },
    );
    manager.start(events).await.unwrap();
    Rig {
        manager,
        fake,
        store,
        _dir: dir,
    }
}

fn launches(commands: &[Command]) -> usize {
    commands.iter().filter(|c| matches!(c, Command::Launch)).count()
}

fn servers() -> Vec<ServerEndpoint> {
    vec![
        ServerEndpoint {
            host: "162.254.197.40".into(),
            port: 27017,
        },
        ServerEndpoint {
            host: "162.254.197.41".into(),
            port: 27018,
        },
    ]
}

#[tokio::test]
async fn fresh_start_logs_in_launches_and_answers_machine_auth() {
    let rig = start(Script::default(), false, |_| {}).await;
    let mut readiness = rig.manager.readiness();
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);
    assert!(rig.manager.is_ready());

    let commands = rig.fake.commands();
    assert_eq!(commands[0], Command::Connect { servers: vec![] });
    match &commands[1] {
        Command::LogOn(details) => {
            assert_eq!(details.account_name, "bot");
            assert_eq!(details.sha_sentryfile, None);
        }
        other => panic!("expected logon, got {other:?}"),
    }
    assert_eq!(commands[2], Command::Launch);

    rig.fake
        .emit(Event::UpdateMachineAuth {
            job_id: 42,
            bytes: b"device challenge".to_vec(),
        })
        .await;
    assert!(rig.fake.wait_until(|c| c.iter().any(|c| matches!(c, Command::MachineAuthAck { .. }))).await);

    let expected = sentry_digest(b"device challenge").to_vec();
    assert_eq!(rig.store.load_sentry(), Some(expected.clone()));
    assert!(rig.fake.commands().contains(&Command::MachineAuthAck {
        job_id: 42,
        sha_file: expected,
    }));
}

#[tokio::test]
async fn machine_auth_is_not_acknowledged_when_the_sentry_cannot_be_saved() {
    // A regular file where the state directory should be.
    let rig = start(Script::default(), false, |store| {
        std::fs::write(store.dir(), b"not a directory").unwrap();
    })
    .await;
    assert!(rig.manager.readiness().wait_for(ConnectionState::CoordinatorReady).await);

    rig.fake
        .emit(Event::UpdateMachineAuth {
            job_id: 7,
            bytes: b"challenge".to_vec(),
        })
        .await;
    // Events are handled in order, so the next logon shows the challenge was processed.
    rig.fake.emit(Event::Connected).await;
    assert!(rig.fake.wait_until(|c| c.iter().filter(|c| matches!(c, Command::LogOn(_))).count() == 2).await);

    let commands = rig.fake.commands();
    assert!(!commands.iter().any(|c| matches!(c, Command::MachineAuthAck { .. })));
    assert!(commands.iter().all(|c| !matches!(c, Command::LogOn(d) if d.sha_sentryfile.is_some())));
    assert_eq!(rig.store.load_sentry(), None);
}

#[tokio::test]
async fn cached_servers_and_sentry_are_used_on_startup() {
    let sentry = sentry_digest(b"earlier challenge").to_vec();
    let seeded = sentry.clone();
    let rig = start(Script::default(), false, move |store| {
        store.save_servers(&servers()).unwrap();
        store.save_sentry(&seeded).unwrap();
    })
    .await;
    assert!(rig.manager.readiness().wait_for(ConnectionState::CoordinatorReady).await);

    let commands = rig.fake.commands();
    assert_eq!(commands[0], Command::Connect { servers: servers() });
    assert!(matches!(&commands[1], Command::LogOn(d) if d.sha_sentryfile.as_deref() == Some(&sentry[..])));
}

#[tokio::test]
async fn server_list_updates_are_persisted() {
    let rig = start(Script::default(), false, |_| {}).await;
    rig.fake.emit(Event::Servers(servers())).await;

    for _ in 0..100 {
        if rig.store.load_servers().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(rig.store.load_servers(), Some(servers()));
}

#[tokio::test]
async fn login_failure_is_not_retried() {
    let script = Script {
        log_on_result: Some(EResult::INVALID_PASSWORD),
        ..Default::default()
    };
    let rig = start(script, true, |_| {}).await;
    assert!(rig.manager.readiness().wait_for(ConnectionState::Disconnected).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.fake.count(|c| matches!(c, Command::Connect { .. })), 1);
    assert_eq!(rig.fake.count(|c| matches!(c, Command::LogOn(_))), 1);
    assert_eq!(rig.fake.count(|c| matches!(c, Command::Launch)), 0);
}

#[tokio::test]
async fn unready_coordinator_drops_back_to_logged_on() {
    let rig = start(Script::default(), false, |_| {}).await;
    let mut readiness = rig.manager.readiness();
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);

    rig.fake.emit(Event::CoordinatorUnready).await;
    assert!(readiness.wait_for(ConnectionState::LoggedOn).await);
    assert!(!rig.manager.is_ready());

    rig.fake.emit(Event::CoordinatorReady).await;
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);
}

#[tokio::test(start_paused = true)]
async fn hello_timeout_exits_then_relaunches_once() {
    let rig = start(Script::default(), false, |_| {}).await;
    let mut readiness = rig.manager.readiness();
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);

    rig.fake.emit(Event::HelloTimeout).await;
    assert!(readiness.wait_for(ConnectionState::LoggedOn).await);
    assert!(rig.fake.wait_until(|c| c.contains(&Command::Exit)).await);
    assert_eq!(launches(&rig.fake.commands()), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(rig.fake.wait_until(|c| launches(c) == 2).await);
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(launches(&rig.fake.commands()), 2);
}

#[tokio::test(start_paused = true)]
async fn relaunch_is_skipped_when_no_longer_logged_on() {
    let rig = start(Script::default(), true, |_| {}).await;
    let mut readiness = rig.manager.readiness();
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);

    rig.fake.emit(Event::HelloTimeout).await;
    rig.fake
        .emit(Event::LogOnResponse {
            result: EResult::ACCOUNT_LOGON_DENIED,
        })
        .await;
    assert!(readiness.wait_for(ConnectionState::Disconnected).await);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(launches(&rig.fake.commands()), 1);
}

#[tokio::test]
async fn transport_error_outside_production_shuts_down() {
    let rig = start(Script::default(), false, |_| {}).await;
    let mut readiness = rig.manager.readiness();
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);

    rig.fake
        .emit(Event::Error {
            message: "connection reset".into(),
        })
        .await;
    assert!(readiness.wait_for(ConnectionState::ShutDown).await);

    let commands = rig.fake.commands();
    assert!(commands.contains(&Command::Disconnect));
    assert_eq!(commands.iter().filter(|c| matches!(c, Command::Connect { .. })).count(), 1);
    assert!(rig.manager.handle().is_closed());
}

#[tokio::test]
async fn transport_error_in_production_reconnects_with_cached_servers() {
    let rig = start(Script::default(), true, |_| {}).await;
    let mut readiness = rig.manager.readiness();
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);

    rig.fake.emit(Event::Servers(servers())).await;
    rig.fake
        .emit(Event::LoggedOff {
            result: EResult::LOGGED_IN_ELSEWHERE,
        })
        .await;

    assert!(
        rig.fake
            .wait_until(|c| c.iter().filter(|c| matches!(c, Command::Connect { .. })).count() == 2)
            .await
    );
    assert!(rig.fake.commands().contains(&Command::Connect { servers: servers() }));
    assert!(rig.fake.wait_until(|c| launches(c) == 2).await);
    assert!(readiness.wait_for(ConnectionState::CoordinatorReady).await);
    assert!(!rig.manager.handle().is_closed());
}

#[tokio::test]
async fn shutdown_is_idempotent_and_blocks_further_commands() {
    let rig = start(Script::default(), false, |_| {}).await;
    assert!(rig.manager.readiness().wait_for(ConnectionState::CoordinatorReady).await);

    rig.manager.shutdown().await;
    rig.manager.shutdown().await;
    assert_eq!(rig.manager.state(), ConnectionState::ShutDown);

    assert_eq!(rig.fake.count(|c| matches!(c, Command::Disconnect)), 1);
    assert!(matches!(rig.manager.handle().launch().await, Err(TransportError::Closed)));

    // Events after shutdown change nothing.
    rig.fake.emit(Event::CoordinatorReady).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(rig.manager.state(), ConnectionState::ShutDown);
}
