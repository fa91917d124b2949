#[path = "common/mod.rs"]
mod common;

use std::{fs, sync::Arc, thread, time::Duration};

use common::{EVENT_TIMEOUT, HomeEnvGuard};
use svcctl::{
    channel::{NotificationObserver, NotificationServer, channel_path},
    error::ChannelError,
    lifecycle::{HandlerResult, Lifecycle, LifecycleSink, ServiceHandler},
    state::LifecycleEvent,
};
use tempfile::tempdir;

struct Quiet;

impl ServiceHandler for Quiet {
    fn on_start(&mut self) -> HandlerResult {
        Ok(())
    }
}

fn lifecycle_on(server: &Arc<NotificationServer>) -> Lifecycle<Quiet> {
    let sink: Arc<dyn LifecycleSink> = server.clone();
    Lifecycle::new(Quiet, vec![sink])
}

#[test]
fn observer_sees_the_full_sequence_in_order() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let server = Arc::new(NotificationServer::bind("ordered").unwrap());
    assert_eq!(server.path(), channel_path("ordered"));
    let mut observer = NotificationObserver::connect("ordered", EVENT_TIMEOUT).unwrap();

    let mut lifecycle = lifecycle_on(&server);
    lifecycle.start().unwrap();
    lifecycle.reload().unwrap();
    lifecycle.pause().unwrap();
    lifecycle.resume().unwrap();
    lifecycle.stop().unwrap();
    drop(lifecycle);

    let received: Vec<LifecycleEvent> = (0..5)
        .map(|_| observer.next_event(EVENT_TIMEOUT).unwrap())
        .collect();
    assert_eq!(
        received,
        vec![
            LifecycleEvent::Started,
            LifecycleEvent::Reloading,
            LifecycleEvent::Pausing,
            LifecycleEvent::Resuming,
            LifecycleEvent::Stopping,
        ]
    );

    match Arc::try_unwrap(server) {
        Ok(server) => server.shutdown(),
        Err(_) => panic!("server still shared"),
    }
    observer.wait_disconnected(EVENT_TIMEOUT).unwrap();
    assert!(!channel_path("ordered").exists());
}

#[test]
fn late_observer_waits_for_the_next_token() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let server = Arc::new(NotificationServer::bind("late").unwrap());
    let mut lifecycle = lifecycle_on(&server);
    lifecycle.start().unwrap();

    let mut observer = NotificationObserver::connect("late", EVENT_TIMEOUT).unwrap();
    assert!(matches!(
        observer.next_event(Duration::from_millis(300)),
        Err(ChannelError::Timeout(_))
    ));

    let reloader = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        lifecycle.reload().unwrap();
        lifecycle
    });
    assert_eq!(
        observer.next_event(EVENT_TIMEOUT).unwrap(),
        LifecycleEvent::Reloading
    );
    reloader.join().unwrap();
}

#[test]
fn connect_gives_up_when_nobody_listens() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let err = NotificationObserver::connect("absent", Duration::from_millis(150))
        .err()
        .unwrap();
    assert!(matches!(err, ChannelError::NotAvailable(name) if name == "absent"));
}

#[test]
fn observer_connecting_before_bind_is_admitted() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let connector =
        thread::spawn(|| NotificationObserver::connect("eventual", EVENT_TIMEOUT).unwrap());
    thread::sleep(Duration::from_millis(200));

    let server = NotificationServer::bind("eventual").unwrap();
    let mut observer = connector.join().unwrap();
    server.emit(LifecycleEvent::Started);
    assert_eq!(
        observer.next_event(EVENT_TIMEOUT).unwrap(),
        LifecycleEvent::Started
    );
}
