#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    thread,
    time::{Duration, Instant},
};

use common::{
    EVENT_TIMEOUT, HomeEnvGuard, echo_roundtrip, free_port, install_echo, standard_controller,
    wait_for_state,
};
use svcctl::{
    channel::{NotificationObserver, channel_path},
    config::ServiceDefinition,
    constants::ECHO_PORT_ENV,
    error::{ChannelError, ControlError},
    state::{LifecycleEvent, ServiceState},
    wait::WaitPolicy,
};
use tempfile::tempdir;

#[test]
fn full_lifecycle_over_the_standard_backend() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let port = free_port();
    install_echo("echo-full", port);
    let controller = standard_controller("echo-full", true);
    assert!(controller.exists());
    assert_eq!(controller.status().unwrap(), ServiceState::Stopped);

    // Blocking start returns only once the service reports Running.
    controller.start().unwrap();
    assert_eq!(controller.status().unwrap(), ServiceState::Running);
    assert_eq!(echo_roundtrip(port, b"hello").as_deref(), Some(&b"hello"[..]));

    // Attached after "started" went out, so the first token seen is "reloading".
    let mut observer = NotificationObserver::connect("echo-full", EVENT_TIMEOUT).unwrap();
    assert!(matches!(
        observer.next_event(Duration::from_millis(200)),
        Err(ChannelError::Timeout(_))
    ));

    controller.reload().unwrap();
    assert_eq!(
        observer.next_event(EVENT_TIMEOUT).unwrap(),
        LifecycleEvent::Reloading
    );

    controller.pause().unwrap();
    assert_eq!(controller.status().unwrap(), ServiceState::Paused);
    assert_eq!(
        observer.next_event(EVENT_TIMEOUT).unwrap(),
        LifecycleEvent::Pausing
    );
    assert_eq!(echo_roundtrip(port, b"ignored"), None);

    controller.resume().unwrap();
    assert_eq!(controller.status().unwrap(), ServiceState::Running);
    assert_eq!(
        observer.next_event(EVENT_TIMEOUT).unwrap(),
        LifecycleEvent::Resuming
    );
    assert_eq!(echo_roundtrip(port, b"again").as_deref(), Some(&b"again"[..]));

    // Custom commands do not announce anything.
    controller.custom_command("usr1").unwrap();

    controller.stop().unwrap();
    assert_eq!(controller.status().unwrap(), ServiceState::Stopped);
    assert_eq!(
        observer.next_event(EVENT_TIMEOUT).unwrap(),
        LifecycleEvent::Stopping
    );
    observer.wait_disconnected(EVENT_TIMEOUT).unwrap();
    assert!(!channel_path("echo-full").exists());
    assert_eq!(controller.error(), "");
}

#[test]
fn non_blocking_start_can_be_awaited() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let port = free_port();
    install_echo("echo-async", port);
    let controller = standard_controller("echo-async", false);

    controller.start().unwrap();
    controller
        .wait_for_state(
            ServiceState::Running,
            WaitPolicy::new(Duration::from_millis(50), EVENT_TIMEOUT),
        )
        .unwrap();

    controller.stop().unwrap();
    wait_for_state("echo-async", ServiceState::Stopped);
    assert_eq!(controller.status().unwrap(), ServiceState::Stopped);
}

#[test]
fn reload_picks_up_a_changed_registration() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let old_port = free_port();
    let new_port = free_port();
    install_echo("echo-reload", old_port);
    let controller = standard_controller("echo-reload", true);
    controller.start().unwrap();
    assert_eq!(echo_roundtrip(old_port, b"old").as_deref(), Some(&b"old"[..]));

    let mut definition = ServiceDefinition::load("echo-reload").unwrap().unwrap();
    definition
        .env
        .insert(ECHO_PORT_ENV.to_string(), new_port.to_string());
    definition.save("echo-reload").unwrap();
    controller.reload().unwrap();

    let deadline = Instant::now() + EVENT_TIMEOUT;
    while echo_roundtrip(new_port, b"new").is_none() {
        assert!(Instant::now() < deadline, "echo never rebound to {new_port}");
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(echo_roundtrip(old_port, b"old"), None);

    controller.stop().unwrap();
    assert_eq!(controller.status().unwrap(), ServiceState::Stopped);
}

#[test]
fn state_conflicts_are_native_failures() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let port = free_port();
    install_echo("echo-conflict", port);
    let controller = standard_controller("echo-conflict", true);

    // Nothing runs yet: the backend, not the controller, refuses.
    let err = controller.resume().unwrap_err();
    assert!(matches!(err, ControlError::NativeOperationFailed { .. }));
    assert!(controller.error().contains("is not running"));

    controller.start().unwrap();
    let err = controller.start().unwrap_err();
    assert!(matches!(err, ControlError::NativeOperationFailed { .. }));
    assert!(controller.error().contains("already running"));

    let err = controller.resume().unwrap_err();
    assert!(
        err.to_string()
            .contains("cannot resume service 'echo-conflict' while it is running")
    );

    controller.stop().unwrap();
    assert_eq!(controller.status().unwrap(), ServiceState::Stopped);
}

#[test]
fn unregistered_service_is_reported_through_error() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let controller = standard_controller("ghost", false);
    assert!(!controller.exists());
    assert_eq!(
        controller.error(),
        "service 'ghost' is not registered with the standard backend"
    );

    assert!(matches!(
        controller.status(),
        Err(ControlError::IdentityNotFound { .. })
    ));
    assert!(controller.error().contains("'ghost' is not registered"));
    assert!(controller.start().is_err());
}

#[test]
fn autostart_toggles_are_idempotent() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    install_echo("echo-boot", free_port());
    let controller = standard_controller("echo-boot", false);
    assert!(!controller.is_autostart_enabled().unwrap());

    controller.enable_autostart().unwrap();
    controller.enable_autostart().unwrap();
    assert!(controller.is_autostart_enabled().unwrap());

    controller.disable_autostart().unwrap();
    controller.disable_autostart().unwrap();
    assert!(!controller.is_autostart_enabled().unwrap());
}

#[test]
fn crashed_startup_is_reported() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    // An invalid port makes the start handler fail and the process exit.
    let mut definition =
        svcctl::config::ServiceDefinition::new(env!("CARGO_BIN_EXE_svcctl-echo"));
    definition.env.insert(
        svcctl::constants::ECHO_PORT_ENV.to_string(),
        "not-a-port".to_string(),
    );
    definition.save("echo-broken").unwrap();

    let controller = standard_controller("echo-broken", true);
    let err = controller.start().unwrap_err();
    assert!(matches!(err, ControlError::NativeOperationFailed { .. }));
    assert_eq!(controller.status().unwrap(), ServiceState::Stopped);
}
