use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use svcctl::{
    backend::{Backend, BackendKind, ServiceIdentity, SystemdBackend},
    capability::Capability,
    controller::ServiceController,
    error::ControlError,
    state::ServiceState,
};
use tempfile::{TempDir, tempdir};

/// Writes a stand-in for systemctl that logs its arguments and answers from
/// canned files in the same directory.
fn fake_systemctl(dir: &Path) -> PathBuf {
    let script = dir.join("systemctl");
    let body = format!(
        r#"#!/bin/sh
echo "$@" >> "{dir}/calls.log"
case "$*" in
  *show*)
    cat "{dir}/show.txt"
    ;;
  *is-enabled*)
    state=$(cat "{dir}/enabled.txt" 2>/dev/null || echo disabled)
    echo "$state"
    [ "$state" = "enabled" ]
    ;;
  *" enable "*)
    echo enabled > "{dir}/enabled.txt"
    ;;
  *" disable "*)
    echo disabled > "{dir}/enabled.txt"
    ;;
  *reload*)
    echo "Job for web.service failed." >&2
    exit 1
    ;;
esac
"#,
        dir = dir.display()
    );
    fs::write(&script, body).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn setup(show: &str) -> (TempDir, SystemdBackend) {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("show.txt"), show).unwrap();
    let program = fake_systemctl(dir.path());
    let backend = SystemdBackend::new(true).with_program(program);
    (dir, backend)
}

fn calls(dir: &TempDir) -> Vec<String> {
    fs::read_to_string(dir.path().join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn identity(blocking: bool) -> ServiceIdentity {
    ServiceIdentity::new("web", BackendKind::Systemd)
        .unwrap()
        .with_blocking(blocking)
}

#[test]
fn status_reads_unit_properties() {
    let (dir, backend) = setup("LoadState=loaded\nActiveState=active\nSubState=running\n");

    assert!(backend.exists(&identity(false)));
    assert_eq!(
        backend.status(&identity(false)).unwrap(),
        ServiceState::Running
    );
    assert_eq!(
        calls(&dir)[0],
        "--user show --property=LoadState,ActiveState,SubState web.service"
    );
}

#[test]
fn missing_unit_is_not_registered() {
    let (_dir, backend) = setup("LoadState=not-found\nActiveState=inactive\nSubState=dead\n");
    let controller = ServiceController::with_backend(identity(false), Box::new(backend));

    assert!(!controller.exists());
    assert_eq!(
        controller.error(),
        "service 'web' is not registered with the systemd backend"
    );
    assert!(matches!(
        controller.status(),
        Err(ControlError::IdentityNotFound { .. })
    ));
}

#[test]
fn blocking_decides_on_no_block() {
    let (dir, backend) = setup("LoadState=loaded\nActiveState=inactive\n");

    backend.start(&identity(false), false).unwrap();
    backend.start(&identity(true), true).unwrap();
    backend.stop(&identity(false)).unwrap();
    backend.stop(&identity(true)).unwrap();

    assert_eq!(
        calls(&dir),
        vec![
            "--user start --no-block web.service",
            "--user start web.service",
            "--user stop --no-block web.service",
            "--user stop web.service",
        ]
    );
}

#[test]
fn native_failures_carry_stderr() {
    let (_dir, backend) = setup("LoadState=loaded\nActiveState=active\n");
    let controller = ServiceController::with_backend(identity(true), Box::new(backend));

    let err = controller.reload().unwrap_err();
    assert!(matches!(err, ControlError::NativeOperationFailed { .. }));
    assert_eq!(controller.error(), "reload failed: Job for web.service failed.");
}

#[test]
fn pause_is_refused_before_systemctl_runs() {
    let (dir, backend) = setup("LoadState=loaded\nActiveState=active\n");
    let controller = ServiceController::with_backend(identity(true), Box::new(backend));

    assert!(!controller.support_flags().supports(Capability::Pause));
    assert!(controller.pause().unwrap_err().is_unsupported());
    assert!(controller.resume().unwrap_err().is_unsupported());
    assert!(calls(&dir).is_empty());
}

#[test]
fn autostart_round_trips_through_is_enabled() {
    let (dir, backend) = setup("LoadState=loaded\nActiveState=active\n");
    let controller = ServiceController::with_backend(identity(false), Box::new(backend));

    assert!(!controller.is_autostart_enabled().unwrap());
    controller.enable_autostart().unwrap();
    controller.enable_autostart().unwrap();
    assert!(controller.is_autostart_enabled().unwrap());
    controller.disable_autostart().unwrap();
    assert!(!controller.is_autostart_enabled().unwrap());

    assert!(calls(&dir).contains(&"--user enable web.service".to_string()));
}

#[test]
fn custom_commands_become_kill_signals() {
    let (dir, backend) = setup("LoadState=loaded\nActiveState=active\n");
    let controller = ServiceController::with_backend(identity(false), Box::new(backend));

    controller.custom_command("usr2").unwrap();
    assert!(controller.custom_command("bogus").is_err());
    assert!(controller.error().contains("'bogus' does not name a signal"));
    assert_eq!(calls(&dir), vec!["--user kill --signal=SIGUSR2 web.service"]);
}
