use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use svcctl::{
    backend::{Backend, BackendKind, ErrorSlot, ServiceIdentity},
    capability::{Capability, SupportFlags},
    controller::ServiceController,
    error::ControlError,
    state::ServiceState,
};

/// Backend that counts every native call it receives.
///
/// Every operation is implemented so that a call reaching it is observable, while
/// `flags` decides what the backend claims to support.
struct CountingBackend {
    flags: SupportFlags,
    calls: Arc<AtomicUsize>,
    errors: ErrorSlot,
}

impl CountingBackend {
    fn hit<T>(&self, value: T) -> Result<T, ControlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.errors.record(Ok(value))
    }
}

impl Backend for CountingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Standard
    }

    fn support_flags(&self) -> SupportFlags {
        self.flags
    }

    fn error_slot(&self) -> &ErrorSlot {
        &self.errors
    }

    fn exists(&self, _identity: &ServiceIdentity) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn status(&self, _identity: &ServiceIdentity) -> Result<ServiceState, ControlError> {
        self.hit(ServiceState::Running)
    }

    fn start(&self, _identity: &ServiceIdentity, _blocking: bool) -> Result<(), ControlError> {
        self.hit(())
    }

    fn stop(&self, _identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.hit(())
    }

    fn pause(&self, _identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.hit(())
    }

    fn resume(&self, _identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.hit(())
    }

    fn reload(&self, _identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.hit(())
    }

    fn is_autostart_enabled(&self, _identity: &ServiceIdentity) -> Result<bool, ControlError> {
        self.hit(true)
    }

    fn enable_autostart(&self, _identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.hit(())
    }

    fn disable_autostart(&self, _identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.hit(())
    }

    fn custom_command(&self, _identity: &ServiceIdentity, _token: &str) -> Result<(), ControlError> {
        self.hit(())
    }
}

fn controller(flags: SupportFlags) -> (ServiceController, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = CountingBackend {
        flags,
        calls: calls.clone(),
        errors: ErrorSlot::default(),
    };
    let identity = ServiceIdentity::new("counted", BackendKind::Standard)
        .unwrap()
        .with_blocking(true);
    (
        ServiceController::with_backend(identity, Box::new(backend)),
        calls,
    )
}

fn run_operation(controller: &ServiceController, capability: Capability) -> Result<(), ControlError> {
    match capability {
        Capability::Status => controller.status().map(|_| ()),
        Capability::Start => controller.start(),
        Capability::Stop => controller.stop(),
        Capability::Pause => controller.pause(),
        Capability::Resume => controller.resume(),
        Capability::Reload => controller.reload(),
        Capability::CustomCommands => controller.custom_command("usr1"),
        Capability::SetAutostart => controller
            .is_autostart_enabled()
            .and_then(|_| controller.enable_autostart())
            .and_then(|_| controller.disable_autostart()),
        Capability::Blocking => Ok(()),
    }
}

#[test]
fn unsupported_operations_never_reach_the_backend() {
    let (controller, calls) = controller(SupportFlags::empty());

    for capability in SupportFlags::all().capabilities() {
        if capability == Capability::Blocking {
            continue;
        }
        let err = run_operation(&controller, capability).unwrap_err();
        assert!(err.is_unsupported(), "{capability} should be unsupported");
        assert_eq!(
            controller.error(),
            format!("{capability} is not supported by the standard backend")
        );
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn supported_operations_are_forwarded_once() {
    let (controller, calls) = controller(SupportFlags::all());

    for capability in SupportFlags::all().capabilities() {
        if capability == Capability::Blocking || capability == Capability::SetAutostart {
            continue;
        }
        let before = calls.load(Ordering::SeqCst);
        run_operation(&controller, capability).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    }
    assert_eq!(controller.error(), "");
}

#[test]
fn a_capability_miss_does_not_stop_later_checks() {
    let flags = SupportFlags::from_capabilities(&[Capability::Status, Capability::Start]);
    let (controller, calls) = controller(flags);

    assert!(controller.pause().unwrap_err().is_unsupported());
    assert!(controller.resume().unwrap_err().is_unsupported());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    controller.start().unwrap();
    assert_eq!(controller.status().unwrap(), ServiceState::Running);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(controller.error(), "");
}

#[test]
fn support_flags_are_read_once() {
    let flags = SupportFlags::from_capabilities(&[Capability::Reload]);
    let (controller, _calls) = controller(flags);

    assert_eq!(controller.support_flags(), flags);
    assert!(!controller.is_blocking());
    assert_eq!(controller.support_flags().to_string(), "reload");
}

#[test]
fn blocking_mode_survives_when_supported() {
    let (controller, _calls) = controller(SupportFlags::all());
    assert!(controller.is_blocking());
    assert!(controller.exists());
}
