//! Lifecycle state machine run inside the service process.
//!
//! On entry to a state the machine reports it to every sink and announces the
//! matching token *before* running the handler for that state, so an observer that
//! receives a token knows the transition has begun, not that it has finished.
use std::{error::Error, sync::Arc};

use tracing::{info, warn};

use crate::{
    error::LifecycleError,
    state::{LifecycleEvent, ServiceState},
};

/// Result type of service handler callbacks.
pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Application hooks invoked by the lifecycle state machine.
pub trait ServiceHandler {
    /// Startup work. The service enters `Running` once it succeeds.
    fn on_start(&mut self) -> HandlerResult;

    fn on_stop(&mut self) -> HandlerResult {
        Ok(())
    }

    fn on_reload(&mut self) -> HandlerResult {
        Ok(())
    }

    fn on_pause(&mut self) -> HandlerResult {
        Ok(())
    }

    fn on_resume(&mut self) -> HandlerResult {
        Ok(())
    }

    /// Backend specific command, identified by a small integer code.
    fn on_command(&mut self, code: i32) -> HandlerResult {
        let _ = code;
        Ok(())
    }
}

/// Receives state changes and lifecycle tokens.
pub trait LifecycleSink: Send + Sync {
    fn state_entered(&self, state: ServiceState) {
        let _ = state;
    }

    fn event(&self, event: LifecycleEvent) {
        let _ = event;
    }
}

/// The state machine owned by the running service.
pub struct Lifecycle<H> {
    state: ServiceState,
    handler: H,
    sinks: Vec<Arc<dyn LifecycleSink>>,
}

impl<H: ServiceHandler> Lifecycle<H> {
    /// A stopped service driving `handler`.
    pub fn new(handler: H, sinks: Vec<Arc<dyn LifecycleSink>>) -> Self {
        Self {
            state: ServiceState::Stopped,
            handler,
            sinks,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Stopped → Starting → Running, or back to Stopped when startup fails.
    ///
    /// `started` goes out once the start handler succeeds, right before `Running`
    /// is entered.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.require("start", &[ServiceState::Stopped])?;
        self.enter(ServiceState::Starting);

        if let Err(err) = self.handler.on_start() {
            self.enter(ServiceState::Stopped);
            return Err(handler_error("start", err));
        }

        // Announced first so an observer attaching once `Running` is reported
        // cannot receive it.
        self.announce(LifecycleEvent::Started);
        self.enter(ServiceState::Running);
        Ok(())
    }

    /// Announces a reload and runs the reload handler. The state does not change.
    pub fn reload(&mut self) -> Result<(), LifecycleError> {
        self.require("reload", &[ServiceState::Running])?;
        self.announce(LifecycleEvent::Reloading);
        self.handler
            .on_reload()
            .map_err(|err| handler_error("reload", err))
    }

    /// Running → Pausing → Paused, or back to Running when the handler fails.
    pub fn pause(&mut self) -> Result<(), LifecycleError> {
        self.require("pause", &[ServiceState::Running])?;
        self.enter(ServiceState::Pausing);
        self.announce(LifecycleEvent::Pausing);

        match self.handler.on_pause() {
            Ok(()) => {
                self.enter(ServiceState::Paused);
                Ok(())
            }
            Err(err) => {
                self.enter(ServiceState::Running);
                Err(handler_error("pause", err))
            }
        }
    }

    /// Paused → Resuming → Running, or back to Paused when the handler fails.
    pub fn resume(&mut self) -> Result<(), LifecycleError> {
        self.require("resume", &[ServiceState::Paused])?;
        self.enter(ServiceState::Resuming);
        self.announce(LifecycleEvent::Resuming);

        match self.handler.on_resume() {
            Ok(()) => {
                self.enter(ServiceState::Running);
                Ok(())
            }
            Err(err) => {
                self.enter(ServiceState::Paused);
                Err(handler_error("resume", err))
            }
        }
    }

    /// Running|Paused → Stopping → Stopped. The service ends up stopped even when
    /// the stop handler fails.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        self.require("stop", &[ServiceState::Running, ServiceState::Paused])?;
        self.enter(ServiceState::Stopping);
        self.announce(LifecycleEvent::Stopping);

        let result = self.handler.on_stop();
        self.enter(ServiceState::Stopped);
        result.map_err(|err| handler_error("stop", err))
    }

    /// Forwards a custom command to a running or paused service.
    pub fn command(&mut self, code: i32) -> Result<(), LifecycleError> {
        self.require("run a command on", &[ServiceState::Running, ServiceState::Paused])?;
        self.handler
            .on_command(code)
            .map_err(|err| handler_error("command", err))
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[ServiceState],
    ) -> Result<(), LifecycleError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                operation,
                state: self.state,
            })
        }
    }

    fn enter(&mut self, state: ServiceState) {
        debug_assert!(
            self.state.can_transition_to(state),
            "illegal transition {} -> {}",
            self.state,
            state
        );
        info!("Service state: {} -> {}", self.state, state);
        self.state = state;
        for sink in &self.sinks {
            sink.state_entered(state);
        }
    }

    fn announce(&self, event: LifecycleEvent) {
        for sink in &self.sinks {
            sink.event(event);
        }
    }
}

fn handler_error(operation: &'static str, err: Box<dyn Error + Send + Sync>) -> LifecycleError {
    warn!("{operation} handler failed: {err}");
    LifecycleError::Handler {
        operation,
        message: err.to_string(),
    }
}
