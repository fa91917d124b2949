use std::{
    collections::BTreeMap,
    error::Error,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use svcctl::{
    backend::{BackendKind, ServiceIdentity, StandardBackend, create_backend},
    channel::NotificationObserver,
    cli::{AutostartAction, Cli, Commands, parse_args},
    config::{ControlConfig, ServiceDefinition, parse_duration},
    controller::ServiceController,
    error::{ChannelError, ControlError},
    runtime::{self, RuntimeMode},
    state::ServiceState,
    store::StatusStore,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    if args.sys {
        runtime::init(RuntimeMode::System);
    } else {
        runtime::init(RuntimeMode::User);
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    let config = ControlConfig::load(args.config.as_deref())?;
    let kind = match &args.backend {
        Some(raw) => BackendKind::parse(raw)?,
        None => config.backend,
    };
    let controller = |name: &str| -> Result<ServiceController, ControlError> {
        let identity = ServiceIdentity::new(name, kind)?.with_blocking(args.blocking);
        Ok(ServiceController::new(identity, &config))
    };

    match args.command {
        Commands::Exists { name } => {
            let controller = controller(&name)?;
            if !controller.exists() {
                return Err(controller.error().into());
            }
            println!("{name} exists");
        }
        Commands::Status { name } => {
            let state = controller(&name)?.status()?;
            println!("{name}: {state}");
        }
        Commands::Start { name } => controller(&name)?.start()?,
        Commands::Stop { name } => controller(&name)?.stop()?,
        Commands::Pause { name } => controller(&name)?.pause()?,
        Commands::Resume { name } => controller(&name)?.resume()?,
        Commands::Reload { name } => controller(&name)?.reload()?,
        Commands::Command { name, token } => controller(&name)?.custom_command(&token)?,
        Commands::Autostart { action } => match action {
            AutostartAction::Status { name } => {
                let enabled = controller(&name)?.is_autostart_enabled()?;
                println!(
                    "{name}: autostart {}",
                    if enabled { "enabled" } else { "disabled" }
                );
            }
            AutostartAction::Enable { name } => controller(&name)?.enable_autostart()?,
            AutostartAction::Disable { name } => controller(&name)?.disable_autostart()?,
        },
        Commands::Flags => {
            let backend = create_backend(kind, &config);
            println!("{kind}: {}", backend.support_flags());
        }
        Commands::Wait {
            name,
            state,
            timeout,
        } => {
            let target: ServiceState = state
                .parse()
                .map_err(|_| format!("unknown service state '{state}'"))?;
            let controller = controller(&name)?;
            match timeout {
                Some(timeout) => {
                    let policy = config.start_wait().with_timeout(parse_duration(&timeout)?);
                    controller.wait_for_state(target, policy)?;
                }
                None => controller.wait_until(target)?,
            }
        }
        Commands::Watch {
            name,
            connect_timeout,
        } => watch(&name, parse_duration(&connect_timeout)?)?,
        Commands::Install {
            name,
            env,
            working_dir,
            command,
        } => install(&name, env, working_dir, command)?,
        Commands::Uninstall { name } => {
            ServiceIdentity::new(name.as_str(), BackendKind::Standard)?;
            if ServiceDefinition::remove(&name)? {
                info!("Removed registration of '{name}'");
            } else {
                warn!("Service '{name}' was not registered");
            }
            StatusStore::new(&name).clear()?;
        }
        Commands::Boot => boot(&config, args.blocking)?,
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn watch(name: &str, connect_timeout: Duration) -> Result<(), Box<dyn Error>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    let mut observer = NotificationObserver::connect(name, connect_timeout)?;
    info!("Watching lifecycle events of '{name}'");

    while !interrupted.load(Ordering::SeqCst) {
        match observer.next_event(Duration::from_secs(1)) {
            Ok(event) => println!("{event}"),
            Err(ChannelError::Timeout(_)) => continue,
            Err(ChannelError::Disconnected) => {
                info!("Service '{name}' closed its notification channel");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn install(
    name: &str,
    env: Vec<String>,
    working_dir: Option<std::path::PathBuf>,
    command: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    ServiceIdentity::new(name, BackendKind::Standard)?;

    let mut parts = command.into_iter();
    let program = parts.next().ok_or("missing command")?;
    let mut variables = BTreeMap::new();
    for entry in env {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("invalid environment entry '{entry}', expected KEY=VALUE"))?;
        variables.insert(key.to_string(), value.to_string());
    }

    let definition = ServiceDefinition {
        command: program,
        args: parts.collect(),
        env: variables,
        working_dir,
    };
    definition.save(name)?;
    info!(
        "Registered '{name}' at {}",
        ServiceDefinition::path(name).display()
    );
    Ok(())
}

/// Starts every autostart service, continuing past individual failures.
fn boot(config: &ControlConfig, blocking: bool) -> Result<(), Box<dyn Error>> {
    let mut failed = 0usize;
    for name in StandardBackend::autostart_services()? {
        let identity = match ServiceIdentity::new(name.as_str(), BackendKind::Standard) {
            Ok(identity) => identity.with_blocking(blocking),
            Err(err) => {
                warn!("Skipping autostart entry '{name}': {err}");
                continue;
            }
        };

        let controller = ServiceController::new(identity, config);
        match controller.status() {
            Ok(state) if state.is_active() => {
                info!("Service '{name}' already {state}");
                continue;
            }
            _ => {}
        }
        if let Err(err) = controller.start() {
            error!("Failed to start '{name}': {err}");
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(format!("{failed} service(s) failed to start").into());
    }
    Ok(())
}
