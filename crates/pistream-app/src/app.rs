use std::sync::Arc;

use anyhow::{Context, Result};
use pistream_av::SinkSelection;
use pistream_control::{generate_pin, HostClient};
use pistream_core::SessionError;
use pistream_discovery::{DiscoveryService, DEFAULT_BROWSE_TIMEOUT};
use pistream_identity::IdentityProvider;
use pistream_input::GamepadMapping;
use pistream_session::{
    pair_with_host, ConnectionListener, InputSource, Preflight, SessionSpec, Supervisor,
};
use pistream_transport::HostConnection;
use tracing::{debug, info, warn};

use crate::cli::{Action, Options, EXIT_OK, EXIT_SYNTAX};

/// Runs the requested action and returns the process exit code.
///
/// Failures the user was told about through `listener` still exit 0.
pub async fn run(opts: Options, listener: Arc<dyn ConnectionListener>) -> Result<u8> {
    if opts.action == Action::List {
        list_hosts(listener.as_ref()).await;
        return Ok(EXIT_OK);
    }
    let host = opts.host.clone().context("no host given")?;

    let config = match opts.stream_configuration() {
        Ok(config) => config,
        Err(e) => {
            listener.display_error("Syntax error:", &e.to_string());
            return Ok(EXIT_SYNTAX);
        }
    };

    // the mapping file is an input file like any flag value; check it before
    // touching the identity store or the network
    let mapping = match (&opts.action, &opts.mapping) {
        (Action::Stream, Some(path)) if !opts.fake => match GamepadMapping::load(path) {
            Ok(mapping) => mapping,
            Err(e) => {
                listener.display_error(
                    "Mapping",
                    &format!("Can't load gamepad mapping from {}: {}", path.display(), e),
                );
                return Ok(EXIT_SYNTAX);
            }
        },
        _ => GamepadMapping::default(),
    };

    let identity = pistream_identity::global().context("client identity unavailable")?;
    let provider: Arc<dyn IdentityProvider> = identity.clone();

    match opts.action {
        Action::Pair => {
            let client = HostClient::new(&host, provider)?;
            // outcomes are reported through the listener
            match pair_with_host(&client, identity.as_ref(), listener.as_ref(), &generate_pin()).await {
                Ok(state) => info!("Pairing ended in state {:?}", state),
                Err(e) => debug!("Pairing ended with error: {}", e),
            }
        }
        Action::Unpair => {
            let client = HostClient::new(&host, provider)?;
            match client.unpair().await {
                Ok(()) => listener.display_message("Unpaired successfully"),
                Err(e) => listener.display_error("Unpair", &e.to_string()),
            }
        }
        Action::Quit => {
            let client = HostClient::new(&host, provider)?;
            match client.quit().await {
                Ok(()) => listener.display_message("App quit successfully"),
                Err(e) => listener.display_error("Quit", &e.to_string()),
            }
        }
        Action::Stream => {
            let mut spec = SessionSpec::new(config, sinks(&opts));
            spec.mapping = mapping;
            spec.strict_tests = opts.tests;
            if opts.fake {
                // the debug sink neither grabs devices nor cares about the display
                spec.input = InputSource::Disabled;
                spec.preflight = Preflight::none();
            } else {
                spec.input = InputSource::evdev(opts.inputs.clone());
            }
            let connection = HostConnection::new(&host, provider, config, opts.app.clone())?;
            stream(spec, Arc::new(connection), listener).await;
        }
        Action::List => {}
    }
    Ok(EXIT_OK)
}

fn sinks(opts: &Options) -> SinkSelection {
    if opts.fake {
        SinkSelection::fake(opts.out.clone())
    } else {
        SinkSelection::real(Some(opts.audio.clone()))
    }
}

async fn stream(spec: SessionSpec, connection: Arc<HostConnection>, listener: Arc<dyn ConnectionListener>) {
    let supervisor = Supervisor::new(spec, connection, listener.clone());
    if let Err(e) = supervisor.start().await {
        report_start_failure(listener.as_ref(), &e);
        return;
    }

    tokio::select! {
        _ = supervisor.wait() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Cannot listen for ctrl-c: {}", e);
            }
            info!("Stopping...");
            supervisor.stop();
            supervisor.wait().await;
        }
    }
}

/// The supervisor has already shown the error itself; add the hint for
/// failed environment checks.
fn report_start_failure(listener: &dyn ConnectionListener, err: &SessionError) {
    if matches!(err, SessionError::EnvironmentUnsuitable { .. }) {
        listener.display_error(
            "Preflight",
            "Fix problems or start application with parameter -notest",
        );
    }
}

async fn list_hosts(listener: &dyn ConnectionListener) {
    match DiscoveryService::new().browse(DEFAULT_BROWSE_TIMEOUT).await {
        Ok(hosts) if hosts.is_empty() => listener.display_message("No hosts found"),
        Ok(hosts) => {
            for host in hosts {
                listener.display_message(&host.to_string());
            }
        }
        Err(e) => listener.display_error("List", &e.to_string()),
    }
}
