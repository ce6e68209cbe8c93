// Copyright 2024 The rbldns developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements the `run` command (i.e., running the server).

use std::fmt::Write;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use env_logger::Env;
use log::{error, info, warn};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use rbldns::io::UdpServer;
use rbldns::metrics;
use rbldns::reload::{ConfigDiff, ReloadController};
use rbldns::server::Server;
use rbldns::thread::ThreadGroup;
use rbldns::zone::{self, Registry, ZoneSpec};

use crate::args::RunArgs;
use crate::config::{self, MetricsSection, ServerSection};

/// Runs the server.
pub fn run(args: RunArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("info"));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(run_args: RunArgs) -> Result<()> {
    info!("rbldnsd v{} starting.", env!("CARGO_PKG_VERSION"));

    // Get the configuration, either from the file system or from the
    // command line arguments, as appropriate.
    let config_path = run_args.config.clone();
    let (server_section, mut current_specs, metrics_section, listed) =
        if let Some(ref path) = config_path {
            info!("Loading the configuration from {}.", path.display());
            let config =
                config::load_from_path(path).context("failed to load the configuration")?;
            let (specs, listed) = config::collect_specs(&config);
            (config.server, specs, config.metrics, listed)
        } else {
            info!("Loading the configuration from the command line.");
            let mut server = ServerSection::default();
            if let Some(bind) = run_args.bind {
                server.bind = bind;
            }
            let specs: Vec<ZoneSpec> = run_args
                .zones
                .iter()
                .map(|zone| ZoneSpec {
                    name: zone.name.clone(),
                    kind: zone.kind,
                    files: zone.files.clone(),
                    acl_file: None,
                    acl_rules: None,
                    ns: Vec::new(),
                    soa: None,
                })
                .collect();
            let listed = specs.len();
            (server, specs, MetricsSection::default(), listed)
        };

    // Bind the socket before loading zones, to fail fast.
    let udp = UdpServer::bind(server_section.bind, config::udp_config(&server_section))
        .context("failed to bind the UDP socket")?;
    info!("listening on {}", server_section.bind);

    // Load the zones.
    let registry = Arc::new(Registry::new());
    let defaults = config::zone_defaults(&server_section);
    let mut loaded = 0usize;
    for spec in &current_specs {
        info!(
            "loading zone {} (type={}, files={:?})",
            spec.name, spec.kind, spec.files,
        );
        match zone::build(spec, &defaults) {
            Ok(zone) => {
                info!("zone {} loaded ({} entries)", spec.name, zone.dataset().count());
                registry.replace(zone);
                loaded += 1;
            }
            Err(err) => error!("failed to load zone {}: {}", spec.name, err),
        }
    }
    if loaded == 0 && listed > 0 {
        bail!("failed to load any zones (loaded 0/{})", listed);
    }

    let group = ThreadGroup::new();

    // Metrics: start the Prometheus exporter if configured; the server
    // runs without it on failure.
    let exporter = metrics_section.prometheus_endpoint.as_deref().and_then(
        |endpoint| match metrics::Exporter::start(endpoint, &group) {
            Ok(exporter) => Some(exporter),
            Err(err) => {
                warn!("failed to start the metrics exporter: {}", err);
                None
            }
        },
    );
    if let Some(endpoint) = metrics_section.otel_endpoint.as_deref() {
        metrics::note_otel_endpoint(endpoint);
    }

    // Set up signal handling before starting the I/O provider.
    let mut signals = set_up_signal_handling().context("failed to set up signal handling")?;

    // Start the I/O provider.
    info!("Set-up is complete; starting the server.");
    let server = Arc::new(Server::new(registry.clone(), server_section.default_ttl));
    udp.start(&server, &group)
        .context("failed to start the I/O provider")?;

    // Start the reload controller.
    let controller = ReloadController::new(
        registry,
        defaults,
        current_specs.clone(),
        Duration::from_secs(server_section.reload_debounce),
    );
    if server_section.auto_reload {
        if let Err(err) = controller.start_watching() {
            warn!(
                "failed to start the file watcher: {} (use SIGHUP for manual reloads)",
                err,
            );
        }
    }

    // Wait for signals.
    let mut current_bind = server_section.bind;
    for signal in signals.forever() {
        match signal {
            SIGHUP => {
                info!("Received SIGHUP; reloading.");
                if let Some(ref path) = config_path {
                    match config::load_from_path(path) {
                        Ok(new_config) => {
                            let (new_specs, _) = config::collect_specs(&new_config);
                            let server_changed = new_config.server.bind != current_bind;
                            let diff =
                                ConfigDiff::between(&current_specs, &new_specs, server_changed);
                            controller.apply_config_change(new_specs.clone(), &diff);
                            current_specs = new_specs;
                            current_bind = new_config.server.bind;
                        }
                        Err(err) => error!("failed to reload the configuration: {:#}", err),
                    }
                } else {
                    controller.reload_all();
                }
            }
            s @ (SIGINT | SIGTERM) => {
                let name = match s {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    _ => unreachable!(),
                };
                info!("Received {}; shutting down.", name);
                break;
            }
            _ => unreachable!(),
        }
    }

    // Shut down the server: stop accepting work, unblock the exporter,
    // and give in-flight queries the shutdown budget to finish.
    group.shut_down();
    controller.shut_down();
    if let Some(ref exporter) = exporter {
        exporter.shut_down();
    }
    let budget = Duration::from_secs(server_section.shutdown_timeout);
    if group.await_shutdown(budget) {
        info!("Shutdown complete.");
    } else {
        warn!("shutdown budget of {:?} exceeded; exiting anyway", budget);
    }
    Ok(())
}

fn set_up_signal_handling() -> Result<Signals> {
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // This sets up signal handlers to exit immediately if a second
    // termination signal arrives before the process finishes shutting
    // down gracefully.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new([SIGHUP, SIGINT, SIGTERM]).map_err(|e| e.into())
}
