// Copyright 2024 Matthew Ingwersen.
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

//! Implements the `run` and `list` commands.

use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};

use pitfall::io::{Endpoint, DEFAULT_PORT};
use pitfall::scenario::ScenarioSet;
use pitfall::server::Server;

use crate::args::{ListArgs, RunArgs};

const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Runs the server.
pub fn run(args: RunArgs) {
    if let Err(e) = try_running(args) {
        report_failure(e);
    }
    info!("Exiting with success.");
}

/// Lists the available scenarios.
pub fn list(args: ListArgs) {
    if let Err(e) = try_listing(args) {
        report_failure(e);
    }
}

/// Renders an error chain in numbered form and exits with failure.
fn report_failure(e: anyhow::Error) -> ! {
    let mut message = String::from("Failed to run:");
    for (i, cause) in e.chain().enumerate() {
        write!(message, "\n[{}] {}", i + 1, cause).unwrap();
    }
    message.push_str("\nExiting with failure.");
    error!("{}", message);
    process::exit(1);
}

fn try_running(args: RunArgs) -> Result<()> {
    info!(
        "Pitfall daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    // Load and materialize the scenario before touching the network:
    // a malformed fixture must fail fast, and no query may ever be
    // served against a partially loaded store.
    let set = load_set(args.fixtures.as_deref())?;
    let scenario = set.get(&args.scenario)?;
    info!(
        "Loading scenario {:?} (expected fault: {}).",
        scenario.id, scenario.expected_fault,
    );
    let store = scenario
        .build_store()
        .context("failed to materialize the scenario")?;
    info!(
        "Loaded {} zone(s): {}.",
        store.len(),
        store
            .iter()
            .map(|zone| zone.origin().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    );
    let server = Arc::new(Server::new(Arc::new(store)));

    let bind = args.bind.unwrap_or_else(|| {
        let ip = args.ip.unwrap_or(DEFAULT_BIND_IP);
        let port = args.port.unwrap_or(DEFAULT_PORT);
        SocketAddr::new(ip, port)
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(async {
        let endpoint = Endpoint::bind(bind)
            .await
            .with_context(|| format!("failed to bind sockets on {bind}"))?;
        info!(
            "Serving scenario {:?} on {} (UDP and TCP).",
            scenario.id,
            endpoint.local_addr(),
        );
        let controller = endpoint.start(&server);

        wait_for_termination().await;
        info!("Shutting down; draining in-flight queries.");
        controller.shut_down().await;
        Ok::<(), anyhow::Error>(())
    })?;

    info!(
        "Shutdown complete; answered {} queries.",
        server.query_log().len(),
    );
    Ok(())
}

fn try_listing(args: ListArgs) -> Result<()> {
    let set = load_set(args.fixtures.as_deref())?;
    for scenario in set.iter() {
        println!(
            "{:<24} {:<24} {}",
            scenario.id, scenario.expected_fault, scenario.description,
        );
    }
    Ok(())
}

fn load_set(fixtures: Option<&Path>) -> Result<ScenarioSet> {
    match fixtures {
        Some(path) => ScenarioSet::from_path(path)
            .with_context(|| format!("failed to load scenarios from {}", path.display())),
        None => Ok(ScenarioSet::builtin().clone()),
    }
}

/// Waits for SIGINT or SIGTERM.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term =
            signal(SignalKind::terminate()).expect("failed to install the SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT; shutting down."),
            _ = term.recv() => info!("Received SIGTERM; shutting down."),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt; shutting down.");
    }
}
