// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! mDNS publisher command line tool
//!
//! This binary drives the border router mDNS publisher on an event loop:
//! 1. Creates the selected backend (mdns-sd or the in-memory mock)
//! 2. Starts the publisher and waits for it to become ready
//! 3. Publishes, browses or resolves as requested
//! 4. Prints results until Ctrl-C or `--duration` runs out, then telemetry

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use core::net::Ipv6Addr;
use core::time::Duration;
use otbr_mdns::{
    DiscoveredHostInfo, DiscoveredInstanceInfo, Mainloop, MainloopProcessor, MdnsBackend,
    MdnsResponseCounters, Publisher, PublisherConfig, PublisherState, ResultCallback, TxtEntry,
};
use otbr_mdns_mock::MockEngine;
use otbr_mdns_sd::{MdnsSdBackend, MdnsSdConfig};
use std::cell::Cell;
use std::rc::Rc;
use tokio::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mdns-tool")]
#[command(about = "Publish and discover DNS-SD services over mDNS", long_about = None)]
struct Args {
    /// mDNS engine to drive
    #[arg(long, value_enum, default_value_t = BackendKind::MdnsSd)]
    backend: BackendKind,

    /// Host label for services on the local host
    #[arg(long, default_value = otbr_mdns_sd::DEFAULT_HOST_NAME)]
    host_name: String,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendKind {
    /// The mdns-sd daemon, on the real network
    MdnsSd,
    /// In-memory engine, nothing leaves the process
    Mock,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Advertise a service instance
    Publish {
        /// Instance name
        #[arg(long)]
        name: String,

        /// Service type, e.g. `_meshcop._udp`
        #[arg(long = "type")]
        service_type: String,

        /// Service port
        #[arg(short, long)]
        port: u16,

        /// Sub-type label (repeatable)
        #[arg(long = "sub-type")]
        sub_types: Vec<String>,

        /// TXT entry as `key=value` (repeatable)
        #[arg(long = "txt", value_parser = parse_txt_entry)]
        txt: Vec<TxtEntry>,

        /// Publish this host and put the service on it
        #[arg(long, requires = "addresses")]
        host: Option<String>,

        /// Address of `--host` (repeatable)
        #[arg(long = "address")]
        addresses: Vec<Ipv6Addr>,
    },

    /// Discover instances of a service type
    Browse {
        /// Service type, e.g. `_meshcop._udp`
        #[arg(long = "type")]
        service_type: String,

        /// Resolve only this instance instead of browsing
        #[arg(long, default_value = "")]
        instance: String,
    },

    /// Resolve a host's addresses
    ResolveHost {
        /// Host label, without `.local.`
        #[arg(long)]
        host: String,
    },
}

fn parse_txt_entry(s: &str) -> Result<TxtEntry, String> {
    match s.split_once('=') {
        Some((name, _)) if name.is_empty() => Err(format!("missing key in '{s}'")),
        Some((name, value)) => Ok(TxtEntry::new(name, value)),
        None if s.is_empty() => Err("empty TXT entry".to_string()),
        None => Ok(TxtEntry::new(s, Vec::new())),
    }
}

fn create_backend(args: &Args) -> Result<Box<dyn MdnsBackend>> {
    match args.backend {
        BackendKind::MdnsSd => {
            let config = MdnsSdConfig {
                host_name: args.host_name.clone(),
                ..Default::default()
            };
            let backend = MdnsSdBackend::new(config).context("Invalid mdns-sd configuration")?;
            Ok(Box::new(backend))
        }
        BackendKind::Mock => Ok(Box::new(MockEngine::new().backend())),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    println!();
    println!("{}", "=== Border Router mDNS Tool ===".bright_cyan().bold());
    println!("{}: {:?}", "Backend".bright_white(), args.backend);
    println!();

    match run(&args).await {
        Ok(()) => {
            println!();
            println!("OK: Stopped");
            Ok(())
        }
        Err(e) => {
            println!();
            error!("mdns-tool failed: {:?}", e);
            println!("FAIL: {e:?}");
            std::process::exit(1);
        }
    }
}

/// Print the outcome of a publish request
fn report(what: String) -> ResultCallback {
    Box::new(move |result: otbr_mdns::Result<()>| match result {
        Ok(()) => println!("OK: Published {}", what.bright_white()),
        Err(e) => println!("FAIL: Publishing {what}: {}", e.to_string().red()),
    })
}

fn print_instance(service_type: &str, info: &DiscoveredInstanceInfo) {
    if info.removed {
        println!("- {} {}", "Removed".yellow(), info.name.bright_white());
        return;
    }

    println!(
        "+ {} {}.{service_type}",
        "Resolved".green(),
        info.name.bright_white()
    );
    println!("   Host: {}:{}", info.host_name, info.port);
    for address in &info.addresses {
        println!("   Address: {address}");
    }
    match Publisher::decode_txt_data(&info.txt_data) {
        Ok(entries) => {
            for entry in entries {
                println!(
                    "   TXT: {}={}",
                    entry.name,
                    String::from_utf8_lossy(&entry.value)
                );
            }
        }
        Err(e) => println!("   TXT: undecodable ({e})"),
    }
}

fn print_host(host_name: &str, info: &DiscoveredHostInfo) {
    println!("+ {} {}", "Host".green(), host_name.bright_white());
    for address in &info.addresses {
        println!("   Address: {address}");
    }
}

fn print_counters(label: &str, counters: &MdnsResponseCounters, ema_latency: u32) {
    println!(
        "   {label}: {} ok, {} failed, ~{ema_latency} ms",
        counters.success,
        counters.not_found
            + counters.invalid_args
            + counters.duplicated
            + counters.not_implemented
            + counters.unknown_error,
    );
}

/// Issue the requested operation on a ready publisher
fn issue(publisher: &mut Publisher, command: &Command) -> Result<()> {
    match command {
        Command::Publish {
            name,
            service_type,
            port,
            sub_types,
            txt,
            host,
            addresses,
        } => {
            let host_name = match host {
                Some(host) => {
                    publisher
                        .publish_host(host, addresses, report(format!("host {host}")))
                        .with_context(|| format!("Cannot publish host {host}"))?;
                    host.as_str()
                }
                None => "",
            };

            publisher
                .publish_service(
                    host_name,
                    name,
                    service_type,
                    sub_types,
                    *port,
                    txt,
                    report(format!("{name}.{service_type}")),
                )
                .with_context(|| format!("Cannot publish {name}.{service_type}"))?;
        }
        Command::Browse {
            service_type,
            instance,
        } => {
            publisher.add_subscription_callbacks(Some(Box::new(print_instance)), None);
            publisher
                .subscribe_service(service_type, instance)
                .with_context(|| format!("Cannot subscribe to {service_type}"))?;
            println!("WAIT: Browsing {}...", service_type.bright_white());
        }
        Command::ResolveHost { host } => {
            publisher.add_subscription_callbacks(None, Some(Box::new(print_host)));
            publisher
                .subscribe_host(host)
                .with_context(|| format!("Cannot resolve {host}"))?;
            println!("WAIT: Resolving {}...", host.bright_white());
        }
    }
    Ok(())
}

async fn run(args: &Args) -> Result<()> {
    let config = PublisherConfig::default();
    let mut mainloop = Mainloop::new(config.max_poll_timeout);
    let mut publisher =
        Publisher::new(create_backend(args)?, &config).context("Cannot create publisher")?;

    println!("WAIT: Starting publisher...");
    publisher.start().context("Failed to start backend")?;

    let ready = Rc::new(Cell::new(publisher.is_started()));
    let ready_flag = Rc::clone(&ready);
    publisher.set_state_callback(Box::new(move |state| {
        info!("Publisher state: {state:?}");
        ready_flag.set(state == PublisherState::Ready);
    }));

    {
        let mut processors: [&mut dyn MainloopProcessor; 1] = [&mut publisher];
        mainloop.run_until(&mut processors, || ready.get()).await;
    }
    println!("OK: Publisher ready");
    println!();

    issue(&mut publisher, &args.command)?;

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    {
        let mut processors: [&mut dyn MainloopProcessor; 1] = [&mut publisher];
        let run = mainloop.run_until(&mut processors, || {
            deadline.is_some_and(|deadline| Instant::now() >= deadline)
        });

        tokio::select! {
            () = run => {}
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to wait for Ctrl-C")?;
                println!();
                println!("- Interrupted");
            }
        }
    }

    let telemetry = publisher.telemetry();
    println!();
    println!("{}", "Telemetry".bright_cyan());
    print_counters(
        "Service registrations",
        &telemetry.service_registrations,
        telemetry.service_registration_ema_latency,
    );
    print_counters(
        "Host registrations",
        &telemetry.host_registrations,
        telemetry.host_registration_ema_latency,
    );
    print_counters(
        "Service resolutions",
        &telemetry.service_resolutions,
        telemetry.service_resolution_ema_latency,
    );
    print_counters(
        "Host resolutions",
        &telemetry.host_resolutions,
        telemetry.host_resolution_ema_latency,
    );

    publisher.stop();
    Ok(())
}
