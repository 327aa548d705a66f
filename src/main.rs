//
// Process entry point (spec.md §6). Grounded in holo-daemon's main.rs
// shape — parse arguments, load configuration, initialize tracing, run
// the main loop — adapted to this crate's single-threaded cooperative
// reactor (a `current_thread` runtime plus a `LocalSet`, since every
// peer/listener/signal task here is spawned with `spawn_local` and has
// no `Send` bound) and to clap's derive API rather than holo-daemon's
// builder-style `App`/`Arg`.
//

#![warn(rust_2018_idioms)]

use std::path::PathBuf;

use bgpd::config::Config;
use bgpd::reactor::Reactor;
use clap::Parser;
use tracing::error;

/// A BGP-4 speaker with a scriptable external-process control plane.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the instance's JSON configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Parse and validate the configuration file, then exit without
    /// starting the reactor.
    #[arg(long)]
    test: bool,

    /// Logging verbosity (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(log_level: &str) {
    let default_directive = log_level.parse().unwrap_or_else(|_| "info".parse().unwrap());
    let env_filter =
        tracing_subscriber::EnvFilter::builder().with_default_directive(default_directive).from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}

fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load configuration: {error}");
            std::process::exit(1);
        }
    };

    if args.test {
        println!("configuration OK");
        return;
    }

    // Set panic handler to abort the process if any task panics, matching
    // the teacher's "a wedged protocol task is worse than a dead daemon"
    // stance (holo-daemon's main.rs installs the same hook).
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime");

    let local = tokio::task::LocalSet::new();
    let exit_code = local.block_on(&runtime, async move {
        let reactor = Reactor::new(args.config, config);
        reactor.run().await
    });

    if exit_code != 0 {
        error!(code = exit_code, "exiting with non-zero status");
    }
    std::process::exit(exit_code);
}
