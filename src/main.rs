//! osconfig-agent: OS Config host agent, configuration core.
//!
//! This binary resolves the agent configuration once at startup, then
//! keeps it up to date from the metadata server. It consists of a
//! single actor:
//!  * `ConfigAgent` - periodic metadata scraper, publishing to the shared `ConfigStore`.

#[macro_use]
extern crate log;

use actix::prelude::*;
use failure::Fallible;
use osconfig_agent::config::{agent_version, ConfigStore, FlagOverrides, DEFAULT_ENDPOINT};
use osconfig_agent::metadata::{MetadataClient, MetadataFetch};
use osconfig_agent::refresh::{refresh_config, Cancellation, ConfigAgent, RetryPolicy};
use std::sync::Arc;
use structopt::StructOpt;

/// Command-line options.
#[derive(Debug, StructOpt)]
#[structopt(name = "osconfig-agent")]
struct CliOptions {
    /// osconfig endpoint override
    #[structopt(long = "endpoint")]
    endpoint: Option<String>,
    /// set debug log verbosity
    #[structopt(long = "debug")]
    debug: bool,
    /// log to stdout
    #[structopt(long = "stdout")]
    stdout: bool,
    /// resolve configuration once, print it and exit
    #[structopt(long = "print-config")]
    print_config: bool,
}

impl CliOptions {
    fn flag_overrides(&self) -> FlagOverrides {
        let endpoint = self
            .endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        FlagOverrides {
            endpoint,
            debug: self.debug,
            stdout: self.stdout,
        }
    }
}

fn init_logging(flags: &FlagOverrides) -> Fallible<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if flags.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    if flags.stdout {
        builder.target(env_logger::Target::Stdout);
    }
    builder.try_init()?;
    Ok(())
}

fn main() -> Fallible<()> {
    let opts = CliOptions::from_args();
    let flags = opts.flag_overrides();
    init_logging(&flags)?;
    info!("starting osconfig-agent {}", agent_version());

    let fetcher: Arc<dyn MetadataFetch> = Arc::new(MetadataClient::from_env()?);
    let store = ConfigStore::new(flags);

    // Resolve configuration once, before anything else runs.
    // On failure, defaults stay in effect until the next cycle.
    {
        let mut rt = tokio::runtime::current_thread::Runtime::new()?;
        let startup = refresh_config(
            fetcher.clone(),
            store.clone(),
            RetryPolicy::default(),
            Cancellation::never(),
        );
        if let Err(e) = rt.block_on(startup) {
            error!("{}", e);
            if opts.print_config {
                return Err(e.into());
            }
        }
    }

    if opts.print_config {
        println!("{}", serde_json::to_string_pretty(&store.get())?);
        return Ok(());
    }

    let sys = actix::System::new("osconfig-agent");

    // Start config agent in its own thread and event loop.
    let agent_arbiter = Arbiter::builder()
        .name("config_agent")
        .stop_system_on_panic(true)
        .build();
    let _agent_addr = Supervisor::start_in_arbiter(&agent_arbiter, move |_| {
        ConfigAgent::new(fetcher.clone(), store.clone(), RetryPolicy::default())
    });

    sys.run();
    Ok(())
}
