//! Command handlers.
//!
//! Each handler resolves its inputs, calls into `pool_core` and prints.
//! Handlers return the exit code; errors bubble up to `main`.

mod bulk;
mod token;
mod vms;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use pool_core::Service;
use pool_core::config::{self, CliOverrides, GlobalConfig};
use pool_core::log::ConsoleLog;
use pool_http::HttpTransport;
use serde::Serialize;

use crate::cli::{Cli, Commands};
use crate::settings;

/// Everything a handler needs for one invocation.
pub struct Context {
    pub service: Service,
    pub global: GlobalConfig,
    pub json: bool,
    pub verbose: bool,
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let global = settings::load(cli.config.as_deref())?;
    let overrides = CliOverrides {
        service: cli.service,
        url: cli.url,
        user: cli.user,
        token: cli.token,
        priority: cli.priority,
    };
    let effective = config::resolve(&global, &overrides)?;
    tracing::debug!(
        service = ?effective.service,
        kind = %effective.kind,
        url = ?effective.url,
        "resolved service"
    );

    let service = Service::new(
        effective,
        Arc::new(HttpTransport::new()?),
        Arc::new(ConsoleLog::new()),
        cli.verbose,
    )?;
    let ctx = Context {
        service,
        global,
        json: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Get(args) => vms::get(&ctx, args).await,
        Commands::List {
            filter,
            active,
            hostnameonly,
        } => vms::list(&ctx, filter.as_deref(), active, hostnameonly).await,
        Commands::Query { host } => vms::query(&ctx, &host).await,
        Commands::Modify(args) => bulk::modify(&ctx, args).await,
        Commands::Delete { hosts, all, force } => bulk::delete(&ctx, hosts, all, force).await,
        Commands::Snapshot { host } => vms::snapshot(&ctx, &host).await,
        Commands::Revert { host, snapshot } => vms::revert(&ctx, &host, snapshot.as_deref()).await,
        Commands::Status => vms::status(&ctx).await,
        Commands::Summary => vms::summary(&ctx).await,
        Commands::Token { command } => token::run(&ctx, command).await,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
