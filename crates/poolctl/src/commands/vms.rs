use std::process::ExitCode;

use anyhow::{Result, bail};
use pool_core::hosts::{HostPrinter, format_host_output, render_status, standardize_hostnames};
use pool_core::{OsRequest, PollOutcome, Retrieved};

use super::{Context, print_json};
use crate::cli::GetArgs;

/// Above this many VMs of one OS, `get` wants `--force`.
const MAX_WITHOUT_FORCE: u32 = 5;

pub async fn get(ctx: &Context, args: GetArgs) -> Result<ExitCode> {
    let os = OsRequest::from_args(&args.os)?;
    if !args.force
        && let Some((name, count)) = os.iter().find(|(_, n)| *n > MAX_WITHOUT_FORCE)
    {
        bail!(
            "requesting {count} {name} VMs; pass --force to request more than {MAX_WITHOUT_FORCE} of one OS"
        );
    }

    let use_token = !args.notoken;
    let retrieved = match &args.resume {
        Some(id) => ctx.service.resume(id, &os, use_token).await?,
        None => ctx.service.retrieve(&os, use_token, args.ondemand).await?,
    };

    let raw = match retrieved {
        Retrieved::Allocated(raw) => raw,
        Retrieved::Pending(request) => {
            tracing::info!(request_id = %request.request_id, "waiting for pending request");
            match ctx.service.wait_for_request(&request, use_token).await? {
                PollOutcome::Fulfilled(raw) => raw,
                PollOutcome::TimedOut => bail!(
                    "request {id} was not fulfilled in time; pick it up later with `poolctl get --resume {id}`",
                    id = request.request_id
                ),
            }
        }
    };

    let groups = standardize_hostnames(&raw)?;
    if ctx.json {
        print_json(&groups)?;
    } else {
        println!("{}", format_host_output(&groups));
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn list(
    ctx: &Context,
    filter: Option<&str>,
    active: bool,
    hostnameonly: bool,
) -> Result<ExitCode> {
    if !active {
        let templates = ctx.service.list(filter).await?;
        if ctx.json {
            print_json(&templates)?;
        } else {
            for template in &templates {
                println!("{template}");
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let hosts = ctx.service.list_active().await?;
    if ctx.json {
        print_json(&hosts)?;
    } else if hostnameonly {
        for host in &hosts {
            println!("{host}");
        }
    } else if hosts.is_empty() {
        println!("You have no running VMs.");
    } else {
        let fallback = ctx.service.fallback(&ctx.global)?;
        let printed = HostPrinter::new(&ctx.service, fallback.as_ref())
            .pretty_print_hosts(&hosts)
            .await;
        println!("Your VMs on {}:", ctx.service.host());
        printed.emit();
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn query(ctx: &Context, host: &str) -> Result<ExitCode> {
    let raw = ctx.service.query(host).await?;
    print_json(&raw)?;
    Ok(ExitCode::SUCCESS)
}

pub async fn snapshot(ctx: &Context, host: &str) -> Result<ExitCode> {
    let raw = ctx.service.snapshot(host).await?;
    if ctx.json {
        print_json(&raw)?;
    } else {
        println!(
            "Snapshot pending. Use `poolctl query {host}` to see when it is ready."
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn revert(ctx: &Context, host: &str, snapshot: Option<&str>) -> Result<ExitCode> {
    let raw = ctx.service.revert(host, snapshot).await?;
    if ctx.json {
        print_json(&raw)?;
    } else {
        println!("Revert of {host} requested.");
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn status(ctx: &Context) -> Result<ExitCode> {
    let raw = ctx.service.status().await?;
    if ctx.json {
        print_json(&raw)?;
    } else {
        for line in render_status(ctx.service.kind(), &raw, ctx.verbose) {
            println!("{line}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn summary(ctx: &Context) -> Result<ExitCode> {
    print_json(&ctx.service.summary().await?)?;
    Ok(ExitCode::SUCCESS)
}
