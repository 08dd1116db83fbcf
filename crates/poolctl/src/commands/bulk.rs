use std::process::ExitCode;

use anyhow::{Context as _, Result, bail};
use pool_core::ModifyPatch;
use pool_core::bulk::{delete_many, modify_many};
use serde_json::{Map, Value};

use super::{Context, print_json};
use crate::cli::ModifyArgs;

fn parse_tags(raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).context("--tags must be a JSON object, e.g. '{\"team\":\"qa\"}'")
}

/// The hosts a bulk command applies to: the named ones, or all active ones.
async fn targets(ctx: &Context, named: Vec<String>, all: bool) -> Result<Vec<String>> {
    match (named.is_empty(), all) {
        (false, false) => Ok(named),
        (true, true) => Ok(ctx.service.list_active().await?),
        (false, true) => bail!("pass hostnames or --all, not both"),
        (true, false) => bail!("no hostnames given; pass hostnames or --all"),
    }
}

pub async fn modify(ctx: &Context, args: ModifyArgs) -> Result<ExitCode> {
    let patch = ModifyPatch {
        lifetime: args.lifetime,
        disk: args.disk,
        tags: args.tags.as_deref().map(parse_tags).transpose()?,
        reason: args.reason,
    };
    if patch.is_empty() {
        bail!("nothing to modify; pass --lifetime, --disk, --tags or --reason");
    }

    let hosts = targets(ctx, args.host.into_iter().collect(), args.all).await?;
    let report = modify_many(&ctx.service, &hosts, &patch).await?;

    if ctx.json {
        print_json(&report)?;
    } else {
        for (host, reason) in &report.failed {
            ctx.service
                .log()
                .error(&format!("Failed to modify {host}: {reason}"));
        }
        if report.is_success() {
            for host in &report.succeeded {
                println!("Successfully modified VM {host}.");
            }
        } else {
            println!(
                "Modified {} of {} VMs.",
                report.succeeded.len(),
                report.attempted()
            );
        }
    }

    Ok(exit_code(report.is_success()))
}

pub async fn delete(ctx: &Context, hosts: Vec<String>, all: bool, force: bool) -> Result<ExitCode> {
    let hosts = targets(ctx, hosts, all).await?;
    if hosts.is_empty() {
        println!("You have no running VMs.");
        return Ok(ExitCode::SUCCESS);
    }
    if all && !force {
        bail!(
            "refusing to delete all {} of your VMs without --force",
            hosts.len()
        );
    }

    let report = delete_many(&ctx.service, &hosts).await?;

    if ctx.json {
        print_json(&report)?;
    } else {
        for (host, _) in &report.failed {
            ctx.service
                .log()
                .error(&format!("Failed to delete {host}; it may already be gone."));
        }
        if !report.succeeded.is_empty() {
            println!("Scheduled the following VMs for deletion:");
            for host in &report.succeeded {
                println!("- {host}");
            }
        }
    }

    Ok(exit_code(report.is_success()))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
