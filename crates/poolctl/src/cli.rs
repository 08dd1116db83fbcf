use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "poolctl",
    version,
    about = "Acquire and manage VMs from vmpooler, ABS and nspooler"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Configured service to use (default: the first one declared)")]
    pub service: Option<String>,
    #[arg(long, global = true, help = "Pooler URL, overriding the config file")]
    pub url: Option<String>,
    #[arg(long, global = true)]
    pub user: Option<String>,
    #[arg(long, global = true)]
    pub token: Option<String>,
    #[arg(long, global = true, help = "Request priority (abs only)")]
    pub priority: Option<i64>,
    #[arg(
        long,
        global = true,
        env = "POOLCTL_CONFIG",
        help = "Config file (default: <config dir>/poolctl/config.toml)"
    )]
    pub config: Option<PathBuf>,
    #[arg(long, short, global = true, help = "Log requests and responses")]
    pub verbose: bool,
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    pub json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Acquire VMs: `poolctl get centos-7-x86_64=2 debian-10-x86_64`
    Get(GetArgs),
    /// List templates, or your active VMs with --active
    List {
        /// Regular expression matched against template names
        filter: Option<String>,
        #[arg(long)]
        active: bool,
        #[arg(long, requires = "active")]
        hostnameonly: bool,
    },
    /// Show the pooler's record for a VM (or ABS job)
    Query { host: String },
    Modify(ModifyArgs),
    /// Return VMs to the pool
    Delete {
        #[arg(value_delimiter = ',')]
        hosts: Vec<String>,
        #[arg(long, conflicts_with = "hosts")]
        all: bool,
        #[arg(long, help = "Required with --all")]
        force: bool,
    },
    Snapshot { host: String },
    Revert {
        host: String,
        snapshot: Option<String>,
    },
    /// Pool capacity
    Status,
    Summary,
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// `os` or `os=count`
    pub os: Vec<String>,
    #[arg(long, help = "Create the VMs on demand instead of taking them from a pool")]
    pub ondemand: bool,
    #[arg(long, value_name = "REQUEST_ID", help = "Wait for a request issued by an earlier run")]
    pub resume: Option<String>,
    #[arg(long, help = "Allow more than 5 VMs of one OS")]
    pub force: bool,
    #[arg(long, help = "Request without sending the token")]
    pub notoken: bool,
}

/// Change lifetime, disk, tags or reservation reason of one VM or all of yours
#[derive(Args, Debug)]
pub struct ModifyArgs {
    pub host: Option<String>,
    #[arg(long, conflicts_with = "host")]
    pub all: bool,
    #[arg(long, help = "Hours")]
    pub lifetime: Option<u32>,
    #[arg(long, help = "Additional disk in GB")]
    pub disk: Option<u32>,
    #[arg(long, help = r#"JSON object, e.g. '{"team":"qa"}'"#)]
    pub tags: Option<String>,
    #[arg(long, help = "Reservation reason (nspooler)")]
    pub reason: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum TokenCommands {
    /// Request a new token (password from POOLCTL_PASSWORD or a prompt)
    Get,
    Delete { token: Option<String> },
    Status { token: Option<String> },
}
