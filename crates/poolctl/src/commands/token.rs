use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context as _, Result, bail};

use super::{Context, print_json};
use crate::cli::TokenCommands;

const PASSWORD_ENV: &str = "POOLCTL_PASSWORD";

pub async fn run(ctx: &Context, command: TokenCommands) -> Result<ExitCode> {
    match command {
        TokenCommands::Get => {
            let password = password(ctx)?;
            let token = ctx.service.get_token(&password).await?;
            if ctx.json {
                print_json(&serde_json::json!({ "token": token }))?;
            } else {
                println!("{token}");
            }
        }
        TokenCommands::Delete { token } => {
            let password = password(ctx)?;
            let result = ctx.service.delete_token(&password, token.as_deref()).await?;
            print_json(&result)?;
        }
        TokenCommands::Status { token } => {
            let result = ctx.service.token_status(token.as_deref()).await?;
            print_json(&result)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn password(ctx: &Context) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }

    let user = ctx.service.user().unwrap_or("you");
    eprint!("Password for {user} on {}: ", ctx.service.host());
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("could not read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given; set {PASSWORD_ENV} or type it at the prompt");
    }
    Ok(password)
}
