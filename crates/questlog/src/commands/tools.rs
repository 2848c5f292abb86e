//! Search and backup commands - run one tool directly.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use console::style;
use serde_json::{Value, json};

use super::{Context, print_json};

/// Arguments for the search command.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Maximum results (1-8)
    #[arg(short, long)]
    pub max_results: Option<u32>,
}

pub async fn run_search(args: SearchArgs, ctx: &Context) -> Result<()> {
    let mut call = json!({"query": args.query});
    if let Some(max) = args.max_results {
        call["max_results"] = Value::from(max);
    }
    invoke(ctx, "web_search", call).await
}

pub async fn run_backup(ctx: &Context) -> Result<()> {
    invoke(ctx, "backup_snapshot", json!({"mode": "backup_now"})).await
}

async fn invoke(ctx: &Context, name: &str, args: Value) -> Result<()> {
    let runtime = ctx.runtime()?;
    let output = runtime
        .invoke_tool(ctx.user_id, name, args, Utc::now())
        .await?;

    if ctx.json_output {
        return print_json(output.payload());
    }
    match output.summary() {
        Some(summary) => println!("{}", summary),
        None => println!("{}", style("Done.").green()),
    }
    Ok(())
}
