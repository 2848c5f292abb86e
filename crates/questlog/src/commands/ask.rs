//! Ask and coach commands - one agent run.

use std::process::ExitCode;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use console::Style;

use questlog_agent::{AgentError, AgentRequest, CancellationToken, Mode, RunStatus};
use questlog_llm::VendorPreference;

use super::{Context, print_json};

/// Arguments for the ask and coach commands.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question or message to send
    #[arg(required = true)]
    pub message: String,

    /// Tier to start from (default: the configured default tier)
    #[arg(long)]
    pub tier: Option<String>,

    /// Never move past the starting tier
    #[arg(long)]
    pub no_escalation: bool,

    /// Only use models from one vendor: gpt, claude or gemini
    #[arg(long)]
    pub prefer: Option<String>,
}

/// Exit status when the quota gate refuses a request.
pub const QUOTA_EXIT_CODE: u8 = 2;

/// Run one request in the given mode.
pub async fn run(args: AskArgs, mode: Mode, ctx: &Context) -> Result<ExitCode> {
    let runtime = ctx.runtime()?;
    let dim = Style::new().dim();
    if !runtime.has_providers() {
        tracing::warn!("No model provider has an API key; set one of the configured api_key_env variables");
    }

    let mut request = AgentRequest::new(ctx.user_id, args.message, mode, Utc::now());
    if let Some(tier) = args.tier {
        request = request.with_tier(tier);
    }
    if args.no_escalation {
        request = request.with_escalation(false);
    }
    if let Some(name) = args.prefer {
        match VendorPreference::from_name(&name) {
            Some(preference) => request = request.with_preference(preference),
            None => tracing::warn!(preference = %name, "Unknown vendor preference ignored"),
        }
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = match runtime.run_agent(request, cancel).await {
        Ok(result) => result,
        Err(AgentError::QuotaExceeded(message)) => {
            let yellow = Style::new().yellow();
            eprintln!("{}", yellow.apply_to(message));
            return Ok(ExitCode::from(QUOTA_EXIT_CODE));
        }
        Err(e) => return Err(e.into()),
    };

    if ctx.json_output {
        print_json(&result)?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", result.answer);
    if ctx.verbose || result.status != RunStatus::Ok {
        println!();
        println!(
            "{}",
            dim.apply_to(format!(
                "[{} · {} · {} steps · {} tool calls · {} tokens]",
                result.status,
                result.model.as_deref().unwrap_or("no model"),
                result.steps.len(),
                result.tool_calls,
                result.total_tokens()
            ))
        );
    }
    if ctx.verbose {
        for step in result.steps.iter().filter(|s| !s.escalations.is_empty()) {
            for attempt in &step.escalations {
                println!(
                    "{}",
                    dim.apply_to(format!(
                        "  step {}: {} ({}) failed: {}",
                        step.index, attempt.model, attempt.failure, attempt.message
                    ))
                );
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
