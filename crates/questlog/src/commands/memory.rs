//! Memory command - long-term memories the coach sees.

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::{Value, json};

use super::{Context, print_json};

/// Arguments for the memory command.
#[derive(Args, Debug)]
pub struct MemoryArgs {
    #[command(subcommand)]
    pub command: MemoryCommand,
}

#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    /// List saved memories, newest first
    List {
        /// Only this category: preference, goal, fact or context
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Save a new memory
    Add {
        /// The fact to remember
        content: String,

        /// Category: preference, goal, fact or context
        #[arg(short, long, default_value = "fact")]
        category: String,

        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Delete a memory by id
    Delete {
        /// Memory id
        id: i64,
    },
}

/// Run the memory command through the `memory_manage` tool, so the CLI
/// applies the same limits and duplicate checks as the coach.
pub async fn run(args: MemoryArgs, ctx: &Context) -> Result<()> {
    let call = match args.command {
        MemoryCommand::List { category } => {
            let mut call = json!({"action": "list"});
            if let Some(category) = category {
                call["category"] = Value::String(category);
            }
            call
        }
        MemoryCommand::Add {
            content,
            category,
            tags,
        } => json!({
            "action": "save",
            "content": content,
            "category": category,
            "tags": tags,
        }),
        MemoryCommand::Delete { id } => json!({"action": "delete", "id": id}),
    };

    let runtime = ctx.runtime()?;
    let output = runtime
        .invoke_tool(ctx.user_id, "memory_manage", call, Utc::now())
        .await?;

    if ctx.json_output {
        return print_json(output.payload());
    }

    if let Some(memories) = output.get("memories").and_then(Value::as_array) {
        let dim = Style::new().dim();
        if memories.is_empty() {
            println!("{}", dim.apply_to("No memories saved"));
            return Ok(());
        }
        println!("{}", style("Memories").bold());
        println!("{}", dim.apply_to("─".repeat(50)));
        for memory in memories {
            let tags = memory["tags"]
                .as_array()
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            println!(
                "{:>4}  {:<10} {}",
                style(&memory["id"]).cyan(),
                memory["category"].as_str().unwrap_or_default(),
                memory["content"].as_str().unwrap_or_default()
            );
            if !tags.is_empty() {
                println!("      {}", dim.apply_to(format!("[{}]", tags)));
            }
        }
        return Ok(());
    }

    println!("{}", output.summary().unwrap_or("Done."));
    Ok(())
}
