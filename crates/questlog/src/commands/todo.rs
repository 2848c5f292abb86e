//! Todo command - the daily task list.

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::{Value, json};

use super::{Context, print_json};

/// Arguments for the todo command.
#[derive(Args, Debug)]
pub struct TodoArgs {
    #[command(subcommand)]
    pub command: TodoCommand,
}

#[derive(Subcommand, Debug)]
pub enum TodoCommand {
    /// Show the tasks planned for a day
    List {
        /// today, tomorrow or YYYY-MM-DD
        #[arg(short, long, default_value = "today")]
        date: String,
    },

    /// Plan a task
    Add {
        /// What to do
        title: String,

        /// Planned time, e.g. 45, 30m, 1.5h or 1h20m
        #[arg(short = 't', long)]
        duration: Option<String>,

        /// today, tomorrow or YYYY-MM-DD
        #[arg(short, long, default_value = "today")]
        date: String,
    },

    /// Mark a task done
    Done {
        /// Task id
        id: i64,
    },

    /// Delete a task
    Delete {
        /// Task id
        id: i64,
    },
}

/// Run the todo command through the `todo_manage` tool.
pub async fn run(args: TodoArgs, ctx: &Context) -> Result<()> {
    let call = match args.command {
        TodoCommand::List { date } => json!({"action": "list", "plan_date": date}),
        TodoCommand::Add {
            title,
            duration,
            date,
        } => {
            let mut call = json!({"action": "add", "title": title, "plan_date": date});
            if let Some(duration) = duration {
                call["duration"] = Value::String(duration);
            }
            call
        }
        TodoCommand::Done { id } => json!({"action": "done", "id": id}),
        TodoCommand::Delete { id } => json!({"action": "delete", "id": id}),
    };

    let runtime = ctx.runtime()?;
    let output = runtime
        .invoke_tool(ctx.user_id, "todo_manage", call, Utc::now())
        .await?;

    if ctx.json_output {
        return print_json(output.payload());
    }

    let Some(todos) = output.get("todos").and_then(Value::as_array) else {
        println!("{}", output.summary().unwrap_or("Done."));
        return Ok(());
    };

    let dim = Style::new().dim();
    if todos.is_empty() {
        println!("{}", dim.apply_to(output.summary().unwrap_or("No tasks")));
        return Ok(());
    }
    println!("{}", style(output.summary().unwrap_or("Tasks")).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    for todo in todos {
        let mark = if todo["status"] == "done" { "[x]" } else { "[ ]" };
        let planned = todo["duration_minutes"]
            .as_i64()
            .map(|m| format!(" ({}m)", m))
            .unwrap_or_default();
        println!(
            "{:>4}  {} {}{}",
            style(&todo["id"]).cyan(),
            mark,
            todo["title"].as_str().unwrap_or_default(),
            dim.apply_to(planned)
        );
    }
    Ok(())
}
