//! Config command - show where configuration came from and what is in effect.

use anyhow::Result;
use console::{Style, style};
use serde_json::json;

use super::{Context, print_json};

pub fn run(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        let sources: Vec<_> = ctx
            .sources
            .iter()
            .map(|s| json!({"path": s.path.display().to_string(), "loaded": s.loaded}))
            .collect();
        return print_json(&json!({
            "sources": sources,
            "config": ctx.config.as_ref(),
        }));
    }

    let dim = Style::new().dim();
    println!("{}", style("Config sources").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    if ctx.sources.is_empty() {
        println!("  {}", dim.apply_to("none (built-in defaults)"));
    }
    for source in &ctx.sources {
        if source.loaded {
            println!("  {} {}", style("✓").green(), source.path.display());
        } else {
            println!(
                "  {} {}",
                dim.apply_to("·"),
                dim.apply_to(format!("{} (not found)", source.path.display()))
            );
        }
    }

    println!();
    println!("{}", style("Effective config").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    let rendered = ctx.config.to_toml()?;
    if rendered.trim().is_empty() {
        println!("  {}", dim.apply_to("(all defaults)"));
    } else {
        print!("{}", rendered);
    }
    Ok(())
}
