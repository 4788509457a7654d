//! `exprbox check`: compile and validate without touching a bridge.

use console::style;
use exprbox_core::template;
use exprbox_core::tournament::{PatternTournament, Tournament};
use exprbox_types::config::SandboxConfig;

pub fn check(config: &SandboxConfig, expression: &str, json: bool) -> anyhow::Result<bool> {
    let tournament = PatternTournament::new(config.bridge.max_code_length)?;

    let (compiled, errors) = match template::compile(expression) {
        Ok(code) => {
            let validation = tournament.validate(&code);
            (Some(code), validation.errors)
        }
        Err(e) => (None, vec![e.to_string()]),
    };
    let valid = compiled.is_some() && errors.is_empty();

    if json {
        let out = serde_json::json!({
            "valid": valid,
            "compiled": compiled,
            "errors": errors,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(valid);
    }

    if valid {
        println!("{} expression is valid", style("✓").green().bold());
    } else {
        for error in &errors {
            eprintln!("{} {error}", style("✗").red().bold());
        }
    }
    Ok(valid)
}
