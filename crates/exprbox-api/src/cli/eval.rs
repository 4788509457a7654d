//! `exprbox eval`: run one expression through a configured evaluator.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use console::style;
use exprbox_core::evaluator::{Evaluator, EvaluatorConfig};
use exprbox_core::store::DataStore;
use exprbox_core::tournament::PatternTournament;
use exprbox_infra::config::{bridge_factory, build_bridge};
use exprbox_observe::TracingObservability;
use exprbox_types::bridge::EvaluateOptions;
use exprbox_types::config::SandboxConfig;
use exprbox_types::data::WorkflowData;
use exprbox_types::error::ExpressionError;
use exprbox_types::value::ExprValue;

use super::EvalArgs;

pub async fn eval(
    mut config: SandboxConfig,
    args: EvalArgs,
    json: bool,
    quiet: bool,
) -> anyhow::Result<bool> {
    if let Some(kind) = args.backend {
        config.backend = kind;
    }
    if let Some(ms) = args.timeout_ms {
        config.bridge.timeout_ms = ms;
    }
    config.allow_unconfined |= args.allow_unconfined;

    let data = load_data(args.data.as_deref(), args.context.as_deref()).await?;

    let store = Arc::new(DataStore::new());
    let observability = Arc::new(TracingObservability::new());
    let tournament = PatternTournament::new(config.bridge.max_code_length)
        .context("failed to build expression validator")?;
    let evaluator = Evaluator::new(
        EvaluatorConfig::new(build_bridge(config.backend, &config, Arc::clone(&store))?)
            .with_factory(bridge_factory(config.clone(), store)?)
            .with_observability(observability.clone())
            .with_tournament(Arc::new(tournament))
            .with_settings(config.evaluator.clone()),
    );

    tracing::debug!(backend = %config.backend, "starting evaluator");
    if let Err(err) = evaluator.initialize().await {
        report_error(&err, json);
        return Ok(false);
    }

    let options = EvaluateOptions {
        skip_transform: args.no_transform,
        skip_cache: args.no_cache,
        timeout: args.timeout_ms.map(Duration::from_millis),
    };
    let outcome = evaluator.evaluate(&args.expression, data, &options).await;
    evaluator.dispose().await;

    let ok = match &outcome {
        Ok(value) => {
            report_value(value, json, quiet)?;
            true
        }
        Err(err) => {
            report_error(err, json);
            false
        }
    };

    if args.stats {
        let snapshot = observability.snapshot();
        if json {
            eprintln!("{}", serde_json::to_string_pretty(&snapshot)?);
        } else {
            eprintln!();
            eprintln!("{}", style("Metrics").bold());
            for (series, value) in &snapshot.counters {
                eprintln!("  {} {}", style(series).dim(), value);
            }
            for (series, value) in &snapshot.gauges {
                eprintln!("  {} {}", style(series).dim(), value);
            }
            for (series, summary) in &snapshot.histograms {
                eprintln!(
                    "  {} count={} mean={:.2} max={:.2}",
                    style(series).dim(),
                    summary.count,
                    summary.mean(),
                    summary.max
                );
            }
        }
    }

    Ok(ok)
}

/// `--data` is a bare `$json` payload; `--context` is a full `WorkflowData` document.
async fn load_data(data: Option<&Path>, context: Option<&Path>) -> anyhow::Result<WorkflowData> {
    if let Some(path) = context {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a valid evaluation context", path.display()));
    }
    if let Some(path) = data {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        return Ok(WorkflowData::new(value));
    }
    Ok(WorkflowData::new(serde_json::Value::Object(Default::default())))
}

fn report_value(value: &ExprValue, json: bool, quiet: bool) -> anyhow::Result<()> {
    if json {
        let out = serde_json::json!({
            "ok": true,
            "undefined": value.is_undefined(),
            "value": value.as_json(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    match value {
        ExprValue::Undefined if !quiet => println!("{}", style("undefined").dim()),
        ExprValue::Undefined => {}
        ExprValue::Json(serde_json::Value::String(s)) => println!("{s}"),
        ExprValue::Json(v) => println!("{}", serde_json::to_string_pretty(v)?),
    }
    Ok(())
}

pub(super) fn report_error(err: &ExpressionError, json: bool) {
    if json {
        let out = serde_json::json!({
            "ok": false,
            "error": {
                "kind": err.kind(),
                "message": err.message(),
                "expression": err.context().expression,
            },
        });
        match serde_json::to_string_pretty(&out) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("failed to serialize error: {e}"),
        }
        return;
    }
    eprintln!(
        "{} {} {}",
        style("✗").red().bold(),
        style(err.kind()).red(),
        err.message()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn data_file_becomes_current_item() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("item.json");
        tokio::fs::write(&path, r#"{"a": 1}"#).await.unwrap();

        let data = load_data(Some(&path), None).await.unwrap();
        assert_eq!(data.json, serde_json::json!({"a": 1}));
        assert_eq!(data.items.len(), 1);
    }

    #[tokio::test]
    async fn context_file_is_a_full_snapshot() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ctx.json");
        tokio::fs::write(
            &path,
            r#"{"json": {"a": 2}, "node_outputs": {"Fetch": [{"id": 7}]}, "workflow_id": "wf-1"}"#,
        )
        .await
        .unwrap();

        let data = load_data(None, Some(&path)).await.unwrap();
        assert_eq!(data.json, serde_json::json!({"a": 2}));
        assert_eq!(data.node_outputs["Fetch"], vec![serde_json::json!({"id": 7})]);
        assert_eq!(data.workflow_id.as_deref(), Some("wf-1"));
    }

    #[tokio::test]
    async fn invalid_data_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        assert!(load_data(Some(&path), None).await.is_err());
    }

    #[tokio::test]
    async fn no_input_yields_empty_object() {
        let data = load_data(None, None).await.unwrap();
        assert_eq!(data.json, serde_json::json!({}));
    }
}
