//! Dashboard Engine - command line entry point
//!
//! Loads a dashboard definition, resolves every widget's data (optionally
//! under a date range and a chain of drill steps) and prints the result
//! as JSON.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Parser;
use dashboard_engine::config::EngineConfig;
use dashboard_engine::data::{rows_from_csv, rows_from_json, Value};
use dashboard_engine::pipeline::{DashboardDefinition, DashboardSession};
use dashboard_engine::query::{
    DateRange, DrillFilter, Filter, OfflineBackend, QueryBackend, QueryMode,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "jemalloc")]
use tikv_jemallocator::Jemalloc;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "dashboard_engine", version, about = "Resolve dashboard widget data")]
struct Args {
    /// Dashboard definition JSON (`{ widgets, linkGroups }`)
    #[arg(long)]
    dashboard: PathBuf,

    /// Settings JSON object overriding engine.json defaults
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Date range start (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,

    /// Date range end (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,

    /// Drill step `widget:field=value`; repeat to descend further
    #[arg(long = "drill", value_parser = parse_drill_step)]
    drill: Vec<DrillStep>,

    /// Load a widget's rows from a CSV or JSON file: `widget=path`
    #[arg(long = "import", value_parser = parse_import)]
    imports: Vec<(String, PathBuf)>,
}

#[derive(Debug, Clone)]
struct DrillStep {
    widget_id: String,
    filter: DrillFilter,
}

fn parse_drill_step(raw: &str) -> Result<DrillStep, String> {
    let (widget_id, rest) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected widget:field=value, got '{}'", raw))?;
    let (field, value) = rest
        .split_once('=')
        .ok_or_else(|| format!("expected widget:field=value, got '{}'", raw))?;

    if widget_id.is_empty() || field.is_empty() {
        return Err(format!("expected widget:field=value, got '{}'", raw));
    }

    Ok(DrillStep {
        widget_id: widget_id.to_string(),
        filter: Filter::equals(field, Value::from(value)),
    })
}

fn parse_import(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((widget_id, path)) if !widget_id.is_empty() && !path.is_empty() => {
            Ok((widget_id.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected widget=path, got '{}'", raw)),
    }
}

/// Switch each named widget to import mode with the rows read from its file
fn load_imports(
    definition: &mut DashboardDefinition,
    imports: &[(String, PathBuf)],
) -> anyhow::Result<()> {
    for (widget_id, path) in imports {
        let widget = definition
            .widgets
            .iter_mut()
            .find(|w| &w.id == widget_id)
            .with_context(|| format!("Unknown widget '{}' in --import", widget_id))?;

        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read import {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let rows = if is_json {
            rows_from_json(&bytes)?
        } else {
            rows_from_csv(&bytes)?
        };

        info!("Imported {} rows into widget {}", rows.len(), widget_id);
        widget.data_source.query_mode = QueryMode::Import;
        widget.data_source.imported_data = Some(rows);
    }
    Ok(())
}

fn read_settings(path: Option<&PathBuf>) -> anyhow::Result<HashMap<String, String>> {
    let path = match path {
        Some(p) => p,
        None => return Ok(HashMap::new()),
    };
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read settings {}", path.display()))?;
    let raw: HashMap<String, serde_json::Value> = serde_json::from_slice(&bytes)
        .with_context(|| format!("Settings {} is not a JSON object", path.display()))?;

    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = EngineConfig::from_properties(read_settings(args.settings.as_ref())?);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Dashboard Engine v{}", env!("CARGO_PKG_VERSION"));

    let bytes = std::fs::read(&args.dashboard)
        .with_context(|| format!("Failed to read dashboard {}", args.dashboard.display()))?;
    let mut definition = DashboardDefinition::from_json(&bytes)?;
    load_imports(&mut definition, &args.imports)?;

    let backend: Arc<dyn QueryBackend> = match config.http_backend()? {
        Some(http) => {
            info!("Query backend: {}", http.endpoint());
            Arc::new(http)
        }
        None => {
            info!("No query backend configured, only import widgets will load");
            Arc::new(OfflineBackend)
        }
    };

    let session = DashboardSession::new(definition, backend, config);

    let date_range = match (args.from, args.to) {
        (Some(from), Some(to)) => {
            if from > to {
                bail!("--from {} is after --to {}", from, to);
            }
            Some(DateRange::new(from, to))
        }
        _ => None,
    };

    let output = if args.drill.is_empty() {
        let widgets = if date_range.is_some() {
            session.set_date_range(date_range).await
        } else {
            session.load_all(false).await
        };
        serde_json::to_value(widgets)?
    } else {
        if date_range.is_some() {
            session.set_date_range(date_range).await;
        }
        let widget_id = &args.drill[0].widget_id;
        if args.drill.iter().any(|step| &step.widget_id != widget_id) {
            bail!("All --drill steps must target the same widget");
        }
        if args.drill.len() > session.config().max_drill_depth {
            bail!(
                "{} drill steps exceed drill.max.depth {}",
                args.drill.len(),
                session.config().max_drill_depth
            );
        }

        let ancestors: Vec<DrillFilter> =
            args.drill.iter().map(|step| step.filter.clone()).collect();
        let chart = session
            .drill(widget_id, &ancestors)
            .await
            .with_context(|| format!("Unknown widget '{}'", widget_id))?;
        serde_json::to_value(chart)?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
