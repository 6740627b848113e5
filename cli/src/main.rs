use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Once;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lume_core::chunk::{ChunkSummary, decode_chunk, encode_chunk};
use lume_core::gc::GcStats;
use lume_core::{Runtime, RuntimeConfig, Value};
use serde::Serialize;
use tracing::info;

#[cfg(test)]
mod main_test;

static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "lume::gc=debug,lume::state=debug,lume::alloc=debug,lume_cli=info";

#[derive(Debug, Parser)]
#[command(
    name = "lume",
    author,
    version,
    about = "Inspect precompiled chunks and exercise the Lume heap",
    long_about = None
)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the header and per-function statistics of a precompiled chunk.
    Inspect {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rewrite a precompiled chunk without debug information.
    Strip {
        #[arg(value_name = "INPUT", value_parser = parse_sanitized_path)]
        input: PathBuf,
        #[arg(value_name = "OUTPUT", value_parser = parse_sanitized_path)]
        output: PathBuf,
    },
    /// Allocate a synthetic object workload and report collector statistics.
    Stress {
        /// Objects to allocate
        #[arg(long, default_value_t = 100_000)]
        objects: usize,
        /// Objects kept alive at any time (a ring of the most recent ones)
        #[arg(long, default_value_t = 1_000)]
        keep: usize,
        /// Runtime configuration file (TOML)
        #[arg(long, value_parser = parse_sanitized_path)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective runtime configuration as TOML.
    Config {
        #[arg(long, value_parser = parse_sanitized_path)]
        config: Option<PathBuf>,
    },
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        anyhow::bail!("Parent directory components ('..') are not allowed in file paths.");
    }
    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing() {
    let Ok(raw) = std::env::var("LUME_TRACE") else {
        return;
    };
    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());
        let builder = fmt().with_writer(std::io::stderr);
        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };
        let _ = builder.try_init();
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    RuntimeConfig::from_toml_str(&text).with_context(|| format!("Invalid config file '{}'", path.display()))
}

fn read_chunk(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read chunk '{}'", path.display()))
}

fn render_summary(summary: &ChunkSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "upvalues {}  functions {}  instructions {}  constants {}  strings {}{}\n",
        summary.num_upvalues,
        summary.functions.len(),
        summary.total_instructions,
        summary.total_constants,
        summary.distinct_strings,
        if summary.stripped { "  (stripped)" } else { "" }
    ));
    for f in &summary.functions {
        out.push_str(&format!(
            "{:<12} {} lines {}-{} params {}{} stack {} code {} k {} upvals {} protos {}\n",
            f.path,
            f.source.as_deref().unwrap_or("?"),
            f.line_defined,
            f.last_line_defined,
            f.num_params,
            if f.is_vararg { "+" } else { "" },
            f.max_stack_size,
            f.instructions,
            f.constants,
            f.upvalues,
            f.nested,
        ));
    }
    out
}

fn inspect(file: &Path, json: bool) -> anyhow::Result<String> {
    let bytes = read_chunk(file)?;
    let image = decode_chunk(&bytes).with_context(|| format!("'{}' is not a valid chunk", file.display()))?;
    let summary = image.summary();
    if json {
        Ok(serde_json::to_string_pretty(&summary)?)
    } else {
        Ok(render_summary(&summary))
    }
}

/// Loads the chunk into a runtime and dumps it back without debug
/// information. Returns the sizes before and after.
fn strip(input: &Path, output: &Path) -> anyhow::Result<(usize, usize)> {
    let bytes = read_chunk(input)?;
    let mut rt = Runtime::new()?;
    let th = rt.main_thread();
    let name = format!("@{}", input.display());
    let cl = rt
        .undump(th, &bytes, &name)
        .with_context(|| format!("Failed to load '{}'", input.display()))?;
    let proto = rt.heap().lua_closure(cl).proto;
    let stripped = rt.dump(proto, true)?;
    // the runtime path must agree with the plain codec
    let image = decode_chunk(&stripped)?;
    anyhow::ensure!(encode_chunk(&image, true)? == stripped, "stripped chunk does not re-encode identically");
    fs::write(output, &stripped).with_context(|| format!("Failed to write '{}'", output.display()))?;
    Ok((bytes.len(), stripped.len()))
}

#[derive(Debug, Serialize)]
struct StressReport {
    objects: usize,
    kept: usize,
    live_objects: usize,
    total_bytes: usize,
    interned_strings: usize,
    census: BTreeMap<&'static str, usize>,
    gc: GcStats,
}

/// Allocates `objects` values of mixed kinds, keeping the most recent `keep`
/// of them reachable from a ring table in the globals.
fn stress(objects: usize, keep: usize, config: RuntimeConfig) -> anyhow::Result<StressReport> {
    let mut rt = Runtime::with_config(config)?;
    let th = rt.main_thread();
    let ring = rt.new_table_with(keep, 0)?;
    let globals = rt.globals();
    rt.table_set_str(globals, "ring", Value::Table(ring))?;

    for i in 0..objects {
        // the new object sits on the stack until it is stored
        rt.check_stack(th, 1)?;
        let v = match i % 4 {
            0 => {
                let t = rt.new_table()?;
                rt.push(th, Value::Table(t))?;
                rt.table_set_int(t, 1, Value::integer(i as i64))?;
                Value::Table(t)
            }
            1 => {
                let s = rt.new_string(format!("obj{i}").as_bytes())?;
                rt.push(th, Value::String(s))?;
                Value::String(s)
            }
            2 => {
                let u = rt.new_userdata(64)?;
                rt.push(th, Value::Userdata(u))?;
                Value::Userdata(u)
            }
            _ => {
                let s = rt.new_string(format!("{i:0>64}").as_bytes())?;
                rt.push(th, Value::String(s))?;
                Value::String(s)
            }
        };
        if keep > 0 {
            rt.table_set_int(ring, (i % keep) as i64 + 1, v)?;
        }
        rt.pop(th, 1);
    }
    rt.full_gc()?;

    let report = StressReport {
        objects,
        kept: rt.table_len(ring),
        live_objects: rt.heap().live_objects(),
        total_bytes: rt.total_bytes(),
        interned_strings: rt.interner_stats().0,
        census: rt.heap().census().into_iter().collect(),
        gc: rt.gc_stats().clone(),
    };
    info!(
        target: "lume_cli",
        cycles = report.gc.cycles,
        freed = report.gc.objects_freed,
        total = report.total_bytes,
        "stress finished"
    );
    Ok(report)
}

fn render_report(r: &StressReport) -> String {
    let mut out = String::new();
    let rows: [(&str, String); 12] = [
        ("objects", r.objects.to_string()),
        ("kept", r.kept.to_string()),
        ("live objects", r.live_objects.to_string()),
        ("total bytes", r.total_bytes.to_string()),
        ("interned", r.interned_strings.to_string()),
        ("cycles", r.gc.cycles.to_string()),
        ("emergency", r.gc.emergency_cycles.to_string()),
        ("steps", r.gc.steps.to_string()),
        ("freed objects", r.gc.objects_freed.to_string()),
        ("freed bytes", r.gc.bytes_freed.to_string()),
        ("finalizers", r.gc.finalizers_run.to_string()),
        ("estimate", r.gc.estimate.to_string()),
    ];
    for (label, value) in rows {
        out.push_str(&format!("{label:<14}{value}\n"));
    }
    for (kind, n) in &r.census {
        out.push_str(&format!("  {kind:<12}{n}\n"));
    }
    out
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();

    let CliArgs { command } = CliArgs::parse();
    match command {
        Commands::Inspect { file, json } => print!("{}", inspect(&file, json)?),
        Commands::Strip { input, output } => {
            let (before, after) = strip(&input, &output)?;
            println!("{} -> {} ({before} -> {after} bytes)", input.display(), output.display());
        }
        Commands::Stress {
            objects,
            keep,
            config,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let report = stress(objects, keep, config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_report(&report));
            }
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", toml::to_string(&config)?);
        }
    }
    Ok(())
}
