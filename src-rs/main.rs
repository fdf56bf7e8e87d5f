use anyhow::{bail, Context, Result};
use axum::http::HeaderValue;
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use hotmap::labels::LabelData;
use hotmap::server::{self, LabelService, DEFAULT_ALLOW_ORIGIN};
use hotmap::{
    AxisLabel, CallbackError, CellInfo, Dataset, Heatmap, HeatmapCallbacks, HeatmapConfig,
    HttpTransport, InteractionEvent, LabelDocument, LabelStore, Metadata, PointerEvent,
    SelectedCell, SelectionResponse, ViewState,
};
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::future::Future;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SCRIPT_HELP: &str = r##"Replay script JSON (a list, or {"steps": [...]}):
[
  {"type": "move", "x": 120, "y": 80},
  {"type": "down", "x": 120, "y": 80},
  {"type": "move", "x": 260, "y": 140},
  {"type": "up", "x": 260, "y": 140},
  {"type": "labeling", "enabled": true},
  {"type": "annotation", "text": "burst"},
  {"type": "zoom", "factor": 2.0},
  {"type": "pan", "rows": 0, "cols": 40},
  {"type": "cancel"},
  {"type": "clearSelection"},
  {"type": "leave"}
]

Notes:
- x/y are surface pixels; run `hotmap render` first and read the layout sidecar for grid geometry.
- labeling toggles issued mid-drag apply once the drag ends.
"##;

#[derive(Parser, Debug)]
#[command(
    name = "hotmap",
    version,
    about = "Render heatmaps, replay pointer interaction, and serve label persistence"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Render a dataset to PNG with a layout sidecar JSON
    Render(RenderArgs),
    /// Drive the interaction engine with a pointer-event script
    Replay(ReplayArgs),
    /// Run the label persistence service
    Serve(ServeArgs),
    /// Write a random integer matrix dataset and a matching view config
    #[command(name = "demo-data")]
    DemoData(DemoDataArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Dataset JSON path or http(s) URL
    #[arg(long)]
    data: String,
    /// View config JSON path (or - for stdin)
    #[arg(long)]
    config: String,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Output PNG path (default: $HOTMAP_OUT_DIR/render-<timestamp>.png)
    #[arg(long)]
    out: Option<PathBuf>,
    /// Label document or saved label file to draw on top
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Zoom factor over the fitted cell size
    #[arg(long, default_value = "1.0")]
    zoom: f64,
    /// First visible row
    #[arg(long, default_value = "0")]
    row_offset: usize,
    /// First visible column
    #[arg(long, default_value = "0")]
    col_offset: usize,
    /// Rows drawn per progressive render step (0 = single pass)
    #[arg(long, default_value = "0")]
    rows_per_step: usize,
    /// Custom layout sidecar path (default: <out>.json)
    #[arg(long)]
    sidecar: Option<PathBuf>,
    /// Disable layout sidecar output
    #[arg(long, action = ArgAction::SetTrue)]
    no_sidecar: bool,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Script JSON path (or - for stdin)
    #[arg(long)]
    script: Option<String>,
    /// Ask for a bounding-box highlight on every selection
    #[arg(long, action = ArgAction::SetTrue)]
    highlight: bool,
    /// Write the final frame to this PNG
    #[arg(long)]
    out: Option<PathBuf>,
    /// Write the label document to this path
    #[arg(long)]
    labels_out: Option<PathBuf>,
    /// Post the labels to a running service (base URL, e.g. http://localhost:3000)
    #[arg(long)]
    save_to: Option<String>,
    /// File name hint sent with the label document
    #[arg(long)]
    file_name: Option<String>,
    /// Print script schema and exit
    #[arg(long, action = ArgAction::SetTrue)]
    script_help: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Authoritative dataset JSON path or http(s) URL
    #[arg(long)]
    matrix: String,
    /// Labels directory (default: $HOTMAP_LABELS_DIR, then data/labels)
    #[arg(long)]
    labels_dir: Option<PathBuf>,
    /// Value of Access-Control-Allow-Origin
    #[arg(long, default_value = DEFAULT_ALLOW_ORIGIN)]
    allow_origin: String,
    /// Bind host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Bind port
    #[arg(long, default_value = "3000")]
    port: u16,
    /// Maximum request body size in MiB
    #[arg(long, default_value = "16")]
    max_body_mb: usize,
}

#[derive(Args, Debug)]
struct DemoDataArgs {
    /// Output dataset JSON path
    #[arg(long)]
    out: PathBuf,
    /// View config output path (default: <out stem>.config.json)
    #[arg(long)]
    config_out: Option<PathBuf>,
    #[arg(long, default_value = "10")]
    rows: usize,
    #[arg(long, default_value = "500")]
    cols: usize,
    /// Smallest generated value
    #[arg(long, default_value = "0")]
    min: i64,
    /// Largest generated value
    #[arg(long, default_value = "5")]
    max: i64,
    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ReplayStep {
    Down { x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Up { x: f64, y: f64 },
    Leave,
    Labeling { enabled: bool },
    Annotation { text: String },
    Zoom { factor: f64 },
    Pan { rows: isize, cols: isize },
    Cancel,
    ClearSelection,
}

/// Hover tooltips from labels and metadata; optional highlight on select.
struct ReplayCallbacks {
    row_meta_labels: Vec<String>,
    col_meta_labels: Vec<String>,
    highlight: bool,
}

impl HeatmapCallbacks for ReplayCallbacks {
    fn on_hover(&mut self, info: &CellInfo) -> std::result::Result<Option<String>, CallbackError> {
        let mut lines = vec![
            format!("row: {}", info.y_label),
            format!("col: {}", info.x_label),
            format!("value: {}", info.value),
        ];
        lines.extend(HeatmapConfig::describe_meta(&self.row_meta_labels, &info.row_meta));
        lines.extend(HeatmapConfig::describe_meta(&self.col_meta_labels, &info.col_meta));
        Ok(Some(lines.join("\n")))
    }

    fn on_selection(
        &mut self,
        _cells: &[SelectedCell],
    ) -> std::result::Result<SelectionResponse, CallbackError> {
        Ok(if self.highlight {
            SelectionResponse::Highlight
        } else {
            SelectionResponse::Keep
        })
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Render(args) => command_render(args),
        Commands::Replay(args) => command_replay(args),
        Commands::Serve(args) => command_serve(args),
        Commands::DemoData(args) => command_demo_data(args),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .with_writer(io::stderr)
        .try_init();
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "render",
            "description": "Render a dataset to PNG plus a layout sidecar JSON."
        }),
        json!({
            "name": "replay",
            "description": "Replay pointer events through hover/selection/labeling and report events."
        }),
        json!({
            "name": "serve",
            "description": "Serve POST /save-label and enrich labels with their matrix slice."
        }),
        json!({
            "name": "demo-data",
            "description": "Generate a random integer matrix dataset and matching view config."
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn load_config(path: &str) -> Result<HeatmapConfig> {
    let raw = if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read config from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read config file: {path}"))?
    };
    HeatmapConfig::from_json_str(&raw).context("invalid view config JSON")
}

fn load_dataset(source: &str) -> Result<Dataset> {
    let dataset = block_on(Dataset::open(source))?
        .with_context(|| format!("failed to load dataset: {source}"))?;
    Ok(dataset)
}

fn build_heatmap<C: HeatmapCallbacks>(
    source: &SourceArgs,
    callbacks: C,
) -> Result<(Heatmap<C>, HeatmapConfig)> {
    let config = load_config(&source.config)?;
    let dataset = load_dataset(&source.data)?;
    let heatmap = Heatmap::new(dataset, &config, callbacks).context("failed to build heatmap")?;
    Ok((heatmap, config))
}

/// Accepts either a full `{fileName, data}` document or the `data` part the
/// service writes to disk.
fn load_label_document(path: &Path) -> Result<LabelDocument> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read labels: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid labels JSON: {}", path.display()))?;
    if value.get("fileName").is_some() && value.get("data").is_some() {
        let mut doc: LabelDocument = serde_json::from_value(value)?;
        doc.data = LabelData::from_value(serde_json::to_value(&doc.data)?)?;
        return Ok(doc);
    }
    if value.get("labels").is_none() {
        bail!("labels file must be a label document or contain 'labels'");
    }
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("labels.json")
        .to_string();
    Ok(LabelDocument {
        file_name,
        data: LabelData::from_value(value)?,
    })
}

fn save_png(image: &image::RgbaImage, path: &Path) -> Result<()> {
    ensure_parent_dir(path)?;
    DynamicImage::ImageRgba8(image.clone())
        .save(path)
        .with_context(|| format!("failed to save output image: {}", path.display()))
}

fn command_render(args: RenderArgs) -> Result<()> {
    if !args.zoom.is_finite() || args.zoom < 1.0 {
        bail!("--zoom must be a finite number >= 1.0");
    }
    let (mut heatmap, config) = build_heatmap(&args.source, hotmap::NoCallbacks)?;

    if let Some(labels_path) = &args.labels {
        let doc = load_label_document(labels_path)?;
        *heatmap.labels_mut() = LabelStore::from_document(doc);
    }
    heatmap.set_viewport(hotmap::Viewport {
        zoom: args.zoom,
        row_offset: args.row_offset,
        col_offset: args.col_offset,
    });

    if args.rows_per_step > 0 {
        heatmap.begin_render(args.rows_per_step);
        let mut steps = 0usize;
        while heatmap.render_step()? {
            steps += 1;
            tracing::trace!(steps, progress = heatmap.render_progress(), "render step");
        }
        tracing::debug!(steps, "progressive render finished");
    }
    let frame = heatmap.render()?.clone();

    let out = args
        .out
        .clone()
        .unwrap_or_else(|| out_root().join(format!("render-{}.png", timestamp_compact())));
    save_png(&frame, &out)?;

    if !args.no_sidecar {
        let sidecar = args.sidecar.clone().unwrap_or_else(|| default_sidecar_for(&out));
        let state = heatmap.get_state();
        let colors = heatmap.color_spec();
        let mut histogram = vec![0usize; colors.bins().len()];
        let mut defaulted = 0usize;
        for value in state.values() {
            match colors.bin_index(*value) {
                Some(idx) => histogram[idx] += 1,
                None => defaulted += 1,
            }
        }
        let bins: Vec<Value> = colors
            .bins()
            .iter()
            .zip(&histogram)
            .map(|(bin, count)| {
                json!({
                    "predicate": bin.predicate.to_string(),
                    "color": bin.color.to_hex(),
                    "cells": count,
                })
            })
            .collect();

        let payload = json!({
            "layout_meta_version": 1,
            "data_source": args.source.data,
            "output_path": abs_path(&out).display().to_string(),
            "sidecar_path": abs_path(&sidecar).display().to_string(),
            "generated_at": timestamp_iso(),
            "size": {"width": frame.width(), "height": frame.height(), "units": "px"},
            "rows": state.row_count(),
            "cols": state.col_count(),
            "rows_label": config.rows_label,
            "cols_label": config.cols_label,
            "layout": heatmap.layout(),
            "bins": bins,
            "default_cells": defaulted,
            "default_color": colors.default_color().map(|c| c.to_hex()),
            "labels": heatmap.labels().labels(),
        });
        write_json_pretty(&sidecar, &payload)?;
    }

    println!("{}", abs_path(&out).display());
    Ok(())
}

fn load_script(path: &str) -> Result<Vec<ReplayStep>> {
    let raw = if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read script from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("failed to read script file: {path}"))?
    };
    let value: Value = serde_json::from_str(&raw).context("invalid script JSON")?;
    let steps = match value {
        Value::Array(_) => value,
        Value::Object(mut obj) => match obj.remove("steps") {
            Some(steps) => steps,
            None => bail!("script must be a list or an object with 'steps'"),
        },
        _ => bail!("script must be a list or an object with 'steps'"),
    };
    serde_json::from_value(steps).context("invalid script step")
}

fn command_replay(args: ReplayArgs) -> Result<()> {
    if args.script_help {
        println!("{}", SCRIPT_HELP.trim());
        return Ok(());
    }
    let Some(script_path) = args.script.as_deref() else {
        bail!("--script is required (see --script-help)");
    };
    let steps = load_script(script_path)?;

    let config = load_config(&args.source.config)?;
    let dataset = load_dataset(&args.source.data)?;
    let callbacks = ReplayCallbacks {
        row_meta_labels: config.row_meta_labels.clone(),
        col_meta_labels: config.col_meta_labels.clone(),
        highlight: args.highlight,
    };
    let mut heatmap = Heatmap::new(dataset, &config, callbacks).context("failed to build heatmap")?;
    if let Some(name) = &args.file_name {
        heatmap.labels_mut().set_file_name(name.clone());
    }

    let mut report = Vec::with_capacity(steps.len());
    for (index, step) in steps.into_iter().enumerate() {
        let events: Vec<InteractionEvent> = match step {
            ReplayStep::Down { x, y } => heatmap.handle_pointer(PointerEvent::Down { x, y }),
            ReplayStep::Move { x, y } => heatmap.handle_pointer(PointerEvent::Move { x, y }),
            ReplayStep::Up { x, y } => heatmap.handle_pointer(PointerEvent::Up { x, y }),
            ReplayStep::Leave => heatmap.handle_pointer(PointerEvent::Leave),
            ReplayStep::Labeling { enabled } => {
                if enabled {
                    heatmap.enable_labeling_mode();
                } else {
                    heatmap.disable_labeling_mode();
                }
                Vec::new()
            }
            ReplayStep::Annotation { text } => {
                heatmap.set_label_annotation(text);
                Vec::new()
            }
            ReplayStep::Zoom { factor } => {
                heatmap.zoom_by(factor);
                Vec::new()
            }
            ReplayStep::Pan { rows, cols } => {
                heatmap.pan_by(rows, cols);
                Vec::new()
            }
            ReplayStep::Cancel => {
                heatmap.cancel_gesture();
                Vec::new()
            }
            ReplayStep::ClearSelection => {
                heatmap.clear_selection();
                Vec::new()
            }
        };
        if !events.is_empty() {
            report.push(json!({
                "step": index,
                "state": heatmap.interaction_state(),
                "events": events,
            }));
        }
    }

    if let Some(out) = &args.out {
        let frame = heatmap.render()?.clone();
        save_png(&frame, out)?;
    }

    let document = heatmap.labels().to_document();
    if let Some(labels_out) = &args.labels_out {
        write_json_pretty(labels_out, &serde_json::to_value(&document)?)?;
    }

    let saved = match &args.save_to {
        Some(base_url) => {
            let transport = HttpTransport::new(base_url)?;
            let pending = heatmap.begin_save_labels()?;
            let receipt = block_on(pending.send(&transport))??;
            Some(serde_json::to_value(receipt)?)
        }
        None => None,
    };

    let payload = json!({
        "generated_at": timestamp_iso(),
        "steps": report,
        "labels": document.data.labels,
        "highlight": heatmap.highlight(),
        "last_selection": heatmap.last_selection(),
        "final_state": heatmap.interaction_state(),
        "saved": saved,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn command_serve(args: ServeArgs) -> Result<()> {
    let dataset = load_dataset(&args.matrix)?;
    let labels_dir = server::labels_dir_from(args.labels_dir.clone());
    let service = Arc::new(
        LabelService::new(dataset, &labels_dir)
            .with_context(|| format!("failed to prepare labels dir: {}", labels_dir.display()))?,
    );
    let origin: HeaderValue = args
        .allow_origin
        .parse()
        .with_context(|| format!("invalid --allow-origin: {}", args.allow_origin))?;
    let app = server::router(Arc::clone(&service), origin, server::mb_to_bytes(args.max_body_mb));
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.host, args.port))?;

    block_on(async move {
        tracing::info!(
            %addr,
            labels_dir = %labels_dir.display(),
            rows = service.dataset().view.row_count(),
            cols = service.dataset().view.col_count(),
            version = hotmap::VERSION,
            "hotmap label service starting"
        );
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;
        tracing::info!("hotmap label service stopped");
        Ok::<(), anyhow::Error>(())
    })?
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn command_demo_data(args: DemoDataArgs) -> Result<()> {
    if args.rows == 0 || args.cols == 0 {
        bail!("--rows and --cols must be positive");
    }
    let span = demo_span(args.min, args.max)?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let rows: Vec<AxisLabel> = (0..args.rows)
        .map(|r| AxisLabel::text(format!("sensor-{r}")))
        .collect();
    let cols: Vec<AxisLabel> = (0..args.cols).map(|c| AxisLabel::from(c as u64)).collect();
    let matrix: Vec<Vec<f64>> = (0..args.rows)
        .map(|_| {
            (0..args.cols)
                .map(|_| rng.gen_range(args.min..=args.max) as f64)
                .collect()
        })
        .collect();
    let row_meta = (0..args.rows)
        .map(|r| vec![Some(if r % 2 == 0 { "L" } else { "S" }.to_string())])
        .collect();
    let col_meta = (0..args.cols)
        .map(|c| vec![Some(format!("window-{}", c / 50))])
        .collect();
    let dataset = Dataset {
        view: ViewState::new(rows, cols, matrix),
        meta: Metadata { row_meta, col_meta },
    };
    write_json_pretty(&args.out, &dataset.to_document())?;

    let config_out = args.config_out.clone().unwrap_or_else(|| {
        let stem = args
            .out
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("demo")
            .to_string();
        args.out
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(format!("{stem}.config.json"))
    });
    write_json_pretty(&config_out, &demo_config(args.min, span))?;

    println!("{}", abs_path(&args.out).display());
    Ok(())
}

/// Widest `--max - --min` the demo config spends one bin per value on.
const MAX_DEMO_SPAN: u64 = 64;

fn demo_span(min: i64, max: i64) -> Result<u64> {
    if min > max {
        bail!("--min must not exceed --max");
    }
    let span = max
        .checked_sub(min)
        .and_then(|d| u64::try_from(d).ok())
        .with_context(|| format!("--min {min} and --max {max} are too far apart"))?;
    if span > MAX_DEMO_SPAN {
        bail!("--max - --min is {span}; at most {MAX_DEMO_SPAN} distinct values are supported");
    }
    Ok(span)
}

/// One bin per integer from `min`, a catch-all `>=` for the last, white to red.
fn demo_config(min: i64, span: u64) -> Value {
    let mut bins = Vec::new();
    let mut colors = Vec::new();
    let steps = span.max(1) as f64;
    for i in 0..=span.min(MAX_DEMO_SPAN) {
        let v = min.saturating_add(i as i64);
        bins.push(if i == span { format!(">={v}") } else { format!("={v}") });
        let t = i as f64 / steps;
        let fade = (255.0 * (1.0 - t)).round() as u8;
        colors.push(json!(format!("#ff{fade:02x}{fade:02x}")));
    }
    json!({
        "rowsLabel": "Sensors",
        "colsLabel": "Samples",
        "rowMetaLabels": ["Band"],
        "colMetaLabels": ["Window"],
        "options": {"showLegend": true, "showVersion": true},
        "color": {"bins": bins, "colors": colors, "default": "#cccccc"},
    })
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn default_sidecar_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}.json"))
}

fn out_root() -> PathBuf {
    env::var("HOTMAP_OUT_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".hotmap"))
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

fn timestamp_compact() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pretty_json_lands_in_fresh_directories() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("frame.json");
        let doc = json!({"sidecar": {"rows": 3}, "labels": []});
        write_json_pretty(&target, &doc).unwrap();

        let text = fs::read_to_string(&target).unwrap();
        assert!(text.contains("\n  \"labels\""));
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), doc);
    }

    #[test]
    fn sidecar_sits_next_to_the_png() {
        assert_eq!(
            default_sidecar_for(Path::new("out/frame.png")),
            PathBuf::from("out/frame.json")
        );
    }

    #[test]
    fn demo_config_covers_the_generated_range() {
        let cfg: HeatmapConfig = serde_json::from_value(demo_config(0, 5)).unwrap();
        let spec = cfg.color_spec().unwrap();
        assert_eq!(spec.bins().len(), 6);
        assert_eq!(spec.bin_index(5.0), Some(5));
        assert_eq!(spec.bin_index(0.0), Some(0));
        assert_eq!(spec.bins()[0].color.to_hex(), "#ffffff");
    }

    #[test]
    fn demo_span_rejects_overflowing_and_oversized_ranges() {
        assert_eq!(demo_span(-2, 3).unwrap(), 5);
        assert!(demo_span(3, 2).is_err());
        assert!(demo_span(i64::MIN, i64::MAX).is_err());
        assert!(demo_span(-1, i64::MAX).is_err());
        let err = demo_span(0, 1_000).unwrap_err().to_string();
        assert!(err.contains("at most 64"), "{err}");

        let cfg: HeatmapConfig = serde_json::from_value(demo_config(-2, 4)).unwrap();
        let spec = cfg.color_spec().unwrap();
        assert_eq!(spec.bins().len(), 5);
        assert_eq!(spec.bin_index(-2.0), Some(0));
        assert_eq!(spec.bin_index(9.0), Some(4));
    }

    #[test]
    fn script_accepts_list_or_steps_object() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("list.json");
        let events = r#"[{"type": "down", "x": 1, "y": 2}, {"type": "clearSelection"}]"#;
        fs::write(&list, events).unwrap();
        let steps = load_script(list.to_str().unwrap()).unwrap();
        assert!(matches!(steps[0], ReplayStep::Down { x, y } if x == 1.0 && y == 2.0));
        assert!(matches!(steps[1], ReplayStep::ClearSelection));

        let obj = dir.path().join("obj.json");
        fs::write(&obj, r#"{"steps": [{"type": "labeling", "enabled": true}]}"#).unwrap();
        let steps = load_script(obj.to_str().unwrap()).unwrap();
        assert!(matches!(steps[0], ReplayStep::Labeling { enabled: true }));
    }

    #[test]
    fn saved_label_files_load_as_documents() {
        let dir = tempdir().unwrap();
        let saved = dir.path().join("session.json");
        fs::write(
            &saved,
            r#"{"labels": [{"id": "label-4", "startRow": 0, "endRow": 1, "startCol": 0, "endCol": 1, "text": "x", "intensityMatrix": [[1, 2], [3, 4]]}]}"#,
        )
        .unwrap();
        let doc = load_label_document(&saved).unwrap();
        assert_eq!(doc.file_name, "session.json");
        assert_eq!(doc.data.labels[0].annotation, "x");
        let mut store = LabelStore::from_document(doc);
        let cell = hotmap::CellRect::single(hotmap::CellCoord::new(0, 0));
        assert_eq!(store.add_label(cell, "").id, "label-5");
    }
}
