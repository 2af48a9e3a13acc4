//! capture-quality CLI: score image files the way the live capture screen does.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use capture_quality_lib::analyze::analyze_files;
use capture_quality_lib::policy::{aggregate, classify};
use capture_quality_lib::region::guide_rect;
use capture_quality_lib::{BoundsMode, QualitySettings, Rect, RoiSpec, Size};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "capture-quality")]
#[command(about = "Score document photos for brightness, glare and sharpness")]
#[command(version)]
struct Cli {
    /// Settings file (JSON). Defaults to the user config directory.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score image files and print their metrics and the combined verdict.
    Analyze(AnalyzeArgs),

    /// Print the effective settings.
    Settings,

    /// Print the capture guide rectangle for a viewport.
    Guide {
        /// Viewport size as WIDTHxHEIGHT.
        #[arg(long)]
        viewport: String,
    },
}

#[derive(Debug, Clone, Args)]
struct AnalyzeArgs {
    /// Images to score.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Region of interest in viewport coordinates as X,Y,W,H.
    #[arg(long, requires = "viewport")]
    roi: Option<String>,

    /// Viewport the ROI was drawn in, as WIDTHxHEIGHT. Without --roi the
    /// configured guide rectangle is used.
    #[arg(long)]
    viewport: Option<String>,

    /// Clamp the ROI into the frame instead of rejecting it.
    #[arg(long)]
    clamp: bool,

    /// Worker threads (defaults to all cores).
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOutput {
    results: Vec<capture_quality_lib::AnalysisResult>,
    verdict: capture_quality_lib::Verdict,
    message: &'static str,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => QualitySettings::load_from(path)?,
        None => QualitySettings::load()?,
    };

    match cli.command {
        Commands::Analyze(args) => {
            let roi = resolve_roi(&args, &settings)?;
            let threads = args.threads.or(settings.analysis_threads);
            info!("scoring {} file(s)", args.files.len());

            let results = analyze_files(&args.files, &settings.metrics, roi.as_ref(), threads);
            let scored: Vec<_> = results.iter().filter_map(|r| r.metrics).collect();
            let window = aggregate(scored.iter(), settings.policy.glare_aggregate);
            let verdict = classify(window.as_ref(), &settings.policy);

            print_json(
                &AnalyzeOutput {
                    results,
                    verdict,
                    message: verdict.message(),
                },
                cli.pretty,
            )
        }
        Commands::Settings => print_json(&settings, cli.pretty),
        Commands::Guide { viewport } => {
            let viewport = parse_size(&viewport)?;
            let rect = guide_rect(viewport, settings.region.aspect_ratio, settings.region.fill)?;
            print_json(&rect, cli.pretty)
        }
    }
}

fn resolve_roi(args: &AnalyzeArgs, settings: &QualitySettings) -> Result<Option<RoiSpec>> {
    let bounds = if args.clamp {
        BoundsMode::Clamp
    } else {
        settings.region.bounds
    };

    match (&args.roi, &args.viewport) {
        (Some(roi), Some(viewport)) => {
            let rect = parse_rect(roi)?;
            Ok(Some(RoiSpec::new(rect, parse_size(viewport)?, bounds)))
        }
        (None, Some(viewport)) => {
            let viewport = parse_size(viewport)?;
            let rect = guide_rect(viewport, settings.region.aspect_ratio, settings.region.fill)?;
            Ok(Some(RoiSpec::new(rect, viewport, bounds)))
        }
        (Some(_), None) => bail!("--roi needs --viewport"),
        (None, None) => settings.region.roi(),
    }
}

fn parse_size(value: &str) -> Result<Size> {
    let (w, h) = value
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {:?}", value))?;
    Ok(Size::new(
        w.trim().parse().context("invalid width")?,
        h.trim().parse().context("invalid height")?,
    ))
}

fn parse_rect<S>(value: &str) -> Result<Rect<S>> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid rectangle {:?}", value))?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(Rect::new(*x, *y, *w, *h)),
        _ => bail!("expected X,Y,W,H, got {:?}", value),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}
