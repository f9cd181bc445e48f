//! `dmerge process`: read payloads, run one session, write egress.

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use rayon::prelude::*;
use tracing::debug;

use crate::cli::{AppContext, InputFormat, ProcessArgs};
use crate::core::codec::{Egress, Segment};
use crate::core::scheduler::{DumpStep, Ingress, RunStats, SessionRegistry};
use crate::core::target::InputTarget;
use crate::infra::config::load_config;
use crate::infra::io::{read_file_smart, write_output};

/// Session id used for the single CLI session
const CLI_SESSION: u64 = 0;

pub fn run(args: ProcessArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    debug!(?config, "loaded configuration");

    let targets = args
        .inputs
        .iter()
        .map(|t| InputTarget::parse(t))
        .collect::<Result<Vec<_>>>()?;

    let ingress = build_ingress(&targets, args.format)?;

    let registry = SessionRegistry::new();
    let session = registry.open(CLI_SESSION, config);
    let egress: Egress = args.egress.into();

    let result = session
        .run(ingress, egress)
        .context("Pipeline run failed")?;

    let step: DumpStep = args.step.into();
    let bytes = session
        .scheduler
        .dump_result(step, egress)
        .context("Failed to encode result")?;

    registry.end_session(CLI_SESSION);

    if ctx.dry_run {
        if !ctx.quiet {
            let dest = args
                .output
                .as_ref()
                .map_or_else(|| "stdout".to_string(), |p| p.display().to_string());
            eprintln!("{}", paint(ctx, &format!("DRY RUN: would write {} bytes to {dest}", bytes.len()), Tone::Warn));
        }
    } else {
        write_output(args.output.as_deref(), &bytes)?;
    }

    if args.stats {
        if args.json {
            eprintln!("{}", serde_json::to_string_pretty(&result.stats)?);
        } else if !ctx.quiet {
            print_summary(&result.stats, ctx);
        }
    }

    if let Some(path) = &args.output
        && !ctx.quiet
        && !ctx.dry_run
    {
        eprintln!(
            "{} Wrote {} comments ({} bytes) to {}",
            paint(ctx, "✓", Tone::Ok),
            result.stats.output_count,
            bytes.len(),
            path.display()
        );
    }

    Ok(())
}

/// One plain path is a complete document; anything else is a segment
/// stream, with undeclared indices following command-line order
fn build_ingress(targets: &[InputTarget], format: InputFormat) -> Result<Ingress> {
    if let [only] = targets
        && only.segment.is_none()
    {
        let content = read_file_smart(&only.file)?;
        return Ok(Ingress::Document { bytes: content.as_ref().to_vec(), hint: format.into() });
    }

    if format == InputFormat::Xml {
        bail!("XML input takes exactly one document without a segment index");
    }

    let segments = targets
        .par_iter()
        .enumerate()
        .map(|(pos, t)| -> Result<Segment> {
            let content = read_file_smart(&t.file)
                .with_context(|| format!("Failed to read segment {}", t.file.display()))?;
            Ok(Segment {
                index: t.segment.unwrap_or(pos as u32 + 1),
                time_range: t.time_range,
                bytes: content.as_ref().to_vec(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Ingress::Segments(segments))
}

#[derive(Clone, Copy)]
enum Tone {
    Ok,
    Warn,
    Dim,
}

fn paint(ctx: &AppContext, text: &str, tone: Tone) -> String {
    if ctx.no_color {
        return text.to_string();
    }
    match tone {
        Tone::Ok => text.green().to_string(),
        Tone::Warn => text.yellow().to_string(),
        Tone::Dim => text.dimmed().to_string(),
    }
}

fn print_summary(stats: &RunStats, ctx: &AppContext) {
    let rows = [
        ("input", stats.input_count),
        ("output", stats.output_count),
        ("malformed", stats.malformed),
        ("blacklisted", stats.blacklisted),
        ("whitelisted", stats.whitelisted),
        ("passthrough", stats.passthrough),
        ("merged", stats.merged),
        ("dropped", stats.dropped),
        ("shrunk", stats.shrunk),
        ("elevated", stats.elevated),
        ("combined", stats.combined),
    ];

    for (label, n) in rows {
        eprintln!("{:>12} {n}", paint(ctx, label, Tone::Dim));
    }
    eprintln!("{:>12} {} ms", paint(ctx, "elapsed", Tone::Dim), stats.elapsed_ms);
}
