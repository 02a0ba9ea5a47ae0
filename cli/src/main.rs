//! docqa CLI - validate converted technical documents against their source

mod pages;
mod provider;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use docqa::report::{to_json, AuditStore};
use docqa::{
    Document, JsonFormat, Metadata, Outline, QualityVerdict, TextLayerRecognizer, ValidationOptions, Validator,
};

use crate::pages::attach_page_images;
use crate::provider::ChatProvider;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(author = "iyulab")]
#[command(version)]
#[command(about = "Validate and auto-correct converted technical documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a candidate Markdown file against its source
    Validate(ValidateArgs),

    /// Print the heading outline of a Markdown file
    Outline {
        /// Markdown file (pages separated by form feeds)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Print the outline as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a stored audit report
    Report {
        /// Report file (.json or .json.gz), or a run id with --dir
        #[arg(value_name = "REPORT")]
        report: String,

        /// Audit directory to look the run id up in
        #[arg(short, long, value_name = "DIR", env = "DOCQA_AUDIT_DIR")]
        dir: Option<PathBuf>,

        /// Print the raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

#[derive(clap::Args)]
struct ValidateArgs {
    /// Source Markdown file
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Candidate Markdown file
    #[arg(value_name = "CANDIDATE")]
    candidate: PathBuf,

    /// Directory of source page images (PNG, one per page, in name order)
    #[arg(long, value_name = "DIR")]
    source_pages: Option<PathBuf>,

    /// Directory of candidate page images
    #[arg(long, value_name = "DIR")]
    candidate_pages: Option<PathBuf>,

    /// JSON options file; flags override it
    #[arg(long, value_name = "FILE", env = "DOCQA_OPTIONS")]
    options: Option<PathBuf>,

    /// Aggregate pass threshold
    #[arg(long, env = "DOCQA_THRESHOLD")]
    threshold: Option<f64>,

    /// Recognition stage threshold
    #[arg(long)]
    recognition_threshold: Option<f64>,

    /// Visual stage threshold
    #[arg(long)]
    visual_threshold: Option<f64>,

    /// Structure stage threshold
    #[arg(long)]
    structure_threshold: Option<f64>,

    /// Content stage threshold
    #[arg(long)]
    content_threshold: Option<f64>,

    /// Maximum corrections per run
    #[arg(long, env = "DOCQA_BUDGET")]
    budget: Option<usize>,

    /// Score only, never correct
    #[arg(long)]
    no_correction: bool,

    /// Base URL of an OpenAI-compatible chat-completions server
    #[arg(long, value_name = "URL", env = "DOCQA_PROVIDER_URL")]
    provider_url: Option<String>,

    /// Model name sent to the provider
    #[arg(long, env = "DOCQA_PROVIDER_MODEL", default_value = "Qwen/Qwen2.5-32B-Instruct")]
    provider_model: String,

    /// API key for the provider
    #[arg(long, env = "DOCQA_PROVIDER_KEY", hide_env_values = true)]
    provider_key: Option<String>,

    /// Confidence assigned to provider answers
    #[arg(long, default_value = "0.8")]
    provider_confidence: f64,

    /// Write difference visualizations under this directory
    #[arg(long, value_name = "DIR")]
    diff_dir: Option<PathBuf>,

    /// Store the verdict in this audit directory
    #[arg(long, value_name = "DIR", env = "DOCQA_AUDIT_DIR")]
    audit_dir: Option<PathBuf>,

    /// Gzip stored verdicts
    #[arg(long)]
    compress: bool,

    /// Write the verdict JSON to a file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output compact JSON
    #[arg(long)]
    compact: bool,

    /// Write the corrected candidate here when corrections improved it
    #[arg(long, value_name = "FILE")]
    corrected: Option<PathBuf>,

    /// Run stages one after another
    #[arg(long)]
    sequential: bool,
}

/// Exit code for a run that completed but did not pass.
const EXIT_FAILED: i32 = 2;

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate(args) => cmd_validate(&args),
        Commands::Outline { input, json } => cmd_outline(&input, json).map(|_| true),
        Commands::Report { report, dir, json } => cmd_report(&report, dir.as_deref(), json).map(|_| true),
        Commands::Version => {
            cmd_version();
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(EXIT_FAILED),
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn build_options(args: &ValidateArgs) -> Result<ValidationOptions, Box<dyn std::error::Error>> {
    let mut options = match &args.options {
        Some(path) => ValidationOptions::from_json_file(path)?,
        None => ValidationOptions::new(),
    };

    if let Some(t) = args.threshold {
        options = options.with_aggregate_threshold(t);
    }
    if let Some(t) = args.recognition_threshold {
        options = options.with_recognition_threshold(t);
    }
    if let Some(t) = args.visual_threshold {
        options = options.with_visual_threshold(t);
    }
    if let Some(t) = args.structure_threshold {
        options = options.with_structural_threshold(t);
    }
    if let Some(t) = args.content_threshold {
        options = options.with_content_threshold(t);
    }
    if let Some(budget) = args.budget {
        options = options.with_budget(budget);
    }
    if args.no_correction {
        options = options.with_auto_correction(false);
    }
    if let Some(dir) = &args.diff_dir {
        options.visual = options.visual.with_diff_dir(dir);
    }
    if args.sequential {
        options = options.sequential();
    }

    options.validate()?;
    Ok(options)
}

fn load_document(path: &Path, images: Option<&Path>) -> Result<Document, Box<dyn std::error::Error>> {
    let markdown = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let doc = Document::from_markdown(&markdown).with_metadata(Metadata::with_source(path.display().to_string()));
    match images {
        Some(dir) => attach_page_images(doc, dir),
        None => Ok(doc),
    }
}

fn cmd_validate(args: &ValidateArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let options = build_options(args)?;
    let source = load_document(&args.source, args.source_pages.as_deref())?;
    let candidate = load_document(&args.candidate, args.candidate_pages.as_deref())?;

    let mut validator = Validator::new(options).with_recognizer(TextLayerRecognizer::new());
    if let Some(url) = &args.provider_url {
        let timeout = Duration::from_millis(validator.options().correction.call_timeout_ms);
        let provider = ChatProvider::new(url, args.provider_model.clone(), timeout)?
            .with_api_key(args.provider_key.clone())
            .with_confidence(args.provider_confidence);
        validator = validator.with_provider(provider);
    }

    let document_id = args
        .source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("Validating {}...", document_id));
    pb.enable_steady_tick(Duration::from_millis(100));

    let verdict = validator.validate(&document_id, &source, &candidate);
    pb.finish_and_clear();
    let verdict = verdict?;

    print_verdict(&verdict);

    let format = if args.compact {
        JsonFormat::Compact
    } else {
        JsonFormat::Pretty
    };
    if let Some(path) = &args.output {
        fs::write(path, to_json(&verdict, format)?)?;
        println!("{} {}", "Saved to".green(), path.display());
    }
    if let Some(dir) = &args.audit_dir {
        let path = AuditStore::new(dir)
            .compressed(args.compress)
            .with_format(format)
            .save(&verdict)?;
        println!("{} {}", "Audit report".green(), path.display());
    }
    if let (Some(path), Some(corrected)) = (&args.corrected, &verdict.corrected_document) {
        fs::write(path, corrected.to_markdown())?;
        println!("{} {}", "Corrected candidate".green(), path.display());
    }

    Ok(verdict.passed)
}

fn score_colored(score: f64, passed: bool) -> colored::ColoredString {
    let text = format!("{:.3}", score);
    if passed {
        text.green()
    } else {
        text.red()
    }
}

fn print_verdict(verdict: &QualityVerdict) {
    println!("{}", "Validation Result".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());

    println!("{}: {}", "Document".bold(), verdict.document_id);
    println!("{}: {}", "Run".bold(), verdict.run_id.dimmed());
    for stage in &verdict.stages {
        println!(
            "  {} {:<12} {} (threshold {:.2})",
            if stage.passed { "✓".green() } else { "✗".red() },
            stage.stage.name(),
            score_colored(stage.score, stage.passed),
            stage.threshold
        );
    }
    for skipped in &verdict.skipped_stages {
        println!(
            "  {} {:<12} {}",
            "-".dimmed(),
            skipped.stage.name(),
            format!("skipped: {}", skipped.reason).dimmed()
        );
    }

    println!();
    println!(
        "{}: {}",
        "Overall".bold(),
        score_colored(verdict.overall_score, verdict.passed)
    );
    if verdict.content_loss {
        println!("{}", "Content loss detected".red().bold());
    }
    println!(
        "{}: {} of {} ({} pass(es), {})",
        "Corrections".bold(),
        verdict.corrections_applied,
        verdict.budget,
        verdict.pass_count(),
        verdict.termination
    );
    if !verdict.difference_regions.is_empty() {
        println!("{}: {}", "Difference regions".bold(), verdict.difference_regions.len());
    }

    let issues = verdict.all_issues();
    if !issues.is_empty() {
        println!();
        println!("{}", "Issues".yellow().bold());
        for issue in issues {
            println!("  {} {}", "•".yellow(), issue);
        }
    }
    println!();
    if verdict.passed {
        println!("{}", "PASSED".green().bold());
    } else {
        println!("{}", "FAILED".red().bold());
    }
}

fn print_outline(outline: &Outline) {
    for id in outline.preorder() {
        let Some(node) = outline.node(id) else { continue };
        let indent = "  ".repeat(outline.depth(id));
        let mut line = format!("{}{} {}", indent, "#".repeat(node.level as usize).dimmed(), node.title);
        if let Some(page) = node.page {
            line.push_str(&format!(" {}", format!("p.{}", page).dimmed()));
        }
        if let Some(anchor) = &node.anchor {
            line.push_str(&format!(" {}", format!("{{#{}}}", anchor).cyan()));
        }
        println!("{}", line);
    }
}

fn cmd_outline(input: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let doc = load_document(input, None)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&doc.outline)?);
        return Ok(());
    }

    println!("{}", "Outline".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());
    print_outline(&doc.outline);

    println!();
    println!("{}: {}", "Pages".bold(), doc.page_count());
    println!("{}: {}", "Headings".bold(), doc.outline.len());
    println!("{}: {}", "Max depth".bold(), doc.outline.max_depth());
    let broken = doc.outline.broken_references();
    if !broken.is_empty() {
        println!(
            "{}: {}",
            "Broken links".red().bold(),
            broken.iter().map(|r| format!("#{}", r.target)).collect::<Vec<_>>().join(", ")
        );
    }

    Ok(())
}

fn cmd_report(report: &str, dir: Option<&Path>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(report);
    let verdict = if path.exists() {
        AuditStore::load_path(path)?
    } else if let Some(dir) = dir {
        AuditStore::new(dir).load(report)?
    } else {
        return Err(format!("no report at {} (pass --dir to look up a run id)", report).into());
    };

    if json {
        println!("{}", to_json(&verdict, JsonFormat::Pretty)?);
        return Ok(());
    }

    print_verdict(&verdict);
    println!();
    println!("{}", "Timeline".cyan().bold());
    for timing in &verdict.processing_timeline {
        println!(
            "  {:<20} pass {} {:>6} ms",
            timing.step,
            timing.pass,
            timing.duration_ms()
        );
    }
    println!(
        "{}: {} → {}",
        "Run".bold(),
        verdict.started_at.format("%Y-%m-%d %H:%M:%S"),
        verdict.finished_at.format("%H:%M:%S")
    );

    Ok(())
}

fn cmd_version() {
    println!("{} {}", "docqa".cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!("Cascade validation for converted technical documents");
    println!();
    println!("Repository: {}", "https://github.com/iyulab/docqa".dimmed());
    println!("License: MIT");
}
