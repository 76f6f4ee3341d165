//! Healgate - Patch Safety Gate and Self-Healing CLI
//!
//! The `healgate` command gates AI-proposed patches behind a
//! deterministic quality scorer and drives the bounded self-healing
//! loop against CI.
//!
//! ## Commands
//!
//! - `review`: score candidate patches and write per-run artifacts
//! - `apply`: apply one vetted patch under the allow-list
//! - `heal`: full loop: review, apply, commit, push, PR, verify CI
//! - `status`: show a recorded heal report or poll a commit once

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::Level;

use healgate_core::{
    apply_patch_set, emit_artifact_error, emit_gate_evaluated, emit_heal_finished,
    emit_heal_started, emit_patch_applied, emit_review_completed, new_run_id, read_heal_report,
    read_patch_index, review_candidates, run_heal_loop, select_best_go, write_candidate_artifacts,
    write_heal_report, AllowList, CiStatusProvider, FailureKind, GhStatusProvider, HealPolicy,
    PatchCandidate, PatchStrategy, PushMode, ReviewPool, ReviewedPatch, RunSpan, ScoreRuleSet,
    VerifyBudget,
};

#[derive(Parser)]
#[command(name = "healgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Patch safety gate and CI self-healing loop", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score candidate patches and write per-run artifacts
    Review {
        /// Candidate patches JSON file (array of patch objects)
        #[arg(short, long)]
        candidates: PathBuf,

        /// Allow-listed path globs, comma-separated
        #[arg(short, long)]
        allow: String,

        /// Failure kind driving scope checks (test|lint|build|deps|unknown)
        #[arg(long, default_value = "unknown")]
        intent: String,

        /// Concurrent review width
        #[arg(long, default_value = "4")]
        review_width: usize,

        /// Run identifier (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Artifacts root directory
        #[arg(long, default_value = ".healgate")]
        out_dir: PathBuf,
    },

    /// Apply one vetted patch under the allow-list
    Apply {
        /// Unified diff file to apply
        #[arg(short, long)]
        patch: PathBuf,

        /// Allow-listed path globs, comma-separated
        #[arg(short, long)]
        allow: String,

        /// Repository directory
        #[arg(long, default_value = ".")]
        repo_dir: PathBuf,

        /// Validate the patch without touching files
        #[arg(long)]
        dry_run: bool,
    },

    /// Review, apply, push, and verify CI with bounded retries
    Heal {
        /// Candidate patches JSON file (array of patch objects)
        #[arg(short, long)]
        candidates: PathBuf,

        /// Allow-listed path globs, comma-separated
        #[arg(short, long)]
        allow: String,

        /// Repository slug (owner/name) for CI status and PRs
        #[arg(long)]
        repo: String,

        /// Failure kind driving scope checks (test|lint|build|deps|unknown)
        #[arg(long, default_value = "unknown")]
        intent: String,

        /// Concurrent review width
        #[arg(long, default_value = "4")]
        review_width: usize,

        /// Repository directory
        #[arg(long, default_value = ".")]
        repo_dir: PathBuf,

        /// Run identifier (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Artifacts root directory
        #[arg(long, default_value = ".healgate")]
        out_dir: PathBuf,

        /// Total CI verification attempts (first check plus reruns)
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Push to the current branch instead of a heal branch
        #[arg(long)]
        direct: bool,

        /// Skip pull request creation
        #[arg(long)]
        no_pr: bool,

        /// PR base branch override
        #[arg(long)]
        base: Option<String>,

        /// Remote to push to
        #[arg(long, default_value = "origin")]
        remote: String,
    },

    /// Show a recorded heal report or poll a commit's CI status
    Status {
        /// Run ID to inspect
        #[arg(required_unless_present = "sha")]
        run: Option<String>,

        /// Artifacts root directory
        #[arg(long, default_value = ".healgate")]
        out_dir: PathBuf,

        /// Repository slug (owner/name) for a live poll
        #[arg(long, requires = "sha")]
        repo: Option<String>,

        /// Poll this commit once instead of reading a recorded run
        #[arg(long, requires = "repo", conflicts_with = "run")]
        sha: Option<String>,

        /// Emit the raw JSON report instead of a summary
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    healgate_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Review {
            candidates,
            allow,
            intent,
            review_width,
            run_id,
            out_dir,
        } => cmd_review(&candidates, &allow, &intent, review_width, run_id, &out_dir).await,
        Commands::Apply {
            patch,
            allow,
            repo_dir,
            dry_run,
        } => cmd_apply(&patch, &allow, &repo_dir, dry_run),
        Commands::Heal {
            candidates,
            allow,
            repo,
            intent,
            review_width,
            repo_dir,
            run_id,
            out_dir,
            max_retries,
            direct,
            no_pr,
            base,
            remote,
        } => {
            cmd_heal(HealArgs {
                candidates,
                allow,
                repo,
                intent,
                review_width,
                repo_dir,
                run_id,
                out_dir,
                max_retries,
                direct,
                no_pr,
                base,
                remote,
            })
            .await
        }
        Commands::Status {
            run,
            out_dir,
            repo,
            sha,
            json,
        } => match (run, repo, sha) {
            (_, Some(repo), Some(sha)) => cmd_status_poll(&repo, &sha).await,
            (Some(run), _, _) => cmd_status(&run, &out_dir, json),
            _ => anyhow::bail!("a run id or --repo/--sha pair is required"),
        },
    }
}

// ---------------------------------------------------------------------------
// Input parsing helpers
// ---------------------------------------------------------------------------

/// One entry of the candidates file: a patch plus its external review.
#[derive(Debug, Deserialize)]
struct CandidateDoc {
    #[serde(flatten)]
    strategy: PatchStrategy,
    #[serde(default)]
    external_review: Option<String>,
}

fn load_candidates(path: &Path) -> Result<Vec<PatchCandidate>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read candidates file: {:?}", path))?;
    let docs: Vec<CandidateDoc> =
        serde_json::from_str(&raw).context("candidates file is not a JSON array of patches")?;
    Ok(docs
        .into_iter()
        .map(|doc| PatchCandidate::new(doc.strategy, doc.external_review))
        .collect())
}

fn parse_allow(allow: &str) -> Result<AllowList> {
    let patterns: Vec<String> = allow
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    Ok(AllowList::new(patterns)?)
}

fn parse_intent(s: &str) -> Result<FailureKind> {
    Ok(match s {
        "test" => FailureKind::Test,
        "lint" => FailureKind::Lint,
        "build" => FailureKind::Build,
        "deps" => FailureKind::Deps,
        "unknown" => FailureKind::Unknown,
        other => anyhow::bail!("unknown failure kind: {other}"),
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn review_batch(
    run_id: &str,
    candidates_path: &Path,
    allow: &str,
    intent: &str,
    width: usize,
) -> Result<(AllowList, Vec<ReviewedPatch>)> {
    let allow_list = parse_allow(allow)?;
    let intent = parse_intent(intent)?;
    let candidates = load_candidates(candidates_path)?;
    if candidates.is_empty() {
        anyhow::bail!("candidates file contains no patches");
    }

    let rule_set = ScoreRuleSet::standard();
    let pool = ReviewPool { width };
    let reviewed = review_candidates(&rule_set, &allow_list, intent, candidates, pool).await?;

    for patch in &reviewed {
        emit_gate_evaluated(
            run_id,
            &patch.strategy.id,
            patch.review.slop_score,
            patch.review.is_go(),
        );
    }
    let go = reviewed.iter().filter(|r| r.review.is_go()).count();
    emit_review_completed(run_id, reviewed.len(), go);

    Ok((allow_list, reviewed))
}

/// Score candidate patches, persist artifacts, and print the index.
async fn cmd_review(
    candidates_path: &Path,
    allow: &str,
    intent: &str,
    width: usize,
    run_id: Option<String>,
    out_dir: &Path,
) -> Result<()> {
    let run_id = run_id.unwrap_or_else(new_run_id);
    let _span = RunSpan::enter(&run_id);

    let (_, reviewed) = review_batch(&run_id, candidates_path, allow, intent, width).await?;
    let index = write_candidate_artifacts(&run_id, out_dir, &reviewed)
        .context("failed to write candidate artifacts")?;

    println!("Run: {}", run_id);
    for entry in &index.results {
        println!(
            "  [{}] {} ({}) risk={} slop={:.2} {}",
            entry.verdict, entry.id, entry.label, entry.risk_level, entry.slop_score, entry.summary
        );
    }
    match select_best_go(&reviewed) {
        Some(best) => println!("Best candidate: {} ({})", best.strategy.id, best.strategy.label),
        None => println!("No GO candidate."),
    }
    println!("Artifacts: {}", out_dir.join(&run_id).display());

    Ok(())
}

/// Apply one unified diff under the allow-list.
fn cmd_apply(patch_path: &Path, allow: &str, repo_dir: &Path, dry_run: bool) -> Result<()> {
    let allow_list = parse_allow(allow)?;
    let diff = std::fs::read_to_string(patch_path)
        .with_context(|| format!("failed to read patch file: {:?}", patch_path))?;

    let outcome = apply_patch_set(repo_dir, &allow_list, &diff, dry_run)
        .context("patch application failed")?;

    if outcome.dry_run {
        println!("Dry run OK. Patch would touch {} files:", outcome.touched.len());
    } else {
        println!("Applied patch to {} files:", outcome.touched.len());
    }
    for file in &outcome.touched {
        println!("  {}", file);
    }

    Ok(())
}

struct HealArgs {
    candidates: PathBuf,
    allow: String,
    repo: String,
    intent: String,
    review_width: usize,
    repo_dir: PathBuf,
    run_id: Option<String>,
    out_dir: PathBuf,
    max_retries: u32,
    direct: bool,
    no_pr: bool,
    base: Option<String>,
    remote: String,
}

/// Full heal run: review candidates, apply the winner, verify CI.
async fn cmd_heal(args: HealArgs) -> Result<()> {
    let run_id = args.run_id.clone().unwrap_or_else(new_run_id);
    let _span = RunSpan::enter(&run_id);
    emit_heal_started(&run_id, &args.repo);

    let (allow_list, reviewed) = review_batch(
        &run_id,
        &args.candidates,
        &args.allow,
        &args.intent,
        args.review_width,
    )
    .await?;
    if let Err(e) = write_candidate_artifacts(&run_id, &args.out_dir, &reviewed) {
        emit_artifact_error(&run_id, &e);
    }

    let policy = HealPolicy {
        max_retries: args.max_retries,
        push_mode: if args.direct {
            PushMode::Direct
        } else {
            PushMode::Safe
        },
        remote: args.remote.clone(),
        base_override: args.base.clone(),
        open_pr: !args.no_pr,
        repo: Some(args.repo.clone()),
        verify: VerifyBudget::default(),
    };
    let provider = GhStatusProvider::new(&args.repo);

    let report = run_heal_loop(
        &args.repo_dir,
        &run_id,
        &reviewed,
        &allow_list,
        &policy,
        &provider,
    )
    .await?;

    if report.commit.is_some() {
        emit_patch_applied(&run_id, report.touched.len());
    }

    let report_path = match write_heal_report(&report, &args.out_dir) {
        Ok(path) => Some(path),
        Err(e) => {
            emit_artifact_error(&run_id, &e);
            None
        }
    };
    emit_heal_finished(
        &run_id,
        &report.outcome.to_string(),
        report.attempts_used,
        report.healed(),
    );

    println!("Run:      {}", run_id);
    println!("Outcome:  {}", report.outcome);
    if let Some(branch) = &report.branch {
        println!("Branch:   {}", branch);
    }
    if let Some(commit) = &report.commit {
        println!("Commit:   {}", commit);
    }
    if let Some(pr) = report.pr_number {
        println!("PR:       #{}", pr);
    }
    println!("Attempts: {}", report.attempts_used);
    if let Some(path) = &report_path {
        println!("Report:   {}", path.display());
    }

    if !report.healed() {
        anyhow::bail!("heal run {} finished {}", run_id, report.outcome);
    }
    Ok(())
}

/// One-shot commit-status poll against the GitHub CLI.
async fn cmd_status_poll(repo: &str, sha: &str) -> Result<()> {
    let provider = GhStatusProvider::new(repo);
    let status = provider.commit_status(sha).await?;
    println!("{sha}: {status}");
    Ok(())
}

/// Print a recorded heal report, verifying its digest first.
fn cmd_status(run: &str, out_dir: &Path, json: bool) -> Result<()> {
    let report = read_heal_report(run, out_dir)
        .with_context(|| format!("no verified heal report for run {}", run))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Run:      {}", report.run_id);
    println!("Outcome:  {}", report.outcome);
    println!("Attempts: {}", report.attempts_used);
    if let Some(patch) = &report.selected_patch {
        println!("Patch:    {}", patch);
    }
    if let Some(branch) = &report.branch {
        println!("Branch:   {}", branch);
    }
    if let Some(commit) = &report.commit {
        println!("Commit:   {}", commit);
    }
    if let Some(pr) = report.pr_number {
        println!("PR:       #{}", pr);
    }
    println!("Timeline:");
    for d in &report.decisions {
        println!("  [{}] {:?}: {}", d.attempt, d.action, d.detail);
    }

    if let Ok(index) = read_patch_index(run, out_dir) {
        println!("Candidates:");
        for entry in &index.results {
            println!(
                "  [{}] {} risk={} slop={:.2}",
                entry.verdict, entry.id, entry.risk_level, entry.slop_score
            );
        }
    }

    Ok(())
}
