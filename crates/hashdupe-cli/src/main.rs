mod commands;
mod logging;
mod progress;

use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use colored::*;
use commands::{Cli, Mode};
use dotenv::dotenv;
use hashdupe_core::config::load_configuration;
use hashdupe_core::executor::ExecutionSummary;
use hashdupe_core::plan::ReviewOptions;
use hashdupe_core::{DedupeEngine, PlanRun};
use progress::CliReporter;
use serde::Serialize;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    dotenv().ok();

    let args = Cli::parse();
    let _guard = logging::init_logger(args.json);

    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::from(1)
        }
    }
}

fn run(args: &Cli) -> anyhow::Result<ExitCode> {
    let mut config = load_configuration().context("loading configuration")?;
    args.apply_to(&mut config);
    config.validate()?;

    let engine = DedupeEngine::new(config);
    let reporter = CliReporter::new();

    match args.mode {
        Mode::Plan => run_plan(&engine, args, &reporter),
        Mode::Apply => run_apply(&engine, args, &reporter),
        Mode::Review => run_review(&engine, args, &reporter),
        Mode::Restore => run_restore(&engine, args),
    }
}

#[derive(Debug, Serialize)]
struct PlanOutput<'a> {
    level: String,
    keep: String,
    records: usize,
    malformed: usize,
    coerced: usize,
    excluded: usize,
    superseded: usize,
    groups: usize,
    extras: usize,
    reclaimable_bytes: u64,
    low_value_groups: usize,
    integrity_warnings: usize,
    protected: usize,
    covered: usize,
    directories_seen: usize,
    nested_suppressed: usize,
    plan: Option<&'a Path>,
    report: Option<&'a Path>,
}

impl<'a> PlanOutput<'a> {
    fn new(run: &'a PlanRun) -> Self {
        let plan = &run.plan;
        Self {
            level: plan.level.to_string(),
            keep: plan.policy.to_string(),
            records: run.records,
            malformed: run.load_stats.malformed,
            coerced: run.load_stats.coerced,
            excluded: run.load_stats.excluded,
            superseded: run.load_stats.superseded,
            groups: plan.groups.len(),
            extras: plan.entries().len(),
            reclaimable_bytes: plan.reclaimable_bytes(),
            low_value_groups: plan.low_value_groups.len(),
            integrity_warnings: plan.integrity.len(),
            protected: plan.protected,
            covered: plan.covered,
            directories_seen: run.directories_seen,
            nested_suppressed: run.nested_suppressed,
            plan: run.artifacts.as_ref().map(|a| a.plan.as_path()),
            report: run.artifacts.as_ref().map(|a| a.report.as_path()),
        }
    }
}

fn run_plan(engine: &DedupeEngine, args: &Cli, reporter: &CliReporter) -> anyhow::Result<ExitCode> {
    let run = engine
        .plan(reporter, args.csv.as_deref())
        .context("building plan")?;
    let output = PlanOutput::new(&run);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!();
    println!("groups: {}", output.groups.to_string().cyan());
    println!("extras planned: {}", output.extras.to_string().red());
    println!("reclaimable bytes: {}", output.reclaimable_bytes.to_string().red());
    if output.malformed > 0 {
        println!("malformed lines: {}", output.malformed.to_string().yellow());
    }
    if output.low_value_groups > 0 {
        println!("low-value groups: {}", output.low_value_groups);
    }
    if output.integrity_warnings > 0 {
        println!(
            "integrity warnings: {} (excluded from the plan)",
            output.integrity_warnings.to_string().yellow()
        );
    }
    if output.protected + output.covered > 0 {
        println!(
            "protected: {}, covered by a planned ancestor: {}",
            output.protected, output.covered
        );
    }
    if let Some(artifacts) = &run.artifacts {
        println!("plan: {}", artifacts.plan.display().to_string().green());
        println!("report: {}", artifacts.report.display());
        if let Some(path) = &artifacts.low_value {
            println!("low-value list: {}", path.display());
        }
        if let Some(path) = &artifacts.integrity {
            println!("integrity list: {}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct ApplyOutput<'a> {
    plan: &'a Path,
    log: Option<&'a Path>,
    #[serde(flatten)]
    summary: &'a ExecutionSummary,
}

fn run_apply(engine: &DedupeEngine, args: &Cli, reporter: &CliReporter) -> anyhow::Result<ExitCode> {
    let plan_path = engine.resolve_plan(args.plan.as_deref())?;
    info!("Applying plan {}", plan_path.display());

    if args.force && engine.config().delete && io::stdin().is_terminal() {
        let prompt = format!(
            "Permanently delete every entry listed in {}?",
            plan_path.display()
        );
        if !prompt_confirm(&prompt, Some(false))? {
            warn!("Aborted by user; nothing was deleted");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let log_path = args
        .log
        .clone()
        .unwrap_or_else(|| hashdupe_core::default_log_path(&plan_path));
    let report = engine
        .apply(&plan_path, args.force, Some(log_path.clone()), reporter)
        .with_context(|| format!("applying {}", plan_path.display()))?;
    let summary = &report.summary;

    if args.json {
        let output = ApplyOutput {
            plan: &plan_path,
            log: args.force.then_some(log_path.as_path()),
            summary,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!();
        if summary.dry_run {
            println!("{}", "dry run: nothing was changed (pass --force to act)".yellow());
            println!("would act on: {}", summary.pending.to_string().cyan());
        } else {
            println!("moved: {}", summary.moved.to_string().green());
            println!("deleted: {}", summary.deleted.to_string().green());
            println!("log: {}", log_path.display());
        }
        println!("missing: {}", summary.missing);
        println!("not regular: {}", summary.not_regular);
        let failed = summary.failed.to_string();
        println!(
            "failed: {}",
            if summary.failed > 0 { failed.red() } else { failed.normal() }
        );
        if summary.cancelled {
            println!("{}", "cancelled before the end of the plan".yellow());
        }
    }

    Ok(if summary.failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_review(engine: &DedupeEngine, args: &Cli, reporter: &CliReporter) -> anyhow::Result<ExitCode> {
    let options = ReviewOptions {
        skip: args.skip,
        take: args.take,
    };
    let stdin = io::stdin();
    let (plan_path, summary) = engine
        .review(args.plan.as_deref(), &options, stdin.lock(), io::stdout(), reporter)
        .context("reviewing groups")?;

    if args.json {
        #[derive(Serialize)]
        struct ReviewOutput<'a> {
            plan: &'a Path,
            #[serde(flatten)]
            summary: &'a hashdupe_core::plan::ReviewSummary,
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&ReviewOutput {
                plan: &plan_path,
                summary: &summary,
            })?
        );
    } else {
        println!();
        println!("reviewed: {}", summary.reviewed);
        println!("extras written: {}", summary.extras_written.to_string().red());
        println!("plan: {}", plan_path.display().to_string().green());
        if summary.next_group > 0 {
            println!(
                "resume with: --mode review --plan {} (continues at group {})",
                plan_path.display(),
                summary.next_group + 1
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_restore(engine: &DedupeEngine, args: &Cli) -> anyhow::Result<ExitCode> {
    let Some(log) = args.log.as_deref() else {
        bail!("restore needs the execution log (--log FILE)");
    };
    let summary = engine
        .restore(log, args.force)
        .with_context(|| format!("restoring from {}", log.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        if summary.dry_run {
            println!("{}", "dry run: nothing was changed (pass --force to act)".yellow());
            println!("would restore: {}", summary.pending.to_string().cyan());
        } else {
            println!("restored: {}", summary.restored.to_string().green());
        }
        println!("missing from quarantine: {}", summary.missing);
        println!("original path in use: {}", summary.occupied);
        println!("failed: {}", summary.failed);
    }

    Ok(if summary.failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
