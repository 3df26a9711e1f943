/// main.rs – Entry point for the Lotofácil tuner.
///
/// Loads settings, opens the SQLite store and dispatches one subcommand.
/// A run skipped because another holds the lock exits successfully.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lotofacil_tuner::{
    analytics::{hit_distribution, HIT_TIERS},
    config::Settings,
    database::Database,
    models::parse_event_line,
    pipeline::{Collaborators, RunMode, RunOutcome, RunReport, Tuner},
    store::{GameLog, HistoryStore},
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "lotofacil-tuner",
    about = "Backtest-driven weight search and constrained game generator",
    version
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "settings.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register results, search weights, guard, and publish a new batch.
    Run,
    /// Search weights and apply the winner, without generating games.
    Search,
    /// Generate and publish a batch from the stored configuration.
    Generate,
    /// Append events from a text file (`id;date;d1;...;d15` per line).
    Import {
        file: String,
    },
    /// Replay the published games over the whole history.
    Report,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load settings (YAML + env override)
    let settings = match Settings::load(&cli.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load settings: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Logging – respects RUST_LOG env var; falls back to config
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.run.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match execute(cli.command, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command, settings: Settings) -> Result<()> {
    let db = Database::open(&settings.run.db_path, settings.universe)?;
    info!("Database opened: {}", settings.run.db_path);

    match command {
        Command::Run => run_mode(&db, settings, RunMode::Full),
        Command::Search => run_mode(&db, settings, RunMode::SearchOnly),
        Command::Generate => run_mode(&db, settings, RunMode::GenerateOnly),
        Command::Import { file } => import(&db, &settings, &file),
        Command::Report => report(&db),
    }
}

fn run_mode(db: &Database, settings: Settings, mode: RunMode) -> Result<()> {
    let mut tuner = Tuner::new(settings, Collaborators::single(db));
    match tuner.run(mode)? {
        RunOutcome::Skipped => {
            warn!("Another run holds the lock – nothing done.");
            Ok(())
        }
        RunOutcome::Completed(report) => {
            print_report(&report);
            Ok(())
        }
    }
}

fn print_report(report: &RunReport) {
    println!("run {}", report.run_id);
    if let Some(reg) = &report.registration {
        println!(
            "registered event {}: best hit {}, neglected [{}]",
            reg.event_id,
            reg.best_hit,
            reg.neglected_rendered()
        );
    }
    if let Some(s) = &report.search {
        println!(
            "search: best {:.4} over {} candidate(s), window {}, {}",
            s.result.best_score,
            s.result.candidates_tested,
            s.result.evaluation_window,
            if s.changed { "changed" } else { "unchanged" }
        );
        println!("weights: {}", s.result.best_configuration.weights);
    }
    for g in &report.games {
        println!("{} {}", g.game_id, g.rendered);
    }
}

fn import(db: &Database, settings: &Settings, file: &str) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    let (mut added, mut existing, mut rejected) = (0usize, 0usize, 0usize);
    for (n, line) in text.lines().enumerate() {
        match parse_event_line(line, &settings.universe) {
            Ok(Some(event)) => {
                if db.append(&event)? {
                    added += 1;
                } else {
                    existing += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("{}:{}: {}", file, n + 1, e);
                rejected += 1;
            }
        }
    }
    info!(
        "Imported {} event(s) from {} ({} already present, {} rejected)",
        added, file, existing, rejected
    );
    Ok(())
}

fn report(db: &Database) -> Result<()> {
    let games = db.current_games()?;
    if games.is_empty() {
        println!("no published games");
        return Ok(());
    }
    let history = db.read_all()?;
    let header: Vec<String> = HIT_TIERS.iter().map(|t| format!("{t:>5}")).collect();
    println!("{:<5} {:<50} {}", "game", "items", header.join(""));
    for (g, dist) in games.iter().zip(hit_distribution(&games, &history)) {
        let counts: Vec<String> = HIT_TIERS
            .iter()
            .map(|&t| format!("{:>5}", dist.count(t)))
            .collect();
        println!("{:<5} {:<50} {}", g.game_id, g.rendered, counts.join(""));
    }
    println!("{} event(s) replayed", history.len());
    Ok(())
}
