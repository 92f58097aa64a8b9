use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use exam_cli::bundle::Bundle;
use exam_cli::commands::{self, SimulateOptions};
use exam_cli::config::EnvVars;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "exam-cli")]
#[command(about = "Preview, check and simulate template tests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Instantiate one template question for a seed
    Preview {
        /// Template test bundle
        bundle: PathBuf,
        /// Group position, starting at 1
        #[arg(long, default_value_t = 1)]
        group: usize,
        /// Question position within the group, starting at 1
        #[arg(long, default_value_t = 1)]
        question: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Locale of the rendered text (defaults to DEFAULT_LOCALE)
        #[arg(long)]
        locale: Option<String>,
    },

    /// Validate that every exam of the bundle can be generated
    Check {
        bundle: PathBuf,
    },

    /// Enroll simulated students, answer, finish and grade a term
    Simulate {
        bundle: PathBuf,
        #[arg(long, default_value_t = 10)]
        students: usize,
        /// Base enrollment seed (random when missing)
        #[arg(long)]
        seed: Option<u32>,
        /// Chance in percent of answering a question correctly
        #[arg(long, default_value_t = 70, value_parser = clap::value_parser!(u8).range(0..=100))]
        correct: u8,
    },

    /// Look up the mark for a number of points
    Grade {
        /// Grading scale, e.g. '{"1":17,"2":14,"3":11,"4":0}'
        grading: String,
        points: i64,
    },
}

fn print<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn run(cli: Cli, env_vars: &EnvVars) -> anyhow::Result<()> {
    let limits = env_vars.generator_limits();
    match cli.command {
        Commands::Preview {
            bundle,
            group,
            question,
            seed,
            locale,
        } => {
            let bundle = Bundle::load(&bundle)?;
            let locale = locale.unwrap_or_else(|| env_vars.default_locale.clone());
            let preview = commands::preview(&bundle, group, question, seed, &locale, limits)
                .with_context(|| format!("unable to preview question {question} of group {group}"))?;
            print(cli.json, &preview, |p| {
                println!("type: {}", p.question_type);
                println!("{}", p.form);
                println!("correct answer: {}", p.correct_answer);
                println!("{}", p.result);
            })?;
        }
        Commands::Check { bundle } => {
            let bundle = Bundle::load(&bundle)?;
            let report = commands::check(&bundle, limits)?;
            print(cli.json, &report, |r| {
                println!(
                    "ok: {} groups, {} questions, max score {}",
                    r.groups, r.questions, r.max_score
                );
            })?;
        }
        Commands::Simulate {
            bundle,
            students,
            seed,
            correct,
        } => {
            let bundle = Bundle::load(&bundle)?;
            let options = SimulateOptions {
                students,
                seed,
                correct_percent: correct,
            };
            let results = commands::simulate(&bundle, options, limits)?;
            print(cli.json, &results, |results| {
                println!("{:>8} {:>12} {:>6} {:>6} {:>5}", "student", "seed", "score", "max", "mark");
                for r in results {
                    println!(
                        "{:>8} {:>12} {:>6} {:>6} {:>5}",
                        r.student,
                        r.seed,
                        r.result.score.unwrap_or_default(),
                        r.result.max_score.unwrap_or_default(),
                        r.result.mark.as_deref().unwrap_or("-"),
                    );
                }
            })?;
        }
        Commands::Grade { grading, points } => {
            let report = commands::grade(&grading, points)?;
            print(cli.json, &report, |r| {
                println!("mark: {} ({})", r.mark.as_deref().unwrap_or("-"), r.color);
                for (mark, min, max) in &r.ranges {
                    match max {
                        Some(max) => println!("  {mark}: {min}..={max}"),
                        None => println!("  {mark}: {min}.."),
                    }
                }
            })?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty())
        .with(sentry::integrations::tracing::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let env_vars = EnvVars::new();
    tracing::debug!(environment = %env_vars.environment, "configuration loaded");

    let _guard = if let Some(sentry_dsn) = env_vars.sentry_dsn.clone() {
        tracing::info!("initializing Sentry");
        // NOTE: Events are only emitted, once the guard goes out of scope.
        Some(sentry::init((
            sentry_dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(env_vars.environment.to_string().into()),
                traces_sample_rate: 1.0,
                ..Default::default()
            },
        )))
    } else {
        None
    };

    let cli = Cli::parse();
    match run(cli, &env_vars) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:?}");
            let message = match e.downcast_ref::<exam_engine::Error>() {
                Some(engine) => format!("{}\n{e:#}", engine.user_message()),
                None => format!("{e:#}"),
            };
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
