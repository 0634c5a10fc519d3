use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::Instrument;

use supaquiz_engine::config::{Config, TrainingSettings};
use supaquiz_engine::db::{SqliteStore, StoreError};
use supaquiz_engine::error::EngineResult;
use supaquiz_engine::logging::init_tracing;
use supaquiz_engine::services;
use supaquiz_engine::state::EngineState;

#[derive(Parser, Debug)]
#[command(name = "supaquiz-engine")]
#[command(version)]
#[command(about = "Adaptive quiz recommendations backed by knowledge tracing", long_about = None)]
struct Args {
    /// Raise engine log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Args {
    fn verbosity(&self) -> i8 {
        if self.quiet {
            -1
        } else {
            self.verbose.min(2) as i8
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load questions, sessions and responses from a JSON file
    Import {
        /// Object with optional `questions`, `sessions` and `responses` arrays
        file: PathBuf,
    },

    /// Train a new model from every stored response
    Train {
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        hidden_size: Option<usize>,
        #[arg(long)]
        dropout: Option<f64>,
        #[arg(long)]
        max_seq_len: Option<usize>,
        #[arg(long)]
        learning_rate: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Per-theme mastery of one user, weakest first
    Stats {
        #[arg(long)]
        user: String,
    },

    /// Recommend the next questions for one user
    Recommend {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0.5)]
        mix_ratio: f64,
        /// heuristic, bandit or dkt
        #[arg(long, default_value = "heuristic")]
        policy: String,
    },

    /// Next-step metrics of the active model on one user's history
    Holdout {
        #[arg(long)]
        user: String,
    },

    /// Run every policy for one user side by side
    Compare {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Play and store one synthetic session
    Simulate {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "heuristic")]
        policy: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Import { .. } => "import",
            Self::Train { .. } => "train",
            Self::Stats { .. } => "stats",
            Self::Recommend { .. } => "recommend",
            Self::Holdout { .. } => "holdout",
            Self::Compare { .. } => "compare",
            Self::Simulate { .. } => "simulate",
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> EngineResult<()> {
    let out = serde_json::to_string_pretty(value).map_err(StoreError::from)?;
    println!("{out}");
    Ok(())
}

async fn run(command: Commands, config: Config) -> EngineResult<()> {
    let store = SqliteStore::connect(&config.database_url).await?;
    let state = EngineState::new(store, config);

    match command {
        Commands::Import { file } => {
            let batch = services::read_batch(&file).await?;
            print_json(&services::import_batch(state.store(), batch).await?)
        }
        Commands::Train {
            epochs,
            batch_size,
            hidden_size,
            dropout,
            max_seq_len,
            learning_rate,
            seed,
        } => {
            let base = state.config().training;
            let settings = TrainingSettings {
                epochs: epochs.unwrap_or(base.epochs),
                batch_size: batch_size.unwrap_or(base.batch_size),
                hidden_size: hidden_size.unwrap_or(base.hidden_size),
                dropout: dropout.unwrap_or(base.dropout),
                max_sequence_length: max_seq_len.unwrap_or(base.max_sequence_length),
                learning_rate: learning_rate.unwrap_or(base.learning_rate),
                seed: seed.unwrap_or(base.seed),
            };
            print_json(&services::train(&state, settings).await?)
        }
        Commands::Stats { user } => {
            let window = state.config().analysis_window_days;
            print_json(&services::theme_stats(state.store(), &user, window).await?)
        }
        Commands::Recommend {
            user,
            limit,
            mix_ratio,
            policy,
        } => print_json(&services::recommend(&state, &user, limit, mix_ratio, &policy).await?),
        Commands::Holdout { user } => print_json(&services::holdout_metrics(&state, &user).await?),
        Commands::Compare { user, limit } => {
            print_json(&services::compare_policies(&state, &user, limit).await?)
        }
        Commands::Simulate {
            user,
            policy,
            limit,
        } => print_json(&services::simulate_session(&state, &user, &policy, limit).await?),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.logging, args.verbosity());

    let span = tracing::info_span!("command", name = args.command.name());
    match run(args.command, config).instrument(span).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, kind = ?err.kind(), "command failed");
            ExitCode::FAILURE
        }
    }
}
