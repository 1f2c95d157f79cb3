mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arena")]
#[command(about = "Arena CLI - Submit solutions, manage problems and contests, inspect results", long_about = None)]
struct Cli {
    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379", global = true)]
    redis_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a solution to be graded against a problem's test cases
    Submit {
        /// Language name (javascript, python, csharp)
        #[arg(short, long)]
        language: String,

        /// Source file to submit
        #[arg(short, long)]
        file: PathBuf,

        /// Problem id
        #[arg(short, long)]
        problem: String,

        /// Submitting user id
        #[arg(short, long)]
        user: String,

        /// Grade as part of this contest
        #[arg(short, long)]
        contest: Option<String>,

        /// Per-test timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Wait for the verdict and print it
        #[arg(short, long, default_value = "false")]
        wait: bool,
    },

    /// Execute a source file without grading it
    Run {
        #[arg(short, long)]
        language: String,

        #[arg(short, long)]
        file: PathBuf,

        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(short, long, default_value = "false")]
        wait: bool,
    },

    /// Show the stored outcome of a job
    Result {
        /// Job id returned by submit or run
        id: String,
    },

    /// Cancel a queued or running job
    Cancel { id: String },

    /// Manage problems
    Problem {
        #[command(subcommand)]
        action: ProblemAction,
    },

    /// Manage contests
    Contest {
        #[command(subcommand)]
        action: ContestAction,
    },

    /// Join a contest as a user
    Join {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        contest: String,
    },

    /// Show a user's XP and solve counts
    Progress { user: String },

    /// List configured languages
    Languages {
        #[arg(long, default_value = "config/languages.json")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProblemAction {
    /// Create or replace a problem from a JSON file
    Put { file: PathBuf },

    /// Print a stored problem
    Show { id: String },
}

#[derive(Subcommand)]
enum ContestAction {
    /// Create or replace a contest from a JSON file
    Put { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Reading local config needs no Redis connection.
    let command = match cli.command {
        Commands::Languages { config } => return commands::list_languages(&config),
        command => command,
    };

    let mut conn = commands::connect(&cli.redis_url).await?;

    match command {
        Commands::Submit {
            language,
            file,
            problem,
            user,
            contest,
            timeout_ms,
            wait,
        } => {
            commands::submit(
                &mut conn,
                &language,
                &file,
                &problem,
                &user,
                contest.as_deref(),
                timeout_ms,
                wait,
            )
            .await?;
        }
        Commands::Run {
            language,
            file,
            timeout_ms,
            wait,
        } => {
            commands::run(&mut conn, &language, &file, timeout_ms, wait).await?;
        }
        Commands::Result { id } => {
            commands::show_result(&mut conn, &id).await?;
        }
        Commands::Cancel { id } => {
            commands::cancel(&mut conn, &id).await?;
        }
        Commands::Problem { action } => match action {
            ProblemAction::Put { file } => commands::put_problem(&mut conn, &file).await?,
            ProblemAction::Show { id } => commands::show_problem(&mut conn, &id).await?,
        },
        Commands::Contest { action } => match action {
            ContestAction::Put { file } => commands::put_contest(&mut conn, &file).await?,
        },
        Commands::Join { user, contest } => {
            commands::join_contest(&mut conn, &user, &contest).await?;
        }
        Commands::Progress { user } => {
            commands::show_progress(&mut conn, &user).await?;
        }
        // Handled above
        Commands::Languages { .. } => {}
    }

    Ok(())
}
