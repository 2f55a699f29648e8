pub mod output;
pub mod process;
pub mod remote;

use std::{fmt::Display, path::PathBuf};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::{
    config::Config,
    daemon::start_daemon,
    storage::{entities::ActivitySessionEntity, fallback::FallbackLog, store::{FileRecordStore, RecordStore}},
    tracker::analytics,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "focusd", version)]
#[command(about = "Tracks foreground activity and runs pomodoro cycles", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FocusAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PomodoroAction {
    Start,
    Pause,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Start (or restart) the daemon in the background")]
    Init {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(
        about = "Run the daemon directly in the current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(about = "Stop the currently running daemon")]
    Stop {},
    #[command(about = "Show the live tracker and pomodoro state")]
    Status {
        #[arg(short, long, help = "Keep streaming updates as they happen")]
        follow: bool,
    },
    #[command(about = "Control activity monitoring")]
    Focus {
        #[arg(value_enum)]
        action: FocusAction,
    },
    #[command(about = "Control the pomodoro timer")]
    Pomodoro {
        #[arg(value_enum)]
        action: PomodoroAction,
    },
    #[command(about = "Show recorded sessions for a day")]
    Logs {
        #[arg(
            long,
            help = "Day to display. Examples are \"yesterday\", \"2 days ago\", \"15/03/2025\""
        )]
        date: Option<String>,
        #[arg(long, default_value_t = 100, help = "Maximum number of sessions shown")]
        limit: usize,
        #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
        date_style: DateStyle,
    },
    #[command(about = "Show the productivity breakdown for a day")]
    Analytics {
        #[arg(
            long,
            help = "Day to display. Examples are \"yesterday\", \"2 days ago\", \"15/03/2025\""
        )]
        date: Option<String>,
        #[arg(long, default_value_t = DateStyle::Uk)]
        date_style: DateStyle,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = create_application_default_path()?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    match args.commands {
        Commands::Init { dir } => process::restart_daemon(dir.as_deref()),
        Commands::Stop {} => {
            process::kill_running_daemons(&process::daemon_executable()?);
            Ok(())
        }
        Commands::Serve { dir } => start_daemon(dir.unwrap_or(app_dir)).await,
        Commands::Status { follow } => {
            let config = Config::load(&app_dir)?;
            remote::show_status(config.listen_port, follow).await
        }
        Commands::Focus { action } => {
            let config = Config::load(&app_dir)?;
            let command = match action {
                FocusAction::Start => "start_focus",
                FocusAction::Stop => "stop_focus",
            };
            remote::send_command(config.listen_port, command).await
        }
        Commands::Pomodoro { action } => {
            let config = Config::load(&app_dir)?;
            let command = match action {
                PomodoroAction::Start => "start_pomodoro",
                PomodoroAction::Pause => "pause_pomodoro",
            };
            remote::send_command(config.listen_port, command).await
        }
        Commands::Logs {
            date,
            limit,
            date_style,
        } => {
            let date = parse_date_argument(date, date_style)?;
            let sessions = load_sessions(&app_dir, date, limit).await?;
            output::print_logs(date, &sessions);
            Ok(())
        }
        Commands::Analytics { date, date_style } => {
            let date = parse_date_argument(date, date_style)?;
            let sessions = load_sessions(&app_dir, date, usize::MAX).await?;
            output::print_analytics(date, &analytics::aggregate(&sessions));
            let pomodoros = FileRecordStore::new(&app_dir)?
                .get_pomodoro_sessions(date)
                .await?;
            output::print_pomodoro_summary(&pomodoros);
            Ok(())
        }
    }
}

/// Defaults to today; understands the same free-form dates as the examples
/// in the help text.
fn parse_date_argument(date: Option<String>, date_style: DateStyle) -> Result<NaiveDate> {
    let Some(date) = date else {
        return Ok(Local::now().date_naive());
    };
    match parse_date_string(&date, Local::now(), date_style.into()) {
        Ok(parsed) => Ok(parsed.date_naive()),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to parse date \"{date}\": {e}"),
            )
            .into()),
    }
}

/// Same store-then-fallback read the daemon itself uses.
async fn load_sessions(
    app_dir: &std::path::Path,
    date: NaiveDate,
    limit: usize,
) -> Result<Vec<ActivitySessionEntity>> {
    let store = FileRecordStore::new(app_dir)?;
    let sessions = store.get_activity_logs(date, limit).await?;
    if !sessions.is_empty() {
        return Ok(sessions);
    }
    FallbackLog::new(app_dir)?.read_day(date, limit).await
}
