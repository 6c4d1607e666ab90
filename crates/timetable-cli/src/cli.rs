use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "timetable")]
#[command(about = "Edit timetables offline and sync them across your devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Relay base URL (overrides TIMETABLE_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub server_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in as a user on this device
    Login {
        /// Numeric user id
        user_id: i64,
    },
    /// Sign out; local data and outbox are kept
    Logout,
    /// Show this device's id, session and outbox state
    Device,
    /// Manage timetables
    Table {
        #[command(subcommand)]
        command: TableCommands,
    },
    /// Manage courses in a timetable
    Course {
        #[command(subcommand)]
        command: CourseCommands,
    },
    /// Show messages waiting to be uploaded
    Outbox {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one full sync cycle against the relay
    Sync {
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum TableCommands {
    /// Create a timetable
    #[command(alias = "new")]
    Add {
        name: Vec<String>,
        /// First day of the term (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        start_date: Option<String>,
        /// Number of weeks in the term
        #[arg(long, value_name = "N")]
        weeks: Option<i32>,
    },
    /// Rename a timetable
    Rename {
        /// Table key or unique key prefix
        key: String,
        name: Vec<String>,
    },
    /// Delete a timetable and everything in it
    Delete {
        /// Table key or unique key prefix
        key: String,
    },
    /// List timetables of the signed-in user
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum CourseCommands {
    /// Add a course to a timetable
    Add {
        /// Table key or unique key prefix
        table: String,
        name: Vec<String>,
        #[arg(long)]
        room: Option<String>,
        #[arg(long)]
        teacher: Option<String>,
    },
    /// List courses of a timetable
    List {
        /// Table key or unique key prefix
        table: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
