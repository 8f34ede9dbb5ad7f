use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};

/// Date format accepted on the command line, in local time.
pub const DATE_FORMAT: &str = "%d/%m/%Y %H:%M";

#[derive(Debug, Parser)]
#[command(
    name = "dvbrecd",
    about = "Schedules DVB recordings and RTC wake-ups",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "DVBREC_CONFIG",
        help = "Path to dvbrec.toml (default: ~/.dvbrec/dvbrec.toml)"
    )]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Restore saved state and run the schedulers until SIGINT/SIGTERM.
    Run,

    /// Print the configured channel names.
    Channels,

    /// Queue a recording in the saved state. Refused while the daemon runs.
    AddRecording {
        #[arg(long, default_value_t = 0)]
        adapter: usize,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        program: String,
        #[arg(long, value_parser = parse_local_date, help = "Start, \"dd/mm/YYYY HH:MM\" local time")]
        begin: DateTime<Utc>,
        #[arg(long, value_parser = parse_local_date, help = "End, \"dd/mm/YYYY HH:MM\" local time")]
        end: DateTime<Utc>,
        #[arg(long, help = "Power the machine off once the recording succeeds")]
        shutdown: bool,
    },

    /// Remove a saved recording by the id shown in `list`.
    CancelRecording {
        #[arg(long)]
        id: u64,
    },

    /// Queue a wake-up in the saved state and arm the RTC for the nearest one.
    AddWakeup {
        #[arg(long, value_parser = parse_local_date, help = "\"dd/mm/YYYY HH:MM\" local time")]
        at: DateTime<Utc>,
    },

    /// Remove a saved wake-up and re-arm the RTC for the nearest remaining one.
    CancelWakeup {
        #[arg(long)]
        id: u64,
    },

    /// Print saved recordings and wake-ups.
    List {
        #[arg(long, help = "Emit JSON instead of text")]
        json: bool,
    },

    /// Power the machine off now.
    Halt,
}

/// Parse a `dd/mm/YYYY HH:MM` local date into UTC.
pub fn parse_local_date(raw: &str) -> Result<DateTime<Utc>, String> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|e| format!("expected \"dd/mm/YYYY HH:MM\": {e}"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("{raw} does not exist in the local time zone"))
}

/// Format a UTC instant back into the command-line date format.
pub fn format_local_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format(DATE_FORMAT).to_string()
}
