use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

fn get_default_once_file() -> OsString {
    crate::once::default_once_file().into_os_string()
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(
        value_name = "FILE",
        env = "REMINDEE_FILE",
        help = "Reminder script file, a directory of *.rem files, or '-' for stdin"
    )]
    pub filename: String,

    #[arg(
        value_name = "DATE",
        help = "Pretend today is DATE (YYYY-MM-DD or 'Jan 1 2030')"
    )]
    pub date: Option<String>,

    #[arg(value_name = "TIME", help = "Pretend the time is TIME (HH:MM)")]
    pub time: Option<String>,

    #[arg(
        value_name = "REPEAT",
        help = "Iterate over *N consecutive days (e.g. *14)"
    )]
    pub repeat: Option<String>,

    #[arg(
        short = 'r',
        action = ArgAction::Count,
        help = "Disable RUN and shell(); give twice to also disable expression evaluation"
    )]
    pub no_run: u8,

    #[arg(short = 'q', help = "Don't queue timed reminders")]
    pub no_queue: bool,

    #[arg(
        short = 'a',
        help = "Don't trigger timed reminders immediately; only queue them"
    )]
    pub no_ats: bool,

    #[arg(
        short = 'f',
        help = "Stay in the foreground (accepted for compatibility; the daemon never forks)"
    )]
    pub dont_fork: bool,

    #[arg(short = 'n', help = "List each reminder's next trigger date")]
    pub next_mode: bool,

    #[arg(
        short = 's',
        value_name = "LEVEL",
        num_args = 0..=1,
        default_missing_value = "1",
        help = "Simple-calendar output: level 1 legacy lines, 2 JSON lines, 3 JSON months"
    )]
    pub simple: Option<u8>,

    #[arg(
        short = 'm',
        long = "months",
        value_name = "N",
        help = "Number of months for the simple calendar"
    )]
    pub months: Option<u32>,

    #[arg(
        short = 'i',
        value_name = "VAR=EXPR",
        action = ArgAction::Append,
        help = "Preset a variable ($var for system variables)"
    )]
    pub init_vars: Vec<String>,

    #[arg(
        short = 'd',
        value_name = "FLAGS",
        default_value = "",
        help = "Debug flags: e=echo lines, t=trigger computation, x=expressions, f=file tracing"
    )]
    pub debug: String,

    #[arg(
        short = 'z',
        value_name = "MINUTES",
        num_args = 0..=1,
        default_missing_value = "0",
        help = "Daemon mode, rereading on changes; 0 = server mode with a stdin protocol"
    )]
    pub daemon: Option<i32>,

    #[arg(long = "json", help = "JSON responses in server mode")]
    pub json: bool,

    #[arg(long = "test-mode", hide = true)]
    pub test_mode: bool,

    #[arg(
        long = "once-file",
        env = "REMINDEE_ONCE_FILE",
        value_name = "FILE",
        help = "Timestamp file backing the ONCE modifier",
        default_value = get_default_once_file()
    )]
    pub once_file: PathBuf,

    #[arg(long = "ignore-once", help = "Trigger ONCE reminders regardless")]
    pub ignore_once: bool,

    #[arg(
        long = "line-info",
        help = "Emit '# fileinfo <line> <file>' before each reminder"
    )]
    pub prefix_line_no: bool,

    #[arg(
        long = "sys-dir",
        env = "REMINDEE_SYS_DIR",
        value_name = "DIR",
        help = "Directory searched by INCLUDESYS"
    )]
    pub sys_dir: Option<String>,

    #[arg(
        long = "trusted-user",
        value_name = "UID",
        action = ArgAction::Append,
        help = "Allow RUN in files owned by this uid (repeatable)"
    )]
    pub trusted_users: Vec<u32>,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
