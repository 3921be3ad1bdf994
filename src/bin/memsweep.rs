//! memsweep - headless memory monitor with automatic reclaim.
//!
//! Runs the monitor loops and reads one command per line from stdin.
//! `quit` or end of input stops the loops and saves the config.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use clap::Parser;
use memsweep::config::{self, Config, ConfigStore};
use memsweep::logging;
use memsweep::reclaim::Admission;
use memsweep::runtime::{Controls, Monitor};
use memsweep::theme::Theme;
use memsweep::types::ReclaimResult;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const HELP: &str = "\
commands:
  clean                   reclaim now
  auto on [PERCENT]       reclaim when RAM reaches PERCENT
  auto off
  period on [MINUTES]     reclaim every MINUTES
  period off
  interval SECONDS        sampling interval
  history SECONDS         history window
  top N                   processes to rank
  theme NAME              green | purple | blue | yellow
  notify on|off           report reclaim results
  status
  quit";

/// memsweep: background memory monitor with automatic reclaim
#[derive(Parser, Debug)]
#[command(name = "memsweep")]
#[command(author = "PAIML Team")]
#[command(version)]
#[command(about = "Background memory monitor with automatic reclaim", long_about = None)]
struct Cli {
    /// Config file path (defaults to MEMSWEEP_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level or filter directive; MEMSWEEP_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, PartialEq)]
enum Command {
    Clean,
    Auto { enabled: bool, threshold: Option<i64> },
    Period { enabled: bool, minutes: Option<u64> },
    Interval(f64),
    History(u64),
    Top(usize),
    Theme(Theme),
    Notify(bool),
    Status,
    Help,
    Quit,
}

fn parse_switch(word: Option<&str>) -> Result<bool, String> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err("expected 'on' or 'off'".to_string()),
    }
}

fn parse_number<T: std::str::FromStr>(word: Option<&str>, what: &str) -> Result<T, String> {
    let word = word.ok_or_else(|| format!("missing {what}"))?;
    word.parse().map_err(|_| format!("invalid {what}: '{word}'"))
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };

    let command = match head {
        "clean" => Command::Clean,
        "auto" => {
            let enabled = parse_switch(words.next())?;
            let threshold = words.next().map(|w| parse_number(Some(w), "threshold")).transpose()?;
            Command::Auto { enabled, threshold }
        }
        "period" => {
            let enabled = parse_switch(words.next())?;
            let minutes = words.next().map(|w| parse_number(Some(w), "minutes")).transpose()?;
            Command::Period { enabled, minutes }
        }
        "interval" => Command::Interval(parse_number(words.next(), "seconds")?),
        "history" => Command::History(parse_number(words.next(), "seconds")?),
        "top" => Command::Top(parse_number(words.next(), "count")?),
        "theme" => Command::Theme(parse_number(words.next(), "theme")?),
        "notify" => Command::Notify(parse_switch(words.next())?),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(command))
}

/// Applies one command. Returns the reply line and whether to stop.
fn execute(controls: &Controls, command: Command) -> (String, bool) {
    let reply = match command {
        Command::Clean => match controls.trigger_manual_reclaim() {
            Admission::Started(_) => "reclaim started".to_string(),
            Admission::Coalesced => "reclaim already running".to_string(),
            Admission::ShutDown => "shutting down".to_string(),
        },
        Command::Auto { enabled, threshold } => {
            let threshold = threshold
                .unwrap_or_else(|| i64::from(controls.config().auto_clean_threshold_percent));
            let c = controls.set_auto_clean(enabled, threshold);
            if c.auto_clean_enabled {
                format!("auto clean on at {}%", c.auto_clean_threshold_percent)
            } else {
                "auto clean off".to_string()
            }
        }
        Command::Period { enabled, minutes } => {
            let minutes = minutes.unwrap_or_else(|| controls.config().auto_clean_period_minutes);
            match controls.set_periodic_clean(enabled, minutes) {
                Ok(c) if c.auto_clean_period_enabled => {
                    format!("periodic clean every {} min", c.auto_clean_period_minutes)
                }
                Ok(_) => "periodic clean off".to_string(),
                Err(e) => e.to_string(),
            }
        }
        Command::Interval(seconds) => describe(controls.set_update_interval(seconds), |c| {
            format!("interval {}s", c.update_interval_seconds)
        }),
        Command::History(seconds) => describe(controls.set_history_window(seconds), |c| {
            format!("history {}s", c.history_seconds)
        }),
        Command::Top(n) => describe(controls.set_top_n(n), |c| format!("top {}", c.top_n_processes)),
        Command::Theme(theme) => format!("theme {}", controls.set_theme(theme).theme),
        Command::Notify(enabled) => {
            let c = controls.set_notify_on_cleanup(enabled);
            format!("notifications {}", if c.notify_on_cleanup { "on" } else { "off" })
        }
        Command::Status => controls.status().to_string().trim_end().to_string(),
        Command::Help => HELP.to_string(),
        Command::Quit => return ("bye".to_string(), true),
    };
    (reply, false)
}

fn describe(result: memsweep::Result<Config>, ok: impl FnOnce(&Config) -> String) -> String {
    match result {
        Ok(c) => ok(&c),
        Err(e) => e.to_string(),
    }
}

fn run(cli: Cli) -> memsweep::Result<()> {
    let path = cli
        .config
        .or_else(Config::default_path)
        .unwrap_or_else(|| PathBuf::from("memsweep.yaml"));
    info!(path = %path.display(), env = config::CONFIG_ENV, "using config");

    let store = Arc::new(ConfigStore::open(path));
    let monitor = Monitor::for_host(store)?;
    monitor.observers().subscribe_reclaim(Arc::new(|result: &ReclaimResult| {
        match &result.error {
            None => println!(
                "reclaim ({}) done, RAM now {:.1}%",
                result.reason, result.percent_after
            ),
            Some(err) => println!("reclaim ({}) failed: {err}", result.reason),
        }
    }));

    let handle = monitor.start()?;
    let controls = handle.controls();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                let (text, quit) = execute(&controls, command);
                writeln!(stdout, "{text}")?;
                if quit {
                    break;
                }
            }
            Err(e) => writeln!(stdout, "{e}")?,
        }
        stdout.flush()?;
    }

    handle.shutdown()
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.log_level) {
        eprintln!("memsweep: {e}");
        std::process::exit(2);
    }

    if let Err(e) = run(cli) {
        error!(error = %e, "memsweep failed");
        std::process::exit(1);
    }
}
