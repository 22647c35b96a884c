//! `usn-parser`: search the NTFS Master File Table and read or monitor the
//! USN change journal from the command line.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "usn-parser",
    version,
    about = "NTFS USN Journal parser",
    long_about = "A command utility for NTFS to search the MFT and monitor the changes of the USN journal."
)]
struct Cli {
    /// Raise the log level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Monitor real-time USN journal changes
    Monitor {
        #[command(flatten)]
        common: CommonArgs,

        /// Filter the result with keyword, wildcards are permitted
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Search the Master File Table
    Search {
        #[command(flatten)]
        common: CommonArgs,

        /// Search keyword, wildcards are permitted
        keyword: Option<String>,
    },
    /// Read history USN journal entries
    Read {
        #[command(flatten)]
        common: CommonArgs,

        /// Filter the result with keyword, wildcards are permitted
        #[arg(short, long)]
        filter: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
#[cfg_attr(not(windows), allow(dead_code))]
struct CommonArgs {
    /// Volume pathname, e.g. C: or a mount point
    volume: String,

    /// Get only the file entries
    #[arg(long = "FileOnly", alias = "file-only", conflicts_with = "directory_only")]
    file_only: bool,

    /// Get only the directory entries
    #[arg(long = "DirectoryOnly", aliases = ["directory-only", "DirOnly"])]
    directory_only: bool,

    /// Use case-sensitive matching
    #[arg(long = "caseSensitive", alias = "case-sensitive")]
    case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(windows), allow(dead_code))]
enum Mode {
    Monitor,
    Search,
    Read,
}

impl Commands {
    #[cfg_attr(not(windows), allow(dead_code))]
    fn into_parts(self) -> (Mode, CommonArgs, Option<String>) {
        match self {
            Commands::Monitor { common, filter } => (Mode::Monitor, common, filter),
            Commands::Search { common, keyword } => (Mode::Search, common, keyword),
            Commands::Read { common, filter } => (Mode::Read, common, filter),
        }
    }
}

fn log_filter(verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => return EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::new(level)
}

fn init_logging(verbose: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose))
        .with_writer(std::io::stderr)
        .init();
}

/// Interprets an answer to a yes/no question; an empty answer takes `default`.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_yes_no(answer: &str, default: bool) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match app::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            app::hint(&err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(windows)]
mod app {
    use anyhow::{Context, Result, bail};
    use log::{error, info};
    use std::{
        io::{BufRead, Write},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
    };
    use usn_parser::{
        UsnError,
        filter::{EntryFilter, FilterOptions},
        native::VolumeIo,
        output::Printer,
        privilege,
        session::{Session, SessionOptions, SessionOutcome},
        volume::Volume,
    };

    use super::{Cli, Mode, parse_yes_no};

    pub fn run(cli: Cli) -> Result<()> {
        let (mode, common, keyword) = cli.command.into_parts();
        let options = FilterOptions::new(
            keyword,
            common.file_only,
            common.directory_only,
            common.case_sensitive,
        )?;
        let filter = EntryFilter::new(&options)?;

        let volume = Volume::from_argument(&common.volume)
            .with_context(|| format!("Failed to open volume {}", common.volume))?;
        let mut session = open_session(&volume)?;

        let cancel = Arc::new(AtomicBool::new(false));
        let canceller = volume.canceller();
        let flag = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            eprintln!("Keyboard interrupt, exiting...");
            flag.store(true, Ordering::SeqCst);
            canceller.cancel();
        })
        .context("Failed to install the Ctrl-C handler")?;

        let mut printer = Printer::new(std::io::stdout().lock());
        let outcome = match mode {
            Mode::Search => session.search(&filter, &cancel, |entry, path| {
                Ok(printer.print_entry_path(entry, path)?)
            })?,
            Mode::Read => {
                printer.print_journal_info(&session.journal_info()?)?;
                session.read(&filter, &cancel, |entry, path| {
                    Ok(printer.print_entry(entry, path)?)
                })?
            }
            Mode::Monitor => {
                printer.print_journal_info(&session.journal_info()?)?;
                session.monitor(&filter, &cancel, |entry, path| {
                    Ok(printer.print_entry(entry, path)?)
                })?
            }
        };
        printer.into_inner().flush()?;

        if outcome == SessionOutcome::Cancelled {
            info!("{:?} cancelled by the user", mode);
        }
        Ok(())
    }

    fn open_session(volume: &Volume) -> Result<Session<'_, Volume>> {
        match Session::open(volume, SessionOptions::default()) {
            Err(UsnError::JournalNotActive) => {
                let question = format!(
                    "The USN journal of {} is not active. Create it (32 MiB, 8 MiB delta)?",
                    volume.display_name().display()
                );
                if !confirm(&question, true)? {
                    bail!("The USN journal is not active");
                }
                let options = SessionOptions {
                    create_if_not_active: true,
                    ..Default::default()
                };
                Ok(Session::open(volume, options)?)
            }
            result => Ok(result?),
        }
    }

    fn confirm(question: &str, default: bool) -> Result<bool> {
        let stdin = std::io::stdin();
        let mut stderr = std::io::stderr();
        loop {
            write!(stderr, "{} [{}] ", question, if default { "Y/n" } else { "y/N" })?;
            stderr.flush()?;

            let mut answer = String::new();
            if stdin.lock().read_line(&mut answer)? == 0 {
                return Ok(default);
            }
            if let Some(answer) = parse_yes_no(&answer, default) {
                return Ok(answer);
            }
        }
    }

    /// Adds an elevation hint when access was denied to a non-elevated process.
    pub fn hint(err: &anyhow::Error) {
        let denied = err
            .chain()
            .any(|cause| matches!(cause.downcast_ref::<UsnError>(), Some(UsnError::PermissionError)));
        if !denied {
            return;
        }
        match privilege::is_elevated() {
            Ok(false) => eprintln!(
                "You need system administrator privileges to access the USN journal."
            ),
            Ok(true) => {}
            Err(err) => error!("Failed to query the process elevation: {}", err),
        }
    }
}

#[cfg(not(windows))]
mod app {
    use anyhow::{Result, bail};

    use super::Cli;

    pub fn run(_cli: Cli) -> Result<()> {
        bail!("usn-parser only supports Windows, since it relies on NTFS specific features")
    }

    pub fn hint(_err: &anyhow::Error) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_takes_a_positional_keyword() {
        let cli = Cli::try_parse_from(["usn-parser", "search", "C:", "*.txt", "--FileOnly"]).unwrap();
        let (mode, common, keyword) = cli.command.into_parts();

        assert_eq!(mode, Mode::Search);
        assert_eq!(common.volume, "C:");
        assert!(common.file_only);
        assert!(!common.directory_only);
        assert_eq!(keyword.as_deref(), Some("*.txt"));
    }

    #[test]
    fn monitor_and_read_take_a_filter_option() {
        let cli = Cli::try_parse_from(["usn-parser", "monitor", "D", "-f", "*.log", "--caseSensitive"])
            .unwrap();
        let (mode, common, keyword) = cli.command.into_parts();
        assert_eq!(mode, Mode::Monitor);
        assert!(common.case_sensitive);
        assert_eq!(keyword.as_deref(), Some("*.log"));

        let cli = Cli::try_parse_from(["usn-parser", "-vv", "read", "D:", "--DirectoryOnly"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let (mode, common, keyword) = cli.command.into_parts();
        assert_eq!(mode, Mode::Read);
        assert!(common.directory_only);
        assert_eq!(keyword, None);
    }

    #[test]
    fn kind_flags_conflict() {
        let result =
            Cli::try_parse_from(["usn-parser", "read", "C:", "--FileOnly", "--DirectoryOnly"]);
        assert!(result.is_err());
    }

    #[test]
    fn volume_is_required() {
        assert!(Cli::try_parse_from(["usn-parser", "search"]).is_err());
    }

    #[test]
    fn yes_no_answers() {
        assert_eq!(parse_yes_no("\n", true), Some(true));
        assert_eq!(parse_yes_no("", false), Some(false));
        assert_eq!(parse_yes_no(" Y \r\n", false), Some(true));
        assert_eq!(parse_yes_no("no", true), Some(false));
        assert_eq!(parse_yes_no("maybe", true), None);
    }
}
