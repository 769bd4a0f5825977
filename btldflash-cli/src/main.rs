//! btldflash CLI - Command-line tool for uploading signed firmware to a serial bootloader.
//!
//! ## Features
//!
//! - Stream hex-record images over the bootloader frame protocol
//! - Fill address gaps and sign the transmitted image
//! - Configuration files and environment variable support
//! - Ctrl-C aware handshake and acknowledgment waits

use anyhow::Result;
use clap::Parser;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::flash::cmd_flash;
use config::{Config, Overrides};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C has been pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Exit codes.
const EXIT_OK: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_REJECTED: u8 = 3;
const EXIT_MALFORMED: u8 = 4;
const EXIT_INTERRUPTED: u8 = 130;

/// Errors raised by the CLI itself rather than the library.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// The user stopped the operation.
    #[error("{0}")]
    Cancelled(String),
}

/// btldflash - Upload signed firmware to a serial bootloader.
///
/// Environment variables:
///   BTLDFLASH_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "btldflash")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Serial port the bootloader is attached to.
    #[arg(value_name = "PORT")]
    port: String,

    /// Hex record firmware image.
    #[arg(value_name = "FIRMWARE")]
    firmware: PathBuf,

    /// PEM encoded SEC1 signing key (secp160r1 or secp256k1).
    #[arg(value_name = "KEY")]
    key: PathBuf,

    /// Baud rate.
    #[arg(short, long, env = "BTLDFLASH_BAUD")]
    baud: Option<u32>,

    /// Handshake attempts before giving up (0 = retry until interrupted).
    #[arg(long, value_name = "N")]
    handshake_attempts: Option<u32>,

    /// How long to wait for each device acknowledgment, in milliseconds.
    #[arg(long, value_name = "MS")]
    ack_timeout_ms: Option<u64>,

    /// Reject records whose checksum does not match.
    #[arg(long)]
    verify_checksums: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            baud: self.baud,
            handshake_attempts: self.handshake_attempts,
            ack_timeout_ms: self.ack_timeout_ms,
            verify_checksums: self.verify_checksums,
        }
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    btldflash::set_interrupt_checker(was_interrupted);
}

/// Map a failure to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<CliError>().is_some() {
        return EXIT_INTERRUPTED;
    }
    match err.downcast_ref::<btldflash::Error>() {
        Some(btldflash::Error::Interrupted) => EXIT_INTERRUPTED,
        Some(btldflash::Error::DeviceRejected(_)) => EXIT_REJECTED,
        Some(btldflash::Error::MalformedSource { .. } | btldflash::Error::ChecksumMismatch { .. }) => {
            EXIT_MALFORMED
        },
        _ => EXIT_FAILURE,
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let settings = config.resolve(&cli.port, &cli.overrides());

    cmd_flash(cli, &settings)
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "btldflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_cli_parse_positionals() {
        let cli = Cli::try_parse_from(["btldflash", "/dev/ttyUSB0", "fw.hex", "key.pem"]).unwrap();
        assert_eq!(cli.port, "/dev/ttyUSB0");
        assert_eq!(cli.firmware, PathBuf::from("fw.hex"));
        assert_eq!(cli.key, PathBuf::from("key.pem"));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["btldflash", "COM3", "fw.hex", "key.pem"]).unwrap();
        assert!(cli.handshake_attempts.is_none());
        assert!(cli.ack_timeout_ms.is_none());
        assert!(!cli.verify_checksums);
        assert!(!cli.quiet);
        assert!(cli.config_path.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_options() {
        let cli = Cli::try_parse_from([
            "btldflash",
            "--baud",
            "57600",
            "--handshake-attempts",
            "0",
            "--ack-timeout-ms",
            "250",
            "--verify-checksums",
            "-vv",
            "--quiet",
            "--config",
            "/tmp/btldflash.toml",
            "COM3",
            "fw.hex",
            "key.pem",
        ])
        .unwrap();
        assert_eq!(cli.baud, Some(57600));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);

        let overrides = cli.overrides();
        assert_eq!(overrides.baud, Some(57600));
        assert_eq!(overrides.handshake_attempts, Some(0));
        assert_eq!(overrides.ack_timeout_ms, Some(250));
        assert!(overrides.verify_checksums);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/btldflash.toml")));
    }

    #[test]
    fn test_cli_missing_positionals() {
        assert!(Cli::try_parse_from(["btldflash"]).is_err());
        assert!(Cli::try_parse_from(["btldflash", "COM3", "fw.hex"]).is_err());
    }

    #[test]
    fn test_cli_invalid_baud() {
        let result = Cli::try_parse_from(["btldflash", "--baud", "fast", "COM3", "fw.hex", "k"]);
        assert!(result.is_err());
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_code_rejected() {
        let err = anyhow::Error::new(btldflash::Error::DeviceRejected(
            btldflash::DeviceStatus::DeniedAddress,
        ));
        assert_eq!(exit_code_for(&err), EXIT_REJECTED);
    }

    #[test]
    fn test_exit_code_malformed_through_context() {
        let err = Err::<(), _>(btldflash::Error::ChecksumMismatch {
            line: 2,
            expected: 0x1E,
            actual: 0,
        })
        .context("flash failed")
        .unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_MALFORMED);
    }

    #[test]
    fn test_exit_code_interrupted() {
        let err = anyhow::Error::new(btldflash::Error::Interrupted);
        assert_eq!(exit_code_for(&err), EXIT_INTERRUPTED);
        let err = anyhow::Error::new(CliError::Cancelled("stop".into()));
        assert_eq!(exit_code_for(&err), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_exit_code_generic() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&err), EXIT_FAILURE);
        let err = anyhow::Error::new(btldflash::Error::Timeout("no ack".into()));
        assert_eq!(exit_code_for(&err), EXIT_FAILURE);
    }
}
