//! Flash command implementation.

use anyhow::{Context, Result};
use btldflash::{FlashSession, NativePort, Records, SigningKey};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;

use crate::config::Settings;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("interrupted by user".to_string()).into())
    } else {
        Ok(())
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {bytes} sent {msg}")
            .unwrap(),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Upload a hex image to the bootloader and sign it.
pub(crate) fn cmd_flash(cli: &Cli, settings: &Settings) -> Result<()> {
    // Key and source problems should surface before touching the device.
    let key = SigningKey::from_pem_file(&cli.key)
        .with_context(|| format!("failed to load signing key {}", cli.key.display()))?;
    debug!("Signing key: {key:?}");

    let records = Records::from_file(&cli.firmware, settings.parse)
        .with_context(|| format!("failed to open firmware {}", cli.firmware.display()))?;

    ensure_not_interrupted()?;

    if !cli.quiet {
        eprintln!(
            "{} Opening {} at {} baud",
            style("⏳").yellow(),
            settings.serial.port_name,
            settings.serial.baud_rate
        );
    }
    let port = NativePort::open(&settings.serial)
        .with_context(|| format!("failed to open serial port {}", settings.serial.port_name))?;

    let pb = progress_bar(cli.quiet);
    pb.set_message(cli.firmware.display().to_string());

    let mut session = FlashSession::new(port, &key, settings.session.clone());
    let result = session.run(records, |sent| pb.set_position(u64::from(sent)));

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            pb.abandon();
            return Err(e).context("flash failed");
        },
    };
    pb.finish_and_clear();

    if !cli.quiet {
        eprintln!(
            "{} Sent {} bytes ({} data, {} filler) in {} frames",
            style("✓").green(),
            report.total_size,
            report.data_bytes,
            report.filler_bytes,
            report.data_frames
        );
        if report.skipped_records > 0 || report.ignored_records > 0 {
            eprintln!(
                "{} {} record(s) skipped, {} record(s) ignored",
                style("ℹ").blue(),
                report.skipped_records,
                report.ignored_records
            );
        }
        eprintln!("  sha256:    {}", report.signature.digest_hex());
        eprintln!("  signature: {}", report.signature.signature_hex());
        eprintln!("\n{} Flash completed", style("🎉").green().bold());
    }

    Ok(())
}
