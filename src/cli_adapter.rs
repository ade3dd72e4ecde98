//! External-CLI adapter (C9): a drop-in capture provider that execs a
//! configured sigrok-style CLI instead of speaking the serial/TCP protocol
//! directly (spec §4.9). Grounded on the pack's subprocess-driven device
//! adapters (`other_examples/` BITalino-style drivers use `std::process`
//! wrappers around an external tool the same way).

use std::process::Command;

use crate::error::{CliError, CliResult};
use crate::session::{CaptureSession, TriggerType};

/// Where to find and how to address the external tool.
#[derive(Debug, Clone)]
pub struct CliCaptureConfig {
    pub tool_path: String,
    pub driver: String,
    pub conn: String,
}

/// Build the documented argument vector (spec §6): driver, connection,
/// sample rate, sample count, output file/format, channel list, and an
/// optional trigger spec.
pub fn build_args(config: &CliCaptureConfig, session: &CaptureSession, output_path: &str) -> Vec<String> {
    let channels = session
        .channel_numbers()
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut args = vec![
        "--driver".to_string(),
        config.driver.clone(),
        "--conn".to_string(),
        config.conn.clone(),
        "--config".to_string(),
        format!("samplerate={}", session.frequency),
        "--samples".to_string(),
        session.total_samples().to_string(),
        "--output-file".to_string(),
        output_path.to_string(),
        "--output-format".to_string(),
        "srzip".to_string(),
        "--channels".to_string(),
        channels,
    ];

    if let Some(spec) = trigger_spec(session) {
        args.push("--triggers".to_string());
        args.push(spec);
    }
    args
}

/// Encode a session's trigger as the CLI's trigger-spec string (spec §6):
/// Edge is `c=r`/`c=f`; Complex/Fast is a comma-separated `i=0|1` per pattern
/// bit. Blast has no CLI-expressible trigger.
fn trigger_spec(session: &CaptureSession) -> Option<String> {
    match session.trigger_type {
        TriggerType::Edge => {
            let edge = if session.trigger_inverted { 'f' } else { 'r' };
            Some(format!("{}={}", session.trigger_channel, edge))
        }
        TriggerType::Complex | TriggerType::Fast => {
            let bits: Vec<String> = (0..session.trigger_bit_count)
                .map(|i| {
                    let bit = (session.trigger_pattern >> i) & 1;
                    format!("{}={}", session.trigger_channel as u16 + i as u16, bit)
                })
                .collect();
            Some(bits.join(","))
        }
        TriggerType::Blast => None,
    }
}

/// Run the external tool and parse its output container back into `session`.
pub fn run_capture(config: &CliCaptureConfig, session: &mut CaptureSession, output_path: &str) -> CliResult<()> {
    let args = build_args(config, session, output_path);
    let output = Command::new(&config.tool_path)
        .args(&args)
        .output()
        .map_err(|e| CliError::Spawn { tool: config.tool_path.clone(), source: e })?;

    if !output.status.success() {
        return Err(CliError::NonZeroExit {
            tool: config.tool_path.clone(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let contents = std::fs::read_to_string(output_path)
        .map_err(|e| CliError::OutputIo { path: output_path.to_string(), source: e })?;
    parse_csv_matrix(&contents, session)
}

/// Parse a CSV-like per-channel 0/1 matrix (one non-empty row per requested
/// channel, in request order) into `session.capture_channels[*].samples`.
pub fn parse_csv_matrix(contents: &str, session: &mut CaptureSession) -> CliResult<()> {
    let channel_numbers = session.channel_numbers();
    let rows: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
    if rows.len() != channel_numbers.len() {
        return Err(CliError::ChannelCountMismatch { expected: channel_numbers.len(), got: rows.len() });
    }

    let mut parsed_rows = Vec::with_capacity(rows.len());
    for (row_idx, row) in rows.iter().enumerate() {
        let mut bits = Vec::new();
        for (col_idx, field) in row.split(',').enumerate() {
            let bit: u8 = field.trim().parse().map_err(|_| CliError::MalformedRow {
                row: row_idx,
                detail: format!("field {col_idx} is not 0/1: {field:?}"),
            })?;
            if bit > 1 {
                return Err(CliError::MalformedRow {
                    row: row_idx,
                    detail: format!("field {col_idx} out of range: {bit}"),
                });
            }
            bits.push(bit);
        }
        parsed_rows.push(bits);
    }

    for ch in &mut session.capture_channels {
        if let Some(idx) = channel_numbers.iter().position(|&n| n == ch.number) {
            ch.samples = parsed_rows[idx].clone();
        }
    }
    Ok(())
}
