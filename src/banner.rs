//! Fixed-format report blocks written to stdout

use crate::error::ExecError;
use crate::models::{ExecutionResult, Outcome, Target, MAX_OUTPUT_SIZE};
use std::io::{self, Write};

/// Printed once when the deadline expires before every host reported
pub const TIMEOUT_NOTICE: &str = "Timed out!";

const FOOTER_WIDTH: usize = 82;

/// Header line opening the block for `host`
pub fn header(host: &Target) -> String {
    format!("########### {} ########## \n", host)
}

/// Separator closing every block
pub fn footer() -> String {
    format!("\n{}\n\n", "#".repeat(FOOTER_WIDTH))
}

/// Run preamble listing the targets in input order
pub fn hosts_line(targets: &[Target]) -> String {
    let names: Vec<&str> = targets.iter().map(Target::as_str).collect();
    format!("HOSTS: [{}]\n", names.join(" "))
}

/// Render one host's block; captured output is copied byte for byte
///
/// Markers for truncation and failure each start on a fresh line after the
/// output.
pub fn render_block(result: &ExecutionResult) -> Vec<u8> {
    let mut block = header(&result.target).into_bytes();
    block.extend_from_slice(&result.output);

    if result.truncated {
        block.extend_from_slice(
            format!("\n### OUTPUT TRUNCATED AT {} BYTES ###", MAX_OUTPUT_SIZE).as_bytes(),
        );
    }

    match &result.outcome {
        Outcome::Success => {}
        Outcome::Failure(ExecError::CommandFailed { exit_status }) => {
            block.extend_from_slice(format!("\n### EXIT STATUS {} ###", exit_status).as_bytes());
        }
        Outcome::Failure(err) => {
            block.extend_from_slice(format!("\n### FAILED: {} ###", err).as_bytes());
        }
    }

    block.extend_from_slice(footer().as_bytes());
    block
}

/// Write one block and flush so it shows up as soon as the host finishes
pub fn write_block<W: Write>(out: &mut W, result: &ExecutionResult) -> io::Result<()> {
    out.write_all(&render_block(result))?;
    out.flush()
}
