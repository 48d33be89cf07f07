//! Line-oriented prompt/print helper shared by every interactive step.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};

pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Prints `message` without a newline and reads one line. Returns `None`
    /// on end of input. The trailing line terminator is stripped.
    pub fn prompt(&mut self, message: &str) -> Result<Option<String>> {
        write!(self.output, "{message}").context("writing prompt")?;
        self.output.flush().context("flushing prompt")?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("reading user input")?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        Ok(Some(trimmed))
    }

    pub fn say(&mut self, message: impl AsRef<str>) -> Result<()> {
        writeln!(self.output, "{}", message.as_ref()).context("writing output")
    }

    pub fn blank(&mut self) -> Result<()> {
        writeln!(self.output).context("writing output")
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

/// Parses a menu answer. Only plain ASCII digits count; signs and inner
/// spaces are rejected.
pub fn menu_number(input: &str) -> Option<usize> {
    let trimmed = input.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

#[cfg(test)]
pub(crate) fn scripted(lines: &[&str]) -> Console<std::io::Cursor<Vec<u8>>, Vec<u8>> {
    let mut input = lines.join("\n");
    if !lines.is_empty() {
        input.push('\n');
    }
    Console::new(std::io::Cursor::new(input.into_bytes()), Vec::new())
}

#[cfg(test)]
pub(crate) fn transcript(console: Console<std::io::Cursor<Vec<u8>>, Vec<u8>>) -> String {
    String::from_utf8_lossy(&console.into_output()).into_owned()
}
