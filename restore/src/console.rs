use std::io::{BufRead, BufReader, Write};

/// User-facing output channel for the restore flow.
///
/// The flow prints a small, stable set of progress lines that operators grep
/// for, so the writers (and the prompt reader) are injectable and tests
/// capture them verbatim. Diagnostic logging goes through `tracing` instead.
pub struct Console {
    info: Box<dyn Write + Send>,
    warning: Box<dyn Write + Send>,
    input: Box<dyn BufRead + Send>,
}

impl Console {
    pub fn new(
        info: Box<dyn Write + Send>,
        warning: Box<dyn Write + Send>,
        input: Box<dyn BufRead + Send>,
    ) -> Self {
        Self { info, warning, input }
    }

    /// Console wired to the process stdio.
    pub fn stdio() -> Self {
        Self {
            info: Box::new(std::io::stdout()),
            warning: Box::new(std::io::stdout()),
            input: Box::new(BufReader::new(std::io::stdin())),
        }
    }

    pub fn info(&mut self, message: &str) {
        let _ = writeln!(self.info, "{message}");
        let _ = self.info.flush();
    }

    pub fn warning(&mut self, message: &str) {
        let _ = writeln!(self.warning, "WARNING: {message}");
        let _ = self.warning.flush();
    }

    /// Prints `prompt` followed by a space (no newline) and reads one line.
    /// Returns true only on an explicit yes; empty input declines.
    pub fn confirm(&mut self, prompt: &str) -> bool {
        let _ = write!(self.info, "{prompt} ");
        let _ = self.info.flush();
        let mut line = String::new();
        if self.input.read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes" | "Yes")
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdio()
    }
}

/// Formats a byte count the way the progress lines expect: integral bytes
/// below 1 KB ("4B"), one decimal above ("2.5MB").
pub fn format_byte_count(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if n < 1024 {
        return format!("{n}B");
    }
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1}{}", UNITS[unit])
}
