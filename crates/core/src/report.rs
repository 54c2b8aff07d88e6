//! Console table renderer.
//!
//! The table is the whole wire format: a banner, one fixed-width row per
//! test and a closing total. Rows for a test that is still being polled end
//! in `\r` so the next row for the same test overwrites them in place.

use crate::sequencer::TestRecord;
use crate::TestResult;
use std::io::{self, Write};

pub const INDEX_WIDTH: usize = 4;
pub const NAME_WIDTH: usize = 32;
pub const STATUS_WIDTH: usize = 12;

const LINE_END: &str = "\r\n";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[;H";
const BANNER_EDGE: &str = "******************";

/// Tells a polling loop whether to invoke its primitive again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Break,
}

#[derive(Debug)]
pub struct Reporter<W: Write> {
    out: W,
    /// Width of the in-place row currently on screen, 0 when the line is clean.
    pending_width: usize,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            pending_width: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn clear_screen(&mut self) -> io::Result<()> {
        self.out.write_all(CLEAR_SCREEN.as_bytes())
    }

    pub fn banner(&mut self, board: &str) -> io::Result<()> {
        write!(
            self.out,
            "{BANNER_EDGE} Class-B Safety Test for {board}: \
             Core Peripheral Resources {BANNER_EDGE} {LINE_END}{LINE_END}"
        )?;
        let rule = rule();
        write!(self.out, "{rule}{LINE_END}")?;
        write!(
            self.out,
            "{} {LINE_END}",
            format_row("#", "IP under test", "Test Status")
        )?;
        write!(self.out, "{rule}{LINE_END}")?;
        self.out.flush()
    }

    /// Render one record. In-progress records are drawn in place and ask the
    /// caller to keep polling; anything else closes the row.
    pub fn row(&mut self, record: &TestRecord) -> io::Result<LoopControl> {
        let mut line = format_row(
            &record.index.to_string(),
            &record.name,
            record.result.label(),
        );

        let control = if record.result == TestResult::PassStillTesting {
            line.push_str(&format!("count={}", record.progress.unwrap_or(0)));
            LoopControl::Continue
        } else {
            if let Some(diagnostic) = &record.diagnostic {
                line.push('\t');
                line.push_str(&diagnostic.to_string());
            }
            LoopControl::Break
        };

        let width = line.chars().count();
        if width < self.pending_width {
            line.push_str(&" ".repeat(self.pending_width - width));
        }

        match control {
            LoopControl::Continue => {
                write!(self.out, "{line}\r")?;
                self.pending_width = width;
            }
            LoopControl::Break => {
                write!(self.out, "{line}{LINE_END}")?;
                self.pending_width = 0;
            }
        }
        self.out.flush()?;
        Ok(control)
    }

    pub fn footer(&mut self, covered: u32) -> io::Result<()> {
        write!(self.out, "{}{LINE_END}{LINE_END}", rule())?;
        write!(self.out, "END of the Core CPU Test.{LINE_END}{LINE_END}")?;
        write!(
            self.out,
            "Total number of IPs covered in the Test      {}{LINE_END}",
            covered
        )?;
        self.out.flush()
    }
}

fn rule() -> String {
    format!("{} ", "-".repeat(2 + INDEX_WIDTH + 2 + NAME_WIDTH + 2 + STATUS_WIDTH + 1))
}

/// `| index | name | status |` with the name clipped to its column.
pub fn format_row(index: &str, name: &str, status: &str) -> String {
    let name: String = name.chars().take(NAME_WIDTH).collect();
    format!(
        "| {:<iw$}| {:<nw$}| {:<sw$}|",
        index,
        name,
        status,
        iw = INDEX_WIDTH,
        nw = NAME_WIDTH,
        sw = STATUS_WIDTH
    )
}
