// src/training/oracle.rs

use anyhow::Context;
use std::collections::BTreeSet;
use std::io::{self, BufRead, BufReader, Write};

use crate::models::{FieldMap, MISSING};

/// Operator verdict on one presented pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelResponse {
    Match,
    Distinct,
    /// Skip this pair without recording an example.
    Unsure,
    /// End the labeling session.
    Finished,
}

/// Source of labels for an active learning session.
///
/// Implementations are external collaborators (a console, a review UI, a
/// test script) with arbitrary failure modes, so they report errors through
/// `anyhow` and the session wraps whatever comes back.
pub trait LabelingOracle {
    fn label(&mut self, left: &FieldMap, right: &FieldMap) -> anyhow::Result<LabelResponse>;
}

/// Interactive labeling over a reader/writer pair, `stdin`/`stdout` in the
/// shipped binary. Prints both records field by field and accepts
/// `y` / `n` / `u` / `f` answers, re-prompting on anything else. End of
/// input reads as Finished so a closed pipe ends the session cleanly.
pub struct ConsoleOracle<R, W> {
    input: R,
    output: W,
}

impl ConsoleOracle<BufReader<io::Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        ConsoleOracle {
            input: BufReader::new(io::stdin()),
            output: io::stdout(),
        }
    }
}

impl<R: BufRead, W: Write> ConsoleOracle<R, W> {
    pub fn new(input: R, output: W) -> Self {
        ConsoleOracle { input, output }
    }

    fn render_pair(&mut self, left: &FieldMap, right: &FieldMap) -> io::Result<()> {
        let names: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
        writeln!(self.output)?;
        for side in [left, right] {
            for name in &names {
                writeln!(self.output, "{} : {}", name, side.get(*name).unwrap_or(&MISSING))?;
            }
            writeln!(self.output)?;
        }
        writeln!(self.output, "Do these records refer to the same thing?")?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> LabelingOracle for ConsoleOracle<R, W> {
    fn label(&mut self, left: &FieldMap, right: &FieldMap) -> anyhow::Result<LabelResponse> {
        self.render_pair(left, right)
            .context("Failed to print candidate pair")?;
        loop {
            write!(self.output, "(y)es / (n)o / (u)nsure / (f)inished: ")
                .context("Failed to print label prompt")?;
            self.output.flush().context("Failed to flush label prompt")?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("Failed to read label response")?;
            if read == 0 {
                return Ok(LabelResponse::Finished);
            }
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(LabelResponse::Match),
                "n" | "no" => return Ok(LabelResponse::Distinct),
                "u" | "unsure" => return Ok(LabelResponse::Unsure),
                "f" | "finished" => return Ok(LabelResponse::Finished),
                other => {
                    writeln!(self.output, "Unrecognized response '{}'.", other)
                        .context("Failed to print label prompt")?;
                }
            }
        }
    }
}
