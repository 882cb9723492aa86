//! Interactive driver: reads commands, feeds the issuance session, reports state

use crate::commands::{parse_command, Command, HELP};
use anyhow::Result;
use liaison_core::config::Hospital;
use liaison_core::{IssuanceEvent, IssuanceSession, IssuanceState, IssuanceSteps};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

const PREVIEW_MAX_WIDTH: u32 = 450;
const PREVIEW_MAX_HEIGHT: u32 = 600;
const MAX_LISTED_HITS: usize = 20;

pub struct Shell<T: IssuanceSteps> {
    session: IssuanceSession<T>,
    hospitals: Vec<Hospital>,
    default_care_type: String,
    preview_out: PathBuf,
}

impl<T: IssuanceSteps> Shell<T> {
    pub fn new(
        session: IssuanceSession<T>,
        hospitals: Vec<Hospital>,
        default_care_type: String,
        preview_out: PathBuf,
    ) -> Self {
        Self {
            session,
            hospitals,
            default_care_type,
            preview_out,
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &IssuanceSession<T> {
        &self.session
    }

    /// Run until `quit` or end of input. Command errors are reported on
    /// `output` and the loop continues; only I/O failures end it early.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, output: &mut W) -> Result<()> {
        writeln!(output, "Type 'help' for the list of commands.")?;
        write!(output, "> ")?;
        output.flush()?;

        for line in input.lines() {
            let line = line?;
            match parse_command(&line) {
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command, output)?,
                Ok(None) => {}
                Err(e) => writeln!(output, "error: {}", e)?,
            }
            write!(output, "> ")?;
            output.flush()?;
        }
        writeln!(output)?;
        Ok(())
    }

    fn execute<W: Write>(&mut self, command: Command, output: &mut W) -> Result<()> {
        let event = match command {
            Command::Help => {
                writeln!(output, "{}", HELP)?;
                return Ok(());
            }
            Command::Hospitals => {
                self.list_hospitals(output)?;
                return Ok(());
            }
            Command::Quit => return Ok(()),
            Command::Search(query) => IssuanceEvent::Search(query),
            Command::Select(id) => IssuanceEvent::Select(id),
            Command::Compose(args) => match args.to_request(&self.hospitals, &self.default_care_type) {
                Ok(request) => IssuanceEvent::Compose(request),
                Err(e) => {
                    writeln!(output, "error: {:#}", e)?;
                    return Ok(());
                }
            },
            Command::Confirm => IssuanceEvent::Confirm,
            Command::Cancel => IssuanceEvent::Cancel,
            Command::Reset => IssuanceEvent::Reset,
        };

        match self.session.handle(event) {
            Ok(state) => report_state(state, &self.preview_out, output),
            Err(e) => {
                writeln!(output, "error: {}", e)?;
                Ok(())
            }
        }
    }

    fn list_hospitals<W: Write>(&self, output: &mut W) -> Result<()> {
        if self.hospitals.is_empty() {
            writeln!(output, "No hospitals configured; pass hospital=<name> to compose.")?;
        }
        for (i, hospital) in self.hospitals.iter().enumerate() {
            writeln!(output, "  {:>2}. {} ({})", i + 1, hospital.name, hospital.address)?;
        }
        Ok(())
    }
}

fn report_state<W: Write>(state: &IssuanceState, preview_out: &Path, output: &mut W) -> Result<()> {
    match state {
        IssuanceState::Idle => writeln!(output, "Ready.")?,
        IssuanceState::Searching { query, hits } => {
            writeln!(output, "{} match(es) for '{}':", hits.len(), query)?;
            for record in hits.iter().take(MAX_LISTED_HITS) {
                writeln!(output, "  {:<8} {:<32} CIN {}", record.id, record.full_name(), record.cin)?;
            }
            if hits.len() > MAX_LISTED_HITS {
                writeln!(output, "  ... {} more, refine the query", hits.len() - MAX_LISTED_HITS)?;
            }
        }
        IssuanceState::RecordSelected { record } => {
            writeln!(output, "Selected {} {} (CIN {}, CNSS {})", record.id, record.full_name(), record.cin, record.cnss)?;
        }
        IssuanceState::PreviewReady {
            document,
            preview,
            duplicate,
            ..
        } => {
            writeln!(
                output,
                "Letter {} composed: {} page(s)",
                document.reference, document.page_count
            )?;
            let thumbnail = preview.thumbnail(PREVIEW_MAX_WIDTH, PREVIEW_MAX_HEIGHT);
            match thumbnail.save_png(preview_out) {
                Ok(()) => writeln!(output, "Preview written to {}", preview_out.display())?,
                Err(e) => writeln!(output, "warning: preview not written: {}", e)?,
            }
            if let Some(period) = duplicate {
                writeln!(
                    output,
                    "warning: a letter is already recorded for this employee in {}; confirm will be refused",
                    period
                )?;
            } else {
                writeln!(output, "Type 'confirm' to save and record it, or compose again.")?;
            }
        }
        IssuanceState::LedgerAppended { entry, path } => {
            writeln!(output, "Saved {}", path.display())?;
            writeln!(output, "Recorded {} for {} {}", entry.reference, entry.employee_id, entry.full_name)?;
        }
        IssuanceState::Cancelled => writeln!(output, "Cancelled.")?,
        // Transient, never returned by the session
        IssuanceState::Composing { .. } | IssuanceState::Confirmed { .. } => {
            writeln!(output, "{}", state)?
        }
    }
    Ok(())
}
