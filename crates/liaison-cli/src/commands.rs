//! Parsing of the interactive driver's command lines

use anyhow::{anyhow, bail, Context, Result};
use liaison_core::config::Hospital;
use liaison_types::{parse_admission, LetterRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Select(String),
    Compose(ComposeArgs),
    Confirm,
    Cancel,
    Reset,
    Hospitals,
    Help,
    Quit,
}

/// `key=value` pairs of a `compose` line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeArgs {
    pub hospital: String,
    pub date: String,
    pub time: Option<String>,
    pub care: Option<String>,
    pub requester: Option<String>,
    pub treating: Option<String>,
}

pub const HELP: &str = "\
Commands:
  search <query>           find employees by name or matricule
  select <matricule>       choose the employee the letter is for
  compose hospital=<h> date=<d> [time=<t>] [care=<c>] [requester=<r>] [treating=<t>]
                           build the letter and write the preview
  confirm                  save the PDF and record it in the ledger
  cancel                   abandon the current letter
  reset                    start over
  hospitals                list the configured hospitals
  quit                     leave";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_lowercase().as_str() {
        "search" | "s" => {
            if rest.is_empty() {
                bail!("usage: search <query>");
            }
            Command::Search(rest.to_string())
        }
        "select" => {
            if rest.is_empty() {
                bail!("usage: select <matricule>");
            }
            Command::Select(rest.to_string())
        }
        "compose" => Command::Compose(parse_compose_args(rest)?),
        "confirm" => Command::Confirm,
        "cancel" => Command::Cancel,
        "reset" => Command::Reset,
        "hospitals" => Command::Hospitals,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command '{}', type 'help'", other),
    };
    Ok(Some(command))
}

const COMPOSE_KEYS: [&str; 8] = ["hospital", "hopital", "date", "time", "heure", "care", "requester", "treating"];

/// Split `key=value` pairs. A word that does not start with a known key
/// continues the previous value, so `hospital=CH Metz date=2024-03-01` needs
/// no quoting and values may themselves contain `=`.
fn parse_compose_args(input: &str) -> Result<ComposeArgs> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for word in input.split_whitespace() {
        let pair = word
            .split_once('=')
            .map(|(key, value)| (key.to_lowercase(), value))
            .filter(|(key, _)| COMPOSE_KEYS.contains(&key.as_str()) || pairs.is_empty());
        match pair {
            Some((key, value)) => pairs.push((key, value.to_string())),
            None => match pairs.last_mut() {
                Some((_, value)) => {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(word);
                }
                None => bail!("expected key=value, got '{}'", word),
            },
        }
    }

    let mut args = ComposeArgs::default();
    for (key, value) in pairs {
        let value = value.trim().to_string();
        match key.as_str() {
            "hospital" | "hopital" => args.hospital = value,
            "date" => args.date = value,
            "time" | "heure" => args.time = Some(value),
            "care" => args.care = Some(value),
            "requester" => args.requester = Some(value),
            "treating" => args.treating = Some(value),
            other => bail!("unknown compose field '{}'", other),
        }
    }

    if args.hospital.is_empty() {
        bail!("compose needs hospital=<name or number>");
    }
    if args.date.is_empty() {
        bail!("compose needs date=<admission date>");
    }
    Ok(args)
}

impl ComposeArgs {
    /// Build the letter request. The employee id is left blank for the
    /// session to fill from the selected record.
    ///
    /// `hospital=2` picks the second catalogue entry.
    pub fn to_request(&self, hospitals: &[Hospital], default_care_type: &str) -> Result<LetterRequest> {
        let hospital = match self.hospital.parse::<usize>() {
            Ok(index) => hospitals
                .get(index.wrapping_sub(1))
                .map(|h| h.name.clone())
                .ok_or_else(|| anyhow!("no hospital number {}, see 'hospitals'", index))?,
            Err(_) => self.hospital.clone(),
        };

        let admission = match &self.time {
            Some(time) => format!("{} {}", self.date, time),
            None => self.date.clone(),
        };
        let (date, time) = parse_admission(&admission).context("invalid admission date")?;

        let care = self
            .care
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default_care_type.to_string());

        let mut request = LetterRequest::new("", date, hospital, care).with_physicians(
            self.requester.clone().unwrap_or_default(),
            self.treating.clone().unwrap_or_default(),
        );
        if let Some(time) = time {
            request = request.with_admission_time(time);
        }
        Ok(request)
    }
}
