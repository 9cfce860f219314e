use bigdecimal::{BigDecimal, Signed};
use csv::{StringRecord, Trim};
use jiff::civil::DateTime;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_START_COLUMN: &str = "Sessie gestart";
pub const DEFAULT_END_COLUMN: &str = "Sessie beëindigd";
pub const DEFAULT_ENERGY_COLUMN: &str = "Verbruik";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("column `{0}` not found in the header")]
    MissingColumn(String),
    #[error("line {line}: field `{field}` is missing or malformed: {reason}")]
    MissingOrMalformedField {
        line: u64,
        field: String,
        reason: String,
    },
    #[error("failed to open the sessions file")]
    Io(#[from] std::io::Error),
    #[error("failed to read the sessions file")]
    Csv(#[from] csv::Error),
}

/// One charging session: when it started, when it ended and how many kWh it used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub start: DateTime,
    pub end: DateTime,
    pub energy: BigDecimal,
}

/// A parsed session together with the raw row it came from.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub line: u64,
    pub fields: StringRecord,
    pub session: Session,
}

#[derive(Debug)]
pub struct SessionTable {
    pub headers: StringRecord,
    pub rows: Vec<Result<SessionRecord, SessionError>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `2024-04-01T06:00:00`, `2024-04-01 06:00` and the like.
    Iso,
    /// A `strftime`-style pattern such as `%d-%m-%Y %H:%M`.
    Pattern(String),
}

impl TimestampFormat {
    fn parse(&self, value: &str) -> Result<DateTime, jiff::Error> {
        match self {
            TimestampFormat::Iso => DateTime::from_str(value),
            TimestampFormat::Pattern(pattern) => DateTime::strptime(pattern, value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub start_column: String,
    pub end_column: String,
    pub energy_column: String,
    pub delimiter: u8,
    pub timestamp_format: TimestampFormat,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            start_column: DEFAULT_START_COLUMN.to_string(),
            end_column: DEFAULT_END_COLUMN.to_string(),
            energy_column: DEFAULT_ENERGY_COLUMN.to_string(),
            delimiter: b',',
            timestamp_format: TimestampFormat::Iso,
        }
    }
}

pub fn read_session_file(path: &Path, options: &ReadOptions) -> Result<SessionTable, SessionError> {
    read_sessions(File::open(path)?, options)
}

/// Reads every row of a sessions CSV.
///
/// Header problems fail the whole read; a row with a bad field is kept as an error in its place
/// so the caller decides whether to abort or skip it.
pub fn read_sessions(
    reader: impl Read,
    options: &ReadOptions,
) -> Result<SessionTable, SessionError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| SessionError::MissingColumn(name.to_string()))
    };
    let columns = Columns {
        start: column(&options.start_column)?,
        end: column(&options.end_column)?,
        energy: column(&options.energy_column)?,
    };

    let mut rows = Vec::new();
    for record in csv_reader.into_records() {
        let fields = record?;
        let line = fields.position().map_or(0, |position| position.line());
        if fields.len() > headers.len() {
            let reason = format!("{} fields under {} headers", fields.len(), headers.len());
            rows.push(Err(malformed(line, "row", reason)));
            continue;
        }
        rows.push(
            parse_session(&fields, line, &columns, options).map(|session| SessionRecord {
                line,
                fields,
                session,
            }),
        );
    }
    Ok(SessionTable { headers, rows })
}

/// Header positions of the session columns.
struct Columns {
    start: usize,
    end: usize,
    energy: usize,
}

fn parse_session(
    fields: &StringRecord,
    line: u64,
    columns: &Columns,
    options: &ReadOptions,
) -> Result<Session, SessionError> {
    let field = |index: usize, name: &str| {
        fields
            .get(index)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| malformed(line, name, "missing value"))
    };
    let timestamp = |index: usize, name: &str| {
        options
            .timestamp_format
            .parse(field(index, name)?)
            .map_err(|error| malformed(line, name, error))
    };
    Ok(Session {
        start: timestamp(columns.start, &options.start_column)?,
        end: timestamp(columns.end, &options.end_column)?,
        energy: parse_energy(field(columns.energy, &options.energy_column)?)
            .map_err(|reason| malformed(line, &options.energy_column, reason))?,
    })
}

fn malformed(line: u64, field: &str, reason: impl ToString) -> SessionError {
    SessionError::MissingOrMalformedField {
        line,
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses a kWh reading, accepting a decimal comma.
/// Exponent notation is refused.
fn parse_energy(value: &str) -> Result<BigDecimal, String> {
    if value.contains(['e', 'E']) {
        return Err(format!("`{value}` is not a plain decimal number"));
    }
    let normalized = if value.contains('.') {
        value.to_string()
    } else {
        value.replace(',', ".")
    };
    let energy = BigDecimal::from_str(&normalized).map_err(|error| error.to_string())?;
    if energy.is_negative() {
        return Err(format!("energy must not be negative, got {energy}"));
    }
    Ok(energy)
}
