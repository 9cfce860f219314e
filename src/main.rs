mod export;
mod rate_calculator;
mod schedule;
mod session_data;
mod tariff;

use crate::rate_calculator::{Allocation, allocate_all};
use crate::schedule::Schedule;
use crate::session_data::{ReadOptions, SessionRecord, TimestampFormat, read_session_file};
use crate::tariff::{Quarter, TariffConfig};
use anyhow::{Context, Result, bail};
use bigdecimal::BigDecimal;
use clap::{Args, Parser};
use jiff::civil::Time;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Splits EV charging sessions into day and night tariff hours.
/// Reads a CSV export of charging sessions, works out how much of every session fell under
/// the day and the night tariff, divides the consumed energy accordingly and prices both
/// parts. Writes the sessions back out with the split appended.
#[derive(Parser, Debug)]
#[command(version, long_about)]
struct Laadsplit {
    /// CSV export of charging sessions, with a header row.
    sessions_csv: PathBuf,
    /// Where to write the enriched sessions. Defaults to standard output.
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    tariff: TariffArgs,
    #[command(flatten)]
    window: WindowArgs,
    #[command(flatten)]
    input: InputArgs,
    /// Leave out sessions that cannot be parsed or split instead of stopping at the first one.
    #[arg(long)]
    skip_invalid: bool,
    /// Number of threads to split sessions on.
    #[arg(short, long, default_value = "1")]
    jobs: NonZeroUsize,
    /// Log every allocation.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = true)]
struct TariffArgs {
    /// TOML file with `day_rate`, `night_rate` and an optional `[schedule]` table.
    #[arg(long, conflicts_with_all = ["quarter", "day_rate", "night_rate"])]
    tariff_file: Option<PathBuf>,
    /// Built-in quarterly rates, in cents per kWh.
    #[arg(short, long, value_enum, conflicts_with_all = ["day_rate", "night_rate"])]
    quarter: Option<Quarter>,
    #[arg(long, env = "DAY_RATE", requires = "night_rate", long_help = rate_help("day"))]
    day_rate: Option<BigDecimal>,
    #[arg(long, env = "NIGHT_RATE", requires = "day_rate", long_help = rate_help("night"))]
    night_rate: Option<BigDecimal>,
}

fn rate_help(period: &str) -> String {
    format!(
        "Your {} rate per kWh. The costs come out in the same unit, so pass cents to get \
         cents. Use `--quarter` instead to pick one of the built-in rates.",
        period
    )
}

#[derive(Args, Debug)]
struct WindowArgs {
    /// Start of the day tariff, overriding the default 07:00 and the tariff file.
    #[arg(long)]
    day_start: Option<Time>,
    /// End of the day tariff, overriding the default 22:00 and the tariff file.
    #[arg(long)]
    day_end: Option<Time>,
}

#[derive(Args, Debug)]
struct InputArgs {
    #[arg(long, default_value = session_data::DEFAULT_START_COLUMN)]
    start_column: String,
    #[arg(long, default_value = session_data::DEFAULT_END_COLUMN)]
    end_column: String,
    /// Column with the consumed energy in kWh.
    #[arg(long, default_value = session_data::DEFAULT_ENERGY_COLUMN)]
    energy_column: String,
    /// Field delimiter of both the input and the output.
    #[arg(short, long, default_value_t = ',')]
    delimiter: char,
    /// `strftime` pattern of the timestamps, e.g. `%d-%m-%Y %H:%M`. ISO 8601 by default.
    #[arg(long)]
    timestamp_format: Option<String>,
}

impl InputArgs {
    fn read_options(&self) -> Result<ReadOptions> {
        if !self.delimiter.is_ascii() {
            bail!("delimiter must be a single ASCII character, got `{}`", self.delimiter);
        }
        Ok(ReadOptions {
            start_column: self.start_column.clone(),
            end_column: self.end_column.clone(),
            energy_column: self.energy_column.clone(),
            delimiter: self.delimiter as u8,
            timestamp_format: self
                .timestamp_format
                .clone()
                .map_or(TimestampFormat::Iso, TimestampFormat::Pattern),
        })
    }
}

fn resolve_tariff(tariff: &TariffArgs, window: &WindowArgs) -> Result<TariffConfig> {
    let base = if let Some(path) = &tariff.tariff_file {
        TariffConfig::from_toml_file(path)
            .with_context(|| format!("failed to load tariff from {}", path.display()))?
    } else {
        let (day_rate, night_rate) = match (&tariff.quarter, &tariff.day_rate, &tariff.night_rate) {
            (Some(quarter), _, _) => quarter.rates(),
            (None, Some(day_rate), Some(night_rate)) => (day_rate.clone(), night_rate.clone()),
            _ => bail!("both `--day-rate` and `--night-rate` are required"),
        };
        TariffConfig::new(day_rate, night_rate, Schedule::default())?
    };
    if window.day_start.is_none() && window.day_end.is_none() {
        return Ok(base);
    }
    let schedule = Schedule {
        day_start: window.day_start.unwrap_or(base.schedule.day_start),
        day_end: window.day_end.unwrap_or(base.schedule.day_end),
        ..base.schedule
    };
    Ok(TariffConfig::new(base.day_rate, base.night_rate, schedule)?)
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Laadsplit::parse();
    init_tracing(args.verbose);

    let tariff = resolve_tariff(&args.tariff, &args.window)?;
    info!(
        day_rate = %tariff.day_rate,
        night_rate = %tariff.night_rate,
        day_start = %tariff.schedule.day_start,
        day_end = %tariff.schedule.day_end,
        "resolved tariff",
    );

    let read_options = args.input.read_options()?;
    let table = read_session_file(&args.sessions_csv, &read_options)
        .with_context(|| format!("failed to read {}", args.sessions_csv.display()))?;
    let total_rows = table.rows.len();
    let records = keep_valid(table.rows, args.skip_invalid)?;
    eprintln!("Found {} charging sessions", records.len());

    let sessions: Vec<_> = records.iter().map(|record| record.session.clone()).collect();
    let allocations = allocate_all(&sessions, &tariff, args.jobs);
    let mut rows = Vec::with_capacity(records.len());
    for (record, allocation) in records.iter().zip(allocations) {
        match allocation {
            Ok(allocation) => {
                debug!(
                    line = record.line,
                    starts_at_night = tariff.schedule.is_night(record.session.start),
                    day_hours = %allocation.day_hours,
                    night_hours = %allocation.night_hours,
                    total_cost = %allocation.total_cost,
                    "allocated session",
                );
                rows.push((record, allocation));
            }
            Err(error) if args.skip_invalid => {
                warn!(line = record.line, %error, "skipping session");
            }
            Err(error) => {
                return Err(error).with_context(|| format!("line {}", record.line));
            }
        }
    }

    let row_refs = rows.iter().map(|(record, allocation)| (*record, allocation));
    let delimiter = read_options.delimiter;
    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            export::write_enriched(BufWriter::new(file), delimiter, &table.headers, row_refs)?;
            info!(path = %path.display(), "saved enriched sessions");
        }
        None => export::write_enriched(io::stdout().lock(), delimiter, &table.headers, row_refs)?,
    }

    write_session_table(io::stderr().lock(), &rows)?;
    print_summary(total_rows - rows.len(), rows.iter().map(|(_, allocation)| allocation));
    Ok(())
}

/// Splits parsed rows into the valid records, either dropping or failing on the rest.
fn keep_valid(
    rows: Vec<Result<SessionRecord, session_data::SessionError>>,
    skip_invalid: bool,
) -> Result<Vec<SessionRecord>> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match row {
            Ok(record) => records.push(record),
            Err(error) if skip_invalid => warn!(%error, "skipping row"),
            Err(error) => return Err(error.into()),
        }
    }
    Ok(records)
}

/// One line per session: when it ran, how it was split and what it cost.
fn write_session_table(
    mut out: impl Write,
    rows: &[(&SessionRecord, Allocation)],
) -> io::Result<()> {
    writeln!(
        out,
        "{:<19}  {:<19}  {:>7}  {:>7}  {:>9}  {:>9}  {:>10}",
        "Start", "End", "Day h", "Night h", "Day kWh", "Night kWh", "Total cost"
    )?;
    for (record, allocation) in rows {
        writeln!(
            out,
            "{:<19}  {:<19}  {:>7}  {:>7}  {:>9}  {:>9}  {:>10}",
            record.session.start.to_string(),
            record.session.end.to_string(),
            format!("{:.2}", allocation.day_hours),
            format!("{:.2}", allocation.night_hours),
            format!("{:.3}", allocation.day_energy),
            format!("{:.3}", allocation.night_energy),
            format!("{:.2}", allocation.total_cost),
        )?;
    }
    Ok(())
}

fn print_summary<'a>(skipped: usize, allocations: impl Iterator<Item = &'a Allocation> + Clone) {
    let day_energy: BigDecimal = allocations.clone().map(|a| &a.day_energy).sum();
    let night_energy: BigDecimal = allocations.clone().map(|a| &a.night_energy).sum();
    let day_cost: BigDecimal = allocations.clone().map(|a| &a.day_cost).sum();
    let night_cost: BigDecimal = allocations.clone().map(|a| &a.night_cost).sum();
    let total_cost: BigDecimal = allocations.map(|a| &a.total_cost).sum();
    if skipped > 0 {
        eprintln!("Skipped {} sessions", skipped);
    }
    eprintln!("Total energy: {:.2} kWh", &day_energy + &night_energy);
    eprintln!("Day energy: {:.2} kWh, night energy: {:.2} kWh", day_energy, night_energy);
    eprintln!("Day cost: {:.2}, night cost: {:.2}", day_cost, night_cost);
    eprintln!("Total cost: {:.2}", total_cost);
}
