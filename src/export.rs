use crate::rate_calculator::Allocation;
use crate::session_data::SessionRecord;
use bigdecimal::{BigDecimal, RoundingMode};
use csv::StringRecord;
use std::io::Write;
use std::iter;

/// Columns appended to every input row.
pub const ALLOCATION_HEADERS: [&str; 7] = [
    "Daguren",
    "Nachturen",
    "Verbruik_dag",
    "Verbruik_nacht",
    "Kost_dag",
    "Kost_nacht",
    "Totale_kost",
];

/// Writes the original rows, in the given order, each followed by its allocation.
pub fn write_enriched<'a>(
    writer: impl Write,
    delimiter: u8,
    headers: &StringRecord,
    rows: impl IntoIterator<Item = (&'a SessionRecord, &'a Allocation)>,
) -> csv::Result<()> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_writer(writer);
    csv_writer.write_record(headers.iter().chain(ALLOCATION_HEADERS))?;
    for (record, allocation) in rows {
        let computed = [
            fixed(&allocation.day_hours, 2),
            fixed(&allocation.night_hours, 2),
            fixed(&allocation.day_energy, 4),
            fixed(&allocation.night_energy, 4),
            fixed(&allocation.day_cost, 2),
            fixed(&allocation.night_cost, 2),
            fixed(&allocation.total_cost, 2),
        ];
        // Short rows are padded so the computed values stay under their own headers.
        let padding = headers.len().saturating_sub(record.fields.len());
        csv_writer.write_record(
            record
                .fields
                .iter()
                .chain(iter::repeat_n("", padding))
                .chain(computed.iter().map(String::as_str)),
        )?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn fixed(value: &BigDecimal, scale: i64) -> String {
    value.with_scale_round(scale, RoundingMode::HalfUp).to_plain_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_calculator::allocate;
    use crate::session_data::{ReadOptions, read_sessions};
    use crate::tariff::{Quarter, TariffConfig};
    use std::str::FromStr;

    #[test]
    fn test_fixed() {
        let third = BigDecimal::from(1) / BigDecimal::from(3);
        assert_eq!(fixed(&third, 4), "0.3333");
        assert_eq!(fixed(&BigDecimal::from(2), 2), "2.00");
        assert_eq!(fixed(&BigDecimal::from_str("79.775").unwrap(), 2), "79.78");
    }

    fn enrich(input: &str, options: &ReadOptions) -> Vec<String> {
        let table = read_sessions(input.as_bytes(), options).unwrap();
        let (day_rate, night_rate) = Quarter::Q2.rates();
        let tariff = TariffConfig::new(day_rate, night_rate, Default::default()).unwrap();
        let records: Vec<_> = table.rows.into_iter().map(Result::unwrap).collect();
        let allocations: Vec<_> = records
            .iter()
            .map(|record| allocate(&record.session, &tariff).unwrap())
            .collect();

        let mut output = Vec::new();
        let rows = records.iter().zip(&allocations);
        write_enriched(&mut output, options.delimiter, &table.headers, rows).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_short_rows_are_padded() {
        let input = "\
Sessie gestart,Sessie beëindigd,Verbruik,Opmerking
2024-04-01 06:00,2024-04-01 08:00,4
2024-04-06 10:00,2024-04-06 12:00,2,thuis
";
        let lines = enrich(input, &ReadOptions::default());
        let widths: Vec<_> = lines.iter().map(|line| line.split(',').count()).collect();
        assert_eq!(widths, vec![11, 11, 11]);
        assert_eq!(
            lines[1],
            "2024-04-01 06:00,2024-04-01 08:00,4,,1.00,1.00,2.0000,2.0000,79.78,78.44,158.22"
        );
        assert!(lines[2].starts_with("2024-04-06 10:00,2024-04-06 12:00,2,thuis,0.00,2.00,"));
    }

    #[test]
    fn test_original_columns_are_kept() {
        let input = "\
Laadpaal;Sessie gestart;Sessie beëindigd;Verbruik
Oprit;2024-04-01 06:00;2024-04-01 08:00;4
Straat;2024-04-06 10:00;2024-04-06 12:00;2
";
        let options = ReadOptions {
            delimiter: b';',
            ..ReadOptions::default()
        };
        let lines = enrich(input, &options);
        assert_eq!(
            lines,
            vec![
                "Laadpaal;Sessie gestart;Sessie beëindigd;Verbruik;Daguren;Nachturen;\
                 Verbruik_dag;Verbruik_nacht;Kost_dag;Kost_nacht;Totale_kost",
                "Oprit;2024-04-01 06:00;2024-04-01 08:00;4;\
                 1.00;1.00;2.0000;2.0000;79.78;78.44;158.22",
                "Straat;2024-04-06 10:00;2024-04-06 12:00;2;\
                 0.00;2.00;0.0000;2.0000;0.00;78.44;78.44",
            ]
        );
    }
}
