//! Read RESP response exports.
//!
//! A RESP file lists one or more channels. Each channel starts with its
//! identification (`B050F03` station, `B052F04` channel, ...) followed by
//! blocks of response fields, one blockette per block, each introduced by a
//! comment box drawn with `+` separator lines:
//!
//! ```text
//! B053F04     Stage sequence number:                 1
//! B053F10-13     0  +0.00000E+00  +0.00000E+00  +0.00000E+00  +0.00000E+00
//! ```
//!
//! Scalar fields carry a label ending in `:` followed by the value; table
//! rows (`F10-13`) carry an index followed by whitespace-separated values.
//! Stages are built directly from the fields with the same assembly rules
//! as the SEED decoder.

use log::{debug, info};

use crate::model::{Channel, Document, Network, Station, StationPath, Unit, UnitId};
use crate::response::{
    Calibration, Coefficient, Coefficients, Corner, Decimation, Fir, Gain, GenericResponse,
    PoleZero, PolesZeros, Polynomial, ResponseList, ResponseListElement, StageAssembler,
    StageFragment, StageKind,
};
use crate::time::NanoTime;
use crate::types::{
    ApproximationType, CfTransferFunction, FrequencyUnits, PzTransferFunction, Symmetry,
};
use crate::warning::Warning;
use crate::{MetadataError, Result};

/// A `B<blockette>F<field>` tag. Table rows may name a field range such
/// as `F10-13`; only the first field is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tag {
    blockette: u16,
    field: u8,
}

fn parse_tag(token: &str) -> Option<Tag> {
    let rest = token.strip_prefix('B')?;
    let (blockette, fields) = rest.split_once('F')?;
    if blockette.len() != 3 || !blockette.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let field = match fields.split_once('-') {
        Some((first, last)) => {
            last.parse::<u8>().ok()?;
            first
        }
        None => fields,
    };
    Some(Tag {
        blockette: blockette.parse().ok()?,
        field: field.parse().ok()?,
    })
}

/// True when some line of `text` starts with a `B<blockette>F<field>` tag.
pub(crate) fn looks_like_resp(text: &str) -> bool {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|token| parse_tag(token).is_some())
}

/// Scalar fields and table rows accepted for each response blockette.
fn known_fields(blockette: u16) -> Option<(&'static [u8], &'static [u8])> {
    Some(match blockette {
        53 => (&[3, 4, 5, 6, 7, 8, 9, 14], &[10, 15]),
        54 => (&[3, 4, 5, 6, 7, 10], &[8, 11]),
        55 | 56 => (&[3, 4, 5, 6], &[7]),
        57 => (&[3, 4, 5, 6, 7, 8], &[]),
        58 => (&[3, 4, 5, 6], &[7]),
        61 => (&[3, 4, 5, 6, 7, 8], &[9]),
        62 => (&[3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14], &[15]),
        _ => return None,
    })
}

fn format_error(line: usize, message: impl Into<String>) -> MetadataError {
    MetadataError::Format {
        line,
        message: message.into(),
    }
}

#[derive(Debug)]
struct Row {
    field: u8,
    line: usize,
    values: Vec<String>,
}

/// The fields of one response blockette.
#[derive(Debug)]
struct Block {
    blockette: u16,
    line: usize,
    fields: Vec<(u8, usize, String)>,
    rows: Vec<Row>,
}

impl Block {
    fn value(&self, field: u8) -> Result<(usize, &str)> {
        self.fields
            .iter()
            .find(|(f, _, _)| *f == field)
            .map(|(_, line, value)| (*line, value.as_str()))
            .ok_or_else(|| {
                format_error(
                    self.line,
                    format!("B{:03}F{field:02} is missing", self.blockette),
                )
            })
    }

    fn number(&self, field: u8) -> Result<f64> {
        let (line, value) = self.value(field)?;
        value
            .parse()
            .map_err(|_| format_error(line, format!("invalid number {value:?}")))
    }

    fn integer(&self, field: u8) -> Result<u32> {
        let (line, value) = self.value(field)?;
        value
            .parse()
            .map_err(|_| format_error(line, format!("invalid integer {value:?}")))
    }

    /// Leading code letter of a field such as `A [Laplace Transform (Rad/sec)]`.
    fn code(&self, field: u8) -> Result<char> {
        let (line, value) = self.value(field)?;
        value
            .chars()
            .next()
            .ok_or_else(|| format_error(line, "empty code field"))
    }

    fn units(&self, field: u8, doc: &mut Document) -> Result<Option<UnitId>> {
        let (_, value) = self.value(field)?;
        let (name, description) = match value.split_once(" - ") {
            Some((name, description)) => (name.trim(), Some(description.trim())),
            None => (value.trim(), None),
        };
        if name.is_empty() {
            return Ok(None);
        }
        let mut unit = Unit::new(name);
        unit.description = description.filter(|d| !d.is_empty()).map(str::to_string);
        Ok(Some(doc.units.intern(unit)))
    }

    /// Rows of a table whose count is declared in `count_field`, each
    /// holding `width` values after the row index.
    fn table(&self, count_field: u8, row_field: u8, width: usize) -> Result<Vec<Vec<f64>>> {
        let count = self.integer(count_field)? as usize;
        let rows: Vec<&Row> = self.rows.iter().filter(|r| r.field == row_field).collect();
        if rows.len() != count {
            return Err(format_error(
                self.line,
                format!(
                    "B{:03}F{count_field:02} declares {count} rows, found {}",
                    self.blockette,
                    rows.len()
                ),
            ));
        }
        rows.into_iter()
            .map(|row| {
                if row.values.len() < width + 1 {
                    return Err(format_error(
                        row.line,
                        format!("expected {} values, found {}", width + 1, row.values.len()),
                    ));
                }
                row.values[1..=width]
                    .iter()
                    .map(|v| {
                        v.parse()
                            .map_err(|_| format_error(row.line, format!("invalid number {v:?}")))
                    })
                    .collect()
            })
            .collect()
    }

    fn coefficients(&self, count_field: u8, row_field: u8) -> Result<Vec<Coefficient>> {
        Ok(self
            .table(count_field, row_field, 2)?
            .into_iter()
            .map(|row| Coefficient {
                value: row[0],
                error: row[1],
            })
            .collect())
    }

    fn poles_zeros(&self, count_field: u8, row_field: u8) -> Result<Vec<PoleZero>> {
        Ok(self
            .table(count_field, row_field, 4)?
            .into_iter()
            .map(|row| PoleZero {
                real: row[0],
                imaginary: row[1],
                real_error: row[2],
                imaginary_error: row[3],
            })
            .collect())
    }
}

/// Identification of the channel being read.
#[derive(Debug, Default)]
struct ChannelHeader {
    line: usize,
    network: String,
    station: Option<String>,
    location: String,
    channel: Option<String>,
    start: Option<NanoTime>,
    end: Option<NanoTime>,
}

/// Decode a RESP file into a document with one channel per response.
///
/// Channel coordinates are not part of RESP and are left at zero; the
/// sample rate is derived from the last decimating stage when present.
pub fn decode_resp(text: &str) -> Result<(Document, Vec<Warning>)> {
    let mut reader = RespReader::default();
    let mut last_line = 0;
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        last_line = line;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix('#') {
            if comment.trim_start().starts_with('+') {
                reader.end_block()?;
            }
            continue;
        }
        let (token, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));
        match parse_tag(token) {
            Some(tag) => reader.field(line, tag, rest)?,
            None if reader.block.is_some() => {
                return Err(format_error(line, format!("unexpected line {trimmed:?}")));
            }
            None => debug!("line {line}: ignoring header line {trimmed:?}"),
        }
    }
    let doc = reader.finish(last_line)?;
    info!("decoded RESP: {} channels", doc.channels().count());
    Ok((doc, Vec::new()))
}

#[derive(Default)]
struct RespReader {
    doc: Document,
    header: Option<ChannelHeader>,
    stages: StageAssembler,
    block: Option<Block>,
}

impl RespReader {
    fn field(&mut self, line: usize, tag: Tag, rest: &str) -> Result<()> {
        let name = format!("B{:03}F{:02}", tag.blockette, tag.field);
        if tag.blockette == 50 || tag.blockette == 52 {
            self.end_block()?;
            return self.identification(line, tag, scalar(rest));
        }
        let Some((scalars, rows)) = known_fields(tag.blockette) else {
            if self.block.is_some() {
                return Err(format_error(line, format!("unrecognized tag {name}")));
            }
            debug!("line {line}: ignoring tag {name}");
            return Ok(());
        };
        let is_row = rows.contains(&tag.field);
        if !is_row && !scalars.contains(&tag.field) {
            return Err(format_error(line, format!("unrecognized tag {name}")));
        }
        if self.header.as_ref().is_none_or(|h| h.channel.is_none()) {
            return Err(format_error(line, "response field before channel identification"));
        }
        if self.block.as_ref().is_some_and(|b| b.blockette != tag.blockette) {
            self.end_block()?;
        }
        let block = self.block.get_or_insert_with(|| Block {
            blockette: tag.blockette,
            line,
            fields: Vec::new(),
            rows: Vec::new(),
        });
        if is_row {
            block.rows.push(Row {
                field: tag.field,
                line,
                values: rest.split_whitespace().map(str::to_string).collect(),
            });
        } else {
            block.fields.push((tag.field, line, scalar(rest).to_string()));
        }
        Ok(())
    }

    fn identification(&mut self, line: usize, tag: Tag, value: &str) -> Result<()> {
        // A station line opens the next channel.
        if (tag.blockette, tag.field) == (50, 3) {
            self.flush_channel()?;
        }
        let header = self.header.get_or_insert_with(|| ChannelHeader {
            line,
            ..Default::default()
        });
        match (tag.blockette, tag.field) {
            (50, 3) => header.station = Some(value.to_string()),
            (50, 16) => header.network = value.to_string(),
            (52, 3) if value == "??" => header.location.clear(),
            (52, 3) => header.location = value.to_string(),
            (52, 4) => header.channel = Some(value.to_string()),
            (52, 22) => {
                header.start = Some(NanoTime::parse_seed(value).ok_or_else(|| {
                    format_error(line, format!("invalid start date {value:?}"))
                })?);
            }
            (52, 23) => header.end = NanoTime::parse_seed(value),
            _ => debug!("line {line}: ignoring identification field {value:?}"),
        }
        Ok(())
    }

    fn end_block(&mut self) -> Result<()> {
        let Some(block) = self.block.take() else {
            return Ok(());
        };
        let line = block.line;
        let (stage, fragment) = self.fragment(&block)?;
        self.stages
            .push(stage, fragment)
            .map_err(|message| format_error(line, message))
    }

    fn fragment(&mut self, b: &Block) -> Result<(u32, StageFragment)> {
        let doc = &mut self.doc;
        Ok(match b.blockette {
            53 => {
                let pz = PolesZeros {
                    transfer_function: PzTransferFunction::from_code(b.code(3)?)?,
                    normalization_factor: b.number(7)?,
                    normalization_frequency: b.number(8)?,
                    zeros: b.poles_zeros(9, 10)?,
                    poles: b.poles_zeros(14, 15)?,
                };
                let fragment = StageFragment::Transfer {
                    name: None,
                    input_units: b.units(5, doc)?,
                    output_units: b.units(6, doc)?,
                    kind: StageKind::PolesZeros(pz),
                };
                (b.integer(4)?, fragment)
            }
            54 => {
                let cf = Coefficients {
                    transfer_function: CfTransferFunction::from_code(b.code(3)?)?,
                    numerators: b.coefficients(7, 8)?,
                    denominators: b.coefficients(10, 11)?,
                };
                let kind = if cf.numerators.is_empty() && cf.denominators.is_empty() {
                    StageKind::GainOnly
                } else {
                    StageKind::Coefficients(cf)
                };
                let fragment = StageFragment::Transfer {
                    name: None,
                    input_units: b.units(5, doc)?,
                    output_units: b.units(6, doc)?,
                    kind,
                };
                (b.integer(4)?, fragment)
            }
            55 => {
                let elements = b
                    .table(6, 7, 5)?
                    .into_iter()
                    .map(|row| ResponseListElement {
                        frequency: row[0],
                        amplitude: row[1],
                        amplitude_error: row[2],
                        phase: row[3],
                        phase_error: row[4],
                    })
                    .collect();
                let fragment = StageFragment::Transfer {
                    name: None,
                    input_units: b.units(4, doc)?,
                    output_units: b.units(5, doc)?,
                    kind: StageKind::ResponseList(ResponseList { elements }),
                };
                (b.integer(3)?, fragment)
            }
            56 => {
                let corners = b
                    .table(6, 7, 2)?
                    .into_iter()
                    .map(|row| Corner {
                        frequency: row[0],
                        slope: row[1],
                    })
                    .collect();
                let fragment = StageFragment::Transfer {
                    name: None,
                    input_units: b.units(4, doc)?,
                    output_units: b.units(5, doc)?,
                    kind: StageKind::Generic(GenericResponse { corners }),
                };
                (b.integer(3)?, fragment)
            }
            57 => {
                let decimation = Decimation {
                    input_sample_rate: b.number(4)?,
                    factor: b.integer(5)?,
                    offset: b.integer(6)?,
                    delay: b.number(7)?,
                    correction: b.number(8)?,
                };
                (b.integer(3)?, StageFragment::Decimation(decimation))
            }
            58 => {
                let mut gain = Gain::new(b.number(4)?, b.number(5)?);
                let count = b.integer(6)? as usize;
                let rows: Vec<&Row> = b.rows.iter().filter(|r| r.field == 7).collect();
                if rows.len() != count {
                    return Err(format_error(
                        b.line,
                        format!("B058F06 declares {count} calibrations, found {}", rows.len()),
                    ));
                }
                for row in rows {
                    let [_, value, frequency, time, ..] = row.values.as_slice() else {
                        return Err(format_error(row.line, "incomplete calibration row"));
                    };
                    let number = |v: &String| {
                        v.parse::<f64>()
                            .map_err(|_| format_error(row.line, format!("invalid number {v:?}")))
                    };
                    gain.calibrations.push(Calibration {
                        value: number(value)?,
                        frequency: number(frequency)?,
                        time: NanoTime::parse_seed(time),
                    });
                }
                (b.integer(3)?, StageFragment::Gain(gain))
            }
            61 => {
                let coefficients = b.table(8, 9, 1)?.into_iter().map(|row| row[0]).collect();
                let (_, name) = b.value(4)?;
                let fragment = StageFragment::Transfer {
                    name: (!name.is_empty()).then(|| name.to_string()),
                    input_units: b.units(6, doc)?,
                    output_units: b.units(7, doc)?,
                    kind: StageKind::Fir(Fir {
                        symmetry: Symmetry::from_code(b.code(5)?)?,
                        coefficients,
                    }),
                };
                (b.integer(3)?, fragment)
            }
            _ => {
                let polynomial = Polynomial {
                    approximation: ApproximationType::from_code(b.code(7)?)?,
                    frequency_units: FrequencyUnits::from_code(b.code(8)?)?,
                    frequency_lower: b.number(9)?,
                    frequency_upper: b.number(10)?,
                    approximation_lower: b.number(11)?,
                    approximation_upper: b.number(12)?,
                    maximum_error: b.number(13)?,
                    coefficients: b.coefficients(14, 15)?,
                };
                let fragment = StageFragment::Transfer {
                    name: None,
                    input_units: b.units(5, doc)?,
                    output_units: b.units(6, doc)?,
                    kind: StageKind::Polynomial(polynomial),
                };
                (b.integer(4)?, fragment)
            }
        })
    }

    /// Add the channel read so far, with its response, to the document.
    fn flush_channel(&mut self) -> Result<()> {
        let Some(header) = self.header.take() else {
            return Ok(());
        };
        let stages = std::mem::take(&mut self.stages);
        let (Some(station_code), Some(channel_code)) = (header.station, header.channel) else {
            return Err(format_error(
                header.line,
                "channel identification needs B050F03 and B052F04",
            ));
        };
        let start = header
            .start
            .ok_or_else(|| format_error(header.line, "channel has no start date (B052F22)"))?;

        let mut channel = Channel::new(&channel_code, &header.location, start);
        channel.end_date = header.end;
        if !stages.is_empty() {
            let response = stages.finish();
            channel.sample_rate = response.output_sample_rate().unwrap_or(0.0);
            channel.signal_units = response
                .sensitivity
                .as_ref()
                .and_then(|s| s.input_units)
                .or_else(|| response.chain_units().0);
            channel.response = Some(response);
        }

        let network = match self
            .doc
            .networks()
            .iter()
            .position(|n| n.code == header.network)
        {
            Some(index) => index,
            None => self.doc.add_network(Network::new(&header.network)),
        };
        let station = self
            .doc
            .network(network)
            .and_then(|n| n.stations().iter().position(|s| s.code == station_code));
        let path = match station {
            Some(station) => StationPath { network, station },
            None => self
                .doc
                .add_station(network, Station::new(&station_code, start))?,
        };
        debug!(
            "RESP channel {}.{station_code}.{}.{channel_code}",
            header.network, header.location
        );
        self.doc.add_channel(path, channel)?;
        Ok(())
    }

    fn finish(mut self, last_line: usize) -> Result<Document> {
        self.end_block()?;
        self.flush_channel()?;
        if self.doc.channels().next().is_none() {
            return Err(format_error(last_line, "no channel response found"));
        }
        Ok(self.doc)
    }
}

/// Value of a `Label:   value` field.
fn scalar(rest: &str) -> &str {
    rest.split_once(':').map_or(rest, |(_, value)| value).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = include_str!("../tests/data/sample.resp");

    #[test]
    fn test_parse_tag() {
        assert_eq!(
            parse_tag("B053F10-13"),
            Some(Tag {
                blockette: 53,
                field: 10
            })
        );
        assert_eq!(
            parse_tag("B061F09"),
            Some(Tag {
                blockette: 61,
                field: 9
            })
        );
        assert_eq!(parse_tag("B53F03"), None);
        assert_eq!(parse_tag("Station:"), None);
    }

    #[test]
    fn test_sample_channel() {
        let (doc, warnings) = decode_resp(SAMPLE).unwrap();
        assert!(warnings.is_empty());
        let c = doc.find_channel("XX", "TEST", "00", "BHZ").unwrap();
        assert_eq!(c.channel.start_date, NanoTime::from_day(2020, 1));
        assert_eq!(c.channel.end_date, None);
        assert_eq!(c.channel.sample_rate, 20.0);

        let response = c.channel.response.as_ref().unwrap();
        let kinds: Vec<&str> = response.stages().iter().map(|s| s.kind.name()).collect();
        assert_eq!(kinds.len(), 3);
        assert!(response.is_numbered_contiguously());
        match &response.stages()[0].kind {
            StageKind::PolesZeros(pz) => {
                assert_eq!(pz.zeros.len(), 2);
                assert_eq!(pz.poles[1].imaginary, -0.037);
            }
            other => panic!("unexpected stage kind {other:?}"),
        }
        match &response.stages()[2].kind {
            StageKind::Fir(fir) => {
                assert_eq!(fir.symmetry, Symmetry::None);
                assert_eq!(fir.coefficients, vec![0.25, 0.5, 0.25]);
            }
            other => panic!("unexpected stage kind {other:?}"),
        }
        assert_eq!(response.stages()[2].name.as_deref(), Some("FIR_3"));
        assert_eq!(response.stages()[1].gain.as_ref().unwrap().value, 419430.0);

        let sensitivity = response.sensitivity.as_ref().unwrap();
        assert_eq!(sensitivity.value, 629145000.0);
        assert_eq!(doc.units.name(sensitivity.input_units.unwrap()), "M/S");
        assert_eq!(doc.units.name(sensitivity.output_units.unwrap()), "COUNTS");
        assert_eq!(c.channel.signal_units, sensitivity.input_units);
        let volts = response.stages()[0].output_units.unwrap();
        assert_eq!(
            doc.units.get(volts).unwrap().description.as_deref(),
            Some("Volts")
        );
    }

    #[test]
    fn test_unknown_tag_in_stage_is_an_error() {
        let text = SAMPLE.replace(
            "B053F08     Normalization frequency:",
            "B053F99     Mystery field:          1\nB053F08     Normalization frequency:",
        );
        match decode_resp(&text) {
            Err(MetadataError::Format { line, message }) => {
                assert_eq!(line, 22);
                assert!(message.contains("B053F99"));
            }
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_header_lines_are_ignored() {
        let text = format!("B001F01     Generated by:  some tool\nfree text\n{SAMPLE}");
        let (doc, _) = decode_resp(&text).unwrap();
        assert_eq!(doc.channels().count(), 1);
    }

    #[test]
    fn test_row_count_mismatch() {
        let text = SAMPLE.replace(
            "B053F14     Number of poles:                       2",
            "B053F14     Number of poles:                       3",
        );
        assert!(matches!(
            decode_resp(&text),
            Err(MetadataError::Format { .. })
        ));
    }

    #[test]
    fn test_generic_response_block() {
        let generic = "\
#
B056F03     Stage sequence number:                 4
B056F04     Response in units lookup:              COUNTS - Digital Counts
B056F05     Response out units lookup:             COUNTS - Digital Counts
B056F06     Number of corners:                     2
#              i  frequency     slope
B056F07-08     0  +1.00000E-02  +2.00000E+01
B056F07-08     1  +8.00000E+00  -1.20000E+02
#
B058F03     Stage sequence number:                 0";
        let text = SAMPLE.replacen("#\nB058F03     Stage sequence number:                 0", generic, 1);
        let (doc, warnings) = decode_resp(&text).unwrap();
        assert!(warnings.is_empty());
        let c = doc.find_channel("XX", "TEST", "00", "BHZ").unwrap();
        let response = c.channel.response.as_ref().unwrap();
        assert_eq!(response.stages().len(), 4);
        match &response.stages()[3].kind {
            StageKind::Generic(g) => {
                assert_eq!(g.corners.len(), 2);
                assert_eq!(g.corners[1].frequency, 8.0);
                assert_eq!(g.corners[1].slope, -120.0);
            }
            other => panic!("unexpected stage kind {other:?}"),
        }
    }

    #[test]
    fn test_two_channels_share_a_station() {
        let second = SAMPLE.replace("B052F04     Channel:     BHZ", "B052F04     Channel:     BHN");
        let (doc, _) = decode_resp(&format!("{SAMPLE}{second}")).unwrap();
        assert_eq!(doc.networks().len(), 1);
        assert_eq!(doc.networks()[0].stations().len(), 1);
        assert_eq!(doc.channels().count(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            decode_resp("# nothing here\n"),
            Err(MetadataError::Format { line: 1, .. })
        ));
    }
}
