//! Encode a [`Document`] as a dataless SEED volume.
//!
//! The main entry points are [`encode_seed()`] and
//! [`encode_seed_with_warnings()`]. The volume is laid out as a
//! `V` stream (blockettes 010 and 011), an `A` stream holding the rebuilt
//! abbreviation dictionary, one `S` stream per station and, when preserved
//! time-span blockettes exist, a `T` stream. Every stream starts a new
//! logical record; the following records of a stream carry the `*`
//! continuation flag and the last one is padded with spaces.
//!
//! Responses are always written inline (053-062). Dictionary keys are
//! assigned in first-seen order, so encoding the same document twice gives
//! identical bytes. A document decoded from dataless SEED without warnings
//! and left unchanged is written as the original bytes when the record
//! length is the same, dictionary layout included.
//!
//! Numbers are limited by their SEED masks: coordinates to 6 decimals,
//! response values to 6 significant digits and FIR coefficients to 8. A
//! value that does not survive its mask is written rounded and reported as
//! [`Warning::PrecisionLoss`].

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::blockette::{
    FieldWriter, HEADER_LEN, MAX_BLOCKETTE_LEN, write_coefficients, write_decimation,
    write_fir_coefficients, write_gain, write_generic, write_poles_zeros, write_polynomial,
    write_response_list,
};
use crate::config::SeedConfig;
use crate::dictionary::DictionaryBuilder;
use crate::model::{
    Channel, Comment, Document, Equipment, Network, OpaqueBlockette, Station, UnitId,
};
use crate::reader::RECORD_HEADER_LEN;
use crate::response::{GenericResponse, Response, ResponseList, StageKind};
use crate::types::Format;
use crate::warning::Warning;
use crate::{MetadataError, Result};

/// Format version written in blockette 010.
pub const SEED_VERSION: &str = "02.4";

// Items per blockette when a list is split to stay under 9999 bytes.
const FIR_CHUNK: usize = 700;
const COEFFICIENT_CHUNK: usize = 400;
const CORNER_CHUNK: usize = 400;
const RESPONSE_LIST_CHUNK: usize = 160;
const STATIONS_PER_INDEX: usize = 900;

/// Encode a document as a dataless SEED volume.
///
/// The document is written as is; run the [`Validator`](crate::Validator)
/// first to catch problems that would make the volume unreadable.
pub fn encode_seed(doc: &Document, config: &SeedConfig) -> Result<Vec<u8>> {
    encode_seed_with_warnings(doc, config).map(|(bytes, _)| bytes)
}

/// Encode a document as a dataless SEED volume and report what the
/// volume cannot carry: [`Warning::NotRepresentable`] for StationXML-only
/// content and [`Warning::PrecisionLoss`] for rounded numbers.
pub fn encode_seed_with_warnings(
    doc: &Document,
    config: &SeedConfig,
) -> Result<(Vec<u8>, Vec<Warning>)> {
    let exponent = config.record_length_exponent()?;
    info!(
        "encoding {} stations as dataless SEED with {}-byte records",
        doc.stations().count(),
        1usize << exponent
    );
    let mut warnings = unwritable(doc);
    let bytes = encode_volume(doc, exponent, &mut warnings)?;
    if doc.source.is_from(Format::Seed) {
        if let Some(original) = doc.source.whole(&bytes) {
            debug!("volume unchanged since read; writing the original bytes");
            return Ok((original.to_vec(), warnings));
        }
    }
    Ok((bytes, warnings))
}

/// Fingerprint the canonical encoding of a freshly decoded volume so an
/// unchanged document is written back as read.
pub(crate) fn seal_source(doc: &mut Document, record_length: usize) {
    let config = SeedConfig { record_length };
    let sealed = config
        .record_length_exponent()
        .and_then(|exponent| encode_volume(doc, exponent, &mut Vec::new()));
    match sealed {
        Ok(bytes) => doc.source.seal(&bytes, None),
        Err(err) => {
            debug!("volume cannot be re-encoded as read: {err}");
            doc.source.clear();
        }
    }
}

fn encode_volume(doc: &Document, exponent: u8, warnings: &mut Vec<Warning>) -> Result<Vec<u8>> {
    let record_length = 1usize << exponent;
    let mut encoder = SeedEncoder::new(doc);
    let mut stations = Vec::new();
    for s in doc.stations() {
        let blockettes = encoder.station(s.network, s.station)?;
        stations.push((s.station.code.as_str(), blockettes));
    }

    let mut extra_volume = Vec::new();
    let mut abbreviations = encoder.dict.blockettes()?;
    let mut time_spans = Vec::new();
    for b in &doc.blockettes {
        match b.record_type {
            'V' => extra_volume.push(opaque(b)?),
            'A' => abbreviations.push(opaque(b)?),
            'T' => time_spans.push(opaque(b)?),
            other => warn!(
                "blockette {:03} from a '{other}' record has no place in the volume and is omitted",
                b.blockette_type
            ),
        }
    }

    // The station index has the same size whatever the sequence numbers.
    warnings.append(&mut encoder.warnings);
    let data_len = record_length - RECORD_HEADER_LEN;
    let placeholder: Vec<(&str, u32)> = stations.iter().map(|(code, _)| (*code, 0)).collect();
    let mut sequence = record_count(&volume_header(doc, exponent, &placeholder)?, data_len)
        + record_count(&extra_volume, data_len)
        + record_count(&abbreviations, data_len)
        + 1;
    let mut index = Vec::with_capacity(stations.len());
    for (code, blockettes) in &stations {
        index.push((*code, sequence));
        sequence += record_count(blockettes, data_len);
    }
    let mut volume = volume_header(doc, exponent, &index)?;
    volume.extend(extra_volume);

    let mut out = Vec::new();
    let mut sequence = 1;
    sequence += pack(&mut out, &volume, 'V', sequence, record_length);
    sequence += pack(&mut out, &abbreviations, 'A', sequence, record_length);
    for (code, blockettes) in &stations {
        debug!("station {code} starts at record {sequence}");
        sequence += pack(&mut out, blockettes, 'S', sequence, record_length);
    }
    pack(&mut out, &time_spans, 'T', sequence, record_length);
    Ok(out)
}

/// Number of records a stream of blockettes occupies.
fn record_count(blockettes: &[Vec<u8>], data_len: usize) -> u32 {
    let total: usize = blockettes.iter().map(Vec::len).sum();
    total.div_ceil(data_len) as u32
}

/// Write one stream of blockettes as consecutive records; returns the
/// number of records written.
fn pack(
    out: &mut Vec<u8>,
    blockettes: &[Vec<u8>],
    record_type: char,
    first_sequence: u32,
    record_length: usize,
) -> u32 {
    let data = blockettes.concat();
    let data_len = record_length - RECORD_HEADER_LEN;
    let mut written = 0;
    for (i, chunk) in data.chunks(data_len).enumerate() {
        let flag = if i == 0 { ' ' } else { '*' };
        let sequence = (first_sequence + written) % 1_000_000;
        out.extend_from_slice(format!("{sequence:06}{record_type}{flag}").as_bytes());
        out.extend_from_slice(chunk);
        out.resize(out.len() + data_len - chunk.len(), b' ');
        written += 1;
    }
    written
}

fn volume_header(doc: &Document, exponent: u8, index: &[(&str, u32)]) -> Result<Vec<Vec<u8>>> {
    let info = &doc.info;
    let mut w = FieldWriter::new(10);
    w.text("format version", SEED_VERSION, 4)?;
    w.int("logical record length", exponent, 2)?;
    w.time(info.span_start);
    w.time(info.span_end);
    w.time(info.created);
    w.variable(&info.source, 80);
    w.variable(info.label.as_deref().unwrap_or(""), 80);
    let mut out = vec![w.finish()?];

    for chunk in index.chunks(STATIONS_PER_INDEX) {
        let mut w = FieldWriter::new(11);
        w.count("number of stations", chunk.len(), 3)?;
        for (code, sequence) in chunk {
            w.text("station identifier code", code, 5)?;
            w.int("sequence number of station header", sequence % 1_000_000, 6)?;
        }
        out.push(w.finish()?);
    }
    Ok(out)
}

fn opaque(b: &OpaqueBlockette) -> Result<Vec<u8>> {
    let total = HEADER_LEN + b.body.len();
    if total > MAX_BLOCKETTE_LEN {
        return Err(MetadataError::FieldOverflow {
            blockette: b.blockette_type,
            field: "length",
            value: total.to_string(),
        });
    }
    let mut out = format!("{:03}{total:04}", b.blockette_type).into_bytes();
    out.extend_from_slice(&b.body);
    Ok(out)
}

/// Collects the parts of a document that dataless SEED cannot carry.
#[derive(Default)]
struct Unwritable {
    warnings: Vec<Warning>,
}

impl Unwritable {
    fn check(&mut self, location: &str, present: bool, what: &str) {
        if present {
            warn!("{location}: {what} cannot be written to dataless SEED");
            self.warnings.push(Warning::NotRepresentable {
                location: location.to_string(),
                what: what.to_string(),
                format: "dataless SEED",
            });
        }
    }

    fn extensions(&mut self, location: &str, count: usize) {
        self.check(location, count > 0, &format!("{count} extension elements"));
    }
}

fn unwritable(doc: &Document) -> Vec<Warning> {
    let mut u = Unwritable::default();
    u.extensions("document", doc.extensions.len());
    for network in doc.networks() {
        let at = network.code.as_str();
        u.check(at, network.stations().is_empty(), "network without stations");
        u.check(
            at,
            network.start_date.is_some() || network.end_date.is_some(),
            "network dates",
        );
        u.check(at, !network.comments.is_empty(), "network comments");
        u.check(at, !network.details.is_empty(), "network attributes");
        u.check(at, !network.operators.is_empty(), "operators");
        u.extensions(at, network.extensions.len());
        for station in network.stations() {
            let at = format!("{}.{}", network.code, station.code);
            u.check(&at, station.description.is_some(), "station description");
            u.check(&at, !station.site.is_empty(), "site address");
            u.check(&at, !station.details.is_empty(), "station attributes");
            u.check(
                &at,
                station.vault.is_some() || station.geology.is_some(),
                "vault and geology",
            );
            u.check(&at, !station.equipment.is_empty(), "station equipment");
            u.check(&at, !station.operators.is_empty(), "operators");
            u.check(
                &at,
                !station.external_references.is_empty(),
                "external references",
            );
            u.extensions(&at, station.extensions.len());
            for channel in station.channels() {
                let at = format!("{at}.{}.{}", channel.location_code, channel.code);
                let sensor = Equipment {
                    description: None,
                    ..channel.sensor.clone()
                };
                u.check(&at, !sensor.is_empty(), "sensor details");
                u.check(&at, !channel.pre_amplifier.is_empty(), "pre-amplifier");
                u.check(&at, !channel.data_logger.is_empty(), "data logger");
                u.check(&at, !channel.equipment.is_empty(), "channel equipment");
                u.check(&at, !channel.details.is_empty(), "channel attributes");
                u.check(&at, channel.water_level.is_some(), "water level");
                u.check(&at, channel.sample_rate_ratio.is_some(), "sample rate ratio");
                u.check(
                    &at,
                    !channel.external_references.is_empty(),
                    "external references",
                );
                u.extensions(&at, channel.extensions.len());
                if let Some(response) = &channel.response {
                    u.check(
                        &at,
                        response.instrument_polynomial.is_some(),
                        "instrument polynomial",
                    );
                    u.extensions(&at, response.extensions.len());
                    for stage in response.stages() {
                        u.extensions(
                            &format!("{at} stage {}", stage.number),
                            stage.extensions.len() + stage.filter_extensions.len(),
                        );
                    }
                }
            }
        }
    }
    u.warnings
}

struct SeedEncoder {
    dict: DictionaryBuilder,
    units: HashMap<UnitId, u32>,
    /// Station or channel being written, for warnings.
    location: String,
    warnings: Vec<Warning>,
}

impl SeedEncoder {
    /// Register units in canonical order: referenced units first, then the
    /// rest of the table.
    fn new(doc: &Document) -> Self {
        let mut dict = DictionaryBuilder::new();
        let mut units = HashMap::new();
        let all = doc.units.iter().map(|(id, _)| id);
        for id in doc.unit_refs().into_iter().chain(all) {
            if units.contains_key(&id) {
                continue;
            }
            if let Some(unit) = doc.units.get(id) {
                units.insert(id, dict.unit_key(unit));
            }
        }
        dict.cited_sources(&doc.cited_sources);
        Self {
            dict,
            units,
            location: String::new(),
            warnings: Vec::new(),
        }
    }

    /// Finish a blockette, reporting the numbers its masks rounded.
    fn finish(&mut self, mut w: FieldWriter) -> Result<Vec<u8>> {
        for loss in w.take_losses() {
            warn!(
                "{}: blockette {:03} {} {} written as {}",
                self.location,
                w.blockette(),
                loss.field,
                loss.value,
                loss.written
            );
            self.warnings.push(Warning::PrecisionLoss {
                location: self.location.clone(),
                blockette: w.blockette(),
                field: loss.field,
                value: loss.value,
                written: loss.written,
            });
        }
        w.finish()
    }

    fn unit_key(&self, id: Option<UnitId>) -> u32 {
        id.and_then(|id| self.units.get(&id).copied()).unwrap_or(0)
    }

    fn abbreviation_key(&mut self, text: Option<&str>) -> u32 {
        text.map_or(0, |t| self.dict.abbreviation_key(t))
    }

    fn station(&mut self, network: &Network, station: &Station) -> Result<Vec<Vec<u8>>> {
        let at = format!("{}.{}", network.code, station.code);
        self.location = at.clone();
        let network_key = self.abbreviation_key(network.description.as_deref());
        let mut w = FieldWriter::new(50);
        w.text("station call letters", &station.code, 5)?;
        w.decimal("latitude", station.latitude, 10, 6, true)?;
        w.decimal("longitude", station.longitude, 11, 6, true)?;
        w.decimal("elevation", station.elevation, 7, 1, true)?;
        w.count("number of channels", station.channels().len(), 4)?;
        w.count("number of station comments", station.comments.len(), 3)?;
        w.variable(&station.site_name, 60);
        w.int("network identifier code", network_key, 3)?;
        w.text("32-bit word order", "3210", 4)?;
        w.text("16-bit word order", "10", 2)?;
        w.time(Some(station.start_date));
        w.time(station.end_date);
        w.char('N');
        w.text("network code", &network.code, 2)?;

        let mut out = vec![self.finish(w)?];
        for comment in &station.comments {
            out.push(self.comment(51, 'S', comment)?);
        }
        for b in &station.blockettes {
            out.push(opaque(b)?);
        }
        for channel in station.channels() {
            self.location = format!("{at}.{}.{}", channel.location_code, channel.code);
            self.channel(channel, &mut out)?;
        }
        Ok(out)
    }

    fn comment(&mut self, blockette: u16, class: char, comment: &Comment) -> Result<Vec<u8>> {
        let key = self.dict.comment_key(class, &comment.value);
        let mut w = FieldWriter::new(blockette);
        w.time(comment.begin);
        w.time(comment.end);
        w.int("comment code key", key, 4)?;
        w.int("comment level", 0u32, 6)?;
        self.finish(w)
    }

    fn channel(&mut self, channel: &Channel, out: &mut Vec<Vec<u8>>) -> Result<()> {
        let instrument = self.abbreviation_key(channel.sensor.description.as_deref());
        let format = match &channel.data_format {
            Some(format) => self.dict.format_key(format),
            None => 0,
        };
        let mut w = FieldWriter::new(52);
        w.text("location identifier", &channel.location_code, 2)?;
        w.text("channel identifier", &channel.code, 3)?;
        w.int("subchannel identifier", 0u32, 4)?;
        w.int("instrument identifier", instrument, 3)?;
        w.variable(channel.description.as_deref().unwrap_or(""), 30);
        w.int("units of signal response", self.unit_key(channel.signal_units), 3)?;
        w.int(
            "units of calibration input",
            self.unit_key(channel.calibration_units),
            3,
        )?;
        w.decimal("latitude", channel.latitude, 10, 6, true)?;
        w.decimal("longitude", channel.longitude, 11, 6, true)?;
        w.decimal("elevation", channel.elevation, 7, 1, true)?;
        w.decimal("local depth", channel.depth, 5, 1, false)?;
        w.decimal("azimuth", channel.azimuth.unwrap_or(0.0), 5, 1, false)?;
        w.decimal("dip", channel.dip.unwrap_or(0.0), 5, 1, true)?;
        w.int("data format identifier code", format, 4)?;
        w.int(
            "data record length",
            channel.record_length_exponent.unwrap_or(0),
            2,
        )?;
        w.exponent("sample rate", channel.sample_rate, 4, false)?;
        w.exponent("max clock drift", channel.clock_drift.unwrap_or(0.0), 4, false)?;
        w.count("number of comments", channel.comments.len(), 4)?;
        w.variable(&channel.flags, 26);
        w.time(Some(channel.start_date));
        w.time(channel.end_date);
        w.char('N');
        out.push(self.finish(w)?);

        for comment in &channel.comments {
            out.push(self.comment(59, 'C', comment)?);
        }
        if let Some(response) = &channel.response {
            self.response(channel, response, out)?;
        }
        for b in &channel.blockettes {
            out.push(opaque(b)?);
        }
        Ok(())
    }

    fn response(
        &mut self,
        channel: &Channel,
        response: &Response,
        out: &mut Vec<Vec<u8>>,
    ) -> Result<()> {
        for stage in response.stages() {
            let number = stage.number;
            let input = self.unit_key(stage.input_units);
            let output = self.unit_key(stage.output_units);
            let units = |w: &mut FieldWriter| -> Result<()> {
                w.int("stage signal input units", input, 3)?;
                w.int("stage signal output units", output, 3)
            };
            match &stage.kind {
                StageKind::PolesZeros(pz) => {
                    let mut w = FieldWriter::new(53);
                    w.char(pz.transfer_function.to_code());
                    w.int("stage sequence number", number, 2)?;
                    units(&mut w)?;
                    write_poles_zeros(&mut w, pz)?;
                    out.push(self.finish(w)?);
                }
                StageKind::Coefficients(cf) => {
                    let n = cf.numerators.len();
                    for (a, b) in chunks(n + cf.denominators.len(), COEFFICIENT_CHUNK) {
                        let mut w = FieldWriter::new(54);
                        w.char(cf.transfer_function.to_code());
                        w.int("stage sequence number", number, 2)?;
                        units(&mut w)?;
                        write_coefficients(
                            &mut w,
                            &cf.numerators[a.min(n)..b.min(n)],
                            &cf.denominators[a.max(n) - n..b.max(n) - n],
                        )?;
                        out.push(self.finish(w)?);
                    }
                }
                StageKind::ResponseList(list) => {
                    for (a, b) in chunks(list.elements.len(), RESPONSE_LIST_CHUNK) {
                        let mut w = FieldWriter::new(55);
                        w.int("stage sequence number", number, 2)?;
                        units(&mut w)?;
                        let part = ResponseList {
                            elements: list.elements[a..b].to_vec(),
                        };
                        write_response_list(&mut w, &part)?;
                        out.push(self.finish(w)?);
                    }
                }
                StageKind::Fir(fir) => {
                    for (a, b) in chunks(fir.coefficients.len(), FIR_CHUNK) {
                        let mut w = FieldWriter::new(61);
                        w.int("stage sequence number", number, 2)?;
                        w.variable(stage.name.as_deref().unwrap_or(""), 25);
                        w.char(fir.symmetry.to_code());
                        units(&mut w)?;
                        write_fir_coefficients(&mut w, &fir.coefficients[a..b])?;
                        out.push(self.finish(w)?);
                    }
                }
                StageKind::Generic(generic) => {
                    for (a, b) in chunks(generic.corners.len(), CORNER_CHUNK) {
                        let mut w = FieldWriter::new(56);
                        w.int("stage sequence number", number, 2)?;
                        units(&mut w)?;
                        let part = GenericResponse {
                            corners: generic.corners[a..b].to_vec(),
                        };
                        write_generic(&mut w, &part)?;
                        out.push(self.finish(w)?);
                    }
                }
                StageKind::Polynomial(p) => {
                    let mut w = FieldWriter::new(62);
                    w.char('P');
                    w.int("stage sequence number", number, 2)?;
                    units(&mut w)?;
                    write_polynomial(&mut w, p)?;
                    out.push(self.finish(w)?);
                }
                StageKind::GainOnly => {
                    if stage.input_units.is_some() || stage.output_units.is_some() {
                        // Units travel on an empty digital coefficients stage.
                        let mut w = FieldWriter::new(54);
                        w.char('D');
                        w.int("stage sequence number", number, 2)?;
                        units(&mut w)?;
                        write_coefficients(&mut w, &[], &[])?;
                        out.push(self.finish(w)?);
                    } else if stage.gain.is_none() && stage.decimation.is_none() {
                        return Err(MetadataError::Structure(format!(
                            "channel {}.{} stage {number} has no content to write",
                            channel.location_code, channel.code
                        )));
                    }
                }
            }
            if let Some(decimation) = &stage.decimation {
                let mut w = FieldWriter::new(57);
                w.int("stage sequence number", number, 2)?;
                write_decimation(&mut w, decimation)?;
                out.push(self.finish(w)?);
            }
            if let Some(gain) = &stage.gain {
                let mut w = FieldWriter::new(58);
                w.int("stage sequence number", number, 2)?;
                write_gain(&mut w, gain)?;
                out.push(self.finish(w)?);
            }
        }

        if let Some(sensitivity) = &response.sensitivity {
            let mut w = FieldWriter::new(58);
            w.int("stage sequence number", 0u32, 2)?;
            w.value("sensitivity", sensitivity.value)?;
            w.value("frequency", sensitivity.frequency)?;
            w.int("number of history values", 0u32, 2)?;
            out.push(self.finish(w)?);
        }
        Ok(())
    }
}

/// Split `len` items into `[start, end)` ranges of at most `size`. An empty
/// list still yields one empty range.
fn chunks(len: usize, size: usize) -> Vec<(usize, usize)> {
    if len == 0 {
        return vec![(0, 0)];
    }
    (0..len)
        .step_by(size)
        .map(|start| (start, (start + size).min(len)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_seed;
    use crate::model::Unit;
    use crate::response::{Corner, Fir, PoleZero, PolesZeros, Stage};
    use crate::time::NanoTime;
    use crate::types::{PzTransferFunction, Symmetry};

    fn config() -> SeedConfig {
        SeedConfig {
            record_length: 256,
        }
    }

    fn sample_doc() -> Document {
        let start = NanoTime::from_day(2020, 1);
        let mut doc = Document::new();
        doc.info.source = "Test".into();
        let velocity = doc
            .units
            .intern(Unit::new("M/S").with_description("Velocity in meters per second"));
        let volts = doc.units.intern(Unit::new("V"));
        let counts = doc.units.intern(Unit::new("COUNTS"));

        let pz = PolesZeros {
            transfer_function: PzTransferFunction::LaplaceRadians,
            normalization_factor: 1.0,
            normalization_frequency: 1.0,
            zeros: vec![PoleZero::new(0.0, 0.0)],
            poles: vec![
                PoleZero::new(-0.037, 0.037),
                PoleZero::new(-0.037, -0.037),
            ],
        };
        let response = Response::new()
            .with_stage(
                Stage::new(StageKind::PolesZeros(pz))
                    .with_units(velocity, volts)
                    .with_gain(1500.0, 1.0),
            )
            .with_stage(
                Stage::new(StageKind::GainOnly)
                    .with_units(volts, counts)
                    .with_gain(1.0e6, 1.0),
            )
            .with_sensitivity(1.5e9, 1.0);
        let mut channel = Channel::new("BHZ", "00", start)
            .with_coordinates(10.0, 20.0, 100.0, 0.0)
            .with_orientation(0.0, -90.0)
            .with_sample_rate(20.0)
            .with_response(response);
        channel.signal_units = Some(velocity);
        channel.clock_drift = Some(0.0);

        let net = doc.add_network(Network::new("XX").with_description("Test network"));
        let sta = doc
            .add_station(
                net,
                Station::new("TEST", start)
                    .with_coordinates(10.0, 20.0, 100.0)
                    .with_site_name("Test site"),
            )
            .unwrap();
        doc.add_channel(sta, channel).unwrap();
        doc
    }

    #[test]
    fn test_record_layout() {
        let bytes = encode_seed(&sample_doc(), &config()).unwrap();
        assert_eq!(bytes.len() % 256, 0);
        assert_eq!(&bytes[..11], b"000001V 010");
        let types: Vec<u8> = bytes.chunks(256).map(|r| r[6]).collect();
        assert_eq!(types.first(), Some(&b'V'));
        assert!(types.contains(&b'A'));
        assert_eq!(types.last(), Some(&b'S'));
        // The station index points at the first S record.
        let first_station = types.iter().position(|&t| t == b'S').unwrap() + 1;
        let text = String::from_utf8_lossy(&bytes[..256]).into_owned();
        assert!(text.contains(&format!("0110021001TEST {first_station:06}")));
    }

    #[test]
    fn test_encode_then_decode_is_lossless() {
        let doc = sample_doc();
        let bytes = encode_seed(&doc, &config()).unwrap();
        let (decoded, warnings) = decode_seed(&bytes).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(decoded, doc);
        assert_eq!(encode_seed(&decoded, &config()).unwrap(), bytes);
    }

    #[test]
    fn test_long_fir_is_split_and_rejoined() {
        let mut doc = sample_doc();
        let counts = doc.units.intern(Unit::new("COUNTS"));
        let coefficients: Vec<f64> = (0..1500).map(|i| f64::from(i) * 1.0e-4).collect();
        let fir = Stage::new(StageKind::Fir(Fir {
            symmetry: Symmetry::None,
            coefficients,
        }))
        .with_units(counts, counts)
        .with_gain(1.0, 0.0)
        .with_name("FIR_1500");
        let path = doc.channels().next().unwrap().path;
        let channel = doc.channel_mut(path).unwrap();
        let response = channel.response.as_mut().unwrap();
        response.push_stage(fir);

        // 1500 coefficients do not fit one 9999-byte blockette.
        let bytes = encode_seed(&doc, &config()).unwrap();
        let (decoded, warnings) = decode_seed(&bytes).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        let channel = decoded.channels().next().unwrap().channel;
        let stage = &channel.response.as_ref().unwrap().stages()[2];
        match &stage.kind {
            StageKind::Fir(fir) => assert_eq!(fir.coefficients.len(), 1500),
            other => panic!("unexpected stage {other:?}"),
        }
        assert_eq!(stage.name.as_deref(), Some("FIR_1500"));
    }

    #[test]
    fn test_empty_stage_is_a_structure_error() {
        let mut doc = sample_doc();
        let path = doc.channels().next().unwrap().path;
        let response = doc.channel_mut(path).unwrap().response.as_mut().unwrap();
        response.push_stage(Stage::new(StageKind::GainOnly));
        assert!(matches!(
            encode_seed(&doc, &config()),
            Err(MetadataError::Structure(_))
        ));
    }

    #[test]
    fn test_rounded_numbers_are_reported() {
        let mut doc = sample_doc();
        let path = doc.stations().next().unwrap().path;
        doc.station_mut(path).unwrap().latitude = 10.1234567;
        let (bytes, warnings) = encode_seed_with_warnings(&doc, &config()).unwrap();
        assert_eq!(
            warnings,
            vec![Warning::PrecisionLoss {
                location: "XX.TEST".into(),
                blockette: 50,
                field: "latitude",
                value: 10.1234567,
                written: 10.123457,
            }]
        );
        let (decoded, _) = decode_seed(&bytes).unwrap();
        assert_eq!(decoded.networks()[0].stations()[0].latitude, 10.123457);
    }

    #[test]
    fn test_station_xml_only_content_is_reported() {
        let mut doc = sample_doc();
        let path = doc.channels().next().unwrap().path;
        doc.channel_mut(path).unwrap().water_level = Some(12.0);
        let (_, warnings) = encode_seed_with_warnings(&doc, &config()).unwrap();
        assert_eq!(
            warnings,
            vec![Warning::NotRepresentable {
                location: "XX.TEST.00.BHZ".into(),
                what: "water level".into(),
                format: "dataless SEED",
            }]
        );
        let (_, warnings) = encode_seed_with_warnings(&sample_doc(), &config()).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_generic_stage_is_written_inline() {
        let mut doc = sample_doc();
        let counts = doc.units.intern(Unit::new("COUNTS"));
        let generic = Stage::new(StageKind::Generic(GenericResponse {
            corners: vec![
                Corner {
                    frequency: 0.01,
                    slope: 20.0,
                },
                Corner {
                    frequency: 8.0,
                    slope: -120.0,
                },
            ],
        }))
        .with_units(counts, counts)
        .with_gain(1.0, 1.0);
        let path = doc.channels().next().unwrap().path;
        let response = doc.channel_mut(path).unwrap().response.as_mut().unwrap();
        response.push_stage(generic);

        let bytes = encode_seed(&doc, &config()).unwrap();
        assert!(bytes.windows(5).any(|w| w == b"05600"));
        let (decoded, warnings) = decode_seed(&bytes).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_unchanged_volume_is_written_as_read() {
        let canonical = encode_seed(&sample_doc(), &config()).unwrap();
        // Same value, different spelling.
        let at = canonical
            .windows(10)
            .position(|w| w == b"+10.000000")
            .unwrap();
        let mut original = canonical.clone();
        original[at..at + 10].copy_from_slice(b"+010.00000");

        let (mut doc, warnings) = decode_seed(&original).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(encode_seed(&doc, &config()).unwrap(), original);

        // Another record length or any edit renders the volume again.
        let larger = SeedConfig {
            record_length: 4096,
        };
        assert_ne!(encode_seed(&doc, &larger).unwrap().len(), original.len());
        let path = doc.channels().next().unwrap().path;
        doc.channel_mut(path).unwrap().sample_rate = 40.0;
        let edited = encode_seed(&doc, &config()).unwrap();
        assert_eq!(edited.len(), canonical.len());
        assert_ne!(&edited[at..at + 10], b"+010.00000");
    }

    #[test]
    fn test_invalid_record_length() {
        let config = SeedConfig {
            record_length: 1000,
        };
        assert!(matches!(
            encode_seed(&sample_doc(), &config),
            Err(MetadataError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_chunks() {
        assert_eq!(chunks(0, 10), vec![(0, 0)]);
        assert_eq!(chunks(25, 10), vec![(0, 10), (10, 20), (20, 25)]);
    }
}
