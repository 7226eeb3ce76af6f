//! Decode a dataless SEED volume into a [`Document`].
//!
//! The main entry point is [`decode_seed()`]. Records are read with
//! [`RecordReader`](crate::reader::RecordReader), reassembled into
//! blockettes by the [`BlocketteAssembler`] and interpreted one blockette at
//! a time, so peak memory is one partial blockette plus the document.
//!
//! Damage is contained: a record whose blockettes cannot be framed or
//! parsed produces one [`Warning::MalformedRecord`] and decoding resumes at
//! the next plausible blockette header, in the same record when possible.
//! Only the station or channel owning the damaged blockette is affected.
//! Only a broken volume header or an unparseable stage kind aborts the
//! whole load.
//!
//! A volume read without warnings remembers its bytes, so writing the
//! unchanged document with the same record length reproduces it exactly.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::assembler::{AssemblyEvent, BlocketteAssembler, RawBlockette};
use crate::blockette::{
    FieldReader, read_coefficients, read_decimation, read_fir_coefficients, read_gain,
    read_generic, read_poles_zeros, read_polynomial, read_response_list,
};
use crate::dictionary::{Dictionary, ResponseEntry, is_dictionary_blockette};
use crate::encode::seal_source;
use crate::model::{
    Channel, ChannelPath, Comment, Document, Network, OpaqueBlockette, Station, StationPath,
    UnitId,
};
use crate::reader::{RecordReader, detect_record_length};
use crate::response::{Fir, StageAssembler, StageFragment, StageKind};
use crate::source::SourceText;
use crate::time::NanoTime;
use crate::types::{Format, Symmetry};
use crate::warning::Warning;
use crate::{MetadataError, Result};

/// How much of the station stream to ignore after damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Skip {
    /// Until the next channel or station.
    Channel,
    /// Until the next station.
    Station,
}

/// Decode a dataless SEED volume.
///
/// Returns the document together with the warnings raised while reading.
/// The document has not been normalized yet.
pub fn decode_seed(data: &[u8]) -> Result<(Document, Vec<Warning>)> {
    let record_length = detect_record_length(data)?;
    info!(
        "decoding dataless SEED volume: {} bytes, {record_length}-byte records",
        data.len()
    );

    let mut decoder = SeedDecoder::default();
    let mut assembler = BlocketteAssembler::new();
    for record in RecordReader::new(data, record_length) {
        match record {
            Ok(record) if record.is_control() => {
                for event in assembler.push(&record) {
                    decoder.handle(event)?;
                }
            }
            Ok(record) => decoder.skip_record(record.sequence, record.record_type),
            Err(MetadataError::MalformedRecord {
                record,
                offset,
                reason,
            }) => {
                assembler.interrupt();
                decoder.interrupted(record, offset, reason);
            }
            Err(err) => return Err(err),
        }
    }
    if let Some(event) = assembler.finish() {
        decoder.handle(event)?;
    }
    let (mut doc, warnings) = decoder.finish()?;
    if warnings.is_empty() {
        doc.source = SourceText::new(Format::Seed, Arc::from(data), 0..data.len());
        seal_source(&mut doc, record_length);
    }
    Ok((doc, warnings))
}

#[derive(Debug, Default)]
struct SeedDecoder {
    doc: Document,
    dict: Dictionary,
    warnings: Vec<Warning>,
    damaged_records: HashSet<u32>,
    skipped_types: HashSet<char>,
    volume_header: bool,
    station: Option<StationPath>,
    channel: Option<ChannelPath>,
    stages: StageAssembler,
    response_damaged: bool,
    skip: Option<Skip>,
}

impl SeedDecoder {
    fn handle(&mut self, event: AssemblyEvent) -> Result<()> {
        match event {
            AssemblyEvent::Blockette(blockette) => self.blockette(blockette),
            AssemblyEvent::Damaged {
                record,
                offset,
                blockette_type,
                reason,
            } => {
                if !self.volume_header {
                    return Err(MetadataError::MalformedRecord {
                        record,
                        offset,
                        reason,
                    });
                }
                match blockette_type {
                    // A damaged station or channel header closes the channel
                    // before it, which is complete.
                    Some(50) => {
                        self.flush_channel();
                        self.station = None;
                        self.skip = Some(Skip::Station);
                        self.malformed(record, offset, reason);
                    }
                    Some(52) if self.skip != Some(Skip::Station) => {
                        self.flush_channel();
                        self.skip = Some(Skip::Channel);
                        self.malformed(record, offset, reason);
                    }
                    _ => self.interrupted(record, offset, reason),
                }
                Ok(())
            }
        }
    }

    fn malformed(&mut self, record: u32, offset: usize, reason: String) {
        if self.damaged_records.insert(record) {
            warn!("malformed record {record} at offset {offset}: {reason}");
            self.warnings.push(Warning::MalformedRecord {
                record,
                offset,
                reason,
            });
        } else {
            debug!("further damage in record {record}: {reason}");
        }
    }

    fn interrupted(&mut self, record: u32, offset: usize, reason: String) {
        self.malformed(record, offset, reason);
        if self.channel.is_some() {
            self.response_damaged = true;
        }
    }

    fn skip_record(&mut self, record: u32, record_type: char) {
        if self.skipped_types.insert(record_type) {
            self.warnings.push(Warning::SkippedRecord {
                record,
                record_type,
            });
        }
        debug!("skipping record {record} of type '{record_type}'");
    }

    fn blockette(&mut self, b: RawBlockette) -> Result<()> {
        if !self.volume_header && !matches!(b.blockette_type, 5 | 8 | 10) {
            return Err(MetadataError::MalformedRecord {
                record: b.record,
                offset: b.record_offset,
                reason: format!(
                    "expected a volume header blockette, found {:03}",
                    b.blockette_type
                ),
            });
        }
        match self.dispatch(&b) {
            Ok(()) => Ok(()),
            // Unknown stage kinds cannot be carried through the model.
            Err(err @ MetadataError::Validation(_)) => Err(err),
            Err(err) if matches!(b.blockette_type, 5 | 8 | 10) => {
                Err(MetadataError::MalformedRecord {
                    record: b.record,
                    offset: b.record_offset,
                    reason: err.to_string(),
                })
            }
            Err(err) => {
                let skip = match b.blockette_type {
                    50 => Some(Skip::Station),
                    52 => Some(Skip::Channel),
                    53..=58 | 60..=62 => {
                        self.response_damaged = true;
                        None
                    }
                    _ => None,
                };
                if skip > self.skip {
                    self.skip = skip;
                }
                self.malformed(b.record, b.record_offset, err.to_string());
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, b: &RawBlockette) -> Result<()> {
        let t = b.blockette_type;
        match t {
            5 | 8 | 10 => self.volume(b),
            // Station index; rebuilt on write.
            11 => Ok(()),
            _ if is_dictionary_blockette(t) => self.dict.read(t, &b.body, &mut self.doc.units),
            50 => {
                self.flush_channel();
                self.station = None;
                self.skip = None;
                self.station_header(b)
            }
            _ if self.skip == Some(Skip::Station) => Ok(()),
            52 => {
                self.flush_channel();
                self.skip = None;
                self.channel_header(b)
            }
            _ if self.skip == Some(Skip::Channel) => Ok(()),
            51 => self.comment(b, false),
            59 => self.comment(b, true),
            53..=58 | 60..=62 => self.response_blockette(b),
            _ => {
                self.opaque(b);
                Ok(())
            }
        }
    }

    fn volume(&mut self, b: &RawBlockette) -> Result<()> {
        if self.volume_header {
            self.opaque(b);
            return Ok(());
        }
        let mut r = FieldReader::new(b.blockette_type, &b.body);
        let _version = r.text(4)?;
        let _exponent = r.int(2)?;
        let info = &mut self.doc.info;
        match b.blockette_type {
            10 => {
                info.span_start = r.time()?;
                info.span_end = r.time()?;
                if r.remaining() > 0 {
                    info.created = r.time()?;
                    info.source = r.variable()?;
                    let label = r.variable()?;
                    info.label = (!label.is_empty()).then_some(label);
                }
            }
            5 => {
                info.span_start = r.time()?;
                self.warnings.push(Warning::VolumeHeaderConverted { blockette_type: 5 });
            }
            _ => {
                self.warnings.push(Warning::VolumeHeaderConverted { blockette_type: 8 });
            }
        }
        self.volume_header = true;
        Ok(())
    }

    fn opaque(&mut self, b: &RawBlockette) {
        warn!(
            "preserving unknown blockette {:03} from record {}",
            b.blockette_type, b.record
        );
        self.warnings.push(Warning::UnknownBlockettePreserved {
            blockette_type: b.blockette_type,
            record: b.record,
        });
        let opaque = OpaqueBlockette {
            blockette_type: b.blockette_type,
            record_type: b.record_type,
            body: b.body.clone(),
        };
        if b.record_type == 'S' {
            if let Some(path) = self.channel {
                if let Ok(channel) = self.doc.channel_mut(path) {
                    channel.blockettes.push(opaque);
                    return;
                }
            }
            if let Some(path) = self.station {
                if let Ok(station) = self.doc.station_mut(path) {
                    station.blockettes.push(opaque);
                    return;
                }
            }
        }
        self.doc.blockettes.push(opaque);
    }

    fn location(&self) -> String {
        if let Some(path) = self.channel {
            if let (Some(station), Some(channel)) = (
                self.doc.station(path.station_path()),
                self.doc.channel(path),
            ) {
                return format!("{}.{}.{}", station.code, channel.location_code, channel.code);
            }
        }
        match self.station.and_then(|p| self.doc.station(p)) {
            Some(station) => station.code.clone(),
            None => "abbreviation dictionary".into(),
        }
    }

    fn unresolved(&mut self, dictionary: u16, key: u32) {
        let location = self.location();
        warn!("{location}: unresolved key {key} in dictionary {dictionary:03}");
        self.warnings.push(Warning::UnresolvedReference {
            location,
            dictionary,
            key,
        });
    }

    fn unit(&mut self, key: u32) -> Option<UnitId> {
        if key == 0 {
            return None;
        }
        let id = self.dict.units.get(&key).copied();
        if id.is_none() {
            self.unresolved(34, key);
        }
        id
    }

    fn abbreviation(&mut self, key: u32) -> Option<String> {
        if key == 0 {
            return None;
        }
        let text = self.dict.abbreviations.get(&key).cloned();
        if text.is_none() {
            self.unresolved(33, key);
        }
        text
    }

    fn station_header(&mut self, b: &RawBlockette) -> Result<()> {
        let mut r = FieldReader::new(50, &b.body);
        let code = r.text(5)?;
        let latitude = r.float(10)?;
        let longitude = r.float(11)?;
        let elevation = r.float(7)?;
        let _channels = r.int(4)?;
        let _comments = r.int(3)?;
        let site_name = r.variable()?;
        let network_key = r.int(3)?;
        let _word_order_32 = r.text(4)?;
        let _word_order_16 = r.text(2)?;
        let start = r.time()?;
        let end = r.time()?;
        let _update = r.char()?;
        let network_code = if r.remaining() > 0 { r.text(2)? } else { String::new() };
        r.finish()?;

        let start = start.unwrap_or_else(NanoTime::epoch);
        let mut station = Station::new(&code, start)
            .with_coordinates(latitude, longitude, elevation)
            .with_site_name(&site_name);
        station.end_date = end;

        let network = match self
            .doc
            .networks()
            .iter()
            .position(|n| n.code == network_code)
        {
            Some(index) => index,
            None => {
                let mut network = Network::new(&network_code);
                network.description = self.abbreviation(network_key);
                self.doc.add_network(network)
            }
        };
        let path = self.doc.add_station(network, station)?;
        debug!("station {network_code}.{code}");
        self.station = Some(path);
        Ok(())
    }

    fn channel_header(&mut self, b: &RawBlockette) -> Result<()> {
        let Some(station) = self.station else {
            return Err(MetadataError::InvalidField {
                blockette: 52,
                reason: "channel outside a station".into(),
            });
        };
        let mut r = FieldReader::new(52, &b.body);
        let location = r.text(2)?;
        let code = r.text(3)?;
        let _subchannel = r.int(4)?;
        let instrument = r.int(3)?;
        let description = r.variable()?;
        let signal_units = r.int(3)?;
        let calibration_units = r.int(3)?;
        let latitude = r.float(10)?;
        let longitude = r.float(11)?;
        let elevation = r.float(7)?;
        let depth = r.float(5)?;
        let azimuth = r.float(5)?;
        let dip = r.float(5)?;
        let format = r.int(4)?;
        let record_length = r.int(2)?;
        let sample_rate = r.float(10)?;
        let clock_drift = r.float(10)?;
        let _comments = r.int(4)?;
        let flags = r.variable()?;
        let start = r.time()?;
        let end = r.time()?;
        let _update = r.char()?;
        r.finish()?;

        let mut channel = Channel::new(&code, &location, start.unwrap_or_else(NanoTime::epoch))
            .with_coordinates(latitude, longitude, elevation, depth)
            .with_orientation(azimuth, dip)
            .with_sample_rate(sample_rate);
        channel.end_date = end;
        channel.clock_drift = Some(clock_drift);
        channel.flags = flags;
        channel.description = (!description.is_empty()).then_some(description);
        channel.record_length_exponent = (record_length != 0).then_some(record_length as u8);

        let path = self.doc.add_channel(station, channel)?;
        self.channel = Some(path);
        debug!("channel {}", self.location());

        let signal = self.unit(signal_units);
        let calibration = self.unit(calibration_units);
        let sensor = self.abbreviation(instrument);
        let data_format = match format {
            0 => None,
            key => {
                let found = self.dict.formats.get(&key).cloned();
                if found.is_none() {
                    self.unresolved(30, key);
                }
                found
            }
        };
        let channel = self.doc.channel_mut(path)?;
        channel.signal_units = signal;
        channel.calibration_units = calibration;
        channel.sensor.description = sensor;
        channel.data_format = data_format;
        Ok(())
    }

    fn comment(&mut self, b: &RawBlockette, channel_level: bool) -> Result<()> {
        let mut r = FieldReader::new(b.blockette_type, &b.body);
        let begin = r.time()?;
        let end = r.time()?;
        let key = r.int(4)?;
        let _level = r.int(6)?;
        r.finish()?;

        let Some(entry) = self.dict.comments.get(&key).cloned() else {
            self.unresolved(31, key);
            return Ok(());
        };
        let comment = Comment {
            value: entry.text,
            begin,
            end,
            ..Default::default()
        };
        match (channel_level, self.channel, self.station) {
            (true, Some(path), _) => self.doc.channel_mut(path)?.comments.push(comment),
            (false, _, Some(path)) => self.doc.station_mut(path)?.comments.push(comment),
            _ => {
                return Err(MetadataError::InvalidField {
                    blockette: b.blockette_type,
                    reason: "comment outside its station or channel".into(),
                });
            }
        }
        Ok(())
    }

    fn response_blockette(&mut self, b: &RawBlockette) -> Result<()> {
        if self.channel.is_none() {
            return Err(MetadataError::InvalidField {
                blockette: b.blockette_type,
                reason: "response blockette outside a channel".into(),
            });
        }
        let t = b.blockette_type;
        let mut r = FieldReader::new(t, &b.body);
        let mut fragments = Vec::new();
        match t {
            53 | 54 | 62 => {
                let code = r.char()?;
                let stage = r.int(2)?;
                let (input, output) = (r.int(3)?, r.int(3)?);
                let kind = match t {
                    53 => StageKind::PolesZeros(read_poles_zeros(&mut r, code)?),
                    // A digital stage with no coefficients carries only units.
                    54 => match read_coefficients(&mut r, code)? {
                        cf if cf.numerators.is_empty() && cf.denominators.is_empty() => {
                            StageKind::GainOnly
                        }
                        cf => StageKind::Coefficients(cf),
                    },
                    _ => StageKind::Polynomial(read_polynomial(&mut r)?),
                };
                fragments.push((stage, self.transfer(None, input, output, kind)));
            }
            55 | 56 => {
                let stage = r.int(2)?;
                let (input, output) = (r.int(3)?, r.int(3)?);
                let kind = match t {
                    55 => StageKind::ResponseList(read_response_list(&mut r)?),
                    _ => StageKind::Generic(read_generic(&mut r)?),
                };
                fragments.push((stage, self.transfer(None, input, output, kind)));
            }
            57 => {
                let stage = r.int(2)?;
                fragments.push((stage, StageFragment::Decimation(read_decimation(&mut r)?)));
            }
            58 => {
                let stage = r.int(2)?;
                fragments.push((stage, StageFragment::Gain(read_gain(&mut r)?)));
            }
            61 => {
                let stage = r.int(2)?;
                let name = r.variable()?;
                let symmetry = Symmetry::from_code(r.char()?)?;
                let (input, output) = (r.int(3)?, r.int(3)?);
                let kind = StageKind::Fir(Fir {
                    symmetry,
                    coefficients: read_fir_coefficients(&mut r)?,
                });
                let name = (!name.is_empty()).then_some(name);
                fragments.push((stage, self.transfer(name, input, output, kind)));
            }
            60 => {
                let stages = r.int(2)?;
                for _ in 0..stages {
                    let stage = r.int(2)?;
                    let count = r.int(2)?;
                    for _ in 0..count {
                        let key = r.int(4)?;
                        match self.dict.responses.get(&key).cloned() {
                            Some(entry) => fragments.push((stage, self.resolve(entry))),
                            None => {
                                self.unresolved(60, key);
                                self.response_damaged = true;
                            }
                        }
                    }
                }
            }
            _ => {
                return Err(MetadataError::InvalidField {
                    blockette: t,
                    reason: "unsupported response blockette".into(),
                });
            }
        }
        r.finish()?;
        for (stage, fragment) in fragments {
            self.stages
                .push(stage, fragment)
                .map_err(|reason| MetadataError::InvalidField { blockette: t, reason })?;
        }
        Ok(())
    }

    fn transfer(
        &mut self,
        name: Option<String>,
        input: u32,
        output: u32,
        kind: StageKind,
    ) -> StageFragment {
        StageFragment::Transfer {
            name,
            input_units: self.unit(input),
            output_units: self.unit(output),
            kind,
        }
    }

    fn resolve(&mut self, entry: ResponseEntry) -> StageFragment {
        match entry {
            ResponseEntry::Transfer {
                name,
                input,
                output,
                kind,
            } => {
                let name = (!name.is_empty()).then_some(name);
                self.transfer(name, input, output, kind)
            }
            ResponseEntry::Decimation(d) => StageFragment::Decimation(d),
            ResponseEntry::Gain(g) => StageFragment::Gain(g),
        }
    }

    /// Attach the assembled response to the channel being read.
    fn flush_channel(&mut self) {
        let stages = std::mem::take(&mut self.stages);
        let damaged = std::mem::take(&mut self.response_damaged);
        let Some(path) = self.channel else {
            return;
        };
        if damaged && !stages.is_empty() {
            warn!("{}: dropping incomplete response", self.location());
        }
        self.channel = None;
        if stages.is_empty() || damaged {
            return;
        }
        if let Ok(channel) = self.doc.channel_mut(path) {
            channel.response = Some(stages.finish());
        }
    }

    fn finish(mut self) -> Result<(Document, Vec<Warning>)> {
        self.flush_channel();
        self.doc.cited_sources = std::mem::take(&mut self.dict.cited_sources);
        if !self.volume_header {
            return Err(MetadataError::MalformedRecord {
                record: 1,
                offset: 0,
                reason: "volume has no readable header".into(),
            });
        }
        info!(
            "decoded {} networks, {} stations, {} channels with {} warnings",
            self.doc.networks().len(),
            self.doc.stations().count(),
            self.doc.channels().count(),
            self.warnings.len()
        );
        Ok((self.doc, self.warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(records: &[(&str, char, bool)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, (body, kind, continuation)) in records.iter().enumerate() {
            let flag = if *continuation { '*' } else { ' ' };
            let mut record = format!("{:06}{kind}{flag}{body}", i + 1).into_bytes();
            record.resize(256, b' ');
            out.extend(record);
        }
        out
    }

    const V: &str = "010002202.408~~~TEST~~";
    const A: &str = "0330015001Test~0340023001M/S~Velocity~0340018002COUNTS~~";

    fn station(code: &str) -> String {
        let body = format!(
            "{code:<5}+10.000000+020.000000+0100.0{}{}Site~{}{}{}2020,001~~NXX",
            "0001", "000", "001", "3210", "10"
        );
        format!("050{:04}{body}", body.len() + 7)
    }

    #[test]
    fn test_minimal_volume() {
        let s = station("TEST");
        let data = volume(&[(V, 'V', false), (A, 'A', false), (&s, 'S', false)]);
        let (doc, warnings) = decode_seed(&data).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(doc.info.source, "TEST");
        let network = &doc.networks()[0];
        assert_eq!(network.code, "XX");
        assert_eq!(network.description.as_deref(), Some("Test"));
        let station = &network.stations()[0];
        assert_eq!(station.code, "TEST");
        assert_eq!(station.latitude, 10.0);
        assert_eq!(station.start_date, NanoTime::from_day(2020, 1));
        assert_eq!(doc.units.len(), 2);
    }

    #[test]
    fn test_damaged_station_is_skipped() {
        let good = station("AAA");
        let mut bad = station("BBB");
        bad.replace_range(3..7, "0030");
        let last = station("CCC");
        let data = volume(&[
            (V, 'V', false),
            (A, 'A', false),
            (&good, 'S', false),
            (&bad, 'S', false),
            (&last, 'S', false),
        ]);
        let (doc, warnings) = decode_seed(&data).unwrap();
        let codes: Vec<&str> = doc.stations().map(|s| s.station.code.as_str()).collect();
        assert_eq!(codes, vec!["AAA", "CCC"]);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            Warning::MalformedRecord { record: 4, offset: 768, .. }
        ));
    }

    #[test]
    fn test_damaged_channel_does_not_affect_its_neighbours() {
        use crate::config::SeedConfig;
        use crate::encode::encode_seed;
        use crate::model::Unit;
        use crate::response::{Response, Stage};

        let start = NanoTime::from_day(2020, 1);
        let mut doc = Document::new();
        doc.info.source = "Test".into();
        let volts = doc.units.intern(Unit::new("V"));
        let counts = doc.units.intern(Unit::new("COUNTS"));
        let net = doc.add_network(Network::new("XX").with_description("Test"));
        let sta = doc
            .add_station(
                net,
                Station::new("TEST", start)
                    .with_coordinates(10.0, 20.0, 100.0)
                    .with_site_name("Site"),
            )
            .unwrap();
        for code in ["BHZ", "BHN", "BHE"] {
            let response = Response::new()
                .with_stage(
                    Stage::new(StageKind::GainOnly)
                        .with_units(volts, counts)
                        .with_gain(1.0e6, 1.0),
                )
                .with_sensitivity(1.0e6, 1.0);
            let mut channel = Channel::new(code, "00", start)
                .with_coordinates(10.0, 20.0, 100.0, 0.0)
                .with_orientation(0.0, -90.0)
                .with_sample_rate(20.0)
                .with_response(response);
            channel.clock_drift = Some(0.0);
            doc.add_channel(sta, channel).unwrap();
        }
        let mut data = encode_seed(&doc, &SeedConfig { record_length: 4096 }).unwrap();
        // The whole station stream sits in one record; understate BHN's length.
        let at = data
            .windows(12)
            .position(|w| w.starts_with(b"052") && w.ends_with(b"00BHN"))
            .unwrap();
        data[at + 3..at + 7].copy_from_slice(b"0030");

        let (decoded, warnings) = decode_seed(&data).unwrap();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(matches!(warnings[0], Warning::MalformedRecord { .. }));
        let channels: Vec<&Channel> = decoded.channels().map(|c| c.channel).collect();
        let codes: Vec<&str> = channels.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["BHZ", "BHE"]);
        for channel in channels {
            let response = channel.response.as_ref().unwrap();
            assert_eq!(response.stages().len(), 1);
            assert_eq!(response.sensitivity.as_ref().map(|s| s.value), Some(1.0e6));
        }
    }

    fn blockette(blockette_type: u16, body: &str) -> String {
        format!("{blockette_type:03}{:04}{body}", body.len() + 7)
    }

    #[test]
    fn test_dictionary_response_and_cited_source() {
        let dictionary = format!(
            "{A}{}{}",
            blockette(32, "01Manual~2001~Streckeisen~"),
            blockette(46, "0005Corners~0010020001+1.00000E-02+2.00000E+01"),
        );
        let channel = blockette(
            52,
            "00BHZ0000000~002000+10.000000+020.000000+0100.0000.0000.0-90.0000000\
             2.0000E+010.0000E+000000~2020,001~~N",
        );
        let stations = format!(
            "{}{channel}{}{}",
            station("TEST"),
            blockette(60, "01010005"),
            blockette(58, "01+1.00000E+00+1.00000E+0000"),
        );
        let data = volume(&[
            (V, 'V', false),
            (&dictionary, 'A', false),
            (&stations, 'S', false),
        ]);
        let (doc, warnings) = decode_seed(&data).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(doc.cited_sources.len(), 1);
        assert_eq!(doc.cited_sources[0].key, 1);
        assert_eq!(doc.cited_sources[0].publisher, "Streckeisen");

        let channel = doc.channels().next().unwrap().channel;
        let stages = channel.response.as_ref().unwrap().stages();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].name.as_deref(), Some("Corners"));
        assert_eq!(stages[0].gain.as_ref().map(|g| g.value), Some(1.0));
        let input = stages[0].input_units.and_then(|id| doc.units.get(id));
        assert_eq!(input.map(|u| u.name.as_str()), Some("M/S"));
        match &stages[0].kind {
            StageKind::Generic(generic) => {
                assert_eq!(generic.corners.len(), 1);
                assert_eq!(generic.corners[0].frequency, 0.01);
                assert_eq!(generic.corners[0].slope, 20.0);
            }
            other => panic!("unexpected stage {other:?}"),
        }

        // Written back unchanged, the dictionary references survive.
        let config = crate::config::SeedConfig {
            record_length: 256,
        };
        assert_eq!(crate::encode::encode_seed(&doc, &config).unwrap(), data);
    }

    #[test]
    fn test_missing_volume_header_is_fatal() {
        let s = station("TEST");
        let data = volume(&[(&s, 'S', false)]);
        assert!(matches!(
            decode_seed(&data),
            Err(MetadataError::MalformedRecord { record: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_blockette_is_preserved() {
        let s = format!("{}0990010abc", station("TEST"));
        let data = volume(&[(V, 'V', false), (A, 'A', false), (&s, 'S', false)]);
        let (doc, warnings) = decode_seed(&data).unwrap();
        assert!(matches!(
            warnings.as_slice(),
            [Warning::UnknownBlockettePreserved { blockette_type: 99, record: 3 }]
        ));
        let station = &doc.networks()[0].stations()[0];
        assert_eq!(station.blockettes[0].body, b"abc");
        assert_eq!(station.blockettes[0].record_type, 'S');
    }
}
