//! Validator and normalizer.
//!
//! Every loaded document passes through [`Validator::normalize`] before it
//! is handed to the caller, and through [`Validator::check`] before it is
//! written. Most findings are non-fatal [`Warning`]s; only a missing
//! network/station/channel code or a broken stage numbering fails with
//! [`MetadataError::Validation`].

use std::collections::HashSet;

use log::{debug, warn};

use crate::config::ValidationConfig;
use crate::model::{Channel, Document, Network, Station};
use crate::response::{Decimation, Response};
use crate::sid::SourceId;
use crate::time::NanoTime;
use crate::warning::Warning;
use crate::{MetadataError, Result};

/// Runs the cross-entity checks configured by a [`ValidationConfig`].
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Normalize and check the whole document.
    ///
    /// Codes are trimmed and uppercased (when enabled), the unit table is
    /// renumbered into canonical order and all dirty markers are cleared.
    /// Running it again on the result changes nothing and reports no
    /// warnings that the first run did not.
    pub fn normalize(&self, doc: &mut Document) -> Result<Vec<Warning>> {
        self.run(doc, false)
    }

    /// Like [`normalize`](Self::normalize), but only re-checks subtrees
    /// touched by mutations since the last pass.
    pub fn revalidate(&self, doc: &mut Document) -> Result<Vec<Warning>> {
        self.run(doc, true)
    }

    /// Check the document without modifying it.
    pub fn check(&self, doc: &Document) -> Result<Vec<Warning>> {
        let mut warnings = Vec::new();
        self.check_tree(doc, false, &mut warnings)?;
        Ok(warnings)
    }

    fn run(&self, doc: &mut Document, dirty_only: bool) -> Result<Vec<Warning>> {
        let mut warnings = Vec::new();
        if self.config.normalize_codes {
            normalize_codes(doc, dirty_only, &mut warnings);
        }
        doc.compact_units();
        self.check_tree(doc, dirty_only, &mut warnings)?;
        doc.mark_clean();
        for w in &warnings {
            warn!("{w}");
        }
        debug!("validation finished with {} warnings", warnings.len());
        Ok(warnings)
    }

    fn check_tree(&self, doc: &Document, dirty_only: bool, out: &mut Vec<Warning>) -> Result<()> {
        let mut seen_networks = HashSet::new();
        for (n, network) in doc.networks().iter().enumerate() {
            if network.code.trim().is_empty() {
                return Err(MetadataError::Validation(format!(
                    "network {n} has no code"
                )));
            }
            let duplicate = !seen_networks.insert((network.code.as_str(), network.start_date));
            if dirty_only && !network.is_dirty() {
                continue;
            }
            let sid = network.source_id();
            if duplicate {
                out.push(Warning::DuplicateIdentifier { sid: sid.clone() });
            }
            if !is_code(&network.code, 2) {
                out.push(Warning::InvalidCode {
                    sid: sid.clone(),
                    field: "network code",
                    code: network.code.clone(),
                });
            }
            if let (Some(start), Some(end)) = (network.start_date, network.end_date) {
                check_order(&sid, start, end, out);
            }
            self.check_stations(doc, network, dirty_only, out)?;
        }
        Ok(())
    }

    fn check_stations(
        &self,
        doc: &Document,
        network: &Network,
        dirty_only: bool,
        out: &mut Vec<Warning>,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for station in network.stations() {
            if station.code.trim().is_empty() {
                return Err(MetadataError::Validation(format!(
                    "station in network {} has no code",
                    network.code
                )));
            }
            let duplicate = !seen.insert((station.code.as_str(), station.start_date));
            if dirty_only && !station.is_dirty() {
                continue;
            }
            let sid = SourceId::station(&network.code, &station.code);
            if duplicate {
                out.push(Warning::DuplicateIdentifier { sid: sid.clone() });
            }
            if !is_code(&station.code, 5) {
                out.push(Warning::InvalidCode {
                    sid: sid.clone(),
                    field: "station code",
                    code: station.code.clone(),
                });
            }
            check_range(&sid, "latitude", station.latitude, -90.0, 90.0, out);
            check_range(&sid, "longitude", station.longitude, -180.0, 180.0, out);
            if let Some(end) = station.end_date {
                check_order(&sid, station.start_date, end, out);
            }
            if !is_within(
                (station.start_date, station.end_date),
                network.start_date,
                network.end_date,
            ) {
                out.push(Warning::DateRange {
                    sid: sid.clone(),
                    message: format!("station epoch is outside network {}", network.code),
                });
            }
            self.check_channels(doc, network, station, dirty_only, out)?;
        }
        Ok(())
    }

    fn check_channels(
        &self,
        doc: &Document,
        network: &Network,
        station: &Station,
        dirty_only: bool,
        out: &mut Vec<Warning>,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for channel in station.channels() {
            if channel.code.trim().is_empty() {
                return Err(MetadataError::Validation(format!(
                    "channel in station {}.{} has no code",
                    network.code, station.code
                )));
            }
            let duplicate = !seen.insert((
                channel.location_code.as_str(),
                channel.code.as_str(),
                channel.start_date,
            ));
            if dirty_only && !channel.is_dirty() {
                continue;
            }
            let sid = SourceId::channel(
                &network.code,
                &station.code,
                &channel.location_code,
                &channel.code,
            );
            if duplicate {
                out.push(Warning::DuplicateIdentifier { sid: sid.clone() });
            }
            self.check_channel(doc, station, channel, &sid, out)?;
        }
        Ok(())
    }

    fn check_channel(
        &self,
        doc: &Document,
        station: &Station,
        channel: &Channel,
        sid: &SourceId,
        out: &mut Vec<Warning>,
    ) -> Result<()> {
        if !is_code(&channel.code, 3) {
            out.push(Warning::InvalidCode {
                sid: sid.clone(),
                field: "channel code",
                code: channel.code.clone(),
            });
        }
        if !channel.location_code.is_empty() && !is_code(&channel.location_code, 2) {
            out.push(Warning::InvalidCode {
                sid: sid.clone(),
                field: "location code",
                code: channel.location_code.clone(),
            });
        }
        check_range(sid, "latitude", channel.latitude, -90.0, 90.0, out);
        check_range(sid, "longitude", channel.longitude, -180.0, 180.0, out);
        if let Some(dip) = channel.dip {
            check_range(sid, "dip", dip, -90.0, 90.0, out);
        }
        if let Some(azimuth) = channel.azimuth {
            check_range(sid, "azimuth", azimuth, 0.0, 360.0, out);
        }
        if channel.sample_rate.is_nan() || channel.sample_rate < 0.0 {
            out.push(Warning::ValueOutOfRange {
                sid: sid.clone(),
                field: "sample rate",
                value: channel.sample_rate,
            });
        }
        if let Some(end) = channel.end_date {
            check_order(sid, channel.start_date, end, out);
        }
        if !is_within(
            (channel.start_date, channel.end_date),
            Some(station.start_date),
            station.end_date,
        ) {
            out.push(Warning::DateRange {
                sid: sid.clone(),
                message: format!("channel epoch is outside station {}", station.code),
            });
        }
        if let Some(response) = &channel.response {
            self.check_response(doc, channel, response, sid, out)?;
        }
        Ok(())
    }

    fn check_response(
        &self,
        doc: &Document,
        channel: &Channel,
        response: &Response,
        sid: &SourceId,
        out: &mut Vec<Warning>,
    ) -> Result<()> {
        if !response.is_numbered_contiguously() {
            let numbers: Vec<String> = response
                .stages()
                .iter()
                .map(|s| s.number.to_string())
                .collect();
            return Err(MetadataError::Validation(format!(
                "{sid}: response stages must be numbered 1..N, found [{}]",
                numbers.join(", ")
            )));
        }

        if let (Some(sensitivity), Some(computed)) =
            (&response.sensitivity, response.computed_sensitivity())
        {
            let declared = sensitivity.value;
            let deviation = if declared == 0.0 {
                computed.abs()
            } else {
                ((declared - computed) / declared).abs()
            };
            if deviation > self.config.sensitivity_tolerance {
                out.push(Warning::SensitivityMismatch {
                    sid: sid.clone(),
                    declared,
                    computed,
                });
            }
        }

        for pair in response.stages().windows(2) {
            let (Some(output), Some(input)) = (pair[0].output_units, pair[1].input_units) else {
                continue;
            };
            let output = doc.units.name(output);
            let input = doc.units.name(input);
            if !self.config.unit_comparison.matches(output, input) {
                out.push(Warning::UnitMismatch {
                    sid: sid.clone(),
                    stage: pair[0].number,
                    output: output.into(),
                    next_input: input.into(),
                });
            }
        }

        if let Some(first) = response.stages().first() {
            if first.kind.is_sampled() || first.decimation.is_some() {
                out.push(Warning::DiscretizationInFirstStage { sid: sid.clone() });
            }
        }
        for stage in response.stages().iter().skip(1) {
            if stage.kind.is_sampled() && stage.decimation.is_none() {
                out.push(Warning::MissingDecimation {
                    sid: sid.clone(),
                    stage: stage.number,
                });
            }
        }

        let mut previous: Option<(u32, &Decimation)> = None;
        for stage in response.stages() {
            let Some(decimation) = &stage.decimation else {
                continue;
            };
            if let Some((number, before)) = previous {
                let expected = before.output_sample_rate();
                if relative_difference(expected, decimation.input_sample_rate)
                    > self.config.sample_rate_tolerance
                {
                    out.push(Warning::DecimationChainMismatch {
                        sid: sid.clone(),
                        stage: stage.number,
                        previous: number,
                        expected,
                        input: decimation.input_sample_rate,
                    });
                }
            }
            previous = Some((stage.number, decimation));
        }

        if let Some(derived) = response.output_sample_rate() {
            let declared = channel.sample_rate;
            if declared > 0.0
                && relative_difference(declared, derived) > self.config.sample_rate_tolerance
            {
                out.push(Warning::SampleRateMismatch {
                    sid: sid.clone(),
                    declared,
                    derived,
                });
            }
        }
        Ok(())
    }
}

/// Uppercase alphanumeric (plus `-`/`_`/`*`/`?` which some archives use),
/// at most `max` characters.
fn is_code(code: &str, max: usize) -> bool {
    !code.is_empty()
        && code.chars().count() <= max
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '*' | '?'))
}

fn check_range(
    sid: &SourceId,
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
    out: &mut Vec<Warning>,
) {
    if !(min..=max).contains(&value) {
        out.push(Warning::ValueOutOfRange {
            sid: sid.clone(),
            field,
            value,
        });
    }
}

/// Whether the epoch `[start, end]` lies inside the parent epoch. An open
/// child end only fits an open parent end.
fn is_within(
    (start, end): (NanoTime, Option<NanoTime>),
    parent_start: Option<NanoTime>,
    parent_end: Option<NanoTime>,
) -> bool {
    let starts_inside = parent_start.is_none_or(|s| s <= start);
    let ends_inside = match (end, parent_end) {
        (_, None) => true,
        (Some(end), Some(parent_end)) => end <= parent_end,
        (None, Some(_)) => false,
    };
    starts_inside && ends_inside
}

fn relative_difference(reference: f64, value: f64) -> f64 {
    if reference == 0.0 {
        value.abs()
    } else {
        ((reference - value) / reference).abs()
    }
}

fn check_order(sid: &SourceId, start: NanoTime, end: NanoTime, out: &mut Vec<Warning>) {
    if start > end {
        out.push(Warning::DateRange {
            sid: sid.clone(),
            message: format!("start {start} is after end {end}"),
        });
    }
}

fn normalized(code: &str, location: bool) -> String {
    let code = code.trim().to_ascii_uppercase();
    if location && code == "--" {
        String::new()
    } else {
        code
    }
}

fn normalize_field(
    value: &mut String,
    location: bool,
    sid: impl FnOnce(&str) -> SourceId,
    field: &'static str,
    out: &mut Vec<Warning>,
) {
    let new = normalized(value, location);
    if new != *value {
        let from = std::mem::replace(value, new);
        out.push(Warning::CodeNormalized {
            sid: sid(value),
            field,
            from,
            to: value.clone(),
        });
    }
}

fn normalize_codes(doc: &mut Document, dirty_only: bool, out: &mut Vec<Warning>) {
    for network in doc.networks_mut() {
        if dirty_only && !network.is_dirty() {
            continue;
        }
        normalize_field(&mut network.code, false, SourceId::network, "network code", out);
        let net = network.code.clone();
        for station in &mut network.stations {
            if dirty_only && !station.is_dirty() {
                continue;
            }
            normalize_field(
                &mut station.code,
                false,
                |code| SourceId::station(&net, code),
                "station code",
                out,
            );
            let sta = station.code.clone();
            for channel in &mut station.channels {
                if dirty_only && !channel.is_dirty() {
                    continue;
                }
                let cha = channel.code.clone();
                normalize_field(
                    &mut channel.location_code,
                    true,
                    |loc| SourceId::channel(&net, &sta, loc, cha.trim()),
                    "location code",
                    out,
                );
                let loc = channel.location_code.clone();
                normalize_field(
                    &mut channel.code,
                    false,
                    |code| SourceId::channel(&net, &sta, &loc, code),
                    "channel code",
                    out,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitComparison;
    use crate::model::{StationPath, Unit};
    use crate::response::{Stage, StageKind};

    fn start() -> NanoTime {
        NanoTime::from_day(2020, 1)
    }

    fn doc_with_response(response: Response) -> Document {
        let mut doc = Document::new();
        let net = doc.add_network(Network::new("XX"));
        let sta = doc
            .add_station(net, Station::new("TEST", start()).with_coordinates(10.0, 20.0, 100.0))
            .unwrap();
        doc.add_channel(
            sta,
            Channel::new("BHZ", "00", start())
                .with_sample_rate(20.0)
                .with_response(response),
        )
        .unwrap();
        doc
    }

    fn gain_stage(doc_units: &mut crate::model::UnitTable, gain: f64, from: &str, to: &str) -> Stage {
        let input = doc_units.intern(Unit::new(from));
        let output = doc_units.intern(Unit::new(to));
        Stage::new(StageKind::GainOnly)
            .with_units(input, output)
            .with_gain(gain, 1.0)
    }

    fn build(gains: &[(f64, &str, &str)], sensitivity: f64) -> Document {
        let mut units = crate::model::UnitTable::new();
        let mut response = Response::new();
        for &(g, from, to) in gains {
            response.push_stage(gain_stage(&mut units, g, from, to));
        }
        let response = response.with_sensitivity(sensitivity, 1.0);
        let mut doc = doc_with_response(response);
        doc.units = units;
        doc
    }

    #[test]
    fn test_clean_document_has_no_warnings() {
        let mut doc = build(&[(1500.0, "M/S", "V"), (1000.0, "V", "COUNTS")], 1.5e6);
        let warnings = Validator::default().normalize(&mut doc).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_sensitivity_mismatch_is_a_warning() {
        let mut doc = build(&[(1500.0, "M/S", "V"), (1000.0, "V", "COUNTS")], 2.0e6);
        let warnings = Validator::default().normalize(&mut doc).unwrap();
        assert!(matches!(
            warnings.as_slice(),
            [Warning::SensitivityMismatch { .. }]
        ));
    }

    #[test]
    fn test_unit_mismatch_respects_comparison_mode() {
        let mut doc = build(&[(2.0, "M/S", "V"), (3.0, "v", "COUNTS")], 6.0);
        assert!(Validator::default().normalize(&mut doc).unwrap().is_empty());

        let strict = Validator::new(ValidationConfig {
            unit_comparison: UnitComparison::Exact,
            ..Default::default()
        });
        let warnings = strict.check(&doc).unwrap();
        assert!(matches!(
            warnings.as_slice(),
            [Warning::UnitMismatch { stage: 1, .. }]
        ));
    }

    #[test]
    fn test_missing_code_is_fatal() {
        let mut doc = build(&[], 1.0);
        doc.channel_mut(crate::model::ChannelPath {
            network: 0,
            station: 0,
            channel: 0,
        })
        .unwrap()
        .code = " ".into();
        let err = Validator::default().normalize(&mut doc).unwrap_err();
        assert!(matches!(err, MetadataError::Validation(_)));
    }

    #[test]
    fn test_gap_in_stage_numbers_is_fatal() {
        let mut stage = Stage::new(StageKind::GainOnly);
        stage.number = 2;
        let mut doc = doc_with_response(Response::from_numbered(vec![stage], None));
        let err = Validator::default().check(&doc).unwrap_err();
        assert!(err.to_string().contains("numbered 1..N"));
        assert!(Validator::default().normalize(&mut doc).is_err());
    }

    #[test]
    fn test_codes_are_normalized_once() {
        let mut doc = build(&[], 1.0);
        let path = crate::model::ChannelPath {
            network: 0,
            station: 0,
            channel: 0,
        };
        {
            let channel = doc.channel_mut(path).unwrap();
            channel.code = "bhz ".into();
            channel.location_code = "--".into();
        }
        let validator = Validator::default();
        let first = validator.normalize(&mut doc).unwrap();
        assert_eq!(
            first
                .iter()
                .filter(|w| matches!(w, Warning::CodeNormalized { .. }))
                .count(),
            2
        );
        let channel = doc.channel(path).unwrap();
        assert_eq!(channel.code, "BHZ");
        assert_eq!(channel.location_code, "");

        let snapshot = doc.clone();
        let second = validator.normalize(&mut doc).unwrap();
        assert!(second.iter().all(|w| first.contains(w)));
        assert_eq!(doc, snapshot);
    }

    #[test]
    fn test_revalidate_only_visits_dirty_nodes() {
        let mut doc = build(&[], 1.0);
        let validator = Validator::default();
        validator.normalize(&mut doc).unwrap();

        let sta = doc
            .add_station(0, Station::new("BAD", start()).with_coordinates(95.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(sta, StationPath { network: 0, station: 1 });
        let warnings = validator.revalidate(&mut doc).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            Warning::ValueOutOfRange { field: "latitude", .. }
        ));
        assert!(validator.revalidate(&mut doc).unwrap().is_empty());
    }

    #[test]
    fn test_channel_outside_closed_station_epoch() {
        let mut doc = build(&[], 1.0);
        doc.station_mut(StationPath { network: 0, station: 0 })
            .unwrap()
            .end_date = Some(NanoTime::from_day(2021, 1));
        let warnings = Validator::default().normalize(&mut doc).unwrap();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, Warning::DateRange { .. })));
    }

    #[test]
    fn test_channel_before_open_station_start() {
        let mut doc = build(&[], 1.0);
        let path = crate::model::ChannelPath {
            network: 0,
            station: 0,
            channel: 0,
        };
        doc.channel_mut(path).unwrap().start_date = NanoTime::from_day(2019, 1);
        let warnings = Validator::default().check(&doc).unwrap();
        assert_eq!(
            warnings,
            vec![Warning::DateRange {
                sid: SourceId::channel("XX", "TEST", "00", "BHZ"),
                message: "channel epoch is outside station TEST".into(),
            }]
        );
    }

    #[test]
    fn test_station_before_open_network_start() {
        let mut doc = build(&[], 1.0);
        doc.network_mut(0).unwrap().start_date = Some(NanoTime::from_day(2021, 1));
        let warnings = Validator::default().check(&doc).unwrap();
        assert!(warnings.iter().any(|w| matches!(
            w,
            Warning::DateRange { message, .. } if message.contains("outside network XX")
        )));
    }

    #[test]
    fn test_is_within() {
        let a = NanoTime::from_day(2020, 1);
        let b = NanoTime::from_day(2021, 1);
        assert!(is_within((b, None), Some(a), None));
        assert!(!is_within((a, None), Some(b), None));
        assert!(is_within((b, Some(b)), Some(a), Some(b)));
        assert!(!is_within((b, None), Some(a), Some(b)));
        assert!(is_within((a, None), None, None));
    }

    fn decimating(input_sample_rate: f64, factor: u32) -> Stage {
        Stage::new(StageKind::GainOnly)
            .with_gain(1.0, 1.0)
            .with_decimation(Decimation {
                input_sample_rate,
                factor,
                offset: 0,
                delay: 0.0,
                correction: 0.0,
            })
    }

    #[test]
    fn test_broken_middle_decimation_stage() {
        let sensor = Stage::new(StageKind::GainOnly).with_gain(1.0, 1.0);
        // 1000 Hz / 5 feeds 200 Hz, but stage 3 claims 250 Hz; the chain
        // still ends at the declared 20 Hz.
        let response = Response::new()
            .with_stage(sensor)
            .with_stage(decimating(1000.0, 5))
            .with_stage(decimating(250.0, 2))
            .with_stage(decimating(100.0, 5))
            .with_sensitivity(1.0, 1.0);
        let doc = doc_with_response(response);
        let warnings = Validator::default().check(&doc).unwrap();
        assert_eq!(
            warnings,
            vec![
                Warning::DecimationChainMismatch {
                    sid: SourceId::channel("XX", "TEST", "00", "BHZ"),
                    stage: 3,
                    previous: 2,
                    expected: 200.0,
                    input: 250.0,
                },
                Warning::DecimationChainMismatch {
                    sid: SourceId::channel("XX", "TEST", "00", "BHZ"),
                    stage: 4,
                    previous: 3,
                    expected: 125.0,
                    input: 100.0,
                },
            ]
        );
    }

    #[test]
    fn test_consistent_decimation_chain() {
        let response = Response::new()
            .with_stage(Stage::new(StageKind::GainOnly).with_gain(1.0, 1.0))
            .with_stage(decimating(1000.0, 5))
            .with_stage(decimating(200.0, 10))
            .with_sensitivity(1.0, 1.0);
        let doc = doc_with_response(response);
        assert!(Validator::default().check(&doc).unwrap().is_empty());
    }
}
