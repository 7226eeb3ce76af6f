//! Property tests for stage numbering and the sensitivity chain.

use proptest::prelude::*;
use stationmeta_rs::{
    Channel, Document, Format, NanoTime, Network, Response, Stage, StageKind, Station, Validator,
    Warning, load, save,
};

fn document(gains: &[f64], sensitivity: Option<f64>) -> Document {
    let start = NanoTime::from_day(2021, 100);
    let mut response = Response::new();
    for &gain in gains {
        response.push_stage(Stage::new(StageKind::GainOnly).with_gain(gain, 1.0));
    }
    if let Some(value) = sensitivity {
        response = response.with_sensitivity(value, 1.0);
    }

    let mut doc = Document::new();
    doc.info.source = "proptest".into();
    let net = doc.add_network(Network::new("XX"));
    let sta = doc
        .add_station(net, Station::new("PROP", start).with_site_name("Site"))
        .unwrap();
    doc.add_channel(
        sta,
        Channel::new("BHZ", "", start)
            .with_sample_rate(40.0)
            .with_response(response),
    )
    .unwrap();
    doc
}

fn has_mismatch(warnings: &[Warning]) -> bool {
    warnings
        .iter()
        .any(|w| matches!(w, Warning::SensitivityMismatch { .. }))
}

proptest! {
    #[test]
    fn test_stages_are_numbered_contiguously(
        gains in prop::collection::vec(0.1f64..1000.0, 0..8),
    ) {
        let doc = document(&gains, None);
        for format in [Format::Seed, Format::StationXml] {
            let bytes = save(&doc, format).unwrap();
            let (loaded, _) = load(&bytes, Some(format)).unwrap();
            for c in loaded.channels() {
                let count = c.channel.response.as_ref().map_or(0, |r| r.stages().len());
                prop_assert_eq!(count, gains.len());
                if let Some(response) = &c.channel.response {
                    prop_assert!(response.is_numbered_contiguously());
                    let numbers: Vec<u32> = response.stages().iter().map(|s| s.number).collect();
                    let expected: Vec<u32> = (1..=gains.len() as u32).collect();
                    prop_assert_eq!(numbers, expected);
                }
            }
        }
    }

    #[test]
    fn test_sensitivity_mismatch_follows_tolerance(
        gains in prop::collection::vec(0.5f64..20.0, 1..5),
        factor in 0.5f64..1.5,
    ) {
        let product: f64 = gains.iter().product();
        let declared = product * factor;
        let deviation = ((declared - product) / declared).abs();
        let tolerance = Validator::default().config().sensitivity_tolerance;
        prop_assume!((deviation - tolerance).abs() > 1e-6);

        let doc = document(&gains, Some(declared));
        let warnings = Validator::default().check(&doc).unwrap();
        prop_assert_eq!(has_mismatch(&warnings), deviation > tolerance);

        // The load still succeeds either way.
        let xml = save(&doc, Format::StationXml).unwrap();
        let (_, warnings) = load(&xml, None).unwrap();
        prop_assert_eq!(has_mismatch(&warnings), deviation > tolerance);
    }
}
