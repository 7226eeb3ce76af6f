//! Compile-time smoke test: verify top-level re-exports work.

use stationmeta_rs::{
    Config, Converter, Document, Format, MetadataError, NanoTime, Response, Result, SeedConfig,
    SourceId, Stage, StageKind, Validator, Warning, decode_resp, decode_seed, decode_station_xml,
    detect_format, encode_seed, encode_seed_with_warnings, encode_station_xml,
    encode_station_xml_with_warnings, load, save,
};

#[test]
fn top_level_imports_compile() {
    // Just verify the types are usable from the crate root
    let _: fn(&[u8]) -> Result<(Document, Vec<Warning>)> = decode_seed;
    let _: fn(&str) -> Result<(Document, Vec<Warning>)> = decode_station_xml;
    let _: fn(&str) -> Result<(Document, Vec<Warning>)> = decode_resp;
    let _: fn(&Document, &SeedConfig) -> Result<Vec<u8>> = encode_seed;
    let _: fn(&Document) -> String = encode_station_xml;
    let _: fn(&Document, &SeedConfig) -> Result<(Vec<u8>, Vec<Warning>)> =
        encode_seed_with_warnings;
    let _: fn(&Document) -> (String, Vec<Warning>) = encode_station_xml_with_warnings;
    let _: fn(&[u8]) -> Result<Format> = detect_format;
    let _: fn(&[u8], Option<Format>) -> Result<(Document, Vec<Warning>)> = load;
    let _: fn(&Document, Format) -> Result<Vec<u8>> = save;

    let _nt = NanoTime::epoch();
    let _sid = SourceId::channel("IU", "ANMO", "00", "BHZ");
    let _response = Response::new().with_stage(Stage::new(StageKind::GainOnly));
    let _validator = Validator::default();
    let _converter = Converter::new(Config::default());

    // MetadataError is accessible
    let _e: Option<MetadataError> = None;
}

#[test]
fn warnings_serialize_for_external_tools() {
    let warning = Warning::UnknownBlockettePreserved {
        blockette_type: 99,
        record: 4,
    };
    let json = serde_json::to_value(&warning).unwrap();
    assert_eq!(json["kind"], "UnknownBlockettePreserved");
    assert_eq!(json["blockette_type"], 99);
    assert_eq!(json["record"], 4);
}
