//! Seismic station metadata codec: dataless SEED, FDSN StationXML and RESP.
//!
//! All three formats are read into one canonical [`Document`] (networks,
//! stations, channels and their instrument responses). Dataless SEED and
//! StationXML can be written back; a document loaded and saved in the same
//! format without warnings reproduces the input byte for byte, and after an
//! edit only the changed networks, stations and channels are re-rendered.
//! Values a target format cannot carry exactly, such as SEED's fixed-width
//! numbers, are reported by the `*_with_warnings` encoders. Damaged SEED
//! records and unknown blockettes or XML elements are reported as
//! [`Warning`]s instead of aborting the load.
//!
//! # Building and converting a document
//!
//! ```
//! use stationmeta_rs::{
//!     Channel, Document, Format, Network, NanoTime, PoleZero, PolesZeros, Response, Stage,
//!     StageKind, Station, Unit, PzTransferFunction, load, save,
//! };
//!
//! let start = NanoTime::from_day(2020, 1);
//! let mut doc = Document::new();
//! doc.info.source = "Example".into();
//! let velocity = doc.units.intern(Unit::new("M/S"));
//! let volts = doc.units.intern(Unit::new("V"));
//!
//! let sensor = Stage::new(StageKind::PolesZeros(PolesZeros {
//!     transfer_function: PzTransferFunction::LaplaceRadians,
//!     normalization_factor: 1.0,
//!     normalization_frequency: 1.0,
//!     zeros: vec![PoleZero::new(0.0, 0.0)],
//!     poles: vec![PoleZero::new(-0.037, 0.037), PoleZero::new(-0.037, -0.037)],
//! }))
//! .with_units(velocity, volts)
//! .with_gain(1500.0, 1.0);
//! let response = Response::new().with_stage(sensor).with_sensitivity(1500.0, 1.0);
//!
//! let net = doc.add_network(Network::new("XX"));
//! let sta = doc
//!     .add_station(net, Station::new("TEST", start).with_site_name("Test site"))
//!     .unwrap();
//! doc.add_channel(
//!     sta,
//!     Channel::new("BHZ", "00", start)
//!         .with_sample_rate(20.0)
//!         .with_response(response),
//! )
//! .unwrap();
//!
//! let seed = save(&doc, Format::Seed).unwrap();
//! let (loaded, warnings) = load(&seed, None).unwrap();
//! assert!(warnings.is_empty());
//!
//! let xml = save(&loaded, Format::StationXml).unwrap();
//! let (from_xml, _) = load(&xml, None).unwrap();
//! let channel = from_xml.find_channel("XX", "TEST", "00", "BHZ").unwrap();
//! assert_eq!(channel.channel.response.as_ref().unwrap().stages().len(), 1);
//! ```
//!
//! # Validation policy
//!
//! ```
//! use stationmeta_rs::{Config, Converter};
//!
//! let config = Config::from_toml_str(
//!     r#"
//!     [validation]
//!     sensitivity_tolerance = 0.01
//!
//!     [seed]
//!     record_length = 512
//!     "#,
//! )
//! .unwrap();
//! let converter = Converter::new(config);
//! assert_eq!(converter.config().seed.record_length, 512);
//! ```

pub mod assembler;
pub mod blockette;
pub mod config;
pub mod convert;
pub mod decode;
pub mod decode_xml;
pub mod details;
pub mod dictionary;
pub mod encode;
pub mod encode_xml;
pub mod error;
pub mod model;
pub mod reader;
pub mod resp;
pub mod response;
pub mod sid;
mod source;
pub mod time;
pub mod types;
pub mod validate;
pub mod warning;

pub use config::{Config, SeedConfig, UnitComparison, ValidationConfig};
pub use convert::{Converter, detect_format, load, save};
pub use details::{
    AvailabilitySpan, DataAvailability, EquipmentDates, ExternalReference, Identifier,
    NodeDetails, Operator, Person, Phone, RestrictedStatus, SampleRateRatio, SiteDetails,
};
pub use error::{MetadataError, Result};
pub use model::{
    Channel, ChannelPath, ChannelRef, CitedSource, Comment, DataFormat, Document, DocumentInfo, Equipment,
    Extension, Network, OpaqueBlockette, Station, StationPath, StationRef, Unit, UnitId,
    UnitTable,
};
pub use response::{
    Calibration, Coefficient, Coefficients, Corner, Decimation, Fir, Gain, GenericResponse,
    InstrumentPolynomial, PoleZero, PolesZeros, Polynomial, Response, ResponseList,
    ResponseListElement, Sensitivity, Stage, StageKind,
};
pub use sid::SourceId;
pub use time::NanoTime;
pub use types::{
    ApproximationType, CfTransferFunction, Format, FrequencyUnits, PzTransferFunction, Symmetry,
};
pub use validate::Validator;
pub use warning::Warning;

pub use decode::decode_seed;
pub use decode_xml::decode_station_xml;
pub use encode::{encode_seed, encode_seed_with_warnings};
pub use encode_xml::{encode_station_xml, encode_station_xml_with_warnings};
pub use resp::decode_resp;
