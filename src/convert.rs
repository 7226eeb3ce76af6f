//! Format detection and the load/save pipeline.
//!
//! [`Converter`] ties the codecs to the [`Validator`]: every loaded
//! document is normalized before it is returned, and every document is
//! checked before it is written.
//!
//! ```
//! use stationmeta_rs::{Format, convert::detect_format};
//!
//! let xml = b"<?xml version=\"1.0\"?>\n<FDSNStationXML xmlns=\"http://www.fdsn.org/xml/station/1\">";
//! assert_eq!(detect_format(xml).unwrap(), Format::StationXml);
//! assert!(detect_format(b"hello").is_err());
//! ```

use log::{debug, info};

use crate::config::Config;
use crate::decode::decode_seed;
use crate::decode_xml::decode_station_xml;
use crate::encode::encode_seed_with_warnings;
use crate::encode_xml::{STATION_XML_NAMESPACE, encode_station_xml_with_warnings};
use crate::model::Document;
use crate::resp::{decode_resp, looks_like_resp};
use crate::types::Format;
use crate::validate::Validator;
use crate::warning::Warning;
use crate::{MetadataError, Result};

/// Bytes looked at when sniffing a text format.
const SNIFF_LEN: usize = 4096;

/// Guess the format of a metadata file from its first bytes.
///
/// A SEED volume starts with a `V` record whose first blockette is a volume
/// header (005, 008 or 010). StationXML is recognised by its XML
/// declaration or namespace, RESP by its `B<blockette>F<field>` tags.
pub fn detect_format(data: &[u8]) -> Result<Format> {
    if data.len() >= 11
        && data[..6].iter().all(u8::is_ascii_digit)
        && data[6] == b'V'
        && matches!(&data[8..11], b"005" | b"008" | b"010")
    {
        return Ok(Format::Seed);
    }

    let head = &data[..data.len().min(SNIFF_LEN)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.starts_with("<?xml")
        || text.contains(STATION_XML_NAMESPACE)
        || (text.starts_with('<') && text.contains("FDSNStationXML"))
    {
        return Ok(Format::StationXml);
    }
    if looks_like_resp(text) {
        return Ok(Format::Resp);
    }
    Err(MetadataError::UnrecognizedFormat)
}

/// Loads, normalizes, checks and writes documents with one configuration.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    config: Config,
    validator: Validator,
}

impl Converter {
    pub fn new(config: Config) -> Self {
        let validator = Validator::new(config.validation.clone());
        Self { config, validator }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Decode `data` and normalize the result.
    ///
    /// The format is detected when `format` is `None`. Warnings from the
    /// decoder come first, followed by those of the normalizer.
    pub fn load(&self, data: &[u8], format: Option<Format>) -> Result<(Document, Vec<Warning>)> {
        let format = match format {
            Some(format) => format,
            None => detect_format(data)?,
        };
        debug!("loading {} bytes as {format}", data.len());
        let (mut doc, mut warnings) = match format {
            Format::Seed => decode_seed(data)?,
            Format::StationXml => {
                let text = std::str::from_utf8(data).map_err(|e| {
                    MetadataError::Schema(format!("document is not valid UTF-8: {e}"))
                })?;
                decode_station_xml(text.trim_start_matches('\u{feff}'))?
            }
            Format::Resp => decode_resp(&String::from_utf8_lossy(data))?,
        };
        warnings.extend(self.validator.normalize(&mut doc)?);
        info!(
            "loaded {format}: {} channels, {} warnings",
            doc.channels().count(),
            warnings.len()
        );
        Ok((doc, warnings))
    }

    /// Encode `doc` as `format` after a read-only validation pass.
    pub fn save(&self, doc: &Document, format: Format) -> Result<Vec<u8>> {
        self.save_with_warnings(doc, format).map(|(bytes, _)| bytes)
    }

    /// Like [`save`](Self::save), also returning what the target format
    /// could not carry or had to round.
    pub fn save_with_warnings(
        &self,
        doc: &Document,
        format: Format,
    ) -> Result<(Vec<u8>, Vec<Warning>)> {
        if format == Format::Resp {
            return Err(MetadataError::WriteUnsupported(format));
        }
        for warning in self.validator.check(doc)? {
            debug!("saving despite: {warning}");
        }
        let (bytes, warnings) = match format {
            Format::Seed => encode_seed_with_warnings(doc, &self.config.seed)?,
            _ => {
                let (text, warnings) = encode_station_xml_with_warnings(doc);
                (text.into_bytes(), warnings)
            }
        };
        if !warnings.is_empty() {
            info!("saved {format} with {} warnings", warnings.len());
        }
        Ok((bytes, warnings))
    }

    /// Load `data` and save it as `to`, returning the load warnings.
    pub fn convert(
        &self,
        data: &[u8],
        from: Option<Format>,
        to: Format,
    ) -> Result<(Vec<u8>, Vec<Warning>)> {
        let (doc, warnings) = self.load(data, from)?;
        let bytes = self.save(&doc, to)?;
        Ok((bytes, warnings))
    }
}

/// Load with the default configuration. See [`Converter::load`].
pub fn load(data: &[u8], format: Option<Format>) -> Result<(Document, Vec<Warning>)> {
    Converter::default().load(data, format)
}

/// Save with the default configuration. See [`Converter::save`].
pub fn save(doc: &Document, format: Format) -> Result<Vec<u8>> {
    Converter::default().save(doc, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, Network, Station};
    use crate::time::NanoTime;

    fn sample_doc() -> Document {
        let start = NanoTime::from_day(2020, 1);
        let mut doc = Document::new();
        doc.info.source = "Test".into();
        let net = doc.add_network(Network::new("XX"));
        let sta = doc
            .add_station(
                net,
                Station::new("TEST", start)
                    .with_coordinates(10.0, 20.0, 100.0)
                    .with_site_name("Test site"),
            )
            .unwrap();
        doc.add_channel(
            sta,
            Channel::new("BHZ", "00", start)
                .with_coordinates(10.0, 20.0, 100.0, 0.0)
                .with_sample_rate(20.0),
        )
        .unwrap();
        doc
    }

    #[test]
    fn test_detect_format() {
        let doc = sample_doc();
        let seed = save(&doc, Format::Seed).unwrap();
        assert_eq!(detect_format(&seed).unwrap(), Format::Seed);
        let xml = save(&doc, Format::StationXml).unwrap();
        assert_eq!(detect_format(&xml).unwrap(), Format::StationXml);

        let resp = b"#\nB050F03     Station:     TEST\n";
        assert_eq!(detect_format(resp).unwrap(), Format::Resp);
        assert!(matches!(
            detect_format(b"\x00\x01\x02binary"),
            Err(MetadataError::UnrecognizedFormat)
        ));
        assert!(matches!(
            detect_format(b""),
            Err(MetadataError::UnrecognizedFormat)
        ));
    }

    #[test]
    fn test_resp_is_read_only() {
        assert!(matches!(
            save(&sample_doc(), Format::Resp),
            Err(MetadataError::WriteUnsupported(Format::Resp))
        ));
    }

    #[test]
    fn test_convert_seed_to_xml() {
        let seed = save(&sample_doc(), Format::Seed).unwrap();
        let converter = Converter::default();
        let (xml, warnings) = converter.convert(&seed, None, Format::StationXml).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        let (doc, _) = converter.load(&xml, Some(Format::StationXml)).unwrap();
        let channel = doc.find_channel("XX", "TEST", "00", "BHZ").unwrap();
        assert_eq!(channel.channel.sample_rate, 20.0);
    }

    #[test]
    fn test_save_reports_what_the_format_drops() {
        let mut doc = sample_doc();
        let path = doc.channels().next().unwrap().path;
        doc.channel_mut(path).unwrap().water_level = Some(3.5);
        let converter = Converter::default();
        let (_, warnings) = converter.save_with_warnings(&doc, Format::Seed).unwrap();
        assert!(matches!(
            warnings.as_slice(),
            [Warning::NotRepresentable { format: "dataless SEED", .. }]
        ));
        let (_, warnings) = converter
            .save_with_warnings(&doc, Format::StationXml)
            .unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_format_hint_overrides_detection() {
        let xml = save(&sample_doc(), Format::StationXml).unwrap();
        assert!(load(&xml, Some(Format::Seed)).is_err());
    }
}
