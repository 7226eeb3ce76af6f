//! Non-fatal problems found while loading or validating a document.
//!
//! Warnings are collected in the order they are found and returned next to
//! the document; they serialize to JSON-friendly structures for UIs.

use std::fmt;

use serde::Serialize;

use crate::sid::SourceId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum Warning {
    /// A damaged SEED record was skipped; parsing resumed afterwards.
    MalformedRecord {
        record: u32,
        offset: usize,
        reason: String,
    },
    /// A record outside the metadata (e.g. a waveform record) was skipped.
    SkippedRecord { record: u32, record_type: char },
    UnknownBlockettePreserved { blockette_type: u16, record: u32 },
    UnknownXmlExtensionPreserved { element: String, location: String },
    /// A dictionary key referenced by a blockette is not defined.
    UnresolvedReference {
        location: String,
        dictionary: u16,
        key: u32,
    },
    /// A SEED 2.3 (005/008) volume header was read and will be written as 010.
    VolumeHeaderConverted { blockette_type: u16 },
    SensitivityMismatch {
        sid: SourceId,
        declared: f64,
        computed: f64,
    },
    UnitMismatch {
        sid: SourceId,
        stage: u32,
        output: String,
        next_input: String,
    },
    DateRange { sid: SourceId, message: String },
    DuplicateIdentifier { sid: SourceId },
    ValueOutOfRange {
        sid: SourceId,
        field: &'static str,
        value: f64,
    },
    InvalidCode {
        sid: SourceId,
        field: &'static str,
        code: String,
    },
    CodeNormalized {
        sid: SourceId,
        field: &'static str,
        from: String,
        to: String,
    },
    SampleRateMismatch {
        sid: SourceId,
        declared: f64,
        derived: f64,
    },
    /// A decimating stage's input rate differs from the output rate of the
    /// previous decimating stage.
    DecimationChainMismatch {
        sid: SourceId,
        stage: u32,
        previous: u32,
        expected: f64,
        input: f64,
    },
    MissingDecimation { sid: SourceId, stage: u32 },
    DiscretizationInFirstStage { sid: SourceId },
    /// A known StationXML element whose content the model does not carry
    /// was skipped.
    UnknownXmlElementDropped { element: String, location: String },
    /// Part of the document has no representation in the target format
    /// and was left out of the output.
    NotRepresentable {
        location: String,
        what: String,
        format: &'static str,
    },
    /// A number did not fit its fixed-width SEED field and was rounded.
    PrecisionLoss {
        location: String,
        blockette: u16,
        field: &'static str,
        value: f64,
        written: f64,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRecord {
                record,
                offset,
                reason,
            } => write!(
                f,
                "skipped malformed record {record} at offset {offset}: {reason}"
            ),
            Self::SkippedRecord {
                record,
                record_type,
            } => write!(f, "skipped non-metadata record {record} of type '{record_type}'"),
            Self::UnknownBlockettePreserved {
                blockette_type,
                record,
            } => write!(
                f,
                "unknown blockette {blockette_type:03} in record {record} preserved as-is"
            ),
            Self::UnknownXmlExtensionPreserved { element, location } => {
                write!(f, "unknown element <{element}> in {location} preserved as-is")
            }
            Self::UnresolvedReference {
                location,
                dictionary,
                key,
            } => write!(
                f,
                "{location}: key {key} not found in dictionary blockette {dictionary:03}"
            ),
            Self::VolumeHeaderConverted { blockette_type } => write!(
                f,
                "volume header blockette {blockette_type:03} will be written as blockette 010"
            ),
            Self::SensitivityMismatch {
                sid,
                declared,
                computed,
            } => write!(
                f,
                "{sid}: declared sensitivity {declared:e} differs from stage gain product {computed:e}"
            ),
            Self::UnitMismatch {
                sid,
                stage,
                output,
                next_input,
            } => write!(
                f,
                "{sid}: stage {stage} outputs {output} but stage {} expects {next_input}",
                stage + 1
            ),
            Self::DateRange { sid, message } => write!(f, "{sid}: {message}"),
            Self::DuplicateIdentifier { sid } => write!(f, "{sid}: duplicate identifier"),
            Self::ValueOutOfRange { sid, field, value } => {
                write!(f, "{sid}: {field} {value} is out of range")
            }
            Self::InvalidCode { sid, field, code } => {
                write!(f, "{sid}: invalid {field} {code:?}")
            }
            Self::CodeNormalized {
                sid,
                field,
                from,
                to,
            } => write!(f, "{sid}: {field} {from:?} normalized to {to:?}"),
            Self::SampleRateMismatch {
                sid,
                declared,
                derived,
            } => write!(
                f,
                "{sid}: sample rate {declared} differs from decimation chain output {derived}"
            ),
            Self::DecimationChainMismatch {
                sid,
                stage,
                previous,
                expected,
                input,
            } => write!(
                f,
                "{sid}: stage {stage} expects {input} Hz but stage {previous} decimates to {expected} Hz"
            ),
            Self::MissingDecimation { sid, stage } => {
                write!(f, "{sid}: sampled stage {stage} has no decimation")
            }
            Self::DiscretizationInFirstStage { sid } => {
                write!(f, "{sid}: stage 1 discretizes the signal")
            }
            Self::UnknownXmlElementDropped { element, location } => {
                write!(f, "element <{element}> in {location} is not supported and was dropped")
            }
            Self::NotRepresentable {
                location,
                what,
                format,
            } => write!(f, "{location}: {what} cannot be written to {format}"),
            Self::PrecisionLoss {
                location,
                blockette,
                field,
                value,
                written,
            } => write!(
                f,
                "{location}: blockette {blockette:03} {field} {value} written as {written}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let w = Warning::UnitMismatch {
            sid: SourceId::channel("XX", "TEST", "00", "BHZ"),
            stage: 1,
            output: "V".into(),
            next_input: "COUNTS".into(),
        };
        assert_eq!(
            w.to_string(),
            "FDSN:XX_TEST_00_B_H_Z: stage 1 outputs V but stage 2 expects COUNTS"
        );
    }

    #[test]
    fn test_serialize_is_tagged() {
        let w = Warning::MalformedRecord {
            record: 3,
            offset: 8192,
            reason: "truncated".into(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"], "MalformedRecord");
        assert_eq!(json["offset"], 8192);
    }

    #[test]
    fn test_precision_loss_display() {
        let w = Warning::PrecisionLoss {
            location: "XX.TEST".into(),
            blockette: 50,
            field: "latitude",
            value: 10.1234567,
            written: 10.123457,
        };
        assert_eq!(
            w.to_string(),
            "XX.TEST: blockette 050 latitude 10.1234567 written as 10.123457"
        );
    }
}
