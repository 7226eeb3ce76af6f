//! Shared code enums: [`Format`], transfer function types, FIR symmetry and
//! polynomial approximation settings.
//!
//! Each enum converts to and from its single-letter SEED code and its
//! StationXML enumeration value.

use std::fmt;

use crate::{MetadataError, Result};

/// On-disk metadata format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Dataless SEED volume (fixed-size logical records of blockettes).
    Seed,
    /// FDSN StationXML document.
    StationXml,
    /// RESP text export (read-only).
    Resp,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seed => write!(f, "dataless SEED"),
            Self::StationXml => write!(f, "StationXML"),
            Self::Resp => write!(f, "RESP"),
        }
    }
}

fn invalid_code(blockette: u16, what: &str, code: char) -> MetadataError {
    MetadataError::Validation(format!(
        "unparseable stage kind: {what} code '{code}' in blockette {blockette:03}"
    ))
}

/// Poles & zeros transfer function type (blockette 53 field 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PzTransferFunction {
    /// Laplace transform, angular frequency (code A).
    LaplaceRadians,
    /// Laplace transform, frequency in Hz (code B).
    LaplaceHertz,
    /// Z-transform (code D).
    Digital,
}

impl PzTransferFunction {
    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'A' => Ok(Self::LaplaceRadians),
            'B' => Ok(Self::LaplaceHertz),
            'D' => Ok(Self::Digital),
            _ => Err(invalid_code(53, "transfer function", code)),
        }
    }

    pub fn to_code(self) -> char {
        match self {
            Self::LaplaceRadians => 'A',
            Self::LaplaceHertz => 'B',
            Self::Digital => 'D',
        }
    }

    pub fn from_xml(name: &str) -> Option<Self> {
        match name.trim() {
            "LAPLACE (RADIANS/SECOND)" => Some(Self::LaplaceRadians),
            "LAPLACE (HERTZ)" => Some(Self::LaplaceHertz),
            "DIGITAL (Z-TRANSFORM)" => Some(Self::Digital),
            _ => None,
        }
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            Self::LaplaceRadians => "LAPLACE (RADIANS/SECOND)",
            Self::LaplaceHertz => "LAPLACE (HERTZ)",
            Self::Digital => "DIGITAL (Z-TRANSFORM)",
        }
    }
}

/// Coefficients transfer function type (blockette 54 field 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfTransferFunction {
    AnalogRadians,
    AnalogHertz,
    Digital,
}

impl CfTransferFunction {
    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'A' => Ok(Self::AnalogRadians),
            'B' => Ok(Self::AnalogHertz),
            'D' => Ok(Self::Digital),
            _ => Err(invalid_code(54, "transfer function", code)),
        }
    }

    pub fn to_code(self) -> char {
        match self {
            Self::AnalogRadians => 'A',
            Self::AnalogHertz => 'B',
            Self::Digital => 'D',
        }
    }

    pub fn from_xml(name: &str) -> Option<Self> {
        match name.trim() {
            "ANALOG (RADIANS/SECOND)" => Some(Self::AnalogRadians),
            "ANALOG (HERTZ)" => Some(Self::AnalogHertz),
            "DIGITAL" => Some(Self::Digital),
            _ => None,
        }
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            Self::AnalogRadians => "ANALOG (RADIANS/SECOND)",
            Self::AnalogHertz => "ANALOG (HERTZ)",
            Self::Digital => "DIGITAL",
        }
    }

    pub fn is_digital(self) -> bool {
        self == Self::Digital
    }
}

/// FIR coefficient symmetry (blockette 61 field 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symmetry {
    /// All coefficients given (code A).
    None,
    /// Odd count, only the first half plus the centre is given (code B).
    Odd,
    /// Even count, only the first half is given (code C).
    Even,
}

impl Symmetry {
    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'A' => Ok(Self::None),
            'B' => Ok(Self::Odd),
            'C' => Ok(Self::Even),
            _ => Err(invalid_code(61, "symmetry", code)),
        }
    }

    pub fn to_code(self) -> char {
        match self {
            Self::None => 'A',
            Self::Odd => 'B',
            Self::Even => 'C',
        }
    }

    pub fn from_xml(name: &str) -> Option<Self> {
        match name.trim() {
            "NONE" => Some(Self::None),
            "ODD" => Some(Self::Odd),
            "EVEN" => Some(Self::Even),
            _ => None,
        }
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Odd => "ODD",
            Self::Even => "EVEN",
        }
    }
}

/// Polynomial approximation type (blockette 62 field 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproximationType {
    /// MacLaurin series (code M), the only type SEED defines.
    MacLaurin,
}

impl ApproximationType {
    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'M' => Ok(Self::MacLaurin),
            _ => Err(invalid_code(62, "approximation", code)),
        }
    }

    pub fn to_code(self) -> char {
        'M'
    }

    pub fn from_xml(name: &str) -> Option<Self> {
        match name.trim() {
            "MACLAURIN" => Some(Self::MacLaurin),
            _ => None,
        }
    }

    pub fn xml_name(self) -> &'static str {
        "MACLAURIN"
    }
}

/// Units of a polynomial's valid frequency band (blockette 62 field 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyUnits {
    /// Radians per second (code A).
    Radians,
    /// Hertz (code B).
    Hertz,
}

impl FrequencyUnits {
    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'A' => Ok(Self::Radians),
            'B' => Ok(Self::Hertz),
            _ => Err(invalid_code(62, "frequency units", code)),
        }
    }

    pub fn to_code(self) -> char {
        match self {
            Self::Radians => 'A',
            Self::Hertz => 'B',
        }
    }
}

/// StationXML `Type` value for a SEED channel flag letter (blockette 52
/// field 21).
pub fn channel_type_name(flag: char) -> Option<&'static str> {
    match flag {
        'T' => Some("TRIGGERED"),
        'C' => Some("CONTINUOUS"),
        'H' => Some("HEALTH"),
        'G' => Some("GEOPHYSICAL"),
        'W' => Some("WEATHER"),
        'F' => Some("FLAG"),
        'S' => Some("SYNTHESIZED"),
        'I' => Some("INPUT"),
        'E' => Some("EXPERIMENTAL"),
        'M' => Some("MAINTENANCE"),
        'B' => Some("BEAM"),
        _ => None,
    }
}

/// SEED channel flag letter for a StationXML `Type` value.
pub fn channel_type_flag(name: &str) -> Option<char> {
    ['T', 'C', 'H', 'G', 'W', 'F', 'S', 'I', 'E', 'M', 'B']
        .into_iter()
        .find(|&flag| channel_type_name(flag) == Some(name.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pz_codes() {
        for code in ['A', 'B', 'D'] {
            assert_eq!(PzTransferFunction::from_code(code).unwrap().to_code(), code);
        }
        assert!(matches!(
            PzTransferFunction::from_code('X'),
            Err(MetadataError::Validation(_))
        ));
    }

    #[test]
    fn test_xml_names() {
        assert_eq!(
            PzTransferFunction::from_xml("LAPLACE (RADIANS/SECOND)"),
            Some(PzTransferFunction::LaplaceRadians)
        );
        assert_eq!(CfTransferFunction::Digital.xml_name(), "DIGITAL");
        assert_eq!(Symmetry::from_xml("EVEN"), Some(Symmetry::Even));
        assert_eq!(Symmetry::from_code('B').unwrap(), Symmetry::Odd);
    }

    #[test]
    fn test_channel_flags() {
        assert_eq!(channel_type_name('C'), Some("CONTINUOUS"));
        assert_eq!(channel_type_flag("GEOPHYSICAL"), Some('G'));
        assert_eq!(channel_type_flag("SOMETHING"), None);
    }

    #[test]
    fn test_format_display() {
        assert_eq!(Format::Seed.to_string(), "dataless SEED");
        assert_eq!(Format::StationXml.to_string(), "StationXML");
    }
}
