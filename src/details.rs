//! Descriptive StationXML 1.1 types: access status, identifiers, operators
//! and contacts, site address, external references.
//!
//! These carry no meaning for the response or the SEED encoding. Most of
//! them have no SEED counterpart and are only written to StationXML.

use crate::model::Extension;
use crate::time::NanoTime;

/// Data access status of a network, station or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestrictedStatus {
    Open,
    Closed,
    Partial,
}

impl RestrictedStatus {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    pub fn to_code(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Partial => "partial",
        }
    }
}

/// Persistent identifier such as a DOI, `<Identifier type="DOI">`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub kind: Option<String>,
    pub value: String,
}

/// Attributes and children shared by networks, stations and channels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeDetails {
    pub restricted_status: Option<RestrictedStatus>,
    pub alternate_code: Option<String>,
    pub historical_code: Option<String>,
    /// FDSN source identifier URI, `sourceID`.
    pub source_id: Option<String>,
    pub identifiers: Vec<Identifier>,
    pub data_availability: Option<DataAvailability>,
    /// Attributes the model has no field for, e.g. vendor-namespaced ones,
    /// as `(qualified name, value)`.
    pub extra_attributes: Vec<(String, String)>,
}

impl NodeDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Attributes in schema order followed by the extra ones, for the
    /// StationXML writer.
    pub(crate) fn attributes(&self) -> Vec<(&str, String)> {
        let mut attributes = Vec::new();
        if let Some(status) = self.restricted_status {
            attributes.push(("restrictedStatus", status.to_code().to_string()));
        }
        if let Some(code) = &self.alternate_code {
            attributes.push(("alternateCode", code.clone()));
        }
        if let Some(code) = &self.historical_code {
            attributes.push(("historicalCode", code.clone()));
        }
        if let Some(id) = &self.source_id {
            attributes.push(("sourceID", id.clone()));
        }
        for (key, value) in &self.extra_attributes {
            attributes.push((key.as_str(), value.clone()));
        }
        attributes
    }
}

/// Time range of available data, `<DataAvailability>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataAvailability {
    pub extent: Option<(NanoTime, NanoTime)>,
    pub spans: Vec<AvailabilitySpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilitySpan {
    pub start: NanoTime,
    pub end: NanoTime,
    pub number_segments: u32,
    pub maximum_time_tear: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Phone {
    pub description: Option<String>,
    pub country_code: Option<u32>,
    pub area_code: u32,
    /// Subscriber number, e.g. `555-1234`.
    pub phone_number: String,
}

/// Contact person, `PersonType` in the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Person {
    pub names: Vec<String>,
    pub agencies: Vec<String>,
    pub emails: Vec<String>,
    pub phones: Vec<Phone>,
}

/// Agency operating a network or station and its contacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Operator {
    pub agency: String,
    pub contacts: Vec<Person>,
    pub website: Option<String>,
}

/// Address of a station's site. The site name itself lives on the station.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SiteDetails {
    pub description: Option<String>,
    pub town: Option<String>,
    pub county: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub extensions: Vec<Extension>,
}

impl SiteDetails {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalReference {
    pub uri: String,
    pub description: String,
}

/// Exact sample rate as a ratio, e.g. 1 sample per 10 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleRateRatio {
    pub number_samples: u32,
    pub number_seconds: u32,
}

/// Installation history of a piece of equipment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EquipmentDates {
    pub installation: Option<NanoTime>,
    pub removal: Option<NanoTime>,
    pub calibrations: Vec<NanoTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_status_codes() {
        for status in [
            RestrictedStatus::Open,
            RestrictedStatus::Closed,
            RestrictedStatus::Partial,
        ] {
            assert_eq!(RestrictedStatus::from_code(status.to_code()), Some(status));
        }
        assert_eq!(RestrictedStatus::from_code("secret"), None);
    }

    #[test]
    fn test_node_attributes_order() {
        let details = NodeDetails {
            restricted_status: Some(RestrictedStatus::Open),
            source_id: Some("FDSN:XX_TEST".into()),
            extra_attributes: vec![("iris:flag".into(), "1".into())],
            ..Default::default()
        };
        let names: Vec<&str> = details.attributes().iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["restrictedStatus", "sourceID", "iris:flag"]);
        assert!(NodeDetails::default().is_empty());
    }
}
