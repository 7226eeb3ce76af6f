//! FDSN Source Identifiers naming a node of the metadata tree.
//!
//! Networks, stations and channels are addressed as `FDSN:NET`,
//! `FDSN:NET_STA` and `FDSN:NET_STA_LOC_BAND_SOURCE_SUBSOURCE`, where the
//! channel code (e.g. "BHZ") is split into band ("B"), source ("H"), and
//! subsource ("Z") components.

use std::fmt;

use serde::Serialize;

/// FDSN Source Identifier of a network, station or channel.
///
/// # Examples
///
/// ```
/// use stationmeta_rs::SourceId;
///
/// let sid = SourceId::channel("IU", "ANMO", "00", "BHZ");
/// assert_eq!(sid.to_string(), "FDSN:IU_ANMO_00_B_H_Z");
/// assert_eq!(SourceId::station("IU", "ANMO").to_string(), "FDSN:IU_ANMO");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceId {
    pub network: String,
    pub station: Option<String>,
    /// `(location, channel)` for channel-level identifiers.
    pub channel: Option<(String, String)>,
}

impl SourceId {
    pub fn network(network: &str) -> Self {
        Self {
            network: network.into(),
            station: None,
            channel: None,
        }
    }

    pub fn station(network: &str, station: &str) -> Self {
        Self {
            network: network.into(),
            station: Some(station.into()),
            channel: None,
        }
    }

    pub fn channel(network: &str, station: &str, location: &str, channel: &str) -> Self {
        Self {
            network: network.into(),
            station: Some(station.into()),
            channel: Some((location.into(), channel.into())),
        }
    }

    /// Parse a source identifier string.
    ///
    /// Accepts either the full `FDSN:` prefix form or just the
    /// underscore-separated components. Returns `None` when the number of
    /// components matches no level.
    pub fn parse(s: &str) -> Option<Self> {
        let body = s.strip_prefix("FDSN:").unwrap_or(s);
        let parts: Vec<&str> = body.split('_').collect();
        match parts.as_slice() {
            [net] if !net.is_empty() => Some(Self::network(net)),
            [net, sta] => Some(Self::station(net, sta)),
            [net, sta, loc, band, source, subsource] => Some(Self::channel(
                net,
                sta,
                loc,
                &format!("{band}{source}{subsource}"),
            )),
            _ => None,
        }
    }

    /// Return the `NET.STA.LOC.CHA` form used in RESP and log output.
    pub fn nslc(&self) -> String {
        match (&self.station, &self.channel) {
            (Some(sta), Some((loc, cha))) => format!("{}.{sta}.{loc}.{cha}", self.network),
            (Some(sta), None) => format!("{}.{sta}", self.network),
            _ => self.network.clone(),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FDSN:{}", self.network)?;
        if let Some(sta) = &self.station {
            write!(f, "_{sta}")?;
        }
        if let Some((loc, cha)) = &self.channel {
            let (band, source, subsource) = split_channel(cha);
            write!(f, "_{loc}_{band}_{source}_{subsource}")?;
        }
        Ok(())
    }
}

/// Split a 3-character channel code into (band, source, subsource).
///
/// For shorter codes, missing components default to empty strings.
fn split_channel(channel: &str) -> (&str, &str, &str) {
    let mut bounds = channel.char_indices().map(|(i, _)| i).skip(1);
    let first = bounds.next().unwrap_or(channel.len());
    let second = bounds.next().unwrap_or(channel.len());
    (
        &channel[..first],
        &channel[first..second],
        &channel[second..],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_display() {
        let sid = SourceId::channel("IU", "ANMO", "00", "BHZ");
        assert_eq!(sid.to_string(), "FDSN:IU_ANMO_00_B_H_Z");
        assert_eq!(sid.nslc(), "IU.ANMO.00.BHZ");
    }

    #[test]
    fn test_levels() {
        assert_eq!(SourceId::network("XX").to_string(), "FDSN:XX");
        assert_eq!(SourceId::station("XX", "TEST").nslc(), "XX.TEST");
    }

    #[test]
    fn test_parse_roundtrip() {
        let sid = SourceId::parse("FDSN:GE_DAV_10_H_H_E").unwrap();
        assert_eq!(sid, SourceId::channel("GE", "DAV", "10", "HHE"));
        let sid = SourceId::parse("GE_DAV").unwrap();
        assert_eq!(sid, SourceId::station("GE", "DAV"));
        assert_eq!(SourceId::parse("A_B_C"), None);
    }

    #[test]
    fn test_empty_location() {
        let sid = SourceId::channel("JP", "TSK", "", "LHN");
        assert_eq!(sid.to_string(), "FDSN:JP_TSK__L_H_N");
    }

    #[test]
    fn test_short_channel_code() {
        let sid = SourceId::channel("XX", "A", "", "B");
        assert_eq!(sid.to_string(), "FDSN:XX_A__B__");
    }
}
