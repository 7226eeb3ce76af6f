//! Canonical station metadata model.
//!
//! A [`Document`] owns a tree of [`Network`] → [`Station`] → [`Channel`]
//! plus a [`UnitTable`] that every unit reference in the tree indexes into.
//! Codecs build documents during a read; callers edit them through the
//! path-based mutation API, which marks the touched subtree dirty so the
//! validator can re-check only what changed.

use std::collections::HashMap;

use crate::details::{
    EquipmentDates, ExternalReference, NodeDetails, Operator, Person, SampleRateRatio, SiteDetails,
};
use crate::response::Response;
use crate::sid::SourceId;
use crate::source::SourceText;
use crate::time::NanoTime;
use crate::{MetadataError, Result};

/// Change marker set by mutations and cleared by the normalizer. It never
/// takes part in equality.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DirtyFlag(pub(crate) bool);

impl PartialEq for DirtyFlag {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

/// Key of a [`Unit`] inside a document's [`UnitTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub(crate) u32);

impl UnitId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A physical unit, e.g. `M/S` "Velocity in meters per second".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unit {
    pub name: String,
    pub description: Option<String>,
}

impl Unit {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Interned table of units owned by a document.
///
/// Identical units share one [`UnitId`]. Codecs never renumber the table
/// while reading; the normalizer compacts it into canonical order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitTable {
    units: Vec<Unit>,
    index: HashMap<Unit, UnitId>,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id of `unit`, adding it if not yet present.
    pub fn intern(&mut self, unit: Unit) -> UnitId {
        if let Some(&id) = self.index.get(&unit) {
            return id;
        }
        let id = UnitId(self.units.len() as u32);
        self.index.insert(unit.clone(), id);
        self.units.push(unit);
        id
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id.index())
    }

    /// Unit name, or an empty string for a dangling id.
    pub fn name(&self, id: UnitId) -> &str {
        self.get(id).map_or("", |u| u.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &Unit)> {
        self.units
            .iter()
            .enumerate()
            .map(|(i, u)| (UnitId(i as u32), u))
    }

    /// Rebuild the table so that units appear in `order` first (first
    /// occurrence wins), followed by unreferenced units in their previous
    /// order. Returns the old-index → new-id mapping.
    pub(crate) fn compact(&mut self, order: &[UnitId]) -> Vec<UnitId> {
        let old = std::mem::take(&mut self.units);
        self.index.clear();
        let mut remap: Vec<Option<UnitId>> = vec![None; old.len()];
        let referenced = order.iter().map(|id| id.index());
        let unreferenced = 0..old.len();
        for i in referenced.chain(unreferenced) {
            if i < old.len() && remap[i].is_none() {
                remap[i] = Some(self.intern(old[i].clone()));
            }
        }
        remap
            .into_iter()
            .enumerate()
            .map(|(i, id)| id.unwrap_or(UnitId(i as u32)))
            .collect()
    }
}

/// An unknown XML element kept verbatim for re-emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Qualified element name, e.g. `iris:Alias`.
    pub element: String,
    /// The complete raw element, start tag through end tag.
    pub fragment: String,
    /// Standard sibling element it followed, `None` when it came before
    /// all of them. The writer puts it back after that element.
    pub after: Option<String>,
}

impl Extension {
    pub fn new(element: &str, fragment: &str) -> Self {
        Self {
            element: element.into(),
            fragment: fragment.into(),
            after: None,
        }
    }

    pub fn after(mut self, element: &str) -> Self {
        self.after = Some(element.into());
        self
    }
}

/// An unknown or unsupported SEED blockette kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueBlockette {
    pub blockette_type: u16,
    /// Record type (`V`, `A`, `S` or `T`) it was read from.
    pub record_type: char,
    /// Blockette body after the 7-byte type/length header.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Comment {
    pub value: String,
    pub begin: Option<NanoTime>,
    pub end: Option<NanoTime>,
    /// StationXML `id` and `subject` attributes.
    pub id: Option<u32>,
    pub subject: Option<String>,
    pub authors: Vec<Person>,
    pub extensions: Vec<Extension>,
}

impl Comment {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Sensor or data logger description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Equipment {
    pub equipment_type: Option<String>,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub dates: EquipmentDates,
    pub resource_id: Option<String>,
    pub extensions: Vec<Extension>,
}

impl Equipment {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Data format description (SEED blockette 30).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataFormat {
    pub name: String,
    pub family: u16,
    pub keys: Vec<String>,
}

/// Document-level header fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentInfo {
    /// Originating organization (StationXML `Source`, SEED 010 field 10).
    pub source: String,
    pub sender: Option<String>,
    pub module: Option<String>,
    pub module_uri: Option<String>,
    pub created: Option<NanoTime>,
    /// Volume label (SEED 010 field 11).
    pub label: Option<String>,
    pub schema_version: Option<String>,
    /// Namespace prefixes declared on the StationXML root, as
    /// `(prefix, uri)` pairs, so preserved extensions stay well-formed.
    pub namespaces: Vec<(String, String)>,
    /// Effective time span of a SEED volume.
    pub span_start: Option<NanoTime>,
    pub span_end: Option<NanoTime>,
}

/// Cited source dictionary entry (SEED blockette 032).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CitedSource {
    /// Lookup code other blockettes refer to it by.
    pub key: u32,
    pub name: String,
    pub date: String,
    pub publisher: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub code: String,
    pub description: Option<String>,
    pub start_date: Option<NanoTime>,
    pub end_date: Option<NanoTime>,
    pub details: NodeDetails,
    pub comments: Vec<Comment>,
    pub operators: Vec<Operator>,
    pub total_number_stations: Option<u32>,
    pub selected_number_stations: Option<u32>,
    pub extensions: Vec<Extension>,
    pub(crate) stations: Vec<Station>,
    pub(crate) source: SourceText,
    pub(crate) dirty: DirtyFlag,
}

impl Network {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.into(),
            description: None,
            start_date: None,
            end_date: None,
            details: NodeDetails::default(),
            comments: Vec::new(),
            operators: Vec::new(),
            total_number_stations: None,
            selected_number_stations: None,
            extensions: Vec::new(),
            stations: Vec::new(),
            source: SourceText::default(),
            dirty: DirtyFlag(true),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_dates(mut self, start: Option<NanoTime>, end: Option<NanoTime>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_station(mut self, station: Station) -> Self {
        self.stations.push(station);
        self
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn source_id(&self) -> SourceId {
        SourceId::network(&self.code)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.0 || self.stations.iter().any(Station::is_dirty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub code: String,
    pub description: Option<String>,
    pub start_date: NanoTime,
    pub end_date: Option<NanoTime>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub site_name: String,
    pub site: SiteDetails,
    pub details: NodeDetails,
    pub comments: Vec<Comment>,
    pub water_level: Option<f64>,
    pub vault: Option<String>,
    pub geology: Option<String>,
    pub equipment: Vec<Equipment>,
    pub operators: Vec<Operator>,
    pub creation_date: Option<NanoTime>,
    pub termination_date: Option<NanoTime>,
    pub total_number_channels: Option<u32>,
    pub selected_number_channels: Option<u32>,
    pub external_references: Vec<ExternalReference>,
    pub extensions: Vec<Extension>,
    pub blockettes: Vec<OpaqueBlockette>,
    pub(crate) channels: Vec<Channel>,
    pub(crate) source: SourceText,
    pub(crate) dirty: DirtyFlag,
}

impl Station {
    pub fn new(code: &str, start_date: NanoTime) -> Self {
        Self {
            code: code.into(),
            description: None,
            start_date,
            end_date: None,
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
            site_name: String::new(),
            site: SiteDetails::default(),
            details: NodeDetails::default(),
            comments: Vec::new(),
            water_level: None,
            vault: None,
            geology: None,
            equipment: Vec::new(),
            operators: Vec::new(),
            creation_date: None,
            termination_date: None,
            total_number_channels: None,
            selected_number_channels: None,
            external_references: Vec::new(),
            extensions: Vec::new(),
            blockettes: Vec::new(),
            channels: Vec::new(),
            source: SourceText::default(),
            dirty: DirtyFlag(true),
        }
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64, elevation: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self.elevation = elevation;
        self
    }

    pub fn with_site_name(mut self, name: &str) -> Self {
        self.site_name = name.into();
        self
    }

    pub fn with_end_date(mut self, end: NanoTime) -> Self {
        self.end_date = Some(end);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.0 || self.channels.iter().any(|c| c.dirty.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub code: String,
    /// Two-character location code; empty means the default location.
    pub location_code: String,
    pub description: Option<String>,
    pub start_date: NanoTime,
    pub end_date: Option<NanoTime>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
    pub depth: f64,
    pub azimuth: Option<f64>,
    pub dip: Option<f64>,
    pub water_level: Option<f64>,
    pub sample_rate: f64,
    pub sample_rate_ratio: Option<SampleRateRatio>,
    /// StationXML 1.0 `StorageFormat`, dropped from 1.1.
    pub storage_format: Option<String>,
    pub clock_drift: Option<f64>,
    /// SEED channel flag letters, e.g. "CG".
    pub flags: String,
    pub signal_units: Option<UnitId>,
    pub calibration_units: Option<UnitId>,
    pub sensor: Equipment,
    pub pre_amplifier: Equipment,
    pub data_logger: Equipment,
    pub equipment: Vec<Equipment>,
    pub details: NodeDetails,
    pub external_references: Vec<ExternalReference>,
    pub data_format: Option<DataFormat>,
    /// Base-2 exponent of the data record length.
    pub record_length_exponent: Option<u8>,
    pub comments: Vec<Comment>,
    pub response: Option<Response>,
    pub extensions: Vec<Extension>,
    pub blockettes: Vec<OpaqueBlockette>,
    pub(crate) source: SourceText,
    pub(crate) dirty: DirtyFlag,
}

impl Channel {
    pub fn new(code: &str, location_code: &str, start_date: NanoTime) -> Self {
        Self {
            code: code.into(),
            location_code: location_code.into(),
            description: None,
            start_date,
            end_date: None,
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0.0,
            depth: 0.0,
            azimuth: None,
            dip: None,
            water_level: None,
            sample_rate: 0.0,
            sample_rate_ratio: None,
            storage_format: None,
            clock_drift: None,
            flags: String::new(),
            signal_units: None,
            calibration_units: None,
            sensor: Equipment::default(),
            pre_amplifier: Equipment::default(),
            data_logger: Equipment::default(),
            equipment: Vec::new(),
            details: NodeDetails::default(),
            external_references: Vec::new(),
            data_format: None,
            record_length_exponent: None,
            comments: Vec::new(),
            response: None,
            extensions: Vec::new(),
            blockettes: Vec::new(),
            source: SourceText::default(),
            dirty: DirtyFlag(true),
        }
    }

    pub fn with_coordinates(
        mut self,
        latitude: f64,
        longitude: f64,
        elevation: f64,
        depth: f64,
    ) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self.elevation = elevation;
        self.depth = depth;
        self
    }

    pub fn with_orientation(mut self, azimuth: f64, dip: f64) -> Self {
        self.azimuth = Some(azimuth);
        self.dip = Some(dip);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_end_date(mut self, end: NanoTime) -> Self {
        self.end_date = Some(end);
        self
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.0
    }
}

/// Address of a station within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StationPath {
    pub network: usize,
    pub station: usize,
}

/// Address of a channel within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelPath {
    pub network: usize,
    pub station: usize,
    pub channel: usize,
}

impl ChannelPath {
    pub fn station_path(self) -> StationPath {
        StationPath {
            network: self.network,
            station: self.station,
        }
    }
}

/// A station together with its parent network, as yielded by
/// [`Document::stations`].
#[derive(Debug, Clone, Copy)]
pub struct StationRef<'a> {
    pub path: StationPath,
    pub network: &'a Network,
    pub station: &'a Station,
}

impl StationRef<'_> {
    pub fn source_id(&self) -> SourceId {
        SourceId::station(&self.network.code, &self.station.code)
    }
}

/// A channel together with its ancestors, as yielded by
/// [`Document::channels`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelRef<'a> {
    pub path: ChannelPath,
    pub network: &'a Network,
    pub station: &'a Station,
    pub channel: &'a Channel,
}

impl ChannelRef<'_> {
    pub fn source_id(&self) -> SourceId {
        SourceId::channel(
            &self.network.code,
            &self.station.code,
            &self.channel.location_code,
            &self.channel.code,
        )
    }
}

/// One loaded metadata document.
///
/// # Examples
///
/// ```
/// use stationmeta_rs::{Channel, Document, Network, NanoTime, Station};
///
/// let start = NanoTime::from_day(2020, 1);
/// let mut doc = Document::new();
/// let net = doc.add_network(Network::new("XX"));
/// let sta = doc.add_station(net, Station::new("TEST", start)).unwrap();
/// doc.add_channel(sta, Channel::new("BHZ", "00", start).with_sample_rate(20.0))
///     .unwrap();
///
/// let ids: Vec<String> = doc.channels().map(|c| c.source_id().nslc()).collect();
/// assert_eq!(ids, vec!["XX.TEST.00.BHZ"]);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub info: DocumentInfo,
    pub units: UnitTable,
    pub extensions: Vec<Extension>,
    /// Cited source dictionary of a SEED volume.
    pub cited_sources: Vec<CitedSource>,
    /// Opaque volume-level blockettes (V, A and T records).
    pub blockettes: Vec<OpaqueBlockette>,
    networks: Vec<Network>,
    pub(crate) source: SourceText,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn network(&self, index: usize) -> Option<&Network> {
        self.networks.get(index)
    }

    pub fn station(&self, path: StationPath) -> Option<&Station> {
        self.networks.get(path.network)?.stations.get(path.station)
    }

    pub fn channel(&self, path: ChannelPath) -> Option<&Channel> {
        self.station(path.station_path())?.channels.get(path.channel)
    }

    /// Lazily iterate all stations in document order. The iterator borrows
    /// the document and can be recreated at any time.
    pub fn stations(&self) -> impl Iterator<Item = StationRef<'_>> {
        self.networks.iter().enumerate().flat_map(|(n, network)| {
            network
                .stations
                .iter()
                .enumerate()
                .map(move |(s, station)| StationRef {
                    path: StationPath {
                        network: n,
                        station: s,
                    },
                    network,
                    station,
                })
        })
    }

    /// Lazily iterate all channels in document order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelRef<'_>> {
        self.stations().flat_map(|sr| {
            sr.station
                .channels
                .iter()
                .enumerate()
                .map(move |(c, channel)| ChannelRef {
                    path: ChannelPath {
                        network: sr.path.network,
                        station: sr.path.station,
                        channel: c,
                    },
                    network: sr.network,
                    station: sr.station,
                    channel,
                })
        })
    }

    /// Find a channel by its codes. Returns the first matching epoch.
    pub fn find_channel(
        &self,
        network: &str,
        station: &str,
        location: &str,
        channel: &str,
    ) -> Option<ChannelRef<'_>> {
        self.channels().find(|c| {
            c.network.code == network
                && c.station.code == station
                && c.channel.location_code == location
                && c.channel.code == channel
        })
    }

    // --- mutation ---

    pub fn add_network(&mut self, mut network: Network) -> usize {
        network.dirty.0 = true;
        self.networks.push(network);
        self.networks.len() - 1
    }

    pub fn add_station(&mut self, network: usize, mut station: Station) -> Result<StationPath> {
        let net = self.network_entry(network)?;
        station.dirty.0 = true;
        net.stations.push(station);
        net.dirty.0 = true;
        Ok(StationPath {
            network,
            station: net.stations.len() - 1,
        })
    }

    pub fn add_channel(&mut self, path: StationPath, mut channel: Channel) -> Result<ChannelPath> {
        let station = self.station_entry(path)?;
        channel.dirty.0 = true;
        station.channels.push(channel);
        station.dirty.0 = true;
        Ok(ChannelPath {
            network: path.network,
            station: path.station,
            channel: station.channels.len() - 1,
        })
    }

    pub fn remove_network(&mut self, index: usize) -> Result<Network> {
        self.network_entry(index)?;
        Ok(self.networks.remove(index))
    }

    pub fn remove_station(&mut self, path: StationPath) -> Result<Station> {
        self.station_entry(path)?;
        let net = self.network_entry(path.network)?;
        net.dirty.0 = true;
        Ok(net.stations.remove(path.station))
    }

    pub fn remove_channel(&mut self, path: ChannelPath) -> Result<Channel> {
        self.channel_entry(path)?;
        let station = self.station_entry(path.station_path())?;
        station.dirty.0 = true;
        Ok(station.channels.remove(path.channel))
    }

    pub fn replace_network(&mut self, index: usize, mut network: Network) -> Result<Network> {
        network.dirty.0 = true;
        Ok(std::mem::replace(self.network_entry(index)?, network))
    }

    pub fn replace_station(&mut self, path: StationPath, mut station: Station) -> Result<Station> {
        station.dirty.0 = true;
        Ok(std::mem::replace(self.station_entry(path)?, station))
    }

    pub fn replace_channel(&mut self, path: ChannelPath, mut channel: Channel) -> Result<Channel> {
        channel.dirty.0 = true;
        Ok(std::mem::replace(self.channel_entry(path)?, channel))
    }

    /// Replace a channel's response, returning the previous one.
    pub fn replace_response(
        &mut self,
        path: ChannelPath,
        response: Option<Response>,
    ) -> Result<Option<Response>> {
        let channel = self.channel_mut(path)?;
        Ok(std::mem::replace(&mut channel.response, response))
    }

    /// Mutable access to a network's own fields. Marks it dirty.
    pub fn network_mut(&mut self, index: usize) -> Result<&mut Network> {
        let net = self.network_entry(index)?;
        net.dirty.0 = true;
        Ok(net)
    }

    /// Mutable access to a station's own fields. Marks it dirty.
    pub fn station_mut(&mut self, path: StationPath) -> Result<&mut Station> {
        let station = self.station_entry(path)?;
        station.dirty.0 = true;
        Ok(station)
    }

    /// Mutable access to a channel and its response. Marks it dirty.
    pub fn channel_mut(&mut self, path: ChannelPath) -> Result<&mut Channel> {
        let channel = self.channel_entry(path)?;
        channel.dirty.0 = true;
        Ok(channel)
    }

    fn network_entry(&mut self, index: usize) -> Result<&mut Network> {
        self.networks
            .get_mut(index)
            .ok_or_else(|| MetadataError::Structure(format!("no network at index {index}")))
    }

    fn station_entry(&mut self, path: StationPath) -> Result<&mut Station> {
        self.network_entry(path.network)?
            .stations
            .get_mut(path.station)
            .ok_or_else(|| {
                MetadataError::Structure(format!(
                    "no station {} in network {}",
                    path.station, path.network
                ))
            })
    }

    fn channel_entry(&mut self, path: ChannelPath) -> Result<&mut Channel> {
        self.station_entry(path.station_path())?
            .channels
            .get_mut(path.channel)
            .ok_or_else(|| {
                MetadataError::Structure(format!(
                    "no channel {} in station {}.{}",
                    path.channel, path.network, path.station
                ))
            })
    }

    pub(crate) fn networks_mut(&mut self) -> &mut Vec<Network> {
        &mut self.networks
    }

    pub fn is_dirty(&self) -> bool {
        self.networks.iter().any(Network::is_dirty)
    }

    pub(crate) fn mark_clean(&mut self) {
        for net in &mut self.networks {
            net.dirty.0 = false;
            for station in &mut net.stations {
                station.dirty.0 = false;
                for channel in &mut station.channels {
                    channel.dirty.0 = false;
                }
            }
        }
    }

    /// Visit every unit reference in canonical order: per channel, signal
    /// then calibration units, then each stage's input and output, then the
    /// sensitivity's and the instrument polynomial's input and output.
    pub(crate) fn for_each_unit_ref(&mut self, mut f: impl FnMut(&mut Option<UnitId>)) {
        for net in &mut self.networks {
            for station in &mut net.stations {
                for channel in &mut station.channels {
                    f(&mut channel.signal_units);
                    f(&mut channel.calibration_units);
                    if let Some(response) = &mut channel.response {
                        for stage in &mut response.stages {
                            f(&mut stage.input_units);
                            f(&mut stage.output_units);
                        }
                        if let Some(s) = &mut response.sensitivity {
                            f(&mut s.input_units);
                            f(&mut s.output_units);
                        }
                        if let Some(p) = &mut response.instrument_polynomial {
                            f(&mut p.input_units);
                            f(&mut p.output_units);
                        }
                    }
                }
            }
        }
    }

    /// Referenced unit ids in canonical order, with repeats.
    pub(crate) fn unit_refs(&self) -> Vec<UnitId> {
        let mut refs = Vec::new();
        for c in self.channels() {
            let channel = c.channel;
            refs.extend(channel.signal_units);
            refs.extend(channel.calibration_units);
            if let Some(response) = &channel.response {
                for stage in response.stages() {
                    refs.extend(stage.input_units);
                    refs.extend(stage.output_units);
                }
                if let Some(s) = &response.sensitivity {
                    refs.extend(s.input_units);
                    refs.extend(s.output_units);
                }
                if let Some(p) = &response.instrument_polynomial {
                    refs.extend(p.input_units);
                    refs.extend(p.output_units);
                }
            }
        }
        refs
    }

    /// Renumber the unit table into canonical first-reference order.
    pub(crate) fn compact_units(&mut self) {
        let order = self.unit_refs();
        let remap = self.units.compact(&order);
        self.for_each_unit_ref(|unit| {
            if let Some(id) = unit {
                if let Some(&new) = remap.get(id.index()) {
                    *id = new;
                }
            }
        });
    }
}
