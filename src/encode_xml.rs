//! Encode a [`Document`] as FDSN StationXML 1.1.
//!
//! Elements are written in schema order with two-space indentation, one
//! element per line. Numbers use the shortest representation that parses
//! back to the same `f64`. Preserved extension elements go back after the
//! standard element they followed when read.
//!
//! A node read from StationXML and not changed since is written as its
//! original text, so loading and saving a document keeps the dates, number
//! formatting and layout of everything that was not edited.

use log::{debug, info, warn};
use quick_xml::escape::escape;

use crate::details::{DataAvailability, ExternalReference, Identifier, NodeDetails, Operator, Person};
use crate::model::{Channel, Comment, Document, Equipment, Extension, Network, Station, UnitId};
use crate::response::{InstrumentPolynomial, Polynomial, Response, Stage, StageKind};
use crate::source::SourceText;
use crate::time::NanoTime;
use crate::types::{Format, FrequencyUnits, channel_type_name};
use crate::warning::Warning;

/// FDSN StationXML namespace.
pub const STATION_XML_NAMESPACE: &str = "http://www.fdsn.org/xml/station/1";

/// Schema version written when the document does not carry one.
pub const SCHEMA_VERSION: &str = "1.1";

// Child elements of each node type in schema order. Reader and writer
// share them to place preserved extensions.
pub(crate) const ROOT_SLOTS: &[&str] = &["Source", "Sender", "Module", "ModuleURI", "Created", "Network"];
pub(crate) const NETWORK_SLOTS: &[&str] = &[
    "Description",
    "Identifier",
    "Comment",
    "DataAvailability",
    "Operator",
    "TotalNumberStations",
    "SelectedNumberStations",
    "Station",
];
pub(crate) const STATION_SLOTS: &[&str] = &[
    "Description",
    "Identifier",
    "Comment",
    "DataAvailability",
    "Latitude",
    "Longitude",
    "Elevation",
    "Site",
    "WaterLevel",
    "Vault",
    "Geology",
    "Equipment",
    "Operator",
    "CreationDate",
    "TerminationDate",
    "TotalNumberChannels",
    "SelectedNumberChannels",
    "ExternalReference",
    "Channel",
];
pub(crate) const CHANNEL_SLOTS: &[&str] = &[
    "Description",
    "Identifier",
    "Comment",
    "DataAvailability",
    "ExternalReference",
    "Latitude",
    "Longitude",
    "Elevation",
    "Depth",
    "Azimuth",
    "Dip",
    "WaterLevel",
    "Type",
    "SampleRate",
    "SampleRateRatio",
    "StorageFormat",
    "ClockDrift",
    "CalibrationUnits",
    "Sensor",
    "PreAmplifier",
    "DataLogger",
    "Equipment",
    "Response",
];
pub(crate) const SITE_SLOTS: &[&str] = &["Name", "Description", "Town", "County", "Region", "Country"];
pub(crate) const COMMENT_SLOTS: &[&str] = &["Value", "BeginEffectiveTime", "EndEffectiveTime", "Author"];
pub(crate) const EQUIPMENT_SLOTS: &[&str] = &[
    "Type",
    "Description",
    "Manufacturer",
    "Vendor",
    "Model",
    "SerialNumber",
    "InstallationDate",
    "RemovalDate",
    "CalibrationDate",
];
pub(crate) const RESPONSE_SLOTS: &[&str] = &["InstrumentSensitivity", "InstrumentPolynomial", "Stage"];
pub(crate) const STAGE_SLOTS: &[&str] = &[
    "PolesZeros",
    "Coefficients",
    "ResponseList",
    "FIR",
    "Polynomial",
    "Decimation",
    "StageGain",
];

/// Format a number as the shortest text that parses back to the same value.
pub fn format_number(value: f64) -> String {
    format!("{value:?}")
}

/// How a node that was read from StationXML is written back.
enum Original {
    /// Unchanged: its original text was written.
    Whole,
    /// Only children changed: the original text before the children was
    /// written; this is the text after them.
    Around(String),
    Render,
}

struct XmlWriter<'a> {
    doc: &'a Document,
    out: String,
    depth: usize,
    /// Write unchanged nodes as their original text.
    keep_original: bool,
    warnings: Vec<Warning>,
}

impl<'a> XmlWriter<'a> {
    fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            out: String::new(),
            depth: 0,
            keep_original: true,
            warnings: Vec::new(),
        }
    }

    fn canonical(doc: &'a Document) -> Self {
        Self {
            keep_original: false,
            ..Self::new(doc)
        }
    }

    fn line(&mut self, content: &str) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(content);
        self.out.push('\n');
    }

    fn tag(name: &str, attributes: &[(&str, String)]) -> String {
        let mut tag = format!("<{name}");
        for (key, value) in attributes {
            tag.push_str(&format!(" {key}=\"{}\"", escape(value.as_str())));
        }
        tag
    }

    fn open(&mut self, name: &str, attributes: &[(&str, String)]) {
        let tag = Self::tag(name, attributes) + ">";
        self.line(&tag);
        self.depth += 1;
    }

    fn close(&mut self, name: &str) {
        self.depth -= 1;
        self.line(&format!("</{name}>"));
    }

    fn empty(&mut self, name: &str, attributes: &[(&str, String)]) {
        let tag = Self::tag(name, attributes) + "/>";
        self.line(&tag);
    }

    fn text(&mut self, name: &str, value: &str) {
        self.text_with(name, &[], value);
    }

    fn text_with(&mut self, name: &str, attributes: &[(&str, String)], value: &str) {
        let tag = Self::tag(name, attributes);
        self.line(&format!("{tag}>{}</{name}>", escape(value)));
    }

    fn optional_text(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.text(name, value);
        }
    }

    fn number(&mut self, name: &str, value: f64) {
        self.text(name, &format_number(value));
    }

    fn optional_number(&mut self, name: &str, value: Option<f64>) {
        if let Some(value) = value {
            self.number(name, value);
        }
    }

    fn integer(&mut self, name: &str, value: Option<u32>) {
        if let Some(value) = value {
            self.text(name, &value.to_string());
        }
    }

    /// Number with an optional `plusError`/`minusError` pair.
    fn number_with_error(&mut self, name: &str, value: f64, error: f64) {
        if error == 0.0 {
            self.number(name, value);
        } else {
            let error = format_number(error);
            self.line(&format!(
                "<{name} plusError=\"{error}\" minusError=\"{error}\">{}</{name}>",
                format_number(value)
            ));
        }
    }

    fn time(&mut self, name: &str, value: Option<NanoTime>) {
        if let Some(value) = value {
            self.text(name, &value.to_iso_string());
        }
    }

    fn not_representable(&mut self, location: &str, what: String) {
        if self.keep_original {
            warn!("{location}: {what} has no StationXML representation");
            self.warnings.push(Warning::NotRepresentable {
                location: location.to_string(),
                what,
                format: "StationXML",
            });
        }
    }

    /// Write the extensions that followed `after` when read.
    fn anchored(&mut self, extensions: &[Extension], after: Option<&str>) {
        for extension in extensions.iter().filter(|e| e.after.as_deref() == after) {
            self.line(&extension.fragment);
        }
    }

    /// Write a node's children slot by slot in schema order, each followed
    /// by the extensions anchored to it.
    fn slots(
        &mut self,
        extensions: &[Extension],
        slots: &[&str],
        mut write: impl FnMut(&mut Self, &str),
    ) {
        self.anchored(extensions, None);
        for slot in slots {
            write(self, slot);
            self.anchored(extensions, Some(slot));
        }
        let stray = extensions
            .iter()
            .filter(|e| e.after.as_deref().is_some_and(|a| !slots.contains(&a)));
        for extension in stray {
            self.line(&extension.fragment);
        }
    }

    /// Check a node against the text it was read from.
    fn original(
        &mut self,
        source: &SourceText,
        whole: impl Fn(&mut XmlWriter<'a>),
        own: impl Fn(&mut XmlWriter<'a>),
    ) -> Original {
        if !self.keep_original || !source.is_from(Format::StationXml) {
            return Original::Render;
        }
        let canonical = self.render(whole);
        if let Some(text) = source.whole(canonical.as_bytes()).and_then(utf8) {
            self.out.push_str(text);
            self.out.push('\n');
            return Original::Whole;
        }
        let canonical = self.render(own);
        match source.around_children(canonical.as_bytes()) {
            Some((head, tail)) => match (utf8(head), utf8(tail)) {
                (Some(head), Some(tail)) => {
                    self.out.push_str(head);
                    Original::Around(tail.to_string())
                }
                _ => Original::Render,
            },
            None => Original::Render,
        }
    }

    fn render(&self, write: impl Fn(&mut XmlWriter<'a>)) -> String {
        let mut writer = XmlWriter::canonical(self.doc);
        write(&mut writer);
        writer.out
    }

    fn identifiers(&mut self, identifiers: &[Identifier]) {
        for identifier in identifiers {
            let attributes: Vec<(&str, String)> = identifier
                .kind
                .iter()
                .map(|kind| ("type", kind.clone()))
                .collect();
            self.text_with("Identifier", &attributes, &identifier.value);
        }
    }

    fn data_availability(&mut self, availability: Option<&DataAvailability>) {
        let Some(availability) = availability else {
            return;
        };
        self.open("DataAvailability", &[]);
        if let Some((start, end)) = availability.extent {
            self.empty(
                "Extent",
                &[("start", start.to_iso_string()), ("end", end.to_iso_string())],
            );
        }
        for span in &availability.spans {
            let mut attributes = vec![
                ("start", span.start.to_iso_string()),
                ("end", span.end.to_iso_string()),
                ("numberSegments", span.number_segments.to_string()),
            ];
            if let Some(tear) = span.maximum_time_tear {
                attributes.push(("maximumTimeTear", format_number(tear)));
            }
            self.empty("Span", &attributes);
        }
        self.close("DataAvailability");
    }

    /// The children every network, station and channel starts with.
    fn base_slot(&mut self, slot: &str, description: Option<&str>, details: &NodeDetails, comments: &[Comment]) {
        match slot {
            "Description" => self.optional_text("Description", description),
            "Identifier" => self.identifiers(&details.identifiers),
            "Comment" => self.comments(comments),
            "DataAvailability" => self.data_availability(details.data_availability.as_ref()),
            _ => {}
        }
    }

    fn comments(&mut self, comments: &[Comment]) {
        for comment in comments {
            let mut attributes = Vec::new();
            if let Some(id) = comment.id {
                attributes.push(("id", id.to_string()));
            }
            if let Some(subject) = &comment.subject {
                attributes.push(("subject", subject.clone()));
            }
            self.open("Comment", &attributes);
            self.slots(&comment.extensions, COMMENT_SLOTS, |w, slot| match slot {
                "Value" => w.text("Value", &comment.value),
                "BeginEffectiveTime" => w.time("BeginEffectiveTime", comment.begin),
                "EndEffectiveTime" => w.time("EndEffectiveTime", comment.end),
                "Author" => {
                    for author in &comment.authors {
                        w.person("Author", author);
                    }
                }
                _ => {}
            });
            self.close("Comment");
        }
    }

    fn person(&mut self, name: &str, person: &Person) {
        self.open(name, &[]);
        for value in &person.names {
            self.text("Name", value);
        }
        for value in &person.agencies {
            self.text("Agency", value);
        }
        for value in &person.emails {
            self.text("Email", value);
        }
        for phone in &person.phones {
            let attributes: Vec<(&str, String)> = phone
                .description
                .iter()
                .map(|d| ("description", d.clone()))
                .collect();
            self.open("Phone", &attributes);
            self.integer("CountryCode", phone.country_code);
            self.integer("AreaCode", Some(phone.area_code));
            self.text("PhoneNumber", &phone.phone_number);
            self.close("Phone");
        }
        self.close(name);
    }

    fn operators(&mut self, operators: &[Operator]) {
        for operator in operators {
            self.open("Operator", &[]);
            self.text("Agency", &operator.agency);
            for contact in &operator.contacts {
                self.person("Contact", contact);
            }
            self.optional_text("WebSite", operator.website.as_deref());
            self.close("Operator");
        }
    }

    fn external_references(&mut self, references: &[ExternalReference]) {
        for reference in references {
            self.open("ExternalReference", &[]);
            self.text("URI", &reference.uri);
            self.text("Description", &reference.description);
            self.close("ExternalReference");
        }
    }

    fn units(&mut self, name: &str, id: Option<UnitId>) {
        let doc = self.doc;
        let unit = id.and_then(|id| doc.units.get(id));
        self.open(name, &[]);
        self.text("Name", unit.map_or("", |u| u.name.as_str()));
        if let Some(description) = unit.and_then(|u| u.description.as_deref()) {
            self.text("Description", description);
        }
        self.close(name);
    }

    fn equipment(&mut self, name: &str, equipment: &Equipment) {
        if equipment.is_empty() {
            return;
        }
        let attributes: Vec<(&str, String)> = equipment
            .resource_id
            .iter()
            .map(|id| ("resourceId", id.clone()))
            .collect();
        self.open(name, &attributes);
        self.slots(&equipment.extensions, EQUIPMENT_SLOTS, |w, slot| match slot {
            "Type" => w.optional_text("Type", equipment.equipment_type.as_deref()),
            "Description" => w.optional_text("Description", equipment.description.as_deref()),
            "Manufacturer" => w.optional_text("Manufacturer", equipment.manufacturer.as_deref()),
            "Vendor" => w.optional_text("Vendor", equipment.vendor.as_deref()),
            "Model" => w.optional_text("Model", equipment.model.as_deref()),
            "SerialNumber" => w.optional_text("SerialNumber", equipment.serial_number.as_deref()),
            "InstallationDate" => w.time("InstallationDate", equipment.dates.installation),
            "RemovalDate" => w.time("RemovalDate", equipment.dates.removal),
            "CalibrationDate" => {
                for date in &equipment.dates.calibrations {
                    w.time("CalibrationDate", Some(*date));
                }
            }
            _ => {}
        });
        self.close(name);
    }

    fn document(&mut self) {
        let doc = self.doc;
        if self.keep_original && doc.source.is_from(Format::StationXml) {
            let canonical = self.render(|w| w.document_body(true));
            if let Some(text) = doc.source.whole(canonical.as_bytes()).and_then(utf8) {
                debug!("document unchanged since read; writing the original text");
                self.out.push_str(text);
                return;
            }
            let canonical = self.render(|w| w.document_body(false));
            if let Some((head, tail)) = doc.source.around_children(canonical.as_bytes()) {
                if let (Some(head), Some(tail)) = (utf8(head), utf8(tail)) {
                    self.out.push_str(head);
                    self.depth += 1;
                    for network in doc.networks() {
                        self.network(network);
                    }
                    self.depth -= 1;
                    self.out.push_str(tail);
                    return;
                }
            }
        }
        self.document_body(true);
    }

    fn document_body(&mut self, children: bool) {
        let doc = self.doc;
        let info = &doc.info;
        self.out
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let mut attributes = vec![("xmlns", STATION_XML_NAMESPACE.to_string())];
        let prefixes: Vec<(String, String)> = info
            .namespaces
            .iter()
            .map(|(prefix, uri)| (format!("xmlns:{prefix}"), uri.clone()))
            .collect();
        attributes.extend(prefixes.iter().map(|(k, v)| (k.as_str(), v.clone())));
        attributes.push((
            "schemaVersion",
            info.schema_version
                .clone()
                .unwrap_or_else(|| SCHEMA_VERSION.to_string()),
        ));
        self.open("FDSNStationXML", &attributes);
        self.slots(&doc.extensions, ROOT_SLOTS, |w, slot| match slot {
            "Source" => w.text("Source", &info.source),
            "Sender" => w.optional_text("Sender", info.sender.as_deref()),
            "Module" => w.optional_text("Module", info.module.as_deref()),
            "ModuleURI" => w.optional_text("ModuleURI", info.module_uri.as_deref()),
            "Created" => w.time("Created", info.created),
            "Network" if children => {
                for network in doc.networks() {
                    w.network(network);
                }
            }
            _ => {}
        });
        self.close("FDSNStationXML");
        if children {
            if !doc.blockettes.is_empty() {
                self.not_representable(
                    "volume",
                    format!("{} SEED volume blockettes", doc.blockettes.len()),
                );
            }
            if !doc.cited_sources.is_empty() {
                self.not_representable(
                    "volume",
                    format!("{} cited sources", doc.cited_sources.len()),
                );
            }
        }
    }

    fn network(&mut self, network: &Network) {
        let original = self.original(
            &network.source,
            |w| w.network_body(network, true),
            |w| w.network_body(network, false),
        );
        match original {
            Original::Whole => {}
            Original::Around(tail) => {
                self.depth += 1;
                for station in network.stations() {
                    self.station(network, station);
                }
                self.depth -= 1;
                self.out.push_str(&tail);
                self.out.push('\n');
            }
            Original::Render => self.network_body(network, true),
        }
    }

    fn network_body(&mut self, network: &Network, children: bool) {
        let mut attributes = vec![("code", network.code.clone())];
        push_dates(&mut attributes, network.start_date, network.end_date);
        attributes.extend(network.details.attributes());
        self.open("Network", &attributes);
        self.slots(&network.extensions, NETWORK_SLOTS, |w, slot| match slot {
            "Operator" => w.operators(&network.operators),
            "TotalNumberStations" => w.integer(slot, network.total_number_stations),
            "SelectedNumberStations" => w.integer(slot, network.selected_number_stations),
            "Station" if children => {
                for station in network.stations() {
                    w.station(network, station);
                }
            }
            _ => w.base_slot(
                slot,
                network.description.as_deref(),
                &network.details,
                &network.comments,
            ),
        });
        self.close("Network");
    }

    fn station(&mut self, network: &Network, station: &Station) {
        let original = self.original(
            &station.source,
            |w| w.station_body(network, station, true),
            |w| w.station_body(network, station, false),
        );
        match original {
            Original::Whole => {}
            Original::Around(tail) => {
                self.depth += 1;
                for channel in station.channels() {
                    self.channel(network, station, channel);
                }
                self.depth -= 1;
                self.out.push_str(&tail);
                self.out.push('\n');
            }
            Original::Render => self.station_body(network, station, true),
        }
    }

    fn station_body(&mut self, network: &Network, station: &Station, children: bool) {
        let mut attributes = vec![("code", station.code.clone())];
        push_dates(&mut attributes, Some(station.start_date), station.end_date);
        attributes.extend(station.details.attributes());
        self.open("Station", &attributes);
        self.slots(&station.extensions, STATION_SLOTS, |w, slot| match slot {
            "Latitude" => w.number(slot, station.latitude),
            "Longitude" => w.number(slot, station.longitude),
            "Elevation" => w.number(slot, station.elevation),
            "Site" => {
                let site = &station.site;
                w.open("Site", &[]);
                w.slots(&site.extensions, SITE_SLOTS, |w, slot| match slot {
                    "Name" => w.text("Name", &station.site_name),
                    "Description" => w.optional_text(slot, site.description.as_deref()),
                    "Town" => w.optional_text(slot, site.town.as_deref()),
                    "County" => w.optional_text(slot, site.county.as_deref()),
                    "Region" => w.optional_text(slot, site.region.as_deref()),
                    "Country" => w.optional_text(slot, site.country.as_deref()),
                    _ => {}
                });
                w.close("Site");
            }
            "WaterLevel" => w.optional_number(slot, station.water_level),
            "Vault" => w.optional_text(slot, station.vault.as_deref()),
            "Geology" => w.optional_text(slot, station.geology.as_deref()),
            "Equipment" => {
                for equipment in &station.equipment {
                    w.equipment("Equipment", equipment);
                }
            }
            "Operator" => w.operators(&station.operators),
            "CreationDate" => w.time(slot, station.creation_date),
            "TerminationDate" => w.time(slot, station.termination_date),
            "TotalNumberChannels" => w.integer(slot, station.total_number_channels),
            "SelectedNumberChannels" => w.integer(slot, station.selected_number_channels),
            "ExternalReference" => w.external_references(&station.external_references),
            "Channel" if children => {
                for channel in station.channels() {
                    w.channel(network, station, channel);
                }
            }
            _ => w.base_slot(
                slot,
                station.description.as_deref(),
                &station.details,
                &station.comments,
            ),
        });
        self.close("Station");
        if children && !station.blockettes.is_empty() {
            let location = format!("{}.{}", network.code, station.code);
            let what = format!("{} SEED-only station blockettes", station.blockettes.len());
            self.not_representable(&location, what);
        }
    }

    fn channel(&mut self, network: &Network, station: &Station, channel: &Channel) {
        let original = self.original(
            &channel.source,
            |w| w.channel_body(network, station, channel),
            |w| w.channel_body(network, station, channel),
        );
        if matches!(original, Original::Render) {
            self.channel_body(network, station, channel);
        }
    }

    fn channel_body(&mut self, network: &Network, station: &Station, channel: &Channel) {
        let location = format!(
            "{}.{}.{}.{}",
            network.code, station.code, channel.location_code, channel.code
        );
        let mut attributes = vec![
            ("code", channel.code.clone()),
            ("locationCode", channel.location_code.clone()),
        ];
        push_dates(&mut attributes, Some(channel.start_date), channel.end_date);
        attributes.extend(channel.details.attributes());
        self.open("Channel", &attributes);
        self.slots(&channel.extensions, CHANNEL_SLOTS, |w, slot| match slot {
            "ExternalReference" => w.external_references(&channel.external_references),
            "Latitude" => w.number(slot, channel.latitude),
            "Longitude" => w.number(slot, channel.longitude),
            "Elevation" => w.number(slot, channel.elevation),
            "Depth" => w.number(slot, channel.depth),
            "Azimuth" => w.optional_number(slot, channel.azimuth),
            "Dip" => w.optional_number(slot, channel.dip),
            "WaterLevel" => w.optional_number(slot, channel.water_level),
            "Type" => {
                for flag in channel.flags.chars() {
                    match channel_type_name(flag) {
                        Some(name) => w.text("Type", name),
                        None => debug!("{location}: no StationXML type for flag '{flag}'"),
                    }
                }
            }
            "SampleRate" => w.number(slot, channel.sample_rate),
            "SampleRateRatio" => {
                if let Some(ratio) = channel.sample_rate_ratio {
                    w.open(slot, &[]);
                    w.integer("NumberSamples", Some(ratio.number_samples));
                    w.integer("NumberSeconds", Some(ratio.number_seconds));
                    w.close(slot);
                }
            }
            "StorageFormat" => w.optional_text(slot, channel.storage_format.as_deref()),
            "ClockDrift" => w.optional_number(slot, channel.clock_drift),
            "CalibrationUnits" => {
                if channel.calibration_units.is_some() {
                    w.units(slot, channel.calibration_units);
                }
            }
            "Sensor" => w.equipment(slot, &channel.sensor),
            "PreAmplifier" => w.equipment(slot, &channel.pre_amplifier),
            "DataLogger" => w.equipment(slot, &channel.data_logger),
            "Equipment" => {
                for equipment in &channel.equipment {
                    w.equipment(slot, equipment);
                }
            }
            "Response" => {
                if let Some(response) = &channel.response {
                    w.response(response, &location);
                }
            }
            _ => w.base_slot(
                slot,
                channel.description.as_deref(),
                &channel.details,
                &channel.comments,
            ),
        });
        self.close("Channel");
        if !channel.blockettes.is_empty() {
            let what = format!("{} SEED-only channel blockettes", channel.blockettes.len());
            self.not_representable(&location, what);
        }
    }

    fn response(&mut self, response: &Response, location: &str) {
        let attributes: Vec<(&str, String)> = response
            .resource_id
            .iter()
            .map(|id| ("resourceId", id.clone()))
            .collect();
        self.open("Response", &attributes);
        self.slots(&response.extensions, RESPONSE_SLOTS, |w, slot| match slot {
            "InstrumentSensitivity" => {
                if let Some(sensitivity) = &response.sensitivity {
                    w.open(slot, &[]);
                    w.number("Value", sensitivity.value);
                    w.number("Frequency", sensitivity.frequency);
                    w.units("InputUnits", sensitivity.input_units);
                    w.units("OutputUnits", sensitivity.output_units);
                    w.optional_number("FrequencyStart", sensitivity.frequency_start);
                    w.optional_number("FrequencyEnd", sensitivity.frequency_end);
                    w.optional_number("FrequencyDBVariation", sensitivity.frequency_db_variation);
                    w.close(slot);
                }
            }
            "InstrumentPolynomial" => {
                if let Some(polynomial) = &response.instrument_polynomial {
                    w.instrument_polynomial(polynomial);
                }
            }
            "Stage" => {
                for stage in response.stages() {
                    w.stage(stage, location);
                }
            }
            _ => {}
        });
        self.close("Response");
    }

    fn filter_start(
        &mut self,
        element: &str,
        name: Option<&str>,
        resource_id: Option<&str>,
        description: Option<&str>,
        units: (Option<UnitId>, Option<UnitId>),
    ) {
        let mut attributes = Vec::new();
        if let Some(id) = resource_id {
            attributes.push(("resourceId", id.to_string()));
        }
        if let Some(name) = name {
            attributes.push(("name", name.to_string()));
        }
        self.open(element, &attributes);
        self.optional_text("Description", description);
        self.units("InputUnits", units.0);
        self.units("OutputUnits", units.1);
    }

    fn stage_filter_start(&mut self, element: &str, stage: &Stage) {
        self.filter_start(
            element,
            stage.name.as_deref(),
            stage.filter_resource_id.as_deref(),
            stage.filter_description.as_deref(),
            (stage.input_units, stage.output_units),
        );
    }

    fn stage_filter_end(&mut self, element: &str, stage: &Stage) {
        for extension in &stage.filter_extensions {
            self.line(&extension.fragment);
        }
        self.close(element);
    }

    fn polynomial_body(&mut self, p: &Polynomial) {
        self.text("ApproximationType", p.approximation.xml_name());
        let unit = match p.frequency_units {
            FrequencyUnits::Hertz => "HERTZ",
            FrequencyUnits::Radians => "RADIANS",
        };
        for (element, value) in [
            ("FrequencyLowerBound", p.frequency_lower),
            ("FrequencyUpperBound", p.frequency_upper),
        ] {
            self.line(&format!(
                "<{element} unit=\"{unit}\">{}</{element}>",
                format_number(value)
            ));
        }
        self.number("ApproximationLowerBound", p.approximation_lower);
        self.number("ApproximationUpperBound", p.approximation_upper);
        self.number("MaximumError", p.maximum_error);
        for (i, c) in p.coefficients.iter().enumerate() {
            let value = format_number(c.value);
            if c.error == 0.0 {
                self.line(&format!("<Coefficient number=\"{i}\">{value}</Coefficient>"));
            } else {
                let error = format_number(c.error);
                self.line(&format!(
                    "<Coefficient number=\"{i}\" plusError=\"{error}\" minusError=\"{error}\">{value}</Coefficient>"
                ));
            }
        }
    }

    fn instrument_polynomial(&mut self, p: &InstrumentPolynomial) {
        self.filter_start(
            "InstrumentPolynomial",
            p.name.as_deref(),
            p.resource_id.as_deref(),
            p.description.as_deref(),
            (p.input_units, p.output_units),
        );
        self.polynomial_body(&p.polynomial);
        self.close("InstrumentPolynomial");
    }

    fn stage(&mut self, stage: &Stage, location: &str) {
        let mut attributes = vec![("number", stage.number.to_string())];
        if let Some(id) = &stage.resource_id {
            attributes.push(("resourceId", id.clone()));
        }
        self.open("Stage", &attributes);
        self.slots(&stage.extensions, STAGE_SLOTS, |w, slot| match slot {
            "PolesZeros" | "Coefficients" | "ResponseList" | "FIR" | "Polynomial" => {
                if filter_element(stage) == Some(slot) {
                    w.filter(stage, slot);
                }
            }
            "Decimation" => {
                if let Some(d) = &stage.decimation {
                    w.open(slot, &[]);
                    w.number("InputSampleRate", d.input_sample_rate);
                    w.text("Factor", &d.factor.to_string());
                    w.text("Offset", &d.offset.to_string());
                    w.number("Delay", d.delay);
                    w.number("Correction", d.correction);
                    w.close(slot);
                }
            }
            "StageGain" => {
                if let Some(gain) = &stage.gain {
                    w.open(slot, &[]);
                    w.number("Value", gain.value);
                    w.number("Frequency", gain.frequency);
                    w.close(slot);
                }
            }
            _ => {}
        });
        self.close("Stage");
        if let StageKind::Generic(generic) = &stage.kind {
            let what = format!(
                "stage {} generic response with {} corners",
                stage.number,
                generic.corners.len()
            );
            self.not_representable(location, what);
        }
        if let Some(gain) = stage.gain.as_ref().filter(|g| !g.calibrations.is_empty()) {
            let what = format!(
                "stage {} calibration history of {} entries",
                stage.number,
                gain.calibrations.len()
            );
            self.not_representable(location, what);
        }
    }

    fn filter(&mut self, stage: &Stage, element: &str) {
        self.stage_filter_start(element, stage);
        match &stage.kind {
            StageKind::PolesZeros(pz) => {
                self.text("PzTransferFunctionType", pz.transfer_function.xml_name());
                self.number("NormalizationFactor", pz.normalization_factor);
                self.number("NormalizationFrequency", pz.normalization_frequency);
                for (name, list) in [("Zero", &pz.zeros), ("Pole", &pz.poles)] {
                    for (i, p) in list.iter().enumerate() {
                        self.open(name, &[("number", i.to_string())]);
                        self.number_with_error("Real", p.real, p.real_error);
                        self.number_with_error("Imaginary", p.imaginary, p.imaginary_error);
                        self.close(name);
                    }
                }
            }
            StageKind::Coefficients(cf) => {
                self.text("CfTransferFunctionType", cf.transfer_function.xml_name());
                for c in &cf.numerators {
                    self.number_with_error("Numerator", c.value, c.error);
                }
                for c in &cf.denominators {
                    self.number_with_error("Denominator", c.value, c.error);
                }
            }
            StageKind::ResponseList(list) => {
                for e in &list.elements {
                    self.open("ResponseListElement", &[]);
                    self.number("Frequency", e.frequency);
                    self.number_with_error("Amplitude", e.amplitude, e.amplitude_error);
                    self.number_with_error("Phase", e.phase, e.phase_error);
                    self.close("ResponseListElement");
                }
            }
            StageKind::Fir(fir) => {
                self.text("Symmetry", fir.symmetry.xml_name());
                for (i, c) in fir.coefficients.iter().enumerate() {
                    self.line(&format!(
                        "<NumeratorCoefficient i=\"{}\">{}</NumeratorCoefficient>",
                        i + 1,
                        format_number(*c)
                    ));
                }
            }
            StageKind::Polynomial(p) => self.polynomial_body(p),
            // Units of a gain-only stage travel on an empty digital
            // coefficients filter.
            StageKind::GainOnly => self.text("CfTransferFunctionType", "DIGITAL"),
            StageKind::Generic(_) => {}
        }
        self.stage_filter_end(element, stage);
    }
}

/// Filter element a stage is written with, if any.
fn filter_element(stage: &Stage) -> Option<&'static str> {
    match &stage.kind {
        StageKind::PolesZeros(_) => Some("PolesZeros"),
        StageKind::Coefficients(_) => Some("Coefficients"),
        StageKind::ResponseList(_) => Some("ResponseList"),
        StageKind::Fir(_) => Some("FIR"),
        StageKind::Polynomial(_) => Some("Polynomial"),
        StageKind::GainOnly => {
            let described = stage.input_units.is_some()
                || stage.output_units.is_some()
                || stage.name.is_some()
                || stage.filter_description.is_some()
                || stage.filter_resource_id.is_some()
                || !stage.filter_extensions.is_empty();
            described.then_some("Coefficients")
        }
        StageKind::Generic(_) => None,
    }
}

fn utf8(bytes: &[u8]) -> Option<&str> {
    std::str::from_utf8(bytes).ok()
}

fn push_dates(attributes: &mut Vec<(&str, String)>, start: Option<NanoTime>, end: Option<NanoTime>) {
    if let Some(start) = start {
        attributes.push(("startDate", start.to_iso_string()));
    }
    if let Some(end) = end {
        attributes.push(("endDate", end.to_iso_string()));
    }
}

/// Fingerprint every node read from StationXML against its canonical
/// encoding, so unchanged nodes can later be written as their original
/// text.
pub(crate) fn seal_sources(doc: &mut Document) {
    let mut prints: Vec<(String, Option<String>)> = Vec::new();
    let whole;
    let own;
    {
        let doc: &Document = doc;
        let writer = XmlWriter::canonical(doc);
        for network in doc.networks() {
            prints.push((
                writer.render(|w| w.network_body(network, true)),
                Some(writer.render(|w| w.network_body(network, false))),
            ));
            for station in network.stations() {
                prints.push((
                    writer.render(|w| w.station_body(network, station, true)),
                    Some(writer.render(|w| w.station_body(network, station, false))),
                ));
                for channel in station.channels() {
                    prints.push((
                        writer.render(|w| w.channel_body(network, station, channel)),
                        None,
                    ));
                }
            }
        }
        whole = writer.render(|w| w.document_body(true));
        own = writer.render(|w| w.document_body(false));
    }
    let mut prints = prints.into_iter();
    let mut seal = |source: &mut SourceText| {
        if let Some((whole, own)) = prints.next() {
            source.seal(whole.as_bytes(), own.as_ref().map(String::as_bytes));
        }
    };
    for network in doc.networks_mut() {
        seal(&mut network.source);
        for station in &mut network.stations {
            seal(&mut station.source);
            for channel in &mut station.channels {
                seal(&mut channel.source);
            }
        }
    }
    doc.source.seal(whole.as_bytes(), Some(own.as_bytes()));
}

/// Encode a document as StationXML text, together with warnings for the
/// parts StationXML cannot carry (SEED-only blockettes, calibration
/// histories, generic responses).
///
/// Unit references that do not resolve are written as empty unit names.
pub fn encode_station_xml_with_warnings(doc: &Document) -> (String, Vec<Warning>) {
    info!(
        "encoding {} networks as StationXML",
        doc.networks().len()
    );
    let mut writer = XmlWriter::new(doc);
    writer.document();
    (writer.out, writer.warnings)
}

/// Encode a document as StationXML text. See
/// [`encode_station_xml_with_warnings`].
pub fn encode_station_xml(doc: &Document) -> String {
    encode_station_xml_with_warnings(doc).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details::{RestrictedStatus, SiteDetails};
    use crate::model::Unit;
    use crate::response::{Corner, GenericResponse};

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(10.0), "10.0");
        assert_eq!(format_number(-0.037), "-0.037");
        assert_eq!(format_number(1.0e9), "1000000000.0");
        assert_eq!(format_number(0.02), "0.02");
    }

    #[test]
    fn test_free_text_is_escaped() {
        let mut doc = Document::new();
        doc.info.source = "R&D <lab>".into();
        let xml = encode_station_xml(&doc);
        assert!(xml.contains("<Source>R&amp;D &lt;lab&gt;</Source>"));
    }

    #[test]
    fn test_empty_document_layout() {
        let mut doc = Document::new();
        doc.info.source = "Test".into();
        doc.info.created = NanoTime::from_ymd(2020, 1, 1);
        let xml = encode_station_xml(&doc);
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <FDSNStationXML xmlns=\"http://www.fdsn.org/xml/station/1\" schemaVersion=\"1.1\">\n\
             \x20 <Source>Test</Source>\n\
             \x20 <Created>2020-01-01T00:00:00.000000Z</Created>\n\
             </FDSNStationXML>\n"
        );
    }

    #[test]
    fn test_units_with_description() {
        let mut doc = Document::new();
        let id = doc.units.intern(Unit::new("M/S").with_description("Velocity"));
        let mut writer = XmlWriter::new(&doc);
        writer.units("InputUnits", Some(id));
        assert_eq!(
            writer.out,
            "<InputUnits>\n  <Name>M/S</Name>\n  <Description>Velocity</Description>\n</InputUnits>\n"
        );
    }

    #[test]
    fn test_extensions_follow_their_anchor() {
        let doc = Document::new();
        let extensions = vec![
            Extension::new("x:First", "<x:First/>"),
            Extension::new("x:AfterB", "<x:AfterB/>").after("B"),
            Extension::new("x:Stray", "<x:Stray/>").after("Gone"),
        ];
        let mut writer = XmlWriter::new(&doc);
        writer.slots(&extensions, &["A", "B", "C"], |w, slot| w.text(slot, ""));
        assert_eq!(
            writer.out,
            "<x:First/>\n<A></A>\n<B></B>\n<x:AfterB/>\n<C></C>\n<x:Stray/>\n"
        );
    }

    #[test]
    fn test_station_details_in_schema_order() {
        let start = NanoTime::from_day(2020, 1);
        let mut doc = Document::new();
        let net = doc.add_network(Network::new("XX"));
        let mut station = Station::new("TEST", start).with_site_name("Hill");
        station.details.restricted_status = Some(RestrictedStatus::Open);
        station.site = SiteDetails {
            country: Some("Iceland".into()),
            ..Default::default()
        };
        station.vault = Some("Tunnel".into());
        station.total_number_channels = Some(3);
        doc.add_station(net, station).unwrap();

        let xml = encode_station_xml(&doc);
        assert!(xml.contains(
            "<Station code=\"TEST\" startDate=\"2020-01-01T00:00:00.000000Z\" restrictedStatus=\"open\">"
        ));
        assert!(xml.contains(
            "    <Site>\n      <Name>Hill</Name>\n      <Country>Iceland</Country>\n    </Site>\n    <Vault>Tunnel</Vault>\n    <TotalNumberChannels>3</TotalNumberChannels>\n"
        ));
    }

    #[test]
    fn test_generic_stage_is_reported() {
        let start = NanoTime::from_day(2020, 1);
        let mut doc = Document::new();
        let net = doc.add_network(Network::new("XX"));
        let sta = doc.add_station(net, Station::new("TEST", start)).unwrap();
        let generic = StageKind::Generic(GenericResponse {
            corners: vec![Corner {
                frequency: 1.0,
                slope: 20.0,
            }],
        });
        let response = Response::new().with_stage(Stage::new(generic).with_gain(2.0, 1.0));
        doc.add_channel(sta, Channel::new("BHZ", "00", start).with_response(response))
            .unwrap();

        let (xml, warnings) = encode_station_xml_with_warnings(&doc);
        assert!(xml.contains("<StageGain>"));
        assert!(!xml.contains("<Coefficients>"));
        assert!(matches!(
            warnings.as_slice(),
            [Warning::NotRepresentable { location, .. }] if location == "XX.TEST.00.BHZ"
        ));
    }
}
