//! Decode FDSN StationXML into a [`Document`].
//!
//! The main entry point is [`decode_station_xml()`]. The text is first
//! read into a lightweight element tree with quick-xml, remembering each
//! element's byte span, and the tree is then mapped onto the model.
//! Elements this crate does not model (vendor extensions in other
//! namespaces, newer 1.x elements) are kept verbatim as [`Extension`]s,
//! anchored after the standard element they followed, and reported with
//! [`Warning::UnknownXmlExtensionPreserved`]. Unknown attributes of
//! networks, stations and channels are kept the same way.
//!
//! The decoder also records where each network, station and channel came
//! from so that an unchanged node is written back as its original text.

use std::ops::Range;
use std::sync::Arc;

use log::{debug, info, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::details::{
    AvailabilitySpan, DataAvailability, ExternalReference, Identifier, NodeDetails, Operator,
    Person, Phone, RestrictedStatus, SampleRateRatio,
};
use crate::encode_xml::{
    CHANNEL_SLOTS, COMMENT_SLOTS, EQUIPMENT_SLOTS, NETWORK_SLOTS, RESPONSE_SLOTS, ROOT_SLOTS,
    SITE_SLOTS, STAGE_SLOTS, STATION_SLOTS, STATION_XML_NAMESPACE, seal_sources,
};
use crate::model::{
    Channel, Comment, Document, Equipment, Extension, Network, Station, StationPath, Unit, UnitId,
};
use crate::response::{
    Coefficient, Coefficients, Decimation, Fir, Gain, InstrumentPolynomial, PoleZero, PolesZeros,
    Polynomial, Response, ResponseList, ResponseListElement, Sensitivity, Stage, StageKind,
};
use crate::source::SourceText;
use crate::time::NanoTime;
use crate::types::{
    ApproximationType, CfTransferFunction, Format, FrequencyUnits, PzTransferFunction, Symmetry,
    channel_type_flag,
};
use crate::warning::Warning;
use crate::{MetadataError, Result};

/// Attributes of a number element the model accounts for.
const VALUE_ATTRIBUTES: &[&str] = &["unit", "plusError", "minusError"];

/// One XML element with its text content and byte span in the source.
#[derive(Debug, Clone, Default)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Node>,
    /// From the end of the previous markup, so it may start with
    /// whitespace.
    span: Range<usize>,
}

impl Node {
    fn open(e: &BytesStart<'_>, start: usize) -> Result<Self> {
        let mut attributes = Vec::new();
        for attribute in e.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            attributes,
            span: start..start,
            ..Default::default()
        })
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn required(&self, name: &str) -> Result<&Node> {
        self.child(name).ok_or_else(|| {
            MetadataError::Schema(format!("<{}> is missing required <{name}>", self.name))
        })
    }

    fn number(&self) -> Result<f64> {
        self.text.trim().parse().map_err(|_| {
            MetadataError::Schema(format!("<{}> is not a number: {:?}", self.name, self.text))
        })
    }

    fn integer(&self) -> Result<u32> {
        self.text.trim().parse().map_err(|_| {
            MetadataError::Schema(format!("<{}> is not an integer: {:?}", self.name, self.text))
        })
    }

    fn time(&self) -> Result<NanoTime> {
        NanoTime::parse_iso(self.text.trim()).ok_or_else(|| {
            MetadataError::Schema(format!("<{}> is not a valid time: {:?}", self.name, self.text))
        })
    }

    /// Value of the `plusError` attribute, 0 when absent.
    fn error(&self) -> Result<f64> {
        Ok(self.number_attribute("plusError")?.unwrap_or(0.0))
    }

    fn required_number(&self, name: &str) -> Result<f64> {
        self.required(name)?.number()
    }

    fn optional_number(&self, name: &str) -> Result<Option<f64>> {
        self.child(name).map(Node::number).transpose()
    }

    fn optional_text(&self, name: &str) -> Option<String> {
        self.child(name).map(|c| c.text.clone())
    }

    fn number_attribute(&self, name: &str) -> Result<Option<f64>> {
        self.attribute(name)
            .map(|value| {
                value.trim().parse().map_err(|_| {
                    MetadataError::Schema(format!("<{}> has an invalid {name}: {value:?}", self.name))
                })
            })
            .transpose()
    }

    fn integer_attribute(&self, name: &str) -> Result<Option<u32>> {
        self.attribute(name)
            .map(|value| {
                value.trim().parse().map_err(|_| {
                    MetadataError::Schema(format!("<{}> has an invalid {name}: {value:?}", self.name))
                })
            })
            .transpose()
    }

    fn date(&self, name: &str) -> Result<Option<NanoTime>> {
        match self.attribute(name) {
            None => Ok(None),
            Some(value) => NanoTime::parse_iso(value).map(Some).ok_or_else(|| {
                MetadataError::Schema(format!("<{}> has an invalid {name}: {value:?}", self.name))
            }),
        }
    }

    fn required_date(&self, name: &str) -> Result<NanoTime> {
        self.date(name)?.ok_or_else(|| {
            MetadataError::Schema(format!("<{}> is missing required {name}", self.name))
        })
    }

    fn required_attribute(&self, name: &str) -> Result<&str> {
        self.attribute(name).ok_or_else(|| {
            MetadataError::Schema(format!("<{}> is missing required {name}", self.name))
        })
    }

    fn owned_attribute(&self, name: &str) -> Option<String> {
        self.attribute(name).map(str::to_string)
    }
}

/// Read the element tree of a complete XML document.
fn parse_tree(xml: &str) -> Result<Node> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<Node> = Vec::new();
    let mut root = None;
    loop {
        let start = reader.buffer_position() as usize;
        let node = match reader.read_event()? {
            Event::Start(e) => {
                stack.push(Node::open(&e, start)?);
                continue;
            }
            Event::Empty(e) => {
                let mut node = Node::open(&e, start)?;
                node.span.end = reader.buffer_position() as usize;
                node
            }
            Event::End(_) => {
                let Some(mut node) = stack.pop() else {
                    return Err(MetadataError::Schema("unbalanced end tag".into()));
                };
                node.span.end = reader.buffer_position() as usize;
                node
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
                continue;
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c));
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None if root.is_none() => root = Some(node),
            None => return Err(MetadataError::Schema("more than one root element".into())),
        }
    }
    if !stack.is_empty() {
        return Err(MetadataError::Schema("document ends inside an element".into()));
    }
    root.ok_or_else(|| MetadataError::Schema("document has no root element".into()))
}

/// Decode a StationXML document.
///
/// Returns the document together with the warnings raised while reading.
/// The document has not been normalized yet.
pub fn decode_station_xml(xml: &str) -> Result<(Document, Vec<Warning>)> {
    let root = parse_tree(xml)?;
    let mut decoder = XmlDecoder {
        xml,
        data: Arc::from(xml.as_bytes()),
        doc: Document::new(),
        warnings: Vec::new(),
    };
    decoder.root(&root)?;
    let networks: Vec<&Node> = root.children.iter().filter(|c| c.name == "Network").collect();
    decoder.doc.source = decoder.source_text(0..xml.len(), &networks);
    seal_sources(&mut decoder.doc);
    info!(
        "decoded StationXML: {} networks, {} channels, {} warnings",
        decoder.doc.networks().len(),
        decoder.doc.channels().count(),
        decoder.warnings.len()
    );
    Ok((decoder.doc, decoder.warnings))
}

/// Last standard element seen among a node's children, to anchor the
/// extensions that follow it.
fn next_anchor<'n>(slots: &[&str], child: &'n Node, anchor: Option<&'n str>) -> Option<&'n str> {
    if slots.contains(&child.name.as_str()) {
        Some(child.name.as_str())
    } else {
        anchor
    }
}

struct XmlDecoder<'a> {
    xml: &'a str,
    data: Arc<[u8]>,
    doc: Document,
    warnings: Vec<Warning>,
}

impl XmlDecoder<'_> {
    fn extension(&mut self, node: &Node, location: &str, after: Option<&str>) -> Extension {
        warn!("{location}: preserving unsupported element <{}>", node.name);
        self.warnings.push(Warning::UnknownXmlExtensionPreserved {
            element: node.name.clone(),
            location: location.to_string(),
        });
        let fragment = self.xml.get(node.span.clone()).unwrap_or_default();
        Extension {
            element: node.name.clone(),
            fragment: fragment.trim_start().to_string(),
            after: after.map(str::to_string),
        }
    }

    /// Report children of a fixed-content element the model does not carry.
    fn dropped(&mut self, node: &Node, known: &[&str], location: &str) {
        for child in node.children.iter().filter(|c| !known.contains(&c.name.as_str())) {
            self.drop_element(&format!("{}/{}", node.name, child.name), location);
        }
    }

    /// Report attributes of a number element the model does not carry.
    fn dropped_attributes(&mut self, node: &Node, location: &str) {
        for (key, _) in &node.attributes {
            if !VALUE_ATTRIBUTES.contains(&key.as_str()) {
                self.drop_element(&format!("{}@{key}", node.name), location);
            }
        }
    }

    fn drop_element(&mut self, element: &str, location: &str) {
        warn!("{location}: dropping unsupported {element}");
        self.warnings.push(Warning::UnknownXmlElementDropped {
            element: element.to_string(),
            location: location.to_string(),
        });
    }

    /// Byte range of a node from the start of its first line.
    fn line_span(&self, node: &Node) -> Range<usize> {
        let text = self.xml.get(node.span.clone()).unwrap_or_default();
        let indent = text.len() - text.trim_start().len();
        let start = match text[..indent].rfind('\n') {
            Some(newline) => node.span.start + newline + 1,
            None => node.span.start + indent,
        };
        start..node.span.end
    }

    /// Original text of a node. The text around its children is kept too
    /// when the children follow each other on lines of their own.
    fn source_text(&self, whole: Range<usize>, children: &[&Node]) -> SourceText {
        let source = SourceText::new(Format::StationXml, self.data.clone(), whole.clone());
        let (Some(first), Some(last)) = (children.first(), children.last()) else {
            return source;
        };
        let bytes = self.xml.as_bytes();
        let ends_line = |end: usize| bytes.get(end) == Some(&b'\n');
        for pair in children.windows(2) {
            let end = pair[0].span.end;
            if !ends_line(end) || self.line_span(pair[1]).start != end + 1 {
                return source;
            }
        }
        let head = whole.start..self.line_span(first).start;
        let end = last.span.end;
        if !ends_line(end) || end + 1 > whole.end {
            return source;
        }
        source.with_children(head, end + 1..whole.end)
    }

    fn root(&mut self, root: &Node) -> Result<()> {
        let local = root.name.rsplit(':').next().unwrap_or_default();
        if local != "FDSNStationXML" {
            return Err(MetadataError::Schema(format!(
                "root element is <{}>, expected <FDSNStationXML>",
                root.name
            )));
        }
        if root.attribute("xmlns") != Some(STATION_XML_NAMESPACE) {
            return Err(MetadataError::Schema(format!(
                "namespace {:?} is not {STATION_XML_NAMESPACE}",
                root.attribute("xmlns").unwrap_or_default()
            )));
        }
        let version = root.required_attribute("schemaVersion")?;
        if !version.trim().starts_with("1.") {
            return Err(MetadataError::Schema(format!(
                "unsupported schemaVersion {version:?}"
            )));
        }

        let info = &mut self.doc.info;
        info.schema_version = Some(version.to_string());
        info.namespaces = root
            .attributes
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("xmlns:")
                    .map(|prefix| (prefix.to_string(), value.clone()))
            })
            .collect();
        info.source = root.required("Source")?.text.clone();

        let mut anchor = None;
        for child in &root.children {
            match child.name.as_str() {
                "Source" => {}
                "Sender" => self.doc.info.sender = Some(child.text.clone()),
                "Module" => self.doc.info.module = Some(child.text.clone()),
                "ModuleURI" => self.doc.info.module_uri = Some(child.text.clone()),
                "Created" => self.doc.info.created = Some(child.time()?),
                "Network" => self.network(child)?,
                _ => {
                    let extension = self.extension(child, "FDSNStationXML", anchor);
                    self.doc.extensions.push(extension);
                }
            }
            anchor = next_anchor(ROOT_SLOTS, child, anchor);
        }
        Ok(())
    }

    /// Attributes shared by networks, stations and channels. `known` lists
    /// the node's own attributes.
    fn details(&mut self, node: &Node, known: &[&str], location: &str) -> NodeDetails {
        let mut details = NodeDetails {
            alternate_code: node.owned_attribute("alternateCode"),
            historical_code: node.owned_attribute("historicalCode"),
            source_id: node.owned_attribute("sourceID"),
            ..Default::default()
        };
        for (key, value) in &node.attributes {
            let status = match key.as_str() {
                "restrictedStatus" => RestrictedStatus::from_code(value),
                "alternateCode" | "historicalCode" | "sourceID" => continue,
                key if known.contains(&key) => continue,
                _ => None,
            };
            match status {
                Some(status) => details.restricted_status = Some(status),
                None => {
                    warn!("{location}: preserving unsupported attribute {key}={value:?}");
                    self.warnings.push(Warning::UnknownXmlExtensionPreserved {
                        element: format!("@{key}"),
                        location: location.to_string(),
                    });
                    details.extra_attributes.push((key.clone(), value.clone()));
                }
            }
        }
        details
    }

    /// Map a child every network, station and channel may have. Returns
    /// false for any other child.
    fn base_child(
        &mut self,
        child: &Node,
        description: &mut Option<String>,
        details: &mut NodeDetails,
        comments: &mut Vec<Comment>,
        location: &str,
    ) -> Result<bool> {
        match child.name.as_str() {
            "Description" => *description = Some(child.text.clone()),
            "Identifier" => details.identifiers.push(Identifier {
                kind: child.owned_attribute("type"),
                value: child.text.clone(),
            }),
            "Comment" => comments.push(self.comment(child, location)?),
            "DataAvailability" => {
                details.data_availability = Some(self.data_availability(child, location)?);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn data_availability(&mut self, node: &Node, location: &str) -> Result<DataAvailability> {
        let mut availability = DataAvailability::default();
        for child in &node.children {
            match child.name.as_str() {
                "Extent" => {
                    availability.extent =
                        Some((child.required_date("start")?, child.required_date("end")?));
                }
                "Span" => availability.spans.push(AvailabilitySpan {
                    start: child.required_date("start")?,
                    end: child.required_date("end")?,
                    number_segments: child.integer_attribute("numberSegments")?.unwrap_or(0),
                    maximum_time_tear: child.number_attribute("maximumTimeTear")?,
                }),
                _ => self.drop_element(&format!("DataAvailability/{}", child.name), location),
            }
        }
        Ok(availability)
    }

    fn comment(&mut self, node: &Node, location: &str) -> Result<Comment> {
        let mut comment = Comment::new(&node.required("Value")?.text);
        comment.id = node.integer_attribute("id")?;
        comment.subject = node.owned_attribute("subject");
        let mut anchor = None;
        for child in &node.children {
            match child.name.as_str() {
                "Value" => {}
                "BeginEffectiveTime" => comment.begin = Some(child.time()?),
                "EndEffectiveTime" => comment.end = Some(child.time()?),
                "Author" => comment.authors.push(self.person(child, location)?),
                _ => {
                    let extension = self.extension(child, location, anchor);
                    comment.extensions.push(extension);
                }
            }
            anchor = next_anchor(COMMENT_SLOTS, child, anchor);
        }
        Ok(comment)
    }

    fn person(&mut self, node: &Node, location: &str) -> Result<Person> {
        let mut person = Person::default();
        for child in &node.children {
            match child.name.as_str() {
                "Name" => person.names.push(child.text.clone()),
                "Agency" => person.agencies.push(child.text.clone()),
                "Email" => person.emails.push(child.text.clone()),
                "Phone" => {
                    self.dropped(child, &["CountryCode", "AreaCode", "PhoneNumber"], location);
                    person.phones.push(Phone {
                        description: child.owned_attribute("description"),
                        country_code: child.child("CountryCode").map(Node::integer).transpose()?,
                        area_code: child.required("AreaCode")?.integer()?,
                        phone_number: child.required("PhoneNumber")?.text.clone(),
                    });
                }
                _ => self.drop_element(&format!("{}/{}", node.name, child.name), location),
            }
        }
        Ok(person)
    }

    fn operator(&mut self, node: &Node, location: &str) -> Result<Operator> {
        let mut operator = Operator::default();
        let mut agencies = 0;
        for child in &node.children {
            match child.name.as_str() {
                // 1.0 allows several agencies; the first one is kept.
                "Agency" if agencies == 0 => {
                    operator.agency = child.text.clone();
                    agencies += 1;
                }
                "Contact" => operator.contacts.push(self.person(child, location)?),
                "WebSite" => operator.website = Some(child.text.clone()),
                _ => self.drop_element(&format!("Operator/{}", child.name), location),
            }
        }
        Ok(operator)
    }

    fn external_reference(&mut self, node: &Node, location: &str) -> Result<ExternalReference> {
        self.dropped(node, &["URI", "Description"], location);
        Ok(ExternalReference {
            uri: node.required("URI")?.text.clone(),
            description: node.required("Description")?.text.clone(),
        })
    }

    fn network(&mut self, node: &Node) -> Result<()> {
        let code = node.required_attribute("code")?;
        let mut network =
            Network::new(code).with_dates(node.date("startDate")?, node.date("endDate")?);
        network.details = self.details(node, &["code", "startDate", "endDate"], code);
        let mut stations = Vec::new();
        let mut anchor = None;
        for child in &node.children {
            let base = self.base_child(
                child,
                &mut network.description,
                &mut network.details,
                &mut network.comments,
                code,
            )?;
            if !base {
                match child.name.as_str() {
                    "Operator" => network.operators.push(self.operator(child, code)?),
                    "TotalNumberStations" => network.total_number_stations = Some(child.integer()?),
                    "SelectedNumberStations" => {
                        network.selected_number_stations = Some(child.integer()?);
                    }
                    "Station" => stations.push(child),
                    _ => {
                        let extension = self.extension(child, code, anchor);
                        network.extensions.push(extension);
                    }
                }
            }
            anchor = next_anchor(NETWORK_SLOTS, child, anchor);
        }
        network.source = self.source_text(self.line_span(node), &stations);
        let index = self.doc.add_network(network);
        for station in stations {
            self.station(index, code, station)?;
        }
        Ok(())
    }

    fn station(&mut self, network: usize, network_code: &str, node: &Node) -> Result<()> {
        let code = node.required_attribute("code")?;
        let location = format!("{network_code}.{code}");
        let mut station = Station::new(code, node.required_date("startDate")?);
        station.end_date = node.date("endDate")?;
        station.details = self.details(node, &["code", "startDate", "endDate"], &location);
        station.latitude = node.required_number("Latitude")?;
        station.longitude = node.required_number("Longitude")?;
        station.elevation = node.required_number("Elevation")?;
        station.site_name = node.required("Site")?.required("Name")?.text.clone();

        let mut channels = Vec::new();
        let mut anchor = None;
        for child in &node.children {
            let base = self.base_child(
                child,
                &mut station.description,
                &mut station.details,
                &mut station.comments,
                &location,
            )?;
            if !base {
                match child.name.as_str() {
                    "Latitude" | "Longitude" | "Elevation" => {
                        self.dropped_attributes(child, &location);
                    }
                    "Site" => self.site(child, &mut station, &location),
                    "WaterLevel" => {
                        self.dropped_attributes(child, &location);
                        station.water_level = Some(child.number()?);
                    }
                    "Vault" => station.vault = Some(child.text.clone()),
                    "Geology" => station.geology = Some(child.text.clone()),
                    "Equipment" => station.equipment.push(self.equipment(child, &location)?),
                    "Operator" => station.operators.push(self.operator(child, &location)?),
                    "CreationDate" => station.creation_date = Some(child.time()?),
                    "TerminationDate" => station.termination_date = Some(child.time()?),
                    "TotalNumberChannels" => station.total_number_channels = Some(child.integer()?),
                    "SelectedNumberChannels" => {
                        station.selected_number_channels = Some(child.integer()?);
                    }
                    "ExternalReference" => {
                        let reference = self.external_reference(child, &location)?;
                        station.external_references.push(reference);
                    }
                    "Channel" => channels.push(child),
                    _ => {
                        let extension = self.extension(child, &location, anchor);
                        station.extensions.push(extension);
                    }
                }
            }
            anchor = next_anchor(STATION_SLOTS, child, anchor);
        }
        station.source = self.source_text(self.line_span(node), &channels);
        let path = self.doc.add_station(network, station)?;
        for channel in channels {
            self.channel(path, &location, channel)?;
        }
        Ok(())
    }

    fn site(&mut self, node: &Node, station: &mut Station, location: &str) {
        let site = &mut station.site;
        let mut anchor = None;
        for child in &node.children {
            let text = Some(child.text.clone());
            match child.name.as_str() {
                "Name" => {}
                "Description" => site.description = text,
                "Town" => site.town = text,
                "County" => site.county = text,
                "Region" => site.region = text,
                "Country" => site.country = text,
                _ => {
                    let extension = self.extension(child, location, anchor);
                    site.extensions.push(extension);
                }
            }
            anchor = next_anchor(SITE_SLOTS, child, anchor);
        }
    }

    fn units(&mut self, node: &Node, location: &str) -> Result<Option<UnitId>> {
        self.dropped(node, &["Name", "Description"], location);
        let name = node.required("Name")?.text.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let mut unit = Unit::new(name);
        unit.description = node.optional_text("Description");
        Ok(Some(self.doc.units.intern(unit)))
    }

    fn equipment(&mut self, node: &Node, location: &str) -> Result<Equipment> {
        let mut equipment = Equipment {
            resource_id: node.owned_attribute("resourceId"),
            ..Default::default()
        };
        let mut anchor = None;
        for child in &node.children {
            let text = Some(child.text.clone());
            match child.name.as_str() {
                "Type" => equipment.equipment_type = text,
                "Description" => equipment.description = text,
                "Manufacturer" => equipment.manufacturer = text,
                "Vendor" => equipment.vendor = text,
                "Model" => equipment.model = text,
                "SerialNumber" => equipment.serial_number = text,
                "InstallationDate" => equipment.dates.installation = Some(child.time()?),
                "RemovalDate" => equipment.dates.removal = Some(child.time()?),
                "CalibrationDate" => equipment.dates.calibrations.push(child.time()?),
                _ => {
                    let extension = self.extension(child, location, anchor);
                    equipment.extensions.push(extension);
                }
            }
            anchor = next_anchor(EQUIPMENT_SLOTS, child, anchor);
        }
        Ok(equipment)
    }

    fn channel(&mut self, station: StationPath, station_location: &str, node: &Node) -> Result<()> {
        let code = node.required_attribute("code")?;
        let location_code = node.attribute("locationCode").unwrap_or_default();
        let location = format!("{station_location}.{location_code}.{code}");
        let mut channel = Channel::new(code, location_code, node.required_date("startDate")?);
        channel.end_date = node.date("endDate")?;
        channel.details = self.details(
            node,
            &["code", "locationCode", "startDate", "endDate"],
            &location,
        );
        channel.latitude = node.required_number("Latitude")?;
        channel.longitude = node.required_number("Longitude")?;
        channel.elevation = node.required_number("Elevation")?;
        channel.depth = node.required_number("Depth")?;
        channel.sample_rate = node.required_number("SampleRate").map_err(|_| {
            MetadataError::Schema(format!("channel {location} is missing a valid SampleRate"))
        })?;

        let mut anchor = None;
        for child in &node.children {
            let base = self.base_child(
                child,
                &mut channel.description,
                &mut channel.details,
                &mut channel.comments,
                &location,
            )?;
            if !base {
                match child.name.as_str() {
                    "Latitude" | "Longitude" | "Elevation" | "Depth" | "SampleRate" => {
                        self.dropped_attributes(child, &location);
                    }
                    "ExternalReference" => {
                        let reference = self.external_reference(child, &location)?;
                        channel.external_references.push(reference);
                    }
                    "Azimuth" => {
                        self.dropped_attributes(child, &location);
                        channel.azimuth = Some(child.number()?);
                    }
                    "Dip" => {
                        self.dropped_attributes(child, &location);
                        channel.dip = Some(child.number()?);
                    }
                    "WaterLevel" => {
                        self.dropped_attributes(child, &location);
                        channel.water_level = Some(child.number()?);
                    }
                    "SampleRateRatio" => {
                        self.dropped(child, &["NumberSamples", "NumberSeconds"], &location);
                        channel.sample_rate_ratio = Some(SampleRateRatio {
                            number_samples: child.required("NumberSamples")?.integer()?,
                            number_seconds: child.required("NumberSeconds")?.integer()?,
                        });
                    }
                    "StorageFormat" => channel.storage_format = Some(child.text.clone()),
                    "ClockDrift" => {
                        self.dropped_attributes(child, &location);
                        channel.clock_drift = Some(child.number()?);
                    }
                    "CalibrationUnits" => {
                        channel.calibration_units = self.units(child, &location)?;
                    }
                    "Sensor" => channel.sensor = self.equipment(child, &location)?,
                    "PreAmplifier" => channel.pre_amplifier = self.equipment(child, &location)?,
                    "DataLogger" => channel.data_logger = self.equipment(child, &location)?,
                    "Equipment" => channel.equipment.push(self.equipment(child, &location)?),
                    "Response" => channel.response = Some(self.response(child, &location)?),
                    "Type" => match channel_type_flag(&child.text) {
                        Some(flag) => channel.flags.push(flag),
                        None => {
                            let extension = self.extension(child, &location, anchor);
                            channel.extensions.push(extension);
                        }
                    },
                    _ => {
                        let extension = self.extension(child, &location, anchor);
                        channel.extensions.push(extension);
                    }
                }
            }
            anchor = next_anchor(CHANNEL_SLOTS, child, anchor);
        }

        // StationXML has no signal units; they are the response's input.
        channel.signal_units = channel.response.as_ref().and_then(|r| {
            r.sensitivity
                .as_ref()
                .and_then(|s| s.input_units)
                .or_else(|| r.stages().first().and_then(|s| s.input_units))
        });
        channel.source = self.source_text(self.line_span(node), &[]);
        debug!("channel {location}");
        self.doc.add_channel(station, channel)?;
        Ok(())
    }

    fn response(&mut self, node: &Node, location: &str) -> Result<Response> {
        let mut stages = Vec::new();
        let mut sensitivity = None;
        let mut instrument_polynomial = None;
        let mut extensions = Vec::new();
        let mut anchor = None;
        for child in &node.children {
            match child.name.as_str() {
                "InstrumentSensitivity" => {
                    self.dropped(
                        child,
                        &[
                            "Value",
                            "Frequency",
                            "InputUnits",
                            "OutputUnits",
                            "FrequencyStart",
                            "FrequencyEnd",
                            "FrequencyDBVariation",
                        ],
                        location,
                    );
                    let mut s = Sensitivity::new(
                        child.required_number("Value")?,
                        child.required_number("Frequency")?,
                        self.units(child.required("InputUnits")?, location)?,
                        self.units(child.required("OutputUnits")?, location)?,
                    );
                    s.frequency_start = child.optional_number("FrequencyStart")?;
                    s.frequency_end = child.optional_number("FrequencyEnd")?;
                    s.frequency_db_variation = child.optional_number("FrequencyDBVariation")?;
                    sensitivity = Some(s);
                }
                "InstrumentPolynomial" => {
                    instrument_polynomial = Some(self.instrument_polynomial(child, location)?);
                }
                "Stage" => stages.push(self.stage(child, location)?),
                _ => extensions.push(self.extension(child, location, anchor)),
            }
            anchor = next_anchor(RESPONSE_SLOTS, child, anchor);
        }
        let mut response = Response::from_numbered(stages, sensitivity);
        response.instrument_polynomial = instrument_polynomial;
        response.resource_id = node.owned_attribute("resourceId");
        response.extensions = extensions;
        Ok(response)
    }

    fn instrument_polynomial(&mut self, node: &Node, location: &str) -> Result<InstrumentPolynomial> {
        self.dropped(node, POLYNOMIAL_FIELDS, location);
        let unparseable = |what: &str, value: &str| {
            MetadataError::Validation(format!(
                "unparseable instrument polynomial: {what} {value:?} in {location}"
            ))
        };
        Ok(InstrumentPolynomial {
            name: node.owned_attribute("name"),
            description: node.optional_text("Description"),
            resource_id: node.owned_attribute("resourceId"),
            input_units: self.units(node.required("InputUnits")?, location)?,
            output_units: self.units(node.required("OutputUnits")?, location)?,
            polynomial: polynomial(node, unparseable)?,
        })
    }

    fn stage(&mut self, node: &Node, location: &str) -> Result<Stage> {
        let number: u32 = node
            .required_attribute("number")?
            .trim()
            .parse()
            .map_err(|_| MetadataError::Schema(format!("{location}: invalid stage number")))?;
        let mut stage = Stage::new(StageKind::GainOnly);
        stage.number = number;
        stage.resource_id = node.owned_attribute("resourceId");
        let mut filters = 0;
        let mut anchor = None;
        for child in &node.children {
            match child.name.as_str() {
                "PolesZeros" | "Coefficients" | "ResponseList" | "FIR" | "Polynomial" => {
                    filters += 1;
                    if filters > 1 {
                        return Err(MetadataError::Schema(format!(
                            "{location}: stage {number} has more than one filter"
                        )));
                    }
                    self.filter(child, &mut stage, location)?;
                }
                "Decimation" => {
                    self.dropped(
                        child,
                        &["InputSampleRate", "Factor", "Offset", "Delay", "Correction"],
                        location,
                    );
                    stage.decimation = Some(Decimation {
                        input_sample_rate: child.required_number("InputSampleRate")?,
                        factor: child.required("Factor")?.integer()?,
                        offset: child.required("Offset")?.integer()?,
                        delay: child.required_number("Delay")?,
                        correction: child.required_number("Correction")?,
                    });
                }
                "StageGain" => {
                    self.dropped(child, &["Value", "Frequency"], location);
                    stage.gain = Some(Gain::new(
                        child.required_number("Value")?,
                        child.required_number("Frequency")?,
                    ));
                }
                _ => {
                    let extension = self.extension(child, location, anchor);
                    stage.extensions.push(extension);
                }
            }
            anchor = next_anchor(STAGE_SLOTS, child, anchor);
        }
        Ok(stage)
    }

    fn filter(&mut self, node: &Node, stage: &mut Stage, location: &str) -> Result<()> {
        stage.name = node.owned_attribute("name");
        stage.filter_resource_id = node.owned_attribute("resourceId");
        stage.filter_description = node.optional_text("Description");
        stage.input_units = self.units(node.required("InputUnits")?, location)?;
        stage.output_units = self.units(node.required("OutputUnits")?, location)?;
        let number = stage.number;
        let unparseable = |what: &str, value: &str| {
            MetadataError::Validation(format!(
                "unparseable stage kind: {what} {value:?} in {location} stage {number}"
            ))
        };

        let kind = match node.name.as_str() {
            "PolesZeros" => {
                let tf = node.required("PzTransferFunctionType")?.text.as_str();
                let mut pz = PolesZeros {
                    transfer_function: PzTransferFunction::from_xml(tf)
                        .ok_or_else(|| unparseable("PzTransferFunctionType", tf))?,
                    normalization_factor: node.required_number("NormalizationFactor")?,
                    normalization_frequency: node.required_number("NormalizationFrequency")?,
                    zeros: Vec::new(),
                    poles: Vec::new(),
                };
                for child in &node.children {
                    if child.name == "Zero" || child.name == "Pole" {
                        let real = child.required("Real")?;
                        let imaginary = child.required("Imaginary")?;
                        let value = PoleZero {
                            real: real.number()?,
                            imaginary: imaginary.number()?,
                            real_error: real.error()?,
                            imaginary_error: imaginary.error()?,
                        };
                        if child.name == "Zero" {
                            pz.zeros.push(value);
                        } else {
                            pz.poles.push(value);
                        }
                    }
                }
                StageKind::PolesZeros(pz)
            }
            "Coefficients" => {
                let tf = node.required("CfTransferFunctionType")?.text.as_str();
                let mut cf = Coefficients {
                    transfer_function: CfTransferFunction::from_xml(tf)
                        .ok_or_else(|| unparseable("CfTransferFunctionType", tf))?,
                    numerators: Vec::new(),
                    denominators: Vec::new(),
                };
                for child in &node.children {
                    let list = match child.name.as_str() {
                        "Numerator" => &mut cf.numerators,
                        "Denominator" => &mut cf.denominators,
                        _ => continue,
                    };
                    list.push(Coefficient {
                        value: child.number()?,
                        error: child.error()?,
                    });
                }
                // A digital stage with no coefficients carries only units.
                if cf.numerators.is_empty() && cf.denominators.is_empty() {
                    StageKind::GainOnly
                } else {
                    StageKind::Coefficients(cf)
                }
            }
            "ResponseList" => {
                let mut elements = Vec::new();
                for child in node.children.iter().filter(|c| c.name == "ResponseListElement") {
                    let amplitude = child.required("Amplitude")?;
                    let phase = child.required("Phase")?;
                    elements.push(ResponseListElement {
                        frequency: child.required_number("Frequency")?,
                        amplitude: amplitude.number()?,
                        amplitude_error: amplitude.error()?,
                        phase: phase.number()?,
                        phase_error: phase.error()?,
                    });
                }
                StageKind::ResponseList(ResponseList { elements })
            }
            "FIR" => {
                let symmetry = node.required("Symmetry")?.text.as_str();
                let symmetry =
                    Symmetry::from_xml(symmetry).ok_or_else(|| unparseable("Symmetry", symmetry))?;
                let coefficients = node
                    .children
                    .iter()
                    .filter(|c| c.name == "NumeratorCoefficient")
                    .map(Node::number)
                    .collect::<Result<Vec<_>>>()?;
                StageKind::Fir(Fir {
                    symmetry,
                    coefficients,
                })
            }
            _ => StageKind::Polynomial(polynomial(node, unparseable)?),
        };

        let fields: &[&str] = match node.name.as_str() {
            "PolesZeros" => &[
                "PzTransferFunctionType",
                "NormalizationFactor",
                "NormalizationFrequency",
                "Zero",
                "Pole",
            ],
            "Coefficients" => &["CfTransferFunctionType", "Numerator", "Denominator"],
            "ResponseList" => &["ResponseListElement"],
            "FIR" => &["Symmetry", "NumeratorCoefficient"],
            _ => POLYNOMIAL_FIELDS,
        };
        let known = |name: &str| {
            ["InputUnits", "OutputUnits", "Description"].contains(&name) || fields.contains(&name)
        };
        for child in node.children.iter().filter(|c| !known(c.name.as_str())) {
            let extension = self.extension(child, location, None);
            stage.filter_extensions.push(extension);
        }
        stage.kind = kind;
        Ok(())
    }
}

const POLYNOMIAL_FIELDS: &[&str] = &[
    "Description",
    "InputUnits",
    "OutputUnits",
    "ApproximationType",
    "FrequencyLowerBound",
    "FrequencyUpperBound",
    "ApproximationLowerBound",
    "ApproximationUpperBound",
    "MaximumError",
    "Coefficient",
];

/// Polynomial body shared by `<Polynomial>` filters and
/// `<InstrumentPolynomial>`.
fn polynomial(
    node: &Node,
    unparseable: impl Fn(&str, &str) -> MetadataError,
) -> Result<Polynomial> {
    let approximation = node.required("ApproximationType")?.text.as_str();
    let lower = node.required("FrequencyLowerBound")?;
    let frequency_units = match lower.attribute("unit") {
        Some("RADIANS") => FrequencyUnits::Radians,
        _ => FrequencyUnits::Hertz,
    };
    let coefficients = node
        .children
        .iter()
        .filter(|c| c.name == "Coefficient")
        .map(|c| {
            Ok(Coefficient {
                value: c.number()?,
                error: c.error()?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Polynomial {
        approximation: ApproximationType::from_xml(approximation)
            .ok_or_else(|| unparseable("ApproximationType", approximation))?,
        frequency_units,
        frequency_lower: lower.number()?,
        frequency_upper: node.required_number("FrequencyUpperBound")?,
        approximation_lower: node.required_number("ApproximationLowerBound")?,
        approximation_upper: node.required_number("ApproximationUpperBound")?,
        maximum_error: node.required_number("MaximumError")?,
        coefficients,
    })
}
