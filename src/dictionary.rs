//! Abbreviation dictionary of a dataless SEED volume.
//!
//! Station and channel blockettes reference data formats (030), comments
//! (031), generic abbreviations (033) and units (034) by integer key, and
//! blockette 060 references response dictionary entries (041-048). Cited
//! sources (032) are kept with their keys on the document. On read
//! the keys are resolved through a [`Dictionary`]; on write a
//! [`DictionaryBuilder`] deduplicates the strings across the document and
//! assigns keys in first-seen order.

use std::collections::HashMap;

use log::trace;

use crate::blockette::{
    FieldReader, FieldWriter, read_coefficients, read_decimation, read_fir_coefficients,
    read_gain, read_generic, read_poles_zeros, read_polynomial, read_response_list,
};
use crate::model::{CitedSource, DataFormat, Unit, UnitId, UnitTable};
use crate::response::{Decimation, Fir, Gain, StageKind};
use crate::types::Symmetry;
use crate::Result;

/// Comment description (blockette 031).
#[derive(Debug, Clone, PartialEq)]
pub struct CommentEntry {
    pub class: char,
    pub text: String,
    pub level_units: u32,
}

/// A response dictionary entry (041-048) with unresolved unit keys.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEntry {
    Transfer {
        name: String,
        input: u32,
        output: u32,
        kind: StageKind,
    },
    Decimation(Decimation),
    Gain(Gain),
}

/// Read-side dictionary, keyed by lookup code.
#[derive(Debug, Default)]
pub struct Dictionary {
    pub formats: HashMap<u32, DataFormat>,
    pub comments: HashMap<u32, CommentEntry>,
    pub abbreviations: HashMap<u32, String>,
    pub units: HashMap<u32, UnitId>,
    pub responses: HashMap<u32, ResponseEntry>,
    /// In definition order.
    pub cited_sources: Vec<CitedSource>,
}

/// Blockette types this module parses.
pub fn is_dictionary_blockette(blockette_type: u16) -> bool {
    matches!(blockette_type, 30..=34 | 41..=48)
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one dictionary blockette body. Units are interned into
    /// `units` in the order they are defined.
    pub fn read(&mut self, blockette_type: u16, body: &[u8], units: &mut UnitTable) -> Result<()> {
        let mut r = FieldReader::new(blockette_type, body);
        match blockette_type {
            30 => {
                let name = r.variable()?;
                let key = r.int(4)?;
                let family = r.int(3)? as u16;
                let count = r.int(2)?;
                let keys = (0..count)
                    .map(|_| r.variable())
                    .collect::<Result<Vec<_>>>()?;
                self.formats.insert(key, DataFormat { name, family, keys });
            }
            31 => {
                let key = r.int(4)?;
                let class = r.char()?;
                let text = r.variable()?;
                let level_units = r.int(3)?;
                self.comments.insert(
                    key,
                    CommentEntry {
                        class,
                        text,
                        level_units,
                    },
                );
            }
            32 => {
                let key = r.int(2)?;
                let name = r.variable()?;
                let date = r.variable()?;
                let publisher = r.variable()?;
                self.cited_sources.push(CitedSource {
                    key,
                    name,
                    date,
                    publisher,
                });
            }
            33 => {
                let key = r.int(3)?;
                let text = r.variable()?;
                self.abbreviations.insert(key, text);
            }
            34 => {
                let key = r.int(3)?;
                let name = r.variable()?;
                let description = r.variable()?;
                let mut unit = Unit::new(&name);
                if !description.is_empty() {
                    unit.description = Some(description);
                }
                self.units.insert(key, units.intern(unit));
            }
            41 => {
                let (key, name) = (r.int(4)?, r.variable()?);
                let symmetry = Symmetry::from_code(r.char()?)?;
                let (input, output) = (r.int(3)?, r.int(3)?);
                let coefficients = read_fir_coefficients(&mut r)?;
                let kind = StageKind::Fir(Fir {
                    symmetry,
                    coefficients,
                });
                self.insert_transfer(key, name, input, output, kind);
            }
            42 => {
                let (key, name) = (r.int(4)?, r.variable()?);
                r.char()?;
                let (input, output) = (r.int(3)?, r.int(3)?);
                let kind = StageKind::Polynomial(read_polynomial(&mut r)?);
                self.insert_transfer(key, name, input, output, kind);
            }
            43 => {
                let (key, name) = (r.int(4)?, r.variable()?);
                let code = r.char()?;
                let (input, output) = (r.int(3)?, r.int(3)?);
                let kind = StageKind::PolesZeros(read_poles_zeros(&mut r, code)?);
                self.insert_transfer(key, name, input, output, kind);
            }
            44 => {
                let (key, name) = (r.int(4)?, r.variable()?);
                let code = r.char()?;
                let (input, output) = (r.int(3)?, r.int(3)?);
                let kind = StageKind::Coefficients(read_coefficients(&mut r, code)?);
                self.insert_transfer(key, name, input, output, kind);
            }
            45 => {
                let (key, name) = (r.int(4)?, r.variable()?);
                let (input, output) = (r.int(3)?, r.int(3)?);
                let kind = StageKind::ResponseList(read_response_list(&mut r)?);
                self.insert_transfer(key, name, input, output, kind);
            }
            46 => {
                let (key, name) = (r.int(4)?, r.variable()?);
                let (input, output) = (r.int(3)?, r.int(3)?);
                let kind = StageKind::Generic(read_generic(&mut r)?);
                self.insert_transfer(key, name, input, output, kind);
            }
            47 => {
                let (key, _name) = (r.int(4)?, r.variable()?);
                let decimation = read_decimation(&mut r)?;
                self.responses
                    .insert(key, ResponseEntry::Decimation(decimation));
            }
            48 => {
                let (key, _name) = (r.int(4)?, r.variable()?);
                let gain = read_gain(&mut r)?;
                self.responses.insert(key, ResponseEntry::Gain(gain));
            }
            other => {
                return Err(crate::MetadataError::InvalidField {
                    blockette: other,
                    reason: "not a dictionary blockette".into(),
                });
            }
        }
        trace!("read dictionary blockette {blockette_type:03}");
        r.finish()
    }

    fn insert_transfer(&mut self, key: u32, name: String, input: u32, output: u32, kind: StageKind) {
        self.responses.insert(
            key,
            ResponseEntry::Transfer {
                name,
                input,
                output,
                kind,
            },
        );
    }
}

/// Write-side dictionary: deduplicates entries and assigns 1-based keys
/// in first-seen order.
#[derive(Debug, Default)]
pub struct DictionaryBuilder {
    formats: Vec<DataFormat>,
    comments: Vec<(char, String)>,
    abbreviations: Vec<String>,
    units: Vec<Unit>,
    cited_sources: Vec<CitedSource>,
}

fn key_of<T: PartialEq>(entries: &mut Vec<T>, entry: T) -> u32 {
    let index = match entries.iter().position(|e| *e == entry) {
        Some(i) => i,
        None => {
            entries.push(entry);
            entries.len() - 1
        }
    };
    index as u32 + 1
}

impl DictionaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format_key(&mut self, format: &DataFormat) -> u32 {
        key_of(&mut self.formats, format.clone())
    }

    pub fn comment_key(&mut self, class: char, text: &str) -> u32 {
        key_of(&mut self.comments, (class, text.to_string()))
    }

    pub fn abbreviation_key(&mut self, text: &str) -> u32 {
        key_of(&mut self.abbreviations, text.to_string())
    }

    pub fn unit_key(&mut self, unit: &Unit) -> u32 {
        key_of(&mut self.units, unit.clone())
    }

    /// Cited sources keep their own keys.
    pub fn cited_sources(&mut self, sources: &[CitedSource]) {
        self.cited_sources = sources.to_vec();
    }

    /// Dictionary blockettes 030 through 034, in that order.
    pub fn blockettes(&self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for (i, format) in self.formats.iter().enumerate() {
            let mut w = FieldWriter::new(30);
            w.variable(&format.name, 50);
            w.count("data format identifier code", i + 1, 4)?;
            w.int("data family type", format.family, 3)?;
            w.count("number of decoder keys", format.keys.len(), 2)?;
            for key in &format.keys {
                w.variable(key, 9999);
            }
            out.push(w.finish()?);
        }
        for (i, (class, text)) in self.comments.iter().enumerate() {
            let mut w = FieldWriter::new(31);
            w.count("comment code key", i + 1, 4)?;
            w.char(*class);
            w.variable(text, 70);
            w.int("units of comment level", 0u32, 3)?;
            out.push(w.finish()?);
        }
        for source in &self.cited_sources {
            let mut w = FieldWriter::new(32);
            w.int("source lookup code", source.key, 2)?;
            w.variable(&source.name, 70);
            w.variable(&source.date, 70);
            w.variable(&source.publisher, 50);
            out.push(w.finish()?);
        }
        for (i, text) in self.abbreviations.iter().enumerate() {
            let mut w = FieldWriter::new(33);
            w.count("abbreviation lookup code", i + 1, 3)?;
            w.variable(text, 50);
            out.push(w.finish()?);
        }
        for (i, unit) in self.units.iter().enumerate() {
            let mut w = FieldWriter::new(34);
            w.count("unit lookup code", i + 1, 3)?;
            w.variable(&unit.name, 20);
            w.variable(unit.description.as_deref().unwrap_or(""), 50);
            out.push(w.finish()?);
        }
        Ok(out)
    }
}
