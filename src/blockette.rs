//! Fixed-width ASCII blockette fields and the response blockette bodies
//! shared by inline (053-062) and dictionary (041-048) forms.
//!
//! Every SEED blockette starts with a 7-byte header: a 3-digit type and a
//! 4-digit total length. Fields are either fixed width (`A`, `I`, `D`) or
//! variable (`V`, terminated by `~`). Numbers follow the SEED masks, e.g.
//! `-#.#####E-##` for response values.

use log::warn;

use crate::response::{
    Calibration, Coefficient, Coefficients, Corner, Decimation, Gain, GenericResponse, PoleZero,
    PolesZeros, Polynomial, ResponseList, ResponseListElement,
};
use crate::time::NanoTime;
use crate::types::{ApproximationType, CfTransferFunction, FrequencyUnits, PzTransferFunction};
use crate::{MetadataError, Result};

/// Length of the type + length header at the start of every blockette.
pub const HEADER_LEN: usize = 7;

/// Largest length a blockette header can express.
pub const MAX_BLOCKETTE_LEN: usize = 9999;

/// Reads consecutive fields from one blockette body.
#[derive(Debug)]
pub struct FieldReader<'a> {
    blockette: u16,
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(blockette: u16, body: &'a [u8]) -> Self {
        Self {
            blockette,
            data: body,
            pos: 0,
        }
    }

    pub fn blockette(&self) -> u16 {
        self.blockette
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn invalid(&self, reason: String) -> MetadataError {
        MetadataError::InvalidField {
            blockette: self.blockette,
            reason,
        }
    }

    fn take(&mut self, width: usize) -> Result<&'a [u8]> {
        if self.remaining() < width {
            return Err(self.invalid(format!(
                "truncated: field at byte {} needs {width} bytes, {} left",
                self.pos + HEADER_LEN,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + width];
        self.pos += width;
        Ok(bytes)
    }

    /// Fixed-width text (`A` field), trailing spaces removed.
    pub fn text(&mut self, width: usize) -> Result<String> {
        let bytes = self.take(width)?;
        Ok(String::from_utf8_lossy(bytes).trim_end().to_string())
    }

    pub fn char(&mut self) -> Result<char> {
        Ok(self.take(1)?[0] as char)
    }

    /// Fixed-width unsigned integer (`I` field). A blank field reads as 0.
    pub fn int(&mut self, width: usize) -> Result<u32> {
        let bytes = self.take(width)?;
        let s = String::from_utf8_lossy(bytes);
        let s = s.trim();
        if s.is_empty() {
            return Ok(0);
        }
        s.parse()
            .map_err(|_| self.invalid(format!("expected integer, found {s:?}")))
    }

    /// Fixed-width decimal or exponent number (`D` field).
    pub fn float(&mut self, width: usize) -> Result<f64> {
        let bytes = self.take(width)?;
        let s = String::from_utf8_lossy(bytes);
        let s = s.trim();
        if s.is_empty() {
            return Ok(0.0);
        }
        s.parse()
            .map_err(|_| self.invalid(format!("expected number, found {s:?}")))
    }

    /// Variable-length text (`V` field) up to the `~` terminator.
    pub fn variable(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let Some(end) = rest.iter().position(|&b| b == b'~') else {
            return Err(self.invalid(format!(
                "truncated: unterminated variable field at byte {}",
                self.pos + HEADER_LEN
            )));
        };
        self.pos += end + 1;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }

    /// Variable-length SEED time; an empty field reads as `None`.
    pub fn time(&mut self) -> Result<Option<NanoTime>> {
        let s = self.variable()?;
        if s.trim().is_empty() {
            return Ok(None);
        }
        NanoTime::parse_seed(&s)
            .map(Some)
            .ok_or_else(|| self.invalid(format!("invalid time {s:?}")))
    }

    /// Fail if bytes are left over after the last field.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(self.invalid(format!("{n} bytes of trailing data"))),
        }
    }
}

/// A number that reads back differently from the value written.
#[derive(Debug, Clone, PartialEq)]
pub struct Loss {
    pub field: &'static str,
    pub value: f64,
    pub written: f64,
}

/// Builds one blockette, header included.
///
/// Numbers are rounded to their field mask; every rounding that changes
/// the value is recorded and can be collected with
/// [`take_losses`](Self::take_losses).
#[derive(Debug)]
pub struct FieldWriter {
    blockette: u16,
    body: Vec<u8>,
    losses: Vec<Loss>,
}

impl FieldWriter {
    pub fn new(blockette: u16) -> Self {
        Self {
            blockette,
            body: Vec::new(),
            losses: Vec::new(),
        }
    }

    pub fn blockette(&self) -> u16 {
        self.blockette
    }

    /// Roundings recorded since the last call.
    pub fn take_losses(&mut self) -> Vec<Loss> {
        std::mem::take(&mut self.losses)
    }

    fn check_rounding(&mut self, field: &'static str, value: f64, written: &str) {
        match written.trim().parse::<f64>() {
            Ok(read) if read == value => {}
            Ok(read) => self.losses.push(Loss {
                field,
                value,
                written: read,
            }),
            Err(_) => {}
        }
    }

    /// Bytes written so far, header included.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    fn overflow(&self, field: &'static str, value: impl ToString) -> MetadataError {
        MetadataError::FieldOverflow {
            blockette: self.blockette,
            field,
            value: value.to_string(),
        }
    }

    fn fixed(&mut self, field: &'static str, s: &str, width: usize) -> Result<()> {
        if s.len() > width {
            return Err(self.overflow(field, s));
        }
        self.body.extend_from_slice(s.as_bytes());
        self.body.resize(self.body.len() + width - s.len(), b' ');
        Ok(())
    }

    /// Fixed-width text (`A` field), space padded.
    pub fn text(&mut self, field: &'static str, s: &str, width: usize) -> Result<()> {
        self.fixed(field, s, width)
    }

    pub fn char(&mut self, c: char) {
        let mut buf = [0u8; 4];
        self.body.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }

    /// Zero-padded unsigned integer (`I` field).
    pub fn int(&mut self, field: &'static str, value: impl Into<u64>, width: usize) -> Result<()> {
        let value = value.into();
        let s = format!("{value:0width$}");
        self.fixed(field, &s, width)
    }

    /// Count field; the count must fit the field width.
    pub fn count(&mut self, field: &'static str, value: usize, width: usize) -> Result<()> {
        self.int(field, value as u64, width)
    }

    /// Fixed-point decimal such as `-##.######`, optionally with an
    /// explicit `+`.
    pub fn decimal(
        &mut self,
        field: &'static str,
        value: f64,
        width: usize,
        precision: usize,
        signed: bool,
    ) -> Result<()> {
        let s = if signed {
            format!("{value:+0width$.precision$}")
        } else {
            format!("{value:0width$.precision$}")
        };
        if !value.is_finite() {
            return Err(self.overflow(field, value));
        }
        self.fixed(field, &s, width)?;
        self.check_rounding(field, value, &s);
        Ok(())
    }

    /// Exponent number with `digits` mantissa decimals, e.g. `-#.#####E-##`
    /// for `digits = 5, signed = true`.
    pub fn exponent(
        &mut self,
        field: &'static str,
        value: f64,
        digits: usize,
        signed: bool,
    ) -> Result<()> {
        let width = digits + 6 + usize::from(signed);
        let Some(s) = format_exponent(value, digits, signed) else {
            return Err(self.overflow(field, value));
        };
        if s.len() != width {
            return Err(self.overflow(field, value));
        }
        self.body.extend_from_slice(s.as_bytes());
        self.check_rounding(field, value, &s);
        Ok(())
    }

    /// `-#.#####E-##` response value.
    pub fn value(&mut self, field: &'static str, value: f64) -> Result<()> {
        self.exponent(field, value, 5, true)
    }

    /// Variable-length text (`V` field). Text longer than `max` is
    /// truncated and a `~` inside the text is replaced.
    pub fn variable(&mut self, s: &str, max: usize) {
        let mut text: String = s.replace('~', "-");
        if text.chars().count() > max {
            warn!(
                "blockette {:03}: truncating {:?} to {max} characters",
                self.blockette, s
            );
            text = text.chars().take(max).collect();
        }
        self.body.extend_from_slice(text.as_bytes());
        self.body.push(b'~');
    }

    pub fn time(&mut self, time: Option<NanoTime>) {
        match time {
            Some(t) => self.variable(&t.to_seed_string(), 22),
            None => self.body.push(b'~'),
        }
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        let total = self.len();
        if total > MAX_BLOCKETTE_LEN {
            return Err(self.overflow("length", total));
        }
        let mut out = format!("{:03}{total:04}", self.blockette).into_bytes();
        out.extend_from_slice(&self.body);
        Ok(out)
    }
}

/// Format `value` as `[sign]D.DDDDE[+-]XX`. Returns `None` for values that
/// have no such representation (non-finite or a 3-digit exponent).
pub fn format_exponent(value: f64, digits: usize, signed: bool) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let s = format!("{:.*E}", digits, value.abs());
    let (mantissa, exp) = s.split_once('E')?;
    let exp: i32 = exp.parse().ok()?;
    if exp.abs() > 99 {
        return None;
    }
    let sign = if value < 0.0 {
        "-"
    } else if signed {
        "+"
    } else {
        ""
    };
    let exp_sign = if exp < 0 { '-' } else { '+' };
    Some(format!("{sign}{mantissa}E{exp_sign}{:02}", exp.abs()))
}

// --- response bodies ---
//
// Each function reads or writes the fields that follow a blockette's
// stage/key header and its unit references.

fn read_pairs(r: &mut FieldReader<'_>, count_width: usize) -> Result<Vec<Coefficient>> {
    let n = r.int(count_width)? as usize;
    let mut out = Vec::with_capacity(n.min(r.remaining() / 24 + 1));
    for _ in 0..n {
        let value = r.float(12)?;
        let error = r.float(12)?;
        out.push(Coefficient { value, error });
    }
    Ok(out)
}

fn write_pairs(
    w: &mut FieldWriter,
    field: &'static str,
    values: &[Coefficient],
    count_width: usize,
) -> Result<()> {
    w.count(field, values.len(), count_width)?;
    for c in values {
        w.value(field, c.value)?;
        w.value(field, c.error)?;
    }
    Ok(())
}

fn read_complex(r: &mut FieldReader<'_>) -> Result<Vec<PoleZero>> {
    let n = r.int(3)? as usize;
    let mut out = Vec::with_capacity(n.min(r.remaining() / 48 + 1));
    for _ in 0..n {
        out.push(PoleZero {
            real: r.float(12)?,
            imaginary: r.float(12)?,
            real_error: r.float(12)?,
            imaginary_error: r.float(12)?,
        });
    }
    Ok(out)
}

fn write_complex(w: &mut FieldWriter, field: &'static str, values: &[PoleZero]) -> Result<()> {
    w.count(field, values.len(), 3)?;
    for pz in values {
        w.value(field, pz.real)?;
        w.value(field, pz.imaginary)?;
        w.value(field, pz.real_error)?;
        w.value(field, pz.imaginary_error)?;
    }
    Ok(())
}

/// A0, normalization frequency, zeros, poles.
pub fn read_poles_zeros(r: &mut FieldReader<'_>, code: char) -> Result<PolesZeros> {
    let transfer_function = PzTransferFunction::from_code(code)?;
    let normalization_factor = r.float(12)?;
    let normalization_frequency = r.float(12)?;
    let zeros = read_complex(r)?;
    let poles = read_complex(r)?;
    Ok(PolesZeros {
        transfer_function,
        normalization_factor,
        normalization_frequency,
        zeros,
        poles,
    })
}

pub fn write_poles_zeros(w: &mut FieldWriter, pz: &PolesZeros) -> Result<()> {
    w.value("A0 normalization factor", pz.normalization_factor)?;
    w.value("normalization frequency", pz.normalization_frequency)?;
    write_complex(w, "zeros", &pz.zeros)?;
    write_complex(w, "poles", &pz.poles)
}

/// Numerators then denominators, each a counted list of value/error pairs.
pub fn read_coefficients(r: &mut FieldReader<'_>, code: char) -> Result<Coefficients> {
    let transfer_function = CfTransferFunction::from_code(code)?;
    let numerators = read_pairs(r, 4)?;
    let denominators = read_pairs(r, 4)?;
    Ok(Coefficients {
        transfer_function,
        numerators,
        denominators,
    })
}

pub fn write_coefficients(
    w: &mut FieldWriter,
    numerators: &[Coefficient],
    denominators: &[Coefficient],
) -> Result<()> {
    write_pairs(w, "numerators", numerators, 4)?;
    write_pairs(w, "denominators", denominators, 4)
}

pub fn read_response_list(r: &mut FieldReader<'_>) -> Result<ResponseList> {
    let n = r.int(4)? as usize;
    let mut elements = Vec::with_capacity(n.min(r.remaining() / 60 + 1));
    for _ in 0..n {
        elements.push(ResponseListElement {
            frequency: r.float(12)?,
            amplitude: r.float(12)?,
            amplitude_error: r.float(12)?,
            phase: r.float(12)?,
            phase_error: r.float(12)?,
        });
    }
    Ok(ResponseList { elements })
}

pub fn write_response_list(w: &mut FieldWriter, list: &ResponseList) -> Result<()> {
    w.count("responses", list.elements.len(), 4)?;
    for e in &list.elements {
        w.value("frequency", e.frequency)?;
        w.value("amplitude", e.amplitude)?;
        w.value("amplitude error", e.amplitude_error)?;
        w.value("phase", e.phase)?;
        w.value("phase error", e.phase_error)?;
    }
    Ok(())
}

/// Counted list of FIR coefficients in `-#.#######E-##` form.
pub fn read_fir_coefficients(r: &mut FieldReader<'_>) -> Result<Vec<f64>> {
    let n = r.int(4)? as usize;
    let mut out = Vec::with_capacity(n.min(r.remaining() / 14 + 1));
    for _ in 0..n {
        out.push(r.float(14)?);
    }
    Ok(out)
}

pub fn write_fir_coefficients(w: &mut FieldWriter, coefficients: &[f64]) -> Result<()> {
    w.count("coefficients", coefficients.len(), 4)?;
    for &c in coefficients {
        w.exponent("FIR coefficient", c, 7, true)?;
    }
    Ok(())
}

/// Counted list of corner frequency and slope pairs.
pub fn read_generic(r: &mut FieldReader<'_>) -> Result<GenericResponse> {
    let n = r.int(4)? as usize;
    let mut corners = Vec::with_capacity(n.min(r.remaining() / 24 + 1));
    for _ in 0..n {
        corners.push(Corner {
            frequency: r.float(12)?,
            slope: r.float(12)?,
        });
    }
    Ok(GenericResponse { corners })
}

pub fn write_generic(w: &mut FieldWriter, generic: &GenericResponse) -> Result<()> {
    w.count("corners", generic.corners.len(), 4)?;
    for c in &generic.corners {
        w.value("corner frequency", c.frequency)?;
        w.value("corner slope", c.slope)?;
    }
    Ok(())
}

/// Approximation type through the coefficient list.
pub fn read_polynomial(r: &mut FieldReader<'_>) -> Result<Polynomial> {
    let approximation = ApproximationType::from_code(r.char()?)?;
    let frequency_units = FrequencyUnits::from_code(r.char()?)?;
    Ok(Polynomial {
        approximation,
        frequency_units,
        frequency_lower: r.float(12)?,
        frequency_upper: r.float(12)?,
        approximation_lower: r.float(12)?,
        approximation_upper: r.float(12)?,
        maximum_error: r.float(12)?,
        coefficients: read_pairs(r, 3)?,
    })
}

pub fn write_polynomial(w: &mut FieldWriter, p: &Polynomial) -> Result<()> {
    w.char(p.approximation.to_code());
    w.char(p.frequency_units.to_code());
    w.value("lower frequency bound", p.frequency_lower)?;
    w.value("upper frequency bound", p.frequency_upper)?;
    w.value("lower approximation bound", p.approximation_lower)?;
    w.value("upper approximation bound", p.approximation_upper)?;
    w.value("maximum absolute error", p.maximum_error)?;
    write_pairs(w, "polynomial coefficients", &p.coefficients, 3)
}

/// Input sample rate, factor, offset, delay, correction.
pub fn read_decimation(r: &mut FieldReader<'_>) -> Result<Decimation> {
    Ok(Decimation {
        input_sample_rate: r.float(10)?,
        factor: r.int(5)?,
        offset: r.int(5)?,
        delay: r.float(11)?,
        correction: r.float(11)?,
    })
}

pub fn write_decimation(w: &mut FieldWriter, d: &Decimation) -> Result<()> {
    w.exponent("input sample rate", d.input_sample_rate, 4, false)?;
    w.int("decimation factor", d.factor, 5)?;
    w.int("decimation offset", d.offset, 5)?;
    w.exponent("estimated delay", d.delay, 4, true)?;
    w.exponent("correction applied", d.correction, 4, true)
}

/// Sensitivity, frequency and calibration history.
pub fn read_gain(r: &mut FieldReader<'_>) -> Result<Gain> {
    let value = r.float(12)?;
    let frequency = r.float(12)?;
    let n = r.int(2)? as usize;
    let mut calibrations = Vec::with_capacity(n);
    for _ in 0..n {
        calibrations.push(Calibration {
            value: r.float(12)?,
            frequency: r.float(12)?,
            time: r.time()?,
        });
    }
    Ok(Gain {
        value,
        frequency,
        calibrations,
    })
}

pub fn write_gain(w: &mut FieldWriter, g: &Gain) -> Result<()> {
    w.value("sensitivity", g.value)?;
    w.value("frequency", g.frequency)?;
    w.count("calibrations", g.calibrations.len(), 2)?;
    for c in &g.calibrations {
        w.value("calibration sensitivity", c.value)?;
        w.value("calibration frequency", c.frequency)?;
        w.time(c.time);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponent_masks() {
        assert_eq!(format_exponent(1.0e9, 5, true).unwrap(), "+1.00000E+09");
        assert_eq!(format_exponent(-0.0123, 5, true).unwrap(), "-1.23000E-02");
        assert_eq!(format_exponent(20.0, 4, false).unwrap(), "2.0000E+01");
        assert_eq!(format_exponent(0.0, 5, true).unwrap(), "+0.00000E+00");
        assert_eq!(format_exponent(1e-120, 5, true), None);
        assert_eq!(format_exponent(f64::NAN, 5, true), None);
    }

    #[test]
    fn test_writer_header_and_fields() {
        let mut w = FieldWriter::new(50);
        w.text("station", "ANMO", 5).unwrap();
        w.decimal("latitude", 34.9459, 10, 6, true).unwrap();
        w.decimal("longitude", -106.4572, 11, 6, true).unwrap();
        w.decimal("elevation", 1850.0, 7, 1, true).unwrap();
        w.variable("Albuquerque~NM", 60);
        let bytes = w.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "0500055ANMO +34.945900-106.457200+1850.0Albuquerque-NM~"
        );
    }

    #[test]
    fn test_reader_fields() {
        let body = b"ANMO +34.945900-106.457200+1850.0Albuquerque~2004,001~~";
        let mut r = FieldReader::new(50, body);
        assert_eq!(r.text(5).unwrap(), "ANMO");
        assert_eq!(r.float(10).unwrap(), 34.9459);
        assert_eq!(r.float(11).unwrap(), -106.4572);
        assert_eq!(r.float(7).unwrap(), 1850.0);
        assert_eq!(r.variable().unwrap(), "Albuquerque");
        assert_eq!(r.time().unwrap(), Some(NanoTime::from_day(2004, 1)));
        assert_eq!(r.time().unwrap(), None);
        r.finish().unwrap();
    }

    #[test]
    fn test_truncated_field_is_reported() {
        let mut r = FieldReader::new(52, b"00BH");
        r.text(2).unwrap();
        let err = r.text(3).unwrap_err();
        assert!(err.is_truncation());
        let err = FieldReader::new(50, b"no terminator").variable().unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut w = FieldWriter::new(52);
        let err = w.int("stage", 100u32, 2).unwrap_err();
        assert!(matches!(err, MetadataError::FieldOverflow { .. }));
        let err = w.exponent("sample rate", -1.0, 4, false).unwrap_err();
        assert!(matches!(err, MetadataError::FieldOverflow { .. }));
    }

    #[test]
    fn test_rounding_is_recorded() {
        let mut w = FieldWriter::new(50);
        w.decimal("latitude", 34.9459, 10, 6, true).unwrap();
        assert!(w.take_losses().is_empty());
        w.decimal("longitude", 10.1234567, 11, 6, true).unwrap();
        w.value("sensitivity", 1234567.0).unwrap();
        let losses = w.take_losses();
        assert_eq!(losses.len(), 2);
        assert_eq!(losses[0].field, "longitude");
        assert_eq!(losses[0].written, 10.123457);
        assert_eq!(losses[1].value, 1234567.0);
        assert_eq!(losses[1].written, 1234570.0);
        assert!(w.take_losses().is_empty());
    }

    #[test]
    fn test_generic_body() {
        let generic = GenericResponse {
            corners: vec![
                Corner {
                    frequency: 0.01,
                    slope: 20.0,
                },
                Corner {
                    frequency: 10.0,
                    slope: -40.0,
                },
            ],
        };
        let mut w = FieldWriter::new(56);
        write_generic(&mut w, &generic).unwrap();
        assert!(w.take_losses().is_empty());
        let bytes = w.finish().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 4 + 48);
        let mut r = FieldReader::new(56, &bytes[HEADER_LEN..]);
        assert_eq!(read_generic(&mut r).unwrap(), generic);
        r.finish().unwrap();
    }

    #[test]
    fn test_pole_zero_body() {
        let pz = PolesZeros {
            transfer_function: PzTransferFunction::LaplaceRadians,
            normalization_factor: 1.0,
            normalization_frequency: 1.0,
            zeros: vec![PoleZero::new(0.0, 0.0)],
            poles: vec![
                PoleZero::new(-0.037, 0.037),
                PoleZero::new(-0.037, -0.037),
            ],
        };
        let mut w = FieldWriter::new(53);
        write_poles_zeros(&mut w, &pz).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 24 + 3 + 48 + 3 + 96);

        let mut r = FieldReader::new(53, &bytes[HEADER_LEN..]);
        let decoded = read_poles_zeros(&mut r, 'A').unwrap();
        r.finish().unwrap();
        assert_eq!(decoded, pz);
    }

    #[test]
    fn test_gain_with_history() {
        let gain = Gain {
            value: 6.0e8,
            frequency: 0.02,
            calibrations: vec![Calibration {
                value: 5.9e8,
                frequency: 0.02,
                time: NanoTime::parse_seed("2010,100,00:00:00.0000"),
            }],
        };
        let mut w = FieldWriter::new(58);
        write_gain(&mut w, &gain).unwrap();
        let bytes = w.finish().unwrap();
        let mut r = FieldReader::new(58, &bytes[HEADER_LEN..]);
        assert_eq!(read_gain(&mut r).unwrap(), gain);
    }
}
