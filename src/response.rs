//! Instrument responses: an ordered chain of [`Stage`]s plus the overall
//! [`Sensitivity`].
//!
//! Stage kinds are a closed sum type, [`StageKind`]; codecs map their
//! blockette types and XML elements onto it and the validator matches on
//! it exhaustively.

use crate::model::{Extension, UnitId};
use crate::time::NanoTime;
use crate::types::{
    ApproximationType, CfTransferFunction, FrequencyUnits, PzTransferFunction, Symmetry,
};
use crate::{MetadataError, Result};

/// A complex pole or zero with its SEED error estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoleZero {
    pub real: f64,
    pub imaginary: f64,
    pub real_error: f64,
    pub imaginary_error: f64,
}

impl PoleZero {
    pub fn new(real: f64, imaginary: f64) -> Self {
        Self {
            real,
            imaginary,
            real_error: 0.0,
            imaginary_error: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolesZeros {
    pub transfer_function: PzTransferFunction,
    /// A0 normalization factor.
    pub normalization_factor: f64,
    pub normalization_frequency: f64,
    pub zeros: Vec<PoleZero>,
    pub poles: Vec<PoleZero>,
}

/// A coefficient value with its error estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficient {
    pub value: f64,
    pub error: f64,
}

impl Coefficient {
    pub fn new(value: f64) -> Self {
        Self { value, error: 0.0 }
    }
}

/// Rational (IIR) or numerator-only (FIR-as-coefficients) filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients {
    pub transfer_function: CfTransferFunction,
    pub numerators: Vec<Coefficient>,
    pub denominators: Vec<Coefficient>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fir {
    pub symmetry: Symmetry,
    pub coefficients: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    pub approximation: ApproximationType,
    pub frequency_units: FrequencyUnits,
    pub frequency_lower: f64,
    pub frequency_upper: f64,
    /// Valid range of the approximated quantity (e.g. temperature).
    pub approximation_lower: f64,
    pub approximation_upper: f64,
    pub maximum_error: f64,
    pub coefficients: Vec<Coefficient>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseListElement {
    pub frequency: f64,
    pub amplitude: f64,
    pub amplitude_error: f64,
    pub phase: f64,
    pub phase_error: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseList {
    pub elements: Vec<ResponseListElement>,
}

/// Corner of a generic response: a frequency and the slope beyond it in
/// dB/decade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub frequency: f64,
    pub slope: f64,
}

/// Asymptotic amplitude response described by its corners (SEED
/// blockettes 046 and 056). StationXML has no element for it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericResponse {
    pub corners: Vec<Corner>,
}

/// Transfer function carried by a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageKind {
    PolesZeros(PolesZeros),
    Coefficients(Coefficients),
    Fir(Fir),
    Polynomial(Polynomial),
    ResponseList(ResponseList),
    Generic(GenericResponse),
    /// No transfer function; the stage is its gain (and decimation).
    GainOnly,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PolesZeros(_) => "PolesZeros",
            Self::Coefficients(_) => "Coefficients",
            Self::Fir(_) => "FIR",
            Self::Polynomial(_) => "Polynomial",
            Self::ResponseList(_) => "ResponseList",
            Self::Generic(_) => "Generic",
            Self::GainOnly => "GainOnly",
        }
    }

    /// True for kinds that operate on discrete samples and therefore need
    /// a decimation description.
    pub fn is_sampled(&self) -> bool {
        match self {
            Self::Fir(_) => true,
            Self::Coefficients(cf) => cf.transfer_function.is_digital(),
            Self::PolesZeros(pz) => pz.transfer_function == PzTransferFunction::Digital,
            Self::Polynomial(_) | Self::ResponseList(_) | Self::Generic(_) | Self::GainOnly => {
                false
            }
        }
    }
}

/// Historical calibration attached to a gain (blockette 58 fields 7-9).
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub value: f64,
    pub frequency: f64,
    pub time: Option<NanoTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gain {
    pub value: f64,
    pub frequency: f64,
    pub calibrations: Vec<Calibration>,
}

impl Gain {
    pub fn new(value: f64, frequency: f64) -> Self {
        Self {
            value,
            frequency,
            calibrations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decimation {
    pub input_sample_rate: f64,
    pub factor: u32,
    pub offset: u32,
    /// Estimated delay in seconds.
    pub delay: f64,
    /// Correction applied in seconds.
    pub correction: f64,
}

impl Decimation {
    pub fn output_sample_rate(&self) -> f64 {
        if self.factor == 0 {
            self.input_sample_rate
        } else {
            self.input_sample_rate / f64::from(self.factor)
        }
    }
}

/// One element of a response chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// 1-based position in the chain.
    pub number: u32,
    pub name: Option<String>,
    pub input_units: Option<UnitId>,
    pub output_units: Option<UnitId>,
    pub kind: StageKind,
    pub decimation: Option<Decimation>,
    pub gain: Option<Gain>,
    /// StationXML `resourceId` of the stage.
    pub resource_id: Option<String>,
    /// Description and `resourceId` of the stage's filter element.
    pub filter_description: Option<String>,
    pub filter_resource_id: Option<String>,
    /// Unknown children of the filter element, written at its end.
    pub filter_extensions: Vec<Extension>,
    pub extensions: Vec<Extension>,
}

impl Stage {
    /// Create an unnumbered stage; the number is assigned when the stage
    /// is added to a [`Response`].
    pub fn new(kind: StageKind) -> Self {
        Self {
            number: 0,
            name: None,
            input_units: None,
            output_units: None,
            kind,
            decimation: None,
            gain: None,
            resource_id: None,
            filter_description: None,
            filter_resource_id: None,
            filter_extensions: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn with_units(mut self, input: UnitId, output: UnitId) -> Self {
        self.input_units = Some(input);
        self.output_units = Some(output);
        self
    }

    pub fn with_gain(mut self, value: f64, frequency: f64) -> Self {
        self.gain = Some(Gain::new(value, frequency));
        self
    }

    pub fn with_decimation(mut self, decimation: Decimation) -> Self {
        self.decimation = Some(decimation);
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Overall channel sensitivity.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensitivity {
    pub value: f64,
    pub frequency: f64,
    pub input_units: Option<UnitId>,
    pub output_units: Option<UnitId>,
    /// Band over which the sensitivity holds and the amplitude variation
    /// within it (StationXML only).
    pub frequency_start: Option<f64>,
    pub frequency_end: Option<f64>,
    pub frequency_db_variation: Option<f64>,
}

impl Sensitivity {
    pub fn new(
        value: f64,
        frequency: f64,
        input_units: Option<UnitId>,
        output_units: Option<UnitId>,
    ) -> Self {
        Self {
            value,
            frequency,
            input_units,
            output_units,
            frequency_start: None,
            frequency_end: None,
            frequency_db_variation: None,
        }
    }
}

/// Polynomial response of the whole channel, the alternative to an
/// instrument sensitivity for non-linear sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentPolynomial {
    pub name: Option<String>,
    pub description: Option<String>,
    pub resource_id: Option<String>,
    pub input_units: Option<UnitId>,
    pub output_units: Option<UnitId>,
    pub polynomial: Polynomial,
}

/// A channel's response: stages numbered `1..=N` plus an optional declared
/// overall sensitivity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub(crate) stages: Vec<Stage>,
    pub sensitivity: Option<Sensitivity>,
    pub instrument_polynomial: Option<InstrumentPolynomial>,
    /// StationXML `resourceId` of the response.
    pub resource_id: Option<String>,
    pub extensions: Vec<Extension>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a response from stages that already carry their numbers, as
    /// read from a file. Numbering is left untouched for the validator.
    pub(crate) fn from_numbered(stages: Vec<Stage>, sensitivity: Option<Sensitivity>) -> Self {
        Self {
            stages,
            sensitivity,
            ..Self::default()
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.push_stage(stage);
        self
    }

    pub fn with_sensitivity(mut self, value: f64, frequency: f64) -> Self {
        let (input_units, output_units) = self.chain_units();
        self.sensitivity = Some(Sensitivity::new(value, frequency, input_units, output_units));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Mutable access to stage contents. The chain itself can only be
    /// reshaped through the numbered insert/remove operations.
    pub fn stages_mut(&mut self) -> &mut [Stage] {
        &mut self.stages
    }

    pub fn stage(&self, number: u32) -> Option<&Stage> {
        self.stages.iter().find(|s| s.number == number)
    }

    /// Append a stage, numbering it `N + 1`.
    pub fn push_stage(&mut self, mut stage: Stage) -> u32 {
        stage.number = self.stages.len() as u32 + 1;
        let number = stage.number;
        self.stages.push(stage);
        number
    }

    /// Insert a stage at position `number` (1-based), shifting later stages.
    pub fn insert_stage(&mut self, number: u32, stage: Stage) -> Result<()> {
        let index = number as usize;
        if index == 0 || index > self.stages.len() + 1 {
            return Err(MetadataError::Structure(format!(
                "cannot insert stage {number} into a chain of {} stages",
                self.stages.len()
            )));
        }
        self.stages.insert(index - 1, stage);
        self.renumber();
        Ok(())
    }

    /// Remove stage `number`, renumbering the stages after it.
    pub fn remove_stage(&mut self, number: u32) -> Result<Stage> {
        let index = self.index_of(number)?;
        let stage = self.stages.remove(index);
        self.renumber();
        Ok(stage)
    }

    /// Replace stage `number`, returning the previous stage.
    pub fn replace_stage(&mut self, number: u32, mut stage: Stage) -> Result<Stage> {
        let index = self.index_of(number)?;
        stage.number = number;
        Ok(std::mem::replace(&mut self.stages[index], stage))
    }

    fn index_of(&self, number: u32) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| s.number == number)
            .ok_or_else(|| MetadataError::Structure(format!("response has no stage {number}")))
    }

    fn renumber(&mut self) {
        for (i, stage) in self.stages.iter_mut().enumerate() {
            stage.number = i as u32 + 1;
        }
    }

    /// True when stages are numbered exactly `1..=N`.
    pub fn is_numbered_contiguously(&self) -> bool {
        self.stages
            .iter()
            .enumerate()
            .all(|(i, s)| s.number == i as u32 + 1)
    }

    /// Input units of the first stage that declares them and output units
    /// of the last stage that declares them.
    pub fn chain_units(&self) -> (Option<UnitId>, Option<UnitId>) {
        let input = self.stages.iter().find_map(|s| s.input_units);
        let output = self.stages.iter().rev().find_map(|s| s.output_units);
        (input, output)
    }

    /// Product of all declared stage gains, or `None` if no stage has one.
    pub fn computed_sensitivity(&self) -> Option<f64> {
        let mut gains = self.stages.iter().filter_map(|s| s.gain.as_ref()).peekable();
        gains.peek()?;
        Some(gains.map(|g| g.value).product())
    }

    /// Sample rate after the last decimating stage.
    pub fn output_sample_rate(&self) -> Option<f64> {
        self.stages
            .iter()
            .rev()
            .find_map(|s| s.decimation.as_ref())
            .map(Decimation::output_sample_rate)
    }

    /// Replace the declared sensitivity with the product of stage gains.
    ///
    /// The reference frequency is kept if a sensitivity was declared,
    /// otherwise the first stage's gain frequency is used. Returns `false`
    /// (leaving the response untouched) when no stage carries a gain.
    pub fn recalculate_sensitivity(&mut self) -> bool {
        let Some(value) = self.computed_sensitivity() else {
            return false;
        };
        let (chain_in, chain_out) = self.chain_units();
        let frequency = match &self.sensitivity {
            Some(s) => s.frequency,
            None => self
                .stages
                .iter()
                .find_map(|s| s.gain.as_ref())
                .map_or(1.0, |g| g.frequency),
        };
        let previous = self.sensitivity.take();
        self.sensitivity = Some(Sensitivity::new(
            value,
            frequency,
            previous.as_ref().and_then(|s| s.input_units).or(chain_in),
            previous.as_ref().and_then(|s| s.output_units).or(chain_out),
        ));
        true
    }

    /// Combine a sensor response with a data logger response.
    ///
    /// The data logger's first stage (its analog input placeholder) is
    /// replaced by the sensor's first stage, the chain is renumbered and the
    /// overall sensitivity is recomputed with the sensor's input units.
    /// Both responses must reference the same document's unit table.
    pub fn combine(sensor: &Response, datalogger: &Response) -> Result<Response> {
        let sensor_stage = sensor
            .stages
            .first()
            .ok_or_else(|| MetadataError::Structure("sensor response has no stages".into()))?;
        if datalogger.stages.is_empty() {
            return Err(MetadataError::Structure(
                "data logger response has no stages".into(),
            ));
        }
        let mut combined = datalogger.clone();
        combined.stages[0] = sensor_stage.clone();
        combined.renumber();
        if let Some(s) = combined.sensitivity.as_mut() {
            s.input_units = sensor_stage.input_units;
        }
        if !combined.recalculate_sensitivity() {
            log::warn!("combined response has no stage gains; sensitivity left unchanged");
        }
        Ok(combined)
    }
}

/// A stage-bearing fragment decoded from a SEED blockette or a RESP block.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StageFragment {
    Transfer {
        name: Option<String>,
        input_units: Option<UnitId>,
        output_units: Option<UnitId>,
        kind: StageKind,
    },
    Decimation(Decimation),
    Gain(Gain),
}

/// Collects numbered fragments for one channel into a [`Response`].
///
/// Fragments may arrive in any order; a repeated FIR, coefficients,
/// response list or generic fragment for the same stage continues that
/// stage's list.
#[derive(Debug, Default)]
pub(crate) struct StageAssembler {
    stages: Vec<Stage>,
    sensitivity: Option<Gain>,
}

impl StageAssembler {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty() && self.sensitivity.is_none()
    }

    pub fn push(&mut self, number: u32, fragment: StageFragment) -> std::result::Result<(), String> {
        if number == 0 {
            return match fragment {
                StageFragment::Gain(gain) if self.sensitivity.is_none() => {
                    self.sensitivity = Some(gain);
                    Ok(())
                }
                StageFragment::Gain(_) => Err("duplicate overall sensitivity (stage 0)".into()),
                _ => Err("stage 0 may only carry the overall sensitivity".into()),
            };
        }
        let stage = match self.stages.iter().position(|s| s.number == number) {
            Some(i) => &mut self.stages[i],
            None => {
                let mut stage = Stage::new(StageKind::GainOnly);
                stage.number = number;
                self.stages.push(stage);
                let last = self.stages.len() - 1;
                &mut self.stages[last]
            }
        };
        match fragment {
            StageFragment::Transfer {
                name,
                input_units,
                output_units,
                kind,
            } => match (&mut stage.kind, kind) {
                (StageKind::GainOnly, kind) => {
                    stage.kind = kind;
                    stage.name = name;
                    stage.input_units = input_units;
                    stage.output_units = output_units;
                }
                (StageKind::Fir(existing), StageKind::Fir(more)) => {
                    existing.coefficients.extend(more.coefficients);
                }
                (StageKind::Coefficients(existing), StageKind::Coefficients(more)) => {
                    existing.numerators.extend(more.numerators);
                    existing.denominators.extend(more.denominators);
                }
                (StageKind::ResponseList(existing), StageKind::ResponseList(more)) => {
                    existing.elements.extend(more.elements);
                }
                (StageKind::Generic(existing), StageKind::Generic(more)) => {
                    existing.corners.extend(more.corners);
                }
                (existing, kind) => {
                    return Err(format!(
                        "stage {number} has both {} and {} transfer functions",
                        existing.name(),
                        kind.name()
                    ));
                }
            },
            StageFragment::Decimation(decimation) => {
                if stage.decimation.is_some() {
                    return Err(format!("stage {number} has two decimation descriptions"));
                }
                stage.decimation = Some(decimation);
            }
            StageFragment::Gain(gain) => {
                if stage.gain.is_some() {
                    return Err(format!("stage {number} has two gains"));
                }
                stage.gain = Some(gain);
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> Response {
        self.stages.sort_by_key(|s| s.number);
        let mut response = Response::from_numbered(self.stages, None);
        if let Some(gain) = self.sensitivity {
            if !gain.calibrations.is_empty() {
                log::warn!(
                    "{} calibration entries on the overall sensitivity are not kept",
                    gain.calibrations.len()
                );
            }
            let (input_units, output_units) = response.chain_units();
            response.sensitivity = Some(Sensitivity::new(
                gain.value,
                gain.frequency,
                input_units,
                output_units,
            ));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fir(coefficients: &[f64]) -> StageKind {
        StageKind::Fir(Fir {
            symmetry: Symmetry::None,
            coefficients: coefficients.to_vec(),
        })
    }

    #[test]
    fn test_push_stage_numbers_from_one() {
        let response = Response::new()
            .with_stage(Stage::new(StageKind::GainOnly).with_gain(2.0, 1.0))
            .with_stage(Stage::new(StageKind::GainOnly).with_gain(3.0, 1.0));
        let numbers: Vec<u32> = response.stages().iter().map(|s| s.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(response.is_numbered_contiguously());
        assert_eq!(response.computed_sensitivity(), Some(6.0));
    }

    #[test]
    fn test_insert_and_remove_renumber() {
        let mut response = Response::new()
            .with_stage(Stage::new(StageKind::GainOnly).with_gain(2.0, 1.0))
            .with_stage(Stage::new(StageKind::GainOnly).with_gain(3.0, 1.0));
        response
            .insert_stage(1, Stage::new(StageKind::GainOnly).with_gain(5.0, 1.0))
            .unwrap();
        assert_eq!(response.stage(1).unwrap().gain.as_ref().unwrap().value, 5.0);
        assert!(response.is_numbered_contiguously());

        let removed = response.remove_stage(2).unwrap();
        assert_eq!(removed.gain.unwrap().value, 2.0);
        assert_eq!(response.stages().len(), 2);
        assert!(response.is_numbered_contiguously());

        assert!(response.remove_stage(7).is_err());
        assert!(response.insert_stage(9, Stage::new(StageKind::GainOnly)).is_err());
    }

    #[test]
    fn test_no_gains_means_no_computed_sensitivity() {
        let response = Response::new().with_stage(Stage::new(fir(&[1.0])));
        assert_eq!(response.computed_sensitivity(), None);
    }

    #[test]
    fn test_recalculate_sensitivity() {
        let mut response = Response::new()
            .with_stage(Stage::new(StageKind::GainOnly).with_gain(1500.0, 0.02))
            .with_stage(Stage::new(StageKind::GainOnly).with_gain(4.0e5, 0.0))
            .with_sensitivity(1.0, 0.05);
        assert!(response.recalculate_sensitivity());
        let s = response.sensitivity.unwrap();
        assert_eq!(s.value, 6.0e8);
        assert_eq!(s.frequency, 0.05);
    }

    #[test]
    fn test_combine_replaces_first_stage() {
        let sensor = Response::new().with_stage(Stage::new(StageKind::GainOnly).with_gain(1500.0, 1.0));
        let datalogger = Response::new()
            .with_stage(Stage::new(StageKind::GainOnly).with_gain(1.0, 1.0))
            .with_stage(Stage::new(fir(&[0.5, 0.5])).with_gain(400_000.0, 1.0));
        let combined = Response::combine(&sensor, &datalogger).unwrap();
        assert_eq!(combined.stages().len(), 2);
        assert_eq!(combined.stage(1).unwrap().gain.as_ref().unwrap().value, 1500.0);
        assert_eq!(combined.sensitivity.unwrap().value, 6.0e8);

        assert!(Response::combine(&Response::new(), &datalogger).is_err());
    }

    #[test]
    fn test_assembler_merges_fragments() {
        let mut asm = StageAssembler::default();
        asm.push(
            2,
            StageFragment::Transfer {
                name: None,
                input_units: None,
                output_units: None,
                kind: fir(&[0.25, 0.5]),
            },
        )
        .unwrap();
        asm.push(
            2,
            StageFragment::Transfer {
                name: None,
                input_units: None,
                output_units: None,
                kind: fir(&[0.25]),
            },
        )
        .unwrap();
        asm.push(1, StageFragment::Gain(Gain::new(10.0, 1.0))).unwrap();
        asm.push(0, StageFragment::Gain(Gain::new(20.0, 1.0))).unwrap();
        assert!(asm.push(1, StageFragment::Gain(Gain::new(1.0, 1.0))).is_err());

        let response = asm.finish();
        assert_eq!(response.stages()[0].number, 1);
        assert_eq!(response.stages()[0].kind, StageKind::GainOnly);
        match &response.stages()[1].kind {
            StageKind::Fir(f) => assert_eq!(f.coefficients, vec![0.25, 0.5, 0.25]),
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(response.sensitivity.unwrap().value, 20.0);
    }

    #[test]
    fn test_assembler_rejects_conflicting_kinds() {
        let mut asm = StageAssembler::default();
        asm.push(
            1,
            StageFragment::Transfer {
                name: None,
                input_units: None,
                output_units: None,
                kind: fir(&[1.0]),
            },
        )
        .unwrap();
        let err = asm
            .push(
                1,
                StageFragment::Transfer {
                    name: None,
                    input_units: None,
                    output_units: None,
                    kind: StageKind::ResponseList(ResponseList { elements: vec![] }),
                },
            )
            .unwrap_err();
        assert!(err.contains("FIR"));
    }

    #[test]
    fn test_decimation_output_rate() {
        let d = Decimation {
            input_sample_rate: 200.0,
            factor: 4,
            offset: 0,
            delay: 0.0,
            correction: 0.0,
        };
        assert_eq!(d.output_sample_rate(), 50.0);
    }
}
