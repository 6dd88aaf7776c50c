//! Mapping between flat search-space points and backend parameter payloads.

use et_types::{Backend, BackendParams, TunerError, TunerResult};
use serde_json::Value;

use crate::space::{ParameterValue, Point, SearchSpace};

pub const API_DIM: usize = 0;
pub const STRENGTH_DIM: usize = 1;
pub const GUIDANCE_DIM: usize = 2;
pub const CONTROLNET_DIM: usize = 3;

pub const STRENGTH_BOUNDS: (f64, f64) = (0.1, 0.5);
pub const GUIDANCE_BOUNDS: (f64, f64) = (5.0, 12.0);
pub const CONTROLNET_BOUNDS: (f64, f64) = (0.7, 0.99);

/// The enhancement search space, in encoding order:
/// `api`, `init_strength`, `guidance_scale`, `controlnet_weight`.
pub fn enhancement_space() -> SearchSpace {
    SearchSpace::new()
        .add_categorical("api", Backend::ALL.iter().map(Backend::label))
        .add_continuous("init_strength", STRENGTH_BOUNDS.0, STRENGTH_BOUNDS.1)
        .add_continuous("guidance_scale", GUIDANCE_BOUNDS.0, GUIDANCE_BOUNDS.1)
        .add_continuous("controlnet_weight", CONTROLNET_BOUNDS.0, CONTROLNET_BOUNDS.1)
}

/// Converts between engine points and caller-facing parameter payloads.
///
/// The strength and ControlNet weight dimensions are shared by both
/// backends; the codec routes them to whichever field name the selected
/// backend uses.
#[derive(Debug, Clone)]
pub struct ParameterCodec {
    space: SearchSpace,
}

impl ParameterCodec {
    pub fn new() -> Self {
        Self {
            space: enhancement_space(),
        }
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Exact payload for `point`, without presentation rounding.
    pub fn decode(&self, point: &Point) -> TunerResult<BackendParams> {
        let backend = match point.get(API_DIM) {
            Some(ParameterValue::Label(label)) => Backend::from_label(label)?,
            other => {
                return Err(TunerError::invalid_field(
                    "api",
                    format!("expected a backend label, got {other:?}"),
                ))
            }
        };

        Ok(BackendParams::new(
            backend,
            self.real(point, STRENGTH_DIM)?,
            self.real(point, GUIDANCE_DIM)?,
            self.real(point, CONTROLNET_DIM)?,
        ))
    }

    /// Payload for `point` rounded for presentation.
    pub fn format(&self, point: &Point) -> TunerResult<BackendParams> {
        Ok(self.decode(point)?.rounded())
    }

    pub fn encode(&self, params: &BackendParams) -> Point {
        Point::new(vec![
            ParameterValue::Label(params.backend().label().to_string()),
            ParameterValue::Real(params.strength()),
            ParameterValue::Real(params.guidance_scale()),
            ParameterValue::Real(params.controlnet_weight()),
        ])
    }

    /// Encode a loosely-shaped caller dictionary, filling gaps with the
    /// backend defaults.
    pub fn encode_value(&self, value: &Value) -> TunerResult<Point> {
        Ok(self.encode(&BackendParams::from_value(value)?))
    }

    fn real(&self, point: &Point, index: usize) -> TunerResult<f64> {
        point
            .get(index)
            .and_then(ParameterValue::as_f64)
            .ok_or_else(|| {
                let name = &self.space.dimensions[index].name;
                TunerError::invalid_field(name.clone(), "expected a real coordinate")
            })
    }
}

impl Default for ParameterCodec {
    fn default() -> Self {
        Self::new()
    }
}
