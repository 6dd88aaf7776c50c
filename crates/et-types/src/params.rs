//! Backend selection and backend-specific parameter payloads.
//!
//! Both rendering backends take the same three knobs (strength, guidance
//! scale, ControlNet weight) but name two of them differently. The payload is
//! a tagged enum so that the field names of one backend never leak into the
//! other.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::errors::{TunerError, TunerResult};

/// Decimal places used when presenting strength and ControlNet weight.
pub const STRENGTH_DECIMALS: i32 = 2;
/// Decimal places used when presenting guidance scale.
pub const GUIDANCE_DECIMALS: i32 = 1;

/// Key carrying the backend selector in parameter dictionaries.
pub const BACKEND_KEY: &str = "api";

/// Target rendering backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Leonardo,
    StableDiffusion,
}

impl Backend {
    /// All backends, in search-space label order.
    pub const ALL: [Backend; 2] = [Backend::Leonardo, Backend::StableDiffusion];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Leonardo => "leonardo",
            Self::StableDiffusion => "stablediffusion",
        }
    }

    pub fn from_label(label: &str) -> TunerResult<Self> {
        Self::ALL
            .into_iter()
            .find(|backend| backend.label() == label)
            .ok_or_else(|| TunerError::UnknownBackend {
                label: label.to_string(),
            })
    }

    /// Values substituted when a reported dictionary omits a field.
    pub fn defaults(&self) -> BackendDefaults {
        match self {
            Self::Leonardo => BackendDefaults {
                strength: 0.25,
                guidance_scale: 7.0,
                controlnet_weight: 0.92,
            },
            Self::StableDiffusion => BackendDefaults {
                strength: 0.2,
                guidance_scale: 7.5,
                controlnet_weight: 0.95,
            },
        }
    }

    /// Field name this backend uses for the strength knob.
    pub fn strength_field(&self) -> &'static str {
        match self {
            Self::Leonardo => "init_strength",
            Self::StableDiffusion => "strength",
        }
    }

    /// Field name this backend uses for the ControlNet weight knob.
    pub fn controlnet_field(&self) -> &'static str {
        match self {
            Self::Leonardo => "controlnet_weight",
            Self::StableDiffusion => "controlnet_conditioning_scale",
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::Leonardo
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Backend {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s)
    }
}

/// Per-backend fallback values for partial parameter dictionaries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackendDefaults {
    pub strength: f64,
    pub guidance_scale: f64,
    pub controlnet_weight: f64,
}

/// Caller-facing parameter payload, discriminated by the `api` field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "api", rename_all = "lowercase")]
pub enum BackendParams {
    Leonardo {
        init_strength: f64,
        guidance_scale: f64,
        controlnet_weight: f64,
    },
    StableDiffusion {
        strength: f64,
        guidance_scale: f64,
        controlnet_conditioning_scale: f64,
    },
}

impl BackendParams {
    /// Build the payload for `backend`, routing the shared knobs to that
    /// backend's field names.
    pub fn new(backend: Backend, strength: f64, guidance_scale: f64, controlnet_weight: f64) -> Self {
        match backend {
            Backend::Leonardo => Self::Leonardo {
                init_strength: strength,
                guidance_scale,
                controlnet_weight,
            },
            Backend::StableDiffusion => Self::StableDiffusion {
                strength,
                guidance_scale,
                controlnet_conditioning_scale: controlnet_weight,
            },
        }
    }

    pub fn defaults(backend: Backend) -> Self {
        let d = backend.defaults();
        Self::new(backend, d.strength, d.guidance_scale, d.controlnet_weight)
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Leonardo { .. } => Backend::Leonardo,
            Self::StableDiffusion { .. } => Backend::StableDiffusion,
        }
    }

    pub fn strength(&self) -> f64 {
        match self {
            Self::Leonardo { init_strength, .. } => *init_strength,
            Self::StableDiffusion { strength, .. } => *strength,
        }
    }

    pub fn guidance_scale(&self) -> f64 {
        match self {
            Self::Leonardo { guidance_scale, .. } | Self::StableDiffusion { guidance_scale, .. } => {
                *guidance_scale
            }
        }
    }

    pub fn controlnet_weight(&self) -> f64 {
        match self {
            Self::Leonardo {
                controlnet_weight, ..
            } => *controlnet_weight,
            Self::StableDiffusion {
                controlnet_conditioning_scale,
                ..
            } => *controlnet_conditioning_scale,
        }
    }

    /// Presentation copy: strength and weight to 2 places, guidance to 1.
    pub fn rounded(&self) -> Self {
        Self::new(
            self.backend(),
            round_to(self.strength(), STRENGTH_DECIMALS),
            round_to(self.guidance_scale(), GUIDANCE_DECIMALS),
            round_to(self.controlnet_weight(), STRENGTH_DECIMALS),
        )
    }

    /// Parse a loosely-shaped parameter dictionary.
    ///
    /// A missing `api` selects Leonardo, missing (or null) fields take the
    /// backend defaults, and keys belonging to the other backend are ignored.
    /// An unrecognized `api` label or a non-numeric field is an error.
    pub fn from_value(value: &Value) -> TunerResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| TunerError::invalid_field("parameters", "expected an object"))?;

        let backend = match map.get(BACKEND_KEY) {
            None | Some(Value::Null) => Backend::default(),
            Some(Value::String(label)) => Backend::from_label(label)?,
            Some(other) => {
                return Err(TunerError::invalid_field(
                    BACKEND_KEY,
                    format!("expected a string, got {other}"),
                ))
            }
        };

        let defaults = backend.defaults();
        let strength = number_field(map, backend.strength_field(), defaults.strength)?;
        let guidance_scale = number_field(map, "guidance_scale", defaults.guidance_scale)?;
        let controlnet_weight =
            number_field(map, backend.controlnet_field(), defaults.controlnet_weight)?;

        Ok(Self::new(backend, strength, guidance_scale, controlnet_weight))
    }

    /// The dictionary form callers send back with a rating.
    pub fn to_value(&self) -> Value {
        json!({
            BACKEND_KEY: self.backend().label(),
            self.backend().strength_field(): self.strength(),
            "guidance_scale": self.guidance_scale(),
            self.backend().controlnet_field(): self.controlnet_weight(),
        })
    }
}

fn number_field(map: &Map<String, Value>, key: &str, default: f64) -> TunerResult<f64> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| TunerError::invalid_field(key, format!("expected a number, got {value}"))),
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
