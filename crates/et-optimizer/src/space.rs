//! Search space definitions and sampling.

use et_types::{TunerError, TunerResult};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;

/// A single dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Stable dimension name (e.g. "guidance_scale").
    pub name: String,
    /// How values along this dimension are drawn.
    pub kind: DimensionKind,
}

/// Describes the domain of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DimensionKind {
    /// Finite, ordered set of labels.
    Categorical { labels: Vec<String> },
    /// Closed real interval [low, high].
    Continuous { low: f64, high: f64 },
}

/// A concrete coordinate along one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Real(f64),
    Label(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Label(label) => Some(label),
            Self::Real(_) => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real(v) => write!(f, "{v}"),
            Self::Label(v) => write!(f, "{v}"),
        }
    }
}

/// One value per dimension, in dimension order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point(Vec<ParameterValue>);

impl Point {
    pub fn new(values: Vec<ParameterValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[ParameterValue] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&ParameterValue> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}

/// The full search space: an ordered list of dimensions.
///
/// The order is the encoding order used by the surrogate model and must not
/// change once observations exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub dimensions: Vec<Dimension>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            dimensions: Vec::new(),
        }
    }

    pub fn add_continuous(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Continuous { low, high },
        });
        self
    }

    pub fn add_categorical<I, S>(mut self, name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Categorical {
                labels: labels.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    /// Reject spaces the sampler and surrogate cannot work with.
    pub fn validate(&self) -> TunerResult<()> {
        if self.dimensions.is_empty() {
            return Err(TunerError::Config("search space has no dimensions".into()));
        }
        for dim in &self.dimensions {
            match &dim.kind {
                DimensionKind::Continuous { low, high } => {
                    if !(low.is_finite() && high.is_finite() && low < high) {
                        return Err(TunerError::Config(format!(
                            "dimension {} has invalid bounds [{low}, {high}]",
                            dim.name
                        )));
                    }
                }
                DimensionKind::Categorical { labels } => {
                    if labels.is_empty() {
                        return Err(TunerError::Config(format!(
                            "dimension {} has no labels",
                            dim.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether every coordinate of `point` is type-matched and in range.
    pub fn contains(&self, point: &Point) -> bool {
        point.len() == self.len()
            && self
                .dimensions
                .iter()
                .zip(point.values())
                .all(|(dim, value)| match (&dim.kind, value) {
                    (DimensionKind::Continuous { low, high }, ParameterValue::Real(v)) => {
                        *v >= *low && *v <= *high
                    }
                    (DimensionKind::Categorical { labels }, ParameterValue::Label(l)) => {
                        labels.contains(l)
                    }
                    _ => false,
                })
    }

    /// Independent uniform draw across every dimension.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let values = self
            .dimensions
            .iter()
            .map(|dim| match &dim.kind {
                DimensionKind::Continuous { low, high } => {
                    ParameterValue::Real(rng.gen_range(*low..=*high))
                }
                DimensionKind::Categorical { labels } => {
                    ParameterValue::Label(labels[rng.gen_range(0..labels.len())].clone())
                }
            })
            .collect();
        Point::new(values)
    }

    /// Space-filling batch: each continuous dimension is split into `count`
    /// equal strata and every stratum receives exactly one draw, with the
    /// strata shuffled independently per dimension. Categorical coordinates
    /// are drawn uniformly.
    pub fn sample_space_filling<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Point> {
        let mut columns: Vec<Vec<ParameterValue>> = Vec::with_capacity(self.len());

        for dim in &self.dimensions {
            let column = match &dim.kind {
                DimensionKind::Continuous { low, high } => {
                    let mut strata: Vec<usize> = (0..count).collect();
                    strata.shuffle(rng);
                    strata
                        .into_iter()
                        .map(|s| {
                            let t = (s as f64 + rng.gen::<f64>()) / count as f64;
                            ParameterValue::Real((low + t * (high - low)).clamp(*low, *high))
                        })
                        .collect()
                }
                DimensionKind::Categorical { labels } => (0..count)
                    .map(|_| ParameterValue::Label(labels[rng.gen_range(0..labels.len())].clone()))
                    .collect(),
            };
            columns.push(column);
        }

        (0..count)
            .map(|i| Point::new(columns.iter().map(|c| c[i].clone()).collect()))
            .collect()
    }

    /// Width of the numeric feature vector produced by [`Self::to_features`].
    pub fn feature_len(&self) -> usize {
        self.dimensions
            .iter()
            .map(|d| match &d.kind {
                DimensionKind::Continuous { .. } => 1,
                DimensionKind::Categorical { labels } => labels.len(),
            })
            .sum()
    }

    /// Encode a point for the surrogate model.
    ///
    /// Continuous coordinates are scaled to [0, 1]. Categorical coordinates
    /// are one-hot encoded with weight 1/sqrt(2), so two different labels are
    /// exactly unit distance apart.
    pub fn to_features(&self, point: &Point) -> TunerResult<Vec<f64>> {
        if point.len() != self.len() {
            return Err(TunerError::Config(format!(
                "point has {} coordinates, space has {} dimensions",
                point.len(),
                self.len()
            )));
        }

        let mut features = Vec::with_capacity(self.feature_len());
        for (dim, value) in self.dimensions.iter().zip(point.values()) {
            match (&dim.kind, value) {
                (DimensionKind::Continuous { low, high }, ParameterValue::Real(v)) => {
                    features.push((v - low) / (high - low));
                }
                (DimensionKind::Categorical { labels }, ParameterValue::Label(label)) => {
                    let hot = labels.iter().position(|l| l == label).ok_or_else(|| {
                        TunerError::invalid_field(dim.name.clone(), format!("unknown label {label}"))
                    })?;
                    features.extend((0..labels.len()).map(|i| if i == hot { FRAC_1_SQRT_2 } else { 0.0 }));
                }
                (_, value) => {
                    return Err(TunerError::invalid_field(
                        dim.name.clone(),
                        format!("value {value} does not match the dimension kind"),
                    ))
                }
            }
        }
        Ok(features)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}
