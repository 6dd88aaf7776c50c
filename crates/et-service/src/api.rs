//! Request and response shapes for the engine boundary operations.

use et_optimizer::Phase;
use et_types::BackendParams;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which part of the image the enhancement targets. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancementMode {
    Structure,
    Surfaces,
}

fn default_num_suggestions() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestRequest {
    pub mode: EnhancementMode,
    #[serde(default = "default_num_suggestions")]
    pub num_suggestions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<BackendParams>,
}

/// One rated parameter set as reported by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedParameters {
    pub parameters: serde_json::Value,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TellRequest {
    pub results: Vec<RatedParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TellResponse {
    pub updated: bool,
    pub samples_seen: usize,
    pub convergence_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub run_id: Uuid,
    pub phase: Phase,
    pub samples_seen: usize,
    pub convergence: f64,
    pub best_parameters: Option<serde_json::Value>,
    pub best_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub optimizer_samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suggest_request_defaults_to_two() {
        let req: SuggestRequest = serde_json::from_value(json!({ "mode": "surfaces" })).unwrap();
        assert_eq!(req.mode, EnhancementMode::Surfaces);
        assert_eq!(req.num_suggestions, 2);
    }

    #[test]
    fn suggest_request_rejects_unknown_mode() {
        assert!(serde_json::from_value::<SuggestRequest>(json!({ "mode": "lighting" })).is_err());
    }

    #[test]
    fn tell_request_keeps_raw_parameters() {
        let req: TellRequest = serde_json::from_value(json!({
            "results": [
                { "parameters": { "api": "stablediffusion", "strength": 0.3 }, "rating": 4.5 },
                { "parameters": {}, "rating": 2 },
            ]
        }))
        .unwrap();
        assert_eq!(req.results.len(), 2);
        assert_eq!(req.results[0].parameters["strength"], 0.3);
        assert_eq!(req.results[1].rating, 2.0);
    }
}
