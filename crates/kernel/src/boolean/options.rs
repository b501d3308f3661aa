use serde::{Deserialize, Serialize};

use crate::geometry::curve_intersection::NumericBudget;
use crate::geometry::surface_intersection::MarchSettings;

use super::context::CancelToken;

/// When two faces count as lying on the same surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SameDomainPolicy {
    /// Largest angle between normals of coincident samples.
    pub angular_tolerance: f64,
    /// Allowed gap between the surfaces, in multiples of the summed face tolerances.
    pub gap_factor: f64,
    /// Sample points tested for the numeric check.
    pub samples: usize,
}

impl Default for SameDomainPolicy {
    fn default() -> Self {
        Self {
            angular_tolerance: 1e-6,
            gap_factor: 2.0,
            samples: 16,
        }
    }
}

/// Iteration caps of the numeric solvers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverBudget {
    pub newton_iterations: usize,
    pub march_steps: usize,
    pub curve_samples: usize,
}

impl Default for SolverBudget {
    fn default() -> Self {
        Self {
            newton_iterations: 32,
            march_steps: 2000,
            curve_samples: 64,
        }
    }
}

impl SolverBudget {
    pub fn numeric(&self) -> NumericBudget {
        NumericBudget {
            samples: self.curve_samples,
            iterations: self.newton_iterations,
        }
    }

    pub fn march(&self, step: f64, tolerance: f64) -> MarchSettings {
        MarchSettings {
            step,
            max_steps: self.march_steps,
            iterations: self.newton_iterations,
            tolerance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    /// Ray directions tried before a point is declared ambiguous.
    pub max_probes: usize,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self { max_probes: 7 }
    }
}

/// Configuration of one Boolean call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BooleanOptions {
    /// Extra distance under which geometry is treated as coincident. Unset
    /// means the largest tolerance found in the operands.
    pub fuzzy_tolerance: Option<f64>,
    /// Keep section edges and touch points inside the result as free sub-shapes.
    pub keep_internal: bool,
    /// Run phases on the rayon pool.
    pub parallel: bool,
    /// Largest tolerance a merged vertex may reach.
    pub tolerance_ceiling: f64,
    pub same_domain: SameDomainPolicy,
    pub budget: SolverBudget,
    pub classifier: ClassifierOptions,
    #[serde(skip)]
    pub cancel: Option<CancelToken>,
}

impl Default for BooleanOptions {
    fn default() -> Self {
        Self {
            fuzzy_tolerance: None,
            keep_internal: false,
            parallel: true,
            tolerance_ceiling: 1e-3,
            same_domain: SameDomainPolicy::default(),
            budget: SolverBudget::default(),
            classifier: ClassifierOptions::default(),
            cancel: None,
        }
    }
}

impl BooleanOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn with_fuzzy(mut self, fuzzy: f64) -> Self {
        self.fuzzy_tolerance = Some(fuzzy);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let opts = BooleanOptions::from_json(r#"{ "fuzzy_tolerance": 1e-5, "budget": { "march_steps": 10 } }"#).unwrap();
        assert_eq!(opts.fuzzy_tolerance, Some(1e-5));
        assert_eq!(opts.budget.march_steps, 10);
        assert_eq!(opts.budget.newton_iterations, 32);
        assert_eq!(opts.tolerance_ceiling, 1e-3);
        assert!(opts.parallel);
    }

    #[test]
    fn test_json_round_trip() {
        let opts = BooleanOptions::default().with_fuzzy(1e-4).sequential();
        let back = BooleanOptions::from_json(&opts.to_json().unwrap()).unwrap();
        assert_eq!(back.fuzzy_tolerance, Some(1e-4));
        assert!(!back.parallel);
        assert_eq!(back.same_domain, SameDomainPolicy::default());
    }

    #[test]
    fn test_budget_maps_onto_solvers() {
        let b = SolverBudget {
            newton_iterations: 5,
            march_steps: 7,
            curve_samples: 9,
        };
        assert_eq!(b.numeric().samples, 9);
        let m = b.march(0.1, 1e-7);
        assert_eq!((m.max_steps, m.iterations), (7, 5));
    }
}
