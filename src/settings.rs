//! Physics world settings
//!
//! Passed to the native core as an opaque payload; nothing here interprets
//! the values beyond basic range checks. Persisted as JSON.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Constraint solver algorithm
///
/// Gauss-Seidel applies each constraint immediately: faster convergence, but
/// order dependent. Jacobi solves all constraints then applies them together:
/// slower, but stacks behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SolverType {
    GaussSeidel,
    #[default]
    Jacobi,
}

impl SolverType {
    /// Name the native core expects
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverType::GaussSeidel => "gauss_seidel",
            SolverType::Jacobi => "jacobi",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gauss_seidel" | "gauss-seidel" => Some(SolverType::GaussSeidel),
            "jacobi" => Some(SolverType::Jacobi),
            _ => None,
        }
    }

    /// Like [`SolverType::from_name`] but reports unknown names
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| BridgeError::InvalidArgument(format!("unknown solver type {s:?}")))
    }
}

/// Solver tuning for one physics world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Sub-steps per tick; more is higher quality
    pub sub_steps: u32,
    /// Constraint solver iterations per sub-step
    /// (Gauss-Seidel: around 1-2, Jacobi: around 2-5)
    pub iterations: u32,
    /// Convergence weight; higher converges faster but may diverge
    pub solver_iteration_weight: f64,
    /// Spring compliance of collisions, 0 is infinitely stiff
    pub collision_compliance: f64,
    /// Compliance of the restitution constraint
    pub collision_restitution_compliance: f64,
    pub dynamic_friction_compliance: f64,
    /// Distance at which a non-overlapping contact is kept as speculative
    pub speculative_contact_distance: f64,
    pub solver_type: SolverType,

    // === Collision limits ===
    /// Max collision points per pair per sub-step
    pub max_collision_points: u32,
    /// Deeper collision points are ignored
    pub max_collision_point_depth: f64,
    /// Cap on how fast a contact may push bodies apart
    pub max_de_penetration_speed: f64,
    pub max_voxel_shape_collision_points: u32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            sub_steps: 20,
            iterations: 2,
            solver_iteration_weight: 1.0,
            collision_compliance: 0.0,
            collision_restitution_compliance: 0.0,
            dynamic_friction_compliance: 0.0,
            speculative_contact_distance: 0.05,
            solver_type: SolverType::Jacobi,

            max_collision_points: 4,
            max_collision_point_depth: 1.0,
            max_de_penetration_speed: 1e4,
            max_voxel_shape_collision_points: 64,
        }
    }
}

impl WorldSettings {
    /// Reject values no solver can run with
    pub fn validate(&self) -> Result<()> {
        if self.sub_steps == 0 {
            return Err(BridgeError::InvalidArgument("sub_steps must be at least 1".into()));
        }
        if self.iterations == 0 {
            return Err(BridgeError::InvalidArgument("iterations must be at least 1".into()));
        }
        for (name, count) in [
            ("sub_steps", self.sub_steps),
            ("iterations", self.iterations),
            ("max_collision_points", self.max_collision_points),
            ("max_voxel_shape_collision_points", self.max_voxel_shape_collision_points),
        ] {
            if i32::try_from(count).is_err() {
                return Err(BridgeError::InvalidArgument(format!("{name} {count} is too large")));
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BridgeError::InvalidArgument(format!("invalid world settings: {e}")))
    }

    pub fn to_json(&self) -> String {
        // Plain struct of numbers and a unit enum; serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&json)?;
        log::info!("Loaded world settings from {}", path.display());
        Ok(settings)
    }

    /// Load from `path`, falling back to defaults if it is missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::info!("Using default world settings ({}: {e})", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_json())?;
        log::info!("World settings saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_names() {
        assert_eq!(SolverType::GaussSeidel.as_str(), "gauss_seidel");
        assert_eq!(SolverType::from_name("JACOBI"), Some(SolverType::Jacobi));
        assert_eq!(SolverType::from_name("conjugate_gradient"), None);
        assert!(matches!(
            SolverType::parse("pgs"),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let settings = WorldSettings {
            sub_steps: 40,
            solver_type: SolverType::GaussSeidel,
            ..Default::default()
        };
        let json = settings.to_json();
        assert!(json.contains("\"gauss_seidel\""));
        assert_eq!(WorldSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = WorldSettings::from_json(r#"{ "iterations": 5 }"#).unwrap();
        assert_eq!(settings.iterations, 5);
        assert_eq!(settings.sub_steps, 20);
        assert_eq!(settings.solver_type, SolverType::Jacobi);
    }

    #[test]
    fn test_unknown_solver_in_json_rejected() {
        let err = WorldSettings::from_json(r#"{ "solver_type": "simplex" }"#).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate() {
        assert!(WorldSettings::default().validate().is_ok());

        let zero_steps = WorldSettings {
            sub_steps: 0,
            ..Default::default()
        };
        assert!(zero_steps.validate().is_err());

        let huge = WorldSettings {
            max_collision_points: u32::MAX,
            ..Default::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "voxel_physics_bridge_settings_{}.json",
            std::process::id()
        ));
        let settings = WorldSettings {
            speculative_contact_distance: 0.125,
            ..Default::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(WorldSettings::load(&path).unwrap(), settings);
        let _ = fs::remove_file(&path);

        assert_eq!(WorldSettings::load_or_default(&path), WorldSettings::default());
    }
}
