//! Options of one generation run.

use crate::MarionetteError;
use std::collections::BTreeSet;

/// How equations are generated. Gravity belongs to the [System](crate::model::System),
/// not to the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Stop after positions and velocities; `qdd` becomes an input
    pub kinematics_only: bool,
    /// Orders (0, 1, 2) at which constraint residuals are emitted
    pub differentiation_order: BTreeSet<u8>,
    /// Apply the simplifier to mass matrix, bias and loop closures
    pub simplify: bool,
    /// Common-subexpression and dead-code elimination when building the graph
    pub graph_optimize: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            kinematics_only: false,
            differentiation_order: BTreeSet::from([0]),
            simplify: true,
            graph_optimize: true,
        }
    }
}

impl GenerationConfig {
    pub fn with_kinematics_only(mut self, kinematics_only: bool) -> Self {
        self.kinematics_only = kinematics_only;
        self
    }

    pub fn with_differentiation_order(mut self, orders: impl IntoIterator<Item = u8>) -> Self {
        self.differentiation_order = orders.into_iter().collect();
        self
    }

    pub fn with_simplify(mut self, simplify: bool) -> Self {
        self.simplify = simplify;
        self
    }

    pub fn with_graph_optimize(mut self, graph_optimize: bool) -> Self {
        self.graph_optimize = graph_optimize;
        self
    }

    pub fn validate(&self) -> Result<(), MarionetteError> {
        if let Some(order) = self.differentiation_order.iter().find(|&&o| o > 2) {
            return Err(MarionetteError::Authoring(format!(
                "differentiation order {} is not one of 0, 1, 2",
                order
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_config() {
        let config = GenerationConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.differentiation_order.contains(&0));

        let config = config.with_differentiation_order([0, 1, 2]).with_simplify(false);
        assert!(config.validate().is_ok());
        assert!(!config.simplify);

        let config = config.with_differentiation_order([3]);
        assert!(matches!(config.validate(), Err(MarionetteError::Authoring(_))));
    }
}
