//! Linear optimization of continuous range actions: problem assembly from
//! composable fillers, resolution, and the iterating improvement loop.

pub mod fillers;
pub mod optimizer;
pub mod problem;

pub use fillers::{
    activation_from_solution, build_fillers, build_problem, FillerContext, ProblemFiller,
};
pub use optimizer::{
    optimize, IteratingLinearOptimizerInput, LinearOptimizationResult, LinearOptimizationStatus,
};
pub use problem::{LinearProblem, LinearProblemStatus, LinearSolution};
