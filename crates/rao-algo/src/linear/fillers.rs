//! Constraint/objective fillers composed into one linear problem.
//!
//! A closed set of tagged variants, ordered once per optimization run from
//! configuration. Each filler only adds variables, constraints or objective
//! terms; none removes or rewrites another filler's contribution, so the
//! composition is order-insensitive (the minimum-margin variable is created
//! lazily by whichever filler touches it first).

use super::problem::{LinearProblem, LinearSolution};
use crate::params::{
    LoopFlowParameters, MnecParameters, ObjectiveFunctionType, PstModel, RangeActionParameters,
    RaoParameters,
};
use crate::results::RangeActionActivation;
use crate::sensitivity::SensitivityOutput;
use good_lp::{constraint, Expression};
use rao_core::{flow_unit_multiplier, FlowCnec, RaUsageLimits, RangeAction, Side, Unit};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Everything a filler may read while contributing to the model.
pub struct FillerContext<'a> {
    pub cnecs: &'a [FlowCnec],
    pub range_actions: &'a [RangeAction],
    /// Latest sensitivity output: the linearization point.
    pub output: &'a SensitivityOutput,
    /// Setpoints at the linearization point.
    pub current: &'a RangeActionActivation,
    /// Setpoints inherited from previous perimeters, anchoring variation
    /// penalties and usage-limit activation.
    pub pre_perimeter: &'a RangeActionActivation,
}

/// One contribution to the linear problem.
#[derive(Debug, Clone)]
pub enum ProblemFiller {
    /// Setpoint and variation variables plus the linearized flow definition.
    Core { parameters: RangeActionParameters },
    /// Worst-margin objective over optimized elements.
    MaxMinMargin { unit: Unit, skip_operators: BTreeSet<String> },
    /// Worst-margin objective scaled by zonal PTDF sums.
    MaxMinRelativeMargin {
        unit: Unit,
        ptdf_sum_lower_bound: f64,
        skip_operators: BTreeSet<String>,
    },
    /// Soft bounds on monitored elements, anchored to initial margins.
    Mnec {
        parameters: MnecParameters,
        initial_flows_mw: BTreeMap<(String, Side), f64>,
    },
    /// Soft loop-flow bounds, anchored to initial loop flows.
    LoopFlow {
        parameters: LoopFlowParameters,
        initial_loop_flows_mw: BTreeMap<(String, Side), f64>,
    },
    /// Elements of operators without curative actions enter the objective
    /// at their pre-perimeter margin instead of their optimized flow.
    UnoptimizedCnec { frozen_margins: BTreeMap<String, f64> },
    /// Aligned range actions share one setpoint.
    ContinuousRangeActionGroup,
    /// Tap variables (relaxed to continuous, rounded on extraction) linked
    /// to the setpoint through a local tap-to-angle linearization.
    DiscretePstTap,
    /// Grouped PSTs share one tap.
    DiscretePstGroup,
    /// Activation caps per instant and per operator.
    RaUsageLimits { limits: RaUsageLimits },
}

impl ProblemFiller {
    pub fn fill(&self, problem: &mut LinearProblem, ctx: &FillerContext) {
        match self {
            ProblemFiller::Core { parameters } => fill_core(problem, ctx, parameters),
            ProblemFiller::MaxMinMargin { unit, skip_operators } => {
                fill_max_min_margin(problem, ctx, *unit, None, skip_operators)
            }
            ProblemFiller::MaxMinRelativeMargin { unit, ptdf_sum_lower_bound, skip_operators } => {
                fill_max_min_margin(problem, ctx, *unit, Some(*ptdf_sum_lower_bound), skip_operators)
            }
            ProblemFiller::Mnec { parameters, initial_flows_mw } => {
                fill_mnec(problem, ctx, parameters, initial_flows_mw)
            }
            ProblemFiller::LoopFlow { parameters, initial_loop_flows_mw } => {
                fill_loop_flow(problem, ctx, parameters, initial_loop_flows_mw)
            }
            ProblemFiller::UnoptimizedCnec { frozen_margins } => {
                fill_unoptimized_cnec(problem, frozen_margins)
            }
            ProblemFiller::ContinuousRangeActionGroup => fill_setpoint_groups(problem, ctx),
            ProblemFiller::DiscretePstTap => fill_discrete_taps(problem, ctx),
            ProblemFiller::DiscretePstGroup => fill_tap_groups(problem, ctx),
            ProblemFiller::RaUsageLimits { limits } => fill_usage_limits(problem, ctx, limits),
        }
    }
}

fn fill_core(problem: &mut LinearProblem, ctx: &FillerContext, parameters: &RangeActionParameters) {
    for ra in ctx.range_actions {
        let sp = problem.add_setpoint_variable(&ra.id, ra.min_setpoint, ra.max_setpoint);
        let (up, down) = problem.add_variation_variables(&ra.id);
        let reference = ctx
            .pre_perimeter
            .setpoint(&ra.id)
            .unwrap_or((ra.min_setpoint + ra.max_setpoint) / 2.0);
        problem.add_constraint(constraint!(sp - up + down == reference));
        let penalty = if ra.is_pst() { parameters.pst_penalty_cost } else { parameters.hvdc_penalty_cost };
        problem.add_objective_term(penalty * up + penalty * down);
    }

    // Linearized flow definition around the latest sensitivity point:
    // F = ref_flow + Σ sens · (SP − current_setpoint)
    for cnec in ctx.cnecs {
        for side in cnec.monitored_sides() {
            let Some(ref_flow) = ctx.output.flows.flow_mw(&cnec.id, side) else { continue };
            let flow = problem.add_flow_variable(&cnec.id, side);
            let mut lhs = Expression::from(flow);
            let mut rhs = ref_flow;
            for ra in ctx.range_actions {
                let sens = ctx.output.sensitivity(&cnec.id, side, &ra.id);
                if sens == 0.0 {
                    continue;
                }
                let Some(sp) = problem.setpoint_variable(&ra.id) else { continue };
                lhs -= sens * sp;
                rhs -= sens * ctx.current.setpoint(&ra.id).unwrap_or(0.0);
            }
            problem.add_constraint(constraint!(lhs == rhs));
        }
    }
}

fn fill_max_min_margin(
    problem: &mut LinearProblem,
    ctx: &FillerContext,
    unit: Unit,
    ptdf_sum_lower_bound: Option<f64>,
    skip_operators: &BTreeSet<String>,
) {
    let mm = problem.min_margin_variable();
    for cnec in ctx.cnecs {
        if !cnec.optimized {
            continue;
        }
        if cnec.operator.as_ref().is_some_and(|op| skip_operators.contains(op)) {
            continue;
        }
        let multiplier = flow_unit_multiplier(Unit::Megawatt, unit, cnec.nominal_voltage_kv);
        for side in cnec.monitored_sides() {
            let Some(flow) = problem.flow_variable(&cnec.id, side) else { continue };
            let mut scale = multiplier;
            if let Some(floor) = ptdf_sum_lower_bound {
                if let Some(ptdf_sum) = ctx.output.flows.ptdf_zonal_sum(&cnec.id, side) {
                    scale /= ptdf_sum.max(floor);
                }
            }
            if let Some(ub) = cnec.upper_bound_mw(side) {
                problem.add_constraint(constraint!(mm + scale * flow <= scale * ub));
            }
            if let Some(lb) = cnec.lower_bound_mw(side) {
                problem.add_constraint(constraint!(mm - scale * flow <= -scale * lb));
            }
        }
    }
}

fn fill_mnec(
    problem: &mut LinearProblem,
    ctx: &FillerContext,
    parameters: &MnecParameters,
    initial_flows_mw: &BTreeMap<(String, Side), f64>,
) {
    for cnec in ctx.cnecs {
        if !cnec.monitored {
            continue;
        }
        let mut violation = None;
        for side in cnec.monitored_sides() {
            let Some(flow) = problem.flow_variable(&cnec.id, side) else { continue };
            let Some(initial) = initial_flows_mw.get(&(cnec.id.clone(), side)).copied() else {
                continue;
            };
            let mv =
                *violation.get_or_insert_with(|| problem.add_mnec_violation_variable(&cnec.id));
            // The flow may exceed its bound only as far as it initially did,
            // plus the acceptable margin decrease.
            if let Some(ub) = cnec.upper_bound_mw(side) {
                let relaxed = ub.max(initial + parameters.acceptable_margin_decrease)
                    - parameters.constraint_adjustment_coefficient;
                problem.add_constraint(constraint!(flow - mv <= relaxed));
            }
            if let Some(lb) = cnec.lower_bound_mw(side) {
                let relaxed = lb.min(initial - parameters.acceptable_margin_decrease)
                    + parameters.constraint_adjustment_coefficient;
                problem.add_constraint(constraint!(flow + mv >= relaxed));
            }
        }
        if let Some(mv) = violation {
            problem.add_objective_term(parameters.violation_cost * mv);
        }
    }
}

fn fill_loop_flow(
    problem: &mut LinearProblem,
    ctx: &FillerContext,
    parameters: &LoopFlowParameters,
    initial_loop_flows_mw: &BTreeMap<(String, Side), f64>,
) {
    for cnec in ctx.cnecs {
        let Some(threshold) = cnec.loop_flow_threshold_mw else { continue };
        let mut violation = None;
        for side in cnec.monitored_sides() {
            let Some(flow) = problem.flow_variable(&cnec.id, side) else { continue };
            let Some(commercial) = ctx.output.flows.commercial_flow_mw(&cnec.id, side) else {
                continue;
            };
            let initial = initial_loop_flows_mw
                .get(&(cnec.id.clone(), side))
                .copied()
                .unwrap_or(0.0);
            let limit = threshold.max(initial.abs() + parameters.acceptable_increase)
                - parameters.constraint_adjustment_coefficient;
            let mv = *violation
                .get_or_insert_with(|| problem.add_loop_flow_violation_variable(&cnec.id));
            // |F − commercial| ≤ limit + violation
            problem.add_constraint(constraint!(flow - mv <= commercial + limit));
            problem.add_constraint(constraint!(flow + mv >= commercial - limit));
        }
        if let Some(mv) = violation {
            problem.add_objective_term(parameters.violation_cost * mv);
        }
    }
}

fn fill_unoptimized_cnec(problem: &mut LinearProblem, frozen_margins: &BTreeMap<String, f64>) {
    let mm = problem.min_margin_variable();
    for margin in frozen_margins.values().copied() {
        problem.add_constraint(constraint!(mm <= margin));
    }
}

fn setpoint_groups(range_actions: &[RangeAction]) -> BTreeMap<&String, Vec<&RangeAction>> {
    let mut groups: BTreeMap<&String, Vec<&RangeAction>> = BTreeMap::new();
    for ra in range_actions {
        if let Some(group) = &ra.group_id {
            groups.entry(group).or_default().push(ra);
        }
    }
    groups
}

fn fill_setpoint_groups(problem: &mut LinearProblem, ctx: &FillerContext) {
    for members in setpoint_groups(ctx.range_actions).values() {
        for pair in members.windows(2) {
            let (Some(a), Some(b)) =
                (problem.setpoint_variable(&pair[0].id), problem.setpoint_variable(&pair[1].id))
            else {
                continue;
            };
            problem.add_constraint(constraint!(a - b == 0.0));
        }
    }
}

fn fill_discrete_taps(problem: &mut LinearProblem, ctx: &FillerContext) {
    for ra in ctx.range_actions.iter().filter(|ra| ra.is_pst()) {
        let Some(sp) = problem.setpoint_variable(&ra.id) else { continue };
        let Some((min_tap, max_tap)) = ra.tap_range() else { continue };
        let current_setpoint = ctx
            .current
            .setpoint(&ra.id)
            .unwrap_or((ra.min_setpoint + ra.max_setpoint) / 2.0);
        let Some(current_tap) = ctx.current.tap(&ra.id).or_else(|| ra.nearest_tap(current_setpoint))
        else {
            continue;
        };
        let (Some(angle), Some(slope)) =
            (ra.angle_for_tap(current_tap), ra.angle_per_tap_around(current_tap))
        else {
            continue;
        };
        if slope == 0.0 {
            debug!(range_action = %ra.id, "flat tap-to-angle table, keeping continuous model");
            continue;
        }
        let tap = problem.add_tap_variable(&ra.id, f64::from(min_tap), f64::from(max_tap));
        // SP = angle(t0) + slope · (T − t0), linearized around the current tap
        let offset = angle - slope * f64::from(current_tap);
        problem.add_constraint(constraint!(sp - slope * tap == offset));
    }
}

fn fill_tap_groups(problem: &mut LinearProblem, ctx: &FillerContext) {
    for members in setpoint_groups(ctx.range_actions).values() {
        for pair in members.windows(2) {
            let (Some(a), Some(b)) =
                (problem.tap_variable(&pair[0].id), problem.tap_variable(&pair[1].id))
            else {
                continue;
            };
            problem.add_constraint(constraint!(a - b == 0.0));
        }
    }
}

fn fill_usage_limits(problem: &mut LinearProblem, ctx: &FillerContext, limits: &RaUsageLimits) {
    let mut all = Vec::new();
    let mut per_operator: BTreeMap<&String, Vec<good_lp::Variable>> = BTreeMap::new();
    for ra in ctx.range_actions {
        let Some((up, down)) = problem.variation_variables(&ra.id) else { continue };
        let max_variation = ra.max_setpoint - ra.min_setpoint;
        if max_variation <= 0.0 {
            continue;
        }
        let activation = problem.add_activation_variable(&ra.id);
        problem.add_constraint(constraint!(up + down - max_variation * activation <= 0.0));
        all.push(activation);
        if let Some(operator) = &ra.operator {
            per_operator.entry(operator).or_default().push(activation);
        }
    }
    if let Some(max_ra) = limits.max_ra {
        let total = all.iter().fold(Expression::from(0.0), |acc, v| acc + *v);
        problem.add_constraint(constraint!(total <= max_ra as f64));
    }
    for (operator, cap) in &limits.max_ra_per_operator {
        let Some(vars) = per_operator.get(operator) else { continue };
        let total = vars.iter().fold(Expression::from(0.0), |acc, v| acc + *v);
        let cap = *cap as f64;
        problem.add_constraint(constraint!(total <= cap));
    }
}

/// Compose the filler list for one optimization run.
#[allow(clippy::too_many_arguments)]
pub fn build_fillers(
    parameters: &RaoParameters,
    cnecs: &[FlowCnec],
    range_actions: &[RangeAction],
    initial: &SensitivityOutput,
    pre_perimeter: &SensitivityOutput,
    operators_not_sharing_cras: &BTreeSet<String>,
    usage_limits: &RaUsageLimits,
) -> Vec<ProblemFiller> {
    let mut fillers = vec![ProblemFiller::Core { parameters: parameters.range_actions.clone() }];

    let skip_operators = operators_not_sharing_cras.clone();
    fillers.push(match parameters.objective.function_type {
        ObjectiveFunctionType::MaxMinMargin => {
            ProblemFiller::MaxMinMargin { unit: parameters.objective.unit, skip_operators }
        }
        ObjectiveFunctionType::MaxMinRelativeMargin => ProblemFiller::MaxMinRelativeMargin {
            unit: parameters.objective.unit,
            ptdf_sum_lower_bound: parameters.objective.ptdf_sum_lower_bound,
            skip_operators,
        },
    });

    if let Some(mnec) = &parameters.mnec {
        let mut initial_flows_mw = BTreeMap::new();
        for cnec in cnecs.iter().filter(|c| c.monitored) {
            for side in cnec.monitored_sides() {
                if let Some(flow) = initial.flows.flow_mw(&cnec.id, side) {
                    initial_flows_mw.insert((cnec.id.clone(), side), flow);
                }
            }
        }
        if !initial_flows_mw.is_empty() {
            fillers.push(ProblemFiller::Mnec { parameters: mnec.clone(), initial_flows_mw });
        }
    }

    if let Some(loop_flow) = &parameters.loop_flow {
        let mut initial_loop_flows_mw = BTreeMap::new();
        for cnec in cnecs.iter().filter(|c| c.is_loop_flow_monitored()) {
            for side in cnec.monitored_sides() {
                if let Some(lf) = initial.flows.loop_flow_mw(&cnec.id, side) {
                    initial_loop_flows_mw.insert((cnec.id.clone(), side), lf);
                }
            }
        }
        if !initial_loop_flows_mw.is_empty() {
            fillers.push(ProblemFiller::LoopFlow {
                parameters: loop_flow.clone(),
                initial_loop_flows_mw,
            });
        }
    }

    if !operators_not_sharing_cras.is_empty() {
        let mut frozen_margins = BTreeMap::new();
        for cnec in cnecs.iter().filter(|c| c.optimized) {
            let from_unowned = cnec
                .operator
                .as_ref()
                .is_some_and(|op| operators_not_sharing_cras.contains(op));
            if !from_unowned {
                continue;
            }
            if let Some(margin) = pre_perimeter.flows.margin(cnec, parameters.objective.unit) {
                frozen_margins.insert(cnec.id.clone(), margin);
            }
        }
        if !frozen_margins.is_empty() {
            fillers.push(ProblemFiller::UnoptimizedCnec { frozen_margins });
        }
    }

    if range_actions.iter().any(|ra| ra.group_id.is_some()) {
        fillers.push(ProblemFiller::ContinuousRangeActionGroup);
    }

    if parameters.range_actions.pst_model == PstModel::ApproximatedIntegers {
        fillers.push(ProblemFiller::DiscretePstTap);
        if range_actions.iter().any(|ra| ra.is_pst() && ra.group_id.is_some()) {
            fillers.push(ProblemFiller::DiscretePstGroup);
        }
    }

    if usage_limits.max_ra.is_some() || !usage_limits.max_ra_per_operator.is_empty() {
        fillers.push(ProblemFiller::RaUsageLimits { limits: usage_limits.clone() });
    }

    fillers
}

/// Assemble one linear problem from the filler list.
pub fn build_problem(fillers: &[ProblemFiller], ctx: &FillerContext) -> LinearProblem {
    let mut problem = LinearProblem::new();
    for filler in fillers {
        filler.fill(&mut problem, ctx);
    }
    problem
}

/// Translate an optimal solution into a range-action activation, rounding
/// relaxed tap variables to the nearest integer tap.
pub fn activation_from_solution(
    solution: &LinearSolution,
    range_actions: &[RangeAction],
) -> RangeActionActivation {
    let mut activation = RangeActionActivation::default();
    for ra in range_actions {
        if let Some(tap_value) = solution.taps.get(&ra.id) {
            if let Some((min_tap, max_tap)) = ra.tap_range() {
                let tap = (tap_value.round() as i32).clamp(min_tap, max_tap);
                if let Some(angle) = ra.angle_for_tap(tap) {
                    activation.set_tap(&ra.id, tap);
                    activation
                        .set_setpoint(&ra.id, angle.clamp(ra.min_setpoint, ra.max_setpoint));
                    continue;
                }
            }
        }
        let Some(setpoint) = solution.setpoints.get(&ra.id) else { continue };
        let setpoint = setpoint.clamp(ra.min_setpoint, ra.max_setpoint);
        activation.set_setpoint(&ra.id, setpoint);
        if let Some(tap) = ra.nearest_tap(setpoint) {
            activation.set_tap(&ra.id, tap);
        }
    }
    activation
}
