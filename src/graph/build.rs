//! Validation, ordering and optimization of a [Graph].

use super::{Equation, FinalizedGraph, Graph, Shape, VarKind, Variable};
use crate::symbolic::{Expr, Node, Symbol};
use crate::MarionetteError;
use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, instrument};

impl Graph {
    /// Orders the equations topologically and, if `optimize` is set, extracts common
    /// subexpressions and removes intermediates no output depends on.
    #[instrument(skip(self))]
    pub fn build(self, optimize: bool) -> Result<FinalizedGraph, MarionetteError> {
        let Graph {
            mut variables,
            lookup,
            initial,
            equations,
            ..
        } = self;

        let dependencies = dependencies(&variables, &lookup, &equations)?;
        let mut equations = sort(equations, &dependencies)?;
        let before = equations.len();

        if optimize {
            let taken = variables.iter().map(|v| v.name().to_string()).collect();
            let mut cse = Cse::new(&equations, taken);
            equations = cse.rewrite(equations);
            variables.extend(cse.temporaries);
            equations = eliminate_dead_code(equations);
            let used: HashSet<String> = equations
                .iter()
                .flat_map(|e| {
                    let written = e.lhs.iter().map(|v| v.name().to_string()).collect_vec();
                    let read = e.rhs.iter().flat_map(Expr::symbols).map(|s| s.name().to_string());
                    written.into_iter().chain(read)
                })
                .collect();
            variables.retain(|v| v.kind() != VarKind::Variable || used.contains(v.name()));
        }
        debug!(
            variables = variables.len(),
            equations = equations.len(),
            removed_or_added = equations.len() as isize - before as isize,
            "graph built"
        );
        Ok(FinalizedGraph::new(variables, initial, equations))
    }
}

/// Indices of the equations each equation reads from. Also checks that every symbol is
/// declared and every non-free variable is assigned.
fn dependencies(
    variables: &[Variable],
    lookup: &HashMap<String, usize>,
    equations: &[Equation],
) -> Result<Vec<Vec<usize>>, MarionetteError> {
    let mut writer: HashMap<&str, usize> = HashMap::new();
    for (i, equation) in equations.iter().enumerate() {
        for var in &equation.lhs {
            writer.insert(var.name(), i);
        }
    }
    equations
        .iter()
        .enumerate()
        .map(|(i, equation)| {
            let own: HashSet<&str> = equation.lhs.iter().map(Variable::name).collect();
            let mut reads = Vec::new();
            for symbol in equation.rhs.iter().flat_map(Expr::symbols).unique() {
                let var = lookup
                    .get(symbol.name())
                    .and_then(|&k| variables.get(k))
                    .ok_or_else(|| {
                        MarionetteError::Authoring(format!(
                            "undeclared symbol {} in equation of {}",
                            symbol,
                            equation.name()
                        ))
                    })?;
                if own.contains(var.name()) {
                    if equation.implicit {
                        continue;
                    }
                    return Err(MarionetteError::CyclicDependency(var.name().to_string()));
                }
                match writer.get(var.name()) {
                    Some(&k) => reads.push(k),
                    None if var.kind().is_free() => {}
                    None => {
                        return Err(MarionetteError::Authoring(format!(
                            "variable {} is used by {} but never assigned",
                            var.name(),
                            equation.name()
                        )))
                    }
                }
            }
            debug_assert!(!reads.contains(&i));
            Ok(reads.into_iter().unique().collect())
        })
        .collect()
}

/// Kahn's algorithm. Among ready equations the one added first goes first, so the authored
/// order survives wherever dependencies allow.
fn sort(equations: Vec<Equation>, dependencies: &[Vec<usize>]) -> Result<Vec<Equation>, MarionetteError> {
    let n = equations.len();
    let mut pending = dependencies.iter().map(Vec::len).collect_vec();
    let mut readers = vec![vec![]; n];
    for (i, reads) in dependencies.iter().enumerate() {
        for &k in reads {
            readers[k].push(i);
        }
    }
    let mut ready: BinaryHeap<Reverse<usize>> = (0..n).filter(|&i| pending[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &reader in &readers[i] {
            pending[reader] -= 1;
            if pending[reader] == 0 {
                ready.push(Reverse(reader));
            }
        }
    }
    if order.len() < n {
        let stuck = (0..n).find(|&i| pending[i] > 0).map(|i| equations[i].name()).unwrap_or_default();
        return Err(MarionetteError::CyclicDependency(stuck));
    }
    let mut slots = equations.into_iter().map(Some).collect_vec();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Common-subexpression elimination over all explicit equations
struct Cse {
    counts: HashMap<Expr, usize>,
    names: HashMap<Expr, Expr>,
    temporaries: Vec<Variable>,
    /// Names a temporary must not take
    taken: HashSet<String>,
    next: usize,
}

impl Cse {
    fn new(equations: &[Equation], taken: HashSet<String>) -> Self {
        let mut counts: HashMap<Expr, usize> = HashMap::new();
        let mut visited = HashSet::new();
        for equation in equations.iter().filter(|e| !e.implicit) {
            for root in equation.rhs.iter() {
                *counts.entry(root.clone()).or_default() += 1;
                let mut stack = vec![root.clone()];
                while let Some(expr) = stack.pop() {
                    if !visited.insert(expr.address()) || matches!(expr.node(), Node::Solve(..)) {
                        continue;
                    }
                    expr.for_each_operand(|operand| {
                        *counts.entry(operand.clone()).or_default() += 1;
                        stack.push(operand.clone());
                    });
                }
            }
        }
        Cse {
            counts,
            names: HashMap::new(),
            temporaries: vec![],
            taken,
            next: 0,
        }
    }

    /// `_cse<k>` with the smallest counter not used by any declared variable
    fn fresh_name(&mut self) -> String {
        loop {
            let name = format!("_cse{}", self.next);
            self.next += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    fn is_candidate(&self, expr: &Expr) -> bool {
        !matches!(expr.node(), Node::Number(_) | Node::Symbol(_))
            && self.counts.get(expr).copied().unwrap_or(0) > 1
            && !matches!(expr.node(), Node::Product(f) if f.len() == 2 && f[0].as_number().is_some() && f[1].as_symbol().is_some())
    }

    fn rewrite(&mut self, equations: Vec<Equation>) -> Vec<Equation> {
        let mut result = Vec::with_capacity(equations.len());
        for mut equation in equations {
            if !equation.implicit {
                let mut pending = Vec::new();
                let mut cache = HashMap::new();
                equation.rhs = equation.rhs.map(|e| self.visit(e, true, &mut pending, &mut cache));
                result.extend(pending);
            }
            result.push(equation);
        }
        result
    }

    /// Rebuilds `expr` bottom-up, replacing repeated nodes by temporaries. New temporaries are
    /// pushed to `pending` in dependency order.
    fn visit(&mut self, expr: &Expr, root: bool, pending: &mut Vec<Equation>, cache: &mut HashMap<usize, Expr>) -> Expr {
        if let Some(done) = cache.get(&expr.address()) {
            return done.clone();
        }
        if let Some(name) = self.names.get(expr) {
            return name.clone();
        }
        let rebuilt = match expr.node() {
            Node::Number(_) | Node::Symbol(_) | Node::Solve(..) => expr.clone(),
            Node::Sum(terms) => Expr::sum(terms.iter().map(|t| self.visit(t, false, pending, cache)).collect_vec()),
            Node::Product(factors) => {
                Expr::product(factors.iter().map(|f| self.visit(f, false, pending, cache)).collect_vec())
            }
            Node::Power(base, exponent) => self.visit(base, false, pending, cache).powf(exponent.0),
            Node::Apply(function, argument) => self.visit(argument, false, pending, cache).apply(*function),
            Node::Atan2(y, x) => {
                let y = self.visit(y, false, pending, cache);
                let x = self.visit(x, false, pending, cache);
                Expr::atan2(&y, &x)
            }
        };
        let result = if !root && self.is_candidate(expr) {
            let name = self.fresh_name();
            let var = Variable {
                name: name.clone(),
                shape: Shape::Scalar,
                kind: VarKind::Variable,
            };
            pending.push(Equation {
                lhs: vec![var.clone()],
                rhs: crate::symbolic::matrix::scalar(rebuilt),
                implicit: false,
            });
            self.temporaries.push(var);
            let symbol = Expr::from_symbol(Symbol::new(&name));
            self.names.insert(expr.clone(), symbol.clone());
            symbol
        } else {
            rebuilt
        };
        cache.insert(expr.address(), result.clone());
        result
    }
}

/// Keeps every equation that assigns something other than an intermediate, and everything
/// those depend on.
fn eliminate_dead_code(equations: Vec<Equation>) -> Vec<Equation> {
    let mut needed: HashSet<String> = HashSet::new();
    let mut keep = vec![false; equations.len()];
    for (i, equation) in equations.iter().enumerate().rev() {
        let output = equation.lhs.iter().any(|v| v.kind() != VarKind::Variable);
        if output || equation.lhs.iter().any(|v| needed.contains(v.name())) {
            keep[i] = true;
            needed.extend(
                equation
                    .rhs
                    .iter()
                    .flat_map(Expr::symbols)
                    .map(|s| s.name().to_string()),
            );
        }
    }
    equations
        .into_iter()
        .zip(keep)
        .filter_map(|(equation, keep)| keep.then_some(equation))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::EquationOptions;
    use super::*;
    use crate::symbolic::matrix::scalar;

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    #[test_log::test]
    fn test_topological_order() {
        let mut graph = Graph::new();
        graph.declare_variable("x", Shape::Scalar, VarKind::Input, None).unwrap();
        let c = graph.declare_variable("c", Shape::Scalar, VarKind::Variable, None).unwrap();
        let b = graph.declare_variable("b", Shape::Scalar, VarKind::Variable, None).unwrap();
        graph
            .add_equation("out", scalar(sym("c") + 1.0), EquationOptions::kind(VarKind::Sensor))
            .unwrap();
        graph.add_equation(&c, scalar(sym("b") * 2.0), EquationOptions::default()).unwrap();
        graph.add_equation(&b, scalar(sym("x").sin()), EquationOptions::default()).unwrap();

        let finalized = graph.build(false).unwrap();
        let order = finalized.equations().iter().map(|e| e.name()).collect_vec();
        assert_eq!(order, &["b", "c", "out"]);
        assert_eq!(finalized.query_by_kind(VarKind::Sensor).len(), 1);
    }

    #[test_log::test]
    fn test_cycle_and_unassigned() {
        let mut graph = Graph::new();
        let a = graph.declare_variable("a", Shape::Scalar, VarKind::Variable, None).unwrap();
        let b = graph.declare_variable("b", Shape::Scalar, VarKind::Variable, None).unwrap();
        graph.add_equation(&a, scalar(sym("b") + 1.0), EquationOptions::default()).unwrap();
        graph.add_equation(&b, scalar(sym("a") * 2.0), EquationOptions::default()).unwrap();
        assert!(matches!(graph.build(false), Err(MarionetteError::CyclicDependency(_))));

        let mut graph = Graph::new();
        graph.declare_variable("a", Shape::Scalar, VarKind::Variable, None).unwrap();
        graph.assign("b", scalar(sym("a") + 1.0)).unwrap();
        assert!(matches!(graph.build(false), Err(MarionetteError::Authoring(_))));

        let mut graph = Graph::new();
        graph.assign("b", scalar(sym("nowhere") + 1.0)).unwrap();
        assert!(matches!(graph.build(false), Err(MarionetteError::Authoring(_))));
    }

    #[test_log::test]
    fn test_cse_and_dead_code() {
        let mut graph = Graph::new();
        graph.declare_variable("x", Shape::Scalar, VarKind::State, None).unwrap();
        graph.assign("unused", scalar(sym("x") * 3.0)).unwrap();
        let shared = (sym("x") + 1.0).sin();
        graph
            .add_equation("y1", scalar(&shared * 2.0 + 1.0), EquationOptions::kind(VarKind::Sensor))
            .unwrap();
        graph
            .add_equation("y2", scalar(shared.cos() + &shared), EquationOptions::kind(VarKind::Sensor))
            .unwrap();

        let finalized = graph.build(true).unwrap();
        let names = finalized.equations().iter().map(|e| e.name()).collect_vec();
        assert!(!names.contains(&"unused".to_string()));
        assert_eq!(names.iter().filter(|n| n.starts_with("_cse")).count(), 1);
        assert!(finalized.variable("unused").is_none());

        // optimization never changes values
        let mut env = crate::symbolic::Environment::new();
        env.set("x", 0.3);
        let values = finalized.evaluate(&env).unwrap();
        let s = (1.3f64).sin();
        approx::assert_abs_diff_eq!(values.get("y1").unwrap(), 2.0 * s + 1.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(values.get("y2").unwrap(), s.cos() + s, epsilon = 1e-12);
    }

    #[test_log::test]
    fn test_temporaries_avoid_declared_names() {
        let graph = || {
            let mut graph = Graph::new();
            graph.declare_variable("x", Shape::Scalar, VarKind::State, None).unwrap();
            graph
                .declare_variable("_cse0", Shape::Scalar, VarKind::Parameter, Some(scalar(2.0)))
                .unwrap();
            let shared = (sym("x") + sym("_cse0")).sin();
            graph
                .add_equation("y1", scalar(&shared * 2.0 + 1.0), EquationOptions::kind(VarKind::Sensor))
                .unwrap();
            graph
                .add_equation("y2", scalar(shared.cos() + &shared), EquationOptions::kind(VarKind::Sensor))
                .unwrap();
            graph
        };
        let optimized = graph().build(true).unwrap();
        let names = optimized.equations().iter().map(|e| e.name()).collect_vec();
        assert!(names.contains(&"_cse1".to_string()));
        assert!(!names.contains(&"_cse0".to_string()));
        assert_eq!(optimized.variable("_cse0").unwrap().kind(), VarKind::Parameter);

        let mut env = crate::symbolic::Environment::new();
        env.set("x", 0.3);
        let plain = graph().build(false).unwrap().evaluate(&env).unwrap();
        let values = optimized.evaluate(&env).unwrap();
        for name in ["y1", "y2"] {
            approx::assert_abs_diff_eq!(values.get(name).unwrap(), plain.get(name).unwrap(), epsilon = 1e-12);
        }
        approx::assert_abs_diff_eq!(values.get("y1").unwrap(), 2.0 * (2.3f64).sin() + 1.0, epsilon = 1e-12);
    }
}
