//! The variable and equation graph, the intermediate representation every generator writes to.
//!
//! A [Graph] is a registry of shaped, kind-tagged [Variable]s and of [Equation]s assigning them.
//! [Graph::build] orders the equations topologically and optionally removes common
//! subexpressions and dead code, producing a [FinalizedGraph].

mod build;
mod finalized;

pub use finalized::FinalizedGraph;

use crate::symbolic::{matrix, Expr, Symbol, SymMatrix};
use crate::MarionetteError;
use itertools::Itertools;
use ndarray::Array2;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Role of a variable in the equation set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Intermediate result, removed by dead-code elimination unless needed
    Variable,
    Constant,
    Parameter,
    Input,
    State,
    /// Time derivative of a state
    DerState,
    /// Lagrange multiplier
    Multiplier,
    UserExp,
    Sensor,
    Controller,
    Graphics,
    /// Constraint residual
    Residual,
}

impl VarKind {
    /// Kinds whose values come from outside the equation set
    pub fn is_free(self) -> bool {
        matches!(self, VarKind::Constant | VarKind::Parameter | VarKind::Input | VarKind::State)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
}

impl Shape {
    /// Rows and columns; scalars are `1×1` and vectors are columns
    pub fn dim(self) -> (usize, usize) {
        match self {
            Shape::Scalar => (1, 1),
            Shape::Vector(n) => (n, 1),
            Shape::Matrix(r, c) => (r, c),
        }
    }

    pub fn from_dim((rows, cols): (usize, usize)) -> Shape {
        match (rows, cols) {
            (1, 1) => Shape::Scalar,
            (n, 1) => Shape::Vector(n),
            (r, c) => Shape::Matrix(r, c),
        }
    }

    pub fn len(self) -> usize {
        let (r, c) = self.dim();
        r * c
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Vector(n) => write!(f, "({},)", n),
            Shape::Matrix(r, c) => write!(f, "({}, {})", r, c),
        }
    }
}

/// Handle of a declared variable. Immutable once declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    name: String,
    shape: Shape,
    kind: VarKind,
}

impl Variable {
    pub(crate) fn new(name: &str, shape: Shape, kind: VarKind) -> Self {
        Variable {
            name: name.to_string(),
            shape,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn kind(&self) -> VarKind {
        self.kind
    }

    /// Element symbols in row-major order
    pub fn symbols(&self) -> Vec<Symbol> {
        match self.shape {
            Shape::Scalar => vec![Symbol::new(&self.name)],
            Shape::Vector(n) => (0..n).map(|i| Symbol::entry(&self.name, i)).collect(),
            Shape::Matrix(r, c) => (0..r)
                .cartesian_product(0..c)
                .map(|(i, j)| Symbol::cell(&self.name, i, j))
                .collect(),
        }
    }

    /// The variable as a shaped value of its element symbols
    pub fn expr(&self) -> SymMatrix {
        let entries = self.symbols().into_iter().map(Expr::from_symbol).collect_vec();
        Array2::from_shape_vec(self.shape.dim(), entries).unwrap_or_else(|_| matrix::zeros(0, 0))
    }

    /// Element `i` (row-major) as an expression
    pub fn at(&self, i: usize) -> Expr {
        self.symbols()
            .into_iter()
            .nth(i)
            .map(Expr::from_symbol)
            .unwrap_or_else(|| Expr::from_symbol(Symbol::entry(&self.name, i)))
    }
}

/// An assignment `lhs := rhs`, or `rhs(lhs) = 0` when implicit
#[derive(Debug, Clone)]
pub struct Equation {
    lhs: Vec<Variable>,
    rhs: SymMatrix,
    implicit: bool,
}

impl Equation {
    pub fn lhs(&self) -> &[Variable] {
        &self.lhs
    }

    pub fn rhs(&self) -> &SymMatrix {
        &self.rhs
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    /// Kind of the (first) assigned variable
    pub fn kind(&self) -> VarKind {
        self.lhs.first().map(Variable::kind).unwrap_or(VarKind::Variable)
    }

    pub fn name(&self) -> String {
        self.lhs.iter().map(Variable::name).join(", ")
    }

    fn assigned_symbols(&self) -> Vec<Symbol> {
        self.lhs.iter().flat_map(Variable::symbols).collect()
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lhs = self.name();
        let rhs = self.rhs.iter().join(", ");
        if self.implicit {
            write!(f, "[{}]: 0 = [{}]", lhs, rhs)
        } else {
            write!(f, "{} := [{}]", lhs, rhs)
        }
    }
}

/// Left side of [Graph::add_equation]
pub enum Lhs {
    /// A new variable, declared on the fly
    Name(String),
    Var(Variable),
}

impl From<&str> for Lhs {
    fn from(name: &str) -> Self {
        Lhs::Name(name.to_string())
    }
}

impl From<String> for Lhs {
    fn from(name: String) -> Self {
        Lhs::Name(name)
    }
}

impl From<Variable> for Lhs {
    fn from(var: Variable) -> Self {
        Lhs::Var(var)
    }
}

impl From<&Variable> for Lhs {
    fn from(var: &Variable) -> Self {
        Lhs::Var(var.clone())
    }
}

/// Optional arguments of [Graph::add_equation]
#[derive(Debug, Clone, Copy, Default)]
pub struct EquationOptions {
    pub kind: Option<VarKind>,
    pub shape: Option<Shape>,
    pub implicit: bool,
}

impl EquationOptions {
    pub fn kind(kind: VarKind) -> Self {
        EquationOptions {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }
}

/// Mutable equation graph. See the [module documentation](self).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    variables: Vec<Variable>,
    lookup: HashMap<String, usize>,
    initial: HashMap<String, SymMatrix>,
    equations: Vec<Equation>,
    assigned: HashSet<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_variable(
        &mut self,
        name: &str,
        shape: Shape,
        kind: VarKind,
        initial: Option<SymMatrix>,
    ) -> Result<Variable, MarionetteError> {
        if name.is_empty() {
            return Err(MarionetteError::Authoring("variable name must not be empty".to_string()));
        }
        if self.lookup.contains_key(name) {
            return Err(MarionetteError::NameCollision(name.to_string()));
        }
        if let Some(initial) = &initial {
            if initial.dim() != shape.dim() {
                return Err(MarionetteError::shape(name, shape, Shape::from_dim(initial.dim())));
            }
        }
        let var = Variable::new(name, shape, kind);
        self.lookup.insert(name.to_string(), self.variables.len());
        self.variables.push(var.clone());
        if let Some(initial) = initial {
            self.initial.insert(name.to_string(), initial);
        }
        Ok(var)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(*self.lookup.get(name)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn is_assigned(&self, name: &str) -> bool {
        self.assigned.contains(name)
    }

    /// Assigns `rhs` to `lhs`. A name declares the variable with the shape of `options` (the
    /// shape of `rhs` when unset) and the kind of `options` (default [VarKind::Variable]).
    pub fn add_equation(
        &mut self,
        lhs: impl Into<Lhs>,
        rhs: SymMatrix,
        options: EquationOptions,
    ) -> Result<Variable, MarionetteError> {
        let found = Shape::from_dim(rhs.dim());
        if let Some(expected) = options.shape {
            if expected.dim() != rhs.dim() {
                return Err(MarionetteError::shape("equation", expected, found));
            }
        }
        let var = match lhs.into() {
            Lhs::Name(name) => match self.variable(&name) {
                Some(existing) if !self.assigned.contains(&name) => existing.clone(),
                Some(_) => return Err(MarionetteError::NameCollision(name)),
                None => self.declare_variable(
                    &name,
                    options.shape.unwrap_or(found),
                    options.kind.unwrap_or(VarKind::Variable),
                    None,
                )?,
            },
            Lhs::Var(var) => {
                if self.variable(var.name()) != Some(&var) {
                    return Err(MarionetteError::Authoring(format!("undeclared variable {}", var.name())));
                }
                var
            }
        };
        if var.shape().dim() != rhs.dim() {
            return Err(MarionetteError::shape(var.name(), var.shape(), found));
        }
        self.push_equation(vec![var.clone()], rhs, options.implicit)?;
        Ok(var)
    }

    /// Assigns one column `rhs` to several stacked variables
    pub fn add_stacked_equation(
        &mut self,
        lhs: &[Variable],
        rhs: SymMatrix,
        implicit: bool,
    ) -> Result<(), MarionetteError> {
        let expected: usize = lhs.iter().map(|v| v.shape().len()).sum();
        if rhs.ncols() != 1 || rhs.nrows() != expected {
            return Err(MarionetteError::shape(
                lhs.iter().map(Variable::name).join(", "),
                Shape::Vector(expected),
                Shape::from_dim(rhs.dim()),
            ));
        }
        for var in lhs {
            if self.variable(var.name()) != Some(var) {
                return Err(MarionetteError::Authoring(format!("undeclared variable {}", var.name())));
            }
        }
        self.push_equation(lhs.to_vec(), rhs, implicit)
    }

    fn push_equation(&mut self, lhs: Vec<Variable>, rhs: SymMatrix, implicit: bool) -> Result<(), MarionetteError> {
        if let Some(var) = lhs.iter().find(|v| self.assigned.contains(v.name())) {
            return Err(MarionetteError::NameCollision(var.name().to_string()));
        }
        self.assigned.extend(lhs.iter().map(|v| v.name().to_string()));
        self.equations.push(Equation { lhs, rhs, implicit });
        Ok(())
    }

    /// Shorthand for an intermediate `name := rhs`
    pub fn assign(&mut self, name: &str, rhs: SymMatrix) -> Result<Variable, MarionetteError> {
        self.add_equation(name, rhs, EquationOptions::default())
    }

    /// Assigns `value` to a new intermediate and returns it in terms of the intermediate's
    /// element symbols. Literal entries stay literal so that constant folding keeps working.
    pub fn bind(&mut self, name: &str, value: SymMatrix) -> Result<SymMatrix, MarionetteError> {
        if value.iter().all(|e| e.as_number().is_some() || e.as_symbol().is_some()) {
            return Ok(value);
        }
        let var = self.assign(name, value.clone())?;
        let symbols = var.expr();
        Ok(Array2::from_shape_fn(value.dim(), |(i, j)| {
            if value[[i, j]].as_number().is_some() {
                value[[i, j]].clone()
            } else {
                symbols[[i, j]].clone()
            }
        }))
    }

    /// Scalar version of [Graph::bind]
    pub fn bind_scalar(&mut self, name: &str, value: Expr) -> Result<Expr, MarionetteError> {
        let bound = self.bind(name, matrix::scalar(value))?;
        Ok(bound[[0, 0]].clone())
    }

    pub fn initial_value(&self, name: &str) -> Option<&SymMatrix> {
        self.initial.get(name)
    }
}
