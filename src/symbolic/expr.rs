//! The expression node and its smart constructors.
//!
//! Expressions are immutable DAGs shared through [Arc]. Every node caches its structural hash
//! so that equality checks and hash-map lookups (common-subexpression elimination, like-term
//! collection) stay cheap even for deep trees.

use itertools::Itertools;
use ndarray::{Array2, ScalarOperand};
use num_traits::{One, Zero};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// Addresses a scalar inside a shaped variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    Whole,
    Entry(usize),
    Cell(usize, usize),
}

/// A named scalar unknown, possibly an element of a vector or matrix variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    name: Arc<str>,
    component: Component,
}

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol {
            name: Arc::from(name),
            component: Component::Whole,
        }
    }

    pub fn entry(name: &str, index: usize) -> Self {
        Symbol {
            name: Arc::from(name),
            component: Component::Entry(index),
        }
    }

    pub fn cell(name: &str, row: usize, col: usize) -> Self {
        Symbol {
            name: Arc::from(name),
            component: Component::Cell(row, col),
        }
    }

    /// Name of the variable this symbol belongs to
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component(&self) -> Component {
        self.component
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.component {
            Component::Whole => write!(f, "{}", self.name),
            Component::Entry(i) => write!(f, "{}[{}]", self.name, i),
            Component::Cell(i, j) => write!(f, "{}[{},{}]", self.name, i, j),
        }
    }
}

/// Elementary functions of one argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sqrt,
    Abs,
    Sign,
    Exp,
    Ln,
}

impl Function {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Tan => x.tan(),
            Function::Asin => x.asin(),
            Function::Acos => x.acos(),
            Function::Atan => x.atan(),
            Function::Sqrt => x.sqrt(),
            Function::Abs => x.abs(),
            Function::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Function::Exp => x.exp(),
            Function::Ln => x.ln(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Asin => "asin",
            Function::Acos => "acos",
            Function::Atan => "atan",
            Function::Sqrt => "sqrt",
            Function::Abs => "abs",
            Function::Sign => "sign",
            Function::Exp => "exp",
            Function::Ln => "ln",
        }
    }
}

/// A float with bitwise equality so that nodes can be hashed
#[derive(Debug, Clone, Copy)]
pub(crate) struct Real(pub f64);

impl Real {
    fn bits(self) -> u64 {
        // -0.0 and 0.0 are the same literal
        if self.0 == 0.0 {
            0
        } else {
            self.0.to_bits()
        }
    }
}

impl PartialEq for Real {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Real {}

impl Hash for Real {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state)
    }
}

/// The linear system `matrix · X = rhs` shared by all [Node::Solve] entries of one solve
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct LinearSystem {
    pub(crate) matrix: Array2<Expr>,
    pub(crate) rhs: Array2<Expr>,
}

impl LinearSystem {
    pub fn matrix(&self) -> &Array2<Expr> {
        &self.matrix
    }

    pub fn rhs(&self) -> &Array2<Expr> {
        &self.rhs
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub(crate) enum Node {
    Number(Real),
    Symbol(Symbol),
    Sum(Vec<Expr>),
    Product(Vec<Expr>),
    Power(Expr, Real),
    Apply(Function, Expr),
    Atan2(Expr, Expr),
    /// Entry `(row, col)` of the solution of a linear system
    Solve(Arc<LinearSystem>, usize, usize),
}

#[derive(Debug)]
struct Inner {
    node: Node,
    hash: u64,
}

/// A symbolic scalar expression
#[derive(Clone)]
pub struct Expr(Arc<Inner>);

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || (self.0.hash == other.0.hash && self.0.node == other.0.node)
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Expr {
    pub(crate) fn from_node(node: Node) -> Self {
        let mut hasher = DefaultHasher::new();
        node.hash(&mut hasher);
        Expr(Arc::new(Inner {
            hash: hasher.finish(),
            node,
        }))
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0.node
    }

    /// Identity of the shared node, used as cache key while walking the DAG
    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn number(value: f64) -> Self {
        Expr::from_node(Node::Number(Real(value)))
    }

    pub fn symbol(name: &str) -> Self {
        Expr::from_node(Node::Symbol(Symbol::new(name)))
    }

    pub fn from_symbol(symbol: Symbol) -> Self {
        Expr::from_node(Node::Symbol(symbol))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.node() {
            Node::Number(value) => Some(value.0),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self.node() {
            Node::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    /// Whether the expression is the literal `value`
    pub fn is_literal(&self, value: f64) -> bool {
        self.as_number() == Some(value)
    }

    /// Smart sum: flattens nested sums, folds literals and drops zeros
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Expr {
        let mut constant = 0.0;
        let mut collected = Vec::new();
        for term in terms {
            match term.node() {
                Node::Number(value) => constant += value.0,
                Node::Sum(inner) => {
                    for t in inner {
                        match t.as_number() {
                            Some(value) => constant += value,
                            None => collected.push(t.clone()),
                        }
                    }
                }
                _ => collected.push(term),
            }
        }
        if constant != 0.0 || !constant.is_finite() {
            collected.push(Expr::number(constant));
        }
        match collected.len() {
            0 => Expr::zero(),
            1 => collected.pop().unwrap_or_else(Expr::zero),
            _ => Expr::from_node(Node::Sum(collected)),
        }
    }

    /// Smart product: flattens nested products, folds literals and eliminates ones and zeros
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Expr {
        let mut coefficient = 1.0;
        let mut collected = Vec::new();
        for factor in factors {
            match factor.node() {
                Node::Number(value) => coefficient *= value.0,
                Node::Product(inner) => {
                    for f in inner {
                        match f.as_number() {
                            Some(value) => coefficient *= value,
                            None => collected.push(f.clone()),
                        }
                    }
                }
                _ => collected.push(factor),
            }
        }
        if coefficient == 0.0 {
            return Expr::zero();
        }
        if coefficient != 1.0 {
            collected.insert(0, Expr::number(coefficient));
        }
        match collected.len() {
            0 => Expr::one(),
            1 => collected.pop().unwrap_or_else(Expr::one),
            _ => Expr::from_node(Node::Product(collected)),
        }
    }

    /// `self^exponent` for a constant exponent
    pub fn powf(&self, exponent: f64) -> Expr {
        if exponent == 0.0 {
            return Expr::one();
        }
        if exponent == 1.0 {
            return self.clone();
        }
        if let Some(value) = self.as_number() {
            let folded = value.powf(exponent);
            if folded.is_finite() {
                return Expr::number(folded);
            }
        }
        if let Node::Power(base, inner) = self.node() {
            if inner.0.fract() == 0.0 && exponent.fract() == 0.0 {
                return base.powf(inner.0 * exponent);
            }
        }
        Expr::from_node(Node::Power(self.clone(), Real(exponent)))
    }

    pub fn powi(&self, exponent: i32) -> Expr {
        self.powf(exponent as f64)
    }

    pub fn recip(&self) -> Expr {
        self.powf(-1.0)
    }

    pub fn apply(&self, function: Function) -> Expr {
        if let Some(value) = self.as_number() {
            let folded = function.apply(value);
            if folded.is_finite() {
                return Expr::number(folded);
            }
        }
        Expr::from_node(Node::Apply(function, self.clone()))
    }

    pub fn sin(&self) -> Expr {
        self.apply(Function::Sin)
    }

    pub fn cos(&self) -> Expr {
        self.apply(Function::Cos)
    }

    pub fn tan(&self) -> Expr {
        self.apply(Function::Tan)
    }

    pub fn asin(&self) -> Expr {
        self.apply(Function::Asin)
    }

    pub fn acos(&self) -> Expr {
        self.apply(Function::Acos)
    }

    pub fn atan(&self) -> Expr {
        self.apply(Function::Atan)
    }

    pub fn sqrt(&self) -> Expr {
        self.apply(Function::Sqrt)
    }

    pub fn abs(&self) -> Expr {
        self.apply(Function::Abs)
    }

    pub fn sign(&self) -> Expr {
        self.apply(Function::Sign)
    }

    pub fn exp(&self) -> Expr {
        self.apply(Function::Exp)
    }

    pub fn ln(&self) -> Expr {
        self.apply(Function::Ln)
    }

    /// Four-quadrant arc tangent of `y / x`
    pub fn atan2(y: &Expr, x: &Expr) -> Expr {
        if let (Some(y), Some(x)) = (y.as_number(), x.as_number()) {
            return Expr::number(y.atan2(x));
        }
        Expr::from_node(Node::Atan2(y.clone(), x.clone()))
    }

    pub(crate) fn solve_entry(system: Arc<LinearSystem>, row: usize, col: usize) -> Expr {
        Expr::from_node(Node::Solve(system, row, col))
    }

    /// Calls `visit` on every direct operand, including the entries of a linear system
    pub(crate) fn for_each_operand(&self, mut visit: impl FnMut(&Expr)) {
        match self.node() {
            Node::Number(_) | Node::Symbol(_) => {}
            Node::Sum(items) | Node::Product(items) => items.iter().for_each(visit),
            Node::Power(base, _) => visit(base),
            Node::Apply(_, argument) => visit(argument),
            Node::Atan2(y, x) => {
                visit(y);
                visit(x);
            }
            Node::Solve(system, _, _) => {
                system.matrix.iter().for_each(&mut visit);
                system.rhs.iter().for_each(visit);
            }
        }
    }

    /// All symbols the expression depends on
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut found = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(expr) = stack.pop() {
            if !visited.insert(expr.address()) {
                continue;
            }
            if let Node::Symbol(symbol) = expr.node() {
                found.insert(symbol.clone());
            }
            expr.for_each_operand(|operand| stack.push(operand.clone()));
        }
        found
    }

    pub fn depends_on(&self, symbol: &Symbol) -> bool {
        self.symbols().contains(symbol)
    }

    /// Number of distinct nodes in the DAG
    pub fn operation_count(&self) -> usize {
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(expr) = stack.pop() {
            if visited.insert(expr.address()) {
                expr.for_each_operand(|operand| stack.push(operand.clone()));
            }
        }
        visited.len()
    }

    /// Splits a term into its literal coefficient and the remaining factor
    pub(crate) fn split_coefficient(&self) -> (f64, Expr) {
        match self.node() {
            Node::Number(value) => (value.0, Expr::one()),
            Node::Product(factors) => match factors.first().and_then(Expr::as_number) {
                Some(coefficient) => (coefficient, Expr::product(factors[1..].iter().cloned())),
                None => (1.0, self.clone()),
            },
            _ => (1.0, self.clone()),
        }
    }

    fn precedence(&self) -> u8 {
        match self.node() {
            Node::Sum(_) => 0,
            Node::Product(_) => 1,
            Node::Number(value) if value.0 < 0.0 => 1,
            Node::Power(..) => 2,
            _ => 3,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min_precedence: u8) -> fmt::Result {
        if self.precedence() < min_precedence {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            Node::Number(value) => write!(f, "{}", value.0),
            Node::Symbol(symbol) => write!(f, "{}", symbol),
            Node::Sum(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    let (coefficient, rest) = term.split_coefficient();
                    if i > 0 && coefficient < 0.0 {
                        write!(f, " - ")?;
                        Expr::product([Expr::number(-coefficient), rest]).fmt_operand(f, 1)?;
                    } else {
                        if i > 0 {
                            write!(f, " + ")?;
                        }
                        term.fmt_operand(f, 1)?;
                    }
                }
                Ok(())
            }
            Node::Product(factors) => {
                let (denominator, numerator): (Vec<_>, Vec<_>) = factors
                    .iter()
                    .partition(|factor| matches!(factor.node(), Node::Power(_, e) if e.0 < 0.0));
                if numerator.is_empty() {
                    write!(f, "1")?;
                }
                let mut first = true;
                for factor in numerator.iter() {
                    if first && factor.is_literal(-1.0) && numerator.len() > 1 {
                        write!(f, "-")?;
                        continue;
                    }
                    if !first {
                        write!(f, "*")?;
                    }
                    factor.fmt_operand(f, 2)?;
                    first = false;
                }
                for factor in denominator {
                    if let Node::Power(base, exponent) = factor.node() {
                        write!(f, "/")?;
                        base.powf(-exponent.0).fmt_operand(f, 3)?;
                    }
                }
                Ok(())
            }
            Node::Power(base, exponent) => {
                if exponent.0 < 0.0 {
                    write!(f, "1/")?;
                    return base.powf(-exponent.0).fmt_operand(f, 3);
                }
                base.fmt_operand(f, 3)?;
                write!(f, "^{}", exponent.0)
            }
            Node::Apply(function, argument) => write!(f, "{}({})", function.name(), argument),
            Node::Atan2(y, x) => write!(f, "atan2({}, {})", y, x),
            Node::Solve(system, row, col) => {
                let (rows, cols) = system.matrix.dim();
                write!(
                    f,
                    "solve<{}x{}; {}>[{},{}]",
                    rows,
                    cols,
                    system.rhs.iter().map(|e| e.to_string()).join(", "),
                    row,
                    col
                )
            }
        }
    }
}

impl Zero for Expr {
    fn zero() -> Self {
        Expr::number(0.0)
    }

    fn is_zero(&self) -> bool {
        self.is_literal(0.0)
    }
}

impl One for Expr {
    fn one() -> Self {
        Expr::number(1.0)
    }
}

impl ScalarOperand for Expr {}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::number(value)
    }
}

impl From<Symbol> for Expr {
    fn from(symbol: Symbol) -> Self {
        Expr::from_symbol(symbol)
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

fn add(a: Expr, b: Expr) -> Expr {
    Expr::sum([a, b])
}

fn sub(a: Expr, b: Expr) -> Expr {
    Expr::sum([a, Expr::product([Expr::number(-1.0), b])])
}

fn mul(a: Expr, b: Expr) -> Expr {
    Expr::product([a, b])
}

fn div(a: Expr, b: Expr) -> Expr {
    match b.as_number() {
        Some(value) if value != 0.0 => Expr::product([a, Expr::number(1.0 / value)]),
        _ => Expr::product([a, b.recip()]),
    }
}

macro_rules! impl_binary {
    ($trait:ident, $method:ident, $op:ident) => {
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $op(self, rhs)
            }
        }

        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $op(self, rhs.clone())
            }
        }

        impl $trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $op(self.clone(), rhs)
            }
        }

        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $op(self.clone(), rhs.clone())
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                $op(self, Expr::number(rhs))
            }
        }

        impl $trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                $op(self.clone(), Expr::number(rhs))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $op(Expr::number(self), rhs)
            }
        }

        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $op(Expr::number(self), rhs.clone())
            }
        }
    };
}

impl_binary!(Add, add, add);
impl_binary!(Sub, sub, sub);
impl_binary!(Mul, mul, mul);
impl_binary!(Div, div, div);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::product([Expr::number(-1.0), self])
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::product([Expr::number(-1.0), self.clone()])
    }
}
