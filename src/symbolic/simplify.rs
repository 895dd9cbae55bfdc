//! Like-term collection used by [Expr::simplify].

use super::expr::{Expr, Node};
use std::collections::HashMap;

fn flatten_into(items: Vec<Expr>, sum: bool, out: &mut Vec<Expr>) {
    for item in items {
        let inner = match (item.node(), sum) {
            (Node::Sum(inner), true) | (Node::Product(inner), false) => Some(inner.clone()),
            _ => None,
        };
        match inner {
            Some(inner) => out.extend(inner),
            None => out.push(item),
        }
    }
}

pub(crate) fn collect_sum(terms: Vec<Expr>) -> Expr {
    let mut flat = Vec::with_capacity(terms.len());
    flatten_into(terms, true, &mut flat);

    let mut constant = 0.0;
    let mut order: Vec<Expr> = Vec::new();
    let mut coefficients: HashMap<Expr, f64> = HashMap::new();
    for term in flat {
        let (coefficient, rest) = term.split_coefficient();
        if rest.is_literal(1.0) {
            constant += coefficient;
            continue;
        }
        match coefficients.get_mut(&rest) {
            Some(total) => *total += coefficient,
            None => {
                coefficients.insert(rest.clone(), coefficient);
                order.push(rest);
            }
        }
    }
    let collected = order
        .into_iter()
        .filter_map(|rest| {
            let coefficient = coefficients.get(&rest).copied().unwrap_or(0.0);
            (coefficient != 0.0).then(|| Expr::product([Expr::number(coefficient), rest]))
        })
        .chain(std::iter::once(Expr::number(constant)));
    Expr::sum(collected)
}

pub(crate) fn collect_product(factors: Vec<Expr>) -> Expr {
    let mut flat = Vec::with_capacity(factors.len());
    flatten_into(factors, false, &mut flat);

    let mut coefficient = 1.0;
    let mut order: Vec<Expr> = Vec::new();
    let mut exponents: HashMap<Expr, f64> = HashMap::new();
    for factor in flat {
        let (base, exponent) = match factor.node() {
            Node::Number(value) => {
                coefficient *= value.0;
                continue;
            }
            Node::Power(base, exponent) => (base.clone(), exponent.0),
            _ => (factor.clone(), 1.0),
        };
        match exponents.get_mut(&base) {
            Some(total) => *total += exponent,
            None => {
                exponents.insert(base.clone(), exponent);
                order.push(base);
            }
        }
    }
    let collected = order.into_iter().map(|base| {
        let exponent = exponents.get(&base).copied().unwrap_or(0.0);
        base.powf(exponent)
    });
    Expr::product(std::iter::once(Expr::number(coefficient)).chain(collected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_collects_like_terms() {
        let x = Expr::symbol("x");
        let y = Expr::symbol("y");

        let e = (&x + &y + &x * 2.0 - &y).simplify();
        assert_eq!(e, Expr::number(3.0) * &x);

        let e = (&x * &y * &x / &y).simplify();
        assert_eq!(e, x.powi(2));

        let e = ((&x - &x) * y.sin()).simplify();
        assert!(e.is_literal(0.0));
    }
}
