use std::fmt;

use crate::params::ParameterTable;
use crate::species::{LocatedSpecies, StoichiometrySpecies};
use crate::SimError;

/// Source of species counts for evaluating an equation relative to one membrane.
pub trait SpeciesCounts {
    fn count(&self, located: &LocatedSpecies) -> u64;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Rounds half up.
    Round,
    NaturalLog,
}

/// Rate expression tree.
///
/// After [`Equation::simplify`] only numbers, species leaves and operators on
/// them remain.
#[derive(Clone, Debug, PartialEq)]
pub enum Equation {
    Number(f64),
    Parameter(String),
    Species {
        located: LocatedSpecies,
        stoichiometry: u32,
    },
    Binary(BinaryOp, Box<Equation>, Box<Equation>),
    Unary(UnaryOp, Box<Equation>),
}

impl BinaryOp {
    fn apply(self, left: f64, right: f64) -> Option<f64> {
        match self {
            BinaryOp::Add => Some(left + right),
            BinaryOp::Subtract => Some(left - right),
            BinaryOp::Multiply => Some(left * right),
            BinaryOp::Divide if right == 0.0 => None,
            BinaryOp::Divide => Some(left / right),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
        }
    }
}

impl UnaryOp {
    fn apply(self, value: f64) -> f64 {
        match self {
            UnaryOp::Round => (value + 0.5).floor(),
            UnaryOp::NaturalLog => value.ln(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            UnaryOp::Round => "round",
            UnaryOp::NaturalLog => "ln",
        }
    }
}

impl Equation {
    pub fn number(value: f64) -> Self {
        Equation::Number(value)
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Equation::Parameter(name.into())
    }

    /// A first-order species leaf.
    pub fn species(located: LocatedSpecies) -> Self {
        Equation::Species {
            located,
            stoichiometry: 1,
        }
    }

    pub fn reactant(species: &StoichiometrySpecies) -> Self {
        Equation::Species {
            located: species.located.clone(),
            stoichiometry: species.stoichiometry,
        }
    }

    pub fn binary(op: BinaryOp, left: Equation, right: Equation) -> Self {
        Equation::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn add(left: Equation, right: Equation) -> Self {
        Self::binary(BinaryOp::Add, left, right)
    }

    pub fn subtract(left: Equation, right: Equation) -> Self {
        Self::binary(BinaryOp::Subtract, left, right)
    }

    pub fn multiply(left: Equation, right: Equation) -> Self {
        Self::binary(BinaryOp::Multiply, left, right)
    }

    pub fn divide(left: Equation, right: Equation) -> Self {
        Self::binary(BinaryOp::Divide, left, right)
    }

    pub fn round(inner: Equation) -> Self {
        Equation::Unary(UnaryOp::Round, Box::new(inner))
    }

    pub fn ln(inner: Equation) -> Self {
        Equation::Unary(UnaryOp::NaturalLog, Box::new(inner))
    }

    /// Substitutes parameter values and folds every constant sub-expression.
    pub fn simplify(&self, parameters: &ParameterTable) -> Result<Equation, SimError> {
        match self {
            Equation::Number(value) => Ok(Equation::Number(*value)),
            Equation::Parameter(name) => parameters
                .get(name)
                .map(Equation::Number)
                .ok_or_else(|| SimError::MissingParameter(format!("'{}' in {}", name, self))),
            Equation::Species { .. } => Ok(self.clone()),
            Equation::Binary(op, left, right) => {
                let left = left.simplify(parameters)?;
                let right = right.simplify(parameters)?;
                match (&left, &right) {
                    (Equation::Number(a), Equation::Number(b)) => op
                        .apply(*a, *b)
                        .map(Equation::Number)
                        .ok_or_else(|| SimError::Evaluation(format!("divide by zero in {}", self))),
                    _ => Ok(Equation::binary(*op, left, right)),
                }
            }
            Equation::Unary(op, inner) => match inner.simplify(parameters)? {
                Equation::Number(value) => Ok(Equation::Number(op.apply(value))),
                other => Ok(Equation::Unary(*op, Box::new(other))),
            },
        }
    }

    pub fn evaluate<C: SpeciesCounts + ?Sized>(&self, counts: &C) -> Result<f64, SimError> {
        match self {
            Equation::Number(value) => Ok(*value),
            Equation::Parameter(name) => Err(SimError::Evaluation(format!(
                "parameter '{}' was not substituted before evaluation",
                name
            ))),
            Equation::Species {
                located,
                stoichiometry,
            } => Ok(mass_action_count(counts.count(located), *stoichiometry)),
            Equation::Binary(op, left, right) => {
                let a = left.evaluate(counts)?;
                let b = right.evaluate(counts)?;
                op.apply(a, b)
                    .ok_or_else(|| SimError::Evaluation(format!("divide by zero in {}", self)))
            }
            Equation::Unary(op, inner) => Ok(op.apply(inner.evaluate(counts)?)),
        }
    }

    /// Every species leaf in the tree, left to right.
    pub fn species_references(&self) -> Vec<&LocatedSpecies> {
        let mut refs = Vec::new();
        self.collect_species(&mut refs);
        refs
    }

    fn collect_species<'a>(&'a self, refs: &mut Vec<&'a LocatedSpecies>) {
        match self {
            Equation::Number(_) | Equation::Parameter(_) => {}
            Equation::Species { located, .. } => refs.push(located),
            Equation::Binary(_, left, right) => {
                left.collect_species(refs);
                right.collect_species(refs);
            }
            Equation::Unary(_, inner) => inner.collect_species(refs),
        }
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Equation::Number(_) => true,
            Equation::Parameter(_) | Equation::Species { .. } => false,
            Equation::Binary(_, left, right) => left.is_constant() && right.is_constant(),
            Equation::Unary(_, inner) => inner.is_constant(),
        }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Equation::Number(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    write!(f, "({})", *value as i64)
                } else {
                    write!(f, "({})", value)
                }
            }
            Equation::Parameter(name) => write!(f, "({})", name),
            Equation::Species { located, .. } => write!(f, "({})", located),
            Equation::Binary(op, left, right) => write!(f, "({} {} {})", left, op.symbol(), right),
            Equation::Unary(op, inner) => write!(f, "{}({})", op.name(), inner),
        }
    }
}

/// Number of distinct ways to pick `stoichiometry` molecules from `count`.
///
/// Catalysts (stoichiometry 0) count as first order.
pub fn mass_action_count(count: u64, stoichiometry: u32) -> f64 {
    match stoichiometry {
        0 | 1 => count as f64,
        2 if count < 2 => 0.0,
        2 => count as f64 * (count - 1) as f64 / 2.0,
        _ => binomial(count, stoichiometry as u64),
    }
}

fn binomial(n: u64, k: u64) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut acc = 1.0;
    for i in 0..k {
        acc = acc * (n - i) as f64 / (i + 1) as f64;
    }
    acc.round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::Location;
    use std::collections::HashMap;

    struct Counts(HashMap<String, u64>);

    impl SpeciesCounts for Counts {
        fn count(&self, located: &LocatedSpecies) -> u64 {
            self.0.get(&located.species).copied().unwrap_or(0)
        }
    }

    fn leaf(name: &str, stoichiometry: u32) -> Equation {
        Equation::Species {
            located: LocatedSpecies::new(name, Location::Contained, "cell"),
            stoichiometry,
        }
    }

    #[test]
    fn mass_action_counts_follow_binomials() {
        assert_eq!(mass_action_count(11, 0), 11.0);
        assert_eq!(mass_action_count(11, 1), 11.0);
        assert_eq!(mass_action_count(11, 2), 55.0);
        assert_eq!(mass_action_count(13, 3), 286.0);
        assert_eq!(mass_action_count(11, 5), 462.0);
        assert_eq!(mass_action_count(13, 7), 1716.0);
        assert_eq!(mass_action_count(2, 3), 0.0);
        assert_eq!(mass_action_count(0, 2), 0.0);
        assert_eq!(mass_action_count(1, 2), 0.0);
    }

    #[test]
    fn large_pair_counts_do_not_overflow() {
        let n = 5_000_000_000u64;
        let expected = n as f64 * (n - 1) as f64 / 2.0;
        assert!((mass_action_count(n, 2) - expected).abs() / expected < 1e-12);
        assert!(mass_action_count(u64::MAX, 2).is_finite());
        assert!(mass_action_count(n, 3) > expected);
    }

    #[test]
    fn simplify_substitutes_and_folds() {
        let params = ParameterTable::from_values([("k", 4.0)]);
        let eq = Equation::multiply(
            Equation::divide(Equation::parameter("k"), Equation::number(2.0)),
            leaf("a", 1),
        );
        let simplified = eq.simplify(&params).unwrap();
        assert_eq!(simplified, Equation::multiply(Equation::number(2.0), leaf("a", 1)));
        assert_eq!(simplified.to_string(), "((2) * (a contained cell))");
    }

    #[test]
    fn simplify_reports_missing_parameter_with_text() {
        let eq = Equation::add(Equation::parameter("kon"), Equation::number(1.0));
        let err = eq.simplify(&ParameterTable::new()).unwrap_err();
        assert!(matches!(err, SimError::MissingParameter(msg) if msg.contains("kon")));
    }

    #[test]
    fn evaluate_uses_counts() {
        let counts = Counts(HashMap::from([("a".to_string(), 10), ("b".to_string(), 3)]));
        let eq = Equation::multiply(Equation::number(0.5), Equation::multiply(leaf("a", 2), leaf("b", 1)));
        assert!((eq.evaluate(&counts).unwrap() - 0.5 * 45.0 * 3.0).abs() < 1e-12);
        let rounded = Equation::round(Equation::number(2.5));
        assert_eq!(rounded.evaluate(&counts).unwrap(), 3.0);
        let log = Equation::ln(leaf("a", 1));
        assert!((log.evaluate(&counts).unwrap() - 10f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn divide_by_zero_is_an_error() {
        let counts = Counts(HashMap::new());
        let eq = Equation::divide(Equation::number(1.0), leaf("a", 1));
        let err = eq.evaluate(&counts).unwrap_err();
        assert!(matches!(err, SimError::Evaluation(msg) if msg.contains("((1) / (a contained cell))")));
    }

    #[test]
    fn unsubstituted_parameter_fails_evaluation() {
        let counts = Counts(HashMap::new());
        let err = Equation::parameter("k").evaluate(&counts).unwrap_err();
        assert!(matches!(err, SimError::Evaluation(_)));
    }

    #[test]
    fn species_references_walk_whole_tree() {
        let eq = Equation::add(leaf("a", 1), Equation::ln(Equation::multiply(leaf("b", 2), Equation::number(3.0))));
        let names: Vec<_> = eq.species_references().iter().map(|l| l.species.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(!eq.is_constant());
        assert!(Equation::number(1.5).is_constant());
        assert_eq!(Equation::number(1.5).to_string(), "(1.5)");
    }
}
