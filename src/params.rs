use meval::{Context, ContextProvider, Expr};
use std::collections::HashMap;
use std::str::FromStr;

use crate::SimError;

/// Resolved parameter values, substituted into rate equations before a run.
#[derive(Clone, Debug, Default)]
pub struct ParameterTable {
    values: HashMap<String, f64>,
}

struct ResolvedContext<'a> {
    values: &'a HashMap<String, f64>,
}

impl<'a> ContextProvider for ResolvedContext<'a> {
    fn get_var(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values<I, N>(values: I) -> Self
    where
        I: IntoIterator<Item = (N, f64)>,
        N: Into<String>,
    {
        Self {
            values: values.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }

    /// Resolves textual definitions such as `k_deg = ln(2) / half_life`.
    ///
    /// Definitions may reference each other in any order. A reference to a name
    /// that is never defined, or a cycle, is reported as a missing parameter.
    pub fn from_definitions<I, N, E>(definitions: I) -> Result<Self, SimError>
    where
        I: IntoIterator<Item = (N, E)>,
        N: Into<String>,
        E: AsRef<str>,
    {
        let mut pending: Vec<(String, Expr)> = Vec::new();
        for (name, text) in definitions {
            let name = name.into();
            if pending.iter().any(|(existing, _)| *existing == name) {
                return Err(SimError::InvalidParameter(format!(
                    "parameter '{}' is defined more than once",
                    name
                )));
            }
            let expr = Expr::from_str(text.as_ref()).map_err(|err| {
                SimError::InvalidParameter(format!("{} = {}: {}", name, text.as_ref(), err))
            })?;
            pending.push((name, expr));
        }

        let mut values = HashMap::with_capacity(pending.len());
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            let mut first_missing = None;
            for (name, expr) in pending.drain(..) {
                let result = expr.eval_with_context((ResolvedContext { values: &values }, Context::new()));
                match result {
                    Ok(value) => {
                        values.insert(name, value);
                    }
                    Err(meval::Error::UnknownVariable(var)) => {
                        if first_missing.is_none() {
                            first_missing = Some(format!("'{}' (referenced by '{}')", var, name));
                        }
                        deferred.push((name, expr));
                    }
                    Err(err) => {
                        return Err(SimError::InvalidParameter(format!("{}: {}", name, err)));
                    }
                }
            }
            if deferred.len() == before {
                return Err(SimError::MissingParameter(
                    first_missing.unwrap_or_else(|| "unknown".into()),
                ));
            }
            pending = deferred;
        }
        Ok(Self { values })
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, &value)| (name.as_str(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_resolve_out_of_order() {
        let table = ParameterTable::from_definitions([
            ("k_deg", "ln(2) / half_life"),
            ("half_life", "2 * base"),
            ("base", "3"),
        ])
        .unwrap();
        assert_eq!(table.get("base"), Some(3.0));
        assert_eq!(table.get("half_life"), Some(6.0));
        let k = table.get("k_deg").unwrap();
        assert!((k - 2f64.ln() / 6.0).abs() < 1e-12);
    }

    #[test]
    fn undefined_reference_is_missing_parameter() {
        let err = ParameterTable::from_definitions([("a", "b + 1")]).unwrap_err();
        assert!(matches!(err, SimError::MissingParameter(msg) if msg.contains("'b'")));
    }

    #[test]
    fn cyclic_definitions_are_missing_parameters() {
        let err = ParameterTable::from_definitions([("a", "b"), ("b", "a")]).unwrap_err();
        assert!(matches!(err, SimError::MissingParameter(_)));
    }

    #[test]
    fn malformed_definition_is_rejected() {
        let err = ParameterTable::from_definitions([("a", "3 +")]).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameter(msg) if msg.starts_with("a = 3 +")));
    }

    #[test]
    fn duplicate_definition_is_rejected() {
        let err = ParameterTable::from_definitions([("a", "1"), ("a", "2")]).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameter(msg) if msg.contains("more than once")));
    }
}
