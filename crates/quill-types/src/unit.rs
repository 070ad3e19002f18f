use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A unit of measure: a product of named dimensions raised to integer powers.
///
/// `ms` is `{ms: 1}`, `m/s` is `{m: 1, s: -1}`, and the empty map is unitless.
/// Zero exponents are never stored, so two units are equal exactly when they
/// describe the same dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    exponents: BTreeMap<String, i32>,
}

impl Unit {
    /// The unitless unit.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single dimension to the first power, e.g. `Unit::of("ms")`.
    pub fn of(dimension: &str) -> Self {
        Self::from_exponents([(dimension, 1)])
    }

    /// Build a unit from `(dimension, exponent)` pairs. Repeated dimensions add up.
    pub fn from_exponents<'a>(pairs: impl IntoIterator<Item = (&'a str, i32)>) -> Self {
        let mut exponents = BTreeMap::new();
        for (dimension, exponent) in pairs {
            *exponents.entry(dimension.to_string()).or_insert(0) += exponent;
        }
        exponents.retain(|_, e| *e != 0);
        Self { exponents }
    }

    pub fn is_unitless(&self) -> bool {
        self.exponents.is_empty()
    }

    pub fn exponent(&self, dimension: &str) -> i32 {
        self.exponents.get(dimension).copied().unwrap_or(0)
    }

    /// The unit of `a × b`.
    pub fn product(&self, other: &Unit) -> Unit {
        let mut exponents = self.exponents.clone();
        for (dimension, exponent) in &other.exponents {
            *exponents.entry(dimension.clone()).or_insert(0) += exponent;
        }
        exponents.retain(|_, e| *e != 0);
        Unit { exponents }
    }

    /// The unit of `a ÷ b`.
    pub fn quotient(&self, other: &Unit) -> Unit {
        self.product(&other.inverse())
    }

    pub fn inverse(&self) -> Unit {
        Unit {
            exponents: self
                .exponents
                .iter()
                .map(|(d, e)| (d.clone(), -e))
                .collect(),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |dims: Vec<(&String, i32)>| {
            dims.iter()
                .map(|(d, e)| {
                    if *e == 1 {
                        d.to_string()
                    } else {
                        format!("{d}^{e}")
                    }
                })
                .collect::<Vec<_>>()
                .join("·")
        };
        let numerator: Vec<_> = self
            .exponents
            .iter()
            .filter(|(_, e)| **e > 0)
            .map(|(d, e)| (d, *e))
            .collect();
        let denominator: Vec<_> = self
            .exponents
            .iter()
            .filter(|(_, e)| **e < 0)
            .map(|(d, e)| (d, -*e))
            .collect();

        write!(f, "{}", render(numerator))?;
        if !denominator.is_empty() {
            write!(f, "/{}", render(denominator))?;
        }
        Ok(())
    }
}
