//! Weighted references to named sorted sets.
//!
//! A [`BindElement`] is what callers hand in; a [`WeightedKey`] is what the
//! cache engine works with. Normalisation happens once, at the boundary, so
//! malformed input never reaches the combination logic.

use std::fmt;
use std::str::FromStr;

use super::error::DomainError;

pub const DEFAULT_WEIGHT: f64 = 1.0;

/// A sorted-set name paired with the weight applied to its scores when combined.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedKey {
    key: String,
    weight: f64,
}

impl WeightedKey {
    pub fn new(key: impl Into<String>, weight: f64) -> Result<Self, DomainError> {
        let key = key.into();
        if key.is_empty() {
            return Err(DomainError::validation("sorted set name must not be empty"));
        }
        if !weight.is_finite() {
            return Err(DomainError::validation(format!(
                "weight for `{key}` must be finite, got {weight}"
            )));
        }
        Ok(Self { key, weight })
    }

    /// Weight 1.0.
    pub fn unweighted(key: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(key, DEFAULT_WEIGHT)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Canonical `name*weight` rendering used inside cache key hashes.
    ///
    /// The weight uses the shortest round-trip float form, so `1.0` stays
    /// `1.0` rather than collapsing to `1`. Exponents carry no `+` sign
    /// (`1e16`, not `1e+16`), so keys for such weights will not match ones
    /// written by producers that print the sign.
    pub fn hash_chunk(&self) -> String {
        format!("{}*{:?}", self.key, self.weight)
    }
}

impl fmt::Display for WeightedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash_chunk())
    }
}

/// Parses `name` or `name*weight`.
///
/// A trailing `*suffix` that is not a number is treated as part of the name.
impl FromStr for WeightedKey {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.rsplit_once('*') {
            Some((name, weight)) => match weight.trim().parse::<f64>() {
                Ok(weight) => Self::new(name, weight),
                Err(_) => Self::unweighted(value),
            },
            None => Self::unweighted(value),
        }
    }
}

/// Raw caller input describing one term of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum BindElement {
    /// Already validated.
    Weighted(WeightedKey),
    /// A name and an explicit weight.
    Pair(String, f64),
    /// Loosely-typed parts, `[name]` or `[name, weight]`.
    Parts(Vec<String>),
}

impl BindElement {
    pub fn normalize(&self) -> Result<WeightedKey, DomainError> {
        match self {
            Self::Weighted(key) => Ok(key.clone()),
            Self::Pair(name, weight) => WeightedKey::new(name.clone(), *weight),
            Self::Parts(parts) => match parts.as_slice() {
                [name] => WeightedKey::unweighted(name.clone()),
                [name, weight] => {
                    let weight = weight.trim().parse::<f64>().map_err(|err| {
                        DomainError::validation(format!(
                            "invalid weight `{weight}` for `{name}`: {err}"
                        ))
                    })?;
                    WeightedKey::new(name.clone(), weight)
                }
                other => Err(DomainError::validation(format!(
                    "each bind element must have 1 or 2 parts, got {}",
                    other.len()
                ))),
            },
        }
    }
}

impl From<WeightedKey> for BindElement {
    fn from(key: WeightedKey) -> Self {
        Self::Weighted(key)
    }
}

impl From<&str> for BindElement {
    fn from(name: &str) -> Self {
        Self::Parts(vec![name.to_string()])
    }
}

impl From<String> for BindElement {
    fn from(name: String) -> Self {
        Self::Parts(vec![name])
    }
}

impl<S: Into<String>> From<(S, f64)> for BindElement {
    fn from((name, weight): (S, f64)) -> Self {
        Self::Pair(name.into(), weight)
    }
}

/// Normalise every element, failing on the first malformed one.
pub fn normalize_all(elements: &[BindElement]) -> Result<Vec<WeightedKey>, DomainError> {
    elements.iter().map(BindElement::normalize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_part_defaults_to_unit_weight() {
        let key = BindElement::from("SET_A").normalize().expect("valid element");
        assert_eq!(key.key(), "SET_A");
        assert_eq!(key.weight(), DEFAULT_WEIGHT);
    }

    #[test]
    fn two_parts_parse_weight() {
        let element = BindElement::Parts(vec!["SET_B".into(), "2.5".into()]);
        let key = element.normalize().expect("valid element");
        assert_eq!(key.weight(), 2.5);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let empty = BindElement::Parts(Vec::new());
        assert!(empty.normalize().is_err());

        let three = BindElement::Parts(vec!["a".into(), "1".into(), "x".into()]);
        let err = three.normalize().expect_err("three parts must fail");
        assert!(err.to_string().contains("1 or 2 parts"));
    }

    #[test]
    fn empty_name_and_bad_weight_are_rejected() {
        assert!(WeightedKey::unweighted("").is_err());
        assert!(WeightedKey::new("a", f64::NAN).is_err());
        let element = BindElement::Parts(vec!["a".into(), "heavy".into()]);
        assert!(element.normalize().is_err());
    }

    #[test]
    fn hash_chunk_keeps_float_form() {
        let key = WeightedKey::unweighted("SET_A").expect("valid key");
        assert_eq!(key.hash_chunk(), "SET_A*1.0");
        let key = WeightedKey::new("SET_B", 1000.0).expect("valid key");
        assert_eq!(key.hash_chunk(), "SET_B*1000.0");
        let key = WeightedKey::new("SET_C", 1e16).expect("valid key");
        assert_eq!(key.hash_chunk(), "SET_C*1e16");
    }

    #[test]
    fn parse_star_syntax() {
        let key: WeightedKey = "TEST_1*0.5".parse().expect("valid key");
        assert_eq!(key.key(), "TEST_1");
        assert_eq!(key.weight(), 0.5);

        let key: WeightedKey = "odd*name".parse().expect("valid key");
        assert_eq!(key.key(), "odd*name");
        assert_eq!(key.weight(), DEFAULT_WEIGHT);
    }
}
