//! Ordered, de-duplicated collections of capabilities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::error::{CapabilityError, CapabilityResult};

/// An ordered set of unique capabilities.
///
/// Order does not influence matching; it is kept for audit and display.
/// Duplicate `(resource, operation, pattern)` entries collapse to one, and a
/// grant and a denial of the same triple cannot coexist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    items: Vec<Capability>,
}

impl CapabilitySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] if the same triple is
    /// both granted and denied.
    pub fn from_capabilities(
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> CapabilityResult<Self> {
        let mut set = Self::new();
        for capability in capabilities {
            set.insert(capability)?;
        }
        Ok(set)
    }

    /// Parse a list of capability strings.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] for the first string
    /// that does not parse, or for a grant/denial conflict.
    pub fn parse<I, S>(strings: I) -> CapabilityResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for text in strings {
            set.insert(Capability::parse(text.as_ref())?)?;
        }
        Ok(set)
    }

    /// Insert a capability. Returns `false` if it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] if the opposite
    /// polarity of the same triple is already present.
    pub fn insert(&mut self, capability: Capability) -> CapabilityResult<bool> {
        match self.position(&capability) {
            Some(index) if self.items[index].is_negated() == capability.is_negated() => Ok(false),
            Some(index) => Err(CapabilityError::malformed(
                capability.to_string(),
                format!("conflicts with `{}` in the same set", self.items[index]),
            )),
            None => {
                self.items.push(capability);
                Ok(true)
            },
        }
    }

    /// Builder-style [`insert`](Self::insert).
    ///
    /// # Errors
    ///
    /// See [`insert`](Self::insert).
    pub fn with(mut self, capability: Capability) -> CapabilityResult<Self> {
        self.insert(capability)?;
        Ok(self)
    }

    fn position(&self, capability: &Capability) -> Option<usize> {
        let key = capability.key();
        self.items.iter().position(|c| c.key() == key)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Capability> {
        self.items.iter()
    }

    /// Iterate over grants only.
    pub fn grants(&self) -> impl Iterator<Item = &Capability> {
        self.items.iter().filter(|c| !c.is_negated())
    }

    /// Iterate over denials only.
    pub fn denials(&self) -> impl Iterator<Item = &Capability> {
        self.items.iter().filter(|c| c.is_negated())
    }

    /// Number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether this exact capability (including polarity) is present.
    #[must_use]
    pub fn contains(&self, capability: &Capability) -> bool {
        self.items.contains(capability)
    }

    /// Whether some grant in this set subsumes `capability`.
    #[must_use]
    pub fn covers(&self, capability: &Capability) -> bool {
        self.grants().any(|grant| grant.subsumes(capability))
    }

    /// The explicit denial of the same triple, if any.
    #[must_use]
    pub fn denial_of(&self, capability: &Capability) -> Option<&Capability> {
        let key = capability.key();
        self.denials().find(|c| c.key() == key)
    }

    /// Canonical strings in insertion order.
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.items.iter().map(ToString::to_string).collect()
    }

    /// Union for a nested scope: `self` is the parent's effective set.
    ///
    /// A requested denial replaces a parent grant of the same triple. Callers
    /// must have rejected requested grants the parent denies.
    pub(crate) fn scoped_union(&self, requested: &Self) -> Self {
        let mut items = self.items.clone();
        for capability in requested {
            let key = capability.key();
            match items.iter().position(|c| c.key() == key) {
                Some(index) if capability.is_negated() => items[index] = capability.clone(),
                Some(_) => {},
                None => items.push(capability.clone()),
            }
        }
        Self { items }
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, capability) in self.items.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{capability}")?;
        }
        Ok(())
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.items.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let items = Vec::<Capability>::deserialize(deserializer)?;
        Self::from_capabilities(items).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse() {
        let set = CapabilitySet::parse(["file:read:/a", "file:read:/a", "file:read:/b"]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_strings(), vec!["file:read:/a", "file:read:/b"]);
    }

    #[test]
    fn test_grant_and_denial_of_same_triple_rejected() {
        let err = CapabilitySet::parse(["file:read:/a", "!file:read:/a"]).unwrap_err();
        assert!(matches!(err, CapabilityError::MalformedCapability { .. }));
    }

    #[test]
    fn test_grants_and_denials() {
        let set = CapabilitySet::parse(["file:*:**", "!file:write:/etc/**"]).unwrap();
        assert_eq!(set.grants().count(), 1);
        assert_eq!(set.denials().count(), 1);
        assert!(set.covers(&Capability::parse("file:read:/data/**").unwrap()));
    }

    #[test]
    fn test_scoped_union_lets_denial_replace_grant() {
        let parent = CapabilitySet::parse(["file:read:/a", "net:connect:**"]).unwrap();
        let requested = CapabilitySet::parse(["!file:read:/a", "file:read:/a/b"]).unwrap();
        let merged = parent.scoped_union(&requested);
        assert_eq!(
            merged.to_strings(),
            vec!["!file:read:/a", "net:connect:**", "file:read:/a/b"]
        );
    }

    #[test]
    fn test_display_and_serde() {
        let set = CapabilitySet::parse(["file:read:/data/**", "!net:*:**"]).unwrap();
        assert_eq!(set.to_string(), "file:read:/data/**, !net:*:**");

        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["file:read:/data/**","!net:*:**"]"#);
        let back: CapabilitySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);

        assert!(serde_json::from_str::<CapabilitySet>(r#"["a:b:/x","!a:b:/x"]"#).is_err());
    }
}
