//! Alias resolution.
//!
//! Renamed or re-parented resources list the URNs they used to have. Every URN-valued
//! field of a resource entering a snapshot is rewritten through the alias map so that
//! references made under an old name resolve to the current one.

use std::collections::HashMap;

use crate::deployment::SerializedResource;
use crate::integrity::IntegrityError;
use crate::provider::ProviderReference;
use crate::urn::Urn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    aliases: HashMap<Urn, Urn>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Records that `alias` now means `canonical`.
    pub fn register(&mut self, alias: &Urn, canonical: &Urn) -> Result<(), IntegrityError> {
        if self.check(alias, canonical)? {
            self.aliases.insert(alias.clone(), canonical.clone());
        }
        Ok(())
    }

    /// Whether registering `alias` is legal, and whether it would add a new mapping.
    fn check(&self, alias: &Urn, canonical: &Urn) -> Result<bool, IntegrityError> {
        if alias == canonical {
            return Ok(false);
        }
        if let Some(existing) = self.aliases.get(alias) {
            if existing != canonical {
                return Err(IntegrityError::AmbiguousAlias {
                    alias: alias.clone(),
                    first: existing.clone(),
                    second: canonical.clone(),
                });
            }
            return Ok(false);
        }
        if &self.resolve(canonical) == alias {
            return Err(IntegrityError::AliasCycle {
                alias: alias.clone(),
                urn: canonical.clone(),
            });
        }
        Ok(true)
    }

    /// Follows the alias chain to its end. URNs without an alias come back unchanged.
    pub fn resolve(&self, urn: &Urn) -> Urn {
        let mut current = urn;
        // Registration refuses cycles; the bound only guards hand-built maps.
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current.clone()
    }

    pub fn normalize_urn(&self, urn: &mut Urn) {
        if !urn.is_empty() {
            *urn = self.resolve(urn);
        }
    }

    pub fn normalize_urns(&self, urns: &mut [Urn]) {
        for urn in urns {
            self.normalize_urn(urn);
        }
    }

    pub fn normalize_provider(&self, provider: &mut String) -> Result<(), IntegrityError> {
        if provider.is_empty() {
            return Ok(());
        }
        let malformed = |reason: String| IntegrityError::MalformedProviderReference {
            reference: provider.clone(),
            reason,
        };
        let reference = ProviderReference::parse(provider).map_err(|e| malformed(e.to_string()))?;
        let canonical = self.resolve(reference.urn());
        if &canonical != reference.urn() {
            let rewritten = reference
                .with_urn(canonical)
                .map_err(|e| malformed(e.to_string()))?;
            *provider = rewritten.to_string();
        }
        Ok(())
    }

    /// Registers the resource's own aliases, then rewrites every URN it refers to.
    /// On error neither the map nor the resource is modified.
    pub fn normalize(&mut self, res: &mut SerializedResource) -> Result<(), IntegrityError> {
        let mut fresh = Vec::new();
        for alias in &res.aliases {
            if self.check(alias, &res.urn)? && !fresh.contains(alias) {
                fresh.push(alias.clone());
            }
        }
        for alias in &fresh {
            self.aliases.insert(alias.clone(), res.urn.clone());
        }

        let mut provider = res.provider.clone();
        if let Err(err) = self.normalize_provider(&mut provider) {
            for alias in &fresh {
                self.aliases.remove(alias);
            }
            return Err(err);
        }
        res.provider = provider;

        self.normalize_urn(&mut res.parent);
        self.normalize_urns(&mut res.dependencies);
        for urns in res.property_dependencies.values_mut() {
            self.normalize_urns(urns);
        }
        self.normalize_urn(&mut res.deleted_with);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urn(name: &str) -> Urn {
        Urn::from_raw(format!("urn:pulumi:d::p::pkg:m:R::{name}"))
    }

    #[test]
    fn unaliased_urn_is_unchanged() {
        let map = AliasMap::new();
        assert_eq!(map.resolve(&urn("a")), urn("a"));
        let mut empty = Urn::default();
        map.normalize_urn(&mut empty);
        assert!(empty.is_empty());
    }

    #[test]
    fn chains_resolve_to_canonical() {
        let mut map = AliasMap::new();
        map.register(&urn("v1"), &urn("v2")).unwrap();
        map.register(&urn("v2"), &urn("v3")).unwrap();
        assert_eq!(map.resolve(&urn("v1")), urn("v3"));

        let mut once = urn("v1");
        map.normalize_urn(&mut once);
        let mut twice = once.clone();
        map.normalize_urn(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn ambiguous_alias_is_rejected() {
        let mut map = AliasMap::new();
        map.register(&urn("old"), &urn("a")).unwrap();
        map.register(&urn("old"), &urn("a")).unwrap();
        let err = map.register(&urn("old"), &urn("b")).unwrap_err();
        assert!(matches!(err, IntegrityError::AmbiguousAlias { .. }));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut map = AliasMap::new();
        map.register(&urn("a"), &urn("b")).unwrap();
        let err = map.register(&urn("b"), &urn("a")).unwrap_err();
        assert!(matches!(err, IntegrityError::AliasCycle { .. }));
    }

    #[test]
    fn normalizes_every_reference() {
        let mut map = AliasMap::new();
        let old_prov = "urn:pulumi:d::p::pulumi:providers:aws::old";
        let new_prov = "urn:pulumi:d::p::pulumi:providers:aws::new";
        map.register(&Urn::from_raw(old_prov), &Urn::from_raw(new_prov))
            .unwrap();
        map.register(&urn("old-parent"), &urn("parent")).unwrap();

        let mut res = SerializedResource::new(urn("child"), "pkg:m:R", true);
        res.aliases = vec![urn("child-v0")];
        res.parent = urn("old-parent");
        res.dependencies = vec![urn("old-parent"), urn("other")];
        res.property_dependencies
            .insert("x".into(), vec![urn("old-parent")]);
        res.provider = format!("{old_prov}::id-1");

        map.normalize(&mut res).unwrap();
        assert_eq!(res.parent, urn("parent"));
        assert_eq!(res.dependencies, vec![urn("parent"), urn("other")]);
        assert_eq!(res.property_dependencies["x"], vec![urn("parent")]);
        assert_eq!(res.provider, format!("{new_prov}::id-1"));
        assert_eq!(map.resolve(&urn("child-v0")), urn("child"));
    }

    #[test]
    fn failed_normalize_leaves_map_untouched() {
        let mut map = AliasMap::new();
        let mut res = SerializedResource::new(urn("a"), "pkg:m:R", true);
        res.aliases = vec![urn("a-v0")];
        res.provider = "no-separator".into();
        res.parent = urn("p");

        let err = map.normalize(&mut res).unwrap_err();
        assert!(matches!(err, IntegrityError::MalformedProviderReference { .. }));
        assert!(map.is_empty());
        assert_eq!(res.provider, "no-separator");
    }
}
