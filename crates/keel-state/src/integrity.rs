//! Structural checks every snapshot must pass before it is handed out.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::deployment::{Deployment, Manifest, SerializedResource};
use crate::provider::ProviderReference;
use crate::urn::Urn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("magic cookie mismatch; possible tampering/corruption detected")]
    MagicMismatch,
    #[error("provider {urn} is not referenceable: {reason}")]
    ProviderNotReferenceable { urn: Urn, reason: String },
    #[error("failed to parse provider reference '{reference}': {reason}")]
    MalformedProviderReference { reference: String, reason: String },
    #[error("resource {urn} refers to unknown provider {provider}")]
    UnknownProvider { urn: Urn, provider: String },
    #[error("child resource {urn}'s parent {parent} comes after it")]
    ParentAfterChild { urn: Urn, parent: Urn },
    #[error("child resource {urn} refers to missing parent {parent}")]
    MissingParent { urn: Urn, parent: Urn },
    #[error("resource {urn}'s dependency {dependency} comes after it")]
    DependencyAfterResource { urn: Urn, dependency: Urn },
    #[error("resource {urn} dependency {dependency} refers to missing resource")]
    MissingDependency { urn: Urn, dependency: Urn },
    #[error("duplicate resource {urn} (not marked for deletion)")]
    DuplicateResource { urn: Urn },
    #[error("two resources ('{first}' and '{second}') alias to the same URN '{alias}'")]
    AmbiguousAlias { alias: Urn, first: Urn, second: Urn },
    #[error("alias '{alias}' of {urn} would form an alias cycle")]
    AliasCycle { alias: Urn, urn: Urn },
}

impl IntegrityError {
    /// Shown next to integrity failures: the state must be repaired by hand.
    pub const RECOVERY_HINT: &'static str = "the snapshot is structurally invalid; export the \
        state, repair the listed resources, and import it again";
}

/// Verifies a completed snapshot: magic cookie, provider referenceability, parent and
/// dependency ordering, URN uniqueness. `None` is trivially valid.
pub fn verify_integrity(snap: Option<&Deployment>) -> Result<(), IntegrityError> {
    let Some(snap) = snap else {
        return Ok(());
    };

    if snap.manifest.magic != Manifest::magic_cookie() {
        return Err(IntegrityError::MagicMismatch);
    }

    let mut urns: HashSet<&Urn> = HashSet::with_capacity(snap.resources.len());
    let mut providers: HashSet<ProviderReference> = HashSet::new();
    let later_positions = last_positions(&snap.resources);

    for (i, state) in snap.resources.iter().enumerate() {
        let urn = &state.urn;

        if state.ty.is_provider_type() {
            let reference = ProviderReference::new(urn.clone(), state.id.clone()).map_err(|e| {
                IntegrityError::ProviderNotReferenceable {
                    urn: urn.clone(),
                    reason: e.to_string(),
                }
            })?;
            providers.insert(reference);
        }

        if !state.provider.is_empty() {
            let reference = ProviderReference::parse(&state.provider).map_err(|e| {
                IntegrityError::MalformedProviderReference {
                    reference: state.provider.clone(),
                    reason: format!("resource {urn}: {e}"),
                }
            })?;
            if !providers.contains(&reference) {
                return Err(IntegrityError::UnknownProvider {
                    urn: urn.clone(),
                    provider: reference.to_string(),
                });
            }
        }

        let parent = &state.parent;
        if !parent.is_empty() && !urns.contains(parent) {
            if appears_after(&later_positions, parent, i) {
                return Err(IntegrityError::ParentAfterChild {
                    urn: urn.clone(),
                    parent: parent.clone(),
                });
            }
            return Err(IntegrityError::MissingParent {
                urn: urn.clone(),
                parent: parent.clone(),
            });
        }

        for dep in &state.dependencies {
            if !urns.contains(dep) {
                if appears_after(&later_positions, dep, i) {
                    return Err(IntegrityError::DependencyAfterResource {
                        urn: urn.clone(),
                        dependency: dep.clone(),
                    });
                }
                return Err(IntegrityError::MissingDependency {
                    urn: urn.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        // Duplicates are only legal while all but one copy is pending deletion.
        if urns.contains(urn) && !state.delete {
            return Err(IntegrityError::DuplicateResource { urn: urn.clone() });
        }
        urns.insert(urn);
    }

    Ok(())
}

/// Last index at which each URN occurs, so "comes after" checks stay O(1).
fn last_positions(resources: &[SerializedResource]) -> HashMap<&Urn, usize> {
    resources
        .iter()
        .enumerate()
        .map(|(i, res)| (&res.urn, i))
        .collect()
}

fn appears_after(positions: &HashMap<&Urn, usize>, urn: &Urn, index: usize) -> bool {
    positions.get(urn).is_some_and(|&pos| pos > index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(name: &str) -> SerializedResource {
        SerializedResource::new(
            format!("urn:pulumi:d::p::pkg:m:R::{name}").as_str(),
            "pkg:m:R",
            true,
        )
    }

    fn deployment(resources: Vec<SerializedResource>) -> Deployment {
        let mut dep = Deployment::empty();
        dep.resources = resources;
        dep
    }

    #[test]
    fn none_and_empty_are_valid() {
        assert!(verify_integrity(None).is_ok());
        assert!(verify_integrity(Some(&deployment(vec![]))).is_ok());
    }

    #[test]
    fn magic_must_match() {
        let mut dep = deployment(vec![]);
        dep.manifest.magic = "tampered".into();
        assert_eq!(verify_integrity(Some(&dep)), Err(IntegrityError::MagicMismatch));
    }

    #[test]
    fn duplicate_urn_needs_delete_flag() {
        let dup = deployment(vec![res("a"), res("a")]);
        assert!(matches!(
            verify_integrity(Some(&dup)),
            Err(IntegrityError::DuplicateResource { .. })
        ));

        let mut old = res("a");
        old.delete = true;
        let ok = deployment(vec![res("a"), old]);
        assert!(verify_integrity(Some(&ok)).is_ok());
    }

    #[test]
    fn parent_errors_are_distinguished() {
        let mut child = res("child");
        child.parent = res("parent").urn;

        let missing = verify_integrity(Some(&deployment(vec![child.clone()]))).unwrap_err();
        assert!(matches!(missing, IntegrityError::MissingParent { .. }));
        assert!(missing.to_string().contains("refers to missing parent"));

        let after =
            verify_integrity(Some(&deployment(vec![child.clone(), res("parent")]))).unwrap_err();
        assert!(matches!(after, IntegrityError::ParentAfterChild { .. }));
        assert!(after.to_string().contains("comes after it"));

        assert!(verify_integrity(Some(&deployment(vec![res("parent"), child]))).is_ok());
    }

    #[test]
    fn dependency_errors_are_distinguished() {
        let mut dependent = res("b");
        dependent.dependencies = vec![res("a").urn];

        let missing = verify_integrity(Some(&deployment(vec![dependent.clone()]))).unwrap_err();
        assert!(matches!(missing, IntegrityError::MissingDependency { .. }));

        let after =
            verify_integrity(Some(&deployment(vec![dependent.clone(), res("a")]))).unwrap_err();
        assert!(matches!(after, IntegrityError::DependencyAfterResource { .. }));

        assert!(verify_integrity(Some(&deployment(vec![res("a"), dependent]))).is_ok());
    }

    #[test]
    fn providers_must_be_registered_first() {
        let prov_urn = "urn:pulumi:d::p::pulumi:providers:aws::default";
        let mut provider = SerializedResource::new(prov_urn, "pulumi:providers:aws", true);
        provider.id = "p-1".into();
        let mut user = res("bucket");
        user.provider = format!("{prov_urn}::p-1");

        let err =
            verify_integrity(Some(&deployment(vec![user.clone(), provider.clone()]))).unwrap_err();
        assert!(matches!(err, IntegrityError::UnknownProvider { .. }));

        let mut wrong_id = user.clone();
        wrong_id.provider = format!("{prov_urn}::p-2");
        let err = verify_integrity(Some(&deployment(vec![provider.clone(), wrong_id]))).unwrap_err();
        assert!(matches!(err, IntegrityError::UnknownProvider { .. }));

        assert!(verify_integrity(Some(&deployment(vec![provider, user]))).is_ok());
    }

    #[test]
    fn provider_with_malformed_urn_is_not_referenceable() {
        let bogus = SerializedResource::new("not-a-urn", "pulumi:providers:aws", true);
        let err = verify_integrity(Some(&deployment(vec![bogus]))).unwrap_err();
        assert!(matches!(err, IntegrityError::ProviderNotReferenceable { .. }));
    }
}
