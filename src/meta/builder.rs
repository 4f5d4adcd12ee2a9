//! meta::builder
//!
//! The metamodel derivation engine: turns a set of declarative type
//! descriptors into a populated [`Language`].
//!
//! # Algorithm
//!
//! 1. Primitive-type descriptors become PrimitiveType classifiers first,
//!    because concepts may use them
//! 2. Every node-type descriptor gets its classifier shell (name, derived
//!    id/key) before any features are populated, so sibling types can
//!    forward-reference each other
//! 3. Inheritance is resolved: exactly one node-type supertype becomes the
//!    extended classifier; base markers and interfaces are ignored;
//!    anything else is a structural error
//! 4. Features are populated from each descriptor's classification table
//! 5. Every derived classifier and primitive mapping is registered before
//!    the language is returned
//!
//! Derivation is deterministic: identical input always yields identical
//! classifier and feature ids/keys, which is required for stable wire
//! compatibility across redeploys.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::model::language::{
    Classifier, ClassifierKind, Feature, Language, LanguageVersion, MetaPointer, Multiplicity,
};

use super::builtins;
use super::describe::{BaseKind, FeatureKind, TypeDescriptor, TypeKey};
use super::registry::{MetamodelRegistry, RegistryError};

/// Fatal metamodel construction errors. None of these are recoverable at
/// runtime; a malformed metamodel would corrupt every later serialization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeriveError {
    #[error("descriptor {key} has an empty name")]
    UnnamedDescriptor { key: TypeKey },

    #[error("type {type_name} has more than one node-type supertype: {first} and {second}")]
    AmbiguousInheritance {
        type_name: String,
        first: TypeKey,
        second: TypeKey,
    },

    #[error("supertype {supertype} of {type_name} is neither a base marker, an interface, nor a known node type")]
    UnknownSupertype {
        type_name: String,
        supertype: TypeKey,
    },

    #[error("feature {feature} of {type_name} targets unknown type {target}")]
    UnknownFeatureTarget {
        type_name: String,
        feature: String,
        target: TypeKey,
    },

    #[error("feature {feature} of {type_name} has no registered primitive type for {scalar}")]
    UnknownPrimitive {
        type_name: String,
        feature: String,
        scalar: TypeKey,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Derive a language from an ordered list of type descriptors and register
/// every produced classifier in the given registry.
pub fn derive_language(
    name: &str,
    descriptors: &[&'static TypeDescriptor],
    registry: &mut MetamodelRegistry,
    version: LanguageVersion,
) -> Result<Language, DeriveError> {
    let mut lang = Language::new(name);
    debug!(language = %lang.name, id = %lang.id, "deriving language");

    for descriptor in descriptors {
        if descriptor.name.is_empty() {
            return Err(DeriveError::UnnamedDescriptor {
                key: descriptor.key,
            });
        }
    }

    // Primitive types first: concepts may use them.
    let mut local_primitives: BTreeMap<TypeKey, String> = BTreeMap::new();
    for descriptor in descriptors.iter().filter(|d| d.base == BaseKind::Primitive) {
        let classifier = Classifier {
            name: descriptor.name.to_string(),
            id: lang.id_for_contained(descriptor.name),
            key: lang.key_for_contained(descriptor.name),
            kind: ClassifierKind::Primitive,
            features: Vec::new(),
        };
        local_primitives.insert(descriptor.key, classifier.key.clone());
        lang.elements.push(classifier);
    }

    // Classifier shells before features, so siblings can reference each
    // other in either order.
    let mut local_nodes: BTreeMap<TypeKey, usize> = BTreeMap::new();
    for descriptor in descriptors.iter().filter(|d| d.base != BaseKind::Primitive) {
        let kind = match descriptor.base {
            BaseKind::Concept => ClassifierKind::Concept {
                is_abstract: descriptor.is_abstract,
                is_partition: descriptor.is_partition,
                extended: None,
            },
            BaseKind::Annotation => ClassifierKind::Annotation { extended: None },
            BaseKind::Interface => ClassifierKind::Interface,
            BaseKind::Primitive => unreachable!("filtered above"),
        };
        let classifier = Classifier {
            name: descriptor.name.to_string(),
            id: lang.id_for_contained(descriptor.name),
            key: lang.key_for_contained(descriptor.name),
            kind,
            features: Vec::new(),
        };
        local_nodes.insert(descriptor.key, lang.elements.len());
        lang.elements.push(classifier);
    }

    // Resolve inheritance and populate features. Updates are computed
    // against the immutable shell set, then applied.
    let mut updates: Vec<(usize, Option<String>, Vec<Feature>)> = Vec::new();
    for descriptor in descriptors.iter().filter(|d| d.base != BaseKind::Primitive) {
        let index = local_nodes[&descriptor.key];
        let extended = resolve_inheritance(descriptor, &lang, &local_nodes, registry, version)?;
        let features = populate_features(
            descriptor,
            &lang.elements[index],
            &lang,
            &local_nodes,
            &local_primitives,
            registry,
            version,
        )?;
        updates.push((index, extended, features));
    }
    for (index, extended, features) in updates {
        let classifier = &mut lang.elements[index];
        match &mut classifier.kind {
            ClassifierKind::Concept { extended: slot, .. } => *slot = extended,
            ClassifierKind::Annotation { extended: slot } => *slot = extended,
            _ => {}
        }
        classifier.features = features;
    }

    // Register everything so recursive lookups from later derivations
    // succeed.
    for descriptor in descriptors {
        if descriptor.base == BaseKind::Primitive {
            let key = &local_primitives[&descriptor.key];
            let classifier = lang
                .elements
                .iter()
                .find(|c| &c.key == key)
                .cloned()
                .unwrap_or_else(|| unreachable!("primitive registered above"));
            registry.register_primitive(
                descriptor.key,
                version,
                lang.pointer_to(&classifier),
                classifier,
                None,
                None,
            )?;
        } else {
            let classifier = lang.elements[local_nodes[&descriptor.key]].clone();
            registry.register_classifier(
                descriptor.key,
                version,
                lang.pointer_to(&classifier),
                classifier,
                true,
                descriptor.factory,
            );
        }
    }
    debug!(language = %lang.name, classifiers = lang.elements.len(), "language derived");
    Ok(lang)
}

fn resolve_inheritance(
    descriptor: &TypeDescriptor,
    lang: &Language,
    local_nodes: &BTreeMap<TypeKey, usize>,
    registry: &MetamodelRegistry,
    version: LanguageVersion,
) -> Result<Option<String>, DeriveError> {
    let mut extended: Option<(TypeKey, String)> = None;
    for supertype in descriptor.supertypes {
        // The generic node type is a pure base marker.
        if *supertype == builtins::NODE {
            continue;
        }
        let kind = classify_supertype(*supertype, lang, local_nodes, registry, version);
        match kind {
            Some(SupertypeKind::Interface) => continue,
            Some(SupertypeKind::NodeType(key)) => {
                if let Some((first, _)) = &extended {
                    return Err(DeriveError::AmbiguousInheritance {
                        type_name: descriptor.name.to_string(),
                        first: *first,
                        second: *supertype,
                    });
                }
                extended = Some((*supertype, key));
            }
            None => {
                return Err(DeriveError::UnknownSupertype {
                    type_name: descriptor.name.to_string(),
                    supertype: *supertype,
                });
            }
        }
    }
    Ok(extended.map(|(_, key)| key))
}

enum SupertypeKind {
    Interface,
    /// Element key of the extended classifier.
    NodeType(String),
}

fn classify_supertype(
    supertype: TypeKey,
    lang: &Language,
    local_nodes: &BTreeMap<TypeKey, usize>,
    registry: &MetamodelRegistry,
    version: LanguageVersion,
) -> Option<SupertypeKind> {
    if let Some(index) = local_nodes.get(&supertype) {
        let classifier = &lang.elements[*index];
        return Some(match classifier.kind {
            ClassifierKind::Interface => SupertypeKind::Interface,
            _ => SupertypeKind::NodeType(classifier.key.clone()),
        });
    }
    let entry = registry.classifier(supertype, version)?;
    Some(match entry.classifier.kind {
        ClassifierKind::Interface => SupertypeKind::Interface,
        ClassifierKind::Primitive => return None,
        _ => SupertypeKind::NodeType(entry.classifier.key.clone()),
    })
}

#[allow(clippy::too_many_arguments)]
fn populate_features(
    descriptor: &TypeDescriptor,
    shell: &Classifier,
    lang: &Language,
    local_nodes: &BTreeMap<TypeKey, usize>,
    local_primitives: &BTreeMap<TypeKey, String>,
    registry: &MetamodelRegistry,
    version: LanguageVersion,
) -> Result<Vec<Feature>, DeriveError> {
    let mut features = Vec::new();
    for fd in descriptor.features.iter().filter(|f| !f.derived) {
        let id = shell.id_for_contained(fd.name);
        let key = shell.key_for_contained(fd.name);
        let feature = match fd.kind {
            FeatureKind::Property { scalar } => {
                let primitive = resolve_primitive(scalar, lang, local_primitives, registry, version)
                    .ok_or_else(|| DeriveError::UnknownPrimitive {
                        type_name: descriptor.name.to_string(),
                        feature: fd.name.to_string(),
                        scalar,
                    })?;
                Feature::Property {
                    name: fd.name.to_string(),
                    id,
                    key,
                    primitive,
                    optional: true,
                }
            }
            FeatureKind::ContainmentSingle { target } | FeatureKind::ContainmentMany { target } => {
                let pointer = resolve_node_target(target, lang, local_nodes, registry, version)
                    .ok_or_else(|| DeriveError::UnknownFeatureTarget {
                        type_name: descriptor.name.to_string(),
                        feature: fd.name.to_string(),
                        target,
                    })?;
                Feature::Containment {
                    name: fd.name.to_string(),
                    id,
                    key,
                    target: pointer,
                    multiplicity: if matches!(fd.kind, FeatureKind::ContainmentMany { .. }) {
                        Multiplicity::ZeroToMany
                    } else {
                        Multiplicity::Optional
                    },
                }
            }
            FeatureKind::ReferenceSingle { target } | FeatureKind::ReferenceMany { target } => {
                let pointer = resolve_node_target(target, lang, local_nodes, registry, version)
                    .ok_or_else(|| DeriveError::UnknownFeatureTarget {
                        type_name: descriptor.name.to_string(),
                        feature: fd.name.to_string(),
                        target,
                    })?;
                Feature::Reference {
                    name: fd.name.to_string(),
                    id,
                    key,
                    target: pointer,
                    multiplicity: if matches!(fd.kind, FeatureKind::ReferenceMany { .. }) {
                        Multiplicity::ZeroToMany
                    } else {
                        Multiplicity::Optional
                    },
                }
            }
        };
        features.push(feature);
    }
    Ok(features)
}

fn resolve_node_target(
    target: TypeKey,
    lang: &Language,
    local_nodes: &BTreeMap<TypeKey, usize>,
    registry: &MetamodelRegistry,
    version: LanguageVersion,
) -> Option<MetaPointer> {
    if let Some(index) = local_nodes.get(&target) {
        return Some(lang.pointer_to(&lang.elements[*index]));
    }
    registry
        .classifier(target, version)
        .map(|entry| entry.pointer.clone())
}

fn resolve_primitive(
    scalar: TypeKey,
    lang: &Language,
    local_primitives: &BTreeMap<TypeKey, String>,
    registry: &MetamodelRegistry,
    version: LanguageVersion,
) -> Option<MetaPointer> {
    if let Some(key) = local_primitives.get(&scalar) {
        return lang
            .elements
            .iter()
            .find(|c| &c.key == key)
            .map(|c| lang.pointer_to(c));
    }
    registry
        .primitive(scalar, version)
        .map(|entry| entry.pointer.clone())
}
