//! meta::registry
//!
//! Bidirectional index between domain types and classifiers/primitive
//! types, one table per specification version.
//!
//! # Design
//!
//! The registry is an explicitly constructed value owned by whichever
//! top-level context derives the metamodel, and passed by reference to the
//! binding layer and the codec. There is no process-global state.
//!
//! # Concurrency contract
//!
//! The registry is populated during startup (metamodel derivation) and read
//! without locks afterwards. Concurrent registration during concurrent
//! lookup is unsupported.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::chunk::codec::{Instantiator, PrimitiveCodecs};
use crate::model::language::{Classifier, ClassifierKind, LanguageVersion, MetaPointer};
use crate::model::node::PropertyValue;

use super::builtins;
use super::describe::TypeKey;

/// Errors from registry mutation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{key} is registered as a node type and cannot map to a primitive type")]
    NodeTypeAsPrimitive { key: TypeKey },

    #[error("no primitive type registered for {key} in version {version}")]
    UnknownPrimitive {
        key: TypeKey,
        version: LanguageVersion,
    },
}

/// Encode a property value to its wire text.
pub type PrimitiveSerializer = fn(&PropertyValue) -> String;

/// Decode wire text into a property value.
pub type PrimitiveDeserializer = fn(&str) -> Result<PropertyValue, String>;

/// A classifier registered for a domain type: the classifier itself plus
/// its wire pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredClassifier {
    pub pointer: MetaPointer,
    pub classifier: Classifier,
}

/// Maps domain types to classifiers and primitive types.
#[derive(Debug, Default)]
pub struct MetamodelRegistry {
    classifiers: BTreeMap<LanguageVersion, BTreeMap<TypeKey, RegisteredClassifier>>,
    primitives: BTreeMap<LanguageVersion, BTreeMap<TypeKey, RegisteredClassifier>>,
    /// Custom scalar codecs, keyed by primitive-type key.
    serializers: BTreeMap<String, PrimitiveSerializer>,
    deserializers: BTreeMap<String, PrimitiveDeserializer>,
    /// Classifier ids excluded from automatic decode-time instantiation.
    decode_ineligible: BTreeSet<String>,
    /// Per-classifier-id instance factories for decode.
    factories: BTreeMap<String, fn() -> crate::model::node::Node>,
}

impl MetamodelRegistry {
    /// A registry pre-populated, for every supported version, with the
    /// universal base types: the generic node classifier (excluded from
    /// decode-time instantiation) and the string/integer/boolean
    /// primitives.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        for version in LanguageVersion::ALL {
            let lang = builtins::language(version);
            for classifier in &lang.elements {
                let pointer = lang.pointer_to(classifier);
                match (&classifier.kind, classifier.name.as_str()) {
                    (ClassifierKind::Primitive, "String") => {
                        registry.insert_primitive(version, builtins::STRING, pointer, classifier);
                    }
                    (ClassifierKind::Primitive, "Integer") => {
                        registry.insert_primitive(version, builtins::INTEGER, pointer, classifier);
                    }
                    (ClassifierKind::Primitive, "Boolean") => {
                        registry.insert_primitive(version, builtins::BOOLEAN, pointer, classifier);
                    }
                    _ => {
                        registry.register_classifier(
                            builtins::NODE,
                            version,
                            pointer,
                            classifier.clone(),
                            false,
                            None,
                        );
                    }
                }
            }
        }
        registry
    }

    fn insert_primitive(
        &mut self,
        version: LanguageVersion,
        key: TypeKey,
        pointer: MetaPointer,
        classifier: &Classifier,
    ) {
        self.primitives.entry(version).or_default().insert(
            key,
            RegisteredClassifier {
                pointer,
                classifier: classifier.clone(),
            },
        );
    }

    /// Record a domain-type-to-classifier mapping.
    ///
    /// With `considered_during_decoding` false the type is excluded from
    /// automatic decode-time instantiation (for types that exist only so
    /// user metamodels can reference built-in structural classifiers).
    pub fn register_classifier(
        &mut self,
        key: TypeKey,
        version: LanguageVersion,
        pointer: MetaPointer,
        classifier: Classifier,
        considered_during_decoding: bool,
        factory: Option<fn() -> crate::model::node::Node>,
    ) {
        if !considered_during_decoding {
            self.decode_ineligible.insert(classifier.id.clone());
        }
        if let Some(factory) = factory {
            self.factories.insert(classifier.id.clone(), factory);
        }
        self.classifiers
            .entry(version)
            .or_default()
            .insert(key, RegisteredClassifier { pointer, classifier });
    }

    /// Record a domain-type-to-primitive-type mapping, with optional custom
    /// scalar codecs.
    ///
    /// # Errors
    ///
    /// Fails if the domain type is already registered as a node type in
    /// this version; primitive and node mappings are disjoint.
    pub fn register_primitive(
        &mut self,
        key: TypeKey,
        version: LanguageVersion,
        pointer: MetaPointer,
        classifier: Classifier,
        serializer: Option<PrimitiveSerializer>,
        deserializer: Option<PrimitiveDeserializer>,
    ) -> Result<(), RegistryError> {
        if self
            .classifiers
            .get(&version)
            .is_some_and(|table| table.contains_key(&key))
        {
            return Err(RegistryError::NodeTypeAsPrimitive { key });
        }
        if let Some(serializer) = serializer {
            self.serializers.insert(classifier.key.clone(), serializer);
        }
        if let Some(deserializer) = deserializer {
            self.deserializers.insert(classifier.key.clone(), deserializer);
        }
        self.primitives.entry(version).or_default().insert(
            key,
            RegisteredClassifier { pointer, classifier },
        );
        Ok(())
    }

    /// Attach custom codecs to an already-registered primitive type.
    pub fn set_primitive_codecs(
        &mut self,
        key: TypeKey,
        version: LanguageVersion,
        serializer: PrimitiveSerializer,
        deserializer: PrimitiveDeserializer,
    ) -> Result<(), RegistryError> {
        let entry = self
            .primitive(key, version)
            .ok_or(RegistryError::UnknownPrimitive { key, version })?;
        let primitive_key = entry.classifier.key.clone();
        self.serializers.insert(primitive_key.clone(), serializer);
        self.deserializers.insert(primitive_key, deserializer);
        Ok(())
    }

    /// Classifier registered for a domain type. Absence is not an error;
    /// callers decide whether it is fatal.
    pub fn classifier(&self, key: TypeKey, version: LanguageVersion) -> Option<&RegisteredClassifier> {
        self.classifiers.get(&version)?.get(&key)
    }

    /// Primitive type registered for a domain type.
    pub fn primitive(&self, key: TypeKey, version: LanguageVersion) -> Option<&RegisteredClassifier> {
        self.primitives.get(&version)?.get(&key)
    }

    /// Find a registered classifier by its element key (reverse lookup,
    /// used by typed-reference instance checks).
    pub fn classifier_by_element_key(
        &self,
        element_key: &str,
        version: LanguageVersion,
    ) -> Option<&RegisteredClassifier> {
        self.classifiers
            .get(&version)?
            .values()
            .find(|entry| entry.classifier.key == element_key)
    }

    /// Whether `candidate` names the same classifier as `expected` or one
    /// extending it, walking the registered extended chain.
    pub fn is_instance_of(
        &self,
        candidate_key: &str,
        expected_key: &str,
        version: LanguageVersion,
    ) -> bool {
        let mut current = Some(candidate_key.to_string());
        while let Some(key) = current {
            if key == expected_key {
                return true;
            }
            current = self
                .classifier_by_element_key(&key, version)
                .and_then(|entry| entry.classifier.extended().map(str::to_string));
        }
        false
    }

    /// Register a decode hook for every decode-eligible mapping with a
    /// factory: the hook builds a bare instance and assigns the incoming
    /// wire identifier.
    pub fn prepare_instantiator(&self, instantiator: &mut Instantiator, version: LanguageVersion) {
        let Some(table) = self.classifiers.get(&version) else {
            return;
        };
        for entry in table.values() {
            let id = &entry.classifier.id;
            if self.decode_ineligible.contains(id) {
                continue;
            }
            if let Some(factory) = self.factories.get(id) {
                instantiator.register(id.clone(), *factory);
            }
        }
    }

    /// Install the custom scalar codecs supplied at registration time.
    pub fn prepare_primitive_codecs(&self, codecs: &mut PrimitiveCodecs) {
        for (key, serializer) in &self.serializers {
            codecs.register_serializer(key.clone(), *serializer);
        }
        for (key, deserializer) in &self.deserializers {
            codecs.register_deserializer(key.clone(), *deserializer);
        }
    }
}
