//! meta::builtins
//!
//! The universal base types every registry knows about: the generic node
//! classifier and the string/integer/boolean primitives. One builtin
//! language exists per supported specification version; the two are not
//! wire-compatible with each other.

use crate::model::language::{
    Classifier, ClassifierKind, Language, LanguageVersion, MetaPointer,
};

use super::describe::TypeKey;

/// Key of the generic node type. Usable as a supertype marker (ignored by
/// inheritance resolution) and as a feature target for "any node".
pub const NODE: TypeKey = TypeKey("canopy.Node");
pub const STRING: TypeKey = TypeKey("canopy.String");
pub const INTEGER: TypeKey = TypeKey("canopy.Integer");
pub const BOOLEAN: TypeKey = TypeKey("canopy.Boolean");

/// The builtin language for the given specification version.
pub fn language(version: LanguageVersion) -> Language {
    let mut lang = Language::new("builtins");
    lang.version = version.as_str().to_string();
    lang.elements = vec![
        Classifier {
            name: "Node".into(),
            id: lang.id_for_contained("Node"),
            key: lang.key_for_contained("Node"),
            kind: ClassifierKind::Concept {
                is_abstract: true,
                is_partition: false,
                extended: None,
            },
            features: Vec::new(),
        },
        primitive(&lang, "String"),
        primitive(&lang, "Integer"),
        primitive(&lang, "Boolean"),
    ];
    lang
}

fn primitive(lang: &Language, name: &str) -> Classifier {
    Classifier {
        name: name.into(),
        id: lang.id_for_contained(name),
        key: lang.key_for_contained(name),
        kind: ClassifierKind::Primitive,
        features: Vec::new(),
    }
}

/// Wire pointer to a builtin primitive by name.
pub fn primitive_pointer(version: LanguageVersion, name: &str) -> MetaPointer {
    let lang = language(version);
    MetaPointer::new(
        lang.key.clone(),
        lang.version.clone(),
        lang.key_for_contained(name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_languages_differ_by_version() {
        let a = language(LanguageVersion::V2023_1);
        let b = language(LanguageVersion::V2024_1);
        assert_eq!(a.key, b.key);
        assert_ne!(a.version, b.version);
    }

    #[test]
    fn builtin_element_ids_are_derived() {
        let lang = language(LanguageVersion::CURRENT);
        let string = lang.classifier_by_name("String").unwrap();
        assert_eq!(string.id, "builtins-String-id");
        assert_eq!(string.key, "builtins-String-key");
    }
}
