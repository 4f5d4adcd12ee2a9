//! End-to-end metamodel tests: declarative descriptors through derivation,
//! registry lookups and typed access.

use canopy::binding::{BindingError, TypedNode, TypedRef};
use canopy::meta::builtins;
use canopy::meta::describe::{Described, FeatureDescriptor, FeatureKind, TypeDescriptor, TypeKey};
use canopy::meta::{derive_language, MetamodelRegistry};
use canopy::model::{
    clean_id_fragment, Feature, Language, LanguageVersion, Multiplicity, Node, NodeId,
    ReferenceValue,
};

use proptest::prelude::*;

const PROJECT: TypeDescriptor = TypeDescriptor::partition(
    "Project",
    TypeKey("tracker.Project"),
    &[builtins::NODE],
    &[FeatureDescriptor::new(
        "issues",
        FeatureKind::ContainmentMany {
            target: TypeKey("tracker.Issue"),
        },
    )],
);

const ISSUE: TypeDescriptor = TypeDescriptor::concept(
    "Issue",
    TypeKey("tracker.Issue"),
    &[builtins::NODE],
    &[
        FeatureDescriptor::new(
            "title",
            FeatureKind::Property {
                scalar: builtins::STRING,
            },
        ),
        FeatureDescriptor::new(
            "estimate",
            FeatureKind::Property {
                scalar: builtins::INTEGER,
            },
        ),
        FeatureDescriptor::new(
            "assignee",
            FeatureKind::ReferenceSingle {
                target: TypeKey("tracker.User"),
            },
        ),
        FeatureDescriptor::new(
            "duplicateOf",
            FeatureKind::ReferenceMany {
                target: TypeKey("tracker.Issue"),
            },
        ),
        FeatureDescriptor::new(
            "comments",
            FeatureKind::ContainmentMany {
                target: TypeKey("tracker.Comment"),
            },
        ),
    ],
);

const BUG: TypeDescriptor = TypeDescriptor::concept(
    "Bug",
    TypeKey("tracker.Bug"),
    &[TypeKey("tracker.Issue")],
    &[],
);

const USER: TypeDescriptor = TypeDescriptor::concept(
    "User",
    TypeKey("tracker.User"),
    &[builtins::NODE],
    &[],
);

const COMMENT: TypeDescriptor = TypeDescriptor::concept(
    "Comment",
    TypeKey("tracker.Comment"),
    &[builtins::NODE],
    &[],
);

const ALL: &[&TypeDescriptor] = &[&PROJECT, &ISSUE, &BUG, &USER, &COMMENT];

fn derive() -> (Language, MetamodelRegistry) {
    let mut registry = MetamodelRegistry::with_builtins();
    let language = derive_language("tracker", ALL, &mut registry, LanguageVersion::CURRENT)
        .expect("tracker language derives");
    (language, registry)
}

fn id(s: &str) -> NodeId {
    NodeId::new(s).unwrap()
}

struct Issue(Node);

impl Described for Issue {
    fn descriptor() -> &'static TypeDescriptor {
        &ISSUE
    }
}

impl TypedNode for Issue {
    fn node(&self) -> &Node {
        &self.0
    }

    fn node_mut(&mut self) -> &mut Node {
        &mut self.0
    }
}

struct User;

impl Described for User {
    fn descriptor() -> &'static TypeDescriptor {
        &USER
    }
}

fn typed_node(registry: &MetamodelRegistry, key: TypeKey, node_id: &str) -> Node {
    let pointer = registry
        .classifier(key, LanguageVersion::CURRENT)
        .unwrap()
        .pointer
        .clone();
    Node::new(id(node_id)).with_classifier(pointer)
}

#[test]
fn derivation_registers_everything() {
    let (language, registry) = derive();
    assert_eq!(language.elements.len(), ALL.len());
    for descriptor in ALL {
        assert!(
            registry
                .classifier(descriptor.key, LanguageVersion::CURRENT)
                .is_some(),
            "{} should be registered",
            descriptor.key
        );
    }
}

#[test]
fn derivation_is_deterministic_across_runs() {
    let (a, _) = derive();
    let (b, _) = derive();
    assert_eq!(a, b);
}

#[test]
fn inheritance_resolves_to_the_declared_supertype() {
    let (language, _) = derive();
    let bug = language.classifier_by_name("Bug").unwrap();
    let issue = language.classifier_by_name("Issue").unwrap();
    assert_eq!(bug.extended(), Some(issue.key.as_str()));
}

#[test]
fn feature_classification_matches_declared_shapes() {
    let (language, _) = derive();
    let issue = language.classifier_by_name("Issue").unwrap();
    assert!(matches!(
        issue.feature_by_name("title"),
        Some(Feature::Property { optional: true, .. })
    ));
    assert!(matches!(
        issue.feature_by_name("assignee"),
        Some(Feature::Reference {
            multiplicity: Multiplicity::Optional,
            ..
        })
    ));
    assert!(matches!(
        issue.feature_by_name("duplicateOf"),
        Some(Feature::Reference {
            multiplicity: Multiplicity::ZeroToMany,
            ..
        })
    ));
    assert!(matches!(
        issue.feature_by_name("comments"),
        Some(Feature::Containment {
            multiplicity: Multiplicity::ZeroToMany,
            ..
        })
    ));
}

#[test]
fn single_reference_round_trip_and_replacement() {
    let (_, registry) = derive();
    let mut issue = Issue(typed_node(&registry, TypeKey("tracker.Issue"), "i1"));

    let value = ReferenceValue {
        resolve_info: Some("alice".into()),
        target: Some(id("u1")),
    };
    issue.set_single_reference("assignee", Some(value.clone()));
    assert_eq!(issue.get_single_reference("assignee").unwrap(), Some(&value));

    // A second write fully replaces, no accumulation.
    let replacement = ReferenceValue::to_target(id("u2"));
    issue.set_single_reference("assignee", Some(replacement.clone()));
    assert_eq!(
        issue.get_single_reference("assignee").unwrap(),
        Some(&replacement)
    );

    issue.set_single_reference("assignee", None);
    assert_eq!(issue.get_single_reference("assignee").unwrap(), None);
}

#[test]
fn typed_reference_validates_target_type() {
    let (_, registry) = derive();
    let user = typed_node(&registry, TypeKey("tracker.User"), "u1");
    let comment = typed_node(&registry, TypeKey("tracker.Comment"), "c1");

    assert!(TypedRef::<User>::to_node(&user, &registry, LanguageVersion::CURRENT).is_ok());
    assert!(matches!(
        TypedRef::<User>::to_node(&comment, &registry, LanguageVersion::CURRENT),
        Err(BindingError::TypeMismatch { .. })
    ));
}

#[test]
fn containment_list_appends_in_order() {
    let (_, registry) = derive();
    let mut issue = Issue(typed_node(&registry, TypeKey("tracker.Issue"), "i1"));
    let mut comments = issue.containment_list("comments");
    assert!(comments
        .push(typed_node(&registry, TypeKey("tracker.Comment"), "c1"))
        .unwrap());
    assert!(comments
        .push(typed_node(&registry, TypeKey("tracker.Comment"), "c2"))
        .unwrap());
    let ids: Vec<_> = comments.iter().map(|c| c.id().as_str().to_string()).collect();
    assert_eq!(ids, ["c1", "c2"]);
}

#[test]
fn typed_properties_read_back() {
    let (_, registry) = derive();
    let mut issue = Issue(typed_node(&registry, TypeKey("tracker.Issue"), "i1"));
    issue.set_property("title", "crash on save");
    issue.set_property("estimate", 5i64);
    assert_eq!(
        issue.get_property::<String>("title").unwrap().as_deref(),
        Some("crash on save")
    );
    assert_eq!(issue.get_property::<i64>("estimate").unwrap(), Some(5));
}

proptest! {
    #[test]
    fn derived_language_ids_stay_in_the_wire_charset(
        name in "[a-zA-Z0-9_. /:-]{1,24}"
    ) {
        let language = Language::new(name.as_str());
        prop_assert!(language.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        prop_assert_eq!(&language.id, &Language::new(name.as_str()).id);
    }

    #[test]
    fn fragment_cleaning_is_idempotent(name in "[a-zA-Z0-9_. /:-]{0,32}") {
        let once = clean_id_fragment(&name);
        prop_assert_eq!(clean_id_fragment(&once), once.clone());
        prop_assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }
}
