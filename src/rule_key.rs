use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// The identity of a combinator node, used as the memoization and
/// cycle-detection key.
///
/// Two keys are equal iff they have the same kind, the same description, and
/// pairwise-equal parts. Callbacks and fixed values are compared by address,
/// so cloning a parser keeps its identity but rebuilding it with a fresh
/// closure does not.
#[derive(Clone)]
pub struct RuleKey(Rc<KeyData>);

struct KeyData {
    fingerprint: u64,
    kind: &'static str,
    description: String,
    parts: Vec<KeyPart>,
}

/// One component of a [`RuleKey`], besides its kind and description.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    /// A sub-parser.
    Child(RuleKey),
    /// A callback or fixed value, by address.
    Address(usize),
    /// A numeric repetition bound. `None` is unbounded.
    Bound(Option<usize>),
    /// A boolean flag, e.g. whether delimiters are kept.
    Flag(bool),
}

impl RuleKey {
    pub fn new(kind: &'static str, description: &str, parts: Vec<KeyPart>) -> RuleKey {
        let mut hasher = DefaultHasher::new();
        kind.hash(&mut hasher);
        description.hash(&mut hasher);
        parts.hash(&mut hasher);
        RuleKey(Rc::new(KeyData {
            fingerprint: hasher.finish(),
            kind,
            description: description.to_owned(),
            parts,
        }))
    }

    pub fn description(&self) -> &str {
        &self.0.description
    }
}

/// The address of the data behind an `Rc`, ignoring any vtable.
pub fn address_of<V: ?Sized>(rc: &Rc<V>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

impl PartialEq for RuleKey {
    fn eq(&self, other: &RuleKey) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.fingerprint == other.0.fingerprint
            && self.0.kind == other.0.kind
            && self.0.description == other.0.description
            && self.0.parts == other.0.parts
    }
}

impl Eq for RuleKey {}

impl Hash for RuleKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.fingerprint.hash(state)
    }
}

impl fmt::Debug for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}[{}]", self.0.kind, self.0.description)
    }
}

#[test]
fn test_rule_keys() {
    let leaf = RuleKey::new("token", "digit", vec![KeyPart::Address(0x10)]);
    let leaf_again = RuleKey::new("token", "digit", vec![KeyPart::Address(0x10)]);
    let other_leaf = RuleKey::new("token", "digit", vec![KeyPart::Address(0x20)]);
    assert_eq!(leaf, leaf_again);
    assert_ne!(leaf, other_leaf);

    let many = |desc: &str, child: &RuleKey| {
        RuleKey::new(
            "repeat",
            desc,
            vec![
                KeyPart::Child(child.clone()),
                KeyPart::Bound(Some(1)),
                KeyPart::Bound(None),
            ],
        )
    };
    // Independently built, same shape and description: deduplicable.
    assert_eq!(many("digits", &leaf), many("digits", &leaf_again));
    // Same shape, different description: distinguishable.
    assert_ne!(many("digits", &leaf), many("number", &leaf));
    // Same description, different substructure.
    assert_ne!(many("digits", &leaf), many("digits", &other_leaf));

    assert_eq!(many("digits", &leaf).description(), "digits");
}
