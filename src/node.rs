//! The type-erased combinator tree that the scheduler executes.
//!
//! Every parser result travels through the engine as a [`Value`]. The typed
//! [`Parser`](crate::Parser) layer is responsible for putting values of the
//! right type in and taking them back out; a mismatch here is an engine bug
//! and is reported as a semantic failure rather than a panic.

use crate::parser_recur::RecurRef;
use crate::rule_key::{address_of, KeyPart, RuleKey};
use std::any::{type_name, Any};
use std::rc::Rc;

/// A parse result of any type.
pub type Value = Rc<dyn Any>;

/// Inspect a token, producing a result if it matches.
pub type TokenFn<T> = Rc<dyn Fn(&T) -> Option<Value>>;
/// Transform one result. `Err` is a semantic failure.
pub type MapFn = Rc<dyn Fn(&Value) -> Result<Value, String>>;
/// Transform one result, or reject it. `Ok(None)` is an ordinary mismatch.
pub type ExtractFn = Rc<dyn Fn(&Value) -> Result<Option<Value>, String>>;
/// Wrap the (possibly absent) result of an optional parser.
pub type WrapFn = Rc<dyn Fn(Option<&Value>) -> Result<Value, String>>;
/// Combine the results of a sequence.
pub type CombineFn = Rc<dyn Fn(&[Value]) -> Result<Value, String>>;
/// Add one item to a repetition's accumulator.
pub type StepFn = Rc<dyn Fn(&Value, &Value) -> Result<Value, String>>;

pub fn downcast<R: Clone + 'static>(value: &Value) -> Result<R, String> {
    match value.downcast_ref::<R>() {
        Some(result) => Ok(result.clone()),
        None => Err(format!(
            "internal error: result is not of type {}",
            type_name::<R>()
        )),
    }
}

pub struct Node<T> {
    pub key: RuleKey,
    pub variant: Variant<T>,
}

pub enum Variant<T> {
    Token(TokenFn<T>),
    Succeed(Value),
    Eof,
    Identity(Rc<Node<T>>),
    Lift(Rc<Node<T>>, Value),
    Default(Rc<Node<T>>, MapFn),
    Map(Rc<Node<T>>, MapFn),
    Extract(Rc<Node<T>>, ExtractFn),
    Optional(Rc<Node<T>>, WrapFn),
    Sequence(Rc<[Rc<Node<T>>]>, CombineFn),
    Repeat(Rc<Repeat<T>>),
    Choice(Rc<[Rc<Node<T>>]>),
    Rule(RecurRef<T>),
}

/// The shared shape of `Many`, `Fold`, `Separator` and `Intersperse`.
///
/// Each branch threads an accumulator, starting at `init`, through `step`
/// once per item; `finish` turns the final accumulator into the result.
pub struct Repeat<T> {
    pub item: Rc<Node<T>>,
    pub delimiter: Option<Rc<Node<T>>>,
    /// Whether delimiter results are passed to `step` like items.
    pub keep_delimiters: bool,
    pub min: usize,
    pub max: Option<usize>,
    pub init: Value,
    pub step: StepFn,
    pub finish: MapFn,
}

/// The items collected so far by one branch of a repetition, newest first.
/// Branches share their common prefix.
#[derive(Clone, Default)]
pub struct Items(Option<Rc<ItemCell>>);

struct ItemCell {
    value: Value,
    prev: Items,
}

impl Items {
    pub fn push(&self, value: Value) -> Items {
        Items(Some(Rc::new(ItemCell {
            value,
            prev: self.clone(),
        })))
    }

    pub fn to_vec(&self) -> Vec<Value> {
        let mut values = Vec::new();
        let mut link = self.0.as_deref();
        while let Some(cell) = link {
            values.push(cell.value.clone());
            link = cell.prev.0.as_deref();
        }
        values.reverse();
        values
    }
}

// Dropping a long list must not recurse once per item.
impl Drop for Items {
    fn drop(&mut self) {
        let mut next = self.0.take();
        while let Some(cell) = next {
            match Rc::try_unwrap(cell) {
                Ok(mut cell) => next = cell.prev.0.take(),
                Err(_) => break,
            }
        }
    }
}

impl<T> Variant<T> {
    fn kind(&self) -> &'static str {
        use Variant::*;

        match self {
            Token(_) => "token",
            Succeed(_) => "succeed",
            Eof => "eof",
            Identity(_) => "identity",
            Lift(_, _) => "lift",
            Default(_, _) => "default",
            Map(_, _) => "map",
            Extract(_, _) => "extract",
            Optional(_, _) => "option",
            Sequence(_, _) => "sequence",
            Repeat(_) => "repeat",
            Choice(_) => "choice",
            Rule(_) => "rule",
        }
    }

    fn key_parts(&self) -> Vec<KeyPart> {
        use KeyPart::{Address, Bound, Child, Flag};
        use Variant::*;

        let child = |node: &Rc<Node<T>>| Child(node.key.clone());
        match self {
            Token(func) => vec![Address(address_of(func))],
            Succeed(value) => vec![Address(address_of(value))],
            Eof => vec![],
            Identity(sub) => vec![child(sub)],
            Lift(sub, value) => vec![child(sub), Address(address_of(value))],
            Default(sub, func) | Map(sub, func) => vec![child(sub), Address(address_of(func))],
            Extract(sub, func) => vec![child(sub), Address(address_of(func))],
            Optional(sub, func) => vec![child(sub), Address(address_of(func))],
            Sequence(subs, func) => {
                let mut parts: Vec<KeyPart> = subs.iter().map(child).collect();
                parts.push(Address(address_of(func)));
                parts
            }
            Repeat(rep) => vec![
                child(&rep.item),
                match &rep.delimiter {
                    Some(delimiter) => child(delimiter),
                    None => Flag(false),
                },
                Flag(rep.keep_delimiters),
                Bound(Some(rep.min)),
                Bound(rep.max),
                Address(address_of(&rep.init)),
                Address(address_of(&rep.step)),
                Address(address_of(&rep.finish)),
            ],
            Choice(subs) => subs.iter().map(child).collect(),
            Rule(recur) => vec![Address(recur.cell_address())],
        }
    }
}

impl<T> Node<T> {
    pub fn new(description: &str, variant: Variant<T>) -> Rc<Node<T>> {
        let key = RuleKey::new(variant.kind(), description, variant.key_parts());
        Rc::new(Node { key, variant })
    }

    pub fn description(&self) -> &str {
        self.key.description()
    }
}

#[test]
fn test_items() {
    let empty = Items::default();
    let one = empty.push(Rc::new(1));
    let two = one.push(Rc::new(2));
    let branch = one.push(Rc::new(3));
    let as_ints = |items: &Items| -> Vec<i32> {
        items
            .to_vec()
            .iter()
            .map(|v| *v.downcast_ref::<i32>().unwrap())
            .collect()
    };
    assert_eq!(as_ints(&empty), Vec::<i32>::new());
    assert_eq!(as_ints(&two), vec![1, 2]);
    assert_eq!(as_ints(&branch), vec![1, 3]);
    drop(one);
    assert_eq!(as_ints(&two), vec![1, 2]);

    let mut long = Items::default();
    for i in 0..200_000 {
        long = long.push(Rc::new(i));
    }
    drop(long);
}
