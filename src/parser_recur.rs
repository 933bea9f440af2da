use crate::node::{Node, Variant};
use crate::Parser;
use std::cell::OnceCell;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/*========================================*/
/*          Parser: Recursion             */
/*========================================*/

/// Used to define recursive parsers.
///
/// The key is that you can [`Recursive::refn`] it before you [`Recursive::define`] it!
///
/// ```
/// use parser_cps::{choice, exact, satisfy, seq, Recursive};
///
/// // nested := digit | '(' nested ')'
/// let nested = Recursive::<char, char>::new("nested");
/// let digit = satisfy("digit", |c: &char| c.is_ascii_digit());
/// let parens = seq("parens", (exact('('), nested.refn(), exact(')'))).second();
/// let nested = nested.define(choice("nested digit", [digit, parens]));
///
/// let input: Vec<char> = "((7))".chars().collect();
/// assert_eq!(nested.parse(&input).unwrap(), vec!['7']);
/// ```
pub struct Recursive<T, R> {
    cell: Rc<RecurCell<T>>,
    phantom: PhantomData<fn() -> R>,
}

pub(crate) struct RecurCell<T> {
    name: String,
    node: OnceCell<Rc<Node<T>>>,
}

impl<T: 'static, R: Clone + 'static> Recursive<T, R> {
    /// Declare a new recursive parser. **You must [`Recursive::define`] it later!**
    ///
    /// Running a parser that reaches an undefined recursive parser fails with
    /// [`ParseError::UndefinedRule`](crate::ParseError::UndefinedRule).
    pub fn new(name: &str) -> Recursive<T, R> {
        Recursive {
            cell: Rc::new(RecurCell {
                name: name.to_owned(),
                node: OnceCell::new(),
            }),
            phantom: PhantomData,
        }
    }

    /// Construct a reference to this recursive parser. Importantly, you may use this
    /// reference _before_ `define`ing the parser.
    pub fn refn(&self) -> Parser<T, R> {
        let recur = RecurRef::Weak(Rc::downgrade(&self.cell));
        Parser::from_node(Node::new(&self.cell.name, Variant::Rule(recur)))
    }

    /// Define this recursive parser to be equal to `parser`. `parser` may make use
    /// of [`Recursive::refn`]s inside of itself (and indeed it ought to; otherwise
    /// there was no need to use `Recursive`).
    pub fn define(self, parser: Parser<T, R>) -> Parser<T, R> {
        match self.cell.node.set(parser.node) {
            Ok(()) => (),
            Err(_) => panic!("Bug in recur: failed to set OnceCell"),
        }
        let recur = RecurRef::Strong(self.cell.clone());
        Parser::from_node(Node::new(&self.cell.name, Variant::Rule(recur)))
    }
}

/// How a `Rule` node reaches its definition.
///
/// References handed out by `refn` are _weak_ so that the rule's body, which
/// contains them, does not keep itself alive. The parser returned by `define`
/// holds the only strong pointer.
pub(crate) enum RecurRef<T> {
    Weak(Weak<RecurCell<T>>),
    Strong(Rc<RecurCell<T>>),
}

impl<T> RecurRef<T> {
    /// Shared by the strong and weak references to the same rule, so that both
    /// have the same identity.
    pub fn cell_address(&self) -> usize {
        match self {
            RecurRef::Weak(weak) => Weak::as_ptr(weak) as *const () as usize,
            RecurRef::Strong(rc) => Rc::as_ptr(rc) as *const () as usize,
        }
    }

    /// The rule's body, or `None` if it was never defined (or has been dropped).
    pub fn resolve(&self) -> Option<Rc<Node<T>>> {
        match self {
            RecurRef::Weak(weak) => weak.upgrade()?.node.get().cloned(),
            RecurRef::Strong(rc) => rc.node.get().cloned(),
        }
    }
}
