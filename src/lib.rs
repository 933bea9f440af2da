// This design achieves all of the following:
//
// - Tokens are opaque. The engine never looks at one except through a
//   user-supplied matcher.
// - Ambiguity is preserved: every way of matching is reported.
// - Nothing recurses on the native stack, however deep the grammar or long
//   the input.
// - The typed interface is a single concrete type `Parser<T, R>`, which is
//   cheap to clone and share.
// - Recursive rules can't loop: re-entering a rule at the same position is
//   refused.
//
// The price is that results travel through the engine as `Rc<dyn Any>` and
// have to be `Clone`, because one result may be delivered to many
// continuations.

//! # parser_cps
//!
//! **Ambiguity-preserving parser combinators over any token type, run by an
//! explicit continuation engine.**
//!
//! ```
//! use parser_cps::{choice, exact, satisfy, Parsed};
//!
//! // Easy parsers
//!
//! let digit = satisfy("digit", |c: &char| c.is_ascii_digit());
//! let number = digit
//!     .many1()
//!     .try_map(|digits| digits.into_iter().collect::<String>().parse::<u32>());
//!
//! let input: Vec<char> = "123".chars().collect();
//! assert_eq!(number.parse(&input), Ok(vec![123]));
//!
//! // Ambiguity is preserved
//!
//! let ab = exact('a').and(exact('b')).lift("ab");
//! let a = exact('a').lift("a");
//! let both = choice("ab or a", [ab, a]);
//!
//! let input: Vec<char> = "ab".chars().collect();
//! assert_eq!(
//!     both.parse_prefixes(&input).unwrap(),
//!     vec![
//!         Parsed { value: "ab", position: 2 },
//!         Parsed { value: "a", position: 1 },
//!     ]
//! );
//! ```
//!
//! ## Overview
//!
//! This crate centers around the type `Parser<T, R>`, which represents a parser
//! over tokens of type `T` that, if successful, produces a value of type `R`.
//! These parsers are combined together using _combinators_ to create larger
//! parsers.
//!
//! ### Tokens
//!
//! There is no lexer. Tokenize your input however you like (or not at all: a
//! `Vec<char>` works fine) and build parsers for single tokens with:
//!
//! - [`token`] makes a parser that consumes one token if a function maps it to
//!   `Some(result)`.
//! - [`satisfy`] makes a parser that consumes one token matching a predicate,
//!   producing the token.
//! - [`exact`] makes a parser that consumes one token equal to a given one.
//! - [`any`] consumes any single token.
//!
//! ### Ambiguity
//!
//! Unlike most combinator libraries, [`choice`] does not stop at the first
//! alternative that matches. Every alternative is tried, and every success
//! is reported, each followed by its own continuation of the parse. Running a
//! parser therefore produces a _list_ of results, one per way of parsing
//! the input.
//!
//! Repetition is greedy, though: a branch of [`Parser::many0`] stops repeating
//! only when another repetition can't be parsed.
//!
//! ### Errors
//!
//! A parse fails with [`ParseError::NoParse`] if no alternative matched. It
//! aborts with [`ParseError::Semantic`] as soon as a fallible transformation,
//! like the function given to [`Parser::try_map`], returns an error.
//!
//! ### Recursion
//!
//! Use [`Recursive`] to refer to a parser before it is defined. Re-entering a
//! rule at the position where it is already being parsed is refused, so
//! left-recursive rules terminate, matching only through their
//! non-left-recursive alternatives. Use [`Parser::fold`] for left-associative
//! operators instead.
//!
//! ## Reference
//!
//! Here's a quick reference table of the types of all the parser combinators.
//!
//! ```text
//! COMBINATOR               OUTPUT-TYPE    NOTES
//!
//! ~~ tokens ~~
//! token(name, f)           R              f: Fn(&T) -> Option<R>
//! satisfy(name, f)         T              f: Fn(&T) -> bool
//! exact(t)                 T
//! any()                    T
//! eof()                    ()
//! empty()                  ()
//! succeed(V)               V
//!
//! ~~ mapping ~~
//! P.lift(V)                V
//! P.map(f)                 f(P)
//! P.try_map(f)             f(P)?
//! P.extract(f)             f(P)?          f returns None: no match
//! P.named(name)            P
//! P.default(V)             P              P: Parser<T, Option<R>>
//!
//! ~~ combination ~~
//! seq(name, (P1, .., Pn))  (P1, .., Pn)   n = 1..8
//! P.and(Q)                 (P, Q)
//! P.preceded(Q)            P
//! P.terminated(Q)          P
//! P.first() .. P.fifth()   P.0 .. P.4
//! choice(name, [P, ..])    P
//! either(name, P, Q)       Either<P, Q>
//!
//! ~~ repetition ~~
//! P.opt()                  Option<P>
//! P.many(min, max)         Vec<P>
//! P.many0() / many1()      Vec<P>
//! P.fold(min, max, V, f)   V              f: Fn(V, P) -> V
//! P.many_sep0(Q)           Vec<P>
//! P.many_sep1(Q)           Vec<P>
//! intersperse(name, P, Q, min, max)
//!                          Vec<P>         Q: Parser<T, P>, results kept
//!
//! ~~ recursion ~~
//! see struct Recursive
//! ```

mod node;
mod parse_error;
mod parser_recur;
mod parser_state;
mod rule_key;

use node::{
    downcast, CombineFn, ExtractFn, Items, MapFn, Node, Repeat, StepFn, TokenFn, Value, Variant,
    WrapFn,
};
use std::error::Error;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/*========================================*/
/*          Interface                     */
/*========================================*/

pub use parse_error::ParseError;
pub use parser_recur::Recursive;

/// A parser over tokens of type `T` that outputs type `R` on a successful parse.
///
/// Cloning a parser is cheap and keeps its identity: the clone and the original
/// share memoized results within a run.
pub struct Parser<T, R> {
    node: Rc<Node<T>>,
    phantom: PhantomData<fn() -> R>,
}

impl<T, R> Clone for Parser<T, R> {
    fn clone(&self) -> Self {
        Parser {
            node: self.node.clone(),
            phantom: PhantomData,
        }
    }
}

impl<T, R> fmt::Debug for Parser<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Parser for '{}'", self.node.description())
    }
}

/// One successful parse of a prefix of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed<R> {
    /// The parser's output.
    pub value: R,
    /// The index of the first token that was _not_ consumed.
    pub position: usize,
}

/// A value that is one of two types. Produced by [`either`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

/// Options for running a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub(crate) memoize: bool,
}

impl Default for ParseOptions {
    fn default() -> ParseOptions {
        ParseOptions { memoize: true }
    }
}

impl ParseOptions {
    pub fn new() -> ParseOptions {
        ParseOptions::default()
    }

    /// Whether to remember the results of every parser at every position, and
    /// replay them instead of re-parsing. On by default. Turning it off never
    /// changes the results, only how long it takes to find them.
    pub fn memoize(mut self, memoize: bool) -> ParseOptions {
        self.memoize = memoize;
        self
    }
}

impl<T, R> Parser<T, R> {
    pub(crate) fn from_node(node: Rc<Node<T>>) -> Parser<T, R> {
        Parser {
            node,
            phantom: PhantomData,
        }
    }

    /// A descriptive name for this parser. Used in error messages.
    pub fn description(&self) -> &str {
        self.node.description()
    }
}

impl<T: 'static, R: Clone + 'static> Parser<T, R> {
    // ========== Running ========== //

    /// Parse the entire input, returning every way of doing so.
    ///
    /// There is more than one result only if the grammar is ambiguous.
    pub fn parse(&self, tokens: &[T]) -> Result<Vec<R>, ParseError> {
        self.parse_with(tokens, &ParseOptions::default())
    }

    /// Like [`Parser::parse`], with options.
    pub fn parse_with(&self, tokens: &[T], options: &ParseOptions) -> Result<Vec<R>, ParseError> {
        let whole = self.clone().terminated(eof()).named(self.description());
        let parses = whole.parse_prefixes_with(tokens, options)?;
        Ok(parses.into_iter().map(|parsed| parsed.value).collect())
    }

    /// Parse any prefix of the input, returning every successful parse together
    /// with the position where it stopped. Results are in the order they were
    /// found: alternatives of a [`choice`] in the order given.
    pub fn parse_prefixes(&self, tokens: &[T]) -> Result<Vec<Parsed<R>>, ParseError> {
        self.parse_prefixes_with(tokens, &ParseOptions::default())
    }

    /// Like [`Parser::parse_prefixes`], with options.
    pub fn parse_prefixes_with(
        &self,
        tokens: &[T],
        options: &ParseOptions,
    ) -> Result<Vec<Parsed<R>>, ParseError> {
        parser_state::run(&self.node, tokens, options)?
            .into_iter()
            .map(|(value, position)| match downcast::<R>(&value) {
                Ok(value) => Ok(Parsed { value, position }),
                Err(message) => Err(ParseError::Semantic {
                    rule: self.description().to_owned(),
                    position,
                    message,
                }),
            })
            .collect()
    }

    // ========== Mapping ========== //

    /// Give this parser a new name, making it a distinct rule.
    pub fn named(self, description: &str) -> Parser<T, R> {
        identity(description, self)
    }

    /// Ignore this parser's output, replacing it with `value`.
    pub fn lift<R2: Clone + 'static>(self, value: R2) -> Parser<T, R2> {
        let description = self.description().to_owned();
        lift(&description, self, value)
    }

    /// Transform this parser's output value with `func`.
    pub fn map<R2: Clone + 'static>(self, func: impl Fn(R) -> R2 + 'static) -> Parser<T, R2> {
        let description = self.description().to_owned();
        map_node(&description, self, move |result| Ok(func(result)))
    }

    /// Transform this parser's output value with `func`, aborting the parse
    /// with a [`ParseError::Semantic`] if `func` returns an `Err`.
    pub fn try_map<R2: Clone + 'static, E: Error>(
        self,
        func: impl Fn(R) -> Result<R2, E> + 'static,
    ) -> Parser<T, R2> {
        let description = self.description().to_owned();
        map(&description, self, func)
    }

    /// Transform this parser's output value with `func`. If `func` returns
    /// `None`, this parser doesn't match.
    pub fn extract<R2: Clone + 'static>(
        self,
        func: impl Fn(R) -> Option<R2> + 'static,
    ) -> Parser<T, R2> {
        let description = self.description().to_owned();
        extract(&description, self, func)
    }

    // ========== Repetition ========== //

    /// Either parse `self`, or parse nothing.
    ///
    /// Produces `None` only if `self` doesn't match at all.
    pub fn opt(self) -> Parser<T, Option<R>> {
        let description = format!("{}.opt()", self.description());
        opt(&description, self)
    }

    /// Parse `self` between `min` and `max` times (inclusive). A `max` of `None`
    /// is unbounded.
    pub fn many(self, min: usize, max: Option<usize>) -> Parser<T, Vec<R>> {
        let description = match max {
            Some(max) => format!("{}.many({}, {})", self.description(), min, max),
            None => format!("{}.many({}, ..)", self.description(), min),
        };
        many(&description, self, min, max)
    }

    /// Parse `self` zero or more times.
    pub fn many0(self) -> Parser<T, Vec<R>> {
        let description = format!("{}.many0()", self.description());
        many(&description, self, 0, None)
    }

    /// Parse `self` one or more times.
    pub fn many1(self) -> Parser<T, Vec<R>> {
        let description = format!("{}.many1()", self.description());
        many(&description, self, 1, None)
    }

    /// Parse `self` between `min` and `max` times.
    /// Combine the outputs, starting with `initial_value`, using `func`.
    pub fn fold<V: Clone + 'static>(
        self,
        min: usize,
        max: Option<usize>,
        initial_value: V,
        func: impl Fn(V, R) -> V + 'static,
    ) -> Parser<T, V> {
        let description = format!("{}.fold()", self.description());
        fold_node(&description, self, min, max, initial_value, move |acc, result| {
            Ok(func(acc, result))
        })
    }

    /// Like [`Parser::fold`], but aborts the parse with a
    /// [`ParseError::Semantic`] if `func` returns an `Err`.
    pub fn try_fold<V: Clone + 'static, E: Error>(
        self,
        min: usize,
        max: Option<usize>,
        initial_value: V,
        func: impl Fn(V, R) -> Result<V, E> + 'static,
    ) -> Parser<T, V> {
        let description = format!("{}.fold()", self.description());
        fold(&description, self, func, min, max, initial_value)
    }

    /// Parse `self` zero or more times, separated by `sep`s.
    ///
    /// Collects the `self` outputs into a vector, and ignores the `sep` outputs.
    pub fn many_sep0<R2: Clone + 'static>(self, sep: Parser<T, R2>) -> Parser<T, Vec<R>> {
        let description = format!("{}.many_sep0({})", self.description(), sep.description());
        separator(&description, self, sep, 0, None)
    }

    /// Parse `self` one or more times, separated by `sep`s.
    ///
    /// Collects the `self` outputs into a vector, and ignores the `sep` outputs.
    pub fn many_sep1<R2: Clone + 'static>(self, sep: Parser<T, R2>) -> Parser<T, Vec<R>> {
        let description = format!("{}.many_sep1({})", self.description(), sep.description());
        separator1(&description, self, sep)
    }

    // ========== Sequencing ========== //

    /// Parse `self` followed by `next`, producing a tuple of their outputs.
    pub fn and<R2: Clone + 'static>(self, next: Parser<T, R2>) -> Parser<T, (R, R2)> {
        let description = format!("{}.and({})", self.description(), next.description());
        seq(&description, (self, next))
    }

    /// Parse `prev` followed by `self`, keeping only the output of `self`.
    pub fn preceded<R2: Clone + 'static>(self, prev: Parser<T, R2>) -> Parser<T, R> {
        let description = format!("{}.preceded({})", self.description(), prev.description());
        seq(&description, (prev, self)).second()
    }

    /// Parse `self` followed by `next`, keeping only the output of `self`.
    pub fn terminated<R2: Clone + 'static>(self, next: Parser<T, R2>) -> Parser<T, R> {
        let description = format!("{}.terminated({})", self.description(), next.description());
        seq(&description, (self, next)).first()
    }

    // ========== Projection ========== //

    /// Keep the first component of this parser's tuple output.
    pub fn first(self) -> Parser<T, <R as Nth<0>>::Output>
    where
        R: Nth<0>,
        <R as Nth<0>>::Output: Clone + 'static,
    {
        self.map(<R as Nth<0>>::nth)
    }

    /// Keep the second component of this parser's tuple output.
    pub fn second(self) -> Parser<T, <R as Nth<1>>::Output>
    where
        R: Nth<1>,
        <R as Nth<1>>::Output: Clone + 'static,
    {
        self.map(<R as Nth<1>>::nth)
    }

    /// Keep the third component of this parser's tuple output.
    pub fn third(self) -> Parser<T, <R as Nth<2>>::Output>
    where
        R: Nth<2>,
        <R as Nth<2>>::Output: Clone + 'static,
    {
        self.map(<R as Nth<2>>::nth)
    }

    /// Keep the fourth component of this parser's tuple output.
    pub fn fourth(self) -> Parser<T, <R as Nth<3>>::Output>
    where
        R: Nth<3>,
        <R as Nth<3>>::Output: Clone + 'static,
    {
        self.map(<R as Nth<3>>::nth)
    }

    /// Keep the fifth component of this parser's tuple output.
    pub fn fifth(self) -> Parser<T, <R as Nth<4>>::Output>
    where
        R: Nth<4>,
        <R as Nth<4>>::Output: Clone + 'static,
    {
        self.map(<R as Nth<4>>::nth)
    }
}

impl<T: 'static, R: Clone + 'static> Parser<T, Option<R>> {
    /// Unwrap this parser's output, using `value` in place of `None`.
    pub fn default(self, value: R) -> Parser<T, R> {
        let description = self.description().to_owned();
        default(&description, self, value)
    }
}

/*========================================*/
/*          Parser: Tokens                */
/*========================================*/

/// Consume a single token if `func` maps it to `Some(result)`.
///
/// - `description` names the token in error messages, as in "expected
///   `description`".
pub fn token<T: 'static, R: Clone + 'static>(
    description: &str,
    func: impl Fn(&T) -> Option<R> + 'static,
) -> Parser<T, R> {
    let func: TokenFn<T> = Rc::new(move |token: &T| func(token).map(|r| Rc::new(r) as Value));
    Parser::from_node(Node::new(description, Variant::Token(func)))
}

/// Consume a single token for which `pred` is true, outputting that token.
pub fn satisfy<T: Clone + 'static>(
    description: &str,
    pred: impl Fn(&T) -> bool + 'static,
) -> Parser<T, T> {
    token(description, move |tok: &T| {
        if pred(tok) {
            Some(tok.clone())
        } else {
            None
        }
    })
}

/// Consume a single token equal to `expected`, outputting it. Its `Debug`
/// representation is used as the description.
pub fn exact<T: PartialEq + Clone + fmt::Debug + 'static>(expected: T) -> Parser<T, T> {
    let description = format!("{:?}", expected);
    satisfy(&description, move |tok: &T| *tok == expected)
}

/// Consume any single token, outputting it.
pub fn any<T: Clone + 'static>() -> Parser<T, T> {
    satisfy("any token", |_| true)
}

/// Match only at the end of the input. Consumes nothing.
pub fn eof<T: 'static>() -> Parser<T, ()> {
    Parser::from_node(Node::new("end of input", Variant::Eof))
}

/// The most boring parser, which parses nothing and outputs `()`.
pub fn empty<T: 'static>() -> Parser<T, ()> {
    succeed(())
}

/// Parse nothing and output `value`.
pub fn succeed<T: 'static, R: Clone + 'static>(value: R) -> Parser<T, R> {
    Parser::from_node(Node::new("empty", Variant::Succeed(Rc::new(value))))
}

/*========================================*/
/*          Parser: Mapping               */
/*========================================*/

/// Rename `parser` as a distinct rule, with the same output.
pub fn identity<T: 'static, R: Clone + 'static>(
    description: &str,
    parser: Parser<T, R>,
) -> Parser<T, R> {
    Parser::from_node(Node::new(description, Variant::Identity(parser.node)))
}

/// Parse `parser`, but discard its output and produce `value`.
pub fn lift<T: 'static, R: Clone + 'static, R2: Clone + 'static>(
    description: &str,
    parser: Parser<T, R>,
    value: R2,
) -> Parser<T, R2> {
    Parser::from_node(Node::new(
        description,
        Variant::Lift(parser.node, Rc::new(value)),
    ))
}

/// Parse `parser`, producing the contents of its `Some` output or `value` if it
/// output `None`.
pub fn default<T: 'static, R: Clone + 'static>(
    description: &str,
    parser: Parser<T, Option<R>>,
    value: R,
) -> Parser<T, R> {
    let func: MapFn = Rc::new(move |result: &Value| -> Result<Value, String> {
        let unwrapped = downcast::<Option<R>>(result)?.unwrap_or_else(|| value.clone());
        Ok(Rc::new(unwrapped) as Value)
    });
    Parser::from_node(Node::new(description, Variant::Default(parser.node, func)))
}

/// Transform the output of `parser` with `func`. An `Err` from `func` aborts
/// the parse with a [`ParseError::Semantic`].
pub fn map<T: 'static, R: Clone + 'static, R2: Clone + 'static, E: Error>(
    description: &str,
    parser: Parser<T, R>,
    func: impl Fn(R) -> Result<R2, E> + 'static,
) -> Parser<T, R2> {
    map_node(description, parser, move |result| {
        func(result).map_err(|err| err.to_string())
    })
}

fn map_node<T: 'static, R: Clone + 'static, R2: Clone + 'static>(
    description: &str,
    parser: Parser<T, R>,
    func: impl Fn(R) -> Result<R2, String> + 'static,
) -> Parser<T, R2> {
    let func: MapFn = Rc::new(move |result: &Value| -> Result<Value, String> {
        let mapped = func(downcast::<R>(result)?)?;
        Ok(Rc::new(mapped) as Value)
    });
    Parser::from_node(Node::new(description, Variant::Map(parser.node, func)))
}

/// Transform the output of `parser` with `func`. If `func` returns `None`,
/// this parser does not match.
pub fn extract<T: 'static, R: Clone + 'static, R2: Clone + 'static>(
    description: &str,
    parser: Parser<T, R>,
    func: impl Fn(R) -> Option<R2> + 'static,
) -> Parser<T, R2> {
    let func: ExtractFn = Rc::new(move |result: &Value| -> Result<Option<Value>, String> {
        let extracted = func(downcast::<R>(result)?);
        Ok(extracted.map(|r| Rc::new(r) as Value))
    });
    Parser::from_node(Node::new(description, Variant::Extract(parser.node, func)))
}

/*========================================*/
/*          Parser: Optional              */
/*========================================*/

/// Parse `parser` if possible, producing `Some` of each of its outputs.
/// If it doesn't match, produce `None` without consuming anything.
pub fn opt<T: 'static, R: Clone + 'static>(
    description: &str,
    parser: Parser<T, R>,
) -> Parser<T, Option<R>> {
    let wrap: WrapFn = Rc::new(|result: Option<&Value>| -> Result<Value, String> {
        let wrapped = match result {
            Some(result) => Some(downcast::<R>(result)?),
            None => None,
        };
        Ok(Rc::new(wrapped) as Value)
    });
    Parser::from_node(Node::new(description, Variant::Optional(parser.node, wrap)))
}

/*========================================*/
/*          Parser: Repetition            */
/*========================================*/

fn repeat_node<T: 'static, R: Clone + 'static, V: Clone + 'static>(
    description: &str,
    item: Parser<T, R>,
    delimiter: Option<Rc<Node<T>>>,
    keep_delimiters: bool,
    min: usize,
    max: Option<usize>,
    finish: impl Fn(Vec<R>) -> Result<V, String> + 'static,
) -> Parser<T, V> {
    let step: StepFn = Rc::new(|items: &Value, item: &Value| -> Result<Value, String> {
        Ok(Rc::new(downcast::<Items>(items)?.push(item.clone())) as Value)
    });
    let finish: MapFn = Rc::new(move |items: &Value| -> Result<Value, String> {
        let items = downcast::<Items>(items)?
            .to_vec()
            .iter()
            .map(downcast::<R>)
            .collect::<Result<Vec<R>, String>>()?;
        Ok(Rc::new(finish(items)?) as Value)
    });
    let repeat = Repeat {
        item: item.node,
        delimiter,
        keep_delimiters,
        min,
        max,
        init: Rc::new(Items::default()),
        step,
        finish,
    };
    Parser::from_node(Node::new(description, Variant::Repeat(Rc::new(repeat))))
}

/// Greedily parse `parser` between `min` and `max` times (`None` is unbounded),
/// collecting the outputs.
///
/// A branch stops repeating when `parser` fails to match again, when `max` is
/// reached, or when a repetition consumed no input. It fails if by then it has
/// fewer than `min` outputs.
pub fn many<T: 'static, R: Clone + 'static>(
    description: &str,
    parser: Parser<T, R>,
    min: usize,
    max: Option<usize>,
) -> Parser<T, Vec<R>> {
    repeat_node(description, parser, None, false, min, max, Ok)
}

/// Repeat `parser` exactly like [`many`], but combine the outputs left to right
/// with `func`, starting from `initial_value`, instead of collecting them. Each
/// output is folded in as soon as it is parsed; an `Err` from `func` aborts
/// the parse with a [`ParseError::Semantic`].
pub fn fold<T: 'static, R: Clone + 'static, V: Clone + 'static, E: Error>(
    description: &str,
    parser: Parser<T, R>,
    func: impl Fn(V, R) -> Result<V, E> + 'static,
    min: usize,
    max: Option<usize>,
    initial_value: V,
) -> Parser<T, V> {
    fold_node(description, parser, min, max, initial_value, move |acc, result| {
        func(acc, result).map_err(|err| err.to_string())
    })
}

fn fold_node<T: 'static, R: Clone + 'static, V: Clone + 'static>(
    description: &str,
    parser: Parser<T, R>,
    min: usize,
    max: Option<usize>,
    initial_value: V,
    func: impl Fn(V, R) -> Result<V, String> + 'static,
) -> Parser<T, V> {
    let step: StepFn = Rc::new(move |acc: &Value, item: &Value| -> Result<Value, String> {
        let acc = func(downcast::<V>(acc)?, downcast::<R>(item)?)?;
        Ok(Rc::new(acc) as Value)
    });
    let repeat = Repeat {
        item: parser.node,
        delimiter: None,
        keep_delimiters: false,
        min,
        max,
        init: Rc::new(initial_value),
        step,
        finish: Rc::new(|acc: &Value| -> Result<Value, String> { Ok(acc.clone()) }),
    };
    Parser::from_node(Node::new(description, Variant::Repeat(Rc::new(repeat))))
}

/// Parse between `min` and `max` `value`s, separated by `delimiter`s, ignoring
/// the delimiters' outputs.
///
/// A trailing delimiter that isn't followed by a value is left unconsumed (if
/// `min` values were found) for an enclosing parser.
pub fn separator<T: 'static, R: Clone + 'static, R2: Clone + 'static>(
    description: &str,
    value: Parser<T, R>,
    delimiter: Parser<T, R2>,
    min: usize,
    max: Option<usize>,
) -> Parser<T, Vec<R>> {
    repeat_node(
        description,
        value,
        Some(delimiter.node),
        false,
        min,
        max,
        Ok,
    )
}

/// Parse one or more `value`s, separated by `delimiter`s.
pub fn separator1<T: 'static, R: Clone + 'static, R2: Clone + 'static>(
    description: &str,
    value: Parser<T, R>,
    delimiter: Parser<T, R2>,
) -> Parser<T, Vec<R>> {
    separator(description, value, delimiter, 1, None)
}

/// Parse between `min` and `max` `value`s, separated by `delimiter`s, keeping
/// the delimiters' outputs in the list: `[v, d, v, d, v]`.
///
/// `min` and `max` count values, not delimiters.
pub fn intersperse<T: 'static, R: Clone + 'static>(
    description: &str,
    value: Parser<T, R>,
    delimiter: Parser<T, R>,
    min: usize,
    max: Option<usize>,
) -> Parser<T, Vec<R>> {
    repeat_node(description, value, Some(delimiter.node), true, min, max, Ok)
}

/// Parse one or more `value`s interspersed with `delimiter`s, keeping both.
pub fn intersperse1<T: 'static, R: Clone + 'static>(
    description: &str,
    value: Parser<T, R>,
    delimiter: Parser<T, R>,
) -> Parser<T, Vec<R>> {
    intersperse(description, value, delimiter, 1, None)
}

/*========================================*/
/*          Parser: Seq                   */
/*========================================*/

/// Parse a sequence of things in order, collecting their outputs in a tuple.
///
/// - `description` is used in error messages to refer to this parser.
/// - `tuple` is a tuple of 1 to 8 parsers, which may have different output types.
pub fn seq<T, R>(description: &str, tuple: impl SeqTuple<T, R>) -> Parser<T, R> {
    tuple.make_seq(description)
}

/// A tuple of parsers for [`seq()`] to run in order. Each tuple element must be
/// a parser. They may have different output types. Can have length up to 8.
pub trait SeqTuple<T, R> {
    #[doc(hidden)]
    fn make_seq(self, description: &str) -> Parser<T, R>;
}

macro_rules! define_seq {
    ($( ($idx:tt, $type:ident) ),*) => {
        impl<T: 'static, $( $type: Clone + 'static ),*> SeqTuple<T, ($( $type, )*)>
        for ($( Parser<T, $type>, )*)
        {
            fn make_seq(self, description: &str) -> Parser<T, ($( $type, )*)> {
                let subs: Vec<Rc<Node<T>>> = vec![$( self.$idx.node ),*];
                let combine: CombineFn = Rc::new(|values: &[Value]| -> Result<Value, String> {
                    let results = ($( downcast::<$type>(&values[$idx])?, )*);
                    Ok(Rc::new(results) as Value)
                });
                Parser::from_node(Node::new(description, Variant::Sequence(subs.into(), combine)))
            }
        }
    }
}

define_seq!((0, A));
define_seq!((0, A), (1, B));
define_seq!((0, A), (1, B), (2, C));
define_seq!((0, A), (1, B), (2, C), (3, D));
define_seq!((0, A), (1, B), (2, C), (3, D), (4, E));
define_seq!((0, A), (1, B), (2, C), (3, D), (4, E), (5, F));
define_seq!((0, A), (1, B), (2, C), (3, D), (4, E), (5, F), (6, G));
define_seq!(
    (0, A),
    (1, B),
    (2, C),
    (3, D),
    (4, E),
    (5, F),
    (6, G),
    (7, H)
);

/// Access to the `N`th component of a tuple. Used by [`Parser::first`] and friends.
pub trait Nth<const N: usize> {
    type Output;
    fn nth(self) -> Self::Output;
}

macro_rules! define_nth {
    (@one ($( $type:ident ),*); $n:tt => $out:ident) => {
        impl<$( $type ),*> Nth<$n> for ($( $type, )*) {
            type Output = $out;
            fn nth(self) -> $out {
                self.$n
            }
        }
    };
    ($tuple:tt; $( $n:tt => $out:ident ),*) => {
        $( define_nth!(@one $tuple; $n => $out); )*
    };
}

define_nth!((A); 0 => A);
define_nth!((A, B); 0 => A, 1 => B);
define_nth!((A, B, C); 0 => A, 1 => B, 2 => C);
define_nth!((A, B, C, D); 0 => A, 1 => B, 2 => C, 3 => D);
define_nth!((A, B, C, D, E); 0 => A, 1 => B, 2 => C, 3 => D, 4 => E);
define_nth!((A, B, C, D, E, F); 0 => A, 1 => B, 2 => C, 3 => D, 4 => E);
define_nth!((A, B, C, D, E, F, G); 0 => A, 1 => B, 2 => C, 3 => D, 4 => E);
define_nth!((A, B, C, D, E, F, G, H); 0 => A, 1 => B, 2 => C, 3 => D, 4 => E);

/*========================================*/
/*          Parser: Choice                */
/*========================================*/

/// Parse every one of the `alternatives` that matches.
///
/// Alternatives are tried in order, and _all_ of their successes are reported:
/// if two alternatives match, the parse continues twice.
///
/// - `description` is used in error messages to refer to this `choice`.
pub fn choice<T: 'static, R: Clone + 'static>(
    description: &str,
    alternatives: impl IntoIterator<Item = Parser<T, R>>,
) -> Parser<T, R> {
    let subs: Vec<Rc<Node<T>>> = alternatives.into_iter().map(|p| p.node).collect();
    Parser::from_node(Node::new(description, Variant::Choice(subs.into())))
}

/// Parse either `left` or `right` (or both, if both match), tagging each output
/// with the side that produced it.
pub fn either<T: 'static, L: Clone + 'static, R: Clone + 'static>(
    description: &str,
    left: Parser<T, L>,
    right: Parser<T, R>,
) -> Parser<T, Either<L, R>> {
    choice(
        description,
        [left.map(Either::Left), right.map(Either::Right)],
    )
}

#[test]
fn test_identity_and_clones() {
    let digit = satisfy("digit", |c: &char| c.is_ascii_digit());
    assert_eq!(digit.description(), "digit");
    assert_eq!(digit.node.key, digit.clone().node.key);

    let number = digit.clone().many1();
    assert_eq!(number.node.key, number.clone().node.key);
    assert_ne!(number.node.key, digit.clone().many0().node.key);
    assert_ne!(number.node.key, number.clone().named("number").node.key);

    // Built twice from the same parts, with no callbacks of their own.
    let letter = satisfy("letter", |c: &char| c.is_ascii_alphabetic());
    let build = || choice("alnum", [digit.clone(), letter.clone()]);
    assert_eq!(build().node.key, build().node.key);
    assert_eq!(
        identity("digit", digit.clone()).node.key,
        identity("digit", digit.clone()).node.key
    );
    assert_ne!(build().node.key, choice("alnum", [letter.clone(), digit.clone()]).node.key);

    // Each call to `opt` makes a fresh wrapper, so a distinct rule.
    assert_ne!(
        opt("digit?", digit.clone()).node.key,
        opt("digit?", digit.clone()).node.key
    );

    // A fresh leaf is a fresh callback, so a different rule.
    let other_digit = satisfy("digit", |c: &char| c.is_ascii_digit());
    assert_ne!(digit.node.key, other_digit.node.key);
}

#[test]
fn test_descriptions() {
    let a = exact('a');
    let b = exact('b');
    assert_eq!(a.description(), "'a'");
    assert_eq!(a.clone().opt().description(), "'a'.opt()");
    assert_eq!(a.clone().many(1, Some(3)).description(), "'a'.many(1, 3)");
    assert_eq!(a.clone().many(2, None).description(), "'a'.many(2, ..)");
    assert_eq!(
        a.clone().many_sep0(b.clone()).description(),
        "'a'.many_sep0('b')"
    );
    assert_eq!(a.clone().and(b).description(), "'a'.and('b')");
    assert_eq!(a.clone().map(|c| c as u32).description(), "'a'");
    assert_eq!(eof::<char>().description(), "end of input");
    assert_eq!(format!("{:?}", a.named("letter a")), "Parser for 'letter a'");
}
