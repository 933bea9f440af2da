//! The continuation-driven runtime.
//!
//! Parsers never return results. Running a node means asking the
//! [`Scheduler`] to dispatch its sub-parsers with a [`ParserHandler`], and
//! every success is delivered forward to that handler, once per successful
//! branch. Nothing here recurses on the native stack: dispatches, deliveries
//! and completion markers are all items on one LIFO work list, which makes the
//! search depth-first and keeps the stack depth independent of the input.
//!
//! Failure is the absence of success. Combinators that must react to "this
//! did not match" push a completion marker (`Work::Settle`) _before_
//! starting the sub-parse; by the time the marker is popped, all work spawned
//! above it has run, so a flag that was never set means no success happened.
//!
//! What an application produces depends on which rules are already active at
//! its position, since those are refused beneath it. Memo entries are
//! therefore keyed by that set as well as by rule and position.

use crate::node::{CombineFn, Node, Repeat, Value, Variant};
use crate::parse_error::{Furthest, ParseError};
use crate::rule_key::RuleKey;
use crate::ParseOptions;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

/*========================================*/
/*          Parser State                  */
/*========================================*/

/// A cursor into the token sequence, together with the rule applications
/// currently being evaluated at that position.
///
/// Immutable: every branch of the search holds its own `ParserState`.
#[derive(Clone)]
pub struct ParserState {
    position: usize,
    active: Option<Rc<Active>>,
}

/// One link of the active chain. All links of a chain share a position.
struct Active {
    key: RuleKey,
    position: usize,
    parent: Option<Rc<Active>>,
}

impl ParserState {
    pub fn start() -> ParserState {
        ParserState {
            position: 0,
            active: None,
        }
    }

    /// The index of the next unconsumed token.
    pub fn position(&self) -> usize {
        self.position
    }

    fn advance(&self, count: usize) -> ParserState {
        self.resume_at(self.position + count)
    }

    /// This state's active chain, at another position.
    fn resume_at(&self, position: usize) -> ParserState {
        ParserState {
            position,
            active: self.active.clone(),
        }
    }

    /// Whether `key` is already being evaluated at this position.
    fn is_active(&self, key: &RuleKey) -> bool {
        let mut link = self.active.as_deref();
        while let Some(active) = link {
            if active.position != self.position {
                return false;
            }
            if &active.key == key {
                return true;
            }
            link = active.parent.as_deref();
        }
        false
    }

    /// The keys of the applications active at this position, innermost first.
    fn active_keys(&self) -> Vec<RuleKey> {
        let mut keys = Vec::new();
        let mut link = self.active.as_deref();
        while let Some(active) = link {
            if active.position != self.position {
                break;
            }
            keys.push(active.key.clone());
            link = active.parent.as_deref();
        }
        keys
    }

    fn enter(&self, key: RuleKey) -> ParserState {
        // Links at earlier positions can never match again; drop them.
        let parent = self
            .active
            .clone()
            .filter(|active| active.position == self.position);
        ParserState {
            position: self.position,
            active: Some(Rc::new(Active {
                key,
                position: self.position,
                parent,
            })),
        }
    }
}

/*========================================*/
/*          Handlers & Closures           */
/*========================================*/

/// A success continuation: invoked with `(result, next state)` once per
/// successful branch of the sub-parse it was registered for.
pub struct ParserHandler<T>(Rc<dyn Fn(&mut Scheduler<T>, Value, ParserState)>);

impl<T> Clone for ParserHandler<T> {
    fn clone(&self) -> Self {
        ParserHandler(self.0.clone())
    }
}

impl<T> ParserHandler<T> {
    pub fn new(func: impl Fn(&mut Scheduler<T>, Value, ParserState) + 'static) -> ParserHandler<T> {
        ParserHandler(Rc::new(func))
    }
}

/// The frame of one application of a parser at one position.
///
/// It owns the caller's handler, remembers the caller's state (so that the
/// caller's active chain is restored on success), and records results into
/// the application's memo entry.
pub struct ParserClosure<T: 'static> {
    node: Rc<Node<T>>,
    caller: ParserState,
    handler: ParserHandler<T>,
    entry: Option<Rc<MemoEntry>>,
}

impl<T: 'static> ParserClosure<T> {
    /// Report that the application succeeded with `value`, leaving the input at
    /// `state`. May be called any number of times.
    pub fn success(&self, scheduler: &mut Scheduler<T>, value: Value, state: &ParserState) {
        if let Some(entry) = &self.entry {
            entry
                .results
                .borrow_mut()
                .push((value.clone(), state.position));
        }
        scheduler.work.push(Work::Deliver {
            handler: self.handler.clone(),
            value,
            state: self.caller.resume_at(state.position),
        });
    }

    /// Abort the whole parse with a semantic failure raised by this application.
    pub fn fail(&self, scheduler: &mut Scheduler<T>, message: String) {
        scheduler.abort(ParseError::Semantic {
            rule: self.node.description().to_owned(),
            position: self.caller.position,
            message,
        });
    }

    fn succeed_with(
        &self,
        scheduler: &mut Scheduler<T>,
        result: Result<Value, String>,
        state: &ParserState,
    ) {
        match result {
            Ok(value) => self.success(scheduler, value, state),
            Err(message) => self.fail(scheduler, message),
        }
    }
}

// The caller's handler owns the caller's frame, which owns its caller's
// handler, and so on once per nesting level.
impl<T: 'static> Drop for ParserClosure<T> {
    fn drop(&mut self) {
        if Rc::strong_count(&self.handler.0) == 1 {
            let handler = mem::replace(&mut self.handler, ParserHandler::new(|_, _, _| ()));
            release(Box::new(handler));
        }
    }
}

thread_local! {
    static RELEASED: RefCell<Vec<Box<dyn Any>>> = RefCell::new(Vec::new());
    static RELEASING: Cell<bool> = Cell::new(false);
}

/// Free `garbage` on a flat loop. Anything released while it is being freed is
/// queued and freed by the same loop.
fn release(garbage: Box<dyn Any>) {
    RELEASED.with(|queue| queue.borrow_mut().push(garbage));
    if RELEASING.with(|releasing| releasing.replace(true)) {
        return;
    }
    while let Some(next) = RELEASED.with(|queue| queue.borrow_mut().pop()) {
        drop(next);
    }
    RELEASING.with(|releasing| releasing.set(false));
}

/// A handler that passes every success straight on to `closure`.
fn forward<T: 'static>(closure: &Rc<ParserClosure<T>>) -> ParserHandler<T> {
    let closure = closure.clone();
    ParserHandler::new(move |scheduler, value, next| closure.success(scheduler, value, &next))
}

/*========================================*/
/*          Scheduler                     */
/*========================================*/

/// Rule, position, and the rules active at that position.
type MemoKey = (RuleKey, usize, Vec<RuleKey>);

#[derive(Default)]
pub struct MemoEntry {
    results: RefCell<Vec<(Value, usize)>>,
    complete: Cell<bool>,
}

enum Work<T> {
    Dispatch {
        node: Rc<Node<T>>,
        state: ParserState,
        handler: ParserHandler<T>,
    },
    Deliver {
        handler: ParserHandler<T>,
        value: Value,
        state: ParserState,
    },
    Settle(Box<dyn FnOnce(&mut Scheduler<T>)>),
}

/// Everything owned by a single run: the work list, the memo table, the
/// furthest failure seen, and the abort slot for semantic failures.
pub struct Scheduler<T> {
    work: Vec<Work<T>>,
    memo: HashMap<MemoKey, Rc<MemoEntry>>,
    memoize: bool,
    furthest: Furthest,
    aborted: Option<ParseError>,
    steps: usize,
}

impl<T: 'static> Scheduler<T> {
    pub fn new(options: &ParseOptions) -> Scheduler<T> {
        Scheduler {
            work: Vec::new(),
            memo: HashMap::new(),
            memoize: options.memoize,
            furthest: Furthest::default(),
            aborted: None,
            steps: 0,
        }
    }

    /// Run `node` at `state`, delivering each of its successes to `handler`.
    pub fn parse(&mut self, node: Rc<Node<T>>, state: ParserState, handler: ParserHandler<T>) {
        self.work.push(Work::Dispatch {
            node,
            state,
            handler,
        });
    }

    fn settle(&mut self, func: impl FnOnce(&mut Scheduler<T>) + 'static) {
        self.work.push(Work::Settle(Box::new(func)));
    }

    fn abort(&mut self, error: ParseError) {
        if self.aborted.is_none() {
            self.aborted = Some(error);
        }
    }

    /// Process work until none is left, or until a semantic failure.
    pub fn drive(&mut self, tokens: &[T]) -> Result<(), ParseError> {
        while let Some(work) = self.work.pop() {
            self.steps += 1;
            match work {
                Work::Dispatch {
                    node,
                    state,
                    handler,
                } => self.dispatch(node, state, handler, tokens),
                Work::Deliver {
                    handler,
                    value,
                    state,
                } => (handler.0)(self, value, state),
                Work::Settle(func) => func(self),
            }
            if let Some(error) = self.aborted.take() {
                log::debug!("parse aborted after {} steps: {:?}", self.steps, error);
                self.work.clear();
                return Err(error);
            }
        }
        Ok(())
    }

    fn dispatch(
        &mut self,
        node: Rc<Node<T>>,
        state: ParserState,
        handler: ParserHandler<T>,
        tokens: &[T],
    ) {
        if state.is_active(&node.key) {
            log::trace!("refusing to re-enter {:?} at {}", node.key, state.position);
            return;
        }

        let mut entry = None;
        if self.memoize {
            let memo_key = (node.key.clone(), state.position, state.active_keys());
            match self.memo.get(&memo_key).cloned() {
                Some(existing) if existing.complete.get() => {
                    let results = existing.results.borrow();
                    if log::log_enabled!(log::Level::Trace) {
                        log::trace!(
                            "replaying {} results of {:?} at {}",
                            results.len(),
                            node.key,
                            state.position
                        );
                    }
                    // Pushed in reverse so that they are delivered in order.
                    for (value, position) in results.iter().rev() {
                        self.work.push(Work::Deliver {
                            handler: handler.clone(),
                            value: value.clone(),
                            state: state.resume_at(*position),
                        });
                    }
                    return;
                }
                Some(_) => {
                    log::trace!(
                        "{:?} at {} is still in progress elsewhere; running it afresh",
                        node.key,
                        state.position
                    );
                }
                None => {
                    let new_entry = Rc::new(MemoEntry::default());
                    self.memo.insert(memo_key, new_entry.clone());
                    let finished = new_entry.clone();
                    self.settle(move |_| finished.complete.set(true));
                    entry = Some(new_entry);
                }
            }
        }

        log::trace!("running {:?} at {}", node.key, state.position);
        let inner = state.enter(node.key.clone());
        let closure = Rc::new(ParserClosure {
            node: node.clone(),
            caller: state,
            handler,
            entry,
        });
        self.execute(&node, closure, inner, tokens);
    }

    fn execute(
        &mut self,
        node: &Rc<Node<T>>,
        closure: Rc<ParserClosure<T>>,
        state: ParserState,
        tokens: &[T],
    ) {
        use Variant::*;

        match &node.variant {
            Token(matcher) => match tokens.get(state.position).and_then(|token| matcher(token)) {
                Some(value) => closure.success(self, value, &state.advance(1)),
                None => self.furthest.record(state.position, node.description()),
            },
            Succeed(value) => closure.success(self, value.clone(), &state),
            Eof => {
                if state.position >= tokens.len() {
                    closure.success(self, Rc::new(()), &state);
                } else {
                    self.furthest.record(state.position, node.description());
                }
            }
            Identity(sub) => self.parse(sub.clone(), state, forward(&closure)),
            Lift(sub, value) => {
                let value = value.clone();
                let handler = ParserHandler::new(move |scheduler, _, next| {
                    closure.success(scheduler, value.clone(), &next)
                });
                self.parse(sub.clone(), state, handler);
            }
            Default(sub, func) | Map(sub, func) => {
                let func = func.clone();
                let handler = ParserHandler::new(move |scheduler, value, next| {
                    closure.succeed_with(scheduler, func(&value), &next)
                });
                self.parse(sub.clone(), state, handler);
            }
            Extract(sub, func) => {
                let func = func.clone();
                let handler = ParserHandler::new(move |scheduler, value, next| match func(&value) {
                    Ok(Some(extracted)) => closure.success(scheduler, extracted, &next),
                    Ok(None) => (),
                    Err(message) => closure.fail(scheduler, message),
                });
                self.parse(sub.clone(), state, handler);
            }
            Optional(sub, wrap) => {
                let matched = Rc::new(Cell::new(false));
                {
                    let matched = matched.clone();
                    let closure = closure.clone();
                    let wrap = wrap.clone();
                    let state = state.clone();
                    self.settle(move |scheduler| {
                        if !matched.get() {
                            closure.succeed_with(scheduler, wrap(None), &state);
                        }
                    });
                }
                let wrap = wrap.clone();
                let handler = ParserHandler::new(move |scheduler, value, next| {
                    matched.set(true);
                    closure.succeed_with(scheduler, wrap(Some(&value)), &next);
                });
                self.parse(sub.clone(), state, handler);
            }
            Sequence(subs, combine) => {
                sequence_step(self, subs.clone(), combine.clone(), closure, Vec::new(), state)
            }
            Variant::Repeat(rep) => {
                repeat_step(self, rep.clone(), closure, rep.init.clone(), 0, state)
            }
            Choice(alternatives) => {
                // Pushed in reverse so that the first alternative runs first.
                for alternative in alternatives.iter().rev() {
                    self.parse(alternative.clone(), state.clone(), forward(&closure));
                }
            }
            Rule(recur) => match recur.resolve() {
                Some(body) => self.parse(body, state, forward(&closure)),
                None => self.abort(ParseError::UndefinedRule {
                    rule: node.description().to_owned(),
                }),
            },
        }
    }
}

/*========================================*/
/*          Sequence                      */
/*========================================*/

fn sequence_step<T: 'static>(
    scheduler: &mut Scheduler<T>,
    subs: Rc<[Rc<Node<T>>]>,
    combine: CombineFn,
    closure: Rc<ParserClosure<T>>,
    values: Vec<Value>,
    state: ParserState,
) {
    let sub = match subs.get(values.len()) {
        Some(sub) => sub.clone(),
        None => return closure.succeed_with(scheduler, combine(&values), &state),
    };
    let handler = ParserHandler::new(move |scheduler, value, next| {
        let mut values = values.clone();
        values.push(value);
        sequence_step(
            scheduler,
            subs.clone(),
            combine.clone(),
            closure.clone(),
            values,
            next,
        );
    });
    scheduler.parse(sub, state, handler);
}

/*========================================*/
/*          Repetition                    */
/*========================================*/

fn repeat_step<T: 'static>(
    scheduler: &mut Scheduler<T>,
    rep: Rc<Repeat<T>>,
    closure: Rc<ParserClosure<T>>,
    acc: Value,
    count: usize,
    state: ParserState,
) {
    if rep.max.map_or(false, |max| count >= max) {
        if count >= rep.min {
            repeat_finish(scheduler, &rep, &closure, &acc, &state);
        }
        return;
    }

    let matched = Rc::new(Cell::new(false));
    {
        let rep = rep.clone();
        let closure = closure.clone();
        let acc = acc.clone();
        let matched = matched.clone();
        let state = state.clone();
        scheduler.settle(move |scheduler| {
            if !matched.get() && count >= rep.min {
                repeat_finish(scheduler, &rep, &closure, &acc, &state);
            }
        });
    }

    let start = state.position;
    let delimiter = if count > 0 { rep.delimiter.clone() } else { None };
    let delimiter = match delimiter {
        Some(delimiter) => delimiter,
        None => {
            let item = rep.item.clone();
            let handler = item_handler(rep, closure, matched, acc, count, start);
            return scheduler.parse(item, state, handler);
        }
    };
    let handler = ParserHandler::new(move |scheduler, value, next| {
        let acc = if rep.keep_delimiters {
            match (rep.step)(&acc, &value) {
                Ok(acc) => acc,
                Err(message) => return closure.fail(scheduler, message),
            }
        } else {
            acc.clone()
        };
        let handler = item_handler(
            rep.clone(),
            closure.clone(),
            matched.clone(),
            acc,
            count,
            start,
        );
        scheduler.parse(rep.item.clone(), next, handler);
    });
    scheduler.parse(delimiter, state, handler);
}

fn item_handler<T: 'static>(
    rep: Rc<Repeat<T>>,
    closure: Rc<ParserClosure<T>>,
    matched: Rc<Cell<bool>>,
    acc: Value,
    count: usize,
    start: usize,
) -> ParserHandler<T> {
    ParserHandler::new(move |scheduler, value, next| {
        matched.set(true);
        let acc = match (rep.step)(&acc, &value) {
            Ok(acc) => acc,
            Err(message) => return closure.fail(scheduler, message),
        };
        let count = count + 1;
        if next.position == start && count >= rep.min {
            // An iteration that consumed nothing would repeat forever.
            repeat_finish(scheduler, &rep, &closure, &acc, &next);
        } else {
            repeat_step(scheduler, rep.clone(), closure.clone(), acc, count, next);
        }
    })
}

fn repeat_finish<T: 'static>(
    scheduler: &mut Scheduler<T>,
    rep: &Repeat<T>,
    closure: &ParserClosure<T>,
    acc: &Value,
    state: &ParserState,
) {
    closure.succeed_with(scheduler, (rep.finish)(acc), state);
}

/*========================================*/
/*          Running                       */
/*========================================*/

/// Run `node` over `tokens`, returning every successful `(result, position)`
/// in the order they were found.
pub(crate) fn run<T: 'static>(
    node: &Rc<Node<T>>,
    tokens: &[T],
    options: &ParseOptions,
) -> Result<Vec<(Value, usize)>, ParseError> {
    let results = Rc::new(RefCell::new(Vec::new()));
    let sink = results.clone();
    let mut scheduler = Scheduler::new(options);
    scheduler.parse(
        node.clone(),
        ParserState::start(),
        ParserHandler::new(move |_, value, state| {
            sink.borrow_mut().push((value, state.position()))
        }),
    );
    scheduler.drive(tokens)?;

    let results = results.take();
    log::debug!(
        "ran {} over {} tokens: {} results, {} steps, {} memo entries",
        node.description(),
        tokens.len(),
        results.len(),
        scheduler.steps,
        scheduler.memo.len()
    );
    if results.is_empty() {
        Err(scheduler.furthest.into_error())
    } else {
        Ok(results)
    }
}

#[test]
fn test_active_chain() {
    let digit = RuleKey::new("token", "digit", vec![]);
    let number = RuleKey::new("repeat", "number", vec![]);

    let state = ParserState::start();
    assert!(!state.is_active(&digit));

    let inside = state.enter(number.clone());
    assert!(inside.is_active(&number));
    assert!(!inside.is_active(&digit));

    let deeper = inside.enter(digit.clone());
    assert!(deeper.is_active(&number));
    assert!(deeper.is_active(&digit));
    assert_eq!(deeper.active_keys(), vec![digit.clone(), number.clone()]);

    // Once input has been consumed, nothing is active at the new position.
    let moved = deeper.advance(1);
    assert_eq!(moved.position(), 1);
    assert!(!moved.is_active(&number));
    assert!(moved.active_keys().is_empty());
    let reentered = moved.enter(number.clone());
    assert!(reentered.is_active(&number));
    assert!(!reentered.is_active(&digit));
}

#[test]
fn test_release_long_chain() {
    // Each handler owns the next one, like the frames of a deeply nested parse.
    let mut handler = ParserHandler::<char>::new(|_, _, _| ());
    for _ in 0..200_000 {
        let closure = Rc::new(ParserClosure {
            node: Node::new("x", Variant::Eof),
            caller: ParserState::start(),
            handler,
            entry: None,
        });
        handler = forward(&closure);
    }
    drop(handler);
}
