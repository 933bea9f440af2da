#[cfg(doc)]
use crate::{Parser, Recursive};
use std::fmt;

/*========================================*/
/*          Furthest Failure              */
/*========================================*/

/// The furthest position at which a token or end-of-input check failed, and
/// what was expected there. Used to build [`ParseError::NoParse`].
#[derive(Debug, Clone, Default)]
pub(crate) struct Furthest {
    position: usize,
    expected: Vec<String>,
}

impl Furthest {
    pub fn record(&mut self, position: usize, description: &str) {
        if position > self.position {
            self.position = position;
            self.expected.clear();
        }
        if position == self.position && !self.expected.iter().any(|e| e == description) {
            self.expected.push(description.to_owned());
        }
    }

    pub fn into_error(self) -> ParseError {
        ParseError::NoParse {
            position: self.position,
            expected: self.expected,
        }
    }
}

/*========================================*/
/*          Parse Error                   */
/*========================================*/

/// An error encountered while parsing.
///
/// There are three kinds of errors:
///
/// - No alternative of the grammar matched the input. This says how far the
///   parse got, and what was expected there.
/// - A user-written error thrown from a method like [`Parser::try_map`] or
///   [`Parser::try_fold`]. This aborts the whole parse, even if other
///   alternatives might have matched.
/// - A [`Recursive`] parser was used without having been defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Every alternative was exhausted without a successful parse.
    NoParse {
        /// The furthest token position at which a token was tried.
        position: usize,
        /// Descriptions of what would have been accepted at `position`.
        expected: Vec<String>,
    },
    /// A transformation rejected its input.
    Semantic {
        /// Description of the parser whose transformation failed.
        rule: String,
        /// Position at which that parser's match began.
        position: usize,
        message: String,
    },
    /// A recursive parser was run before being defined.
    UndefinedRule { rule: String },
}

impl ParseError {
    /// The token position this error refers to, if any.
    pub fn position(&self) -> Option<usize> {
        match self {
            ParseError::NoParse { position, .. } | ParseError::Semantic { position, .. } => {
                Some(*position)
            }
            ParseError::UndefinedRule { .. } => None,
        }
    }
}

fn expected_list(expected: &[String]) -> String {
    match expected {
        [] => "nothing".to_owned(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use colored::Colorize;

        match self {
            ParseError::NoParse { position, expected } => {
                let message = if expected.is_empty() {
                    "no parse found".to_owned()
                } else {
                    format!("expected {}", expected_list(expected))
                };
                write!(
                    f,
                    "{}{} {} {}",
                    "parse error".red().bold(),
                    ":".bold(),
                    message.bold(),
                    format!("at position {}", position).blue().bold(),
                )
            }
            ParseError::Semantic {
                rule,
                position,
                message,
            } => write!(
                f,
                "{}{} {} {}",
                "parse error".red().bold(),
                ":".bold(),
                message.bold(),
                format!("(in {} at position {})", rule, position)
                    .blue()
                    .bold(),
            ),
            ParseError::UndefinedRule { rule } => {
                let message = format!("recursive parser '{}' was never defined", rule);
                write!(
                    f,
                    "{}{} {}",
                    "grammar error".red().bold(),
                    ":".bold(),
                    message.bold()
                )
            }
        }
    }
}

impl std::error::Error for ParseError {}

#[test]
fn test_furthest() {
    let mut furthest = Furthest::default();
    furthest.record(0, "digit");
    furthest.record(2, "digit");
    furthest.record(1, "letter");
    furthest.record(2, "end of input");
    furthest.record(2, "digit");
    assert_eq!(
        furthest.into_error(),
        ParseError::NoParse {
            position: 2,
            expected: vec!["digit".to_owned(), "end of input".to_owned()],
        }
    );
}

#[test]
fn test_error_messages() {
    colored::control::set_override(false);

    let expected = |names: &[&str]| ParseError::NoParse {
        position: 3,
        expected: names.iter().map(|s| s.to_string()).collect(),
    };
    assert_eq!(
        expected(&[]).to_string(),
        "parse error: no parse found at position 3"
    );
    assert_eq!(
        expected(&["digit"]).to_string(),
        "parse error: expected digit at position 3"
    );
    assert_eq!(
        expected(&["digit", "'+'", "end of input"]).to_string(),
        "parse error: expected digit, '+' or end of input at position 3"
    );

    let semantic = ParseError::Semantic {
        rule: "number".to_owned(),
        position: 4,
        message: "number too large to fit in target type".to_owned(),
    };
    assert_eq!(
        semantic.to_string(),
        "parse error: number too large to fit in target type (in number at position 4)"
    );
    assert_eq!(semantic.position(), Some(4));

    let undefined = ParseError::UndefinedRule {
        rule: "expr".to_owned(),
    };
    assert_eq!(
        undefined.to_string(),
        "grammar error: recursive parser 'expr' was never defined"
    );
}
