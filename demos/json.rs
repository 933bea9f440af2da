use parser_cps::{choice, seq, token, Parser, Recursive};
use regex::Regex;
use std::fmt;

// A simple JSON parser. Does not handle string escapes, as those would make this
// example more verbose without elucidating much of anything about parsing.

// cat sample.json | cargo run --release --example json

#[derive(Debug, Clone)]
pub enum Json {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Json>),
    Object(Vec<(String, Json)>),
}

impl Json {
    fn write(&self, f: &mut fmt::Formatter, indent: usize) -> fmt::Result {
        use Json::*;

        match self {
            Null => write!(f, "null"),
            Bool(false) => write!(f, "false"),
            Bool(true) => write!(f, "true"),
            Number(n) => write!(f, "{}", n),
            String(s) => write!(f, "\"{}\"", s),
            Array(elems) => {
                writeln!(f, "[")?;
                for (i, elem) in elems.iter().enumerate() {
                    write!(f, "{:indent$}", "", indent = 4 * (indent + 1))?;
                    elem.write(f, indent + 1)?;
                    if i + 1 != elems.len() {
                        writeln!(f, ",")?;
                    } else {
                        writeln!(f)?;
                    }
                }
                write!(f, "{:indent$}", "", indent = 4 * indent)?;
                write!(f, "]")
            }
            Object(entries) => {
                writeln!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    write!(f, "{:indent$}", "", indent = 4 * (indent + 1))?;
                    write!(f, "\"{}\": ", key)?;
                    value.write(f, indent + 1)?;
                    if i + 1 != entries.len() {
                        writeln!(f, ",")?;
                    } else {
                        writeln!(f)?;
                    }
                }
                write!(f, "{:indent$}", "", indent = 4 * indent)?;
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.write(f, 0)
    }
}

fn tokenize(input: &str) -> Vec<String> {
    let regex = Regex::new(r#""[^"\\]*"|-?[0-9]+(\.[0-9]+)?([eE][-+]?[0-9]+)?|[a-z]+|\S"#).unwrap();
    regex
        .find_iter(input)
        .map(|m| m.as_str().to_owned())
        .collect()
}

fn symbol(text: &'static str) -> Parser<String, ()> {
    token(&format!("'{}'", text), move |tok: &String| {
        if tok == text {
            Some(())
        } else {
            None
        }
    })
}

fn make_json_parser() -> Parser<String, Json> {
    use std::str::FromStr;

    let json_p = Recursive::new("json value");

    // Null
    let null_p = symbol("null").lift(Json::Null);

    // Bools
    let true_p = symbol("true").lift(Json::Bool(true));
    let false_p = symbol("false").lift(Json::Bool(false));
    let bool_p = choice("boolean", [true_p, false_p]);

    // Numbers
    let number_p = token("number", |tok: &String| {
        if tok.starts_with(|ch: char| ch == '-' || ch.is_ascii_digit()) {
            f64::from_str(tok).ok()
        } else {
            None
        }
    })
    .map(Json::Number);

    // Strings. Not implementing Json string escapes for this small example.
    let plain_string_p = token("string", |tok: &String| {
        if tok.len() >= 2 && tok.starts_with('"') {
            Some(tok[1..tok.len() - 1].to_owned())
        } else {
            None
        }
    });
    let string_p = plain_string_p.clone().map(Json::String);

    // Arrays
    let array_elems_p = json_p.refn().many_sep0(symbol(","));
    let array_p = seq("array", (symbol("["), array_elems_p, symbol("]")))
        .second()
        .map(Json::Array);

    // Objects
    let entry_p = seq(
        "dictionary entry",
        (plain_string_p, symbol(":"), json_p.refn()),
    )
    .map(|(key, _, val)| (key, val));
    let entries_p = entry_p.many_sep0(symbol(","));
    let dict_p = seq("dictionary", (symbol("{"), entries_p, symbol("}")))
        .second()
        .map(Json::Object);

    json_p.define(choice(
        "json value",
        [null_p, bool_p, number_p, string_p, array_p, dict_p],
    ))
}

fn main() {
    use std::io;

    let parser = make_json_parser();
    let input = io::read_to_string(io::stdin()).unwrap();
    match parser.parse(&tokenize(&input)) {
        Err(err) => println!("{}", err),
        Ok(results) => {
            for json in results {
                println!("{}", json);
            }
        }
    }
}
