use parser_cps::{choice, seq, token, Parser, Recursive};
use regex::Regex;

// > echo "(1 - 2 - 3) * sqrt(4) / 6" | cargo run --example calc
// -1.3333333333333333

fn tokenize(input: &str) -> Vec<String> {
    let regex = Regex::new(r"[0-9]*\.?[0-9]+([eE][-+]?[0-9]+)?|sqrt|\S").unwrap();
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

fn make_calculator() -> Parser<String, f64> {
    use std::str::FromStr;

    let calc = Recursive::<String, f64>::new("arithmetic expression");

    let num = token("number", |tok: &String| f64::from_str(tok).ok());

    let parens = seq(
        "parenthesized expression",
        (symbol("("), calc.refn(), symbol(")")),
    )
    .second();

    let sqrt = seq(
        "square root expression",
        (symbol("sqrt"), symbol("("), calc.refn(), symbol(")")),
    )
    .third()
    .map(f64::sqrt);

    let expr_0 = choice("numeric expression", [num, parens, sqrt]);

    // Multiplication and Division
    #[derive(Clone, Copy)]
    enum MultOp {
        Mult,
        Div,
    }
    let mult_op = choice(
        "'*' or '/'",
        [
            symbol("*").lift(MultOp::Mult),
            symbol("/").lift(MultOp::Div),
        ],
    );
    let expr_1 = expr_0
        .clone()
        .and(mult_op.and(expr_0).many0())
        .map(|(n, rest)| {
            rest.into_iter().fold(n, |n, (op, m)| match op {
                MultOp::Mult => n * m,
                MultOp::Div => n / m,
            })
        });

    // Addition and Subtraction
    #[derive(Clone, Copy)]
    enum AddOp {
        Add,
        Sub,
    }
    let add_op = choice(
        "'+' or '-'",
        [symbol("+").lift(AddOp::Add), symbol("-").lift(AddOp::Sub)],
    );
    let expr_2 = expr_1
        .clone()
        .and(add_op.and(expr_1).many0())
        .map(|(n, rest)| {
            rest.into_iter().fold(n, |n, (op, m)| match op {
                AddOp::Add => n + m,
                AddOp::Sub => n - m,
            })
        });

    calc.define(expr_2)
}

fn main() {
    use std::io;

    let parser = make_calculator();
    let input = io::read_to_string(io::stdin()).unwrap();
    match parser.parse(&tokenize(&input)) {
        Err(err) => println!("{}", err),
        Ok(results) => {
            for n in results {
                println!("{}", n);
            }
        }
    }
}
