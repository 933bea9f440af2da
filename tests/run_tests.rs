use parser_cps::{
    any, choice, either, empty, eof, exact, intersperse, satisfy, separator, seq, succeed, token,
    Either, Parser, Recursive,
};
use std::fmt;

type LineNum = u32;

/// A line of a test file, as a token.
type Line = (LineNum, String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Ok,
    Err,
}

#[derive(Debug, Clone)]
enum Header {
    Parser,
    Input,
    Expect(Status, LineNum),
}

#[derive(Debug, Clone)]
struct Section {
    header: Header,
    contents: String,
}

#[derive(Debug, Clone)]
struct TestCases {
    sections: Vec<Section>,
}

impl TestCases {
    fn num_tests(&self) -> usize {
        let mut count = 0;
        for section in &self.sections {
            if matches!(section.header, Header::Expect(_, _)) {
                count += 1;
            }
        }
        count
    }
}

fn lex_lines(file_contents: &str) -> Vec<Line> {
    file_contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|(i, line)| (i as LineNum, line.trim_end().to_owned()))
        .collect()
}

fn header_line(text: &'static str) -> Parser<Line, LineNum> {
    token(text, move |(line_num, line): &Line| {
        if line == text {
            Some(*line_num)
        } else {
            None
        }
    })
}

fn make_test_case_parser() -> Parser<Line, TestCases> {
    let header_p = choice(
        "Header",
        [
            header_line("Parser").lift(Header::Parser),
            header_line("Input").lift(Header::Input),
            header_line("Expect Ok").map(|line_num| Header::Expect(Status::Ok, line_num)),
            header_line("Expect Err").map(|line_num| Header::Expect(Status::Err, line_num)),
        ],
    );
    let line_p = token("Line", |(_, line): &Line| {
        let rest = line.strip_prefix('>')?;
        Some(rest.strip_prefix(' ').unwrap_or(rest).to_owned())
    });
    let contents_p = line_p.many1().map(|lines| lines.join("\n"));
    let section_p = seq("Section", (header_p, contents_p))
        .map(|(header, contents)| Section { header, contents });
    section_p.many0().map(|sections| TestCases { sections })
}

#[derive(Debug, Clone)]
struct CustomError(String);

impl fmt::Display for CustomError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for CustomError {}

/// Pop the top `N` parsers, oldest first.
fn pop_parsers<const N: usize>(
    stack: &mut Vec<Parser<char, String>>,
) -> [Parser<char, String>; N] {
    assert!(stack.len() >= N, "Bad parser test case");
    match stack.split_off(stack.len() - N).try_into() {
        Ok(parsers) => parsers,
        Err(_) => unreachable!(),
    }
}

fn parse_parser(parser_description: &str) -> Parser<char, String> {
    type CharParser = Parser<char, String>;

    let mut stack: Vec<CharParser> = Vec::new();
    let mut recursive = Some(Recursive::<char, String>::new("recursive"));

    for word in parser_description.split_whitespace() {
        if word.len() >= 2 && word.starts_with('"') && word.ends_with('"') {
            let string = &word[1..word.len() - 1];
            let mut parser: CharParser = succeed(String::new());
            for ch in string.chars() {
                parser = parser.and(exact(ch)).map(|(mut s, ch)| {
                    s.push(ch);
                    s
                });
            }
            stack.push(parser.named(word));
            continue;
        } else if word.starts_with('\'') && word.ends_with('\'') && word.chars().count() == 3 {
            let ch = word.chars().nth(1).unwrap();
            stack.push(exact(ch).map(|ch| ch.to_string()));
            continue;
        }
        match word {
            // Tokens
            "digit" => {
                let parser = satisfy("digit", |ch: &char| ch.is_ascii_digit());
                stack.push(parser.map(|ch| ch.to_string()));
            }
            "letter" => {
                let parser = satisfy("letter", |ch: &char| ch.is_ascii_alphabetic());
                stack.push(parser.map(|ch| ch.to_string()));
            }
            "any" => stack.push(any().map(|ch: char| ch.to_string())),
            "eof" => stack.push(eof().lift("$".to_owned())),
            "empty" => stack.push(empty().lift("()".to_owned())),

            // Mapping
            "lift" => {
                let parser_1 = stack.pop().unwrap();
                stack.push(parser_1.lift("lift".to_owned()));
            }
            "map" => {
                let parser_1 = stack.pop().unwrap();
                stack.push(parser_1.map(|s| format!("(map {})", s)));
            }
            "try_map" => {
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1.try_map(|s| {
                    if s.contains("ok") {
                        Ok(format!("(ok {})", s))
                    } else {
                        Err(CustomError(format!("oops something went wrong: {}", s)))
                    }
                });
                stack.push(parser);
            }
            "extract" => {
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1.extract(|s| {
                    if s.contains('x') {
                        None
                    } else {
                        Some(format!("(extract {})", s))
                    }
                });
                stack.push(parser);
            }
            "named" => {
                let parser_1 = stack.pop().unwrap();
                stack.push(parser_1.named("named"));
            }

            // Repetition
            "opt" => {
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1.opt().map(|opt| match opt {
                    None => ".".to_owned(),
                    Some(s) => s,
                });
                stack.push(parser);
            }
            "default" => {
                let parser_1 = stack.pop().unwrap();
                stack.push(parser_1.opt().default("default".to_owned()));
            }
            "many0" => {
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1
                    .many0()
                    .map(|vec| format!("(many0 {})", vec.join(" ")));
                stack.push(parser);
            }
            "many1" => {
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1
                    .many1()
                    .map(|vec| format!("(many1 {})", vec.join(" ")));
                stack.push(parser);
            }
            "many1_3" => {
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1
                    .many(1, Some(3))
                    .map(|vec| format!("(many1_3 {})", vec.join(" ")));
                stack.push(parser);
            }
            "sep0" => {
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1
                    .many_sep0(parser_2)
                    .map(|vec| format!("(sep0 {})", vec.join(" ")));
                stack.push(parser);
            }
            "sep1" => {
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1
                    .many_sep1(parser_2)
                    .map(|vec| format!("(sep1 {})", vec.join(" ")));
                stack.push(parser);
            }
            "sep2" => {
                let [parser_1, parser_2] = pop_parsers::<2>(&mut stack);
                let parser = separator("sep2", parser_1, parser_2, 2, None)
                    .map(|vec| format!("(sep2 {})", vec.join(" ")));
                stack.push(parser);
            }
            "intersperse0" | "intersperse1" => {
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                let min = if word == "intersperse0" { 0 } else { 1 };
                let parser = intersperse("intersperse", parser_1, parser_2, min, None)
                    .map(|vec| format!("(intersperse {})", vec.join(" ")));
                stack.push(parser);
            }
            "fold0" => {
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1
                    .fold(0, None, "fold".to_owned(), |a, b| format!("{} {}", a, b))
                    .map(|s| format!("({})", s));
                stack.push(parser);
            }
            "fold1_3" => {
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1
                    .fold(1, Some(3), "fold".to_owned(), |a, b| format!("{} {}", a, b))
                    .map(|s| format!("({})", s));
                stack.push(parser);
            }

            // Junctions
            "and" => {
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                let parser = parser_1
                    .and(parser_2)
                    .map(|(a, b)| format!("(and {} {})", a, b));
                stack.push(parser);
            }
            "preceded" => {
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                stack.push(parser_1.preceded(parser_2));
            }
            "terminated" => {
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                stack.push(parser_1.terminated(parser_2));
            }
            "seq3" => {
                let parser_3 = stack.pop().unwrap();
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                let parser = seq("seq", (parser_1, parser_2, parser_3))
                    .map(|(a, b, c)| format!("(seq {} {} {})", a, b, c));
                stack.push(parser);
            }
            "seq4" => {
                let [a, b, c, d] = pop_parsers::<4>(&mut stack);
                let parser = seq("seq", (a, b, c, d))
                    .map(|(a, b, c, d)| format!("(seq {} {} {} {})", a, b, c, d));
                stack.push(parser);
            }
            "seq5" => {
                let [a, b, c, d, e] = pop_parsers::<5>(&mut stack);
                let parser = seq("seq", (a, b, c, d, e))
                    .map(|(a, b, c, d, e)| format!("(seq {} {} {} {} {})", a, b, c, d, e));
                stack.push(parser);
            }
            "seq6" => {
                let [a, b, c, d, e, f] = pop_parsers::<6>(&mut stack);
                let parser = seq("seq", (a, b, c, d, e, f)).map(|(a, b, c, d, e, f)| {
                    format!("(seq {} {} {} {} {} {})", a, b, c, d, e, f)
                });
                stack.push(parser);
            }
            "seq7" => {
                let [a, b, c, d, e, f, g] = pop_parsers::<7>(&mut stack);
                let parser = seq("seq", (a, b, c, d, e, f, g)).map(|(a, b, c, d, e, f, g)| {
                    format!("(seq {} {} {} {} {} {} {})", a, b, c, d, e, f, g)
                });
                stack.push(parser);
            }
            "seq8" => {
                let [a, b, c, d, e, f, g, h] = pop_parsers::<8>(&mut stack);
                let parser =
                    seq("seq", (a, b, c, d, e, f, g, h)).map(|(a, b, c, d, e, f, g, h)| {
                        format!("(seq {} {} {} {} {} {} {} {})", a, b, c, d, e, f, g, h)
                    });
                stack.push(parser);
            }

            // Projections: `third4` keeps the third output of a 4-sequence.
            "first3" => {
                let [a, b, c] = pop_parsers::<3>(&mut stack);
                stack.push(seq("seq", (a, b, c)).first());
            }
            "third4" => {
                let [a, b, c, d] = pop_parsers::<4>(&mut stack);
                stack.push(seq("seq", (a, b, c, d)).third());
            }
            "fourth5" => {
                let [a, b, c, d, e] = pop_parsers::<5>(&mut stack);
                stack.push(seq("seq", (a, b, c, d, e)).fourth());
            }
            "fifth6" => {
                let [a, b, c, d, e, f] = pop_parsers::<6>(&mut stack);
                stack.push(seq("seq", (a, b, c, d, e, f)).fifth());
            }
            "second7" => {
                let [a, b, c, d, e, f, g] = pop_parsers::<7>(&mut stack);
                stack.push(seq("seq", (a, b, c, d, e, f, g)).second());
            }
            "fifth8" => {
                let [a, b, c, d, e, f, g, h] = pop_parsers::<8>(&mut stack);
                stack.push(seq("seq", (a, b, c, d, e, f, g, h)).fifth());
            }

            "choice2" => {
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                stack.push(choice("choice", [parser_1, parser_2]));
            }
            "choice3" => {
                let parser_3 = stack.pop().unwrap();
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                stack.push(choice("choice", [parser_1, parser_2, parser_3]));
            }
            "either" => {
                let parser_2 = stack.pop().unwrap();
                let parser_1 = stack.pop().unwrap();
                let parser = either("either", parser_1, parser_2).map(|either| match either {
                    Either::Left(s) => format!("(left {})", s),
                    Either::Right(s) => format!("(right {})", s),
                });
                stack.push(parser);
            }

            // Recursion
            "refn" => {
                stack.push(recursive.as_ref().unwrap().refn());
            }
            "define" => {
                let parser = stack.pop().unwrap();
                stack.push(recursive.take().unwrap().define(parser));
            }

            _ => panic!("Bad test case parser description: {} not recognized", word),
        }
    }
    assert_eq!(stack.len(), 1, "Bad parser test case");
    stack.pop().unwrap()
}

fn find_diff(string_1: &str, string_2: &str) -> (usize, usize) {
    let mut line = 0;
    let mut col = 0;
    for (x, y) in string_1.chars().zip(string_2.chars()) {
        if x != y {
            break;
        }
        if x == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn run_test_case(
    filename: &str,
    line_num: LineNum,
    parser_description: &str,
    input: &str,
    expected: (Status, String),
) {
    colored::control::set_override(false);

    let parser = parse_parser(parser_description);
    let tokens: Vec<char> = input.chars().collect();
    let actual = match parser.parse(&tokens) {
        Ok(results) => (Status::Ok, results.join("\n")),
        Err(err) => (Status::Err, format!("{}", err)),
    };

    if actual != expected {
        let (diff_line, diff_col) = find_diff(&actual.1, &expected.1);

        println!("Parser");
        for line in parser_description.lines() {
            println!("> {}", line);
        }
        println!("Input");
        for line in input.lines() {
            println!("> {}", line);
        }
        if input.is_empty() {
            println!(">");
        }
        println!("Expected {}", expected.0);
        for line in expected.1.lines() {
            println!("> {}", line);
        }
        println!("Actual {}", actual.0);
        for line in actual.1.lines() {
            println!("> {}", line);
        }
        panic!(
            "Test case failure at {}, line {} (diff at {}:{}).",
            filename,
            line_num + 1,
            diff_line,
            diff_col
        );
    }
}

fn run_test_cases(filename: &str, test_cases: TestCases) {
    let mut parser = String::new();
    let mut input = String::new();
    for section in test_cases.sections {
        match section.header {
            Header::Parser => parser = section.contents,
            Header::Input => input = section.contents,
            Header::Expect(status, line_num) => {
                let expected = (status, section.contents);
                run_test_case(filename, line_num, &parser, &input, expected);
            }
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "Ok"),
            Status::Err => write!(f, "Err"),
        }
    }
}

#[test]
fn run_parser_tests() {
    use std::fs;

    let test_case_parser = make_test_case_parser();

    for entry in fs::read_dir("tests/").unwrap() {
        let entry = entry.unwrap();
        let file_type = entry.file_type().unwrap();
        let file_name = entry.file_name().into_string().unwrap();
        if file_type.is_file() && file_name.ends_with(".tests.txt") {
            let file_contents = fs::read_to_string(entry.path()).unwrap();
            let mut parses = match test_case_parser.parse(&lex_lines(&file_contents)) {
                Ok(parses) => parses,
                Err(err) => panic!("{}: {}", file_name, err),
            };
            assert_eq!(parses.len(), 1, "{}: ambiguous test file", file_name);
            let test_cases = parses.remove(0);
            let num_tests = test_cases.num_tests();
            run_test_cases(&file_name, test_cases);
            println!("Ran {} successful test cases from {}", num_tests, file_name);
        }
    }
}
