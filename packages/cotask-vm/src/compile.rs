use crate::program::{Function, Op, Program};
use cotask_scheduler::LoadError;
use rustc_hash::FxHashMap;
use std::fmt::Display;

struct RawBody<'a> {
    name: &'a str,
    header_line: usize,
    lines: Vec<(usize, &'a str)>,
}

/// Compiles source text into a [`Program`]. Every failure is reported as
/// [`LoadError::Syntax`] prefixed with `chunk:line`.
pub fn compile(source: &str, chunk_name: &str) -> Result<Program, LoadError> {
    let bodies = split_bodies(source, chunk_name)?;

    let mut functions_by_name = FxHashMap::default();
    for (index, body) in bodies.iter().enumerate().skip(1) {
        if functions_by_name.insert(body.name, index).is_some() {
            return Err(syntax(
                chunk_name,
                body.header_line,
                format!("function '{}' defined twice", body.name),
            ));
        }
    }

    let functions = bodies
        .iter()
        .map(|body| compile_body(body, &functions_by_name, chunk_name))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::trace!(chunk = chunk_name, functions = functions.len(), "chunk compiled");
    Ok(Program {
        chunk: chunk_name.to_string(),
        functions,
    })
}

fn syntax(chunk: &str, line: usize, message: impl Display) -> LoadError {
    LoadError::Syntax(format!("{chunk}:{line}: {message}"))
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits source into the main chunk (index 0) and one body per `fn`.
fn split_bodies<'a>(source: &'a str, chunk: &str) -> Result<Vec<RawBody<'a>>, LoadError> {
    let mut bodies = vec![RawBody {
        name: "",
        header_line: 0,
        lines: Vec::new(),
    }];
    let mut open: Option<RawBody<'a>> = None;

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let text = raw.split('#').next().unwrap_or_default().trim();
        if text.is_empty() {
            continue;
        }

        let mut words = text.split_whitespace();
        match words.next() {
            Some("fn") => {
                if open.is_some() {
                    return Err(syntax(chunk, line, "nested function definition"));
                }
                let name = words
                    .next()
                    .ok_or_else(|| syntax(chunk, line, "expected a function name after 'fn'"))?;
                if !is_identifier(name) {
                    return Err(syntax(chunk, line, format!("invalid function name '{name}'")));
                }
                if let Some(extra) = words.next() {
                    return Err(syntax(chunk, line, format!("unexpected '{extra}'")));
                }
                open = Some(RawBody {
                    name,
                    header_line: line,
                    lines: Vec::new(),
                });
            }
            Some("end") => {
                let body = open
                    .take()
                    .ok_or_else(|| syntax(chunk, line, "'end' outside of a function"))?;
                bodies.push(body);
            }
            _ => match open.as_mut() {
                Some(body) => body.lines.push((line, text)),
                None => bodies[0].lines.push((line, text)),
            },
        }
    }

    if let Some(body) = open {
        return Err(syntax(
            chunk,
            body.header_line,
            format!("function '{}' is missing 'end'", body.name),
        ));
    }
    Ok(bodies)
}

fn compile_body(
    body: &RawBody<'_>,
    functions: &FxHashMap<&str, usize>,
    chunk: &str,
) -> Result<Function, LoadError> {
    let mut labels = FxHashMap::default();
    let mut instructions = Vec::with_capacity(body.lines.len());
    for &(line, text) in &body.lines {
        match text.strip_suffix(':') {
            Some(label) => {
                if !is_identifier(label) {
                    return Err(syntax(chunk, line, format!("invalid label '{label}'")));
                }
                if labels.insert(label, instructions.len()).is_some() {
                    return Err(syntax(chunk, line, format!("label '{label}' defined twice")));
                }
            }
            None => instructions.push((line, text)),
        }
    }

    let mut code = Vec::with_capacity(instructions.len());
    let mut lines = Vec::with_capacity(instructions.len());
    for (line, text) in instructions {
        let (mnemonic, operand) = match text.split_once(char::is_whitespace) {
            Some((mnemonic, rest)) => (mnemonic, Some(rest.trim())),
            None => (text, None),
        };
        let op = parse_op(mnemonic, operand, &labels, functions)
            .map_err(|message| syntax(chunk, line, message))?;
        code.push(op);
        lines.push(line);
    }

    Ok(Function {
        name: body.name.to_string(),
        code,
        lines,
    })
}

fn parse_op(
    mnemonic: &str,
    operand: Option<&str>,
    labels: &FxHashMap<&str, usize>,
    functions: &FxHashMap<&str, usize>,
) -> Result<Op, String> {
    let bare = |op: Op| match operand {
        None => Ok(op),
        Some(extra) => Err(format!("'{mnemonic}' takes no operand, found '{extra}'")),
    };
    let required = || operand.ok_or_else(|| format!("'{mnemonic}' expects an operand"));

    match mnemonic {
        "push" => {
            let value = required()?;
            value
                .parse()
                .map(Op::Push)
                .map_err(|_| format!("invalid integer '{value}'"))
        }
        "pop" => bare(Op::Pop),
        "dup" => bare(Op::Dup),
        "add" => bare(Op::Add),
        "sub" => bare(Op::Sub),
        "ret" => bare(Op::Ret),
        "jump" | "jumpz" => {
            let label = required()?;
            let target = *labels
                .get(label)
                .ok_or_else(|| format!("unknown label '{label}'"))?;
            Ok(if mnemonic == "jump" {
                Op::Jump(target)
            } else {
                Op::JumpZero(target)
            })
        }
        "call" => {
            let name = required()?;
            functions
                .get(name)
                .map(|&index| Op::Call(index))
                .ok_or_else(|| format!("unknown function '{name}'"))
        }
        "raise" => Ok(Op::Raise(required()?.to_string())),
        "host" => {
            let name = required()?;
            if !is_identifier(name) {
                return Err(format!("invalid host function name '{name}'"));
            }
            Ok(Op::Host(name.to_string()))
        }
        "alloc" => {
            let size = required()?;
            size.parse()
                .map(Op::Alloc)
                .map_err(|_| format!("invalid size '{size}'"))
        }
        other => Err(format!("unknown instruction '{other}'")),
    }
}
