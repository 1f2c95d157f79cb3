/// Argument Marshaller
///
/// Turns a test case's textual input into literal arguments for the target
/// language. The input is a comma-joined sequence where every argument is
/// either a bracket-delimited array or a bare scalar, e.g. `[2,7,11,15],9`.
///
/// Each argument is classified in order:
/// 1. text starting with `[` must be a JSON array, otherwise the whole input is rejected
/// 2. text that parses as a finite number becomes a numeric literal, kept as written
/// 3. anything else becomes a string literal (a JSON-quoted string is unquoted first)
///
/// Argument order is preserved exactly as written.

use crate::language::LanguageSupport;
use serde_json::Value;
use thiserror::Error;

pub const MAX_TEST_INPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum MarshalError {
    #[error("array argument `{argument}` is not valid JSON: {reason}")]
    InvalidArray { argument: String, reason: String },
    #[error("array literal starting at byte {0} is never closed")]
    UnbalancedBrackets(usize),
    #[error("string literal in argument starting at byte {0} is never closed")]
    UnterminatedString(usize),
    #[error("unexpected text after array literal: `{0}`")]
    TrailingText(String),
    #[error("argument {0} is empty")]
    EmptyArgument(usize),
    #[error("input exceeds {0} bytes")]
    InputTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Array(Vec<Value>),
    /// Normalized numeric text, e.g. `007` becomes `7`.
    Number(String),
    Text(String),
}

/// Index one past the `]` that closes the `[` at `start`. Brackets inside
/// string literals do not count.
fn matching_bracket(input: &str, start: usize) -> Result<usize, MarshalError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(start + offset + 1);
                }
            }
            _ => {}
        }
    }

    Err(MarshalError::UnbalancedBrackets(start))
}

/// Index of the next top-level comma at or after `start`, or the end of input.
fn scalar_end(input: &str, start: usize) -> Result<usize, MarshalError> {
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            ',' => return Ok(start + offset),
            _ => {}
        }
    }

    if in_string {
        return Err(MarshalError::UnterminatedString(start));
    }
    Ok(input.len())
}

fn skip_whitespace(input: &str, mut pos: usize) -> usize {
    while let Some(ch) = input[pos..].chars().next() {
        if !ch.is_whitespace() {
            break;
        }
        pos += ch.len_utf8();
    }
    pos
}

/// Split raw input into argument substrings, in order. A single trailing comma is tolerated.
pub fn split_arguments(input: &str) -> Result<Vec<&str>, MarshalError> {
    if input.len() > MAX_TEST_INPUT_BYTES {
        return Err(MarshalError::InputTooLarge(MAX_TEST_INPUT_BYTES));
    }

    let mut args = Vec::new();
    let mut pos = skip_whitespace(input, 0);

    while pos < input.len() {
        if input[pos..].starts_with('[') {
            let end = matching_bracket(input, pos)?;
            args.push(&input[pos..end]);

            let next = skip_whitespace(input, end);
            if next < input.len() && !input[next..].starts_with(',') {
                let tail_end = scalar_end(input, next)?;
                return Err(MarshalError::TrailingText(input[next..tail_end].to_string()));
            }
            pos = next;
        } else {
            let end = scalar_end(input, pos)?;
            let arg = input[pos..end].trim();
            if arg.is_empty() {
                return Err(MarshalError::EmptyArgument(args.len() + 1));
            }
            args.push(arg);
            pos = end;
        }

        // Consume the separator, if any.
        if pos < input.len() {
            pos = skip_whitespace(input, pos + 1);
        }
    }

    Ok(args)
}

/// The numeric literal for `text`, or None if it is not a finite number.
///
/// The lexeme is passed through as written so `2.0` stays a float and large
/// integers keep every digit. Only forms some targets reject are rewritten:
/// leading zeros (`007`), a bare leading dot (`.5`) and a bare trailing dot (`5.`).
fn parse_number(text: &str) -> Option<String> {
    // Rust accepts "inf" and "NaN"; those stay strings.
    text.parse::<f64>().ok().filter(|f| f.is_finite())?;

    let (sign, unsigned) = match text.as_bytes().first() {
        Some(b'-') | Some(b'+') => text.split_at(1),
        _ => ("", text),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(idx) => unsigned.split_at(idx),
        None => (unsigned, ""),
    };
    let (int_part, fraction) = match mantissa.split_once('.') {
        Some((int_part, fraction)) => (int_part, Some(fraction)),
        None => (mantissa, None),
    };

    let int_part = match int_part.trim_start_matches('0') {
        "" => "0",
        digits => digits,
    };
    let mut literal = format!("{}{}", sign, int_part);
    if let Some(fraction) = fraction {
        literal.push('.');
        literal.push_str(if fraction.is_empty() { "0" } else { fraction });
    }
    literal.push_str(exponent);
    Some(literal)
}

/// Classify one argument substring.
pub fn classify(arg: &str) -> Result<Literal, MarshalError> {
    if arg.starts_with('[') {
        return match serde_json::from_str::<Value>(arg) {
            Ok(Value::Array(items)) => Ok(Literal::Array(items)),
            Ok(_) => Err(MarshalError::InvalidArray {
                argument: arg.to_string(),
                reason: "not an array".to_string(),
            }),
            Err(e) => Err(MarshalError::InvalidArray {
                argument: arg.to_string(),
                reason: e.to_string(),
            }),
        };
    }

    if let Some(number) = parse_number(arg) {
        return Ok(Literal::Number(number));
    }

    if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') {
        if let Ok(text) = serde_json::from_str::<String>(arg) {
            return Ok(Literal::Text(text));
        }
    }
    if arg.len() >= 2 && arg.starts_with('\'') && arg.ends_with('\'') {
        return Ok(Literal::Text(arg[1..arg.len() - 1].to_string()));
    }

    Ok(Literal::Text(arg.to_string()))
}

pub fn parse_arguments(input: &str) -> Result<Vec<Literal>, MarshalError> {
    split_arguments(input)?.into_iter().map(classify).collect()
}

/// Parse a test case input and render every argument for the target language.
pub fn marshal_arguments(
    input: &str,
    support: &dyn LanguageSupport,
) -> Result<Vec<String>, MarshalError> {
    Ok(parse_arguments(input)?
        .iter()
        .map(|literal| support.marshal_argument(literal))
        .collect())
}
