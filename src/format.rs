//! Composite format strings: `{index[,alignment][:format]}` placeholders with
//! `{{` and `}}` escapes, as consumed by `string.Format`.

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("unbalanced brace at offset {0}")]
    UnbalancedBrace(usize),
    #[error("invalid placeholder \"{0}\"")]
    InvalidPlaceholder(String),
    #[error("placeholder {index} has no matching argument ({count} supplied)")]
    MissingArgument { index: usize, count: usize },
    #[error("format specifier \"{specifier}\" does not apply to {value}")]
    InvalidSpecifier { specifier: String, value: String },
}

#[derive(Debug, PartialEq, Eq)]
struct Placeholder<'a> {
    index: usize,
    alignment: i32,
    specifier: &'a str,
}

enum Piece<'a> {
    Text(&'a str),
    Placeholder(Placeholder<'a>),
}

fn pieces(template: &str) -> Result<Vec<Piece<'_>>, FormatError> {
    let mut pieces = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while !rest.is_empty() {
        let next = rest.find(['{', '}']).unwrap_or(rest.len());
        if next > 0 {
            pieces.push(Piece::Text(&rest[..next]));
        }
        rest = &rest[next..];
        offset += next;

        if let Some(tail) = rest.strip_prefix("{{") {
            pieces.push(Piece::Text("{"));
            rest = tail;
            offset += 2;
        } else if let Some(tail) = rest.strip_prefix("}}") {
            pieces.push(Piece::Text("}"));
            rest = tail;
            offset += 2;
        } else if rest.starts_with('}') {
            return Err(FormatError::UnbalancedBrace(offset));
        } else if rest.starts_with('{') {
            let close = rest.find('}').ok_or(FormatError::UnbalancedBrace(offset))?;
            pieces.push(Piece::Placeholder(placeholder(&rest[1..close])?));
            rest = &rest[close + 1..];
            offset += close + 1;
        }
    }

    Ok(pieces)
}

fn placeholder(body: &str) -> Result<Placeholder<'_>, FormatError> {
    let invalid = || FormatError::InvalidPlaceholder(body.to_string());

    let (head, specifier) = match body.split_once(':') {
        Some((head, specifier)) => (head, specifier),
        None => (body, ""),
    };
    let (index, alignment) = match head.split_once(',') {
        Some((index, alignment)) => (
            index,
            alignment.trim().parse::<i32>().map_err(|_| invalid())?,
        ),
        None => (head, 0),
    };
    let index = index.trim().parse::<usize>().map_err(|_| invalid())?;

    Ok(Placeholder {
        index,
        alignment,
        specifier,
    })
}

/// Every placeholder index in `template`, in order of appearance.
pub fn placeholder_indices(template: &str) -> Result<Vec<usize>, FormatError> {
    Ok(pieces(template)?
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Placeholder(p) => Some(p.index),
            Piece::Text(_) => None,
        })
        .collect())
}

pub fn format(template: &str, arguments: &[Value]) -> Result<String, FormatError> {
    let mut output = String::with_capacity(template.len());

    for piece in pieces(template)? {
        match piece {
            Piece::Text(text) => output.push_str(text),
            Piece::Placeholder(p) => {
                let value = arguments.get(p.index).ok_or(FormatError::MissingArgument {
                    index: p.index,
                    count: arguments.len(),
                })?;
                let text = apply_specifier(value, p.specifier)?;
                pad(&mut output, &text, p.alignment);
            }
        }
    }

    Ok(output)
}

fn pad(output: &mut String, text: &str, alignment: i32) {
    let width = alignment.unsigned_abs() as usize;
    let fill = width.saturating_sub(text.chars().count());
    if alignment > 0 {
        output.extend(std::iter::repeat(' ').take(fill));
        output.push_str(text);
    } else {
        output.push_str(text);
        output.extend(std::iter::repeat(' ').take(fill));
    }
}

fn apply_specifier(value: &Value, specifier: &str) -> Result<String, FormatError> {
    let Some(number) = value.as_f64() else {
        return Ok(value.to_script_string());
    };
    let mut chars = specifier.chars();
    let Some(kind) = chars.next() else {
        return Ok(value.to_script_string());
    };

    let invalid = || FormatError::InvalidSpecifier {
        specifier: specifier.to_string(),
        value: value.to_string(),
    };
    let digits = chars.as_str();
    let precision = if digits.is_empty() {
        None
    } else {
        Some(digits.parse::<usize>().map_err(|_| invalid())?)
    };

    match kind.to_ascii_uppercase() {
        'F' => Ok(format!("{:.*}", precision.unwrap_or(2), number)),
        'N' => Ok(group_thousands(&format!(
            "{:.*}",
            precision.unwrap_or(2),
            number
        ))),
        'P' => Ok(format!("{:.*}%", precision.unwrap_or(2), number * 100.0)),
        'D' => {
            let integer = integral(value).ok_or_else(invalid)?;
            let width = precision.unwrap_or(0);
            if integer < 0 {
                Ok(format!("-{:0width$}", integer.unsigned_abs(), width = width))
            } else {
                Ok(format!("{:0width$}", integer, width = width))
            }
        }
        'X' => {
            let integer = integral(value).ok_or_else(invalid)?;
            let width = precision.unwrap_or(0);
            let text = match value {
                Value::Int(i) => format!("{:0width$X}", i, width = width),
                _ => format!("{:0width$X}", integer, width = width),
            };
            Ok(if kind == 'x' {
                text.to_lowercase()
            } else {
                text
            })
        }
        _ => Err(invalid()),
    }
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i as i64),
        Value::Long(l) => Some(*l),
        _ => None,
    }
}

fn group_thousands(fixed: &str) -> String {
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed),
    };
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(fixed.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match fraction {
        Some(fraction) => format!("{}{}.{}", sign, grouped, fraction),
        None => format!("{}{}", sign, grouped),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn substitutes_positional_arguments() {
        let text = format(
            "Hello, {0}! You are {1}.",
            &[Value::string("Ada"), Value::Int(36)],
        )
        .unwrap();
        assert_eq!(text, "Hello, Ada! You are 36.");
    }

    #[test]
    fn applies_numeric_specifiers() {
        assert_eq!(format("{0:F2}", &[Value::Double(3.14159)]).unwrap(), "3.14");
        assert_eq!(format("{0:N0}", &[Value::Int(1234567)]).unwrap(), "1,234,567");
        assert_eq!(format("{0:D4}", &[Value::Int(42)]).unwrap(), "0042");
        assert_eq!(format("{0:D3}", &[Value::Int(-7)]).unwrap(), "-007");
        assert_eq!(format("{0:P1}", &[Value::Double(0.125)]).unwrap(), "12.5%");
        assert_eq!(format("{0:x}", &[Value::Int(255)]).unwrap(), "ff");
    }

    #[test]
    fn aligns_within_width() {
        assert_eq!(format("[{0,4}]", &[Value::Int(7)]).unwrap(), "[   7]");
        assert_eq!(format("[{0,-4}]", &[Value::Int(7)]).unwrap(), "[7   ]");
    }

    #[test]
    fn escaped_braces_are_literal() {
        assert_eq!(format("{{{0}}}", &[Value::Int(1)]).unwrap(), "{1}");
    }

    #[test]
    fn reports_malformed_templates() {
        assert_eq!(format("{0", &[Value::Int(1)]), Err(FormatError::UnbalancedBrace(0)));
        assert_eq!(format("a}", &[]), Err(FormatError::UnbalancedBrace(1)));
        assert!(matches!(
            format("{x}", &[]),
            Err(FormatError::InvalidPlaceholder(_))
        ));
        assert_eq!(
            format("{1}", &[Value::Int(1)]),
            Err(FormatError::MissingArgument { index: 1, count: 1 })
        );
        assert!(matches!(
            format("{0:D2}", &[Value::Double(1.5)]),
            Err(FormatError::InvalidSpecifier { .. })
        ));
    }

    #[test]
    fn lists_placeholder_indices() {
        assert_eq!(placeholder_indices("{1} {0:F2} {{2}}").unwrap(), vec![1, 0]);
    }
}
