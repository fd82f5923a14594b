//! Built-in facilities: `Math`, `Debug`, `System` and `string`, plus the
//! members of the collection types.

use std::rc::Rc;

use super::{HostMember, HostRegistry};
use crate::{
    ast::{ExprKind, Expression},
    format,
    interpreter::{context::RuntimeContext, RuntimeErrorKind},
    types::{ScriptType, SequenceKind},
    value::{checked_index, DictionaryRef, ListRef, Value},
};

use ScriptType::{Bool, Double, Int, Object, String as Str, Void};

fn arguments_error(member: &str, args: &[Value]) -> RuntimeErrorKind {
    RuntimeErrorKind::Host(format!(
        "{} received unexpected arguments ({})",
        member,
        args.iter()
            .map(|arg| arg.runtime_type().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

fn double(value: &Value, member: &str) -> Result<f64, RuntimeErrorKind> {
    value
        .as_f64()
        .ok_or_else(|| arguments_error(member, std::slice::from_ref(value)))
}

fn text<'a>(value: &'a Value, member: &str) -> Result<&'a str, RuntimeErrorKind> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Err(RuntimeErrorKind::NullValue(member.to_string())),
        other => Err(arguments_error(member, std::slice::from_ref(other))),
    }
}

fn list<'a>(value: &'a Value, member: &str) -> Result<&'a ListRef, RuntimeErrorKind> {
    match value {
        Value::List(list) => Ok(list),
        Value::Null => Err(RuntimeErrorKind::NullValue(member.to_string())),
        other => Err(arguments_error(member, std::slice::from_ref(other))),
    }
}

fn dictionary<'a>(value: &'a Value, member: &str) -> Result<&'a DictionaryRef, RuntimeErrorKind> {
    match value {
        Value::Dictionary(map) => Ok(map),
        Value::Null => Err(RuntimeErrorKind::NullValue(member.to_string())),
        other => Err(arguments_error(member, std::slice::from_ref(other))),
    }
}

fn count(n: usize) -> Result<Value, RuntimeErrorKind> {
    i32::try_from(n)
        .map(Value::Int)
        .map_err(|_| RuntimeErrorKind::Overflow("count".to_string()))
}

fn unary_double(registry: &mut HostRegistry, name: &'static str, f: fn(f64) -> f64) {
    registry.register_static(
        "Math",
        HostMember::method(name, vec![Double], Double, move |_, args| match args {
            [x] => Ok(Value::Double(f(double(x, name)?))),
            _ => Err(arguments_error(name, args)),
        }),
    );
}

fn binary_int(
    registry: &mut HostRegistry,
    name: &'static str,
    f: fn(i32, i32) -> Option<i32>,
) {
    registry.register_static(
        "Math",
        HostMember::method(name, vec![Int, Int], Int, move |_, args| match args {
            [Value::Int(a), Value::Int(b)] => f(*a, *b)
                .map(Value::Int)
                .ok_or_else(|| RuntimeErrorKind::Overflow(name.to_string())),
            _ => Err(arguments_error(name, args)),
        }),
    );
}

fn binary_double(registry: &mut HostRegistry, name: &'static str, f: fn(f64, f64) -> f64) {
    registry.register_static(
        "Math",
        HostMember::method(name, vec![Double, Double], Double, move |_, args| {
            match args {
                [a, b] => Ok(Value::Double(f(double(a, name)?, double(b, name)?))),
                _ => Err(arguments_error(name, args)),
            }
        }),
    );
}

fn install_math(registry: &mut HostRegistry) {
    registry.register_static(
        "Math",
        HostMember::property("PI", Double, |_, _| Ok(Value::Double(std::f64::consts::PI))),
    );
    registry.register_static(
        "Math",
        HostMember::property("E", Double, |_, _| Ok(Value::Double(std::f64::consts::E))),
    );

    registry.register_static(
        "Math",
        HostMember::method("Abs", vec![Int], Int, |_, args| match args {
            [Value::Int(i)] => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| RuntimeErrorKind::Overflow("Abs".to_string())),
            _ => Err(arguments_error("Abs", args)),
        }),
    );
    unary_double(registry, "Abs", f64::abs);
    binary_int(registry, "Max", |a, b| Some(a.max(b)));
    binary_double(registry, "Max", f64::max);
    binary_int(registry, "Min", |a, b| Some(a.min(b)));
    binary_double(registry, "Min", f64::min);
    binary_double(registry, "Pow", f64::powf);
    unary_double(registry, "Sqrt", f64::sqrt);
    unary_double(registry, "Floor", f64::floor);
    unary_double(registry, "Ceiling", f64::ceil);
    unary_double(registry, "Round", round_half_even);

    registry.register_static(
        "Math",
        HostMember::method("Clamp", vec![Int, Int, Int], Int, |_, args| match args {
            [Value::Int(v), Value::Int(lo), Value::Int(hi)] if lo <= hi => {
                Ok(Value::Int(*v.clamp(lo, hi)))
            }
            _ => Err(arguments_error("Clamp", args)),
        }),
    );
    registry.register_static(
        "Math",
        HostMember::method(
            "Clamp",
            vec![Double, Double, Double],
            Double,
            |_, args| match args {
                [v, lo, hi] => {
                    let (v, lo, hi) = (double(v, "Clamp")?, double(lo, "Clamp")?, double(hi, "Clamp")?);
                    if lo <= hi {
                        Ok(Value::Double(v.clamp(lo, hi)))
                    } else {
                        Err(arguments_error("Clamp", args))
                    }
                }
                _ => Err(arguments_error("Clamp", args)),
            },
        ),
    );
}

/// Midpoints round to the even neighbour.
fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - x.signum()
    } else {
        rounded
    }
}

fn install_debug(registry: &mut HostRegistry) {
    fn log(
        name: &'static str,
        emit: fn(&str),
    ) -> impl Fn(&RuntimeContext, &[Value]) -> Result<Value, RuntimeErrorKind> {
        move |context, args| match args {
            [message] => {
                let message = message.to_script_string();
                emit(&message);
                writeln!(context.output().borrow_mut(), "{}", message)?;
                Ok(Value::Null)
            }
            _ => Err(arguments_error(name, args)),
        }
    }

    registry.register_static(
        "Debug",
        HostMember::method(
            "Log",
            vec![Object],
            Void,
            log("Log", |m| tracing::info!(target: "script", "{}", m)),
        ),
    );
    registry.register_static(
        "Debug",
        HostMember::method(
            "LogWarning",
            vec![Object],
            Void,
            log("LogWarning", |m| tracing::warn!(target: "script", "{}", m)),
        ),
    );
    registry.register_static(
        "Debug",
        HostMember::method(
            "LogError",
            vec![Object],
            Void,
            log("LogError", |m| tracing::error!(target: "script", "{}", m)),
        ),
    );
}

fn install_system(registry: &mut HostRegistry) {
    registry.register_static(
        "System",
        HostMember::method("Clock", vec![], Double, |_, _| {
            let elapsed = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_err(|e| RuntimeErrorKind::Host(e.to_string()))?;
            Ok(Value::Double(elapsed.as_secs_f64()))
        }),
    );
}

/// Rejects literal format strings whose placeholders do not line up with
/// the supplied arguments.
fn check_format(arguments: &[Expression]) -> Result<(), std::string::String> {
    let Some(Expression {
        kind: ExprKind::Literal(Value::String(template)),
        ..
    }) = arguments.first()
    else {
        return Ok(());
    };

    let mut indices = format::placeholder_indices(template).map_err(|e| e.to_string())?;
    indices.sort_unstable();
    indices.dedup();
    let supplied = arguments.len() - 1;

    if let Some(missing) = indices.iter().find(|index| **index >= supplied) {
        return Err(format!(
            "placeholder {{{}}} has no matching argument ({} supplied)",
            missing, supplied
        ));
    }
    if indices.len() != supplied {
        return Err(format!(
            "{} argument(s) supplied for {} placeholder(s)",
            supplied,
            indices.len()
        ));
    }
    Ok(())
}

fn install_string(registry: &mut HostRegistry) {
    registry.register_static(
        "string",
        HostMember::method("Format", vec![Str], Str, |_, args| match args {
            [template, rest @ ..] => Ok(Value::string(format::format(
                text(template, "Format")?,
                rest,
            )?)),
            _ => Err(arguments_error("Format", args)),
        })
        .variadic(Object)
        .with_check(check_format),
    );
    registry.register_static(
        "string",
        HostMember::method("IsNullOrEmpty", vec![Str], Bool, |_, args| match args {
            [Value::Null] => Ok(Value::Bool(true)),
            [Value::String(s)] => Ok(Value::Bool(s.is_empty())),
            _ => Err(arguments_error("IsNullOrEmpty", args)),
        }),
    );
    registry.register_static(
        "string",
        HostMember::method(
            "Join",
            vec![Str, ScriptType::list(Str)],
            Str,
            |_, args| match args {
                [separator, items] => {
                    let separator = text(separator, "Join")?;
                    let items = list(items, "Join")?;
                    let joined = items
                        .items
                        .borrow()
                        .iter()
                        .map(Value::to_script_string)
                        .collect::<Vec<_>>()
                        .join(separator);
                    Ok(Value::string(joined))
                }
                _ => Err(arguments_error("Join", args)),
            },
        ),
    );

    let string = ScriptType::String;
    registry.register_instance(
        &string,
        HostMember::property("Length", Int, |_, args| match args {
            [s] => count(text(s, "Length")?.chars().count()),
            _ => Err(arguments_error("Length", args)),
        }),
    );

    let transforms: [(&'static str, fn(&str) -> std::string::String); 3] = [
        ("ToUpper", str::to_uppercase),
        ("ToLower", str::to_lowercase),
        ("Trim", |s| s.trim().to_string()),
    ];
    for (name, transform) in transforms {
        registry.register_instance(
            &string,
            HostMember::method(name, vec![], Str, move |_, args| match args {
                [s] => Ok(Value::string(transform(text(s, name)?))),
                _ => Err(arguments_error(name, args)),
            }),
        );
    }

    let predicates: [(&'static str, fn(&str, &str) -> bool); 3] = [
        ("Contains", |s, p| s.contains(p)),
        ("StartsWith", |s, p| s.starts_with(p)),
        ("EndsWith", |s, p| s.ends_with(p)),
    ];
    for (name, predicate) in predicates {
        registry.register_instance(
            &string,
            HostMember::method(name, vec![Str], Bool, move |_, args| match args {
                [s, pattern] => Ok(Value::Bool(predicate(text(s, name)?, text(pattern, name)?))),
                _ => Err(arguments_error(name, args)),
            }),
        );
    }

    registry.register_instance(
        &string,
        HostMember::method("IndexOf", vec![Str], Int, |_, args| match args {
            [s, pattern] => {
                let s = text(s, "IndexOf")?;
                match s.find(text(pattern, "IndexOf")?) {
                    Some(byte) => count(s[..byte].chars().count()),
                    None => Ok(Value::Int(-1)),
                }
            }
            _ => Err(arguments_error("IndexOf", args)),
        }),
    );
    registry.register_instance(
        &string,
        HostMember::method("Replace", vec![Str, Str], Str, |_, args| match args {
            [s, from, to] => Ok(Value::string(
                text(s, "Replace")?.replace(text(from, "Replace")?, text(to, "Replace")?),
            )),
            _ => Err(arguments_error("Replace", args)),
        }),
    );
    registry.register_instance(
        &string,
        HostMember::method("Substring", vec![Int], Str, |_, args| match args {
            [s, Value::Int(start)] => {
                let chars: Vec<char> = text(s, "Substring")?.chars().collect();
                let start = substring_bound(*start, chars.len())?;
                Ok(Value::string(chars[start..].iter().collect::<std::string::String>()))
            }
            _ => Err(arguments_error("Substring", args)),
        }),
    );
    registry.register_instance(
        &string,
        HostMember::method("Substring", vec![Int, Int], Str, |_, args| match args {
            [s, Value::Int(start), Value::Int(length)] => {
                let chars: Vec<char> = text(s, "Substring")?.chars().collect();
                let start = substring_bound(*start, chars.len())?;
                let end = usize::try_from(*length)
                    .ok()
                    .map(|length| start + length)
                    .filter(|end| *end <= chars.len())
                    .ok_or(RuntimeErrorKind::IndexOutOfRange {
                        index: *length as i64,
                        length: chars.len() - start,
                    })?;
                Ok(Value::string(chars[start..end].iter().collect::<std::string::String>()))
            }
            _ => Err(arguments_error("Substring", args)),
        }),
    );
}

/// Bounds where `index == length` is allowed.
fn substring_bound(index: i32, length: usize) -> Result<usize, RuntimeErrorKind> {
    checked_index(index, length + 1)
}

pub(super) fn install(registry: &mut HostRegistry) {
    install_math(registry);
    install_debug(registry);
    install_system(registry);
    install_string(registry);
}

/// Members of `List<element>`.
fn list_members(element: &ScriptType, name: &str) -> Option<HostMember> {
    let member = match name {
        "Add" => HostMember::method("Add", vec![element.clone()], Void, move |_, args| {
            match args {
                [items, item] => {
                    let items = list(items, "Add")?;
                    items.items.borrow_mut().push(item.clone().coerce(&items.element));
                    Ok(Value::Null)
                }
                _ => Err(arguments_error("Add", args)),
            }
        }),
        "Insert" => HostMember::method("Insert", vec![Int, element.clone()], Void, |_, args| {
            match args {
                [items, Value::Int(index), item] => {
                    let items = list(items, "Insert")?;
                    let at = checked_index(*index, items.len() + 1)?;
                    let item = item.clone().coerce(&items.element);
                    items.items.borrow_mut().insert(at, item);
                    Ok(Value::Null)
                }
                _ => Err(arguments_error("Insert", args)),
            }
        }),
        "IndexOf" => HostMember::method("IndexOf", vec![element.clone()], Int, |_, args| {
            match args {
                [items, item] => {
                    let items = list(items, "IndexOf")?;
                    let item = item.clone().coerce(&items.element);
                    let position = items.items.borrow().iter().position(|x| x.script_equals(&item));
                    match position {
                        Some(i) => count(i),
                        None => Ok(Value::Int(-1)),
                    }
                }
                _ => Err(arguments_error("IndexOf", args)),
            }
        }),
        "RemoveAt" => HostMember::method("RemoveAt", vec![Int], Void, |_, args| match args {
            [items, Value::Int(index)] => {
                let items = list(items, "RemoveAt")?;
                let at = checked_index(*index, items.len())?;
                items.items.borrow_mut().remove(at);
                Ok(Value::Null)
            }
            _ => Err(arguments_error("RemoveAt", args)),
        }),
        _ => return None,
    };
    Some(member)
}

/// Members every growable sequence shares.
fn common_sequence_members(element: &ScriptType, name: &str) -> Option<HostMember> {
    let member = match name {
        "Count" => HostMember::property("Count", Int, |_, args| match args {
            [items] => count(list(items, "Count")?.len()),
            _ => Err(arguments_error("Count", args)),
        }),
        "Clear" => HostMember::method("Clear", vec![], Void, |_, args| match args {
            [items] => {
                list(items, "Clear")?.items.borrow_mut().clear();
                Ok(Value::Null)
            }
            _ => Err(arguments_error("Clear", args)),
        }),
        "Contains" => HostMember::method("Contains", vec![element.clone()], Bool, |_, args| {
            match args {
                [items, item] => {
                    let items = list(items, "Contains")?;
                    let item = item.clone().coerce(&items.element);
                    let found = items.items.borrow().iter().any(|x| x.script_equals(&item));
                    Ok(Value::Bool(found))
                }
                _ => Err(arguments_error("Contains", args)),
            }
        }),
        _ => return None,
    };
    Some(member)
}

/// `Queue<element>` keeps its front at index 0.
fn queue_members(element: &ScriptType, name: &str) -> Option<HostMember> {
    let member = match name {
        "Enqueue" => HostMember::method("Enqueue", vec![element.clone()], Void, |_, args| {
            match args {
                [items, item] => {
                    let items = list(items, "Enqueue")?;
                    items.items.borrow_mut().push(item.clone().coerce(&items.element));
                    Ok(Value::Null)
                }
                _ => Err(arguments_error("Enqueue", args)),
            }
        }),
        "Dequeue" => HostMember::method("Dequeue", vec![], element.clone(), |_, args| {
            match args {
                [items] => {
                    let items = list(items, "Dequeue")?;
                    let mut items = items.items.borrow_mut();
                    if items.is_empty() {
                        return Err(RuntimeErrorKind::EmptyCollection("Dequeue".to_string()));
                    }
                    Ok(items.remove(0))
                }
                _ => Err(arguments_error("Dequeue", args)),
            }
        }),
        "Peek" => HostMember::method("Peek", vec![], element.clone(), |_, args| match args {
            [items] => list(items, "Peek")?
                .items
                .borrow()
                .first()
                .cloned()
                .ok_or_else(|| RuntimeErrorKind::EmptyCollection("Peek".to_string())),
            _ => Err(arguments_error("Peek", args)),
        }),
        _ => return common_sequence_members(element, name),
    };
    Some(member)
}

/// `Stack<element>` keeps its top at the end.
fn stack_members(element: &ScriptType, name: &str) -> Option<HostMember> {
    let member = match name {
        "Push" => HostMember::method("Push", vec![element.clone()], Void, |_, args| match args {
            [items, item] => {
                let items = list(items, "Push")?;
                items.items.borrow_mut().push(item.clone().coerce(&items.element));
                Ok(Value::Null)
            }
            _ => Err(arguments_error("Push", args)),
        }),
        "Pop" => HostMember::method("Pop", vec![], element.clone(), |_, args| match args {
            [items] => list(items, "Pop")?
                .items
                .borrow_mut()
                .pop()
                .ok_or_else(|| RuntimeErrorKind::EmptyCollection("Pop".to_string())),
            _ => Err(arguments_error("Pop", args)),
        }),
        "Peek" => HostMember::method("Peek", vec![], element.clone(), |_, args| match args {
            [items] => list(items, "Peek")?
                .items
                .borrow()
                .last()
                .cloned()
                .ok_or_else(|| RuntimeErrorKind::EmptyCollection("Peek".to_string())),
            _ => Err(arguments_error("Peek", args)),
        }),
        _ => return common_sequence_members(element, name),
    };
    Some(member)
}

fn array_members(name: &str) -> Option<HostMember> {
    match name {
        "Length" => Some(HostMember::property("Length", Int, |_, args| match args {
            [items] => count(list(items, "Length")?.len()),
            _ => Err(arguments_error("Length", args)),
        })),
        _ => None,
    }
}

fn dictionary_members(key: &ScriptType, value: &ScriptType, name: &str) -> Option<HostMember> {
    let member = match name {
        "Count" => HostMember::property("Count", Int, |_, args| match args {
            [map] => count(dictionary(map, "Count")?.len()),
            _ => Err(arguments_error("Count", args)),
        }),
        "Add" => HostMember::method("Add", vec![key.clone(), value.clone()], Void, |_, args| {
            match args {
                [map, key, value] => {
                    dictionary(map, "Add")?.add(key.clone(), value.clone())?;
                    Ok(Value::Null)
                }
                _ => Err(arguments_error("Add", args)),
            }
        }),
        "ContainsKey" => HostMember::method("ContainsKey", vec![key.clone()], Bool, |_, args| {
            match args {
                [map, key] => Ok(Value::Bool(dictionary(map, "ContainsKey")?.contains_key(key)?)),
                _ => Err(arguments_error("ContainsKey", args)),
            }
        }),
        "ContainsValue" => {
            HostMember::method("ContainsValue", vec![value.clone()], Bool, |_, args| {
                match args {
                    [map, value] => {
                        let map = dictionary(map, "ContainsValue")?;
                        let value = value.clone().coerce(&map.value);
                        let found = map
                            .entries
                            .borrow()
                            .iter()
                            .any(|(_, existing)| existing.script_equals(&value));
                        Ok(Value::Bool(found))
                    }
                    _ => Err(arguments_error("ContainsValue", args)),
                }
            })
        }
        "Remove" => HostMember::method("Remove", vec![key.clone()], Bool, |_, args| match args {
            [map, key] => Ok(Value::Bool(dictionary(map, "Remove")?.remove(key)?)),
            _ => Err(arguments_error("Remove", args)),
        }),
        "Clear" => HostMember::method("Clear", vec![], Void, |_, args| match args {
            [map] => {
                dictionary(map, "Clear")?.entries.borrow_mut().clear();
                Ok(Value::Null)
            }
            _ => Err(arguments_error("Clear", args)),
        }),
        "Keys" => HostMember::property("Keys", ScriptType::list(key.clone()), |_, args| {
            match args {
                [map] => {
                    let map = dictionary(map, "Keys")?;
                    let keys = map.entries.borrow().iter().map(|(key, _)| key.clone()).collect();
                    Ok(Value::List(ListRef::new(map.key.clone(), keys)))
                }
                _ => Err(arguments_error("Keys", args)),
            }
        }),
        "Values" => HostMember::property("Values", ScriptType::list(value.clone()), |_, args| {
            match args {
                [map] => {
                    let map = dictionary(map, "Values")?;
                    let values = map
                        .entries
                        .borrow()
                        .iter()
                        .map(|(_, value)| value.clone())
                        .collect();
                    Ok(Value::List(ListRef::new(map.value.clone(), values)))
                }
                _ => Err(arguments_error("Values", args)),
            }
        }),
        _ => return None,
    };
    Some(member)
}

/// Instance members of a collection type. Empty for other types.
pub(super) fn collection_members(ty: &ScriptType, name: &str) -> Vec<Rc<HostMember>> {
    let member = match ty {
        ScriptType::Dictionary(key, value) => dictionary_members(key, value, name),
        other => match other.sequence() {
            Some((SequenceKind::List, element)) => {
                list_members(element, name).or_else(|| common_sequence_members(element, name))
            }
            Some((SequenceKind::Array, _)) => array_members(name),
            Some((SequenceKind::Queue, element)) => queue_members(element, name),
            Some((SequenceKind::Stack, element)) => stack_members(element, name),
            None => None,
        },
    };
    member.map(Rc::new).into_iter().collect()
}

/// Members every value has.
pub(super) fn universal_members(name: &str) -> Vec<Rc<HostMember>> {
    match name {
        "ToString" => vec![Rc::new(HostMember::method(
            "ToString",
            vec![],
            Str,
            |_, args| match args {
                [value] => Ok(Value::string(value.to_script_string())),
                _ => Err(arguments_error("ToString", args)),
            },
        ))],
        _ => vec![],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rounds_midpoints_to_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_half_even(2.4), 2.0);
    }
}
