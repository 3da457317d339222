// Builtin methods on runtime values

use std::cmp::Ordering;

use regex::Regex;

use super::builtins::{arg, dedup, ordering_int, parse_float, replace_items, SortBy};
use super::containers::{is_heap, is_set, payload_list};
use super::format;
use super::interpreter::{Fault, Interpreter};
use super::ir::BinOp;
use super::value::{ordered_entries, Value, PAYLOAD};
use crate::grammar::Language;

/// What a builtin method produced and how it touched its receiver.
pub(super) struct MethodResult {
    pub(super) value: Value,
    /// Replacement for the receiver's place (strings are values, so an
    /// in-place edit has to be written back).
    pub(super) updated: Option<Value>,
    /// The receiver was changed in place.
    pub(super) mutated: bool,
}

impl MethodResult {
    fn value(value: Value) -> Self {
        Self {
            value,
            updated: None,
            mutated: false,
        }
    }

    fn mutated(value: Value) -> Self {
        Self {
            value,
            updated: None,
            mutated: true,
        }
    }

    fn updated(value: Value, receiver: Value) -> Self {
        Self {
            value,
            updated: Some(receiver),
            mutated: false,
        }
    }
}

type Method = Result<Option<MethodResult>, Fault>;

fn found(value: Value) -> Method {
    Ok(Some(MethodResult::value(value)))
}

impl<'p> Interpreter<'p> {
    /// Dispatch `receiver.name(args)` to the runtime library. `Ok(None)`
    /// means the receiver has no such method.
    pub(super) fn call_method_builtin(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Method {
        let receiver = receiver.deref();
        if let Some(result) = self.common_method(&receiver, name, &args)? {
            return Ok(Some(result));
        }
        match &receiver {
            Value::Object(_) if is_set(&receiver) => Ok(self
                .set_method(&receiver, name, &args)?
                .map(|(value, changed)| if changed { MethodResult::mutated(value) } else { MethodResult::value(value) })),
            Value::Object(_) if is_heap(&receiver) => self.heap_method(&receiver, name, &args),
            Value::Object(object) => {
                let class = object.borrow().class.clone();
                self.object_method(&receiver, &class, name, &args)
            }
            Value::Tuple(items) if matches!(items.first(), Some(Value::Str(tag)) if tag == "__entry") => {
                self.entry_method(items.as_slice(), name, &args)
            }
            Value::List(_) | Value::Tuple(_) | Value::Range { .. } => self.sequence_method(&receiver, name, args, kwargs),
            Value::Str(text) => match self.language {
                Language::Python => self.python_str_method(text, name, &args, &kwargs),
                Language::Java => self.java_str_method(text, name, &args),
                Language::C | Language::Cpp => self.cpp_str_method(text, name, &args),
                Language::Rust => self.rust_str_method(text, name, &args, &kwargs),
            },
            Value::Dict(_) => self.dict_method(&receiver, name, &args, &kwargs),
            Value::Char(c) => Ok(char_method(*c, name, &args).map(MethodResult::value)),
            Value::Int(_) | Value::Float(_) | Value::Bool(_) => self.number_method(&receiver, name, &args),
            Value::None if self.language == Language::Java => {
                let message = format!("Cannot invoke \"{}()\" because the value is null", name);
                Err(self.raise("NullPointerException", message))
            }
            Value::None if matches!(self.language, Language::C | Language::Cpp) => {
                Err(self.fatal("Segmentation fault: null pointer dereference"))
            }
            _ => Ok(None),
        }
    }

    /// Methods every value answers: option/result combinators, conversions.
    fn common_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> Method {
        match self.language {
            Language::Rust => {
                if let Some(value) = self.rust_option_method(receiver, name, args)? {
                    return found(value);
                }
                match name {
                    "clone" | "to_owned" | "into" | "as_ref" | "as_mut" | "borrow" | "borrow_mut" | "as_str"
                    | "as_slice" | "by_ref"
                        if args.is_empty() =>
                    {
                        return found(if name == "clone" { receiver.deep_copy() } else { receiver.clone() });
                    }
                    "to_string" if args.is_empty() => {
                        let shown = self.rust_display_hook(receiver)?;
                        return found(Value::Str(shown.display(Language::Rust)));
                    }
                    "eq" | "ne" => {
                        let equal = receiver.equals(&arg(args, 0));
                        return found(Value::Bool(equal == (name == "eq")));
                    }
                    _ => {}
                }
            }
            Language::Java => {
                if let Some(value) = self.java_optional(receiver, name, args)? {
                    return found(value);
                }
                match name {
                    "equals" if args.len() == 1 => return found(Value::Bool(receiver.equals(&args[0]))),
                    "toString" if args.is_empty() => return found(Value::Str(self.java_text(receiver)?)),
                    "hashCode" if args.is_empty() => return found(Value::Int(java_hash(receiver))),
                    "compareTo" if args.len() == 1 => {
                        let order = match (receiver, args[0].deref()) {
                            (Value::Str(a), Value::Str(b)) => java_string_compare(a, &b),
                            (a, b) => ordering_int(a.compare(&b).unwrap_or(Ordering::Equal)),
                        };
                        return found(Value::Int(order));
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        if let Value::Exception { kind, message } = receiver {
            let value = match name {
                "getMessage" | "what" | "getLocalizedMessage" | "message" => Value::Str(message.clone()),
                "getClass" => Value::Str(kind.clone()),
                "printStackTrace" => {
                    let text = format!("{}: {}\n", kind, message);
                    self.write_output(&text)?;
                    Value::None
                }
                _ => return Ok(None),
            };
            return found(value);
        }
        Ok(None)
    }

    fn rust_option_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> Result<Option<Value>, Fault> {
        let error = match receiver {
            Value::Exception { kind, message } if kind == "Err" => Some(message.clone()),
            _ => None,
        };
        let present = !matches!(receiver, Value::None) && error.is_none();
        let collection = matches!(receiver, Value::List(_) | Value::Tuple(_) | Value::Range { .. } | Value::Dict(_))
            || receiver.payload().is_some();
        let value = match name {
            "unwrap" | "expect" | "unwrap_unchecked" if present => receiver.clone(),
            "unwrap" => {
                let message = match &error {
                    Some(e) => format!("called `Result::unwrap()` on an `Err` value: {:?}", e),
                    None => "called `Option::unwrap()` on a `None` value".to_string(),
                };
                return Err(self.fatal(format!("panicked: {}", message)));
            }
            "expect" => {
                let mut message = arg(args, 0).display(Language::Rust);
                if let Some(e) = &error {
                    message = format!("{}: {:?}", message, e);
                }
                return Err(self.fatal(format!("panicked: {}", message)));
            }
            "unwrap_or" | "unwrap_or_default" | "unwrap_or_else" | "ok" | "cloned" | "copied" | "flatten"
                if present && !(collection && matches!(name, "cloned" | "copied" | "flatten")) =>
            {
                receiver.clone()
            }
            "unwrap_or" => arg(args, 0),
            "unwrap_or_default" => Value::Int(0),
            "unwrap_or_else" => {
                let input = error.map(Value::Str).into_iter().collect();
                self.call_value(&arg(args, 0), input)?
            }
            "ok" | "err" if args.is_empty() && !collection => match (&error, name) {
                (Some(e), "err") => Value::Str(e.clone()),
                (None, "err") => Value::None,
                _ => Value::None,
            },
            "is_some" | "is_ok" => Value::Bool(present),
            "is_none" | "is_err" => Value::Bool(!present),
            "is_some_and" | "is_ok_and" => {
                Value::Bool(present && self.call_value(&arg(args, 0), vec![receiver.clone()])?.truthy())
            }
            "map_or" => match present {
                true => self.call_value(&arg(args, 1), vec![receiver.clone()])?,
                false => arg(args, 0),
            },
            "and_then" if !collection => match present {
                true => self.call_value(&arg(args, 0), vec![receiver.clone()])?,
                false => receiver.clone(),
            },
            "map" if !collection && receiver.payload().is_none() => match present {
                true => self.call_value(&arg(args, 0), vec![receiver.clone()])?,
                false => receiver.clone(),
            },
            "map_err" => match &error {
                Some(e) => {
                    let mapped = self.call_value(&arg(args, 0), vec![Value::Str(e.clone())])?;
                    Value::Exception {
                        kind: "Err".to_string(),
                        message: mapped.display(Language::Rust),
                    }
                }
                None => receiver.clone(),
            },
            "ok_or" | "ok_or_else" if !present => {
                let reason = match name {
                    "ok_or" => arg(args, 0),
                    _ => self.call_value(&arg(args, 0), Vec::new())?,
                };
                Value::Exception {
                    kind: "Err".to_string(),
                    message: reason.display(Language::Rust),
                }
            }
            "ok_or" | "ok_or_else" => receiver.clone(),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn java_optional(&mut self, receiver: &Value, name: &str, args: &[Value]) -> Result<Option<Value>, Fault> {
        let present = !matches!(receiver, Value::None);
        let value = match name {
            "isPresent" => Value::Bool(present),
            "isEmpty" if !present => Value::Bool(true),
            "get" | "getAsInt" | "getAsDouble" | "getAsLong" | "orElseThrow" if args.is_empty() => {
                if !present {
                    return Err(self.raise("NoSuchElementException", "No value present"));
                }
                if name == "get" && !receiver.is_number() && !matches!(receiver, Value::Str(_) | Value::Object(_)) {
                    return Ok(None);
                }
                receiver.clone()
            }
            "orElse" => match present {
                true => receiver.clone(),
                false => arg(args, 0),
            },
            "orElseGet" => match present {
                true => receiver.clone(),
                false => self.call_value(&arg(args, 0), Vec::new())?,
            },
            "ifPresent" => {
                if present {
                    self.call_value(&arg(args, 0), vec![receiver.clone()])?;
                }
                Value::None
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    // numbers

    fn number_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> Method {
        let other = arg(args, 0).deref();
        let value = match (receiver, name) {
            (_, "cmp" | "partial_cmp" | "total_cmp" | "compare") => {
                Value::Int(ordering_int(receiver.compare(&other).unwrap_or(Ordering::Equal)))
            }
            (Value::Bool(b), "then") => match b {
                true => self.call_value(&other, Vec::new())?,
                false => Value::None,
            },
            (Value::Bool(b), "then_some") => if *b { other } else { Value::None },
            // `Ordering` values are -1, 0 and 1
            (Value::Int(i), "reverse") => Value::Int(-i),
            (Value::Int(i), "then") => if *i != 0 { Value::Int(*i) } else { other },
            (Value::Int(i), "then_with") => match i {
                0 => self.call_value(&other, Vec::new())?,
                _ => Value::Int(*i),
            },
            (Value::Int(i), "is_lt") => Value::Bool(*i < 0),
            (Value::Int(i), "is_gt") => Value::Bool(*i > 0),
            (Value::Int(i), "is_eq") => Value::Bool(*i == 0),
            (Value::Int(i), "pow") => {
                let exp = other.as_int().unwrap_or(0).clamp(0, u32::MAX as i64) as u32;
                match i.checked_pow(exp) {
                    Some(v) => Value::Int(v),
                    None => return Err(self.op_error(super::ops::OpError::Overflow)),
                }
            }
            (Value::Int(i), "rem_euclid" | "div_euclid") => {
                let d = other.as_int().unwrap_or(0);
                if d == 0 {
                    return Err(self.op_error(super::ops::OpError::ZeroDivision { modulo: name == "rem_euclid" }));
                }
                Value::Int(if name == "rem_euclid" { i.rem_euclid(d) } else { i.div_euclid(d) })
            }
            (Value::Int(i), "abs_diff") => Value::Int((i - other.as_int().unwrap_or(0)).abs()),
            (Value::Int(i), "checked_add" | "checked_sub" | "checked_mul" | "checked_div" | "checked_rem") => {
                let d = other.as_int().unwrap_or(0);
                let result = match name {
                    "checked_add" => i.checked_add(d),
                    "checked_sub" => i.checked_sub(d),
                    "checked_mul" => i.checked_mul(d),
                    "checked_div" => i.checked_div(d),
                    _ => i.checked_rem(d),
                };
                result.map_or(Value::None, Value::Int)
            }
            (Value::Int(i), "wrapping_add" | "wrapping_sub" | "wrapping_mul") => {
                let d = other.as_int().unwrap_or(0);
                Value::Int(match name {
                    "wrapping_add" => i.wrapping_add(d),
                    "wrapping_sub" => i.wrapping_sub(d),
                    _ => i.wrapping_mul(d),
                })
            }
            (Value::Int(i), "saturating_add" | "saturating_sub" | "saturating_mul") => {
                let d = other.as_int().unwrap_or(0);
                Value::Int(match name {
                    "saturating_add" => i.saturating_add(d),
                    "saturating_sub" => i.saturating_sub(d),
                    _ => i.saturating_mul(d),
                })
            }
            (Value::Int(i), "count_ones") => Value::Int(i.count_ones() as i64),
            (Value::Int(i), "leading_zeros") => Value::Int((*i as i32).leading_zeros() as i64),
            (Value::Int(i), "trailing_zeros") => Value::Int((*i as i32).trailing_zeros() as i64),
            (Value::Int(i), "is_power_of_two") => Value::Bool(*i > 0 && i & (i - 1) == 0),
            (Value::Int(i), "is_positive") => Value::Bool(*i > 0),
            (Value::Int(i), "is_negative") => Value::Bool(*i < 0),
            (Value::Int(i), "bit_length") => Value::Int(64 - i.unsigned_abs().leading_zeros() as i64),
            (Value::Int(i), "intValue" | "longValue") => Value::Int(*i),
            (Value::Int(i), "doubleValue") => Value::Float(*i as f64),
            (Value::Int(i), "min" | "max") if other.is_number() => {
                let picked = if name == "min" { receiver.compare(&other) == Some(Ordering::Greater) } else { receiver.compare(&other) == Some(Ordering::Less) };
                if picked { other } else { Value::Int(*i) }
            }
            (Value::Int(_), "clamp") => clamp(receiver, &other, &arg(args, 1)),
            (Value::Int(i), "abs") => match i.checked_abs() {
                Some(v) => Value::Int(v),
                None => return Err(self.op_error(super::ops::OpError::Overflow)),
            },
            (Value::Int(i), "signum") => Value::Int(i.signum()),
            (Value::Float(f), _) => match float_method(*f, name, &other, args) {
                Some(value) => value,
                None => return Ok(None),
            },
            (Value::Int(i), _) => match float_method(*i as f64, name, &other, args) {
                Some(value) => value,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        found(value)
    }

    // strings

    fn python_str_method(&mut self, text: &str, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Method {
        let a0 = arg(args, 0);
        let value = match name {
            "upper" => Value::Str(text.to_uppercase()),
            "lower" | "casefold" => Value::Str(text.to_lowercase()),
            "strip" | "lstrip" | "rstrip" => {
                let chars = match &a0 {
                    Value::Str(chars) => Some(chars.as_str()),
                    _ => None,
                };
                Value::Str(strip_with(text, chars, name != "rstrip", name != "lstrip"))
            }
            "split" | "rsplit" => {
                let sep = match &a0 {
                    Value::Str(sep) => Some(sep.clone()),
                    _ => kwargs.iter().find(|(k, _)| k == "sep").and_then(|(_, v)| match v {
                        Value::Str(sep) => Some(sep.clone()),
                        _ => None,
                    }),
                };
                let limit = args
                    .get(1)
                    .or_else(|| kwargs.iter().find(|(k, _)| k == "maxsplit").map(|(_, v)| v))
                    .and_then(Value::as_int)
                    .unwrap_or(-1);
                if sep.as_deref() == Some("") {
                    return Err(self.raise("ValueError", "empty separator"));
                }
                let parts = python_split(text, sep.as_deref(), limit, name == "rsplit");
                Value::list(parts.into_iter().map(Value::Str).collect())
            }
            "splitlines" => Value::list(text.lines().map(Value::str).collect()),
            "join" => {
                let items = self.iterate(&a0)?;
                let mut parts = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item.deref() {
                        Value::Str(s) => parts.push(s),
                        other => {
                            let message = format!("sequence item {}: expected str instance, {} found", i, other.type_name());
                            return Err(self.raise("TypeError", message));
                        }
                    }
                }
                Value::Str(parts.join(text))
            }
            "replace" => {
                let (old, new) = (a0.display(Language::Python), arg(args, 1).display(Language::Python));
                match args.get(2).and_then(Value::as_int) {
                    Some(count) if count >= 0 => Value::Str(text.replacen(&old, &new, count as usize)),
                    _ => Value::Str(text.replace(&old, &new)),
                }
            }
            "find" | "rfind" | "index" | "rindex" => {
                let needle = a0.display(Language::Python);
                let start = args.get(1).and_then(Value::as_int).unwrap_or(0).max(0) as usize;
                let position = if name.starts_with('r') {
                    char_rfind(text, &needle)
                } else {
                    char_find(text, &needle, start)
                };
                match (position, name) {
                    (Some(i), _) => Value::Int(i as i64),
                    (None, "find" | "rfind") => Value::Int(-1),
                    (None, _) => return Err(self.raise("ValueError", "substring not found")),
                }
            }
            "count" => {
                let needle = a0.display(Language::Python);
                if needle.is_empty() {
                    Value::Int(text.chars().count() as i64 + 1)
                } else {
                    Value::Int(text.matches(needle.as_str()).count() as i64)
                }
            }
            "startswith" | "endswith" => {
                let candidates = match &a0 {
                    Value::Tuple(options) => options.iter().map(|o| o.display(Language::Python)).collect(),
                    other => vec![other.display(Language::Python)],
                };
                let hit = candidates.iter().any(|c| {
                    if name == "startswith" {
                        text.starts_with(c.as_str())
                    } else {
                        text.ends_with(c.as_str())
                    }
                });
                Value::Bool(hit)
            }
            "isdigit" | "isnumeric" | "isdecimal" => {
                Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))
            }
            "isalpha" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic)),
            "isalnum" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric)),
            "isspace" => Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace)),
            "isupper" => Value::Bool(
                text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase),
            ),
            "islower" => Value::Bool(
                text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_uppercase),
            ),
            "title" => Value::Str(title_case(text)),
            "capitalize" => {
                let mut chars = text.chars();
                Value::Str(match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                    None => String::new(),
                })
            }
            "swapcase" => Value::Str(
                text.chars()
                    .map(|c| {
                        if c.is_uppercase() {
                            c.to_lowercase().collect::<String>()
                        } else {
                            c.to_uppercase().collect::<String>()
                        }
                    })
                    .collect(),
            ),
            "zfill" => {
                let width = self.check_repeat(1, a0.as_int().unwrap_or(0), true)?;
                let len = text.chars().count();
                if len >= width {
                    Value::str(text)
                } else {
                    let (sign, digits) = match text.strip_prefix(['-', '+']) {
                        Some(rest) => (&text[..1], rest),
                        None => ("", text),
                    };
                    Value::Str(format!("{}{}{}", sign, "0".repeat(width - len), digits))
                }
            }
            "center" | "ljust" | "rjust" => {
                let width = self.check_repeat(1, a0.as_int().unwrap_or(0), true)?;
                let fill = match arg(args, 1) {
                    Value::Str(f) => f.chars().next().unwrap_or(' '),
                    _ => ' ',
                };
                Value::Str(pad(text, width, fill, name))
            }
            "format" => match format::python_format(text, args, kwargs) {
                Ok(formatted) => Value::Str(formatted),
                Err(message) if message.starts_with("Replacement index") => return Err(self.raise("IndexError", message)),
                Err(message) => return Err(self.raise("ValueError", message)),
            },
            "partition" | "rpartition" => {
                let sep = a0.display(Language::Python);
                let split = if name == "partition" { text.split_once(sep.as_str()) } else { text.rsplit_once(sep.as_str()) };
                let parts = match split {
                    Some((head, tail)) => [head.to_string(), sep.clone(), tail.to_string()],
                    None if name == "partition" => [text.to_string(), String::new(), String::new()],
                    None => [String::new(), String::new(), text.to_string()],
                };
                Value::tuple(parts.into_iter().map(Value::Str).collect())
            }
            "removeprefix" => {
                let prefix = a0.display(Language::Python);
                Value::str(text.strip_prefix(prefix.as_str()).unwrap_or(text))
            }
            "removesuffix" => {
                let suffix = a0.display(Language::Python);
                Value::str(text.strip_suffix(suffix.as_str()).unwrap_or(text))
            }
            _ => return Ok(None),
        };
        found(value)
    }

    fn java_str_method(&mut self, text: &str, name: &str, args: &[Value]) -> Method {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len() as i64;
        let a0 = arg(args, 0);
        let value = match name {
            "length" => Value::Int(len),
            "isEmpty" => Value::Bool(chars.is_empty()),
            "isBlank" => Value::Bool(text.trim().is_empty()),
            "charAt" => {
                let i = a0.as_int().unwrap_or(0);
                if i < 0 || i >= len {
                    let message = format!("Index {} out of bounds for length {}", i, len);
                    return Err(self.raise("StringIndexOutOfBoundsException", message));
                }
                Value::Char(chars[i as usize])
            }
            "substring" | "subSequence" => {
                let begin = a0.as_int().unwrap_or(0);
                let end = args.get(1).and_then(Value::as_int).unwrap_or(len);
                if begin < 0 || end > len || begin > end {
                    let message = format!("begin {}, end {}, length {}", begin, end, len);
                    return Err(self.raise("StringIndexOutOfBoundsException", message));
                }
                Value::Str(chars[begin as usize..end as usize].iter().collect())
            }
            "indexOf" | "lastIndexOf" => {
                let needle = a0.display(Language::Java);
                let position = if name == "indexOf" {
                    let from = args.get(1).and_then(Value::as_int).unwrap_or(0).max(0) as usize;
                    char_find(text, &needle, from)
                } else {
                    char_rfind(text, &needle)
                };
                Value::Int(position.map_or(-1, |p| p as i64))
            }
            "contains" => Value::Bool(text.contains(a0.display(Language::Java).as_str())),
            "startsWith" => Value::Bool(text.starts_with(a0.display(Language::Java).as_str())),
            "endsWith" => Value::Bool(text.ends_with(a0.display(Language::Java).as_str())),
            "equalsIgnoreCase" => Value::Bool(text.to_lowercase() == a0.display(Language::Java).to_lowercase()),
            "compareToIgnoreCase" => Value::Int(java_string_compare(
                &text.to_lowercase(),
                &a0.display(Language::Java).to_lowercase(),
            )),
            "toUpperCase" => Value::Str(text.to_uppercase()),
            "toLowerCase" => Value::Str(text.to_lowercase()),
            "trim" | "strip" => Value::str(text.trim()),
            "stripLeading" => Value::str(text.trim_start()),
            "stripTrailing" => Value::str(text.trim_end()),
            "concat" => Value::Str(format!("{}{}", text, a0.display(Language::Java))),
            "repeat" => {
                let count = self.check_repeat(text.len(), a0.as_int().unwrap_or(0), true)?;
                Value::Str(text.repeat(count))
            }
            "replace" => Value::Str(text.replace(
                a0.display(Language::Java).as_str(),
                arg(args, 1).display(Language::Java).as_str(),
            )),
            "replaceAll" | "replaceFirst" | "matches" | "split" => {
                let pattern = a0.display(Language::Java);
                let source = if name == "matches" { format!("^(?:{})$", pattern) } else { pattern.clone() };
                let re = match Regex::new(&source) {
                    Ok(re) => re,
                    Err(_) => return Err(self.raise("PatternSyntaxException", format!("invalid regex: {}", pattern))),
                };
                match name {
                    "matches" => Value::Bool(re.is_match(text)),
                    "replaceAll" => Value::Str(re.replace_all(text, arg(args, 1).display(Language::Java).as_str()).into_owned()),
                    "replaceFirst" => Value::Str(re.replace(text, arg(args, 1).display(Language::Java).as_str()).into_owned()),
                    _ => {
                        let limit = args.get(1).and_then(Value::as_int).unwrap_or(0);
                        Value::list(java_split(text, &re, limit).into_iter().map(Value::Str).collect())
                    }
                }
            }
            "toCharArray" => Value::list(chars.into_iter().map(Value::Char).collect()),
            "chars" => Value::list(chars.into_iter().map(|c| Value::Int(c as i64)).collect()),
            "intern" => Value::str(text),
            _ => return Ok(None),
        };
        found(value)
    }

    fn cpp_str_method(&mut self, text: &str, name: &str, args: &[Value]) -> Method {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let a0 = arg(args, 0);
        let index = |v: &Value| v.as_int().unwrap_or(0).max(0) as usize;
        let edited = |value: Value, chars: Vec<char>| Ok(Some(MethodResult::updated(value, Value::Str(chars.into_iter().collect()))));
        let value = match name {
            "size" | "length" => Value::Int(len as i64),
            "empty" => Value::Bool(len == 0),
            "c_str" | "data" | "str" | "begin" => Value::str(text),
            "end" => Value::None,
            "at" => {
                let i = a0.as_int().unwrap_or(0);
                if i < 0 || i as usize >= len {
                    let message = format!("basic_string::at: __n (which is {}) >= this->size() (which is {})", i, len);
                    return Err(self.raise("out_of_range", message));
                }
                Value::Char(chars[i as usize])
            }
            "front" | "back" => match if name == "front" { chars.first() } else { chars.last() } {
                Some(c) => Value::Char(*c),
                None => return Err(self.fatal("Segmentation fault: access to an empty string")),
            },
            "substr" => {
                let pos = index(&a0);
                if pos > len {
                    let message = format!("basic_string::substr: __pos (which is {}) > this->size() (which is {})", pos, len);
                    return Err(self.raise("out_of_range", message));
                }
                let count = args.get(1).map_or(len - pos, index).min(len - pos);
                Value::Str(chars[pos..pos + count].iter().collect())
            }
            "find" | "rfind" | "find_first_of" | "find_last_of" => {
                let needle = a0.display(Language::Cpp);
                let from = args.get(1).map_or(0, index);
                let position = match name {
                    "find" => char_find(text, &needle, from),
                    "rfind" => char_rfind(text, &needle),
                    "find_first_of" => chars.iter().skip(from).position(|c| needle.contains(*c)).map(|p| p + from),
                    _ => chars.iter().rposition(|c| needle.contains(*c)),
                };
                Value::Int(position.map_or(-1, |p| p as i64))
            }
            "compare" => Value::Int(ordering_int(text.cmp(a0.display(Language::Cpp).as_str()))),
            "push_back" | "append" | "insert" | "erase" | "replace" | "pop_back" | "clear" | "resize" => {
                let mut chars = chars;
                match name {
                    "push_back" => chars.push(match a0 {
                        Value::Char(c) => c,
                        other => other.display(Language::Cpp).chars().next().unwrap_or('\0'),
                    }),
                    "append" => match (args.len(), &a0) {
                        (2, Value::Int(n)) => {
                            let c = arg(args, 1).display(Language::Cpp).chars().next().unwrap_or(' ');
                            let count = self.check_repeat(1, *n, true)?;
                            chars.extend(std::iter::repeat(c).take(count));
                        }
                        _ => chars.extend(a0.display(Language::Cpp).chars()),
                    },
                    "insert" => {
                        let pos = index(&a0).min(len);
                        let piece: Vec<char> = arg(args, 1).display(Language::Cpp).chars().collect();
                        chars.splice(pos..pos, piece);
                    }
                    "erase" => {
                        let pos = index(&a0).min(len);
                        let count = args.get(1).map_or(len - pos, index).min(len - pos);
                        chars.drain(pos..pos + count);
                    }
                    "replace" => {
                        let pos = index(&a0).min(len);
                        let count = index(&arg(args, 1)).min(len - pos);
                        let piece: Vec<char> = arg(args, 2).display(Language::Cpp).chars().collect();
                        chars.splice(pos..pos + count, piece);
                    }
                    "pop_back" => {
                        if chars.pop().is_none() {
                            return Err(self.fatal("Segmentation fault: pop_back on an empty string"));
                        }
                    }
                    "resize" => {
                        let fill = match arg(args, 1) {
                            Value::Char(c) => c,
                            _ => '\0',
                        };
                        let size = index(&a0);
                        self.check_len(size)?;
                        chars.resize(size, fill);
                    }
                    _ => chars.clear(),
                }
                self.check_len(chars.len())?;
                return edited(Value::None, chars);
            }
            _ => return Ok(None),
        };
        found(value)
    }

    fn rust_str_method(&mut self, text: &str, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Method {
        let a0 = arg(args, 0);
        let value = match name {
            "len" => Value::Int(text.len() as i64),
            "is_empty" => Value::Bool(text.is_empty()),
            "chars" => Value::list(text.chars().map(Value::Char).collect()),
            "bytes" | "as_bytes" => Value::list(text.bytes().map(|b| Value::Int(b as i64)).collect()),
            "char_indices" => Value::list(
                text.char_indices()
                    .map(|(i, c)| Value::tuple(vec![Value::Int(i as i64), Value::Char(c)]))
                    .collect(),
            ),
            "trim" => Value::str(text.trim()),
            "trim_start" => Value::str(text.trim_start()),
            "trim_end" => Value::str(text.trim_end()),
            "trim_matches" => {
                let pattern = a0.display(Language::Rust);
                Value::str(text.trim_matches(|c| pattern.contains(c)))
            }
            "to_uppercase" | "to_ascii_uppercase" => Value::Str(text.to_uppercase()),
            "to_lowercase" | "to_ascii_lowercase" => Value::Str(text.to_lowercase()),
            "split" | "rsplit" | "split_terminator" | "splitn" => {
                let (limit, pattern) = match name {
                    "splitn" => (a0.as_int().map(|n| n.max(0) as usize), arg(args, 1)),
                    _ => (None, a0),
                };
                let mut parts = match &pattern {
                    Value::Closure(_) | Value::Function(_) => {
                        let mut parts = Vec::new();
                        let mut current = String::new();
                        for c in text.chars() {
                            if self.call_value(&pattern, vec![Value::Char(c)])?.truthy() {
                                parts.push(std::mem::take(&mut current));
                            } else {
                                current.push(c);
                            }
                        }
                        parts.push(current);
                        parts
                    }
                    other => {
                        let sep = other.display(Language::Rust);
                        match limit {
                            Some(n) => text.splitn(n, sep.as_str()).map(str::to_string).collect(),
                            None => text.split(sep.as_str()).map(str::to_string).collect::<Vec<_>>(),
                        }
                    }
                };
                if name == "rsplit" {
                    parts.reverse();
                }
                if name == "split_terminator" && parts.last().is_some_and(String::is_empty) {
                    parts.pop();
                }
                Value::list(parts.into_iter().map(Value::Str).collect())
            }
            "split_whitespace" | "split_ascii_whitespace" => Value::list(text.split_whitespace().map(Value::str).collect()),
            "lines" => Value::list(text.lines().map(Value::str).collect()),
            "split_once" | "rsplit_once" => {
                let sep = a0.display(Language::Rust);
                let split = if name == "split_once" { text.split_once(sep.as_str()) } else { text.rsplit_once(sep.as_str()) };
                match split {
                    Some((head, tail)) => Value::tuple(vec![Value::str(head), Value::str(tail)]),
                    None => Value::None,
                }
            }
            "split_at" => {
                let at = a0.as_int().unwrap_or(0).max(0) as usize;
                if at > text.len() || !text.is_char_boundary(at) {
                    return Err(self.fatal(format!("panicked: byte index {} is out of bounds of `{}`", at, text)));
                }
                let (head, tail) = text.split_at(at);
                Value::tuple(vec![Value::str(head), Value::str(tail)])
            }
            "contains" | "starts_with" | "ends_with" | "find" | "rfind" => {
                let position = match &a0 {
                    Value::Closure(_) | Value::Function(_) => {
                        let mut hit = None;
                        for (i, c) in text.char_indices() {
                            if self.call_value(&a0, vec![Value::Char(c)])?.truthy() {
                                hit = Some(i);
                                if name != "rfind" {
                                    break;
                                }
                            }
                        }
                        hit
                    }
                    other => {
                        let needle = other.display(Language::Rust);
                        match name {
                            "starts_with" => text.starts_with(needle.as_str()).then_some(0),
                            "ends_with" => text.ends_with(needle.as_str()).then_some(0),
                            "rfind" => text.rfind(needle.as_str()),
                            _ => text.find(needle.as_str()),
                        }
                    }
                };
                match name {
                    "find" | "rfind" => position.map_or(Value::None, |p| Value::Int(p as i64)),
                    "ends_with" if matches!(a0, Value::Closure(_) | Value::Function(_)) => {
                        let last = text.chars().last();
                        match last {
                            Some(c) => self.call_value(&a0, vec![Value::Char(c)])?,
                            None => Value::Bool(false),
                        }
                    }
                    "starts_with" if matches!(a0, Value::Closure(_) | Value::Function(_)) => {
                        Value::Bool(position == Some(0))
                    }
                    _ => Value::Bool(position.is_some()),
                }
            }
            "strip_prefix" | "strip_suffix" => {
                let affix = a0.display(Language::Rust);
                let stripped = if name == "strip_prefix" {
                    text.strip_prefix(affix.as_str())
                } else {
                    text.strip_suffix(affix.as_str())
                };
                stripped.map_or(Value::None, Value::str)
            }
            "replace" | "replacen" => {
                let (from, to) = (a0.display(Language::Rust), arg(args, 1).display(Language::Rust));
                match name {
                    "replacen" => Value::Str(text.replacen(&from, &to, arg(args, 2).as_int().unwrap_or(0).max(0) as usize)),
                    _ => Value::Str(text.replace(&from, &to)),
                }
            }
            "repeat" => {
                let count = self.check_repeat(text.len(), a0.as_int().unwrap_or(0), true)?;
                Value::Str(text.repeat(count))
            }
            "parse" => {
                let target = kwargs
                    .iter()
                    .find(|(k, _)| k == "__type")
                    .map(|(_, v)| v.display(Language::Rust))
                    .unwrap_or_default();
                parse_rust(text, &target)
            }
            "cmp" => Value::Int(ordering_int(text.cmp(a0.display(Language::Rust).as_str()))),
            "eq_ignore_ascii_case" => Value::Bool(text.eq_ignore_ascii_case(&a0.display(Language::Rust))),
            "push_str" | "push" | "insert" | "insert_str" | "pop" | "remove" | "truncate" | "clear" => {
                let mut updated = text.to_string();
                let value = match name {
                    "push_str" | "push" => {
                        updated.push_str(&a0.display(Language::Rust));
                        Value::None
                    }
                    "insert" | "insert_str" => {
                        let at = a0.as_int().unwrap_or(0).max(0) as usize;
                        if at > updated.len() || !updated.is_char_boundary(at) {
                            return Err(self.fatal("panicked: assertion failed: self.is_char_boundary(idx)"));
                        }
                        updated.insert_str(at, &arg(args, 1).display(Language::Rust));
                        Value::None
                    }
                    "pop" => updated.pop().map_or(Value::None, Value::Char),
                    "remove" => {
                        let at = a0.as_int().unwrap_or(0).max(0) as usize;
                        if at >= updated.len() || !updated.is_char_boundary(at) {
                            return Err(self.fatal("panicked: cannot remove a char from the end of a string"));
                        }
                        Value::Char(updated.remove(at))
                    }
                    "truncate" => {
                        let at = (a0.as_int().unwrap_or(0).max(0) as usize).min(updated.len());
                        updated.truncate(at);
                        Value::None
                    }
                    _ => {
                        updated.clear();
                        Value::None
                    }
                };
                self.check_len(updated.len())?;
                return Ok(Some(MethodResult::updated(value, Value::Str(updated))));
            }
            _ => return Ok(None),
        };
        found(value)
    }

    // sequences

    fn sequence_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Method {
        if let Value::Range { start, end, step } = receiver {
            let (start, end, step) = (*start, *end, *step);
            match name {
                "rev" => {
                    let len = super::value::range_len(start, end, step) as i64;
                    let last = start + step * (len - 1);
                    return found(Value::Range {
                        start: if len == 0 { start } else { last },
                        end: if len == 0 { start } else { start - step },
                        step: -step,
                    });
                }
                "step_by" => {
                    let by = arg(&args, 0).as_int().unwrap_or(1).max(1);
                    return found(Value::Range { start, end, step: step * by });
                }
                "contains" => {
                    let needle = arg(&args, 0).deref();
                    let inside = super::ops::contains(receiver, &needle).unwrap_or(false);
                    return found(Value::Bool(inside));
                }
                _ => {}
            }
        }
        if let Value::List(_) = receiver {
            if let Some(result) = self.list_mutation(receiver, name, &args, &kwargs)? {
                return Ok(Some(result));
            }
        }
        let items = self.iterate(receiver)?;
        let value = self.iterator_method(items, name, args, kwargs)?;
        Ok(value.map(MethodResult::value))
    }

    /// Methods that may change a list in place.
    fn list_mutation(&mut self, receiver: &Value, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Method {
        let Value::List(list) = receiver else {
            return Ok(None);
        };
        let language = self.language;
        let len = list.borrow().len();
        let a0 = arg(args, 0);
        let value = match (language, name) {
            (Language::Python, "append") | (Language::Rust, "push" | "push_back") | (_, "push_back" | "emplace_back") => {
                self.check_len(len + 1)?;
                list.borrow_mut().push(a0);
                Value::None
            }
            (Language::Java, "add" | "addLast" | "offer" | "offerLast") if args.len() == 1 => {
                self.check_len(len + 1)?;
                list.borrow_mut().push(a0);
                if name == "addLast" { Value::None } else { Value::Bool(true) }
            }
            (Language::Java, "add") | (Language::Python, "insert") | (Language::Rust, "insert") if args.len() == 2 => {
                let raw = a0.as_int().unwrap_or(0);
                let at = match language {
                    Language::Python => {
                        let len = len as i64;
                        (if raw < 0 { (raw + len).max(0) } else { raw.min(len) }) as usize
                    }
                    _ => {
                        if raw < 0 || raw as usize > len {
                            return Err(self.list_index_error(raw, len, "insertion"));
                        }
                        raw as usize
                    }
                };
                self.check_len(len + 1)?;
                list.borrow_mut().insert(at, arg(args, 1));
                Value::None
            }
            (Language::Java, "push" | "addFirst" | "offerFirst") | (_, "push_front" | "emplace_front") => {
                self.check_len(len + 1)?;
                list.borrow_mut().insert(0, a0);
                Value::None
            }
            (Language::Python | Language::Rust, "extend" | "extend_from_slice" | "append")
            | (Language::Java, "addAll") => {
                let extra = self.iterate(&a0)?;
                self.check_len(len + extra.len())?;
                list.borrow_mut().extend(extra);
                if name == "append" {
                    // `Vec::append` empties its argument
                    replace_items(&a0, Vec::new());
                }
                if language == Language::Java { Value::Bool(true) } else { Value::None }
            }
            (Language::Python, "pop") => {
                if len == 0 {
                    return Err(self.raise("IndexError", "pop from empty list"));
                }
                let at = match args.first() {
                    Some(i) => {
                        let raw = i.as_int().unwrap_or(-1);
                        let at = if raw < 0 { raw + len as i64 } else { raw };
                        if at < 0 || at >= len as i64 {
                            return Err(self.raise("IndexError", "pop index out of range"));
                        }
                        at as usize
                    }
                    None => len - 1,
                };
                list.borrow_mut().remove(at)
            }
            (Language::Rust, "pop" | "pop_back") => list.borrow_mut().pop().unwrap_or(Value::None),
            (Language::Rust, "pop_front") => {
                if len == 0 {
                    Value::None
                } else {
                    list.borrow_mut().remove(0)
                }
            }
            (Language::C | Language::Cpp, "pop_back") => {
                if list.borrow_mut().pop().is_none() {
                    return Err(self.fatal("Segmentation fault: pop_back on an empty container"));
                }
                Value::None
            }
            (Language::C | Language::Cpp, "pop_front" | "pop") => {
                if len == 0 {
                    return Err(self.fatal("Segmentation fault: pop on an empty container"));
                }
                list.borrow_mut().remove(0);
                Value::None
            }
            (Language::C | Language::Cpp, "push") => {
                self.check_len(len + 1)?;
                list.borrow_mut().push(a0);
                Value::None
            }
            (Language::Java, "pop" | "remove" | "removeFirst" | "element" | "getFirst") if args.is_empty() => {
                if len == 0 {
                    return Err(self.raise("NoSuchElementException", ""));
                }
                if matches!(name, "element" | "getFirst") {
                    list.borrow()[0].clone()
                } else {
                    list.borrow_mut().remove(0)
                }
            }
            (Language::Java, "removeLast" | "getLast") => {
                if len == 0 {
                    return Err(self.raise("NoSuchElementException", ""));
                }
                if name == "getLast" {
                    list.borrow()[len - 1].clone()
                } else {
                    list.borrow_mut().remove(len - 1)
                }
            }
            (Language::Java, "poll" | "pollFirst") => match len {
                0 => Value::None,
                _ => list.borrow_mut().remove(0),
            },
            (Language::Java, "pollLast") => list.borrow_mut().pop().unwrap_or(Value::None),
            (Language::Java, "peek" | "peekFirst") => list.borrow().first().cloned().unwrap_or(Value::None),
            (Language::Java, "peekLast") => list.borrow().last().cloned().unwrap_or(Value::None),
            (Language::Java, "remove") => match a0 {
                Value::Int(raw) => {
                    if raw < 0 || raw as usize >= len {
                        return Err(self.list_index_error(raw, len, "index"));
                    }
                    list.borrow_mut().remove(raw as usize)
                }
                other => {
                    let position = list.borrow().iter().position(|v| v.equals(&other));
                    if let Some(i) = position {
                        list.borrow_mut().remove(i);
                    }
                    Value::Bool(position.is_some())
                }
            },
            (Language::Rust, "remove" | "swap_remove") => {
                if let Value::Ref(_) = a0 {
                    // `set.remove(&x)` on a plain vector used as a set
                    let position = list.borrow().iter().position(|v| v.equals(&a0));
                    if let Some(i) = position {
                        list.borrow_mut().remove(i);
                    }
                    Value::Bool(position.is_some())
                } else {
                    let raw = a0.as_int().unwrap_or(0);
                    if raw < 0 || raw as usize >= len {
                        return Err(self.list_index_error(raw, len, "removal"));
                    }
                    if name == "swap_remove" {
                        list.borrow_mut().swap_remove(raw as usize)
                    } else {
                        list.borrow_mut().remove(raw as usize)
                    }
                }
            }
            (Language::Python, "remove") => {
                let position = list.borrow().iter().position(|v| v.equals(&a0));
                match position {
                    Some(i) => {
                        list.borrow_mut().remove(i);
                        Value::None
                    }
                    None => return Err(self.raise("ValueError", "list.remove(x): x not in list")),
                }
            }
            (Language::Java, "set") => {
                let raw = a0.as_int().unwrap_or(0);
                if raw < 0 || raw as usize >= len {
                    return Err(self.list_index_error(raw, len, "index"));
                }
                std::mem::replace(&mut list.borrow_mut()[raw as usize], arg(args, 1))
            }
            (_, "sort" | "sort_unstable" | "sort_by" | "sort_unstable_by" | "sort_by_key" | "sort_unstable_by_key") => {
                let items = list.borrow().clone();
                let key = kwargs.iter().find(|(k, _)| k == "key").map(|(_, v)| v.clone()).filter(|k| !matches!(k, Value::None));
                let reverse = kwargs.iter().any(|(k, v)| k == "reverse" && v.truthy());
                let sorted = match (name, &key, args.first()) {
                    (_, Some(key), _) => self.sort_values(items, &SortBy::Key(key), reverse)?,
                    ("sort_by_key" | "sort_unstable_by_key", _, Some(f)) => self.sort_values(items, &SortBy::Key(f), false)?,
                    (_, _, Some(Value::Function(order))) if order == "reverseOrder" => {
                        self.sort_values(items, &SortBy::Natural, true)?
                    }
                    (_, _, Some(Value::None)) | (_, _, None) => self.sort_values(items, &SortBy::Natural, reverse)?,
                    (_, _, Some(comparator)) => self.sort_values(items, &SortBy::Comparator(comparator), false)?,
                };
                *list.borrow_mut() = sorted;
                Value::None
            }
            (_, "reverse") => {
                list.borrow_mut().reverse();
                Value::None
            }
            (_, "clear") => {
                list.borrow_mut().clear();
                Value::None
            }
            (Language::Rust, "truncate") => {
                let keep = a0.as_int().unwrap_or(0).max(0) as usize;
                list.borrow_mut().truncate(keep);
                Value::None
            }
            (Language::Rust | Language::Cpp, "resize") => {
                let size = a0.as_int().unwrap_or(0).max(0) as usize;
                self.check_len(size)?;
                let fill = match (args.get(1), list.borrow().first()) {
                    (Some(fill), _) => fill.clone(),
                    (None, Some(Value::Float(_))) => Value::Float(0.0),
                    (None, Some(Value::Str(_))) => Value::str(""),
                    (None, _) => Value::Int(0),
                };
                list.borrow_mut().resize(size, fill);
                Value::None
            }
            (Language::Rust, "fill") | (Language::Cpp, "assign") => {
                let (count, fill) = match name {
                    "assign" => (a0.as_int().unwrap_or(0).max(0) as usize, arg(args, 1)),
                    _ => (len, a0),
                };
                self.check_len(count)?;
                *list.borrow_mut() = vec![fill; count];
                Value::None
            }
            (Language::Rust, "dedup") => {
                let mut items = list.borrow().clone();
                items.dedup_by(|a, b| a.equals(b));
                *list.borrow_mut() = items;
                Value::None
            }
            (Language::Rust, "retain") | (Language::Java, "removeIf") => {
                let items = list.borrow().clone();
                let mut kept = Vec::with_capacity(items.len());
                let mut removed = false;
                for item in items {
                    let verdict = self.call_value(&a0, vec![item.clone()])?.truthy();
                    if verdict == (name == "retain") {
                        kept.push(item);
                    } else {
                        removed = true;
                    }
                }
                *list.borrow_mut() = kept;
                if name == "removeIf" { Value::Bool(removed) } else { Value::None }
            }
            (Language::Java, "replaceAll") => {
                let items = list.borrow().clone();
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(self.call_value(&a0, vec![item])?);
                }
                *list.borrow_mut() = mapped;
                Value::None
            }
            (Language::Rust, "drain") => {
                let (from, to) = match a0 {
                    Value::Range { start, end, .. } => (start.clamp(0, len as i64) as usize, end.clamp(0, len as i64) as usize),
                    _ => (0, len),
                };
                let drained: Vec<Value> = list.borrow_mut().drain(from..to.max(from)).collect();
                Value::list(drained)
            }
            (_, "swap") if args.len() == 2 => {
                let i = self.position(&a0, len)?;
                let j = self.position(&arg(args, 1), len)?;
                list.borrow_mut().swap(i, j);
                Value::None
            }
            (Language::Cpp, "swap") => {
                if let Value::List(other) = a0.deref() {
                    let mine = std::mem::take(&mut *list.borrow_mut());
                    let theirs = std::mem::replace(&mut *other.borrow_mut(), mine);
                    *list.borrow_mut() = theirs;
                }
                Value::None
            }
            (Language::Rust, "insert") if args.len() == 1 => {
                // a vector standing in for a set
                if list.borrow().iter().any(|v| v.equals(&a0)) {
                    Value::Bool(false)
                } else {
                    list.borrow_mut().push(a0);
                    Value::Bool(true)
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(MethodResult::mutated(value)))
    }

    fn list_index_error(&mut self, index: i64, len: usize, what: &str) -> Fault {
        match self.language {
            Language::Java => self.raise(
                "IndexOutOfBoundsException",
                format!("Index {} out of bounds for length {}", index, len),
            ),
            Language::Rust if what == "insertion" => self.fatal(format!(
                "panicked: insertion index (is {}) should be <= len (is {})",
                index, len
            )),
            Language::Rust => self.fatal(format!(
                "panicked: removal index (is {}) should be < len (is {})",
                index, len
            )),
            Language::Python => self.raise("IndexError", "list index out of range"),
            _ => self.raise(
                "out_of_range",
                format!("vector::_M_range_check: __n (which is {}) >= this->size() (which is {})", index, len),
            ),
        }
    }

    /// Read-only methods over a sequence's items: accessors, iterator
    /// adapters and java streams.
    fn iterator_method(
        &mut self,
        items: Vec<Value>,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Option<Value>, Fault> {
        let language = self.language;
        let a0 = arg(&args, 0);
        let len = items.len();
        let value = match name {
            "len" | "size" | "length" | "__len__" => Value::Int(len as i64),
            "count" if args.is_empty() => Value::Int(len as i64),
            "is_empty" | "isEmpty" | "empty" => Value::Bool(len == 0),
            "contains" | "includes" => Value::Bool(items.iter().any(|v| v.equals(&a0))),
            "count" => Value::Int(items.iter().filter(|v| v.equals(&a0)).count() as i64),
            "index" | "indexOf" | "lastIndexOf" => {
                let position = if name == "lastIndexOf" {
                    items.iter().rposition(|v| v.equals(&a0))
                } else {
                    items.iter().position(|v| v.equals(&a0))
                };
                match (position, language) {
                    (Some(i), _) => Value::Int(i as i64),
                    (None, Language::Python) => {
                        return Err(self.raise("ValueError", format!("{} is not in list", a0.repr(Language::Python))))
                    }
                    (None, _) => Value::Int(-1),
                }
            }
            "get" | "at" => {
                let raw = a0.as_int().unwrap_or(0);
                match (language, items.get(raw.max(0) as usize)) {
                    (_, Some(item)) if raw >= 0 => item.clone(),
                    (Language::Rust, _) => Value::None,
                    _ => return Err(self.list_index_error(raw, len, "index")),
                }
            }
            "first" | "front" | "last" | "back" | "peek" | "top" => {
                let item = if matches!(name, "first" | "front") { items.first() } else { items.last() };
                match (item, language) {
                    (Some(item), _) => item.clone(),
                    (None, Language::Rust | Language::Java) => Value::None,
                    (None, _) => return Err(self.fatal("Segmentation fault: access to an empty container")),
                }
            }
            "getKey" if len == 2 => items[0].clone(),
            "getValue" if len == 2 => items[1].clone(),
            "iter" | "into_iter" | "iter_mut" | "stream" | "cloned" | "copied" | "to_vec" | "toList" | "toArray"
            | "peekable" | "boxed" | "asList" | "copy" | "sequential" | "parallelStream" | "into_values"
            | "begin" | "into_vec" => Value::list(items),
            "end" => Value::None,
            "collect" => self.collect(items, &args, &kwargs)?,
            "rev" | "reversed" | "rbegin" => {
                let mut items = items;
                items.reverse();
                Value::list(items)
            }
            "map" | "mapToInt" | "mapToObj" | "mapToDouble" | "mapToLong" | "asDoubleStream" => {
                let mut out = Vec::with_capacity(len);
                for item in items {
                    out.push(match &a0 {
                        Value::None => item,
                        f => self.call_value(f, vec![item])?,
                    });
                }
                Value::list(out)
            }
            "filter" => {
                let mut out = Vec::new();
                for item in items {
                    if self.call_value(&a0, vec![item.clone()])?.truthy() {
                        out.push(item);
                    }
                }
                Value::list(out)
            }
            "filter_map" => {
                let mut out = Vec::new();
                for item in items {
                    match self.call_value(&a0, vec![item])? {
                        Value::None => {}
                        Value::Exception { kind, .. } if kind == "Err" => {}
                        kept => out.push(kept),
                    }
                }
                Value::list(out)
            }
            "flat_map" | "flatMap" | "flatten" => {
                let mut out = Vec::new();
                for item in items {
                    let produced = match name {
                        "flatten" => item,
                        _ => self.call_value(&a0, vec![item])?,
                    };
                    if !matches!(produced, Value::None) {
                        out.extend(self.iterate(&produced)?);
                    }
                }
                self.check_len(out.len())?;
                Value::list(out)
            }
            "for_each" | "forEach" | "inspect" => {
                for item in &items {
                    self.call_value(&a0, vec![item.clone()])?;
                }
                if name == "inspect" { Value::list(items) } else { Value::None }
            }
            "sum" | "product" => {
                let (op, mut total) = match name {
                    "sum" => (BinOp::Add, Value::Int(0)),
                    _ => (BinOp::Mul, Value::Int(1)),
                };
                for item in &items {
                    total = self.binary(op, &total, item)?;
                }
                total
            }
            "average" => match len {
                0 => Value::None,
                _ => {
                    let total: f64 = items.iter().filter_map(Value::as_f64).sum();
                    Value::Float(total / len as f64)
                }
            },
            "min" | "max" if args.is_empty() || matches!(a0, Value::Closure(_) | Value::Function(_)) => {
                if items.is_empty() {
                    match language {
                        Language::Python => {
                            return Err(self.raise("ValueError", format!("{}() arg is an empty sequence", name)))
                        }
                        _ => Value::None,
                    }
                } else {
                    let by = match &a0 {
                        Value::None => SortBy::Natural,
                        comparator => SortBy::Comparator(comparator),
                    };
                    // rust keeps the last of equal maxima
                    let mut items = items;
                    if name == "max" && language == Language::Rust {
                        items.reverse();
                    }
                    self.extreme(items, by, name == "max")?
                }
            }
            "min_by_key" | "max_by_key" | "min_by" | "max_by" => {
                if items.is_empty() {
                    Value::None
                } else {
                    let by = if name.ends_with("key") { SortBy::Key(&a0) } else { SortBy::Comparator(&a0) };
                    let max = name.starts_with("max");
                    let mut items = items;
                    if max {
                        items.reverse();
                    }
                    self.extreme(items, by, max)?
                }
            }
            "enumerate" => Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(i as i64), v]))
                    .collect(),
            ),
            "zip" => {
                let other = self.iterate(&a0)?;
                Value::list(
                    items
                        .into_iter()
                        .zip(other)
                        .map(|(a, b)| Value::tuple(vec![a, b]))
                        .collect(),
                )
            }
            "unzip" => {
                let mut left = Vec::with_capacity(len);
                let mut right = Vec::with_capacity(len);
                for item in items {
                    let mut pair = self.iterate(&item)?.into_iter();
                    left.push(pair.next().unwrap_or(Value::None));
                    right.push(pair.next().unwrap_or(Value::None));
                }
                Value::tuple(vec![Value::list(left), Value::list(right)])
            }
            "chain" | "concat" if !args.is_empty() => {
                let mut items = items;
                items.extend(self.iterate(&a0)?);
                self.check_len(items.len())?;
                Value::list(items)
            }
            "take" | "limit" | "skip" | "step_by" => {
                let n = a0.as_int().unwrap_or(0).max(0) as usize;
                Value::list(match name {
                    "take" | "limit" => items.into_iter().take(n).collect(),
                    "skip" => items.into_iter().skip(n).collect(),
                    _ => items.into_iter().step_by(n.max(1)).collect(),
                })
            }
            "take_while" | "takeWhile" | "skip_while" | "dropWhile" => {
                let mut cut = len;
                for (i, item) in items.iter().enumerate() {
                    if !self.call_value(&a0, vec![item.clone()])?.truthy() {
                        cut = i;
                        break;
                    }
                }
                let mut items = items;
                let rest = items.split_off(cut);
                Value::list(if matches!(name, "take_while" | "takeWhile") { items } else { rest })
            }
            "any" | "anyMatch" | "all" | "allMatch" | "noneMatch" => {
                let mut hits = 0;
                for item in &items {
                    if self.call_value(&a0, vec![item.clone()])?.truthy() {
                        hits += 1;
                        if name.starts_with("any") || name == "noneMatch" {
                            break;
                        }
                    } else if name.starts_with("all") {
                        break;
                    }
                }
                Value::Bool(match name {
                    "any" | "anyMatch" => hits > 0,
                    "noneMatch" => hits == 0,
                    _ => hits == len,
                })
            }
            "position" | "find" | "findFirst" | "findAny" | "rposition" => {
                if args.is_empty() {
                    items.into_iter().next().unwrap_or(Value::None)
                } else {
                    let mut hit = Value::None;
                    let order: Vec<usize> = if name == "rposition" { (0..len).rev().collect() } else { (0..len).collect() };
                    for i in order {
                        if self.call_value(&a0, vec![items[i].clone()])?.truthy() {
                            hit = if name == "find" { items[i].clone() } else { Value::Int(i as i64) };
                            break;
                        }
                    }
                    hit
                }
            }
            "fold" | "reduce" => {
                let (mut acc, f, rest) = match (name, args.len()) {
                    ("fold", _) | ("reduce", 2) => (a0.clone(), arg(&args, 1), items),
                    _ => {
                        let mut rest = items.into_iter();
                        match rest.next() {
                            Some(first) => (first, a0.clone(), rest.collect()),
                            None => return Ok(Some(Value::None)),
                        }
                    }
                };
                for item in rest {
                    acc = self.call_value(&f, vec![acc, item])?;
                }
                acc
            }
            "nth" => items.get(a0.as_int().unwrap_or(0).max(0) as usize).cloned().unwrap_or(Value::None),
            "windows" | "chunks" => {
                let n = a0.as_int().unwrap_or(1).max(1) as usize;
                let groups: Vec<Value> = if name == "windows" {
                    items.windows(n).map(|w| Value::list(w.to_vec())).collect()
                } else {
                    items.chunks(n).map(|c| Value::list(c.to_vec())).collect()
                };
                Value::list(groups)
            }
            "split_at" => {
                let at = a0.as_int().unwrap_or(0).max(0) as usize;
                if at > len {
                    return Err(self.fatal("panicked: mid > len"));
                }
                let mut items = items;
                let tail = items.split_off(at);
                Value::tuple(vec![Value::list(items), Value::list(tail)])
            }
            "join" | "concat" => {
                let sep = if name == "join" { a0.display(language) } else { String::new() };
                if name == "concat" && items.iter().all(|v| matches!(v, Value::List(_))) {
                    let mut out = Vec::new();
                    for item in &items {
                        out.extend(self.iterate(item)?);
                    }
                    Value::list(out)
                } else {
                    Value::Str(items.iter().map(|v| v.display(language)).collect::<Vec<_>>().join(&sep))
                }
            }
            "sorted" => {
                let sorted = match &a0 {
                    Value::None => self.sort_values(items, &SortBy::Natural, false)?,
                    Value::Function(order) if order == "reverseOrder" => self.sort_values(items, &SortBy::Natural, true)?,
                    comparator => self.sort_values(items, &SortBy::Comparator(comparator), false)?,
                };
                Value::list(sorted)
            }
            "distinct" | "dedup" => Value::list(dedup(items)),
            "last_index" => Value::Int(len as i64 - 1),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// `collect()` into the container the turbofish, collector or target
    /// names.
    fn collect(&mut self, items: Vec<Value>, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value, Fault> {
        let target = kwargs
            .iter()
            .find(|(k, _)| k == "__type")
            .map(|(_, v)| v.display(Language::Rust))
            .unwrap_or_default();
        if let Some(Value::Tuple(collector)) = args.first() {
            if matches!(collector.first(), Some(Value::Str(tag)) if tag == "__joining") {
                let sep = collector.get(1).map(|s| s.display(self.language)).unwrap_or_default();
                let parts: Vec<String> = items.iter().map(|v| v.display(self.language)).collect();
                return Ok(Value::Str(parts.join(&sep)));
            }
        }
        if let Some(Value::Function(collector)) = args.first() {
            if collector == "toSet" {
                return Ok(self.new_set(items));
            }
        }
        Ok(match target.split('<').next().unwrap_or("") {
            "String" => Value::Str(items.iter().map(|v| v.display(Language::Rust)).collect()),
            "HashSet" | "BTreeSet" => self.new_set(items),
            "HashMap" | "BTreeMap" => {
                let mut entries: Vec<(Value, Value)> = Vec::new();
                for item in items {
                    let mut pair = self.iterate(&item)?.into_iter();
                    let key = pair.next().unwrap_or(Value::None);
                    let value = pair.next().unwrap_or(Value::None);
                    match entries.iter_mut().find(|(k, _)| k.equals(&key)) {
                        Some(entry) => entry.1 = value,
                        None => entries.push((key, value)),
                    }
                }
                Value::dict(entries)
            }
            _ => Value::list(items),
        })
    }

    // maps

    fn dict_method(&mut self, receiver: &Value, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Method {
        let Value::Dict(map) = receiver else {
            return Ok(None);
        };
        let language = self.language;
        let key = arg(args, 0).deref();
        let lookup = |key: &Value| map.borrow().iter().find(|(k, _)| k.equals(key)).map(|(_, v)| v.clone());
        let ordered = ordered_entries(&map.borrow(), language);
        let len = ordered.len();

        // read-only
        let value = match name {
            "keys" | "keySet" | "into_keys" => Some(Value::list(ordered.iter().map(|(k, _)| k.clone()).collect())),
            "values" | "values_mut" | "into_values" => Some(Value::list(ordered.iter().map(|(_, v)| v.clone()).collect())),
            "items" | "entrySet" | "iter" | "into_iter" | "iter_mut" | "begin" => Some(Value::list(
                ordered.iter().map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()])).collect(),
            )),
            "len" | "size" | "__len__" => Some(Value::Int(len as i64)),
            "is_empty" | "isEmpty" | "empty" => Some(Value::Bool(len == 0)),
            "contains_key" | "containsKey" | "contains" | "__contains__" => Some(Value::Bool(lookup(&key).is_some())),
            "containsValue" => Some(Value::Bool(ordered.iter().any(|(_, v)| v.equals(&key)))),
            "count" => Some(Value::Int(lookup(&key).is_some() as i64)),
            "find" => Some(match lookup(&key) {
                Some(value) => Value::tuple(vec![key.clone(), value]),
                None => Value::None,
            }),
            "end" => Some(Value::None),
            "get" | "get_mut" => match (lookup(&key), args.get(1)) {
                (Some(v), _) => Some(v),
                (None, Some(default)) => Some(default.clone()),
                (None, None) => Some(Value::None),
            },
            "getOrDefault" => Some(lookup(&key).unwrap_or_else(|| arg(args, 1))),
            "at" => match lookup(&key) {
                Some(v) => Some(v),
                None => return Err(self.raise("out_of_range", "map::at")),
            },
            "copy" => Some(Value::dict(map.borrow().clone())),
            "entry" => Some(Value::tuple(vec![Value::str("__entry"), receiver.clone(), key.clone()])),
            "forEach" => {
                for (k, v) in &ordered {
                    self.call_value(&arg(args, 0), vec![k.clone(), v.clone()])?;
                }
                Some(Value::None)
            }
            _ => None,
        };
        if let Some(value) = value {
            return found(value);
        }

        let value = match name {
            "insert" | "put" | "emplace" | "insert_or_assign" => {
                let (key, value) = match args.len() {
                    1 => {
                        let mut pair = self.iterate(&key)?.into_iter();
                        (pair.next().unwrap_or(Value::None), pair.next().unwrap_or(Value::None))
                    }
                    _ => (key.clone(), arg(args, 1)),
                };
                let previous = lookup(&key);
                // c++ insert leaves an existing key alone
                let keep = language == Language::Cpp && name != "insert_or_assign" && previous.is_some();
                if !keep {
                    self.store_pair(map, key, value)?;
                }
                match language {
                    Language::Cpp => Value::Bool(!keep),
                    _ => previous.unwrap_or(Value::None),
                }
            }
            "putIfAbsent" | "setdefault" => match lookup(&key) {
                Some(existing) => existing,
                None => {
                    let value = arg(args, 1);
                    self.store_pair(map, key.clone(), value.clone())?;
                    if name == "putIfAbsent" { Value::None } else { value }
                }
            },
            "computeIfAbsent" => match lookup(&key) {
                Some(existing) => existing,
                None => {
                    let value = self.call_value(&arg(args, 1), vec![key.clone()])?;
                    self.store_pair(map, key.clone(), value.clone())?;
                    value
                }
            },
            "compute" | "computeIfPresent" => {
                let previous = lookup(&key);
                if name == "computeIfPresent" && previous.is_none() {
                    return found(Value::None);
                }
                let value = self.call_value(&arg(args, 1), vec![key.clone(), previous.unwrap_or(Value::None)])?;
                self.store_pair(map, key.clone(), value.clone())?;
                value
            }
            "merge" => {
                let value = match lookup(&key) {
                    Some(existing) => {
                        let combiner = arg(args, 2);
                        match &combiner {
                            Value::Function(f) if f == "sum" => self.binary(BinOp::Add, &existing, &arg(args, 1))?,
                            _ => self.call_value(&combiner, vec![existing, arg(args, 1)])?,
                        }
                    }
                    None => arg(args, 1),
                };
                self.store_pair(map, key.clone(), value.clone())?;
                value
            }
            "remove" | "erase" | "pop" => {
                let position = map.borrow().iter().position(|(k, _)| k.equals(&key));
                match (position, language) {
                    (Some(i), Language::Cpp) => {
                        map.borrow_mut().remove(i);
                        Value::Int(1)
                    }
                    (Some(i), _) => map.borrow_mut().remove(i).1,
                    (None, Language::Python) => match args.get(1) {
                        Some(default) => default.clone(),
                        None => return Err(self.raise("KeyError", key.repr(Language::Python))),
                    },
                    (None, Language::Cpp) => Value::Int(0),
                    (None, _) => Value::None,
                }
            }
            "popitem" => match map.borrow_mut().pop() {
                Some((k, v)) => Value::tuple(vec![k, v]),
                None => return Err(self.raise("KeyError", "'popitem(): dictionary is empty'")),
            },
            "update" | "putAll" | "extend" => {
                let mut pairs = Vec::new();
                if let Some(source) = args.first() {
                    match source.deref() {
                        Value::Dict(other) => pairs.extend(other.borrow().iter().cloned()),
                        other => {
                            for item in self.iterate(&other)? {
                                let mut pair = self.iterate(&item)?.into_iter();
                                pairs.push((pair.next().unwrap_or(Value::None), pair.next().unwrap_or(Value::None)));
                            }
                        }
                    }
                }
                pairs.extend(kwargs.iter().map(|(k, v)| (Value::str(k.as_str()), v.clone())));
                for (k, v) in pairs {
                    self.store_pair(map, k, v)?;
                }
                Value::None
            }
            "clear" => {
                map.borrow_mut().clear();
                Value::None
            }
            "retain" => {
                let entries = map.borrow().clone();
                let mut kept = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    if self.call_value(&arg(args, 0), vec![k.clone(), v.clone()])?.truthy() {
                        kept.push((k, v));
                    }
                }
                *map.borrow_mut() = kept;
                Value::None
            }
            _ => return Ok(None),
        };
        Ok(Some(MethodResult::mutated(value)))
    }

    fn store_pair(&mut self, map: &super::value::DictRef, key: Value, value: Value) -> Result<(), Fault> {
        let position = map.borrow().iter().position(|(k, _)| k.equals(&key));
        match position {
            Some(i) => map.borrow_mut()[i].1 = value,
            None => {
                let len = map.borrow().len();
                self.check_len(len + 1)?;
                map.borrow_mut().push((key, value));
            }
        }
        Ok(())
    }

    /// `map.entry(k)` handle: `or_insert` and friends.
    fn entry_method(&mut self, entry: &[Value], name: &str, args: &[Value]) -> Method {
        let (Some(Value::Dict(map)), Some(key)) = (entry.get(1), entry.get(2)) else {
            return Ok(None);
        };
        let existing = map.borrow().iter().find(|(k, _)| k.equals(key)).map(|(_, v)| v.clone());
        let value = match (name, existing) {
            ("key", _) => return found(key.clone()),
            ("and_modify", Some(current)) => {
                let updated = self.call_value(&arg(args, 0), vec![current])?;
                if !matches!(updated, Value::None) {
                    self.store_pair(map, key.clone(), updated)?;
                }
                return Ok(Some(MethodResult::mutated(Value::tuple(entry.to_vec()))));
            }
            ("and_modify", None) => return found(Value::tuple(entry.to_vec())),
            ("or_insert" | "or_insert_with" | "or_default" | "or_insert_with_key", Some(current)) => current,
            ("or_insert", None) => arg(args, 0),
            ("or_insert_with", None) => self.call_value(&arg(args, 0), Vec::new())?,
            ("or_insert_with_key", None) => self.call_value(&arg(args, 0), vec![key.clone()])?,
            ("or_default", None) => Value::Int(0),
            _ => return Ok(None),
        };
        self.store_pair(map, key.clone(), value.clone())?;
        Ok(Some(MethodResult::mutated(value)))
    }

    // library objects

    fn heap_method(&mut self, heap: &Value, name: &str, args: &[Value]) -> Method {
        let len = heap.len().unwrap_or(0);
        let value = match name {
            "add" | "offer" | "push" | "emplace" => {
                self.heap_push(heap, arg(args, 0))?;
                let value = if self.language == Language::Java { Value::Bool(true) } else { Value::None };
                return Ok(Some(MethodResult::mutated(value)));
            }
            "poll" | "pop" | "remove" => {
                let top = self.heap_pop(heap)?;
                let value = match (top, self.language, name) {
                    (Some(_), Language::Cpp, _) => Value::None,
                    (Some(top), _, _) => top,
                    (None, Language::Java, "remove") => return Err(self.raise("NoSuchElementException", "")),
                    (None, Language::Cpp, _) => return Err(self.fatal("Segmentation fault: pop on an empty priority_queue")),
                    (None, _, _) => Value::None,
                };
                return Ok(Some(MethodResult::mutated(value)));
            }
            "peek" | "top" | "element" => match (self.heap_peek(heap), name) {
                (Some(top), _) => top,
                (None, "top") => return Err(self.fatal("Segmentation fault: top on an empty priority_queue")),
                (None, "element") => return Err(self.raise("NoSuchElementException", "")),
                (None, _) => Value::None,
            },
            "size" | "len" => Value::Int(len as i64),
            "isEmpty" | "is_empty" | "empty" => Value::Bool(len == 0),
            "contains" => Value::Bool(heap.items().unwrap_or_default().iter().any(|v| v.equals(&arg(args, 0)))),
            "clear" => {
                if let Some(list) = payload_list(heap) {
                    list.borrow_mut().clear();
                }
                return Ok(Some(MethodResult::mutated(Value::None)));
            }
            "into_sorted_vec" => {
                let items = heap.items().unwrap_or_default();
                Value::list(self.sort_values(items, &SortBy::Natural, false)?)
            }
            "into_vec" | "iter" | "stream" | "toArray" => Value::list(heap.items().unwrap_or_default()),
            _ => return Ok(None),
        };
        found(value)
    }

    fn object_method(&mut self, receiver: &Value, class: &str, name: &str, args: &[Value]) -> Method {
        match class {
            "StringBuilder" => self.builder_method(receiver, name, args),
            "Stack" => self.stack_method(receiver, name, args),
            "Scanner" | "BufferedReader" => match name {
                "hasNext" | "hasNextInt" | "hasNextLine" | "hasNextDouble" | "ready" => found(Value::Bool(false)),
                "close" => found(Value::None),
                "readLine" => found(Value::None),
                _ => Err(self.raise("NoSuchElementException", "No line found")),
            },
            "Random" => {
                let value = match name {
                    "nextInt" | "nextLong" => match arg(args, 0).as_int() {
                        Some(bound) if bound > 0 => Value::Int((self.next_random() % bound as u64) as i64),
                        Some(_) => return Err(self.raise("IllegalArgumentException", "bound must be positive")),
                        None => Value::Int(self.next_random() as i64),
                    },
                    "nextDouble" => Value::Float(self.random_unit()),
                    "nextBoolean" => Value::Bool(self.next_random() % 2 == 0),
                    _ => return Ok(None),
                };
                found(value)
            }
            _ => {
                let Value::Object(object) = receiver else {
                    return Ok(None);
                };
                let message = object.borrow().get("message").cloned();
                match (name, message) {
                    ("getMessage" | "what" | "message", Some(message)) => found(message),
                    _ => Ok(None),
                }
            }
        }
    }

    fn builder_method(&mut self, builder: &Value, name: &str, args: &[Value]) -> Method {
        let Value::Object(object) = builder else {
            return Ok(None);
        };
        let text = object.borrow().payload().map(|p| p.display(Language::Java)).unwrap_or_default();
        let mut chars: Vec<char> = text.chars().collect();
        let len = chars.len() as i64;
        let a0 = arg(args, 0);
        let check = |i: i64, limit: i64| i >= 0 && i <= limit;
        match name {
            "toString" => return found(Value::Str(text)),
            "length" => return found(Value::Int(len)),
            "isEmpty" => return found(Value::Bool(len == 0)),
            "charAt" => {
                let i = a0.as_int().unwrap_or(0);
                if !check(i, len - 1) {
                    return Err(self.raise("StringIndexOutOfBoundsException", format!("index {},length {}", i, len)));
                }
                return found(Value::Char(chars[i as usize]));
            }
            "indexOf" => {
                let needle = a0.display(Language::Java);
                return found(Value::Int(char_find(&text, &needle, 0).map_or(-1, |p| p as i64)));
            }
            "append" => {
                let piece = self.java_text(&a0)?;
                chars.extend(piece.chars());
            }
            "insert" => {
                let at = a0.as_int().unwrap_or(0);
                if !check(at, len) {
                    return Err(self.raise("StringIndexOutOfBoundsException", format!("offset {}, length {}", at, len)));
                }
                let piece = self.java_text(&arg(args, 1))?;
                let at = at as usize;
                chars.splice(at..at, piece.chars());
            }
            "reverse" => chars.reverse(),
            "setCharAt" | "deleteCharAt" => {
                let i = a0.as_int().unwrap_or(0);
                if !check(i, len - 1) {
                    return Err(self.raise("StringIndexOutOfBoundsException", format!("index {},length {}", i, len)));
                }
                if name == "deleteCharAt" {
                    chars.remove(i as usize);
                } else if let Value::Char(c) = arg(args, 1) {
                    chars[i as usize] = c;
                }
            }
            "delete" | "replace" => {
                let start = a0.as_int().unwrap_or(0);
                let end = arg(args, 1).as_int().unwrap_or(len).min(len);
                if start < 0 || start > end {
                    return Err(self.raise("StringIndexOutOfBoundsException", format!("start {}, end {}, length {}", start, end, len)));
                }
                let replacement: Vec<char> = match name {
                    "replace" => arg(args, 2).display(Language::Java).chars().collect(),
                    _ => Vec::new(),
                };
                chars.splice(start as usize..end as usize, replacement);
            }
            "setLength" => {
                let size = self.check_repeat(1, a0.as_int().unwrap_or(0), true)?;
                chars.resize(size, '\0');
            }
            _ => return Ok(None),
        }
        self.check_len(chars.len())?;
        object.borrow_mut().set(PAYLOAD, Value::Str(chars.into_iter().collect()));
        Ok(Some(MethodResult::mutated(builder.clone())))
    }

    fn stack_method(&mut self, stack: &Value, name: &str, args: &[Value]) -> Method {
        let Some(list) = payload_list(stack) else {
            return Ok(None);
        };
        let len = list.borrow().len();
        let empty_error = |this: &mut Self| match this.language {
            Language::Java => this.raise("EmptyStackException", ""),
            _ => this.fatal("Segmentation fault: access to an empty stack"),
        };
        let value = match name {
            "push" | "emplace" | "add" | "addElement" => {
                self.check_len(len + 1)?;
                list.borrow_mut().push(arg(args, 0));
                let value = if self.language == Language::Java { arg(args, 0) } else { Value::None };
                return Ok(Some(MethodResult::mutated(value)));
            }
            "pop" => {
                let Some(top) = list.borrow_mut().pop() else {
                    return Err(empty_error(self));
                };
                let value = if self.language == Language::Java { top } else { Value::None };
                return Ok(Some(MethodResult::mutated(value)));
            }
            "peek" | "top" | "lastElement" => match list.borrow().last() {
                Some(top) => top.clone(),
                None => return Err(empty_error(self)),
            },
            "empty" | "isEmpty" => Value::Bool(len == 0),
            "size" => Value::Int(len as i64),
            "get" | "elementAt" => {
                let i = arg(args, 0).as_int().unwrap_or(0);
                match list.borrow().get(i.max(0) as usize) {
                    Some(item) if i >= 0 => item.clone(),
                    _ => return Err(self.raise("ArrayIndexOutOfBoundsException", format!("Array index out of range: {}", i))),
                }
            }
            "contains" => Value::Bool(list.borrow().iter().any(|v| v.equals(&arg(args, 0)))),
            "search" => {
                let needle = arg(args, 0);
                let position = list.borrow().iter().rposition(|v| v.equals(&needle));
                Value::Int(position.map_or(-1, |p| (len - p) as i64))
            }
            "clear" => {
                list.borrow_mut().clear();
                return Ok(Some(MethodResult::mutated(Value::None)));
            }
            _ => return Ok(None),
        };
        found(value)
    }
}

fn float_method(f: f64, name: &str, other: &Value, args: &[Value]) -> Option<Value> {
    let o = other.as_f64().unwrap_or(0.0);
    Some(match name {
        "sqrt" => Value::Float(f.sqrt()),
        "cbrt" => Value::Float(f.cbrt()),
        "powi" | "powf" | "pow" => Value::Float(f.powf(o)),
        "abs" => Value::Float(f.abs()),
        "floor" => Value::Float(f.floor()),
        "ceil" => Value::Float(f.ceil()),
        "round" => Value::Float(f.round()),
        "trunc" => Value::Float(f.trunc()),
        "fract" => Value::Float(f.fract()),
        "exp" => Value::Float(f.exp()),
        "ln" => Value::Float(f.ln()),
        "log10" => Value::Float(f.log10()),
        "log2" => Value::Float(f.log2()),
        "log" => Value::Float(f.log(o)),
        "sin" => Value::Float(f.sin()),
        "cos" => Value::Float(f.cos()),
        "tan" => Value::Float(f.tan()),
        "asin" => Value::Float(f.asin()),
        "acos" => Value::Float(f.acos()),
        "atan" => Value::Float(f.atan()),
        "atan2" => Value::Float(f.atan2(o)),
        "hypot" => Value::Float(f.hypot(o)),
        "to_degrees" => Value::Float(f.to_degrees()),
        "to_radians" => Value::Float(f.to_radians()),
        "recip" => Value::Float(f.recip()),
        "signum" => Value::Float(f.signum()),
        "mul_add" => Value::Float(f.mul_add(o, arg(args, 1).as_f64().unwrap_or(0.0))),
        "min" => Value::Float(f.min(o)),
        "max" => Value::Float(f.max(o)),
        "clamp" => Value::Float(f.max(o).min(arg(args, 1).as_f64().unwrap_or(f))),
        "rem_euclid" => Value::Float(f.rem_euclid(o)),
        "is_nan" | "isNaN" => Value::Bool(f.is_nan()),
        "is_infinite" | "isInfinite" => Value::Bool(f.is_infinite()),
        "is_finite" => Value::Bool(f.is_finite()),
        "is_sign_negative" => Value::Bool(f.is_sign_negative()),
        "is_sign_positive" => Value::Bool(f.is_sign_positive()),
        "is_integer" => Value::Bool(f.fract() == 0.0),
        "intValue" | "longValue" => Value::Int(f as i64),
        "doubleValue" => Value::Float(f),
        _ => return None,
    })
}

fn clamp(value: &Value, low: &Value, high: &Value) -> Value {
    if value.compare(low) == Some(Ordering::Less) {
        low.clone()
    } else if value.compare(high) == Some(Ordering::Greater) {
        high.clone()
    } else {
        value.clone()
    }
}

fn char_method(c: char, name: &str, args: &[Value]) -> Option<Value> {
    let radix = arg(args, 0).as_int().unwrap_or(10) as u32;
    Some(match name {
        "is_alphabetic" | "is_ascii_alphabetic" => Value::Bool(c.is_alphabetic()),
        "is_numeric" => Value::Bool(c.is_numeric()),
        "is_alphanumeric" | "is_ascii_alphanumeric" => Value::Bool(c.is_alphanumeric()),
        "is_ascii_digit" => Value::Bool(c.is_ascii_digit()),
        "is_digit" => Value::Bool(c.is_digit(radix.clamp(2, 36))),
        "is_whitespace" | "is_ascii_whitespace" => Value::Bool(c.is_whitespace()),
        "is_uppercase" | "is_ascii_uppercase" => Value::Bool(c.is_uppercase()),
        "is_lowercase" | "is_ascii_lowercase" => Value::Bool(c.is_lowercase()),
        "is_ascii_punctuation" => Value::Bool(c.is_ascii_punctuation()),
        "is_ascii" => Value::Bool(c.is_ascii()),
        "is_control" | "is_ascii_control" => Value::Bool(c.is_control()),
        "to_digit" => c.to_digit(radix.clamp(2, 36)).map_or(Value::None, |d| Value::Int(d as i64)),
        "to_ascii_uppercase" => Value::Char(c.to_ascii_uppercase()),
        "to_ascii_lowercase" => Value::Char(c.to_ascii_lowercase()),
        "to_uppercase" => Value::Str(c.to_uppercase().collect()),
        "to_lowercase" => Value::Str(c.to_lowercase().collect()),
        "eq_ignore_ascii_case" => Value::Bool(match arg(args, 0).deref() {
            Value::Char(other) => c.eq_ignore_ascii_case(&other),
            _ => false,
        }),
        "len_utf8" => Value::Int(c.len_utf8() as i64),
        "cmp" | "partial_cmp" => Value::Int(ordering_int(match arg(args, 0).deref() {
            Value::Char(other) => c.cmp(&other),
            _ => Ordering::Equal,
        })),
        "charValue" => Value::Char(c),
        _ => return None,
    })
}

/// Index (in chars) of `needle` in `text` at or after char `from`.
fn char_find(text: &str, needle: &str, from: usize) -> Option<usize> {
    let start = text.char_indices().nth(from).map_or(text.len(), |(b, _)| b);
    if from > text.chars().count() {
        return None;
    }
    text[start..].find(needle).map(|b| from + text[start..start + b].chars().count())
}

fn char_rfind(text: &str, needle: &str) -> Option<usize> {
    text.rfind(needle).map(|b| text[..b].chars().count())
}

fn strip_with(text: &str, chars: Option<&str>, left: bool, right: bool) -> String {
    let matches = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let mut out = text;
    if left {
        out = out.trim_start_matches(matches);
    }
    if right {
        out = out.trim_end_matches(matches);
    }
    out.to_string()
}

fn python_split(text: &str, sep: Option<&str>, limit: i64, from_right: bool) -> Vec<String> {
    match (sep, limit < 0) {
        (None, true) => text.split_whitespace().map(str::to_string).collect(),
        (Some(sep), true) => text.split(sep).map(str::to_string).collect(),
        (Some(sep), false) if from_right => {
            let mut parts: Vec<String> = text.rsplitn(limit as usize + 1, sep).map(str::to_string).collect();
            parts.reverse();
            parts
        }
        (Some(sep), false) => text.splitn(limit as usize + 1, sep).map(str::to_string).collect(),
        (None, false) => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if parts.len() as i64 == limit {
                    parts.push(rest.trim_end().to_string());
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            parts
        }
    }
}

/// `String.split` drops trailing empty strings when `limit` is zero.
fn java_split(text: &str, re: &Regex, limit: i64) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut parts: Vec<String> = if limit > 0 {
        re.splitn(text, limit as usize).map(str::to_string).collect()
    } else {
        re.split(text).map(str::to_string).collect()
    };
    // a zero-width match at the start never yields a leading empty string
    if parts.len() > 1 && parts[0].is_empty() && re.find(text).is_some_and(|m| m.start() == 0 && m.end() == 0) {
        parts.remove(0);
    }
    if limit == 0 {
        while parts.len() > 1 && parts.last().is_some_and(String::is_empty) {
            parts.pop();
        }
        if parts.len() == 1 && parts[0].is_empty() && !text.is_empty() {
            parts.clear();
        }
    }
    parts
}

fn java_string_compare(a: &str, b: &str) -> i64 {
    for (x, y) in a.chars().zip(b.chars()) {
        if x != y {
            return x as i64 - y as i64;
        }
    }
    a.chars().count() as i64 - b.chars().count() as i64
}

fn java_hash(value: &Value) -> i64 {
    match value {
        Value::Str(s) => s.chars().fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32)) as i64,
        Value::Int(i) => (*i as i32) as i64,
        Value::Bool(b) => {
            if *b {
                1231
            } else {
                1237
            }
        }
        Value::Char(c) => *c as i64,
        _ => 0,
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut boundary = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(c);
            boundary = true;
        }
    }
    out
}

fn pad(text: &str, width: usize, fill: char, mode: &str) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let total = width - len;
    let (left, right) = match mode {
        "ljust" => (0, total),
        "rjust" => (total, 0),
        // python centers with the extra space on the right unless the
        // width is odd
        _ => {
            let left = total / 2 + (total & width & 1);
            (left, total - left)
        }
    };
    let fill = fill.to_string();
    format!("{}{}{}", fill.repeat(left), text, fill.repeat(right))
}

/// `str::parse` into the requested type; untyped parses pick int, then
/// float.
fn parse_rust(text: &str, target: &str) -> Value {
    let err = |message: &str| Value::Exception {
        kind: "Err".to_string(),
        message: message.to_string(),
    };
    match target {
        "f32" | "f64" => match text.parse::<f64>() {
            Ok(f) => Value::Float(f),
            Err(_) => err("invalid float literal"),
        },
        "char" => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Char(c),
                (None, _) => err("cannot parse char from empty string"),
                _ => err("too many characters in string"),
            }
        }
        "bool" => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => err("provided string was not `true` or `false`"),
        },
        "String" => Value::str(text),
        other => match text.parse::<i64>() {
            Ok(i) if other.starts_with('u') && i < 0 => err("invalid digit found in string"),
            Ok(i) => Value::Int(i),
            Err(_) if text.is_empty() => err("cannot parse integer from empty string"),
            Err(_) if other.is_empty() => match parse_float(text) {
                Some(f) if text.contains('.') => Value::Float(f),
                _ => err("invalid digit found in string"),
            },
            Err(_) => err("invalid digit found in string"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_find_counts_chars() {
        assert_eq!(char_find("héllo", "l", 0), Some(2));
        assert_eq!(char_find("héllo", "l", 3), Some(3));
        assert_eq!(char_find("abc", "z", 0), None);
        assert_eq!(char_rfind("abcabc", "b"), Some(4));
    }

    #[test]
    fn test_python_split() {
        assert_eq!(python_split("  a b  c ", None, -1, false), vec!["a", "b", "c"]);
        assert_eq!(python_split("a,b,c", Some(","), 1, false), vec!["a", "b,c"]);
        assert_eq!(python_split("a,b,c", Some(","), 1, true), vec!["a,b", "c"]);
        assert_eq!(python_split("a b c", None, 1, false), vec!["a", "b c"]);
    }

    #[test]
    fn test_java_split_drops_trailing_empties() {
        let re = Regex::new(",").unwrap();
        assert_eq!(java_split("a,b,,", &re, 0), vec!["a", "b"]);
        assert_eq!(java_split("a,b,,", &re, -1), vec!["a", "b", "", ""]);
    }

    #[test]
    fn test_java_string_semantics() {
        assert_eq!(java_string_compare("apple", "banana"), -1);
        assert_eq!(java_string_compare("ab", "abc"), -1);
        assert_eq!(java_hash(&Value::str("hi")), 3329);
    }

    #[test]
    fn test_python_padding() {
        assert_eq!(pad("ab", 5, '*', "center"), "*ab**");
        assert_eq!(pad("abc", 6, '*', "center"), "*abc**");
        assert_eq!(pad("7", 3, '0', "rjust"), "007");
    }

    #[test]
    fn test_parse_rust() {
        assert!(matches!(parse_rust("42", "i32"), Value::Int(42)));
        assert!(matches!(parse_rust("4.5", "f64"), Value::Float(_)));
        assert!(matches!(parse_rust("x", "i32"), Value::Exception { .. }));
    }
}
