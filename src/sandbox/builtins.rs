// Free functions, macros and constants each language provides without an import

use std::cmp::Ordering;
use std::f64::consts;

use super::format;
use super::interpreter::{Eval, Fault, Interpreter};
use super::ir::BinOp;
use super::value::Value;
use crate::grammar::Language;

const PYTHON_BUILTINS: &[&str] = &[
    "print", "len", "range", "str", "int", "float", "bool", "abs", "min", "max", "sum", "sorted", "reversed",
    "enumerate", "zip", "map", "filter", "any", "all", "list", "tuple", "dict", "set", "round", "pow", "divmod",
    "chr", "ord", "hex", "bin", "oct", "repr", "type", "isinstance", "input", "exit", "quit",
];

/// How a sort compares two items.
#[derive(Clone, Copy)]
pub(super) enum SortBy<'a> {
    Natural,
    /// python `key=`, rust `sort_by_key`
    Key(&'a Value),
    /// Returns a negative, zero or positive number (java `Comparator`,
    /// rust `sort_by`).
    Comparator(&'a Value),
    /// Returns whether the first argument sorts first (c++ `comp`).
    LessThan(&'a Value),
}

impl<'p> Interpreter<'p> {
    pub(super) fn is_builtin_function(&self, name: &str) -> bool {
        match self.language {
            Language::Python => PYTHON_BUILTINS.contains(&name),
            Language::Cpp => matches!(name, "greater" | "less"),
            _ => false,
        }
    }

    /// Unqualified names the runtime defines: `INT_MAX`, `NULL`.
    pub(super) fn builtin_constant(&self, name: &str) -> Option<Value> {
        match self.language {
            Language::C | Language::Cpp => Some(match name {
                "INT_MAX" => Value::Int(i32::MAX as i64),
                "INT_MIN" => Value::Int(i32::MIN as i64),
                "UINT_MAX" => Value::Int(u32::MAX as i64),
                "LONG_MAX" | "LLONG_MAX" => Value::Int(i64::MAX),
                "LONG_MIN" | "LLONG_MIN" => Value::Int(i64::MIN),
                "RAND_MAX" => Value::Int(i32::MAX as i64),
                "EOF" => Value::Int(-1),
                "NULL" | "nullptr" => Value::None,
                "M_PI" => Value::Float(consts::PI),
                "M_E" => Value::Float(consts::E),
                "endl" => Value::str("\n"),
                "npos" => Value::Int(-1),
                _ => return None,
            }),
            _ => None,
        }
    }

    /// Qualified constants: `Math.PI`, `i32::MAX`, `math.pi`.
    pub(super) fn static_value(&self, qualifier: &str, name: &str) -> Option<Value> {
        let owner = qualifier.rsplit("::").next().unwrap_or(qualifier);
        let owner = owner.rsplit('.').next().unwrap_or(owner);
        Some(match (owner, name) {
            ("Math" | "consts", "PI") | ("math", "pi") => Value::Float(consts::PI),
            ("Math" | "consts", "E") | ("math", "e") => Value::Float(consts::E),
            ("math", "tau") | ("consts", "TAU") => Value::Float(consts::TAU),
            ("math", "inf") => Value::Float(f64::INFINITY),
            ("math", "nan") => Value::Float(f64::NAN),
            ("sys", "maxsize") => Value::Int(i64::MAX),
            ("Integer", "MAX_VALUE") | ("i32", "MAX") => Value::Int(i32::MAX as i64),
            ("Integer", "MIN_VALUE") | ("i32", "MIN") => Value::Int(i32::MIN as i64),
            ("Long", "MAX_VALUE") | ("i64" | "isize", "MAX") => Value::Int(i64::MAX),
            ("Long", "MIN_VALUE") | ("i64" | "isize", "MIN") => Value::Int(i64::MIN),
            ("u32", "MAX") => Value::Int(u32::MAX as i64),
            ("u64" | "usize", "MAX") => Value::Int(i64::MAX),
            ("u8", "MAX") => Value::Int(u8::MAX as i64),
            ("i8", "MAX") => Value::Int(i8::MAX as i64),
            ("i16", "MAX") => Value::Int(i16::MAX as i64),
            ("u8" | "u16" | "u32" | "u64" | "usize", "MIN") => Value::Int(0),
            ("Double", "MAX_VALUE") | ("f64", "MAX") => Value::Float(f64::MAX),
            ("Double", "MIN_VALUE") => Value::Float(f64::MIN_POSITIVE),
            ("f64", "MIN") => Value::Float(f64::MIN),
            ("Double", "POSITIVE_INFINITY") | ("f64", "INFINITY") => Value::Float(f64::INFINITY),
            ("Double", "NEGATIVE_INFINITY") | ("f64", "NEG_INFINITY") => Value::Float(f64::NEG_INFINITY),
            ("f64", "EPSILON") => Value::Float(f64::EPSILON),
            ("Ordering", "Less") => Value::Int(-1),
            ("Ordering", "Equal") => Value::Int(0),
            ("Ordering", "Greater") => Value::Int(1),
            ("string", "npos") => Value::Int(-1),
            ("Boolean", "TRUE") => Value::Bool(true),
            ("Boolean", "FALSE") => Value::Bool(false),
            _ => return None,
        })
    }

    /// Dispatch a call that matched no user definition. `Ok(None)` means the
    /// name is not a builtin either.
    pub(super) fn call_builtin(
        &mut self,
        name: &str,
        qualifier: Option<&str>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Option<Value>, Fault> {
        let plain = qualifier.map_or(true, |q| q == "std" || q == "java.lang");
        if plain && self.program.class(name).is_none() && self.is_exception_kind(name) {
            let message = match args.first() {
                Some(first) => self.display_value(first)?,
                None => String::new(),
            };
            return Ok(Some(Value::Exception {
                kind: name.to_string(),
                message,
            }));
        }
        match self.language {
            Language::Python => self.python_builtin(name, qualifier, args, kwargs),
            Language::C | Language::Cpp => self.c_builtin(name, qualifier, args),
            Language::Java => self.java_builtin(name, qualifier, args),
            Language::Rust => self.rust_builtin(name, qualifier, args),
        }
    }

    /// Library types constructed with `new` that the program does not define.
    pub(super) fn builtin_construct(&mut self, class: &str, args: &[Value]) -> Result<Option<Value>, Fault> {
        let base = class.split('<').next().unwrap_or(class).trim();
        let base = base.rsplit("::").next().unwrap_or(base);
        let source = match args.first().map(Value::deref) {
            Some(items @ (Value::List(_) | Value::Tuple(_))) => items.items().unwrap_or_default(),
            Some(wrapped @ Value::Object(_)) if wrapped.payload().is_some() => wrapped.items().unwrap_or_default(),
            _ => Vec::new(),
        };
        Ok(Some(match base {
            "ArrayList" | "LinkedList" | "ArrayDeque" | "Vector" | "vector" | "deque" | "queue" | "list" => {
                Value::list(source)
            }
            "HashSet" | "TreeSet" | "LinkedHashSet" | "set" | "unordered_set" | "multiset" => self.new_set(source),
            "Stack" | "stack" => Value::wrapper("Stack", Value::list(source), Vec::new()),
            "PriorityQueue" | "priority_queue" => {
                let order = match args.first() {
                    // java orders by the comparator, c++ puts the largest on top
                    Some(comparator @ (Value::Closure(_) | Value::Function(_))) if base == "PriorityQueue" => {
                        comparator.clone()
                    }
                    Some(Value::Function(greater)) if greater == "greater" => Value::None,
                    _ if base == "priority_queue" => Value::str("max"),
                    _ => Value::None,
                };
                let heap = self.wrap_heap(order);
                for item in source {
                    self.heap_push(&heap, item)?;
                }
                heap
            }
            "HashMap" | "TreeMap" | "LinkedHashMap" | "map" | "unordered_map" => match args.first().map(Value::deref) {
                Some(Value::Dict(entries)) => Value::dict(entries.borrow().clone()),
                _ => Value::dict(Vec::new()),
            },
            "StringBuilder" | "StringBuffer" => {
                let initial = match args.first() {
                    Some(Value::Int(_)) | None => String::new(),
                    Some(value) => self.display_value(value)?,
                };
                Value::wrapper("StringBuilder", Value::Str(initial), Vec::new())
            }
            "String" | "string" => match args.first() {
                Some(value) => Value::Str(self.display_value(value)?),
                None => Value::str(""),
            },
            "Scanner" | "BufferedReader" | "Random" => Value::Object(std::rc::Rc::new(std::cell::RefCell::new(
                super::value::Object {
                    class: base.to_string(),
                    fields: Vec::new(),
                },
            ))),
            "Integer" | "Long" => Value::Int(args.first().and_then(Value::as_int).unwrap_or(0)),
            "Double" => Value::Float(args.first().and_then(Value::as_f64).unwrap_or(0.0)),
            other if self.is_exception_kind(other) => {
                let message = match args.first() {
                    Some(first) => self.display_value(first)?,
                    None => String::new(),
                };
                Value::Exception {
                    kind: other.to_string(),
                    message,
                }
            }
            _ => return Ok(None),
        }))
    }

    /// A set holding `items` without duplicates.
    pub(super) fn new_set(&self, items: Vec<Value>) -> Value {
        let mut unique = dedup(items);
        self.order_set(&mut unique);
        Value::wrapper("set", Value::list(unique), Vec::new())
    }

    /// Sets iterate in key order, except python sets of non-integers which
    /// keep insertion order.
    pub(super) fn order_set(&self, items: &mut [Value]) {
        let ordered = self.language != Language::Python || items.iter().all(|v| matches!(v, Value::Int(_)));
        if ordered && items.windows(2).all(|w| w[0].compare(&w[1]).is_some()) {
            items.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
        }
    }

    pub(super) fn wrap_heap(&self, order: Value) -> Value {
        Value::wrapper("PriorityQueue", Value::list(Vec::new()), vec![("__order".to_string(), order)])
    }

    pub(super) fn next_random(&mut self) -> u64 {
        self.rng = self
            .rng
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.rng >> 33
    }

    pub(super) fn random_unit(&mut self) -> f64 {
        self.next_random() as f64 / (1u64 << 31) as f64
    }

    pub(super) fn write_output(&mut self, text: &str) -> Result<(), Fault> {
        if text.len() > self.limits.max_string_len {
            return Err(self.fatal(format!(
                "output of {} bytes exceeds the limit of {}",
                text.len(),
                self.limits.max_string_len
            )));
        }
        self.recorder.write(text);
        Ok(())
    }

    // python

    fn python_builtin(
        &mut self,
        name: &str,
        qualifier: Option<&str>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Option<Value>, Fault> {
        match qualifier {
            Some("math") => return self.math(name, &args),
            Some("heapq") => return self.heapq(name, args),
            Some("random") => return self.python_random(name, args),
            Some("sys") if name == "exit" => {
                return Err(Fault::Exit(args.first().and_then(Value::as_int).unwrap_or(0)));
            }
            Some("time") => {
                return Ok(match name {
                    "time" | "perf_counter" | "monotonic" => Some(Value::Float(0.0)),
                    "sleep" => Some(Value::None),
                    _ => None,
                })
            }
            Some(_) => return Ok(None),
            None => {}
        }

        let value = match name {
            "print" => {
                let sep = match kwarg(&kwargs, "sep") {
                    Some(Value::None) | None => " ".to_string(),
                    Some(sep) => sep.display(Language::Python),
                };
                let end = match kwarg(&kwargs, "end") {
                    Some(Value::None) | None => "\n".to_string(),
                    Some(end) => end.display(Language::Python),
                };
                let mut parts = Vec::with_capacity(args.len());
                for arg in &args {
                    parts.push(self.display_value(arg)?);
                }
                let text = format!("{}{}", parts.join(&sep), end);
                self.write_output(&text)?;
                Value::None
            }
            "len" => {
                let target = arg(&args, 0).deref();
                match target.len() {
                    Some(len) => Value::Int(len as i64),
                    None => {
                        let message = format!("object of type '{}' has no len()", target.type_name());
                        return Err(self.raise("TypeError", message));
                    }
                }
            }
            "range" => {
                let ints: Vec<i64> = args.iter().map(|a| a.as_int().unwrap_or(0)).collect();
                let (start, end, step) = match ints.as_slice() {
                    [end] => (0, *end, 1),
                    [start, end] => (*start, *end, 1),
                    [start, end, step, ..] => (*start, *end, *step),
                    [] => return Err(self.raise("TypeError", "range expected at least 1 argument, got 0")),
                };
                if step == 0 {
                    return Err(self.raise("ValueError", "range() arg 3 must not be zero"));
                }
                Value::Range { start, end, step }
            }
            "str" => match args.first() {
                Some(value) => Value::Str(self.display_value(value)?),
                None => Value::str(""),
            },
            "repr" => Value::Str(arg(&args, 0).repr(Language::Python)),
            "int" => self.python_int(&args)?,
            "float" => match arg(&args, 0).deref() {
                Value::Str(text) => match parse_float(text.trim()) {
                    Some(f) => Value::Float(f),
                    None => {
                        let message = format!("could not convert string to float: {}", Value::Str(text).repr(Language::Python));
                        return Err(self.raise("ValueError", message));
                    }
                },
                Value::None if args.is_empty() => Value::Float(0.0),
                other => match other.as_f64() {
                    Some(f) => Value::Float(f),
                    None => {
                        let message = format!("float() argument must be a string or a real number, not '{}'", other.type_name());
                        return Err(self.raise("TypeError", message));
                    }
                },
            },
            "bool" => Value::Bool(args.first().is_some_and(Value::truthy)),
            "abs" => self.math("abs", &args)?.unwrap_or(Value::None),
            "min" | "max" => {
                let items = if args.len() == 1 { self.iterate(&args[0])? } else { args.clone() };
                if items.is_empty() {
                    if let Some(default) = kwarg(&kwargs, "default") {
                        return Ok(Some(default));
                    }
                    return Err(self.raise("ValueError", format!("{}() arg is an empty sequence", name)));
                }
                let key = kwarg(&kwargs, "key");
                let by = match &key {
                    Some(key) => SortBy::Key(key),
                    None => SortBy::Natural,
                };
                self.extreme(items, by, name == "max")?
            }
            "sum" => {
                let start = kwarg(&kwargs, "start").or_else(|| args.get(1).cloned()).unwrap_or(Value::Int(0));
                let items = self.iterate(&arg(&args, 0))?;
                let mut total = start;
                for item in items {
                    total = self.binary(BinOp::Add, &total, &item)?;
                }
                total
            }
            "sorted" => {
                let items = self.iterate(&arg(&args, 0))?;
                let reverse = kwarg(&kwargs, "reverse").is_some_and(|r| r.truthy());
                let key = kwarg(&kwargs, "key").filter(|k| !matches!(k, Value::None));
                let by = match &key {
                    Some(key) => SortBy::Key(key),
                    None => SortBy::Natural,
                };
                Value::list(self.sort_values(items, &by, reverse)?)
            }
            "reversed" => {
                let mut items = self.iterate(&arg(&args, 0))?;
                items.reverse();
                Value::list(items)
            }
            "enumerate" => {
                let start = kwarg(&kwargs, "start")
                    .or_else(|| args.get(1).cloned())
                    .and_then(|s| s.as_int())
                    .unwrap_or(0);
                let items = self.iterate(&arg(&args, 0))?;
                Value::list(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                        .collect(),
                )
            }
            "zip" => {
                let mut columns = Vec::new();
                for a in &args {
                    columns.push(self.iterate(a)?);
                }
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                Value::list(
                    (0..len)
                        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                        .collect(),
                )
            }
            "map" => {
                let f = arg(&args, 0);
                let mut columns = Vec::new();
                for a in &args[1.min(args.len())..] {
                    columns.push(self.iterate(a)?);
                }
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut out = Vec::with_capacity(len);
                for i in 0..len {
                    let call_args = columns.iter().map(|c| c[i].clone()).collect();
                    out.push(self.call_value(&f, call_args)?);
                }
                Value::list(out)
            }
            "filter" => {
                let f = arg(&args, 0);
                let items = self.iterate(&arg(&args, 1))?;
                let mut out = Vec::new();
                for item in items {
                    let keep = match &f {
                        Value::None => item.truthy(),
                        f => self.call_value(f, vec![item.clone()])?.truthy(),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Value::list(out)
            }
            "any" => Value::Bool(self.iterate(&arg(&args, 0))?.iter().any(Value::truthy)),
            "all" => Value::Bool(self.iterate(&arg(&args, 0))?.iter().all(Value::truthy)),
            "list" => match args.first() {
                Some(value) => Value::list(self.iterate(value)?),
                None => Value::list(Vec::new()),
            },
            "tuple" => match args.first() {
                Some(value) => Value::tuple(self.iterate(value)?),
                None => Value::tuple(Vec::new()),
            },
            "set" | "frozenset" => {
                let items = match args.first() {
                    Some(value) => self.iterate(value)?,
                    None => Vec::new(),
                };
                self.new_set(items)
            }
            "dict" => {
                let mut entries: Vec<(Value, Value)> = Vec::new();
                if let Some(source) = args.first() {
                    match source.deref() {
                        Value::Dict(existing) => entries = existing.borrow().clone(),
                        other => {
                            for pair in self.iterate(&other)? {
                                let parts = self.iterate(&pair)?;
                                if let [k, v] = parts.as_slice() {
                                    entries.push((k.clone(), v.clone()));
                                }
                            }
                        }
                    }
                }
                for (k, v) in kwargs {
                    entries.push((Value::Str(k), v));
                }
                Value::dict(entries)
            }
            "round" => {
                let x = arg(&args, 0);
                match args.get(1).and_then(Value::as_int) {
                    None => match x.deref() {
                        Value::Float(f) => {
                            let rounded = if (f - f.trunc()).abs() == 0.5 {
                                2.0 * (f / 2.0).round()
                            } else {
                                f.round()
                            };
                            Value::Int(rounded as i64)
                        }
                        other => other,
                    },
                    Some(digits) => match x.deref() {
                        Value::Float(f) => {
                            let digits = digits.clamp(0, 15) as usize;
                            Value::Float(format!("{:.*}", digits, f).parse().unwrap_or(f))
                        }
                        other => other,
                    },
                }
            }
            "pow" => match args.get(2) {
                Some(modulus) => {
                    let raised = self.binary(BinOp::Pow, &arg(&args, 0), &arg(&args, 1))?;
                    self.binary(BinOp::Mod, &raised, modulus)?
                }
                None => self.binary(BinOp::Pow, &arg(&args, 0), &arg(&args, 1))?,
            },
            "divmod" => {
                let (a, b) = (arg(&args, 0), arg(&args, 1));
                let quotient = self.binary(BinOp::FloorDiv, &a, &b)?;
                let remainder = self.binary(BinOp::Mod, &a, &b)?;
                Value::tuple(vec![quotient, remainder])
            }
            "chr" => Value::str(
                char::from_u32(arg(&args, 0).as_int().unwrap_or(0) as u32)
                    .unwrap_or('\u{fffd}')
                    .to_string(),
            ),
            "ord" => match arg(&args, 0).deref() {
                Value::Str(s) if s.chars().count() == 1 => Value::Int(s.chars().next().map_or(0, |c| c as i64)),
                other => {
                    let message = format!("ord() expected a character, but string of length {} found", other.len().unwrap_or(0));
                    return Err(self.raise("TypeError", message));
                }
            },
            "hex" | "bin" | "oct" => {
                let n = arg(&args, 0).as_int().unwrap_or(0);
                let (prefix, digits) = match name {
                    "hex" => ("0x", format!("{:x}", n.unsigned_abs())),
                    "bin" => ("0b", format!("{:b}", n.unsigned_abs())),
                    _ => ("0o", format!("{:o}", n.unsigned_abs())),
                };
                Value::Str(format!("{}{}{}", if n < 0 { "-" } else { "" }, prefix, digits))
            }
            "type" => Value::Str(format!("<class '{}'>", python_type_name(&arg(&args, 0)))),
            "isinstance" => {
                let value = arg(&args, 0);
                let kinds = match arg(&args, 1).deref() {
                    Value::Tuple(kinds) => (*kinds).clone(),
                    other => vec![other],
                };
                let matched = kinds.iter().any(|kind| match kind {
                    Value::Function(kind) => self.instance_of(&value, kind),
                    _ => false,
                });
                Value::Bool(matched)
            }
            "input" => return Err(self.raise("EOFError", "EOF when reading a line")),
            "exit" | "quit" => return Err(Fault::Exit(args.first().and_then(Value::as_int).unwrap_or(0))),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn python_int(&mut self, args: &[Value]) -> Eval {
        let base = args.get(1).and_then(Value::as_int).unwrap_or(10) as u32;
        Ok(match arg(args, 0).deref() {
            Value::Str(text) => {
                let trimmed = text.trim().replace('_', "");
                match i64::from_str_radix(&trimmed, base) {
                    Ok(i) => Value::Int(i),
                    Err(_) => {
                        let message = format!(
                            "invalid literal for int() with base {}: {}",
                            base,
                            Value::Str(text).repr(Language::Python)
                        );
                        return Err(self.raise("ValueError", message));
                    }
                }
            }
            Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
            Value::Float(_) => return Err(self.raise("OverflowError", "cannot convert float infinity to integer")),
            Value::None if args.is_empty() => Value::Int(0),
            other => match other.as_int() {
                Some(i) => Value::Int(i),
                None => {
                    let message = format!(
                        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                        other.type_name()
                    );
                    return Err(self.raise("TypeError", message));
                }
            },
        })
    }

    fn instance_of(&self, value: &Value, kind: &str) -> bool {
        match (value.deref(), kind) {
            (Value::Bool(_), "bool" | "int") => true,
            (Value::Int(_), "int") | (Value::Float(_), "float") | (Value::Str(_), "str") => true,
            (Value::List(_), "list") | (Value::Dict(_), "dict") | (Value::Tuple(_), "tuple") => true,
            (Value::Object(object), kind) => self.class_chain(&object.borrow().class).iter().any(|c| c.name == kind),
            (Value::Exception { kind: raised, .. }, kind) => self.exception_matches(&raised, kind),
            _ => false,
        }
    }

    fn python_random(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, Fault> {
        Ok(Some(match name {
            "seed" => {
                self.rng = args.first().and_then(Value::as_int).unwrap_or(0) as u64;
                Value::None
            }
            "random" => Value::Float(self.random_unit()),
            "uniform" => {
                let lo = arg(&args, 0).as_f64().unwrap_or(0.0);
                let hi = arg(&args, 1).as_f64().unwrap_or(1.0);
                Value::Float(lo + (hi - lo) * self.random_unit())
            }
            "randint" | "randrange" => {
                let lo = arg(&args, 0).as_int().unwrap_or(0);
                let hi = arg(&args, 1).as_int().unwrap_or(lo);
                let span = if name == "randint" { hi - lo + 1 } else { hi - lo };
                if span <= 0 {
                    return Err(self.raise("ValueError", format!("empty range for {}()", name)));
                }
                Value::Int(lo + (self.next_random() % span as u64) as i64)
            }
            "choice" => {
                let items = self.iterate(&arg(&args, 0))?;
                if items.is_empty() {
                    return Err(self.raise("IndexError", "Cannot choose from an empty sequence"));
                }
                let i = (self.next_random() % items.len() as u64) as usize;
                items[i].clone()
            }
            "shuffle" => {
                if let Value::List(items) = arg(&args, 0).deref() {
                    let len = items.borrow().len();
                    for i in (1..len).rev() {
                        let j = (self.next_random() % (i as u64 + 1)) as usize;
                        items.borrow_mut().swap(i, j);
                    }
                }
                Value::None
            }
            _ => return Ok(None),
        }))
    }

    // math shared by every language

    pub(super) fn math(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, Fault> {
        let language = self.language;
        let x = arg(args, 0).deref();
        let xf = x.as_f64();
        let y = args.get(1).and_then(Value::as_f64);
        let ints = matches!(x, Value::Int(_) | Value::Bool(_) | Value::Char(_));

        let value = match name {
            "abs" | "fabs" | "labs" | "llabs" => match x {
                Value::Int(i) if name != "fabs" => match i.checked_abs() {
                    Some(a) => Value::Int(a),
                    None => return Err(self.op_error(super::ops::OpError::Overflow)),
                },
                other => Value::Float(other.as_f64().unwrap_or(0.0).abs()),
            },
            "sqrt" => {
                let v = xf.unwrap_or(0.0);
                if v < 0.0 && language == Language::Python {
                    return Err(self.raise("ValueError", "math domain error"));
                }
                Value::Float(v.sqrt())
            }
            "isqrt" => Value::Int((xf.unwrap_or(0.0)).sqrt().floor() as i64),
            "cbrt" => Value::Float(xf.unwrap_or(0.0).cbrt()),
            "pow" => {
                let result = xf.unwrap_or(0.0).powf(y.unwrap_or(1.0));
                Value::Float(result)
            }
            "exp" => Value::Float(xf.unwrap_or(0.0).exp()),
            "log" => {
                let v = xf.unwrap_or(0.0);
                if v <= 0.0 && language == Language::Python {
                    return Err(self.raise("ValueError", "math domain error"));
                }
                match y {
                    Some(base) => Value::Float(v.ln() / base.ln()),
                    None => Value::Float(v.ln()),
                }
            }
            "log2" => Value::Float(xf.unwrap_or(0.0).log2()),
            "log10" => Value::Float(xf.unwrap_or(0.0).log10()),
            "sin" => Value::Float(xf.unwrap_or(0.0).sin()),
            "cos" => Value::Float(xf.unwrap_or(0.0).cos()),
            "tan" => Value::Float(xf.unwrap_or(0.0).tan()),
            "asin" => Value::Float(xf.unwrap_or(0.0).asin()),
            "acos" => Value::Float(xf.unwrap_or(0.0).acos()),
            "atan" => Value::Float(xf.unwrap_or(0.0).atan()),
            "atan2" => Value::Float(xf.unwrap_or(0.0).atan2(y.unwrap_or(1.0))),
            "hypot" => Value::Float(xf.unwrap_or(0.0).hypot(y.unwrap_or(0.0))),
            "floor" | "ceil" | "trunc" => {
                let v = xf.unwrap_or(0.0);
                let r = match name {
                    "floor" => v.floor(),
                    "ceil" => v.ceil(),
                    _ => v.trunc(),
                };
                if language == Language::Python {
                    Value::Int(r as i64)
                } else {
                    Value::Float(r)
                }
            }
            "round" => {
                let v = xf.unwrap_or(0.0);
                match language {
                    Language::Java => Value::Int((v + 0.5).floor() as i64),
                    _ => Value::Float(v.round()),
                }
            }
            "max" | "min" | "fmax" | "fmin" => {
                let items = match (args.len(), &x) {
                    (1, Value::List(_) | Value::Tuple(_)) => x.items().unwrap_or_default(),
                    _ => args.iter().map(Value::deref).collect(),
                };
                if items.is_empty() {
                    return Ok(None);
                }
                let mut best = items[0].clone();
                for item in &items[1..] {
                    let better = match item.compare(&best) {
                        Some(Ordering::Greater) => name.ends_with("max"),
                        Some(Ordering::Less) => name.ends_with("min"),
                        _ => false,
                    };
                    if better {
                        best = item.clone();
                    }
                }
                if name.starts_with('f') {
                    Value::Float(best.as_f64().unwrap_or(0.0))
                } else {
                    best
                }
            }
            "gcd" => {
                let (mut a, mut b) = (x.as_int().unwrap_or(0).abs(), arg(args, 1).as_int().unwrap_or(0).abs());
                while b != 0 {
                    (a, b) = (b, a % b);
                }
                Value::Int(a)
            }
            "factorial" => {
                let n = x.as_int().unwrap_or(0);
                if n < 0 {
                    return Err(self.raise("ValueError", "factorial() not defined for negative values"));
                }
                let mut acc: i64 = 1;
                for i in 2..=n {
                    acc = match acc.checked_mul(i) {
                        Some(v) => v,
                        None => return Err(self.op_error(super::ops::OpError::Overflow)),
                    };
                }
                Value::Int(acc)
            }
            "isnan" => Value::Bool(xf.is_some_and(f64::is_nan)),
            "isinf" => Value::Bool(xf.is_some_and(f64::is_infinite)),
            "signum" if ints => Value::Int(x.as_int().unwrap_or(0).signum()),
            "random" => Value::Float(self.random_unit()),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    // c and c++

    fn c_builtin(&mut self, name: &str, qualifier: Option<&str>, args: Vec<Value>) -> Result<Option<Value>, Fault> {
        if qualifier.is_some_and(|q| q != "std") {
            return Ok(None);
        }
        let value = match name {
            "printf" | "sprintf" | "fprintf" => {
                let args = if name == "printf" { args } else { args[1.min(args.len())..].to_vec() };
                let template = arg(&args, 0).display(self.language);
                let text = match format::printf(&template, args.get(1..).unwrap_or(&[]), self.language) {
                    Ok(text) => text,
                    Err(message) => return Err(self.fatal(message)),
                };
                if name == "sprintf" {
                    Value::Str(text)
                } else {
                    let len = text.len() as i64;
                    self.write_output(&text)?;
                    Value::Int(len)
                }
            }
            "puts" => {
                let text = format!("{}\n", arg(&args, 0).display(self.language));
                self.write_output(&text)?;
                Value::Int(1)
            }
            "putchar" => {
                let c = match arg(&args, 0).deref() {
                    Value::Char(c) => c,
                    other => char::from_u32(other.as_int().unwrap_or(0) as u32).unwrap_or('?'),
                };
                self.write_output(&c.to_string())?;
                Value::Int(c as i64)
            }
            "scanf" | "getchar" | "fgetc" | "getc" => Value::Int(-1),
            "gets" | "fgets" => Value::None,
            "getline" => Value::Bool(false),
            "strlen" => Value::Int(arg(&args, 0).deref().len().unwrap_or(0) as i64),
            "strcmp" => {
                let a = arg(&args, 0).display(self.language);
                let b = arg(&args, 1).display(self.language);
                Value::Int(match a.cmp(&b) {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                })
            }
            "strcpy" | "strdup" => arg(&args, args.len().saturating_sub(1)),
            "strcat" => Value::Str(format!(
                "{}{}",
                arg(&args, 0).display(self.language),
                arg(&args, 1).display(self.language)
            )),
            "atoi" | "atol" | "stoi" | "stol" | "stoll" => {
                let text = arg(&args, 0).display(self.language);
                match leading_int(&text) {
                    Some(i) => Value::Int(i),
                    None if name.starts_with("sto") => {
                        return Err(self.raise("invalid_argument", name.to_string()));
                    }
                    None => Value::Int(0),
                }
            }
            "atof" | "stod" | "stof" => Value::Float(parse_float(arg(&args, 0).display(self.language).trim()).unwrap_or(0.0)),
            "toupper" | "tolower" => {
                let value = arg(&args, 0).deref();
                let c = match &value {
                    Value::Char(c) => *c,
                    other => char::from_u32(other.as_int().unwrap_or(0) as u32).unwrap_or('\0'),
                };
                let mapped = if name == "toupper" {
                    c.to_ascii_uppercase()
                } else {
                    c.to_ascii_lowercase()
                };
                match value {
                    Value::Char(_) => Value::Char(mapped),
                    _ => Value::Int(mapped as i64),
                }
            }
            "isdigit" | "isalpha" | "isalnum" | "isspace" | "isupper" | "islower" | "ispunct" => {
                let c = match arg(&args, 0).deref() {
                    Value::Char(c) => c,
                    other => char::from_u32(other.as_int().unwrap_or(0) as u32).unwrap_or('\0'),
                };
                Value::Bool(match name {
                    "isdigit" => c.is_ascii_digit(),
                    "isalpha" => c.is_ascii_alphabetic(),
                    "isalnum" => c.is_ascii_alphanumeric(),
                    "isspace" => c.is_ascii_whitespace(),
                    "isupper" => c.is_ascii_uppercase(),
                    "islower" => c.is_ascii_lowercase(),
                    _ => c.is_ascii_punctuation(),
                })
            }
            "malloc" | "calloc" => {
                let count = match name {
                    "calloc" => {
                        let (n, size) = (arg(&args, 0).as_int().unwrap_or(0), arg(&args, 1).as_int().unwrap_or(1));
                        n.checked_mul(size).unwrap_or(i64::MAX)
                    }
                    _ => arg(&args, 0).as_int().unwrap_or(0),
                };
                let count = count.max(0) as usize;
                self.check_len(count)?;
                Value::list(vec![Value::Int(0); count])
            }
            "realloc" => {
                let count = arg(&args, 1).as_int().unwrap_or(0).max(0) as usize;
                self.check_len(count)?;
                let mut items = arg(&args, 0).items().unwrap_or_default();
                items.resize(count, Value::Int(0));
                Value::list(items)
            }
            "free" => Value::None,
            "srand" => {
                self.rng = arg(&args, 0).as_int().unwrap_or(0) as u64;
                Value::None
            }
            "rand" => Value::Int((self.next_random() % (i32::MAX as u64)) as i64),
            "time" | "clock" => Value::Int(0),
            "exit" | "abort" => return Err(Fault::Exit(arg(&args, 0).as_int().unwrap_or(0))),
            "assert" => {
                if !arg(&args, 0).truthy() {
                    return Err(self.fatal("Assertion failed"));
                }
                Value::None
            }
            "to_string" => match arg(&args, 0).deref() {
                Value::Float(f) => Value::Str(format!("{:.6}", f)),
                other => Value::Str(other.display(self.language)),
            },
            "make_pair" | "make_tuple" | "tie" => Value::tuple(args),
            "greater" | "less" => Value::Function(name.to_string()),
            _ => match self.math(name, &args)? {
                Some(value) => value,
                None => return Ok(None),
            },
        };
        Ok(Some(value))
    }

    /// `<algorithm>` calls over a `begin()`/`end()` pair.
    pub(super) fn iterator_algorithm(&mut self, name: &str, container: &Value, rest: Vec<Value>) -> Eval {
        let items = self.iterate(container)?;
        match name {
            "sort" => {
                let sorted = match rest.first() {
                    Some(Value::Function(order)) if order == "greater" => {
                        self.sort_values(items, &SortBy::Natural, true)?
                    }
                    Some(Value::Function(order)) if order == "less" => self.sort_values(items, &SortBy::Natural, false)?,
                    Some(comparator) => self.sort_values(items, &SortBy::LessThan(comparator), false)?,
                    None => self.sort_values(items, &SortBy::Natural, false)?,
                };
                replace_items(container, sorted);
                Ok(Value::None)
            }
            "reverse" => {
                let mut items = items;
                items.reverse();
                replace_items(container, items);
                Ok(Value::None)
            }
            "fill" => {
                let value = arg(&rest, 0);
                let filled = vec![value; items.len()];
                replace_items(container, filled);
                Ok(Value::None)
            }
            "accumulate" => {
                let mut total = arg(&rest, 0);
                for item in items {
                    total = self.binary(BinOp::Add, &total, &item)?;
                }
                Ok(total)
            }
            "count" => {
                let needle = arg(&rest, 0);
                Ok(Value::Int(items.iter().filter(|i| i.equals(&needle)).count() as i64))
            }
            "max_element" | "min_element" => {
                if items.is_empty() {
                    return Err(self.fatal("Segmentation fault: dereferenced end iterator"));
                }
                // an iterator: dereferencing it yields the element
                let best = self.extreme(items, SortBy::Natural, name == "max_element")?;
                Ok(Value::list(vec![best]))
            }
            _ => Ok(Value::None),
        }
    }

    // java

    fn java_builtin(&mut self, name: &str, qualifier: Option<&str>, args: Vec<Value>) -> Result<Option<Value>, Fault> {
        let Some(qualifier) = qualifier else {
            return Ok(None);
        };
        let owner = qualifier.rsplit('.').next().unwrap_or(qualifier);
        let value = match (qualifier, owner, name) {
            ("System.out" | "System.err", _, "println") => {
                let text = match args.first() {
                    Some(value) => self.java_text(value)?,
                    None => String::new(),
                };
                self.write_output(&format!("{}\n", text))?;
                Value::None
            }
            ("System.out" | "System.err", _, "print") => {
                let text = self.java_text(&arg(&args, 0))?;
                self.write_output(&text)?;
                Value::None
            }
            ("System.out" | "System.err", _, "printf" | "format") | (_, "String", "format") => {
                let template = arg(&args, 0).display(Language::Java);
                let text = match format::printf(&template, args.get(1..).unwrap_or(&[]), Language::Java) {
                    Ok(text) => text,
                    Err(message) => return Err(self.raise("MissingFormatArgumentException", message)),
                };
                if owner == "String" {
                    Value::Str(text)
                } else {
                    self.write_output(&text)?;
                    Value::None
                }
            }
            (_, "String", "valueOf") | (_, "Integer" | "Double" | "Long", "toString") => {
                Value::Str(self.java_text(&arg(&args, 0))?)
            }
            (_, "String", "join") => {
                let sep = arg(&args, 0).display(Language::Java);
                let parts = match args.get(1).map(Value::deref) {
                    Some(list @ Value::List(_)) if args.len() == 2 => list.items().unwrap_or_default(),
                    _ => args.get(1..).unwrap_or(&[]).to_vec(),
                };
                Value::Str(parts.iter().map(|p| p.display(Language::Java)).collect::<Vec<_>>().join(&sep))
            }
            (_, "Integer" | "Long", "parseInt" | "parseLong" | "valueOf") => {
                let text = arg(&args, 0).display(Language::Java);
                match text.trim_start_matches('+').parse::<i64>() {
                    Ok(i) if args.len() < 2 => Value::Int(i),
                    _ => match i64::from_str_radix(&text, arg(&args, 1).as_int().unwrap_or(10) as u32) {
                        Ok(i) => Value::Int(i),
                        Err(_) => {
                            return Err(self.raise("NumberFormatException", format!("For input string: \"{}\"", text)))
                        }
                    },
                }
            }
            (_, "Double", "parseDouble" | "valueOf") => {
                let text = arg(&args, 0).display(Language::Java);
                match parse_float(text.trim()) {
                    Some(f) => Value::Float(f),
                    None => {
                        return Err(self.raise("NumberFormatException", format!("For input string: \"{}\"", text)))
                    }
                }
            }
            (_, "Integer", "toBinaryString") => Value::Str(format!("{:b}", arg(&args, 0).as_int().unwrap_or(0))),
            (_, "Integer" | "Long" | "Double", "sum") => self.binary(BinOp::Add, &arg(&args, 0), &arg(&args, 1))?,
            (_, "Integer" | "Long" | "Double", "max" | "min") => match self.math(name, &args)? {
                Some(v) => v,
                None => Value::None,
            },
            (_, "Integer", "compare") => {
                Value::Int(ordering_int(arg(&args, 0).compare(&arg(&args, 1)).unwrap_or(Ordering::Equal)))
            }
            (_, "Character", _) => {
                let c = match arg(&args, 0).deref() {
                    Value::Char(c) => c,
                    other => char::from_u32(other.as_int().unwrap_or(0) as u32).unwrap_or('\0'),
                };
                match name {
                    "isDigit" => Value::Bool(c.is_ascii_digit()),
                    "isLetter" => Value::Bool(c.is_alphabetic()),
                    "isLetterOrDigit" => Value::Bool(c.is_alphanumeric()),
                    "isUpperCase" => Value::Bool(c.is_uppercase()),
                    "isLowerCase" => Value::Bool(c.is_lowercase()),
                    "isWhitespace" => Value::Bool(c.is_whitespace()),
                    "toUpperCase" => Value::Char(c.to_ascii_uppercase()),
                    "toLowerCase" => Value::Char(c.to_ascii_lowercase()),
                    "getNumericValue" => Value::Int(c.to_digit(36).map_or(-1, |d| d as i64)),
                    "toString" => Value::str(c.to_string()),
                    _ => return Ok(None),
                }
            }
            (_, "Math", "random") => Value::Float(self.random_unit()),
            (_, "Math", "abs" | "max" | "min") => match self.math(name, &args)? {
                Some(v) => v,
                None => Value::None,
            },
            (_, "Math", "floorDiv") => self.binary(BinOp::FloorDiv, &arg(&args, 0), &arg(&args, 1))?,
            (_, "Math", "floorMod") => {
                let (a, b) = (arg(&args, 0).as_int().unwrap_or(0), arg(&args, 1).as_int().unwrap_or(1));
                if b == 0 {
                    return Err(self.raise("ArithmeticException", "/ by zero"));
                }
                let r = a % b;
                Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
            }
            (_, "Math", _) => match self.math(name, &args)? {
                Some(v) => v,
                None => return Ok(None),
            },
            (_, "Arrays", "toString") => Value::Str(arg(&args, 0).repr(Language::Java)),
            (_, "Arrays", "deepToString") => Value::Str(arg(&args, 0).repr(Language::Java)),
            (_, "Arrays" | "Collections", "sort") => {
                let target = arg(&args, 0);
                let items = self.iterate(&target)?;
                let sorted = match args.get(1) {
                    Some(Value::Function(order)) if order == "reverseOrder" => {
                        self.sort_values(items, &SortBy::Natural, true)?
                    }
                    Some(comparator) => self.sort_values(items, &SortBy::Comparator(comparator), false)?,
                    None => self.sort_values(items, &SortBy::Natural, false)?,
                };
                replace_items(&target, sorted);
                Value::None
            }
            (_, "Collections", "reverseOrder") => Value::Function("reverseOrder".to_string()),
            (_, "Collections", "reverse") => {
                let target = arg(&args, 0);
                let mut items = self.iterate(&target)?;
                items.reverse();
                replace_items(&target, items);
                Value::None
            }
            (_, "Collections", "swap") => {
                let target = arg(&args, 0);
                let mut items = self.iterate(&target)?;
                let i = self.position(&arg(&args, 1), items.len())?;
                let j = self.position(&arg(&args, 2), items.len())?;
                items.swap(i, j);
                replace_items(&target, items);
                Value::None
            }
            (_, "Collections", "max" | "min") => {
                let items = self.iterate(&arg(&args, 0))?;
                if items.is_empty() {
                    return Err(self.raise("NoSuchElementException", ""));
                }
                self.extreme(items, SortBy::Natural, name == "max")?
            }
            (_, "Arrays", "fill") => {
                let target = arg(&args, 0);
                let len = target.len().unwrap_or(0);
                replace_items(&target, vec![arg(&args, 1); len]);
                Value::None
            }
            (_, "Arrays", "copyOf") => {
                let mut items = self.iterate(&arg(&args, 0))?;
                let len = arg(&args, 1).as_int().unwrap_or(0).max(0) as usize;
                self.check_len(len)?;
                let fill = items.first().map_or(Value::Int(0), |first| match first {
                    Value::Float(_) => Value::Float(0.0),
                    Value::Bool(_) => Value::Bool(false),
                    Value::Int(_) => Value::Int(0),
                    _ => Value::None,
                });
                items.resize(len, fill);
                Value::list(items)
            }
            (_, "Arrays" | "List" | "Set", "asList" | "of") => match args.as_slice() {
                [single @ Value::List(_)] if owner == "Arrays" => Value::list(single.items().unwrap_or_default()),
                _ => Value::list(args.clone()),
            },
            (_, "Collectors", "toList" | "toSet" | "toCollection") => Value::Function(name.to_string()),
            (_, "Collectors", "joining") => Value::tuple(vec![
                Value::str("__joining"),
                match args.first() {
                    Some(sep) => sep.clone(),
                    None => Value::str(""),
                },
            ]),
            (_, "Objects", "equals") => Value::Bool(arg(&args, 0).equals(&arg(&args, 1))),
            (_, "System", "exit") => return Err(Fault::Exit(arg(&args, 0).as_int().unwrap_or(0))),
            (_, "System", "currentTimeMillis" | "nanoTime") => Value::Int(0),
            (_, "Thread", "sleep") => Value::None,
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// `String.valueOf` rendering: char arrays print as text.
    pub(super) fn java_text(&mut self, value: &Value) -> Result<String, Fault> {
        if let Value::List(items) = value.deref() {
            let items = items.borrow();
            if !items.is_empty() && items.iter().all(|v| matches!(v, Value::Char(_))) {
                return Ok(items.iter().map(|v| v.display(Language::Java)).collect());
            }
        }
        self.display_value(value)
    }

    // rust

    fn rust_builtin(&mut self, name: &str, qualifier: Option<&str>, args: Vec<Value>) -> Result<Option<Value>, Fault> {
        if let Some(macro_name) = name.strip_suffix('!') {
            return self.rust_macro(macro_name, args).map(Some);
        }
        let owner = qualifier.map(|q| q.rsplit("::").next().unwrap_or(q));
        let value = match (owner, name) {
            (None, "Some" | "Ok") => arg(&args, 0),
            (None, "Err") => Value::Exception {
                kind: "Err".to_string(),
                message: self.display_value(&arg(&args, 0))?,
            },
            (None, "drop") => Value::None,
            (None, "Reverse") => Value::Object(std::rc::Rc::new(std::cell::RefCell::new(super::value::Object {
                class: "Reverse".to_string(),
                fields: vec![("0".to_string(), arg(&args, 0))],
            }))),
            (Some("String"), "new" | "with_capacity") => Value::str(""),
            (Some("String"), "from") => Value::Str(self.display_value(&arg(&args, 0))?),
            (Some("Vec" | "VecDeque"), "new" | "with_capacity") => Value::list(Vec::new()),
            (Some("Vec" | "VecDeque"), "from") => Value::list(self.iterate(&arg(&args, 0))?),
            (Some("HashSet" | "BTreeSet"), "new" | "with_capacity") => self.new_set(Vec::new()),
            (Some("HashSet" | "BTreeSet"), "from" | "from_iter") => {
                let items = self.iterate(&arg(&args, 0))?;
                self.new_set(items)
            }
            (Some("BinaryHeap"), "new" | "with_capacity") => self.wrap_heap(Value::str("max")),
            (Some("BinaryHeap"), "from") => {
                let heap = self.wrap_heap(Value::str("max"));
                for item in self.iterate(&arg(&args, 0))? {
                    self.heap_push(&heap, item)?;
                }
                heap
            }
            (Some("HashMap" | "BTreeMap"), "new" | "with_capacity") => Value::dict(Vec::new()),
            (Some("process"), "exit") => return Err(Fault::Exit(arg(&args, 0).as_int().unwrap_or(0))),
            (Some("cmp"), "max" | "min") => match self.math(name, &args)? {
                Some(v) => v,
                None => Value::None,
            },
            (Some("char"), "from") => match arg(&args, 0).deref() {
                Value::Int(i) => Value::Char(char::from_u32(i as u32).unwrap_or('\0')),
                other => other,
            },
            (Some("char"), "from_digit") => {
                let digit = arg(&args, 0).as_int().unwrap_or(0) as u32;
                let radix = arg(&args, 1).as_int().unwrap_or(10) as u32;
                char::from_digit(digit, radix).map_or(Value::None, Value::Char)
            }
            (Some("char"), "from_u32") => char::from_u32(arg(&args, 0).as_int().unwrap_or(0) as u32)
                .map_or(Value::None, Value::Char),
            (Some("f64" | "f32" | "i32" | "i64" | "u32" | "u64" | "usize"), _) => {
                // `f64::sqrt(x)` is the method form with the receiver first
                let mut rest = args;
                if rest.is_empty() {
                    return Ok(None);
                }
                let receiver = rest.remove(0);
                return match self.call_method_builtin(&receiver, name, rest, Vec::new())? {
                    Some(result) => Ok(Some(result.value)),
                    None => Ok(None),
                };
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn rust_macro(&mut self, name: &str, args: Vec<Value>) -> Eval {
        match name {
            "println" | "print" | "eprintln" | "eprint" => {
                let mut text = self.rust_format_args(&args)?;
                if name.ends_with("ln") {
                    text.push('\n');
                }
                self.write_output(&text)?;
                Ok(Value::None)
            }
            "format" => Ok(Value::Str(self.rust_format_args(&args)?)),
            "write" | "writeln" => {
                // the first argument is the destination
                let mut text = self.rust_format_args(args.get(1..).unwrap_or(&[]))?;
                if name == "writeln" {
                    text.push('\n');
                }
                Ok(Value::Str(text))
            }
            "panic" | "unreachable" | "todo" | "unimplemented" => {
                let message = match (name, args.is_empty()) {
                    ("panic", true) => "explicit panic".to_string(),
                    ("unreachable", true) => "internal error: entered unreachable code".to_string(),
                    ("todo", true) => "not yet implemented".to_string(),
                    ("unimplemented", true) => "not implemented".to_string(),
                    _ => self.rust_format_args(&args)?,
                };
                Err(self.fatal(format!("panicked: {}", message)))
            }
            "assert" => {
                if arg(&args, 0).truthy() {
                    return Ok(Value::None);
                }
                let message = match args.len() {
                    0 | 1 => "assertion failed".to_string(),
                    _ => self.rust_format_args(&args[1..])?,
                };
                Err(self.fatal(format!("panicked: {}", message)))
            }
            "assert_eq" | "assert_ne" => {
                let (left, right) = (arg(&args, 0), arg(&args, 1));
                let equal = left.equals(&right);
                if equal == (name == "assert_eq") {
                    return Ok(Value::None);
                }
                let op = if name == "assert_eq" { "==" } else { "!=" };
                Err(self.fatal(format!(
                    "panicked: assertion `left {} right` failed\n  left: {}\n right: {}",
                    op,
                    left.repr(Language::Rust),
                    right.repr(Language::Rust)
                )))
            }
            "dbg" => Ok(arg(&args, 0)),
            "vec" => Ok(Value::list(args)),
            other => Err(self.fatal(format!("unsupported macro `{}!`", other))),
        }
    }

    /// Render `format!`-style arguments: a template literal then values.
    pub(super) fn rust_format_args(&mut self, args: &[Value]) -> Result<String, Fault> {
        let Some(template) = args.first() else {
            return Ok(String::new());
        };
        let template = template.display(Language::Rust);
        let mut values = Vec::with_capacity(args.len().saturating_sub(1));
        for value in &args[1..] {
            values.push(self.rust_display_hook(value)?);
        }
        let mut named = Vec::new();
        for name in placeholder_names(&template) {
            if let Some(value) = self.peek_var(&name) {
                named.push((name, self.rust_display_hook(&value)?));
            }
        }
        let lookup = |name: &str| named.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone());
        match format::rust_format(&template, &values, &lookup) {
            Ok(text) => Ok(text),
            Err(message) => Err(self.fatal(message)),
        }
    }

    /// Objects with a user `Display` impl render through its `fmt`.
    pub(super) fn rust_display_hook(&mut self, value: &Value) -> Eval {
        if let Value::Object(object) = value.deref() {
            let class = object.borrow().class.clone();
            if let Some(fmt) = self.find_method(&class, "fmt", 1) {
                return self.call_user(fmt, vec![Value::None], Vec::new(), Some(Value::Object(object)));
            }
        }
        Ok(value.clone())
    }

    // ordering

    pub(super) fn compare_by(&mut self, a: &Value, b: &Value, by: &SortBy<'_>) -> Result<Ordering, Fault> {
        match by {
            SortBy::Natural | SortBy::Key(_) => match a.compare(b) {
                Some(order) => Ok(order),
                None => {
                    let message = format!(
                        "'<' not supported between instances of '{}' and '{}'",
                        a.type_name(),
                        b.type_name()
                    );
                    Err(self.type_error(message))
                }
            },
            SortBy::Comparator(f) => {
                let result = self.call_value(f, vec![a.clone(), b.clone()])?;
                Ok(result.as_int().map_or(Ordering::Equal, |i| i.cmp(&0)))
            }
            SortBy::LessThan(f) => {
                if self.call_value(f, vec![a.clone(), b.clone()])?.truthy() {
                    Ok(Ordering::Less)
                } else if self.call_value(f, vec![b.clone(), a.clone()])?.truthy() {
                    Ok(Ordering::Greater)
                } else {
                    Ok(Ordering::Equal)
                }
            }
        }
    }

    /// Stable sort with a fallible comparison.
    pub(super) fn sort_values(&mut self, items: Vec<Value>, by: &SortBy<'_>, reverse: bool) -> Result<Vec<Value>, Fault> {
        if let SortBy::Key(key) = by {
            let mut keyed = Vec::with_capacity(items.len());
            for item in items {
                let k = self.call_value(key, vec![item.clone()])?;
                keyed.push(Value::tuple(vec![k, item]));
            }
            let sorted = self.merge_sort(keyed, &SortBy::Natural, reverse, true)?;
            return Ok(sorted
                .into_iter()
                .filter_map(|pair| match pair {
                    Value::Tuple(pair) => pair.get(1).cloned(),
                    _ => None,
                })
                .collect());
        }
        self.merge_sort(items, by, reverse, false)
    }

    fn merge_sort(&mut self, items: Vec<Value>, by: &SortBy<'_>, reverse: bool, keyed: bool) -> Result<Vec<Value>, Fault> {
        if items.len() <= 1 {
            return Ok(items);
        }
        self.tick()?;
        let mut left = items;
        let right = left.split_off(left.len() / 2);
        let left = self.merge_sort(left, by, reverse, keyed)?;
        let right = self.merge_sort(right, by, reverse, keyed)?;

        let mut merged = Vec::with_capacity(left.len() + right.len());
        let mut right = right.into_iter().peekable();
        for l in left {
            while let Some(r) = right.peek() {
                let (lk, rk) = if keyed { (sort_key(&l), sort_key(r)) } else { (l.clone(), r.clone()) };
                let mut order = self.compare_by(&rk, &lk, by)?;
                if reverse {
                    order = order.reverse();
                }
                if order == Ordering::Less {
                    if let Some(r) = right.next() {
                        merged.push(r);
                    }
                } else {
                    break;
                }
            }
            merged.push(l);
        }
        merged.extend(right);
        Ok(merged)
    }

    /// First maximum (or minimum) under `by`.
    pub(super) fn extreme(&mut self, items: Vec<Value>, by: SortBy<'_>, max: bool) -> Eval {
        let compare = match by {
            SortBy::Key(_) => SortBy::Natural,
            other => other,
        };
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            let key = match by {
                SortBy::Key(f) => self.call_value(f, vec![item.clone()])?,
                _ => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => {
                    let order = self.compare_by(&key, best_key, &compare)?;
                    if max {
                        order == Ordering::Greater
                    } else {
                        order == Ordering::Less
                    }
                }
            };
            if replace {
                best = Some((key, item));
            }
        }
        Ok(best.map(|(_, item)| item).unwrap_or(Value::None))
    }
}

pub(super) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::None)
}

fn kwarg(kwargs: &[(String, Value)], name: &str) -> Option<Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

pub(super) fn ordering_int(order: Ordering) -> i64 {
    match order {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn sort_key(pair: &Value) -> Value {
    match pair {
        Value::Tuple(items) => items.first().cloned().unwrap_or(Value::None),
        other => other.clone(),
    }
}

/// Overwrite a list's contents in place so aliases observe the change.
pub(super) fn replace_items(target: &Value, items: Vec<Value>) {
    if let Value::List(list) = target.deref() {
        *list.borrow_mut() = items;
    }
}

pub(super) fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.iter().any(|existing| existing.equals(&item)) {
            out.push(item);
        }
    }
    out
}

pub(super) fn parse_float(text: &str) -> Option<f64> {
    match text.to_ascii_lowercase().as_str() {
        "inf" | "infinity" | "+inf" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

/// C `atoi`: optional sign then digits, ignoring the rest.
fn leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

fn python_type_name(value: &Value) -> String {
    match value.deref() {
        Value::None => "NoneType".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Object(object) => object.borrow().class.clone(),
        Value::Exception { kind, .. } => kind,
        other => other.type_name().to_string(),
    }
}

/// Identifiers used as inline `{name}` placeholders in a format template.
fn placeholder_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let tail = &rest[open + 1..];
        if let Some(stripped) = tail.strip_prefix('{') {
            rest = stripped;
            continue;
        }
        let Some(close) = tail.find('}') else {
            break;
        };
        let field = &tail[..close];
        let name = field.split(':').next().unwrap_or("");
        if name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_alphanumeric() || c == '_')
            && !names.iter().any(|n| n == name)
        {
            names.push(name.to_string());
        }
        rest = &tail[close + 1..];
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_int() {
        assert_eq!(leading_int("  42abc"), Some(42));
        assert_eq!(leading_int("-7"), Some(-7));
        assert_eq!(leading_int("x1"), None);
    }

    #[test]
    fn test_placeholder_names() {
        assert_eq!(placeholder_names("{} {name} {{skip}} {x:>4} {0}"), vec!["name", "x"]);
    }

    #[test]
    fn test_dedup_keeps_first() {
        let items = vec![Value::Int(1), Value::Int(2), Value::Int(1)];
        assert_eq!(dedup(items).len(), 2);
    }
}
