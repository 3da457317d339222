// Runtime values of the sandbox interpreter

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use serde_json::{json, Map, Value as Json};

use super::format::format_general;
use crate::grammar::Language;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<Vec<(Value, Value)>>>;
pub type ObjectRef = Rc<RefCell<Object>>;
pub type SlotRef = Rc<RefCell<Slot>>;

/// Snapshots stop descending after this many nested containers.
const JSON_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct Object {
    pub class: String,
    pub fields: Vec<(String, Value)>,
}

/// Field holding the contents of library containers modelled as objects
/// (`StringBuilder`, `Stack`, heaps).
pub const PAYLOAD: &str = "__items";

impl Object {
    pub fn payload(&self) -> Option<&Value> {
        self.get(PAYLOAD)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }
}

/// A variable cell. Shared when a reference or pointer aliases it.
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub value: Value,
    pub hint: super::ir::TypeHint,
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: super::ir::Expr,
    pub captured: Vec<(String, SlotRef)>,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    List(ListRef),
    Tuple(Rc<Vec<Value>>),
    Dict(DictRef),
    Range { start: i64, end: i64, step: i64 },
    Object(ObjectRef),
    Exception { kind: String, message: String },
    Ref(SlotRef),
    Closure(Rc<Closure>),
    /// A named function or builtin used as a value (`key=len`).
    Function(String),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: Vec<(Value, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    /// Library container modelled as an object around `payload`.
    pub fn wrapper(class: &str, payload: Value, extra: Vec<(String, Value)>) -> Value {
        let mut fields = vec![(PAYLOAD.to_string(), payload)];
        fields.extend(extra);
        Value::Object(Rc::new(RefCell::new(Object {
            class: class.to_string(),
            fields,
        })))
    }

    /// Contents of a wrapped library container.
    pub fn payload(&self) -> Option<Value> {
        match self {
            Value::Object(object) => object.borrow().payload().cloned(),
            Value::Ref(slot) => slot.borrow().value.payload(),
            _ => None,
        }
    }

    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(text.into())
    }

    /// Follow references to the value they point at.
    pub fn deref(&self) -> Value {
        let mut current = self.clone();
        for _ in 0..16 {
            match current {
                Value::Ref(slot) => current = slot.borrow().value.clone(),
                other => return other,
            }
        }
        current
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Object(_) => "object",
            Value::Exception { .. } => "exception",
            Value::Ref(_) => "reference",
            Value::Closure(_) | Value::Function(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Char(c) => *c != '\0',
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
            Value::Range { start, end, step } => range_len(*start, *end, *step) > 0,
            Value::Ref(slot) => slot.borrow().value.truthy(),
            Value::Object(_) if self.payload().is_some() => self.payload().is_some_and(|p| p.truthy()),
            Value::Object(_) | Value::Exception { .. } | Value::Closure(_) | Value::Function(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Char(c) => Some(*c as i64),
            Value::Ref(slot) => slot.borrow().value.as_int(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Ref(slot) => slot.borrow().value.as_f64(),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Char(_))
    }

    /// Independent copy: containers and objects are duplicated recursively.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::List(items) => Value::list(items.borrow().iter().map(Value::deep_copy).collect()),
            Value::Dict(entries) => Value::dict(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.deep_copy(), v.deep_copy()))
                    .collect(),
            ),
            Value::Object(object) => {
                let object = object.borrow();
                Value::Object(Rc::new(RefCell::new(Object {
                    class: object.class.clone(),
                    fields: object.fields.iter().map(|(n, v)| (n.clone(), v.deep_copy())).collect(),
                })))
            }
            other => other.clone(),
        }
    }

    /// Structural equality; numbers compare across int/float/char.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Ref(a), b) => a.borrow().value.equals(b),
            (a, Value::Ref(b)) => a.equals(&b.borrow().value),
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Char(b)) | (Value::Char(b), Value::Str(a)) => {
                a.chars().count() == 1 && a.starts_with(*b)
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_equals(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_equals(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.iter().any(|(k2, v2)| k.equals(k2) && v.equals(v2)))
            }
            (Value::Range { start, end, step }, Value::Range { start: s2, end: e2, step: st2 }) => {
                start == s2 && end == e2 && step == st2
            }
            (Value::Object(a), Value::Object(b)) if Rc::ptr_eq(a, b) => true,
            // unit enum variants are rebuilt on every read
            (Value::Object(a), Value::Object(b))
                if a.borrow().fields.is_empty() && b.borrow().fields.is_empty() =>
            {
                a.borrow().class == b.borrow().class
            }
            (Value::Object(_), Value::Object(_)) => match (self.payload(), other.payload()) {
                (Some(a), Some(b)) => match (a.items(), b.items()) {
                    (Some(x), Some(y)) => x.len() == y.len() && x.iter().all(|v| y.iter().any(|w| v.equals(w))),
                    _ => a.equals(&b),
                },
                _ => false,
            },
            (Value::Exception { kind: k1, message: m1 }, Value::Exception { kind: k2, message: m2 }) => {
                k1 == k2 && m1 == m2
            }
            _ => false,
        }
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Ref(a), b) => a.borrow().value.compare(b),
            (a, Value::Ref(b)) => a.compare(&b.borrow().value),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::List(a), Value::List(b)) => seq_compare(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => seq_compare(a, b),
            _ => None,
        }
    }

    /// Items produced by iterating this value. Ranges are handled lazily by
    /// the interpreter and are not expanded here.
    pub fn items(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.borrow().clone()),
            Value::Tuple(items) => Some((**items).clone()),
            Value::Dict(entries) => Some(entries.borrow().iter().map(|(k, _)| k.clone()).collect()),
            Value::Str(s) => Some(s.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Ref(slot) => slot.borrow().value.items(),
            Value::Object(_) => self.payload()?.items(),
            _ => None,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(items.borrow().len()),
            Value::Tuple(items) => Some(items.len()),
            Value::Dict(entries) => Some(entries.borrow().len()),
            Value::Str(s) => Some(s.chars().count()),
            Value::Range { start, end, step } => Some(range_len(*start, *end, *step)),
            Value::Ref(slot) => slot.borrow().value.len(),
            Value::Object(_) => self.payload()?.len(),
            _ => None,
        }
    }

    /// Text as printed by the language's standard output routine.
    pub fn display(&self, language: Language) -> String {
        match self {
            Value::None => match language {
                Language::Python => "None".to_string(),
                Language::Java => "null".to_string(),
                Language::Rust => "()".to_string(),
                Language::C | Language::Cpp => "0".to_string(),
            },
            Value::Bool(b) => match language {
                Language::Python => (if *b { "True" } else { "False" }).to_string(),
                Language::C | Language::Cpp => (if *b { "1" } else { "0" }).to_string(),
                Language::Rust | Language::Java => b.to_string(),
            },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => display_float(*f, language),
            Value::Char(c) => c.to_string(),
            Value::Str(s) => s.clone(),
            Value::Exception { kind, message } => match language {
                Language::Python => message.clone(),
                _ if message.is_empty() => kind.clone(),
                _ => format!("{}: {}", kind, message),
            },
            Value::Ref(slot) => slot.borrow().value.display(language),
            Value::Object(object) => {
                let object = object.borrow();
                if object.class == "set" {
                    return self.repr(language);
                }
                if let Some(payload) = object.payload() {
                    return payload.display(language);
                }
                match language {
                    Language::Python => format!("<{} object>", object.class),
                    _ => self.repr(language),
                }
            }
            other => other.repr(language),
        }
    }

    /// Text inside containers: python `repr`, rust `{:?}`.
    pub fn repr(&self, language: Language) -> String {
        self.repr_depth(language, 0)
    }

    fn repr_depth(&self, language: Language, depth: usize) -> String {
        if depth > JSON_DEPTH {
            return "...".to_string();
        }
        let join = |items: &[Value]| {
            items
                .iter()
                .map(|v| v.repr_depth(language, depth + 1))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Value::Str(s) => match language {
                Language::Python => python_quote(s),
                Language::Rust | Language::Cpp => format!("{:?}", s),
                _ => s.clone(),
            },
            Value::Char(c) => match language {
                Language::Python => python_quote(&c.to_string()),
                Language::Rust => format!("{:?}", c),
                _ => c.to_string(),
            },
            Value::List(items) => format!("[{}]", join(items.borrow().as_slice())),
            Value::Tuple(items) => {
                if items.len() == 1 && language == Language::Python {
                    format!("({},)", join(items.as_slice()))
                } else {
                    format!("({})", join(items.as_slice()))
                }
            }
            Value::Dict(entries) => {
                let body = ordered_entries(&entries.borrow(), language)
                    .iter()
                    .map(|(k, v)| {
                        let sep = if language == Language::Java { "=" } else { ": " };
                        format!("{}{}{}", k.repr_depth(language, depth + 1), sep, v.repr_depth(language, depth + 1))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", body)
            }
            Value::Range { start, end, step } => match language {
                Language::Python if *step == 1 => format!("range({}, {})", start, end),
                Language::Python => format!("range({}, {}, {})", start, end, step),
                _ => format!("{}..{}", start, end),
            },
            Value::Object(object) => {
                let object = object.borrow();
                if let Some(payload) = object.payload() {
                    if object.class == "set" {
                        let items = payload.items().unwrap_or_default();
                        return match language {
                            Language::Python if items.is_empty() => "set()".to_string(),
                            Language::Python | Language::Rust => format!("{{{}}}", join(items.as_slice())),
                            _ => format!("[{}]", join(items.as_slice())),
                        };
                    }
                    return payload.repr_depth(language, depth + 1);
                }
                if object.fields.is_empty() {
                    return object.class.clone();
                }
                if object.fields.iter().all(|(n, _)| n.chars().all(|c| c.is_ascii_digit())) {
                    let values: Vec<Value> = object.fields.iter().map(|(_, v)| v.clone()).collect();
                    return format!("{}({})", object.class, join(values.as_slice()));
                }
                let fields = object
                    .fields
                    .iter()
                    .map(|(n, v)| format!("{}: {}", n, v.repr_depth(language, depth + 1)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} {{ {} }}", object.class, fields)
            }
            Value::Exception { kind, message } => match language {
                Language::Python => format!("{}({})", kind, python_quote(message)),
                _ => self.display(language),
            },
            Value::Ref(slot) => slot.borrow().value.repr_depth(language, depth + 1),
            Value::Closure(_) => "<function>".to_string(),
            Value::Function(name) => format!("<function {}>", name),
            other => other.display(language),
        }
    }

    /// Language-neutral snapshot representation.
    pub fn to_json(&self) -> Json {
        self.to_json_depth(0)
    }

    fn to_json_depth(&self, depth: usize) -> Json {
        if depth > JSON_DEPTH {
            return json!("...");
        }
        match self {
            Value::None => Json::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) if f.is_finite() => json!(f),
            Value::Float(f) => json!(f.to_string()),
            Value::Char(c) => json!(c.to_string()),
            Value::Str(s) => json!(s),
            Value::List(items) => Json::Array(items.borrow().iter().map(|v| v.to_json_depth(depth + 1)).collect()),
            Value::Tuple(items) => Json::Array(items.iter().map(|v| v.to_json_depth(depth + 1)).collect()),
            Value::Dict(entries) => {
                let mut map = Map::new();
                for (k, v) in entries.borrow().iter() {
                    map.insert(k.display(Language::Python), v.to_json_depth(depth + 1));
                }
                Json::Object(map)
            }
            Value::Range { start, end, step } => json!({ "range": [start, end, step] }),
            Value::Object(object) => {
                let object = object.borrow();
                if let Some(payload) = object.payload() {
                    return payload.to_json_depth(depth + 1);
                }
                let mut fields = Map::new();
                for (n, v) in &object.fields {
                    fields.insert(n.clone(), v.to_json_depth(depth + 1));
                }
                json!({ "class": object.class, "fields": fields })
            }
            Value::Exception { kind, message } => json!({ "exception": kind, "message": message }),
            Value::Ref(slot) => json!({ "ref": slot.borrow().name }),
            Value::Closure(_) => json!("<function>"),
            Value::Function(name) => json!(format!("<function {}>", name)),
        }
    }
}

/// Map entries in the order the language iterates them: insertion order
/// for python dicts, key order elsewhere.
pub fn ordered_entries(entries: &[(Value, Value)], language: Language) -> Vec<(Value, Value)> {
    let mut ordered = entries.to_vec();
    if language != Language::Python && ordered.windows(2).all(|w| w[0].0.compare(&w[1].0).is_some()) {
        ordered.sort_by(|a, b| a.0.compare(&b.0).unwrap_or(Ordering::Equal));
    }
    ordered
}

pub fn range_len(start: i64, end: i64, step: i64) -> usize {
    if step > 0 && end > start {
        ((end - start - 1) / step + 1) as usize
    } else if step < 0 && start > end {
        ((start - end - 1) / (-step) + 1) as usize
    } else {
        0
    }
}

fn seq_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

fn seq_compare(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

fn display_float(f: f64, language: Language) -> String {
    match language {
        Language::Python | Language::Java => {
            if f.is_nan() {
                return (if language == Language::Java { "NaN" } else { "nan" }).to_string();
            }
            if f.is_infinite() {
                let text = if language == Language::Java { "Infinity" } else { "inf" };
                return if f < 0.0 { format!("-{}", text) } else { text.to_string() };
            }
            if f.fract() == 0.0 && f.abs() < 1e16 {
                format!("{:.1}", f)
            } else {
                format!("{}", f)
            }
        }
        Language::Rust => format!("{}", f),
        Language::C | Language::Cpp => format_general(f, 6, false),
    }
}

fn python_quote(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_per_language() {
        assert_eq!(Value::Float(3.0).display(Language::Python), "3.0");
        assert_eq!(Value::Float(3.0).display(Language::Rust), "3");
        assert_eq!(Value::Float(0.5).display(Language::Cpp), "0.5");
        assert_eq!(Value::Bool(true).display(Language::Python), "True");
        assert_eq!(Value::Bool(true).display(Language::Cpp), "1");
        let list = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(list.display(Language::Python), "[1, 'a']");
        assert_eq!(list.display(Language::Rust), "[1, \"a\"]");
    }

    #[test]
    fn test_set_display() {
        let set = Value::wrapper("set", Value::list(vec![Value::Int(1), Value::Int(2)]), Vec::new());
        assert_eq!(set.display(Language::Python), "{1, 2}");
        assert_eq!(set.display(Language::Java), "[1, 2]");
        let empty = Value::wrapper("set", Value::list(Vec::new()), Vec::new());
        assert_eq!(empty.display(Language::Python), "set()");
    }

    #[test]
    fn test_lists_share_until_copied() {
        let a = Value::list(vec![Value::Int(1)]);
        let alias = a.clone();
        let copy = a.deep_copy();
        if let Value::List(items) = &a {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(alias.len(), Some(2));
        assert_eq!(copy.len(), Some(1));
    }

    #[test]
    fn test_numeric_equality_and_order() {
        assert!(Value::Int(2).equals(&Value::Float(2.0)));
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(Value::str("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(0, 5, 1), 5);
        assert_eq!(range_len(0, 5, 2), 3);
        assert_eq!(range_len(5, 0, -1), 5);
        assert_eq!(range_len(5, 0, 1), 0);
    }

    #[test]
    fn test_snapshot_json() {
        let value = Value::list(vec![Value::Int(1), Value::None, Value::Float(f64::INFINITY)]);
        assert_eq!(value.to_json(), json!([1, null, "inf"]));
    }
}
