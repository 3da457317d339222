// Library containers with ordering rules: heaps, sets, python heapq

use std::cmp::Ordering;

use super::builtins::{arg, dedup};
use super::interpreter::{Fault, Interpreter};
use super::ir::BinOp;
use super::value::{ListRef, Value};
use crate::grammar::Language;

/// Pull the list out of a wrapped container.
pub(super) fn payload_list(wrapper: &Value) -> Option<ListRef> {
    match wrapper.payload()? {
        Value::List(items) => Some(items),
        _ => None,
    }
}

fn field(wrapper: &Value, name: &str) -> Value {
    match wrapper.deref() {
        Value::Object(object) => object.borrow().get(name).cloned().unwrap_or(Value::None),
        _ => Value::None,
    }
}

pub(super) fn is_set(value: &Value) -> bool {
    matches!(value.deref(), Value::Object(o) if o.borrow().class == "set")
}

pub(super) fn is_heap(value: &Value) -> bool {
    matches!(value.deref(), Value::Object(o) if o.borrow().class == "PriorityQueue")
}

impl<'p> Interpreter<'p> {
    /// Natural `<` where `Reverse(x)` inverts the order.
    fn natural_less(&mut self, a: &Value, b: &Value) -> Result<bool, Fault> {
        if let (Some(x), Some(y)) = (reversed_inner(a), reversed_inner(b)) {
            return self.natural_less(&y, &x);
        }
        match a.compare(b) {
            Some(order) => Ok(order == Ordering::Less),
            None => {
                let message = format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                );
                Err(self.type_error(message))
            }
        }
    }

    /// Whether `a` belongs nearer the top of a heap ordered by `order`.
    fn heap_before(&mut self, a: &Value, b: &Value, order: &Value) -> Result<bool, Fault> {
        match order {
            Value::None => self.natural_less(a, b),
            Value::Str(_) => self.natural_less(b, a),
            Value::Function(name) if name == "reverseOrder" => self.natural_less(b, a),
            comparator => {
                let result = self.call_value(comparator, vec![a.clone(), b.clone()])?;
                Ok(match result {
                    Value::Bool(less) => less,
                    other => other.as_int().is_some_and(|i| i < 0),
                })
            }
        }
    }

    fn sift_up(&mut self, heap: &mut [Value], mut pos: usize, order: &Value) -> Result<(), Fault> {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.heap_before(&heap[pos], &heap[parent], order)? {
                heap.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn sift_down(&mut self, heap: &mut [Value], mut pos: usize, order: &Value) -> Result<(), Fault> {
        let len = heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                return Ok(());
            }
            let mut child = left;
            if left + 1 < len && self.heap_before(&heap[left + 1], &heap[left], order)? {
                child = left + 1;
            }
            if !self.heap_before(&heap[child], &heap[pos], order)? {
                return Ok(());
            }
            heap.swap(pos, child);
            pos = child;
        }
    }

    pub(super) fn heap_push(&mut self, heap: &Value, item: Value) -> Result<(), Fault> {
        let Some(list) = payload_list(heap) else {
            return Ok(());
        };
        let order = field(heap, "__order");
        let mut items = std::mem::take(&mut *list.borrow_mut());
        self.check_len(items.len() + 1)?;
        items.push(item);
        let last = items.len() - 1;
        let result = self.sift_up(&mut items, last, &order);
        *list.borrow_mut() = items;
        result
    }

    pub(super) fn heap_pop(&mut self, heap: &Value) -> Result<Option<Value>, Fault> {
        let Some(list) = payload_list(heap) else {
            return Ok(None);
        };
        let order = field(heap, "__order");
        let mut items = std::mem::take(&mut *list.borrow_mut());
        if items.is_empty() {
            return Ok(None);
        }
        let last = items.len() - 1;
        items.swap(0, last);
        let top = items.pop();
        let result = self.sift_down(&mut items, 0, &order);
        *list.borrow_mut() = items;
        result.map(|_| top)
    }

    pub(super) fn heap_peek(&self, heap: &Value) -> Option<Value> {
        payload_list(heap).and_then(|list| list.borrow().first().cloned())
    }

    /// Python `heapq`, matching CPython's sift order so printed heaps agree.
    pub(super) fn heapq(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, Fault> {
        let target = arg(&args, 0);
        let list = match target.deref() {
            Value::List(list) => Some(list),
            _ => None,
        };
        let value = match (name, list) {
            ("heappush", Some(list)) => {
                let mut items = std::mem::take(&mut *list.borrow_mut());
                items.push(arg(&args, 1));
                let last = items.len() - 1;
                let result = self.cpython_siftdown(&mut items, 0, last);
                *list.borrow_mut() = items;
                result?;
                Value::None
            }
            ("heappop" | "heapreplace" | "heappushpop", Some(list)) => {
                let mut items = std::mem::take(&mut *list.borrow_mut());
                let result = self.cpython_pop(&mut items, name, args.get(1).cloned());
                *list.borrow_mut() = items;
                match result? {
                    Some(value) => value,
                    None => return Err(self.raise("IndexError", "index out of range")),
                }
            }
            ("heapify", Some(list)) => {
                let mut items = std::mem::take(&mut *list.borrow_mut());
                let mut result = Ok(());
                for i in (0..items.len() / 2).rev() {
                    result = self.cpython_siftup(&mut items, i);
                    if result.is_err() {
                        break;
                    }
                }
                *list.borrow_mut() = items;
                result?;
                Value::None
            }
            ("nlargest" | "nsmallest", _) => {
                let n = target.as_int().unwrap_or(0).max(0) as usize;
                let items = self.iterate(&arg(&args, 1))?;
                let mut sorted = self.sort_values(items, &super::builtins::SortBy::Natural, name == "nlargest")?;
                sorted.truncate(n);
                Value::list(sorted)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn cpython_pop(&mut self, items: &mut Vec<Value>, name: &str, incoming: Option<Value>) -> Result<Option<Value>, Fault> {
        match name {
            "heappushpop" => {
                let item = incoming.unwrap_or(Value::None);
                if let Some(first) = items.first().cloned() {
                    if self.natural_less(&first, &item)? {
                        items[0] = item;
                        self.cpython_siftup(items, 0)?;
                        return Ok(Some(first));
                    }
                }
                Ok(Some(item))
            }
            "heapreplace" => {
                let Some(first) = items.first().cloned() else {
                    return Ok(None);
                };
                items[0] = incoming.unwrap_or(Value::None);
                self.cpython_siftup(items, 0)?;
                Ok(Some(first))
            }
            _ => {
                let Some(last) = items.pop() else {
                    return Ok(None);
                };
                if items.is_empty() {
                    return Ok(Some(last));
                }
                let top = std::mem::replace(&mut items[0], last);
                self.cpython_siftup(items, 0)?;
                Ok(Some(top))
            }
        }
    }

    fn cpython_siftdown(&mut self, heap: &mut [Value], start: usize, mut pos: usize) -> Result<(), Fault> {
        let item = heap[pos].clone();
        while pos > start {
            let parent = (pos - 1) >> 1;
            if self.natural_less(&item, &heap[parent])? {
                heap[pos] = heap[parent].clone();
                pos = parent;
            } else {
                break;
            }
        }
        heap[pos] = item;
        Ok(())
    }

    fn cpython_siftup(&mut self, heap: &mut [Value], mut pos: usize) -> Result<(), Fault> {
        let end = heap.len();
        let start = pos;
        let item = heap[pos].clone();
        let mut child = 2 * pos + 1;
        while child < end {
            let right = child + 1;
            if right < end && !self.natural_less(&heap[child], &heap[right])? {
                child = right;
            }
            heap[pos] = heap[child].clone();
            pos = child;
            child = 2 * pos + 1;
        }
        heap[pos] = item;
        self.cpython_siftdown(heap, start, pos)
    }

    // sets

    /// Add to a set; false when already present.
    pub(super) fn set_insert(&mut self, set: &Value, item: Value) -> Result<bool, Fault> {
        let Some(list) = payload_list(set) else {
            return Ok(false);
        };
        if list.borrow().iter().any(|v| v.equals(&item)) {
            return Ok(false);
        }
        self.check_len(list.borrow().len() + 1)?;
        let mut items = std::mem::take(&mut *list.borrow_mut());
        items.push(item);
        self.order_set(&mut items);
        *list.borrow_mut() = items;
        Ok(true)
    }

    pub(super) fn set_remove(&self, set: &Value, item: &Value) -> bool {
        let Some(list) = payload_list(set) else {
            return false;
        };
        let mut items = list.borrow_mut();
        match items.iter().position(|v| v.equals(item)) {
            Some(i) => {
                items.remove(i);
                true
            }
            None => false,
        }
    }

    /// `|`, `&`, `-` and `^` on sets.
    pub(super) fn set_binary(&mut self, op: BinOp, left: &Value, right: &Value) -> Result<Option<Value>, Fault> {
        if !is_set(left) || !(is_set(right) || self.language != Language::Python) {
            return Ok(None);
        }
        let a = left.items().unwrap_or_default();
        let b = self.iterate(right)?;
        let in_b = |v: &Value| b.iter().any(|w| w.equals(v));
        let items = match op {
            BinOp::BitOr => a.iter().chain(b.iter()).cloned().collect(),
            BinOp::BitAnd => a.iter().filter(|v| in_b(v)).cloned().collect(),
            BinOp::Sub => a.iter().filter(|v| !in_b(v)).cloned().collect(),
            BinOp::BitXor => {
                let mut out: Vec<Value> = a.iter().filter(|v| !in_b(v)).cloned().collect();
                out.extend(b.iter().filter(|v| !a.iter().any(|w| w.equals(v))).cloned());
                out
            }
            BinOp::Le | BinOp::Lt => {
                let subset = a.iter().all(|v| in_b(v));
                return Ok(Some(Value::Bool(subset && (op == BinOp::Le || a.len() < b.len()))));
            }
            BinOp::Ge | BinOp::Gt => {
                let superset = b.iter().all(|v| a.iter().any(|w| w.equals(v)));
                return Ok(Some(Value::Bool(superset && (op == BinOp::Ge || a.len() > b.len()))));
            }
            _ => return Ok(None),
        };
        Ok(Some(self.new_set(dedup(items))))
    }

    /// Methods on a wrapped set.
    pub(super) fn set_method(&mut self, set: &Value, name: &str, args: &[Value]) -> Result<Option<(Value, bool)>, Fault> {
        let item = arg(args, 0);
        let len = set.len().unwrap_or(0) as i64;
        Ok(Some(match name {
            "add" | "insert" => {
                let added = self.set_insert(set, item)?;
                let value = match self.language {
                    Language::Python => Value::None,
                    _ => Value::Bool(added),
                };
                (value, true)
            }
            "discard" => {
                self.set_remove(set, &item);
                (Value::None, true)
            }
            "remove" | "erase" => {
                let removed = self.set_remove(set, &item);
                match self.language {
                    Language::Python if !removed => {
                        return Err(self.raise("KeyError", item.repr(Language::Python)));
                    }
                    Language::Python => (Value::None, true),
                    Language::Cpp => (Value::Int(removed as i64), true),
                    _ => (Value::Bool(removed), true),
                }
            }
            "contains" => (Value::Bool(set.items().unwrap_or_default().iter().any(|v| v.equals(&item))), false),
            "count" => (Value::Int(set.items().unwrap_or_default().iter().any(|v| v.equals(&item)) as i64), false),
            "find" => match set.items().unwrap_or_default().into_iter().find(|v| v.equals(&item)) {
                Some(found) => (Value::list(vec![found]), false),
                None => (Value::None, false),
            },
            "end" => (Value::None, false),
            "begin" => (Value::list(set.items().unwrap_or_default()), false),
            "size" | "len" => (Value::Int(len), false),
            "isEmpty" | "is_empty" | "empty" => (Value::Bool(len == 0), false),
            "clear" => {
                if let Some(list) = payload_list(set) {
                    list.borrow_mut().clear();
                }
                (Value::None, true)
            }
            "pop" => {
                let Some(list) = payload_list(set) else {
                    return Ok(None);
                };
                if list.borrow().is_empty() {
                    return Err(self.raise("KeyError", "'pop from an empty set'"));
                }
                let first = list.borrow_mut().remove(0);
                (first, true)
            }
            "copy" | "clone" => (self.new_set(set.items().unwrap_or_default()), false),
            "update" | "addAll" | "extend" => {
                let mut changed = false;
                for value in args {
                    for item in self.iterate(value)? {
                        changed |= self.set_insert(set, item)?;
                    }
                }
                let value = match self.language {
                    Language::Java => Value::Bool(changed),
                    _ => Value::None,
                };
                (value, true)
            }
            "removeAll" | "retainAll" => {
                let others = self.iterate(&item)?;
                let keep_matches = name == "retainAll";
                if let Some(list) = payload_list(set) {
                    list.borrow_mut()
                        .retain(|v| others.iter().any(|o| o.equals(v)) == keep_matches);
                }
                (Value::Bool(true), true)
            }
            "union" | "intersection" | "difference" | "symmetric_difference" => {
                let op = match name {
                    "union" => BinOp::BitOr,
                    "intersection" => BinOp::BitAnd,
                    "difference" => BinOp::Sub,
                    _ => BinOp::BitXor,
                };
                let items = self.iterate(&item)?;
                let other = self.new_set(items);
                let result = self.set_binary(op, set, &other)?.unwrap_or(Value::None);
                match self.language {
                    // rust set operations yield iterators
                    Language::Rust => (Value::list(result.items().unwrap_or_default()), false),
                    _ => (result, false),
                }
            }
            "issubset" | "is_subset" | "issuperset" | "is_superset" | "isdisjoint" | "is_disjoint" => {
                let mine = set.items().unwrap_or_default();
                let theirs = self.iterate(&item)?;
                let has = |pool: &[Value], v: &Value| pool.iter().any(|w| w.equals(v));
                let answer = match name {
                    "issubset" | "is_subset" => mine.iter().all(|v| has(&theirs, v)),
                    "issuperset" | "is_superset" => theirs.iter().all(|v| has(&mine, v)),
                    _ => !mine.iter().any(|v| has(&theirs, v)),
                };
                (Value::Bool(answer), false)
            }
            "iter" | "into_iter" | "stream" | "iterator" => (Value::list(set.items().unwrap_or_default()), false),
            _ => return Ok(None),
        }))
    }
}

fn reversed_inner(value: &Value) -> Option<Value> {
    match value.deref() {
        Value::Object(object) => {
            let object = object.borrow();
            if object.class == "Reverse" {
                object.get("0").cloned()
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_unwraps() {
        let wrapped = Value::Object(std::rc::Rc::new(std::cell::RefCell::new(super::super::value::Object {
            class: "Reverse".to_string(),
            fields: vec![("0".to_string(), Value::Int(3))],
        })));
        assert!(matches!(reversed_inner(&wrapped), Some(Value::Int(3))));
        assert!(reversed_inner(&Value::Int(3)).is_none());
    }

    #[test]
    fn test_wrapped_kinds() {
        let set = Value::wrapper("set", Value::list(vec![Value::Int(1)]), Vec::new());
        assert!(is_set(&set));
        assert!(!is_heap(&set));
        assert_eq!(payload_list(&set).map(|l| l.borrow().len()), Some(1));
    }
}
