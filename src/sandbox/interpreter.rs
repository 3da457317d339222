// Tree-walking evaluator over the lowered IR

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

use super::cancel::CancellationToken;
use super::format;
use super::ir::{
    BinOp, Block, ClassDef, CompClause, Expr, FormatPart, Function, Handler, MatchArm, Pattern, Program, Stmt,
    StmtKind, Target, TypeHint,
};
use super::ops::{self, OpError};
use super::recorder::Recorder;
use super::value::{ordered_entries, Closure, Object, ObjectRef, Slot, SlotRef, Value};
use super::{EventKind, TraceLimits};
use crate::grammar::Language;
use crate::resolver::references::file_stem;
use crate::resolver::CompilationUnit;

/// Why execution stopped without a fault in the program itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Halt {
    StepLimit,
    Timeout,
    Cancelled,
}

/// Statement completion.
#[derive(Debug, Clone)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Anything that unwinds evaluation.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    /// Catchable by the program (`try`/`except`/`catch`).
    Exception {
        kind: String,
        message: String,
        payload: Value,
    },
    /// Aborts the program: segfault equivalents, rust panics.
    Fatal(String),
    Halt(Halt),
    /// Program requested termination (`exit`, `sys.exit`).
    Exit(i64),
    /// Control flow leaving an expression block (`return` inside a rust
    /// `match` arm, `break` inside `while let`).
    Escape(Flow),
}

pub(crate) type Exec = Result<Flow, Fault>;
pub(crate) type Eval = Result<Value, Fault>;

/// Resolved callee of a call expression.
enum CallTarget<'p> {
    User(&'p Function, Option<Value>),
    Construct(String),
    Variant(String),
    Value(Value),
}

pub(super) struct Frame {
    pub function: String,
    pub owner: Option<String>,
    scopes: Vec<HashMap<String, SlotRef>>,
    this: Option<Value>,
    globals_declared: HashSet<String>,
    scope_id: String,
    /// Top-level code: bindings go to the global table.
    module: bool,
    return_line: u32,
}

pub(crate) struct Interpreter<'p> {
    pub(super) program: &'p Program,
    pub(super) language: Language,
    pub(super) limits: TraceLimits,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    pub(super) recorder: Recorder,
    steps: usize,
    ticks: u64,
    globals: HashMap<String, SlotRef>,
    frames: Vec<Frame>,
    by_name: HashMap<&'p str, Vec<&'p Function>>,
    pub(super) file: String,
    pub(super) line: u32,
    /// Where the most recent exception or fatal fault was raised.
    fault_at: Option<(String, u32)>,
    serial: usize,
    /// Exceptions being handled, innermost last; bare `raise` re-raises.
    handling: Vec<Value>,
    pub(super) rng: u64,
    pub(super) cout_fixed: bool,
    pub(super) cout_precision: Option<usize>,
}

const MODULE_FRAME: &str = "<module>";

impl<'p> Interpreter<'p> {
    pub fn new(
        program: &'p Program,
        language: Language,
        limits: TraceLimits,
        cancel: CancellationToken,
        recorder: Recorder,
    ) -> Self {
        let mut by_name: HashMap<&'p str, Vec<&'p Function>> = HashMap::new();
        for function in &program.functions {
            by_name.entry(function.name.as_str()).or_default().push(function);
        }
        let deadline = Instant::now().checked_add(limits.timeout());
        Self {
            program,
            language,
            limits,
            cancel,
            deadline,
            recorder,
            steps: 0,
            ticks: 0,
            globals: HashMap::new(),
            frames: Vec::new(),
            by_name,
            file: String::new(),
            line: 0,
            fault_at: None,
            serial: 0,
            handling: Vec::new(),
            rng: 0x2545_F491_4F6C_DD1D,
            cout_fixed: false,
            cout_precision: None,
        }
    }

    pub fn location(&self) -> (String, u32) {
        self.fault_at.clone().unwrap_or_else(|| (self.file.clone(), self.line))
    }

    /// Python runs each module's top-level code in unit order. Everything
    /// else initializes globals in unit order and then calls `main`.
    pub fn run(&mut self, unit: &CompilationUnit) -> Result<(), Fault> {
        self.check_limits()?;
        let program = self.program;

        let outcome = self.run_modules(unit);
        let outcome = match (outcome, self.language) {
            (Ok(()), Language::Python) => Ok(()),
            (Ok(()), _) => {
                let entry = program
                    .functions
                    .iter()
                    .filter(|f| f.is_entry())
                    .min_by_key(|f| f.file != unit.primary);
                match entry {
                    Some(main) => {
                        let args = match (self.language, main.params.len()) {
                            (Language::Java, n) if n > 0 => vec![Value::list(Vec::new())],
                            (Language::C | Language::Cpp, 2) => {
                                vec![Value::Int(1), Value::list(vec![Value::str("prog")])]
                            }
                            _ => Vec::new(),
                        };
                        self.call_user(main, args, Vec::new(), None).map(|_| ())
                    }
                    None => Err(Fault::Fatal("no `main` function".to_string())),
                }
            }
            (err, _) => err,
        };

        match outcome {
            Err(Fault::Exit(_)) => Ok(()),
            other => other,
        }
    }

    fn run_modules(&mut self, unit: &CompilationUnit) -> Result<(), Fault> {
        let program = self.program;
        for file in &unit.files {
            let Some(module) = program.modules.iter().find(|m| m.file == file.path) else {
                continue;
            };
            self.file = module.file.clone();
            if self.language == Language::Python {
                let name = if file.path == unit.primary {
                    "__main__".to_string()
                } else {
                    file_stem(&file.path).to_string()
                };
                self.set_global("__name__", Value::Str(name));
            }
            self.push_frame(MODULE_FRAME, None, None, true);
            let result = self.exec_block(&module.body);
            self.frames.pop();
            match result {
                Ok(_) | Err(Fault::Escape(_)) => {}
                Err(fault) => return Err(fault),
            }
        }
        Ok(())
    }

    // limits and events

    fn check_limits(&mut self) -> Result<(), Fault> {
        if self.cancel.is_cancelled() {
            return Err(Fault::Halt(Halt::Cancelled));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Fault::Halt(Halt::Timeout));
            }
        }
        Ok(())
    }

    /// Called on every loop iteration so loops that emit no events still
    /// observe cancellation and the deadline.
    pub(super) fn tick(&mut self) -> Result<(), Fault> {
        self.ticks += 1;
        if self.ticks % 64 == 0 {
            self.check_limits()?;
        }
        Ok(())
    }

    pub(super) fn emit(&mut self, event: EventKind, line: u32, detail: Option<String>) -> Result<usize, Fault> {
        if self.steps >= self.limits.max_steps {
            return Err(Fault::Halt(Halt::StepLimit));
        }
        self.check_limits()?;
        let function = self.frames.last().map(|f| f.function.as_str()).unwrap_or(MODULE_FRAME);
        let index = self.recorder.push_step(&self.file, line, event, function, detail);
        self.steps += 1;
        Ok(index)
    }

    /// Emit an assignment step and append the variable's snapshot.
    pub(super) fn record(&mut self, name: &str, value: &Value) -> Result<(), Fault> {
        let index = self.emit(EventKind::Assignment, self.line, Some(name.to_string()))?;
        let scope_id = self
            .frames
            .last()
            .map(|f| f.scope_id.clone())
            .unwrap_or_else(|| format!("{}#0", MODULE_FRAME));
        let snapshot = match value {
            Value::Ref(_) => value.to_json(),
            other => other.deref().to_json(),
        };
        self.recorder.push_snapshot(name, index, snapshot, &scope_id);
        Ok(())
    }

    /// Build a catchable exception, emitting its step.
    pub(super) fn raise(&mut self, kind: &str, message: impl Into<String>) -> Fault {
        let message = message.into();
        let payload = Value::Exception {
            kind: kind.to_string(),
            message: message.clone(),
        };
        self.raise_value(kind.to_string(), message, payload)
    }

    fn raise_value(&mut self, kind: String, message: String, payload: Value) -> Fault {
        self.fault_at = Some((self.file.clone(), self.line));
        let detail = if message.is_empty() {
            kind.clone()
        } else {
            format!("{}: {}", kind, message)
        };
        match self.emit(EventKind::Exception, self.line, Some(detail)) {
            Ok(_) => Fault::Exception { kind, message, payload },
            Err(halt) => halt,
        }
    }

    /// Build an unrecoverable fault, emitting its step.
    pub(super) fn fatal(&mut self, message: impl Into<String>) -> Fault {
        let message = message.into();
        self.fault_at = Some((self.file.clone(), self.line));
        match self.emit(EventKind::Exception, self.line, Some(message.clone())) {
            Ok(_) => Fault::Fatal(message),
            Err(halt) => halt,
        }
    }

    pub(super) fn op_error(&mut self, err: OpError) -> Fault {
        match err.describe(self.language) {
            (Some(kind), message) => self.raise(kind, message),
            (None, message) => match self.language {
                Language::Rust => self.fatal(format!("panicked: {}", message)),
                _ => self.fatal(message),
            },
        }
    }

    /// Language-appropriate fault for a failed lookup or bad operand.
    pub(super) fn type_error(&mut self, message: impl Into<String>) -> Fault {
        match self.language {
            Language::Python => self.raise("TypeError", message),
            Language::Java => self.raise("IllegalArgumentException", message),
            _ => self.fatal(message),
        }
    }

    pub(super) fn check_len(&mut self, len: usize) -> Result<(), Fault> {
        if len > self.limits.max_collection_len {
            return Err(self.memory_error(format!(
                "collection of {} elements exceeds the limit of {}",
                len, self.limits.max_collection_len
            )));
        }
        Ok(())
    }

    /// Check `count` copies of something `unit` long against the string or
    /// collection limit before anything is allocated. Returns the count.
    pub(super) fn check_repeat(&mut self, unit: usize, count: i64, string: bool) -> Result<usize, Fault> {
        let count = count.max(0) as usize;
        let (limit, what) = if string {
            (self.limits.max_string_len, "string")
        } else {
            (self.limits.max_collection_len, "collection")
        };
        match unit.checked_mul(count) {
            Some(total) if total <= limit => Ok(count),
            Some(total) => Err(self.memory_error(format!("{} of {} would exceed the limit of {}", what, total, limit))),
            None => Err(self.memory_error(format!("{} size {} * {} overflows", what, unit, count))),
        }
    }

    fn check_str(&mut self, value: Value) -> Eval {
        if let Value::Str(s) = &value {
            if s.len() > self.limits.max_string_len {
                return Err(self.memory_error(format!(
                    "string of {} bytes exceeds the limit of {}",
                    s.len(),
                    self.limits.max_string_len
                )));
            }
        }
        Ok(value)
    }

    fn memory_error(&mut self, message: String) -> Fault {
        match self.language {
            Language::Python => self.raise("MemoryError", message),
            Language::Java => self.raise("OutOfMemoryError", message),
            _ => self.fatal(message),
        }
    }

    // frames and variables

    fn push_frame(&mut self, function: &str, owner: Option<String>, this: Option<Value>, module: bool) {
        let scope_id = format!("{}#{}", function, self.serial);
        self.serial += 1;
        self.frames.push(Frame {
            function: function.to_string(),
            owner,
            scopes: if module { Vec::new() } else { vec![HashMap::new()] },
            this,
            globals_declared: HashSet::new(),
            scope_id,
            module,
            return_line: 0,
        });
    }

    fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.push(HashMap::new());
        }
    }

    fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.pop();
        }
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Fault>) -> Result<T, Fault> {
        self.push_scope();
        let result = f(self);
        self.pop_scope();
        result
    }

    fn set_global(&mut self, name: &str, value: Value) {
        match self.globals.get(name) {
            Some(slot) => slot.borrow_mut().value = value,
            None => {
                self.globals.insert(name.to_string(), new_slot(name, value, TypeHint::Auto));
            }
        }
    }

    fn lookup_slot(&self, name: &str) -> Option<SlotRef> {
        if let Some(frame) = self.frames.last() {
            if !frame.globals_declared.contains(name) {
                for scope in frame.scopes.iter().rev() {
                    if let Some(slot) = scope.get(name) {
                        return Some(Rc::clone(slot));
                    }
                }
            }
        }
        self.globals.get(name).cloned()
    }

    pub(super) fn this_value(&self) -> Option<Value> {
        self.frames.last().and_then(|f| f.this.clone())
    }

    fn this_object(&self) -> Option<ObjectRef> {
        match self.this_value()?.deref() {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Java and C++ methods see their object's fields unqualified.
    fn implicit_field(&self, name: &str) -> Option<ObjectRef> {
        if !matches!(self.language, Language::Java | Language::Cpp) {
            return None;
        }
        let object = self.this_object()?;
        let has = object.borrow().get(name).is_some();
        has.then_some(object)
    }

    /// Current value of a variable without raising when it is missing.
    pub(super) fn peek_var(&self, name: &str) -> Option<Value> {
        if let Some(slot) = self.lookup_slot(name) {
            return Some(slot.borrow().value.clone());
        }
        let object = self.implicit_field(name)?;
        let value = object.borrow().get(name).cloned();
        value
    }

    fn is_bound(&self, name: &str) -> bool {
        self.lookup_slot(name).is_some() || self.implicit_field(name).is_some()
    }

    fn read_var(&mut self, name: &str) -> Eval {
        if let Some(value) = self.peek_var(name) {
            return Ok(value);
        }
        if self.by_name.contains_key(name) {
            return Ok(Value::Function(name.to_string()));
        }
        if let Some(value) = self.builtin_constant(name) {
            return Ok(value);
        }
        if self.is_builtin_function(name) {
            return Ok(Value::Function(name.to_string()));
        }
        if self.program.variant_owner(name).is_some() {
            return Ok(variant_value(name, Vec::new()));
        }
        if self.program.class(name).is_some() {
            return Ok(Value::Function(name.to_string()));
        }
        Err(self.undefined(name))
    }

    fn undefined(&mut self, name: &str) -> Fault {
        match self.language {
            Language::Python => self.raise("NameError", format!("name '{}' is not defined", name)),
            Language::Java => self.fatal(format!("cannot find symbol: {}", name)),
            Language::Rust => self.fatal(format!("cannot find value `{}` in this scope", name)),
            Language::C | Language::Cpp => self.fatal(format!("use of undeclared identifier '{}'", name)),
        }
    }

    /// Bind a fresh variable in the innermost scope (or the global table
    /// for top-level code).
    fn declare(&mut self, name: &str, value: Value, hint: TypeHint) -> SlotRef {
        let slot = new_slot(name, value, hint);
        match self.frames.last_mut() {
            Some(frame) if !frame.scopes.is_empty() => {
                if let Some(scope) = frame.scopes.last_mut() {
                    scope.insert(name.to_string(), Rc::clone(&slot));
                }
            }
            _ => {
                self.globals.insert(name.to_string(), Rc::clone(&slot));
            }
        }
        slot
    }

    fn assign_var(&mut self, name: &str, value: Value) -> Result<(), Fault> {
        if let Some(slot) = self.lookup_slot(name) {
            let hint = slot.borrow().hint.clone();
            let value = self.coerce(value, &hint)?;
            slot.borrow_mut().value = value.clone();
            return self.record(name, &value);
        }
        if let Some(object) = self.implicit_field(name) {
            object.borrow_mut().set(name, value.clone());
            return self.record(name, &value);
        }

        let python = self.language == Language::Python;
        match self.frames.last_mut() {
            Some(frame) if python && !frame.module && !frame.scopes.is_empty() => {
                // python locals are function-scoped
                frame.scopes[0].insert(name.to_string(), new_slot(name, value.clone(), TypeHint::Auto));
            }
            _ => {
                self.declare(name, value.clone(), TypeHint::Auto);
            }
        }
        self.record(name, &value)
    }

    /// Store through an assignment target.
    fn assign(&mut self, target: &Target, value: Value) -> Result<(), Fault> {
        match target {
            Target::Var(name) => self.assign_var(name, value),
            Target::Tuple(targets) => {
                let items = self.unpack(&value, targets.len())?;
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            Target::Deref(pointer) => {
                if let Some((map, key)) = entry_place(pointer) {
                    return self.store_entry(map, key, value);
                }
                let pointer = self.eval(pointer)?;
                match pointer {
                    Value::Ref(slot) => {
                        let hint = slot.borrow().hint.clone();
                        let value = self.coerce(value, &hint)?;
                        let name = {
                            let mut cell = slot.borrow_mut();
                            cell.value = value.clone();
                            cell.name.clone()
                        };
                        self.record(&name, &value)
                    }
                    Value::List(items) => {
                        let mut items = items.borrow_mut();
                        match items.first_mut() {
                            Some(first) => {
                                *first = value;
                                Ok(())
                            }
                            None => Err(Fault::Fatal("Segmentation fault: write through empty pointer".into())),
                        }
                    }
                    Value::None => Err(self.fatal("Segmentation fault: null pointer dereference")),
                    other if other.is_number() && matches!(self.language, Language::C | Language::Cpp) => {
                        Err(self.fatal("Segmentation fault: null pointer dereference"))
                    }
                    other => Err(self.type_error(format!("cannot dereference a value of type {}", other.type_name()))),
                }
            }
            Target::Index { base, index } => {
                let container = self.read_target(base)?.deref();
                let index = self.eval(index)?;
                self.store_index(base, &container, index, value)?;
                self.record_root(target)
            }
            Target::Field { base, name } => {
                let container = self.read_target(base)?.deref();
                match container {
                    Value::Object(object) => {
                        let hint = self
                            .field_hint(&object.borrow().class, name)
                            .unwrap_or(TypeHint::Auto);
                        let value = self.coerce(value, &hint)?;
                        object.borrow_mut().set(name, value);
                    }
                    Value::None => {
                        return Err(match self.language {
                            Language::Java => self.raise("NullPointerException", format!("cannot assign field \"{}\"", name)),
                            Language::Python => {
                                self.raise("AttributeError", format!("'NoneType' object has no attribute '{}'", name))
                            }
                            _ => self.fatal("Segmentation fault: null pointer dereference"),
                        })
                    }
                    other if other.is_number() && matches!(self.language, Language::C | Language::Cpp) => {
                        return Err(self.fatal("Segmentation fault: null pointer dereference"))
                    }
                    other => {
                        let message = format!("'{}' object has no attribute '{}'", other.type_name(), name);
                        return Err(match self.language {
                            Language::Python => self.raise("AttributeError", message),
                            _ => self.fatal(message),
                        });
                    }
                }
                self.record_root(target)
            }
        }
    }

    /// `*map.entry(k).or_insert(0) = v` writes the map slot itself.
    fn store_entry(&mut self, map: &Expr, key: &Expr, value: Value) -> Result<(), Fault> {
        let container = self.eval(map)?.deref();
        let key = self.eval(key)?.deref();
        let Value::Dict(entries) = container else {
            return Err(self.type_error(format!("cannot index into a value of type {}", container.type_name())));
        };
        {
            let mut entries = entries.borrow_mut();
            match entries.iter_mut().find(|(k, _)| k.equals(&key)) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        }
        match expr_target(map) {
            Some(place) => self.record_root(&place),
            None => Ok(()),
        }
    }

    /// Snapshot the variable an indexed or field assignment changed.
    fn record_root(&mut self, target: &Target) -> Result<(), Fault> {
        let Some(root) = target.root() else {
            return Ok(());
        };
        match self.peek_var(root) {
            Some(value) => self.record(root, &value),
            None => Ok(()),
        }
    }

    fn read_target(&mut self, target: &Target) -> Eval {
        match target {
            Target::Var(name) => self.read_var(name),
            Target::Index { base, index } => {
                let container = self.read_target(base)?;
                let index = self.eval(index)?;
                self.index_value(&container, &index)
            }
            Target::Field { base, name } => {
                let value = self.read_target(base)?;
                self.field_value(&value, name)
            }
            Target::Deref(pointer) => {
                let pointer = self.eval(pointer)?;
                self.deref_value(pointer)
            }
            Target::Tuple(targets) => {
                let mut items = Vec::new();
                for target in targets {
                    items.push(self.read_target(target)?);
                }
                Ok(Value::tuple(items))
            }
        }
    }

    fn store_index(&mut self, base: &Target, container: &Value, index: Value, value: Value) -> Result<(), Fault> {
        match container {
            Value::List(items) => {
                let len = items.borrow().len();
                let position = self.position(&index, len)?;
                items.borrow_mut()[position] = value;
                Ok(())
            }
            Value::Dict(entries) => {
                let mut entries = entries.borrow_mut();
                match entries.iter_mut().find(|(k, _)| k.equals(&index)) {
                    Some((_, slot)) => *slot = value,
                    None => entries.push((index, value)),
                }
                Ok(())
            }
            Value::Str(text) if self.language != Language::Python => {
                let mut chars: Vec<char> = text.chars().collect();
                let position = self.position(&index, chars.len())?;
                chars[position] = match value.deref() {
                    Value::Char(c) => c,
                    Value::Str(s) => s.chars().next().unwrap_or('\0'),
                    other => other.as_int().and_then(|i| char::from_u32(i as u32)).unwrap_or('\0'),
                };
                let updated = Value::Str(chars.into_iter().collect());
                self.write_back(base, updated)
            }
            Value::Tuple(_) | Value::Str(_) => Err(self.type_error(format!(
                "'{}' object does not support item assignment",
                container.type_name()
            ))),
            Value::None => Err(match self.language {
                Language::Java => self.raise("NullPointerException", "cannot store to array because it is null"),
                _ => self.fatal("Segmentation fault: null pointer dereference"),
            }),
            other => Err(self.type_error(format!("'{}' object does not support item assignment", other.type_name()))),
        }
    }

    /// Replace a value-typed container (strings) in place without emitting
    /// an extra step; the caller records the root.
    fn write_back(&mut self, target: &Target, value: Value) -> Result<(), Fault> {
        match target {
            Target::Var(name) => {
                if let Some(slot) = self.lookup_slot(name) {
                    slot.borrow_mut().value = value;
                } else if let Some(object) = self.implicit_field(name) {
                    object.borrow_mut().set(name, value);
                }
                Ok(())
            }
            Target::Index { base, index } => {
                let container = self.read_target(base)?.deref();
                let index = self.eval(index)?;
                self.store_index(base, &container, index, value)
            }
            Target::Field { base, name } => {
                if let Value::Object(object) = self.read_target(base)?.deref() {
                    object.borrow_mut().set(name, value);
                }
                Ok(())
            }
            Target::Deref(pointer) => {
                if let Value::Ref(slot) = self.eval(pointer)? {
                    slot.borrow_mut().value = value;
                }
                Ok(())
            }
            Target::Tuple(_) => Ok(()),
        }
    }

    fn unpack(&mut self, value: &Value, expected: usize) -> Result<Vec<Value>, Fault> {
        let items = self.iterate(value)?;
        if items.len() != expected {
            let message = if items.len() < expected {
                format!("not enough values to unpack (expected {}, got {})", expected, items.len())
            } else {
                format!("too many values to unpack (expected {})", expected)
            };
            return Err(match self.language {
                Language::Python => self.raise("ValueError", message),
                _ => self.fatal(message),
            });
        }
        Ok(items)
    }

    /// Normalize an index against `len`, raising the language's
    /// out-of-bounds error.
    pub(super) fn position(&mut self, index: &Value, len: usize) -> Result<usize, Fault> {
        let Some(raw) = index.deref().as_int() else {
            return Err(self.type_error(format!("indices must be integers, not {}", index.type_name())));
        };
        let adjusted = if raw < 0 && self.language == Language::Python {
            raw + len as i64
        } else {
            raw
        };
        if adjusted >= 0 && (adjusted as usize) < len {
            return Ok(adjusted as usize);
        }
        Err(match self.language {
            Language::Python => self.raise("IndexError", "list index out of range"),
            Language::Java => self.raise(
                "ArrayIndexOutOfBoundsException",
                format!("Index {} out of bounds for length {}", raw, len),
            ),
            Language::Rust => self.fatal(format!(
                "panicked: index out of bounds: the len is {} but the index is {}",
                len, raw
            )),
            Language::C | Language::Cpp => self.fatal(format!(
                "Segmentation fault: index {} out of bounds for length {}",
                raw, len
            )),
        })
    }

    // type hints

    fn field_hint(&self, class: &str, field: &str) -> Option<TypeHint> {
        self.class_chain(class)
            .into_iter()
            .flat_map(|c| c.fields.iter())
            .find(|f| f.name == field)
            .map(|f| f.hint.clone())
    }

    pub(super) fn class_chain(&self, class: &str) -> Vec<&'p ClassDef> {
        let program = self.program;
        let mut chain = Vec::new();
        // enum variants inherit the methods of their enum
        let mut current = program.class(class).or_else(|| program.variant_owner(class));
        while let Some(def) = current {
            if chain.iter().any(|c: &&ClassDef| c.name == def.name) {
                break;
            }
            chain.push(def);
            current = def.base.as_deref().and_then(|b| program.class(b));
        }
        chain
    }

    pub(super) fn default_for(&mut self, hint: &TypeHint) -> Eval {
        Ok(match hint {
            TypeHint::Int => Value::Int(0),
            TypeHint::Float => Value::Float(0.0),
            TypeHint::Bool => Value::Bool(false),
            TypeHint::Char => Value::Char('\0'),
            TypeHint::Str if self.language == Language::Cpp => Value::str(""),
            TypeHint::List if self.language == Language::Cpp => Value::list(Vec::new()),
            TypeHint::Struct(name) if matches!(self.language, Language::C | Language::Cpp) => {
                if self.program.class(name).is_some() {
                    self.new_object(name)?
                } else {
                    Value::None
                }
            }
            _ => Value::None,
        })
    }

    /// Convert a value to a declared type, as an initialization or
    /// assignment to that type would.
    pub(super) fn coerce(&mut self, value: Value, hint: &TypeHint) -> Eval {
        if *hint == TypeHint::Auto || self.language == Language::Python {
            return Ok(value);
        }
        Ok(match (hint, value) {
            (TypeHint::Int, Value::Float(f)) => Value::Int(f as i64),
            (TypeHint::Int, Value::Bool(b)) => Value::Int(b as i64),
            (TypeHint::Int, Value::Char(c)) => Value::Int(c as i64),
            (TypeHint::Float, v @ (Value::Int(_) | Value::Bool(_) | Value::Char(_))) => {
                Value::Float(v.as_f64().unwrap_or(0.0))
            }
            (TypeHint::Char, Value::Int(i)) => Value::Char(char::from_u32(i as u32).unwrap_or('\0')),
            (TypeHint::Str, Value::List(items)) if self.language == Language::Rust => {
                Value::Str(items.borrow().iter().map(|v| v.display(Language::Rust)).collect())
            }
            (TypeHint::Bool, v) if v.is_number() && self.language != Language::Rust => Value::Bool(v.truthy()),
            (TypeHint::Struct(name), Value::List(items)) if matches!(name.as_str(), "HashSet" | "BTreeSet" | "set" | "unordered_set") => {
                let items = items.borrow().clone();
                self.new_set(items)
            }
            (TypeHint::Struct(name), Value::List(items)) if matches!(name.as_str(), "HashMap" | "BTreeMap") => {
                let pairs = items.borrow().clone();
                let mut entries: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
                for pair in pairs {
                    let mut parts = self.iterate(&pair)?.into_iter();
                    let key = parts.next().unwrap_or(Value::None);
                    let value = parts.next().unwrap_or(Value::None);
                    match entries.iter_mut().find(|(k, _)| k.equals(&key)) {
                        Some(entry) => entry.1 = value,
                        None => entries.push((key, value)),
                    }
                }
                Value::dict(entries)
            }
            (TypeHint::Struct(name), Value::List(items)) if self.program.class(name).is_some() => {
                let object = self.new_object(name)?;
                if let Value::Object(o) = &object {
                    let fields: Vec<String> = o.borrow().fields.iter().map(|(n, _)| n.clone()).collect();
                    let items = items.borrow().clone();
                    for (field, item) in fields.iter().zip(items) {
                        let hint = self.field_hint(name, field).unwrap_or(TypeHint::Auto);
                        let item = self.coerce(item, &hint)?;
                        o.borrow_mut().set(field, item);
                    }
                }
                object
            }
            (TypeHint::Struct(_), v @ Value::Object(_)) if matches!(self.language, Language::C | Language::Cpp) => {
                v.deep_copy()
            }
            (_, v) => v,
        })
    }

    fn cast(&mut self, value: Value, hint: &TypeHint) -> Eval {
        let value = value.deref();
        Ok(match (hint, &value) {
            (TypeHint::Int, Value::Float(f)) => Value::Int(*f as i64),
            (TypeHint::Int, v) if v.is_number() => Value::Int(v.as_int().unwrap_or(0)),
            (TypeHint::Float, v) if v.is_number() => Value::Float(v.as_f64().unwrap_or(0.0)),
            (TypeHint::Char, Value::Int(i)) => Value::Char(char::from_u32(*i as u32).unwrap_or('\0')),
            (TypeHint::Bool, v) => Value::Bool(v.truthy()),
            (TypeHint::Str, v) => Value::Str(v.display(self.language)),
            _ => value.clone(),
        })
    }

    // statements

    pub(super) fn exec_block(&mut self, block: &Block) -> Exec {
        for stmt in block {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_scoped(&mut self, block: &Block) -> Exec {
        self.scoped(|this| this.exec_block(block))
    }

    fn exec(&mut self, stmt: &Stmt) -> Exec {
        self.line = stmt.line;
        match self.exec_inner(stmt) {
            Err(Fault::Escape(flow)) => Ok(flow),
            other => other,
        }
    }

    fn exec_inner(&mut self, stmt: &Stmt) -> Exec {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::Declare { name, hint, value, copy } => {
                let initial = match value {
                    Some(expr) => Some(self.eval(expr)?),
                    None => None,
                };
                let recorded = initial.is_some();
                let value = match initial {
                    Some(v) if *copy => v.deep_copy(),
                    Some(v) => v,
                    None => self.default_for(hint)?,
                };
                let value = self.coerce(value, hint)?;
                self.declare(name, value.clone(), hint.clone());
                if recorded {
                    self.record(name, &value)?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::If { cond, then, otherwise } => {
                let taken = self.condition(cond, stmt.line)?;
                if taken {
                    self.exec_scoped(then)
                } else if let Some(otherwise) = otherwise {
                    self.exec_scoped(otherwise)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    self.tick()?;
                    self.line = stmt.line;
                    if !self.condition(cond, stmt.line)? {
                        return Ok(Flow::Normal);
                    }
                    match self.exec_scoped(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::DoWhile { body, cond } => loop {
                self.tick()?;
                match self.exec_scoped(body)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                self.line = stmt.line;
                if !self.condition(cond, stmt.line)? {
                    return Ok(Flow::Normal);
                }
            },
            StmtKind::For { init, cond, update, body } => self.scoped(|this| {
                this.exec_block(init)?;
                loop {
                    this.tick()?;
                    this.line = stmt.line;
                    if let Some(cond) = cond {
                        if !this.condition(cond, stmt.line)? {
                            return Ok(Flow::Normal);
                        }
                    }
                    match this.exec_scoped(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    this.line = stmt.line;
                    for expr in update {
                        this.eval(expr)?;
                    }
                }
            }),
            StmtKind::ForEach { target, iter, body } => {
                let iterable = self.eval(iter)?.deref();
                self.scoped(|this| match iterable {
                    Value::Range { start, end, step } => {
                        let mut current = start;
                        while (step > 0 && current < end) || (step < 0 && current > end) {
                            match this.loop_iteration(target, Value::Int(current), body, stmt.line)? {
                                Flow::Break => break,
                                Flow::Return(v) => return Ok(Flow::Return(v)),
                                _ => {}
                            }
                            current += step;
                        }
                        Ok(Flow::Normal)
                    }
                    other => {
                        for item in this.iterate(&other)? {
                            match this.loop_iteration(target, item, body, stmt.line)? {
                                Flow::Break => break,
                                Flow::Return(v) => return Ok(Flow::Return(v)),
                                _ => {}
                            }
                        }
                        Ok(Flow::Normal)
                    }
                })
            }
            StmtKind::Switch { value, cases, fallthrough } => {
                let value = self.eval(value)?;
                let mut matched = None;
                'search: for (i, case) in cases.iter().enumerate() {
                    for label in &case.labels {
                        let label = self.eval(label)?;
                        if label.equals(&value) {
                            matched = Some((i, format!("case {}", label.display(self.language))));
                            break 'search;
                        }
                    }
                }
                if matched.is_none() {
                    matched = cases
                        .iter()
                        .position(|c| c.labels.is_empty())
                        .map(|i| (i, "default".to_string()));
                }
                let Some((start, detail)) = matched else {
                    self.emit(EventKind::Branch, stmt.line, Some("no case".to_string()))?;
                    return Ok(Flow::Normal);
                };
                self.emit(EventKind::Branch, stmt.line, Some(detail))?;
                let end = if *fallthrough { cases.len() } else { start + 1 };
                self.scoped(|this| {
                    for case in &cases[start..end] {
                        match this.exec_block(&case.body)? {
                            Flow::Normal => {}
                            Flow::Break => return Ok(Flow::Normal),
                            flow => return Ok(flow),
                        }
                    }
                    Ok(Flow::Normal)
                })
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                if let Some(frame) = self.frames.last_mut() {
                    frame.return_line = stmt.line;
                }
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Pass => Ok(Flow::Normal),
            StmtKind::Raise(value) => Err(self.throw(value.as_ref())?),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => self.exec_try(body, handlers, orelse, finally),
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.globals_declared.extend(names.iter().cloned());
                }
                Ok(Flow::Normal)
            }
            StmtKind::Block(block) => self.exec_scoped(block),
            StmtKind::Unsupported(what) => Err(self.fatal(format!("unsupported construct `{}`", what))),
        }
    }

    fn loop_iteration(&mut self, target: &Target, item: Value, body: &Block, line: u32) -> Exec {
        self.tick()?;
        self.line = line;
        self.bind_loop_target(target, item)?;
        self.exec_scoped(body)
    }

    /// Loop variables live in the loop's scope, except in python where they
    /// are ordinary function locals.
    fn bind_loop_target(&mut self, target: &Target, item: Value) -> Result<(), Fault> {
        match (target, self.language) {
            (Target::Var(name), language) if language != Language::Python => {
                let already = self
                    .frames
                    .last()
                    .and_then(|f| f.scopes.last())
                    .is_some_and(|s| s.contains_key(name));
                if already {
                    self.assign_var(name, item)
                } else {
                    self.declare(name, item.clone(), TypeHint::Auto);
                    self.record(name, &item)
                }
            }
            (Target::Tuple(targets), language) if language != Language::Python => {
                let items = self.unpack(&item, targets.len())?;
                for (target, item) in targets.iter().zip(items) {
                    self.bind_loop_target(target, item)?;
                }
                Ok(())
            }
            _ => self.assign(target, item),
        }
    }

    fn condition(&mut self, cond: &Expr, line: u32) -> Result<bool, Fault> {
        let taken = self.eval(cond)?.truthy();
        self.emit(EventKind::Branch, line, Some(taken.to_string()))?;
        Ok(taken)
    }

    fn throw(&mut self, value: Option<&Expr>) -> Result<Fault, Fault> {
        let Some(expr) = value else {
            return Ok(match self.handling.last().cloned() {
                Some(payload) => {
                    let (kind, message) = exception_parts(&payload, self.language);
                    self.raise_value(kind, message, payload)
                }
                None => self.raise("RuntimeError", "No active exception to reraise"),
            });
        };
        let value = self.eval(expr)?.deref();
        Ok(match &value {
            Value::Exception { kind, message } => self.raise_value(kind.clone(), message.clone(), value.clone()),
            Value::Function(name) if self.is_exception_kind(name) => self.raise(name, ""),
            Value::Object(object) => {
                let class = object.borrow().class.clone();
                let message = object
                    .borrow()
                    .get("message")
                    .map(|m| m.display(self.language))
                    .unwrap_or_default();
                self.raise_value(class, message, value.clone())
            }
            Value::None if self.language == Language::Java => {
                self.raise("NullPointerException", "Cannot throw null")
            }
            other => {
                let (kind, message) = exception_parts(other, self.language);
                self.raise_value(kind, message, value.clone())
            }
        })
    }

    fn exec_try(&mut self, body: &Block, handlers: &[Handler], orelse: &Block, finally: &Block) -> Exec {
        let mut result = self.exec_scoped(body);

        if let Err(Fault::Exception { kind, payload, .. }) = &result {
            let handler = handlers
                .iter()
                .find(|h| h.kinds.is_empty() || h.kinds.iter().any(|k| self.exception_matches(kind, k)));
            if let Some(handler) = handler {
                let payload = payload.clone();
                result = self.scoped(|this| {
                    if let Some(binding) = &handler.binding {
                        this.declare(binding, payload.clone(), TypeHint::Auto);
                        this.record(binding, &payload)?;
                    }
                    this.handling.push(payload);
                    let outcome = this.exec_block(&handler.body);
                    this.handling.pop();
                    outcome
                });
            }
        } else if matches!(result, Ok(Flow::Normal)) {
            result = self.exec_scoped(orelse);
        }

        if finally.is_empty() || matches!(result, Err(Fault::Halt(_)) | Err(Fault::Fatal(_)) | Err(Fault::Exit(_))) {
            return result;
        }
        match self.exec_scoped(finally)? {
            Flow::Normal => result,
            flow => Ok(flow),
        }
    }

    // exceptions

    pub(super) fn is_exception_kind(&self, name: &str) -> bool {
        let mut current = name.to_string();
        for _ in 0..32 {
            if builtin_exception_parent(&current).is_some()
                || matches!(current.as_str(), "BaseException" | "Throwable" | "exception")
                || current.ends_with("Error")
                || current.ends_with("Exception")
            {
                return true;
            }
            match self.program.class(&current).and_then(|c| c.base.clone()) {
                Some(base) => current = base,
                None => return false,
            }
        }
        false
    }

    /// Whether a raised `kind` is caught by a handler for `handler`.
    pub(super) fn exception_matches(&self, kind: &str, handler: &str) -> bool {
        let mut current = kind.to_string();
        for _ in 0..32 {
            if current == handler {
                return true;
            }
            let parent = self
                .program
                .class(&current)
                .and_then(|c| c.base.clone())
                .or_else(|| builtin_exception_parent(&current).map(str::to_string));
            match parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    // expressions

    pub(super) fn eval(&mut self, expr: &Expr) -> Eval {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.read_var(name),
            Expr::List(items) => {
                let values = self.eval_all(items)?;
                self.check_len(values.len())?;
                Ok(Value::list(values))
            }
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Dict(entries) => {
                let mut out: Vec<(Value, Value)> = Vec::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    match out.iter_mut().find(|(k, _)| k.equals(&key)) {
                        Some((_, slot)) => *slot = value,
                        None => out.push((key, value)),
                    }
                }
                Ok(Value::dict(out))
            }
            Expr::Repeat { value, count } => {
                let value = self.eval(value)?;
                let count = self.eval(count)?.as_int().unwrap_or(0).max(0) as usize;
                self.check_len(count)?;
                Ok(Value::list((0..count).map(|_| value.deep_copy()).collect()))
            }
            Expr::Array { dims, hint, init } => {
                let mut sizes = Vec::new();
                for dim in dims {
                    let size = self.eval(dim)?.as_int().unwrap_or(0);
                    if size < 0 {
                        return Err(match self.language {
                            Language::Java => self.raise("NegativeArraySizeException", size.to_string()),
                            _ => self.fatal(format!("negative array size {}", size)),
                        });
                    }
                    sizes.push(size as usize);
                }
                let total = sizes.iter().try_fold(1usize, |acc, s| acc.checked_mul(*s)).unwrap_or(usize::MAX);
                self.check_len(total)?;
                let fill = self.default_for(hint)?;
                let initial = match init {
                    Some(init) => Some(self.eval(init)?),
                    None => None,
                };
                self.build_array(&sizes, &fill, initial.as_ref(), hint)
            }
            Expr::Range { start, end, inclusive } => {
                let start = match start {
                    Some(e) => self.eval(e)?.as_int().unwrap_or(0),
                    None => 0,
                };
                let end = match end {
                    Some(e) => {
                        let end = self.eval(e)?.as_int().unwrap_or(0);
                        if *inclusive {
                            end.saturating_add(1)
                        } else {
                            end
                        }
                    }
                    None => i64::MAX,
                };
                Ok(Value::Range { start, end, step: 1 })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                ops::unary(*op, &operand, self.language).map_err(|e| self.op_error(e))
            }
            Expr::Logical { and, left, right } => {
                let left = self.eval(left)?;
                let short = if *and { !left.truthy() } else { left.truthy() };
                let result = if short { left } else { self.eval(right)? };
                Ok(match self.language {
                    Language::Python => result,
                    _ => Value::Bool(result.truthy()),
                })
            }
            Expr::Cond { cond, then, otherwise } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call {
                name,
                qualifier,
                args,
                kwargs,
            } => self.eval_call(name, qualifier.as_deref(), args, kwargs),
            Expr::Method {
                receiver,
                name,
                args,
                kwargs,
            } => self.eval_method(receiver, name, args, kwargs),
            Expr::New { class, args } => {
                let args = self.eval_all(args)?;
                self.construct(class, args, Vec::new())
            }
            Expr::StructLit { class, fields } => {
                let class = match class.as_str() {
                    "Self" => self.current_owner().unwrap_or_else(|| class.clone()),
                    _ => class.clone(),
                };
                let mut values = Vec::new();
                for (name, expr) in fields {
                    values.push((name.clone(), self.eval(expr)?));
                }
                Ok(Value::Object(Rc::new(RefCell::new(Object { class, fields: values }))))
            }
            Expr::Index { target, index } => {
                let container = self.eval(target)?;
                let index = self.eval(index)?;
                self.index_value(&container, &index)
            }
            Expr::Slice { target, start, end, step } => {
                let container = self.eval(target)?.deref();
                let start = self.eval_opt_int(start.as_deref())?;
                let end = self.eval_opt_int(end.as_deref())?;
                let step = self.eval_opt_int(step.as_deref())?.unwrap_or(1);
                self.slice(&container, start, end, step)
            }
            Expr::Field { target, name } => {
                if let Some(path) = self.static_path(target) {
                    return self.eval_path(&path, name);
                }
                let value = self.eval(target)?;
                self.field_value(&value, name)
            }
            Expr::Path { qualifier, name } => self.eval_path(qualifier, name),
            Expr::Try(inner) => {
                let value = self.eval(inner)?;
                match value.deref() {
                    Value::None => Err(Fault::Escape(Flow::Return(Value::None))),
                    err @ Value::Exception { .. } => Err(Fault::Escape(Flow::Return(err))),
                    _ => Ok(value),
                }
            }
            Expr::Cast { hint, value } => {
                let value = self.eval(value)?;
                self.cast(value, hint)
            }
            Expr::AddrOf(inner) => match inner.as_ref() {
                Expr::Var(name) => match self.lookup_slot(name) {
                    Some(slot) => Ok(Value::Ref(slot)),
                    None => self.read_var(name),
                },
                other => self.eval(other),
            },
            Expr::Deref(inner) => {
                let value = self.eval(inner)?;
                self.deref_value(value)
            }
            Expr::Assign { target, op, value } => {
                let value = self.eval(value)?;
                let value = match op {
                    Some(op) => {
                        let current = self.read_target(target)?;
                        self.binary(*op, &current, &value)?
                    }
                    None => value,
                };
                self.assign(target, value.clone())?;
                Ok(value)
            }
            Expr::Update { target, delta, prefix } => {
                let current = self.read_target(target)?;
                let updated = self.binary(BinOp::Add, &current, &Value::Int(*delta))?;
                self.assign(target, updated.clone())?;
                Ok(if *prefix { updated } else { current })
            }
            Expr::Block { body, tail } => self.scoped(|this| {
                match this.exec_block(body)? {
                    Flow::Normal => {}
                    flow => return Err(Fault::Escape(flow)),
                }
                match tail {
                    Some(tail) => this.eval(tail),
                    None => Ok(Value::None),
                }
            }),
            Expr::IfElse { cond, then, otherwise } => {
                let line = self.line;
                if self.condition(cond, line)? {
                    self.eval(then)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(otherwise),
                        None => Ok(Value::None),
                    }
                }
            }
            Expr::Match { value, arms } => {
                let value = self.eval(value)?;
                self.eval_match(value, arms)
            }
            Expr::Lambda { params, body } => {
                let captured = self
                    .frames
                    .last()
                    .map(|frame| {
                        let mut seen = HashSet::new();
                        let mut captured = Vec::new();
                        for scope in frame.scopes.iter().rev() {
                            for (name, slot) in scope {
                                if seen.insert(name.clone()) {
                                    captured.push((name.clone(), Rc::clone(slot)));
                                }
                            }
                        }
                        captured
                    })
                    .unwrap_or_default();
                Ok(Value::Closure(Rc::new(Closure {
                    params: params.clone(),
                    body: (**body).clone(),
                    captured,
                })))
            }
            Expr::Comprehension { element, key, clauses } => self.scoped(|this| {
                let mut out = Vec::new();
                this.comprehend(element, key.as_deref(), clauses, &mut out)?;
                match key {
                    Some(_) => {
                        let mut entries: Vec<(Value, Value)> = Vec::new();
                        for pair in out {
                            if let Value::Tuple(pair) = pair {
                                if let [k, v] = pair.as_slice() {
                                    match entries.iter_mut().find(|(existing, _)| existing.equals(k)) {
                                        Some((_, slot)) => *slot = v.clone(),
                                        None => entries.push((k.clone(), v.clone())),
                                    }
                                }
                            }
                        }
                        Ok(Value::dict(entries))
                    }
                    None => Ok(Value::list(out)),
                }
            }),
            Expr::Format(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FormatPart::Text(text) => out.push_str(text),
                        FormatPart::Value { expr, repr, spec } => {
                            let value = self.eval(expr)?;
                            if *repr {
                                out.push_str(&value.repr(self.language));
                            } else if spec.is_empty() {
                                out.push_str(&self.display_value(&value)?);
                            } else {
                                let text = format::apply_spec(&value, spec, self.language);
                                match text {
                                    Ok(text) => out.push_str(&text),
                                    Err(message) => return Err(self.raise("ValueError", message)),
                                }
                            }
                        }
                    }
                }
                self.check_str(Value::Str(out))
            }
            Expr::Unsupported(what) => Err(self.fatal(format!("unsupported construct `{}`", what))),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, Fault> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval(expr)?);
        }
        Ok(values)
    }

    fn eval_kwargs(&mut self, kwargs: &[(String, Expr)]) -> Result<Vec<(String, Value)>, Fault> {
        let mut values = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            values.push((name.clone(), self.eval(expr)?));
        }
        Ok(values)
    }

    fn eval_opt_int(&mut self, expr: Option<&Expr>) -> Result<Option<i64>, Fault> {
        match expr {
            Some(expr) => {
                let value = self.eval(expr)?;
                match value.deref() {
                    Value::None => Ok(None),
                    v => match v.as_int() {
                        Some(i) => Ok(Some(i)),
                        None => Err(self.type_error("slice indices must be integers or None")),
                    },
                }
            }
            None => Ok(None),
        }
    }

    pub(super) fn binary(&mut self, op: BinOp, left: &Value, right: &Value) -> Eval {
        if let Some(result) = self.set_binary(op, left, right)? {
            return Ok(result);
        }
        if op == BinOp::Mul && self.language == Language::Python {
            if let Some((unit, count, string)) = repeat_operands(left, right) {
                self.check_repeat(unit, count, string)?;
            }
        }
        let result = ops::binary(op, left, right, self.language).map_err(|e| self.op_error(e))?;
        if let Value::List(items) = &result {
            let len = items.borrow().len();
            self.check_len(len)?;
        }
        self.check_str(result)
    }

    fn build_array(&mut self, sizes: &[usize], fill: &Value, init: Option<&Value>, hint: &TypeHint) -> Eval {
        let Some((&size, rest)) = sizes.split_first() else {
            return match init {
                Some(value) => self.coerce(value.clone(), hint),
                None => Ok(fill.deep_copy()),
            };
        };
        let given = match init {
            Some(value) => value.items().unwrap_or_default(),
            None => Vec::new(),
        };
        let mut items = Vec::with_capacity(size);
        for i in 0..size.max(given.len()) {
            items.push(self.build_array(rest, fill, given.get(i), hint)?);
        }
        Ok(Value::list(items))
    }

    fn deref_value(&mut self, value: Value) -> Eval {
        match value {
            Value::Ref(slot) => Ok(slot.borrow().value.clone()),
            Value::List(items) => {
                let first = items.borrow().first().cloned();
                match first {
                    Some(first) => Ok(first),
                    None => Err(self.fatal("Segmentation fault: read through empty pointer")),
                }
            }
            Value::None => Err(self.fatal("Segmentation fault: null pointer dereference")),
            // a pointer holding an integer address, in practice 0
            other if other.is_number() && matches!(self.language, Language::C | Language::Cpp) => {
                Err(self.fatal("Segmentation fault: null pointer dereference"))
            }
            other => Ok(other),
        }
    }

    pub(super) fn index_value(&mut self, container: &Value, index: &Value) -> Eval {
        let container = container.deref();
        let index = index.deref();
        if let Value::Range { start, end, .. } = index {
            let end = if end == i64::MAX { None } else { Some(end) };
            return self.slice(&container, Some(start), end, 1);
        }
        match &container {
            Value::List(items) => {
                let len = items.borrow().len();
                let position = self.position(&index, len)?;
                let value = items.borrow()[position].clone();
                Ok(value)
            }
            Value::Tuple(items) => {
                let position = self.position(&index, items.len())?;
                Ok(items[position].clone())
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let len = chars.len() as i64;
                if matches!(self.language, Language::C | Language::Cpp) && index.as_int() == Some(len) {
                    return Ok(Value::Char('\0'));
                }
                if self.language == Language::Python {
                    let raw = index.as_int().unwrap_or(len);
                    let adjusted = if raw < 0 { raw + len } else { raw };
                    if adjusted < 0 || adjusted >= len {
                        return Err(self.raise("IndexError", "string index out of range"));
                    }
                    return Ok(Value::str(chars[adjusted as usize].to_string()));
                }
                let position = self.position(&index, chars.len())?;
                Ok(Value::Char(chars[position]))
            }
            Value::Dict(entries) => {
                let found = entries.borrow().iter().find(|(k, _)| k.equals(&index)).map(|(_, v)| v.clone());
                match found {
                    Some(value) => Ok(value),
                    None if self.language == Language::Cpp => {
                        entries.borrow_mut().push((index.clone(), Value::Int(0)));
                        Ok(Value::Int(0))
                    }
                    None => Err(match self.language {
                        Language::Python => self.raise("KeyError", index.repr(self.language)),
                        Language::Java => self.raise("NullPointerException", "key not found"),
                        _ => self.fatal(format!("key {} not found", index.repr(self.language))),
                    }),
                }
            }
            Value::Range { start, end, step } => {
                let len = super::value::range_len(*start, *end, *step);
                let position = self.position(&index, len)?;
                Ok(Value::Int(start + step * position as i64))
            }
            Value::None => Err(match self.language {
                Language::Python => self.raise("TypeError", "'NoneType' object is not subscriptable"),
                Language::Java => self.raise("NullPointerException", "Cannot load from array because it is null"),
                _ => self.fatal("Segmentation fault: null pointer dereference"),
            }),
            other => Err(self.type_error(format!("'{}' object is not subscriptable", other.type_name()))),
        }
    }

    pub(super) fn slice(&mut self, container: &Value, start: Option<i64>, end: Option<i64>, step: i64) -> Eval {
        if step == 0 {
            return Err(match self.language {
                Language::Python => self.raise("ValueError", "slice step cannot be zero"),
                _ => self.fatal("slice step cannot be zero"),
            });
        }
        let items: Vec<Value> = match container {
            Value::Str(s) => s.chars().map(Value::Char).collect(),
            other => self.iterate(other)?,
        };
        let len = items.len() as i64;
        let python = self.language == Language::Python;
        let clamp = |value: Option<i64>, default: i64| -> i64 {
            match value {
                None => default,
                Some(v) if v < 0 && python => (v + len).max(if step < 0 { -1 } else { 0 }),
                Some(v) => v.min(len).max(if step < 0 { -1 } else { 0 }),
            }
        };
        if !python {
            let lo = start.unwrap_or(0);
            let hi = end.unwrap_or(len);
            if lo < 0 || hi > len || lo > hi {
                return Err(match self.language {
                    Language::Rust => self.fatal(format!(
                        "panicked: range {}..{} out of bounds for slice of length {}",
                        lo, hi, len
                    )),
                    Language::Java => self.raise(
                        "StringIndexOutOfBoundsException",
                        format!("begin {}, end {}, length {}", lo, hi, len),
                    ),
                    _ => self.raise("out_of_range", format!("substr: position {} out of range", lo)),
                });
            }
        }
        let (lo, hi) = if step > 0 {
            (clamp(start, 0), clamp(end, len))
        } else {
            (clamp(start, len - 1), clamp(end, -1))
        };
        let mut picked = Vec::new();
        let mut i = lo;
        while (step > 0 && i < hi) || (step < 0 && i > hi) {
            if i >= 0 && i < len {
                picked.push(items[i as usize].clone());
            }
            i += step;
        }
        Ok(match container {
            Value::Str(_) => Value::Str(
                picked
                    .iter()
                    .map(|c| match c {
                        Value::Char(c) => *c,
                        _ => '?',
                    })
                    .collect(),
            ),
            Value::Tuple(_) => Value::tuple(picked),
            _ => Value::list(picked),
        })
    }

    pub(super) fn field_value(&mut self, value: &Value, name: &str) -> Eval {
        let value = value.deref();
        match (&value, name) {
            (Value::Object(object), _) => {
                let field = object.borrow().get(name).cloned();
                match field {
                    Some(field) => Ok(field),
                    None => {
                        let class = object.borrow().class.clone();
                        if self.find_method(&class, name, 0).is_some() {
                            return Ok(Value::Function(name.to_string()));
                        }
                        let message = format!("'{}' object has no attribute '{}'", class, name);
                        Err(match self.language {
                            Language::Python => self.raise("AttributeError", message),
                            _ => self.fatal(message),
                        })
                    }
                }
            }
            (Value::List(items), "length") => Ok(Value::Int(items.borrow().len() as i64)),
            (Value::Tuple(items), "first" | "0") => self.tuple_field(items, 0),
            (Value::Tuple(items), "second" | "1") => self.tuple_field(items, 1),
            (Value::Tuple(items), index) if index.chars().all(|c| c.is_ascii_digit()) => {
                self.tuple_field(items, index.parse().unwrap_or(0))
            }
            (Value::Exception { message, .. }, "message" | "args") => Ok(Value::str(message.clone())),
            (Value::None, _) => Err(match self.language {
                Language::Java => self.raise("NullPointerException", format!("Cannot read field \"{}\"", name)),
                Language::Python => self.raise("AttributeError", format!("'NoneType' object has no attribute '{}'", name)),
                _ => self.fatal("Segmentation fault: null pointer dereference"),
            }),
            (other, _) if other.is_number() && matches!(self.language, Language::C | Language::Cpp) => {
                Err(self.fatal("Segmentation fault: null pointer dereference"))
            }
            (other, _) => {
                let message = format!("'{}' object has no attribute '{}'", other.type_name(), name);
                Err(match self.language {
                    Language::Python => self.raise("AttributeError", message),
                    _ => self.fatal(message),
                })
            }
        }
    }

    fn tuple_field(&mut self, items: &[Value], index: usize) -> Eval {
        match items.get(index) {
            Some(item) => Ok(item.clone()),
            None => Err(self.fatal(format!("no field `{}` on tuple", index))),
        }
    }

    /// Dotted or `::` path text for an expression rooted at a name that is
    /// not a variable: a module, class or namespace.
    fn static_path(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::Var(name) if !self.is_bound(name) && name != "self" && name != "this" => Some(name.clone()),
            Expr::Field { target, name } => self.static_path(target).map(|p| format!("{}.{}", p, name)),
            Expr::Path { qualifier, name } => Some(format!("{}::{}", qualifier, name)),
            _ => None,
        }
    }

    fn eval_path(&mut self, qualifier: &str, name: &str) -> Eval {
        let owner = last_segment(qualifier);
        let owner = if owner == "Self" {
            self.current_owner().unwrap_or_else(|| owner.to_string())
        } else {
            owner.to_string()
        };
        if let Some(class) = self.program.class(&owner) {
            if class.variants.iter().any(|v| v == name) {
                return Ok(variant_value(name, Vec::new()));
            }
        }
        if let Some(value) = self.static_value(qualifier, name) {
            return Ok(value);
        }
        if let Some(slot) = self.globals.get(name) {
            let value = slot.borrow().value.clone();
            return Ok(value);
        }
        if self.by_name.contains_key(name) || self.is_builtin_function(name) {
            return Ok(Value::Function(name.to_string()));
        }
        Err(match self.language {
            Language::Python => self.raise("AttributeError", format!("module '{}' has no attribute '{}'", qualifier, name)),
            _ => self.fatal(format!("cannot resolve `{}::{}`", qualifier, name)),
        })
    }

    fn eval_match(&mut self, value: Value, arms: &[MatchArm]) -> Eval {
        let line = self.line;
        for arm in arms {
            for pattern in &arm.patterns {
                let mut bindings = Vec::new();
                if !match_pattern(pattern, &value, &mut bindings) {
                    continue;
                }
                let outcome = self.scoped(|this| {
                    for (name, bound) in &bindings {
                        this.declare(name, bound.clone(), TypeHint::Auto);
                    }
                    if let Some(guard) = &arm.guard {
                        if !this.eval(guard)?.truthy() {
                            return Ok(None);
                        }
                    }
                    this.emit(EventKind::Branch, line, Some(format!("case {}", describe_pattern(pattern))))?;
                    for (name, bound) in &bindings {
                        this.record(name, bound)?;
                    }
                    this.eval(&arm.body).map(Some)
                })?;
                if let Some(result) = outcome {
                    return Ok(result);
                }
            }
        }
        Err(self.fatal("no match arm matched"))
    }

    fn comprehend(
        &mut self,
        element: &Expr,
        key: Option<&Expr>,
        clauses: &[CompClause],
        out: &mut Vec<Value>,
    ) -> Result<(), Fault> {
        let Some((clause, rest)) = clauses.split_first() else {
            let value = self.eval(element)?;
            let item = match key {
                Some(key) => Value::tuple(vec![self.eval(key)?, value]),
                None => value,
            };
            out.push(item);
            return self.check_len(out.len());
        };
        match clause {
            CompClause::If(cond) => {
                if self.eval(cond)?.truthy() {
                    self.comprehend(element, key, rest, out)?;
                }
                Ok(())
            }
            CompClause::For { target, iter } => {
                let iterable = self.eval(iter)?;
                for item in self.iterate(&iterable)? {
                    self.tick()?;
                    self.bind_local(target, item)?;
                    self.comprehend(element, key, rest, out)?;
                }
                Ok(())
            }
        }
    }

    /// Bind without recording: comprehension variables.
    fn bind_local(&mut self, target: &Target, value: Value) -> Result<(), Fault> {
        match target {
            Target::Var(name) => {
                self.declare(name, value, TypeHint::Auto);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = self.unpack(&value, targets.len())?;
                for (target, item) in targets.iter().zip(items) {
                    self.bind_local(target, item)?;
                }
                Ok(())
            }
            other => self.assign(other, value),
        }
    }

    /// Materialize the items of an iterable.
    pub(super) fn iterate(&mut self, value: &Value) -> Result<Vec<Value>, Fault> {
        let value = value.deref();
        match &value {
            Value::Range { start, end, step } => {
                let len = super::value::range_len(*start, *end, *step);
                self.check_len(len)?;
                Ok((0..len).map(|i| Value::Int(start + step * i as i64)).collect())
            }
            Value::Str(s) if self.language != Language::Python => Ok(s.chars().map(Value::Char).collect()),
            // rust and c++ iterate maps as key/value pairs
            Value::Dict(entries) if self.language != Language::Python => Ok(ordered_entries(&entries.borrow(), self.language)
                .into_iter()
                .map(|(k, v)| Value::tuple(vec![k, v]))
                .collect()),
            other => match other.items() {
                Some(items) => Ok(items),
                None => Err(self.type_error(format!("'{}' object is not iterable", other.type_name()))),
            },
        }
    }

    /// Text a value prints as, using the program's own `__str__` or
    /// `toString` when it defines one.
    pub(super) fn display_value(&mut self, value: &Value) -> Result<String, Fault> {
        if let Value::Object(object) = value.deref() {
            let class = object.borrow().class.clone();
            let hook = match self.language {
                Language::Python => Some("__str__"),
                Language::Java => Some("toString"),
                _ => None,
            };
            if let Some(method) = hook.and_then(|h| self.find_method(&class, h, 0)) {
                let text = self.call_user(method, Vec::new(), Vec::new(), Some(Value::Object(object)))?;
                return Ok(text.display(self.language));
            }
        }
        Ok(value.display(self.language))
    }

    // calls

    fn current_owner(&self) -> Option<String> {
        self.frames.iter().rev().find_map(|f| f.owner.clone())
    }

    /// Method `name` on `class` or its bases, preferring an arity match.
    pub(super) fn find_method(&self, class: &str, name: &str, argc: usize) -> Option<&'p Function> {
        let candidates = self.by_name.get(name)?;
        for def in self.class_chain(class) {
            let owned: Vec<&'p Function> = candidates
                .iter()
                .copied()
                .filter(|f| f.owner.as_deref() == Some(def.name.as_str()))
                .collect();
            if let Some(f) = owned.iter().find(|f| arity_ok(f, argc)).or(owned.first()).copied() {
                return Some(f);
            }
        }
        // impl blocks for types without a declaration in the unit
        let owned: Vec<&'p Function> = candidates
            .iter()
            .copied()
            .filter(|f| f.owner.as_deref() == Some(class))
            .collect();
        owned.iter().find(|f| arity_ok(f, argc)).or(owned.first()).copied()
    }

    fn find_free_function(&self, name: &str, argc: usize) -> Option<&'p Function> {
        let candidates = self.by_name.get(name)?;
        let free: Vec<&'p Function> = candidates.iter().copied().filter(|f| f.owner.is_none()).collect();
        free.iter()
            .find(|f| f.file == self.file && arity_ok(f, argc))
            .or_else(|| free.iter().find(|f| arity_ok(f, argc)))
            .or(free.first())
            .copied()
    }

    fn find_in_module(&self, module: &str, name: &str, argc: usize) -> Option<&'p Function> {
        let candidates = self.by_name.get(name)?;
        candidates
            .iter()
            .copied()
            .find(|f| file_stem(&f.file) == module && arity_ok(f, argc))
            .or_else(|| candidates.iter().copied().find(|f| file_stem(&f.file) == module))
    }

    fn resolve_call(&self, name: &str, qualifier: Option<&str>, argc: usize) -> Option<CallTarget<'p>> {
        let program = self.program;
        if let Some(qualifier) = qualifier {
            let segment = last_segment(qualifier);
            let owner = match segment {
                "self" | "Self" | "this" => self.current_owner()?,
                "super" => {
                    let owner = self.current_owner()?;
                    program.class(&owner)?.base.clone()?
                }
                other => other.to_string(),
            };
            if let Some(class) = program.class(&owner) {
                if class.variants.iter().any(|v| v == name) {
                    return Some(CallTarget::Variant(name.to_string()));
                }
            }
            if let Some(f) = self.find_method(&owner, name, argc) {
                let this = if matches!(segment, "self" | "this" | "super") || segment == owner {
                    self.this_value().filter(|_| !f.is_static)
                } else {
                    None
                };
                return Some(CallTarget::User(f, this));
            }
            if let Some(f) = self.find_in_module(segment, name, argc) {
                return Some(CallTarget::User(f, None));
            }
            if qualifier.starts_with("crate") || qualifier.starts_with("super") || qualifier.starts_with("self") {
                return self.find_free_function(name, argc).map(|f| CallTarget::User(f, None));
            }
            return None;
        }

        if let Some(slot) = self.lookup_slot(name) {
            let value = slot.borrow().value.deref();
            if matches!(value, Value::Closure(_) | Value::Function(_)) {
                return Some(CallTarget::Value(value));
            }
        }
        if let Some(this) = self.this_value() {
            if let Value::Object(object) = this.deref() {
                let class = object.borrow().class.clone();
                if let Some(f) = self.find_method(&class, name, argc) {
                    if self.language != Language::Python {
                        return Some(CallTarget::User(f, Some(this)));
                    }
                }
            }
        }
        if let Some(owner) = self.current_owner() {
            if let Some(f) = self.find_method(&owner, name, argc) {
                if matches!(self.language, Language::Java | Language::Cpp) {
                    return Some(CallTarget::User(f, None));
                }
            }
        }
        if let Some(f) = self.find_free_function(name, argc) {
            return Some(CallTarget::User(f, None));
        }
        if program.class(name).is_some() {
            return Some(CallTarget::Construct(name.to_string()));
        }
        if program.variant_owner(name).is_some() {
            return Some(CallTarget::Variant(name.to_string()));
        }
        None
    }

    /// Evaluate arguments for a user function; `T&` parameters receive
    /// a reference to the caller's variable.
    fn eval_args_for(&mut self, function: &Function, args: &[Expr]) -> Result<Vec<Value>, Fault> {
        let mut values = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let by_ref = function.params.get(i).is_some_and(|p| p.by_ref);
            let value = match (by_ref, arg) {
                (true, Expr::Var(name)) => match self.lookup_slot(name) {
                    Some(slot) => Value::Ref(slot),
                    None => self.eval(arg)?,
                },
                _ => self.eval(arg)?,
            };
            values.push(value);
        }
        Ok(values)
    }

    fn eval_call(&mut self, name: &str, qualifier: Option<&str>, args: &[Expr], kwargs: &[(String, Expr)]) -> Eval {
        if !self.by_name.contains_key(name) {
            if let Some(value) = self.special_form(name, qualifier, args)? {
                return Ok(value);
            }
        }
        match self.resolve_call(name, qualifier, args.len()) {
            Some(CallTarget::User(function, this)) => {
                let argv = self.eval_args_for(function, args)?;
                let kw = self.eval_kwargs(kwargs)?;
                self.call_user(function, argv, kw, this)
            }
            Some(CallTarget::Construct(class)) => {
                let argv = self.eval_all(args)?;
                let kw = self.eval_kwargs(kwargs)?;
                self.construct(&class, argv, kw)
            }
            Some(CallTarget::Variant(variant)) => {
                let argv = self.eval_all(args)?;
                Ok(variant_value(&variant, argv))
            }
            Some(CallTarget::Value(callee)) => {
                let argv = self.eval_all(args)?;
                self.call_value(&callee, argv)
            }
            None => {
                let argv = self.eval_all(args)?;
                let kw = self.eval_kwargs(kwargs)?;
                match self.call_builtin(name, qualifier, argv, kw)? {
                    Some(value) => Ok(value),
                    None => Err(self.undefined_function(name, qualifier)),
                }
            }
        }
    }

    fn undefined_function(&mut self, name: &str, qualifier: Option<&str>) -> Fault {
        let full = match qualifier {
            Some(q) => format!("{}.{}", q, name),
            None => name.to_string(),
        };
        match self.language {
            Language::Python if qualifier.is_some() => {
                self.raise("AttributeError", format!("module '{}' has no attribute '{}'", qualifier.unwrap_or(""), name))
            }
            Language::Python => self.raise("NameError", format!("name '{}' is not defined", name)),
            Language::Java => self.fatal(format!("cannot find symbol: method {}", full)),
            Language::Rust => self.fatal(format!("cannot find function `{}` in this scope", full)),
            Language::C | Language::Cpp => self.fatal(format!("call to undeclared function '{}'", full)),
        }
    }

    fn eval_method(&mut self, receiver: &Expr, name: &str, args: &[Expr], kwargs: &[(String, Expr)]) -> Eval {
        if let Some(path) = self.static_path(receiver) {
            return self.eval_call(name, Some(&path), args, kwargs);
        }
        let value = self.eval(receiver)?;
        let target = value.deref();

        if let Value::Object(object) = &target {
            let class = object.borrow().class.clone();
            if let Some(function) = self.find_method(&class, name, args.len()) {
                let argv = self.eval_args_for(function, args)?;
                let kw = self.eval_kwargs(kwargs)?;
                return self.call_user(function, argv, kw, Some(target.clone()));
            }
            let field = object.borrow().get(name).cloned();
            if let Some(callee @ (Value::Closure(_) | Value::Function(_))) = field {
                let argv = self.eval_all(args)?;
                return self.call_value(&callee, argv);
            }
        }

        let argv = self.eval_all(args)?;
        let kw = self.eval_kwargs(kwargs)?;
        match self.call_method_builtin(&target, name, argv, kw)? {
            Some(result) => {
                if let Some(updated) = result.updated {
                    if let Some(place) = expr_target(receiver) {
                        self.write_back(&place, updated)?;
                        self.record_root(&place)?;
                    }
                } else if result.mutated {
                    if let Some(place) = expr_target(receiver) {
                        self.record_root(&place)?;
                    }
                }
                Ok(result.value)
            }
            None => {
                let message = format!("'{}' object has no attribute '{}'", target.type_name(), name);
                Err(match self.language {
                    Language::Python => self.raise("AttributeError", message),
                    Language::Rust => self.fatal(format!("no method named `{}` found for {}", name, target.type_name())),
                    _ => self.fatal(message),
                })
            }
        }
    }

    /// Calls whose arguments must not be evaluated as plain values.
    fn special_form(&mut self, name: &str, qualifier: Option<&str>, args: &[Expr]) -> Result<Option<Value>, Fault> {
        match (self.language, name) {
            (Language::Cpp, "__cout") => {
                for arg in args {
                    if let Expr::Call { name, args: manip, .. } = arg {
                        if name == "__manip" {
                            self.apply_manipulator(manip)?;
                            continue;
                        }
                    }
                    let value = self.eval(arg)?;
                    let text = self.cout_text(&value);
                    self.recorder.write(&text);
                }
                Ok(Some(Value::Bool(true)))
            }
            (Language::Cpp, "__cin") => Ok(Some(Value::Bool(false))),
            (Language::Cpp | Language::Rust, "swap") if args.len() == 2 => {
                let (Some(a), Some(b)) = (swap_target(&args[0]), swap_target(&args[1])) else {
                    return Ok(None);
                };
                let first = self.read_target(&a)?;
                let second = self.read_target(&b)?;
                self.assign(&a, second)?;
                self.assign(&b, first)?;
                Ok(Some(Value::None))
            }
            (Language::Cpp, "sort" | "reverse" | "accumulate" | "count" | "max_element" | "min_element" | "fill")
                if qualifier.map_or(true, |q| q == "std") =>
            {
                let Some(Expr::Method { receiver, name: begin, .. }) = args.first() else {
                    return Ok(None);
                };
                if begin != "begin" {
                    return Ok(None);
                }
                let container = self.eval(receiver)?.deref();
                let rest = self.eval_all(args.get(2..).unwrap_or(&[]))?;
                let result = self.iterator_algorithm(name, &container, rest)?;
                if matches!(name, "sort" | "reverse" | "fill") {
                    if let Some(place) = expr_target(receiver) {
                        self.record_root(&place)?;
                    }
                }
                Ok(Some(result))
            }
            _ => Ok(None),
        }
    }

    fn apply_manipulator(&mut self, args: &[Expr]) -> Result<(), Fault> {
        let Some(Expr::Literal(Value::Str(kind))) = args.first() else {
            return Ok(());
        };
        match kind.as_str() {
            "fixed" => self.cout_fixed = true,
            "setprecision" => {
                let precision = match args.get(1) {
                    Some(expr) => self.eval(expr)?.as_int().unwrap_or(6),
                    None => 6,
                };
                self.cout_precision = Some(precision.max(0) as usize);
            }
            _ => {}
        }
        Ok(())
    }

    fn cout_text(&self, value: &Value) -> String {
        match value.deref() {
            Value::Float(f) => match (self.cout_fixed, self.cout_precision) {
                (true, precision) => format!("{:.*}", precision.unwrap_or(6), f),
                (false, Some(precision)) => format::format_general(f, precision, false),
                (false, None) => value.display(self.language),
            },
            other => other.display(self.language),
        }
    }

    pub(super) fn call_user(
        &mut self,
        function: &'p Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        this: Option<Value>,
    ) -> Eval {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(match self.language {
                Language::Python => self.raise("RecursionError", "maximum recursion depth exceeded"),
                Language::Java => self.raise("StackOverflowError", ""),
                Language::Rust => self.fatal("thread 'main' has overflowed its stack"),
                Language::C | Language::Cpp => self.fatal("Segmentation fault: stack overflow"),
            });
        }
        if args.len() > function.params.len() {
            let message = format!(
                "{}() takes {} positional arguments but {} were given",
                function.name,
                function.params.len(),
                args.len()
            );
            return Err(self.type_error(message));
        }

        let saved = (std::mem::take(&mut self.file), self.line);
        self.file = function.file.clone();
        self.line = function.line;
        self.push_frame(&function.qualified, function.owner.clone(), this.clone(), false);

        let result = self.invoke(function, args, kwargs, this);

        self.frames.pop();
        self.file = saved.0;
        self.line = saved.1;
        result
    }

    fn invoke(
        &mut self,
        function: &'p Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        this: Option<Value>,
    ) -> Eval {
        self.emit(EventKind::Call, function.line, None)?;

        if let Some(this) = this {
            if function.takes_self {
                self.declare("self", this.clone(), TypeHint::Auto);
            }
            if matches!(self.language, Language::Java | Language::Cpp) {
                self.declare("this", this, TypeHint::Auto);
            }
        }

        let mut args = args.into_iter();
        for param in &function.params {
            let value = match args.next() {
                Some(value) => value,
                None => match kwargs.iter().find(|(k, _)| *k == param.name) {
                    Some((_, value)) => value.clone(),
                    None => match &param.default {
                        Some(default) => self.eval(default)?,
                        None => {
                            let message = format!(
                                "{}() missing 1 required positional argument: '{}'",
                                function.name, param.name
                            );
                            return Err(self.type_error(message));
                        }
                    },
                },
            };
            match value {
                Value::Ref(slot) if param.by_ref => {
                    if let Some(scope) = self.frames.last_mut().and_then(|f| f.scopes.last_mut()) {
                        scope.insert(param.name.clone(), Rc::clone(&slot));
                    }
                    let current = slot.borrow().value.clone();
                    self.record(&param.name, &current)?;
                }
                value => {
                    let value = if param.copy { value.deep_copy() } else { value };
                    let value = self.coerce(value, &param.hint)?;
                    self.declare(&param.name, value.clone(), param.hint.clone());
                    self.record(&param.name, &value)?;
                }
            }
        }

        let mut value = match self.exec_block(&function.body) {
            Ok(Flow::Return(value)) | Err(Fault::Escape(Flow::Return(value))) => value,
            Ok(_) | Err(Fault::Escape(_)) => match &function.tail {
                Some(tail) => match self.eval(tail) {
                    Ok(value) | Err(Fault::Escape(Flow::Return(value))) => value,
                    Err(fault) => return Err(fault),
                },
                None => Value::None,
            },
            Err(fault) => return Err(fault),
        };
        value = self.coerce(value, &function.return_hint)?;

        let line = self
            .frames
            .last()
            .map(|f| f.return_line)
            .filter(|l| *l > 0)
            .unwrap_or(function.end_line);
        let detail = match &value {
            Value::None => None,
            v => Some(v.repr(self.language)),
        };
        self.emit(EventKind::Return, line, detail)?;
        Ok(value)
    }

    pub(super) fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Eval {
        match callee.deref() {
            Value::Closure(closure) => {
                if self.frames.len() >= self.limits.max_call_depth {
                    return Err(self.fatal("maximum call depth exceeded"));
                }
                self.push_frame("<lambda>", self.current_owner(), self.this_value(), false);
                if let Some(frame) = self.frames.last_mut() {
                    let captured: HashMap<String, SlotRef> = closure.captured.iter().cloned().collect();
                    frame.scopes.insert(0, captured);
                }
                for (name, value) in closure.params.iter().zip(args) {
                    self.declare(name, value, TypeHint::Auto);
                }
                let result = match self.eval(&closure.body) {
                    Err(Fault::Escape(Flow::Return(value))) => Ok(value),
                    other => other,
                };
                self.frames.pop();
                result
            }
            Value::Function(name) => match self.resolve_call(&name, None, args.len()) {
                Some(CallTarget::User(function, this)) => self.call_user(function, args, Vec::new(), this),
                Some(CallTarget::Construct(class)) => self.construct(&class, args, Vec::new()),
                _ => match self.call_builtin(&name, None, args, Vec::new())? {
                    Some(value) => Ok(value),
                    None => Err(self.undefined_function(&name, None)),
                },
            },
            other => Err(self.type_error(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    pub(super) fn new_object(&mut self, class: &str) -> Eval {
        let chain = self.class_chain(class);
        let mut fields = Vec::new();
        for def in chain.iter().rev() {
            for field in &def.fields {
                let value = match &field.init {
                    Some(init) => self.eval(init)?,
                    None => self.default_for(&field.hint)?,
                };
                fields.retain(|(n, _): &(String, Value)| *n != field.name);
                fields.push((field.name.clone(), value));
            }
        }
        Ok(Value::Object(Rc::new(RefCell::new(Object {
            class: class.to_string(),
            fields,
        }))))
    }

    pub(super) fn construct(&mut self, class: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Eval {
        if self.program.class(class).is_none() {
            if let Some(value) = self.builtin_construct(class, &args)? {
                return Ok(value);
            }
            return Err(self.undefined_function(class, None));
        }
        if self.is_exception_kind(class) && self.find_method(class, "__init__", args.len()).is_none() {
            let message = match args.first() {
                Some(first) => self.display_value(first)?,
                None => String::new(),
            };
            return Ok(Value::Exception {
                kind: class.to_string(),
                message,
            });
        }

        let object = self.new_object(class)?;
        let constructor = match self.language {
            Language::Python => self.find_method(class, "__init__", args.len()),
            Language::Java | Language::Cpp => self.find_method(class, class, args.len()),
            _ => None,
        };
        match constructor {
            Some(constructor) => {
                self.call_user(constructor, args, kwargs, Some(object.clone()))?;
            }
            None => {
                if let Value::Object(o) = &object {
                    let names: Vec<String> = o.borrow().fields.iter().map(|(n, _)| n.clone()).collect();
                    for (i, arg) in args.into_iter().enumerate() {
                        let name = names.get(i).cloned().unwrap_or_else(|| i.to_string());
                        o.borrow_mut().set(&name, arg);
                    }
                }
            }
        }
        Ok(object)
    }
}

fn new_slot(name: &str, value: Value, hint: TypeHint) -> SlotRef {
    Rc::new(RefCell::new(Slot {
        name: name.to_string(),
        value,
        hint,
    }))
}

fn arity_ok(function: &Function, argc: usize) -> bool {
    let required = function.params.iter().filter(|p| p.default.is_none()).count();
    argc >= required && argc <= function.params.len()
}

/// Element size and count of a python sequence repetition (`[0] * n`,
/// `"ab" * n`).
fn repeat_operands(left: &Value, right: &Value) -> Option<(usize, i64, bool)> {
    match (left.deref(), right.deref()) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => Some((s.len(), n, true)),
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            let len = items.borrow().len();
            Some((len, n, false))
        }
        (Value::Tuple(items), Value::Int(n)) => Some((items.len(), n, false)),
        _ => None,
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path).rsplit('.').next().unwrap_or(path)
}

/// Value of an enum variant; tuple payloads become positional fields.
fn variant_value(name: &str, args: Vec<Value>) -> Value {
    Value::Object(Rc::new(RefCell::new(Object {
        class: name.to_string(),
        fields: args.into_iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect(),
    })))
}

/// The place an expression names, when it names one.
fn expr_target(expr: &Expr) -> Option<Target> {
    match expr {
        Expr::Var(name) => Some(Target::Var(name.clone())),
        Expr::Index { target, index } => Some(Target::Index {
            base: Box::new(expr_target(target)?),
            index: (**index).clone(),
        }),
        Expr::Field { target, name } => Some(Target::Field {
            base: Box::new(expr_target(target)?),
            name: name.clone(),
        }),
        Expr::Deref(inner) => Some(Target::Deref((**inner).clone())),
        Expr::AddrOf(inner) => expr_target(inner),
        _ => None,
    }
}

/// The map and key behind `m.entry(k).or_insert(..)` or `m.get_mut(k).unwrap()`.
fn entry_place(expr: &Expr) -> Option<(&Expr, &Expr)> {
    let Expr::Method { receiver, name, .. } = expr else {
        return None;
    };
    if !matches!(
        name.as_str(),
        "or_insert" | "or_default" | "or_insert_with" | "unwrap" | "expect"
    ) {
        return None;
    }
    match &**receiver {
        Expr::Method { receiver: map, name, args, .. } if matches!(name.as_str(), "entry" | "get_mut") && args.len() == 1 => {
            Some((&**map, &args[0]))
        }
        _ => None,
    }
}

fn swap_target(expr: &Expr) -> Option<Target> {
    match expr {
        Expr::AddrOf(inner) => expr_target(inner),
        other => expr_target(other),
    }
}

fn exception_parts(value: &Value, language: Language) -> (String, String) {
    match value.deref() {
        Value::Exception { kind, message } => (kind, message),
        Value::Int(i) => ("int".to_string(), i.to_string()),
        Value::Str(s) if language == Language::Cpp => ("const char*".to_string(), s),
        other => (other.type_name().to_string(), other.display(language)),
    }
}

fn builtin_exception_parent(kind: &str) -> Option<&'static str> {
    Some(match kind {
        // python
        "ZeroDivisionError" | "OverflowError" | "FloatingPointError" => "ArithmeticError",
        "IndexError" | "KeyError" => "LookupError",
        "RecursionError" | "NotImplementedError" => "RuntimeError",
        "ArithmeticError" | "LookupError" | "ValueError" | "TypeError" | "NameError" | "RuntimeError"
        | "EOFError" | "AttributeError" | "AssertionError" | "StopIteration" | "MemoryError" => "Exception",
        "Exception" => "BaseException",
        // java
        "ArrayIndexOutOfBoundsException" | "StringIndexOutOfBoundsException" => "IndexOutOfBoundsException",
        "NumberFormatException" => "IllegalArgumentException",
        "ArithmeticException"
        | "IndexOutOfBoundsException"
        | "NullPointerException"
        | "IllegalArgumentException"
        | "IllegalStateException"
        | "NoSuchElementException"
        | "UnsupportedOperationException"
        | "NegativeArraySizeException"
        | "ClassCastException" => "RuntimeException",
        "RuntimeException" | "InterruptedException" => "Exception",
        "StackOverflowError" | "OutOfMemoryError" => "Error",
        "Error" => "Throwable",
        // c++
        "out_of_range" | "invalid_argument" | "length_error" | "domain_error" => "logic_error",
        "overflow_error" | "underflow_error" | "range_error" => "runtime_error",
        "runtime_error" | "logic_error" | "bad_alloc" => "exception",
        _ => return None,
    })
}

fn match_pattern(pattern: &Pattern, value: &Value, bindings: &mut Vec<(String, Value)>) -> bool {
    let value = value.deref();
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Literal(literal) => literal.equals(&value),
        Pattern::Range { start, end, inclusive } => {
            let above = value.compare(start).is_some_and(|o| o.is_ge());
            let below = value
                .compare(end)
                .is_some_and(|o| if *inclusive { o.is_le() } else { o.is_lt() });
            above && below
        }
        Pattern::Bind(name) => {
            bindings.push((name.clone(), value));
            true
        }
        Pattern::Tuple(patterns) => {
            let items = match &value {
                Value::Tuple(items) => (**items).clone(),
                Value::List(items) => items.borrow().clone(),
                _ => return false,
            };
            items.len() == patterns.len() && patterns.iter().zip(&items).all(|(p, v)| match_pattern(p, v, bindings))
        }
        Pattern::Variant { name, inner } => match (name.as_str(), &value) {
            ("None", v) => matches!(v, Value::None),
            ("Some" | "Ok", Value::None) => false,
            ("Some" | "Ok", Value::Exception { kind, .. }) if kind == "Err" => false,
            ("Some" | "Ok", v) => inner.first().map_or(true, |p| match_pattern(p, v, bindings)),
            ("Err", Value::Exception { kind, message }) if kind == "Err" => {
                inner.first().map_or(true, |p| match_pattern(p, &Value::str(message.clone()), bindings))
            }
            ("Err", _) => false,
            (_, Value::Object(object)) => {
                let object = object.borrow();
                if object.class != *name {
                    return false;
                }
                let fields: Vec<Value> = object.fields.iter().map(|(_, v)| v.clone()).collect();
                drop(object);
                inner.len() <= fields.len()
                    && inner.iter().zip(&fields).all(|(p, v)| match_pattern(p, v, bindings))
            }
            _ => false,
        },
    }
}

fn describe_pattern(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Wildcard => "_".to_string(),
        Pattern::Literal(value) => value.repr(Language::Rust),
        Pattern::Range { start, end, inclusive } => format!(
            "{}{}{}",
            start.repr(Language::Rust),
            if *inclusive { "..=" } else { ".." },
            end.repr(Language::Rust)
        ),
        Pattern::Bind(name) => name.clone(),
        Pattern::Tuple(items) => format!("({})", items.iter().map(describe_pattern).collect::<Vec<_>>().join(", ")),
        Pattern::Variant { name, inner } if inner.is_empty() => name.clone(),
        Pattern::Variant { name, inner } => format!(
            "{}({})",
            name,
            inner.iter().map(describe_pattern).collect::<Vec<_>>().join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_hierarchy() {
        let program = Program::default();
        let interpreter = Interpreter::new(
            &program,
            Language::Python,
            TraceLimits::default(),
            CancellationToken::new(),
            Recorder::new(10),
        );
        assert!(interpreter.exception_matches("ZeroDivisionError", "ArithmeticError"));
        assert!(interpreter.exception_matches("ZeroDivisionError", "Exception"));
        assert!(!interpreter.exception_matches("KeyError", "ArithmeticError"));
        assert!(interpreter.exception_matches("ArrayIndexOutOfBoundsException", "RuntimeException"));
        assert!(interpreter.exception_matches("out_of_range", "exception"));
        assert!(interpreter.is_exception_kind("CustomError"));
    }

    #[test]
    fn test_patterns_bind() {
        let mut bindings = Vec::new();
        let pattern = Pattern::Variant {
            name: "Some".into(),
            inner: vec![Pattern::Bind("x".into())],
        };
        assert!(match_pattern(&pattern, &Value::Int(3), &mut bindings));
        assert_eq!(bindings.len(), 1);
        assert!(!match_pattern(&pattern, &Value::None, &mut Vec::new()));

        let range = Pattern::Range {
            start: Value::Int(1),
            end: Value::Int(5),
            inclusive: true,
        };
        assert!(match_pattern(&range, &Value::Int(5), &mut Vec::new()));
        assert!(!match_pattern(&range, &Value::Int(6), &mut Vec::new()));
        assert_eq!(describe_pattern(&range), "1..=5");
    }
}
