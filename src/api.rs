//! Embedding surface: a stack-indexed host interface over [`VirtualMachine`],
//! modeled on `original_source/src/skooma.h`'s C API (itself modeled on the
//! Lua 5.4 C API) but reshaped around Rust ownership -- `sk_create`/
//! `sk_destroy` become `VirtualMachine::new`/`Drop`, and every fallible
//! operation returns a `Result`/`Option` instead of an out-parameter.
//!
//! Indices are 1-based and relative to the *current call's* argument window
//! (`frame.base + 1`, the slot after the callee/receiver); negative indices
//! count from the top of the stack (`-1` is the topmost value), matching
//! `skapi.c`'s `relative_index`/`absolute_index`.

use crate::object::{self, ObjectKind};
use crate::value::Value;
use crate::vm::error::{ErrorKind, Status, VMError};
use crate::vm::VirtualMachine;

/// Mirrors `original_source/src/skooma.h`'s `TypeTag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    Nil,
    Number,
    String,
    Bool,
    Class,
    Instance,
    Function,
    Closure,
    Native,
    Method,
}

impl ValueTag {
    pub fn name(self) -> &'static str {
        match self {
            ValueTag::Nil => "nil",
            ValueTag::Number => "number",
            ValueTag::String => "string",
            ValueTag::Bool => "bool",
            ValueTag::Class => "class",
            ValueTag::Instance => "instance",
            ValueTag::Function => "function",
            ValueTag::Closure => "closure",
            ValueTag::Native => "native",
            ValueTag::Method => "method",
        }
    }

    fn of(value: Value) -> ValueTag {
        match value {
            Value::Nil => ValueTag::Nil,
            Value::Number(_) => ValueTag::Number,
            Value::Bool(_) => ValueTag::Bool,
            Value::Empty => ValueTag::Nil,
            Value::Object(ptr) => match unsafe { (*ptr).kind } {
                ObjectKind::String => ValueTag::String,
                ObjectKind::Class => ValueTag::Class,
                ObjectKind::Instance => ValueTag::Instance,
                ObjectKind::Function => ValueTag::Function,
                ObjectKind::Closure => ValueTag::Closure,
                ObjectKind::Native => ValueTag::Native,
                ObjectKind::BoundMethod => ValueTag::Method,
                ObjectKind::Upvalue => ValueTag::Nil,
            },
        }
    }
}

/// Thin wrapper borrowing a [`VirtualMachine`] for the duration of a host
/// call; every method is a direct analogue of one `sk_*` entry point.
pub struct Api<'vm> {
    vm: &'vm mut VirtualMachine,
}

impl<'vm> Api<'vm> {
    pub fn new(vm: &'vm mut VirtualMachine) -> Self {
        Api { vm }
    }

    /// Slot the current call's argument window starts at; 0 before any call
    /// frame exists (top-level host access right after `interpret`/`create`).
    fn window_base(&self) -> usize {
        match self.vm.frames.last() {
            Some(frame) => frame.base + 1,
            None => 0,
        }
    }

    fn resolve(&self, idx: i32) -> Option<usize> {
        let base = self.window_base();
        let top = self.vm.sp();
        let abs = if idx > 0 {
            base + (idx as usize - 1)
        } else if idx < 0 {
            let from_top = (-idx) as usize;
            if from_top > top - base {
                return None;
            }
            top - from_top
        } else {
            return None;
        };
        if abs < base || abs >= top {
            None
        } else {
            Some(abs)
        }
    }

    fn at(&self, idx: i32) -> Option<Value> {
        self.resolve(idx).map(|abs| self.vm.stack[abs])
    }

    // --- stack inspection ---------------------------------------------------

    pub fn type_of(&self, idx: i32) -> Option<ValueTag> {
        self.at(idx).map(ValueTag::of)
    }

    pub fn typename(&self, idx: i32) -> &'static str {
        self.type_of(idx).map(ValueTag::name).unwrap_or("none")
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        matches!(self.at(idx), Some(Value::Nil) | None)
    }

    pub fn is_bool(&self, idx: i32) -> bool {
        matches!(self.at(idx), Some(Value::Bool(_)))
    }

    pub fn is_number(&self, idx: i32) -> bool {
        matches!(self.at(idx), Some(Value::Number(_)))
    }

    pub fn is_string(&self, idx: i32) -> bool {
        self.at(idx).is_some_and(|v| v.is_string())
    }

    pub fn is_class(&self, idx: i32) -> bool {
        self.at(idx).is_some_and(|v| v.is_object_of(ObjectKind::Class))
    }

    pub fn is_instance(&self, idx: i32) -> bool {
        self.at(idx).is_some_and(|v| v.is_object_of(ObjectKind::Instance))
    }

    pub fn is_native(&self, idx: i32) -> bool {
        self.at(idx).is_some_and(|v| v.is_object_of(ObjectKind::Native))
    }

    pub fn is_closure(&self, idx: i32) -> bool {
        self.at(idx).is_some_and(|v| v.is_object_of(ObjectKind::Closure))
    }

    pub fn is_method(&self, idx: i32) -> bool {
        self.at(idx).is_some_and(|v| v.is_object_of(ObjectKind::BoundMethod))
    }

    pub fn get_bool(&self, idx: i32) -> Option<bool> {
        match self.at(idx) {
            Some(Value::Bool(b)) => Some(b),
            _ => None,
        }
    }

    pub fn get_number(&self, idx: i32) -> Option<f64> {
        match self.at(idx) {
            Some(Value::Number(n)) => Some(n),
            _ => None,
        }
    }

    pub fn get_string(&self, idx: i32) -> Option<&str> {
        match self.at(idx) {
            Some(Value::Object(ptr)) if unsafe { (*ptr).kind } == ObjectKind::String => Some(object::string_contents(ptr)),
            _ => None,
        }
    }

    /// String byte length, instance field count, or class method count --
    /// whichever applies to the value at `idx`.
    pub fn raw_len(&self, idx: i32) -> Option<usize> {
        match self.at(idx)? {
            Value::Object(ptr) => unsafe {
                match (*ptr).kind {
                    ObjectKind::String => Some(object::as_string(ptr).data.contents.len()),
                    ObjectKind::Instance => Some(object::as_instance(ptr).data.fields.len()),
                    ObjectKind::Class => Some(object::as_class(ptr).data.methods.len()),
                    _ => None,
                }
            },
            _ => None,
        }
    }

    pub fn get_top(&self) -> usize {
        self.vm.sp() - self.window_base()
    }

    // --- stack manipulation --------------------------------------------------

    pub fn push_nil(&mut self) {
        self.vm.push(Value::Nil);
    }

    pub fn push_bool(&mut self, b: bool) {
        self.vm.push(Value::Bool(b));
    }

    pub fn push_number(&mut self, n: f64) {
        self.vm.push(Value::Number(n));
    }

    pub fn push_string(&mut self, s: &str) {
        let ptr = self.vm.heap.alloc_string(s.to_string());
        self.vm.push(Value::Object(ptr));
    }

    /// Re-pushes the value already at `idx`.
    pub fn push_value_at(&mut self, idx: i32) -> bool {
        match self.at(idx) {
            Some(v) => {
                self.vm.push(v);
                true
            }
            None => false,
        }
    }

    /// Looks up `name` as a method on the instance at `idx`, pushing a bound
    /// method on success.
    pub fn push_method(&mut self, idx: i32, name: &str) -> bool {
        let Some(Value::Object(ptr)) = self.at(idx) else { return false };
        if unsafe { (*ptr).kind } != ObjectKind::Instance {
            return false;
        }
        let class = unsafe { object::as_instance(ptr).data.class };
        let key = self.intern(name);
        let method = unsafe { object::as_class(class).data.methods.get(&key) };
        match method {
            Some(Value::Object(m)) => {
                let bound = self.vm.heap.alloc_bound_method(Value::Object(ptr), m);
                self.vm.push(Value::Object(bound));
                true
            }
            _ => false,
        }
    }

    pub fn push_global(&mut self, name: &str) -> bool {
        let key = self.intern(name);
        let idx = match self.vm.globals.ids.get(&key) {
            Some(Value::Number(n)) => n as usize,
            _ => return false,
        };
        let value = self.vm.globals.values[idx].value;
        if value.is_empty() {
            return false;
        }
        self.vm.push(value);
        true
    }

    /// Registers a host function as a native value at the top of the stack.
    pub fn push_cfn(&mut self, name: &str, function: crate::object::NativeFn, arity: u8, is_variadic: bool) {
        let name_ptr = self.vm.heap.alloc_string(name.to_string());
        let native = self.vm.heap.alloc_native(function, name_ptr, arity, is_variadic);
        self.vm.push(Value::Object(native));
    }

    pub fn set_top(&mut self, idx: i32) {
        let base = self.window_base();
        let target = if idx >= 0 { base + idx as usize } else { (self.vm.sp() as isize + idx as isize) as usize };
        if target <= self.vm.sp() {
            self.vm.pop_n(self.vm.sp() - target);
        } else {
            for _ in 0..(target - self.vm.sp()) {
                self.vm.push(Value::Nil);
            }
        }
    }

    pub fn remove(&mut self, idx: i32) -> bool {
        let Some(abs) = self.resolve(idx) else { return false };
        self.vm.stack.remove(abs);
        true
    }

    pub fn insert(&mut self, idx: i32) -> bool {
        let Some(abs) = self.resolve(idx) else { return false };
        let top = self.vm.pop();
        self.vm.stack.insert(abs, top);
        true
    }

    pub fn replace(&mut self, idx: i32) -> bool {
        let Some(abs) = self.resolve(idx) else { return false };
        let top = self.vm.pop();
        self.vm.stack[abs] = top;
        true
    }

    pub fn copy(&mut self, src: i32, dst: i32) -> bool {
        let (Some(s), Some(d)) = (self.resolve(src), self.resolve(dst)) else { return false };
        self.vm.stack[d] = self.vm.stack[s];
        true
    }

    pub fn ensure_stack(&mut self, n: usize) -> Result<(), VMError> {
        self.vm.check_stack_headroom(n)
    }

    // --- invocation ------------------------------------------------------------

    /// `retcnt = None` means "pass through every actual return value"
    /// (`SK_MULRET`/`retcnt = -1` in the C API).
    pub fn call(&mut self, argc: usize, retcnt: Option<u32>) -> Result<(), VMError> {
        let callee_slot = self.vm.sp() - argc - 1;
        let depth = self.vm.frames.len();
        self.vm.call_value(callee_slot, argc, retcnt.unwrap_or(0))?;
        crate::vm::dispatch::run_until_return(self.vm, depth)
    }

    /// Runs `call` with errors converted to a `Status` instead of
    /// propagated, leaving the error message on the stack as a String (per
    /// spec.md §7 "from a protected call, the host receives a status").
    pub fn pcall(&mut self, argc: usize, retcnt: Option<u32>) -> Status {
        match self.call(argc, retcnt) {
            Ok(()) => Status::Ok,
            Err(e) => {
                let status = e.status();
                self.push_string(&e.kind.message());
                status
            }
        }
    }

    // --- globals ----------------------------------------------------------------

    pub fn get_global(&mut self, name: &str) -> Option<ValueTag> {
        if self.push_global(name) {
            let tag = ValueTag::of(self.vm.peek(0));
            Some(tag)
        } else {
            None
        }
    }

    pub fn set_global(&mut self, name: &str, is_fixed: bool) -> Status {
        let key = self.intern(name);
        let value = self.vm.pop();
        let idx = match self.vm.globals.ids.get(&key) {
            Some(Value::Number(n)) => n as usize,
            _ => {
                let name_ptr = match key {
                    Value::Object(p) => p,
                    _ => unreachable!(),
                };
                let idx = self.vm.globals.values.len();
                self.vm.globals.values.push(crate::vm::GlobalSlot { value: Value::Empty, is_fixed: false, name: name_ptr });
                self.vm.globals.ids.insert(key, Value::Number(idx as f64));
                idx
            }
        };
        if !self.vm.globals.values[idx].value.is_empty() {
            return Status::GlobalRedef;
        }
        self.vm.globals.values[idx].value = value;
        self.vm.globals.values[idx].is_fixed = is_fixed;
        Status::Ok
    }

    // --- properties -----------------------------------------------------------

    pub fn get_field(&mut self, idx: i32, name: &str) -> Option<ValueTag> {
        let receiver = self.at(idx)?;
        let key = self.intern(name);
        let value = get_property(self.vm, receiver, key).ok()?;
        let tag = ValueTag::of(value);
        self.vm.push(value);
        Some(tag)
    }

    pub fn set_field(&mut self, idx: i32, name: &str) -> Status {
        let Some(receiver) = self.at(idx) else { return Status::BadPropertyAccess };
        let value = self.vm.pop();
        let key = self.intern(name);
        match set_property(self.vm, receiver, key, value) {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    // --- error reporting --------------------------------------------------------

    /// Builds the `VMError` for a given status with the topmost stack value
    /// (expected to be a message String) as its message, and returns it so
    /// the caller can propagate it through `Result`.
    pub fn error(&self, status: Status) -> VMError {
        let message = match self.vm.frames.is_empty() {
            true => String::new(),
            false => self.get_string(-1).unwrap_or_default().to_string(),
        };
        self.vm.error(status_to_kind(status, message))
    }

    fn intern(&mut self, name: &str) -> Value {
        let ptr = self.vm.heap.alloc_string(name.to_string());
        Value::Object(ptr)
    }
}

fn status_to_kind(status: Status, message: String) -> ErrorKind {
    match status {
        Status::Ok => ErrorKind::Internal("sk_error called with Status::Ok".to_string()),
        Status::BadArg => ErrorKind::BadArg(message),
        Status::BadCompare => ErrorKind::BadCompare,
        Status::StackOverflow => ErrorKind::StackOverflow,
        Status::FrameOverflow => ErrorKind::FrameOverflow,
        Status::ArgcMismatch => ErrorKind::ArgcMismatch { name: message, expected: 0, got: 0 },
        Status::ArgcMin => ErrorKind::ArgcMin { name: message, expected: 0, got: 0 },
        Status::BadBinop => ErrorKind::BadBinop { op: "?" },
        Status::UndefinedProperty => ErrorKind::UndefinedProperty(message),
        Status::BadPropertyAccess => ErrorKind::BadPropertyAccess,
        Status::BadInherit => ErrorKind::BadInherit,
        Status::FixedAssign => ErrorKind::FixedAssign(message),
        Status::UndefinedGlobal => ErrorKind::UndefinedGlobal(message),
        Status::GlobalRedef => ErrorKind::GlobalRedef(message),
        Status::BadDisplay => ErrorKind::BadDisplay,
        Status::NotCallable => ErrorKind::NotCallable("value"),
    }
}

/// Shared with `dispatch::object_ops`'s `GET_PROPERTY`/`INDEX` handling, but
/// kept local here since the embedding API's receiver comes from a resolved
/// stack index rather than an opcode operand.
fn get_property(vm: &mut VirtualMachine, receiver: Value, name: Value) -> Result<Value, VMError> {
    let instance = match receiver {
        Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::Instance => ptr,
        _ => return Err(vm.error(ErrorKind::BadPropertyAccess)),
    };
    let field = unsafe { object::as_instance(instance).data.fields.get(&name) };
    if let Some(value) = field {
        return Ok(value);
    }
    let class = unsafe { object::as_instance(instance).data.class };
    let method = unsafe { object::as_class(class).data.methods.get(&name) };
    match method {
        Some(Value::Object(m)) => Ok(Value::Object(vm.heap.alloc_bound_method(receiver, m))),
        _ => {
            let name_str = object::string_contents(match name {
                Value::Object(p) => p,
                _ => unreachable!(),
            })
            .to_string();
            Err(vm.error(ErrorKind::UndefinedProperty(name_str)))
        }
    }
}

fn set_property(vm: &mut VirtualMachine, receiver: Value, name: Value, value: Value) -> Result<(), VMError> {
    let instance = match receiver {
        Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::Instance => ptr,
        _ => return Err(vm.error(ErrorKind::BadPropertyAccess)),
    };
    unsafe { object::as_instance_mut(instance).data.fields.insert(name, value) };
    Ok(())
}
