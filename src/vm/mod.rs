pub mod dispatch;
pub mod error;

use crate::compiler::{CompileError, Compiler};
use crate::hash::HashTable;
use crate::heap::Heap;
use crate::object::{self, ObjectKind};
use crate::opcode::OpCode;
use crate::value::{ObjectRef, Value};
use error::{ErrorKind, Status, TraceFrame, VMError};
use std::time::Instant;

pub const STACK_MAX: usize = 1 << 15;
pub const FRAMES_MAX: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    #[default]
    Release,
    Debug,
    Trace,
}

/// One slot in the dense global-value array the compiler hands out ids
/// into (see `compiler::Compiler::global_id`).
pub struct GlobalSlot {
    pub value: Value,
    pub is_fixed: bool,
    /// Kept alongside the value so runtime errors (`UndefinedGlobal`,
    /// `GlobalRedef`, `FixedAssign`) can name the global without a reverse
    /// lookup through the id table.
    pub name: ObjectRef,
}

/// Shared between the compiler (which allocates ids) and the VM (which
/// reads/writes values); a single instance outlives any number of
/// sequential `Compiler::compile` calls against one VM, the way a REPL
/// accumulates globals across lines.
#[derive(Default)]
pub struct Globals {
    pub ids: HashTable,
    pub values: Vec<GlobalSlot>,
}

/// One activation record. `base` is the stack slot holding the callee value
/// itself (or, after a class/bound-method call rewrites it, the receiver);
/// local slot `i` always lives at `stack[base + i]`, with slot 0 reserved
/// (see `compiler::FunctionScope::new`).
pub struct CallFrame {
    pub closure: ObjectRef,
    pub ip: usize,
    pub base: usize,
    /// What the *caller* asked for; 0 means "pass through every actual
    /// return value" (only meaningful for the top-level pass-through case).
    pub retcnt: u32,
    pub vacnt: usize,
}

pub struct VirtualMachine {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub open_upvalues: Option<ObjectRef>,
    pub globals: Globals,
    pub heap: Heap,
    pub call_starts: Vec<usize>,
    pub ret_starts: Vec<usize>,
    /// Marks top-level scripts already executed, so a REPL/embedder can
    /// avoid re-running one (spec.md §4.3 "Execution state").
    pub loaded_scripts: HashTable,
    pub log_level: LogLevel,
    start_time: Instant,
}

impl VirtualMachine {
    pub fn new(log_level: LogLevel) -> Self {
        let mut heap = Heap::new();
        heap.stress_gc = log_level == LogLevel::Trace;
        VirtualMachine {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            open_upvalues: None,
            globals: Globals::default(),
            heap,
            call_starts: Vec::new(),
            ret_starts: Vec::new(),
            loaded_scripts: HashTable::new(),
            log_level,
            start_time: Instant::now(),
        }
    }

    pub fn clock_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    // --- compiling + top-level driving ------------------------------------

    /// Compiles `source` and runs it as a fresh top-level script: wraps the
    /// compiled `Function` in a zero-upvalue `Closure`, pushes the entry
    /// frame, and drives the interpreter loop to completion.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = match self.compile(source) {
            Ok(f) => f,
            Err(errors) => return Err(InterpretError::Compile(errors)),
        };
        self.interpret_function(function)
    }

    /// Compiles `source` without running it, for callers (the `trace`-mode
    /// CLI driver) that want to disassemble the top-level chunk first.
    pub fn compile(&mut self, source: &str) -> Result<ObjectRef, Vec<CompileError>> {
        Compiler::compile(source, &mut self.heap, &mut self.globals)
    }

    /// Runs an already-compiled top-level `Function` to completion.
    pub fn interpret_function(&mut self, function: ObjectRef) -> Result<(), InterpretError> {
        let closure = self.heap.alloc_closure(function, Vec::new());
        let callee_slot = self.sp();
        self.push(Value::Object(closure));
        if let Err(e) = self.call_value(callee_slot, 0, 0) {
            return Err(InterpretError::Runtime(e));
        }
        match self.run() {
            Ok(()) => Ok(()),
            Err(e) => Err(InterpretError::Runtime(e)),
        }
    }

    pub fn run(&mut self) -> Result<(), VMError> {
        if self.log_level != LogLevel::Release {
            eprintln!("skooma: entry frame prepared, {} frame(s) on stack", self.frames.len());
        }
        loop {
            if self.frames.is_empty() {
                break;
            }
            let op = self.read_op();
            if self.log_level == LogLevel::Trace {
                eprintln!("skooma: trace: sp={} frames={} op={:?}", self.stack.len(), self.frames.len(), op);
            }
            match dispatch::dispatch(self, op)? {
                dispatch::Flow::Continue => {}
                dispatch::Flow::Halt => break,
            }
            if self.heap.check_gc_condition() {
                self.collect_garbage();
            }
        }
        if self.log_level != LogLevel::Release {
            eprintln!("skooma: run complete, {} object(s) live, {} byte(s) allocated", self.count_live(), self.heap.bytes_allocated);
        }
        Ok(())
    }

    fn count_live(&self) -> usize {
        let mut n = 0;
        let mut cur = self.heap.all_objects;
        while !cur.is_null() {
            n += 1;
            cur = unsafe { (*cur).next };
        }
        n
    }

    // --- bytecode stream access --------------------------------------------

    pub(crate) fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("dispatch only runs with an active frame")
    }

    pub(crate) fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("dispatch only runs with an active frame")
    }

    pub(crate) fn chunk_of(&self, closure: ObjectRef) -> &crate::opcode::Chunk {
        let function = unsafe { object::as_closure(closure).data.function };
        unsafe { &object::as_function(function).data.chunk }
    }

    pub(crate) fn read_byte(&mut self) -> u8 {
        let frame = self.current_frame();
        let closure = frame.closure;
        let ip = frame.ip;
        let byte = self.chunk_of(closure).code[ip];
        self.current_frame_mut().ip += 1;
        byte
    }

    pub(crate) fn read_op(&mut self) -> OpCode {
        let byte = self.read_byte();
        OpCode::from_byte(byte).unwrap_or_else(|| panic!("corrupt bytecode: invalid opcode byte {byte}"))
    }

    pub(crate) fn read_u24(&mut self) -> u32 {
        let a = self.read_byte() as u32;
        let b = self.read_byte() as u32;
        let c = self.read_byte() as u32;
        a | (b << 8) | (c << 16)
    }

    pub(crate) fn read_constant(&self, index: usize) -> Value {
        let closure = self.current_frame().closure;
        self.chunk_of(closure).constants[index]
    }

    pub(crate) fn current_line(&self) -> u32 {
        let frame = self.current_frame();
        let closure = frame.closure;
        // `ip` has already advanced past the opcode byte read this step.
        self.chunk_of(closure).line_at(frame.ip.saturating_sub(1))
    }

    // --- stack primitives ---------------------------------------------------

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow: VM dispatch popped an empty stack")
    }

    pub(crate) fn pop_n(&mut self, n: usize) {
        let new_len = self.stack.len() - n;
        self.stack.truncate(new_len);
    }

    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    pub(crate) fn sp(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn check_stack_headroom(&self, extra: usize) -> Result<(), VMError> {
        if self.stack.len() + extra > STACK_MAX { Err(self.error(ErrorKind::StackOverflow)) } else { Ok(()) }
    }

    // --- error construction --------------------------------------------------

    pub(crate) fn error(&self, kind: ErrorKind) -> VMError {
        let mut stack_trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let name = object::closure_display_name(frame.closure);
            let line = self.chunk_of(frame.closure).line_at(frame.ip.saturating_sub(1));
            stack_trace.push(TraceFrame { name, line });
        }
        VMError { kind, stack_trace }
    }

    // --- call protocol --------------------------------------------------------

    /// Dispatches a call whose `[callee, arg0..argN]` layout starts at
    /// `callee_slot`, with `argc` arguments already pushed above it.
    /// `retcnt` is the caller's declared return count (0 = pass all).
    pub(crate) fn call_value(&mut self, callee_slot: usize, argc: usize, retcnt: u32) -> Result<(), VMError> {
        let callee = self.stack[callee_slot];
        match callee {
            Value::Object(ptr) => match unsafe { (*ptr).kind } {
                ObjectKind::Closure => self.call_closure(ptr, callee_slot, argc, retcnt),
                ObjectKind::Native => self.call_native(ptr, callee_slot, argc, retcnt),
                ObjectKind::Class => self.call_class(ptr, callee_slot, argc, retcnt),
                ObjectKind::BoundMethod => {
                    let bm = unsafe { object::as_bound_method(ptr) };
                    let receiver = bm.data.receiver;
                    let method = bm.data.method;
                    self.stack[callee_slot] = receiver;
                    self.call_closure(method, callee_slot, argc, retcnt)
                }
                _ => Err(self.error(ErrorKind::NotCallable(callee.type_name()))),
            },
            _ => Err(self.error(ErrorKind::NotCallable(callee.type_name()))),
        }
    }

    pub(crate) fn call_closure(&mut self, closure: ObjectRef, callee_slot: usize, argc: usize, retcnt: u32) -> Result<(), VMError> {
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.error(ErrorKind::FrameOverflow));
        }
        let function = unsafe { object::as_closure(closure).data.function };
        let (arity, is_variadic, name) = {
            let f = unsafe { object::as_function(function) };
            (f.data.arity as usize, f.data.is_variadic, object::function_display_name(function))
        };
        let vacnt = if is_variadic {
            if argc < arity {
                return Err(self.error(ErrorKind::ArgcMin { name, expected: arity as u8, got: argc }));
            }
            argc - arity
        } else {
            if argc != arity {
                return Err(self.error(ErrorKind::ArgcMismatch { name, expected: arity as u8, got: argc }));
            }
            0
        };
        self.check_stack_headroom(0)?;
        self.frames.push(CallFrame { closure, ip: 0, base: callee_slot, retcnt, vacnt });
        Ok(())
    }

    fn call_native(&mut self, native: ObjectRef, callee_slot: usize, argc: usize, retcnt: u32) -> Result<(), VMError> {
        let (function, arity, is_variadic, name) = {
            let n = unsafe { object::as_native(native) };
            (n.data.function, n.data.arity as usize, n.data.is_variadic, object::string_contents(n.data.name).to_string())
        };
        if is_variadic {
            if argc < arity {
                return Err(self.error(ErrorKind::ArgcMin { name, expected: arity as u8, got: argc }));
            }
        } else if argc != arity {
            return Err(self.error(ErrorKind::ArgcMismatch { name, expected: arity as u8, got: argc }));
        }
        let produced = function(self, argc)?;
        let result_start = self.sp() - produced;
        let actual: Vec<Value> = self.stack[result_start..].to_vec();
        self.stack.truncate(result_start);
        self.complete_call(callee_slot, &actual, retcnt);
        Ok(())
    }

    fn call_class(&mut self, class: ObjectRef, callee_slot: usize, argc: usize, retcnt: u32) -> Result<(), VMError> {
        let instance = self.heap.alloc_instance(class);
        self.stack[callee_slot] = Value::Object(instance);
        let initializer = unsafe { object::as_class(class).data.initializer };
        match initializer {
            Some(init) => self.call_closure(init, callee_slot, argc, retcnt),
            None => {
                if argc != 0 {
                    let name = object::class_display_name(class);
                    return Err(self.error(ErrorKind::ArgcMismatch { name, expected: 0, got: argc }));
                }
                self.complete_call(callee_slot, &[Value::Object(instance)], retcnt);
                Ok(())
            }
        }
    }

    /// Shared tail of every return path (`RET`, `TOPRET`, and the
    /// non-closure branches of `call_value`): pads/truncates `actual` to
    /// `retcnt` and leaves the result sitting at `base`.
    pub(crate) fn complete_call(&mut self, base: usize, actual: &[Value], retcnt: u32) {
        let want = if retcnt == 0 { actual.len() } else { retcnt as usize };
        self.stack.truncate(base);
        for i in 0..want {
            self.stack.push(actual.get(i).copied().unwrap_or(Value::Nil));
        }
    }

    /// Pops the current frame, closing upvalues at or above its base, and
    /// completes the call with `actual` as the returned values.
    pub(crate) fn return_from_frame(&mut self, actual: &[Value]) {
        let frame = self.frames.pop().expect("return with no active frame");
        self.close_upvalues(frame.base);
        self.complete_call(frame.base, actual, frame.retcnt);
    }

    // --- upvalues --------------------------------------------------------------

    /// Finds an existing open upvalue for `stack_index`, or creates one and
    /// inserts it into the open-upvalue list (kept sorted by strictly
    /// decreasing stack position, per spec.md §3).
    pub(crate) fn capture_upvalue(&mut self, stack_index: usize) -> ObjectRef {
        let mut prev: Option<ObjectRef> = None;
        let mut cur = self.open_upvalues;
        while let Some(ptr) = cur {
            let up = unsafe { object::as_upvalue_mut(ptr) };
            let idx = match up.data.state {
                crate::object::UpvalueState::Open(i) => i,
                crate::object::UpvalueState::Closed(_) => unreachable!("open list holds only open upvalues"),
            };
            if idx == stack_index {
                return ptr;
            }
            if idx < stack_index {
                break;
            }
            prev = Some(ptr);
            cur = up.data.next_open;
        }
        let created = self.heap.alloc_upvalue(stack_index, false);
        {
            let up = unsafe { object::as_upvalue_mut(created) };
            up.data.next_open = cur;
        }
        match prev {
            Some(p) => unsafe { object::as_upvalue_mut(p).data.next_open = Some(created) },
            None => self.open_upvalues = Some(created),
        }
        created
    }

    /// Closes every open upvalue whose captured slot is `>= from`, copying
    /// the live stack value into the upvalue's own storage.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        while let Some(ptr) = self.open_upvalues {
            let idx = match unsafe { object::as_upvalue_mut(ptr) }.data.state {
                crate::object::UpvalueState::Open(i) => i,
                crate::object::UpvalueState::Closed(_) => break,
            };
            if idx < from {
                break;
            }
            let value = self.stack[idx];
            let up = unsafe { object::as_upvalue_mut(ptr) };
            up.data.state = crate::object::UpvalueState::Closed(value);
            self.open_upvalues = up.data.next_open;
            up.data.next_open = None;
        }
    }

    // --- garbage collection ------------------------------------------------------

    /// Stop-the-world mark-and-sweep. Root order mirrors
    /// `original_source/src/mem.c`'s `mark_vm_roots`: value stack, frames,
    /// open upvalues, then globals (both the id table's keys and the value
    /// array) -- so a reader diffing against that file can follow along.
    pub fn collect_garbage(&mut self) {
        let mut gray: Vec<ObjectRef> = Vec::new();
        self.mark_roots(&mut gray);
        while let Some(ptr) = gray.pop() {
            self.blacken_object(ptr, &mut gray);
        }
        self.heap.strings.retain_marked_string_keys();
        self.sweep();
        self.heap.expand_threshold();
    }

    fn mark_roots(&mut self, gray: &mut Vec<ObjectRef>) {
        for i in 0..self.stack.len() {
            let v = self.stack[i];
            Self::mark_value(v, gray);
        }
        for frame in &self.frames {
            Self::mark_object(frame.closure, gray);
        }
        let mut cur = self.open_upvalues;
        while let Some(ptr) = cur {
            Self::mark_object(ptr, gray);
            cur = unsafe { object::as_upvalue_mut(ptr) }.data.next_open;
        }
        for slot in &self.globals.values {
            Self::mark_value(slot.value, gray);
        }
        for (key, _) in self.globals.ids.iter() {
            Self::mark_value(key, gray);
        }
    }

    fn mark_value(value: Value, gray: &mut Vec<ObjectRef>) {
        if let Value::Object(ptr) = value {
            Self::mark_object(ptr, gray);
        }
    }

    fn mark_object(ptr: ObjectRef, gray: &mut Vec<ObjectRef>) {
        let header = unsafe { &mut *ptr };
        if header.mark {
            return;
        }
        header.mark = true;
        gray.push(ptr);
    }

    fn blacken_object(&self, ptr: ObjectRef, gray: &mut Vec<ObjectRef>) {
        match unsafe { (*ptr).kind } {
            ObjectKind::String | ObjectKind::Native => {}
            ObjectKind::Function => {
                let f = unsafe { object::as_function(ptr) };
                if let Some(name) = f.data.name {
                    Self::mark_object(name, gray);
                }
                for c in &f.data.chunk.constants {
                    Self::mark_value(*c, gray);
                }
            }
            ObjectKind::Closure => {
                let c = unsafe { object::as_closure(ptr) };
                Self::mark_object(c.data.function, gray);
                for up in &c.data.upvalues {
                    Self::mark_object(*up, gray);
                }
            }
            ObjectKind::Upvalue => {
                let u = unsafe { object::as_upvalue_mut(ptr) };
                if let crate::object::UpvalueState::Closed(v) = u.data.state {
                    Self::mark_value(v, gray);
                }
            }
            ObjectKind::Class => {
                let c = unsafe { object::as_class(ptr) };
                Self::mark_object(c.data.name, gray);
                for (k, v) in c.data.methods.iter() {
                    Self::mark_value(k, gray);
                    Self::mark_value(v, gray);
                }
                if let Some(init) = c.data.initializer {
                    Self::mark_object(init, gray);
                }
                if let Some(disp) = c.data.display {
                    Self::mark_object(disp, gray);
                }
            }
            ObjectKind::Instance => {
                let i = unsafe { object::as_instance(ptr) };
                Self::mark_object(i.data.class, gray);
                for (k, v) in i.data.fields.iter() {
                    Self::mark_value(k, gray);
                    Self::mark_value(v, gray);
                }
            }
            ObjectKind::BoundMethod => {
                let b = unsafe { object::as_bound_method(ptr) };
                Self::mark_value(b.data.receiver, gray);
                Self::mark_object(b.data.method, gray);
            }
        }
    }

    fn sweep(&mut self) {
        let mut prev: Option<ObjectRef> = None;
        let mut cur = self.heap.all_objects;
        while !cur.is_null() {
            let next = unsafe { (*cur).next };
            if unsafe { (*cur).mark } {
                unsafe { (*cur).mark = false };
                prev = Some(cur);
                cur = next;
            } else {
                match prev {
                    Some(p) => unsafe { (*p).next = next },
                    None => self.heap.all_objects = next,
                }
                unsafe { self.heap.free_object(cur) };
                cur = next;
            }
        }
    }
}

pub enum InterpretError {
    Compile(Vec<CompileError>),
    Runtime(VMError),
}

impl InterpretError {
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Compile(_) => 65,
            InterpretError::Runtime(_) => 70,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            InterpretError::Compile(_) => Status::BadArg,
            InterpretError::Runtime(e) => e.status(),
        }
    }
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::Compile(errors) => {
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
            InterpretError::Runtime(e) => write!(f, "{e}"),
        }
    }
}
