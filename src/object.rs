use crate::hash::HashTable;
use crate::opcode::Chunk;
use crate::value::{ObjectRef, Value};

/// Object kind tag stored in every heap object's header. Matches the
/// kinds enumerated in the data model exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    String,
    Function,
    Closure,
    Upvalue,
    Native,
    Class,
    Instance,
    BoundMethod,
}

/// Generic heap object: a header every kind shares, plus the kind-specific
/// payload in `data`. The header must be readable/writable without knowing
/// `T` -- callers reach it either through a `*mut GCObject<HeaderOnly>` (the
/// type-erased view used by the GC and by `Value::Object`) or through the
/// fully-typed pointer once the kind tag has been checked.
#[repr(C)]
pub struct GCObject<T> {
    pub kind: ObjectKind,
    pub mark: bool,
    /// Next node in the global, GC-owned object list (see `Heap`).
    pub next: *mut GCObject<HeaderOnly>,
    pub size: usize,
    pub data: T,
}

/// Zero-sized marker type used only to name the type-erased header view.
pub struct HeaderOnly;

/// Interned, immutable byte string with a precomputed hash.
pub struct SString {
    pub contents: String,
    pub hash: u32,
}

/// A compiled function: its chunk plus metadata the VM's call protocol
/// needs (arity, variadic flag, initializer flag, upvalue count).
pub struct LFunction {
    pub name: Option<ObjectRef>,
    pub arity: u8,
    pub is_variadic: bool,
    pub is_initializer: bool,
    pub upvalue_count: u8,
    pub chunk: Chunk,
}

/// Captured-variable box. `Open` while its captured stack slot is still
/// live; flipped to `Closed` (and unlinked from the VM's open-upvalue list)
/// once the slot goes out of scope.
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct LUpvalue {
    pub state: UpvalueState,
    pub is_fixed: bool,
    /// Next node in the VM's open-upvalue list, sorted by strictly
    /// decreasing stack position. Unused once `state` is `Closed`.
    pub next_open: Option<ObjectRef>,
}

pub struct LClosure {
    pub function: ObjectRef,
    pub upvalues: Vec<ObjectRef>,
}

pub type NativeFn = fn(&mut crate::vm::VirtualMachine, usize) -> Result<usize, crate::vm::error::VMError>;

pub struct LNative {
    pub function: NativeFn,
    pub name: ObjectRef,
    pub arity: u8,
    pub is_variadic: bool,
}

pub struct LClass {
    pub name: ObjectRef,
    pub methods: HashTable,
    /// Cached `__init__` method, kept in sync by `OP_METHOD`/`OP_OVERLOAD`
    /// and by `OP_INHERIT`.
    pub initializer: Option<ObjectRef>,
    /// Cached `__display__` method (supplemented feature, see SPEC_FULL.md).
    pub display: Option<ObjectRef>,
}

pub struct LInstance {
    pub class: ObjectRef,
    pub fields: HashTable,
}

pub struct LBoundMethod {
    pub receiver: Value,
    pub method: ObjectRef,
}

// --- Typed-pointer helpers --------------------------------------------------
//
// Every accessor below assumes the caller already knows the object's kind
// (either by construction or by having checked `.kind`); they exist so the
// rest of the crate doesn't sprinkle raw casts everywhere.

pub unsafe fn header_mut(ptr: ObjectRef) -> &'static mut GCObject<HeaderOnly> {
    unsafe { &mut *ptr }
}

pub unsafe fn as_string<'a>(ptr: ObjectRef) -> &'a GCObject<SString> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::String);
    unsafe { &*(ptr as *mut GCObject<SString>) }
}

pub unsafe fn as_function<'a>(ptr: ObjectRef) -> &'a GCObject<LFunction> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Function);
    unsafe { &*(ptr as *mut GCObject<LFunction>) }
}

pub unsafe fn as_function_mut<'a>(ptr: ObjectRef) -> &'a mut GCObject<LFunction> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Function);
    unsafe { &mut *(ptr as *mut GCObject<LFunction>) }
}

pub unsafe fn as_closure<'a>(ptr: ObjectRef) -> &'a GCObject<LClosure> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Closure);
    unsafe { &*(ptr as *mut GCObject<LClosure>) }
}

pub unsafe fn as_upvalue_mut<'a>(ptr: ObjectRef) -> &'a mut GCObject<LUpvalue> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Upvalue);
    unsafe { &mut *(ptr as *mut GCObject<LUpvalue>) }
}

pub unsafe fn as_native<'a>(ptr: ObjectRef) -> &'a GCObject<LNative> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Native);
    unsafe { &*(ptr as *mut GCObject<LNative>) }
}

pub unsafe fn as_class<'a>(ptr: ObjectRef) -> &'a GCObject<LClass> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Class);
    unsafe { &*(ptr as *mut GCObject<LClass>) }
}

pub unsafe fn as_class_mut<'a>(ptr: ObjectRef) -> &'a mut GCObject<LClass> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Class);
    unsafe { &mut *(ptr as *mut GCObject<LClass>) }
}

pub unsafe fn as_instance<'a>(ptr: ObjectRef) -> &'a GCObject<LInstance> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Instance);
    unsafe { &*(ptr as *mut GCObject<LInstance>) }
}

pub unsafe fn as_instance_mut<'a>(ptr: ObjectRef) -> &'a mut GCObject<LInstance> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::Instance);
    unsafe { &mut *(ptr as *mut GCObject<LInstance>) }
}

pub unsafe fn as_bound_method<'a>(ptr: ObjectRef) -> &'a GCObject<LBoundMethod> {
    debug_assert_eq!(unsafe { (*ptr).kind }, ObjectKind::BoundMethod);
    unsafe { &*(ptr as *mut GCObject<LBoundMethod>) }
}

pub fn string_contents<'a>(ptr: ObjectRef) -> &'a str {
    unsafe { &as_string(ptr).data.contents }
}

pub fn function_display_name(ptr: ObjectRef) -> String {
    let func = unsafe { as_function(ptr) };
    match func.data.name {
        Some(n) => string_contents(n).to_string(),
        None => "script".to_string(),
    }
}

pub fn closure_display_name(ptr: ObjectRef) -> String {
    let closure = unsafe { as_closure(ptr) };
    function_display_name(closure.data.function)
}

pub fn class_display_name(ptr: ObjectRef) -> String {
    string_contents(unsafe { as_class(ptr).data.name }).to_string()
}

pub fn instance_display_name(ptr: ObjectRef) -> String {
    class_display_name(unsafe { as_instance(ptr).data.class })
}
