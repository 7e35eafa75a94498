//! The small standard-library carve-out named in SPEC_FULL.md §D: `clock`,
//! `type`, `tostring`, and `gccollect`, registered as natives the same way
//! the embedding API's `push_cfn`/`set_global` would register a host
//! function, just done once up front instead of by an embedder.

use crate::value::Value;
use crate::vm::error::VMError;
use crate::vm::{GlobalSlot, VirtualMachine};

/// Installs every native into `vm`'s global table. Called once, right after
/// `VirtualMachine::new`, before the first `interpret`.
pub fn install(vm: &mut VirtualMachine) {
    define_native(vm, "clock", clock, 0, false);
    define_native(vm, "type", type_of, 1, false);
    define_native(vm, "tostring", to_string, 1, false);
    define_native(vm, "gccollect", gc_collect, 0, false);
}

fn define_native(vm: &mut VirtualMachine, name: &str, function: crate::object::NativeFn, arity: u8, is_variadic: bool) {
    let name_ptr = vm.heap.alloc_string(name.to_string());
    let native = vm.heap.alloc_native(function, name_ptr, arity, is_variadic);
    let key = Value::Object(name_ptr);
    let idx = vm.globals.values.len();
    vm.globals.values.push(GlobalSlot { value: Value::Object(native), is_fixed: true, name: name_ptr });
    vm.globals.ids.insert(key, Value::Number(idx as f64));
}

/// Seconds elapsed since this `VirtualMachine` was constructed.
fn clock(vm: &mut VirtualMachine, _argc: usize) -> Result<usize, VMError> {
    vm.push(Value::Number(vm.clock_seconds()));
    Ok(1)
}

fn type_of(vm: &mut VirtualMachine, _argc: usize) -> Result<usize, VMError> {
    let value = vm.pop();
    let name = vm.heap.alloc_string(value.type_name().to_string());
    vm.push(Value::Object(name));
    Ok(1)
}

fn to_string(vm: &mut VirtualMachine, _argc: usize) -> Result<usize, VMError> {
    let value = vm.pop();
    let text = crate::vm::dispatch::display_string(vm, value)?;
    let s = vm.heap.alloc_string(text);
    vm.push(Value::Object(s));
    Ok(1)
}

fn gc_collect(vm: &mut VirtualMachine, _argc: usize) -> Result<usize, VMError> {
    vm.collect_garbage();
    vm.push(Value::Nil);
    Ok(1)
}
