use super::Flow;
use crate::object::{self, ObjectKind};
use crate::opcode::{OpCode, OVERLOAD_SLOT_INIT};
use crate::value::Value;
use crate::vm::error::{ErrorKind, VMError};
use crate::vm::VirtualMachine;

pub fn dispatch(vm: &mut VirtualMachine, op: OpCode) -> Result<Flow, VMError> {
    match op {
        OpCode::Closure => closure(vm)?,
        OpCode::Class => {
            let idx = vm.read_byte() as usize;
            let name = match vm.read_constant(idx) {
                Value::Object(ptr) => ptr,
                _ => unreachable!("class name constant is always a string"),
            };
            let class = vm.heap.alloc_class(name);
            vm.push(Value::Object(class));
        }
        OpCode::Method => {
            let idx = vm.read_byte() as usize;
            bind_method(vm, idx)?;
        }
        OpCode::MethodL => {
            let idx = vm.read_u24() as usize;
            bind_method(vm, idx)?;
        }
        OpCode::Overload => {
            let slot = vm.read_byte();
            let closure = to_object(vm.peek(0));
            let class = to_object(vm.peek(1));
            let class_obj = unsafe { object::as_class_mut(class) };
            match slot {
                OVERLOAD_SLOT_INIT => class_obj.data.initializer = Some(closure),
                other => return Err(vm.error(ErrorKind::Internal(format!("unknown OVERLOAD slot {other}")))),
            }
        }
        OpCode::OverloadDisplay => {
            let closure = to_object(vm.peek(0));
            let class = to_object(vm.peek(1));
            let class_obj = unsafe { object::as_class_mut(class) };
            class_obj.data.display = Some(closure);
        }
        OpCode::Inherit => {
            let subclass = to_object(vm.pop());
            let superclass_val = vm.peek(0);
            let superclass = match superclass_val {
                Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::Class => ptr,
                _ => return Err(vm.error(ErrorKind::BadInherit)),
            };
            let superclass_ref = unsafe { object::as_class(superclass) };
            let initializer = superclass_ref.data.initializer;
            let display = superclass_ref.data.display;
            let sub = unsafe { object::as_class_mut(subclass) };
            sub.data.methods.copy_from(&superclass_ref.data.methods);
            sub.data.initializer = initializer;
            sub.data.display = display;
        }
        OpCode::GetProperty => {
            let idx = vm.read_byte() as usize;
            get_property_named(vm, idx)?;
        }
        OpCode::GetPropertyL => {
            let idx = vm.read_u24() as usize;
            get_property_named(vm, idx)?;
        }
        OpCode::SetProperty => {
            let idx = vm.read_byte() as usize;
            set_property_named(vm, idx)?;
        }
        OpCode::SetPropertyL => {
            let idx = vm.read_u24() as usize;
            set_property_named(vm, idx)?;
        }
        OpCode::GetSuper => {
            let idx = vm.read_byte() as usize;
            get_super(vm, idx)?;
        }
        OpCode::GetSuperL => {
            let idx = vm.read_u24() as usize;
            get_super(vm, idx)?;
        }
        OpCode::Index => {
            let key = vm.pop();
            let receiver = vm.pop();
            let value = get_property(vm, receiver, key)?;
            vm.push(value);
        }
        OpCode::SetIndex => {
            let value = vm.pop();
            let key = vm.pop();
            let receiver = vm.pop();
            set_property(vm, receiver, key, value)?;
            vm.push(value);
        }
        _ => unreachable!("object_ops::dispatch called with {:?}", op),
    }
    Ok(Flow::Continue)
}

fn to_object(value: Value) -> crate::value::ObjectRef {
    match value {
        Value::Object(ptr) => ptr,
        _ => unreachable!("caller guarantees an object value here"),
    }
}

/// Reads the upvalue-descriptor triples the compiler emits after `CLOSURE`'s
/// function constant: `is_local`, a reserved flags byte, then a 24-bit index.
/// `is_local` captures a slot in the *enclosing* frame (the one executing
/// this instruction); otherwise the upvalue is shared from that frame's own
/// closure.
fn closure(vm: &mut VirtualMachine) -> Result<(), VMError> {
    let idx = vm.read_u24() as usize;
    let function = match vm.read_constant(idx) {
        Value::Object(ptr) => ptr,
        _ => unreachable!("closure function constant is always a Function object"),
    };
    let upvalue_count = unsafe { object::as_function(function).data.upvalue_count } as usize;
    let enclosing_base = vm.current_frame().base;
    let enclosing_closure = vm.current_frame().closure;
    let mut upvalues = Vec::with_capacity(upvalue_count);
    for _ in 0..upvalue_count {
        let is_local = vm.read_byte() != 0;
        let _flags = vm.read_byte();
        let index = vm.read_u24() as usize;
        let up = if is_local {
            vm.capture_upvalue(enclosing_base + index)
        } else {
            unsafe { object::as_closure(enclosing_closure).data.upvalues[index] }
        };
        upvalues.push(up);
    }
    let closure = vm.heap.alloc_closure(function, upvalues);
    vm.push(Value::Object(closure));
    Ok(())
}

fn bind_method(vm: &mut VirtualMachine, name_idx: usize) -> Result<(), VMError> {
    let name = vm.read_constant(name_idx);
    let closure_val = vm.pop();
    let class = to_object(vm.peek(0));
    let closure = to_object(closure_val);
    unsafe { object::as_class_mut(class).data.methods.insert(name, Value::Object(closure)) };
    Ok(())
}

fn property_name(vm: &VirtualMachine, idx: usize) -> Value {
    vm.read_constant(idx)
}

fn get_property_named(vm: &mut VirtualMachine, idx: usize) -> Result<(), VMError> {
    let name = property_name(vm, idx);
    let receiver = vm.pop();
    let value = get_property(vm, receiver, name)?;
    vm.push(value);
    Ok(())
}

fn set_property_named(vm: &mut VirtualMachine, idx: usize) -> Result<(), VMError> {
    let name = property_name(vm, idx);
    let value = vm.pop();
    let receiver = vm.pop();
    set_property(vm, receiver, name, value)?;
    vm.push(value);
    Ok(())
}

/// Field lookup takes priority over methods (spec.md §4.3 "Property/method
/// resolution"); an unbound method hit is wrapped in a fresh `BoundMethod`.
fn get_property(vm: &mut VirtualMachine, receiver: Value, name: Value) -> Result<Value, VMError> {
    if !name.is_string() {
        return Err(vm.error(ErrorKind::BadPropertyAccess));
    }
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
        Some(Value::Object(m)) => {
            let bound = vm.heap.alloc_bound_method(receiver, m);
            Ok(Value::Object(bound))
        }
        _ => Err(vm.error(ErrorKind::UndefinedProperty(name_string(name)))),
    }
}

fn set_property(vm: &mut VirtualMachine, receiver: Value, name: Value, value: Value) -> Result<(), VMError> {
    if !name.is_string() {
        return Err(vm.error(ErrorKind::BadPropertyAccess));
    }
    let instance = match receiver {
        Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::Instance => ptr,
        _ => return Err(vm.error(ErrorKind::BadPropertyAccess)),
    };
    unsafe { object::as_instance_mut(instance).data.fields.insert(name, value) };
    Ok(())
}

fn get_super(vm: &mut VirtualMachine, idx: usize) -> Result<(), VMError> {
    let name = vm.read_constant(idx);
    let superclass_val = vm.pop();
    let receiver = vm.pop();
    let superclass = match superclass_val {
        Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::Class => ptr,
        _ => return Err(vm.error(ErrorKind::Internal("'super' did not resolve to a class".to_string()))),
    };
    let method = unsafe { object::as_class(superclass).data.methods.get(&name) };
    match method {
        Some(Value::Object(m)) => {
            let bound = vm.heap.alloc_bound_method(receiver, m);
            vm.push(Value::Object(bound));
            Ok(())
        }
        _ => Err(vm.error(ErrorKind::UndefinedProperty(name_string(name)))),
    }
}

fn name_string(name: Value) -> String {
    match name {
        Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::String => object::string_contents(ptr).to_string(),
        other => format!("{other:?}"),
    }
}
