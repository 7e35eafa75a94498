use super::Flow;
use crate::object::{self, ObjectKind};
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::error::{ErrorKind, VMError};
use crate::vm::VirtualMachine;

pub fn dispatch(vm: &mut VirtualMachine, op: OpCode) -> Result<Flow, VMError> {
    match op {
        OpCode::CallStart => {
            let marker = vm.sp();
            vm.call_starts.push(marker);
        }
        OpCode::RetStart => {
            let marker = vm.sp();
            vm.ret_starts.push(marker);
        }
        OpCode::Call => {
            let retcnt = vm.read_u24();
            let marker = vm.call_starts.pop().expect("CALL with no matching CALLSTART");
            let argc = vm.sp() - marker;
            let callee_slot = marker - 1;
            vm.call_value(callee_slot, argc, retcnt)?;
        }
        OpCode::Invoke => {
            let name_idx = vm.read_u24() as usize;
            let retcnt = vm.read_u24();
            let marker = vm.call_starts.pop().expect("INVOKE with no matching CALLSTART");
            let argc = vm.sp() - marker;
            let receiver_slot = marker - 1;
            let name = vm.read_constant(name_idx);
            invoke(vm, receiver_slot, name, argc, retcnt)?;
        }
        OpCode::InvokeIndex => {
            let retcnt = vm.read_u24();
            let marker = vm.call_starts.pop().expect("INVOKE_INDEX with no matching CALLSTART");
            // The key was already pushed (by `index()`'s leading `self.expression()`)
            // before CALLSTART ran, so the marker sits one slot higher than the
            // usual `callee_slot + 1` position: `marker - 1` is the key, not the
            // callee. Consume the key, then shift the args down to close the gap.
            let key_slot = marker - 1;
            let receiver_slot = marker - 2;
            let key = vm.stack[key_slot];
            let argc = vm.sp() - marker;
            for i in 0..argc {
                vm.stack[key_slot + i] = vm.stack[key_slot + 1 + i];
            }
            vm.pop_n(1);
            invoke(vm, receiver_slot, key, argc, retcnt)?;
        }
        OpCode::InvokeSuper => {
            let name_idx = vm.read_u24() as usize;
            let retcnt = vm.read_u24();
            let marker = vm.call_starts.pop().expect("INVOKE_SUPER with no matching CALLSTART");
            let superclass = vm.pop();
            let argc = vm.sp() - marker;
            let receiver_slot = marker - 1;
            let name = vm.read_constant(name_idx);
            let class = match superclass {
                Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::Class => ptr,
                _ => return Err(vm.error(ErrorKind::Internal("'super' did not resolve to a class".to_string()))),
            };
            let method = unsafe { object::as_class(class).data.methods.get(&name) };
            match method {
                Some(Value::Object(m)) => vm.call_closure(m, receiver_slot, argc, retcnt)?,
                _ => return Err(vm.error(ErrorKind::UndefinedProperty(value_as_name(name)))),
            }
        }
        OpCode::Ret => {
            let marker = vm.ret_starts.pop().expect("RET with no matching RETSTART");
            let actual: Vec<Value> = vm.stack[marker..].to_vec();
            vm.pop_n(vm.sp() - marker);
            vm.return_from_frame(&actual);
            if vm.frames.is_empty() {
                return Ok(Flow::Halt);
            }
        }
        OpCode::TopRet => {
            let value = vm.pop();
            vm.return_from_frame(&[value]);
            if vm.frames.is_empty() {
                return Ok(Flow::Halt);
            }
        }
        OpCode::Valist => {
            let n = vm.read_byte() as usize;
            let frame = vm.current_frame();
            let base = frame.base;
            let vacnt = frame.vacnt;
            let closure = frame.closure;
            let function = unsafe { object::as_closure(closure).data.function };
            let arity = unsafe { object::as_function(function).data.arity } as usize;
            let take = n.min(vacnt);
            let start = base + 1 + arity;
            for i in 0..take {
                vm.push(vm.stack[start + i]);
            }
        }
        _ => unreachable!("calls::dispatch called with {:?}", op),
    }
    Ok(Flow::Continue)
}

fn value_as_name(value: Value) -> String {
    match value {
        Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::String => object::string_contents(ptr).to_string(),
        other => format!("{other:?}"),
    }
}

/// Shared by `INVOKE` and `INVOKE_INDEX`: a field hit on the receiver bypasses
/// bound-method allocation entirely (the field value is called directly);
/// a method hit calls the cached closure with `self` already sitting at
/// `receiver_slot`; anything else is `UndefinedProperty`.
fn invoke(vm: &mut VirtualMachine, receiver_slot: usize, name: Value, argc: usize, retcnt: u32) -> Result<(), VMError> {
    if !name.is_string() {
        return Err(vm.error(ErrorKind::BadPropertyAccess));
    }
    let receiver = vm.stack[receiver_slot];
    let instance = match receiver {
        Value::Object(ptr) if unsafe { (*ptr).kind } == ObjectKind::Instance => ptr,
        _ => return Err(vm.error(ErrorKind::BadPropertyAccess)),
    };
    let field = unsafe { object::as_instance(instance).data.fields.get(&name) };
    if let Some(value) = field {
        vm.stack[receiver_slot] = value;
        return vm.call_value(receiver_slot, argc, retcnt);
    }
    let class = unsafe { object::as_instance(instance).data.class };
    let method = unsafe { object::as_class(class).data.methods.get(&name) };
    match method {
        Some(Value::Object(m)) => vm.call_closure(m, receiver_slot, argc, retcnt),
        _ => Err(vm.error(ErrorKind::UndefinedProperty(value_as_name(name)))),
    }
}

/// Runs the dispatch loop until the current call returns -- used to invoke a
/// `__display__` overload re-entrantly from inside another dispatch (see
/// `dispatch::display_string`), without the outer `run()` loop noticing.
pub(super) fn run_until_call_returns(vm: &mut VirtualMachine, depth_before: usize) -> Result<(), VMError> {
    while vm.frames.len() > depth_before {
        let op = vm.read_op();
        super::dispatch(vm, op)?;
        if vm.heap.check_gc_condition() {
            vm.collect_garbage();
        }
    }
    Ok(())
}
