mod arithmetic;
mod calls;
mod control;
mod foreach;
mod object_ops;
mod stack_const;
mod variables;

use super::error::VMError;
use super::VirtualMachine;
use crate::opcode::OpCode;

/// Whether the interpreter loop should keep stepping or the program has run
/// to completion (the outermost frame returned).
pub enum Flow {
    Continue,
    Halt,
}

/// Single opcode dispatch, delegating to the family module that owns it.
pub fn dispatch(vm: &mut VirtualMachine, op: OpCode) -> Result<Flow, VMError> {
    match op {
        OpCode::Pop | OpCode::PopN | OpCode::Const | OpCode::ConstL | OpCode::Nil | OpCode::NilN | OpCode::True | OpCode::False => {
            stack_const::dispatch(vm, op)
        }
        OpCode::Neg
        | OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Pow
        | OpCode::Not
        | OpCode::Equal
        | OpCode::NotEqual
        | OpCode::Eq
        | OpCode::Less
        | OpCode::LessEqual
        | OpCode::Greater
        | OpCode::GreaterEqual => arithmetic::dispatch(vm, op),
        OpCode::DefineGlobal
        | OpCode::DefineGlobalL
        | OpCode::GetGlobal
        | OpCode::GetGlobalL
        | OpCode::SetGlobal
        | OpCode::SetGlobalL
        | OpCode::GetLocal
        | OpCode::GetLocalL
        | OpCode::SetLocal
        | OpCode::SetLocalL
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::CloseUpval
        | OpCode::CloseUpvalN => variables::dispatch(vm, op),
        OpCode::Jmp
        | OpCode::JmpAndPop
        | OpCode::JmpIfFalse
        | OpCode::JmpIfFalsePop
        | OpCode::JmpIfFalseOrPop
        | OpCode::JmpIfFalseAndPop
        | OpCode::Loop => control::dispatch(vm, op),
        OpCode::CallStart
        | OpCode::RetStart
        | OpCode::Call
        | OpCode::Invoke
        | OpCode::InvokeIndex
        | OpCode::InvokeSuper
        | OpCode::Ret
        | OpCode::TopRet
        | OpCode::Valist => calls::dispatch(vm, op),
        OpCode::Closure
        | OpCode::Class
        | OpCode::Method
        | OpCode::MethodL
        | OpCode::Overload
        | OpCode::OverloadDisplay
        | OpCode::Inherit
        | OpCode::GetProperty
        | OpCode::GetPropertyL
        | OpCode::SetProperty
        | OpCode::SetPropertyL
        | OpCode::GetSuper
        | OpCode::GetSuperL
        | OpCode::Index
        | OpCode::SetIndex => object_ops::dispatch(vm, op),
        OpCode::ForeachPrep | OpCode::Foreach => foreach::dispatch(vm, op),
        OpCode::Print => {
            let value = vm.pop();
            print_value(vm, value)?;
            Ok(Flow::Continue)
        }
    }
}

/// Drives the dispatch loop until the frame stack unwinds back to
/// `depth_before`, for callers (the embedding API's `call`, `display_string`)
/// that start a call without going through the top-level `run()` loop.
pub(crate) fn run_until_return(vm: &mut VirtualMachine, depth_before: usize) -> Result<(), VMError> {
    calls::run_until_call_returns(vm, depth_before)
}

/// `print`'s value-to-text conversion, shared with the `tostring` native:
/// Instances defining `__display__` get to render themselves (supplemented
/// feature, see SPEC_FULL.md §D); everything else uses `Value`'s `Debug`.
pub(crate) fn display_string(vm: &mut VirtualMachine, value: crate::value::Value) -> Result<String, VMError> {
    use crate::object::{self, ObjectKind};
    use crate::value::Value;
    if let Value::Object(ptr) = value {
        if unsafe { (*ptr).kind } == ObjectKind::Instance {
            let class = unsafe { object::as_instance(ptr).data.class };
            if let Some(display_fn) = unsafe { object::as_class(class).data.display } {
                let callee_slot = vm.sp();
                vm.push(value); // receiver occupies the callee/base slot, like any method call
                let depth = vm.frames.len();
                vm.call_closure(display_fn, callee_slot, 0, 1)?;
                calls::run_until_call_returns(vm, depth)?;
                let result = vm.pop();
                return match result {
                    Value::Object(sp) if unsafe { (*sp).kind } == ObjectKind::String => Ok(object::string_contents(sp).to_string()),
                    _ => Err(vm.error(super::error::ErrorKind::BadDisplay)),
                };
            }
        }
    }
    Ok(format!("{value:?}"))
}

fn print_value(vm: &mut VirtualMachine, value: crate::value::Value) -> Result<(), VMError> {
    let text = display_string(vm, value)?;
    println!("{text}");
    Ok(())
}
