use super::Flow;
use crate::object;
use crate::opcode::OpCode;
use crate::value::Value;
use crate::vm::error::{ErrorKind, VMError};
use crate::vm::VirtualMachine;

pub fn dispatch(vm: &mut VirtualMachine, op: OpCode) -> Result<Flow, VMError> {
    match op {
        OpCode::DefineGlobal => {
            let idx = vm.read_byte() as usize;
            define_global(vm, idx)?;
        }
        OpCode::DefineGlobalL => {
            let idx = vm.read_u24() as usize;
            define_global(vm, idx)?;
        }
        OpCode::GetGlobal => {
            let idx = vm.read_byte() as usize;
            get_global(vm, idx)?;
        }
        OpCode::GetGlobalL => {
            let idx = vm.read_u24() as usize;
            get_global(vm, idx)?;
        }
        OpCode::SetGlobal => {
            let idx = vm.read_byte() as usize;
            set_global(vm, idx)?;
        }
        OpCode::SetGlobalL => {
            let idx = vm.read_u24() as usize;
            set_global(vm, idx)?;
        }
        OpCode::GetLocal => {
            let idx = vm.read_byte() as usize;
            let base = vm.current_frame().base;
            vm.push(vm.stack[base + idx]);
        }
        OpCode::GetLocalL => {
            let idx = vm.read_u24() as usize;
            let base = vm.current_frame().base;
            vm.push(vm.stack[base + idx]);
        }
        OpCode::SetLocal => {
            let idx = vm.read_byte() as usize;
            let base = vm.current_frame().base;
            vm.stack[base + idx] = vm.peek(0);
        }
        OpCode::SetLocalL => {
            let idx = vm.read_u24() as usize;
            let base = vm.current_frame().base;
            vm.stack[base + idx] = vm.peek(0);
        }
        OpCode::GetUpvalue => {
            let idx = vm.read_byte() as usize;
            let closure = vm.current_frame().closure;
            let up = unsafe { object::as_closure(closure).data.upvalues[idx] };
            vm.push(read_upvalue(vm, up));
        }
        OpCode::SetUpvalue => {
            let idx = vm.read_byte() as usize;
            let closure = vm.current_frame().closure;
            let up = unsafe { object::as_closure(closure).data.upvalues[idx] };
            let value = vm.peek(0);
            write_upvalue(vm, up, value);
        }
        OpCode::CloseUpval => {
            let from = vm.sp() - 1;
            vm.close_upvalues(from);
            vm.pop();
        }
        OpCode::CloseUpvalN => {
            let n = vm.read_byte() as usize;
            let from = vm.sp() - n;
            vm.close_upvalues(from);
            vm.pop_n(n);
        }
        _ => unreachable!("variables::dispatch called with {:?}", op),
    }
    Ok(Flow::Continue)
}

fn read_upvalue(vm: &VirtualMachine, up: crate::value::ObjectRef) -> Value {
    match unsafe { object::as_upvalue_mut(up) }.data.state {
        crate::object::UpvalueState::Open(idx) => vm.stack[idx],
        crate::object::UpvalueState::Closed(v) => v,
    }
}

fn write_upvalue(vm: &mut VirtualMachine, up: crate::value::ObjectRef, value: Value) {
    let up_obj = unsafe { object::as_upvalue_mut(up) };
    match &mut up_obj.data.state {
        crate::object::UpvalueState::Open(idx) => vm.stack[*idx] = value,
        crate::object::UpvalueState::Closed(v) => *v = value,
    }
}

fn global_name(vm: &VirtualMachine, idx: usize) -> String {
    object::string_contents(vm.globals.values[idx].name).to_string()
}

fn define_global(vm: &mut VirtualMachine, idx: usize) -> Result<(), VMError> {
    let value = vm.pop();
    if !vm.globals.values[idx].value.is_empty() {
        let name = global_name(vm, idx);
        return Err(vm.error(ErrorKind::GlobalRedef(name)));
    }
    vm.globals.values[idx].value = value;
    Ok(())
}

fn get_global(vm: &mut VirtualMachine, idx: usize) -> Result<(), VMError> {
    let value = vm.globals.values[idx].value;
    if value.is_empty() {
        let name = global_name(vm, idx);
        return Err(vm.error(ErrorKind::UndefinedGlobal(name)));
    }
    vm.push(value);
    Ok(())
}

fn set_global(vm: &mut VirtualMachine, idx: usize) -> Result<(), VMError> {
    if vm.globals.values[idx].value.is_empty() {
        let name = global_name(vm, idx);
        return Err(vm.error(ErrorKind::UndefinedGlobal(name)));
    }
    if vm.globals.values[idx].is_fixed {
        let name = global_name(vm, idx);
        return Err(vm.error(ErrorKind::FixedAssign(name)));
    }
    vm.globals.values[idx].value = vm.peek(0);
    Ok(())
}
