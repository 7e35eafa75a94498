//! Mark-and-sweep collection behavior, driven through `gccollect()` so the
//! GC exercises exactly the trigger path an embedder or a running script
//! would use (no direct access to `VirtualMachine::collect_garbage`, which
//! is crate-private).

use skooma::vm::{LogLevel, VirtualMachine};

fn vm_with_stdlib() -> VirtualMachine {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    skooma::std_lib::install(&mut vm);
    vm
}

#[test]
fn collecting_after_churn_does_not_grow_live_bytes() {
    let mut vm = vm_with_stdlib();
    vm.interpret(
        r#"
        class Node {
            __init__(v) {
                self.v = v;
            }
        }
        var i = 0;
        while (i < 2000) {
            var n = Node(i);
            i = i + 1;
        }
        "#,
    )
    .unwrap();

    let before = vm.heap.bytes_allocated;
    vm.interpret("gccollect();").unwrap();
    let after = vm.heap.bytes_allocated;
    assert!(after <= before, "sweep should reclaim the unreachable Node instances");
}

#[test]
fn reachable_globals_survive_collection() {
    let mut vm = vm_with_stdlib();
    vm.interpret(
        r#"
        class Node {
            __init__(v) {
                self.v = v;
            }
        }
        var kept = Node(7);
        var i = 0;
        while (i < 1000) {
            var throwaway = Node(i);
            i = i + 1;
        }
        gccollect();
        "#,
    )
    .unwrap();

    let mut api = skooma::api::Api::new(&mut vm);
    api.get_global("kept").expect("kept must survive the collection");
    assert!(api.is_instance(-1));
    assert_eq!(api.get_field(-1, "v"), Some(skooma::api::ValueTag::Number));
    assert_eq!(api.get_number(-1), Some(7.0));
}

#[test]
fn repeated_collections_are_idempotent_on_a_quiescent_heap() {
    let mut vm = vm_with_stdlib();
    vm.interpret("var x = 1;").unwrap();
    vm.interpret("gccollect();").unwrap();
    let first = vm.heap.bytes_allocated;
    vm.interpret("gccollect();").unwrap();
    let second = vm.heap.bytes_allocated;
    assert_eq!(first, second);
}
