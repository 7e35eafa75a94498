//! End-to-end scenarios driving the compiler and VM together through
//! `VirtualMachine::interpret`. Results are read back through the
//! embedding API rather than by capturing `print`'s stdout -- the script
//! stores its answer in a global, which the test fetches by name the same
//! way a host embedding this interpreter would.

use skooma::api::Api;
use skooma::vm::{LogLevel, VirtualMachine};

fn run(source: &str) -> VirtualMachine {
    let mut vm = VirtualMachine::new(LogLevel::Release);
    skooma::std_lib::install(&mut vm);
    vm.interpret(source).unwrap_or_else(|e| panic!("interpret failed: {e}"));
    vm
}

#[test]
fn arithmetic_precedence() {
    let mut vm = run("var r = 1 + 2 * 3;");
    let mut api = Api::new(&mut vm);
    api.get_global("r").expect("r defined");
    assert_eq!(api.get_number(-1), Some(7.0));
}

#[test]
fn recursive_fibonacci() {
    let mut vm = run(
        r#"
        fn fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        var r = fib(10);
        "#,
    );
    let mut api = Api::new(&mut vm);
    api.get_global("r").expect("r defined");
    assert_eq!(api.get_number(-1), Some(55.0));
}

#[test]
fn closures_capture_and_mutate_their_upvalue() {
    let mut vm = run(
        r#"
        fn make_counter() {
            var count = 0;
            fn counter() {
                count = count + 1;
                return count;
            }
            return counter;
        }
        var c = make_counter();
        var a = c();
        var b = c();
        var d = c();
        "#,
    );
    let mut api = Api::new(&mut vm);
    api.get_global("a").unwrap();
    assert_eq!(api.get_number(-1), Some(1.0));
    api.get_global("b").unwrap();
    assert_eq!(api.get_number(-1), Some(2.0));
    api.get_global("d").unwrap();
    assert_eq!(api.get_number(-1), Some(3.0));
}

#[test]
fn single_inheritance_overrides_and_reuses_methods() {
    let mut vm = run(
        r#"
        class A {
            __init__(x) {
                self.x = x;
            }
            get() {
                return self.x;
            }
        }
        class B : A {
            get2() {
                return self.x * 2;
            }
        }
        var b = B(21);
        var r1 = b.get();
        var r2 = b.get2();
        "#,
    );
    let mut api = Api::new(&mut vm);
    api.get_global("r1").unwrap();
    assert_eq!(api.get_number(-1), Some(21.0));
    api.get_global("r2").unwrap();
    assert_eq!(api.get_number(-1), Some(42.0));
}

#[test]
fn string_concat_and_equality() {
    let mut vm = run(
        r#"
        var s = "foo" + "bar";
        var eq = (s == "foobar");
        "#,
    );
    let mut api = Api::new(&mut vm);
    api.get_global("s").unwrap();
    assert_eq!(api.get_string(-1), Some("foobar"));
    api.get_global("eq").unwrap();
    assert_eq!(api.get_bool(-1), Some(true));
}

#[test]
fn garbage_collection_reclaims_unreachable_instances() {
    let mut vm = run(
        r#"
        class Box {
            __init__(v) {
                self.v = v;
            }
        }
        var i = 0;
        while (i < 500) {
            var b = Box(i);
            i = i + 1;
        }
        var before = gccollect();
        var kept = Box(99);
        "#,
    );
    let before_bytes = vm.heap.bytes_allocated;
    vm.interpret("gccollect();").unwrap();
    let after_bytes = vm.heap.bytes_allocated;
    assert!(after_bytes <= before_bytes, "collection should not grow live bytes");

    let mut api = Api::new(&mut vm);
    api.get_global("kept").unwrap();
    assert!(api.is_instance(-1));
}

#[test]
fn string_interning_preserves_identity_across_collections() {
    let mut vm = run(
        r#"
        var a = "shared";
        "#,
    );
    vm.interpret("gccollect();").unwrap();

    let name_key = skooma::value::Value::Object(vm.heap.alloc_string("a".to_string()));
    let idx = match vm.globals.ids.get(&name_key) {
        Some(skooma::value::Value::Number(n)) => n as usize,
        other => panic!("expected a global id, got {other:?}"),
    };
    let stored = vm.globals.values[idx].value;
    let reinterned = skooma::value::Value::Object(vm.heap.alloc_string("shared".to_string()));
    assert_eq!(stored, reinterned, "interning must hand back the same pointer after a collection");
}
