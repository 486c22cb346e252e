//! Call-site engine behaviour: inlining, the call-stack fallback,
//! compile hints and recursion.

mod common;

use common::*;
use ic10c::core::CompileError;
use ic10c::sbil::asm::{BodyAsm, TablesBuilder};
use ic10c::sbil::{BinaryOp, BranchCond, CompileHint, CompileHintKind, TypeRef};

#[test]
fn small_callees_inline_with_constant_arguments() {
    let mut tables = TablesBuilder::new();
    let helper = tables.method_token(program_method("Bump", 1, true));

    // Bump(x) { return x + 1; }
    let mut helper_body = BodyAsm::new();
    helper_body.ldarg(1);
    helper_body.ldc_i4(1);
    helper_body.binary(BinaryOp::Add);
    helper_body.ret();

    // Run() { local = Bump(5); }
    let mut run_body = BodyAsm::new();
    run_body.ldarg(0);
    run_body.ldc_i4(5);
    run_body.call(helper);
    run_body.stloc(0);
    run_body.ret();

    let class = program_class(
        vec![],
        vec![
            method(
                "Run",
                vec![],
                vec![TypeRef::Number],
                TypeRef::Void,
                run_body.finish(),
            ),
            method(
                "Bump",
                vec![TypeRef::Number],
                vec![],
                TypeRef::Number,
                helper_body.finish(),
            ),
        ],
    );
    let text = compile_core(&class, &tables.build());
    // constants propagate into the inlined body and fold
    assert!(text.contains("move r1 6"), "{text}");
    assert!(text.contains("main_inl0_end:"), "{text}");
    assert!(!text.contains("jal"), "{text}");
}

#[test]
fn inlined_callees_compute_into_the_caller_sink() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));
    let double = tables.method_token(program_method("Double", 1, true));

    // Double(x) { return x * 2; }
    let mut helper_body = BodyAsm::new();
    helper_body.ldarg(1);
    helper_body.ldc_i4(2);
    helper_body.binary(BinaryOp::Mul);
    helper_body.ret();

    // Run() { local = Double(sensor.Temperature); }
    let mut run_body = BodyAsm::new();
    run_body.ldarg(0);
    run_body.ldarg(0);
    run_body.ldfld(sensor);
    run_body.callvirt(get_temperature);
    run_body.call(double);
    run_body.stloc(0);
    run_body.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![
            method(
                "Run",
                vec![],
                vec![TypeRef::Number],
                TypeRef::Void,
                run_body.finish(),
            ),
            method(
                "Double",
                vec![TypeRef::Number],
                vec![],
                TypeRef::Number,
                helper_body.finish(),
            ),
        ],
    );
    let text = compile_core(&class, &tables.build());
    // the argument materialises once, the body binds the caller's sink
    assert!(text.contains("l r1 dSensor Temperature"), "{text}");
    assert!(text.contains("mul r2 r1 2"), "{text}");
    assert!(text.contains("move r0 r2"), "{text}");
    assert!(!text.contains("jal"), "{text}");
}

#[test]
fn register_pressure_falls_back_to_the_call_stack() {
    let mut tables = TablesBuilder::new();
    let helper = tables.method_token(program_method("Busy", 0, false));

    // Busy has four locals of its own
    let mut helper_body = BodyAsm::new();
    helper_body.ldc_i4(1);
    helper_body.stloc(0);
    helper_body.ret();

    let mut run_body = BodyAsm::new();
    run_body.ldarg(0);
    run_body.call(helper);
    run_body.ret();

    let class = program_class(
        vec![],
        vec![
            method(
                "Run",
                vec![],
                vec![TypeRef::Number; 14],
                TypeRef::Void,
                run_body.finish(),
            ),
            method(
                "Busy",
                vec![],
                vec![TypeRef::Number; 4],
                TypeRef::Void,
                helper_body.finish(),
            ),
        ],
    );
    let text = compile_core(&class, &tables.build());
    // 14 live registers + 4 callee locals cannot inline
    assert!(
        text.contains(
            "push r0\npush r1\npush r2\npush r3\npush ra\njal Busy\npop ra\npop r3\npop r2\npop r1\npop r0"
        ),
        "{text}"
    );
    assert!(text.contains("Busy:"), "{text}");
    assert!(text.contains("move r0 1"), "{text}");
}

#[test]
fn recursive_methods_use_the_call_stack() {
    let mut tables = TablesBuilder::new();
    let fact = tables.method_token(program_method("Fact", 1, true));

    // Fact(n) { if (n > 1) return n * Fact(n - 1); return 1; }
    let mut fact_body = BodyAsm::new();
    let recurse = fact_body.new_label();
    fact_body.ldarg(1);
    fact_body.ldc_i4(1);
    fact_body.branch(BranchCond::Gt, false, recurse);
    fact_body.ldc_i4(1);
    fact_body.ret();
    fact_body.bind(recurse);
    fact_body.ldarg(1);
    fact_body.ldarg(0);
    fact_body.ldarg(1);
    fact_body.ldc_i4(1);
    fact_body.binary(BinaryOp::Sub);
    fact_body.call(fact);
    fact_body.binary(BinaryOp::Mul);
    fact_body.ret();

    let mut run_body = BodyAsm::new();
    run_body.ldarg(0);
    run_body.ldc_i4(5);
    run_body.call(fact);
    run_body.stloc(0);
    run_body.ret();

    let class = program_class(
        vec![],
        vec![
            method(
                "Run",
                vec![],
                vec![TypeRef::Number],
                TypeRef::Void,
                run_body.finish(),
            ),
            method(
                "Fact",
                vec![TypeRef::Number],
                vec![],
                TypeRef::Number,
                fact_body.finish(),
            ),
        ],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("Fact:"), "{text}");
    assert!(text.contains("jal Fact"), "{text}");
    assert!(text.contains("push ra"), "{text}");
    assert!(text.contains("pop ra"), "{text}");
}

#[test]
fn inline_compile_hints_substitute_at_the_call_site() {
    let mut tables = TablesBuilder::new();
    let beep = tables.method_token(program_method("Beep", 1, false));

    let mut run_body = BodyAsm::new();
    run_body.ldarg(0);
    run_body.ldc_i4(440);
    run_body.call(beep);
    run_body.ret();

    let class = program_class(
        vec![],
        vec![
            method("Run", vec![], vec![], TypeRef::Void, run_body.finish()),
            hinted_method(
                "Beep",
                vec![TypeRef::Number],
                TypeRef::Void,
                CompileHint {
                    pattern: "s db Setting #0".to_string(),
                    kind: CompileHintKind::Inline,
                },
            ),
        ],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("s db Setting 440"), "{text}");
    assert!(!text.contains("jal"), "{text}");
    assert!(!text.contains("Beep:"), "{text}");
}

#[test]
fn oversized_temp_slot_in_a_hint_fails_the_compile() {
    let mut tables = TablesBuilder::new();
    let beep = tables.method_token(program_method("Beep", 1, false));

    let mut run_body = BodyAsm::new();
    run_body.ldarg(0);
    run_body.ldc_i4(440);
    run_body.call(beep);
    run_body.ret();

    let class = program_class(
        vec![],
        vec![
            method("Run", vec![], vec![], TypeRef::Void, run_body.finish()),
            hinted_method(
                "Beep",
                vec![TypeRef::Number],
                TypeRef::Void,
                CompileHint {
                    // the temp slot number does not fit u32
                    pattern: "s db Setting %99999999999".to_string(),
                    kind: CompileHintKind::Inline,
                },
            ),
        ],
    );
    let error = compile_err(&class, &tables.build());
    assert!(
        matches!(error, CompileError::InternalInvariant(_)),
        "{error}"
    );
}

#[test]
fn too_many_locals_exhaust_the_register_file() {
    let tables = TablesBuilder::new();
    let mut body = BodyAsm::new();
    body.ret();

    let class = program_class(
        vec![],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number; 17],
            TypeRef::Void,
            body.finish(),
        )],
    );
    let error = compile_err(&class, &tables.build());
    assert!(matches!(error, CompileError::RegisterExhausted { .. }), "{error}");
}
