//! End-to-end lowering scenarios: SBIL bodies in, IC10 text out.
//!
//! These compile without the optimiser so the assertions see the core
//! emission.

mod common;

use common::*;
use ic10c::sbil::asm::{BodyAsm, TablesBuilder};
use ic10c::sbil::{BinaryOp, BranchCond, CompareOp, TypeRef};

#[test]
fn device_read_modify_write_loop() {
    let mut tables = TablesBuilder::new();
    let panel = tables.field_token("panel");
    let sensor = tables.field_token("sensor");
    let get_horizontal = tables.method_token(getter("StructureDaylightSensor", "Horizontal"));
    let set_horizontal = tables.method_token(setter("StructureSolarPanel", "Horizontal"));
    let yield_fn = tables.method_token(runtime("Yield", 0, false));

    let mut asm = BodyAsm::new();
    let top = asm.here();
    asm.ldarg(0);
    asm.ldfld(panel);
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_horizontal);
    asm.ldc_i4(180);
    asm.binary(BinaryOp::Add);
    asm.callvirt(set_horizontal);
    asm.call(yield_fn);
    asm.branch(BranchCond::Always, false, top);

    let class = program_class(
        vec![
            device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0),
            device_field("panel", "dPanel", 1, "StructureSolarPanel", 0),
        ],
        vec![method("Run", vec![], vec![], TypeRef::Void, asm.finish())],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("alias dSensor d0\nalias dPanel d1"), "{text}");
    assert!(
        text.contains(
            "main_il_0:\nl r0 dSensor Horizontal\nadd r0 r0 180\ns dPanel Horizontal r0\nyield\nj main_il_0"
        ),
        "{text}"
    );
}

#[test]
fn multicast_set_broadcasts_by_type_hash() {
    let mut tables = TablesBuilder::new();
    let heaters = tables.field_token("Heaters");
    let set_on = tables.method_token(setter("StructureWallHeater", "On"));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(heaters);
    asm.ldc_i4(1);
    asm.callvirt(set_on);
    asm.ret();

    let class = program_class(
        vec![multicast_field("Heaters", "StructureWallHeater")],
        vec![method("Run", vec![], vec![], TypeRef::Void, asm.finish())],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("sb HASH(\"StructureWallHeater\") On 1"), "{text}");
    // multicast fields have no alias
    assert!(!text.contains("alias"), "{text}");
}

#[test]
fn multicast_aggregation_read() {
    let mut tables = TablesBuilder::new();
    let display = tables.field_token("display");
    let batteries = tables.field_token("batteries");
    let get_charge = tables.method_token(device_method("StructureBattery", "GetCharge", 1, true));
    let set_setting = tables.method_token(setter("StructureConsole", "Setting"));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(display);
    asm.ldarg(0);
    asm.ldfld(batteries);
    asm.ldc_i4(1); // Sum
    asm.callvirt(get_charge);
    asm.callvirt(set_setting);
    asm.ret();

    let class = program_class(
        vec![
            device_field("display", "dDisplay", 0, "StructureConsole", 0),
            multicast_field("batteries", "StructureBattery"),
        ],
        vec![method("Run", vec![], vec![], TypeRef::Void, asm.finish())],
    );
    let text = compile_core(&class, &tables.build());
    assert!(
        text.contains("lb r0 HASH(\"StructureBattery\") dBatteries Charge 1"),
        "{text}"
    );
    assert!(text.contains("s dDisplay Setting r0"), "{text}");
}

#[test]
fn slot_read_lowers_to_ls() {
    let mut tables = TablesBuilder::new();
    let gen = tables.field_token("gen");
    let generator = "StructureSolidFuelGenerator";
    let get_slots = tables.method_token(device_method(generator, "get_Slots", 0, true));
    let get_item = tables.method_token(device_method(generator, "get_Item", 1, true));
    let get_quantity = tables.method_token(getter(generator, "Quantity"));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(gen);
    asm.callvirt(get_slots);
    asm.ldc_i4(0);
    asm.callvirt(get_item);
    asm.callvirt(get_quantity);
    asm.stloc(0);
    asm.ret();

    let class = program_class(
        vec![device_field("gen", "dGen", 0, generator, 2)],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("ls r0 dGen 0 Quantity"), "{text}");
}

#[test]
fn slot_table_length_is_static() {
    let mut tables = TablesBuilder::new();
    let gen = tables.field_token("gen");
    let generator = "StructureSolidFuelGenerator";
    let get_slots = tables.method_token(device_method(generator, "get_Slots", 0, true));
    let get_length = tables.method_token(device_method(generator, "get_Length", 0, true));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(gen);
    asm.callvirt(get_slots);
    asm.callvirt(get_length);
    asm.stloc(0);
    asm.ret();

    let class = program_class(
        vec![device_field("gen", "dGen", 0, generator, 2)],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    // no device I/O: the slot count is a compile-time constant
    assert!(text.contains("move r0 2"), "{text}");
    assert!(!text.contains("ls "), "{text}");
}

#[test]
fn static_multiplication_folds() {
    let tables = TablesBuilder::new();
    let mut asm = BodyAsm::new();
    asm.ldc_r4(31.0);
    asm.ldc_r4(0.95);
    asm.binary(BinaryOp::Mul);
    asm.stloc(0);
    asm.ret();

    let class = program_class(
        vec![],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("move r0 29.45"), "{text}");
    assert!(!text.contains("mul"), "{text}");
}

#[test]
fn conditional_branch_compares_in_place() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));

    let mut asm = BodyAsm::new();
    // t = sensor.Temperature
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_temperature);
    asm.stloc(0);
    // if (t < 29.45) state = 2;
    let then_branch = asm.new_label();
    let skip = asm.new_label();
    asm.ldloc(0);
    asm.ldc_r4(29.45);
    asm.branch(BranchCond::Lt, false, then_branch);
    asm.branch(BranchCond::Always, false, skip);
    asm.bind(then_branch);
    asm.ldc_i4(2);
    asm.stloc(1);
    asm.bind(skip);
    asm.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number, TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("l r0 dSensor Temperature"), "{text}");
    assert!(text.contains("blt r0 29.45 main_il_8"), "{text}");
    assert!(text.contains("move r1 2"), "{text}");
    // no intermediate comparison register
    assert!(!text.contains("slt"), "{text}");
}

#[test]
fn comparison_fuses_into_branch() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_temperature);
    asm.stloc(0);
    let top = asm.here();
    asm.ldloc(0);
    asm.ldc_i4(20);
    asm.compare(CompareOp::Lt);
    asm.branch(BranchCond::True, false, top);
    asm.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("blt r0 20 main_il_4"), "{text}");
    assert!(!text.contains("slt"), "{text}");
}

#[test]
fn negated_comparison_on_brfalse() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_temperature);
    asm.stloc(0);
    let top = asm.here();
    asm.ldloc(0);
    asm.ldc_i4(20);
    asm.compare(CompareOp::Lt);
    asm.branch(BranchCond::False, false, top);
    asm.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("bge r0 20 main_il_4"), "{text}");
}

#[test]
fn device_null_check_becomes_presence_test() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");

    let mut asm = BodyAsm::new();
    let top = asm.here();
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.ldnull();
    asm.compare(CompareOp::GtUn);
    asm.branch(BranchCond::True, false, top);
    asm.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![method("Run", vec![], vec![], TypeRef::Void, asm.finish())],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("bdse dSensor main_il_0"), "{text}");
}

#[test]
fn plain_device_truthiness_uses_bdse() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");

    let mut asm = BodyAsm::new();
    let top = asm.here();
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.branch(BranchCond::False, false, top);
    asm.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![method("Run", vec![], vec![], TypeRef::Void, asm.finish())],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("bdns dSensor main_il_0"), "{text}");
}

#[test]
fn switch_emits_one_test_per_case() {
    let tables = TablesBuilder::new();
    let mut asm = BodyAsm::new();
    asm.ldarg(1);
    let case_a = asm.new_label();
    let case_b = asm.new_label();
    asm.switch(&[case_a, case_b]);
    asm.ret();
    asm.bind(case_a);
    asm.ldc_i4(1);
    asm.stloc(0);
    asm.ret();
    asm.bind(case_b);
    asm.ldc_i4(2);
    asm.stloc(0);
    asm.ret();

    let class = program_class(
        vec![],
        vec![method(
            "Run",
            vec![TypeRef::Number],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    // the parameter takes r0, the local r1
    assert!(text.contains("pop r0"), "{text}");
    assert!(text.contains("beq r0 0 main_il_3"), "{text}");
    assert!(text.contains("beq r0 1 main_il_6"), "{text}");
}

#[test]
fn math_intrinsics_substitute_patterns() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));
    let abs = tables.method_token(math("Abs", 1));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_temperature);
    asm.call(abs);
    asm.stloc(0);
    asm.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(
        text.contains("l r1 dSensor Temperature\nabs r0 r1"),
        "{text}"
    );
}

#[test]
fn clamp_uses_a_scratch_register() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));
    let clamp = tables.method_token(math("Clamp", 3));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_temperature);
    asm.ldc_i4(0);
    asm.ldc_i4(100);
    asm.call(clamp);
    asm.stloc(0);
    asm.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("max r1 0 r2\nmin r0 100 r1"), "{text}");
}

#[test]
fn hash_of_string_literal_stays_symbolic() {
    let mut tables = TablesBuilder::new();
    let literal = tables.string_token("StructureWallHeater");
    let hash = tables.method_token(runtime("Hash", 1, true));

    let mut asm = BodyAsm::new();
    asm.ldstr(literal);
    asm.call(hash);
    asm.stloc(0);
    asm.ret();

    let class = program_class(
        vec![],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(
        text.contains("move r0 HASH(\"StructureWallHeater\")"),
        "{text}"
    );
}

#[test]
fn field_assignment_moves_through_alias() {
    let mut tables = TablesBuilder::new();
    let setpoint = tables.field_token("setpoint");
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));

    let mut asm = BodyAsm::new();
    // this.setpoint = sensor.Temperature
    asm.ldarg(0);
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_temperature);
    asm.stfld(setpoint);
    asm.ret();

    let class = program_class(
        vec![
            plain_field("setpoint"),
            device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0),
        ],
        vec![method("Run", vec![], vec![], TypeRef::Void, asm.finish())],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("alias setpoint r0"), "{text}");
    // the deferred read fuses straight into the field register
    assert!(text.contains("l setpoint dSensor Temperature"), "{text}");
}

#[test]
fn timing_intrinsics_lower_directly() {
    let mut tables = TablesBuilder::new();
    let sleep = tables.method_token(runtime("Sleep", 1, false));
    let hcf = tables.method_token(runtime("Hcf", 0, false));

    let mut asm = BodyAsm::new();
    asm.ldc_i4(5);
    asm.call(sleep);
    asm.call(hcf);
    asm.ret();

    let class = program_class(
        vec![],
        vec![method("Run", vec![], vec![], TypeRef::Void, asm.finish())],
    );
    let text = compile_core(&class, &tables.build());
    assert!(text.contains("sleep 5"), "{text}");
    assert!(text.contains("hcf"), "{text}");
}

#[test]
fn integer_conversion_truncates() {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_temperature);
    asm.conv_i();
    asm.stloc(0);
    asm.ret();

    let class = program_class(
        vec![device_field("sensor", "dSensor", 0, "StructureDaylightSensor", 0)],
        vec![method(
            "Run",
            vec![],
            vec![TypeRef::Number],
            TypeRef::Void,
            asm.finish(),
        )],
    );
    let text = compile_core(&class, &tables.build());
    assert!(
        text.contains("l r1 dSensor Temperature\ntrunc r0 r1"),
        "{text}"
    );
}
