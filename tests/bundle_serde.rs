//! The front-end hand-off format round-trips through JSON, and
//! compilation is deterministic for a given bundle.

mod common;

use common::*;
use ic10c::sbil::asm::{BodyAsm, TablesBuilder};
use ic10c::sbil::{ProgramBundle, TypeRef};

fn sample_bundle() -> ProgramBundle {
    let mut tables = TablesBuilder::new();
    let sensor = tables.field_token("sensor");
    let get_temperature = tables.method_token(getter("StructureDaylightSensor", "Temperature"));

    let mut asm = BodyAsm::new();
    asm.ldarg(0);
    asm.ldfld(sensor);
    asm.callvirt(get_temperature);
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
    ProgramBundle {
        classes: vec![class],
        metadata: tables.build(),
    }
}

#[test]
fn bundles_round_trip_through_json() {
    let bundle = sample_bundle();
    let json = serde_json::to_string_pretty(&bundle).unwrap();
    let parsed: ProgramBundle = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, bundle);
}

#[test]
fn compilation_is_deterministic() {
    let bundle = sample_bundle();
    let first = compile_with(&bundle.classes[0], &bundle.metadata, true).unwrap();
    let second = compile_with(&bundle.classes[0], &bundle.metadata, true).unwrap();
    assert_eq!(first, second);
}
