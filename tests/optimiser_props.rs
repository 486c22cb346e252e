//! Optimiser and flow-analysis properties over whole programs.

mod common;

use common::*;
use ic10c::flow::FlowAnalysis;
use ic10c::isa::Program;
use ic10c::opt;
use ic10c::sbil::asm::{BodyAsm, TablesBuilder};
use ic10c::sbil::{BinaryOp, BranchCond, TypeRef};

fn solar_tracker() -> (ic10c::sbil::ClassDef, ic10c::sbil::MetadataTables) {
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
    (class, tables.build())
}

#[test]
fn optimised_loop_collapses_driver_scaffolding() {
    let (class, meta) = solar_tracker();
    let text = compile_with(&class, &meta, true).unwrap();
    // main never returns, so the jal becomes a jump, `j end` dies, and
    // the function label chain collapses onto the loop head
    assert_eq!(
        text,
        "alias dSensor d0\nalias dPanel d1\nmain_il_0:\nl r0 dSensor Horizontal\nadd r0 r0 180\ns dPanel Horizontal r0\nyield\nj main_il_0\n"
    );
}

#[test]
fn optimiser_is_idempotent_on_compiled_programs() {
    init_logging();
    let (class, meta) = solar_tracker();
    let once = compile_with(&class, &meta, true).unwrap();
    let twice = opt::optimise_text(&once, None).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn optimiser_preserves_unoptimised_semantics_shape() {
    // the unoptimised text must parse and re-optimise to the same
    // result the driver produced in one go
    let (class, meta) = solar_tracker();
    let raw = compile_with(&class, &meta, false).unwrap();
    let optimised = compile_with(&class, &meta, true).unwrap();
    assert_eq!(opt::optimise_text(&raw, None).unwrap(), optimised);
}

#[test]
fn flow_soundness_blocks_partition_reachable_code() {
    let samples = [
        "move r0 0\nloop:\nadd r0 r0 1\nblt r0 10 loop\nyield\nj loop\n",
        "jal fn\nj end\nfn:\npush 1\nj ra\nend:\n",
        "beqz r0 a\nmove r1 1\na:\nb:\nyield\nj a\n",
    ];
    for sample in samples {
        let program = Program::parse(sample).unwrap();
        let flow = FlowAnalysis::build(&program).unwrap();

        // every instruction appears in exactly one block
        let total: usize = flow.blocks.iter().map(|b| b.end - b.start).sum();
        assert_eq!(total, program.len(), "{sample}");
        for pc in 0..program.len() {
            let block = &flow.blocks[flow.block_of(pc)];
            assert!(block.start <= pc && pc < block.end, "{sample}");
        }

        // follow edges and enter edges are duals
        for (index, block) in flow.blocks.iter().enumerate() {
            for follow in &block.follow_states {
                let target = &flow.blocks[follow.block];
                assert!(
                    target.enter_states.iter().any(|e| e.block == index),
                    "block {index} follows {} but is not among its enters ({sample})",
                    follow.block
                );
            }
        }

        // a natural follow sees exactly the state the block exits with
        for (index, block) in flow.blocks.iter().enumerate() {
            for follow in &block.follow_states {
                if !follow.natural {
                    continue;
                }
                let target = &flow.blocks[follow.block];
                let enter = target
                    .enter_states
                    .iter()
                    .find(|e| e.block == index && e.natural)
                    .expect("matching natural enter");
                assert_eq!(enter.state, block.exit_state, "{sample}");
            }
        }
    }
}

#[test]
fn optimised_programs_still_parse_and_analyse() {
    let (class, meta) = solar_tracker();
    let text = compile_with(&class, &meta, true).unwrap();
    let program = Program::parse(&text).unwrap();
    let flow = FlowAnalysis::build(&program).unwrap();
    // everything the optimiser kept is reachable
    for pc in 0..program.len() {
        assert!(flow.is_reachable(pc), "unreachable survivor at {pc}: {text}");
    }
}
