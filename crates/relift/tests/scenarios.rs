//! End-to-end decode scenarios over the x86 subset lifter.

mod common;

use common::{decode, image_with};
use relift::testing::x86_config;
use relift::{
    Address, CalleeSlot, InstKind, Pipeline, StackAnalysis, TargetSlot, Value,
};

fn addr(a: u64) -> Address {
    Address::new(a)
}

/// push ebp; mov ebp, esp; pop ebp; ret - one function, one block.
#[test]
fn test_linear_function() {
    let image = image_with(vec![(0x1000, vec![0x55, 0x89, 0xe5, 0x5d, 0xc3])], 0x1000);
    let config = x86_config();
    let res = decode(&image, &config);

    assert_eq!(res.module.functions().count(), 1);
    let f = res.index.function_at(addr(0x1000)).expect("function at entry");
    assert_eq!(res.module.function(f).blocks().len(), 1);
    assert_eq!(res.module.function(f).name, "function_00001000");

    // Four machine instructions lifted, ending in the return.
    assert_eq!(res.insns.len(), 4);
    assert_eq!(res.index.function_end(&res.module, f), addr(0x1004));
    let bb = res.index.block_at(addr(0x1000)).unwrap();
    let last = res.module.block(bb).last_inst().unwrap();
    assert!(res.module.inst(last).kind.is_return());
    assert!(res.unresolved.is_empty());
}

/// jz over a nop sled: entry, fall-through, and taken-target blocks, with
/// both conditional edges resolved.
#[test]
fn test_forward_conditional() {
    let mut bytes = vec![0x0f, 0x84, 0x0a, 0x00, 0x00, 0x00]; // jz 0x1010
    bytes.extend(std::iter::repeat(0x90).take(10)); // 0x1006..=0x100f
    bytes.push(0xc3); // ret at 0x1010
    let image = image_with(vec![(0x1000, bytes)], 0x1000);
    let config = x86_config();
    let res = decode(&image, &config);

    assert_eq!(res.module.functions().count(), 1);
    let f = res.index.function_at(addr(0x1000)).unwrap();
    assert_eq!(res.module.function(f).blocks().len(), 3);

    let entry_bb = res.index.block_at(addr(0x1000)).expect("entry block");
    let fall_bb = res.index.block_at(addr(0x1006)).expect("fall-through block");
    let taken_bb = res.index.block_at(addr(0x1010)).expect("taken block");

    let cond = res.module.block(entry_bb).last_inst().unwrap();
    match res.module.inst(cond).kind {
        InstKind::CondBr { taken, fall, .. } => {
            assert_eq!(taken, TargetSlot::Block(taken_bb));
            assert_eq!(fall, TargetSlot::Block(fall_bb));
        }
        ref other => panic!("expected condbr, got {other:?}"),
    }

    // The nop sled falls through into the split-off return block.
    assert_eq!(res.module.block_successors(fall_bb), vec![taken_bb]);
    let ret = res.module.block(taken_bb).last_inst().unwrap();
    assert!(res.module.inst(ret).kind.is_return());
    assert!(res.unresolved.is_empty());
}

/// call 0x2000; ret - two functions, pseudo-call resolved, call-after
/// decoded into the same block as the call.
#[test]
fn test_inter_function_call() {
    let image = image_with(
        vec![
            (0x1000, vec![0xe8, 0xfb, 0x0f, 0x00, 0x00, 0xc3]),
            (0x2000, vec![0xc3]),
        ],
        0x1000,
    );
    let config = x86_config();
    let res = decode(&image, &config);

    assert_eq!(res.module.functions().count(), 2);
    let f1 = res.index.function_at(addr(0x1000)).unwrap();
    let f2 = res.index.function_at(addr(0x2000)).unwrap();
    assert_eq!(res.module.function(f2).name, "function_00002000");

    // The call resolved to the callee, and the fall-through return landed
    // in the same block.
    let bb = res.index.block_at(addr(0x1000)).unwrap();
    let insts = res.module.block(bb).insts();
    let call = insts
        .iter()
        .find(|&&i| res.module.inst(i).kind.is_call())
        .expect("call instruction");
    match res.module.inst(*call).kind {
        InstKind::Call { callee, .. } => assert_eq!(callee, CalleeSlot::Function(f2)),
        ref other => panic!("expected call, got {other:?}"),
    }
    let last = res.module.block(bb).last_inst().unwrap();
    assert!(res.module.inst(last).kind.is_return());
    assert_eq!(res.index.function_address(f1), addr(0x1000));
}

/// A later branch into the middle of an already-decoded block splits it at
/// the instruction boundary.
#[test]
fn test_branch_into_mid_block() {
    // 0x1000: nop; 0x1001: mov eax, 1; 0x1006: jz 0x1001; 0x1008: ret
    let bytes = vec![
        0x90, // nop
        0xb8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
        0x74, 0xf9, // jz -7 -> 0x1001
        0xc3, // ret
    ];
    let image = image_with(vec![(0x1000, bytes)], 0x1000);
    let config = x86_config();
    let res = decode(&image, &config);

    assert_eq!(res.module.functions().count(), 1);
    let head_bb = res.index.block_at(addr(0x1000)).expect("entry block");
    let split_bb = res.index.block_at(addr(0x1001)).expect("split block");
    let fall_bb = res.index.block_at(addr(0x1008)).expect("fall-through block");
    assert_ne!(head_bb, split_bb);

    // The old block was retargeted into the split-off tail.
    assert_eq!(res.module.block_successors(head_bb), vec![split_bb]);

    // The branch (now inside the split block) loops back to it.
    let cond = res.module.block(split_bb).last_inst().unwrap();
    match res.module.inst(cond).kind {
        InstKind::CondBr { taken, fall, .. } => {
            assert_eq!(taken, TargetSlot::Block(split_bb));
            assert_eq!(fall, TargetSlot::Block(fall_bb));
        }
        ref other => panic!("expected condbr, got {other:?}"),
    }
}

/// A call into the middle of a decoded function carves out a new function
/// at the instruction boundary.
#[test]
fn test_call_target_splits_function() {
    // 0x1000: mov eax, 1; 0x1005..0x100f: nops; 0x1010: mov ecx, 2;
    // 0x1015: ret. Caller at 0x2000 calls 0x1010.
    let mut f1 = vec![0xb8, 0x01, 0x00, 0x00, 0x00];
    f1.extend(std::iter::repeat(0x90).take(11));
    f1.extend([0xb9, 0x02, 0x00, 0x00, 0x00]);
    f1.push(0xc3);
    let caller = vec![0xe8, 0x0b, 0xf0, 0xff, 0xff, 0xc3]; // call 0x1010; ret

    let image = image_with(vec![(0x1000, f1), (0x2000, caller)], 0x1000);
    let mut config = x86_config();
    config.function_starts.push(addr(0x2000));
    let res = decode(&image, &config);

    assert_eq!(res.module.functions().count(), 3);
    let split = res
        .index
        .function_at(addr(0x1010))
        .expect("function carved out at 0x1010");
    assert_eq!(res.module.function(split).name, "function_00001010");

    // The original function now ends before the split point.
    let f1 = res.index.function_at(addr(0x1000)).unwrap();
    assert_eq!(res.index.function_end(&res.module, f1), addr(0x100f));

    // The caller's pseudo-call resolved to the new function.
    let caller_bb = res.index.block_at(addr(0x2000)).unwrap();
    let call = res
        .module
        .block(caller_bb)
        .insts()
        .iter()
        .copied()
        .find(|&i| res.module.inst(i).kind.is_call())
        .unwrap();
    match res.module.inst(call).kind {
        InstKind::Call { callee, .. } => assert_eq!(callee, CalleeSlot::Function(split)),
        ref other => panic!("expected call, got {other:?}"),
    }
}

/// A store and a load at the same esp offset rewrite to the same named
/// stack slot.
#[test]
fn test_stack_rewrite() {
    // mov [esp+12], 7; mov eax, [esp+12]; ret
    let bytes = vec![
        0xc7, 0x44, 0x24, 0x0c, 0x07, 0x00, 0x00, 0x00,
        0x8b, 0x44, 0x24, 0x0c,
        0xc3,
    ];
    let image = image_with(vec![(0x1000, bytes)], 0x1000);
    let config = x86_config();

    let mut lifter = relift::testing::X86SubsetLifter::new();
    let mut pipeline = Pipeline::new(&image, &config);
    pipeline.decode(&mut lifter).unwrap();
    assert!(pipeline.reconstruct_stack().unwrap());

    let mut res = pipeline.into_result().unwrap();
    let f = res.index.function_at(addr(0x1000)).unwrap();
    let bb = res.index.block_at(addr(0x1000)).unwrap();

    let mut store_slot = None;
    let mut load_slot = None;
    for &i in res.module.block(bb).insts() {
        match res.module.inst(i).kind {
            InstKind::Store {
                addr: Value::Slot(s),
                value: Value::Int(7),
                ..
            } => store_slot = Some(s),
            InstKind::Load {
                addr: Value::Slot(s),
                ..
            } => load_slot = Some(s),
            _ => {}
        }
    }
    let store_slot = store_slot.expect("store rewritten to a slot");
    let load_slot = load_slot.expect("load rewritten to a slot");
    assert_eq!(store_slot, load_slot);
    assert_eq!(res.module.slot(store_slot).name, "local_0xc");
    assert_eq!(res.module.slot(store_slot).offset, 12);
    assert_eq!(res.module.slot(store_slot).function, f);

    // The reconstructed slot shows up in the IR dump.
    let text = res.module.to_string();
    assert!(text.contains("local_0xc"));
    // Running the pass again changes nothing.
    assert!(!StackAnalysis::run_on_module(
        &mut res.module,
        &config,
        None,
        &res.index,
    ));
}
