//! Decoder invariants, determinism, and boundary behavior.

mod common;

use common::{decode, image_with};
use relift::testing::x86_config;
use relift::{control_flow_json, Address, InstKind, TargetSlot};

fn addr(a: u64) -> Address {
    Address::new(a)
}

#[test]
fn test_indices_are_mutual_inverses_after_decode() {
    let image = image_with(
        vec![
            (0x1000, vec![0xe8, 0xfb, 0x0f, 0x00, 0x00, 0xc3]),
            (0x2000, vec![0xc3]),
        ],
        0x1000,
    );
    let config = x86_config();
    let res = decode(&image, &config);
    assert!(res.index.verify());
}

#[test]
fn test_decode_twice_is_isomorphic() {
    let mut bytes = vec![0x0f, 0x84, 0x0a, 0x00, 0x00, 0x00];
    bytes.extend(std::iter::repeat(0x90).take(10));
    bytes.push(0xc3);
    let image = image_with(vec![(0x1000, bytes)], 0x1000);
    let config = x86_config();

    let a = decode(&image, &config);
    let b = decode(&image, &config);

    let json_a = control_flow_json(&a.module, &a.index).unwrap();
    let json_b = control_flow_json(&b.module, &b.index).unwrap();
    assert_eq!(json_a, json_b);
}

/// An entry point at the very end of an allowed range lifts exactly one
/// instruction and terminates cleanly.
#[test]
fn test_entry_at_end_of_range() {
    let image = image_with(vec![(0x1000, vec![0xc3])], 0x1000);
    let config = x86_config();
    let res = decode(&image, &config);

    assert_eq!(res.module.functions().count(), 1);
    assert_eq!(res.insns.len(), 1);
    let bb = res.index.block_at(addr(0x1000)).unwrap();
    let last = res.module.block(bb).last_inst().unwrap();
    assert!(res.module.inst(last).kind.is_return());
}

/// A conditional branch whose false target falls off the section keeps an
/// unresolved false edge; the true edge is still honored.
#[test]
fn test_false_target_outside_allowed_left_unresolved() {
    // jz 0x1000 at 0x1000 (6 bytes, the whole section): false target 0x1006
    // does not exist.
    let image = image_with(vec![(0x1000, vec![0x0f, 0x84, 0xfa, 0xff, 0xff, 0xff])], 0x1000);
    let config = x86_config();
    let res = decode(&image, &config);

    let entry_bb = res.index.block_at(addr(0x1000)).unwrap();
    let cond = res.module.block(entry_bb).last_inst().unwrap();
    match res.module.inst(cond).kind {
        InstKind::CondBr { taken, fall, .. } => {
            assert_eq!(taken, TargetSlot::Block(entry_bb));
            assert_eq!(fall, TargetSlot::Unresolved);
        }
        ref other => panic!("expected condbr, got {other:?}"),
    }
    assert_eq!(res.unresolved, vec![cond]);
}

/// A lifter failure closes the block and decoding continues with other
/// jump targets.
#[test]
fn test_lift_failure_is_nonfatal() {
    // 0xf4 (hlt) is not part of the subset; 0x2000 still decodes.
    let image = image_with(vec![(0x1000, vec![0xf4]), (0x2000, vec![0xc3])], 0x1000);
    let mut config = x86_config();
    config.function_starts.push(addr(0x2000));
    let res = decode(&image, &config);

    assert_eq!(res.module.functions().count(), 2);
    let f2 = res.index.function_at(addr(0x2000)).expect("second seed decoded");
    let bb = res.index.block_at(addr(0x2000)).unwrap();
    let last = res.module.block(bb).last_inst().unwrap();
    assert!(res.module.inst(last).kind.is_return());
    assert_eq!(res.index.function_address(f2), addr(0x2000));

    // The failed seed left an empty block behind.
    let bb1 = res.index.block_at(addr(0x1000)).unwrap();
    assert!(res.module.block(bb1).is_empty());
}

/// The JSON dump lists functions and blocks with prefixed hex addresses
/// and successor start addresses.
#[test]
fn test_control_flow_json_shape() {
    let mut bytes = vec![0x0f, 0x84, 0x0a, 0x00, 0x00, 0x00];
    bytes.extend(std::iter::repeat(0x90).take(10));
    bytes.push(0xc3);
    let image = image_with(vec![(0x1000, bytes)], 0x1000);
    let config = x86_config();
    let res = decode(&image, &config);

    let dump = relift::control_flow_dump(&res.module, &res.index);
    assert_eq!(dump.len(), 1);
    assert_eq!(dump[0].address, "0x1000");
    assert_eq!(dump[0].address_end, "0x1010");
    assert!(dump[0].code_refs.is_empty());

    let bbs = &dump[0].bbs;
    assert_eq!(bbs.len(), 3);
    assert_eq!(bbs[0].address, "0x1000");
    // The conditional's successors: taken target first, then fall-through.
    assert_eq!(bbs[0].succs, vec!["0x1010".to_string(), "0x1006".to_string()]);
    // The nop sled flows into the split-off return block.
    assert_eq!(bbs[1].address, "0x1006");
    assert_eq!(bbs[1].succs, vec!["0x1010".to_string()]);
    assert!(bbs[2].succs.is_empty());

    let json = control_flow_json(&res.module, &res.index).unwrap();
    assert!(json.contains("\"address\": \"0x1000\""));
}
