//! JSON control-flow dump, diffable against external disassemblers.

use serde::Serialize;

use relift_ir::{BlockId, FunctionId, Module};

use crate::index::AddressIndex;

#[derive(Serialize, Debug)]
pub struct CfgBlockDump {
    pub address: String,
    pub address_end: String,
    pub succs: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct CfgFunctionDump {
    pub address: String,
    pub address_end: String,
    pub bbs: Vec<CfgBlockDump>,
    pub code_refs: Vec<String>,
}

/// Build the control-flow dump: one entry per address-tagged function, each
/// with its address-tagged blocks and their successor start addresses.
pub fn control_flow_dump(module: &Module, index: &AddressIndex) -> Vec<CfgFunctionDump> {
    let mut functions = Vec::new();
    for f in module.functions() {
        let start = index.function_address(f);
        let end = index.function_end(module, f);
        // Synthetic functions without addresses are not part of the dump.
        if start.is_undefined() || end.is_undefined() {
            continue;
        }

        let mut bbs = Vec::new();
        for &bb in module.function(f).blocks() {
            let bb_start = index.block_address(bb);
            let bb_end = index.block_end(module, bb);
            if bb_start.is_undefined() || bb_end.is_undefined() {
                continue;
            }

            let mut succs = Vec::new();
            for succ in module.block_successors(bb) {
                if let Some(addr) = block_address_or_prior(module, index, f, succ) {
                    succs.push(addr);
                }
            }

            bbs.push(CfgBlockDump {
                address: bb_start.to_hex_prefixed(),
                address_end: bb_end.to_hex_prefixed(),
                succs,
            });
        }

        functions.push(CfgFunctionDump {
            address: start.to_hex_prefixed(),
            address_end: end.to_hex_prefixed(),
            bbs,
            code_refs: Vec::new(),
        });
    }
    functions
}

/// Serialize the control-flow dump as pretty JSON.
pub fn control_flow_json(module: &Module, index: &AddressIndex) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&control_flow_dump(module, index))
}

/// Address of `block`, walking to the nearest prior block in `function`
/// when the block itself has none.
fn block_address_or_prior(
    module: &Module,
    index: &AddressIndex,
    function: FunctionId,
    block: BlockId,
) -> Option<String> {
    let blocks = module.function(function).blocks();
    let mut pos = blocks.iter().position(|&b| b == block)?;
    loop {
        let addr = index.block_address(blocks[pos]);
        if addr.is_defined() {
            return Some(addr.to_hex_prefixed());
        }
        if pos == 0 {
            return None;
        }
        pos -= 1;
    }
}
