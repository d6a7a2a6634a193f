//! Reaching definitions for register reads.

use std::collections::{BTreeMap, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};

use relift_decode::Config;
use relift_ir::{BlockId, FunctionId, InstId, InstKind, Module, RegId};

/// Per-register definition sets, kept sorted for deterministic iteration.
type State = BTreeMap<RegId, Vec<InstId>>;

/// Reaching-definitions analysis over register writes.
///
/// Definitions are `WriteReg` instructions; a call clobbers every register
/// in the configuration, making the call itself the reaching definition. A
/// register read with no recorded definition observes the function's entry
/// value.
#[derive(Debug, Default)]
pub struct ReachingDefinitions {
    defs_at_use: FxHashMap<InstId, Vec<InstId>>,
}

impl ReachingDefinitions {
    /// Run the analysis for every function of the module.
    pub fn run_on_module(module: &Module, config: &Config) -> Self {
        let mut rda = Self::default();
        for f in module.functions().collect::<Vec<_>>() {
            rda.run_on_function(module, config, f);
        }
        rda
    }

    /// Definitions reaching a `ReadReg` instruction. Empty for entry values.
    pub fn defs(&self, use_inst: InstId) -> &[InstId] {
        self.defs_at_use
            .get(&use_inst)
            .map_or(&[], |defs| defs.as_slice())
    }

    fn run_on_function(&mut self, module: &Module, config: &Config, function: FunctionId) {
        let blocks = module.function(function).blocks().to_vec();

        let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for &b in &blocks {
            for succ in module.block_successors(b) {
                preds.entry(succ).or_default().push(b);
            }
        }

        // Iterate block OUT states to a fixpoint.
        let mut out: FxHashMap<BlockId, State> = FxHashMap::default();
        let mut worklist: VecDeque<BlockId> = blocks.iter().copied().collect();
        let mut queued: FxHashSet<BlockId> = blocks.iter().copied().collect();

        while let Some(b) = worklist.pop_front() {
            queued.remove(&b);
            let mut state = join_predecessors(&preds, &out, b);
            transfer_block(module, config, b, &mut state, None);

            if out.get(&b) != Some(&state) {
                out.insert(b, state);
                for succ in module.block_successors(b) {
                    if queued.insert(succ) {
                        worklist.push_back(succ);
                    }
                }
            }
        }

        // Record the definitions visible at each register read.
        for &b in &blocks {
            let mut state = join_predecessors(&preds, &out, b);
            transfer_block(module, config, b, &mut state, Some(&mut self.defs_at_use));
        }
    }
}

fn join_predecessors(
    preds: &FxHashMap<BlockId, Vec<BlockId>>,
    out: &FxHashMap<BlockId, State>,
    block: BlockId,
) -> State {
    let mut state = State::new();
    for p in preds.get(&block).into_iter().flatten() {
        if let Some(p_out) = out.get(p) {
            for (&reg, defs) in p_out {
                let entry = state.entry(reg).or_default();
                for &d in defs {
                    if let Err(pos) = entry.binary_search(&d) {
                        entry.insert(pos, d);
                    }
                }
            }
        }
    }
    state
}

/// Walk a block applying the transfer function; optionally record the
/// current definitions at each register read.
fn transfer_block(
    module: &Module,
    config: &Config,
    block: BlockId,
    state: &mut State,
    mut record: Option<&mut FxHashMap<InstId, Vec<InstId>>>,
) {
    for &i in module.block(block).insts() {
        match &module.inst(i).kind {
            InstKind::ReadReg(reg) => {
                if let Some(record) = record.as_deref_mut() {
                    if let Some(defs) = state.get(reg) {
                        if !defs.is_empty() {
                            record.insert(i, defs.clone());
                        }
                    }
                }
            }
            InstKind::WriteReg { reg, .. } => {
                state.insert(*reg, vec![i]);
            }
            InstKind::Call { .. } => {
                for r in &config.registers {
                    state.insert(r.id, vec![i]);
                }
            }
            _ => {}
        }
    }
}
