//! Removal of blocks that cannot be reached from the entry block.

use rustc_hash::FxHashSet;
use tracing::debug;

use qirc_ir::cfg::ControlFlowGraph;
use qirc_ir::{Instruction, Module};

use crate::context::PassContext;
use crate::error::LoweringResult;
use crate::pass::{Pass, PassKind};

/// Drops unreachable blocks and the `phi` incomings that named them.
pub struct PruneUnreachableBlocks;

impl Pass for PruneUnreachableBlocks {
    fn name(&self) -> &'static str {
        "prune_unreachable_blocks"
    }

    fn kind(&self) -> PassKind {
        PassKind::Transformation
    }

    fn run(&self, module: &mut Module, ctx: &mut PassContext) -> LoweringResult<()> {
        for function in module.functions_mut() {
            let live: FxHashSet<String> = ControlFlowGraph::build(function)?
                .reachable()
                .into_iter()
                .map(str::to_string)
                .collect();
            if live.len() == function.blocks.len() {
                continue;
            }

            let before = function.blocks.len();
            function.blocks.retain(|b| live.contains(&b.label));
            for block in &mut function.blocks {
                for inst in &mut block.instructions {
                    if let Instruction::Phi { incoming, .. } = inst {
                        incoming.retain(|(_, label)| live.contains(label));
                    }
                }
            }

            let removed = before - function.blocks.len();
            debug!(function = %function.name, removed, "pruned unreachable blocks");
            ctx.blocks_removed += removed;
        }
        Ok(())
    }
}
