//! Control-flow graph construction and structural verification.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{IrError, IrResult};
use crate::instruction::Instruction;
use crate::module::Function;

/// Block-level control-flow graph of one function.
#[derive(Debug)]
pub struct ControlFlowGraph {
    graph: DiGraph<String, ()>,
    index: FxHashMap<String, NodeIndex>,
}

impl ControlFlowGraph {
    /// Build the graph. Fails if a branch names an unknown block or two
    /// blocks share a label.
    pub fn build(function: &Function) -> IrResult<Self> {
        let mut graph = DiGraph::new();
        let mut index = FxHashMap::default();

        for block in &function.blocks {
            let node = graph.add_node(block.label.clone());
            if index.insert(block.label.clone(), node).is_some() {
                return Err(IrError::DuplicateBlock {
                    function: function.name.clone(),
                    block: block.label.clone(),
                });
            }
        }

        for block in &function.blocks {
            let from = index[&block.label];
            for target in block.successors() {
                let to = *index.get(target).ok_or_else(|| IrError::UnknownBlock {
                    function: function.name.clone(),
                    block: target.to_string(),
                })?;
                // Both arms of a conditional branch may name the same block.
                if graph.find_edge(from, to).is_none() {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Ok(Self { graph, index })
    }

    /// Labels of the blocks that branch to `label`.
    pub fn predecessors(&self, label: &str) -> Vec<&str> {
        self.index.get(label).map_or_else(Vec::new, |&node| {
            self.graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|n| self.graph[n].as_str())
                .collect()
        })
    }

    /// Labels reachable from the first block.
    pub fn reachable(&self) -> FxHashSet<&str> {
        let mut seen = FxHashSet::default();
        if self.graph.node_count() == 0 {
            return seen;
        }
        let mut dfs = Dfs::new(&self.graph, NodeIndex::new(0));
        while let Some(node) = dfs.next(&self.graph) {
            seen.insert(self.graph[node].as_str());
        }
        seen
    }

    /// Whether any path leads from a block back to itself.
    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }
}

/// Check the structural invariants of a finished function:
///
/// - every block has a terminator;
/// - every branch target exists;
/// - every block except the entry has at least one predecessor;
/// - every `phi` incoming block is a predecessor of the phi's block.
pub fn verify(function: &Function) -> IrResult<()> {
    for block in &function.blocks {
        if block.terminator.is_none() {
            return Err(IrError::MissingTerminator {
                function: function.name.clone(),
                block: block.label.clone(),
            });
        }
    }

    let cfg = ControlFlowGraph::build(function)?;

    for block in function.blocks.iter().skip(1) {
        let preds = cfg.predecessors(&block.label);
        if preds.is_empty() {
            return Err(IrError::UnreachableBlock {
                function: function.name.clone(),
                block: block.label.clone(),
            });
        }

        for inst in &block.instructions {
            if let Instruction::Phi { incoming, .. } = inst {
                for (_, from) in incoming {
                    if !preds.contains(&from.as_str()) {
                        return Err(IrError::InvalidPhi {
                            function: function.name.clone(),
                            block: block.label.clone(),
                            incoming: from.clone(),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use crate::types::{Operand, Type};

    fn diamond() -> Function {
        let mut b = FunctionBuilder::new("f", vec![("c".into(), Type::I1)], Type::I64);
        let then_block = b.add_block("then");
        let else_block = b.add_block("else");
        let join = b.add_block("join");
        b.cond_br(Operand::local("c", Type::I1), &then_block, &else_block)
            .unwrap();
        b.position_at(&then_block).unwrap();
        b.br(&join).unwrap();
        b.position_at(&else_block).unwrap();
        b.br(&join).unwrap();
        b.position_at(&join).unwrap();
        let v = b
            .phi(
                "x",
                Type::I64,
                vec![
                    (Operand::i64(1), then_block.clone()),
                    (Operand::i64(2), else_block.clone()),
                ],
            )
            .unwrap();
        b.ret(Some(v)).unwrap();
        b.finish()
    }

    #[test]
    fn test_diamond_verifies() {
        let f = diamond();
        verify(&f).unwrap();
        let cfg = ControlFlowGraph::build(&f).unwrap();
        assert_eq!(cfg.predecessors(&f.blocks[3].label).len(), 2);
        assert!(!cfg.has_cycle());
        assert_eq!(cfg.reachable().len(), 4);
    }

    #[test]
    fn test_missing_terminator() {
        let b = FunctionBuilder::new("f", vec![], Type::Void);
        assert!(matches!(
            verify(&b.finish()),
            Err(IrError::MissingTerminator { .. })
        ));
    }

    #[test]
    fn test_orphan_block() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        let orphan = b.add_block("orphan");
        b.ret(None).unwrap();
        b.position_at(&orphan).unwrap();
        b.ret(None).unwrap();
        assert!(matches!(
            verify(&b.finish()),
            Err(IrError::UnreachableBlock { .. })
        ));
    }

    #[test]
    fn test_unknown_target() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        b.br("missing").unwrap();
        assert!(matches!(
            verify(&b.finish()),
            Err(IrError::UnknownBlock { .. })
        ));
    }

    #[test]
    fn test_phi_from_non_predecessor() {
        let mut f = diamond();
        if let Some(Instruction::Phi { incoming, .. }) = f.blocks[3].instructions.first_mut() {
            incoming[0].1 = "entry".into();
        }
        assert!(matches!(verify(&f), Err(IrError::InvalidPhi { .. })));
    }

    #[test]
    fn test_loop_is_cyclic() {
        let mut b = FunctionBuilder::new("f", vec![], Type::Void);
        let header = b.add_block("header");
        let exit = b.add_block("exit");
        b.br(&header).unwrap();
        b.position_at(&header).unwrap();
        b.cond_br(Operand::Bool(true), &header, &exit).unwrap();
        b.position_at(&exit).unwrap();
        b.ret(None).unwrap();
        let f = b.finish();
        verify(&f).unwrap();
        assert!(ControlFlowGraph::build(&f).unwrap().has_cycle());
    }
}
