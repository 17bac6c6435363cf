//! Flattens an expression tree into a linear instruction list so evaluation
//! can run iteratively instead of recursing, keeping stack depth bounded for
//! deeply nested expressions.

use crate::authz::expr::ExprNode;

/// One step of a flattened expression.
#[derive(Debug, Clone)]
pub struct Instruction<'a> {
    pub node: &'a ExprNode,
    pub param_count: usize,
    /// The parameter name this node's value fills in its parent call,
    /// `None` for the root.
    pub parent_slot_key: Option<&'a str>,
}

/// Flatten the tree with an explicit work-stack. A node is appended before
/// its children are pushed, so reading the output back-to-front visits every
/// child before its parent, which is what bottom-up evaluation requires.
pub fn plan(root: &ExprNode) -> Vec<Instruction<'_>> {
    let mut pending = vec![Instruction {
        node: root,
        param_count: root.params.as_ref().map_or(0, |p| p.len()),
        parent_slot_key: None,
    }];
    let mut instructions = Vec::new();

    while let Some(item) = pending.pop() {
        let node = item.node;
        instructions.push(item);

        if let Some(params) = &node.params {
            for (slot_key, child) in params {
                pending.push(Instruction {
                    node: child,
                    param_count: child.params.as_ref().map_or(0, |p| p.len()),
                    parent_slot_key: Some(slot_key.as_str()),
                });
            }
        }
    }

    instructions
}
