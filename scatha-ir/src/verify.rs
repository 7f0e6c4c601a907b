//! Structural verifier for the SSA and CFG integrity laws.

use std::collections::HashSet;

use thiserror::Error;

use crate::function::Function;
use crate::value::{InstKind, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("function {0}: block {1} has no terminator")]
    MissingTerminator(String, String),
    #[error("function {0}: block {1} has a terminator before its end")]
    EarlyTerminator(String, String),
    #[error("function {0}: phi {1} is not at the head of its block")]
    MisplacedPhi(String, String),
    #[error("function {0}: {1} uses {2} but is not in its user list")]
    BrokenUseList(String, String, String),
    #[error("function {0}: {1} lists user {2} without a matching operand")]
    StaleUser(String, String, String),
    #[error(
        "function {0}: successor lists of {1} disagree with predecessor \
         lists of {2}"
    )]
    EdgeMismatch(String, String, String),
    #[error("function {0}: phi {1} incoming blocks do not match predecessors")]
    PhiIncomingMismatch(String, String),
}

/// Check SSA use-def symmetry, block shape and CFG edge symmetry.
pub fn verify_function(function: &Function) -> Result<(), VerifyError> {
    let fname = function.name.clone();
    for block in function.block_ids() {
        let insts = function.block_insts(block);
        let block_name = function.block_name(block).to_owned();
        match insts.last() {
            Some(last) if function.inst(*last).kind.is_terminator() => {}
            _ => {
                return Err(VerifyError::MissingTerminator(fname, block_name))
            }
        }
        let mut phis_done = false;
        for (index, inst) in insts.iter().enumerate() {
            let data = function.inst(*inst);
            if data.kind.is_terminator() && index + 1 != insts.len() {
                return Err(VerifyError::EarlyTerminator(fname, block_name));
            }
            if data.kind.is_phi() {
                if phis_done {
                    return Err(VerifyError::MisplacedPhi(
                        fname,
                        data.name.clone(),
                    ));
                }
            } else {
                phis_done = true;
            }
        }
        // Terminator targets must agree with both edge directions.
        for succ in function.successors(block) {
            if !function.preds(succ).contains(&block) {
                return Err(VerifyError::EdgeMismatch(
                    fname,
                    block_name,
                    function.block_name(succ).to_owned(),
                ));
            }
        }
        for pred in function.preds(block) {
            if !function.successors(*pred).contains(&block) {
                return Err(VerifyError::EdgeMismatch(
                    fname,
                    function.block_name(*pred).to_owned(),
                    block_name,
                ));
            }
        }
    }
    // Use-def symmetry over the whole body.
    for inst in function.inst_ids() {
        let data = function.inst(inst);
        for operand in &data.operands {
            if let Value::Inst(def) = operand {
                let count = function
                    .inst(*def)
                    .users()
                    .iter()
                    .filter(|u| **u == inst)
                    .count();
                let uses = data
                    .operands
                    .iter()
                    .filter(|o| **o == Value::Inst(*def))
                    .count();
                if count != uses {
                    return Err(VerifyError::BrokenUseList(
                        fname,
                        data.name.clone(),
                        function.inst(*def).name.clone(),
                    ));
                }
            }
        }
        for user in data.users() {
            let uses_me = function
                .inst(*user)
                .operands
                .iter()
                .any(|o| *o == Value::Inst(inst));
            if !uses_me {
                return Err(VerifyError::StaleUser(
                    fname,
                    data.name.clone(),
                    function.inst(*user).name.clone(),
                ));
            }
        }
        if let InstKind::Phi { preds } = &data.kind {
            let block = data.block().expect("phi not attached");
            let incoming: HashSet<_> = preds.iter().copied().collect();
            let expected: HashSet<_> =
                function.preds(block).iter().copied().collect();
            if incoming != expected {
                return Err(VerifyError::PhiIncomingMismatch(
                    fname,
                    data.name.clone(),
                ));
            }
        }
    }
    Ok(())
}

/// Verify every function of a module.
pub fn verify_module(
    module: &crate::module::Module,
) -> Result<(), VerifyError> {
    for function in module.functions() {
        verify_function(function)?;
    }
    Ok(())
}
