//! Overload resolution.
//!
//! Candidates are filtered by parameter count, then every argument is
//! scored by the rank of its implicit conversion. The candidate with the
//! lowest total rank wins; a tie between distinct functions is ambiguous.

use crate::conversion::{implicit_conversion, Conversion};
use crate::entity::{EntityId, EntityKind, QualType};
use crate::issue::OrFailure;
use crate::symbol_table::SymbolTable;

/// View of one call argument.
#[derive(Debug, Clone, Copy)]
pub struct Argument {
    pub ty: QualType,
}

/// Outcome of overload resolution.
#[derive(Debug, Clone)]
pub enum OrResult {
    Success {
        function: EntityId,
        /// Per-argument conversions, parallel to the argument list.
        conversions: Vec<Conversion>,
    },
    NoMatch {
        reasons: Vec<(EntityId, OrFailure)>,
    },
    Ambiguous {
        finalists: Vec<EntityId>,
    },
}

/// Resolve a call of `overload_set` with `arguments`.
pub fn perform_overload_resolution(
    sym: &SymbolTable,
    overload_set: EntityId,
    arguments: &[Argument],
) -> OrResult {
    let functions = match &sym.entity(overload_set).kind {
        EntityKind::OverloadSet { functions } => functions.clone(),
        // A plain function behaves like a singleton set.
        EntityKind::Function { .. } => vec![overload_set],
        _ => return OrResult::NoMatch { reasons: Vec::new() },
    };
    let mut reasons: Vec<(EntityId, OrFailure)> = Vec::new();
    let mut matches: Vec<(EntityId, Vec<Conversion>, u32)> = Vec::new();
    for function in functions {
        let EntityKind::Function { signature, .. } =
            &sym.entity(function).kind
        else {
            continue;
        };
        if signature.argument_types.len() != arguments.len() {
            reasons.push((function, OrFailure::CountMismatch));
            continue;
        }
        let mut conversions = Vec::with_capacity(arguments.len());
        let mut total_rank = 0;
        let mut failed = None;
        for (index, (argument, param_ty)) in
            arguments.iter().zip(&signature.argument_types).enumerate()
        {
            match implicit_conversion(sym, argument.ty, *param_ty) {
                Some(conversion) => {
                    total_rank += conversion.rank();
                    conversions.push(conversion);
                }
                None => {
                    failed = Some(OrFailure::NoArgumentConversion(index));
                    break;
                }
            }
        }
        match failed {
            Some(reason) => reasons.push((function, reason)),
            None => matches.push((function, conversions, total_rank)),
        }
    }
    let Some(best_rank) =
        matches.iter().map(|(_, _, rank)| *rank).min()
    else {
        return OrResult::NoMatch { reasons };
    };
    let mut finalists: Vec<(EntityId, Vec<Conversion>)> = matches
        .into_iter()
        .filter(|(_, _, rank)| *rank == best_rank)
        .map(|(function, conversions, _)| (function, conversions))
        .collect();
    if finalists.len() > 1 {
        return OrResult::Ambiguous {
            finalists: finalists.into_iter().map(|(f, _)| f).collect(),
        };
    }
    let (function, conversions) = finalists.pop().expect("one finalist");
    OrResult::Success { function, conversions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{
        FunctionAttributes, FunctionKind, FunctionSignature,
    };

    fn declare_fn(
        sym: &mut SymbolTable,
        name: &str,
        argument_types: Vec<QualType>,
    ) -> EntityId {
        let return_type = Some(QualType::new(sym.builtins().void));
        sym.declare_function(
            name,
            EntityKind::Function {
                signature: FunctionSignature { argument_types, return_type },
                kind: FunctionKind::Native,
                attributes: FunctionAttributes::empty(),
                smf: None,
                slf: None,
                foreign_index: None,
                binary_address: None,
                params: Vec::new(),
            },
            None,
        )
    }

    #[test]
    fn exact_match_beats_widening() {
        let mut sym = SymbolTable::new();
        let s32 = QualType::new(sym.builtins().s32);
        let s64 = QualType::new(sym.builtins().s64);
        let f32_fn = declare_fn(&mut sym, "f", vec![s32]);
        let f64_fn = declare_fn(&mut sym, "f", vec![s64]);
        let set = sym.lookup("f").unwrap();
        match perform_overload_resolution(&sym, set, &[Argument { ty: s64 }]) {
            OrResult::Success { function, conversions } => {
                assert_eq!(function, f64_fn);
                assert!(conversions[0].is_identity());
            }
            other => panic!("expected success, got {other:?}"),
        }
        match perform_overload_resolution(&sym, set, &[Argument { ty: s32 }]) {
            OrResult::Success { function, .. } => {
                assert_eq!(function, f32_fn);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn count_mismatch_and_bad_argument_are_reported_per_candidate() {
        let mut sym = SymbolTable::new();
        let s64 = QualType::new(sym.builtins().s64);
        let f64t = QualType::new(sym.builtins().f64);
        let one = declare_fn(&mut sym, "g", vec![s64]);
        let two = declare_fn(&mut sym, "g", vec![s64, s64]);
        let set = sym.lookup("g").unwrap();
        match perform_overload_resolution(&sym, set, &[Argument { ty: f64t }])
        {
            OrResult::NoMatch { reasons } => {
                assert!(reasons.contains(&(
                    one,
                    OrFailure::NoArgumentConversion(0)
                )));
                assert!(reasons.contains(&(two, OrFailure::CountMismatch)));
            }
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn equal_rank_candidates_are_ambiguous() {
        let mut sym = SymbolTable::new();
        let s64 = QualType::new(sym.builtins().s64);
        let u64t = QualType::new(sym.builtins().u64);
        let s8 = QualType::new(sym.builtins().s8);
        declare_fn(&mut sym, "h", vec![s64]);
        declare_fn(&mut sym, "h", vec![u64t]);
        let set = sym.lookup("h").unwrap();
        // s8 widens to s64; u64 is not reachable implicitly, so this is a
        // unique match.
        match perform_overload_resolution(&sym, set, &[Argument { ty: s8 }]) {
            OrResult::Success { .. } => {}
            other => panic!("expected success, got {other:?}"),
        }
        // A u8 widens into both with the same rank.
        let u8t = QualType::new(sym.builtins().u8);
        match perform_overload_resolution(&sym, set, &[Argument { ty: u8t }]) {
            OrResult::Ambiguous { finalists } => {
                assert_eq!(finalists.len(), 2);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }
}
