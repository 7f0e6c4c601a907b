//! The decorated abstract syntax tree.
//!
//! Nodes live in an arena owned by [`Ast`]; every node carries its kind tag,
//! source range, parent back-link and an ordered child list. Semantic
//! analysis decorates expression nodes with entity, type and value-category
//! information and attaches destructor stacks to statements. Decorations are
//! write-once: reading an undecorated field is a programmer error and
//! panics.
//!
//! The tree is producer-agnostic: the parser is an external collaborator and
//! tests construct trees through the same builder API.

#![warn(missing_debug_implementations)]

mod node;

pub use node::{
    Ast, AstQualType, BinaryOp, ConstValue, EntityCategory, EntityRef,
    ExprDecoration, LoopKind, NodeId, NodeKind, ObjectRef, Refness,
    SourceRange, UnaryOp, ValueCategory,
};
