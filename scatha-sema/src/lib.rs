//! Semantic analysis of the Scatha language: symbol table, entity model,
//! overload resolution, conversions, lifetime synthesis and the three-phase
//! analyzer that decorates the syntax tree.

#![warn(missing_debug_implementations)]

mod analyze;
mod conversion;
mod entity;
mod issue;
mod lifetime;
mod overload;
mod symbol_table;

pub use analyze::{analyze, AnalysisResult, AppliedConversion};
pub use conversion::{
    compute_conversion, implicit_conversion, is_implicit, Conversion,
    ObjectConversion, RefConversion,
};
pub use entity::{
    AccessControl, BuiltinTypeKind, Entity, EntityId, EntityKind,
    FunctionAttributes, FunctionKind, FunctionSignature, LifetimeMetadata,
    QualType, Refness, SpecialLifetimeFunction, SpecialMemberFunction,
};
pub use issue::{
    BadExprKind, BadFuncDefKind, BadReturnKind, BadSmfKind, BadStmtKind,
    BadVarDeclKind, Issue, IssueHandler, IssueKind, OrErrorKind, OrFailure,
    Severity, SourceHighlight,
};
pub use lifetime::{synthesize_lifetime, UserLifetimeFunctions};
pub use overload::{perform_overload_resolution, Argument, OrResult};
pub use symbol_table::{BuiltinTypes, SymbolTable};
