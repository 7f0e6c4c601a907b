//! Compile-time issues.
//!
//! Issues are values accumulated in an [`IssueHandler`], never `Err`
//! returns: analysis recovers locally where possible (poisoning the entity)
//! and keeps going to report as much as it can in one run.

use scatha_ast::SourceRange;
use strum::IntoStaticStr;

use crate::entity::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A secondary range with a hint message.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceHighlight {
    pub range: SourceRange,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BadStmtKind {
    ReservedIdentifier,
    InvalidScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BadVarDeclKind {
    IncompleteType,
    ExpectedRefInit,
    CantInferType,
    RefInStruct,
    ThisInFreeFunction,
    ThisPosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BadFuncDefKind {
    MainMustReturnTrivial,
    MainInvalidArguments,
    FunctionMustHaveBody,
    UnknownLinkage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BadSmfKind {
    HasReturnType,
    NotInStruct,
    NoParams,
    BadFirstParam,
    MoveSignature,
    DeleteSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BadReturnKind {
    NonVoidMustReturnValue,
    VoidMustNotReturnValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BadExprKind {
    UndeclaredId,
    UnaryExprBadType,
    BinaryExprNoCommonType,
    MemAccNonStaticThroughType,
    MemberNotFound,
    ConditionalNoCommonType,
    DerefNoPtr,
    SubscriptNoArray,
    ObjectNotCallable,
    CantDeduceReturnType,
    ListExprNoCommonType,
    MoveExprConst,
    AssignToConst,
    AssignToRValue,
    NoConversion,
    NotAValue,
}

/// Per-candidate reason of a failed overload resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrFailure {
    CountMismatch,
    NoArgumentConversion(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrErrorKind {
    NoMatch { reasons: Vec<(EntityId, OrFailure)> },
    Ambiguous { finalists: Vec<EntityId> },
}

/// Issue families.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    BadStmt(BadStmtKind),
    BadVarDecl(BadVarDeclKind),
    BadFuncDef(BadFuncDefKind),
    BadSmf(BadSmfKind),
    BadReturn(BadReturnKind),
    BadReturnTypeDeduction,
    BadExpr(BadExprKind),
    OrError(OrErrorKind),
    BadImport,
    BadAccessControl,
    /// Every entity on the cycle, in order.
    StructDefCycle(Vec<EntityId>),
    BadTypeDeduction,
    BadPassedType,
    BadCleanup,
}

/// One reported issue.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub severity: Severity,
    pub range: SourceRange,
    pub message: String,
    pub kind: IssueKind,
    pub secondary: Vec<SourceHighlight>,
}

impl Issue {
    pub fn error(
        kind: IssueKind,
        range: SourceRange,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            range,
            message: message.into(),
            kind,
            secondary: Vec::new(),
        }
    }

    pub fn warning(
        kind: IssueKind,
        range: SourceRange,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            range,
            message: message.into(),
            kind,
            secondary: Vec::new(),
        }
    }

    pub fn with_highlight(
        mut self,
        range: SourceRange,
        message: impl Into<String>,
    ) -> Self {
        self.secondary
            .push(SourceHighlight { range, message: message.into() });
        self
    }
}

/// Accumulates issues during analysis.
#[derive(Debug, Default)]
pub struct IssueHandler {
    issues: Vec<Issue>,
}

impl IssueHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}
