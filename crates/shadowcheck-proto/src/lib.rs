//! Wire and data model shared between the shadowcheck worker and its
//! frontend.
//!
//! The frontend (an AST walker over the host language, out of scope for this
//! crate) resolves source files into [`ResolvedSelect`], [`ResolvedInsert`],
//! and [`SqlCreateView`] values and sends them to the worker over the
//! request channel described in `shadowcheck_core::session`. Everything in
//! this crate is plain data: no I/O, no Postgres types, `serde`-only so it
//! can be serialized to the newline-delimited JSON wire format unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque identifier for a source module (relative path without extension).
///
/// Produced by the frontend; shadowcheck never inspects its structure beyond
/// equality and ordering.
pub type ModuleId = String;

/// Uniquely names a declared view: a module plus the variable name it was
/// assigned to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedSqlViewName {
    pub module: ModuleId,
    pub local_name: String,
}

impl QualifiedSqlViewName {
    pub fn new(module: impl Into<ModuleId>, local_name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            local_name: local_name.into(),
        }
    }
}

impl std::fmt::Display for QualifiedSqlViewName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.module, self.local_name)
    }
}

/// A piece of a view body: literal text, or a reference to another view
/// whose resolved (quoted, hashed) name gets substituted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ViewFragment {
    String { text: String },
    ViewRef { name: QualifiedSqlViewName },
}

/// A declared view as the frontend sees it: a named sequence of fragments
/// with typed holes for other views.
///
/// `initial_fragments` never changes after construction. `current_fragments`
/// starts equal to it and is mutated only by the resolver: resetting back to
/// `initial_fragments`, or replacing a `ViewRef` with a `String` carrying the
/// dependency's escaped, resolved identifier. Once no `ViewRef` remains the
/// definition is *fully resolved*.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlViewDefinition {
    pub qualified_name: QualifiedSqlViewName,
    pub file_name: String,
    pub file_contents: String,
    pub source_map: Option<String>,
    pub initial_fragments: Vec<ViewFragment>,
    pub current_fragments: Vec<ViewFragment>,
    /// Filled in by the resolver once `current_fragments` contains no refs.
    pub resolved_db_name: Option<String>,
}

impl SqlViewDefinition {
    pub fn new(
        qualified_name: QualifiedSqlViewName,
        file_name: impl Into<String>,
        file_contents: impl Into<String>,
        source_map: Option<String>,
        fragments: Vec<ViewFragment>,
    ) -> Self {
        Self {
            qualified_name,
            file_name: file_name.into(),
            file_contents: file_contents.into(),
            source_map,
            initial_fragments: fragments.clone(),
            current_fragments: fragments,
            resolved_db_name: None,
        }
    }

    /// Reset mutable resolution state back to the immutable starting point.
    pub fn reset_to_initial_fragments(&mut self) {
        self.current_fragments = self.initial_fragments.clone();
        self.resolved_db_name = None;
    }

    /// `true` once every fragment has had its `ViewRef`s substituted away.
    pub fn is_fully_resolved(&self) -> bool {
        !self
            .current_fragments
            .iter()
            .any(|f| matches!(f, ViewFragment::ViewRef { .. }))
    }

    /// Equivalence used by the resolver to detect views whose fragments
    /// changed between runs, independent of resolution state.
    pub fn fragments_equal(&self, other: &[ViewFragment]) -> bool {
        self.initial_fragments == other
    }
}

/// A view whose dependencies have all been resolved: ready to `CREATE VIEW`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlCreateView {
    pub qualified_name: QualifiedSqlViewName,
    pub resolved_db_name: String,
    pub create_query: String,
    pub file_name: String,
    pub file_contents: String,
    pub source_map: Option<String>,
}

/// Whether a declared column is required or may be absent/null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Nullability {
    Req,
    Opt,
}

/// Thin newtype over a SQL type name (`"int4"`, `"_text"`, ...), distinct at
/// the type level from [`TypeScriptType`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlType(pub String);

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SqlType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Thin newtype over a target-language type name (`"number"`, `"LocalDate"`,
/// ...), kept distinct at the type level from [`SqlType`]. The name keeps
/// the teacher's wire-facing convention even though the target language
/// need not literally be TypeScript.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeScriptType(pub String);

impl std::fmt::Display for TypeScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeScriptType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TypeScriptType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A declared column: its nullability and the declared target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredColType {
    pub nullability: Nullability,
    pub declared_type: TypeScriptType,
}

/// A source span locating a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Span {
    File,
    LineAndCol { line: u32, column: u32 },
    LineAndColRange { start: LineAndCol, end: LineAndCol },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineAndCol {
    pub line: u32,
    pub column: u32,
}

/// A byte-offset based span, the unit the migration loader and the
/// PG-error-position remapper both produce before handing a [`Span`] to the
/// frontend's source map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    pub start: u32,
    pub end: u32,
}

/// A suggested fix attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickFix {
    pub name: String,
    pub replacement_text: String,
}

/// A single diagnostic, ready for the frontend's reporter to render as a
/// code frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDiagnostic {
    pub file_name: String,
    pub file_contents: String,
    pub span: Span,
    pub messages: Vec<String>,
    pub epilogue: Option<String>,
    pub quick_fix: Option<QuickFix>,
}

/// Frontend-provided check request shared by selects and inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSelect {
    pub text: String,
    pub col_types: BTreeMap<String, DeclaredColType>,
    pub file_name: String,
    pub file_contents: String,
    pub source_map: Option<String>,
    pub col_type_span: Span,
    pub query_method_name: String,
    pub indent_level: u32,
}

/// Like [`ResolvedSelect`] but also carries the insert's target table and
/// the supplied columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedInsert {
    pub text: String,
    pub col_types: BTreeMap<String, DeclaredColType>,
    pub file_name: String,
    pub file_contents: String,
    pub source_map: Option<String>,
    pub col_type_span: Span,
    pub query_method_name: String,
    pub indent_level: u32,
    pub table_name: String,
    pub table_name_expr_span: Span,
    pub insert_expr_span: Span,
    pub insert_columns: BTreeMap<String, SuppliedInsertColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppliedInsertColumn {
    pub supplied_type: TypeScriptType,
    pub not_null: bool,
}

/// Drives per-column type specialization: a table column whose values should
/// be distinguishable at the type level from other columns of the same
/// underlying SQL type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueTableColumnType {
    pub type_script_type_name: String,
    pub table_name: String,
    pub column_name: String,
}

/// A user-supplied override for how a SQL type translates to a target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSqlTypeMapping {
    pub type_script_type_name: String,
    pub sql_type_name: String,
}

/// `{...}` vs `{ ids: Opt<...> }` rendering knobs for quick-fix text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColTypesFormat {
    pub include_region_marker: bool,
    pub delimiter: Delimiter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delimiter {
    #[serde(rename = ",")]
    Comma,
    #[serde(rename = ";")]
    Semicolon,
}

impl Delimiter {
    pub fn as_str(self) -> &'static str {
        match self {
            Delimiter::Comma => ",",
            Delimiter::Semicolon => ";",
        }
    }
}

/// One failing insert column, as aggregated into [`InsertAnswer::InvalidInsertCols`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum InsertColError {
    MissingRequiredCol {
        table_name: String,
        col_name: String,
        col_type: String,
    },
    ColWrongType {
        col_name: String,
        expected_type: String,
        supplied_type: String,
    },
    ColNotFound {
        col_name: String,
    },
}

/// Outcome of validating a single declared view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum ViewAnswer {
    NoErrors,
    CreateError { view_name: String, perr: String },
    InvalidFeatureError {
        view_name: String,
        message: String,
        position: u32,
    },
}

/// Outcome of validating a select/query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum SelectAnswer {
    NoErrors,
    DescribeError {
        perr: String,
        position: Option<u32>,
    },
    DuplicateColNamesError {
        cols: Vec<String>,
    },
    WrongColumnTypes {
        rendered_col_types: String,
    },
}

/// Outcome of validating an insert: every [`SelectAnswer`] variant plus the
/// insert-specific failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum InsertAnswer {
    NoErrors,
    DescribeError {
        perr: String,
        position: Option<u32>,
    },
    DuplicateColNamesError {
        cols: Vec<String>,
    },
    WrongColumnTypes {
        rendered_col_types: String,
    },
    InvalidTableName {
        table_name: String,
    },
    InvalidInsertCols {
        cols: Vec<InsertColError>,
    },
}

impl From<SelectAnswer> for InsertAnswer {
    fn from(value: SelectAnswer) -> Self {
        match value {
            SelectAnswer::NoErrors => InsertAnswer::NoErrors,
            SelectAnswer::DescribeError { perr, position } => {
                InsertAnswer::DescribeError { perr, position }
            }
            SelectAnswer::DuplicateColNamesError { cols } => {
                InsertAnswer::DuplicateColNamesError { cols }
            }
            SelectAnswer::WrongColumnTypes { rendered_col_types } => {
                InsertAnswer::WrongColumnTypes { rendered_col_types }
            }
        }
    }
}

/// Top-level config schema shared with `shadowcheck-config`, re-exported
/// here because `WorkerRequest::Initialize` carries it verbatim across the
/// wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub migrations_dir: String,
    pub postgres_version: Option<String>,
    pub col_types_format: ColTypesFormat,
    pub strict_date_time_checking: bool,
    pub custom_sql_type_mappings: Vec<CustomSqlTypeMapping>,
    pub unique_table_column_types: Vec<UniqueTableColumnType>,
}

/// Requests the frontend may send to the worker, tagged on `_tag` per the
/// wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum WorkerRequest {
    Initialize {
        project_dir: String,
        config: WorkerConfig,
        config_file_path: String,
        sql_views: Vec<SqlViewDefinition>,
        force: bool,
    },
    UpdateViews {
        strict_date_time_checking: bool,
        sql_views: Vec<SqlViewDefinition>,
    },
    CheckQuery {
        resolved: ResolvedSelect,
    },
    CheckInsert {
        resolved: ResolvedInsert,
    },
    End,
}

/// Error half of a worker response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum WorkerError {
    InvalidQueryError { diagnostics: Vec<ErrorDiagnostic> },
    RunnerError { message: String },
}

/// Successful payload of a worker response, one per request kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_tag", rename_all = "camelCase")]
pub enum WorkerOk {
    Initialized,
    ViewsUpdated { view_answers: Vec<(QualifiedSqlViewName, ViewAnswer)> },
    QueryChecked { diagnostics: Vec<ErrorDiagnostic> },
    InsertChecked { diagnostics: Vec<ErrorDiagnostic> },
    Ended,
}

/// Every request returns either a success payload or a [`WorkerError`].
pub type WorkerResponse = Result<WorkerOk, WorkerError>;
