//! Diagnostic model (C1): turns an `Answer` into the `ErrorDiagnostic`s the
//! out-of-scope reporter collaborator renders as code frames.
//!
//! Grounded on `robert-sjoblom-pg-migration-lint`'s `Finding` type, which
//! plays the same "typed validation outcome -> renderable diagnostic" role
//! for an adjacent migration-linting problem.

use shadowcheck_proto::{
    ErrorDiagnostic, InsertAnswer, InsertColError, LineAndCol, QuickFix, ResolvedInsert,
    ResolvedSelect, SelectAnswer, Span, SqlCreateView, ViewAnswer,
};

/// Convert a 0-based byte offset into `text` into a 1-based line/column,
/// per §6's "spans in 1-based line/column".
fn byte_offset_to_line_col(text: &str, offset: u32) -> LineAndCol {
    let offset = offset as usize;
    let mut line = 1u32;
    let mut col = 1u32;
    for (i, ch) in text.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    LineAndCol { line, column: col }
}

/// Best-effort remap of a byte position inside `resolved.text` back to a
/// position inside the containing source file: find where the query text
/// appears in `file_contents` and add the offsets together. Falls back to
/// the caller-provided `fallback` span when the text can't be located (e.g.
/// it was transformed before being sent to PG).
fn remap_query_position(file_contents: &str, query_text: &str, position: u32, fallback: Span) -> Span {
    let Some(byte_start) = file_contents.find(query_text) else {
        return fallback;
    };
    let char_start = file_contents[..byte_start].chars().count() as u32;
    let LineAndCol { line, column } = byte_offset_to_line_col(file_contents, char_start + position);
    Span::LineAndCol { line, column }
}

fn single(
    file_name: &str,
    file_contents: &str,
    span: Span,
    message: impl Into<String>,
    quick_fix: Option<QuickFix>,
) -> ErrorDiagnostic {
    ErrorDiagnostic {
        file_name: file_name.to_string(),
        file_contents: file_contents.to_string(),
        span,
        messages: vec![message.into()],
        epilogue: None,
        quick_fix,
    }
}

/// Diagnostics for a select/query check.
pub fn select_diagnostics(answer: &SelectAnswer, resolved: &ResolvedSelect) -> Vec<ErrorDiagnostic> {
    match answer {
        SelectAnswer::NoErrors => Vec::new(),
        SelectAnswer::DescribeError { perr, position } => {
            let span = match position {
                Some(pos) => remap_query_position(
                    &resolved.file_contents,
                    &resolved.text,
                    *pos,
                    resolved.col_type_span.clone(),
                ),
                None => resolved.col_type_span.clone(),
            };
            vec![single(&resolved.file_name, &resolved.file_contents, span, perr.clone(), None)]
        }
        SelectAnswer::DuplicateColNamesError { cols } => vec![single(
            &resolved.file_name,
            &resolved.file_contents,
            resolved.col_type_span.clone(),
            format!("duplicate column name(s) in query result: {}", cols.join(", ")),
            None,
        )],
        SelectAnswer::WrongColumnTypes { rendered_col_types } => vec![single(
            &resolved.file_name,
            &resolved.file_contents,
            resolved.col_type_span.clone(),
            "declared row shape does not match the query's inferred shape",
            Some(QuickFix {
                name: "Update declared column types".to_string(),
                replacement_text: rendered_col_types.clone(),
            }),
        )],
    }
}

/// Diagnostics for an insert check: the select-shape cases above plus the
/// insert-specific ones, located at `tableNameExprSpan` / `insertExprSpan`.
pub fn insert_diagnostics(answer: &InsertAnswer, resolved: &ResolvedInsert) -> Vec<ErrorDiagnostic> {
    match answer {
        InsertAnswer::NoErrors => Vec::new(),
        InsertAnswer::DescribeError { perr, position } => {
            let select_like = ResolvedSelect {
                text: resolved.text.clone(),
                col_types: resolved.col_types.clone(),
                file_name: resolved.file_name.clone(),
                file_contents: resolved.file_contents.clone(),
                source_map: resolved.source_map.clone(),
                col_type_span: resolved.col_type_span.clone(),
                query_method_name: resolved.query_method_name.clone(),
                indent_level: resolved.indent_level,
            };
            select_diagnostics(
                &SelectAnswer::DescribeError {
                    perr: perr.clone(),
                    position: *position,
                },
                &select_like,
            )
        }
        InsertAnswer::DuplicateColNamesError { cols } => vec![single(
            &resolved.file_name,
            &resolved.file_contents,
            resolved.col_type_span.clone(),
            format!("duplicate column name(s) in query result: {}", cols.join(", ")),
            None,
        )],
        InsertAnswer::WrongColumnTypes { rendered_col_types } => vec![single(
            &resolved.file_name,
            &resolved.file_contents,
            resolved.col_type_span.clone(),
            "declared row shape does not match the query's inferred shape",
            Some(QuickFix {
                name: "Update declared column types".to_string(),
                replacement_text: rendered_col_types.clone(),
            }),
        )],
        InsertAnswer::InvalidTableName { table_name } => vec![single(
            &resolved.file_name,
            &resolved.file_contents,
            resolved.table_name_expr_span.clone(),
            format!("table \"{table_name}\" does not exist"),
            None,
        )],
        InsertAnswer::InvalidInsertCols { cols } => cols
            .iter()
            .map(|col| insert_col_error_diagnostic(col, resolved))
            .collect(),
    }
}

fn insert_col_error_diagnostic(col: &InsertColError, resolved: &ResolvedInsert) -> ErrorDiagnostic {
    let message = match col {
        InsertColError::MissingRequiredCol {
            table_name,
            col_name,
            col_type,
        } => format!("missing required column \"{col_name}\" ({col_type}) for table \"{table_name}\""),
        InsertColError::ColWrongType {
            col_name,
            expected_type,
            supplied_type,
        } => format!(
            "column \"{col_name}\" expects {expected_type}, but {supplied_type} was supplied"
        ),
        InsertColError::ColNotFound { col_name } => {
            format!("column \"{col_name}\" does not exist on the target table")
        }
    };
    single(
        &resolved.file_name,
        &resolved.file_contents,
        resolved.insert_expr_span.clone(),
        message,
        None,
    )
}

/// Diagnostics for a single view's creation outcome.
pub fn view_diagnostics(answer: &ViewAnswer, view: &SqlCreateView) -> Vec<ErrorDiagnostic> {
    match answer {
        ViewAnswer::NoErrors => Vec::new(),
        ViewAnswer::CreateError { perr, .. } => vec![single(
            &view.file_name,
            &view.file_contents,
            Span::File,
            perr.clone(),
            None,
        )],
        ViewAnswer::InvalidFeatureError { message, position, .. } => {
            let LineAndCol { line, column } = byte_offset_to_line_col(&view.create_query, *position);
            vec![single(
                &view.file_name,
                &view.file_contents,
                Span::LineAndCol { line, column },
                message.clone(),
                None,
            )]
        }
    }
}
