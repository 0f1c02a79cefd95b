//! Query/insert analyzer (C7).
//!
//! `DESCRIBE` is implemented via `tokio_postgres::Client::prepare`, whose
//! `Statement::columns()` is the real Describe-message response: field
//! name, type oid, and the originating `(table_oid, column_id)` pair. No
//! simulation is needed — this is the actual wire-level protocol step the
//! spec names.

use crate::columns::{ColsLibrary, PgTypes};
use shadowcheck_proto::{
    ColTypesFormat, CustomSqlTypeMapping, DeclaredColType, InsertAnswer, InsertColError,
    Nullability, ResolvedInsert, ResolvedSelect, SelectAnswer, SqlType, SuppliedInsertColumn,
    TypeScriptType, UniqueTableColumnType,
};
use std::collections::{BTreeMap, HashMap};
use tokio_postgres::Client;

/// `SqlType -> TypeScriptType`, derived from the config's
/// `uniqueTableColumnTypes` via the RANGE type's name `tableName(columnName)`
/// (see [`crate::shadow_db`] for where that RANGE type is actually created).
#[derive(Debug, Clone, Default)]
pub struct UniqueColumnTypes {
    by_sql_type: HashMap<SqlType, TypeScriptType>,
}

impl UniqueColumnTypes {
    pub fn build(entries: &[UniqueTableColumnType]) -> Self {
        let mut by_sql_type = HashMap::new();
        for entry in entries {
            let range_type_name = format!("{}({})", entry.table_name, entry.column_name);
            by_sql_type.insert(
                SqlType(range_type_name),
                TypeScriptType(entry.type_script_type_name.clone()),
            );
        }
        Self { by_sql_type }
    }

    fn lookup(&self, sql_type: &SqlType) -> Option<&TypeScriptType> {
        self.by_sql_type.get(sql_type)
    }
}

/// Everything the analyzer needs beyond the live connection, threaded
/// through from the worker session.
pub struct AnalyzerContext<'a> {
    pub client: &'a Client,
    pub tables: &'a ColsLibrary,
    pub views: &'a ColsLibrary,
    pub pg_types: &'a PgTypes,
    pub unique_types: &'a UniqueColumnTypes,
    pub custom_mappings: &'a [CustomSqlTypeMapping],
    pub col_types_format: ColTypesFormat,
}

/// Validate a single select/query against the shadow schema.
pub async fn process_query(ctx: &AnalyzerContext<'_>, resolved: &ResolvedSelect) -> SelectAnswer {
    let statement = match ctx.client.prepare(&resolved.text).await {
        Ok(stmt) => stmt,
        Err(err) => {
            return SelectAnswer::DescribeError {
                perr: err.to_string(),
                position: pg_error_position(&err),
            };
        }
    };

    let fields = statement.columns();

    if fields.is_empty() && !resolved.col_types.is_empty() {
        return SelectAnswer::WrongColumnTypes {
            rendered_col_types: "{} (Or no type argument at all)".to_string(),
        };
    }

    let names: Vec<&str> = fields.iter().map(|f| f.name()).collect();
    if let Some(dup) = first_duplicate(&names) {
        return SelectAnswer::DuplicateColNamesError {
            cols: dup.into_iter().map(str::to_string).collect(),
        };
    }

    let computed = compute_col_types(ctx, &statement);

    if computed == resolved.col_types {
        SelectAnswer::NoErrors
    } else {
        SelectAnswer::WrongColumnTypes {
            rendered_col_types: render_col_types(&computed, ctx.col_types_format, resolved.indent_level),
        }
    }
}

/// Validate an insert: the select-shape checks above, plus the target
/// table's supplied-column / required-column consistency.
pub async fn process_insert(ctx: &AnalyzerContext<'_>, resolved: &ResolvedInsert) -> InsertAnswer {
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

    let select_answer = process_query(ctx, &select_like).await;
    if !matches!(select_answer, SelectAnswer::NoErrors) {
        return select_answer.into();
    }

    let table_cols = match table_columns(ctx.client, &resolved.table_name).await {
        Ok(cols) if cols.is_empty() => {
            return InsertAnswer::InvalidTableName {
                table_name: resolved.table_name.clone(),
            };
        }
        Ok(cols) => cols,
        Err(err) => {
            return InsertAnswer::DescribeError {
                perr: err.to_string(),
                position: pg_error_position(&err),
            };
        }
    };

    let errors = diff_insert_columns(
        &resolved.table_name,
        &table_cols,
        &resolved.insert_columns,
        ctx.custom_mappings,
        ctx.unique_types,
    );
    if errors.is_empty() {
        InsertAnswer::NoErrors
    } else {
        InsertAnswer::InvalidInsertCols { cols: errors }
    }
}

struct TableColumn {
    name: String,
    sql_type: SqlType,
    not_null: bool,
    has_default: bool,
}

async fn table_columns(
    client: &Client,
    table_name: &str,
) -> Result<Vec<TableColumn>, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
            SELECT a.attname, t.typname, a.attnotnull, a.atthasdef
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_type t ON t.oid = a.atttypid
            WHERE c.relname = $1
              AND c.relkind = 'r'
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
            &[&table_name],
        )
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| TableColumn {
            name: row.get(0),
            sql_type: SqlType(row.get(1)),
            not_null: row.get(2),
            has_default: row.get(3),
        })
        .collect())
}

fn diff_insert_columns(
    table_name: &str,
    table_cols: &[TableColumn],
    supplied: &BTreeMap<String, SuppliedInsertColumn>,
    custom_mappings: &[CustomSqlTypeMapping],
    unique_types: &UniqueColumnTypes,
) -> Vec<InsertColError> {
    let mut errors = Vec::new();
    let by_name: HashMap<&str, &TableColumn> =
        table_cols.iter().map(|c| (c.name.as_str(), c)).collect();

    for (col_name, supplied_col) in supplied {
        match by_name.get(col_name.as_str()) {
            None => errors.push(InsertColError::ColNotFound {
                col_name: col_name.clone(),
            }),
            Some(table_col) => {
                let expected_type =
                    translate_sql_type(&table_col.sql_type, custom_mappings, unique_types);
                let type_disagrees = supplied_col.supplied_type != expected_type;
                // The supplied value may be null but the column forbids it.
                let nullability_conflict = !supplied_col.not_null && table_col.not_null;
                if type_disagrees || nullability_conflict {
                    errors.push(InsertColError::ColWrongType {
                        col_name: col_name.clone(),
                        expected_type: expected_type.0.clone(),
                        supplied_type: supplied_col.supplied_type.0.clone(),
                    });
                }
            }
        }
    }

    for table_col in table_cols {
        if table_col.has_default || supplied.contains_key(&table_col.name) {
            continue;
        }
        if table_col.not_null {
            errors.push(InsertColError::MissingRequiredCol {
                table_name: table_name.to_string(),
                col_name: table_col.name.clone(),
                col_type: table_col.sql_type.0.clone(),
            });
        }
    }

    errors
}

fn compute_col_types(
    ctx: &AnalyzerContext<'_>,
    statement: &tokio_postgres::Statement,
) -> BTreeMap<String, DeclaredColType> {
    let mut out = BTreeMap::new();
    for field in statement.columns() {
        let oid = field.type_().oid();
        let sql_type = ctx
            .pg_types
            .lookup(oid)
            .cloned()
            .unwrap_or_else(|| SqlType(format!("oid_{oid}")));

        let table_oid = field.table_oid().unwrap_or(0);
        let column_id = field.column_id().unwrap_or(0);

        let not_null = table_oid > 0
            && (ctx.tables.is_not_null(table_oid, column_id) || ctx.views.is_not_null(table_oid, column_id));

        let nullability = if not_null {
            Nullability::Req
        } else {
            Nullability::Opt
        };

        let declared_type = translate_sql_type(&sql_type, ctx.custom_mappings, ctx.unique_types);

        out.insert(
            field.name().to_string(),
            DeclaredColType {
                nullability,
                declared_type,
            },
        );
    }
    out
}

/// Translate a SQL type name to the target type, per spec §4.6 step 4:
/// array prefix first (recursing into the remaining steps for the element
/// type), then hardcoded mapping, then `UniqueColumnTypes` override, then
/// the unknown-type fallback marker. Custom mappings from config take
/// priority over the hardcoded table.
pub fn translate_sql_type(
    sql_type: &SqlType,
    custom_mappings: &[CustomSqlTypeMapping],
    unique_types: &UniqueColumnTypes,
) -> TypeScriptType {
    if let Some(elem_name) = sql_type.0.strip_prefix('_') {
        let elem_type = translate_sql_type(&SqlType(elem_name.to_string()), custom_mappings, unique_types);
        return TypeScriptType(format!("({} | null)[]", elem_type.0));
    }

    if let Some(unique) = unique_types.lookup(sql_type) {
        return unique.clone();
    }

    if let Some(custom) = custom_mappings
        .iter()
        .find(|m| m.sql_type_name == sql_type.0)
    {
        return TypeScriptType(custom.type_script_type_name.clone());
    }

    hardcoded_mapping(&sql_type.0)
        .map(TypeScriptType::from)
        .unwrap_or_else(|| TypeScriptType(format!("unknown /* {} */", sql_type.0)))
}

fn hardcoded_mapping(sql_type_name: &str) -> Option<&'static str> {
    Some(match sql_type_name {
        "int2" | "int4" | "int8" | "numeric" | "float4" | "float8" => "number",
        "text" | "varchar" | "bpchar" | "name" => "string",
        "bool" => "boolean",
        "jsonb" | "json" => "DbJson",
        "timestamp" => "LocalDateTime",
        "timestamptz" => "Instant",
        "date" => "LocalDate",
        "time" => "LocalTime",
        "uuid" => "UUID",
        _ => return None,
    })
}

fn first_duplicate<'a>(names: &[&'a str]) -> Option<Vec<&'a str>> {
    let mut seen = std::collections::HashSet::new();
    let mut dups = Vec::new();
    for name in names {
        if !seen.insert(*name) {
            dups.push(*name);
        }
    }
    if dups.is_empty() {
        None
    } else {
        Some(dups)
    }
}

fn pg_error_position(err: &tokio_postgres::Error) -> Option<u32> {
    let db_error = err.as_db_error()?;
    match db_error.position()? {
        tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
        tokio_postgres::error::ErrorPosition::Internal { position, .. } => Some(*position),
    }
}

/// Render a computed row shape as a quick-fix replacement literal, indented
/// to the call site and formatted per `Config.colTypesFormat`.
pub fn render_col_types(
    computed: &BTreeMap<String, DeclaredColType>,
    format: ColTypesFormat,
    indent_level: u32,
) -> String {
    if computed.is_empty() {
        return "{} (Or no type argument at all)".to_string();
    }

    let indent = "  ".repeat(indent_level as usize + 1);
    let closing_indent = "  ".repeat(indent_level as usize);
    let delimiter = format.delimiter.as_str();

    let mut lines = Vec::new();
    for (name, decl) in computed {
        let tag = match decl.nullability {
            Nullability::Req => "Req",
            Nullability::Opt => "Opt",
        };
        lines.push(format!(
            "{indent}{name}: {tag}<{}>",
            decl.declared_type.0
        ));
    }

    let body = lines.join(&format!("{delimiter}\n"));
    let mut out = format!("{{\n{body}\n{closing_indent}}}");

    if format.include_region_marker {
        out = format!("// region: generated\n{out}\n// endregion");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowcheck_proto::Delimiter;

    fn format(delim: Delimiter, region: bool) -> ColTypesFormat {
        ColTypesFormat {
            include_region_marker: region,
            delimiter: delim,
        }
    }

    #[test]
    fn translate_hardcoded_scalar_types() {
        let unique = UniqueColumnTypes::default();
        assert_eq!(translate_sql_type(&"int4".into(), &[], &unique).0, "number");
        assert_eq!(translate_sql_type(&"text".into(), &[], &unique).0, "string");
        assert_eq!(translate_sql_type(&"bool".into(), &[], &unique).0, "boolean");
        assert_eq!(translate_sql_type(&"timestamptz".into(), &[], &unique).0, "Instant");
    }

    #[test]
    fn translate_array_types_wrap_nullable_element() {
        let unique = UniqueColumnTypes::default();
        let ty = translate_sql_type(&"_text".into(), &[], &unique);
        assert_eq!(ty.0, "(string | null)[]");
    }

    #[test]
    fn translate_unknown_type_falls_back_to_marker() {
        let unique = UniqueColumnTypes::default();
        let ty = translate_sql_type(&"box".into(), &[], &unique);
        assert_eq!(ty.0, "unknown /* box */");
    }

    #[test]
    fn translate_unique_column_type_overrides_hardcoded_mapping() {
        let unique = UniqueColumnTypes::build(&[UniqueTableColumnType {
            type_script_type_name: "EmployeeId".to_string(),
            table_name: "employee".to_string(),
            column_name: "id".to_string(),
        }]);
        let ty = translate_sql_type(&SqlType("employee(id)".to_string()), &[], &unique);
        assert_eq!(ty.0, "EmployeeId");
    }

    #[test]
    fn translate_custom_mapping_overrides_unknown_fallback() {
        let unique = UniqueColumnTypes::default();
        let mappings = vec![CustomSqlTypeMapping {
            type_script_type_name: "Cents".to_string(),
            sql_type_name: "money".to_string(),
        }];
        let ty = translate_sql_type(&"money".into(), &mappings, &unique);
        assert_eq!(ty.0, "Cents");
    }

    #[test]
    fn render_empty_col_types_matches_boundary_message() {
        let rendered = render_col_types(&BTreeMap::new(), format(Delimiter::Comma, false), 0);
        assert_eq!(rendered, "{} (Or no type argument at all)");
    }

    #[test]
    fn render_single_array_column_matches_scenario_2() {
        let mut computed = BTreeMap::new();
        computed.insert(
            "ids".to_string(),
            DeclaredColType {
                nullability: Nullability::Opt,
                declared_type: "(number | null)[]".into(),
            },
        );
        let rendered = render_col_types(&computed, format(Delimiter::Comma, false), 0);
        assert_eq!(rendered, "{\n  ids: Opt<(number | null)[]>\n}");
    }

    #[test]
    fn render_with_region_marker_wraps_output() {
        let mut computed = BTreeMap::new();
        computed.insert(
            "id".to_string(),
            DeclaredColType {
                nullability: Nullability::Req,
                declared_type: "number".into(),
            },
        );
        let rendered = render_col_types(&computed, format(Delimiter::Semicolon, true), 0);
        assert!(rendered.starts_with("// region: generated\n"));
        assert!(rendered.ends_with("// endregion"));
    }

    #[test]
    fn first_duplicate_detects_repeats_in_order() {
        let names = vec!["id", "name", "id"];
        assert_eq!(first_duplicate(&names), Some(vec!["id"]));
    }

    #[test]
    fn render_multi_column_quick_fix_sorts_by_name_and_indents_to_call_site() {
        let mut computed = BTreeMap::new();
        computed.insert(
            "createdAt".to_string(),
            DeclaredColType {
                nullability: Nullability::Req,
                declared_type: "Instant".into(),
            },
        );
        computed.insert(
            "id".to_string(),
            DeclaredColType {
                nullability: Nullability::Req,
                declared_type: "EmployeeId".into(),
            },
        );
        computed.insert(
            "tags".to_string(),
            DeclaredColType {
                nullability: Nullability::Opt,
                declared_type: "(string | null)[]".into(),
            },
        );
        let rendered = render_col_types(&computed, format(Delimiter::Semicolon, true), 1);
        assert_eq!(
            rendered,
            "// region: generated\n{\n    createdAt: Req<Instant>;\n    id: Req<EmployeeId>;\n    tags: Opt<(string | null)[]>\n  }\n// endregion"
        );
    }

    #[test]
    fn diff_insert_columns_flags_missing_required_column() {
        let table_cols = vec![
            TableColumn {
                name: "id".to_string(),
                sql_type: "int4".into(),
                not_null: true,
                has_default: false,
            },
            TableColumn {
                name: "name".to_string(),
                sql_type: "text".into(),
                not_null: true,
                has_default: false,
            },
        ];
        let mut supplied = BTreeMap::new();
        supplied.insert(
            "name".to_string(),
            SuppliedInsertColumn {
                supplied_type: "string".into(),
                not_null: true,
            },
        );

        let unique = UniqueColumnTypes::default();
        let errors = diff_insert_columns("department", &table_cols, &supplied, &[], &unique);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            InsertColError::MissingRequiredCol { table_name, col_name, col_type }
                if table_name == "department" && col_name == "id" && col_type == "int4"
        ));
    }

    #[test]
    fn diff_insert_columns_compares_translated_type_not_raw_sql_type() {
        let table_cols = vec![TableColumn {
            name: "id".to_string(),
            sql_type: "int4".into(),
            not_null: true,
            has_default: false,
        }];

        let mut agrees = BTreeMap::new();
        agrees.insert(
            "id".to_string(),
            SuppliedInsertColumn {
                supplied_type: "number".into(),
                not_null: true,
            },
        );
        let unique = UniqueColumnTypes::default();
        let errors = diff_insert_columns("t", &table_cols, &agrees, &[], &unique);
        assert!(errors.is_empty());

        let mut disagrees = BTreeMap::new();
        disagrees.insert(
            "id".to_string(),
            SuppliedInsertColumn {
                supplied_type: "string".into(),
                not_null: true,
            },
        );
        let errors = diff_insert_columns("t", &table_cols, &disagrees, &[], &unique);
        assert!(matches!(&errors[0], InsertColError::ColWrongType { expected_type, .. } if expected_type == "number"));
    }

    #[test]
    fn diff_insert_columns_flags_unknown_supplied_column() {
        let table_cols = vec![TableColumn {
            name: "id".to_string(),
            sql_type: "int4".into(),
            not_null: true,
            has_default: false,
        }];
        let mut supplied = BTreeMap::new();
        supplied.insert(
            "nope".to_string(),
            SuppliedInsertColumn {
                supplied_type: "string".into(),
                not_null: false,
            },
        );

        let unique = UniqueColumnTypes::default();
        let errors = diff_insert_columns("department", &table_cols, &supplied, &[], &unique);
        assert!(errors
            .iter()
            .any(|e| matches!(e, InsertColError::ColNotFound { col_name } if col_name == "nope")));
    }
}
