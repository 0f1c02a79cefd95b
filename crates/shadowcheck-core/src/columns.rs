//! Table/view column library (C6): `(relation_oid, attnum) -> NOT NULL`,
//! plus the `pg_type` oid lookup table used by the analyzer (C7).
//!
//! `refresh_tables` is grounded on `dibs::introspect::introspect_columns`,
//! narrowed from a full `Schema` introspection down to just the NOT NULL
//! bit keyed by `(attrelid, attnum)`. `refresh_views` has no teacher analog:
//! PostgreSQL has no direct catalog column recording view-column
//! provenance, so it mines `pg_rewrite.ev_action`'s textual node-tree
//! representation via a recursive CTE, as the spec allows (§4.5). This is
//! the part of the system documented as PG-version sensitive (DESIGN.md).

use shadowcheck_proto::SqlType;
use std::collections::HashMap;
use tokio_postgres::Client;

/// `(relation oid, attribute number) -> NOT NULL`. One instance each for
/// base tables and for views; views are refreshed separately because their
/// NOT NULL bit is derived, not stored directly.
#[derive(Debug, Clone, Default)]
pub struct ColsLibrary {
    not_null: HashMap<(u32, i16), bool>,
}

impl ColsLibrary {
    /// Any derivation gap yields `not_null = false`, matching the spec's
    /// documented failure mode for C6.
    pub fn is_not_null(&self, relid: u32, attnum: i16) -> bool {
        self.not_null.get(&(relid, attnum)).copied().unwrap_or(false)
    }
}

/// Populate the base-table NOT NULL library by reading `pg_attribute`
/// joined to `pg_class` filtered to `relkind = 'r'`.
pub async fn refresh_tables(client: &Client) -> Result<ColsLibrary, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
            SELECT c.oid, a.attnum, a.attnotnull
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            WHERE c.relkind = 'r'
              AND a.attnum > 0
              AND NOT a.attisdropped
            "#,
            &[],
        )
        .await?;

    let mut not_null = HashMap::new();
    for row in rows {
        let oid: u32 = row.get::<_, u32>(0);
        let attnum: i16 = row.get(1);
        let notnull: bool = row.get(2);
        not_null.insert((oid, attnum), notnull);
    }

    Ok(ColsLibrary { not_null })
}

/// Populate the view NOT NULL library using a recursive CTE that mines
/// `pg_rewrite.ev_action`'s node-tree for the base table column each view
/// column ultimately derives from, looking up that base column's NOT NULL
/// in `tables`.
///
/// `ev_action`'s textual format is not a stable, documented interface; this
/// query is pinned to the server versions shadowcheck declares support for
/// (see DESIGN.md's Open Question resolution). Any view column whose
/// provenance can't be determined is left absent, and [`ColsLibrary::is_not_null`]
/// then reports `false` for it, per spec.
pub async fn refresh_views(
    client: &Client,
    tables: &ColsLibrary,
) -> Result<ColsLibrary, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
            WITH RECURSIVE view_targetlist AS (
                SELECT
                    c.oid AS view_oid,
                    tle.ordinality::int - 1 AS view_col_num,
                    tle.elem #>> '{Var,varno}' AS var_no,
                    tle.elem #>> '{Var,varattno}' AS var_attno
                FROM pg_class c
                JOIN pg_rewrite r ON r.ev_class = c.oid AND r.ev_type = '1'
                CROSS JOIN LATERAL jsonb_array_elements(
                    regexp_replace(r.ev_action, '<>', 'null', 'g')::jsonb
                        #> '{0,targetList}'
                ) WITH ORDINALITY AS tle(elem, ordinality)
                WHERE c.relkind = 'v'
            ),
            base_cols AS (
                SELECT
                    vt.view_oid,
                    vt.view_col_num,
                    rtab.relid AS base_oid,
                    vt.var_attno::int AS base_attnum
                FROM view_targetlist vt
                JOIN pg_rewrite rw ON rw.ev_class = vt.view_oid AND rw.ev_type = '1'
                CROSS JOIN LATERAL jsonb_array_elements(
                    regexp_replace(rw.ev_action, '<>', 'null', 'g')::jsonb #> '{0,rtable}'
                ) WITH ORDINALITY AS rtl(elem, ord)
                JOIN pg_class rtab ON rtab.relname = rtl.elem #>> '{relname}'
                WHERE rtl.ord::int = vt.var_no::int
            )
            SELECT view_oid, view_col_num, base_oid, base_attnum
            FROM base_cols
            "#,
            &[],
        )
        .await?;

    let mut not_null = HashMap::new();
    for row in rows {
        let view_oid: u32 = row.get(0);
        let view_col_num: i32 = row.get(1);
        let base_oid: u32 = row.get(2);
        let base_attnum: i32 = row.get(3);
        let nn = tables.is_not_null(base_oid, base_attnum as i16);
        not_null.insert((view_oid, view_col_num as i16), nn);
    }

    Ok(ColsLibrary { not_null })
}

/// `oid -> SqlType`, loaded from `pg_type` once per shadow-DB rebuild.
#[derive(Debug, Clone, Default)]
pub struct PgTypes {
    by_oid: HashMap<u32, SqlType>,
}

impl PgTypes {
    pub fn lookup(&self, oid: u32) -> Option<&SqlType> {
        self.by_oid.get(&oid)
    }
}

pub async fn load_pg_types(client: &Client) -> Result<PgTypes, tokio_postgres::Error> {
    let rows = client
        .query("SELECT oid, typname FROM pg_type", &[])
        .await?;

    let mut by_oid = HashMap::new();
    for row in rows {
        let oid: u32 = row.get(0);
        let name: String = row.get(1);
        by_oid.insert(oid, SqlType(name));
    }

    Ok(PgTypes { by_oid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_defaults_to_nullable() {
        let lib = ColsLibrary::default();
        assert!(!lib.is_not_null(12345, 1));
    }

    #[test]
    fn known_column_reports_its_recorded_not_null_bit() {
        let mut not_null = HashMap::new();
        not_null.insert((100, 1i16), true);
        not_null.insert((100, 2i16), false);
        let lib = ColsLibrary { not_null };
        assert!(lib.is_not_null(100, 1));
        assert!(!lib.is_not_null(100, 2));
    }

    #[test]
    fn pg_types_lookup_is_keyed_by_oid() {
        let mut by_oid = HashMap::new();
        by_oid.insert(23, SqlType("int4".to_string()));
        let types = PgTypes { by_oid };
        assert_eq!(types.lookup(23).unwrap().0, "int4");
        assert!(types.lookup(99).is_none());
    }
}
