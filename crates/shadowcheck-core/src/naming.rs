//! Deterministic view naming and SQL identifier escaping (C2).

use once_cell::sync::Lazy;
use regex::Regex;
use sha1::{Digest, Sha1};

const PREFIX: &str = "$$mfv_";
const HASH_LEN: usize = 12;
const PG_IDENT_MAX: usize = 63;

/// Quote a PostgreSQL identifier, doubling any embedded `"`.
///
/// Grounded on `dibs::quote_ident`; always quotes, since the resolved view
/// names here start with `$$`, which is not a valid bare identifier.
pub fn escape_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Compute the deterministic DB-visible name for a resolved view body.
///
/// `"$$mfv_" + [varName + "_"]? + sha1(createQueryBody)[:12]`, truncated on
/// the variable-name segment so the final identifier is at most 63 bytes —
/// Postgres' `NAMEDATALEN`-derived identifier limit.
pub fn view_db_name(var_name: Option<&str>, create_query_body: &str) -> String {
    let hex = hex_digest(create_query_body);
    let suffix = &hex[..HASH_LEN];

    let Some(var_name) = var_name else {
        return format!("{PREFIX}{suffix}");
    };

    let fixed_len = PREFIX.len() + 1 /* trailing underscore */ + suffix.len();
    let max_var_len = PG_IDENT_MAX.saturating_sub(fixed_len);

    let var_part = truncate_at_char_boundary(var_name, max_var_len);
    format!("{PREFIX}{var_part}_{suffix}")
}

fn hex_digest(body: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn truncate_at_char_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut len = max_len.min(s.len());
    while len > 0 && !s.is_char_boundary(len) {
        len -= 1;
    }
    &s[..len]
}

static VIEW_NAME_IN_DETAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\$mfv_[A-Za-z0-9_]+").expect("static regex is valid"));

/// Recover a `$$mfv_...` view name from arbitrary PostgreSQL error detail
/// text, e.g. `"view v depends on view $$mfv_orders_a1b2c3d4e5f6"`.
pub fn recover_view_name_from_detail(detail: &str) -> Option<&str> {
    VIEW_NAME_IN_DETAIL.find(detail).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_identifier_doubles_quotes() {
        assert_eq!(escape_identifier(r#"weird"name"#), r#""weird""name""#);
    }

    #[test]
    fn view_db_name_without_var_name_is_prefix_plus_hash() {
        let name = view_db_name(None, "select 1");
        assert!(name.starts_with(PREFIX));
        assert_eq!(name.len(), PREFIX.len() + HASH_LEN);
    }

    #[test]
    fn view_db_name_is_deterministic() {
        let a = view_db_name(Some("orders"), "select * from t");
        let b = view_db_name(Some("orders"), "select * from t");
        assert_eq!(a, b);
    }

    #[test]
    fn view_db_name_differs_on_body_change() {
        let a = view_db_name(Some("orders"), "select 1");
        let b = view_db_name(Some("orders"), "select 2");
        assert_ne!(a, b);
    }

    #[test]
    fn view_db_name_truncates_to_63_bytes_and_keeps_hash_suffix() {
        let long_var = "a".repeat(200);
        let name = view_db_name(Some(&long_var), "select 1");
        assert!(name.len() <= PG_IDENT_MAX);
        assert!(name.starts_with(PREFIX));
        let suffix = &name[name.len() - HASH_LEN..];
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn recover_view_name_from_detail_finds_embedded_name() {
        let detail = "cannot drop view t because other objects depend on it\nDETAIL: view $$mfv_orders_0123456789ab depends on view t";
        let found = recover_view_name_from_detail(detail).unwrap();
        assert_eq!(found, "$$mfv_orders_0123456789ab");
    }

    #[test]
    fn recover_view_name_from_detail_returns_none_when_absent() {
        assert!(recover_view_name_from_detail("unrelated error").is_none());
    }
}
