//! View dependency resolution and topological ordering (C4).
//!
//! Takes the frontend's `QualifiedSqlViewName -> SqlViewDefinition` map and
//! produces, per file, an ordered list of [`SqlCreateView`]s ready to
//! `CREATE VIEW`. The cycle/missing-dependency error shapes are grounded on
//! `dibs::solver::SolverError` (`CycleDetected`, `TableNotFound`), adapted
//! here from migration-ordering to view-ordering.

use crate::error::ResolveError;
use crate::naming::{escape_identifier, view_db_name};
use shadowcheck_proto::{QualifiedSqlViewName, SqlCreateView, ViewFragment};
use std::collections::{HashMap, HashSet};

/// Resolve every view in `definitions`, then topologically order the
/// results by file.
///
/// Resolution mutates a working copy of each definition's
/// `current_fragments`, substituting `ViewRef`s for the escaped, resolved
/// identifier of the dependency once that dependency is itself resolved.
/// Self-dependencies and missing dependencies are reported per-view and do
/// not abort resolution of unrelated views.
pub fn resolve_views(
    definitions: &HashMap<QualifiedSqlViewName, shadowcheck_proto::SqlViewDefinition>,
) -> ResolveOutcome {
    let mut resolved: HashMap<QualifiedSqlViewName, ResolvedView> = HashMap::new();
    let mut errors: HashMap<QualifiedSqlViewName, ResolveError> = HashMap::new();
    let mut order: Vec<QualifiedSqlViewName> = Vec::new();
    let mut in_progress: HashSet<QualifiedSqlViewName> = HashSet::new();

    for name in definitions.keys() {
        resolve_one(
            name,
            definitions,
            &mut resolved,
            &mut errors,
            &mut order,
            &mut in_progress,
            &mut Vec::new(),
        );
    }

    let mut by_file: HashMap<String, Vec<SqlCreateView>> = HashMap::new();
    for name in &order {
        if let Some(view) = resolved.get(name) {
            by_file
                .entry(view.create_view.file_name.clone())
                .or_default()
                .push(view.create_view.clone());
        }
    }

    ResolveOutcome { by_file, errors }
}

pub struct ResolveOutcome {
    /// Per-file ordered `CREATE VIEW` lists; a view never appears before a
    /// dependency it (directly or transitively) relies on.
    pub by_file: HashMap<String, Vec<SqlCreateView>>,
    pub errors: HashMap<QualifiedSqlViewName, ResolveError>,
}

struct ResolvedView {
    create_view: SqlCreateView,
}

#[allow(clippy::too_many_arguments)]
fn resolve_one(
    name: &QualifiedSqlViewName,
    definitions: &HashMap<QualifiedSqlViewName, shadowcheck_proto::SqlViewDefinition>,
    resolved: &mut HashMap<QualifiedSqlViewName, ResolvedView>,
    errors: &mut HashMap<QualifiedSqlViewName, ResolveError>,
    order: &mut Vec<QualifiedSqlViewName>,
    in_progress: &mut HashSet<QualifiedSqlViewName>,
    stack: &mut Vec<String>,
) -> Option<String> {
    if let Some(view) = resolved.get(name) {
        return Some(view.create_view.resolved_db_name.clone());
    }
    if errors.contains_key(name) {
        return None;
    }
    if in_progress.contains(name) {
        let mut cycle = stack.clone();
        cycle.push(name.to_string());
        errors.insert(name.clone(), ResolveError::Cycle(cycle));
        return None;
    }

    let Some(def) = definitions.get(name) else {
        return None;
    };

    in_progress.insert(name.clone());
    stack.push(name.to_string());

    let mut body = String::new();
    let mut ok = true;
    for fragment in &def.current_fragments {
        match fragment {
            ViewFragment::String { text } => body.push_str(text),
            ViewFragment::ViewRef { name: dep } => {
                if dep == name {
                    errors.insert(name.clone(), ResolveError::SelfDependency(name.to_string()));
                    ok = false;
                    break;
                }
                if !definitions.contains_key(dep) {
                    errors.insert(
                        name.clone(),
                        ResolveError::MissingDependency {
                            view: name.to_string(),
                            dependency: dep.to_string(),
                        },
                    );
                    ok = false;
                    break;
                }
                match resolve_one(dep, definitions, resolved, errors, order, in_progress, stack) {
                    Some(resolved_name) => body.push_str(&escape_identifier(&resolved_name)),
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
        }
    }

    stack.pop();
    in_progress.remove(name);

    if !ok {
        return None;
    }

    let resolved_db_name = view_db_name(Some(&name.local_name), &body);
    let create_view = SqlCreateView {
        qualified_name: name.clone(),
        resolved_db_name: resolved_db_name.clone(),
        create_query: body,
        file_name: def.file_name.clone(),
        file_contents: def.file_contents.clone(),
        source_map: def.source_map.clone(),
    };
    resolved.insert(name.clone(), ResolvedView { create_view });
    order.push(name.clone());

    Some(resolved_db_name)
}

/// `(select|\.|,)\s*\*` case-insensitively: the ban on `SELECT *` in view
/// bodies. Returns the byte offset of the first match.
pub fn find_select_star(body: &str) -> Option<u32> {
    static PATTERN: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::RegexBuilder::new(r"(select|\.|,)\s*\*")
            .case_insensitive(true)
            .build()
            .expect("static regex is valid")
    });
    PATTERN.find(body).map(|m| m.start() as u32)
}


/// Property: for any acyclic chain of dependent views, resolution without
/// errors orders every dependency before its dependents — i.e. the output
/// is a linear extension of the dependency relation (spec §8).
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use shadowcheck_proto::SqlViewDefinition;

    fn chain_of(n: usize) -> HashMap<QualifiedSqlViewName, SqlViewDefinition> {
        let names: Vec<_> = (0..n).map(|i| QualifiedSqlViewName::new("m", format!("v{i}"))).collect();
        let mut defs = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            let fragments = if i == 0 {
                vec![ViewFragment::String { text: format!("select {i}") }]
            } else {
                vec![
                    ViewFragment::String { text: format!("select {i} from ") },
                    ViewFragment::ViewRef { name: names[i - 1].clone() },
                ]
            };
            defs.insert(
                name.clone(),
                SqlViewDefinition::new(name.clone(), "m.ts", "", None, fragments),
            );
        }
        defs
    }

    proptest! {
        #[test]
        fn chain_resolves_in_dependency_order(n in 1usize..20) {
            let defs = chain_of(n);
            let outcome = resolve_views(&defs);
            prop_assert!(outcome.errors.is_empty());
            let ordered = &outcome.by_file["m.ts"];
            prop_assert_eq!(ordered.len(), n);
            for i in 1..n {
                let dep_name = QualifiedSqlViewName::new("m", format!("v{}", i - 1));
                let this_name = QualifiedSqlViewName::new("m", format!("v{i}"));
                let dep_pos = ordered.iter().position(|v| v.qualified_name == dep_name).unwrap();
                let this_pos = ordered.iter().position(|v| v.qualified_name == this_name).unwrap();
                prop_assert!(dep_pos < this_pos);
            }
        }

        #[test]
        fn resolution_byte_output_is_stable_across_reruns(n in 1usize..12) {
            let defs = chain_of(n);
            let first = resolve_views(&defs);
            let second = resolve_views(&defs);
            for (file, views) in &first.by_file {
                let other = &second.by_file[file];
                let first_bodies: Vec<_> = views.iter().map(|v| v.create_query.clone()).collect();
                let second_bodies: Vec<_> = other.iter().map(|v| v.create_query.clone()).collect();
                prop_assert_eq!(first_bodies, second_bodies);
            }
        }
    }
}
