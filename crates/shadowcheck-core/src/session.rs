//! Worker session (C9): request dispatch tying C2–C8 together behind the
//! single-writer request/response loop described in spec §4.9/§5.
//!
//! Grounded on `dibs-cli::service::run_service`'s "one connection, one
//! in-flight request, own the resource for the process's lifetime" shape,
//! adapted from a TCP `roam` service to a plain async method call (the
//! actual socket/stdio framing lives in `shadowcheck-cli`).

use crate::analyzer::{self, AnalyzerContext, UniqueColumnTypes};
use crate::cache::{self, InsertCache, QueryCache};
use crate::cluster;
use crate::diagnostics;
use crate::error::Error;
use crate::shadow_db::{self, ShadowDb};
use crate::views;
use shadowcheck_proto::{
    QualifiedSqlViewName, SqlViewDefinition, ViewAnswer, WorkerConfig, WorkerError, WorkerOk,
    WorkerRequest, WorkerResponse,
};
use std::collections::HashMap;
use std::path::PathBuf;

const SHADOW_DB_PORT: u16 = 28814;

struct KnownView {
    resolved_db_name: String,
    answer: ViewAnswer,
}

/// The worker's entire mutable state between requests. One instance per
/// process; `dispatch` is the only entry point and is never called
/// concurrently with itself (§5: single-threaded cooperative).
pub struct WorkerSession {
    db: Option<ShadowDb>,
    project_dir: Option<PathBuf>,
    config: Option<WorkerConfig>,
    view_definitions: HashMap<QualifiedSqlViewName, SqlViewDefinition>,
    known_views: HashMap<QualifiedSqlViewName, KnownView>,
    query_cache: QueryCache,
    insert_cache: InsertCache,
}

impl Default for WorkerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSession {
    pub fn new() -> Self {
        Self {
            db: None,
            project_dir: None,
            config: None,
            view_definitions: HashMap::new(),
            known_views: HashMap::new(),
            query_cache: QueryCache::default(),
            insert_cache: InsertCache::default(),
        }
    }

    /// Route one request to its handler, per §4.9. Every path that can fail
    /// on infrastructure (PG connection, cluster, I/O) maps to `RunnerError`;
    /// every path that produces a per-request validation outcome maps to
    /// `InvalidQueryError`.
    pub async fn dispatch(&mut self, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::Initialize {
                project_dir,
                config,
                config_file_path: _,
                sql_views,
                force,
            } => self.initialize(project_dir, config, sql_views, force).await,
            WorkerRequest::UpdateViews {
                strict_date_time_checking,
                sql_views,
            } => self.update_views(strict_date_time_checking, sql_views).await,
            WorkerRequest::CheckQuery { resolved } => self.check_query(resolved).await,
            WorkerRequest::CheckInsert { resolved } => self.check_insert(resolved).await,
            WorkerRequest::End => self.end().await,
        }
    }

    async fn initialize(
        &mut self,
        project_dir: String,
        config: WorkerConfig,
        sql_views: Vec<SqlViewDefinition>,
        force: bool,
    ) -> WorkerResponse {
        // Idempotent re-INITIALIZE: a live session with force=false is a no-op,
        // per §4.9 ("idempotent when the in-process promise already exists").
        if self.db.is_some() && !force {
            return Ok(WorkerOk::Initialized);
        }

        let project_dir = PathBuf::from(project_dir);
        let migrations_dir = project_dir.join(&config.migrations_dir);

        self.view_definitions = sql_views
            .into_iter()
            .map(|v| (v.qualified_name.clone(), v))
            .collect();

        let (db, view_answers) = match shadow_db::rebuild(
            &project_dir,
            SHADOW_DB_PORT,
            &migrations_dir,
            config.strict_date_time_checking,
            &config.unique_table_column_types,
            &self.view_definitions,
            force,
        )
        .await
        {
            Ok(ok) => ok,
            Err(err) => return Err(runner_error(&err)),
        };

        if db.rebuilt {
            self.query_cache.clear();
            self.insert_cache.clear();
        }

        // `rebuild` only returns the answer per view; recompute the resolved
        // DB-names locally (pure, no I/O) so removal/update tracking in
        // `update_views` has something to DROP VIEW by.
        let outcome = views::resolve_views(&self.view_definitions);
        let mut resolved_db_names: HashMap<QualifiedSqlViewName, String> = HashMap::new();
        for file_views in outcome.by_file.values() {
            for view in file_views {
                resolved_db_names.insert(view.qualified_name.clone(), view.resolved_db_name.clone());
            }
        }

        self.known_views = view_answers
            .into_iter()
            .map(|(name, answer)| {
                let resolved_db_name = resolved_db_names.get(&name).cloned().unwrap_or_default();
                (name, KnownView { resolved_db_name, answer })
            })
            .collect();

        self.project_dir = Some(project_dir);
        self.config = Some(config);
        self.db = Some(db);

        Ok(WorkerOk::Initialized)
    }

    /// Diff the incoming view set against what's already known, drop
    /// removed views, (re)create changed or new ones, and return diagnostics
    /// aggregated across the full current set, per §4.9.
    async fn update_views(
        &mut self,
        strict_date_time_checking: bool,
        sql_views: Vec<SqlViewDefinition>,
    ) -> WorkerResponse {
        let Some(db) = self.db.as_ref() else {
            return Err(WorkerError::RunnerError {
                message: "UPDATE_VIEWS received before a successful INITIALIZE".to_string(),
            });
        };

        let strict_changed = self
            .config
            .as_ref()
            .map(|c| c.strict_date_time_checking != strict_date_time_checking)
            .unwrap_or(false);

        if strict_changed {
            if let Err(err) = shadow_db::drop_all_resolved_views(&db.client).await {
                return Err(runner_error(&err));
            }
            self.known_views.clear();
            self.query_cache.clear();
            self.insert_cache.clear();
            if let Some(config) = self.config.as_mut() {
                config.strict_date_time_checking = strict_date_time_checking;
            }
        }

        let new_defs: HashMap<QualifiedSqlViewName, SqlViewDefinition> = sql_views
            .into_iter()
            .map(|v| (v.qualified_name.clone(), v))
            .collect();

        let removed: Vec<QualifiedSqlViewName> = self
            .known_views
            .keys()
            .filter(|name| !new_defs.contains_key(name))
            .cloned()
            .collect();
        for name in &removed {
            if let Some(known) = self.known_views.remove(name) {
                if let Err(err) = shadow_db::drop_view(&db.client, &known.resolved_db_name).await {
                    return Err(runner_error(&err));
                }
            }
        }

        self.view_definitions = new_defs;
        let outcome = views::resolve_views(&self.view_definitions);

        let mut diagnostics_out = Vec::new();
        let mut fresh_known = HashMap::new();

        for file_views in outcome.by_file.values() {
            for view in file_views {
                let reuse = self
                    .known_views
                    .get(&view.qualified_name)
                    .filter(|known| known.resolved_db_name == view.resolved_db_name);

                let answer = if let Some(known) = reuse {
                    known.answer.clone()
                } else {
                    match shadow_db::create_one_view(&db.client, view).await {
                        Ok(answer) => answer,
                        Err(err) => return Err(runner_error(&err)),
                    }
                };

                diagnostics_out.extend(diagnostics::view_diagnostics(&answer, view));
                fresh_known.insert(
                    view.qualified_name.clone(),
                    KnownView {
                        resolved_db_name: view.resolved_db_name.clone(),
                        answer,
                    },
                );
            }
        }

        for (name, err) in outcome.errors {
            let answer = ViewAnswer::CreateError {
                view_name: name.to_string(),
                perr: err.to_string(),
            };
            if let Some(def) = self.view_definitions.get(&name) {
                let placeholder = shadowcheck_proto::SqlCreateView {
                    qualified_name: name.clone(),
                    resolved_db_name: name.to_string(),
                    create_query: String::new(),
                    file_name: def.file_name.clone(),
                    file_contents: def.file_contents.clone(),
                    source_map: def.source_map.clone(),
                };
                diagnostics_out.extend(diagnostics::view_diagnostics(&answer, &placeholder));
            }
        }

        let view_answers: Vec<(QualifiedSqlViewName, ViewAnswer)> = fresh_known
            .iter()
            .map(|(name, known)| (name.clone(), known.answer.clone()))
            .collect();
        self.known_views = fresh_known;

        if diagnostics_out.is_empty() {
            Ok(WorkerOk::ViewsUpdated { view_answers })
        } else {
            Err(WorkerError::InvalidQueryError { diagnostics: diagnostics_out })
        }
    }

    async fn check_query(&mut self, resolved: shadowcheck_proto::ResolvedSelect) -> WorkerResponse {
        let Some(db) = self.db.as_ref() else {
            return Err(WorkerError::RunnerError {
                message: "CHECK_QUERY received before a successful INITIALIZE".to_string(),
            });
        };
        let Some(config) = self.config.as_ref() else {
            return Err(WorkerError::RunnerError {
                message: "CHECK_QUERY received before a successful INITIALIZE".to_string(),
            });
        };

        let key = cache::query_cache_key(&resolved);
        let answer = if let Some(cached) = self.query_cache.get(&key) {
            cached.clone()
        } else {
            let unique_types = UniqueColumnTypes::build(&config.unique_table_column_types);
            let ctx = AnalyzerContext {
                client: &db.client,
                tables: &db.tables,
                views: &db.views_cols,
                pg_types: &db.pg_types,
                unique_types: &unique_types,
                custom_mappings: &config.custom_sql_type_mappings,
                col_types_format: config.col_types_format,
            };
            let answer = analyzer::process_query(&ctx, &resolved).await;
            self.query_cache.insert(key, answer.clone());
            answer
        };

        let diagnostics = diagnostics::select_diagnostics(&answer, &resolved);
        if diagnostics.is_empty() {
            Ok(WorkerOk::QueryChecked { diagnostics })
        } else {
            Err(WorkerError::InvalidQueryError { diagnostics })
        }
    }

    async fn check_insert(&mut self, resolved: shadowcheck_proto::ResolvedInsert) -> WorkerResponse {
        let Some(db) = self.db.as_ref() else {
            return Err(WorkerError::RunnerError {
                message: "CHECK_INSERT received before a successful INITIALIZE".to_string(),
            });
        };
        let Some(config) = self.config.as_ref() else {
            return Err(WorkerError::RunnerError {
                message: "CHECK_INSERT received before a successful INITIALIZE".to_string(),
            });
        };

        let key = cache::insert_cache_key(&resolved);
        let answer = if let Some(cached) = self.insert_cache.get(&key) {
            cached.clone()
        } else {
            let unique_types = UniqueColumnTypes::build(&config.unique_table_column_types);
            let ctx = AnalyzerContext {
                client: &db.client,
                tables: &db.tables,
                views: &db.views_cols,
                pg_types: &db.pg_types,
                unique_types: &unique_types,
                custom_mappings: &config.custom_sql_type_mappings,
                col_types_format: config.col_types_format,
            };
            let answer = analyzer::process_insert(&ctx, &resolved).await;
            self.insert_cache.insert(key, answer.clone());
            answer
        };

        let diagnostics = diagnostics::insert_diagnostics(&answer, &resolved);
        if diagnostics.is_empty() {
            Ok(WorkerOk::InsertChecked { diagnostics })
        } else {
            Err(WorkerError::InvalidQueryError { diagnostics })
        }
    }

    async fn end(&mut self) -> WorkerResponse {
        if let Some(db) = self.db.take() {
            if let Err(err) = cluster::stop(&db.cluster).await {
                tracing::warn!(error = %err, "failed to stop embedded postmaster on END");
            }
        }
        self.project_dir = None;
        self.config = None;
        self.view_definitions.clear();
        self.known_views.clear();
        self.query_cache.clear();
        self.insert_cache.clear();
        Ok(WorkerOk::Ended)
    }
}

fn runner_error(err: &Error) -> WorkerError {
    WorkerError::RunnerError { message: err.to_string() }
}
