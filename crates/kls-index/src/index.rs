use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use url::Url;

use kls_compiler::{Declaration, JarClassScanner, ModuleScope, SymbolKind, Visibility};
use kls_core::{Location, Position, Range};
use kls_db::Database;
use kls_scheduler::{BackgroundTask, CancellationToken, Scheduler};

use crate::symbol::{Symbol, SymbolIndexMetadata};

/// Bounded wait for UI-path queries; expiry degrades to an empty answer.
pub const INDEX_QUERY_TIMEOUT_MS: u64 = 100;
/// Minimum interval between rebuild progress reports.
pub const PROGRESS_UPDATE_INTERVAL_MS: u64 = 100;
/// Packages per insert transaction during a full rebuild.
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct RefreshParams {
    pub exclusions: Vec<String>,
    pub build_file_version: i64,
    pub skip_if_valid: bool,
    /// Zero falls back to [`DEFAULT_BATCH_SIZE`].
    pub batch_size: usize,
}

impl Default for RefreshParams {
    fn default() -> Self {
        Self {
            exclusions: Vec::new(),
            build_file_version: 0,
            skip_if_valid: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// The persistent symbol store.
///
/// One read-write lock guards all symbol-table writes. Readers take the read
/// lock with a bounded wait and return an empty result on timeout so an
/// index rebuild can never stall a UI-path query; the write lock is released
/// between rebuild batches so readers observe the partial index.
pub struct SymbolIndex {
    db: Arc<Database>,
    index_lock: RwLock<()>,
    active_refreshes: AtomicUsize,
    current_token: Mutex<Option<CancellationToken>>,
    scheduler: Scheduler,
}

impl SymbolIndex {
    pub fn new(db: Arc<Database>, scheduler: Scheduler) -> Arc<Self> {
        Arc::new(Self {
            db,
            index_lock: RwLock::new(()),
            active_refreshes: AtomicUsize::new(0),
            current_token: Mutex::new(None),
            scheduler,
        })
    }

    pub fn is_indexing(&self) -> bool {
        self.active_refreshes.load(Ordering::SeqCst) > 0
    }

    /// The index is valid for probe version `v` iff the metadata row exists,
    /// its build-file version is at least `v`, and it recorded symbols.
    pub fn is_index_valid(&self, build_file_version: i64) -> bool {
        self.metadata().is_some_and(|meta| {
            meta.build_file_version >= build_file_version && meta.symbol_count > 0
        })
    }

    pub fn metadata(&self) -> Option<SymbolIndexMetadata> {
        let conn = self.db.connection().ok()?;
        conn.query_row(
            "SELECT buildfileversion, indexedat, symbolcount FROM SymbolIndexMetadata WHERE id = 1",
            [],
            |row| {
                Ok(SymbolIndexMetadata {
                    build_file_version: row.get(0)?,
                    indexed_at: row.get(1)?,
                    symbol_count: row.get(2)?,
                })
            },
        )
        .optional()
        .ok()
        .flatten()
    }

    pub fn indexed_symbol_count(&self) -> i64 {
        self.metadata().map_or(0, |meta| meta.symbol_count)
    }

    pub fn symbol_count(&self) -> i64 {
        let Ok(conn) = self.db.connection() else {
            return 0;
        };
        conn.query_row("SELECT COUNT(*) FROM Symbols", [], |row| row.get(0))
            .unwrap_or(0)
    }

    /// Cancels the in-flight rebuild, if any. Idempotent.
    pub fn cancel_current_refresh(&self) {
        if let Some(token) = self.current_token.lock().as_ref() {
            token.cancel();
        }
    }

    /// Full rebuild: enumerate packages depth-first, clear the tables, then
    /// re-insert in batches.
    ///
    /// A new refresh supersedes any in-flight one. The returned task resolves
    /// when the rebuild finishes, is cancelled, or fails.
    pub fn refresh(
        self: &Arc<Self>,
        scope: Arc<dyn ModuleScope>,
        params: RefreshParams,
    ) -> Option<BackgroundTask<()>> {
        if params.skip_if_valid
            && params.build_file_version > 0
            && self.is_index_valid(params.build_file_version)
        {
            tracing::debug!(
                target = "kls.index",
                version = params.build_file_version,
                "index already valid; skipping refresh"
            );
            return None;
        }

        let token = CancellationToken::new();
        {
            let mut current = self.current_token.lock();
            if let Some(previous) = current.take() {
                previous.cancel();
            }
            *current = Some(token.clone());
        }

        self.active_refreshes.fetch_add(1, Ordering::SeqCst);
        let index = Arc::clone(self);
        // The refresh token is deliberately not the task token: the closure
        // must always run so the `active_refreshes` count settles, even when
        // cancellation lands between token creation and spawn.
        let task = self.scheduler.spawn_background(move |_task_token| {
            let result = index.run_refresh(scope.as_ref(), &params, &token);
            index.active_refreshes.fetch_sub(1, Ordering::SeqCst);
            if let Err(err) = result {
                tracing::warn!(target = "kls.index", error = %err, "index refresh failed");
            }
            Ok(())
        });
        Some(task)
    }

    fn run_refresh(
        &self,
        scope: &dyn ModuleScope,
        params: &RefreshParams,
        token: &CancellationToken,
    ) -> Result<(), kls_db::DbError> {
        let progress = self.scheduler.progress().start("Indexing symbols");
        let throttle = Duration::from_millis(PROGRESS_UPDATE_INTERVAL_MS);

        let packages = enumerate_packages(scope);
        if token.is_cancelled() {
            return Ok(());
        }

        // Clear the tables; a cancellation observed before the clear aborts
        // without touching existing data.
        {
            let _write = self.index_lock.write();
            if token.is_cancelled() {
                return Ok(());
            }
            let conn = self.db.connection()?;
            conn.execute_batch(
                "BEGIN;
                 DELETE FROM Symbols;
                 DELETE FROM Locations;
                 DELETE FROM Ranges;
                 DELETE FROM Positions;
                 DELETE FROM IndexedJars;
                 COMMIT;",
            )?;
        }

        let batch_size = if params.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            params.batch_size
        };
        let total_batches = packages.len().div_ceil(batch_size);

        for (batch_no, batch) in packages.chunks(batch_size).enumerate() {
            if token.is_cancelled() {
                tracing::debug!(target = "kls.index", batch = batch_no, "refresh cancelled");
                return Ok(());
            }

            // The write lock is released between batches so queries can see
            // the partially populated index.
            {
                let _write = self.index_lock.write();
                let mut conn = self.db.connection()?;
                let tx = conn.transaction()?;
                for package in batch {
                    for decl in scope.declarations_in_package(package) {
                        if params.exclusions.contains(&decl.fq_name) {
                            continue;
                        }
                        let symbol = Symbol::from_declaration(&decl, None, None);
                        insert_symbol(&tx, &symbol)?;
                    }
                }
                tx.commit()?;
            }

            let percentage = if total_batches == 0 {
                100
            } else {
                ((batch_no + 1) * 100 / total_batches) as u32
            };
            progress.report_throttled(
                throttle,
                Some(format!("indexed {} packages", (batch_no + 1) * batch_size)),
                Some(percentage),
            );
        }

        if token.is_cancelled() {
            return Ok(());
        }

        self.write_metadata(params.build_file_version)?;
        progress.finish(Some("symbol index up to date".to_string()));
        Ok(())
    }

    fn write_metadata(&self, build_file_version: i64) -> Result<(), kls_db::DbError> {
        let count = self.symbol_count();
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO SymbolIndexMetadata (id, buildfileversion, indexedat, symbolcount)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 buildfileversion = ?1, indexedat = ?2, symbolcount = ?3",
            params![build_file_version, epoch_millis(), count],
        )?;
        Ok(())
    }

    /// Incremental pass over a changed JAR set.
    ///
    /// Every package that any of `jars` contributes to is re-enumerated from
    /// `scope` and each declaration is attributed to its source JAR: the
    /// unique candidate when there is one, else the candidate whose classfile
    /// table contains the declaration, else any candidate.
    pub fn index_jars(
        &self,
        jars: &[PathBuf],
        scope: &dyn ModuleScope,
        package_to_jars: &HashMap<String, Vec<PathBuf>>,
        scanner: &dyn JarClassScanner,
        token: &CancellationToken,
    ) -> Result<(), kls_db::DbError> {
        let mut per_jar_counts: HashMap<PathBuf, i64> = HashMap::new();

        for (package, owners) in package_to_jars {
            if token.is_cancelled() {
                return Ok(());
            }
            let candidates: Vec<&PathBuf> =
                owners.iter().filter(|owner| jars.contains(owner)).collect();
            if candidates.is_empty() {
                continue;
            }

            let declarations = scope.declarations_in_package(package);
            if declarations.is_empty() {
                continue;
            }

            let _write = self.index_lock.write();
            let mut conn = self.db.connection()?;
            let tx = conn.transaction()?;
            for decl in &declarations {
                let jar = attribute_jar(&candidates, &decl.fq_name, scanner);
                let symbol = Symbol::from_declaration(decl, Some(jar.clone()), None);
                if insert_symbol(&tx, &symbol)? {
                    *per_jar_counts.entry(jar).or_insert(0) += 1;
                }
            }
            tx.commit()?;
        }

        let conn = self.db.connection()?;
        let now = epoch_millis();
        for (jar, count) in per_jar_counts {
            conn.execute(
                "INSERT INTO IndexedJars (jarpath, indexedat, symbolcount)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(jarpath) DO UPDATE SET
                     indexedat = ?2,
                     symbolcount = IndexedJars.symbolcount + ?3",
                params![jar.to_string_lossy(), now, count],
            )?;
        }
        Ok(())
    }

    /// Bulk-removes every symbol attributed to the given JARs.
    pub fn remove_symbols_from_jars(&self, jars: &[PathBuf]) -> Result<(), kls_db::DbError> {
        let _write = self.index_lock.write();
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        for jar in jars {
            let jar = jar.to_string_lossy().into_owned();
            delete_symbols_and_locations(&tx, "Symbols.sourcejar = ?1", &[&jar])?;
            tx.execute("DELETE FROM IndexedJars WHERE jarpath = ?1", params![jar])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Per-file delta from a recompile: old declarations out, new ones in.
    pub fn apply_file_delta(
        &self,
        module_id: Option<&str>,
        uri: &Url,
        old: &[Declaration],
        new: &[Declaration],
    ) -> Result<(), kls_db::DbError> {
        let _write = self.index_lock.write();
        let mut conn = self.db.connection()?;
        let tx = conn.transaction()?;
        tracing::trace!(
            target = "kls.index",
            uri = %uri,
            removed = old.len(),
            added = new.len(),
            "applying file delta"
        );
        for decl in old {
            delete_symbols_and_locations(
                &tx,
                "Symbols.fqname = ?1 AND Symbols.moduleid IS ?2",
                &[&decl.fq_name, &module_id],
            )?;
        }
        for decl in new {
            let symbol =
                Symbol::from_declaration(decl, None, module_id.map(str::to_string));
            insert_symbol(&tx, &symbol)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Prefix query over short names with bounded lock wait.
    ///
    /// `module_id` widens to dependency symbols (`moduleid IS NULL`); the
    /// receiver filter matches exactly, including the no-receiver case.
    pub fn query(
        &self,
        prefix: &str,
        receiver_type: Option<&str>,
        limit: usize,
        suffix: &str,
        module_id: Option<&str>,
    ) -> Vec<Symbol> {
        let Some(_read) = self
            .index_lock
            .try_read_for(Duration::from_millis(INDEX_QUERY_TIMEOUT_MS))
        else {
            tracing::info!(
                target = "kls.index",
                prefix,
                "index query timed out waiting for the write lock; returning empty"
            );
            return Vec::new();
        };

        match self.query_locked(prefix, receiver_type, limit, suffix, module_id) {
            Ok(symbols) => symbols,
            Err(err) => {
                tracing::info!(target = "kls.index", error = %err, "index query failed; returning empty");
                Vec::new()
            }
        }
    }

    fn query_locked(
        &self,
        prefix: &str,
        receiver_type: Option<&str>,
        limit: usize,
        suffix: &str,
        module_id: Option<&str>,
    ) -> Result<Vec<Symbol>, kls_db::DbError> {
        let conn = self.db.connection()?;
        let pattern = format!("{prefix}{suffix}");

        let mut sql = String::from(
            "SELECT s.fqname, s.shortname, s.kind, s.visibility, s.extensionreceivertype,
                    s.sourcejar, s.moduleid,
                    l.uri, ps.line, ps.character, pe.line, pe.character
             FROM Symbols s
             LEFT JOIN Locations l ON s.location = l.id
             LEFT JOIN Ranges r ON l.range = r.id
             LEFT JOIN Positions ps ON r.start = ps.id
             LEFT JOIN Positions pe ON r.\"end\" = pe.id
             WHERE s.shortname LIKE ?1
               AND s.extensionreceivertype IS ?2",
        );
        if module_id.is_some() {
            sql.push_str(" AND (s.moduleid = ?4 OR s.moduleid IS NULL)");
        }
        sql.push_str(" ORDER BY s.shortname LIMIT ?3");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match module_id {
            Some(module) => stmt.query_map(
                params![pattern, receiver_type, limit as i64, module],
                symbol_from_row,
            )?,
            None => stmt.query_map(params![pattern, receiver_type, limit as i64], symbol_from_row)?,
        };

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All symbols whose fully-qualified name sits directly under
    /// `container_fq`. Shares the bounded-wait contract of [`Self::query`].
    pub fn members_of(&self, container_fq: &str, limit: usize) -> Vec<Symbol> {
        let Some(_read) = self
            .index_lock
            .try_read_for(Duration::from_millis(INDEX_QUERY_TIMEOUT_MS))
        else {
            return Vec::new();
        };

        let result: Result<Vec<Symbol>, kls_db::DbError> = (|| {
            let conn = self.db.connection()?;
            let pattern = format!("{container_fq}.%");
            let mut stmt = conn.prepare(
                "SELECT s.fqname, s.shortname, s.kind, s.visibility, s.extensionreceivertype,
                        s.sourcejar, s.moduleid,
                        l.uri, ps.line, ps.character, pe.line, pe.character
                 FROM Symbols s
                 LEFT JOIN Locations l ON s.location = l.id
                 LEFT JOIN Ranges r ON l.range = r.id
                 LEFT JOIN Positions ps ON r.start = ps.id
                 LEFT JOIN Positions pe ON r.\"end\" = pe.id
                 WHERE s.fqname LIKE ?1
                 ORDER BY s.fqname LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pattern, limit as i64], symbol_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })();

        match result {
            Ok(symbols) => symbols,
            Err(err) => {
                tracing::info!(target = "kls.index", error = %err, "member query failed; returning empty");
                Vec::new()
            }
        }
    }
}

fn symbol_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Symbol> {
    let kind: String = row.get(2)?;
    let visibility: String = row.get(3)?;
    let uri: Option<String> = row.get(7)?;
    let location = match uri.and_then(|u| Url::parse(&u).ok()) {
        Some(uri) => {
            let start = Position::new(row.get(8)?, row.get(9)?);
            let end = Position::new(row.get(10)?, row.get(11)?);
            Some(Location::new(uri, Range::new(start, end)))
        }
        None => None,
    };
    Ok(Symbol {
        fq_name: row.get(0)?,
        short_name: row.get(1)?,
        kind: SymbolKind::parse(&kind),
        visibility: Visibility::parse(&visibility),
        extension_receiver_type: row.get(4)?,
        location,
        source_jar: row.get::<_, Option<String>>(5)?.map(PathBuf::from),
        module_id: row.get(6)?,
    })
}

fn attribute_jar(
    candidates: &[&PathBuf],
    fq_name: &str,
    scanner: &dyn JarClassScanner,
) -> PathBuf {
    if candidates.len() == 1 {
        return candidates[0].clone();
    }
    for candidate in candidates {
        if scanner.contains_class(candidate, fq_name) {
            return (*candidate).clone();
        }
    }
    candidates[0].clone()
}

/// Depth-first package enumeration, skipping `META-INF`.
fn enumerate_packages(scope: &dyn ModuleScope) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = scope.top_level_packages();
    stack.sort();
    stack.reverse();

    while let Some(package) = stack.pop() {
        if package.rsplit('.').next() == Some("META-INF") {
            continue;
        }
        let mut subs = scope.sub_packages(&package);
        subs.sort();
        subs.reverse();
        stack.extend(subs);
        out.push(package);
    }
    out
}

/// Deletes the symbols matching `predicate` along with the location rows
/// they own.
///
/// The foreign keys cascade child-rows on parent delete (`Ranges` follow
/// their `Positions`, `Locations` their `Ranges`, and `Symbols.location`
/// nulls out), so removing the matched symbols' position rows reclaims the
/// whole chain; a bare `DELETE FROM Symbols` would orphan it.
fn delete_symbols_and_locations(
    conn: &Connection,
    predicate: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<(), kls_db::DbError> {
    let positions_sql = format!(
        "DELETE FROM Positions WHERE id IN (
             SELECT r.start FROM Symbols
                 JOIN Locations l ON Symbols.location = l.id
                 JOIN Ranges r ON l.range = r.id
              WHERE {predicate}
             UNION
             SELECT r.\"end\" FROM Symbols
                 JOIN Locations l ON Symbols.location = l.id
                 JOIN Ranges r ON l.range = r.id
              WHERE {predicate})"
    );
    conn.execute(&positions_sql, params)?;
    conn.execute(&format!("DELETE FROM Symbols WHERE {predicate}"), params)?;
    Ok(())
}

/// Direct-row insert (no entity layer). Returns `false` when the symbol
/// exceeds the store's column caps and was skipped.
fn insert_symbol(conn: &Connection, symbol: &Symbol) -> Result<bool, kls_db::DbError> {
    if !symbol.fits_store() {
        tracing::debug!(
            target = "kls.index",
            fqname = %symbol.fq_name,
            "declaration exceeds column caps; skipping"
        );
        return Ok(false);
    }

    let location_id = match &symbol.location {
        Some(location) => {
            conn.execute(
                "INSERT INTO Positions (line, character) VALUES (?1, ?2)",
                params![location.range.start.line, location.range.start.character],
            )?;
            let start_id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO Positions (line, character) VALUES (?1, ?2)",
                params![location.range.end.line, location.range.end.character],
            )?;
            let end_id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO Ranges (start, \"end\") VALUES (?1, ?2)",
                params![start_id, end_id],
            )?;
            let range_id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO Locations (uri, range) VALUES (?1, ?2)",
                params![location.uri.as_str(), range_id],
            )?;
            Some(conn.last_insert_rowid())
        }
        None => None,
    };

    conn.execute(
        "INSERT INTO Symbols
             (fqname, shortname, kind, visibility, extensionreceivertype, location, sourcejar, moduleid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            symbol.fq_name,
            symbol.short_name,
            symbol.kind.as_str(),
            symbol.visibility.as_str(),
            symbol.extension_receiver_type,
            location_id,
            symbol.source_jar.as_ref().map(|p| p.to_string_lossy().into_owned()),
            symbol.module_id,
        ],
    )?;
    Ok(true)
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
