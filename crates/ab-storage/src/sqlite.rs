use crate::error::{StorageError, StorageResult};
use crate::model::{Experiment, LoadedTrials, Trial};
use crate::signature::tunable_signature;
use crate::storage::Storage;
use ab_core::{to_internal_scores, ObjectiveDirection, ObjectiveMap, ScoreMap, Status, TunableGroups};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

const SCHEMA_VERSION: i64 = 1;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// `rusqlite` (bundled) backed [`Storage`] implementing the relational
/// schema from spec §6: `experiment`, `objectives`, `config`,
/// `config_param`, `trial`, `trial_param`, `trial_result`,
/// `trial_telemetry`, plus small `param`/`metric` name dictionaries.
///
/// WAL journal mode, a busy timeout, and a schema-version pragma check are
/// applied at open, grounded on `decision-gate-store-sqlite`'s connection
/// setup conventions.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        apply_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(SqliteStorage { conn: Mutex::new(conn) })
    }

    fn param_id(conn: &Connection, name: &str) -> StorageResult<i64> {
        conn.execute("INSERT OR IGNORE INTO param (param_name) VALUES (?1)", params![name])?;
        let id: i64 = conn.query_row(
            "SELECT param_id FROM param WHERE param_name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn metric_id(conn: &Connection, name: &str) -> StorageResult<i64> {
        conn.execute("INSERT OR IGNORE INTO metric (metric_name) VALUES (?1)", params![name])?;
        let id: i64 = conn.query_row(
            "SELECT metric_id FROM metric WHERE metric_name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn param_name(conn: &Connection, param_id: i64) -> StorageResult<String> {
        Ok(conn.query_row(
            "SELECT param_name FROM param WHERE param_id = ?1",
            params![param_id],
            |row| row.get(0),
        )?)
    }

    fn metric_name(conn: &Connection, metric_id: i64) -> StorageResult<String> {
        Ok(conn.query_row(
            "SELECT metric_name FROM metric WHERE metric_id = ?1",
            params![metric_id],
            |row| row.get(0),
        )?)
    }

    fn row_to_trial(conn: &Connection, experiment_id: &str, trial_id: i64, config_id: i64, trial_runner_id: Option<String>, status: &str, ts_start: Option<i64>, ts_end: Option<i64>) -> StorageResult<Trial> {
        let mut config_map = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT param_id, param_value FROM trial_param WHERE exp_id = ?1 AND trial_id = ?2",
        )?;
        let rows = stmt.query_map(params![experiment_id, trial_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        for row in rows {
            let (param_id, value) = row?;
            let name = Self::param_name(conn, param_id)?;
            config_map.insert(name, value.unwrap_or_default());
        }

        let mut results = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT metric_id, metric_value FROM trial_result WHERE exp_id = ?1 AND trial_id = ?2",
        )?;
        let rows = stmt.query_map(params![experiment_id, trial_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;
        for row in rows {
            let (metric_id, value) = row?;
            let name = Self::metric_name(conn, metric_id)?;
            results.insert(name, value);
        }

        let mut telemetry = Vec::new();
        let mut stmt = conn.prepare(
            "SELECT ts, metric_id, metric_value FROM trial_telemetry WHERE exp_id = ?1 AND trial_id = ?2 ORDER BY ts, metric_id",
        )?;
        let rows = stmt.query_map(params![experiment_id, trial_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, f64>(2)?))
        })?;
        for row in rows {
            let (ts_micros, metric_id, value) = row?;
            let name = Self::metric_name(conn, metric_id)?;
            telemetry.push(crate::model::TelemetryPoint {
                ts: micros_to_dt(ts_micros),
                metric: name,
                value,
            });
        }

        Ok(Trial {
            experiment_id: experiment_id.to_string(),
            trial_id,
            config_id,
            trial_runner_id,
            status: parse_status(status),
            ts_start: ts_start.map(micros_to_dt),
            ts_end: ts_end.map(micros_to_dt),
            config_map,
            results,
            telemetry,
        })
    }
}

fn apply_pragmas(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    conn.busy_timeout(std::time::Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_meta (key TEXT PRIMARY KEY, value INTEGER NOT NULL);

        CREATE TABLE IF NOT EXISTS experiment (
            exp_id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            git_repo TEXT,
            git_commit TEXT,
            root_env_config TEXT NOT NULL,
            tunable_signature TEXT NOT NULL,
            start_trial_id INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS objectives (
            exp_id TEXT NOT NULL REFERENCES experiment(exp_id),
            optimization_target TEXT NOT NULL,
            optimization_direction TEXT NOT NULL CHECK (optimization_direction IN ('min','max')),
            PRIMARY KEY (exp_id, optimization_target)
        );

        CREATE TABLE IF NOT EXISTS config (
            config_id INTEGER PRIMARY KEY AUTOINCREMENT,
            config_hash TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS param (
            param_id INTEGER PRIMARY KEY AUTOINCREMENT,
            param_name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS metric (
            metric_id INTEGER PRIMARY KEY AUTOINCREMENT,
            metric_name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS config_param (
            config_id INTEGER NOT NULL REFERENCES config(config_id),
            param_id INTEGER NOT NULL REFERENCES param(param_id),
            param_value TEXT,
            PRIMARY KEY (config_id, param_id)
        );

        CREATE TABLE IF NOT EXISTS trial (
            exp_id TEXT NOT NULL REFERENCES experiment(exp_id),
            trial_id INTEGER NOT NULL,
            config_id INTEGER NOT NULL REFERENCES config(config_id),
            trial_runner_id TEXT,
            ts_start INTEGER,
            ts_end INTEGER,
            status TEXT NOT NULL,
            PRIMARY KEY (exp_id, trial_id)
        );

        CREATE TABLE IF NOT EXISTS trial_param (
            exp_id TEXT NOT NULL,
            trial_id INTEGER NOT NULL,
            param_id INTEGER NOT NULL REFERENCES param(param_id),
            param_value TEXT,
            PRIMARY KEY (exp_id, trial_id, param_id),
            FOREIGN KEY (exp_id, trial_id) REFERENCES trial(exp_id, trial_id)
        );

        CREATE TABLE IF NOT EXISTS trial_result (
            exp_id TEXT NOT NULL,
            trial_id INTEGER NOT NULL,
            metric_id INTEGER NOT NULL REFERENCES metric(metric_id),
            metric_value REAL NOT NULL,
            PRIMARY KEY (exp_id, trial_id, metric_id),
            FOREIGN KEY (exp_id, trial_id) REFERENCES trial(exp_id, trial_id)
        );

        CREATE TABLE IF NOT EXISTS trial_telemetry (
            exp_id TEXT NOT NULL,
            trial_id INTEGER NOT NULL,
            ts INTEGER NOT NULL,
            metric_id INTEGER NOT NULL REFERENCES metric(metric_id),
            metric_value REAL NOT NULL,
            FOREIGN KEY (exp_id, trial_id) REFERENCES trial(exp_id, trial_id)
        );
        CREATE INDEX IF NOT EXISTS idx_trial_telemetry_order
            ON trial_telemetry (exp_id, trial_id, ts, metric_id);
        ",
    )?;

    let stored_version: Option<i64> = conn
        .query_row("SELECT value FROM schema_meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()?;
    match stored_version {
        None => {
            conn.execute(
                "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(v) if v != SCHEMA_VERSION => {
            return Err(StorageError::Internal(format!(
                "schema version mismatch: db has {v}, binary expects {SCHEMA_VERSION}"
            )));
        }
        _ => {}
    }
    Ok(())
}

fn dt_to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp() * 1_000_000 + ts.timestamp_subsec_micros() as i64
}

fn micros_to_dt(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
}

fn status_str(s: Status) -> &'static str {
    match s {
        Status::Unknown => "UNKNOWN",
        Status::Pending => "PENDING",
        Status::Ready => "READY",
        Status::Running => "RUNNING",
        Status::Succeeded => "SUCCEEDED",
        Status::Failed => "FAILED",
        Status::Canceled => "CANCELED",
        Status::TimedOut => "TIMED_OUT",
    }
}

fn parse_status(s: &str) -> Status {
    match s {
        "PENDING" => Status::Pending,
        "READY" => Status::Ready,
        "RUNNING" => Status::Running,
        "SUCCEEDED" => Status::Succeeded,
        "FAILED" => Status::Failed,
        "CANCELED" => Status::Canceled,
        "TIMED_OUT" => Status::TimedOut,
        _ => Status::Unknown,
    }
}

fn direction_str(d: ObjectiveDirection) -> &'static str {
    match d {
        ObjectiveDirection::Min => "min",
        ObjectiveDirection::Max => "max",
    }
}

fn parse_direction(s: &str) -> ObjectiveDirection {
    if s == "max" {
        ObjectiveDirection::Max
    } else {
        ObjectiveDirection::Min
    }
}

impl Storage for SqliteStorage {
    fn create_or_resume_experiment(
        &self,
        experiment_id: &str,
        start_trial_id: i64,
        root_env_config: &str,
        description: &str,
        tunables: &TunableGroups,
        objectives: &ObjectiveMap,
    ) -> StorageResult<Experiment> {
        let sig = tunable_signature(tunables);
        let conn = self.conn.lock();

        let existing: Option<(String, Option<String>, Option<String>, String, String, i64)> = conn
            .query_row(
                "SELECT description, git_repo, git_commit, root_env_config, tunable_signature, start_trial_id
                 FROM experiment WHERE exp_id = ?1",
                params![experiment_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        if let Some((desc, git_repo, git_commit, root_cfg, stored_sig, start_id)) = existing {
            let mut stmt = conn.prepare(
                "SELECT optimization_target, optimization_direction FROM objectives WHERE exp_id = ?1",
            )?;
            let rows = stmt.query_map(params![experiment_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut stored_objectives = ObjectiveMap::new();
            for row in rows {
                let (name, dir) = row?;
                stored_objectives.insert(name, parse_direction(&dir));
            }
            if &stored_objectives != objectives {
                return Err(StorageError::IncompatibleResume {
                    experiment_id: experiment_id.to_string(),
                    reason: "objective map differs from stored experiment".to_string(),
                });
            }
            if stored_sig != sig {
                return Err(StorageError::IncompatibleResume {
                    experiment_id: experiment_id.to_string(),
                    reason: "tunable-group signature differs from stored experiment".to_string(),
                });
            }
            return Ok(Experiment {
                experiment_id: experiment_id.to_string(),
                description: desc,
                root_env_config: root_cfg,
                git_repo,
                git_commit,
                objectives: stored_objectives,
                tunable_signature: sig,
                start_trial_id: start_id,
                merged_experiment_ids: Vec::new(),
            });
        }

        let (git_repo, git_commit) = capture_git_info(root_env_config);
        conn.execute(
            "INSERT INTO experiment (exp_id, description, git_repo, git_commit, root_env_config, tunable_signature, start_trial_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![experiment_id, description, git_repo, git_commit, root_env_config, sig, start_trial_id],
        )?;
        for (name, dir) in objectives {
            conn.execute(
                "INSERT INTO objectives (exp_id, optimization_target, optimization_direction) VALUES (?1, ?2, ?3)",
                params![experiment_id, name, direction_str(*dir)],
            )?;
        }

        Ok(Experiment {
            experiment_id: experiment_id.to_string(),
            description: description.to_string(),
            root_env_config: root_env_config.to_string(),
            git_repo,
            git_commit,
            objectives: objectives.clone(),
            tunable_signature: sig,
            start_trial_id,
            merged_experiment_ids: Vec::new(),
        })
    }

    fn get_or_insert_config(&self, tunables: &TunableGroups) -> StorageResult<i64> {
        let hash = tunables.content_hash();
        let conn = self.conn.lock();
        if let Some(id) = conn
            .query_row("SELECT config_id FROM config WHERE config_hash = ?1", params![hash], |r| r.get(0))
            .optional()?
        {
            return Ok(id);
        }
        conn.execute("INSERT INTO config (config_hash) VALUES (?1)", params![hash])?;
        let config_id = conn.last_insert_rowid();
        for (name, value) in tunables.iter_values() {
            let param_id = Self::param_id(&conn, &name)?;
            conn.execute(
                "INSERT INTO config_param (config_id, param_id, param_value) VALUES (?1, ?2, ?3)",
                params![config_id, param_id, value.canonical_repr()],
            )?;
        }
        Ok(config_id)
    }

    fn get_config_values(&self, config_id: i64) -> StorageResult<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        if conn
            .query_row("SELECT 1 FROM config WHERE config_id = ?1", params![config_id], |r| r.get::<_, i64>(0))
            .optional()?
            .is_none()
        {
            return Err(StorageError::UnknownConfig(config_id));
        }
        let mut values = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT param_id, param_value FROM config_param WHERE config_id = ?1")?;
        let rows = stmt.query_map(params![config_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        for row in rows {
            let (param_id, value) = row?;
            let name = Self::param_name(&conn, param_id)?;
            values.insert(name, value.unwrap_or_default());
        }
        Ok(values)
    }

    fn new_trial(
        &self,
        experiment: &Experiment,
        tunables: &TunableGroups,
        ts_start: Option<DateTime<Utc>>,
        config_map: BTreeMap<String, String>,
    ) -> StorageResult<Trial> {
        let config_id = self.get_or_insert_config(tunables)?;
        let conn = self.conn.lock();

        if conn
            .query_row("SELECT 1 FROM experiment WHERE exp_id = ?1", params![&experiment.experiment_id], |r| r.get::<_, i64>(0))
            .optional()?
            .is_none()
        {
            return Err(StorageError::UnknownExperiment(experiment.experiment_id.clone()));
        }

        let next_id: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(trial_id) + 1, ?2) FROM trial WHERE exp_id = ?1",
                params![&experiment.experiment_id, experiment.start_trial_id],
                |r| r.get(0),
            )?;

        let ts_micros = ts_start.map(dt_to_micros);
        conn.execute(
            "INSERT INTO trial (exp_id, trial_id, config_id, trial_runner_id, ts_start, ts_end, status)
             VALUES (?1, ?2, ?3, NULL, ?4, NULL, 'PENDING')",
            params![&experiment.experiment_id, next_id, config_id, ts_micros],
        )?;
        for (name, value) in &config_map {
            let param_id = Self::param_id(&conn, name)?;
            conn.execute(
                "INSERT INTO trial_param (exp_id, trial_id, param_id, param_value) VALUES (?1, ?2, ?3, ?4)",
                params![&experiment.experiment_id, next_id, param_id, value],
            )?;
        }

        Ok(Trial {
            experiment_id: experiment.experiment_id.clone(),
            trial_id: next_id,
            config_id,
            trial_runner_id: None,
            status: Status::Pending,
            ts_start: ts_micros.map(micros_to_dt),
            ts_end: None,
            config_map,
            results: BTreeMap::new(),
            telemetry: Vec::new(),
        })
    }

    fn pending_trials(
        &self,
        experiment: &Experiment,
        now_utc: DateTime<Utc>,
        include_running: bool,
    ) -> StorageResult<Vec<Trial>> {
        let conn = self.conn.lock();
        let statuses: &[&str] = if include_running {
            &["PENDING", "READY", "RUNNING"]
        } else {
            &["PENDING"]
        };
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT trial_id, config_id, trial_runner_id, status, ts_start, ts_end
             FROM trial
             WHERE exp_id = ? AND ts_end IS NULL AND (ts_start IS NULL OR ts_start <= ?)
               AND status IN ({placeholders})
             ORDER BY trial_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let now_micros = dt_to_micros(now_utc);
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&experiment.experiment_id, &now_micros];
        for s in statuses {
            bound.push(s);
        }
        let rows = stmt.query_map(bound.as_slice(), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<i64>>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (trial_id, config_id, runner, status, ts_start, ts_end) = row?;
            out.push(Self::row_to_trial(&conn, &experiment.experiment_id, trial_id, config_id, runner, &status, ts_start, ts_end)?);
        }
        Ok(out)
    }

    fn load(&self, experiment: &Experiment, after_trial_id: i64) -> StorageResult<LoadedTrials> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT trial_id, config_id, status FROM trial
             WHERE exp_id = ?1 AND trial_id > ?2
               AND status IN ('SUCCEEDED','FAILED','CANCELED','TIMED_OUT')
             ORDER BY trial_id",
        )?;
        let rows = stmt.query_map(params![experiment.experiment_id, after_trial_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut loaded = LoadedTrials::default();
        for row in rows {
            let (trial_id, config_id, status_s) = row?;
            let status = parse_status(&status_s);
            let score = if status.is_succeeded() {
                let mut results = ScoreMap::new();
                let mut rstmt = conn.prepare(
                    "SELECT metric_id, metric_value FROM trial_result WHERE exp_id = ?1 AND trial_id = ?2",
                )?;
                let rrows = rstmt.query_map(params![experiment.experiment_id, trial_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
                })?;
                for r in rrows {
                    let (metric_id, value) = r?;
                    let name = Self::metric_name(&conn, metric_id)?;
                    results.insert(name, value);
                }
                Some(to_internal_scores(&experiment.objectives, &results))
            } else {
                None
            };
            loaded.trial_ids.push(trial_id);
            loaded.config_ids.push(config_id);
            loaded.statuses.push(status);
            loaded.scores.push(score);
        }
        Ok(loaded)
    }

    fn update_trial(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        status: Status,
        ts: DateTime<Utc>,
        metrics: Option<ScoreMap>,
    ) -> StorageResult<()> {
        let conn = self.conn.lock();
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM trial WHERE exp_id = ?1 AND trial_id = ?2",
                params![experiment.experiment_id, trial_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(StorageError::UnknownTrial {
                experiment_id: experiment.experiment_id.clone(),
                trial_id,
            });
        };
        if parse_status(&current).is_completed() {
            return Ok(());
        }

        if status.is_completed() {
            conn.execute(
                "UPDATE trial SET status = ?1, ts_end = ?2 WHERE exp_id = ?3 AND trial_id = ?4",
                params![status_str(status), dt_to_micros(ts), experiment.experiment_id, trial_id],
            )?;
        } else {
            conn.execute(
                "UPDATE trial SET status = ?1 WHERE exp_id = ?2 AND trial_id = ?3",
                params![status_str(status), experiment.experiment_id, trial_id],
            )?;
        }

        if status.is_succeeded() {
            if let Some(metrics) = metrics {
                for (name, value) in metrics {
                    let metric_id = Self::metric_id(&conn, &name)?;
                    conn.execute(
                        "INSERT INTO trial_result (exp_id, trial_id, metric_id, metric_value)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT (exp_id, trial_id, metric_id) DO UPDATE SET metric_value = excluded.metric_value",
                        params![experiment.experiment_id, trial_id, metric_id, value],
                    )?;
                }
            }
        }
        Ok(())
    }

    fn assign_trial_runner(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        trial_runner_id: &str,
    ) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE trial SET trial_runner_id = ?1 WHERE exp_id = ?2 AND trial_id = ?3",
            params![trial_runner_id, experiment.experiment_id, trial_id],
        )?;
        Ok(())
    }

    fn append_telemetry(
        &self,
        experiment: &Experiment,
        trial_id: i64,
        _status: Status,
        _ts: DateTime<Utc>,
        triples: &[(DateTime<Utc>, String, f64)],
    ) -> StorageResult<()> {
        let conn = self.conn.lock();
        for (ts, metric, value) in triples {
            let metric_id = Self::metric_id(&conn, metric)?;
            conn.execute(
                "INSERT INTO trial_telemetry (exp_id, trial_id, ts, metric_id, metric_value) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![experiment.experiment_id, trial_id, dt_to_micros(*ts), metric_id, value],
            )?;
        }
        Ok(())
    }

    fn merge_experiments(
        &self,
        experiment: &Experiment,
        other_experiment_ids: &[String],
    ) -> StorageResult<Vec<Trial>> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        for other_id in other_experiment_ids {
            let sig: Option<String> = conn
                .query_row(
                    "SELECT tunable_signature FROM experiment WHERE exp_id = ?1",
                    params![other_id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(sig) = sig else {
                return Err(StorageError::UnknownExperiment(other_id.clone()));
            };
            if sig != experiment.tunable_signature {
                return Err(StorageError::IncompatibleResume {
                    experiment_id: other_id.clone(),
                    reason: "tunable signature differs, cannot merge".to_string(),
                });
            }
            let mut stmt = conn.prepare(
                "SELECT trial_id, config_id, trial_runner_id, status, ts_start, ts_end FROM trial WHERE exp_id = ?1 ORDER BY trial_id",
            )?;
            let rows = stmt.query_map(params![other_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            })?;
            for row in rows {
                let (trial_id, config_id, runner, status, ts_start, ts_end) = row?;
                out.push(Self::row_to_trial(&conn, other_id, trial_id, config_id, runner, &status, ts_start, ts_end)?);
            }
        }
        Ok(out)
    }

    fn get_trial(&self, experiment: &Experiment, trial_id: i64) -> StorageResult<Trial> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT config_id, trial_runner_id, status, ts_start, ts_end FROM trial WHERE exp_id = ?1 AND trial_id = ?2",
                params![experiment.experiment_id, trial_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((config_id, runner, status, ts_start, ts_end)) = row else {
            return Err(StorageError::UnknownTrial {
                experiment_id: experiment.experiment_id.clone(),
                trial_id,
            });
        };
        Self::row_to_trial(&conn, &experiment.experiment_id, trial_id, config_id, runner, &status, ts_start, ts_end)
    }
}

fn capture_git_info(root_env_config: &str) -> (Option<String>, Option<String>) {
    let dir = Path::new(root_env_config).parent().map(|p| p.to_path_buf()).unwrap_or_else(|| Path::new(".").to_path_buf());
    let run = |args: &[&str]| -> Option<String> {
        let output = std::process::Command::new("git").args(args).current_dir(&dir).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let s = String::from_utf8(output.stdout).ok()?.trim().to_string();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    };
    (run(&["remote", "get-url", "origin"]), run(&["rev-parse", "HEAD"]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_core::{CovariantGroup, NumericTunableSpec, ObjectiveDirection, Tunable, TunableValue};

    fn tunables() -> TunableGroups {
        let t = Tunable::new_numeric(NumericTunableSpec {
            name: "x".into(),
            is_integer: true,
            default: TunableValue::Int(0),
            range: (0.0, 10.0),
            quantization_bins: None,
            log: false,
            distribution: Default::default(),
            special: vec![],
            special_weights: None,
            range_weight: None,
            meta: BTreeMap::new(),
        })
        .unwrap();
        let mut tg = TunableGroups::new();
        tg.add_group(CovariantGroup::new("g", 1, vec![t])).unwrap();
        tg
    }

    fn objectives() -> ObjectiveMap {
        let mut m = ObjectiveMap::new();
        m.insert("score".to_string(), ObjectiveDirection::Min);
        m
    }

    #[test]
    fn roundtrips_trial_through_sqlite() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let tg = tunables();
        let exp = storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let trial = storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();
        assert_eq!(trial.trial_id, 1);

        let now = Utc::now();
        let mut metrics = ScoreMap::new();
        metrics.insert("score".to_string(), 3.5);
        storage.update_trial(&exp, trial.trial_id, Status::Succeeded, now, Some(metrics)).unwrap();

        let loaded = storage.load(&exp, 0).unwrap();
        assert_eq!(loaded.trial_ids, vec![1]);
        assert_eq!(loaded.scores[0].as_ref().unwrap()["score"], 3.5);
    }

    #[test]
    fn config_values_round_trip_through_tunable_groups() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut tg = tunables();
        tg.set("x", TunableValue::Int(9)).unwrap();
        let id = storage.get_or_insert_config(&tg).unwrap();

        let values = storage.get_config_values(id).unwrap();
        let mut reconstructed = tunables();
        reconstructed.assign_from_canonical(&values).unwrap();
        assert_eq!(reconstructed.get("x"), Some(TunableValue::Int(9)));
    }

    #[test]
    fn persists_across_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("autobench.db");
        let tg = tunables();
        {
            let storage = SqliteStorage::open(&db_path).unwrap();
            let exp = storage
                .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
                .unwrap();
            storage.new_trial(&exp, &tg, None, BTreeMap::new()).unwrap();
        }
        let storage = SqliteStorage::open(&db_path).unwrap();
        let exp = storage
            .create_or_resume_experiment("E1", 1, "env.json", "d", &tg, &objectives())
            .unwrap();
        let pending = storage.pending_trials(&exp, Utc::now(), false).unwrap();
        assert_eq!(pending.len(), 1);
    }
}
