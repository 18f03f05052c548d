use crate::{
    error::SyncError,
    event::{TreeEvent, Upsert},
    payload::{NewTest, Snapshot, TestDetailsUpdate},
    plan::{SyncPlan, SyncSummary},
    properties::{
        assemble_sections, NodeId, OptionRow, QuestionRow, SectionNode, SectionRow, TestRecord,
        TestStatus, TestTree, UserId,
    },
};
use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::{
    error::BoxDynError,
    migrate::{Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    pool::PoolOptions,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Pool, QueryBuilder, Row,
};
use std::{
    path::Path,
    result::Result,
    time::{Duration, SystemTime},
};

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

pub(crate) fn now_millis() -> i64 {
    match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as i64,
        Err(e) => {
            tracing::warn!("System clock is before the unix epoch: {e}");
            0
        }
    }
}

/// Read the stored hierarchy of one Test, ordered by position at every level.
///
/// Takes a connection rather than the pool so the read can happen inside the same transaction
/// that later applies a [SyncPlan].
pub async fn load_sections(
    conn: &mut SqliteConnection,
    test_id: NodeId,
) -> Result<Vec<SectionNode>, SyncError> {
    let test_key = test_id.to_string();
    let sections = sqlx::query_as::<_, SectionRow>(
        "SELECT * FROM sections WHERE test_id = ? ORDER BY position, id",
    )
    .bind(&test_key)
    .fetch_all(&mut *conn)
    .await?;
    let questions = sqlx::query_as::<_, QuestionRow>(
        "SELECT q.* FROM questions q JOIN sections s ON q.section_id = s.id \
         WHERE s.test_id = ? ORDER BY q.position, q.id",
    )
    .bind(&test_key)
    .fetch_all(&mut *conn)
    .await?;
    let options = sqlx::query_as::<_, OptionRow>(
        "SELECT o.* FROM options o JOIN questions q ON o.question_id = q.id \
         JOIN sections s ON q.section_id = s.id \
         WHERE s.test_id = ? ORDER BY o.position, o.id",
    )
    .bind(&test_key)
    .fetch_all(&mut *conn)
    .await?;

    tracing::debug!(
        "[load_sections] test {}: {} sections, {} questions, {} options",
        test_id,
        sections.len(),
        questions.len(),
        options.len()
    );
    Ok(assemble_sections(sections, questions, options))
}

/// Applies [TreeEvent]s to an open transaction. Every statement goes to the borrowed
/// connection, so dropping the enclosing `sqlx::Transaction` without committing undoes all of
/// them.
pub struct SyncTransaction<'c> {
    conn: &'c mut SqliteConnection,
    pub applied: usize,
}

impl<'c> SyncTransaction<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> SyncTransaction<'c> {
        SyncTransaction { conn, applied: 0 }
    }

    pub async fn apply(&mut self, plan: &SyncPlan) -> Result<(), SyncError> {
        for event in plan.events() {
            if let Err(e) = self.add_event(event).await {
                tracing::error!(
                    "[SyncTransaction] test {}: failed applying {} after {} events: {}",
                    plan.test_id,
                    event,
                    self.applied,
                    e
                );
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn add_event(&mut self, event: &TreeEvent) -> Result<(), SyncError> {
        match event {
            TreeEvent::OptionsRemoved(ids) => self.remove_rows("options", ids).await?,
            TreeEvent::QuestionsRemoved(ids) => self.remove_rows("questions", ids).await?,
            TreeEvent::SectionsRemoved(ids) => self.remove_rows("sections", ids).await?,
            TreeEvent::SectionUpsert(op, row) => self.upsert_section(*op, row).await?,
            TreeEvent::QuestionUpsert(op, row) => self.upsert_question(*op, row).await?,
            TreeEvent::OptionUpsert(op, row) => self.upsert_option(*op, row).await?,
        }
        self.applied += 1;
        Ok(())
    }

    async fn remove_rows(&mut self, table: &'static str, ids: &[NodeId]) -> Result<(), SyncError> {
        for chunk in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!("DELETE FROM {table} WHERE id IN ("));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");
            let result = qb.build().execute(&mut *self.conn).await?;
            tracing::debug!(
                "[SyncTransaction] removed {} of {} rows from {}",
                result.rows_affected(),
                chunk.len(),
                table
            );
        }
        Ok(())
    }

    /// Updates are scoped by parent as well as id, so a row can never be rewritten under a
    /// parent it does not belong to.
    fn expect_one(rows: u64, what: &str, id: &NodeId) -> Result<(), SyncError> {
        if rows == 1 {
            Ok(())
        } else {
            Err(SyncError::Storage(format!(
                "{what} {id} was expected to exist but {rows} rows matched"
            )))
        }
    }

    async fn upsert_section(&mut self, op: Upsert, row: &SectionRow) -> Result<(), SyncError> {
        let query = match op {
            Upsert::Create => sqlx::query(
                "INSERT INTO sections \
                 (title, duration, default_positive_marks, default_negative_marks, position, id, test_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            ),
            Upsert::Update => sqlx::query(
                "UPDATE sections SET title = ?, duration = ?, default_positive_marks = ?, \
                 default_negative_marks = ?, position = ? WHERE id = ? AND test_id = ?",
            ),
        };
        let result = query
            .bind(&row.title)
            .bind(row.duration)
            .bind(row.default_positive_marks)
            .bind(row.default_negative_marks)
            .bind(row.position)
            .bind(row.id.to_string())
            .bind(row.test_id.to_string())
            .execute(&mut *self.conn)
            .await?;
        Self::expect_one(result.rows_affected(), "section", &row.id)
    }

    async fn upsert_question(&mut self, op: Upsert, row: &QuestionRow) -> Result<(), SyncError> {
        let query = match op {
            Upsert::Create => sqlx::query(
                "INSERT INTO questions \
                 (kind, text, correct_answer, positive_marks, negative_marks, position, id, section_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            ),
            Upsert::Update => sqlx::query(
                "UPDATE questions SET kind = ?, text = ?, correct_answer = ?, positive_marks = ?, \
                 negative_marks = ?, position = ? WHERE id = ? AND section_id = ?",
            ),
        };
        let result = query
            .bind(row.kind.as_str())
            .bind(&row.text)
            .bind(&row.correct_answer)
            .bind(row.positive_marks)
            .bind(row.negative_marks)
            .bind(row.position)
            .bind(row.id.to_string())
            .bind(row.section_id.to_string())
            .execute(&mut *self.conn)
            .await?;
        Self::expect_one(result.rows_affected(), "question", &row.id)
    }

    async fn upsert_option(&mut self, op: Upsert, row: &OptionRow) -> Result<(), SyncError> {
        let query = match op {
            Upsert::Create => sqlx::query(
                "INSERT INTO options (text, is_correct, position, id, question_id) \
                 VALUES (?, ?, ?, ?, ?)",
            ),
            Upsert::Update => sqlx::query(
                "UPDATE options SET text = ?, is_correct = ?, position = ? \
                 WHERE id = ? AND question_id = ?",
            ),
        };
        let result = query
            .bind(&row.text)
            .bind(row.is_correct)
            .bind(row.position)
            .bind(row.id.to_string())
            .bind(row.question_id.to_string())
            .execute(&mut *self.conn)
            .await?;
        Self::expect_one(result.rows_affected(), "option", &row.id)
    }
}

/// Result of a committed reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub tree: TestTree,
    pub summary: SyncSummary,
}

#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

impl DbConnection {
    pub async fn open<P: AsRef<Path>>(
        db_path: P,
        busy_timeout: Duration,
    ) -> Result<DbConnection, SyncError> {
        Ok(DbConnection(db_init(db_path.as_ref(), busy_timeout).await?))
    }

    /// Ownership gate. Missing and foreign Tests are indistinguishable to the caller.
    async fn find_owned_test(
        &self,
        actor: &UserId,
        test_id: NodeId,
    ) -> Result<TestRecord, SyncError> {
        sqlx::query_as::<_, TestRecord>("SELECT * FROM tests WHERE id = ? AND created_by = ?")
            .bind(test_id.to_string())
            .bind(actor.as_str())
            .fetch_optional(&self.0)
            .await?
            .ok_or_else(|| {
                tracing::warn!("[DbConnection] test {test_id} not found for user {actor}");
                SyncError::Ownership(test_id.to_string())
            })
    }

    async fn read_tree(&self, test: TestRecord) -> Result<TestTree, SyncError> {
        let mut conn = self.0.acquire().await?;
        let sections = load_sections(&mut *conn, test.id).await?;
        Ok(TestTree { test, sections })
    }

    #[tracing::instrument(skip(self, new_test))]
    pub async fn create_test(
        &self,
        actor: &UserId,
        new_test: &NewTest,
    ) -> Result<TestTree, SyncError> {
        new_test.validate()?;
        let now = now_millis();
        let test = TestRecord {
            id: NodeId::new(),
            title: new_test.title.trim().to_string(),
            description: new_test.description.clone(),
            created_by: actor.clone(),
            availability_start: new_test.availability_start.clone(),
            availability_end: new_test.availability_end.clone(),
            total_duration: new_test.total_duration,
            shuffle_questions: new_test.shuffle_questions,
            allow_section_nav: new_test.allow_section_nav,
            negative_marking: new_test.negative_marking,
            show_results_instant: new_test.show_results_instant,
            status: TestStatus::Draft,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO tests (id, title, description, created_by, availability_start, \
             availability_end, total_duration, shuffle_questions, allow_section_nav, \
             negative_marking, show_results_instant, status, revision, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(test.id.to_string())
        .bind(&test.title)
        .bind(&test.description)
        .bind(test.created_by.as_str())
        .bind(&test.availability_start)
        .bind(&test.availability_end)
        .bind(test.total_duration)
        .bind(test.shuffle_questions)
        .bind(test.allow_section_nav)
        .bind(test.negative_marking)
        .bind(test.show_results_instant)
        .bind(test.status.as_str())
        .bind(test.revision)
        .bind(test.created_at)
        .bind(test.updated_at)
        .execute(&self.0)
        .await?;
        tracing::info!("Created test {} for {}", test.id, actor);
        Ok(TestTree {
            test,
            sections: Vec::new(),
        })
    }

    /// The caller's Tests, most recently touched first, without their hierarchy.
    pub async fn list_tests(&self, actor: &UserId) -> Result<Vec<TestRecord>, SyncError> {
        Ok(sqlx::query_as::<_, TestRecord>(
            "SELECT * FROM tests WHERE created_by = ? ORDER BY updated_at DESC, id DESC",
        )
        .bind(actor.as_str())
        .fetch_all(&self.0)
        .await?)
    }

    /// Canonical read of a whole Test.
    #[tracing::instrument(skip(self))]
    pub async fn get_test_tree(
        &self,
        actor: &UserId,
        test_id: NodeId,
    ) -> Result<TestTree, SyncError> {
        let test = self.find_owned_test(actor, test_id).await?;
        self.read_tree(test).await
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn update_test(
        &self,
        actor: &UserId,
        test_id: NodeId,
        update: &TestDetailsUpdate,
    ) -> Result<TestTree, SyncError> {
        let mut test = self.find_owned_test(actor, test_id).await?;
        if let Some(title) = &update.title {
            test.title = title.trim().to_string();
        }
        if let Some(description) = &update.description {
            test.description = description.clone();
        }
        if let Some(start) = &update.availability_start {
            test.availability_start = start.clone();
        }
        if let Some(end) = &update.availability_end {
            test.availability_end = end.clone();
        }
        if let Some(duration) = update.total_duration {
            test.total_duration = duration;
        }
        if let Some(flag) = update.shuffle_questions {
            test.shuffle_questions = flag;
        }
        if let Some(flag) = update.allow_section_nav {
            test.allow_section_nav = flag;
        }
        if let Some(flag) = update.negative_marking {
            test.negative_marking = flag;
        }
        if let Some(flag) = update.show_results_instant {
            test.show_results_instant = flag;
        }
        if let Some(status) = update.status {
            test.status = status;
        }
        test.updated_at = now_millis();

        let result = sqlx::query(
            "UPDATE tests SET title = ?, description = ?, availability_start = ?, \
             availability_end = ?, total_duration = ?, shuffle_questions = ?, \
             allow_section_nav = ?, negative_marking = ?, show_results_instant = ?, status = ?, \
             revision = revision + 1, updated_at = ? WHERE id = ? AND created_by = ?",
        )
        .bind(&test.title)
        .bind(&test.description)
        .bind(&test.availability_start)
        .bind(&test.availability_end)
        .bind(test.total_duration)
        .bind(test.shuffle_questions)
        .bind(test.allow_section_nav)
        .bind(test.negative_marking)
        .bind(test.show_results_instant)
        .bind(test.status.as_str())
        .bind(test.updated_at)
        .bind(test_id.to_string())
        .bind(actor.as_str())
        .execute(&self.0)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SyncError::Ownership(test_id.to_string()));
        }
        self.get_test_tree(actor, test_id).await
    }

    /// Reconcile the stored sections of `test_id` with `snapshot` and return the canonical tree.
    ///
    /// The snapshot is already validated, and ownership is checked before the transaction
    /// opens. Inside the transaction the first statement bumps the Test's revision. On SQLite
    /// that takes the database write lock before the tree is read, so a concurrent
    /// reconciliation of the same Test waits for this one instead of diffing against a tree that
    /// is about to change. Load, plan and apply then all run in that transaction; any failure
    /// drops it uncommitted.
    #[tracing::instrument(skip(self, snapshot))]
    pub async fn sync_sections(
        &self,
        actor: &UserId,
        test_id: NodeId,
        snapshot: &Snapshot,
    ) -> Result<SyncOutcome, SyncError> {
        let test = self.find_owned_test(actor, test_id).await?;

        let mut tx = self.0.begin().await?;
        let claimed = sqlx::query(
            "UPDATE tests SET revision = revision + 1, updated_at = ? \
             WHERE id = ? AND created_by = ?",
        )
        .bind(now_millis())
        .bind(test_id.to_string())
        .bind(actor.as_str())
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            // Deleted or handed over between the gate and the transaction.
            return Err(SyncError::Ownership(test_id.to_string()));
        }

        let existing = load_sections(&mut *tx, test_id).await?;
        let plan = SyncPlan::new(test_id, &existing, snapshot);
        tracing::debug!(
            "[sync_sections] test {} revision {}: {} delete events, {} upserts",
            test_id,
            test.revision + 1,
            plan.deletes.len(),
            plan.upserts.len()
        );

        let mut executor = SyncTransaction::new(&mut *tx);
        executor.apply(&plan).await?;
        let applied = executor.applied;
        tx.commit().await?;

        tracing::info!(
            "Synced test {}: {} events applied, sections {:?}, questions {:?}, options {:?}",
            test_id,
            applied,
            plan.summary.sections,
            plan.summary.questions,
            plan.summary.options
        );

        let tree = self.get_test_tree(actor, test_id).await?;
        Ok(SyncOutcome {
            tree,
            summary: plan.summary,
        })
    }

    pub async fn counts(&self) -> Result<(i64, i64, i64, i64), SyncError> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM tests), (SELECT COUNT(*) FROM sections), \
             (SELECT COUNT(*) FROM questions), (SELECT COUNT(*) FROM options)",
        )
        .fetch_one(&self.0)
        .await?;
        Ok((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?, row.try_get(3)?))
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

static MIGRATIONS: once_cell::sync::Lazy<Vec<Migration>> = once_cell::sync::Lazy::new(|| {
    vec![Migration {
        version: 1,
        description: "create_test_hierarchy",
        sql: "\
        CREATE TABLE tests (id TEXT PRIMARY KEY, title TEXT NOT NULL, description TEXT, \
            created_by TEXT NOT NULL, availability_start TEXT, availability_end TEXT, \
            total_duration INTEGER, shuffle_questions INTEGER NOT NULL DEFAULT 0, \
            allow_section_nav INTEGER NOT NULL DEFAULT 1, negative_marking INTEGER NOT NULL DEFAULT 0, \
            show_results_instant INTEGER NOT NULL DEFAULT 0, status TEXT NOT NULL DEFAULT 'draft', \
            revision INTEGER NOT NULL DEFAULT 0, created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL); \
        CREATE INDEX tests_created_by ON tests(created_by); \
        CREATE TABLE sections (id TEXT PRIMARY KEY, \
            test_id TEXT NOT NULL REFERENCES tests(id) ON DELETE CASCADE, title TEXT NOT NULL, \
            duration INTEGER, default_positive_marks REAL NOT NULL DEFAULT 1.0, \
            default_negative_marks REAL NOT NULL DEFAULT 0.0, position INTEGER NOT NULL DEFAULT 0); \
        CREATE INDEX sections_test_id ON sections(test_id, position); \
        CREATE TABLE questions (id TEXT PRIMARY KEY, \
            section_id TEXT NOT NULL REFERENCES sections(id) ON DELETE CASCADE, \
            kind TEXT NOT NULL CHECK (kind IN ('mcq', 'multi-select', 'text')), text TEXT NOT NULL, \
            correct_answer TEXT, positive_marks REAL, negative_marks REAL, \
            position INTEGER NOT NULL DEFAULT 0); \
        CREATE INDEX questions_section_id ON questions(section_id, position); \
        CREATE TABLE options (id TEXT PRIMARY KEY, \
            question_id TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE, \
            text TEXT NOT NULL, is_correct INTEGER NOT NULL DEFAULT 0, \
            position INTEGER NOT NULL DEFAULT 0); \
        CREATE INDEX options_question_id ON options(question_id, position);",
        kind: MigrationType::ReversibleUp,
    }]
});

pub async fn db_init(db_path: &Path, busy_timeout: Duration) -> Result<Pool<Sqlite>, SyncError> {
    tracing::debug!("Initializing test store from file: {:?}", db_path);
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(false)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(busy_timeout)
        .disable_statement_logging();

    let pool = PoolOptions::<Sqlite>::new().connect_with(options).await?;

    let migrator = Migrator::new(MigrationList(MIGRATIONS.clone())).await?;
    migrator.run(&pool).await?;

    let db = DbConnection(pool);
    let (tests, sections, questions, options) = db.counts().await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tStored tests:\t{:?} \n \
         \tSections:\t{:?} \n \
         \tQuestions:\t{:?} \n \
         \tOptions:\t{:?}",
        tests,
        sections,
        questions,
        options
    );

    Ok(db.0)
}
