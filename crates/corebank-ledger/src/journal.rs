use crate::error::LedgerError;
use crate::posting::{PostingDirection, PostingLine};
use corebank_types::{Currency, Money};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

/// Posting journal persistence backend configuration.
#[derive(Debug, Clone)]
pub enum JournalStorageConfig {
    /// Keep posting lines in process memory only.
    Memory,
    /// Mirror every posting line to PostgreSQL before the in-memory commit.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl JournalStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for JournalStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Clone)]
enum JournalBackend {
    Memory,
    Postgres(PostgresJournalStore),
}

/// Append-only posting journal.
///
/// The in-memory ledger state stays authoritative; with the Postgres backend
/// every line is persisted before the in-memory commit so the journal never
/// lags the balances it explains.
#[derive(Debug, Clone)]
pub struct PostingJournal {
    backend: JournalBackend,
}

impl PostingJournal {
    pub async fn bootstrap(config: JournalStorageConfig) -> Result<Self, LedgerError> {
        match config {
            JournalStorageConfig::Memory => Ok(Self {
                backend: JournalBackend::Memory,
            }),
            JournalStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresJournalStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let existing = store.count_lines().await?;
                tracing::info!(existing, "posting journal hydrated from postgres");
                Ok(Self {
                    backend: JournalBackend::Postgres(store),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            JournalBackend::Memory => "memory",
            JournalBackend::Postgres(_) => "postgres",
        }
    }

    pub async fn append(&self, line: &PostingLine) -> Result<(), LedgerError> {
        match &self.backend {
            JournalBackend::Memory => Ok(()),
            JournalBackend::Postgres(store) => store.insert_line(line).await,
        }
    }

    /// Load the persisted journal, oldest first. Memory backend has nothing
    /// beyond the live ledger state and returns an empty set.
    pub async fn load(&self) -> Result<Vec<PostingLine>, LedgerError> {
        match &self.backend {
            JournalBackend::Memory => Ok(Vec::new()),
            JournalBackend::Postgres(store) => store.load_lines().await,
        }
    }
}

#[derive(Debug, Clone)]
struct PostgresJournalStore {
    pool: PgPool,
}

impl PostgresJournalStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Journal(format!("connect failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posting_journal (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                account_number TEXT NOT NULL,
                direction TEXT NOT NULL,
                amount_minor BIGINT NOT NULL,
                currency TEXT NOT NULL,
                reference_id TEXT NOT NULL,
                description TEXT NOT NULL,
                balance_after_minor BIGINT NOT NULL,
                posted_at TIMESTAMPTZ NOT NULL,
                UNIQUE (account_id, direction, reference_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Journal(format!("schema setup failed: {e}")))?;
        Ok(())
    }

    async fn count_lines(&self) -> Result<i64, LedgerError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM posting_journal")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LedgerError::Journal(format!("count failed: {e}")))?;
        Ok(row.get::<i64, _>("total"))
    }

    async fn insert_line(&self, line: &PostingLine) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO posting_journal
                (id, account_id, account_number, direction, amount_minor, currency,
                 reference_id, description, balance_after_minor, posted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&line.id)
        .bind(&line.account_id)
        .bind(&line.account_number)
        .bind(line.direction.as_str())
        .bind(line.amount.minor_units)
        .bind(line.amount.currency.as_str())
        .bind(&line.reference_id)
        .bind(&line.description)
        .bind(line.balance_after.minor_units)
        .bind(line.posted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Journal(format!("insert failed: {e}")))?;
        Ok(())
    }

    async fn load_lines(&self) -> Result<Vec<PostingLine>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, account_number, direction, amount_minor, currency,
                   reference_id, description, balance_after_minor, posted_at
            FROM posting_journal
            ORDER BY posted_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Journal(format!("load failed: {e}")))?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let direction_text: String = row.get("direction");
            let direction = PostingDirection::parse(&direction_text).ok_or_else(|| {
                LedgerError::Journal(format!("unknown direction '{direction_text}'"))
            })?;
            let currency_text: String = row.get("currency");
            let currency = Currency::new(currency_text)
                .map_err(|e| LedgerError::Journal(format!("bad currency in journal: {e}")))?;
            lines.push(PostingLine {
                id: row.get("id"),
                account_id: row.get("account_id"),
                account_number: row.get("account_number"),
                direction,
                amount: Money::from_minor(row.get::<i64, _>("amount_minor"), currency.clone()),
                reference_id: row.get("reference_id"),
                description: row.get("description"),
                balance_after: Money::from_minor(
                    row.get::<i64, _>("balance_after_minor"),
                    currency,
                ),
                posted_at: row.get("posted_at"),
            });
        }
        Ok(lines)
    }
}
