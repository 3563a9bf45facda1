use chrono::{DateTime, Utc};
use herald_core::error::AppError;
use herald_core::models::{
    ArticleStatus, FetchMethod, NewsMetadata, ScrapedArticle, Stage, StatusCounts,
};
use herald_core::traits::ArticleStore;
use sqlx::{PgPool, Pool, Postgres};

fn db_err(e: sqlx::Error) -> AppError {
    AppError::StorageError(e.to_string())
}

/// PostgreSQL-backed [`ArticleStore`].
///
/// Writes are idempotent upserts keyed by `news_id`; each call runs in a
/// single transaction.
#[derive(Clone)]
pub struct ArticleRepository {
    pool: Pool<Postgres>,
}

impl ArticleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Metadata rows whose prerequisite stage is done and `stage` is not.
    pub async fn pending(&self, stage: Stage) -> Result<Vec<NewsMetadata>, AppError> {
        let ready = match stage.prerequisite() {
            Some(prev) => format!("s.{} AND ", prev.column()),
            None => String::new(),
        };
        // Column names come from `Stage::column`, never from input.
        let sql = format!(
            r#"
            SELECT m.news_id, m.news_url, m.title, m.source_name, m.published_at
            FROM news_metadata m
            JOIN article_status s ON s.news_id = m.news_id
            WHERE {ready}NOT s.{column}
            ORDER BY m.published_at DESC NULLS LAST, m.news_id
            "#,
            column = stage.column(),
        );

        let rows = sqlx::query_as::<_, MetadataRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn upsert_metadata(&self, rows: &[NewsMetadata]) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut written = 0;

        for row in rows {
            written += sqlx::query(
                r#"
                INSERT INTO news_metadata (news_id, news_url, title, source_name, published_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (news_id) DO UPDATE SET
                    news_url = EXCLUDED.news_url,
                    title = EXCLUDED.title,
                    source_name = EXCLUDED.source_name,
                    published_at = EXCLUDED.published_at
                "#,
            )
            .bind(&row.news_id)
            .bind(&row.news_url)
            .bind(&row.title)
            .bind(&row.source_name)
            .bind(row.published_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

            sqlx::query(
                r#"
                INSERT INTO article_status (news_id, metadata_fetched)
                VALUES ($1, TRUE)
                ON CONFLICT (news_id) DO UPDATE SET
                    metadata_fetched = TRUE,
                    updated_at = NOW()
                "#,
            )
            .bind(&row.news_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(rows = written, "Upserted metadata");
        Ok(written)
    }

    pub async fn upsert_scraped(&self, rows: &[ScrapedArticle]) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut written = 0;

        for row in rows {
            written += sqlx::query(
                r#"
                INSERT INTO scraped_articles (
                    news_id, news_url, published_at, full_text, word_count, fetch_method,
                    elapsed_seconds, status, rejected_text, spam_score, content_hash, scraped_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (news_id) DO UPDATE SET
                    news_url = EXCLUDED.news_url,
                    published_at = EXCLUDED.published_at,
                    full_text = EXCLUDED.full_text,
                    word_count = EXCLUDED.word_count,
                    fetch_method = EXCLUDED.fetch_method,
                    elapsed_seconds = EXCLUDED.elapsed_seconds,
                    status = EXCLUDED.status,
                    rejected_text = EXCLUDED.rejected_text,
                    spam_score = EXCLUDED.spam_score,
                    content_hash = EXCLUDED.content_hash,
                    scraped_at = EXCLUDED.scraped_at
                "#,
            )
            .bind(&row.news_id)
            .bind(&row.news_url)
            .bind(row.published_at)
            .bind(&row.full_text)
            .bind(row.word_count.map(|w| i32::try_from(w).unwrap_or(i32::MAX)))
            .bind(row.fetch_method.map(|m| m.as_str()))
            .bind(row.elapsed_seconds)
            .bind(&row.status)
            .bind(&row.rejected_text)
            .bind(row.spam_score)
            .bind(&row.content_hash)
            .bind(row.scraped_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(rows = written, "Upserted scraped articles");
        Ok(written)
    }

    /// Set `stage` on every id, creating missing status rows.
    pub async fn mark_stage(&self, news_ids: &[String], stage: Stage) -> Result<u64, AppError> {
        if news_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            r#"
            INSERT INTO article_status (news_id, {column})
            SELECT id, TRUE FROM UNNEST($1::varchar[]) AS t(id)
            ON CONFLICT (news_id) DO UPDATE SET
                {column} = TRUE,
                updated_at = NOW()
            "#,
            column = stage.column(),
        );

        let result = sqlx::query(&sql)
            .bind(news_ids)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    pub async fn status_counts(&self) -> Result<StatusCounts, AppError> {
        let (total, metadata_fetched, scraped, cleaned, llm_processed): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE metadata_fetched),
                    COUNT(*) FILTER (WHERE scraped),
                    COUNT(*) FILTER (WHERE cleaned),
                    COUNT(*) FILTER (WHERE llm_processed)
                FROM article_status
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(StatusCounts {
            total,
            metadata_fetched,
            scraped,
            cleaned,
            llm_processed,
        })
    }

    pub async fn get_status(&self, news_id: &str) -> Result<Option<ArticleStatus>, AppError> {
        let row = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT news_id, metadata_fetched, scraped, cleaned, llm_processed
            FROM article_status
            WHERE news_id = $1
            "#,
        )
        .bind(news_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    pub async fn get_scraped(&self, news_id: &str) -> Result<Option<ScrapedArticle>, AppError> {
        let row = sqlx::query_as::<_, ScrapedRow>(
            r#"
            SELECT news_id, news_url, published_at, full_text, word_count, fetch_method,
                   elapsed_seconds, status, rejected_text, spam_score, content_hash, scraped_at
            FROM scraped_articles
            WHERE news_id = $1
            "#,
        )
        .bind(news_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct MetadataRow {
    news_id: String,
    news_url: String,
    title: Option<String>,
    source_name: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

impl From<MetadataRow> for NewsMetadata {
    fn from(row: MetadataRow) -> Self {
        NewsMetadata {
            news_id: row.news_id,
            news_url: row.news_url,
            title: row.title,
            source_name: row.source_name,
            published_at: row.published_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    news_id: String,
    metadata_fetched: bool,
    scraped: bool,
    cleaned: bool,
    llm_processed: bool,
}

impl From<StatusRow> for ArticleStatus {
    fn from(row: StatusRow) -> Self {
        ArticleStatus {
            news_id: row.news_id,
            metadata_fetched: row.metadata_fetched,
            scraped: row.scraped,
            cleaned: row.cleaned,
            llm_processed: row.llm_processed,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ScrapedRow {
    news_id: String,
    news_url: String,
    published_at: Option<DateTime<Utc>>,
    full_text: Option<String>,
    word_count: Option<i32>,
    fetch_method: Option<String>,
    elapsed_seconds: Option<f64>,
    status: String,
    rejected_text: Option<String>,
    spam_score: Option<f64>,
    content_hash: Option<String>,
    scraped_at: DateTime<Utc>,
}

impl From<ScrapedRow> for ScrapedArticle {
    fn from(row: ScrapedRow) -> Self {
        ScrapedArticle {
            news_id: row.news_id,
            news_url: row.news_url,
            published_at: row.published_at,
            full_text: row.full_text,
            word_count: row.word_count.and_then(|w| u32::try_from(w).ok()),
            fetch_method: row
                .fetch_method
                .and_then(|m| m.parse::<FetchMethod>().ok()),
            elapsed_seconds: row.elapsed_seconds,
            status: row.status,
            rejected_text: row.rejected_text,
            spam_score: row.spam_score,
            content_hash: row.content_hash,
            scraped_at: row.scraped_at,
        }
    }
}

// -- Trait implementation --

impl ArticleStore for ArticleRepository {
    async fn pending(&self, stage: Stage) -> Result<Vec<NewsMetadata>, AppError> {
        ArticleRepository::pending(self, stage).await
    }

    async fn upsert_metadata(&self, rows: &[NewsMetadata]) -> Result<u64, AppError> {
        ArticleRepository::upsert_metadata(self, rows).await
    }

    async fn upsert_scraped(&self, rows: &[ScrapedArticle]) -> Result<u64, AppError> {
        ArticleRepository::upsert_scraped(self, rows).await
    }

    async fn mark_stage(&self, news_ids: &[String], stage: Stage) -> Result<u64, AppError> {
        ArticleRepository::mark_stage(self, news_ids, stage).await
    }

    async fn status_counts(&self) -> Result<StatusCounts, AppError> {
        ArticleRepository::status_counts(self).await
    }
}
