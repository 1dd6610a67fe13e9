use super::{zone_binding, DistrictWrite, MetricsStore, WriteVerb};
use crate::error::StoreError;
use crate::model::{DistrictRecord, HistoricalDataPoint, InsightReport, StatewideSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use std::collections::HashSet;

const SUMMARY_ID: &str = "live_stats";
const INSIGHTS_ID: &str = "latest";

// Parameters shared by both district statements:
// $1 id, $2 district_name, $3..$8 metrics, $9 zone, $10 zone is fallback,
// $11 last_updated
const INSERT_DISTRICT: &str = r#"
    INSERT INTO districts
    (id, district_name, hps_score, nbws_executed, conviction_ratio, drug_seizure_kg,
     cases_solved, recognitions, zone, last_updated)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $11)
    ON CONFLICT (id) DO UPDATE SET
        district_name    = EXCLUDED.district_name,
        hps_score        = EXCLUDED.hps_score,
        nbws_executed    = EXCLUDED.nbws_executed,
        conviction_ratio = EXCLUDED.conviction_ratio,
        drug_seizure_kg  = EXCLUDED.drug_seizure_kg,
        cases_solved     = EXCLUDED.cases_solved,
        recognitions     = EXCLUDED.recognitions,
        zone = CASE WHEN $10::boolean THEN COALESCE(districts.zone, EXCLUDED.zone)
                    ELSE COALESCE(EXCLUDED.zone, districts.zone) END,
        last_updated     = EXCLUDED.last_updated
"#;

const UPDATE_DISTRICT: &str = r#"
    UPDATE districts SET
        district_name    = $2,
        hps_score        = $3,
        nbws_executed    = $4,
        conviction_ratio = $5,
        drug_seizure_kg  = $6,
        cases_solved     = $7,
        recognitions     = $8,
        zone = CASE WHEN $10::boolean THEN COALESCE(zone, $9) ELSE COALESCE($9, zone) END,
        last_updated     = $11
    WHERE id = $1
"#;

// Byte order on id, same as the in-memory store regardless of the
// database's default collation.
const LIST_DISTRICTS: &str = r#"
    SELECT id, district_name, hps_score, nbws_executed, conviction_ratio,
           drug_seizure_kg, cases_solved, recognitions, zone, last_updated
    FROM districts
    ORDER BY id COLLATE "C"
"#;

const LIST_HISTORICAL: &str = r#"
    SELECT id, month, conviction_ratio, nbws_executed, drug_seizure_kg
    FROM historical_data
    ORDER BY id COLLATE "C"
"#;

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct DistrictRow {
    id: String,
    district_name: String,
    hps_score: f64,
    nbws_executed: f64,
    conviction_ratio: f64,
    drug_seizure_kg: f64,
    cases_solved: f64,
    recognitions: f64,
    zone: Option<String>,
    last_updated: DateTime<Utc>,
}

impl From<DistrictRow> for DistrictRecord {
    fn from(row: DistrictRow) -> Self {
        DistrictRecord {
            id: row.id,
            district_name: row.district_name,
            hps_score: row.hps_score,
            nbws_executed: row.nbws_executed,
            conviction_ratio: row.conviction_ratio,
            drug_seizure_kg: row.drug_seizure_kg,
            cases_solved: row.cases_solved,
            recognitions: row.recognitions,
            zone: row.zone,
            last_updated: row.last_updated,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    statewide_conviction_ratio: f64,
    total_drug_seizure_kg: f64,
    total_nbws_executed: f64,
    total_value_recovered_inr: f64,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct InsightsRow {
    top_performers: Vec<String>,
    risk_districts: Vec<String>,
    natural_language_summary: String,
    predictive_alert: String,
    key_topics: Vec<String>,
    generated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct HistoricalRow {
    id: String,
    month: String,
    conviction_ratio: f64,
    nbws_executed: f64,
    drug_seizure_kg: f64,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn bind_write<'q>(
        query: Query<'q, Postgres, PgArguments>,
        write: &'q DistrictWrite,
    ) -> Query<'q, Postgres, PgArguments> {
        let m = &write.metrics;
        let (zone, zone_is_fallback) = zone_binding(&m.zone);
        query
            .bind(&m.id)
            .bind(&m.district_name)
            .bind(m.hps_score)
            .bind(m.nbws_executed)
            .bind(m.conviction_ratio)
            .bind(m.drug_seizure_kg)
            .bind(m.cases_solved)
            .bind(m.recognitions)
            .bind(zone)
            .bind(zone_is_fallback)
            .bind(write.last_updated)
    }
}

#[async_trait]
impl MetricsStore for PgStore {
    async fn district_ids(&self) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM districts")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn commit_district_batch(&self, writes: &[DistrictWrite]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for write in writes {
            match write.verb {
                WriteVerb::Set => {
                    Self::bind_write(sqlx::query(INSERT_DISTRICT), write)
                        .execute(&mut *tx)
                        .await?;
                }
                WriteVerb::Update => {
                    let result = Self::bind_write(sqlx::query(UPDATE_DISTRICT), write)
                        .execute(&mut *tx)
                        .await?;
                    // Row vanished since the snapshot; fall back to insert
                    if result.rows_affected() == 0 {
                        Self::bind_write(sqlx::query(INSERT_DISTRICT), write)
                            .execute(&mut *tx)
                            .await?;
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_districts(&self) -> Result<Vec<DistrictRecord>, StoreError> {
        let rows: Vec<DistrictRow> = sqlx::query_as(LIST_DISTRICTS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DistrictRecord::from).collect())
    }

    async fn put_summary(&self, summary: &StatewideSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO statewide_summary
            (id, statewide_conviction_ratio, total_drug_seizure_kg, total_nbws_executed,
             total_value_recovered_inr, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                statewide_conviction_ratio = EXCLUDED.statewide_conviction_ratio,
                total_drug_seizure_kg      = EXCLUDED.total_drug_seizure_kg,
                total_nbws_executed        = EXCLUDED.total_nbws_executed,
                total_value_recovered_inr  = EXCLUDED.total_value_recovered_inr,
                last_updated               = EXCLUDED.last_updated
            "#,
        )
        .bind(SUMMARY_ID)
        .bind(summary.statewide_conviction_ratio)
        .bind(summary.total_drug_seizure_volume_kg)
        .bind(summary.total_nbws_executed)
        .bind(summary.total_value_recovered_inr)
        .bind(summary.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_insights(&self, report: &InsightReport) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_insights
            (id, top_performers, risk_districts, natural_language_summary, predictive_alert,
             key_topics, generated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                top_performers           = EXCLUDED.top_performers,
                risk_districts           = EXCLUDED.risk_districts,
                natural_language_summary = EXCLUDED.natural_language_summary,
                predictive_alert         = EXCLUDED.predictive_alert,
                key_topics               = EXCLUDED.key_topics,
                generated_at             = EXCLUDED.generated_at
            "#,
        )
        .bind(INSIGHTS_ID)
        .bind(&report.top_performers)
        .bind(&report.risk_districts)
        .bind(&report.natural_language_summary)
        .bind(&report.predictive_alert)
        .bind(&report.key_topics)
        .bind(report.generated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_historical(&self, point: &HistoricalDataPoint) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO historical_data (id, month, conviction_ratio, nbws_executed, drug_seizure_kg)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                month            = EXCLUDED.month,
                conviction_ratio = EXCLUDED.conviction_ratio,
                nbws_executed    = EXCLUDED.nbws_executed,
                drug_seizure_kg  = EXCLUDED.drug_seizure_kg
            "#,
        )
        .bind(&point.id)
        .bind(&point.month)
        .bind(point.conviction_ratio)
        .bind(point.nbws_executed)
        .bind(point.drug_seizure_kg)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn summary(&self) -> Result<Option<StatewideSummary>, StoreError> {
        let row: Option<SummaryRow> = sqlx::query_as(
            r#"
            SELECT statewide_conviction_ratio, total_drug_seizure_kg, total_nbws_executed,
                   total_value_recovered_inr, last_updated
            FROM statewide_summary
            WHERE id = $1
            "#,
        )
        .bind(SUMMARY_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| StatewideSummary {
            statewide_conviction_ratio: r.statewide_conviction_ratio,
            total_drug_seizure_volume_kg: r.total_drug_seizure_kg,
            total_nbws_executed: r.total_nbws_executed,
            total_value_recovered_inr: r.total_value_recovered_inr,
            last_updated: r.last_updated,
        }))
    }

    async fn insights(&self) -> Result<Option<InsightReport>, StoreError> {
        let row: Option<InsightsRow> = sqlx::query_as(
            r#"
            SELECT top_performers, risk_districts, natural_language_summary, predictive_alert,
                   key_topics, generated_at
            FROM ai_insights
            WHERE id = $1
            "#,
        )
        .bind(INSIGHTS_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| InsightReport {
            top_performers: r.top_performers,
            risk_districts: r.risk_districts,
            natural_language_summary: r.natural_language_summary,
            predictive_alert: r.predictive_alert,
            key_topics: r.key_topics,
            generated_at: r.generated_at,
        }))
    }

    async fn historical(&self) -> Result<Vec<HistoricalDataPoint>, StoreError> {
        let rows: Vec<HistoricalRow> = sqlx::query_as(LIST_HISTORICAL)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| HistoricalDataPoint {
                id: r.id,
                month: r.month,
                conviction_ratio: r.conviction_ratio,
                nbws_executed: r.nbws_executed,
                drug_seizure_kg: r.drug_seizure_kg,
            })
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
