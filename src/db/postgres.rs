// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! PostgreSQL store.

use super::{
    CanonicalActivityStore, CredentialLock, CredentialStore, RawActivityStore, UserStore,
    VerificationTokenStore,
};
use crate::error::StoreError;
use crate::models::{
    CanonicalActivity, Enrichment, Provider, ProviderCredential, RawActivity, Sport, Tag, User,
    VolumePoint, VolumeQuery, WebhookVerification,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

const CREDENTIAL_COLUMNS: &str =
    "provider_id, user_id, access_token, refresh_token, expires_at";

const RAW_COLUMNS: &str = "id, provider_id, user_id, provider_activity_id, start_time, \
     elapsed_time, iana_timezone, utc_offset, data, detail_uri, processed_at";

const ACTIVITY_COLUMNS: &str = "id, provider_id, user_id, raw_activity_id, name, description, \
     sport, start_time, end_time, iana_timezone, utc_offset, elapsed_time, moving_time, \
     distance, elev_gain, avg_speed, avg_hr, max_hr, summary_polyline, summary_route, \
     gpx_file_uri";

const USER_COLUMNS: &str = "id, provider_id, external_id, first_name, last_name, created_at";

/// PostgreSQL-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ─── Credentials ────────────────────────────────────────────────────────────

/// Row lock held by an open transaction (`SELECT ... FOR UPDATE`).
struct PgCredentialLock {
    tx: Transaction<'static, Postgres>,
    credential: ProviderCredential,
}

#[async_trait]
impl CredentialLock for PgCredentialLock {
    fn credential(&self) -> &ProviderCredential {
        &self.credential
    }

    async fn commit(
        self: Box<Self>,
        updated: Option<&ProviderCredential>,
    ) -> Result<(), StoreError> {
        let PgCredentialLock { mut tx, credential } = *self;

        if let Some(updated) = updated {
            sqlx::query(
                "UPDATE provider_credentials \
                 SET access_token = $3, refresh_token = $4, \
                     expires_at = GREATEST(expires_at, $5), updated_at = now() \
                 WHERE provider_id = $1 AND user_id = $2",
            )
            .bind(credential.provider_id)
            .bind(credential.user_id)
            .bind(&updated.access_token)
            .bind(&updated.refresh_token)
            .bind(updated.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn get_credential(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Option<ProviderCredential>, StoreError> {
        let sql = format!(
            "SELECT {} FROM provider_credentials \
             WHERE provider_id = $1 AND user_id = $2 AND deleted_at IS NULL",
            CREDENTIAL_COLUMNS
        );
        let credential = sqlx::query_as::<_, ProviderCredential>(&sql)
            .bind(provider_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(credential)
    }

    async fn save_credential(&self, credential: &ProviderCredential) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO provider_credentials \
                 (provider_id, user_id, access_token, refresh_token, expires_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (provider_id, user_id) DO UPDATE SET \
                 access_token = EXCLUDED.access_token, \
                 refresh_token = EXCLUDED.refresh_token, \
                 expires_at = GREATEST(provider_credentials.expires_at, EXCLUDED.expires_at), \
                 deleted_at = NULL, \
                 updated_at = now()",
        )
        .bind(credential.provider_id)
        .bind(credential.user_id)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lock_credential(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Option<Box<dyn CredentialLock>>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM provider_credentials \
             WHERE provider_id = $1 AND user_id = $2 AND deleted_at IS NULL \
             FOR UPDATE",
            CREDENTIAL_COLUMNS
        );
        let credential = sqlx::query_as::<_, ProviderCredential>(&sql)
            .bind(provider_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        match credential {
            Some(credential) => Ok(Some(Box::new(PgCredentialLock { tx, credential }))),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }
}

// ─── Raw activities ─────────────────────────────────────────────────────────

#[async_trait]
impl RawActivityStore for PgStore {
    async fn upsert_raw_activity(&self, raw: &RawActivity) -> Result<Uuid, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO raw_activities \
                 (id, provider_id, user_id, provider_activity_id, start_time, elapsed_time, \
                  iana_timezone, utc_offset, data, detail_uri) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (provider_id, user_id, provider_activity_id) DO UPDATE SET \
                 start_time = EXCLUDED.start_time, \
                 elapsed_time = EXCLUDED.elapsed_time, \
                 iana_timezone = EXCLUDED.iana_timezone, \
                 utc_offset = EXCLUDED.utc_offset, \
                 data = EXCLUDED.data, \
                 detail_uri = COALESCE(EXCLUDED.detail_uri, raw_activities.detail_uri), \
                 updated_at = now() \
             RETURNING id",
        )
        .bind(raw.id)
        .bind(raw.provider_id)
        .bind(raw.user_id)
        .bind(&raw.provider_activity_id)
        .bind(raw.start_time)
        .bind(raw.elapsed_time)
        .bind(&raw.iana_timezone)
        .bind(raw.utc_offset)
        .bind(&raw.data)
        .bind(&raw.detail_uri)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list_raw_activities(
        &self,
        provider_id: i32,
        user_id: Uuid,
    ) -> Result<Vec<RawActivity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM raw_activities WHERE provider_id = $1 AND user_id = $2",
            RAW_COLUMNS
        );
        let rows = sqlx::query_as::<_, RawActivity>(&sql)
            .bind(provider_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_raw_activity(&self, id: Uuid) -> Result<Option<RawActivity>, StoreError> {
        let sql = format!("SELECT {} FROM raw_activities WHERE id = $1", RAW_COLUMNS);
        let row = sqlx::query_as::<_, RawActivity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn attach_detail(&self, id: Uuid, detail_uri: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE raw_activities SET detail_uri = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(detail_uri)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE raw_activities SET processed_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_unprocessed(&self, limit: i64) -> Result<Vec<RawActivity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM raw_activities \
             WHERE processed_at IS NULL AND detail_uri IS NOT NULL \
             ORDER BY created_at LIMIT $1",
            RAW_COLUMNS
        );
        let rows = sqlx::query_as::<_, RawActivity>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

// ─── Canonical activities ───────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    provider_id: i32,
    user_id: Uuid,
    raw_activity_id: Uuid,
    name: String,
    description: Option<String>,
    sport: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    iana_timezone: Option<String>,
    utc_offset: Option<i32>,
    elapsed_time: i32,
    moving_time: i32,
    distance: i32,
    elev_gain: Option<i32>,
    avg_speed: f64,
    avg_hr: Option<i16>,
    max_hr: Option<i16>,
    summary_polyline: Option<String>,
    summary_route: Option<serde_json::Value>,
    gpx_file_uri: Option<String>,
}

impl TryFrom<ActivityRow> for CanonicalActivity {
    type Error = StoreError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        let sport: Sport = row
            .sport
            .parse()
            .map_err(|e: crate::models::activity::UnknownSport| StoreError::Decode(e.to_string()))?;

        Ok(CanonicalActivity {
            id: row.id,
            provider_id: row.provider_id,
            user_id: row.user_id,
            raw_activity_id: row.raw_activity_id,
            name: row.name,
            description: row.description,
            sport,
            start_time: row.start_time,
            end_time: row.end_time,
            iana_timezone: row.iana_timezone,
            utc_offset: row.utc_offset,
            elapsed_time: row.elapsed_time,
            moving_time: row.moving_time,
            distance: row.distance,
            elev_gain: row.elev_gain,
            avg_speed: row.avg_speed,
            avg_hr: row.avg_hr,
            max_hr: row.max_hr,
            summary_polyline: row.summary_polyline,
            summary_route: row.summary_route,
            gpx_file_uri: row.gpx_file_uri,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VolumeRow {
    sport: String,
    period: NaiveDate,
    activity_count: i64,
    total_distance_meters: i64,
    total_elapsed_time_seconds: i64,
    total_moving_time_seconds: i64,
    total_elevation_gain_meters: i64,
}

#[async_trait]
impl CanonicalActivityStore for PgStore {
    async fn upsert_activity(
        &self,
        activity: &CanonicalActivity,
    ) -> Result<CanonicalActivity, StoreError> {
        let sql = format!(
            "INSERT INTO activities \
                 (id, provider_id, user_id, raw_activity_id, name, description, sport, \
                  start_time, end_time, iana_timezone, utc_offset, elapsed_time, moving_time, \
                  distance, elev_gain, avg_speed, summary_polyline, summary_route) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (provider_id, user_id, raw_activity_id) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 description = EXCLUDED.description, \
                 sport = EXCLUDED.sport, \
                 start_time = EXCLUDED.start_time, \
                 end_time = EXCLUDED.end_time, \
                 iana_timezone = EXCLUDED.iana_timezone, \
                 utc_offset = EXCLUDED.utc_offset, \
                 elapsed_time = EXCLUDED.elapsed_time, \
                 moving_time = EXCLUDED.moving_time, \
                 distance = EXCLUDED.distance, \
                 elev_gain = EXCLUDED.elev_gain, \
                 avg_speed = EXCLUDED.avg_speed, \
                 summary_polyline = EXCLUDED.summary_polyline, \
                 summary_route = EXCLUDED.summary_route, \
                 updated_at = now() \
             RETURNING {}",
            ACTIVITY_COLUMNS
        );

        let row = sqlx::query_as::<_, ActivityRow>(&sql)
            .bind(activity.id)
            .bind(activity.provider_id)
            .bind(activity.user_id)
            .bind(activity.raw_activity_id)
            .bind(&activity.name)
            .bind(&activity.description)
            .bind(activity.sport.as_str())
            .bind(activity.start_time)
            .bind(activity.end_time)
            .bind(&activity.iana_timezone)
            .bind(activity.utc_offset)
            .bind(activity.elapsed_time)
            .bind(activity.moving_time)
            .bind(activity.distance)
            .bind(activity.elev_gain)
            .bind(activity.avg_speed)
            .bind(&activity.summary_polyline)
            .bind(&activity.summary_route)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn update_enrichment(
        &self,
        activity_id: Uuid,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE activities \
             SET avg_hr = $2, max_hr = $3, gpx_file_uri = $4, updated_at = now() \
             WHERE id = $1",
        )
        .bind(activity_id)
        .bind(enrichment.avg_hr)
        .bind(enrichment.max_hr)
        .bind(&enrichment.gpx_file_uri)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_activity_by_raw(
        &self,
        raw_activity_id: Uuid,
    ) -> Result<Option<CanonicalActivity>, StoreError> {
        let sql = format!(
            "SELECT {} FROM activities WHERE raw_activity_id = $1",
            ACTIVITY_COLUMNS
        );
        let row = sqlx::query_as::<_, ActivityRow>(&sql)
            .bind(raw_activity_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CanonicalActivity::try_from).transpose()
    }

    async fn link_tags(&self, activity_id: Uuid, tags: &[String]) -> Result<(), StoreError> {
        // ON CONFLICT DO UPDATE may touch each row only once per statement
        let mut names: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !names.contains(tag) {
                names.push(tag.clone());
            }
        }
        if names.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = names.iter().map(|_| Uuid::new_v4()).collect();

        sqlx::query(
            "WITH upserted AS ( \
                 INSERT INTO tags (id, name) \
                 SELECT * FROM unnest($1::uuid[], $2::text[]) \
                 ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
                 RETURNING id \
             ) \
             INSERT INTO activity_tags (activity_id, tag_id) \
             SELECT $3, id FROM upserted \
             ON CONFLICT DO NOTHING",
        )
        .bind(&ids)
        .bind(&names)
        .bind(activity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn activity_tags(&self, activity_id: Uuid) -> Result<Vec<Tag>, StoreError> {
        let tags = sqlx::query_as::<_, Tag>(
            "SELECT t.id, t.name, t.description \
             FROM tags t JOIN activity_tags at ON at.tag_id = t.id \
             WHERE at.activity_id = $1 \
             ORDER BY t.name",
        )
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    async fn athlete_volume(
        &self,
        query: &VolumeQuery,
    ) -> Result<Vec<(Sport, VolumePoint)>, StoreError> {
        let sports: Vec<&str> = query.sports.iter().map(|s| s.as_str()).collect();
        let start = query.start_date.and_hms_opt(0, 0, 0).map(|t| t.and_utc());

        let rows = sqlx::query_as::<_, VolumeRow>(
            "SELECT a.sport, \
                    date_trunc($3, a.start_time AT TIME ZONE 'UTC')::date AS period, \
                    COUNT(*) AS activity_count, \
                    COALESCE(SUM(a.distance), 0)::bigint AS total_distance_meters, \
                    COALESCE(SUM(a.elapsed_time), 0)::bigint AS total_elapsed_time_seconds, \
                    COALESCE(SUM(a.moving_time), 0)::bigint AS total_moving_time_seconds, \
                    COALESCE(SUM(a.elev_gain), 0)::bigint AS total_elevation_gain_meters \
             FROM activities a JOIN providers p ON p.id = a.provider_id \
             WHERE a.user_id = $1 AND p.slug = $2 AND a.start_time >= $4 \
               AND a.sport = ANY($5) \
             GROUP BY a.sport, period \
             ORDER BY a.sport, period",
        )
        .bind(query.user_id)
        .bind(&query.provider_slug)
        .bind(query.frequency.as_str())
        .bind(start)
        .bind(&sports)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let sport: Sport = row.sport.parse().map_err(
                    |e: crate::models::activity::UnknownSport| StoreError::Decode(e.to_string()),
                )?;
                Ok((
                    sport,
                    VolumePoint {
                        period: row.period,
                        activity_count: row.activity_count,
                        total_distance_meters: row.total_distance_meters,
                        total_elapsed_time_seconds: row.total_elapsed_time_seconds,
                        total_moving_time_seconds: row.total_moving_time_seconds,
                        total_elevation_gain_meters: row.total_elevation_gain_meters,
                    },
                ))
            })
            .collect()
    }
}

// ─── Users ──────────────────────────────────────────────────────────────────

#[async_trait]
impl UserStore for PgStore {
    async fn provider_by_slug(&self, slug: &str) -> Result<Option<Provider>, StoreError> {
        let provider =
            sqlx::query_as::<_, Provider>("SELECT id, slug, name FROM providers WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;
        Ok(provider)
    }

    async fn provider_by_id(&self, id: i32) -> Result<Option<Provider>, StoreError> {
        let provider =
            sqlx::query_as::<_, Provider>("SELECT id, slug, name FROM providers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(provider)
    }

    async fn upsert_user(&self, user: &User) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (id, provider_id, external_id, first_name, last_name, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (provider_id, external_id) DO UPDATE SET \
                 first_name = COALESCE(EXCLUDED.first_name, users.first_name), \
                 last_name = COALESCE(EXCLUDED.last_name, users.last_name), \
                 updated_at = now() \
             RETURNING {}",
            USER_COLUMNS
        );
        let stored = sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(user.provider_id)
            .bind(&user.external_id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn find_user(
        &self,
        provider_id: i32,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {} FROM users WHERE provider_id = $1 AND external_id = $2",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(provider_id)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}

// ─── Webhook verification tokens ────────────────────────────────────────────

#[async_trait]
impl VerificationTokenStore for PgStore {
    async fn insert_verification(
        &self,
        verification: &WebhookVerification,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO webhook_verifications (token, created_at, expires_at) \
             VALUES ($1, $2, $3)",
        )
        .bind(&verification.token)
        .bind(verification.created_at)
        .bind(verification.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_unexpired(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookVerification>, StoreError> {
        let taken = sqlx::query_as::<_, WebhookVerification>(
            "DELETE FROM webhook_verifications \
             WHERE token = $1 AND expires_at > $2 \
             RETURNING token, created_at, expires_at",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(taken)
    }

    async fn verification_exists(&self, token: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM webhook_verifications WHERE token = $1)",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn delete_verification(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM webhook_verifications WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM webhook_verifications WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
