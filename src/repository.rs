use crate::{
    models::{
        AuditEntry, AuditLogEntry, DonationStatusUpdate, NewInventory, NewProfile, ProfileRecord,
        ProfileSummary, RequestStatus, StaffMember, StaffRole,
    },
    permissions::RoleGrant,
};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, migrate::Migrator};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Schema changes this service relies on, embedded from `migrations/`.
pub static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// ProfileDirectory
///
/// The only path to profile rows with elevated (row-level-security bypassing)
/// access. Narrow on purpose: the session resolver and the admin grant edits
/// need exactly these two reads.
///
/// `Ok(None)` means "no such row" and is distinct from `Err`, which the
/// resolver treats as an unreachable backend.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<ProfileRecord>, RepoError>;

    /// The blood bank the user administers, else the one they are staff at.
    async fn find_blood_bank_link(&self, user_id: Uuid) -> Result<Option<Uuid>, RepoError>;
}

/// DirectoryState
///
/// The concrete type used to share the privileged directory across the application state.
pub type DirectoryState = Arc<dyn ProfileDirectory>;

/// Repository
///
/// Everything else the service writes or lists: profile creation at sign-up,
/// admin grant edits, blood-bank staff and operations, and the audit log.
///
/// Every mutating method takes the `AuditEntry` describing it. The change and
/// its entry are committed together or not at all; a method that reports
/// `false` has written neither.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Profiles ---
    async fn create_profile(&self, profile: NewProfile) -> Result<(), RepoError>;
    async fn list_profiles(&self) -> Result<Vec<ProfileSummary>, RepoError>;
    async fn find_user_id_by_email(&self, email: &str) -> Result<Option<Uuid>, RepoError>;
    /// Persists role + effective permissions + revision. Returns false when the
    /// stored revision is no longer the one the grant was derived from.
    async fn save_role_grant(
        &self,
        user_id: Uuid,
        grant: &RoleGrant,
        audit: AuditEntry,
    ) -> Result<bool, RepoError>;

    // --- Blood Bank Staff ---
    async fn list_staff(&self, blood_bank_id: Uuid) -> Result<Vec<StaffMember>, RepoError>;
    /// Returns false if the user is already on the staff list.
    async fn add_staff(
        &self,
        blood_bank_id: Uuid,
        user_id: Uuid,
        role: StaffRole,
        audit: AuditEntry,
    ) -> Result<bool, RepoError>;
    async fn remove_staff(
        &self,
        blood_bank_id: Uuid,
        user_id: Uuid,
        audit: AuditEntry,
    ) -> Result<bool, RepoError>;

    // --- Blood Bank Operations ---
    // `scope` restricts a change to one bank's rows; `None` is unrestricted.
    async fn update_donation_status(
        &self,
        donation_id: Uuid,
        update: &DonationStatusUpdate,
        scope: Option<Uuid>,
        audit: AuditEntry,
    ) -> Result<bool, RepoError>;
    /// A scoped update also claims an unassigned request for that bank.
    async fn update_request_status(
        &self,
        request_id: Uuid,
        status: RequestStatus,
        scope: Option<Uuid>,
        audit: AuditEntry,
    ) -> Result<bool, RepoError>;
    async fn add_inventory(&self, batch: &NewInventory, audit: AuditEntry) -> Result<(), RepoError>;

    // --- Audit Log ---
    async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLogEntry>, RepoError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// Backed by the Supabase Postgres database through a direct connection, which
/// runs with service-level privileges.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Brings the schema up to date. Must succeed before serving traffic:
    /// profile reads select columns the migrations add.
    pub async fn run_migrations(&self) -> Result<(), RepoError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

async fn insert_audit(conn: &mut PgConnection, entry: AuditEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (user_id, action, table_name, record_id, old_values, new_values)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.action)
    .bind(entry.table_name)
    .bind(entry.record_id)
    .bind(entry.old_values)
    .bind(entry.new_values)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ProfileDirectory for PostgresRepository {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<ProfileRecord>, RepoError> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            r#"
            SELECT id, email, full_name, role::text AS role, permissions,
                   COALESCE(permissions_revision, 0) AS permissions_revision
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_blood_bank_link(&self, user_id: Uuid) -> Result<Option<Uuid>, RepoError> {
        let administered =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM blood_banks WHERE admin_id = $1 LIMIT 1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        if administered.is_some() {
            return Ok(administered);
        }

        let staffed = sqlx::query_scalar::<_, Uuid>(
            "SELECT blood_bank_id FROM blood_bank_staff WHERE user_id = $1 LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(staffed)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// create_profile
    ///
    /// Mirrors a fresh auth user into `public.users`, seeded with the grant's
    /// effective permissions.
    async fn create_profile(&self, profile: NewProfile) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, full_name, role, phone, blood_type, permissions, permissions_revision)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(profile.id)
        .bind(profile.email)
        .bind(profile.full_name)
        .bind(profile.grant.role().as_str())
        .bind(profile.phone)
        .bind(profile.blood_type)
        .bind(profile.grant.effective().to_json())
        .bind(profile.grant.revision())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileSummary>, RepoError> {
        let rows = sqlx::query_as::<_, ProfileSummary>(
            "SELECT id, email, full_name, role::text AS role, created_at FROM users ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_user_id_by_email(&self, email: &str) -> Result<Option<Uuid>, RepoError> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// save_role_grant
    ///
    /// Optimistic write: only succeeds if nobody bumped the revision since the
    /// grant was loaded.
    async fn save_role_grant(
        &self,
        user_id: Uuid,
        grant: &RoleGrant,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = $2, permissions = $3, permissions_revision = $4, updated_at = NOW()
            WHERE id = $1 AND COALESCE(permissions_revision, 0) = $5
            "#,
        )
        .bind(user_id)
        .bind(grant.role().as_str())
        .bind(grant.effective().to_json())
        .bind(grant.revision())
        .bind(grant.revision() - 1)
        .execute(&mut *tx)
        .await?;

        // Dropping `tx` without commit rolls back.
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_staff(&self, blood_bank_id: Uuid) -> Result<Vec<StaffMember>, RepoError> {
        let rows = sqlx::query_as::<_, StaffMember>(
            r#"
            SELECT s.id, s.user_id, s.role::text AS role, u.full_name, u.email, u.phone, s.created_at
            FROM blood_bank_staff s
            JOIN users u ON u.id = s.user_id
            WHERE s.blood_bank_id = $1
            ORDER BY s.created_at ASC
            "#,
        )
        .bind(blood_bank_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn add_staff(
        &self,
        blood_bank_id: Uuid,
        user_id: Uuid,
        role: StaffRole,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO blood_bank_staff (blood_bank_id, user_id, role) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(blood_bank_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn remove_staff(
        &self,
        blood_bank_id: Uuid,
        user_id: Uuid,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("DELETE FROM blood_bank_staff WHERE blood_bank_id = $1 AND user_id = $2")
                .bind(blood_bank_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_donation_status(
        &self,
        donation_id: Uuid,
        update: &DonationStatusUpdate,
        scope: Option<Uuid>,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE donations
            SET status = $2,
                actual_date = COALESCE($3, actual_date),
                units_donated = COALESCE($4, units_donated)
            WHERE id = $1 AND ($5::uuid IS NULL OR blood_bank_id = $5)
            "#,
        )
        .bind(donation_id)
        .bind(update.status.as_str())
        .bind(update.actual_date)
        .bind(update.units_donated)
        .bind(scope)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_request_status(
        &self,
        request_id: Uuid,
        status: RequestStatus,
        scope: Option<Uuid>,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE blood_requests
            SET status = $2, blood_bank_id = COALESCE($3, blood_bank_id)
            WHERE id = $1 AND ($3::uuid IS NULL OR blood_bank_id IS NULL OR blood_bank_id = $3)
            "#,
        )
        .bind(request_id)
        .bind(status.as_str())
        .bind(scope)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn add_inventory(&self, batch: &NewInventory, audit: AuditEntry) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO blood_inventory
                (id, blood_bank_id, blood_type, units_available, collection_date, expiry_date,
                 donor_id, batch_number, testing_status, is_available)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', true)
            "#,
        )
        .bind(batch.id)
        .bind(batch.blood_bank_id)
        .bind(batch.blood_type.as_str())
        .bind(batch.units_available)
        .bind(batch.collection_date)
        .bind(batch.expiry_date)
        .bind(batch.donor_id)
        .bind(batch.batch_number.as_deref())
        .execute(&mut *tx)
        .await?;

        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLogEntry>, RepoError> {
        let rows = sqlx::query_as::<_, AuditLogEntry>(
            r#"
            SELECT id, user_id, action, table_name, record_id, old_values, new_values, created_at
            FROM audit_logs
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// AuditedDirectory
///
/// Wraps a directory so every privileged read leaves a trace under the
/// `audit` target.
pub struct AuditedDirectory<D> {
    inner: D,
}

impl<D: ProfileDirectory> AuditedDirectory<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<D: ProfileDirectory> ProfileDirectory for AuditedDirectory<D> {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<ProfileRecord>, RepoError> {
        let result = self.inner.find_profile(user_id).await;
        tracing::info!(
            target: "audit",
            %user_id,
            found = matches!(result, Ok(Some(_))),
            failed = result.is_err(),
            "privileged profile lookup"
        );
        result
    }

    async fn find_blood_bank_link(&self, user_id: Uuid) -> Result<Option<Uuid>, RepoError> {
        let result = self.inner.find_blood_bank_link(user_id).await;
        tracing::info!(
            target: "audit",
            %user_id,
            failed = result.is_err(),
            "privileged blood bank link lookup"
        );
        result
    }
}
