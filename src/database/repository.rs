use sqlx::{postgres::PgRow, FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::database::manager::DatabaseError;

/// Company-scoped access to one table.
///
/// Every statement built here is filtered by `company_id`; soft-deleted rows
/// are excluded unless the table has no `deleted_at` column.
pub struct Repository<T> {
    table_name: &'static str,
    label: &'static str,
    soft_delete: bool,
    pool: PgPool,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Repository<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    /// `label` names the record in not-found messages ("Project", "Task")
    pub fn new(table_name: &'static str, label: &'static str, pool: PgPool) -> Self {
        Self {
            table_name,
            label,
            soft_delete: true,
            pool,
            _phantom: std::marker::PhantomData,
        }
    }

    /// For tables whose rows are removed outright
    pub fn hard_delete(mut self) -> Self {
        self.soft_delete = false;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `SELECT * FROM <table> WHERE company_id = $1 [AND deleted_at IS NULL]`;
    /// callers append `AND ...` clauses
    pub fn select(&self, company_id: Uuid) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT * FROM {} WHERE company_id = ", self.table_name));
        qb.push_bind(company_id);
        if self.soft_delete {
            qb.push(" AND deleted_at IS NULL");
        }
        qb
    }

    pub async fn find_optional(&self, company_id: Uuid, id: Uuid) -> Result<Option<T>, DatabaseError> {
        let mut qb = self.select(company_id);
        qb.push(" AND id = ").push_bind(id);
        Ok(qb.build_query_as::<T>().fetch_optional(&self.pool).await?)
    }

    /// Like `find_optional`, but a missing row is a `NotFound` error
    pub async fn find(&self, company_id: Uuid, id: Uuid) -> Result<T, DatabaseError> {
        self.find_optional(company_id, id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} {} not found", self.label, id)))
    }

    /// Appends ordering and pagination, then fetches
    pub async fn fetch_page(
        &self,
        mut qb: QueryBuilder<'static, Postgres>,
        order_by: &str,
        (limit, offset): (i64, i64),
    ) -> Result<Vec<T>, DatabaseError> {
        qb.push(" ORDER BY ").push(order_by);
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);
        Ok(qb.build_query_as::<T>().fetch_all(&self.pool).await?)
    }

    /// Marks the row deleted (or removes it for hard-delete tables)
    pub async fn delete(&self, company_id: Uuid, id: Uuid) -> Result<(), DatabaseError> {
        let sql = if self.soft_delete {
            format!(
                "UPDATE {} SET deleted_at = now(), updated_at = now() \
                 WHERE company_id = $1 AND id = $2 AND deleted_at IS NULL",
                self.table_name
            )
        } else {
            format!("DELETE FROM {} WHERE company_id = $1 AND id = $2", self.table_name)
        };

        let result = sqlx::query(&sql).bind(company_id).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("{} {} not found", self.label, id)));
        }
        Ok(())
    }

    /// True when `id` names a live row of this table in the company
    pub async fn exists(&self, company_id: Uuid, id: Uuid) -> Result<bool, DatabaseError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT EXISTS (SELECT 1 FROM {} WHERE company_id = ", self.table_name));
        qb.push_bind(company_id);
        qb.push(" AND id = ").push_bind(id);
        if self.soft_delete {
            qb.push(" AND deleted_at IS NULL");
        }
        qb.push(")");
        let (found,): (bool,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Project;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/bizhub_test")
            .unwrap()
    }

    #[tokio::test]
    async fn select_is_company_scoped() {
        let repo: Repository<Project> = Repository::new("projects", "Project", lazy_pool());
        let qb = repo.select(Uuid::nil());
        assert_eq!(
            qb.sql(),
            "SELECT * FROM projects WHERE company_id = $1 AND deleted_at IS NULL"
        );
    }

    #[tokio::test]
    async fn hard_delete_tables_skip_deleted_at() {
        let repo: Repository<Project> = Repository::new("payments", "Payment", lazy_pool()).hard_delete();
        let mut qb = repo.select(Uuid::nil());
        qb.push(" AND id = ").push_bind(Uuid::nil());
        assert_eq!(qb.sql(), "SELECT * FROM payments WHERE company_id = $1 AND id = $2");
    }
}
