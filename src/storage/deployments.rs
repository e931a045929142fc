use crate::storage::{map_sqlx_error, StorageError, MAX_ROW_LIMIT};
use futures::TryFutureExt;
use sqlx::{Execute, FromRow, QueryBuilder, Sqlite, SqliteConnection};

/// The raw ledger row for one deployment request. Timestamps are epoch
/// milliseconds stored as strings; metadata is a json object of string keys
/// to string values.
#[derive(Clone, Debug, Default, FromRow)]
pub struct Deployment {
    pub request_id: String,
    pub source_url: String,
    pub workflow_name: String,
    pub user_id: String,
    pub status: String,
    pub metadata: String,
    pub started: String,
    pub modified: String,
}

/// Partial update; only supplied fields are written, everything else on the
/// row persists untouched.
#[derive(Clone, Debug, Default)]
pub struct UpdatableFields {
    pub status: Option<String>,
    pub metadata: Option<String>,
    pub modified: Option<String>,
}

pub async fn insert(
    conn: &mut SqliteConnection,
    deployment: &Deployment,
) -> Result<(), StorageError> {
    let query = sqlx::query(
        "INSERT INTO deployments (request_id, source_url, workflow_name, user_id, status, \
        metadata, started, modified) VALUES (?, ?, ?, ?, ?, ?, ?, ?);",
    )
    .bind(&deployment.request_id)
    .bind(&deployment.source_url)
    .bind(&deployment.workflow_name)
    .bind(&deployment.user_id)
    .bind(&deployment.status)
    .bind(&deployment.metadata)
    .bind(&deployment.started)
    .bind(&deployment.modified);

    let sql = query.sql();

    query
        .execute(conn)
        .map_err(|e| map_sqlx_error(e, sql))
        .await?;

    Ok(())
}

pub async fn list(
    conn: &mut SqliteConnection,
    offset: u64,
    limit: u64,
) -> Result<Vec<Deployment>, StorageError> {
    let mut limit = limit;

    if limit == 0 || limit > MAX_ROW_LIMIT {
        limit = MAX_ROW_LIMIT;
    }

    let query = sqlx::query_as::<_, Deployment>(
        "SELECT request_id, source_url, workflow_name, user_id, status, metadata, started, \
        modified FROM deployments ORDER BY started DESC LIMIT ? OFFSET ?;",
    )
    .bind(limit as i64)
    .bind(offset as i64);

    let sql = query.sql();

    query
        .fetch_all(conn)
        .map_err(|e| map_sqlx_error(e, sql))
        .await
}

pub async fn get(
    conn: &mut SqliteConnection,
    request_id: &str,
) -> Result<Deployment, StorageError> {
    let query = sqlx::query_as::<_, Deployment>(
        "SELECT request_id, source_url, workflow_name, user_id, status, metadata, started, \
        modified FROM deployments WHERE request_id = ?;",
    )
    .bind(request_id);

    let sql = query.sql();

    query
        .fetch_one(conn)
        .map_err(|e| map_sqlx_error(e, sql))
        .await
}

pub async fn update(
    conn: &mut SqliteConnection,
    request_id: &str,
    fields: UpdatableFields,
) -> Result<(), StorageError> {
    let mut update_query: QueryBuilder<Sqlite> = QueryBuilder::new(r#"UPDATE deployments SET "#);
    let mut updated_fields_total = 0;

    if let Some(value) = &fields.status {
        if updated_fields_total > 0 {
            update_query.push(", ");
        }
        update_query.push("status = ");
        update_query.push_bind(value);
        updated_fields_total += 1;
    }

    if let Some(value) = &fields.metadata {
        if updated_fields_total > 0 {
            update_query.push(", ");
        }
        update_query.push("metadata = ");
        update_query.push_bind(value);
        updated_fields_total += 1;
    }

    if let Some(value) = &fields.modified {
        if updated_fields_total > 0 {
            update_query.push(", ");
        }
        update_query.push("modified = ");
        update_query.push_bind(value);
        updated_fields_total += 1;
    }

    // If no fields were updated, return an error
    if updated_fields_total == 0 {
        return Err(StorageError::NoFieldsUpdated);
    }

    update_query.push(" WHERE request_id = ");
    update_query.push_bind(request_id);
    update_query.push(";");

    let update_query = update_query.build();

    let sql = update_query.sql();

    update_query
        .execute(conn)
        .await
        .map(|_| ())
        .map_err(|e| map_sqlx_error(e, sql))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::TestHarness;
    use pretty_assertions::assert_eq;
    use sqlx::{pool::PoolConnection, Sqlite};

    async fn setup() -> Result<(TestHarness, PoolConnection<Sqlite>), Box<dyn std::error::Error>> {
        let harness = TestHarness::new().await;
        let mut conn = harness.conn().await.unwrap();

        let deployment = Deployment {
            request_id: "some_request_id".into(),
            source_url: "https://example.com/org/app.git".into(),
            workflow_name: "unnamed".into(),
            user_id: "anonymous".into(),
            status: "PENDING".into(),
            metadata: "{}".into(),
            started: "1712345678000".into(),
            modified: "1712345678000".into(),
        };

        insert(&mut conn, &deployment).await?;

        Ok((harness, conn))
    }

    #[tokio::test]
    async fn test_list_deployments() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let deployments = list(&mut conn, 0, 0)
            .await
            .expect("Failed to list deployments");

        assert!(!deployments.is_empty(), "No deployments returned");

        let some_deployment = deployments
            .iter()
            .find(|d| d.request_id == "some_request_id")
            .expect("Deployment not found");
        assert_eq!(some_deployment.source_url, "https://example.com/org/app.git");
        assert_eq!(some_deployment.status, "PENDING");
    }

    #[tokio::test]
    async fn test_list_deployments_respects_offset_and_limit() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        for i in 0..2 {
            let deployment = Deployment {
                request_id: format!("extra_request_id_{}", i),
                source_url: "https://example.com/org/app.git".into(),
                workflow_name: "unnamed".into(),
                user_id: "anonymous".into(),
                status: "PENDING".into(),
                metadata: "{}".into(),
                started: format!("171234567900{}", i),
                modified: format!("171234567900{}", i),
            };

            insert(&mut conn, &deployment).await.unwrap();
        }

        // A zero limit is clamped rather than treated as "no rows".
        let deployments = list(&mut conn, 0, 0).await.unwrap();
        assert_eq!(deployments.len(), 3);

        let deployments = list(&mut conn, 0, 2).await.unwrap();
        assert_eq!(deployments.len(), 2);

        let deployments = list(&mut conn, 2, 2).await.unwrap();
        assert_eq!(deployments.len(), 1);

        // Asking for more than the cap allows is the same as asking for the cap.
        let deployments = list(&mut conn, 0, MAX_ROW_LIMIT + 100).await.unwrap();
        assert_eq!(deployments.len(), 3);
    }

    #[tokio::test]
    async fn test_get_deployment() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let deployment = get(&mut conn, "some_request_id")
            .await
            .expect("Failed to get deployment");

        assert_eq!(deployment.workflow_name, "unnamed");
        assert_eq!(deployment.status, "PENDING");
    }

    #[tokio::test]
    async fn test_get_unknown_deployment_is_not_found() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let result = get(&mut conn, "no_such_request_id").await.unwrap_err();

        assert_eq!(result, StorageError::NotFound);
    }

    #[tokio::test]
    async fn test_insert_duplicate_deployment() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let duplicate = Deployment {
            request_id: "some_request_id".into(),
            source_url: "https://example.com/org/other.git".into(),
            workflow_name: "unnamed".into(),
            user_id: "anonymous".into(),
            status: "PENDING".into(),
            metadata: "{}".into(),
            started: "1712345679000".into(),
            modified: "1712345679000".into(),
        };

        let result = insert(&mut conn, &duplicate).await.unwrap_err();

        assert_eq!(result, StorageError::Exists);
    }

    #[tokio::test]
    async fn test_update_deployment_merges_fields() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let fields_to_update = UpdatableFields {
            status: Some("IN_PROGRESS".into()),
            modified: Some("1712345679000".into()),
            ..Default::default()
        };

        update(&mut conn, "some_request_id", fields_to_update)
            .await
            .expect("Failed to update deployment");

        let updated_deployment = get(&mut conn, "some_request_id")
            .await
            .expect("Failed to retrieve updated deployment");

        assert_eq!(updated_deployment.status, "IN_PROGRESS");
        assert_eq!(updated_deployment.modified, "1712345679000");

        // Fields that weren't part of the update keep their old values.
        assert_eq!(updated_deployment.metadata, "{}");
        assert_eq!(updated_deployment.started, "1712345678000");
        assert_eq!(
            updated_deployment.source_url,
            "https://example.com/org/app.git"
        );
    }

    #[tokio::test]
    async fn test_update_with_no_fields_is_an_error() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let result = update(&mut conn, "some_request_id", UpdatableFields::default())
            .await
            .unwrap_err();

        assert_eq!(result, StorageError::NoFieldsUpdated);
    }
}
