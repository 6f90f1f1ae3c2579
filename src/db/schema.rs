use sqlx::PgPool;

use crate::models::StoreCode;

/// 为一个仓库分区建表 (幂等)
pub async fn ensure_schema(pool: &PgPool, store: &StoreCode) -> Result<(), sqlx::Error> {
    let statements = [
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id UUID PRIMARY KEY,
                resi TEXT NOT NULL,
                platform TEXT NOT NULL,
                sub_channel TEXT NOT NULL,
                scanned_by TEXT NOT NULL,
                verified_by TEXT,
                stage1_scanned_at TIMESTAMPTZ,
                stage2_verified_at TIMESTAMPTZ,
                stage3_completed_at TIMESTAMPTZ,
                CONSTRAINT {t}_scope_key UNIQUE (resi, platform, sub_channel),
                CONSTRAINT {t}_stage_chain CHECK (
                    (stage3_completed_at IS NULL OR stage2_verified_at IS NOT NULL)
                    AND (stage2_verified_at IS NULL OR stage1_scanned_at IS NOT NULL)
                )
            )
            "#,
            t = store.table("scan_resi")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {t}_resi_idx ON {t} (resi)",
            t = store.table("scan_resi")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id UUID PRIMARY KEY,
                resi TEXT NOT NULL,
                order_id TEXT NOT NULL,
                part_number TEXT NOT NULL,
                product_name TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                harga_total NUMERIC NOT NULL,
                customer TEXT NOT NULL,
                platform TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            t = store.table("resi_items")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id UUID PRIMARY KEY,
                resi TEXT NOT NULL,
                part_number TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                harga_total NUMERIC NOT NULL,
                customer TEXT NOT NULL,
                platform TEXT NOT NULL,
                sub_channel TEXT NOT NULL,
                processed_by TEXT NOT NULL,
                sold_at TIMESTAMPTZ NOT NULL
            )
            "#,
            t = store.table("sold_items")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                part_number TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                quantity INTEGER NOT NULL DEFAULT 0
            )
            "#,
            t = store.table("stock")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                part_number TEXT NOT NULL,
                alias_name TEXT NOT NULL,
                source TEXT NOT NULL,
                PRIMARY KEY (part_number, alias_name, source)
            )
            "#,
            t = store.table("product_alias")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            t = store.table("resellers")
        ),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {t}_name_key ON {t} (lower(name))",
            t = store.table("resellers")
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id UUID PRIMARY KEY,
                resi TEXT NOT NULL UNIQUE,
                part_number TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                sub_channel TEXT NOT NULL,
                scanned_by TEXT NOT NULL,
                scanned_at TIMESTAMPTZ NOT NULL
            )
            "#,
            t = store.table("kilat")
        ),
    ];

    for sql in &statements {
        sqlx::query(sql).execute(pool).await?;
    }
    tracing::info!("Schema ready for store {}", store);
    Ok(())
}
