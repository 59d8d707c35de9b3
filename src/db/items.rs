use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ItemDraft, ItemEdit, ItemModel, MoveUpdate};

const ITEM_COLUMNS: &str = "id::text, serial, asset_tag, item_type, is_consumable, status, \
                            current_holder, current_location, city, brand, model, mac, value, \
                            observations, photo, initial_amount, current_amount, unit, \
                            created_at::text, updated_at::text";

pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<ItemModel>> {
    let item: Option<ItemModel> =
        sqlx::query_as(&format!("SELECT {} FROM items WHERE id = $1", ITEM_COLUMNS))
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(AppError::Database)?;
    Ok(item)
}

pub async fn find_by_serial(conn: &mut PgConnection, serial: &str) -> AppResult<Option<ItemModel>> {
    let item: Option<ItemModel> = sqlx::query_as(&format!(
        "SELECT {} FROM items WHERE serial = $1",
        ITEM_COLUMNS
    ))
    .bind(serial)
    .fetch_optional(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(item)
}

/// Inserts a new item from a sanitized draft. `holder` is only set by the
/// installation and import paths; regular creation starts unassigned.
pub async fn insert(
    conn: &mut PgConnection,
    draft: &ItemDraft,
    holder: Option<&str>,
) -> AppResult<ItemModel> {
    let item: ItemModel = sqlx::query_as(&format!(
        "INSERT INTO items (serial, asset_tag, item_type, is_consumable, status, \
         current_holder, current_location, city, brand, model, mac, value, observations, \
         photo, initial_amount, current_amount, unit) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
         RETURNING {}",
        ITEM_COLUMNS
    ))
    .bind(&draft.serial)
    .bind(&draft.asset_tag)
    .bind(&draft.item_type)
    .bind(draft.is_consumable)
    .bind(draft.status())
    .bind(holder)
    .bind(draft.location())
    .bind(&draft.city)
    .bind(&draft.brand)
    .bind(&draft.model)
    .bind(&draft.mac)
    .bind(draft.value)
    .bind(&draft.observations)
    .bind(&draft.photo)
    .bind(draft.initial_amount)
    .bind(draft.current_amount)
    .bind(&draft.unit)
    .fetch_one(conn)
    .await
    .map_err(AppError::from_db)?;
    Ok(item)
}

/// Fails with a typed conflict if another item already uses the serial or
/// asset tag an edit is about to claim.
pub async fn check_unique_for_edit(
    conn: &mut PgConnection,
    id: Uuid,
    serial: Option<&str>,
    asset_tag: Option<&str>,
) -> AppResult<()> {
    if serial.is_none() && asset_tag.is_none() {
        return Ok(());
    }
    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id::text FROM items \
         WHERE (serial = $2 OR asset_tag = $3) AND id <> $1 \
         LIMIT 1",
    )
    .bind(id)
    .bind(serial)
    .bind(asset_tag)
    .fetch_optional(conn)
    .await
    .map_err(AppError::Database)?;

    if existing.is_some() {
        return Err(AppError::Conflict(
            "serial or asset tag already in use by another item".to_string(),
        ));
    }
    Ok(())
}

/// Partial update: absent fields fall back to the stored value, so an edit
/// payload can never null out data the submitter did not touch.
pub async fn apply_edit(
    conn: &mut PgConnection,
    id: Uuid,
    edit: &ItemEdit,
) -> AppResult<ItemModel> {
    let item: Option<ItemModel> = sqlx::query_as(&format!(
        "UPDATE items SET \
         serial = COALESCE($2, serial), \
         asset_tag = COALESCE($3, asset_tag), \
         brand = COALESCE($4, brand), \
         model = COALESCE($5, model), \
         mac = COALESCE($6, mac), \
         value = COALESCE($7, value), \
         observations = COALESCE($8, observations), \
         initial_amount = COALESCE($9, initial_amount), \
         current_amount = COALESCE($10, current_amount), \
         unit = COALESCE($11, unit), \
         updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {}",
        ITEM_COLUMNS
    ))
    .bind(id)
    .bind(&edit.serial)
    .bind(&edit.asset_tag)
    .bind(&edit.brand)
    .bind(&edit.model)
    .bind(&edit.mac)
    .bind(edit.value)
    .bind(&edit.observations)
    .bind(edit.initial_amount)
    .bind(edit.current_amount)
    .bind(&edit.unit)
    .fetch_optional(conn)
    .await
    .map_err(AppError::from_db)?;

    item.ok_or_else(|| AppError::NotFound(format!("item {} not found", id)))
}

/// Applies a previously computed move, optionally recording the reason as the
/// item's current observation.
pub async fn apply_move(
    conn: &mut PgConnection,
    id: Uuid,
    update: &MoveUpdate,
    reason: Option<&str>,
) -> AppResult<ItemModel> {
    let item: Option<ItemModel> = sqlx::query_as(&format!(
        "UPDATE items SET \
         status = COALESCE($2, status), \
         current_holder = CASE WHEN $3 THEN NULL ELSE COALESCE($4, current_holder) END, \
         current_location = COALESCE($5, current_location), \
         current_amount = COALESCE($6, current_amount), \
         observations = COALESCE($7, observations), \
         updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {}",
        ITEM_COLUMNS
    ))
    .bind(id)
    .bind(&update.status)
    .bind(update.clear_holder)
    .bind(&update.new_holder)
    .bind(&update.location)
    .bind(update.new_amount)
    .bind(reason.map(str::trim).filter(|r| !r.is_empty()))
    .fetch_optional(conn)
    .await
    .map_err(AppError::Database)?;

    item.ok_or_else(|| AppError::NotFound(format!("item {} not found", id)))
}

/// State refresh used by the CSV batch importer.
pub async fn apply_import_update(
    conn: &mut PgConnection,
    id: Uuid,
    holder: Option<&str>,
    location: &str,
    status: &str,
    value: f64,
    observations: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE items SET current_holder = $2, current_location = $3, status = $4, \
         value = $5, observations = COALESCE($6, observations), updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(holder)
    .bind(location)
    .bind(status)
    .bind(value)
    .bind(observations)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

pub async fn delete(conn: &mut PgConnection, id: Uuid) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM items WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;
    Ok(result.rows_affected())
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub search: String,
    pub status: String,
    pub city: String,
    pub kind: String,
    pub page: u32,
    pub limit: u32,
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ItemFilter) {
    qb.push(" WHERE 1=1");

    if !filter.city.is_empty() && filter.city != "Todas" {
        qb.push(" AND city = ").push_bind(filter.city.clone());
    }

    match filter.kind.as_str() {
        "materiais" => {
            qb.push(" AND is_consumable AND item_type NOT IN ('cabo', 'drop')");
        }
        "cabos" => {
            qb.push(" AND is_consumable AND item_type IN ('cabo', 'drop')");
        }
        "equipamentos" => {
            qb.push(" AND NOT is_consumable");
        }
        "consumiveis" => {
            qb.push(" AND is_consumable");
        }
        _ => {}
    }

    if !filter.status.is_empty() && filter.status != "all" {
        qb.push(" AND status = ").push_bind(filter.status.clone());
    }

    // Every search term must match at least one identity-ish field.
    for term in filter.search.split_whitespace() {
        let pattern = format!("%{}%", term);
        qb.push(" AND (serial ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR asset_tag ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR brand ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR model ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR current_holder ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn list(pool: &PgPool, filter: &ItemFilter) -> AppResult<(Vec<ItemModel>, i64)> {
    let limit = filter.limit.clamp(1, 500) as i64;
    let page = filter.page.max(1) as i64;

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM items");
    push_filters(&mut count_qb, filter);
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

    let mut qb = QueryBuilder::new(format!("SELECT {} FROM items", ITEM_COLUMNS));
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY updated_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind((page - 1) * limit);

    let items: Vec<ItemModel> = qb
        .build_query_as()
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

    Ok((items, total))
}

#[derive(Debug, Clone, Default)]
pub struct InventoryStats {
    pub total: i64,
    pub available: i64,
    pub in_use: i64,
    pub maintenance: i64,
    pub total_value: f64,
}

/// Aggregated counters for the list view, scoped by city/kind only.
pub async fn stats(pool: &PgPool, city: &str, kind: &str) -> AppResult<InventoryStats> {
    let mut qb = QueryBuilder::new(
        "SELECT COUNT(*), \
         COUNT(*) FILTER (WHERE status = 'disponivel'), \
         COUNT(*) FILTER (WHERE status = 'em_uso'), \
         COUNT(*) FILTER (WHERE status = 'manutencao'), \
         COALESCE(SUM(value), 0) \
         FROM items",
    );
    let scope = ItemFilter {
        city: city.to_string(),
        kind: kind.to_string(),
        ..Default::default()
    };
    push_filters(&mut qb, &scope);

    let (total, available, in_use, maintenance, total_value): (i64, i64, i64, i64, f64) = qb
        .build_query_as()
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

    Ok(InventoryStats {
        total,
        available,
        in_use,
        maintenance,
        total_value,
    })
}
