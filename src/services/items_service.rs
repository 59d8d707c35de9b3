use sqlx::PgPool;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::db;
use crate::db::items::ItemFilter;
use crate::error::AppError;
use crate::middleware::{current_user, is_admin, AuthenticatedUser};
use crate::models::{
    compute_move, ItemDraft, ItemEdit, ItemModel, MoveAction, MoveRequestData, RequestType,
};
use crate::notify::Notifier;
use crate::proto::items::items_service_server::ItemsService;
use crate::proto::items::{
    CreateItemReq, DeleteItemReq, DeleteItemRes, GetItemHistoryReq, GetItemHistoryRes, GetItemReq,
    GetItemRes, HistoryEntry, Item, ListItemsReq, ListItemsRes, ListStats, MoveItemReq,
    MutationRes, UpdateItemReq,
};

pub struct ItemsServiceImpl {
    pool: PgPool,
    notifier: Notifier,
}

pub(crate) fn item_to_proto(m: ItemModel) -> Item {
    Item {
        id: m.id,
        serial: m.serial,
        asset_tag: m.asset_tag.unwrap_or_default(),
        item_type: m.item_type,
        is_consumable: m.is_consumable,
        status: m.status,
        current_holder: m.current_holder.unwrap_or_default(),
        current_location: m.current_location,
        city: m.city.unwrap_or_default(),
        brand: m.brand.unwrap_or_default(),
        model: m.model.unwrap_or_default(),
        mac: m.mac.unwrap_or_default(),
        value: m.value,
        observations: m.observations.unwrap_or_default(),
        photo: m.photo.unwrap_or_default(),
        initial_amount: m.initial_amount.unwrap_or_default(),
        current_amount: m.current_amount.unwrap_or_default(),
        unit: m.unit.unwrap_or_default(),
        created_at: m.created_at,
        updated_at: m.updated_at,
    }
}

fn opt(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ItemsServiceImpl {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    /// Deferred path: stores the sanitized payload verbatim as a PENDING
    /// request and tells admins about it. Never touches the items table.
    async fn queue_request(
        &self,
        user: &AuthenticatedUser,
        kind: RequestType,
        payload: &impl serde::Serialize,
        item_id: Option<Uuid>,
        summary: &str,
    ) -> Result<MutationRes, Status> {
        let user_id = db::parse_uuid(&user.user_id).map_err(Status::from)?;
        let data = serde_json::to_string(payload)
            .map_err(|e| Status::internal(format!("Serialization error: {}", e)))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        let request = db::requests::insert(&mut tx, kind.as_str(), &data, item_id, user_id)
            .await
            .map_err(Status::from)?;
        db::audit::log(
            &mut tx,
            user_id,
            kind.submission_audit_action(),
            "pending_requests",
            summary,
        )
        .await
        .map_err(Status::from)?;

        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        self.notifier.pending_request(kind.as_str(), &user.name, summary);

        Ok(MutationRes {
            queued: true,
            message: "Solicitação enviada para aprovação".to_string(),
            pending_request_id: request.id,
            item: None,
        })
    }
}

#[tonic::async_trait]
impl ItemsService for ItemsServiceImpl {
    async fn create_item(
        &self,
        request: Request<CreateItemReq>,
    ) -> Result<Response<MutationRes>, Status> {
        let user = current_user(&request)?;
        let req = request.into_inner();

        let mut draft = ItemDraft {
            serial: req.serial,
            asset_tag: opt(req.asset_tag),
            item_type: req.item_type,
            is_consumable: req.is_consumable,
            status: opt(req.status),
            city: opt(req.city),
            location: opt(req.location),
            brand: opt(req.brand),
            model: opt(req.model),
            mac: opt(req.mac),
            value: req.value,
            observations: opt(req.observations),
            photo: opt(req.photo),
            initial_amount: (req.initial_amount > 0.0).then_some(req.initial_amount),
            current_amount: None,
            unit: opt(req.unit),
        };
        draft.sanitize();

        if draft.serial.is_empty() {
            return Err(Status::invalid_argument("Serial is required"));
        }

        if !is_admin(&user.role) {
            let summary = format!("Cadastro de item {}", draft.serial);
            let res = self
                .queue_request(&user, RequestType::AddItem, &draft, None, &summary)
                .await?;
            return Ok(Response::new(res));
        }

        let user_id = db::parse_uuid(&user.user_id).map_err(Status::from)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        let item = db::items::insert(&mut tx, &draft, None)
            .await
            .map_err(Status::from)?;
        let item_id = db::parse_uuid(&item.id).map_err(Status::from)?;
        db::history::append(
            &mut tx,
            item_id,
            "CADASTRO",
            "Item cadastrado no sistema",
            Some(draft.location()),
            Some(user_id),
        )
        .await
        .map_err(Status::from)?;
        db::audit::log(&mut tx, user_id, "CRIAR", "items", &item.serial)
            .await
            .map_err(Status::from)?;

        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        Ok(Response::new(MutationRes {
            queued: false,
            message: "Item cadastrado".to_string(),
            pending_request_id: String::new(),
            item: Some(item_to_proto(item)),
        }))
    }

    async fn update_item(
        &self,
        request: Request<UpdateItemReq>,
    ) -> Result<Response<MutationRes>, Status> {
        let user = current_user(&request)?;
        let req = request.into_inner();
        let item_id = db::parse_uuid(&req.id).map_err(Status::from)?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        let item = db::items::find_by_id(&mut conn, item_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("Item not found"))?;
        drop(conn);

        let mut edit = ItemEdit {
            serial: req.serial,
            asset_tag: req.asset_tag,
            brand: req.brand,
            model: req.model,
            mac: req.mac,
            value: req.value,
            observations: req.observations,
            initial_amount: req.initial_amount,
            current_amount: req.current_amount,
            unit: req.unit,
        };
        edit.sanitize();

        if edit.is_empty() {
            return Err(Status::invalid_argument("Nothing to update"));
        }
        edit.validate_amounts(&item).map_err(Status::from)?;

        if !is_admin(&user.role) {
            let summary = format!("Edição de item {}", item.serial);
            let res = self
                .queue_request(&user, RequestType::EditItem, &edit, Some(item_id), &summary)
                .await?;
            return Ok(Response::new(res));
        }

        let user_id = db::parse_uuid(&user.user_id).map_err(Status::from)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        db::items::check_unique_for_edit(
            &mut tx,
            item_id,
            edit.serial.as_deref(),
            edit.asset_tag.as_deref(),
        )
        .await
        .map_err(Status::from)?;
        let updated = db::items::apply_edit(&mut tx, item_id, &edit)
            .await
            .map_err(Status::from)?;
        db::history::append(
            &mut tx,
            item_id,
            "EDICAO",
            "Dados do item atualizados",
            None,
            Some(user_id),
        )
        .await
        .map_err(Status::from)?;
        db::audit::log(&mut tx, user_id, "EDITAR", "items", &updated.serial)
            .await
            .map_err(Status::from)?;

        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        Ok(Response::new(MutationRes {
            queued: false,
            message: "Item atualizado".to_string(),
            pending_request_id: String::new(),
            item: Some(item_to_proto(updated)),
        }))
    }

    async fn move_item(
        &self,
        request: Request<MoveItemReq>,
    ) -> Result<Response<MutationRes>, Status> {
        let user = current_user(&request)?;
        let req = request.into_inner();
        let item_id = db::parse_uuid(&req.id).map_err(Status::from)?;

        let action = MoveAction::parse(&req.action)
            .ok_or_else(|| Status::invalid_argument(format!("Unknown action: {}", req.action)))?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        let item = db::items::find_by_id(&mut conn, item_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("Item not found"))?;
        drop(conn);

        let client_name = opt(req.client_name);
        let reason = opt(req.reason);
        let amount = (req.amount > 0.0).then_some(req.amount);

        // Validated here for both paths so an impossible move is rejected at
        // submission instead of at approval time.
        let update = compute_move(
            &item,
            action,
            client_name.as_deref(),
            reason.as_deref(),
            amount,
        )
        .map_err(Status::from)?;

        if !is_admin(&user.role) {
            let payload = MoveRequestData {
                action,
                client_name,
                reason,
                amount,
                update,
            };
            let summary = format!("{} de item {}", req.action, item.serial);
            let res = self
                .queue_request(&user, RequestType::MoveItem, &payload, Some(item_id), &summary)
                .await?;
            return Ok(Response::new(res));
        }

        let user_id = db::parse_uuid(&user.user_id).map_err(Status::from)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        let updated = db::items::apply_move(&mut tx, item_id, &update, reason.as_deref())
            .await
            .map_err(Status::from)?;
        db::history::append(
            &mut tx,
            item_id,
            &update.history_action,
            &update.description,
            update.location.as_deref(),
            Some(user_id),
        )
        .await
        .map_err(Status::from)?;
        db::audit::log(&mut tx, user_id, "MOVIMENTACAO", "items", &updated.serial)
            .await
            .map_err(Status::from)?;

        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        Ok(Response::new(MutationRes {
            queued: false,
            message: "Movimentação registrada".to_string(),
            pending_request_id: String::new(),
            item: Some(item_to_proto(updated)),
        }))
    }

    async fn delete_item(
        &self,
        request: Request<DeleteItemReq>,
    ) -> Result<Response<DeleteItemRes>, Status> {
        let user = current_user(&request)?;
        let req = request.into_inner();
        let item_id = db::parse_uuid(&req.id).map_err(Status::from)?;
        let user_id = db::parse_uuid(&user.user_id).map_err(Status::from)?;

        // Destructive action, so the caller re-proves their identity.
        let account = db::users::find_by_id(&self.pool, user_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::unauthenticated("User not found"))?;
        if !db::users::verify_password(&req.password, &account.password_hash) {
            return Err(Status::permission_denied("Senha incorreta"));
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        let item = db::items::find_by_id(&mut conn, item_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("Item not found"))?;
        drop(conn);

        if !is_admin(&user.role) {
            let reason = req.reason.trim();
            if reason.len() < 3 {
                return Err(Status::invalid_argument(
                    "A reason of at least 3 characters is required",
                ));
            }
            let details = serde_json::json!({
                "serial": item.serial,
                "reason": reason,
            })
            .to_string();

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| Status::from(AppError::Database(e)))?;
            db::audit::log(&mut tx, user_id, "SOLICITACAO_EXCLUSAO", &item.id, &details)
                .await
                .map_err(Status::from)?;
            tx.commit()
                .await
                .map_err(|e| Status::from(AppError::Database(e)))?;

            self.notifier.pending_request(
                "SOLICITACAO_EXCLUSAO",
                &user.name,
                &format!("Exclusão de item {}", item.serial),
            );

            return Ok(Response::new(DeleteItemRes {
                outcome: "requested".to_string(),
                message: "Solicitação de exclusão enviada".to_string(),
            }));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        db::items::delete(&mut tx, item_id)
            .await
            .map_err(Status::from)?;
        // The resource is the item id so the notification feed can match this
        // entry against a pending SOLICITACAO_EXCLUSAO on the same item.
        db::audit::log(&mut tx, user_id, "EXCLUIR", &item.id, &item.serial)
            .await
            .map_err(Status::from)?;
        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        Ok(Response::new(DeleteItemRes {
            outcome: "deleted".to_string(),
            message: "Item excluído".to_string(),
        }))
    }

    async fn get_item(&self, request: Request<GetItemReq>) -> Result<Response<GetItemRes>, Status> {
        let req = request.into_inner();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        let item = match db::parse_uuid(&req.id) {
            Ok(id) => db::items::find_by_id(&mut conn, id).await,
            Err(_) => db::items::find_by_serial(&mut conn, req.id.trim()).await,
        }
        .map_err(Status::from)?
        .ok_or_else(|| Status::not_found("Item not found"))?;

        Ok(Response::new(GetItemRes {
            item: Some(item_to_proto(item)),
        }))
    }

    async fn list_items(
        &self,
        request: Request<ListItemsReq>,
    ) -> Result<Response<ListItemsRes>, Status> {
        let req = request.into_inner();
        let filter = ItemFilter {
            search: req.search,
            status: req.status,
            city: req.city,
            kind: req.kind,
            page: req.page.max(1),
            limit: if req.limit == 0 { 50 } else { req.limit },
        };

        let (items, total) = db::items::list(&self.pool, &filter)
            .await
            .map_err(Status::from)?;
        let stats = db::items::stats(&self.pool, &filter.city, &filter.kind)
            .await
            .map_err(Status::from)?;

        let limit = filter.limit.clamp(1, 500) as i64;
        let pages = ((total + limit - 1) / limit).max(1) as u32;

        Ok(Response::new(ListItemsRes {
            items: items.into_iter().map(item_to_proto).collect(),
            stats: Some(ListStats {
                total: stats.total as u64,
                available: stats.available as u64,
                in_use: stats.in_use as u64,
                maintenance: stats.maintenance as u64,
                total_value: stats.total_value,
            }),
            total: total as u64,
            pages,
            page: filter.page,
        }))
    }

    async fn get_item_history(
        &self,
        request: Request<GetItemHistoryReq>,
    ) -> Result<Response<GetItemHistoryRes>, Status> {
        let req = request.into_inner();

        // Older clients pass a serial here instead of an id.
        let item_id = match db::parse_uuid(&req.id) {
            Ok(id) => id,
            Err(_) => {
                let mut conn = self
                    .pool
                    .acquire()
                    .await
                    .map_err(|e| Status::from(AppError::Database(e)))?;
                let item = db::items::find_by_serial(&mut conn, req.id.trim())
                    .await
                    .map_err(Status::from)?
                    .ok_or_else(|| Status::not_found("Item not found"))?;
                db::parse_uuid(&item.id).map_err(Status::from)?
            }
        };

        let entries = db::history::list_for_item(&self.pool, item_id)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(GetItemHistoryRes {
            entries: entries
                .into_iter()
                .map(|h| HistoryEntry {
                    id: h.id,
                    action: h.action,
                    description: h.description,
                    location: h.location.unwrap_or_default(),
                    user_name: h.user_name.unwrap_or_default(),
                    created_at: h.created_at,
                })
                .collect(),
        }))
    }
}
