use sqlx::{PgConnection, PgPool};
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::middleware::{current_user, require_admin};
use crate::models::request::STATUS_PENDING;
use crate::models::{
    AuditLogModel, InstallationData, InstallationItem as InstallationItemData, ItemDraft,
    PendingRequestModel, RequestPayload, RequestType,
};
use crate::notify::Notifier;
use crate::proto::common::Empty;
use crate::proto::requests::requests_service_server::RequestsService;
use crate::proto::requests::{
    ApproveExclusionReq, ApproveRequestReq, CreateInstallationReq, ListNotificationsRes,
    ListRequestsRes, Notification, PendingRequest, QueuedRes, RejectRequestReq,
};

/// Solicitations surfaced in the admin feed and the actions that resolve them.
const SOLICITATION_ACTIONS: &[&str] = &["SOLICITACAO_EXCLUSAO"];
const RESOLUTION_ACTIONS: &[&str] = &["EXCLUIR"];

const FEED_WINDOW_DAYS: i32 = 7;

pub struct RequestsServiceImpl {
    pool: PgPool,
    notifier: Notifier,
}

fn request_to_proto(r: PendingRequestModel) -> PendingRequest {
    PendingRequest {
        id: r.id,
        request_type: r.request_type,
        status: r.status,
        data: r.data,
        item_id: r.item_id.unwrap_or_default(),
        user_id: r.user_id,
        admin_notes: r.admin_notes.unwrap_or_default(),
        created_at: r.created_at,
        updated_at: r.updated_at,
    }
}

/// Drops solicitations that a later resolution on the same resource already
/// answered. Timestamps come from Postgres `::text` casts, which order
/// lexicographically.
pub(crate) fn reconcile_feed(
    solicitations: Vec<AuditLogModel>,
    resolutions: &[AuditLogModel],
) -> Vec<AuditLogModel> {
    solicitations
        .into_iter()
        .filter(|s| {
            !resolutions
                .iter()
                .any(|r| r.resource == s.resource && r.created_at >= s.created_at)
        })
        .collect()
}

impl RequestsServiceImpl {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    /// Replays an approved payload through the same helpers the direct path
    /// uses, inside the caller's transaction.
    async fn dispatch(
        &self,
        tx: &mut PgConnection,
        request: &PendingRequestModel,
        admin_id: Uuid,
    ) -> AppResult<()> {
        let kind = RequestType::parse(&request.request_type).ok_or_else(|| {
            AppError::Internal(format!("unknown request type: {}", request.request_type))
        })?;
        let payload = RequestPayload::decode(kind, &request.data)?;

        match payload {
            RequestPayload::AddItem(draft) => {
                let item = db::items::insert(tx, &draft, None).await?;
                let item_id = db::parse_uuid(&item.id)?;
                db::history::append(
                    tx,
                    item_id,
                    "CADASTRO",
                    "Item cadastrado no sistema (solicitação aprovada)",
                    Some(draft.location()),
                    Some(admin_id),
                )
                .await?;
            }
            RequestPayload::EditItem(edit) => {
                let item_id = request
                    .item_id
                    .as_deref()
                    .ok_or_else(|| AppError::Internal("edit request without item".to_string()))
                    .and_then(db::parse_uuid)?;
                // The item may have changed since submission, so the amount
                // bounds are re-checked against its current state.
                let item = db::items::find_by_id(&mut *tx, item_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("item {} not found", item_id)))?;
                edit.validate_amounts(&item)?;
                db::items::check_unique_for_edit(
                    tx,
                    item_id,
                    edit.serial.as_deref(),
                    edit.asset_tag.as_deref(),
                )
                .await?;
                db::items::apply_edit(tx, item_id, &edit).await?;
                db::history::append(
                    tx,
                    item_id,
                    "EDICAO",
                    "Dados do item atualizados (solicitação aprovada)",
                    None,
                    Some(admin_id),
                )
                .await?;
            }
            RequestPayload::MoveItem(data) => {
                let item_id = request
                    .item_id
                    .as_deref()
                    .ok_or_else(|| AppError::Internal("move request without item".to_string()))
                    .and_then(db::parse_uuid)?;
                db::items::apply_move(tx, item_id, &data.update, data.reason.as_deref()).await?;
                db::history::append(
                    tx,
                    item_id,
                    &data.update.history_action,
                    &data.update.description,
                    data.update.location.as_deref(),
                    Some(admin_id),
                )
                .await?;
            }
            RequestPayload::Installation(data) => {
                for entry in &data.items {
                    install_item(tx, entry, &data.client_name, admin_id).await?;
                }
            }
        }

        db::audit::log(
            tx,
            admin_id,
            kind.approval_audit_action(),
            "pending_requests",
            &request.id,
        )
        .await?;
        Ok(())
    }
}

/// One installed equipment line: existing serials move to the client, new
/// serials are created already in use.
async fn install_item(
    tx: &mut PgConnection,
    entry: &InstallationItemData,
    client_name: &str,
    admin_id: Uuid,
) -> AppResult<()> {
    // Payloads stored by older clients may still carry serial-less lines.
    if entry.serial.len() < 3 {
        return Ok(());
    }

    let description = format!("Instalado no cliente {}", client_name);

    if let Some(existing) = db::items::find_by_serial(tx, &entry.serial).await? {
        let item_id = db::parse_uuid(&existing.id)?;
        db::items::apply_import_update(
            tx,
            item_id,
            Some(client_name),
            "Cliente",
            "em_uso",
            existing.value,
            None,
        )
        .await?;
        db::history::append(tx, item_id, "INSTALACAO", &description, Some("Cliente"), Some(admin_id))
            .await?;
        return Ok(());
    }

    let mut draft = ItemDraft {
        serial: entry.serial.clone(),
        asset_tag: entry.asset_tag.clone(),
        item_type: entry.item_type.clone().unwrap_or_default(),
        is_consumable: false,
        status: Some("em_uso".to_string()),
        city: None,
        location: Some("Cliente".to_string()),
        brand: entry.brand.clone(),
        model: entry.model.clone(),
        mac: entry.mac.clone(),
        value: 0.0,
        observations: None,
        photo: None,
        initial_amount: None,
        current_amount: None,
        unit: None,
    };
    draft.sanitize();

    let item = db::items::insert(tx, &draft, Some(client_name)).await?;
    let item_id = db::parse_uuid(&item.id)?;
    db::history::append(tx, item_id, "INSTALACAO", &description, Some("Cliente"), Some(admin_id))
        .await?;
    Ok(())
}

#[tonic::async_trait]
impl RequestsService for RequestsServiceImpl {
    async fn create_installation(
        &self,
        request: Request<CreateInstallationReq>,
    ) -> Result<Response<QueuedRes>, Status> {
        let user = current_user(&request)?;
        let req = request.into_inner();

        let mut data = InstallationData {
            client_name: req.client_name,
            client_code: Some(req.client_code).filter(|c| !c.trim().is_empty()),
            address: Some(req.address).filter(|a| !a.trim().is_empty()),
            items: req
                .items
                .into_iter()
                .map(|i| InstallationItemData {
                    serial: i.serial,
                    asset_tag: Some(i.asset_tag).filter(|t| !t.trim().is_empty()),
                    brand: Some(i.brand).filter(|b| !b.trim().is_empty()),
                    model: Some(i.model).filter(|m| !m.trim().is_empty()),
                    mac: Some(i.mac).filter(|m| !m.trim().is_empty()),
                    item_type: Some(i.item_type).filter(|t| !t.trim().is_empty()),
                })
                .collect(),
            photos: req.photos,
            observations: Some(req.observations).filter(|o| !o.trim().is_empty()),
            signature: Some(req.signature).filter(|s| !s.trim().is_empty()),
        };
        data.sanitize();

        if data.client_name.is_empty() {
            return Err(Status::invalid_argument("Client name is required"));
        }
        if data.items.is_empty() {
            return Err(Status::invalid_argument(
                "At least one item with a valid serial is required",
            ));
        }

        let user_id = db::parse_uuid(&user.user_id).map_err(Status::from)?;
        let payload = serde_json::to_string(&data)
            .map_err(|e| Status::internal(format!("Serialization error: {}", e)))?;
        let summary = format!(
            "Instalação para {} ({} itens)",
            data.client_name,
            data.items.len()
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        let pending = db::requests::insert(
            &mut tx,
            RequestType::Installation.as_str(),
            &payload,
            None,
            user_id,
        )
        .await
        .map_err(Status::from)?;
        db::audit::log(
            &mut tx,
            user_id,
            RequestType::Installation.submission_audit_action(),
            "pending_requests",
            &summary,
        )
        .await
        .map_err(Status::from)?;
        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        self.notifier
            .pending_request(RequestType::Installation.as_str(), &user.name, &summary);

        Ok(Response::new(QueuedRes {
            pending_request_id: pending.id,
            message: "Instalação registrada para aprovação".to_string(),
        }))
    }

    async fn list_my_requests(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<ListRequestsRes>, Status> {
        let user = current_user(&request)?;
        let user_id = db::parse_uuid(&user.user_id).map_err(Status::from)?;

        let requests = db::requests::list_by_user(&self.pool, user_id)
            .await
            .map_err(Status::from)?;

        Ok(Response::new(ListRequestsRes {
            requests: requests.into_iter().map(request_to_proto).collect(),
        }))
    }

    async fn list_notifications(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<ListNotificationsRes>, Status> {
        require_admin(&request)?;

        let pending = db::requests::list_pending(&self.pool)
            .await
            .map_err(Status::from)?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        let solicitations =
            db::audit::recent_by_actions(&mut conn, SOLICITATION_ACTIONS, FEED_WINDOW_DAYS)
                .await
                .map_err(Status::from)?;
        let resolutions =
            db::audit::recent_by_actions(&mut conn, RESOLUTION_ACTIONS, FEED_WINDOW_DAYS)
                .await
                .map_err(Status::from)?;

        let mut notifications: Vec<Notification> = pending
            .into_iter()
            .map(|p| {
                let action = RequestType::parse(&p.request_type)
                    .map(|k| k.submission_audit_action().to_string())
                    .unwrap_or_else(|| p.request_type.clone());
                Notification {
                    id: p.id,
                    action,
                    details: p.data,
                    user_name: p.user_name.unwrap_or_default(),
                    created_at: p.created_at,
                    is_pending_request: true,
                    status: p.status,
                }
            })
            .collect();

        for entry in reconcile_feed(solicitations, &resolutions) {
            notifications.push(Notification {
                id: entry.id,
                action: entry.action,
                details: entry.details,
                user_name: entry.user_name.unwrap_or_default(),
                created_at: entry.created_at,
                is_pending_request: false,
                status: STATUS_PENDING.to_string(),
            });
        }

        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(Response::new(ListNotificationsRes { notifications }))
    }

    async fn approve_request(
        &self,
        request: Request<ApproveRequestReq>,
    ) -> Result<Response<Empty>, Status> {
        let admin = require_admin(&request)?;
        let req = request.into_inner();
        let request_id = db::parse_uuid(&req.request_id).map_err(Status::from)?;
        let admin_id = db::parse_uuid(&admin.user_id).map_err(Status::from)?;

        let notes = req.admin_notes.trim();
        let notes = (!notes.is_empty()).then_some(notes);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        // The conditional update claims the request; a concurrent approval
        // sees zero rows and fails, so the payload applies at most once.
        let claimed = db::requests::claim_for_approval(&mut tx, request_id, notes)
            .await
            .map_err(Status::from)?;
        self.dispatch(&mut tx, &claimed, admin_id)
            .await
            .map_err(Status::from)?;

        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        tracing::info!(
            "Request {} ({}) approved by {}",
            claimed.id,
            claimed.request_type,
            admin.name
        );
        Ok(Response::new(Empty {}))
    }

    async fn reject_request(
        &self,
        request: Request<RejectRequestReq>,
    ) -> Result<Response<Empty>, Status> {
        let admin = require_admin(&request)?;
        let req = request.into_inner();
        let request_id = db::parse_uuid(&req.request_id).map_err(Status::from)?;
        let admin_id = db::parse_uuid(&admin.user_id).map_err(Status::from)?;

        let reason = req.reason.trim();
        if reason.is_empty() {
            return Err(Status::invalid_argument("A rejection reason is required"));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        let claimed = db::requests::claim_for_rejection(&mut tx, request_id, reason)
            .await
            .map_err(Status::from)?;
        db::audit::log(
            &mut tx,
            admin_id,
            "REJEITAR_SOLICITACAO",
            "pending_requests",
            &claimed.id,
        )
        .await
        .map_err(Status::from)?;
        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        Ok(Response::new(Empty {}))
    }

    async fn approve_exclusion(
        &self,
        request: Request<ApproveExclusionReq>,
    ) -> Result<Response<Empty>, Status> {
        let admin = require_admin(&request)?;
        let req = request.into_inner();
        let item_id = db::parse_uuid(&req.item_id).map_err(Status::from)?;
        let admin_id = db::parse_uuid(&admin.user_id).map_err(Status::from)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;
        let item = db::items::find_by_id(&mut tx, item_id)
            .await
            .map_err(Status::from)?
            .ok_or_else(|| Status::not_found("Item not found"))?;
        db::items::delete(&mut tx, item_id)
            .await
            .map_err(Status::from)?;
        // Resource matches the solicitation entry so the feed reconciles.
        db::audit::log(&mut tx, admin_id, "EXCLUIR", &item.id, &item.serial)
            .await
            .map_err(Status::from)?;
        tx.commit()
            .await
            .map_err(|e| Status::from(AppError::Database(e)))?;

        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, action: &str, resource: &str, created_at: &str) -> AuditLogModel {
        AuditLogModel {
            id: id.to_string(),
            user_id: None,
            action: action.to_string(),
            resource: resource.to_string(),
            details: String::new(),
            user_name: None,
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn resolved_solicitations_are_filtered_out() {
        let solicitations = vec![
            entry("1", "SOLICITACAO_EXCLUSAO", "item-a", "2026-08-20 10:00:00"),
            entry("2", "SOLICITACAO_EXCLUSAO", "item-b", "2026-08-21 10:00:00"),
        ];
        let resolutions = vec![entry("3", "EXCLUIR", "item-a", "2026-08-20 12:00:00")];

        let feed = reconcile_feed(solicitations, &resolutions);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].resource, "item-b");
    }

    #[test]
    fn resolution_before_solicitation_does_not_count() {
        let solicitations = vec![entry(
            "1",
            "SOLICITACAO_EXCLUSAO",
            "item-a",
            "2026-08-22 10:00:00",
        )];
        let resolutions = vec![entry("2", "EXCLUIR", "item-a", "2026-08-20 09:00:00")];

        let feed = reconcile_feed(solicitations, &resolutions);
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn resolution_on_other_resource_does_not_count() {
        let solicitations = vec![entry(
            "1",
            "SOLICITACAO_EXCLUSAO",
            "item-a",
            "2026-08-25 08:00:00",
        )];
        let resolutions = vec![entry("2", "EXCLUIR", "item-b", "2026-08-25 09:00:00")];

        let feed = reconcile_feed(solicitations, &resolutions);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].resource, "item-a");
    }
}
