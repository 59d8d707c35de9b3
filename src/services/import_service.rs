use sqlx::PgPool;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::consolidate::{self, infer_status};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::middleware::current_user;
use crate::models::{clean_ident, synthetic_serial, ItemDraft};
use crate::proto::importer::import_service_server::ImportService;
use crate::proto::importer::{
    ConsolidateCsvReq, ConsolidateCsvRes, ConsolidatedRow, ImportBatchReq, ImportBatchRes,
    ImportDetail, ImportItem, ImportSummary, PatrimonyConflict,
};

pub struct ImportServiceImpl {
    pool: PgPool,
}

/// Historical exports come from Windows tooling, so Latin-1 is the default.
fn decode_content(content: &[u8], encoding: &str) -> String {
    let encoding = match encoding.trim().to_ascii_uppercase().as_str() {
        "UTF-8" | "UTF8" => encoding_rs::UTF_8,
        _ => encoding_rs::WINDOWS_1252,
    };
    let (text, _, _) = encoding.decode(content);
    text.into_owned()
}

/// Picks the delimiter that appears most in the first line.
fn sniff_delimiter(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semicolons >= commas {
        b';'
    } else {
        b','
    }
}

fn parse_records(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>, Status> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| Status::invalid_argument(format!("CSV error: {}", e)))?;
        records.push(record.iter().map(|f| f.to_string()).collect());
    }
    Ok(records)
}

fn date_str(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}

enum RowOutcome {
    Added,
    Updated,
    Duplicate,
}

impl ImportServiceImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One consolidated row against the store, in its own transaction so a
    /// failure never poisons the rest of the batch.
    async fn apply_row(&self, row: &ImportItem, user_id: Uuid) -> AppResult<RowOutcome> {
        let serial = clean_ident(&row.serial);
        if serial.len() < 3 {
            return Err(AppError::Validation(format!(
                "invalid serial: {:?}",
                row.serial
            )));
        }

        let client_name = row.client_name.trim();
        let holder = (!client_name.is_empty()).then_some(client_name);
        let status = infer_status(client_name, &row.original_status);
        let location = if holder.is_some() { "Cliente" } else { "Estoque" };
        let observations = row.observations.trim();
        let observations = (!observations.is_empty()).then_some(observations);

        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        if let Some(existing) = db::items::find_by_serial(&mut tx, &serial).await? {
            let unchanged = existing.current_holder.as_deref() == holder
                && existing.status == status;
            if unchanged {
                return Ok(RowOutcome::Duplicate);
            }

            let item_id = db::parse_uuid(&existing.id)?;
            let value = if row.value > 0.0 { row.value } else { existing.value };
            db::items::apply_import_update(
                &mut tx, item_id, holder, location, status, value, observations,
            )
            .await?;
            db::history::append(
                &mut tx,
                item_id,
                "IMPORTACAO_ATT",
                &format!(
                    "Atualizado via importação: {} / {}",
                    status,
                    holder.unwrap_or("Estoque")
                ),
                Some(location),
                Some(user_id),
            )
            .await?;
            tx.commit().await.map_err(AppError::Database)?;
            return Ok(RowOutcome::Updated);
        }

        let asset_tag = clean_ident(&row.asset_tag);
        let mut draft = ItemDraft {
            serial,
            asset_tag: Some(if asset_tag.is_empty() {
                synthetic_serial("GEN")
            } else {
                asset_tag
            }),
            item_type: row.item_type.trim().to_string(),
            is_consumable: false,
            status: Some(status.to_string()),
            city: Some(row.city.clone()).filter(|c| !c.trim().is_empty()),
            location: Some(location.to_string()),
            brand: Some(row.brand.clone()).filter(|b| !b.trim().is_empty()),
            model: Some(row.model.clone()).filter(|m| !m.trim().is_empty()),
            mac: None,
            value: row.value,
            observations: observations.map(str::to_string),
            photo: None,
            initial_amount: None,
            current_amount: None,
            unit: None,
        };
        draft.sanitize();

        let item = db::items::insert(&mut tx, &draft, holder).await?;
        let item_id = db::parse_uuid(&item.id)?;
        db::history::append(
            &mut tx,
            item_id,
            "IMPORTACAO",
            &format!(
                "Criado via importação: {} / {}",
                status,
                holder.unwrap_or("Estoque")
            ),
            Some(location),
            Some(user_id),
        )
        .await?;
        tx.commit().await.map_err(AppError::Database)?;
        Ok(RowOutcome::Added)
    }
}

#[tonic::async_trait]
impl ImportService for ImportServiceImpl {
    async fn consolidate_csv(
        &self,
        request: Request<ConsolidateCsvReq>,
    ) -> Result<Response<ConsolidateCsvRes>, Status> {
        current_user(&request)?;
        let req = request.into_inner();

        if req.content.is_empty() {
            return Err(Status::invalid_argument("Empty file"));
        }

        let text = decode_content(&req.content, &req.encoding);
        let delimiter = sniff_delimiter(&text);
        let records = parse_records(&text, delimiter)?;

        let result = consolidate::consolidate(&records)
            .map_err(AppError::from)
            .map_err(Status::from)?;

        tracing::info!(
            "Consolidated {} raw rows into {} assets ({} conflicts)",
            records.len(),
            result.rows.len(),
            result.conflicts.len()
        );

        Ok(Response::new(ConsolidateCsvRes {
            rows: result
                .rows
                .into_iter()
                .map(|r| ConsolidatedRow {
                    serial: r.serial,
                    asset_tag: r.asset_tag,
                    client_name: r.client_name,
                    original_status: r.original_status,
                    install_date: date_str(r.install_date),
                    remove_date: date_str(r.remove_date),
                    event_date: r.event_date.to_string(),
                    brand: r.brand.unwrap_or_default(),
                    model: r.model.unwrap_or_default(),
                    value: r.value,
                })
                .collect(),
            conflicts: result
                .conflicts
                .into_iter()
                .map(|c| PatrimonyConflict {
                    asset_tag: c.asset_tag,
                    serial1: c.serial1,
                    serial2: c.serial2,
                })
                .collect(),
        }))
    }

    async fn import_batch(
        &self,
        request: Request<ImportBatchReq>,
    ) -> Result<Response<ImportBatchRes>, Status> {
        let user = current_user(&request)?;
        let req = request.into_inner();
        let user_id = db::parse_uuid(&user.user_id).map_err(Status::from)?;

        let mut summary = ImportSummary::default();
        let mut details = Vec::with_capacity(req.items.len());

        for row in &req.items {
            match self.apply_row(row, user_id).await {
                Ok(RowOutcome::Added) => {
                    summary.added += 1;
                    details.push(ImportDetail {
                        status: "added".to_string(),
                        serial: row.serial.clone(),
                        message: String::new(),
                    });
                }
                Ok(RowOutcome::Updated) => {
                    summary.updated += 1;
                    details.push(ImportDetail {
                        status: "updated".to_string(),
                        serial: row.serial.clone(),
                        message: String::new(),
                    });
                }
                Ok(RowOutcome::Duplicate) => {
                    summary.duplicates += 1;
                    details.push(ImportDetail {
                        status: "duplicate".to_string(),
                        serial: row.serial.clone(),
                        message: "No change".to_string(),
                    });
                }
                Err(e) => {
                    summary.errors += 1;
                    details.push(ImportDetail {
                        status: "error".to_string(),
                        serial: row.serial.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Import batch done: {} added, {} updated, {} duplicates, {} errors",
            summary.added,
            summary.updated,
            summary.duplicates,
            summary.errors
        );

        Ok(Response::new(ImportBatchRes {
            summary: Some(summary),
            details,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_semicolon_when_dominant() {
        assert_eq!(sniff_delimiter("A;B;C\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("A,B,C\n1,2,3"), b',');
        // Tie goes to semicolon, the common export format.
        assert_eq!(sniff_delimiter("ABC"), b';');
    }

    #[test]
    fn latin1_is_the_default_encoding() {
        // "instalação" with 0xE7 0xE3 bytes.
        let bytes = b"instala\xE7\xE3o";
        assert_eq!(decode_content(bytes, ""), "instalação");
        assert_eq!(
            decode_content("instalação".as_bytes(), "UTF-8"),
            "instalação"
        );
    }

    #[tokio::test]
    async fn technicians_can_consolidate() {
        use crate::middleware::AuthenticatedUser;

        // Lazy pool: consolidation never touches the database.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/estoque")
            .unwrap();
        let service = ImportServiceImpl::new(pool);

        let csv = "PATRIMONIO;IDENTIFICACAO;CLIENTE\nPAT01;SN12345;João\n";
        let mut request = Request::new(ConsolidateCsvReq {
            content: csv.as_bytes().to_vec(),
            encoding: "UTF-8".to_string(),
        });
        request.extensions_mut().insert(AuthenticatedUser {
            user_id: "22222222-2222-2222-2222-222222222222".to_string(),
            name: "Técnico".to_string(),
            role: "tecnico".to_string(),
        });

        let response = service.consolidate_csv(request).await.unwrap().into_inner();
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.rows[0].serial, "SN12345");
    }

    #[test]
    fn parses_flexible_row_lengths() {
        let records = parse_records("A;B;C\n1;2\nx;y;z;w", b';').unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], vec!["1", "2"]);
        assert_eq!(records[2].len(), 4);
    }
}
