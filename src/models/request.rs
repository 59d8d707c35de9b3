use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, AppResult};
use crate::models::item::{clean_ident, ItemDraft, ItemEdit, ItemModel};

pub const STATUS_PENDING: &str = "PENDING";
pub const STATUS_APPROVED: &str = "APPROVED";
pub const STATUS_REJECTED: &str = "REJECTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    AddItem,
    EditItem,
    MoveItem,
    Installation,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::AddItem => "ADD_ITEM",
            RequestType::EditItem => "EDIT_ITEM",
            RequestType::MoveItem => "MOVE_ITEM",
            RequestType::Installation => "INSTALLATION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADD_ITEM" => Some(RequestType::AddItem),
            "EDIT_ITEM" => Some(RequestType::EditItem),
            "MOVE_ITEM" => Some(RequestType::MoveItem),
            "INSTALLATION" => Some(RequestType::Installation),
            _ => None,
        }
    }

    /// Audit action recorded when a request of this type is submitted.
    pub fn submission_audit_action(&self) -> &'static str {
        match self {
            RequestType::AddItem => "SOLICITACAO_CADASTRO",
            RequestType::EditItem => "SOLICITACAO_EDICAO",
            RequestType::MoveItem => "SOLICITACAO_MOVIMENTACAO",
            RequestType::Installation => "SOLICITACAO_INSTALACAO",
        }
    }

    /// Audit action recorded when a request of this type is approved.
    pub fn approval_audit_action(&self) -> &'static str {
        match self {
            RequestType::AddItem => "APROVAR_CADASTRO",
            RequestType::EditItem => "APROVAR_EDICAO",
            RequestType::MoveItem => "APROVAR_MOVIMENTACAO",
            RequestType::Installation => "APROVAR_INSTALACAO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveAction {
    #[serde(rename = "CONSUMIR")]
    Consumir,
    #[serde(rename = "TROCA_CLIENTE")]
    TrocaCliente,
    #[serde(rename = "DEFEITO")]
    Defeito,
    #[serde(rename = "DEVOLUCAO")]
    Devolucao,
    #[serde(rename = "EXTRAVIO")]
    Extravio,
    #[serde(rename = "BAIXA")]
    Baixa,
}

impl MoveAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONSUMIR" => Some(MoveAction::Consumir),
            "TROCA_CLIENTE" => Some(MoveAction::TrocaCliente),
            "DEFEITO" => Some(MoveAction::Defeito),
            "DEVOLUCAO" => Some(MoveAction::Devolucao),
            "EXTRAVIO" => Some(MoveAction::Extravio),
            "BAIXA" => Some(MoveAction::Baixa),
            _ => None,
        }
    }
}

/// The concrete mutation a move resolves to, computed once at submission time
/// and replayed verbatim on approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub clear_holder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_amount: Option<f64>,
    pub history_action: String,
    pub description: String,
}

/// Validates a move against the item's current state and resolves it to the
/// field updates and history entry it implies. Shared by the direct path and
/// the request queue, so both apply identical semantics.
pub fn compute_move(
    item: &ItemModel,
    action: MoveAction,
    client_name: Option<&str>,
    reason: Option<&str>,
    amount: Option<f64>,
) -> AppResult<MoveUpdate> {
    let reason = reason.unwrap_or("").trim();

    match action {
        MoveAction::Consumir => {
            let amount = amount.filter(|a| *a > 0.0).ok_or_else(|| {
                AppError::Validation("amount to consume must be greater than zero".to_string())
            })?;
            let current = match (item.is_consumable, item.current_amount) {
                (true, Some(c)) => c,
                _ => {
                    return Err(AppError::Validation(
                        "item is not a consumable material".to_string(),
                    ))
                }
            };
            let remaining = current - amount;
            if remaining < 0.0 {
                return Err(AppError::Validation(
                    "consumption exceeds the available amount".to_string(),
                ));
            }
            let unit = item.unit.as_deref().unwrap_or("");
            Ok(MoveUpdate {
                status: None,
                clear_holder: false,
                new_holder: None,
                location: None,
                new_amount: Some(remaining),
                history_action: "CONSUMO".to_string(),
                description: format!(
                    "Consumido {} {}. Restante: {} {}. Obs: {}",
                    amount, unit, remaining, unit, reason
                ),
            })
        }
        MoveAction::TrocaCliente => {
            let client = client_name.map(str::trim).filter(|c| !c.is_empty()).ok_or_else(
                || AppError::Validation("client name is required for this action".to_string()),
            )?;
            let previous = item.current_holder.as_deref().unwrap_or("Estoque");
            Ok(MoveUpdate {
                status: Some("em_uso".to_string()),
                clear_holder: false,
                new_holder: Some(client.to_string()),
                location: Some("Cliente".to_string()),
                new_amount: None,
                history_action: "TROCA_CLIENTE".to_string(),
                description: format!(
                    "Transferido de: {} para: {}. Obs: {}",
                    previous, client, reason
                ),
            })
        }
        MoveAction::Defeito => Ok(MoveUpdate {
            status: Some("manutencao".to_string()),
            clear_holder: false,
            new_holder: None,
            location: Some("Manutenção".to_string()),
            new_amount: None,
            history_action: "DEFEITO".to_string(),
            description: format!("Reportado defeito: {}", reason),
        }),
        MoveAction::Devolucao => Ok(MoveUpdate {
            status: Some("disponivel".to_string()),
            clear_holder: true,
            new_holder: None,
            location: Some("Estoque".to_string()),
            new_amount: None,
            history_action: "DEVOLUCAO".to_string(),
            description: format!("Devolvido ao estoque. {}", reason),
        }),
        MoveAction::Extravio => Ok(MoveUpdate {
            status: Some("extraviado".to_string()),
            clear_holder: false,
            new_holder: None,
            location: Some("Desconhecido".to_string()),
            new_amount: None,
            history_action: "EXTRAVIO".to_string(),
            description: format!("Registrado extravio: {}", reason),
        }),
        MoveAction::Baixa => Ok(MoveUpdate {
            status: Some("baixado".to_string()),
            clear_holder: false,
            new_holder: None,
            location: Some("Baixado".to_string()),
            new_amount: None,
            history_action: "BAIXA".to_string(),
            description: format!("Baixa permanente (Cliente levou/Venda): {}", reason),
        }),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequestData {
    pub action: MoveAction,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    pub update: MoveUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationItem {
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub asset_tag: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub item_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationData {
    pub client_name: String,
    #[serde(default)]
    pub client_code: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    pub items: Vec<InstallationItem>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl InstallationData {
    /// Barcode readers leave stray whitespace around scanned identifiers.
    /// Lines without a usable serial are dropped, not errored: a form row the
    /// technician left blank must not block the rest of the installation.
    pub fn sanitize(&mut self) {
        self.client_name = self.client_name.trim().to_string();
        for item in &mut self.items {
            item.serial = clean_ident(&item.serial);
            if let Some(tag) = &item.asset_tag {
                let cleaned = clean_ident(tag);
                item.asset_tag = (!cleaned.is_empty()).then_some(cleaned);
            }
        }
        self.items.retain(|item| item.serial.len() >= 3);
    }
}

/// Tagged union over the serialized `data` blob: one strongly typed variant
/// per request type, so approval dispatch is exhaustive.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    AddItem(ItemDraft),
    EditItem(ItemEdit),
    MoveItem(MoveRequestData),
    Installation(InstallationData),
}

impl RequestPayload {
    pub fn decode(kind: RequestType, raw: &str) -> AppResult<Self> {
        let payload = match kind {
            RequestType::AddItem => RequestPayload::AddItem(
                serde_json::from_str(raw)
                    .map_err(|e| AppError::Internal(format!("corrupt ADD_ITEM payload: {}", e)))?,
            ),
            RequestType::EditItem => RequestPayload::EditItem(
                serde_json::from_str(raw)
                    .map_err(|e| AppError::Internal(format!("corrupt EDIT_ITEM payload: {}", e)))?,
            ),
            RequestType::MoveItem => RequestPayload::MoveItem(
                serde_json::from_str(raw)
                    .map_err(|e| AppError::Internal(format!("corrupt MOVE_ITEM payload: {}", e)))?,
            ),
            RequestType::Installation => RequestPayload::Installation(
                serde_json::from_str(raw).map_err(|e| {
                    AppError::Internal(format!("corrupt INSTALLATION payload: {}", e))
                })?,
            ),
        };
        Ok(payload)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PendingRequestModel {
    pub id: String,
    pub request_type: String,
    pub status: String,
    pub data: String,
    pub item_id: Option<String>,
    pub user_id: String,
    pub admin_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> ItemModel {
        ItemModel {
            id: "11111111-1111-1111-1111-111111111111".to_string(),
            serial: "SN001".to_string(),
            asset_tag: Some("PAT01".to_string()),
            item_type: "onu".to_string(),
            is_consumable: false,
            status: "disponivel".to_string(),
            current_holder: None,
            current_location: "Estoque".to_string(),
            city: Some("Nova Maringá".to_string()),
            brand: Some("Huawei".to_string()),
            model: Some("8145".to_string()),
            mac: None,
            value: 150.0,
            observations: None,
            photo: None,
            initial_amount: None,
            current_amount: None,
            unit: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn sample_material() -> ItemModel {
        ItemModel {
            is_consumable: true,
            initial_amount: Some(300.0),
            current_amount: Some(120.0),
            unit: Some("m".to_string()),
            ..sample_item()
        }
    }

    #[test]
    fn test_consume_reduces_amount() {
        let item = sample_material();
        let up = compute_move(&item, MoveAction::Consumir, None, Some("obra"), Some(20.0)).unwrap();
        assert_eq!(up.new_amount, Some(100.0));
        assert_eq!(up.history_action, "CONSUMO");
        assert!(up.status.is_none());
    }

    #[test]
    fn test_consume_never_goes_below_zero() {
        let item = sample_material();
        let err = compute_move(&item, MoveAction::Consumir, None, None, Some(121.0)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_consume_rejects_equipment() {
        let item = sample_item();
        let err = compute_move(&item, MoveAction::Consumir, None, None, Some(1.0)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_consume_requires_positive_amount() {
        let item = sample_material();
        assert!(compute_move(&item, MoveAction::Consumir, None, None, Some(0.0)).is_err());
        assert!(compute_move(&item, MoveAction::Consumir, None, None, None).is_err());
    }

    #[test]
    fn test_troca_cliente_moves_to_client() {
        let item = sample_item();
        let up = compute_move(
            &item,
            MoveAction::TrocaCliente,
            Some("João"),
            Some("instalação"),
            None,
        )
        .unwrap();
        assert_eq!(up.status.as_deref(), Some("em_uso"));
        assert_eq!(up.new_holder.as_deref(), Some("João"));
        assert_eq!(up.location.as_deref(), Some("Cliente"));
        assert!(up.description.contains("de: Estoque"));
    }

    #[test]
    fn test_troca_cliente_requires_client() {
        let item = sample_item();
        assert!(compute_move(&item, MoveAction::TrocaCliente, Some("  "), None, None).is_err());
    }

    #[test]
    fn test_devolucao_clears_holder() {
        let mut item = sample_item();
        item.current_holder = Some("Maria".to_string());
        item.status = "em_uso".to_string();
        let up = compute_move(&item, MoveAction::Devolucao, None, None, None).unwrap();
        assert!(up.clear_holder);
        assert_eq!(up.status.as_deref(), Some("disponivel"));
        assert_eq!(up.location.as_deref(), Some("Estoque"));
    }

    #[test]
    fn test_move_roundtrips_through_request_payload() {
        let item = sample_item();
        let update =
            compute_move(&item, MoveAction::Defeito, None, Some("sem sinal"), None).unwrap();
        let data = MoveRequestData {
            action: MoveAction::Defeito,
            client_name: None,
            reason: Some("sem sinal".to_string()),
            amount: None,
            update,
        };
        let raw = serde_json::to_string(&data).unwrap();
        let decoded = RequestPayload::decode(RequestType::MoveItem, &raw).unwrap();
        match decoded {
            RequestPayload::MoveItem(d) => {
                assert_eq!(d.update.status.as_deref(), Some("manutencao"));
                assert_eq!(d.update.location.as_deref(), Some("Manutenção"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_request_type_is_bijective() {
        for kind in [
            RequestType::AddItem,
            RequestType::EditItem,
            RequestType::MoveItem,
            RequestType::Installation,
        ] {
            assert_eq!(RequestType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RequestType::parse("DELETE_ITEM"), None);
    }

    #[test]
    fn test_installation_sanitize_cleans_serials() {
        let mut data = InstallationData {
            client_name: "  João da Silva ".to_string(),
            client_code: None,
            address: None,
            items: vec![InstallationItem {
                serial: " sn-abc ".to_string(),
                asset_tag: Some("  ".to_string()),
                brand: None,
                model: None,
                mac: None,
                item_type: None,
            }],
            photos: vec![],
            observations: None,
            signature: None,
        };
        data.sanitize();
        assert_eq!(data.client_name, "João da Silva");
        assert_eq!(data.items[0].serial, "SN-ABC");
        assert!(data.items[0].asset_tag.is_none());
    }

    #[test]
    fn test_installation_sanitize_drops_serial_less_items() {
        let blank = InstallationItem {
            serial: "  ".to_string(),
            asset_tag: None,
            brand: None,
            model: None,
            mac: None,
            item_type: None,
        };
        let mut data = InstallationData {
            client_name: "Maria".to_string(),
            client_code: None,
            address: None,
            items: vec![
                blank.clone(),
                InstallationItem {
                    serial: "sn12345".to_string(),
                    ..blank.clone()
                },
                InstallationItem {
                    serial: "AB".to_string(),
                    ..blank
                },
            ],
            photos: vec![],
            observations: None,
            signature: None,
        };
        data.sanitize();
        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].serial, "SN12345");
    }
}
