use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ItemModel {
    pub id: String,
    pub serial: String,
    pub asset_tag: Option<String>,
    pub item_type: String,
    pub is_consumable: bool,
    pub status: String,
    pub current_holder: Option<String>,
    pub current_location: String,
    pub city: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub mac: Option<String>,
    pub value: f64,
    pub observations: Option<String>,
    pub photo: Option<String>,
    pub initial_amount: Option<f64>,
    pub current_amount: Option<f64>,
    pub unit: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Trim + uppercase for barcode-scanned identifiers (serial, asset tag, MAC).
pub fn clean_ident(s: &str) -> String {
    s.trim().to_uppercase()
}

fn clean_opt_ident(s: &mut Option<String>) {
    if let Some(v) = s {
        let cleaned = clean_ident(v);
        if cleaned.is_empty() {
            *s = None;
        } else {
            *s = Some(cleaned);
        }
    }
}

/// Full item-creation payload. This is the exact shape stored verbatim in an
/// ADD_ITEM pending request and replayed on approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDraft {
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub asset_tag: Option<String>,
    #[serde(default = "default_item_type")]
    pub item_type: String,
    #[serde(default)]
    pub is_consumable: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub initial_amount: Option<f64>,
    #[serde(default)]
    pub current_amount: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

fn default_item_type() -> String {
    "onu".to_string()
}

impl ItemDraft {
    /// Normalizes identifiers and fills the defaults the direct-application
    /// path relies on. Consumable materials without a serial get a synthetic
    /// one so the uniqueness invariant still holds.
    pub fn sanitize(&mut self) {
        self.serial = clean_ident(&self.serial);
        clean_opt_ident(&mut self.asset_tag);
        clean_opt_ident(&mut self.mac);

        if self.serial.is_empty() && self.is_consumable {
            self.serial = synthetic_serial("MAT");
        }
        if self.item_type.trim().is_empty() {
            self.item_type = default_item_type();
        }
        if self.status.as_deref().map_or(true, |s| s.trim().is_empty()) {
            self.status = Some("disponivel".to_string());
        }
        if self.location.as_deref().map_or(true, |s| s.trim().is_empty()) {
            self.location = Some("Estoque".to_string());
        }
        // Materials start with their full measured amount.
        if self.current_amount.is_none() {
            self.current_amount = self.initial_amount;
        }
    }

    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("disponivel")
    }

    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or("Estoque")
    }
}

/// Partial edit payload: only keys that are present are applied, so approving
/// an edit never nulls out fields the technician did not touch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ItemEdit {
    pub fn sanitize(&mut self) {
        clean_opt_ident(&mut self.serial);
        clean_opt_ident(&mut self.asset_tag);
        clean_opt_ident(&mut self.mac);
    }

    /// Checks the edit against the stored item so a material can never end up
    /// with a negative amount or more than its measured total.
    pub fn validate_amounts(&self, item: &ItemModel) -> AppResult<()> {
        let initial = self.initial_amount.or(item.initial_amount);
        let current = self.current_amount.or(item.current_amount);

        if initial.is_some_and(|i| i < 0.0) {
            return Err(AppError::Validation(
                "initial amount cannot be negative".to_string(),
            ));
        }
        if let Some(current) = current {
            if current < 0.0 {
                return Err(AppError::Validation(
                    "current amount cannot be negative".to_string(),
                ));
            }
            if initial.is_some_and(|i| current > i) {
                return Err(AppError::Validation(
                    "current amount cannot exceed the initial amount".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.serial.is_none()
            && self.asset_tag.is_none()
            && self.brand.is_none()
            && self.model.is_none()
            && self.mac.is_none()
            && self.value.is_none()
            && self.observations.is_none()
            && self.initial_amount.is_none()
            && self.current_amount.is_none()
            && self.unit.is_none()
    }
}

/// Synthetic identifier for materials and imports that arrive without one.
pub fn synthetic_serial(prefix: &str) -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, ts, &suffix[..6].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_ident_trims_and_uppercases() {
        assert_eq!(clean_ident("  abc123 "), "ABC123");
    }

    #[test]
    fn test_sanitize_fills_defaults() {
        let mut draft = ItemDraft {
            serial: " sn001 ".to_string(),
            asset_tag: Some(" pat-1 ".to_string()),
            item_type: String::new(),
            is_consumable: false,
            status: None,
            city: None,
            location: Some("".to_string()),
            brand: None,
            model: None,
            mac: Some("aa:bb:cc".to_string()),
            value: 0.0,
            observations: None,
            photo: None,
            initial_amount: Some(100.0),
            current_amount: None,
            unit: None,
        };
        draft.sanitize();
        assert_eq!(draft.serial, "SN001");
        assert_eq!(draft.asset_tag.as_deref(), Some("PAT-1"));
        assert_eq!(draft.mac.as_deref(), Some("AA:BB:CC"));
        assert_eq!(draft.item_type, "onu");
        assert_eq!(draft.status(), "disponivel");
        assert_eq!(draft.location(), "Estoque");
        assert_eq!(draft.current_amount, Some(100.0));
    }

    #[test]
    fn test_sanitize_generates_serial_for_materials() {
        let mut draft: ItemDraft = serde_json::from_value(serde_json::json!({
            "is_consumable": true,
            "initial_amount": 300.0,
            "unit": "m"
        }))
        .unwrap();
        draft.sanitize();
        assert!(draft.serial.starts_with("MAT-"));
    }

    #[test]
    fn test_edit_absent_keys_stay_absent() {
        // Only `value` present: serialized payload must not carry other keys,
        // so replaying it cannot overwrite untouched fields.
        let edit = ItemEdit {
            value: Some(120.0),
            ..Default::default()
        };
        let json = serde_json::to_value(&edit).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);

        let back: ItemEdit = serde_json::from_value(json).unwrap();
        assert_eq!(back.value, Some(120.0));
        assert!(back.observations.is_none());
    }

    fn stored_material(initial: Option<f64>, current: Option<f64>) -> ItemModel {
        ItemModel {
            id: "00000000-0000-0000-0000-000000000001".to_string(),
            serial: "MAT-1".to_string(),
            asset_tag: None,
            item_type: "materiais".to_string(),
            is_consumable: true,
            status: "disponivel".to_string(),
            current_holder: None,
            current_location: "Estoque".to_string(),
            city: None,
            brand: None,
            model: None,
            mac: None,
            value: 0.0,
            observations: None,
            photo: None,
            initial_amount: initial,
            current_amount: current,
            unit: Some("m".to_string()),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_validate_amounts_rejects_negative_current() {
        let item = stored_material(Some(300.0), Some(120.0));
        let edit = ItemEdit {
            current_amount: Some(-5.0),
            ..Default::default()
        };
        assert!(edit.validate_amounts(&item).is_err());
    }

    #[test]
    fn test_validate_amounts_checks_against_stored_initial() {
        // The edit touches only current_amount, so the bound comes from the
        // item as stored, not from the payload.
        let item = stored_material(Some(300.0), Some(120.0));
        let edit = ItemEdit {
            current_amount: Some(301.0),
            ..Default::default()
        };
        assert!(edit.validate_amounts(&item).is_err());

        let edit = ItemEdit {
            current_amount: Some(300.0),
            ..Default::default()
        };
        assert!(edit.validate_amounts(&item).is_ok());
    }

    #[test]
    fn test_validate_amounts_accepts_shrinking_initial_with_current() {
        let item = stored_material(Some(300.0), Some(250.0));
        let edit = ItemEdit {
            initial_amount: Some(200.0),
            current_amount: Some(180.0),
            ..Default::default()
        };
        assert!(edit.validate_amounts(&item).is_ok());

        // Shrinking only the total below the stored remainder is rejected.
        let edit = ItemEdit {
            initial_amount: Some(200.0),
            ..Default::default()
        };
        assert!(edit.validate_amounts(&item).is_err());
    }
}
