//! Consolidation of raw historical CSV exports.
//!
//! A single physical asset usually appears on several rows of the source
//! spreadsheet, one per install/removal event over its lifetime. This module
//! reconstructs the current state of each serial by sorting every event
//! chronologically and folding the timeline into a serial-keyed map, while
//! flagging asset tags seen on more than one serial.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

/// Header discovery scans at most this many leading rows.
const HEADER_SCAN_WINDOW: usize = 25;

/// Sentinel used purely for stable ordering of rows without any usable date.
pub fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch date")
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsolidateError {
    #[error("header row not found: expected a 'Patrimonio' or 'Identificação'/'Cliente' line")]
    HeaderNotFound,

    #[error("serial/identification column not found in the header")]
    MissingSerialColumn,
}

impl From<ConsolidateError> for AppError {
    fn from(err: ConsolidateError) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// One consolidated current-state row per distinct serial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedRow {
    pub serial: String,
    pub asset_tag: String,
    /// Empty when the asset is back in stock.
    pub client_name: String,
    pub original_status: String,
    pub install_date: Option<NaiveDate>,
    pub remove_date: Option<NaiveDate>,
    pub event_date: NaiveDate,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub value: f64,
}

/// An asset tag observed attached to two different serials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatrimonyConflict {
    pub asset_tag: String,
    pub serial1: String,
    pub serial2: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consolidation {
    pub rows: Vec<ConsolidatedRow>,
    pub conflicts: Vec<PatrimonyConflict>,
}

/// Uppercases and strips the accents found in Portuguese headers, so matching
/// is case- and accent-insensitive.
pub fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' | 'Ç' => 'C',
            _ => c.to_ascii_uppercase(),
        })
        .collect()
}

static RE_PT_BR_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{4})").unwrap());

static RE_EXCEL_SERIAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}$").unwrap());

/// Parses either an Excel serial date (5-digit day count from 1899-12-30) or
/// a DD/MM/YYYY / DD-MM-YYYY textual date. Anything else yields None.
pub fn clean_date(raw: &str) -> Option<NaiveDate> {
    let clean = raw.trim();
    if clean.is_empty() {
        return None;
    }
    if RE_EXCEL_SERIAL.is_match(clean) {
        let days: i64 = clean.parse().ok()?;
        // 25569 = days between 1899-12-30 (Excel day 0) and the Unix epoch.
        return epoch().checked_add_signed(chrono::Duration::days(days - 25569));
    }
    let caps = RE_PT_BR_DATE.captures(clean)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Strips currency symbols and brazilian thousand separators ("R$ 1.234,56").
pub fn clean_currency(raw: &str) -> f64 {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .collect();
    let normalized = if filtered.contains(',') {
        filtered.replace('.', "").replace(',', ".")
    } else {
        filtered
    };
    normalized.parse().unwrap_or(0.0)
}

/// Resolved column indices for the known header tokens.
#[derive(Debug, Clone)]
struct ColumnMap {
    serial: usize,
    asset_tag: Option<usize>,
    client: Option<usize>,
    status: Option<usize>,
    install: Option<usize>,
    remove: Option<usize>,
    reference: Option<usize>,
    brand: Option<usize>,
    model: Option<usize>,
    value: Option<usize>,
}

fn find_header_row(rows: &[Vec<String>]) -> Option<usize> {
    rows.iter()
        .take(HEADER_SCAN_WINDOW)
        .position(|row| {
            let line = normalize(&row.join(";"));
            line.contains("PATRIMONIO")
                || (line.contains("IDENTIFICA") && line.contains("CLIENTE"))
        })
}

fn map_columns(header: &[String]) -> Result<ColumnMap, ConsolidateError> {
    let normalized: Vec<String> = header.iter().map(|h| normalize(h)).collect();
    let find = |pred: &dyn Fn(&str) -> bool| normalized.iter().position(|h| pred(h));

    let serial = find(&|h| h.contains("IDENTIFICA") || h.contains("SERIAL") || h == "SN")
        .ok_or(ConsolidateError::MissingSerialColumn)?;

    Ok(ColumnMap {
        serial,
        asset_tag: find(&|h| h.contains("PATRIMONIO")),
        client: find(&|h| h.contains("CLIENTE") || h.contains("NOME")),
        status: find(&|h| h.contains("SITUA") || h.contains("STATUS")),
        install: find(&|h| h.contains("INSTALADO")),
        remove: find(&|h| h.contains("RETIRADA")),
        reference: find(&|h| h.contains("DATA_REFERENCIA")),
        brand: find(&|h| h.contains("MARCA")),
        model: find(&|h| h.contains("MODELO")),
        value: find(&|h| h.contains("VALOR")),
    })
}

fn cell<'a>(row: &'a [String], idx: Option<usize>) -> &'a str {
    idx.and_then(|i| row.get(i)).map(|s| s.trim()).unwrap_or("")
}

fn extract_rows(data: &[Vec<String>], columns: &ColumnMap) -> Vec<ConsolidatedRow> {
    let mut out = Vec::new();
    for row in data {
        let serial = cell(row, Some(columns.serial));
        // Too-short serials are scanner noise, not assets.
        if serial.len() < 3 {
            continue;
        }

        let install_date = clean_date(cell(row, columns.install));
        let remove_date = clean_date(cell(row, columns.remove));

        // A removal is definitionally more recent than that row's install, so
        // it wins as the ordering key unless an explicit reference date exists.
        let event_date = clean_date(cell(row, columns.reference))
            .or(remove_date)
            .or(install_date)
            .unwrap_or_else(epoch);

        let brand = cell(row, columns.brand);
        let model = cell(row, columns.model);

        out.push(ConsolidatedRow {
            serial: serial.to_string(),
            asset_tag: cell(row, columns.asset_tag).to_string(),
            client_name: cell(row, columns.client).to_string(),
            original_status: cell(row, columns.status).to_string(),
            install_date,
            remove_date,
            event_date,
            brand: (!brand.is_empty()).then(|| brand.to_string()),
            model: (!model.is_empty()).then(|| model.to_string()),
            value: columns
                .value
                .map(|i| clean_currency(row.get(i).map(String::as_str).unwrap_or("")))
                .unwrap_or(0.0),
        });
    }
    out
}

/// Consolidates parsed CSV records into one current-state row per serial plus
/// the list of asset-tag conflicts found along the way.
pub fn consolidate(records: &[Vec<String>]) -> Result<Consolidation, ConsolidateError> {
    let header_idx = find_header_row(records).ok_or(ConsolidateError::HeaderNotFound)?;
    let columns = map_columns(&records[header_idx])?;

    let mut rows = extract_rows(&records[header_idx + 1..], &columns);

    // Chronological merge: later events overwrite earlier ones per serial, so
    // after the walk each entry is the serial's most recent known state.
    // The sort is stable, keeping file order for rows with equal dates.
    rows.sort_by_key(|r| r.event_date);

    let mut consolidated: BTreeMap<String, ConsolidatedRow> = BTreeMap::new();
    let mut tag_owner: HashMap<String, String> = HashMap::new();
    let mut conflicts: Vec<PatrimonyConflict> = Vec::new();

    for row in rows {
        if !row.asset_tag.is_empty() {
            match tag_owner.get(&row.asset_tag) {
                Some(owner) if owner != &row.serial => conflicts.push(PatrimonyConflict {
                    asset_tag: row.asset_tag.clone(),
                    serial1: owner.clone(),
                    serial2: row.serial.clone(),
                }),
                _ => {}
            }
            tag_owner.insert(row.asset_tag.clone(), row.serial.clone());
        }

        let mut state = row;
        // A removal means the asset went back to stock: clear the client and
        // force the status to available.
        if state.remove_date.is_some() {
            state.client_name.clear();
            state.original_status = "DISPONIVEL".to_string();
        }
        consolidated.insert(state.serial.clone(), state);
    }

    Ok(Consolidation {
        rows: consolidated.into_values().collect(),
        conflicts,
    })
}

/// Status classification used during batch apply, driven by the client name
/// and keyword matching on the export's free-text status.
pub fn infer_status(client_name: &str, original_status: &str) -> &'static str {
    let s = normalize(original_status);
    if !client_name.trim().is_empty()
        || s.contains("COMODATO")
        || s.contains("ATIVO")
        || s.contains("EM USO")
    {
        "em_uso"
    } else if s.contains("DEFEITO") || s.contains("MANUTENCAO") || s.contains("QUEBRADO") {
        "manutencao"
    } else {
        "disponivel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn header() -> &'static [&'static str] {
        &[
            "PATRIMÔNIO",
            "IDENTIFICAÇÃO",
            "CLIENTE",
            "SITUAÇÃO",
            "INSTALADO EM",
            "DATA RETIRADA",
            "MARCA",
            "MODELO",
            "VALOR",
        ]
    }

    #[test]
    fn test_normalize_strips_accents() {
        assert_eq!(normalize("Patrimônio"), "PATRIMONIO");
        assert_eq!(normalize(" situação "), "SITUACAO");
    }

    #[test]
    fn test_clean_date_pt_br() {
        assert_eq!(
            clean_date("15/03/2023"),
            NaiveDate::from_ymd_opt(2023, 3, 15)
        );
        assert_eq!(
            clean_date("1-6-2023"),
            NaiveDate::from_ymd_opt(2023, 6, 1)
        );
        assert_eq!(clean_date("2023-06-01"), None);
        assert_eq!(clean_date("31/02/2023"), None);
        assert_eq!(clean_date(""), None);
    }

    #[test]
    fn test_clean_date_excel_serial() {
        // 44927 days after 1899-12-30 is 2023-01-01.
        assert_eq!(clean_date("44927"), NaiveDate::from_ymd_opt(2023, 1, 1));
    }

    #[test]
    fn test_clean_currency() {
        assert_eq!(clean_currency("R$ 1.234,56"), 1234.56);
        assert_eq!(clean_currency("150,00"), 150.0);
        assert_eq!(clean_currency("89.9"), 89.9);
        assert_eq!(clean_currency("abc"), 0.0);
    }

    #[test]
    fn test_header_not_found() {
        let data = rows(&[&["a", "b"], &["c", "d"]]);
        assert_eq!(consolidate(&data), Err(ConsolidateError::HeaderNotFound));
    }

    #[test]
    fn test_header_found_after_garbage_rows() {
        let data = rows(&[
            &["Relatório de equipamentos", ""],
            &["Gerado em 01/01/2024", ""],
            header(),
            &["PAT01", "SN001", "João", "COMODATO", "01/01/2023", "", "", "", "150,00"],
        ]);
        let result = consolidate(&data).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].serial, "SN001");
        assert_eq!(result.rows[0].client_name, "João");
        assert_eq!(result.rows[0].value, 150.0);
    }

    #[test]
    fn test_missing_serial_column() {
        let data = rows(&[
            &["PATRIMONIO", "CLIENTE"],
            &["PAT01", "João"],
        ]);
        assert_eq!(
            consolidate(&data),
            Err(ConsolidateError::MissingSerialColumn)
        );
    }

    #[test]
    fn test_short_serials_are_skipped() {
        let data = rows(&[
            header(),
            &["", "AB", "João", "", "01/01/2023", "", "", "", ""],
            &["", "", "Maria", "", "01/01/2023", "", "", "", ""],
        ]);
        assert!(consolidate(&data).unwrap().rows.is_empty());
    }

    #[test]
    fn test_removal_clears_holder() {
        // Install in January, removal in June: the later event wins and the
        // asset comes back to stock.
        let data = rows(&[
            header(),
            &["PAT01", "SN001", "João", "COMODATO", "01/01/2023", "", "", "", ""],
            &["PAT01", "SN001", "João", "COMODATO", "01/01/2023", "01/06/2023", "", "", ""],
        ]);
        let result = consolidate(&data).unwrap();
        assert_eq!(result.rows.len(), 1);
        let row = &result.rows[0];
        assert_eq!(row.client_name, "");
        assert_eq!(row.original_status, "DISPONIVEL");
    }

    #[test]
    fn test_latest_event_wins_regardless_of_file_order() {
        let a: &[&str] = &["PAT01", "SN001", "João", "COMODATO", "01/01/2023", "", "", "", ""];
        let b: &[&str] = &["PAT01", "SN001", "Maria", "COMODATO", "01/06/2023", "", "", "", ""];

        let forward = consolidate(&rows(&[header(), a, b])).unwrap();
        let backward = consolidate(&rows(&[header(), b, a])).unwrap();

        assert_eq!(forward.rows, backward.rows);
        assert_eq!(forward.rows[0].client_name, "Maria");
    }

    #[test]
    fn test_patrimony_conflict_is_surfaced() {
        let data = rows(&[
            header(),
            &["PAT01", "SN001", "João", "", "01/01/2023", "", "", "", ""],
            &["PAT01", "SN002", "Maria", "", "01/02/2023", "", "", "", ""],
        ]);
        let result = consolidate(&data).unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(
            result.conflicts,
            vec![PatrimonyConflict {
                asset_tag: "PAT01".to_string(),
                serial1: "SN001".to_string(),
                serial2: "SN002".to_string(),
            }]
        );
    }

    #[test]
    fn test_reference_date_column_is_preferred() {
        let data = rows(&[
            &["DATA_REFERENCIA", "IDENTIFICACAO", "CLIENTE", "INSTALADO"],
            // Reference says June even though install says January.
            &["01/06/2023", "SN001", "João", "01/01/2023"],
            &["01/03/2023", "SN001", "Maria", "01/03/2023"],
        ]);
        let result = consolidate(&data).unwrap();
        assert_eq!(result.rows[0].client_name, "João");
    }

    #[test]
    fn test_undated_rows_sort_first() {
        let data = rows(&[
            header(),
            &["", "SN001", "Antigo", "", "", "", "", "", ""],
            &["", "SN001", "Atual", "", "05/05/2023", "", "", "", ""],
        ]);
        let result = consolidate(&data).unwrap();
        assert_eq!(result.rows[0].client_name, "Atual");
    }

    #[test]
    fn test_infer_status() {
        assert_eq!(infer_status("João", ""), "em_uso");
        assert_eq!(infer_status("", "COMODATO ATIVO"), "em_uso");
        assert_eq!(infer_status("", "EM DEFEITO"), "manutencao");
        assert_eq!(infer_status("", "Manutenção"), "manutencao");
        assert_eq!(infer_status("", "QUEBRADO"), "manutencao");
        assert_eq!(infer_status("", ""), "disponivel");
        assert_eq!(infer_status("", "DEVOLVIDO"), "disponivel");
    }
}
