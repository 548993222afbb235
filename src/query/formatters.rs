use crate::cache::{CacheKey, OwnershipHint};
use crate::events::TokenId;
use crate::metadata::{HintVerification, TokenDetails};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::json;

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

pub fn format_cache_entry(
    key: &CacheKey,
    hint: Option<&OwnershipHint>,
    format: &OutputFormat,
) -> String {
    match format {
        OutputFormat::Table => format_cache_entry_table(key, hint),
        OutputFormat::Json => {
            let value = match hint {
                Some(hint) => json!({
                    "key": key.as_str(),
                    "tokenIds": hint.token_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
                    "updatedAt": hint.updated_at.to_rfc3339(),
                }),
                None => json!({ "key": key.as_str(), "tokenIds": [], "updatedAt": null }),
            };
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["token_id", "updated_at"]);
            if let Some(hint) = hint {
                let updated_at = hint.updated_at.to_rfc3339();
                for id in &hint.token_ids {
                    let _ = wtr.write_record([id.to_string().as_str(), updated_at.as_str()]);
                }
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

fn format_cache_entry_table(key: &CacheKey, hint: Option<&OwnershipHint>) -> String {
    let Some(hint) = hint else {
        return format!("No cached ownership for {key}.");
    };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Token ID", "Cached At"]);

    let updated_at = hint.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    for id in &hint.token_ids {
        table.add_row(vec![Cell::new(id), Cell::new(&updated_at)]);
    }

    format!("{key}\n{table}")
}

/// Render a completed scan. `owned` is the verified set; cached ids it does not
/// contain are listed separately as unverified.
pub fn format_scan_result(
    key: &CacheKey,
    owned: &[TokenId],
    hint: Option<&OwnershipHint>,
    format: &OutputFormat,
) -> String {
    let unverified: Vec<TokenId> = hint
        .map(|hint| {
            hint.token_ids
                .iter()
                .filter(|id| !owned.contains(id))
                .copied()
                .collect()
        })
        .unwrap_or_default();
    let rows = owned
        .iter()
        .map(|id| (id, "owned"))
        .chain(unverified.iter().map(|id| (id, "cached, unverified")));

    match format {
        OutputFormat::Table => {
            if owned.is_empty() && unverified.is_empty() {
                return format!("{key}\nNo tokens owned.");
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Token ID", "Status"]);
            for (id, status) in rows {
                table.add_row(vec![Cell::new(id), Cell::new(status)]);
            }

            format!("{key}\n{table}")
        }
        OutputFormat::Json => {
            let value = json!({
                "key": key.as_str(),
                "tokenIds": owned.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
                "unverifiedCached": unverified.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
            });
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["token_id", "status"]);
            for (id, status) in rows {
                let _ = wtr.write_record([id.to_string().as_str(), status]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

pub fn format_token_details(details: &[TokenDetails], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if details.is_empty() {
                return "No tokens found.".to_string();
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Token ID", "Token URI"]);

            for detail in details {
                let uri = match (&detail.token_uri, &detail.error) {
                    (Some(uri), _) => uri.clone(),
                    (None, Some(err)) => format!("error: {}", shorten(err, 60)),
                    (None, None) => "N/A".to_string(),
                };
                table.add_row(vec![Cell::new(detail.token_id), Cell::new(uri)]);
            }

            table.to_string()
        }
        OutputFormat::Json => {
            let json_details: Vec<_> = details
                .iter()
                .map(|d| {
                    json!({
                        "token_id": d.token_id.to_string(),
                        "token_uri": d.token_uri,
                        "error": d.error,
                    })
                })
                .collect();
            serde_json::to_string_pretty(&json_details).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["token_id", "token_uri", "error"]);
            for d in details {
                let _ = wtr.write_record([
                    d.token_id.to_string().as_str(),
                    d.token_uri.as_deref().unwrap_or(""),
                    d.error.as_deref().unwrap_or(""),
                ]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

pub fn format_verification(verification: &HintVerification, format: &OutputFormat) -> String {
    let rows = verification
        .confirmed
        .iter()
        .map(|id| (id, "confirmed"))
        .chain(verification.unconfirmed.iter().map(|id| (id, "unconfirmed")));

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Token ID", "Status"]);
            for (id, status) in rows {
                table.add_row(vec![Cell::new(id), Cell::new(status)]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            let confirmed: Vec<String> =
                verification.confirmed.iter().map(|id| id.to_string()).collect();
            let unconfirmed: Vec<String> =
                verification.unconfirmed.iter().map(|id| id.to_string()).collect();
            serde_json::to_string_pretty(&json!({
                "confirmed": confirmed,
                "unconfirmed": unconfirmed,
            }))
            .unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["token_id", "status"]);
            for (id, status) in rows {
                let _ = wtr.write_record([id.to_string().as_str(), status]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address};
    use chrono::{TimeZone, Utc};

    fn key() -> CacheKey {
        CacheKey::new(
            1,
            address!("0x00000000000000000000000000000000000000aa"),
            address!("0x00000000000000000000000000000000000000bb"),
        )
    }

    fn hint() -> OwnershipHint {
        OwnershipHint {
            token_ids: vec![U256::from(12), U256::from(3)],
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!(OutputFormat::from("JSON"), OutputFormat::Json));
        assert!(matches!(OutputFormat::from("csv"), OutputFormat::Csv));
        assert!(matches!(OutputFormat::from("anything"), OutputFormat::Table));
    }

    #[test]
    fn test_cache_entry_json() {
        let out = format_cache_entry(&key(), Some(&hint()), &OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["tokenIds"], json!(["12", "3"]));
        assert_eq!(value["updatedAt"], json!("2024-05-01T12:00:00+00:00"));
    }

    #[test]
    fn test_cache_entry_csv() {
        let out = format_cache_entry(&key(), Some(&hint()), &OutputFormat::Csv);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "token_id,updated_at");
        assert_eq!(lines[1], "12,2024-05-01T12:00:00+00:00");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_missing_cache_entry_table() {
        let out = format_cache_entry(&key(), None, &OutputFormat::Table);
        assert!(out.starts_with("No cached ownership for nft-owned:1:"));
    }

    #[test]
    fn test_scan_result_never_reports_stale_cache_as_owned() {
        let stale = OwnershipHint {
            token_ids: vec![U256::from(5)],
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };

        let out = format_scan_result(&key(), &[], Some(&stale), &OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["tokenIds"], json!([]));
        assert_eq!(value["unverifiedCached"], json!(["5"]));

        let out = format_scan_result(&key(), &[], Some(&stale), &OutputFormat::Csv);
        assert_eq!(out.lines().nth(1), Some("5,\"cached, unverified\""));
    }

    #[test]
    fn test_scan_result_lists_verified_tokens() {
        let owned = [U256::from(12), U256::from(3)];
        let out = format_scan_result(&key(), &owned, Some(&hint()), &OutputFormat::Csv);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec!["token_id,status", "12,owned", "3,owned"]);
    }

    #[test]
    fn test_token_details_csv_keeps_errors() {
        let details = vec![
            TokenDetails {
                token_id: U256::from(1),
                token_uri: Some("ipfs://abc/1.json".to_string()),
                error: None,
            },
            TokenDetails {
                token_id: U256::from(2),
                token_uri: None,
                error: Some("execution reverted".to_string()),
            },
        ];
        let out = format_token_details(&details, &OutputFormat::Csv);
        assert!(out.contains("1,ipfs://abc/1.json,"));
        assert!(out.contains("2,,execution reverted"));
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("abc", 5), "abc");
        assert_eq!(shorten("abcdefgh", 3), "abc...");
    }
}
