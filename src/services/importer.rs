//! Idempotent registration import and bulk status mutation.
//!
//! Import upserts by the natural key (event, normalized email): rows are
//! partitioned into new vs. existing with one batched existence check, then
//! written in size-bounded chunks. Row-level validation failures are
//! collected per input index and reported; one bad row never aborts the
//! batch. Re-running the same file converges instead of doubling.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::registration::Registration;
use crate::services::scancode;

/// Rows written per INSERT / per UPDATE transaction
const CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    #[serde(default)]
    pub email: String,
    pub name: Option<String>,
    pub paid: Option<bool>,
    /// Anything else in the row lands in the display-attribute bag
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportRowError {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub created: u64,
    pub updated: u64,
    pub duplicates_dropped: usize,
    pub errors: Vec<ImportRowError>,
}

#[derive(Debug, Clone)]
struct NormalizedRow {
    email: String,
    name: Option<String>,
    paid: Option<bool>,
    attributes: JsonValue,
}

/// Trims and lowercases an email, rejecting shapes that cannot be delivered
pub fn normalize_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err("missing email".to_string());
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@')
        }
        None => false,
    };
    if !valid || email.contains(char::is_whitespace) {
        return Err(format!("malformed email: {}", email));
    }

    Ok(email)
}

#[derive(Debug, Default)]
struct PreparedImport {
    rows: Vec<NormalizedRow>,
    duplicates_dropped: usize,
    errors: Vec<ImportRowError>,
}

/// Normalizes and validates a batch. Within one batch the last occurrence
/// of a duplicate email wins, before any write happens.
fn prepare(rows: Vec<ImportRow>) -> PreparedImport {
    let mut prepared = PreparedImport::default();
    let mut by_email: HashMap<String, usize> = HashMap::new();

    for (index, row) in rows.into_iter().enumerate() {
        let email = match normalize_email(&row.email) {
            Ok(email) => email,
            Err(reason) => {
                prepared.errors.push(ImportRowError { index, reason });
                continue;
            }
        };

        let normalized = NormalizedRow {
            email: email.clone(),
            name: row.name.filter(|n| !n.trim().is_empty()),
            paid: row.paid,
            attributes: JsonValue::Object(row.extra),
        };

        match by_email.get(&email) {
            Some(&slot) => {
                prepared.rows[slot] = normalized;
                prepared.duplicates_dropped += 1;
            }
            None => {
                by_email.insert(email, prepared.rows.len());
                prepared.rows.push(normalized);
            }
        }
    }

    prepared
}

/// Parses a CSV document into import rows. The `email` column is required;
/// `name` and `paid` are recognized, any other column goes into the
/// attribute bag.
pub fn parse_csv(text: &str) -> Result<Vec<ImportRow>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AppError::Validation(format!("invalid CSV header: {}", e)))?
        .clone();

    if !headers.iter().any(|h| h.eq_ignore_ascii_case("email")) {
        return Err(AppError::Validation(
            "CSV is missing an email column".to_string(),
        ));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| AppError::Validation(format!("invalid CSV row: {}", e)))?;

        let mut row = ImportRow {
            email: String::new(),
            name: None,
            paid: None,
            extra: Map::new(),
        };
        for (header, field) in headers.iter().zip(record.iter()) {
            match header.to_lowercase().as_str() {
                "email" => row.email = field.to_string(),
                "name" => {
                    if !field.is_empty() {
                        row.name = Some(field.to_string());
                    }
                }
                "paid" => {
                    row.paid = match field.to_lowercase().as_str() {
                        "true" | "yes" | "1" => Some(true),
                        "false" | "no" | "0" => Some(false),
                        _ => None,
                    }
                }
                other => {
                    if !field.is_empty() {
                        row.extra
                            .insert(other.to_string(), JsonValue::String(field.to_string()));
                    }
                }
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Runs one import batch against an event. Safe to re-run: creations go
/// through ON CONFLICT DO NOTHING and re-imported rows fall into the update
/// path, so totals converge.
pub async fn run_import(
    pool: &PgPool,
    event_id: Uuid,
    rows: Vec<ImportRow>,
) -> Result<ImportSummary, AppError> {
    let prepared = prepare(rows);
    let mut summary = ImportSummary {
        duplicates_dropped: prepared.duplicates_dropped,
        errors: prepared.errors,
        ..Default::default()
    };

    if prepared.rows.is_empty() {
        return Ok(summary);
    }

    // One batched existence check partitions the batch
    let emails: Vec<String> = prepared.rows.iter().map(|r| r.email.clone()).collect();
    let existing: std::collections::HashSet<String> =
        Registration::existing_emails(pool, event_id, &emails)
            .await?
            .into_iter()
            .collect();

    let (to_update, to_create): (Vec<_>, Vec<_>) = prepared
        .rows
        .into_iter()
        .partition(|row| existing.contains(&row.email));

    for chunk in to_create.chunks(CHUNK_SIZE) {
        let emails: Vec<String> = chunk.iter().map(|r| r.email.clone()).collect();
        let names: Vec<Option<String>> = chunk.iter().map(|r| r.name.clone()).collect();
        let codes: Vec<String> = chunk.iter().map(|_| scancode::generate_code()).collect();
        let paid: Vec<bool> = chunk.iter().map(|r| r.paid.unwrap_or(false)).collect();
        let attributes: Vec<JsonValue> = chunk.iter().map(|r| r.attributes.clone()).collect();

        summary.created +=
            Registration::insert_chunk(pool, event_id, &emails, &names, &codes, &paid, &attributes)
                .await?;
    }

    for chunk in to_update.chunks(CHUNK_SIZE) {
        let emails: Vec<String> = chunk.iter().map(|r| r.email.clone()).collect();
        let names: Vec<Option<String>> = chunk.iter().map(|r| r.name.clone()).collect();
        let paid: Vec<Option<bool>> = chunk.iter().map(|r| r.paid).collect();
        let attributes: Vec<JsonValue> = chunk.iter().map(|r| r.attributes.clone()).collect();

        // Each update chunk commits or rolls back as a unit
        let mut tx = pool.begin().await?;
        summary.updated +=
            Registration::update_chunk(&mut *tx, event_id, &emails, &names, &paid, &attributes)
                .await?;
        tx.commit().await?;
    }

    tracing::info!(
        %event_id,
        created = summary.created,
        updated = summary.updated,
        duplicates_dropped = summary.duplicates_dropped,
        errors = summary.errors.len(),
        "Import finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(email: &str, name: Option<&str>) -> ImportRow {
        ImportRow {
            email: email.to_string(),
            name: name.map(String::from),
            paid: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn normalizes_and_lowercases() {
        assert_eq!(normalize_email("  A@X.Com "), Ok("a@x.com".to_string()));
    }

    #[test]
    fn rejects_malformed_emails() {
        assert!(normalize_email("").is_err());
        assert!(normalize_email("   ").is_err());
        assert!(normalize_email("nodomain@").is_err());
        assert!(normalize_email("@nolocal.com").is_err());
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("sp ace@x.com").is_err());
    }

    #[test]
    fn last_occurrence_of_duplicate_wins() {
        let prepared = prepare(vec![
            row("a@x.com", Some("First")),
            row("b@x.com", None),
            row("A@X.COM ", Some("Last")),
        ]);

        assert_eq!(prepared.rows.len(), 2);
        assert_eq!(prepared.duplicates_dropped, 1);
        assert_eq!(prepared.rows[0].email, "a@x.com");
        assert_eq!(prepared.rows[0].name.as_deref(), Some("Last"));
    }

    #[test]
    fn bad_rows_are_reported_not_dropped_silently() {
        let prepared = prepare(vec![
            row("a@x.com", None),
            row("not-an-email", None),
            row("b@x.com", None),
        ]);

        assert_eq!(prepared.rows.len(), 2);
        assert_eq!(prepared.errors.len(), 1);
        assert_eq!(prepared.errors[0].index, 1);
    }

    #[test]
    fn csv_roundtrip_with_extra_columns() {
        let text = "email,name,paid,company\nA@X.com,Ada,yes,Initech\nb@x.com,,,\n";
        let rows = parse_csv(text).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].email, "A@X.com");
        assert_eq!(rows[0].name.as_deref(), Some("Ada"));
        assert_eq!(rows[0].paid, Some(true));
        assert_eq!(
            rows[0].extra.get("company"),
            Some(&JsonValue::String("Initech".to_string()))
        );
        assert_eq!(rows[1].name, None);
        assert_eq!(rows[1].paid, None);
    }

    #[test]
    fn csv_without_email_column_is_rejected() {
        assert!(parse_csv("name,company\nAda,Initech\n").is_err());
    }
}
