use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{format_cents, LedgerEntry, UserId, WithdrawalRequest};

/// Everything recorded for one user, for JSON export
#[derive(Debug, Clone, Serialize)]
pub struct UserSnapshot {
    pub user_id: UserId,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<LedgerEntry>,
    pub withdrawals: Vec<WithdrawalRequest>,
}

/// Exporter for converting a user's ledger data to CSV or JSON
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export ledger entries to CSV format, newest first
    pub async fn export_entries_csv<W: Write>(&self, user_id: UserId, writer: W) -> Result<usize> {
        let entries = self.service.statement(user_id, usize::MAX).await?.entries;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "occurred_at",
            "product_id",
            "type",
            "reference",
            "status",
            "amount",
            "description",
        ])?;

        for entry in &entries {
            csv_writer.write_record([
                entry.id.to_string(),
                entry.occurred_at.to_rfc3339(),
                entry.product_id.to_string(),
                entry.entry_type.as_str().to_string(),
                entry.reference.clone(),
                entry.status.as_str().to_string(),
                format_cents(entry.amount_cents),
                entry.description.clone().unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(entries.len())
    }

    /// Export withdrawal requests to CSV format, newest first
    pub async fn export_withdrawals_csv<W: Write>(
        &self,
        user_id: UserId,
        writer: W,
    ) -> Result<usize> {
        let withdrawals = self.service.list_withdrawals(user_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "reference",
            "product_id",
            "amount",
            "status",
            "requested_at",
            "processed_at",
            "notes",
        ])?;

        for request in &withdrawals {
            csv_writer.write_record([
                request.id.to_string(),
                request.reference(),
                request.product_id.to_string(),
                format_cents(request.amount_cents),
                request.status.as_str().to_string(),
                request.requested_at.to_rfc3339(),
                request
                    .processed_at
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
                request.notes.clone().unwrap_or_default(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(withdrawals.len())
    }

    /// Export entries and withdrawal requests of a user as one JSON document
    pub async fn export_json<W: Write>(&self, user_id: UserId, writer: W) -> Result<UserSnapshot> {
        let snapshot = UserSnapshot {
            user_id,
            exported_at: Utc::now(),
            entries: self.service.statement(user_id, usize::MAX).await?.entries,
            withdrawals: self.service.list_withdrawals(user_id).await?,
        };

        serde_json::to_writer_pretty(writer, &snapshot)?;
        Ok(snapshot)
    }
}
