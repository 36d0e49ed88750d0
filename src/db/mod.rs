use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::models::{
    AnalysisData, DataSource, DocumentStatus, FileKind, FileMetadata, ProposalData,
    ProposalRecord, ResultRecord, ResultStatus, Settings, UserProfile, UtilityBillData,
    UtilityBillRecord,
};
use crate::utils::now_rfc3339;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_documents.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/001_create_documents.sql"
                )),
            ),
            (
                "002_create_analysis_results.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/002_create_analysis_results.sql"
                )),
            ),
            (
                "003_create_extraction_logs_and_settings.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/003_create_extraction_logs_and_settings.sql"
                )),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    pub fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO users (id, state, latitude, longitude, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user.id, user.state, user.latitude, user.longitude, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_user_profile(&self, id: &str) -> Result<Option<UserProfile>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, state, latitude, longitude FROM users WHERE id = ?1")?;
        let profile = stmt
            .query_row(params![id], |row| {
                Ok(UserProfile {
                    id: row.get(0)?,
                    state: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                })
            })
            .optional()?;
        Ok(profile)
    }

    pub fn insert_proposal(&self, record: &ProposalRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO proposals (
                id, user_id, file_path, original_name, size_bytes, mime_type, file_sha256,
                status, data_source, extracted_json, errors_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.user_id,
                record.file.path,
                record.file.original_name,
                record.file.size_bytes as i64,
                record.file.mime_type,
                record.file.sha256,
                record.status.as_str(),
                record.data_source.map(|s| s.as_str()),
                serde_json::to_string(&record.extracted)?,
                serde_json::to_string(&record.processing_errors)?,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_proposal(&self, record: &ProposalRecord) -> Result<()> {
        self.conn.execute(
            "UPDATE proposals SET status = ?2, data_source = ?3, extracted_json = ?4,
                    errors_json = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                record.id,
                record.status.as_str(),
                record.data_source.map(|s| s.as_str()),
                serde_json::to_string(&record.extracted)?,
                serde_json::to_string(&record.processing_errors)?,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_proposal(&self, id: &str) -> Result<Option<ProposalRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, file_path, original_name, size_bytes, mime_type, file_sha256,
                    status, data_source, extracted_json, errors_json, created_at, updated_at
             FROM proposals WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, String>(12)?,
                ))
            })
            .optional()?;

        let Some((
            id,
            user_id,
            file_path,
            original_name,
            size_bytes,
            mime_type,
            sha256,
            status,
            data_source,
            extracted_json,
            errors_json,
            created_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        let extracted: ProposalData = serde_json::from_str(&extracted_json)?;
        let processing_errors: Vec<String> = serde_json::from_str(&errors_json)?;
        Ok(Some(ProposalRecord {
            id,
            user_id,
            file: FileMetadata {
                path: file_path,
                original_name,
                size_bytes: size_bytes as u64,
                mime_type,
                sha256,
            },
            status: DocumentStatus::parse(&status)
                .ok_or_else(|| Error::Storage(format!("bad proposal status: {status}")))?,
            data_source: data_source.as_deref().and_then(DataSource::parse),
            extracted,
            processing_errors,
            created_at,
            updated_at,
        }))
    }

    pub fn delete_proposal(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM proposals WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn insert_utility_bill(&self, record: &UtilityBillRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO utility_bills (
                id, user_id, file_path, original_name, size_bytes, mime_type, file_sha256,
                file_type, status, data_source, extracted_json, errors_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.id,
                record.user_id,
                record.file.path,
                record.file.original_name,
                record.file.size_bytes as i64,
                record.file.mime_type,
                record.file.sha256,
                record.file_type.as_str(),
                record.status.as_str(),
                record.data_source.map(|s| s.as_str()),
                serde_json::to_string(&record.extracted)?,
                serde_json::to_string(&record.processing_errors)?,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_utility_bill(&self, record: &UtilityBillRecord) -> Result<()> {
        self.conn.execute(
            "UPDATE utility_bills SET status = ?2, data_source = ?3, extracted_json = ?4,
                    errors_json = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                record.id,
                record.status.as_str(),
                record.data_source.map(|s| s.as_str()),
                serde_json::to_string(&record.extracted)?,
                serde_json::to_string(&record.processing_errors)?,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_utility_bill(&self, id: &str) -> Result<Option<UtilityBillRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, file_path, original_name, size_bytes, mime_type, file_sha256,
                    file_type, status, data_source, extracted_json, errors_json, created_at, updated_at
             FROM utility_bills WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, String>(12)?,
                    row.get::<_, String>(13)?,
                ))
            })
            .optional()?;

        let Some((
            id,
            user_id,
            file_path,
            original_name,
            size_bytes,
            mime_type,
            sha256,
            file_type,
            status,
            data_source,
            extracted_json,
            errors_json,
            created_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        let extracted: UtilityBillData = serde_json::from_str(&extracted_json)?;
        let processing_errors: Vec<String> = serde_json::from_str(&errors_json)?;
        Ok(Some(UtilityBillRecord {
            id,
            user_id,
            file: FileMetadata {
                path: file_path,
                original_name,
                size_bytes: size_bytes as u64,
                mime_type,
                sha256,
            },
            file_type: match file_type.as_str() {
                "pdf" => FileKind::Pdf,
                "image" => FileKind::Image,
                other => return Err(Error::Storage(format!("bad file type: {other}"))),
            },
            status: DocumentStatus::parse(&status)
                .ok_or_else(|| Error::Storage(format!("bad bill status: {status}")))?,
            data_source: data_source.as_deref().and_then(DataSource::parse),
            extracted,
            processing_errors,
            created_at,
            updated_at,
        }))
    }

    pub fn delete_utility_bill(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM utility_bills WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn insert_result(&self, record: &ResultRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO analysis_results (
                id, user_id, proposal_id, utility_bill_id, status, analysis_json,
                errors_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.user_id,
                record.proposal_id,
                record.utility_bill_id,
                record.status.as_str(),
                record
                    .analysis
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&record.processing_errors)?,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Moves a pending result to a terminal status. Terminal records are
    /// immutable; finalizing anything but a pending record is a storage error.
    pub fn finalize_result(
        &self,
        id: &str,
        status: ResultStatus,
        analysis: Option<&AnalysisData>,
        errors: &[String],
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE analysis_results SET status = ?2, analysis_json = ?3, errors_json = ?4,
                    updated_at = ?5
             WHERE id = ?1 AND status = 'pending'",
            params![
                id,
                status.as_str(),
                analysis.map(serde_json::to_string).transpose()?,
                serde_json::to_string(errors)?,
                now_rfc3339(),
            ],
        )?;
        if rows == 0 {
            return Err(Error::Storage(format!(
                "result {id} is not pending; terminal results are immutable"
            )));
        }
        Ok(())
    }

    pub fn get_result(&self, id: &str) -> Result<Option<ResultRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, proposal_id, utility_bill_id, status, analysis_json,
                    errors_json, created_at, updated_at
             FROM analysis_results WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .optional()?;

        let Some((
            id,
            user_id,
            proposal_id,
            utility_bill_id,
            status,
            analysis_json,
            errors_json,
            created_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        let analysis: Option<AnalysisData> = analysis_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let processing_errors: Vec<String> = serde_json::from_str(&errors_json)?;
        Ok(Some(ResultRecord {
            id,
            user_id,
            proposal_id,
            utility_bill_id,
            status: ResultStatus::parse(&status)
                .ok_or_else(|| Error::Storage(format!("bad result status: {status}")))?,
            analysis,
            processing_errors,
            created_at,
            updated_at,
        }))
    }

    pub fn list_results_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM analysis_results WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    pub fn delete_result(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM analysis_results WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_extraction(
        &self,
        correlation_id: &str,
        document_id: Option<&str>,
        provider: &str,
        status: &str,
        input_sample: Option<&str>,
        prompt_tokens: Option<i64>,
        completion_tokens: Option<i64>,
        message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO extraction_logs (
                id, correlation_id, document_id, provider, status, input_sample,
                prompt_tokens, completion_tokens, message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                uuid::Uuid::new_v4().to_string(),
                correlation_id,
                document_id,
                provider,
                status,
                input_sample,
                prompt_tokens,
                completion_tokens,
                message,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn count_extraction_logs(&self, document_id: &str) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM extraction_logs WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let value = stmt
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn load_settings(&self) -> Settings {
        let openai_api_key = self.get_setting("openai_api_key").ok().flatten();
        let solar_api_key = self.get_setting("solar_api_key").ok().flatten();
        let pvwatts_api_key = self.get_setting("pvwatts_api_key").ok().flatten();
        let ocr_language = self
            .get_setting("ocr_language")
            .ok()
            .flatten()
            .unwrap_or_else(|| "eng".to_string());
        Settings {
            openai_api_key,
            solar_api_key,
            pvwatts_api_key,
            ocr_language,
        }
    }
}
