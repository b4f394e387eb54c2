use super::models::*;
use super::sqlite::Database;
use crate::error::Error;
use crate::extraction::{Extraction, ExtractionKind};
use crate::index::{signature_tokens, SignatureIndex};
use crate::signature::FileSignature;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::{debug, trace};

const RECORD_COLUMNS: &str =
    "id, path, ingest_time, block_size, digest_a, digest_b, cluster_id, similar_to, version, linked";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(Record, String)> {
    let block_size: i64 = row.get(3)?;
    let similar_to_json: String = row.get(7)?;
    Ok((
        Record {
            id: row.get(0)?,
            path: row.get(1)?,
            ingest_time: row.get(2)?,
            signature: FileSignature {
                block_size: block_size as u64,
                digest_a: row.get(4)?,
                digest_b: row.get(5)?,
            },
            cluster_id: row.get(6)?,
            similar_to: Vec::new(),
            version: row.get(8)?,
            linked: row.get(9)?,
        },
        similar_to_json,
    ))
}

fn decode_record((mut record, similar_to_json): (Record, String)) -> Result<Record, Error> {
    record.similar_to = serde_json::from_str(&similar_to_json)?;
    Ok(record)
}

impl Database {
    pub fn record_count(&self) -> Result<i64, Error> {
        Ok(self
            .connection()
            .query_row("SELECT COUNT(*) FROM record", [], |row| row.get(0))?)
    }

    /// Page through records ordered by ingest time, newest first. With
    /// `path_prefix`, only records whose path starts with it; an archive
    /// path followed by `!/` selects that archive's members.
    pub fn list_records(
        &self,
        path_prefix: Option<&str>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Record>, Error> {
        let sql = format!(
            "SELECT {} FROM record \
             WHERE ?1 IS NULL OR substr(path, 1, length(?1)) = ?1 \
             ORDER BY ingest_time DESC, id ASC LIMIT ?2 OFFSET ?3",
            RECORD_COLUMNS
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let rows = stmt
            .query_map(params![path_prefix, limit, offset], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode_record).collect()
    }

    /// Tracked extractions, optionally filtered by exact path and by kind.
    pub fn list_extractions(
        &self,
        path: Option<&str>,
        kind: Option<ExtractionKind>,
    ) -> Result<Vec<Extraction>, Error> {
        let mut stmt = self.connection().prepare(
            "SELECT path, kind, size_on_disk, files, tracked_at FROM extraction \
             WHERE (?1 IS NULL OR path = ?1) AND (?2 IS NULL OR kind = ?2) \
             ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![path, kind.map(|k| k.as_str())], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(path, kind, size_on_disk, files, tracked_at)| -> Result<Extraction, Error> {
                Ok(Extraction {
                    path,
                    kind: kind.parse()?,
                    size_on_disk: size_on_disk as u64,
                    files: files as u64,
                    tracked_at,
                })
            })
            .collect()
    }

    /// Replace every record's cluster id with `assignments`; records not
    /// listed are cleared. `cluster_id` is a derived cache, so this does not
    /// bump record versions.
    pub fn assign_cluster_ids(&self, assignments: &[(String, Option<String>)]) -> Result<usize, Error> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute("UPDATE record SET cluster_id = NULL WHERE cluster_id IS NOT NULL", [])?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached("UPDATE record SET cluster_id = ?1 WHERE id = ?2")?;
            for (id, cluster_id) in assignments {
                count += stmt.execute(params![cluster_id, id])?;
            }
        }
        tx.commit()?;
        debug!("Assigned cluster ids to {} records", count);
        Ok(count)
    }
}

impl SignatureIndex for Database {
    fn index_record(&self, record: &Record) -> Result<bool, Error> {
        let tokens = signature_tokens(&record.signature);
        let similar_to = serde_json::to_string(&record.similar_to)?;

        let tx = self.connection().unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT INTO record \
             (id, path, ingest_time, block_size, digest_a, digest_b, cluster_id, similar_to, version, linked) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO NOTHING",
            params![
                record.id,
                record.path,
                record.ingest_time,
                record.signature.block_size as i64,
                record.signature.digest_a,
                record.signature.digest_b,
                record.cluster_id,
                similar_to,
                record.version,
                record.linked,
            ],
        )?;

        if inserted == 0 {
            tx.rollback()?;
            debug!("Record {} already indexed", record.id);
            return Ok(false);
        }

        {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO record_token (token, record_id) VALUES (?1, ?2)")?;
            for token in &tokens {
                stmt.execute(params![token, record.id])?;
            }
        }
        tx.execute(
            "UPDATE store_meta SET value = value + 1 WHERE key = 'link_generation'",
            [],
        )?;
        tx.commit()?;
        trace!("Indexed record {} with {} tokens", record.id, tokens.len());
        Ok(true)
    }

    fn get_record(&self, id: &str) -> Result<Option<Record>, Error> {
        let sql = format!("SELECT {} FROM record WHERE id = ?1", RECORD_COLUMNS);
        let row = self
            .connection()
            .query_row(&sql, params![id], record_from_row)
            .optional()?;
        row.map(decode_record).transpose()
    }

    fn find_candidates(
        &self,
        signature: &FileSignature,
        max_candidates: usize,
    ) -> Result<Vec<Candidate>, Error> {
        let tokens = signature_tokens(signature);
        if tokens.is_empty() || max_candidates == 0 {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; tokens.len()].join(", ");
        let sql = format!(
            "SELECT r.id, r.path, r.block_size, r.digest_a, r.digest_b, COUNT(*) AS overlap \
             FROM record_token t JOIN record r ON r.id = t.record_id \
             WHERE t.token IN ({}) \
             GROUP BY r.id \
             ORDER BY overlap DESC, r.id ASC \
             LIMIT ?",
            placeholders
        );

        let limit = max_candidates as i64;
        let mut stmt = self.connection().prepare(&sql)?;
        let candidates = stmt
            .query_map(
                params_from_iter(tokens.iter().chain(std::iter::once(&limit))),
                |row| {
                    let block_size: i64 = row.get(2)?;
                    let overlap: i64 = row.get(5)?;
                    Ok(Candidate {
                        record_id: row.get(0)?,
                        path: row.get(1)?,
                        signature: FileSignature {
                            block_size: block_size as u64,
                            digest_a: row.get(3)?,
                            digest_b: row.get(4)?,
                        },
                        overlap: overlap as u32,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        trace!(
            "{} tokens matched {} candidates",
            tokens.len(),
            candidates.len()
        );
        Ok(candidates)
    }

    fn update_links(&self, id: &str, expected_version: i64, links: &[Link]) -> Result<(), Error> {
        let similar_to = serde_json::to_string(links)?;

        let tx = self.connection().unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE record SET similar_to = ?1, version = version + 1 \
             WHERE id = ?2 AND version = ?3",
            params![similar_to, id, expected_version],
        )?;

        if updated == 0 {
            let exists: bool = tx
                .query_row("SELECT 1 FROM record WHERE id = ?1", params![id], |_| Ok(true))
                .optional()?
                .unwrap_or(false);
            tx.rollback()?;
            if exists {
                return Err(Error::Conflict {
                    record_id: id.to_string(),
                });
            }
            return Err(Error::Other(format!("record {} not found", id)));
        }

        tx.execute(
            "UPDATE store_meta SET value = value + 1 WHERE key = 'link_generation'",
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn mark_linked(&self, id: &str) -> Result<(), Error> {
        self.connection()
            .execute("UPDATE record SET linked = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn link_edges(&self, min_score: u32) -> Result<Vec<(String, String, u32)>, Error> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, similar_to FROM record WHERE similar_to != '[]'")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut edges = Vec::new();
        for (id, json) in rows {
            let links: Vec<Link> = serde_json::from_str(&json)?;
            edges.extend(
                links
                    .into_iter()
                    .filter(|l| l.score >= min_score)
                    .map(|l| (id.clone(), l.record_id, l.score)),
            );
        }
        Ok(edges)
    }

    fn track_extraction(&self, extraction: &Extraction) -> Result<(), Error> {
        self.connection().execute(
            "INSERT INTO extraction (path, kind, size_on_disk, files, tracked_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(path) DO UPDATE SET \
                 kind = excluded.kind, \
                 size_on_disk = excluded.size_on_disk, \
                 files = excluded.files, \
                 tracked_at = excluded.tracked_at",
            params![
                extraction.path,
                extraction.kind.as_str(),
                extraction.size_on_disk as i64,
                extraction.files as i64,
                extraction.tracked_at,
            ],
        )?;
        debug!(
            "Tracked {} extraction {} ({} files)",
            extraction.kind, extraction.path, extraction.files
        );
        Ok(())
    }

    fn link_generation(&self) -> Result<i64, Error> {
        Ok(self.connection().query_row(
            "SELECT value FROM store_meta WHERE key = 'link_generation'",
            [],
            |row| row.get(0),
        )?)
    }
}
