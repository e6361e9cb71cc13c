//! Subject catalog.

use super::Database;
use crate::import::subjects::CANONICAL_SUBJECTS;
use crate::types::Subject;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};

impl Database {
    pub fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM subjects ORDER BY id")?;
            let subjects = stmt
                .query_map([], |row| {
                    Ok(Subject {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(subjects)
        })
    }

    /// Insert a subject, or return the existing row with the same name.
    pub fn add_subject(&self, name: &str) -> Result<Subject> {
        let name = name.trim();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO subjects (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
                params![name],
            )?;
            let subject = conn.query_row(
                "SELECT id, name FROM subjects WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Subject {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )?;
            Ok(subject)
        })
    }

    /// Make sure every canonical subject exists. Returns how many were inserted.
    pub fn seed_subjects(&self) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            for (name, _) in CANONICAL_SUBJECTS {
                inserted += tx.execute(
                    "INSERT INTO subjects (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
                    params![name],
                )?;
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    /// Case-insensitive lookup by name.
    ///
    /// Compared with Unicode lowercasing in Rust; SQLite's `lower()` only
    /// folds ASCII.
    pub fn find_subject_by_name(&self, name: &str) -> Result<Option<Subject>> {
        let wanted = name.trim().to_lowercase();
        // exact hit first, the common case for canonical names
        let exact = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, name FROM subjects WHERE name = ?1",
                    params![name.trim()],
                    |row| {
                        Ok(Subject {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    },
                )
                .optional()?)
        })?;
        if exact.is_some() {
            return Ok(exact);
        }

        Ok(self
            .list_subjects()?
            .into_iter()
            .find(|s| s.name.to_lowercase() == wanted))
    }
}
