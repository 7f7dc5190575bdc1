//! CRUD operations for [`File`] registry records.

use rusqlite::{params, OptionalExtension, ToSql};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{File, FileUpdate, NewFile};

const FILE_COLUMNS: &str = "id, group_id, encrypt_keyid, encrypt_meta, encrypt_salt, \
                            encrypt_test, sync_version, name, deleted";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert the registry row for a first upload.
    pub fn insert_file(&self, file: &NewFile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO files (id, group_id, sync_version, name, encrypt_meta)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                file.id,
                file.group_id,
                file.sync_version,
                file.name,
                file.encrypt_meta,
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a live (not soft-deleted) file.
    pub fn get_file(&self, id: &str) -> Result<File> {
        match self.get_file_raw(id)? {
            Some(file) if !file.deleted => Ok(file),
            _ => Err(StoreError::NotFound),
        }
    }

    /// Fetch a file row whether or not it has been soft-deleted.
    pub fn get_file_raw(&self, id: &str) -> Result<Option<File>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1");
        let file = self
            .conn()
            .query_row(&sql, params![id], row_to_file)
            .optional()?;
        Ok(file)
    }

    /// List every file ordered by name. Soft-deleted rows are included
    /// with their flag set, so clients can tell them from unknown files.
    pub fn list_files(&self) -> Result<Vec<File>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files ORDER BY name ASC, id ASC");
        let mut stmt = self.conn().prepare(&sql)?;

        let rows = stmt.query_map([], row_to_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply a partial update in a single statement. Returns `true` if a
    /// row was changed.
    pub fn update_file(&self, id: &str, update: &FileUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }

        let mut assignments: Vec<&str> = Vec::new();
        let mut values: Vec<&dyn ToSql> = Vec::new();

        if let Some(group_id) = &update.group_id {
            assignments.push("group_id = ?");
            values.push(group_id);
        }
        if let Some(keyid) = &update.encrypt_keyid {
            assignments.push("encrypt_keyid = ?");
            values.push(keyid);
        }
        if let Some(meta) = &update.encrypt_meta {
            assignments.push("encrypt_meta = ?");
            values.push(meta);
        }
        if let Some(salt) = &update.encrypt_salt {
            assignments.push("encrypt_salt = ?");
            values.push(salt);
        }
        if let Some(test) = &update.encrypt_test {
            assignments.push("encrypt_test = ?");
            values.push(test);
        }
        if let Some(version) = &update.sync_version {
            assignments.push("sync_version = ?");
            values.push(version);
        }
        if let Some(name) = &update.name {
            assignments.push("name = ?");
            values.push(name);
        }
        if let Some(deleted) = &update.deleted {
            assignments.push("deleted = ?");
            values.push(deleted);
        }

        let sql = format!("UPDATE files SET {} WHERE id = ?", assignments.join(", "));
        values.push(&id);

        let affected = self.conn().execute(&sql, values.as_slice())?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`File`].
fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        group_id: row.get(1)?,
        encrypt_keyid: row.get(2)?,
        encrypt_meta: row.get(3)?,
        encrypt_salt: row.get(4)?,
        encrypt_test: row.get(5)?,
        sync_version: row.get(6)?,
        name: row.get(7)?,
        deleted: row.get(8)?,
    })
}
