use crate::catalog::Catalog;
use crate::models::{Chapter, DownloadParams, Gallery, ImageRecord, ImageStatus};
use crate::paths::AppPaths;
use crate::Result;
use rusqlite::{params, Connection, OpenFlags, Row};
use std::time::Duration;

pub fn open(paths: &AppPaths) -> Result<Connection> {
    paths.ensure_dirs()?;

    let conn = Connection::open_with_flags(
        paths.catalog_db_path(),
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )?;

    conn.busy_timeout(Duration::from_secs(10))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gallery (
  id INTEGER PRIMARY KEY,
  url TEXT NOT NULL UNIQUE,
  title TEXT,
  cover_url TEXT,
  page_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS chapter (
  gallery_id INTEGER NOT NULL,
  ord INTEGER NOT NULL,
  url TEXT NOT NULL,
  title TEXT,
  PRIMARY KEY (gallery_id, ord),
  FOREIGN KEY (gallery_id) REFERENCES gallery(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS image (
  gallery_id INTEGER NOT NULL,
  ord INTEGER NOT NULL,
  is_cover INTEGER NOT NULL DEFAULT 0,
  url TEXT NOT NULL,
  status TEXT NOT NULL,
  chapter_url TEXT,
  backup_url TEXT,
  download_params_json TEXT,
  PRIMARY KEY (gallery_id, is_cover, ord),
  FOREIGN KEY (gallery_id) REFERENCES gallery(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_image_chapter ON image(gallery_id, chapter_url);
"#,
    )?;

    let current_schema_version = 1;
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(v) if v == current_schema_version.to_string() => {}
        _ => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                [current_schema_version.to_string()],
            )?;
        }
    }

    Ok(())
}

/// SQLite-backed catalog under `<base>/db/catalog.sqlite`.
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub fn open(paths: &AppPaths) -> Result<Self> {
        let conn = open(paths)?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn gallery(&self, gallery_id: i64) -> Result<Option<Gallery>> {
        let gallery = self
            .conn
            .query_row(
                "SELECT id, url, title, cover_url, page_count FROM gallery WHERE id=?1",
                [gallery_id],
                gallery_from_row,
            )
            .optional()?;
        Ok(gallery)
    }

    /// Returns the gallery stored for `url`, registering it first if needed.
    pub fn gallery_for_url(&self, url: &str) -> Result<Gallery> {
        self.conn.execute(
            "INSERT INTO gallery(url, page_count) VALUES(?1, 0) ON CONFLICT(url) DO NOTHING",
            [url],
        )?;
        let gallery = self.conn.query_row(
            "SELECT id, url, title, cover_url, page_count FROM gallery WHERE url=?1",
            [url],
            gallery_from_row,
        )?;
        Ok(gallery)
    }
}

impl Catalog for SqliteCatalog {
    fn stored_chapters(&self, gallery_id: i64) -> Result<Vec<Chapter>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ord, url, title FROM chapter WHERE gallery_id=?1 ORDER BY ord")?;
        let rows = stmt.query_map([gallery_id], |row| {
            Ok(Chapter {
                gallery_id,
                order: row.get(0)?,
                url: row.get(1)?,
                title: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn stored_images(&self, gallery_id: i64) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT ord, is_cover, url, status, chapter_url, backup_url, download_params_json
             FROM image WHERE gallery_id=?1 ORDER BY ord, is_cover DESC",
        )?;
        let mut rows = stmt.query([gallery_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let order: u32 = row.get(0)?;
            let status: String = row.get(3)?;
            let params_json: Option<String> = row.get(6)?;
            let download_params = match params_json {
                Some(json) => Some(serde_json::from_str::<DownloadParams>(&json)?),
                None => None,
            };
            out.push(ImageRecord {
                order,
                is_cover: row.get::<_, i64>(1)? != 0,
                url: row.get(2)?,
                status: image_status_from_column(gallery_id, order, &status),
                chapter_url: row.get(4)?,
                backup_url: row.get(5)?,
                download_params,
            });
        }
        Ok(out)
    }

    fn append_resolved(
        &mut self,
        gallery_id: i64,
        chapters: &[Chapter],
        images: &[ImageRecord],
    ) -> Result<()> {
        if chapters.is_empty() && images.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut insert_chapter = tx.prepare(
                "INSERT INTO chapter(gallery_id, ord, url, title) VALUES(?1, ?2, ?3, ?4)",
            )?;
            for chapter in chapters {
                insert_chapter.execute(params![
                    gallery_id,
                    chapter.order,
                    chapter.url,
                    chapter.title
                ])?;
            }

            let mut insert_image = tx.prepare(
                "INSERT INTO image(gallery_id, ord, is_cover, url, status, chapter_url, backup_url, download_params_json)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for image in images {
                let params_json = match &image.download_params {
                    Some(p) => Some(serde_json::to_string(p)?),
                    None => None,
                };
                insert_image.execute(params![
                    gallery_id,
                    image.order,
                    image.is_cover as i64,
                    image.url,
                    image.status.as_str(),
                    image.chapter_url,
                    image.backup_url,
                    params_json
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update_gallery(&mut self, gallery: &Gallery) -> Result<()> {
        self.conn.execute(
            "INSERT INTO gallery(id, url, title, cover_url, page_count) VALUES(?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               url=excluded.url,
               title=excluded.title,
               cover_url=excluded.cover_url,
               page_count=excluded.page_count",
            params![
                gallery.id,
                gallery.url,
                gallery.title,
                gallery.cover_url,
                gallery.page_count
            ],
        )?;
        Ok(())
    }
}

fn gallery_from_row(row: &Row<'_>) -> rusqlite::Result<Gallery> {
    Ok(Gallery {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        cover_url: row.get(3)?,
        page_count: row.get(4)?,
    })
}

trait OptionalRowExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalRowExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Unknown values are reported and read back as `error`, so the page is
/// offered for download again.
fn image_status_from_column(gallery_id: i64, order: u32, raw: &str) -> ImageStatus {
    match ImageStatus::from_str(raw) {
        Some(status) => status,
        None => {
            tracing::warn!(gallery_id, order, status = %raw, "catalog_unknown_image_status");
            ImageStatus::Error
        }
    }
}
