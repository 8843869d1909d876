//! Common test utilities for siteport-backup
//!
//! Provides a throwaway site (config, SQLite store, content directory) in a
//! temporary directory, seeded the same way for every integration test.

#![allow(dead_code)]
#![allow(unused_imports)]

use camino::Utf8PathBuf;
use siteport_backup::{
    JobEngine, JobState, JobStatus, SiteContext, SqliteStore, StructuredStore,
};
use siteport_core::SiteportConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const OLD_URL: &str = "http://old.example";
pub const NEW_URL: &str = "https://new.example";
pub const POLL: Duration = Duration::from_millis(10);

/// Three tables holding plain, serialized and escaped forms of the site URL
pub const SEED_SQL: &str = r#"
CREATE TABLE options (option_id INTEGER PRIMARY KEY, option_name TEXT NOT NULL, option_value TEXT);
CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT, content TEXT, guid TEXT);
CREATE TABLE postmeta (meta_id INTEGER PRIMARY KEY, post_id INTEGER, meta_key TEXT, meta_value TEXT);
INSERT INTO options VALUES (1, 'siteurl', 'http://old.example');
INSERT INTO options VALUES (2, 'home', 'http://old.example');
INSERT INTO options VALUES (3, 'widget', 'a:1:{s:3:"url";s:25:"http://old.example/widget";}');
INSERT INTO options VALUES (4, 'tagline', 'It''s a site');
INSERT INTO posts VALUES (1, 'Hello', '<a href="http://old.example/hello">Hi</a>', 'http://old.example/?p=1');
INSERT INTO postmeta VALUES (1, 1, '_link', 's:23:"http://old.example/page";');
INSERT INTO postmeta VALUES (2, 1, '_json', '{"url":"http:\/\/old.example\/x"}');
INSERT INTO postmeta VALUES (3, 1, '_empty', NULL);
"#;

/// A site living in a temporary directory
pub struct TestSite {
    pub temp: TempDir,
    pub context: Arc<SiteContext>,
}

impl TestSite {
    pub fn new(name: &str, base_url: &str) -> Self {
        Self::with_jobs_yaml(name, base_url, "")
    }

    /// Site whose configuration carries an extra `jobs:` section body
    pub fn with_jobs_yaml(name: &str, base_url: &str, jobs: &str) -> Self {
        siteport_core::init_tracing(0, true);
        let temp = TempDir::new().unwrap();
        let mut yaml = format!(
            "site:\n  name: \"{}\"\n  base_url: \"{}\"\n  content_dir: content\n  platform_version: \"6.4.2\"\nstore:\n  path: site.db\nstorage:\n  archive_dir: backups\n",
            name, base_url
        );
        if !jobs.is_empty() {
            yaml.push_str("jobs:\n");
            yaml.push_str(jobs);
        }
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let config = SiteportConfig::from_yaml_str(&yaml, root).unwrap();
        let context = Arc::new(SiteContext::from_config(config).unwrap());
        Self { temp, context }
    }

    /// The exporting side: seeded store and two uploads
    pub fn origin() -> Self {
        let site = Self::new("Old Site", OLD_URL);
        site.seed_store();
        site.seed_uploads();
        site
    }

    /// The importing side: empty store, empty content directory
    pub fn destination() -> Self {
        Self::new("New Site", NEW_URL)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn content_dir(&self) -> PathBuf {
        self.context.content_dir()
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.context.archive_dir()
    }

    pub fn store(&self) -> SqliteStore {
        SqliteStore::open(self.context.config().store_path().as_std_path()).unwrap()
    }

    pub fn seed_store(&self) {
        self.store().execute(SEED_SQL).unwrap();
    }

    pub fn seed_uploads(&self) {
        self.write_content("uploads/2024/01/photo.jpg", b"\xFF\xD8\xFFjpeg-bytes");
        self.write_content("uploads/readme.txt", b"uploaded notes");
    }

    pub fn seed_themes(&self) {
        self.write_content("themes/classic/style.css", b"body { color: black; }");
        self.write_content("themes/retired/style.css", b"body { color: red; }");
    }

    pub fn write_content(&self, rel: &str, bytes: &[u8]) {
        let path = self.content_dir().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    pub fn engine(&self) -> JobEngine {
        JobEngine::new(Arc::clone(&self.context))
    }
}

/// Reads one text column from the site's store
pub fn query_text(store: &SqliteStore, sql: &str) -> Option<String> {
    store
        .connection()
        .query_row(sql, [], |row| row.get::<_, Option<String>>(0))
        .unwrap()
}

pub fn count_rows(store: &SqliteStore, table: &str) -> i64 {
    store
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .unwrap()
}

/// Waits for a terminal status, failing the test after ten seconds
pub async fn wait_terminal(engine: &JobEngine, id: &str) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), engine.wait(id, POLL))
        .await
        .expect("job did not finish in time")
        .unwrap()
        .expect("job status expired")
}

/// Polls until the job reports `state`
pub async fn wait_for_state(engine: &JobEngine, id: &str, state: JobState) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(status) = engine.status(id).unwrap() {
                if status.status == state {
                    return status;
                }
            }
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("job never reached the expected state")
}

/// Runs an export on `site` and returns the archive path
pub async fn export_archive(site: &TestSite) -> PathBuf {
    let engine = site.engine();
    let id = engine
        .start_export(siteport_backup::ExportOptions::default())
        .unwrap();
    let status = wait_terminal(&engine, &id).await;
    assert_eq!(status.status, JobState::Completed, "{}", status.message);
    status.result.unwrap().as_export().unwrap().path.clone()
}
