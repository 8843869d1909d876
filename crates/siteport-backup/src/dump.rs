//! Serializes a structured store into a replayable statement script.
//!
//! Script layout: a comment header, then per table a structure comment,
//! `DROP TABLE IF EXISTS`, the table definition, one `INSERT` per row and
//! finally the table's secondary objects. Every statement ends with `;` at
//! the end of its last line, which is what the loader splits on.
//!
//! Tables and rows come out in the store's native order. No snapshot is
//! taken, so writes landing during a dump can produce a script that is
//! inconsistent across tables.

use crate::error::{Error, Result};
use crate::manifest::ENGINE_VERSION;
use crate::progress::{percent_of, Checkpoint, NoCheckpoint};
use crate::store::StructuredStore;
use std::collections::BTreeSet;
use std::io::Write;
use tracing::debug;

/// What a dump wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub tables: usize,
    pub rows: u64,
    pub bytes: u64,
}

struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    bytes: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Writes the dump script of every table not in `exclude_tables` to `out`.
///
/// Reports one checkpoint per table.
pub fn dump(
    store: &dyn StructuredStore,
    exclude_tables: &BTreeSet<String>,
    out: &mut dyn Write,
    checkpoint: &mut dyn Checkpoint,
) -> Result<DumpStats> {
    let tables: Vec<String> = store
        .tables()?
        .into_iter()
        .filter(|t| !exclude_tables.contains(t))
        .collect();

    let mut w = CountingWriter {
        inner: out,
        bytes: 0,
    };
    let mut stats = DumpStats::default();
    let write_err = |e: std::io::Error| Error::io("Failed to write dump script", e);

    writeln!(w, "-- Siteport structured dump").map_err(write_err)?;
    writeln!(w, "-- Engine version: {}", ENGINE_VERSION).map_err(write_err)?;
    writeln!(w, "-- Store platform version: {}", store.platform_version()).map_err(write_err)?;
    writeln!(w, "-- Generated: {}", chrono::Utc::now().to_rfc3339()).map_err(write_err)?;
    writeln!(w, "-- Tables: {}", tables.len()).map_err(write_err)?;

    for (index, table) in tables.iter().enumerate() {
        checkpoint.reached(
            percent_of(index as u64, tables.len() as u64),
            &format!("Dumping table {}", table),
        )?;

        let quoted = store.quote_identifier(table);
        let definition = store.table_definition(table)?;

        writeln!(w).map_err(write_err)?;
        writeln!(w, "-- Table structure for {}", quoted).map_err(write_err)?;
        writeln!(w, "DROP TABLE IF EXISTS {};", quoted).map_err(write_err)?;
        writeln!(w, "{};", single_line(&definition)).map_err(write_err)?;
        writeln!(w).map_err(write_err)?;
        writeln!(w, "-- Data for {}", quoted).map_err(write_err)?;

        let rows = store.for_each_row(table, &mut |values| {
            let literals: Vec<String> = values.iter().map(|v| store.render_literal(v)).collect();
            writeln!(w, "INSERT INTO {} VALUES({});", quoted, literals.join(","))
                .map_err(write_err)
        })?;

        for extra in store.table_extras(table)? {
            writeln!(w, "{};", single_line(&extra)).map_err(write_err)?;
        }

        debug!("Dumped table {} ({} rows)", table, rows);
        stats.tables += 1;
        stats.rows += rows;
    }

    checkpoint.reached(100, &format!("Dumped {} tables", stats.tables))?;
    w.flush().map_err(write_err)?;
    stats.bytes = w.bytes;
    Ok(stats)
}

/// Folds a schema statement onto one line without its trailing `;`.
///
/// Whitespace runs outside quoted regions collapse to one space and `--`
/// comments are dropped, so the inner `;` of a trigger body never lands at
/// a line end. Quoted text is kept byte for byte.
fn single_line(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    while chars.next_if(|&n| n != '\n').is_some() {}
                    push_space(&mut out);
                }
                c if c.is_whitespace() => push_space(&mut out),
                _ => out.push(c),
            },
        }
    }

    out.trim().trim_end_matches(';').trim_end().to_string()
}

fn push_space(out: &mut String) {
    if !out.ends_with(' ') {
        out.push(' ');
    }
}

/// Dumps into memory; convenient for small stores and tests.
pub fn dump_to_string(
    store: &dyn StructuredStore,
    exclude_tables: &BTreeSet<String>,
) -> Result<String> {
    let mut buf = Vec::new();
    dump(store, exclude_tables, &mut buf, &mut NoCheckpoint)?;
    String::from_utf8(buf).map_err(|e| Error::fatal(format!("dump is not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn seeded() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .execute(
                "CREATE TABLE options (id INTEGER PRIMARY KEY, name TEXT, value TEXT);
                 CREATE INDEX options_name ON options (name);
                 INSERT INTO options VALUES (1, 'siteurl', 'http://old.example');
                 INSERT INTO options VALUES (2, 'motto', 'it''s
multi-line;');
                 INSERT INTO options VALUES (3, 'empty', NULL);
                 CREATE TABLE logs (id INTEGER PRIMARY KEY, line TEXT);
                 INSERT INTO logs VALUES (1, 'noise');",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_dump_layout() {
        let store = seeded();
        let script = dump_to_string(&store, &BTreeSet::new()).unwrap();

        assert!(script.starts_with("-- Siteport structured dump\n"));
        assert!(script.contains("DROP TABLE IF EXISTS \"options\";\n"));
        assert!(script.contains("CREATE TABLE options (id INTEGER PRIMARY KEY, name TEXT, value TEXT);\n"));
        assert!(script.contains("INSERT INTO \"options\" VALUES(1,'siteurl','http://old.example');\n"));
        assert!(script.contains("INSERT INTO \"options\" VALUES(3,'empty',NULL);\n"));
        assert!(script.contains("'it''s\nmulti-line;'"));
        assert!(script.contains("CREATE INDEX options_name ON options (name);\n"));

        let drop_pos = script.find("DROP TABLE IF EXISTS \"options\"").unwrap();
        let create_pos = script.find("CREATE TABLE options").unwrap();
        let insert_pos = script.find("INSERT INTO \"options\"").unwrap();
        assert!(drop_pos < create_pos && create_pos < insert_pos);
    }

    #[test]
    fn test_dump_excludes_tables() {
        let store = seeded();
        let exclude: BTreeSet<String> = ["logs".to_string()].into_iter().collect();
        let script = dump_to_string(&store, &exclude).unwrap();
        assert!(!script.contains("\"logs\""));
        assert!(script.contains("\"options\""));
    }

    #[test]
    fn test_dump_stats_and_checkpoints() {
        struct Recorder(Vec<String>);
        impl Checkpoint for Recorder {
            fn reached(&mut self, _percent: u8, detail: &str) -> Result<()> {
                self.0.push(detail.to_string());
                Ok(())
            }
        }

        let store = seeded();
        let mut out = Vec::new();
        let mut recorder = Recorder(Vec::new());
        let stats = dump(&store, &BTreeSet::new(), &mut out, &mut recorder).unwrap();

        assert_eq!(stats.tables, 2);
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.bytes, out.len() as u64);
        assert_eq!(
            recorder.0,
            vec!["Dumping table options", "Dumping table logs", "Dumped 2 tables"]
        );
    }

    #[test]
    fn test_cancelled_checkpoint_stops_dump() {
        struct Cancel;
        impl Checkpoint for Cancel {
            fn reached(&mut self, _percent: u8, _detail: &str) -> Result<()> {
                Err(Error::Cancelled)
            }
        }

        let store = seeded();
        let err = dump(&store, &BTreeSet::new(), &mut Vec::new(), &mut Cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_single_line_keeps_quoted_text() {
        let sql = "CREATE TABLE t (\n  a TEXT DEFAULT 'x\ny', -- note\n  \"b--c\" INTEGER\n);";
        assert_eq!(
            single_line(sql),
            "CREATE TABLE t ( a TEXT DEFAULT 'x\ny', \"b--c\" INTEGER )"
        );
    }

    #[test]
    fn test_trigger_survives_replay() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .execute(
                "CREATE TABLE a (id INTEGER);
                 CREATE TABLE log (id INTEGER);
                 CREATE TRIGGER a_ins AFTER INSERT ON a BEGIN
                   INSERT INTO log VALUES (new.id);
                 END;
                 INSERT INTO a VALUES (1);",
            )
            .unwrap();
        let script = dump_to_string(&store, &BTreeSet::new()).unwrap();
        assert!(script.contains("INSERT INTO log VALUES (new.id); END;\n"));

        let mut copy = SqliteStore::open_in_memory().unwrap();
        let summary = crate::load::replay(&mut copy, &script).unwrap();
        assert_eq!(summary.failed, 0, "{:?}", summary.errors);

        let count = |store: &SqliteStore, table: &str| {
            let mut rows = 0;
            store
                .for_each_row(table, &mut |_| {
                    rows += 1;
                    Ok(())
                })
                .unwrap();
            rows
        };
        assert_eq!(count(&copy, "a"), 1);
        assert_eq!(count(&copy, "log"), 1);

        copy.execute("INSERT INTO a VALUES (2)").unwrap();
        assert_eq!(count(&copy, "log"), 2);
    }
}
