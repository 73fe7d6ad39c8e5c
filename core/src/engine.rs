use std::ops::Bound;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::Tree;

use crate::emit::{EmitOutput, Emitter};
use crate::store::{IndexRow, QueryOptions, QueryResult, SearchStore, Stale};

const DOCS_TREE: &str = "docs";
const CHANGES_TREE: &str = "changes";
const LAST_SEQ_KEY: &[u8] = b"last_seq";

/// Separator between the emitted key, the document id, and the emission
/// ordinal inside a storage key. Emitted keys and document ids must not
/// contain NUL bytes.
const KEY_SEP: u8 = 0;

type ErrorSink = Box<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

/// Reference implementation of the store boundary: a sled-backed document
/// store plus an incremental map-reduce engine. Each persisted index lives
/// in its own trees, named by the index identity, and is brought up to date
/// by replaying the document change log since the index's last seen
/// sequence. A changed document's previous rows are removed wholesale
/// before its fresh emission is inserted.
pub struct SledEngine {
    db: sled::Db,
    docs: Tree,
    changes: Tree,
    error_sink: Option<ErrorSink>,
}

#[derive(Serialize, Deserialize)]
struct StoredDoc {
    seq: u64,
    body: Vec<u8>,
}

impl SledEngine {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let docs = db.open_tree(DOCS_TREE)?;
        let changes = db.open_tree(CHANGES_TREE)?;
        Ok(Self {
            db,
            docs,
            changes,
            error_sink: None,
        })
    }

    /// Route reported errors to `sink` in addition to the log.
    pub fn with_error_sink(
        mut self,
        sink: impl Fn(&str, &anyhow::Error) + Send + Sync + 'static,
    ) -> Self {
        self.error_sink = Some(Box::new(sink));
        self
    }

    /// Insert or replace a document and record the change.
    pub fn put_doc(&self, id: &str, doc: &Value) -> Result<()> {
        let seq = self.db.generate_id()?;
        let stored = StoredDoc {
            seq,
            body: serde_json::to_vec(doc)?,
        };
        self.docs.insert(id.as_bytes(), bincode::serialize(&stored)?)?;
        self.changes.insert(seq.to_be_bytes(), id.as_bytes())?;
        Ok(())
    }

    /// Remove a document. The change record retires its index rows on the
    /// next sync.
    pub fn delete_doc(&self, id: &str) -> Result<()> {
        if self.docs.remove(id.as_bytes())?.is_some() {
            let seq = self.db.generate_id()?;
            self.changes.insert(seq.to_be_bytes(), id.as_bytes())?;
        }
        Ok(())
    }

    fn rows_tree(&self, index: &str) -> Result<Tree> {
        Ok(self.db.open_tree(format!("idx/{index}/rows"))?)
    }

    fn doc_keys_tree(&self, index: &str) -> Result<Tree> {
        Ok(self.db.open_tree(format!("idx/{index}/doc_keys"))?)
    }

    fn meta_tree(&self, index: &str) -> Result<Tree> {
        Ok(self.db.open_tree(format!("idx/{index}/meta"))?)
    }

    fn drop_index(&self, index: &str) -> Result<()> {
        self.db.drop_tree(format!("idx/{index}/rows"))?;
        self.db.drop_tree(format!("idx/{index}/doc_keys"))?;
        self.db.drop_tree(format!("idx/{index}/meta"))?;
        tracing::info!(index, "persisted index destroyed");
        Ok(())
    }

    /// Replay the change log since the index's last seen sequence, replacing
    /// each changed document's rows with its fresh emission.
    fn sync_index(&self, index: &str, emitter: &Emitter) -> Result<()> {
        let rows = self.rows_tree(index)?;
        let doc_keys = self.doc_keys_tree(index)?;
        let meta = self.meta_tree(index)?;

        let last_seq = match meta.get(LAST_SEQ_KEY)? {
            Some(bytes) => decode_seq(&bytes)?,
            None => 0,
        };
        let mut new_last = last_seq;
        let mut replayed = 0usize;

        let range = (Bound::Excluded(last_seq.to_be_bytes().to_vec()), Bound::Unbounded);
        for entry in self.changes.range::<Vec<u8>, _>(range) {
            let (seq_bytes, id_bytes) = entry?;
            let seq = decode_seq(&seq_bytes)?;
            let id = String::from_utf8(id_bytes.to_vec()).context("document id is not utf-8")?;

            if let Some(old) = doc_keys.remove(id.as_bytes())? {
                let old_keys: Vec<Vec<u8>> = bincode::deserialize(&old)?;
                for key in old_keys {
                    rows.remove(key)?;
                }
            }

            if let Some(stored) = self.docs.get(id.as_bytes())? {
                let stored: StoredDoc = bincode::deserialize(&stored)?;
                let doc: Value = serde_json::from_slice(&stored.body)?;
                match emitter.emit(&id, &doc) {
                    EmitOutput::Rows(emitted) => {
                        let mut storage_keys = Vec::with_capacity(emitted.len());
                        for (ordinal, row) in emitted.iter().enumerate() {
                            let storage_key = encode_storage_key(&row.key, &id, ordinal);
                            rows.insert(storage_key.as_slice(), serde_json::to_vec(&row.value)?)?;
                            storage_keys.push(storage_key);
                        }
                        doc_keys.insert(id.as_bytes(), bincode::serialize(&storage_keys)?)?;
                    }
                    EmitOutput::Filtered => {}
                    EmitOutput::FilterError(error) => {
                        self.report_error(&format!("filter predicate failed for document {id}"), &error);
                    }
                }
            }

            new_last = seq;
            replayed += 1;
        }

        if new_last != last_seq {
            meta.insert(LAST_SEQ_KEY, new_last.to_be_bytes().to_vec())?;
        }
        tracing::debug!(index, replayed, "index sync complete");
        Ok(())
    }

    fn read_rows(&self, index: &str, opts: &QueryOptions) -> Result<Vec<IndexRow>> {
        let rows = self.rows_tree(index)?;
        let mut out = Vec::new();

        match &opts.keys {
            Some(keys) => {
                for key in keys {
                    let mut prefix = key.as_bytes().to_vec();
                    prefix.push(KEY_SEP);
                    for entry in rows.scan_prefix(&prefix) {
                        let (storage_key, value) = entry?;
                        out.push(decode_row(&storage_key, &value)?);
                    }
                }
            }
            None => {
                for entry in rows.iter() {
                    let (storage_key, value) = entry?;
                    out.push(decode_row(&storage_key, &value)?);
                }
            }
        }

        if let Some(limit) = opts.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

impl SearchStore for SledEngine {
    async fn query(&self, emitter: &Emitter, opts: QueryOptions) -> Result<QueryResult> {
        if opts.destroy {
            self.drop_index(&opts.save_as)?;
            return Ok(QueryResult::default());
        }
        match opts.stale {
            Some(Stale::Ok) => {}
            Some(Stale::UpdateAfter) => {
                let rows = self.read_rows(&opts.save_as, &opts)?;
                self.sync_index(&opts.save_as, emitter)?;
                return Ok(QueryResult { rows });
            }
            None => self.sync_index(&opts.save_as, emitter)?,
        }
        let rows = self.read_rows(&opts.save_as, &opts)?;
        Ok(QueryResult { rows })
    }

    async fn get_doc(&self, id: &str) -> Result<Value> {
        let Some(stored) = self.docs.get(id.as_bytes())? else {
            bail!("document not found: {id}");
        };
        let stored: StoredDoc = bincode::deserialize(&stored)?;
        Ok(serde_json::from_slice(&stored.body)?)
    }

    fn report_error(&self, context: &str, error: &anyhow::Error) {
        tracing::error!(context, %error, "indexing error reported");
        if let Some(sink) = &self.error_sink {
            sink(context, error);
        }
    }
}

fn encode_storage_key(key: &str, doc_id: &str, ordinal: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + doc_id.len() + 10);
    out.extend_from_slice(key.as_bytes());
    out.push(KEY_SEP);
    out.extend_from_slice(doc_id.as_bytes());
    out.push(KEY_SEP);
    out.extend_from_slice(&(ordinal as u32).to_be_bytes());
    out
}

fn decode_row(storage_key: &[u8], value: &[u8]) -> Result<IndexRow> {
    let mut parts = storage_key.splitn(3, |&b| b == KEY_SEP);
    let (Some(key), Some(id)) = (parts.next(), parts.next()) else {
        bail!("malformed index storage key");
    };
    Ok(IndexRow {
        id: String::from_utf8(id.to_vec()).context("document id is not utf-8")?,
        key: String::from_utf8(key.to_vec()).context("index key is not utf-8")?,
        value: serde_json::from_slice(value)?,
    })
}

fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .context("change sequence is not 8 bytes")?;
    Ok(u64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_round_trip() {
        let storage_key = encode_storage_key("acat", "doc-1", 3);
        let row = decode_row(&storage_key, b"null").unwrap();
        assert_eq!(row.key, "acat");
        assert_eq!(row.id, "doc-1");
        assert!(row.value.is_null());
    }

    #[test]
    fn storage_keys_sort_by_emitted_key() {
        let a = encode_storage_key("aant", "z", 0);
        let b = encode_storage_key("azebra", "a", 0);
        assert!(a < b);
    }
}
