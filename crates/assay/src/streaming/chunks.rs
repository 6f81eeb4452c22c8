//! Chunk enumeration and read-ahead for streaming promotion.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread::Scope;

use tracing::debug;

use crate::error::Result;
use crate::table::{RecordTable, TableReader, list_data_files};

/// One data file of a raw partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based position in name order.
    pub number: u64,
    pub path: PathBuf,
}

impl Chunk {
    /// Tag used in chunk-suffixed file names.
    pub fn tag(&self) -> String {
        format!("chunk-{:04}", self.number)
    }
}

/// List a partition's chunks in name order.
pub fn list_chunks(partition: &Path) -> Result<Vec<Chunk>> {
    Ok(list_data_files(partition)?
        .into_iter()
        .enumerate()
        .map(|(i, path)| Chunk {
            number: i as u64 + 1,
            path,
        })
        .collect())
}

/// A chunk and its decoded contents.
pub type LoadedChunk = (Chunk, Result<RecordTable>);

/// Start a reader thread that decodes `chunks` in order, staying at most
/// `window` chunks ahead of the consumer.
///
/// The thread stops early once the receiver is dropped.
pub fn prefetch<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    reader: &'env TableReader,
    chunks: Vec<Chunk>,
    window: usize,
) -> Receiver<LoadedChunk> {
    let (sender, receiver) = mpsc::sync_channel::<LoadedChunk>(window.max(1));
    scope.spawn(move || {
        for chunk in chunks {
            let table = reader.read_file(&chunk.path);
            debug!(chunk = %chunk.tag(), "chunk loaded");
            if sender.send((chunk, table)).is_err() {
                break;
            }
        }
    });
    receiver
}
