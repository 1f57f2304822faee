//! Read path.

use crate::error::{EmberError, Result};

use super::inner::DbInner;

impl DbInner {
    /// Look up a key and read its value.
    ///
    /// The compactor may retire the file between the index lookup and the
    /// read; that race is resolved by looking the key up again. During
    /// shutdown the same condition is reported as `EngineClosing`.
    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut missing_file = None;

        loop {
            self.ensure_open()?;

            let meta = match self.index.get(key) {
                Some(meta) => meta,
                None => return Ok(None),
            };

            let file = match self.data_file(meta.file_id) {
                Some(file) => file,
                None => {
                    if self.is_closing() {
                        return Err(EmberError::EngineClosing);
                    }
                    if missing_file == Some(meta) {
                        return Err(EmberError::Corrupt(format!(
                            "index points at missing data file {}",
                            meta.file_id
                        )));
                    }
                    tracing::trace!(file_id = meta.file_id, "data file retired during read, retrying");
                    missing_file = Some(meta);
                    continue;
                }
            };

            return file
                .read_at(meta.value_offset as u64, meta.value_size as usize)
                .map(Some)
                .map_err(|e| self.fatal(e));
        }
    }
}
