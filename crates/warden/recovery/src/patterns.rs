//! Learned recovery patterns.
//!
//! Keyed by root-cause signature. Updates to one signature are serialized
//! through the map's entry lock; different signatures update independently.
//! The store persists as JSON Lines, one [`Pattern`] per line.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use warden_types::{Pattern, RecoveryPlan, Signature};

use crate::error::{RecoveryError, RecoveryResult};

/// Concurrent map from signature to learned pattern.
pub struct PatternStore {
    patterns: DashMap<Signature, Pattern>,
    decay: f64,
    replace_below: f64,
}

impl PatternStore {
    /// Create an empty store. `replace_below` is the success rate under
    /// which a stored plan gives way to a different plan that just worked.
    pub fn new(decay: f64, replace_below: f64) -> Self {
        Self {
            patterns: DashMap::new(),
            decay,
            replace_below,
        }
    }

    pub fn lookup(&self, signature: &Signature) -> Option<Pattern> {
        self.patterns.get(signature).map(|p| p.clone())
    }

    /// Record the outcome of `plan` for `signature` and return the updated
    /// pattern, if the outcome was recorded.
    ///
    /// A failure of a plan other than the stored one is ignored. A success
    /// of a different plan replaces the stored one once the stored plan's
    /// rate has fallen below the replacement floor.
    pub fn record_outcome(
        &self,
        signature: &Signature,
        plan: &RecoveryPlan,
        success: bool,
    ) -> Option<Pattern> {
        let now = Utc::now();
        let mut entry = self
            .patterns
            .entry(signature.clone())
            .or_insert_with(|| Pattern::new(signature.clone(), plan, now));

        if entry.plan_id != plan.plan_id {
            if !success || entry.success_rate() >= self.replace_below {
                debug!(
                    signature = %signature,
                    stored = %entry.plan_id,
                    tried = %plan.plan_id,
                    success,
                    "Outcome of a different plan not recorded"
                );
                return None;
            }

            info!(
                signature = %signature,
                replaced = %entry.plan_id,
                plan_id = %plan.plan_id,
                "Replacing underperforming pattern"
            );
            *entry = Pattern::new(signature.clone(), plan, now);
        }

        entry.record(success, self.decay, now);
        Some(entry.clone())
    }

    /// All patterns ordered by signature.
    pub fn list(&self) -> Vec<Pattern> {
        let mut all: Vec<Pattern> = self.patterns.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| a.signature.cmp(&b.signature));
        all
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Load patterns from JSON Lines. Blank lines are skipped.
    pub fn read_from<R: Read>(&self, reader: R) -> RecoveryResult<usize> {
        let mut loaded = 0;

        for (index, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let mut pattern: Pattern =
                serde_json::from_str(&line).map_err(|e| RecoveryError::PatternFormat {
                    line: index + 1,
                    reason: e.to_string(),
                })?;
            pattern.normalize();
            self.patterns.insert(pattern.signature.clone(), pattern);
            loaded += 1;
        }

        Ok(loaded)
    }

    /// Write all patterns as JSON Lines, ordered by signature.
    pub fn write_to<W: Write>(&self, mut writer: W) -> RecoveryResult<()> {
        for pattern in self.list() {
            let line = serde_json::to_string(&pattern)
                .map_err(|e| RecoveryError::Internal(format!("pattern encode: {}", e)))?;
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load from `path`. A missing file is an empty store.
    pub fn load(&self, path: &Path) -> RecoveryResult<usize> {
        match fs::File::open(path) {
            Ok(file) => {
                let loaded = self.read_from(file)?;
                info!(path = %path.display(), patterns = loaded, "Loaded recovery patterns");
                Ok(loaded)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No pattern file yet, starting empty");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write to `path` through a temporary file and rename, so a crash never
    /// leaves a truncated store behind.
    pub fn save(&self, path: &Path) -> RecoveryResult<()> {
        let tmp = path.with_extension("jsonl.tmp");

        {
            let file = fs::File::create(&tmp)?;
            let mut writer = std::io::BufWriter::new(file);
            self.write_to(&mut writer)?;
            writer.get_ref().sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp, path) {
            warn!(path = %path.display(), error = %e, "Failed to replace pattern file");
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(path = %path.display(), patterns = self.len(), "Flushed recovery patterns");
        Ok(())
    }
}
