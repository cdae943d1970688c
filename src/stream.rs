//! Streaming Bundle Validator (§4.14): validates a Bundle's entries without
//! building one combined outcome, emitting results on a channel entry by
//! entry instead.
//!
//! `validate_stream` reads the whole bundle up front — this crate's only
//! JSON dependency, `serde_json`, has no incremental/SAX-style parser to
//! tokenize up to the `entry` field — then emits entries sequentially, in
//! order, from a background thread. The consumption side behaves like
//! streaming even though ingestion does not. `validate_stream_parallel`
//! shares that ingestion step but fans entries out across a worker pool and
//! re-serializes results back into ascending index order before emitting.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::issue::{ValidationIssue, ValidationOutcome};
use crate::validator::Validator;

const DEFAULT_WORKER_COUNT: usize = 4;

/// One Bundle entry's validation result (§4.14). `index == -1` marks a
/// header failure — the reader didn't hold a readable Bundle at all, so no
/// individual entry was ever reached.
#[derive(Debug, Clone, Serialize)]
pub struct EntryResult {
    pub index: i64,
    pub full_url: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub result: Option<ValidationOutcome>,
    pub error: Option<String>,
}

impl EntryResult {
    fn header_failure(message: impl Into<String>) -> Self {
        Self { index: -1, full_url: None, resource_type: None, resource_id: None, result: None, error: Some(message.into()) }
    }
}

fn read_bundle(reader: impl Read) -> Result<Vec<Value>, EntryResult> {
    let bundle: Value = serde_json::from_reader(reader).map_err(|e| {
        tracing::warn!(error = %e, "failed to parse bundle stream header");
        EntryResult::header_failure(format!("Invalid JSON: {e}"))
    })?;
    if bundle.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        tracing::warn!("bundle stream input is not a Bundle resource");
        return Err(EntryResult::header_failure("Expected a Bundle resource"));
    }
    let entries = bundle.get("entry").and_then(Value::as_array).cloned().unwrap_or_default();
    tracing::debug!(entry_count = entries.len(), "bundle stream header parsed");
    Ok(entries)
}

fn validate_entry(validator: &Validator, ctx: &CancellationToken, index: usize, entry: &Value) -> EntryResult {
    let full_url = entry.get("fullUrl").and_then(Value::as_str).map(str::to_string);
    let Some(resource) = entry.get("resource") else {
        return EntryResult { index: index as i64, full_url, resource_type: None, resource_id: None, result: None, error: Some("entry has no inline resource".to_string()) };
    };
    let resource_type = resource.get("resourceType").and_then(Value::as_str).map(str::to_string);
    let resource_id = resource.get("id").and_then(Value::as_str).map(str::to_string);
    let outcome = validator.validate_map(ctx, resource.clone());
    EntryResult { index: index as i64, full_url, resource_type, resource_id, result: Some(outcome), error: None }
}

/// `ValidateBundleStream(ctx, reader)` (§4.14, §5): entries are validated
/// and emitted one at a time, in order. The channel closes once every entry
/// has been emitted, or as soon as `ctx` is observed cancelled.
pub fn validate_stream(validator: Arc<Validator>, ctx: CancellationToken, reader: impl Read + Send + 'static) -> Receiver<EntryResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let entries = match read_bundle(reader) {
            Ok(entries) => entries,
            Err(failure) => {
                let _ = tx.send(failure);
                return;
            }
        };
        for (index, entry) in entries.iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }
            if tx.send(validate_entry(&validator, &ctx, index, entry)).is_err() {
                break;
            }
        }
    });
    rx
}

/// `ValidateBundleStreamParallel(ctx, reader)` (§4.14, §5): reads the whole
/// bundle on the calling thread, then fans entries out to `worker_count`
/// worker threads (`0` falls back to a default of 4, per §5's
/// `workerCount` option), and re-serializes the results into ascending
/// index order before emitting them on the channel.
pub fn validate_stream_parallel(validator: Arc<Validator>, ctx: CancellationToken, reader: impl Read, worker_count: usize) -> Receiver<EntryResult> {
    let (tx, rx) = mpsc::channel();
    let entries = match read_bundle(reader) {
        Ok(entries) => entries,
        Err(failure) => {
            let _ = tx.send(failure);
            return rx;
        }
    };
    let worker_count = if worker_count == 0 { DEFAULT_WORKER_COUNT } else { worker_count };

    thread::spawn(move || {
        let slots: Mutex<Vec<Option<EntryResult>>> = Mutex::new((0..entries.len()).map(|_| None).collect());
        let next = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..worker_count.min(entries.len().max(1)) {
                let slots = &slots;
                let next = &next;
                let entries = &entries;
                let validator = validator.as_ref();
                let ctx = &ctx;
                scope.spawn(move || loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= entries.len() || ctx.is_cancelled() {
                        break;
                    }
                    let result = validate_entry(validator, ctx, i, &entries[i]);
                    slots.lock().unwrap()[i] = Some(result);
                });
            }
        });

        for slot in slots.into_inner().unwrap().into_iter().flatten() {
            if ctx.is_cancelled() {
                break;
            }
            if tx.send(slot).is_err() {
                break;
            }
        }
    });
    rx
}

/// Folds an `EntryResult` stream into one summary (§4.14 "the aggregator").
/// Each `EntryResult`'s `result` is consumed (moved into `issues`) as it's
/// read, matching the spec's "releases each entry's pooled Result after
/// reading it".
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamAggregate {
    pub total_entries: usize,
    pub entries_with_errors: usize,
    pub entries_with_warnings: usize,
    pub total_issues: usize,
    pub processing_errors: Vec<String>,
    pub issues: BTreeMap<i64, Vec<ValidationIssue>>,
}

impl StreamAggregate {
    pub fn fold(results: Receiver<EntryResult>) -> Self {
        let mut agg = Self::default();
        for entry in results {
            agg.total_entries += 1;
            match (entry.result, entry.error) {
                (Some(outcome), _) => {
                    if outcome.has_errors() {
                        agg.entries_with_errors += 1;
                    }
                    if outcome.warning_count() > 0 {
                        agg.entries_with_warnings += 1;
                    }
                    agg.total_issues += outcome.issues.len();
                    if !outcome.issues.is_empty() {
                        agg.issues.insert(entry.index, outcome.issues);
                    }
                }
                (None, Some(error)) => agg.processing_errors.push(format!("entry {}: {error}", entry.index)),
                (None, None) => {}
            }
        }
        agg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Preset, ValidatorConfig};
    use crate::test_support::StaticProfileResolver;
    use std::io::Cursor;

    fn validator() -> Arc<Validator> {
        let resolver = Arc::new(StaticProfileResolver::from_sds(vec![]));
        Arc::new(Validator::new(ValidatorConfig::preset(Preset::Server), resolver).unwrap())
    }

    fn sample_bundle() -> Vec<u8> {
        serde_json::json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"fullUrl": "urn:uuid:1", "resource": {"resourceType": "Patient", "id": "a"}},
                {"fullUrl": "urn:uuid:2", "resource": {"resourceType": "Patient", "id": "has spaces"}},
            ]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn stream_emits_one_result_per_entry_in_order() {
        let rx = validate_stream(validator(), CancellationToken::new(), Cursor::new(sample_bundle()));
        let results: Vec<EntryResult> = rx.into_iter().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 0);
        assert_eq!(results[1].index, 1);
        assert_eq!(results[0].full_url.as_deref(), Some("urn:uuid:1"));
    }

    #[test]
    fn stream_reports_header_failure_for_non_bundle() {
        let body = serde_json::json!({"resourceType": "Patient"}).to_string();
        let rx = validate_stream(validator(), CancellationToken::new(), Cursor::new(body.into_bytes()));
        let results: Vec<EntryResult> = rx.into_iter().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, -1);
        assert!(results[0].error.is_some());
    }

    #[test]
    fn parallel_stream_preserves_ascending_index_order() {
        let rx = validate_stream_parallel(validator(), CancellationToken::new(), Cursor::new(sample_bundle()), 0);
        let results: Vec<EntryResult> = rx.into_iter().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn aggregate_folds_errors_and_processing_failures() {
        let rx = validate_stream(validator(), CancellationToken::new(), Cursor::new(sample_bundle()));
        let agg = StreamAggregate::fold(rx);
        assert_eq!(agg.total_entries, 2);
        assert!(agg.issues.contains_key(&1));
    }
}
