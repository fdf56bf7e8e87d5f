//! User-drawn label rectangles, their JSON document form, and the
//! single-flight save slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::dataset::CellRect;
use crate::error::{HeatmapError, Result};
use crate::persist::LabelTransport;

/// A labeled region in matrix indices (inclusive). `intensity_matrix` is
/// only ever filled in by the persistence service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
    #[serde(default)]
    pub annotation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity_matrix: Option<Vec<Vec<f64>>>,
    /// Fields this crate does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Label {
    pub fn new(id: impl Into<String>, bounds: CellRect, annotation: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_row: bounds.start_row,
            end_row: bounds.end_row,
            start_col: bounds.start_col,
            end_col: bounds.end_col,
            annotation: annotation.into(),
            intensity_matrix: None,
            extra: Map::new(),
        }
    }

    pub fn bounds(&self) -> CellRect {
        CellRect {
            start_row: self.start_row,
            end_row: self.end_row,
            start_col: self.start_col,
            end_col: self.end_col,
        }
    }

    /// Older documents carry the annotation as `text`.
    fn adopt_text_field(&mut self) {
        if !self.annotation.is_empty() {
            return;
        }
        if let Some(Value::String(text)) = self.extra.remove("text") {
            self.annotation = text;
        }
    }
}

/// The `data` part of a saved document: labels plus pass-through fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LabelData {
    pub labels: Vec<Label>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LabelData {
    pub fn from_value(value: Value) -> Result<LabelData> {
        let mut data: LabelData = serde_json::from_value(value)?;
        for label in &mut data.labels {
            label.adopt_text_field();
        }
        Ok(data)
    }
}

/// Body of `POST /save-label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDocument {
    pub file_name: String,
    pub data: LabelData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub file_name: String,
    pub status: u16,
    pub message: String,
    pub label_count: usize,
}

/// Session-scoped label collection.
#[derive(Debug, Default)]
pub struct LabelStore {
    labels: Vec<Label>,
    next_id: u64,
    file_name: Option<String>,
    save_slot: Arc<AtomicBool>,
}

impl LabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label with a fresh id. Overlaps with existing labels are allowed.
    pub fn add_label(&mut self, bounds: CellRect, annotation: impl Into<String>) -> Label {
        self.next_id += 1;
        let label = Label::new(format!("label-{}", self.next_id), bounds, annotation);
        self.labels.push(label.clone());
        label
    }

    pub fn remove_label(&mut self, id: &str) -> Option<Label> {
        let idx = self.labels.iter().position(|l| l.id == id)?;
        Some(self.labels.remove(idx))
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn set_file_name(&mut self, name: impl Into<String>) {
        self.file_name = Some(name.into());
    }

    /// File-name hint sent with the document; timestamped unless overridden.
    pub fn file_name(&self) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| format!("labels-{}.json", Utc::now().format("%Y%m%d-%H%M%S")))
    }

    pub fn to_document(&self) -> LabelDocument {
        let mut extra = Map::new();
        extra.insert("savedAt".to_string(), json!(Utc::now().to_rfc3339()));
        extra.insert("labelCount".to_string(), json!(self.labels.len()));
        LabelDocument {
            file_name: self.file_name(),
            data: LabelData {
                labels: self.labels.clone(),
                extra,
            },
        }
    }

    /// Rebuilds a store from a saved document; new ids continue after the
    /// highest `label-<n>` seen.
    pub fn from_document(doc: LabelDocument) -> Self {
        let next_id = doc
            .data
            .labels
            .iter()
            .filter_map(|l| l.id.strip_prefix("label-")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self {
            labels: doc.data.labels,
            next_id,
            file_name: Some(doc.file_name),
            save_slot: Arc::default(),
        }
    }

    pub fn is_saving(&self) -> bool {
        self.save_slot.load(Ordering::Acquire)
    }

    /// Claims the save slot and snapshots the document. A second call while
    /// the returned `PendingSave` is alive fails with `SaveInProgress`.
    pub fn begin_save(&self, generation: u64) -> Result<PendingSave> {
        if self
            .save_slot
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("label save rejected: another save is in flight");
            return Err(HeatmapError::SaveInProgress);
        }
        Ok(PendingSave {
            document: self.to_document(),
            generation,
            _slot: SlotGuard(Arc::clone(&self.save_slot)),
        })
    }
}

struct SlotGuard(Arc<AtomicBool>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A claimed save. Sending consumes it; dropping it frees the slot.
pub struct PendingSave {
    document: LabelDocument,
    generation: u64,
    _slot: SlotGuard,
}

impl PendingSave {
    pub fn document(&self) -> &LabelDocument {
        &self.document
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once the view has been replaced since this save was taken.
    pub fn is_stale(&self, current_generation: u64) -> bool {
        current_generation != self.generation
    }

    /// Posts the document exactly once. No retry on failure.
    pub async fn send<T: LabelTransport>(self, transport: &T) -> Result<SaveReceipt> {
        let file_name = self.document.file_name.clone();
        let label_count = self.document.data.labels.len();
        let reply = transport.post(&self.document).await.map_err(|e| {
            warn!(file = %file_name, error = %e, "label save transport failure");
            HeatmapError::persistence(None, e.to_string())
        })?;

        if !(200..300).contains(&reply.status) {
            warn!(
                file = %file_name,
                status = reply.status,
                body = %reply.body,
                "label save rejected"
            );
            return Err(HeatmapError::persistence(Some(reply.status), reply.body));
        }

        info!(file = %file_name, labels = label_count, "labels saved");
        Ok(SaveReceipt {
            file_name,
            status: reply.status,
            message: reply.body,
            label_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{TransportError, TransportReply};
    use std::future::Future;
    use std::sync::Mutex;

    struct StubTransport {
        status: u16,
        body: &'static str,
        seen: Mutex<Vec<LabelDocument>>,
    }

    impl StubTransport {
        fn answering(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LabelTransport for StubTransport {
        fn post(
            &self,
            document: &LabelDocument,
        ) -> impl Future<Output = std::result::Result<TransportReply, TransportError>> + Send {
            self.seen.lock().unwrap().push(document.clone());
            let reply = TransportReply {
                status: self.status,
                body: self.body.to_string(),
            };
            async move { Ok(reply) }
        }
    }

    fn rect(r0: usize, r1: usize, c0: usize, c1: usize) -> CellRect {
        CellRect {
            start_row: r0,
            end_row: r1,
            start_col: c0,
            end_col: c1,
        }
    }

    #[test]
    fn ids_are_unique_and_overlaps_are_kept() {
        let mut store = LabelStore::new();
        let a = store.add_label(rect(0, 2, 0, 2), "burst");
        let b = store.add_label(rect(1, 3, 1, 3), "burst");
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
        assert!(a.intensity_matrix.is_none());

        assert_eq!(store.remove_label(&a.id).map(|l| l.id), Some(a.id.clone()));
        assert!(store.remove_label(&a.id).is_none());
        let c = store.add_label(rect(0, 0, 0, 0), "");
        assert_ne!(c.id, b.id);
    }

    #[test]
    fn document_serializes_camel_case_without_intensity() {
        let mut store = LabelStore::new();
        store.set_file_name("session.json");
        store.add_label(rect(1, 2, 3, 4), "spike");
        let value = serde_json::to_value(store.to_document()).unwrap();
        assert_eq!(value["fileName"], "session.json");
        let label = &value["data"]["labels"][0];
        assert_eq!(label["startRow"], 1);
        assert_eq!(label["endCol"], 4);
        assert_eq!(label["annotation"], "spike");
        assert!(label.get("intensityMatrix").is_none());
        assert_eq!(value["data"]["labelCount"], 1);
    }

    #[test]
    fn text_field_is_read_as_annotation() {
        let data = LabelData::from_value(json!({
            "labels": [{"id": "x", "startRow": 0, "endRow": 0, "startCol": 0, "endCol": 0, "text": "legacy", "color": "red"}]
        }))
        .unwrap();
        assert_eq!(data.labels[0].annotation, "legacy");
        assert_eq!(data.labels[0].extra.get("color"), Some(&json!("red")));
    }

    #[test]
    fn from_document_continues_id_sequence() {
        let mut store = LabelStore::new();
        store.add_label(rect(0, 0, 0, 0), "");
        store.add_label(rect(0, 0, 0, 0), "");
        let mut restored = LabelStore::from_document(store.to_document());
        let next = restored.add_label(rect(1, 1, 1, 1), "");
        assert_eq!(next.id, "label-3");
    }

    #[tokio::test]
    async fn second_save_is_rejected_while_first_is_pending() {
        let store = LabelStore::new();
        let first = store.begin_save(0).unwrap();
        assert!(store.is_saving());
        assert!(matches!(store.begin_save(0), Err(HeatmapError::SaveInProgress)));

        let transport = StubTransport::answering(200, "Label saved successfully");
        let receipt = first.send(&transport).await.unwrap();
        assert_eq!(receipt.status, 200);
        assert!(!store.is_saving());
        assert!(store.begin_save(0).is_ok());
    }

    #[tokio::test]
    async fn non_2xx_is_a_persistence_error_and_frees_the_slot() {
        let mut store = LabelStore::new();
        store.add_label(rect(0, 1, 0, 1), "x");
        let transport = StubTransport::answering(500, "Error saving label");
        let err = store.begin_save(0).unwrap().send(&transport).await.unwrap_err();
        assert!(matches!(
            err,
            HeatmapError::Persistence { status: Some(500), ref message } if message == "Error saving label"
        ));
        assert!(!store.is_saving());
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
        // Labels survive a failed save.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn pending_save_knows_when_the_view_moved_on() {
        let store = LabelStore::new();
        let pending = store.begin_save(3).unwrap();
        assert!(!pending.is_stale(3));
        assert!(pending.is_stale(4));
        drop(pending);
        assert!(!store.is_saving());
    }
}
