//! Converge labels: drive a remote label set toward the declared one.
//!
//! Removals go out before upserts, each side only when non-empty. A failed
//! call is returned as-is with no rollback; both remote operations are
//! idempotent so the next pass recomputes the delta and finishes the job.

#![forbid(unsafe_code)]

use std::sync::Arc;

use converge_core::{call_site, CallMetrics, LabelDelta, LabelMap, LabelStore, OpCategory, RemoteError};
use tracing::{debug, info, warn};

/// Split `desired` vs `observed` into keys to upsert and keys to remove.
pub fn compute_delta(desired: &LabelMap, observed: &LabelMap) -> LabelDelta {
    let mut delta = LabelDelta::default();
    for (k, v) in desired.iter() {
        if observed.get(k) != Some(v) {
            delta.to_upsert.get_or_insert_with(LabelMap::new).insert(k.clone(), v.clone());
        }
    }
    for k in observed.keys() {
        if !desired.contains_key(k) {
            delta.to_remove.get_or_insert_with(Vec::new).push(k.clone());
        }
    }
    delta
}

/// Order-insensitive equality of two label sets.
pub fn equal_labels(a: &LabelMap, b: &LabelMap) -> bool {
    compute_delta(a, b).is_empty()
}

/// Label reconciler bound to a store and a call observer.
#[derive(Clone)]
pub struct LabelReconciler {
    store: Arc<dyn LabelStore>,
    metrics: Arc<dyn CallMetrics>,
}

impl LabelReconciler {
    pub fn new(store: Arc<dyn LabelStore>, metrics: Arc<dyn CallMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Read the current remote label set.
    pub async fn fetch_labels(&self, resource_id: &str) -> Result<LabelMap, RemoteError> {
        let res = self.store.list_labels(resource_id).await;
        self.metrics.record(OpCategory::Get, call_site::LIST_LABELS, res.as_ref().err());
        match &res {
            Ok(labels) => debug!(resource = %resource_id, count = labels.len(), "labels fetched"),
            Err(e) => warn!(resource = %resource_id, error = %e, "list labels failed"),
        }
        res
    }

    /// Apply the delta between `desired` and `observed`: remove, then upsert.
    pub async fn converge(&self, resource_id: &str, desired: &LabelMap, observed: &LabelMap) -> Result<(), RemoteError> {
        let delta = compute_delta(desired, observed);
        if delta.is_empty() {
            debug!(resource = %resource_id, "labels in sync");
            return Ok(());
        }
        debug!(resource = %resource_id, upserts = delta.upsert_len(), removes = delta.remove_len(), "label delta computed");

        if let Some(keys) = delta.to_remove.as_deref() {
            let res = self.store.remove_labels(resource_id, keys).await;
            self.metrics.record(OpCategory::Update, call_site::REMOVE_LABELS, res.as_ref().err());
            if let Err(e) = res {
                warn!(resource = %resource_id, error = %e, "remove labels failed");
                return Err(e);
            }
        }

        if let Some(labels) = delta.to_upsert.as_ref() {
            let res = self.store.set_labels(resource_id, labels).await;
            self.metrics.record(OpCategory::Update, call_site::SET_LABELS, res.as_ref().err());
            if let Err(e) = res {
                warn!(resource = %resource_id, error = %e, "set labels failed");
                return Err(e);
            }
        }

        info!(resource = %resource_id, upserts = delta.upsert_len(), removes = delta.remove_len(), "labels converged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn labels(pairs: &[(&str, &str)]) -> LabelMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        List(String),
        Remove(String, Vec<String>),
        Set(String, LabelMap),
    }

    #[derive(Default)]
    struct ScriptedStore {
        calls: Mutex<Vec<Call>>,
        listed: LabelMap,
        fail_list: bool,
        fail_remove: bool,
        fail_set: bool,
    }

    #[async_trait::async_trait]
    impl LabelStore for ScriptedStore {
        async fn list_labels(&self, id: &str) -> Result<LabelMap, RemoteError> {
            self.calls.lock().unwrap().push(Call::List(id.into()));
            if self.fail_list { return Err(RemoteError::Transport("connection reset".into())); }
            Ok(self.listed.clone())
        }
        async fn set_labels(&self, id: &str, l: &LabelMap) -> Result<(), RemoteError> {
            self.calls.lock().unwrap().push(Call::Set(id.into(), l.clone()));
            if self.fail_set { return Err(RemoteError::Api { code: 429, reason: "Throttled".into(), message: "slow down".into() }); }
            Ok(())
        }
        async fn remove_labels(&self, id: &str, keys: &[String]) -> Result<(), RemoteError> {
            self.calls.lock().unwrap().push(Call::Remove(id.into(), keys.to_vec()));
            if self.fail_remove { return Err(RemoteError::Api { code: 500, reason: "Internal".into(), message: "boom".into() }); }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordedCalls(Mutex<Vec<(&'static str, &'static str, bool)>>);

    impl CallMetrics for RecordedCalls {
        fn record(&self, category: OpCategory, name: &'static str, error: Option<&RemoteError>) {
            self.0.lock().unwrap().push((category.as_str(), name, error.is_some()));
        }
    }

    fn reconciler(store: ScriptedStore) -> (LabelReconciler, Arc<ScriptedStore>, Arc<RecordedCalls>) {
        let store = Arc::new(store);
        let metrics = Arc::new(RecordedCalls::default());
        (LabelReconciler::new(store.clone(), metrics.clone()), store, metrics)
    }

    #[test]
    fn delta_splits_upserts_and_removals() {
        let d = compute_delta(&labels(&[("a", "1"), ("b", "2")]), &labels(&[("b", "2"), ("c", "3")]));
        assert_eq!(d.to_upsert, Some(labels(&[("a", "1")])));
        assert_eq!(d.to_remove, Some(vec!["c".to_string()]));
    }

    #[test]
    fn delta_upserts_changed_values() {
        let d = compute_delta(&labels(&[("a", "2")]), &labels(&[("a", "1")]));
        assert_eq!(d.to_upsert, Some(labels(&[("a", "2")])));
        assert_eq!(d.to_remove, None);
    }

    #[test]
    fn delta_of_identical_sets_is_empty() {
        let l = labels(&[("a", "1"), ("b", "")]);
        assert!(compute_delta(&l, &l).is_empty());
        assert!(equal_labels(&l, &l.clone()));
        assert!(!equal_labels(&l, &LabelMap::new()));
    }

    #[test]
    fn delta_with_empty_desired_only_removes() {
        let d = compute_delta(&LabelMap::new(), &labels(&[("x", "1")]));
        assert_eq!(d.to_upsert, None);
        assert_eq!(d.to_remove, Some(vec!["x".to_string()]));
    }

    #[tokio::test]
    async fn empty_sides_make_no_calls() {
        let (r, store, metrics) = reconciler(ScriptedStore::default());
        r.converge("res", &LabelMap::new(), &LabelMap::new()).await.unwrap();
        let l = labels(&[("a", "1")]);
        r.converge("res", &l, &l).await.unwrap();
        assert!(store.calls.lock().unwrap().is_empty());
        assert!(metrics.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn removes_before_setting() {
        let (r, store, metrics) = reconciler(ScriptedStore::default());
        r.converge("res", &labels(&[("a", "1"), ("b", "2")]), &labels(&[("b", "2"), ("c", "3")])).await.unwrap();
        assert_eq!(
            *store.calls.lock().unwrap(),
            vec![
                Call::Remove("res".into(), vec!["c".into()]),
                Call::Set("res".into(), labels(&[("a", "1")])),
            ]
        );
        assert_eq!(
            *metrics.0.lock().unwrap(),
            vec![("UPDATE", "UntagResource", false), ("UPDATE", "TagResource", false)]
        );
    }

    #[tokio::test]
    async fn only_removal_when_desired_empty() {
        let (r, store, _) = reconciler(ScriptedStore::default());
        r.converge("res", &LabelMap::new(), &labels(&[("x", "1")])).await.unwrap();
        assert_eq!(*store.calls.lock().unwrap(), vec![Call::Remove("res".into(), vec!["x".into()])]);
    }

    #[tokio::test]
    async fn failed_removal_skips_set() {
        let (r, store, metrics) = reconciler(ScriptedStore { fail_remove: true, ..Default::default() });
        let err = r.converge("res", &labels(&[("a", "1")]), &labels(&[("c", "3")])).await.unwrap_err();
        assert!(matches!(err, RemoteError::Api { code: 500, .. }));
        assert_eq!(*store.calls.lock().unwrap(), vec![Call::Remove("res".into(), vec!["c".into()])]);
        assert_eq!(*metrics.0.lock().unwrap(), vec![("UPDATE", "UntagResource", true)]);
    }

    #[tokio::test]
    async fn failed_set_is_returned_after_removal() {
        let (r, store, metrics) = reconciler(ScriptedStore { fail_set: true, ..Default::default() });
        let err = r.converge("res", &labels(&[("a", "1")]), &labels(&[("c", "3")])).await.unwrap_err();
        assert!(matches!(err, RemoteError::Api { code: 429, .. }));
        assert_eq!(store.calls.lock().unwrap().len(), 2);
        assert_eq!(
            *metrics.0.lock().unwrap(),
            vec![("UPDATE", "UntagResource", false), ("UPDATE", "TagResource", true)]
        );
    }

    #[tokio::test]
    async fn fetch_records_outcome() {
        let (r, _, metrics) = reconciler(ScriptedStore { listed: labels(&[("k", "v")]), ..Default::default() });
        assert_eq!(r.fetch_labels("res").await.unwrap(), labels(&[("k", "v")]));
        assert_eq!(*metrics.0.lock().unwrap(), vec![("GET", "ListTagsForResource", false)]);

        let (r, _, metrics) = reconciler(ScriptedStore { fail_list: true, ..Default::default() });
        let err = r.fetch_labels("res").await.unwrap_err();
        assert_eq!(err.to_string(), "transport error: connection reset");
        assert_eq!(*metrics.0.lock().unwrap(), vec![("GET", "ListTagsForResource", true)]);
    }
}
