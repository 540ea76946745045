//! Diagnostics record of a persistence plugin.

use serde::{Deserialize, Serialize};
use statekeep_core::{StoreDescriptor, WorkerEnvironment};

/// Restore timing of one worker-backed store, in milliseconds since the
/// plugin was built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStatus {
    pub store_id: String,
    /// When INIT was dispatched.
    pub start: f64,
    /// When the restored snapshot was merged. `None` until then, and forever
    /// if the restore failed.
    pub finish: Option<f64>,
}

/// Aggregate plugin state, filled in as stores finish their protocol.
///
/// Store descriptors and worker environments arrive asynchronously, one per
/// worker-backed store, so they may lag behind the set of created stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    pub worker_num: usize,
    /// Names of the workers spawned so far.
    pub workers: Vec<String>,
    pub register_store_options: Vec<StoreDescriptor>,
    pub worker_environment_simple_desc: Vec<WorkerEnvironment>,
    pub load_status: Vec<LoadStatus>,
}

impl PluginStatus {
    pub(crate) fn begin_load(&mut self, store_id: &str, start: f64) -> usize {
        self.load_status.push(LoadStatus {
            store_id: store_id.to_string(),
            start,
            finish: None,
        });
        self.load_status.len() - 1
    }

    pub(crate) fn finish_load(&mut self, index: usize, finish: f64) {
        if let Some(entry) = self.load_status.get_mut(index) {
            entry.finish = Some(finish);
        }
    }

    /// Load timing of `store_id`, if its restore has started.
    #[must_use]
    pub fn load_of(&self, store_id: &str) -> Option<&LoadStatus> {
        self.load_status.iter().find(|l| l.store_id == store_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_camel_case_json() {
        let mut status = PluginStatus {
            worker_num: 2,
            workers: vec!["statekeep-worker-0".to_string()],
            ..PluginStatus::default()
        };
        let index = status.begin_load("cart", 1.5);
        status.finish_load(index, 4.0);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["workerNum"], 2);
        assert_eq!(json["workers"][0], "statekeep-worker-0");
        assert_eq!(json["loadStatus"][0]["storeId"], "cart");
        assert_eq!(json["loadStatus"][0]["finish"], 4.0);
        assert!(json["registerStoreOptions"].as_array().unwrap().is_empty());
        assert!(json["workerEnvironmentSimpleDesc"].is_array());
    }

    #[test]
    fn unfinished_load_has_no_finish() {
        let mut status = PluginStatus::default();
        status.begin_load("a", 0.0);
        assert_eq!(status.load_of("a").and_then(|l| l.finish), None);
        assert!(status.load_of("b").is_none());
    }
}
