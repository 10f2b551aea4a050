//! Helpers shared by the real and mock clients.

use crate::error::ClusterError;
use kube::api::{Api, PostParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// Fetch-or-build, mutate, then write.
///
/// If an object named like `template` exists, `mutate` is applied to the stored
/// copy and the result replaces it (skipped when the mutation changed nothing).
/// Otherwise `mutate` is applied to `template` and the result is created.
pub async fn create_or_update<K>(
    api: &Api<K>,
    template: &K,
    mutate: &(dyn Fn(&mut K) + Send + Sync),
    kind: &str,
) -> Result<K, ClusterError>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = template
        .meta()
        .name
        .clone()
        .ok_or_else(|| ClusterError::InvalidObject(format!("{kind} name is missing")))?;

    let existing = api
        .get_opt(&name)
        .await
        .map_err(|e| ClusterError::from_kube(e, &format!("{kind} {name}")))?;

    match existing {
        Some(mut current) => {
            let before = serde_json::to_value(&current)?;
            mutate(&mut current);
            if serde_json::to_value(&current)? == before {
                debug!("{} {} already up-to-date", kind, name);
                return Ok(current);
            }
            debug!("Updating {} {}", kind, name);
            api.replace(&name, &PostParams::default(), &current)
                .await
                .map_err(|e| ClusterError::from_kube(e, &format!("{kind} {name}")))
        }
        None => {
            let mut fresh = template.clone();
            mutate(&mut fresh);
            debug!("Creating {} {}", kind, name);
            api.create(&PostParams::default(), &fresh)
                .await
                .map_err(|e| ClusterError::from_kube(e, &format!("{kind} {name}")))
        }
    }
}

/// Builds an equality label selector (`k1=v1,k2=v2`).
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Checks `labels` against an equality label selector.
///
/// Only the `key=value` form is understood, which is all the controller emits.
/// An empty selector matches everything.
pub fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels
                .and_then(|labels| labels.get(key.trim()))
                .is_some_and(|actual| actual == value.trim()),
            None => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_label_selector_is_sorted_and_joined() {
        let selector = label_selector(&labels(&[("z", "1"), ("gsm", "pool-a")]));
        assert_eq!(selector, "gsm=pool-a,z=1");
    }

    #[test]
    fn test_selector_matches_equality_terms() {
        let set = labels(&[("gsm", "pool-a"), ("tier", "edge")]);
        assert!(selector_matches("gsm=pool-a", Some(&set)));
        assert!(selector_matches("gsm=pool-a,tier=edge", Some(&set)));
        assert!(!selector_matches("gsm=pool-b", Some(&set)));
        assert!(!selector_matches("gsm=pool-a", None));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(selector_matches("", None));
    }
}
