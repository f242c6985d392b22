//! Producer wiring: dynamic watchers feeding the listener, and the live
//! listing used by the reconciler.
//!
//! One watcher task per configured kind. The first observation of a uid maps
//! to CREATE, later applies to UPDATE; event ids are derived from uid and
//! resourceVersion so a re-delivered mutation upserts instead of
//! duplicating.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::GroupVersionKind as KubeGvk;
use kube::discovery;
use kube::runtime::watcher;
use kube::Client;
use spectre_ingest::listener::EventListener;
use spectre_ingest::metrics::IngestMetrics;
use spectre_ingest::now_ns;
use spectre_ingest::reconciler::LiveLister;
use spectre_k8s_util::event::{EventType, RawEvent, ResourceMeta};
use spectre_k8s_util::parse;
use spectre_k8s_util::types::GroupVersionKind;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Spawn one watcher per configured kind.
pub fn spawn_watchers(
    client: Client,
    gvks: &[GroupVersionKind],
    listener: Arc<EventListener>,
    metrics: Arc<IngestMetrics>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    gvks.iter()
        .map(|gvk| {
            let client = client.clone();
            let gvk = gvk.clone();
            let listener = listener.clone();
            let metrics = metrics.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                watch_kind(client, gvk, listener, metrics, cancel).await;
            })
        })
        .collect()
}

async fn watch_kind(
    client: Client,
    gvk: GroupVersionKind,
    listener: Arc<EventListener>,
    metrics: Arc<IngestMetrics>,
    cancel: CancellationToken,
) {
    let api = loop {
        match dynamic_api(&client, &gvk).await {
            Ok(api) => break api,
            Err(error) => {
                error!(msg = "kind not discoverable, retrying", kind = %gvk, %error);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {}
                }
            }
        }
    };
    info!(msg = "watching kind", kind = %gvk);

    let mut seen: HashSet<String> = HashSet::new();
    let mut stream = std::pin::pin!(watcher(api, watcher::Config::default()));
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };
        match item {
            None => break,
            Some(Err(error)) => {
                warn!(msg = "watch error", kind = %gvk, %error);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Some(Ok(watcher::Event::Init | watcher::Event::InitDone)) => {}
            Some(Ok(watcher::Event::InitApply(obj) | watcher::Event::Apply(obj))) => {
                deliver(&gvk, obj, false, &mut seen, &listener, &metrics).await;
            }
            Some(Ok(watcher::Event::Delete(obj))) => {
                deliver(&gvk, obj, true, &mut seen, &listener, &metrics).await;
            }
        }
    }
    debug!(msg = "watcher stopped", kind = %gvk);
}

async fn deliver(
    gvk: &GroupVersionKind,
    obj: DynamicObject,
    deleted: bool,
    seen: &mut HashSet<String>,
    listener: &EventListener,
    metrics: &IngestMetrics,
) {
    let Some(uid) = obj.metadata.uid.clone() else {
        warn!(msg = "object without uid ignored", kind = %gvk);
        return;
    };
    let event_type = if deleted {
        seen.remove(&uid);
        EventType::Delete
    } else if seen.insert(uid.clone()) {
        EventType::Create
    } else {
        EventType::Update
    };

    let resource_version = obj.metadata.resource_version.clone().unwrap_or_default();
    let data = match serde_json::to_value(&obj) {
        Ok(value) => value,
        Err(error) => {
            warn!(msg = "object not serialisable, skipped", kind = %gvk, uid, %error);
            return;
        }
    };
    let involved_object_uid = (gvk.kind == "Event")
        .then(|| parse::str_field(&data, &["involvedObject", "uid"]).map(str::to_string))
        .flatten();

    let event = RawEvent {
        id: format!("{uid}-{resource_version}-{}", event_type.as_str()),
        timestamp: now_ns(),
        event_type,
        resource: ResourceMeta {
            uid,
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            involved_object_uid,
        },
        data: if deleted { serde_json::Value::Null } else { data },
    };
    if listener.enqueue(event).await.is_err() {
        metrics.event_dropped();
    }
}

async fn dynamic_api(client: &Client, gvk: &GroupVersionKind) -> anyhow::Result<Api<DynamicObject>> {
    let kube_gvk = KubeGvk::gvk(&gvk.group, &gvk.version, &gvk.kind);
    let (resource, _caps) = discovery::pinned_kind(client, &kube_gvk).await?;
    Ok(Api::all_with(client.clone(), &resource))
}

/// Reconciler-side listing over the same watch list.
pub struct KubeLister {
    client: Client,
    gvks: Vec<GroupVersionKind>,
}

impl KubeLister {
    pub fn new(client: Client, gvks: Vec<GroupVersionKind>) -> Self {
        Self { client, gvks }
    }
}

#[async_trait]
impl LiveLister for KubeLister {
    fn kinds(&self) -> Vec<GroupVersionKind> {
        // Event objects are append-only and never reconciled
        self.gvks
            .iter()
            .filter(|gvk| gvk.kind != "Event")
            .cloned()
            .collect()
    }

    async fn list_uids(
        &self,
        gvk: &GroupVersionKind,
    ) -> spectre_ingest::Result<HashSet<String>> {
        let api = dynamic_api(&self.client, gvk)
            .await
            .map_err(|e| spectre_ingest::Error::Producer(format!("{gvk}: {e}")))?;
        let mut uids = HashSet::new();
        let mut params = ListParams::default().limit(500);
        loop {
            let page = api
                .list(&params)
                .await
                .map_err(|e| spectre_ingest::Error::Producer(format!("list {gvk}: {e}")))?;
            uids.extend(page.items.iter().filter_map(|o| o.metadata.uid.clone()));
            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => {
                    params = params.continue_token(&token);
                }
                _ => break,
            }
        }
        Ok(uids)
    }
}
