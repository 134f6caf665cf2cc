//! Common test utilities for controller integration tests
//!
//! Provides a ConfigMap builder, a watch source driven by a channel of
//! watcher events, and a reconciler that records every call and replays a
//! scripted outcome per key.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube_runtime::watcher;
use reconcile_controller::config::ControllerConfig;
use reconcile_controller::controller::{
    reflect, EventHandler, LocalCache, ObjectKey, Reflector, WatchSource,
};
use reconcile_controller::runtime::{Action, Reconciler, ReconcilerError};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Build a namespaced ConfigMap carrying `value` under the `value` key
pub fn config_map(namespace: &str, name: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
        ..ConfigMap::default()
    }
}

pub fn value_of(cm: &ConfigMap) -> Option<String> {
    cm.data.as_ref()?.get("value").cloned()
}

/// Controller settings with short delays for tests
pub fn test_config(workers: usize) -> ControllerConfig {
    ControllerConfig {
        worker_count: workers,
        base_retry_delay_ms: 20,
        max_retry_delay_ms: 1_000,
        cache_sync_poll_interval_ms: 5,
        queue_name: "integration-test".to_string(),
        ..ControllerConfig::default()
    }
}

/// Sends watcher events to a [`ScriptedSource`]
#[derive(Clone)]
pub struct SourceHandle {
    tx: mpsc::UnboundedSender<watcher::Event<ConfigMap>>,
}

impl SourceHandle {
    pub fn send(&self, event: watcher::Event<ConfigMap>) {
        self.tx.send(event).expect("scripted source stopped");
    }

    /// Deliver a complete initial listing, which marks the cache synced
    pub fn initial_listing(&self, objects: Vec<ConfigMap>) {
        self.send(watcher::Event::Init);
        for obj in objects {
            self.send(watcher::Event::InitApply(obj));
        }
        self.send(watcher::Event::InitDone);
    }

    pub fn apply(&self, obj: ConfigMap) {
        self.send(watcher::Event::Apply(obj));
    }

    pub fn delete(&self, obj: ConfigMap) {
        self.send(watcher::Event::Delete(obj));
    }
}

/// Watch source fed from a channel instead of an API server
pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<watcher::Event<ConfigMap>>,
    exit_when_script_ends: bool,
}

impl ScriptedSource {
    /// Source that keeps running until shutdown, even after every handle is dropped
    pub fn new() -> (Self, SourceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                exit_when_script_ends: false,
            },
            SourceHandle { tx },
        )
    }

    /// Source that fails as soon as every handle is dropped
    pub fn exiting() -> (Self, SourceHandle) {
        let (mut source, handle) = Self::new();
        source.exit_when_script_ends = true;
        (source, handle)
    }
}

#[async_trait]
impl WatchSource<ConfigMap> for ScriptedSource {
    async fn run(
        self: Box<Self>,
        cache: LocalCache<ConfigMap>,
        handler: Arc<dyn EventHandler<ConfigMap>>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let Self {
            rx,
            exit_when_script_ends,
        } = *self;
        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|event| (Ok::<_, Infallible>(event), rx))
        });

        let mut reflector = Reflector::new(cache);
        reflect(events, &mut reflector, handler.as_ref(), &shutdown).await;

        if shutdown.is_cancelled() {
            return Ok(());
        }
        if exit_when_script_ends {
            anyhow::bail!("scripted source ran out of events");
        }
        shutdown.cancelled().await;
        Ok(())
    }
}

/// Outcome a [`RecordingReconciler`] returns for one call
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed,
    Requeue(Duration),
    Fail,
    Permanent,
    Panic,
}

/// One observed reconcile call
#[derive(Debug, Clone)]
pub struct Call {
    pub key: ObjectKey,
    pub value: Option<String>,
    pub at: Instant,
}

#[derive(Default)]
struct Recorded {
    calls: Vec<Call>,
    scripts: HashMap<ObjectKey, VecDeque<Outcome>>,
    in_flight: HashMap<ObjectKey, usize>,
    max_concurrent_per_key: usize,
}

/// Reconciler that records calls and plays back scripted outcomes.
///
/// Keys without a script, or whose script is exhausted, succeed.
#[derive(Default)]
pub struct RecordingReconciler {
    state: Mutex<Recorded>,
    called: Notify,
    delay: Duration,
}

impl RecordingReconciler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Each call sleeps for `delay` before returning
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn script(&self, key: &ObjectKey, outcomes: impl IntoIterator<Item = Outcome>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(key.clone())
            .or_default()
            .extend(outcomes);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, key: &ObjectKey) -> Vec<Call> {
        self.calls().into_iter().filter(|c| &c.key == key).collect()
    }

    pub fn max_concurrent_per_key(&self) -> usize {
        self.state.lock().unwrap().max_concurrent_per_key
    }

    /// Wait until at least `count` calls have started
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> Vec<Call> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.called.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                let calls = self.calls();
                if calls.len() >= count {
                    return calls;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {count} reconcile calls within {timeout:?}, got {:?}",
                self.calls()
            )
        })
    }

    pub fn as_reconciler(self: &Arc<Self>) -> Arc<dyn Reconciler<ConfigMap>> {
        Arc::clone(self) as Arc<dyn Reconciler<ConfigMap>>
    }
}

#[async_trait]
impl Reconciler<ConfigMap> for RecordingReconciler {
    async fn reconcile(
        &self,
        key: &ObjectKey,
        obj: Option<Arc<ConfigMap>>,
    ) -> Result<Action, ReconcilerError> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call {
                key: key.clone(),
                value: obj.as_deref().and_then(value_of),
                at: Instant::now(),
            });
            let in_flight = state.in_flight.entry(key.clone()).or_default();
            *in_flight += 1;
            let concurrent = *in_flight;
            state.max_concurrent_per_key = state.max_concurrent_per_key.max(concurrent);
            state
                .scripts
                .get_mut(key)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Outcome::Succeed)
        };
        self.called.notify_waiters();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(in_flight) = self.state.lock().unwrap().in_flight.get_mut(key) {
            *in_flight -= 1;
        }

        match outcome {
            Outcome::Succeed => Ok(Action::await_change()),
            Outcome::Requeue(delay) => Ok(Action::requeue(delay)),
            Outcome::Fail => Err(anyhow::anyhow!("scripted failure for {key}").into()),
            Outcome::Permanent => Err(ReconcilerError::permanent(anyhow::anyhow!(
                "scripted permanent failure for {key}"
            ))),
            Outcome::Panic => panic!("scripted panic for {key}"),
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
