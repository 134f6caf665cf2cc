//! # Network Reconciler
//!
//! Reconciler for the sample `Network` resource. It has no external system to
//! drive, so it only reports what it observes: the current spec, or that the
//! object is gone.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::controller::ObjectKey;
use crate::crd::Network;
use crate::runtime::{Action, Reconciler, ReconcilerError};

#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkReconciler;

#[async_trait]
impl Reconciler<Network> for NetworkReconciler {
    async fn reconcile(
        &self,
        key: &ObjectKey,
        obj: Option<Arc<Network>>,
    ) -> Result<Action, ReconcilerError> {
        match obj {
            Some(network) => {
                info!(
                    namespace = key.namespace().unwrap_or_default(),
                    name = key.name(),
                    cidr = %network.spec.cidr,
                    gateway = %network.spec.gateway,
                    "Network observed"
                );
            }
            None => {
                info!(
                    namespace = key.namespace().unwrap_or_default(),
                    name = key.name(),
                    "Network deleted"
                );
            }
        }
        Ok(Action::await_change())
    }
}
