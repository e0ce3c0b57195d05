//! Access gate: which users may relay, and to which origins.
//!
//! Every decision reads the store. The allow-list is deliberately not
//! cached so a removal takes effect on the next request. Store calls run
//! on the blocking pool.

use std::sync::Arc;

use crate::error::ProxyError;
use crate::routing::OriginKey;
use crate::store::{self, Store, StoreError, UserRecord};

pub struct AccessGate<'a> {
    store: &'a Arc<dyn Store>,
}

impl<'a> AccessGate<'a> {
    pub fn new(store: &'a Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The user must exist and be enabled.
    pub async fn check_user(&self, user: &str) -> Result<UserRecord, ProxyError> {
        let name = user.to_string();
        match store::blocking(self.store, move |s| s.get_user(&name)).await? {
            Some(record) if record.enabled => Ok(record),
            _ => Err(ProxyError::UserDenied(user.to_string())),
        }
    }

    /// True when enforcement is off or `origin` is on the allow-list.
    pub async fn permit(&self, origin: &OriginKey) -> Result<bool, StoreError> {
        let origin = origin.clone();
        store::blocking(self.store, move |s| {
            if !store::whitelist_enabled(s)? {
                return Ok(true);
            }
            s.contains_origin(origin.as_str())
        })
        .await
    }

    /// `permit` as a `Result`; `redirect` marks a redirect target for the
    /// log reason.
    pub async fn enforce(&self, origin: &OriginKey, redirect: bool) -> Result<(), ProxyError> {
        if self.permit(origin).await? {
            Ok(())
        } else {
            Err(ProxyError::OriginDenied {
                origin: origin.clone(),
                redirect,
            })
        }
    }
}
