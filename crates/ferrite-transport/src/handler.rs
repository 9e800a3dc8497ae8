//! Method dispatch table for the drive RPC surface. A registry
//! pattern keyed by the HTTP method name in `POST <prefix>/v1/<method>`,
//! since routing happens at the HTTP layer rather than through a mux
//! subroute.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};

use crate::errors::{Result, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerID {
    Storage,
    Healing,
    Replication,
    Admin,
    Custom(u8),
}

impl HandlerID {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Storage => 1,
            Self::Healing => 2,
            Self::Replication => 3,
            Self::Admin => 4,
            Self::Custom(value) => value,
        }
    }
}

/// A single request/response drive operation, wrapped in the keep-alive
/// framing: `make_volume`, `read_metadata`, `write_metadata`, and the like.
#[async_trait]
pub trait SingleHandler: Send + Sync {
    async fn handle(&self, params: HashMap<String, String>, body: Bytes) -> Result<Bytes>;
}

/// A long-lived handler that streams blocks back as they become available,
/// wrapped in the streaming framing: `walk_dir` and other directory/shard
/// streams.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn open(
        &self,
        params: HashMap<String, String>,
        body: Bytes,
        tx: mpsc::Sender<Bytes>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub enum HandlerKind {
    Single(Arc<dyn SingleHandler>),
    Stream(Arc<dyn StreamHandler>),
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<HashMap<String, HandlerKind>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_single(&self, method: impl Into<String>, handler: Arc<dyn SingleHandler>) {
        self.inner
            .write()
            .await
            .insert(method.into(), HandlerKind::Single(handler));
    }

    pub async fn register_stream(&self, method: impl Into<String>, handler: Arc<dyn StreamHandler>) {
        self.inner
            .write()
            .await
            .insert(method.into(), HandlerKind::Stream(handler));
    }

    pub async fn get(&self, method: &str) -> Result<HandlerKind> {
        self.inner
            .read()
            .await
            .get(method)
            .cloned()
            .ok_or_else(|| TransportError::HandlerNotFound {
                method: method.to_string(),
            })
    }
}
