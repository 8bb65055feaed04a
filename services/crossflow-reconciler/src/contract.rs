//! In-process root registry
//!
//! Deployments wire the real signer/contract client behind
//! [`RootContract`]; this registry keeps the submitted roots in memory and
//! logs every submission, which is what single-node and test environments
//! run with. Key management never enters this process.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crossflow_spv::{RootContract, TreeKind};
use crossflow_types::Result;

#[derive(Default)]
pub struct InProcessRootRegistry {
    roots: Mutex<HashMap<(u32, TreeKind), String>>,
}

#[async_trait]
impl RootContract for InProcessRootRegistry {
    async fn user_tx_root(&self, chain_id: u32) -> Result<Option<String>> {
        Ok(self
            .roots
            .lock()
            .await
            .get(&(chain_id, TreeKind::UserTx))
            .cloned())
    }

    async fn maker_tx_root(&self, chain_id: u32) -> Result<Option<String>> {
        Ok(self
            .roots
            .lock()
            .await
            .get(&(chain_id, TreeKind::MakerTx))
            .cloned())
    }

    async fn set_user_tx_root(&self, chain_id: u32, root_hex: &str) -> Result<()> {
        info!(chain_id, root = root_hex, "user tree root updated");
        self.roots
            .lock()
            .await
            .insert((chain_id, TreeKind::UserTx), root_hex.to_string());
        Ok(())
    }

    async fn set_maker_tx_root(&self, chain_id: u32, root_hex: &str) -> Result<()> {
        info!(chain_id, root = root_hex, "maker tree root updated");
        self.roots
            .lock()
            .await
            .insert((chain_id, TreeKind::MakerTx), root_hex.to_string());
        Ok(())
    }
}
