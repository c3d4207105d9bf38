use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn signed_url(&self, path: &str, expiry_s: u64) -> Result<String>;
}
