//! Demo handler that simulates sending an email.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use super::{Plugin, PluginError};

pub const PLUGIN_NAME: &str = "send_email";

pub struct SendEmail {
    delivery_time: Duration,
}

impl SendEmail {
    pub fn new(delivery_time: Duration) -> Self {
        Self { delivery_time }
    }
}

#[async_trait]
impl Plugin for SendEmail {
    async fn execute(&self, params: &BTreeMap<String, String>) -> Result<(), PluginError> {
        debug!(
            to = params.get("to").map(String::as_str).unwrap_or("<unset>"),
            "Simulating email delivery"
        );
        sleep(self.delivery_time).await;
        Ok(())
    }
}
