//! Demo handler that simulates running a query with a flaky backend.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::{Plugin, PluginError};

pub const PLUGIN_NAME: &str = "run_query";

const DEFAULT_FAILURE_RATE: f64 = 0.2;

pub struct RunQuery {
    query_time: Duration,
    failure_rate: f64,
}

impl RunQuery {
    pub fn new(query_time: Duration) -> Self {
        Self {
            query_time,
            failure_rate: DEFAULT_FAILURE_RATE,
        }
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate;
        self
    }
}

#[async_trait]
impl Plugin for RunQuery {
    async fn execute(&self, _params: &BTreeMap<String, String>) -> Result<(), PluginError> {
        if rand::random::<f64>() < self.failure_rate {
            return Err(PluginError::failed("query failed"));
        }
        sleep(self.query_time).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_failure_rate_always_succeeds() {
        let plugin = RunQuery::new(Duration::from_millis(1)).with_failure_rate(0.0);
        assert!(plugin.execute(&BTreeMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn certain_failure_reports_query_failed() {
        let plugin = RunQuery::new(Duration::from_millis(1)).with_failure_rate(1.0);
        let err = plugin.execute(&BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "query failed");
    }
}
