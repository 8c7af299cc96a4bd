use super::BrokerConfig;
use crate::Result;
use config::{Config, Environment};

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("DRIFTMQ"))
            .build()
            .map_err(|e| crate::DriftmqError::Config(e.to_string()))?;

        let config = settings
            .try_deserialize::<BrokerConfig>()
            .map_err(|e| crate::DriftmqError::Config(e.to_string()))?;

        config.validate().map_err(crate::DriftmqError::Config)?;

        Ok(config)
    }
}
