use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use super::{
    config::RedisConfig,
    error::{RedisDaoError, RedisResult},
};

/// Open a client and a multiplexed connection manager for one candidate.
///
/// The manager keeps a single reconnecting connection shared process-wide;
/// clones are cheap handles onto it. Retries are kept low here because the
/// supervisor owns the failover policy.
pub async fn establish_connection(config: &RedisConfig) -> RedisResult<(Client, ConnectionManager)> {
    let client = Client::open(config.url.as_str()).map_err(|source| RedisDaoError::Connect {
        url: config.url.clone(),
        source,
    })?;

    let manager_config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(config.connect_timeout);

    let connection = client
        .get_connection_manager_with_config(manager_config)
        .await
        .map_err(|source| RedisDaoError::Connect {
            url: config.url.clone(),
            source,
        })?;

    Ok((client, connection))
}
