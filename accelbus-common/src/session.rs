use serde::Serialize;
use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};
use crate::serialization::{Format, encode};

/// Open a Zenoh session for publishing telemetry.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let mut zenoh_config = zenoh::Config::default();

    config.validate()?;
    zenoh_config
        .insert_json5("mode", &format!("\"{}\"", config.mode))
        .map_err(|e| Error::config(format!("Failed to set mode: {}", e)))?;

    for (path, endpoints) in [
        ("connect/endpoints", &config.connect),
        ("listen/endpoints", &config.listen),
    ] {
        if endpoints.is_empty() {
            continue;
        }
        let json = serde_json::to_string(endpoints)?;
        zenoh_config
            .insert_json5(path, &json)
            .map_err(|e| Error::config(format!("Failed to set {}: {}", path, e)))?;
    }

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Connecting to Zenoh"
    );

    let session = zenoh::open(zenoh_config).await?;

    tracing::info!(zid = %session.zid(), "Connected to Zenoh");

    Ok(session)
}

/// Encode `value` and put it on `key`.
pub async fn put_encoded<T: Serialize>(
    session: &Session,
    key: &str,
    value: &T,
    format: Format,
) -> Result<()> {
    let payload = encode(value, format)?;
    session
        .put(key, payload)
        .await
        .map_err(|e| Error::publish(key, e))
}
