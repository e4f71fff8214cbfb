//! Key expressions for published sensor-node telemetry.
//!
//! Layout:
//!
//! ```text
//! <prefix>/<device>/<space>/<field>     decoded field values
//! <prefix>/<device>/@/error             transient and fatal poll errors
//! <prefix>/@/status                     bridge running/offline status
//! ```

/// Default key expression prefix.
pub const KEY_PREFIX: &str = "accelbus";

/// Builder for accelbus key expressions.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    /// Create a builder with a custom prefix. Trailing slashes are dropped.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key for one decoded field.
    ///
    /// # Example
    /// ```
    /// use accelbus_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::default();
    /// let key = builder.field("accel01", "input", "current_avg_x");
    /// assert_eq!(key, "accelbus/accel01/input/current_avg_x");
    /// ```
    pub fn field(&self, device: &str, space: &str, field: &str) -> String {
        format!("{}/{}/{}/{}", self.prefix, device, space, field)
    }

    /// Build the key that carries poll errors for a device.
    ///
    /// # Example
    /// ```
    /// use accelbus_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::default();
    /// assert_eq!(builder.error("accel01"), "accelbus/accel01/@/error");
    /// ```
    pub fn error(&self, device: &str) -> String {
        format!("{}/{}/@/error", self.prefix, device)
    }

    /// Build a wildcard matching everything published for a device.
    pub fn device_wildcard(&self, device: &str) -> String {
        format!("{}/{}/**", self.prefix, device)
    }

    /// Build the bridge status key.
    ///
    /// # Example
    /// ```
    /// use accelbus_common::keyexpr::KeyExprBuilder;
    ///
    /// assert_eq!(KeyExprBuilder::new("lab").status(), "lab/@/status");
    /// ```
    pub fn status(&self) -> String {
        format!("{}/@/status", self.prefix)
    }
}
