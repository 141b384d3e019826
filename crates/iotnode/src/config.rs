use alloc::borrow::Cow;
use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::identity::DeviceUuid;
use crate::uri::{DEFAULT_REQUEST_BUFFER_SIZE, QueryEncoding};

// Default device type.
const DEVICE_TYPE: &str = "iotnode";
// Default device model.
const DEVICE_MODEL: &str = "generic";
// Default request path.
const REQUEST_PATH: &str = "/";
// Default request scheme.
const REQUEST_SCHEME: &str = "http://";
// Time to wait between two emission cycles.
const CYCLE_MS: u32 = 1000;
// Time to wait after a failed network association.
const BACKOFF_MS: u32 = 2000;

// Stack budget of the emitter task.
const EMITTER_STACK_SIZE: usize = 32 * 1024;
// Stack budget of the io task.
const IO_STACK_SIZE: usize = 4 * 1024;
// Memory budget of the capability interface.
const MEMORY_BUDGET: usize = 16 * 1024;

/// The emitter configuration.
///
/// ## Parameters
///
/// - **`device_type`** and **`device_model`**
///   Literals sent with every request to describe the node.
///   Defaults to `iotnode` and `generic`.
///
/// - **`device_id`**
///   Optional node identifier sent as `device_id`.
///   See [`EmitterConfig::device_id()`].
///
/// - **`cycle_ms`**
///   Time to wait at the end of each emission cycle.
///   Defaults to `1000` milliseconds.
///
/// - **`backoff_ms`**
///   Time to wait after a failed network association.
///   Defaults to `2000` milliseconds.
///
/// - **`buffer_size`**
///   Size of the buffer a request is rendered into. A request which does
///   not fit is **not** sent.
///   Defaults to `2048` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    device_type: Cow<'static, str>,
    device_model: Cow<'static, str>,
    device_id: Option<String>,
    scheme: Cow<'static, str>,
    path: Cow<'static, str>,
    encoding: QueryEncoding,
    cycle_ms: u32,
    backoff_ms: u32,
    buffer_size: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self::new(DEVICE_TYPE, DEVICE_MODEL)
    }
}

impl EmitterConfig {
    /// Creates an [`EmitterConfig`] for the given device type and model.
    #[must_use]
    pub fn new(
        device_type: impl Into<Cow<'static, str>>,
        device_model: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            device_type: device_type.into(),
            device_model: device_model.into(),
            device_id: None,
            scheme: Cow::Borrowed(REQUEST_SCHEME),
            path: Cow::Borrowed(REQUEST_PATH),
            encoding: QueryEncoding::Raw,
            cycle_ms: CYCLE_MS,
            backoff_ms: BACKOFF_MS,
            buffer_size: DEFAULT_REQUEST_BUFFER_SIZE,
        }
    }

    /// Sets the device identifier sent with every request.
    #[must_use]
    pub fn device_id(mut self, uuid: &DeviceUuid) -> Self {
        self.device_id = Some(uuid.as_str().into());
        self
    }

    /// Sets the request scheme, i.e. `http://`.
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<Cow<'static, str>>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Sets the request path.
    ///
    /// The collector expects requests on `/`.
    #[must_use]
    pub fn path(mut self, path: impl Into<Cow<'static, str>>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the [`QueryEncoding`] of the request parameters.
    #[must_use]
    pub fn encoding(mut self, encoding: QueryEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the time to wait, in milliseconds, at the end of each cycle.
    #[must_use]
    pub fn cycle_ms(mut self, ms: u32) -> Self {
        self.cycle_ms = ms;
        self
    }

    /// Sets the time to wait, in milliseconds, after a failed association.
    #[must_use]
    pub fn backoff_ms(mut self, ms: u32) -> Self {
        self.backoff_ms = ms;
        self
    }

    /// Sets the request buffer size in bytes.
    ///
    /// A zero size is replaced with a single byte.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub(crate) fn device_type_value(&self) -> &str {
        &self.device_type
    }

    pub(crate) fn device_model_value(&self) -> &str {
        &self.device_model
    }

    pub(crate) fn device_id_value(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub(crate) fn scheme_value(&self) -> &str {
        &self.scheme
    }

    pub(crate) fn path_value(&self) -> &str {
        &self.path
    }

    pub(crate) const fn encoding_value(&self) -> QueryEncoding {
        self.encoding
    }

    pub(crate) const fn cycle_ms_value(&self) -> u32 {
        self.cycle_ms
    }

    pub(crate) const fn backoff_ms_value(&self) -> u32 {
        self.backoff_ms
    }

    pub(crate) const fn buffer_size_value(&self) -> usize {
        self.buffer_size
    }
}

/// The device configuration.
///
/// It describes the tasks a device spawns and the resources shared
/// through its capability interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    emitter_stack_size: usize,
    io_task: bool,
    io_stack_size: usize,
    memory_budget: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceConfig {
    /// Creates a [`DeviceConfig`] which only runs the emitter task.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            emitter_stack_size: EMITTER_STACK_SIZE,
            io_task: false,
            io_stack_size: IO_STACK_SIZE,
            memory_budget: MEMORY_BUDGET,
        }
    }

    /// Sets the stack budget, in bytes, of the emitter task.
    #[must_use]
    pub const fn emitter_stack_size(mut self, size: usize) -> Self {
        self.emitter_stack_size = size;
        self
    }

    /// Enables the io task with the given stack budget in bytes.
    #[must_use]
    pub const fn io_task(mut self, stack_size: usize) -> Self {
        self.io_task = true;
        self.io_stack_size = stack_size;
        self
    }

    /// Sets the number of bytes scripts may allocate through the
    /// capability interface.
    #[must_use]
    pub const fn memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub(crate) const fn emitter_stack_size_value(&self) -> usize {
        self.emitter_stack_size
    }

    pub(crate) const fn io_task_value(&self) -> Option<usize> {
        if self.io_task {
            Some(self.io_stack_size)
        } else {
            None
        }
    }

    pub(crate) const fn memory_budget_value(&self) -> usize {
        self.memory_budget
    }
}

#[cfg(test)]
mod tests {
    use crate::identity::DeviceUuid;
    use crate::uri::QueryEncoding;

    use super::{DeviceConfig, EmitterConfig};

    #[test]
    fn default_emitter_config() {
        let config = EmitterConfig::default();

        assert_eq!(config.device_type_value(), "iotnode");
        assert_eq!(config.device_model_value(), "generic");
        assert_eq!(config.device_id_value(), None);
        assert_eq!(config.scheme_value(), "http://");
        assert_eq!(config.path_value(), "/");
        assert_eq!(config.encoding_value(), QueryEncoding::Raw);
        assert_eq!(config.cycle_ms_value(), 1000);
        assert_eq!(config.backoff_ms_value(), 2000);
        assert_eq!(config.buffer_size_value(), 2048);
    }

    #[test]
    fn custom_emitter_config() {
        let uuid = DeviceUuid::from_mac([0xA4, 0xCF, 0x12, 0x00, 0x01, 0x02]);
        let config = EmitterConfig::new("ArduinoSimple8266", "generic8266")
            .device_id(&uuid)
            .encoding(QueryEncoding::Percent)
            .cycle_ms(500)
            .backoff_ms(4000)
            .buffer_size(0);

        assert_eq!(config.device_type_value(), "ArduinoSimple8266");
        assert_eq!(config.device_model_value(), "generic8266");
        assert_eq!(config.device_id_value(), Some("A4CF12000102"));
        assert_eq!(config.encoding_value(), QueryEncoding::Percent);
        assert_eq!(config.cycle_ms_value(), 500);
        assert_eq!(config.backoff_ms_value(), 4000);
        assert_eq!(config.buffer_size_value(), 1);
    }

    #[test]
    fn emitter_config_from_json() {
        let config: EmitterConfig = serde_json::from_value(serde_json::json!({
            "device_type": "ESP32_OLED_LORA",
            "cycle_ms": 250,
        }))
        .unwrap();

        assert_eq!(config.device_type_value(), "ESP32_OLED_LORA");
        assert_eq!(config.device_model_value(), "generic");
        assert_eq!(config.cycle_ms_value(), 250);
        assert_eq!(config.backoff_ms_value(), 2000);
    }

    #[test]
    fn device_config() {
        let config = DeviceConfig::new();
        assert_eq!(config.emitter_stack_size_value(), 32 * 1024);
        assert_eq!(config.io_task_value(), None);

        let config = config
            .emitter_stack_size(8192)
            .io_task(2048)
            .memory_budget(512);
        assert_eq!(config.emitter_stack_size_value(), 8192);
        assert_eq!(config.io_task_value(), Some(2048));
        assert_eq!(config.memory_budget_value(), 512);
    }
}
