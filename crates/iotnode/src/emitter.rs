use core::fmt::Debug;
use core::future::Future;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use embedded_hal_async::delay::DelayNs;

use log::{debug, error, info, warn};

use serde::de::DeserializeOwned;

use crate::capability::{AppSystemInterface, ChannelBank};
use crate::config::EmitterConfig;
use crate::endpoint::EndpointSet;
use crate::error::Result;
use crate::task::StopFlag;
use crate::uri::Uri;

// The only status a collector replies with when a report is accepted.
const STATUS_OK: u16 = 200;

/// The wireless network link of a node.
pub trait Link {
    /// The error returned when the association fails.
    type Error: Debug;

    /// Checks whether the node is associated with the network and owns an
    /// address.
    fn is_associated(&self) -> bool;

    /// Associates the node with the network.
    ///
    /// # Errors
    ///
    /// An error is returned when the network cannot be joined.
    fn associate(&mut self) -> impl Future<Output = core::result::Result<(), Self::Error>>;
}

/// A collector response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Response status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Creates an [`HttpResponse`].
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Checks whether the collector accepted the report.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Parses the response body as `JSON`.
    ///
    /// # Errors
    ///
    /// An [`crate::error::ErrorKind::InvalidResponse`] error is returned
    /// when the body is not a valid `JSON` representation of `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(Into::into)
    }
}

/// An `HTTP` client contacting the collector.
///
/// A connection is opened for each request and closed right after it.
pub trait HttpClient {
    /// The error returned on a transport failure.
    type Error: Debug;

    /// Opens a connection to the given `host:port` authority.
    ///
    /// # Errors
    ///
    /// An error is returned when the collector cannot be reached.
    fn connect(
        &mut self,
        authority: &str,
    ) -> impl Future<Output = core::result::Result<(), Self::Error>>;

    /// Sends a `GET` request for the given `URL` on the open connection.
    ///
    /// # Errors
    ///
    /// An error is returned when the request cannot be sent or its response
    /// cannot be read.
    fn get(
        &mut self,
        url: &str,
    ) -> impl Future<Output = core::result::Result<HttpResponse, Self::Error>>;

    /// Closes the open connection, if any.
    fn disconnect(&mut self) -> impl Future<Output = ()>;
}

/// Produces the readings sent with each request.
pub trait Sampler {
    /// Adds the current readings to the request as query parameters.
    fn sample(&mut self, uri: &mut Uri);
}

impl<F: FnMut(&mut Uri)> Sampler for F {
    fn sample(&mut self, uri: &mut Uri) {
        self(uri);
    }
}

/// A [`Sampler`] which reads the node channels through the capability
/// interface.
///
/// Analog channels are reported as `a<idx>` with their raw value, digital
/// inputs as `d<idx>` with `0` or `1`.
pub struct ChannelSampler<'a, B: ChannelBank> {
    app: &'a AppSystemInterface<B>,
    analog: Vec<usize>,
    digital: Vec<usize>,
}

impl<'a, B: ChannelBank> ChannelSampler<'a, B> {
    /// Creates a [`ChannelSampler`] which reports no channels.
    #[must_use]
    pub const fn new(app: &'a AppSystemInterface<B>) -> Self {
        Self {
            app,
            analog: Vec::new(),
            digital: Vec::new(),
        }
    }

    /// Reports the analog channel `idx`.
    #[must_use]
    pub fn analog(mut self, idx: usize) -> Self {
        self.analog.push(idx);
        self
    }

    /// Reports the digital input channel `idx`.
    #[must_use]
    pub fn digital(mut self, idx: usize) -> Self {
        self.digital.push(idx);
        self
    }
}

impl<B: ChannelBank> Sampler for ChannelSampler<'_, B> {
    fn sample(&mut self, uri: &mut Uri) {
        for idx in &self.analog {
            // An unreadable channel is not reported.
            if let Some(value) = self.app.read_analog_channel(*idx) {
                uri.add_param(&format!("a{idx}"), &value.to_string());
            }
        }

        for idx in &self.digital {
            let value = if self.app.read_input_channel(*idx) {
                "1"
            } else {
                "0"
            };
            uri.add_param(&format!("d{idx}"), value);
        }
    }
}

/// The emitter states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    /// The node is not associated with the network.
    Disconnected,
    /// The node is associating with the network.
    Connecting,
    /// The node is associated and waits for the next request.
    ConnectedIdle,
    /// A request is in flight.
    Sending,
    /// The emitter waits for the next cycle.
    Sleeping,
}

/// The outcome of an emission cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The collector accepted the report.
    Delivered,
    /// The collector replied with a status different from `200`.
    Rejected(u16),
    /// The request could not be sent or its response could not be read.
    Failed,
    /// The request does not fit into the request buffer, so it has not
    /// been sent.
    Skipped,
    /// The node could not associate with the network.
    Unassociated,
    /// The cycle has been interrupted by a stop request.
    Stopped,
}

/// The telemetry emission loop.
///
/// Each cycle checks the network association, sends a report to the
/// selected collector, and sleeps until the next cycle. A failed
/// association is retried forever after a backoff, while a failed request
/// is logged and discarded.
pub struct Emitter<L, C, S, D> {
    config: EmitterConfig,
    endpoints: EndpointSet,
    link: L,
    client: C,
    sampler: S,
    delay: D,
    buffer: Vec<u8>,
    state: EmitterState,
    cycles: u32,
}

impl<L, C, S, D> Emitter<L, C, S, D>
where
    L: Link,
    C: HttpClient,
    S: Sampler,
    D: DelayNs,
{
    /// Creates an [`Emitter`].
    ///
    /// The endpoint set is owned by the emitter and cannot change
    /// afterwards.
    ///
    /// # Errors
    ///
    /// An [`crate::error::ErrorKind::EmptyEndpointSet`] error is returned
    /// when no endpoint has been configured.
    pub fn new(
        config: EmitterConfig,
        endpoints: EndpointSet,
        link: L,
        client: C,
        sampler: S,
        delay: D,
    ) -> Result<Self> {
        if let Err(e) = endpoints.select() {
            error!("{e}");
            return Err(e);
        }

        let buffer = vec![0; config.buffer_size_value()];

        Ok(Self {
            config,
            endpoints,
            link,
            client,
            sampler,
            delay,
            buffer,
            state: EmitterState::Disconnected,
            cycles: 0,
        })
    }

    /// Returns the current [`EmitterState`].
    #[must_use]
    pub const fn state(&self) -> EmitterState {
        self.state
    }

    /// Returns the number of started cycles.
    #[must_use]
    pub const fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Returns the endpoints.
    #[must_use]
    pub const fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Runs a single emission cycle, sleeps included.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycle(&StopFlag::new()).await
    }

    /// Runs emission cycles until a stop is requested.
    ///
    /// The flag is checked before and after each suspension point, so the
    /// loop returns at most one sleep after the request.
    pub async fn run(&mut self, stop: &StopFlag) {
        info!(
            "Emitter started, reporting to `{}`.",
            self.endpoints.select().unwrap_or_default()
        );

        while !stop.is_requested() {
            if self.cycle(stop).await == CycleOutcome::Stopped {
                break;
            }
        }

        info!("Emitter stopped after {} cycles.", self.cycles);
    }

    async fn cycle(&mut self, stop: &StopFlag) -> CycleOutcome {
        if stop.is_requested() {
            return CycleOutcome::Stopped;
        }
        self.cycles = self.cycles.wrapping_add(1);

        let outcome = if self.link.is_associated() || self.associate().await {
            if stop.is_requested() {
                return CycleOutcome::Stopped;
            }
            self.emit().await
        } else {
            if stop.is_requested() {
                return CycleOutcome::Stopped;
            }
            self.sleep(self.config.backoff_ms_value()).await;
            CycleOutcome::Unassociated
        };

        if stop.is_requested() {
            return CycleOutcome::Stopped;
        }
        self.sleep(self.config.cycle_ms_value()).await;

        self.state = if self.link.is_associated() {
            EmitterState::ConnectedIdle
        } else {
            EmitterState::Disconnected
        };

        if stop.is_requested() {
            return CycleOutcome::Stopped;
        }
        outcome
    }

    async fn associate(&mut self) -> bool {
        self.state = EmitterState::Connecting;
        debug!("Associating with the network.");

        match self.link.associate().await {
            Ok(()) => {
                info!("Associated with the network.");
                self.state = EmitterState::ConnectedIdle;
                true
            }
            Err(e) => {
                warn!(
                    "Network association failed: {e:?}. Retrying in {} ms.",
                    self.config.backoff_ms_value()
                );
                self.state = EmitterState::Disconnected;
                false
            }
        }
    }

    async fn emit(&mut self) -> CycleOutcome {
        let authority = match self.endpoints.select() {
            Ok(authority) => String::from(authority),
            Err(e) => {
                error!("{e}");
                return CycleOutcome::Skipped;
            }
        };

        let uri = self.request(&authority);
        let len = match uri.try_write_into(&mut self.buffer) {
            Ok(len) => len,
            Err(e) => {
                error!("Request to `{authority}` skipped: {e}");
                return CycleOutcome::Skipped;
            }
        };
        let Ok(url) = core::str::from_utf8(&self.buffer[..len]) else {
            error!("Request to `{authority}` skipped: invalid request encoding.");
            return CycleOutcome::Skipped;
        };

        self.state = EmitterState::Sending;
        debug!("Sending `{url}`.");

        let outcome = match self.client.connect(&authority).await {
            Ok(()) => {
                let response = self.client.get(url).await;
                self.client.disconnect().await;
                classify(&authority, response)
            }
            Err(e) => {
                warn!("Unable to connect to `{authority}`: {e:?}");
                CycleOutcome::Failed
            }
        };

        self.state = EmitterState::ConnectedIdle;
        outcome
    }

    fn request(&mut self, authority: &str) -> Uri {
        let base = format!("{}{authority}", self.config.scheme_value());
        let mut uri =
            Uri::new(&base, self.config.path_value()).encoding(self.config.encoding_value());

        uri.add_param("device_type", self.config.device_type_value());
        uri.add_param("device_model", self.config.device_model_value());
        if let Some(device_id) = self.config.device_id_value() {
            uri.add_param("device_id", device_id);
        }
        self.sampler.sample(&mut uri);

        uri
    }

    async fn sleep(&mut self, ms: u32) {
        self.state = EmitterState::Sleeping;
        self.delay.delay_ms(ms).await;
    }
}

fn classify<E: Debug>(
    authority: &str,
    response: core::result::Result<HttpResponse, E>,
) -> CycleOutcome {
    match response {
        Ok(response) if response.is_ok() => {
            info!("Report delivered to `{authority}`: {}", response.body);
            CycleOutcome::Delivered
        }
        Ok(response) => {
            warn!(
                "Report rejected by `{authority}` with status {}.",
                response.status
            );
            CycleOutcome::Rejected(response.status)
        }
        Err(e) => {
            warn!("Request to `{authority}` failed: {e:?}");
            CycleOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::collections::VecDeque;
    use alloc::string::String;
    use alloc::vec::Vec;

    use embedded_hal_async::delay::DelayNs;

    use serde::Deserialize;

    use crate::capability::tests::FakeBank;
    use crate::capability::{AppSystemInterface, IoMask};
    use crate::config::EmitterConfig;
    use crate::endpoint::EndpointSet;
    use crate::error::ErrorKind;
    use crate::identity::DeviceUuid;
    use crate::task::StopFlag;
    use crate::uri::{QueryEncoding, Uri};

    use super::{
        ChannelSampler, CycleOutcome, Emitter, EmitterState, HttpClient, HttpResponse, Link,
        Sampler,
    };

    #[derive(Default)]
    struct FakeLink {
        associated: bool,
        failures: usize,
        attempts: usize,
    }

    impl Link for FakeLink {
        type Error = &'static str;

        fn is_associated(&self) -> bool {
            self.associated
        }

        async fn associate(&mut self) -> Result<(), Self::Error> {
            self.attempts += 1;
            if self.failures > 0 {
                self.failures -= 1;
                return Err("Access point not found");
            }
            self.associated = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeClient {
        unreachable: bool,
        responses: VecDeque<Result<HttpResponse, &'static str>>,
        connections: Vec<String>,
        requests: Vec<String>,
        disconnections: usize,
    }

    impl FakeClient {
        fn replying(responses: impl IntoIterator<Item = Result<HttpResponse, &'static str>>) -> Self {
            Self {
                responses: responses.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl HttpClient for FakeClient {
        type Error = &'static str;

        async fn connect(&mut self, authority: &str) -> Result<(), Self::Error> {
            if self.unreachable {
                return Err("Connection refused");
            }
            self.connections.push(authority.into());
            Ok(())
        }

        async fn get(&mut self, url: &str) -> Result<HttpResponse, Self::Error> {
            self.requests.push(url.into());
            self.responses
                .pop_front()
                .unwrap_or(Ok(HttpResponse::new(200, "{}")))
        }

        async fn disconnect(&mut self) {
            self.disconnections += 1;
        }
    }

    // Records every sleep, and raises the stop flag after `stop_after`
    // sleeps when one is given.
    #[derive(Default)]
    struct RecordingDelay<'a> {
        sleeps: Vec<u32>,
        stop: Option<(&'a StopFlag, usize)>,
    }

    impl RecordingDelay<'_> {
        fn record(&mut self, ms: u32) {
            self.sleeps.push(ms);
            if let Some((stop, after)) = self.stop {
                if self.sleeps.len() >= after {
                    stop.request();
                }
            }
        }
    }

    impl DelayNs for RecordingDelay<'_> {
        async fn delay_ns(&mut self, ns: u32) {
            self.record(ns / 1_000_000);
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.record(ms);
        }
    }

    fn endpoints() -> EndpointSet {
        EndpointSet::new()
            .endpoint("10.0.0.5", 9050)
            .endpoint("10.0.0.2", 9050)
    }

    fn readings(uri: &mut Uri) {
        uri.add_param("a0", "512");
        uri.add_param("d4", "1");
    }

    fn associated() -> FakeLink {
        FakeLink {
            associated: true,
            ..FakeLink::default()
        }
    }

    #[test]
    fn empty_endpoints_are_rejected() {
        let error = Emitter::new(
            EmitterConfig::default(),
            EndpointSet::new(),
            FakeLink::default(),
            FakeClient::default(),
            readings,
            RecordingDelay::default(),
        )
        .map(|_| ())
        .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::EmptyEndpointSet);
    }

    #[tokio::test]
    async fn deliver_report() {
        let config = EmitterConfig::new("ArduinoSimple8266", "generic8266");
        let mut emitter = Emitter::new(
            config,
            endpoints(),
            associated(),
            FakeClient::default(),
            readings,
            RecordingDelay::default(),
        )
        .unwrap();
        assert_eq!(emitter.state(), EmitterState::Disconnected);

        assert_eq!(emitter.run_cycle().await, CycleOutcome::Delivered);

        assert_eq!(emitter.cycles(), 1);
        assert_eq!(emitter.state(), EmitterState::ConnectedIdle);
        assert_eq!(emitter.client.connections, ["10.0.0.2:9050"]);
        assert_eq!(
            emitter.client.requests,
            ["http://10.0.0.2:9050/?a0=512&d4=1&device_model=generic8266&device_type=ArduinoSimple8266"]
        );
        assert_eq!(emitter.client.disconnections, 1);
        assert_eq!(emitter.delay.sleeps, [1000]);
        assert_eq!(emitter.link.attempts, 0);
    }

    #[tokio::test]
    async fn device_identifier_is_reported() {
        let uuid = DeviceUuid::from_mac([0xA4, 0xCF, 0x12, 0x00, 0x01, 0x02]);
        let config = EmitterConfig::new("esp32c3", "generic").device_id(&uuid);
        let mut emitter = Emitter::new(
            config,
            endpoints(),
            associated(),
            FakeClient::default(),
            |_: &mut Uri| {},
            RecordingDelay::default(),
        )
        .unwrap();

        assert_eq!(emitter.run_cycle().await, CycleOutcome::Delivered);
        assert_eq!(
            emitter.client.requests,
            ["http://10.0.0.2:9050/?device_id=A4CF12000102&device_model=generic&device_type=esp32c3"]
        );
    }

    #[tokio::test]
    async fn association_failure_backs_off_and_retries() {
        let link = FakeLink {
            failures: 1,
            ..FakeLink::default()
        };
        let mut emitter = Emitter::new(
            EmitterConfig::default(),
            endpoints(),
            link,
            FakeClient::default(),
            readings,
            RecordingDelay::default(),
        )
        .unwrap();

        assert_eq!(emitter.run_cycle().await, CycleOutcome::Unassociated);
        assert_eq!(emitter.state(), EmitterState::Disconnected);
        // Backoff, then the regular cycle sleep.
        assert_eq!(emitter.delay.sleeps, [2000, 1000]);
        assert!(emitter.client.requests.is_empty());

        // The loop keeps going and associates on the next cycle.
        assert_eq!(emitter.run_cycle().await, CycleOutcome::Delivered);
        assert_eq!(emitter.state(), EmitterState::ConnectedIdle);
        assert_eq!(emitter.link.attempts, 2);
        assert_eq!(emitter.delay.sleeps, [2000, 1000, 1000]);
        assert_eq!(emitter.client.requests.len(), 1);
    }

    #[tokio::test]
    async fn failed_requests_are_discarded() {
        let client = FakeClient::replying([
            Ok(HttpResponse::new(500, "Internal Server Error")),
            Err("Connection reset"),
            Ok(HttpResponse::new(200, r#"{"status":"ok"}"#)),
        ]);
        let mut emitter = Emitter::new(
            EmitterConfig::default().cycle_ms(10),
            endpoints(),
            associated(),
            client,
            readings,
            RecordingDelay::default(),
        )
        .unwrap();

        assert_eq!(emitter.run_cycle().await, CycleOutcome::Rejected(500));
        assert_eq!(emitter.run_cycle().await, CycleOutcome::Failed);
        assert_eq!(emitter.run_cycle().await, CycleOutcome::Delivered);

        // No retries within a cycle, and the connection is always closed.
        assert_eq!(emitter.client.requests.len(), 3);
        assert_eq!(emitter.client.disconnections, 3);
        assert_eq!(emitter.delay.sleeps, [10, 10, 10]);
    }

    #[tokio::test]
    async fn unreachable_collector() {
        let client = FakeClient {
            unreachable: true,
            ..FakeClient::default()
        };
        let mut emitter = Emitter::new(
            EmitterConfig::default(),
            endpoints(),
            associated(),
            client,
            readings,
            RecordingDelay::default(),
        )
        .unwrap();

        assert_eq!(emitter.run_cycle().await, CycleOutcome::Failed);
        assert!(emitter.client.requests.is_empty());
        assert_eq!(emitter.client.disconnections, 0);
        assert_eq!(emitter.state(), EmitterState::ConnectedIdle);
    }

    #[tokio::test]
    async fn oversized_request_is_skipped() {
        let mut emitter = Emitter::new(
            EmitterConfig::default().buffer_size(16),
            endpoints(),
            associated(),
            FakeClient::default(),
            readings,
            RecordingDelay::default(),
        )
        .unwrap();

        assert_eq!(emitter.run_cycle().await, CycleOutcome::Skipped);
        assert!(emitter.client.connections.is_empty());
        assert_eq!(emitter.delay.sleeps, [1000]);
    }

    #[tokio::test]
    async fn percent_encoded_request() {
        let config = EmitterConfig::new("node a&b", "generic").encoding(QueryEncoding::Percent);
        let mut emitter = Emitter::new(
            config,
            EndpointSet::new().endpoint("collector.local", 80),
            associated(),
            FakeClient::default(),
            |_: &mut Uri| {},
            RecordingDelay::default(),
        )
        .unwrap();

        assert_eq!(emitter.run_cycle().await, CycleOutcome::Delivered);
        assert_eq!(
            emitter.client.requests,
            ["http://collector.local:80/?device_model=generic&device_type=node%20a%26b"]
        );
    }

    #[tokio::test]
    async fn stop_request_ends_the_loop() {
        let stop = StopFlag::new();
        let delay = RecordingDelay {
            sleeps: Vec::new(),
            stop: Some((&stop, 3)),
        };
        let mut emitter = Emitter::new(
            EmitterConfig::default(),
            endpoints(),
            associated(),
            FakeClient::default(),
            readings,
            delay,
        )
        .unwrap();

        emitter.run(&stop).await;

        assert_eq!(emitter.cycles(), 3);
        assert_eq!(emitter.client.requests.len(), 3);
        assert_eq!(emitter.delay.sleeps.len(), 3);
    }

    #[tokio::test]
    async fn stop_requested_before_start() {
        let stop = StopFlag::new();
        stop.request();

        let mut emitter = Emitter::new(
            EmitterConfig::default(),
            endpoints(),
            FakeLink::default(),
            FakeClient::default(),
            readings,
            RecordingDelay::default(),
        )
        .unwrap();

        emitter.run(&stop).await;

        assert_eq!(emitter.cycles(), 0);
        assert_eq!(emitter.link.attempts, 0);
    }

    #[test]
    fn channel_sampler() {
        let bank = FakeBank::default();
        bank.analog.borrow_mut()[0] = 512;
        bank.inputs.borrow_mut()[4] = true;

        // Channel 6 is masked out.
        let app = AppSystemInterface::new(bank, IoMask::new(0b11_0001, 0), 0);
        let mut sampler = ChannelSampler::new(&app).analog(0).analog(6).digital(4).digital(5);

        let mut uri = Uri::new("http://host", "/");
        sampler.sample(&mut uri);

        assert_eq!(uri.param("a0"), Some("512"));
        assert_eq!(uri.param("a6"), None);
        assert_eq!(uri.param("d4"), Some("1"));
        assert_eq!(uri.param("d5"), Some("0"));
    }

    #[test]
    fn json_response() {
        #[derive(Deserialize)]
        struct Ack {
            status: String,
        }

        let response = HttpResponse::new(200, r#"{"status":"ok"}"#);
        assert!(response.is_ok());
        assert_eq!(response.json::<Ack>().unwrap().status, "ok");

        let response = HttpResponse::new(404, "Not Found");
        assert!(!response.is_ok());
        assert_eq!(
            response.json::<Ack>().map(|_| ()).unwrap_err().kind(),
            ErrorKind::InvalidResponse
        );
    }
}
