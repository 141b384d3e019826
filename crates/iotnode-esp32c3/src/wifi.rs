use esp_hal::peripherals::WIFI;

use esp_radio::Controller;
use esp_radio::wifi::{self, ClientConfig, ModeConfig, WifiController, WifiDevice};

use embassy_net::Stack;
use embassy_time::{Duration, with_timeout};

use log::{info, warn};

use iotnode::emitter::Link;
use iotnode::identity::DeviceUuid;

use crate::error::{Error, ErrorKind, Result};
use crate::mk_static;

// Time to wait for a DHCP lease after the association.
const DHCP_TIMEOUT_SECONDS: u64 = 15;

/// The `Wi-Fi` controller.
pub struct Wifi {
    controller: WifiController<'static>,
    device: WifiDevice<'static>,
}

impl Wifi {
    /// Configures the `Wi-Fi` controller as a client of the given
    /// access point.
    ///
    /// The controller is neither started nor associated.
    ///
    /// # Errors
    ///
    /// - Empty `SSID`
    /// - Failure to initialize the radio
    /// - Failure to configure the controller
    pub fn configure(peripheral: WIFI<'static>, ssid: &str, password: &str) -> Result<Self> {
        if ssid.is_empty() {
            return Err(Error::new(
                ErrorKind::Wifi,
                "Missing access point SSID, set it in the `cfg.toml` file.",
            ));
        }

        let radio = mk_static!(Controller<'static>, esp_radio::init()?);
        let (mut controller, interfaces) = wifi::new(radio, peripheral, wifi::Config::default())?;

        let config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(ssid.into())
                .with_password(password.into()),
        );
        controller.set_config(&config)?;

        info!("Wi-Fi configured for the access point `{ssid}`.");

        Ok(Self {
            controller,
            device: interfaces.sta,
        })
    }

    /// Returns the [`DeviceUuid`] derived from the station `MAC` address.
    #[must_use]
    pub fn uuid(&self) -> DeviceUuid {
        DeviceUuid::from_mac(self.device.mac_address())
    }

    /// Returns the controller and the station interface.
    #[must_use]
    pub fn into_parts(self) -> (WifiController<'static>, WifiDevice<'static>) {
        (self.controller, self.device)
    }
}

/// A [`Link`] over the `Wi-Fi` controller.
///
/// A link is associated when the controller is connected and the network
/// stack owns an address.
pub struct WifiLink {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl WifiLink {
    /// Creates a [`WifiLink`] from a controller and the network stack built
    /// on top of its station interface.
    #[must_use]
    pub const fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self { controller, stack }
    }

    /// Returns the network stack.
    #[must_use]
    pub const fn stack(&self) -> Stack<'static> {
        self.stack
    }
}

impl Link for WifiLink {
    type Error = Error;

    fn is_associated(&self) -> bool {
        matches!(self.controller.is_connected(), Ok(true)) && self.stack.is_config_up()
    }

    async fn associate(&mut self) -> Result<()> {
        if !matches!(self.controller.is_started(), Ok(true)) {
            info!("Starting Wi-Fi station.");
            self.controller.start_async().await?;
        }

        if !matches!(self.controller.is_connected(), Ok(true)) {
            self.controller.connect_async().await?;
        }

        if with_timeout(
            Duration::from_secs(DHCP_TIMEOUT_SECONDS),
            self.stack.wait_config_up(),
        )
        .await
        .is_err()
        {
            warn!("No DHCP lease within {DHCP_TIMEOUT_SECONDS} seconds, disconnecting.");
            let _ = self.controller.disconnect_async().await;
            return Err(Error::new(
                ErrorKind::Network,
                "The network stack has not been configured in time.",
            ));
        }

        if let Some(config) = self.stack.config_v4() {
            info!("Wi-Fi associated with address `{}`.", config.address.address());
        }

        Ok(())
    }
}
