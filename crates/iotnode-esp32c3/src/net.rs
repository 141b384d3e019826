use alloc::boxed::Box;

use esp_hal::rng::Rng;

use esp_radio::wifi::WifiDevice;

use embassy_executor::Spawner;
use embassy_net::{Config, DhcpConfig, Runner, Stack, StackResources};

use log::info;

use crate::error::Result;

#[embassy_executor::task]
async fn task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}

/// The network stack builder.
pub struct NetworkStack;

impl NetworkStack {
    /// Builds the network stack and spawns its runner task.
    ///
    /// The stack is configured through `DHCP` once the `Wi-Fi` link has
    /// been associated, so it does **not** own an address when returned.
    ///
    /// # Errors
    ///
    /// Failure to spawn the network stack task.
    pub fn build<const SOCKET_STACK_SIZE: usize>(
        rng: Rng,
        wifi_interface: WifiDevice<'static>,
        spawner: Spawner,
    ) -> Result<Stack<'static>> {
        let config = Config::dhcpv4(DhcpConfig::default());
        let seed = u64::from(rng.random()) << 32 | u64::from(rng.random());

        // A static cell cannot hold a const generic type.
        let resources = Box::leak(Box::new(StackResources::<SOCKET_STACK_SIZE>::new()));

        let (stack, runner) = embassy_net::new(wifi_interface, config, resources, seed);

        spawner.spawn(task(runner))?;

        info!("Network stack started with {SOCKET_STACK_SIZE} sockets.");

        Ok(stack)
    }
}
