//! Unit firmware binary.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    use std::time::Duration;

    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;

    use unit_foundation::config::ConfigManager;
    use unit_foundation::portal::{HttpPortal, PortalManager};
    use unit_foundation::storage::nvs::NvsStore;
    use unit_foundation::wifi::esp::EspRadio;
    use unit_foundation::wifi::{WifiManager, WifiOptions};
    use unit_foundation::{
        boot, BootOutcome, BootTimeouts, SharedConfig, SystemEvents, SystemSignal,
    };

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("unit firmware starting");

    let peripherals = Peripherals::take().expect("peripherals already taken");
    let sysloop = EspSystemEventLoop::take().expect("system event loop");

    let shared = SharedConfig::new();
    let system = SystemEvents::new();

    // The NVS partition is claimed lazily when the config manager opens
    // the store.
    let config = ConfigManager::create(
        Box::new(NvsStore::new()),
        shared.clone(),
        system.clone(),
    );

    let modem = peripherals.modem;
    let wifi = WifiManager::create(
        move |sink| {
            EspRadio::new(modem, sysloop, sink)
                .map(|radio| Box::new(radio) as Box<dyn unit_foundation::wifi::Radio>)
        },
        shared.clone(),
        system.clone(),
        WifiOptions::default(),
    )
    .expect("radio bring-up failed");

    let portal_service = HttpPortal::new(
        format!("0.0.0.0:{}", unit_foundation::portal::http::DEFAULT_PORTAL_PORT),
        shared.clone(),
        config.clone(),
        system.clone(),
        Duration::from_secs(10),
    );
    let portal = PortalManager::create(Box::new(portal_service));

    match boot(&config, &wifi, &portal, BootTimeouts::default()) {
        BootOutcome::Online => log::info!("unit online"),
        BootOutcome::Portal => log::info!("recovery portal active, waiting for operator"),
    }

    loop {
        if system
            .wait(SystemSignal::RebootRequested, Duration::from_secs(60))
            .is_reached()
        {
            log::warn!("rebooting on operator request");
            unsafe { esp_idf_sys::esp_restart() };
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo test' for host testing.");
}
