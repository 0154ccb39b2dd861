use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use rfidconfig::Config;
use rfidcontrol::{
    JsonCardRegistry, JsonDeviceRegistry, LineSource, MdnsBrowser, Player, PlayerContext,
    SessionManager, TlsCastConnector,
};
use rfidgpio::{GpioBoard, SerialCardReader};
use rfidplayer::api::{ApiState, router};
use rfidplayer::logs::init_logging;
use rfidplayer::{discovery_duration, gpio_pins, player_settings};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_config("")?;
    let log_state = init_logging(&config);
    info!(config_dir = %config.dir(), "Starting rfidplayer");

    // ========== PHASE 1 : Registries and receivers ==========
    let cards_file = config.resolve_data_file(&config.get_cards_file())?;
    let casts_file = config.resolve_data_file(&config.get_casts_file())?;
    let cards = Arc::new(JsonCardRegistry::open(&cards_file)?);
    let devices = Arc::new(JsonDeviceRegistry::open(&casts_file)?);

    let sweep = discovery_duration(&config);
    let session = Arc::new(SessionManager::new(
        devices,
        Arc::new(TlsCastConnector),
        Arc::new(MdnsBrowser::new()),
        sweep,
    ));
    let ctx = PlayerContext::new(cards.clone(), session.clone(), player_settings(&config));

    // ========== PHASE 2 : Hardware ==========
    info!("Opening hardware");
    let baud_rate = config.get_serial_baud_rate() as u32;
    let reader = SerialCardReader::open(&config.get_serial_device(), baud_rate)
        .context("card reader unavailable")?;
    let mut board = GpioBoard::open(gpio_pins(&config)).context("GPIO unavailable")?;
    let hardware = board.hardware(Arc::new(reader));
    let events = board.events().context("GPIO events unavailable")?;

    let shutdown = CancellationToken::new();
    let player = tokio::spawn(Player::new(ctx, hardware).run(events, shutdown.clone()));

    // ========== PHASE 3 : HTTP API ==========
    let address: IpAddr = config
        .get_http_address()
        .parse()
        .with_context(|| format!("invalid http address {}", config.get_http_address()))?;
    let listener = TcpListener::bind((address, config.get_http_port())).await?;
    info!(address = %listener.local_addr()?, "HTTP API listening");

    let app = router(ApiState {
        cards,
        session: session.clone(),
        discovery_duration: sweep,
        logs: log_state,
    });

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("Ctrl+C received, shutting down"),
                    Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
                },
                _ = stop.cancelled() => {}
            }
            stop.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = player.await {
        error!(error = %e, "Player task failed");
    }
    session.stop_session().await;
    info!("rfidplayer stopped");
    Ok(())
}
