use bitx_stream::StreamError;
use bitx_stream::config::fetch_config;
use bitx_stream::credentials::populate_env_from_keychain;
use bitx_stream::dispatch::DeliveryMode;
use bitx_stream::session::{SessionBuilder, SessionState};
use bitx_stream::snapshot::RestSnapshotFetcher;
use bitx_stream::websocket::WsConnector;
use tracing::info;

fn main() -> Result<(), StreamError> {
    tracing_subscriber::fmt::init();

    populate_env_from_keychain();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| StreamError::Config(format!("failed to start runtime: {e}")))?;
    runtime.block_on(run())
}

async fn run() -> Result<(), StreamError> {
    let config = fetch_config()?;
    let pair = config.pair.clone();

    let connector = WsConnector::new(&config.stream_url, config.credentials.clone());
    let snapshots = RestSnapshotFetcher::new(
        &config.api_url,
        config.credentials.clone(),
        config.snapshot_timeout(),
    )?;

    let session = SessionBuilder::new(config)
        .on_status(|state| info!(state = %state, "Status"))
        .spawn(connector, snapshots)?;

    let store = session.store();
    session.subscribe(DeliveryMode::Deltas, move |_| {
        if let Some(book) = store.view() {
            info!(
                sequence = book.sequence,
                best_bid = ?book.best_bid().map(|o| o.price),
                best_ask = ?book.best_ask().map(|o| o.price),
                spread = ?book.spread(),
                "Book updated"
            );
        }
    });

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        state = session.wait_for_state(SessionState::Terminated) => {
            info!(state = %state, "Session ended");
            false
        }
    };

    if interrupted {
        info!(pair = %pair, "Interrupted, shutting down");
        session.shutdown().await
    } else {
        session.join().await
    }
}
