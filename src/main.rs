use color_eyre::{eyre::eyre, Result};
use fertigation_link::commands::CommandPublisher;
use fertigation_link::config::AppConfig;
use fertigation_link::irrigation::{plan_for_all_lands, sensor_handler};
use fertigation_link::mqtt::mqtt_handler::MqttConnector;
use fertigation_link::mqtt::router::InboundMessage;
use fertigation_link::mqtt::topics::Channel;
use fertigation_link::persistence::plan_file::PlanFile;
use fertigation_link::session::{Identity, StaticSession};
use fertigation_link::supervisor::ConnectionSupervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const USER_ID_ENV: &str = "FERTIGATION_USER_ID";
const PLAN_ENV: &str = "FERTIGATION_PLAN";

type Supervisor = ConnectionSupervisor<MqttConnector, Arc<StaticSession>>;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = AppConfig::load().await?;
    let session = Arc::new(StaticSession::new(identity_from_env()));
    if session.current().is_none() {
        warn!("{} is not set, the link stays offline", USER_ID_ENV);
    }

    let supervisor: Supervisor =
        ConnectionSupervisor::new(MqttConnector, session, config.supervisor_settings());
    info!(
        "Broker {} with topic prefix {}",
        config.broker.endpoint().url(),
        supervisor.topics().prefix()
    );

    let _status = supervisor.on_connection_change(|connected| {
        if connected {
            info!("Device link online");
        } else {
            warn!("Device link offline");
        }
    });

    supervisor.subscribe(
        Channel::Sensor,
        sensor_handler(|reading| info!("Sensor reading: {:?}", reading)),
    );
    supervisor.subscribe(
        Channel::System,
        |message: &InboundMessage| -> color_eyre::Result<()> {
            info!("System message: {}", message);
            Ok(())
        },
    );

    if !supervisor.connect().await {
        warn!("Initial connection failed, retrying in the background");
    }

    if let Some(path) = std::env::var_os(PLAN_ENV).map(PathBuf::from) {
        push_plan(&supervisor, path).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
    info!("Shutting down");
    supervisor.disconnect();

    Ok(())
}

fn identity_from_env() -> Option<Identity> {
    std::env::var(USER_ID_ENV)
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .map(Identity::new)
}

async fn push_plan(supervisor: &Supervisor, path: PathBuf) -> Result<()> {
    let store = PlanFile::load(path).await?;
    let configs = plan_for_all_lands(&store).await?;

    if !supervisor.is_connected() {
        warn!(
            "Not connected, skipping {} irrigation config(s)",
            configs.len()
        );
        return Ok(());
    }

    let publisher = CommandPublisher::new(supervisor.clone());
    if !publisher.send_batch(&configs) {
        warn!("Irrigation plan was not delivered");
    }
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
