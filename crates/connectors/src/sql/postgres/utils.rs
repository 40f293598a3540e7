use crate::error::ConnectorError;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::future::Future;
use tokio_postgres::{Client, Config, NoTls, config::SslMode};
use tracing::{error, warn};

const APPLICATION_NAME: &str = "timeout-migrate";

/// Connects honouring the `sslmode` of `url`; `prefer` falls back to plain text.
pub(crate) async fn connect_client(url: &str) -> Result<Client, ConnectorError> {
    let mut config = url
        .parse::<Config>()
        .map_err(|e| ConnectorError::InvalidUrl(e.to_string()))?;
    if config.get_application_name().is_none() {
        config.application_name(APPLICATION_NAME);
    }

    match config.get_ssl_mode() {
        SslMode::Disable => connect_plain(&config).await,
        SslMode::Prefer => match connect_tls(&config).await {
            Ok(client) => Ok(client),
            Err(error) => {
                warn!(%error, "Postgres TLS handshake failed, retrying without TLS");
                connect_plain(&config).await
            }
        },
        _ => connect_tls(&config).await,
    }
}

async fn connect_tls(config: &Config) -> Result<Client, ConnectorError> {
    let tls = MakeTlsConnector::new(TlsConnector::builder().build()?);
    let (client, connection) = config.connect(tls).await?;
    drive(connection);
    Ok(client)
}

async fn connect_plain(config: &Config) -> Result<Client, ConnectorError> {
    let (client, connection) = config.connect(NoTls).await?;
    drive(connection);
    Ok(client)
}

/// The connection future performs the actual I/O and must be polled for the
/// client to make progress.
fn drive<F>(connection: F)
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
}
