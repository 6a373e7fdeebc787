use crate::error::*;
use tokio_postgres::Client;

/// Opens a client from the `DB_URL` environment variable.
///
/// The connection task is spawned onto the current tokio runtime and
/// logs its own failure. Callers open transactions on the returned
/// client and hand them to a [`Loader`](crate::Loader).
pub async fn connect() -> BulkResult<Client> {
    log::info!("connecting to database");
    let tls = tokio_postgres::tls::NoTls;
    let ref url = std::env::var("DB_URL").map_err(|_| BulkError::config("DB_URL must be set"))?;
    let (client, connection) = tokio_postgres::connect(url, tls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::error!("database connection closed: {}", e);
        }
    });
    client
        .execute("SET client_min_messages TO WARNING", &[])
        .await?;
    Ok(client)
}
