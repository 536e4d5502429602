pub mod http_client;
#[cfg(feature = "db")]
pub mod libsql_sink;
#[cfg(feature = "postgres")]
pub mod postgres_sink;
pub mod sqlite_sink;

use crate::app::ports::SinkPort;
use crate::config::DestinationConfig;
use crate::constants;
use crate::error::{EtlError, Result};
use std::sync::Arc;
use tracing::info;

pub use http_client::ReqwestHttp;
pub use sqlite_sink::SqliteSink;

/// Build the sink named by `destination.protocol`.
pub async fn open_sink(destination: &DestinationConfig) -> Result<Arc<dyn SinkPort>> {
    info!(
        destination = %destination.redacted_connection_string(),
        "Opening destination"
    );
    match destination.protocol.as_str() {
        constants::SQLITE_PROTOCOL => Ok(Arc::new(SqliteSink::new(&destination.database))),
        #[cfg(feature = "postgres")]
        constants::POSTGRES_PROTOCOL => Ok(Arc::new(postgres_sink::PostgresSink::new(destination)?)),
        #[cfg(not(feature = "postgres"))]
        constants::POSTGRES_PROTOCOL => Err(EtlError::Config(
            "the postgresql destination requires the `postgres` feature".to_string(),
        )),
        #[cfg(feature = "db")]
        constants::LIBSQL_PROTOCOL => {
            let url = format!("libsql://{}", destination.host);
            let sink = libsql_sink::LibsqlSink::connect(&url, &destination.password).await?;
            Ok(Arc::new(sink))
        }
        #[cfg(not(feature = "db"))]
        constants::LIBSQL_PROTOCOL => Err(EtlError::Config(
            "the libsql destination requires the `db` feature".to_string(),
        )),
        other => Err(EtlError::Config(format!(
            "unsupported destination protocol '{other}' (this build supports: {})",
            constants::get_supported_protocols().join(", ")
        ))),
    }
}
