//! The full-refresh synchronization worker. One run per invocation; the
//! supervisor schedules the cadence.
//!
//! ```text
//! quay-refreshd /log/quay/refreshd_gps.log "<localconnstr>10.0.0.1,quay,pw,idc,3306</localconnstr>\
//! <remoteconnstr>10.0.0.2,quay,pw,idc,3306</remoteconnstr><charset>utf8</charset>\
//! <fedtname>LK_ZHOBTCODE1</fedtname><remotetname>T_ZHOBTCODE1</remotetname>\
//! <localtname>T_ZHOBTCODE2</localtname><remotecols>obtid,cityname,lat,lon</remotecols>\
//! <localcols>stid,cityname,lat,lon</localcols><remotekeycol>obtid</remotekeycol>\
//! <localkeycol>stid</localkeycol><synctype>1</synctype><timeout>120</timeout><pname>refreshd_gps</pname>"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use quay_core::config::WorkerArgs;
use quay_sync::{RefreshConfig, RefreshSync};

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();
    quay_core::logging::init(&args.logfile)?;

    let config = RefreshConfig::from_params(&args.params).context("parsing parameters")?;
    let heartbeat = quay_server::heartbeat_or_disabled(
        config.hb_sock.as_deref(),
        &config.pname,
        config.timeout,
    )
    .await?;

    let worker = RefreshSync::new(config);
    let result = worker.run(&heartbeat).await;
    heartbeat.unregister().await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("refresh failed: {e}");
            Err(e.into())
        }
    }
}
