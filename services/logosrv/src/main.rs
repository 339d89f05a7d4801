//! LOGO! MQTT bridge (logosrv)

use clap::Parser;
use tracing::info;

use common::shutdown::wait_for_shutdown;
use errors::BridgeResult;
use logosrv::core::bootstrap::{self, Args, ServiceArgs};
use logosrv::AppContext;

#[tokio::main]
async fn main() -> BridgeResult<()> {
    let args = Args::parse();
    let service_args: ServiceArgs = args.into();
    let service_info = bootstrap::service_info();

    bootstrap::initialize_logging(&service_args, &service_info)?;
    if !service_args.no_color {
        common::service_bootstrap::print_startup_banner(&service_info);
    }

    let config = match bootstrap::load_configuration(&service_args) {
        Ok(config) => config,
        Err(e) => {
            let err = e.into();
            bootstrap::report_error("Invalid configuration", &err);
            return Err(err);
        },
    };
    bootstrap::log_summary(&config);

    if service_args.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    let context = match AppContext::build(&config, &service_info) {
        Ok(context) => context,
        Err(e) => {
            let err = e.into();
            bootstrap::report_error("Failed to wire devices and MQTT clients", &err);
            return Err(err);
        },
    };
    context.connect().await;
    info!("Running, press Ctrl+C to exit");

    let signal = wait_for_shutdown().await;
    info!("Received {}, shutting down", signal);
    context.dispose().await;

    info!("Service shutdown complete");
    Ok(())
}
