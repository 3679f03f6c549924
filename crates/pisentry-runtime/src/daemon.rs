//! Wires every component together and waits for shutdown.

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::oneshot;

use pisentry_core::{Clock, SystemClock};
use pisentry_net::{
    ArpScanProbe, NetError, NetworkContext, PacketCapture, TcpdumpCapture, build_capture_filter,
};

use crate::alarm::AlarmStateMachine;
use crate::camera::{Camera, CaptureLock, CommandCamera};
use crate::commands::{CommandListener, run_command_loop};
use crate::config::Config;
use crate::notifier::TelegramNotifier;
use crate::pipeline::CapturePipeline;
use crate::presence::{PresenceListener, PresenceMonitor};
use crate::store::ChannelStore;
use crate::supervisor::MotionSupervisor;
use crate::telegram::TelegramClient;

/// Run the monitor until ctrl-c / SIGTERM, or until packet capture dies.
pub async fn run_daemon(
    config: Config,
    data_file: &Path,
    ctx: NetworkContext,
) -> anyhow::Result<()> {
    let trusted = config.trusted_macs()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let presence = Arc::new(PresenceMonitor::new(
        trusted.clone(),
        clock,
        config.packet_timeout(),
    ));
    let alarm = Arc::new(AlarmStateMachine::new(Arc::clone(&presence)));

    let store = Arc::new(ChannelStore::load(data_file));
    if store.get().is_none() {
        tracing::warn!("no operator channel yet; send the bot a message to register");
    }
    let client = Arc::new(TelegramClient::new(&config.telegram.bot_token)?);
    let notifier = Arc::new(TelegramNotifier::new(Arc::clone(&client), Arc::clone(&store)));
    let camera = Arc::new(CommandCamera::new(config.camera_config()?));
    let lock = CaptureLock::new();
    let probe = Arc::new(ArpScanProbe::new(ctx.managed_interface.clone()));

    let (pipeline, queue) = CapturePipeline::new(
        Arc::clone(&alarm),
        probe,
        Arc::clone(&notifier),
        ctx.network.network().to_string(),
        config.confirm_policy(),
    );
    let supervisor = MotionSupervisor::new(
        Arc::clone(&camera),
        Arc::clone(&alarm),
        lock.clone(),
        queue,
        config.capture_settings(),
    );
    let listener = CommandListener::new(
        Arc::clone(&alarm),
        store,
        notifier,
        Arc::clone(&camera),
        lock,
        config.camera.capture_length,
    );

    // Packet capture blocks a whole thread for its lifetime and cannot be
    // cancelled, so it lives outside the runtime's blocking pool.
    let filter = build_capture_filter(&trusted, &ctx.own_mac);
    tracing::debug!("capture filter: {filter}");
    let capture = TcpdumpCapture::new(ctx.monitor_interface.clone());
    let sightings = PresenceListener::new(presence, Arc::clone(&alarm));
    let (capture_tx, capture_rx) = oneshot::channel::<Result<(), NetError>>();
    std::thread::Builder::new()
        .name("packet-capture".to_string())
        .spawn(move || {
            let result = capture.run(&filter, &mut |mac, at| sightings.on_observed(mac, at));
            let _ = capture_tx.send(result);
        })?;

    let pipeline_handle = tokio::spawn(pipeline.run());
    let supervisor_handle = tokio::spawn(supervisor.run());
    let command_handle = tokio::spawn(run_command_loop(client, listener));

    tracing::info!(
        "monitoring {} for {} trusted device(s), alarm is {}",
        ctx.monitor_interface,
        trusted.len(),
        alarm.current()
    );

    let outcome = tokio::select! {
        result = shutdown_signal() => result,
        result = capture_rx => match result {
            Ok(Err(e)) => Err(anyhow!("packet capture failed: {e}")),
            Ok(Ok(())) => Err(anyhow!("packet capture ended")),
            Err(_) => Err(anyhow!("packet capture thread panicked")),
        },
        _ = pipeline_handle => Err(anyhow!("capture pipeline exited unexpectedly")),
        _ = supervisor_handle => Err(anyhow!("motion supervisor exited unexpectedly")),
        _ = command_handle => Err(anyhow!("command listener exited unexpectedly")),
    };

    if let Err(e) = camera.stop_motion_analysis() {
        tracing::warn!("failed to stop motion analysis: {e}");
    }
    match &outcome {
        Ok(()) => tracing::info!("pisentry stopped"),
        Err(e) => tracing::error!("{e}"),
    }
    outcome
}

/// Wait for ctrl-c or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}
