use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vigil::config::Args;
use vigil::monitor::{StatusProbe, StreamlinkProbe};
use vigil::notification::{DiscordChannel, DiscordConfig, NotificationSink, Notifier};
use vigil::recorder::Recorder;
use vigil::scheduler::{Scheduler, cancel_on_signal, exit_code_for_signal};
use vigil::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let settings = Args::parse().into_settings()?;

    let (logging_config, _guard) = logging::init_logging(&settings.log_dir)?;
    panic_hook::install(&settings.log_dir);

    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.child_token());

    log_tool_versions(&settings.recorder.streamlink_path, &settings.recorder.ffmpeg_path).await;
    info!(
        target_url = %settings.recorder.target_url,
        target_stream = %settings.recorder.target_stream,
        output_dir = %settings.recorder.output_root.display(),
        "vigil starting"
    );

    let sink: Option<Arc<dyn NotificationSink>> = match &settings.discord_webhook {
        Some(url) => match DiscordChannel::new(DiscordConfig::new(url.clone())) {
            Ok(channel) => Some(Arc::new(channel)),
            Err(e) => {
                warn!(error = %e, "Discord notifications disabled");
                None
            }
        },
        None => None,
    };

    let probe: Arc<dyn StatusProbe> = Arc::new(StreamlinkProbe::new(
        settings.recorder.streamlink_path.clone(),
        settings.recorder.target_url.clone(),
        settings.recorder.extra_args.clone(),
    ));
    let recorder = Recorder::new(settings.recorder, Notifier::new(sink));
    let mut scheduler = Scheduler::new(probe, settings.monitor, settings.check_interval, recorder);

    let signal_listener = tokio::spawn(cancel_on_signal(shutdown.clone()));
    scheduler.run(&shutdown).await;
    shutdown.cancel();

    let signal = match signal_listener.await {
        Ok(Ok(signal)) => signal,
        Ok(Err(e)) => {
            error!(error = %e, "failed to listen for shutdown signals");
            None
        }
        Err(e) => {
            error!(error = %e, "signal listener task failed");
            None
        }
    };

    info!("vigil stopped");
    let code = signal.map_or(0, exit_code_for_signal);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

async fn log_tool_versions(streamlink_path: &str, ffmpeg_path: &str) {
    for (program, flag) in [(streamlink_path, "--version"), (ffmpeg_path, "-version")] {
        match process_utils::tool_version(program, &[flag]).await {
            Some(version) => info!(program, %version, "found tool"),
            None => warn!(program, "tool not found or printed no version"),
        }
    }
}
