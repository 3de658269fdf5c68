use anyhow::Context;
use tracing::{error, info};
use uploader::config::{init_config, DEFAULT_CONFIG_FILE};
use uploader::{EventKind, UploadManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uploader=info".into()),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = init_config(&config_path).with_context(|| format!("loading {}", config_path))?;
    let job = config
        .upload
        .clone()
        .context("no [upload] section in config")?;

    let handle = UploadManager::new(config.manager.clone())?;
    let manager = handle.manager.clone();
    info!(version = manager.version(), "uploader started");

    // 先订阅，上次运行留下的终态事件会先到达
    let mut events = manager.subscribe().await?;
    let upload_id = manager
        .start_upload(&job.file_path, &job.endpoint, job.options)
        .await
        .with_context(|| format!("starting upload of {}", job.file_path))?;

    let mut outcome = Ok(());
    while let Some(event) = events.recv().await {
        match &event.kind {
            EventKind::Uploading { percent } if event.id == upload_id => {
                info!(upload_id = %event.id, "uploading {:.1}%", percent);
            }
            EventKind::Uploading { .. } => {}
            EventKind::Completed { status_code } => {
                info!(upload_id = %event.id, status_code, "upload completed");
            }
            EventKind::Failed { error, status_code } => {
                error!(upload_id = %event.id, status_code, "upload failed: {}", error);
                if event.id == upload_id {
                    outcome = Err(anyhow::anyhow!("upload failed: {}", error));
                }
            }
        }

        if event.is_terminal() {
            if let Some(event_id) = &event.event_id {
                manager.acknowledge_event(event_id).await?;
            }
            if event.id == upload_id {
                break;
            }
        }
    }

    drop(manager);
    handle.shutdown().await?;
    outcome
}
