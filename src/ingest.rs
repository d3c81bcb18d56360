//! Material submission.
//!
//! Validation and persistence happen before `submit_material` returns; the
//! actual fetch runs later on a dispatcher worker. Transient fetch problems
//! therefore never reach the caller.

use anyhow::Result;
use thiserror::Error;
use tokio::sync::oneshot;

use finsight_core::error::{StoreError, ValidationError};
use finsight_core::models::{utc_now, Material, NewMaterial, StatusFields};
use finsight_core::status::MaterialStatus;

use crate::config::Config;
use crate::dispatcher::DispatchError;
use crate::pipeline::{AttemptOutcome, IngestJob};
use crate::runtime::{Runtime, Services};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validates, persists and enqueues a new material.
///
/// When the queue has no room the material is kept, marked `Failed` with
/// the admission error, and [`DispatchError::QueueFull`] is returned.
pub async fn submit_material(
    services: &Services,
    request: NewMaterial,
) -> Result<Material, SubmitError> {
    let (material, _) = enqueue(services, request, false).await?;
    Ok(material)
}

/// Like [`submit_material`], but also returns a receiver for the attempt's
/// outcome.
pub async fn submit_and_watch(
    services: &Services,
    request: NewMaterial,
) -> Result<(Material, oneshot::Receiver<AttemptOutcome>), SubmitError> {
    let (material, rx) = enqueue(services, request, true).await?;
    match rx {
        Some(rx) => Ok((material, rx)),
        None => Err(SubmitError::Dispatch(DispatchError::Closed)),
    }
}

async fn enqueue(
    services: &Services,
    request: NewMaterial,
    watch: bool,
) -> Result<(Material, Option<oneshot::Receiver<AttemptOutcome>>), SubmitError> {
    let material = request.into_material(utc_now())?;
    services.materials.insert(&material).await?;
    tracing::info!(
        material_id = %material.id,
        source = material.source.kind().as_str(),
        location = material.source.location(),
        "material submitted"
    );

    let (job, rx) = if watch {
        let (job, rx) = IngestJob::initial(material.id).with_completion();
        (job, Some(rx))
    } else {
        (IngestJob::initial(material.id), None)
    };

    if let Err(err) = services.dispatcher.submit(job).await {
        services
            .materials
            .update_status(
                material.id,
                MaterialStatus::Failed,
                StatusFields {
                    last_error: Some(Some(err.to_string())),
                    ..Default::default()
                },
            )
            .await?;
        return Err(err.into());
    }

    Ok((material, rx))
}

/// `finsight submit`: submits one material and waits for its attempt to
/// finish.
pub async fn run_submit(config: &Config, request: NewMaterial) -> Result<()> {
    let runtime = Runtime::start(config).await?;
    let services = runtime.services.clone();

    let (material, rx) = submit_and_watch(&services, request).await?;
    println!("Submitted {} ({})", material.id, material.title);
    let outcome = rx.await;
    let material = services.materials.get(material.id).await?;
    runtime.shutdown().await;

    println!("status: {}", material.status);
    println!("attempts: {}", material.attempts);
    if let Some(fp) = &material.content_fingerprint {
        println!("fingerprint: {}", fp);
    }
    if let Some(err) = &material.last_error {
        println!("error: {}", err);
    }
    if outcome.is_err() {
        anyhow::bail!("ingestion did not report an outcome");
    }
    Ok(())
}
