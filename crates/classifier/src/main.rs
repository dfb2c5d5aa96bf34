use anyhow::Context;
use classifier::{
    ClassifierConfig, ClassifierService, EfficientNetBackend, logging::setup_logging,
};
use common::TelemetryGuard;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClassifierConfig::from_env()?;

    let _telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init("food-classifier", endpoint))
        .transpose()?;

    setup_logging(&config);

    tracing::info!(
        config = ?config,
        "Loaded configuration"
    );

    let service = Arc::new(ClassifierService::<EfficientNetBackend>::new(&config));

    // Load eagerly so the first request does not pay for it
    service
        .load_with_timeout(config.load_timeout())
        .await
        .with_context(|| format!("failed to load model {}", config.model_path.display()))?;

    for path in std::env::args().skip(1) {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Error reading image file");
                continue;
            }
        };

        match service
            .predict_with_timeout(bytes, config.inference_timeout())
            .await
        {
            Ok(prediction) => tracing::info!(
                path = %path,
                label = prediction.label.as_deref(),
                confidence = prediction.confidence,
                "Classified image"
            ),
            Err(e) => tracing::warn!(path = %path, error = %e, kind = e.kind(), "Food not recognized"),
        }
    }

    Ok(())
}
