use crate::config::Environment;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Pretty output in development, JSON lines in production. Filtering comes
/// from `RUST_LOG` and defaults to `info`.
///
/// The OpenTelemetry layer exports spans through whatever global tracer
/// provider is installed, so call [`crate::TelemetryGuard::init`] first when
/// exporting. Calling this twice is harmless: the second subscriber is
/// rejected and a debug event is emitted through the first one.
pub fn setup_logging(environment: Environment) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let otel_layer = tracing_opentelemetry::layer()
        .with_tracer(opentelemetry::global::tracer("food-classifier"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    let result = match environment {
        Environment::Production => registry
            .with(tracing_subscriber::fmt::layer().json().with_level(true))
            .try_init(),
        Environment::Development => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
