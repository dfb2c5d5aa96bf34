mod support;

use classifier::PredictionStats;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tempfile::tempdir;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_inference_times_out() {
    let dir = tempdir().unwrap();
    let (model_path, labels_path) = write_fixture(dir.path(), &VN_LABELS, &VN_LOGITS);

    let service = Arc::new(service::<SlowBackend>(&model_path, &labels_path));
    service.load_with_timeout(Duration::from_secs(5)).await.unwrap();

    let err = service
        .predict_with_timeout(png_bytes(8, 8, [10, 10, 10]), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert!(err.to_string().contains("timed out"));

    // The model survives an abandoned prediction
    assert!(service.is_loaded());

    let prediction = service
        .predict_with_timeout(png_bytes(8, 8, [10, 10, 10]), SLOW_INFER * 10)
        .await
        .unwrap();
    assert_eq!(prediction.label.as_deref(), Some("banh_mi"));

    assert_eq!(
        service.stats(),
        PredictionStats {
            recognized: 1,
            failed: 1
        }
    );
}

#[tokio::test]
async fn test_load_with_timeout_reports_configuration_errors() {
    let dir = tempdir().unwrap();
    let service = Arc::new(service::<FixedLogitsBackend>(
        &dir.path().join("food_model.pth"),
        &dir.path().join("labels.txt"),
    ));

    let err = service
        .load_with_timeout(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "configuration");
    assert!(!service.is_loaded());
}

#[tokio::test]
async fn test_predict_with_timeout_surfaces_decode_errors() {
    let dir = tempdir().unwrap();
    let (model_path, labels_path) = write_fixture(dir.path(), &VN_LABELS, &VN_LOGITS);

    let service = Arc::new(service::<FixedLogitsBackend>(&model_path, &labels_path));

    let err = service
        .predict_with_timeout(b"GIF89a\x00\x00".to_vec(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "decode");

    // Implicit load still happened before the decode failure
    assert!(service.is_loaded());

    let prediction = service
        .predict_with_timeout(png_bytes(8, 8, [10, 10, 10]), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(prediction.label.as_deref(), Some("banh_mi"));

    // Counted the same way as the synchronous path
    assert_eq!(
        service.stats(),
        PredictionStats {
            recognized: 1,
            failed: 1
        }
    );
}
