use super::*;
use std::time::Duration;

#[test]
fn pack_unpack_roundtrip() {
    let v = vec![0.5f32, -1.25, 3.0];
    let blob = pack_vector(&v);
    assert_eq!(blob.len(), 12);
    assert_eq!(unpack_vector(&blob, 3), Some(v));
}

#[test]
fn unpack_rejects_bad_length() {
    let blob = pack_vector(&[1.0, 2.0]);
    assert_eq!(unpack_vector(&blob, 3), None);
    assert_eq!(unpack_vector(&blob[..7], 2), None);
}

#[test]
fn blob_is_little_endian() {
    let blob = pack_vector(&[1.0]);
    assert_eq!(blob, 1.0f32.to_le_bytes().to_vec());
}

#[test]
fn normalize_produces_unit_norm() {
    let mut v = vec![3.0f32, 4.0];
    l2_normalize(&mut v);
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
    assert!((v[0] - 0.6).abs() < 1e-6);
}

#[test]
fn normalize_leaves_zero_vector() {
    let mut v = vec![0.0f32, 0.0];
    l2_normalize(&mut v);
    assert_eq!(v, vec![0.0, 0.0]);
}

#[test]
fn dot_of_unit_vectors_is_cosine() {
    let a = vec![1.0f32, 0.0];
    let b = vec![0.0f32, 1.0];
    assert_eq!(dot(&a, &a), 1.0);
    assert_eq!(dot(&a, &b), 0.0);
}

#[test]
fn finalize_batch_checks_count_and_dims() {
    let err = finalize_batch(vec![vec![1.0, 0.0]], 2, 2).unwrap_err();
    assert!(matches!(err, EmbedError::CountMismatch { want: 2, got: 1 }));

    let err = finalize_batch(vec![vec![1.0]], 1, 2).unwrap_err();
    assert!(matches!(err, EmbedError::DimsMismatch { want: 2, got: 1 }));

    let ok = finalize_batch(vec![vec![3.0, 4.0]], 1, 2).unwrap();
    let norm = ok[0].iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn backend_factory_respects_off() {
    let config = crate::config::EmbedConfig::default();
    assert!(backend_from_config(&config).unwrap().is_none());
}

#[test]
fn budget_guard_fails_fast() {
    let mut config = crate::config::EmbedConfig::default();
    config.backend = crate::config::EmbedBackendKind::Ollama;
    let backend = OllamaBackend::new(&config).unwrap();

    let err = backend
        .embed_batch(&["text".to_string()], Duration::from_millis(10))
        .unwrap_err();
    assert!(matches!(err, EmbedError::BudgetExhausted));
}

#[test]
fn transient_errors_classified() {
    assert!(is_transient(&ureq::Error::StatusCode(503)));
    assert!(is_transient(&ureq::Error::ConnectionFailed));
    assert!(!is_transient(&ureq::Error::StatusCode(404)));
    assert!(!is_transient(&ureq::Error::StatusCode(429)));
}

#[test]
fn retry_backoff_doubles() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff(1), Duration::from_millis(500));
    assert_eq!(policy.backoff(2), Duration::from_millis(1000));
    assert_eq!(policy.backoff(3), Duration::from_millis(2000));
}

#[test]
fn retry_success_passes_body_through() {
    let policy = RetryPolicy::default();
    let result = policy.run(Duration::from_secs(5), || Ok("body".to_string()));
    assert_eq!(result.unwrap(), "body");
}

#[test]
fn retry_gives_up_when_backoff_exceeds_budget() {
    let policy = RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_secs(10),
    };

    let mut calls = 0;
    let result = policy.run(Duration::from_millis(300), || {
        calls += 1;
        Err(ureq::Error::StatusCode(503))
    });

    // One attempt runs; the 10s backoff cannot fit in the 300ms budget.
    assert_eq!(calls, 1);
    assert!(matches!(result, Err(EmbedError::Unavailable(_))));
}

#[test]
fn retry_exhausts_attempts_on_persistent_5xx() {
    let policy = RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
    };

    let mut calls = 0;
    let result = policy.run(Duration::from_secs(5), || {
        calls += 1;
        Err(ureq::Error::StatusCode(503))
    });

    assert_eq!(calls, 3);
    assert!(matches!(result, Err(EmbedError::Unavailable(_))));
}

#[test]
fn client_error_fails_without_retry() {
    let policy = RetryPolicy::default();

    let mut calls = 0;
    let result = policy.run(Duration::from_secs(5), || {
        calls += 1;
        Err(ureq::Error::StatusCode(404))
    });

    assert_eq!(calls, 1);
    assert!(matches!(result, Err(EmbedError::Request(_))));
}
