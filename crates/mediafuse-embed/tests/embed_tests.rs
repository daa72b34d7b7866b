use mediafuse_core::traits::EmbeddingProvider;
use mediafuse_core::Error;
use mediafuse_embed::{default_provider, HashEmbedder};

#[test]
fn hash_embedder_shape_norm_and_determinism() {
    let embedder = HashEmbedder::new(512);
    let v1 = embedder.embed("stop sign at night").expect("embed");
    let v2 = embedder.embed("stop sign at night").expect("embed");

    assert_eq!(v1.len(), 512);
    assert_eq!(embedder.dim(), 512);

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    for (a, b) in v1.iter().zip(v2.iter()) {
        assert!((a - b).abs() <= 1e-6);
    }
}

#[test]
fn hash_embedder_distinguishes_inputs() {
    let embedder = HashEmbedder::new(512);
    let a = embedder.embed("a cat on a sofa").expect("embed");
    let b = embedder.embed("an open highway").expect("embed");
    assert_ne!(a, b);
}

#[test]
fn empty_input_is_an_embedding_error() {
    let embedder = HashEmbedder::new(512);
    let err = embedder.embed("   ").expect_err("must fail");
    assert!(matches!(err, Error::Embedding(_)));
}

#[test]
fn default_provider_honors_fake_env_switch() {
    // Force the fake to avoid loading model files.
    std::env::set_var("MEDIAFUSE_USE_FAKE_EMBEDDINGS", "1");
    let provider = default_provider().expect("provider");
    assert_eq!(provider.dim(), 512);
    let v = provider.embed("hello world").expect("embed");
    assert_eq!(v.len(), 512);
}
