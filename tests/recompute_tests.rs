//! Integration tests for recomputing window attention from a host module.

use ndarray::{Array2, Array3, Array4};

use ada_snapkv::attention::{
    AttentionLayer, AttentionModule, LengthRotary, Linear, PositionRotary, ProjectionWeights, QueryProjection,
    RotaryConvention, RotaryProvider, RotaryTable,
};
use ada_snapkv::cache::metadata::CacheMetadata;
use ada_snapkv::config::PressConfig;
use ada_snapkv::error::PressError;
use ada_snapkv::press::{AdaSnapKvPress, AttentionSource};

const THETA: f32 = 10000.0;

fn make_press(window: usize) -> AdaSnapKvPress {
    AdaSnapKvPress::new(PressConfig::new(0.5, window, 3, 0.25).unwrap()).unwrap()
}

fn wave(shape: (usize, usize, usize), phase: f32) -> Array3<f32> {
    Array3::from_shape_fn(shape, |(a, b, c)| {
        (phase + a as f32 * 0.7 + b as f32 * 0.31 + c as f32 * 1.3).sin()
    })
}

fn query_layer(heads: usize, kv_heads: usize, dim: usize, convention: RotaryConvention) -> AttentionLayer {
    let width = heads * dim;
    AttentionLayer::new(
        "LlamaAttention",
        ProjectionWeights::Query(Linear::new(Array2::eye(width), None).unwrap()),
        RotaryTable::new(dim, THETA),
        convention,
        heads,
        kv_heads,
    )
    .unwrap()
}

/// Same queries as `query_layer`, but through a fused `[q | k | v]` projection.
fn fused_layer(heads: usize, kv_heads: usize, dim: usize) -> AttentionLayer {
    let width = heads * dim;
    let kv_width = kv_heads * dim;
    let mut weight = Array2::<f32>::zeros((width, width + 2 * kv_width));
    for i in 0..width {
        weight[[i, i]] = 1.0;
    }
    for i in 0..kv_width {
        weight[[i, width + i]] = 2.0;
        weight[[i, width + kv_width + i]] = -1.0;
    }
    AttentionLayer::new(
        "Phi3Attention",
        ProjectionWeights::FusedQkv(Linear::new(weight, None).unwrap()),
        RotaryTable::new(dim, THETA),
        RotaryConvention::TotalLength,
        heads,
        kv_heads,
    )
    .unwrap()
}

/// Full causal attention `[bsz, heads, seq, seq]` computed in f64, with the
/// identity query projection and queries rotated at every position.
fn reference_attentions(hidden: &Array3<f32>, keys: &Array3<f32>, heads: usize, kv_heads: usize, dim: usize) -> Array4<f32> {
    let (bsz, seq, _) = hidden.dim();
    let groups = heads / kv_heads;
    let table = RotaryTable::new(dim, THETA);
    let positions: Vec<usize> = (0..seq).collect();
    let (cos, sin) = PositionRotary::cos_sin(&table, &positions);
    let half = dim / 2;

    let mut out = Array4::<f32>::zeros((bsz, heads, seq, seq));
    for b in 0..bsz {
        for h in 0..heads {
            let kv_row = b * kv_heads + h / groups;
            for q in 0..seq {
                let raw: Vec<f64> = (0..dim).map(|d| hidden[[b, q, h * dim + d]] as f64).collect();
                let rotated: Vec<f64> = (0..dim)
                    .map(|d| {
                        let partner = if d < half { -raw[d + half] } else { raw[d - half] };
                        raw[d] * cos[[q, d]] as f64 + partner * sin[[q, d]] as f64
                    })
                    .collect();
                let logits: Vec<f64> = (0..=q)
                    .map(|k| {
                        let dot: f64 = (0..dim).map(|d| rotated[d] * keys[[kv_row, k, d]] as f64).sum();
                        dot / (dim as f64).sqrt()
                    })
                    .collect();
                let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let sum: f64 = logits.iter().map(|l| (l - max).exp()).sum();
                for (k, l) in logits.iter().enumerate() {
                    out[[b, h, q, k]] = ((l - max).exp() / sum) as f32;
                }
            }
        }
    }
    out
}

fn assert_close(a: &Array3<f32>, b: &Array3<f32>) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        if *x == f32::MAX || *y == f32::MAX {
            assert_eq!(x, y);
        } else {
            assert!((x - y).abs() < 1e-5, "{x} vs {y}");
        }
    }
}

#[test]
fn test_recompute_matches_precomputed() {
    let (bsz, heads, kv_heads, dim, seq) = (2, 4, 2, 4, 12);
    let layer = query_layer(heads, kv_heads, dim, RotaryConvention::PositionIds);
    let hidden = wave((bsz, seq, heads * dim), 0.2);
    let keys = wave((bsz * kv_heads, seq, dim), 1.1);
    let meta = CacheMetadata::uniform(bsz, kv_heads, seq);
    let press = make_press(3);

    let recomputed = press
        .score(
            AttentionSource::Recompute {
                module: &layer,
                hidden_states: hidden.view(),
            },
            keys.view(),
            Some(&meta),
        )
        .unwrap();

    let attentions = reference_attentions(&hidden, &keys, heads, kv_heads, dim);
    let precomputed = press
        .score(AttentionSource::Precomputed(attentions.view()), keys.view(), Some(&meta))
        .unwrap();

    assert_eq!(recomputed.dim(), (bsz, kv_heads, seq));
    assert_close(&recomputed, &precomputed);
}

#[test]
fn test_fused_projection_matches_direct() {
    let (heads, kv_heads, dim, seq) = (2, 1, 4, 10);
    let hidden = wave((1, seq, heads * dim), -0.4);
    let keys = wave((kv_heads, seq, dim), 0.9);
    let meta = CacheMetadata::uniform(1, kv_heads, seq);
    let press = make_press(2);

    let direct = query_layer(heads, kv_heads, dim, RotaryConvention::PositionIds);
    let fused = fused_layer(heads, kv_heads, dim);

    let by_direct = press
        .score(
            AttentionSource::Recompute {
                module: &direct,
                hidden_states: hidden.view(),
            },
            keys.view(),
            Some(&meta),
        )
        .unwrap();
    let by_fused = press
        .score(
            AttentionSource::Recompute {
                module: &fused,
                hidden_states: hidden.view(),
            },
            keys.view(),
            Some(&meta),
        )
        .unwrap();

    assert_eq!(by_direct, by_fused);
}

struct OpaqueAttention {
    rotary: RotaryTable,
}

impl AttentionModule for OpaqueAttention {
    fn name(&self) -> &str {
        "OpaqueAttention"
    }

    fn num_heads(&self) -> usize {
        1
    }

    fn head_dim(&self) -> usize {
        2
    }

    fn num_key_value_groups(&self) -> usize {
        1
    }

    fn query_projection(&self) -> QueryProjection<'_> {
        QueryProjection::Unsupported
    }

    fn rotary(&self) -> RotaryProvider<'_> {
        RotaryProvider::PositionIds(&self.rotary)
    }
}

#[test]
fn test_unsupported_layout() {
    let module = OpaqueAttention {
        rotary: RotaryTable::new(2, THETA),
    };
    let hidden = Array3::<f32>::zeros((1, 5, 2));
    let keys = Array3::<f32>::zeros((1, 5, 2));
    let meta = CacheMetadata::uniform(1, 1, 5);

    let err = make_press(2)
        .score(
            AttentionSource::Recompute {
                module: &module,
                hidden_states: hidden.view(),
            },
            keys.view(),
            Some(&meta),
        )
        .unwrap_err();
    assert_eq!(
        err,
        PressError::UnsupportedLayout {
            module: "OpaqueAttention".to_string()
        }
    );
}

#[test]
fn test_hidden_states_must_cover_cache() {
    let layer = query_layer(1, 1, 2, RotaryConvention::PositionIds);
    let hidden = Array3::<f32>::zeros((1, 4, 2));
    let keys = Array3::<f32>::zeros((1, 6, 2));
    let meta = CacheMetadata::uniform(1, 1, 6);

    let err = make_press(2)
        .score(
            AttentionSource::Recompute {
                module: &layer,
                hidden_states: hidden.view(),
            },
            keys.view(),
            Some(&meta),
        )
        .unwrap_err();
    assert!(matches!(err, PressError::ShapeMismatch { .. }));
}

/// Length-convention host whose rotary provider ignores the requested length.
struct ShortRotaryAttention {
    q_proj: Linear,
}

impl LengthRotary for ShortRotaryAttention {
    fn cos_sin(&self, _seq_len: usize) -> (Array2<f32>, Array2<f32>) {
        (Array2::ones((2, 2)), Array2::zeros((2, 2)))
    }
}

impl AttentionModule for ShortRotaryAttention {
    fn name(&self) -> &str {
        "ShortRotaryAttention"
    }

    fn num_heads(&self) -> usize {
        1
    }

    fn head_dim(&self) -> usize {
        2
    }

    fn num_key_value_groups(&self) -> usize {
        1
    }

    fn query_projection(&self) -> QueryProjection<'_> {
        QueryProjection::Direct(&self.q_proj)
    }

    fn rotary(&self) -> RotaryProvider<'_> {
        RotaryProvider::TotalLength(self)
    }
}

#[test]
fn test_short_rotary_factors_are_an_error() {
    let module = ShortRotaryAttention {
        q_proj: Linear::new(Array2::eye(2), None).unwrap(),
    };
    let hidden = wave((1, 8, 2), 0.3);
    let keys = wave((1, 8, 2), 0.6);
    let meta = CacheMetadata::uniform(1, 1, 8);

    let err = make_press(2)
        .score(
            AttentionSource::Recompute {
                module: &module,
                hidden_states: hidden.view(),
            },
            keys.view(),
            Some(&meta),
        )
        .unwrap_err();
    assert!(matches!(err, PressError::ShapeMismatch { what: "rotary factors", .. }));
}
