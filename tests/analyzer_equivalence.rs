//! The worker analyzer must produce exactly what the inline analyzer does

use image::{Rgba, RgbaImage};
use proptest::prelude::*;
use segmask::{encode_png, InlineAnalyzer, PixelAnalyzer, WorkerAnalyzer};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    })
}

fn arb_mask() -> impl Strategy<Value = RgbaImage> {
    (1u32..16, 1u32..16).prop_flat_map(|(width, height)| {
        prop::collection::vec(any::<u8>(), (width * height) as usize).prop_map(move |alphas| {
            RgbaImage::from_fn(width, height, |x, y| {
                let alpha = alphas[(y * width + x) as usize];
                Rgba([255, 255, 255, alpha])
            })
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scans_match(mask in arb_mask()) {
        let mask = Arc::new(mask);
        let worker = WorkerAnalyzer::new(2);

        let (inline_alpha, worker_alpha, inline_edges, worker_edges) = runtime().block_on(async {
            (
                InlineAnalyzer.scan_alpha(Arc::clone(&mask)).await,
                worker.scan_alpha(Arc::clone(&mask)).await,
                InlineAnalyzer.edge_smoothness(Arc::clone(&mask)).await,
                worker.edge_smoothness(Arc::clone(&mask)).await,
            )
        });

        prop_assert_eq!(inline_alpha, worker_alpha);
        prop_assert_eq!(inline_edges, worker_edges);
        prop_assert_eq!(inline_alpha.total, u64::from(mask.width() * mask.height()));
    }

    #[test]
    fn blur_matches(mask in arb_mask(), radius in 0.0f32..4.0) {
        let mask = Arc::new(mask);
        let worker = WorkerAnalyzer::new(1);

        let (inline, offloaded) = runtime().block_on(async {
            (
                InlineAnalyzer.box_blur(Arc::clone(&mask), radius).await,
                worker.box_blur(Arc::clone(&mask), radius).await,
            )
        });

        prop_assert_eq!(inline.dimensions(), mask.dimensions());
        prop_assert_eq!(inline, offloaded);
    }

    #[test]
    fn decode_matches(mask in arb_mask()) {
        let bytes = Arc::new(encode_png(&mask));
        let worker = WorkerAnalyzer::default();

        let (inline, offloaded) = runtime().block_on(async {
            (
                InlineAnalyzer.decode(Arc::clone(&bytes)).await.unwrap(),
                worker.decode(Arc::clone(&bytes)).await.unwrap(),
            )
        });

        prop_assert_eq!(&inline, &mask);
        prop_assert_eq!(inline, offloaded);
    }
}
