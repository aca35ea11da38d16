use goose::prelude::*;
use rand::Rng;

/// Load testing suite for the image gateway.
///
/// Traffic mix:
/// - Variant requests with varied parameters (mostly cache misses)
/// - Repeated variant requests (cache hits after warmup)
/// - Pre-canonicalized edge paths
/// - Health monitoring endpoints
///
/// The gateway must be able to serve `SOURCE_PATH` from its source store.
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:8080 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// # Performance Targets
/// - Cache hits: <20ms p95 latency
/// - Cache misses: <200ms p95 latency (WebP) / <400ms (AVIF)
/// - Error rate: <1%

const SOURCE_PATH: &str = "/photos/sample.jpg";
const EDGE_PATH: &str = "/photos/c/500x500/h/webp/sample.jpg";

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    GooseAttack::initialize()?
        .register_scenario(
            scenario!("ImageTransformation")
                .register_transaction(transaction!(fetch_image).set_weight(10)?)
                .register_transaction(transaction!(original_image).set_weight(2)?)
                .register_transaction(transaction!(health_check).set_weight(1)?)
        )
        .register_scenario(
            scenario!("CachePerformance")
                // Consistent parameters validate cache hit performance
                .register_transaction(transaction!(cached_image).set_weight(15)?)
                .register_transaction(transaction!(canonical_image).set_weight(5)?)
                // Unique parameters validate transformation throughput
                .register_transaction(transaction!(uncached_image).set_weight(5)?)
        )
        .execute()
        .await?;

    Ok(())
}

/// Randomized dimensions and quality. Rounding folds nearby values into one
/// variant, so this mixes hits and misses.
async fn fetch_image(user: &mut GooseUser) -> TransactionResult {
    // Generate random parameters before await to satisfy Send bounds
    let url = {
        let mut rng = rand::thread_rng();
        let width = rng.gen_range(200..800);
        let height = rng.gen_range(200..800);
        let qualities = ["low", "medium", "high", "best"];
        let quality = qualities[rng.gen_range(0..qualities.len())];
        format!("{}?w={}&h={}&q={}", SOURCE_PATH, width, height, quality)
    };

    let request_builder = user
        .get_request_builder(&GooseMethod::Get, &url)?
        .header("Accept", "image/webp");
    let request = GooseRequest::builder()
        .set_request_builder(request_builder)
        .build();
    let _goose = user.request(request).await?;

    Ok(())
}

/// Unmodified source delivery, bypassing the variant cache.
async fn original_image(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get(&format!("{}?original=true", SOURCE_PATH)).await?;
    Ok(())
}

/// Fixed parameters guarantee cache hits after warmup.
async fn cached_image(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get(&format!("{}?w=500&h=500&q=high", SOURCE_PATH)).await?;
    Ok(())
}

/// Already-canonical edge path, served without query normalization.
async fn canonical_image(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get(EDGE_PATH).await?;
    Ok(())
}

/// Timestamp-derived blur and width keep producing new variants, measuring
/// worst-case transformation latency.
async fn uncached_image(user: &mut GooseUser) -> TransactionResult {
    let timestamp = chrono::Utc::now().timestamp();
    let width = 100 + (timestamp % 400) * 10;
    let blur = 1 + (timestamp / 400) % 50;

    let _goose = user
        .get(&format!("{}?w={}&b={}", SOURCE_PATH, width, blur))
        .await?;

    Ok(())
}

/// Baseline for infrastructure latency separate from business logic overhead.
async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
