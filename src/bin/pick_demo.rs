//! Demo: prints the balanced source picks for a few bias points, using the
//! catalog at `CATALOG_PATH` (built-in catalog when missing).

use balanced_feed::catalog::{CatalogHandle, DEFAULT_MIN_ACTIVE};
use balanced_feed::selector::SelectorConfig;
use balanced_feed::{BiasCoordinate, SourceSelector};

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let path = std::env::var("CATALOG_PATH").unwrap_or_else(|_| "config/sources.json".into());
    let catalog = CatalogHandle::open(path.into(), DEFAULT_MIN_ACTIVE);
    let selector = SourceSelector::new(catalog, SelectorConfig::default());

    let points = [(0.0, 0.0), (-0.8, 0.4), (0.9, -0.6), (0.3, 0.3)];
    for (x, y) in points {
        let bias = BiasCoordinate { x, y };
        let sel = selector.select(bias, 2, 2, None);
        println!("bias ({x:+.2}, {y:+.2})  stage={}", sel.stage.as_str());
        for s in &sel.sources {
            println!(
                "  {:<16} {:<20} d={:.3}{}",
                format!("{:?}", s.role),
                s.source.id,
                s.distance,
                if s.is_fallback { "  (fallback)" } else { "" }
            );
        }
    }

    println!("pick-demo done");
}
