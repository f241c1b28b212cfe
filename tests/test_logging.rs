//! Logging initialization from the public API

use shadowlink::observability::{init_logging, LogFormat};
use tracing::{info, Instrument, Level};

#[test]
fn test_log_format_parse_whitespace_falls_back_to_json() {
    assert_eq!(LogFormat::parse("  pretty  "), LogFormat::Json);
    assert_eq!(LogFormat::parse("compact\n"), LogFormat::Json);
}

#[tokio::test]
async fn test_init_twice_is_harmless() {
    init_logging(Level::DEBUG, LogFormat::Compact, true);
    init_logging(Level::INFO, LogFormat::Json, false);

    // Spans from the exported macros work under the installed subscriber
    async {
        info!("inside delta span");
    }
    .instrument(shadowlink::delta_span!(topic = "things/kodi/shadow/update/delta"))
    .await;

    let _guard = shadowlink::lifecycle_span!(event = "test").entered();
    info!("inside lifecycle span");
}
