// Refresh loop
pub const REFRESH_CYCLE_COUNTER: &str = "edge_proxy_refresh_cycles_total";
pub const REFRESH_SUCCESS_COUNTER: &str = "edge_proxy_refresh_success_total";
pub const REFRESH_FAILURE_COUNTER: &str = "edge_proxy_refresh_failure_total";
pub const DOCUMENT_CHANGED_COUNTER: &str = "edge_proxy_document_changed_total";
pub const REFRESH_CYCLE_TIME: &str = "edge_proxy_refresh_cycle_time";
pub const SECONDS_SINCE_LAST_REFRESH_GAUGE: &str = "edge_proxy_seconds_since_last_refresh";

// Evaluation memoizer
pub const MEMOIZER_HIT_COUNTER: &str = "edge_proxy_memoizer_hit_total";
pub const MEMOIZER_MISS_COUNTER: &str = "edge_proxy_memoizer_miss_total";
pub const MEMOIZER_INVALIDATION_COUNTER: &str = "edge_proxy_memoizer_invalidation_total";

// Request handling
pub const FLAG_REQUESTS_COUNTER: &str = "edge_proxy_flag_requests_total";
pub const IDENTITY_REQUESTS_COUNTER: &str = "edge_proxy_identity_requests_total";
pub const UNKNOWN_KEY_COUNTER: &str = "edge_proxy_unknown_key_total";

// Change notifications
pub const CHANGES_RECORDED_COUNTER: &str = "edge_proxy_changes_recorded_total";
pub const STREAM_EVENTS_COUNTER: &str = "edge_proxy_stream_events_total";
pub const STREAMS_OPENED_COUNTER: &str = "edge_proxy_streams_opened_total";
pub const ACTIVE_STREAMS_GAUGE: &str = "edge_proxy_active_streams";
