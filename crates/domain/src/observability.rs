use metrics::counter;

const PUSH_EVENTS_DROPPED_TOTAL: &str = "tanggap_push_events_dropped_total";
const PUSH_REPULLS_TOTAL: &str = "tanggap_push_repulls_total";
const SCHEMA_DRIFT_TOTAL: &str = "tanggap_schema_drift_records_total";
const NOTIFICATIONS_TOTAL: &str = "tanggap_notifications_total";
const MUTATIONS_TOTAL: &str = "tanggap_mutations_total";

pub fn register_dropped_push_event(event_kind: &str, reason: &str) {
    counter!(
        PUSH_EVENTS_DROPPED_TOTAL,
        "event_kind" => event_kind.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn register_repull(event_kind: &str) {
    counter!(PUSH_REPULLS_TOTAL, "event_kind" => event_kind.to_string()).increment(1);
}

pub fn register_schema_drift(record_type: &str) {
    counter!(SCHEMA_DRIFT_TOTAL, "record_type" => record_type.to_string()).increment(1);
}

pub fn register_notification(notification_type: &str, result: &str) {
    counter!(
        NOTIFICATIONS_TOTAL,
        "type" => notification_type.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn register_mutation(action: &str, result: &str) {
    counter!(
        MUTATIONS_TOTAL,
        "action" => action.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}
