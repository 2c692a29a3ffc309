//! Annotation and label keys written to or read from cluster objects.

// ─── Project ──────────────────────────────────────────────────────────────

/// RFC 3339 instant at which a force-slept project may wake.
pub const FORCE_SLEEP_UNTIL: &str = "hibernation.io/force-sleep-until";

/// RFC 3339 instant at which the project was last put to sleep.
pub const LAST_SLEEP_TIME: &str = "hibernation.io/last-sleep-time";

/// Projects carrying this label with value `"true"` are left alone.
pub const EXCLUDE_LABEL: &str = "hibernation.io/exclude";

// ─── Scalable controllers ─────────────────────────────────────────────────

/// Replica count a controller had before it was scaled to zero.
pub const PREVIOUS_SCALE: &str = "hibernation.io/previous-scale";

/// RFC 3339 instant at which the controller was idled for low traffic.
pub const IDLED_AT: &str = "hibernation.io/idled-at";

// ─── Quota ────────────────────────────────────────────────────────────────

/// Name of the restrictive quota applied to a project while it sleeps.
pub const FORCE_SLEEP_QUOTA_NAME: &str = "force-sleep";
