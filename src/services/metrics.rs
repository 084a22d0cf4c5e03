use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

lazy_static! {
    pub static ref CHECKOUTS_COUNTER: CounterVec = register_counter_vec!(
        "saunafest_checkouts_total",
        "Checkout attempts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref WEBHOOK_EVENTS_COUNTER: CounterVec = register_counter_vec!(
        "saunafest_stripe_webhook_events_total",
        "Stripe webhook events by type and outcome",
        &["event_type", "outcome"]
    ).unwrap();

    pub static ref CHECK_INS_COUNTER: CounterVec = register_counter_vec!(
        "saunafest_check_ins_total",
        "Door scans by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref REFUNDS_COUNTER: IntCounter = register_int_counter!(
        "saunafest_refunds_total",
        "Refunds issued from the back office"
    ).unwrap();

    pub static ref EMAILS_FAILED_COUNTER: CounterVec = register_counter_vec!(
        "saunafest_emails_failed_total",
        "Best-effort emails that failed to send",
        &["kind"]
    ).unwrap();
}

pub fn checkout(outcome: &str) {
    CHECKOUTS_COUNTER.with_label_values(&[outcome]).inc();
}

pub fn webhook(event_type: &str, outcome: &str) {
    WEBHOOK_EVENTS_COUNTER.with_label_values(&[event_type, outcome]).inc();
}

pub fn check_in(outcome: &str) {
    CHECK_INS_COUNTER.with_label_values(&[outcome]).inc();
}

pub fn email_failed(kind: &str) {
    EMAILS_FAILED_COUNTER.with_label_values(&[kind]).inc();
}
