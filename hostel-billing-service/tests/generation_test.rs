mod common;

use chrono::NaiveDate;
use common::TestApp;
use hostel_billing_service::error::BillingError;
use hostel_billing_service::models::EntityKind;
use hostel_billing_service::services::NotificationEvent;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn first_day_run_creates_one_record_per_billable_entity() {
    let app = TestApp::new();
    let asha = app
        .store
        .add_student("Asha", Some("asha@example.com"), dec!(15000), true);
    app.store.add_student("Bina", None, dec!(12000), true);
    app.store.add_student("Inactive", None, dec!(12000), false);
    app.store.add_student("Scholarship", None, dec!(0), true);

    let summary = app
        .components
        .student_generation
        .generate_for_current_period(false)
        .await
        .unwrap();

    assert!(!summary.gated);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.skipped_existing, 0);
    assert_eq!(summary.errors, 0);

    let records = app.store.billing_records();
    assert_eq!(records.len(), 2);
    let record = records
        .iter()
        .find(|r| r.entity_id == asha.student_id)
        .unwrap();
    assert_eq!(record.entity_kind, EntityKind::Student);
    assert_eq!(record.amount, dec!(15000));
    assert_eq!(record.billing_year_bs, 2081);
    assert_eq!(record.billing_month_bs, 4);
    assert_eq!(record.nepali_date, "2081-04-01");
    assert_eq!(record.due_date, NaiveDate::from_ymd_opt(2024, 7, 23).unwrap());
    assert_eq!(
        record.record_number,
        format!("INV-BS2081-04-{}", asha.student_id)
    );
}

#[tokio::test]
async fn second_run_in_same_period_creates_nothing() {
    let app = TestApp::new();
    app.store.add_staff("Ram", None, dec!(30000), true);
    app.store.add_staff("Hari", None, dec!(25000), true);

    let first = app
        .components
        .staff_generation
        .generate_for_current_period(false)
        .await
        .unwrap();
    let second = app
        .components
        .staff_generation
        .generate_for_current_period(false)
        .await
        .unwrap();

    assert_eq!(first.created, 2);
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped_existing, 2);
    assert_eq!(app.store.billing_records().len(), 2);
}

#[tokio::test]
async fn run_is_gated_outside_first_day_unless_forced() {
    let app = TestApp::new();
    app.store.add_staff("Ram", None, dec!(30000), true);
    app.calendar
        .set(2081, 4, 15, NaiveDate::from_ymd_opt(2024, 7, 30).unwrap());

    let gated = app
        .components
        .staff_generation
        .generate_for_current_period(false)
        .await
        .unwrap();
    assert!(gated.gated);
    assert_eq!(gated.processed, 0);
    assert!(app.store.billing_records().is_empty());

    let forced = app
        .components
        .staff_generation
        .generate_for_current_period(true)
        .await
        .unwrap();
    assert!(!forced.gated);
    assert_eq!(forced.created, 1);

    let record = &app.store.billing_records()[0];
    assert_eq!(record.nepali_date, "2081-04-15");
    assert!(record.record_number.starts_with("PAY-BS2081-04-"));
}

#[tokio::test]
async fn failing_entity_does_not_stop_the_run() {
    let app = TestApp::new();
    app.store.add_student("One", None, dec!(1000), true);
    let broken = app.store.add_student("Two", None, dec!(1000), true);
    app.store.add_student("Three", None, dec!(1000), true);
    app.store.fail_billing_for(broken.student_id);

    let summary = app
        .components
        .student_generation
        .generate_for_current_period(false)
        .await
        .unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.errors, 1);
    assert!(app
        .store
        .billing_records()
        .iter()
        .all(|r| r.entity_id != broken.student_id));
}

#[tokio::test]
async fn entities_are_read_in_chunks() {
    let app = TestApp::with_chunk_size(2);
    for i in 0..5 {
        app.store
            .add_staff(&format!("Staff {}", i), None, dec!(10000), true);
    }

    let summary = app
        .components
        .staff_generation
        .generate_for_current_period(false)
        .await
        .unwrap();

    assert_eq!(summary.processed, 5);
    assert_eq!(summary.created, 5);
}

#[tokio::test]
async fn duplicate_caught_by_unique_constraint_counts_as_skipped() {
    let app = TestApp::new();
    app.store.add_staff("Ram", None, dec!(30000), true);
    app.components
        .staff_generation
        .generate_for_current_period(false)
        .await
        .unwrap();

    app.store.skip_existence_check.store(true, Ordering::SeqCst);
    let summary = app
        .components
        .staff_generation
        .generate_for_current_period(false)
        .await
        .unwrap();

    assert_eq!(summary.created, 0);
    assert_eq!(summary.skipped_existing, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(app.store.billing_records().len(), 1);
}

#[tokio::test]
async fn unreadable_entity_table_aborts_the_run() {
    let app = TestApp::new();
    app.store.add_staff("Ram", None, dec!(30000), true);
    app.store.fail_listing.store(true, Ordering::SeqCst);

    let err = app
        .components
        .staff_generation
        .generate_for_current_period(false)
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Persistence(_)));
    assert!(app.store.billing_records().is_empty());
}

#[tokio::test]
async fn created_records_notify_entities_with_email() {
    let app = TestApp::new();
    let asha = app
        .store
        .add_student("Asha", Some("asha@example.com"), dec!(15000), true);
    app.store.add_student("Bina", None, dec!(12000), true);

    app.components
        .student_generation
        .generate_for_current_period(false)
        .await
        .unwrap();

    let events = app.notifier.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        NotificationEvent::BillingRecordCreated {
            recipient,
            record_number,
            nepali_date,
            ..
        } => {
            assert_eq!(recipient, "asha@example.com");
            assert_eq!(nepali_date, "2081-04-01");
            assert!(record_number.ends_with(&asha.student_id.to_string()));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn staff_and_student_runs_are_independent() {
    let app = TestApp::new();
    app.store.add_staff("Ram", None, dec!(30000), true);
    app.store.add_student("Asha", None, dec!(15000), true);

    let staff = app
        .components
        .staff_generation
        .generate_for_current_period(false)
        .await
        .unwrap();

    assert_eq!(staff.entity_kind, EntityKind::Staff);
    assert_eq!(staff.created, 1);
    assert!(app
        .store
        .billing_records()
        .iter()
        .all(|r| r.entity_kind == EntityKind::Staff));
}
