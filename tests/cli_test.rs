use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::tempdir;
use treuhand::domain::escrow::EscrowReference;

mod common;

#[test]
fn test_cli_end_to_end() {
    let dir = tempdir().unwrap();
    let orders = dir.path().join("orders.csv");
    let feed = dir.path().join("feed.csv");

    common::write_orders_csv(
        &orders,
        &[
            ("ord-1001", "cus-1", "prv-1", 10000, 1500),
            ("ord-1002", "cus-2", "prv-2", 5000, 750),
        ],
    );

    let reference = EscrowReference::derive("ord-1001", 0);
    common::write_feed_csv(
        &feed,
        &[
            ("tx-1", "85.00", &format!("Zahlung {reference} danke")),
            ("tx-2", "12.00", "Miete August"),
        ],
    );

    let mut cmd = Command::new(cargo_bin!("treuhand"));
    cmd.arg("--orders").arg(&orders).arg("--feed").arg(&feed);

    // ord-1001 was matched and advanced; ord-1002 is still awaiting clearing
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "order_id,reference,status,payout_status,gross,fee,net",
        ))
        .stdout(predicate::str::contains(format!(
            "ord-1001,{reference},ProviderAssigned,None,10000,1500,8500"
        )))
        .stdout(predicate::str::contains(
            "ord-1002,ESC-",
        ))
        .stdout(predicate::str::contains("AwaitingClearing,None,5000,750,4250"));
}

#[test]
fn test_cli_journal_output() {
    let dir = tempdir().unwrap();
    let orders = dir.path().join("orders.csv");
    let feed = dir.path().join("feed.csv");

    common::write_orders_csv(&orders, &[("ord-1001", "cus-1", "prv-1", 10000, 1500)]);

    let reference = EscrowReference::derive("ord-1001", 0);
    common::write_feed_csv(
        &feed,
        &[
            ("tx-1", "85.00", &format!("Payment {reference} thanks")),
            ("tx-2", "42.00", "ESC-ZZZZZZZZ"),
            ("tx-3", "10.00", "no reference here"),
        ],
    );

    let mut cmd = Command::new(cargo_bin!("treuhand"));
    cmd.arg("--orders")
        .arg(&orders)
        .arg("--feed")
        .arg(&feed)
        .arg("--journal");

    // matched and unmatched transactions are journaled; the one without a
    // recognizable reference is not
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "tx-1,{reference},Processed,"
        )))
        .stdout(predicate::str::contains("tx-2,ESC-ZZZZZZZZ,NoEscrowFound,"))
        .stdout(predicate::str::contains("tx-3").not());
}

#[test]
fn test_cli_without_inputs_prints_empty_state() {
    let mut cmd = Command::new(cargo_bin!("treuhand"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "order_id,reference,status,payout_status,gross,fee,net",
        ));
}
